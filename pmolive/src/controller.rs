//! Playback state machine.
//!
//! The controller owns a [`StreamPlayer`] and drives it through
//! Stopped → Loading → Playing, falling to Error on failures. Every start of
//! playback takes a new request token; asynchronous continuations only touch
//! the state when their token is still current and the state is still
//! Loading, so a `stop()` followed by a `play()` can never be overtaken by the
//! first attempt's late completion.
//!
//! Unexpected player exits while Playing are retried with a linear backoff
//! (see [`RetryPolicy`]) before giving up with Error.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::config_ext::LiveConfigExt;
use crate::error::{Error, Result};
use crate::events::{PlayerEvent, StateEventBus};
use crate::player::StreamPlayer;
use crate::process::{ExitOutcome, ProcessId};
use crate::retry::RetryPolicy;

/// Coarse playback state exposed to the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Loading,
    Playing,
    Error,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
            PlaybackState::Error => "error",
        }
    }

    /// Loading or Playing: the user expects sound.
    pub fn is_active(&self) -> bool {
        matches!(self, PlaybackState::Loading | PlaybackState::Playing)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerStatus {
    pub state: PlaybackState,
    pub retry_attempts: u32,
    pub retry_pending: bool,
    pub player_running: bool,
    pub stream_url: Option<String>,
}

#[derive(Default)]
struct ControllerState {
    state: PlaybackState,
    retry_attempts: u32,
    request_token: u64,
    /// Player launched by the current attempt.
    current_process: Option<ProcessId>,
    pending_retry: Option<JoinHandle<()>>,
    player_watch: Option<JoinHandle<()>>,
    playing_since: Option<Instant>,
    destroyed: bool,
}

impl ControllerState {
    /// A continuation may proceed only if it still owns the current request.
    fn owns(&self, token: u64) -> bool {
        self.request_token == token && self.state == PlaybackState::Loading
    }

    fn cancel_pending_retry(&mut self) {
        if let Some(timer) = self.pending_retry.take() {
            debug!("Cancelling pending retry");
            timer.abort();
        }
    }
}

struct Shared {
    player: StreamPlayer,
    policy: RetryPolicy,
    events: StateEventBus,
    state: Mutex<ControllerState>,
}

/// Supervises live playback: resolution, launch, retries and cancellation.
///
/// Must be created and used from within a tokio runtime. Dropping the
/// controller destroys it.
pub struct PlaybackController {
    shared: Arc<Shared>,
}

impl PlaybackController {
    pub fn new(player: StreamPlayer, policy: RetryPolicy) -> Self {
        let shared = Arc::new(Shared {
            player,
            policy,
            events: StateEventBus::new(),
            state: Mutex::new(ControllerState::default()),
        });

        let watch = Shared::watch_player(&shared);
        shared.lock().player_watch = Some(watch);

        Self { shared }
    }

    /// Controller running the real resolver and player, configured from
    /// `config`.
    pub fn from_config(config: &pmoconfig::Config) -> Result<Self> {
        let settings = config.get_player_settings()?;
        let policy = config.get_retry_policy()?;
        Ok(Self::new(
            StreamPlayer::with_system_processes(settings),
            policy,
        ))
    }

    /// Starts a new playback attempt, superseding any previous one.
    ///
    /// The state is Loading when this returns; resolution and launch run in
    /// the background.
    pub fn play(&self) {
        let mut state = self.shared.lock();
        if state.destroyed {
            warn!("play() called on a destroyed controller");
            return;
        }

        state.cancel_pending_retry();
        state.retry_attempts = 0;
        Shared::begin_attempt(&self.shared, &mut state, false);
    }

    /// Stops playback. The state is Stopped when this returns.
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        self.shared.stop_locked(&mut state);
    }

    /// Stop when Loading or Playing, play otherwise.
    pub fn toggle(&self) {
        if self.state().is_active() {
            self.stop();
        } else {
            self.play();
        }
    }

    /// Stops playback, releases the player and unsubscribes from its events.
    ///
    /// Idempotent.
    pub fn destroy(&self) {
        let watch = {
            let mut state = self.shared.lock();
            if state.destroyed {
                return;
            }
            info!("Destroying controller");
            self.shared.stop_locked(&mut state);
            state.destroyed = true;
            state.player_watch.take()
        };

        if let Some(watch) = watch {
            watch.abort();
        }
        self.shared.player.destroy();
        self.shared.events.close();
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.lock().state
    }

    /// True while a player process is running.
    pub fn is_playing(&self) -> bool {
        self.shared.player.is_playing()
    }

    pub fn retry_attempts(&self) -> u32 {
        self.shared.lock().retry_attempts
    }

    pub fn has_pending_retry(&self) -> bool {
        self.shared
            .lock()
            .pending_retry
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.lock().destroyed
    }

    pub fn player(&self) -> &StreamPlayer {
        &self.shared.player
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.shared.policy
    }

    /// Receives every state change from now on.
    pub fn subscribe(&self) -> UnboundedReceiver<PlaybackState> {
        self.shared.events.subscribe()
    }

    pub fn status(&self) -> ControllerStatus {
        let state = self.shared.lock();
        ControllerStatus {
            state: state.state,
            retry_attempts: state.retry_attempts,
            retry_pending: state
                .pending_retry
                .as_ref()
                .is_some_and(|timer| !timer.is_finished()),
            player_running: self.shared.player.is_playing(),
            stream_url: self.shared.player.cached_stream_url(),
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: &mut ControllerState, new_state: PlaybackState) {
        if state.state == new_state {
            return;
        }

        info!(from = %state.state, to = %new_state, "State change");
        state.state = new_state;
        self.events.broadcast(new_state);
    }

    /// Forwards player events to the controller for as long as it lives.
    fn watch_player(this: &Arc<Self>) -> JoinHandle<()> {
        let mut events = this.player.subscribe();
        let weak: Weak<Self> = Arc::downgrade(this);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                Shared::on_player_event(&shared, event);
            }
            debug!("Player event stream closed");
        })
    }

    fn begin_attempt(this: &Arc<Self>, state: &mut ControllerState, retry: bool) {
        state.request_token += 1;
        let token = state.request_token;
        state.current_process = None;
        state.playing_since = None;
        this.set_state(state, PlaybackState::Loading);

        let shared = Arc::clone(this);
        tokio::spawn(async move {
            shared.run_attempt(token, retry).await;
        });
    }

    async fn run_attempt(&self, token: u64, retry: bool) {
        debug!(token, retry, "Starting playback attempt");

        let stream_url = match self.player.resolve_stream_url(retry).await {
            Ok(url) => url,
            Err(err) => {
                self.fail_attempt(&mut self.lock(), token, err);
                return;
            }
        };

        // Held across the launch so no stop() can slip between the check and
        // the spawn.
        let mut state = self.lock();
        if !state.owns(token) {
            debug!(token, "Discarding stale stream resolution");
            return;
        }

        let process = match self.player.launch_player(&stream_url) {
            Ok(process) => process,
            Err(err) => {
                self.fail_attempt(&mut state, token, err);
                return;
            }
        };
        state.current_process = Some(process);

        // Retries keep their counter so that consecutive crashes add up
        if !retry {
            state.retry_attempts = 0;
        }
        state.playing_since = Some(Instant::now());
        self.set_state(&mut state, PlaybackState::Playing);
        info!(token, process, "Playback started successfully");
    }

    fn fail_attempt(&self, state: &mut ControllerState, token: u64, err: Error) {
        if !state.owns(token) {
            debug!(token, error = %err, "Ignoring failure of a superseded attempt");
            return;
        }

        error!(token, error = %err, "Error starting playback");
        state.retry_attempts = 0;
        state.playing_since = None;
        self.set_state(state, PlaybackState::Error);
    }

    fn stop_locked(&self, state: &mut ControllerState) {
        info!("Stopping playback");

        state.request_token += 1;
        state.cancel_pending_retry();
        state.retry_attempts = 0;
        state.current_process = None;
        state.playing_since = None;
        self.player.cancel_fetch();
        self.player.stop_player();
        self.set_state(state, PlaybackState::Stopped);
    }

    fn on_player_event(this: &Arc<Self>, event: PlayerEvent) {
        match event {
            PlayerEvent::PlaybackStarted { process } => {
                debug!(process, "Player reported start");
            }
            PlayerEvent::PlaybackStopped {
                process,
                superseded: true,
                ..
            } => {
                debug!(process, "Ignoring stop of a superseded player");
            }
            PlayerEvent::PlaybackStopped {
                process, outcome, ..
            } => Shared::on_unexpected_stop(this, process, outcome),
        }
    }

    fn on_unexpected_stop(this: &Arc<Self>, process: ProcessId, outcome: ExitOutcome) {
        let mut state = this.lock();
        if state.state != PlaybackState::Playing {
            debug!(process, state = %state.state, "Ignoring player stop outside of playback");
            return;
        }
        // The stop may be queued from a player that an earlier attempt launched
        if state.current_process != Some(process) {
            debug!(process, current = ?state.current_process, "Ignoring stop of a previous player");
            return;
        }
        state.current_process = None;

        if state
            .playing_since
            .is_some_and(|since| since.elapsed() >= this.policy.stable_after)
        {
            state.retry_attempts = 0;
        }
        state.playing_since = None;
        state.retry_attempts += 1;

        if this.policy.is_exhausted(state.retry_attempts) {
            warn!(
                process,
                max_retries = this.policy.max_retries,
                "Max retry attempts reached"
            );
            state.retry_attempts = 0;
            this.set_state(&mut state, PlaybackState::Error);
            return;
        }

        let attempt = state.retry_attempts;
        let delay = this.policy.delay_for(attempt);
        warn!(
            process,
            %outcome,
            attempt,
            max_retries = this.policy.max_retries,
            delay_secs = delay.as_secs(),
            "Playback stopped unexpectedly, retry scheduled"
        );

        state.cancel_pending_retry();
        let token = state.request_token;
        let weak = Arc::downgrade(this);
        state.pending_retry = Some(tokio::spawn(async move {
            sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                Shared::fire_retry(&shared, token, attempt);
            }
        }));
    }

    fn fire_retry(this: &Arc<Self>, token: u64, attempt: u32) {
        let mut state = this.lock();
        if state.request_token != token {
            debug!(attempt, "Retry timer outlived its request");
            return;
        }
        state.pending_retry = None;

        if state.state != PlaybackState::Playing {
            debug!(attempt, state = %state.state, "Retry no longer needed");
            return;
        }

        info!(attempt, "Retrying playback");
        Shared::begin_attempt(this, &mut state, true);
    }
}
