//! Stream player: one resolver run and one media-player process at a time.
//!
//! The player resolves the channel page into a playable URL with an external
//! resolver (yt-dlp), caches that URL, and runs an external media player
//! (mpv) against it. Each spawned player gets an exit watcher task that
//! reports the end of the process on the player's event bus.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::events::{PlayerEvent, PlayerEventBus};
use crate::process::{
    CapturedOutput, ChildProcess, CommandSpec, ExitOutcome, ProcessId, ProcessRunner,
    TokioProcessRunner,
};

/// Default channel page resolved into a live stream.
pub const DEFAULT_CHANNEL_URL: &str = "https://www.youtube.com/@deadmau5/live";

/// Default resolver binary.
pub const DEFAULT_RESOLVER_PROGRAM: &str = "yt-dlp";

/// Default resolver format selector (best audio, else best).
pub const DEFAULT_FORMAT_SELECTOR: &str = "ba/b";

/// Default media player binary.
pub const DEFAULT_PLAYER_PROGRAM: &str = "mpv";

/// Flags always passed to the player: audio only, no terminal UI, buffered input.
pub const PLAYER_FIXED_FLAGS: [&str; 3] = ["--no-video", "--no-terminal", "--cache=yes"];

/// What to resolve and which tools to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSettings {
    pub channel_url: String,
    pub resolver_program: String,
    pub format_selector: String,
    pub player_program: String,
    /// Passed to the player after the fixed flags.
    pub player_extra_args: Vec<String>,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            channel_url: DEFAULT_CHANNEL_URL.to_string(),
            resolver_program: DEFAULT_RESOLVER_PROGRAM.to_string(),
            format_selector: DEFAULT_FORMAT_SELECTOR.to_string(),
            player_program: DEFAULT_PLAYER_PROGRAM.to_string(),
            player_extra_args: Vec::new(),
        }
    }
}

impl PlayerSettings {
    /// `<resolver> -g -f <format> <channel>`
    pub fn resolver_command(&self) -> CommandSpec {
        CommandSpec::new(&self.resolver_program)
            .arg("-g")
            .arg("-f")
            .arg(&self.format_selector)
            .arg(&self.channel_url)
    }

    /// `<player> <fixed flags> <extra args> <url>`
    pub fn player_command(&self, stream_url: &str) -> CommandSpec {
        CommandSpec::new(&self.player_program)
            .args(PLAYER_FIXED_FLAGS)
            .args(self.player_extra_args.iter().cloned())
            .arg(stream_url)
    }
}

struct FetchOperation {
    id: u64,
    cancel: CancellationToken,
}

struct ActiveProcess {
    id: ProcessId,
    kill: CancellationToken,
}

#[derive(Default)]
struct PlayerState {
    cached_stream_url: Option<String>,
    fetch: Option<FetchOperation>,
    active: Option<ActiveProcess>,
    next_fetch_id: u64,
    next_process_id: ProcessId,
    destroyed: bool,
}

impl PlayerState {
    fn stop_active(&mut self) {
        if let Some(active) = self.active.take() {
            info!(process = active.id, "Stopping player");
            active.kill.cancel();
        }
    }

    fn cancel_fetch(&mut self) {
        if let Some(fetch) = self.fetch.take() {
            debug!(fetch = fetch.id, "Cancelling stream fetch");
            fetch.cancel.cancel();
        }
    }
}

fn lock_state(state: &Mutex<PlayerState>) -> MutexGuard<'_, PlayerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns the resolver run, the resolved-URL cache and the player process.
pub struct StreamPlayer {
    settings: PlayerSettings,
    runner: Arc<dyn ProcessRunner>,
    state: Arc<Mutex<PlayerState>>,
    events: PlayerEventBus,
}

impl StreamPlayer {
    pub fn new(settings: PlayerSettings, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            settings,
            runner,
            state: Arc::new(Mutex::new(PlayerState::default())),
            events: PlayerEventBus::new(),
        }
    }

    /// Player running the real external tools.
    pub fn with_system_processes(settings: PlayerSettings) -> Self {
        Self::new(settings, Arc::new(TokioProcessRunner))
    }

    fn lock(&self) -> MutexGuard<'_, PlayerState> {
        lock_state(&self.state)
    }

    pub fn settings(&self) -> &PlayerSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn cached_stream_url(&self) -> Option<String> {
        self.lock().cached_stream_url.clone()
    }

    /// Forgets the cached URL so the next resolution runs the resolver.
    pub fn invalidate_cache(&self) {
        self.lock().cached_stream_url = None;
    }

    /// Returns a playable URL for the channel.
    ///
    /// Without `force_refresh` a cached URL is returned as is. Otherwise any
    /// in-flight resolution is cancelled and the resolver runs again. A
    /// resolution that gets cancelled returns [`Error::FetchCancelled`] and
    /// never touches the cache.
    pub async fn resolve_stream_url(&self, force_refresh: bool) -> Result<String> {
        let (fetch_id, cancel) = {
            let mut state = self.lock();
            if state.destroyed {
                return Err(Error::Destroyed);
            }

            if !force_refresh {
                if let Some(url) = &state.cached_stream_url {
                    debug!("Using cached stream URL");
                    return Ok(url.clone());
                }
            }

            state.cancel_fetch();
            state.next_fetch_id += 1;
            let fetch = FetchOperation {
                id: state.next_fetch_id,
                cancel: CancellationToken::new(),
            };
            let handle = (fetch.id, fetch.cancel.clone());
            state.fetch = Some(fetch);
            handle
        };

        let command = self.settings.resolver_command();
        info!(fetch = fetch_id, channel = %self.settings.channel_url, "Resolving stream URL");
        let result = self.runner.run_captured(&command, cancel.clone()).await;

        let mut state = self.lock();
        if state.fetch.as_ref().is_some_and(|fetch| fetch.id == fetch_id) {
            state.fetch = None;
        }

        if cancel.is_cancelled() {
            debug!(fetch = fetch_id, "Stream fetch cancelled");
            return Err(Error::FetchCancelled);
        }

        let output = result.map_err(Error::ResolverSpawn)?;
        let url = parse_resolver_output(&output)?;

        state.cached_stream_url = Some(url.clone());
        info!(fetch = fetch_id, "Stream URL cached");
        Ok(url)
    }

    /// Starts the media player against `stream_url`.
    ///
    /// Any running player is stopped first. Emits
    /// [`PlayerEvent::PlaybackStarted`] once the process is spawned.
    pub fn launch_player(&self, stream_url: &str) -> Result<ProcessId> {
        let command = self.settings.player_command(stream_url);

        let mut state = self.lock();
        if state.destroyed {
            return Err(Error::Destroyed);
        }
        state.stop_active();

        let child = match self.runner.spawn(&command) {
            Ok(child) => child,
            Err(source) => {
                state.active = None;
                error!(program = %self.settings.player_program, "Cannot launch player: {source}");
                return Err(Error::LaunchFailed {
                    program: self.settings.player_program.clone(),
                    source,
                });
            }
        };

        state.next_process_id += 1;
        let id = state.next_process_id;
        let kill = CancellationToken::new();
        state.active = Some(ActiveProcess {
            id,
            kill: kill.clone(),
        });
        info!(process = id, pid = ?child.pid(), "Player started");

        // Started goes out before the watcher exists so it always precedes Stopped
        self.events.broadcast(PlayerEvent::PlaybackStarted { process: id });
        drop(state);

        self.spawn_exit_watcher(id, child, kill);
        Ok(id)
    }

    fn spawn_exit_watcher(
        &self,
        id: ProcessId,
        mut child: Box<dyn ChildProcess>,
        kill: CancellationToken,
    ) {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();

        tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill.cancelled() => None,
            };

            let outcome = match exited {
                Some(status) => status,
                None => {
                    if let Err(err) = child.start_kill() {
                        debug!(process = id, "Kill signal failed: {err}");
                    }
                    child.wait().await
                }
            }
            .unwrap_or_else(|err| {
                warn!(process = id, "Cannot collect player exit status: {err}");
                ExitOutcome::Killed
            });

            let superseded = {
                let mut state = lock_state(&state);
                if state.active.as_ref().is_some_and(|active| active.id == id) {
                    state.active = None;
                    if outcome.is_abnormal() {
                        warn!(process = id, %outcome, "Player exited abnormally, clearing cached stream URL");
                        state.cached_stream_url = None;
                    } else {
                        info!(process = id, %outcome, "Player exited");
                    }
                    false
                } else {
                    debug!(process = id, %outcome, "Stopped player reaped");
                    true
                }
            };

            events.broadcast(PlayerEvent::PlaybackStopped {
                process: id,
                outcome,
                superseded,
            });
        });
    }

    /// Stops the running player, if any.
    ///
    /// The process is forgotten immediately; the kill and the reaping happen
    /// in its exit watcher.
    pub fn stop_player(&self) {
        self.lock().stop_active();
    }

    pub fn is_playing(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Id of the tracked player process.
    pub fn current_process(&self) -> Option<ProcessId> {
        self.lock().active.as_ref().map(|active| active.id)
    }

    /// Cancels the in-flight resolution, if any.
    pub fn cancel_fetch(&self) {
        self.lock().cancel_fetch();
    }

    pub fn is_fetching(&self) -> bool {
        self.lock().fetch.is_some()
    }

    /// Stops the player and cancels any resolution. Later calls fail with
    /// [`Error::Destroyed`].
    pub fn destroy(&self) {
        let mut state = self.lock();
        if state.destroyed {
            return;
        }
        state.destroyed = true;
        state.stop_active();
        state.cancel_fetch();
        drop(state);

        self.events.close();
    }
}

impl Drop for StreamPlayer {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Extracts the stream URL from the resolver output.
fn parse_resolver_output(output: &CapturedOutput) -> Result<String> {
    let stderr = output.stderr.trim();

    if !output.success {
        return Err(Error::resolution(if stderr.is_empty() {
            match output.code {
                Some(code) => format!("resolver exited with status {code}"),
                None => "resolver was killed".to_string(),
            }
        } else {
            stderr.to_string()
        }));
    }

    let Some(line) = output
        .stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
    else {
        return Err(Error::resolution(if stderr.is_empty() {
            "Failed to get stream URL"
        } else {
            stderr
        }));
    };

    Url::parse(line).map_err(|err| Error::resolution(format!("invalid stream URL '{line}': {err}")))?;
    Ok(line.to_string())
}
