//! Scripted process runner shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pmolive::{
    CapturedOutput, ChildProcess, CommandSpec, ExitOutcome, PlaybackController, PlaybackState,
    PlayerSettings, ProcessRunner, RetryPolicy, StreamPlayer,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub const STREAM_URL: &str = "https://stream.example/live.m3u8";

enum Resolution {
    Output(CapturedOutput),
    SpawnError,
    Gated(oneshot::Receiver<CapturedOutput>, Arc<Mutex<Option<CancellationToken>>>),
}

#[derive(Clone, Copy)]
pub enum SpawnPlan {
    /// Runs until told to exit or killed.
    Run,
    /// Exits as soon as it is waited on.
    ExitImmediately(ExitOutcome),
    /// Fails to spawn.
    Fail,
}

/// Holds back a resolver run until released.
pub struct ResolverGate {
    tx: Option<oneshot::Sender<CapturedOutput>>,
    cancel: Arc<Mutex<Option<CancellationToken>>>,
}

impl ResolverGate {
    pub fn release(mut self, stdout: &str) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(success(stdout));
        }
    }

    /// True once the player cancelled the run behind this gate.
    pub fn was_cancelled(&self) -> bool {
        self.cancel
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }
}

pub fn success(stdout: &str) -> CapturedOutput {
    CapturedOutput {
        success: true,
        code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn failure(code: i32, stderr: &str) -> CapturedOutput {
    CapturedOutput {
        success: false,
        code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

struct ChildRecord {
    exit: Option<oneshot::Sender<ExitOutcome>>,
    killed: Arc<AtomicBool>,
}

#[derive(Default)]
struct Script {
    resolutions: VecDeque<Resolution>,
    spawn_plans: VecDeque<SpawnPlan>,
    default_spawn: Option<SpawnPlan>,
    resolver_calls: Vec<CommandSpec>,
    spawned: Vec<CommandSpec>,
    children: Vec<ChildRecord>,
}

/// [`ProcessRunner`] whose resolver results and player lifetimes are
/// scripted by the test.
///
/// Unscripted resolver runs print [`STREAM_URL`]; unscripted spawns run until
/// told to exit.
#[derive(Default)]
pub struct ScriptedRunner {
    script: Mutex<Script>,
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_output(&self, output: CapturedOutput) {
        self.script
            .lock()
            .unwrap()
            .resolutions
            .push_back(Resolution::Output(output));
    }

    pub fn push_url(&self, stdout: &str) {
        self.push_output(success(stdout));
    }

    pub fn push_resolver_missing(&self) {
        self.script
            .lock()
            .unwrap()
            .resolutions
            .push_back(Resolution::SpawnError);
    }

    pub fn push_gated(&self) -> ResolverGate {
        let (tx, rx) = oneshot::channel();
        let cancel = Arc::new(Mutex::new(None));
        self.script
            .lock()
            .unwrap()
            .resolutions
            .push_back(Resolution::Gated(rx, Arc::clone(&cancel)));
        ResolverGate {
            tx: Some(tx),
            cancel,
        }
    }

    pub fn push_spawn(&self, plan: SpawnPlan) {
        self.script.lock().unwrap().spawn_plans.push_back(plan);
    }

    pub fn set_default_spawn(&self, plan: SpawnPlan) {
        self.script.lock().unwrap().default_spawn = Some(plan);
    }

    pub fn resolver_calls(&self) -> usize {
        self.script.lock().unwrap().resolver_calls.len()
    }

    pub fn last_resolver_command(&self) -> Option<CommandSpec> {
        self.script.lock().unwrap().resolver_calls.last().cloned()
    }

    pub fn spawn_count(&self) -> usize {
        self.script.lock().unwrap().spawned.len()
    }

    pub fn spawned(&self) -> Vec<CommandSpec> {
        self.script.lock().unwrap().spawned.clone()
    }

    /// Makes the `index`-th spawned player exit with `outcome`.
    pub fn exit_child(&self, index: usize, outcome: ExitOutcome) {
        let mut script = self.script.lock().unwrap();
        let sender = script.children[index]
            .exit
            .take()
            .expect("child already exited");
        let _ = sender.send(outcome);
    }

    pub fn was_killed(&self, index: usize) -> bool {
        self.script.lock().unwrap().children[index]
            .killed
            .load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run_captured(
        &self,
        command: &CommandSpec,
        cancel: CancellationToken,
    ) -> io::Result<CapturedOutput> {
        let resolution = {
            let mut script = self.script.lock().unwrap();
            script.resolver_calls.push(command.clone());
            script.resolutions.pop_front()
        };

        match resolution {
            None => Ok(success(&format!("{STREAM_URL}\n"))),
            Some(Resolution::Output(output)) => Ok(output),
            Some(Resolution::SpawnError) => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "No such file or directory",
            )),
            // Completes only when the gate opens, even after cancellation
            Some(Resolution::Gated(rx, slot)) => {
                *slot.lock().unwrap() = Some(cancel);
                rx.await
                    .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "gate dropped"))
            }
        }
    }

    fn spawn(&self, command: &CommandSpec) -> io::Result<Box<dyn ChildProcess>> {
        let mut script = self.script.lock().unwrap();
        let plan = script
            .spawn_plans
            .pop_front()
            .or(script.default_spawn)
            .unwrap_or(SpawnPlan::Run);

        if let SpawnPlan::Fail = plan {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "No such file or directory",
            ));
        }

        script.spawned.push(command.clone());
        let (tx, rx) = oneshot::channel();
        let killed = Arc::new(AtomicBool::new(false));
        let pid = 1000 + script.children.len() as u32;
        script.children.push(ChildRecord {
            exit: Some(tx),
            killed: Arc::clone(&killed),
        });

        Ok(Box::new(FakeChild {
            pid,
            immediate: match plan {
                SpawnPlan::ExitImmediately(outcome) => Some(outcome),
                _ => None,
            },
            exit: rx,
            killed,
        }))
    }
}

struct FakeChild {
    pid: u32,
    immediate: Option<ExitOutcome>,
    exit: oneshot::Receiver<ExitOutcome>,
    killed: Arc<AtomicBool>,
}

#[async_trait]
impl ChildProcess for FakeChild {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn wait(&mut self) -> io::Result<ExitOutcome> {
        if self.killed.load(Ordering::SeqCst) {
            return Ok(ExitOutcome::Killed);
        }
        if let Some(outcome) = self.immediate {
            return Ok(outcome);
        }
        Ok((&mut self.exit).await.unwrap_or(ExitOutcome::Killed))
    }
}

/// Routes `tracing` output to the test harness; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn player_with(runner: &Arc<ScriptedRunner>) -> StreamPlayer {
    init_tracing();
    StreamPlayer::new(PlayerSettings::default(), Arc::clone(runner) as Arc<dyn ProcessRunner>)
}

pub fn controller_with(runner: &Arc<ScriptedRunner>) -> PlaybackController {
    PlaybackController::new(player_with(runner), RetryPolicy::default())
}

/// Lets spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

pub async fn next_state(states: &mut UnboundedReceiver<PlaybackState>) -> PlaybackState {
    tokio::time::timeout(Duration::from_secs(600), states.recv())
        .await
        .expect("no state change")
        .expect("state stream closed")
}

/// Consumes state changes until `wanted` shows up.
pub async fn wait_for(states: &mut UnboundedReceiver<PlaybackState>, wanted: PlaybackState) {
    while next_state(states).await != wanted {}
}
