//! Live stream player supervision for PMOLive
//!
//! This crate keeps a live audio stream playing through two external tools:
//! a resolver (yt-dlp) that turns a channel page into a playable URL, and a
//! media player (mpv) that plays it.
//!
//! # Features
//!
//! - **Resolution cache**: the resolved URL is reused until the player exits
//!   abnormally
//! - **Cancellation**: superseded resolutions are killed and never touch the
//!   cache
//! - **State machine**: Stopped / Loading / Playing / Error, with stale
//!   continuations discarded through a request token
//! - **Retries**: unexpected player exits are retried with a linear backoff
//! - **Configuration Extension**: `stream.*` settings on `pmoconfig::Config`
//!
//! # Example
//!
//! ```no_run
//! use pmoconfig::get_config;
//! use pmolive::{PlaybackController, PlaybackState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = PlaybackController::from_config(&get_config())?;
//!     let mut states = controller.subscribe();
//!
//!     controller.play();
//!     while let Some(state) = states.recv().await {
//!         println!("now {state}");
//!         if state == PlaybackState::Error {
//!             break;
//!         }
//!     }
//!
//!     controller.destroy();
//!     Ok(())
//! }
//! ```

pub mod config_ext;
pub mod controller;
pub mod error;
pub mod events;
pub mod player;
pub mod process;
pub mod retry;
pub mod status;

// Re-exports
pub use config_ext::LiveConfigExt;
pub use controller::{ControllerStatus, PlaybackController, PlaybackState};
pub use error::{Error, Result};
pub use events::{EventBus, PlayerEvent};
pub use player::{PlayerSettings, StreamPlayer};
pub use process::{
    CapturedOutput, ChildProcess, CommandSpec, ExitOutcome, ProcessId, ProcessRunner,
    TokioProcessRunner,
};
pub use retry::RetryPolicy;
pub use status::StatusMessage;
