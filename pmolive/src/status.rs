//! Human readable status for each playback state.
//!
//! Front-ends show `StatusMessage::text` in a banner next to the indicator.
//! Persistent messages stay until the next state change; the others are
//! hidden after `duration`.

use std::time::Duration;

use crate::controller::PlaybackState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub text: &'static str,
    pub duration: Duration,
    pub persistent: bool,
}

impl StatusMessage {
    pub fn for_state(state: PlaybackState) -> Self {
        match state {
            PlaybackState::Loading => Self::persistent("Loading..."),
            PlaybackState::Playing => Self::persistent("Playing"),
            PlaybackState::Stopped => Self::transient("Stopped", 2),
            PlaybackState::Error => Self {
                persistent: true,
                ..Self::transient("Connection error", 3)
            },
        }
    }

    fn persistent(text: &'static str) -> Self {
        Self {
            text,
            duration: Duration::from_secs(2),
            persistent: true,
        }
    }

    fn transient(text: &'static str, secs: u64) -> Self {
        Self {
            text,
            duration: Duration::from_secs(secs),
            persistent: false,
        }
    }
}

/// Menu line describing the state.
pub fn status_label(state: PlaybackState) -> &'static str {
    match state {
        PlaybackState::Stopped => "Status: Stopped",
        PlaybackState::Loading => "Status: Loading...",
        PlaybackState::Playing => "Status: ♫ Playing",
        PlaybackState::Error => "Status: Error",
    }
}

/// Label of the play/stop action offered in this state.
pub fn action_label(state: PlaybackState) -> &'static str {
    match state {
        PlaybackState::Stopped => "▶ Play",
        PlaybackState::Loading | PlaybackState::Playing => "⏸ Stop",
        PlaybackState::Error => "▶ Retry",
    }
}
