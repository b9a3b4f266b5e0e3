//! Event fan-out between the player, the controller and the front-end.
//!
//! The [`StreamPlayer`](crate::StreamPlayer) publishes [`PlayerEvent`]s that the
//! controller consumes; the controller publishes every [`PlaybackState`] change.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::controller::PlaybackState;
use crate::process::{ExitOutcome, ProcessId};

/// Lifecycle events emitted by the [`StreamPlayer`](crate::StreamPlayer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// A player process was spawned.
    PlaybackStarted { process: ProcessId },
    /// A player process exited. Sent exactly once per spawned process.
    ///
    /// `superseded` is true when the process was no longer the tracked one at
    /// exit time, i.e. it was stopped on purpose or replaced by a newer launch.
    PlaybackStopped {
        process: ProcessId,
        outcome: ExitOutcome,
        superseded: bool,
    },
}

/// Fan-out of events to any number of subscribers.
///
/// Closed receivers are pruned on the next broadcast.
pub struct EventBus<E> {
    subscribers: Arc<Mutex<Vec<UnboundedSender<E>>>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<E> {
        let (tx, rx) = unbounded_channel::<E>();
        {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            subscribers.push(tx);
        }
        rx
    }

    pub fn broadcast(&self, event: E) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Drops every subscriber; their receivers observe the end of the stream.
    pub fn close(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

pub type PlayerEventBus = EventBus<PlayerEvent>;
pub type StateEventBus = EventBus<PlaybackState>;
