// Events delivered to the caller and the notifier they travel through

use crate::state::FinishType;
use serde::Serialize;
use std::sync::Arc;

pub const ON_CURRENT_DURATION: &str = "onCurrentDuration";
pub const ON_DID_FINISH_PLAYING_AUDIO: &str = "onDidFinishPlayingAudio";

/// Player event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PlayerEvent {
    /// Position report, on every tick and on pause/stop/seek
    CurrentDuration {
        #[serde(rename = "current")]
        current_ms: i64,
        #[serde(rename = "playerKey")]
        player_key: String,
    },

    /// Natural end of media, once per occurrence
    DidFinishPlayingAudio {
        #[serde(rename = "finishType")]
        finish_type: FinishType,
        #[serde(rename = "playerKey")]
        player_key: String,
    },
}

impl PlayerEvent {
    /// Method name the caller listens on
    pub fn method(&self) -> &'static str {
        match self {
            PlayerEvent::CurrentDuration { .. } => ON_CURRENT_DURATION,
            PlayerEvent::DidFinishPlayingAudio { .. } => ON_DID_FINISH_PLAYING_AUDIO,
        }
    }

    pub fn player_key(&self) -> &str {
        match self {
            PlayerEvent::CurrentDuration { player_key, .. }
            | PlayerEvent::DidFinishPlayingAudio { player_key, .. } => player_key,
        }
    }

    /// Payload as the caller's method channel expects it
    pub fn payload_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Delivery failure reported by a notifier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("event delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Sink for caller-facing events, shared by every controller in the process
/// Implementations should be lightweight and non-blocking
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &PlayerEvent) -> Result<(), NotifyError>;
}

/// Notifier that drops every event
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: &PlayerEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Deliver an event; failures never reach the state machine.
pub(crate) fn deliver(notifier: &Arc<dyn Notifier>, event: PlayerEvent) {
    log::debug!("[{}] {} {}", event.player_key(), event.method(), event.payload_json());
    if let Err(err) = notifier.notify(&event) {
        log::warn!("[{}] dropped {}: {}", event.player_key(), event.method(), err);
    }
}

/// Simple notifier implementation for testing
#[cfg(test)]
pub(crate) struct TestNotifier {
    events: parking_lot::Mutex<Vec<PlayerEvent>>,
    fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl TestNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: parking_lot::Mutex::new(Vec::new()),
            fail: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn get_events(&self) -> Vec<PlayerEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn positions(&self) -> Vec<i64> {
        self.get_events()
            .into_iter()
            .filter_map(|event| match event {
                PlayerEvent::CurrentDuration { current_ms, .. } => Some(current_ms),
                _ => None,
            })
            .collect()
    }

    pub fn finishes(&self) -> Vec<FinishType> {
        self.get_events()
            .into_iter()
            .filter_map(|event| match event {
                PlayerEvent::DidFinishPlayingAudio { finish_type, .. } => Some(finish_type),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
impl Notifier for TestNotifier {
    fn notify(&self, event: &PlayerEvent) -> Result<(), NotifyError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(NotifyError("channel closed".into()));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}
