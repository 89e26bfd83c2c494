// Playback state machine types

use crate::error::{PlayerError, Result};
use serde::Serialize;

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No engine attached yet
    Uninitialized,
    /// Media bound to the engine, position at start
    Ready,
    /// Audio is currently playing
    Playing,
    /// Audio is paused
    Paused,
    /// Engine detached; only `prepare` brings the controller back
    Released,
}

impl PlaybackState {
    /// Whether an engine is expected to be attached in this state.
    pub fn has_media(self) -> bool {
        matches!(
            self,
            PlaybackState::Ready | PlaybackState::Playing | PlaybackState::Paused
        )
    }

    pub fn validate_transition(self, to: PlaybackState) -> Result<()> {
        use PlaybackState::*;

        match (self, to) {
            // prepare, including re-prepare after release
            (Uninitialized, Ready) | (Released, Ready) => Ok(()),
            (Ready, Ready) | (Playing, Ready) | (Paused, Ready) => Ok(()),

            (Ready, Playing) | (Paused, Playing) => Ok(()),
            (Playing, Paused) => Ok(()),

            // release, or StopAndRelease at end of media
            (Ready, Released) | (Playing, Released) | (Paused, Released) => Ok(()),

            (from, to) if from == to => Ok(()),
            (Uninitialized, _) | (Released, _) => Err(PlayerError::NotPrepared(format!(
                "cannot move from {:?} to {:?}",
                self, to
            ))),
            _ => Err(PlayerError::InvalidArgument(format!(
                "invalid state transition from {:?} to {:?}",
                self, to
            ))),
        }
    }
}

/// What happens when the engine reaches end of media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinishMode {
    /// Seek to start and keep playing
    Loop,
    /// Pause at the end
    PauseAtEnd,
    /// Stop and detach the engine
    #[default]
    StopAndRelease,
}

impl FinishMode {
    /// Caller ordinal: 0 loops, 1 pauses, anything else (including null) stops.
    pub fn from_ordinal(ordinal: Option<i64>) -> Self {
        match ordinal {
            Some(0) => FinishMode::Loop,
            Some(1) => FinishMode::PauseAtEnd,
            _ => FinishMode::StopAndRelease,
        }
    }

    pub fn finish_type(self) -> FinishType {
        match self {
            FinishMode::Loop => FinishType::Loop,
            FinishMode::PauseAtEnd => FinishType::Pause,
            FinishMode::StopAndRelease => FinishType::Stop,
        }
    }
}

/// Code carried by the finished event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "i32")]
pub enum FinishType {
    Loop = 0,
    Pause = 1,
    Stop = 2,
}

impl FinishType {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<FinishType> for i32 {
    fn from(value: FinishType) -> Self {
        value.code()
    }
}

/// Which clock `get_duration` reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationKind {
    Current,
    Total,
}

impl DurationKind {
    /// 0 is the current position, anything else the total length.
    pub fn from_ordinal(ordinal: i64) -> Self {
        if ordinal == 0 {
            DurationKind::Current
        } else {
            DurationKind::Total
        }
    }
}
