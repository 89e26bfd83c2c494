// Caller-facing command surface

use crate::config::PrepareOptions;
use crate::controller::PlaybackController;
use crate::engine::EngineOptions;
use crate::error::{PlayerError, Result};
use crate::state::{DurationKind, FinishMode};

/// One call from the host, arguments as loosely typed as the host sends them
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Prepare {
        source: Option<String>,
        volume: Option<f64>,
        report_interval_ms: Option<i64>,
        override_audio_session: bool,
    },
    Play,
    Pause,
    Stop,
    Release,
    GetDuration(DurationKind),
    SetVolume(Option<f64>),
    SetSuppressionLevel(Option<i64>),
    SetPlaybackRate(Option<f64>),
    Seek(Option<i64>),
    SetFinishMode(Option<i64>),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Prepare { .. } => "prepare",
            Command::Play => "play",
            Command::Pause => "pause",
            Command::Stop => "stop",
            Command::Release => "release",
            Command::GetDuration(_) => "getDuration",
            Command::SetVolume(_) => "setVolume",
            Command::SetSuppressionLevel(_) => "setSuppressionLevel",
            Command::SetPlaybackRate(_) => "setPlaybackRate",
            Command::Seek(_) => "seek",
            Command::SetFinishMode(_) => "setFinishMode",
        }
    }
}

/// What the host gets back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Bool(bool),
    Int(i64),
    /// Fire-and-forget commands
    Unit,
}

impl Reply {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Reply::Bool(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(self) -> Option<i64> {
        match self {
            Reply::Int(value) => Some(value),
            _ => None,
        }
    }
}

/// Run one command against a controller.
///
/// A null seek target is answered with `false` rather than an error.
pub fn dispatch(controller: &mut PlaybackController, command: Command) -> Result<Reply> {
    match command {
        Command::Prepare {
            source,
            volume,
            report_interval_ms,
            override_audio_session,
        } => {
            let options = PrepareOptions {
                volume,
                report_interval_ms,
                engine: EngineOptions {
                    override_audio_session,
                },
            };
            controller.prepare(source.as_deref(), options)?;
            Ok(Reply::Bool(true))
        }
        Command::Play => {
            controller.play()?;
            Ok(Reply::Bool(true))
        }
        Command::Pause => {
            controller.pause()?;
            Ok(Reply::Unit)
        }
        Command::Stop => {
            controller.stop()?;
            Ok(Reply::Unit)
        }
        Command::Release => {
            controller.release()?;
            Ok(Reply::Bool(true))
        }
        Command::GetDuration(kind) => Ok(Reply::Int(controller.get_duration(kind))),
        Command::SetVolume(volume) => {
            controller.set_volume(volume)?;
            Ok(Reply::Bool(true))
        }
        Command::SetSuppressionLevel(level) => {
            controller.set_suppression_level(level)?;
            Ok(Reply::Bool(true))
        }
        Command::SetPlaybackRate(rate) => {
            controller.set_playback_rate(rate)?;
            Ok(Reply::Bool(true))
        }
        Command::Seek(to_millis) => match controller.seek(to_millis) {
            Ok(()) => Ok(Reply::Bool(true)),
            Err(PlayerError::InvalidArgument(msg)) => {
                log::warn!("[{}] seek: {}", controller.player_key(), msg);
                Ok(Reply::Bool(false))
            }
            Err(err) => Err(err),
        },
        Command::SetFinishMode(ordinal) => {
            controller.set_finish_mode(FinishMode::from_ordinal(ordinal));
            Ok(Reply::Unit)
        }
    }
}
