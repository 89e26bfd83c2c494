// Core playback controller for a noise-suppressing audio engine

pub mod callback;
pub mod commands;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod runtime;
pub mod source;
pub mod state;
pub mod timer;

// Re-export commonly used types
pub use callback::{Notifier, NotifyError, NullNotifier, PlayerEvent};
pub use commands::{dispatch, Command, Reply};
pub use config::{PlayerConfig, PrepareOptions};
pub use controller::PlaybackController;
pub use engine::{
    Engine, EngineEvent, EngineEvents, EngineFactory, EngineListener, EngineOptions,
    EngineSignal, EngineState, SuppressionLevel,
};
pub use error::{ErrorReport, PlayerError, Result};
pub use runtime::PlayerRuntime;
pub use source::MediaSource;
pub use state::{DurationKind, FinishMode, FinishType, PlaybackState};
