// Engine capability driven by the controller
//
// The engine owns decoding, output and noise suppression for one loaded
// resource. The controller only issues the fixed command set below and
// listens for the signals the engine raises through `EngineEvents`.

use crate::error::Result;
use crate::source::MediaSource;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Noise suppression aggressiveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuppressionLevel {
    #[default]
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl SuppressionLevel {
    /// 1..=3 map to Moderate..VeryHigh; anything else is Low.
    pub fn from_ordinal(ordinal: Option<i64>) -> Self {
        match ordinal {
            Some(1) => SuppressionLevel::Moderate,
            Some(2) => SuppressionLevel::High,
            Some(3) => SuppressionLevel::VeryHigh,
            _ => SuppressionLevel::Low,
        }
    }

    pub fn ordinal(self) -> i32 {
        match self {
            SuppressionLevel::Low => 0,
            SuppressionLevel::Moderate => 1,
            SuppressionLevel::High => 2,
            SuppressionLevel::VeryHigh => 3,
        }
    }
}

/// Engine-level options passed through with the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineOptions {
    /// Let the engine reconfigure the shared audio session
    pub override_audio_session: bool,
}

/// Engine's own view of its transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Ready,
    Playing,
    Paused,
    Stopped,
}

/// Engine capability
///
/// Times are in the engine's native unit: fractional seconds.
/// Commands must return promptly; the engine does its work asynchronously.
pub trait Engine: Send {
    /// Bind a resource; replaces any previous one
    fn set_source(&mut self, source: &MediaSource, options: EngineOptions) -> Result<()>;

    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    /// Stop and rewind to the start
    fn stop(&mut self) -> Result<()>;

    fn seek(&mut self, seconds: f64) -> Result<()>;

    fn set_playback_rate(&mut self, rate: f32) -> Result<()>;

    fn set_suppression_level(&mut self, level: SuppressionLevel);

    fn current_time(&self) -> f64;

    fn duration(&self) -> f64;
}

/// Creates one engine per attach
pub trait EngineFactory: Send + Sync {
    fn create(&self, player_key: &str, events: EngineEvents) -> Result<Box<dyn Engine>>;
}

/// Signals raised by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Reached end of media
    Finished,
    /// Engine's own progress callback
    Progress { current: f64, duration: f64 },
    StateChanged(EngineState),
}

/// Engine event stamped with the binding epoch it was raised under
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSignal {
    pub epoch: u64,
    pub event: EngineEvent,
}

/// Receives engine signals; must hand them to the controller's context
pub trait EngineListener: Send + Sync {
    fn on_engine_signal(&self, signal: EngineSignal);
}

/// Sink handed to the engine for raising events
#[derive(Clone)]
pub struct EngineEvents {
    epoch: Arc<AtomicU64>,
    listener: Arc<dyn EngineListener>,
}

impl EngineEvents {
    pub fn new(listener: Arc<dyn EngineListener>) -> Self {
        Self {
            epoch: Arc::new(AtomicU64::new(0)),
            listener,
        }
    }

    pub fn finished(&self) {
        self.emit(EngineEvent::Finished);
    }

    pub fn progress(&self, current: f64, duration: f64) {
        self.emit(EngineEvent::Progress { current, duration });
    }

    pub fn state_changed(&self, state: EngineState) {
        self.emit(EngineEvent::StateChanged(state));
    }

    pub fn emit(&self, event: EngineEvent) {
        let signal = EngineSignal {
            epoch: self.epoch(),
            event,
        };
        self.listener.on_engine_signal(signal);
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Invalidate every signal raised so far.
    pub(crate) fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl std::fmt::Debug for EngineEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineEvents")
            .field("epoch", &self.epoch())
            .finish()
    }
}

/// Scripted engine and signal collector for tests
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use crate::error::PlayerError;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        SetSource(MediaSource, EngineOptions),
        Play,
        Pause,
        Stop,
        Seek(f64),
        Rate(f32),
        Level(SuppressionLevel),
    }

    /// State shared between a test and the engine it scripts
    #[derive(Default)]
    pub struct Script {
        pub calls: Vec<Call>,
        pub current: f64,
        pub duration: f64,
        pub fail_source: bool,
        pub fail_play: bool,
        pub fail_pause: bool,
        pub fail_stop: bool,
        pub fail_seek: bool,
        /// Accept seeks without moving the position, like an engine that
        /// applies them later.
        pub seek_lags: bool,
        pub reject_rate: bool,
        pub events: Option<EngineEvents>,
        pub created: usize,
        pub dropped: usize,
    }

    pub type SharedScript = Arc<Mutex<Script>>;

    pub struct MockEngine {
        script: SharedScript,
    }

    impl Engine for MockEngine {
        fn set_source(&mut self, source: &MediaSource, options: EngineOptions) -> Result<()> {
            let mut script = self.script.lock();
            if script.fail_source {
                return Err(PlayerError::Engine(format!("cannot open {}", source)));
            }
            script.calls.push(Call::SetSource(source.clone(), options));
            Ok(())
        }

        fn play(&mut self) -> Result<()> {
            let mut script = self.script.lock();
            if script.fail_play {
                return Err(PlayerError::Engine("play refused".into()));
            }
            script.calls.push(Call::Play);
            Ok(())
        }

        fn pause(&mut self) -> Result<()> {
            let mut script = self.script.lock();
            if script.fail_pause {
                return Err(PlayerError::Engine("pause refused".into()));
            }
            script.calls.push(Call::Pause);
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            let mut script = self.script.lock();
            if script.fail_stop {
                return Err(PlayerError::Engine("stop refused".into()));
            }
            script.calls.push(Call::Stop);
            script.current = 0.0;
            Ok(())
        }

        fn seek(&mut self, seconds: f64) -> Result<()> {
            let mut script = self.script.lock();
            if script.fail_seek {
                return Err(PlayerError::Engine("seek refused".into()));
            }
            script.calls.push(Call::Seek(seconds));
            if !script.seek_lags {
                script.current = seconds;
            }
            Ok(())
        }

        fn set_playback_rate(&mut self, rate: f32) -> Result<()> {
            let mut script = self.script.lock();
            if script.reject_rate {
                return Err(PlayerError::EngineRejected(format!("rate {} unsupported", rate)));
            }
            script.calls.push(Call::Rate(rate));
            Ok(())
        }

        fn set_suppression_level(&mut self, level: SuppressionLevel) {
            self.script.lock().calls.push(Call::Level(level));
        }

        fn current_time(&self) -> f64 {
            self.script.lock().current
        }

        fn duration(&self) -> f64 {
            self.script.lock().duration
        }
    }

    impl Drop for MockEngine {
        fn drop(&mut self) {
            self.script.lock().dropped += 1;
        }
    }

    pub struct MockFactory {
        pub script: SharedScript,
    }

    impl MockFactory {
        pub fn new() -> (Arc<Self>, SharedScript) {
            let script: SharedScript = Arc::new(Mutex::new(Script {
                duration: 10.0,
                ..Script::default()
            }));
            (
                Arc::new(Self {
                    script: script.clone(),
                }),
                script,
            )
        }
    }

    impl EngineFactory for MockFactory {
        fn create(&self, _player_key: &str, events: EngineEvents) -> Result<Box<dyn Engine>> {
            let mut script = self.script.lock();
            script.created += 1;
            script.events = Some(events);
            Ok(Box::new(MockEngine {
                script: self.script.clone(),
            }))
        }
    }

    /// Collects signals so tests can replay them into the controller
    #[derive(Default)]
    pub struct SignalQueue {
        pub signals: Mutex<Vec<EngineSignal>>,
    }

    impl SignalQueue {
        pub fn drain(&self) -> Vec<EngineSignal> {
            std::mem::take(&mut *self.signals.lock())
        }
    }

    impl EngineListener for SignalQueue {
        fn on_engine_signal(&self, signal: EngineSignal) {
            self.signals.lock().push(signal);
        }
    }
}
