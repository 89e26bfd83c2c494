// Playback controller: state machine, finish policy and position reporting

use crate::callback::{deliver, Notifier, PlayerEvent};
use crate::config::{PlayerConfig, PrepareOptions};
use crate::engine::{
    Engine, EngineEvent, EngineEvents, EngineFactory, EngineListener, EngineSignal,
    SuppressionLevel,
};
use crate::error::{PlayerError, Result};
use crate::source::MediaSource;
use crate::state::{DurationKind, FinishMode, PlaybackState};
use crate::timer::ReportTimer;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Volume above which the suppression level is forced to High.
pub const VOLUME_SUPPRESSION_THRESHOLD: f64 = 100.0;

/// Drives one engine for one player key.
///
/// Every method must be called from a single serialized context (see
/// [`crate::runtime::PlayerRuntime`]); timer polls and engine signals are
/// delivered on that same context, so no locking is needed here.
pub struct PlaybackController {
    player_key: String,
    state: PlaybackState,
    engine: Option<Box<dyn Engine>>,
    source: Option<MediaSource>,
    finish_mode: FinishMode,
    report_interval: Duration,
    report_timer: Option<ReportTimer>,
    /// Settings remembered across engine attachments
    suppression_level: Option<SuppressionLevel>,
    playback_rate: Option<f32>,
    last_finish: Option<Instant>,
    /// A loop restart was issued and the position has not left the end yet
    restart_pending: bool,
    factory: Arc<dyn EngineFactory>,
    notifier: Arc<dyn Notifier>,
    events: EngineEvents,
}

impl PlaybackController {
    pub fn new(
        player_key: impl Into<String>,
        config: &PlayerConfig,
        factory: Arc<dyn EngineFactory>,
        notifier: Arc<dyn Notifier>,
        listener: Arc<dyn EngineListener>,
    ) -> Self {
        let player_key = player_key.into();
        log::info!("[{}] controller created", player_key);
        Self {
            player_key,
            state: PlaybackState::Uninitialized,
            engine: None,
            source: None,
            finish_mode: config.finish_mode,
            report_interval: config.report_interval,
            report_timer: None,
            suppression_level: None,
            playback_rate: None,
            last_finish: None,
            restart_pending: false,
            factory,
            notifier,
            events: EngineEvents::new(listener),
        }
    }

    pub fn player_key(&self) -> &str {
        &self.player_key
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn source(&self) -> Option<&MediaSource> {
        self.source.as_ref()
    }

    pub fn finish_mode(&self) -> FinishMode {
        self.finish_mode
    }

    pub fn report_interval(&self) -> Duration {
        self.report_interval
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    pub fn is_reporting(&self) -> bool {
        self.report_timer.is_some()
    }

    /// When the runtime should poll [`Self::on_tick`] next.
    pub fn next_report_due(&self) -> Option<Instant> {
        self.report_timer.as_ref().map(ReportTimer::next_due)
    }

    /// Bind `source` to the engine and move to Ready.
    ///
    /// Re-preparing the source that is already bound is a no-op apart from
    /// the option updates. A different source stops current playback first.
    pub fn prepare(&mut self, source: Option<&str>, options: PrepareOptions) -> Result<()> {
        let source = MediaSource::parse(source).map_err(|err| {
            log::warn!("[{}] prepare rejected: {}", self.player_key, err);
            err
        })?;

        if self.state.has_media() && self.source.as_ref() == Some(&source) {
            log::debug!("[{}] {} already prepared", self.player_key, source);
            self.apply_prepare_options(&options);
            return Ok(());
        }

        if matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) {
            self.cancel_reporting(true);
            if let Some(engine) = self.engine.as_mut() {
                if let Err(err) = engine.stop() {
                    log::warn!("[{}] stop before rebind failed: {}", self.player_key, err);
                }
            }
        }

        let fresh = self.engine.is_none();
        let mut engine = match self.engine.take() {
            Some(engine) => engine,
            None => self.factory.create(&self.player_key, self.events.clone())?,
        };

        if let Err(err) = engine.set_source(&source, options.engine) {
            log::error!("[{}] failed to bind {}: {}", self.player_key, source, err);
            if !fresh {
                // The old binding is gone with the failed one.
                self.events.advance_epoch();
                self.source = None;
                self.state = PlaybackState::Uninitialized;
            }
            return Err(err);
        }

        if let Some(level) = self.suppression_level {
            engine.set_suppression_level(level);
        }
        if let Some(rate) = self.playback_rate {
            if let Err(err) = engine.set_playback_rate(rate) {
                log::warn!("[{}] stored rate {} not applied: {}", self.player_key, rate, err);
            }
        }

        self.engine = Some(engine);
        self.events.advance_epoch();
        self.restart_pending = false;
        self.transition(PlaybackState::Ready)?;
        log::info!("[{}] prepared {}", self.player_key, source);
        self.source = Some(source);
        self.apply_prepare_options(&options);
        Ok(())
    }

    /// Start or resume playback; the first position report goes out immediately.
    pub fn play(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Uninitialized | PlaybackState::Released => {
                return Err(self.not_prepared("play"));
            }
            PlaybackState::Playing => {
                log::debug!("[{}] already playing", self.player_key);
                return Ok(());
            }
            PlaybackState::Ready | PlaybackState::Paused => {}
        }

        self.engine_mut("play")?.play()?;
        self.transition(PlaybackState::Playing)?;
        self.start_reporting(Instant::now());
        log::info!("[{}] playing", self.player_key);
        Ok(())
    }

    /// Pause; the caller gets one report for the pause point.
    pub fn pause(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Uninitialized | PlaybackState::Released => {
                return Err(self.not_prepared("pause"));
            }
            PlaybackState::Paused => return Ok(()),
            PlaybackState::Ready => {
                log::debug!("[{}] pause ignored, not playing", self.player_key);
                return Ok(());
            }
            PlaybackState::Playing => {}
        }

        if let Err(err) = self.engine_mut("pause")?.pause() {
            log::error!("[{}] pause failed: {}", self.player_key, err);
            return Err(err);
        }
        self.cancel_reporting(true);
        self.transition(PlaybackState::Paused)?;
        log::info!("[{}] paused", self.player_key);
        Ok(())
    }

    /// Stop and rewind; the final report carries the position before rewinding.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Uninitialized | PlaybackState::Released => {
                return Err(self.not_prepared("stop"));
            }
            PlaybackState::Ready => {
                log::debug!("[{}] stop ignored, already at start", self.player_key);
                return Ok(());
            }
            PlaybackState::Playing | PlaybackState::Paused => {}
        }

        let final_ms = self.get_duration(DurationKind::Current);
        if let Err(err) = self.engine_mut("stop")?.stop() {
            log::error!("[{}] stop failed: {}", self.player_key, err);
            return Err(err);
        }
        self.report_timer = None;
        self.report_at(final_ms);
        self.events.advance_epoch();
        self.restart_pending = false;
        self.transition(PlaybackState::Ready)?;
        log::info!("[{}] stopped", self.player_key);
        Ok(())
    }

    /// Detach and drop the engine. Idempotent.
    pub fn release(&mut self) -> Result<()> {
        self.report_timer = None;
        self.events.advance_epoch();
        self.restart_pending = false;
        if let Some(mut engine) = self.engine.take() {
            if self.state == PlaybackState::Playing {
                if let Err(err) = engine.stop() {
                    log::warn!("[{}] stop on release failed: {}", self.player_key, err);
                }
            }
            log::info!("[{}] released", self.player_key);
        }
        self.source = None;
        self.state = PlaybackState::Released;
        Ok(())
    }

    /// Elapsed or total time in whole milliseconds; 0 without an engine.
    pub fn get_duration(&self, kind: DurationKind) -> i64 {
        match (&self.engine, kind) {
            (None, _) => 0,
            (Some(engine), DurationKind::Current) => seconds_to_millis(engine.current_time()),
            (Some(engine), DurationKind::Total) => seconds_to_millis(engine.duration()),
        }
    }

    /// Pick the noise suppression level from an ordinal; unmapped values mean Low.
    pub fn set_suppression_level(&mut self, ordinal: Option<i64>) -> Result<()> {
        let level = SuppressionLevel::from_ordinal(ordinal);
        self.apply_suppression_level(level);
        Ok(())
    }

    /// Compatibility setter: does not touch gain. A volume above 100 forces
    /// High suppression, anything else leaves the level alone.
    pub fn set_volume(&mut self, volume: Option<f64>) -> Result<()> {
        let volume = volume.unwrap_or(1.0);
        if volume > VOLUME_SUPPRESSION_THRESHOLD {
            log::debug!("[{}] volume {} forces high suppression", self.player_key, volume);
            self.apply_suppression_level(SuppressionLevel::High);
        }
        Ok(())
    }

    /// Forward a playback rate (1.0 when absent) to the engine.
    pub fn set_playback_rate(&mut self, rate: Option<f64>) -> Result<()> {
        let rate = rate.unwrap_or(1.0) as f32;
        if let Some(engine) = self.engine.as_mut() {
            engine.set_playback_rate(rate).map_err(|err| {
                log::warn!("[{}] rate {} rejected: {}", self.player_key, rate, err);
                match err {
                    PlayerError::Engine(msg) => PlayerError::EngineRejected(msg),
                    other => other,
                }
            })?;
        }
        self.playback_rate = Some(rate);
        Ok(())
    }

    /// Seek to a whole second; sub-second precision is discarded.
    pub fn seek(&mut self, to_millis: Option<i64>) -> Result<()> {
        let to_millis = to_millis
            .ok_or_else(|| PlayerError::InvalidArgument("seek target is null".to_string()))?;
        let seconds = millis_to_whole_seconds(to_millis);
        self.engine_mut("seek")?.seek(seconds)?;
        log::debug!("[{}] seek to {}s", self.player_key, seconds);
        self.report_position();
        Ok(())
    }

    /// Takes effect at the next end of media.
    pub fn set_finish_mode(&mut self, mode: FinishMode) {
        if self.finish_mode != mode {
            log::debug!("[{}] finish mode {:?}", self.player_key, mode);
        }
        self.finish_mode = mode;
    }

    /// Poll the report timer. Returns true if a report went out.
    ///
    /// Also catches end of media for engines that never signal it.
    pub fn on_tick(&mut self, now: Instant) -> bool {
        if self.state != PlaybackState::Playing {
            return false;
        }
        let due = match self.report_timer.as_mut() {
            Some(timer) => timer.poll(now),
            None => false,
        };
        if !due {
            return false;
        }

        self.report_position();
        if !self.reached_end() {
            self.restart_pending = false;
        } else if self.restart_pending {
            log::debug!("[{}] loop restart not applied yet", self.player_key);
        } else if self.is_duplicate_finish(now) {
            log::debug!("[{}] end of media already handled", self.player_key);
        } else {
            log::debug!("[{}] end of media seen on tick", self.player_key);
            self.finish(now);
        }
        true
    }

    /// Handle a signal raised by the engine.
    pub fn handle_engine_signal(&mut self, signal: EngineSignal) {
        if signal.epoch != self.events.epoch() {
            log::debug!(
                "[{}] dropping stale {:?} (epoch {} != {})",
                self.player_key,
                signal.event,
                signal.epoch,
                self.events.epoch()
            );
            return;
        }

        match signal.event {
            EngineEvent::Finished => {
                let now = Instant::now();
                if self.is_duplicate_finish(now) {
                    log::debug!("[{}] duplicate finish ignored", self.player_key);
                    return;
                }
                self.finish(now);
            }
            EngineEvent::Progress { current, duration } => {
                log::trace!("[{}] engine progress {}/{}", self.player_key, current, duration);
            }
            EngineEvent::StateChanged(state) => {
                log::debug!("[{}] engine state {:?}", self.player_key, state);
            }
        }
    }

    fn finish(&mut self, now: Instant) {
        if self.state != PlaybackState::Playing || self.engine.is_none() {
            log::debug!("[{}] finish ignored in {:?}", self.player_key, self.state);
            return;
        }

        self.events.advance_epoch();
        self.last_finish = Some(now);
        let mode = self.finish_mode;

        match mode {
            FinishMode::Loop => {
                let restarted = match self.engine.as_mut() {
                    Some(engine) => engine.seek(0.0).and_then(|_| engine.play()),
                    None => Ok(()),
                };
                match restarted {
                    Ok(()) => {
                        self.restart_pending = true;
                        if self.report_timer.is_none() {
                            self.start_reporting(now);
                        }
                    }
                    Err(err) => {
                        // Still parked at the end: hold there instead of re-finishing.
                        log::error!("[{}] loop restart failed: {}", self.player_key, err);
                        self.cancel_reporting(true);
                        if let Some(engine) = self.engine.as_mut() {
                            if let Err(err) = engine.pause() {
                                log::warn!("[{}] pause at end failed: {}", self.player_key, err);
                            }
                        }
                        self.state = PlaybackState::Paused;
                    }
                }
            }
            FinishMode::PauseAtEnd => {
                self.cancel_reporting(true);
                if let Some(engine) = self.engine.as_mut() {
                    if let Err(err) = engine.pause() {
                        log::error!("[{}] pause at end failed: {}", self.player_key, err);
                    }
                }
                self.state = PlaybackState::Paused;
            }
            FinishMode::StopAndRelease => {
                self.cancel_reporting(true);
                if let Some(mut engine) = self.engine.take() {
                    if let Err(err) = engine.stop() {
                        log::error!("[{}] stop at end failed: {}", self.player_key, err);
                    }
                }
                self.source = None;
                self.state = PlaybackState::Released;
            }
        }

        log::info!("[{}] finished ({:?})", self.player_key, mode);
        deliver(
            &self.notifier,
            PlayerEvent::DidFinishPlayingAudio {
                finish_type: mode.finish_type(),
                player_key: self.player_key.clone(),
            },
        );
    }

    /// A second finish inside one report interval of the last is the same end.
    fn is_duplicate_finish(&self, now: Instant) -> bool {
        match self.last_finish {
            Some(at) => now.saturating_duration_since(at) < self.report_interval,
            None => false,
        }
    }

    fn reached_end(&self) -> bool {
        match &self.engine {
            Some(engine) => {
                let duration = engine.duration();
                duration > 0.0 && engine.current_time() >= duration
            }
            None => false,
        }
    }

    fn apply_prepare_options(&mut self, options: &PrepareOptions) {
        if let Some(interval) = options.report_interval() {
            if interval != self.report_interval && self.report_timer.is_some() {
                self.report_timer = Some(ReportTimer::start(interval, Instant::now()));
            }
            self.report_interval = interval;
        }
        if options.volume.is_some() {
            let _ = self.set_volume(options.volume);
        }
    }

    fn apply_suppression_level(&mut self, level: SuppressionLevel) {
        self.suppression_level = Some(level);
        if let Some(engine) = self.engine.as_mut() {
            engine.set_suppression_level(level);
        }
        log::debug!("[{}] suppression {:?}", self.player_key, level);
    }

    fn start_reporting(&mut self, now: Instant) {
        self.report_position();
        self.report_timer = Some(ReportTimer::start(self.report_interval, now));
    }

    fn cancel_reporting(&mut self, final_report: bool) {
        if self.report_timer.take().is_some() && final_report {
            self.report_position();
        }
    }

    fn report_position(&self) {
        self.report_at(self.get_duration(DurationKind::Current));
    }

    fn report_at(&self, current_ms: i64) {
        deliver(
            &self.notifier,
            PlayerEvent::CurrentDuration {
                current_ms,
                player_key: self.player_key.clone(),
            },
        );
    }

    fn transition(&mut self, to: PlaybackState) -> Result<()> {
        self.state.validate_transition(to)?;
        if self.state != to {
            log::debug!("[{}] {:?} -> {:?}", self.player_key, self.state, to);
        }
        self.state = to;
        Ok(())
    }

    fn engine_mut(&mut self, op: &str) -> Result<&mut Box<dyn Engine>> {
        let key = &self.player_key;
        self.engine
            .as_mut()
            .ok_or_else(|| PlayerError::NotPrepared(format!("{} on {} without an engine", op, key)))
    }

    fn not_prepared(&self, op: &str) -> PlayerError {
        log::warn!("[{}] {} in {:?}", self.player_key, op, self.state);
        PlayerError::NotPrepared(format!("{} requires a prepared player", op))
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// Engine seconds to caller milliseconds, truncating toward zero.
pub fn seconds_to_millis(seconds: f64) -> i64 {
    (seconds * 1000.0) as i64
}

/// Caller milliseconds to engine seconds by floor division; never negative.
pub fn millis_to_whole_seconds(millis: i64) -> f64 {
    millis.div_euclid(1000).max(0) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::TestNotifier;
    use crate::engine::mock::{Call, MockFactory, SharedScript, SignalQueue};
    use crate::engine::EngineOptions;
    use crate::state::FinishType;
    use std::path::PathBuf;

    struct Harness {
        controller: PlaybackController,
        notifier: Arc<TestNotifier>,
        script: SharedScript,
        signals: Arc<SignalQueue>,
    }

    impl Harness {
        fn new() -> Self {
            let (factory, script) = MockFactory::new();
            let notifier = TestNotifier::new();
            let signals = Arc::new(SignalQueue::default());
            let controller = PlaybackController::new(
                "player-1",
                &PlayerConfig::default(),
                factory,
                notifier.clone(),
                signals.clone(),
            );
            Self {
                controller,
                notifier,
                script,
                signals,
            }
        }

        fn prepared() -> Self {
            let mut harness = Self::new();
            harness
                .controller
                .prepare(Some("/tmp/voice.m4a"), PrepareOptions::default())
                .unwrap();
            harness
        }

        fn playing() -> Self {
            let mut harness = Self::prepared();
            harness.controller.play().unwrap();
            harness
        }

        fn set_position(&self, seconds: f64) {
            self.script.lock().current = seconds;
        }

        /// Engine raises end of media and the runtime delivers it.
        fn engine_finishes(&mut self) {
            let events = self.script.lock().events.clone().unwrap();
            events.finished();
            for signal in self.signals.drain() {
                self.controller.handle_engine_signal(signal);
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.script.lock().calls.clone()
        }

        fn assert_timer_invariant(&self) {
            assert_eq!(
                self.controller.is_reporting(),
                self.controller.state() == PlaybackState::Playing,
                "timer active in {:?}",
                self.controller.state()
            );
        }
    }

    #[test]
    fn test_new_controller_is_uninitialized() {
        let harness = Harness::new();
        assert_eq!(harness.controller.state(), PlaybackState::Uninitialized);
        assert_eq!(harness.controller.finish_mode(), FinishMode::StopAndRelease);
        assert_eq!(harness.controller.report_interval(), Duration::from_millis(200));
        assert!(!harness.controller.has_engine());
        assert_eq!(harness.script.lock().created, 0);
    }

    #[test]
    fn test_prepare_binds_source() {
        let harness = Harness::prepared();
        assert_eq!(harness.controller.state(), PlaybackState::Ready);
        assert_eq!(
            harness.calls(),
            vec![Call::SetSource(
                MediaSource::File(PathBuf::from("/tmp/voice.m4a")),
                EngineOptions::default()
            )]
        );
        assert!(harness.notifier.get_events().is_empty());
    }

    #[test]
    fn test_prepare_same_source_is_idempotent() {
        let mut harness = Harness::prepared();
        harness
            .controller
            .prepare(Some("/tmp/voice.m4a"), PrepareOptions::default())
            .unwrap();
        assert_eq!(harness.controller.state(), PlaybackState::Ready);
        assert_eq!(harness.calls().len(), 1);
        assert_eq!(harness.script.lock().created, 1);
    }

    #[test]
    fn test_prepare_invalid_source_does_not_mutate() {
        let mut harness = Harness::new();
        for source in [None, Some("")] {
            let err = harness
                .controller
                .prepare(source, PrepareOptions::default())
                .unwrap_err();
            assert!(matches!(err, PlayerError::InvalidSource { .. }));
        }
        assert_eq!(harness.controller.state(), PlaybackState::Uninitialized);
        assert_eq!(harness.script.lock().created, 0);

        let mut harness = Harness::playing();
        let err = harness
            .controller
            .prepare(Some(""), PrepareOptions::default())
            .unwrap_err();
        assert!(matches!(err, PlayerError::InvalidSource { .. }));
        assert_eq!(harness.controller.state(), PlaybackState::Playing);
        assert!(harness.controller.is_reporting());
    }

    #[test]
    fn test_prepare_engine_failure_surfaces() {
        let mut harness = Harness::new();
        harness.script.lock().fail_source = true;
        let err = harness
            .controller
            .prepare(Some("/missing.wav"), PrepareOptions::default())
            .unwrap_err();
        assert!(matches!(err, PlayerError::Engine(_)));
        assert_eq!(harness.controller.state(), PlaybackState::Uninitialized);
        assert!(!harness.controller.has_engine());
    }

    #[test]
    fn test_prepare_options_pass_through() {
        let mut harness = Harness::new();
        let options = PrepareOptions {
            volume: Some(150.0),
            report_interval_ms: Some(50),
            engine: EngineOptions {
                override_audio_session: true,
            },
        };
        harness
            .controller
            .prepare(Some("https://example.com/a.mp3"), options)
            .unwrap();

        assert_eq!(harness.controller.report_interval(), Duration::from_millis(50));
        let calls = harness.calls();
        assert_eq!(
            calls[0],
            Call::SetSource(
                MediaSource::Remote("https://example.com/a.mp3".into()),
                EngineOptions {
                    override_audio_session: true
                }
            )
        );
        assert_eq!(calls[1], Call::Level(SuppressionLevel::High));
    }

    #[test]
    fn test_play_requires_prepare() {
        let mut harness = Harness::new();
        assert!(matches!(
            harness.controller.play(),
            Err(PlayerError::NotPrepared(_))
        ));
        assert!(matches!(
            harness.controller.seek(Some(1000)),
            Err(PlayerError::NotPrepared(_))
        ));
        harness.assert_timer_invariant();
    }

    #[test]
    fn test_play_reports_immediately() {
        let mut harness = Harness::prepared();
        harness.set_position(1.25);
        harness.controller.play().unwrap();

        assert_eq!(harness.controller.state(), PlaybackState::Playing);
        assert_eq!(harness.notifier.positions(), vec![1250]);
        assert!(harness.controller.next_report_due().is_some());
        harness.assert_timer_invariant();
    }

    #[test]
    fn test_ticks_report_at_interval() {
        let mut harness = Harness::playing();
        harness.notifier.clear();
        let due = harness.controller.next_report_due().unwrap();

        assert!(!harness.controller.on_tick(due - Duration::from_millis(1)));
        harness.set_position(0.2);
        assert!(harness.controller.on_tick(due));
        harness.set_position(0.4);
        assert!(harness.controller.on_tick(due + Duration::from_millis(200)));

        assert_eq!(harness.notifier.positions(), vec![200, 400]);
        match &harness.notifier.get_events()[0] {
            PlayerEvent::CurrentDuration { player_key, .. } => assert_eq!(player_key, "player-1"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_late_tick_fires_once() {
        let mut harness = Harness::playing();
        harness.notifier.clear();
        let late = harness.controller.next_report_due().unwrap() + Duration::from_secs(2);

        assert!(harness.controller.on_tick(late));
        assert!(!harness.controller.on_tick(late));
        assert_eq!(harness.notifier.positions().len(), 1);
    }

    #[test]
    fn test_play_then_pause_single_terminal_report() {
        let mut harness = Harness::playing();
        harness.notifier.clear();
        harness.set_position(3.7);
        let due = harness.controller.next_report_due().unwrap();

        harness.controller.pause().unwrap();
        assert_eq!(harness.notifier.positions(), vec![3700]);

        // timer is gone: a poll after the old deadline reports nothing
        assert!(!harness.controller.on_tick(due + Duration::from_secs(1)));
        assert_eq!(harness.notifier.positions(), vec![3700]);
        assert_eq!(harness.controller.state(), PlaybackState::Paused);
        harness.assert_timer_invariant();
    }

    #[test]
    fn test_pause_is_idempotent() {
        let mut harness = Harness::playing();
        harness.controller.pause().unwrap();
        harness.notifier.clear();
        harness.controller.pause().unwrap();
        assert!(harness.notifier.get_events().is_empty());
        assert_eq!(harness.controller.state(), PlaybackState::Paused);
        assert_eq!(
            harness.calls().iter().filter(|c| **c == Call::Pause).count(),
            1
        );
    }

    #[test]
    fn test_resume_after_pause() {
        let mut harness = Harness::playing();
        harness.controller.pause().unwrap();
        harness.controller.play().unwrap();
        assert_eq!(harness.controller.state(), PlaybackState::Playing);
        harness.assert_timer_invariant();
    }

    #[test]
    fn test_stop_reports_then_rewinds() {
        let mut harness = Harness::playing();
        harness.notifier.clear();
        harness.set_position(5.0);

        harness.controller.stop().unwrap();
        assert_eq!(harness.notifier.positions(), vec![5000]);
        assert_eq!(harness.controller.state(), PlaybackState::Ready);
        assert_eq!(harness.controller.get_duration(DurationKind::Current), 0);
        harness.assert_timer_invariant();

        harness.controller.play().unwrap();
        harness.assert_timer_invariant();
    }

    #[test]
    fn test_timer_invariant_over_sequence() {
        let mut harness = Harness::prepared();
        let steps: [fn(&mut PlaybackController) -> Result<()>; 8] = [
            PlaybackController::play,
            PlaybackController::pause,
            PlaybackController::pause,
            PlaybackController::play,
            PlaybackController::stop,
            PlaybackController::stop,
            PlaybackController::play,
            PlaybackController::release,
        ];
        for step in steps {
            step(&mut harness.controller).unwrap();
            harness.assert_timer_invariant();
        }
    }

    #[test]
    fn test_release_is_idempotent_and_blocks_playback() {
        let mut harness = Harness::playing();
        harness.controller.release().unwrap();
        harness.controller.release().unwrap();

        assert_eq!(harness.controller.state(), PlaybackState::Released);
        assert!(!harness.controller.has_engine());
        assert_eq!(harness.script.lock().dropped, 1);
        assert!(matches!(
            harness.controller.play(),
            Err(PlayerError::NotPrepared(_))
        ));
        assert!(matches!(
            harness.controller.stop(),
            Err(PlayerError::NotPrepared(_))
        ));
        assert_eq!(harness.controller.get_duration(DurationKind::Current), 0);
        assert_eq!(harness.controller.get_duration(DurationKind::Total), 0);
    }

    #[test]
    fn test_no_report_after_release() {
        let mut harness = Harness::playing();
        let due = harness.controller.next_report_due().unwrap();
        harness.controller.release().unwrap();
        harness.notifier.clear();

        assert!(!harness.controller.on_tick(due + Duration::from_secs(5)));
        assert!(harness.notifier.get_events().is_empty());
    }

    #[test]
    fn test_prepare_after_release_creates_new_engine() {
        let mut harness = Harness::playing();
        harness.controller.release().unwrap();
        harness
            .controller
            .prepare(Some("/tmp/voice.m4a"), PrepareOptions::default())
            .unwrap();
        assert_eq!(harness.controller.state(), PlaybackState::Ready);
        assert_eq!(harness.script.lock().created, 2);
    }

    #[test]
    fn test_get_duration_truncates() {
        let harness = Harness::prepared();
        harness.script.lock().duration = 12.3456;
        harness.set_position(0.0019);
        assert_eq!(harness.controller.get_duration(DurationKind::Total), 12345);
        assert_eq!(harness.controller.get_duration(DurationKind::Current), 1);
    }

    #[test]
    fn test_get_duration_without_engine_is_zero() {
        let harness = Harness::new();
        assert_eq!(harness.controller.get_duration(DurationKind::Current), 0);
        assert_eq!(harness.controller.get_duration(DurationKind::Total), 0);
    }

    #[test]
    fn test_seek_truncates_to_whole_seconds() {
        let mut harness = Harness::prepared();
        harness.controller.seek(Some(500)).unwrap();
        harness.controller.seek(Some(2999)).unwrap();
        harness.controller.seek(Some(-1)).unwrap();

        let seeks: Vec<Call> = harness
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Seek(_)))
            .collect();
        assert_eq!(seeks, vec![Call::Seek(0.0), Call::Seek(2.0), Call::Seek(0.0)]);
        // one out-of-band report per seek
        assert_eq!(harness.notifier.positions(), vec![0, 2000, 0]);
    }

    #[test]
    fn test_seek_null_target() {
        let mut harness = Harness::playing();
        harness.notifier.clear();
        assert!(matches!(
            harness.controller.seek(None),
            Err(PlayerError::InvalidArgument(_))
        ));
        assert!(harness.notifier.get_events().is_empty());
    }

    #[test]
    fn test_suppression_levels() {
        let mut harness = Harness::prepared();
        harness.controller.set_suppression_level(Some(3)).unwrap();
        harness.controller.set_suppression_level(Some(9)).unwrap();
        harness.controller.set_suppression_level(None).unwrap();

        let levels: Vec<Call> = harness
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Level(_)))
            .collect();
        assert_eq!(
            levels,
            vec![
                Call::Level(SuppressionLevel::VeryHigh),
                Call::Level(SuppressionLevel::Low),
                Call::Level(SuppressionLevel::Low),
            ]
        );
    }

    #[test]
    fn test_volume_threshold() {
        let mut harness = Harness::prepared();
        harness.controller.set_volume(Some(100.0)).unwrap();
        harness.controller.set_volume(None).unwrap();
        assert!(!harness.calls().iter().any(|c| matches!(c, Call::Level(_))));

        harness.controller.set_volume(Some(100.5)).unwrap();
        assert_eq!(
            harness.calls().last(),
            Some(&Call::Level(SuppressionLevel::High))
        );
    }

    #[test]
    fn test_settings_survive_reattach() {
        let mut harness = Harness::new();
        harness.controller.set_suppression_level(Some(2)).unwrap();
        harness.controller.set_playback_rate(Some(1.5)).unwrap();
        harness
            .controller
            .prepare(Some("/tmp/voice.m4a"), PrepareOptions::default())
            .unwrap();

        let calls = harness.calls();
        assert!(calls.contains(&Call::Level(SuppressionLevel::High)));
        assert!(calls.contains(&Call::Rate(1.5)));
    }

    #[test]
    fn test_playback_rate() {
        let mut harness = Harness::prepared();
        harness.controller.set_playback_rate(None).unwrap();
        harness.controller.set_playback_rate(Some(0.5)).unwrap();
        assert_eq!(
            harness.calls()[1..].to_vec(),
            vec![Call::Rate(1.0), Call::Rate(0.5)]
        );

        harness.script.lock().reject_rate = true;
        assert!(matches!(
            harness.controller.set_playback_rate(Some(-3.0)),
            Err(PlayerError::EngineRejected(_))
        ));
    }

    #[test]
    fn test_finish_loop() {
        let mut harness = Harness::playing();
        harness.controller.set_finish_mode(FinishMode::Loop);
        harness.set_position(9.9);
        harness.notifier.clear();

        harness.engine_finishes();

        assert_eq!(harness.controller.state(), PlaybackState::Playing);
        assert_eq!(harness.controller.get_duration(DurationKind::Current), 0);
        assert_eq!(harness.notifier.finishes(), vec![FinishType::Loop]);
        let calls = harness.calls();
        assert_eq!(calls[calls.len() - 2..], [Call::Seek(0.0), Call::Play]);
        harness.assert_timer_invariant();
    }

    #[test]
    fn test_finish_pause_at_end() {
        let mut harness = Harness::playing();
        harness.controller.set_finish_mode(FinishMode::PauseAtEnd);
        harness.set_position(10.0);
        harness.notifier.clear();

        harness.engine_finishes();

        assert_eq!(harness.controller.state(), PlaybackState::Paused);
        assert_eq!(harness.notifier.positions(), vec![10000]);
        assert_eq!(harness.notifier.finishes(), vec![FinishType::Pause]);
        assert!(harness.controller.has_engine());
        harness.assert_timer_invariant();

        // finished event follows the final report
        let events = harness.notifier.get_events();
        assert!(matches!(events.last(), Some(PlayerEvent::DidFinishPlayingAudio { .. })));
    }

    #[test]
    fn test_finish_stop_and_release() {
        let mut harness = Harness::playing();
        harness.notifier.clear();

        harness.engine_finishes();

        assert_eq!(harness.notifier.finishes(), vec![FinishType::Stop]);
        assert!(!harness.controller.has_engine());
        assert_eq!(harness.script.lock().dropped, 1);
        assert!(matches!(
            harness.controller.play(),
            Err(PlayerError::NotPrepared(_))
        ));
        harness.assert_timer_invariant();
    }

    #[test]
    fn test_finish_mode_not_retroactive() {
        let mut harness = Harness::playing();
        harness.controller.set_finish_mode(FinishMode::PauseAtEnd);
        harness.engine_finishes();
        harness.controller.set_finish_mode(FinishMode::Loop);

        assert_eq!(harness.controller.state(), PlaybackState::Paused);
        assert_eq!(harness.notifier.finishes(), vec![FinishType::Pause]);
    }

    #[test]
    fn test_duplicate_finish_signals() {
        let mut harness = Harness::playing();
        harness.controller.set_finish_mode(FinishMode::Loop);
        let events = harness.script.lock().events.clone().unwrap();

        // two signals queued before the first is handled
        events.finished();
        events.finished();
        for signal in harness.signals.drain() {
            harness.controller.handle_engine_signal(signal);
        }
        // a third raised right after the loop restarted
        harness.engine_finishes();

        assert_eq!(harness.notifier.finishes(), vec![FinishType::Loop]);
    }

    #[test]
    fn test_finish_after_release_ignored() {
        let mut harness = Harness::playing();
        let events = harness.script.lock().events.clone().unwrap();
        harness.controller.release().unwrap();
        harness.notifier.clear();

        events.finished();
        events.finished();
        for signal in harness.signals.drain() {
            harness.controller.handle_engine_signal(signal);
        }
        assert!(harness.notifier.get_events().is_empty());
        assert_eq!(harness.controller.state(), PlaybackState::Released);
    }

    #[test]
    fn test_finish_while_paused_ignored() {
        let mut harness = Harness::playing();
        harness.controller.pause().unwrap();
        harness.notifier.clear();
        harness.engine_finishes();
        assert!(harness.notifier.finishes().is_empty());
        assert_eq!(harness.controller.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_tick_detects_end_of_media() {
        let mut harness = Harness::playing();
        harness.controller.set_finish_mode(FinishMode::PauseAtEnd);
        harness.notifier.clear();
        harness.set_position(10.0);

        let due = harness.controller.next_report_due().unwrap();
        assert!(harness.controller.on_tick(due));
        assert_eq!(harness.controller.state(), PlaybackState::Paused);
        assert_eq!(harness.notifier.finishes(), vec![FinishType::Pause]);

        // the engine's own late signal is the same end
        harness.engine_finishes();
        assert_eq!(harness.notifier.finishes(), vec![FinishType::Pause]);
    }

    #[test]
    fn test_notifier_failure_does_not_stop_playback() {
        let mut harness = Harness::prepared();
        harness.notifier.set_failing(true);
        harness.controller.play().unwrap();
        let due = harness.controller.next_report_due().unwrap();
        assert!(harness.controller.on_tick(due));
        assert_eq!(harness.controller.state(), PlaybackState::Playing);

        harness.notifier.set_failing(false);
        assert!(harness.controller.on_tick(due + Duration::from_millis(200)));
        assert_eq!(harness.notifier.positions().len(), 1);
    }

    #[test]
    fn test_prepare_new_source_while_playing() {
        let mut harness = Harness::playing();
        harness.notifier.clear();
        harness
            .controller
            .prepare(Some("/tmp/other.m4a"), PrepareOptions::default())
            .unwrap();

        assert_eq!(harness.controller.state(), PlaybackState::Ready);
        assert_eq!(harness.notifier.positions().len(), 1);
        assert_eq!(harness.script.lock().created, 1);
        assert_eq!(
            harness.controller.source(),
            Some(&MediaSource::File(PathBuf::from("/tmp/other.m4a")))
        );
        harness.assert_timer_invariant();
    }

    #[test]
    fn test_play_failure_stays_ready() {
        let mut harness = Harness::prepared();
        harness.script.lock().fail_play = true;

        assert!(matches!(harness.controller.play(), Err(PlayerError::Engine(_))));
        assert_eq!(harness.controller.state(), PlaybackState::Ready);
        assert!(harness.notifier.get_events().is_empty());
        harness.assert_timer_invariant();
    }

    #[test]
    fn test_pause_failure_keeps_reporting() {
        let mut harness = Harness::playing();
        harness.script.lock().fail_pause = true;
        harness.notifier.clear();

        assert!(matches!(harness.controller.pause(), Err(PlayerError::Engine(_))));
        assert_eq!(harness.controller.state(), PlaybackState::Playing);
        assert!(harness.notifier.positions().is_empty());
        harness.assert_timer_invariant();

        let due = harness.controller.next_report_due().unwrap();
        assert!(harness.controller.on_tick(due));
        assert_eq!(harness.notifier.positions().len(), 1);
    }

    #[test]
    fn test_stop_failure_keeps_reporting() {
        let mut harness = Harness::playing();
        harness.set_position(4.0);
        harness.script.lock().fail_stop = true;
        harness.notifier.clear();

        assert!(matches!(harness.controller.stop(), Err(PlayerError::Engine(_))));
        assert_eq!(harness.controller.state(), PlaybackState::Playing);
        assert!(harness.notifier.positions().is_empty());
        harness.assert_timer_invariant();

        harness.script.lock().fail_stop = false;
        harness.controller.stop().unwrap();
        assert_eq!(harness.controller.state(), PlaybackState::Ready);
        assert_eq!(harness.notifier.positions(), vec![4000]);
        harness.assert_timer_invariant();
    }

    #[test]
    fn test_seek_failure_surfaces() {
        let mut harness = Harness::playing();
        harness.set_position(1.0);
        harness.script.lock().fail_seek = true;
        harness.notifier.clear();

        assert!(matches!(
            harness.controller.seek(Some(3000)),
            Err(PlayerError::Engine(_))
        ));
        assert!(harness.notifier.positions().is_empty());
        assert_eq!(harness.controller.get_duration(DurationKind::Current), 1000);
        assert_eq!(harness.controller.state(), PlaybackState::Playing);
        harness.assert_timer_invariant();
    }

    #[test]
    fn test_loop_restart_failure_parks_at_end() {
        let mut harness = Harness::playing();
        harness.controller.set_finish_mode(FinishMode::Loop);
        harness.set_position(10.0);
        harness.script.lock().fail_seek = true;
        harness.notifier.clear();

        let mut now = harness.controller.next_report_due().unwrap();
        for _ in 0..3 {
            harness.controller.on_tick(now);
            now += Duration::from_millis(500);
        }

        assert_eq!(harness.notifier.finishes(), vec![FinishType::Loop]);
        assert_eq!(harness.controller.state(), PlaybackState::Paused);
        harness.assert_timer_invariant();
    }

    #[test]
    fn test_tick_end_counted_once_while_restart_lags() {
        let mut harness = Harness::playing();
        harness.controller.set_finish_mode(FinishMode::Loop);
        harness.set_position(10.0);
        harness.script.lock().seek_lags = true;
        harness.notifier.clear();

        for _ in 0..3 {
            let due = harness.controller.next_report_due().unwrap();
            assert!(harness.controller.on_tick(due));
        }
        assert_eq!(harness.notifier.finishes(), vec![FinishType::Loop]);
        assert_eq!(harness.controller.state(), PlaybackState::Playing);
        harness.assert_timer_invariant();

        // the restart lands, then the next end of media is a new one
        harness.set_position(0.0);
        let due = harness.controller.next_report_due().unwrap();
        harness.controller.on_tick(due);
        harness.set_position(10.0);
        let due = harness.controller.next_report_due().unwrap();
        harness.controller.on_tick(due);
        assert_eq!(
            harness.notifier.finishes(),
            vec![FinishType::Loop, FinishType::Loop]
        );
    }

    #[test]
    fn test_reprepare_rearms_timer_with_new_interval() {
        let mut harness = Harness::playing();
        let before = Instant::now();
        harness
            .controller
            .prepare(
                Some("/tmp/voice.m4a"),
                PrepareOptions {
                    report_interval_ms: Some(50),
                    ..PrepareOptions::default()
                },
            )
            .unwrap();

        let due = harness.controller.next_report_due().unwrap();
        assert!(due >= before + Duration::from_millis(50));
        assert!(due <= Instant::now() + Duration::from_millis(50));
        assert_eq!(harness.controller.state(), PlaybackState::Playing);
        harness.assert_timer_invariant();
    }

    #[test]
    fn test_conversions() {
        assert_eq!(seconds_to_millis(1.9999), 1999);
        assert_eq!(seconds_to_millis(f64::NAN), 0);
        assert_eq!(millis_to_whole_seconds(500), 0.0);
        assert_eq!(millis_to_whole_seconds(1000), 1.0);
        assert_eq!(millis_to_whole_seconds(61_999), 61.0);
    }
}
