// Engine implemented by the native host through a table of C functions

use ncplayer_core::{
    Engine, EngineEvents, EngineFactory, EngineOptions, EngineState, MediaSource, PlayerError,
    Result, SuppressionLevel,
};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::os::raw::c_char;

pub type EngineCreateFn =
    unsafe extern "C" fn(user_data: *mut c_void, player_key: *const c_char) -> *mut c_void;
pub type EngineDestroyFn = unsafe extern "C" fn(engine: *mut c_void);
pub type EngineSetSourceFn = unsafe extern "C" fn(
    engine: *mut c_void,
    url: *const c_char,
    override_audio_session: bool,
) -> i32;
pub type EngineCommandFn = unsafe extern "C" fn(engine: *mut c_void) -> i32;
pub type EngineSeekFn = unsafe extern "C" fn(engine: *mut c_void, seconds: f64) -> i32;
pub type EngineRateFn = unsafe extern "C" fn(engine: *mut c_void, rate: f32) -> i32;
pub type EngineLevelFn = unsafe extern "C" fn(engine: *mut c_void, level: i32);
pub type EngineTimeFn = unsafe extern "C" fn(engine: *mut c_void) -> f64;

/// Function table for the native engine (e.g. the WebRTC noise-cancel player).
///
/// Every command returns 0 on success. Times are in seconds.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct NcEngineVTable {
    pub user_data: *mut c_void,
    pub create: Option<EngineCreateFn>,
    pub destroy: Option<EngineDestroyFn>,
    pub set_source: Option<EngineSetSourceFn>,
    pub play: Option<EngineCommandFn>,
    pub pause: Option<EngineCommandFn>,
    pub stop: Option<EngineCommandFn>,
    pub seek: Option<EngineSeekFn>,
    pub set_rate: Option<EngineRateFn>,
    pub set_suppression_level: Option<EngineLevelFn>,
    pub current_time: Option<EngineTimeFn>,
    pub duration: Option<EngineTimeFn>,
}

// SAFETY: the host guarantees `user_data` and the engine handles it returns
// may be used from the runtime thread; the table itself is immutable.
unsafe impl Send for NcEngineVTable {}
unsafe impl Sync for NcEngineVTable {}

/// Function pointers after null checks
#[derive(Clone, Copy)]
struct Table {
    user_data: *mut c_void,
    create: EngineCreateFn,
    destroy: Option<EngineDestroyFn>,
    set_source: EngineSetSourceFn,
    play: EngineCommandFn,
    pause: EngineCommandFn,
    stop: EngineCommandFn,
    seek: EngineSeekFn,
    set_rate: EngineRateFn,
    set_suppression_level: EngineLevelFn,
    current_time: EngineTimeFn,
    duration: EngineTimeFn,
}

unsafe impl Send for Table {}
unsafe impl Sync for Table {}

fn required<T>(f: Option<T>, name: &str) -> Result<T> {
    f.ok_or_else(|| PlayerError::InvalidArgument(format!("engine vtable is missing `{}`", name)))
}

impl Table {
    fn from_vtable(vtable: &NcEngineVTable) -> Result<Self> {
        Ok(Self {
            user_data: vtable.user_data,
            create: required(vtable.create, "create")?,
            destroy: vtable.destroy,
            set_source: required(vtable.set_source, "set_source")?,
            play: required(vtable.play, "play")?,
            pause: required(vtable.pause, "pause")?,
            stop: required(vtable.stop, "stop")?,
            seek: required(vtable.seek, "seek")?,
            set_rate: required(vtable.set_rate, "set_rate")?,
            set_suppression_level: required(vtable.set_suppression_level, "set_suppression_level")?,
            current_time: required(vtable.current_time, "current_time")?,
            duration: required(vtable.duration, "duration")?,
        })
    }
}

/// Event sinks of live engines, keyed by player key, for the signal entry points
static ENGINE_EVENTS: Lazy<Mutex<HashMap<String, EngineEvents>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Raise `f` on the sink of `player_key`; false if no engine is attached.
pub(crate) fn with_engine_events(player_key: &str, f: impl FnOnce(&EngineEvents)) -> bool {
    let events = ENGINE_EVENTS.lock().get(player_key).cloned();
    match events {
        Some(events) => {
            f(&events);
            true
        }
        None => {
            log::debug!("[{}] engine signal without an attached engine", player_key);
            false
        }
    }
}

pub(crate) fn engine_state_from_code(code: i32) -> Option<EngineState> {
    match code {
        0 => Some(EngineState::Ready),
        1 => Some(EngineState::Playing),
        2 => Some(EngineState::Paused),
        3 => Some(EngineState::Stopped),
        _ => None,
    }
}

pub struct FfiEngineFactory {
    table: Table,
}

impl FfiEngineFactory {
    pub fn new(vtable: &NcEngineVTable) -> Result<Self> {
        Ok(Self {
            table: Table::from_vtable(vtable)?,
        })
    }
}

impl EngineFactory for FfiEngineFactory {
    fn create(&self, player_key: &str, events: EngineEvents) -> Result<Box<dyn Engine>> {
        let key = CString::new(player_key)
            .map_err(|_| PlayerError::InvalidArgument("player key contains NUL".into()))?;
        let handle = unsafe { (self.table.create)(self.table.user_data, key.as_ptr()) };
        if handle.is_null() {
            return Err(PlayerError::Engine("native engine creation failed".into()));
        }

        ENGINE_EVENTS.lock().insert(player_key.to_string(), events);
        log::info!("[{}] native engine created", player_key);
        Ok(Box::new(FfiEngine {
            player_key: player_key.to_string(),
            handle,
            table: self.table,
        }))
    }
}

struct FfiEngine {
    player_key: String,
    handle: *mut c_void,
    table: Table,
}

// SAFETY: the handle is only used from the runtime thread that owns the controller.
unsafe impl Send for FfiEngine {}

impl FfiEngine {
    fn check(&self, op: &str, code: i32) -> Result<()> {
        if code == 0 {
            Ok(())
        } else {
            log::error!("[{}] native {} failed with code {}", self.player_key, op, code);
            Err(PlayerError::Engine(format!("{} failed with code {}", op, code)))
        }
    }
}

impl Engine for FfiEngine {
    fn set_source(&mut self, source: &MediaSource, options: EngineOptions) -> Result<()> {
        let url = CString::new(source.to_string())
            .map_err(|_| PlayerError::unparsable_source())?;
        let code = unsafe {
            (self.table.set_source)(self.handle, url.as_ptr(), options.override_audio_session)
        };
        self.check("set_source", code)
    }

    fn play(&mut self) -> Result<()> {
        let code = unsafe { (self.table.play)(self.handle) };
        self.check("play", code)
    }

    fn pause(&mut self) -> Result<()> {
        let code = unsafe { (self.table.pause)(self.handle) };
        self.check("pause", code)
    }

    fn stop(&mut self) -> Result<()> {
        let code = unsafe { (self.table.stop)(self.handle) };
        self.check("stop", code)
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        let code = unsafe { (self.table.seek)(self.handle, seconds) };
        self.check("seek", code)
    }

    fn set_playback_rate(&mut self, rate: f32) -> Result<()> {
        let code = unsafe { (self.table.set_rate)(self.handle, rate) };
        if code == 0 {
            Ok(())
        } else {
            Err(PlayerError::EngineRejected(format!(
                "rate {} refused with code {}",
                rate, code
            )))
        }
    }

    fn set_suppression_level(&mut self, level: SuppressionLevel) {
        unsafe { (self.table.set_suppression_level)(self.handle, level.ordinal()) }
    }

    fn current_time(&self) -> f64 {
        unsafe { (self.table.current_time)(self.handle) }
    }

    fn duration(&self) -> f64 {
        unsafe { (self.table.duration)(self.handle) }
    }
}

impl Drop for FfiEngine {
    fn drop(&mut self) {
        ENGINE_EVENTS.lock().remove(&self.player_key);
        if let Some(destroy) = self.table.destroy {
            unsafe { destroy(self.handle) };
        }
        log::info!("[{}] native engine destroyed", self.player_key);
    }
}
