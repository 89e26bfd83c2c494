// C ABI bridge for the noise-cancel player
//
// The host registers its native engine as a function table and an event
// callback once, then drives players by key. Bool-returning commands answer
// 1/0, fire-and-forget commands 0, and every failure -1; the structured
// error of a failed call is available from `ncplayer_last_error`.

pub mod engine;
pub mod notifier;

use engine::{engine_state_from_code, with_engine_events, FfiEngineFactory, NcEngineVTable};
use ncplayer_core::{
    Command, DurationKind, ErrorReport, Notifier, NullNotifier, PlayerConfig, PlayerError,
    PlayerRuntime, Reply, Result,
};
use notifier::{CallbackNotifier, NcEventCallback};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::cell::RefCell;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::sync::{Arc, Once};

static RUNTIME: Lazy<RwLock<Option<Arc<PlayerRuntime>>>> = Lazy::new(|| RwLock::new(None));
static INIT_LOGGER: Once = Once::new();

thread_local! {
    static LAST_ERROR: RefCell<Option<ErrorReport>> = const { RefCell::new(None) };
}

fn init_logging() {
    INIT_LOGGER.call_once(|| {
        // RUST_LOG wins over the default level.
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init();
    });
}

fn runtime() -> Result<Arc<PlayerRuntime>> {
    RUNTIME
        .read()
        .clone()
        .ok_or_else(|| PlayerError::Disconnected("ncplayer_init has not been called".into()))
}

fn set_last_error(err: &PlayerError) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(err.report()));
}

fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Read an optional C string; null maps to None.
unsafe fn read_optional(ptr: *const c_char) -> Result<Option<String>> {
    if ptr.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(|s| Some(s.to_string()))
        .map_err(|e| PlayerError::InvalidArgument(format!("invalid UTF-8: {}", e)))
}

unsafe fn read_key(ptr: *const c_char) -> Result<String> {
    read_optional(ptr)?.ok_or_else(|| PlayerError::InvalidArgument("player key is null".into()))
}

fn call(player_key: *const c_char, command: Command) -> Result<Reply> {
    let key = unsafe { read_key(player_key)? };
    runtime()?.call(&key, command)
}

fn to_code(result: Result<Reply>) -> i32 {
    match result {
        Ok(reply) => {
            clear_last_error();
            match reply {
                Reply::Bool(true) => 1,
                Reply::Bool(false) => 0,
                Reply::Int(_) | Reply::Unit => 0,
            }
        }
        Err(err) => {
            log::error!("FFI error: {}", err);
            set_last_error(&err);
            -1
        }
    }
}

fn unit_code(result: Result<()>) -> i32 {
    to_code(result.map(|_| Reply::Unit))
}

// -------------------------------
// Lifecycle
// -------------------------------

/// Start the runtime. `report_interval_ms <= 0` keeps the 200 ms default.
///
/// # Safety
/// `vtable` must point to a valid table whose functions stay callable until
/// `ncplayer_shutdown`; `callback` and `user_data` must be usable from any thread.
#[no_mangle]
pub unsafe extern "C" fn ncplayer_init(
    vtable: *const NcEngineVTable,
    callback: Option<NcEventCallback>,
    user_data: *mut c_void,
    report_interval_ms: i64,
) -> i32 {
    init_logging();

    let result = (|| -> Result<()> {
        let vtable = vtable
            .as_ref()
            .ok_or_else(|| PlayerError::InvalidArgument("engine vtable is null".into()))?;
        let factory = Arc::new(FfiEngineFactory::new(vtable)?);
        let notifier: Arc<dyn Notifier> = match callback {
            Some(callback) => Arc::new(CallbackNotifier::new(callback, user_data)),
            None => {
                log::warn!("no event callback registered, events are dropped");
                Arc::new(NullNotifier)
            }
        };

        let config = PlayerConfig::default().with_report_interval_ms(report_interval_ms.max(0) as u64);
        let runtime = PlayerRuntime::start(config, factory, notifier)?;

        let previous = RUNTIME.write().replace(Arc::new(runtime));
        if previous.is_some() {
            log::warn!("ncplayer_init called twice, previous runtime replaced");
        }
        Ok(())
    })();

    unit_code(result)
}

/// Release every player and stop the runtime.
#[no_mangle]
pub extern "C" fn ncplayer_shutdown() {
    // Dropping the last handle joins the worker.
    RUNTIME.write().take();
}

/// # Safety
/// `player_key` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ncplayer_create(player_key: *const c_char) -> i32 {
    let result = read_key(player_key).and_then(|key| runtime()?.create_player(&key));
    unit_code(result)
}

/// Forget a player entirely. Returns 1 if it existed.
///
/// # Safety
/// `player_key` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ncplayer_dispose(player_key: *const c_char) -> i32 {
    let result = read_key(player_key).and_then(|key| runtime()?.dispose_player(&key));
    to_code(result.map(Reply::Bool))
}

// -------------------------------
// Commands
// -------------------------------

/// `path` may be null (reported as InvalidSource). `has_volume` selects
/// whether `volume` is meaningful; `report_interval_ms <= 0` keeps the cadence.
///
/// # Safety
/// `player_key` and a non-null `path` must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn ncplayer_prepare(
    player_key: *const c_char,
    path: *const c_char,
    volume: f64,
    has_volume: bool,
    report_interval_ms: i64,
    override_audio_session: bool,
) -> i32 {
    let source = match read_optional(path) {
        Ok(source) => source,
        Err(err) => return to_code(Err(err)),
    };
    let command = Command::Prepare {
        source,
        volume: has_volume.then_some(volume),
        report_interval_ms: (report_interval_ms > 0).then_some(report_interval_ms),
        override_audio_session,
    };
    to_code(call(player_key, command))
}

/// # Safety
/// `player_key` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ncplayer_play(player_key: *const c_char) -> i32 {
    to_code(call(player_key, Command::Play))
}

/// # Safety
/// `player_key` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ncplayer_pause(player_key: *const c_char) -> i32 {
    to_code(call(player_key, Command::Pause))
}

/// # Safety
/// `player_key` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ncplayer_stop(player_key: *const c_char) -> i32 {
    to_code(call(player_key, Command::Stop))
}

/// # Safety
/// `player_key` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ncplayer_release(player_key: *const c_char) -> i32 {
    to_code(call(player_key, Command::Release))
}

/// Milliseconds; `kind` 0 is the current position, anything else the total.
/// Never fails: 0 when the player has no engine or cannot be reached.
///
/// # Safety
/// `player_key` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ncplayer_get_duration(player_key: *const c_char, kind: i32) -> i64 {
    let command = Command::GetDuration(DurationKind::from_ordinal(kind as i64));
    match call(player_key, command) {
        Ok(reply) => reply.as_int().unwrap_or(0),
        Err(err) => {
            log::error!("Failed to get duration: {}", err);
            0
        }
    }
}

/// # Safety
/// `player_key` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ncplayer_set_suppression_level(
    player_key: *const c_char,
    level: i32,
) -> i32 {
    to_code(call(player_key, Command::SetSuppressionLevel(Some(level as i64))))
}

/// # Safety
/// `player_key` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ncplayer_set_volume(player_key: *const c_char, volume: f64) -> i32 {
    to_code(call(player_key, Command::SetVolume(Some(volume))))
}

/// # Safety
/// `player_key` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ncplayer_set_rate(player_key: *const c_char, rate: f64) -> i32 {
    to_code(call(player_key, Command::SetPlaybackRate(Some(rate))))
}

/// `has_target == false` stands for a null target and answers 0.
///
/// # Safety
/// `player_key` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ncplayer_seek(
    player_key: *const c_char,
    to_millis: i64,
    has_target: bool,
) -> i32 {
    to_code(call(player_key, Command::Seek(has_target.then_some(to_millis))))
}

/// 0 loops, 1 pauses, anything else stops and releases.
///
/// # Safety
/// `player_key` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ncplayer_set_finish_mode(player_key: *const c_char, mode: i32) -> i32 {
    to_code(call(player_key, Command::SetFinishMode(Some(mode as i64))))
}

// -------------------------------
// Engine signals
// -------------------------------

/// The native engine reached end of media.
///
/// # Safety
/// `player_key` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ncplayer_engine_did_finish(player_key: *const c_char) -> i32 {
    signal(player_key, |events| events.finished())
}

/// # Safety
/// `player_key` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ncplayer_engine_did_update_progress(
    player_key: *const c_char,
    current: f64,
    duration: f64,
) -> i32 {
    signal(player_key, |events| events.progress(current, duration))
}

/// `state`: 0 ready, 1 playing, 2 paused, 3 stopped.
///
/// # Safety
/// `player_key` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ncplayer_engine_did_change_state(
    player_key: *const c_char,
    state: i32,
) -> i32 {
    match engine_state_from_code(state) {
        Some(state) => signal(player_key, |events| events.state_changed(state)),
        None => {
            log::warn!("unknown engine state code {}", state);
            -1
        }
    }
}

unsafe fn signal(player_key: *const c_char, f: impl FnOnce(&ncplayer_core::EngineEvents)) -> i32 {
    match read_key(player_key) {
        Ok(key) => {
            if with_engine_events(&key, f) {
                0
            } else {
                -1
            }
        }
        Err(err) => {
            log::error!("engine signal: {}", err);
            -1
        }
    }
}

// -------------------------------
// Errors
// -------------------------------

/// JSON `{code, kind, message, details}` of this thread's last failed call,
/// or null. Free with `ncplayer_string_free`.
#[no_mangle]
pub extern "C" fn ncplayer_last_error() -> *mut c_char {
    LAST_ERROR.with(|slot| match slot.borrow().as_ref() {
        Some(report) => CString::new(report.to_json())
            .map(CString::into_raw)
            .unwrap_or(std::ptr::null_mut()),
        None => std::ptr::null_mut(),
    })
}

/// # Safety
/// `s` must come from this library and not be freed twice.
#[no_mangle]
pub unsafe extern "C" fn ncplayer_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}
