// Notifier that forwards events to a host C callback

use ncplayer_core::{Notifier, NotifyError, PlayerEvent};
use std::ffi::{c_void, CString};
use std::os::raw::c_char;

/// Receives `(user_data, method, payload_json)`; strings are only valid for the call.
pub type NcEventCallback =
    unsafe extern "C" fn(user_data: *mut c_void, method: *const c_char, payload: *const c_char);

pub struct CallbackNotifier {
    callback: NcEventCallback,
    user_data: *mut c_void,
}

// SAFETY: the host promises the callback may be invoked from the runtime thread.
unsafe impl Send for CallbackNotifier {}
unsafe impl Sync for CallbackNotifier {}

impl CallbackNotifier {
    pub fn new(callback: NcEventCallback, user_data: *mut c_void) -> Self {
        Self {
            callback,
            user_data,
        }
    }
}

impl Notifier for CallbackNotifier {
    fn notify(&self, event: &PlayerEvent) -> Result<(), NotifyError> {
        let method = CString::new(event.method()).map_err(|e| NotifyError(e.to_string()))?;
        let payload =
            CString::new(event.payload_json()).map_err(|e| NotifyError(e.to_string()))?;
        unsafe { (self.callback)(self.user_data, method.as_ptr(), payload.as_ptr()) };
        Ok(())
    }
}
