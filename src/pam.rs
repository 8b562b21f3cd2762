//! Linux-PAM service module glue.
//!
//! Exposes `pam_sm_open_session` and `pam_sm_close_session` so the cdylib
//! can be stacked as a PAM session module. Panics never cross the FFI
//! boundary; they become `PAM_SESSION_ERR`.

use crate::errors::SessionError;
use crate::host::SessionHost;
use crate::module::{self, LogTarget, SessionOutcome};
use nix::libc::{self, c_char, c_int, c_void};
use std::ffi::{CStr, CString};
use std::panic::{self, AssertUnwindSafe};

pub const PAM_SUCCESS: c_int = 0;
pub const PAM_SESSION_ERR: c_int = 14;

/// Opaque `pam_handle_t`.
#[repr(C)]
pub struct PamHandle {
    _private: [u8; 0],
}

#[link(name = "pam")]
extern "C" {
    fn pam_get_user(
        pamh: *mut PamHandle,
        user: *mut *const c_char,
        prompt: *const c_char,
    ) -> c_int;
    fn pam_getenv(pamh: *mut PamHandle, name: *const c_char) -> *const c_char;
    fn pam_putenv(pamh: *mut PamHandle, name_value: *const c_char) -> c_int;
    fn pam_getenvlist(pamh: *mut PamHandle) -> *mut *mut c_char;
}

/// [`SessionHost`] over a live PAM handle.
pub struct PamHost {
    handle: *mut PamHandle,
}

impl PamHost {
    /// # Safety
    ///
    /// `handle` must be the valid handle passed to the current service
    /// function, and must outlive the returned host.
    pub unsafe fn new(handle: *mut PamHandle) -> Self {
        Self { handle }
    }
}

fn owned(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: PAM returns NUL-terminated strings it owns.
    let value = unsafe { CStr::from_ptr(ptr) };
    Some(value.to_string_lossy().into_owned())
}

impl SessionHost for PamHost {
    fn username(&self) -> Option<String> {
        let mut user: *const c_char = std::ptr::null();
        // SAFETY: the handle is valid for this call and `user` is a valid
        // out pointer; a NULL prompt selects the default.
        let rc = unsafe { pam_get_user(self.handle, &mut user, std::ptr::null()) };
        if rc != PAM_SUCCESS {
            return None;
        }
        owned(user).filter(|name| !name.is_empty())
    }

    fn getenv(&self, name: &str) -> Option<String> {
        let name = CString::new(name).ok()?;
        // SAFETY: valid handle and NUL-terminated name.
        owned(unsafe { pam_getenv(self.handle, name.as_ptr()) })
    }

    fn putenv(&mut self, name: &str, value: &str) -> Result<(), SessionError> {
        let invalid = |message: String| SessionError::Environment {
            name: name.to_string(),
            message,
        };
        if name.is_empty() || name.contains('=') {
            return Err(invalid("invalid variable name".to_string()));
        }
        let entry = CString::new(format!("{}={}", name, value))
            .map_err(|_| invalid("value contains NUL".to_string()))?;
        // SAFETY: valid handle; PAM copies the entry.
        let rc = unsafe { pam_putenv(self.handle, entry.as_ptr()) };
        if rc != PAM_SUCCESS {
            return Err(invalid(format!("pam_putenv returned {}", rc)));
        }
        Ok(())
    }

    fn env_list(&self) -> Vec<(String, String)> {
        // SAFETY: valid handle. The list and every entry are malloc'd
        // copies owned by the caller.
        let list = unsafe { pam_getenvlist(self.handle) };
        if list.is_null() {
            return Vec::new();
        }

        let mut env = Vec::new();
        let mut cursor = list;
        // SAFETY: the list is NULL-terminated; each entry is freed once
        // after being copied, then the list itself.
        unsafe {
            while !(*cursor).is_null() {
                let entry = *cursor;
                if let Some((k, v)) = owned(entry).as_deref().and_then(|e| e.split_once('=')) {
                    env.push((k.to_string(), v.to_string()));
                }
                libc::free(entry.cast::<c_void>());
                cursor = cursor.add(1);
            }
            libc::free(list.cast::<c_void>());
        }
        env
    }
}

/// Copies the module arguments out of `argv`.
///
/// # Safety
///
/// `argv` must point to `argc` NUL-terminated strings, or be NULL.
pub unsafe fn module_args(argc: c_int, argv: *const *const c_char) -> Vec<String> {
    if argv.is_null() || argc <= 0 {
        return Vec::new();
    }
    (0..argc as usize)
        .filter_map(|i| owned(*argv.add(i)))
        .collect()
}

fn pam_code(outcome: SessionOutcome) -> c_int {
    match outcome {
        SessionOutcome::Success => PAM_SUCCESS,
        SessionOutcome::SessionError => PAM_SESSION_ERR,
    }
}

fn entry<F>(pamh: *mut PamHandle, argc: c_int, argv: *const *const c_char, call: F) -> c_int
where
    F: FnOnce(&mut PamHost, &[String]) -> SessionOutcome,
{
    if pamh.is_null() {
        return PAM_SESSION_ERR;
    }
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: PAM passes a live handle and its argument vector.
        let (mut host, args) = unsafe { (PamHost::new(pamh), module_args(argc, argv)) };
        call(&mut host, &args)
    }));
    match result {
        Ok(outcome) => pam_code(outcome),
        Err(_) => PAM_SESSION_ERR,
    }
}

/// # Safety
///
/// Called by libpam with a valid handle and argument vector.
#[no_mangle]
pub unsafe extern "C" fn pam_sm_open_session(
    pamh: *mut PamHandle,
    _flags: c_int,
    argc: c_int,
    argv: *const *const c_char,
) -> c_int {
    entry(pamh, argc, argv, |host, args| {
        module::open_session(host, args, LogTarget::Syslog)
    })
}

/// # Safety
///
/// Called by libpam with a valid handle and argument vector.
#[no_mangle]
pub unsafe extern "C" fn pam_sm_close_session(
    pamh: *mut PamHandle,
    _flags: c_int,
    argc: c_int,
    argv: *const *const c_char,
) -> c_int {
    entry(pamh, argc, argv, |host, args| {
        module::close_session(host, args, LogTarget::Syslog)
    })
}

#[cfg(test)]
#[path = "tests/pam_tests.rs"]
mod tests;
