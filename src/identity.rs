use libc::{getpwuid, uid_t};
use std::ffi::CStr;

/// Account performing the registration, recorded in every audit entry.
/// `sudo` invocations are attributed to the invoking user.
pub fn operator_name() -> String {
    if let Ok(sudo_user) = std::env::var("SUDO_USER") {
        if !sudo_user.is_empty() {
            return sudo_user;
        }
    }
    unsafe {
        let uid = libc::geteuid();
        let pwd = getpwuid(uid as uid_t);
        if pwd.is_null() {
            return format!("uid:{}", uid);
        }
        let name = CStr::from_ptr((*pwd).pw_name);
        name.to_string_lossy().into_owned()
    }
}
