//! Process-wide interrupt flag.
//!
//! SIGINT and SIGTERM only set an atomic flag. The supervision loop and
//! `ProcessRunner` poll it and tear their children down themselves.

use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM to the process-wide interrupt flag and return it.
pub fn install() -> &'static AtomicBool {
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
    &INTERRUPTED
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_routes_both_signals_to_the_flag() {
        let flag = install();
        assert!(std::ptr::eq(flag, install()));
        let expected = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        for sig in [libc::SIGINT, libc::SIGTERM] {
            let mut current: libc::sigaction = unsafe { std::mem::zeroed() };
            unsafe {
                libc::sigaction(sig, std::ptr::null(), &mut current);
            }
            assert_eq!(current.sa_sigaction, expected);
        }
    }
}
