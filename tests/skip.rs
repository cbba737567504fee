//! The debug-mode bypass. Lives in its own binary because the toggle is
//! process-global.

use std::mem;
use std::ptr;

unsafe extern "C" fn marker(_signo: libc::c_int) {}

#[test]
fn skip_add_signal_handler_makes_sigaction_a_successful_noop() {
    sigchain::SkipAddSignalHandler(true);

    // Even invalid arguments report success while bypassed.
    assert_eq!(
        unsafe { sigchain::sigaction(0, ptr::null(), ptr::null_mut()) },
        0
    );

    let mut sa: libc::sigaction = unsafe { mem::zeroed() };
    sa.sa_sigaction = marker as libc::sighandler_t;
    sa.sa_flags = libc::SA_RESTART;
    unsafe { libc::sigemptyset(&mut sa.sa_mask) };
    assert_eq!(
        unsafe { sigchain::sigaction(libc::SIGUSR1, &sa, ptr::null_mut()) },
        0
    );

    sigchain::SkipAddSignalHandler(false);

    // Nothing was recorded or installed; the kernel still has the
    // default.
    let mut current: libc::sigaction = unsafe { mem::zeroed() };
    assert_eq!(
        unsafe { sigchain::sigaction(libc::SIGUSR1, ptr::null(), &mut current) },
        0
    );
    assert_eq!(current.sa_sigaction, libc::SIG_DFL);

    // And validation applies again.
    assert_eq!(
        unsafe { sigchain::sigaction(0, ptr::null(), ptr::null_mut()) },
        -1
    );
    assert_eq!(errno::errno().0, libc::EINVAL);
}
