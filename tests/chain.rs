//! End-to-end dispatch through the chain.
//!
//! Claiming is process-wide and one-way, so every test here owns its own
//! signal numbers.

mod utils;

use std::ffi::c_void;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

static FORWARD_SPECIAL: AtomicUsize = AtomicUsize::new(0);
static FORWARD_USER: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn forward_special(
    _signo: libc::c_int,
    _siginfo: *mut libc::siginfo_t,
    _ucontext: *mut c_void,
) -> bool {
    FORWARD_SPECIAL.fetch_add(1, Ordering::SeqCst);
    false
}

unsafe extern "C" fn forward_user(
    _signo: libc::c_int,
    _siginfo: *mut libc::siginfo_t,
    _ucontext: *mut c_void,
) {
    FORWARD_USER.fetch_add(1, Ordering::SeqCst);
}

fn install_user_action(
    signo: libc::c_int,
    handler: unsafe extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut c_void),
) {
    let mut sa: libc::sigaction = unsafe { mem::zeroed() };
    sa.sa_sigaction = handler as libc::sighandler_t;
    sa.sa_flags = libc::SA_RESTART | libc::SA_SIGINFO;
    unsafe { libc::sigemptyset(&mut sa.sa_mask) };
    assert_eq!(unsafe { sigchain::sigaction(signo, &sa, ptr::null_mut()) }, 0);
}

#[test]
fn special_handler_runs_first_then_the_user_action() {
    unsafe {
        sigchain::AddSpecialSignalHandlerFn(
            libc::SIGUSR1,
            &utils::special_action(forward_special, 0),
        );
    }
    install_user_action(libc::SIGUSR1, forward_user);

    utils::raise(libc::SIGUSR1);

    assert_eq!(FORWARD_SPECIAL.load(Ordering::SeqCst), 1);
    assert_eq!(FORWARD_USER.load(Ordering::SeqCst), 1);
}

static CONSUME_SPECIAL: AtomicUsize = AtomicUsize::new(0);
static CONSUME_USER: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn consume_special(
    _signo: libc::c_int,
    _siginfo: *mut libc::siginfo_t,
    _ucontext: *mut c_void,
) -> bool {
    CONSUME_SPECIAL.fetch_add(1, Ordering::SeqCst);
    true
}

unsafe extern "C" fn consume_user(
    _signo: libc::c_int,
    _siginfo: *mut libc::siginfo_t,
    _ucontext: *mut c_void,
) {
    CONSUME_USER.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn consuming_special_handler_stops_the_chain() {
    unsafe {
        sigchain::AddSpecialSignalHandlerFn(
            libc::SIGUSR2,
            &utils::special_action(consume_special, 0),
        );
    }
    install_user_action(libc::SIGUSR2, consume_user);

    utils::raise(libc::SIGUSR2);

    assert_eq!(CONSUME_SPECIAL.load(Ordering::SeqCst), 1);
    assert_eq!(CONSUME_USER.load(Ordering::SeqCst), 0);
}

static REMOVE_FIRST: AtomicUsize = AtomicUsize::new(0);
static REMOVE_SECOND: AtomicUsize = AtomicUsize::new(0);
static REMOVE_USER: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn remove_first(
    _signo: libc::c_int,
    _siginfo: *mut libc::siginfo_t,
    _ucontext: *mut c_void,
) -> bool {
    REMOVE_FIRST.fetch_add(1, Ordering::SeqCst);
    false
}

unsafe extern "C" fn remove_second(
    _signo: libc::c_int,
    _siginfo: *mut libc::siginfo_t,
    _ucontext: *mut c_void,
) -> bool {
    REMOVE_SECOND.fetch_add(1, Ordering::SeqCst);
    false
}

unsafe extern "C" fn remove_user(
    _signo: libc::c_int,
    _siginfo: *mut libc::siginfo_t,
    _ucontext: *mut c_void,
) {
    REMOVE_USER.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn removed_special_handler_stops_firing() {
    const SIG: libc::c_int = 40;

    unsafe {
        sigchain::AddSpecialSignalHandlerFn(SIG, &utils::special_action(remove_first, 0));
        sigchain::AddSpecialSignalHandlerFn(SIG, &utils::special_action(remove_second, 0));
    }
    install_user_action(SIG, remove_user);

    utils::raise(SIG);
    assert_eq!(REMOVE_FIRST.load(Ordering::SeqCst), 1);
    assert_eq!(REMOVE_SECOND.load(Ordering::SeqCst), 1);
    assert_eq!(REMOVE_USER.load(Ordering::SeqCst), 1);

    unsafe { sigchain::RemoveSpecialSignalHandlerFn(SIG, remove_first) };

    utils::raise(SIG);
    assert_eq!(REMOVE_FIRST.load(Ordering::SeqCst), 1);
    assert_eq!(REMOVE_SECOND.load(Ordering::SeqCst), 2);
    assert_eq!(REMOVE_USER.load(Ordering::SeqCst), 2);
}

static REENTRY_SPECIAL: AtomicUsize = AtomicUsize::new(0);
static REENTRY_USER: AtomicUsize = AtomicUsize::new(0);
static RERAISED: AtomicBool = AtomicBool::new(false);

unsafe extern "C" fn reentry_special(
    signo: libc::c_int,
    _siginfo: *mut libc::siginfo_t,
    _ucontext: *mut c_void,
) -> bool {
    REENTRY_SPECIAL.fetch_add(1, Ordering::SeqCst);
    // Deliver the same signal from inside its own chain; the empty
    // `sc_mask` leaves it unblocked, so this nests immediately.
    if !RERAISED.swap(true, Ordering::SeqCst) {
        libc::raise(signo);
    }
    false
}

unsafe extern "C" fn reentry_user(_signo: libc::c_int) {
    REENTRY_USER.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn reentry_skips_the_special_phase_but_reaches_the_user_action() {
    const SIG: libc::c_int = 41;

    unsafe {
        sigchain::AddSpecialSignalHandlerFn(SIG, &utils::special_action(reentry_special, 0));
    }
    let previous = unsafe { sigchain::signal(SIG, reentry_user as libc::sighandler_t) };
    assert_eq!(previous, libc::SIG_DFL);

    utils::raise(SIG);

    // The nested delivery skipped the special phase entirely, but the
    // user action ran for both the nested and the outer delivery.
    assert_eq!(REENTRY_SPECIAL.load(Ordering::SeqCst), 1);
    assert_eq!(REENTRY_USER.load(Ordering::SeqCst), 2);
}

static FRONT_SPECIAL: AtomicUsize = AtomicUsize::new(0);
static FRONT_ORIGINAL_USER: AtomicUsize = AtomicUsize::new(0);
static FRONT_CLOBBER: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn front_special(
    _signo: libc::c_int,
    _siginfo: *mut libc::siginfo_t,
    _ucontext: *mut c_void,
) -> bool {
    FRONT_SPECIAL.fetch_add(1, Ordering::SeqCst);
    false
}

unsafe extern "C" fn front_original_user(
    _signo: libc::c_int,
    _siginfo: *mut libc::siginfo_t,
    _ucontext: *mut c_void,
) {
    FRONT_ORIGINAL_USER.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn front_clobber(
    _signo: libc::c_int,
    _siginfo: *mut libc::siginfo_t,
    _ucontext: *mut c_void,
) {
    FRONT_CLOBBER.fetch_add(1, Ordering::SeqCst);
}

/// Clobbers the kernel disposition behind the chain's back, the way a
/// library calling the real `sigaction` directly would.
#[cfg(target_env = "gnu")]
unsafe fn clobber_with_real_sigaction(signo: libc::c_int) {
    let handle = libc::dlopen(c"libc.so.6".as_ptr(), libc::RTLD_LOCAL | libc::RTLD_LAZY);
    assert!(!handle.is_null());
    let sym = libc::dlsym(handle, c"sigaction".as_ptr());
    assert!(!sym.is_null());
    let real: unsafe extern "C" fn(
        libc::c_int,
        *const libc::sigaction,
        *mut libc::sigaction,
    ) -> libc::c_int = mem::transmute(sym);

    let mut sa: libc::sigaction = mem::zeroed();
    sa.sa_sigaction = front_clobber as libc::sighandler_t;
    sa.sa_flags = libc::SA_RESTART | libc::SA_SIGINFO;
    libc::sigemptyset(&mut sa.sa_mask);
    assert_eq!(real(signo, &sa, ptr::null_mut()), 0);
}

#[cfg(target_env = "gnu")]
#[test]
fn ensure_front_of_chain_recovers_from_a_clobbered_disposition() {
    const SIG: libc::c_int = 42;

    unsafe {
        sigchain::AddSpecialSignalHandlerFn(SIG, &utils::special_action(front_special, 0));
    }
    let mut sa: libc::sigaction = unsafe { mem::zeroed() };
    sa.sa_sigaction = front_original_user as libc::sighandler_t;
    sa.sa_flags = libc::SA_RESTART | libc::SA_SIGINFO;
    unsafe { libc::sigemptyset(&mut sa.sa_mask) };
    assert_eq!(unsafe { sigchain::sigaction(SIG, &sa, ptr::null_mut()) }, 0);

    unsafe { clobber_with_real_sigaction(SIG) };

    // Re-registering puts the dispatcher back in front and captures the
    // clobbered disposition as the new chained action, so the clobberer
    // still sees its signal.
    unsafe { sigchain::EnsureFrontOfChain(SIG) };

    utils::raise(SIG);

    assert_eq!(FRONT_SPECIAL.load(Ordering::SeqCst), 1);
    assert_eq!(FRONT_CLOBBER.load(Ordering::SeqCst), 1);
    assert_eq!(FRONT_ORIGINAL_USER.load(Ordering::SeqCst), 0);
}
