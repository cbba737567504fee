//! The exported entry points: the interposed libc surface and the
//! runtime-facing chain API.
//!
//! The interposers have the same signatures as their libc namesakes and
//! are meant to shadow them; for an unclaimed signal they behave exactly
//! like the real thing.

use core::ffi::c_int;
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::action::{KernelSigaction, Sigaction, Sigset, MAX_SIGNAL};
use crate::chain::{self, SigchainAction, SigchainHandler};
use crate::diag::{fatal, log_error, trace};
use crate::handling;
use crate::linked;

/// When set, every interposed `sigaction` reports success without
/// recording or installing anything.
static SKIP_ADD_HANDLERS: AtomicBool = AtomicBool::new(false);

fn invalid_signal(signo: c_int) -> bool {
    signo <= 0 || signo > MAX_SIGNAL
}

fn set_einval() {
    errno::set_errno(errno::Errno(libc::EINVAL));
}

/// `sigaction` at either width.
unsafe fn sigaction_with<A: Sigaction>(
    signo: c_int,
    new_action: *const A,
    old_action: *mut A,
) -> c_int {
    if SKIP_ADD_HANDLERS.load(Ordering::Relaxed) {
        return 0;
    }

    // Out-of-range numbers behave exactly as they would with the real
    // sigaction.
    if invalid_signal(signo) {
        set_einval();
        return -1;
    }

    // Dropping the process's segfault handler is almost always a bug in
    // the caller; make it loud.
    if signo == libc::SIGSEGV && !new_action.is_null() && (*new_action).handler() == libc::SIG_DFL
    {
        log_error!("setting SIGSEGV to SIG_DFL");
        crate::diag::log_stack();
    }

    // For a claimed signal, record the caller's action but don't pass it
    // on to the kernel.
    let record = &mut *chain::chain(signo);
    if record.claimed() {
        let saved: A = record.get_action();
        if !new_action.is_null() {
            record.set_action(&*new_action);
        }
        if !old_action.is_null() {
            *old_action = saved;
        }
        return 0;
    }

    A::linked_sigaction(signo, new_action, old_action)
}

/// Interposed `sigaction`.
///
/// For a claimed signal the new disposition lands in the chain record,
/// the previous chained disposition comes back in `old_action`, and the
/// kernel is not touched; otherwise this forwards to the real libc
/// symbol.
///
/// # Safety
///
/// Same contract as libc `sigaction`.
#[no_mangle]
pub unsafe extern "C" fn sigaction(
    signo: c_int,
    new_action: *const libc::sigaction,
    old_action: *mut libc::sigaction,
) -> c_int {
    linked::initialize();
    sigaction_with(signo, new_action, old_action)
}

/// Interposed `sigaction64`.
///
/// # Safety
///
/// Same contract as libc `sigaction64`.
#[cfg(target_os = "android")]
#[no_mangle]
pub unsafe extern "C" fn sigaction64(
    signo: c_int,
    new_action: *const libc::sigaction64,
    old_action: *mut libc::sigaction64,
) -> c_int {
    linked::initialize();
    sigaction_with(signo, new_action, old_action)
}

/// Interposed `signal`: `sigaction` with `SA_RESTART | SA_ONSTACK` and an
/// empty mask, returning the previous one-argument handler.
///
/// # Safety
///
/// Same contract as libc `signal`.
#[no_mangle]
pub unsafe extern "C" fn signal(signo: c_int, handler: libc::sighandler_t) -> libc::sighandler_t {
    linked::initialize();

    if invalid_signal(signo) {
        set_einval();
        return libc::SIG_ERR;
    }

    let mut sa = <libc::sigaction as Sigaction>::zeroed();
    sa.set_mask(<libc::sigset_t as Sigset>::empty());
    sa.set_handler(handler);
    sa.set_flags(libc::SA_RESTART | libc::SA_ONSTACK);

    // For a claimed signal, swap the recorded action without touching the
    // kernel.
    let record = &mut *chain::chain(signo);
    if record.claimed() {
        let previous = record.get_action::<libc::sigaction>().handler();
        record.set_action(&sa);
        return previous;
    }

    let mut old = <libc::sigaction as Sigaction>::zeroed();
    if <libc::sigaction as Sigaction>::linked_sigaction(signo, &sa, &mut old) == -1 {
        return libc::SIG_ERR;
    }
    old.handler()
}

/// Interposed `bsd_signal`; 32-bit libcs still export it.
///
/// # Safety
///
/// Same contract as libc `signal`.
#[cfg(all(target_os = "android", target_pointer_width = "32"))]
#[no_mangle]
pub unsafe extern "C" fn bsd_signal(
    signo: c_int,
    handler: libc::sighandler_t,
) -> libc::sighandler_t {
    signal(signo, handler)
}

/// `sigprocmask` at either width.
unsafe fn sigprocmask_with<S: Sigset>(how: c_int, new_set: *const S, old_set: *mut S) -> c_int {
    // Inside the dispatcher the mask is the dispatcher's business; don't
    // second-guess it.
    if handling::any() {
        return S::linked_sigprocmask(how, new_set, old_set);
    }

    let mut filtered;
    let mut new_set_ptr = new_set;
    if !new_set.is_null() {
        filtered = *new_set;
        if how == libc::SIG_BLOCK || how == libc::SIG_SETMASK {
            // A claimed signal can't be blocked out from under the chain.
            for signo in 1..=MAX_SIGNAL {
                if (*chain::chain(signo)).claimed() && filtered.has(signo) {
                    filtered.del(signo);
                }
            }
        }
        new_set_ptr = &filtered;
    }

    S::linked_sigprocmask(how, new_set_ptr, old_set)
}

/// Interposed `sigprocmask`.
///
/// Claimed signals are silently removed from the set being blocked; the
/// returned previous mask is whatever the real symbol reports.
///
/// # Safety
///
/// Same contract as libc `sigprocmask`.
#[no_mangle]
pub unsafe extern "C" fn sigprocmask(
    how: c_int,
    new_set: *const libc::sigset_t,
    old_set: *mut libc::sigset_t,
) -> c_int {
    linked::initialize();
    sigprocmask_with(how, new_set, old_set)
}

/// Interposed `sigprocmask64`.
///
/// # Safety
///
/// Same contract as libc `sigprocmask64`.
#[cfg(target_os = "android")]
#[no_mangle]
pub unsafe extern "C" fn sigprocmask64(
    how: c_int,
    new_set: *const libc::sigset64_t,
    old_set: *mut libc::sigset64_t,
) -> c_int {
    linked::initialize();
    sigprocmask_with(how, new_set, old_set)
}

/// Register a special handler for first look at `signo`, claiming the
/// signal if it isn't claimed yet.
///
/// Registration is a startup-time operation: it is not synchronized
/// against concurrent delivery of `signo`.
///
/// # Safety
///
/// `sa` must point to a valid [`SigchainAction`] whose handler is
/// async-signal-safe.
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn AddSpecialSignalHandlerFn(signo: c_int, sa: *const SigchainAction) {
    linked::initialize();

    if invalid_signal(signo) {
        fatal!("invalid signal {}", signo);
    }

    let record = &mut *chain::chain(signo);
    record.add_special_handler(&*sa);
    record.claim(signo);
    trace!("added special handler for signal {signo}");
}

/// Remove a special handler previously registered for `signo`, by
/// function identity. Removing a handler that was never added is fatal.
///
/// Like registration, this is not synchronized against concurrent
/// delivery of `signo`.
///
/// # Safety
///
/// Callable from any thread; see the delivery caveat above.
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn RemoveSpecialSignalHandlerFn(signo: c_int, fn_: SigchainHandler) {
    linked::initialize();

    if invalid_signal(signo) {
        fatal!("invalid signal {}", signo);
    }

    (*chain::chain(signo)).remove_special_handler(fn_);
    trace!("removed special handler for signal {signo}");
}

/// Re-register the dispatcher if some library clobbered the kernel
/// disposition for a claimed signal. Advisory; safe to call at any time
/// after initialization.
///
/// # Safety
///
/// `signo` must be a signal the chain has claimed.
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn EnsureFrontOfChain(signo: c_int) {
    linked::initialize();

    if invalid_signal(signo) {
        fatal!("invalid signal {}", signo);
    }

    // Ask the kernel, not the chain record; the record believes the
    // dispatcher is installed.
    let mut current = KernelSigaction::zeroed();
    KernelSigaction::linked_sigaction(signo, ptr::null(), &mut current);

    if current.handler() != chain::dispatch as libc::sighandler_t {
        log_error!(
            "unexpected sigaction {:#x} found for signal {}",
            current.handler(),
            signo
        );
        (*chain::chain(signo)).register(signo);
    }
}

/// Debug-mode toggle: when `true`, every interposed `sigaction` returns
/// success without doing anything. For tools that deliberately attach
/// their own signal handlers.
#[allow(non_snake_case)]
#[no_mangle]
pub extern "C" fn SkipAddSignalHandler(value: bool) {
    SKIP_ADD_HANDLERS.store(value, Ordering::Relaxed);
}
