//! The real libc's signal entry points.
//!
//! This crate exports `sigaction`, `signal`, and `sigprocmask` symbols of
//! its own, so naming those, directly or through the `libc` crate, comes
//! straight back here. The functions in this module are instead
//! resolved out of the platform libc with `dlopen`/`dlsym` at startup,
//! and call the genuine implementations.

use core::ffi::{c_int, c_void, CStr};
use core::mem::transmute;
use core::ptr;

use rustix_futex_sync::Once;

use crate::diag::fatal;

/// A `sigaction`-shaped libc entry point.
pub(crate) type SigactionFn =
    unsafe extern "C" fn(c_int, *const libc::sigaction, *mut libc::sigaction) -> c_int;

/// A `sigprocmask`-shaped libc entry point.
pub(crate) type SigprocmaskFn =
    unsafe extern "C" fn(c_int, *const libc::sigset_t, *mut libc::sigset_t) -> c_int;

#[cfg(target_os = "android")]
pub(crate) type Sigaction64Fn =
    unsafe extern "C" fn(c_int, *const libc::sigaction64, *mut libc::sigaction64) -> c_int;

#[cfg(target_os = "android")]
pub(crate) type Sigprocmask64Fn =
    unsafe extern "C" fn(c_int, *const libc::sigset64_t, *mut libc::sigset64_t) -> c_int;

/// The platform's asynchronous recovery hook.
pub(crate) type HandleSignalFn =
    unsafe extern "C" fn(c_int, *mut libc::siginfo_t, *mut c_void) -> bool;

#[cfg(target_os = "android")]
const LIBC_SO: &CStr = c"libc.so";
#[cfg(all(not(target_os = "android"), target_env = "gnu"))]
const LIBC_SO: &CStr = c"libc.so.6";
#[cfg(not(any(target_os = "android", target_env = "gnu")))]
compile_error!("unsupported libc: not bionic or glibc?");

static INIT: Once = Once::new();

static mut LINKED_SIGACTION: Option<SigactionFn> = None;
static mut LINKED_SIGPROCMASK: Option<SigprocmaskFn> = None;
#[cfg(target_os = "android")]
static mut LINKED_SIGACTION64: Option<Sigaction64Fn> = None;
#[cfg(target_os = "android")]
static mut LINKED_SIGPROCMASK64: Option<Sigprocmask64Fn> = None;
static mut HANDLE_SIGNAL: Option<HandleSignalFn> = None;

fn dlerror_message() -> &'static str {
    let message = unsafe { libc::dlerror() };
    if message.is_null() {
        "unknown error"
    } else {
        unsafe { CStr::from_ptr(message) }
            .to_str()
            .unwrap_or("non-UTF-8 error")
    }
}

fn libc_handle() -> *mut c_void {
    static HANDLE_INIT: Once = Once::new();
    static mut HANDLE: *mut c_void = ptr::null_mut();

    HANDLE_INIT.call_once(|| unsafe {
        let handle = libc::dlopen(LIBC_SO.as_ptr(), libc::RTLD_LOCAL | libc::RTLD_LAZY);
        if handle.is_null() {
            fatal!("failed to dlopen {:?}: {}", LIBC_SO, dlerror_message());
        }
        HANDLE = handle;
    });

    unsafe { HANDLE }
}

/// Look up `name` in the platform libc, falling back to a default-scope
/// lookup.
///
/// A fallback result equal to `wrapper`, one of our own interposers,
/// would make the chain call itself forever, so it's rejected.
unsafe fn lookup_libc_symbol(name: &CStr, wrapper: *const c_void) -> *mut c_void {
    let mut sym = libc::dlsym(libc_handle(), name.as_ptr());
    if sym.is_null() {
        sym = libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr());
        if sym.is_null() || ptr::eq(sym, wrapper.cast_mut()) {
            fatal!("unable to find the real {:?} in the signal chain", name);
        }
    }
    sym
}

/// Resolve every required symbol, once.
///
/// This also runs eagerly from the constructor below, but every
/// interposed entry point calls it too, in case a handler is installed
/// before constructors have run.
pub(crate) fn initialize() {
    INIT.call_once(|| unsafe {
        let sigaction_wrapper: SigactionFn = crate::api::sigaction;
        LINKED_SIGACTION = Some(transmute::<*mut c_void, SigactionFn>(lookup_libc_symbol(
            c"sigaction",
            sigaction_wrapper as *const c_void,
        )));
        let sigprocmask_wrapper: SigprocmaskFn = crate::api::sigprocmask;
        LINKED_SIGPROCMASK = Some(transmute::<*mut c_void, SigprocmaskFn>(lookup_libc_symbol(
            c"sigprocmask",
            sigprocmask_wrapper as *const c_void,
        )));

        #[cfg(target_os = "android")]
        {
            let sigaction64_wrapper: Sigaction64Fn = crate::api::sigaction64;
            LINKED_SIGACTION64 = Some(transmute::<*mut c_void, Sigaction64Fn>(
                lookup_libc_symbol(c"sigaction64", sigaction64_wrapper as *const c_void),
            ));
            let sigprocmask64_wrapper: Sigprocmask64Fn = crate::api::sigprocmask64;
            LINKED_SIGPROCMASK64 = Some(transmute::<*mut c_void, Sigprocmask64Fn>(
                lookup_libc_symbol(c"sigprocmask64", sigprocmask64_wrapper as *const c_void),
            ));
        }

        // Present only on platforms with a recovery-capable crash service;
        // absent is normal everywhere else.
        let hook = libc::dlsym(libc::RTLD_DEFAULT, c"android_handle_signal".as_ptr());
        if !hook.is_null() {
            HANDLE_SIGNAL = Some(transmute::<*mut c_void, HandleSignalFn>(hook));
        }
    });
}

/// Resolve the real libc entry points as soon as we're loaded, before
/// anything has a chance to install a handler through us.
#[link_section = ".init_array.00098"]
#[used]
static INIT_ARRAY: unsafe extern "C" fn() = {
    unsafe extern "C" fn function() {
        initialize();
    }
    function
};

/// Call the real `sigaction`.
pub(crate) unsafe fn sigaction(
    signo: c_int,
    new: *const libc::sigaction,
    old: *mut libc::sigaction,
) -> c_int {
    initialize();
    let Some(sigaction) = LINKED_SIGACTION else {
        fatal!("signal chain used before initialization");
    };
    sigaction(signo, new, old)
}

/// Call the real `sigprocmask`.
pub(crate) unsafe fn sigprocmask(
    how: c_int,
    new: *const libc::sigset_t,
    old: *mut libc::sigset_t,
) -> c_int {
    initialize();
    let Some(sigprocmask) = LINKED_SIGPROCMASK else {
        fatal!("signal chain used before initialization");
    };
    sigprocmask(how, new, old)
}

/// Call the real `sigaction64`.
#[cfg(target_os = "android")]
pub(crate) unsafe fn sigaction64(
    signo: c_int,
    new: *const libc::sigaction64,
    old: *mut libc::sigaction64,
) -> c_int {
    initialize();
    let Some(sigaction64) = LINKED_SIGACTION64 else {
        fatal!("signal chain used before initialization");
    };
    sigaction64(signo, new, old)
}

/// Call the real `sigprocmask64`.
#[cfg(target_os = "android")]
pub(crate) unsafe fn sigprocmask64(
    how: c_int,
    new: *const libc::sigset64_t,
    old: *mut libc::sigset64_t,
) -> c_int {
    initialize();
    let Some(sigprocmask64) = LINKED_SIGPROCMASK64 else {
        fatal!("signal chain used before initialization");
    };
    sigprocmask64(how, new, old)
}

/// The platform recovery hook, when the process has one.
pub(crate) fn android_handle_signal() -> Option<HandleSignalFn> {
    initialize();
    unsafe { HANDLE_SIGNAL }
}
