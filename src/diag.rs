//! Diagnostics that are safe to emit from signal context.
//!
//! Every message here goes through `atomic-dbg`, which formats into a
//! fixed buffer and issues a single `write` to stderr, with no allocation
//! and no locks. Ambient (non-signal-context) tracing uses the `log` crate and
//! is initialized separately below.

/// Log an unrecoverable error and abort the process.
///
/// Anything that implies the chain's internal invariants are broken is
/// fatal; continuing could silently corrupt signal delivery for the whole
/// process.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        ::atomic_dbg::eprintln!("sigchain: {}", ::core::format_args!($($arg)*));
        unsafe { ::libc::abort() }
    }};
}
pub(crate) use fatal;

/// Log a diagnostic. Callable from inside the dispatcher.
macro_rules! log_error {
    ($($arg:tt)*) => {
        ::atomic_dbg::eprintln!("sigchain: {}", ::core::format_args!($($arg)*));
    };
}
pub(crate) use log_error;

/// Trace an ambient event. Not for signal context.
macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "log")]
        ::log::trace!(target: "sigchain", $($arg)*);
    };
}
pub(crate) use trace;

/// Best-effort stack dump for fatal diagnostics paths.
///
/// The platform unwinder and `dladdr` are not formally async-signal-safe,
/// but this only runs on paths where the process is about to die or has
/// already lost a handler it needed; a truncated or garbled dump is still
/// better than none.
#[cfg(feature = "unwind")]
pub(crate) fn log_stack() {
    use core::ffi::{c_int, c_void, CStr};

    // The libc crate doesn't bind the unwinder; declare what we use.
    extern "C" {
        fn _Unwind_Backtrace(
            trace: extern "C" fn(*mut c_void, *mut c_void) -> c_int,
            arg: *mut c_void,
        ) -> c_int;
        fn _Unwind_GetIP(context: *mut c_void) -> usize;
    }

    const MAX_FRAMES: usize = 64;

    extern "C" fn frame(context: *mut c_void, arg: *mut c_void) -> c_int {
        let num = unsafe { &mut *arg.cast::<usize>() };
        if *num >= MAX_FRAMES {
            return 4; // UnwindReasonCode::NORMAL_STOP
        }

        let pc = unsafe { _Unwind_GetIP(context) };
        let mut info: libc::Dl_info = unsafe { core::mem::zeroed() };
        if unsafe { libc::dladdr(pc as *const c_void, &mut info) } != 0
            && !info.dli_sname.is_null()
        {
            let name = unsafe { CStr::from_ptr(info.dli_sname) };
            let offset = pc.saturating_sub(info.dli_saddr as usize);
            atomic_dbg::eprintln!(
                "  #{:02} pc {:#014x}  {}+{:#x}",
                num,
                pc,
                name.to_str().unwrap_or("???"),
                offset
            );
        } else if !info.dli_fname.is_null() {
            let name = unsafe { CStr::from_ptr(info.dli_fname) };
            let offset = pc.saturating_sub(info.dli_fbase as usize);
            atomic_dbg::eprintln!(
                "  #{:02} pc {:#014x}  {}+{:#x}",
                num,
                pc,
                name.to_str().unwrap_or("???"),
                offset
            );
        } else {
            atomic_dbg::eprintln!("  #{:02} pc {:#014x}  ???", num, pc);
        }

        *num += 1;
        0 // UnwindReasonCode::NO_REASON
    }

    let mut num: usize = 0;
    unsafe {
        _Unwind_Backtrace(frame, core::ptr::addr_of_mut!(num).cast());
    }
}

#[cfg(not(feature = "unwind"))]
pub(crate) fn log_stack() {}

/// Initialize logging, if enabled.
///
/// Runs late in `.init_array` so that environment-variable state is ready
/// before loggers that read e.g. `RUST_LOG`.
#[cfg(any(feature = "atomic-dbg-logger", feature = "env_logger"))]
#[link_section = ".init_array.00099"]
#[used]
static INIT_LOGGER: unsafe extern "C" fn() = {
    unsafe extern "C" fn function() {
        #[cfg(feature = "atomic-dbg-logger")]
        atomic_dbg::log::init();
        #[cfg(feature = "env_logger")]
        env_logger::init();

        crate::diag::trace!("logging initialized");
    }
    function
};

// The `cdylib` has no Rust runtime underneath it to provide this.
#[cfg(all(feature = "panic-handler-abort", not(feature = "std"), not(test)))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo<'_>) -> ! {
    unsafe { libc::abort() }
}
