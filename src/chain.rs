//! Per-signal chain records and the handler that runs them.
//!
//! For every claimed signal the kernel-installed handler is [`dispatch`];
//! the disposition the application asked for lives only in that signal's
//! [`SignalChain`] record. Dispatch order is: the runtime's special
//! handlers, then the platform recovery hook, then the chained user
//! action with the mask and flag semantics it expects.

use core::cell::UnsafeCell;
use core::ffi::{c_int, c_void};
use core::mem;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::action::{
    convert, union_of, KernelSigaction, KernelSigset, Sigaction, Sigset, MAX_SIGNAL,
};
use crate::diag::{fatal, log_error, trace};
use crate::handling::{self, ScopedHandling};
use crate::linked;

// The libc headers don't carry these yet; the values are fixed kernel ABI.
const SA_UNSUPPORTED: c_int = 0x0000_0400;
const SA_EXPOSE_TAGBITS: c_int = 0x0000_0800;
#[cfg(not(target_arch = "riscv64"))]
const SA_RESTORER: c_int = linux_raw_sys::general::SA_RESTORER as c_int;

/// A special handler the runtime registers for first look at a signal.
///
/// Layout-compatible with the C declaration runtimes use to talk to the
/// chain, so the same struct works across the `extern "C"` boundary.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SigchainAction {
    /// First-look handler. Returning `true` consumes the signal and stops
    /// the chain.
    pub sc_sigaction: Option<SigchainHandler>,
    /// Signal mask installed while `sc_sigaction` runs.
    pub sc_mask: KernelSigset,
    /// `SIGCHAIN_*` flag bits.
    pub sc_flags: u64,
}

/// A special-handler function: `(signo, siginfo, ucontext) -> handled`.
pub type SigchainHandler =
    unsafe extern "C" fn(c_int, *mut libc::siginfo_t, *mut c_void) -> bool;

/// The handler promises it may never return, so the dispatcher must not
/// rely on any cleanup after calling it.
pub const SIGCHAIN_ALLOW_NORETURN: u64 = 0x1;

const HANDLER_CAPACITY: usize = 2;

/// One signal's chain state.
pub(crate) struct SignalChain {
    claimed: AtomicBool,
    kernel_supported_flags: c_int,
    action: KernelSigaction,
    orig_action: KernelSigaction,
    special_handlers: [SigchainAction; HANDLER_CAPACITY],
}

const CHAIN_COUNT: usize = MAX_SIGNAL as usize + 1;

/// All chain records, indexed by signal number. Slot 0 is never used.
///
/// Zero-initialized in BSS. Written only on the interposed-API paths;
/// the dispatcher only reads. Registering or removing handlers while the
/// process may already be delivering that signal is the caller's race to
/// avoid.
struct Chains(UnsafeCell<[SignalChain; CHAIN_COUNT]>);

// SAFETY: access follows the discipline described above.
unsafe impl Sync for Chains {}

static CHAINS: Chains = Chains(UnsafeCell::new(unsafe { mem::zeroed() }));

/// The chain record for `signo`. Callers validate the range.
pub(crate) fn chain(signo: c_int) -> *mut SignalChain {
    unsafe { CHAINS.0.get().cast::<SignalChain>().add(signo as usize) }
}

impl SignalChain {
    pub(crate) fn claimed(&self) -> bool {
        self.claimed.load(Ordering::Relaxed)
    }

    /// Take over `signo`. Idempotent; the first call registers the
    /// dispatcher with the kernel.
    pub(crate) unsafe fn claim(&mut self, signo: c_int) {
        if !self.claimed() {
            self.register(signo);
            self.claimed.store(true, Ordering::Relaxed);
        }
    }

    /// Install the dispatcher for `signo`, capturing the previous
    /// disposition, and probe which sigaction flags this kernel honors.
    pub(crate) unsafe fn register(&mut self, signo: c_int) {
        let mut handler_action = KernelSigaction::zeroed();
        handler_action.set_mask(KernelSigset::fill());
        handler_action.set_handler(dispatch as libc::sighandler_t);
        handler_action.set_flags(
            libc::SA_RESTART
                | libc::SA_SIGINFO
                | libc::SA_ONSTACK
                | SA_UNSUPPORTED
                | SA_EXPOSE_TAGBITS,
        );

        KernelSigaction::linked_sigaction(signo, &handler_action, &mut self.action);
        self.orig_action = self.action;
        KernelSigaction::linked_sigaction(signo, core::ptr::null(), &mut handler_action);

        // Kernels that implement the flag-support detection protocol clear
        // any flag bits they don't recognize on read-back; older kernels
        // don't, and give us no way to ask. Start from a baseline of flags
        // that have been supported everywhere for decades. The protocol
        // itself is detected through `SA_UNSUPPORTED`, a permanently
        // reserved bit: if the kernel cleared it, the kernel speaks the
        // protocol, and `SA_EXPOSE_TAGBITS` surviving the round trip means
        // that flag is honored.
        let mut supported = libc::SA_NOCLDSTOP
            | libc::SA_NOCLDWAIT
            | libc::SA_SIGINFO
            | libc::SA_ONSTACK
            | libc::SA_RESTART
            | libc::SA_NODEFER
            | libc::SA_RESETHAND;
        #[cfg(not(target_arch = "riscv64"))]
        {
            supported |= SA_RESTORER;
        }

        let read_back = handler_action.flags();
        if read_back & SA_UNSUPPORTED == 0 && read_back & SA_EXPOSE_TAGBITS != 0 {
            supported |= SA_EXPOSE_TAGBITS;
        }
        self.kernel_supported_flags = supported;

        trace!(
            "registered dispatcher for signal {signo}, kernel-supported flags {supported:#x}"
        );
    }

    /// The current user action, at the caller's width.
    pub(crate) fn get_action<A: Sigaction>(&self) -> A {
        convert(&self.action)
    }

    /// Store the user's action, keeping only the flag bits the kernel
    /// honors.
    pub(crate) fn set_action<A: Sigaction>(&mut self, new_action: &A) {
        let mut action: KernelSigaction = convert(new_action);
        action.set_flags(action.flags() & self.kernel_supported_flags);
        self.action = action;
    }

    /// Append a special handler. Exhausting the table is fatal.
    pub(crate) fn add_special_handler(&mut self, sa: &SigchainAction) {
        for slot in &mut self.special_handlers {
            if slot.sc_sigaction.is_none() {
                *slot = *sa;
                return;
            }
        }

        fatal!("too many special signal handlers");
    }

    /// Remove a special handler by function identity, keeping the rest in
    /// order.
    pub(crate) fn remove_special_handler(&mut self, fn_: SigchainHandler) {
        let len = self.special_handlers.len();
        for i in 0..len {
            if self.special_handlers[i].sc_sigaction == Some(fn_) {
                for j in i..len - 1 {
                    self.special_handlers[j] = self.special_handlers[j + 1];
                }
                self.special_handlers[len - 1].sc_sigaction = None;
                return;
            }
        }

        fatal!("failed to find special handler to remove");
    }
}

/// The one signal handler installed with the kernel for every claimed
/// signal.
pub(crate) unsafe extern "C" fn dispatch(
    signo: c_int,
    siginfo: *mut libc::siginfo_t,
    ucontext: *mut c_void,
) {
    let record = &*chain(signo);

    // Special handlers get the first look, unless this is a re-entry. A
    // special handler that faults lands back here with the handling bit
    // still set, and its crash has to go to the user action rather than
    // loop through the handler that caused it.
    if !handling::get(signo) {
        for handler in &record.special_handlers {
            let Some(fn_) = handler.sc_sigaction else { break };

            // A handler that may never return would leave the bit set
            // forever; skip the bookkeeping for those.
            let noreturn = handler.sc_flags & SIGCHAIN_ALLOW_NORETURN != 0;

            let mut previous_mask = KernelSigset::empty();
            KernelSigset::linked_sigprocmask(
                libc::SIG_SETMASK,
                &handler.sc_mask,
                &mut previous_mask,
            );

            let _restorer = ScopedHandling::new(signo, !noreturn);

            if fn_(signo, siginfo, ucontext) {
                return;
            }

            KernelSigset::linked_sigprocmask(
                libc::SIG_SETMASK,
                &previous_mask,
                core::ptr::null_mut(),
            );
        }
    } else {
        // A word that isn't exactly this signal's bit means nested
        // handling of several signals, or a corrupted thread-local. Log
        // the raw value to make the rare crash reports diagnosable.
        #[cfg(target_arch = "aarch64")]
        {
            let (value, expected) = handling::word_and_expected(signo);
            if value != expected {
                log_error!(
                    "already handling signal {signo}, value={value:#x} differs from expected={expected:#x}"
                );
            }
        }
    }

    // The platform may be able to recover the fault transparently (e.g. a
    // crash service that downgrades a recoverable heap-corruption report);
    // give it the chance before the user action runs.
    if let Some(handle_signal) = linked::android_handle_signal() {
        if handle_signal(signo, siginfo, ucontext) {
            return;
        }
    }

    #[allow(unused_mut)]
    let mut action = &record.action;

    #[cfg(target_os = "android")]
    {
        // Tag-check faults can be downgraded by the allocator; those go to
        // the disposition installed before the chain claimed SIGSEGV, not
        // to the chained user action.
        let si_code = (*siginfo).si_code;
        if signo == libc::SIGSEGV
            && matches!(si_code, SEGV_MTEAERR | SEGV_MTESERR)
            && libc::mallopt(M_BIONIC_SIGCHAINLIB_SHOULD_INTERCEPT_MTE_SIGSEGV, 0) == 1
        {
            log_error!("reverting to the original action for MTE SIGSEGV, si_code {si_code}");
            action = &(*chain(libc::SIGSEGV)).orig_action;
        }
    }

    // Build the mask the user action expects: the mask the interrupted
    // context had, plus the action's own mask, plus this signal unless the
    // action asked not to defer it.
    let handler_flags = action.flags();
    let context_mask = ucontext_mask(ucontext);
    let mut mask = union_of(&context_mask, &action.mask());
    if handler_flags & libc::SA_NODEFER == 0 {
        mask.add(signo);
    }
    KernelSigset::linked_sigprocmask(libc::SIG_SETMASK, &mask, core::ptr::null_mut());

    if handler_flags & libc::SA_SIGINFO != 0 {
        #[cfg(target_os = "android")]
        strip_tag_bits(signo, siginfo, handler_flags);

        let sa_sigaction: unsafe extern "C" fn(c_int, *mut libc::siginfo_t, *mut c_void) =
            mem::transmute(action.handler());
        sa_sigaction(signo, siginfo, ucontext);
    } else {
        match action.handler() {
            libc::SIG_IGN => {}
            libc::SIG_DFL => {
                // Whatever handles the crash next can't see our ucontext
                // (we're on an alternate stack), so put the kernel default
                // back and return; the crash recurs from the original
                // context and the kernel takes it from there.
                log_error!("reverting to SIG_DFL handler for signal {signo}, ucontext {ucontext:p}");
                crate::diag::log_stack();
                let dfl = <libc::sigaction as Sigaction>::zeroed();
                linked::sigaction(signo, &dfl, core::ptr::null_mut());
            }
            handler => {
                let handler: unsafe extern "C" fn(c_int) = mem::transmute(handler);
                handler(signo);
            }
        }
    }
}

/// The signal mask saved in an interrupted context.
///
/// Bionic keeps the full 64-bit mask in `uc_sigmask` plus the padding
/// that follows it, so reading the kernel-width set from the field's
/// address is valid at both widths.
unsafe fn ucontext_mask(ucontext: *mut c_void) -> KernelSigset {
    let ucontext = ucontext.cast::<libc::ucontext_t>();
    #[cfg(target_os = "android")]
    {
        core::ptr::addr_of!((*ucontext).uc_sigmask)
            .cast::<KernelSigset>()
            .read()
    }
    #[cfg(not(target_os = "android"))]
    {
        (*ucontext).uc_sigmask
    }
}

#[cfg(target_os = "android")]
const SEGV_MTEAERR: c_int = linux_raw_sys::general::SEGV_MTEAERR as c_int;
#[cfg(target_os = "android")]
const SEGV_MTESERR: c_int = linux_raw_sys::general::SEGV_MTESERR as c_int;

// Bionic's private mallopt query for whether MTE faults should bypass the
// chain; <malloc.h> doesn't export it.
#[cfg(target_os = "android")]
const M_BIONIC_SIGCHAINLIB_SHOULD_INTERCEPT_MTE_SIGSEGV: c_int = -205;

/// Clear tag bits from the fault address before handing `siginfo` to a
/// handler that hasn't opted into seeing them.
///
/// Only synchronous fault signals carry a fault address, and
/// hardware-breakpoint traps carry a code address instead; everything
/// else is left alone.
#[cfg(target_os = "android")]
unsafe fn strip_tag_bits(signo: c_int, siginfo: *mut libc::siginfo_t, handler_flags: c_int) {
    const SI_USER: c_int = linux_raw_sys::general::SI_USER as c_int;
    const SI_KERNEL: c_int = linux_raw_sys::general::SI_KERNEL as c_int;
    const TRAP_HWBKPT: c_int = linux_raw_sys::general::TRAP_HWBKPT as c_int;

    // The fault layout of siginfo: three header words, then the address.
    #[repr(C)]
    struct SigfaultInfo {
        si_signo: c_int,
        si_errno: c_int,
        si_code: c_int,
        si_addr: *mut c_void,
    }

    if handler_flags & SA_EXPOSE_TAGBITS != 0 {
        return;
    }
    if !matches!(
        signo,
        libc::SIGILL | libc::SIGFPE | libc::SIGSEGV | libc::SIGBUS | libc::SIGTRAP
    ) {
        return;
    }
    let code = (*siginfo).si_code;
    if code <= SI_USER || code >= SI_KERNEL {
        return;
    }
    if signo == libc::SIGTRAP && code == TRAP_HWBKPT {
        return;
    }

    let fault = siginfo.cast::<SigfaultInfo>();
    (*fault).si_addr = untag_address((*fault).si_addr);
}

#[cfg(target_os = "android")]
fn untag_address(addr: *mut c_void) -> *mut c_void {
    #[cfg(target_arch = "aarch64")]
    {
        ((addr as usize) & ((1 << 56) - 1)) as *mut c_void
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        addr
    }
}
