//! Signal sets and signal actions, at both widths.
//!
//! Bionic carries two widths of `sigset_t` and `struct sigaction`: the
//! legacy narrow forms and the `*64` forms that cover the real-time
//! signals on 32-bit targets. The traits here give the rest of the crate
//! one vocabulary over both; which width is in play is decided only at
//! the exported entry points.

use core::ffi::c_int;
use core::mem::size_of;
use core::slice;

use crate::linked;

/// The widest signal set the platform offers. Chain records store this
/// width.
#[cfg(target_os = "android")]
pub(crate) type KernelSigset = libc::sigset64_t;
#[cfg(not(target_os = "android"))]
pub(crate) type KernelSigset = libc::sigset_t;

/// The sigaction form matching [`KernelSigset`].
#[cfg(target_os = "android")]
pub(crate) type KernelSigaction = libc::sigaction64;
#[cfg(not(target_os = "android"))]
pub(crate) type KernelSigaction = libc::sigaction;

/// The largest signal number the kernel supports; valid signals are
/// `1..=MAX_SIGNAL`.
pub(crate) const MAX_SIGNAL: c_int = linux_raw_sys::general::_NSIG as c_int;

/// A signal set of either width.
pub(crate) trait Sigset: Copy {
    /// The empty set.
    fn empty() -> Self;

    /// The set of every signal.
    fn fill() -> Self;

    fn add(&mut self, signo: c_int);

    fn del(&mut self, signo: c_int);

    fn has(&self, signo: c_int) -> bool;

    /// Call the real `sigprocmask` of this width.
    unsafe fn linked_sigprocmask(how: c_int, new: *const Self, old: *mut Self) -> c_int;
}

impl Sigset for libc::sigset_t {
    fn empty() -> Self {
        let mut set = unsafe { core::mem::zeroed() };
        unsafe { libc::sigemptyset(&mut set) };
        set
    }

    fn fill() -> Self {
        let mut set = unsafe { core::mem::zeroed() };
        unsafe { libc::sigfillset(&mut set) };
        set
    }

    fn add(&mut self, signo: c_int) {
        unsafe { libc::sigaddset(self, signo) };
    }

    fn del(&mut self, signo: c_int) {
        unsafe { libc::sigdelset(self, signo) };
    }

    fn has(&self, signo: c_int) -> bool {
        (unsafe { libc::sigismember(self, signo) }) == 1
    }

    unsafe fn linked_sigprocmask(how: c_int, new: *const Self, old: *mut Self) -> c_int {
        linked::sigprocmask(how, new, old)
    }
}

#[cfg(target_os = "android")]
impl Sigset for libc::sigset64_t {
    fn empty() -> Self {
        let mut set = unsafe { core::mem::zeroed() };
        unsafe { libc::sigemptyset64(&mut set) };
        set
    }

    fn fill() -> Self {
        let mut set = unsafe { core::mem::zeroed() };
        unsafe { libc::sigfillset64(&mut set) };
        set
    }

    fn add(&mut self, signo: c_int) {
        unsafe { libc::sigaddset64(self, signo) };
    }

    fn del(&mut self, signo: c_int) {
        unsafe { libc::sigdelset64(self, signo) };
    }

    fn has(&self, signo: c_int) -> bool {
        (unsafe { libc::sigismember64(self, signo) }) == 1
    }

    unsafe fn linked_sigprocmask(how: c_int, new: *const Self, old: *mut Self) -> c_int {
        linked::sigprocmask64(how, new, old)
    }
}

/// The union of two sets, bit by bit over the valid signal numbers.
///
/// Neither libc exports a union operation at every width.
pub(crate) fn union_of<S: Sigset>(left: &S, right: &S) -> S {
    let mut dest = S::empty();
    for signo in 1..=MAX_SIGNAL {
        if left.has(signo) || right.has(signo) {
            dest.add(signo);
        }
    }
    dest
}

/// A signal action of either width.
pub(crate) trait Sigaction: Copy {
    /// The signal-set width this action carries.
    type Set: Sigset;

    /// The all-defaults action: `SIG_DFL`, no flags, empty mask.
    fn zeroed() -> Self {
        unsafe { core::mem::zeroed() }
    }

    fn flags(&self) -> c_int;

    fn set_flags(&mut self, flags: c_int);

    /// The handler as raw storage; `SIG_DFL`/`SIG_IGN` or a function
    /// address of either arity.
    fn handler(&self) -> libc::sighandler_t;

    fn set_handler(&mut self, handler: libc::sighandler_t);

    fn restorer(&self) -> Option<extern "C" fn()>;

    fn set_restorer(&mut self, restorer: Option<extern "C" fn()>);

    fn mask(&self) -> Self::Set;

    fn set_mask(&mut self, mask: Self::Set);

    /// The mask as raw bytes, for conversions across widths.
    fn mask_bytes(&self) -> &[u8];

    fn mask_bytes_mut(&mut self) -> &mut [u8];

    /// Call the real `sigaction` of this width.
    unsafe fn linked_sigaction(signo: c_int, new: *const Self, old: *mut Self) -> c_int;
}

impl Sigaction for libc::sigaction {
    type Set = libc::sigset_t;

    fn flags(&self) -> c_int {
        self.sa_flags
    }

    fn set_flags(&mut self, flags: c_int) {
        self.sa_flags = flags;
    }

    fn handler(&self) -> libc::sighandler_t {
        self.sa_sigaction
    }

    fn set_handler(&mut self, handler: libc::sighandler_t) {
        self.sa_sigaction = handler;
    }

    fn restorer(&self) -> Option<extern "C" fn()> {
        self.sa_restorer
    }

    fn set_restorer(&mut self, restorer: Option<extern "C" fn()>) {
        self.sa_restorer = restorer;
    }

    fn mask(&self) -> Self::Set {
        self.sa_mask
    }

    fn set_mask(&mut self, mask: Self::Set) {
        self.sa_mask = mask;
    }

    fn mask_bytes(&self) -> &[u8] {
        unsafe {
            slice::from_raw_parts(
                core::ptr::addr_of!(self.sa_mask).cast::<u8>(),
                size_of::<Self::Set>(),
            )
        }
    }

    fn mask_bytes_mut(&mut self) -> &mut [u8] {
        unsafe {
            slice::from_raw_parts_mut(
                core::ptr::addr_of_mut!(self.sa_mask).cast::<u8>(),
                size_of::<Self::Set>(),
            )
        }
    }

    unsafe fn linked_sigaction(signo: c_int, new: *const Self, old: *mut Self) -> c_int {
        linked::sigaction(signo, new, old)
    }
}

#[cfg(target_os = "android")]
impl Sigaction for libc::sigaction64 {
    type Set = libc::sigset64_t;

    fn flags(&self) -> c_int {
        self.sa_flags
    }

    fn set_flags(&mut self, flags: c_int) {
        self.sa_flags = flags;
    }

    fn handler(&self) -> libc::sighandler_t {
        self.sa_sigaction
    }

    fn set_handler(&mut self, handler: libc::sighandler_t) {
        self.sa_sigaction = handler;
    }

    fn restorer(&self) -> Option<extern "C" fn()> {
        self.sa_restorer
    }

    fn set_restorer(&mut self, restorer: Option<extern "C" fn()>) {
        self.sa_restorer = restorer;
    }

    fn mask(&self) -> Self::Set {
        self.sa_mask
    }

    fn set_mask(&mut self, mask: Self::Set) {
        self.sa_mask = mask;
    }

    fn mask_bytes(&self) -> &[u8] {
        unsafe {
            slice::from_raw_parts(
                core::ptr::addr_of!(self.sa_mask).cast::<u8>(),
                size_of::<Self::Set>(),
            )
        }
    }

    fn mask_bytes_mut(&mut self) -> &mut [u8] {
        unsafe {
            slice::from_raw_parts_mut(
                core::ptr::addr_of_mut!(self.sa_mask).cast::<u8>(),
                size_of::<Self::Set>(),
            )
        }
    }

    unsafe fn linked_sigaction(signo: c_int, new: *const Self, old: *mut Self) -> c_int {
        linked::sigaction64(signo, new, old)
    }
}

/// Copy an action across widths.
///
/// Handler, flags, and restorer carry over; the mask keeps the
/// intersection the narrower width can represent, with the rest left
/// empty.
pub(crate) fn convert<Src: Sigaction, Dst: Sigaction>(src: &Src) -> Dst {
    let mut dst = Dst::zeroed();
    dst.set_flags(src.flags());
    dst.set_handler(src.handler());
    dst.set_restorer(src.restorer());
    dst.set_mask(Dst::Set::empty());

    let len = src.mask_bytes().len().min(dst.mask_bytes_mut().len());
    dst.mask_bytes_mut()[..len].copy_from_slice(&src.mask_bytes()[..len]);
    dst
}
