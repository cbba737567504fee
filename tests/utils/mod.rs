#![allow(dead_code)]

use std::mem;

/// An empty `sigset_t`.
pub fn empty_sigset() -> libc::sigset_t {
    unsafe {
        let mut set = mem::zeroed();
        libc::sigemptyset(&mut set);
        set
    }
}

/// A `SigchainAction` with an empty mask and the given flags.
pub fn special_action(handler: sigchain::SigchainHandler, flags: u64) -> sigchain::SigchainAction {
    sigchain::SigchainAction {
        sc_sigaction: Some(handler),
        sc_mask: empty_sigset(),
        sc_flags: flags,
    }
}

/// Raise `signo` on the calling thread.
pub fn raise(signo: libc::c_int) {
    assert_eq!(unsafe { libc::raise(signo) }, 0);
}
