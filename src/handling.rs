//! Which signals this thread is handling right now.
//!
//! One bit per signal, stored in pthread thread-locals, with one key per
//! machine word of bits. Everything here runs inside signal handlers, so
//! the store leans entirely on the libc's `pthread_getspecific` /
//! `pthread_setspecific` being async-signal-safe; a mutex-protected
//! table would not be usable from this context.

use core::ffi::{c_int, c_void};
use core::sync::atomic::{compiler_fence, Ordering};

use rustix_futex_sync::Once;

use crate::action::MAX_SIGNAL;
use crate::diag::fatal;

const BITS_PER_KEY: usize = usize::BITS as usize;
const KEY_COUNT: usize = (MAX_SIGNAL as usize + BITS_PER_KEY - 1) / BITS_PER_KEY;

static KEYS_INIT: Once = Once::new();
static mut KEYS: [libc::pthread_key_t; KEY_COUNT] = [0; KEY_COUNT];

fn key(index: usize) -> libc::pthread_key_t {
    KEYS_INIT.call_once(|| {
        for slot in 0..KEY_COUNT {
            let mut key = 0;
            let rc = unsafe { libc::pthread_key_create(&mut key, None) };
            if rc != 0 {
                fatal!(
                    "failed to create signal-chain pthread key: {:?}",
                    rustix::io::Errno::from_raw_os_error(rc)
                );
            }
            unsafe {
                KEYS[slot] = key;
            }
        }
    });

    unsafe { KEYS[index] }
}

fn locate(signo: c_int) -> (usize, usize) {
    let bit = (signo - 1) as usize;
    (bit / BITS_PER_KEY, bit % BITS_PER_KEY)
}

fn word(index: usize) -> usize {
    unsafe { libc::pthread_getspecific(key(index)) as usize }
}

/// Whether this thread is inside the chain handler for any signal.
pub(crate) fn any() -> bool {
    (0..KEY_COUNT).any(|index| word(index) != 0)
}

/// Whether this thread is inside the chain handler for `signo`.
pub(crate) fn get(signo: c_int) -> bool {
    let (index, bit) = locate(signo);
    word(index) & (1 << bit) != 0
}

/// Set or clear the handling bit for `signo`, returning the previous
/// value.
///
/// The fences keep the compiler from moving the bitmap update across the
/// surrounding signal-handler code.
pub(crate) fn set(signo: c_int, value: bool) -> bool {
    let (index, bit) = locate(signo);
    let key = key(index);
    let mask = 1_usize << bit;

    compiler_fence(Ordering::SeqCst);
    let mut bitmap = unsafe { libc::pthread_getspecific(key) } as usize;
    let previous = bitmap & mask != 0;
    if value {
        bitmap |= mask;
    } else {
        bitmap &= !mask;
    }
    unsafe {
        libc::pthread_setspecific(key, bitmap as *const c_void);
    }
    compiler_fence(Ordering::SeqCst);

    previous
}

/// The raw bitmap word covering `signo`, and the value it would hold if
/// `signo` were the only signal being handled. Diagnostics only.
#[cfg(target_arch = "aarch64")]
pub(crate) fn word_and_expected(signo: c_int) -> (usize, usize) {
    let (index, bit) = locate(signo);
    (word(index), 1_usize << bit)
}

/// Holds the handling bit for the extent of a scope.
///
/// Captures the prior bit, optionally sets it, and restores the prior
/// value on drop. This is the only construct that toggles the bit
/// temporarily.
pub(crate) struct ScopedHandling {
    signo: c_int,
    previous: bool,
}

impl ScopedHandling {
    pub(crate) fn new(signo: c_int, set_bit: bool) -> Self {
        let previous = if set_bit { set(signo, true) } else { get(signo) };
        Self { signo, previous }
    }
}

impl Drop for ScopedHandling {
    fn drop(&mut self) {
        set(self.signo, self.previous);
    }
}
