#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]

mod action;
mod api;
mod chain;
mod diag;
mod handling;
mod linked;

#[cfg(all(target_os = "android", target_pointer_width = "32"))]
pub use api::bsd_signal;
#[cfg(target_os = "android")]
pub use api::{sigaction64, sigprocmask64};
pub use api::{
    sigaction, signal, sigprocmask, AddSpecialSignalHandlerFn, EnsureFrontOfChain,
    RemoveSpecialSignalHandlerFn, SkipAddSignalHandler,
};
pub use chain::{SigchainAction, SigchainHandler, SIGCHAIN_ALLOW_NORETURN};
