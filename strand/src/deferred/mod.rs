//! Single-assignment deferred results.
//!
//! A [`Deferred`] is the unit every other component of strand waits on:
//! the task driver suspends on it, queues and semaphores hand it out to
//! waiting producers and consumers, and hosts settle it when timers fire
//! or worker threads finish.
//!
//! This module provides:
//! - [`Deferred`], the slot itself, with observers, cancellation and
//!   derivation helpers,
//! - [`Event`], a one-to-many notification built on deferreds,
//! - [`succeed`] and [`fail`] shortcuts for already-settled deferreds,
//! - [`Deferred::log_errors`] for the end of chains nobody awaits.

mod core;
mod event;
mod wrap;

pub(crate) use core::{Offer, WeakDeferred};

pub use core::{Deferred, fail, succeed};
pub use event::Event;
