//! Reactor core and event handling.
//!
//! This module implements the multi-threaded event multiplexer:
//! - N selector threads, each owning one poller and the registration
//!   state for the channels assigned to it,
//! - a facade that shards channels across the selectors with sticky
//!   affinity and accepts work from any thread,
//! - background task offload into a shared worker pool, tracked by the
//!   statistics ledger.
//!
//! Client code interacts with the reactor through the `wait_for_*`
//! registration calls and the handler traits in [`handler`].

mod builder;
mod core;
mod runner;

pub(crate) mod command;
pub(crate) mod event;
pub(crate) mod poller;

pub mod handler;

pub use builder::ReactorBuilder;
pub use self::core::Reactor;
