//! Platform-specific I/O poller abstraction.
//!
//! The poller is used by each selector runner to:
//! - wait for I/O readiness events,
//! - wake the runner when new selector tasks arrive,
//! - bound the wait by the earliest registered deadline.
//!
//! Only Unix targets are supported; Linux uses `epoll`.

pub(crate) mod common;

pub(crate) use common::Waker;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;
