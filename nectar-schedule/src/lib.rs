// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

//! Block request scheduling for the nectar client layer.
//!
//! The scheduler is the single point deciding which block request the node
//! layer sends next, across every concurrent download. It composes three
//! self-contained structures, each behind its own mutex:
//!
//! - [`PendingKeys`]: routing key → waiting fetchers, so an arriving block
//!   (solicited or not) satisfies every request for its key at once;
//! - [`CooldownQueue`]: keys parked after repeated failures, released when
//!   their deadline passes;
//! - [`PriorityGrabArray`]: the structure requests are drawn from, by
//!   priority class, retry count and per-client fairness.
//!
//! The canonical lock order is pending keys → cooldown → grab array. No I/O
//! happens and no listener callback is invoked under any of them.

#![deny(missing_docs)]

mod config;
mod cooldown;
mod error;
mod grab;
mod listener;
mod pending;
mod priority;
mod scheduler;
mod starter;

pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use cooldown::CooldownQueue;
pub use error::Error;
pub use grab::{GrabCoords, PriorityGrabArray};
pub use listener::KeyListener;
pub use pending::{PendingKeys, Removal};
pub use priority::{PriorityClass, PriorityPolicy};
pub use scheduler::{NextRequest, Scheduler};
pub use starter::RequestStarter;

use core::fmt;

/// Handle of a fetcher registered with the scheduler.
///
/// The scheduler owns the table of live fetchers; everything else refers to
/// them through this id, so no back-pointer cycles exist.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FetcherId(u64);

impl FetcherId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for FetcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the client a request belongs to, the unit of scheduling
/// fairness.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ClientId(u64);

impl ClientId {
    /// Creates a new [`ClientId`].
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
