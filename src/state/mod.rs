//! Shared concurrent state tables used across pipeline stages (§3, §5).
//!
//! Every table here follows the same shape: a [`dashmap::DashMap`] keyed by
//! source (`IpAddr` or `Uuid`) holding per-entry atomics/instants, mutated
//! only by its owning component and read by the maintenance sweeper for
//! eviction. No table holds a lock across an `.await` point.

pub mod blocklist;
pub mod connection;
pub mod rate;
pub mod ring;
