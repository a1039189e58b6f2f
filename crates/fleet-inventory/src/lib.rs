//! Inventory client for the upstream container management API.
//!
//! Wraps endpoint, container, exec, and edge-job operations behind a
//! per-endpoint circuit breaker and an SWR cache so the monitoring cycle
//! can fan out reads without hammering a degraded endpoint.

mod client;

pub use client::{InventoryClient, RawContainer};
