//! Stale-while-revalidate cache used by the inventory client and other
//! readers that front the upstream inventory API and metrics store.

mod swr;

pub use swr::{L2Store, SwrCache};
