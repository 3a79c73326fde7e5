//! Service modules for nestbook.
//!
//! The sync pipeline is wired left to right: an inbound webhook is verified
//! ([`webhook`]), classified and fanned out ([`dispatcher`]) onto the job
//! queue ([`queue`]), whose workers drive one full account cycle each
//! ([`sync`]): decrypt the access token ([`vault`]), page through the
//! provider ([`aggregator`]) and fold every page into the ledger
//! ([`reconciler`]). The scheduler ([`scheduler`]) enters the same pipeline
//! on a timer.

pub mod aggregator;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod reconciler;
pub mod scheduler;
pub mod store;
pub mod sync;
pub mod vault;
pub mod webhook;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use error::SyncError;
