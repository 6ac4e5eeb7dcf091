//! Optimistic client-side collections and their minimal-delta writes.

pub mod delta;
pub mod poller;
pub mod store;

#[cfg(test)]
pub(crate) mod fake;

pub use delta::{diff, PatchEntry};
pub use poller::run_revalidation_poller;
pub use store::{CollectionSyncStore, MutationState, QuerySnapshot, RemoteCollection};
