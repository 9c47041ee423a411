//! Loading Module - Batched prefetching of reverse and many-to-many
//! relationships

pub mod prefetch;

pub use prefetch::{PrefetchPayload, PrefetchSet, Prefetcher};
