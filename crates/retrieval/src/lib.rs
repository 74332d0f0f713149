//! `ag-retrieval` — embedding-backed document matching.
//!
//! The engine resolves an embedder by id, pairs it with a document matcher
//! (the augmenter, cached per embedder + options digest), matches every
//! requested location with bounded concurrency, ranks by score, and emits
//! byte-budgeted pages. The vector index itself lives behind the
//! [`DocumentMatcher`] trait; this crate only consumes it.

pub mod augmenter;
pub mod embedder;
pub mod engine;
pub mod page;
pub mod sync;

pub use augmenter::{Augmenter, AugmenterCache, Document, DocumentMatcher, MatcherFactory};
pub use embedder::{Embedder, EmbedderFinder};
pub use engine::{AugmentRequest, AugmentResult, Engine};
pub use sync::{RemoteMetadata, RemoteUpstream, SyncResolver, UpstreamSyncConfig};
