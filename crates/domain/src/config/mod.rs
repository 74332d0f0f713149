mod agent;
mod pool;
pub mod retrieval;
mod snapshot;

pub use agent::*;
pub use pool::*;
pub use retrieval::{LocalRoot, MatchOptions, RetrievalConfig, UpstreamDb};
pub use snapshot::*;
