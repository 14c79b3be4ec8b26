//! Keyword search: scanning, pass escalation, result caching, and the
//! trust-filtering orchestrator on top.

pub mod cache;
pub mod matcher;
pub mod orchestrator;
pub mod passes;
pub mod scanner;

pub use cache::{normalize_query, SearchCache};
pub use matcher::{LineMatcher, PassKind};
pub use orchestrator::{
    Counts, RequestLimits, SearchDebug, SearchError, SearchOrchestrator, SearchRequest,
    SearchResponse, WHITELIST_UNAVAILABLE,
};
pub use passes::{ContentResult, ContentSearch, PassLimits, PassOutcome, PassTiming};
pub use scanner::{
    ChunkStream, ContentScanner, JsonlFileScanner, MemoryScanner, ScanError, ScanFilter,
    StrfryScanner,
};
