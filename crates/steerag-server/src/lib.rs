//! steerag-server: the multi-query coordinator.
//!
//! Runs one isolated worker per analyst query, mediates step and analysis
//! commands, and publishes per-query summaries through a shared map. The
//! web transport sits outside this crate; the command/result enums are
//! its contract.

pub mod analysis;
pub mod coordinator;
pub mod error;
pub mod pool;
pub mod shared;
pub(crate) mod worker;

pub use coordinator::{Command, CoordResult, Coordinator};
pub use error::ServerError;
pub use pool::{QueryInfo, QueryPool};
pub use shared::{new_shared_map, QuerySharedState, SharedMap, SharedSummary};
