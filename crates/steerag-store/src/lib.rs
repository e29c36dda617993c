//! steerag-store: persistence for generated attack paths.
//!
//! Each generator owns a SQL path sink (the `aps` table) and a CSV
//! iteration log. The joint-histogram queries used by the exploration UI
//! run against the global StatAG sink.

pub mod csvlog;
pub mod error;
pub mod joint;
pub mod store;

pub use csvlog::{IterationLog, IterationRow};
pub use error::StoreError;
pub use joint::joint_histograms;
pub use store::{PathRecord, PathStore};
