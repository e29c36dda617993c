//! steerag-core: shared domain types for the attack-graph exploration
//! engine.
//!
//! Holds the privilege model, CVSS-derived vulnerabilities and their
//! feature vectors, network hosts, the immutable attack graph model, and
//! the metric/binning vocabulary every other crate speaks.

pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod vulns;

pub use config::EngineConfig;
pub use error::CoreError;
pub use metrics::{Metric, MetricCondition, MetricRange, Stability};
pub use model::{AttackGraphModel, NetworkHost};
pub use vulns::{BaseFeatures, Privilege, Vulnerability, VulnerabilityPool};
