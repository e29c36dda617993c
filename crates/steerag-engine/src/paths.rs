//! Attack paths: privilege-consistent exploit chains over a reachability
//! walk, with derived metrics and a stable trace fingerprint.
//!
//! The trace string is the canonical identity of a path. Steps are joined
//! by `##`; each step reads `<priv>@<src>#<cve>#<priv>@<dst>`. Note that
//! the source-side privilege recorded in a step is the privilege gained by
//! that same step, not the one held before it; this mirrors how every
//! existing store and bootstrap trace was written, so it must not change.

use std::collections::HashSet;
use std::sync::Arc;

use rand::Rng;
use sha2::{Digest, Sha256};

use steerag_core::vulns::{median_f64, BaseFeatures, Privilege, Vulnerability};
use steerag_core::{AttackGraphModel, CoreError};
use steerag_store::PathRecord;

use crate::sampling::Edge;

/// An exploit chain escalating from a foothold to a target host.
#[derive(Debug, Clone)]
pub struct AttackPath {
    pub trace: String,
    pub length: usize,

    /// Mean exploitability over the chain.
    pub likelihood: f64,
    /// Impact on the final target.
    pub impact: f64,
    /// Median base score over the chain.
    pub score: f64,
    /// `likelihood · impact / 10`.
    pub risk: f64,
    /// Mean impact over the chain.
    pub damage: f64,

    /// SHA-256 of the trace, hex encoded.
    pub hash: String,
    pub vulns: Vec<Arc<Vulnerability>>,
    pub edges: Vec<Edge>,
}

impl AttackPath {
    /// Derive the metrics and fingerprint from an exploited chain.
    /// `vulns` must be non-empty and pair up with `edges`.
    pub fn new(trace: String, vulns: Vec<Arc<Vulnerability>>, edges: Vec<Edge>) -> Self {
        debug_assert_eq!(vulns.len(), edges.len());
        debug_assert!(!vulns.is_empty());

        let length = vulns.len();
        let likelihood =
            vulns.iter().map(|v| v.likelihood()).sum::<f64>() / length as f64;
        let impact = vulns.last().map(|v| v.impact()).unwrap_or_default();
        let score = median_f64(vulns.iter().map(|v| v.score()).collect());
        let risk = likelihood * impact / 10.0;
        let damage = vulns.iter().map(|v| v.impact()).sum::<f64>() / length as f64;

        let hash = hex::encode(Sha256::digest(trace.as_bytes()));

        Self {
            trace,
            length,
            likelihood,
            impact,
            score,
            risk,
            damage,
            hash,
            vulns,
            edges,
        }
    }

    pub fn source_host(&self) -> u32 {
        self.edges[0].0
    }

    pub fn target_host(&self) -> u32 {
        self.edges[self.edges.len() - 1].1
    }

    /// Every host touched by the path.
    pub fn hosts(&self) -> HashSet<u32> {
        self.edges
            .iter()
            .flat_map(|&(source, target)| [source, target])
            .collect()
    }

    /// Classifier features: element-wise median over the chain's
    /// vulnerability features.
    pub fn feature_vector(&self) -> BaseFeatures {
        let features: Vec<BaseFeatures> =
            self.vulns.iter().map(|v| v.base_features.clone()).collect();
        BaseFeatures::median(&features)
    }

    /// Rebuild a path from its trace, resolving vulnerabilities from the
    /// model pool.
    pub fn from_trace(trace: &str, model: &AttackGraphModel) -> Result<Self, CoreError> {
        let mut edges = Vec::new();
        let mut vulns = Vec::new();

        for step in trace.split("##") {
            let mut fields = step.split('#');
            let (Some(source), Some(cve), Some(target), None) = (
                fields.next(),
                fields.next(),
                fields.next(),
                fields.next(),
            ) else {
                return Err(CoreError::InvalidTrace(step.to_string()));
            };

            edges.push((parse_endpoint(source)?, parse_endpoint(target)?));
            vulns.push(model.vulnerability(cve)?);
        }

        if vulns.is_empty() {
            return Err(CoreError::InvalidTrace(trace.to_string()));
        }
        Ok(Self::new(trace.to_string(), vulns, edges))
    }

    /// Row shape for the persistent store.
    pub fn record(&self) -> PathRecord {
        PathRecord {
            hash: self.hash.clone(),
            trace: self.trace.clone(),
            likelihood: self.likelihood,
            impact: self.impact,
            score: self.score,
            risk: self.risk,
            damage: self.damage,
            length: self.length,
            source: self.source_host(),
            target: self.target_host(),
        }
    }
}

/// Parse a `<priv>@<host_id>` trace field, validating the privilege name.
fn parse_endpoint(field: &str) -> Result<u32, CoreError> {
    let (privilege, host) = field
        .split_once('@')
        .ok_or_else(|| CoreError::InvalidTrace(field.to_string()))?;
    privilege.parse::<Privilege>()?;
    host.parse::<u32>()
        .map_err(|_| CoreError::InvalidTrace(field.to_string()))
}

/// Convert a reachability walk into an attack path.
///
/// Each hop samples a CVE on the target host exploitable with the
/// privilege currently held; an unexploitable hop truncates the path. A
/// walk whose very first hop is unexploitable yields `None`.
pub fn build_attack_path<R: Rng + ?Sized>(
    model: &AttackGraphModel,
    walk: &[Edge],
    preferred: Option<&HashSet<String>>,
    rng: &mut R,
) -> Option<AttackPath> {
    let mut priv_on_source = Privilege::Guest;
    let mut vulns: Vec<Arc<Vulnerability>> = Vec::new();
    let mut steps: Vec<String> = Vec::new();

    for &(source, target) in walk {
        let Some(cve) = model.sample_cve_on_host(target, priv_on_source, preferred, rng) else {
            break;
        };
        let Ok(vuln) = model.vulnerability(&cve) else {
            break;
        };

        let priv_gained = vuln.priv_gained;
        priv_on_source = priv_gained;
        vulns.push(vuln);
        steps.push(format!(
            "{priv_on_source}@{source}#{cve}#{priv_gained}@{target}"
        ));
    }

    if vulns.is_empty() {
        return None;
    }

    let trace = steps.join("##");
    let length = vulns.len();
    Some(AttackPath::new(trace, vulns, walk[..length].to_vec()))
}
