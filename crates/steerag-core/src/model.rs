//! The in-memory attack graph model: hosts, directed reachability edges,
//! and the vulnerability pool.
//!
//! The model is loaded once from a JSON file and stays immutable for the
//! lifetime of every generator reading it. Adjacency is kept as plain
//! vectors per host id, with predecessors pre-materialized so backward
//! walks cost the same as forward ones.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use rand::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::vulns::{Privilege, Vulnerability, VulnerabilityPool};

/// A single host of the modeled network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkHost {
    /// Unique host id within the network.
    pub id: u32,
    pub hostname: String,
    pub ipv4: String,
    /// All CVE ids present on the host.
    #[serde(default)]
    pub cves: Vec<String>,
    /// CVE ids grouped by the service CPE exposing them.
    #[serde(default)]
    pub services: HashMap<String, Vec<String>>,
    /// Protection domain the host belongs to.
    #[serde(default)]
    pub domain: u16,
    /// Layout coordinates, maintained by the UI.
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
}

/// On-disk shape of the model file.
#[derive(Serialize, Deserialize)]
struct ModelFile {
    hosts: Vec<NetworkHost>,
    edges: Vec<(u32, u32)>,
    vulnerabilities: Vec<Value>,
}

/// Directed reachability graph over host ids plus the vulnerability pool.
#[derive(Debug, Clone, Default)]
pub struct AttackGraphModel {
    hosts: HashMap<u32, NetworkHost>,
    /// Host ids in insertion order, for uniform random selection.
    host_ids: Vec<u32>,
    successors: HashMap<u32, Vec<u32>>,
    predecessors: HashMap<u32, Vec<u32>>,
    edges: Vec<(u32, u32)>,
    edge_set: HashSet<(u32, u32)>,
    pool: VulnerabilityPool,
}

impl AttackGraphModel {
    pub fn new(pool: VulnerabilityPool) -> Self {
        Self {
            pool,
            ..Self::default()
        }
    }

    /// Read the whole model from a JSON file.
    ///
    /// When `drop_missing` is false, any host CVE absent from the pool
    /// aborts the load with [`CoreError::Integrity`]; when true the
    /// dangling reference is removed instead.
    pub fn load_from_json(path: impl AsRef<Path>, drop_missing: bool) -> Result<Self, CoreError> {
        let data = std::fs::read_to_string(path)?;
        let file: ModelFile = serde_json::from_str(&data)?;

        let pool = VulnerabilityPool::from_records(file.vulnerabilities, None)?;
        let mut model = Self::new(pool);
        for host in file.hosts {
            model.add_host(host, drop_missing)?;
        }
        for (source, target) in file.edges {
            model.add_edge(source, target)?;
        }

        tracing::info!(
            hosts = model.host_count(),
            edges = model.edge_count(),
            vulnerabilities = model.pool.len(),
            "Attack graph model loaded"
        );
        Ok(model)
    }

    /// Write the whole model (raw CVSS records included) to a JSON file.
    pub fn save_to_json(&self, path: impl AsRef<Path>) -> Result<(), CoreError> {
        let file = ModelFile {
            hosts: self
                .host_ids
                .iter()
                .filter_map(|id| self.hosts.get(id).cloned())
                .collect(),
            edges: self.edges.clone(),
            vulnerabilities: self.pool.values().map(|v| v.raw().clone()).collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Add a host, checking every referenced CVE against the pool.
    pub fn add_host(&mut self, mut host: NetworkHost, drop_missing: bool) -> Result<(), CoreError> {
        if drop_missing {
            host.cves.retain(|cve| self.pool.contains(cve));
            for cves in host.services.values_mut() {
                cves.retain(|cve| self.pool.contains(cve));
            }
        } else {
            let all_cves = host
                .cves
                .iter()
                .chain(host.services.values().flatten());
            for cve in all_cves {
                if !self.pool.contains(cve) {
                    return Err(CoreError::Integrity {
                        cve: cve.clone(),
                        host: host.id,
                    });
                }
            }
        }

        if !self.hosts.contains_key(&host.id) {
            self.host_ids.push(host.id);
            self.successors.insert(host.id, Vec::new());
            self.predecessors.insert(host.id, Vec::new());
        }
        self.hosts.insert(host.id, host);
        Ok(())
    }

    /// Add a directed reachability edge. Both endpoints must be hosts.
    pub fn add_edge(&mut self, source: u32, target: u32) -> Result<(), CoreError> {
        if !self.hosts.contains_key(&source) {
            return Err(CoreError::UnknownHost(source));
        }
        if !self.hosts.contains_key(&target) {
            return Err(CoreError::UnknownHost(target));
        }
        if self.edge_set.insert((source, target)) {
            self.edges.push((source, target));
            self.successors.entry(source).or_default().push(target);
            self.predecessors.entry(target).or_default().push(source);
        }
        Ok(())
    }

    /// Add a bidirectional link between two hosts.
    pub fn add_link(&mut self, a: u32, b: u32) -> Result<(), CoreError> {
        self.add_edge(a, b)?;
        self.add_edge(b, a)
    }

    pub fn host(&self, id: u32) -> Option<&NetworkHost> {
        self.hosts.get(&id)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &NetworkHost> {
        self.host_ids.iter().filter_map(|id| self.hosts.get(id))
    }

    pub fn host_ids(&self) -> &[u32] {
        &self.host_ids
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn edges(&self) -> &[(u32, u32)] {
        &self.edges
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn successors(&self, id: u32) -> &[u32] {
        self.successors.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, id: u32) -> &[u32] {
        self.predecessors.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn out_degree(&self, id: u32) -> usize {
        self.successors(id).len()
    }

    pub fn in_degree(&self, id: u32) -> usize {
        self.predecessors(id).len()
    }

    pub fn pool(&self) -> &VulnerabilityPool {
        &self.pool
    }

    /// Look up a vulnerability, erroring on dangling references.
    pub fn vulnerability(&self, cve_id: &str) -> Result<Arc<Vulnerability>, CoreError> {
        self.pool
            .get(cve_id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownCve(cve_id.to_string()))
    }

    /// Uniform random host over all hosts in the model.
    pub fn get_random_host<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u32> {
        self.host_ids.choose(rng).copied()
    }

    /// Pick a CVE on `host_id` exploitable with `current_priv`.
    ///
    /// When `preferred` is given, candidates are first restricted to the
    /// preferred set; if that restriction leaves no usable candidate the
    /// sampling is retried without it. Root privilege skips the privilege
    /// filter entirely. Returns `None` only when no CVE qualifies even
    /// without preferences.
    pub fn sample_cve_on_host<R: Rng + ?Sized>(
        &self,
        host_id: u32,
        current_priv: Privilege,
        preferred: Option<&HashSet<String>>,
        rng: &mut R,
    ) -> Option<String> {
        let host = self.hosts.get(&host_id)?;
        let mut cves: Vec<&str> = host.cves.iter().map(String::as_str).collect();

        if let Some(pref) = preferred {
            let filtered: Vec<&str> = cves
                .iter()
                .copied()
                .filter(|cve| pref.contains(*cve))
                .collect();
            if filtered.is_empty() {
                return self.sample_cve_on_host(host_id, current_priv, None, rng);
            }
            cves = filtered;
        }

        if current_priv == Privilege::Root {
            return cves.choose(rng).map(|cve| cve.to_string());
        }

        let eligible: Vec<&str> = cves
            .into_iter()
            .filter(|cve| {
                self.pool
                    .get(cve)
                    .is_some_and(|v| v.priv_required <= current_priv)
            })
            .collect();

        if eligible.is_empty() {
            if preferred.is_some() {
                return self.sample_cve_on_host(host_id, current_priv, None, rng);
            }
            return None;
        }

        eligible.choose(rng).map(|cve| cve.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn vuln_record(id: &str, auth: &str, oap: bool) -> Value {
        json!({
            "id": id,
            "metrics": {
                "cvssMetricV2": [{
                    "cvssData": {
                        "baseScore": 5.0,
                        "accessVector": "NETWORK",
                        "accessComplexity": "LOW",
                        "authentication": auth,
                        "confidentialityImpact": "PARTIAL",
                        "integrityImpact": "PARTIAL",
                        "availabilityImpact": "PARTIAL",
                    },
                    "impactScore": 5.0,
                    "exploitabilityScore": 5.0,
                    "baseSeverity": "MEDIUM",
                    "obtainAllPrivilege": oap,
                    "obtainUserPrivilege": !oap,
                }]
            }
        })
    }

    fn host(id: u32, cves: &[&str]) -> NetworkHost {
        NetworkHost {
            id,
            hostname: format!("host-{id}"),
            ipv4: format!("10.0.0.{id}"),
            cves: cves.iter().map(|c| c.to_string()).collect(),
            services: HashMap::new(),
            domain: 0,
            x: 0.0,
            y: 0.0,
        }
    }

    fn pool_with(ids: &[(&str, &str, bool)]) -> VulnerabilityPool {
        let records = ids
            .iter()
            .map(|(id, auth, oap)| vuln_record(id, auth, *oap))
            .collect();
        VulnerabilityPool::from_records(records, None).unwrap()
    }

    #[test]
    fn unknown_cve_aborts_load() {
        let mut model = AttackGraphModel::new(pool_with(&[("CVE-1", "NONE", false)]));
        let err = model.add_host(host(0, &["CVE-1", "CVE-MISSING"]), false);
        assert!(matches!(err, Err(CoreError::Integrity { .. })));
    }

    #[test]
    fn drop_missing_removes_dangling_references() {
        let mut model = AttackGraphModel::new(pool_with(&[("CVE-1", "NONE", false)]));
        model.add_host(host(0, &["CVE-1", "CVE-MISSING"]), true).unwrap();
        assert_eq!(model.host(0).unwrap().cves, vec!["CVE-1".to_string()]);
    }

    #[test]
    fn edges_require_known_hosts() {
        let mut model = AttackGraphModel::new(pool_with(&[("CVE-1", "NONE", false)]));
        model.add_host(host(0, &["CVE-1"]), false).unwrap();
        model.add_host(host(1, &["CVE-1"]), false).unwrap();

        model.add_edge(0, 1).unwrap();
        assert!(matches!(model.add_edge(0, 7), Err(CoreError::UnknownHost(7))));

        assert_eq!(model.successors(0), &[1]);
        assert_eq!(model.predecessors(1), &[0]);
        assert_eq!(model.out_degree(1), 0);

        // Duplicate edges collapse.
        model.add_edge(0, 1).unwrap();
        assert_eq!(model.edge_count(), 1);
    }

    #[test]
    fn sample_respects_privilege() {
        let pool = pool_with(&[("CVE-GUEST", "NONE", false), ("CVE-ROOT", "HIGH", true)]);
        let mut model = AttackGraphModel::new(pool);
        model
            .add_host(host(0, &["CVE-GUEST", "CVE-ROOT"]), false)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..20 {
            let cve = model
                .sample_cve_on_host(0, Privilege::Guest, None, &mut rng)
                .unwrap();
            assert_eq!(cve, "CVE-GUEST");
        }
    }

    #[test]
    fn sample_returns_none_when_nothing_qualifies() {
        let pool = pool_with(&[("CVE-ROOT", "HIGH", true)]);
        let mut model = AttackGraphModel::new(pool);
        model.add_host(host(0, &["CVE-ROOT"]), false).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        assert!(model
            .sample_cve_on_host(0, Privilege::Guest, None, &mut rng)
            .is_none());
    }

    #[test]
    fn preferred_falls_back_when_unsatisfiable() {
        let pool = pool_with(&[("CVE-A", "NONE", false), ("CVE-B", "HIGH", true)]);
        let mut model = AttackGraphModel::new(pool);
        model.add_host(host(0, &["CVE-A", "CVE-B"]), false).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        // Preferred set only contains a root-gated CVE: retry without it.
        let preferred: HashSet<String> = ["CVE-B".to_string()].into_iter().collect();
        let cve = model
            .sample_cve_on_host(0, Privilege::Guest, Some(&preferred), &mut rng)
            .unwrap();
        assert_eq!(cve, "CVE-A");

        // Preferred set disjoint from the host: same fallback.
        let preferred: HashSet<String> = ["CVE-Z".to_string()].into_iter().collect();
        let cve = model
            .sample_cve_on_host(0, Privilege::Guest, Some(&preferred), &mut rng)
            .unwrap();
        assert_eq!(cve, "CVE-A");
    }

    #[test]
    fn root_skips_privilege_filter() {
        let pool = pool_with(&[("CVE-ROOT", "HIGH", true)]);
        let mut model = AttackGraphModel::new(pool);
        model.add_host(host(0, &["CVE-ROOT"]), false).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let cve = model
            .sample_cve_on_host(0, Privilege::Root, None, &mut rng)
            .unwrap();
        assert_eq!(cve, "CVE-ROOT");
    }

    #[test]
    fn json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let pool = pool_with(&[("CVE-1", "NONE", false)]);
        let mut model = AttackGraphModel::new(pool);
        model.add_host(host(0, &["CVE-1"]), false).unwrap();
        model.add_host(host(1, &["CVE-1"]), false).unwrap();
        model.add_link(0, 1).unwrap();
        model.save_to_json(&path).unwrap();

        let loaded = AttackGraphModel::load_from_json(&path, false).unwrap();
        assert_eq!(loaded.host_count(), 2);
        assert_eq!(loaded.edge_count(), 2);
        assert!(loaded.pool().contains("CVE-1"));
        assert_eq!(loaded.host(1).unwrap().hostname, "host-1");
    }
}
