//! Analyses dispatched inside a query worker.
//!
//! The matrix and top-CVE accumulators run incrementally over every
//! query-satisfying path the worker produces; the histogram and selection
//! analyses query the worker's persistent store on demand.

use std::collections::HashMap;

use serde_json::{json, Value};

use steerag_core::metrics::{Metric, MetricCondition};
use steerag_core::AttackGraphModel;
use steerag_engine::AttackPath;
use steerag_store::PathStore;

use crate::error::Result;

/// Default result cap for the attack-path histogram analysis.
pub const HISTOGRAM_LIMIT: usize = 10_000;
/// Default result cap for the path selection analysis.
pub const SELECT_LIMIT: usize = 100;

/// Tally of (source host, target host) pairs over query-satisfying paths.
#[derive(Debug, Clone)]
pub struct SourceTargetMatrix {
    /// Row/column order of the counts matrix.
    host_order: Vec<u32>,
    index: HashMap<u32, usize>,
    counts: Vec<Vec<u64>>,
    iteration: u64,
}

impl SourceTargetMatrix {
    pub fn new(model: &AttackGraphModel) -> Self {
        let mut host_order: Vec<u32> = model.host_ids().to_vec();
        host_order.sort_unstable();
        let index = host_order
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        let n = host_order.len();
        Self {
            host_order,
            index,
            counts: vec![vec![0; n]; n],
            iteration: 0,
        }
    }

    pub fn update(&mut self, paths: &[AttackPath], iteration: u64) {
        for path in paths {
            if let (Some(&row), Some(&column)) = (
                self.index.get(&path.source_host()),
                self.index.get(&path.target_host()),
            ) {
                self.counts[row][column] += 1;
            }
        }
        self.iteration = iteration;
    }

    pub fn result(&self) -> Value {
        json!({
            "iteration": self.iteration,
            "hosts": self.host_order,
            "counts": self.counts,
        })
    }
}

/// CVE exploitation counts over query-satisfying paths.
#[derive(Debug, Clone, Default)]
pub struct TopVulnerabilities {
    counts: HashMap<String, u64>,
    iteration: u64,
}

impl TopVulnerabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, paths: &[AttackPath], iteration: u64) {
        self.iteration = iteration;
        for path in paths {
            for vuln in &path.vulns {
                *self.counts.entry(vuln.cve_id.clone()).or_insert(0) += 1;
            }
        }
    }

    /// CVEs sorted by count descending (ties broken by id for a stable
    /// payload).
    pub fn result(&self) -> Value {
        let mut cves: Vec<(&String, &u64)> = self.counts.iter().collect();
        cves.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        json!({
            "iteration": self.iteration,
            "cves": cves,
        })
    }
}

/// Traces with their metric value, ordered by the metric descending and
/// uniformly down-sampled when more than `limit` rows match.
pub fn attack_path_histogram(
    store: &PathStore,
    conditions: &[MetricCondition],
    metric: Metric,
    limit: usize,
) -> Result<Vec<(String, f64)>> {
    let rows = store.traces_by_metric(conditions, metric)?;
    if rows.len() < limit || rows.is_empty() {
        return Ok(rows);
    }

    let step = (rows.len() / limit).max(1);
    Ok(rows[..rows.len() - 1]
        .iter()
        .step_by(step)
        .cloned()
        .collect())
}

/// Up to `limit` matching traces re-parsed into full attack paths.
pub fn select_attack_paths(
    store: &PathStore,
    model: &AttackGraphModel,
    conditions: &[MetricCondition],
    limit: usize,
) -> Result<Vec<AttackPath>> {
    let traces = store.select_traces(conditions, limit)?;
    let mut paths = Vec::with_capacity(traces.len());
    for trace in &traces {
        paths.push(AttackPath::from_trace(trace, model)?);
    }
    Ok(paths)
}

/// Wire shape of an attack path in analysis payloads.
pub fn path_to_json(path: &AttackPath) -> Value {
    json!({
        "trace": path.trace,
        "length": path.length,
        "likelihood": path.likelihood,
        "impact": path.impact,
        "score": path.score,
        "risk": path.risk,
        "damage": path.damage,
        "hash": path.hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use steerag_core::model::NetworkHost;
    use steerag_core::VulnerabilityPool;
    use steerag_store::PathRecord;

    fn model() -> AttackGraphModel {
        let record = serde_json::json!({
            "id": "CVE-TEST-0001",
            "metrics": {
                "cvssMetricV2": [{
                    "cvssData": {
                        "baseScore": 5.0,
                        "accessVector": "NETWORK",
                        "accessComplexity": "LOW",
                        "authentication": "NONE",
                        "confidentialityImpact": "PARTIAL",
                        "integrityImpact": "PARTIAL",
                        "availabilityImpact": "PARTIAL",
                    },
                    "impactScore": 5.0,
                    "exploitabilityScore": 5.0,
                    "baseSeverity": "MEDIUM",
                    "obtainAllPrivilege": false,
                    "obtainUserPrivilege": true,
                }]
            }
        });
        let pool = VulnerabilityPool::from_records(vec![record], None).unwrap();
        let mut model = AttackGraphModel::new(pool);
        for id in [0, 2, 7] {
            model
                .add_host(
                    NetworkHost {
                        id,
                        hostname: format!("host-{id}"),
                        ipv4: format!("10.0.0.{id}"),
                        cves: vec!["CVE-TEST-0001".to_string()],
                        services: HashMap::new(),
                        domain: 0,
                        x: 0.0,
                        y: 0.0,
                    },
                    false,
                )
                .unwrap();
        }
        model.add_edge(0, 2).unwrap();
        model.add_edge(2, 7).unwrap();
        model
    }

    fn path(model: &AttackGraphModel, walk: &[(u32, u32)]) -> AttackPath {
        let mut rng = rand_stub();
        steerag_engine::build_attack_path(model, walk, None, &mut rng).unwrap()
    }

    fn rand_stub() -> impl rand::Rng {
        use rand::SeedableRng;
        rand::rngs::StdRng::seed_from_u64(1)
    }

    #[test]
    fn matrix_handles_sparse_host_ids() {
        let model = model();
        let mut matrix = SourceTargetMatrix::new(&model);
        let paths = vec![
            path(&model, &[(0, 2)]),
            path(&model, &[(0, 2), (2, 7)]),
            path(&model, &[(2, 7)]),
        ];
        matrix.update(&paths, 4);

        let result = matrix.result();
        assert_eq!(result["iteration"], 4);
        assert_eq!(result["hosts"], serde_json::json!([0, 2, 7]));
        // Sorted host order maps 0→row 0, 2→row 1, 7→row 2.
        assert_eq!(result["counts"][0][1], 1); // 0 → 2
        assert_eq!(result["counts"][0][2], 1); // 0 → 7
        assert_eq!(result["counts"][1][2], 1); // 2 → 7
    }

    #[test]
    fn top_vulnerabilities_sorts_descending() {
        let model = model();
        let mut top = TopVulnerabilities::new();
        top.update(&[path(&model, &[(0, 2), (2, 7)])], 1);

        let result = top.result();
        assert_eq!(result["cves"][0][0], "CVE-TEST-0001");
        assert_eq!(result["cves"][0][1], 2);
    }

    #[test]
    fn histogram_downsamples_uniformly() {
        let mut store = PathStore::in_memory().unwrap();
        let records: Vec<PathRecord> = (0..40)
            .map(|i| PathRecord {
                hash: format!("h{i}"),
                trace: format!("t{i}"),
                likelihood: i as f64 / 4.0,
                impact: 5.0,
                score: 5.0,
                risk: 5.0,
                damage: 5.0,
                length: 1,
                source: 0,
                target: 2,
            })
            .collect();
        store.append_batch(&records, 0).unwrap();

        // Under the limit: everything comes back, highest first.
        let all = attack_path_histogram(&store, &[], Metric::Likelihood, 100).unwrap();
        assert_eq!(all.len(), 40);
        assert!(all[0].1 > all[39].1);

        // Over the limit: strided down-sampling.
        let sampled = attack_path_histogram(&store, &[], Metric::Likelihood, 10).unwrap();
        assert_eq!(sampled.len(), 10);
        assert!(sampled[0].1 >= sampled[9].1);
    }

    #[test]
    fn select_reparses_traces() {
        let model = model();
        let original = path(&model, &[(0, 2), (2, 7)]);

        let mut store = PathStore::in_memory().unwrap();
        store.append_batch(&[original.record()], 0).unwrap();

        let selected = select_attack_paths(&store, &model, &[], SELECT_LIMIT).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].trace, original.trace);
        assert_eq!(selected[0].hash, original.hash);

        let json = path_to_json(&selected[0]);
        assert_eq!(json["hash"], original.hash.as_str());
        assert_eq!(json["length"], 2);
    }
}
