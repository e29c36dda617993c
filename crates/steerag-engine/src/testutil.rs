//! Shared model builders for the engine test suites.

use std::collections::HashMap;

use serde_json::{json, Value};

use steerag_core::model::NetworkHost;
use steerag_core::{AttackGraphModel, VulnerabilityPool};

/// Raw v2 CVSS record with the given scores and privilege shape.
pub fn vuln_record(
    id: &str,
    base: f64,
    impact: f64,
    exploitability: f64,
    auth: &str,
    obtain_all: bool,
) -> Value {
    json!({
        "id": id,
        "metrics": {
            "cvssMetricV2": [{
                "cvssData": {
                    "baseScore": base,
                    "accessVector": "NETWORK",
                    "accessComplexity": "LOW",
                    "authentication": auth,
                    "confidentialityImpact": "PARTIAL",
                    "integrityImpact": "PARTIAL",
                    "availabilityImpact": "PARTIAL",
                },
                "impactScore": impact,
                "exploitabilityScore": exploitability,
                "baseSeverity": "MEDIUM",
                "obtainAllPrivilege": obtain_all,
                "obtainUserPrivilege": !obtain_all,
            }]
        }
    })
}

/// A guest-exploitable vulnerability granting user with 5.0 scores.
pub fn plain_vuln(id: &str) -> Value {
    vuln_record(id, 5.0, 5.0, 5.0, "NONE", false)
}

pub fn host(id: u32, cves: &[&str]) -> NetworkHost {
    NetworkHost {
        id,
        hostname: format!("host-{id}"),
        ipv4: format!("10.0.0.{}", id % 250),
        cves: cves.iter().map(|c| c.to_string()).collect(),
        services: HashMap::new(),
        domain: 0,
        x: 0.0,
        y: 0.0,
    }
}

/// Model from explicit vulnerability records, hosts, and edges.
pub fn model_from(
    records: Vec<Value>,
    hosts: Vec<NetworkHost>,
    edges: &[(u32, u32)],
) -> AttackGraphModel {
    let pool = VulnerabilityPool::from_records(records, None).unwrap();
    let mut model = AttackGraphModel::new(pool);
    for h in hosts {
        model.add_host(h, false).unwrap();
    }
    for &(source, target) in edges {
        model.add_edge(source, target).unwrap();
    }
    model
}

/// Line graph 0 → 1 → … → n-1, every host carrying the same guest CVE.
/// Optionally adds an isolated host with id 100.
pub fn chain_model(n: u32, with_isolated: bool) -> AttackGraphModel {
    let mut hosts: Vec<NetworkHost> = (0..n).map(|id| host(id, &["CVE-TEST-0001"])).collect();
    if with_isolated {
        hosts.push(host(100, &["CVE-TEST-0001"]));
    }
    let edges: Vec<(u32, u32)> = (0..n.saturating_sub(1)).map(|i| (i, i + 1)).collect();
    model_from(vec![plain_vuln("CVE-TEST-0001")], hosts, &edges)
}

/// Diamond graph 0 → {1, 2} → 3, every host carrying the same guest CVE.
pub fn diamond_model() -> AttackGraphModel {
    model_from(
        vec![plain_vuln("CVE-TEST-0001")],
        (0..4).map(|id| host(id, &["CVE-TEST-0001"])).collect(),
        &[(0, 1), (0, 2), (1, 3), (2, 3)],
    )
}
