//! Vulnerabilities and the privilege model.
//!
//! Each vulnerability is built from a raw CVSS record (v2 and/or v3). The
//! record is reduced to a ten-field feature vector used by the steering
//! classifier, plus an estimate of the privilege level required to exploit
//! it and the privilege level gained afterwards.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

// ── Privileges ────────────────────────────────────────────────────

/// Attacker privilege level on a host. Ordering is by escalation:
/// `Guest < User < Root`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    #[default]
    Guest = 0,
    User = 1,
    Root = 2,
}

impl Privilege {
    /// Map a CVSS `authentication` (v2) or `privilegesRequired` (v3)
    /// category to the privilege needed to exploit.
    pub fn from_requirement(category: &str) -> Self {
        match category {
            "NONE" | "LOW" => Privilege::Guest,
            "SINGLE" | "MEDIUM" | "MULTIPLE" => Privilege::User,
            "HIGH" | "CRITICAL" => Privilege::Root,
            _ => Privilege::Guest,
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Privilege::Guest => "guest",
            Privilege::User => "user",
            Privilege::Root => "root",
        };
        f.write_str(s)
    }
}

impl FromStr for Privilege {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guest" => Ok(Privilege::Guest),
            "user" => Ok(Privilege::User),
            "root" => Ok(Privilege::Root),
            other => Err(CoreError::InvalidTrace(format!(
                "unknown privilege `{other}`"
            ))),
        }
    }
}

// ── Base features ─────────────────────────────────────────────────

/// Map a CVSS category string to a small integer shared across v2 and v3
/// vocabularies.
pub fn category_to_int(category: &str) -> u8 {
    match category {
        "NONE" => 0,
        "NETWORK" | "LOW" | "SINGLE" | "PARTIAL" => 1,
        "ADJACENT" | "ADJACENT_NETWORK" | "MEDIUM" | "MULTIPLE" | "COMPLETE" => 2,
        "LOCAL" | "HIGH" => 3,
        "PHYSICAL" | "CRITICAL" => 4,
        _ => 0,
    }
}

/// The number of classifier features per vulnerability.
pub const FEATURE_COUNT: usize = 10;

/// Ten-field feature vector derived from a CVSS base metric.
///
/// Float scores keep their native `[0, 10]` range; categorical fields are
/// collapsed through [`category_to_int`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseFeatures {
    pub base_score: f64,
    pub impact_score: f64,
    pub exploitability_score: f64,

    pub access_vector: u8,
    pub access_complexity: u8,
    pub authentication: u8,
    pub confidentiality_impact: u8,
    pub integrity_impact: u8,
    pub availability_impact: u8,

    pub base_severity: u8,
}

impl BaseFeatures {
    /// Sentinel used when a vulnerability carries no CVSS metric at all.
    pub fn sentinel() -> Self {
        Self {
            base_score: 5.0,
            impact_score: 5.0,
            exploitability_score: 5.0,
            access_vector: 0,
            access_complexity: 0,
            authentication: 0,
            confidentiality_impact: 0,
            integrity_impact: 0,
            availability_impact: 0,
            base_severity: 0,
        }
    }

    /// Parse from the first v2 and v3 base metrics, preferring v2 when both
    /// exist.
    pub fn parse(v2: Option<&Value>, v3: Option<&Value>) -> Self {
        let (metric, vector_key, complexity_key, auth_key) = if let Some(m) = v2 {
            (m, "accessVector", "accessComplexity", "authentication")
        } else if let Some(m) = v3 {
            (m, "attackVector", "attackComplexity", "privilegesRequired")
        } else {
            return Self::sentinel();
        };

        let cvss = &metric["cvssData"];
        let cat = |v: &Value, key: &str| category_to_int(v[key].as_str().unwrap_or(""));

        // baseSeverity lives at the metric level for v2 dumps and inside
        // cvssData for v3 ones.
        let severity = metric["baseSeverity"]
            .as_str()
            .or_else(|| cvss["baseSeverity"].as_str())
            .unwrap_or("");

        Self {
            base_score: cvss["baseScore"].as_f64().unwrap_or(5.0),
            impact_score: metric["impactScore"].as_f64().unwrap_or(5.0),
            exploitability_score: metric["exploitabilityScore"].as_f64().unwrap_or(5.0),
            access_vector: cat(cvss, vector_key),
            access_complexity: cat(cvss, complexity_key),
            authentication: cat(cvss, auth_key),
            confidentiality_impact: cat(cvss, "confidentialityImpact"),
            integrity_impact: cat(cvss, "integrityImpact"),
            availability_impact: cat(cvss, "availabilityImpact"),
            base_severity: category_to_int(severity),
        }
    }

    /// Element-wise median over a set of feature vectors. Float fields take
    /// the true median; integer fields take the median truncated back to an
    /// integer.
    pub fn median(features: &[BaseFeatures]) -> Self {
        debug_assert!(!features.is_empty());

        let fmed = |get: fn(&BaseFeatures) -> f64| {
            median_f64(features.iter().map(get).collect::<Vec<_>>())
        };
        let imed = |get: fn(&BaseFeatures) -> u8| {
            median_f64(features.iter().map(|f| get(f) as f64).collect::<Vec<_>>()) as u8
        };

        Self {
            base_score: fmed(|f| f.base_score),
            impact_score: fmed(|f| f.impact_score),
            exploitability_score: fmed(|f| f.exploitability_score),
            access_vector: imed(|f| f.access_vector),
            access_complexity: imed(|f| f.access_complexity),
            authentication: imed(|f| f.authentication),
            confidentiality_impact: imed(|f| f.confidentiality_impact),
            integrity_impact: imed(|f| f.integrity_impact),
            availability_impact: imed(|f| f.availability_impact),
            base_severity: imed(|f| f.base_severity),
        }
    }

    /// Fixed-order representation for classifier training and prediction.
    pub fn as_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.base_score,
            self.impact_score,
            self.exploitability_score,
            self.access_vector as f64,
            self.access_complexity as f64,
            self.authentication as f64,
            self.confidentiality_impact as f64,
            self.integrity_impact as f64,
            self.availability_impact as f64,
            self.base_severity as f64,
        ]
    }
}

/// Median of a list of floats (mean of the middle pair for even counts).
pub fn median_f64(mut values: Vec<f64>) -> f64 {
    debug_assert!(!values.is_empty());
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

// ── Vulnerability ─────────────────────────────────────────────────

/// An immutable vulnerability keyed by CVE id.
///
/// The raw CVSS record is retained verbatim so the model file round-trips.
#[derive(Debug, Clone)]
pub struct Vulnerability {
    pub cve_id: String,
    pub base_features: BaseFeatures,
    pub priv_required: Privilege,
    pub priv_gained: Privilege,
    raw: Value,
}

impl Vulnerability {
    /// Build from a raw CVSS JSON record (one entry of the model file's
    /// `vulnerabilities` array).
    pub fn from_record(raw: Value) -> Result<Self, CoreError> {
        let cve_id = raw["id"]
            .as_str()
            .ok_or_else(|| CoreError::MalformedVulnerability("missing `id` field".into()))?
            .to_string();

        let metrics = &raw["metrics"];
        let v2 = metrics["cvssMetricV2"].get(0);
        let v3 = metrics["cvssMetricV30"]
            .get(0)
            .or_else(|| metrics["cvssMetricV31"].get(0));

        let base_features = BaseFeatures::parse(v2, v3);
        let (priv_required, priv_gained) = derive_privileges(v2, v3);

        Ok(Self {
            cve_id,
            base_features,
            priv_required,
            priv_gained,
            raw,
        })
    }

    /// The raw CVSS record this vulnerability was parsed from.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn impact(&self) -> f64 {
        self.base_features.impact_score
    }

    pub fn likelihood(&self) -> f64 {
        self.base_features.exploitability_score
    }

    pub fn score(&self) -> f64 {
        self.base_features.base_score
    }
}

/// Rough estimate of the privilege required to exploit and the privilege
/// gained afterwards, preferring the v2 metric when both exist.
///
/// v2 records with neither obtain flag still grant `user`; v3 records with a
/// changed scope also grant `user`. Both are long-standing mapping choices
/// kept for compatibility with existing traces.
fn derive_privileges(v2: Option<&Value>, v3: Option<&Value>) -> (Privilege, Privilege) {
    if let Some(m) = v2 {
        let required = Privilege::from_requirement(m["cvssData"]["authentication"].as_str().unwrap_or(""));
        let gained = if m["obtainAllPrivilege"].as_bool().unwrap_or(false) {
            Privilege::Root
        } else {
            Privilege::User
        };
        (required, gained)
    } else if let Some(m) = v3 {
        let required =
            Privilege::from_requirement(m["cvssData"]["privilegesRequired"].as_str().unwrap_or(""));
        let gained = if m["cvssData"]["scope"].as_str() == Some("UNCHANGED") {
            required
        } else {
            Privilege::User
        };
        (required, gained)
    } else {
        (Privilege::Guest, Privilege::Guest)
    }
}

// ── Pool ──────────────────────────────────────────────────────────

/// The global vulnerability pool, immutable once loaded.
#[derive(Debug, Clone, Default)]
pub struct VulnerabilityPool {
    vulns: HashMap<String, Arc<Vulnerability>>,
}

impl VulnerabilityPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from the raw record list, optionally keeping only the given ids.
    pub fn from_records(
        records: Vec<Value>,
        filter: Option<&HashSet<String>>,
    ) -> Result<Self, CoreError> {
        let mut pool = Self::new();
        for raw in records {
            if let Some(keep) = filter {
                match raw["id"].as_str() {
                    Some(id) if keep.contains(id) => {}
                    _ => continue,
                }
            }
            pool.insert(Vulnerability::from_record(raw)?);
        }
        Ok(pool)
    }

    pub fn insert(&mut self, vuln: Vulnerability) {
        self.vulns.insert(vuln.cve_id.clone(), Arc::new(vuln));
    }

    pub fn get(&self, cve_id: &str) -> Option<&Arc<Vulnerability>> {
        self.vulns.get(cve_id)
    }

    pub fn contains(&self, cve_id: &str) -> bool {
        self.vulns.contains_key(cve_id)
    }

    pub fn len(&self) -> usize {
        self.vulns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vulns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<Vulnerability>)> {
        self.vulns.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &Arc<Vulnerability>> {
        self.vulns.values()
    }
}
