//! The SQL-queryable attack-path sink.
//!
//! One store per generator, append-only in per-iteration batches. The
//! `aps` table is the external contract: analyses and joint histograms
//! run plain SQL over it.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params_from_iter, Connection};

use steerag_core::metrics::{Metric, MetricCondition};

use crate::error::Result;

/// One persisted attack path row.
#[derive(Debug, Clone, PartialEq)]
pub struct PathRecord {
    pub hash: String,
    pub trace: String,
    pub likelihood: f64,
    pub impact: f64,
    pub score: f64,
    pub risk: f64,
    pub damage: f64,
    pub length: usize,
    pub source: u32,
    pub target: u32,
}

/// Append-only store of generated attack paths, keyed by trace hash.
pub struct PathStore {
    conn: Connection,
}

impl PathStore {
    /// Create a fresh store at `path`, replacing any previous file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_file(path)?;
            tracing::debug!(path = %path.display(), "Removed stale path store");
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE aps (
                hash TEXT PRIMARY KEY,
                trace TEXT,
                likelihood FLOAT,
                impact FLOAT,
                score FLOAT,
                risk FLOAT,
                damage FLOAT,
                length INT,
                source INT,
                target INT,
                iteration INT
            )",
        )?;
        Ok(Self { conn })
    }

    /// Open an existing store read-only (for joint histograms over a
    /// StatAG sink owned by another generator).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        )?;
        Ok(Self { conn })
    }

    /// In-memory store, used by tests and short-lived analyses.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE aps (
                hash TEXT PRIMARY KEY,
                trace TEXT,
                likelihood FLOAT,
                impact FLOAT,
                score FLOAT,
                risk FLOAT,
                damage FLOAT,
                length INT,
                source INT,
                target INT,
                iteration INT
            )",
        )?;
        Ok(Self { conn })
    }

    /// Append one iteration's unique paths in a single transaction.
    pub fn append_batch(&mut self, records: &[PathRecord], iteration: u64) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO aps (hash, trace, likelihood, impact, score, risk,
                                  damage, length, source, target, iteration)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for record in records {
                stmt.execute(rusqlite::params![
                    record.hash,
                    record.trace,
                    record.likelihood,
                    record.impact,
                    record.score,
                    record.risk,
                    record.damage,
                    record.length as i64,
                    record.source as i64,
                    record.target as i64,
                    iteration as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Number of stored paths.
    pub fn count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM aps", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Up to `limit` traces matching all conditions, in insertion order.
    pub fn select_traces(
        &self,
        conditions: &[MetricCondition],
        limit: usize,
    ) -> Result<Vec<String>> {
        let (where_sql, bounds) = condition_sql(conditions, None);
        let sql = format!("SELECT trace FROM aps WHERE {where_sql} LIMIT {limit}");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bounds), |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// All matching `(trace, metric value)` pairs ordered by the metric,
    /// highest first.
    pub fn traces_by_metric(
        &self,
        conditions: &[MetricCondition],
        metric: Metric,
    ) -> Result<Vec<(String, f64)>> {
        let (where_sql, bounds) = condition_sql(conditions, None);
        let sql = format!(
            "SELECT trace, {col} FROM aps WHERE {where_sql} ORDER BY {col} DESC",
            col = metric.as_str()
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bounds), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Column values for the given metrics, filtered by all conditions
    /// except the excluded one, plus optional source/target host lists.
    pub fn metric_values(
        &self,
        metrics: &[Metric],
        conditions: &[MetricCondition],
        exclude: Option<Metric>,
        sources: Option<&[u32]>,
        targets: Option<&[u32]>,
    ) -> Result<HashMap<Metric, Vec<f64>>> {
        if metrics.is_empty() {
            return Ok(HashMap::new());
        }

        let (where_sql, bounds) = condition_sql(conditions, exclude);
        let topo_sql = topological_sql(sources, targets);
        let select: Vec<&str> = metrics.iter().map(Metric::as_str).collect();
        let sql = format!(
            "SELECT {} FROM aps WHERE {where_sql} AND {topo_sql}",
            select.join(", ")
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut values: HashMap<Metric, Vec<f64>> =
            metrics.iter().map(|m| (*m, Vec::new())).collect();

        let mut rows = stmt.query(params_from_iter(bounds))?;
        while let Some(row) = rows.next()? {
            for (i, metric) in metrics.iter().enumerate() {
                values
                    .get_mut(metric)
                    .expect("metric column requested")
                    .push(row.get::<_, f64>(i)?);
            }
        }
        Ok(values)
    }
}

/// Build a `WHERE` fragment over the metric conditions, binding the range
/// bounds as parameters. An excluded metric's condition is skipped.
fn condition_sql(
    conditions: &[MetricCondition],
    exclude: Option<Metric>,
) -> (String, Vec<f64>) {
    let mut clauses = Vec::new();
    let mut bounds = Vec::new();

    for condition in conditions {
        if exclude == Some(condition.metric) {
            continue;
        }
        let col = condition.metric.as_str();
        clauses.push(format!("{col} >= ? AND {col} <= ?"));
        bounds.push(condition.min);
        bounds.push(condition.max);
    }

    if clauses.is_empty() {
        ("1 = 1".to_string(), bounds)
    } else {
        (clauses.join(" AND "), bounds)
    }
}

/// Build the source/target membership fragment. Host ids are integers and
/// are inlined directly.
fn topological_sql(sources: Option<&[u32]>, targets: Option<&[u32]>) -> String {
    let id_list = |ids: &[u32]| {
        ids.iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let source_sql = match sources {
        Some(ids) if !ids.is_empty() => format!("source IN ({})", id_list(ids)),
        _ => "1 = 1".to_string(),
    };
    let target_sql = match targets {
        Some(ids) if !ids.is_empty() => format!("target IN ({})", id_list(ids)),
        _ => "1 = 1".to_string(),
    };

    format!("{source_sql} AND {target_sql}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hash: &str, likelihood: f64, risk: f64, length: usize) -> PathRecord {
        PathRecord {
            hash: hash.to_string(),
            trace: format!("trace-{hash}"),
            likelihood,
            impact: 5.0,
            score: 5.0,
            risk,
            damage: 5.0,
            length,
            source: 0,
            target: 1,
        }
    }

    #[test]
    fn append_and_count() {
        let mut store = PathStore::in_memory().unwrap();
        store
            .append_batch(&[record("a", 1.0, 1.0, 1), record("b", 2.0, 2.0, 2)], 0)
            .unwrap();
        store.append_batch(&[record("c", 3.0, 3.0, 3)], 1).unwrap();
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn select_traces_applies_all_conditions() {
        let mut store = PathStore::in_memory().unwrap();
        store
            .append_batch(
                &[
                    record("a", 1.0, 8.0, 1),
                    record("b", 6.0, 8.0, 2),
                    record("c", 6.0, 1.0, 3),
                ],
                0,
            )
            .unwrap();

        let conditions = [
            MetricCondition::new(Metric::Likelihood, 5.0, 10.0),
            MetricCondition::new(Metric::Risk, 5.0, 10.0),
        ];
        let traces = store.select_traces(&conditions, 100).unwrap();
        assert_eq!(traces, vec!["trace-b".to_string()]);
    }

    #[test]
    fn traces_by_metric_sorts_descending() {
        let mut store = PathStore::in_memory().unwrap();
        store
            .append_batch(
                &[
                    record("a", 2.0, 0.0, 1),
                    record("b", 9.0, 0.0, 1),
                    record("c", 5.0, 0.0, 1),
                ],
                0,
            )
            .unwrap();

        let paths = store.traces_by_metric(&[], Metric::Likelihood).unwrap();
        let values: Vec<f64> = paths.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![9.0, 5.0, 2.0]);
    }

    #[test]
    fn metric_values_respects_exclusion() {
        let mut store = PathStore::in_memory().unwrap();
        store
            .append_batch(
                &[
                    record("a", 1.0, 8.0, 1),
                    record("b", 6.0, 8.0, 2),
                    record("c", 6.0, 1.0, 3),
                ],
                0,
            )
            .unwrap();

        let conditions = [MetricCondition::new(Metric::Likelihood, 5.0, 10.0)];

        // With the likelihood filter excluded, every row passes.
        let values = store
            .metric_values(&[Metric::Likelihood], &conditions, Some(Metric::Likelihood), None, None)
            .unwrap();
        assert_eq!(values[&Metric::Likelihood].len(), 3);

        // Applied, only the two high-likelihood rows remain.
        let values = store
            .metric_values(&[Metric::Likelihood], &conditions, None, None, None)
            .unwrap();
        assert_eq!(values[&Metric::Likelihood].len(), 2);
    }

    #[test]
    fn topological_filter_restricts_sources() {
        let mut store = PathStore::in_memory().unwrap();
        let mut other = record("z", 5.0, 5.0, 2);
        other.source = 9;
        store
            .append_batch(&[record("a", 5.0, 5.0, 2), other], 0)
            .unwrap();

        let values = store
            .metric_values(&[Metric::Length], &[], None, Some(&[0]), None)
            .unwrap();
        assert_eq!(values[&Metric::Length].len(), 1);
    }
}
