//! Per-generator CSV iteration log.
//!
//! One file per generator, one row per iteration. Steered generators
//! carry an extra `precision` column between `collision` and the
//! stability columns. Stability cells stay empty until the second
//! iteration produces a comparison.

use std::fs::File;
use std::path::Path;

use steerag_core::metrics::Stability;

use crate::error::Result;

/// One row of the iteration log.
#[derive(Debug, Clone)]
pub struct IterationRow {
    pub iteration: u64,
    pub generated: u64,
    pub collision: f64,
    /// Present only for steered generators.
    pub precision: Option<f64>,
    pub stability: Option<Stability>,
    pub time_secs: f64,
}

/// CSV writer for the iteration summaries of a single generator.
pub struct IterationLog {
    writer: csv::Writer<File>,
    with_precision: bool,
}

impl IterationLog {
    /// Create the log file and write the header.
    pub fn create(path: impl AsRef<Path>, with_precision: bool) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = csv::WriterBuilder::new().from_writer(file);

        let mut header = vec!["iteration", "generated", "collision"];
        if with_precision {
            header.push("precision");
        }
        header.extend([
            "st_likelihood",
            "st_impact",
            "st_risk",
            "st_score",
            "st_length",
            "time",
        ]);
        writer.write_record(&header)?;
        writer.flush()?;

        Ok(Self {
            writer,
            with_precision,
        })
    }

    /// Append one iteration row and flush.
    pub fn append(&mut self, row: &IterationRow) -> Result<()> {
        let mut fields = vec![
            row.iteration.to_string(),
            row.generated.to_string(),
            row.collision.to_string(),
        ];
        if self.with_precision {
            fields.push(row.precision.unwrap_or(0.0).to_string());
        }
        match &row.stability {
            Some(st) => fields.extend([
                st.likelihood.to_string(),
                st.impact.to_string(),
                st.risk.to_string(),
                st.score.to_string(),
                st.length.to_string(),
            ]),
            None => fields.extend(std::iter::repeat(String::new()).take(5)),
        }
        fields.push(row.time_secs.to_string());

        self.writer.write_record(&fields)?;
        self.writer.flush()?;
        Ok(())
    }
}
