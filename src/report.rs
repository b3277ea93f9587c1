// Copyright (C) 2025 Noah Cashin <noahc959@icloud.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

// * Inputs (signature/implementation pair files) and outputs (JSON report,
// * per-token CSV) of the command line tool.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use agreement::{Metric, ScoreReport, Summary};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A signature and the implementation scored against it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Pair {
    pub signature: String,
    pub implementation: String,
}

pub fn read_pair(path: &Path) -> Result<Pair> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not a {{\"signature\", \"implementation\"}} JSON object", path.display()))
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub started_at: String,
    pub backend: &'static str,
    pub weights: String,
    pub model_blake3: String,
    pub tokenizer_blake3: String,
    pub metric: Metric,
    pub max_context: Option<usize>,
    pub probability_floor: f64,
}

#[derive(Debug, Serialize)]
pub struct LabelledRun<'a> {
    pub label: &'a str,
    /// Absent when nothing was scorable.
    pub summary: Option<Summary>,
    pub report: &'a ScoreReport,
}

#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub meta: &'a RunMeta,
    pub runs: Vec<LabelledRun<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_difference: Option<f64>,
}

pub fn write_json(path: &Path, report: &JsonReport<'_>) -> Result<()> {
    let body = serde_json::to_vec_pretty(report)?;
    fs::write(path, body).with_context(|| format!("failed writing {}", path.display()))
}

const CSV_HEADER: [&str; 10] = [
    "run", "position", "target_id", "target_text", "best_id", "best_text",
    "agreement", "target_probability", "best_probability", "context_len",
];

pub fn write_csv_to<W: Write>(out: W, runs: &[(&str, &ScoreReport)]) -> Result<W> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(CSV_HEADER)?;
    for (label, report) in runs {
        for r in &report.records {
            wtr.write_record([
                label.to_string(),
                r.position.to_string(),
                r.target_id.to_string(),
                r.target_text.clone(),
                r.best_id.to_string(),
                r.best_text.clone(),
                format!("{:.16}", r.agreement),
                format!("{:e}", r.target_probability),
                format!("{:e}", r.best_probability),
                r.context_len.to_string(),
            ])?;
        }
    }
    wtr.flush()?;
    wtr.into_inner().map_err(|e| anyhow::anyhow!("csv flush failed: {}", e.error()))
}

pub fn write_csv(path: &Path, runs: &[(&str, &ScoreReport)]) -> Result<()> {
    let f = File::create(path).with_context(|| format!("failed creating {}", path.display()))?;
    write_csv_to(f, runs)?;
    Ok(())
}
