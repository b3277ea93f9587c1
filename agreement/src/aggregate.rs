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

//! Summary statistics over a score sequence. Empty input is an error, never 0.

use serde::Serialize;

use crate::error::{Result, ScoreError};

pub fn mean(values: &[f64]) -> Result<f64> {
    if values.is_empty() { return Err(ScoreError::AggregationOnEmpty); }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median of a sorted copy; `values` keeps its order.
pub fn median(values: &[f64]) -> Result<f64> {
    if values.is_empty() { return Err(ScoreError::AggregationOnEmpty); }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Ok((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Ok(sorted[mid])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

pub fn summarize(values: &[f64]) -> Result<Summary> {
    let mean = mean(values)?;
    let median = median(values)?;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Ok(Summary { count: values.len(), mean, median, min, max })
}
