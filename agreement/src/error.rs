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

//! Error type for a scoring run.
//!
//! Adapter failures arrive as `anyhow::Error` and are wrapped so the caller can
//! tell which collaborator failed. Everything here except `AggregationOnEmpty`
//! aborts the whole run.

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScoreError>;

/// Which external collaborator failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Tokenizer,
    Model,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterKind::Tokenizer => f.write_str("tokenizer"),
            AdapterKind::Model => f.write_str("model"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ScoreError {
    /// The tokenizer or model could not be reached or failed mid-run.
    #[error("{adapter} adapter unavailable: {source:#}")]
    AdapterUnavailable {
        adapter: AdapterKind,
        #[source]
        source: anyhow::Error,
    },

    /// Logits that cannot be turned into a probability distribution.
    #[error("degenerate distribution at position {position}: {reason}")]
    NumericDegenerate { position: usize, reason: String },

    /// The target id has no entry in the model's output distribution.
    #[error("token id {token} out of bounds for vocab size {vocab_size}")]
    VocabularyMismatch { token: u32, vocab_size: usize },

    /// The floor must lie in `(0, 1/vocab_size)`: zero lets agreement reach 0,
    /// and at `1/vocab_size` or above the floor flattens the distribution.
    #[error("probability floor {floor:e} outside (0, 1/{vocab_size})")]
    InvalidProbabilityFloor { floor: f64, vocab_size: usize },

    #[error("scoring cancelled before position {position}")]
    Cancelled { position: usize },

    /// Mean/median requested over an empty score sequence.
    #[error("cannot aggregate an empty score sequence")]
    AggregationOnEmpty,
}

impl ScoreError {
    pub(crate) fn tokenizer(source: anyhow::Error) -> Self {
        ScoreError::AdapterUnavailable { adapter: AdapterKind::Tokenizer, source }
    }

    pub(crate) fn model(source: anyhow::Error) -> Self {
        ScoreError::AdapterUnavailable { adapter: AdapterKind::Model, source }
    }

    /// Attach the scoring position to a degenerate-distribution error raised
    /// before the position was known.
    pub(crate) fn at_position(self, position: usize) -> Self {
        match self {
            ScoreError::NumericDegenerate { reason, .. } => ScoreError::NumericDegenerate { position, reason },
            other => other,
        }
    }
}
