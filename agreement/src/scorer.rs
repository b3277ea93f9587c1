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

//! Token-by-token agreement between a model and an implementation text.
//!
//! For every implementation position except the first and last, the scorer
//! rebuilds the context (signature plus the implementation so far), asks the
//! model for its next-token distribution and compares the actual token with
//! the model's top candidate:
//!
//! ```text
//! agreement = p(actual) / p(best)
//! ```
//!
//! The value lies in `(0, 1]` and is exactly 1 when the actual token is the
//! model's first choice. It is a relative-confidence ratio, not perplexity and
//! not a cross-entropy; the raw `p(actual)` is kept alongside as
//! [`Metric::TargetProbability`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adapter::{NextTokenModel, TextTokenizer};
use crate::aggregate::{summarize, Summary};
use crate::context::reconstruct_context;
use crate::error::{Result, ScoreError};
use crate::normalize::{check_floor, Distribution, DEFAULT_PROBABILITY_FLOOR};
use crate::observer::TokenObserver;
use crate::tokenizer::preflight;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    /// `p(actual) / p(best)`.
    #[default]
    Agreement,
    /// `p(actual)` on its own.
    TargetProbability,
}

impl Metric {
    pub fn of(self, s: &TokenScore) -> f64 {
        match self {
            Metric::Agreement => s.agreement,
            Metric::TargetProbability => s.target_probability,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScorerConfig {
    /// Keep only this many trailing context tokens. `None` submits the whole context.
    pub max_context: Option<usize>,
    /// Must lie in `(0, 1/vocab_size)`; see [`Distribution::from_logits`].
    pub probability_floor: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self { max_context: None, probability_floor: DEFAULT_PROBABILITY_FLOOR }
    }
}

/// One scored position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenScore {
    pub position: usize,
    pub target_id: u32,
    pub target_text: String,
    pub best_id: u32,
    pub best_text: String,
    pub agreement: f64,
    pub target_probability: f64,
    pub best_probability: f64,
    /// Length of the re-encoded context that was submitted.
    pub context_len: usize,
}

/// Result of one run: records in position order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub signature_tokens: usize,
    pub implementation_tokens: usize,
    pub records: Vec<TokenScore>,
}

impl ScoreReport {
    pub fn values(&self, metric: Metric) -> Vec<f64> {
        self.records.iter().map(|r| metric.of(r)).collect()
    }

    pub fn agreements(&self) -> Vec<f64> { self.values(Metric::Agreement) }

    pub fn summary(&self, metric: Metric) -> Result<Summary> { summarize(&self.values(metric)) }

    pub fn is_empty(&self) -> bool { self.records.is_empty() }
}

pub struct AgreementScorer<T, M> {
    tokenizer: T,
    model: M,
    config: ScorerConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl<T: TextTokenizer, M: NextTokenModel> AgreementScorer<T, M> {
    pub fn new(tokenizer: T, model: M, config: ScorerConfig) -> Self {
        Self { tokenizer, model, config, cancel: None }
    }

    /// Checked before every position; once set, the run fails with `Cancelled`.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn model(&self) -> &M { &self.model }

    pub fn score(&mut self, signature: &str, implementation: &str) -> Result<ScoreReport> {
        self.score_observed(signature, implementation, &mut ())
    }

    pub fn score_observed(&mut self, signature: &str, implementation: &str, observer: &mut dyn TokenObserver) -> Result<ScoreReport> {
        let sig = self.tokenizer.encode(signature).map_err(ScoreError::tokenizer)?;
        let imp = self.tokenizer.encode(implementation).map_err(ScoreError::tokenizer)?;
        preflight(&self.tokenizer, "implementation", &imp).map_err(ScoreError::tokenizer)?;
        self.score_tokens(&sig, &imp, observer)
    }

    /// Score pre-tokenized input. Fewer than three implementation tokens leaves
    /// nothing between the boundaries: the report is empty and the model is not called.
    pub fn score_tokens(&mut self, signature: &[u32], implementation: &[u32], observer: &mut dyn TokenObserver) -> Result<ScoreReport> {
        check_floor(self.config.probability_floor, self.model.vocab_size())?;
        let total = implementation.len();
        let mut report = ScoreReport {
            signature_tokens: signature.len(),
            implementation_tokens: total,
            records: Vec::with_capacity(total.saturating_sub(2)),
        };
        observer.on_start(total.saturating_sub(2));
        if total <= 2 {
            debug!(total, "implementation has no scorable tokens");
            observer.on_finish();
            return Ok(report);
        }

        for position in 1..total - 1 {
            if let Some(flag) = &self.cancel {
                if flag.load(Ordering::Relaxed) { return Err(ScoreError::Cancelled { position }); }
            }
            let target_id = implementation[position];
            let context = reconstruct_context(&self.tokenizer, signature, implementation, position, self.config.max_context)?;
            let dist = self.next_token_distribution(&context).map_err(|e| e.at_position(position))?;

            let best_id = dist.argmax();
            let target_probability = dist.get(target_id)
                .ok_or(ScoreError::VocabularyMismatch { token: target_id, vocab_size: dist.len() })?;
            let best_probability = dist.probs()[best_id as usize];
            let agreement = target_probability / best_probability;

            let record = TokenScore {
                position,
                target_id,
                target_text: self.tokenizer.decode(&[target_id]).map_err(ScoreError::tokenizer)?,
                best_id,
                best_text: self.tokenizer.decode(&[best_id]).map_err(ScoreError::tokenizer)?,
                agreement,
                target_probability,
                best_probability,
                context_len: context.len(),
            };
            observer.on_token(&record, total);
            report.records.push(record);
        }
        observer.on_finish();
        info!(positions = report.records.len(), "scoring run complete");
        Ok(report)
    }

    /// Exactly one model call.
    pub fn next_token_distribution(&mut self, context: &[u32]) -> Result<Distribution> {
        let logits = self.model.predict(context).map_err(ScoreError::model)?;
        Distribution::from_logits(&logits, self.config.probability_floor)
    }
}
