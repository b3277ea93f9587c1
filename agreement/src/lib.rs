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

//! How strongly does a language model agree with a piece of text?
//!
//! Given a fixed preceding context (the *signature*) and a text (the
//! *implementation*), [`AgreementScorer`] walks the implementation token by
//! token and reports, per position, the ratio between the model's probability
//! for the actual token and for its own favourite. Two texts written against
//! the same signature can then be compared by the [`aggregate`] statistics.
//!
//! The model and tokenizer are external; plug them in through
//! [`NextTokenModel`] and [`TextTokenizer`].
//!
//! ```ignore
//! let tokenizer = HfTokenizer::from_file(path, TokenizerOptions::default())?;
//! let mut scorer = AgreementScorer::new(&tokenizer, session, ScorerConfig::default());
//! let report = scorer.score("def f(n):", "\n    return n")?;
//! let summary = report.summary(Metric::Agreement)?;
//! ```

pub mod adapter;
pub mod aggregate;
pub mod context;
pub mod error;
pub mod normalize;
pub mod observer;
pub mod scorer;
pub mod tokenizer;

#[cfg(test)]
pub(crate) mod stubs;

pub use adapter::{NextTokenModel, TextTokenizer};
pub use aggregate::{mean, median, summarize, Summary};
pub use error::{AdapterKind, Result, ScoreError};
pub use normalize::{Distribution, DEFAULT_PROBABILITY_FLOOR};
pub use observer::{TokenObserver, TracingObserver};
pub use scorer::{AgreementScorer, Metric, ScoreReport, ScorerConfig, TokenScore};
pub use tokenizer::{HfTokenizer, RoundTrip, TokenizerOptions};
