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

//! Context reconstruction for one target position.
//!
//! The context is `signature ++ implementation[..position]`, but it is not
//! submitted as that concatenation. It is decoded to text and encoded again,
//! because two independently tokenized fragments can tokenize differently
//! once joined. The re-encoded ids are what the model would have seen had it
//! produced the text itself. Dropping the round trip changes scores.

use crate::adapter::TextTokenizer;
use crate::error::{Result, ScoreError};

/// Build the ids the model conditions on before predicting
/// `implementation[position]`.
///
/// `max_context` keeps only the tail of the re-encoded context.
pub fn reconstruct_context<T: TextTokenizer + ?Sized>(
    tokenizer: &T,
    signature: &[u32],
    implementation: &[u32],
    position: usize,
    max_context: Option<usize>,
) -> Result<Vec<u32>> {
    let prefix = &implementation[..position.min(implementation.len())];
    let mut joined = Vec::with_capacity(signature.len() + prefix.len());
    joined.extend_from_slice(signature);
    joined.extend_from_slice(prefix);

    let text = tokenizer.decode(&joined).map_err(ScoreError::tokenizer)?;
    let mut ids = tokenizer.encode(&text).map_err(ScoreError::tokenizer)?;

    if let Some(max) = max_context {
        if ids.len() > max {
            let start = ids.len() - max;
            ids.drain(..start);
        }
    }
    Ok(ids)
}
