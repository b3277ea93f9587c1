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

// * Seams to the two external collaborators: the tokenizer and the causal LM.
// * Implementations live next to whatever loads them (HF tokenizer here,
// * candle sessions in the binary crate, stubs in tests).

use anyhow::Result;

/// Text <-> token id mapping. Must be deterministic.
pub trait TextTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;
    fn decode(&self, ids: &[u32]) -> Result<String>;
}

/// Next-token prediction over a whole context.
///
/// `predict` must behave as a pure function of `context`: any KV cache or
/// recurrent state is reset before the context is run. The returned vector holds
/// one logit per vocabulary entry for the position after the last context token.
pub trait NextTokenModel {
    fn vocab_size(&self) -> usize;
    fn predict(&mut self, context: &[u32]) -> Result<Vec<f32>>;
}

impl<T: TextTokenizer + ?Sized> TextTokenizer for &T {
    fn encode(&self, text: &str) -> Result<Vec<u32>> { (**self).encode(text) }
    fn decode(&self, ids: &[u32]) -> Result<String> { (**self).decode(ids) }
}

impl<M: NextTokenModel + ?Sized> NextTokenModel for Box<M> {
    fn vocab_size(&self) -> usize { (**self).vocab_size() }
    fn predict(&mut self, context: &[u32]) -> Result<Vec<f32>> { (**self).predict(context) }
}
