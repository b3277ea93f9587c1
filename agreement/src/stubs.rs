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

// * In-memory tokenizer and model doubles for unit tests.

use anyhow::{bail, Result};

use crate::adapter::{NextTokenModel, TextTokenizer};
use crate::observer::TokenObserver;
use crate::scorer::TokenScore;

pub const BOS: u32 = 1;
pub const EOS: u32 = 2;
const DOUBLE_SPACE: u32 = 3;
const OFFSET: u32 = 4;
pub const CHAR_VOCAB: usize = 128 + OFFSET as usize;

/// One id per ASCII character. Optionally wraps every encoding in BOS/EOS and
/// optionally merges "  " into a single id, which makes it non
/// concatenation-stable the way real BPE vocabularies are.
#[derive(Debug, Default, Clone, Copy)]
pub struct CharTokenizer {
    boundaries: bool,
    merge_spaces: bool,
}

impl CharTokenizer {
    pub fn plain() -> Self { Self::default() }
    pub fn with_boundaries() -> Self { Self { boundaries: true, merge_spaces: false } }
    pub fn merging() -> Self { Self { boundaries: false, merge_spaces: true } }

    pub fn id(c: char) -> u32 { c as u32 + OFFSET }
}

impl TextTokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut out = Vec::with_capacity(text.len() + 2);
        if self.boundaries { out.push(BOS); }
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if !c.is_ascii() { bail!("non-ascii character {c:?}"); }
            if self.merge_spaces && c == ' ' && chars.peek() == Some(&' ') {
                chars.next();
                out.push(DOUBLE_SPACE);
            } else {
                out.push(Self::id(c));
            }
        }
        if self.boundaries { out.push(EOS); }
        Ok(out)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let mut s = String::with_capacity(ids.len());
        for &id in ids {
            match id {
                BOS | EOS => {}
                DOUBLE_SPACE => s.push_str("  "),
                id if id >= OFFSET && (id as usize) < CHAR_VOCAB => s.push(char::from((id - OFFSET) as u8)),
                other => bail!("unknown token id {other}"),
            }
        }
        Ok(s)
    }
}

/// Same logit for every entry.
#[derive(Debug, Default)]
pub struct UniformModel {
    pub vocab: usize,
    pub calls: usize,
}

impl UniformModel {
    pub fn new(vocab: usize) -> Self { Self { vocab, calls: 0 } }
}

impl NextTokenModel for UniformModel {
    fn vocab_size(&self) -> usize { self.vocab }
    fn predict(&mut self, _context: &[u32]) -> Result<Vec<f32>> {
        self.calls += 1;
        Ok(vec![0.5; self.vocab])
    }
}

/// Puts `peak` on one favourite id and 0 elsewhere; records every context.
#[derive(Debug)]
pub struct PeakedModel {
    pub vocab: usize,
    pub favourite: u32,
    pub peak: f32,
    pub contexts: Vec<Vec<u32>>,
}

impl PeakedModel {
    pub fn new(vocab: usize, favourite: u32, peak: f32) -> Self {
        Self { vocab, favourite, peak, contexts: Vec::new() }
    }
}

impl NextTokenModel for PeakedModel {
    fn vocab_size(&self) -> usize { self.vocab }
    fn predict(&mut self, context: &[u32]) -> Result<Vec<f32>> {
        self.contexts.push(context.to_vec());
        let mut logits = vec![0.0; self.vocab];
        logits[self.favourite as usize] = self.peak;
        Ok(logits)
    }
}

/// Returns fixed logits regardless of context.
#[derive(Debug)]
pub struct FixedModel(pub Vec<f32>);

impl NextTokenModel for FixedModel {
    fn vocab_size(&self) -> usize { self.0.len() }
    fn predict(&mut self, _context: &[u32]) -> Result<Vec<f32>> { Ok(self.0.clone()) }
}

/// Fails on the n-th call (0-based).
#[derive(Debug)]
pub struct FailingModel {
    pub vocab: usize,
    pub fail_at: usize,
    pub calls: usize,
}

impl NextTokenModel for FailingModel {
    fn vocab_size(&self) -> usize { self.vocab }
    fn predict(&mut self, _context: &[u32]) -> Result<Vec<f32>> {
        if self.calls == self.fail_at { bail!("device lost"); }
        self.calls += 1;
        Ok(vec![0.0; self.vocab])
    }
}

/// Collects observed positions and lifecycle calls.
#[derive(Debug, Default)]
pub struct Recorder {
    pub positions: Vec<usize>,
    pub started_with: Option<usize>,
    pub finished: bool,
}

impl TokenObserver for Recorder {
    fn on_start(&mut self, positions: usize) { self.started_with = Some(positions); }
    fn on_token(&mut self, score: &TokenScore, _total: usize) { self.positions.push(score.position); }
    fn on_finish(&mut self) { self.finished = true; }
}
