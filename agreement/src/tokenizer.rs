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

// * Hugging Face tokenizer adapter and the decode -> encode stability check.

use std::path::Path;

use anyhow::{anyhow, Result};
use tokenizers::Tokenizer as InnerTokenizer;
use tracing::warn;

use crate::adapter::TextTokenizer;

#[derive(Debug, Clone, Copy)]
pub struct TokenizerOptions {
    /// Let the tokenizer's post-processor add BOS/EOS style tokens on encode.
    pub add_special_tokens: bool,
    /// Drop special tokens when decoding. Keeps reconstructed contexts from
    /// carrying literal "<s>" text into the next encode.
    pub skip_special_tokens: bool,
}

impl Default for TokenizerOptions {
    fn default() -> Self {
        Self { add_special_tokens: true, skip_special_tokens: true }
    }
}

pub struct HfTokenizer {
    inner: InnerTokenizer,
    options: TokenizerOptions,
}

impl HfTokenizer {
    pub fn from_file(path: &Path, options: TokenizerOptions) -> Result<Self> {
        let inner = InnerTokenizer::from_file(path)
            .map_err(|e| anyhow!("failed loading tokenizer from {}: {e}", path.display()))?;
        Ok(Self { inner, options })
    }

    pub fn from_tokenizer(inner: InnerTokenizer, options: TokenizerOptions) -> Self {
        Self { inner, options }
    }

    pub fn vocab_size(&self) -> usize { self.inner.get_vocab_size(true) }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let enc = self.inner.encode(text, self.options.add_special_tokens)
            .map_err(|e| anyhow!("tokenizer.encode failed: {e}"))?;
        Ok(enc.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner.decode(ids, self.options.skip_special_tokens)
            .map_err(|e| anyhow!("tokenizer.decode failed: {e}"))
    }
}

/// Outcome of re-encoding the decoded form of a token sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundTrip {
    Stable,
    /// First index at which the re-encoded ids differ (or where one side ends).
    Diverged { first_diff: usize, original_len: usize, roundtrip_len: usize },
}

impl RoundTrip {
    pub fn is_stable(&self) -> bool { matches!(self, RoundTrip::Stable) }
}

pub fn check_round_trip<T: TextTokenizer + ?Sized>(tokenizer: &T, ids: &[u32]) -> Result<RoundTrip> {
    let text = tokenizer.decode(ids)?;
    let again = tokenizer.encode(&text)?;
    if again == ids { return Ok(RoundTrip::Stable); }
    let first_diff = ids.iter().zip(again.iter()).position(|(a, b)| a != b)
        .unwrap_or_else(|| ids.len().min(again.len()));
    Ok(RoundTrip::Diverged { first_diff, original_len: ids.len(), roundtrip_len: again.len() })
}

/// Log (not fail) when `ids` do not survive decode -> encode. Context
/// reconstruction goes through text on purpose, so a divergence here explains
/// why scored contexts differ from the naive concatenation.
pub fn preflight<T: TextTokenizer + ?Sized>(tokenizer: &T, label: &str, ids: &[u32]) -> Result<RoundTrip> {
    let rt = check_round_trip(tokenizer, ids)?;
    if let RoundTrip::Diverged { first_diff, original_len, roundtrip_len } = rt {
        warn!(label, first_diff, original_len, roundtrip_len, "tokenizer roundtrip mismatch; contexts will be re-tokenized");
    }
    Ok(rt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stubs::CharTokenizer;
    use std::str::FromStr;

    const WORD_LEVEL_JSON: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": { "[UNK]": 0, "def": 1, "f": 2, "(": 3, "n": 4, "):": 5, "return": 6, "+": 7, "1": 8 },
            "unk_token": "[UNK]"
        }
    }"#;

    fn word_level() -> Result<HfTokenizer> {
        let inner = InnerTokenizer::from_str(WORD_LEVEL_JSON).map_err(|e| anyhow!("{e}"))?;
        Ok(HfTokenizer::from_tokenizer(inner, TokenizerOptions::default()))
    }

    #[test]
    fn hf_ascii_round_trip_is_stable() -> Result<()> {
        let tok = word_level()?;
        let ids = tok.encode("def f(n): return n + 1")?;
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 4, 7, 8]);
        let again = tok.encode(&tok.decode(&ids)?)?;
        assert_eq!(again, ids);
        assert!(check_round_trip(&tok, &ids)?.is_stable());
        Ok(())
    }

    #[test]
    fn hf_unknown_words_map_to_unk() -> Result<()> {
        let tok = word_level()?;
        assert_eq!(tok.encode("lambda")?, vec![0]);
        assert_eq!(tok.vocab_size(), 9);
        Ok(())
    }

    #[test]
    fn divergence_reports_first_differing_index() -> Result<()> {
        let tok = CharTokenizer::merging();
        // Two single-space ids re-encode as one merged id.
        let a = tok.encode("a")?[0];
        let space = tok.encode(" ")?[0];
        let ids = vec![a, space, space, a];
        let rt = check_round_trip(&tok, &ids)?;
        assert_eq!(rt, RoundTrip::Diverged { first_diff: 1, original_len: 4, roundtrip_len: 3 });
        assert!(!preflight(&tok, "implementation", &ids)?.is_stable());
        Ok(())
    }
}
