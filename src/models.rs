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

// * Candle-backed next-token models for SmolLM (LLaMA architecture) and Phi.
// * Every prediction starts from an empty KV cache and runs the full context, so
// * a session answers each context independently of the previous one.

use std::path::{Path, PathBuf};

use agreement::NextTokenModel;
use anyhow::{bail, Context, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::llama::{
    Cache as LlamaCache, Config as LlamaRuntimeConfig, Llama as LlamaModel, LlamaConfig,
};
use candle_transformers::models::phi::{Config as PhiConfig, Model as PhiModel};
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// LLaMA-architecture checkpoints (SmolLM2 by default)
    Smollm,
    /// Phi-1/1.5/2 checkpoints
    Phi,
}

impl Backend {
    pub fn default_repo(self) -> &'static str {
        match self {
            Backend::Smollm => "HuggingFaceTB/SmolLM2-135M",
            Backend::Phi => "microsoft/phi-1_5",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Backend::Smollm => "smollm",
            Backend::Phi => "phi",
        }
    }
}

pub fn detect_device(force_cpu: bool) -> Device {
    if force_cpu { Device::Cpu } else { Device::new_cuda(0).unwrap_or(Device::Cpu) }
}

pub fn load_model(backend: Backend, weights: &[PathBuf], config_path: &Path, device: Device) -> Result<Box<dyn NextTokenModel>> {
    Ok(match backend {
        Backend::Smollm => Box::new(SmolLmSession::load(weights, config_path, device)?),
        Backend::Phi => Box::new(PhiSession::load(weights, config_path, device)?),
    })
}

// ---------------- SmolLM (LLaMA-like) ----------------

pub struct SmolLmSession {
    device: Device,
    model: LlamaModel,
    cache: LlamaCache,
    runtime_cfg: LlamaRuntimeConfig,
    dtype: DType,
}

impl SmolLmSession {
    pub fn load(weights_paths: &[PathBuf], config_path: &Path, device: Device) -> Result<Self> {
        let cfg_bytes = std::fs::read(config_path)
            .with_context(|| format!("failed reading {}", config_path.display()))?;
        let llama_cfg: LlamaConfig = serde_json::from_slice(&cfg_bytes)
            .with_context(|| "failed to parse config.json as HF LlamaConfig")?;
        let runtime_cfg: LlamaRuntimeConfig = llama_cfg.into_config(false);
        let dtype = if device.is_cuda() { DType::F16 } else { DType::F32 };
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(weights_paths, dtype, &device)? };
        let model = LlamaModel::load(vb, &runtime_cfg)
            .with_context(|| "failed constructing LLaMA model from safetensors")?;
        let cache = LlamaCache::new(true, dtype, &runtime_cfg, &device)
            .with_context(|| "failed to create KV cache")?;
        Ok(Self { device, model, cache, runtime_cfg, dtype })
    }

    pub fn max_context_length(&self) -> usize { self.runtime_cfg.max_position_embeddings }
}

impl NextTokenModel for SmolLmSession {
    fn vocab_size(&self) -> usize { self.runtime_cfg.vocab_size }

    fn predict(&mut self, context: &[u32]) -> Result<Vec<f32>> {
        if context.is_empty() { bail!("predict called with empty context"); }
        if context.len() > self.max_context_length() {
            bail!("context of {} tokens exceeds model limit {}; pass --max-context", context.len(), self.max_context_length());
        }
        self.cache = LlamaCache::new(true, self.dtype, &self.runtime_cfg, &self.device)
            .with_context(|| "failed to reset KV cache")?;
        let x = Tensor::new(context, &self.device)?.reshape((1, context.len()))?;
        let logits = self.model.forward(&x, 0, &mut self.cache)?;
        last_position_logits(logits)
    }
}

// ---------------- Phi ----------------

pub struct PhiSession {
    device: Device,
    model: PhiModel,
    vocab: usize,
    max_positions: usize,
}

impl PhiSession {
    pub fn load(weights_paths: &[PathBuf], config_path: &Path, device: Device) -> Result<Self> {
        let cfg_bytes = std::fs::read(config_path)
            .with_context(|| format!("failed reading {}", config_path.display()))?;
        let cfg: PhiConfig = serde_json::from_slice(&cfg_bytes)
            .with_context(|| "failed to parse config.json as HF Phi config")?;
        let vocab = read_usize_from_config(&cfg_bytes, "vocab_size")
            .with_context(|| format!("vocab_size missing from {}", config_path.display()))?;
        let max_positions = read_usize_from_config(&cfg_bytes, "max_position_embeddings").unwrap_or(2048);
        // Phi activations overflow in F16; keep F32 on every device.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(weights_paths, DType::F32, &device)? };
        let model = PhiModel::new(&cfg, vb)
            .with_context(|| "failed constructing Phi model from safetensors")?;
        Ok(Self { device, model, vocab, max_positions })
    }
}

impl NextTokenModel for PhiSession {
    fn vocab_size(&self) -> usize { self.vocab }

    fn predict(&mut self, context: &[u32]) -> Result<Vec<f32>> {
        if context.is_empty() { bail!("predict called with empty context"); }
        if context.len() > self.max_positions {
            bail!("context of {} tokens exceeds model limit {}; pass --max-context", context.len(), self.max_positions);
        }
        self.model.clear_kv_cache();
        let x = Tensor::new(context, &self.device)?.unsqueeze(0)?;
        let logits = self.model.forward(&x)?;
        last_position_logits(logits)
    }
}

fn read_usize_from_config(cfg_bytes: &[u8], key: &str) -> Option<usize> {
    let v: serde_json::Value = serde_json::from_slice(cfg_bytes).ok()?;
    v.get(key).and_then(|x| x.as_u64()).map(|x| x as usize)
}

/// Reduce model output to the logits row of the final position.
fn last_position_logits(logits: Tensor) -> Result<Vec<f32>> {
    let t = match logits.rank() {
        1 => logits,
        2 => logits.i((logits.dim(0)? - 1, ..))?,
        3 => logits.i((0, logits.dim(1)? - 1, ..))?,
        _ => bail!("unexpected logits shape {:?}", logits.shape()),
    };
    Ok(t.to_dtype(DType::F32)?.to_vec1::<f32>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_position_of_batched_sequence() -> Result<()> {
        let t = Tensor::new(&[[[0f32, 1.0], [2.0, 3.0], [4.0, 5.0]]], &Device::Cpu)?;
        assert_eq!(last_position_logits(t)?, vec![4.0, 5.0]);
        Ok(())
    }

    #[test]
    fn last_row_of_matrix() -> Result<()> {
        let t = Tensor::new(&[[7f32, 8.0, 9.0]], &Device::Cpu)?;
        assert_eq!(last_position_logits(t)?, vec![7.0, 8.0, 9.0]);
        Ok(())
    }

    #[test]
    fn rank_four_is_rejected() -> Result<()> {
        let t = Tensor::zeros((1, 1, 1, 2), DType::F32, &Device::Cpu)?;
        assert!(last_position_logits(t).is_err());
        Ok(())
    }

    #[test]
    fn config_fields_are_read_leniently() {
        let cfg = br#"{"vocab_size": 51200, "max_position_embeddings": 2048}"#;
        assert_eq!(read_usize_from_config(cfg, "vocab_size"), Some(51200));
        assert_eq!(read_usize_from_config(cfg, "rope_theta"), None);
        assert_eq!(read_usize_from_config(b"not json", "vocab_size"), None);
    }

    #[test]
    fn backend_defaults() {
        assert_eq!(Backend::Smollm.default_repo(), "HuggingFaceTB/SmolLM2-135M");
        assert_eq!(Backend::Phi.name(), "phi");
    }
}
