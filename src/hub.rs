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

// * Model/tokenizer artifact resolution (explicit paths or HF Hub) and
// * BLAKE3 fingerprints of what was actually loaded.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use blake3::Hasher;
use hf_hub::api::sync::{Api, ApiRepo};

pub const DEFAULT_MODEL_FILE: &str = "auto";
pub const DEFAULT_TOKENIZER_FILE: &str = "tokenizer.json";

/// Weights shards, the name they were selected by, and the config.json path.
pub struct ModelArtifacts {
    pub weights: Vec<PathBuf>,
    pub weights_repr: String,
    pub config: PathBuf,
}

pub fn ensure_local_file(repo: &str, file_in_repo: &str, explicit: &Option<PathBuf>) -> Result<PathBuf> {
    if let Some(p) = explicit { return Ok(p.clone()); }
    let api = Api::new()?;
    let r = api.model(repo.to_string());
    let local = r.get(file_in_repo)
        .with_context(|| format!("hf-hub download failed for {repo}/{file_in_repo}. If gated, accept license and export HUGGINGFACE_TOKEN"))?;
    Ok(local)
}

/// Shard file names listed in a safetensors `*.index.json` weight map.
pub fn shard_names(index_json: &[u8]) -> Result<BTreeSet<String>> {
    let index: serde_json::Value = serde_json::from_slice(index_json)?;
    let Some(map) = index.get("weight_map").and_then(|v| v.as_object()) else {
        bail!("index.json missing weight_map");
    };
    Ok(map.values().filter_map(|f| f.as_str()).map(str::to_string).collect())
}

pub fn ensure_model_artifacts(repo: &str, model_file: &str, explicit_model: &Option<PathBuf>, explicit_config: &Option<PathBuf>) -> Result<ModelArtifacts> {
    let config = ensure_local_file(repo, "config.json", explicit_config)?;
    if let Some(p) = explicit_model {
        let name = p.file_name().and_then(|s| s.to_str()).unwrap_or("weights").to_string();
        if name.ends_with(".safetensors") {
            return Ok(ModelArtifacts { weights: vec![p.clone()], weights_repr: name, config });
        } else if name.ends_with(".index.json") {
            let dir = p.parent().unwrap_or_else(|| Path::new("."));
            let bytes = std::fs::read(p).with_context(|| format!("failed reading {}", p.display()))?;
            let weights = shard_names(&bytes)?.into_iter().map(|f| dir.join(f)).collect();
            return Ok(ModelArtifacts { weights, weights_repr: name, config });
        }
        bail!("--model must point to a .safetensors or .index.json file");
    }

    let api = Api::new()?;
    let repo_api = api.model(repo.to_string());
    let resolve_index = |repo_api: &ApiRepo, idx_name: &str| -> Result<Vec<PathBuf>> {
        let idx = repo_api.get(idx_name)?;
        let bytes = std::fs::read(&idx)?;
        let mut out = Vec::new();
        for f in shard_names(&bytes)? { out.push(repo_api.get(&f)?); }
        Ok(out)
    };
    match model_file {
        "auto" => {
            if let Ok(one) = repo_api.get("model.safetensors") {
                Ok(ModelArtifacts { weights: vec![one], weights_repr: "model.safetensors".to_string(), config })
            } else {
                let weights = resolve_index(&repo_api, "model.safetensors.index.json")?;
                Ok(ModelArtifacts { weights, weights_repr: "model.safetensors.index.json".to_string(), config })
            }
        }
        name if name.ends_with(".safetensors") => {
            let p = repo_api.get(name)?;
            Ok(ModelArtifacts { weights: vec![p], weights_repr: name.to_string(), config })
        }
        name if name.ends_with(".index.json") => {
            let weights = resolve_index(&repo_api, name)?;
            Ok(ModelArtifacts { weights, weights_repr: name.to_string(), config })
        }
        other => bail!("Unsupported model file '{other}'. Use 'auto', '*.safetensors', or '*.index.json'."),
    }
}

fn hash_file_into(hasher: &mut Hasher, path: &Path) -> Result<()> {
    let mut f = File::open(path).with_context(|| format!("failed opening {}", path.display()))?;
    let mut buf = [0u8; 1 << 16];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 { break; }
        hasher.update(&buf[..n]);
    }
    Ok(())
}

fn truncate16(hasher: Hasher) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&hasher.finalize().as_bytes()[..16]);
    out
}

pub fn blake3_file_bin16(path: &Path) -> Result<[u8; 16]> {
    let mut hasher = Hasher::new();
    hash_file_into(&mut hasher, path)?;
    Ok(truncate16(hasher))
}

/// Order-sensitive digest over several shards; file names are mixed in.
pub fn blake3_files_bin16(paths: &[PathBuf]) -> Result<[u8; 16]> {
    let mut hasher = Hasher::new();
    for p in paths {
        if let Some(name) = p.file_name().and_then(|s| s.to_str()) {
            hasher.update(name.as_bytes());
        }
        hash_file_into(&mut hasher, p)?;
    }
    Ok(truncate16(hasher))
}

pub fn hex16(bytes: &[u8; 16]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
