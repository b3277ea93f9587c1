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

use std::fs;
use std::path::PathBuf;

use agreement::tokenizer::check_round_trip;
use agreement::{
    AgreementScorer, HfTokenizer, Metric, NextTokenModel, RoundTrip, ScoreError, ScoreReport, ScorerConfig,
    Summary, TextTokenizer, TokenObserver, TokenizerOptions, TracingObserver, DEFAULT_PROBABILITY_FLOOR,
};
use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{ArgGroup, Parser, Subcommand, ValueEnum, ValueHint};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod hub;
mod models;
mod progress;
mod report;

use hub::{blake3_file_bin16, blake3_files_bin16, ensure_local_file, ensure_model_artifacts, hex16, DEFAULT_MODEL_FILE, DEFAULT_TOKENIZER_FILE};
use models::{detect_device, load_model, Backend};
use progress::ProgressObserver;
use report::{read_pair, write_csv, write_json, JsonReport, LabelledRun, RunMeta};

#[derive(Parser, Debug)]
#[command(name = "candlescore", about = "Token-level agreement between a language model and a text (not perplexity)")]
struct Cli {
    /// Model family of the checkpoint
    #[arg(long, value_enum, default_value_t = Backend::Smollm, global = true)]
    backend: Backend,

    /// Force CPU
    #[arg(long, global = true)]
    cpu: bool,

    /// Progress bar with the running mean of the selected metric (per-token lines still go to the log)
    #[arg(long, global = true)]
    verbose: bool,

    /// Local weights (.safetensors or .index.json); skips the hub
    #[arg(long, value_hint = ValueHint::FilePath, global = true)]
    model: Option<PathBuf>,
    /// Local config.json; skips the hub
    #[arg(long, value_hint = ValueHint::FilePath, global = true)]
    config: Option<PathBuf>,
    /// Hub repo for weights and config (defaults per backend)
    #[arg(long, global = true)]
    model_repo: Option<String>,
    #[arg(long, default_value = DEFAULT_MODEL_FILE, global = true)]
    model_file: String,

    #[arg(long, value_hint = ValueHint::FilePath, global = true)]
    tokenizer: Option<PathBuf>,
    /// Hub repo for the tokenizer (defaults to the model repo)
    #[arg(long, global = true)]
    tokenizer_repo: Option<String>,
    #[arg(long, default_value = DEFAULT_TOKENIZER_FILE, global = true)]
    tokenizer_file: String,
    /// Encode without the tokenizer's BOS/EOS post-processing
    #[arg(long, global = true)]
    no_special_tokens: bool,

    /// Keep only the last N context tokens per prediction
    #[arg(long, global = true)]
    max_context: Option<usize>,
    /// Lower bound applied to every probability before renormalizing; must be in (0, 1/vocab)
    #[arg(long, value_parser = parse_probability_floor, global = true)]
    probability_floor: Option<f64>,
    /// Which per-token value feeds mean/median
    #[arg(long, value_enum, default_value_t = MetricArg::Agreement, global = true)]
    metric: MetricArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MetricArg {
    /// p(actual) / p(best)
    Agreement,
    /// p(actual)
    TargetProbability,
}

impl From<MetricArg> for Metric {
    fn from(m: MetricArg) -> Self {
        match m {
            MetricArg::Agreement => Metric::Agreement,
            MetricArg::TargetProbability => Metric::TargetProbability,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Score one signature/implementation pair
    Score(ScoreArgs),
    /// Score two pair files with the same model and compare their means
    Compare(CompareArgs),
    /// Check that a text's token ids survive decode -> encode
    Roundtrip(RoundtripArgs),
}

#[derive(Parser, Debug)]
#[command(group(ArgGroup::new("sig").required(true).args(["signature", "signature_file"])))]
#[command(group(ArgGroup::new("imp").required(true).args(["implementation", "implementation_file"])))]
struct ScoreArgs {
    #[arg(long)]
    signature: Option<String>,
    #[arg(long, value_hint = ValueHint::FilePath)]
    signature_file: Option<PathBuf>,
    #[arg(long)]
    implementation: Option<String>,
    #[arg(long, value_hint = ValueHint::FilePath)]
    implementation_file: Option<PathBuf>,
    #[command(flatten)]
    out: OutputArgs,
}

#[derive(Parser, Debug)]
struct CompareArgs {
    /// JSON pair file: {"signature": "...", "implementation": "..."}
    #[arg(value_hint = ValueHint::FilePath)]
    a: PathBuf,
    #[arg(value_hint = ValueHint::FilePath)]
    b: PathBuf,
    #[arg(long, default_value = "good")]
    a_label: String,
    #[arg(long, default_value = "bad")]
    b_label: String,
    #[command(flatten)]
    out: OutputArgs,
}

#[derive(Parser, Debug)]
struct OutputArgs {
    /// Write a JSON report with every per-token record
    #[arg(long, value_hint = ValueHint::FilePath)]
    json: Option<PathBuf>,
    /// Write per-token records as CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    csv: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(group(ArgGroup::new("input").required(true).args(["text", "file"])))]
struct RoundtripArgs {
    #[arg(long)]
    text: Option<String>,
    #[arg(long, value_hint = ValueHint::FilePath)]
    file: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match &cli.command {
        Commands::Score(args) => run_score(&cli, args),
        Commands::Compare(args) => run_compare(&cli, args),
        Commands::Roundtrip(args) => run_roundtrip(&cli, args),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Range the floor can take without knowing the vocabulary; the scorer also
/// checks the `1/vocab` ceiling.
fn parse_probability_floor(s: &str) -> std::result::Result<f64, String> {
    let v: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if v > 0.0 && v < 1.0 { Ok(v) } else { Err(format!("{s} is not in (0, 1)")) }
}

fn read_text(text: &Option<String>, file: &Option<PathBuf>) -> Result<String> {
    if let Some(t) = text { return Ok(t.clone()); }
    let p = file.as_ref().ok_or_else(|| anyhow!("one of text/file is required"))?;
    fs::read_to_string(p).with_context(|| format!("failed to read {}", p.display()))
}

fn scorer_config(cli: &Cli) -> ScorerConfig {
    ScorerConfig {
        max_context: cli.max_context,
        probability_floor: cli.probability_floor.unwrap_or(DEFAULT_PROBABILITY_FLOOR),
    }
}

fn model_repo(cli: &Cli) -> String {
    cli.model_repo.clone().unwrap_or_else(|| cli.backend.default_repo().to_string())
}

fn load_tokenizer(cli: &Cli) -> Result<(HfTokenizer, PathBuf)> {
    let repo = cli.tokenizer_repo.clone().unwrap_or_else(|| model_repo(cli));
    let path = ensure_local_file(&repo, &cli.tokenizer_file, &cli.tokenizer)?;
    let options = TokenizerOptions { add_special_tokens: !cli.no_special_tokens, ..TokenizerOptions::default() };
    Ok((HfTokenizer::from_file(&path, options)?, path))
}

struct Loaded {
    tokenizer: HfTokenizer,
    model: Box<dyn NextTokenModel>,
    meta: RunMeta,
}

fn load(cli: &Cli) -> Result<Loaded> {
    let device = detect_device(cli.cpu);
    eprintln!("Device: {}", if device.is_cuda() { "CUDA" } else { "CPU" });

    let artifacts = ensure_model_artifacts(&model_repo(cli), &cli.model_file, &cli.model, &cli.config)?;
    let (tokenizer, tok_path) = load_tokenizer(cli)?;
    let model_hash16 = blake3_files_bin16(&artifacts.weights)?;
    let tokenizer_hash16 = blake3_file_bin16(&tok_path)?;

    let model = load_model(cli.backend, &artifacts.weights, &artifacts.config, device)?;
    if tokenizer.vocab_size() > model.vocab_size() {
        warn!(tokenizer = tokenizer.vocab_size(), model = model.vocab_size(), "tokenizer vocabulary larger than model output");
    }
    info!(backend = cli.backend.name(), weights = %artifacts.weights_repr, model = %hex16(&model_hash16), "model loaded");

    let meta = RunMeta {
        started_at: Utc::now().to_rfc3339(),
        backend: cli.backend.name(),
        weights: artifacts.weights_repr,
        model_blake3: hex16(&model_hash16),
        tokenizer_blake3: hex16(&tokenizer_hash16),
        metric: cli.metric.into(),
        max_context: cli.max_context,
        probability_floor: cli.probability_floor.unwrap_or(DEFAULT_PROBABILITY_FLOOR),
    };
    Ok(Loaded { tokenizer, model, meta })
}

fn score_one<T: TextTokenizer, M: NextTokenModel>(
    scorer: &mut AgreementScorer<T, M>,
    label: &str,
    signature: &str,
    implementation: &str,
    verbose: bool,
    metric: Metric,
) -> Result<ScoreReport> {
    let mut observer: Box<dyn TokenObserver> = if verbose {
        Box::new(ProgressObserver::new(label, metric))
    } else {
        Box::new(TracingObserver::new(label))
    };
    scorer.score_observed(signature, implementation, observer.as_mut())
        .with_context(|| format!("scoring run '{label}' failed"))
}

/// Print the run's summary; `None` when there was nothing to score.
fn print_summary(label: &str, report: &ScoreReport, metric: Metric) -> Result<Option<Summary>> {
    match report.summary(metric) {
        Ok(s) => {
            println!("{label}: tokens={} mean={:.6} median={:.6} min={:.6} max={:.6}", s.count, s.mean, s.median, s.min, s.max);
            Ok(Some(s))
        }
        Err(ScoreError::AggregationOnEmpty) => {
            println!("{label}: no scorable tokens ({} implementation tokens)", report.implementation_tokens);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn write_outputs(out: &OutputArgs, meta: &RunMeta, runs: &[(&str, &ScoreReport, Option<Summary>)], mean_difference: Option<f64>) -> Result<()> {
    if let Some(path) = &out.json {
        let report = JsonReport {
            meta,
            runs: runs.iter().map(|&(label, report, summary)| LabelledRun { label, summary, report }).collect(),
            mean_difference,
        };
        write_json(path, &report)?;
        info!(path = %path.display(), "json report written");
    }
    if let Some(path) = &out.csv {
        let rows: Vec<(&str, &ScoreReport)> = runs.iter().map(|&(l, r, _)| (l, r)).collect();
        write_csv(path, &rows)?;
        info!(path = %path.display(), "csv written");
    }
    Ok(())
}

fn run_score(cli: &Cli, args: &ScoreArgs) -> Result<()> {
    let signature = read_text(&args.signature, &args.signature_file)?;
    let implementation = read_text(&args.implementation, &args.implementation_file)?;
    let metric: Metric = cli.metric.into();

    let Loaded { tokenizer, model, meta } = load(cli)?;
    let mut scorer = AgreementScorer::new(&tokenizer, model, scorer_config(cli));
    let report = score_one(&mut scorer, "score", &signature, &implementation, cli.verbose, metric)?;
    let summary = print_summary("score", &report, metric)?;
    write_outputs(&args.out, &meta, &[("score", &report, summary)], None)
}

fn run_compare(cli: &Cli, args: &CompareArgs) -> Result<()> {
    let a = read_pair(&args.a)?;
    let b = read_pair(&args.b)?;
    let metric: Metric = cli.metric.into();

    let Loaded { tokenizer, model, meta } = load(cli)?;
    let mut scorer = AgreementScorer::new(&tokenizer, model, scorer_config(cli));
    let report_a = score_one(&mut scorer, &args.a_label, &a.signature, &a.implementation, cli.verbose, metric)?;
    let report_b = score_one(&mut scorer, &args.b_label, &b.signature, &b.implementation, cli.verbose, metric)?;

    let summary_a = print_summary(&args.a_label, &report_a, metric)?;
    let summary_b = print_summary(&args.b_label, &report_b, metric)?;
    let mean_difference = mean_difference(summary_a.as_ref(), summary_b.as_ref());
    if let Some(d) = mean_difference {
        println!("mean({}) - mean({}) = {:+.6}", args.a_label, args.b_label, d);
    }
    write_outputs(
        &args.out,
        &meta,
        &[(args.a_label.as_str(), &report_a, summary_a), (args.b_label.as_str(), &report_b, summary_b)],
        mean_difference,
    )
}

fn mean_difference(a: Option<&Summary>, b: Option<&Summary>) -> Option<f64> {
    Some(a?.mean - b?.mean)
}

fn run_roundtrip(cli: &Cli, args: &RoundtripArgs) -> Result<()> {
    let text = read_text(&args.text, &args.file)?;
    let (tokenizer, _) = load_tokenizer(cli)?;
    let ids = tokenizer.encode(&text)?;
    report_round_trip(&tokenizer, &ids)
}

fn report_round_trip<T: TextTokenizer>(tokenizer: &T, ids: &[u32]) -> Result<()> {
    match check_round_trip(tokenizer, ids)? {
        RoundTrip::Stable => {
            println!("Roundtrip OK. {} tokens", ids.len());
            Ok(())
        }
        RoundTrip::Diverged { first_diff, original_len, roundtrip_len } => {
            bail!("roundtrip mismatch at token {first_diff}: {original_len} tokens re-encode to {roundtrip_len}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn score_requires_both_inputs() {
        assert!(Cli::try_parse_from(["candlescore", "score", "--signature", "def f(n):"]).is_err());
        let cli = Cli::try_parse_from(["candlescore", "--cpu", "score", "--signature", "def f(n):", "--implementation-file", "imp.py"]).unwrap();
        assert!(cli.cpu);
        match cli.command {
            Commands::Score(args) => {
                assert_eq!(args.signature.as_deref(), Some("def f(n):"));
                assert_eq!(args.implementation_file, Some(PathBuf::from("imp.py")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_options_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "candlescore", "compare", "good.json", "bad.json",
            "--backend", "phi", "--metric", "target-probability", "--max-context", "256",
        ]).unwrap();
        assert_eq!(cli.backend, Backend::Phi);
        assert_eq!(Metric::from(cli.metric), Metric::TargetProbability);
        let cfg = scorer_config(&cli);
        assert_eq!(cfg.max_context, Some(256));
        assert_eq!(cfg.probability_floor, DEFAULT_PROBABILITY_FLOOR);
        assert_eq!(model_repo(&cli), "microsoft/phi-1_5");
    }

    #[test]
    fn probability_floor_must_be_a_probability() {
        for bad in ["0", "-1e-9", "1", "2.5", "nan", "inf", "abc"] {
            assert!(Cli::try_parse_from(["candlescore", "roundtrip", "--text", "x", "--probability-floor", bad]).is_err(), "{bad}");
        }
        let cli = Cli::try_parse_from(["candlescore", "roundtrip", "--text", "x", "--probability-floor", "1e-12"]).unwrap();
        assert_eq!(scorer_config(&cli).probability_floor, 1e-12);
    }

    #[test]
    fn mean_difference_needs_both_runs() {
        let s = |mean| Summary { count: 1, mean, median: mean, min: mean, max: mean };
        assert_eq!(mean_difference(Some(&s(0.75)), Some(&s(0.5))), Some(0.25));
        assert_eq!(mean_difference(None, Some(&s(0.5))), None);
    }

    #[test]
    fn read_text_prefers_inline_text() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let p = dir.path().join("imp.py");
        fs::write(&p, "\n    return n")?;
        assert_eq!(read_text(&Some("x".into()), &Some(p.clone()))?, "x");
        assert_eq!(read_text(&None, &Some(p))?, "\n    return n");
        assert!(read_text(&None, &None).is_err());
        Ok(())
    }
}
