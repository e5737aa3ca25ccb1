mod config;
mod error;
mod input;
mod logging;
mod model;
mod pipeline;
mod report;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::config::{AnalysisConfig, SampleKind};
use crate::error::{PipelineError, Result};
use crate::input::{JsonStore, TableStore};
use crate::model::backend::ArtifactLoader;
use crate::model::features::FeatureScaler;
use crate::model::scale::{CrossSectionReference, SignalPoint, count_ratio};
use crate::pipeline::stage1_index::{SkippedSource, build_index};
use crate::pipeline::stage2_folds::{
    Fold, IndexedFolds, RowSelection, materialize_folds, partition,
};
use crate::pipeline::stage3_training::{ContainerHandoff, Trainer, assemble_training_inputs};
use crate::pipeline::stage4_ensemble::{EnsembleScorer, PersistedFolds};
use crate::pipeline::stage5_balance::balance;
use crate::pipeline::stage6_output::{
    histogram_file_name, write_balanced_background, write_discriminant_streams, write_histogram,
};
use crate::report::{BalanceReport, RunSummary, write_json};

#[derive(Parser)]
#[command(name = "foldscore")]
#[command(about = "K-fold splitting, ensemble scoring and balanced discriminant collections")]
#[command(version)]
struct Cli {
    /// Log verbosity (trace, debug, info, warn, error). RUST_LOG overrides it.
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split every sample into K fold containers (test/training/validation)
    Split {
        #[arg(short, long)]
        config: PathBuf,
        /// Directory holding the raw sample containers
        #[arg(short, long)]
        input: PathBuf,
        /// Directory receiving `{sample}_fold{f}` containers
        #[arg(short, long)]
        out: PathBuf,
        /// Write gzip-compressed containers
        #[arg(long)]
        compress: bool,
    },

    /// Assemble labeled training/validation inputs of one or all folds
    TrainingInputs {
        #[arg(short, long)]
        config: PathBuf,
        /// Directory holding the fold containers
        #[arg(long)]
        folds: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
        /// Fold to assemble (1-based). Defaults to every fold.
        #[arg(long)]
        fold: Option<usize>,
        /// Training group from the config
        #[arg(long, default_value = "all")]
        group: String,
    },

    /// Score one sample's persisted folds through the K models into a histogram
    Score {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        folds: PathBuf,
        /// Directory holding the per-fold model artifacts
        #[arg(long)]
        models: PathBuf,
        /// Source name: the sample, or `{sample}_{category}` with categories
        #[arg(long)]
        sample: String,
        /// Fold table to score
        #[arg(long, value_enum, default_value = "validation")]
        set: RowSelection,
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Score all samples, write per-sample discriminant streams and a
    /// balanced background collection
    Discriminants {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long)]
        models: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
        /// Rows each fold model scores; `test` gives out-of-fold scores
        #[arg(long, value_enum, default_value = "test")]
        selection: RowSelection,
        /// Override the resampling seed from the config
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        compress: bool,
    },

    /// Cross-section based signal scale factors
    ScaleFactor {
        /// JSON with `reference` and `points`
        #[arg(short, long)]
        input: PathBuf,
        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.log_level);
    if let Err(err) = run(cli.command) {
        tracing::error!(kind = err.kind(), "{err}");
        let body = serde_json::json!({
            "error": { "kind": err.kind(), "message": err.to_string() }
        });
        eprintln!("{body}");
        std::process::exit(err.exit_code());
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Split {
            config,
            input,
            out,
            compress,
        } => cmd_split(&AnalysisConfig::load(&config)?, &input, &out, compress),
        Commands::TrainingInputs {
            config,
            folds,
            out,
            fold,
            group,
        } => cmd_training_inputs(&AnalysisConfig::load(&config)?, &folds, &out, fold, &group),
        Commands::Score {
            config,
            folds,
            models,
            sample,
            set,
            out,
        } => cmd_score(
            &AnalysisConfig::load(&config)?,
            &folds,
            &models,
            &sample,
            set,
            &out,
        ),
        Commands::Discriminants {
            config,
            input,
            models,
            out,
            selection,
            seed,
            compress,
        } => {
            let config = AnalysisConfig::load(&config)?;
            let seed = seed.unwrap_or(config.seed);
            cmd_discriminants(&config, &input, &models, &out, selection, seed, compress)
        }
        Commands::ScaleFactor { input, output } => cmd_scale_factor(&input, output.as_deref()),
    }
}

fn cmd_split(config: &AnalysisConfig, input: &Path, out: &Path, compress: bool) -> Result<()> {
    let raw = JsonStore::new(input);
    let target = JsonStore::new(out).compressed(compress);
    let mut summary = RunSummary::new("split");
    let mut split_any = false;

    // One fold set per source, the same units `discriminants` indexes.
    for (spec, _) in config.sources() {
        let table = match raw.read_table(&spec.container, &spec.table) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(source = %spec.name, kind = e.kind(), "skipping source: {e}");
                summary.skipped.push(SkippedSource {
                    name: spec.name.clone(),
                    kind: e.kind(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let absent: Vec<String> = config
            .required_fields()
            .into_iter()
            .filter(|f| table.column(f).is_none())
            .collect();
        if !absent.is_empty() {
            tracing::warn!(source = %spec.name, ?absent, "skipping source: required fields missing");
            summary.skipped.push(SkippedSource {
                name: spec.name.clone(),
                kind: "schema_mismatch",
                reason: format!("missing fields {absent:?}"),
            });
            continue;
        }

        tracing::info!(source = %spec.name, rows = table.n_rows(), folds = config.folds, "splitting");
        let folds = partition(table.n_rows(), config.folds)?;
        let paths = materialize_folds(&target, &spec.name, &table, &folds)?;
        summary.stage(format!("split/{}", spec.name), table.n_rows());
        summary
            .outputs
            .extend(paths.iter().map(|p| p.display().to_string()));
        split_any = true;
    }

    if !split_any {
        return Err(PipelineError::FatalEmptyInput(
            "no source could be split".to_string(),
        ));
    }
    summary.write(out)
}

fn cmd_training_inputs(
    config: &AnalysisConfig,
    folds_dir: &Path,
    out: &Path,
    fold: Option<usize>,
    group: &str,
) -> Result<()> {
    let features = config.feature_set()?;
    let sources = config.group_sources(group)?;
    let folds_store = JsonStore::new(folds_dir);
    let out_store = JsonStore::new(out);
    let fold_ids: Vec<usize> = match fold {
        Some(f) if f == 0 || f > config.folds => {
            return Err(PipelineError::invalid(format!(
                "fold {f} outside 1..={}",
                config.folds
            )));
        }
        Some(f) => vec![f],
        None => (1..=config.folds).collect(),
    };

    let mut handoff = ContainerHandoff {
        store: &out_store,
        channel: config.channel.clone(),
        group: group.to_string(),
    };
    let mut summary = RunSummary::new("training-inputs");
    for f in fold_ids {
        let inputs = assemble_training_inputs(
            &folds_store,
            &sources,
            &features,
            &config.weight_field,
            f,
        )?;
        summary.stage(format!("fold{f}/training"), inputs.training.len());
        summary.stage(format!("fold{f}/validation"), inputs.validation.len());
        let name = handoff.train(&inputs, &features)?;
        summary.outputs.push(name);
    }
    summary.write(out)
}

fn cmd_score(
    config: &AnalysisConfig,
    folds_dir: &Path,
    models: &Path,
    sample: &str,
    set: RowSelection,
    out: &Path,
) -> Result<()> {
    let table_name = set.table_name()?;
    if !config.sources().iter().any(|(s, _)| s.name == sample) {
        return Err(PipelineError::invalid(format!(
            "source '{sample}' is not configured"
        )));
    }
    tracing::info!(source = sample, table = table_name, "scoring persisted folds");
    let store = JsonStore::new(folds_dir);
    if !(1..=config.folds).any(|f| store.container_exists(&Fold::container_name(sample, f))) {
        return Err(PipelineError::MissingSource {
            name: sample.to_string(),
            reason: format!("no fold containers under {}", folds_dir.display()),
        });
    }
    let features = config.feature_set()?;
    let loader = model_loader(config, models)?;
    let scorer = EnsembleScorer::new(&loader, config.folds, &features, &config.weight_field)?;
    let source = PersistedFolds {
        store: &store,
        sample,
        selection: set,
    };
    let ensemble = scorer.fill_histogram(&source, config.histogram)?;

    let mut summary = RunSummary::new("score");
    for (i, n) in ensemble.rows_per_fold.iter().enumerate() {
        summary.stage(format!("{sample}/fold{}", i + 1), *n);
    }
    let file_name = histogram_file_name(config, sample, set)?;
    let path = write_histogram(out, &file_name, sample, &ensemble)?;
    summary.outputs.push(path.display().to_string());
    summary.write(out)
}

fn model_loader(config: &AnalysisConfig, models: &Path) -> Result<ArtifactLoader> {
    let name = config.model_name()?;
    tracing::info!(
        method = %name.method,
        hyperparameters = name.hyperparameters.raw(),
        k_folds = name.k_folds,
        dir = %models.display(),
        "loading fold models"
    );
    Ok(ArtifactLoader::new(models, name))
}

fn cmd_discriminants(
    config: &AnalysisConfig,
    input: &Path,
    models: &Path,
    out: &Path,
    selection: RowSelection,
    seed: u64,
    compress: bool,
) -> Result<()> {
    let features = config.feature_set()?;
    let source_store = JsonStore::new(input);
    let out_store = JsonStore::new(out).compressed(compress);
    let mut summary = RunSummary::new("discriminants");

    let sources = config.sources();
    let specs: Vec<_> = sources.iter().map(|(s, _)| s.clone()).collect();
    let indexed = build_index(&source_store, &specs, &config.required_fields())?;
    summary.skipped = indexed.skipped.clone();
    for (name, range) in indexed.index.entries() {
        summary.stage(format!("index/{name}"), range.len());
    }

    let resolved = features.resolve(&indexed.table, &config.weight_field, "concatenated table")?;
    let scaler = config.standardize.then(|| FeatureScaler::fit(&resolved));
    tracing::info!(
        features = features.len(),
        standardize = config.standardize,
        "resolved feature columns"
    );
    let loader = model_loader(config, models)?;
    let scorer = EnsembleScorer::new(&loader, config.folds, &features, &config.weight_field)?
        .with_scaler(scaler.as_ref());
    let folds = IndexedFolds::new(&indexed.index, config.folds)?;
    let scores = scorer.score_array(&indexed.table, &folds, selection)?;
    tracing::info!(
        rows = scores.len(),
        ?selection,
        max_multiplicity = scores.max_multiplicity(),
        "scored concatenated table"
    );
    summary.stage("scored", scores.len());

    let mut signal = Vec::new();
    let mut background = Vec::new();
    for (spec, kind) in &sources {
        let slice = scores
            .for_sample(&indexed.index, &spec.name)
            .unwrap_or_default();
        match kind {
            SampleKind::Signal => signal.extend_from_slice(slice),
            SampleKind::Background => background.extend_from_slice(slice),
        }
    }
    // Both classes must be present before anything lands in the output dir.
    if signal.is_empty() {
        return Err(PipelineError::FatalEmptyInput(
            "no signal predictions".to_string(),
        ));
    }
    if background.is_empty() {
        return Err(PipelineError::FatalEmptyInput(
            "no background predictions".to_string(),
        ));
    }

    let weights = indexed
        .table
        .column(&config.weight_field)
        .ok_or_else(|| PipelineError::schema("concatenated table", "no weight column"))?;
    let (container, streams) = write_discriminant_streams(
        &out_store,
        &config.suffix,
        &indexed.index,
        scores.values(),
        weights,
    )?;
    summary.outputs.push(container);
    summary.streams = streams;

    let sampled = balance(&signal, &background, seed)?;
    let bkg_container = write_balanced_background(&out_store, &config.suffix, &sampled)?;
    summary.outputs.push(bkg_container);
    summary.balance = Some(BalanceReport {
        signal: signal.len(),
        background_pool: background.len(),
        sampled: sampled.scores.len(),
        seed,
        with_replacement: sampled.with_replacement,
    });
    summary.scale_factor = Some(count_ratio(signal.len(), sampled.scores.len())?);
    tracing::info!(
        signal = signal.len(),
        background = sampled.scores.len(),
        scale_factor = ?summary.scale_factor,
        "balanced collections ready"
    );
    summary.write(out)
}

#[derive(Debug, Deserialize)]
struct ScaleFactorInput {
    reference: CrossSectionReference,
    points: Vec<SignalPoint>,
}

#[derive(Debug, Serialize)]
struct ScaleFactorRow {
    name: String,
    scale_factor: f64,
}

fn cmd_scale_factor(input: &Path, output: Option<&Path>) -> Result<()> {
    let raw = std::fs::read_to_string(input)?;
    let parsed: ScaleFactorInput = serde_json::from_str(&raw)?;
    let mut rows = Vec::with_capacity(parsed.points.len());
    for point in &parsed.points {
        let sf = parsed.reference.scale_factor(point)?;
        tracing::info!(point = %point.name, scale_factor = sf, "scale factor");
        rows.push(ScaleFactorRow {
            name: point.name.clone(),
            scale_factor: sf,
        });
    }
    match output {
        Some(path) => write_json(path, &rows),
        None => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "../tests/src_inline/main_inline.rs"]
mod tests;
