use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use crate::input::{Column, NamedTable, Table};
use crate::model::backend::{Activation, LinearModel};
use crate::report::SUMMARY_FILE;

static DIR_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn make_temp_dir() -> PathBuf {
    let mut dir = std::env::temp_dir();
    let id = DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
    dir.push(format!("foldscore_main_{}_{}", std::process::id(), id));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_parse_split_defaults() {
    let cli = Cli::try_parse_from([
        "foldscore", "split", "-c", "a.json", "-i", "raw", "-o", "folds",
    ])
    .unwrap();
    assert_eq!(cli.log_level, tracing::Level::INFO);
    assert!(matches!(
        cli.command,
        Commands::Split { compress: false, .. }
    ));
}

#[test]
fn test_parse_score_selection_and_log_level() {
    let cli = Cli::try_parse_from([
        "foldscore",
        "score",
        "-c",
        "a.json",
        "--folds",
        "folds",
        "--models",
        "models",
        "--sample",
        "ttbar",
        "--set",
        "test",
        "-o",
        "out",
        "--log-level",
        "debug",
    ])
    .unwrap();
    assert_eq!(cli.log_level, tracing::Level::DEBUG);
    match cli.command {
        Commands::Score { set, sample, .. } => {
            assert_eq!(set, RowSelection::Test);
            assert_eq!(sample, "ttbar");
        }
        _ => panic!("expected score"),
    }
}

#[test]
fn test_parse_discriminants_defaults() {
    let cli = Cli::try_parse_from([
        "foldscore",
        "discriminants",
        "-c",
        "a.json",
        "-i",
        "raw",
        "--models",
        "m",
        "-o",
        "out",
    ])
    .unwrap();
    match cli.command {
        Commands::Discriminants {
            selection, seed, ..
        } => {
            assert_eq!(selection, RowSelection::Test);
            assert_eq!(seed, None);
        }
        _ => panic!("expected discriminants"),
    }
}

#[test]
fn test_parse_rejects_unknown_selection() {
    assert!(
        Cli::try_parse_from([
            "foldscore", "score", "-c", "a", "--folds", "f", "--models", "m", "--sample", "s",
            "--set", "everything", "-o", "o",
        ])
        .is_err()
    );
}

struct Workspace {
    raw: PathBuf,
    folds: PathBuf,
    models: PathBuf,
    out: PathBuf,
    config: AnalysisConfig,
}

fn events(n: usize, shift: f64) -> Table {
    Table::new(vec![
        Column::new("met_pt", (0..n).map(|i| shift + i as f64 / 64.0).collect()),
        Column::new("mjj", (0..n).map(|i| (i % 4) as f64 * 0.5).collect()),
        Column::new("weight", (0..n).map(|i| if i % 5 == 0 { -0.5 } else { 1.0 }).collect()),
    ])
    .unwrap()
}

fn workspace() -> Workspace {
    let root = make_temp_dir();
    let ws = Workspace {
        raw: root.join("raw"),
        folds: root.join("folds"),
        models: root.join("models"),
        out: root.join("out"),
        config: serde_json::from_str(
            r#"{
                "channel": "mumu",
                "features": ["met_pt", "mjj"],
                "folds": 3,
                "hyperparameters": "300_10_1_0.01",
                "suffix": "_mumu",
                "samples": [
                    {"name": "stop", "kind": "signal"},
                    {"name": "wjets", "kind": "background"},
                    {"name": "ttbar", "kind": "background"}
                ]
            }"#,
        )
        .unwrap(),
    };
    fs::create_dir_all(&ws.models).unwrap();
    let raw = JsonStore::new(&ws.raw);
    raw.write_container("stop", &[NamedTable::new("sel_tree", events(20, 0.5))])
        .unwrap();
    raw.write_container("ttbar", &[NamedTable::new("sel_tree", events(45, -1.0))])
        .unwrap();

    let name = ws.config.model_name().unwrap();
    for fold in 1..=3 {
        let model = LinearModel {
            features: vec!["met_pt".to_string(), "mjj".to_string()],
            coefficients: vec![0.5 * fold as f64, -0.25],
            intercept: 0.0,
            activation: Activation::Tanh,
        };
        fs::write(
            ws.models.join(name.file_name(fold)),
            serde_json::to_string(&model).unwrap(),
        )
        .unwrap();
    }
    ws
}

#[test]
fn test_split_then_training_inputs_then_score() {
    let ws = workspace();
    cmd_split(&ws.config, &ws.raw, &ws.folds, false).unwrap();
    let folds = JsonStore::new(&ws.folds);
    assert!(folds.container_exists("stop_fold3"));
    assert!(folds.container_exists("ttbar_fold1"));
    assert!(!folds.container_exists("wjets_fold1"));
    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(ws.folds.join(SUMMARY_FILE)).unwrap()).unwrap();
    assert_eq!(summary["skipped"][0]["name"], "wjets");

    cmd_training_inputs(&ws.config, &ws.folds, &ws.out, Some(2), "all").unwrap();
    let inputs = JsonStore::new(&ws.out)
        .read_table("mumu_fold2_all_inputs", "training")
        .unwrap();
    // 2/3 of 20 signal and 45 background rows
    assert_eq!(inputs.n_rows(), 13 + 30);
    assert!(cmd_training_inputs(&ws.config, &ws.folds, &ws.out, Some(4), "all").is_err());

    cmd_score(&ws.config, &ws.folds, &ws.models, "ttbar", RowSelection::Validation, &ws.out)
        .unwrap();
    let hist_path = ws
        .out
        .join("hist_BDT_ttbar_mumu_3fold_Val_300_10_1_001_all.json");
    let hist: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(hist_path).unwrap()).unwrap();
    assert_eq!(hist["entries"], 45);
    assert_eq!(hist["rows_per_fold"], serde_json::json!([15, 15, 15]));
}

#[test]
fn test_score_without_models_fails_with_missing_model() {
    let ws = workspace();
    cmd_split(&ws.config, &ws.raw, &ws.folds, false).unwrap();
    let empty = ws.models.join("none");
    let err = cmd_score(&ws.config, &ws.folds, &empty, "ttbar", RowSelection::Test, &ws.out)
        .unwrap_err();
    assert_eq!(err.kind(), "missing_model");
    assert_eq!(err.exit_code(), 6);
}

#[test]
fn test_score_unsplit_sample_is_missing_source() {
    let ws = workspace();
    cmd_split(&ws.config, &ws.raw, &ws.folds, false).unwrap();
    let err = cmd_score(&ws.config, &ws.folds, &ws.models, "wjets", RowSelection::Test, &ws.out)
        .unwrap_err();
    assert_eq!(err.kind(), "missing_source");

    let err = cmd_score(&ws.config, &ws.folds, &ws.models, "qcd", RowSelection::Test, &ws.out)
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_argument");
}

#[test]
fn test_discriminants_end_to_end() {
    let ws = workspace();
    cmd_discriminants(
        &ws.config,
        &ws.raw,
        &ws.models,
        &ws.out,
        RowSelection::Test,
        42,
        true,
    )
    .unwrap();

    let out = JsonStore::new(&ws.out);
    let stop = out.read_table("discriminant_mumu", "stop_mumu").unwrap();
    assert_eq!(stop.n_rows(), 20);
    let wjets = out.read_table("discriminant_mumu", "wjets_mumu").unwrap();
    assert_eq!(wjets.n_rows(), 0);
    let background = out
        .read_table("discriminant_background_mumu", "background_mumu")
        .unwrap();
    assert_eq!(background.n_rows(), 20);
    assert!(ws.out.join("discriminant_mumu.json.gz").exists());

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(ws.out.join(SUMMARY_FILE)).unwrap()).unwrap();
    assert_eq!(summary["balance"]["background_pool"], 45);
    assert_eq!(summary["balance"]["with_replacement"], false);
    assert_eq!(summary["scale_factor"], 1.0);
    assert_eq!(summary["skipped"][0]["kind"], "missing_source");

    // same seed, same background draw
    let again = ws.out.join("again");
    cmd_discriminants(&ws.config, &ws.raw, &ws.models, &again, RowSelection::Test, 42, false)
        .unwrap();
    let repeat = JsonStore::new(&again)
        .read_table("discriminant_background_mumu", "background_mumu")
        .unwrap();
    assert_eq!(repeat, background);
}

#[test]
fn test_discriminants_without_background_is_fatal() {
    let ws = workspace();
    let mut config = ws.config.clone();
    config.samples.retain(|s| s.kind == SampleKind::Signal);
    let err = cmd_discriminants(&config, &ws.raw, &ws.models, &ws.out, RowSelection::Test, 42, false)
        .unwrap_err();
    assert_eq!(err.kind(), "fatal_empty_input");
}

#[test]
fn test_discriminants_without_signal_writes_nothing() {
    let ws = workspace();
    let mut config = ws.config.clone();
    config.samples.retain(|s| s.kind == SampleKind::Background);
    let err = cmd_discriminants(&config, &ws.raw, &ws.models, &ws.out, RowSelection::Test, 42, false)
        .unwrap_err();
    assert_eq!(err.kind(), "fatal_empty_input");
    assert!(!ws.out.join("discriminant_mumu.json").exists());
    assert!(!ws.out.join("discriminant_background_mumu.json").exists());
}

#[test]
fn test_score_rejects_all_selection_before_loading_models() {
    let ws = workspace();
    let err = cmd_score(
        &ws.config,
        &ws.folds,
        &ws.models.join("none"),
        "ttbar",
        RowSelection::All,
        &ws.out,
    )
    .unwrap_err();
    assert_eq!(err.kind(), "invalid_argument");
}

#[test]
fn test_split_skips_corrupt_container() {
    let ws = workspace();
    fs::write(ws.raw.join("wjets.json"), r#"{"tables": ["#).unwrap();
    cmd_split(&ws.config, &ws.raw, &ws.folds, false).unwrap();
    let folds = JsonStore::new(&ws.folds);
    assert!(folds.container_exists("stop_fold1"));
    assert!(folds.container_exists("ttbar_fold1"));
    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(ws.folds.join(SUMMARY_FILE)).unwrap()).unwrap();
    assert_eq!(summary["skipped"][0]["name"], "wjets");
    assert_eq!(summary["skipped"][0]["kind"], "io");
}

#[test]
fn test_categories_split_matches_discriminant_folds() {
    let ws = workspace();
    let mut config = ws.config.clone();
    config.categories = vec!["b_tagged".to_string()];
    config.validate().unwrap();
    // category tables differ in size from the main tree
    let raw = JsonStore::new(&ws.raw);
    raw.write_container(
        "stop",
        &[
            NamedTable::new("sel_tree", events(20, 0.5)),
            NamedTable::new("b_tagged", events(12, 0.25)),
        ],
    )
    .unwrap();
    raw.write_container(
        "ttbar",
        &[
            NamedTable::new("sel_tree", events(45, -1.0)),
            NamedTable::new("b_tagged", events(18, -0.5)),
        ],
    )
    .unwrap();

    cmd_split(&config, &ws.raw, &ws.folds, false).unwrap();
    let folds = JsonStore::new(&ws.folds);
    assert!(folds.container_exists("stop_b_tagged_fold3"));
    assert!(!folds.container_exists("stop_fold1"));

    cmd_training_inputs(&config, &ws.folds, &ws.out, Some(2), "all").unwrap();
    let inputs = JsonStore::new(&ws.out)
        .read_table("mumu_fold2_all_inputs", "training")
        .unwrap();
    assert_eq!(inputs.n_rows(), 8 + 12);

    cmd_discriminants(&config, &ws.raw, &ws.models, &ws.out, RowSelection::Test, 42, false)
        .unwrap();
    let out = JsonStore::new(&ws.out);
    for source in ["stop_b_tagged", "ttbar_b_tagged"] {
        let stream = out
            .read_table("discriminant_mumu", &format!("{source}_mumu"))
            .unwrap();
        let scores = stream.column("discriminant_mumu").unwrap();
        // each row carries the score of the fold model that held it out in split
        let mut expected = Vec::new();
        for fold in 1..=3 {
            let test = folds
                .read_table(&Fold::container_name(source, fold), "test")
                .unwrap();
            let met = test.column("met_pt").unwrap();
            let mjj = test.column("mjj").unwrap();
            for (m, j) in met.iter().zip(mjj) {
                expected.push((0.5 * fold as f64 * m - 0.25 * j).tanh());
            }
        }
        assert_eq!(scores.len(), expected.len());
        for (got, want) in scores.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-12, "{source}: {got} vs {want}");
        }
    }
}

#[test]
fn test_scale_factor_command() {
    let dir = make_temp_dir();
    let input = dir.join("xsec.json");
    fs::write(
        &input,
        r#"{
            "reference": {"target_yield": 2000.0, "background_xsec_pb": 2.0, "background_efficiency": 0.5},
            "points": [{"name": "stop_500", "xsec_pb": 0.5, "n_generated": 1000, "survived": 250, "produced": 1000}]
        }"#,
    )
    .unwrap();
    let output = dir.join("sf.json");
    cmd_scale_factor(&input, Some(&output)).unwrap();
    let rows: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output).unwrap()).unwrap();
    assert_eq!(rows[0]["name"], "stop_500");
    assert_eq!(rows[0]["scale_factor"], 0.25);
}
