use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::input::store::write_atomic;
use crate::pipeline::stage1_index::SkippedSource;

pub const SUMMARY_FILE: &str = "run_summary.json";

#[derive(Debug, Clone, Serialize)]
pub struct StageCount {
    pub stage: String,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    pub name: String,
    pub n: usize,
    pub mean: f64,
    pub median: f64,
    pub p90: f64,
}

impl StreamStats {
    pub fn from_scores(name: impl Into<String>, values: &[f64]) -> Self {
        let mean = if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        };
        Self {
            name: name.into(),
            n: values.len(),
            mean,
            median: median(values),
            p90: p90(values),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceReport {
    pub signal: usize,
    pub background_pool: usize,
    pub sampled: usize,
    pub seed: u64,
    pub with_replacement: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub tool: String,
    pub version: String,
    pub git_hash: Option<String>,
    pub command: String,
    pub stages: Vec<StageCount>,
    pub skipped: Vec<SkippedSource>,
    pub outputs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub streams: Vec<StreamStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<BalanceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<f64>,
}

impl RunSummary {
    pub fn new(command: &str) -> Self {
        Self {
            tool: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            git_hash: read_git_hash(Path::new(".")),
            command: command.to_string(),
            stages: Vec::new(),
            skipped: Vec::new(),
            outputs: Vec::new(),
            streams: Vec::new(),
            balance: None,
            scale_factor: None,
        }
    }

    pub fn stage(&mut self, stage: impl Into<String>, rows: usize) {
        self.stages.push(StageCount {
            stage: stage.into(),
            rows,
        });
    }

    pub fn write(&self, out_dir: &Path) -> Result<()> {
        write_json(&out_dir.join(SUMMARY_FILE), self)
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_atomic(path, false, |w| {
        serde_json::to_writer_pretty(w, value)?;
        Ok(())
    })?;
    Ok(())
}

pub fn quantile_indexed(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let idx = ((n - 1) as f64 * p).ceil() as usize;
    sorted[idx]
}

pub fn median(values: &[f64]) -> f64 {
    quantile_indexed(values, 0.5)
}

pub fn p90(values: &[f64]) -> f64 {
    quantile_indexed(values, 0.90)
}

fn read_git_hash(repo_root: &Path) -> Option<String> {
    let head = repo_root.join(".git/HEAD");
    let content = std::fs::read_to_string(head).ok()?;
    if let Some(ref_line) = content.strip_prefix("ref: ") {
        let ref_path = repo_root.join(".git").join(ref_line.trim());
        return std::fs::read_to_string(ref_path)
            .ok()
            .map(|s| s.trim().to_string());
    }
    Some(content.trim().to_string())
}

#[cfg(test)]
#[path = "../../tests/src_inline/report/mod.rs"]
mod tests;
