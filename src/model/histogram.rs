use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Equal-width binning over `[low, high)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Binning {
    pub bins: usize,
    pub low: f64,
    pub high: f64,
}

impl Default for Binning {
    fn default() -> Self {
        Self {
            bins: 20,
            low: -1.0,
            high: 1.0,
        }
    }
}

impl Binning {
    pub fn validate(&self) -> Result<()> {
        if self.bins == 0 {
            return Err(PipelineError::invalid("histogram needs at least one bin"));
        }
        if !(self.low.is_finite() && self.high.is_finite() && self.low < self.high) {
            return Err(PipelineError::invalid(format!(
                "bad histogram range [{}, {})",
                self.low, self.high
            )));
        }
        Ok(())
    }

    pub fn width(&self) -> f64 {
        (self.high - self.low) / self.bins as f64
    }

    pub fn edges(&self) -> Vec<f64> {
        let w = self.width();
        (0..=self.bins)
            .map(|i| {
                if i == self.bins {
                    self.high
                } else {
                    self.low + w * i as f64
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Underflow,
    Bin(usize),
    Overflow,
}

/// Weighted 1D histogram with per-bin sum of weights and sum of squared
/// weights. Scores below `low` go to underflow, scores at or above `high`
/// (and NaN) to overflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightedHistogram {
    binning: Binning,
    sumw: Vec<f64>,
    sumw2: Vec<f64>,
    underflow: f64,
    overflow: f64,
    underflow_sumw2: f64,
    overflow_sumw2: f64,
    entries: u64,
    negative_weight_entries: u64,
}

impl WeightedHistogram {
    pub fn new(binning: Binning) -> Result<Self> {
        binning.validate()?;
        Ok(Self {
            binning,
            sumw: vec![0.0; binning.bins],
            sumw2: vec![0.0; binning.bins],
            underflow: 0.0,
            overflow: 0.0,
            underflow_sumw2: 0.0,
            overflow_sumw2: 0.0,
            entries: 0,
            negative_weight_entries: 0,
        })
    }

    fn slot(&self, x: f64) -> Slot {
        let b = &self.binning;
        if x < b.low {
            return Slot::Underflow;
        }
        if !(x < b.high) {
            return Slot::Overflow;
        }
        let idx = ((x - b.low) / b.width()) as usize;
        // x just below `high` can round up to `bins`.
        Slot::Bin(idx.min(b.bins - 1))
    }

    /// Adds `weight` as-is; a negative weight subtracts from its bin.
    pub fn fill(&mut self, x: f64, weight: f64) {
        let w2 = weight * weight;
        match self.slot(x) {
            Slot::Underflow => {
                self.underflow += weight;
                self.underflow_sumw2 += w2;
            }
            Slot::Overflow => {
                self.overflow += weight;
                self.overflow_sumw2 += w2;
            }
            Slot::Bin(i) => {
                self.sumw[i] += weight;
                self.sumw2[i] += w2;
            }
        }
        self.entries += 1;
        if weight < 0.0 {
            self.negative_weight_entries += 1;
        }
    }

    /// Per-bin addition of `other` into `self`.
    pub fn merge(&mut self, other: &WeightedHistogram) -> Result<()> {
        if self.binning != other.binning {
            return Err(PipelineError::invalid(format!(
                "cannot merge histograms with binning {:?} and {:?}",
                self.binning, other.binning
            )));
        }
        for (a, b) in self.sumw.iter_mut().zip(&other.sumw) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
        self.underflow += other.underflow;
        self.overflow += other.overflow;
        self.underflow_sumw2 += other.underflow_sumw2;
        self.overflow_sumw2 += other.overflow_sumw2;
        self.entries += other.entries;
        self.negative_weight_entries += other.negative_weight_entries;
        Ok(())
    }

    pub fn binning(&self) -> Binning {
        self.binning
    }

    pub fn contents(&self) -> &[f64] {
        &self.sumw
    }

    pub fn sumw2(&self) -> &[f64] {
        &self.sumw2
    }

    /// Statistical error per bin, `sqrt(sumw2)`.
    pub fn errors(&self) -> Vec<f64> {
        self.sumw2.iter().map(|v| v.sqrt()).collect()
    }

    pub fn underflow(&self) -> f64 {
        self.underflow
    }

    pub fn overflow(&self) -> f64 {
        self.overflow
    }

    pub fn flow_sumw2(&self) -> (f64, f64) {
        (self.underflow_sumw2, self.overflow_sumw2)
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn negative_weight_entries(&self) -> u64 {
        self.negative_weight_entries
    }

    /// Sum of weights inside `[low, high)`.
    pub fn integral(&self) -> f64 {
        self.sumw.iter().sum()
    }

    /// Sum of every filled weight, flows included.
    pub fn total_weight(&self) -> f64 {
        self.integral() + self.underflow + self.overflow
    }
}

#[cfg(test)]
#[path = "../../tests/src_inline/model/histogram.rs"]
mod tests;
