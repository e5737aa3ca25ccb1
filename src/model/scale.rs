use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Signal scale factor that makes the signal collection carry the same
/// event count as the background collection handed to the fit.
pub fn count_ratio(n_signal: usize, n_background: usize) -> Result<f64> {
    if n_signal == 0 {
        return Err(PipelineError::FatalEmptyInput(
            "no signal entries to normalise against".to_string(),
        ));
    }
    Ok(n_background as f64 / n_signal as f64)
}

/// Background normalisation the signal points are scaled against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossSectionReference {
    pub target_yield: f64,
    pub background_xsec_pb: f64,
    #[serde(default = "one")]
    pub background_efficiency: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalPoint {
    pub name: String,
    pub xsec_pb: f64,
    /// Events present in the signal score collection.
    pub n_generated: u64,
    pub survived: u64,
    pub produced: u64,
    #[serde(default = "one")]
    pub magnification: f64,
}

fn one() -> f64 {
    1.0
}

impl CrossSectionReference {
    /// `target * (xsec / bkg_xsec) * (eff / bkg_eff) / n_generated * magnification`
    /// with `eff = survived / produced`.
    pub fn scale_factor(&self, point: &SignalPoint) -> Result<f64> {
        if point.produced == 0 || point.n_generated == 0 {
            return Err(PipelineError::invalid(format!(
                "signal point '{}' has zero produced or generated events",
                point.name
            )));
        }
        if self.background_xsec_pb <= 0.0 || self.background_efficiency <= 0.0 {
            return Err(PipelineError::invalid(
                "background cross-section and efficiency must be positive",
            ));
        }
        let efficiency = point.survived as f64 / point.produced as f64;
        let xsec_ratio = point.xsec_pb / self.background_xsec_pb;
        let eff_ratio = efficiency / self.background_efficiency;
        let target = self.target_yield * xsec_ratio * eff_ratio;
        Ok(target / point.n_generated as f64 * point.magnification)
    }
}

#[cfg(test)]
#[path = "../../tests/src_inline/model/scale.rs"]
mod tests;
