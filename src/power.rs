//! Power quantities derived from real power and power factor.

use crate::error::{AppError, Result};
use crate::phase::{PhaseSet, PHASE_LABELS};

/// Per-phase quantities derived from one measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedPower {
    /// Apparent power in VA.
    pub apparent: PhaseSet,
    /// Reactive power in VAr.
    pub reactive: PhaseSet,
}

/// Derive apparent (`w / pf`) and reactive (`-w * tan(acos pf)`) power for
/// all three phases.
///
/// Every power factor must be finite, non-zero and within [-1, 1]; anything
/// else fails the whole call with [`AppError::InvalidMeasurement`] naming the
/// first offending phase.
pub fn derive(watts: PhaseSet, power_factor: PhaseSet) -> Result<DerivedPower> {
    let w = watts.values();
    let pf = power_factor.values();

    let mut apparent = [0.0; 3];
    let mut reactive = [0.0; 3];
    for i in 0..3 {
        validate_power_factor(i, pf[i])?;
        apparent[i] = w[i] / pf[i];
        reactive[i] = -w[i] * pf[i].acos().tan();
    }

    Ok(DerivedPower {
        apparent: apparent.into(),
        reactive: reactive.into(),
    })
}

fn validate_power_factor(phase: usize, pf: f64) -> Result<()> {
    if !pf.is_finite() || pf == 0.0 || pf.abs() > 1.0 {
        return Err(AppError::InvalidMeasurement(format!(
            "power factor {} on phase {} out of range",
            pf, PHASE_LABELS[phase]
        )));
    }
    Ok(())
}
