//! Observed data containers and passband throughput models.
//!
//! Observations come in three shapes — spectroscopy only, photometry only,
//! or both — modeled as a tagged variant so the likelihood code dispatches
//! once instead of branching on optional fields.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::common::{flux2mag, interp_linear, trapz};
use crate::errors::{Result, WdFitError};

// ---------------------------------------------------------------------------
// Spectroscopy
// ---------------------------------------------------------------------------

/// Observed spectrum: wavelength (Angstrom, increasing), flux, flux error,
/// optional continuum model sampled on the same axis, optional line-region
/// masks as (lo, hi) wavelength intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spectroscopy {
    pub wave: Vec<f64>,
    pub flux: Vec<f64>,
    pub flux_err: Vec<f64>,
    pub continuum: Option<Vec<f64>>,
    pub line_masks: Vec<(f64, f64)>,
}

impl Spectroscopy {
    pub fn new(wave: Vec<f64>, flux: Vec<f64>, flux_err: Vec<f64>) -> Result<Self> {
        if wave.is_empty() {
            return Err(WdFitError::Config("empty spectrum".into()));
        }
        if wave.len() != flux.len() || wave.len() != flux_err.len() {
            return Err(WdFitError::Config(format!(
                "spectrum array lengths differ: {} wave, {} flux, {} error",
                wave.len(),
                flux.len(),
                flux_err.len()
            )));
        }
        if wave.windows(2).any(|p| p[1] <= p[0]) {
            return Err(WdFitError::Config(
                "spectrum wavelengths must be strictly increasing".into(),
            ));
        }
        if flux_err.iter().any(|&e| !(e > 0.0)) {
            return Err(WdFitError::Config(
                "spectrum flux errors must be positive".into(),
            ));
        }
        Ok(Self {
            wave,
            flux,
            flux_err,
            continuum: None,
            line_masks: Vec::new(),
        })
    }

    pub fn with_continuum(mut self, continuum: Vec<f64>) -> Result<Self> {
        if continuum.len() != self.wave.len() {
            return Err(WdFitError::Config(
                "continuum length does not match spectrum".into(),
            ));
        }
        self.continuum = Some(continuum);
        Ok(self)
    }

    pub fn with_line_masks(mut self, masks: Vec<(f64, f64)>) -> Self {
        self.line_masks = masks;
        self
    }

    /// True if wavelength `w` falls inside any line-region mask.
    pub fn in_line_mask(&self, w: f64) -> bool {
        self.line_masks.iter().any(|&(lo, hi)| w >= lo && w <= hi)
    }
}

// ---------------------------------------------------------------------------
// Photometry
// ---------------------------------------------------------------------------

/// One observed magnitude in a named passband.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotometryPoint {
    pub passband: String,
    pub mag: f64,
    pub mag_err: f64,
}

/// Observed photometry for one object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Photometry {
    pub points: Vec<PhotometryPoint>,
}

impl Photometry {
    pub fn new(points: Vec<PhotometryPoint>) -> Result<Self> {
        if points.is_empty() {
            return Err(WdFitError::Config("empty photometry".into()));
        }
        if points.iter().any(|p| !(p.mag_err > 0.0) || !p.mag.is_finite()) {
            return Err(WdFitError::Config(
                "photometry magnitudes must be finite with positive errors".into(),
            ));
        }
        Ok(Self { points })
    }
}

// ---------------------------------------------------------------------------
// Observation bundle
// ---------------------------------------------------------------------------

/// The data entering one fit. Immutable for the duration of the fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ObservationBundle {
    SpectroscopyOnly(Spectroscopy),
    PhotometryOnly(Photometry),
    Combined {
        spectroscopy: Spectroscopy,
        photometry: Photometry,
    },
}

impl ObservationBundle {
    pub fn spectroscopy(&self) -> Option<&Spectroscopy> {
        match self {
            ObservationBundle::SpectroscopyOnly(s) => Some(s),
            ObservationBundle::Combined { spectroscopy, .. } => Some(spectroscopy),
            ObservationBundle::PhotometryOnly(_) => None,
        }
    }

    pub fn photometry(&self) -> Option<&Photometry> {
        match self {
            ObservationBundle::PhotometryOnly(p) => Some(p),
            ObservationBundle::Combined { photometry, .. } => Some(photometry),
            ObservationBundle::SpectroscopyOnly(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Passbands
// ---------------------------------------------------------------------------

/// A passband throughput curve with its magnitude zeropoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passband {
    pub name: String,
    pub wave: Vec<f64>,
    pub throughput: Vec<f64>,
    pub zeropoint: f64,
}

impl Passband {
    /// Validated constructor. Malformed throughput data is a fatal
    /// configuration error raised at setup, never per-evaluation.
    pub fn new(
        name: impl Into<String>,
        wave: Vec<f64>,
        throughput: Vec<f64>,
        zeropoint: f64,
    ) -> Result<Self> {
        let name = name.into();
        if wave.len() < 2 || wave.len() != throughput.len() {
            return Err(WdFitError::Config(format!(
                "passband {name}: need matching wave/throughput arrays with at least 2 samples"
            )));
        }
        if wave.windows(2).any(|p| p[1] <= p[0]) {
            return Err(WdFitError::Config(format!(
                "passband {name}: wavelengths must be strictly increasing"
            )));
        }
        if throughput.iter().any(|&t| !(t >= 0.0)) {
            return Err(WdFitError::Config(format!(
                "passband {name}: throughput must be non-negative and finite"
            )));
        }
        if !throughput.iter().any(|&t| t > 0.0) {
            return Err(WdFitError::Config(format!(
                "passband {name}: throughput is identically zero"
            )));
        }
        if !zeropoint.is_finite() {
            return Err(WdFitError::Config(format!(
                "passband {name}: zeropoint must be finite"
            )));
        }
        Ok(Self {
            name,
            wave,
            throughput,
            zeropoint,
        })
    }

    /// Synthetic magnitude of a spectrum through this passband:
    /// photon-weighted mean flux over the throughput curve, converted to a
    /// magnitude at the passband zeropoint. Returns NaN if the spectrum does
    /// not cover the passband or the weighted flux is non-positive.
    pub fn synthetic_mag(&self, wave: &[f64], flux: &[f64]) -> f64 {
        if wave.is_empty() || wave[0] > self.wave[0] || wave[wave.len() - 1] < self.wave[self.wave.len() - 1] {
            return f64::NAN;
        }
        let model = interp_linear(wave, flux, &self.wave);
        let num_y: Vec<f64> = model
            .iter()
            .zip(&self.throughput)
            .zip(&self.wave)
            .map(|((f, t), w)| f * t * w)
            .collect();
        let den_y: Vec<f64> = self
            .throughput
            .iter()
            .zip(&self.wave)
            .map(|(t, w)| t * w)
            .collect();
        let num = trapz(&self.wave, &num_y);
        let den = trapz(&self.wave, &den_y);
        if den <= 0.0 {
            return f64::NAN;
        }
        flux2mag(num / den, self.zeropoint)
    }
}

/// Named passband table handed to the posterior at setup.
pub type PassbandSet = IndexMap<String, Passband>;

/// Assemble a passband table, dropping excluded names.
pub fn build_passband_set(passbands: Vec<Passband>, exclude: &[String]) -> PassbandSet {
    passbands
        .into_iter()
        .filter(|pb| !exclude.iter().any(|x| x == &pb.name))
        .map(|pb| (pb.name.clone(), pb))
        .collect()
}
