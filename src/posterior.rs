//! Posterior evaluation: log-prior + spectroscopic and photometric
//! log-likelihoods for one proposed parameter vector.
//!
//! Evaluation is a pure function of its inputs. The grid and observation
//! bundle are shared read-only, so evaluations are safe to dispatch
//! concurrently to the worker pool. Every proposal-level invalidity (out of
//! prior bounds, off-grid query, non-finite model) maps to a negative
//! infinite log-posterior so the sampler rejects the move; only genuine
//! internal failures surface as errors.

use serde::{Deserialize, Serialize};

use crate::common::{gaussian_smooth, interp_linear};
use crate::errors::{Result, WdFitError};
use crate::grid::ModelGrid;
use crate::observation::{ObservationBundle, PassbandSet};
use crate::params::ParameterVector;

/// Ratio of a Gaussian's FWHM to its standard deviation.
const FWHM_TO_SIGMA: f64 = 2.354820045030949;

/// Fixed ratio of total-to-selective extinction for the reddening law.
const RV: f64 = 3.1;

// ---------------------------------------------------------------------------
// Extinction
// ---------------------------------------------------------------------------

/// O'Donnell (1994) optical extinction curve with CCM89 infrared and
/// ultraviolet segments: A(lambda)/A(V) at `wave` Angstrom for R_V = 3.1.
/// Inverse wavelengths outside [0.3, 8.0] per micron are clamped.
pub fn od94_alav(wave: f64) -> f64 {
    let x = (1e4 / wave).clamp(0.3, 8.0);
    let (a, b) = if x < 1.1 {
        // CCM89 infrared power law
        let t = x.powf(1.61);
        (0.574 * t, -0.527 * t)
    } else if x <= 3.3 {
        // O'Donnell optical/NIR polynomials
        let y = x - 1.82;
        let a = 1.0
            + y * (0.104
                + y * (-0.609
                    + y * (0.701
                        + y * (1.137
                            + y * (-1.718 + y * (-0.827 + y * (1.647 + y * (-0.505))))))));
        let b = y
            * (1.952
                + y * (2.908
                    + y * (-3.989
                        + y * (-7.985
                            + y * (11.102 + y * (5.491 + y * (-10.805 + y * 3.347)))))));
        (a, b)
    } else {
        // CCM89 ultraviolet
        let (fa, fb) = if x >= 5.9 {
            let d = x - 5.9;
            (
                -0.04473 * d * d - 0.009779 * d * d * d,
                0.2130 * d * d + 0.1207 * d * d * d,
            )
        } else {
            (0.0, 0.0)
        };
        (
            1.752 - 0.316 * x - 0.104 / ((x - 4.67).powi(2) + 0.341) + fa,
            -3.090 + 1.825 * x + 1.206 / ((x - 4.62).powi(2) + 0.263) + fb,
        )
    };
    a + b / RV
}

/// Apply reddening E(B-V) in place.
pub fn redden(wave: &[f64], flux: &mut [f64], ebv: f64) {
    if ebv == 0.0 {
        return;
    }
    let av = RV * ebv;
    for (f, &w) in flux.iter_mut().zip(wave) {
        *f *= 10f64.powf(-0.4 * av * od94_alav(w));
    }
}

// ---------------------------------------------------------------------------
// Posterior
// ---------------------------------------------------------------------------

/// Likelihood configuration fixed for the duration of a fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikelihoodConfig {
    /// Extra photometric dispersion added in quadrature to magnitude errors.
    pub ascale: f64,
    /// Evaluate the spectroscopic likelihood on every n-th data pixel.
    pub everyn: usize,
    /// Exclude pixels inside line-region masks from the likelihood.
    pub mask_lines: bool,
}

impl Default for LikelihoodConfig {
    fn default() -> Self {
        Self {
            ascale: 0.0,
            everyn: 1,
            mask_lines: false,
        }
    }
}

/// Log-prior and log-likelihood of one evaluation, kept separate so the
/// sampler can temper the likelihood alone.
#[derive(Debug, Clone, Copy)]
pub struct LnProb {
    pub lnprior: f64,
    pub lnlike: f64,
}

impl LnProb {
    /// Tempered log-posterior at inverse temperature `beta`: the prior is
    /// not tempered.
    pub fn tempered(&self, beta: f64) -> f64 {
        if !self.lnprior.is_finite() {
            return f64::NEG_INFINITY;
        }
        if !self.lnlike.is_finite() {
            return f64::NEG_INFINITY;
        }
        self.lnprior + beta * self.lnlike
    }

    pub fn rejected() -> Self {
        Self {
            lnprior: f64::NEG_INFINITY,
            lnlike: f64::NEG_INFINITY,
        }
    }
}

/// Posterior evaluator over a read-only grid, observation bundle and
/// passband table.
pub struct Posterior<'a> {
    grid: &'a ModelGrid,
    obs: &'a ObservationBundle,
    passbands: &'a PassbandSet,
    template: ParameterVector,
    config: LikelihoodConfig,
    /// Data pixels entering the spectroscopic chi^2, fixed at setup.
    spec_pixels: Vec<usize>,
}

impl<'a> Posterior<'a> {
    /// Validates the configuration: every photometric point must reference a
    /// loaded passband, and the pixel selection must be non-empty. These are
    /// fatal setup errors, never per-evaluation failures.
    pub fn new(
        grid: &'a ModelGrid,
        obs: &'a ObservationBundle,
        passbands: &'a PassbandSet,
        template: ParameterVector,
        config: LikelihoodConfig,
    ) -> Result<Self> {
        if config.everyn == 0 {
            return Err(WdFitError::Config("everyn must be at least 1".into()));
        }
        if let Some(phot) = obs.photometry() {
            for point in &phot.points {
                if !passbands.contains_key(&point.passband) {
                    return Err(WdFitError::Config(format!(
                        "photometry references passband {:?} which is not loaded",
                        point.passband
                    )));
                }
            }
        }
        for name in ["teff", "logg", "ebv", "scale", "fwhm"] {
            if template.get(name).is_none() {
                return Err(WdFitError::Config(format!(
                    "parameter vector is missing {name:?}"
                )));
            }
        }
        for (name, p) in template.iter() {
            if !p.fixed && !(p.bounds.0 < p.bounds.1) {
                return Err(WdFitError::Config(format!(
                    "free parameter {name:?} has an empty prior interval [{}, {}]",
                    p.bounds.0, p.bounds.1
                )));
            }
        }

        let spec_pixels = match obs.spectroscopy() {
            Some(spec) => {
                let pixels: Vec<usize> = (0..spec.wave.len())
                    .step_by(config.everyn)
                    .filter(|&i| !(config.mask_lines && spec.in_line_mask(spec.wave[i])))
                    .collect();
                if pixels.is_empty() {
                    return Err(WdFitError::Config(
                        "no spectrum pixels left after masking and subsampling".into(),
                    ));
                }
                pixels
            }
            None => Vec::new(),
        };

        Ok(Self {
            grid,
            obs,
            passbands,
            template,
            config,
            spec_pixels,
        })
    }

    /// The parameter vector template (fixed values, bounds, ordering).
    pub fn template(&self) -> &ParameterVector {
        &self.template
    }

    /// Number of free parameters.
    pub fn ndim(&self) -> usize {
        self.template.ndim()
    }

    /// Flat log-prior: 0 inside every free parameter's bounds, negative
    /// infinity outside. Non-finite values, non-positive scale and
    /// non-positive smoothing always reject.
    pub fn log_prior(&self, pv: &ParameterVector) -> f64 {
        for (_, p) in pv.iter() {
            if !p.value.is_finite() {
                return f64::NEG_INFINITY;
            }
            if !p.fixed && !p.in_bounds() {
                return f64::NEG_INFINITY;
            }
        }
        let scale = pv.value("scale").unwrap_or(f64::NAN);
        let fwhm = pv.value("fwhm").unwrap_or(f64::NAN);
        if !(scale > 0.0) || !(fwhm > 0.0) {
            return f64::NEG_INFINITY;
        }
        0.0
    }

    /// The reddened, scaled model flux on the grid wavelength axis, or
    /// `None` when (teff, logg) falls off the grid (a rejection, not an
    /// error).
    fn model_on_grid(&self, pv: &ParameterVector) -> Result<Option<Vec<f64>>> {
        let teff = pv.value("teff").unwrap_or(f64::NAN);
        let logg = pv.value("logg").unwrap_or(f64::NAN);
        let ebv = pv.value("ebv").unwrap_or(0.0);
        let scale = pv.value("scale").unwrap_or(1.0);

        let flux = match self.grid.interpolate(teff, logg) {
            Ok(flux) => flux,
            Err(WdFitError::OutOfRange(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        let mut flux = flux.to_vec();
        let wave = self.grid.wave.as_slice().unwrap_or(&[]);
        redden(wave, &mut flux, ebv);
        for f in flux.iter_mut() {
            *f *= scale;
        }
        Ok(Some(flux))
    }

    /// Gaussian log-likelihood of the data given the parameters.
    pub fn log_likelihood(&self, pv: &ParameterVector) -> Result<f64> {
        let model = match self.model_on_grid(pv)? {
            Some(model) => model,
            None => return Ok(f64::NEG_INFINITY),
        };

        let mut lnlike = 0.0;

        if let Some(spec) = self.obs.spectroscopy() {
            let fwhm = pv.value("fwhm").unwrap_or(0.0);
            let smoothed = gaussian_smooth(&model, fwhm / FWHM_TO_SIGMA);
            let wave = self.grid.wave.as_slice().unwrap_or(&[]);
            let resampled = interp_linear(wave, &smoothed, &spec.wave);

            for &i in &self.spec_pixels {
                let sigma = spec.flux_err[i];
                let resid = (spec.flux[i] - resampled[i]) / sigma;
                lnlike += -0.5
                    * (resid * resid
                        + (2.0 * std::f64::consts::PI * sigma * sigma).ln());
            }
        }

        if let Some(phot) = self.obs.photometry() {
            let wave = self.grid.wave.as_slice().unwrap_or(&[]);
            for point in &phot.points {
                // validated at setup
                let pb = &self.passbands[&point.passband];
                let synth = pb.synthetic_mag(wave, &model);
                if !synth.is_finite() {
                    return Ok(f64::NEG_INFINITY);
                }
                let var = point.mag_err * point.mag_err + self.config.ascale * self.config.ascale;
                let resid = point.mag - synth;
                lnlike +=
                    -0.5 * (resid * resid / var + (2.0 * std::f64::consts::PI * var).ln());
            }
        }

        if lnlike.is_nan() {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(lnlike)
    }

    /// Evaluate prior and likelihood for a flat vector of free parameter
    /// values. The likelihood is skipped when the prior already rejects.
    pub fn evaluate(&self, free_values: &[f64]) -> Result<LnProb> {
        let pv = match self.template.with_free_values(free_values) {
            Ok(pv) => pv,
            Err(_) => return Ok(LnProb::rejected()),
        };
        let lnprior = self.log_prior(&pv);
        if !lnprior.is_finite() {
            return Ok(LnProb::rejected());
        }
        let lnlike = self.log_likelihood(&pv)?;
        Ok(LnProb { lnprior, lnlike })
    }

    /// Scalar log-posterior (log-prior + log-likelihood) for a full
    /// parameter vector.
    pub fn log_posterior(&self, pv: &ParameterVector) -> Result<f64> {
        let lnprior = self.log_prior(pv);
        if !lnprior.is_finite() {
            return Ok(f64::NEG_INFINITY);
        }
        let lnlike = self.log_likelihood(pv)?;
        if !lnlike.is_finite() {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(lnprior + lnlike)
    }
}
