//! The single entry operation: run a fit given observations, parameters,
//! grid, passbands and sampler configuration.
//!
//! Output artifacts (inputs snapshot, parameter specification, result) are
//! each written exactly once per run. Existing results block a rerun unless
//! redo is explicitly requested.

use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};

use argmin::core::{CostFunction, Error as ArgminError, Executor, State};
use argmin::solver::particleswarm::ParticleSwarm;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::common::{interp_linear, median};
use crate::errors::{Result, WdFitError};
use crate::grid::ModelGrid;
use crate::observation::{build_passband_set, ObservationBundle, Passband};
use crate::params::ParameterVector;
use crate::posterior::{redden, LikelihoodConfig, Posterior};
use crate::results::{reduce_chain, FitResult};
use crate::sampler::{PtSampler, SamplerConfig};

/// Number of PSO particles for the pre-MCMC quick fit.
const QUICK_FIT_PARTICLES: usize = 40;
/// PSO iteration budget for the quick fit.
const QUICK_FIT_ITERS: u64 = 60;

/// Full configuration of one fit invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    pub nwalkers: usize,
    pub ntemps: usize,
    pub nburnin: usize,
    pub nprod: usize,
    /// Record chain history every n-th production iteration.
    pub record_every: usize,
    pub swap_every: usize,
    /// Thinning applied at reduction time.
    pub thin: usize,
    /// Recorded iterations discarded at reduction time.
    pub discard: usize,
    /// Extra photometric dispersion added in quadrature.
    pub ascale: f64,
    /// Spectroscopic likelihood uses every n-th data pixel.
    pub everyn: usize,
    /// Exclude line-masked pixels from the spectroscopic likelihood.
    pub mask_lines: bool,
    /// Passbands dropped before setup.
    pub excludepb: Vec<String>,
    /// Run a bounded particle-swarm optimization to seed the walkers.
    pub quick_fit: bool,
    /// Overwrite existing results for the same inputs.
    pub redo: bool,
    pub seed: u64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            nwalkers: 100,
            ntemps: 5,
            nburnin: 200,
            nprod: 1000,
            record_every: 1,
            swap_every: 10,
            thin: 1,
            discard: 0,
            ascale: 0.0,
            everyn: 1,
            mask_lines: false,
            excludepb: Vec::new(),
            quick_fit: true,
            redo: false,
            seed: 42,
        }
    }
}

/// Output path for one artifact of a named fit.
pub fn outfile(outdir: &Path, name: &str, suffix: &str) -> PathBuf {
    outdir.join(format!("{name}{suffix}"))
}

/// Run a full fit: validate setup, snapshot inputs, quick-fit a starting
/// point, sample, reduce and persist the result.
///
/// Fails with [`WdFitError::OutputExists`] if a result artifact is already
/// present for this `outdir`/`name` and `redo` was not requested.
pub fn run_fit(
    obs: &ObservationBundle,
    params: &ParameterVector,
    grid: &ModelGrid,
    passbands: Vec<Passband>,
    config: &FitConfig,
    outdir: &Path,
    name: &str,
) -> Result<FitResult> {
    let result_path = outfile(outdir, name, "_result.json");
    if result_path.exists() && !config.redo {
        return Err(WdFitError::OutputExists(result_path));
    }
    std::fs::create_dir_all(outdir)?;

    let pbset = build_passband_set(passbands, &config.excludepb);
    let likelihood = LikelihoodConfig {
        ascale: config.ascale,
        everyn: config.everyn,
        mask_lines: config.mask_lines,
    };
    let posterior = Posterior::new(grid, obs, &pbset, params.clone(), likelihood)?;

    write_inputs_snapshot(obs, &outfile(outdir, name, "_inputs.bin"))?;
    params.write_json(&outfile(outdir, name, "_params.json"))?;

    // Seed point for the walker ball.
    let mut start = params.clone();
    if let Some(scale) = initial_scale_guess(grid, obs, &start) {
        if let Some(p) = start.get_mut("scale") {
            if !p.fixed {
                p.value = scale.clamp(p.bounds.0, p.bounds.1);
            }
        }
    }
    let center = if config.quick_fit {
        quick_fit(&posterior, &start)
    } else {
        start.free_values()
    };

    let free_names = params.free_names();
    let (lower, upper) = params.free_bounds();
    let scales: Vec<f64> = lower
        .iter()
        .zip(&upper)
        .map(|(&lo, &hi)| 1e-4 * (hi - lo).max(1e-8))
        .collect();
    // keep the whole ball inside the prior support
    let center: Vec<f64> = center
        .iter()
        .zip(lower.iter().zip(&upper))
        .zip(&scales)
        .map(|((&c, (&lo, &hi)), &s)| {
            if hi - lo > 6.0 * s {
                c.clamp(lo + 3.0 * s, hi - 3.0 * s)
            } else {
                c.clamp(lo, hi)
            }
        })
        .collect();

    let sampler_config = SamplerConfig {
        nwalkers: config.nwalkers,
        ntemps: config.ntemps,
        record_every: config.record_every,
        swap_every: config.swap_every,
        proposal_scale: 2.0,
        seed: config.seed,
    };
    let mut sampler = PtSampler::new(&posterior, sampler_config)?;
    sampler.initialize(&center, &scales)?;

    info!(
        "{name}: burn-in ({} iterations, {} walkers, {} rungs)",
        config.nburnin, config.nwalkers, config.ntemps
    );
    sampler.run(config.nburnin, false)?;
    info!("{name}: production ({} iterations)", config.nprod);
    sampler.run(config.nprod, true)?;

    let result = reduce_chain(
        sampler.cold_chain(),
        &free_names,
        config.discard,
        config.thin,
        &sampler.acceptance_fraction(0),
    )?;

    // amend the parameter specification with the fitted values
    let mut fitted = params.clone();
    for (pname, est) in &result.params {
        if let Some(p) = fitted.get_mut(pname) {
            p.value = est.value;
        }
    }
    fitted.write_json(&outfile(outdir, name, "_params.json"))?;

    let file = File::create(&result_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &result)?;
    writer.flush()?;

    info!(
        "{name}: done ({} samples, mean acceptance {:.2})",
        result.nsamples, result.mean_acceptance
    );
    Ok(result)
}

fn write_inputs_snapshot(obs: &ObservationBundle, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, obs)?;
    writer.flush()?;
    Ok(())
}

/// Read back an inputs snapshot written by a previous run.
pub fn read_inputs_snapshot(path: &Path) -> Result<ObservationBundle> {
    let file = File::open(path)?;
    let obs = bincode::deserialize_from(std::io::BufReader::new(file))?;
    Ok(obs)
}

// ---------------------------------------------------------------------------
// Quick fit
// ---------------------------------------------------------------------------

struct QuickFitCost<'a> {
    posterior: &'a Posterior<'a>,
}

impl CostFunction for QuickFitCost<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> std::result::Result<Self::Output, ArgminError> {
        match self.posterior.evaluate(p) {
            Ok(lp) => {
                let lnpost = lp.tempered(1.0);
                if lnpost.is_finite() {
                    Ok(-lnpost)
                } else {
                    Ok(1e99)
                }
            }
            Err(_) => Ok(1e99),
        }
    }
}

/// Bounded particle-swarm optimization of the free parameters, used to seed
/// the walker ball near the posterior mode. Falls back to the caller's
/// initial values when the optimizer fails or never finds a finite point.
fn quick_fit(posterior: &Posterior, params: &ParameterVector) -> Vec<f64> {
    let (lower, upper) = params.free_bounds();
    let fallback = params.free_values();
    let problem = QuickFitCost { posterior };
    let solver = ParticleSwarm::new((lower, upper), QUICK_FIT_PARTICLES);
    match Executor::new(problem, solver)
        .configure(|state| state.max_iters(QUICK_FIT_ITERS))
        .run()
    {
        Ok(res) => match res.state().get_best_param() {
            Some(best) if res.state().get_cost() < 1e98 => best.position.clone(),
            _ => fallback,
        },
        Err(err) => {
            warn!("quick fit failed ({err}); using the initial guess");
            fallback
        }
    }
}

/// Estimate the flux scale by comparing the observed spectrum (or its
/// continuum model when present) to the unscaled model at the initial
/// (Teff, log g).
fn initial_scale_guess(
    grid: &ModelGrid,
    obs: &ObservationBundle,
    params: &ParameterVector,
) -> Option<f64> {
    let spec = obs.spectroscopy()?;
    let teff = params.value("teff")?;
    let logg = params.value("logg")?;
    let ebv = params.value("ebv").unwrap_or(0.0);

    let mut flux = grid.interpolate(teff, logg).ok()?.to_vec();
    let wave = grid.wave.as_slice()?;
    redden(wave, &mut flux, ebv);
    let model = interp_linear(wave, &flux, &spec.wave);

    let target: &[f64] = spec.continuum.as_deref().unwrap_or(&spec.flux);
    let mut ratios: Vec<f64> = target
        .iter()
        .zip(&model)
        .filter(|&(_, &m)| m > 0.0)
        .map(|(&o, &m)| o / m)
        .collect();
    let s = median(&mut ratios)?;
    if s.is_finite() && s > 0.0 {
        Some(s)
    } else {
        None
    }
}
