//! Parallel-tempered affine-invariant ensemble sampler.
//!
//! One walker ensemble per temperature rung. Within a rung, walkers advance
//! by Goodman & Weare (2010) stretch moves, each half of the ensemble
//! proposing against the other half; across rungs, periodic swap moves
//! exchange walkers between adjacent temperatures so the cold chain can
//! escape local posterior modes found by the hot chains.
//!
//! The controller owns all chain state and performs every accept/reject
//! decision. Likelihood evaluations are dispatched as one batch per
//! proposal round to a worker pool and gathered before any decision is
//! made; a failed evaluation aborts the run without committing the round.

use ndarray::Array2;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, WdFitError};
use crate::posterior::{LnProb, Posterior};

/// Sampler geometry and cadence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Walkers per rung; even and more than twice the free dimension.
    pub nwalkers: usize,
    /// Number of temperature rungs; the coldest is T = 1.
    pub ntemps: usize,
    /// Record chain history every n-th iteration.
    pub record_every: usize,
    /// Attempt swap moves between adjacent rungs every n-th iteration.
    pub swap_every: usize,
    /// Stretch-move scale parameter a (> 1).
    pub proposal_scale: f64,
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            nwalkers: 100,
            ntemps: 5,
            record_every: 1,
            swap_every: 10,
            proposal_scale: 2.0,
            seed: 42,
        }
    }
}

/// Geometric inverse-temperature ladder: beta_i = 2^(-i/2), coldest first.
pub fn temperature_ladder(ntemps: usize) -> Vec<f64> {
    (0..ntemps)
        .map(|i| 2f64.powf(-0.5 * i as f64))
        .collect()
}

/// Log acceptance ratio for swapping a walker with log-likelihood `lnl_a`
/// in the rung at inverse temperature `beta_a` against one with `lnl_b` at
/// `beta_b`. Symmetric under exchanging (a, b).
pub fn swap_log_accept(beta_a: f64, beta_b: f64, lnl_a: f64, lnl_b: f64) -> f64 {
    (beta_a - beta_b) * (lnl_b - lnl_a)
}

// ---------------------------------------------------------------------------
// Chain storage
// ---------------------------------------------------------------------------

/// Recorded history of one rung: walker positions and log-posteriors, laid
/// out flat as (iteration, walker, parameter).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    ndim: usize,
    nwalkers: usize,
    positions: Vec<f64>,
    lnpost: Vec<f64>,
    recorded: usize,
}

impl Chain {
    pub fn new(ndim: usize, nwalkers: usize) -> Self {
        Self {
            ndim,
            nwalkers,
            positions: Vec::new(),
            lnpost: Vec::new(),
            recorded: 0,
        }
    }

    /// Append one iteration's walker positions and log-posteriors.
    pub fn record(&mut self, pos: &Array2<f64>, lnpost: &[f64]) {
        debug_assert_eq!(pos.nrows(), self.nwalkers);
        debug_assert_eq!(lnpost.len(), self.nwalkers);
        for w in 0..self.nwalkers {
            for d in 0..self.ndim {
                self.positions.push(pos[[w, d]]);
            }
        }
        self.lnpost.extend_from_slice(lnpost);
        self.recorded += 1;
    }

    pub fn recorded(&self) -> usize {
        self.recorded
    }

    pub fn nwalkers(&self) -> usize {
        self.nwalkers
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    /// Position of one walker at one recorded iteration.
    pub fn position(&self, iteration: usize, walker: usize) -> &[f64] {
        let start = (iteration * self.nwalkers + walker) * self.ndim;
        &self.positions[start..start + self.ndim]
    }

    pub fn lnpost_at(&self, iteration: usize, walker: usize) -> f64 {
        self.lnpost[iteration * self.nwalkers + walker]
    }

    /// Samples flattened across walkers after dropping `discard` leading
    /// iterations and keeping every `thin`-th of the rest, with their
    /// log-posteriors. Empty when `discard >= recorded`.
    pub fn flat_samples(&self, discard: usize, thin: usize) -> (Array2<f64>, Vec<f64>) {
        let thin = thin.max(1);
        if discard >= self.recorded {
            return (Array2::zeros((0, self.ndim)), Vec::new());
        }
        let iters: Vec<usize> = (discard..self.recorded).step_by(thin).collect();
        let mut flat = Array2::zeros((iters.len() * self.nwalkers, self.ndim));
        let mut lnpost = Vec::with_capacity(iters.len() * self.nwalkers);
        for (row_base, &it) in iters.iter().enumerate() {
            for w in 0..self.nwalkers {
                let src = self.position(it, w);
                for d in 0..self.ndim {
                    flat[[row_base * self.nwalkers + w, d]] = src[d];
                }
                lnpost.push(self.lnpost_at(it, w));
            }
        }
        (flat, lnpost)
    }

    /// One parameter's history for one walker after discarding burn-in.
    pub fn param_series(&self, walker: usize, param: usize, discard: usize) -> Vec<f64> {
        (discard..self.recorded)
            .map(|it| self.position(it, walker)[param])
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

struct Rung {
    beta: f64,
    pos: Array2<f64>,
    lnprob: Vec<LnProb>,
    naccepted: Vec<usize>,
}

/// The parallel-tempered ensemble sampler. Owns every rung's walker state
/// and chain history; workers only ever see parameter vectors.
pub struct PtSampler<'a> {
    posterior: &'a Posterior<'a>,
    config: SamplerConfig,
    ndim: usize,
    rungs: Vec<Rung>,
    chains: Vec<Chain>,
    rng: SmallRng,
    iterations: usize,
    swaps_proposed: Vec<usize>,
    swaps_accepted: Vec<usize>,
}

impl<'a> PtSampler<'a> {
    pub fn new(posterior: &'a Posterior<'a>, config: SamplerConfig) -> Result<Self> {
        let ndim = posterior.ndim();
        if ndim == 0 {
            return Err(WdFitError::Config(
                "no free parameters to sample".into(),
            ));
        }
        if config.nwalkers % 2 != 0 {
            return Err(WdFitError::Config(
                "the number of walkers must be even".into(),
            ));
        }
        if config.nwalkers <= 2 * ndim {
            return Err(WdFitError::Config(
                "the number of walkers should be more than twice the number of free parameters"
                    .into(),
            ));
        }
        if config.ntemps == 0 {
            return Err(WdFitError::Config("need at least one temperature".into()));
        }
        if config.proposal_scale <= 1.0 {
            return Err(WdFitError::Config(
                "stretch-move scale parameter must be greater than 1".into(),
            ));
        }
        if config.record_every == 0 || config.swap_every == 0 {
            return Err(WdFitError::Config(
                "record_every and swap_every must be at least 1".into(),
            ));
        }

        let betas = temperature_ladder(config.ntemps);
        let rungs = betas
            .iter()
            .map(|&beta| Rung {
                beta,
                pos: Array2::zeros((config.nwalkers, ndim)),
                lnprob: vec![LnProb::rejected(); config.nwalkers],
                naccepted: vec![0; config.nwalkers],
            })
            .collect();
        let chains = betas
            .iter()
            .map(|_| Chain::new(ndim, config.nwalkers))
            .collect();
        let rng = SmallRng::seed_from_u64(config.seed);
        let npairs = config.ntemps.saturating_sub(1);

        Ok(Self {
            posterior,
            config,
            ndim,
            rungs,
            chains,
            rng,
            iterations: 0,
            swaps_proposed: vec![0; npairs],
            swaps_accepted: vec![0; npairs],
        })
    }

    /// Seed every rung's walkers with independent Gaussian perturbations of
    /// `center`, then evaluate the whole initial population in one batch.
    pub fn initialize(&mut self, center: &[f64], scales: &[f64]) -> Result<()> {
        if center.len() != self.ndim || scales.len() != self.ndim {
            return Err(WdFitError::Config(format!(
                "initial guess must have {} values",
                self.ndim
            )));
        }
        let normals: Vec<Normal<f64>> = scales
            .iter()
            .map(|&s| {
                Normal::new(0.0, s).map_err(|_| {
                    WdFitError::Config(format!("invalid walker perturbation scale {s}"))
                })
            })
            .collect::<Result<_>>()?;

        let mut all_positions = Vec::with_capacity(self.config.ntemps * self.config.nwalkers);
        for rung in self.rungs.iter_mut() {
            for w in 0..self.config.nwalkers {
                let mut p = Vec::with_capacity(self.ndim);
                for d in 0..self.ndim {
                    p.push(center[d] + normals[d].sample(&mut self.rng));
                }
                for d in 0..self.ndim {
                    rung.pos[[w, d]] = p[d];
                }
                all_positions.push(p);
            }
        }

        let lnprobs = self.evaluate_batch(&all_positions)?;
        for (r, rung) in self.rungs.iter_mut().enumerate() {
            let beta = rung.beta;
            for w in 0..self.config.nwalkers {
                let lp = lnprobs[r * self.config.nwalkers + w];
                if lp.tempered(beta).is_nan() {
                    return Err(WdFitError::Config(
                        "initial log-posterior was NaN".into(),
                    ));
                }
                rung.lnprob[w] = lp;
            }
        }
        Ok(())
    }

    /// Dispatch one round of evaluations to the worker pool and gather all
    /// results before returning. Any failed evaluation aborts the round.
    fn evaluate_batch(&self, proposals: &[Vec<f64>]) -> Result<Vec<LnProb>> {
        proposals
            .par_iter()
            .map(|p| self.posterior.evaluate(p))
            .collect::<Result<Vec<_>>>()
            .map_err(|err| WdFitError::WorkerFailure(err.to_string()))
    }

    /// Advance all rungs by `niters` iterations, recording chain history at
    /// the configured cadence when `record` is set.
    pub fn run(&mut self, niters: usize, record: bool) -> Result<()> {
        for i in 0..niters {
            for r in 0..self.rungs.len() {
                self.stretch_update(r)?;
            }
            self.iterations += 1;
            if self.iterations % self.config.swap_every == 0 {
                self.swap_update();
            }
            if record && i % self.config.record_every == 0 {
                for (r, rung) in self.rungs.iter().enumerate() {
                    let lnpost: Vec<f64> =
                        rung.lnprob.iter().map(|lp| lp.tempered(rung.beta)).collect();
                    self.chains[r].record(&rung.pos, &lnpost);
                }
            }
        }
        Ok(())
    }

    /// One stretch-move round for rung `r`: each half of the ensemble
    /// proposes against the other half, all proposals of a half evaluated
    /// as one batch.
    fn stretch_update(&mut self, r: usize) -> Result<()> {
        let nw = self.config.nwalkers;
        let halfk = nw / 2;
        let a = self.config.proposal_scale;
        let ndim = self.ndim;
        let beta = self.rungs[r].beta;

        for half in 0..2 {
            let (s_lo, c_lo, c_len) = if half == 0 {
                (0, halfk, nw - halfk)
            } else {
                (halfk, 0, halfk)
            };

            let mut proposals = Vec::with_capacity(halfk);
            let mut zs = Vec::with_capacity(halfk);
            {
                let rung = &self.rungs[r];
                let rng = &mut self.rng;
                for k in s_lo..s_lo + halfk {
                    let z = ((a - 1.0) * rng.random::<f64>() + 1.0).powi(2) / a;
                    let j = c_lo + rng.random_range(0..c_len);
                    let mut q = Vec::with_capacity(ndim);
                    for d in 0..ndim {
                        let c = rung.pos[[j, d]];
                        q.push(c + z * (rung.pos[[k, d]] - c));
                    }
                    proposals.push(q);
                    zs.push(z);
                }
            }

            let newln = self.evaluate_batch(&proposals)?;

            let rung = &mut self.rungs[r];
            for (idx, k) in (s_lo..s_lo + halfk).enumerate() {
                let old_t = rung.lnprob[k].tempered(beta);
                let new_t = newln[idx].tempered(beta);
                let accept = if !new_t.is_finite() {
                    false
                } else if !old_t.is_finite() {
                    true
                } else {
                    let lnpdiff = (ndim as f64 - 1.0) * zs[idx].ln() + new_t - old_t;
                    lnpdiff > self.rng.random::<f64>().ln()
                };
                if accept {
                    for d in 0..ndim {
                        rung.pos[[k, d]] = proposals[idx][d];
                    }
                    rung.lnprob[k] = newln[idx];
                    rung.naccepted[k] += 1;
                }
            }
        }
        Ok(())
    }

    /// One sweep of swap proposals over adjacent rung pairs, hottest pair
    /// first. Uses the stored log-likelihoods; no new evaluations.
    fn swap_update(&mut self) {
        let nw = self.config.nwalkers;
        let ndim = self.ndim;
        for i in (1..self.rungs.len()).rev() {
            let (colder, hotter) = self.rungs.split_at_mut(i);
            let cold = &mut colder[i - 1];
            let hot = &mut hotter[0];
            for w in 0..nw {
                let w2 = self.rng.random_range(0..nw);
                let lnalpha = swap_log_accept(
                    hot.beta,
                    cold.beta,
                    hot.lnprob[w].lnlike,
                    cold.lnprob[w2].lnlike,
                );
                self.swaps_proposed[i - 1] += 1;
                let accept = if lnalpha.is_nan() {
                    false
                } else {
                    lnalpha >= 0.0 || self.rng.random::<f64>().ln() < lnalpha
                };
                if accept {
                    for d in 0..ndim {
                        let tmp = hot.pos[[w, d]];
                        hot.pos[[w, d]] = cold.pos[[w2, d]];
                        cold.pos[[w2, d]] = tmp;
                    }
                    std::mem::swap(&mut hot.lnprob[w], &mut cold.lnprob[w2]);
                    self.swaps_accepted[i - 1] += 1;
                }
            }
        }
    }

    /// Acceptance fraction per walker for one rung.
    pub fn acceptance_fraction(&self, rung: usize) -> Vec<f64> {
        let iters = self.iterations.max(1) as f64;
        self.rungs[rung]
            .naccepted
            .iter()
            .map(|&n| n as f64 / iters)
            .collect()
    }

    /// Swap acceptance fraction per adjacent rung pair, coldest pair first.
    pub fn swap_acceptance_fraction(&self) -> Vec<f64> {
        self.swaps_accepted
            .iter()
            .zip(&self.swaps_proposed)
            .map(|(&acc, &prop)| if prop > 0 { acc as f64 / prop as f64 } else { 0.0 })
            .collect()
    }

    /// The recorded chain of the coldest rung (T = 1), used for inference.
    pub fn cold_chain(&self) -> &Chain {
        &self.chains[0]
    }

    /// Recorded chains for all rungs, coldest first.
    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }
}
