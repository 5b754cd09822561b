//! Reduction of the cold-rung chain into per-parameter summary statistics.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::common::{finite_or_none, quantile_sorted};
use crate::errors::{Result, WdFitError};
use crate::sampler::Chain;

/// Point estimate and credible interval for one free parameter: the median
/// of the flattened samples with distances to the 16th and 84th percentiles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParamEstimate {
    pub value: f64,
    pub errlo: f64,
    pub errhi: f64,
}

/// Summary of one fit: per-parameter estimates plus sampling diagnostics.
/// Immutable once computed; persisted as the final output artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    pub params: IndexMap<String, ParamEstimate>,
    pub mean_acceptance: f64,
    /// Integrated autocorrelation time per parameter; `None` when the chain
    /// is too short to estimate it.
    pub autocorr_time: IndexMap<String, Option<f64>>,
    pub nsamples: usize,
}

/// Reduce the cold chain: drop `discard` leading recorded iterations, thin
/// by `thin`, flatten across walkers and summarize each free parameter.
///
/// Fails if `discard` meets or exceeds the number of recorded iterations.
pub fn reduce_chain(
    chain: &Chain,
    free_names: &[String],
    discard: usize,
    thin: usize,
    acceptance: &[f64],
) -> Result<FitResult> {
    if discard >= chain.recorded() {
        return Err(WdFitError::Config(format!(
            "requested discard ({discard}) exceeds the {} recorded iterations",
            chain.recorded()
        )));
    }
    if free_names.len() != chain.ndim() {
        return Err(WdFitError::Config(format!(
            "{} parameter names for a {}-dimensional chain",
            free_names.len(),
            chain.ndim()
        )));
    }

    let (flat, _lnpost) = chain.flat_samples(discard, thin);
    let nsamples = flat.nrows();
    if nsamples == 0 {
        return Err(WdFitError::Config(
            "no samples left after discarding and thinning".into(),
        ));
    }

    let mut params = IndexMap::new();
    for (d, name) in free_names.iter().enumerate() {
        let mut values: Vec<f64> = flat.column(d).to_vec();
        values.sort_by(|a, b| a.total_cmp(b));
        let p16 = quantile_sorted(&values, 0.16);
        let med = quantile_sorted(&values, 0.50);
        let p84 = quantile_sorted(&values, 0.84);
        params.insert(
            name.clone(),
            ParamEstimate {
                value: med,
                errlo: med - p16,
                errhi: p84 - med,
            },
        );
    }

    let mean_acceptance = if acceptance.is_empty() {
        0.0
    } else {
        acceptance.iter().sum::<f64>() / acceptance.len() as f64
    };

    let mut autocorr_time = IndexMap::new();
    for (d, name) in free_names.iter().enumerate() {
        autocorr_time.insert(
            name.clone(),
            finite_or_none(chain_autocorr_time(chain, d, discard)),
        );
    }

    Ok(FitResult {
        params,
        mean_acceptance,
        autocorr_time,
        nsamples,
    })
}

/// Integrated autocorrelation time tau = 1 + 2 * sum of positive
/// autocorrelations, averaged over walkers.
fn chain_autocorr_time(chain: &Chain, param: usize, discard: usize) -> f64 {
    let n_keep = chain.recorded() - discard;
    if n_keep < 10 {
        return f64::NAN;
    }
    let max_lag = (n_keep / 2).min(100);
    let nwalkers = chain.nwalkers();

    let mut avg = vec![0.0; max_lag];
    for w in 0..nwalkers {
        let series = chain.param_series(w, param, discard);
        let rho = autocorrelation(&series, max_lag);
        for (acc, r) in avg.iter_mut().zip(rho) {
            *acc += r / nwalkers as f64;
        }
    }

    let mut total = 0.0;
    for &r in &avg {
        if r <= 0.0 {
            break;
        }
        total += r;
    }
    1.0 + 2.0 * total
}

/// Autocorrelation at lags 1..=max_lag (lag 0 is identically 1 and omitted).
fn autocorrelation(series: &[f64], max_lag: usize) -> Vec<f64> {
    let n = series.len();
    let mean = series.iter().sum::<f64>() / n as f64;
    let variance = series.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n as f64;
    if variance == 0.0 {
        return vec![0.0; max_lag];
    }

    (1..=max_lag)
        .map(|lag| {
            if lag >= n {
                return 0.0;
            }
            let mut cov = 0.0;
            for i in 0..n - lag {
                cov += (series[i] - mean) * (series[i + lag] - mean);
            }
            cov / ((n - lag) as f64 * variance)
        })
        .collect()
}
