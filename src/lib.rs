//! `wdfit` — Bayesian estimation of white dwarf atmosphere parameters.
//!
//! Fits a theoretical spectral-and-photometric model to observed
//! spectroscopy and photometry. Model spectra from heterogeneous ASCII
//! sources are regularized onto a dense (wavelength, log g, Teff) grid once
//! offline; at fit time the grid is queried by bilinear interpolation inside
//! the posterior, and a parallel-tempered ensemble sampler explores the
//! (Teff, log g, E(B-V), scale, smoothing) parameter space with likelihood
//! evaluations distributed over a worker pool.

pub mod common;
pub mod errors;
pub mod fit;
pub mod grid;
pub mod interp;
pub mod observation;
pub mod params;
pub mod posterior;
pub mod results;
pub mod sampler;

pub use errors::{Result, WdFitError};
pub use fit::{outfile, run_fit, FitConfig};
pub use grid::{
    build_grid, read_model_grid, write_grid, GridBuildRequest, ModelGrid, WriteOptions,
};
pub use interp::AkimaSpline;
pub use observation::{
    build_passband_set, ObservationBundle, Passband, PassbandSet, Photometry, PhotometryPoint,
    Spectroscopy,
};
pub use params::{Parameter, ParameterVector};
pub use posterior::{LikelihoodConfig, LnProb, Posterior};
pub use results::{reduce_chain, FitResult, ParamEstimate};
pub use sampler::{swap_log_accept, temperature_ladder, Chain, PtSampler, SamplerConfig};
