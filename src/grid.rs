//! Model grid construction, query and persistence.
//!
//! The grid builder reads per-spectrum ASCII model files (Koester/SVO
//! naming: `da<TTTTT>_<GGG>.dk.dat.txt`, Teff in Kelvin and 100x log g
//! encoded in the name), regularizes each spectrum onto a uniform
//! wavelength axis with Akima interpolation, and assembles a dense flux
//! cube indexed `[wavelength, log g, Teff]`. The cube is built once
//! offline, persisted, and read-only at fit time.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use indexmap::IndexMap;
use log::warn;
use ndarray::{Array1, Array3};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, WdFitError};
use crate::interp::AkimaSpline;

/// Numeric tolerance applied to requested log g bounds.
const EPS_LOGG: f64 = 1e-4;
/// Numeric tolerance applied to requested Teff bounds.
const EPS_TEFF: f64 = 1.0;
/// Grids estimated above this size require explicit confirmation to write.
pub const LARGE_GRID_MB: f64 = 500.0;

const MODEL_FILE_SUFFIX: &str = "dk.dat.txt";

// ---------------------------------------------------------------------------
// Raw model spectra
// ---------------------------------------------------------------------------

/// One theoretical spectrum for a single (Teff, log g) pair, ordered by
/// wavelength with duplicates collapsed to their first occurrence.
#[derive(Debug, Clone)]
pub struct RawModelSpectrum {
    pub teff: f64,
    pub logg: f64,
    pub wave: Vec<f64>,
    pub flux: Vec<f64>,
}

impl RawModelSpectrum {
    /// Load from a two-column whitespace-separated ASCII file whose name
    /// encodes Teff and log g.
    pub fn from_file(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| WdFitError::Config(format!("bad model file name: {:?}", path)))?;
        let (teff, logg) = parse_model_filename(name).ok_or_else(|| {
            WdFitError::Config(format!("cannot parse Teff/log g from file name {name}"))
        })?;

        let file = File::open(path)?;
        let mut wave = Vec::new();
        let mut flux = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut cols = line.split_whitespace();
            let (w, f) = match (cols.next(), cols.next()) {
                (Some(w), Some(f)) => (w, f),
                _ => {
                    return Err(WdFitError::Config(format!(
                        "malformed line in {name}: {line:?}"
                    )))
                }
            };
            let w: f64 = w
                .parse()
                .map_err(|_| WdFitError::Config(format!("bad wavelength in {name}: {w:?}")))?;
            let f: f64 = f
                .parse()
                .map_err(|_| WdFitError::Config(format!("bad flux in {name}: {f:?}")))?;
            wave.push(w);
            flux.push(f);
        }
        if wave.len() < 2 {
            return Err(WdFitError::Config(format!(
                "model file {name} holds fewer than 2 samples"
            )));
        }

        let (wave, flux) = dedup_first(&wave, &flux);
        Ok(Self {
            teff,
            logg,
            wave,
            flux,
        })
    }
}

/// Parse `da<TTTTT>_<GGG>.dk.dat.txt` into (Teff, log g).
pub fn parse_model_filename(name: &str) -> Option<(f64, f64)> {
    let stem = name.strip_suffix(MODEL_FILE_SUFFIX)?.strip_suffix('.')?;
    let rest = stem.strip_prefix("da")?;
    let (teff_str, logg_str) = rest.split_once('_')?;
    let teff: f64 = teff_str.parse().ok()?;
    let logg100: f64 = logg_str.parse().ok()?;
    Some((teff, logg100 / 100.0))
}

/// Collapse duplicate wavelengths, keeping the flux of the first occurrence
/// in original order. The output wavelength axis is strictly increasing.
pub fn dedup_first(wave: &[f64], flux: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut idx: Vec<usize> = (0..wave.len()).collect();
    idx.sort_by(|&a, &b| wave[a].total_cmp(&wave[b]));

    let mut out_w = Vec::with_capacity(wave.len());
    let mut out_f = Vec::with_capacity(wave.len());
    for group in idx.chunk_by(|&a, &b| wave[a] == wave[b]) {
        // stable sort keeps original order within equal wavelengths
        let first = group[0];
        out_w.push(wave[first]);
        out_f.push(flux[first]);
    }
    (out_w, out_f)
}

// ---------------------------------------------------------------------------
// Grid building
// ---------------------------------------------------------------------------

/// Requested output ranges for a grid build. `None` bounds default to the
/// range covered by the input files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridBuildRequest {
    pub lggl: Option<f64>,
    pub lggh: Option<f64>,
    pub tl: Option<f64>,
    pub th: Option<f64>,
    /// Output wavelength lower bound, Angstrom.
    pub wvl: f64,
    /// Output wavelength upper bound, Angstrom (exclusive).
    pub wvh: f64,
    /// Output wavelength spacing, Angstrom.
    pub dwv: f64,
}

impl Default for GridBuildRequest {
    fn default() -> Self {
        Self {
            lggl: None,
            lggh: None,
            tl: None,
            th: None,
            wvl: 3200.0,
            wvh: 10500.0,
            dwv: 0.01,
        }
    }
}

/// Dense model grid: flux cube indexed `[wavelength, log g, Teff]` plus the
/// three coordinate axes. Rectangular with no holes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelGrid {
    pub wave: Array1<f64>,
    pub ggrid: Array1<f64>,
    pub tgrid: Array1<f64>,
    pub flux: Array3<f64>,
}

impl ModelGrid {
    /// Interpolated flux spectrum at (`teff`, `logg`) on the grid wavelength
    /// axis, by separable bilinear interpolation over the two parameter
    /// axes. Exact at grid nodes. Fails outside the axes' convex hull.
    pub fn interpolate(&self, teff: f64, logg: f64) -> Result<Array1<f64>> {
        let (gi, gu) = bracket(self.ggrid.as_slice().unwrap_or(&[]), logg).ok_or_else(|| {
            WdFitError::OutOfRange(format!(
                "log g {logg} outside grid range [{}, {}]",
                self.ggrid[0],
                self.ggrid[self.ggrid.len() - 1]
            ))
        })?;
        let (ti, tu) = bracket(self.tgrid.as_slice().unwrap_or(&[]), teff).ok_or_else(|| {
            WdFitError::OutOfRange(format!(
                "Teff {teff} outside grid range [{}, {}]",
                self.tgrid[0],
                self.tgrid[self.tgrid.len() - 1]
            ))
        })?;

        let gj = (gi + 1).min(self.ggrid.len() - 1);
        let tj = (ti + 1).min(self.tgrid.len() - 1);

        let nw = self.wave.len();
        let mut out = Vec::with_capacity(nw);
        let w00 = (1.0 - gu) * (1.0 - tu);
        let w01 = (1.0 - gu) * tu;
        let w10 = gu * (1.0 - tu);
        let w11 = gu * tu;
        for k in 0..nw {
            out.push(
                w00 * self.flux[[k, gi, ti]]
                    + w01 * self.flux[[k, gi, tj]]
                    + w10 * self.flux[[k, gj, ti]]
                    + w11 * self.flux[[k, gj, tj]],
            );
        }
        Ok(Array1::from_vec(out))
    }

    /// Crude estimate of the serialized size in MB.
    pub fn size_estimate_mb(&self) -> f64 {
        let n = self.flux.len() + self.wave.len() + self.ggrid.len() + self.tgrid.len();
        (n * std::mem::size_of::<f64>()) as f64 / (1024.0 * 1024.0)
    }
}

/// Locate `x` on a sorted axis: returns the left bracket index and the
/// fractional position within the bracket. Weights are exactly 0 or 1 when
/// `x` coincides with an axis value. `None` if `x` is outside the axis.
fn bracket(axis: &[f64], x: f64) -> Option<(usize, f64)> {
    let n = axis.len();
    if n == 0 || x < axis[0] || x > axis[n - 1] {
        return None;
    }
    if n == 1 {
        return Some((0, 0.0));
    }
    if x == axis[n - 1] {
        return Some((n - 2, 1.0));
    }
    let hi = axis.partition_point(|&v| v <= x).clamp(1, n - 1);
    let lo = hi - 1;
    let u = if x == axis[lo] {
        0.0
    } else {
        (x - axis[lo]) / (axis[hi] - axis[lo])
    };
    Some((lo, u))
}

/// Build a [`ModelGrid`] from a directory of model spectra.
///
/// Returns the grid and an estimate of its serialized size in MB. Requested
/// wavelength bounds must lie inside every input spectrum's coverage.
/// Requested parameter bounds beyond the available range are clamped with a
/// warning (both axes, both directions); bounds that leave an axis empty are
/// an error.
pub fn build_grid(dir: &Path, req: &GridBuildRequest) -> Result<(ModelGrid, f64)> {
    if !dir.is_dir() {
        return Err(WdFitError::Config(format!(
            "directory {} does not exist",
            dir.display()
        )));
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(MODEL_FILE_SUFFIX))
        })
        .collect();
    paths.sort();
    if paths.is_empty() {
        return Err(WdFitError::Config(format!(
            "no files of format *{MODEL_FILE_SUFFIX} in {}",
            dir.display()
        )));
    }

    if req.wvh <= req.wvl || req.dwv <= 0.0 {
        return Err(WdFitError::Config(format!(
            "invalid wavelength request [{}, {}) step {}",
            req.wvl, req.wvh, req.dwv
        )));
    }
    let nw = ((req.wvh - req.wvl) / req.dwv).ceil() as usize;
    let wint: Vec<f64> = (0..nw).map(|i| req.wvl + i as f64 * req.dwv).collect();

    let mut spectra = Vec::with_capacity(paths.len());
    for path in &paths {
        let raw = RawModelSpectrum::from_file(path)?;
        if req.wvl < raw.wave[0] {
            return Err(WdFitError::OutOfRange(format!(
                "minimum wavelength in model {} ({}) is greater than requested minimum {}",
                path.display(),
                raw.wave[0],
                req.wvl
            )));
        }
        if req.wvh > raw.wave[raw.wave.len() - 1] {
            return Err(WdFitError::OutOfRange(format!(
                "maximum wavelength in model {} ({}) is less than requested maximum {}",
                path.display(),
                raw.wave[raw.wave.len() - 1],
                req.wvh
            )));
        }
        let spline = AkimaSpline::new(raw.wave, raw.flux);
        let resampled = spline.evaluate_many(&wint);
        spectra.push((raw.logg, raw.teff, resampled));
    }

    let gmin = spectra.iter().map(|s| s.0).fold(f64::INFINITY, f64::min);
    let gmax = spectra.iter().map(|s| s.0).fold(f64::NEG_INFINITY, f64::max);
    let tmin = spectra.iter().map(|s| s.1).fold(f64::INFINITY, f64::min);
    let tmax = spectra.iter().map(|s| s.1).fold(f64::NEG_INFINITY, f64::max);

    let lggl = clamp_bound(req.lggl, gmin, gmax, "log g lower", gmin);
    let lggh = clamp_bound(req.lggh, gmin, gmax, "log g upper", gmax);
    let tl = clamp_bound(req.tl, tmin, tmax, "Teff lower", tmin);
    let th = clamp_bound(req.th, tmin, tmax, "Teff upper", tmax);

    // deterministic layout: log g primary, Teff secondary, input order ties
    spectra.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let kept: Vec<_> = spectra
        .into_iter()
        .filter(|s| {
            s.0 >= lggl - EPS_LOGG
                && s.0 <= lggh + EPS_LOGG
                && s.1 >= tl - EPS_TEFF
                && s.1 <= th + EPS_TEFF
        })
        .collect();

    let mut gv: Vec<f64> = kept.iter().map(|s| s.0).collect();
    gv.dedup();
    let mut tv: Vec<f64> = kept.iter().map(|s| s.1).collect();
    tv.sort_by(|a, b| a.total_cmp(b));
    tv.dedup();

    if gv.is_empty() {
        return Err(WdFitError::Config(
            "no log g values in input file grid are within the desired output range".into(),
        ));
    }
    if tv.is_empty() {
        return Err(WdFitError::Config(
            "no Teff values in input file grid are within the desired output range".into(),
        ));
    }

    let ng = gv.len();
    let nt = tv.len();
    if kept.len() != ng * nt {
        return Err(WdFitError::Config(format!(
            "model grid has holes: {} spectra for {} log g x {} Teff points",
            kept.len(),
            ng,
            nt
        )));
    }

    let mut flux = Array3::<f64>::zeros((nw, ng, nt));
    for (i, (_, _, resampled)) in kept.iter().enumerate() {
        let (gi, ti) = (i / nt, i % nt);
        for (k, &v) in resampled.iter().enumerate() {
            flux[[k, gi, ti]] = v;
        }
    }

    let grid = ModelGrid {
        wave: Array1::from_vec(wint),
        ggrid: Array1::from_vec(gv),
        tgrid: Array1::from_vec(tv),
        flux,
    };
    let size_mb = grid.size_estimate_mb();
    log::info!(
        "built grid: {} wavelengths, {} log g points, {} Teff points (~{:.1} MB)",
        nw,
        ng,
        nt,
        size_mb
    );
    Ok((grid, size_mb))
}

fn clamp_bound(requested: Option<f64>, lo: f64, hi: f64, what: &str, default: f64) -> f64 {
    match requested {
        None => default,
        Some(v) if v < lo => {
            warn!("{what} bound {v} is below the available range [{lo}, {hi}]; using {lo}");
            lo
        }
        Some(v) if v > hi => {
            warn!("{what} bound {v} is above the available range [{lo}, {hi}]; using {hi}");
            hi
        }
        Some(v) => v,
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// One named grid group: the four datasets plus unit/provenance attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridGroup {
    pub wave: Array1<f64>,
    pub ggrid: Array1<f64>,
    pub tgrid: Array1<f64>,
    pub flux: Array3<f64>,
    pub attrs: IndexMap<String, String>,
}

/// Grid container file: named groups, each holding one grid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridFile {
    pub grids: IndexMap<String, GridGroup>,
}

/// Options gating a grid write.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Overwrite an existing file.
    pub overwrite: bool,
    /// Confirm writing a grid estimated above [`LARGE_GRID_MB`].
    pub allow_large: bool,
}

/// Persist a grid under `grid_name` in a new container file.
///
/// Refuses to clobber an existing file without `overwrite`, and refuses to
/// write a grid estimated above [`LARGE_GRID_MB`] without `allow_large`.
pub fn write_grid(
    grid: &ModelGrid,
    path: &Path,
    grid_name: &str,
    opts: WriteOptions,
) -> Result<()> {
    if path.exists() && !opts.overwrite {
        return Err(WdFitError::OutputExists(path.to_path_buf()));
    }
    let size_mb = grid.size_estimate_mb();
    if size_mb > LARGE_GRID_MB && !opts.allow_large {
        return Err(WdFitError::Config(format!(
            "grid is ~{size_mb:.0} MB (> {LARGE_GRID_MB:.0} MB); confirm with allow_large"
        )));
    }

    let mut attrs = IndexMap::new();
    attrs.insert("wave.unit".to_string(), "Angstrom".to_string());
    attrs.insert("ggrid.unit".to_string(), "log [cm/s^2]".to_string());
    attrs.insert("tgrid.unit".to_string(), "Kelvin".to_string());
    attrs.insert("flux.unit".to_string(), "erg/cm^2/s/A".to_string());
    attrs.insert(
        "info".to_string(),
        "Model white dwarf spectra interpolated onto a regular wavelength grid".to_string(),
    );

    let mut container = GridFile::default();
    container.grids.insert(
        grid_name.to_string(),
        GridGroup {
            wave: grid.wave.clone(),
            ggrid: grid.ggrid.clone(),
            tgrid: grid.tgrid.clone(),
            flux: grid.flux.clone(),
            attrs,
        },
    );

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, &container)?;
    writer.flush()?;
    Ok(())
}

/// Read the grid stored under `grid_name` from a container file.
pub fn read_model_grid(path: &Path, grid_name: &str) -> Result<ModelGrid> {
    let file = File::open(path)?;
    let container: GridFile = bincode::deserialize_from(BufReader::new(file))?;
    let group = container.grids.get(grid_name).ok_or_else(|| {
        WdFitError::Config(format!(
            "grid {grid_name:?} not found in {}",
            path.display()
        ))
    })?;
    Ok(ModelGrid {
        wave: group.wave.clone(),
        ggrid: group.ggrid.clone(),
        tgrid: group.tgrid.clone(),
        flux: group.flux.clone(),
    })
}
