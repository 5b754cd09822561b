//! Named model parameters with free/fixed flags and prior bounds.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, WdFitError};

/// One named parameter: current value, whether the sampler may move it, and
/// the flat prior interval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Parameter {
    pub value: f64,
    pub fixed: bool,
    pub bounds: (f64, f64),
}

impl Parameter {
    pub fn free(value: f64, lo: f64, hi: f64) -> Self {
        Self {
            value,
            fixed: false,
            bounds: (lo, hi),
        }
    }

    pub fn fixed(value: f64) -> Self {
        Self {
            value,
            fixed: true,
            bounds: (value, value),
        }
    }

    pub fn in_bounds(&self) -> bool {
        self.value >= self.bounds.0 && self.value <= self.bounds.1
    }
}

/// Ordered set of named parameters. Created from user input, mutated only by
/// the sampler's proposal mechanism via [`ParameterVector::with_free_values`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterVector {
    params: IndexMap<String, Parameter>,
}

impl Default for ParameterVector {
    /// The standard white-dwarf atmosphere parameter set: effective
    /// temperature, surface gravity, reddening, flux scale and instrumental
    /// smoothing FWHM (grid pixels).
    fn default() -> Self {
        let mut params = IndexMap::new();
        params.insert("teff".to_string(), Parameter::free(35000.0, 17000.0, 80000.0));
        params.insert("logg".to_string(), Parameter::free(8.0, 7.0, 9.5));
        params.insert("ebv".to_string(), Parameter::free(0.05, 0.0, 2.0));
        params.insert("scale".to_string(), Parameter::free(1.0, 1e-6, 100.0));
        params.insert("fwhm".to_string(), Parameter::free(3.0, 0.1, 50.0));
        Self { params }
    }
}

impl ParameterVector {
    pub fn new(params: IndexMap<String, Parameter>) -> Self {
        Self { params }
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.get_mut(name)
    }

    /// Value of a named parameter, free or fixed.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.params.get(name).map(|p| p.value)
    }

    pub fn insert(&mut self, name: impl Into<String>, param: Parameter) {
        self.params.insert(name.into(), param);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Parameter)> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Names of the free parameters, in declaration order.
    pub fn free_names(&self) -> Vec<String> {
        self.params
            .iter()
            .filter(|(_, p)| !p.fixed)
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Number of free parameters (the sampler dimensionality).
    pub fn ndim(&self) -> usize {
        self.params.values().filter(|p| !p.fixed).count()
    }

    /// Current values of the free parameters, in declaration order.
    pub fn free_values(&self) -> Vec<f64> {
        self.params
            .values()
            .filter(|p| !p.fixed)
            .map(|p| p.value)
            .collect()
    }

    /// Lower and upper prior bounds of the free parameters.
    pub fn free_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let lower = self
            .params
            .values()
            .filter(|p| !p.fixed)
            .map(|p| p.bounds.0)
            .collect();
        let upper = self
            .params
            .values()
            .filter(|p| !p.fixed)
            .map(|p| p.bounds.1)
            .collect();
        (lower, upper)
    }

    /// A copy with the free parameters set from a flat vector, in
    /// declaration order.
    pub fn with_free_values(&self, values: &[f64]) -> Result<Self> {
        if values.len() != self.ndim() {
            return Err(WdFitError::Config(format!(
                "expected {} free parameter values, got {}",
                self.ndim(),
                values.len()
            )));
        }
        let mut out = self.clone();
        let mut it = values.iter();
        for p in out.params.values_mut() {
            if !p.fixed {
                p.value = *it.next().expect("length checked above");
            }
        }
        Ok(out)
    }

    /// Read a parameter specification from JSON.
    pub fn read_json(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let pv = serde_json::from_reader(BufReader::new(file))?;
        Ok(pv)
    }

    /// Write the parameter specification as JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_projection_roundtrip() {
        let mut pv = ParameterVector::default();
        pv.get_mut("ebv").unwrap().fixed = true;
        assert_eq!(pv.ndim(), 4);
        assert_eq!(pv.free_names(), vec!["teff", "logg", "scale", "fwhm"]);

        let updated = pv.with_free_values(&[20000.0, 7.5, 2.0, 4.0]).unwrap();
        assert_eq!(updated.value("teff"), Some(20000.0));
        assert_eq!(updated.value("logg"), Some(7.5));
        // fixed parameter untouched
        assert_eq!(updated.value("ebv"), pv.value("ebv"));
        assert_eq!(updated.value("scale"), Some(2.0));
    }

    #[test]
    fn wrong_length_rejected() {
        let pv = ParameterVector::default();
        assert!(pv.with_free_values(&[1.0, 2.0]).is_err());
    }
}
