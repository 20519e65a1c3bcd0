use super::bonds::HarmonicBond;
use super::potentials::{lennard_jones_12_6, weeks_chandler_andersen};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// A non-bonded pair interaction between two particle types.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PairPotential {
    LennardJones {
        sigma: f64,
        epsilon: f64,
        cutoff: f64,
        /// Shift the energy so that it vanishes at the cutoff.
        #[serde(default)]
        shift: bool,
    },
    Wca {
        sigma: f64,
        epsilon: f64,
    },
    #[default]
    None,
}

impl PairPotential {
    /// Energy and `F/r` at squared separation `dist_sq`.
    pub fn evaluate(&self, dist_sq: f64) -> (f64, f64) {
        match *self {
            PairPotential::LennardJones {
                sigma,
                epsilon,
                cutoff,
                shift,
            } => {
                if dist_sq >= cutoff * cutoff {
                    return (0.0, 0.0);
                }
                let (energy, force_over_r) = lennard_jones_12_6(dist_sq, sigma, epsilon);
                let offset = if shift {
                    lennard_jones_12_6(cutoff * cutoff, sigma, epsilon).0
                } else {
                    0.0
                };
                (energy - offset, force_over_r)
            }
            PairPotential::Wca { sigma, epsilon } => weeks_chandler_andersen(dist_sq, sigma, epsilon),
            PairPotential::None => (0.0, 0.0),
        }
    }

    /// Separation beyond which the potential vanishes.
    pub fn range(&self) -> f64 {
        match *self {
            PairPotential::LennardJones { cutoff, .. } => cutoff,
            PairPotential::Wca { sigma, .. } => super::potentials::lennard_jones_minimum(sigma),
            PairPotential::None => 0.0,
        }
    }
}

/// Symmetric lookup of pair potentials by particle type.
///
/// Type pairs without an entry do not interact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairTable {
    entries: HashMap<(usize, usize), PairPotential>,
}

impl PairTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, a: usize, b: usize, potential: PairPotential) -> Self {
        self.set(a, b, potential);
        self
    }

    pub fn set(&mut self, a: usize, b: usize, potential: PairPotential) {
        self.entries.insert(Self::key(a, b), potential);
    }

    #[inline]
    pub fn get(&self, a: usize, b: usize) -> PairPotential {
        self.entries.get(&Self::key(a, b)).copied().unwrap_or_default()
    }

    /// Largest range over all entries.
    pub fn max_range(&self) -> f64 {
        self.entries.values().map(PairPotential::range).fold(0.0, f64::max)
    }

    #[inline]
    fn key(a: usize, b: usize) -> (usize, usize) {
        if a <= b { (a, b) } else { (b, a) }
    }

    fn from_raw(raw: HashMap<String, PairPotential>, path: &Path) -> Result<Self, ParamLoadError> {
        let mut table = Self::new();
        for (key, potential) in raw {
            let (a, b) = parse_type_pair(&key).ok_or_else(|| ParamLoadError::InvalidPairKey {
                path: path.to_string_lossy().to_string(),
                key: key.clone(),
            })?;
            table.set(a, b, potential);
        }
        Ok(table)
    }
}

fn parse_type_pair(key: &str) -> Option<(usize, usize)> {
    let (a, b) = key.split_once('-')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawForcefield {
    #[serde(default)]
    coarse: HashMap<String, PairPotential>,
    #[serde(default)]
    atomistic: HashMap<String, PairPotential>,
    #[serde(default)]
    bond: Option<HarmonicBond>,
}

/// Everything the force evaluation needs: coarse-grained and atomistic pair
/// tables plus the intramolecular bond.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Forcefield {
    pub coarse: PairTable,
    pub atomistic: PairTable,
    pub bond: Option<HarmonicBond>,
}

#[derive(Debug, Error)]
pub enum ParamLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV parsing error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Invalid type pair '{key}' in '{path}', expected '<type>-<type>'")]
    InvalidPairKey { path: String, key: String },
    #[error("Invalid table in '{path}': {reason}")]
    InvalidTable { path: String, reason: String },
}

impl Forcefield {
    pub fn load(path: &Path) -> Result<Self, ParamLoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| ParamLoadError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ParamLoadError> {
        let raw: RawForcefield = toml::from_str(content).map_err(|e| ParamLoadError::Toml {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Ok(Self {
            coarse: PairTable::from_raw(raw.coarse, path)?,
            atomistic: PairTable::from_raw(raw.atomistic, path)?,
            bond: raw.bond,
        })
    }
}
