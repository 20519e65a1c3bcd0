use crate::core::adress::region::{RegionCenter, RegionGeometry};
use crate::core::adress::weight::{WeightError, WeightFunction};
use crate::core::models::ids::ParticleId;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("A fixed region center cannot be combined with marker particles")]
    FixedCenterWithMarkers,
    #[error("The high-resolution region moves with its markers, but no marker particle is registered")]
    EmptyMarkerSet,
    #[error("Invalid weight function: {0}")]
    Weight(#[from] WeightError),
}

/// How the two resolutions are blended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scheme {
    /// Force-based blending (F-AdResS): pair weight `λ1·λ2`, no drift term.
    Force,
    /// Energy-conserving blending (H-AdResS): pair weight `(λ1+λ2)/2` with the
    /// drift-force correction.
    #[default]
    Energy,
}

impl Scheme {
    /// Weight of the atomistic description for a pair of particles.
    #[inline]
    pub fn pair_weight(&self, lambda_a: f64, lambda_b: f64) -> f64 {
        match self {
            Scheme::Force => lambda_a * lambda_b,
            Scheme::Energy => 0.5 * (lambda_a + lambda_b),
        }
    }

    #[inline]
    pub fn has_drift_term(&self) -> bool {
        matches!(self, Scheme::Energy)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Force => write!(f, "force"),
            Scheme::Energy => write!(f, "energy"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown blending scheme '{0}'")]
pub struct ParseSchemeError(pub String);

impl FromStr for Scheme {
    type Err = ParseSchemeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "force" | "f-adress" => Ok(Scheme::Force),
            "energy" | "h-adress" => Ok(Scheme::Energy),
            _ => Err(ParseSchemeError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdressConfig {
    /// Interaction cutoff for coarse-grained pairs.
    pub cutoff: f64,
    /// Verlet skin added to the cutoff when building pair lists.
    pub skin: f64,
    pub weight: WeightFunction,
    pub geometry: RegionGeometry,
    pub center: RegionCenter,
    /// Marker positions are refreshed on steps divisible by this.
    pub region_updates: usize,
    pub scheme: Scheme,
}

impl AdressConfig {
    #[inline]
    pub fn list_range(&self) -> f64 {
        self.cutoff + self.skin
    }
}

#[derive(Default)]
pub struct AdressConfigBuilder {
    cutoff: Option<f64>,
    skin: Option<f64>,
    r_ex: Option<f64>,
    r_hy: Option<f64>,
    geometry: Option<RegionGeometry>,
    center: Option<Point3<f64>>,
    marker_ids: Vec<ParticleId>,
    region_updates: Option<usize>,
    scheme: Option<Scheme>,
}

impl AdressConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cutoff(mut self, cutoff: f64) -> Self {
        self.cutoff = Some(cutoff);
        self
    }
    pub fn skin(mut self, skin: f64) -> Self {
        self.skin = Some(skin);
        self
    }
    pub fn r_ex(mut self, r_ex: f64) -> Self {
        self.r_ex = Some(r_ex);
        self
    }
    pub fn r_hy(mut self, r_hy: f64) -> Self {
        self.r_hy = Some(r_hy);
        self
    }
    pub fn geometry(mut self, geometry: RegionGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }
    pub fn center(mut self, center: Point3<f64>) -> Self {
        self.center = Some(center);
        self
    }
    pub fn marker(mut self, id: ParticleId) -> Self {
        self.marker_ids.push(id);
        self
    }
    pub fn marker_ids(mut self, ids: impl IntoIterator<Item = ParticleId>) -> Self {
        self.marker_ids.extend(ids);
        self
    }
    pub fn region_updates(mut self, every: usize) -> Self {
        self.region_updates = Some(every);
        self
    }
    pub fn scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = Some(scheme);
        self
    }

    /// Without a fixed center the region follows the marker particles; an empty
    /// marker set is accepted here because markers may still be added at
    /// runtime, and is rejected when the engine first needs them.
    pub fn build(self) -> Result<AdressConfig, ConfigError> {
        let cutoff = self.cutoff.ok_or(ConfigError::MissingParameter("cutoff"))?;
        let skin = self.skin.ok_or(ConfigError::MissingParameter("skin"))?;
        let r_ex = self.r_ex.ok_or(ConfigError::MissingParameter("r_ex"))?;
        let r_hy = self.r_hy.ok_or(ConfigError::MissingParameter("r_hy"))?;

        if !(cutoff.is_finite() && cutoff > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "cutoff",
                reason: format!("must be positive, got {cutoff}"),
            });
        }
        if !(skin.is_finite() && skin >= 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "skin",
                reason: format!("must be non-negative, got {skin}"),
            });
        }
        let region_updates = self.region_updates.unwrap_or(1);
        if region_updates == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "region_updates",
                reason: "must be at least 1".to_string(),
            });
        }

        let center = match (self.center, self.marker_ids.is_empty()) {
            (Some(_), false) => return Err(ConfigError::FixedCenterWithMarkers),
            (Some(point), true) => RegionCenter::Fixed(point),
            (None, _) => RegionCenter::Markers(self.marker_ids),
        };

        Ok(AdressConfig {
            cutoff,
            skin,
            weight: WeightFunction::new(r_ex, r_hy)?,
            geometry: self.geometry.unwrap_or_default(),
            center,
            region_updates,
            scheme: self.scheme.unwrap_or_default(),
        })
    }
}

/// One atom of a molecule template, placed relative to the molecule origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemplateAtom {
    pub offset: Vector3<f64>,
    pub mass: f64,
    #[serde(default)]
    pub type_id: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoleculeTemplate {
    pub atoms: Vec<TemplateAtom>,
    /// Interaction type of the coarse-grained bead.
    #[serde(default)]
    pub cg_type: usize,
}

impl MoleculeTemplate {
    pub fn total_mass(&self) -> f64 {
        self.atoms.iter().map(|a| a.mass).sum()
    }
}

/// A cubic lattice of identical molecules.
#[derive(Debug, Clone, PartialEq)]
pub struct LatticeConfig {
    pub molecules_per_side: usize,
    pub spacing: f64,
    pub template: MoleculeTemplate,
    pub temperature: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub adress: AdressConfig,
    pub lattice: LatticeConfig,
    pub forcefield_path: PathBuf,
    pub fec_path: Option<PathBuf>,
    pub timestep: f64,
    pub steps: usize,
    /// Thermodynamic records are taken on steps divisible by this.
    pub thermo_interval: usize,
    /// Bins of the density profile sampled with every record; 0 disables it.
    pub density_bins: usize,
}

#[derive(Default)]
pub struct SimulationConfigBuilder {
    adress: Option<AdressConfig>,
    molecules_per_side: Option<usize>,
    spacing: Option<f64>,
    template: Option<MoleculeTemplate>,
    temperature: Option<f64>,
    seed: Option<u64>,
    forcefield_path: Option<PathBuf>,
    fec_path: Option<PathBuf>,
    timestep: Option<f64>,
    steps: Option<usize>,
    thermo_interval: Option<usize>,
    density_bins: Option<usize>,
}

impl SimulationConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adress(mut self, config: AdressConfig) -> Self {
        self.adress = Some(config);
        self
    }
    pub fn molecules_per_side(mut self, n: usize) -> Self {
        self.molecules_per_side = Some(n);
        self
    }
    pub fn spacing(mut self, spacing: f64) -> Self {
        self.spacing = Some(spacing);
        self
    }
    pub fn template(mut self, template: MoleculeTemplate) -> Self {
        self.template = Some(template);
        self
    }
    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
    pub fn forcefield_path(mut self, path: PathBuf) -> Self {
        self.forcefield_path = Some(path);
        self
    }
    pub fn fec_path(mut self, path: Option<PathBuf>) -> Self {
        self.fec_path = path;
        self
    }
    pub fn timestep(mut self, dt: f64) -> Self {
        self.timestep = Some(dt);
        self
    }
    pub fn steps(mut self, steps: usize) -> Self {
        self.steps = Some(steps);
        self
    }
    pub fn thermo_interval(mut self, every: usize) -> Self {
        self.thermo_interval = Some(every);
        self
    }
    pub fn density_bins(mut self, bins: usize) -> Self {
        self.density_bins = Some(bins);
        self
    }

    pub fn build(self) -> Result<SimulationConfig, ConfigError> {
        let lattice = LatticeConfig {
            molecules_per_side: self
                .molecules_per_side
                .ok_or(ConfigError::MissingParameter("molecules_per_side"))?,
            spacing: self.spacing.ok_or(ConfigError::MissingParameter("spacing"))?,
            template: self.template.ok_or(ConfigError::MissingParameter("template"))?,
            temperature: self.temperature.unwrap_or(1.0),
            seed: self.seed.unwrap_or(0),
        };
        if lattice.template.atoms.is_empty() {
            return Err(ConfigError::InvalidParameter {
                name: "template",
                reason: "a molecule needs at least one atom".to_string(),
            });
        }
        if lattice.template.atoms.iter().any(|a| !(a.mass > 0.0)) {
            return Err(ConfigError::InvalidParameter {
                name: "template",
                reason: "atom masses must be positive".to_string(),
            });
        }
        let timestep = self.timestep.ok_or(ConfigError::MissingParameter("timestep"))?;
        if !(timestep.is_finite() && timestep > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "timestep",
                reason: format!("must be positive, got {timestep}"),
            });
        }
        Ok(SimulationConfig {
            adress: self.adress.ok_or(ConfigError::MissingParameter("adress"))?,
            lattice,
            forcefield_path: self
                .forcefield_path
                .ok_or(ConfigError::MissingParameter("forcefield_path"))?,
            fec_path: self.fec_path,
            timestep,
            steps: self.steps.ok_or(ConfigError::MissingParameter("steps"))?,
            thermo_interval: self.thermo_interval.unwrap_or(1).max(1),
            density_bins: self.density_bins.unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> AdressConfigBuilder {
        AdressConfigBuilder::new().cutoff(2.5).skin(0.3).r_ex(1.0).r_hy(0.5)
    }

    #[test]
    fn build_applies_defaults() {
        let config = base().center(Point3::origin()).build().unwrap();
        assert_eq!(config.region_updates, 1);
        assert_eq!(config.scheme, Scheme::Energy);
        assert_eq!(config.geometry, RegionGeometry::Spherical);
        assert_eq!(config.center, RegionCenter::Fixed(Point3::origin()));
        assert!((config.list_range() - 2.8).abs() < 1e-12);
    }

    #[test]
    fn build_reports_missing_parameters() {
        let result = AdressConfigBuilder::new().skin(0.3).r_ex(1.0).r_hy(0.5).build();
        assert_eq!(result, Err(ConfigError::MissingParameter("cutoff")));
    }

    #[test]
    fn build_rejects_fixed_center_with_markers() {
        let result = base().center(Point3::origin()).marker(ParticleId(4)).build();
        assert_eq!(result, Err(ConfigError::FixedCenterWithMarkers));
    }

    #[test]
    fn build_without_center_follows_markers() {
        let config = base().marker_ids([ParticleId(1), ParticleId(2)]).build().unwrap();
        assert!(config.center.is_moving());
    }

    #[test]
    fn build_rejects_zero_region_updates() {
        assert!(matches!(
            base().region_updates(0).build(),
            Err(ConfigError::InvalidParameter { name: "region_updates", .. })
        ));
    }

    #[test]
    fn build_propagates_weight_errors() {
        assert!(matches!(
            base().r_hy(-1.0).build(),
            Err(ConfigError::Weight(WeightError::InvalidHybridWidth(_)))
        ));
    }

    #[test]
    fn pair_weight_depends_on_scheme() {
        assert_eq!(Scheme::Force.pair_weight(0.5, 0.5), 0.25);
        assert_eq!(Scheme::Energy.pair_weight(0.5, 1.0), 0.75);
        assert!(Scheme::Energy.has_drift_term());
        assert!(!Scheme::Force.has_drift_term());
    }

    #[test]
    fn simulation_builder_requires_a_template() {
        let adress = base().center(Point3::origin()).build().unwrap();
        let result = SimulationConfigBuilder::new()
            .adress(adress)
            .molecules_per_side(2)
            .spacing(1.0)
            .forcefield_path(PathBuf::from("ff.toml"))
            .timestep(0.001)
            .steps(10)
            .build();
        assert_eq!(result, Err(ConfigError::MissingParameter("template")));
    }

    #[test]
    fn scheme_names_parse_with_their_aliases() {
        assert_eq!("H-AdResS".parse::<Scheme>(), Ok(Scheme::Energy));
        assert_eq!("force".parse::<Scheme>(), Ok(Scheme::Force));
        let err = "quantum".parse::<Scheme>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown blending scheme 'quantum'");
    }
}
