use crate::cli::RunArgs;
use crate::error::{CliError, Result};
use adresspp::core::adress::region::RegionGeometry;
use adresspp::core::models::ids::ParticleId;
use adresspp::engine::config::{
    self as core_config, AdressConfigBuilder, MoleculeTemplate, Scheme, SimulationConfigBuilder,
    TemplateAtom,
};
use nalgebra::{Point3, Vector3};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

const DEFAULT_DENSITY_BINS: usize = 50;

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialAdressConfig {
    cutoff: Option<f64>,
    skin: Option<f64>,
    r_ex: Option<f64>,
    r_hy: Option<f64>,
    geometry: Option<String>,
    scheme: Option<String>,
    center: Option<[f64; 3]>,
    markers: Option<Vec<u64>>,
    region_updates: Option<usize>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialTemplateAtom {
    offset: [f64; 3],
    mass: f64,
    #[serde(default)]
    type_id: usize,
}

impl From<PartialTemplateAtom> for TemplateAtom {
    fn from(p: PartialTemplateAtom) -> Self {
        Self {
            offset: Vector3::from(p.offset),
            mass: p.mass,
            type_id: p.type_id,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialLatticeConfig {
    molecules_per_side: Option<usize>,
    spacing: Option<f64>,
    temperature: Option<f64>,
    seed: Option<u64>,
    cg_type: Option<usize>,
    atoms: Option<Vec<PartialTemplateAtom>>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialRunConfig {
    timestep: Option<f64>,
    steps: Option<usize>,
    thermo_interval: Option<usize>,
    density_bins: Option<usize>,
}

/// A simulation file as written by the user; every field may still be
/// supplied or overridden on the command line.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct PartialSimulationConfig {
    forcefield: Option<PathBuf>,
    fec: Option<PathBuf>,
    adress: Option<PartialAdressConfig>,
    lattice: Option<PartialLatticeConfig>,
    run: Option<PartialRunConfig>,
}

impl PartialSimulationConfig {
    /// Parses the file; relative data paths are taken relative to its directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        let mut partial: Self = toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        partial.forcefield = partial.forcefield.map(|p| base.join(p));
        partial.fec = partial.fec.map(|p| base.join(p));
        Ok(partial)
    }

    pub fn merge_with_cli(mut self, args: &RunArgs) -> Result<core_config::SimulationConfig> {
        self.apply_set_values(&args.set_values)?;

        let adress = self.adress.take().unwrap_or_default();
        let lattice = self.lattice.take().unwrap_or_default();
        let run = self.run.take().unwrap_or_default();

        let forcefield_path = args.forcefield.clone().or(self.forcefield).ok_or_else(|| {
            CliError::Config(
                "A value for 'forcefield' is required either in the config file or via CLI argument."
                    .to_string(),
            )
        })?;
        if !forcefield_path.exists() {
            return Err(CliError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Provided path does not exist: {}", forcefield_path.display()),
            )));
        }

        let file_scheme = adress.scheme.clone();
        let scheme = args.scheme.as_deref().or(file_scheme.as_deref());
        let adress_config = Self::merge_adress(adress, scheme)?;

        let atoms = lattice
            .atoms
            .ok_or_else(|| CliError::Config("`lattice.atoms` is required.".to_string()))?;
        let template = MoleculeTemplate {
            atoms: atoms.into_iter().map(Into::into).collect(),
            cg_type: lattice.cg_type.unwrap_or(0),
        };

        let mut builder = SimulationConfigBuilder::new()
            .adress(adress_config)
            .template(template)
            .forcefield_path(forcefield_path)
            .fec_path(self.fec)
            .thermo_interval(run.thermo_interval.unwrap_or(1))
            .density_bins(match args.density {
                Some(_) => run.density_bins.unwrap_or(DEFAULT_DENSITY_BINS),
                None => 0,
            });
        if let Some(n) = lattice.molecules_per_side {
            builder = builder.molecules_per_side(n);
        }
        if let Some(spacing) = lattice.spacing {
            builder = builder.spacing(spacing);
        }
        if let Some(temperature) = lattice.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(seed) = lattice.seed {
            builder = builder.seed(seed);
        }
        if let Some(dt) = run.timestep {
            builder = builder.timestep(dt);
        }
        if let Some(steps) = args.steps.or(run.steps) {
            builder = builder.steps(steps);
        }

        builder.build().map_err(|e| CliError::Config(e.to_string()))
    }

    fn merge_adress(
        partial: PartialAdressConfig,
        scheme: Option<&str>,
    ) -> Result<core_config::AdressConfig> {
        let mut builder = AdressConfigBuilder::new();
        if let Some(cutoff) = partial.cutoff {
            builder = builder.cutoff(cutoff);
        }
        if let Some(skin) = partial.skin {
            builder = builder.skin(skin);
        }
        if let Some(r_ex) = partial.r_ex {
            builder = builder.r_ex(r_ex);
        }
        if let Some(r_hy) = partial.r_hy {
            builder = builder.r_hy(r_hy);
        }
        if let Some(every) = partial.region_updates {
            builder = builder.region_updates(every);
        }
        if let Some(name) = partial.geometry {
            let geometry = RegionGeometry::from_str(&name).map_err(|e| CliError::Config(e.to_string()))?;
            builder = builder.geometry(geometry);
        }
        if let Some(name) = scheme {
            let scheme = Scheme::from_str(name).map_err(|e| CliError::Config(e.to_string()))?;
            builder = builder.scheme(scheme);
        }
        if let Some(center) = partial.center {
            builder = builder.center(Point3::from(center));
        }
        if let Some(ids) = partial.markers {
            builder = builder.marker_ids(ids.into_iter().map(ParticleId));
        }
        builder.build().map_err(|e| CliError::Config(e.to_string()))
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let Some((key, value_str)) = kv_pair.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            };

            match key {
                "adress.cutoff" => {
                    self.adress.get_or_insert_with(Default::default).cutoff = Some(parse_value(key, value_str)?);
                }
                "adress.skin" => {
                    self.adress.get_or_insert_with(Default::default).skin = Some(parse_value(key, value_str)?);
                }
                "adress.r-ex" => {
                    self.adress.get_or_insert_with(Default::default).r_ex = Some(parse_value(key, value_str)?);
                }
                "adress.r-hy" => {
                    self.adress.get_or_insert_with(Default::default).r_hy = Some(parse_value(key, value_str)?);
                }
                "adress.region-updates" => {
                    self.adress.get_or_insert_with(Default::default).region_updates =
                        Some(parse_value(key, value_str)?);
                }
                "adress.geometry" => {
                    self.adress.get_or_insert_with(Default::default).geometry = Some(value_str.to_string());
                }
                "adress.scheme" => {
                    self.adress.get_or_insert_with(Default::default).scheme = Some(value_str.to_string());
                }
                "lattice.molecules-per-side" => {
                    self.lattice
                        .get_or_insert_with(Default::default)
                        .molecules_per_side = Some(parse_value(key, value_str)?);
                }
                "lattice.spacing" => {
                    self.lattice.get_or_insert_with(Default::default).spacing =
                        Some(parse_value(key, value_str)?);
                }
                "lattice.temperature" => {
                    self.lattice.get_or_insert_with(Default::default).temperature =
                        Some(parse_value(key, value_str)?);
                }
                "lattice.seed" => {
                    self.lattice.get_or_insert_with(Default::default).seed =
                        Some(parse_value(key, value_str)?);
                }
                "run.timestep" => {
                    self.run.get_or_insert_with(Default::default).timestep =
                        Some(parse_value(key, value_str)?);
                }
                "run.steps" => {
                    self.run.get_or_insert_with(Default::default).steps =
                        Some(parse_value(key, value_str)?);
                }
                "run.thermo-interval" => {
                    self.run.get_or_insert_with(Default::default).thermo_interval =
                        Some(parse_value(key, value_str)?);
                }
                "run.density-bins" => {
                    self.run.get_or_insert_with(Default::default).density_bins =
                        Some(parse_value(key, value_str)?);
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, value_str: &str) -> Result<T> {
    value_str.parse().map_err(|_| {
        CliError::Config(format!(
            "Invalid {} value for {}: {}",
            std::any::type_name::<T>(),
            key,
            value_str
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use adresspp::core::adress::region::RegionCenter;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    const CONFIG: &str = r#"
        forcefield = "forcefield.toml"

        [adress]
        cutoff = 1.2
        skin = 0.3
        r-ex = 1.0
        r-hy = 1.0
        geometry = "slab"
        center = [3.0, 3.0, 3.0]

        [lattice]
        molecules-per-side = 3
        spacing = 2.0
        temperature = 0.5
        seed = 11

        [[lattice.atoms]]
        offset = [-0.25, 0.0, 0.0]
        mass = 1.0

        [[lattice.atoms]]
        offset = [0.25, 0.0, 0.0]
        mass = 2.0
        type-id = 1

        [run]
        timestep = 0.002
        steps = 100
        thermo-interval = 10
    "#;

    fn base_run_args(config: PathBuf) -> RunArgs {
        RunArgs {
            config,
            output: PathBuf::from("thermo.csv"),
            ranks: 1,
            steps: None,
            forcefield: None,
            scheme: None,
            density: None,
            set_values: Vec::new(),
        }
    }

    fn write_config(content: &str) -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("forcefield.toml"), "").unwrap();
        let path = dir.path().join("sim.toml");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn file_values_build_a_simulation_config() {
        let (dir, path) = write_config(CONFIG);
        let args = base_run_args(path.clone());
        let cfg = PartialSimulationConfig::from_file(&path)
            .unwrap()
            .merge_with_cli(&args)
            .expect("build ok");

        assert_eq!(cfg.forcefield_path, dir.path().join("forcefield.toml"));
        assert_eq!(cfg.adress.geometry, RegionGeometry::Slab);
        assert_eq!(cfg.adress.scheme, Scheme::Energy);
        assert_eq!(cfg.adress.center, RegionCenter::Fixed(Point3::new(3.0, 3.0, 3.0)));
        assert_eq!(cfg.lattice.template.atoms.len(), 2);
        assert_eq!(cfg.lattice.template.atoms[1].type_id, 1);
        assert_eq!(cfg.lattice.seed, 11);
        assert_eq!(cfg.steps, 100);
        assert_eq!(cfg.thermo_interval, 10);
    }

    #[test]
    fn cli_overrides_file_values() {
        let (_dir, path) = write_config(CONFIG);
        let mut args = base_run_args(path.clone());
        args.steps = Some(7);
        args.scheme = Some("force".to_string());

        let cfg = PartialSimulationConfig::from_file(&path)
            .unwrap()
            .merge_with_cli(&args)
            .expect("build ok");
        assert_eq!(cfg.steps, 7);
        assert_eq!(cfg.adress.scheme, Scheme::Force);
    }

    #[test]
    fn set_values_override() {
        let (_dir, path) = write_config(CONFIG);
        let mut args = base_run_args(path.clone());
        args.set_values = vec![
            "adress.r-hy=1.5".to_string(),
            "adress.region-updates=4".to_string(),
            "lattice.temperature=2.0".to_string(),
            "run.thermo-interval=3".to_string(),
        ];

        let cfg = PartialSimulationConfig::from_file(&path)
            .unwrap()
            .merge_with_cli(&args)
            .expect("build ok");
        assert!((cfg.adress.weight.r_hy() - 1.5).abs() < 1e-12);
        assert_eq!(cfg.adress.region_updates, 4);
        assert!((cfg.lattice.temperature - 2.0).abs() < 1e-12);
        assert_eq!(cfg.thermo_interval, 3);
    }

    #[test]
    fn density_bins_follow_the_density_output() {
        let (dir, path) = write_config(CONFIG);
        let load = |args: &RunArgs| {
            PartialSimulationConfig::from_file(&path)
                .unwrap()
                .merge_with_cli(args)
                .expect("build ok")
        };

        let mut args = base_run_args(path.clone());
        assert_eq!(load(&args).density_bins, 0);

        args.density = Some(dir.path().join("density.csv"));
        assert_eq!(load(&args).density_bins, DEFAULT_DENSITY_BINS);

        args.set_values = vec!["run.density-bins=8".to_string()];
        assert_eq!(load(&args).density_bins, 8);
    }

    #[test]
    fn malformed_set_values_are_rejected() {
        let (_dir, path) = write_config(CONFIG);
        for bad in ["adress.cutoff", "adress.cutoff=wide", "nonsense.key=1"] {
            let mut args = base_run_args(path.clone());
            args.set_values = vec![bad.to_string()];
            let result = PartialSimulationConfig::from_file(&path)
                .unwrap()
                .merge_with_cli(&args);
            assert!(matches!(result, Err(CliError::Config(_))), "{bad} accepted");
        }
    }

    #[test]
    fn markers_and_a_center_cannot_be_combined() {
        let content = CONFIG.replace("center = [3.0, 3.0, 3.0]", "center = [3.0, 3.0, 3.0]\nmarkers = [1]");
        let (_dir, path) = write_config(&content);
        let result = PartialSimulationConfig::from_file(&path)
            .unwrap()
            .merge_with_cli(&base_run_args(path.clone()));
        assert!(matches!(result, Err(CliError::Config(_))));
    }

    #[test]
    fn unknown_fields_fail_to_parse() {
        let content = CONFIG.replace("[run]", "[run]\nwarp = 9");
        let (_dir, path) = write_config(&content);
        assert!(matches!(
            PartialSimulationConfig::from_file(&path),
            Err(CliError::FileParsing { .. })
        ));
    }

    #[test]
    fn missing_forcefield_is_reported() {
        let (dir, path) = write_config(CONFIG);
        fs::remove_file(dir.path().join("forcefield.toml")).unwrap();
        let result = PartialSimulationConfig::from_file(&path)
            .unwrap()
            .merge_with_cli(&base_run_args(path.clone()));
        assert!(matches!(result, Err(CliError::Io(_))));
    }
}
