use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "Tony Kan, Ted Yu, William A. Goddard III, Victor Wai Tak Kam",
    version,
    about = "AdResS++ CLI - Adaptive resolution molecular dynamics: atomistic detail where it matters, coarse-grained beads everywhere else.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for parallel computation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an adaptive resolution simulation of a molecular lattice.
    Run(RunArgs),
    /// Tabulate the resolution weight across the hybrid shell.
    Weight(WeightArgs),
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    // --- Core Arguments ---
    /// Path to the simulation configuration file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    /// Path for the thermodynamic records (CSV).
    #[arg(short, long, default_value = "thermo.csv", value_name = "PATH")]
    pub output: PathBuf,

    /// Number of in-process ranks the system is decomposed over.
    #[arg(long, default_value_t = 1, value_name = "NUM")]
    pub ranks: usize,

    // --- Overrides ---
    /// Override the number of integration steps.
    #[arg(long, value_name = "INT")]
    pub steps: Option<usize>,

    /// Override the pair potential file.
    #[arg(long, value_name = "PATH")]
    pub forcefield: Option<PathBuf>,

    /// Override the blending scheme ('force' or 'energy').
    #[arg(long, value_name = "SCHEME")]
    pub scheme: Option<String>,

    /// Sample the density profile around the region and write it here (CSV).
    /// Bins are set with `run.density-bins` (default 50).
    #[arg(long, value_name = "PATH")]
    pub density: Option<PathBuf>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S adress.r-hy=1.5
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `weight` subcommand.
#[derive(Args, Debug)]
pub struct WeightArgs {
    /// Radius of the fully atomistic region.
    #[arg(long, required = true, value_name = "FLOAT")]
    pub r_ex: f64,

    /// Width of the hybrid shell.
    #[arg(long, required = true, value_name = "FLOAT")]
    pub r_hy: f64,

    /// Number of sample points between zero and the tabulated extent.
    #[arg(short, long, default_value_t = 50, value_name = "INT")]
    pub points: usize,

    /// Largest tabulated distance. Defaults to 1.25 times the outer radius.
    #[arg(long, value_name = "FLOAT")]
    pub max_distance: Option<f64>,

    /// Write the table to a CSV file instead of standard output.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}
