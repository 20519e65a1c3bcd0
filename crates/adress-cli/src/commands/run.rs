use crate::cli::RunArgs;
use crate::config::PartialSimulationConfig;
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use adresspp::core::partition::comm::{CommError, Communicator, SerialComm, ThreadComm};
use adresspp::engine::config::SimulationConfig;
use adresspp::engine::error::EngineError;
use adresspp::engine::progress::ProgressReporter;
use adresspp::workflows::simulate::{self, SimulationResult};
use serde::Serialize;
use std::path::Path;
use tracing::{info, info_span, warn};

pub fn run(args: RunArgs, show_progress: bool) -> Result<()> {
    if args.ranks == 0 {
        return Err(CliError::Argument("--ranks must be at least 1".to_string()));
    }

    let partial_config = PartialSimulationConfig::from_file(&args.config)?;
    info!("Merging configuration from file and CLI arguments...");
    let config = partial_config.merge_with_cli(&args)?;

    let progress_handler = if show_progress {
        CliProgressHandler::new()
    } else {
        CliProgressHandler::hidden()
    };
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!(
        "Starting adaptive resolution run: {} steps on {} rank(s)...",
        config.steps, args.ranks
    );
    let result = run_ranks(&config, args.ranks, &reporter)?;

    write_rows(&args.output, &result.records)?;
    info!(
        "Wrote {} thermodynamic record(s) to {:?}",
        result.records.len(),
        &args.output
    );

    if let (Some(path), Some(profile)) = (&args.density, &result.density) {
        write_rows(path, profile)?;
        info!("Wrote a {}-bin density profile to {:?}", profile.len(), path);
    }

    match result.records.last() {
        Some(last) => println!(
            "✓ Run complete: E_total = {:.6}, T = {:.4}, {} rebuild(s). Records written to: {}",
            last.total,
            last.temperature,
            result.rebuilds,
            args.output.display()
        ),
        None => warn!("Run finished without producing any thermodynamic record."),
    }
    Ok(())
}

/// Runs one simulation per rank, each on its own thread, and returns rank 0's
/// result. Only rank 0 reports progress.
fn run_ranks(
    config: &SimulationConfig,
    ranks: usize,
    reporter: &ProgressReporter,
) -> Result<SimulationResult> {
    if ranks == 1 {
        return Ok(simulate::run(config, Box::new(SerialComm), reporter)?);
    }

    let outcomes: Vec<std::thread::Result<Result<SimulationResult>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = ThreadComm::group(ranks)
            .into_iter()
            .map(|comm| {
                let rank = comm.rank();
                std::thread::Builder::new()
                    .name(format!("rank-{rank}"))
                    .spawn_scoped(scope, move || -> Result<SimulationResult> {
                        let _span = info_span!("rank", rank).entered();
                        let silent = ProgressReporter::new();
                        let reporter = if rank == 0 { reporter } else { &silent };
                        Ok(simulate::run(config, Box::new(comm), reporter)?)
                    })
            })
            .collect::<std::io::Result<_>>()?;
        Ok::<_, CliError>(handles.into_iter().map(|handle| handle.join()).collect())
    })?;

    // Ranks released by an abort report `Aborted`; the failing rank carries the
    // actual cause.
    let mut primary = None;
    let mut cause = None;
    let mut aborted = None;
    for (rank, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(Ok(result)) if rank == 0 => primary = Some(result),
            Ok(Ok(_)) => {}
            Ok(Err(err)) if is_abort(&err) => {
                aborted.get_or_insert(err);
            }
            Ok(Err(err)) => {
                warn!(rank, "Rank failed: {}", err);
                cause.get_or_insert(err);
            }
            Err(_) => {
                cause.get_or_insert(CliError::Other(anyhow::anyhow!(
                    "Rank {} panicked during the run",
                    rank
                )));
            }
        }
    }
    if let Some(err) = cause.or(aborted) {
        return Err(err);
    }
    primary.ok_or_else(|| CliError::Other(anyhow::anyhow!("Rank 0 produced no result")))
}

fn is_abort(err: &CliError) -> bool {
    matches!(
        err,
        CliError::AdressCore(EngineError::Comm {
            source: CommError::Aborted
        })
    )
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let to_error = |source| CliError::Output {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(to_error)?;
    for row in rows {
        writer.serialize(row).map_err(to_error)?;
    }
    writer.flush()?;
    Ok(())
}
