use crate::cli::WeightArgs;
use crate::error::{CliError, Result};
use adresspp::core::adress::weight::{WeightFunction, Zone};
use serde::Serialize;
use std::io::Write;
use tracing::info;

#[derive(Debug, Serialize)]
struct WeightSample {
    distance: f64,
    weight: f64,
    derivative: f64,
    zone: &'static str,
}

fn zone_name(zone: Zone) -> &'static str {
    match zone {
        Zone::Atomistic => "atomistic",
        Zone::Hybrid => "hybrid",
        Zone::Coarse => "coarse",
    }
}

fn tabulate(weight: &WeightFunction, max_distance: f64, points: usize) -> Vec<WeightSample> {
    let intervals = points.max(2) - 1;
    (0..=intervals)
        .map(|i| {
            let distance = max_distance * i as f64 / intervals as f64;
            let dist_sq = distance * distance;
            let (w, dw) = weight.evaluate(dist_sq);
            WeightSample {
                distance,
                weight: w,
                derivative: dw,
                zone: zone_name(weight.zone(dist_sq)),
            }
        })
        .collect()
}

pub fn run(args: WeightArgs) -> Result<()> {
    let weight = WeightFunction::new(args.r_ex, args.r_hy)
        .map_err(|e| CliError::Argument(e.to_string()))?;
    let max_distance = args
        .max_distance
        .unwrap_or(1.25 * (args.r_ex + args.r_hy));
    if !(max_distance.is_finite() && max_distance > 0.0) {
        return Err(CliError::Argument(format!(
            "--max-distance must be positive, got {}",
            max_distance
        )));
    }

    let samples = tabulate(&weight, max_distance, args.points);
    info!("Tabulated {} weight sample(s).", samples.len());

    let sink: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(std::fs::File::create(path)?),
        None => Box::new(std::io::stdout().lock()),
    };
    let mut writer = csv::Writer::from_writer(sink);
    for sample in &samples {
        writer
            .serialize(sample)
            .map_err(|e| CliError::Other(e.into()))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_spans_all_three_zones() {
        let weight = WeightFunction::new(1.0, 0.5).unwrap();
        let samples = tabulate(&weight, 2.0, 41);
        assert_eq!(samples.len(), 41);
        assert_eq!(samples[0].zone, "atomistic");
        assert_eq!(samples[0].weight, 1.0);
        assert_eq!(samples[25].zone, "hybrid");
        assert!((samples[25].weight - 0.5).abs() < 1e-12);
        assert_eq!(samples[40].zone, "coarse");
        assert_eq!(samples[40].weight, 0.0);
    }

    #[test]
    fn table_is_monotone_non_increasing() {
        let weight = WeightFunction::new(0.8, 1.3).unwrap();
        let samples = tabulate(&weight, 3.0, 200);
        assert!(samples.windows(2).all(|w| w[1].weight <= w[0].weight));
        assert!(samples.iter().all(|s| s.derivative <= 0.0));
    }

    #[test]
    fn csv_output_is_written_to_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weight.csv");
        run(WeightArgs {
            r_ex: 1.0,
            r_hy: 1.0,
            points: 5,
            max_distance: None,
            output: Some(path.clone()),
        })
        .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("distance,weight,derivative,zone"));
        assert_eq!(lines.count(), 5);
    }

    #[test]
    fn invalid_hybrid_width_is_an_argument_error() {
        let result = run(WeightArgs {
            r_ex: 1.0,
            r_hy: 0.0,
            points: 5,
            max_distance: None,
            output: None,
        });
        assert!(matches!(result, Err(CliError::Argument(_))));
    }
}
