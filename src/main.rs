//! Celltune CLI - Run a model tuning job from JSON configuration.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use celltune::{
    compute::{CellModel, NativeRunner, TuningEngine},
    schema::TuningConfig,
};

/// A complete tuning job: the base model plus the tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TuningSpec {
    model: CellModel,
    tuning: TuningConfig,
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <spec.json> [report.json]", args[0]);
        eprintln!();
        eprintln!("Tune a cell model against target electrophysiological features.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  spec.json    Path to the tuning job (model + tuning sections)");
        eprintln!("  report.json  Where to write the report (default: spec path with");
        eprintln!("               extension 'report.json')");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_spec();
        return;
    }

    let spec_path = PathBuf::from(&args[1]);
    let report_path = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(|| spec_path.with_extension("report.json"));

    let spec_str = fs::read_to_string(&spec_path).unwrap_or_else(|e| {
        eprintln!("Error reading spec file: {}", e);
        std::process::exit(1);
    });

    let spec: TuningSpec = serde_json::from_str(&spec_str).unwrap_or_else(|e| {
        eprintln!("Error parsing spec: {}", e);
        std::process::exit(1);
    });

    let base_model = spec.model.clone();
    let mut engine = TuningEngine::from_parts(spec.model, spec.tuning, NativeRunner)
        .unwrap_or_else(|e| {
            eprintln!("Invalid tuning configuration: {}", e);
            std::process::exit(1);
        });

    println!("Celltune");
    println!("========");
    println!();
    println!("Running search...");

    let report = engine.run();

    println!();
    println!("Best candidate (fitness {:.6}):", report.best_fitness);
    for (path, value) in &report.best_values {
        println!("  {} = {:.6}", path, value);
    }
    println!();
    println!("Target breakdown:");
    for score in &report.breakdown {
        match score.measured {
            Some(measured) => println!(
                "  {} {}: measured {:.4}, target {:.4}, error {:.4}",
                score.location, score.feature, measured, score.target, score.error
            ),
            None => println!(
                "  {} {}: not measurable, error {:.4}",
                score.location, score.feature, score.error
            ),
        }
    }
    println!();
    println!(
        "{} generations, {} evaluations ({} failed), {:.2}s, stop: {:?}",
        report.generations,
        report.total_evaluations,
        report.failed_simulations,
        report.elapsed_seconds,
        report.stop_reason
    );
    println!("Seed: {}", report.seed);

    let json = serde_json::to_string_pretty(&report).unwrap_or_else(|e| {
        eprintln!("Error serializing report: {}", e);
        std::process::exit(1);
    });
    if let Err(e) = fs::write(&report_path, json) {
        eprintln!("Error writing report to {}: {}", report_path.display(), e);
        std::process::exit(1);
    }
    println!("Report written to {}", report_path.display());

    // Re-materialize the model with the best parameters substituted, next
    // to the report.
    let mut tuned = base_model;
    for (path, &value) in &report.best_values {
        if let Err(e) = tuned.set_parameter(path, value) {
            eprintln!("Error applying best value for {}: {}", path, e);
            std::process::exit(1);
        }
    }
    let tuned_path = report_path.with_extension("fit.json");
    match serde_json::to_string_pretty(&tuned) {
        Ok(json) => {
            if let Err(e) = fs::write(&tuned_path, json) {
                eprintln!("Error writing tuned model to {}: {}", tuned_path.display(), e);
                std::process::exit(1);
            }
            println!("Tuned model written to {}", tuned_path.display());
        }
        Err(e) => {
            eprintln!("Error serializing tuned model: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_example_spec() {
    let spec_str = include_str!("../demos/hh_tuning.json");
    let spec: TuningSpec = serde_json::from_str(spec_str).expect("bundled example is valid");
    println!("Example tuning job (spec.json):");
    println!("{}", serde_json::to_string_pretty(&spec).unwrap());
}

#[cfg(test)]
mod tests {
    use super::*;
    use celltune::schema::TuningReport;

    #[test]
    fn bundled_example_parses_and_validates() {
        let spec: TuningSpec =
            serde_json::from_str(include_str!("../demos/hh_tuning.json")).unwrap();
        spec.tuning.validate().unwrap();
        assert_eq!(spec.model.voltage_trace_key(), "pop0[0]/v");
        // Every parameter path resolves against the bundled model.
        for param in &spec.tuning.parameters {
            spec.model.get_parameter(&param.path).unwrap();
        }
    }

    #[test]
    fn report_file_roundtrips() {
        let spec: TuningSpec =
            serde_json::from_str(include_str!("../demos/hh_tuning.json")).unwrap();
        let mut tuning = spec.tuning;
        tuning.search.population_size = 4;
        tuning.search.max_evaluations = 4;
        tuning.search.seed = Some(7);
        tuning.simulation.duration_ms = 100.0;
        // Keep conductances in the integrator's stable range so the report
        // holds finite fitness values.
        tuning.parameters[0].min = 60.0;
        tuning.parameters[0].max = 200.0;
        tuning.parameters[1].min = 10.0;
        tuning.parameters[1].max = 60.0;
        let mut engine = TuningEngine::from_parts(spec.model, tuning, NativeRunner).unwrap();
        let report = engine.run();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        fs::write(&path, serde_json::to_string_pretty(&report).unwrap()).unwrap();
        let parsed: TuningReport =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.best_values, report.best_values);
        assert_eq!(parsed.seed, report.seed);
    }
}
