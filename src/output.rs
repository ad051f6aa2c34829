use crate::models::{Comparison, PhaseReport, PipelineResult};
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Print the run result in the specified format
pub fn print_result(result: &PipelineResult, comparison: Comparison, format: OutputFormat) {
    match format {
        OutputFormat::Plain => print_plain(result, comparison),
        OutputFormat::Json => print_json(result),
    }
}

fn format_optional(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{:.3}", value),
        None => "n/a".to_string(),
    }
}

/// Print the result in plain text format
fn print_plain(result: &PipelineResult, comparison: Comparison) {
    println!("Original score: {:.3}", result.baseline_score());
    println!("Trained score: {:.3}", result.trained_score());
    println!("Ratio (trained / original): {}", format_optional(result.ratio()));
    println!(
        "Comparison ({}): {}",
        match comparison {
            Comparison::TrainedScore => "trained score",
            Comparison::Ratio => "ratio",
        },
        format_optional(result.comparison(comparison))
    );
    println!();

    println!("📊 BASELINE");
    println!("-----------");
    print_phase_statistics(&result.baseline);
    println!();

    println!("📊 TRAINED");
    println!("----------");
    print_phase_statistics(&result.trained);
    println!();

    println!("📝 PER RECORD");
    println!("-------------");
    println!("{:<8} {:<10} {:<10}", "Record", "Before", "After");
    for (i, (before, after)) in result
        .baseline
        .per_record
        .iter()
        .zip(&result.trained.per_record)
        .enumerate()
    {
        println!("{:<8} {:<10.3} {:<10.3}", i + 1, before, after);
    }
}

/// Print per-scorer statistics in plain text format
fn print_phase_statistics(phase: &PhaseReport) {
    if phase.statistics.is_empty() {
        println!("No statistics available.");
        return;
    }

    println!("{:<16} {:<8} {:<8}", "Scorer", "Mean", "Median");
    println!("{}", "-".repeat(34));

    for stats in &phase.statistics {
        println!("{:<16} {:<8.3} {:<8.3}", stats.scorer, stats.mean, stats.median);
    }
}

/// Print the result in JSON format
fn print_json(result: &PipelineResult) {
    match serde_json::to_string_pretty(result) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing result to JSON: {}", e),
    }
}

/// Store the result to a JSON file, creating parent directories
pub fn store_result(result: &PipelineResult, path: &Path) -> Result<()> {
    let json_content =
        serde_json::to_string_pretty(result).context("Failed to serialize result to JSON")?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    std::fs::write(path, json_content)
        .with_context(|| format!("Failed to write result to: {}", path.display()))
}
