use evogfuzz_core::config::EvoGFuzzConfig;
use evogfuzz_core::corpus::export_corpus;
use evogfuzz_core::engine::EvoGFuzz;
use evogfuzz_core::executor::CommandExecutor;

use anyhow::Context;
use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// JSON grammar file.
    #[clap(short, long)]
    grammar: Option<PathBuf>,
    /// Seed input; may be repeated.
    #[clap(long = "input")]
    inputs: Vec<String>,
    /// Program under test, split on whitespace.
    #[clap(long)]
    target_command: Option<String>,
    #[clap(short, long)]
    iterations: Option<usize>,
    #[clap(short, long)]
    seed: Option<u64>,
    #[clap(short, long)]
    output_dir: Option<PathBuf>,
    #[clap(short, long)]
    verbose: bool,
}

fn load_config(config_file: Option<&Path>) -> Result<EvoGFuzzConfig, anyhow::Error> {
    match config_file {
        Some(config_path) => {
            info!(?config_path, "Loading configuration");
            EvoGFuzzConfig::load_from_file(config_path)
        }
        None => {
            let default_config_path = PathBuf::from("evogfuzz.toml");
            if default_config_path.exists() {
                info!(?default_config_path, "No config file specified, loading default");
                EvoGFuzzConfig::load_from_file(&default_config_path)
            } else {
                info!("No config file specified and 'evogfuzz.toml' not found, using built-in defaults");
                Ok(EvoGFuzzConfig::default())
            }
        }
    }
}

fn apply_overrides(config: &mut EvoGFuzzConfig, cli: &Cli) {
    if let Some(grammar) = &cli.grammar {
        config.grammar.path = Some(grammar.clone());
    }
    if let Some(target_cmd_str) = &cli.target_command {
        config.executor.command = target_cmd_str.split_whitespace().map(str::to_string).collect();
    }
    if let Some(iterations) = cli.iterations {
        config.fuzzer.iterations = iterations;
    }
    if let Some(seed) = cli.seed {
        config.fuzzer.seed = seed;
    }
    if let Some(output_dir) = &cli.output_dir {
        config.output.dir = Some(output_dir.clone());
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), anyhow::Error> {
    let file = File::create(path).with_context(|| format!("Failed to create {path:?}"))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .with_context(|| format!("Failed to write JSON to {path:?}"))
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    let mut config = load_config(cli.config_file.as_deref())?;
    apply_overrides(&mut config, &cli);
    config.fuzzer.validate().context("Invalid fuzzer settings")?;
    tracing::debug!(?config, "Effective configuration");

    let executor_config = config
        .executor
        .to_executor_config()
        .context("A target command is required (--target-command or [executor] command)")?;
    let executor = CommandExecutor::new(executor_config);

    let mut fuzzer = EvoGFuzz::from_config(&config, executor, &cli.inputs)
        .context("Failed to set up the fuzzer")?;

    let start_time = Instant::now();
    let failing = fuzzer.fuzz()?;
    let elapsed_total = start_time.elapsed();

    let stats = fuzzer.stats();
    println!("Fuzzing finished in {elapsed_total:.2?} ({}).", fuzzer.state());
    println!(
        "Generations: {}, Executions: {}, Inputs: {}, Failing: {}, Undefined: {}",
        stats.generation + 1,
        stats.executions,
        fuzzer.get_all_inputs().len(),
        failing.len(),
        stats.undefined
    );
    for report in fuzzer.bug_reports() {
        println!(
            "  [gen {:>3}] {} {:?}",
            report.iteration, report.input_hash, report.input
        );
    }

    if let Some(dir) = &config.output.dir {
        let written = export_corpus(fuzzer.corpus(), fuzzer.failing_ids(), dir)
            .with_context(|| format!("Failed to export corpus to {dir:?}"))?;
        write_json(&dir.join("learned_grammar.json"), fuzzer.learned_grammar())?;
        write_json(&dir.join("bug_reports.json"), &fuzzer.bug_reports())?;
        info!(?dir, inputs = written, "Results exported");
    } else if !failing.is_empty() {
        warn!("No output directory configured, failing inputs were not saved");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_values() {
        let cli = Cli::parse_from([
            "evogfuzz",
            "--grammar",
            "calc.json",
            "--input",
            "sqrt(1)",
            "--input",
            "cos(2)",
            "--target-command",
            "./calc --strict",
            "--iterations",
            "4",
            "--seed",
            "9",
        ]);
        let mut config = EvoGFuzzConfig::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(cli.inputs, vec!["sqrt(1)", "cos(2)"]);
        assert_eq!(config.grammar.path, Some(PathBuf::from("calc.json")));
        assert_eq!(config.executor.command, vec!["./calc", "--strict"]);
        assert_eq!(config.fuzzer.iterations, 4);
        assert_eq!(config.fuzzer.seed, 9);
        assert_eq!(config.output.dir, None);
    }
}
