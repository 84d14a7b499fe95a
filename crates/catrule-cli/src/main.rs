use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use catrule_loader::LoadOptions;

#[derive(Parser)]
#[command(name = "catrule", about = "Category-engine rule matcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile every rule in a rule file and run its inline tests, without
    /// matching any external events.
    Validate {
        /// Path to a YAML or JSON rule file.
        rules: PathBuf,
        /// Skip running each rule's inline `tests`.
        #[arg(long)]
        no_tests: bool,
    },
    /// Compile a rule file and print a one-line summary per rule.
    Load {
        rules: PathBuf,
    },
    /// Compile a rule file, then match one JSON event (or a newline-
    /// delimited stream of events read from stdin) against it.
    Match {
        rules: PathBuf,
        /// A single JSON event. If omitted, events are read one per line
        /// from stdin.
        event: Option<String>,
    },
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

fn read_rules_file(path: &PathBuf) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { rules, no_tests } => run_validate(&rules, no_tests),
        Commands::Load { rules } => run_load(&rules),
        Commands::Match { rules, event } => run_match(&rules, event),
    }
}

fn run_validate(path: &PathBuf, no_tests: bool) -> Result<()> {
    let text = read_rules_file(path)?;
    let options = LoadOptions {
        run_tests: !no_tests,
        ..LoadOptions::default()
    };
    let report = catrule_loader::load_rules(&text, &options)?;

    for err in &report.errors {
        eprintln!("error: {err}");
    }
    for result in &report.results {
        let label = result
            .metadata
            .as_ref()
            .and_then(|m| m.name.clone())
            .unwrap_or_else(|| format!("rule #{}", result.rule_id));
        for test in &result.test_outcomes {
            let status = if test.passed { "ok" } else { "FAIL" };
            println!("[{status}] {label} :: {} (expected {}, got {})", test.name, test.expected, test.actual);
        }
    }

    if report.is_valid() {
        println!("{} rule(s) validated", report.results.len());
        Ok(())
    } else {
        anyhow::bail!("validation failed: {} compile error(s), test failures present", report.errors.len());
    }
}

fn run_load(path: &PathBuf) -> Result<()> {
    let text = read_rules_file(path)?;
    let report = catrule_loader::load_rules(&text, &LoadOptions::default())?;
    for err in &report.errors {
        eprintln!("error: {err}");
    }
    for result in &report.results {
        let label = result
            .metadata
            .as_ref()
            .and_then(|m| m.name.clone())
            .unwrap_or_else(|| format!("rule #{}", result.rule_id));
        println!("{} -> rule_id {}", label, result.rule_id);
    }
    if report.errors.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} rule(s) failed to compile", report.errors.len());
    }
}

fn run_match(path: &PathBuf, event: Option<String>) -> Result<()> {
    let text = read_rules_file(path)?;
    let options = LoadOptions {
        run_tests: false,
        ..LoadOptions::default()
    };
    let report = catrule_loader::load_rules(&text, &options)?;
    if !report.errors.is_empty() {
        for err in &report.errors {
            eprintln!("error: {err}");
        }
        anyhow::bail!("{} rule(s) failed to compile", report.errors.len());
    }

    let mut any_error = false;
    if let Some(raw) = event {
        match_one(&report.engine, &raw, &mut any_error);
    } else {
        let stdin = std::io::stdin();
        let mut line = String::new();
        let mut handle = stdin.lock();
        loop {
            line.clear();
            let n = handle.read_line(&mut line).context("reading event from stdin")?;
            if n == 0 {
                break;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match_one(&report.engine, trimmed, &mut any_error);
        }
    }

    if any_error {
        anyhow::bail!("one or more events failed to parse as JSON");
    }
    Ok(())
}

fn match_one(engine: &catrule_engine::Engine, raw: &str, any_error: &mut bool) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(event) => {
            let matched = engine.match_event(&event);
            let ids: Vec<String> = matched.iter().map(|id| id.to_string()).collect();
            println!("{}", ids.join(","));
        }
        Err(e) => {
            eprintln!("error: invalid JSON event: {e}");
            *any_error = true;
        }
    }
}

