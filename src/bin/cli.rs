use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;

use bayundb_semijoin::catalog::Catalog;
use bayundb_semijoin::query::planner::{OptimizerConfig, SemiJoinOptimizer};
use bayundb_semijoin::query::statement::Statement;

#[derive(Parser)]
#[command(author, version, about = "sjexplain - show how BayunDB plans the subqueries of a statement")]
struct Cli {
    /// JSON file holding the catalog, the statement and an optional config
    input: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Include the optimizer trace
    #[arg(short, long)]
    trace: bool,

    /// Optimizer switch override, e.g. `firstmatch=off`
    #[arg(short, long = "switch", value_name = "NAME=on|off")]
    switches: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Deserialize)]
struct Input {
    catalog: Catalog,
    statement: Statement,
    #[serde(default)]
    config: OptimizerConfig,
}

fn apply_switch(config: &mut OptimizerConfig, switch: &str) -> Result<()> {
    let (name, value) = switch
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid switch '{}', expected NAME=on|off", switch))?;
    let on = match value {
        "on" => true,
        "off" => false,
        other => bail!("Invalid value '{}' for switch '{}'", other, name),
    };
    match name {
        "semijoin" => config.semijoin = on,
        "firstmatch" => config.firstmatch = on,
        "loosescan" => config.loosescan = on,
        "materialization" => config.materialization = on,
        "in_to_exists" => config.in_to_exists = on,
        "semijoin_with_cache" => config.semijoin_with_cache = on,
        "prune_search" => config.prune_search = on,
        other => bail!("Unknown optimizer switch '{}'", other),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let text = fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;
    let mut input: Input = serde_json::from_str(&text).context("Failed to parse input")?;
    input.catalog.validate().context("Invalid catalog")?;

    let mut config = input.config;
    for switch in &cli.switches {
        apply_switch(&mut config, switch)?;
    }
    config.trace |= cli.trace;

    let optimizer = SemiJoinOptimizer::new(&input.catalog, config);
    let optimized = optimizer.optimize(&mut input.statement).context("Optimization failed")?;

    match cli.format {
        OutputFormat::Text => {
            println!("{}", optimized);
            if cli.trace {
                println!("{}", serde_json::to_string_pretty(&optimized.trace.to_json())?);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&optimized.to_json())?),
    }
    Ok(())
}
