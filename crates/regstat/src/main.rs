use std::ffi::OsStr;
use std::fs;
use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use regstat::cli::{Cli, Commands};
use regstat::commands::{run_curate, run_hierarchy, run_mapping, run_options, run_query};
use regstat::logging::init_tracing;
use regstat_config::{config_path, ensure_workspace_config, validate_config};
use regstat_engine::Engine;

fn main() -> Result<()> {
    let cli = parse_cli();
    run(cli)
}

fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn run(cli: Cli) -> Result<()> {
    fs::create_dir_all(&cli.workspace).with_context(|| {
        format!(
            "failed to create workspace directory {}",
            cli.workspace.display()
        )
    })?;
    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;

    let config = ensure_workspace_config(&workspace).with_context(|| {
        format!(
            "failed to load or create workspace config at {}",
            config_path(&workspace).display()
        )
    })?;
    init_tracing(
        &config.logging.level,
        cli.log_format.unwrap_or(config.logging.format),
    )?;
    for warning in validate_config(&config) {
        eprintln!(
            "regstat config warning [{}]: {}",
            warning.code, warning.message
        );
    }

    tracing::debug!(command = ?cli.command, "running command");
    let engine = Engine::with_config(&workspace, config).context("failed to open engine")?;
    let mut out = std::io::stdout().lock();

    match &cli.command {
        Commands::Init => {
            writeln!(out, "workspace {}", workspace.display())?;
            writeln!(out, "config {}", config_path(&workspace).display())?;
            writeln!(out, "database {}", engine.db_path().display())?;
            Ok(())
        }
        Commands::Query(args) => run_query(&engine, args, &mut out),
        Commands::Hierarchy(args) => run_hierarchy(&engine, args, &mut out),
        Commands::Options(args) => run_options(&engine, args, &mut out),
        Commands::Curate(args) => run_curate(&engine, args, &mut out),
        Commands::Mapping(command) => run_mapping(&engine, command, &mut out),
    }
}
