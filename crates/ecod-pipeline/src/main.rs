//! ecod-batch - Main entry point

use anyhow::{bail, Context};
use clap::Parser;
use ecod_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use ecod_pipeline::commands::{self, run::RunOverrides};
use ecod_pipeline::{Cli, Commands, PipelineConfig};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    // A missing .env file is not an error
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return;
    }

    if cli.command.is_none() {
        eprintln!("Error: A subcommand is required");
        eprintln!();
        eprintln!("For more information, try '--help'.");
        process::exit(2);
    }

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Warn })
        .output(LogOutput::Console)
        .log_file_prefix("ecod-batch")
        .build();

    // Environment variables take precedence over the flag
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The CLI works without logging
    let _guard = init_logging(&log_config).ok().flatten();

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env().context("loading ECOD_* configuration")?;
    if let Some(root) = &cli.batch_root {
        config.batch_root = root.clone();
    }
    Ok(config)
}

async fn execute_command(cli: &Cli) -> anyhow::Result<()> {
    let Some(command) = &cli.command else {
        bail!("a subcommand is required");
    };

    if let Commands::Coverage { report, threshold } = command {
        commands::coverage::run(report, *threshold).await?;
        return Ok(());
    }

    let config = load_config(cli)?;

    match command {
        Commands::Create {
            name,
            release_date,
            chains,
            threshold,
            reference,
        } => {
            commands::create::run(
                &config,
                name.clone(),
                *release_date,
                chains,
                *threshold,
                reference.clone(),
            )
            .await?
        },

        Commands::Run {
            batch,
            scheduler,
            partition,
            poll_interval,
            wait_timeout,
            secondary_failure_policy,
        } => {
            let overrides = RunOverrides {
                scheduler: *scheduler,
                partition: partition.clone(),
                poll_interval: *poll_interval,
                wait_timeout: *wait_timeout,
                secondary_failure_policy: *secondary_failure_policy,
            };
            let outcome = commands::run::run(&config, batch, &overrides).await?;
            if !outcome.is_success() {
                bail!("workflow for {} stopped: {}", outcome.summary.batch_name, outcome.status);
            }
        },

        Commands::Status { batch, json } => commands::status::run(&config, batch, *json).await?,

        Commands::LoadClusters {
            batch,
            file,
            method,
            threshold,
        } => commands::clusters::run(&config, batch, file, *method, *threshold).await?,

        Commands::ImportStatus {
            batch,
            file,
            propagate,
        } => commands::reference::run(&config, batch, file, *propagate).await?,

        Commands::Propagate { batch } => commands::propagate::run(&config, batch).await?,

        Commands::Repair {
            name,
            sources,
            select,
            rerun_searches,
        } => commands::repair::run(&config, name, sources, *select, *rerun_searches).await?,

        Commands::Coverage { .. } => {},
    }

    Ok(())
}
