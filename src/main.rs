use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use fis_loadgen::cli::config::{Config, TargetConfig};
use fis_loadgen::cli::init::{run_init, Preset};
use fis_loadgen::cli::validate::run_validate;
use fis_loadgen::cli::{Cli, Commands};
use fis_loadgen::engine::http_client::HttpClient;
use fis_loadgen::engine::{connection_pool_size, Engine};
use fis_loadgen::stats::RunReport;

/// Exit code when the run finished but a threshold failed.
const EXIT_THRESHOLDS_FAILED: u8 = 99;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run {
            config,
            preset,
            json,
            export_json,
        } => run(config, preset, json, export_json),
        Commands::Init { preset, output } => {
            run_init(preset, output.as_deref()).map(|_| ExitCode::SUCCESS)
        }
        Commands::Validate { config } => run_validate(&config).map(|_| ExitCode::SUCCESS),
        Commands::Schema { output } => schema(output).map(|_| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(
    config: Option<PathBuf>,
    preset: Option<Preset>,
    json: bool,
    export_json: Option<PathBuf>,
) -> Result<ExitCode> {
    let config = match (config, preset) {
        (Some(path), _) => Config::load(&path)?,
        (None, Some(preset)) => preset.config(),
        (None, None) => anyhow::bail!("either a config file or --preset is required"),
    };

    let target = TargetConfig::from_env(config.target.as_ref())?;
    let plan = config.into_plan(target)?;
    tracing::info!(
        target_url = %plan.target.base_url,
        scenarios = plan.scenarios.len(),
        max_vus = plan.max_vus(),
        "starting run"
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let report = rt.block_on(async {
        let client = HttpClient::with_pool_and_workers(connection_pool_size(&plan), plan.max_vus())
            .context("failed to build HTTP client")?;
        let engine = Engine::new(plan, client);

        let control = engine.control();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping scenarios");
                control.stop();
            }
        });

        engine.run().await.map_err(anyhow::Error::from)
    })?;

    emit(&report, json, export_json)?;

    if report.passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_THRESHOLDS_FAILED))
    }
}

fn emit(report: &RunReport, json: bool, export_json: Option<PathBuf>) -> Result<()> {
    if json {
        println!("{}", report.to_json());
    } else {
        report.print_summary();
    }

    if let Some(path) = export_json {
        std::fs::write(&path, report.to_json())
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        println!("Report exported to {}", path.display());
    }
    Ok(())
}

fn schema(output: Option<PathBuf>) -> Result<()> {
    let schema = schemars::schema_for!(Config);
    let schema_json = serde_json::to_string_pretty(&schema)?;
    if let Some(out_path) = output {
        std::fs::write(&out_path, schema_json)?;
        println!("Schema written to {}", out_path.display());
    } else {
        println!("{}", schema_json);
    }
    Ok(())
}
