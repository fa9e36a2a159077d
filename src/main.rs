use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use vers_xml::{
    Cli, ConfigManager, EngineConfig, ExtractionEngine, ExtractionResults, FileDiscovery, Output,
    RuleSet, VerbosityLevel,
};

/// Some document could not be extracted
const EXIT_DOCUMENT_FAILED: u8 = 1;
/// The run itself failed
const EXIT_FATAL: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.verbosity());

    match run(&cli).await {
        Ok(results) if results.has_failures() => ExitCode::from(EXIT_DOCUMENT_FAILED),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Extraction aborted");
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn init_tracing(verbosity: VerbosityLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: &Cli) -> Result<ExtractionResults> {
    cli.validate().map_err(anyhow::Error::msg)?;

    let config = ConfigManager::load_config(cli)
        .await
        .context("Failed to load configuration")?;

    let rules = RuleSet::new(config.rules.clone())?;
    let discovery = FileDiscovery::from_config(&config.files)?;
    let engine = ExtractionEngine::new(rules, EngineConfig::from_config(&config))?;

    let results = engine
        .extract_path(&cli.path, &discovery)
        .await
        .with_context(|| format!("Extraction of {} failed", cli.path.display()))?;

    let verbosity = VerbosityLevel::from_flags(config.output.verbose, config.output.quiet);
    let report = Output::new(config.output.format, verbosity).format_results(&results)?;
    if !report.is_empty() {
        println!("{}", report.trim_end());
    }

    Ok(results)
}
