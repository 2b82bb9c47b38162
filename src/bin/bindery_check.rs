//! Load a directory of binding definitions and report what the registry
//! makes of them.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use bindery::datasource::{DataSource, DataSourceProvider, PgDataSource};
use bindery::definition::load_dir;
use bindery::{BinderyError, BindingRegistry, EngineConfig, LoadReport, SelectBuilder};

#[derive(Parser)]
#[command(name = "bindery_check")]
#[command(about = "Validate binding definitions and print generated SQL", long_about = None)]
struct Args {
    /// Directory of `*.toml` binding definitions.
    #[arg(long)]
    definitions: PathBuf,
    /// PostgreSQL connection string used for every data source. Without it,
    /// type probing and CASE-WHEN conversion are skipped.
    #[arg(long, env = "BINDERY_DATABASE_URL")]
    database_url: Option<String>,
    /// Engine configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the SELECT over all native items of this binding set.
    #[arg(long)]
    select: Option<String>,
}

/// Serves one connection for every data-source id.
struct SingleSource(Option<Arc<dyn DataSource>>);

impl DataSourceProvider for SingleSource {
    fn data_source(&self, id: &str) -> Result<Arc<dyn DataSource>, BinderyError> {
        self.0
            .clone()
            .ok_or_else(|| BinderyError::DataSource(format!("no connection for data source {id}")))
    }
}

fn print_report(report: &LoadReport) {
    println!("loaded {} binding set(s)", report.loaded.len());
    for name in &report.converted {
        println!("  converted to CASE-WHEN: {name}");
    }
    for (name, err) in &report.rejected {
        println!("  rejected {name} [{}]: {err}", err.kind());
    }
    for failure in &report.probe_failures {
        match &failure.item {
            Some(item) => println!(
                "  type probe failed for {}.{item}: {}",
                failure.binding_set, failure.error
            ),
            None => println!(
                "  type probe failed for {}: {}",
                failure.binding_set, failure.error
            ),
        }
    }
}

fn run(args: Args) -> Result<bool, BinderyError> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let provider = match &args.database_url {
        Some(url) => SingleSource(Some(Arc::new(PgDataSource::connect(url)?))),
        None => {
            config.probe_column_types = false;
            config.case_when_enabled = false;
            SingleSource(None)
        }
    };

    let defs = load_dir(&args.definitions)?;
    let mut registry = BindingRegistry::new(config);
    let report = registry.load(defs, &provider)?;
    print_report(&report);

    if let Some(name) = &args.select {
        println!("{}", SelectBuilder::new(&registry, name)?.build()?);
    }
    Ok(report.is_clean())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,bindery=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Args::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error [{}]: {e}", e.kind());
            ExitCode::from(2)
        }
    }
}
