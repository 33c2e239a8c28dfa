//! Formwright - verification-driven activity builder CLI
//!
//! ## Commands
//!
//! - `simulate`: Build activity specs against the in-memory surface, with optional fault injection
//! - `check-config`: Load, override and validate a config, then print the effective values
//! - `show-report`: Print a stored run report after checking its digest

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use formwright_core::{
    read_run_report, render_run_summary, write_run_report, ActivitySpec, ActivityStatus,
    BuildConfig, BuildController,
};
use formwright_surface::{FaultScript, SimulatedCatalog, SimulatedSurface};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

const DEFAULT_REPORT_DIR: &str = ".formwright/runs";

#[derive(Parser)]
#[command(name = "formwright")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Verification-driven activity builder", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build specs against the simulated surface
    ///
    /// Drop numbers count palette drops across the whole run, starting at 1.
    Simulate {
        /// Spec files (JSON: one activity or an array of activities)
        #[arg(short, long = "spec", required = true)]
        specs: Vec<PathBuf>,

        /// Config file (TOML)
        #[arg(short, long, env = "FORMWRIGHT_CONFIG")]
        config: Option<PathBuf>,

        /// Directory for run reports
        #[arg(long, default_value = DEFAULT_REPORT_DIR)]
        report_dir: PathBuf,

        /// Render the Nth drop late
        #[arg(long)]
        lag_drop: Vec<u32>,

        /// Delay for lagged drops, in milliseconds
        #[arg(long, default_value = "2500")]
        lag_ms: u64,

        /// Discard the Nth drop without rendering anything
        #[arg(long)]
        silent_drop: Vec<u32>,

        /// Render the Nth drop twice
        #[arg(long)]
        duplicate_drop: Vec<u32>,

        /// Ignore the first N section selections
        #[arg(long, default_value = "0")]
        ignore_selects: u32,

        /// Bind the properties panel to a neighbouring field on the first N field clicks
        #[arg(long, default_value = "0")]
        misbind_clicks: u32,

        /// Refuse shell creation for this activity code
        #[arg(long)]
        fail_shell: Vec<String>,
    },

    /// Print the effective configuration
    CheckConfig {
        /// Config file (TOML)
        #[arg(short, long, env = "FORMWRIGHT_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Print a stored run report
    ShowReport {
        /// Run ID
        #[arg(long)]
        run: String,

        /// Directory holding run reports
        #[arg(long, default_value = DEFAULT_REPORT_DIR)]
        report_dir: PathBuf,
    },
}

struct FaultArgs {
    lag_drop: Vec<u32>,
    lag_ms: u64,
    silent_drop: Vec<u32>,
    duplicate_drop: Vec<u32>,
    ignore_selects: u32,
    misbind_clicks: u32,
}

impl FaultArgs {
    fn script(&self) -> FaultScript {
        let lag = Duration::from_millis(self.lag_ms);
        let script = self
            .lag_drop
            .iter()
            .fold(FaultScript::new(), |s, n| s.lag_drop(*n, lag));
        let script = self.silent_drop.iter().fold(script, |s, n| s.silent_drop(*n));
        let script = self
            .duplicate_drop
            .iter()
            .fold(script, |s, n| s.duplicate_drop(*n));
        script
            .ignore_selects(self.ignore_selects)
            .misbind_clicks(self.misbind_clicks)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    formwright_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Simulate {
            specs,
            config,
            report_dir,
            lag_drop,
            lag_ms,
            silent_drop,
            duplicate_drop,
            ignore_selects,
            misbind_clicks,
            fail_shell,
        } => {
            let faults = FaultArgs {
                lag_drop,
                lag_ms,
                silent_drop,
                duplicate_drop,
                ignore_selects,
                misbind_clicks,
            };
            cmd_simulate(&specs, config.as_deref(), &report_dir, &faults, &fail_shell).await
        }
        Commands::CheckConfig { config } => cmd_check_config(config.as_deref()),
        Commands::ShowReport { run, report_dir } => cmd_show_report(&run, &report_dir),
    }
}

/// Read spec files in order. Each holds one activity or an array of them.
fn load_specs(paths: &[PathBuf]) -> Result<Vec<ActivitySpec>> {
    let mut specs = Vec::new();
    for path in paths {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read spec {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse spec {} as JSON", path.display()))?;
        if value.is_array() {
            let many: Vec<ActivitySpec> = serde_json::from_value(value)
                .with_context(|| format!("Invalid activity list in {}", path.display()))?;
            specs.extend(many);
        } else {
            let one: ActivitySpec = serde_json::from_value(value)
                .with_context(|| format!("Invalid activity in {}", path.display()))?;
            specs.push(one);
        }
    }
    Ok(specs)
}

async fn cmd_simulate(
    spec_paths: &[PathBuf],
    config_path: Option<&Path>,
    report_dir: &Path,
    faults: &FaultArgs,
    fail_shell: &[String],
) -> Result<()> {
    let config = BuildConfig::load(config_path).context("Failed to load config")?;
    let specs = load_specs(spec_paths)?;

    let surface = Arc::new(SimulatedSurface::with_faults(faults.script()));
    let catalog = fail_shell
        .iter()
        .fold(SimulatedCatalog::new(surface.clone()), |c, code| c.refuse_shell(code));
    let controller = BuildController::new(surface.clone(), Arc::new(catalog), config);

    let report = controller
        .run(&specs)
        .await
        .context("Build run could not start")?;
    let path = write_run_report(&report, report_dir).context("Failed to write run report")?;
    info!(run_id = %report.run_id, path = %path.display(), "run report written");

    print!("{}", render_run_summary(&report));
    println!("report: {}", path.display());

    let failed = report.count(ActivityStatus::Failed);
    if failed > 0 {
        bail!("{failed} of {} activities failed", report.activities.len());
    }
    Ok(())
}

fn cmd_check_config(config_path: Option<&Path>) -> Result<()> {
    let config = BuildConfig::load(config_path).context("Invalid configuration")?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}

fn cmd_show_report(run_id: &str, report_dir: &Path) -> Result<()> {
    let report = read_run_report(run_id, report_dir)
        .with_context(|| format!("Failed to read report for run {run_id}"))?;
    print!("{}", render_run_summary(&report));
    Ok(())
}
