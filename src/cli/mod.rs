//! Command-line interface for trackscribe.
//!
//! Provides commands for transcribing a track or playlist, showing the
//! resolved configuration, and preparing the database schema.

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapters::SqliteStore;
use crate::config::{ConfigSet, LogLevel};
use crate::core::{Orchestrator, RunRequest};
use crate::domain::RunReport;

/// trackscribe - Download, transcribe and store audio from a track or playlist
#[derive(Parser, Debug)]
#[command(name = "trackscribe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ./trackscribe.yaml, then the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Track or playlist URL
    #[arg(long, env = "URL", global = true)]
    pub url: Option<String>,

    /// Treat the URL as a playlist (accepts true/false, 1/0, yes/no)
    #[arg(
        long,
        env = "IS_PLAYLIST",
        global = true,
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub is_playlist: Option<bool>,

    /// Database location (sqlite://path or sqlite::memory:)
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "LOG_LEVEL", value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Also write logs to this file
    #[arg(long, env = "LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// JSON log output
    #[arg(
        long,
        env = "PRODUCTION",
        global = true,
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub production: Option<bool>,

    /// Root for temporary audio and transcript files
    #[arg(long, env = "TMP_DIR", global = true)]
    pub tmp_dir: Option<PathBuf>,

    #[arg(long, env = "AUDIO_DIR", global = true)]
    pub audio_dir: Option<PathBuf>,

    #[arg(long, env = "TRANSCRIPT_DIR", global = true)]
    pub transcript_dir: Option<PathBuf>,

    /// Attempts per download and transcribe stage
    #[arg(long, env = "MAX_RETRIES", global = true)]
    pub max_retries: Option<u32>,

    /// Items processed concurrently
    #[arg(long, env = "WORKER_COUNT", global = true)]
    pub worker_count: Option<usize>,

    /// Reprocess items that already have a stored transcript
    #[arg(long, global = true)]
    pub force: bool,

    /// Exit non-zero when any item fails
    #[arg(long, global = true)]
    pub fail_on_partial: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe the configured URL
    Run {
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,

        /// Write the run report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show resolved configuration (debug)
    Config,

    /// Create the database schema
    Migrate,
}

impl Cli {
    /// Load the config file and apply command-line and environment overrides
    pub fn load_config(&self) -> Result<ConfigSet> {
        let mut config = ConfigSet::load(self.config.as_deref())?;
        self.apply_overrides(&mut config);
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut ConfigSet) {
        if let Some(url) = &self.url {
            config.url = Some(url.clone());
        }
        if let Some(is_playlist) = self.is_playlist {
            config.is_playlist = is_playlist;
        }
        if let Some(database_url) = &self.database_url {
            config.database_url = database_url.clone();
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(log_file) = &self.log_file {
            config.log_file = Some(log_file.clone());
        }
        if let Some(production) = self.production {
            config.production = production;
        }
        if let Some(tmp_dir) = &self.tmp_dir {
            config.tmp_dir = tmp_dir.clone();
        }
        if let Some(audio_dir) = &self.audio_dir {
            config.audio_dir = Some(audio_dir.clone());
        }
        if let Some(transcript_dir) = &self.transcript_dir {
            config.transcript_dir = Some(transcript_dir.clone());
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(worker_count) = self.worker_count {
            config.worker_count = worker_count;
        }
        if self.force {
            config.skip_existing = false;
        }
        if self.fail_on_partial {
            config.fail_on_partial = true;
        }
    }

    /// Execute the CLI command, returning the process exit code
    pub async fn execute(self, config: ConfigSet) -> Result<i32> {
        match self.command {
            Commands::Run { json, report } => run_transcription(config, json, report).await,
            Commands::Config => {
                config.display();
                Ok(0)
            }
            Commands::Migrate => migrate(&config),
        }
    }
}

/// Transcribe the configured URL
async fn run_transcription(config: ConfigSet, json: bool, report_path: Option<PathBuf>) -> Result<i32> {
    let fail_on_partial = config.fail_on_partial;

    let request = match RunRequest::from_config(&config) {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Cannot start run");
            eprintln!("Error: {}", e);
            return Ok(e.exit_code());
        }
    };

    let orchestrator = match Orchestrator::with_default_adapters(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!(error = %e, "Cannot start run");
            eprintln!("Error: {}", e);
            return Ok(e.exit_code());
        }
    };

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if watch_interrupts(tokio::signal::ctrl_c, signal_token).await {
            eprintln!("Interrupted again, exiting without cleanup");
            std::process::exit(FORCED_EXIT_CODE);
        }
    });

    let report = match orchestrator.run_with_cancel(request, cancel).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Run aborted");
            eprintln!("Error: {}", e);
            return Ok(e.exit_code());
        }
    };

    if let Some(path) = &report_path {
        let body = serde_json::to_string_pretty(&report).context("Failed to serialize run report")?;
        std::fs::write(path, body)
            .with_context(|| format!("Failed to write run report: {}", path.display()))?;
        info!(path = %path.display(), "Run report written");
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize run report")?
        );
    } else {
        print_report(&report);
    }

    Ok(report.exit_code(fail_on_partial))
}

/// Exit code after a second interrupt (128 + SIGINT)
const FORCED_EXIT_CODE: i32 = 130;

/// Cancel the run on the first interrupt.
///
/// Returns true when a second interrupt arrives, meaning the user wants out
/// now; false if the interrupt source fails.
async fn watch_interrupts<F, Fut>(mut next_interrupt: F, cancel: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if next_interrupt().await.is_err() {
        return false;
    }
    warn!("Interrupt received, finishing in-flight items (press Ctrl-C again to quit)");
    cancel.cancel();

    next_interrupt().await.is_ok()
}

fn print_report(report: &RunReport) {
    println!("Run {} ({})", report.run_id, report.source_url);
    println!(
        "  Items: {} total, {} succeeded ({} skipped), {} failed",
        report.total_items,
        report.succeeded.len(),
        report.skipped.len(),
        report.failed.len()
    );
    println!("  Duration: {:.1}s", report.duration.as_secs_f64());

    if !report.failed.is_empty() {
        println!("\nFailed items:");
        for (item_id, failure) in &report.failed {
            println!("  {}: {}", item_id, failure);
        }
    }

    if !report.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &report.warnings {
            println!("  {}", warning);
        }
    }
}

/// Open the database, creating tables that do not exist yet
fn migrate(config: &ConfigSet) -> Result<i32> {
    match SqliteStore::open(&config.database_url) {
        Ok(_) => {
            println!("Database schema up to date: {}", config.database_url);
            Ok(0)
        }
        Err(e) => {
            error!(database = %config.database_url, error = %e, "Migration failed");
            eprintln!("Error: {}", e);
            Ok(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_config_values() {
        let cli = Cli::parse_from([
            "trackscribe",
            "--url",
            "https://soundcloud.com/a/sets/b",
            "--is-playlist",
            "--database-url",
            "sqlite::memory:",
            "--worker-count",
            "3",
            "--force",
            "run",
            "--json",
        ]);

        let mut config = ConfigSet::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.url.as_deref(), Some("https://soundcloud.com/a/sets/b"));
        assert!(config.is_playlist);
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.worker_count, 3);
        assert!(!config.skip_existing);
        assert!(matches!(cli.command, Commands::Run { json: true, .. }));
    }

    #[test]
    fn test_absent_flags_keep_config_values() {
        let cli = Cli::parse_from(["trackscribe", "config"]);

        let mut config = ConfigSet {
            is_playlist: true,
            max_retries: 5,
            ..Default::default()
        };
        cli.apply_overrides(&mut config);

        assert!(config.is_playlist);
        assert_eq!(config.max_retries, 5);
        assert!(config.skip_existing);
    }

    #[test]
    fn test_boolean_flags_accept_common_spellings() {
        for (value, expected) in [
            ("1", true),
            ("True", true),
            ("yes", true),
            ("0", false),
            ("False", false),
            ("no", false),
        ] {
            let cli = Cli::try_parse_from([
                "trackscribe".to_string(),
                format!("--is-playlist={}", value),
                format!("--production={}", value),
                "config".to_string(),
            ])
            .unwrap();
            assert_eq!(cli.is_playlist, Some(expected), "is_playlist={}", value);
            assert_eq!(cli.production, Some(expected), "production={}", value);
        }

        let cli = Cli::parse_from(["trackscribe", "--is-playlist", "run"]);
        assert_eq!(cli.is_playlist, Some(true));
        assert!(matches!(cli.command, Commands::Run { .. }));

        assert!(Cli::try_parse_from(["trackscribe", "--is-playlist=maybe", "config"]).is_err());
    }

    #[test]
    fn test_false_flag_overrides_config_file() {
        let cli = Cli::parse_from(["trackscribe", "--is-playlist=false", "--production=0", "config"]);

        let mut config = ConfigSet {
            is_playlist: true,
            production: true,
            ..Default::default()
        };
        cli.apply_overrides(&mut config);

        assert!(!config.is_playlist);
        assert!(!config.production);
    }

    #[tokio::test]
    async fn test_first_interrupt_cancels_second_forces_exit() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let rx = std::sync::Arc::new(tokio::sync::Mutex::new(rx));
        let next = move || {
            let rx = rx.clone();
            async move {
                rx.lock()
                    .await
                    .recv()
                    .await
                    .ok_or_else(|| std::io::Error::other("closed"))
            }
        };

        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch_interrupts(next, cancel.clone()));

        tx.send(()).unwrap();
        cancel.cancelled().await;
        assert!(!watcher.is_finished());

        tx.send(()).unwrap();
        assert!(watcher.await.unwrap());
    }

    #[tokio::test]
    async fn test_interrupt_source_failure_does_not_force_exit() {
        let cancel = CancellationToken::new();
        let forced = watch_interrupts(
            || async { Err(std::io::Error::other("no signal handler")) },
            cancel.clone(),
        )
        .await;

        assert!(!forced);
        assert!(!cancel.is_cancelled());
    }
}
