use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::time::{Duration, Instant};

use tidyscan::controller::{Applied, ScanController};
use tidyscan::demo::{DemoConfig, DemoWorker};
use tidyscan::domains::{
    AppCacheOps, ClassificationOps, DomainOps, JunkFileOps, LargeFileOps, ResidueOps,
};
use tidyscan::ipc::EventBus;
use tidyscan::logging;
use tidyscan::model::{ScanDomain, ScanStatus};
use tidyscan::settings::Settings;

#[derive(Parser)]
#[command(name = "tidyscan")]
#[command(about = "Drive disk-cleanup scans run by an external worker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to settings file
    #[arg(short = 'c', long)]
    config: Option<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scan against the simulated worker, then clean up what it found
    Demo {
        /// large-file, junk-file, app-cache, residue or classification
        domain: ScanDomain,
        /// Files per category
        #[arg(long, default_value_t = 150)]
        files: usize,
        /// Progress events before completion
        #[arg(long, default_value_t = 8)]
        steps: u32,
        /// Pause the scan once, halfway through
        #[arg(long)]
        pause: bool,
        /// Make the worker refuse to start
        #[arg(long)]
        fail_start: bool,
        /// Make every n-th deletion fail
        #[arg(long)]
        fail_every: Option<usize>,
        /// Leave the results in place instead of deleting the selection
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the effective settings
    Config {
        /// Write the settings file if it does not exist yet
        #[arg(long)]
        init: bool,
    },
    /// List the scan domains with their commands and channels
    Domains,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let settings_path = match &cli.config {
        Some(config) => Settings::resolve_path(config),
        None => Settings::default_path(),
    };
    let settings = Settings::load(&settings_path).context("Failed to load settings")?;

    match cli.command {
        Commands::Demo {
            domain,
            files,
            steps,
            pause,
            fail_start,
            fail_every,
            dry_run,
        } => {
            let bus = EventBus::new();
            let worker = DemoWorker::new(
                bus.clone(),
                DemoConfig {
                    files_per_category: files,
                    steps,
                    initial_page: settings.pagination.initial_page_size as usize,
                    fail_start,
                    fail_every,
                    ..Default::default()
                },
            );
            let run = DemoRun {
                settings: &settings,
                bus,
                pause,
                dry_run,
            };

            match domain {
                ScanDomain::LargeFile => run.session(LargeFileOps::new(worker), &Default::default()).await?,
                ScanDomain::JunkFile => run.session(JunkFileOps::new(worker), &Default::default()).await?,
                ScanDomain::AppCache => run.session(AppCacheOps::new(worker), &Default::default()).await?,
                ScanDomain::SoftwareResidue => run.session(ResidueOps::new(worker), &Default::default()).await?,
                ScanDomain::FileClassification => {
                    run.session(ClassificationOps::new(worker), &Default::default()).await?
                }
            }
        }
        Commands::Config { init } => {
            if init && !settings_path.exists() {
                settings
                    .save(&settings_path)
                    .context("Failed to write settings")?;
                println!("Wrote {}", settings_path.display());
            }
            println!("# {}", settings_path.display());
            print!("{}", settings.to_toml()?);
        }
        Commands::Domains => {
            for domain in ScanDomain::ALL {
                println!("{:<16} {}", domain.name(), domain.display_name());
                println!("  commands: {}_*", domain.command_prefix());
                println!(
                    "  events:   {}, {}",
                    domain.progress_channel(),
                    domain.complete_channel()
                );
            }
        }
    }

    Ok(())
}

struct DemoRun<'a> {
    settings: &'a Settings,
    bus: EventBus,
    pause: bool,
    dry_run: bool,
}

impl DemoRun<'_> {
    async fn session<D: DomainOps>(&self, ops: D, params: &D::Params) -> Result<()> {
        let mut controller = ScanController::with_config(
            ops,
            self.bus.clone(),
            self.settings.session_config(),
            self.settings.pagination_config(),
        );
        controller.setup_listeners();

        let id = controller
            .start(params)
            .await
            .with_context(|| format!("Failed to start {} scan", controller.domain()))?;
        println!("Started {} scan {}", controller.domain(), id);

        let mut paused_once = false;
        while controller.status().is_active() {
            let event = tokio::select! {
                applied = controller.next_event() => applied,
                _ = tokio::time::sleep(Duration::from_millis(250)) => None,
            };
            if controller.tick(Instant::now()) {
                break;
            }

            if let Some(Applied::Progress | Applied::Reconciled(_)) = event {
                if let Some(progress) = controller.progress() {
                    println!(
                        "  {:>5.1}% {} found, {}",
                        progress.percent,
                        progress.found_count,
                        smart_truncate_path(&progress.current_path, 60)
                    );
                    if self.pause && !paused_once && progress.percent >= 50.0 {
                        paused_once = true;
                        controller.pause().await?;
                        println!("  paused");
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        controller.resume().await?;
                        println!("  resumed");
                    }
                }
            }
        }

        // The completion payload may still be queued behind progress(completed)
        if controller.status() == ScanStatus::Completed && controller.result().is_none() {
            let _ = tokio::time::timeout(Duration::from_secs(1), controller.next_event()).await;
        }

        if let Some(error) = controller.error() {
            anyhow::bail!("Scan ended in {}: {}", controller.status(), error.message);
        }
        let Some(result) = controller.result() else {
            println!("Scan ended: {}", controller.status());
            return Ok(());
        };

        println!(
            "\nScan complete: {} files, {}",
            result.total_files,
            format_size(result.total_size)
        );
        let truncated: Vec<String> = result
            .categories
            .iter()
            .filter(|c| c.has_more)
            .map(|c| c.key.clone())
            .collect();
        for key in truncated {
            let added = controller
                .load_more(&key)
                .await
                .with_context(|| format!("Failed to load more of {}", key))?;
            println!("  loaded {} more files into {}", added, key);
        }

        if let Some(result) = controller.result() {
            for category in &result.categories {
                println!(
                    "  {:<20} {:>6}/{:<6} {}",
                    category.display_name,
                    category.files.len(),
                    category.file_count,
                    format_size(category.total_size)
                );
            }
        }

        controller.select_all();
        println!(
            "\nSelected {} entries ({})",
            controller.selected_count(),
            format_size(controller.selected_size())
        );
        if self.dry_run {
            return Ok(());
        }

        let outcome = controller
            .delete_selected(self.settings.delete_options())
            .await
            .context("Failed to delete selection")?;
        println!(
            "Deleted {} entries ({}), {} failed, {} skipped",
            outcome.report.deleted_count,
            format_size(outcome.report.deleted_size),
            outcome.report.failed_count,
            outcome.skipped.len()
        );
        for failed in &outcome.report.failed_items {
            println!("  failed: {} ({})", smart_truncate_path(&failed.path, 60), failed.error);
        }
        for skipped in &outcome.skipped {
            println!("  skipped: {} ({})", smart_truncate_path(&skipped.path, 60), skipped.reason);
        }
        if !outcome.dropped_categories.is_empty() {
            println!("Emptied: {}", outcome.dropped_categories.join(", "));
        }

        controller.reset().await;
        controller.cleanup();
        Ok(())
    }
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Keep the start and end of a long path, eliding the middle
fn smart_truncate_path(path: &str, max_len: usize) -> String {
    let chars: Vec<char> = path.chars().collect();
    if chars.len() <= max_len || max_len < 5 {
        return path.to_string();
    }
    let keep = max_len - 3;
    let head = keep / 3;
    let tail = keep - head;
    let start: String = chars[..head].iter().collect();
    let end: String = chars[chars.len() - tail..].iter().collect();
    format!("{}...{}", start, end)
}
