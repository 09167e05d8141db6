//! Command implementations

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{error, info, warn};

use crate::adapters::memory::MemoryLibrary;
use crate::adapters::toml_config::{AppConfig, TomlConfigAdapter};
use crate::adapters::default_ports;
use crate::app::{AppContainer, DefaultAppContainer, InspectFormat, InspectInteractor, InspectRequest};
use crate::cli::args::{CompressArgs, ConfigArgs, InspectArgs, PlanArgs};
use crate::domain::errors::ErrorCode;
use crate::domain::model::{JobOutcome, MediaSource, VideoMetadata};
use crate::engine::CompressRequest;
use crate::ports::CompressCallback;
use crate::utils::path::PathUtils;
use crate::utils::Utils;

/// One compression the command will submit
#[derive(Debug)]
struct PlannedJob {
    source: MediaSource,
    input_path: Option<PathBuf>,
    output_dir: PathBuf,
    file_name: String,
}

/// Execute the compress command
pub async fn compress(args: CompressArgs, config: &AppConfig) -> Result<()> {
    info!("Starting compress operation");
    info!("Input: {}", args.input);

    let jobs = plan_jobs(&args)?;
    let ports = default_ports().context("No media backend available")?;
    let container = DefaultAppContainer::new(ports, config).context("Failed to set up services")?;
    let service = container.compress_service();
    info!("Compressing {} input(s) with {}", jobs.len(), container.strategy().name());

    let started = Instant::now();
    let mut tickets = Vec::with_capacity(jobs.len());
    for job in &jobs {
        std::fs::create_dir_all(&job.output_dir).with_context(|| {
            format!("Failed to create output directory {}", job.output_dir.display())
        })?;
        let label = job
            .source
            .file_name()
            .unwrap_or_else(|| job.file_name.clone());
        let reporter: Arc<dyn CompressCallback> = Arc::new(ConsoleReporter::new(label, args.json));
        let request = CompressRequest::new(
            job.source.clone(),
            job.output_dir.clone(),
            job.file_name.clone(),
        );
        tickets.push(service.submit(request, reporter));
    }

    let interrupt = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling running jobs");
                let cancelled = service.cancel_all();
                eprintln!("Cancelled {} job(s)", cancelled);
            }
        })
    };

    let mut completed = 0;
    let mut failed = 0;
    let mut cancelled = 0;
    for (job, ticket) in jobs.iter().zip(tickets) {
        match ticket.wait().await {
            JobOutcome::Completed { output } => {
                completed += 1;
                if !args.json {
                    print_size_summary(job.input_path.as_deref(), &output);
                }
            }
            JobOutcome::Failed { .. } => failed += 1,
            JobOutcome::Cancelled => cancelled += 1,
        }
    }
    interrupt.abort();

    let elapsed = Utils::format_duration(started.elapsed());
    info!(
        "Compress finished in {}: {} completed, {} failed, {} cancelled",
        elapsed, completed, failed, cancelled
    );
    if !args.json {
        println!(
            "{} completed, {} failed, {} cancelled in {}",
            completed, failed, cancelled, elapsed
        );
    }

    if failed > 0 {
        bail!("{} of {} job(s) failed", failed, jobs.len());
    }
    if cancelled > 0 {
        bail!("{} job(s) cancelled", cancelled);
    }
    Ok(())
}

/// Resolve the input argument into jobs with their output locations
fn plan_jobs(args: &CompressArgs) -> Result<Vec<PlannedJob>> {
    let source = MediaSource::parse(&args.input);
    let mut reserved = HashSet::new();

    let inputs: Vec<(MediaSource, Option<PathBuf>, PathBuf)> = match source.local_path() {
        Some(path) => {
            if !path.exists() {
                bail!("Input does not exist: {}", path.display());
            }
            let default_dir = if path.is_dir() {
                None
            } else {
                Some(parent_dir(&path))
            };
            PathUtils::collect_inputs(&path, args.recursive)?
                .into_iter()
                .map(|input| {
                    let output_dir = args
                        .output_dir
                        .clone()
                        .or_else(|| default_dir.clone())
                        .unwrap_or_else(|| parent_dir(&input));
                    (MediaSource::File(input.clone()), Some(input), output_dir)
                })
                .collect()
        }
        None => {
            let output_dir = args
                .output_dir
                .clone()
                .ok_or_else(|| anyhow!("--output-dir is required for URI inputs"))?;
            vec![(source, None, output_dir)]
        }
    };

    if inputs.is_empty() {
        bail!("No video files found in {}", args.input);
    }
    if args.name.is_some() && inputs.len() > 1 {
        bail!("--name only applies to a single input, found {}", inputs.len());
    }

    let mut jobs = Vec::with_capacity(inputs.len());
    for (source, input_path, output_dir) in inputs {
        let file_name = match &args.name {
            Some(name) => name.clone(),
            None => PathUtils::unique_file_name(
                &output_dir,
                &PathUtils::output_file_name(&source),
                &reserved,
            ),
        };
        reserved.insert(output_dir.join(&file_name));
        jobs.push(PlannedJob {
            source,
            input_path,
            output_dir,
            file_name,
        });
    }
    Ok(jobs)
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn print_size_summary(input: Option<&Path>, output: &Path) {
    let output_size = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
    match input.and_then(|path| std::fs::metadata(path).ok()) {
        Some(metadata) => println!(
            "  {} -> {} ({:.1}% smaller)",
            Utils::format_file_size(metadata.len()),
            Utils::format_file_size(output_size),
            Utils::savings_percent(metadata.len(), output_size)
        ),
        None => println!("  wrote {}", Utils::format_file_size(output_size)),
    }
}

/// Execute the inspect command
pub fn inspect(args: InspectArgs, config: &AppConfig) -> Result<()> {
    info!("Starting inspect operation");
    info!("Input: {}", args.input);

    let source = MediaSource::parse(&args.input);
    if let Some(path) = source.local_path() {
        if !path.is_file() {
            bail!("Input file does not exist: {}", path.display());
        }
    }

    let ports = default_ports().context("No media backend available")?;
    let strategy = config.strategy.build()?;
    let interactor = InspectInteractor::new(ports.metadata, strategy);
    let response = interactor
        .execute(InspectRequest {
            source,
            format: output_format(args.json),
        })
        .context("Failed to inspect input file")?;

    println!("{}", response.summary.trim_end());
    info!("Inspect operation completed successfully");
    Ok(())
}

/// Execute the plan command
pub fn plan(args: PlanArgs, config: &AppConfig) -> Result<()> {
    let metadata = VideoMetadata {
        width: args.width,
        height: args.height,
        rotation: args.rotation,
        bitrate: args.bitrate,
        ..VideoMetadata::default()
    };

    // Planning never probes, so an empty in-memory library is enough
    let interactor = InspectInteractor::new(Arc::new(MemoryLibrary::new()), config.strategy.build()?);
    let response = interactor
        .describe(metadata, output_format(args.json))
        .context("Invalid source parameters")?;

    println!("{}", response.summary.trim_end());
    Ok(())
}

/// Execute the config command
pub fn show_config(args: ConfigArgs, config: &AppConfig) -> Result<()> {
    let adapter = TomlConfigAdapter::new(config.clone());
    print!("{}", adapter.serialize_config()?);
    if let Some(path) = args.save {
        adapter
            .save_config(&path)
            .with_context(|| format!("Failed to save configuration to {}", path.display()))?;
        info!("Configuration saved to {}", path.display());
    }
    Ok(())
}

fn output_format(json: bool) -> InspectFormat {
    if json {
        InspectFormat::Json
    } else {
        InspectFormat::Text
    }
}

/// Prints job events to the terminal, as text or JSON lines
struct ConsoleReporter {
    label: String,
    json: bool,
    last_decile: AtomicU32,
}

impl ConsoleReporter {
    fn new(label: String, json: bool) -> Self {
        Self {
            label,
            json,
            last_decile: AtomicU32::new(0),
        }
    }
}

impl CompressCallback for ConsoleReporter {
    fn on_progress(&self, percent: f32) {
        if self.json {
            let event = serde_json::json!({
                "event": "progress",
                "input": self.label,
                "percent": percent,
                "timestamp": chrono::Utc::now().to_rfc3339()
            });
            println!("{}", event);
            return;
        }

        // One line per 10% step
        let decile = (percent / 10.0).floor() as u32;
        if decile > self.last_decile.fetch_max(decile, Ordering::SeqCst) {
            eprintln!("[{}] {:>3}%", self.label, decile * 10);
        }
    }

    fn on_complete(&self, output: &Path) {
        if self.json {
            let event = serde_json::json!({
                "event": "complete",
                "input": self.label,
                "output": output.display().to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            });
            println!("{}", event);
        } else {
            println!("[{}] done: {}", self.label, output.display());
        }
    }

    fn on_error(&self, code: ErrorCode, message: &str) {
        error!("{} failed with {}: {}", self.label, code, message);
        if self.json {
            let event = serde_json::json!({
                "event": "error",
                "input": self.label,
                "code": code.as_i32(),
                "error": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            });
            println!("{}", event);
        } else {
            eprintln!("[{}] failed ({}): {}", self.label, code, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compress_args(input: &str) -> CompressArgs {
        CompressArgs {
            input: input.to_string(),
            output_dir: None,
            name: None,
            recursive: false,
            jobs: None,
            json: false,
            strategy: Default::default(),
        }
    }

    #[test]
    fn test_plan_jobs_for_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("trip.mp4");
        std::fs::write(&input, b"x").unwrap();

        let jobs = plan_jobs(&compress_args(input.to_str().unwrap())).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].output_dir, dir.path());
        assert_eq!(jobs[0].file_name, "trip_compressed.mp4");
    }

    #[test]
    fn test_plan_jobs_avoids_name_clashes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("b/a.mp4"), b"x").unwrap();

        let mut args = compress_args(dir.path().to_str().unwrap());
        args.recursive = true;
        args.output_dir = Some(dir.path().join("out"));
        let jobs = plan_jobs(&args).unwrap();
        let names: Vec<_> = jobs.iter().map(|job| job.file_name.as_str()).collect();
        assert_eq!(names, vec!["a_compressed.mp4", "a_compressed_1.mp4"]);
    }

    #[test]
    fn test_plan_jobs_rejects_bad_input() {
        assert!(plan_jobs(&compress_args("/nonexistent/video.mp4")).is_err());

        let dir = tempfile::tempdir().unwrap();
        assert!(plan_jobs(&compress_args(dir.path().to_str().unwrap())).is_err());

        let uri = compress_args("content://media/external/video/7");
        assert!(plan_jobs(&uri).is_err());
    }

    #[test]
    fn test_name_needs_single_input() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"x").unwrap();
        let mut args = compress_args(dir.path().to_str().unwrap());
        args.name = Some("out.mp4".to_string());
        assert!(plan_jobs(&args).is_err());
    }
}
