mod cli;

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use clipscribe_core::clip::hub::{ArchiveCatalog, HubClient};
use clipscribe_core::clip::local::LocalClipDir;
use clipscribe_core::clip::{id_label, Clip, ClipSource};
use clipscribe_core::config::{DEFAULT_CLIPS_DIR, DEFAULT_MAX_CLIPS};
use clipscribe_core::describe::openai::OpenAiVisionClient;
use clipscribe_core::pipeline::{self, Mode, PipelineConfig};
use clipscribe_core::report::{self, JsonLinesSink};

use cli::{CatalogArgs, OutputFormat, SourceArgs};

fn main() -> Result<()> {
    // Credentials may live in a .env file next to the working directory.
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();
    let timeout = Duration::from_secs(cli.timeout_secs);

    match cli.command {
        cli::Command::Analyze {
            source,
            catalog,
            mode,
            count,
            interval,
            max_frames,
            timestamp_mode,
            prompt,
            model,
            api_base,
            max_tokens,
            delay_ms,
            output,
            format,
            debug_frames,
            overlay_font,
        } => {
            let count = count.unwrap_or(match mode {
                Mode::SingleFramePreview => 1,
                _ => DEFAULT_MAX_CLIPS,
            });
            info!(%mode, count, interval, ?output, "starting analysis");

            let config = PipelineConfig {
                mode,
                interval_sec: interval,
                max_frames,
                timestamp_mode,
                prompt,
                request_delay: Duration::from_millis(delay_ms),
                debug_frames_dir: debug_frames,
                overlay_font,
            };
            // Fail on a bad interval before any download happens.
            config
                .sampling_policy()
                .context("invalid sampling parameters")?;

            let Some(api_key) = cli.openai_api_key else {
                bail!("no API key for the description service, set OPENAI_API_KEY");
            };
            let describer = OpenAiVisionClient::new(api_key, timeout)
                .context("failed to build description client")?
                .with_model(model)
                .with_api_base(api_base)
                .with_max_tokens(max_tokens);

            let clips = load_clips(&source, &catalog, cli.hf_token, timeout, count)?;
            info!(clip_count = clips.len(), "clips ready");

            let reports = run(&clips, &describer, &config, &output, format)?;

            if mode == Mode::SingleFramePreview {
                for report in &reports {
                    for result in &report.results {
                        if let Some(analysis) = &result.analysis {
                            println!(
                                "Worker {} | Factory {} | t={:.1}s | ~${:.4}\n{}",
                                id_label(&report.worker_id),
                                id_label(&report.factory_id),
                                result.time_sec,
                                result.cost_usd,
                                analysis
                            );
                        }
                    }
                }
            }

            Ok(())
        }
        cli::Command::Preload {
            source,
            catalog,
            out_dir,
            count,
        } => {
            info!(?out_dir, count, "preloading clips");

            let clips = if source.clips_dir.is_none() && source.archives.is_empty() && !source.remote {
                // Without a source, fetch the known first archive of every catalog worker.
                let hub = hub_client(&catalog, cli.hf_token, timeout)?;
                let urls = hub.catalog().locators();
                hub.fetch_archives(&urls, count)
                    .context("failed to download any clips, check HF_TOKEN")?
            } else {
                load_clips(&source, &catalog, cli.hf_token, timeout, count)?
            };

            let dir = LocalClipDir::new(&out_dir);
            for (i, clip) in clips.iter().enumerate() {
                dir.save(i, clip)
                    .with_context(|| format!("failed to save clip {i}"))?;
            }

            info!(clip_count = clips.len(), ?out_dir, "preload complete");
            Ok(())
        }
    }
}

fn hub_client(catalog: &CatalogArgs, token: Option<String>, timeout: Duration) -> Result<HubClient> {
    let seed = catalog.seed;
    let catalog = ArchiveCatalog {
        base_url: catalog.hub_url.clone(),
        repo: catalog.dataset.clone(),
        factories: catalog.factories,
        workers_per_factory: catalog.workers,
        parts_per_worker: catalog.parts,
    };
    HubClient::new(token, catalog, timeout, seed).context("failed to build hub client")
}

fn load_clips(
    source: &SourceArgs,
    catalog: &CatalogArgs,
    token: Option<String>,
    timeout: Duration,
    count: usize,
) -> Result<Vec<Clip>> {
    if !source.archives.is_empty() {
        let hub = hub_client(catalog, token, timeout)?;
        return hub
            .fetch_archives(&source.archives, count)
            .context("failed to fetch clip archives");
    }

    if source.remote {
        let mut hub = hub_client(catalog, token, timeout)?;
        return hub.sample(count).context("failed to sample remote clips");
    }

    let dir = source
        .clips_dir
        .clone()
        .unwrap_or_else(|| DEFAULT_CLIPS_DIR.into());
    if !dir.exists() {
        bail!(
            "clip directory {} does not exist, run `clipscribe preload` first",
            dir.display()
        );
    }
    LocalClipDir::new(dir)
        .sample(count)
        .context("failed to load local clips")
}

/// Run the batch and persist reports in the chosen format.
fn run(
    clips: &[Clip],
    describer: &OpenAiVisionClient,
    config: &PipelineConfig,
    output: &Path,
    format: OutputFormat,
) -> Result<Vec<report::ClipReport>> {
    let mut reports = Vec::new();
    let summary = match format {
        OutputFormat::Lines => {
            let sink = JsonLinesSink::new(output);
            pipeline::run_batch(clips, describer, config, |r| {
                sink.append_report(r)?;
                reports.push(r.clone());
                Ok(())
            })
        }
        OutputFormat::Document => pipeline::run_batch(clips, describer, config, |r| {
            reports.push(r.clone());
            Ok(())
        }),
    };

    // Persist what was analyzed even when a preview run stopped early.
    if matches!(format, OutputFormat::Document) && !reports.is_empty() {
        report::write_document(output, &reports).context("failed to write results")?;
    }

    let summary = summary.context("pipeline failed")?;
    if summary.failed_frames > 0 || summary.failed_clips > 0 {
        warn!(
            failed_clips = summary.failed_clips,
            failed_frames = summary.failed_frames,
            "some clips or frames could not be analyzed, see the report"
        );
    }

    info!(
        clips = summary.clips,
        frames = summary.frames,
        total_cost_usd = summary.total_cost_usd,
        ?output,
        "analysis complete"
    );
    Ok(reports)
}
