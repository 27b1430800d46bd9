//! Submit a render and follow it to completion.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};

use vidlay_common::AppConfig;
use vidlay_render_client::{
    wait_for_terminal, HttpBackend, LocalBackend, LocalRenderDefaults, PollPolicy, RenderClient,
};
use vidlay_render_engine::{
    EncoderHost, FfmpegHost, JobStore, MemoryHost, RenderLoop, RenderMode, RenderSettings,
};
use vidlay_render_model::{
    AspectRatio, Container, FrameSize, JobParams, JobStatus, MediaRef, Quality, RenderRequest,
};

pub struct RenderArgs {
    pub background: String,
    pub overlay: String,
    pub transform: PathBuf,
    pub overlay_video: Option<String>,
    pub frame: Option<(f64, f64)>,
    pub aspect_ratio: String,
    pub quality: String,
    pub preserve_speed: bool,
    pub exact: bool,
    pub container: String,
    pub preview: bool,
    pub no_wait: bool,
}

pub async fn run(config: &AppConfig, args: RenderArgs) -> anyhow::Result<()> {
    let transform = super::validate::load_transform(&args.transform)?;

    let params = JobParams {
        aspect_ratio: args
            .aspect_ratio
            .parse::<AspectRatio>()
            .map_err(anyhow::Error::msg)?,
        quality: args.quality.parse::<Quality>().map_err(anyhow::Error::msg)?,
        preserve_original_speed: args.preserve_speed,
        exact_positioning: args.exact,
    };
    let container = args
        .container
        .parse::<Container>()
        .map_err(anyhow::Error::msg)?;

    let mut request = RenderRequest::new(
        MediaRef::new(args.background),
        MediaRef::new(args.overlay),
        transform,
    )
    .with_params(params);
    if let Some(video) = args.overlay_video {
        request = request.with_overlay_video(MediaRef::new(video));
    }
    if let Some((width, height)) = args.frame {
        request = request.with_preview_frame(FrameSize::new(width, height));
    }

    let client = build_client(
        config,
        LocalRenderDefaults {
            preferred_container: container,
            mode: if args.preview {
                RenderMode::PreviewSimulation
            } else {
                RenderMode::Full
            },
            editing: false,
        },
    )?;

    let id = client.submit(request).await?;
    println!("Job: {id}");

    if args.no_wait {
        if client.local().knows(&id).await {
            println!("Rendering locally; waiting anyway since the job ends with this process.");
        } else {
            println!("Follow it with `vidlay status {id}`");
            return Ok(());
        }
    }

    let policy = PollPolicy::from_config(&config.polling);
    let mut last = None;
    let report = wait_for_terminal(&client, &id, policy, |report| {
        if last != Some(report.progress) {
            last = Some(report.progress);
            print!("\r  Progress: {:>3}%", report.progress);
            let _ = std::io::stdout().flush();
        }
    })
    .await?;
    println!();

    match report.status {
        JobStatus::Completed => {
            let location = report.download_url.unwrap_or_default();
            println!("Render complete: {location}");
            Ok(())
        }
        _ => bail!(
            "Render failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

fn build_client(config: &AppConfig, defaults: LocalRenderDefaults) -> anyhow::Result<RenderClient> {
    let host: Arc<dyn EncoderHost> = match FfmpegHost::detect() {
        Some(host) => Arc::new(host),
        None => {
            tracing::warn!("ffmpeg not found; local renders will fail to find an encoder");
            Arc::new(MemoryHost::new([]))
        }
    };

    let driver = RenderLoop::new(host, RenderSettings::from_config(config));
    let store = Arc::new(JobStore::from_config(&config.jobs));
    let local = LocalBackend::new(driver, store).with_defaults(defaults);
    let client = RenderClient::new(local);

    let remote =
        HttpBackend::from_config(&config.remote).context("invalid remote configuration")?;
    Ok(match remote {
        Some(remote) => client.with_remote(Arc::new(remote)),
        None => client,
    })
}
