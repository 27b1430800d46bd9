//! Vidlay CLI: render image and video overlays onto a background video.
//!
//! Usage:
//!   vidlay render <BG> <IMAGE> --transform <FILE>   Render and wait for the result
//!   vidlay status <JOB_ID>                          Show a remote job's status
//!   vidlay health                                   Probe the remote render service
//!   vidlay check                                    Check encoder capabilities
//!   vidlay validate <FILE>                          Validate a transform file

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use vidlay_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "vidlay",
    about = "Composite a positioned image and an overlay video onto a background video",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Remote render service URL (overrides config and VIDLAY_REMOTE_URL)
    #[arg(long, global = true)]
    remote: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a render and wait for it to finish
    Render {
        /// Background video (or still image)
        background: String,

        /// Overlay image placed by the transform
        overlay: String,

        /// JSON file with the overlay transform
        #[arg(short, long)]
        transform: PathBuf,

        /// Video drawn semi-transparent over everything
        #[arg(long)]
        overlay_video: Option<String>,

        /// Width of the editor frame the transform was captured in
        #[arg(long, requires = "frame_height")]
        frame_width: Option<f64>,

        /// Height of the editor frame the transform was captured in
        #[arg(long, requires = "frame_width")]
        frame_height: Option<f64>,

        /// Aspect ratio tag: original or W:H
        #[arg(long, default_value = "original")]
        aspect_ratio: String,

        /// Quality tier: low|standard|high
        #[arg(long, default_value = "standard")]
        quality: String,

        /// Keep the background's native frame rate
        #[arg(long)]
        preserve_speed: bool,

        /// Sample the overlay image pixel-exactly
        #[arg(long)]
        exact: bool,

        /// Preferred container for local renders: mp4|webm
        #[arg(long, default_value = "mp4")]
        container: String,

        /// Render a fixed 3 second preview instead of the full video
        #[arg(long)]
        preview: bool,

        /// Return after submitting instead of waiting
        #[arg(long)]
        no_wait: bool,
    },

    /// Show the status of a job
    Status {
        /// Job id returned by `render`
        id: String,
    },

    /// Probe the remote render service
    Health,

    /// Check encoder capabilities
    Check,

    /// Validate a transform file
    Validate {
        /// Path to the transform JSON
        path: PathBuf,

        /// Target frame as WxH to preview the mapped position
        #[arg(long)]
        target: Option<String>,

        /// Source frame as WxH the transform was captured in
        #[arg(long)]
        source: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load();
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    if let Some(url) = cli.remote {
        config.remote.base_url = Some(url);
    }
    vidlay_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Render {
            background,
            overlay,
            transform,
            overlay_video,
            frame_width,
            frame_height,
            aspect_ratio,
            quality,
            preserve_speed,
            exact,
            container,
            preview,
            no_wait,
        } => {
            commands::render::run(
                &config,
                commands::render::RenderArgs {
                    background,
                    overlay,
                    transform,
                    overlay_video,
                    frame: frame_width.zip(frame_height),
                    aspect_ratio,
                    quality,
                    preserve_speed,
                    exact,
                    container,
                    preview,
                    no_wait,
                },
            )
            .await
        }
        Commands::Status { id } => commands::status::run(&config, id).await,
        Commands::Health => commands::health::run(&config).await,
        Commands::Check => commands::check::run(&config),
        Commands::Validate {
            path,
            target,
            source,
        } => commands::validate::run(path, source, target),
    }
}
