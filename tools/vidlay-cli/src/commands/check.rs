//! Check which encoders this machine can use.

use vidlay_common::AppConfig;
use vidlay_render_engine::ffmpeg::command_exists;
use vidlay_render_engine::{negotiate, CodecCandidate, EncoderHost, FfmpegHost, WEBM_FIRST};
use vidlay_render_model::Container;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Vidlay System Check");
    println!("{}", "=".repeat(50));

    for binary in ["ffmpeg", "ffprobe"] {
        if command_exists(binary) {
            println!("[OK]   {binary} found");
        } else {
            println!("[WARN] {binary} not found in PATH");
        }
    }

    println!();
    match FfmpegHost::detect() {
        Some(host) => {
            println!("Encoder candidates:");
            for candidate in WEBM_FIRST {
                println!("{}", candidate_line(candidate, host.supports(candidate)));
            }
            println!();
            for preferred in [Container::Mp4, Container::Webm] {
                match negotiate(&host, preferred) {
                    Some(choice) => println!("Preferred {preferred}: {choice}"),
                    None => println!("Preferred {preferred}: [WARN] no usable encoder"),
                }
            }
        }
        None => println!("[WARN] Local rendering unavailable: install ffmpeg"),
    }

    println!();
    match config.remote.base_url.as_deref() {
        Some(url) if !url.trim().is_empty() => println!("Remote service: {url}"),
        _ => println!("Remote service: not configured (local only)"),
    }
    println!("Output directory: {}", config.output_dir.display());

    Ok(())
}

fn candidate_line(candidate: CodecCandidate, supported: bool) -> String {
    let mark = if supported { "[OK]" } else { "[--]" };
    format!("  {mark:<6} {:<8} {candidate}", candidate.codec_label())
}
