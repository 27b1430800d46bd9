//! Probe the remote render service.

use std::sync::Arc;

use vidlay_common::AppConfig;
use vidlay_render_client::RenderClient;
use vidlay_render_engine::MemoryHost;

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    let client = RenderClient::from_config(config, Arc::new(MemoryHost::new([])))?;
    let Some(url) = config.remote.base_url.as_deref().filter(|u| !u.trim().is_empty()) else {
        println!("No remote render service configured; renders run locally.");
        return Ok(());
    };

    if client.health().await {
        println!("[OK]   {url} is healthy");
        Ok(())
    } else {
        anyhow::bail!("{url} did not answer its health check")
    }
}
