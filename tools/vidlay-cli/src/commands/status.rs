//! One-shot status lookup.

use std::sync::Arc;

use vidlay_common::AppConfig;
use vidlay_render_client::RenderClient;
use vidlay_render_engine::MemoryHost;
use vidlay_render_model::JobId;

pub async fn run(config: &AppConfig, id: String) -> anyhow::Result<()> {
    // Local jobs live only as long as the process that started them.
    let client = RenderClient::from_config(config, Arc::new(MemoryHost::new([])))?;
    if !client.has_remote() {
        anyhow::bail!("no remote render service configured (set VIDLAY_REMOTE_URL or --remote)");
    }

    let report = client.poll(&JobId::from(id)).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
