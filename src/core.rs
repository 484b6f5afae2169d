use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::clock::SystemClock;
use crate::config::AppConfig;
use crate::server::{self, AppState};
use crate::slot::{ImageSlot, MirrorTarget};
use crate::trigger::TriggerCoordinator;

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    // 1. Shared clock
    let clock = Arc::new(SystemClock);

    // 2. Trigger coordinator
    let trigger = Arc::new(TriggerCoordinator::new(clock.clone()));

    // 3. Image slot, with its disk mirror if configured
    let mirror = if config.storage.mirror_to_disk {
        let dir = PathBuf::from(&config.storage.dir);
        tokio::fs::create_dir_all(&dir).await?;
        info!(dir = %dir.display(), file = %config.storage.filename, "Disk mirror enabled");
        Some(MirrorTarget {
            dir,
            filename: config.storage.filename.clone(),
        })
    } else {
        None
    };
    let slot = Arc::new(ImageSlot::new(clock, mirror));

    // 4. HTTP server (blocks)
    let state = AppState {
        trigger,
        slot,
        started_at: Instant::now(),
    };
    info!("Starting shutterd v{}", env!("CARGO_PKG_VERSION"));
    server::start_server(
        state,
        &config.server.bind,
        config.server.port,
        config.storage.max_upload_mb,
    )
    .await
}
