//! Voxelcraft server binary.
//!
//! Hosts every configured world in its own owner task and wires the
//! snapshot, audit and tick sinks to files under the data directory.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (`VOXELCRAFT_CONFIG`, default
//!    `voxelcraft-config.yaml`; defaults when the file is absent)
//! 2. Initialize structured logging (tracing)
//! 3. Load the block/item/recipe catalogs
//! 4. Per world: open sinks, resume from the newest snapshot, spawn the
//!    owner task
//! 5. Wait for ctrl-c, then stop every world and flush its sinks

mod config;
mod error;
mod sinks;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voxelcraft_core::{World, WorldHandle, spawn_world};
use voxelcraft_world::Catalogs;

use crate::config::{LogFormat, ServerConfig};
use crate::error::ServerError;
use crate::sinks::SinkWriters;

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "VOXELCRAFT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "voxelcraft-config.yaml";

/// A running world and everything needed to stop it cleanly.
struct Hosted {
    handle: WorldHandle,
    owner: JoinHandle<World>,
    writers: SinkWriters,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("loading server configuration")?;
    init_logging(config.log_format);
    info!(
        data_dir = %config.data_dir.display(),
        worlds = config.worlds.len(),
        resume = config.resume,
        "voxelcraft-server starting"
    );

    let catalogs = Arc::new(match &config.catalogs {
        Some(path) => Catalogs::from_file(path).map_err(ServerError::from)?,
        None => Catalogs::builtin().map_err(ServerError::from)?,
    });
    info!(blocks = catalogs.palette.len(), "Catalogs loaded");

    let mut hosted = Vec::with_capacity(config.worlds.len());
    for world_cfg in &config.worlds {
        let id = world_cfg.id.clone();
        let world = host(&config, world_cfg.clone(), Arc::clone(&catalogs))
            .await
            .with_context(|| format!("starting world {id}"))?;
        hosted.push(world);
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutdown requested");

    for Hosted { handle, owner, writers } in hosted {
        let world_id = handle.world_id().to_owned();
        drop(handle);
        match owner.await {
            Ok(world) => {
                info!(world_id = %world_id, tick = world.tick(), "World stopped");
                let dir = config.world_dir(&world_id).join("snapshots");
                if let Err(e) = final_snapshot(&world, &dir).await {
                    warn!(world_id = %world_id, error = %e, "Final snapshot failed");
                }
                // Dropping the world closes its sink senders.
                drop(world);
            }
            Err(e) => warn!(world_id = %world_id, error = %e, "World owner ended abnormally"),
        }
        writers.join().await;
    }
    info!("voxelcraft-server stopped");
    Ok(())
}

fn load_config() -> Result<ServerConfig, ServerError> {
    let path = std::env::var(CONFIG_ENV).map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        Ok(ServerConfig::from_file(&path)?)
    } else {
        Ok(ServerConfig::default().normalized()?)
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }
}

/// Build one world, resume it from its newest snapshot, and start its
/// owner. A resumed world takes the snapshot's seed, which season
/// rollovers advance.
async fn host(
    config: &ServerConfig,
    mut world_cfg: voxelcraft_core::WorldConfig,
    catalogs: Arc<Catalogs>,
) -> Result<Hosted, ServerError> {
    let dir = config.world_dir(&world_cfg.id);
    let snapshots = dir.join("snapshots");
    let resumed = match sinks::latest_snapshot(&snapshots)? {
        Some(path) if config.resume => Some((sinks::load_snapshot(&path)?, path)),
        _ => None,
    };
    if let Some((snap, _)) = &resumed {
        world_cfg.seed = snap.config.seed;
    }

    let (sinks, writers) = sinks::open(&dir, &world_cfg.id, config.sink_buffer).await?;
    let mut world = World::new(world_cfg, catalogs)?.with_sinks(sinks);
    if let Some((snap, path)) = resumed {
        let tick = snap.tick();
        world
            .import_snapshot(snap)
            .map_err(|source| ServerError::Snapshot { path: path.clone(), source })?;
        info!(world_id = %world.id(), tick, path = %path.display(), "Resumed from snapshot");
    }
    info!(world_id = %world.id(), tick = world.tick(), seed = world.cfg.seed, "World hosted");
    let (handle, owner) = spawn_world(world);
    Ok(Hosted { handle, owner, writers })
}

/// Archive the last completed tick so the next start resumes from it.
async fn final_snapshot(world: &World, dir: &Path) -> Result<(), ServerError> {
    let Some(last) = world.tick().checked_sub(1) else {
        return Ok(());
    };
    let path = sinks::write_snapshot(dir, &world.export_snapshot(last)).await?;
    info!(world_id = %world.id(), tick = last, path = %path.display(), "Final snapshot written");
    Ok(())
}
