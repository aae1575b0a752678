// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pylon installer coordinator host.
//!
//! Connects the daemon socket client to the store loop: pushed events feed
//! the single-consumer queue, committed snapshots are logged, and ctrl-c
//! tears the loop down explicitly.

use anyhow::{Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use pylon_client::SocketRemote;
use pylon_core::{Store, StoreRuntime};
use pylon_proto::default_socket_path;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HostPrefs {
    socket_path: String,
}

impl Default for HostPrefs {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path().display().to_string(),
        }
    }
}

fn prefs_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("dev", "flyingrobots", "Pylon")?;
    Some(proj.config_dir().join("host.json"))
}

/// Load host prefs, persisting defaults on first run. Best-effort: any I/O
/// or parse problem falls back to defaults.
fn load_prefs() -> HostPrefs {
    let Some(path) = prefs_path() else {
        return HostPrefs::default();
    };
    match fs::read(&path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(prefs) => prefs,
            Err(err) => {
                warn!(%err, "unreadable prefs, using defaults");
                HostPrefs::default()
            }
        },
        Err(_) => {
            let prefs = HostPrefs::default();
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Ok(data) = serde_json::to_vec_pretty(&prefs) {
                let _ = fs::write(&path, data);
            }
            prefs
        }
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Installer daemon socket path (overrides prefs)
    #[clap(short, long)]
    socket: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let prefs = load_prefs();
    let socket_path = args.socket.unwrap_or(prefs.socket_path);

    let (remote, mut pushes) = SocketRemote::connect(&socket_path)
        .await
        .with_context(|| format!("connecting to installer daemon at {socket_path}"))?;
    info!(%socket_path, "connected to installer daemon");

    let (mut runtime, handle) = StoreRuntime::new(Store::new(), remote);
    let mut watcher = runtime.store_mut().subscribe();
    let store_task = runtime.spawn();

    // Daemon pushes become ordinary queue inputs.
    let push_handle = handle.clone();
    tokio::spawn(async move {
        while let Some(event) = pushes.next().await {
            if !push_handle.publish(event) {
                break;
            }
        }
        info!("daemon push stream ended");
    });

    loop {
        tokio::select! {
            snapshot = watcher.next() => {
                let Some(snapshot) = snapshot else { break };
                info!(
                    clusters = snapshot.clusters.len(),
                    credentials = snapshot.credentials.len(),
                    current = %snapshot.current_cluster.id,
                    notices = snapshot.notices.len(),
                    "state committed"
                );
                for notice in &snapshot.notices {
                    warn!(id = notice.id, title = %notice.title, "pending notice");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                handle.shutdown();
                break;
            }
        }
    }

    store_task.await.context("store runtime task")?;
    Ok(())
}
