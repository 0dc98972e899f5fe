//! `vgen run` – the pipeline daemon: crash recovery, worker fleets, control
//! socket, periodic dispatch of pending jobs, stale-job maintenance.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use vgen_core::worker::Supervisor;

use crate::cli::control_socket;
use crate::cli::App;

/// How often the dispatch loop re-hydrates pending jobs onto the queues.
const DISPATCH_INTERVAL: Duration = Duration::from_secs(5);
/// How often the stale-job maintenance pass runs.
const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

pub async fn run_pipeline(app: App) -> Result<()> {
    let supervisor = Arc::new(Mutex::new(Supervisor::new(Arc::clone(&app.ctx))));
    let service = Arc::new(app.service);

    {
        let supervisor = supervisor.lock().await;
        let recovered = supervisor.recover().await?;
        if recovered > 0 {
            println!("recovered {recovered} interrupted jobs (reset to draft)");
        }
    }

    supervisor.lock().await.start_all();
    let hydrated = supervisor.lock().await.hydrate().await?;
    if hydrated > 0 {
        println!("re-queued {hydrated} persisted jobs");
    }

    let socket = control_socket::socket_path()?;
    let listener = control_socket::spawn_control_listener(
        Arc::clone(&supervisor),
        Arc::clone(&service),
        &socket,
    )?;
    println!("vgen pipeline running (control socket: {})", socket.display());

    // Dispatch loop: newly pending jobs (from `vgen start` in another
    // process) ride onto the queues; stale jobs get swept periodically.
    let mut last_stale_sweep = tokio::time::Instant::now();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(DISPATCH_INTERVAL) => {
                let supervisor = supervisor.lock().await;
                if let Err(err) = supervisor.hydrate().await {
                    tracing::warn!("dispatch pass failed: {err:#}");
                }
                if last_stale_sweep.elapsed() >= STALE_SWEEP_INTERVAL {
                    last_stale_sweep = tokio::time::Instant::now();
                    if let Err(err) = supervisor.reset_stale().await {
                        tracing::warn!("stale sweep failed: {err:#}");
                    }
                }
            }
        }
    }

    println!("shutting down...");
    listener.abort();
    let _ = std::fs::remove_file(&socket);
    supervisor.lock().await.stop_all().await;
    println!("done");
    Ok(())
}
