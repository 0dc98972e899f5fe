//! Control socket: server (during `vgen run`) and client (for the admin
//! commands). Protocol: one command line in, a short text reply out, one
//! connection per command.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

use vgen_core::bus::TaskType;
use vgen_core::service::Service;
use vgen_core::worker::Supervisor;

/// Spawns a task that listens on `path` and executes admin commands against
/// the running supervisor/service. Malformed lines get an "error:" reply.
pub fn spawn_control_listener(
    supervisor: Arc<Mutex<Supervisor>>,
    service: Arc<Service>,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    let handle = tokio::spawn(async move {
        let _ = std::fs::remove_file(&path);
        let listener = match UnixListener::bind(&path) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(path = %path.display(), "control socket bind: {}", e);
                return;
            }
        };
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let supervisor = Arc::clone(&supervisor);
                    let service = Arc::clone(&service);
                    tokio::spawn(async move {
                        handle_connection(stream, supervisor, service).await;
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn handle_connection(
    stream: UnixStream,
    supervisor: Arc<Mutex<Supervisor>>,
    service: Arc<Service>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half).lines();
    let Ok(Some(line)) = reader.next_line().await else {
        return;
    };
    let reply = match execute(line.trim(), &supervisor, &service).await {
        Ok(reply) => reply,
        Err(err) => format!("error: {err:#}"),
    };
    let _ = write_half.write_all(reply.as_bytes()).await;
    let _ = write_half.write_all(b"\n").await;
}

async fn execute(
    line: &str,
    supervisor: &Mutex<Supervisor>,
    service: &Service,
) -> Result<String> {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default();
    match command {
        "pause" => {
            supervisor.lock().await.pause();
            Ok("paused".to_string())
        }
        "resume" => {
            supervisor.lock().await.resume();
            Ok("resumed".to_string())
        }
        "reset" => {
            let report = supervisor.lock().await.reset().await?;
            Ok(format!(
                "reset complete: {} leases cleared, {} active jobs cleared, {} jobs reset",
                report.cleared_accounts, report.cleared_active_jobs, report.reset_jobs
            ))
        }
        "reset-stale" => {
            let n = supervisor.lock().await.reset_stale().await?;
            Ok(format!("reset {n} stale jobs"))
        }
        "restart-workers" => {
            supervisor.lock().await.restart_workers().await;
            Ok("workers restarted".to_string())
        }
        "status" => {
            let status = supervisor.lock().await.queue_status().await?;
            Ok(format!(
                "paused={} generate={} poll={} download={} active={} \
                 db completed={} pending={} failed={} processing={} \
                 accounts total={} with_credits={}",
                status.bus.paused,
                status.bus.generate_queue_size,
                status.bus.poll_queue_size,
                status.bus.download_queue_size,
                status.bus.active_count,
                status.db.completed,
                status.db.pending,
                status.db.failed,
                status.db.processing,
                status.accounts.total,
                status.accounts.with_credits,
            ))
        }
        "start" => {
            let id: i64 = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("start needs a job id"))?
                .parse()?;
            service.start_job(id).await?;
            Ok(format!("job {id} started"))
        }
        "cancel" => {
            let id: i64 = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("cancel needs a job id"))?
                .parse()?;
            service.cancel_job(id).await?;
            Ok(format!("job {id} cancelled"))
        }
        "retry-stage" => {
            let id: i64 = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("retry-stage needs a job id"))?
                .parse()?;
            let stage = match parts.next() {
                Some("generate") => TaskType::Generate,
                Some("poll") => TaskType::Poll,
                Some("download") => TaskType::Download,
                other => anyhow::bail!("unknown stage {other:?}"),
            };
            service.retry_stage(id, stage).await?;
            Ok(format!("job {id} stage re-enqueued"))
        }
        other => anyhow::bail!("unknown command {other:?}"),
    }
}

/// Send one command to the daemon. Returns None when no daemon is listening
/// (missing socket or refused connection) so callers can fall back.
pub async fn send_command(socket_path: &Path, command: &str) -> Result<Option<String>> {
    if !socket_path.exists() {
        return Ok(None);
    }
    let Ok(mut stream) = UnixStream::connect(socket_path).await else {
        return Ok(None);
    };
    stream.write_all(command.as_bytes()).await?;
    stream.write_all(b"\n").await?;

    let mut reply = String::new();
    let mut reader = BufReader::new(stream);
    tokio::io::AsyncBufReadExt::read_line(&mut reader, &mut reply).await?;
    Ok(Some(reply.trim_end().to_string()))
}

/// Where the daemon listens; shared with `vgen run`.
pub fn socket_path() -> Result<PathBuf> {
    Ok(vgen_core::control::default_control_socket_path()?)
}
