//! Bulk job commands: start, cancel, retry, remove. Each id is processed
//! independently; the output lists per-id outcomes.

use anyhow::{bail, Result};

use vgen_core::bus::TaskType;
use vgen_core::service::BulkOutcome;

use crate::cli::control_socket;
use crate::cli::App;

fn report(action: &str, outcomes: &[BulkOutcome]) {
    for outcome in outcomes {
        match &outcome.result {
            Ok(()) => println!("job {}: {action}", outcome.id),
            Err(err) => println!("job {}: failed ({err:#})", outcome.id),
        }
    }
}

/// Prefer the running daemon (its queues and active set are live); fall
/// back to a direct database transition that hydration picks up later.
pub async fn run_start(app: &App, ids: &[i64]) -> Result<()> {
    let socket = control_socket::socket_path()?;
    let mut via_daemon = true;
    for &id in ids {
        match control_socket::send_command(&socket, &format!("start {id}")).await? {
            Some(reply) => println!("job {id}: {reply}"),
            None => {
                via_daemon = false;
                match app.service.start_job(id).await {
                    Ok(_) => println!("job {id}: queued"),
                    Err(err) => println!("job {id}: failed ({err:#})"),
                }
            }
        }
    }
    if !via_daemon {
        println!("note: no daemon running; jobs will generate once `vgen run` is active");
    }
    Ok(())
}

pub async fn run_cancel(app: &App, ids: &[i64]) -> Result<()> {
    let socket = control_socket::socket_path()?;
    for &id in ids {
        match control_socket::send_command(&socket, &format!("cancel {id}")).await? {
            Some(reply) => println!("job {id}: {reply}"),
            None => match app.service.cancel_job(id).await {
                Ok(_) => println!("job {id}: cancelled"),
                Err(err) => println!("job {id}: failed ({err:#})"),
            },
        }
    }
    Ok(())
}

pub async fn run_retry(app: &App, ids: &[i64], stage: Option<&str>) -> Result<()> {
    if let Some(stage) = stage {
        let [id] = ids else {
            bail!("--stage retries exactly one job");
        };
        let _ = parse_stage(stage)?;
        let socket = control_socket::socket_path()?;
        match control_socket::send_command(&socket, &format!("retry-stage {id} {stage}")).await? {
            Some(reply) => println!("job {id}: {reply}"),
            None => bail!("stage retry needs a running daemon (`vgen run`)"),
        }
        return Ok(());
    }

    let outcomes = app.service.bulk_retry(ids).await;
    report("reset to pending", &outcomes);
    Ok(())
}

pub async fn run_remove(app: &App, ids: &[i64]) -> Result<()> {
    let outcomes = app.service.bulk_delete(ids).await;
    report("removed", &outcomes);
    Ok(())
}

fn parse_stage(stage: &str) -> Result<TaskType> {
    match stage {
        "generate" => Ok(TaskType::Generate),
        "poll" => Ok(TaskType::Poll),
        "download" => Ok(TaskType::Download),
        other => bail!("unknown stage {other:?} (expected generate, poll, or download)"),
    }
}
