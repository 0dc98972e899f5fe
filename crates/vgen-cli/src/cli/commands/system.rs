//! Admin commands: queue-status, pause, resume, reset, reset-stale,
//! restart-workers. Forwarded to the running daemon over the control
//! socket; some fall back to direct database operations when no daemon is
//! up.

use anyhow::{bail, Result};

use crate::cli::control_socket;
use crate::cli::App;

pub async fn run_queue_status(app: &App) -> Result<()> {
    let socket = control_socket::socket_path()?;
    if let Some(reply) = control_socket::send_command(&socket, "status").await? {
        println!("{reply}");
        return Ok(());
    }

    // No daemon: queues don't exist, but the database still does.
    let db = app.store.db_stats().await?;
    let accounts = app.store.account_stats().await?;
    println!("daemon: not running");
    println!(
        "db: completed={} pending={} failed={} processing={}",
        db.completed, db.pending, db.failed, db.processing
    );
    println!(
        "accounts: total={} with_credits={}",
        accounts.total, accounts.with_credits
    );
    Ok(())
}

pub async fn run_system(app: &App, command: &str) -> Result<()> {
    let socket = control_socket::socket_path()?;
    if let Some(reply) = control_socket::send_command(&socket, command).await? {
        println!("{reply}");
        return Ok(());
    }

    match command {
        "reset" => {
            // Leases and the active set live in the daemon; with none
            // running only the database rows need resetting.
            let n = app.store.reset_active_jobs().await?;
            println!("no daemon running; reset {n} in-flight jobs to pending");
            Ok(())
        }
        "reset-stale" => {
            let n = app.store.reset_stale_jobs(app.cfg.stale_cutoff_minutes).await?;
            println!("reset {n} stale jobs");
            Ok(())
        }
        "pause" | "resume" | "restart-workers" => {
            bail!("{command} needs a running daemon (`vgen run`)")
        }
        other => bail!("unknown system command {other:?}"),
    }
}
