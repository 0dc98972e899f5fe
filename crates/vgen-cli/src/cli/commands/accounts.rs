//! `vgen accounts` – import, list, and credit-scan accounts.

use anyhow::Result;

use crate::cli::{AccountsCommand, App};

pub async fn run_accounts(app: &App, command: AccountsCommand) -> Result<()> {
    match command {
        AccountsCommand::List => {
            let accounts = app.service.list_accounts().await?;
            if accounts.is_empty() {
                println!("No accounts.");
                return Ok(());
            }
            println!(
                "{:<6} {:<30} {:<15} {:>8} {}",
                "ID", "EMAIL", "STATUS", "CREDITS", "DEVICE"
            );
            for acc in accounts {
                println!(
                    "{:<6} {:<30} {:<15} {:>8} {}",
                    acc.id,
                    acc.email,
                    acc.status.as_str(),
                    acc.credits_remaining,
                    acc.session.device_id.as_deref().unwrap_or("-")
                );
            }
        }
        AccountsCommand::Add {
            email,
            password,
            token,
            credits,
        } => {
            let id = app
                .service
                .import_account(&email, password.as_deref(), token.as_deref(), credits)
                .await?;
            println!("imported account {id} ({email})");
        }
        AccountsCommand::Credits => {
            let scans = app.service.scan_credits().await?;
            if scans.is_empty() {
                println!("No live accounts to scan.");
                return Ok(());
            }
            let mut total = 0i64;
            for scan in &scans {
                match &scan.credits {
                    Ok(credits) => {
                        total += credits;
                        println!("account {} ({}): {credits} credits", scan.account_id, scan.email);
                    }
                    Err(err) => {
                        println!("account {} ({}): scan failed ({err:#})", scan.account_id, scan.email);
                    }
                }
            }
            println!("total credits across live accounts: {total}");
        }
    }
    Ok(())
}
