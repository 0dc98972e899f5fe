//! `vgen list` – tabular job listing.

use anyhow::{bail, Result};

use vgen_core::store::JobCategory;

use crate::cli::App;

pub async fn run_list(
    app: &App,
    category: Option<&str>,
    skip: i64,
    limit: i64,
) -> Result<()> {
    let category = match category {
        None => None,
        Some("active") => Some(JobCategory::Active),
        Some("history") => Some(JobCategory::History),
        Some(other) => bail!("unknown category {other:?} (expected active or history)"),
    };

    let jobs = app.service.list_jobs(skip, limit, category).await?;
    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }

    println!("{:<6} {:<11} {:>4} {:<9} {}", "ID", "STATUS", "PCT", "RATIO", "PROMPT");
    for job in jobs {
        let mut prompt: String = job.spec.prompt.chars().take(60).collect();
        if prompt.len() < job.spec.prompt.len() {
            prompt.push_str("...");
        }
        println!(
            "{:<6} {:<11} {:>3}% {:<9} {}",
            job.id,
            job.progress.status.as_str(),
            job.progress.percent,
            job.spec.aspect_ratio,
            prompt
        );
    }
    Ok(())
}
