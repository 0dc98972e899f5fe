//! `vgen add` – create a new draft job.

use anyhow::Result;
use std::path::Path;

use crate::cli::App;

pub async fn run_add(
    app: &App,
    prompt: &str,
    duration: i64,
    ratio: &str,
    image: Option<&Path>,
    start: bool,
) -> Result<()> {
    let image_path = match image {
        Some(src) => Some(app.service.stage_upload(src).await?),
        None => None,
    };

    let job = app
        .service
        .create_job(prompt, duration, ratio, image_path)
        .await?;
    println!("created job {} ({}s, {})", job.id, job.spec.duration, job.spec.aspect_ratio);

    if start {
        app.service.start_job(job.id).await?;
        println!("job {} queued for generation", job.id);
    }
    Ok(())
}
