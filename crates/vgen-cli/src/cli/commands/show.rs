//! `vgen show` – one job in full, including decoded task state.

use anyhow::{bail, Result};

use crate::cli::App;

pub async fn run_show(app: &App, id: i64) -> Result<()> {
    let Some(job) = app.service.get_job(id).await? else {
        bail!("job {id} not found");
    };

    println!("job {}", job.id);
    println!("  status:     {} ({}%)", job.progress.status.as_str(), job.progress.percent);
    println!("  prompt:     {}", job.spec.prompt);
    println!("  duration:   {}s", job.spec.duration);
    println!("  ratio:      {}", job.spec.aspect_ratio);
    if let Some(image) = &job.spec.image_path {
        println!("  image:      {image}");
    }
    if let Some(account_id) = job.account_id {
        println!("  account:    #{account_id}");
    }
    if let Some(err) = &job.progress.error_message {
        println!("  error:      {err}");
    }
    println!(
        "  retries:    {}/{}",
        job.progress.retry_count, job.progress.max_retries
    );
    if let Some(url) = &job.result.video_url {
        println!("  video url:  {url}");
    }
    if let Some(vid) = &job.result.video_id {
        println!("  video id:   {vid}");
    }
    if let Some(gen) = &job.result.generation_id {
        println!("  generation: {gen}");
    }
    if let Some(path) = &job.result.local_path {
        println!("  local path: {path}");
    }

    if let Some(state) = &job.task_state {
        println!("  tasks:");
        for (name, stage) in &state.tasks {
            let mut line = format!("    {name}: {}", stage.status);
            if let Some(task_id) = &stage.task_id {
                line.push_str(&format!(" (task {task_id})"));
            }
            if let Some(err) = &stage.error {
                line.push_str(&format!(" [{err}]"));
            }
            println!("{line}");
        }
        if let Some(current) = &state.current_task {
            println!("  current:    {current}");
        }
        if state.is_clean_video == Some(true) {
            println!("  clean:      yes");
        }
    }
    Ok(())
}
