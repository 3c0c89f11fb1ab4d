use anyhow::{bail, Result};
use deploy_tracker::engine::DONE_TEXT;
use deploy_tracker::steps::Step;
use deploy_tracker::{TrackerHandle, TrackerView};

/// Print progress from the view until the tracker is idle again.
///
/// Only a completed operation (forced to 100%) counts as success; any other
/// way back to idle ends with the status text as the error.
pub async fn follow(handle: &TrackerHandle, quiet: bool) -> Result<()> {
    let mut rx = handle.subscribe();
    let mut printer = ProgressPrinter::default();

    let view = loop {
        let view = rx.borrow_and_update().clone();
        if !quiet {
            printer.render(&view);
        }
        if view.idle {
            break view;
        }
        if rx.changed().await.is_err() {
            bail!("Tracker stopped before the operation finished");
        }
    };

    let warning = finished(&view)?;
    println!("{}", DONE_TEXT);
    if let Some(warning) = warning {
        eprintln!("Warning: {}", warning);
    }
    if let Some(url) = &view.logs_url {
        println!("   Logs: {}", url);
    }
    if let Some(platform) = &view.platform {
        let apps: Vec<&str> = platform
            .deployed_application_ids
            .iter()
            .map(String::as_str)
            .collect();
        println!(
            "   Platform {}: {}",
            platform.effective_namespace(),
            if apps.is_empty() {
                "no applications".to_string()
            } else {
                apps.join(", ")
            }
        );
    }
    Ok(())
}

/// Completion is the forced 100%. After that the status text may belong to
/// the platform refresh, which is reported as a warning, not as the result.
fn finished(view: &TrackerView) -> Result<Option<&str>> {
    if view.progress < 100 {
        bail!("{}", view.status);
    }
    if view.status == DONE_TEXT {
        Ok(None)
    } else {
        Ok(Some(view.status.as_str()))
    }
}

#[derive(Default)]
struct ProgressPrinter {
    status: String,
    steps: Vec<Step>,
    logs_shown: usize,
}

impl ProgressPrinter {
    fn render(&mut self, view: &TrackerView) {
        for step in &view.steps {
            let previous = self.steps.iter().find(|s| s.id == step.id);
            if previous.map(|p| p.status) != Some(step.status) {
                println!("   {:<12} {}", step.id, step.status);
            }
        }
        self.steps = view.steps.clone();

        // Log batches are cumulative; a shorter batch means it was replaced.
        if view.logs.len() < self.logs_shown {
            self.logs_shown = 0;
        }
        for entry in &view.logs[self.logs_shown..] {
            println!("   | {} {}", entry.timestamp.format("%H:%M:%S"), entry.line);
        }
        self.logs_shown = view.logs.len();

        if view.status != self.status {
            println!("[{:>3}%] {}", view.progress, view.status);
            self.status = view.status.clone();
        }
    }
}
