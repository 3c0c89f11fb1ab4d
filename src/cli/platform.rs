use anyhow::{bail, Result};
use deploy_tracker::remote::{PlatformRecord, RemoteService};
use deploy_tracker::TrackerHandle;

/// Load a platform through the tracker and wait for the result.
pub async fn load(handle: &TrackerHandle, namespace: Option<String>) -> Result<PlatformRecord> {
    if !handle.load_platform(namespace).await {
        tracing::debug!("Platform load skipped, using the current record");
    }
    let Some(view) = handle.wait_for(|v| v.idle).await else {
        bail!("Tracker stopped while loading the platform");
    };
    if view.status.starts_with("Error loading platform") {
        bail!("{}", view.status);
    }
    match view.platform {
        Some(record) => Ok(record),
        None => bail!("No platform found"),
    }
}

pub async fn list(remote: &dyn RemoteService) -> Result<()> {
    let platforms = remote.platforms().await?;
    if platforms.is_empty() {
        println!("No platforms.");
        return Ok(());
    }
    println!("{:<24} {:<12} {:<28} APPS", "NAMESPACE", "STATUS", "OWNER");
    for p in &platforms {
        let apps: Vec<&str> = p.deployed_application_ids.iter().map(String::as_str).collect();
        println!(
            "{:<24} {:<12} {:<28} {}",
            p.effective_namespace(),
            p.status,
            p.owner_email,
            apps.join(",")
        );
    }
    Ok(())
}

pub fn print_record(record: &PlatformRecord) {
    println!("Platform: {}", record.effective_namespace());
    println!("   ID: {}", record.id);
    if !record.status.is_empty() {
        println!("   Status: {}", record.status);
    }
    if !record.owner_email.is_empty() {
        println!("   Owner: {}", record.owner_email);
    }
    if let Some(created) = &record.created_at {
        println!("   Created: {}", created);
    }
    if let Some(modified) = &record.last_modified_at {
        println!("   Last modified: {}", modified);
    }
    if record.deployed_application_ids.is_empty() {
        println!("   Applications: none");
    } else {
        let apps: Vec<&str> = record
            .deployed_application_ids
            .iter()
            .map(String::as_str)
            .collect();
        println!("   Applications: {}", apps.join(", "));
    }
}
