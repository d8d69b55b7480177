use std::path::PathBuf;

use anyhow::Result;
use artifact_hub::versions::{CheckMode, HttpTagSource, TrackerOutcome, VersionTracker};
use artifact_hub::HubConfig;

pub(crate) fn check_versions(
    config: &HubConfig,
    check_only: bool,
    file: Option<PathBuf>,
) -> Result<i32> {
    let registry = file.unwrap_or_else(|| config.versions.registry.clone());
    let mode = if check_only {
        CheckMode::CheckOnly
    } else {
        CheckMode::Update
    };

    let source = HttpTagSource::new(
        &config.versions.user_agent,
        config.versions.timeout,
        config.versions.max_pages,
    )?;
    let outcome =
        VersionTracker::new(&config.versions, &config.upstreams, &source).check(&registry, mode)?;

    match &outcome {
        TrackerOutcome::UpToDate => println!("All packages are up to date."),
        TrackerOutcome::UpdatesAvailable(updates) => {
            println!("Updates available:");
            for u in updates {
                println!("- {}: {} -> {}", u.package, u.pinned, u.latest);
            }
        }
        TrackerOutcome::Updated(updates) => {
            println!("Updated {}:", registry.display());
            for u in updates {
                println!("- {}: {} -> {}", u.package, u.pinned, u.latest);
            }
        }
    }
    Ok(outcome.exit_code())
}
