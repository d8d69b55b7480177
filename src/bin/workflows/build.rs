use std::path::PathBuf;

use anyhow::Result;
use artifact_hub::{BuildRequest, DockerCli, HubConfig, Interrupt, Orchestrator};

pub(crate) fn build(
    config: &HubConfig,
    package: &str,
    version: &str,
    arch: &str,
    output_dir: Option<PathBuf>,
) -> Result<i32> {
    let request = BuildRequest::new(package, version, arch)?;

    let mut build_config = config.build.clone();
    if let Some(dir) = output_dir {
        build_config.output_dir = dir;
    }

    let interrupt = Interrupt::install_signal_handlers()?;
    let backend = DockerCli::new(&build_config.backend);
    let outcome = Orchestrator::new(&build_config, &backend, interrupt).run_build(&request)?;

    println!("[build:{}] {}", request.artifact_stem(), outcome.archive.display());
    println!("[build:{}] {}", request.artifact_stem(), outcome.metadata.display());
    if let Some(report) = &outcome.verification {
        println!(
            "[build:{}] verified sha256 {} ({} members)",
            request.artifact_stem(),
            report.archive_sha256,
            report.members_checked
        );
    }
    Ok(0)
}
