use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use artifact_hub::error::{exit_code_for, EXIT_USAGE, EXIT_VERSION_CHECK};
use artifact_hub::HubConfig;
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};

mod workflows;

#[derive(Parser)]
#[command(name = "artifact-hub")]
#[command(version, about = "Reproducible static builds in disposable containers", long_about = None)]
struct Cli {
    /// Configuration file (default: ./artifact-hub.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build one package in a fresh environment
    Build {
        package: String,
        version: String,
        arch: String,
        /// Write artifacts here instead of the configured output directory
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Compare pinned versions with upstream and update stale pins
    CheckVersions {
        /// Report only; exit 1 if any pin is stale
        #[arg(long)]
        check_only: bool,
        /// Version registry (default: from config)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Pack build outputs into an archive plus metadata
    Package {
        #[arg(long)]
        package: String,
        #[arg(long)]
        version: String,
        #[arg(long)]
        arch: String,
        #[arg(long)]
        out_dir: PathBuf,
        /// Store members relative to this directory
        #[arg(long)]
        strip_prefix: Option<PathBuf>,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Re-hash an archive and its members against a metadata file
    Verify { metadata: PathBuf },
    /// List available recipes and check their targets
    Recipes,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<OsString> = std::env::args_os().collect();
    exit_status(execute(&args))
}

fn execute(args: &[OsString]) -> i32 {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => parse_failure_code(args),
            };
        }
    };

    // check-versions reports every unclassified failure as 2.
    let fallback = match cli.command {
        Command::CheckVersions { .. } => EXIT_VERSION_CHECK,
        _ => 1,
    };

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code_for(&err, fallback)
        }
    }
}

/// Exit code for a command line clap rejected: 2 for `check-versions`,
/// the usage code for everything else.
fn parse_failure_code(args: &[OsString]) -> i32 {
    let mut rest = args.iter().skip(1);
    while let Some(arg) = rest.next() {
        let arg = arg.to_string_lossy();
        if arg == "--config" {
            rest.next();
            continue;
        }
        if arg.starts_with('-') {
            continue;
        }
        return if arg == "check-versions" {
            EXIT_VERSION_CHECK
        } else {
            EXIT_USAGE
        };
    }
    EXIT_USAGE
}

fn run(cli: Cli) -> Result<i32> {
    let config = HubConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Build {
            package,
            version,
            arch,
            output_dir,
        } => workflows::build(&config, &package, &version, &arch, output_dir),
        Command::CheckVersions { check_only, file } => {
            workflows::check_versions(&config, check_only, file)
        }
        Command::Package {
            package,
            version,
            arch,
            out_dir,
            strip_prefix,
            files,
        } => workflows::package(
            &package,
            &version,
            &arch,
            &out_dir,
            strip_prefix.as_deref(),
            &files,
        ),
        Command::Verify { metadata } => workflows::verify(&metadata),
        Command::Recipes => workflows::list_recipes(&config),
    }
}

fn exit_status(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    /// Config whose output directory shows whether a build got anywhere.
    fn config(tmp: &TempDir) -> PathBuf {
        let path = tmp.path().join("artifact-hub.toml");
        fs::write(
            &path,
            "[build]\nbackend = \"no_such_container_cli_98765\"\noutput_dir = \"dist\"\n",
        )
        .unwrap();
        path
    }

    #[test]
    fn build_with_two_arguments_is_usage_error() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let cfg = cfg.to_str().unwrap();

        assert!(Cli::try_parse_from(args(&["artifact-hub", "build", "tor", "v1"])).is_err());
        let code = execute(&args(&["artifact-hub", "--config", cfg, "build", "tor", "v1"]));

        assert_eq!(code, EXIT_USAGE);
        assert!(!tmp.path().join("dist").exists());
    }

    #[test]
    fn build_with_empty_argument_is_usage_error() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let code = execute(&args(&[
            "artifact-hub",
            "--config",
            cfg.to_str().unwrap(),
            "build",
            "tor",
            "",
            "x86_64",
        ]));

        assert_eq!(code, EXIT_USAGE);
        assert!(!tmp.path().join("dist").exists());
    }

    #[test]
    fn check_versions_bad_flag_exits_two() {
        let argv = args(&["artifact-hub", "check-versions", "--bogus"]);
        assert!(Cli::try_parse_from(&argv).is_err());
        assert_eq!(execute(&argv), EXIT_VERSION_CHECK);

        let argv = args(&["artifact-hub", "--config", "x.toml", "check-versions", "--file"]);
        assert_eq!(parse_failure_code(&argv), EXIT_VERSION_CHECK);
    }

    #[test]
    fn other_bad_flags_are_usage_errors() {
        assert_eq!(execute(&args(&["artifact-hub", "verify"])), EXIT_USAGE);
        assert_eq!(execute(&args(&["artifact-hub", "--bogus"])), EXIT_USAGE);
        assert_eq!(execute(&args(&["artifact-hub", "--help"])), 0);
    }
}
