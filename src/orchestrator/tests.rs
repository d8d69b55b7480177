use super::*;
use crate::error::{
    exit_code_for, EXIT_ENVIRONMENT_SETUP, EXIT_ENVIRONMENT_UNAVAILABLE, EXIT_INTERRUPTED,
    EXIT_VERIFICATION,
};
use crate::packager::{collect_inputs, PackageSpec};
use anyhow::bail;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    /// Recipe packages one binary and exits 0.
    Succeed,
    /// Recipe exits 0 without writing anything.
    SucceedEmpty,
    /// Recipe exits with this code.
    Fail(i32),
    /// Recipe never exits; a signal arrives after a few polls.
    HangUntilSignal,
    /// Image build fails after leaving a partial image behind.
    BrokenImage,
    /// A signal arrives during the image build.
    SignalDuringImageBuild,
    /// Like `HangUntilSignal`, but stopping the container fails.
    HangUnkillable,
}

#[derive(Default)]
struct State {
    images: BTreeSet<String>,
    containers: BTreeSet<String>,
    built: Vec<String>,
    started: Vec<RunSpec>,
    killed: Vec<String>,
}

struct FakeBackend {
    state: Rc<RefCell<State>>,
    behavior: Behavior,
    available: bool,
    interrupt: Interrupt,
}

impl FakeBackend {
    fn new(behavior: Behavior, interrupt: &Interrupt) -> Self {
        Self {
            state: Rc::default(),
            behavior,
            available: true,
            interrupt: interrupt.clone(),
        }
    }

    fn leftovers(&self) -> (usize, usize) {
        let state = self.state.borrow();
        (state.images.len(), state.containers.len())
    }
}

impl ContainerBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn check_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            bail!("fake daemon is down")
        }
    }

    fn build_image(&self, tag: &str, definition: &Path, context: &Path) -> Result<()> {
        assert!(definition.is_file());
        assert!(context.is_dir());
        let mut state = self.state.borrow_mut();
        state.built.push(tag.to_string());
        state.images.insert(tag.to_string());
        match self.behavior {
            Behavior::BrokenImage => bail!("step 3/7 failed"),
            Behavior::SignalDuringImageBuild => {
                self.interrupt.trigger();
                bail!("build cancelled")
            }
            _ => Ok(()),
        }
    }

    fn start(&self, spec: &RunSpec) -> Result<Box<dyn Execution>> {
        let mut state = self.state.borrow_mut();
        assert!(state.images.contains(&spec.image), "image must exist first");
        state.containers.insert(spec.container_name.clone());
        state.started.push(spec.clone());
        Ok(Box::new(FakeExecution {
            spec: spec.clone(),
            behavior: self.behavior,
            polls: 0,
            state: Rc::clone(&self.state),
            interrupt: self.interrupt.clone(),
        }))
    }

    fn remove_container(&self, name: &str) -> Result<()> {
        self.state.borrow_mut().containers.remove(name);
        Ok(())
    }

    fn remove_image(&self, tag: &str) -> Result<()> {
        self.state.borrow_mut().images.remove(tag);
        Ok(())
    }

    fn container_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.borrow().containers.contains(name))
    }

    fn image_exists(&self, tag: &str) -> Result<bool> {
        Ok(self.state.borrow().images.contains(tag))
    }
}

struct FakeExecution {
    spec: RunSpec,
    behavior: Behavior,
    polls: u32,
    state: Rc<RefCell<State>>,
    interrupt: Interrupt,
}

impl FakeExecution {
    fn env(&self, key: &str) -> &str {
        self.spec
            .env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .unwrap()
    }

    /// What a recipe's `dist` target does.
    fn package_outputs(&self) {
        let out = &self
            .spec
            .mounts
            .iter()
            .find(|m| m.target == OUT_MOUNT)
            .unwrap()
            .host;
        let work = TempDir::new().unwrap();
        let binary = work.path().join("tor");
        fs::write(&binary, b"static tor").unwrap();
        let inputs = collect_inputs(&[binary], None).unwrap();
        packager::package(
            &PackageSpec {
                package: "tor",
                version: self.env("VERSION"),
                arch: self.env("ARCH"),
            },
            &inputs,
            out,
        )
        .unwrap();
    }
}

impl Execution for FakeExecution {
    fn try_wait(&mut self) -> Result<Option<i32>> {
        self.polls += 1;
        match self.behavior {
            Behavior::Succeed => {
                self.package_outputs();
                Ok(Some(0))
            }
            Behavior::SucceedEmpty => Ok(Some(0)),
            Behavior::Fail(code) => Ok(Some(code)),
            Behavior::HangUntilSignal | Behavior::HangUnkillable => {
                if self.polls == 3 {
                    self.interrupt.trigger();
                }
                Ok(None)
            }
            Behavior::BrokenImage | Behavior::SignalDuringImageBuild => {
                unreachable!("container never starts")
            }
        }
    }

    fn kill(&mut self) -> Result<()> {
        if self.behavior == Behavior::HangUnkillable {
            bail!("daemon stopped responding");
        }
        self.state
            .borrow_mut()
            .killed
            .push(self.spec.container_name.clone());
        Ok(())
    }
}

struct Fixture {
    _tmp: TempDir,
    config: BuildConfig,
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let recipes = tmp.path().join("recipes");
    fs::create_dir_all(&recipes).unwrap();
    fs::write(recipes.join("tor.mk"), "all:\n\t@true\n").unwrap();
    let env_dir = tmp.path().join("build-env");
    fs::create_dir_all(&env_dir).unwrap();
    fs::write(env_dir.join("Dockerfile"), "FROM alpine:3.19\n").unwrap();

    let config = BuildConfig {
        backend: "fake".to_string(),
        environment: env_dir.join("Dockerfile"),
        context: tmp.path().to_path_buf(),
        recipes_dir: recipes,
        output_dir: tmp.path().join("dist"),
        image_prefix: "test".to_string(),
        verify_outputs: true,
        poll_interval: Duration::from_millis(1),
    };
    Fixture { _tmp: tmp, config }
}

fn tor_request() -> BuildRequest {
    BuildRequest::new("tor", "tor-0.4.8.12", "x86_64").unwrap()
}

fn output_listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn successful_build_leaves_two_files_and_no_environment() {
    let fx = fixture();
    let interrupt = Interrupt::manual();
    let backend = FakeBackend::new(Behavior::Succeed, &interrupt);

    let outcome = Orchestrator::new(&fx.config, &backend, interrupt)
        .run_build(&tor_request())
        .unwrap();

    assert_eq!(
        output_listing(&fx.config.output_dir),
        vec!["tor-x86_64.metadata.json", "tor-x86_64.tar.gz"]
    );
    assert_eq!(backend.leftovers(), (0, 0));
    let report = outcome.verification.unwrap();
    assert_eq!(report.members_checked, 1);
    assert!(outcome.environment.as_str().starts_with("test-tor-"));
}

#[test]
fn container_gets_recipe_read_only_and_output_read_write() {
    let fx = fixture();
    let interrupt = Interrupt::manual();
    let backend = FakeBackend::new(Behavior::Succeed, &interrupt);
    Orchestrator::new(&fx.config, &backend, interrupt)
        .run_build(&tor_request())
        .unwrap();

    let state = backend.state.borrow();
    let spec = &state.started[0];
    assert_eq!(spec.image, format!("{}:build", spec.container_name));

    let recipe = spec.mounts.iter().find(|m| m.target == RECIPE_MOUNT).unwrap();
    assert!(recipe.read_only);
    assert!(recipe.host.ends_with("recipes/tor.mk"));
    let out = spec.mounts.iter().find(|m| m.target == OUT_MOUNT).unwrap();
    assert!(!out.read_only);
    assert!(out.host.is_absolute());

    assert_eq!(&spec.command[..4], &["make", "-f", RECIPE_MOUNT, "all"]);
    assert!(spec.command.contains(&"VERSION=tor-0.4.8.12".to_string()));
    assert!(spec
        .env
        .contains(&("OUT_DIR".to_string(), OUT_MOUNT.to_string())));
}

#[test]
fn recipe_failure_propagates_code_and_cleans_up() {
    let fx = fixture();
    let interrupt = Interrupt::manual();
    let backend = FakeBackend::new(Behavior::Fail(2), &interrupt);

    let err = Orchestrator::new(&fx.config, &backend, interrupt)
        .run_build(&tor_request())
        .unwrap_err();

    assert_eq!(exit_code_for(&err, 1), 2);
    assert_eq!(backend.leftovers(), (0, 0));
    assert_eq!(backend.state.borrow().built.len(), 1);
}

#[test]
fn interruption_kills_container_and_cleans_up() {
    let fx = fixture();
    let interrupt = Interrupt::manual();
    let backend = FakeBackend::new(Behavior::HangUntilSignal, &interrupt);

    let err = Orchestrator::new(&fx.config, &backend, interrupt)
        .run_build(&tor_request())
        .unwrap_err();

    assert_eq!(exit_code_for(&err, 1), EXIT_INTERRUPTED);
    assert_eq!(backend.leftovers(), (0, 0));
    assert_eq!(backend.state.borrow().killed.len(), 1);
    // The lock file is gone too.
    assert!(output_listing(&fx.config.output_dir).is_empty());
}

#[test]
fn interruption_during_image_build_cleans_up() {
    let fx = fixture();
    let interrupt = Interrupt::manual();
    let backend = FakeBackend::new(Behavior::SignalDuringImageBuild, &interrupt);

    let err = Orchestrator::new(&fx.config, &backend, interrupt)
        .run_build(&tor_request())
        .unwrap_err();

    assert_eq!(exit_code_for(&err, 1), EXIT_INTERRUPTED);
    assert_eq!(backend.leftovers(), (0, 0));
    assert!(backend.state.borrow().started.is_empty());
}

#[test]
fn broken_image_is_setup_error_and_cleans_up() {
    let fx = fixture();
    let interrupt = Interrupt::manual();
    let backend = FakeBackend::new(Behavior::BrokenImage, &interrupt);

    let err = Orchestrator::new(&fx.config, &backend, interrupt)
        .run_build(&tor_request())
        .unwrap_err();

    assert_eq!(exit_code_for(&err, 1), EXIT_ENVIRONMENT_SETUP);
    assert_eq!(backend.leftovers(), (0, 0));
}

#[test]
fn missing_recipe_creates_nothing() {
    let fx = fixture();
    let interrupt = Interrupt::manual();
    let backend = FakeBackend::new(Behavior::Succeed, &interrupt);
    let request = BuildRequest::new("wghttp", "v1.0.0", "x86_64").unwrap();

    let err = Orchestrator::new(&fx.config, &backend, interrupt)
        .run_build(&request)
        .unwrap_err();

    assert_eq!(exit_code_for(&err, 1), EXIT_ENVIRONMENT_UNAVAILABLE);
    assert!(err.to_string().contains("no recipe for package 'wghttp'"));
    assert!(backend.state.borrow().built.is_empty());
    assert!(!fx.config.output_dir.exists());
}

#[test]
fn unavailable_backend_creates_nothing() {
    let fx = fixture();
    let interrupt = Interrupt::manual();
    let mut backend = FakeBackend::new(Behavior::Succeed, &interrupt);
    backend.available = false;

    let err = Orchestrator::new(&fx.config, &backend, interrupt)
        .run_build(&tor_request())
        .unwrap_err();

    assert_eq!(exit_code_for(&err, 1), EXIT_ENVIRONMENT_UNAVAILABLE);
    assert!(err.to_string().contains("fake daemon is down"));
    assert!(backend.state.borrow().built.is_empty());
}

#[test]
fn busy_output_directory_creates_nothing() {
    let fx = fixture();
    let interrupt = Interrupt::manual();
    let backend = FakeBackend::new(Behavior::Succeed, &interrupt);
    let _held = OutputLock::acquire(&fx.config.output_dir).unwrap();

    let err = Orchestrator::new(&fx.config, &backend, interrupt)
        .run_build(&tor_request())
        .unwrap_err();

    assert_eq!(exit_code_for(&err, 1), EXIT_ENVIRONMENT_UNAVAILABLE);
    assert!(backend.state.borrow().built.is_empty());
}

#[test]
fn recipe_without_outputs_fails_verification() {
    let fx = fixture();
    let interrupt = Interrupt::manual();
    let backend = FakeBackend::new(Behavior::SucceedEmpty, &interrupt);

    let err = Orchestrator::new(&fx.config, &backend, interrupt)
        .run_build(&tor_request())
        .unwrap_err();

    assert_eq!(exit_code_for(&err, 1), EXIT_VERIFICATION);
    assert_eq!(backend.leftovers(), (0, 0));
}

#[test]
fn verification_can_be_disabled() {
    let mut fx = fixture();
    fx.config.verify_outputs = false;
    let interrupt = Interrupt::manual();
    let backend = FakeBackend::new(Behavior::SucceedEmpty, &interrupt);

    let outcome = Orchestrator::new(&fx.config, &backend, interrupt)
        .run_build(&tor_request())
        .unwrap();
    assert!(outcome.verification.is_none());
}

#[test]
fn metadata_for_other_version_fails_verification() {
    let fx = fixture();
    let interrupt = Interrupt::manual();
    let backend = FakeBackend::new(Behavior::Succeed, &interrupt);
    Orchestrator::new(&fx.config, &backend, interrupt)
        .run_build(&tor_request())
        .unwrap();

    let other = BuildRequest::new("tor", "tor-0.4.9.1", "x86_64").unwrap();
    let metadata = fx.config.output_dir.join("tor-x86_64.metadata.json");
    let err = verify_outputs(&other, &metadata).unwrap_err();
    assert!(err.to_string().contains("records version 'tor-0.4.8.12'"));
}

#[test]
fn failed_kill_still_reports_interruption() {
    let fx = fixture();
    let interrupt = Interrupt::manual();
    let backend = FakeBackend::new(Behavior::HangUnkillable, &interrupt);

    let err = Orchestrator::new(&fx.config, &backend, interrupt)
        .run_build(&tor_request())
        .unwrap_err();

    assert_eq!(exit_code_for(&err, 1), EXIT_INTERRUPTED);
    assert_eq!(backend.leftovers(), (0, 0));
}

#[test]
fn stale_artifacts_do_not_satisfy_a_silent_recipe() {
    let fx = fixture();
    let interrupt = Interrupt::manual();
    let backend = FakeBackend::new(Behavior::Succeed, &interrupt);
    Orchestrator::new(&fx.config, &backend, interrupt)
        .run_build(&tor_request())
        .unwrap();

    let interrupt = Interrupt::manual();
    let backend = FakeBackend::new(Behavior::SucceedEmpty, &interrupt);
    let err = Orchestrator::new(&fx.config, &backend, interrupt)
        .run_build(&tor_request())
        .unwrap_err();

    assert_eq!(exit_code_for(&err, 1), EXIT_VERIFICATION);
    assert!(output_listing(&fx.config.output_dir).is_empty());
}
