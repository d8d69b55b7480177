//! Reproducible static builds of upstream packages.
//!
//! Each package has a Makefile recipe. A build runs the recipe inside a
//! freshly created container environment that is always torn down
//! afterwards, and the recipe leaves a deterministic `.tar.gz` plus a JSON
//! metadata file with SHA-256 hashes in the output directory. A separate
//! tracker keeps the pinned upstream versions in `versions.json` current.
//!
//! - **Orchestrator** - validate, create environment, run recipe, tear down
//! - **Packager** - deterministic archive + metadata, and consumer-side verification
//! - **Version tracker** - stable-tag discovery and all-or-nothing pin updates
//!
//! # Architecture
//!
//! ```text
//! artifact-hub (binary)
//!     │
//!     ├── build ──────────► orchestrator ──► environment (ContainerBackend)
//!     │                         │               └── BuildEnvironment guard
//!     │                         ├── recipe (RecipeBook, make contract)
//!     │                         └── packager::verify
//!     │
//!     ├── package / verify ► packager
//!     │
//!     └── check-versions ──► versions ──► upstream (GitHub / GitLab tags)
//!                                └────► registry (versions.json)
//! ```
//!
//! Failures carry a [`HubError`] where the exit status matters; see
//! [`error`] for the table.

pub mod config;
pub mod env_id;
pub mod environment;
pub mod error;
pub mod interrupt;
pub mod io;
pub mod orchestrator;
pub mod output_lock;
pub mod packager;
pub mod preflight;
pub mod recipe;
pub mod request;
pub mod versions;

pub use config::HubConfig;
pub use environment::{BuildEnvironment, ContainerBackend, DockerCli};
pub use error::{exit_code_for, HubError};
pub use interrupt::Interrupt;
pub use orchestrator::{BuildOutcome, Orchestrator};
pub use packager::{ArtifactMetadata, VerificationReport};
pub use request::BuildRequest;
