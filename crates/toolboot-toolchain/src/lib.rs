//! Download, verify, extract, build and record pinned build tools.

pub mod archive;
pub mod artifacts;
pub mod bootstrap;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod generate;
mod hashing;
pub mod manifest;
pub mod platform;
pub mod process;
pub mod provenance;
pub mod resolve;
pub mod state;
pub mod template;
pub mod tools;
pub mod verify;

pub use bootstrap::{BootstrapFailure, BootstrapReport, BootstrapResult, BuildInputs, Outcome};
pub use config::{Settings, Sources};
pub use coordinator::{Coordinator, PinnedDownload};
pub use error::{Error, Result};
pub use generate::GenerateReport;
pub use resolve::{ExecutableSource, GoToolchain, ResolvedTool};
pub use state::{Registry, ToolRecord};
pub use tools::{Tool, ToolSpec};
