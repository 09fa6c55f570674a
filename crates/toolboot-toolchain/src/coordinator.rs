//! Cross-tool sequencing. Tools are bootstrapped one at a time against a
//! single in-memory registry that is written back after each install.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use reqwest::Client;
use tracing::{info, warn};

use crate::artifacts;
use crate::bootstrap::{
    self, Bootstrap, BootstrapFailure, BootstrapResult, BuildInputs, Progress,
};
use crate::config::{manifest_key, Settings};
use crate::error::{Error, Result};
use crate::generate::{self, GenerateReport};
use crate::manifest::{self, manifest_entry_for, ToolDownloads};
use crate::process;
use crate::resolve::{
    download_target, go_executable, go_version_needed, resolve_go, resolve_tool, GoToolchain,
    ResolvedTool,
};
use crate::state::{read_registry, Registry};
use crate::tools::{Tool, ToolSpec};

/// An archive newly recorded in the download manifest.
#[derive(Debug)]
pub struct PinnedDownload {
    pub file: PathBuf,
    /// The block appended to the manifest.
    pub entry: String,
}

pub struct Coordinator {
    settings: Settings,
    registry: Registry,
    client: Client,
}

impl Coordinator {
    pub fn new(settings: Settings) -> Result<Self> {
        let client = artifacts::http_client(&settings.user_agent)?;
        Self::with_client(settings, client)
    }

    pub fn with_client(settings: Settings, client: Client) -> Result<Self> {
        let registry = read_registry(&settings.directories.toolchain_dir)?;
        Ok(Self {
            settings,
            registry,
            client,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn resolve(&self, tool: Tool) -> Result<ResolvedTool> {
        resolve_tool(
            &tool.spec(),
            &self.settings.config.overrides(tool),
            self.settings.manifest.section(manifest_key(tool)),
            &self.registry,
            &self.settings,
        )
    }

    /// The Go toolchain for go-capnp. When the GOPATH template needs a
    /// version the registry does not have, the toolchain is asked for it.
    pub async fn resolve_go(&self) -> Result<GoToolchain> {
        let config = &self.settings.config.go;
        let detected = if go_version_needed(config, &self.registry) {
            detect_go_version(&go_executable(config, &self.registry, &self.settings)).await
        } else {
            None
        };
        resolve_go(config, &self.registry, &self.settings, detected.as_deref())
    }

    /// Bootstrap one tool, pulling in whatever its build step needs.
    pub async fn bootstrap_tool(&mut self, tool: Tool) -> BootstrapResult {
        match tool {
            Tool::BpfAsm => self.bootstrap_bpf_asm().await,
            Tool::GoCapnp => self.bootstrap_go_capnp().await,
            other => self.bootstrap_with(other, BuildInputs::default()).await,
        }
    }

    /// Bison and Flex first, then bpf_asm built against them. A pinned or
    /// already installed bpf_asm is settled without touching its
    /// dependencies.
    pub async fn bootstrap_bpf_asm(&mut self) -> BootstrapResult {
        let mut progress = Progress::new(Tool::BpfAsm.key());
        let resolved = match self.resolve(Tool::BpfAsm) {
            Ok(resolved) => resolved,
            Err(error) => return Err(progress.fail(error)),
        };
        if !bootstrap::needs_install(&resolved) {
            return self
                .bootstrap_spec(&Tool::BpfAsm.spec(), &resolved, &BuildInputs::default())
                .await;
        }
        for dependency in Tool::BpfAsm.dependencies() {
            match self.bootstrap_with(*dependency, BuildInputs::default()).await {
                Ok(report) => progress.extend(report.messages),
                Err(failure) => {
                    progress.extend(failure.messages);
                    progress.note(format!("{}: {}", dependency.display_name(), failure.error));
                    return Err(progress.fail(dependency_error(Tool::BpfAsm, *dependency)));
                }
            }
        }
        let inputs = match self.lex_yacc() {
            Ok(inputs) => inputs,
            Err(error) => return Err(progress.fail(error)),
        };
        prefix_messages(progress, self.bootstrap_with(Tool::BpfAsm, inputs).await)
    }

    pub async fn bootstrap_go_capnp(&mut self) -> BootstrapResult {
        if !self.needs_install(Tool::GoCapnp) {
            return self
                .bootstrap_with(Tool::GoCapnp, BuildInputs::default())
                .await;
        }
        let go = self
            .resolve_go()
            .await
            .map_err(|error| Progress::new(Tool::GoCapnp.key()).fail(error))?;
        let inputs = BuildInputs {
            go: Some(go),
            lex_yacc: None,
        };
        self.bootstrap_with(Tool::GoCapnp, inputs).await
    }

    /// Every tool in dependency order. Independent failures do not stop the
    /// run; tools depending on a failed tool are not attempted.
    pub async fn bootstrap_all(&mut self) -> Vec<BootstrapResult> {
        let mut failed: BTreeSet<Tool> = BTreeSet::new();
        let mut results = Vec::with_capacity(Tool::ALL.len());
        for tool in Tool::ALL {
            let failed_dependency = tool
                .dependencies()
                .iter()
                .find(|dep| failed.contains(*dep))
                .filter(|_| self.needs_install(tool));
            let result = match failed_dependency {
                Some(dependency) => Err(Progress::new(tool.key())
                    .fail(dependency_error(tool, *dependency))),
                None => match tool {
                    Tool::BpfAsm if !self.needs_install(tool) => {
                        self.bootstrap_with(tool, BuildInputs::default()).await
                    }
                    Tool::BpfAsm => match self.lex_yacc() {
                        Ok(inputs) => self.bootstrap_with(tool, inputs).await,
                        Err(error) => Err(Progress::new(tool.key()).fail(error)),
                    },
                    Tool::GoCapnp => self.bootstrap_go_capnp().await,
                    other => self.bootstrap_with(other, BuildInputs::default()).await,
                },
            };
            if result.is_err() {
                failed.insert(tool);
            }
            results.push(result);
        }
        let installed = results.iter().filter(|r| r.is_ok()).count();
        info!(installed, failed = failed.len(), "Bootstrap run finished");
        results
    }

    /// Bootstrap a tool described outside the built-in set.
    pub async fn bootstrap_spec(
        &mut self,
        spec: &ToolSpec,
        resolved: &ResolvedTool,
        inputs: &BuildInputs,
    ) -> BootstrapResult {
        let mut bootstrap = Bootstrap {
            directories: &self.settings.directories,
            client: &self.client,
            registry: &mut self.registry,
        };
        bootstrap.run(spec, resolved, inputs).await
    }

    /// Fetch `tool`'s archive into the download cache unless it is already
    /// there, then append its size and SHA-256 to the manifest file. The
    /// archive is not verified against anything; review it before trusting
    /// the new entry.
    pub async fn pin_download(&mut self, tool: Tool) -> Result<PinnedDownload> {
        let key = manifest_key(tool);
        let empty = ToolDownloads::default();
        let downloads = self.settings.manifest.section(key).unwrap_or(&empty);
        let target = download_target(
            &tool.spec(),
            &self.settings.config.overrides(tool),
            downloads,
            &self.settings,
        )?;
        if downloads.files.contains_key(&target.download_file) {
            return Err(Error::config(format!(
                "{}: {} is already pinned in {}",
                tool.display_name(),
                target.download_file,
                self.settings.manifest_path.display()
            )));
        }

        let download_dir = &self.settings.directories.download_dir;
        artifacts::ensure_dir(download_dir)?;
        let file = download_dir.join(&target.download_file);
        if !artifacts::file_exists(&file) {
            artifacts::download_to_cache(&self.client, &target.download_url, &file).await?;
        }
        let entry = manifest_entry_for(key, &file)?;
        self.settings.manifest = manifest::append_entry(&self.settings.manifest_path, &entry)?;
        info!(
            tool = key,
            file = %file.display(),
            manifest = %self.settings.manifest_path.display(),
            "Pinned download"
        );
        Ok(PinnedDownload { file, entry })
    }

    /// Compile every configured schema with Cap'n Proto and go-capnp.
    pub async fn generate_capnp(&self) -> Result<GenerateReport> {
        let capnp = self.installed_executable(Tool::CapnProto)?;
        let plugin = self.installed_executable(Tool::GoCapnp)?;
        Ok(generate::generate_capnp(
            &capnp,
            &plugin,
            &self.settings.config.generate.capnp,
            &self.settings.working_dir,
        )
        .await)
    }

    async fn bootstrap_with(&mut self, tool: Tool, inputs: BuildInputs) -> BootstrapResult {
        let spec = tool.spec();
        let resolved = self
            .resolve(tool)
            .map_err(|error| Progress::new(tool.key()).fail(error))?;
        self.bootstrap_spec(&spec, &resolved, &inputs).await
    }

    /// Tools that cannot be resolved count as needing an install.
    fn needs_install(&self, tool: Tool) -> bool {
        self.resolve(tool)
            .map(|resolved| bootstrap::needs_install(&resolved))
            .unwrap_or(true)
    }

    fn lex_yacc(&self) -> Result<BuildInputs> {
        let lex = self.resolve(Tool::Flex)?.executable_or("flex");
        let yacc = self.resolve(Tool::Bison)?.executable_or("bison");
        Ok(BuildInputs {
            go: None,
            lex_yacc: Some((lex, yacc)),
        })
    }

    fn installed_executable(&self, tool: Tool) -> Result<PathBuf> {
        let resolved = self.resolve(tool)?;
        match resolved.executable {
            Some(path) if artifacts::file_exists(&path) => Ok(path),
            Some(path) => Err(Error::config(format!(
                "{}: executable {} does not exist; run bootstrap-{} first",
                tool.display_name(),
                path.display(),
                tool.key()
            ))),
            None => Err(Error::config(format!(
                "{} {} is not installed; run bootstrap-{} first",
                tool.display_name(),
                resolved.version,
                tool.key()
            ))),
        }
    }
}

async fn detect_go_version(executable: &Path) -> Option<String> {
    let args = ["env".to_string(), "GOVERSION".to_string()];
    match process::capture_stdout(&executable.display().to_string(), &args).await {
        Ok(reported) => {
            let version = reported.trim_start_matches("go").to_string();
            (!version.is_empty()).then_some(version)
        }
        Err(error) => {
            warn!("Could not ask {} for its version: {error}", executable.display());
            None
        }
    }
}

fn dependency_error(tool: Tool, dependency: Tool) -> Error {
    Error::Dependency {
        tool: tool.display_name().to_string(),
        dependency: dependency.display_name().to_string(),
    }
}

/// Put the dependency messages in `progress` ahead of the tool's own.
fn prefix_messages(mut progress: Progress, result: BootstrapResult) -> BootstrapResult {
    match result {
        Ok(mut report) => {
            progress.extend(std::mem::take(&mut report.messages));
            report.messages = progress.into_messages();
            Ok(report)
        }
        Err(failure) => {
            progress.extend(failure.messages);
            Err(BootstrapFailure {
                messages: progress.into_messages(),
                ..failure
            })
        }
    }
}
