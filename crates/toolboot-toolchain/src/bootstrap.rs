//! Single-tool bootstrap: decide whether to install, then download, verify,
//! extract, build and record.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use crate::archive::{self, ExtractSummary, Subtrees, UnderRoot};
use crate::artifacts;
use crate::config::Directories;
use crate::error::{Error, Result};
use crate::process::{self, EnvOverlay};
use crate::provenance::{write_provenance, Provenance};
use crate::resolve::{ExecutableSource, GoToolchain, ResolvedTool};
use crate::state::{write_registry, Registry, ToolRecord};
use crate::tools::{BuildStep, ExtractPlan, ToolSpec};
use crate::verify;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// The user pinned an existing executable.
    UserProvided,
    /// The registry already held this version and its executable exists.
    AlreadyInstalled,
    Installed,
}

#[derive(Clone, Debug, Serialize)]
pub struct BootstrapReport {
    pub tool: String,
    pub version: String,
    pub outcome: Outcome,
    pub executable: PathBuf,
    pub messages: Vec<String>,
}

#[derive(Debug)]
pub struct BootstrapFailure {
    pub tool: String,
    pub messages: Vec<String>,
    pub error: Error,
}

impl fmt::Display for BootstrapFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.tool, self.error)
    }
}

impl std::error::Error for BootstrapFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

pub type BootstrapResult = std::result::Result<BootstrapReport, BootstrapFailure>;

/// Inputs to build steps that come from other tools.
#[derive(Clone, Debug, Default)]
pub struct BuildInputs {
    pub go: Option<GoToolchain>,
    /// `(lex, yacc)` executables for kernel tool builds.
    pub lex_yacc: Option<(String, String)>,
}

/// Ordered progress messages, mirrored to the log.
#[derive(Debug)]
pub(crate) struct Progress {
    tool: String,
    messages: Vec<String>,
}

impl Progress {
    pub(crate) fn new(tool: &str) -> Self {
        Self {
            tool: tool.to_string(),
            messages: Vec::new(),
        }
    }

    pub(crate) fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!(tool = %self.tool, "{message}");
        self.messages.push(message);
    }

    pub(crate) fn extend(&mut self, messages: Vec<String>) {
        self.messages.extend(messages);
    }

    pub(crate) fn into_messages(self) -> Vec<String> {
        self.messages
    }

    pub(crate) fn fail(self, error: Error) -> BootstrapFailure {
        warn!(tool = %self.tool, "{error}");
        BootstrapFailure {
            tool: self.tool,
            messages: self.messages,
            error,
        }
    }

    fn finish(self, version: &str, outcome: Outcome, executable: PathBuf) -> BootstrapReport {
        BootstrapReport {
            tool: self.tool,
            version: version.to_string(),
            outcome,
            executable,
            messages: self.messages,
        }
    }
}

/// Everything a bootstrap touches outside the tool's own description.
pub struct Bootstrap<'a> {
    pub directories: &'a Directories,
    pub client: &'a Client,
    pub registry: &'a mut Registry,
}

impl Bootstrap<'_> {
    pub async fn run(
        &mut self,
        spec: &ToolSpec,
        resolved: &ResolvedTool,
        inputs: &BuildInputs,
    ) -> BootstrapResult {
        let mut progress = Progress::new(&spec.key);
        match self.run_inner(spec, resolved, inputs, &mut progress).await {
            Ok((outcome, executable)) => Ok(progress.finish(&resolved.version, outcome, executable)),
            Err(error) => Err(progress.fail(error)),
        }
    }

    async fn run_inner(
        &mut self,
        spec: &ToolSpec,
        resolved: &ResolvedTool,
        inputs: &BuildInputs,
        progress: &mut Progress,
    ) -> Result<(Outcome, PathBuf)> {
        let display = &resolved.display_name;

        if let Some(decided) = skip_decision(resolved, progress)? {
            return Ok(decided);
        }

        artifacts::ensure_dir(&self.directories.download_dir)?;
        let archive_path = self.directories.download_dir.join(&resolved.download_file);
        if artifacts::file_exists(&archive_path) {
            progress.note(format!(
                "Using previously downloaded {}",
                archive_path.display()
            ));
        } else {
            progress.note(format!("Downloading {}", resolved.download_url));
            artifacts::download_to_cache(self.client, &resolved.download_url, &archive_path)
                .await?;
        }

        verify::verify_download(
            resolved.expected_size,
            &resolved.expected_sha256,
            &archive_path,
        )
        .await?;
        progress.note(format!(
            "Verified size and SHA-256 of {}",
            archive_path.display()
        ));

        artifacts::ensure_dir(&self.directories.toolchain_dir)?;
        let summary = extract_staged(spec, resolved, &archive_path).await?;
        progress.note(format!(
            "Extracted {} files from {} into {}",
            summary.files,
            resolved.download_file,
            resolved.install_dir.display()
        ));

        build(spec, resolved, inputs, progress).await?;

        let executable = resolved.install_dir.join(&spec.executable);
        if !artifacts::file_exists(&executable) {
            return Err(Error::config(format!(
                "{display}: {} is missing after the build",
                executable.display()
            )));
        }
        if matches!(spec.build, BuildStep::None { refresh_mtime: true }) {
            artifacts::touch(&executable)?;
        }

        let provenance = Provenance {
            tool: spec.key.clone(),
            version: resolved.version.clone(),
            source_url: resolved.download_url.clone(),
            sha256: resolved.expected_sha256.clone(),
            size_bytes: resolved.expected_size,
            cached_path: archive_path.display().to_string(),
            installed_at_unix_millis: toolboot_util::now_millis(),
        };
        if let Err(e) = write_provenance(&resolved.install_dir, &provenance) {
            warn!("Failed to write provenance for {}: {}", spec.key, e);
        }

        let relative = format!(
            "{}/{}",
            spec.install_dir_name(&resolved.version),
            spec.executable
        );
        self.registry
            .set(&spec.key, ToolRecord::new(relative, &resolved.version));
        write_registry(&self.directories.toolchain_dir, self.registry)?;
        progress.note(format!(
            "Recorded {display} {} in the toolchain registry",
            resolved.version
        ));
        Ok((Outcome::Installed, executable))
    }
}

/// False when the skip decision ends the bootstrap: a pinned executable
/// (present or not) or a recorded install that is still on disk.
pub(crate) fn needs_install(resolved: &ResolvedTool) -> bool {
    match (&resolved.executable, resolved.executable_source) {
        (Some(_), ExecutableSource::User) => false,
        (Some(path), ExecutableSource::Toolchain) => !artifacts::file_exists(path),
        _ => true,
    }
}

/// `Some` when nothing needs to be installed.
fn skip_decision(
    resolved: &ResolvedTool,
    progress: &mut Progress,
) -> Result<Option<(Outcome, PathBuf)>> {
    let display = &resolved.display_name;
    match (&resolved.executable, resolved.executable_source) {
        (Some(path), ExecutableSource::User) => {
            if artifacts::file_exists(path) {
                progress.note(format!(
                    "Using {display} executable {} from the configuration",
                    path.display()
                ));
                Ok(Some((Outcome::UserProvided, path.clone())))
            } else {
                Err(Error::config(format!(
                    "{display}: configured executable {} does not exist",
                    path.display()
                )))
            }
        }
        (Some(path), ExecutableSource::Toolchain) if artifacts::file_exists(path) => {
            progress.note(format!(
                "{display} {} is already installed at {}",
                resolved.version,
                path.display()
            ));
            Ok(Some((Outcome::AlreadyInstalled, path.clone())))
        }
        (Some(path), _) => {
            progress.note(format!(
                "{display} {} is recorded but {} is missing; reinstalling",
                resolved.version,
                path.display()
            ));
            Ok(None)
        }
        (None, _) => {
            if let Some(stale) = &resolved.stale_version {
                progress.note(format!(
                    "Installed {display} is version {stale}; installing {}",
                    resolved.version
                ));
            }
            Ok(None)
        }
    }
}

async fn extract_staged(
    spec: &ToolSpec,
    resolved: &ResolvedTool,
    archive_path: &Path,
) -> Result<ExtractSummary> {
    let root = spec.archive_root.for_version(&resolved.version);
    let plan = spec.extract.clone();
    let archive_path = archive_path.to_path_buf();
    let install_dir = resolved.install_dir.clone();
    tokio::task::spawn_blocking(move || {
        let staging = artifacts::staging_dir_for(&install_dir);
        let transform = archive::rebase(&root, &staging);
        let extracted = match &plan {
            ExtractPlan::Whole => {
                archive::extract_archive(&archive_path, &UnderRoot::new(&root), transform)
            }
            ExtractPlan::Subtrees(subtrees) => {
                archive::extract_archive(&archive_path, &Subtrees::new(&root, subtrees), transform)
            }
        };
        let summary = match extracted {
            Ok(summary) => summary,
            Err(err) => {
                artifacts::discard_staging(&staging);
                return Err(err);
            }
        };
        if let Err(err) = artifacts::finalize_install(&staging, &install_dir) {
            artifacts::discard_staging(&staging);
            return Err(err);
        }
        Ok(summary)
    })
    .await
    .map_err(|e| Error::io("extraction task", std::io::Error::other(e)))?
}

async fn build(
    spec: &ToolSpec,
    resolved: &ResolvedTool,
    inputs: &BuildInputs,
    progress: &mut Progress,
) -> Result<()> {
    let display = &resolved.display_name;
    let install_dir = &resolved.install_dir;
    match &spec.build {
        BuildStep::None { .. } => Ok(()),
        BuildStep::Commands(commands) => {
            for command in commands {
                progress.note(format!("Running {} for {display}", command.display()));
                process::run_streaming(
                    &command.program,
                    &command.args,
                    install_dir,
                    &EnvOverlay::new(),
                )
                .await?;
            }
            Ok(())
        }
        BuildStep::GoBuild { package_dir } => {
            let go = inputs.go.as_ref().ok_or_else(|| {
                Error::config(format!("{display}: no Go toolchain was resolved"))
            })?;
            let dir = install_dir.join(package_dir);
            let program = go.executable.display().to_string();
            progress.note(format!(
                "Building {display} with {program} (GOPATH={})",
                go.gopath.display()
            ));
            let env = EnvOverlay::new().replace("GOPATH", go.gopath.display().to_string());
            process::run_streaming(&program, &["build".to_string()], &dir, &env).await
        }
        BuildStep::KernelToolsMake { make_dir, target } => {
            let args = kernel_make_args(inputs.lex_yacc.as_ref(), target);
            progress.note(format!(
                "Running {} for {display}",
                process::command_line("make", &args)
            ));
            process::run_streaming("make", &args, &install_dir.join(make_dir), &EnvOverlay::new())
                .await
        }
    }
}

/// `LEX=`/`YACC=` are only passed for tools that are not the bare defaults.
fn kernel_make_args(lex_yacc: Option<&(String, String)>, target: &str) -> Vec<String> {
    let mut args = Vec::new();
    if let Some((lex, yacc)) = lex_yacc {
        if lex != "flex" {
            args.push(format!("LEX={lex}"));
        }
        if yacc != "bison" {
            args.push(format!("YACC={yacc}"));
        }
    }
    args.push(target.to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_make_args_skip_default_tools() {
        assert_eq!(
            kernel_make_args(Some(&("flex".into(), "bison".into())), "bpf_asm"),
            vec!["bpf_asm"]
        );
        assert_eq!(
            kernel_make_args(
                Some(&("/tc/flex-2.6.4/src/flex".into(), "bison".into())),
                "bpf_asm"
            ),
            vec!["LEX=/tc/flex-2.6.4/src/flex", "bpf_asm"]
        );
        assert_eq!(
            kernel_make_args(
                Some(&("flex".into(), "/tc/bison-3.8.2/tests/bison".into())),
                "bpf_asm"
            ),
            vec!["YACC=/tc/bison-3.8.2/tests/bison", "bpf_asm"]
        );
        assert_eq!(kernel_make_args(None, "bpf_asm"), vec!["bpf_asm"]);
    }

    fn resolved(executable: Option<PathBuf>, source: ExecutableSource) -> ResolvedTool {
        ResolvedTool {
            key: "tool".into(),
            display_name: "Tool".into(),
            version: "1.0".into(),
            download_url: "http://127.0.0.1:9/tool-1.0.tar.gz".into(),
            download_file: "tool-1.0.tar.gz".into(),
            expected_size: 0,
            expected_sha256: String::new(),
            install_dir: PathBuf::from("/nonexistent/tool-1.0"),
            executable,
            executable_source: source,
            stale_version: None,
        }
    }

    #[test]
    fn missing_user_executable_is_fatal() {
        let mut progress = Progress::new("tool");
        let tool = resolved(
            Some(PathBuf::from("/nonexistent/bin/tool")),
            ExecutableSource::User,
        );
        let err = skip_decision(&tool, &mut progress).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn existing_user_executable_skips() {
        let temp = tempfile::tempdir().unwrap();
        let exe = temp.path().join("tool");
        std::fs::write(&exe, b"").unwrap();
        let mut progress = Progress::new("tool");
        let decided = skip_decision(&resolved(Some(exe.clone()), ExecutableSource::User), &mut progress)
            .unwrap();
        assert_eq!(decided, Some((Outcome::UserProvided, exe)));
        assert_eq!(progress.messages.len(), 1);
    }

    #[test]
    fn pinned_or_present_executables_need_no_install() {
        let temp = tempfile::tempdir().unwrap();
        let exe = temp.path().join("tool");
        std::fs::write(&exe, b"").unwrap();
        assert!(!needs_install(&resolved(
            Some(PathBuf::from("/nonexistent/bin/tool")),
            ExecutableSource::User
        )));
        assert!(!needs_install(&resolved(Some(exe), ExecutableSource::Toolchain)));
        assert!(needs_install(&resolved(
            Some(PathBuf::from("/nonexistent/tool-1.0/bin/tool")),
            ExecutableSource::Toolchain
        )));
        assert!(needs_install(&resolved(None, ExecutableSource::Unresolved)));
    }

    #[test]
    fn recorded_but_missing_executable_reinstalls() {
        let mut progress = Progress::new("tool");
        let tool = resolved(
            Some(PathBuf::from("/nonexistent/tool-1.0/bin/tool")),
            ExecutableSource::Toolchain,
        );
        assert_eq!(skip_decision(&tool, &mut progress).unwrap(), None);
    }
}
