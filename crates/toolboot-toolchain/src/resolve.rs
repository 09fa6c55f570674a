//! Cascading resolution of one tool's effective configuration: user
//! overrides first, then the registry, then the download manifest.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{GoConfig, Settings, ToolOverrides};
use crate::error::{Error, Result};
use crate::manifest::ToolDownloads;
use crate::state::Registry;
use crate::template::{self, TemplateValues};
use crate::tools::ToolSpec;

pub const GO_REGISTRY_KEY: &str = "go";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutableSource {
    /// Pinned in the user configuration; never installed by us.
    User,
    /// Recorded in the registry for the effective version.
    Toolchain,
    /// Nothing usable yet; a bootstrap will install it.
    Unresolved,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResolvedTool {
    pub key: String,
    pub display_name: String,
    pub version: String,
    pub download_url: String,
    pub download_file: String,
    pub expected_size: u64,
    pub expected_sha256: String,
    pub install_dir: PathBuf,
    pub executable: Option<PathBuf>,
    pub executable_source: ExecutableSource,
    /// Version in the registry, when it differs from `version`.
    pub stale_version: Option<String>,
}

impl ResolvedTool {
    /// The executable to hand to dependents: the resolved path, or the
    /// bare `fallback` name to be looked up on `PATH`.
    pub fn executable_or(&self, fallback: &str) -> String {
        self.executable
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// What a tool's effective version downloads, before any integrity data
/// from the manifest is consulted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadTarget {
    pub version: String,
    pub download_file: String,
    pub download_url: String,
}

pub fn download_target(
    spec: &ToolSpec,
    overrides: &ToolOverrides,
    downloads: &ToolDownloads,
    settings: &Settings,
) -> Result<DownloadTarget> {
    let display = spec.display_name.as_str();

    let version = first_set(&overrides.version, &downloads.preferred_version)
        .ok_or_else(|| Error::config(format!("{display}: no version configured")))?;

    let mut values = TemplateValues::new().with("Version", version.clone());
    if let Some((major, _)) = version.split_once('.') {
        values.set("MajorVersion", major);
    }
    spec.naming.apply(&settings.host, &mut values);

    let filename_template = downloads.filename_template.trim();
    if filename_template.is_empty() {
        return Err(Error::config(format!(
            "{display}: the download manifest has no FilenameTemplate"
        )));
    }
    let download_file = template::render(
        &format!("{display} FilenameTemplate"),
        filename_template,
        &values,
    )?;
    values.set("Filename", download_file.clone());

    let url_template = first_set(&overrides.download_url, &downloads.download_url_template)
        .ok_or_else(|| Error::config(format!("{display}: no download URL configured")))?;
    let download_url = template::render(&format!("{display} download URL"), &url_template, &values)?;

    Ok(DownloadTarget {
        version,
        download_file,
        download_url,
    })
}

pub fn resolve_tool(
    spec: &ToolSpec,
    overrides: &ToolOverrides,
    downloads: Option<&ToolDownloads>,
    registry: &Registry,
    settings: &Settings,
) -> Result<ResolvedTool> {
    let empty = ToolDownloads::default();
    let downloads = downloads.unwrap_or(&empty);
    let display = spec.display_name.as_str();
    let DownloadTarget {
        version,
        download_file,
        download_url,
    } = download_target(spec, overrides, downloads, settings)?;

    let file = downloads.files.get(&download_file).ok_or_else(|| {
        Error::config(format!(
            "{display}: the download manifest has no size and SHA-256 for {download_file}; \
             review the upstream release and run `toolboot pin {}` to record it",
            spec.key
        ))
    })?;

    let toolchain_dir = &settings.directories.toolchain_dir;
    let recorded = registry.get(&spec.key);
    let (executable, executable_source) = if !overrides.executable.trim().is_empty() {
        (
            Some(user_path(&settings.working_dir, &overrides.executable)),
            ExecutableSource::User,
        )
    } else {
        match recorded {
            Some(record) if record.version == version && !record.executable.is_empty() => (
                Some(toolboot_util::absolutize(
                    toolchain_dir,
                    Path::new(&record.executable),
                )),
                ExecutableSource::Toolchain,
            ),
            _ => (None, ExecutableSource::Unresolved),
        }
    };
    let stale_version = recorded
        .map(|record| record.version.clone())
        .filter(|recorded| !recorded.is_empty() && *recorded != version);

    Ok(ResolvedTool {
        key: spec.key.clone(),
        display_name: spec.display_name.clone(),
        install_dir: toolchain_dir.join(spec.install_dir_name(&version)),
        version,
        download_url,
        download_file,
        expected_size: file.size,
        expected_sha256: file.sha256.trim().to_string(),
        executable,
        executable_source,
        stale_version,
    })
}

/// The Go toolchain used to build go-capnp.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GoToolchain {
    pub executable: PathBuf,
    pub version: String,
    pub gopath: PathBuf,
}

/// The Go executable: user configuration, then the registry's `go` record,
/// then `go` on `PATH`.
pub fn go_executable(config: &GoConfig, registry: &Registry, settings: &Settings) -> PathBuf {
    if !config.executable.trim().is_empty() {
        return user_path(&settings.working_dir, &config.executable);
    }
    match registry.get(GO_REGISTRY_KEY).filter(|r| !r.executable.is_empty()) {
        Some(record) => toolboot_util::absolutize(
            &settings.directories.toolchain_dir,
            Path::new(&record.executable),
        ),
        None => PathBuf::from("go"),
    }
}

/// True when the Go version has to come from the toolchain itself: the
/// GOPATH template uses it and the registry does not record one.
pub fn go_version_needed(config: &GoConfig, registry: &Registry) -> bool {
    let recorded = registry
        .get(GO_REGISTRY_KEY)
        .is_some_and(|record| !record.version.trim().is_empty());
    !recorded && config.go_path_template.contains(".GoVersion")
}

/// `detected_version` is what the Go toolchain reports about itself; the
/// registry's `go` version wins when present.
pub fn resolve_go(
    config: &GoConfig,
    registry: &Registry,
    settings: &Settings,
    detected_version: Option<&str>,
) -> Result<GoToolchain> {
    let toolchain_dir = &settings.directories.toolchain_dir;
    let version = first_set(
        registry
            .get(GO_REGISTRY_KEY)
            .map(|record| record.version.as_str())
            .unwrap_or_default(),
        detected_version.unwrap_or_default(),
    )
    .unwrap_or_default();
    let executable = go_executable(config, registry, settings);

    let template_set = !config.go_path_template.trim().is_empty();
    let gopath = match (&settings.ambient_gopath, template_set) {
        (Some(_), true) => {
            return Err(Error::config(
                "GOPATH is set in the environment and [build-tool.go] GoPathTemplate is configured; set only one",
            ))
        }
        (Some(ambient), false) => PathBuf::from(ambient),
        (None, true) => {
            if version.is_empty() && config.go_path_template.contains(".GoVersion") {
                return Err(Error::config(format!(
                    "GoPathTemplate uses {{{{.GoVersion}}}} but the version of {} is unknown",
                    executable.display()
                )));
            }
            let values = TemplateValues::new()
                .with("Home", settings.home.to_string_lossy())
                .with("ToolChainDir", toolchain_dir.to_string_lossy())
                .with("GoVersion", version.clone());
            let rendered =
                template::render("GoPathTemplate", config.go_path_template.trim(), &values)?;
            user_path(&settings.working_dir, &rendered)
        }
        (None, false) => toolchain_dir.join("gopath"),
    };

    Ok(GoToolchain {
        executable,
        version,
        gopath,
    })
}

fn first_set(preferred: &str, fallback: &str) -> Option<String> {
    [preferred, fallback]
        .into_iter()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn user_path(working_dir: &Path, raw: &str) -> PathBuf {
    toolboot_util::absolutize(working_dir, &toolboot_util::expand_user(raw.trim()))
}
