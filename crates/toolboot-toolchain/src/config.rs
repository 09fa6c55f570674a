//! User configuration (`config.toml`) and the runtime settings derived from
//! it.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::manifest::{self, Manifest};
use crate::platform::HostPlatform;
use crate::template::{self, TemplateValues};
use crate::tools::Tool;

pub const CONFIG_ENV: &str = "CONFIG";
pub const DOWNLOADS_FILE_ENV: &str = "DOWNLOADS_FILE";
pub const DEFAULT_CONFIG_PATH: &str = "./config.toml";
pub const DEFAULT_USER_AGENT: &str = "toolboot";

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigFile {
    #[serde(rename = "build-tool")]
    pub build_tool: BuildToolConfig,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct BuildToolConfig {
    pub build_dir_template: String,
    pub download_dir_template: String,
    pub tool_chain_dir_template: String,
    pub download_user_agent: String,
    pub downloads_file: String,

    #[serde(rename = "bison")]
    pub bison: ToolOverrides,
    #[serde(rename = "flex")]
    pub flex: ToolOverrides,
    #[serde(rename = "capnproto")]
    pub capnproto: ToolOverrides,
    #[serde(rename = "go-capnp")]
    pub go_capnp: ToolOverrides,
    #[serde(rename = "tinygo")]
    pub tinygo: ToolOverrides,
    #[serde(rename = "binaryen")]
    pub binaryen: ToolOverrides,
    /// Kernel source used to build bpf_asm.
    #[serde(rename = "linux")]
    pub linux: ToolOverrides,
    #[serde(rename = "bpf_asm")]
    pub bpf_asm: ExecutableOverride,
    #[serde(rename = "go")]
    pub go: GoConfig,
    #[serde(rename = "generate")]
    pub generate: GenerateConfig,
}

/// Per-tool user overrides; empty strings mean "not set".
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ToolOverrides {
    pub download_url: String,
    pub executable: String,
    pub version: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ExecutableOverride {
    pub executable: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct GoConfig {
    pub executable: String,
    pub go_path_template: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GenerateConfig {
    #[serde(rename = "capnp")]
    pub capnp: CapnpGenerateConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CapnpGenerateConfig {
    /// Schema directories, relative to the working directory unless absolute.
    pub capnp_dirs: Vec<String>,
    pub std_dir: String,
    pub import_path: String,
}

impl Default for CapnpGenerateConfig {
    fn default() -> Self {
        Self {
            capnp_dirs: vec!["capnp".into()],
            std_dir: "capnp/std".into(),
            import_path: "capnp".into(),
        }
    }
}

impl BuildToolConfig {
    /// Overrides for `tool`. bpf_asm takes its version and URL from the
    /// `linux` table and only its executable from `bpf_asm`.
    pub fn overrides(&self, tool: Tool) -> ToolOverrides {
        match tool {
            Tool::Bison => self.bison.clone(),
            Tool::Flex => self.flex.clone(),
            Tool::CapnProto => self.capnproto.clone(),
            Tool::GoCapnp => self.go_capnp.clone(),
            Tool::TinyGo => self.tinygo.clone(),
            Tool::Binaryen => self.binaryen.clone(),
            Tool::BpfAsm => ToolOverrides {
                download_url: self.linux.download_url.clone(),
                executable: self.bpf_asm.executable.clone(),
                version: self.linux.version.clone(),
            },
        }
    }
}

/// Manifest section holding a tool's downloads.
pub fn manifest_key(tool: Tool) -> &'static str {
    match tool {
        Tool::BpfAsm => "linux",
        other => other.key(),
    }
}

pub fn parse_config(raw: &str, path: &Path) -> Result<ConfigFile> {
    toml::from_str(raw).map_err(|source| Error::TomlParse {
        path: path.to_path_buf(),
        source,
    })
}

/// A missing file at the default location is an empty configuration; an
/// explicitly named file must exist.
pub fn load_config(path: &Path, explicit: bool) -> Result<ConfigFile> {
    match fs::read_to_string(path) {
        Ok(raw) => parse_config(&raw, path),
        Err(e) if e.kind() == io::ErrorKind::NotFound && !explicit => {
            debug!(path = %path.display(), "No configuration file; using defaults");
            Ok(ConfigFile::default())
        }
        Err(e) => Err(Error::io(format!("read {}", path.display()), e)),
    }
}

/// Working directories after `{{.Home}}` expansion, all absolute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Directories {
    pub build_dir: PathBuf,
    pub download_dir: PathBuf,
    pub toolchain_dir: PathBuf,
}

impl Directories {
    pub fn from_config(config: &BuildToolConfig, home: &Path, working_dir: &Path) -> Result<Self> {
        let values = TemplateValues::new().with("Home", home.to_string_lossy());
        let expand = |name: &str, template: &str, default: PathBuf| -> Result<PathBuf> {
            if template.trim().is_empty() {
                return Ok(default);
            }
            let rendered = template::render(name, template.trim(), &values)?;
            Ok(toolboot_util::absolutize(
                working_dir,
                &toolboot_util::expand_user(&rendered),
            ))
        };
        let cache = home.join(".cache/toolboot");
        Ok(Self {
            build_dir: expand("BuildDirTemplate", &config.build_dir_template, cache.join("build"))?,
            download_dir: expand(
                "DownloadDirTemplate",
                &config.download_dir_template,
                cache.join("downloads"),
            )?,
            toolchain_dir: expand(
                "ToolChainDirTemplate",
                &config.tool_chain_dir_template,
                home.join(".local/share/toolboot/toolchain"),
            )?,
        })
    }
}

/// Where command-line and environment inputs point.
#[derive(Clone, Debug, Default)]
pub struct Sources {
    pub config_path: Option<PathBuf>,
    pub downloads_file: Option<PathBuf>,
}

impl Sources {
    /// Fill unset paths from `CONFIG` and `DOWNLOADS_FILE`.
    pub fn with_env_fallbacks(mut self) -> Self {
        if self.config_path.is_none() {
            self.config_path = env_path(CONFIG_ENV);
        }
        if self.downloads_file.is_none() {
            self.downloads_file = env_path(DOWNLOADS_FILE_ENV);
        }
        self
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Everything a bootstrap run reads from the outside world, resolved once.
#[derive(Clone, Debug)]
pub struct Settings {
    pub config_path: PathBuf,
    pub manifest_path: PathBuf,
    pub config: BuildToolConfig,
    pub manifest: Manifest,
    pub directories: Directories,
    pub user_agent: String,
    pub host: HostPlatform,
    pub home: PathBuf,
    /// Base for relative user-supplied executables.
    pub working_dir: PathBuf,
    /// `GOPATH` inherited from the environment, if any.
    pub ambient_gopath: Option<String>,
}

impl Settings {
    pub fn load(sources: &Sources) -> Result<Self> {
        let working_dir = std::env::current_dir()
            .map_err(|e| Error::io("determine current directory", e))?;
        let explicit = sources.config_path.is_some();
        let config_path = sources
            .config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let config = load_config(&config_path, explicit)?.build_tool;

        let manifest_path = sources
            .downloads_file
            .clone()
            .or_else(|| {
                let configured = config.downloads_file.trim();
                (!configured.is_empty()).then(|| toolboot_util::expand_user(configured))
            })
            .unwrap_or_else(manifest::default_manifest_path);
        let manifest = manifest::load_manifest(&manifest_path)?;

        let ambient_gopath = std::env::var("GOPATH")
            .ok()
            .filter(|value| !value.trim().is_empty());

        Self::from_parts(
            config_path,
            manifest_path,
            config,
            manifest,
            &toolboot_util::home_dir(),
            working_dir,
            HostPlatform::current(),
            ambient_gopath,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        config_path: PathBuf,
        manifest_path: PathBuf,
        config: BuildToolConfig,
        manifest: Manifest,
        home: &Path,
        working_dir: PathBuf,
        host: HostPlatform,
        ambient_gopath: Option<String>,
    ) -> Result<Self> {
        let directories = Directories::from_config(&config, home, &working_dir)?;
        let user_agent = match config.download_user_agent.trim() {
            "" => DEFAULT_USER_AGENT.to_string(),
            agent => agent.to_string(),
        };
        Ok(Self {
            config_path,
            manifest_path,
            config,
            manifest,
            directories,
            user_agent,
            host,
            home: home.to_path_buf(),
            working_dir,
            ambient_gopath,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[build-tool]
ToolChainDirTemplate = "{{.Home}}/toolchain"
DownloadDirTemplate = "/var/cache/downloads"
DownloadUserAgent = "acme-builder/1.0"

[build-tool.bison]
Version = "3.8.2"

[build-tool.linux]
Version = "6.6.30"
DownloadUrl = "https://mirror.example/{{.Filename}}"

[build-tool.bpf_asm]
Executable = "/usr/sbin/bpf_asm"

[build-tool.go]
GoPathTemplate = "{{.ToolChainDir}}/gopath-{{.GoVersion}}"

[build-tool.generate.capnp]
CapnpDirs = ["schema/a", "schema/b"]
"#;

    #[test]
    fn parses_pascal_case_sections() {
        let config = parse_config(SAMPLE, Path::new("config.toml"))
            .unwrap()
            .build_tool;
        assert_eq!(config.bison.version, "3.8.2");
        assert_eq!(config.download_user_agent, "acme-builder/1.0");
        assert_eq!(
            config.go.go_path_template,
            "{{.ToolChainDir}}/gopath-{{.GoVersion}}"
        );
        assert_eq!(config.generate.capnp.capnp_dirs, vec!["schema/a", "schema/b"]);
        assert_eq!(config.generate.capnp.import_path, "capnp");
    }

    #[test]
    fn bpf_asm_overrides_combine_linux_and_executable() {
        let config = parse_config(SAMPLE, Path::new("config.toml"))
            .unwrap()
            .build_tool;
        let overrides = config.overrides(Tool::BpfAsm);
        assert_eq!(overrides.version, "6.6.30");
        assert_eq!(overrides.download_url, "https://mirror.example/{{.Filename}}");
        assert_eq!(overrides.executable, "/usr/sbin/bpf_asm");
        assert_eq!(manifest_key(Tool::BpfAsm), "linux");
        assert_eq!(manifest_key(Tool::GoCapnp), "go-capnp");
    }

    #[test]
    fn directories_expand_home_and_fall_back_to_defaults() {
        let config = parse_config(SAMPLE, Path::new("config.toml"))
            .unwrap()
            .build_tool;
        let dirs = Directories::from_config(&config, Path::new("/home/dev"), Path::new("/work"))
            .unwrap();
        assert_eq!(dirs.toolchain_dir, PathBuf::from("/home/dev/toolchain"));
        assert_eq!(dirs.download_dir, PathBuf::from("/var/cache/downloads"));
        assert_eq!(dirs.build_dir, PathBuf::from("/home/dev/.cache/toolboot/build"));
    }

    #[test]
    fn relative_directory_templates_resolve_against_working_dir() {
        let config = BuildToolConfig {
            tool_chain_dir_template: "out/toolchain".into(),
            ..Default::default()
        };
        let dirs = Directories::from_config(&config, Path::new("/home/dev"), Path::new("/work"))
            .unwrap();
        assert_eq!(dirs.toolchain_dir, PathBuf::from("/work/out/toolchain"));
    }

    #[test]
    fn missing_default_config_is_empty_but_explicit_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        assert!(load_config(&path, false).is_ok());
        assert!(load_config(&path, true).is_err());
    }

    #[test]
    fn user_agent_defaults_when_unset() {
        let settings = Settings::from_parts(
            PathBuf::from("config.toml"),
            PathBuf::from("downloads.toml"),
            BuildToolConfig::default(),
            Manifest::default(),
            Path::new("/home/dev"),
            PathBuf::from("/work"),
            HostPlatform::new("amd64", "linux"),
            None,
        )
        .unwrap();
        assert_eq!(settings.user_agent, DEFAULT_USER_AGENT);
    }
}
