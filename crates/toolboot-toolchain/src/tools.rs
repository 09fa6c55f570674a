//! The set of bootstrappable tools and the per-tool knowledge that cannot
//! be expressed in the manifest: archive layout, platform naming and the
//! post-extraction build step.

use std::fmt;

use crate::platform::HostPlatform;
use crate::template::TemplateValues;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tool {
    Bison,
    Flex,
    CapnProto,
    GoCapnp,
    TinyGo,
    Binaryen,
    BpfAsm,
}

impl Tool {
    /// Every tool, ordered so that dependencies come first.
    pub const ALL: [Tool; 7] = [
        Tool::Bison,
        Tool::Flex,
        Tool::CapnProto,
        Tool::GoCapnp,
        Tool::TinyGo,
        Tool::Binaryen,
        Tool::BpfAsm,
    ];

    /// Key used in the registry and on the command line.
    pub fn key(self) -> &'static str {
        match self {
            Tool::Bison => "bison",
            Tool::Flex => "flex",
            Tool::CapnProto => "capnproto",
            Tool::GoCapnp => "go-capnp",
            Tool::TinyGo => "tinygo",
            Tool::Binaryen => "binaryen",
            Tool::BpfAsm => "bpf-asm",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Tool::Bison => "Bison",
            Tool::Flex => "Flex",
            Tool::CapnProto => "Cap'n Proto",
            Tool::GoCapnp => "go-capnp",
            Tool::TinyGo => "TinyGo",
            Tool::Binaryen => "Binaryen",
            Tool::BpfAsm => "bpf_asm",
        }
    }

    pub fn from_key(key: &str) -> Option<Tool> {
        Tool::ALL.into_iter().find(|tool| tool.key() == key)
    }

    /// Tools whose executables feed this tool's build step.
    pub fn dependencies(self) -> &'static [Tool] {
        match self {
            Tool::BpfAsm => &[Tool::Bison, Tool::Flex],
            _ => &[],
        }
    }

    pub fn spec(self) -> ToolSpec {
        match self {
            Tool::Bison => ToolSpec::new(self, "bison-")
                .archive_root(ArchiveRoot::Versioned("bison-".into()))
                .build(BuildStep::configure_make(&[]))
                .executable("tests/bison"),
            Tool::Flex => ToolSpec::new(self, "flex-")
                .archive_root(ArchiveRoot::Versioned("flex-".into()))
                .build(BuildStep::configure_make(&[]))
                .executable("src/flex"),
            Tool::CapnProto => ToolSpec::new(self, "capnproto-")
                .archive_root(ArchiveRoot::Versioned("capnproto-c++-".into()))
                .build(BuildStep::configure_make(&["check"]))
                .executable("capnp"),
            Tool::GoCapnp => ToolSpec::new(self, "go-capnp-")
                .archive_root(ArchiveRoot::Versioned("go-capnp-".into()))
                .build(BuildStep::GoBuild {
                    package_dir: "capnpc-go".into(),
                })
                .executable("capnpc-go/capnpc-go"),
            Tool::TinyGo => ToolSpec::new(self, "tinygo-")
                .archive_root(ArchiveRoot::Fixed("tinygo".into()))
                .naming(PlatformNaming::TinyGo)
                .build(BuildStep::None {
                    refresh_mtime: true,
                })
                .executable("bin/tinygo"),
            Tool::Binaryen => ToolSpec::new(self, "binaryen-")
                .archive_root(ArchiveRoot::Versioned("binaryen-version_".into()))
                .naming(PlatformNaming::Binaryen)
                .build(BuildStep::None {
                    refresh_mtime: true,
                })
                .executable("bin/wasm-opt"),
            Tool::BpfAsm => ToolSpec::new(self, "bpf_asm-")
                .archive_root(ArchiveRoot::Versioned("linux-".into()))
                .extract(ExtractPlan::Subtrees(vec![
                    "tools/bpf/".into(),
                    "tools/build/".into(),
                    "tools/scripts/".into(),
                ]))
                .build(BuildStep::KernelToolsMake {
                    make_dir: "tools/bpf".into(),
                    target: "bpf_asm".into(),
                })
                .executable("tools/bpf/bpf_asm"),
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Top-level directory inside a release archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchiveRoot {
    /// `<prefix><version>`, e.g. `bison-3.8.2`.
    Versioned(String),
    /// A directory name that does not carry the version, e.g. `tinygo`.
    Fixed(String),
}

impl ArchiveRoot {
    pub fn for_version(&self, version: &str) -> String {
        match self {
            ArchiveRoot::Versioned(prefix) => format!("{prefix}{version}"),
            ArchiveRoot::Fixed(name) => name.clone(),
        }
    }
}

/// Which archive entries are installed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtractPlan {
    /// Everything under the archive root; any other entry is an error.
    Whole,
    /// Only the listed subtrees of the archive root; other entries are skipped.
    Subtrees(Vec<String>),
}

/// How a tool spells the host platform in its release file names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlatformNaming {
    None,
    TinyGo,
    Binaryen,
}

impl PlatformNaming {
    pub fn apply(self, host: &HostPlatform, values: &mut TemplateValues) {
        match self {
            PlatformNaming::None => {}
            PlatformNaming::TinyGo => {
                values.set("Arch", host.arch.clone());
                values.set("OS", host.os.clone());
            }
            PlatformNaming::Binaryen => {
                values.set("Arch", binaryen_arch(host));
                values.set("OS", binaryen_os(host));
            }
        }
    }
}

fn binaryen_arch(host: &HostPlatform) -> String {
    match host.arch.as_str() {
        "arm64" if host.os == "darwin" => "arm64".into(),
        "arm64" => "aarch64".into(),
        "amd64" => "x86_64".into(),
        other => other.into(),
    }
}

fn binaryen_os(host: &HostPlatform) -> String {
    match host.os.as_str() {
        "darwin" => "macos".into(),
        other => other.into(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl BuildCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Work done in the install directory after extraction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildStep {
    /// Extraction only. With `refresh_mtime` the installed executable gets a
    /// current modification time so make-style callers treat it as fresh.
    None { refresh_mtime: bool },
    /// Commands run in order from the install directory.
    Commands(Vec<BuildCommand>),
    /// `go build` inside `package_dir` with an isolated `GOPATH`.
    GoBuild { package_dir: String },
    /// `make` inside `make_dir`, pointing `LEX`/`YACC` at resolved tools.
    KernelToolsMake { make_dir: String, target: String },
}

impl BuildStep {
    fn configure_make(make_args: &[&str]) -> Self {
        BuildStep::Commands(vec![
            BuildCommand::new("./configure", &[]),
            BuildCommand::new("make", make_args),
        ])
    }
}

/// Everything the orchestrator needs to know about one tool besides its
/// resolved configuration.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub key: String,
    pub display_name: String,
    pub install_prefix: String,
    pub archive_root: ArchiveRoot,
    pub extract: ExtractPlan,
    pub naming: PlatformNaming,
    pub build: BuildStep,
    /// Executable path relative to the install directory, `/`-separated.
    pub executable: String,
}

impl ToolSpec {
    fn new(tool: Tool, install_prefix: &str) -> Self {
        Self::custom(tool.key(), tool.display_name(), install_prefix)
    }

    /// A tool outside the built-in set, mostly useful for tests and
    /// one-off bootstraps.
    pub fn custom(key: &str, display_name: &str, install_prefix: &str) -> Self {
        Self {
            key: key.to_string(),
            display_name: display_name.to_string(),
            install_prefix: install_prefix.to_string(),
            archive_root: ArchiveRoot::Versioned(install_prefix.to_string()),
            extract: ExtractPlan::Whole,
            naming: PlatformNaming::None,
            build: BuildStep::None {
                refresh_mtime: false,
            },
            executable: String::new(),
        }
    }

    pub fn archive_root(mut self, root: ArchiveRoot) -> Self {
        self.archive_root = root;
        self
    }

    pub fn extract(mut self, plan: ExtractPlan) -> Self {
        self.extract = plan;
        self
    }

    pub fn naming(mut self, naming: PlatformNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn build(mut self, build: BuildStep) -> Self {
        self.build = build;
        self
    }

    pub fn executable(mut self, executable: &str) -> Self {
        self.executable = executable.to_string();
        self
    }

    pub fn install_dir_name(&self, version: &str) -> String {
        format!("{}{}", self.install_prefix, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(naming: PlatformNaming, arch: &str, os: &str) -> (String, String) {
        let mut values = TemplateValues::new();
        naming.apply(&HostPlatform::new(arch, os), &mut values);
        let arch = crate::template::render("a", "{{.Arch}}", &values).unwrap();
        let os = crate::template::render("o", "{{.OS}}", &values).unwrap();
        (arch, os)
    }

    #[test]
    fn keys_round_trip() {
        for tool in Tool::ALL {
            assert_eq!(Tool::from_key(tool.key()), Some(tool));
        }
        assert_eq!(Tool::from_key("linux"), None);
    }

    #[test]
    fn dependencies_precede_dependents_in_all() {
        for (index, tool) in Tool::ALL.iter().enumerate() {
            for dep in tool.dependencies() {
                let dep_index = Tool::ALL.iter().position(|t| t == dep).unwrap();
                assert!(dep_index < index, "{dep} must come before {tool}");
            }
        }
    }

    #[test]
    fn binaryen_uses_its_own_platform_names() {
        assert_eq!(
            rendered(PlatformNaming::Binaryen, "amd64", "linux"),
            ("x86_64".to_string(), "linux".to_string())
        );
        assert_eq!(
            rendered(PlatformNaming::Binaryen, "arm64", "linux"),
            ("aarch64".to_string(), "linux".to_string())
        );
        assert_eq!(
            rendered(PlatformNaming::Binaryen, "arm64", "darwin"),
            ("arm64".to_string(), "macos".to_string())
        );
    }

    #[test]
    fn tinygo_passes_platform_through() {
        assert_eq!(
            rendered(PlatformNaming::TinyGo, "arm64", "darwin"),
            ("arm64".to_string(), "darwin".to_string())
        );
    }

    #[test]
    fn install_and_archive_dirs_follow_version() {
        let spec = Tool::CapnProto.spec();
        assert_eq!(spec.install_dir_name("1.0.2"), "capnproto-1.0.2");
        assert_eq!(spec.archive_root.for_version("1.0.2"), "capnproto-c++-1.0.2");
        let tinygo = Tool::TinyGo.spec();
        assert_eq!(tinygo.archive_root.for_version("0.33.0"), "tinygo");
    }
}
