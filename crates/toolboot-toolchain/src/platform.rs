//! Host platform description.
//!
//! Architecture and OS are kept in the Go-style vocabulary the download
//! manifests were written against (`amd64`, `arm64`, `linux`, `darwin`).
//! Each tool maps these onto its own release naming in `tools.rs`.

const ARCH_OVERRIDE_ENV: &str = "TOOLBOOT_HOST_ARCH";
const OS_OVERRIDE_ENV: &str = "TOOLBOOT_HOST_OS";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostPlatform {
    pub arch: String,
    pub os: String,
}

impl HostPlatform {
    pub fn new(arch: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            arch: arch.into(),
            os: os.into(),
        }
    }

    pub fn current() -> Self {
        let arch = env_override(ARCH_OVERRIDE_ENV)
            .unwrap_or_else(|| go_arch(std::env::consts::ARCH).to_string());
        let os = env_override(OS_OVERRIDE_ENV)
            .unwrap_or_else(|| go_os(std::env::consts::OS).to_string());
        Self { arch, os }
    }
}

fn env_override(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn go_arch(rust_arch: &str) -> &str {
    match rust_arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64",
        "loongarch64" => "loong64",
        other => other,
    }
}

fn go_os(rust_os: &str) -> &str {
    match rust_os {
        "macos" => "darwin",
        other => other,
    }
}
