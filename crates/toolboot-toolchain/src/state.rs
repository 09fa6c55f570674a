//! The toolchain registry: `<toolchain dir>/toolchain.toml`, one table per
//! installed tool recording its executable and version.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, IoContext, Result};

pub const REGISTRY_FILE_NAME: &str = "toolchain.toml";

const REGISTRY_BANNER: &str = "# This file is managed by toolboot.\n\
# Do not edit it by hand; it is rewritten after every bootstrap.\n\n";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ToolRecord {
    /// Relative to the toolchain directory unless absolute.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub executable: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
}

impl ToolRecord {
    pub fn new(executable: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            version: version.into(),
        }
    }
}

/// Keyed by registry key (`bison`, `go-capnp`, `go`, ...). Tables this
/// program does not manage, such as `go`, survive a read/write cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Registry {
    tools: BTreeMap<String, ToolRecord>,
}

impl Registry {
    pub fn get(&self, key: &str) -> Option<&ToolRecord> {
        self.tools.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, record: ToolRecord) {
        self.tools.insert(key.into(), record);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ToolRecord)> {
        self.tools.iter().map(|(key, record)| (key.as_str(), record))
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

pub fn registry_path(toolchain_dir: &Path) -> PathBuf {
    toolchain_dir.join(REGISTRY_FILE_NAME)
}

/// A missing registry reads as empty; a malformed one is an error so the
/// next write cannot silently drop its contents.
pub fn read_registry(toolchain_dir: &Path) -> Result<Registry> {
    let path = registry_path(toolchain_dir);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No toolchain registry yet");
            return Ok(Registry::default());
        }
        Err(e) => return Err(Error::io(format!("read {}", path.display()), e)),
    };
    let tools = toml::from_str(&raw).map_err(|source| Error::TomlParse {
        path: path.clone(),
        source,
    })?;
    Ok(Registry { tools })
}

pub fn write_registry(toolchain_dir: &Path, registry: &Registry) -> Result<()> {
    let path = registry_path(toolchain_dir);
    let body = toml::to_string(&registry.tools).map_err(|source| Error::TomlWrite {
        path: path.clone(),
        source,
    })?;
    fs::create_dir_all(toolchain_dir)
        .io_context(|| format!("create {}", toolchain_dir.display()))?;
    let payload = format!("{REGISTRY_BANNER}{body}");
    toolboot_util::write_text_atomic(&path, &payload)
        .io_context(|| format!("write {}", path.display()))?;
    debug!(path = %path.display(), tools = registry.tools.len(), "Wrote toolchain registry");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_registry_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        let registry = read_registry(&temp.path().join("nowhere")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn write_then_read_preserves_unmanaged_tables() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            registry_path(temp.path()),
            "[go]\nExecutable = \"/usr/local/go/bin/go\"\nVersion = \"1.22.3\"\n",
        )
        .unwrap();

        let mut registry = read_registry(temp.path()).unwrap();
        registry.set("bison", ToolRecord::new("bison-3.8.2/tests/bison", "3.8.2"));
        write_registry(temp.path(), &registry).unwrap();

        let raw = fs::read_to_string(registry_path(temp.path())).unwrap();
        assert!(raw.starts_with("# This file is managed by toolboot."));

        let reread = read_registry(temp.path()).unwrap();
        assert_eq!(reread, registry);
        assert_eq!(
            reread.get("go"),
            Some(&ToolRecord::new("/usr/local/go/bin/go", "1.22.3"))
        );
    }

    #[test]
    fn empty_fields_are_omitted() {
        let temp = tempfile::tempdir().unwrap();
        let mut registry = Registry::default();
        registry.set("flex", ToolRecord::new("", "2.6.4"));
        write_registry(temp.path(), &registry).unwrap();
        let raw = fs::read_to_string(registry_path(temp.path())).unwrap();
        assert!(raw.contains("[flex]"));
        assert!(raw.contains("Version = \"2.6.4\""));
        assert!(!raw.contains("Executable"));
    }

    #[test]
    fn malformed_registry_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(registry_path(temp.path()), "[bison\n").unwrap();
        let err = read_registry(temp.path()).unwrap_err();
        assert!(matches!(err, Error::TomlParse { .. }));
    }
}
