use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, IoContext, Result};

pub const DEFAULT_MANIFEST_PATH: &str = "./downloads.toml";

/// Known download artifacts, keyed by manifest section (`bison`, `linux`, ...).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Manifest {
    #[serde(flatten)]
    pub sections: BTreeMap<String, ToolDownloads>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ToolDownloads {
    pub download_url_template: String,
    pub filename_template: String,
    pub preferred_version: String,
    pub files: BTreeMap<String, ManifestFile>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ManifestFile {
    #[serde(rename = "SHA-256")]
    pub sha256: String,
    #[serde(rename = "Size")]
    pub size: u64,
}

impl Manifest {
    pub fn section(&self, key: &str) -> Option<&ToolDownloads> {
        self.sections.get(key)
    }
}

pub fn parse_manifest(raw: &str, path: &Path) -> Result<Manifest> {
    toml::from_str(raw).map_err(|source| Error::TomlParse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let raw = fs::read_to_string(path).io_context(|| format!("read {}", path.display()))?;
    let manifest = parse_manifest(&raw, path)?;
    debug!(
        path = %path.display(),
        sections = manifest.sections.len(),
        "Loaded download manifest"
    );
    Ok(manifest)
}

/// Size and SHA-256 of the file at `path`.
pub fn describe_file(path: &Path) -> Result<ManifestFile> {
    let size = fs::metadata(path)
        .io_context(|| format!("stat {}", path.display()))?
        .len();
    let sha256 =
        crate::hashing::sha256_file(path).io_context(|| format!("hash {}", path.display()))?;
    Ok(ManifestFile { sha256, size })
}

/// A `[<key>.Files."<name>"]` block describing `path`, for pinning new
/// artifacts in the manifest.
pub fn manifest_entry_for(key: &str, path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(render_entry(key, &name, &describe_file(path)?))
}

fn render_entry(key: &str, name: &str, file: &ManifestFile) -> String {
    format!(
        "[{key}.Files.\"{name}\"]\nSHA-256 = \"{}\"\nSize = {}\n",
        file.sha256, file.size
    )
}

/// Append `entry` to the manifest at `path` and return the reloaded
/// manifest. Nothing is written if the result would not parse.
pub fn append_entry(path: &Path, entry: &str) -> Result<Manifest> {
    let mut raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(Error::io(format!("read {}", path.display()), e)),
    };
    if !raw.is_empty() {
        if !raw.ends_with('\n') {
            raw.push('\n');
        }
        raw.push('\n');
    }
    raw.push_str(entry);
    let manifest = parse_manifest(&raw, path)?;
    fs::write(path, raw).io_context(|| format!("write {}", path.display()))?;
    Ok(manifest)
}

pub fn default_manifest_path() -> PathBuf {
    PathBuf::from(DEFAULT_MANIFEST_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[bison]
DownloadUrlTemplate = "https://ftp.gnu.org/gnu/bison/{{.Filename}}"
FilenameTemplate = "bison-{{.Version}}.tar.xz"
PreferredVersion = "3.8.2"

[bison.Files."bison-3.8.2.tar.xz"]
SHA-256 = "9bba0214ccf7f1079c5d59210045227bcf619519840ebfa80cd3849cff5a5bf2"
Size = 2817324

[linux]
DownloadUrlTemplate = "https://cdn.kernel.org/pub/linux/kernel/v{{.MajorVersion}}.x/{{.Filename}}"
FilenameTemplate = "linux-{{.Version}}.tar.xz"
PreferredVersion = "6.6.30"
"#;

    #[test]
    fn parses_sections_and_files() {
        let manifest = parse_manifest(SAMPLE, Path::new("downloads.toml")).unwrap();
        let bison = manifest.section("bison").unwrap();
        assert_eq!(bison.preferred_version, "3.8.2");
        let file = bison.files.get("bison-3.8.2.tar.xz").unwrap();
        assert_eq!(file.size, 2817324);
        assert!(file.sha256.starts_with("9bba02"));
        let linux = manifest.section("linux").unwrap();
        assert!(linux.files.is_empty());
        assert!(manifest.section("flex").is_none());
    }

    #[test]
    fn malformed_manifest_reports_path() {
        let err = parse_manifest("[bison\n", Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn appended_entry_is_loaded_with_its_section() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("downloads.toml");
        fs::write(&path, SAMPLE.trim_end()).unwrap();
        let entry = "[linux.Files.\"linux-6.6.30.tar.xz\"]\nSHA-256 = \"ff\"\nSize = 9\n";

        let manifest = append_entry(&path, entry).unwrap();
        let linux = manifest.section("linux").unwrap();
        assert_eq!(linux.preferred_version, "6.6.30");
        assert_eq!(linux.files["linux-6.6.30.tar.xz"].size, 9);
        assert_eq!(load_manifest(&path).unwrap().section("linux").unwrap().files.len(), 1);

        let before = fs::read_to_string(&path).unwrap();
        assert!(append_entry(&path, entry).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn manifest_entry_describes_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("tool-1.0.tar.gz");
        fs::write(&path, b"abc").unwrap();
        let entry = manifest_entry_for("tool", &path).unwrap();
        assert_eq!(
            entry,
            "[tool.Files.\"tool-1.0.tar.gz\"]\nSHA-256 = \"ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad\"\nSize = 3\n"
        );
    }
}
