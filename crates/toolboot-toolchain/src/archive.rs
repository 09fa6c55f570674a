//! Tarball extraction with entry filtering and path rewriting.
//!
//! Regular files get their mode and timestamps as soon as they are written.
//! Directory timestamps are restored only after every entry has been
//! extracted, deepest first, because writing a child bumps its parent's
//! mtime.

use std::{
    fs::{self, File},
    io::{self, Read},
    path::{Component, Path, PathBuf},
};

use filetime::FileTime;
use flate2::read::GzDecoder;
use tar::EntryType;
use tracing::{debug, warn};
use xz2::read::XzDecoder;

use crate::error::{Error, IoContext, Result};

/// What happens to entries a filter does not accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterMode {
    /// Leave them out and keep going.
    Skip,
    /// Abort extraction before touching any further entry.
    Reject,
}

pub trait EntryFilter {
    /// `name` is the archive path; directories always end in `/`.
    fn accepts(&self, name: &str) -> bool;
    fn mode(&self) -> FilterMode;
    /// Human description of accepted entries, used in errors.
    fn describe(&self) -> String;
}

/// Everything below one archive root; anything else is rejected.
#[derive(Clone, Debug)]
pub struct UnderRoot {
    root: String,
}

impl UnderRoot {
    pub fn new(root: &str) -> Self {
        Self {
            root: with_trailing_slash(root),
        }
    }
}

impl EntryFilter for UnderRoot {
    fn accepts(&self, name: &str) -> bool {
        name.starts_with(&self.root)
    }

    fn mode(&self) -> FilterMode {
        FilterMode::Reject
    }

    fn describe(&self) -> String {
        self.root.clone()
    }
}

/// Selected subtrees of an archive root plus the directories leading to
/// them; everything else is skipped.
#[derive(Clone, Debug)]
pub struct Subtrees {
    prefixes: Vec<String>,
}

impl Subtrees {
    pub fn new(root: &str, subtrees: &[String]) -> Self {
        let root = with_trailing_slash(root);
        Self {
            prefixes: subtrees
                .iter()
                .map(|sub| format!("{root}{}", with_trailing_slash(sub)))
                .collect(),
        }
    }
}

impl EntryFilter for Subtrees {
    fn accepts(&self, name: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            name.starts_with(prefix.as_str()) || (name.ends_with('/') && prefix.starts_with(name))
        })
    }

    fn mode(&self) -> FilterMode {
        FilterMode::Skip
    }

    fn describe(&self) -> String {
        self.prefixes.join(", ")
    }
}

/// Maps `<root>/<rest>` to `<dest>/<rest>`. Returns `None` for names
/// outside `root` or containing `..`.
pub fn rebase(root: &str, dest: &Path) -> impl Fn(&str) -> Option<PathBuf> + Send + 'static {
    let root = root.trim_end_matches('/').to_string();
    let dest = dest.to_path_buf();
    move |name: &str| {
        let rest = name.strip_prefix(root.as_str())?;
        if !(rest.is_empty() || rest.starts_with('/')) {
            return None;
        }
        let rest = Path::new(rest.trim_start_matches('/'));
        if rest
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(dest.join(rest))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub dirs: usize,
    pub skipped: usize,
}

pub fn extract_archive<F, T>(archive: &Path, filter: &F, transform: T) -> Result<ExtractSummary>
where
    F: EntryFilter + ?Sized,
    T: Fn(&str) -> Option<PathBuf>,
{
    let reader = open_decoder(archive)?;
    let mut tar = tar::Archive::new(reader);
    let read_err = |e: io::Error| Error::io(format!("read {}", archive.display()), e);
    let shape_err = |entry: &str, expected: String| Error::ArchiveShape {
        archive: archive.to_path_buf(),
        entry: entry.to_string(),
        expected,
    };

    let mut summary = ExtractSummary::default();
    let mut dirs: Vec<(PathBuf, FileTime, FileTime)> = Vec::new();

    for entry in tar.entries().map_err(read_err)? {
        let mut entry = entry.map_err(read_err)?;
        let kind = entry.header().entry_type();
        if kind.is_pax_global_extensions() || kind.is_pax_local_extensions() {
            continue;
        }

        let mut name = entry
            .path()
            .map_err(read_err)?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();
        if kind.is_dir() && !name.ends_with('/') {
            name.push('/');
        }

        if !filter.accepts(&name) {
            match filter.mode() {
                FilterMode::Skip => {
                    debug!(entry = %name, "Skipping archive entry");
                    summary.skipped += 1;
                    continue;
                }
                FilterMode::Reject => return Err(shape_err(&name, filter.describe())),
            }
        }
        if kind.is_symlink() {
            debug!(entry = %name, "Ignoring symlink");
            continue;
        }

        let target = transform(&name)
            .ok_or_else(|| shape_err(&name, "a path inside the archive root".into()))?;
        let header = entry.header();
        let mode = header.mode().map_err(read_err)?;
        let mtime = header.mtime().map_err(read_err)?;
        let atime = header
            .as_gnu()
            .and_then(|gnu| gnu.atime().ok())
            .filter(|atime| *atime > 0)
            .unwrap_or(mtime);
        let mtime = FileTime::from_unix_time(mtime as i64, 0);
        let atime = FileTime::from_unix_time(atime as i64, 0);

        if kind.is_dir() {
            fs::create_dir_all(&target)
                .io_context(|| format!("create {}", target.display()))?;
            set_mode(&target, mode)?;
            dirs.push((target, atime, mtime));
            summary.dirs += 1;
        } else if kind.is_file() || kind == EntryType::Continuous {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .io_context(|| format!("create {}", parent.display()))?;
            }
            let mut out =
                File::create(&target).io_context(|| format!("create {}", target.display()))?;
            io::copy(&mut entry, &mut out)
                .io_context(|| format!("write {}", target.display()))?;
            drop(out);
            set_mode(&target, mode)?;
            filetime::set_file_times(&target, atime, mtime)
                .io_context(|| format!("set times of {}", target.display()))?;
            summary.files += 1;
        } else {
            return Err(shape_err(
                &name,
                format!("a file, directory or symlink, not {kind:?}"),
            ));
        }
    }

    for (dir, atime, mtime) in dirs.iter().rev() {
        if let Err(e) = filetime::set_file_times(dir, *atime, *mtime) {
            warn!("Failed to restore times of {}: {}", dir.display(), e);
        }
    }

    debug!(
        archive = %archive.display(),
        files = summary.files,
        dirs = summary.dirs,
        skipped = summary.skipped,
        "Extracted archive"
    );
    Ok(summary)
}

fn open_decoder(archive: &Path) -> Result<Box<dyn Read>> {
    let name = archive.to_string_lossy();
    let file = File::open(archive).io_context(|| format!("open {}", archive.display()))?;
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Ok(Box::new(GzDecoder::new(file)))
    } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
        Ok(Box::new(XzDecoder::new(file)))
    } else if name.ends_with(".tar") {
        Ok(Box::new(file))
    } else {
        Err(Error::config(format!(
            "{}: unsupported archive format (expected .tar.gz, .tar.xz or .tar)",
            archive.display()
        )))
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
        .io_context(|| format!("set mode of {}", path.display()))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

fn with_trailing_slash(value: &str) -> String {
    format!("{}/", value.trim_end_matches('/'))
}
