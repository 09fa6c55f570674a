use std::{
    fs, io,
    path::{Path, PathBuf},
};

use uuid::Uuid;

pub fn home_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home)
    } else {
        PathBuf::from("/tmp")
    }
}

pub fn expand_user(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            let rest = path.strip_prefix("~/").unwrap_or("");
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Write `contents` next to `path` under a unique name, then rename it into place.
pub fn write_text_atomic(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
    fs::write(&tmp, contents)?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(())
}

pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Log to stderr. `RUST_LOG` refines `default_level`.
pub fn init_tracing(default_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolutize_keeps_absolute_paths() {
        let base = Path::new("/opt/toolchain");
        assert_eq!(
            absolutize(base, Path::new("/usr/bin/bison")),
            PathBuf::from("/usr/bin/bison")
        );
        assert_eq!(
            absolutize(base, Path::new("bison-3.8.2/tests/bison")),
            PathBuf::from("/opt/toolchain/bison-3.8.2/tests/bison")
        );
    }

    #[test]
    fn write_text_atomic_replaces_contents() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested").join("state.toml");
        write_text_atomic(&path, "first\n").unwrap();
        write_text_atomic(&path, "second\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");
        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn expand_user_leaves_plain_paths() {
        assert_eq!(expand_user("relative/dir"), PathBuf::from("relative/dir"));
    }
}
