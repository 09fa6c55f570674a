//! Download cache and install-directory plumbing.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use filetime::FileTime;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, IoContext, Result};

pub fn http_client(user_agent: &str) -> Result<Client> {
    Client::builder()
        .user_agent(user_agent)
        .build()
        .map_err(|e| Error::io("build http client", io::Error::other(e)))
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).io_context(|| format!("create {}", path.display()))
}

/// True only for an existing non-directory entry.
pub fn file_exists(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| !meta.is_dir())
        .unwrap_or(false)
}

/// Stream `url` into `dest`. The body lands in a uniquely named file next
/// to `dest` and is renamed into place only after a 2xx response has been
/// fully written, so `dest` never holds a partial download.
pub async fn download_to_cache(client: &Client, url: &str, dest: &Path) -> Result<u64> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::network(url, e))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::network(url, format!("unexpected status {status}")));
    }

    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(format!(".download-{}", Uuid::new_v4()));
    match stream_body(resp, url, &tmp).await {
        Ok(written) => {
            if let Err(e) = fs::rename(&tmp, dest) {
                let _ = fs::remove_file(&tmp);
                return Err(Error::io(format!("rename into {}", dest.display()), e));
            }
            info!(url, dest = %dest.display(), bytes = written, "Downloaded");
            Ok(written)
        }
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            Err(err)
        }
    }
}

async fn stream_body(resp: reqwest::Response, url: &str, tmp: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(tmp)
        .await
        .io_context(|| format!("create {}", tmp.display()))?;
    let total = resp.content_length();
    let mut stream = resp.bytes_stream();
    let mut written = 0u64;
    let mut reported = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::network(url, e))?;
        file.write_all(&chunk)
            .await
            .io_context(|| format!("write {}", tmp.display()))?;
        written += chunk.len() as u64;
        debug!(bytes = written, "Download progress");
        if let Some(percent) = progress_step(written, total, reported) {
            reported = percent;
            info!(url, percent, bytes = written, "Downloading");
        }
    }
    file.flush()
        .await
        .io_context(|| format!("flush {}", tmp.display()))?;
    Ok(written)
}

/// The next multiple of 10% reached by `written`, if it is past `reported`.
/// Unknown or zero lengths never report.
fn progress_step(written: u64, total: Option<u64>, reported: u64) -> Option<u64> {
    let total = total.filter(|total| *total > 0)?;
    let percent = (written.min(total) * 100 / total) / 10 * 10;
    (percent > reported).then_some(percent)
}

/// Bump the modification time of `path` to now.
pub fn touch(path: &Path) -> Result<()> {
    filetime::set_file_mtime(path, FileTime::now())
        .io_context(|| format!("set modification time of {}", path.display()))
}

/// Sibling staging directory for `install_dir`.
pub fn staging_dir_for(install_dir: &Path) -> PathBuf {
    let name = install_dir
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "install".into());
    let parent = install_dir.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(".staging-{name}-{}", Uuid::new_v4()))
}

/// Replace `final_dir` with the fully populated `staging_dir`.
pub fn finalize_install(staging_dir: &Path, final_dir: &Path) -> Result<()> {
    if final_dir.exists() {
        fs::remove_dir_all(final_dir)
            .io_context(|| format!("remove previous install {}", final_dir.display()))?;
    }
    fs::rename(staging_dir, final_dir).io_context(|| {
        format!(
            "move {} into {}",
            staging_dir.display(),
            final_dir.display()
        )
    })
}

pub fn discard_staging(staging_dir: &Path) {
    if staging_dir.exists() {
        if let Err(e) = fs::remove_dir_all(staging_dir) {
            tracing::warn!("Failed to remove staging dir {}: {}", staging_dir.display(), e);
        }
    }
}
