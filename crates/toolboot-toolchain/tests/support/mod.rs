//! Helpers shared by the integration test binaries.
#![allow(dead_code)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use flate2::{write::GzEncoder, Compression};
use sha2::{Digest, Sha256};
use tar::{Builder, EntryType, Header};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use toolboot_toolchain::{
    config::BuildToolConfig, manifest::parse_manifest, platform::HostPlatform, Settings,
};

pub const UNREACHABLE: &str = "http://127.0.0.1:9";

/// A gzipped tarball. Names ending in `/` become directories.
pub fn tar_gz(entries: &[(&str, u32, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);
    for (path, mode, data) in entries {
        let mut header = Header::new_gnu();
        let kind = if path.ends_with('/') {
            EntryType::Directory
        } else {
            EntryType::Regular
        };
        header.set_entry_type(kind);
        header.set_path(path).unwrap();
        header.set_mode(*mode);
        header.set_mtime(1_600_000_000);
        header.set_size(data.len() as u64);
        header.set_cksum();
        builder.append(&header, data.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// A manifest section fetching `<url_base>/<file name>`.
pub fn section(key: &str, filename_template: &str, version: &str, url_base: &str) -> String {
    format!(
        "[{key}]\nDownloadUrlTemplate = \"{url_base}/{{{{.Filename}}}}\"\n\
         FilenameTemplate = \"{filename_template}\"\nPreferredVersion = \"{version}\"\n"
    )
}

/// The size and SHA-256 block for `bytes` published as `name`.
pub fn file_entry(key: &str, name: &str, bytes: &[u8]) -> String {
    format!(
        "[{key}.Files.\"{name}\"]\nSHA-256 = \"{:x}\"\nSize = {}\n",
        Sha256::digest(bytes),
        bytes.len()
    )
}

/// Configuration keeping every directory under `root`.
pub fn config_under(root: &Path) -> BuildToolConfig {
    BuildToolConfig {
        tool_chain_dir_template: root.join("toolchain").display().to_string(),
        download_dir_template: root.join("downloads").display().to_string(),
        build_dir_template: root.join("build").display().to_string(),
        ..Default::default()
    }
}

pub fn settings(root: &Path, manifest: &str, config: BuildToolConfig) -> Settings {
    let manifest = parse_manifest(manifest, Path::new("downloads.toml")).unwrap();
    Settings::from_parts(
        root.join("config.toml"),
        root.join("downloads.toml"),
        config,
        manifest,
        root,
        root.to_path_buf(),
        HostPlatform::new("amd64", "linux"),
        None,
    )
    .unwrap()
}

/// An executable shell script `dir/name` running `body`.
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Serves one HTTP response and returns the base URL.
pub async fn serve_once(status: &'static str, body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = vec![0u8; 8192];
        let _ = socket.read(&mut request).await;
        let head = format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&body).await.unwrap();
        let _ = socket.shutdown().await;
    });
    format!("http://{addr}")
}

pub fn direct_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
