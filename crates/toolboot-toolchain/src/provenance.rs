use std::{fs, io, path::Path};

use serde::Serialize;

pub const PROVENANCE_FILE_NAME: &str = "provenance.txt";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Provenance {
    pub tool: String,
    pub version: String,
    pub source_url: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub cached_path: String,
    pub installed_at_unix_millis: i64,
}

pub fn write_provenance(dir: &Path, prov: &Provenance) -> io::Result<()> {
    let contents = format!(
        "tool={}\nversion={}\nsource_url={}\nsha256={}\nsize_bytes={}\ncached_path={}\ninstalled_at_unix_millis={}\n",
        prov.tool,
        prov.version,
        prov.source_url,
        prov.sha256,
        prov.size_bytes,
        prov.cached_path,
        prov.installed_at_unix_millis
    );
    fs::write(dir.join(PROVENANCE_FILE_NAME), contents)
}

fn parse_provenance(contents: &str) -> Provenance {
    let mut prov = Provenance::default();
    for line in contents.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "tool" => prov.tool = value.to_string(),
            "version" => prov.version = value.to_string(),
            "source_url" => prov.source_url = value.to_string(),
            "sha256" => prov.sha256 = value.to_string(),
            "size_bytes" => {
                if let Ok(parsed) = value.parse::<u64>() {
                    prov.size_bytes = parsed;
                }
            }
            "cached_path" => prov.cached_path = value.to_string(),
            "installed_at_unix_millis" => {
                if let Ok(parsed) = value.parse::<i64>() {
                    prov.installed_at_unix_millis = parsed;
                }
            }
            _ => {}
        }
    }
    prov
}

pub fn read_provenance(dir: &Path) -> io::Result<Provenance> {
    let contents = fs::read_to_string(dir.join(PROVENANCE_FILE_NAME))?;
    Ok(parse_provenance(&contents))
}
