//! Schema code generation: every `*.capnp` file in the configured
//! directories is compiled by `capnp` and the compiled request is piped into
//! the `capnpc-go` plugin.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::CapnpGenerateConfig;
use crate::error::Error;
use crate::process;

#[derive(Debug, Default, Serialize)]
pub struct GenerateReport {
    pub generated: Vec<PathBuf>,
    #[serde(serialize_with = "serialize_failures")]
    pub failures: Vec<(PathBuf, Error)>,
    pub messages: Vec<String>,
}

impl GenerateReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn note(&mut self, message: String) {
        info!("{message}");
        self.messages.push(message);
    }

    fn failed(&mut self, path: PathBuf, error: Error) {
        let message = format!("{}: {error}", path.display());
        warn!("{message}");
        self.messages.push(message);
        self.failures.push((path, error));
    }
}

fn serialize_failures<S>(failures: &[(PathBuf, Error)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeSeq;
    let mut seq = serializer.serialize_seq(Some(failures.len()))?;
    for (path, error) in failures {
        seq.serialize_element(&(path, error.to_string()))?;
    }
    seq.end()
}

/// Process every schema, continuing past per-file failures.
pub async fn generate_capnp(
    capnp: &Path,
    plugin: &Path,
    config: &CapnpGenerateConfig,
    working_dir: &Path,
) -> GenerateReport {
    let mut report = GenerateReport::default();
    let capnp = capnp.display().to_string();
    let plugin = plugin.display().to_string();
    let no_args: [String; 0] = [];
    let std_dir = toolboot_util::absolutize(working_dir, Path::new(&config.std_dir));
    let import_path = toolboot_util::absolutize(working_dir, Path::new(&config.import_path));

    for dir in &config.capnp_dirs {
        let dir = toolboot_util::absolutize(working_dir, Path::new(dir));
        let schemas = match schema_files(&dir) {
            Ok(schemas) => schemas,
            Err(error) => {
                report.failed(dir, error);
                continue;
            }
        };
        if schemas.is_empty() {
            report.note(format!("No schema files in {}", dir.display()));
        }
        for schema in schemas {
            let args = compile_args(&dir, &std_dir, &import_path, &schema);
            let plugin_dir = schema.parent().unwrap_or(&dir).to_path_buf();
            let producer = (capnp.as_str(), args.as_slice());
            let consumer = (plugin.as_str(), &no_args[..]);
            match process::run_piped(producer, consumer, &plugin_dir).await {
                Ok(()) => {
                    report.note(format!("Generated Go code for {}", schema.display()));
                    report.generated.push(schema);
                }
                Err(error) => report.failed(schema, error),
            }
        }
    }
    report
}

fn schema_files(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let pattern = format!("{}/*.capnp", dir.display());
    let paths = glob::glob(&pattern)
        .map_err(|e| Error::config(format!("invalid schema pattern {pattern}: {e}")))?;
    let mut files = Vec::new();
    for path in paths {
        let path = path.map_err(|e| Error::io(format!("list {}", dir.display()), e.into()))?;
        files.push(path);
    }
    files.sort();
    Ok(files)
}

fn compile_args(dir: &Path, std_dir: &Path, import_path: &Path, schema: &Path) -> Vec<String> {
    vec![
        "compile".to_string(),
        "--output=-".to_string(),
        format!("--src-prefix={}/", dir.display()),
        format!("--import-path={}", std_dir.display()),
        format!("--import-path={}", import_path.display()),
        schema.display().to_string(),
    ]
}
