use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use toolboot_toolchain::{
    manifest::manifest_entry_for, provenance::read_provenance, BootstrapResult, Coordinator,
    Outcome, Settings, Sources, Tool,
};
use tracing::debug;

#[derive(Parser)]
#[command(name = "toolboot", version, about = "Bootstrap pinned build tools")]
struct Cli {
    /// User configuration file (default: $CONFIG, then ./config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Download manifest (default: $DOWNLOADS_FILE, then the configuration)
    #[arg(long, global = true)]
    downloads_file: Option<PathBuf>,
    /// Print progress messages
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Print a JSON report on stdout
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Build and install Bison
    BootstrapBison,
    /// Build and install Flex
    BootstrapFlex,
    /// Build and install Cap'n Proto
    BootstrapCapnproto,
    /// Build and install the capnpc-go plugin
    BootstrapGoCapnp,
    /// Install a TinyGo release
    BootstrapTinygo,
    /// Install a Binaryen release
    BootstrapBinaryen,
    /// Build bpf_asm from kernel sources (installs Bison and Flex first)
    BootstrapBpfAsm,
    /// Bootstrap every tool
    BootstrapAll,
    /// Generate Go code for the configured Cap'n Proto schemas
    GenerateCapnp,
    /// Print the resolved configuration of every tool
    ShowConfig,
    /// Download a tool's archive and record its size and SHA-256 in the
    /// download manifest
    Pin {
        /// Tool key, e.g. bison or bpf-asm
        tool: String,
    },
    /// Print a manifest entry (size and SHA-256) for a downloaded archive
    ManifestEntry {
        /// Manifest section, e.g. bison or linux
        key: String,
        path: PathBuf,
    },
}

#[derive(Serialize)]
struct ToolJson {
    tool: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    executable: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    messages: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    toolboot_util::init_tracing(if cli.verbose { "info" } else { "warn" })?;

    if let Cmd::ManifestEntry { key, path } = &cli.cmd {
        print!("{}", manifest_entry_for(key, path)?);
        return Ok(());
    }

    let sources = Sources {
        config_path: cli.config.clone(),
        downloads_file: cli.downloads_file.clone(),
    }
    .with_env_fallbacks();
    let settings = Settings::load(&sources)?;
    debug!(
        config = %settings.config_path.display(),
        manifest = %settings.manifest_path.display(),
        "Loaded settings"
    );
    let mut coordinator = Coordinator::new(settings)?;

    let ok = match &cli.cmd {
        Cmd::BootstrapBison => single(&cli, coordinator.bootstrap_tool(Tool::Bison).await)?,
        Cmd::BootstrapFlex => single(&cli, coordinator.bootstrap_tool(Tool::Flex).await)?,
        Cmd::BootstrapCapnproto => {
            single(&cli, coordinator.bootstrap_tool(Tool::CapnProto).await)?
        }
        Cmd::BootstrapGoCapnp => single(&cli, coordinator.bootstrap_go_capnp().await)?,
        Cmd::BootstrapTinygo => single(&cli, coordinator.bootstrap_tool(Tool::TinyGo).await)?,
        Cmd::BootstrapBinaryen => {
            single(&cli, coordinator.bootstrap_tool(Tool::Binaryen).await)?
        }
        Cmd::BootstrapBpfAsm => single(&cli, coordinator.bootstrap_bpf_asm().await)?,
        Cmd::BootstrapAll => report(&cli, coordinator.bootstrap_all().await)?,
        Cmd::GenerateCapnp => {
            let generated = coordinator.generate_capnp().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&generated)?);
            } else {
                for message in &generated.messages {
                    println!("{message}");
                }
                if !generated.is_success() {
                    eprintln!("{} schema file(s) failed", generated.failures.len());
                }
            }
            generated.is_success()
        }
        Cmd::Pin { tool } => {
            let tool = Tool::from_key(tool).ok_or_else(|| {
                let known: Vec<&str> = Tool::ALL.iter().map(|tool| tool.key()).collect();
                format!("unknown tool {tool}; expected one of {}", known.join(", "))
            })?;
            let pinned = coordinator.pin_download(tool).await?;
            print!("{}", pinned.entry);
            eprintln!(
                "recorded {} in {}; review the archive before trusting this entry",
                pinned.file.display(),
                coordinator.settings().manifest_path.display()
            );
            true
        }
        Cmd::ShowConfig => {
            show_config(&cli, &coordinator).await?;
            true
        }
        Cmd::ManifestEntry { .. } => true,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn single(cli: &Cli, result: BootstrapResult) -> Result<bool, Box<dyn std::error::Error>> {
    report(cli, vec![result])
}

fn report(cli: &Cli, results: Vec<BootstrapResult>) -> Result<bool, Box<dyn std::error::Error>> {
    let ok = results.iter().all(|r| r.is_ok());
    if cli.json {
        let items: Vec<ToolJson> = results.into_iter().map(to_json).collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(ok);
    }
    for result in results {
        match result {
            Ok(report) => {
                if cli.verbose {
                    for message in &report.messages {
                        println!("  {message}");
                    }
                }
                println!(
                    "{} {}: {} ({})",
                    report.tool,
                    report.version,
                    outcome_label(report.outcome),
                    report.executable.display()
                );
            }
            Err(failure) => {
                for message in &failure.messages {
                    eprintln!("  {message}");
                }
                eprintln!("{failure}");
            }
        }
    }
    Ok(ok)
}

fn to_json(result: BootstrapResult) -> ToolJson {
    match result {
        Ok(report) => ToolJson {
            tool: report.tool,
            ok: true,
            version: Some(report.version),
            outcome: Some(report.outcome),
            executable: Some(report.executable),
            error: None,
            messages: report.messages,
        },
        Err(failure) => ToolJson {
            tool: failure.tool,
            ok: false,
            version: None,
            outcome: None,
            executable: None,
            error: Some(failure.error.to_string()),
            messages: failure.messages,
        },
    }
}

fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::UserProvided => "using configured executable",
        Outcome::AlreadyInstalled => "already installed",
        Outcome::Installed => "installed",
    }
}

async fn show_config(cli: &Cli, coordinator: &Coordinator) -> Result<(), Box<dyn std::error::Error>> {
    let settings = coordinator.settings();
    let mut tools = serde_json::Map::new();
    for tool in Tool::ALL {
        let value = match coordinator.resolve(tool) {
            Ok(resolved) => {
                let mut value = serde_json::to_value(&resolved)?;
                if let Ok(prov) = read_provenance(&resolved.install_dir) {
                    value["provenance"] = serde_json::to_value(prov)?;
                }
                value
            }
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        tools.insert(tool.key().to_string(), value);
    }
    let go = match coordinator.resolve_go().await {
        Ok(go) => serde_json::to_value(go)?,
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    };
    let doc = serde_json::json!({
        "config_file": settings.config_path,
        "downloads_file": settings.manifest_path,
        "directories": settings.directories,
        "user_agent": settings.user_agent,
        "host": { "arch": settings.host.arch, "os": settings.host.os },
        "go": go,
        "tools": tools,
    });

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("config file:    {}", settings.config_path.display());
    println!("downloads file: {}", settings.manifest_path.display());
    println!("toolchain dir:  {}", settings.directories.toolchain_dir.display());
    println!("download dir:   {}", settings.directories.download_dir.display());
    println!("build dir:      {}", settings.directories.build_dir.display());
    println!("host:           {}/{}", settings.host.os, settings.host.arch);
    for tool in Tool::ALL {
        match coordinator.resolve(tool) {
            Ok(resolved) => {
                let executable = resolved
                    .executable
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not installed)".into());
                println!(
                    "{} {}\n  url:        {}\n  install:    {}\n  executable: {}",
                    tool.key(),
                    resolved.version,
                    resolved.download_url,
                    resolved.install_dir.display(),
                    executable
                );
            }
            Err(e) => println!("{}\n  error: {e}", tool.key()),
        }
    }
    match coordinator.resolve_go().await {
        Ok(go) => println!(
            "go\n  executable: {}\n  GOPATH:     {}",
            go.executable.display(),
            go.gopath.display()
        ),
        Err(e) => println!("go\n  error: {e}"),
    }
    Ok(())
}
