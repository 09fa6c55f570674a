#![cfg(unix)]

//! bpf_asm built from kernel sources with a scripted `make`. Kept in its own
//! test binary because it puts that `make` first on `PATH`.

mod support;

use std::fs;

use toolboot_toolchain::{state::read_registry, Coordinator, Outcome};

use support::{config_under, file_entry, script, section, tar_gz, UNREACHABLE};

#[tokio::test]
async fn bpf_asm_builds_against_configured_lex_and_yacc() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();

    let args_file = root.join("make-args.txt");
    let fake_bin = root.join("fake-bin");
    script(
        &fake_bin,
        "make",
        &format!(
            "printf '%s\\n' \"$@\" > '{}'\nprintf '#!/bin/sh\\n' > bpf_asm\nchmod 755 bpf_asm",
            args_file.display()
        ),
    );
    let path = std::env::var("PATH").unwrap_or_default();
    std::env::set_var("PATH", format!("{}:{path}", fake_bin.display()));

    let bison = script(&root.join("bin"), "bison", "exit 0");
    let flex = script(&root.join("bin"), "flex", "exit 0");
    let mut config = config_under(root);
    config.bison.executable = bison.display().to_string();
    config.flex.executable = flex.display().to_string();

    let kernel = tar_gz(&[
        ("linux-6.6.30/", 0o755, ""),
        ("linux-6.6.30/Makefile", 0o644, "all:\n"),
        ("linux-6.6.30/tools/", 0o755, ""),
        ("linux-6.6.30/tools/bpf/", 0o755, ""),
        ("linux-6.6.30/tools/bpf/Makefile", 0o644, "bpf_asm:\n"),
        ("linux-6.6.30/tools/bpf/bpf_asm.c", 0o644, "int main(void) { return 0; }\n"),
        ("linux-6.6.30/kernel/", 0o755, ""),
        ("linux-6.6.30/kernel/bpf.c", 0o644, "\n"),
    ]);
    let downloads = root.join("downloads");
    fs::create_dir_all(&downloads).unwrap();
    fs::write(downloads.join("linux-6.6.30.tar.gz"), &kernel).unwrap();

    let manifest = format!(
        "{}{}{}{}{}{}",
        section("bison", "bison-{{.Version}}.tar.xz", "3.8.2", UNREACHABLE),
        file_entry("bison", "bison-3.8.2.tar.xz", b"bison"),
        section("flex", "flex-{{.Version}}.tar.gz", "2.6.4", UNREACHABLE),
        file_entry("flex", "flex-2.6.4.tar.gz", b"flex"),
        section("linux", "linux-{{.Version}}.tar.gz", "6.6.30", UNREACHABLE),
        file_entry("linux", "linux-6.6.30.tar.gz", &kernel),
    );
    let mut coordinator = Coordinator::new(support::settings(root, &manifest, config)).unwrap();

    let report = coordinator.bootstrap_bpf_asm().await.unwrap();
    assert_eq!(report.outcome, Outcome::Installed);
    let install_dir = root.join("toolchain").join("bpf_asm-6.6.30");
    assert_eq!(report.executable, install_dir.join("tools/bpf/bpf_asm"));
    assert!(install_dir.join("tools/bpf/bpf_asm.c").is_file());
    assert!(!install_dir.join("kernel").exists());
    assert!(report.messages.iter().any(|m| m.contains("Bison")));

    let args = fs::read_to_string(&args_file).unwrap();
    let args: Vec<&str> = args.lines().collect();
    assert_eq!(
        args,
        vec![
            format!("LEX={}", flex.display()),
            format!("YACC={}", bison.display()),
            "bpf_asm".to_string(),
        ]
    );

    let registry = read_registry(&root.join("toolchain")).unwrap();
    let record = registry.get("bpf-asm").unwrap();
    assert_eq!(record.executable, "bpf_asm-6.6.30/tools/bpf/bpf_asm");
    assert_eq!(record.version, "6.6.30");
    assert!(registry.get("bison").is_none());
}
