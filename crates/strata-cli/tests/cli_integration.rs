//! CLI subprocess integration tests.
//!
//! Every test runs the `strata` binary against a private repository with the
//! mock mounter and a shell script standing in for mksquashfs.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::OnceLock;

/// Lists the tree it is given instead of compressing it, so identical trees
/// produce identical blobs.
const FAKE_MKSQUASHFS: &str = "#!/bin/sh\nset -e\ncd \"$1\"\nfind . | sort > \"$2\"\n";

fn fake_mksquashfs() -> &'static Path {
    static SCRIPT: OnceLock<(tempfile::TempDir, PathBuf)> = OnceLock::new();
    let (_, path) = SCRIPT.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mksquashfs");
        fs::write(&path, FAKE_MKSQUASHFS).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        (dir, path)
    });
    path
}

struct Env {
    dir: tempfile::TempDir,
}

impl Env {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            format!(
                "mounter = \"mock\"\n\n[mksquashfs]\nprogram = \"{}\"\nargs = []\n",
                fake_mksquashfs().display()
            ),
        )
        .unwrap();
        Self { dir }
    }

    fn root(&self) -> PathBuf {
        self.dir.path().join("repo")
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_strata"))
            .arg("--config")
            .arg(self.dir.path().join("config.toml"))
            .arg("--root")
            .arg(self.root())
            .args(args)
            .env_remove("STRATA_LOG")
            .output()
            .unwrap()
    }

    fn tree(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let base = self.dir.path().join(name);
        for (path, content) in files {
            let path = base.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        base
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout)
        .unwrap_or_else(|e| panic!("invalid JSON ({e}): {}", stdout(output)))
}

fn tar_of(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_mode(0o644);
        header.set_size(content.len() as u64);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap()
}

#[test]
fn cli_version_exits_zero() {
    let output = Command::new(env!("CARGO_BIN_EXE_strata"))
        .arg("--version")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("strata"));
}

#[test]
fn cli_help_lists_commands() {
    let output = Command::new(env!("CARGO_BIN_EXE_strata"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = stdout(&output);
    for cmd in ["create", "lookup", "checkout", "release", "build"] {
        assert!(text.contains(cmd), "help must list '{cmd}': {text}");
    }
}

#[test]
fn cli_completions_bash() {
    let output = Command::new(env!("CARGO_BIN_EXE_strata"))
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("strata"));
}

#[test]
fn cli_init_json_reports_layout() {
    let env = Env::new();
    let output = env.run(&["--json", "init"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let value = json(&output);
    assert_eq!(value["format_version"], 1);
    assert_eq!(value["mounter"], "mock");
    for dir in ["layers", "manifests", "mnt", "tmp"] {
        assert!(env.root().join(dir).is_dir(), "{dir} missing");
    }
}

#[test]
fn cli_create_then_lookup_by_tag() {
    let env = Env::new();
    let tree = env.tree("base", &[("etc/hostname", "box")]);
    let output = env.run(&["create", tree.to_str().unwrap(), "--tag", "base"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let id = stdout(&output).trim().to_owned();
    assert_eq!(id.len(), 128);

    let output = env.run(&["lookup", "base"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let manifest = json(&output);
    assert_eq!(manifest["schema"], "strata/image.v2");

    let by_id = env.run(&["lookup", &id]);
    assert_eq!(stdout(&by_id), stdout(&output));
}

#[test]
fn cli_lookup_missing_exits_not_found() {
    let env = Env::new();
    let output = env.run(&["lookup", "ghost"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("image not found"));
}

#[test]
fn cli_create_with_parent_stacks_layers() {
    let env = Env::new();
    let base = env.tree("base", &[("a", "1")]);
    let top = env.tree("top", &[("b", "2")]);
    assert!(env
        .run(&["create", base.to_str().unwrap(), "--tag", "base"])
        .status
        .success());

    let output = env.run(&[
        "--json",
        "create",
        top.to_str().unwrap(),
        "--parent",
        "base",
        "--tag",
        "top",
    ]);
    assert!(output.status.success(), "{}", stderr(&output));
    let value = json(&output);
    assert_eq!(value["tag"], "top");
    assert_eq!(value["layers"].as_array().unwrap().len(), 2);
}

#[test]
fn cli_tag_and_list() {
    let env = Env::new();
    let tree = env.tree("base", &[("a", "1")]);
    let id = stdout(&env.run(&["create", tree.to_str().unwrap()]))
        .trim()
        .to_owned();

    let output = env.run(&["tag", "stable", &id]);
    assert!(output.status.success(), "{}", stderr(&output));

    let output = env.run(&["--json", "list"]);
    assert!(output.status.success());
    let rows = json(&output);
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], id.as_str());
    assert_eq!(rows[0]["tags"][0], "stable");
}

#[test]
fn cli_tag_unknown_target_fails() {
    let env = Env::new();
    let output = env.run(&["tag", "stable", "ghost"]);
    assert!(!output.status.success());
}

#[test]
fn cli_checkout_then_release() {
    let env = Env::new();
    let tree = env.tree("base", &[("etc/os-release", "ID=strata")]);
    assert!(env
        .run(&["create", tree.to_str().unwrap(), "--tag", "base"])
        .status
        .success());

    let output = env.run(&["--json", "checkout", "base"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let checkout = json(&output);
    let root = PathBuf::from(checkout["root"].as_str().unwrap());
    let upper = PathBuf::from(checkout["upper"].as_str().unwrap());
    assert!(root.is_dir());
    assert!(upper.is_dir());
    assert_eq!(checkout["lower"].as_array().unwrap().len(), 1);

    let output = env.run(&["release", root.to_str().unwrap()]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(!root.exists());
    assert!(!upper.exists());
}

#[test]
fn cli_release_outside_repository_fails() {
    let env = Env::new();
    env.run(&["init"]);
    let outside = env.tree("elsewhere", &[("keep", "me")]);
    let output = env.run(&["release", outside.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(outside.join("keep").exists());
}

#[test]
fn cli_checkout_unknown_image_exits_not_found() {
    let env = Env::new();
    let output = env.run(&["checkout", "ghost"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_build_from_export() {
    let env = Env::new();
    let export = env.dir.path().join("export");
    let image_dir = export.join("app");
    fs::create_dir_all(&image_dir).unwrap();
    fs::write(
        image_dir.join("history.json"),
        r#"[{"id": "l1"}, {"id": "l2", "tags": ["base"]}, {"id": "l3", "tags": ["app"]}]"#,
    )
    .unwrap();
    fs::write(image_dir.join("l1.tar"), tar_of(&[("etc/hostname", "one")])).unwrap();
    fs::write(image_dir.join("l2.tar"), tar_of(&[("bin/sh", "sh")])).unwrap();
    fs::write(image_dir.join("l3.tar"), tar_of(&[("app/run", "go")])).unwrap();

    let output = env.run(&[
        "--json",
        "build",
        "app",
        "--from",
        export.to_str().unwrap(),
        "--tag",
        "app",
    ]);
    assert!(output.status.success(), "{}", stderr(&output));
    let manifest = json(&output);
    assert_eq!(manifest["schema"], "strata/image.v2");

    let lookup = env.run(&["lookup", "app"]);
    assert!(lookup.status.success(), "{}", stderr(&lookup));
    assert_eq!(json(&lookup), manifest);
}

#[test]
fn cli_build_without_export_fails() {
    let env = Env::new();
    let output = env.run(&["build", "app", "--from", env.dir.path().to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("no export"));
}

#[test]
fn cli_unknown_mounter_is_store_error() {
    let env = Env::new();
    let output = env.run(&["--mounter", "bogus", "list"]);
    assert_eq!(output.status.code(), Some(3));
}
