//! The `overleaf-store` binary against a local remote.

mod common;

use common::{Fixture, MAIN_TEX};
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

fn write_config(fixture: &Fixture) -> PathBuf {
    let path = fixture.dir.path().join("overleaf.toml");
    fs::write(
        &path,
        format!(
            "mirror_root = '{}'\n\n[projects.paper]\nname = 'Paper'\nremote = '{}'\n",
            fixture.dir.path().join("mirrors").display(),
            fixture.remote.display()
        ),
    )
    .unwrap();
    path
}

fn run(fixture: &Fixture, args: &[&str]) -> Output {
    let config = write_config(fixture);
    Command::new(env!("CARGO_BIN_EXE_overleaf-store"))
        .arg("--config")
        .arg(&config)
        .args(args)
        .env_remove("OVERLEAF_CONFIG_FILE")
        .env("NO_COLOR", "1")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_help_lists_commands() {
    let output = Command::new(env!("CARGO_BIN_EXE_overleaf-store"))
        .arg("--help")
        .output()
        .unwrap();

    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["projects", "sections", "update-section", "sync", "refresh", "push"] {
        assert!(text.contains(command), "missing {command}");
    }
}

#[test]
fn test_projects_and_read() {
    let fixture = Fixture::with_main_tex();

    let projects = run(&fixture, &["projects"]);
    assert!(projects.status.success());
    assert!(stdout(&projects).contains("paper"));

    let read = run(&fixture, &["read", "main.tex"]);
    assert!(read.status.success());
    assert_eq!(stdout(&read), MAIN_TEX);
}

#[test]
fn test_sections_json() {
    let fixture = Fixture::with_main_tex();

    let output = run(&fixture, &["--json", "sections", "main.tex"]);
    assert!(output.status.success());

    let outline: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let titles: Vec<_> = outline
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["title"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(titles, ["A", "B", "C"]);
    assert_eq!(outline[1]["kind"], "section");
}

#[test]
fn test_update_section_dry_run_then_commit() {
    let fixture = Fixture::with_main_tex();

    let dry = run(
        &fixture,
        &["update-section", "main.tex", "B", "--content", "qux\n", "--dry-run"],
    );
    assert!(dry.status.success());
    let text = stdout(&dry);
    assert!(text.contains("-bar"));
    assert!(text.contains("+qux"));
    assert!(text.contains("DRY RUN"));
    assert_eq!(fixture.remote_file("main.tex").unwrap(), MAIN_TEX);

    let real = run(
        &fixture,
        &["update-section", "main.tex", "B", "--content", "qux\n", "-m", "Rewrite B"],
    );
    assert!(real.status.success(), "{}", String::from_utf8_lossy(&real.stderr));
    assert!(fixture.remote_file("main.tex").unwrap().contains("\\section{B}\nqux\n"));
    assert_eq!(fixture.remote_log()[0], "Rewrite B");
}

#[test]
fn test_push_publishes_commit_made_with_no_push() {
    let fixture = Fixture::with_main_tex();

    let local = run(
        &fixture,
        &["append-section", "main.tex", "B", "--content", "later\n", "--no-push"],
    );
    assert!(local.status.success(), "{}", String::from_utf8_lossy(&local.stderr));
    assert_eq!(fixture.remote_file("main.tex").unwrap(), MAIN_TEX);

    let push = run(&fixture, &["--json", "push"]);
    assert!(push.status.success(), "{}", String::from_utf8_lossy(&push.stderr));
    let report: serde_json::Value = serde_json::from_str(&stdout(&push)).unwrap();
    assert_eq!(report["pushed"], true);
    assert!(fixture.remote_file("main.tex").unwrap().contains("bar\nlater\n"));
}

#[test]
fn test_errors_exit_nonzero() {
    let fixture = Fixture::with_main_tex();

    let traversal = run(&fixture, &["read", "../secret"]);
    assert!(!traversal.status.success());

    let unknown = run(&fixture, &["--project", "nope", "read", "main.tex"]);
    assert!(!unknown.status.success());
    assert!(String::from_utf8_lossy(&unknown.stderr).contains("nope"));
}
