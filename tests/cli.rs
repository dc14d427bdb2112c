use std::fs;
use std::path::Path;

use assert_cmd::Command;
use tempfile::tempdir;

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn scaffold(root: &Path) {
    write(
        root,
        "src/index.html",
        r#"<html><body>
<!-- build:js js/app.js -->
<script src="js/main.js"></script>
<!-- endbuild -->
</body></html>
"#,
    );
    write(root, "src/js/main.js", "console.log('hi');\n");
}

fn pipemin(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("pipemin").expect("binary present");
    cmd.current_dir(root);
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).expect("utf-8 stdout")
}

#[test]
fn run_without_tasks_builds() {
    let temp = tempdir().unwrap();
    scaffold(temp.path());

    pipemin(temp.path()).arg("run").assert().success();

    assert_eq!(
        fs::read_to_string(temp.path().join("dist/js/app.js")).unwrap(),
        "console.log('hi');"
    );
    assert!(temp.path().join("dist/index.html").is_file());
    assert!(!temp.path().join("package.zip").exists());
}

#[test]
fn run_package_writes_archive_and_metrics() {
    let temp = tempdir().unwrap();
    scaffold(temp.path());

    pipemin(temp.path())
        .args(["run", "package", "--metrics-json", "reports/metrics.json"])
        .assert()
        .success();

    assert!(temp.path().join("package.zip").is_file());
    let metrics: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(temp.path().join("reports/metrics.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(metrics["output_files"], 2);
}

#[test]
fn cwd_flag_selects_the_project() {
    let temp = tempdir().unwrap();
    let project = temp.path().join("site");
    scaffold(&project);

    pipemin(temp.path())
        .args(["--cwd", "site", "run", "build"])
        .assert()
        .success();
    assert!(project.join("dist/index.html").is_file());
}

#[test]
fn tasks_lists_configured_names() {
    let temp = tempdir().unwrap();
    write(temp.path(), "pipemin.yaml", "tasks:\n  package: ship\n");

    let stdout = stdout_of(pipemin(temp.path()).arg("tasks"));
    assert!(stdout.contains("- build (after clean:dist)"));
    assert!(stdout.contains("- clean:dist"));
    assert!(stdout.contains("- ship (after build)"));
}

#[test]
fn config_prints_effective_values() {
    let temp = tempdir().unwrap();
    write(temp.path(), "custom.yaml", "order:\n  minify: 42\n");

    let stdout = stdout_of(pipemin(temp.path()).args(["--config", "custom.yaml", "config"]));
    assert!(stdout.contains("pipeminMinify: 42"));
    assert!(stdout.contains("pipeminPackage: package.zip"));
}

#[test]
fn unknown_task_fails() {
    let temp = tempdir().unwrap();
    pipemin(temp.path())
        .args(["run", "deploy"])
        .assert()
        .failure();
}

#[test]
fn validate_rejects_unknown_stage() {
    let temp = tempdir().unwrap();
    write(
        temp.path(),
        "pipemin.yaml",
        "pipes:\n  - stage: postMerj\n    use: sort\n",
    );
    pipemin(temp.path()).arg("validate").assert().failure();
}

#[test]
fn validate_accepts_defaults() {
    let temp = tempdir().unwrap();
    pipemin(temp.path()).arg("validate").assert().success();
}

#[test]
fn plan_is_written_as_yaml() {
    let temp = tempdir().unwrap();
    pipemin(temp.path())
        .args(["plan", "--output", "out/plan.yaml"])
        .assert()
        .success();

    let plan: serde_json::Value =
        serde_yaml::from_str(&fs::read_to_string(temp.path().join("out/plan.yaml")).unwrap())
            .unwrap();
    let stages = plan["stages"].as_array().unwrap();
    assert_eq!(stages.len(), 9);
    assert!(plan["config_hash"].as_str().unwrap().len() == 64);
}

#[test]
fn list_transforms_names_builtins() {
    let temp = tempdir().unwrap();
    let stdout = stdout_of(pipemin(temp.path()).arg("list-transforms"));
    for name in ["banner", "concat", "minify-css", "minify-html", "minify-js", "rev", "sort"] {
        assert!(stdout.contains(&format!("- {name}")), "missing {name}");
    }
}
