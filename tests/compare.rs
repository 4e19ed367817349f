use std::path::Path;
use std::process::{Command, Output};

use git2::{Repository, Signature};
use serde_json::Value;

fn commit(repo: &Repository, path: &str, content: &str, message: &str) -> String {
    let root = repo.workdir().unwrap();
    std::fs::write(root.join(path), content).unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new(path)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("Test", "test@example.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<_> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
        .to_string()
}

fn write_report(root: &Path, sha: &str, lines: &str) {
    let dir = root.join(".covcompare/reports");
    std::fs::create_dir_all(&dir).unwrap();
    let report = format!(
        r#"{{"files": {{"a.rs": {{"lines": {{"format": "dense", "lines": {lines}}}}}}}}}"#
    );
    std::fs::write(dir.join(format!("{sha}.json")), report).unwrap();
}

// Line 1 goes from miss to hit without being edited; line 3 is added.
fn setup() -> (tempfile::TempDir, String, String) {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    let base = commit(&repo, "a.rs", "fn a() {}\nfn b() {}\n", "initial");
    let head = commit(&repo, "a.rs", "fn a() {}\nfn b() {}\nfn c() {}\n", "add c");
    write_report(dir.path(), &base, r#"[{"coverage": 0}, {"coverage": 1}]"#);
    write_report(
        dir.path(),
        &head,
        r#"[{"coverage": 1}, {"coverage": 1}, {"coverage": 0}]"#,
    );
    (dir, base, head)
}

fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_covcompare"))
        .args(args)
        .current_dir(dir)
        .env_remove("COVCOMPARE_LOG")
        .output()
        .unwrap()
}

fn json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "covcompare failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn files_reports_changes_outside_added_lines() {
    let (dir, base, head) = setup();
    let out = json(&run(
        dir.path(),
        &["--format", "json", "files", "--base", &base, "--head", &head],
    ));

    assert_eq!(out["base"], base.as_str());
    assert_eq!(out["hasUnmergedBaseCommits"], false);
    assert_eq!(out["totals"]["head"]["lines"], 3);
    assert_eq!(out["totals"]["head"]["diff"]["misses"], 1);

    let files = out["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["name"]["head"], "a.rs");
    assert_eq!(files[0]["stats"]["added"], 1);
    assert_eq!(files[0]["changeSummary"]["hits"], 1);
    assert_eq!(files[0]["changeSummary"]["misses"], -1);
}

#[test]
fn file_view_resolves_revisions_and_reads_source() {
    let (dir, _, _) = setup();
    let out = json(&run(
        dir.path(),
        &["--format", "json", "file", "a.rs", "--base", "HEAD~1", "--head", "HEAD"],
    ));

    let lines = out["lines"].as_array().unwrap();
    assert_eq!(lines.len(), 3);
    // diff lines keep their marker
    assert_eq!(lines[0]["value"], " fn a() {}");
    assert_eq!(lines[0]["baseCoverage"], "miss");
    assert_eq!(lines[0]["headCoverage"], "hit");
    assert_eq!(lines[2]["added"], true);
    assert_eq!(lines[2]["headLn"], 3);
    assert!(lines[2]["baseLn"].is_null());
}

#[test]
fn file_view_text_marks_coverage() {
    let (dir, _, _) = setup();
    let output = run(
        dir.path(),
        &["--color", "never", "file", "a.rs", "--base", "HEAD~1", "--head", "HEAD"],
    );
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("MH  fn a() {}"), "stdout: {stdout}");
    assert!(stdout.contains("changes outside the diff"));
}

#[test]
fn pull_records_changed_files_in_cache() {
    let (dir, base, head) = setup();
    let cache = dir.path().join("cache.db");
    let cache_arg = cache.display().to_string();
    let args: [&str; 11] = [
        "--format", "json", "pull", "--pullid", "1", "--base", &base, "--head", &head,
        "--cache", &cache_arg,
    ];

    let out = json(&run(dir.path(), &args));
    assert_eq!(out["pseudoComparison"], false);
    assert_eq!(out["alignedBaseReport"], false);
    assert_eq!(out["files"][0]["changeSummary"]["hits"], 1);
    assert!(out["files"][0].get("shouldSearchForChanges").is_none());
    assert!(cache.exists());

    let again = json(&run(dir.path(), &args));
    assert_eq!(again["files"][0]["shouldSearchForChanges"], true);
}

#[test]
fn missing_report_fails() {
    let (dir, base, head) = setup();
    std::fs::remove_file(dir.path().join(format!(".covcompare/reports/{head}.json"))).unwrap();

    let output = run(dir.path(), &["files", "--base", &base, "--head", &head]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing coverage report"), "stderr: {stderr}");
}

#[test]
fn outside_a_repository_fails_with_hint() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(dir.path(), &["files", "--base", "a", "--head", "b"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Not a git repository"));
}
