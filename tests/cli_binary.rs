mod test_support;

use std::path::Path;
use std::process::{Command, Output};
use test_support::{content, module_names, seed_course, site, write_course_archive, Site};

fn run_cli(cwd: &Path, db: &Path, temp: &Path, args: &[&str]) -> Output {
    let exe = env!("CARGO_BIN_EXE_coursectl");
    Command::new(exe)
        .args(args)
        .current_dir(cwd)
        .env("COURSECTL_DATABASE_PATH", db)
        .env("COURSECTL_BACKUP_TEMP_DIR", temp)
        .env("RUST_LOG", "off")
        .output()
        .expect("spawn coursectl")
}

fn run_in(site: &Site, args: &[&str]) -> Output {
    run_cli(
        site.dir.path(),
        &site.config.database_path,
        &site.config.backup_temp_dir,
        args,
    )
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

#[test]
fn help_lists_subcommands() {
    let site = site();
    let out = run_in(&site, &["--help"]);
    assert!(out.status.success());
    let text = stdout(&out);
    for sub in ["import", "restore", "backup"] {
        assert!(text.contains(sub), "help is missing {}: {}", sub, text);
    }
}

#[test]
fn missing_destination_is_a_usage_error() {
    let site = site();
    let out = run_in(&site, &["restore", "--from=course.mbz"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("Usage"));
}

#[test]
fn missing_admin_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = run_cli(
        dir.path(),
        &dir.path().join("empty.sqlite3"),
        &dir.path().join("temp"),
        &["backup", "--courseid=1"],
    );
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("Error: No admin account was found"));
}

#[test]
fn invalid_merge_type_is_rejected() {
    let site = site();
    let from = seed_course(&site.conn, site.category, "a", "A", &[(0, &[("page", "P")])]);
    let to = seed_course(&site.conn, site.category, "b", "B", &[]);
    let out = run_in(
        &site,
        &[
            "import",
            &format!("--from={}", from),
            &format!("--to={}", to),
            "--type=merge",
        ],
    );
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("Invalid type specified: merge"));
    assert!(module_names(&site.conn, to).is_empty());
}

#[test]
fn directory_is_not_a_backup_file() {
    let site = site();
    let folder = site.path("folder");
    std::fs::create_dir_all(&folder).expect("mkdir");
    let out = run_in(
        &site,
        &[
            "restore",
            &format!("--from={}", folder.display()),
            &format!("--categoryid={}", site.category),
        ],
    );
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("From must be a file"));
}

#[test]
fn restore_through_the_binary() {
    let site = site();
    let mbz = site.path("lit.mbz");
    write_course_archive(&mbz, "lit", "Literature", &content(&[(0, &["Poems"])]));

    let out = run_in(
        &site,
        &[
            "restore",
            &format!("--from={}", mbz.display()),
            &format!("--categoryid={}", site.category),
        ],
    );
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("Backup contained course lit: Literature"));
    assert!(text.contains("Finished restore."));

    let course = coursectl::db::get_course_by_shortname(&site.conn, "lit")
        .expect("query")
        .expect("restored course");
    assert_eq!(module_names(&site.conn, course.id), vec!["Poems"]);
}

#[test]
fn delete_mode_announces_deletion_before_finishing() {
    let site = site();
    let course = seed_course(
        &site.conn,
        site.category,
        "eng",
        "English",
        &[(0, &[("page", "Old reading")])],
    );
    let mbz = site.path("eng.mbz");
    write_course_archive(&mbz, "eng", "English", &content(&[(0, &["New reading"])]));

    let out = run_in(
        &site,
        &[
            "restore",
            &format!("--from={}", mbz.display()),
            &format!("--courseid={}", course),
            "--type=delete",
        ],
    );
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    let deleting = text.find("Deleting contents of eng").expect("deletion line");
    let finished = text.find("Finished restore.").expect("finish line");
    assert!(deleting < finished);
    assert_eq!(module_names(&site.conn, course), vec!["New reading"]);
}

#[test]
fn failed_precheck_dumps_results() {
    let site = site();
    let mbz = site.path("bad.mbz");
    let mut bad = content(&[(0, &["Intro"])]);
    bad.format_version = 99;
    write_course_archive(&mbz, "bad", "Bad", &bad);

    let out = run_in(
        &site,
        &[
            "restore",
            &format!("--from={}", mbz.display()),
            &format!("--categoryid={}", site.category),
        ],
    );
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("\"errors\""), "stderr: {}", err);
    assert!(err.contains("Error: Failed restore pre-check"));
}
