#![allow(dead_code)]

use coursectl::backup::{BackupMode, CourseContent, ModuleSnapshot, SectionSnapshot, CONTENT_FORMAT_VERSION};
use coursectl::db::{self, Admin};
use coursectl::Config;
use rusqlite::Connection;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::ZipWriter;

pub struct Site {
    pub dir: TempDir,
    pub config: Config,
    pub conn: Connection,
    pub admin: Admin,
    pub category: i64,
}

impl Site {
    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }
}

pub fn site() -> Site {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        database_path: dir.path().join("site.sqlite3"),
        backup_temp_dir: dir.path().join("backup-temp"),
        admin_username: None,
        cleanup_temp: false,
    };
    let conn = db::open_db(&config.database_path).expect("open db");
    let admin_id = db::create_user(&conn, "admin", true).expect("admin");
    let category = db::create_category(&conn, "Miscellaneous").expect("category");
    Site {
        dir,
        config,
        conn,
        admin: Admin {
            id: admin_id,
            username: "admin".to_string(),
        },
        category,
    }
}

/// Creates a course with `(section number, [(modname, name)])` content.
pub fn seed_course(
    conn: &Connection,
    category: i64,
    shortname: &str,
    fullname: &str,
    sections: &[(i64, &[(&str, &str)])],
) -> i64 {
    let course = db::create_new_course(conn, fullname, shortname, category).expect("course");
    for (number, mods) in sections {
        let section = db::ensure_section(conn, course, *number, None, "").expect("section");
        for (modname, name) in mods.iter() {
            db::append_module(conn, course, section, modname, name).expect("module");
        }
    }
    course
}

pub fn module_names(conn: &Connection, course: i64) -> Vec<String> {
    db::list_modules(conn, course)
        .expect("list modules")
        .into_iter()
        .map(|m| m.name)
        .collect()
}

pub fn course_count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM courses", [], |r| r.get(0))
        .expect("count courses")
}

pub fn content(sections: &[(i64, &[&str])]) -> CourseContent {
    CourseContent {
        format_version: CONTENT_FORMAT_VERSION,
        backup_mode: BackupMode::General,
        source_course_id: None,
        created_by: None,
        summary: "Restored summary".to_string(),
        format: "weeks".to_string(),
        sections: sections
            .iter()
            .map(|(number, names)| SectionSnapshot {
                number: *number,
                name: None,
                summary: String::new(),
                modules: names
                    .iter()
                    .map(|n| ModuleSnapshot {
                        modname: "page".to_string(),
                        name: n.to_string(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

pub fn course_xml(shortname: &str, fullname: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<course><shortname>{}</shortname><fullname>{}</fullname></course>",
        shortname, fullname
    )
}

pub fn write_zip(path: &Path, entries: &[(&str, String)]) {
    let mut zip = ZipWriter::new(File::create(path).expect("create archive"));
    for (name, body) in entries {
        zip.start_file(*name, FileOptions::default())
            .expect("start entry");
        zip.write_all(body.as_bytes()).expect("write entry");
    }
    zip.finish().expect("finish archive");
}

/// Writes a current-format archive holding `content`.
pub fn write_course_archive(path: &Path, shortname: &str, fullname: &str, content: &CourseContent) {
    write_zip(
        path,
        &[
            ("course/course.xml", course_xml(shortname, fullname)),
            (
                "course/content.json",
                serde_json::to_string_pretty(content).expect("serialize content"),
            ),
        ],
    );
}

pub fn dir_entries(path: &Path) -> usize {
    std::fs::read_dir(path).map(|it| it.count()).unwrap_or(0)
}
