use crate::archive::CURRENT_METADATA_ENTRY;
use crate::db::{self, Admin, Course};
use crate::error::{Error, Result};
use anyhow::Context;
use quick_xml::escape::escape;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const CONTENT_ENTRY: &str = "course/content.json";
pub const CONTENT_FORMAT_VERSION: u32 = 1;

/// Purpose the snapshot was taken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupMode {
    General,
    Import,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseContent {
    pub format_version: u32,
    pub backup_mode: BackupMode,
    #[serde(default)]
    pub source_course_id: Option<i64>,
    #[serde(default)]
    pub created_by: Option<i64>,
    #[serde(default)]
    pub summary: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub sections: Vec<SectionSnapshot>,
}

fn default_format() -> String {
    "topics".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionSnapshot {
    pub number: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub modules: Vec<ModuleSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSnapshot {
    pub modname: String,
    pub name: String,
}

impl CourseContent {
    pub fn module_count(&self) -> usize {
        self.sections.iter().map(|s| s.modules.len()).sum()
    }
}

pub fn write_course_xml(dir: &Path, course_id: Option<i64>, shortname: &str, fullname: &str) -> Result<()> {
    let path = dir.join(CURRENT_METADATA_ENTRY);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let id_attr = course_id.map(|id| format!(" id=\"{}\"", id)).unwrap_or_default();
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<course{}>\n  <shortname>{}</shortname>\n  <fullname>{}</fullname>\n</course>\n",
        id_attr,
        escape(shortname),
        escape(fullname)
    );
    std::fs::write(&path, xml)
        .with_context(|| format!("failed to write {}", path.to_string_lossy()))?;
    Ok(())
}

pub fn write_content(dir: &Path, content: &CourseContent) -> Result<()> {
    let path = dir.join(CONTENT_ENTRY);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(content).context("failed to serialize course content")?;
    std::fs::write(&path, text)
        .with_context(|| format!("failed to write {}", path.to_string_lossy()))?;
    Ok(())
}

pub fn read_content(dir: &Path) -> Result<CourseContent> {
    let path = dir.join(CONTENT_ENTRY);
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    let content = serde_json::from_str(&text)
        .with_context(|| format!("{} is invalid JSON", path.to_string_lossy()))?;
    Ok(content)
}

/// Snapshots the current sections and modules of a course.
pub fn snapshot_course(
    conn: &Connection,
    course: &Course,
    mode: BackupMode,
    admin: &Admin,
) -> Result<CourseContent> {
    let modules = db::list_modules(conn, course.id)?;
    let sections = db::list_sections(conn, course.id)?
        .into_iter()
        .map(|s| SectionSnapshot {
            number: s.section_num,
            modules: modules
                .iter()
                .filter(|m| m.section_num == s.section_num)
                .map(|m| ModuleSnapshot {
                    modname: m.modname.clone(),
                    name: m.name.clone(),
                })
                .collect(),
            name: s.name,
            summary: s.summary,
        })
        .collect();

    Ok(CourseContent {
        format_version: CONTENT_FORMAT_VERSION,
        backup_mode: mode,
        source_course_id: Some(course.id),
        created_by: Some(admin.id),
        summary: course.summary.clone(),
        format: course.format.clone(),
        sections,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStatus {
    Created,
    Finished,
}

/// Produces one course snapshot in the archive store.
pub struct BackupController<'a> {
    conn: &'a Connection,
    course: Course,
    mode: BackupMode,
    admin: Admin,
    status: BackupStatus,
    basepath: Option<PathBuf>,
}

impl<'a> BackupController<'a> {
    pub fn new(conn: &'a Connection, admin: &Admin, course_id: i64, mode: BackupMode) -> Result<Self> {
        let course = db::get_course(conn, course_id)?.ok_or(Error::CourseNotFound(course_id))?;
        Ok(Self {
            conn,
            course,
            mode,
            admin: admin.clone(),
            status: BackupStatus::Created,
            basepath: None,
        })
    }

    pub fn status(&self) -> BackupStatus {
        self.status
    }

    pub fn course(&self) -> &Course {
        &self.course
    }

    /// Writes the snapshot into `<temp_root>/<uuid>/`.
    pub fn execute_plan(&mut self, temp_root: &Path) -> Result<&Path> {
        if self.status != BackupStatus::Created {
            return Err(Error::InvalidState {
                action: "execute backup plan",
                state: "finished".to_string(),
            });
        }

        let basepath = temp_root.join(Uuid::new_v4().simple().to_string());
        std::fs::create_dir_all(&basepath)
            .with_context(|| format!("failed to create directory {}", basepath.to_string_lossy()))?;

        let content = snapshot_course(self.conn, &self.course, self.mode, &self.admin)?;
        write_course_xml(
            &basepath,
            Some(self.course.id),
            &self.course.shortname,
            &self.course.fullname,
        )?;
        write_content(&basepath, &content)?;

        info!(
            course_id = self.course.id,
            sections = content.sections.len(),
            modules = content.module_count(),
            path = %basepath.display(),
            "backup written"
        );
        self.status = BackupStatus::Finished;
        Ok(self.basepath.insert(basepath).as_path())
    }

    pub fn basepath(&self) -> Option<&Path> {
        self.basepath.as_deref()
    }

    pub fn destroy(self) {
        debug!(course_id = self.course.id, "backup controller destroyed");
    }
}

#[derive(Debug, Clone)]
pub struct PackSummary {
    pub entry_count: usize,
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> anyhow::Result<()> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.to_string_lossy()))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for ent in entries {
        let p = ent.path();
        if p.is_dir() {
            collect_files(root, &p, out)?;
            continue;
        }
        let rel = p
            .strip_prefix(root)
            .context("entry outside of snapshot directory")?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        out.push((rel, p));
    }
    Ok(())
}

/// Zips a snapshot directory into a single archive file.
pub fn pack_archive(src_dir: &Path, out_path: &Path) -> Result<PackSummary> {
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
    }

    let mut files = Vec::new();
    collect_files(src_dir, src_dir, &mut files)?;

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, path) in &files {
        zip.start_file(name.as_str(), opts)
            .with_context(|| format!("failed to start entry {}", name))?;
        let mut src = File::open(path)
            .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
        std::io::copy(&mut src, &mut zip).with_context(|| format!("failed to write entry {}", name))?;
    }
    let mut inner = zip.finish().context("failed to finalize zip archive")?;
    inner.flush().context("failed to flush zip archive")?;

    Ok(PackSummary {
        entry_count: files.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (Connection, Admin, i64) {
        let conn = db::open_in_memory().unwrap();
        let admin_id = db::create_user(&conn, "admin", true).unwrap();
        let cat = db::create_category(&conn, "Science").unwrap();
        let course = db::create_new_course(&conn, "Physics <A>", "phys", cat).unwrap();
        let s0 = db::ensure_section(&conn, course, 0, None, "General").unwrap();
        let s1 = db::ensure_section(&conn, course, 1, Some("Motion"), "").unwrap();
        db::append_module(&conn, course, s0, "forum", "Announcements").unwrap();
        db::append_module(&conn, course, s1, "quiz", "Kinematics").unwrap();
        db::append_module(&conn, course, s1, "page", "Notes").unwrap();
        let admin = Admin {
            id: admin_id,
            username: "admin".into(),
        };
        (conn, admin, course)
    }

    #[test]
    fn backup_writes_metadata_and_content() {
        let (conn, admin, course) = seeded();
        let store = tempfile::tempdir().unwrap();

        let mut bc = BackupController::new(&conn, &admin, course, BackupMode::Import).unwrap();
        let base = bc.execute_plan(store.path()).unwrap().to_path_buf();
        assert_eq!(bc.status(), BackupStatus::Finished);
        assert!(bc.execute_plan(store.path()).is_err());
        bc.destroy();

        let xml = std::fs::read_to_string(base.join(CURRENT_METADATA_ENTRY)).unwrap();
        assert!(xml.contains("<fullname>Physics &lt;A&gt;</fullname>"));
        let content = read_content(&base).unwrap();
        assert_eq!(content.backup_mode, BackupMode::Import);
        assert_eq!(content.sections.len(), 2);
        assert_eq!(content.module_count(), 3);
        assert_eq!(content.sections[1].modules[1].name, "Notes");
    }

    #[test]
    fn unknown_course_is_a_lookup_error() {
        let (conn, admin, _) = seeded();
        let err = BackupController::new(&conn, &admin, 999, BackupMode::General)
            .err()
            .expect("lookup fails");
        assert!(matches!(err, Error::CourseNotFound(999)));
    }
}
