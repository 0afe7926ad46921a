use anyhow::Context;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admin {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Course {
    pub id: i64,
    pub category_id: i64,
    pub shortname: String,
    pub fullname: String,
    pub summary: String,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionRow {
    pub id: i64,
    pub section_num: i64,
    pub name: Option<String>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRow {
    pub id: i64,
    pub section_num: i64,
    pub modname: String,
    pub name: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseCache {
    pub course_id: i64,
    pub cache_rev: i64,
    pub modinfo: String,
    pub checksum: String,
}

/// What `delete_course_content` may leave in place besides the content itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOptions {
    pub keep_roles_and_enrolments: bool,
    pub keep_groups_and_groupings: bool,
}

impl DeleteOptions {
    /// Policy used by restore and import: purge sections and modules only.
    pub fn content_only() -> Self {
        Self {
            keep_roles_and_enrolments: true,
            keep_groups_and_groupings: true,
        }
    }
}

pub fn open_db(path: &Path) -> anyhow::Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
    }
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database {}", path.to_string_lossy()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            is_site_admin INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_categories(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            parent INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id INTEGER PRIMARY KEY,
            category_id INTEGER NOT NULL,
            shortname TEXT NOT NULL UNIQUE,
            fullname TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '',
            format TEXT NOT NULL DEFAULT 'topics',
            time_created TEXT NOT NULL,
            time_modified TEXT NOT NULL,
            FOREIGN KEY(category_id) REFERENCES course_categories(id)
        )",
        [],
    )?;
    // Databases created before course formats were tracked lack the column.
    ensure_courses_format(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_sections(
            id INTEGER PRIMARY KEY,
            course_id INTEGER NOT NULL,
            section_num INTEGER NOT NULL,
            name TEXT,
            summary TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(course_id, section_num)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_sections_course ON course_sections(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_modules(
            id INTEGER PRIMARY KEY,
            course_id INTEGER NOT NULL,
            section_id INTEGER NOT NULL,
            modname TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(section_id) REFERENCES course_sections(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_modules_course ON course_modules(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_modules_section ON course_modules(section_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrolments(
            id INTEGER PRIMARY KEY,
            course_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            role TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(user_id) REFERENCES users(id),
            UNIQUE(course_id, user_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_groups(
            id INTEGER PRIMARY KEY,
            course_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_cache(
            course_id INTEGER PRIMARY KEY,
            cache_rev INTEGER NOT NULL,
            modinfo TEXT NOT NULL,
            checksum TEXT NOT NULL,
            rebuilt_at TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;

    Ok(())
}

fn ensure_courses_format(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "courses", "format")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE courses ADD COLUMN format TEXT NOT NULL DEFAULT 'topics'",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Resolves the admin actor: the named user if it is a site admin,
/// otherwise the oldest site admin account.
pub fn get_admin(conn: &Connection, username: Option<&str>) -> anyhow::Result<Option<Admin>> {
    let row: Option<(i64, String)> = match username {
        Some(name) => conn
            .query_row(
                "SELECT id, username FROM users WHERE username = ? AND is_site_admin = 1",
                [name],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT id, username FROM users WHERE is_site_admin = 1 ORDER BY id LIMIT 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?,
    };
    Ok(row.map(|(id, username)| Admin { id, username }))
}

pub fn create_user(conn: &Connection, username: &str, is_site_admin: bool) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO users(username, is_site_admin) VALUES(?, ?)",
        (username, is_site_admin as i64),
    )
    .with_context(|| format!("failed to create user {}", username))?;
    Ok(conn.last_insert_rowid())
}

pub fn create_category(conn: &Connection, name: &str) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO course_categories(name, parent) VALUES(?, 0)",
        [name],
    )
    .with_context(|| format!("failed to create category {}", name))?;
    Ok(conn.last_insert_rowid())
}

pub fn get_category(conn: &Connection, id: i64) -> anyhow::Result<Option<Category>> {
    let row = conn
        .query_row(
            "SELECT id, name FROM course_categories WHERE id = ?",
            [id],
            |r| {
                Ok(Category {
                    id: r.get(0)?,
                    name: r.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn course_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        id: r.get(0)?,
        category_id: r.get(1)?,
        shortname: r.get(2)?,
        fullname: r.get(3)?,
        summary: r.get(4)?,
        format: r.get(5)?,
    })
}

pub fn get_course(conn: &Connection, id: i64) -> anyhow::Result<Option<Course>> {
    let row = conn
        .query_row(
            "SELECT id, category_id, shortname, fullname, summary, format
             FROM courses WHERE id = ?",
            [id],
            course_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn get_course_by_shortname(conn: &Connection, shortname: &str) -> anyhow::Result<Option<Course>> {
    let row = conn
        .query_row(
            "SELECT id, category_id, shortname, fullname, summary, format
             FROM courses WHERE shortname = ?",
            [shortname],
            course_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn shortname_exists(conn: &Connection, shortname: &str) -> anyhow::Result<bool> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM courses WHERE shortname = ?",
            [shortname],
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

/// Inserts an empty course row. Fails on a short name collision.
pub fn create_new_course(
    conn: &Connection,
    fullname: &str,
    shortname: &str,
    category_id: i64,
) -> anyhow::Result<i64> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO courses(category_id, shortname, fullname, summary, format, time_created, time_modified)
         VALUES(?, ?, ?, '', 'topics', ?, ?)",
        (category_id, shortname, fullname, &now, &now),
    )
    .with_context(|| format!("failed to create course {}", shortname))?;
    Ok(conn.last_insert_rowid())
}

pub fn update_course_settings(
    conn: &Connection,
    course_id: i64,
    summary: &str,
    format: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE courses SET summary = ?, format = ?, time_modified = ? WHERE id = ?",
        (summary, format, Utc::now().to_rfc3339(), course_id),
    )?;
    Ok(())
}

pub fn list_sections(conn: &Connection, course_id: i64) -> anyhow::Result<Vec<SectionRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, section_num, name, summary FROM course_sections
         WHERE course_id = ? ORDER BY section_num",
    )?;
    let rows = stmt
        .query_map([course_id], |r| {
            Ok(SectionRow {
                id: r.get(0)?,
                section_num: r.get(1)?,
                name: r.get(2)?,
                summary: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_modules(conn: &Connection, course_id: i64) -> anyhow::Result<Vec<ModuleRow>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, s.section_num, m.modname, m.name, m.sort_order
         FROM course_modules m
         JOIN course_sections s ON s.id = m.section_id
         WHERE m.course_id = ?
         ORDER BY s.section_num, m.sort_order",
    )?;
    let rows = stmt
        .query_map([course_id], |r| {
            Ok(ModuleRow {
                id: r.get(0)?,
                section_num: r.get(1)?,
                modname: r.get(2)?,
                name: r.get(3)?,
                sort_order: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Returns the id of the section with this number, creating it if missing.
/// An existing section keeps its name and summary.
pub fn ensure_section(
    conn: &Connection,
    course_id: i64,
    section_num: i64,
    name: Option<&str>,
    summary: &str,
) -> anyhow::Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM course_sections WHERE course_id = ? AND section_num = ?",
            (course_id, section_num),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO course_sections(course_id, section_num, name, summary) VALUES(?, ?, ?, ?)",
        (course_id, section_num, name, summary),
    )?;
    Ok(conn.last_insert_rowid())
}

/// Appends a module after the last one in its section.
pub fn append_module(
    conn: &Connection,
    course_id: i64,
    section_id: i64,
    modname: &str,
    name: &str,
) -> anyhow::Result<i64> {
    let next_order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM course_modules WHERE section_id = ?",
        [section_id],
        |r| r.get(0),
    )?;
    conn.execute(
        "INSERT INTO course_modules(course_id, section_id, modname, name, sort_order)
         VALUES(?, ?, ?, ?, ?)",
        (course_id, section_id, modname, name, next_order),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn enrol_user(conn: &Connection, course_id: i64, user_id: i64, role: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO enrolments(course_id, user_id, role) VALUES(?, ?, ?)
         ON CONFLICT(course_id, user_id) DO UPDATE SET role = excluded.role",
        (course_id, user_id, role),
    )?;
    Ok(())
}

pub fn create_group(conn: &Connection, course_id: i64, name: &str) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO course_groups(course_id, name) VALUES(?, ?)",
        (course_id, name),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn count_enrolments(conn: &Connection, course_id: i64) -> anyhow::Result<i64> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM enrolments WHERE course_id = ?",
        [course_id],
        |r| r.get(0),
    )?;
    Ok(n)
}

pub fn count_groups(conn: &Connection, course_id: i64) -> anyhow::Result<i64> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM course_groups WHERE course_id = ?",
        [course_id],
        |r| r.get(0),
    )?;
    Ok(n)
}

/// Purges course content. The course row and its cache entry stay.
pub fn delete_course_content(
    conn: &Connection,
    course_id: i64,
    options: DeleteOptions,
) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    tx.execute("DELETE FROM course_modules WHERE course_id = ?", [course_id])
        .context("failed to delete course modules")?;
    tx.execute("DELETE FROM course_sections WHERE course_id = ?", [course_id])
        .context("failed to delete course sections")?;
    if !options.keep_roles_and_enrolments {
        tx.execute("DELETE FROM enrolments WHERE course_id = ?", [course_id])
            .context("failed to delete enrolments")?;
    }
    if !options.keep_groups_and_groupings {
        tx.execute("DELETE FROM course_groups WHERE course_id = ?", [course_id])
            .context("failed to delete groups")?;
    }

    tx.commit()?;
    debug!(course_id, ?options, "course content deleted");
    Ok(())
}

/// Recomputes the cached structure summary of a course from scratch.
pub fn rebuild_course_cache(conn: &Connection, course_id: i64) -> anyhow::Result<CourseCache> {
    let sections = list_sections(conn, course_id)?;
    let modules = list_modules(conn, course_id)?;

    let modinfo = json!({
        "courseId": course_id,
        "sections": sections
            .iter()
            .map(|s| {
                let cms: Vec<serde_json::Value> = modules
                    .iter()
                    .filter(|m| m.section_num == s.section_num)
                    .map(|m| json!({ "id": m.id, "mod": m.modname, "name": m.name }))
                    .collect();
                json!({
                    "section": s.section_num,
                    "name": s.name,
                    "modules": cms,
                })
            })
            .collect::<Vec<_>>(),
    });
    let modinfo = serde_json::to_string(&modinfo).context("failed to serialize modinfo")?;
    let checksum = format!("{:x}", Sha256::digest(modinfo.as_bytes()));

    let prev_rev: Option<i64> = conn
        .query_row(
            "SELECT cache_rev FROM course_cache WHERE course_id = ?",
            [course_id],
            |r| r.get(0),
        )
        .optional()?;
    let cache_rev = prev_rev.unwrap_or(0) + 1;

    conn.execute(
        "INSERT INTO course_cache(course_id, cache_rev, modinfo, checksum, rebuilt_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(course_id) DO UPDATE SET
           cache_rev = excluded.cache_rev,
           modinfo = excluded.modinfo,
           checksum = excluded.checksum,
           rebuilt_at = excluded.rebuilt_at",
        (course_id, cache_rev, &modinfo, &checksum, Utc::now().to_rfc3339()),
    )
    .context("failed to store course cache")?;

    Ok(CourseCache {
        course_id,
        cache_rev,
        modinfo,
        checksum,
    })
}

pub fn get_course_cache(conn: &Connection, course_id: i64) -> anyhow::Result<Option<CourseCache>> {
    let row = conn
        .query_row(
            "SELECT course_id, cache_rev, modinfo, checksum FROM course_cache WHERE course_id = ?",
            [course_id],
            |r| {
                Ok(CourseCache {
                    course_id: r.get(0)?,
                    cache_rev: r.get(1)?,
                    modinfo: r.get(2)?,
                    checksum: r.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}
