use crate::db;
use crate::error::{Error, Result};
use crate::metadata::CourseMetadata;
use rusqlite::Connection;
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// How restored content combines with what the destination already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    Add,
    Delete,
}

impl MergeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            MergeMode::Add => "add",
            MergeMode::Delete => "delete",
        }
    }
}

impl FromStr for MergeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(MergeMode::Add),
            "delete" => Ok(MergeMode::Delete),
            other => Err(Error::InvalidMergeMode(other.to_string())),
        }
    }
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreTarget {
    NewCourse { category_id: i64 },
    ExistingCourse { course_id: i64, mode: MergeMode },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    NewCourse,
    ExistingAdding,
    ExistingDeleting,
}

impl From<MergeMode> for TargetKind {
    fn from(mode: MergeMode) -> Self {
        match mode {
            MergeMode::Add => TargetKind::ExistingAdding,
            MergeMode::Delete => TargetKind::ExistingDeleting,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub course_id: i64,
    pub shortname: String,
    pub kind: TargetKind,
    /// Set for new courses only.
    pub category_name: Option<String>,
}

/// Splits a trailing `_<digits>` suffix: `algebra_3` -> (`algebra`, Some("3")).
/// The digits are returned as written, leading zeros included.
pub fn split_numeric_suffix(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('_') {
        Some((base, digits)) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            (base, Some(digits))
        }
        _ => (name, None),
    }
}

/// Adds one to a decimal digit string of any length: `07` -> `8`, `99` -> `100`.
fn increment_digits(digits: &str) -> String {
    let mut out: Vec<u8> = digits.trim_start_matches('0').bytes().collect();
    let mut i = out.len();
    loop {
        if i == 0 {
            out.insert(0, b'1');
            break;
        }
        i -= 1;
        if out[i] == b'9' {
            out[i] = b'0';
        } else {
            out[i] += 1;
            break;
        }
    }
    out.into_iter().map(char::from).collect()
}

/// Returns `shortname` if free, otherwise the first free `base_N`. The first
/// candidate reuses the existing suffix text (or `1`); each retry increments it.
pub fn next_free_short_name<F>(shortname: &str, mut exists: F) -> Result<String>
where
    F: FnMut(&str) -> Result<bool>,
{
    if !exists(shortname)? {
        return Ok(shortname.to_string());
    }
    let (base, suffix) = split_numeric_suffix(shortname);
    let mut number = suffix.unwrap_or("1").to_string();
    loop {
        let candidate = format!("{}_{}", base, number);
        if !exists(&candidate)? {
            return Ok(candidate);
        }
        number = increment_digits(&number);
    }
}

/// Looks up (and for new courses, creates) the destination course row.
pub fn resolve_target(
    conn: &Connection,
    target: &RestoreTarget,
    meta: &CourseMetadata,
) -> Result<ResolvedTarget> {
    match target {
        RestoreTarget::NewCourse { category_id } => {
            let category =
                db::get_category(conn, *category_id)?.ok_or(Error::CategoryNotFound(*category_id))?;
            let shortname = next_free_short_name(&meta.shortname, |candidate| {
                Ok(db::shortname_exists(conn, candidate)?)
            })?;
            let course_id = db::create_new_course(conn, &meta.fullname, &shortname, category.id)?;
            info!(course_id, %shortname, category_id = category.id, "created destination course");
            Ok(ResolvedTarget {
                course_id,
                shortname,
                kind: TargetKind::NewCourse,
                category_name: Some(category.name),
            })
        }
        RestoreTarget::ExistingCourse { course_id, mode } => {
            let course = db::get_course(conn, *course_id)?.ok_or(Error::CourseNotFound(*course_id))?;
            Ok(ResolvedTarget {
                course_id: course.id,
                shortname: course.shortname,
                kind: (*mode).into(),
                category_name: None,
            })
        }
    }
}
