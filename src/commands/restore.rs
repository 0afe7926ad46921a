use super::heading;
use crate::archive::{self, ExtractedArchive};
use crate::backup::BackupMode;
use crate::config::Config;
use crate::db::Admin;
use crate::error::Result;
use crate::metadata::{self, CourseMetadata};
use crate::restore::{discard_workdir, run_restore, RestoreController, RestoreSummary};
use crate::target::{self, ResolvedTarget, RestoreTarget};
use rusqlite::Connection;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    pub archive: PathBuf,
    pub target: RestoreTarget,
}

#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub source: CourseMetadata,
    pub extracted: ExtractedArchive,
    pub destination: ResolvedTarget,
    pub summary: RestoreSummary,
}

/// Restores a course archive file into a new or an existing course.
pub fn run(conn: &Connection, config: &Config, admin: &Admin, req: &RestoreRequest) -> Result<RestoreOutcome> {
    archive::validate_archive_path(&req.archive)?;

    let extracted = archive::extract_archive(&req.archive, &config.backup_temp_dir)?;
    println!("Extracted course backup file to: '{}'", extracted.path.display());

    match restore_extracted(conn, config, admin, req, &extracted) {
        Ok((source, destination, summary)) => Ok(RestoreOutcome {
            source,
            extracted,
            destination,
            summary,
        }),
        Err(e) => {
            if config.cleanup_temp {
                discard_workdir(&extracted.path);
            }
            Err(e)
        }
    }
}

fn restore_extracted(
    conn: &Connection,
    config: &Config,
    admin: &Admin,
    req: &RestoreRequest,
    extracted: &ExtractedArchive,
) -> Result<(CourseMetadata, ResolvedTarget, RestoreSummary)> {
    let location = archive::locate_metadata(&extracted.path)?;
    let source = metadata::parse_course_metadata(&location.path)?;
    println!("Backup contained course {}: {}", source.shortname, source.fullname);

    let destination = target::resolve_target(conn, &req.target, &source)?;
    match &req.target {
        RestoreTarget::NewCourse { .. } => heading(&format!(
            "Restoring as new course {} in category {}",
            destination.shortname,
            destination.category_name.as_deref().unwrap_or("")
        )),
        RestoreTarget::ExistingCourse { mode, .. } => heading(&format!(
            "Restoring {} into {}. Mode: {}",
            source.shortname, destination.shortname, mode
        )),
    }

    println!("Performing restore...");
    let rc = RestoreController::new(
        conn,
        &extracted.path,
        destination.course_id,
        BackupMode::General,
        admin,
        destination.kind,
    );
    let summary = run_restore(conn, rc, config)?;
    info!(
        course_id = destination.course_id,
        modules = summary.plan.modules_restored,
        cache_rev = summary.cache_rev,
        "restore finished"
    );
    println!("Finished restore.");

    Ok((source, destination, summary))
}
