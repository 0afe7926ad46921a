use super::heading;
use crate::archive::CURRENT_METADATA_ENTRY;
use crate::backup::{BackupController, BackupMode};
use crate::config::Config;
use crate::db::{self, Admin};
use crate::error::{Error, Result};
use crate::restore::{discard_workdir, run_restore, RestoreController, RestoreSummary};
use crate::target::MergeMode;
use rusqlite::Connection;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportRequest {
    pub from_course: i64,
    pub to_course: i64,
    pub mode: MergeMode,
}

#[derive(Debug, Clone)]
pub struct ImportOutcome {
    /// Snapshot directory name inside the archive store.
    pub backup_dir: String,
    pub summary: RestoreSummary,
}

/// Copies the content of one course into another via a transient snapshot.
pub fn run(conn: &Connection, config: &Config, admin: &Admin, req: &ImportRequest) -> Result<ImportOutcome> {
    let source = db::get_course(conn, req.from_course)?.ok_or(Error::CourseNotFound(req.from_course))?;
    let destination =
        db::get_course(conn, req.to_course)?.ok_or(Error::CourseNotFound(req.to_course))?;

    heading(&format!(
        "Importing {} into {}. Mode: {}",
        source.shortname, destination.shortname, req.mode
    ));

    println!("Performing backup...");
    let mut bc = BackupController::new(conn, admin, source.id, BackupMode::Import)?;
    let basepath = bc.execute_plan(&config.backup_temp_dir)?.to_path_buf();
    bc.destroy();
    let backup_dir = basepath
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    println!("Importing from backup...");
    let workdir = config.backup_temp_dir.join(&backup_dir);
    if !workdir.join(CURRENT_METADATA_ENTRY).is_file() {
        if config.cleanup_temp {
            discard_workdir(&workdir);
        }
        return Err(Error::BackupNotFound(workdir));
    }

    let rc = RestoreController::new(
        conn,
        &workdir,
        destination.id,
        BackupMode::Import,
        admin,
        req.mode.into(),
    );
    let summary = run_restore(conn, rc, config)?;
    info!(
        from = source.id,
        to = destination.id,
        modules = summary.plan.modules_restored,
        "import finished"
    );
    println!("Finished import.");

    Ok(ImportOutcome { backup_dir, summary })
}
