use crate::backup::{pack_archive, BackupController, BackupMode};
use crate::config::Config;
use crate::db::Admin;
use crate::error::Result;
use chrono::Local;
use rusqlite::Connection;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRequest {
    pub course_id: i64,
    pub destination: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub archive: PathBuf,
    pub entry_count: usize,
}

fn default_archive_name(shortname: &str) -> String {
    let safe: String = shortname
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("backup-{}-{}.mbz", safe, Local::now().format("%Y%m%d-%H%M"))
}

/// Writes a course snapshot and packs it into a single archive file.
pub fn run(conn: &Connection, config: &Config, admin: &Admin, req: &BackupRequest) -> Result<BackupOutcome> {
    let mut bc = BackupController::new(conn, admin, req.course_id, BackupMode::General)?;
    let shortname = bc.course().shortname.clone();
    println!("Performing backup of {}...", shortname);

    let basepath = bc.execute_plan(&config.backup_temp_dir)?.to_path_buf();
    bc.destroy();

    let archive = req
        .destination
        .clone()
        .unwrap_or_else(|| PathBuf::from(default_archive_name(&shortname)));
    let packed = pack_archive(&basepath, &archive)?;

    if config.cleanup_temp {
        std::fs::remove_dir_all(&basepath)?;
        debug!(path = %basepath.display(), "snapshot directory removed");
    }
    info!(archive = %archive.display(), entries = packed.entry_count, "backup archive written");
    println!("Backup written to {}", archive.display());

    Ok(BackupOutcome {
        archive,
        entry_count: packed.entry_count,
    })
}
