use crate::commands::backup::BackupRequest;
use crate::commands::import::ImportRequest;
use crate::commands::restore::RestoreRequest;
use crate::error::{Error, Result};
use crate::target::{MergeMode, RestoreTarget};
use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Course backup, restore and import.
#[derive(Debug, Parser)]
#[command(name = "coursectl", version, about)]
pub struct Cli {
    /// TOML configuration file (defaults to ./coursectl.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Perform import of one course into another
    Import(ImportArgs),
    /// Perform restore of the given backup into a new or existing course
    Restore(RestoreArgs),
    /// Write a course backup archive
    Backup(BackupArgs),
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Course ID for import source
    #[arg(long)]
    pub from: i64,
    /// Course ID for target
    #[arg(long)]
    pub to: i64,
    /// Delete existing course content or add: add|delete
    #[arg(long = "type", value_name = "add|delete")]
    pub merge_type: String,
}

#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("destination")
        .required(true)
        .args(["category_id", "course_id"])
))]
pub struct RestoreArgs {
    /// Path to backup file
    #[arg(long)]
    pub from: PathBuf,
    /// Category ID to restore as new course into
    #[arg(long = "categoryid")]
    pub category_id: Option<i64>,
    /// Course ID for restore as existing course. Must define type
    #[arg(long = "courseid", requires = "merge_type")]
    pub course_id: Option<i64>,
    /// Delete existing course content or add: add|delete
    #[arg(long = "type", value_name = "add|delete")]
    pub merge_type: Option<String>,
}

#[derive(Debug, Args)]
pub struct BackupArgs {
    /// Course ID to back up
    #[arg(long = "courseid")]
    pub course_id: i64,
    /// Archive file to write (defaults to backup-<shortname>-<time>.mbz)
    #[arg(long)]
    pub destination: Option<PathBuf>,
}

impl ImportArgs {
    pub fn into_request(self) -> Result<ImportRequest> {
        Ok(ImportRequest {
            from_course: self.from,
            to_course: self.to,
            mode: self.merge_type.parse::<MergeMode>()?,
        })
    }
}

impl RestoreArgs {
    /// The merge type only matters for existing-course restores.
    pub fn into_request(self) -> Result<RestoreRequest> {
        let target = match (self.category_id, self.course_id) {
            (Some(category_id), _) => RestoreTarget::NewCourse { category_id },
            (None, Some(course_id)) => RestoreTarget::ExistingCourse {
                course_id,
                mode: self.merge_type.as_deref().unwrap_or("").parse::<MergeMode>()?,
            },
            (None, None) => {
                return Err(Error::Usage(
                    "one of --categoryid or --courseid is required".to_string(),
                ))
            }
        };
        Ok(RestoreRequest {
            archive: self.from,
            target,
        })
    }
}

impl BackupArgs {
    pub fn into_request(self) -> BackupRequest {
        BackupRequest {
            course_id: self.course_id,
            destination: self.destination,
        }
    }
}
