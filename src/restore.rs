use crate::archive::CURRENT_METADATA_ENTRY;
use crate::backup::{self, BackupMode, CourseContent, CONTENT_ENTRY, CONTENT_FORMAT_VERSION};
use crate::config::Config;
use crate::convert::{self, ConversionSummary};
use crate::db::{self, Admin, DeleteOptions};
use crate::error::{Error, Result};
use crate::target::TargetKind;
use anyhow::Context;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStatus {
    Initialized,
    RequiresConversion,
    PrecheckPassed,
    PrecheckFailed,
    PlanExecuted,
}

impl RestoreStatus {
    fn label(self) -> &'static str {
        match self {
            RestoreStatus::Initialized => "initialized",
            RestoreStatus::RequiresConversion => "awaiting conversion",
            RestoreStatus::PrecheckPassed => "prechecked",
            RestoreStatus::PrecheckFailed => "failed precheck",
            RestoreStatus::PlanExecuted => "finished",
        }
    }
}

/// Steps `run_restore` performed, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStep {
    Convert,
    Precheck,
    DeleteContent,
    ExecutePlan,
    RebuildCache,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrecheckResults {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSummary {
    pub sections_created: usize,
    pub modules_restored: usize,
}

pub struct RestoreController<'a> {
    conn: &'a Connection,
    workdir: PathBuf,
    course_id: i64,
    mode: BackupMode,
    admin: Admin,
    target: TargetKind,
    status: RestoreStatus,
    precheck: Option<PrecheckResults>,
    content: Option<CourseContent>,
}

impl<'a> RestoreController<'a> {
    pub fn new(
        conn: &'a Connection,
        workdir: impl Into<PathBuf>,
        course_id: i64,
        mode: BackupMode,
        admin: &Admin,
        target: TargetKind,
    ) -> Self {
        let workdir = workdir.into();
        let status = if convert::is_legacy_layout(&workdir) {
            RestoreStatus::RequiresConversion
        } else {
            RestoreStatus::Initialized
        };
        debug!(path = %workdir.display(), course_id, ?target, ?status, "restore controller created");
        Self {
            conn,
            workdir,
            course_id,
            mode,
            admin: admin.clone(),
            target,
            status,
            precheck: None,
            content: None,
        }
    }

    pub fn status(&self) -> RestoreStatus {
        self.status
    }

    pub fn target(&self) -> TargetKind {
        self.target
    }

    pub fn course_id(&self) -> i64 {
        self.course_id
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn precheck_results(&self) -> Option<&PrecheckResults> {
        self.precheck.as_ref()
    }

    fn invalid_state(&self, action: &'static str) -> Error {
        Error::InvalidState {
            action,
            state: self.status.label().to_string(),
        }
    }

    pub fn convert(&mut self) -> Result<ConversionSummary> {
        if self.status != RestoreStatus::RequiresConversion {
            return Err(self.invalid_state("convert"));
        }
        let summary = convert::convert_legacy(&self.workdir)?;
        self.status = RestoreStatus::Initialized;
        Ok(summary)
    }

    /// Dry run over the archive and destination. `Ok(false)` means the
    /// restore must not go ahead; see `precheck_results`.
    pub fn execute_precheck(&mut self) -> Result<bool> {
        match self.status {
            RestoreStatus::Initialized | RestoreStatus::PrecheckFailed => {}
            _ => return Err(self.invalid_state("run precheck")),
        }

        let mut results = PrecheckResults::default();
        let content = self.check_archive(&mut results);
        if db::get_course(self.conn, self.course_id)?.is_none() {
            results
                .errors
                .push(format!("destination course {} does not exist", self.course_id));
        }

        let passed = results.errors.is_empty();
        if passed {
            self.status = RestoreStatus::PrecheckPassed;
            self.content = content;
        } else {
            self.status = RestoreStatus::PrecheckFailed;
        }
        for w in &results.warnings {
            warn!(course_id = self.course_id, "precheck: {}", w);
        }
        self.precheck = Some(results);
        Ok(passed)
    }

    fn check_archive(&self, results: &mut PrecheckResults) -> Option<CourseContent> {
        if !self.workdir.join(CURRENT_METADATA_ENTRY).is_file() {
            results
                .errors
                .push(format!("missing {} in backup", CURRENT_METADATA_ENTRY));
            return None;
        }
        if !self.workdir.join(CONTENT_ENTRY).is_file() {
            results
                .errors
                .push(format!("missing {} in backup", CONTENT_ENTRY));
            return None;
        }
        let content = match backup::read_content(&self.workdir) {
            Ok(c) => c,
            Err(Error::Internal(e)) => {
                results.errors.push(format!("{:#}", e));
                return None;
            }
            Err(e) => {
                results.errors.push(e.to_string());
                return None;
            }
        };

        if content.format_version > CONTENT_FORMAT_VERSION {
            results.errors.push(format!(
                "backup format version {} is newer than supported version {}",
                content.format_version, CONTENT_FORMAT_VERSION
            ));
        }
        let mut seen = HashSet::new();
        for s in &content.sections {
            if s.number < 0 {
                results
                    .errors
                    .push(format!("section number {} is negative", s.number));
            } else if !seen.insert(s.number) {
                results
                    .errors
                    .push(format!("section number {} appears more than once", s.number));
            }
            if let Some(m) = s.modules.iter().find(|m| m.modname.trim().is_empty()) {
                results.errors.push(format!(
                    "module \"{}\" in section {} has no module type",
                    m.name, s.number
                ));
            }
        }

        if content.module_count() == 0 {
            results
                .warnings
                .push("backup contains no activities".to_string());
        }
        if content.backup_mode != self.mode {
            results.warnings.push(format!(
                "backup was taken in {:?} mode, restoring in {:?} mode",
                content.backup_mode, self.mode
            ));
        }
        Some(content)
    }

    /// Applies the archived sections and modules to the destination course.
    pub fn execute_plan(&mut self) -> Result<PlanSummary> {
        if self.status != RestoreStatus::PrecheckPassed {
            return Err(self.invalid_state("execute plan"));
        }
        let Some(content) = self.content.take() else {
            return Err(self.invalid_state("execute plan"));
        };

        let tx = self.conn.unchecked_transaction()?;
        if self.target == TargetKind::NewCourse {
            db::update_course_settings(&tx, self.course_id, &content.summary, &content.format)?;
        }

        let existing: HashSet<i64> = db::list_sections(&tx, self.course_id)?
            .into_iter()
            .map(|s| s.section_num)
            .collect();
        let mut summary = PlanSummary {
            sections_created: 0,
            modules_restored: 0,
        };
        for s in &content.sections {
            if !existing.contains(&s.number) {
                summary.sections_created += 1;
            }
            let section_id =
                db::ensure_section(&tx, self.course_id, s.number, s.name.as_deref(), &s.summary)?;
            for m in &s.modules {
                db::append_module(&tx, self.course_id, section_id, &m.modname, &m.name)
                    .with_context(|| format!("failed to restore module {}", m.name))?;
                summary.modules_restored += 1;
            }
        }
        tx.commit()?;

        info!(
            course_id = self.course_id,
            admin = %self.admin.username,
            sections_created = summary.sections_created,
            modules = summary.modules_restored,
            "restore plan executed"
        );
        self.status = RestoreStatus::PlanExecuted;
        Ok(summary)
    }

    /// Releases the controller; removes the working directory when asked to.
    pub fn destroy(self, cleanup: bool) -> Result<()> {
        if cleanup && self.workdir.exists() {
            std::fs::remove_dir_all(&self.workdir).with_context(|| {
                format!("failed to remove {}", self.workdir.to_string_lossy())
            })?;
            debug!(path = %self.workdir.display(), "restore working directory removed");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    pub course_id: i64,
    pub steps: Vec<RestoreStep>,
    pub plan: PlanSummary,
    pub cache_rev: i64,
    pub warnings: Vec<String>,
}

/// Removes a working directory left by a failed run. Failures are logged,
/// never returned, so the original error reaches the caller.
pub fn discard_workdir(path: &Path) {
    if !path.exists() {
        return;
    }
    match std::fs::remove_dir_all(path) {
        Ok(()) => debug!(path = %path.display(), "working directory discarded"),
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove working directory"),
    }
}

/// Drives a controller through conversion, precheck, optional content
/// deletion, plan execution and the cache rebuild, then destroys it.
/// With `cleanup_temp` set the working directory goes on every path,
/// including failures.
pub fn run_restore(
    conn: &Connection,
    mut rc: RestoreController<'_>,
    config: &Config,
) -> Result<RestoreSummary> {
    match drive(conn, &mut rc) {
        Ok(summary) => {
            rc.destroy(config.cleanup_temp)?;
            Ok(summary)
        }
        Err(e) => {
            if config.cleanup_temp {
                discard_workdir(rc.workdir());
            }
            Err(e)
        }
    }
}

fn drive(conn: &Connection, rc: &mut RestoreController<'_>) -> Result<RestoreSummary> {
    let mut steps = Vec::new();

    if rc.status() == RestoreStatus::RequiresConversion {
        rc.convert()?;
        steps.push(RestoreStep::Convert);
    }

    let passed = rc.execute_precheck()?;
    steps.push(RestoreStep::Precheck);
    let results = rc.precheck_results().cloned().unwrap_or_default();
    if !passed {
        return Err(Error::PrecheckFailed(results));
    }

    let course_id = rc.course_id();
    if rc.target() == TargetKind::ExistingDeleting {
        let course = db::get_course(conn, course_id)?.ok_or(Error::CourseNotFound(course_id))?;
        println!("Deleting contents of {}", course.shortname);
        info!(course_id, "deleting existing course content");
        db::delete_course_content(conn, course_id, DeleteOptions::content_only())?;
        steps.push(RestoreStep::DeleteContent);
    }

    let plan = rc.execute_plan()?;
    steps.push(RestoreStep::ExecutePlan);

    let cache = db::rebuild_course_cache(conn, course_id)?;
    steps.push(RestoreStep::RebuildCache);

    Ok(RestoreSummary {
        course_id,
        steps,
        plan,
        cache_rev: cache.cache_rev,
        warnings: results.warnings,
    })
}
