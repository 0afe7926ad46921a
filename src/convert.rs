//! Conversion of single-document legacy backups into the current layout.
//!
//! A legacy `moodle.xml` keeps the course header, the section list and the
//! module instances in one file:
//!
//! ```text
//! MOODLE_BACKUP/COURSE/HEADER/{FULLNAME,SHORTNAME,SUMMARY,FORMAT}
//! MOODLE_BACKUP/COURSE/SECTIONS/SECTION/{NUMBER,SUMMARY,MODS/MOD/{TYPE,INSTANCE}}
//! MOODLE_BACKUP/COURSE/MODULES/MOD/{ID,MODTYPE,NAME}
//! ```
//!
//! Section entries only reference instances; names come from `MODULES`.

use crate::archive::LEGACY_METADATA_ENTRY;
use crate::backup::{
    self, BackupMode, CourseContent, ModuleSnapshot, SectionSnapshot, CONTENT_FORMAT_VERSION,
};
use crate::error::{Error, Result};
use crate::metadata::{self, XmlElement};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionSummary {
    pub shortname: String,
    pub sections: usize,
    pub modules: usize,
}

pub fn is_legacy_layout(dir: &Path) -> bool {
    !dir.join(crate::archive::CURRENT_METADATA_ENTRY).is_file()
        && dir.join(LEGACY_METADATA_ENTRY).is_file()
}

/// Builds the current-format content from a parsed legacy document.
pub fn legacy_to_content(doc: &XmlElement) -> Result<(String, String, CourseContent)> {
    if doc.name != "MOODLE_BACKUP" {
        return Err(Error::Metadata(format!(
            "expected MOODLE_BACKUP root, found <{}>",
            doc.name
        )));
    }
    let course = doc
        .child("COURSE")
        .ok_or_else(|| Error::Metadata("legacy backup has no COURSE element".to_string()))?;
    let header = course.child("HEADER");
    let header_text = |name: &str| {
        header
            .and_then(|h| h.child_text(name))
            .unwrap_or("")
            .to_string()
    };

    let shortname = header_text("SHORTNAME");
    if shortname.is_empty() {
        return Err(Error::MissingShortName);
    }
    let fullname = header_text("FULLNAME");
    let format = match header_text("FORMAT") {
        f if f.is_empty() => "topics".to_string(),
        f => f,
    };

    // (modtype, instance id) -> name
    let mut names: HashMap<(String, String), String> = HashMap::new();
    if let Some(modules) = course.child("MODULES") {
        for m in modules.children_named("MOD") {
            let (Some(id), Some(modtype)) = (m.child_text("ID"), m.child_text("MODTYPE")) else {
                continue;
            };
            let name = m.child_text("NAME").unwrap_or("").to_string();
            names.insert((modtype.to_string(), id.to_string()), name);
        }
    }

    let mut sections = Vec::new();
    if let Some(list) = course.child("SECTIONS") {
        for (pos, s) in list.children_named("SECTION").enumerate() {
            let number = match s.child_text("NUMBER").map(|n| n.parse::<i64>()) {
                Some(Ok(n)) => n,
                Some(Err(_)) | None => {
                    warn!(position = pos, "legacy section without a usable NUMBER, using position");
                    pos as i64
                }
            };
            let mut modules = Vec::new();
            if let Some(mods) = s.child("MODS") {
                for m in mods.children_named("MOD") {
                    let Some(modtype) = m.child_text("TYPE").filter(|t| !t.is_empty()) else {
                        continue;
                    };
                    let instance = m.child_text("INSTANCE").unwrap_or("");
                    let name = names
                        .get(&(modtype.to_string(), instance.to_string()))
                        .filter(|n| !n.is_empty())
                        .cloned()
                        .unwrap_or_else(|| modtype.to_string());
                    modules.push(ModuleSnapshot {
                        modname: modtype.to_string(),
                        name,
                    });
                }
            }
            sections.push(SectionSnapshot {
                number,
                name: None,
                summary: s.child_text("SUMMARY").unwrap_or("").to_string(),
                modules,
            });
        }
    }

    let content = CourseContent {
        format_version: CONTENT_FORMAT_VERSION,
        backup_mode: BackupMode::General,
        source_course_id: None,
        created_by: None,
        summary: header_text("SUMMARY"),
        format,
        sections,
    };
    Ok((shortname, fullname, content))
}

/// Rewrites `moodle.xml` in `dir` as `course/course.xml` plus `course/content.json`.
/// The legacy document is left in place.
pub fn convert_legacy(dir: &Path) -> Result<ConversionSummary> {
    let path = dir.join(LEGACY_METADATA_ENTRY);
    if !path.is_file() {
        return Err(Error::MetadataNotFound(dir.to_path_buf()));
    }
    let bytes = std::fs::read(&path)?;
    let doc = metadata::parse_xml(&String::from_utf8_lossy(&bytes))?;
    let (shortname, fullname, content) = legacy_to_content(&doc)?;

    backup::write_course_xml(dir, None, &shortname, &fullname)?;
    backup::write_content(dir, &content)?;

    let summary = ConversionSummary {
        shortname,
        sections: content.sections.len(),
        modules: content.module_count(),
    };
    info!(
        shortname = %summary.shortname,
        sections = summary.sections,
        modules = summary.modules,
        "legacy backup converted"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MOODLE_BACKUP>
  <INFO><NAME>backup-hist19.zip</NAME></INFO>
  <COURSE>
    <HEADER>
      <FULLNAME>History 1900-1950</FULLNAME>
      <SHORTNAME>hist19</SHORTNAME>
      <FORMAT>weeks</FORMAT>
      <SUMMARY>Modern history</SUMMARY>
    </HEADER>
    <SECTIONS>
      <SECTION>
        <NUMBER>0</NUMBER>
        <SUMMARY></SUMMARY>
        <MODS>
          <MOD><TYPE>forum</TYPE><INSTANCE>7</INSTANCE></MOD>
        </MODS>
      </SECTION>
      <SECTION>
        <NUMBER>1</NUMBER>
        <SUMMARY>The Great War</SUMMARY>
        <MODS>
          <MOD><TYPE>resource</TYPE><INSTANCE>3</INSTANCE></MOD>
          <MOD><TYPE>quiz</TYPE><INSTANCE>99</INSTANCE></MOD>
        </MODS>
      </SECTION>
    </SECTIONS>
    <MODULES>
      <MOD><ID>7</ID><MODTYPE>forum</MODTYPE><NAME>News forum</NAME></MOD>
      <MOD><ID>3</ID><MODTYPE>resource</MODTYPE><NAME>Reading list</NAME></MOD>
    </MODULES>
  </COURSE>
</MOODLE_BACKUP>"#;

    #[test]
    fn legacy_document_maps_to_sections_and_modules() {
        let doc = metadata::parse_xml(LEGACY).unwrap();
        let (shortname, fullname, content) = legacy_to_content(&doc).unwrap();
        assert_eq!(shortname, "hist19");
        assert_eq!(fullname, "History 1900-1950");
        assert_eq!(content.format, "weeks");
        assert_eq!(content.summary, "Modern history");
        assert_eq!(content.sections.len(), 2);
        assert_eq!(content.sections[0].modules[0].name, "News forum");
        assert_eq!(content.sections[1].summary, "The Great War");
        // Instance 99 has no MODULES entry, so the type stands in for the name.
        assert_eq!(content.sections[1].modules[1].name, "quiz");
    }

    #[test]
    fn convert_writes_current_layout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LEGACY_METADATA_ENTRY), LEGACY).unwrap();
        assert!(is_legacy_layout(dir.path()));

        let summary = convert_legacy(dir.path()).unwrap();
        assert_eq!(summary.modules, 3);
        assert!(!is_legacy_layout(dir.path()));

        let meta = metadata::parse_course_metadata(
            &dir.path().join(crate::archive::CURRENT_METADATA_ENTRY),
        )
        .unwrap();
        assert_eq!(meta.shortname, "hist19");
        assert_eq!(backup::read_content(dir.path()).unwrap().sections.len(), 2);
    }

    #[test]
    fn wrong_root_is_rejected() {
        let doc = metadata::parse_xml("<course><shortname>x</shortname></course>").unwrap();
        assert!(matches!(legacy_to_content(&doc), Err(Error::Metadata(_))));
    }
}
