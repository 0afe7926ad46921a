use crate::error::{Error, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::Path;
use tracing::debug;

/// Minimal element tree; attributes are not needed by any backup document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    fn new(name: &[u8]) -> Self {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            ..Self::default()
        }
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.trim())
    }

    /// Looks up an absolute path such as `/course/fullname`, first match per step.
    pub fn select(&self, path: &str) -> Option<&XmlElement> {
        let mut steps = path.trim_start_matches('/').split('/');
        if steps.next()? != self.name {
            return None;
        }
        let mut node = self;
        for step in steps {
            node = node.child(step)?;
        }
        Some(node)
    }
}

pub fn parse_xml(xml: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event().map_err(|e| Error::Metadata(e.to_string()))? {
            Event::Start(e) => stack.push(XmlElement::new(e.name().as_ref())),
            Event::Empty(e) => {
                let el = XmlElement::new(e.name().as_ref());
                match stack.last_mut() {
                    Some(parent) => parent.children.push(el),
                    None => root = root.or(Some(el)),
                }
            }
            Event::End(_) => {
                let Some(el) = stack.pop() else {
                    return Err(Error::Metadata("unbalanced closing tag".to_string()));
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(el),
                    None => root = root.or(Some(el)),
                }
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    let text = t.unescape().map_err(|e| Error::Metadata(e.to_string()))?;
                    top.text.push_str(&text);
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(Error::Metadata(format!(
            "unclosed element <{}>",
            stack.last().map(|e| e.name.as_str()).unwrap_or("")
        )));
    }
    root.ok_or_else(|| Error::Metadata("document has no root element".to_string()))
}

/// Layouts a course metadata document may follow, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSchema {
    Current,
    Legacy,
}

impl MetadataSchema {
    pub const ALL: [MetadataSchema; 2] = [MetadataSchema::Current, MetadataSchema::Legacy];

    pub fn fullname_path(self) -> &'static str {
        match self {
            MetadataSchema::Current => "/course/fullname",
            MetadataSchema::Legacy => "/MOODLE_BACKUP/COURSE/HEADER/FULLNAME",
        }
    }

    pub fn shortname_path(self) -> &'static str {
        match self {
            MetadataSchema::Current => "/course/shortname",
            MetadataSchema::Legacy => "/MOODLE_BACKUP/COURSE/HEADER/SHORTNAME",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseMetadata {
    pub fullname: String,
    pub shortname: String,
}

fn first_match(doc: &XmlElement, path_of: impl Fn(MetadataSchema) -> &'static str) -> Option<String> {
    MetadataSchema::ALL.iter().find_map(|schema| {
        let text = doc.select(path_of(*schema))?.text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    })
}

pub fn parse_course_metadata_str(xml: &str) -> Result<CourseMetadata> {
    let doc = parse_xml(xml)?;
    let shortname = first_match(&doc, MetadataSchema::shortname_path).ok_or(Error::MissingShortName)?;
    let fullname = first_match(&doc, MetadataSchema::fullname_path).unwrap_or_default();
    Ok(CourseMetadata { fullname, shortname })
}

pub fn parse_course_metadata(path: &Path) -> Result<CourseMetadata> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let meta = parse_course_metadata_str(&text)?;
    debug!(path = %path.display(), shortname = %meta.shortname, "parsed course metadata");
    Ok(meta)
}
