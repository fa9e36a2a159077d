//! Shared helpers for the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use vers_xml::{Attributes, CaptureDirective, ElementConsumer};

/// One consumer callback, in the order it was received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Start(String),
    End {
        path: String,
        value: Option<String>,
        markup: Option<String>,
    },
}

/// Consumer answering from a path -> directive table and recording every call
#[derive(Debug, Default)]
pub struct RecordingConsumer {
    directives: HashMap<String, CaptureDirective>,
    pub callbacks: Vec<Callback>,
    pub attributes: Vec<(String, Vec<(String, String)>)>,
    /// Content of file captures, read back inside `end_element`
    pub file_contents: HashMap<String, Vec<u8>>,
}

impl RecordingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture(mut self, path: &str, directive: CaptureDirective) -> Self {
        self.directives.insert(path.to_string(), directive);
        self
    }

    pub fn starts(&self) -> Vec<&str> {
        self.callbacks
            .iter()
            .filter_map(|callback| match callback {
                Callback::Start(path) => Some(path.as_str()),
                Callback::End { .. } => None,
            })
            .collect()
    }

    pub fn ends(&self) -> Vec<&str> {
        self.callbacks
            .iter()
            .filter_map(|callback| match callback {
                Callback::End { path, .. } => Some(path.as_str()),
                Callback::Start(_) => None,
            })
            .collect()
    }

    /// Value delivered at the end of `path`
    pub fn value(&self, path: &str) -> Option<&str> {
        self.end(path).and_then(|(value, _)| value)
    }

    /// Markup delivered at the end of `path`
    pub fn markup(&self, path: &str) -> Option<&str> {
        self.end(path).and_then(|(_, markup)| markup)
    }

    fn end(&self, wanted: &str) -> Option<(Option<&str>, Option<&str>)> {
        self.callbacks.iter().find_map(|callback| match callback {
            Callback::End {
                path,
                value,
                markup,
            } if path == wanted => Some((value.as_deref(), markup.as_deref())),
            _ => None,
        })
    }
}

impl ElementConsumer for RecordingConsumer {
    fn start_element(&mut self, path: &str, attributes: &Attributes) -> Option<CaptureDirective> {
        self.callbacks.push(Callback::Start(path.to_string()));
        self.attributes.push((
            path.to_string(),
            attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));
        self.directives.get(path).cloned()
    }

    fn end_element(&mut self, path: &str, value: Option<String>, markup: Option<String>) {
        if let Some(destination) = self.directives.get(path).and_then(|d| d.destination())
            && let Ok(bytes) = std::fs::read(destination)
        {
            self.file_contents.insert(path.to_string(), bytes);
        }
        self.callbacks.push(Callback::End {
            path: path.to_string(),
            value,
            markup,
        });
    }
}

/// Scratch directory holding XML documents
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Write `content` to `relative`, creating parent directories
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(&path, content).expect("write fixture");
        path
    }

    /// Files left in `relative`, sorted by name
    pub fn list(&self, relative: &str) -> Vec<String> {
        let mut names: Vec<String> = match std::fs::read_dir(self.join(relative)) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().to_string())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}

/// A small VERS Encapsulated Object with one Base64 encoded document
pub fn sample_veo(title: &str, content: &[u8]) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE vers:VERSEncapsulatedObject SYSTEM "http://example.invalid/vers.dtd">
<vers:VERSEncapsulatedObject xmlns:vers="http://www.prov.vic.gov.au/gservice/standard/pros99007.htm">
  <vers:SignedObject vers:VEOVersion="2.0">
    <vers:ObjectMetadata>
      <vers:ObjectType>Record</vers:ObjectType>
      <vers:ObjectTypeVersion>2.0</vers:ObjectTypeVersion>
    </vers:ObjectMetadata>
    <vers:Record>
      <vers:RecordMetadata>
        <naa:Title>{title}</naa:Title>
      </vers:RecordMetadata>
      <vers:Document>
        <vers:Encoding vers:id="Revision-1-Document-1-Encoding-1">
          <vers:DocumentData>
{encoded}</vers:DocumentData>
        </vers:Encoding>
      </vers:Document>
    </vers:Record>
  </vers:SignedObject>
</vers:VERSEncapsulatedObject>
"#,
        title = title,
        encoded = vers_xml::base64::encode(content)
    )
}

pub const DOCUMENT_DATA_PATH: &str = "vers:VERSEncapsulatedObject/vers:SignedObject/vers:Record/vers:Document/vers:Encoding/vers:DocumentData";
pub const TITLE_PATH: &str = "vers:VERSEncapsulatedObject/vers:SignedObject/vers:Record/vers:RecordMetadata/naa:Title";
pub const METADATA_PATH: &str =
    "vers:VERSEncapsulatedObject/vers:SignedObject/vers:ObjectMetadata";
