//! Rule-driven capture
//!
//! A [`Rule`] pairs a glob over element paths with a capture action. Rules are
//! compiled into a [`RuleSet`], and a [`RuleConsumer`] answers the parser's
//! `start_element` calls from it, collecting what was captured.
//!
//! Path globs are matched with `/` as a literal separator: `*` stays within one
//! element name, `**` spans any number of levels.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::consumer::{Attributes, ElementConsumer};
use crate::directive::{CaptureDirective, CaptureKind};

/// One capture rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Glob over slash-joined element paths, e.g. `vers:VEO/**/vers:DocumentData`
    pub path: String,
    pub action: CaptureKind,
    /// Decode Base64 content (leaf actions only)
    #[serde(default)]
    pub decode_base64: bool,
    /// Extension of files written by `file` rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

impl Rule {
    pub fn new(path: impl Into<String>, action: CaptureKind) -> Self {
        Self {
            path: path.into(),
            action,
            decode_base64: false,
            extension: None,
        }
    }

    pub fn base64(mut self) -> Self {
        self.decode_base64 = true;
        self
    }

    /// Extension used for files written by this rule
    pub fn file_extension(&self) -> &str {
        match &self.extension {
            Some(extension) => extension,
            None if self.decode_base64 => "bin",
            None => "txt",
        }
    }
}

/// Parses `PATH=ACTION[:base64]`, e.g. `veo/**/vers:DocumentData=file:base64`.
impl FromStr for Rule {
    type Err = String;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let (path, action) = spec
            .rsplit_once('=')
            .ok_or_else(|| format!("rule '{spec}' must have the form PATH=ACTION[:base64]"))?;
        if path.is_empty() {
            return Err(format!("rule '{spec}' has an empty path"));
        }

        let (action, modifier) = match action.split_once(':') {
            Some((action, modifier)) => (action, Some(modifier)),
            None => (action, None),
        };
        let action = match action.to_ascii_lowercase().as_str() {
            "value" => CaptureKind::Value,
            "element" => CaptureKind::Element,
            "file" => CaptureKind::File,
            other => {
                return Err(format!(
                    "unknown action '{other}' in rule '{spec}' (expected value, element or file)"
                ));
            }
        };

        let decode_base64 = match modifier {
            None => false,
            Some(m) if m.eq_ignore_ascii_case("base64") => true,
            Some(m) => return Err(format!("unknown modifier '{m}' in rule '{spec}'")),
        };
        if decode_base64 && action == CaptureKind::Element {
            return Err(format!("rule '{spec}': base64 applies to value and file actions only"));
        }

        Ok(Rule {
            path: path.to_string(),
            action,
            decode_base64,
            extension: None,
        })
    }
}

/// Compiled rules; the first rule matching a path wins
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
    globs: GlobSet,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Result<Self, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for rule in &rules {
            let glob = GlobBuilder::new(&rule.path)
                .literal_separator(true)
                .build()
                .map_err(|e| {
                    ConfigError::Validation(format!("Invalid rule path '{}': {}", rule.path, e))
                })?;
            builder.add(glob);
        }

        let globs = builder
            .build()
            .map_err(|e| ConfigError::Validation(format!("Failed to build rule set: {}", e)))?;
        Ok(Self { rules, globs })
    }

    /// First rule whose glob matches `path`
    pub fn first_match(&self, path: &str) -> Option<&Rule> {
        self.globs
            .matches(path)
            .into_iter()
            .min()
            .map(|index| &self.rules[index])
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn has_file_rules(&self) -> bool {
        self.rules.iter().any(|rule| rule.action == CaptureKind::File)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Something captured from a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedItem {
    pub path: String,
    pub kind: CaptureKind,
    /// Leaf value or recorded markup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// File the value was written to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// [`ElementConsumer`] driven by a [`RuleSet`]
#[derive(Debug)]
pub struct RuleConsumer {
    rules: Arc<RuleSet>,
    /// Directory receiving this document's value files
    file_dir: Option<PathBuf>,
    max_items: Option<usize>,
    /// Capture issued for each open element
    open: Vec<Option<(CaptureKind, Option<PathBuf>)>>,
    counter: usize,
    items: Vec<CapturedItem>,
}

impl RuleConsumer {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self {
            rules,
            file_dir: None,
            max_items: None,
            open: Vec::new(),
            counter: 0,
            items: Vec::new(),
        }
    }

    /// Write `file` captures into `dir`, which must exist.
    pub fn with_file_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.file_dir = Some(dir.into());
        self
    }

    /// Stop the parse once this many items were captured.
    pub fn with_max_items(mut self, max_items: Option<usize>) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn items(&self) -> &[CapturedItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<CapturedItem> {
        self.items
    }

    /// Files written so far
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.items.iter().filter_map(|item| item.file.as_deref())
    }

    fn file_destination(&mut self, path: &str, rule: &Rule) -> Option<PathBuf> {
        let dir = self.file_dir.as_ref()?;
        self.counter += 1;

        let name = path.rsplit('/').next().unwrap_or(path);
        let name: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();
        Some(dir.join(format!(
            "{:04}-{}.{}",
            self.counter,
            name,
            rule.file_extension()
        )))
    }
}

impl ElementConsumer for RuleConsumer {
    fn start_element(&mut self, path: &str, _attributes: &Attributes) -> Option<CaptureDirective> {
        let Some(rule) = self.rules.first_match(path).cloned() else {
            self.open.push(None);
            return None;
        };

        let directive = match rule.action {
            CaptureKind::Element => CaptureDirective::whole_element(),
            CaptureKind::Value => CaptureDirective::LeafValue {
                decode_base64: rule.decode_base64,
            },
            CaptureKind::File => match self.file_destination(path, &rule) {
                Some(destination) => CaptureDirective::LeafValueToFile {
                    destination,
                    decode_base64: rule.decode_base64,
                },
                None => {
                    tracing::warn!(path, "No output directory for file rule, capturing as value");
                    CaptureDirective::LeafValue {
                        decode_base64: rule.decode_base64,
                    }
                }
            },
        };

        self.open.push(Some((
            directive.kind(),
            directive.destination().map(Path::to_path_buf),
        )));
        Some(directive)
    }

    fn end_element(&mut self, path: &str, value: Option<String>, markup: Option<String>) {
        let Some(Some((kind, file))) = self.open.pop() else {
            return;
        };

        let content = match kind {
            // Elements nested in a recorded element produce no markup of their own.
            CaptureKind::Element if markup.is_none() => return,
            CaptureKind::Element => markup,
            CaptureKind::Value => value,
            CaptureKind::File => None,
        };

        self.items.push(CapturedItem {
            path: path.to_string(),
            kind,
            content,
            file,
        });
    }

    fn finished(&self) -> bool {
        self.max_items
            .is_some_and(|max_items| self.items.len() >= max_items)
    }
}
