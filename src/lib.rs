//! # vers-xml Library
//!
//! Streaming, event-driven parsing of record-keeping XML (VERS Encapsulated
//! Objects and similar documents whose elements hold either child elements or
//! leaf content). An [`ElementConsumer`] is told about every element and
//! decides what to capture: the whole element as markup, the leaf value as a
//! string, or the leaf value streamed into a file, optionally Base64-decoded
//! on the way.
//!
//! On top of the parser sits a rule-driven batch extractor used by the
//! `vers-xml` command line tool.

pub mod base64;
mod capture;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod directive;
mod entity;
pub mod error;
pub mod extract;
pub mod file_discovery;
pub mod output;
pub mod parser;
pub mod path;
pub mod rules;

pub use self::base64::Base64Decoder;
pub use capture::FILE_CONTENT_PLACEHOLDER;
pub use cli::{Cli, OutputFormat, VerbosityLevel};
pub use config::{Config, ConfigError, ConfigManager, EnvProvider};
pub use consumer::{Attributes, ElementConsumer};
pub use directive::{CaptureDirective, CaptureKind};
pub use error::{Severity, XmlError};
pub use extract::{
    DocumentResult, DocumentStatus, EngineConfig, ExtractionEngine, ExtractionResults,
};
pub use file_discovery::FileDiscovery;
pub use output::Output;
pub use parser::{ParserOptions, ParserState, XmlParser};
pub use path::PathStack;
pub use rules::{CapturedItem, Rule, RuleConsumer, RuleSet};
