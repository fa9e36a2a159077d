//! Streaming XML parser driving an [`ElementConsumer`]
//!
//! [`XmlParser`] pulls events from `quick-xml`, keeps the path of open
//! elements and executes the [`CaptureDirective`] returned for each element.
//! One `parse*` call processes exactly one document; the parser can be reused
//! for the next document afterwards, whatever the outcome of the last one.

use std::borrow::Cow;
use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::capture::{LeafCapture, MarkupRecorder};
use crate::consumer::{Attributes, ElementConsumer};
use crate::directive::CaptureDirective;
use crate::entity::EntityTable;
use crate::error::{Result, XmlError};
use crate::path::PathStack;

/// Default capacity of the file read buffer
pub const DEFAULT_READ_BUFFER: usize = 64 * 1024;

/// Tuning for the underlying tokenizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserOptions {
    /// Capacity of the buffered reader used by [`XmlParser::parse`]
    pub read_buffer_size: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER,
        }
    }
}

/// Lifecycle of a parser instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Constructed, no document parsed yet
    Idle,
    /// Inside a `parse*` call
    Parsing,
    /// Last document completed, or was stopped early by the consumer
    Finished,
    /// Last document failed
    Failed,
}

/// Event-driven parser for leaf-or-container XML documents
pub struct XmlParser<C> {
    consumer: C,
    options: ParserOptions,
    state: ParserState,
    path: PathStack,
    /// One leaf capture slot per open element
    frames: Vec<LeafCapture>,
    recorder: Option<MarkupRecorder>,
    attributes: Attributes,
    /// Entities declared by the current document's DOCTYPE
    entities: EntityTable,
    root_seen: bool,
}

impl<C: ElementConsumer> XmlParser<C> {
    pub fn new(consumer: C) -> Result<Self> {
        Self::with_options(consumer, ParserOptions::default())
    }

    pub fn with_options(consumer: C, options: ParserOptions) -> Result<Self> {
        if options.read_buffer_size == 0 {
            return Err(XmlError::Engine {
                details: "read buffer size must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            consumer,
            options,
            state: ParserState::Idle,
            path: PathStack::new(),
            frames: Vec::new(),
            recorder: None,
            attributes: Attributes::new(),
            entities: EntityTable::default(),
            root_seen: false,
        })
    }

    /// Parse the XML file at `xml_file`.
    pub fn parse(&mut self, xml_file: &Path) -> Result<()> {
        let file = match File::open(xml_file) {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!(path = %xml_file.display(), error = %e, "Cannot open XML file");
                self.state = ParserState::Failed;
                return Err(XmlError::NotFound {
                    path: xml_file.to_path_buf(),
                });
            }
        };

        let reader = BufReader::with_capacity(self.options.read_buffer_size, file);
        self.parse_reader(reader, &xml_file.display().to_string())
    }

    /// Parse an in-memory document. `document` names it in errors and logs.
    pub fn parse_str(&mut self, xml: &str, document: &str) -> Result<()> {
        self.parse_reader(xml.as_bytes(), document)
    }

    /// Parse a document from any buffered source.
    pub fn parse_reader<R: BufRead>(&mut self, source: R, document: &str) -> Result<()> {
        self.reset();
        self.state = ParserState::Parsing;
        tracing::debug!(document, "Parsing document");

        let mut reader = Reader::from_reader(source);
        let config = reader.config_mut();
        config.expand_empty_elements = true;
        config.check_end_names = true;

        let result = self.drive(&mut reader, document);
        self.release_captures();

        match &result {
            Ok(()) => {
                self.state = ParserState::Finished;
                tracing::debug!(document, "Finished document");
            }
            Err(e) => {
                self.state = ParserState::Failed;
                tracing::debug!(document, error = %e, "Document failed");
            }
        }
        result
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    pub fn consumer_mut(&mut self) -> &mut C {
        &mut self.consumer
    }

    pub fn into_consumer(self) -> C {
        self.consumer
    }

    fn reset(&mut self) {
        self.release_captures();
        self.path.clear();
        self.attributes.clear();
        self.entities.clear();
        self.root_seen = false;
    }

    /// Close every capture still open; files not completed are removed.
    fn release_captures(&mut self) {
        for capture in self.frames.drain(..) {
            capture.abandon();
        }
        self.recorder = None;
    }

    fn drive<R: BufRead>(&mut self, reader: &mut Reader<R>, document: &str) -> Result<()> {
        let mut buf = Vec::new();

        loop {
            let event = match reader.read_event_into(&mut buf) {
                Ok(event) => event,
                Err(e) => return Err(tokenizer_error(e, document, reader.buffer_position())),
            };

            match event {
                Event::Start(e) => self.open_element(&e, document)?,
                Event::Empty(e) => {
                    self.open_element(&e, document)?;
                    let name = utf8(e.name().into_inner(), document)?;
                    self.close_element(name)?;
                    if self.consumer.finished() {
                        break;
                    }
                }
                Event::End(e) => {
                    let name = utf8(e.name().into_inner(), document)?;
                    self.close_element(name)?;
                    if self.consumer.finished() {
                        break;
                    }
                }
                Event::Text(e) => {
                    let text = utf8(&e, document)?;
                    self.characters(&normalize_newlines(text), document)?;
                }
                Event::CData(e) => {
                    let text = utf8(&e, document)?;
                    self.characters(&normalize_newlines(text), document)?;
                }
                Event::GeneralRef(e) => {
                    let name = utf8(e.as_ref(), document)?;
                    let resolved = self
                        .entities
                        .resolve(name)
                        .map_err(|details| {
                            XmlError::malformed(
                                document,
                                format!("{details} at byte {}", reader.buffer_position()),
                            )
                        })?
                        .into_owned();
                    self.characters(&resolved, document)?;
                }
                Event::Comment(e) => {
                    if let Some(recorder) = self.recorder.as_mut() {
                        recorder.comment(utf8(&e, document)?);
                    }
                }
                Event::DocType(e) => {
                    // Only entity declarations are used; nothing is fetched or validated.
                    let doctype = utf8(&e, document)?;
                    self.entities.declare_from_doctype(doctype).map_err(|details| {
                        XmlError::malformed(document, format!("DOCTYPE: {details}"))
                    })?;
                }
                Event::Decl(_) | Event::PI(_) => {}
                Event::Eof => {
                    if let Some(open) = self.path.current() {
                        return Err(XmlError::malformed(
                            document,
                            format!("unexpected end of document, element '{open}' is not closed"),
                        ));
                    }
                    if !self.root_seen {
                        return Err(XmlError::malformed(document, "document has no root element"));
                    }
                    break;
                }
            }

            buf.clear();
        }

        if !self.path.is_empty() {
            tracing::debug!(
                document,
                path = self.path.as_str(),
                "Consumer finished before end of document"
            );
        }
        Ok(())
    }

    fn open_element(&mut self, start: &BytesStart<'_>, document: &str) -> Result<()> {
        let name = utf8(start.name().into_inner(), document)?;

        if self.path.is_empty() {
            if self.root_seen {
                return Err(XmlError::malformed(
                    document,
                    format!("second root element '{name}'"),
                ));
            }
            self.root_seen = true;
        }

        self.attributes.clear();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|e| {
                XmlError::malformed(document, format!("bad attribute on '{name}': {e}"))
            })?;
            let key = utf8(attribute.key.as_ref(), document)?;
            let raw = utf8(&attribute.value, document)?;
            let value = self.entities.unescape(raw).map_err(|details| {
                XmlError::malformed(document, format!("bad value of attribute '{key}': {details}"))
            })?;
            self.attributes
                .push(key, normalize_newlines(&value).into_owned());
        }

        self.path.push(name);
        let directive = self
            .consumer
            .start_element(self.path.as_str(), &self.attributes);

        let capture = match directive {
            None => LeafCapture::None,
            Some(CaptureDirective::WholeElement) => {
                if self.recorder.is_none() {
                    self.recorder = Some(MarkupRecorder::new(self.path.as_str()));
                } else {
                    tracing::trace!(
                        path = self.path.as_str(),
                        "Ignoring nested whole-element capture"
                    );
                }
                LeafCapture::None
            }
            Some(leaf) => LeafCapture::open(&leaf)?,
        };

        if let Some(recorder) = self.recorder.as_mut() {
            recorder.open_tag(name, &self.attributes);
        }
        self.frames.push(capture);
        Ok(())
    }

    fn characters(&mut self, text: &str, document: &str) -> Result<()> {
        let Some(capture) = self.frames.last_mut() else {
            if text.chars().any(|c| !c.is_whitespace()) {
                return Err(XmlError::malformed(
                    document,
                    "character data outside the root element",
                ));
            }
            return Ok(());
        };

        if let Some(recorder) = self.recorder.as_mut()
            && !capture.is_file()
        {
            recorder.text(text);
        }
        capture.append(text)
    }

    fn close_element(&mut self, name: &str) -> Result<()> {
        let capture = self.frames.pop().unwrap_or_default();
        let to_file = capture.is_file();

        let recording_complete = match self.recorder.as_mut() {
            Some(recorder) => {
                if to_file {
                    recorder.file_placeholder();
                }
                recorder.close_tag(name);
                recorder.root_path() == self.path.as_str()
            }
            None => false,
        };
        let markup = if recording_complete {
            self.recorder.take().map(MarkupRecorder::into_markup)
        } else {
            None
        };

        let value = capture.finish()?;
        self.consumer.end_element(self.path.as_str(), value, markup);
        self.path.pop();
        Ok(())
    }
}

fn tokenizer_error(err: quick_xml::Error, document: &str, position: impl Display) -> XmlError {
    match err {
        quick_xml::Error::Io(source) => XmlError::Io {
            document: document.to_string(),
            source: io::Error::new(source.kind(), source.to_string()),
        },
        other => XmlError::malformed(document, format!("{other} at byte {position}")),
    }
}

fn utf8<'a>(bytes: &'a [u8], document: &str) -> Result<&'a str> {
    std::str::from_utf8(bytes)
        .map_err(|e| XmlError::malformed(document, format!("invalid UTF-8: {e}")))
}

/// Line breaks are reported as `\n` whatever the source used.
fn normalize_newlines(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(text)
    }
}
