//! Capture state held by the parser while elements are open
//!
//! Leaf captures live in one slot per open element, so a capture requested on
//! an element only ever sees the text directly inside it. Whole-element
//! recording is tracked separately because it spans descendants.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use quick_xml::escape::escape;

use crate::base64::Base64Decoder;
use crate::consumer::Attributes;
use crate::directive::CaptureDirective;
use crate::error::{Result, XmlError};

/// Written into recorded markup in place of content that went to a file
pub const FILE_CONTENT_PLACEHOLDER: &str = "[Value saved to record content file]";

/// Leaf capture attached to one open element
#[derive(Debug, Default)]
pub(crate) enum LeafCapture {
    #[default]
    None,
    Text(String),
    Base64Text {
        decoder: Base64Decoder,
        bytes: Vec<u8>,
    },
    File(FileCapture),
}

impl LeafCapture {
    /// Set up the capture for a leaf directive, creating the output file if needed.
    pub(crate) fn open(directive: &CaptureDirective) -> Result<Self> {
        match directive {
            CaptureDirective::WholeElement => Ok(LeafCapture::None),
            CaptureDirective::LeafValue {
                decode_base64: false,
            } => Ok(LeafCapture::Text(String::new())),
            CaptureDirective::LeafValue {
                decode_base64: true,
            } => Ok(LeafCapture::Base64Text {
                decoder: Base64Decoder::new(),
                bytes: Vec::new(),
            }),
            CaptureDirective::LeafValueToFile {
                destination,
                decode_base64,
            } => Ok(LeafCapture::File(FileCapture::create(
                destination,
                *decode_base64,
            )?)),
        }
    }

    pub(crate) fn is_file(&self) -> bool {
        matches!(self, LeafCapture::File(_))
    }

    pub(crate) fn append(&mut self, text: &str) -> Result<()> {
        match self {
            LeafCapture::None => Ok(()),
            LeafCapture::Text(buffer) => {
                buffer.push_str(text);
                Ok(())
            }
            LeafCapture::Base64Text { decoder, bytes } => {
                decoder.decode_into(text.as_bytes(), bytes);
                Ok(())
            }
            LeafCapture::File(file) => file.write(text),
        }
    }

    /// Finish the capture at the element's end tag.
    ///
    /// Returns the normalized string value for string captures. File captures
    /// are flushed and closed and yield no value.
    pub(crate) fn finish(self) -> Result<Option<String>> {
        match self {
            LeafCapture::None => Ok(None),
            LeafCapture::Text(buffer) => Ok(normalize_value(&buffer)),
            LeafCapture::Base64Text { decoder, bytes } => {
                if !decoder.is_aligned() {
                    tracing::debug!(
                        pending = decoder.pending_symbols(),
                        "Discarding incomplete Base64 quantum"
                    );
                }
                Ok(normalize_value(&String::from_utf8_lossy(&bytes)))
            }
            LeafCapture::File(file) => {
                file.finish()?;
                Ok(None)
            }
        }
    }

    /// Release the capture on an aborted parse; partially written files are removed.
    pub(crate) fn abandon(self) {
        if let LeafCapture::File(file) = self {
            file.abandon();
        }
    }
}

/// Trim characters up to and including space; blank values are absent.
pub(crate) fn normalize_value(raw: &str) -> Option<String> {
    let trimmed = raw.trim_matches(|c: char| c <= ' ');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// An output file receiving the content of one leaf element
#[derive(Debug)]
pub(crate) struct FileCapture<W: Write = File> {
    path: PathBuf,
    writer: BufWriter<W>,
    decoder: Option<Base64Decoder>,
    bytes_written: u64,
}

impl FileCapture {
    fn create(path: &Path, decode_base64: bool) -> Result<Self> {
        let file = File::create(path).map_err(|source| XmlError::Sink {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), decode_base64, "Opened value file");
        Ok(Self::with_writer(path, file, decode_base64))
    }
}

impl<W: Write> FileCapture<W> {
    /// `path` names the file behind `writer`; it is removed if the capture fails.
    fn with_writer(path: &Path, writer: W, decode_base64: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(writer),
            decoder: decode_base64.then(Base64Decoder::new),
            bytes_written: 0,
        }
    }

    fn write(&mut self, text: &str) -> Result<()> {
        let result = match self.decoder.as_mut() {
            Some(decoder) => decoder
                .feed(text, &mut self.writer)
                .map(|written| written as u64),
            None => self
                .writer
                .write_all(text.as_bytes())
                .map(|()| text.len() as u64),
        };

        match result {
            Ok(written) => {
                self.bytes_written += written;
                Ok(())
            }
            Err(source) => Err(XmlError::Sink {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn finish(mut self) -> Result<()> {
        if let Err(source) = self.writer.flush() {
            let path = self.path.clone();
            self.abandon();
            return Err(XmlError::Sink { path, source });
        }
        tracing::debug!(
            path = %self.path.display(),
            bytes = self.bytes_written,
            "Closed value file"
        );
        Ok(())
    }

    fn abandon(self) {
        let FileCapture { path, writer, .. } = self;
        // Close before removing; buffered bytes are discarded with the file.
        drop(writer.into_parts());
        if let Err(e) = fs::remove_file(&path) {
            tracing::debug!(path = %path.display(), error = %e, "Could not remove partial value file");
        }
    }
}

/// Markup being recorded for a whole-element capture
#[derive(Debug)]
pub(crate) struct MarkupRecorder {
    root_path: String,
    markup: String,
}

impl MarkupRecorder {
    pub(crate) fn new(root_path: &str) -> Self {
        Self {
            root_path: root_path.to_string(),
            markup: String::new(),
        }
    }

    /// Path of the element whose end tag completes the recording
    pub(crate) fn root_path(&self) -> &str {
        &self.root_path
    }

    pub(crate) fn open_tag(&mut self, name: &str, attributes: &Attributes) {
        self.markup.push('<');
        self.markup.push_str(name);
        for (key, value) in attributes.iter() {
            self.markup.push(' ');
            self.markup.push_str(key);
            self.markup.push_str("=\"");
            self.markup.push_str(&escape(value));
            self.markup.push('"');
        }
        self.markup.push('>');
    }

    pub(crate) fn text(&mut self, text: &str) {
        self.markup.push_str(&escape(text));
    }

    pub(crate) fn comment(&mut self, text: &str) {
        self.markup.push_str("<!-- ");
        self.markup.push_str(text);
        self.markup.push_str(" -->");
    }

    pub(crate) fn file_placeholder(&mut self) {
        self.markup.push_str(FILE_CONTENT_PLACEHOLDER);
    }

    pub(crate) fn close_tag(&mut self, name: &str) {
        self.markup.push_str("</");
        self.markup.push_str(name);
        self.markup.push('>');
    }

    pub(crate) fn into_markup(self) -> String {
        self.markup
    }
}
