//! Capture directives
//!
//! A [`CaptureDirective`] is the answer an [`ElementConsumer`](crate::ElementConsumer)
//! gives when told that an element has started: what the parser should do with
//! that element's content until its end tag.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What to do with the content of one element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureDirective {
    /// Record the element, its attributes and all descendants as XML markup
    WholeElement,
    /// Collect the text directly inside the element as a string
    LeafValue { decode_base64: bool },
    /// Stream the text directly inside the element into a file
    LeafValueToFile {
        destination: PathBuf,
        decode_base64: bool,
    },
}

/// The action of a directive without its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    /// Whole element as markup
    Element,
    /// Leaf value as a string
    Value,
    /// Leaf value into a file
    File,
}

impl CaptureDirective {
    pub fn whole_element() -> Self {
        CaptureDirective::WholeElement
    }

    pub fn leaf_value() -> Self {
        CaptureDirective::LeafValue {
            decode_base64: false,
        }
    }

    /// Leaf value whose Base64 content is decoded before being returned
    pub fn leaf_value_base64() -> Self {
        CaptureDirective::LeafValue {
            decode_base64: true,
        }
    }

    pub fn leaf_to_file(destination: impl Into<PathBuf>) -> Self {
        CaptureDirective::LeafValueToFile {
            destination: destination.into(),
            decode_base64: false,
        }
    }

    /// Leaf value decoded from Base64 while it is written to `destination`
    pub fn leaf_to_file_base64(destination: impl Into<PathBuf>) -> Self {
        CaptureDirective::LeafValueToFile {
            destination: destination.into(),
            decode_base64: true,
        }
    }

    /// Build a directive from loosely specified parts.
    ///
    /// `decode_base64` and `destination` only apply to [`CaptureKind::File`];
    /// for the other kinds they are ignored and the neutral form is returned.
    /// A file capture without a destination yields `None`.
    pub fn from_parts(
        kind: CaptureKind,
        decode_base64: bool,
        destination: Option<PathBuf>,
    ) -> Option<Self> {
        match kind {
            CaptureKind::Element => Some(Self::whole_element()),
            CaptureKind::Value => Some(Self::leaf_value()),
            CaptureKind::File => destination.map(|destination| CaptureDirective::LeafValueToFile {
                destination,
                decode_base64,
            }),
        }
    }

    pub fn kind(&self) -> CaptureKind {
        match self {
            CaptureDirective::WholeElement => CaptureKind::Element,
            CaptureDirective::LeafValue { .. } => CaptureKind::Value,
            CaptureDirective::LeafValueToFile { .. } => CaptureKind::File,
        }
    }

    pub fn decode_base64(&self) -> bool {
        match self {
            CaptureDirective::WholeElement => false,
            CaptureDirective::LeafValue { decode_base64 }
            | CaptureDirective::LeafValueToFile { decode_base64, .. } => *decode_base64,
        }
    }

    pub fn destination(&self) -> Option<&Path> {
        match self {
            CaptureDirective::LeafValueToFile { destination, .. } => Some(destination),
            _ => None,
        }
    }
}
