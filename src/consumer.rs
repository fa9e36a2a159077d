//! Consumer callback protocol
//!
//! The parser reports element boundaries to an [`ElementConsumer`] and asks it,
//! element by element, what to capture. Calls are synchronous and arrive in
//! document order: every `start_element` is matched by exactly one
//! `end_element` for the same path.

use crate::directive::CaptureDirective;

/// Business logic driven by [`XmlParser`](crate::XmlParser)
pub trait ElementConsumer {
    /// An element has been opened.
    ///
    /// `path` is the slash-joined list of qualified names from the document
    /// root to this element. The returned directive applies until the
    /// matching end tag; `None` captures nothing.
    fn start_element(&mut self, path: &str, attributes: &Attributes) -> Option<CaptureDirective>;

    /// An element has been closed.
    ///
    /// `value` is the trimmed leaf value when a [`CaptureDirective::LeafValue`]
    /// was requested and the element held non-blank text. `markup` is the
    /// recorded XML when this element was captured with
    /// [`CaptureDirective::WholeElement`]. Any file capture for the element has
    /// already been flushed and closed.
    fn end_element(&mut self, path: &str, value: Option<String>, markup: Option<String>);

    /// Return true to stop the parse after the current end tag.
    fn finished(&self) -> bool {
        false
    }
}

impl<C: ElementConsumer + ?Sized> ElementConsumer for &mut C {
    fn start_element(&mut self, path: &str, attributes: &Attributes) -> Option<CaptureDirective> {
        (**self).start_element(path, attributes)
    }

    fn end_element(&mut self, path: &str, value: Option<String>, markup: Option<String>) {
        (**self).end_element(path, value, markup)
    }

    fn finished(&self) -> bool {
        (**self).finished()
    }
}

/// Attributes of an element in document order, values unescaped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    entries: Vec<(String, String)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Value of the first attribute with this qualified name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
