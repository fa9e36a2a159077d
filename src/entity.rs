//! General entities declared in a document's DOCTYPE
//!
//! Internal entities expand to their replacement text. External entities
//! (`SYSTEM` or `PUBLIC`) expand to nothing and are never fetched. Parameter
//! entities are ignored.

use std::borrow::Cow;
use std::collections::HashMap;

use quick_xml::escape::resolve_predefined_entity;

/// Deepest chain of entities referring to other entities
const MAX_DEPTH: usize = 16;

/// Largest text a single expansion may produce
const MAX_EXPANSION: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entity {
    Internal(String),
    External,
}

/// Entities declared by the current document
#[derive(Debug, Default)]
pub(crate) struct EntityTable {
    entities: HashMap<String, Entity>,
}

impl EntityTable {
    pub(crate) fn clear(&mut self) {
        self.entities.clear();
    }

    /// Record the `<!ENTITY>` declarations found in the content of a DOCTYPE.
    pub(crate) fn declare_from_doctype(&mut self, doctype: &str) -> Result<(), String> {
        let mut rest = doctype;
        while let Some(start) = rest.find("<!") {
            rest = &rest[start..];
            if let Some(comment) = rest.strip_prefix("<!--") {
                match comment.find("-->") {
                    Some(end) => rest = &comment[end + 3..],
                    None => return Err("unterminated comment in DOCTYPE".to_string()),
                }
            } else if let Some(declaration) = rest.strip_prefix("<!ENTITY") {
                rest = self.declare(declaration)?;
            } else {
                rest = &rest[2..];
            }
        }
        Ok(())
    }

    /// Parse one declaration following `<!ENTITY`, returning the text after it.
    fn declare<'a>(&mut self, declaration: &'a str) -> Result<&'a str, String> {
        let s = declaration.trim_start();
        let (parameter, s) = match s.strip_prefix('%') {
            Some(s) => (true, s.trim_start()),
            None => (false, s),
        };

        let name_end = s
            .find(|c: char| c.is_whitespace())
            .ok_or_else(|| "incomplete ENTITY declaration".to_string())?;
        let name = &s[..name_end];
        let s = s[name_end..].trim_start();

        let (entity, s) = if let Some(quote) = s.chars().next().filter(|&c| c == '"' || c == '\'') {
            let body = &s[1..];
            let end = body
                .find(quote)
                .ok_or_else(|| format!("unterminated value of entity '{name}'"))?;
            (Entity::Internal(body[..end].to_string()), &body[end + 1..])
        } else if s.starts_with("SYSTEM") || s.starts_with("PUBLIC") {
            (Entity::External, s)
        } else {
            return Err(format!("malformed declaration of entity '{name}'"));
        };

        let rest = skip_declaration(s)
            .ok_or_else(|| format!("unterminated declaration of entity '{name}'"))?;

        // The first declaration of a name is binding.
        if !parameter && !self.entities.contains_key(name) {
            tracing::trace!(name, external = entity == Entity::External, "Declared entity");
            self.entities.insert(name.to_string(), entity);
        }
        Ok(rest)
    }

    /// Replacement text for `&name;`.
    pub(crate) fn resolve(&self, name: &str) -> Result<Cow<'_, str>, String> {
        self.resolve_at(name, 0)
    }

    /// Replace every reference in `text`, e.g. an attribute value.
    pub(crate) fn unescape<'a>(&'a self, text: &'a str) -> Result<Cow<'a, str>, String> {
        self.unescape_at(text, 0)
    }

    fn resolve_at(&self, name: &str, depth: usize) -> Result<Cow<'_, str>, String> {
        if let Some(resolved) = resolve_reference(name) {
            return Ok(resolved);
        }

        match self.entities.get(name) {
            Some(Entity::External) => Ok(Cow::Borrowed("")),
            Some(Entity::Internal(text)) if !text.contains('&') => Ok(Cow::Borrowed(text)),
            Some(Entity::Internal(_)) if depth >= MAX_DEPTH => {
                Err(format!("entity '&{name};' is nested too deeply or refers to itself"))
            }
            Some(Entity::Internal(text)) => self.unescape_at(text, depth + 1),
            None => Err(format!("reference to undeclared entity '&{name};'")),
        }
    }

    fn unescape_at<'a>(&'a self, text: &'a str, depth: usize) -> Result<Cow<'a, str>, String> {
        if !text.contains('&') {
            return Ok(Cow::Borrowed(text));
        }

        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(amp) = rest.find('&') {
            out.push_str(&rest[..amp]);
            let reference = &rest[amp + 1..];
            let semicolon = reference
                .find(';')
                .ok_or_else(|| format!("unterminated reference in '{text}'"))?;
            out.push_str(&self.resolve_at(&reference[..semicolon], depth)?);
            if out.len() > MAX_EXPANSION {
                return Err("entity expansion exceeds 1 MiB".to_string());
            }
            rest = &reference[semicolon + 1..];
        }
        out.push_str(rest);
        Ok(Cow::Owned(out))
    }
}

/// Skip to just past the `>` closing a declaration, ignoring quoted text.
fn skip_declaration(s: &str) -> Option<&str> {
    let mut quote = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '>') => return Some(&s[i + 1..]),
            _ => {}
        }
    }
    None
}

/// Resolve a character reference or one of the five predefined entities.
pub(crate) fn resolve_reference(name: &str) -> Option<Cow<'static, str>> {
    let Some(digits) = name.strip_prefix('#') else {
        return resolve_predefined_entity(name).map(Cow::Borrowed);
    };

    let code_point = match digits.strip_prefix('x') {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u32>().ok()?,
    };
    match char::from_u32(code_point) {
        Some('\0') | None => None,
        Some(c) => Some(Cow::Owned(c.to_string())),
    }
}
