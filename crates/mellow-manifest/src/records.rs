//! The untyped record layer shared by the manifest and the build-config
//! file: records of key/value fields, with spans kept for every key and
//! atom.

use std::{ops::Range, sync::Arc};

use mellow_errors::Spanned;

use crate::parser::ParseError;

/// One whitespace-delimited (possibly quoted) token with its byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    pub text: String,
    pub range: Range<usize>,
    /// Quoted atoms are always values, never `key:` tags.
    pub quoted: bool,
}

#[derive(Debug, Clone)]
pub struct RawField {
    pub key: Atom,
    pub atoms: Vec<Atom>,
}

/// A parsed record: a kind tag plus its fields, in file order.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub kind: Atom,
    pub fields: Vec<RawField>,
}

impl RawRecord {
    /// The record's source location as a [`Spanned`] unit.
    pub fn location(&self, path: &Arc<str>, text: &Arc<str>) -> Spanned<()> {
        Spanned::new(())
            .with_range(self.kind.range.clone())
            .with_path(path.clone())
            .with_text(text.clone())
    }
}

/// Pulls typed fields out of a [`RawRecord`], tracking which were consumed
/// so leftovers can be reported as unknown.
pub struct FieldBag<'a> {
    record: RawRecord,
    taken: Vec<bool>,
    path: &'a Arc<str>,
    text: &'a Arc<str>,
}

impl<'a> FieldBag<'a> {
    pub fn new(record: RawRecord, path: &'a Arc<str>, text: &'a Arc<str>) -> Self {
        let taken = vec![false; record.fields.len()];
        Self {
            record,
            taken,
            path,
            text,
        }
    }

    pub fn kind(&self) -> &Atom {
        &self.record.kind
    }

    pub fn location(&self) -> Spanned<()> {
        self.record.location(self.path, self.text)
    }

    fn err(&self, message: impl Into<String>, range: Range<usize>) -> ParseError {
        ParseError::new(message, self.path, self.text, Some(range))
    }

    fn take(&mut self, key: &str) -> Result<Option<usize>, ParseError> {
        let mut found = None;
        for (ix, field) in self.record.fields.iter().enumerate() {
            if field.key.text != key {
                continue;
            }
            if found.is_some() {
                return Err(self.err(
                    format!("field '{key}' is defined more than once"),
                    field.key.range.clone(),
                ));
            }
            found = Some(ix);
        }
        if let Some(ix) = found {
            self.taken[ix] = true;
        }
        Ok(found)
    }

    /// A single-atom field.
    pub fn scalar(&mut self, key: &str) -> Result<Option<String>, ParseError> {
        let Some(ix) = self.take(key)? else {
            return Ok(None);
        };
        let field = &self.record.fields[ix];
        match field.atoms.as_slice() {
            [atom] => Ok(Some(atom.text.clone())),
            _ => Err(self.err(
                format!("field '{key}' expects exactly one value"),
                field.key.range.clone(),
            )),
        }
    }

    /// A list field; an inline value is a single-element list.
    pub fn list(&mut self, key: &str) -> Result<Option<Vec<String>>, ParseError> {
        let Some(ix) = self.take(key)? else {
            return Ok(None);
        };
        let field = &self.record.fields[ix];
        Ok(Some(field.atoms.iter().map(|a| a.text.clone()).collect()))
    }

    pub fn boolean(&mut self, key: &str) -> Result<Option<bool>, ParseError> {
        let Some(ix) = self.take(key)? else {
            return Ok(None);
        };
        let field = &self.record.fields[ix];
        match field.atoms.as_slice() {
            [atom] if atom.text == "true" => Ok(Some(true)),
            [atom] if atom.text == "false" => Ok(Some(false)),
            _ => Err(self.err(
                format!("field '{key}' expects 'true' or 'false'"),
                field.key.range.clone(),
            )),
        }
    }

    /// Unwraps a required field, pointing at the record on absence.
    pub fn required<T>(&self, key: &str, value: Option<T>) -> Result<T, ParseError> {
        value.ok_or_else(|| {
            self.err(
                format!(
                    "field '{key}' not defined in '{}' record",
                    self.record.kind.text
                ),
                self.record.kind.range.clone(),
            )
        })
    }

    /// Errors on the first field no `take` consumed.
    pub fn finish(self) -> Result<(), ParseError> {
        for (field, taken) in self.record.fields.iter().zip(&self.taken) {
            if !taken {
                return Err(self.err(
                    format!(
                        "no field '{}' in a '{}' record",
                        field.key.text, self.record.kind.text
                    ),
                    field.key.range.clone(),
                ));
            }
        }
        Ok(())
    }
}
