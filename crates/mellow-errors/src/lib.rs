//! Source-location plumbing for more actionable error messages.
//!
//! Parsed values are wrapped in [`Spanned`] so that later stages (the
//! normalizer, the engine builder) can point back at the manifest text that
//! produced them. Used in conjunction with `miette` to include source
//! snippets in errors.

use std::{
    fmt::Display,
    ops::{Deref, DerefMut, Range},
    sync::Arc,
};

use miette::{NamedSource, SourceSpan};
use serde::{Deserialize, Serialize};

/// A value plus the place it was parsed from.
///
/// `range` is a byte range into `text`; `path` names the file. All three are
/// optional so synthesized values (defaults, tests) stay cheap.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Spanned<T> {
    pub value: T,
    #[serde(skip)]
    pub range: Option<Range<usize>>,
    #[serde(skip)]
    pub path: Option<Arc<str>>,
    #[serde(skip)]
    pub text: Option<Arc<str>>,
}

impl<T> Spanned<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            range: None,
            path: None,
            text: None,
        }
    }

    pub fn with_range(self, range: impl Into<Range<usize>>) -> Self {
        Self {
            range: Some(range.into()),
            ..self
        }
    }

    pub fn with_path(self, path: Arc<str>) -> Self {
        Self {
            path: Some(path),
            ..self
        }
    }

    pub fn with_text(self, text: impl Into<Arc<str>>) -> Self {
        Self {
            text: Some(text.into()),
            ..self
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn as_inner(&self) -> &T {
        &self.value
    }

    /// Splits out the span info from the value.
    pub fn split(self) -> (T, Spanned<()>) {
        (
            self.value,
            Spanned {
                value: (),
                range: self.range,
                path: self.path,
                text: self.text,
            },
        )
    }

    /// Replaces the value, keeping the span.
    pub fn to<U>(&self, value: U) -> Spanned<U> {
        Spanned {
            value,
            range: self.range.clone(),
            path: self.path.clone(),
            text: self.text.clone(),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            value: f(self.value),
            range: self.range,
            path: self.path,
            text: self.text,
        }
    }

    /// Gets the span and the source it indexes into, for a `miette` label.
    /// When either half is missing we return `None` for the span and an
    /// empty source, since `#[source_code]` cannot hold an `Option`.
    pub fn span_and_text(&self, default_path: &str) -> (Option<SourceSpan>, NamedSource) {
        let path = self.path.as_deref().unwrap_or(default_path);
        match self.range.clone().zip(self.text.as_ref()) {
            Some((range, text)) => (Some(range.into()), NamedSource::new(path, text.to_string())),
            None => (None, NamedSource::new(path, String::new())),
        }
    }

    /// Renders `file:offset` for plain-text contexts (log lines, summaries).
    pub fn location_hum(&self) -> Option<String> {
        let path = self.path.as_deref()?;
        match &self.range {
            Some(range) => Some(format!("{path}:{}", range.start)),
            None => Some(path.to_owned()),
        }
    }
}

impl Spanned<String> {
    pub fn as_str(&self) -> &str {
        self.value.as_str()
    }
}

impl<T: Display> Display for Spanned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.value.fmt(f)
    }
}

impl<T> Deref for Spanned<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T> DerefMut for Spanned<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_compose() {
        let s = Spanned::new(7)
            .with_range(3..5)
            .with_path(Arc::from("pkg/mbuild"))
            .with_text("abcdefg");
        assert_eq!(*s, 7);
        let (span, source) = s.span_and_text("fallback");
        assert_eq!(span, Some((3usize, 2usize).into()));
        assert_eq!(source.name(), "pkg/mbuild");
    }

    #[test]
    fn span_and_text_without_range() {
        let s = Spanned::new("x");
        let (span, source) = s.span_and_text("fallback");
        assert!(span.is_none());
        assert_eq!(source.name(), "fallback");
    }

    #[test]
    fn to_keeps_span() {
        let s = Spanned::new(1).with_range(0..1).with_text("a");
        let t = s.to("one");
        assert_eq!(t.range, Some(0..1));
        assert_eq!(*t, "one");
    }
}
