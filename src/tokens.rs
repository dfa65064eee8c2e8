//! Token stream primitives.
//!
//! The smallest unit handled by the transform pipeline is a token: a tag, a
//! run of text, a comment, or the end-of-stream marker. Every token carries
//! the same out-of-band payload, a source byte range plus an optional
//! verbatim capture of the text it was produced from, so that a
//! Wikitext-producing serializer can later reconstruct the original input
//! exactly.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A range of text within a source string.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct Span {
    /// The position of the first byte of the span.
    pub start: usize,

    /// The position after the last byte of the span.
    pub end: usize,
}

impl Span {
    /// Creates a new span.
    #[inline]
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    /// Returns true if this span is empty.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.start >= self.end
    }

    /// The length of the span, in bytes.
    #[inline]
    pub fn len(self) -> usize {
        self.end - self.start
    }

    /// Creates a span that encloses both `self` and `other`.
    #[inline]
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    #[inline]
    /// Converts the span into a range that can be used for string indexing.
    // This is not just using `From<core::ops::Range<usize>>` because type
    // resolution fails in common use with `.into()` which eliminates any
    // benefit of using a standard conversion trait
    pub fn into_range(self) -> core::ops::Range<usize> {
        self.start..self.end
    }
}

// Spans travel on the wire in `tsr` form, a two-element array.
impl Serialize for Span {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.start, self.end).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Span {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (start, end) = <(usize, usize)>::deserialize(deserializer)?;
        Ok(Span { start, end })
    }
}

/// The out-of-band payload attached to every token.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TokenMeta {
    /// The source range the token was produced from.
    ///
    /// Only trustworthy for tokens produced directly from input text;
    /// tokens synthesized by a handler carry `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsr: Option<Span>,

    /// The verbatim source text of the token, when it has been captured for
    /// round-tripping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
}

/// An ordered tag attribute key/value pair.
///
/// ```wikitext
/// <tag name="value">
///      ^^^^^^^^^^^^
/// ```
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Kv {
    /// The attribute name.
    pub key: String,
    /// The attribute value.
    pub value: String,
}

impl Kv {
    /// Creates a new key/value pair.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A token variant.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TokenKind {
    /// An element start tag.
    StartTag {
        /// The tag name.
        name: String,
        /// The tag attributes.
        attributes: Vec<Kv>,
    },
    /// An element end tag.
    EndTag {
        /// The tag name.
        name: String,
        /// The tag attributes.
        attributes: Vec<Kv>,
    },
    /// A self-closing tag.
    SelfClosingTag {
        /// The tag name.
        name: String,
        /// The tag attributes.
        attributes: Vec<Kv>,
    },
    /// A run of plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// An HTML comment.
    Comment {
        /// The raw contents of the comment.
        content: String,
    },
    /// The end-of-stream marker. Exactly one terminates every pipeline run.
    EndOfStream,
}

/// A single unit of parsed input.
///
/// Tokens are a tagged kind plus a common metadata payload, so handler
/// dispatch is a pattern match over [`TokenKind`] and the round-trip data
/// is reachable the same way for every variant.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Token {
    /// The out-of-band payload.
    pub meta: TokenMeta,
    /// The token variant.
    pub kind: TokenKind,
}

impl Token {
    /// Creates a start tag token.
    pub fn start_tag(name: impl Into<String>, attributes: Vec<Kv>, tsr: Option<Span>) -> Self {
        Self::tag(
            TokenKind::StartTag {
                name: name.into(),
                attributes,
            },
            tsr,
        )
    }

    /// Creates an end tag token.
    pub fn end_tag(name: impl Into<String>, attributes: Vec<Kv>, tsr: Option<Span>) -> Self {
        Self::tag(
            TokenKind::EndTag {
                name: name.into(),
                attributes,
            },
            tsr,
        )
    }

    /// Creates a self-closing tag token.
    pub fn self_closing_tag(
        name: impl Into<String>,
        attributes: Vec<Kv>,
        tsr: Option<Span>,
    ) -> Self {
        Self::tag(
            TokenKind::SelfClosingTag {
                name: name.into(),
                attributes,
            },
            tsr,
        )
    }

    /// Creates a text token.
    pub fn text(text: impl Into<String>, tsr: Option<Span>) -> Self {
        Self::tag(TokenKind::Text { text: text.into() }, tsr)
    }

    /// Creates a comment token.
    pub fn comment(content: impl Into<String>, tsr: Option<Span>) -> Self {
        Self::tag(
            TokenKind::Comment {
                content: content.into(),
            },
            tsr,
        )
    }

    /// Creates the end-of-stream marker token.
    pub fn end_of_stream() -> Self {
        Self {
            meta: <_>::default(),
            kind: TokenKind::EndOfStream,
        }
    }

    fn tag(kind: TokenKind, tsr: Option<Span>) -> Self {
        Self {
            meta: TokenMeta { tsr, src: None },
            kind,
        }
    }

    /// The tag name, for tag tokens.
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::StartTag { name, .. }
            | TokenKind::EndTag { name, .. }
            | TokenKind::SelfClosingTag { name, .. } => Some(name),
            _ => None,
        }
    }

    /// The attributes, for tag tokens.
    pub fn attributes(&self) -> Option<&[Kv]> {
        match &self.kind {
            TokenKind::StartTag { attributes, .. }
            | TokenKind::EndTag { attributes, .. }
            | TokenKind::SelfClosingTag { attributes, .. } => Some(attributes),
            _ => None,
        }
    }

    /// The value of the first attribute with the given name, for tag
    /// tokens.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes()?
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.as_str())
    }

    /// Returns true if this token is a start, end, or self-closing tag.
    #[inline]
    pub fn is_tag(&self) -> bool {
        self.name().is_some()
    }

    /// Returns true if this token is the end-of-stream marker.
    #[inline]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self.kind, TokenKind::EndOfStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span() {
        let a = Span::new(2, 5);
        let b = Span::new(4, 9);
        assert_eq!(a.merge(b), Span::new(2, 9), "merge should enclose both");
        assert_eq!(a.len(), 3);
        assert!(Span::new(5, 5).is_empty());
        assert_eq!(&"abcdefghij"[a.into_range()], "cde");
    }

    #[test]
    fn test_span_wire_form() {
        let span = Span::new(3, 17);
        let json = serde_json::to_string(&span).unwrap();
        assert_eq!(json, "[3,17]", "tsr should serialize as a pair");
        assert_eq!(serde_json::from_str::<Span>(&json).unwrap(), span);
    }

    #[test]
    fn test_attr_lookup() {
        let token = Token::start_tag(
            "meta",
            vec![Kv::new("typeof", "x"), Kv::new("typeof", "y")],
            None,
        );
        assert_eq!(token.name(), Some("meta"));
        assert_eq!(
            token.attr("typeof"),
            Some("x"),
            "first matching attribute should win"
        );
        assert_eq!(token.attr("about"), None);
        assert!(!Token::text("a", None).is_tag());
        assert!(Token::end_of_stream().is_end_of_stream());
    }
}
