//! The inclusion-boundary handler.
//!
//! Whether content outside an `<onlyinclude>` block survives a
//! transclusion is a property of the whole page, knowable only once the
//! final token has been seen: an end-of-stream marker may retroactively
//! invalidate everything observed so far. The handler therefore buffers in
//! include mode and decides at end-of-stream whether the buffer is
//! replayed or discarded, instead of requiring a second pass over the
//! page.

use super::{Frame, Handled, PipelineOpts, TokenHandler};
use crate::{
    Result,
    tokens::{Kv, Token, TokenKind},
};
use std::rc::Rc;

/// An inclusion control tag mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InclusionMode {
    /// Display contents only when transcluded.
    IncludeOnly,
    /// Display contents only when not transcluded.
    NoInclude,
    /// Display contents only when transcluded, and treat all other content
    /// on the page as if it were wrapped by a `<noinclude>`.
    OnlyInclude,
}

impl InclusionMode {
    /// Maps an inclusion control tag name to its mode.
    pub fn from_tag_name(name: &str) -> Option<Self> {
        match name {
            "includeonly" => Some(Self::IncludeOnly),
            "noinclude" => Some(Self::NoInclude),
            "onlyinclude" => Some(Self::OnlyInclude),
            _ => None,
        }
    }

    /// The `typeof` value carried by the round-trip marker that stands in
    /// for a tag of this mode. End tags append `/End`.
    pub fn type_of(self) -> &'static str {
        match self {
            Self::IncludeOnly => "mw:Includes/IncludeOnly",
            Self::NoInclude => "mw:Includes/NoInclude",
            Self::OnlyInclude => "mw:Includes/OnlyInclude",
        }
    }
}

/// Which side of an `<onlyinclude>` boundary the stream is currently on.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
enum Region {
    /// Before the first boundary, or between blocks.
    #[default]
    Outside,
    /// Strictly between a matched opening and closing boundary.
    Inside,
}

/// The `<onlyinclude>` boundary handler.
///
/// In non-include mode nothing is buffered: every `onlyinclude` tag is
/// replaced 1:1 by a zero-width marker carrying the original source range
/// so the reverse transform can restore the literal tag, and all other
/// tokens pass through untouched.
///
/// In include mode every token is buffered except while inside an
/// `onlyinclude` block, whose contents pass straight through as the kept
/// content. At end-of-stream the buffer is flushed only if no block was
/// ever seen: absence of any `onlyinclude` means the whole page is the
/// transcluded content.
pub struct OnlyInclude {
    /// Tokens buffered while outside an `onlyinclude` block. Only
    /// meaningful in include mode; flushed or discarded atomically at
    /// end-of-stream.
    accum: Vec<Token>,

    /// True once any `onlyinclude` boundary has been seen in this run.
    found_only_include: bool,

    /// The frame this handler's pipeline is expanding.
    frame: Rc<Frame>,

    /// The pipeline configuration.
    opts: PipelineOpts,

    /// The current boundary state.
    region: Region,
}

impl OnlyInclude {
    /// Creates the handler for one pipeline run.
    pub fn new(frame: Rc<Frame>, opts: PipelineOpts) -> Self {
        Self {
            accum: vec![],
            found_only_include: false,
            frame,
            opts,
            region: Region::Outside,
        }
    }

    /// Builds the zero-width marker token that stands in for an inclusion
    /// control tag in the output stream.
    fn build_marker(&self, mode: InclusionMode, token: &Token) -> Token {
        let is_end = matches!(token.kind, TokenKind::EndTag { .. });
        let mut type_of = mode.type_of().to_string();
        if is_end {
            type_of += "/End";
        }

        let mut marker =
            Token::self_closing_tag("meta", vec![Kv::new("typeof", type_of)], token.meta.tsr);
        if !self.opts.in_template {
            marker.meta.src = token
                .meta
                .tsr
                .and_then(|tsr| self.frame.wt_source(tsr))
                .map(ToOwned::to_owned);
        }
        marker
    }

    /// Handles an `onlyinclude` boundary tag in include mode.
    fn on_boundary(&mut self, token: &Token) -> Handled {
        match self.region {
            Region::Outside => {
                self.found_only_include = true;
                self.region = Region::Inside;
                // Content accumulated ahead of the block is defined to be
                // excluded from the transclusion now that a block exists.
                if !self.accum.is_empty() {
                    log::trace!(
                        "'{}': discarding {} tokens ahead of <onlyinclude>",
                        self.frame.title,
                        self.accum.len()
                    );
                    self.accum.clear();
                }
            }
            Region::Inside => {
                // Nesting is not supported: a second opening boundary while
                // inside a block closes it.
                if !matches!(token.kind, TokenKind::EndTag { .. }) {
                    log::warn!(
                        "'{}': nested <onlyinclude> treated as a closing boundary",
                        self.frame.title
                    );
                }
                self.region = Region::Outside;
            }
        }
        Handled::Emit(vec![self.build_marker(InclusionMode::OnlyInclude, token)])
    }

    /// Handles a non-boundary token in include mode.
    fn on_any_include(&mut self, token: Token) -> Handled {
        match self.region {
            // Inside the block is the kept content.
            Region::Inside => Handled::Pass(token),
            Region::Outside => {
                self.accum.push(token);
                Handled::Emit(vec![])
            }
        }
    }
}

impl TokenHandler for OnlyInclude {
    fn on_token(&mut self, token: Token) -> Result<Handled> {
        let is_boundary = token.is_tag() && token.name() == Some("onlyinclude");
        Ok(if self.opts.is_include {
            if is_boundary {
                self.on_boundary(&token)
            } else {
                self.on_any_include(token)
            }
        } else if is_boundary {
            Handled::Emit(vec![self.build_marker(InclusionMode::OnlyInclude, &token)])
        } else {
            Handled::Pass(token)
        })
    }

    fn on_end_of_stream(&mut self, eof: Token) -> Result<Handled> {
        if !self.opts.is_include {
            return Ok(Handled::Pass(eof));
        }

        self.region = Region::Outside;
        Ok(if !self.accum.is_empty() && !self.found_only_include {
            // No block anywhere on the page, so the whole page is the
            // transcluded content.
            let mut res = core::mem::take(&mut self.accum);
            res.push(eof);
            Handled::Emit(res)
        } else {
            self.found_only_include = false;
            self.accum.clear();
            Handled::Pass(eof)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::TokenPipeline,
        tokens::{Span, TokenMeta},
    };

    /// Tokenizes `source` just far enough for these tests: `<onlyinclude>`
    /// and `</onlyinclude>` become tags, everything between them text, all
    /// with faithful source ranges.
    fn tokenize(source: &str) -> Vec<Token> {
        const OPEN: &str = "<onlyinclude>";
        const CLOSE: &str = "</onlyinclude>";

        let mut tokens = vec![];
        let mut pos = 0;
        while pos < source.len() {
            let rest = &source[pos..];
            if rest.starts_with(OPEN) {
                let tsr = Span::new(pos, pos + OPEN.len());
                tokens.push(Token::start_tag("onlyinclude", vec![], Some(tsr)));
                pos += OPEN.len();
            } else if rest.starts_with(CLOSE) {
                let tsr = Span::new(pos, pos + CLOSE.len());
                tokens.push(Token::end_tag("onlyinclude", vec![], Some(tsr)));
                pos += CLOSE.len();
            } else {
                let end = rest.find('<').map_or(source.len(), |at| pos + at.max(1));
                tokens.push(Token::text(&source[pos..end], Some(Span::new(pos, end))));
                pos = end;
            }
        }
        tokens
    }

    fn pipeline(source: &str, is_include: bool) -> TokenPipeline {
        let frame = Frame::root("Template:Example", source);
        TokenPipeline::new(
            frame,
            PipelineOpts {
                is_include,
                in_template: false,
            },
        )
    }

    fn kept_text(tokens: &[Token]) -> String {
        tokens
            .iter()
            .filter_map(|token| match &token.kind {
                TokenKind::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_toggle_keeps_block_contents_only() {
        let _ = env_logger::try_init();
        let source = "x<onlyinclude>A</onlyinclude>B<onlyinclude>C</onlyinclude>";
        let mut pipeline = pipeline(source, true);
        let out = pipeline.run(tokenize(source)).unwrap();

        assert_eq!(kept_text(&out), "AC", "only block contents should be kept");
        let markers = out
            .iter()
            .filter_map(|token| token.attr("typeof"))
            .collect::<Vec<_>>();
        assert_eq!(
            markers,
            [
                "mw:Includes/OnlyInclude",
                "mw:Includes/OnlyInclude/End",
                "mw:Includes/OnlyInclude",
                "mw:Includes/OnlyInclude/End",
            ],
        );
        assert!(out.last().unwrap().is_end_of_stream());
    }

    #[test]
    fn test_no_onlyinclude_flushes_whole_page() {
        let source = "plain page content";
        let mut pipeline = pipeline(source, true);
        let tokens = tokenize(source);
        let expected = tokens.clone();

        let mut out = pipeline.run(tokens).unwrap();
        assert!(out.pop().unwrap().is_end_of_stream());
        assert_eq!(
            out, expected,
            "the whole buffer should flush unmodified, in order"
        );
    }

    #[test]
    fn test_nothing_kept_when_block_found() {
        let _ = env_logger::try_init();
        let source = "before<onlyinclude></onlyinclude>after";
        let mut pipeline = pipeline(source, true);
        let out = pipeline.run(tokenize(source)).unwrap();
        assert_eq!(
            kept_text(&out),
            "",
            "content outside an empty block should be discarded"
        );
    }

    #[test]
    fn test_non_include_passthrough() {
        let source = "a<onlyinclude>b</onlyinclude>c";
        let mut pipeline = pipeline(source, false);
        let out = pipeline.run(tokenize(source)).unwrap();

        // Every onlyinclude tag is replaced 1:1; everything else streams
        // through untouched, in order.
        assert_eq!(kept_text(&out), "abc");
        let markers = out
            .iter()
            .filter(|token| token.attr("typeof").is_some())
            .collect::<Vec<_>>();
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].meta.tsr, Some(Span::new(1, 14)));
        assert_eq!(markers[0].meta.src.as_deref(), Some("<onlyinclude>"));
        assert_eq!(markers[1].meta.tsr, Some(Span::new(15, 29)));
        assert_eq!(markers[1].meta.src.as_deref(), Some("</onlyinclude>"));
    }

    #[test]
    fn test_marker_round_trip() {
        // Re-serializing from the captured ranges and verbatim text must
        // reproduce the original source byte-for-byte.
        let source = "a<onlyinclude>b</onlyinclude>c";
        let mut pipeline = pipeline(source, false);
        let out = pipeline.run(tokenize(source)).unwrap();

        let mut rebuilt = String::new();
        for token in &out {
            match &token.kind {
                TokenKind::Text { text } => rebuilt += text,
                TokenKind::SelfClosingTag { .. } => {
                    rebuilt += token.meta.src.as_deref().unwrap();
                }
                TokenKind::EndOfStream => {}
                kind => panic!("unexpected token {kind:?}"),
            }
        }
        assert_eq!(rebuilt, source);
    }

    #[test]
    fn test_no_source_capture_inside_templates() {
        let source = "<onlyinclude>a</onlyinclude>";
        let frame = Frame::root("Template:Example", source);
        let mut pipeline = TokenPipeline::new(
            frame,
            PipelineOpts {
                is_include: false,
                in_template: true,
            },
        );
        let out = pipeline.run(tokenize(source)).unwrap();
        let marker = out.iter().find(|token| token.is_tag()).unwrap();
        assert_eq!(marker.meta.src, None);
        assert!(marker.meta.tsr.is_some(), "the range is still recorded");
    }

    #[test]
    fn test_nested_open_toggles_closed() {
        let _ = env_logger::try_init();
        // A second opening boundary inside a block acts as the closing
        // boundary; "b" ends up outside and is discarded at end-of-stream.
        let mut tokens = vec![
            Token::start_tag("onlyinclude", vec![], None),
            Token::text("a", None),
            Token::start_tag("onlyinclude", vec![], None),
            Token::text("b", None),
        ];
        tokens.push(Token::end_of_stream());

        let mut pipeline = pipeline("", true);
        let out = pipeline.run(tokens).unwrap();
        assert_eq!(kept_text(&out), "a");
        assert_eq!(
            out.iter()
                .filter_map(|token| token.attr("typeof"))
                .collect::<Vec<_>>(),
            ["mw:Includes/OnlyInclude", "mw:Includes/OnlyInclude"],
            "both boundaries were openers, so neither marker is an end"
        );
    }

    #[test]
    fn test_synthesized_marker_has_no_range() {
        let mut pipeline = pipeline("", true);
        let out = pipeline
            .run([
                Token::start_tag("onlyinclude", vec![], None),
                Token::text("a", None),
            ])
            .unwrap();
        let marker = out.iter().find(|token| token.is_tag()).unwrap();
        assert_eq!(
            marker.meta,
            TokenMeta::default(),
            "a marker for a synthesized tag carries no range"
        );
    }

    #[test]
    fn test_inclusion_mode_names() {
        assert_eq!(
            InclusionMode::from_tag_name("includeonly"),
            Some(InclusionMode::IncludeOnly)
        );
        assert_eq!(
            InclusionMode::from_tag_name("noinclude").map(InclusionMode::type_of),
            Some("mw:Includes/NoInclude")
        );
        assert_eq!(InclusionMode::from_tag_name("nowiki"), None);
    }
}
