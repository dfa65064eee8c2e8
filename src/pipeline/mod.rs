//! The token-transform pipeline.
//!
//! A pipeline owns an ordered chain of [`TokenHandler`]s. Tokens from the
//! upstream source are fed into the first handler one at a time; each
//! handler's output tokens are fed, in emission order, into the next
//! handler, and the concatenated output of the last handler is the
//! pipeline's result. Handler order is semantically significant: later
//! handlers see only what earlier handlers emit.
//!
//! Two processing modes share one pipeline type. The streaming interface
//! ([`TokenPipeline::process`] + [`TokenPipeline::end`]) lets a caller
//! drain output as it is produced, which is how a top-level document is
//! driven. Nested expansions instead use [`TokenPipeline::run`] to drive a
//! whole token stream frame-synchronously, because a transclusion result
//! must be complete before it can be spliced into the parent stream.
//!
//! Handlers never share state. The only configuration a handler receives
//! is the [`PipelineOpts`] value and the [`Frame`] of the expansion it is
//! part of, both fixed at construction; everything else travels through
//! the token stream itself.

use crate::{
    Error, Result,
    tokens::{Kv, Span, Token},
};
use std::rc::Rc;

mod include;

pub use include::{InclusionMode, OnlyInclude};

/// The maximum depth of nested transclusion frames.
///
/// MediaWiki documentation says this is the stack limit.
const MAX_EXPANSION_DEPTH: usize = 40;

/// Pipeline-scoped configuration shared by every handler in a chain.
#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineOpts {
    /// True if this pipeline is expanding a transclusion target rather
    /// than rendering a top-level page.
    ///
    /// Handlers must consult this flag, never ambient state, to decide
    /// whether they are reprocessing content that is only visible when
    /// transcluded.
    pub is_include: bool,

    /// True if the tokens being processed are themselves the output of a
    /// template expansion. Verbatim source captures are unreliable in that
    /// case and are not recorded.
    pub in_template: bool,
}

/// A transclusion expansion stack frame.
///
/// A frame names the page being expanded, holds its source text for
/// verbatim extraction, and links to the frame that triggered the
/// expansion so that loops and runaway nesting can be detected.
#[derive(Debug)]
pub struct Frame {
    /// The title of the page or template expanded by this frame.
    pub title: String,

    /// The source text of the frame.
    pub source: String,

    /// The parent frame.
    parent: Option<Rc<Frame>>,

    /// The number of ancestor frames.
    depth: usize,
}

impl Frame {
    /// Creates a root frame for a top-level document.
    pub fn root(title: impl Into<String>, source: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            title: title.into(),
            source: source.into(),
            parent: None,
            depth: 0,
        })
    }

    /// Creates a child frame for a nested expansion, checking the ancestry
    /// for loops and the depth limit.
    pub fn chain(
        self: &Rc<Self>,
        title: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Rc<Self>> {
        let title = title.into();
        check_recursion(self, &title)?;

        Ok(Rc::new(Self {
            title,
            source: source.into(),
            parent: Some(Rc::clone(self)),
            depth: self.depth + 1,
        }))
    }

    /// The verbatim source text for `span`, if it lies inside this frame's
    /// source on character boundaries.
    pub fn wt_source(&self, span: Span) -> Option<&str> {
        self.source.get(span.into_range())
    }

    /// The parent frame.
    pub fn parent(&self) -> Option<&Rc<Frame>> {
        self.parent.as_ref()
    }

    /// The expansion depth of this frame. The root frame is at depth 0.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Checks whether expanding `title` under `sp` would loop or exceed the
/// frame depth limit.
fn check_recursion(sp: &Rc<Frame>, title: &str) -> Result {
    if sp.depth + 1 > MAX_EXPANSION_DEPTH {
        debug_backtrace(title, sp);
        return Err(Error::StackOverflow(title.to_string()));
    }

    let mut frame = sp;
    loop {
        // Only non-root frames participate in loop checking, so it is OK
        // to loop back to the root frame, which happens with e.g.
        // Template:Issubst -> Template:Issubst/doc -> Template:Issubst
        if frame.parent.is_some() && frame.title == *title {
            debug_backtrace(title, sp);
            return Err(Error::Recursion(title.to_string()));
        }
        match &frame.parent {
            Some(parent) => frame = parent,
            None => break,
        }
    }
    Ok(())
}

/// Emits an expansion backtrace to the error log.
fn debug_backtrace(title: &str, mut sp: &Rc<Frame>) {
    let mut index = 0;
    log::error!("{index:>2}. {title}");
    loop {
        index += 1;
        log::error!("{index:>2}. {}", sp.title);
        match &sp.parent {
            Some(parent) => sp = parent,
            None => break,
        }
    }
}

/// The outcome of offering one token to a handler.
#[derive(Debug)]
pub enum Handled {
    /// The handler does not transform this token; it passes through to the
    /// next handler unchanged.
    Pass(Token),
    /// The handler replaced the token with zero or more tokens. An empty
    /// replacement swallows the token (usually into a handler buffer).
    Emit(Vec<Token>),
}

/// A single pluggable stage of a token pipeline.
///
/// A handler instance is scoped to exactly one pipeline run: it is
/// constructed when the pipeline for a document (or an included
/// sub-document) is built, and is dropped with the pipeline once the
/// end-of-stream marker has passed through. Handlers may mutate their own
/// state on every call but must never observe another handler's state.
pub trait TokenHandler {
    /// Offers one token to the handler.
    fn on_token(&mut self, token: Token) -> Result<Handled>;

    /// Offers the end-of-stream marker to the handler.
    ///
    /// An implementation that buffers tokens must flush or discard its
    /// buffer here, and must place `eof` after any flushed tokens; nothing
    /// may follow it.
    fn on_end_of_stream(&mut self, eof: Token) -> Result<Handled> {
        Ok(Handled::Pass(eof))
    }
}

/// An ordered chain of token handlers fed from a single token source.
pub struct TokenPipeline {
    /// Set once the end-of-stream marker has been dispatched.
    finished: bool,

    /// The frame this pipeline is expanding.
    frame: Rc<Frame>,

    /// The handler chain.
    handlers: Vec<Box<dyn TokenHandler>>,

    /// The pipeline configuration.
    opts: PipelineOpts,
}

impl TokenPipeline {
    /// Creates a pipeline for `frame` with the default handler chain.
    pub fn new(frame: Rc<Frame>, opts: PipelineOpts) -> Self {
        let handlers: Vec<Box<dyn TokenHandler>> =
            vec![Box::new(OnlyInclude::new(Rc::clone(&frame), opts))];
        Self {
            finished: false,
            frame,
            handlers,
            opts,
        }
    }

    /// Creates a pipeline for `frame` with no handlers installed.
    pub fn bare(frame: Rc<Frame>, opts: PipelineOpts) -> Self {
        Self {
            finished: false,
            frame,
            handlers: vec![],
            opts,
        }
    }

    /// Appends a handler to the end of the chain.
    pub fn with_handler(mut self, handler: Box<dyn TokenHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// The frame this pipeline is expanding.
    pub fn frame(&self) -> &Rc<Frame> {
        &self.frame
    }

    /// True if this pipeline is expanding a transclusion target.
    pub fn is_include(&self) -> bool {
        self.opts.is_include
    }

    /// Feeds one token through the handler chain, returning the tokens
    /// that reached the end of the chain.
    ///
    /// An end-of-stream token is forwarded to [`end`](Self::end); any
    /// other token after that is an error.
    pub fn process(&mut self, token: Token) -> Result<Vec<Token>> {
        if token.is_end_of_stream() {
            return self.end();
        }
        if self.finished {
            return Err(Error::Finished);
        }
        self.dispatch(vec![token])
    }

    /// Dispatches the end-of-stream marker through the chain and seals the
    /// pipeline.
    ///
    /// Every handler sees the marker exactly once, in chain order; tokens
    /// flushed by one handler in response travel ahead of the marker into
    /// the next handler.
    pub fn end(&mut self) -> Result<Vec<Token>> {
        if self.finished {
            return Err(Error::Finished);
        }
        self.finished = true;
        let out = self.dispatch(vec![Token::end_of_stream()])?;
        debug_assert!(
            out.last().is_some_and(Token::is_end_of_stream),
            "a handler emitted tokens after the end-of-stream marker"
        );
        Ok(out)
    }

    /// Runs the whole pipeline over `tokens` frame-synchronously,
    /// returning the final token sequence.
    ///
    /// The source may or may not contain its own trailing end-of-stream
    /// token; exactly one is dispatched either way.
    pub fn run(&mut self, tokens: impl IntoIterator<Item = Token>) -> Result<Vec<Token>> {
        let mut out = vec![];
        for token in tokens {
            out.extend(self.process(token)?);
        }
        if !self.finished {
            out.extend(self.end()?);
        }
        Ok(out)
    }

    /// Feeds `tokens` into the chain, collecting the output of the final
    /// handler.
    fn dispatch(&mut self, tokens: Vec<Token>) -> Result<Vec<Token>> {
        let mut current = tokens;
        for handler in &mut self.handlers {
            let mut next = Vec::with_capacity(current.len());
            for token in current {
                let handled = if token.is_end_of_stream() {
                    handler.on_end_of_stream(token)?
                } else {
                    handler.on_token(token)?
                };
                match handled {
                    Handled::Pass(token) => next.push(token),
                    Handled::Emit(tokens) => next.extend(tokens),
                }
            }
            current = next;
        }
        Ok(current)
    }
}

/// Expands a transcluded page by running a nested include-mode pipeline
/// over its tokens, returning the tokens to splice into the parent stream.
///
/// Failures are contained to the nested pipeline: a transclusion loop, an
/// exceeded depth limit, or a handler error is logged and replaced by a
/// designated error-marker token standing in for the failed expansion. The
/// parent pipeline continues either way.
pub fn expand_include(
    parent: &Rc<Frame>,
    title: &str,
    source: &str,
    tokens: Vec<Token>,
) -> Vec<Token> {
    let frame = match parent.chain(title, source) {
        Ok(frame) => frame,
        Err(err) => return vec![error_marker(title, &err)],
    };

    let opts = PipelineOpts {
        is_include: true,
        in_template: true,
    };
    let mut pipeline = TokenPipeline::new(frame, opts);
    match pipeline.run(tokens) {
        Ok(mut out) => {
            // The nested end-of-stream marker must not leak into the
            // parent stream.
            let _ = out.pop_if(|token| token.is_end_of_stream());
            out
        }
        Err(err) => {
            log::error!("expansion of '{title}' failed: {err}");
            vec![error_marker(title, &err)]
        }
    }
}

/// Builds the substitute token standing in for a failed expansion.
fn error_marker(title: &str, err: &Error) -> Token {
    let key = match err {
        Error::Recursion(_) => "mw-expansion-loop",
        Error::StackOverflow(_) => "mw-expansion-depth-exceeded",
        _ => "mw-expansion-failed",
    };
    let errors = serde_json::json!({
        "errors": [{
            "key": key,
            "message": err.to_string(),
            "name": title,
        }],
    });
    Token::self_closing_tag(
        "meta",
        vec![
            Kv::new("typeof", "mw:Error"),
            Kv::new("data-mw", errors.to_string()),
        ],
        None,
    )
}
