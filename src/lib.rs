//! A streaming Wikitext token-transform pipeline with round-trip page
//! bundles.
//!
//! Wikitext documents are converted into an annotated DOM (and back) while
//! preserving enough out-of-band information to reconstruct the original
//! source byte-for-byte. This crate implements the two pieces that carry
//! that fidelity guarantee:
//!
//! * The [token pipeline](pipeline): an ordered chain of
//!   [`TokenHandler`](pipeline::TokenHandler)s fed one token at a time.
//!   Handlers may buffer tokens across calls; the inclusion-boundary
//!   handler uses this to implement the transclusion visibility contract
//!   of `<onlyinclude>`, whose effect on the rest of the page is only
//!   knowable once the entire stream has been seen.
//! * The [page bundle](bundle): a serializable pairing of rendered HTML
//!   with side-tables of per-node metadata (source offsets, original
//!   Wikitext fragments, template expansion data) keyed by the `id`
//!   attributes of individual nodes, plus the logic to re-attach that
//!   metadata to a freshly parsed document.
//!
//! The tokenizer, the HTTP layer, and page storage are external
//! collaborators and not part of this crate.

pub mod bundle;
pub mod pipeline;
pub mod tokens;

/// A pipeline or bundle error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A DOM parse or serialization call failed.
    #[error("dom error: {0}")]
    Dom(#[from] minidom::Error),

    /// A token was fed to a pipeline after its end-of-stream marker.
    #[error("token fed after end of stream")]
    Finished,

    /// The bundle is missing the data-mw metadata required by its content
    /// version.
    #[error("invalid data-mw was provided")]
    InvalidMw,

    /// The bundle is missing data-parsoid metadata.
    #[error("invalid data-parsoid was provided")]
    InvalidParsoid,

    /// A JSON conversion failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A transclusion called back into itself.
    ///
    /// Loop detection intentionally skips the root page, because pages
    /// legitimately transclude templates that demonstrate their own output
    /// by transcluding the page again.
    #[error("transclusion loop detected: {0}")]
    Recursion(String),

    /// Too many nested transclusion frames.
    #[error("expansion depth limit exceeded: {0}")]
    StackOverflow(String),

    /// A content version string could not be parsed.
    #[error("invalid content version: {0}")]
    Version(#[from] semver::Error),
}

/// The standard result type used by all fallible functions in this crate.
pub type Result<T = (), E = Error> = core::result::Result<T, E>;

pub use bundle::{BundleOptions, DomPageBundle, MwMap, OffsetUnit, PageBundle, ParsoidMap};
pub use pipeline::{
    Frame, Handled, InclusionMode, OnlyInclude, PipelineOpts, TokenHandler, TokenPipeline,
    expand_include,
};
pub use tokens::{Kv, Span, Token, TokenKind, TokenMeta};
