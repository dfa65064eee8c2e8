//! Page bundles.
//!
//! A page bundle stores an HTML string with separated data-parsoid and
//! (optionally) data-mw content, indexed by the `id` attributes on
//! individual nodes. The metadata must be re-attached to a parsed document
//! before it can be used; see [`DomPageBundle`] and [`PageBundle::to_dom`].
//!
//! A bundle does not own or reference a DOM. Its node ids are a weak
//! reference into a separately obtained document, and not every node has
//! an entry: ids are sparse by design.

use crate::{Error, Result};
use indexmap::IndexMap;
use minidom::Element;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

mod dom;

pub use dom::DomPageBundle;

/// The range of content versions whose documents carry data-mw as a
/// separate metadata map rather than inline attributes.
static EXTENDED_MW_RANGE: LazyLock<VersionReq> =
    LazyLock::new(|| VersionReq::parse("^999.0.0").unwrap());

/// Returns true if `version` satisfies the extended-metadata range.
fn has_separate_data_mw(version: &str) -> Result<bool> {
    Ok(EXTENDED_MW_RANGE.matches(&Version::parse(version)?))
}

/// The unit in which metadata source offsets are expressed.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetUnit {
    /// UTF-8 byte offsets, the native unit of
    /// [`Span`](crate::tokens::Span).
    Byte,
    /// UTF-16 code unit offsets.
    Ucs2,
    /// Unicode scalar value offsets.
    Char,
}

/// A map from node id to the serialized data-parsoid record for the node
/// with that id.
///
/// Records are kept in "serialized" form, flat JSON values appropriate for
/// wire encoding, not structured metadata objects.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ParsoidMap {
    /// The last id allocated, for continuing id assignment on later
    /// passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter: Option<i64>,

    /// The unit of the source offsets inside the records.
    #[serde(default, rename = "offsetType", skip_serializing_if = "Option::is_none")]
    pub offset_type: Option<OffsetUnit>,

    /// The records, keyed by node id.
    pub ids: IndexMap<String, Value>,
}

/// A map from node id to the serialized data-mw (extension and template)
/// record for the node with that id.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct MwMap {
    /// The records, keyed by node id.
    pub ids: IndexMap<String, Value>,
}

/// Serialisation options for converting a [`DomPageBundle`] into a
/// [`PageBundle`].
///
/// The option values are defaults only: a value already present on the DOM
/// bundle always wins.
#[derive(Clone, Debug, Default)]
pub struct BundleOptions {
    /// Serialize only the contents of the `<body>` subtree.
    pub body_only: bool,
    /// Default content version.
    pub content_version: Option<String>,
    /// Default HTTP headers.
    pub headers: Option<IndexMap<String, String>>,
    /// Default content model.
    pub content_model: Option<String>,
    /// Default source offset unit.
    pub offset_type: Option<OffsetUnit>,
}

/// One labeled part of a multi-part bundle response.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResponsePart<T> {
    /// The HTTP headers of the part.
    pub headers: IndexMap<String, String>,
    /// The part body.
    pub body: T,
}

/// The multi-part response form of a page bundle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResponseData {
    /// The content model of the source document.
    pub contentmodel: String,

    /// The HTML body part.
    pub html: ResponsePart<String>,

    /// The data-parsoid metadata part.
    #[serde(rename = "data-parsoid")]
    pub data_parsoid: ResponsePart<Option<ParsoidMap>>,

    /// The data-mw metadata part. Present only for content versions that
    /// carry data-mw separately.
    #[serde(rename = "data-mw", skip_serializing_if = "Option::is_none")]
    pub data_mw: Option<ResponsePart<Option<MwMap>>>,
}

/// A rendered document and the side-tables of per-node metadata needed to
/// round-trip it back to Wikitext and to support client-side editing.
///
/// Bundles are plain data: once validated they are only read, and
/// reconciliation produces a new document rather than mutating the bundle.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PageBundle {
    /// The document, as an HTML string.
    #[serde(default)]
    pub html: String,

    /// Per-node data-parsoid metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsoid: Option<ParsoidMap>,

    /// Per-node data-mw metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mw: Option<MwMap>,

    /// The document content version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// HTTP headers to serve alongside the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<IndexMap<String, String>>,

    /// The content model of the source document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contentmodel: Option<String>,
}

impl PageBundle {
    /// Checks that this bundle carries the metadata required by
    /// `content_version`.
    ///
    /// Failure is reported as an error value for the caller to judge;
    /// validation itself never aborts anything.
    pub fn validate(&self, content_version: &str) -> Result {
        if self.parsoid.is_none() {
            return Err(Error::InvalidParsoid);
        }
        if has_separate_data_mw(content_version)? && self.mw.is_none() {
            return Err(Error::InvalidMw);
        }
        Ok(())
    }

    /// Converts this bundle into its multi-part response form.
    ///
    /// Each part carries a content-type header whose profile URL embeds
    /// the content version; the bundle's own headers are merged over the
    /// computed headers of the HTML part.
    pub fn response_data(&self) -> Result<ResponseData> {
        let version = self.version.as_deref().unwrap_or("0.0.0");

        let mut html_headers = IndexMap::new();
        html_headers.insert(
            "content-type".to_string(),
            format!(
                "text/html; charset=utf-8; \
                 profile=\"https://www.mediawiki.org/wiki/Specs/HTML/{version}\""
            ),
        );
        if let Some(headers) = &self.headers {
            html_headers.extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let data_mw = if has_separate_data_mw(version)? {
            Some(ResponsePart {
                headers: json_part_headers("data-mw", version),
                body: self.mw.clone(),
            })
        } else {
            None
        };

        Ok(ResponseData {
            contentmodel: self.contentmodel.clone().unwrap_or_default(),
            html: ResponsePart {
                headers: html_headers,
                body: self.html.clone(),
            },
            data_parsoid: ResponsePart {
                headers: json_part_headers("data-parsoid", version),
                body: self.parsoid.clone(),
            },
            data_mw,
        })
    }

    /// Encodes the metadata maps (never the HTML) as a single JSON object
    /// for embedding in the `<head>` element of a self-contained document.
    pub fn encode_for_head_element(&self) -> Result<String> {
        let parsoid = match &self.parsoid {
            Some(parsoid) => serde_json::to_value(parsoid)?,
            None => Value::Object(<_>::default()),
        };
        let mw = match &self.mw {
            Some(mw) => serde_json::to_value(mw)?,
            None => Value::Object(<_>::default()),
        };
        Ok(serde_json::json!({ "parsoid": parsoid, "mw": mw }).to_string())
    }

    /// Reconstructs a bundle from its head-element encoding.
    ///
    /// Only the metadata maps are populated; the `html` field is empty by
    /// construction of this form and callers must supply the HTML
    /// separately when round-tripping through it.
    pub fn decode_from_head_element(s: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct HeadData {
            #[serde(default)]
            parsoid: Option<Value>,
            #[serde(default)]
            mw: Option<Value>,
        }

        // An absent map encodes as `{}`, so an object without records maps
        // back to `None` rather than an empty metadata table.
        fn non_empty<T: serde::de::DeserializeOwned>(value: Option<Value>) -> Result<Option<T>> {
            match value {
                Some(Value::Object(map)) if !map.is_empty() => {
                    Ok(Some(serde_json::from_value(Value::Object(map))?))
                }
                _ => Ok(None),
            }
        }

        let decoded: HeadData = serde_json::from_str(s)?;
        Ok(Self {
            parsoid: non_empty(decoded.parsoid)?,
            mw: non_empty(decoded.mw)?,
            ..<_>::default()
        })
    }

    /// Converts a [`DomPageBundle`] to a [`PageBundle`] by serializing its
    /// document, either whole or as the inner markup of its `<body>`.
    pub fn from_dom(dpb: &DomPageBundle, options: &BundleOptions) -> Result<Self> {
        let html = if options.body_only {
            dom::serialize_body_contents(&dpb.doc)?
        } else {
            dom::serialize(&dpb.doc)?
        };

        let mut pb = Self {
            html,
            parsoid: dpb.parsoid.clone(),
            mw: dpb.mw.clone(),
            version: dpb
                .version
                .clone()
                .or_else(|| options.content_version.clone()),
            headers: dpb.headers.clone().or_else(|| options.headers.clone()),
            contentmodel: dpb
                .contentmodel
                .clone()
                .or_else(|| options.content_model.clone()),
        };
        if let Some(offset_type) = options.offset_type {
            pb.parsoid
                .get_or_insert_default()
                .offset_type
                .get_or_insert(offset_type);
        }
        Ok(pb)
    }

    /// Applies the per-node metadata of `pb` onto an already parsed
    /// document. See the precedence notes on [`PageBundle::to_dom`].
    pub fn apply(doc: &mut Element, pb: &PageBundle) {
        dom::apply(doc, pb);
    }

    /// Parses the HTML and re-attaches the per-node metadata to it.
    ///
    /// The HTML must be a well-formed XML-serialized document.
    /// `data-parsoid` is attached from the bundle for every `id`-bearing
    /// element of the body with a record; `data-mw` is attached only where
    /// no inline attribute is already present, so inline data always wins.
    pub fn to_dom(&self) -> Result<Element> {
        let mut doc: Element = self.html.parse()?;
        dom::apply(&mut doc, self);
        Ok(doc)
    }

    /// Re-serializes the document with the per-node metadata applied to
    /// its nodes.
    pub fn to_html(&self) -> Result<String> {
        dom::serialize(&self.to_dom()?)
    }

    /// Converts this bundle to "single document" form, with the metadata
    /// maps embedded in the document `<head>`.
    pub fn to_single_document_html(&self) -> Result<String> {
        DomPageBundle::from_page_bundle(self)?.to_single_document_html()
    }
}

/// Builds the content-type headers for a JSON metadata part.
fn json_part_headers(spec: &str, version: &str) -> IndexMap<String, String> {
    let mut headers = IndexMap::new();
    headers.insert(
        "content-type".to_string(),
        format!(
            "application/json; charset=utf-8; \
             profile=\"https://www.mediawiki.org/wiki/Specs/{spec}/{version}\""
        ),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_with_metadata() -> PageBundle {
        let mut parsoid = ParsoidMap::default();
        parsoid
            .ids
            .insert("mwAA".to_string(), serde_json::json!({ "tsr": [0, 4] }));
        let mut mw = MwMap::default();
        mw.ids.insert(
            "mwAB".to_string(),
            serde_json::json!({ "parts": ["x"] }),
        );
        PageBundle {
            html: "<html xmlns=\"\"><body><p id=\"mwAA\">hi</p></body></html>".to_string(),
            parsoid: Some(parsoid),
            mw: Some(mw),
            version: Some("999.1.0".to_string()),
            ..<_>::default()
        }
    }

    #[test]
    fn test_validate_requires_parsoid() {
        let bundle = PageBundle::default();
        assert!(matches!(
            bundle.validate("2.0.0"),
            Err(Error::InvalidParsoid)
        ));
        assert!(matches!(
            bundle.validate("999.1.0"),
            Err(Error::InvalidParsoid)
        ));
    }

    #[test]
    fn test_validate_mw_gated_by_version_range() {
        let bundle = PageBundle {
            parsoid: Some(ParsoidMap::default()),
            ..<_>::default()
        };
        assert!(
            bundle.validate("2.0.0").is_ok(),
            "data-mw is optional below the extended range"
        );
        assert!(matches!(bundle.validate("999.1.0"), Err(Error::InvalidMw)));
        assert!(
            matches!(bundle.validate("1000.0.0"), Ok(())),
            "the extended range is a caret range, not a floor"
        );
        assert!(matches!(
            bundle.validate("not-a-version"),
            Err(Error::Version(_))
        ));
    }

    #[test]
    fn test_response_data_parts() {
        let bundle = bundle_with_metadata();
        let response = bundle.response_data().unwrap();
        assert_eq!(
            response.html.headers["content-type"],
            "text/html; charset=utf-8; \
             profile=\"https://www.mediawiki.org/wiki/Specs/HTML/999.1.0\""
        );
        assert_eq!(
            response.data_parsoid.headers["content-type"],
            "application/json; charset=utf-8; \
             profile=\"https://www.mediawiki.org/wiki/Specs/data-parsoid/999.1.0\""
        );
        let data_mw = response.data_mw.expect("999.x carries a data-mw part");
        assert_eq!(
            data_mw.headers["content-type"],
            "application/json; charset=utf-8; \
             profile=\"https://www.mediawiki.org/wiki/Specs/data-mw/999.1.0\""
        );
        assert_eq!(data_mw.body, bundle.mw);
    }

    #[test]
    fn test_response_data_omits_mw_below_extended_range() {
        let mut bundle = bundle_with_metadata();
        bundle.version = Some("2.4.0".to_string());
        let response = bundle.response_data().unwrap();
        assert_eq!(response.data_mw, None);
        assert_eq!(response.contentmodel, "");
    }

    #[test]
    fn test_response_data_version_defaults() {
        let bundle = PageBundle {
            parsoid: Some(ParsoidMap::default()),
            ..<_>::default()
        };
        let response = bundle.response_data().unwrap();
        assert!(
            response.html.headers["content-type"].contains("/HTML/0.0.0\""),
            "a missing version defaults to 0.0.0"
        );
    }

    #[test]
    fn test_bundle_headers_merge_over_computed() {
        let mut bundle = bundle_with_metadata();
        let mut headers = IndexMap::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        headers.insert("x-extra".to_string(), "1".to_string());
        bundle.headers = Some(headers);

        let response = bundle.response_data().unwrap();
        assert_eq!(response.html.headers["content-type"], "text/plain");
        assert_eq!(response.html.headers["x-extra"], "1");
    }

    #[test]
    fn test_head_element_round_trip() {
        let bundle = bundle_with_metadata();
        let encoded = bundle.encode_for_head_element().unwrap();
        assert!(
            !encoded.contains("<body"),
            "the head form must never embed the HTML"
        );

        let decoded = PageBundle::decode_from_head_element(&encoded).unwrap();
        assert_eq!(decoded.parsoid, bundle.parsoid);
        assert_eq!(decoded.mw, bundle.mw);
        assert_eq!(decoded.html, "", "html is empty by construction");
        assert_eq!(decoded.version, None);
    }

    #[test]
    fn test_head_element_round_trip_absent_mw() {
        let mut bundle = bundle_with_metadata();
        bundle.mw = None;
        let decoded =
            PageBundle::decode_from_head_element(&bundle.encode_for_head_element().unwrap())
                .unwrap();
        assert_eq!(decoded.parsoid, bundle.parsoid);
        assert_eq!(decoded.mw, None, "an empty object decodes back to None");
    }

    #[test]
    fn test_bundle_serde_round_trip() {
        let bundle = bundle_with_metadata();
        let json = serde_json::to_string(&bundle).unwrap();
        let back: PageBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bundle);
    }

    #[test]
    fn test_offset_unit_wire_names() {
        assert_eq!(
            serde_json::to_string(&OffsetUnit::Byte).unwrap(),
            "\"byte\""
        );
        assert_eq!(
            serde_json::from_str::<OffsetUnit>("\"ucs2\"").unwrap(),
            OffsetUnit::Ucs2
        );
    }
}
