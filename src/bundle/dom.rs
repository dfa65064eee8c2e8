//! DOM-side metadata reconciliation.
//!
//! The bundle names nodes by their `id` attributes; this module walks a
//! parsed document and attaches the out-of-band records as JSON-valued
//! attributes, and performs the inverse serialization of a document (or
//! its `<body>` contents) back into bundle HTML.

use super::{MwMap, PageBundle, ParsoidMap};
use crate::Result;
use indexmap::IndexMap;
use minidom::rxml::{Namespace, xml_ncname};
use minidom::{Element, Node};

/// A page bundle whose document has been parsed into a DOM.
///
/// This is the intermediate representation used while metadata is being
/// collected or re-attached; [`PageBundle::from_dom`] serializes it back
/// into transportable form.
#[derive(Clone, Debug)]
pub struct DomPageBundle {
    /// The parsed document.
    pub doc: Element,
    /// Per-node data-parsoid metadata.
    pub parsoid: Option<ParsoidMap>,
    /// Per-node data-mw metadata.
    pub mw: Option<MwMap>,
    /// The document content version.
    pub version: Option<String>,
    /// HTTP headers to serve alongside the document.
    pub headers: Option<IndexMap<String, String>>,
    /// The content model of the source document.
    pub contentmodel: Option<String>,
}

impl DomPageBundle {
    /// Creates a DOM bundle by parsing the HTML of `pb`.
    pub fn from_page_bundle(pb: &PageBundle) -> Result<Self> {
        Ok(Self {
            doc: pb.html.parse()?,
            parsoid: pb.parsoid.clone(),
            mw: pb.mw.clone(),
            version: pb.version.clone(),
            headers: pb.headers.clone(),
            contentmodel: pb.contentmodel.clone(),
        })
    }

    /// Embeds the metadata maps in the document `<head>` and serializes
    /// the result as one self-contained document.
    pub fn to_single_document_html(&self) -> Result<String> {
        let mut doc = self.doc.clone();
        let encoded = PageBundle {
            parsoid: self.parsoid.clone(),
            mw: self.mw.clone(),
            ..<_>::default()
        }
        .encode_for_head_element()?;

        let script = Element::builder("script", doc.ns())
            .attr(xml_ncname!("id").to_owned(), "mw-pagebundle")
            .attr(xml_ncname!("type").to_owned(), "application/x-mw-pagebundle")
            .append(encoded)
            .build();
        match find_element_mut(&mut doc, "head") {
            Some(head) => {
                head.append_child(script);
            }
            None => {
                log::warn!("document has no <head>; appending one");
                let ns = doc.ns();
                doc.append_child(Element::builder("head", ns).append(script).build());
            }
        }
        serialize(&doc)
    }

    /// Extracts the metadata-only page bundle embedded in the `<head>` of
    /// a single-document form. The `html` field of the result is empty;
    /// the document itself remains the source of the markup.
    ///
    /// Returns an empty bundle when the document carries no embedded
    /// metadata.
    pub fn from_single_document(doc: &Element) -> Result<PageBundle> {
        let script = find_element(doc, &|el| {
            el.name() == "script" && el.attr("id") == Some("mw-pagebundle")
        });
        match script {
            Some(script) => PageBundle::decode_from_head_element(&script.text()),
            None => Ok(PageBundle::default()),
        }
    }
}

/// Applies the bundle's per-node metadata onto `doc` as JSON-valued
/// attributes, keyed by the `id` attributes of elements in the `<body>`
/// subtree.
///
/// `data-parsoid` is always attached from the bundle. `data-mw` is only
/// attached when the element does not already carry that attribute, so
/// earlier applications (inline data above all) keep precedence. Ids with
/// no record are skipped, and the `id` attributes are left behind: they
/// are needed later to locate node boundaries.
pub(super) fn apply(doc: &mut Element, pb: &PageBundle) {
    let Some(body) = find_element_mut(doc, "body") else {
        log::warn!("document has no <body>; nothing to reconcile");
        return;
    };

    visit_elements(body, &mut |el| {
        let Some(id) = el.attr("id").map(ToOwned::to_owned) else {
            return;
        };
        if let Some(record) = pb.parsoid.as_ref().and_then(|parsoid| parsoid.ids.get(&id)) {
            el.set_attr(Namespace::NONE, xml_ncname!("data-parsoid").to_owned(), record.to_string());
        }
        if let Some(record) = pb.mw.as_ref().and_then(|mw| mw.ids.get(&id))
            && el.attr("data-mw").is_none()
        {
            el.set_attr(Namespace::NONE, xml_ncname!("data-mw").to_owned(), record.to_string());
        }
    });
}

/// Serializes an element to an XML string.
pub(super) fn serialize(el: &Element) -> Result<String> {
    let mut out = Vec::new();
    el.write_to(&mut out)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Serializes the child nodes of the document `<body>`, without the body
/// wrapper itself.
pub(super) fn serialize_body_contents(doc: &Element) -> Result<String> {
    let Some(body) = find_element(doc, &|el| el.name() == "body") else {
        log::warn!("document has no <body>; serializing nothing");
        return Ok(String::new());
    };

    let mut out = String::new();
    for node in body.nodes() {
        match node {
            Node::Element(el) => out.push_str(&serialize(el)?),
            Node::Text(text) => out.push_str(&html_escape::encode_text(text)),
        }
    }
    Ok(out)
}

/// Depth-first visitation over an element and its descendants.
fn visit_elements(el: &mut Element, f: &mut impl FnMut(&mut Element)) {
    f(el);
    for child in el.children_mut() {
        visit_elements(child, f);
    }
}

/// Finds the first element matching `pred`, depth-first, including the
/// root itself.
fn find_element<'a>(el: &'a Element, pred: &impl Fn(&Element) -> bool) -> Option<&'a Element> {
    if pred(el) {
        return Some(el);
    }
    el.children().find_map(|child| find_element(child, pred))
}

/// Finds the first element with the given name, depth-first, including the
/// root itself.
fn find_element_mut<'a>(el: &'a mut Element, name: &str) -> Option<&'a mut Element> {
    if el.name() == name {
        return Some(el);
    }
    for child in el.children_mut() {
        if let Some(found) = find_element_mut(child, name) {
            return Some(found);
        }
    }
    None
}
