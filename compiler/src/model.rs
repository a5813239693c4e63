// model.rs — System XML loading
//
// Parses the model document and flattens it into block and line
// declarations in document order. This is the only module that knows about
// XML; everything downstream consumes `Declaration`s.
//
// Preconditions: none.
// Postconditions: every `BlockDecl` has a parsed SID, a whitespace-free name
//                 and a block type tag; every `LineDecl` carries its raw
//                 socket texts.
// Failure modes: malformed XML → `Error::Load`; missing or unparsable block
//                attributes → `MissingAttribute` / `InvalidAttribute`.
// Side effects: none.

use std::collections::BTreeMap;

use crate::diag::{Error, Result, Span};
use crate::id::Sid;

// ── Public types ────────────────────────────────────────────────────────────

/// A `<Block>` element.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockDecl {
    pub block_type: String,
    /// `Name` attribute with all whitespace removed.
    pub name: String,
    pub sid: Sid,
    /// `<P Name="...">value</P>` children, values trimmed.
    pub params: BTreeMap<String, String>,
    pub span: Span,
}

impl BlockDecl {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// A `<Line>` element.
#[derive(Debug, Clone, PartialEq)]
pub struct LineDecl {
    pub src: Option<String>,
    /// Direct `Dst` plus every `Dst` found under (possibly nested) branches.
    pub dsts: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Block(BlockDecl),
    Line(LineDecl),
}

/// A loaded model: declarations in document order.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub declarations: Vec<Declaration>,
}

impl Model {
    pub fn blocks(&self) -> impl Iterator<Item = &BlockDecl> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Block(b) => Some(b),
            Declaration::Line(_) => None,
        })
    }

    pub fn lines(&self) -> impl Iterator<Item = &LineDecl> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Line(l) => Some(l),
            Declaration::Block(_) => None,
        })
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Parse model text into declarations.
pub fn load(source: &str) -> Result<Model> {
    let doc = roxmltree::Document::parse(source).map_err(|e| Error::Load {
        message: e.to_string(),
    })?;

    let mut declarations = Vec::new();
    for elem in doc.root_element().children().filter(|n| n.is_element()) {
        match elem.tag_name().name() {
            "Block" => declarations.push(Declaration::Block(parse_block(elem)?)),
            "Line" => declarations.push(Declaration::Line(parse_line(elem))),
            _ => {}
        }
    }

    Ok(Model { declarations })
}

/// Remove every whitespace character from a display name.
pub fn strip_name(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

// ── Element parsing ─────────────────────────────────────────────────────────

fn parse_block(elem: roxmltree::Node<'_, '_>) -> Result<BlockDecl> {
    let span = Span::from(elem.range());
    let attr = |name: &'static str| {
        elem.attribute(name).ok_or(Error::MissingAttribute {
            element: "Block",
            what: "attribute",
            name,
            span: Some(span),
        })
    };

    let raw_sid = attr("SID")?;
    let sid = raw_sid.parse::<Sid>().map_err(|_| Error::InvalidAttribute {
        element: "Block",
        name: "SID".to_string(),
        value: raw_sid.to_string(),
        span: Some(span),
    })?;
    let block_type = attr("BlockType")?.to_string();
    let raw_name = attr("Name")?;
    let name = strip_name(raw_name);
    // Names end up inside C string literals and DOT labels unescaped.
    if name.contains(['"', '\\']) {
        return Err(Error::InvalidAttribute {
            element: "Block",
            name: "Name".to_string(),
            value: raw_name.to_string(),
            span: Some(span),
        });
    }

    let mut params = BTreeMap::new();
    for (key, value) in params_of(elem) {
        params.insert(key.to_string(), value.to_string());
    }

    Ok(BlockDecl {
        block_type,
        name,
        sid,
        params,
        span,
    })
}

fn parse_line(elem: roxmltree::Node<'_, '_>) -> LineDecl {
    let src = params_of(elem)
        .find(|(key, _)| *key == "Src")
        .map(|(_, value)| value.to_string());
    let mut dsts = Vec::new();
    collect_dsts(elem, &mut dsts);

    LineDecl {
        src,
        dsts,
        span: Span::from(elem.range()),
    }
}

fn collect_dsts(elem: roxmltree::Node<'_, '_>, out: &mut Vec<String>) {
    for child in elem.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "P" if child.attribute("Name") == Some("Dst") => {
                out.push(child.text().unwrap_or_default().trim().to_string());
            }
            "Branch" => collect_dsts(child, out),
            _ => {}
        }
    }
}

/// Direct `<P Name="key">value</P>` children of an element.
fn params_of<'a>(
    elem: roxmltree::Node<'a, 'a>,
) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
    elem.children()
        .filter(|n| n.is_element() && n.tag_name().name() == "P")
        .filter_map(|p| {
            let key = p.attribute("Name")?;
            Some((key, p.text().unwrap_or_default().trim()))
        })
}
