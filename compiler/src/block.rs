// block.rs — Block model
//
// One diagram element: identity, variable name and a closed set of kinds.
// Kind-specific parameters are parsed here from the declaration's `<P>`
// children; input arity is fixed by the kind.
//
// Preconditions: `name` is already whitespace-free.
// Postconditions: returned blocks are immutable; wiring lives in the graph's
//                 slot table, never in the block.
// Failure modes: unknown block type → `UnknownBlockKind`; bad sum sign
//                string → `InvalidOperator`; unparsable scalar parameter →
//                `InvalidAttribute`.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::diag::{Error, Result, Span};
use crate::id::Sid;
use crate::model::BlockDecl;

// ── Public types ────────────────────────────────────────────────────────────

/// Sign applied to one `Sum` input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Sign {
    Plus,
    Minus,
}

impl Sign {
    fn from_char(c: char) -> Option<Sign> {
        match c {
            '+' => Some(Sign::Plus),
            '-' => Some(Sign::Minus),
            _ => None,
        }
    }
}

/// The kind of a block, with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Kind {
    Inport,
    Outport,
    Gain { factor: f64 },
    /// Sample time is carried through but never interpreted (−1 = inherited).
    UnitDelay { sample_time: f64 },
    Sum { signs: [Sign; 2] },
}

impl Kind {
    /// Fixed number of input slots.
    pub fn arity(&self) -> usize {
        match self {
            Kind::Inport => 0,
            Kind::Outport | Kind::Gain { .. } | Kind::UnitDelay { .. } => 1,
            Kind::Sum { .. } => 2,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Kind::Inport => "Inport",
            Kind::Outport => "Outport",
            Kind::Gain { .. } => "Gain",
            Kind::UnitDelay { .. } => "UnitDelay",
            Kind::Sum { .. } => "Sum",
        }
    }

    /// Output of the previous step rather than the current one.
    pub fn is_stateful(&self) -> bool {
        matches!(self, Kind::UnitDelay { .. })
    }

    pub fn is_source(&self) -> bool {
        matches!(self, Kind::Inport)
    }

    /// Sinks own no storage; they expose their producer's field.
    pub fn is_sink(&self) -> bool {
        matches!(self, Kind::Outport)
    }
}

/// A diagram element.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    pub sid: Sid,
    /// Generated variable name; unique within a graph.
    pub name: String,
    pub kind: Kind,
    #[serde(skip)]
    pub span: Span,
}

impl Block {
    pub fn new(sid: Sid, name: impl Into<String>, kind: Kind) -> Self {
        Block {
            sid,
            name: name.into(),
            kind,
            span: Span::default(),
        }
    }

    pub fn arity(&self) -> usize {
        self.kind.arity()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' (SID {})", self.kind.tag(), self.name, self.sid)
    }
}

// ── Construction ────────────────────────────────────────────────────────────

pub const DEFAULT_GAIN: f64 = 1.0;
pub const DEFAULT_SAMPLE_TIME: f64 = -1.0;
pub const DEFAULT_SUM_INPUTS: &str = "++";

/// Build a block from its type tag and parameter lookup.
pub fn create_block<'p>(
    kind_tag: &str,
    name: &str,
    sid: Sid,
    param: impl Fn(&str) -> Option<&'p str>,
) -> Result<Block> {
    let kind = match kind_tag {
        "Inport" => Kind::Inport,
        "Outport" => Kind::Outport,
        "Gain" => Kind::Gain {
            factor: scalar_param(param("Gain"), "Gain", DEFAULT_GAIN)?,
        },
        "UnitDelay" => Kind::UnitDelay {
            sample_time: scalar_param(param("SampleTime"), "SampleTime", DEFAULT_SAMPLE_TIME)?,
        },
        "Sum" => Kind::Sum {
            signs: parse_signs(param("Inputs").unwrap_or(DEFAULT_SUM_INPUTS), name)?,
        },
        other => {
            return Err(Error::UnknownBlockKind {
                kind: other.to_string(),
                name: name.to_string(),
                sid,
                span: None,
            })
        }
    };
    Ok(Block::new(sid, name, kind))
}

/// Build a block from a loaded `<Block>` declaration.
pub fn from_decl(decl: &BlockDecl) -> Result<Block> {
    let mut block = create_block(&decl.block_type, &decl.name, decl.sid, |key| decl.param(key))
        .map_err(|e| e.with_span(decl.span))?;
    block.span = decl.span;
    Ok(block)
}

/// Decode a `Sum` operator string, one sign per input, positionally.
pub fn parse_signs(ops: &str, name: &str) -> Result<[Sign; 2]> {
    let invalid = |reason: String| Error::InvalidOperator {
        ops: ops.to_string(),
        name: name.to_string(),
        reason,
        span: None,
    };

    let mut signs = Vec::with_capacity(2);
    for c in ops.chars() {
        let sign = Sign::from_char(c)
            .ok_or_else(|| invalid(format!("unsupported operator '{c}'")))?;
        signs.push(sign);
    }

    match signs.as_slice() {
        [first, second] => Ok([*first, *second]),
        _ => Err(invalid(format!("expected 2 signs, found {}", signs.len()))),
    }
}

/// Finite `f64` only: `inf` and `NaN` have no C literal.
fn scalar_param(raw: Option<&str>, key: &str, default: f64) -> Result<f64> {
    let Some(text) = raw else {
        return Ok(default);
    };
    text.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| Error::InvalidAttribute {
            element: "Block",
            name: key.to_string(),
            value: text.to_string(),
            span: None,
        })
}
