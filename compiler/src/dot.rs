// dot.rs — Graphviz DOT output for block graphs
//
// Renders every block and every bound input as a DOT digraph suitable for
// `dot` or `neato`. Inputs of stateful blocks are drawn dashed: they are the
// connections left out of scheduling.
//
// Preconditions: `graph` is a fully constructed Graph.
// Postconditions: returns a valid DOT string; output is deterministic.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::block::{Kind, Sign};
use crate::graph::Graph;

/// Emit the block graph as a Graphviz DOT string.
pub fn emit_dot(graph: &Graph, title: &str) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph {} {{", sanitize(title)).unwrap();
    writeln!(buf, "    rankdir=LR;").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];").unwrap();
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];").unwrap();
    writeln!(buf).unwrap();

    for block in graph.nodes().values() {
        writeln!(
            buf,
            "    n{} [{}];",
            block.sid,
            node_attrs(&block.name, &block.kind)
        )
        .unwrap();
    }

    writeln!(buf).unwrap();
    for block in graph.nodes().values() {
        let delayed = block.kind.is_stateful();
        for (port, producer) in graph.slots(block.sid).iter().enumerate() {
            let Some(producer) = producer else { continue };
            let mut attrs = vec![format!("headlabel=\"{}\"", port + 1)];
            if delayed {
                attrs.push("style=dashed".to_string());
            }
            writeln!(
                buf,
                "    n{} -> n{} [{}];",
                producer,
                block.sid,
                attrs.join(", ")
            )
            .unwrap();
        }
    }

    writeln!(buf, "}}").unwrap();
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    let s: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if s.is_empty() {
        "model".to_string()
    } else {
        s
    }
}

fn node_label(name: &str, kind: &Kind) -> String {
    match kind {
        Kind::Inport => format!("in: {name}"),
        Kind::Outport => format!("out: {name}"),
        Kind::Gain { factor } => format!("{name}\\n× {factor}"),
        Kind::UnitDelay { .. } => format!("{name}\\nz⁻¹"),
        Kind::Sum { signs } => {
            let ops: String = signs
                .iter()
                .map(|s| match s {
                    Sign::Plus => '+',
                    Sign::Minus => '-',
                })
                .collect();
            format!("{name}\\nΣ {ops}")
        }
    }
}

fn node_attrs(name: &str, kind: &Kind) -> String {
    let (shape, color) = match kind {
        Kind::Inport => ("cds", "lightsalmon"),
        Kind::Outport => ("cds", "lightgreen"),
        Kind::Gain { .. } => ("triangle", "lightblue"),
        Kind::UnitDelay { .. } => ("box", "khaki"),
        Kind::Sum { .. } => ("circle", "lightblue"),
    };
    let label = node_label(name, kind);
    format!("shape={shape}, style=filled, fillcolor={color}, label=\"{label}\"")
}
