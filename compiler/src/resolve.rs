// resolve.rs — Wiring resolution
//
// Turns `<Line>` declarations into wires (one source socket, one or more
// destination sockets) and binds each destination slot to the source block.
// Edges into stateful blocks are not recorded: that exclusion is what keeps
// the scheduling graph acyclic across delay-broken feedback loops.
//
// Preconditions: every block of the model is already in the graph.
// Postconditions: each destination slot names its producer; the graph's
//                 edge set contains one connection per non-stateful target.
// Failure modes: malformed socket text → `InvalidSocketFormat`; undeclared
//                SID → `UnknownReference`; slot past the block's arity →
//                `InvalidPort`; slot already driven → `SlotAlreadyBound`;
//                line without destinations → `UnconnectedLine`.
// Side effects: mutates the graph's slot table and edge set.

use std::fmt;

use serde::Serialize;

use crate::diag::{Error, Result, Span};
use crate::graph::Graph;
use crate::id::Sid;
use crate::model::LineDecl;

// ── Public types ────────────────────────────────────────────────────────────

/// A connection point: block and 0-based port index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Socket {
    pub sid: Sid,
    pub port: usize,
}

impl fmt::Display for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sid, self.port)
    }
}

/// One resolved source → destination pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Connection {
    pub from: Socket,
    pub to: Socket,
}

/// A parsed `<Line>`: one source feeding one or more destinations.
#[derive(Debug, Clone, PartialEq)]
pub struct Wire {
    pub from: Socket,
    pub to: Vec<Socket>,
    pub span: Span,
}

impl Wire {
    pub fn from_line(line: &LineDecl) -> Result<Wire> {
        let src = line.src.as_deref().ok_or(Error::InvalidSocketFormat {
            text: String::new(),
            reason: "line has no Src",
            span: Some(line.span),
        })?;
        let from = parse_socket(src).map_err(|e| e.with_span(line.span))?;

        if line.dsts.is_empty() {
            return Err(Error::UnconnectedLine {
                source_text: src.to_string(),
                span: Some(line.span),
            });
        }
        let to = line
            .dsts
            .iter()
            .map(|d| parse_socket(d).map_err(|e| e.with_span(line.span)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Wire {
            from,
            to,
            span: line.span,
        })
    }
}

// ── Socket text ─────────────────────────────────────────────────────────────

/// Parse `<SID>#<...>:<port>` where `port` is 1-based.
pub fn parse_socket(text: &str) -> Result<Socket> {
    let invalid = |reason: &'static str| Error::InvalidSocketFormat {
        text: text.to_string(),
        reason,
        span: None,
    };

    let (id, rest) = text.split_once('#').ok_or_else(|| invalid("missing '#'"))?;
    let (_, port) = rest.rsplit_once(':').ok_or_else(|| invalid("missing ':'"))?;

    let sid = id.parse::<Sid>().map_err(|_| invalid("invalid block id"))?;
    let port = port
        .trim()
        .parse::<usize>()
        .map_err(|_| invalid("invalid port number"))?;
    if port == 0 {
        return Err(invalid("port numbers start at 1"));
    }

    Ok(Socket {
        sid,
        port: port - 1,
    })
}

// ── Binding ─────────────────────────────────────────────────────────────────

/// Bind every destination of `wire` to its source block.
pub fn resolve_wire(graph: &mut Graph, wire: &Wire) -> Result<()> {
    if graph.block(wire.from.sid).is_none() {
        return Err(Error::UnknownReference {
            sid: wire.from.sid,
            span: Some(wire.span),
        });
    }

    for &to in &wire.to {
        let stateful = match graph.block(to.sid) {
            Some(block) => block.kind.is_stateful(),
            None => {
                return Err(Error::UnknownReference {
                    sid: to.sid,
                    span: Some(wire.span),
                })
            }
        };

        graph
            .bind_slot(to, wire.from.sid)
            .map_err(|e| e.with_span(wire.span))?;

        if stateful {
            tracing::trace!(from = %wire.from, to = %to, "edge into delay left out of schedule");
        } else {
            graph.add_connection(Connection {
                from: wire.from,
                to,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, Kind, Sign};

    fn socket(sid: u64, port: usize) -> Socket {
        Socket {
            sid: Sid(sid),
            port,
        }
    }

    #[test]
    fn parses_socket_and_converts_port_to_zero_based() {
        assert_eq!(parse_socket("12#3:4").unwrap(), socket(12, 3));
        assert_eq!(parse_socket("7#out:1").unwrap(), socket(7, 0));
    }

    #[test]
    fn port_follows_last_colon() {
        assert_eq!(parse_socket("5#in:a:2").unwrap(), socket(5, 1));
    }

    #[test]
    fn socket_without_hash_is_rejected() {
        let err = parse_socket("12:4").unwrap_err();
        assert!(
            matches!(err, Error::InvalidSocketFormat { reason: "missing '#'", .. }),
            "got {err:?}"
        );
    }

    #[test]
    fn socket_without_colon_is_rejected() {
        let err = parse_socket("12#in4").unwrap_err();
        assert!(
            matches!(err, Error::InvalidSocketFormat { reason: "missing ':'", .. }),
            "got {err:?}"
        );
    }

    #[test]
    fn colon_before_hash_does_not_count() {
        assert!(matches!(
            parse_socket("1:2#in"),
            Err(Error::InvalidSocketFormat { .. })
        ));
    }

    #[test]
    fn non_numeric_parts_and_port_zero_are_rejected() {
        for text in ["x#in:1", "1#in:y", "1#in:0", "#in:1"] {
            assert!(
                matches!(parse_socket(text), Err(Error::InvalidSocketFormat { .. })),
                "{text}"
            );
        }
    }

    fn line(src: Option<&str>, dsts: &[&str]) -> LineDecl {
        LineDecl {
            src: src.map(str::to_string),
            dsts: dsts.iter().map(|d| d.to_string()).collect(),
            span: Span::new(0, 1),
        }
    }

    #[test]
    fn wire_from_branching_line() {
        let wire = Wire::from_line(&line(Some("3#out:1"), &["4#in:1", "6#in:2"])).unwrap();
        assert_eq!(wire.from, socket(3, 0));
        assert_eq!(wire.to, vec![socket(4, 0), socket(6, 1)]);
    }

    #[test]
    fn wire_without_destination_is_rejected() {
        let err = Wire::from_line(&line(Some("3#out:1"), &[])).unwrap_err();
        assert!(matches!(err, Error::UnconnectedLine { .. }), "got {err:?}");
    }

    #[test]
    fn wire_without_source_is_rejected() {
        let err = Wire::from_line(&line(None, &["4#in:1"])).unwrap_err();
        assert!(matches!(err, Error::InvalidSocketFormat { .. }), "got {err:?}");
    }

    fn small_graph() -> Graph {
        let mut g = Graph::new();
        g.add_block(Block::new(Sid(1), "a", Kind::Inport)).unwrap();
        g.add_block(Block::new(
            Sid(2),
            "sum",
            Kind::Sum {
                signs: [Sign::Plus, Sign::Plus],
            },
        ))
        .unwrap();
        g.add_block(Block::new(Sid(3), "z", Kind::UnitDelay { sample_time: -1.0 }))
            .unwrap();
        g
    }

    fn wire(from: Socket, to: &[Socket]) -> Wire {
        Wire {
            from,
            to: to.to_vec(),
            span: Span::default(),
        }
    }

    #[test]
    fn binds_slots_and_skips_edges_into_delays() {
        let mut g = small_graph();
        resolve_wire(&mut g, &wire(socket(1, 0), &[socket(2, 0), socket(3, 0)])).unwrap();
        resolve_wire(&mut g, &wire(socket(3, 0), &[socket(2, 1)])).unwrap();

        assert_eq!(g.slots(Sid(2)), &[Some(Sid(1)), Some(Sid(3))]);
        assert_eq!(g.slots(Sid(3)), &[Some(Sid(1))]);

        let targets: Vec<Sid> = g.targets(Sid(1)).collect();
        assert_eq!(targets, vec![Sid(2)]);
        let targets: Vec<Sid> = g.targets(Sid(3)).collect();
        assert_eq!(targets, vec![Sid(2)]);
    }

    #[test]
    fn unknown_source_or_destination_is_rejected() {
        let mut g = small_graph();
        let err = resolve_wire(&mut g, &wire(socket(9, 0), &[socket(2, 0)])).unwrap_err();
        assert!(matches!(err, Error::UnknownReference { sid: Sid(9), .. }));

        let err = resolve_wire(&mut g, &wire(socket(1, 0), &[socket(8, 0)])).unwrap_err();
        assert!(matches!(err, Error::UnknownReference { sid: Sid(8), .. }));
    }

    #[test]
    fn slot_past_arity_is_rejected() {
        let mut g = small_graph();
        let err = resolve_wire(&mut g, &wire(socket(1, 0), &[socket(2, 2)])).unwrap_err();
        assert!(
            matches!(err, Error::InvalidPort { port: 3, arity: 2, .. }),
            "got {err:?}"
        );
    }

    #[test]
    fn slot_bound_twice_is_rejected() {
        let mut g = small_graph();
        resolve_wire(&mut g, &wire(socket(1, 0), &[socket(2, 0)])).unwrap();
        let err = resolve_wire(&mut g, &wire(socket(3, 0), &[socket(2, 0)])).unwrap_err();
        assert!(matches!(err, Error::SlotAlreadyBound { .. }), "got {err:?}");
    }
}
