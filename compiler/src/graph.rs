// graph.rs — Block graph construction
//
// Owns every block of a model, the slot table binding block inputs to their
// producers, the scheduling edge set and the source/sink/stateful role sets.
// Construction is two-phase: all blocks first, then all wires, so a line may
// name a block declared later in the document.
//
// Preconditions: `model` was produced by `model::load`.
// Postconditions: every slot of every block is bound; SIDs and variable
//                 names are unique; edges into stateful blocks are absent.
// Failure modes: any block or wiring error (see `block`, `resolve`);
//                unbound slot → `UnresolvedSlot`.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::block::{self, Block};
use crate::diag::{Error, Result};
use crate::id::Sid;
use crate::model::Model;
use crate::resolve::{self, Connection, Socket, Wire};

// ── Public types ────────────────────────────────────────────────────────────

/// The block graph. All maps and sets iterate in ascending SID order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Graph {
    nodes: BTreeMap<Sid, Block>,
    /// Per block, one entry per input: the producer bound to that slot.
    slots: BTreeMap<Sid, Vec<Option<Sid>>>,
    /// Source SID → connections it feeds, in wiring order. Connections into
    /// stateful blocks are never recorded.
    edges: BTreeMap<Sid, Vec<Connection>>,
    sources: BTreeSet<Sid>,
    sinks: BTreeSet<Sid>,
    stateful: BTreeSet<Sid>,
    #[serde(skip)]
    names: BTreeMap<String, Sid>,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Build the block graph from a loaded model.
pub fn build_graph(model: &Model) -> Result<Graph> {
    let mut graph = Graph::new();

    for decl in model.blocks() {
        graph.add_block(block::from_decl(decl)?)?;
    }
    for line in model.lines() {
        let wire = Wire::from_line(line)?;
        resolve::resolve_wire(&mut graph, &wire)?;
    }
    graph.check_resolved()?;

    tracing::debug!(
        blocks = graph.nodes.len(),
        edges = graph.edge_count(),
        sources = graph.sources.len(),
        sinks = graph.sinks.len(),
        stateful = graph.stateful.len(),
        "built block graph"
    );
    Ok(graph)
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a block with all of its slots unbound.
    pub fn add_block(&mut self, block: Block) -> Result<()> {
        if let Some(existing) = self.nodes.get(&block.sid) {
            return Err(Error::DuplicateSid {
                sid: block.sid,
                first: existing.name.clone(),
                second: block.name.clone(),
                span: Some(block.span),
            });
        }
        if let Some(&first) = self.names.get(&block.name) {
            return Err(Error::DuplicateName {
                name: block.name.clone(),
                first,
                second: block.sid,
                span: Some(block.span),
            });
        }

        if block.kind.is_source() {
            self.sources.insert(block.sid);
        } else if block.kind.is_sink() {
            self.sinks.insert(block.sid);
        } else if block.kind.is_stateful() {
            self.stateful.insert(block.sid);
        }

        self.names.insert(block.name.clone(), block.sid);
        self.slots.insert(block.sid, vec![None; block.arity()]);
        self.nodes.insert(block.sid, block);
        Ok(())
    }

    /// Bind input `to.port` of block `to.sid` to producer `from`.
    pub fn bind_slot(&mut self, to: Socket, from: Sid) -> Result<()> {
        let block = self
            .nodes
            .get(&to.sid)
            .ok_or(Error::UnknownReference {
                sid: to.sid,
                span: None,
            })?;
        let slots = self.slots.entry(to.sid).or_default();

        let slot = slots.get_mut(to.port).ok_or_else(|| Error::InvalidPort {
            name: block.name.clone(),
            port: to.port + 1,
            arity: block.arity(),
            span: None,
        })?;
        if slot.is_some() {
            return Err(Error::SlotAlreadyBound {
                name: block.name.clone(),
                port: to.port + 1,
                span: None,
            });
        }
        *slot = Some(from);
        Ok(())
    }

    /// Record a scheduling edge.
    pub fn add_connection(&mut self, connection: Connection) {
        self.edges
            .entry(connection.from.sid)
            .or_default()
            .push(connection);
    }

    /// Fail on the first block input that no line drives.
    pub fn check_resolved(&self) -> Result<()> {
        for (sid, slots) in &self.slots {
            if let Some(port) = slots.iter().position(Option::is_none) {
                return Err(Error::UnresolvedSlot {
                    name: self.nodes[sid].name.clone(),
                    port: port + 1,
                });
            }
        }
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn nodes(&self) -> &BTreeMap<Sid, Block> {
        &self.nodes
    }

    pub fn block(&self, sid: Sid) -> Option<&Block> {
        self.nodes.get(&sid)
    }

    pub fn edges(&self) -> &BTreeMap<Sid, Vec<Connection>> {
        &self.edges
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Scheduling successors of `sid`, in wiring order.
    pub fn targets(&self, sid: Sid) -> impl Iterator<Item = Sid> + '_ {
        self.edges
            .get(&sid)
            .into_iter()
            .flatten()
            .map(|c| c.to.sid)
    }

    pub fn sources(&self) -> &BTreeSet<Sid> {
        &self.sources
    }

    pub fn sinks(&self) -> &BTreeSet<Sid> {
        &self.sinks
    }

    pub fn stateful(&self) -> &BTreeSet<Sid> {
        &self.stateful
    }

    pub fn is_stateful(&self, sid: Sid) -> bool {
        self.stateful.contains(&sid)
    }

    /// Bound producers of `sid`'s inputs, in slot order.
    pub fn slots(&self, sid: Sid) -> &[Option<Sid>] {
        self.slots.get(&sid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The block feeding input `port` of `sid`.
    pub fn producer(&self, sid: Sid, port: usize) -> Result<&Block> {
        let unresolved = || Error::UnresolvedSlot {
            name: self
                .nodes
                .get(&sid)
                .map(|b| b.name.clone())
                .unwrap_or_else(|| sid.to_string()),
            port: port + 1,
        };
        let from = self
            .slots(sid)
            .get(port)
            .copied()
            .flatten()
            .ok_or_else(unresolved)?;
        self.nodes.get(&from).ok_or(Error::UnknownReference {
            sid: from,
            span: None,
        })
    }

    /// The block whose field holds `sid`'s value: the block itself, or for a
    /// sink, the first non-sink upstream of it.
    pub fn storage(&self, sid: Sid) -> Result<&Block> {
        let mut current = self.nodes.get(&sid).ok_or(Error::UnknownReference {
            sid,
            span: None,
        })?;
        let mut chain = vec![current.name.clone()];
        while current.kind.is_sink() {
            current = self.producer(current.sid, 0)?;
            if chain.contains(&current.name) {
                chain.push(current.name.clone());
                return Err(Error::AlgebraicLoop { blocks: chain });
            }
            chain.push(current.name.clone());
        }
        Ok(current)
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Graph ({} blocks, {} edges)",
            self.nodes.len(),
            self.edge_count()
        )?;
        for block in self.nodes.values() {
            let inputs: Vec<String> = self
                .slots(block.sid)
                .iter()
                .map(|s| match s.and_then(|sid| self.nodes.get(&sid)) {
                    Some(producer) => producer.name.clone(),
                    None => "?".to_string(),
                })
                .collect();
            if inputs.is_empty() {
                writeln!(f, "  {}", block)?;
            } else {
                writeln!(f, "  {} <- [{}]", block, inputs.join(", "))?;
            }
        }
        Ok(())
    }
}
