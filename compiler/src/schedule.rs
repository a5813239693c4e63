// schedule.rs — Evaluation order for one model step
//
// Depth-first topological sort over the graph's edge set. A block is
// appended after every block it feeds (postorder); the reversed sequence
// puts producers before consumers. Stateful blocks take part in the sort
// (their outputs feed others) but are evaluated in a separate update pass
// after all combinational work, so readers within a step see the previous
// step's value.
//
// Roots are visited in descending SID order and successors in wiring order.
// For a model whose SIDs already follow data flow, the result is plain
// ascending SID order.
//
// Updates latch in place, one after another. A delay fed by another delay
// must therefore be latched before its source is overwritten; otherwise
// `u → d1 → d2` would collapse into a single step of lag.
//
// Preconditions: `graph` was built by `graph::build_graph`.
// Postconditions: every block appears exactly once in `order`; every edge
//                 u → v has u before v; `updates` is the stateful set, each
//                 delay ahead of the delay it reads (ascending SID otherwise).
// Failure modes: a cycle not broken by a stateful block → `AlgebraicLoop`.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::Serialize;

use crate::diag::{Error, Result};
use crate::graph::Graph;
use crate::id::Sid;

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schedule {
    /// Every block, producers before consumers.
    pub order: Vec<Sid>,
    /// Stateful blocks, latched after the combinational pass.
    pub updates: Vec<Sid>,
}

impl Schedule {
    /// `order` without stateful blocks.
    pub fn combinational<'a>(&'a self, graph: &'a Graph) -> impl Iterator<Item = Sid> + 'a {
        self.order
            .iter()
            .copied()
            .filter(move |&sid| !graph.is_stateful(sid))
    }
}

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for the schedule postconditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleCert {
    /// Every graph block appears exactly once in `order`.
    pub all_blocks_once: bool,
    /// Every edge source precedes its target in `order`.
    pub edges_ordered: bool,
    /// `updates` is exactly the stateful set.
    pub updates_are_stateful: bool,
    /// A delay reading another delay is latched first, unless both sit on
    /// a ring made only of delays.
    pub delay_chains_ordered: bool,
}

impl ScheduleCert {
    pub fn all_pass(&self) -> bool {
        self.all_blocks_once
            && self.edges_ordered
            && self.updates_are_stateful
            && self.delay_chains_ordered
    }

    pub fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("all_blocks_once", self.all_blocks_once),
            ("edges_ordered", self.edges_ordered),
            ("updates_are_stateful", self.updates_are_stateful),
            ("delay_chains_ordered", self.delay_chains_ordered),
        ]
    }
}

pub fn verify_schedule(graph: &Graph, schedule: &Schedule) -> ScheduleCert {
    let mut position = HashMap::with_capacity(schedule.order.len());
    let mut unique = true;
    for (i, &sid) in schedule.order.iter().enumerate() {
        if position.insert(sid, i).is_some() {
            unique = false;
        }
    }
    let all_blocks_once = unique
        && schedule.order.len() == graph.nodes().len()
        && graph.nodes().keys().all(|sid| position.contains_key(sid));

    let edges_ordered = graph.edges().values().flatten().all(|c| {
        match (position.get(&c.from.sid), position.get(&c.to.sid)) {
            (Some(from), Some(to)) => from < to,
            _ => false,
        }
    });

    let mut latched = schedule.updates.clone();
    latched.sort();
    latched.dedup();
    let updates_are_stateful = latched.len() == schedule.updates.len()
        && latched.iter().eq(graph.stateful().iter());

    let latch_position: HashMap<Sid, usize> = schedule
        .updates
        .iter()
        .enumerate()
        .map(|(i, &sid)| (sid, i))
        .collect();
    let delay_chains_ordered = schedule.updates.iter().all(|&reader| {
        match latched_source(graph, reader) {
            Some(source) if source != reader => {
                latch_position.get(&reader) < latch_position.get(&source)
                    || reads_through(graph, source, reader)
            }
            _ => true,
        }
    });

    ScheduleCert {
        all_blocks_once,
        edges_ordered,
        updates_are_stateful,
        delay_chains_ordered,
    }
}

/// True if following delay inputs from `from` reaches `to`.
fn reads_through(graph: &Graph, from: Sid, to: Sid) -> bool {
    let mut current = from;
    for _ in 0..graph.stateful().len() {
        match latched_source(graph, current) {
            Some(next) if next == to => return true,
            Some(next) => current = next,
            None => return false,
        }
    }
    false
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Compute the evaluation order of one step.
pub fn schedule(graph: &Graph) -> Result<Schedule> {
    let mut order = postorder(graph)?;
    order.reverse();

    let updates = update_order(graph);

    tracing::debug!(
        blocks = order.len(),
        updates = updates.len(),
        "scheduled step"
    );
    Ok(Schedule { order, updates })
}

// ── Update order ────────────────────────────────────────────────────────────

/// The stateful block whose stored value `sid` latches, if its input comes
/// straight from a delay (directly or through a sink alias).
pub fn latched_source(graph: &Graph, sid: Sid) -> Option<Sid> {
    if !graph.is_stateful(sid) {
        return None;
    }
    let producer = graph.producer(sid, 0).ok()?;
    let storage = graph.storage(producer.sid).ok()?;
    graph.is_stateful(storage.sid).then_some(storage.sid)
}

/// Readers first: a delay is latched only after every delay reading it.
/// Ties go to the lowest SID. A ring made only of delays has no such
/// order; it is cut at its lowest SID and codegen reads that delay's
/// previous value from a copy.
fn update_order(graph: &Graph) -> Vec<Sid> {
    let mut source_of: BTreeMap<Sid, Sid> = BTreeMap::new();
    let mut readers: BTreeMap<Sid, usize> = graph.stateful().iter().map(|&s| (s, 0)).collect();
    for &sid in graph.stateful() {
        if let Some(source) = latched_source(graph, sid).filter(|&s| s != sid) {
            source_of.insert(sid, source);
            if let Some(n) = readers.get_mut(&source) {
                *n += 1;
            }
        }
    }

    let mut ready: BTreeSet<Sid> = readers
        .iter()
        .filter(|&(_, &n)| n == 0)
        .map(|(&sid, _)| sid)
        .collect();
    let mut order = Vec::with_capacity(readers.len());
    loop {
        let next = match ready.pop_first() {
            Some(sid) => sid,
            None => match readers.keys().next() {
                Some(&sid) => {
                    tracing::trace!(block = %sid, "cut delay ring");
                    sid
                }
                None => break,
            },
        };
        readers.remove(&next);
        order.push(next);
        if let Some(source) = source_of.get(&next) {
            if let Some(n) = readers.get_mut(source) {
                *n -= 1;
                if *n == 0 {
                    ready.insert(*source);
                }
            }
        }
    }
    order
}

// ── Depth-first traversal ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// On the current DFS path.
    Active,
    Done,
}

/// Iterative DFS postorder; the explicit stack is also the current path,
/// which is what a detected cycle is reported from.
fn postorder(graph: &Graph) -> Result<Vec<Sid>> {
    let mut marks: HashMap<Sid, Mark> = HashMap::with_capacity(graph.nodes().len());
    let mut finished = Vec::with_capacity(graph.nodes().len());

    for &root in graph.nodes().keys().rev() {
        if marks.contains_key(&root) {
            continue;
        }
        marks.insert(root, Mark::Active);
        let mut stack: Vec<(Sid, usize)> = vec![(root, 0)];

        while let Some(top) = stack.last_mut() {
            let sid = top.0;
            let next = graph
                .edges()
                .get(&sid)
                .and_then(|conns| conns.get(top.1))
                .map(|c| c.to.sid);

            match next {
                Some(target) => {
                    top.1 += 1;
                    match marks.get(&target) {
                        None => {
                            marks.insert(target, Mark::Active);
                            stack.push((target, 0));
                        }
                        Some(Mark::Active) => return Err(loop_error(graph, &stack, target)),
                        Some(Mark::Done) => {}
                    }
                }
                None => {
                    marks.insert(sid, Mark::Done);
                    finished.push(sid);
                    stack.pop();
                }
            }
        }
    }

    Ok(finished)
}

fn loop_error(graph: &Graph, path: &[(Sid, usize)], target: Sid) -> Error {
    let name = |sid: Sid| {
        graph
            .block(sid)
            .map(|b| b.name.clone())
            .unwrap_or_else(|| sid.to_string())
    };
    let start = path.iter().position(|&(sid, _)| sid == target).unwrap_or(0);
    let mut blocks: Vec<String> = path[start..].iter().map(|&(sid, _)| name(sid)).collect();
    blocks.push(name(target));
    Error::AlgebraicLoop { blocks }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |sids: &[Sid]| {
            sids.iter()
                .map(Sid::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        writeln!(f, "Schedule ({} blocks)", self.order.len())?;
        writeln!(f, "  order: [{}]", join(&self.order))?;
        writeln!(f, "  updates: [{}]", join(&self.updates))
    }
}

/// Names of `sids`, for test assertions and verbose output.
pub fn names<'a>(graph: &'a Graph, sids: impl IntoIterator<Item = Sid> + 'a) -> Vec<&'a str> {
    sids.into_iter()
        .filter_map(|sid| graph.block(sid).map(|b| b.name.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, Kind, Sign};
    use crate::diag::Span;
    use crate::resolve::{resolve_wire, Socket, Wire};

    fn gain(sid: u64, name: &str) -> Block {
        Block::new(Sid(sid), name, Kind::Gain { factor: 2.0 })
    }

    fn sum(sid: u64, name: &str) -> Block {
        Block::new(
            Sid(sid),
            name,
            Kind::Sum {
                signs: [Sign::Plus, Sign::Plus],
            },
        )
    }

    fn delay(sid: u64, name: &str) -> Block {
        Block::new(Sid(sid), name, Kind::UnitDelay { sample_time: -1.0 })
    }

    fn wire(g: &mut Graph, from: u64, to: u64, port: usize) {
        let w = Wire {
            from: Socket {
                sid: Sid(from),
                port: 0,
            },
            to: vec![Socket {
                sid: Sid(to),
                port,
            }],
            span: Span::default(),
        };
        resolve_wire(g, &w).unwrap();
    }

    #[test]
    fn declaration_order_is_kept_when_valid() {
        let mut g = Graph::new();
        g.add_block(Block::new(Sid(1), "u", Kind::Inport)).unwrap();
        g.add_block(gain(2, "g1")).unwrap();
        g.add_block(gain(3, "g2")).unwrap();
        g.add_block(Block::new(Sid(4), "y", Kind::Outport)).unwrap();
        wire(&mut g, 1, 2, 0);
        wire(&mut g, 2, 3, 0);
        wire(&mut g, 3, 4, 0);

        let s = schedule(&g).unwrap();
        assert_eq!(names(&g, s.order.iter().copied()), vec!["u", "g1", "g2", "y"]);
        assert!(s.updates.is_empty());
        assert!(verify_schedule(&g, &s).all_pass());
    }

    #[test]
    fn producers_precede_consumers_regardless_of_sid() {
        let mut g = Graph::new();
        g.add_block(Block::new(Sid(30), "u", Kind::Inport)).unwrap();
        g.add_block(gain(10, "late")).unwrap();
        g.add_block(gain(20, "early")).unwrap();
        wire(&mut g, 30, 20, 0);
        wire(&mut g, 20, 10, 0);

        let s = schedule(&g).unwrap();
        assert_eq!(names(&g, s.order.iter().copied()), vec!["u", "early", "late"]);
        assert!(verify_schedule(&g, &s).edges_ordered);
    }

    #[test]
    fn delay_breaks_feedback_loop() {
        // acc = u + z; z = delay(acc)
        let mut g = Graph::new();
        g.add_block(Block::new(Sid(1), "u", Kind::Inport)).unwrap();
        g.add_block(sum(2, "acc")).unwrap();
        g.add_block(delay(3, "z")).unwrap();
        wire(&mut g, 1, 2, 0);
        wire(&mut g, 3, 2, 1);
        wire(&mut g, 2, 3, 0);

        let s = schedule(&g).unwrap();
        assert_eq!(s.updates, vec![Sid(3)]);
        assert_eq!(names(&g, s.combinational(&g)), vec!["u", "acc"]);
        assert!(verify_schedule(&g, &s).all_pass());
    }

    #[test]
    fn chained_delays_latch_downstream_first() {
        // y = d2 = delay(d1), d1 = delay(u)
        let mut g = Graph::new();
        g.add_block(Block::new(Sid(1), "u", Kind::Inport)).unwrap();
        g.add_block(delay(2, "d1")).unwrap();
        g.add_block(delay(3, "d2")).unwrap();
        g.add_block(Block::new(Sid(4), "y", Kind::Outport)).unwrap();
        wire(&mut g, 1, 2, 0);
        wire(&mut g, 2, 3, 0);
        wire(&mut g, 3, 4, 0);

        let s = schedule(&g).unwrap();
        assert_eq!(names(&g, s.updates.iter().copied()), vec!["d2", "d1"]);
        assert_eq!(latched_source(&g, Sid(3)), Some(Sid(2)));
        assert_eq!(latched_source(&g, Sid(2)), None);
        assert!(verify_schedule(&g, &s).all_pass());
    }

    #[test]
    fn independent_delays_keep_sid_order() {
        let mut g = Graph::new();
        g.add_block(Block::new(Sid(1), "u", Kind::Inport)).unwrap();
        g.add_block(delay(2, "a")).unwrap();
        g.add_block(delay(3, "b")).unwrap();
        g.add_block(delay(4, "c")).unwrap();
        wire(&mut g, 1, 2, 0);
        wire(&mut g, 1, 3, 0);
        // c reads a, so c goes ahead of a; b is free.
        wire(&mut g, 2, 4, 0);

        let s = schedule(&g).unwrap();
        assert_eq!(s.updates, vec![Sid(3), Sid(4), Sid(2)]);
        assert!(verify_schedule(&g, &s).all_pass());
    }

    #[test]
    fn delay_ring_is_cut_at_lowest_sid() {
        let mut g = Graph::new();
        g.add_block(delay(1, "p")).unwrap();
        g.add_block(delay(2, "q")).unwrap();
        g.add_block(Block::new(Sid(3), "y", Kind::Outport)).unwrap();
        wire(&mut g, 1, 2, 0);
        wire(&mut g, 2, 1, 0);
        wire(&mut g, 1, 3, 0);

        let s = schedule(&g).unwrap();
        assert_eq!(s.updates, vec![Sid(1), Sid(2)]);
        assert!(verify_schedule(&g, &s).all_pass());
    }

    #[test]
    fn cert_flags_upstream_delay_latched_first() {
        let mut g = Graph::new();
        g.add_block(Block::new(Sid(1), "u", Kind::Inport)).unwrap();
        g.add_block(delay(2, "d1")).unwrap();
        g.add_block(delay(3, "d2")).unwrap();
        wire(&mut g, 1, 2, 0);
        wire(&mut g, 2, 3, 0);

        let mut s = schedule(&g).unwrap();
        s.updates = vec![Sid(2), Sid(3)];
        let cert = verify_schedule(&g, &s);
        assert!(cert.updates_are_stateful);
        assert!(!cert.delay_chains_ordered);
        assert!(!cert.all_pass());

        s.updates = vec![Sid(3), Sid(3)];
        assert!(!verify_schedule(&g, &s).updates_are_stateful);
    }

    #[test]
    fn loop_without_delay_is_rejected() {
        let mut g = Graph::new();
        g.add_block(Block::new(Sid(1), "u", Kind::Inport)).unwrap();
        g.add_block(sum(2, "acc")).unwrap();
        g.add_block(gain(3, "k")).unwrap();
        wire(&mut g, 1, 2, 0);
        wire(&mut g, 3, 2, 1);
        wire(&mut g, 2, 3, 0);

        let err = schedule(&g).unwrap_err();
        match err {
            Error::AlgebraicLoop { blocks } => {
                assert_eq!(blocks.first(), blocks.last());
                assert!(blocks.contains(&"acc".to_string()));
                assert!(blocks.contains(&"k".to_string()));
            }
            other => panic!("expected AlgebraicLoop, got {other:?}"),
        }
    }

    #[test]
    fn scheduling_is_deterministic() {
        let mut g = Graph::new();
        for i in 1..=6 {
            g.add_block(gain(i, &format!("g{i}"))).unwrap();
        }
        g.add_block(Block::new(Sid(7), "u", Kind::Inport)).unwrap();
        wire(&mut g, 7, 1, 0);
        wire(&mut g, 7, 4, 0);
        wire(&mut g, 1, 2, 0);
        wire(&mut g, 4, 5, 0);
        wire(&mut g, 2, 3, 0);
        wire(&mut g, 5, 6, 0);

        let first = schedule(&g).unwrap();
        let second = schedule(&g).unwrap();
        assert_eq!(first, second);
        assert!(verify_schedule(&g, &first).all_pass());
    }

    #[test]
    fn cert_flags_misordered_schedule() {
        let mut g = Graph::new();
        g.add_block(Block::new(Sid(1), "u", Kind::Inport)).unwrap();
        g.add_block(gain(2, "g")).unwrap();
        wire(&mut g, 1, 2, 0);

        let bad = Schedule {
            order: vec![Sid(2), Sid(1)],
            updates: vec![],
        };
        let cert = verify_schedule(&g, &bad);
        assert!(cert.all_blocks_once);
        assert!(!cert.edges_ordered);
        assert!(!cert.all_pass());

        let missing = Schedule {
            order: vec![Sid(1)],
            updates: vec![],
        };
        assert!(!verify_schedule(&g, &missing).all_blocks_once);
    }

    #[test]
    fn display_lists_order_and_updates() {
        let s = Schedule {
            order: vec![Sid(1), Sid(3), Sid(2)],
            updates: vec![Sid(2)],
        };
        assert_eq!(
            s.to_string(),
            "Schedule (3 blocks)\n  order: [1, 3, 2]\n  updates: [2]\n"
        );
    }
}
