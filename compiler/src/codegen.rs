// codegen.rs — C code generation for block diagrams
//
// Transforms a scheduled block graph into a C translation unit: a static
// state struct, an init function, a step function and an exported-port
// table, wrapped in caller-supplied prolog/epilogue templates.
//
// Preconditions: `graph` is fully resolved; `schedule` was computed from it.
// Postconditions: returns `GeneratedCode` with the complete C source.
// Failure modes: unbound slot → `UnresolvedSlot`; bad template placeholder →
//                `InvalidTemplate`.
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde::Serialize;

use crate::block::{Block, Kind, Sign};
use crate::diag::{Error, Result};
use crate::graph::Graph;
use crate::id::Sid;
use crate::schedule::{latched_source, Schedule};

// ── Public types ────────────────────────────────────────────────────────────

pub const DEFAULT_PACKAGE: &str = "nwocg";

pub const DEFAULT_PROLOG: &str = "#include \"{0}_run.h\"\n#include <math.h>\n";

pub const DEFAULT_EPILOGUE: &str = "
const {0}_ExtPort * const
    {0}_generated_ext_ports = ext_ports;

const size_t
    {0}_generated_ext_ports_size = sizeof(ext_ports);";

#[derive(Debug, Clone)]
pub struct CodegenOptions {
    /// Name of the state struct instance and prefix of every exported symbol.
    pub package: String,
    /// Emitted before the generated body; `{0}` expands to `package`.
    pub prolog: String,
    /// Emitted after the generated body; `{0}` expands to `package`.
    pub epilogue: String,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            package: DEFAULT_PACKAGE.to_string(),
            prolog: DEFAULT_PROLOG.to_string(),
            epilogue: DEFAULT_EPILOGUE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCode {
    pub c_source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    /// Written by the embedding program before each step.
    Input,
    /// Read by the embedding program after each step.
    Output,
}

impl Direction {
    /// Value of the `is_input` column.
    pub fn flag(self) -> u8 {
        match self {
            Direction::Input => 1,
            Direction::Output => 0,
        }
    }
}

/// One row of the exported-port table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedPort {
    pub name: String,
    /// State field the port points at.
    pub field: String,
    pub direction: Direction,
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn codegen(
    graph: &Graph,
    schedule: &Schedule,
    options: &CodegenOptions,
) -> Result<GeneratedCode> {
    let mut ctx = CodegenCtx::new(graph, schedule, options);
    ctx.emit_all()?;
    tracing::debug!(bytes = ctx.out.len(), "generated C source");
    Ok(GeneratedCode { c_source: ctx.out })
}

/// Exported ports: one per source (its own field) and one per sink (its
/// producer's field), sorted by exported name.
pub fn port_table(graph: &Graph) -> Result<Vec<ExportedPort>> {
    let mut ports = Vec::with_capacity(graph.sources().len() + graph.sinks().len());
    for block in graph.nodes().values() {
        let direction = match block.kind {
            Kind::Inport => Direction::Input,
            Kind::Outport => Direction::Output,
            Kind::Gain { .. } | Kind::UnitDelay { .. } | Kind::Sum { .. } => continue,
        };
        ports.push(ExportedPort {
            name: block.name.clone(),
            field: graph.storage(block.sid)?.name.clone(),
            direction,
        });
    }
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(ports)
}

/// Expand `{0}` (or `{}`) to `package`; `{{` and `}}` are literal braces.
pub fn render_template(template: &str, package: &str) -> Result<String> {
    let mut out = String::with_capacity(template.len() + package.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut inner = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }
                if !closed || !(inner.is_empty() || inner == "0") {
                    let placeholder = if closed {
                        format!("{{{inner}}}")
                    } else {
                        format!("{{{inner}")
                    };
                    return Err(Error::InvalidTemplate { placeholder });
                }
                out.push_str(package);
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(Error::InvalidTemplate {
                    placeholder: "}".to_string(),
                })
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

/// Local holding a delay's value from before the update section.
fn previous(block: &Block) -> String {
    format!("{}_prev", block.name)
}

// ── Internal context ────────────────────────────────────────────────────────

struct CodegenCtx<'a> {
    graph: &'a Graph,
    schedule: &'a Schedule,
    options: &'a CodegenOptions,
    out: String,
}

impl<'a> CodegenCtx<'a> {
    fn new(graph: &'a Graph, schedule: &'a Schedule, options: &'a CodegenOptions) -> Self {
        CodegenCtx {
            graph,
            schedule,
            options,
            out: String::with_capacity(4096),
        }
    }

    fn pkg(&self) -> &'a str {
        &self.options.package
    }

    /// `pkg.field` for a block's own storage.
    fn field(&self, block: &Block) -> String {
        format!("{}.{}", self.pkg(), block.name)
    }

    /// `pkg.field` for the value feeding input `port` of `block`.
    fn dep(&self, block: &Block, port: usize) -> Result<String> {
        let producer = self.graph.producer(block.sid, port)?;
        let storage = self.graph.storage(producer.sid)?;
        Ok(self.field(storage))
    }

    fn emit_all(&mut self) -> Result<()> {
        self.emit_prolog()?;
        self.emit_state_struct();
        self.emit_init();
        self.emit_step()?;
        self.emit_port_table()?;
        self.emit_epilogue()
    }

    // ── Templates ───────────────────────────────────────────────────────

    fn emit_prolog(&mut self) -> Result<()> {
        let prolog = render_template(&self.options.prolog, self.pkg())?;
        self.out.push_str(&prolog);
        self.out.push('\n');
        Ok(())
    }

    fn emit_epilogue(&mut self) -> Result<()> {
        let epilogue = render_template(&self.options.epilogue, self.pkg())?;
        self.out.push_str(&epilogue);
        self.out.push('\n');
        Ok(())
    }

    // ── State struct ────────────────────────────────────────────────────

    fn emit_state_struct(&mut self) {
        let graph = self.graph;
        let pkg = self.pkg();
        self.out.push_str("static struct\n{\n");
        for block in graph.nodes().values() {
            if !block.kind.is_sink() {
                let _ = writeln!(self.out, "    double {};", block.name);
            }
        }
        let _ = writeln!(self.out, "}} {};\n", pkg);
    }

    // ── Init ────────────────────────────────────────────────────────────

    fn emit_init(&mut self) {
        let graph = self.graph;
        let pkg = self.pkg();
        let _ = writeln!(self.out, "void {}_generated_init()\n{{", pkg);
        for &sid in graph.stateful() {
            let block = &graph.nodes()[&sid];
            let line = match block.kind {
                Kind::UnitDelay { .. } => format!("{} = 0;", self.field(block)),
                Kind::Inport | Kind::Outport | Kind::Gain { .. } | Kind::Sum { .. } => continue,
            };
            let _ = writeln!(self.out, "    {}", line);
        }
        self.out.push_str("}\n\n");
    }

    // ── Step ────────────────────────────────────────────────────────────

    fn emit_step(&mut self) -> Result<()> {
        let graph = self.graph;
        let schedule = self.schedule;
        let pkg = self.pkg();
        let _ = writeln!(self.out, "void {}_generated_step()\n{{", pkg);

        let copied = self.ring_copies();
        for &sid in &copied {
            let block = self.block(sid);
            let _ = writeln!(
                self.out,
                "    double {} = {};",
                previous(block),
                self.field(block)
            );
        }

        for sid in schedule.combinational(graph) {
            let block = self.block(sid);
            if let Some(stmt) = self.evaluation(block)? {
                tracing::trace!(block = %block.name, "evaluate");
                let _ = writeln!(self.out, "    {}", stmt);
            }
        }

        if !schedule.updates.is_empty() {
            self.out.push('\n');
        }
        for &sid in &schedule.updates {
            let block = self.block(sid);
            if let Some(stmt) = self.update(block, &copied)? {
                tracing::trace!(block = %block.name, "latch");
                let _ = writeln!(self.out, "    {}", stmt);
            }
        }

        self.out.push_str("}\n\n");
        Ok(())
    }

    fn block(&self, sid: Sid) -> &'a Block {
        &self.graph.nodes()[&sid]
    }

    /// Delays overwritten before a reader latches them. Only delay-only
    /// rings produce these; their value is copied at the top of the step.
    fn ring_copies(&self) -> BTreeSet<Sid> {
        let mut latched = BTreeSet::new();
        let mut copied = BTreeSet::new();
        for &sid in &self.schedule.updates {
            if let Some(source) = latched_source(self.graph, sid) {
                if latched.contains(&source) {
                    copied.insert(source);
                }
            }
            latched.insert(sid);
        }
        copied
    }

    /// Statement computing a combinational block's value this step.
    fn evaluation(&self, block: &Block) -> Result<Option<String>> {
        let stmt = match &block.kind {
            Kind::Gain { factor } => {
                format!("{} = {} * {};", self.field(block), self.dep(block, 0)?, factor)
            }
            Kind::Sum { signs: [first, second] } => {
                let lead = match first {
                    Sign::Minus => "- ",
                    Sign::Plus => "",
                };
                let op = match second {
                    Sign::Minus => " - ",
                    Sign::Plus => " + ",
                };
                format!(
                    "{} = {}{}{}{};",
                    self.field(block),
                    lead,
                    self.dep(block, 0)?,
                    op,
                    self.dep(block, 1)?
                )
            }
            Kind::UnitDelay { .. } | Kind::Inport | Kind::Outport => return Ok(None),
        };
        Ok(Some(stmt))
    }

    /// Statement latching a stateful block's input for the next step.
    fn update(&self, block: &Block, copied: &BTreeSet<Sid>) -> Result<Option<String>> {
        match block.kind {
            Kind::UnitDelay { .. } => {
                let producer = self.graph.producer(block.sid, 0)?;
                let storage = self.graph.storage(producer.sid)?;
                let value = if copied.contains(&storage.sid) {
                    previous(storage)
                } else {
                    self.field(storage)
                };
                Ok(Some(format!("{} = {};", self.field(block), value)))
            }
            Kind::Inport | Kind::Outport | Kind::Gain { .. } | Kind::Sum { .. } => Ok(None),
        }
    }

    // ── Exported ports ──────────────────────────────────────────────────

    fn emit_port_table(&mut self) -> Result<()> {
        let pkg = self.pkg();
        let ports = port_table(self.graph)?;
        let _ = writeln!(
            self.out,
            "static const {}_ExtPort\n    ext_ports[] =\n{{",
            pkg
        );
        for port in &ports {
            let _ = writeln!(
                self.out,
                "    {{ \"{}\", &{}.{}, {} }},",
                port.name,
                pkg,
                port.field,
                port.direction.flag()
            );
        }
        self.out.push_str("    { 0, 0, 0 },\n};\n");
        Ok(())
    }
}
