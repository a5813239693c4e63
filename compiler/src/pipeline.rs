// pipeline.rs — Compilation phases and provenance
//
// Runs load → build graph → schedule → verify → codegen over one model and
// keeps every artifact for callers that need more than the C text (the
// `--emit` stages of the CLI, tests).
//
// Preconditions: none.
// Postconditions: on success every artifact is populated and the schedule
//                 certificate passed.
// Failure modes: the first error of any phase aborts the run.
// Side effects: emits `tracing` events per phase.

use std::time::Instant;

use serde::Serialize;

use crate::codegen::{self, CodegenOptions, GeneratedCode};
use crate::diag::Result;
use crate::graph::{self, Graph};
use crate::model::{self, Model};
use crate::schedule::{self, Schedule};

// ── Artifacts ──────────────────────────────────────────────────────────────

/// Everything produced by one compilation run.
#[derive(Debug)]
pub struct Compilation {
    pub model: Model,
    pub graph: Graph,
    pub schedule: Schedule,
    pub generated: GeneratedCode,
}

/// Front half of the pipeline: the scheduled graph without code.
#[derive(Debug)]
pub struct Analysis {
    pub model: Model,
    pub graph: Graph,
    pub schedule: Schedule,
}

/// Load, build and schedule a model.
pub fn analyze(source: &str) -> Result<Analysis> {
    let model = timed("load", || model::load(source))?;
    let graph = timed("build_graph", || graph::build_graph(&model))?;
    let schedule = timed("schedule", || schedule::schedule(&graph))?;

    let cert = schedule::verify_schedule(&graph, &schedule);
    for (name, ok) in cert.obligations() {
        tracing::debug!(obligation = name, ok, "schedule certificate");
    }
    debug_assert!(cert.all_pass(), "schedule postconditions violated: {cert:?}");

    Ok(Analysis {
        model,
        graph,
        schedule,
    })
}

/// Compile model text to C source.
pub fn compile(source: &str, options: &CodegenOptions) -> Result<Compilation> {
    let Analysis {
        model,
        graph,
        schedule,
    } = analyze(source)?;
    let generated = timed("codegen", || codegen::codegen(&graph, &schedule, options))?;

    Ok(Compilation {
        model,
        graph,
        schedule,
        generated,
    })
}

fn timed<T>(phase: &'static str, run: impl FnOnce() -> Result<T>) -> Result<T> {
    let start = Instant::now();
    let result = run();
    let elapsed_us = start.elapsed().as_micros() as u64;
    match &result {
        Ok(_) => tracing::debug!(phase, elapsed_us, "phase complete"),
        Err(e) => tracing::debug!(phase, elapsed_us, code = %e.code(), "phase failed"),
    }
    result
}

// ── Intermediate representation dump ───────────────────────────────────────

#[derive(Serialize)]
struct IrDump<'a> {
    graph: &'a Graph,
    schedule: &'a Schedule,
}

/// The scheduled graph as pretty-printed JSON.
pub fn ir_json(analysis: &Analysis) -> serde_json::Result<String> {
    let dump = IrDump {
        graph: &analysis.graph,
        schedule: &analysis.schedule,
    };
    serde_json::to_string_pretty(&dump)
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for reproducible builds.
///
/// `source_hash`: SHA-256 of the raw model text.
/// `options_hash`: SHA-256 of package name, prolog and epilogue.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub options_hash: [u8; 32],
    pub compiler_version: &'static str,
}

#[derive(Serialize)]
struct ProvenanceJson<'a> {
    source_hash: String,
    options_hash: String,
    package: &'a str,
    compiler_version: &'a str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    pub fn options_hash_hex(&self) -> String {
        bytes_to_hex(&self.options_hash)
    }

    /// Serialize provenance as a JSON document for `--emit build-info`.
    pub fn to_json(&self, options: &CodegenOptions) -> String {
        let doc = ProvenanceJson {
            source_hash: self.source_hash_hex(),
            options_hash: self.options_hash_hex(),
            package: &options.package,
            compiler_version: self.compiler_version,
        };
        let mut json = serde_json::to_string_pretty(&doc).unwrap_or_default();
        json.push('\n');
        json
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Compute provenance from model text and code generation options.
pub fn compute_provenance(source: &str, options: &CodegenOptions) -> Provenance {
    use sha2::{Digest, Sha256};

    let source_hash = {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    };

    let options_hash = {
        let mut hasher = Sha256::new();
        for part in [&options.package, &options.prolog, &options.epilogue] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    };

    Provenance {
        source_hash,
        options_hash,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}
