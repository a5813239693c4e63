// blockc — block diagram compiler
//
// Library root. Phases in pipeline order: model → block → resolve/graph →
// schedule → codegen; `pipeline` runs them end to end.

pub mod block;
pub mod codegen;
pub mod diag;
pub mod dot;
pub mod graph;
pub mod id;
pub mod model;
pub mod pipeline;
pub mod resolve;
pub mod schedule;

pub use codegen::CodegenOptions;
pub use diag::{Error, Result};
pub use pipeline::{compile, Compilation};
