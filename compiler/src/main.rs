use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blockc::codegen::{CodegenOptions, DEFAULT_EPILOGUE, DEFAULT_PACKAGE, DEFAULT_PROLOG};
use blockc::pipeline;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    /// Generated C source
    C,
    /// Resolved graph and schedule as JSON
    Ir,
    /// Graphviz rendering of the block graph
    Dot,
    /// Provenance JSON (hashes and compiler version)
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "blockc",
    version,
    about = "Block diagram compiler — compiles system XML models to C step functions"
)]
struct Cli {
    /// Input model (system XML)
    model: PathBuf,

    /// Output file for `--emit c` (`-` for stdout)
    #[arg(short, long, default_value = "autogen.c")]
    output: PathBuf,

    /// Package name: state struct instance and symbol prefix
    #[arg(long, default_value = DEFAULT_PACKAGE)]
    package: String,

    /// File whose contents replace the default prolog template
    #[arg(long)]
    prolog: Option<PathBuf>,

    /// File whose contents replace the default epilogue template
    #[arg(long)]
    epilogue: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::C)]
    emit: EmitStage,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "blockc=debug"
    } else {
        "blockc=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!(
        model = %cli.model.display(),
        output = %cli.output.display(),
        emit = ?cli.emit,
        "starting"
    );

    // ── Read inputs ──
    let source = read_or_exit(&cli.model);
    let options = CodegenOptions {
        package: cli.package.clone(),
        prolog: cli
            .prolog
            .as_deref()
            .map(read_or_exit)
            .unwrap_or_else(|| DEFAULT_PROLOG.to_string()),
        epilogue: cli
            .epilogue
            .as_deref()
            .map(read_or_exit)
            .unwrap_or_else(|| DEFAULT_EPILOGUE.to_string()),
    };

    // ── Compile ──
    match cli.emit {
        EmitStage::C => {
            let compilation = pipeline::compile(&source, &options)
                .unwrap_or_else(|e| compile_error(&e, &source));
            write_output(&cli.output, &compilation.generated.c_source);
            tracing::debug!(
                blocks = compilation.graph.nodes().len(),
                order = ?pipeline_names(&compilation),
                "done"
            );
        }
        EmitStage::Ir => {
            let analysis = pipeline::analyze(&source)
                .unwrap_or_else(|e| compile_error(&e, &source));
            match pipeline::ir_json(&analysis) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("blockc: cannot serialize IR: {}", e);
                    std::process::exit(2);
                }
            }
        }
        EmitStage::Dot => {
            let analysis = pipeline::analyze(&source)
                .unwrap_or_else(|e| compile_error(&e, &source));
            let title = cli
                .model
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            print!("{}", blockc::dot::emit_dot(&analysis.graph, &title));
        }
        EmitStage::BuildInfo => {
            let provenance = pipeline::compute_provenance(&source, &options);
            print!("{}", provenance.to_json(&options));
        }
    }
}

fn pipeline_names(compilation: &blockc::Compilation) -> Vec<&str> {
    blockc::schedule::names(
        &compilation.graph,
        compilation.schedule.order.iter().copied(),
    )
}

fn compile_error(e: &blockc::Error, source: &str) -> ! {
    eprintln!("blockc: {}", e.render(Some(source)));
    std::process::exit(1);
}

fn read_or_exit(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("blockc: error: {}: {}", path.display(), e);
            std::process::exit(2);
        }
    }
}

fn write_output(path: &Path, text: &str) {
    let result = if path.as_os_str() == "-" {
        std::io::stdout().lock().write_all(text.as_bytes())
    } else {
        std::fs::write(path, text)
    };
    if let Err(e) = result {
        eprintln!("blockc: error: {}: {}", path.display(), e);
        std::process::exit(2);
    }
}
