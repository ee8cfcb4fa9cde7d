use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use wgslc::codegen::CodegenOptions;
use wgslc::diag::CodegenError;
use wgslc::pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    Wgsl,
    Attribs,
    Aot,
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "wgslc",
    version,
    about = "Lower typed kernel IR (JSON) to WebGPU shader programs"
)]
struct Cli {
    /// Input module (.json)
    source: PathBuf,

    /// Output file, or output directory for `--emit aot` (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Wgsl)]
    emit: EmitStage,

    /// Advisory dispatch size for ranges with run-time bounds
    #[arg(long)]
    max_invocations: Option<u32>,

    /// Workgroup size for range-for tasks that do not request one
    #[arg(long)]
    block_dim: Option<u32>,

    /// Log each generated kernel and task
    #[arg(long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "wgslc=debug" } else { "wgslc=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn fail(err: &CodegenError) -> ! {
    eprintln!("wgslc: {}", err.render());
    let status = match err {
        CodegenError::Io(_) => 2,
        _ => 1,
    };
    std::process::exit(status);
}

fn write_output(output: Option<&PathBuf>, text: &str) {
    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("wgslc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{}", text),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut options = CodegenOptions::default();
    if let Some(n) = cli.max_invocations {
        options.max_invocations = n;
    }
    if let Some(n) = cli.block_dim {
        options.default_block_dim = n;
    }
    tracing::debug!(source = %cli.source.display(), emit = ?cli.emit, "starting");

    // ── Read and parse source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("wgslc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };
    let module = pipeline::parse_module(&source).unwrap_or_else(|e| fail(&e));

    if cli.emit == EmitStage::BuildInfo {
        let provenance = pipeline::compute_provenance(&source, &module).unwrap_or_else(|e| fail(&e));
        write_output(cli.output.as_ref(), &provenance.to_json());
        return;
    }

    // ── Generate ──
    let builder = pipeline::compile_module(&module, options).unwrap_or_else(|e| fail(&e));

    match cli.emit {
        EmitStage::Wgsl => write_output(cli.output.as_ref(), &pipeline::render_wgsl(&builder)),
        EmitStage::Attribs => {
            let json = pipeline::render_attributes(&builder).unwrap_or_else(|e| fail(&e));
            write_output(cli.output.as_ref(), &json);
        }
        EmitStage::Aot => {
            let Some(dir) = cli.output.as_ref() else {
                eprintln!("wgslc: error: --emit aot requires -o <dir>");
                std::process::exit(2);
            };
            builder.dump(dir).unwrap_or_else(|e| fail(&e));
        }
        EmitStage::BuildInfo => {}
    }
}
