//! arkc compiler CLI
//!
//! Main entry point for the `arkc` command.

use arkc::config::{ProjectConfig, find_project_sources};
use arkc::diagnostics::crash;
use arkc::{Compiler, CompilerOptions, DiagnosticEngine};
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use rustc_hash::FxHashSet;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "arkc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ahead-of-time bytecode compiler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Number of compile worker threads
    #[arg(long = "thread", value_name = "N", default_value_t = 2,
          value_parser = clap::value_parser!(u16).range(1..))]
    threads: u16,

    /// Treat warnings as errors
    #[arg(long)]
    werror: bool,

    /// Stop after parsing and binding
    #[arg(long)]
    parse_only: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a single source file
    Compile {
        /// Input file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output file
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Project config used for module naming and output placement
        #[arg(long, value_name = "PATH")]
        arktsconfig: Option<PathBuf>,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// Compile every source of a project
    Project {
        /// Project config (arktsconfig.json)
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// Print the sources a project would compile
    ListFiles {
        /// Project config (arktsconfig.json)
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// Show information about the compiler
    Info,
}

impl BuildArgs {
    fn options(&self) -> CompilerOptions {
        CompilerOptions {
            thread_count: usize::from(self.threads),
            werror: self.werror,
            parse_only: self.parse_only,
            ..CompilerOptions::default()
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    crash::install_signal_handler();

    let code = match cli.command {
        Commands::Compile {
            input,
            output,
            arktsconfig,
            build,
        } => {
            let options = CompilerOptions {
                output,
                arktsconfig,
                ..build.options()
            };
            Compiler::new(options).into_diagnostic()?.run_single(&input)
        }
        Commands::Project { config, build } => {
            Compiler::new(build.options())
                .into_diagnostic()?
                .run_project(&config)
        }
        Commands::ListFiles { config } => list_files(config)?,
        Commands::Info => {
            info();
            0
        }
    };
    std::process::exit(code)
}

fn list_files(path: PathBuf) -> Result<i32> {
    let diagnostics = DiagnosticEngine::new();
    let mut config = ProjectConfig::new(path);
    let mut visited = FxHashSet::default();
    if !config.parse(&mut visited, &diagnostics) || !config.resolve_all_dependencies(&diagnostics) {
        diagnostics.flush_diagnostic();
        return Ok(1);
    }
    for (source, destination) in find_project_sources(&config).into_diagnostic()? {
        println!("{} -> {}", source.display(), destination.display());
    }
    Ok(0)
}

fn info() {
    println!("arkc v{}", arkc::VERSION);
    println!();
    println!("Pipeline:");
    println!("  - arktsconfig.json resolution (extends, paths, dynamicPaths, dependencies)");
    println!("  - Parallel compile queue (one job per function scope)");
    println!("  - Bytecode listing output (.{})", arkc::config::BYTECODE_EXTENSION);
    println!();
    println!("Default worker threads: {}", arkc::compiler::queue::DEFAULT_THREAD_COUNT);
}
