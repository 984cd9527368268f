//! Command-line entry point for the Spyre toolchain: `compile` turns source
//! into assembly text, `asm` turns assembly text into a binary image, `run`
//! loads a binary image and executes it.

mod error;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use error::CliError;
use spyre_asm::assemble;
use spyre_core::image::BinaryImage;
use spyre_vm::{OptionFlags, Vm};

#[derive(Parser)]
#[command(name = "spyre")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Assemble, compile, and run Spyre programs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble a `.spys` text file into a `.spyb` binary image
    #[command(alias = "a")]
    Asm {
        /// Assembly source (conventionally `.spys`)
        file: PathBuf,
        /// Output path (defaults to `file` with a `.spyb` extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compile a `.spy` source file into `.spys` assembly text
    #[command(alias = "c")]
    Compile {
        /// Spyre source file (conventionally `.spy`)
        file: PathBuf,
        /// Output path (defaults to `file` with a `.spys` extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Constant-folding / dead-branch optimization level (0 disables it)
        #[arg(short = 'O', long, default_value_t = 1)]
        opt_level: u8,
    },

    /// Run a `.spyb` binary image
    #[command(alias = "r")]
    Run {
        /// Binary image (conventionally `.spyb`)
        file: PathBuf,
        /// Arguments forwarded to the guest program (not yet read by any
        /// host function; accepted for `main.c`'s argv-passing parity)
        #[arg(last = true)]
        args: Vec<String>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Asm { file, output } => run_asm(&file, output.as_deref()),
        Commands::Compile { file, output, opt_level } => run_compile(&file, output.as_deref(), opt_level),
        Commands::Run { file, args } => run_run(&file, &args),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("spyre: {e}");
            ExitCode::FAILURE
        }
    }
}

fn with_extension(path: &Path, ext: &str) -> PathBuf {
    path.with_extension(ext)
}

fn run_asm(file: &Path, output: Option<&Path>) -> Result<u8, CliError> {
    let source = fs::read_to_string(file)?;
    let image = assemble(&source)?;
    let out_path = output.map(PathBuf::from).unwrap_or_else(|| with_extension(file, "spyb"));
    fs::write(&out_path, image.to_bytes())?;
    tracing::info!(output = %out_path.display(), "assembled binary image");
    Ok(0)
}

fn run_compile(file: &Path, output: Option<&Path>, opt_level: u8) -> Result<u8, CliError> {
    let source = fs::read_to_string(file)?;
    let asm = spyre_compiler::compile(&source, opt_level)?;
    let out_path = output.map(PathBuf::from).unwrap_or_else(|| with_extension(file, "spys"));
    fs::write(&out_path, asm)?;
    tracing::info!(output = %out_path.display(), "compiled assembly text");
    Ok(0)
}

fn run_run(file: &Path, args: &[String]) -> Result<u8, CliError> {
    if !args.is_empty() {
        tracing::debug!(?args, "program arguments are accepted but not forwarded to the guest");
    }
    let bytes = fs::read(file)?;
    let image = BinaryImage::from_bytes(&bytes)?;

    let flags = OptionFlags { debug: std::env::var_os("SPY_DEBUG").is_some(), step: std::env::var_os("SPY_STEP").is_some() };
    let mut vm = Vm::new(flags);
    vm.load(&image);
    let result = vm.run()?;
    Ok((result & 0xFF) as u8)
}
