use std::{
    fs::File,
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
};

use asm65::{assembler::DEFAULT_ORIGIN, fileman::RealFileSystem, Assembler};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to input assembly file
    #[clap(parse(from_os_str), value_name = "FILE")]
    file: PathBuf,

    /// Path to output binary file (Default: stdout)
    #[clap(parse(from_os_str), short, long)]
    output: Option<PathBuf>,

    /// Load address of the program, in decimal or $/0x hex (Default: $C000)
    #[clap(long, parse(try_from_str = parse_address), value_name = "ADDRESS")]
    origin: Option<u16>,

    /// Omit the two-byte load address header
    #[clap(long)]
    raw: bool,

    /// Log assembler progress to stderr
    #[clap(short, long)]
    verbose: bool,
}

fn parse_address(s: &str) -> Result<u16, String> {
    let (digits, radix) = if let Some(digits) = s.strip_prefix('$') {
        (digits, 16)
    } else if let Some(digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (digits, 16)
    } else {
        (s, 10)
    };
    u16::from_str_radix(digits, radix).map_err(|e| format!("Invalid address \"{s}\": {e}"))
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => {
            eprintln!("Cannot determine the working directory: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut assembler = Assembler::new(RealFileSystem::new());
    assembler.set_origin(args.origin.unwrap_or(DEFAULT_ORIGIN));

    let image = match assembler.assemble(cwd, &args.file) {
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
        Ok(module) => match module.link() {
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
            Ok(image) => image,
        },
    };
    debug!(origin = image.origin, len = image.data.len(), "linked");

    let mut output: Box<dyn Write> = if let Some(path) = args.output {
        let result = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.clone());
        match result {
            Err(e) => {
                eprintln!("Cannot open file \"{}\" for writing: {e}", path.display());
                return ExitCode::FAILURE;
            }
            Ok(file) => Box::new(file),
        }
    } else {
        Box::new(io::stdout())
    };

    if let Err(e) = image.write(&mut output, !args.raw) {
        eprintln!("Failed to write output: {e}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
