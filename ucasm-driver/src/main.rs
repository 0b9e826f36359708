//! Microcode assembler driver
//!
//! Reads one or more source files, assembles them as one unit against an
//! instruction table and writes the container (and, for raw formats, the
//! initvals files next to it).

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, LevelFilter};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use ucasm_assembler::{Assembler, Configuration, IsaTable, OutputFormat, SourceFile};
use ucasm_common::Diagnostic;

#[derive(Parser, Debug)]
#[command(name = "ucasm")]
#[command(about = "Two-pass assembler for wireless chip microcode")]
#[command(version)]
struct Args {
    /// Source files, assembled in order as one unit
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output file
    #[arg(short, long)]
    output: PathBuf,

    /// Instruction table: a JSON file or the name of a built-in table
    #[arg(long, default_value = "demo")]
    isa: String,

    /// Output format (raw-le32, raw-be32, framed)
    #[arg(short, long, default_value = "framed")]
    format: OutputFormat,

    /// 0 = quiet, 1 = verbose, 2 = trace
    #[arg(short, long, default_value_t = 0)]
    debug_level: u8,

    /// Print code and initvals sizes after a successful run
    #[arg(long)]
    print_sizes: bool,

    /// Extension appended to initvals file names
    #[arg(long = "initvals-ext", default_value = "")]
    initvals_ext: String,

    /// Write initvals files as offset/size/value records
    #[arg(long)]
    tlv_initvals: bool,

    /// Word address of the first code word
    #[arg(long, default_value = "0", value_parser = parse_number)]
    code_base: u32,

    /// Address the labels of each initvals section count from
    #[arg(long, default_value = "0", value_parser = parse_number)]
    initvals_base: u32,

    /// Print diagnostics to stderr as JSON
    #[arg(long)]
    diagnostics_json: bool,
}

impl Args {
    fn configuration(&self) -> Configuration {
        Configuration {
            debug_level: self.debug_level,
            print_sizes: self.print_sizes,
            initvals_extension: self.initvals_ext.clone(),
            output_format: self.format,
            code_base: self.code_base,
            initvals_base: self.initvals_base,
            tlv_initvals: self.tlv_initvals,
            ..Configuration::default()
        }
    }
}

/// Decimal or `0x` hexadecimal
fn parse_number(text: &str) -> Result<u32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", text, e))
}

fn level_filter(debug_level: u8) -> LevelFilter {
    match debug_level {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn load_isa(name: &str) -> Result<IsaTable> {
    if let Some(table) = IsaTable::builtin(name) {
        return Ok(table?);
    }
    let path = Path::new(name);
    if !path.exists() {
        bail!("'{}' is neither a built-in instruction table nor a file", name);
    }
    IsaTable::from_file(path).with_context(|| format!("loading instruction table {}", path.display()))
}

fn report(diagnostics: &[Diagnostic], as_json: bool) -> Result<()> {
    if as_json {
        eprintln!("{}", serde_json::to_string_pretty(diagnostics)?);
        return Ok(());
    }
    for diagnostic in diagnostics {
        eprintln!("{}", diagnostic);
    }
    Ok(())
}

/// Returns `false` when assembly reported errors
fn run(args: &Args) -> Result<bool> {
    let assembler = Assembler::new(load_isa(&args.isa)?, args.configuration());
    debug!("using instruction table '{}'", assembler.isa().name);
    let config = assembler.config();

    let mut sources = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        let contents = fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
        sources.push(SourceFile::new(input.display().to_string(), contents));
    }

    let output = match assembler.assemble(&sources) {
        Ok(output) => output,
        Err(failure) => {
            report(&failure.diagnostics, args.diagnostics_json)?;
            eprintln!("{}", failure);
            return Ok(false);
        }
    };
    report(&output.diagnostics, args.diagnostics_json)?;

    fs::write(&args.output, output.to_bytes()).with_context(|| format!("writing {}", args.output.display()))?;

    if config.output_format.is_raw() {
        let directory = args.output.parent().unwrap_or_else(|| Path::new(""));
        for (name, bytes) in output.initvals_files(config) {
            let path = directory.join(&name);
            fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
            debug!("wrote {}", path.display());
        }
    }

    if config.print_sizes {
        for line in output.size_report(&args.output.display().to_string(), config) {
            println!("{}", line);
        }
    }
    Ok(true)
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(level_filter(args.debug_level))
        .parse_default_env()
        .init();

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
