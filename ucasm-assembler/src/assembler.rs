//! Assembly pipeline
//!
//! Runs the frontend over every source file, then layout and resolution,
//! and packages the code image, initvals sections and diagnostics.

use crate::config::Configuration;
use crate::emitter::{self, CodeImage, OutputFormat};
use crate::initvals::InitvalsSection;
use crate::isa::IsaTable;
use crate::layout::LayoutPass;
use crate::resolve::Resolver;
use crate::symbols::SymbolTable;
use log::{debug, info};
use std::io::{Read, Write};
use thiserror::Error;
use ucasm_common::{AsmError, Diagnostic, ErrorReporter};
use ucasm_frontend::{parse_source, MacroExpander};

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub contents: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }
}

/// Everything a successful run produced
#[derive(Debug)]
pub struct AssemblyOutput {
    pub image: CodeImage,
    pub initvals: Vec<InitvalsSection>,
    pub symbols: SymbolTable,
    /// Warnings only
    pub diagnostics: Vec<Diagnostic>,
    pub format: OutputFormat,
}

impl AssemblyOutput {
    /// The container in the configured format
    pub fn to_bytes(&self) -> Vec<u8> {
        emitter::emit(&self.image, &self.initvals, self.format)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), AsmError> {
        writer.write_all(&self.to_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Separate initvals files as (file name, contents), in section order
    pub fn initvals_files(&self, config: &Configuration) -> Vec<(String, Vec<u8>)> {
        self.initvals
            .iter()
            .map(|section| {
                (
                    config.initvals_file_name(&section.name),
                    emitter::emit_initvals_file(section, config.tlv_initvals),
                )
            })
            .collect()
    }

    /// Lines for `--print-sizes`
    pub fn size_report(&self, output_name: &str, config: &Configuration) -> Vec<String> {
        let mut lines = vec![format!(
            "{}:  text = {} instructions ({} bytes)",
            output_name,
            self.image.instruction_count,
            self.image.byte_len()
        )];
        for section in &self.initvals {
            let bytes = if config.tlv_initvals {
                section.entries.len() * 8
            } else {
                section.raw_len()
            };
            lines.push(format!(
                "{}:  {} values ({} bytes)",
                config.initvals_file_name(&section.name),
                section.entries.len(),
                bytes
            ));
        }
        lines
    }
}

#[derive(Debug, Error)]
#[error("assembly failed: {summary}")]
pub struct AssemblyFailure {
    pub errors: Vec<AsmError>,
    /// Errors and any warnings reported before the failure, in order
    pub diagnostics: Vec<Diagnostic>,
    summary: String,
}

impl From<ErrorReporter> for AssemblyFailure {
    fn from(reporter: ErrorReporter) -> Self {
        let summary = reporter.summary();
        let (errors, diagnostics) = reporter.into_parts();
        Self {
            errors,
            diagnostics,
            summary,
        }
    }
}

impl From<AsmError> for AssemblyFailure {
    fn from(err: AsmError) -> Self {
        let mut reporter = ErrorReporter::new();
        reporter.report(err);
        reporter.into()
    }
}

/// Runs the whole pipeline for one assembly unit
pub struct Assembler {
    isa: IsaTable,
    config: Configuration,
}

impl Assembler {
    pub fn new(isa: IsaTable, config: Configuration) -> Self {
        Self { isa, config }
    }

    pub fn isa(&self) -> &IsaTable {
        &self.isa
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn assemble_str(&self, name: &str, source: &str) -> Result<AssemblyOutput, AssemblyFailure> {
        self.assemble(&[SourceFile::new(name, source)])
    }

    /// Assemble `sources` as one unit: macros and symbols are shared and
    /// code is laid out in file order. Each stage runs only if every
    /// earlier stage succeeded.
    pub fn assemble(&self, sources: &[SourceFile]) -> Result<AssemblyOutput, AssemblyFailure> {
        let mut reporter = ErrorReporter::new();
        let mut expander = MacroExpander::with_max_depth(self.config.max_macro_depth);

        let mut units = Vec::with_capacity(sources.len());
        for source in sources {
            match parse_source(&source.name, &source.contents, &mut expander, &self.isa) {
                Ok(nodes) => units.push(nodes),
                Err(errors) => reporter.extend(errors),
            }
        }
        if reporter.has_errors() {
            return Err(reporter.into());
        }

        let mut pass = LayoutPass::new(&self.isa, &self.config);
        for nodes in &units {
            pass.run(nodes, &mut reporter);
        }
        let layout = pass.finish(&mut reporter);
        if reporter.has_errors() {
            return Err(reporter.into());
        }

        let image = Resolver::new(&self.isa, &layout.symbols).resolve(&layout, &mut reporter);
        if reporter.has_errors() {
            return Err(reporter.into());
        }

        if self.config.is_verbose() {
            for symbol in layout.symbols.iter() {
                debug!("symbol {:<24} {:#06x} {:?}", symbol.name, symbol.address, symbol.section);
            }
        }
        info!(
            "assembled {} instruction(s) in {} word(s), {} initvals section(s), {}",
            image.instruction_count,
            image.words.len(),
            layout.initvals.len(),
            reporter.summary()
        );

        let (_, diagnostics) = reporter.into_parts();
        Ok(AssemblyOutput {
            image,
            initvals: layout.initvals,
            symbols: layout.symbols,
            diagnostics,
            format: self.config.output_format,
        })
    }

    /// Read one source from `reader` and write the container to `writer`.
    /// Nothing is written unless assembly succeeds.
    pub fn assemble_stream<R: Read, W: Write>(
        &self,
        name: &str,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<AssemblyOutput, AssemblyFailure> {
        let mut source = String::new();
        reader.read_to_string(&mut source).map_err(AsmError::from)?;
        let output = self.assemble_str(name, &source)?;
        output.write_to(writer)?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use ucasm_common::DiagnosticKind;

    fn assembler(format: OutputFormat) -> Assembler {
        let config = Configuration {
            output_format: format,
            ..Configuration::default()
        };
        Assembler::new(IsaTable::builtin("demo").unwrap().unwrap(), config)
    }

    #[test]
    fn test_frontend_errors_stop_before_layout() {
        // The duplicate label would be a layout error; it must not appear
        let source = "x: nop\nx: nop\nadd r1,, r2\n";
        let failure = assembler(OutputFormat::Framed).assemble_str("a.asm", source).unwrap_err();
        assert_eq!(failure.errors.len(), 1);
        assert!(matches!(failure.errors[0], AsmError::Syntax { .. }));
    }

    #[test]
    fn test_errors_from_every_file_are_collected() {
        let sources = [
            SourceFile::new("one.asm", "nop $\n"),
            SourceFile::new("two.asm", "nop\n, x\n"),
        ];
        let failure = assembler(OutputFormat::Framed).assemble(&sources).unwrap_err();
        let files: Vec<String> = failure
            .diagnostics
            .iter()
            .filter_map(|d| d.location.as_ref().map(|l| l.filename.clone()))
            .collect();
        assert_eq!(files, vec!["one.asm".to_string(), "two.asm".to_string()]);
    }

    #[test]
    fn test_macros_and_labels_span_files() {
        let sources = [
            SourceFile::new("defs.asm", ".macro goto where\n jmp where\n.endm\n"),
            SourceFile::new("main.asm", "goto done\nnop\ndone: nop\n"),
        ];
        let output = assembler(OutputFormat::RawLe32).assemble(&sources).unwrap();
        assert_eq!(output.image.words.len(), 6);
        assert_eq!(output.image.words[0] & 0xFFFF, 4);
    }

    #[test]
    fn test_warnings_survive_success() {
        let output = assembler(OutputFormat::Framed).assemble_str("w.asm", "jmp x\nx: ret lr0\n").unwrap();
        assert_eq!(output.diagnostics.len(), 1);
        assert_eq!(output.diagnostics[0].kind, DiagnosticKind::Hazard);
    }

    #[test]
    fn test_stream_writes_only_on_success() {
        let asm = assembler(OutputFormat::RawBe32);

        let mut sink = Vec::new();
        let output = asm.assemble_stream("s.asm", &mut "nop\n".as_bytes(), &mut sink).unwrap();
        assert_eq!(sink, output.to_bytes());
        assert_eq!(sink.len(), 8);

        let mut sink = Vec::new();
        assert!(asm.assemble_stream("s.asm", &mut "jmp missing\n".as_bytes(), &mut sink).is_err());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_size_report_and_initvals_files() {
        let source = indoc! {"
            nop
            halt
            .initvals b0g0
            .mmio16 0x0001, 0x0002
            .mmio32 0x00000003, 0x0004
        "};
        let config = Configuration {
            initvals_extension: ".initval".to_string(),
            ..Configuration::default()
        };
        let asm = Assembler::new(IsaTable::builtin("demo").unwrap().unwrap(), config.clone());
        let output = asm.assemble_str("s.asm", source).unwrap();

        assert_eq!(
            output.size_report("ucode.fw", &config),
            vec![
                "ucode.fw:  text = 2 instructions (12 bytes)".to_string(),
                "b0g0.initval:  2 values (10 bytes)".to_string(),
            ]
        );
        let files = output.initvals_files(&config);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "b0g0.initval");
        assert_eq!(files[0].1.len(), 8 + 10);
    }

    #[test]
    fn test_failure_display() {
        let failure = assembler(OutputFormat::Framed).assemble_str("f.asm", "jmp a\njmp b\n").unwrap_err();
        assert_eq!(failure.to_string(), "assembly failed: 2 errors");
    }
}
