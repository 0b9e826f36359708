//! First pass: address assignment
//!
//! Walks the parsed nodes in order, assigning every label the current
//! cursor of its section and reserving space for every code item. Symbol
//! operands are not resolved here; each one becomes a relocation site that
//! the second pass discharges.

use crate::config::Configuration;
use crate::initvals::{InitvalsBuilder, InitvalsSection};
use crate::isa::IsaTable;
use crate::symbols::{Section, SymbolTable};
use log::{debug, trace};
use ucasm_common::{AsmError, DiagnosticKind, ErrorReporter, SourceLocation};
use ucasm_frontend::{DirectiveArg, DirectiveKind, Node, NodeKind, Operand};

/// Largest `.space` reservation accepted
const MAX_SPACE_WORDS: i64 = 0x10000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordValue {
    Literal(u32),
    Symbol(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKind {
    Instruction { mnemonic: String, operands: Vec<Operand> },
    /// Raw data from `.word` and `.space`
    Words(Vec<WordValue>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeItem {
    pub kind: ItemKind,
    pub address: u32,
    /// Size in words
    pub width: u32,
    pub location: SourceLocation,
}

/// A symbol operand waiting for its final value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationSite {
    /// Index into `Layout::items`
    pub item: usize,
    /// Operand index for instructions, word index for data
    pub slot: usize,
    pub symbol: String,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StartPoint {
    label: String,
    location: SourceLocation,
}

#[derive(Debug)]
pub struct Layout {
    pub items: Vec<CodeItem>,
    pub relocations: Vec<RelocationSite>,
    pub symbols: SymbolTable,
    pub initvals: Vec<InitvalsSection>,
    pub code_base: u32,
}

impl ItemKind {
    fn describe(&self) -> String {
        match self {
            ItemKind::Instruction { mnemonic, .. } => format!("instruction '{mnemonic}'"),
            ItemKind::Words(words) => format!("{} data word(s)", words.len()),
        }
    }
}

impl Layout {
    pub fn instruction_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item.kind, ItemKind::Instruction { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CurrentSection {
    Code,
    Initvals(usize),
}

pub struct LayoutPass<'a> {
    isa: &'a IsaTable,
    config: &'a Configuration,
    items: Vec<CodeItem>,
    relocations: Vec<RelocationSite>,
    symbols: SymbolTable,
    initvals: InitvalsBuilder,
    section: CurrentSection,
    code_cursor: u32,
    start: Option<StartPoint>,
    arch: Option<SourceLocation>,
    last_was_jump: bool,
}

impl<'a> LayoutPass<'a> {
    pub fn new(isa: &'a IsaTable, config: &'a Configuration) -> Self {
        Self {
            isa,
            config,
            items: Vec::new(),
            relocations: Vec::new(),
            symbols: SymbolTable::new(),
            initvals: InitvalsBuilder::new(),
            section: CurrentSection::Code,
            code_cursor: config.code_base,
            start: None,
            arch: None,
            last_was_jump: false,
        }
    }

    /// Lay out one source file. Every file starts in the code section.
    pub fn run(&mut self, nodes: &[Node], reporter: &mut ErrorReporter) {
        self.section = CurrentSection::Code;
        for node in nodes {
            if let Err(err) = self.visit(node, reporter) {
                reporter.report(err);
            }
        }
    }

    fn visit(&mut self, node: &Node, reporter: &mut ErrorReporter) -> Result<(), AsmError> {
        match &node.kind {
            NodeKind::Label(name) => {
                let (address, section) = match self.section {
                    CurrentSection::Code => (self.code_cursor, Section::Code),
                    CurrentSection::Initvals(index) => {
                        let section = self.initvals.section(index).map(|s| s.name.clone()).unwrap_or_default();
                        let count = self.initvals.entry_count(index);
                        let address = u32::try_from(count)
                            .ok()
                            .and_then(|count| self.config.initvals_base.checked_add(count))
                            .ok_or_else(|| AsmError::AddressOverflow {
                                location: node.location.clone(),
                                item: format!("label '{name}'"),
                                address: self.config.initvals_base,
                                width: u32::try_from(count).unwrap_or(u32::MAX),
                            })?;
                        (address, Section::Initvals(section))
                    }
                };
                trace!("label '{}' = {:#06x}", name, address);
                self.symbols.define(name, address, section, node.location.clone())
            }
            NodeKind::Instruction { mnemonic, operands } => {
                self.instruction(mnemonic, operands, &node.location, reporter)
            }
            NodeKind::Directive { kind, args } => self.directive(*kind, args, &node.location),
        }
    }

    fn require_code(&self, what: &str, location: &SourceLocation) -> Result<(), AsmError> {
        match self.section {
            CurrentSection::Code => Ok(()),
            CurrentSection::Initvals(_) => Err(AsmError::directive(
                location.clone(),
                format!("{what} is not allowed in an initvals section"),
            )),
        }
    }

    fn instruction(
        &mut self,
        mnemonic: &str,
        operands: &[Operand],
        location: &SourceLocation,
        reporter: &mut ErrorReporter,
    ) -> Result<(), AsmError> {
        self.require_code("an instruction", location)?;
        let def = self.isa.lookup(mnemonic).ok_or_else(|| AsmError::UnknownMnemonic {
            location: location.clone(),
            mnemonic: mnemonic.to_string(),
        })?;

        if def.hazard_after_jump && self.last_was_jump {
            reporter.warning(
                DiagnosticKind::Hazard,
                Some(location.clone()),
                format!("'{mnemonic}' at {location} directly follows a jump instruction"),
            );
        }
        self.last_was_jump = def.jump;

        let width = self.isa.width_of(def);
        let item = self.push_item(
            ItemKind::Instruction {
                mnemonic: mnemonic.to_string(),
                operands: operands.to_vec(),
            },
            width,
            location,
        )?;
        for (slot, operand) in operands.iter().enumerate() {
            if let Operand::Symbol(symbol) = operand {
                self.relocations.push(RelocationSite {
                    item,
                    slot,
                    symbol: symbol.clone(),
                    location: location.clone(),
                });
            }
        }
        Ok(())
    }

    /// Append a code item at the cursor; returns its index
    fn push_item(&mut self, kind: ItemKind, width: u32, location: &SourceLocation) -> Result<usize, AsmError> {
        let end = self
            .code_cursor
            .checked_add(width)
            .ok_or_else(|| AsmError::AddressOverflow {
                location: location.clone(),
                item: kind.describe(),
                address: self.code_cursor,
                width,
            })?;
        self.items.push(CodeItem {
            kind,
            address: self.code_cursor,
            width,
            location: location.clone(),
        });
        self.code_cursor = end;
        Ok(self.items.len() - 1)
    }

    fn directive(&mut self, kind: DirectiveKind, args: &[DirectiveArg], location: &SourceLocation) -> Result<(), AsmError> {
        match kind {
            DirectiveKind::Text => {
                self.section = CurrentSection::Code;
                Ok(())
            }
            DirectiveKind::Initvals => {
                let name = name_arg(kind, &args[0], location)?;
                self.section = CurrentSection::Initvals(self.initvals.select(&name, location));
                Ok(())
            }
            DirectiveKind::Space => {
                self.require_code(".space", location)?;
                let count = integer_arg(kind, &args[0], location)?;
                if !(0..=MAX_SPACE_WORDS).contains(&count) {
                    return Err(AsmError::directive(
                        location.clone(),
                        format!(".space count {count} outside 0..={MAX_SPACE_WORDS}"),
                    ));
                }
                if count > 0 {
                    self.last_was_jump = false;
                    self.push_item(
                        ItemKind::Words(vec![WordValue::Literal(0); count as usize]),
                        count as u32,
                        location,
                    )?;
                }
                Ok(())
            }
            DirectiveKind::Word => {
                self.require_code(".word", location)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    match arg {
                        DirectiveArg::Integer(value) => values.push(WordValue::Literal(word_literal(*value, location)?)),
                        DirectiveArg::Name(symbol) => values.push(WordValue::Symbol(symbol.clone())),
                    }
                }
                self.last_was_jump = false;
                let item = self.push_item(ItemKind::Words(values), args.len() as u32, location)?;
                for (slot, arg) in args.iter().enumerate() {
                    if let DirectiveArg::Name(symbol) = arg {
                        self.relocations.push(RelocationSite {
                            item,
                            slot,
                            symbol: symbol.clone(),
                            location: location.clone(),
                        });
                    }
                }
                Ok(())
            }
            DirectiveKind::Start => {
                let label = name_arg(kind, &args[0], location)?;
                if let Some(previous) = &self.start {
                    return Err(AsmError::directive(
                        location.clone(),
                        format!("multiple .start directives (first at {})", previous.location),
                    ));
                }
                self.start = Some(StartPoint {
                    label,
                    location: location.clone(),
                });
                Ok(())
            }
            DirectiveKind::Arch => {
                if let Some(previous) = &self.arch {
                    return Err(AsmError::directive(
                        location.clone(),
                        format!("multiple .arch directives (first at {previous})"),
                    ));
                }
                self.arch = Some(location.clone());
                let wanted = args[0].to_string();
                if !wanted.eq_ignore_ascii_case(&self.isa.name) {
                    return Err(AsmError::directive(
                        location.clone(),
                        format!("source is written for architecture '{}', but the instruction table is '{}'", wanted, self.isa.name),
                    ));
                }
                Ok(())
            }
            _ => {
                let CurrentSection::Initvals(index) = self.section else {
                    return Err(AsmError::directive(
                        location.clone(),
                        format!("{kind} is only allowed in an initvals section"),
                    ));
                };
                let values = args
                    .iter()
                    .map(|arg| integer_arg(kind, arg, location))
                    .collect::<Result<Vec<_>, _>>()?;
                self.initvals.write(index, kind, &values, location)?;
                Ok(())
            }
        }
    }

    /// Close the pass: place the start jump and check the size limit
    pub fn finish(mut self, reporter: &mut ErrorReporter) -> Layout {
        if let Some(start) = self.start.clone() {
            if let Err(err) = self.place_start_jump(&start, reporter) {
                reporter.report(err);
            }
        }

        let layout = Layout {
            items: self.items,
            relocations: self.relocations,
            symbols: self.symbols,
            initvals: self.initvals.finish(),
            code_base: self.config.code_base,
        };

        let count = layout.instruction_count();
        if let Some(limit) = self.isa.max_instructions {
            if count > limit {
                reporter.warning(
                    DiagnosticKind::SizeLimit,
                    None,
                    format!("{count} instructions exceed the {limit} the '{}' core can hold", self.isa.name),
                );
            }
        }
        debug!(
            "layout: {} item(s), {} symbol(s), {} relocation(s)",
            layout.items.len(),
            layout.symbols.len(),
            layout.relocations.len()
        );
        layout
    }

    fn place_start_jump(&mut self, start: &StartPoint, reporter: &mut ErrorReporter) -> Result<(), AsmError> {
        let symbol = self.symbols.lookup(&start.label).ok_or_else(|| AsmError::UndefinedSymbol {
            name: start.label.clone(),
            location: start.location.clone(),
        })?;
        if symbol.section != Section::Code {
            return Err(AsmError::directive(
                start.location.clone(),
                format!("start label '{}' is not in the code section", start.label),
            ));
        }

        let base = self.config.code_base;
        let Some(jump) = self.isa.start_jump.clone() else {
            return Ok(());
        };
        if symbol.address == base {
            debug!("start label '{}' is already at {:#06x}", start.label, base);
            return Ok(());
        }
        let def = self.isa.lookup(&jump).ok_or_else(|| AsmError::Internal {
            message: format!("start jump '{jump}' missing from table"),
        })?;
        let width = self.isa.width_of(def);
        let jump_is_jump = def.jump;

        let overflow = || AsmError::AddressOverflow {
            location: start.location.clone(),
            item: format!("code after the start jump '{jump}'"),
            address: self.code_cursor,
            width,
        };
        let end = self.code_cursor.checked_add(width).ok_or_else(overflow)?;
        for item in &mut self.items {
            item.address = item.address.checked_add(width).ok_or_else(overflow)?;
        }
        for site in &mut self.relocations {
            site.item += 1;
        }
        self.symbols.shift_code(base, width)?;

        self.items.insert(
            0,
            CodeItem {
                kind: ItemKind::Instruction {
                    mnemonic: jump,
                    operands: vec![Operand::Symbol(start.label.clone())],
                },
                address: base,
                width,
                location: start.location.clone(),
            },
        );
        self.relocations.insert(
            0,
            RelocationSite {
                item: 0,
                slot: 0,
                symbol: start.label.clone(),
                location: start.location.clone(),
            },
        );
        self.code_cursor = end;

        if let Some(CodeItem {
            kind: ItemKind::Instruction { mnemonic, .. },
            location,
            ..
        }) = self.items.get(1)
        {
            if jump_is_jump && self.isa.lookup(mnemonic).is_some_and(|d| d.hazard_after_jump) {
                reporter.warning(
                    DiagnosticKind::Hazard,
                    Some(location.clone()),
                    format!("'{mnemonic}' at {location} directly follows the start jump"),
                );
            }
        }
        Ok(())
    }
}

fn integer_arg(kind: DirectiveKind, arg: &DirectiveArg, location: &SourceLocation) -> Result<i64, AsmError> {
    match arg {
        DirectiveArg::Integer(value) => Ok(*value),
        DirectiveArg::Name(name) => Err(AsmError::directive(
            location.clone(),
            format!("{kind} expects a number, found '{name}'"),
        )),
    }
}

fn name_arg(kind: DirectiveKind, arg: &DirectiveArg, location: &SourceLocation) -> Result<String, AsmError> {
    match arg {
        DirectiveArg::Name(name) => Ok(name.clone()),
        DirectiveArg::Integer(value) => Err(AsmError::directive(
            location.clone(),
            format!("{kind} expects a name, found {value}"),
        )),
    }
}

/// `.word` accepts anything representable in 32 bits, signed or not
fn word_literal(value: i64, location: &SourceLocation) -> Result<u32, AsmError> {
    if (i64::from(i32::MIN)..=i64::from(u32::MAX)).contains(&value) {
        Ok(value as u32)
    } else {
        Err(AsmError::ImmediateOverflow {
            location: location.clone(),
            value,
            min: i64::from(i32::MIN),
            max: i64::from(u32::MAX),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use ucasm_frontend::{parse_source, MacroExpander};

    fn demo() -> IsaTable {
        IsaTable::builtin("demo").unwrap().unwrap()
    }

    fn lay_out(source: &str, config: &Configuration) -> (Layout, ErrorReporter) {
        let isa = demo();
        let nodes = parse_source("l.asm", source, &mut MacroExpander::new(), &isa).unwrap();
        let mut reporter = ErrorReporter::new();
        let mut pass = LayoutPass::new(&isa, config);
        pass.run(&nodes, &mut reporter);
        let layout = pass.finish(&mut reporter);
        (layout, reporter)
    }

    fn address(layout: &Layout, name: &str) -> Option<u32> {
        layout.symbols.lookup(name).map(|s| s.address)
    }

    #[test]
    fn test_addresses_follow_widths() {
        let source = indoc! {"
            a: nop
            b: halt
            c: .word 1, 2, 3
            d: .space 4
            e: nop
        "};
        let (layout, reporter) = lay_out(source, &Configuration::default());
        assert!(!reporter.has_errors());
        assert_eq!(address(&layout, "a"), Some(0));
        assert_eq!(address(&layout, "b"), Some(2));
        assert_eq!(address(&layout, "c"), Some(3));
        assert_eq!(address(&layout, "d"), Some(6));
        assert_eq!(address(&layout, "e"), Some(10));
        assert_eq!(layout.instruction_count(), 3);
    }

    #[test]
    fn test_code_base_offsets_everything() {
        let config = Configuration {
            code_base: 0x100,
            ..Configuration::default()
        };
        let (layout, _) = lay_out("nop\nhere: nop\n", &config);
        assert_eq!(address(&layout, "here"), Some(0x102));
        assert_eq!(layout.items[0].address, 0x100);
    }

    #[test]
    fn test_relocation_sites_record_forward_references() {
        let (layout, reporter) = lay_out("jmp later\n.word later, 5\nlater: nop\n", &Configuration::default());
        assert!(!reporter.has_errors());
        assert_eq!(
            layout.relocations,
            vec![
                RelocationSite {
                    item: 0,
                    slot: 0,
                    symbol: "later".to_string(),
                    location: SourceLocation::new("l.asm", 1, 1),
                },
                RelocationSite {
                    item: 1,
                    slot: 0,
                    symbol: "later".to_string(),
                    location: SourceLocation::new("l.asm", 2, 1),
                },
            ]
        );
    }

    #[test]
    fn test_duplicate_label() {
        let (_, reporter) = lay_out("x: nop\nnop\nx: nop\n", &Configuration::default());
        assert!(matches!(
            reporter.errors(),
            [AsmError::DuplicateSymbol { name, first, second }] if name == "x" && first.line == 1 && second.line == 3
        ));
    }

    #[test]
    fn test_unknown_mnemonic_reported_in_first_pass() {
        let (_, reporter) = lay_out("nop\nwibble r1\nfrob\n", &Configuration::default());
        assert_eq!(reporter.error_count(), 2);
        assert!(reporter.errors().iter().all(|e| matches!(e, AsmError::UnknownMnemonic { .. })));
    }

    #[test]
    fn test_initvals_sections() {
        let source = indoc! {"
            nop
            .initvals b0g0
            first: .mmio16 0x1234, 0x0120
            second: .phy 0x0001, 0x0002
            third:
            .text
            after: nop
        "};
        let config = Configuration {
            initvals_base: 0x40,
            ..Configuration::default()
        };
        let (layout, reporter) = lay_out(source, &config);
        assert!(!reporter.has_errors(), "{:?}", reporter.errors());
        assert_eq!(layout.initvals.len(), 1);
        assert_eq!(layout.initvals[0].entries.len(), 3);
        assert_eq!(address(&layout, "first"), Some(0x40));
        assert_eq!(address(&layout, "second"), Some(0x41));
        assert_eq!(address(&layout, "third"), Some(0x43));
        assert_eq!(address(&layout, "after"), Some(2));
    }

    #[test]
    fn test_section_misuse() {
        let source = indoc! {"
            .mmio16 1, 2
            .initvals s
            nop
            .word 1
        "};
        let (_, reporter) = lay_out(source, &Configuration::default());
        assert_eq!(reporter.error_count(), 3);
        assert!(reporter.errors().iter().all(|e| matches!(e, AsmError::Directive { .. })));
    }

    #[test]
    fn test_hazard_warning() {
        let (_, reporter) = lay_out("jmp x\nret lr0\nx: nop\nret lr0\n", &Configuration::default());
        assert!(!reporter.has_errors());
        assert_eq!(reporter.warning_count(), 1);
        assert_eq!(reporter.diagnostics()[0].kind, DiagnosticKind::Hazard);
        assert_eq!(reporter.diagnostics()[0].location.as_ref().map(|l| l.line), Some(2));
    }

    #[test]
    fn test_start_jump_is_prepended() {
        let source = indoc! {"
            helper: ret lr0
            entry: jmp helper
            .start entry
        "};
        let (layout, reporter) = lay_out(source, &Configuration::default());
        assert!(!reporter.has_errors());
        assert_eq!(address(&layout, "helper"), Some(2));
        assert_eq!(address(&layout, "entry"), Some(4));
        assert_eq!(
            layout.items[0].kind,
            ItemKind::Instruction {
                mnemonic: "jmp".to_string(),
                operands: vec![Operand::Symbol("entry".to_string())],
            }
        );
        assert_eq!(layout.relocations[0].symbol, "entry");
        assert_eq!(layout.relocations[1].item, 2);
    }

    #[test]
    fn test_start_at_base_needs_no_jump() {
        let (layout, reporter) = lay_out(".start main\nmain: nop\n", &Configuration::default());
        assert!(!reporter.has_errors());
        assert_eq!(layout.items.len(), 1);
        assert_eq!(address(&layout, "main"), Some(0));
    }

    #[test]
    fn test_start_errors() {
        let (_, reporter) = lay_out(".start nowhere\nnop\n", &Configuration::default());
        assert!(matches!(reporter.errors(), [AsmError::UndefinedSymbol { name, .. }] if name == "nowhere"));

        let (_, reporter) = lay_out(".start a\n.start a\na: nop\n", &Configuration::default());
        assert!(matches!(reporter.errors(), [AsmError::Directive { .. }]));
    }

    #[test]
    fn test_arch_must_match_table() {
        let (_, reporter) = lay_out(".arch demo\nnop\n", &Configuration::default());
        assert!(!reporter.has_errors());

        let (_, reporter) = lay_out(".arch b43v15\n.arch demo\n", &Configuration::default());
        assert_eq!(reporter.error_count(), 2);
    }

    #[test]
    fn test_code_base_at_top_of_address_space() {
        let config = Configuration {
            code_base: u32::MAX - 2,
            ..Configuration::default()
        };
        let (layout, reporter) = lay_out("first: nop
nop
", &config);
        assert_eq!(address(&layout, "first"), Some(u32::MAX - 2));
        assert_eq!(
            reporter.errors(),
            &[AsmError::AddressOverflow {
                location: SourceLocation::new("l.asm", 2, 1),
                item: "instruction 'nop'".to_string(),
                address: u32::MAX,
                width: 2,
            }]
        );

        let config = Configuration {
            code_base: u32::MAX,
            ..Configuration::default()
        };
        let (layout, reporter) = lay_out(".word 1, 2
nop
", &config);
        assert_eq!(reporter.error_count(), 2);
        assert!(reporter.errors().iter().all(|e| matches!(e, AsmError::AddressOverflow { .. })));
        assert!(layout.items.is_empty());
        assert!(layout.relocations.is_empty());
    }

    #[test]
    fn test_initvals_base_at_top_of_address_space() {
        let source = indoc! {"
            .initvals a
            first: .mmio16 1, 2
            second: .mmio16 1, 2
        "};
        let config = Configuration {
            initvals_base: u32::MAX,
            ..Configuration::default()
        };
        let (layout, reporter) = lay_out(source, &config);
        assert_eq!(address(&layout, "first"), Some(u32::MAX));
        assert!(matches!(
            reporter.errors(),
            [AsmError::AddressOverflow { item, width: 1, .. }] if item == "label 'second'"
        ));
    }

    #[test]
    fn test_start_jump_past_address_space() {
        let config = Configuration {
            code_base: u32::MAX - 4,
            ..Configuration::default()
        };
        let (_, reporter) = lay_out("a: nop
entry: nop
.start entry
", &config);
        assert!(matches!(
            reporter.errors(),
            [AsmError::AddressOverflow { location, .. }] if location.line == 3
        ));
    }

    #[test]
    fn test_hazard_after_start_jump() {
        let source = indoc! {"
            .start entry
            sub: ret lr0
            entry: jmp sub
        "};
        let (layout, reporter) = lay_out(source, &Configuration::default());
        assert!(!reporter.has_errors());
        assert_eq!(layout.items.len(), 3);
        assert_eq!(reporter.warning_count(), 1);
        assert_eq!(reporter.diagnostics()[0].kind, DiagnosticKind::Hazard);
        assert_eq!(reporter.diagnostics()[0].location.as_ref().map(|l| l.line), Some(2));
    }
}
