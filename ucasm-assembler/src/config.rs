use crate::emitter::OutputFormat;
use serde::{Deserialize, Serialize};
use ucasm_frontend::DEFAULT_MAX_EXPANSION_DEPTH;

/// Resolved settings for one assembler run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// 0 = quiet, 1 = verbose, 2 = trace
    pub debug_level: u8,
    pub print_sizes: bool,
    /// Appended to the section name to form each initvals file name
    pub initvals_extension: String,
    pub output_format: OutputFormat,
    /// Word address of the first code word
    pub code_base: u32,
    /// Address the labels of each initvals section count from
    pub initvals_base: u32,
    pub max_macro_depth: usize,
    /// Write initvals files as offset/size/value records instead of the
    /// headered format
    pub tlv_initvals: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            debug_level: 0,
            print_sizes: false,
            initvals_extension: String::new(),
            output_format: OutputFormat::default(),
            code_base: 0,
            initvals_base: 0,
            max_macro_depth: DEFAULT_MAX_EXPANSION_DEPTH,
            tlv_initvals: false,
        }
    }
}

impl Configuration {
    pub fn is_verbose(&self) -> bool {
        self.debug_level >= 1
    }

    pub fn initvals_file_name(&self, section: &str) -> String {
        format!("{}{}", section, self.initvals_extension)
    }
}
