//! bfasm: a structured macro assembler for the eight-instruction tape machine.
//!
//! - `lex` turns source text into positioned tokens.
//! - `ast` parses them into a unit of named macros.
//! - `gen` inlines macros from the entry point and lowers `IF` / `WHILE`
//!   into label code over virtual registers.
//! - `labels` holds the label code model and its textual form.
//! - `alloc` places labels on the tape and emits `+-.,[]<>`.

pub mod alloc;
pub mod ast;
pub mod error;
pub mod gen;
pub mod labels;
pub mod lex;

pub use error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Macro the program starts from.
    pub entry: String,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            entry: "main".to_string(),
        }
    }
}

/// Every intermediate form of one compilation.
#[derive(Debug)]
pub struct Artifacts {
    pub unit: ast::Unit,
    pub labels: Vec<labels::Token>,
    pub code: String,
}

pub fn build(src: &str, options: &Options) -> Result<Artifacts> {
    let tokens = lex::lex(src)?;
    let unit = ast::parse(&tokens)?;
    let labels = gen::generate(&unit, &options.entry)?;
    let code = alloc::compile(labels.clone());

    Ok(Artifacts { unit, labels, code })
}

pub fn compile(src: &str) -> Result<String> {
    build(src, &Options::default()).map(|artifacts| artifacts.code)
}

/// Runs only the allocator on label code written in its textual form.
pub fn compile_labels(src: &str) -> Result<String> {
    let tokens = labels::parse(src)?;
    Ok(alloc::compile(tokens))
}
