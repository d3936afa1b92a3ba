//! Crate-level error type.
//!
//! Every stage reports its own error type; this module folds them into one
//! enum so the pipeline can bubble any of them up with `?`. All stage errors
//! that know where they happened render with the same prefix:
//! `Error at line L column C: ` or, at end of input, `Error : `.

use std::fmt;

use thiserror::Error;

use crate::{ast, gen, labels, lex::Position};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] crate::lex::Error),
    #[error(transparent)]
    Parse(#[from] ast::Error),
    #[error(transparent)]
    Compile(#[from] gen::Error),
    #[error(transparent)]
    Labels(#[from] labels::Error),
}

/// Display prefix for a staged error.
pub(crate) struct Located(Option<Position>);

impl Located {
    pub(crate) fn at(pos: &Position) -> Self {
        Located(Some(*pos))
    }

    pub(crate) fn maybe(pos: &Option<Position>) -> Self {
        Located(*pos)
    }

    pub(crate) fn end() -> Self {
        Located(None)
    }
}

impl fmt::Display for Located {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Some(pos) => write!(f, "Error at line {} column {}: ", pos.line, pos.column),
            None => f.write_str("Error : "),
        }
    }
}
