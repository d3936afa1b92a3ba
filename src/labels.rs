//! Label IR: plain tape ops interleaved with virtual-register labels and
//! scope markers.
//!
//! The IR is produced by [`crate::gen`] and can also be written by hand in a
//! small textual notation:
//!
//! ```text
//! { temp0[-]+ temp1(2)- }
//! ```
//!
//! Identifiers are labels, numbered from 1 in order of first appearance; an
//! optional `(n)` suffix selects element `n` of a multi-cell label; braces
//! open and close scopes. Whitespace is insignificant.

use std::{
    collections::HashMap,
    fmt::{self, Display},
    iter::Peekable,
    str::CharIndices,
};

use thiserror::Error;

use crate::error::Located;

/// Largest element index a label may carry.
pub const MAX_ELEMENT: usize = u16::MAX as usize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Label {
    pub id: usize,
    /// Cell offset inside a multi-cell label.
    pub element: usize,
    /// Scope the occurrence sits in; filled in by the allocator.
    pub scope: usize,
}

impl Label {
    pub fn new(id: usize, element: usize) -> Self {
        Label {
            id,
            element,
            scope: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Enter,
    Exit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token {
    Op(char),
    Label(Label),
    Scope(Scope),
}

impl From<char> for Token {
    fn from(op: char) -> Self {
        Token::Op(op)
    }
}

impl From<Label> for Token {
    fn from(label: Label) -> Self {
        Token::Label(label)
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Token::Op(op) => write!(f, "{}", op),
            Token::Label(label) if label.element == 0 => write!(f, "var{}", label.id),
            Token::Label(label) => write!(f, "var{}({})", label.id, label.element),
            Token::Scope(Scope::Enter) => f.write_str("{"),
            Token::Scope(Scope::Exit) => f.write_str("}"),
        }
    }
}

/// Prints a token sequence in the textual notation accepted by [`parse`].
pub struct Listing<'a>(pub &'a [Token]);

impl Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut prev: Option<&Token> = None;
        for token in self.0 {
            // two bare labels in a row would read back as one identifier
            if let (Some(Token::Label(a)), Token::Label(_)) = (prev, token) {
                if a.element == 0 {
                    f.write_str(" ")?;
                }
            }
            token.fmt(f)?;
            prev = Some(token);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("{at}invalid label at offset {offset}", at = Located::end())]
    InvalidLabel { offset: usize },
    #[error("{at}bad character {found:?} at offset {offset}", at = Located::end())]
    BadCharacter { offset: usize, found: char },
    #[error("{at}invalid element index at offset {offset}", at = Located::end())]
    InvalidIndex { offset: usize },
    #[error("{at}unexpected parenthesis at offset {offset}", at = Located::end())]
    UnexpectedParens { offset: usize },
    #[error("{at}unclosed parenthesis at offset {offset}", at = Located::end())]
    ParensUnclosed { offset: usize },
}

struct ParserState<'a> {
    src: &'a str,
    iter: Peekable<CharIndices<'a>>,
    ids: HashMap<&'a str, usize>,
    last_id: usize,
}

impl<'a> ParserState<'a> {
    fn offset(&mut self) -> usize {
        self.iter.peek().map_or(self.src.len(), |&(i, _)| i)
    }

    fn skip_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.offset();
        while self.iter.next_if(|&(_, c)| pred(c)).is_some() {}
        let end = self.offset();
        &self.src[start..end]
    }

    fn get_label(&mut self, ident: &'a str) -> usize {
        if let Some(&id) = self.ids.get(ident) {
            return id;
        }
        self.last_id += 1;
        self.ids.insert(ident, self.last_id);
        self.last_id
    }
}

fn parse_label(state: &mut ParserState) -> Result<Label, Error> {
    let start = state.offset();
    let ident = state.skip_while(|c| c.is_ascii_alphanumeric());
    if !ident.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(Error::InvalidLabel { offset: start });
    }
    let id = state.get_label(ident);

    state.skip_while(char::is_whitespace);
    let Some((open, _)) = state.iter.next_if(|&(_, c)| c == '(') else {
        return Ok(Label::new(id, 0));
    };

    state.skip_while(char::is_whitespace);
    let digits_at = state.offset();
    let digits = state.skip_while(|c| c.is_ascii_digit());
    state.skip_while(char::is_whitespace);

    if state.iter.next_if(|&(_, c)| c == ')').is_none() {
        return Err(Error::ParensUnclosed { offset: open });
    }

    let element = match digits {
        "" => 0,
        digits => digits
            .parse::<usize>()
            .ok()
            .filter(|&element| element <= MAX_ELEMENT)
            .ok_or(Error::InvalidIndex { offset: digits_at })?,
    };

    Ok(Label::new(id, element))
}

fn next(state: &mut ParserState) -> Result<Option<Token>, Error> {
    loop {
        let Some(&(offset, c)) = state.iter.peek() else {
            return Ok(None);
        };

        let token = match c {
            '+' | '-' | '.' | ',' | '<' | '>' | '[' | ']' => Token::Op(c),
            '{' => Token::Scope(Scope::Enter),
            '}' => Token::Scope(Scope::Exit),
            '(' | ')' => return Err(Error::UnexpectedParens { offset }),
            c if c.is_whitespace() => {
                state.iter.next();
                continue;
            }
            c if c.is_ascii_alphanumeric() => return parse_label(state).map(|l| Some(l.into())),
            found => return Err(Error::BadCharacter { offset, found }),
        };

        state.iter.next();
        return Ok(Some(token));
    }
}

/// Parses label IR text into tokens.
pub fn parse(src: &str) -> Result<Vec<Token>, Error> {
    let mut state = ParserState {
        src,
        iter: src.char_indices().peekable(),
        ids: HashMap::new(),
        last_id: 0,
    };
    let mut tokens = Vec::new();

    while let Some(token) = next(&mut state)? {
        tokens.push(token);
    }

    tracing::debug!(tokens = tokens.len(), labels = state.last_id, "parsed label text");
    Ok(tokens)
}
