use std::{
    fmt::{self, Display},
    iter::Peekable,
    str::Chars,
};

use thiserror::Error;

use crate::error::Located;

/// Line and column of a token, both starting at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keyword {
    Macro,
    If,
    Else,
    While,
    Use,
}

impl Keyword {
    fn from_ident(ident: &str) -> Option<Self> {
        match ident {
            "MACRO" => Some(Keyword::Macro),
            "IF" => Some(Keyword::If),
            "ELSE" => Some(Keyword::Else),
            "WHILE" => Some(Keyword::While),
            "USE" => Some(Keyword::Use),
            _ => None,
        }
    }
}

impl Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Keyword::Macro => "MACRO",
            Keyword::If => "IF",
            Keyword::Else => "ELSE",
            Keyword::While => "WHILE",
            Keyword::Use => "USE",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    LCurly,
    RCurly,
    LParen,
    RParen,
    Colon,
    Arrow,
}

impl Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Control::LCurly => "{",
            Control::RCurly => "}",
            Control::LParen => "(",
            Control::RParen => ")",
            Control::Colon => ":",
            Control::Arrow => "->",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Plain(char),
    Ident(String),
    Keyword(Keyword),
    Control(Control),
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenKind::Plain(c) => write!(f, "{}", c),
            TokenKind::Ident(ident) => f.write_str(ident),
            TokenKind::Keyword(keyword) => keyword.fmt(f),
            TokenKind::Control(control) => control.fmt(f),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("{at}raw pointer movement is not allowed", at = Located::at(.pos))]
    PointerMovement { pos: Position },
    #[error("{at}invalid character {found:?}", at = Located::at(.pos))]
    InvalidCharacter { pos: Position, found: char },
}

struct LexerState<'a> {
    iter: Peekable<Chars<'a>>,
    pos: Position,
}

impl LexerState<'_> {
    fn bump(&mut self) -> Option<(char, Position)> {
        let c = self.iter.next()?;
        self.pos.column += 1;
        let at = self.pos;
        if c == '\n' {
            self.pos.line += 1;
            self.pos.column = 0;
        }
        Some((c, at))
    }

    fn bump_if(&mut self, pred: impl Fn(char) -> bool) -> Option<(char, Position)> {
        match self.iter.peek() {
            Some(&c) if pred(c) => self.bump(),
            _ => None,
        }
    }
}

fn next(state: &mut LexerState) -> Result<Option<Token>, Error> {
    loop {
        let Some((c, pos)) = state.bump() else {
            return Ok(None);
        };

        let kind = match c {
            c if c.is_ascii_alphanumeric() => {
                let mut ident = String::from(c);
                while let Some((c, _)) = state.bump_if(|c| c.is_ascii_alphanumeric()) {
                    ident.push(c);
                }
                match Keyword::from_ident(&ident) {
                    Some(keyword) => TokenKind::Keyword(keyword),
                    None => TokenKind::Ident(ident),
                }
            }
            ' ' | '\t' | '\r' | '\n' => continue,
            '#' => {
                while state.bump_if(|c| c != '\n').is_some() {}
                continue;
            }
            ':' => TokenKind::Control(Control::Colon),
            '(' => TokenKind::Control(Control::LParen),
            ')' => TokenKind::Control(Control::RParen),
            '{' => TokenKind::Control(Control::LCurly),
            '}' => TokenKind::Control(Control::RCurly),
            '-' => match state.bump_if(|c| c == '>') {
                // the arrow is reported where its head is
                Some((_, pos)) => {
                    return Ok(Some(Token {
                        kind: TokenKind::Control(Control::Arrow),
                        pos,
                    }))
                }
                None => TokenKind::Plain('-'),
            },
            '+' | '[' | ']' | '.' | ',' => TokenKind::Plain(c),
            '<' | '>' => return Err(Error::PointerMovement { pos }),
            found => return Err(Error::InvalidCharacter { pos, found }),
        };

        return Ok(Some(Token { kind, pos }));
    }
}

pub fn lex(input: &str) -> Result<Vec<Token>, Error> {
    let mut state = LexerState {
        iter: input.chars().peekable(),
        pos: Position { line: 1, column: 0 },
    };
    let mut tokens = Vec::new();

    while let Some(token) = next(&mut state)? {
        tokens.push(token);
    }

    tracing::debug!(tokens = tokens.len(), "lexed source");
    Ok(tokens)
}
