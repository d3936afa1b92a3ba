use std::{
    collections::{BTreeMap, HashMap},
    fmt::{self, Display, Write},
};

use thiserror::Error;

use crate::{
    error::Located,
    lex::{Control, Keyword, Position, Token, TokenKind},
};

type ParserResult<I, O, E> = Result<(I, O), ParserError<E>>;

#[derive(Debug)]
enum ParserError<E> {
    /// The node does not start here; the caller may stop or try something else.
    Err(E),
    /// The node started but is malformed.
    Failure(E),
}

impl<E> ParserError<E> {
    fn into_inner(self) -> E {
        match self {
            ParserError::Err(e) | ParserError::Failure(e) => e,
        }
    }
}

/// Once a node has committed to a shape, soft errors become hard ones.
fn cut<I, O, E>(res: ParserResult<I, O, E>) -> ParserResult<I, O, E> {
    res.map_err(|e| ParserError::Failure(e.into_inner()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    Token(TokenKind),
    Identifier,
    ArrowOrRParen,
    Statement,
}

impl Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expected::Token(kind) => write!(f, "\"{}\"", kind),
            Expected::Identifier => f.write_str("identifier"),
            Expected::ArrowOrRParen => f.write_str("arrow or closing parenthesis"),
            Expected::Statement => f.write_str("statement"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("Unexpected end. Expected {0}.")]
    EndOfInput(Expected),
    #[error("Unexpected token \"{found}\". Expected {expected}.")]
    UnexpectedToken { found: TokenKind, expected: Expected },
    #[error("Unexpected ELSE keyword.")]
    UnexpectedElse,
    #[error("Unexpected control symbol: \"{0}\".")]
    UnexpectedControl(Control),
    #[error("No such macro `{0}`.")]
    UnknownMacro(String),
    #[error("Macro `{name}` has {expected} {what}, got {found}.")]
    Arity {
        name: String,
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Macro `{0}` is already defined.")]
    Redefined(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{at}{kind}", at = Located::maybe(.pos))]
pub struct Error {
    pub pos: Option<Position>,
    pub kind: ErrorKind,
}

impl Error {
    fn end(expected: Expected) -> Self {
        Error {
            pos: None,
            kind: ErrorKind::EndOfInput(expected),
        }
    }

    fn unexpected(token: &Token, expected: Expected) -> Self {
        Error {
            pos: Some(token.pos),
            kind: ErrorKind::UnexpectedToken {
                found: token.kind.clone(),
                expected,
            },
        }
    }

    fn at(pos: Position, kind: ErrorKind) -> Self {
        Error {
            pos: Some(pos),
            kind,
        }
    }
}

type Tokens<'a> = &'a [Token];

fn take_one_of(input: Tokens, of: TokenKind) -> ParserResult<Tokens, Position, Error> {
    let t = input
        .first()
        .ok_or_else(|| ParserError::Err(Error::end(Expected::Token(of.clone()))))?;
    if t.kind == of {
        Ok((&input[1..], t.pos))
    } else {
        Err(ParserError::Err(Error::unexpected(t, Expected::Token(of))))
    }
}

fn take_ident(input: Tokens) -> ParserResult<Tokens, (Position, &str), Error> {
    let t = input
        .first()
        .ok_or(ParserError::Err(Error::end(Expected::Identifier)))?;
    match &t.kind {
        TokenKind::Ident(ident) => Ok((&input[1..], (t.pos, ident.as_str()))),
        _ => Err(ParserError::Err(Error::unexpected(t, Expected::Identifier))),
    }
}

/// Hands out label ids for identifiers. Ids come from one counter for the
/// whole unit; the name table is cleared per macro.
#[derive(Debug, Default)]
struct LabelDispatcher {
    ids: HashMap<String, usize>,
    last_id: usize,
}

impl LabelDispatcher {
    fn clear_locals(&mut self) {
        self.ids.clear();
    }

    fn get(&mut self, ident: &str) -> Label {
        if let Some(&id) = self.ids.get(ident) {
            return Label(id);
        }
        self.last_id += 1;
        self.ids.insert(ident.to_string(), self.last_id);
        Label(self.last_id)
    }
}

#[derive(Debug, Default)]
struct Context {
    labels: LabelDispatcher,
    unit: Unit,
}

trait Node
where
    Self: Sized,
{
    fn parse<'a>(input: Tokens<'a>, cx: &mut Context) -> ParserResult<Tokens<'a>, Self, Error>;
    fn print(&self, f: &mut fmt::Formatter, depth: usize) -> fmt::Result;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub usize);

impl Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "var{}", self.0)
    }
}

/// A compilation unit: every macro of a source file, by name.
#[derive(Debug, Default, PartialEq)]
pub struct Unit {
    pub macros: BTreeMap<String, NodeMacro>,
}

pub type Ast = Unit;

impl Unit {
    pub fn get(&self, name: &str) -> Option<&NodeMacro> {
        self.macros.get(name)
    }
}

impl Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.macros
            .values()
            .try_for_each(|node| node.print(f, 0))
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Signature {
    pub name: String,
    pub arguments: Vec<Label>,
    pub returns: Vec<Label>,
}

impl Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        let mut sep = "";
        for arg in &self.arguments {
            write!(f, "{}{}", sep, arg)?;
            sep = " ";
        }
        if !self.returns.is_empty() {
            write!(f, "{}->", sep)?;
            for ret in &self.returns {
                write!(f, " {}", ret)?;
            }
        }
        f.write_char(')')
    }
}

impl Node for Signature {
    fn parse<'a>(input: Tokens<'a>, cx: &mut Context) -> ParserResult<Tokens<'a>, Self, Error> {
        let (mut input, (_, name)) = take_ident(input)?;
        let mut node = Signature {
            name: name.to_string(),
            ..Default::default()
        };

        // a bare name declares no labels
        if let Ok((rest, _)) = take_one_of(input, TokenKind::Control(Control::LParen)) {
            input = rest;
            let mut in_returns = false;
            loop {
                let expected = if in_returns {
                    Expected::Token(TokenKind::Control(Control::RParen))
                } else {
                    Expected::ArrowOrRParen
                };
                let t = input
                    .first()
                    .ok_or_else(|| ParserError::Failure(Error::end(expected.clone())))?;
                input = &input[1..];

                match &t.kind {
                    TokenKind::Ident(ident) => {
                        let label = cx.labels.get(ident);
                        if in_returns {
                            node.returns.push(label);
                        } else {
                            node.arguments.push(label);
                        }
                    }
                    TokenKind::Control(Control::Arrow) if !in_returns => in_returns = true,
                    TokenKind::Control(Control::RParen) => break,
                    _ => return Err(ParserError::Failure(Error::unexpected(t, expected))),
                }
            }
        }

        Ok((input, node))
    }

    fn print(&self, f: &mut fmt::Formatter, depth: usize) -> fmt::Result {
        writeln!(f, "{:indent$}USE {}", "", self, indent = depth * 2)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeMacro {
    pub signature: Signature,
    pub block: NodeBlock,
}

impl Node for NodeMacro {
    fn parse<'a>(input: Tokens<'a>, cx: &mut Context) -> ParserResult<Tokens<'a>, Self, Error> {
        cx.labels.clear_locals();

        let (input, _) = take_one_of(input, TokenKind::Keyword(Keyword::Macro))?;
        let name_pos = input.first().map(|t| t.pos);
        let (input, signature) = cut(Signature::parse(input, cx))?;

        if cx.unit.get(&signature.name).is_some() {
            return Err(ParserError::Failure(Error {
                pos: name_pos,
                kind: ErrorKind::Redefined(signature.name),
            }));
        }

        let (input, _) = cut(take_one_of(input, TokenKind::Control(Control::Colon)))?;
        let (input, block) = cut(NodeBlock::parse(input, cx))?;

        Ok((input, NodeMacro { signature, block }))
    }

    fn print(&self, f: &mut fmt::Formatter, depth: usize) -> fmt::Result {
        writeln!(f, "{:indent$}MACRO {}:", "", self.signature, indent = depth * 2)?;
        self.block.print(f, depth + 1)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct NodeBlock {
    pub stats: Vec<Statement>,
}

fn flush_inline(f: &mut fmt::Formatter, depth: usize, inline: &mut String) -> fmt::Result {
    if !inline.is_empty() {
        writeln!(f, "{:indent$}{}", "", inline, indent = depth * 2)?;
        inline.clear();
    }
    Ok(())
}

impl Node for NodeBlock {
    fn parse<'a>(input: Tokens<'a>, cx: &mut Context) -> ParserResult<Tokens<'a>, Self, Error> {
        let mut input = input;
        let mut node = NodeBlock::default();

        loop {
            match Statement::parse(input, cx) {
                Err(ParserError::Failure(f)) => return Err(ParserError::Failure(f)),
                Err(ParserError::Err(_)) => break,
                Ok((rest, stat)) => {
                    input = rest;
                    node.stats.push(stat);
                }
            };
        }

        Ok((input, node))
    }

    fn print(&self, f: &mut fmt::Formatter, depth: usize) -> fmt::Result {
        // plain ops and labels share a line until the next structured statement
        let mut inline = String::new();
        for stat in &self.stats {
            match stat {
                Statement::Plain(c) => inline.push(*c),
                Statement::Label(label) => {
                    if inline.ends_with(|c: char| c.is_ascii_alphanumeric()) {
                        inline.push(' ');
                    }
                    write!(inline, "{}", label)?;
                }
                _ => {
                    flush_inline(f, depth, &mut inline)?;
                    stat.print(f, depth)?;
                }
            }
        }
        flush_inline(f, depth, &mut inline)
    }
}

fn parse_braced<'a>(
    input: Tokens<'a>,
    cx: &mut Context,
) -> ParserResult<Tokens<'a>, NodeBlock, Error> {
    let (input, _) = take_one_of(input, TokenKind::Control(Control::LCurly))?;
    let (input, block) = NodeBlock::parse(input, cx)?;
    let (input, _) = take_one_of(input, TokenKind::Control(Control::RCurly))?;
    Ok((input, block))
}

fn parse_label<'a>(
    input: Tokens<'a>,
    cx: &mut Context,
) -> ParserResult<Tokens<'a>, Label, Error> {
    let (input, (_, ident)) = take_ident(input)?;
    Ok((input, cx.labels.get(ident)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeIf {
    pub condition: Label,
    pub then_block: NodeBlock,
    pub else_block: NodeBlock,
}

impl Node for NodeIf {
    fn parse<'a>(input: Tokens<'a>, cx: &mut Context) -> ParserResult<Tokens<'a>, Self, Error> {
        let (input, _) = take_one_of(input, TokenKind::Keyword(Keyword::If))?;
        let (input, condition) = cut(parse_label(input, cx))?;
        let (input, then_block) = cut(parse_braced(input, cx))?;

        let (input, else_block) = match take_one_of(input, TokenKind::Keyword(Keyword::Else)) {
            Ok((rest, _)) => cut(parse_braced(rest, cx))?,
            Err(_) => (input, NodeBlock::default()),
        };

        Ok((
            input,
            NodeIf {
                condition,
                then_block,
                else_block,
            },
        ))
    }

    fn print(&self, f: &mut fmt::Formatter, depth: usize) -> fmt::Result {
        writeln!(f, "{:indent$}IF {} {{", "", self.condition, indent = depth * 2)?;
        self.then_block.print(f, depth + 1)?;
        if !self.else_block.stats.is_empty() {
            writeln!(f, "{:indent$}}} ELSE {{", "", indent = depth * 2)?;
            self.else_block.print(f, depth + 1)?;
        }
        writeln!(f, "{:indent$}}}", "", indent = depth * 2)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeWhile {
    pub condition: Label,
    pub body: NodeBlock,
}

impl Node for NodeWhile {
    fn parse<'a>(input: Tokens<'a>, cx: &mut Context) -> ParserResult<Tokens<'a>, Self, Error> {
        let (input, _) = take_one_of(input, TokenKind::Keyword(Keyword::While))?;
        let (input, condition) = cut(parse_label(input, cx))?;
        let (input, body) = cut(parse_braced(input, cx))?;

        Ok((input, NodeWhile { condition, body }))
    }

    fn print(&self, f: &mut fmt::Formatter, depth: usize) -> fmt::Result {
        writeln!(f, "{:indent$}WHILE {} {{", "", self.condition, indent = depth * 2)?;
        self.body.print(f, depth + 1)?;
        writeln!(f, "{:indent$}}}", "", indent = depth * 2)
    }
}

/// `USE` must name a macro defined earlier in the file, with matching arity.
fn parse_use<'a>(
    input: Tokens<'a>,
    cx: &mut Context,
) -> ParserResult<Tokens<'a>, Signature, Error> {
    let (input, _) = take_one_of(input, TokenKind::Keyword(Keyword::Use))?;
    let name_pos = input.first().map(|t| t.pos);
    let (input, node) = cut(Signature::parse(input, cx))?;

    let fail = |kind| Err(ParserError::Failure(Error { pos: name_pos, kind }));

    let Some(callee) = cx.unit.get(&node.name) else {
        return fail(ErrorKind::UnknownMacro(node.name));
    };
    let counts = [
        ("arguments", callee.signature.arguments.len(), node.arguments.len()),
        ("returns", callee.signature.returns.len(), node.returns.len()),
    ];
    for (what, expected, found) in counts {
        if expected != found {
            return fail(ErrorKind::Arity {
                name: node.name,
                what,
                expected,
                found,
            });
        }
    }

    Ok((input, node))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Plain(char),
    Label(Label),
    Use(Signature),
    If(NodeIf),
    While(NodeWhile),
}

impl Node for Statement {
    fn parse<'a>(input: Tokens<'a>, cx: &mut Context) -> ParserResult<Tokens<'a>, Self, Error> {
        let t = input
            .first()
            .ok_or(ParserError::Err(Error::end(Expected::Statement)))?;
        match &t.kind {
            TokenKind::Plain(c) => Ok((&input[1..], Statement::Plain(*c))),
            TokenKind::Ident(ident) => Ok((&input[1..], Statement::Label(cx.labels.get(ident)))),
            TokenKind::Keyword(Keyword::Macro) | TokenKind::Control(Control::RCurly) => {
                Err(ParserError::Err(Error::unexpected(t, Expected::Statement)))
            }
            TokenKind::Keyword(Keyword::Else) => Err(ParserError::Failure(Error::at(
                t.pos,
                ErrorKind::UnexpectedElse,
            ))),
            TokenKind::Keyword(Keyword::If) => {
                let (input, node) = NodeIf::parse(input, cx)?;
                Ok((input, Statement::If(node)))
            }
            TokenKind::Keyword(Keyword::While) => {
                let (input, node) = NodeWhile::parse(input, cx)?;
                Ok((input, Statement::While(node)))
            }
            TokenKind::Keyword(Keyword::Use) => {
                let (input, node) = parse_use(input, cx)?;
                Ok((input, Statement::Use(node)))
            }
            TokenKind::Control(control) => Err(ParserError::Failure(Error::at(
                t.pos,
                ErrorKind::UnexpectedControl(*control),
            ))),
        }
    }

    fn print(&self, f: &mut fmt::Formatter, depth: usize) -> fmt::Result {
        match self {
            Statement::Plain(c) => writeln!(f, "{:indent$}{}", "", c, indent = depth * 2),
            Statement::Label(label) => writeln!(f, "{:indent$}{}", "", label, indent = depth * 2),
            Statement::Use(signature) => signature.print(f, depth),
            Statement::If(node) => node.print(f, depth),
            Statement::While(node) => node.print(f, depth),
        }
    }
}

pub fn parse(input: &[Token]) -> Result<Ast, Error> {
    let mut cx = Context::default();
    let mut input = input;

    while !input.is_empty() {
        let (rest, node) = NodeMacro::parse(input, &mut cx).map_err(ParserError::into_inner)?;
        tracing::trace!(name = %node.signature.name, "parsed macro");
        cx.unit.macros.insert(node.signature.name.clone(), node);
        input = rest;
    }

    tracing::debug!(macros = cx.unit.macros.len(), "parsed unit");
    Ok(cx.unit)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lex::lex;

    fn parse_src(src: &str) -> Result<Unit, Error> {
        parse(&lex(src).unwrap())
    }

    fn block(src: &str) -> NodeBlock {
        let tokens = lex(src).unwrap();
        let mut cx = Context::default();
        let (rest, block) = NodeBlock::parse(&tokens, &mut cx).unwrap();
        assert_eq!(rest.len(), 0);
        block
    }

    #[test]
    fn parse_block_1() {
        let ast = block("x+y-");
        assert_eq!(
            ast.stats,
            vec![
                Statement::Label(Label(1)),
                Statement::Plain('+'),
                Statement::Label(Label(2)),
                Statement::Plain('-'),
            ]
        );
    }

    #[test]
    fn parse_block_2() {
        let ast = block("x WHILE x { x- y }");
        assert_eq!(ast.stats.len(), 2);
        assert_eq!(ast.stats[0], Statement::Label(Label(1)));

        if let Statement::While(node) = &ast.stats[1] {
            assert_eq!(node.condition, Label(1));
            assert_eq!(
                node.body.stats,
                vec![
                    Statement::Label(Label(1)),
                    Statement::Plain('-'),
                    Statement::Label(Label(2)),
                ]
            );
        } else {
            panic!("Expected while statement");
        }
    }

    #[test]
    fn parse_if_else() {
        let ast = block("IF c { a+ } ELSE { b+ }");
        let Statement::If(node) = &ast.stats[0] else {
            panic!("Expected if statement");
        };
        assert_eq!(node.condition, Label(1));
        assert_eq!(node.then_block.stats[0], Statement::Label(Label(2)));
        assert_eq!(node.else_block.stats[0], Statement::Label(Label(3)));
    }

    #[test]
    fn parse_if_without_else() {
        let ast = block("IF c { a } b");
        assert_eq!(ast.stats.len(), 2);
        let Statement::If(node) = &ast.stats[0] else {
            panic!("Expected if statement");
        };
        assert!(node.else_block.stats.is_empty());
    }

    #[test]
    fn parse_macros_and_use() {
        let unit = parse_src(
            "MACRO clear(x): x[-]\n\
             MACRO copy(x y -> z):\n\
               USE clear(z) x[z+x-]\n\
             MACRO main: a+ USE copy(a a -> b)",
        )
        .unwrap();

        assert_eq!(unit.macros.len(), 3);
        let copy = unit.get("copy").unwrap();
        assert_eq!(copy.signature.arguments, vec![Label(2), Label(3)]);
        assert_eq!(copy.signature.returns, vec![Label(4)]);
        assert_eq!(
            copy.block.stats[0],
            Statement::Use(Signature {
                name: "clear".into(),
                arguments: vec![Label(4)],
                returns: vec![],
            })
        );

        let main = unit.get("main").unwrap();
        assert_eq!(
            main.signature,
            Signature {
                name: "main".into(),
                ..Default::default()
            }
        );
    }

    #[test]
    fn labels_do_not_leak_between_macros() {
        let unit = parse_src("MACRO a(x): x MACRO b(x): x").unwrap();
        let a = &unit.get("a").unwrap().signature.arguments;
        let b = &unit.get("b").unwrap().signature.arguments;
        assert_ne!(a, b);
    }

    #[test]
    fn parse_is_stable() {
        let src = "MACRO f(x -> y): IF x { y+ } ELSE { y- }\n\
                   MACRO main: USE f(a -> b) WHILE b { b- }";
        assert_eq!(parse_src(src).unwrap(), parse_src(src).unwrap());
    }

    #[test]
    fn use_must_name_earlier_macro() {
        let err = parse_src("MACRO main: USE later()\nMACRO later: +").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownMacro("later".into()));
        assert_eq!(err.pos, Some(Position { line: 1, column: 17 }));
    }

    #[test]
    fn use_cannot_recurse() {
        let err = parse_src("MACRO f: USE f").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownMacro("f".into()));
    }

    #[test]
    fn use_arity_checked() {
        let err = parse_src("MACRO f(x): x MACRO main: USE f(a b)").unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::Arity {
                name: "f".into(),
                what: "arguments",
                expected: 1,
                found: 2
            }
        );
    }

    #[test]
    fn redefinition_rejected() {
        let err = parse_src("MACRO f: + MACRO f: -").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Redefined("f".into()));
    }

    #[test]
    fn stray_else() {
        let err = parse_src("MACRO main: ELSE { }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnexpectedElse);
    }

    #[test]
    fn stray_closing_curly() {
        let err = parse_src("MACRO main: + }").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error at line 1 column 15: Unexpected token \"}\". Expected \"MACRO\"."
        );
    }

    #[test]
    fn unclosed_signature_at_end() {
        let err = parse_src("MACRO f(x").unwrap_err();
        assert_eq!(err.pos, None);
        assert_eq!(
            err.to_string(),
            "Error : Unexpected end. Expected arrow or closing parenthesis."
        );
    }

    #[test]
    fn unclosed_while_body() {
        let err = parse_src("MACRO main: WHILE x { +").unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::EndOfInput(Expected::Token(TokenKind::Control(Control::RCurly)))
        );
    }

    #[test]
    fn missing_colon() {
        let err = parse_src("MACRO main +").unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::UnexpectedToken {
                found: TokenKind::Plain('+'),
                expected: Expected::Token(TokenKind::Control(Control::Colon)),
            }
        );
    }

    #[test]
    fn print_unit() {
        let unit = parse_src("MACRO main: a+b IF a { b- } ELSE { a[-] }").unwrap();
        assert_eq!(
            unit.to_string(),
            "MACRO main():\n  var1+var2\n  IF var1 {\n    var2-\n  } ELSE {\n    var1[-]\n  }\n"
        );
    }
}
