use std::collections::HashMap;

use thiserror::Error;

use crate::{
    ast::{self, NodeBlock, NodeIf, NodeWhile, Signature, Statement, Unit},
    error::Located,
    labels::{Label, Scope, Token},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("{at}no entry macro `{0}`", at = Located::end())]
    MissingEntry(String),
    #[error("{at}{0} macro shouldn't take or return any labels.", at = Located::end())]
    EntrySignature(String),
    #[error("{at}No such macro `{0}`.", at = Located::end())]
    UnknownMacro(String),
}

/// Binding frames for macro inlining.
///
/// The current frame maps AST labels to virtual registers; entering a macro
/// saves a copy of it so the callee sees every caller binding. Registers come
/// from one counter for the whole compile and are never handed out twice.
#[derive(Debug, Default)]
struct Frames {
    current: HashMap<ast::Label, usize>,
    saved: Vec<HashMap<ast::Label, usize>>,
    last_register: usize,
}

impl Frames {
    fn push(&mut self) {
        self.saved.push(self.current.clone());
    }

    fn pop(&mut self) {
        if let Some(frame) = self.saved.pop() {
            self.current = frame;
        }
    }

    /// Aliases each formal label to the register of its actual.
    fn bind(&mut self, formals: &[ast::Label], registers: &[usize]) {
        for (formal, register) in formals.iter().zip(registers) {
            self.current.insert(*formal, *register);
        }
    }

    fn get(&mut self, label: ast::Label) -> usize {
        if let Some(&register) = self.current.get(&label) {
            return register;
        }
        let register = self.temp();
        self.current.insert(label, register);
        register
    }

    fn temp(&mut self) -> usize {
        self.last_register += 1;
        self.last_register
    }
}

pub struct LabelGenerator<'u> {
    unit: &'u Unit,
    frames: Frames,
    code: Vec<Token>,
}

impl<'u> LabelGenerator<'u> {
    pub fn new(unit: &'u Unit) -> Self {
        LabelGenerator {
            unit,
            frames: Frames::default(),
            code: Vec::new(),
        }
    }

    /// Lowers the entry macro, inlining everything it uses.
    pub fn gen(mut self, entry: &str) -> Result<Vec<Token>, Error> {
        let unit = self.unit;
        let main = unit
            .get(entry)
            .ok_or_else(|| Error::MissingEntry(entry.to_string()))?;

        let signature = &main.signature;
        if !signature.arguments.is_empty() || !signature.returns.is_empty() {
            return Err(Error::EntrySignature(entry.to_string()));
        }

        self.generate_block(&main.block)?;

        tracing::debug!(
            tokens = self.code.len(),
            registers = self.frames.last_register,
            "generated label code"
        );
        Ok(self.code)
    }

    fn generate_block(&mut self, block: &NodeBlock) -> Result<(), Error> {
        for stat in &block.stats {
            self.generate_statement(stat)?;
        }
        Ok(())
    }

    fn generate_statement(&mut self, stat: &Statement) -> Result<(), Error> {
        match stat {
            Statement::Plain(p) => self.code.push(Token::Op(*p)),
            Statement::Label(label) => {
                let register = self.frames.get(*label);
                self.push_label(register);
            }
            Statement::Use(signature) => self.generate_use(signature)?,
            Statement::If(node) => self.generate_if(node)?,
            Statement::While(node) => self.generate_while(node)?,
        }
        Ok(())
    }

    fn generate_use(&mut self, signature: &Signature) -> Result<(), Error> {
        let unit = self.unit;
        let callee = unit
            .get(&signature.name)
            .ok_or_else(|| Error::UnknownMacro(signature.name.clone()))?;

        // actuals resolve in the caller's frame, so a label first named at
        // the call site stays bound after the callee returns
        let arguments: Vec<usize> = signature
            .arguments
            .iter()
            .map(|label| self.frames.get(*label))
            .collect();
        let returns: Vec<usize> = signature
            .returns
            .iter()
            .map(|label| self.frames.get(*label))
            .collect();

        self.frames.push();
        self.frames.bind(&callee.signature.arguments, &arguments);
        self.frames.bind(&callee.signature.returns, &returns);

        self.code.push(Token::Scope(Scope::Enter));
        let res = self.generate_block(&callee.block);
        self.code.push(Token::Scope(Scope::Exit));

        self.frames.pop();
        res
    }

    fn generate_if(&mut self, node: &NodeIf) -> Result<(), Error> {
        self.code.push(Token::Scope(Scope::Enter));

        let temp0 = self.frames.temp();
        let temp1 = self.frames.temp();
        let x = self.frames.get(node.condition);

        // temp0[-]+
        self.push_label(temp0);
        self.push_plains("[-]+");
        // temp1[-]
        self.push_label(temp1);
        self.push_plains("[-]");
        // x[ code1 temp0- x[temp1+x-] ]
        self.push_label(x);
        self.push_plains("[");
        self.generate_scoped(&node.then_block)?;
        self.push_label(temp0);
        self.push_plains("-");
        self.push_label(x);
        self.push_plains("[");
        self.push_label(temp1);
        self.push_plains("+");
        self.push_label(x);
        self.push_plains("-]");
        self.push_plains("]");
        // temp1[x+temp1-]
        self.push_label(temp1);
        self.push_plains("[");
        self.push_label(x);
        self.push_plains("+");
        self.push_label(temp1);
        self.push_plains("-]");
        // temp0[ code2 temp0-]
        self.push_label(temp0);
        self.push_plains("[");
        self.generate_scoped(&node.else_block)?;
        self.push_label(temp0);
        self.push_plains("-]");

        self.code.push(Token::Scope(Scope::Exit));
        Ok(())
    }

    fn generate_while(&mut self, node: &NodeWhile) -> Result<(), Error> {
        let x = self.frames.get(node.condition);

        self.push_label(x);
        self.push_plains("[");
        self.generate_scoped(&node.body)?;
        self.push_label(x);
        self.push_plains("]");
        Ok(())
    }

    fn generate_scoped(&mut self, block: &NodeBlock) -> Result<(), Error> {
        self.code.push(Token::Scope(Scope::Enter));
        self.generate_block(block)?;
        self.code.push(Token::Scope(Scope::Exit));
        Ok(())
    }

    fn push_label(&mut self, register: usize) {
        self.code.push(Token::Label(Label::new(register, 0)));
    }

    fn push_plains(&mut self, plains: &str) {
        self.code.extend(plains.chars().map(Token::Op));
    }
}

/// Lowers `unit` into label code starting from the macro named `entry`.
pub fn generate(unit: &Unit, entry: &str) -> Result<Vec<Token>, Error> {
    LabelGenerator::new(unit).gen(entry)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ast::parse, labels::Listing, lex::lex};

    fn gen_src(src: &str) -> Result<String, Error> {
        let unit = parse(&lex(src).unwrap()).unwrap();
        generate(&unit, "main").map(|code| Listing(&code).to_string())
    }

    #[test]
    fn plain_and_labels() {
        assert_eq!(gen_src("MACRO main: a+b-a").unwrap(), "var1+var2-var1");
    }

    #[test]
    fn if_else_shape() {
        assert_eq!(
            gen_src("MACRO main: IF c { a+ } ELSE { a- }").unwrap(),
            "{var1[-]+var2[-]var3[{var4+}var1-var3[var2+var3-]]\
             var2[var3+var2-]var1[{var4-}var1-]}"
        );
    }

    #[test]
    fn if_without_else() {
        assert_eq!(
            gen_src("MACRO main: IF c { }").unwrap(),
            "{var1[-]+var2[-]var3[{}var1-var3[var2+var3-]]var2[var3+var2-]var1[{}var1-]}"
        );
    }

    #[test]
    fn while_shape() {
        assert_eq!(
            gen_src("MACRO main: WHILE c { c- . }").unwrap(),
            "var1[{var1-.}var1]"
        );
    }

    #[test]
    fn use_aliases_arguments() {
        assert_eq!(
            gen_src("MACRO inc(x): x+\nMACRO main: a USE inc(a) a").unwrap(),
            "var1{var1+}var1"
        );
    }

    #[test]
    fn call_site_label_stays_bound() {
        assert_eq!(
            gen_src("MACRO read(-> x): x,\nMACRO main: USE read(-> a) a.").unwrap(),
            "{var1,}var1."
        );
    }

    #[test]
    fn callee_locals_never_alias() {
        assert_eq!(
            gen_src("MACRO t: tmp+\nMACRO main: USE t USE t()").unwrap(),
            "{var1+}{var2+}"
        );
    }

    #[test]
    fn nested_use() {
        assert_eq!(
            gen_src(
                "MACRO clear(x): x[-]\n\
                 MACRO set(-> y): USE clear(y) y+\n\
                 MACRO main: USE set(-> a) a."
            )
            .unwrap(),
            "{{var1[-]}var1+}var1."
        );
    }

    #[test]
    fn entry_must_exist() {
        assert_eq!(
            gen_src("MACRO other: +"),
            Err(Error::MissingEntry("main".into()))
        );
    }

    #[test]
    fn entry_takes_nothing() {
        let err = gen_src("MACRO main(x): x").unwrap_err();
        assert_eq!(err, Error::EntrySignature("main".into()));
        assert_eq!(
            err.to_string(),
            "Error : main macro shouldn't take or return any labels."
        );
    }

    #[test]
    fn custom_entry() {
        let unit = parse(&lex("MACRO start: x+").unwrap()).unwrap();
        let code = generate(&unit, "start").unwrap();
        assert_eq!(Listing(&code).to_string(), "var1+");
    }
}
