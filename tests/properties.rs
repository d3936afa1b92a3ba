//! Property tests for the front end and the tape allocator.

use std::collections::HashMap;

use bfasm::{
    alloc::Allocator,
    labels::{Label, Scope, Token},
};
use proptest::prelude::*;

// =============================================================================
// STRATEGIES
// =============================================================================

#[derive(Debug, Clone)]
enum Event {
    Op(char),
    Label(usize, usize),
    Enter,
    Exit,
}

fn event() -> impl Strategy<Value = Event> {
    prop_oneof![
        prop::sample::select(vec!['+', '-', '.', ',']).prop_map(Event::Op),
        (1usize..10, prop_oneof![4 => Just(0usize), 1 => 1usize..4])
            .prop_map(|(id, element)| Event::Label(id, element)),
        Just(Event::Enter),
        Just(Event::Exit),
    ]
}

/// Label code with balanced scopes.
fn label_code() -> impl Strategy<Value = Vec<Token>> {
    prop::collection::vec(event(), 0..120).prop_map(|events| {
        let mut depth = 0;
        let mut tokens = Vec::new();
        for event in events {
            match event {
                Event::Op(op) => tokens.push(Token::Op(op)),
                Event::Label(id, element) => tokens.push(Token::Label(Label::new(id, element))),
                Event::Enter => {
                    depth += 1;
                    tokens.push(Token::Scope(Scope::Enter));
                }
                Event::Exit if depth > 0 => {
                    depth -= 1;
                    tokens.push(Token::Scope(Scope::Exit));
                }
                Event::Exit => {}
            }
        }
        tokens.extend(std::iter::repeat(Token::Scope(Scope::Exit)).take(depth));
        tokens
    })
}

/// Bodies for `main` built from every statement form.
fn block() -> impl Strategy<Value = String> {
    let leaf = prop::sample::select(vec!["+", "-", ".", ",", "a", "b", "c", "d"])
        .prop_map(String::from);

    leaf.prop_recursive(3, 48, 5, |inner| {
        let stats = prop::collection::vec(inner, 0..5)
            .prop_map(|stats| stats.join(" "))
            .boxed();
        let cond = prop::sample::select(vec!["a", "b", "c", "d"]);
        prop_oneof![
            (cond.clone(), stats.clone(), stats.clone())
                .prop_map(|(c, t, e)| format!("IF {} {{ {} }} ELSE {{ {} }}", c, t, e)),
            (cond.clone(), stats.clone()).prop_map(|(c, b)| format!("WHILE {} {{ {} }}", c, b)),
            (cond.clone(), cond).prop_map(|(x, y)| format!("USE copy({} -> {})", x, y)),
            stats,
        ]
    })
}

fn program(body: &str) -> String {
    format!(
        "MACRO copy(src -> dst):\n  tmp[-] dst[-] src[dst+tmp+src-] tmp[src+tmp-]\n\
         MACRO main:\n  {}\n",
        body
    )
}

/// For every `[ ... ]`, the cursor must be at the same cell on both ends.
fn loops_are_balanced(code: &str) -> bool {
    let mut cursor: i64 = 0;
    let mut open = Vec::new();
    for c in code.chars() {
        match c {
            '>' => cursor += 1,
            '<' => cursor -= 1,
            '[' => open.push(cursor),
            ']' => match open.pop() {
                Some(start) if start == cursor => {}
                _ => return false,
            },
            _ => {}
        }
    }
    open.is_empty()
}

// =============================================================================
// ALLOCATOR
// =============================================================================

proptest! {
    #[test]
    fn output_uses_only_tape_ops(tokens in label_code()) {
        let code = bfasm::alloc::compile(tokens);
        prop_assert!(code.chars().all(|c| "+-.,[]<>".contains(c)));
    }

    #[test]
    fn co_live_labels_never_share_a_slot(tokens in label_code()) {
        let allocation = Allocator::new(tokens).allocate();
        let scopes = allocation.scopes();
        let assignments = allocation.assignments();

        for (i, a) in assignments.iter().enumerate() {
            for b in &assignments[i + 1..] {
                if scopes.co_live(a.home, b.home) {
                    prop_assert_ne!(a.slot, b.slot, "{:?} and {:?}", a, b);
                    prop_assert_ne!(allocation.base(a.slot), allocation.base(b.slot));
                }
            }
        }
    }

    #[test]
    fn a_label_always_names_the_same_cell(tokens in label_code()) {
        let allocation = Allocator::new(tokens.clone()).allocate();
        let mut cells: HashMap<(usize, usize), usize> = HashMap::new();

        for (before, after) in tokens.iter().zip(allocation.tokens()) {
            if let (Token::Label(before), Token::Label(after)) = (before, after) {
                let cell = allocation.offset(after);
                let seen = *cells.entry((before.id, before.element)).or_insert(cell);
                prop_assert_eq!(seen, cell);
            }
        }
    }

    #[test]
    fn allocation_is_deterministic(tokens in label_code()) {
        let first = bfasm::alloc::compile(tokens.clone());
        let second = bfasm::alloc::compile(tokens);
        prop_assert_eq!(first, second);
    }
}

// =============================================================================
// FRONT END
// =============================================================================

proptest! {
    #[test]
    fn lexing_never_panics(src in r"[ -~\n]{0,200}") {
        let _ = bfasm::lex::lex(&src);
    }

    #[test]
    fn parsing_is_stable(body in block()) {
        let src = program(&body);
        let tokens = bfasm::lex::lex(&src).unwrap();
        prop_assert_eq!(bfasm::ast::parse(&tokens), bfasm::ast::parse(&tokens));
    }

    #[test]
    fn generated_programs_compile_to_balanced_loops(body in block()) {
        let code = bfasm::compile(&program(&body)).unwrap();
        prop_assert!(code.chars().all(|c| "+-.,[]<>".contains(c)));
        prop_assert!(loops_are_balanced(&code), "{}", code);
    }
}
