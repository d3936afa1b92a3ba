//! Tape allocation for label code.
//!
//! Runs in passes over the whole token stream:
//!
//! 1. stamp each label occurrence with the scope it sits in and record the
//!    scope tree;
//! 2. give every label a canonical slot, reusing slots whose previous owners
//!    live in scopes that can never overlap this one;
//! 3. weigh slot pairs by how often they are touched back to back;
//! 4. order the slots on the tape, inserting each one where it is cheapest
//!    to reach its already placed neighbours;
//! 5. emit the ops with `<` / `>` moves between label accesses.
//!
//! Placement is a heuristic. The only hard promise is that two labels whose
//! home scopes are co-live never share a cell.

use std::collections::HashMap;

use crate::labels::{Label, Scope, Token};

/// Scope tree. Scope 0 is the root; every other scope has a smaller parent id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scopes {
    parents: Vec<usize>,
}

impl Default for Scopes {
    fn default() -> Self {
        Scopes { parents: vec![0] }
    }
}

impl Scopes {
    /// Number of scopes, root included.
    pub fn count(&self) -> usize {
        self.parents.len()
    }

    pub fn parent(&self, scope: usize) -> Option<usize> {
        match scope {
            0 => None,
            _ => self.parents.get(scope).copied(),
        }
    }

    /// True when one scope is an ancestor of (or the same as) the other.
    pub fn co_live(&self, a: usize, b: usize) -> bool {
        let (outer, mut inner) = if a < b { (a, b) } else { (b, a) };
        while inner > outer {
            inner = self.parents[inner];
        }
        inner == outer
    }

    pub fn common_ancestor(&self, mut a: usize, mut b: usize) -> usize {
        while a != b {
            if a > b {
                a = self.parents[a];
            } else {
                b = self.parents[b];
            }
        }
        a
    }

    fn enter(&mut self, parent: usize) -> usize {
        self.parents.push(parent);
        self.parents.len() - 1
    }

    /// Builds the tree and stamps every label with its scope.
    fn build(tokens: &mut [Token]) -> Self {
        let mut scopes = Scopes::default();
        let mut stack = Vec::new();
        let mut current = 0;

        for token in tokens.iter_mut() {
            match token {
                Token::Scope(Scope::Enter) => {
                    stack.push(current);
                    current = scopes.enter(current);
                }
                Token::Scope(Scope::Exit) => match stack.pop() {
                    Some(parent) => current = parent,
                    None => tracing::warn!("scope exit without a matching enter ignored"),
                },
                Token::Label(label) => label.scope = current,
                Token::Op(_) => {}
            }
        }

        scopes
    }
}

/// Where one source label ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub original: usize,
    /// Innermost scope enclosing every occurrence of the label.
    pub home: usize,
    pub slot: usize,
}

#[derive(Debug, Default, Clone)]
struct Slot {
    homes: Vec<usize>,
    width: usize,
}

pub struct Allocator {
    scopes: Scopes,
    tokens: Vec<Token>,
}

impl Allocator {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        let scopes = Scopes::build(&mut tokens);
        tracing::debug!(scopes = scopes.count(), tokens = tokens.len(), "built scope tree");
        Allocator { scopes, tokens }
    }

    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    pub fn allocate(mut self) -> Allocation {
        let (slots, assignments) = self.relabel();
        let weights = self.weights(slots.len());
        let order = place(&weights);

        let mut bases = vec![0; slots.len()];
        let mut width: usize = 0;
        for &slot in &order {
            bases[slot] = width;
            width = width.saturating_add(slots[slot].width);
        }

        tracing::debug!(
            labels = assignments.len(),
            slots = slots.len(),
            width,
            "placed labels"
        );

        Allocation {
            scopes: self.scopes,
            tokens: self.tokens,
            assignments,
            bases,
            width,
        }
    }

    fn homes(&self) -> HashMap<usize, usize> {
        let mut homes: HashMap<usize, usize> = HashMap::new();
        for token in &self.tokens {
            if let Token::Label(label) = token {
                homes
                    .entry(label.id)
                    .and_modify(|home| *home = self.scopes.common_ancestor(*home, label.scope))
                    .or_insert(label.scope);
            }
        }
        homes
    }

    /// Rewrites label ids to slot ids.
    fn relabel(&mut self) -> (Vec<Slot>, Vec<Assignment>) {
        let homes = self.homes();
        let scopes = &self.scopes;

        let mut slots: Vec<Slot> = Vec::new();
        let mut assignments = Vec::new();
        let mut active: HashMap<usize, usize> = HashMap::new();
        // open scopes, innermost last, with the labels that live in each
        let mut open: Vec<(usize, Vec<usize>)> = vec![(0, Vec::new())];
        let mut next_scope = 1;

        for token in self.tokens.iter_mut() {
            match token {
                Token::Scope(Scope::Enter) => {
                    open.push((next_scope, Vec::new()));
                    next_scope += 1;
                }
                Token::Scope(Scope::Exit) => {
                    if open.len() > 1 {
                        if let Some((_, introduced)) = open.pop() {
                            for id in introduced {
                                active.remove(&id);
                            }
                        }
                    }
                }
                Token::Label(label) => {
                    let slot = match active.get(&label.id) {
                        Some(&slot) => slot,
                        None => {
                            let home = homes.get(&label.id).copied().unwrap_or(label.scope);
                            let free = slots.iter().position(|slot| {
                                slot.homes.iter().all(|&h| !scopes.co_live(h, home))
                            });
                            let slot = match free {
                                Some(slot) => slot,
                                None => {
                                    slots.push(Slot::default());
                                    slots.len() - 1
                                }
                            };
                            tracing::trace!(label = label.id, home, slot, "assigned slot");

                            slots[slot].homes.push(home);
                            active.insert(label.id, slot);
                            match open.iter_mut().rev().find(|(scope, _)| *scope == home) {
                                Some((_, introduced)) => introduced.push(label.id),
                                None => {
                                    tracing::warn!(label = label.id, home, "home scope is not open")
                                }
                            }
                            assignments.push(Assignment {
                                original: label.id,
                                home,
                                slot,
                            });
                            slot
                        }
                    };

                    slots[slot].width = slots[slot].width.max(label.element.saturating_add(1));
                    label.id = slot;
                }
                Token::Op(_) => {}
            }
        }

        (slots, assignments)
    }

    /// Counts back-to-back accesses between slots whose scopes are co-live.
    fn weights(&self, slots: usize) -> Vec<Vec<u64>> {
        let mut weights = vec![vec![0u64; slots]; slots];
        let labels: Vec<&Label> = self
            .tokens
            .iter()
            .filter_map(|token| match token {
                Token::Label(label) => Some(label),
                _ => None,
            })
            .collect();

        for pair in labels.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if a.id != b.id && self.scopes.co_live(a.scope, b.scope) {
                weights[a.id][b.id] += 1;
                weights[b.id][a.id] += 1;
            }
        }

        weights
    }
}

/// Orders slots on the tape. Each slot in turn goes to the position with the
/// smallest weighted distance to the slots placed before it; ties go left.
fn place(weights: &[Vec<u64>]) -> Vec<usize> {
    let mut order: Vec<usize> = Vec::with_capacity(weights.len());

    for (slot, row) in weights.iter().enumerate() {
        let w: Vec<u64> = order.iter().map(|&placed| row[placed]).collect();

        // cost of inserting in front of everything
        let mut cost: u64 = w.iter().zip(1u64..).map(|(w, d)| w * d).sum();
        let (mut best, mut best_pos) = (cost, 0);
        let mut left = 0u64;
        let mut right: u64 = w.iter().sum();

        // stepping one position right brings every slot on the left one
        // cell further away and every slot on the right one cell closer
        for (pos, &wp) in w.iter().enumerate() {
            right -= wp;
            cost = cost + left - right;
            left += wp;
            if cost < best {
                best = cost;
                best_pos = pos + 1;
            }
        }

        tracing::trace!(slot, pos = best_pos, cost = best, "inserted slot");
        order.insert(best_pos, slot);
    }

    order
}

/// Result of allocation: slot-numbered tokens plus the tape layout.
pub struct Allocation {
    scopes: Scopes,
    tokens: Vec<Token>,
    assignments: Vec<Assignment>,
    bases: Vec<usize>,
    width: usize,
}

impl Allocation {
    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    /// Tokens with label ids rewritten to slot ids and scopes stamped.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    /// First cell of a slot.
    pub fn base(&self, slot: usize) -> usize {
        self.bases[slot]
    }

    /// Cell addressed by a slot-numbered label.
    pub fn offset(&self, label: &Label) -> usize {
        self.bases[label.id].saturating_add(label.element)
    }

    /// Number of cells used.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn emit(&self) -> String {
        let mut code = String::new();
        let mut cursor = 0;

        for token in &self.tokens {
            match token {
                Token::Op(op) => code.push(*op),
                Token::Label(label) => {
                    let target = self.offset(label);
                    if target > cursor {
                        code.extend(std::iter::repeat('>').take(target - cursor));
                    } else {
                        code.extend(std::iter::repeat('<').take(cursor - target));
                    }
                    cursor = target;
                }
                Token::Scope(_) => {}
            }
        }

        code
    }
}

/// Allocates and emits tape code for label tokens.
pub fn compile(tokens: Vec<Token>) -> String {
    Allocator::new(tokens).allocate().emit()
}
