//! The clause compiler: source clauses in, byte code and call-table patches
//! out.
//!
//! Pipeline per clause: flatten ([`alloc`]) → occurrence analysis
//! ([`analysis`]) → register/slot allocation ([`alloc`]) → token emission
//! ([`clause`]) → assembly and label resolution ([`assemble`]).

use core::fmt;
use std::collections::HashSet;

use crate::bc::instr::{Instr, Lbl, Slot};
use crate::symbol::Functor;
use crate::syntax::Clause;

mod alloc;
mod analysis;
mod assemble;
mod clause;
#[cfg(test)]
mod tests;

pub use assemble::{CompiledPredicate, CompiledQuery};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A query clause was handed to the program compiler.
    ExpectedProgramClause,
    /// A program clause was handed to the query compiler.
    ExpectedQuery,
    EmptyQuery,
    EmptyPredicate,
    /// Clauses of one predicate must share their head functor.
    MixedPredicate { expected: Functor, found: Functor },
    /// A predicate's clauses reappeared after another predicate started.
    NonContiguousPredicate(Functor),
    TooManyPermanents(usize),
    TooManyTemporaries(usize),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::ExpectedProgramClause => write!(f, "expected a program clause, got a query"),
            CompileError::ExpectedQuery => write!(f, "expected a query, got a program clause"),
            CompileError::EmptyQuery => write!(f, "a query needs at least one goal"),
            CompileError::EmptyPredicate => write!(f, "a predicate needs at least one clause"),
            CompileError::MixedPredicate { expected, found } => write!(
                f,
                "clause head #{}/{} does not match predicate #{}/{}",
                found.sym.0, found.arity, expected.sym.0, expected.arity
            ),
            CompileError::NonContiguousPredicate(p) => write!(
                f,
                "clauses of predicate #{}/{} are not contiguous",
                p.sym.0, p.arity
            ),
            CompileError::TooManyPermanents(n) => {
                write!(f, "{n} permanent variables, the limit is 255")
            }
            CompileError::TooManyTemporaries(n) => {
                write!(f, "register allocation ran past X{n}, the limit is X255")
            }
        }
    }
}

impl std::error::Error for CompileError {}

pub type Result<T> = std::result::Result<T, CompileError>;

struct Compiled {
    instrs: Vec<Instr<Lbl>>,
    allocation: alloc::Allocation,
}

fn compile_clause(clause: &Clause) -> Result<Compiled> {
    let mut flat = alloc::flatten(clause);
    let info = analysis::analyze(clause, &flat);
    let allocation = alloc::allocate(clause, &mut flat, &info)?;
    let instrs = clause::emit_clause(clause, &flat, &info, &allocation);
    tracing::debug!(
        head = ?clause.head.as_ref().map(|h| h.functor),
        n_instrs = instrs.len(),
        n_perms = allocation.n_perms,
        "compiled clause"
    );
    Ok(Compiled { instrs, allocation })
}

/// Compile the clauses of one predicate into a loadable unit with its
/// `try/retry/trust` dispatch prologue.
pub fn compile_predicate(clauses: &[Clause]) -> Result<CompiledPredicate> {
    let first = clauses.first().ok_or(CompileError::EmptyPredicate)?;
    let functor = first
        .head
        .as_ref()
        .ok_or(CompileError::ExpectedProgramClause)?
        .functor;
    let mut bodies = Vec::with_capacity(clauses.len());
    for clause in clauses {
        let head = clause
            .head
            .as_ref()
            .ok_or(CompileError::ExpectedProgramClause)?;
        if head.functor != functor {
            return Err(CompileError::MixedPredicate {
                expected: functor,
                found: head.functor,
            });
        }
        bodies.push(compile_clause(clause)?.instrs);
    }
    Ok(assemble::assemble_predicate(functor, bodies))
}

/// Compile a whole program, grouping consecutive clauses by head functor.
pub fn compile_program(clauses: &[Clause]) -> Result<Vec<CompiledPredicate>> {
    let mut preds = Vec::new();
    let mut closed: HashSet<Functor> = HashSet::new();
    let mut i = 0;
    while i < clauses.len() {
        let functor = clauses[i]
            .head
            .as_ref()
            .ok_or(CompileError::ExpectedProgramClause)?
            .functor;
        if !closed.insert(functor) {
            return Err(CompileError::NonContiguousPredicate(functor));
        }
        let mut j = i + 1;
        while j < clauses.len()
            && clauses[j].head.as_ref().map(|h| h.functor) == Some(functor)
        {
            j += 1;
        }
        preds.push(compile_predicate(&clauses[i..j])?);
        i = j;
    }
    Ok(preds)
}

/// Compile a query: `allocate` + per-goal argument loads and `call`s,
/// concluded by `suspend`. Every named variable is permanent so it survives
/// to be read back as an answer.
pub fn compile_query(clause: &Clause) -> Result<CompiledQuery> {
    if !clause.is_query() {
        return Err(CompileError::ExpectedQuery);
    }
    if clause.body.is_empty() {
        return Err(CompileError::EmptyQuery);
    }
    let Compiled { instrs, allocation } = compile_clause(clause)?;
    let mut vars: Vec<(String, crate::bc::instr::Local)> = clause
        .vars
        .iter()
        .filter_map(|(v, name)| {
            let name = name?;
            match allocation.slots[v.0 as usize] {
                Some(Slot::Local(l)) => Some((name.to_owned(), l)),
                _ => None,
            }
        })
        .collect();
    vars.sort_by_key(|(_, l)| l.0);
    let calls = clause.body.iter().map(|g| g.functor).collect();
    Ok(assemble::assemble_query(
        instrs,
        vars,
        calls,
        allocation.n_perms as u8,
    ))
}
