//! Source clauses as consumed by the compiler.
//!
//! Lowering interns every name through the [`SymbolTable`] and replaces
//! variable names by [`VarId`]s that are stable and unique within one clause.
//! Each `_` wildcard occurrence becomes a fresh anonymous `VarId`.

use core::fmt;
use std::collections::HashMap;

use derive_more::From;

use crate::symbol::{Functor, Sym, SymbolTable};

pub mod parse;

/// Identifier of a variable, unique within its clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From)]
pub struct VarId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Var(VarId),
    Const(Sym),
    Struct(Functor, Vec<Term>),
    Pair(Box<Term>, Box<Term>),
}

/// A callable: the head of a clause or one body goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goal {
    pub functor: Functor,
    pub args: Vec<Term>,
}

/// Variable names of one clause, indexed by [`VarId`]. Anonymous variables
/// have no name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarNames {
    names: Vec<Option<String>>,
}

impl VarNames {
    pub fn fresh(&mut self, name: Option<String>) -> VarId {
        let id = VarId(self.names.len() as u32);
        self.names.push(name);
        id
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, var: VarId) -> Option<&str> {
        self.names[var.0 as usize].as_deref()
    }

    pub fn is_named(&self, var: VarId) -> bool {
        self.name(var).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarId, Option<&str>)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (VarId(i as u32), n.as_deref()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    /// `None` for a query.
    pub head: Option<Goal>,
    pub body: Vec<Goal>,
    pub vars: VarNames,
}

impl Clause {
    pub fn is_query(&self) -> bool {
        self.head.is_none()
    }

    pub fn is_fact(&self) -> bool {
        self.head.is_some() && self.body.is_empty()
    }

    /// A chain rule (at most one body goal) needs no environment frame.
    pub fn is_chain(&self) -> bool {
        self.head.is_some() && self.body.len() <= 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// The head or a body goal is not a callable functor.
    CallableExpected(&'static str),
    ArityOverflow { name: String, arity: usize },
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeError::CallableExpected(what) => {
                write!(f, "a {what} cannot appear in call position")
            }
            ShapeError::ArityOverflow { name, arity } => {
                write!(f, "functor `{name}` has arity {arity}, the limit is 255")
            }
        }
    }
}

impl std::error::Error for ShapeError {}

/// Name of the empty-list atom.
pub const NIL: &str = "[]";

struct Lower<'a> {
    syms: &'a mut SymbolTable,
    vars: VarNames,
    by_name: HashMap<String, VarId>,
}

impl Lower<'_> {
    fn goal(&mut self, ast: &parse::Ast) -> Result<Goal, ShapeError> {
        match ast {
            parse::Ast::Atom(name) => Ok(Goal {
                functor: self.syms.functor(name, 0),
                args: vec![],
            }),
            parse::Ast::Struct(name, args) => {
                let functor = self.functor(name, args.len())?;
                let args = args.iter().map(|a| self.term(a)).collect::<Result<_, _>>()?;
                Ok(Goal { functor, args })
            }
            parse::Ast::Var(_) | parse::Ast::Wildcard => Err(ShapeError::CallableExpected("variable")),
            parse::Ast::Nil | parse::Ast::Pair(..) => Err(ShapeError::CallableExpected("list")),
        }
    }

    fn term(&mut self, ast: &parse::Ast) -> Result<Term, ShapeError> {
        match ast {
            parse::Ast::Wildcard => Ok(Term::Var(self.vars.fresh(None))),
            parse::Ast::Var(name) => {
                if let Some(&var) = self.by_name.get(name) {
                    return Ok(Term::Var(var));
                }
                let var = self.vars.fresh(Some(name.clone()));
                self.by_name.insert(name.clone(), var);
                Ok(Term::Var(var))
            }
            parse::Ast::Atom(name) => Ok(Term::Const(self.syms.intern(name))),
            parse::Ast::Nil => Ok(Term::Const(self.syms.intern(NIL))),
            parse::Ast::Struct(name, args) => {
                let functor = self.functor(name, args.len())?;
                let args = args.iter().map(|a| self.term(a)).collect::<Result<_, _>>()?;
                Ok(Term::Struct(functor, args))
            }
            parse::Ast::Pair(head, tail) => Ok(Term::Pair(
                Box::new(self.term(head)?),
                Box::new(self.term(tail)?),
            )),
        }
    }

    fn functor(&mut self, name: &str, arity: usize) -> Result<Functor, ShapeError> {
        if arity > u8::MAX as usize {
            return Err(ShapeError::ArityOverflow {
                name: name.to_owned(),
                arity,
            });
        }
        Ok(self.syms.functor(name, arity as u8))
    }
}

pub fn lower_clause(ast: &parse::AstClause, syms: &mut SymbolTable) -> Result<Clause, ShapeError> {
    let mut lower = Lower {
        syms,
        vars: VarNames::default(),
        by_name: HashMap::new(),
    };
    let head = ast.head.as_ref().map(|h| lower.goal(h)).transpose()?;
    let body = ast
        .body
        .iter()
        .map(|g| lower.goal(g))
        .collect::<Result<_, _>>()?;
    Ok(Clause {
        head,
        body,
        vars: lower.vars,
    })
}

pub fn lower_program(
    asts: &[parse::AstClause],
    syms: &mut SymbolTable,
) -> Result<Vec<Clause>, ShapeError> {
    asts.iter().map(|c| lower_clause(c, syms)).collect()
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn lower_one(src: &str, syms: &mut SymbolTable) -> Clause {
        let asts = parse::parse_program(src).unwrap();
        assert_eq!(asts.len(), 1);
        lower_clause(&asts[0], syms).unwrap()
    }

    #[test]
    fn repeated_names_share_a_var_id() {
        let mut syms = SymbolTable::new();
        let clause = lower_one("p(X, Y, X).", &mut syms);
        let head = clause.head.unwrap();
        assert_eq!(head.args[0], head.args[2]);
        assert_ne!(head.args[0], head.args[1]);
    }

    #[test]
    fn each_wildcard_is_fresh() {
        let mut syms = SymbolTable::new();
        let clause = lower_one("p(_, _).", &mut syms);
        let head = clause.head.unwrap();
        assert_ne!(head.args[0], head.args[1]);
        assert!(clause.vars.iter().all(|(_, name)| name.is_none()));
    }

    #[test]
    fn list_heads_are_rejected_as_goals() {
        let mut syms = SymbolTable::new();
        let asts = parse::parse_program("[a].").unwrap();
        assert_eq!(
            lower_clause(&asts[0], &mut syms),
            Err(ShapeError::CallableExpected("list"))
        );
    }

    #[test]
    fn clause_shapes() {
        let mut syms = SymbolTable::new();
        assert!(lower_one("p(a).", &mut syms).is_fact());
        assert!(lower_one("p(X) :- q(X).", &mut syms).is_chain());
        assert!(!lower_one("p(X) :- q(X), r(X).", &mut syms).is_chain());
        assert!(lower_one("?- q(X).", &mut syms).is_query());
    }
}
