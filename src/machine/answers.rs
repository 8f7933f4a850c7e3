//! Result enumeration.
//!
//! [`Answers`] drives the engine as a lazy iterator of binding sets. The
//! first `next` runs from the query's entry point until `suspend` yields an
//! answer; each later `next` re-enters by backtracking through the intact
//! choice-point chain, exactly as if the `suspend` had failed.

use core::fmt;
use std::collections::BTreeMap;

use crate::bc::instr::Local;
use crate::cell::Tag;
use crate::defs::{Addr, CodeAddr};
use crate::machine::exec::Step;
use crate::machine::{Fault, Machine, ENV_SLOTS};
use crate::symbol::{DisplayViaTable, Functor, Sym, SymbolTable};
use crate::syntax::NIL;

/// A fully dereferenced term read back from the heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A free variable, identified by its cell address.
    Unbound(Addr),
    Atom(Sym),
    Struct(Functor, Vec<Value>),
    Pair(Box<Value>, Box<Value>),
}

/// One answer: query variable name to its value.
pub type Bindings = BTreeMap<String, Value>;

impl DisplayViaTable for Value {
    fn fmt_via(&self, f: &mut fmt::Formatter<'_>, syms: &SymbolTable) -> fmt::Result {
        match self {
            Value::Unbound(addr) => write!(f, "_{addr}"),
            Value::Atom(sym) => write!(f, "{}", syms.resolve(*sym)),
            Value::Struct(functor, args) => {
                write!(f, "{}(", syms.resolve(functor.sym))?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    arg.fmt_via(f, syms)?;
                }
                write!(f, ")")
            }
            Value::Pair(..) => {
                write!(f, "[")?;
                let mut item = self;
                let mut first = true;
                loop {
                    match item {
                        Value::Pair(head, tail) => {
                            if !first {
                                write!(f, ", ")?;
                            }
                            head.fmt_via(f, syms)?;
                            first = false;
                            item = &**tail;
                        }
                        Value::Atom(sym) if syms.resolve(*sym) == NIL => break,
                        other => {
                            write!(f, " | ")?;
                            other.fmt_via(f, syms)?;
                            break;
                        }
                    }
                }
                write!(f, "]")
            }
        }
    }
}

impl Machine {
    /// Read the term rooted at a data address back into a [`Value`].
    pub(crate) fn reify(&self, addr: Addr) -> Result<Value, Fault> {
        let a = self.deref(addr)?;
        let cell = self.cell_at(a)?;
        match cell.tag() {
            Some(Tag::Ref) => Ok(Value::Unbound(a)),
            Some(Tag::Con) => Ok(Value::Atom(Sym(cell.val() as u32))),
            Some(Tag::Str) => {
                let fun_addr = cell.val();
                let functor = Functor::from_word(self.word_at(fun_addr)?);
                let mut args = Vec::with_capacity(functor.arity as usize);
                for k in 0..functor.arity as usize {
                    args.push(self.reify(fun_addr + 1 + k)?);
                }
                Ok(Value::Struct(functor, args))
            }
            Some(Tag::Lis) => {
                let pair = cell.val();
                Ok(Value::Pair(
                    Box::new(self.reify(pair)?),
                    Box::new(self.reify(pair + 1)?),
                ))
            }
            None => Err(Fault::CorruptCell { addr: a }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Resume,
    Done,
}

/// Lazy enumeration of a query's answers.
pub struct Answers<'m> {
    machine: &'m mut Machine,
    vars: Vec<(String, Local)>,
    code_base: CodeAddr,
    state: State,
}

impl<'m> Answers<'m> {
    pub(crate) fn new(
        machine: &'m mut Machine,
        vars: Vec<(String, Local)>,
        code_base: CodeAddr,
    ) -> Self {
        Answers {
            machine,
            vars,
            code_base,
            state: State::Start,
        }
    }

    fn run(&mut self) -> Option<Result<Bindings, Fault>> {
        loop {
            match self.machine.step() {
                Ok(Step::Continue) => {}
                Ok(Step::Answer) => {
                    tracing::debug!("answer");
                    return Some(self.extract());
                }
                Ok(Step::Exhausted) => {
                    self.state = State::Done;
                    return None;
                }
                Err(fault) => {
                    self.state = State::Done;
                    return Some(Err(fault));
                }
            }
        }
    }

    /// Read the query's named permanents out of its environment frame, which
    /// is current when `suspend` yields.
    fn extract(&self) -> Result<Bindings, Fault> {
        let e = self.machine.e.ok_or(Fault::NoEnvironment)?;
        self.vars
            .iter()
            .map(|(name, local)| {
                let value = self.machine.reify(e + ENV_SLOTS + local.0 as Addr)?;
                Ok((name.clone(), value))
            })
            .collect()
    }
}

impl Iterator for Answers<'_> {
    type Item = Result<Bindings, Fault>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            State::Done => None,
            State::Start => {
                self.state = State::Resume;
                self.run()
            }
            State::Resume => match self.machine.backtrack() {
                Ok(Step::Exhausted) => {
                    self.state = State::Done;
                    None
                }
                Ok(_) => self.run(),
                Err(fault) => {
                    self.state = State::Done;
                    Some(Err(fault))
                }
            },
        }
    }
}

impl Drop for Answers<'_> {
    fn drop(&mut self) {
        // The query's code was appended for this enumeration only.
        self.machine.code.truncate(self.code_base);
    }
}
