//! Register and stack-slot allocation.
//!
//! Clauses are first flattened: each head/goal becomes its outermost functor
//! plus a list of inner structure nodes, so the analyzer, the allocator and
//! the emitter all walk the same shape. Allocation then assigns permanent
//! slots (ordered for environment trimming) and temporaries (breadth-first,
//! outer to inner, numbered from the maximum arity used by the clause so no
//! goal's argument registers clobber a live temporary).

use std::cmp::Reverse;
use std::collections::VecDeque;

use crate::bc::instr::{Local, Reg, Slot};
use crate::compile::analysis::ClauseInfo;
use crate::compile::{CompileError, Result};
use crate::symbol::{Functor, Sym};
use crate::syntax::{Clause, Goal, Term, VarId};

/// One callable of the clause, flattened.
#[derive(Debug)]
pub(crate) struct FlatGoal {
    pub functor: Functor,
    /// Direct arguments of the outermost functor; argument `i` lives in
    /// register `A_i`.
    pub args: Vec<FlatArg>,
    /// Inner structure/pair nodes, referenced by index from [`FlatArg::Node`].
    pub nodes: Vec<FlatNode>,
}

#[derive(Debug)]
pub(crate) struct FlatNode {
    /// The register this node is matched from or built into. Argument
    /// registers for outermost nodes, temporaries for inner ones.
    pub reg: Reg,
    pub shape: NodeShape,
    pub args: Vec<FlatArg>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum NodeShape {
    Struct(Functor),
    Pair,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum FlatArg {
    Var(VarId),
    Const(Sym),
    Node(usize),
}

#[derive(Debug)]
pub(crate) struct FlatClause {
    pub head: Option<FlatGoal>,
    pub goals: Vec<FlatGoal>,
}

pub(crate) fn flatten(clause: &Clause) -> FlatClause {
    FlatClause {
        head: clause.head.as_ref().map(flatten_goal),
        goals: clause.body.iter().map(flatten_goal).collect(),
    }
}

fn flatten_goal(goal: &Goal) -> FlatGoal {
    let mut nodes = Vec::new();
    let args: Vec<FlatArg> = goal
        .args
        .iter()
        .map(|t| flatten_term(t, &mut nodes))
        .collect();
    for (i, arg) in args.iter().enumerate() {
        if let FlatArg::Node(n) = arg {
            nodes[*n].reg = Reg(i as u8);
        }
    }
    FlatGoal {
        functor: goal.functor,
        args,
        nodes,
    }
}

fn flatten_term(term: &Term, nodes: &mut Vec<FlatNode>) -> FlatArg {
    match term {
        Term::Var(v) => FlatArg::Var(*v),
        Term::Const(c) => FlatArg::Const(*c),
        Term::Struct(f, args) => {
            let args = args.iter().map(|t| flatten_term(t, nodes)).collect();
            nodes.push(FlatNode {
                reg: Reg(0), // assigned by `allocate`
                shape: NodeShape::Struct(*f),
                args,
            });
            FlatArg::Node(nodes.len() - 1)
        }
        Term::Pair(head, tail) => {
            let args = vec![flatten_term(head, nodes), flatten_term(tail, nodes)];
            nodes.push(FlatNode {
                reg: Reg(0),
                shape: NodeShape::Pair,
                args,
            });
            FlatArg::Node(nodes.len() - 1)
        }
    }
}

#[derive(Debug)]
pub(crate) struct Allocation {
    /// Slot per [`VarId`]. Anonymous variables that compile to voids have
    /// none.
    pub slots: Vec<Option<Slot>>,
    pub n_perms: usize,
    /// Per body goal: permanent variables still live after its `call`.
    pub live_after: Vec<u8>,
    pub max_arity: usize,
}

pub(crate) fn allocate(
    clause: &Clause,
    flat: &mut FlatClause,
    info: &ClauseInfo,
) -> Result<Allocation> {
    let nvars = clause.vars.len();
    let max_arity = flat
        .head
        .iter()
        .chain(flat.goals.iter())
        .map(|g| g.args.len())
        .max()
        .unwrap_or(0);

    let mut slots: Vec<Option<Slot>> = vec![None; nvars];

    // Permanent slots, ordered by decreasing last-occurrence group so that
    // trailing slots die first and `call N` can trim the frame.
    let mut perms: Vec<VarId> = (0..nvars as u32)
        .map(VarId)
        .filter(|v| info.vars[v.0 as usize].permanent)
        .collect();
    perms.sort_by_key(|v| (Reverse(info.vars[v.0 as usize].last_group), *v));
    if perms.len() > u8::MAX as usize {
        return Err(CompileError::TooManyPermanents(perms.len()));
    }
    for (j, v) in perms.iter().enumerate() {
        slots[v.0 as usize] = Some(Slot::Local(Local(j as u8)));
    }

    // Temporaries: breadth-first, outer to inner, over each goal in clause
    // order.
    let mut next_temp = max_arity;
    let n_goals = flat.goals.len();
    let has_head = flat.head.is_some();
    for gi in 0..(has_head as usize + n_goals) {
        let is_head = has_head && gi == 0;
        let goal = if is_head {
            flat.head.as_mut().ok_or(CompileError::EmptyPredicate)?
        } else {
            &mut flat.goals[gi - has_head as usize]
        };

        let mut queue = VecDeque::new();
        for arg in &goal.args {
            match *arg {
                FlatArg::Var(v) => {
                    let idx = v.0 as usize;
                    // An anonymous head argument matches nothing; every other
                    // direct argument variable needs a distinct slot.
                    if slots[idx].is_none() && (clause.vars.is_named(v) || !is_head) {
                        slots[idx] = Some(Slot::Reg(next_reg(&mut next_temp)?));
                    }
                }
                FlatArg::Node(n) => queue.push_back(n),
                FlatArg::Const(_) => {}
            }
        }
        while let Some(n) = queue.pop_front() {
            for ai in 0..goal.nodes[n].args.len() {
                match goal.nodes[n].args[ai] {
                    FlatArg::Var(v) => {
                        let idx = v.0 as usize;
                        if slots[idx].is_none() && clause.vars.is_named(v) {
                            slots[idx] = Some(Slot::Reg(next_reg(&mut next_temp)?));
                        }
                    }
                    FlatArg::Node(m) => {
                        goal.nodes[m].reg = next_reg(&mut next_temp)?;
                        queue.push_back(m);
                    }
                    FlatArg::Const(_) => {}
                }
            }
        }
    }

    // Trimming counts. Queries never trim: their bindings must survive to be
    // read at `suspend`.
    let live_after: Vec<u8> = if clause.is_query() {
        vec![perms.len() as u8; n_goals]
    } else {
        (0..n_goals)
            .map(|g| {
                perms
                    .iter()
                    .filter(|v| info.vars[v.0 as usize].last_group > g)
                    .count() as u8
            })
            .collect()
    };

    Ok(Allocation {
        slots,
        n_perms: perms.len(),
        live_after,
        max_arity,
    })
}

fn next_reg(next_temp: &mut usize) -> Result<Reg> {
    if *next_temp > u8::MAX as usize {
        return Err(CompileError::TooManyTemporaries(*next_temp));
    }
    let reg = Reg(*next_temp as u8);
    *next_temp += 1;
    Ok(reg)
}
