//! Occurrence and position analysis.
//!
//! Groups follow the environment-trimming partition: the head and the first
//! body goal are group 0, every later goal is its own group. A variable in
//! more than one group is permanent (in a query, every named variable is).
//! The walk visits occurrences in the emitter's instruction order, so the
//! recorded introduction kinds agree with the code that is actually emitted.

use std::collections::{HashMap, VecDeque};

use crate::compile::alloc::{FlatArg, FlatClause, FlatGoal};
use crate::symbol::Sym;
use crate::syntax::{Clause, VarId};

/// The kind of instruction that first introduces a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Intro {
    Get,
    Put,
    Set,
    Unify,
}

#[derive(Debug, Clone)]
pub(crate) struct VarInfo {
    pub occurrences: u32,
    /// Index of the last group this variable occurs in.
    pub last_group: usize,
    pub n_groups: usize,
    pub permanent: bool,
    pub intro: Option<Intro>,
    /// The variable may still live only on the stack at its first heap copy;
    /// that copy must use a `*_local_val` form.
    pub local: bool,
    /// Body goal at which `put_unsafe_val` applies: the last goal the
    /// variable occurs in, when all its occurrences there are direct
    /// argument positions.
    pub unsafe_goal: Option<usize>,
    /// Never appears directly as an argument of a top-level functor.
    pub non_arg_only: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ConstInfo {
    pub occurrences: u32,
    pub non_arg_only: bool,
}

#[derive(Debug)]
pub(crate) struct ClauseInfo {
    pub vars: Vec<VarInfo>,
    pub consts: HashMap<Sym, ConstInfo>,
}

#[derive(Debug, Clone, Default)]
struct VarBuild {
    occurrences: u32,
    last_group: Option<usize>,
    n_groups: usize,
    intro: Option<Intro>,
    saw_direct: bool,
    last_goal: Option<usize>,
    arg_only_in_last_goal: bool,
}

struct Analyzer {
    vars: Vec<VarBuild>,
    consts: HashMap<Sym, ConstInfo>,
}

impl Analyzer {
    fn touch(&mut self, v: VarId, group: usize, kind: Intro, direct: bool, goal: Option<usize>) {
        let b = &mut self.vars[v.0 as usize];
        b.occurrences += 1;
        if b.intro.is_none() {
            b.intro = Some(kind);
        }
        if b.last_group != Some(group) {
            b.last_group = Some(group);
            b.n_groups += 1;
        }
        b.saw_direct |= direct;
        if let Some(g) = goal {
            if b.last_goal != Some(g) {
                b.last_goal = Some(g);
                b.arg_only_in_last_goal = direct;
            } else {
                b.arg_only_in_last_goal &= direct;
            }
        }
    }

    fn touch_const(&mut self, c: Sym, direct: bool) {
        let entry = self.consts.entry(c).or_insert(ConstInfo {
            occurrences: 0,
            non_arg_only: true,
        });
        entry.occurrences += 1;
        entry.non_arg_only &= !direct;
    }

    fn head_goal(&mut self, goal: &FlatGoal) {
        let mut queue = VecDeque::new();
        for arg in &goal.args {
            match *arg {
                FlatArg::Var(v) => self.touch(v, 0, Intro::Get, true, None),
                FlatArg::Const(c) => self.touch_const(c, true),
                FlatArg::Node(n) => self.head_row(goal, n, &mut queue),
            }
        }
        while let Some(n) = queue.pop_front() {
            self.head_row(goal, n, &mut queue);
        }
    }

    fn head_row(&mut self, goal: &FlatGoal, n: usize, queue: &mut VecDeque<usize>) {
        for arg in &goal.nodes[n].args {
            match *arg {
                FlatArg::Var(v) => self.touch(v, 0, Intro::Unify, false, None),
                FlatArg::Const(c) => self.touch_const(c, false),
                FlatArg::Node(m) => queue.push_back(m),
            }
        }
    }

    fn body_goal(&mut self, goal: &FlatGoal, goal_idx: usize) {
        for arg in &goal.args {
            match *arg {
                FlatArg::Var(v) => self.touch(v, goal_idx, Intro::Put, true, Some(goal_idx)),
                FlatArg::Const(c) => self.touch_const(c, true),
                FlatArg::Node(n) => self.build(goal, n, goal_idx),
            }
        }
    }

    fn build(&mut self, goal: &FlatGoal, n: usize, goal_idx: usize) {
        for arg in &goal.nodes[n].args {
            if let FlatArg::Node(m) = arg {
                self.build(goal, *m, goal_idx);
            }
        }
        for arg in &goal.nodes[n].args {
            match *arg {
                FlatArg::Var(v) => self.touch(v, goal_idx, Intro::Set, false, Some(goal_idx)),
                FlatArg::Const(c) => self.touch_const(c, false),
                FlatArg::Node(_) => {}
            }
        }
    }
}

pub(crate) fn analyze(clause: &Clause, flat: &FlatClause) -> ClauseInfo {
    let mut a = Analyzer {
        vars: vec![VarBuild::default(); clause.vars.len()],
        consts: HashMap::new(),
    };
    if let Some(head) = &flat.head {
        a.head_goal(head);
    }
    for (g, goal) in flat.goals.iter().enumerate() {
        a.body_goal(goal, g);
    }

    for (sym, stats) in &a.consts {
        tracing::debug!(
            sym = sym.0,
            occurrences = stats.occurrences,
            non_arg_only = stats.non_arg_only,
            "constant usage"
        );
    }

    let is_query = clause.is_query();
    let vars = a
        .vars
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let v = VarId(i as u32);
            let named = clause.vars.is_named(v);
            if named && b.occurrences == 1 {
                tracing::warn!(
                    name = clause.vars.name(v).unwrap_or_default(),
                    "singleton variable"
                );
            }
            let permanent = if is_query { named } else { b.n_groups >= 2 };
            let local = match b.intro {
                Some(Intro::Get) => true,
                Some(Intro::Put) => permanent,
                _ => false,
            };
            let unsafe_goal = match b.last_goal {
                Some(g) if permanent && b.arg_only_in_last_goal => Some(g),
                _ => None,
            };
            VarInfo {
                occurrences: b.occurrences,
                last_group: b.last_group.unwrap_or(0),
                n_groups: b.n_groups,
                permanent,
                intro: b.intro,
                local,
                unsafe_goal,
                non_arg_only: !b.saw_direct,
            }
        })
        .collect();

    ClauseInfo {
        vars,
        consts: a.consts,
    }
}
