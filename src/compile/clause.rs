//! Clause token emission.
//!
//! Heads compile to `get_*`/`unify_*` rows by a breadth-first, outer-to-inner
//! walk; body goals compile to `put_*`/`set_*` with inner structures built
//! postfix (children before parents) so every `set_val` of a temporary sees
//! the structure it names already on the heap.

use std::collections::VecDeque;

use crate::bc::instr::{Arg, Instr, Lbl, Slot};
use crate::compile::alloc::{Allocation, FlatArg, FlatClause, FlatGoal, NodeShape};
use crate::compile::analysis::ClauseInfo;
use crate::syntax::Clause;

pub(crate) fn emit_clause(
    clause: &Clause,
    flat: &FlatClause,
    info: &ClauseInfo,
    alloc: &Allocation,
) -> Vec<Instr<Lbl>> {
    let mut e = Emitter {
        clause,
        alloc,
        info,
        seen: vec![false; clause.vars.len()],
        local: info.vars.iter().map(|v| v.local).collect(),
        unsafe_done: vec![false; clause.vars.len()],
        out: Vec::new(),
    };
    e.run(flat);
    e.out
}

struct Emitter<'a> {
    clause: &'a Clause,
    alloc: &'a Allocation,
    info: &'a ClauseInfo,
    seen: Vec<bool>,
    local: Vec<bool>,
    unsafe_done: Vec<bool>,
    out: Vec<Instr<Lbl>>,
}

impl Emitter<'_> {
    fn run(&mut self, flat: &FlatClause) {
        let nvars = self.alloc.n_perms as u8;

        if self.clause.is_query() {
            self.out.push(Instr::Allocate { nvars });
            for (g, goal) in flat.goals.iter().enumerate() {
                self.body_goal(goal, g);
                self.out.push(Instr::Call {
                    pred: goal.functor,
                    live: self.alloc.live_after[g],
                });
            }
            self.out.push(Instr::Suspend);
            return;
        }

        match flat.goals.len() {
            0 => {
                if let Some(head) = &flat.head {
                    self.head_goal(head);
                }
                self.out.push(Instr::Proceed);
            }
            1 => {
                if let Some(head) = &flat.head {
                    self.head_goal(head);
                }
                self.body_goal(&flat.goals[0], 0);
                self.out.push(Instr::Execute {
                    pred: flat.goals[0].functor,
                });
            }
            k => {
                self.out.push(Instr::Allocate { nvars });
                if let Some(head) = &flat.head {
                    self.head_goal(head);
                }
                for (g, goal) in flat.goals[..k - 1].iter().enumerate() {
                    self.body_goal(goal, g);
                    self.out.push(Instr::Call {
                        pred: goal.functor,
                        live: self.alloc.live_after[g],
                    });
                }
                let last = &flat.goals[k - 1];
                self.body_goal(last, k - 1);
                self.out.push(Instr::Deallocate);
                self.out.push(Instr::Execute { pred: last.functor });
            }
        }
    }

    fn slot(&self, v: crate::syntax::VarId) -> Slot {
        // The allocator assigns a slot to every named variable and to every
        // anonymous variable in body argument position before emission; the
        // only slotless variables are the ones the void paths consume.
        self.alloc.slots[v.0 as usize].expect("every emitted variable has a slot")
    }

    /// First-occurrence test; marks the variable seen.
    fn first(&mut self, v: crate::syntax::VarId) -> bool {
        let idx = v.0 as usize;
        let first = !self.seen[idx];
        self.seen[idx] = true;
        first
    }

    /// One-shot local mark, cleared at the first `*_local_val` emission.
    fn take_local(&mut self, v: crate::syntax::VarId) -> bool {
        let idx = v.0 as usize;
        let local = self.local[idx];
        self.local[idx] = false;
        local
    }

    fn take_unsafe(&mut self, v: crate::syntax::VarId, goal: usize) -> bool {
        let idx = v.0 as usize;
        if self.info.vars[idx].unsafe_goal == Some(goal) && !self.unsafe_done[idx] {
            self.unsafe_done[idx] = true;
            return true;
        }
        false
    }

    fn head_goal(&mut self, goal: &FlatGoal) {
        let mut queue = VecDeque::new();
        for (i, arg) in goal.args.iter().enumerate() {
            let ai = Arg(i as u8);
            match *arg {
                FlatArg::Const(c) => self.out.push(Instr::GetConst { name: c, arg: ai }),
                FlatArg::Var(v) => {
                    if !self.clause.vars.is_named(v) {
                        continue; // an anonymous head argument matches anything
                    }
                    let slot = self.slot(v);
                    if self.first(v) {
                        self.out.push(Instr::GetVar { slot, arg: ai });
                    } else {
                        self.out.push(Instr::GetVal { slot, arg: ai });
                    }
                }
                FlatArg::Node(n) => self.head_node(goal, n, &mut queue),
            }
        }
        while let Some(n) = queue.pop_front() {
            self.head_node(goal, n, &mut queue);
        }
    }

    fn head_node(&mut self, goal: &FlatGoal, n: usize, queue: &mut VecDeque<usize>) {
        let node = &goal.nodes[n];
        let src = Slot::Reg(node.reg);
        match node.shape {
            NodeShape::Struct(functor) => self.out.push(Instr::GetStruc { functor, src }),
            NodeShape::Pair => self.out.push(Instr::GetList { src }),
        }
        self.unify_row(goal, n, queue);
    }

    fn unify_row(&mut self, goal: &FlatGoal, n: usize, queue: &mut VecDeque<usize>) {
        let args = &goal.nodes[n].args;
        let mut i = 0;
        while i < args.len() {
            match args[i] {
                FlatArg::Var(v) if !self.clause.vars.is_named(v) => {
                    let run = self.void_run(args, i);
                    self.out.push(Instr::UnifyVoid { count: run as u8 });
                    i += run;
                    continue;
                }
                FlatArg::Var(v) => {
                    let slot = self.slot(v);
                    if self.first(v) {
                        self.out.push(Instr::UnifyVar { slot });
                    } else if self.take_local(v) {
                        self.out.push(Instr::UnifyLocalVal { slot });
                    } else {
                        self.out.push(Instr::UnifyVal { slot });
                    }
                }
                FlatArg::Const(c) => self.out.push(Instr::UnifyConst { name: c }),
                FlatArg::Node(m) => {
                    self.out.push(Instr::UnifyVar {
                        slot: Slot::Reg(goal.nodes[m].reg),
                    });
                    queue.push_back(m);
                }
            }
            i += 1;
        }
    }

    fn body_goal(&mut self, goal: &FlatGoal, goal_idx: usize) {
        for (i, arg) in goal.args.iter().enumerate() {
            let ai = Arg(i as u8);
            match *arg {
                FlatArg::Const(c) => self.out.push(Instr::PutConst { name: c, arg: ai }),
                FlatArg::Var(v) => {
                    let slot = self.slot(v);
                    if self.first(v) {
                        self.out.push(Instr::PutVar { slot, arg: ai });
                    } else if self.take_unsafe(v, goal_idx) {
                        match slot {
                            Slot::Local(local) => {
                                self.out.push(Instr::PutUnsafeVal { local, arg: ai })
                            }
                            // Unsafety only concerns permanents; a temporary
                            // here means the clause is a query or chain rule
                            // whose frame outlives the call.
                            Slot::Reg(_) => self.out.push(Instr::PutVal { slot, arg: ai }),
                        }
                    } else {
                        self.out.push(Instr::PutVal { slot, arg: ai });
                    }
                }
                FlatArg::Node(n) => self.build_node(goal, n),
            }
        }
    }

    fn build_node(&mut self, goal: &FlatGoal, n: usize) {
        for arg in &goal.nodes[n].args {
            if let FlatArg::Node(m) = arg {
                self.build_node(goal, *m);
            }
        }
        let node = &goal.nodes[n];
        let dst = Slot::Reg(node.reg);
        match node.shape {
            NodeShape::Struct(functor) => self.out.push(Instr::PutStruc { functor, dst }),
            NodeShape::Pair => self.out.push(Instr::PutList { dst }),
        }
        self.set_row(goal, n);
    }

    fn set_row(&mut self, goal: &FlatGoal, n: usize) {
        let args = &goal.nodes[n].args;
        let mut i = 0;
        while i < args.len() {
            match args[i] {
                FlatArg::Var(v) if !self.clause.vars.is_named(v) => {
                    let run = self.void_run(args, i);
                    self.out.push(Instr::SetVoid { count: run as u8 });
                    i += run;
                    continue;
                }
                FlatArg::Var(v) => {
                    let slot = self.slot(v);
                    if self.first(v) {
                        self.out.push(Instr::SetVar { slot });
                    } else if self.take_local(v) {
                        self.out.push(Instr::SetLocalVal { slot });
                    } else {
                        self.out.push(Instr::SetVal { slot });
                    }
                }
                FlatArg::Const(c) => self.out.push(Instr::SetConst { name: c }),
                FlatArg::Node(m) => self.out.push(Instr::SetVal {
                    slot: Slot::Reg(goal.nodes[m].reg),
                }),
            }
            i += 1;
        }
    }

    fn void_run(&self, args: &[FlatArg], from: usize) -> usize {
        args[from..]
            .iter()
            .take_while(|a| matches!(**a, FlatArg::Var(v) if !self.clause.vars.is_named(v)))
            .count()
    }
}
