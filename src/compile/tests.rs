use test_log::test;

use super::*;
use crate::bc::decode::disassemble;
use crate::bc::instr::{Arg, Local, Reg};
use crate::symbol::SymbolTable;
use crate::syntax::{lower_clause, parse::parse_program, Goal, Term, VarNames};

fn lower_one(src: &str, syms: &mut SymbolTable) -> Clause {
    let asts = parse_program(src).unwrap();
    assert_eq!(asts.len(), 1);
    lower_clause(&asts[0], syms).unwrap()
}

fn emit_one(src: &str, syms: &mut SymbolTable) -> Vec<Instr<Lbl>> {
    compile_clause(&lower_one(src, syms)).unwrap().instrs
}

fn x(i: u8) -> Slot {
    Slot::Reg(Reg(i))
}

fn y(i: u8) -> Slot {
    Slot::Local(Local(i))
}

#[test]
fn permanents_and_trimming() {
    // Y and Z span two groups and become permanents, ordered Y0, Y1 by their
    // shared last group; X stays temporary above the argument registers.
    let mut syms = SymbolTable::new();
    let instrs = emit_one("p(X, Y) :- q(X, Z), r(Z, Y).", &mut syms);
    let q = syms.functor("q", 2);
    let r = syms.functor("r", 2);
    assert_eq!(
        instrs,
        vec![
            Instr::Allocate { nvars: 2 },
            Instr::GetVar { slot: x(2), arg: Arg(0) },
            Instr::GetVar { slot: y(0), arg: Arg(1) },
            Instr::PutVal { slot: x(2), arg: Arg(0) },
            Instr::PutVar { slot: y(1), arg: Arg(1) },
            Instr::Call { pred: q, live: 2 },
            Instr::PutUnsafeVal { local: Local(1), arg: Arg(0) },
            Instr::PutUnsafeVal { local: Local(0), arg: Arg(1) },
            Instr::Deallocate,
            Instr::Execute { pred: r },
        ]
    );
}

#[test]
fn derivative_clause_reproduces_textbook_allocation() {
    // d(U*V, X, DU*V + U*DV) :- d(U, X, DU), d(V, X, DV).
    let mut syms = SymbolTable::new();
    let star = syms.functor("*", 2);
    let plus = syms.functor("+", 2);
    let d = syms.functor("d", 3);

    let mut vars = VarNames::default();
    let u = Term::Var(vars.fresh(Some("U".into())));
    let v = Term::Var(vars.fresh(Some("V".into())));
    let xvar = Term::Var(vars.fresh(Some("X".into())));
    let du = Term::Var(vars.fresh(Some("DU".into())));
    let dv = Term::Var(vars.fresh(Some("DV".into())));
    let binop = |op: crate::symbol::Functor, lhs: &Term, rhs: &Term| {
        Term::Struct(op, vec![lhs.clone(), rhs.clone()])
    };

    let clause = Clause {
        head: Some(Goal {
            functor: d,
            args: vec![
                binop(star, &u, &v),
                xvar.clone(),
                binop(plus, &binop(star, &du, &v), &binop(star, &u, &dv)),
            ],
        }),
        body: vec![
            Goal {
                functor: d,
                args: vec![u.clone(), xvar.clone(), du.clone()],
            },
            Goal {
                functor: d,
                args: vec![v.clone(), xvar.clone(), dv.clone()],
            },
        ],
        vars,
    };

    let compiled = compile_clause(&clause).unwrap();

    // U and DU live only in the first group and stay temporary; V, X and DV
    // cross into the last goal and get stack slots, all three still live at
    // the intermediate call.
    assert_eq!(compiled.allocation.n_perms, 3);
    assert_eq!(compiled.allocation.live_after, vec![3, 0]);
    assert_eq!(compiled.allocation.slots[0], Some(x(3))); // U
    assert_eq!(compiled.allocation.slots[1], Some(y(0))); // V
    assert_eq!(compiled.allocation.slots[2], Some(y(1))); // X
    assert_eq!(compiled.allocation.slots[3], Some(x(6))); // DU
    assert_eq!(compiled.allocation.slots[4], Some(y(2))); // DV

    assert_eq!(
        compiled.instrs,
        vec![
            Instr::Allocate { nvars: 3 },
            Instr::GetStruc { functor: star, src: x(0) },
            Instr::UnifyVar { slot: x(3) },
            Instr::UnifyVar { slot: y(0) },
            Instr::GetVar { slot: y(1), arg: Arg(1) },
            Instr::GetStruc { functor: plus, src: x(2) },
            Instr::UnifyVar { slot: x(4) },
            Instr::UnifyVar { slot: x(5) },
            Instr::GetStruc { functor: star, src: x(4) },
            Instr::UnifyVar { slot: x(6) },
            Instr::UnifyVal { slot: y(0) },
            Instr::GetStruc { functor: star, src: x(5) },
            Instr::UnifyVal { slot: x(3) },
            Instr::UnifyVar { slot: y(2) },
            Instr::PutVal { slot: x(3), arg: Arg(0) },
            Instr::PutVal { slot: y(1), arg: Arg(1) },
            Instr::PutVal { slot: x(6), arg: Arg(2) },
            Instr::Call { pred: d, live: 3 },
            Instr::PutUnsafeVal { local: Local(0), arg: Arg(0) },
            Instr::PutUnsafeVal { local: Local(1), arg: Arg(1) },
            Instr::PutUnsafeVal { local: Local(2), arg: Arg(2) },
            Instr::Deallocate,
            Instr::Execute { pred: d },
        ]
    );
}

#[test]
fn allocator_reports_arity_and_liveness() {
    let mut syms = SymbolTable::new();
    let clause = lower_one("p(X, Y) :- q(X, Z), r(Z, Y).", &mut syms);
    let compiled = compile_clause(&clause).unwrap();
    assert_eq!(compiled.allocation.max_arity, 2);
    assert_eq!(compiled.allocation.n_perms, 2);
    // Liveness is monotonically non-increasing across calls.
    assert_eq!(compiled.allocation.live_after, vec![2, 0]);
}

#[test]
fn get_introduced_temporary_globalizes_once() {
    // X enters via get_var, so its first heap copy in the nested structure
    // must be unify_local_val; a second copy would be a plain unify_val.
    let mut syms = SymbolTable::new();
    let instrs = emit_one("p(X, f(X)).", &mut syms);
    let f = syms.functor("f", 1);
    assert_eq!(
        instrs,
        vec![
            Instr::GetVar { slot: x(2), arg: Arg(0) },
            Instr::GetStruc { functor: f, src: x(1) },
            Instr::UnifyLocalVal { slot: x(2) },
            Instr::Proceed,
        ]
    );
}

#[test]
fn nested_head_structures_walk_breadth_first() {
    let mut syms = SymbolTable::new();
    let instrs = emit_one("t(f(X, g(X, Y))).", &mut syms);
    let f = syms.functor("f", 2);
    let g = syms.functor("g", 2);
    assert_eq!(
        instrs,
        vec![
            Instr::GetStruc { functor: f, src: x(0) },
            Instr::UnifyVar { slot: x(1) },
            Instr::UnifyVar { slot: x(2) },
            Instr::GetStruc { functor: g, src: x(2) },
            Instr::UnifyVal { slot: x(1) },
            Instr::UnifyVar { slot: x(3) },
            Instr::Proceed,
        ]
    );
}

#[test]
fn chain_rule_has_no_environment() {
    let mut syms = SymbolTable::new();
    let instrs = emit_one("a(X) :- b(X).", &mut syms);
    let b = syms.functor("b", 1);
    assert_eq!(
        instrs,
        vec![
            Instr::GetVar { slot: x(1), arg: Arg(0) },
            Instr::PutVal { slot: x(1), arg: Arg(0) },
            Instr::Execute { pred: b },
        ]
    );
}

#[test]
fn anonymous_runs_collapse_to_void() {
    let mut syms = SymbolTable::new();
    let instrs = emit_one("p(f(_, _, X)).", &mut syms);
    let f = syms.functor("f", 3);
    assert_eq!(
        instrs,
        vec![
            Instr::GetStruc { functor: f, src: x(0) },
            Instr::UnifyVoid { count: 2 },
            Instr::UnifyVar { slot: x(1) },
            Instr::Proceed,
        ]
    );
}

#[test]
fn query_variables_are_permanent_and_local() {
    // Z is introduced by `put`; its first heap copy inside the structure
    // build must globalize through set_local_val.
    let mut syms = SymbolTable::new();
    let clause = lower_one("?- q(Z, f(Z)).", &mut syms);
    let compiled = compile_query(&clause).unwrap();
    let q = syms.functor("q", 2);
    let f = syms.functor("f", 1);
    assert_eq!(compiled.vars, vec![("Z".to_owned(), Local(0))]);
    assert_eq!(compiled.calls, vec![q]);
    assert_eq!(compiled.n_perms, 1);

    let listing: Vec<_> = disassemble(&compiled.code)
        .unwrap()
        .into_iter()
        .map(|(_, i)| i)
        .collect();
    assert_eq!(
        listing,
        vec![
            Instr::Allocate { nvars: 1 },
            Instr::PutVar { slot: y(0), arg: Arg(0) },
            Instr::PutStruc { functor: f, dst: x(1) },
            Instr::SetLocalVal { slot: y(0) },
            Instr::Call { pred: q, live: 1 },
            Instr::Suspend,
        ]
    );
}

#[test]
fn head_introduced_permanent_globalizes_in_body_build() {
    let mut syms = SymbolTable::new();
    let instrs = emit_one("p(X) :- q(X), r(f(X)).", &mut syms);
    let q = syms.functor("q", 1);
    let r = syms.functor("r", 1);
    let f = syms.functor("f", 1);
    assert_eq!(
        instrs,
        vec![
            Instr::Allocate { nvars: 1 },
            Instr::GetVar { slot: y(0), arg: Arg(0) },
            Instr::PutVal { slot: y(0), arg: Arg(0) },
            Instr::Call { pred: q, live: 1 },
            Instr::PutStruc { functor: f, dst: x(1) },
            Instr::SetLocalVal { slot: y(0) },
            Instr::Deallocate,
            Instr::Execute { pred: r },
        ]
    );
}

#[test]
fn multi_clause_predicate_assembles_try_retry_trust() {
    let mut syms = SymbolTable::new();
    let asts = parse_program("c(1). c(2). c(3).").unwrap();
    let clauses: Vec<_> = asts
        .iter()
        .map(|c| lower_clause(c, &mut syms).unwrap())
        .collect();
    let preds = compile_program(&clauses).unwrap();
    assert_eq!(preds.len(), 1);
    let pred = &preds[0];

    // Labels resolve to the byte offsets of the next clause's prologue, and
    // the label operands are listed as fixups for the loader.
    assert_eq!(pred.fixups, vec![1, 13]);
    let listing: Vec<_> = disassemble(&pred.code).unwrap();
    let one = syms.intern("1");
    let two = syms.intern("2");
    let three = syms.intern("3");
    assert_eq!(
        listing,
        vec![
            (0, Instr::TryMeElse(12)),
            (5, Instr::GetConst { name: one, arg: Arg(0) }),
            (11, Instr::Proceed),
            (12, Instr::RetryMeElse(24)),
            (17, Instr::GetConst { name: two, arg: Arg(0) }),
            (23, Instr::Proceed),
            (24, Instr::TrustMe),
            (25, Instr::GetConst { name: three, arg: Arg(0) }),
            (31, Instr::Proceed),
        ]
    );
}

#[test]
fn single_clause_predicate_has_no_prologue() {
    let mut syms = SymbolTable::new();
    let clause = lower_one("p(a).", &mut syms);
    let pred = compile_predicate(std::slice::from_ref(&clause)).unwrap();
    assert!(pred.fixups.is_empty());
    let listing: Vec<_> = disassemble(&pred.code)
        .unwrap()
        .into_iter()
        .map(|(_, i)| i)
        .collect();
    let a = syms.intern("a");
    assert_eq!(
        listing,
        vec![
            Instr::GetConst { name: a, arg: Arg(0) },
            Instr::Proceed,
        ]
    );
}

#[test]
fn compilation_is_stable() {
    let mut syms = SymbolTable::new();
    let asts = parse_program("app([], L, L). app([H|T], L, [H|R]) :- app(T, L, R).").unwrap();
    let clauses: Vec<_> = asts
        .iter()
        .map(|c| lower_clause(c, &mut syms).unwrap())
        .collect();
    let first = compile_program(&clauses).unwrap();
    let second = compile_program(&clauses).unwrap();
    assert_eq!(first, second);
}

#[test]
fn program_shape_errors() {
    let mut syms = SymbolTable::new();
    let query = lower_one("?- p(a).", &mut syms);
    assert_eq!(
        compile_program(std::slice::from_ref(&query)),
        Err(CompileError::ExpectedProgramClause)
    );

    let fact = lower_one("p(a).", &mut syms);
    assert_eq!(compile_query(&fact), Err(CompileError::ExpectedQuery));

    let asts = parse_program("p(a). q(b). p(c).").unwrap();
    let clauses: Vec<_> = asts
        .iter()
        .map(|c| lower_clause(c, &mut syms).unwrap())
        .collect();
    let p = syms.functor("p", 1);
    assert_eq!(
        compile_program(&clauses),
        Err(CompileError::NonContiguousPredicate(p))
    );
}

mod analysis {
    use test_log::test;

    use super::super::alloc::flatten;
    use super::super::analysis::{analyze, Intro};
    use super::lower_one;
    use crate::symbol::SymbolTable;

    #[test]
    fn groups_permanents_and_unsafety() {
        let mut syms = SymbolTable::new();
        let clause = lower_one("p(X, Y) :- q(X, Z), r(Z, Y).", &mut syms);
        let flat = flatten(&clause);
        let info = analyze(&clause, &flat);

        let x = &info.vars[0];
        assert_eq!((x.permanent, x.n_groups), (false, 1));
        assert_eq!(x.intro, Some(Intro::Get));
        assert!(!x.non_arg_only);

        let y = &info.vars[1];
        assert_eq!((y.permanent, y.last_group), (true, 1));
        assert_eq!(y.unsafe_goal, Some(1));
        assert!(y.local);

        let z = &info.vars[2];
        assert_eq!(z.occurrences, 2);
        assert_eq!(z.intro, Some(Intro::Put));
        assert_eq!(z.unsafe_goal, Some(1));
    }

    #[test]
    fn nested_last_occurrence_is_not_unsafe() {
        let mut syms = SymbolTable::new();
        let clause = lower_one("p(X) :- q(X), r(f(X)).", &mut syms);
        let flat = flatten(&clause);
        let info = analyze(&clause, &flat);
        let x = &info.vars[0];
        assert!(x.permanent);
        assert_eq!(x.unsafe_goal, None);
        assert!(x.local);
    }

    #[test]
    fn constants_track_argument_position() {
        let mut syms = SymbolTable::new();
        let clause = lower_one("p(a, f(b)).", &mut syms);
        let flat = flatten(&clause);
        let info = analyze(&clause, &flat);
        let a = syms.intern("a");
        let b = syms.intern("b");
        assert_eq!(info.consts[&a].occurrences, 1);
        assert!(!info.consts[&a].non_arg_only);
        assert!(info.consts[&b].non_arg_only);
    }

    #[test]
    fn head_nested_variable_is_introduced_by_unify() {
        let mut syms = SymbolTable::new();
        let clause = lower_one("p(f(X)) :- q(X), r(X).", &mut syms);
        let flat = flatten(&clause);
        let info = analyze(&clause, &flat);
        let x = &info.vars[0];
        assert_eq!(x.intro, Some(Intro::Unify));
        assert!(x.permanent);
        assert!(!x.local);
    }
}
