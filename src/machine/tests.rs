use std::collections::BTreeMap;

use assert2::assert;
use test_log::test;

use super::*;
use crate::cell::Cell;
use crate::compile::{compile_program, compile_query, CompiledQuery};
use crate::symbol::SymbolTable;
use crate::syntax::{lower_program, parse::parse_program};

fn setup(program: &str) -> (Machine, SymbolTable) {
    let mut syms = SymbolTable::new();
    let asts = parse_program(program).unwrap();
    let clauses = lower_program(&asts, &mut syms).unwrap();
    let mut machine = Machine::new();
    for pred in compile_program(&clauses).unwrap() {
        machine.load(&pred).unwrap();
    }
    (machine, syms)
}

fn compile_one_query(query: &str, syms: &mut SymbolTable) -> CompiledQuery {
    let asts = parse_program(query).unwrap();
    let clauses = lower_program(&asts, syms).unwrap();
    compile_query(&clauses[0]).unwrap()
}

/// Run a query to exhaustion, rendering every binding through the symbol
/// table.
fn ask(
    machine: &mut Machine,
    syms: &mut SymbolTable,
    query: &str,
) -> Vec<BTreeMap<String, String>> {
    let q = compile_one_query(query, syms);
    let answers = machine.resolve_query(&q).unwrap();
    let mut out = Vec::new();
    for bindings in answers {
        let bindings = bindings.unwrap();
        out.push(
            bindings
                .iter()
                .map(|(name, value)| (name.clone(), syms.display(value).to_string()))
                .collect(),
        );
    }
    out
}

fn one(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn fact_and_atomic_query() {
    let (mut machine, mut syms) = setup("p(a).");
    assert_eq!(ask(&mut machine, &mut syms, "?- p(a)."), vec![one(&[])]);
    // A second enumeration starts from a clean run-time state.
    assert_eq!(ask(&mut machine, &mut syms, "?- p(a)."), vec![one(&[])]);
    assert_eq!(ask(&mut machine, &mut syms, "?- p(b)."), vec![]);
}

#[test]
fn variable_in_head() {
    let (mut machine, mut syms) = setup("q(X).");
    assert_eq!(ask(&mut machine, &mut syms, "?- q(b)."), vec![one(&[])]);

    let unbound = ask(&mut machine, &mut syms, "?- q(W).");
    assert_eq!(unbound.len(), 1);
    assert!(unbound[0]["W"].starts_with('_'));
}

#[test]
fn structure_unification_keeps_sharing() {
    let (mut machine, mut syms) = setup("t(f(X, g(X, Y))).");
    let answers = ask(&mut machine, &mut syms, "?- t(f(Z, g(Z, W))).");
    assert_eq!(answers.len(), 1);
    let z = &answers[0]["Z"];
    let w = &answers[0]["W"];
    // Z aliases X and W aliases Y; both stay fresh unbound refs, and they
    // are distinct variables.
    assert!(z.starts_with('_'));
    assert!(w.starts_with('_'));
    assert!(z != w);
}

#[test]
fn backtracking_through_three_clauses() {
    let (mut machine, mut syms) = setup("c(1). c(2). c(3).");
    assert_eq!(
        ask(&mut machine, &mut syms, "?- c(X)."),
        vec![one(&[("X", "1")]), one(&[("X", "2")]), one(&[("X", "3")])]
    );
}

#[test]
fn rule_with_call() {
    let (mut machine, mut syms) = setup("a(X) :- b(X). b(1). b(2).");
    assert_eq!(
        ask(&mut machine, &mut syms, "?- a(Y)."),
        vec![one(&[("Y", "1")]), one(&[("Y", "2")])]
    );
}

#[test]
fn failure_restores_state() {
    let (mut machine, mut syms) = setup("eq(X, X).");
    assert_eq!(ask(&mut machine, &mut syms, "?- eq(f(a), f(b))."), vec![]);
    assert!(machine.trail.is_empty());
    assert_eq!(machine.b, None);

    // Multi-clause enumeration: H and TR end where the choice point saved
    // them, with every trailed binding undone.
    let (mut machine, mut syms) = setup("c(1). c(2).");
    assert_eq!(
        ask(&mut machine, &mut syms, "?- c(X)."),
        vec![one(&[("X", "1")]), one(&[("X", "2")])]
    );
    assert!(machine.trail.is_empty());
    // The query allocated exactly one heap cell (its variable); the
    // constant bindings were undone in place.
    assert_eq!(machine.h, machine.layout.heap_base() + 1);
}

#[test]
fn conjunction_shares_bindings() {
    let (mut machine, mut syms) = setup("p(1). p(2). q(2). ");
    assert_eq!(
        ask(&mut machine, &mut syms, "?- p(X), q(X)."),
        vec![one(&[("X", "2")])]
    );
}

#[test]
fn append_enumerates_splits() {
    let (mut machine, mut syms) =
        setup("app([], L, L). app([H|T], L, [H|R]) :- app(T, L, R).");
    assert_eq!(
        ask(&mut machine, &mut syms, "?- app(X, Y, [a, b])."),
        vec![
            one(&[("X", "[]"), ("Y", "[a, b]")]),
            one(&[("X", "[a]"), ("Y", "[b]")]),
            one(&[("X", "[a, b]"), ("Y", "[]")]),
        ]
    );
    assert_eq!(
        ask(&mut machine, &mut syms, "?- app([a], [b, c], Z)."),
        vec![one(&[("Z", "[a, b, c]")])]
    );
}

#[test]
fn two_goal_rule_allocates_and_trims() {
    let (mut machine, mut syms) = setup(
        "parent(tom, bob). parent(bob, ann). \
         grand(X, Z) :- parent(X, Y), parent(Y, Z).",
    );
    assert_eq!(
        ask(&mut machine, &mut syms, "?- grand(tom, Z)."),
        vec![one(&[("Z", "ann")])]
    );
    assert_eq!(ask(&mut machine, &mut syms, "?- grand(bob, Z)."), vec![]);
}

#[test]
fn member_walks_a_list() {
    let (mut machine, mut syms) = setup("mem(X, [X|_]). mem(X, [_|T]) :- mem(X, T).");
    assert_eq!(
        ask(&mut machine, &mut syms, "?- mem(X, [a, b, c])."),
        vec![
            one(&[("X", "a")]),
            one(&[("X", "b")]),
            one(&[("X", "c")]),
        ]
    );
    assert_eq!(
        ask(&mut machine, &mut syms, "?- mem(b, [a, b, c])."),
        vec![one(&[])]
    );
}

#[test]
fn reverse_builds_lists_in_the_body() {
    let (mut machine, mut syms) =
        setup("rev([], A, A). rev([H|T], A, R) :- rev(T, [H|A], R).");
    assert_eq!(
        ask(&mut machine, &mut syms, "?- rev([a, b, c], [], R)."),
        vec![one(&[("R", "[c, b, a]")])]
    );
}

#[test]
fn infinite_enumeration_is_lazy() {
    let (mut machine, mut syms) = setup("nat(z). nat(s(X)) :- nat(X).");
    let q = compile_one_query("?- nat(N).", &mut syms);
    let answers: Vec<String> = machine
        .resolve_query(&q)
        .unwrap()
        .take(3)
        .map(|bindings| syms.display(&bindings.unwrap()["N"]).to_string())
        .collect();
    assert_eq!(answers, ["z", "s(z)", "s(s(z))"]);
}

#[test]
fn unknown_predicate_in_query_is_a_link_error() {
    let (mut machine, mut syms) = setup("p(a).");
    let q = compile_one_query("?- ghost(X).", &mut syms);
    let ghost = syms.functor("ghost", 1);
    let result = machine.resolve_query(&q);
    match result {
        Err(LinkError::Undefined(f)) => assert_eq!(f, ghost),
        other => panic!("expected a link error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn unknown_predicate_in_program_clause_just_fails() {
    let (mut machine, mut syms) = setup("a(X) :- ghost(X). a(done).");
    assert_eq!(
        ask(&mut machine, &mut syms, "?- a(X)."),
        vec![one(&[("X", "done")])]
    );
}

#[test]
fn query_code_is_truncated_after_enumeration() {
    let (mut machine, mut syms) = setup("p(a).");
    let before = machine.code.len();
    assert_eq!(ask(&mut machine, &mut syms, "?- p(X)."), vec![one(&[("X", "a")])]);
    assert_eq!(machine.code.len(), before);
}

#[test]
fn reset_clears_everything() {
    let (mut machine, mut syms) = setup("p(a).");
    machine.reset();
    assert_eq!(machine.code.len(), 0);
    let q = compile_one_query("?- p(X).", &mut syms);
    assert!(matches!(
        machine.resolve_query(&q),
        Err(LinkError::Undefined(_))
    ));
}

#[test]
fn listing_round_trips_loaded_code() {
    let (machine, mut syms) = setup("c(1). c(2).");
    let c = syms.functor("c", 1);
    let listing = machine.listing(c).unwrap().unwrap();
    assert_eq!(listing[0].1.opcode(), crate::bc::opcode::Opcode::TryMeElse);
    assert!(listing
        .iter()
        .any(|(_, i)| i.opcode() == crate::bc::opcode::Opcode::TrustMe));
}

#[test]
fn reify_displays_shared_structure() {
    // Heap built by hand: p(_A, h(_A, _B), f(_B)) with both occurrences of
    // the h and f substructures sharing cells.
    let mut syms = SymbolTable::new();
    let h2 = syms.functor("h", 2);
    let f1 = syms.functor("f", 1);
    let p3 = syms.functor("p", 3);

    let mut machine = Machine::new();
    let base = machine.layout.heap_base();
    let cells = [
        Cell::strc(base + 1).raw(),
        Cell::functor(h2).raw(),
        Cell::r#ref(base + 2).raw(),
        Cell::r#ref(base + 3).raw(),
        Cell::strc(base + 5).raw(),
        Cell::functor(f1).raw(),
        Cell::r#ref(base + 3).raw(),
        Cell::strc(base + 8).raw(),
        Cell::functor(p3).raw(),
        Cell::r#ref(base + 2).raw(),
        Cell::strc(base + 1).raw(),
        Cell::strc(base + 5).raw(),
    ];
    machine.data[base..base + cells.len()].copy_from_slice(&cells);
    machine.h = base + cells.len();

    let value = machine.reify(base + 7).unwrap();
    assert_eq!(
        syms.display(&value).to_string(),
        format!(
            "p(_{a}, h(_{a}, _{b}), f(_{b}))",
            a = base + 2,
            b = base + 3
        )
    );
}

#[test]
fn unify_binds_younger_to_older() {
    let mut machine = Machine::new();
    let base = machine.layout.heap_base();
    machine.data[base] = Cell::r#ref(base).raw();
    machine.data[base + 1] = Cell::r#ref(base + 1).raw();
    machine.h = base + 2;

    assert!(machine.unify(base + 1, base).unwrap());
    assert_eq!(machine.cell_at(base + 1).unwrap(), Cell::r#ref(base));
    assert_eq!(machine.deref(base + 1).unwrap(), base);
    // No choice point, so nothing needs trailing.
    assert!(machine.trail.is_empty());
}
