//! Predicate assembly and label resolution.
//!
//! A predicate with one clause has no choice-point prologue. With k > 1
//! clauses, clause 0 gets `try_me_else L1`, clause i gets
//! `retry_me_else L(i+1)` and the last clause gets `trust_me`; each label is
//! resolved to the byte offset of the next clause's prologue. Offsets inside
//! a compiled unit are relative to its start; `fixups` records the byte
//! positions of label operands so the loader can rebase them exactly once.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bc::encode::{encode, encoded_len};
use crate::bc::instr::{Instr, Lbl, Local};
use crate::symbol::Functor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledPredicate {
    pub functor: Functor,
    pub code: Vec<u8>,
    /// Byte positions of label operands to rebase at load time.
    pub fixups: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub code: Vec<u8>,
    /// Named query variables and their permanent slots, in slot order.
    pub vars: Vec<(String, Local)>,
    /// Call targets, checked against the call table before execution.
    pub calls: Vec<Functor>,
    pub n_perms: u8,
}

pub(crate) fn assemble_predicate(
    functor: Functor,
    clause_bodies: Vec<Vec<Instr<Lbl>>>,
) -> CompiledPredicate {
    let k = clause_bodies.len();
    let mut instrs: Vec<Instr<Lbl>> = Vec::new();
    let mut label_site: HashMap<Lbl, usize> = HashMap::new();

    if k == 1 {
        instrs = clause_bodies.into_iter().next().unwrap_or_default();
    } else {
        for (i, body) in clause_bodies.into_iter().enumerate() {
            if i > 0 {
                label_site.insert(Lbl(i as u32), instrs.len());
            }
            let prologue = if i == 0 {
                Instr::TryMeElse(Lbl(1))
            } else if i + 1 < k {
                Instr::RetryMeElse(Lbl(i as u32 + 1))
            } else {
                Instr::TrustMe
            };
            instrs.push(prologue);
            instrs.extend(body);
        }
    }

    let (code, fixups) = resolve_and_encode(&instrs, &label_site);
    CompiledPredicate {
        functor,
        code,
        fixups,
    }
}

pub(crate) fn assemble_query(
    instrs: Vec<Instr<Lbl>>,
    vars: Vec<(String, Local)>,
    calls: Vec<Functor>,
    n_perms: u8,
) -> CompiledQuery {
    // Queries have no clause prologue, so no labels either.
    let (code, fixups) = resolve_and_encode(&instrs, &HashMap::new());
    debug_assert!(fixups.is_empty());
    CompiledQuery {
        code,
        vars,
        calls,
        n_perms,
    }
}

fn resolve_and_encode(
    instrs: &[Instr<Lbl>],
    label_site: &HashMap<Lbl, usize>,
) -> (Vec<u8>, Vec<usize>) {
    let mut offsets = Vec::with_capacity(instrs.len());
    let mut at = 0;
    for instr in instrs {
        offsets.push(at);
        at += encoded_len(instr);
    }

    let mut code = Vec::with_capacity(at);
    let mut fixups = Vec::new();
    for instr in instrs {
        let resolved = instr.map_lbl(|l| offsets[label_site[&l]] as u32);
        let start = code.len();
        let enc = encode(&resolved, &mut code);
        if let Some(rel) = enc.label_at {
            fixups.push(start + rel);
        }
    }
    (code, fixups)
}
