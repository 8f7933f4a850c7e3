//! Instruction encoder.
//!
//! Wire format: a one-byte opcode, then operands. Addressing modes, register
//! indices and small counts are one byte each; functor references (constants
//! included, as arity-0 functors) are 4-byte little-endian words packing
//! `(arity << 24) | name`; label operands are 4-byte little-endian code
//! offsets.

use crate::bc::instr::{Instr, Slot};
use crate::bc::opcode::Opcode;
use crate::bc::{REG_ADDR, STACK_ADDR};
use crate::symbol::{Functor, Sym};

/// Result of encoding one instruction.
pub struct Encoded {
    pub len: usize,
    /// Byte offset (relative to the instruction start) of a label operand,
    /// if the instruction has one. Assembly records these as fixups so the
    /// loader can rebase label offsets.
    pub label_at: Option<usize>,
}

pub fn encoded_len<L>(instr: &Instr<L>) -> usize {
    match instr.opcode() {
        Opcode::PutStruc | Opcode::GetStruc => 7,
        Opcode::PutConst | Opcode::GetConst | Opcode::Call => 6,
        Opcode::SetConst | Opcode::UnifyConst | Opcode::Execute => 5,
        Opcode::TryMeElse | Opcode::RetryMeElse => 5,
        Opcode::PutVar | Opcode::PutVal | Opcode::PutUnsafeVal => 4,
        Opcode::GetVar | Opcode::GetVal => 4,
        Opcode::SetVar | Opcode::SetVal | Opcode::SetLocalVal => 3,
        Opcode::UnifyVar | Opcode::UnifyVal | Opcode::UnifyLocalVal => 3,
        Opcode::PutList | Opcode::GetList => 3,
        Opcode::SetVoid | Opcode::UnifyVoid | Opcode::Allocate => 2,
        Opcode::Deallocate | Opcode::Proceed | Opcode::TrustMe | Opcode::Suspend => 1,
    }
}

fn push_slot(out: &mut Vec<u8>, slot: Slot) {
    match slot {
        Slot::Reg(r) => {
            out.push(REG_ADDR);
            out.push(r.0);
        }
        Slot::Local(l) => {
            out.push(STACK_ADDR);
            out.push(l.0);
        }
    }
}

fn push_functor(out: &mut Vec<u8>, f: Functor) {
    out.extend_from_slice(&f.word().to_le_bytes());
}

fn push_const(out: &mut Vec<u8>, name: Sym) {
    push_functor(out, Functor::atom(name));
}

fn push_label(out: &mut Vec<u8>, offset: u32) {
    out.extend_from_slice(&offset.to_le_bytes());
}

/// Append one instruction (labels already resolved to code offsets).
pub fn encode(instr: &Instr<u32>, out: &mut Vec<u8>) -> Encoded {
    let start = out.len();
    out.push(instr.opcode().byte());
    let mut label_at = None;
    match *instr {
        Instr::PutStruc { functor, dst } => {
            push_slot(out, dst);
            push_functor(out, functor);
        }
        Instr::SetVar { slot } | Instr::SetVal { slot } | Instr::SetLocalVal { slot } => {
            push_slot(out, slot);
        }
        Instr::SetConst { name } => push_const(out, name),
        Instr::SetVoid { count } => out.push(count),
        Instr::PutVar { slot, arg } | Instr::PutVal { slot, arg } => {
            push_slot(out, slot);
            out.push(arg.0);
        }
        Instr::PutUnsafeVal { local, arg } => {
            push_slot(out, Slot::Local(local));
            out.push(arg.0);
        }
        Instr::PutConst { name, arg } => {
            push_const(out, name);
            out.push(arg.0);
        }
        Instr::PutList { dst } => push_slot(out, dst),
        Instr::GetStruc { functor, src } => {
            push_slot(out, src);
            push_functor(out, functor);
        }
        Instr::GetVar { slot, arg } | Instr::GetVal { slot, arg } => {
            push_slot(out, slot);
            out.push(arg.0);
        }
        Instr::GetConst { name, arg } => {
            push_const(out, name);
            out.push(arg.0);
        }
        Instr::GetList { src } => push_slot(out, src),
        Instr::UnifyVar { slot } | Instr::UnifyVal { slot } | Instr::UnifyLocalVal { slot } => {
            push_slot(out, slot);
        }
        Instr::UnifyConst { name } => push_const(out, name),
        Instr::UnifyVoid { count } => out.push(count),
        Instr::Allocate { nvars } => out.push(nvars),
        Instr::Deallocate | Instr::Proceed | Instr::TrustMe | Instr::Suspend => {}
        Instr::Call { pred, live } => {
            push_functor(out, pred);
            out.push(live);
        }
        Instr::Execute { pred } => push_functor(out, pred),
        Instr::TryMeElse(offset) | Instr::RetryMeElse(offset) => {
            label_at = Some(out.len() - start);
            push_label(out, offset);
        }
    }
    let len = out.len() - start;
    debug_assert_eq!(len, encoded_len(instr));
    Encoded { len, label_at }
}
