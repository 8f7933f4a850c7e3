//! Opcode bytes.
//!
//! The ordinal of each variant is its wire opcode; `enum-ordinalize` supplies
//! both directions of the mapping, so the decoder's dispatch is a single
//! `from_ordinal` away from the opcode byte.

use documented::DocumentedVariants;
use enum_ordinalize::Ordinalize;

use crate::bc::instr::Instr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ordinalize, DocumentedVariants)]
#[repr(u8)]
pub enum Opcode {
    /// Allocate a structure header at heap top; store the `Str` cell in a
    /// register.
    PutStruc,
    /// Push a fresh unbound ref; copy it into a register or slot.
    SetVar,
    /// Push a copy of a register or slot.
    SetVal,
    /// `set_val` with one-shot globalization of an unbound stack cell.
    SetLocalVal,
    /// Push a constant cell.
    SetConst,
    /// Push a run of fresh unbound refs.
    SetVoid,
    /// Fresh unbound heap ref written to a slot and an argument register.
    PutVar,
    /// Copy a slot into an argument register.
    PutVal,
    /// `put_val` with a globalizing dereference for unsafe permanents.
    PutUnsafeVal,
    /// Load a constant into an argument register.
    PutConst,
    /// Start building a list pair; list cell written to a register.
    PutList,
    /// Match a register against a structure, selecting read or write mode.
    GetStruc,
    /// Copy an argument register into a slot.
    GetVar,
    /// Unify a slot with an argument register.
    GetVal,
    /// Match an argument register against a constant.
    GetConst,
    /// Match a register against a list pair, selecting read or write mode.
    GetList,
    /// Consume one structure argument into a slot.
    UnifyVar,
    /// Unify a slot with one structure argument.
    UnifyVal,
    /// `unify_val` with one-shot globalization of an unbound stack cell.
    UnifyLocalVal,
    /// Match one structure argument against a constant.
    UnifyConst,
    /// Skip a run of structure arguments.
    UnifyVoid,
    /// Push an environment frame.
    Allocate,
    /// Pop the current environment frame.
    Deallocate,
    /// Call a predicate, saving the continuation and trimming the caller's
    /// frame.
    Call,
    /// Tail-call a predicate.
    Execute,
    /// Return to the saved continuation.
    Proceed,
    /// Push a choice point with an alternative-clause label.
    TryMeElse,
    /// Rewrite the current choice point's alternative label.
    RetryMeElse,
    /// Discard the current choice point.
    TrustMe,
    /// Yield an answer to the enumerator.
    Suspend,
}

impl Opcode {
    pub fn byte(self) -> u8 {
        self.ordinal()
    }

    pub fn from_byte(byte: u8) -> Option<Opcode> {
        Opcode::from_ordinal(byte)
    }

    /// One-line description, taken from the variant's doc comment.
    pub fn doc(self) -> Option<&'static str> {
        self.get_variant_docs().ok()
    }
}

impl<L> Instr<L> {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instr::PutStruc { .. } => Opcode::PutStruc,
            Instr::SetVar { .. } => Opcode::SetVar,
            Instr::SetVal { .. } => Opcode::SetVal,
            Instr::SetLocalVal { .. } => Opcode::SetLocalVal,
            Instr::SetConst { .. } => Opcode::SetConst,
            Instr::SetVoid { .. } => Opcode::SetVoid,
            Instr::PutVar { .. } => Opcode::PutVar,
            Instr::PutVal { .. } => Opcode::PutVal,
            Instr::PutUnsafeVal { .. } => Opcode::PutUnsafeVal,
            Instr::PutConst { .. } => Opcode::PutConst,
            Instr::PutList { .. } => Opcode::PutList,
            Instr::GetStruc { .. } => Opcode::GetStruc,
            Instr::GetVar { .. } => Opcode::GetVar,
            Instr::GetVal { .. } => Opcode::GetVal,
            Instr::GetConst { .. } => Opcode::GetConst,
            Instr::GetList { .. } => Opcode::GetList,
            Instr::UnifyVar { .. } => Opcode::UnifyVar,
            Instr::UnifyVal { .. } => Opcode::UnifyVal,
            Instr::UnifyLocalVal { .. } => Opcode::UnifyLocalVal,
            Instr::UnifyConst { .. } => Opcode::UnifyConst,
            Instr::UnifyVoid { .. } => Opcode::UnifyVoid,
            Instr::Allocate { .. } => Opcode::Allocate,
            Instr::Deallocate => Opcode::Deallocate,
            Instr::Call { .. } => Opcode::Call,
            Instr::Execute { .. } => Opcode::Execute,
            Instr::Proceed => Opcode::Proceed,
            Instr::TryMeElse(_) => Opcode::TryMeElse,
            Instr::RetryMeElse(_) => Opcode::RetryMeElse,
            Instr::TrustMe => Opcode::TrustMe,
            Instr::Suspend => Opcode::Suspend,
        }
    }
}
