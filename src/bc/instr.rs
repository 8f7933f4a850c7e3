//! The instruction set, generic over its label operand.
//!
//! The compiler emits `Instr<Lbl>` with compiler-local labels; assembly maps
//! them to code offsets with [`Instr::map_lbl`], giving the `Instr<u32>` form
//! the encoder and the engine work with.

use core::fmt;

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::symbol::{Functor, Sym};

/// A compiler-local label, replaced by a code offset at assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From)]
pub struct Lbl(pub u32);

impl fmt::Display for Lbl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// An X register (the argument registers are the low indices of the same
/// bank).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From, Serialize, Deserialize)]
pub struct Reg(pub u8);

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X{}", self.0)
    }
}

/// A permanent variable slot in the current environment frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From, Serialize, Deserialize)]
pub struct Local(pub u8);

impl fmt::Display for Local {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Y{}", self.0)
    }
}

/// An argument register named as such.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From, Serialize, Deserialize)]
pub struct Arg(pub u8);

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

impl From<Arg> for Reg {
    fn from(arg: Arg) -> Self {
        Reg(arg.0)
    }
}

/// A register or a stack slot; the distinction is the addressing-mode byte of
/// the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From, Serialize, Deserialize)]
pub enum Slot {
    #[from]
    Reg(Reg),
    #[from]
    Local(Local),
}

impl Slot {
    pub fn reg(r: impl Into<Reg>) -> Self {
        Slot::Reg(r.into())
    }

    pub fn local(l: impl Into<Local>) -> Self {
        Slot::Local(l.into())
    }
}

impl From<Arg> for Slot {
    fn from(arg: Arg) -> Self {
        Slot::Reg(Reg(arg.0))
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Reg(r) => write!(f, "{r}"),
            Slot::Local(l) => write!(f, "{l}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr<L = u32> {
    /// Allocate a structure header (`Str` cell plus functor cell) at heap top
    /// and store the `Str` cell in `dst`. Arguments follow via `set_*`.
    PutStruc { functor: Functor, dst: Slot },
    /// Push a fresh unbound ref at heap top and copy it into `slot`.
    SetVar { slot: Slot },
    /// Push a copy of `slot` at heap top.
    SetVal { slot: Slot },
    /// Like `set_val`, but globalize first if the slot still dereferences to
    /// an unbound stack cell.
    SetLocalVal { slot: Slot },
    /// Push a constant cell at heap top.
    SetConst { name: Sym },
    /// Push `count` fresh unbound refs at heap top.
    SetVoid { count: u8 },
    /// Fresh unbound heap ref, written to both `slot` and `arg`.
    PutVar { slot: Slot, arg: Arg },
    /// Copy `slot` into `arg`.
    PutVal { slot: Slot, arg: Arg },
    /// As `put_val` for a permanent slot, but dereference and globalize an
    /// unbound stack cell so the value survives frame trimming.
    PutUnsafeVal { local: Local, arg: Arg },
    /// Load a constant into `arg`.
    PutConst { name: Sym, arg: Arg },
    /// Start building a list pair at heap top, list cell written to `dst`.
    PutList { dst: Slot },
    /// Match `src` against a structure `functor`, entering read or write
    /// mode.
    GetStruc { functor: Functor, src: Slot },
    /// Copy `arg` into `slot`.
    GetVar { slot: Slot, arg: Arg },
    /// Unify `slot` with `arg`.
    GetVal { slot: Slot, arg: Arg },
    /// Match `arg` against a constant.
    GetConst { name: Sym, arg: Arg },
    /// Match `src` against a list pair, entering read or write mode.
    GetList { src: Slot },
    /// Read mode: copy the next structure argument into `slot`. Write mode:
    /// the next argument cell is fresh; copy its ref.
    UnifyVar { slot: Slot },
    /// Unify `slot` with the next structure argument.
    UnifyVal { slot: Slot },
    /// As `unify_val`, globalizing an unbound stack cell first.
    UnifyLocalVal { slot: Slot },
    /// Match the next structure argument against a constant.
    UnifyConst { name: Sym },
    /// Skip `count` structure arguments (anonymous variables).
    UnifyVoid { count: u8 },
    /// Push an environment frame with `nvars` permanent slots.
    Allocate { nvars: u8 },
    /// Pop the current environment frame.
    Deallocate,
    /// Call a predicate; `live` is the caller's permanent-variable count
    /// still needed after this call (environment trimming).
    Call { pred: Functor, live: u8 },
    /// Tail-call a predicate.
    Execute { pred: Functor },
    /// Return to the saved continuation.
    Proceed,
    /// Push a choice point whose alternative clause is at the label.
    TryMeElse(L),
    /// Rewrite the current choice point's alternative to the label.
    RetryMeElse(L),
    /// Discard the current choice point.
    TrustMe,
    /// Yield the current bindings to the enumerator; resumption backtracks.
    Suspend,
}

impl<L> Instr<L> {
    pub fn map_lbl<M>(self, f: impl Fn(L) -> M) -> Instr<M> {
        match self {
            Instr::PutStruc { functor, dst } => Instr::PutStruc { functor, dst },
            Instr::SetVar { slot } => Instr::SetVar { slot },
            Instr::SetVal { slot } => Instr::SetVal { slot },
            Instr::SetLocalVal { slot } => Instr::SetLocalVal { slot },
            Instr::SetConst { name } => Instr::SetConst { name },
            Instr::SetVoid { count } => Instr::SetVoid { count },
            Instr::PutVar { slot, arg } => Instr::PutVar { slot, arg },
            Instr::PutVal { slot, arg } => Instr::PutVal { slot, arg },
            Instr::PutUnsafeVal { local, arg } => Instr::PutUnsafeVal { local, arg },
            Instr::PutConst { name, arg } => Instr::PutConst { name, arg },
            Instr::PutList { dst } => Instr::PutList { dst },
            Instr::GetStruc { functor, src } => Instr::GetStruc { functor, src },
            Instr::GetVar { slot, arg } => Instr::GetVar { slot, arg },
            Instr::GetVal { slot, arg } => Instr::GetVal { slot, arg },
            Instr::GetConst { name, arg } => Instr::GetConst { name, arg },
            Instr::GetList { src } => Instr::GetList { src },
            Instr::UnifyVar { slot } => Instr::UnifyVar { slot },
            Instr::UnifyVal { slot } => Instr::UnifyVal { slot },
            Instr::UnifyLocalVal { slot } => Instr::UnifyLocalVal { slot },
            Instr::UnifyConst { name } => Instr::UnifyConst { name },
            Instr::UnifyVoid { count } => Instr::UnifyVoid { count },
            Instr::Allocate { nvars } => Instr::Allocate { nvars },
            Instr::Deallocate => Instr::Deallocate,
            Instr::Call { pred, live } => Instr::Call { pred, live },
            Instr::Execute { pred } => Instr::Execute { pred },
            Instr::Proceed => Instr::Proceed,
            Instr::TryMeElse(l) => Instr::TryMeElse(f(l)),
            Instr::RetryMeElse(l) => Instr::RetryMeElse(f(l)),
            Instr::TrustMe => Instr::TrustMe,
            Instr::Suspend => Instr::Suspend,
        }
    }
}
