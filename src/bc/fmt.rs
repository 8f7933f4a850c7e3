//! Pretty-printing of instructions, resolving interned names through the
//! symbol table.

use core::fmt;

use heck::ToSnakeCase;

use crate::bc::instr::Instr;
use crate::bc::opcode::Opcode;
use crate::symbol::{DisplayViaTable, SymbolTable};

impl Opcode {
    /// Canonical snake_case mnemonic, derived from the variant name.
    pub fn mnemonic(self) -> String {
        format!("{self:?}").to_snake_case()
    }
}

impl<L: fmt::Display> DisplayViaTable for Instr<L> {
    fn fmt_via(&self, f: &mut fmt::Formatter<'_>, syms: &SymbolTable) -> fmt::Result {
        let name = self.opcode().mnemonic();
        match self {
            Instr::PutStruc { functor, dst } => {
                write!(f, "{name} {dst}, {}", syms.display(functor))
            }
            Instr::GetStruc { functor, src } => {
                write!(f, "{name} {src}, {}", syms.display(functor))
            }
            Instr::SetVar { slot }
            | Instr::SetVal { slot }
            | Instr::SetLocalVal { slot }
            | Instr::UnifyVar { slot }
            | Instr::UnifyVal { slot }
            | Instr::UnifyLocalVal { slot } => write!(f, "{name} {slot}"),
            Instr::SetConst { name: c } | Instr::UnifyConst { name: c } => {
                write!(f, "{name} {}", syms.display(c))
            }
            Instr::SetVoid { count } | Instr::UnifyVoid { count } => write!(f, "{name} {count}"),
            Instr::PutVar { slot, arg }
            | Instr::PutVal { slot, arg }
            | Instr::GetVar { slot, arg }
            | Instr::GetVal { slot, arg } => write!(f, "{name} {slot}, {arg}"),
            Instr::PutUnsafeVal { local, arg } => write!(f, "{name} {local}, {arg}"),
            Instr::PutConst { name: c, arg } | Instr::GetConst { name: c, arg } => {
                write!(f, "{name} {}, {arg}", syms.display(c))
            }
            Instr::PutList { dst } => write!(f, "{name} {dst}"),
            Instr::GetList { src } => write!(f, "{name} {src}"),
            Instr::Allocate { nvars } => write!(f, "{name} {nvars}"),
            Instr::Call { pred, live } => {
                write!(f, "{name} {}, {live}", syms.display(pred))
            }
            Instr::Execute { pred } => write!(f, "{name} {}", syms.display(pred)),
            Instr::TryMeElse(l) | Instr::RetryMeElse(l) => write!(f, "{name} {l}"),
            Instr::Deallocate | Instr::Proceed | Instr::TrustMe | Instr::Suspend => {
                write!(f, "{name}")
            }
        }
    }
}
