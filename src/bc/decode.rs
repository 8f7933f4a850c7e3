//! Instruction decoder and disassembler.

use core::fmt;

use crate::bc::instr::{Arg, Instr, Local, Reg, Slot};
use crate::bc::opcode::Opcode;
use crate::bc::{REG_ADDR, STACK_ADDR};
use crate::defs::CodeAddr;
use crate::symbol::{Functor, Sym};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    UnknownOpcode { at: CodeAddr, byte: u8 },
    BadMode { at: CodeAddr, byte: u8 },
    Truncated { at: CodeAddr },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownOpcode { at, byte } => {
                write!(f, "unknown opcode {byte:#04x} at code offset {at}")
            }
            DecodeError::BadMode { at, byte } => {
                write!(f, "bad addressing mode {byte:#04x} at code offset {at}")
            }
            DecodeError::Truncated { at } => {
                write!(f, "code ends inside an instruction at offset {at}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

struct Cursor<'a> {
    code: &'a [u8],
    pos: CodeAddr,
}

impl Cursor<'_> {
    fn u8(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .code
            .get(self.pos)
            .ok_or(DecodeError::Truncated { at: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let at = self.pos;
        let bytes = self
            .code
            .get(at..at + 4)
            .ok_or(DecodeError::Truncated { at })?;
        self.pos += 4;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn slot(&mut self) -> Result<Slot, DecodeError> {
        let at = self.pos;
        let mode = self.u8()?;
        let idx = self.u8()?;
        match mode {
            REG_ADDR => Ok(Slot::Reg(Reg(idx))),
            STACK_ADDR => Ok(Slot::Local(Local(idx))),
            byte => Err(DecodeError::BadMode { at, byte }),
        }
    }

    fn local(&mut self) -> Result<Local, DecodeError> {
        let at = self.pos;
        match self.slot()? {
            Slot::Local(l) => Ok(l),
            Slot::Reg(r) => Err(DecodeError::BadMode { at, byte: r.0 }),
        }
    }

    fn arg(&mut self) -> Result<Arg, DecodeError> {
        Ok(Arg(self.u8()?))
    }

    fn functor(&mut self) -> Result<Functor, DecodeError> {
        Ok(Functor::from_word(self.u32()?))
    }

    fn constant(&mut self) -> Result<Sym, DecodeError> {
        Ok(self.functor()?.sym)
    }
}

/// Decode the instruction starting at `at`; returns it with its encoded
/// length.
pub fn decode(code: &[u8], at: CodeAddr) -> Result<(Instr<u32>, usize), DecodeError> {
    let mut cur = Cursor { code, pos: at };
    let byte = cur.u8()?;
    let op = Opcode::from_byte(byte).ok_or(DecodeError::UnknownOpcode { at, byte })?;
    let instr = match op {
        Opcode::PutStruc => {
            let dst = cur.slot()?;
            let functor = cur.functor()?;
            Instr::PutStruc { functor, dst }
        }
        Opcode::SetVar => Instr::SetVar { slot: cur.slot()? },
        Opcode::SetVal => Instr::SetVal { slot: cur.slot()? },
        Opcode::SetLocalVal => Instr::SetLocalVal { slot: cur.slot()? },
        Opcode::SetConst => Instr::SetConst {
            name: cur.constant()?,
        },
        Opcode::SetVoid => Instr::SetVoid { count: cur.u8()? },
        Opcode::PutVar => Instr::PutVar {
            slot: cur.slot()?,
            arg: cur.arg()?,
        },
        Opcode::PutVal => Instr::PutVal {
            slot: cur.slot()?,
            arg: cur.arg()?,
        },
        Opcode::PutUnsafeVal => Instr::PutUnsafeVal {
            local: cur.local()?,
            arg: cur.arg()?,
        },
        Opcode::PutConst => Instr::PutConst {
            name: cur.constant()?,
            arg: cur.arg()?,
        },
        Opcode::PutList => Instr::PutList { dst: cur.slot()? },
        Opcode::GetStruc => {
            let src = cur.slot()?;
            let functor = cur.functor()?;
            Instr::GetStruc { functor, src }
        }
        Opcode::GetVar => Instr::GetVar {
            slot: cur.slot()?,
            arg: cur.arg()?,
        },
        Opcode::GetVal => Instr::GetVal {
            slot: cur.slot()?,
            arg: cur.arg()?,
        },
        Opcode::GetConst => Instr::GetConst {
            name: cur.constant()?,
            arg: cur.arg()?,
        },
        Opcode::GetList => Instr::GetList { src: cur.slot()? },
        Opcode::UnifyVar => Instr::UnifyVar { slot: cur.slot()? },
        Opcode::UnifyVal => Instr::UnifyVal { slot: cur.slot()? },
        Opcode::UnifyLocalVal => Instr::UnifyLocalVal { slot: cur.slot()? },
        Opcode::UnifyConst => Instr::UnifyConst {
            name: cur.constant()?,
        },
        Opcode::UnifyVoid => Instr::UnifyVoid { count: cur.u8()? },
        Opcode::Allocate => Instr::Allocate { nvars: cur.u8()? },
        Opcode::Deallocate => Instr::Deallocate,
        Opcode::Call => Instr::Call {
            pred: cur.functor()?,
            live: cur.u8()?,
        },
        Opcode::Execute => Instr::Execute {
            pred: cur.functor()?,
        },
        Opcode::Proceed => Instr::Proceed,
        Opcode::TryMeElse => Instr::TryMeElse(cur.u32()?),
        Opcode::RetryMeElse => Instr::RetryMeElse(cur.u32()?),
        Opcode::TrustMe => Instr::TrustMe,
        Opcode::Suspend => Instr::Suspend,
    };
    Ok((instr, cur.pos - at))
}

/// Decode a whole code buffer into `(offset, instruction)` pairs.
pub fn disassemble(code: &[u8]) -> Result<Vec<(CodeAddr, Instr<u32>)>, DecodeError> {
    let mut out = Vec::new();
    let mut at = 0;
    while at < code.len() {
        let (instr, len) = decode(code, at)?;
        out.push((at, instr));
        at += len;
    }
    Ok(out)
}
