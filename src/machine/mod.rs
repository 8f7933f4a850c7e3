//! The execution engine.
//!
//! One machine owns one data segment — a single array of 32-bit words
//! holding, in order, the X registers, the heap (growing up), the stack
//! (growing up) and the push-down unification list (growing down from the
//! top) — plus the code segment and the call table. Keeping everything in
//! one array makes every address a plain offset, so dereferencing and
//! unification never dispatch on which region an address lives in.

use core::fmt;
use std::collections::HashMap;

use derive_more::From;

use crate::bc::decode::{disassemble, DecodeError};
use crate::bc::instr::Instr;
use crate::compile::{CompiledPredicate, CompiledQuery};
use crate::defs::{Addr, CodeAddr, Word};
use crate::symbol::Functor;

pub mod answers;
mod exec;
#[cfg(test)]
mod tests;

pub use answers::{Answers, Bindings, Value};

/// Code-register value meaning "no continuation".
pub(crate) const NO_CODE: CodeAddr = usize::MAX;

/// Environment frame: previous E, saved CP, live permanent count, then the
/// Y slots.
pub(crate) const ENV_SLOTS: usize = 3;

/// Choice-point frame: argument count, the saved A registers, then saved E,
/// CP, previous B, the next alternative, the trail mark and the heap mark.
pub(crate) const CP_SLOTS: usize = 7;

/// Sizes of the data-segment regions and the code/trail caps, fixed at
/// machine construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub regs: usize,
    pub heap: usize,
    pub stack: usize,
    pub pdl: usize,
    /// Maximum trail entries.
    pub trail: usize,
    /// Maximum code bytes.
    pub code: usize,
}

impl Default for Layout {
    fn default() -> Self {
        Layout {
            regs: 256,
            heap: 8192,
            stack: 8192,
            pdl: 512,
            trail: 8192,
            code: 1 << 16,
        }
    }
}

impl Layout {
    pub fn heap_base(&self) -> Addr {
        self.regs
    }

    pub fn stack_base(&self) -> Addr {
        self.regs + self.heap
    }

    pub fn pdl_base(&self) -> Addr {
        self.regs + self.heap + self.stack
    }

    pub fn data_len(&self) -> usize {
        self.pdl_base() + self.pdl
    }

    pub fn is_stack(&self, addr: Addr) -> bool {
        addr >= self.stack_base() && addr < self.pdl_base()
    }
}

/// Read/write mode of the structure-matching instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallEntry {
    pub entry: CodeAddr,
    pub len: usize,
}

/// Fatal engine faults. Unification failure is not one of these: it is
/// normal control flow, consumed by backtracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, From)]
pub enum Fault {
    HeapFull,
    StackFull,
    TrailFull,
    PdlFull,
    /// A stack-slot operand with no current environment frame.
    NoEnvironment,
    /// `retry_me_else`/`trust_me` with no current choice point.
    NoChoicePoint,
    CorruptCell { addr: Addr },
    #[from]
    BadCode(DecodeError),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::HeapFull => write!(f, "heap exhausted"),
            Fault::StackFull => write!(f, "stack exhausted"),
            Fault::TrailFull => write!(f, "trail exhausted"),
            Fault::PdlFull => write!(f, "unification push-down list exhausted"),
            Fault::NoEnvironment => write!(f, "stack-slot access with no environment frame"),
            Fault::NoChoicePoint => write!(f, "choice-point instruction with no choice point"),
            Fault::CorruptCell { addr } => write!(f, "corrupt cell at data address {addr}"),
            Fault::BadCode(e) => write!(f, "invalid byte code: {e}"),
        }
    }
}

impl std::error::Error for Fault {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// The predicate is already in the call table.
    Redefined(Functor),
    CodeFull,
    /// A fixup position lies outside the predicate's code.
    BadFixup(usize),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Redefined(p) => {
                write!(f, "predicate #{}/{} is already loaded", p.sym.0, p.arity)
            }
            LoadError::CodeFull => write!(f, "code segment exhausted"),
            LoadError::BadFixup(pos) => write!(f, "label fixup at byte {pos} is out of range"),
        }
    }
}

impl std::error::Error for LoadError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// The query calls a predicate absent from the call table.
    Undefined(Functor),
    CodeFull,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Undefined(p) => {
                write!(f, "query calls undefined predicate #{}/{}", p.sym.0, p.arity)
            }
            LinkError::CodeFull => write!(f, "code segment exhausted"),
        }
    }
}

impl std::error::Error for LinkError {}

pub struct Machine {
    layout: Layout,
    data: Vec<Word>,
    code: Vec<u8>,
    call_table: HashMap<Functor, CallEntry>,
    trail: Vec<Addr>,

    /// Instruction pointer.
    ip: CodeAddr,
    /// Continuation pointer.
    cp: CodeAddr,
    /// Current environment frame.
    e: Option<Addr>,
    /// Latest choice point.
    b: Option<Addr>,
    /// Heap top.
    h: Addr,
    /// Heap top at the time of the latest choice point.
    hb: Addr,
    /// Structure argument pointer (read/write mode).
    s: Addr,
    /// Push-down list top; grows down, empty at `layout.data_len()`.
    pdl: Addr,
    mode: Mode,
    /// Argument count of the predicate being entered, for choice points.
    num_args: usize,
}

impl Machine {
    pub fn new() -> Machine {
        Machine::with_layout(Layout::default())
    }

    pub fn with_layout(layout: Layout) -> Machine {
        // The register bank must cover every u8-indexed operand.
        let layout = Layout {
            regs: layout.regs.max(u8::MAX as usize + 1),
            ..layout
        };
        Machine {
            layout,
            data: vec![0; layout.data_len()],
            code: Vec::new(),
            call_table: HashMap::new(),
            trail: Vec::new(),
            ip: 0,
            cp: NO_CODE,
            e: None,
            b: None,
            h: layout.heap_base(),
            hb: layout.heap_base(),
            s: layout.heap_base(),
            pdl: layout.data_len(),
            mode: Mode::Read,
            num_args: 0,
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Append a compiled predicate to the code segment and extend the call
    /// table, rebasing its label offsets to their absolute positions.
    pub fn load(&mut self, pred: &CompiledPredicate) -> Result<(), LoadError> {
        if self.call_table.contains_key(&pred.functor) {
            return Err(LoadError::Redefined(pred.functor));
        }
        if self.code.len() + pred.code.len() > self.layout.code {
            return Err(LoadError::CodeFull);
        }
        let base = self.code.len();
        self.code.extend_from_slice(&pred.code);
        for &pos in &pred.fixups {
            let at = base + pos;
            let Some(bytes) = self.code.get(at..at + 4) else {
                return Err(LoadError::BadFixup(pos));
            };
            let offset = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            let absolute = offset + base as u32;
            self.code[at..at + 4].copy_from_slice(&absolute.to_le_bytes());
        }
        self.call_table.insert(
            pred.functor,
            CallEntry {
                entry: base,
                len: pred.code.len(),
            },
        );
        tracing::debug!(pred = ?pred.functor, entry = base, len = pred.code.len(), "loaded");
        Ok(())
    }

    /// Clear code, data and call table.
    pub fn reset(&mut self) {
        *self = Machine::with_layout(self.layout);
    }

    pub fn entry(&self, functor: Functor) -> Option<CallEntry> {
        self.call_table.get(&functor).copied()
    }

    /// Disassemble one loaded predicate.
    pub fn listing(
        &self,
        functor: Functor,
    ) -> Option<Result<Vec<(CodeAddr, Instr<u32>)>, DecodeError>> {
        let CallEntry { entry, len } = self.entry(functor)?;
        let listing = disassemble(&self.code[entry..entry + len]).map(|instrs| {
            instrs
                .into_iter()
                .map(|(at, instr)| (entry + at, instr))
                .collect()
        });
        Some(listing)
    }

    /// Start resolving a query, yielding one binding set per answer.
    ///
    /// The query's call targets are checked against the call table first; an
    /// undefined predicate is a linkage error surfaced before execution.
    /// The query's code is appended to the code segment for the duration of
    /// the enumeration and truncated again when the iterator is dropped.
    pub fn resolve_query(&mut self, query: &CompiledQuery) -> Result<Answers<'_>, LinkError> {
        for target in &query.calls {
            if !self.call_table.contains_key(target) {
                return Err(LinkError::Undefined(*target));
            }
        }
        if self.code.len() + query.code.len() > self.layout.code {
            return Err(LinkError::CodeFull);
        }
        let base = self.code.len();
        self.code.extend_from_slice(&query.code);
        self.start(base);
        Ok(Answers::new(self, query.vars.clone(), base))
    }

    /// Reset the run-time state and point the machine at an entry offset.
    pub(crate) fn start(&mut self, entry: CodeAddr) {
        self.ip = entry;
        self.cp = NO_CODE;
        self.e = None;
        self.b = None;
        self.h = self.layout.heap_base();
        self.hb = self.h;
        self.s = self.h;
        self.pdl = self.layout.data_len();
        self.trail.clear();
        self.mode = Mode::Read;
        self.num_args = 0;
    }
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new()
    }
}
