//! The instruction dispatch loop and its primitive operations: dereference,
//! bind, trail, unify, frame and choice-point management.

use crate::bc::decode::decode;
use crate::bc::instr::{Arg, Instr, Slot};
use crate::cell::{Cell, Tag};
use crate::defs::{Addr, CodeAddr, Word, NONE_W};
use crate::symbol::{Functor, Sym};

use super::{Fault, Machine, Mode, CP_SLOTS, ENV_SLOTS, NO_CODE};

/// Outcome of one instruction step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Continue,
    /// `suspend` reached: the current bindings form an answer.
    Answer,
    /// Failure with no choice point left: no further answers.
    Exhausted,
}

fn enc_opt(v: Option<Addr>) -> Word {
    match v {
        Some(addr) => addr as Word,
        None => NONE_W,
    }
}

fn dec_opt(word: Word) -> Option<Addr> {
    (word != NONE_W).then_some(word as Addr)
}

fn enc_code(addr: CodeAddr) -> Word {
    if addr == NO_CODE {
        NONE_W
    } else {
        addr as Word
    }
}

fn dec_code(word: Word) -> CodeAddr {
    if word == NONE_W {
        NO_CODE
    } else {
        word as CodeAddr
    }
}

impl Machine {
    /// Execute the instruction at IP.
    pub(crate) fn step(&mut self) -> Result<Step, Fault> {
        let (instr, len) = decode(&self.code, self.ip)?;
        tracing::trace!(ip = self.ip, ?instr, mode = ?self.mode, "step");
        let next = self.ip + len;
        self.ip = next;

        match instr {
            // -- structure building ------------------------------------
            Instr::PutStruc { functor, dst } => {
                let str_addr = self.heap_push(Cell::strc(self.h + 1))?;
                self.heap_push_word(functor.word())?;
                let d = self.slot_addr(dst)?;
                self.data[d] = self.data[str_addr];
            }
            Instr::SetVar { slot } => {
                let fresh = self.push_fresh()?;
                let sa = self.slot_addr(slot)?;
                self.data[sa] = Cell::r#ref(fresh).raw();
            }
            Instr::SetVal { slot } => {
                let sa = self.slot_addr(slot)?;
                let word = self.word_at(sa)?;
                self.heap_push(Cell::from_raw(word))?;
            }
            Instr::SetLocalVal { slot } => {
                let sa = self.slot_addr(slot)?;
                let d = self.deref(sa)?;
                let cell = self.cell_at(d)?;
                if cell.is_unbound_at(d) && self.layout.is_stack(d) {
                    let fresh = self.push_fresh()?;
                    self.bind(d, fresh)?;
                } else {
                    self.heap_push(cell)?;
                }
            }
            Instr::SetConst { name } => {
                self.heap_push(Cell::con(name))?;
            }
            Instr::SetVoid { count } => {
                for _ in 0..count {
                    self.push_fresh()?;
                }
            }
            Instr::PutVar { slot, arg } => {
                let fresh = self.push_fresh()?;
                let sa = self.slot_addr(slot)?;
                let aa = self.arg_addr(arg);
                let word = Cell::r#ref(fresh).raw();
                self.data[sa] = word;
                self.data[aa] = word;
            }
            Instr::PutVal { slot, arg } => {
                let sa = self.slot_addr(slot)?;
                let aa = self.arg_addr(arg);
                self.data[aa] = self.word_at(sa)?;
            }
            Instr::PutUnsafeVal { local, arg } => {
                let ya = self.slot_addr(Slot::Local(local))?;
                let d = self.deref(ya)?;
                let cell = self.cell_at(d)?;
                let aa = self.arg_addr(arg);
                if cell.is_unbound_at(d) && self.layout.is_stack(d) {
                    // The value still lives in a frame slot about to be
                    // trimmed; move it to the heap.
                    let fresh = self.push_fresh()?;
                    self.bind(d, fresh)?;
                    self.data[aa] = Cell::r#ref(fresh).raw();
                } else {
                    self.data[aa] = cell.raw();
                }
            }
            Instr::PutConst { name, arg } => {
                let aa = self.arg_addr(arg);
                self.data[aa] = Cell::con(name).raw();
            }
            Instr::PutList { dst } => {
                let d = self.slot_addr(dst)?;
                self.data[d] = Cell::lis(self.h).raw();
                self.mode = Mode::Write;
            }

            // -- structure matching ------------------------------------
            Instr::GetStruc { functor, src } => {
                let a = self.deref(self.slot_addr(src)?)?;
                let (tag, val) = self.tagged_at(a)?;
                match tag {
                    Tag::Ref => {
                        let str_addr = self.heap_push(Cell::strc(self.h + 1))?;
                        self.heap_push_word(functor.word())?;
                        for _ in 0..functor.arity {
                            self.push_fresh()?;
                        }
                        self.bind(a, str_addr)?;
                        self.s = str_addr + 2;
                        self.mode = Mode::Write;
                    }
                    Tag::Str => {
                        if self.word_at(val)? != functor.word() {
                            return self.backtrack();
                        }
                        self.s = val + 1;
                        self.mode = Mode::Read;
                    }
                    _ => return self.backtrack(),
                }
            }
            Instr::GetVar { slot, arg } => {
                let sa = self.slot_addr(slot)?;
                let aa = self.arg_addr(arg);
                self.data[sa] = self.word_at(aa)?;
            }
            Instr::GetVal { slot, arg } => {
                let sa = self.slot_addr(slot)?;
                let aa = self.arg_addr(arg);
                if !self.unify(sa, aa)? {
                    return self.backtrack();
                }
            }
            Instr::GetConst { name, arg } => {
                let a = self.deref(self.arg_addr(arg))?;
                let (tag, val) = self.tagged_at(a)?;
                match tag {
                    Tag::Ref => self.bind_const(a, name)?,
                    Tag::Con if val == name.0 as Addr => {}
                    _ => return self.backtrack(),
                }
            }
            Instr::GetList { src } => {
                let a = self.deref(self.slot_addr(src)?)?;
                let (tag, val) = self.tagged_at(a)?;
                match tag {
                    Tag::Ref => {
                        let lis_addr = self.heap_push(Cell::lis(self.h + 1))?;
                        self.push_fresh()?;
                        self.push_fresh()?;
                        self.bind(a, lis_addr)?;
                        self.s = lis_addr + 1;
                        self.mode = Mode::Write;
                    }
                    Tag::Lis => {
                        self.s = val;
                        self.mode = Mode::Read;
                    }
                    _ => return self.backtrack(),
                }
            }
            Instr::UnifyVar { slot } => {
                let sa = self.slot_addr(slot)?;
                self.data[sa] = self.word_at(self.s)?;
                self.s += 1;
            }
            Instr::UnifyVal { slot } => {
                let sa = self.slot_addr(slot)?;
                let s = self.s;
                self.s += 1;
                if !self.unify(sa, s)? {
                    return self.backtrack();
                }
            }
            Instr::UnifyLocalVal { slot } => {
                let sa = self.slot_addr(slot)?;
                let d = self.deref(sa)?;
                let cell = self.cell_at(d)?;
                let src = if cell.is_unbound_at(d) && self.layout.is_stack(d) {
                    let fresh = self.push_fresh()?;
                    self.bind(d, fresh)?;
                    fresh
                } else {
                    d
                };
                let s = self.s;
                self.s += 1;
                if !self.unify(src, s)? {
                    return self.backtrack();
                }
            }
            Instr::UnifyConst { name } => {
                let s = self.s;
                self.s += 1;
                let a = self.deref(s)?;
                let (tag, val) = self.tagged_at(a)?;
                match tag {
                    Tag::Ref => self.bind_const(a, name)?,
                    Tag::Con if val == name.0 as Addr => {}
                    _ => return self.backtrack(),
                }
            }
            Instr::UnifyVoid { count } => {
                self.s += count as usize;
            }

            // -- control -----------------------------------------------
            Instr::Allocate { nvars } => {
                let base = self.stack_top()?;
                let nvars = nvars as usize;
                if base + ENV_SLOTS + nvars > self.layout.pdl_base() {
                    return Err(Fault::StackFull);
                }
                self.data[base] = enc_opt(self.e);
                self.data[base + 1] = enc_code(self.cp);
                self.data[base + 2] = nvars as Word;
                for j in 0..nvars {
                    let ya = base + ENV_SLOTS + j;
                    self.data[ya] = Cell::r#ref(ya).raw();
                }
                self.e = Some(base);
            }
            Instr::Deallocate => {
                let e = self.e.ok_or(Fault::NoEnvironment)?;
                self.cp = dec_code(self.word_at(e + 1)?);
                self.e = dec_opt(self.word_at(e)?);
            }
            Instr::Call { pred, live } => {
                // Trim the caller's frame before entering the callee.
                if let Some(e) = self.e {
                    self.data[e + 2] = live as Word;
                }
                match self.call_table.get(&pred) {
                    Some(entry) => {
                        self.cp = next;
                        self.num_args = pred.arity as usize;
                        self.ip = entry.entry;
                    }
                    None => {
                        tracing::debug!(?pred, "call to unresolved predicate fails");
                        return self.backtrack();
                    }
                }
            }
            Instr::Execute { pred } => match self.call_table.get(&pred) {
                Some(entry) => {
                    self.num_args = pred.arity as usize;
                    self.ip = entry.entry;
                }
                None => {
                    tracing::debug!(?pred, "call to unresolved predicate fails");
                    return self.backtrack();
                }
            },
            Instr::Proceed => {
                self.ip = self.cp;
            }
            Instr::TryMeElse(alt) => {
                let n = self.num_args;
                let base = self.stack_top()?;
                if base + CP_SLOTS + n > self.layout.pdl_base() {
                    return Err(Fault::StackFull);
                }
                self.data[base] = n as Word;
                for i in 0..n {
                    self.data[base + 1 + i] = self.data[i];
                }
                self.data[base + n + 1] = enc_opt(self.e);
                self.data[base + n + 2] = enc_code(self.cp);
                self.data[base + n + 3] = enc_opt(self.b);
                self.data[base + n + 4] = alt;
                self.data[base + n + 5] = self.trail.len() as Word;
                self.data[base + n + 6] = self.h as Word;
                self.b = Some(base);
                self.hb = self.h;
            }
            Instr::RetryMeElse(alt) => {
                let b = self.b.ok_or(Fault::NoChoicePoint)?;
                let n = self.word_at(b)? as usize;
                self.data[b + n + 4] = alt;
            }
            Instr::TrustMe => {
                let b = self.b.ok_or(Fault::NoChoicePoint)?;
                let n = self.word_at(b)? as usize;
                let prev = dec_opt(self.word_at(b + n + 3)?);
                self.b = prev;
                self.hb = match prev {
                    Some(p) => {
                        let pn = self.word_at(p)? as usize;
                        self.word_at(p + pn + 6)? as Addr
                    }
                    None => self.layout.heap_base(),
                };
            }
            Instr::Suspend => return Ok(Step::Answer),
        }
        Ok(Step::Continue)
    }

    /// Restore the state saved in the latest choice point and resume at its
    /// recorded alternative. With no choice point, the search is exhausted.
    pub(crate) fn backtrack(&mut self) -> Result<Step, Fault> {
        let Some(b) = self.b else {
            tracing::debug!("fail with no choice point");
            return Ok(Step::Exhausted);
        };
        let n = self.word_at(b)? as usize;
        for i in 0..n {
            self.data[i] = self.data[b + 1 + i];
        }
        self.e = dec_opt(self.word_at(b + n + 1)?);
        self.cp = dec_code(self.word_at(b + n + 2)?);
        self.ip = self.word_at(b + n + 4)? as CodeAddr;
        let mark = self.word_at(b + n + 5)? as usize;
        self.unwind_trail(mark);
        self.h = self.word_at(b + n + 6)? as Addr;
        self.hb = self.h;
        self.num_args = n;
        tracing::debug!(alt = self.ip, "backtrack");
        Ok(Step::Continue)
    }

    // -- primitive operations ------------------------------------------

    pub(crate) fn word_at(&self, addr: Addr) -> Result<Word, Fault> {
        self.data
            .get(addr)
            .copied()
            .ok_or(Fault::CorruptCell { addr })
    }

    pub(crate) fn cell_at(&self, addr: Addr) -> Result<Cell, Fault> {
        Ok(Cell::from_raw(self.word_at(addr)?))
    }

    fn tagged_at(&self, addr: Addr) -> Result<(Tag, Addr), Fault> {
        let cell = self.cell_at(addr)?;
        match cell.tag() {
            Some(tag) => Ok((tag, cell.val())),
            None => Err(Fault::CorruptCell { addr }),
        }
    }

    /// Follow `Ref` chains until an unbound cell or a non-`Ref` cell.
    /// Iterative: reference chains can be long, activation stacks cannot.
    pub(crate) fn deref(&self, mut addr: Addr) -> Result<Addr, Fault> {
        loop {
            let cell = self.cell_at(addr)?;
            match cell.tag() {
                Some(Tag::Ref) if cell.val() != addr => addr = cell.val(),
                Some(_) => return Ok(addr),
                None => return Err(Fault::CorruptCell { addr }),
            }
        }
    }

    fn slot_addr(&self, slot: Slot) -> Result<Addr, Fault> {
        match slot {
            Slot::Reg(r) => Ok(r.0 as Addr),
            Slot::Local(l) => {
                let e = self.e.ok_or(Fault::NoEnvironment)?;
                Ok(e + ENV_SLOTS + l.0 as Addr)
            }
        }
    }

    fn arg_addr(&self, arg: Arg) -> Addr {
        arg.0 as Addr
    }

    /// First free stack address: past the end of whichever of the current
    /// environment frame or choice point is topmost.
    fn stack_top(&self) -> Result<Addr, Fault> {
        let e_top = match self.e {
            Some(e) => {
                let nvars = self.word_at(e + 2)? as usize;
                e + ENV_SLOTS + nvars
            }
            None => self.layout.stack_base(),
        };
        let b_top = match self.b {
            Some(b) => {
                let n = self.word_at(b)? as usize;
                b + CP_SLOTS + n
            }
            None => self.layout.stack_base(),
        };
        Ok(e_top.max(b_top))
    }

    fn heap_push(&mut self, cell: Cell) -> Result<Addr, Fault> {
        self.heap_push_word(cell.raw())
    }

    fn heap_push_word(&mut self, word: Word) -> Result<Addr, Fault> {
        if self.h >= self.layout.stack_base() {
            return Err(Fault::HeapFull);
        }
        let addr = self.h;
        self.data[addr] = word;
        self.h += 1;
        Ok(addr)
    }

    /// Push a fresh unbound variable at heap top.
    fn push_fresh(&mut self) -> Result<Addr, Fault> {
        let addr = self.h;
        self.heap_push(Cell::r#ref(addr))
    }

    /// Record `addr` on the trail if its binding must be undone on
    /// backtracking: heap cells below HB, and stack cells below B.
    fn trail_push(&mut self, addr: Addr) -> Result<(), Fault> {
        let Some(b) = self.b else { return Ok(()) };
        if addr < self.hb || (self.layout.is_stack(addr) && addr < b) {
            if self.trail.len() >= self.layout.trail {
                return Err(Fault::TrailFull);
            }
            self.trail.push(addr);
        }
        Ok(())
    }

    fn unwind_trail(&mut self, mark: usize) {
        while self.trail.len() > mark {
            if let Some(addr) = self.trail.pop() {
                self.data[addr] = Cell::r#ref(addr).raw();
            }
        }
    }

    /// Bind two dereferenced addresses, at least one of them unbound. Two
    /// unbound refs bind the younger (higher) address to the older; a bound
    /// cell is copied into the unbound one.
    fn bind(&mut self, a: Addr, b: Addr) -> Result<(), Fault> {
        let ca = self.cell_at(a)?;
        let cb = self.cell_at(b)?;
        let a_free = ca.is_unbound_at(a);
        let b_free = cb.is_unbound_at(b);
        if a_free && b_free {
            if a == b {
                return Ok(());
            }
            let (from, to) = if a > b { (a, b) } else { (b, a) };
            self.data[from] = Cell::r#ref(to).raw();
            self.trail_push(from)
        } else if a_free {
            self.data[a] = cb.raw();
            self.trail_push(a)
        } else if b_free {
            self.data[b] = ca.raw();
            self.trail_push(b)
        } else {
            debug_assert!(false, "bind requires an unbound side");
            Ok(())
        }
    }

    fn bind_const(&mut self, addr: Addr, name: Sym) -> Result<(), Fault> {
        self.data[addr] = Cell::con(name).raw();
        self.trail_push(addr)
    }

    fn pdl_push(&mut self, a: Addr, b: Addr) -> Result<(), Fault> {
        if self.pdl < self.layout.pdl_base() + 2 {
            return Err(Fault::PdlFull);
        }
        self.pdl -= 2;
        self.data[self.pdl] = a as Word;
        self.data[self.pdl + 1] = b as Word;
        Ok(())
    }

    /// Unify the terms at two addresses. `Ok(false)` is ordinary failure.
    pub(crate) fn unify(&mut self, a1: Addr, a2: Addr) -> Result<bool, Fault> {
        self.pdl = self.layout.data_len();
        self.pdl_push(a1, a2)?;
        while self.pdl < self.layout.data_len() {
            let d1 = self.data[self.pdl] as Addr;
            let d2 = self.data[self.pdl + 1] as Addr;
            self.pdl += 2;
            let d1 = self.deref(d1)?;
            let d2 = self.deref(d2)?;
            if d1 == d2 {
                continue;
            }
            let (t1, v1) = self.tagged_at(d1)?;
            let (t2, v2) = self.tagged_at(d2)?;
            if t1 == Tag::Ref || t2 == Tag::Ref {
                self.bind(d1, d2)?;
                continue;
            }
            match (t1, t2) {
                (Tag::Con, Tag::Con) if v1 == v2 => {}
                (Tag::Str, Tag::Str) => {
                    let f1 = self.word_at(v1)?;
                    let f2 = self.word_at(v2)?;
                    if f1 != f2 {
                        return Ok(false);
                    }
                    let arity = Functor::from_word(f1).arity as usize;
                    for k in 0..arity {
                        self.pdl_push(v1 + 1 + k, v2 + 1 + k)?;
                    }
                }
                (Tag::Lis, Tag::Lis) => {
                    self.pdl_push(v1, v2)?;
                    self.pdl_push(v1 + 1, v2 + 1)?;
                }
                _ => return Ok(false),
            }
        }
        Ok(true)
    }
}
