//! Bite code generation
//!
//! Walks the bite tree emitting through an abstract [`Emitter`]. Four
//! allocatable registers are handed out from a free list; binary operands
//! compile larger-subtree-first, right-hand constants and parameters fold
//! into immediate or memory operands, and when both sides exceed the free
//! registers the right operand spills to a numbered frame slot. Self-tail
//! calls write their arguments back into the incoming argument array
//! (skipping moves of a parameter onto itself) and jump to the patched
//! prologue end. If no spill slots were needed the prologue is elided by
//! shifting the emitted code back over it.

use crate::runtime::value::{NIL, TRUE};

use super::backend::{Emitter, Patch, Reg};
use super::ir::{BiteId, BiteOp, Bites, WORD};
use super::CodegenError;

/// Number of allocatable registers.
const ALLOCATABLE: i8 = 4;

/// Allocatable index -> abstract register.
fn hw(index: i8) -> Reg {
    match index {
        0 => Reg::Ret,
        1 => Reg::Tmp1,
        2 => Reg::Tmp2,
        3 => Reg::Tmp3,
        _ => unreachable!("register index {index} out of range"),
    }
}

/// Ordered free-register list. Copy semantics give the save/restore
/// discipline around operand compilation.
#[derive(Clone, Copy)]
struct RegPool {
    regs: [i8; ALLOCATABLE as usize],
    len: usize,
}

impl RegPool {
    fn full() -> RegPool {
        RegPool {
            regs: [0, 1, 2, 3],
            len: ALLOCATABLE as usize,
        }
    }

    fn first(&self) -> i8 {
        assert!(self.len > 0, "register pool exhausted");
        self.regs[0]
    }

    fn available(&self) -> usize {
        self.len
    }

    fn remove(&mut self, reg: i8) {
        let pos = self.regs[..self.len]
            .iter()
            .position(|&r| r == reg)
            .expect("removing a register that is not free");
        for i in pos + 1..self.len {
            self.regs[i - 1] = self.regs[i];
        }
        self.len -= 1;
    }

    fn in_use(&self, reg: i8) -> bool {
        !self.regs[..self.len].contains(&reg)
    }
}

/// Either of the two comparison flavors.
#[derive(Clone, Copy, PartialEq, Eq)]
enum BinKind {
    Add,
    Sub,
    Less,
    Eq,
}

struct Codegen<'a, E: Emitter> {
    emit: &'a mut E,
    bites: &'a mut Bites,
    pool: RegPool,
    /// Spill slots handed out so far.
    temps: i32,
    /// Pending jumps to the (post-)prologue from `Recurse` sites.
    markers: Vec<Patch>,
    /// Host helper address for `WriteChar`.
    write_char: usize,
}

/// Generate the complete native body for `root`.
///
/// The prologue reserves a patchable spill area; its final size (and hence
/// the recursion target) is only known after compilation, so recursion
/// jumps are recorded as markers and patched at the end. When no spill
/// slots were used the prologue is shifted away entirely; the recorded
/// displacements stay correct because source and target move together.
pub fn generate<E: Emitter>(
    emit: &mut E,
    bites: &mut Bites,
    root: BiteId,
    write_char: usize,
) -> Result<(), CodegenError> {
    emit.prologue();
    let stack_patch = emit.sub_reg_imm32_patchable(Reg::Stack);
    let prologue_end = emit.pos();

    let (result_reg, temps, markers) = {
        let mut cg = Codegen {
            emit: &mut *emit,
            bites: &mut *bites,
            pool: RegPool::full(),
            temps: 0,
            markers: Vec::new(),
            write_char,
        };
        cg.compile(root)?;
        (cg.reg_of(root), cg.temps, cg.markers)
    };

    if result_reg != 0 {
        emit.mov_reg_reg(Reg::Ret, hw(result_reg));
    }

    for marker in markers {
        emit.patch_jump_to(marker, prologue_end);
    }

    if temps > 0 {
        emit.patch_imm32(stack_patch, temps * WORD);
        emit.add_reg_imm(Reg::Stack, temps * WORD);
        emit.epilogue();
    } else {
        emit.discard_range(0, prologue_end);
    }
    emit.ret();
    Ok(())
}

impl<'a, E: Emitter> Codegen<'a, E> {
    fn reg_of(&self, id: BiteId) -> i8 {
        let reg = self.bites.node(id).reg;
        debug_assert!(reg >= 0, "bite compiled without a register");
        reg
    }

    fn set_reg(&mut self, id: BiteId, reg: i8) {
        self.bites.node_mut(id).reg = reg;
    }

    fn count_of(&self, id: BiteId) -> u32 {
        self.bites.node(id).reg_count
    }

    fn compile(&mut self, id: BiteId) -> Result<(), CodegenError> {
        match self.bites.op(id).clone() {
            BiteOp::Constant(w) => {
                let reg = self.pool.first();
                self.emit.mov_reg_imm64(hw(reg), w as u64);
                self.set_reg(id, reg);
                Ok(())
            }
            BiteOp::Parameter(offset) => {
                let reg = self.pool.first();
                self.emit.load(hw(reg), Reg::Args, offset);
                self.set_reg(id, reg);
                Ok(())
            }
            BiteOp::Add(lhs, rhs) => self.compile_binary(id, lhs, rhs, BinKind::Add),
            BiteOp::Sub(lhs, rhs) => self.compile_binary(id, lhs, rhs, BinKind::Sub),
            BiteOp::Eq(lhs, rhs) => {
                self.compile_binary(id, lhs, rhs, BinKind::Eq)?;
                self.compile_cmp_tail(id, BinKind::Eq);
                Ok(())
            }
            BiteOp::Less(lhs, rhs) => {
                self.compile_binary(id, lhs, rhs, BinKind::Less)?;
                self.compile_cmp_tail(id, BinKind::Less);
                Ok(())
            }
            BiteOp::Neg(value) => {
                self.compile(value)?;
                let reg = self.reg_of(value);
                self.emit.neg_reg(hw(reg));
                self.set_reg(id, reg);
                Ok(())
            }
            BiteOp::Ptr(base, disp) => {
                self.compile(base)?;
                let reg = self.reg_of(base);
                self.emit.load(hw(reg), hw(reg), disp);
                self.set_reg(id, reg);
                Ok(())
            }
            BiteOp::If {
                cond,
                then_branch,
                else_branch,
            } => self.compile_if(id, cond, then_branch, else_branch),
            BiteOp::Recurse(args) => self.compile_recurse(id, &args),
            BiteOp::Call { args, entry } => self.compile_call(id, &args, entry),
            BiteOp::Progn(args) => {
                for &arg in &args {
                    self.compile(arg)?;
                }
                let last = *args.last().expect("progn lowered empty");
                let reg = self.reg_of(last);
                self.set_reg(id, reg);
                Ok(())
            }
            BiteOp::WriteChar(args) => self.compile_write_char(id, &args),
        }
    }

    /// Binary operands in Sethi–Ullman order. The result lands in the
    /// left operand's register.
    fn compile_binary(
        &mut self,
        id: BiteId,
        lhs: BiteId,
        rhs: BiteId,
        kind: BinKind,
    ) -> Result<(), CodegenError> {
        let lhs_count = self.count_of(lhs);
        let rhs_count = self.count_of(rhs);

        if rhs_count == 0 {
            // The right side is a memory or immediate operand.
            self.compile(lhs)?;
            let dst = hw(self.reg_of(lhs));
            match *self.bites.op(rhs) {
                BiteOp::Parameter(offset) => match kind {
                    BinKind::Add => self.emit.add_reg_mem(dst, Reg::Args, offset),
                    BinKind::Sub => self.emit.sub_reg_mem(dst, Reg::Args, offset),
                    BinKind::Less | BinKind::Eq => self.emit.cmp_reg_mem(dst, Reg::Args, offset),
                },
                BiteOp::Constant(w) => {
                    let imm = i32::try_from(w as i64).map_err(|_| CodegenError::Failure)?;
                    match kind {
                        BinKind::Add => self.emit.add_reg_imm(dst, imm),
                        BinKind::Sub => self.emit.sub_reg_imm(dst, imm),
                        BinKind::Less | BinKind::Eq => self.emit.cmp_reg_imm(dst, imm),
                    }
                }
                _ => return Err(CodegenError::Failure),
            }
            self.set_reg(id, self.reg_of(lhs));
        } else if rhs_count <= lhs_count && (rhs_count as usize) < self.pool.available() {
            self.compile(lhs)?;
            let saved = self.pool;
            self.pool.remove(self.reg_of(lhs));
            self.compile(rhs)?;
            self.pool = saved;

            debug_assert_ne!(self.reg_of(lhs), self.reg_of(rhs));
            self.emit_reg_reg(kind, hw(self.reg_of(lhs)), hw(self.reg_of(rhs)));
            self.set_reg(id, self.reg_of(lhs));
        } else if rhs_count > lhs_count && (lhs_count as usize) < self.pool.available() {
            self.compile(rhs)?;
            let saved = self.pool;
            self.pool.remove(self.reg_of(rhs));
            self.compile(lhs)?;
            self.pool = saved;

            debug_assert_ne!(self.reg_of(lhs), self.reg_of(rhs));
            self.emit_reg_reg(kind, hw(self.reg_of(lhs)), hw(self.reg_of(rhs)));
            self.set_reg(id, self.reg_of(lhs));
        } else {
            // Both sides need every free register: spill the right operand
            // to a numbered frame slot.
            self.compile(rhs)?;
            let temp = self.temps;
            self.temps += 1;
            let offset = -(temp + 1) * WORD;
            if offset < -128 {
                return Err(CodegenError::Failure);
            }
            self.emit.store(Reg::Frame, offset, hw(self.reg_of(rhs)));

            self.compile(lhs)?;
            let dst = hw(self.reg_of(lhs));
            match kind {
                BinKind::Add => self.emit.add_reg_mem(dst, Reg::Frame, offset),
                BinKind::Sub => self.emit.sub_reg_mem(dst, Reg::Frame, offset),
                BinKind::Less | BinKind::Eq => self.emit.cmp_reg_mem(dst, Reg::Frame, offset),
            }
            self.set_reg(id, self.reg_of(lhs));
        }
        Ok(())
    }

    fn emit_reg_reg(&mut self, kind: BinKind, dst: Reg, src: Reg) {
        match kind {
            BinKind::Add => self.emit.add_reg_reg(dst, src),
            BinKind::Sub => self.emit.sub_reg_reg(dst, src),
            BinKind::Less | BinKind::Eq => self.emit.cmp_reg_reg(dst, src),
        }
    }

    /// Materialize a comparison result: `t` or `nil` selected off the
    /// flags the preceding compare left behind.
    fn compile_cmp_tail(&mut self, id: BiteId, kind: BinKind) {
        let reg = hw(self.reg_of(id));
        self.emit.mov_reg_imm32(reg, TRUE.raw() as i32);
        let skip = match kind {
            BinKind::Eq => self.emit.je8(),
            BinKind::Less => self.emit.jl8(),
            _ => unreachable!(),
        };
        self.emit.mov_reg_imm32(reg, NIL.raw() as i32);
        self.emit.patch_jump_here(skip);
    }

    fn compile_if(
        &mut self,
        id: BiteId,
        cond: BiteId,
        then_branch: BiteId,
        else_branch: BiteId,
    ) -> Result<(), CodegenError> {
        let mut fallthrough = then_branch;
        let mut jumped = else_branch;

        let jump_over = match self.bites.op(cond).clone() {
            // A comparison condition feeds the flags straight into the
            // branch; the taken edge goes to the comparison-true arm, so
            // the arms swap.
            BiteOp::Eq(lhs, rhs) => {
                self.compile_binary(cond, lhs, rhs, BinKind::Eq)?;
                core::mem::swap(&mut fallthrough, &mut jumped);
                self.emit.je32()
            }
            BiteOp::Less(lhs, rhs) => {
                self.compile_binary(cond, lhs, rhs, BinKind::Less)?;
                core::mem::swap(&mut fallthrough, &mut jumped);
                self.emit.jl32()
            }
            _ => {
                self.compile(cond)?;
                self.emit.cmp_reg_imm(hw(self.reg_of(cond)), NIL.raw() as i32);
                self.emit.je32()
            }
        };

        self.compile(fallthrough)?;
        let jump_to_end = self.emit.jmp32();
        self.emit.patch_jump_here(jump_over);

        self.compile(jumped)?;
        // Landing both arms in one register saves a move on the common
        // path; reconcile only when they differ.
        if self.reg_of(fallthrough) != self.reg_of(jumped) {
            self.emit
                .mov_reg_reg(hw(self.reg_of(fallthrough)), hw(self.reg_of(jumped)));
        }
        self.emit.patch_jump_here(jump_to_end);

        self.set_reg(id, self.reg_of(fallthrough));
        Ok(())
    }

    /// Tail self-call: evaluate each argument into a stack temporary,
    /// write them all back into the incoming argument array, jump to the
    /// prologue end. A move of parameter `i` into slot `i` is redundant
    /// and skipped entirely.
    fn compile_recurse(&mut self, id: BiteId, args: &[BiteId]) -> Result<(), CodegenError> {
        // Tail position: nothing partial is held in registers here.
        debug_assert_eq!(self.pool.available(), ALLOCATABLE as usize);

        let redundant: Vec<bool> = args
            .iter()
            .enumerate()
            .map(|(i, &arg)| {
                matches!(*self.bites.op(arg), BiteOp::Parameter(off) if off == i as i32 * WORD)
            })
            .collect();
        let live = redundant.iter().filter(|&&r| !r).count();
        let block = live as i32 * WORD;

        if live > 0 {
            self.emit.sub_reg_imm(Reg::Stack, block);
        }
        let mut slot = 0;
        for (i, &arg) in args.iter().enumerate() {
            if redundant[i] {
                continue;
            }
            self.compile(arg)?;
            self.emit.store(Reg::Stack, slot * WORD, hw(self.reg_of(arg)));
            slot += 1;
        }

        let tmp = hw(self.pool.first());
        let mut slot = 0;
        for (i, _) in args.iter().enumerate() {
            if redundant[i] {
                continue;
            }
            self.emit.load(tmp, Reg::Stack, slot * WORD);
            self.emit.store(Reg::Args, i as i32 * WORD, tmp);
            slot += 1;
        }
        if live > 0 {
            self.emit.add_reg_imm(Reg::Stack, block);
        }

        // Target patched once the prologue size is final.
        let marker = self.emit.jmp32();
        self.markers.push(marker);

        self.set_reg(id, self.pool.first());
        Ok(())
    }

    /// Non-tail call: arguments land in a fresh stack block, live
    /// registers are saved, and the argument register is repointed at the
    /// block for the callee.
    fn compile_call(&mut self, id: BiteId, args: &[BiteId], entry: usize) -> Result<(), CodegenError> {
        let len = args.len();
        let block = len as i32 * WORD;

        if len > 0 {
            self.emit.sub_reg_imm(Reg::Stack, block);
        }
        for (i, &arg) in args.iter().enumerate() {
            self.compile(arg)?;
            self.emit.store(Reg::Stack, i as i32 * WORD, hw(self.reg_of(arg)));
        }

        // The argument registers are dead once stored; any other held
        // register must survive the call.
        let arg_regs: Vec<i8> = args.iter().map(|&a| self.reg_of(a)).collect();
        let result_reg = if len > 0 { arg_regs[0] } else { self.pool.first() };
        self.set_reg(id, result_reg);

        let mut saved = Vec::new();
        for reg in 0..ALLOCATABLE {
            if self.pool.in_use(reg) && !arg_regs.contains(&reg) {
                self.emit.push_reg(hw(reg));
                saved.push(reg);
            }
        }

        if len > 0 {
            self.emit.push_reg(Reg::Args);
            self.emit.mov_reg_reg(Reg::Args, Reg::Stack);
            self.emit
                .add_reg_imm(Reg::Args, (saved.len() as i32 + 1) * WORD);
        }

        self.emit.mov_reg_imm64(Reg::Ret, entry as u64);
        self.emit.call_reg(Reg::Ret);
        if result_reg != 0 {
            self.emit.mov_reg_reg(hw(result_reg), Reg::Ret);
        }

        if len > 0 {
            self.emit.pop_reg(Reg::Args);
        }
        for &reg in saved.iter().rev() {
            self.emit.pop_reg(hw(reg));
        }
        if len > 0 {
            self.emit.add_reg_imm(Reg::Stack, block);
        }
        Ok(())
    }

    /// Call out to the host for each character; the whole form produces
    /// `nil`.
    fn compile_write_char(&mut self, id: BiteId, args: &[BiteId]) -> Result<(), CodegenError> {
        let mut last_reg = self.pool.first();
        for &arg in args {
            self.compile(arg)?;
            last_reg = self.reg_of(arg);

            self.emit.push_reg(Reg::Args);
            let mut saved = Vec::new();
            for reg in 0..ALLOCATABLE {
                if self.pool.in_use(reg) {
                    self.emit.push_reg(hw(reg));
                    saved.push(reg);
                }
            }

            self.emit.mov_reg_reg(Reg::Args, hw(last_reg));
            self.emit.mov_reg_imm64(Reg::Ret, self.write_char as u64);
            self.emit.call_reg(Reg::Ret);

            for &reg in saved.iter().rev() {
                self.emit.pop_reg(hw(reg));
            }
            self.emit.pop_reg(Reg::Args);
        }
        self.set_reg(id, last_reg);
        self.emit.mov_reg_imm32(hw(last_reg), NIL.raw() as i32);
        Ok(())
    }
}
