//! The stack-machine code generator: typed AST to x86-64 assembly in
//! Intel syntax.
//!
//! The translation discipline is uniform: every expression leaves exactly
//! one value on the machine stack, and every statement leaves the stack
//! pointer where it found it. Values are computed in `rax` with `rdi` as
//! the second operand. Control flow uses `.L.*` labels numbered by a
//! single monotone counter, and every `return` funnels through one
//! `.L.return.<name>` label per function.

use std::io::Write;

use itertools::Itertools;

use crate::diag::{CompileError, Result};
use crate::lexer::Token;
use crate::types::ast::{Binop, Node, NodeKind, Program, VarId};
use crate::types::ty::{TyId, TyKind};

const ARG_REG1: [&str; 6] = ["dil", "sil", "dl", "cl", "r8b", "r9b"];
const ARG_REG2: [&str; 6] = ["di", "si", "dx", "cx", "r8w", "r9w"];
const ARG_REG4: [&str; 6] = ["edi", "esi", "edx", "ecx", "r8d", "r9d"];
const ARG_REG8: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

/// Emit the whole program to `w`. `toks` is the token vector the program
/// was parsed from, used to anchor the few diagnostics this pass can
/// raise (stray `break`/`continue`, non-lvalues, too many call
/// arguments).
pub fn codegen(prog: &Program, toks: &[Token], w: &mut impl Write) -> Result<()> {
  let mut cg = Codegen {
    prog,
    toks,
    w,
    seq: 0,
    brk: None,
    cont: None,
    switch_cases: vec![],
    funcname: String::new(),
  };
  writeln!(cg.w, ".intel_syntax noprefix")?;
  cg.emit_data()?;
  cg.emit_text()
}

struct Codegen<'a, W> {
  prog: &'a Program,
  toks: &'a [Token],
  w: &'a mut W,
  /// Label sequence counter; every control-flow construct draws fresh
  /// numbers from it.
  seq: u32,
  /// The innermost `.L.break.<n>` target, if any.
  brk: Option<u32>,
  /// The innermost `.L.continue.<n>` target, if any.
  cont: Option<u32>,
  /// Per enclosing switch: the case label numbers (by case ordinal) and
  /// the default label number.
  switch_cases: Vec<(Vec<u32>, Option<u32>)>,
  funcname: String,
}

impl<W: Write> Codegen<'_, W> {
  fn next_seq(&mut self) -> u32 {
    self.seq += 1;
    self.seq
  }

  fn err<T>(&self, node: &Node, msg: impl Into<String>) -> Result<T> {
    Err(CompileError::at(self.toks[node.tok].loc, msg))
  }

  fn node_ty(&self, node: &Node) -> TyId { node.ty.expect("untyped node in codegen") }

  fn is_array(&self, t: TyId) -> bool {
    matches!(self.prog.tys.get(t).kind, TyKind::Array { .. })
  }

  /// Element size of a pointer or array operand.
  fn base_size(&self, t: TyId) -> usize {
    let base = self.prog.tys.base(t).expect("pointer operand");
    self.prog.tys.size(base)
  }

  fn emit_data(&mut self) -> Result<()> {
    let prog = self.prog;
    writeln!(self.w, ".data")?;
    for &g in &prog.globals {
      let var = &prog.vars[g];
      writeln!(self.w, "{}:", var.name)?;
      match &var.contents {
        None => writeln!(self.w, "  .zero {}", prog.tys.size(var.ty))?,
        Some(bytes) => writeln!(self.w, "  .byte {}", bytes.iter().format(", "))?,
      }
    }
    Ok(())
  }

  fn emit_text(&mut self) -> Result<()> {
    let prog = self.prog;
    writeln!(self.w, ".text")?;
    for f in &prog.funcs {
      self.funcname = f.name.clone();
      if !f.is_static {
        writeln!(self.w, ".global {}", f.name)?;
      }
      writeln!(self.w, "{}:", f.name)?;

      writeln!(self.w, "  push rbp")?;
      writeln!(self.w, "  mov rbp, rsp")?;
      writeln!(self.w, "  sub rsp, {}", f.stack_size)?;

      for (i, &p) in f.params.iter().enumerate() {
        self.store_param(p, i)?;
      }
      for node in &f.body {
        self.r#gen(node)?;
      }

      writeln!(self.w, ".L.return.{}:", f.name)?;
      writeln!(self.w, "  mov rsp, rbp")?;
      writeln!(self.w, "  pop rbp")?;
      writeln!(self.w, "  ret")?;
    }
    Ok(())
  }

  /// Spill the `idx`-th parameter from its argument register into its
  /// stack slot.
  fn store_param(&mut self, v: VarId, idx: usize) -> Result<()> {
    let prog = self.prog;
    let var = &prog.vars[v];
    let regs = match prog.tys.size(var.ty) {
      1 => &ARG_REG1,
      2 => &ARG_REG2,
      4 => &ARG_REG4,
      _ => &ARG_REG8,
    };
    let Some(reg) = regs.get(idx) else {
      return Err(CompileError::msg("register out of range"));
    };
    writeln!(self.w, "  mov [rbp-{}], {}", var.offset, reg)?;
    Ok(())
  }

  /// Push the address of an lvalue.
  fn gen_addr(&mut self, node: &Node) -> Result<()> {
    match &node.kind {
      NodeKind::Var(vid) => {
        let prog = self.prog;
        let var = &prog.vars[*vid];
        if var.is_local {
          writeln!(self.w, "  lea rax, [rbp-{}]", var.offset)?;
          writeln!(self.w, "  push rax")?;
        } else {
          writeln!(self.w, "  push offset {}", var.name)?;
        }
        Ok(())
      }
      NodeKind::Deref(e) => self.r#gen(e),
      NodeKind::Member { base, offset, .. } => {
        self.gen_addr(base)?;
        writeln!(self.w, "  pop rax")?;
        writeln!(self.w, "  add rax, {offset}")?;
        writeln!(self.w, "  push rax")?;
        Ok(())
      }
      _ => self.err(node, "not an lvalue"),
    }
  }

  /// Like [`Codegen::gen_addr`], but arrays are not assignable.
  fn gen_lval(&mut self, node: &Node) -> Result<()> {
    if self.is_array(self.node_ty(node)) {
      return self.err(node, "not an lvalue");
    }
    self.gen_addr(node)
  }

  /// Replace the address on top of the stack with the value it points
  /// at, sign-extended to 64 bits.
  fn load(&mut self, t: TyId) -> Result<()> {
    writeln!(self.w, "  pop rax")?;
    match self.prog.tys.size(t) {
      1 => writeln!(self.w, "  movsx rax, byte ptr [rax]")?,
      2 => writeln!(self.w, "  movsx rax, word ptr [rax]")?,
      4 => writeln!(self.w, "  movsxd rax, dword ptr [rax]")?,
      _ => writeln!(self.w, "  mov rax, [rax]")?,
    }
    writeln!(self.w, "  push rax")?;
    Ok(())
  }

  /// Pop a value and an address, store the value, and leave the value on
  /// the stack. `_Bool` stores coerce to 0 or 1 first.
  fn store(&mut self, t: TyId) -> Result<()> {
    writeln!(self.w, "  pop rdi")?;
    writeln!(self.w, "  pop rax")?;
    if matches!(self.prog.tys.get(t).kind, TyKind::Bool) {
      writeln!(self.w, "  cmp rdi, 0")?;
      writeln!(self.w, "  setne dil")?;
      writeln!(self.w, "  movzb rdi, dil")?;
    }
    match self.prog.tys.size(t) {
      1 => writeln!(self.w, "  mov [rax], dil")?,
      2 => writeln!(self.w, "  mov [rax], di")?,
      4 => writeln!(self.w, "  mov [rax], edi")?,
      _ => writeln!(self.w, "  mov [rax], rdi")?,
    }
    writeln!(self.w, "  push rdi")?;
    Ok(())
  }

  /// Narrow the top of the stack to the cast target type.
  fn truncate(&mut self, t: TyId) -> Result<()> {
    writeln!(self.w, "  pop rax")?;
    if matches!(self.prog.tys.get(t).kind, TyKind::Bool) {
      writeln!(self.w, "  cmp rax, 0")?;
      writeln!(self.w, "  setne al")?;
      writeln!(self.w, "  movzb rax, al")?;
    }
    match self.prog.tys.size(t) {
      1 => writeln!(self.w, "  movsx rax, al")?,
      2 => writeln!(self.w, "  movsx rax, ax")?,
      4 => writeln!(self.w, "  movsxd rax, eax")?,
      _ => {}
    }
    writeln!(self.w, "  push rax")?;
    Ok(())
  }

  /// Adjust the top of the stack by one element: the pointed-to size for
  /// pointers, 1 for integers. `op` is `add` or `sub`.
  fn adjust(&mut self, t: TyId, op: &str) -> Result<()> {
    let step = self.prog.tys.base(t).map_or(1, |b| self.prog.tys.size(b));
    writeln!(self.w, "  pop rax")?;
    writeln!(self.w, "  {op} rax, {step}")?;
    writeln!(self.w, "  push rax")?;
    Ok(())
  }

  /// Pop `rdi` and `rax`, apply `op`, push the result. `lhs_ty` supplies
  /// the element size for scaled pointer arithmetic.
  fn gen_binary(&mut self, op: Binop, lhs_ty: TyId) -> Result<()> {
    writeln!(self.w, "  pop rdi")?;
    writeln!(self.w, "  pop rax")?;
    match op {
      Binop::Add => writeln!(self.w, "  add rax, rdi")?,
      Binop::PtrAdd => {
        writeln!(self.w, "  imul rdi, {}", self.base_size(lhs_ty))?;
        writeln!(self.w, "  add rax, rdi")?;
      }
      Binop::Sub => writeln!(self.w, "  sub rax, rdi")?,
      Binop::PtrSub => {
        writeln!(self.w, "  imul rdi, {}", self.base_size(lhs_ty))?;
        writeln!(self.w, "  sub rax, rdi")?;
      }
      Binop::PtrDiff => {
        writeln!(self.w, "  sub rax, rdi")?;
        writeln!(self.w, "  cqo")?;
        writeln!(self.w, "  mov rdi, {}", self.base_size(lhs_ty))?;
        writeln!(self.w, "  idiv rdi")?;
      }
      Binop::Mul => writeln!(self.w, "  imul rax, rdi")?,
      Binop::Div => {
        writeln!(self.w, "  cqo")?;
        writeln!(self.w, "  idiv rdi")?;
      }
      Binop::Mod => {
        writeln!(self.w, "  cqo")?;
        writeln!(self.w, "  idiv rdi")?;
        writeln!(self.w, "  mov rax, rdx")?;
      }
      Binop::BitAnd => writeln!(self.w, "  and rax, rdi")?,
      Binop::BitOr => writeln!(self.w, "  or rax, rdi")?,
      Binop::BitXor => writeln!(self.w, "  xor rax, rdi")?,
      Binop::Shl => {
        writeln!(self.w, "  mov cl, dil")?;
        writeln!(self.w, "  shl rax, cl")?;
      }
      Binop::Shr => {
        writeln!(self.w, "  mov cl, dil")?;
        writeln!(self.w, "  sar rax, cl")?;
      }
      Binop::Eq | Binop::Ne | Binop::Lt | Binop::Le => {
        writeln!(self.w, "  cmp rax, rdi")?;
        let set = match op {
          Binop::Eq => "sete",
          Binop::Ne => "setne",
          Binop::Lt => "setl",
          _ => "setle",
        };
        writeln!(self.w, "  {set} al")?;
        writeln!(self.w, "  movzb rax, al")?;
      }
    }
    writeln!(self.w, "  push rax")?;
    Ok(())
  }

  fn r#gen(&mut self, node: &Node) -> Result<()> {
    match &node.kind {
      NodeKind::Null => Ok(()),

      NodeKind::Num(v) => {
        if i32::try_from(*v).is_ok() {
          writeln!(self.w, "  push {v}")?;
        } else {
          writeln!(self.w, "  movabs rax, {v}")?;
          writeln!(self.w, "  push rax")?;
        }
        Ok(())
      }

      NodeKind::ExprStmt(e) => {
        self.r#gen(e)?;
        writeln!(self.w, "  add rsp, 8")?;
        Ok(())
      }

      NodeKind::Var(_) | NodeKind::Member { .. } => {
        self.gen_addr(node)?;
        let t = self.node_ty(node);
        if !self.is_array(t) {
          self.load(t)?;
        }
        Ok(())
      }

      NodeKind::Assign { lhs, rhs } => {
        self.gen_lval(lhs)?;
        self.r#gen(rhs)?;
        self.store(self.node_ty(node))
      }

      NodeKind::AssignOp { op, lhs, rhs } => {
        self.gen_lval(lhs)?;
        writeln!(self.w, "  push [rsp]")?;
        self.load(self.node_ty(lhs))?;
        self.r#gen(rhs)?;
        self.gen_binary(*op, self.node_ty(lhs))?;
        self.store(self.node_ty(node))
      }

      NodeKind::PreInc(e) => {
        self.gen_lval(e)?;
        writeln!(self.w, "  push [rsp]")?;
        self.load(self.node_ty(node))?;
        self.adjust(self.node_ty(node), "add")?;
        self.store(self.node_ty(node))
      }

      NodeKind::PreDec(e) => {
        self.gen_lval(e)?;
        writeln!(self.w, "  push [rsp]")?;
        self.load(self.node_ty(node))?;
        self.adjust(self.node_ty(node), "sub")?;
        self.store(self.node_ty(node))
      }

      // Post-increment stores the adjusted value, then undoes the
      // adjustment on the copy left on the stack.
      NodeKind::PostInc(e) => {
        self.gen_lval(e)?;
        writeln!(self.w, "  push [rsp]")?;
        self.load(self.node_ty(node))?;
        self.adjust(self.node_ty(node), "add")?;
        self.store(self.node_ty(node))?;
        self.adjust(self.node_ty(node), "sub")
      }

      NodeKind::PostDec(e) => {
        self.gen_lval(e)?;
        writeln!(self.w, "  push [rsp]")?;
        self.load(self.node_ty(node))?;
        self.adjust(self.node_ty(node), "sub")?;
        self.store(self.node_ty(node))?;
        self.adjust(self.node_ty(node), "add")
      }

      NodeKind::Addr(e) => self.gen_addr(e),

      NodeKind::Deref(e) => {
        self.r#gen(e)?;
        let t = self.node_ty(node);
        if !self.is_array(t) {
          self.load(t)?;
        }
        Ok(())
      }

      NodeKind::Not(e) => {
        self.r#gen(e)?;
        writeln!(self.w, "  pop rax")?;
        writeln!(self.w, "  cmp rax, 0")?;
        writeln!(self.w, "  sete al")?;
        writeln!(self.w, "  movzb rax, al")?;
        writeln!(self.w, "  push rax")?;
        Ok(())
      }

      NodeKind::BitNot(e) => {
        self.r#gen(e)?;
        writeln!(self.w, "  pop rax")?;
        writeln!(self.w, "  not rax")?;
        writeln!(self.w, "  push rax")?;
        Ok(())
      }

      NodeKind::Cast(e) => {
        self.r#gen(e)?;
        self.truncate(self.node_ty(node))
      }

      NodeKind::LogAnd { lhs, rhs } => {
        let seq = self.next_seq();
        self.r#gen(lhs)?;
        writeln!(self.w, "  pop rax")?;
        writeln!(self.w, "  cmp rax, 0")?;
        writeln!(self.w, "  je .L.false.{seq}")?;
        self.r#gen(rhs)?;
        writeln!(self.w, "  pop rax")?;
        writeln!(self.w, "  cmp rax, 0")?;
        writeln!(self.w, "  je .L.false.{seq}")?;
        writeln!(self.w, "  push 1")?;
        writeln!(self.w, "  jmp .L.end.{seq}")?;
        writeln!(self.w, ".L.false.{seq}:")?;
        writeln!(self.w, "  push 0")?;
        writeln!(self.w, ".L.end.{seq}:")?;
        Ok(())
      }

      NodeKind::LogOr { lhs, rhs } => {
        let seq = self.next_seq();
        self.r#gen(lhs)?;
        writeln!(self.w, "  pop rax")?;
        writeln!(self.w, "  cmp rax, 0")?;
        writeln!(self.w, "  jne .L.true.{seq}")?;
        self.r#gen(rhs)?;
        writeln!(self.w, "  pop rax")?;
        writeln!(self.w, "  cmp rax, 0")?;
        writeln!(self.w, "  jne .L.true.{seq}")?;
        writeln!(self.w, "  push 0")?;
        writeln!(self.w, "  jmp .L.end.{seq}")?;
        writeln!(self.w, ".L.true.{seq}:")?;
        writeln!(self.w, "  push 1")?;
        writeln!(self.w, ".L.end.{seq}:")?;
        Ok(())
      }

      NodeKind::Ternary { cond, then, els } => {
        let seq = self.next_seq();
        self.r#gen(cond)?;
        writeln!(self.w, "  pop rax")?;
        writeln!(self.w, "  cmp rax, 0")?;
        writeln!(self.w, "  je .L.else.{seq}")?;
        self.r#gen(then)?;
        writeln!(self.w, "  jmp .L.end.{seq}")?;
        writeln!(self.w, ".L.else.{seq}:")?;
        self.r#gen(els)?;
        writeln!(self.w, ".L.end.{seq}:")?;
        Ok(())
      }

      NodeKind::Comma { lhs, rhs } => {
        self.r#gen(lhs)?;
        writeln!(self.w, "  add rsp, 8")?;
        self.r#gen(rhs)
      }

      NodeKind::Binary { op, lhs, rhs } => {
        self.r#gen(lhs)?;
        self.r#gen(rhs)?;
        self.gen_binary(*op, self.node_ty(lhs))
      }

      NodeKind::StmtExpr(body) | NodeKind::Block(body) => {
        for s in body {
          self.r#gen(s)?;
        }
        Ok(())
      }

      NodeKind::Funcall { name, args } => {
        if args.len() > ARG_REG8.len() {
          return self.err(node, "register out of range");
        }
        for a in args {
          self.r#gen(a)?;
        }
        for i in (0..args.len()).rev() {
          writeln!(self.w, "  pop {}", ARG_REG8[i])?;
        }

        // The stack may be misaligned by 8 here; pick the call path that
        // reaches the callee with rsp on a 16-byte boundary. rax is
        // zeroed per the variadic ABI.
        let seq = self.next_seq();
        writeln!(self.w, "  mov rax, rsp")?;
        writeln!(self.w, "  and rax, 15")?;
        writeln!(self.w, "  jnz .L.call.{seq}")?;
        writeln!(self.w, "  mov rax, 0")?;
        writeln!(self.w, "  call {name}")?;
        writeln!(self.w, "  jmp .L.end.{seq}")?;
        writeln!(self.w, ".L.call.{seq}:")?;
        writeln!(self.w, "  sub rsp, 8")?;
        writeln!(self.w, "  mov rax, 0")?;
        writeln!(self.w, "  call {name}")?;
        writeln!(self.w, "  add rsp, 8")?;
        writeln!(self.w, ".L.end.{seq}:")?;
        writeln!(self.w, "  push rax")?;
        Ok(())
      }

      NodeKind::Return(e) => {
        if let Some(e) = e {
          self.r#gen(e)?;
          writeln!(self.w, "  pop rax")?;
        }
        writeln!(self.w, "  jmp .L.return.{}", self.funcname)?;
        Ok(())
      }

      NodeKind::If { cond, then, els } => {
        let seq = self.next_seq();
        self.r#gen(cond)?;
        writeln!(self.w, "  pop rax")?;
        writeln!(self.w, "  cmp rax, 0")?;
        match els {
          Some(els) => {
            writeln!(self.w, "  je .L.else.{seq}")?;
            self.r#gen(then)?;
            writeln!(self.w, "  jmp .L.end.{seq}")?;
            writeln!(self.w, ".L.else.{seq}:")?;
            self.r#gen(els)?;
          }
          None => {
            writeln!(self.w, "  je .L.end.{seq}")?;
            self.r#gen(then)?;
          }
        }
        writeln!(self.w, ".L.end.{seq}:")?;
        Ok(())
      }

      NodeKind::While { cond, body } => {
        let seq = self.next_seq();
        let brk = self.brk.replace(seq);
        let cont = self.cont.replace(seq);
        writeln!(self.w, ".L.continue.{seq}:")?;
        self.r#gen(cond)?;
        writeln!(self.w, "  pop rax")?;
        writeln!(self.w, "  cmp rax, 0")?;
        writeln!(self.w, "  je .L.break.{seq}")?;
        self.r#gen(body)?;
        writeln!(self.w, "  jmp .L.continue.{seq}")?;
        writeln!(self.w, ".L.break.{seq}:")?;
        self.brk = brk;
        self.cont = cont;
        Ok(())
      }

      NodeKind::Do { body, cond } => {
        let seq = self.next_seq();
        let brk = self.brk.replace(seq);
        let cont = self.cont.replace(seq);
        writeln!(self.w, ".L.begin.{seq}:")?;
        self.r#gen(body)?;
        writeln!(self.w, ".L.continue.{seq}:")?;
        self.r#gen(cond)?;
        writeln!(self.w, "  pop rax")?;
        writeln!(self.w, "  cmp rax, 0")?;
        writeln!(self.w, "  jne .L.begin.{seq}")?;
        writeln!(self.w, ".L.break.{seq}:")?;
        self.brk = brk;
        self.cont = cont;
        Ok(())
      }

      NodeKind::For { init, cond, inc, body } => {
        let seq = self.next_seq();
        let brk = self.brk.replace(seq);
        let cont = self.cont.replace(seq);
        if let Some(init) = init {
          self.r#gen(init)?;
        }
        writeln!(self.w, ".L.begin.{seq}:")?;
        if let Some(cond) = cond {
          self.r#gen(cond)?;
          writeln!(self.w, "  pop rax")?;
          writeln!(self.w, "  cmp rax, 0")?;
          writeln!(self.w, "  je .L.break.{seq}")?;
        }
        self.r#gen(body)?;
        writeln!(self.w, ".L.continue.{seq}:")?;
        if let Some(inc) = inc {
          self.r#gen(inc)?;
        }
        writeln!(self.w, "  jmp .L.begin.{seq}")?;
        writeln!(self.w, ".L.break.{seq}:")?;
        self.brk = brk;
        self.cont = cont;
        Ok(())
      }

      NodeKind::Switch { cond, body, cases, has_default } => {
        let seq = self.next_seq();
        let brk = self.brk.replace(seq);
        let labels: Vec<u32> = cases.iter().map(|_| self.next_seq()).collect();
        let default_label = if *has_default { Some(self.next_seq()) } else { None };

        self.r#gen(cond)?;
        writeln!(self.w, "  pop rax")?;
        for (val, label) in cases.iter().zip(&labels) {
          writeln!(self.w, "  cmp rax, {val}")?;
          writeln!(self.w, "  je .L.case.{label}")?;
        }
        match default_label {
          Some(d) => writeln!(self.w, "  jmp .L.case.{d}")?,
          None => writeln!(self.w, "  jmp .L.break.{seq}")?,
        }

        self.switch_cases.push((labels, default_label));
        self.r#gen(body)?;
        self.switch_cases.pop();

        writeln!(self.w, ".L.break.{seq}:")?;
        self.brk = brk;
        Ok(())
      }

      NodeKind::Case { index, body } => {
        let label = self.switch_cases.last().expect("case outside switch").0[*index];
        writeln!(self.w, ".L.case.{label}:")?;
        self.r#gen(body)
      }

      NodeKind::Default(body) => {
        let label = self.switch_cases.last().and_then(|c| c.1)
          .expect("default outside switch");
        writeln!(self.w, ".L.case.{label}:")?;
        self.r#gen(body)
      }

      NodeKind::Break => match self.brk {
        Some(seq) => {
          writeln!(self.w, "  jmp .L.break.{seq}")?;
          Ok(())
        }
        None => self.err(node, "stray break"),
      },

      NodeKind::Continue => match self.cont {
        Some(seq) => {
          writeln!(self.w, "  jmp .L.continue.{seq}")?;
          Ok(())
        }
        None => self.err(node, "stray continue"),
      },

      NodeKind::Goto(name) => {
        writeln!(self.w, "  jmp .L.label.{}.{name}", self.funcname)?;
        Ok(())
      }

      NodeKind::Label { name, body } => {
        writeln!(self.w, ".L.label.{}.{name}:", self.funcname)?;
        self.r#gen(body)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::compile;

  fn emit(src: &str) -> String {
    let mut out = vec![];
    compile("test.c", src, &mut out).unwrap();
    String::from_utf8(out).unwrap()
  }

  fn emit_err(src: &str) -> String {
    let mut out = vec![];
    compile("test.c", src, &mut out).unwrap_err().msg
  }

  #[test]
  fn output_shape() {
    let asm = emit("int main() { return 0; }");
    let lines: Vec<_> = asm.lines().collect();
    assert_eq!(lines[0], ".intel_syntax noprefix");
    assert!(lines.contains(&".data"));
    assert!(lines.contains(&".text"));
    assert!(lines.contains(&".global main"));
    assert!(lines.contains(&"main:"));
    // Prologue immediately after the function label.
    let at = lines.iter().position(|&l| l == "main:").unwrap();
    assert_eq!(&lines[at + 1..at + 4], &["  push rbp", "  mov rbp, rsp", "  sub rsp, 0"]);
    // Epilogue via the return label.
    assert!(lines.contains(&".L.return.main:"));
    assert!(asm.ends_with("  mov rsp, rbp\n  pop rbp\n  ret\n"));
  }

  #[test]
  fn static_functions_are_not_exported() {
    let asm = emit("static int helper() { return 1; } int main() { return helper(); }");
    assert!(!asm.contains(".global helper"));
    assert!(asm.contains(".global main"));
    assert!(asm.contains("helper:"));
  }

  #[test]
  fn rax_is_zeroed_before_every_call() {
    let asm = emit("int f(int a) { return a; } int main() { return f(3); }");
    let lines: Vec<_> = asm.lines().collect();
    let mut calls = 0;
    for (i, l) in lines.iter().enumerate() {
      if l.trim_start().starts_with("call ") {
        calls += 1;
        assert_eq!(lines[i - 1], "  mov rax, 0", "rax not zeroed before {l}");
      }
    }
    assert_eq!(calls, 2);
  }

  #[test]
  fn call_site_alignment_paths() {
    let asm = emit("int f() { return 1; } int main() { return f(); }");
    assert!(asm.contains("  and rax, 15"));
    assert!(asm.contains("  sub rsp, 8"));
    assert!(asm.contains("  add rsp, 8"));
    assert!(asm.contains(".L.call.1:"));
  }

  #[test]
  fn arguments_go_to_the_abi_registers() {
    let asm = emit(
      "int f(int a, int b, int c, int d, int e, int g) { return a; }\n\
       int main() { return f(1, 2, 3, 4, 5, 6); }",
    );
    for reg in ["rdi", "rsi", "rdx", "rcx", "r8", "r9"] {
      assert!(asm.contains(&format!("  pop {reg}")), "missing pop {reg}");
    }
  }

  #[test]
  fn too_many_arguments() {
    assert_eq!(
      emit_err("int f() { return 0; } int main() { return f(1, 2, 3, 4, 5, 6, 7); }"),
      "register out of range"
    );
  }

  #[test]
  fn param_spills_use_sized_registers() {
    let asm = emit("int f(char c, short s, int i, long l) { return i; } int main() { return 0; }");
    assert!(asm.contains("  mov [rbp-1], dil"));
    assert!(asm.contains("  mov [rbp-4], si"));
    assert!(asm.contains("  mov [rbp-8], edx"));
    assert!(asm.contains("  mov [rbp-16], rcx"));
  }

  #[test]
  fn globals_and_strings_in_data() {
    let asm = emit("int g; char *s; int main() { s = \"ab\"; return g; }");
    assert!(asm.contains("g:\n  .zero 4"));
    assert!(asm.contains(".L.data.0:\n  .byte 97, 98, 0"));
  }

  #[test]
  fn switch_dispatch_and_case_labels() {
    let asm = emit(
      "int main() { int x; x = 3; switch (x) { case 1: return 1; case 3: return 30; default: return 99; } }",
    );
    // switch takes seq 1, the cases 2 and 3, default 4
    assert!(asm.contains("  cmp rax, 1\n  je .L.case.2"));
    assert!(asm.contains("  cmp rax, 3\n  je .L.case.3"));
    assert!(asm.contains("  jmp .L.case.4"));
    for label in [".L.case.2:", ".L.case.3:", ".L.case.4:", ".L.break.1:"] {
      assert!(asm.contains(label), "missing {label}");
    }
  }

  #[test]
  fn switch_without_default_jumps_to_break() {
    let asm = emit("int main() { switch (0) { case 1: return 1; } return 2; }");
    assert!(asm.contains("  jmp .L.break.1"));
  }

  #[test]
  fn loops_restore_break_targets() {
    let asm = emit(
      "int main() { int i; for (i = 0; i < 9; i++) { while (i) break; break; } return i; }",
    );
    // The inner while takes seq 2; the trailing break must jump back out
    // to the for loop's label, seq 1.
    assert!(asm.contains("  jmp .L.break.2"));
    assert!(asm.contains("  jmp .L.break.1"));
  }

  #[test]
  fn stray_break_and_continue() {
    assert_eq!(emit_err("int main() { break; }"), "stray break");
    assert_eq!(emit_err("int main() { continue; }"), "stray continue");
  }

  #[test]
  fn assigning_to_an_rvalue_fails() {
    assert_eq!(emit_err("int main() { 1 = 2; return 0; }"), "not an lvalue");
    assert_eq!(
      emit_err("int main() { int a[2]; int b[2]; a = b; return 0; }"),
      "not an lvalue"
    );
  }

  #[test]
  fn pointer_diff_divides_by_element_size() {
    let asm = emit("int main() { int a[4]; return &a[3] - a; }");
    assert!(asm.contains("  sub rax, rdi\n  cqo\n  mov rdi, 4\n  idiv rdi"));
  }

  #[test]
  fn pointer_add_scales() {
    let asm = emit("int main() { long a[4]; long *p; p = a; return *(p + 2); }");
    assert!(asm.contains("  imul rdi, 8"));
  }

  #[test]
  fn goto_uses_function_scoped_labels() {
    let asm = emit("int main() { goto done; done: return 7; }");
    assert!(asm.contains("  jmp .L.label.main.done"));
    assert!(asm.contains(".L.label.main.done:"));
  }

  #[test]
  fn bool_stores_are_normalized() {
    let asm = emit("int main() { _Bool b; b = 5; return b; }");
    assert!(asm.contains("  cmp rdi, 0\n  setne dil\n  movzb rdi, dil"));
  }

  #[test]
  fn big_literals_use_movabs() {
    let asm = emit("int main() { long x; x = 68719476736; return 0; }");
    assert!(asm.contains("  movabs rax, 68719476736"));
  }

  #[test]
  fn label_definitions_are_unique() {
    let asm = emit(
      "int main() { int i; i = 0; if (i) i = 1; if (i) i = 2; while (i) i--; return i && 1; }",
    );
    let mut defined = std::collections::BTreeSet::new();
    for line in asm.lines() {
      if line.starts_with(".L") && line.ends_with(':') {
        assert!(defined.insert(line.to_string()), "duplicate label {line}");
      }
    }
  }
}
