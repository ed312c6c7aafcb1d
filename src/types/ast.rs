//! The typed AST produced by the parser and consumed by the code
//! generator, together with variables, functions and the whole-program
//! container.

use smallvec::SmallVec;

use crate::mk_id;
use crate::types::IdxVec;
use crate::types::ty::{TyArena, TyId, align_to};

mk_id! {
  /// A handle to a variable in [`Program::vars`].
  VarId,
}

/// A global or local variable (or function parameter).
#[derive(Debug)]
pub struct Var {
  /// The variable name. Compiler-generated globals (string literals) use
  /// `.L.data.<N>` names.
  pub name: String,
  /// The variable's type.
  pub ty: TyId,
  /// Local (stack) storage rather than file-scope data.
  pub is_local: bool,
  /// A `static` global, not exported from the assembly file.
  pub is_static: bool,
  /// For locals: byte offset below the frame pointer, assigned after
  /// parsing by [`Program::assign_offsets`].
  pub offset: usize,
  /// For globals: initial byte contents (string literals). `None` means
  /// zero-initialized.
  pub contents: Option<Vec<u8>>,
}

/// Binary operators that evaluate both operands and combine the results.
///
/// Pointer arithmetic is resolved at parse time: `ptr + int` becomes
/// [`Binop::PtrAdd`] with the pointer normalized to the left operand, and
/// `ptr - ptr` becomes [`Binop::PtrDiff`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binop {
  /// Integer `+`
  Add,
  /// Integer `-`
  Sub,
  /// pointer + integer
  PtrAdd,
  /// pointer - integer
  PtrSub,
  /// pointer - pointer, yielding an `int` element count
  PtrDiff,
  /// `*`
  Mul,
  /// `/`
  Div,
  /// `%`
  Mod,
  /// `==`
  Eq,
  /// `!=`
  Ne,
  /// `<` (also used for `>` with swapped operands)
  Lt,
  /// `<=` (also used for `>=` with swapped operands)
  Le,
  /// `&`
  BitAnd,
  /// `|`
  BitOr,
  /// `^`
  BitXor,
  /// `<<`
  Shl,
  /// `>>`
  Shr,
}

/// An AST node. `ty` is attached by the typing pass; `tok` is the index of
/// a representative token for diagnostics.
#[derive(Debug)]
pub struct Node {
  /// The node kind with its operands.
  pub kind: NodeKind,
  /// The attached type, filled in post-order by the typing pass.
  pub ty: Option<TyId>,
  /// Representative token index.
  pub tok: usize,
}

/// The kinds of AST nodes. Expression kinds leave one value on the stack
/// when emitted; statement kinds are stack-neutral.
#[derive(Debug)]
pub enum NodeKind {
  /// Integer literal.
  Num(i64),
  /// Variable reference.
  Var(VarId),
  /// `lhs op rhs`
  Binary {
    /// The operator.
    op: Binop,
    /// Left operand.
    lhs: Box<Node>,
    /// Right operand.
    rhs: Box<Node>,
  },
  /// `lhs = rhs`
  Assign {
    /// The lvalue.
    lhs: Box<Node>,
    /// The assigned value.
    rhs: Box<Node>,
  },
  /// Compound assignment `lhs op= rhs`.
  AssignOp {
    /// The underlying operator.
    op: Binop,
    /// The lvalue.
    lhs: Box<Node>,
    /// The right operand.
    rhs: Box<Node>,
  },
  /// `lhs, rhs`
  Comma {
    /// Discarded operand.
    lhs: Box<Node>,
    /// Result operand.
    rhs: Box<Node>,
  },
  /// Short-circuit `&&`.
  LogAnd {
    /// Left operand.
    lhs: Box<Node>,
    /// Right operand.
    rhs: Box<Node>,
  },
  /// Short-circuit `||`.
  LogOr {
    /// Left operand.
    lhs: Box<Node>,
    /// Right operand.
    rhs: Box<Node>,
  },
  /// `cond ? then : els`
  Ternary {
    /// The condition.
    cond: Box<Node>,
    /// Value if nonzero.
    then: Box<Node>,
    /// Value if zero.
    els: Box<Node>,
  },
  /// `&operand`
  Addr(Box<Node>),
  /// `*operand`
  Deref(Box<Node>),
  /// `!operand`
  Not(Box<Node>),
  /// `~operand`
  BitNot(Box<Node>),
  /// `(type)operand`; the target type is in [`Node::ty`].
  Cast(Box<Node>),
  /// `++operand`
  PreInc(Box<Node>),
  /// `--operand`
  PreDec(Box<Node>),
  /// `operand++`
  PostInc(Box<Node>),
  /// `operand--`
  PostDec(Box<Node>),
  /// Struct member access, resolved at parse time.
  Member {
    /// The struct-valued operand.
    base: Box<Node>,
    /// Byte offset of the member within the struct.
    offset: usize,
    /// The member's type.
    mty: TyId,
  },
  /// Function call.
  Funcall {
    /// Callee name.
    name: String,
    /// Arguments, left to right.
    args: SmallVec<[Box<Node>; 4]>,
  },
  /// GNU statement expression `({ stmt+ })`; the value is the last
  /// statement's expression.
  StmtExpr(Vec<Node>),
  /// An expression evaluated for effect; the result is discarded.
  ExprStmt(Box<Node>),
  /// `return expr?;`
  Return(Option<Box<Node>>),
  /// `if (cond) then else els`
  If {
    /// The condition.
    cond: Box<Node>,
    /// Taken branch.
    then: Box<Node>,
    /// Optional else branch.
    els: Option<Box<Node>>,
  },
  /// `while (cond) body`
  While {
    /// The condition.
    cond: Box<Node>,
    /// Loop body.
    body: Box<Node>,
  },
  /// `do body while (cond);`
  Do {
    /// Loop body.
    body: Box<Node>,
    /// The condition, tested after each iteration.
    cond: Box<Node>,
  },
  /// `for (init; cond; inc) body`
  For {
    /// Optional initializer statement.
    init: Option<Box<Node>>,
    /// Optional condition.
    cond: Option<Box<Node>>,
    /// Optional increment expression.
    inc: Option<Box<Node>>,
    /// Loop body.
    body: Box<Node>,
  },
  /// `switch (cond) body` with the collected dispatch table.
  Switch {
    /// The scrutinee.
    cond: Box<Node>,
    /// The body, containing [`NodeKind::Case`] markers.
    body: Box<Node>,
    /// Case values in source order; a contained `Case { index }` refers
    /// into this table.
    cases: Vec<i64>,
    /// Whether a `default:` label is present.
    has_default: bool,
  },
  /// `case value:` marker inside a switch body.
  Case {
    /// Index into the owning switch's case table.
    index: usize,
    /// The labeled statement.
    body: Box<Node>,
  },
  /// `default:` marker inside a switch body.
  Default(Box<Node>),
  /// `break;`
  Break,
  /// `continue;`
  Continue,
  /// `goto label;`
  Goto(String),
  /// `label: stmt`
  Label {
    /// The label name, scoped to the enclosing function.
    name: String,
    /// The labeled statement.
    body: Box<Node>,
  },
  /// `{ stmt* }`
  Block(Vec<Node>),
  /// An empty statement (a declaration with no initializer compiles to
  /// this).
  Null,
}

impl Node {
  /// A fresh untyped node.
  #[must_use] pub fn new(kind: NodeKind, tok: usize) -> Self {
    Node { kind, ty: None, tok }
  }

  /// An integer literal node.
  #[must_use] pub fn num(val: i64, tok: usize) -> Self {
    Node::new(NodeKind::Num(val), tok)
  }

  /// A binary operator node.
  #[must_use] pub fn binary(op: Binop, lhs: Node, rhs: Node, tok: usize) -> Self {
    Node::new(NodeKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, tok)
  }
}

/// A function definition.
#[derive(Debug)]
pub struct Function {
  /// The function name.
  pub name: String,
  /// Parameters in declaration order (also present in `locals`).
  pub params: Vec<VarId>,
  /// All locals, parameters included, in declaration order.
  pub locals: Vec<VarId>,
  /// The body statements.
  pub body: Vec<Node>,
  /// `static` functions get no `.global` directive.
  pub is_static: bool,
  /// Frame size in bytes, a multiple of 8, assigned post-parse.
  pub stack_size: usize,
}

/// A parsed and typed program: the ordered globals and functions plus the
/// variable and type arenas they reference.
#[derive(Debug)]
pub struct Program {
  /// File-scope variables in definition order, string literals included.
  pub globals: Vec<VarId>,
  /// Function definitions in source order.
  pub funcs: Vec<Function>,
  /// The variable arena.
  pub vars: IdxVec<VarId, Var>,
  /// The type arena.
  pub tys: TyArena,
}

impl Program {
  /// Assign every local a frame-pointer-relative offset and every function
  /// its frame size: walk locals in declaration order, round the running
  /// offset up to the local's alignment, advance by its size, and round
  /// the total up to a multiple of 8.
  pub fn assign_offsets(&mut self) {
    for f in &mut self.funcs {
      let mut offset = 0;
      for &v in &f.locals {
        let ty = self.vars[v].ty;
        offset = align_to(offset, self.tys.align(ty));
        offset += self.tys.size(ty);
        self.vars[v].offset = offset;
      }
      f.stack_size = align_to(offset, 8);
    }
  }
}
