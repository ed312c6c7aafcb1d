//! The recursive-descent parser and semantic analyzer: token vector to a
//! typed [`Program`].
//!
//! The parser owns the token cursor, the two scope stacks (ordinary names
//! and struct/enum tags), the growing type and variable arenas, and the
//! current-switch stack. Everywhere the grammar needs more than one token
//! of lookahead (function vs global variable at the top level, `sizeof`
//! and casts against parenthesized expressions, labels against expression
//! statements) the cursor is snapshotted and restored; with a vector of
//! tokens that is a plain index copy.

use bitflags::bitflags;
use if_chain::if_chain;
use smallvec::SmallVec;

use crate::diag::{self, CompileError, Result};
use crate::lexer::{Token, TokenKind};
use crate::types::IdxVec;
use crate::types::ast::{Binop, Function, Node, NodeKind, Program, Var, VarId};
use crate::types::ty::{self, Member, TyArena, TyId, TyKind};

bitflags! {
  /// Storage-class specifiers collected while reading a declaration's
  /// base type.
  #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
  pub struct StorageClass: u8 {
    /// `typedef`
    const TYPEDEF = 1 << 0;
    /// `static`
    const STATIC = 1 << 1;
  }
}

/// What an ordinary-scope name is bound to.
#[derive(Clone, Debug)]
enum ScopeEntry {
  /// A variable or function.
  Var(VarId),
  /// A `typedef` name.
  Typedef(TyId),
  /// An enum constant with its enum type and value.
  EnumConst(TyId, i64),
}

struct VarScope<'a> {
  name: &'a str,
  entry: ScopeEntry,
}

struct TagScope<'a> {
  name: &'a str,
  depth: usize,
  ty: TyId,
}

#[derive(Default)]
struct SwitchCtx {
  cases: Vec<i64>,
  has_default: bool,
}

/// Parse `toks` (produced by [`crate::lexer::tokenize`] from `src`) into a
/// typed program. `filename` is used only for warning diagnostics.
pub fn parse(filename: &str, src: &str, toks: &[Token]) -> Result<Program> {
  let mut p = Parser {
    filename,
    src,
    toks,
    pos: 0,
    tys: TyArena::new(),
    vars: IdxVec::new(),
    globals: vec![],
    funcs: vec![],
    var_scope: vec![],
    tag_scope: vec![],
    scope_depth: 0,
    locals: vec![],
    switches: vec![],
    data_label: 0,
  };
  p.program()?;
  Ok(Program { globals: p.globals, funcs: p.funcs, vars: p.vars, tys: p.tys })
}

struct Parser<'a> {
  filename: &'a str,
  src: &'a str,
  toks: &'a [Token],
  pos: usize,
  tys: TyArena,
  vars: IdxVec<VarId, Var>,
  globals: Vec<VarId>,
  funcs: Vec<Function>,
  var_scope: Vec<VarScope<'a>>,
  tag_scope: Vec<TagScope<'a>>,
  scope_depth: usize,
  /// Locals of the function currently being parsed, parameters included.
  locals: Vec<VarId>,
  switches: Vec<SwitchCtx>,
  data_label: usize,
}

const BUILTIN_TYPES: &[&str] = &["void", "_Bool", "char", "short", "int", "long"];

impl<'a> Parser<'a> {
  // Token-cursor helpers.

  fn tok(&self) -> &'a Token { &self.toks[self.pos] }

  fn text_at(&self, i: usize) -> &'a str { self.toks[i].text(self.src) }

  fn err<T>(&self, i: usize, msg: impl Into<String>) -> Result<T> {
    Err(CompileError::at(self.toks[i].loc, msg))
  }

  fn at_eof(&self) -> bool { self.tok().kind == TokenKind::Eof }

  fn peek(&self, s: &str) -> bool { self.tok().is(self.src, s) }

  /// If the current token is the punctuator or reserved word `s`, advance
  /// past it and return its index.
  fn consume(&mut self, s: &str) -> Option<usize> {
    if self.peek(s) {
      self.pos += 1;
      Some(self.pos - 1)
    } else {
      None
    }
  }

  fn expect(&mut self, s: &str) -> Result<usize> {
    match self.consume(s) {
      Some(i) => Ok(i),
      None => self.err(self.pos, format!("expected '{s}'")),
    }
  }

  fn consume_ident(&mut self) -> Option<usize> {
    if self.tok().kind == TokenKind::Ident {
      self.pos += 1;
      Some(self.pos - 1)
    } else {
      None
    }
  }

  fn expect_ident(&mut self) -> Result<usize> {
    match self.consume_ident() {
      Some(i) => Ok(i),
      None => self.err(self.pos, "expected an identifier"),
    }
  }

  // Scopes.

  fn enter_scope(&mut self) -> (usize, usize) {
    self.scope_depth += 1;
    (self.var_scope.len(), self.tag_scope.len())
  }

  fn leave_scope(&mut self, (vars, tags): (usize, usize)) {
    self.var_scope.truncate(vars);
    self.tag_scope.truncate(tags);
    self.scope_depth -= 1;
  }

  fn push_var_scope(&mut self, name: &'a str, entry: ScopeEntry) {
    self.var_scope.push(VarScope { name, entry });
  }

  fn push_tag(&mut self, name: &'a str, ty: TyId) {
    self.tag_scope.push(TagScope { name, depth: self.scope_depth, ty });
  }

  fn find_var(&self, name: &str) -> Option<&ScopeEntry> {
    self.var_scope.iter().rev().find(|e| e.name == name).map(|e| &e.entry)
  }

  fn find_tag(&self, name: &str) -> Option<&TagScope<'a>> {
    self.tag_scope.iter().rev().find(|t| t.name == name)
  }

  fn new_lvar(&mut self, name: &'a str, ty: TyId) -> VarId {
    let vid = self.vars.push(Var {
      name: name.to_string(),
      ty,
      is_local: true,
      is_static: false,
      offset: 0,
      contents: None,
    });
    self.locals.push(vid);
    self.push_var_scope(name, ScopeEntry::Var(vid));
    vid
  }

  fn new_gvar(&mut self, name: &'a str, ty: TyId, is_static: bool, emit: bool) -> VarId {
    let vid = self.vars.push(Var {
      name: name.to_string(),
      ty,
      is_local: false,
      is_static,
      offset: 0,
      contents: None,
    });
    if emit {
      self.globals.push(vid);
    }
    self.push_var_scope(name, ScopeEntry::Var(vid));
    vid
  }

  fn new_data_label(&mut self) -> String {
    let n = self.data_label;
    self.data_label += 1;
    format!(".L.data.{n}")
  }

  // Type specifiers.

  fn find_typedef(&self) -> Option<TyId> {
    if self.tok().kind == TokenKind::Ident {
      if let Some(&ScopeEntry::Typedef(ty)) = self.find_var(self.tok().text(self.src)) {
        return Some(ty);
      }
    }
    None
  }

  fn is_typename(&self) -> bool {
    BUILTIN_TYPES.iter().any(|kw| self.peek(kw))
      || self.peek("struct")
      || self.peek("enum")
      || self.peek("typedef")
      || self.peek("static")
      || self.find_typedef().is_some()
  }

  /// basetype = ("typedef" | "static" | builtin-type | struct-decl
  ///            | enum-specifier | typedef-name)+
  ///
  /// Built-in type keywords may appear in any order and are resolved by
  /// summing a one-hot counter and matching the fixed valid totals, so
  /// `long int long` means `long` and `short int` means `short`. A
  /// `struct`, `enum` or typedef name counts as OTHER: it is only legal
  /// as the first type word, and it terminates the read if type words
  /// were already seen.
  fn basetype(&mut self) -> Result<(TyId, StorageClass)> {
    const VOID: u32 = 1;
    const BOOL: u32 = 1 << 2;
    const CHAR: u32 = 1 << 4;
    const SHORT: u32 = 1 << 6;
    const INT: u32 = 1 << 8;
    const LONG: u32 = 1 << 10;
    const OTHER: u32 = 1 << 12;

    if !self.is_typename() {
      return self.err(self.pos, "expected a typename");
    }

    let mut ty = ty::INT;
    let mut counter = 0u32;
    let mut sclass = StorageClass::empty();

    while self.is_typename() {
      let tok_i = self.pos;

      if self.consume("typedef").is_some() || self.consume("static").is_some() {
        sclass |= if self.text_at(tok_i) == "typedef" {
          StorageClass::TYPEDEF
        } else {
          StorageClass::STATIC
        };
        if sclass.is_all() {
          return self.err(tok_i, "typedef and static may not be used together");
        }
        continue;
      }

      if !BUILTIN_TYPES.iter().any(|kw| self.peek(kw)) {
        if counter != 0 {
          break;
        }
        if self.consume("struct").is_some() {
          ty = self.struct_decl()?;
        } else if self.consume("enum").is_some() {
          ty = self.enum_specifier()?;
        } else {
          ty = self.find_typedef().expect("checked by is_typename");
          self.pos += 1;
        }
        counter |= OTHER;
        continue;
      }

      counter += if self.consume("void").is_some() {
        VOID
      } else if self.consume("_Bool").is_some() {
        BOOL
      } else if self.consume("char").is_some() {
        CHAR
      } else if self.consume("short").is_some() {
        SHORT
      } else if self.consume("int").is_some() {
        INT
      } else {
        self.pos += 1; // "long"
        LONG
      };

      ty = match counter {
        VOID => ty::VOID,
        BOOL => ty::BOOL,
        CHAR => ty::CHAR,
        c if c == SHORT || c == SHORT + INT => ty::SHORT,
        INT => ty::INT,
        c if c == LONG || c == LONG + INT || c == 2 * LONG || c == 2 * LONG + INT => ty::LONG,
        _ => return self.err(tok_i, "invalid type"),
      };
    }

    Ok((ty, sclass))
  }

  /// Like [`Parser::basetype`], for positions where storage-class
  /// specifiers are not allowed (members, parameters, type names).
  fn basetype_no_storage(&mut self) -> Result<TyId> {
    let start = self.pos;
    let (ty, sclass) = self.basetype()?;
    if !sclass.is_empty() {
      return self.err(start, "storage class specifier is not allowed");
    }
    Ok(ty)
  }

  /// declarator = "*"* ("(" declarator ")" | ident) type-suffix
  ///
  /// Returns the declared type and the name's token index. A
  /// parenthesized inner declarator is parsed against a placeholder arena
  /// slot which is patched once the surrounding suffix is known.
  fn declarator(&mut self, mut ty: TyId) -> Result<(TyId, usize)> {
    while self.consume("*").is_some() {
      ty = self.tys.pointer_to(ty);
    }
    if self.consume("(").is_some() {
      let placeholder = self.tys.placeholder();
      let (new_ty, name) = self.declarator(placeholder)?;
      self.expect(")")?;
      let suffixed = self.type_suffix(ty)?;
      self.tys.overwrite(placeholder, suffixed);
      return Ok((new_ty, name));
    }
    let name = self.expect_ident()?;
    let ty = self.type_suffix(ty)?;
    Ok((ty, name))
  }

  /// abstract-declarator = "*"* ("(" abstract-declarator ")")? type-suffix
  fn abstract_declarator(&mut self, mut ty: TyId) -> Result<TyId> {
    while self.consume("*").is_some() {
      ty = self.tys.pointer_to(ty);
    }
    if self.consume("(").is_some() {
      let placeholder = self.tys.placeholder();
      let new_ty = self.abstract_declarator(placeholder)?;
      self.expect(")")?;
      let suffixed = self.type_suffix(ty)?;
      self.tys.overwrite(placeholder, suffixed);
      return Ok(new_ty);
    }
    self.type_suffix(ty)
  }

  /// type-suffix = ("[" const-expr? "]" type-suffix)?
  fn type_suffix(&mut self, ty: TyId) -> Result<TyId> {
    if self.consume("[").is_none() {
      return Ok(ty);
    }
    let mut len = 0;
    let mut incomplete = true;
    if self.consume("]").is_none() {
      len = self.const_expr()?;
      incomplete = false;
      self.expect("]")?;
    }
    let tok_i = self.pos;
    let ty = self.type_suffix(ty)?;
    if self.tys.is_incomplete(ty) {
      return self.err(tok_i, "incomplete element type");
    }
    if incomplete {
      return Ok(self.tys.incomplete_array_of(ty));
    }
    let len = usize::try_from(len).map_err(|_| CompileError::at(self.toks[tok_i].loc, "invalid array size"))?;
    Ok(self.tys.array_of(ty, len))
  }

  /// type-name = basetype abstract-declarator
  fn type_name(&mut self) -> Result<TyId> {
    let ty = self.basetype_no_storage()?;
    self.abstract_declarator(ty)
  }

  /// struct-decl = "struct" ident? ("{" struct-member* "}")?
  ///
  /// A tag without a body names an existing struct, or forward-declares
  /// an incomplete one. A tag with a body completes the same-depth
  /// declaration if there is one; otherwise (including a shadowing
  /// declaration in a strictly inner scope) it creates a fresh type.
  fn struct_decl(&mut self) -> Result<TyId> {
    let tag = self.consume_ident();

    if let Some(ti) = tag {
      if !self.peek("{") {
        let name = self.text_at(ti);
        return match self.find_tag(name) {
          None => {
            let ty = self.tys.struct_type();
            self.push_tag(name, ty);
            Ok(ty)
          }
          Some(sc) => {
            let ty = sc.ty;
            if !matches!(self.tys.get(ty).kind, TyKind::Struct { .. }) {
              return self.err(ti, "not a struct tag");
            }
            Ok(ty)
          }
        };
      }
    }

    self.expect("{")?;

    // A body completes a same-depth declaration in place; anything else
    // (no tag, unknown tag, or a tag only known from an outer scope) gets
    // a fresh type. The tag is registered before the body so members can
    // point back at the struct through pointers.
    let mut existing = None;
    if_chain! {
      if let Some(ti) = tag;
      if let Some(sc) = self.find_tag(self.text_at(ti));
      if sc.depth == self.scope_depth;
      then {
        if !matches!(self.tys.get(sc.ty).kind, TyKind::Struct { .. }) {
          return self.err(ti, "not a struct tag");
        }
        existing = Some(sc.ty);
      }
    }
    let ty = match existing {
      Some(ty) => ty,
      None => {
        let ty = self.tys.struct_type();
        if let Some(ti) = tag {
          self.push_tag(self.text_at(ti), ty);
        }
        ty
      }
    };

    let mut members = SmallVec::new();
    while self.consume("}").is_none() {
      members.push(self.struct_member()?);
    }
    self.tys.complete_struct(ty, members);
    Ok(ty)
  }

  /// struct-member = basetype declarator ";"
  fn struct_member(&mut self) -> Result<Member> {
    let ty = self.basetype_no_storage()?;
    let tok_i = self.pos;
    let (ty, name_i) = self.declarator(ty)?;
    self.expect(";")?;
    if matches!(self.tys.get(ty).kind, TyKind::Void) {
      return self.err(tok_i, "variable declared void");
    }
    if self.tys.is_incomplete(ty) {
      return self.err(tok_i, "incomplete struct member");
    }
    Ok(Member { name: self.text_at(name_i).to_string(), ty, offset: 0, tok: tok_i })
  }

  /// enum-specifier = "enum" ident
  ///                | "enum" ident? "{" enum-list? "}"
  ///
  /// enum-list = ident ("=" const-expr)? ("," ident ("=" const-expr)?)* ","?
  fn enum_specifier(&mut self) -> Result<TyId> {
    let tag = self.consume_ident();

    if let Some(ti) = tag {
      if !self.peek("{") {
        let name = self.text_at(ti);
        let Some(sc) = self.find_tag(name) else {
          return self.err(ti, "unknown enum type");
        };
        let ty = sc.ty;
        if !matches!(self.tys.get(ty).kind, TyKind::Enum) {
          return self.err(ti, "not an enum tag");
        }
        return Ok(ty);
      }
    }

    self.expect("{")?;

    // A same-depth tag means this body was already registered, which
    // happens when the tentative top-level parse ran over it; reuse the
    // type and its constants instead of minting duplicates.
    let mut existing = None;
    if_chain! {
      if let Some(ti) = tag;
      if let Some(sc) = self.find_tag(self.text_at(ti));
      if sc.depth == self.scope_depth;
      then {
        if !matches!(self.tys.get(sc.ty).kind, TyKind::Enum) {
          return self.err(ti, "not an enum tag");
        }
        existing = Some(sc.ty);
      }
    }
    let reused = existing.is_some();
    let ty = match existing {
      Some(ty) => ty,
      None => self.tys.enum_type(),
    };

    let mut val = 0i64;
    loop {
      let name_i = self.expect_ident()?;
      if self.consume("=").is_some() {
        val = self.const_expr()?;
      }
      if !reused {
        self.push_var_scope(self.text_at(name_i), ScopeEntry::EnumConst(ty, val));
      }
      val += 1;
      if self.consume(",").is_some() {
        if self.consume("}").is_some() {
          break;
        }
        continue;
      }
      self.expect("}")?;
      break;
    }
    if !reused {
      if let Some(ti) = tag {
        self.push_tag(self.text_at(ti), ty);
      }
    }
    Ok(ty)
  }

  // Top level.

  /// program = (global-var | function)*
  fn program(&mut self) -> Result<()> {
    while !self.at_eof() {
      if self.is_function()? {
        if let Some(f) = self.function()? {
          self.funcs.push(f);
        }
      } else {
        self.global_var()?;
      }
    }
    Ok(())
  }

  /// Decide function vs global variable by a tentative parse of
  /// basetype + declarator, then restore the cursor.
  fn is_function(&mut self) -> Result<bool> {
    let save = self.pos;
    let (ty, _) = self.basetype()?;
    let mut isfunc = false;
    if self.consume(";").is_none() {
      self.declarator(ty)?;
      isfunc = self.consume("(").is_some();
    }
    self.pos = save;
    Ok(isfunc)
  }

  /// function = basetype declarator "(" params? ")" ("{" stmt* "}" | ";")
  ///
  /// Returns `None` for a declaration without a body.
  fn function(&mut self) -> Result<Option<Function>> {
    self.locals.clear();
    let (ty, sclass) = self.basetype()?;
    let (ty, name_i) = self.declarator(ty)?;
    let name = self.text_at(name_i);
    let is_static = sclass.contains(StorageClass::STATIC);

    // Bind the name before the body is parsed so recursive calls resolve.
    let fty = self.tys.func_type(ty);
    self.new_gvar(name, fty, is_static, false);

    self.expect("(")?;
    let snapshot = self.enter_scope();
    let params = self.read_func_params()?;

    if self.consume(";").is_some() {
      self.leave_scope(snapshot);
      return Ok(None);
    }

    self.expect("{")?;
    let mut body = vec![];
    while self.consume("}").is_none() {
      body.push(self.stmt()?);
    }
    self.leave_scope(snapshot);

    Ok(Some(Function {
      name: name.to_string(),
      params,
      locals: std::mem::take(&mut self.locals),
      body,
      is_static,
      stack_size: 0,
    }))
  }

  /// params = param ("," param)* | "void"
  fn read_func_params(&mut self) -> Result<Vec<VarId>> {
    if self.consume(")").is_some() {
      return Ok(vec![]);
    }
    let save = self.pos;
    if self.consume("void").is_some() && self.consume(")").is_some() {
      return Ok(vec![]);
    }
    self.pos = save;

    let mut params = vec![self.read_func_param()?];
    while self.consume(")").is_none() {
      self.expect(",")?;
      params.push(self.read_func_param()?);
    }
    Ok(params)
  }

  /// param = basetype declarator
  ///
  /// An array-typed parameter decays to a pointer to its element type.
  fn read_func_param(&mut self) -> Result<VarId> {
    let ty = self.basetype_no_storage()?;
    let tok_i = self.pos;
    let (ty, name_i) = self.declarator(ty)?;
    let ty = if matches!(self.tys.get(ty).kind, TyKind::Array { .. }) {
      let base = self.tys.base(ty).expect("array base");
      self.tys.pointer_to(base)
    } else {
      ty
    };
    if self.tys.is_incomplete(ty) {
      return self.err(tok_i, "incomplete type");
    }
    Ok(self.new_lvar(self.text_at(name_i), ty))
  }

  /// global-var = basetype (declarator)? ";"
  fn global_var(&mut self) -> Result<()> {
    let (ty, sclass) = self.basetype()?;
    if self.consume(";").is_some() {
      return Ok(());
    }
    let tok_i = self.pos;
    let (ty, name_i) = self.declarator(ty)?;
    self.expect(";")?;
    let name = self.text_at(name_i);

    if sclass.contains(StorageClass::TYPEDEF) {
      self.push_var_scope(name, ScopeEntry::Typedef(ty));
      return Ok(());
    }
    if matches!(self.tys.get(ty).kind, TyKind::Void) {
      return self.err(tok_i, "variable declared void");
    }
    if self.tys.is_incomplete(ty) {
      return self.err(tok_i, "incomplete type");
    }
    self.new_gvar(name, ty, sclass.contains(StorageClass::STATIC), true);
    Ok(())
  }

  // Statements.

  /// declaration = basetype (declarator ("=" expr)?)? ";"
  fn declaration(&mut self) -> Result<Node> {
    let start = self.pos;
    let (ty, sclass) = self.basetype()?;
    if self.consume(";").is_some() {
      return Ok(Node::new(NodeKind::Null, start));
    }

    let tok_i = self.pos;
    let (ty, name_i) = self.declarator(ty)?;
    let name = self.text_at(name_i);

    if sclass.contains(StorageClass::TYPEDEF) {
      self.expect(";")?;
      self.push_var_scope(name, ScopeEntry::Typedef(ty));
      return Ok(Node::new(NodeKind::Null, tok_i));
    }
    if matches!(self.tys.get(ty).kind, TyKind::Void) {
      return self.err(tok_i, "variable declared void");
    }
    if self.tys.is_incomplete(ty) {
      return self.err(tok_i, "incomplete type");
    }

    let vid = self.new_lvar(name, ty);
    if self.consume(";").is_some() {
      return Ok(Node::new(NodeKind::Null, tok_i));
    }

    let eq = self.expect("=")?;
    let lhs = Node::new(NodeKind::Var(vid), name_i);
    let rhs = self.expr()?;
    self.expect(";")?;
    let assign = Node::new(
      NodeKind::Assign { lhs: Box::new(lhs), rhs: Box::new(rhs) },
      eq,
    );
    Ok(Node::new(NodeKind::ExprStmt(Box::new(assign)), tok_i))
  }

  fn read_expr_stmt(&mut self) -> Result<Node> {
    let i = self.pos;
    let e = self.expr()?;
    Ok(Node::new(NodeKind::ExprStmt(Box::new(e)), i))
  }

  fn stmt(&mut self) -> Result<Node> {
    let mut node = self.stmt_inner()?;
    self.add_type(&mut node)?;
    Ok(node)
  }

  /// stmt = "return" expr? ";"
  ///      | "if" "(" expr ")" stmt ("else" stmt)?
  ///      | "switch" "(" expr ")" stmt
  ///      | "case" const-expr ":" stmt
  ///      | "default" ":" stmt
  ///      | "while" "(" expr ")" stmt
  ///      | "do" stmt "while" "(" expr ")" ";"
  ///      | "for" "(" (declaration | expr? ";") expr? ";" expr? ")" stmt
  ///      | "{" stmt* "}"
  ///      | "break" ";" | "continue" ";"
  ///      | "goto" ident ";" | ident ":" stmt
  ///      | declaration
  ///      | expr ";"
  fn stmt_inner(&mut self) -> Result<Node> {
    if let Some(i) = self.consume("return") {
      if self.consume(";").is_some() {
        return Ok(Node::new(NodeKind::Return(None), i));
      }
      let e = self.expr()?;
      self.expect(";")?;
      return Ok(Node::new(NodeKind::Return(Some(Box::new(e))), i));
    }

    if let Some(i) = self.consume("if") {
      self.expect("(")?;
      let cond = self.expr()?;
      self.expect(")")?;
      let then = self.stmt()?;
      let els = if self.consume("else").is_some() {
        Some(Box::new(self.stmt()?))
      } else {
        None
      };
      return Ok(Node::new(
        NodeKind::If { cond: Box::new(cond), then: Box::new(then), els },
        i,
      ));
    }

    if let Some(i) = self.consume("switch") {
      self.expect("(")?;
      let cond = self.expr()?;
      self.expect(")")?;
      self.switches.push(SwitchCtx::default());
      let body = self.stmt()?;
      let ctx = self.switches.pop().expect("switch stack");
      return Ok(Node::new(
        NodeKind::Switch {
          cond: Box::new(cond),
          body: Box::new(body),
          cases: ctx.cases,
          has_default: ctx.has_default,
        },
        i,
      ));
    }

    if let Some(i) = self.consume("case") {
      if self.switches.is_empty() {
        return self.err(i, "stray case");
      }
      let val = self.const_expr()?;
      self.expect(":")?;
      let ctx = self.switches.last_mut().expect("switch stack");
      ctx.cases.push(val);
      let index = ctx.cases.len() - 1;
      let body = self.stmt()?;
      return Ok(Node::new(NodeKind::Case { index, body: Box::new(body) }, i));
    }

    if let Some(i) = self.consume("default") {
      match self.switches.last_mut() {
        None => return self.err(i, "stray default"),
        Some(ctx) => ctx.has_default = true,
      }
      self.expect(":")?;
      let body = self.stmt()?;
      return Ok(Node::new(NodeKind::Default(Box::new(body)), i));
    }

    if let Some(i) = self.consume("while") {
      self.expect("(")?;
      let cond = self.expr()?;
      self.expect(")")?;
      let body = self.stmt()?;
      return Ok(Node::new(
        NodeKind::While { cond: Box::new(cond), body: Box::new(body) },
        i,
      ));
    }

    if let Some(i) = self.consume("do") {
      let body = self.stmt()?;
      self.expect("while")?;
      self.expect("(")?;
      let cond = self.expr()?;
      self.expect(")")?;
      self.expect(";")?;
      return Ok(Node::new(
        NodeKind::Do { body: Box::new(body), cond: Box::new(cond) },
        i,
      ));
    }

    if let Some(i) = self.consume("for") {
      self.expect("(")?;
      let snapshot = self.enter_scope();
      let mut init = None;
      let mut cond = None;
      let mut inc = None;
      if self.consume(";").is_none() {
        if self.is_typename() {
          init = Some(Box::new(self.declaration()?));
        } else {
          init = Some(Box::new(self.read_expr_stmt()?));
          self.expect(";")?;
        }
      }
      if self.consume(";").is_none() {
        cond = Some(Box::new(self.expr()?));
        self.expect(";")?;
      }
      if self.consume(")").is_none() {
        inc = Some(Box::new(self.read_expr_stmt()?));
        self.expect(")")?;
      }
      let body = self.stmt()?;
      self.leave_scope(snapshot);
      return Ok(Node::new(
        NodeKind::For { init, cond, inc, body: Box::new(body) },
        i,
      ));
    }

    if let Some(i) = self.consume("{") {
      let snapshot = self.enter_scope();
      let mut stmts = vec![];
      while self.consume("}").is_none() {
        stmts.push(self.stmt()?);
      }
      self.leave_scope(snapshot);
      return Ok(Node::new(NodeKind::Block(stmts), i));
    }

    if let Some(i) = self.consume("break") {
      self.expect(";")?;
      return Ok(Node::new(NodeKind::Break, i));
    }

    if let Some(i) = self.consume("continue") {
      self.expect(";")?;
      return Ok(Node::new(NodeKind::Continue, i));
    }

    if let Some(i) = self.consume("goto") {
      let name_i = self.expect_ident()?;
      self.expect(";")?;
      return Ok(Node::new(NodeKind::Goto(self.text_at(name_i).to_string()), i));
    }

    if_chain! {
      if self.tok().kind == TokenKind::Ident;
      if self.toks.get(self.pos + 1).is_some_and(|t| t.is(self.src, ":"));
      then {
        let i = self.pos;
        let name = self.text_at(i).to_string();
        self.pos += 2;
        let body = self.stmt()?;
        return Ok(Node::new(NodeKind::Label { name, body: Box::new(body) }, i));
      }
    }

    if self.is_typename() {
      return self.declaration();
    }

    let i = self.pos;
    let e = self.expr()?;
    self.expect(";")?;
    Ok(Node::new(NodeKind::ExprStmt(Box::new(e)), i))
  }

  // Expressions.

  /// expr = assign ("," assign)*
  fn expr(&mut self) -> Result<Node> {
    let mut node = self.assign()?;
    while let Some(i) = self.consume(",") {
      let rhs = self.assign()?;
      node = Node::new(
        NodeKind::Comma { lhs: Box::new(node), rhs: Box::new(rhs) },
        i,
      );
    }
    Ok(node)
  }

  /// assign = conditional (assign-op assign)?
  fn assign(&mut self) -> Result<Node> {
    let mut node = self.conditional()?;

    if let Some(i) = self.consume("=") {
      let rhs = self.assign()?;
      return Ok(Node::new(
        NodeKind::Assign { lhs: Box::new(node), rhs: Box::new(rhs) },
        i,
      ));
    }

    const OPS: &[(&str, Binop)] = &[
      ("+=", Binop::Add),
      ("-=", Binop::Sub),
      ("*=", Binop::Mul),
      ("/=", Binop::Div),
      ("%=", Binop::Mod),
      ("<<=", Binop::Shl),
      (">>=", Binop::Shr),
      ("&=", Binop::BitAnd),
      ("|=", Binop::BitOr),
      ("^=", Binop::BitXor),
    ];
    for &(s, op) in OPS {
      if let Some(i) = self.consume(s) {
        self.add_type(&mut node)?;
        let has_base = node.ty.is_some_and(|t| self.tys.has_base(t));
        let op = match op {
          Binop::Add if has_base => Binop::PtrAdd,
          Binop::Sub if has_base => Binop::PtrSub,
          op => op,
        };
        let rhs = self.assign()?;
        return Ok(Node::new(
          NodeKind::AssignOp { op, lhs: Box::new(node), rhs: Box::new(rhs) },
          i,
        ));
      }
    }

    Ok(node)
  }

  /// conditional = logor ("?" expr ":" conditional)?
  fn conditional(&mut self) -> Result<Node> {
    let node = self.logor()?;
    let Some(i) = self.consume("?") else { return Ok(node) };
    let then = self.expr()?;
    self.expect(":")?;
    let els = self.conditional()?;
    Ok(Node::new(
      NodeKind::Ternary {
        cond: Box::new(node),
        then: Box::new(then),
        els: Box::new(els),
      },
      i,
    ))
  }

  /// logor = logand ("||" logand)*
  fn logor(&mut self) -> Result<Node> {
    let mut node = self.logand()?;
    while let Some(i) = self.consume("||") {
      let rhs = self.logand()?;
      node = Node::new(
        NodeKind::LogOr { lhs: Box::new(node), rhs: Box::new(rhs) },
        i,
      );
    }
    Ok(node)
  }

  /// logand = bitor ("&&" bitor)*
  fn logand(&mut self) -> Result<Node> {
    let mut node = self.bitor()?;
    while let Some(i) = self.consume("&&") {
      let rhs = self.bitor()?;
      node = Node::new(
        NodeKind::LogAnd { lhs: Box::new(node), rhs: Box::new(rhs) },
        i,
      );
    }
    Ok(node)
  }

  /// bitor = bitxor ("|" bitxor)*
  fn bitor(&mut self) -> Result<Node> {
    let mut node = self.bitxor()?;
    while let Some(i) = self.consume("|") {
      let rhs = self.bitxor()?;
      node = Node::binary(Binop::BitOr, node, rhs, i);
    }
    Ok(node)
  }

  /// bitxor = bitand ("^" bitand)*
  fn bitxor(&mut self) -> Result<Node> {
    let mut node = self.bitand()?;
    while let Some(i) = self.consume("^") {
      let rhs = self.bitand()?;
      node = Node::binary(Binop::BitXor, node, rhs, i);
    }
    Ok(node)
  }

  /// bitand = equality ("&" equality)*
  fn bitand(&mut self) -> Result<Node> {
    let mut node = self.equality()?;
    while let Some(i) = self.consume("&") {
      let rhs = self.equality()?;
      node = Node::binary(Binop::BitAnd, node, rhs, i);
    }
    Ok(node)
  }

  /// equality = relational (("==" | "!=") relational)*
  fn equality(&mut self) -> Result<Node> {
    let mut node = self.relational()?;
    loop {
      if let Some(i) = self.consume("==") {
        let rhs = self.relational()?;
        node = Node::binary(Binop::Eq, node, rhs, i);
      } else if let Some(i) = self.consume("!=") {
        let rhs = self.relational()?;
        node = Node::binary(Binop::Ne, node, rhs, i);
      } else {
        return Ok(node);
      }
    }
  }

  /// relational = shift (("<" | "<=" | ">" | ">=") shift)*
  fn relational(&mut self) -> Result<Node> {
    let mut node = self.shift()?;
    loop {
      if let Some(i) = self.consume("<") {
        let rhs = self.shift()?;
        node = Node::binary(Binop::Lt, node, rhs, i);
      } else if let Some(i) = self.consume("<=") {
        let rhs = self.shift()?;
        node = Node::binary(Binop::Le, node, rhs, i);
      } else if let Some(i) = self.consume(">") {
        let rhs = self.shift()?;
        node = Node::binary(Binop::Lt, rhs, node, i);
      } else if let Some(i) = self.consume(">=") {
        let rhs = self.shift()?;
        node = Node::binary(Binop::Le, rhs, node, i);
      } else {
        return Ok(node);
      }
    }
  }

  /// shift = add (("<<" | ">>") add)*
  fn shift(&mut self) -> Result<Node> {
    let mut node = self.add()?;
    loop {
      if let Some(i) = self.consume("<<") {
        let rhs = self.add()?;
        node = Node::binary(Binop::Shl, node, rhs, i);
      } else if let Some(i) = self.consume(">>") {
        let rhs = self.add()?;
        node = Node::binary(Binop::Shr, node, rhs, i);
      } else {
        return Ok(node);
      }
    }
  }

  /// Build `lhs + rhs`, classifying integer vs pointer addition. The
  /// pointer operand, if any, is normalized to the left.
  fn new_add(&mut self, mut lhs: Node, mut rhs: Node, i: usize) -> Result<Node> {
    self.add_type(&mut lhs)?;
    self.add_type(&mut rhs)?;
    let lt = lhs.ty.expect("typed");
    let rt = rhs.ty.expect("typed");
    if self.tys.is_integer(lt) && self.tys.is_integer(rt) {
      Ok(Node::binary(Binop::Add, lhs, rhs, i))
    } else if self.tys.has_base(lt) && self.tys.is_integer(rt) {
      Ok(Node::binary(Binop::PtrAdd, lhs, rhs, i))
    } else if self.tys.is_integer(lt) && self.tys.has_base(rt) {
      Ok(Node::binary(Binop::PtrAdd, rhs, lhs, i))
    } else {
      self.err(i, "invalid operands")
    }
  }

  /// Build `lhs - rhs`: integer subtraction, pointer displacement, or
  /// pointer difference.
  fn new_sub(&mut self, mut lhs: Node, mut rhs: Node, i: usize) -> Result<Node> {
    self.add_type(&mut lhs)?;
    self.add_type(&mut rhs)?;
    let lt = lhs.ty.expect("typed");
    let rt = rhs.ty.expect("typed");
    if self.tys.is_integer(lt) && self.tys.is_integer(rt) {
      Ok(Node::binary(Binop::Sub, lhs, rhs, i))
    } else if self.tys.has_base(lt) && self.tys.is_integer(rt) {
      Ok(Node::binary(Binop::PtrSub, lhs, rhs, i))
    } else if self.tys.has_base(lt) && self.tys.has_base(rt) {
      Ok(Node::binary(Binop::PtrDiff, lhs, rhs, i))
    } else {
      self.err(i, "invalid operands")
    }
  }

  /// add = mul (("+" | "-") mul)*
  fn add(&mut self) -> Result<Node> {
    let mut node = self.mul()?;
    loop {
      if let Some(i) = self.consume("+") {
        let rhs = self.mul()?;
        node = self.new_add(node, rhs, i)?;
      } else if let Some(i) = self.consume("-") {
        let rhs = self.mul()?;
        node = self.new_sub(node, rhs, i)?;
      } else {
        return Ok(node);
      }
    }
  }

  /// mul = cast (("*" | "/" | "%") cast)*
  fn mul(&mut self) -> Result<Node> {
    let mut node = self.cast()?;
    loop {
      if let Some(i) = self.consume("*") {
        let rhs = self.cast()?;
        node = Node::binary(Binop::Mul, node, rhs, i);
      } else if let Some(i) = self.consume("/") {
        let rhs = self.cast()?;
        node = Node::binary(Binop::Div, node, rhs, i);
      } else if let Some(i) = self.consume("%") {
        let rhs = self.cast()?;
        node = Node::binary(Binop::Mod, node, rhs, i);
      } else {
        return Ok(node);
      }
    }
  }

  /// cast = "(" type-name ")" cast | unary
  fn cast(&mut self) -> Result<Node> {
    let save = self.pos;
    if let Some(i) = self.consume("(") {
      if self.is_typename() {
        let ty = self.type_name()?;
        self.expect(")")?;
        let mut operand = self.cast()?;
        self.add_type(&mut operand)?;
        let mut node = Node::new(NodeKind::Cast(Box::new(operand)), i);
        node.ty = Some(ty);
        return Ok(node);
      }
      self.pos = save;
    }
    self.unary()
  }

  /// unary = ("+" | "-" | "*" | "&" | "!" | "~") cast
  ///       | ("++" | "--") unary
  ///       | postfix
  fn unary(&mut self) -> Result<Node> {
    if self.consume("+").is_some() {
      return self.cast();
    }
    if let Some(i) = self.consume("-") {
      let rhs = self.cast()?;
      return Ok(Node::binary(Binop::Sub, Node::num(0, i), rhs, i));
    }
    if let Some(i) = self.consume("&") {
      let e = self.cast()?;
      return Ok(Node::new(NodeKind::Addr(Box::new(e)), i));
    }
    if let Some(i) = self.consume("*") {
      let e = self.cast()?;
      return Ok(Node::new(NodeKind::Deref(Box::new(e)), i));
    }
    if let Some(i) = self.consume("!") {
      let e = self.cast()?;
      return Ok(Node::new(NodeKind::Not(Box::new(e)), i));
    }
    if let Some(i) = self.consume("~") {
      let e = self.cast()?;
      return Ok(Node::new(NodeKind::BitNot(Box::new(e)), i));
    }
    if let Some(i) = self.consume("++") {
      let e = self.unary()?;
      return Ok(Node::new(NodeKind::PreInc(Box::new(e)), i));
    }
    if let Some(i) = self.consume("--") {
      let e = self.unary()?;
      return Ok(Node::new(NodeKind::PreDec(Box::new(e)), i));
    }
    self.postfix()
  }

  /// postfix = primary ("[" expr "]" | "." ident | "->" ident | "++" | "--")*
  fn postfix(&mut self) -> Result<Node> {
    let mut node = self.primary()?;
    loop {
      if let Some(i) = self.consume("[") {
        // x[y] is sugar for *(x+y)
        let idx = self.expr()?;
        self.expect("]")?;
        let sum = self.new_add(node, idx, i)?;
        node = Node::new(NodeKind::Deref(Box::new(sum)), i);
      } else if self.consume(".").is_some() {
        node = self.struct_ref(node)?;
      } else if let Some(i) = self.consume("->") {
        node = Node::new(NodeKind::Deref(Box::new(node)), i);
        node = self.struct_ref(node)?;
      } else if let Some(i) = self.consume("++") {
        node = Node::new(NodeKind::PostInc(Box::new(node)), i);
      } else if let Some(i) = self.consume("--") {
        node = Node::new(NodeKind::PostDec(Box::new(node)), i);
      } else {
        return Ok(node);
      }
    }
  }

  fn struct_ref(&mut self, mut base: Node) -> Result<Node> {
    self.add_type(&mut base)?;
    let bt = base.ty.expect("typed");
    if !matches!(self.tys.get(bt).kind, TyKind::Struct { .. }) {
      return self.err(base.tok, "not a struct");
    }
    let name_i = self.expect_ident()?;
    let Some(m) = self.tys.find_member(bt, self.text_at(name_i)) else {
      return self.err(name_i, "no such member");
    };
    let (offset, mty) = (m.offset, m.ty);
    Ok(Node::new(NodeKind::Member { base: Box::new(base), offset, mty }, name_i))
  }

  /// stmt-expr = "(" "{" stmt+ "}" ")"
  ///
  /// The last statement must be an expression statement; its value is the
  /// value of the whole expression.
  fn stmt_expr(&mut self, i: usize) -> Result<Node> {
    let snapshot = self.enter_scope();
    let mut stmts = vec![self.stmt()?];
    while self.consume("}").is_none() {
      stmts.push(self.stmt()?);
    }
    self.expect(")")?;
    self.leave_scope(snapshot);

    let last = stmts.pop().expect("nonempty");
    match last.kind {
      NodeKind::ExprStmt(inner) => stmts.push(*inner),
      _ => return self.err(last.tok, "statement expression returning void is not supported"),
    }
    Ok(Node::new(NodeKind::StmtExpr(stmts), i))
  }

  /// func-args = "(" (assign ("," assign)*)? ")"
  fn func_args(&mut self) -> Result<SmallVec<[Box<Node>; 4]>> {
    let mut args = SmallVec::new();
    if self.consume(")").is_some() {
      return Ok(args);
    }
    args.push(Box::new(self.assign()?));
    while self.consume(",").is_some() {
      args.push(Box::new(self.assign()?));
    }
    self.expect(")")?;
    Ok(args)
  }

  /// primary = "(" "{" stmt+ "}" ")"
  ///         | "(" expr ")"
  ///         | "sizeof" ("(" type-name ")" | unary)
  ///         | ident func-args?
  ///         | str
  ///         | num
  fn primary(&mut self) -> Result<Node> {
    if let Some(i) = self.consume("(") {
      if self.consume("{").is_some() {
        return self.stmt_expr(i);
      }
      let node = self.expr()?;
      self.expect(")")?;
      return Ok(node);
    }

    if let Some(i) = self.consume("sizeof") {
      let save = self.pos;
      if self.consume("(").is_some() {
        if self.is_typename() {
          let ty = self.type_name()?;
          if self.tys.is_incomplete(ty) {
            return self.err(i, "incomplete type");
          }
          self.expect(")")?;
          return Ok(Node::num(self.tys.size(ty) as i64, i));
        }
        self.pos = save;
      }
      let mut node = self.unary()?;
      self.add_type(&mut node)?;
      let t = node.ty.expect("typed");
      if self.tys.is_incomplete(t) {
        return self.err(node.tok, "incomplete type");
      }
      return Ok(Node::num(self.tys.size(t) as i64, i));
    }

    if let Some(i) = self.consume_ident() {
      if self.consume("(").is_some() {
        // Function call. The callee must be a declared function; calls to
        // unknown names are accepted with a warning and assumed to
        // return int.
        let name = self.text_at(i).to_string();
        let mut args = self.func_args()?;
        for a in &mut args {
          self.add_type(a.as_mut())?;
        }
        let mut node = Node::new(NodeKind::Funcall { name, args }, i);
        match self.find_var(self.text_at(i)) {
          Some(&ScopeEntry::Var(vid)) => {
            let vty = self.vars[vid].ty;
            let TyKind::Func { return_ty } = self.tys.get(vty).kind else {
              return self.err(i, "not a function");
            };
            node.ty = Some(return_ty);
          }
          Some(_) => return self.err(i, "not a function"),
          None => {
            diag::warn_at(self.filename, self.src, self.toks[i].loc,
              "implicit declaration of a function");
            node.ty = Some(ty::INT);
          }
        }
        return Ok(node);
      }

      return match self.find_var(self.text_at(i)) {
        Some(&ScopeEntry::Var(vid)) => Ok(Node::new(NodeKind::Var(vid), i)),
        Some(&ScopeEntry::EnumConst(_, val)) => Ok(Node::num(val, i)),
        _ => self.err(i, "undefined variable"),
      };
    }

    match self.tok().kind.clone() {
      TokenKind::Str(contents) => {
        let i = self.pos;
        self.pos += 1;
        let ty = self.tys.array_of(ty::CHAR, contents.len());
        let name = self.new_data_label();
        let vid = self.vars.push(Var {
          name,
          ty,
          is_local: false,
          is_static: false,
          offset: 0,
          contents: Some(contents),
        });
        self.globals.push(vid);
        Ok(Node::new(NodeKind::Var(vid), i))
      }
      TokenKind::Num(val) => {
        let i = self.pos;
        self.pos += 1;
        Ok(Node::num(val, i))
      }
      _ => self.err(self.pos, "expected expression"),
    }
  }

  // Constant expressions.

  /// const-expr = conditional, restricted to compile-time-evaluable nodes.
  fn const_expr(&mut self) -> Result<i64> {
    let node = self.conditional()?;
    self.eval(&node)
  }

  fn eval(&self, node: &Node) -> Result<i64> {
    Ok(match &node.kind {
      NodeKind::Num(v) => *v,
      NodeKind::Binary { op, lhs, rhs } => {
        let l = self.eval(lhs)?;
        let r = self.eval(rhs)?;
        match op {
          Binop::Add => l.wrapping_add(r),
          Binop::Sub => l.wrapping_sub(r),
          Binop::Mul => l.wrapping_mul(r),
          Binop::Div | Binop::Mod if r == 0 => {
            return self.err(node.tok, "division by zero")
          }
          Binop::Div => l.wrapping_div(r),
          Binop::Mod => l.wrapping_rem(r),
          Binop::BitAnd => l & r,
          Binop::BitOr => l | r,
          Binop::BitXor => l ^ r,
          Binop::Shl => l.wrapping_shl(r as u32),
          Binop::Shr => l.wrapping_shr(r as u32),
          Binop::Eq => i64::from(l == r),
          Binop::Ne => i64::from(l != r),
          Binop::Lt => i64::from(l < r),
          Binop::Le => i64::from(l <= r),
          Binop::PtrAdd | Binop::PtrSub | Binop::PtrDiff => {
            return self.err(node.tok, "not a constant expression")
          }
        }
      }
      NodeKind::Ternary { cond, then, els } => {
        if self.eval(cond)? != 0 { self.eval(then)? } else { self.eval(els)? }
      }
      NodeKind::Comma { rhs, .. } => self.eval(rhs)?,
      NodeKind::Not(e) => i64::from(self.eval(e)? == 0),
      NodeKind::BitNot(e) => !self.eval(e)?,
      NodeKind::LogAnd { lhs, rhs } => {
        i64::from(self.eval(lhs)? != 0 && self.eval(rhs)? != 0)
      }
      NodeKind::LogOr { lhs, rhs } => {
        i64::from(self.eval(lhs)? != 0 || self.eval(rhs)? != 0)
      }
      _ => return self.err(node.tok, "not a constant expression"),
    })
  }

  // The typing pass.

  /// Attach a type to `node` and everything below it. Nodes that already
  /// carry a type (casts, calls) are left as they are.
  fn add_type(&mut self, node: &mut Node) -> Result<()> {
    if node.ty.is_some() {
      return Ok(());
    }

    match &mut node.kind {
      NodeKind::Binary { lhs, rhs, .. }
      | NodeKind::Assign { lhs, rhs }
      | NodeKind::AssignOp { lhs, rhs, .. }
      | NodeKind::Comma { lhs, rhs }
      | NodeKind::LogAnd { lhs, rhs }
      | NodeKind::LogOr { lhs, rhs } => {
        self.add_type(lhs)?;
        self.add_type(rhs)?;
      }
      NodeKind::Ternary { cond, then, els } => {
        self.add_type(cond)?;
        self.add_type(then)?;
        self.add_type(els)?;
      }
      NodeKind::Addr(e)
      | NodeKind::Deref(e)
      | NodeKind::Not(e)
      | NodeKind::BitNot(e)
      | NodeKind::Cast(e)
      | NodeKind::PreInc(e)
      | NodeKind::PreDec(e)
      | NodeKind::PostInc(e)
      | NodeKind::PostDec(e)
      | NodeKind::ExprStmt(e) => self.add_type(e)?,
      NodeKind::Member { base, .. } => self.add_type(base)?,
      NodeKind::Funcall { args, .. } => {
        for a in args {
          self.add_type(a.as_mut())?;
        }
      }
      NodeKind::StmtExpr(body) | NodeKind::Block(body) => {
        for s in body {
          self.add_type(s)?;
        }
      }
      NodeKind::Return(e) => {
        if let Some(e) = e {
          self.add_type(e)?;
        }
      }
      NodeKind::If { cond, then, els } => {
        self.add_type(cond)?;
        self.add_type(then)?;
        if let Some(els) = els {
          self.add_type(els)?;
        }
      }
      NodeKind::While { cond, body } | NodeKind::Do { body, cond } => {
        self.add_type(cond)?;
        self.add_type(body)?;
      }
      NodeKind::For { init, cond, inc, body } => {
        if let Some(init) = init { self.add_type(init)?; }
        if let Some(cond) = cond { self.add_type(cond)?; }
        if let Some(inc) = inc { self.add_type(inc)?; }
        self.add_type(body)?;
      }
      NodeKind::Switch { cond, body, .. } => {
        self.add_type(cond)?;
        self.add_type(body)?;
      }
      NodeKind::Case { body, .. }
      | NodeKind::Default(body)
      | NodeKind::Label { body, .. } => self.add_type(body)?,
      NodeKind::Num(_) | NodeKind::Var(_) | NodeKind::Break | NodeKind::Continue
      | NodeKind::Goto(_) | NodeKind::Null => {}
    }

    node.ty = match &node.kind {
      NodeKind::Num(_) | NodeKind::Not(_) | NodeKind::LogAnd { .. }
      | NodeKind::LogOr { .. } => Some(ty::INT),
      NodeKind::Funcall { .. } => Some(ty::INT),
      NodeKind::Binary { op, lhs, .. } => Some(match op {
        Binop::Add | Binop::Sub | Binop::Mul | Binop::Div | Binop::Mod
        | Binop::Eq | Binop::Ne | Binop::Lt | Binop::Le | Binop::PtrDiff => ty::INT,
        Binop::PtrAdd | Binop::PtrSub | Binop::Shl | Binop::Shr
        | Binop::BitAnd | Binop::BitOr | Binop::BitXor => lhs.ty.expect("typed"),
      }),
      NodeKind::Assign { lhs, .. } | NodeKind::AssignOp { lhs, .. } => lhs.ty,
      NodeKind::Comma { rhs, .. } => rhs.ty,
      NodeKind::Ternary { then, .. } => then.ty,
      NodeKind::BitNot(e) | NodeKind::PreInc(e) | NodeKind::PreDec(e)
      | NodeKind::PostInc(e) | NodeKind::PostDec(e) => e.ty,
      NodeKind::Var(vid) => Some(self.vars[*vid].ty),
      NodeKind::Member { mty, .. } => Some(*mty),
      NodeKind::Addr(e) => {
        let et = e.ty.expect("typed");
        let target = if matches!(self.tys.get(et).kind, TyKind::Array { .. }) {
          self.tys.base(et).expect("array base")
        } else {
          et
        };
        Some(self.tys.pointer_to(target))
      }
      NodeKind::Deref(e) => {
        let et = e.ty.expect("typed");
        match self.tys.base(et) {
          Some(base) => Some(base),
          None => return self.err(node.tok, "invalid pointer dereference"),
        }
      }
      NodeKind::StmtExpr(body) => body.last().and_then(|n| n.ty),
      NodeKind::Cast(_) => unreachable!("cast types are set at parse time"),
      _ => None,
    };
    Ok(())
  }
}
