//! A small compiler for a subset of C, producing x86-64 assembly in
//! Intel syntax.
//!
//! Compilation is three passes over progressively richer data, with no
//! back-edges:
//!
//! 1. [`lexer::tokenize`]: source text to a token vector;
//! 2. [`parser::parse`]: tokens to a typed [`Program`](types::ast::Program)
//!    (AST, type arena, variable arena), with scoping and semantic checks
//!    folded into the parse;
//! 3. [`codegen::codegen`]: the typed AST to assembly text, in a fixed
//!    stack-machine discipline honoring the System V AMD64 calling
//!    convention.
//!
//! The supported language covers integer and pointer arithmetic, arrays,
//! structs, enums, typedefs, functions with up to six register arguments,
//! globals and block-scoped locals, string literals, statement
//! expressions, and the full statement and operator repertoire of the
//! subset (including `switch`, `goto`, compound assignment and casts).
//! There is no preprocessor, no floating point, no `union`, and a single
//! translation unit per invocation.
//!
//! The first diagnostic aborts compilation: every pass returns
//! `Result<_, CompileError>` and the driver renders the error with a
//! source line and caret.

#![warn(missing_docs)]
#![warn(unused, rust_2018_idioms)]

pub mod codegen;
pub mod diag;
pub mod lexer;
pub mod parser;
pub mod types;

use std::io::Write;

pub use diag::{CompileError, Result};

/// Compile a whole source file to assembly on `out`.
///
/// `filename` is used only in diagnostics. `src` should be NUL-free and
/// newline-terminated; the driver takes care of that.
pub fn compile(filename: &str, src: &str, out: &mut impl Write) -> Result<()> {
  let toks = lexer::tokenize(src)?;
  let mut prog = parser::parse(filename, src, &toks)?;
  prog.assign_offsets();
  codegen::codegen(&prog, &toks, out)
}
