//! Source-location diagnostics.
//!
//! Every fatal condition in the compiler is reported as a [`CompileError`]
//! carrying an optional byte offset into the source buffer. The driver
//! renders the error with [`CompileError::render`]: the `file:line:` prefix,
//! the offending source line, and a caret pointing at the column. Offsets
//! and columns are in bytes, since they index the raw input buffer.

use std::fmt::{self, Display};

/// The result type used throughout the compiler.
pub type Result<T> = std::result::Result<T, CompileError>;

/// A fatal diagnostic. The first error aborts compilation; there is no
/// recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
  /// Byte offset of the offending token or character, if the error is
  /// anchored in the source.
  pub loc: Option<usize>,
  /// The message, without location prefix.
  pub msg: String,
}

impl CompileError {
  /// An error with no source location (driver-level failures).
  pub fn msg(msg: impl Into<String>) -> Self {
    CompileError { loc: None, msg: msg.into() }
  }

  /// An error anchored at a byte offset in the source buffer.
  pub fn at(loc: usize, msg: impl Into<String>) -> Self {
    CompileError { loc: Some(loc), msg: msg.into() }
  }

  /// Render the full caret diagnostic against the source buffer.
  #[must_use] pub fn render(&self, filename: &str, src: &str) -> String {
    match self.loc {
      None => format!("minicc: {}", self.msg),
      Some(loc) => {
        let (line_no, line, col) = locate(src, loc);
        let prefix = format!("{filename}:{line_no}: ");
        let mut out = format!("{prefix}{line}\n");
        for _ in 0..prefix.len() + col { out.push(' '); }
        out.push_str("^ ");
        out.push_str(&self.msg);
        out
      }
    }
  }
}

impl Display for CompileError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.msg)
  }
}

impl std::error::Error for CompileError {}

impl From<std::io::Error> for CompileError {
  fn from(e: std::io::Error) -> Self { CompileError::msg(e.to_string()) }
}

/// Find the line containing byte offset `loc`: returns the 1-based line
/// number, the line's text, and the byte column within it.
fn locate(src: &str, loc: usize) -> (usize, &str, usize) {
  let loc = loc.min(src.len());
  let bytes = src.as_bytes();
  let mut start = loc;
  while start > 0 && bytes[start - 1] != b'\n' { start -= 1 }
  let mut end = loc;
  while end < bytes.len() && bytes[end] != b'\n' { end += 1 }
  let line_no = 1 + bytes[..start].iter().filter(|&&b| b == b'\n').count();
  (line_no, &src[start..end], loc - start)
}

/// Print a non-fatal caret diagnostic to stderr and continue.
pub fn warn_at(filename: &str, src: &str, loc: usize, msg: &str) {
  eprintln!("{}", CompileError::at(loc, msg).render(filename, src));
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn locate_lines() {
    let src = "int main() {\n  return x;\n}\n";
    let loc = src.find('x').unwrap();
    let (line, text, col) = locate(src, loc);
    assert_eq!((line, text, col), (2, "  return x;", 9));
  }

  #[test]
  fn render_points_at_column() {
    let src = "int a;\nint b = $;\n";
    let err = CompileError::at(src.find('$').unwrap(), "cannot tokenize");
    let rendered = err.render("t.c", src);
    let mut lines = rendered.lines();
    assert_eq!(lines.next(), Some("t.c:2: int b = $;"));
    let caret = lines.next().unwrap();
    assert_eq!(caret.find('^'), Some("t.c:2: ".len() + 8));
    assert!(caret.ends_with("cannot tokenize"));
  }

  #[test]
  fn no_location_render() {
    let err = CompileError::msg("no input files");
    assert_eq!(err.render("t.c", ""), "minicc: no input files");
  }
}
