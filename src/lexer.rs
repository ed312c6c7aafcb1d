//! The tokenizer: raw source bytes to a vector of [`Token`]s.
//!
//! Tokens reference the source buffer by byte offset and length; string
//! literals additionally carry their decoded contents. The output always
//! ends with an [`TokenKind::Eof`] token, so the parser can look ahead
//! without bounds checks.

use std::sync::LazyLock;

use arrayvec::ArrayVec;
use hashbrown::HashSet;

use crate::diag::{CompileError, Result};

/// The token kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
  /// A punctuator or reserved word.
  Punct,
  /// An identifier.
  Ident,
  /// A string literal; the payload is the decoded bytes plus a trailing
  /// NUL.
  Str(Vec<u8>),
  /// A decimal integer literal.
  Num(i64),
  /// End of input.
  Eof,
}

/// A token: its kind plus the source slice it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  /// The token kind and payload.
  pub kind: TokenKind,
  /// Byte offset of the token in the source buffer.
  pub loc: usize,
  /// Byte length of the token in the source buffer.
  pub len: usize,
}

impl Token {
  /// The source text of this token.
  #[must_use] pub fn text<'a>(&self, src: &'a str) -> &'a str {
    &src[self.loc..self.loc + self.len]
  }

  /// Whether this is the reserved word or punctuator `s`.
  #[must_use] pub fn is(&self, src: &str, s: &str) -> bool {
    self.kind == TokenKind::Punct && self.text(src) == s
  }
}

/// Reserved words. An identifier-shaped token that matches one of these is
/// a reserved word, so a keyword is never a prefix of a longer identifier.
pub const KEYWORDS: &[&str] = &[
  "return", "if", "else", "while", "for", "int", "char", "sizeof", "struct",
  "typedef", "short", "long", "void", "_Bool", "enum", "switch", "case",
  "default", "break", "continue", "goto", "do", "static",
];

static KEYWORD_SET: LazyLock<HashSet<&'static str>> =
  LazyLock::new(|| KEYWORDS.iter().copied().collect());

// Longest first, so `<<=` wins over `<<` wins over `<`.
const PUNCTUATORS: &[&str] = &[
  "<<=", ">>=", "==", "!=", "<=", ">=", "->", "<<", ">>", "+=", "-=", "*=",
  "/=", "%=", "&=", "|=", "^=", "++", "--", "&&", "||",
];

const SINGLE_PUNCT: &[u8] = b"+-*/()<>;={}[],&.|^!~?:%";

fn is_ident_start(b: u8) -> bool { b.is_ascii_alphabetic() || b == b'_' }
fn is_ident_cont(b: u8) -> bool { is_ident_start(b) || b.is_ascii_digit() }

fn unescape(b: u8) -> u8 {
  match b {
    b'a' => 7,
    b'b' => 8,
    b't' => b'\t',
    b'n' => b'\n',
    b'v' => 11,
    b'f' => 12,
    b'r' => b'\r',
    b'e' => 27,
    b'0' => 0,
    _ => b,
  }
}

/// Tokenize `src` into a vector terminated by an `Eof` token.
pub fn tokenize(src: &str) -> Result<Vec<Token>> {
  Lexer { src, bytes: src.as_bytes(), pos: 0 }.run()
}

struct Lexer<'a> {
  src: &'a str,
  bytes: &'a [u8],
  pos: usize,
}

impl Lexer<'_> {
  fn rest(&self) -> &str { &self.src[self.pos..] }

  fn run(mut self) -> Result<Vec<Token>> {
    let mut toks = vec![];
    'outer: while self.pos < self.bytes.len() {
      let b = self.bytes[self.pos];

      if b.is_ascii_whitespace() {
        self.pos += 1;
        continue;
      }

      if self.rest().starts_with("//") {
        while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' { self.pos += 1 }
        continue;
      }

      if self.rest().starts_with("/*") {
        match self.rest().find("*/") {
          Some(n) => self.pos += n + 2,
          None => return Err(CompileError::at(self.pos, "unclosed block comment")),
        }
        continue;
      }

      if b == b'"' {
        toks.push(self.read_string()?);
        continue;
      }

      // Reserved words and identifiers.
      if is_ident_start(b) {
        let start = self.pos;
        while self.pos < self.bytes.len() && is_ident_cont(self.bytes[self.pos]) { self.pos += 1 }
        let kind = if KEYWORD_SET.contains(&self.src[start..self.pos]) {
          TokenKind::Punct
        } else {
          TokenKind::Ident
        };
        toks.push(Token { kind, loc: start, len: self.pos - start });
        continue;
      }

      // Multi-letter punctuators, longest first.
      for p in PUNCTUATORS {
        if self.rest().starts_with(p) {
          toks.push(Token { kind: TokenKind::Punct, loc: self.pos, len: p.len() });
          self.pos += p.len();
          continue 'outer;
        }
      }

      if SINGLE_PUNCT.contains(&b) {
        toks.push(Token { kind: TokenKind::Punct, loc: self.pos, len: 1 });
        self.pos += 1;
        continue;
      }

      if b.is_ascii_digit() {
        toks.push(self.read_number()?);
        continue;
      }

      return Err(CompileError::at(self.pos, "cannot tokenize"));
    }
    toks.push(Token { kind: TokenKind::Eof, loc: self.pos, len: 0 });
    Ok(toks)
  }

  fn read_string(&mut self) -> Result<Token> {
    let start = self.pos;
    self.pos += 1;
    let mut buf = ArrayVec::<u8, 1024>::new();
    loop {
      match self.bytes.get(self.pos) {
        None | Some(&0) => return Err(CompileError::at(start, "unclosed string literal")),
        Some(&b'"') => break,
        Some(&b) => {
          let decoded = if b == b'\\' {
            self.pos += 1;
            match self.bytes.get(self.pos) {
              None => return Err(CompileError::at(start, "unclosed string literal")),
              Some(&e) => unescape(e),
            }
          } else {
            b
          };
          if buf.try_push(decoded).is_err() {
            return Err(CompileError::at(start, "string literal too long"));
          }
          self.pos += 1;
        }
      }
    }
    self.pos += 1;
    let mut contents = buf.to_vec();
    contents.push(0);
    Ok(Token { kind: TokenKind::Str(contents), loc: start, len: self.pos - start })
  }

  fn read_number(&mut self) -> Result<Token> {
    let start = self.pos;
    while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_digit() { self.pos += 1 }
    let val = self.src[start..self.pos].parse::<i64>()
      .map_err(|_| CompileError::at(start, "integer literal out of range"))?;
    Ok(Token { kind: TokenKind::Num(val), loc: start, len: self.pos - start })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn kinds(src: &str) -> Vec<Token> { tokenize(src).unwrap() }

  #[test]
  fn token_slices_reproduce_input() {
    let src = "int main() { return a->b + 3 <<= 2; /* c */ }\n";
    let toks = kinds(src);
    // Concatenating the token slices and the skipped gaps reproduces the
    // input byte for byte.
    let mut rebuilt = String::new();
    let mut prev = 0;
    for t in &toks {
      rebuilt.push_str(&src[prev..t.loc]);
      rebuilt.push_str(t.text(src));
      prev = t.loc + t.len;
    }
    rebuilt.push_str(&src[prev..]);
    assert_eq!(rebuilt, src);
  }

  #[test]
  fn keywords_need_a_break() {
    let src = "int intx return returned";
    let toks = kinds(src);
    assert_eq!(toks[0].kind, TokenKind::Punct);
    assert_eq!(toks[1].kind, TokenKind::Ident);
    assert_eq!(toks[2].kind, TokenKind::Punct);
    assert_eq!(toks[3].kind, TokenKind::Ident);
  }

  #[test]
  fn longest_punctuator_wins() {
    let src = "a <<= b << c < d";
    let toks = kinds(src);
    let texts: Vec<_> = toks.iter().filter(|t| t.kind == TokenKind::Punct)
      .map(|t| t.text(src)).collect();
    assert_eq!(texts, ["<<=", "<<", "<"]);
  }

  #[test]
  fn string_escapes_decode() {
    let toks = kinds(r#""a\tb\n\e\0\q""#);
    let TokenKind::Str(contents) = &toks[0].kind else { panic!("not a string") };
    assert_eq!(contents, &[b'a', b'\t', b'b', b'\n', 27, 0, b'q', 0]);
  }

  #[test]
  fn string_keeps_quotes_in_span() {
    let src = r#"  "hi"  "#;
    let toks = kinds(src);
    assert_eq!(toks[0].text(src), r#""hi""#);
  }

  #[test]
  fn unterminated_string() {
    let err = tokenize("\"abc").unwrap_err();
    assert_eq!(err.msg, "unclosed string literal");
    assert_eq!(err.loc, Some(0));
  }

  #[test]
  fn overlong_string() {
    let src = format!("\"{}\"", "x".repeat(1025));
    assert_eq!(tokenize(&src).unwrap_err().msg, "string literal too long");
  }

  #[test]
  fn unclosed_block_comment() {
    assert_eq!(tokenize("int a; /* oops").unwrap_err().msg, "unclosed block comment");
  }

  #[test]
  fn comments_are_skipped() {
    let toks = kinds("1 // two\n3 /* four */ 5");
    let nums: Vec<_> = toks.iter().filter_map(|t| match t.kind {
      TokenKind::Num(n) => Some(n),
      _ => None,
    }).collect();
    assert_eq!(nums, [1, 3, 5]);
  }

  #[test]
  fn stray_byte_is_fatal() {
    let err = tokenize("int a = @;").unwrap_err();
    assert_eq!(err.msg, "cannot tokenize");
    assert_eq!(err.loc, Some(8));
  }

  #[test]
  fn number_values() {
    let toks = kinds("0 42 1000000000000");
    let nums: Vec<_> = toks.iter().filter_map(|t| match t.kind {
      TokenKind::Num(n) => Some(n),
      _ => None,
    }).collect();
    assert_eq!(nums, [0, 42, 1_000_000_000_000]);
  }
}
