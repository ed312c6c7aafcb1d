//! The C type representation: construction, comparison helpers, and the
//! size/alignment/offset arithmetic that fixes the data layout.
//!
//! All types live in a [`TyArena`] and are referenced by [`TyId`] handles,
//! which makes recursive structs (`struct T { struct T *next; }`)
//! representable: the self-reference goes through a pointer type that only
//! needs the struct's handle, not its completed body.

use smallvec::SmallVec;

use crate::mk_id;
use crate::types::IdxVec;

mk_id! {
  /// A handle to a type in the [`TyArena`].
  TyId,
}

/// A member of a struct type.
#[derive(Clone, Debug)]
pub struct Member {
  /// The member name.
  pub name: String,
  /// The member type.
  pub ty: TyId,
  /// Byte offset of the member from the start of the struct.
  pub offset: usize,
  /// The token that declared the member, for diagnostics.
  pub tok: usize,
}

/// The type of a C value or object.
#[derive(Clone, Debug)]
pub enum TyKind {
  /// `void`
  Void,
  /// `_Bool`
  Bool,
  /// `char`
  Char,
  /// `short`
  Short,
  /// `int`
  Int,
  /// `long`
  Long,
  /// An enumerated type. Enumerators themselves are scope entries carrying
  /// `int` values; the type only fixes the representation.
  Enum,
  /// A pointer to `base`.
  Ptr {
    /// The pointed-to type.
    base: TyId,
  },
  /// An array of `len` elements of `base`. An array declared `[]` is
  /// incomplete and has `len == 0`.
  Array {
    /// The element type.
    base: TyId,
    /// The element count.
    len: usize,
  },
  /// A struct type. Incomplete until its body is seen.
  Struct {
    /// The members in declaration order, with assigned offsets.
    members: SmallVec<[Member; 4]>,
  },
  /// A function type. Only the return type matters to the checker;
  /// parameters are carried by the function definition itself.
  Func {
    /// The return type.
    return_ty: TyId,
  },
}

/// A type record: the kind plus its computed layout.
#[derive(Clone, Debug)]
pub struct Ty {
  /// What sort of type this is.
  pub kind: TyKind,
  /// Size in bytes. For complete types this is a multiple of `align`.
  pub size: usize,
  /// Alignment in bytes, a power of two.
  pub align: usize,
  /// An incomplete type (forward-declared struct, `[]` array) may only be
  /// used through pointers; taking its size is an error.
  pub incomplete: bool,
}

/// Round `n` up to the next multiple of `align`, which must be a power
/// of two.
#[must_use] pub const fn align_to(n: usize, align: usize) -> usize {
  (n + align - 1) & !(align - 1)
}

/// The arena holding every type created during a compilation.
///
/// The six base types are preallocated at fixed handles so that they can be
/// shared without lookups.
#[derive(Debug)]
pub struct TyArena(IdxVec<TyId, Ty>);

/// The canonical `void` type.
pub const VOID: TyId = TyId(0);
/// The canonical `_Bool` type.
pub const BOOL: TyId = TyId(1);
/// The canonical `char` type.
pub const CHAR: TyId = TyId(2);
/// The canonical `short` type.
pub const SHORT: TyId = TyId(3);
/// The canonical `int` type.
pub const INT: TyId = TyId(4);
/// The canonical `long` type.
pub const LONG: TyId = TyId(5);

impl Default for TyArena {
  fn default() -> Self { Self::new() }
}

impl TyArena {
  /// Create an arena with the base types installed.
  #[must_use] pub fn new() -> Self {
    let mut vec = IdxVec::new();
    let scalar = |kind, size| Ty { kind, size, align: size, incomplete: false };
    vec.push(scalar(TyKind::Void, 1));
    vec.push(scalar(TyKind::Bool, 1));
    vec.push(scalar(TyKind::Char, 1));
    vec.push(scalar(TyKind::Short, 2));
    vec.push(scalar(TyKind::Int, 4));
    vec.push(scalar(TyKind::Long, 8));
    TyArena(vec)
  }

  /// Access a type by handle.
  #[must_use] pub fn get(&self, id: TyId) -> &Ty { &self.0[id] }

  /// A fresh pointer type to `base`.
  pub fn pointer_to(&mut self, base: TyId) -> TyId {
    self.0.push(Ty { kind: TyKind::Ptr { base }, size: 8, align: 8, incomplete: false })
  }

  /// A fresh array type of `len` elements of `base`.
  pub fn array_of(&mut self, base: TyId, len: usize) -> TyId {
    let (size, align) = (self.0[base].size, self.0[base].align);
    self.0.push(Ty { kind: TyKind::Array { base, len }, size: size * len, align, incomplete: false })
  }

  /// A fresh incomplete array type (`[]`), size 0 until completed.
  pub fn incomplete_array_of(&mut self, base: TyId) -> TyId {
    let align = self.0[base].align;
    self.0.push(Ty { kind: TyKind::Array { base, len: 0 }, size: 0, align, incomplete: true })
  }

  /// A fresh function type returning `return_ty`.
  pub fn func_type(&mut self, return_ty: TyId) -> TyId {
    self.0.push(Ty { kind: TyKind::Func { return_ty }, size: 1, align: 1, incomplete: false })
  }

  /// A fresh enum type.
  pub fn enum_type(&mut self) -> TyId {
    self.0.push(Ty { kind: TyKind::Enum, size: 4, align: 4, incomplete: false })
  }

  /// A fresh struct type, initially incomplete.
  pub fn struct_type(&mut self) -> TyId {
    let members = SmallVec::new();
    self.0.push(Ty { kind: TyKind::Struct { members }, size: 0, align: 1, incomplete: true })
  }

  /// A placeholder slot for a parenthesized inner declarator; the caller
  /// patches it with [`TyArena::overwrite`] once the surrounding type is
  /// known.
  pub fn placeholder(&mut self) -> TyId {
    self.0.push(Ty { kind: TyKind::Int, size: 4, align: 4, incomplete: true })
  }

  /// Overwrite the slot `dst` with a copy of the type at `src`.
  pub fn overwrite(&mut self, dst: TyId, src: TyId) {
    self.0[dst] = self.0[src].clone();
  }

  /// Lay out `members` and complete the struct at `id`: each member offset
  /// is rounded up to the member's alignment, the struct alignment is the
  /// max of member alignments, and the final size is the offset high-water
  /// mark rounded up to the struct alignment.
  pub fn complete_struct(&mut self, id: TyId, mut members: SmallVec<[Member; 4]>) {
    let mut offset = 0;
    let mut align = 1;
    for m in &mut members {
      let mty = &self.0[m.ty];
      offset = align_to(offset, mty.align);
      m.offset = offset;
      offset += mty.size;
      align = align.max(mty.align);
    }
    self.0[id] = Ty {
      kind: TyKind::Struct { members },
      size: align_to(offset, align),
      align,
      incomplete: false,
    };
  }

  /// True for the integer kinds: `_Bool`, `char`, `short`, `int`, `long`,
  /// and enums.
  #[must_use] pub fn is_integer(&self, id: TyId) -> bool {
    matches!(self.0[id].kind,
      TyKind::Bool | TyKind::Char | TyKind::Short | TyKind::Int | TyKind::Long | TyKind::Enum)
  }

  /// The pointed-to or element type, for pointers and arrays.
  #[must_use] pub fn base(&self, id: TyId) -> Option<TyId> {
    match self.0[id].kind {
      TyKind::Ptr { base } | TyKind::Array { base, .. } => Some(base),
      _ => None,
    }
  }

  /// True if `id` is a pointer or array (has a base type).
  #[must_use] pub fn has_base(&self, id: TyId) -> bool { self.base(id).is_some() }

  /// Size in bytes.
  #[must_use] pub fn size(&self, id: TyId) -> usize { self.0[id].size }

  /// Alignment in bytes.
  #[must_use] pub fn align(&self, id: TyId) -> usize { self.0[id].align }

  /// Whether the type is still incomplete.
  #[must_use] pub fn is_incomplete(&self, id: TyId) -> bool { self.0[id].incomplete }

  /// Look up a struct member by name.
  #[must_use] pub fn find_member(&self, id: TyId, name: &str) -> Option<&Member> {
    match &self.0[id].kind {
      TyKind::Struct { members } => members.iter().find(|m| m.name == name),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn align_to_rounds_up() {
    assert_eq!(align_to(0, 8), 0);
    assert_eq!(align_to(1, 8), 8);
    assert_eq!(align_to(8, 8), 8);
    assert_eq!(align_to(11, 4), 12);
  }

  #[test]
  fn scalar_layout() {
    let tys = TyArena::new();
    for (id, size) in [(CHAR, 1), (SHORT, 2), (INT, 4), (LONG, 8), (BOOL, 1)] {
      assert_eq!(tys.size(id), size);
      assert_eq!(tys.align(id), size);
    }
  }

  #[test]
  fn pointers_are_eight_bytes() {
    let mut tys = TyArena::new();
    let p = tys.pointer_to(CHAR);
    assert_eq!((tys.size(p), tys.align(p)), (8, 8));
    assert_eq!(tys.base(p), Some(CHAR));
  }

  #[test]
  fn array_layout() {
    let mut tys = TyArena::new();
    let a = tys.array_of(INT, 10);
    assert_eq!((tys.size(a), tys.align(a)), (40, 4));
  }

  #[test]
  fn struct_layout_respects_member_alignment() {
    // struct { char c; long l; short s; }
    let mut tys = TyArena::new();
    let id = tys.struct_type();
    assert!(tys.is_incomplete(id));
    let members = SmallVec::from_vec(vec![
      Member { name: "c".into(), ty: CHAR, offset: 0, tok: 0 },
      Member { name: "l".into(), ty: LONG, offset: 0, tok: 0 },
      Member { name: "s".into(), ty: SHORT, offset: 0, tok: 0 },
    ]);
    tys.complete_struct(id, members);
    assert!(!tys.is_incomplete(id));
    assert_eq!(tys.find_member(id, "c").unwrap().offset, 0);
    assert_eq!(tys.find_member(id, "l").unwrap().offset, 8);
    assert_eq!(tys.find_member(id, "s").unwrap().offset, 16);
    assert_eq!(tys.align(id), 8);
    assert_eq!(tys.size(id), 24);
    assert_eq!(tys.size(id) % tys.align(id), 0);
  }

  #[test]
  fn self_referential_struct_through_pointer() {
    // struct T { struct T *next; int v; }
    let mut tys = TyArena::new();
    let t = tys.struct_type();
    let next = tys.pointer_to(t);
    let members = SmallVec::from_vec(vec![
      Member { name: "next".into(), ty: next, offset: 0, tok: 0 },
      Member { name: "v".into(), ty: INT, offset: 0, tok: 0 },
    ]);
    tys.complete_struct(t, members);
    assert_eq!(tys.size(t), 16);
  }
}
