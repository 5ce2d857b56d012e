//! Scoped bump allocator backing one class-group or one disassembly.
//!
//! Every string, slice and struct reachable through a `ClassGroup` or a
//! `Disassembly` is owned by its `Arena`; dropping the arena drops all of it
//! at once (see SPEC_FULL.md §4.1 / §5). There are no per-object destructors
//! to run, so this is a thin wrapper over `bumpalo::Bump` rather than a
//! hand-rolled pointer pool.

use bumpalo::Bump;
use bumpalo::collections::{String as BumpString, Vec as BumpVec};

pub struct Arena {
    bump: Bump,
}

impl Arena {
    #[must_use]
    pub fn new() -> Self {
        Self { bump: Bump::new() }
    }

    /// Copy a UTF-8 string into the arena.
    pub fn alloc_str<'a>(&'a self, s: &str) -> &'a str {
        self.bump.alloc_str(s)
    }

    /// Transcode a UTF-16LE byte sequence (as stored by PB10+ string records)
    /// into an arena-owned UTF-8 string.
    pub fn alloc_utf16le(&self, bytes: &[u8]) -> &str {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        let decoded = String::from_utf16_lossy(&units);
        self.alloc_str(&decoded)
    }

    pub fn alloc_slice_copy<'a, T: Copy>(&'a self, items: &[T]) -> &'a [T] {
        self.bump.alloc_slice_copy(items)
    }

    pub fn alloc_from_iter<'a, T, I: IntoIterator<Item = T>>(&'a self, iter: I) -> &'a [T] {
        let mut v = BumpVec::new_in(&self.bump);
        v.extend(iter);
        v.into_bump_slice()
    }

    /// `sprintf`-equivalent: builds a string in place in the arena, sized exactly.
    pub fn alloc_fmt<'a>(&'a self, args: std::fmt::Arguments<'_>) -> &'a str {
        use std::fmt::Write;
        let mut s = BumpString::new_in(&self.bump);
        let _ = s.write_fmt(args);
        s.into_bump_str()
    }

    pub fn alloc<'a, T>(&'a self, value: T) -> &'a T {
        self.bump.alloc(value)
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds an arena-owned string via `format!`-style arguments, mirroring the
/// original allocator's two-pass measure-then-format `sprintf`.
#[macro_export]
macro_rules! arena_format {
    ($arena:expr, $($arg:tt)*) => {
        $arena.alloc_fmt(format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_survive_across_allocations() {
        let arena = Arena::new();
        let a = arena.alloc_str("hello");
        let b = arena.alloc_str("world");
        assert_eq!(a, "hello");
        assert_eq!(b, "world");
    }

    #[test]
    fn utf16_roundtrips_ascii_range() {
        let arena = Arena::new();
        let wide: Vec<u8> = "hi"
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        assert_eq!(arena.alloc_utf16le(&wide), "hi");
    }

    #[test]
    fn alloc_fmt_matches_format() {
        let arena = Arena::new();
        let s = arena_format!(arena, "{}_{}", "prop", 3);
        assert_eq!(s, "prop_3");
    }
}
