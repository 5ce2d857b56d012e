//! Declarative enums for the wire formats documented in SPEC_FULL.md §3/§6:
//! compiler version tiers, scalar value types, and data-table structure
//! types. Kept separate from the decoders that use them.

pub mod wire;

pub use wire::{PbType, PbVersion, StructureType};
