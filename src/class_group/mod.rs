//! Class-group decoder (SPEC_FULL.md §4.4): header, external references,
//! type/enum tables, and the per-class layout of scripts, variables and
//! resource blobs.

pub mod model;
pub mod parse;
pub mod values;

pub use model::{
    AccessFlags, Argument, ClassDefinition, ClassGroup, Enumeration, ExternalReference, Script, ScriptKind,
    TypeEntry, TypeKind, Variable,
};
pub use parse::{parse as parse_entry, Error};
