//! PowerBuilder compiled class-group decompiler: reads `.pbl`/`.pbd` library
//! containers, decodes their class-group entries, disassembles p-code
//! method bodies, reconstructs control flow, and prints PowerScript source.

pub mod arena;
pub mod class_group;
pub mod control_flow;
pub mod cursor;
pub mod data_table;
pub mod disassemble;
pub mod library;
pub mod opcode;
pub mod printer;
pub mod schema;

pub use arena::Arena;
pub use class_group::{parse_entry, ClassGroup};
pub use cursor::Cursor;
pub use data_table::DataTable;
pub use disassemble::Disassembly;
pub use library::Library;
