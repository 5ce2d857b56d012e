//! The sequential class-group binary format reader (SPEC_FULL.md §4.4): header,
//! external references, type/enum tables, then one inline pass per class
//! covering scripts, variables, method tables and resource blobs.

use std::{error, fmt};

use crate::arena::Arena;
use crate::cursor::Cursor;
use crate::data_table::DataTable;
use crate::schema::{PbType, PbVersion};

use super::model::{
    AccessFlags, Argument, ClassDefinition, Enumeration, ExternalReference, Script, TypeEntry, TypeKind, Variable,
};
use super::ClassGroup;

const MAGIC_TYPE_DEFS: [u8; 3] = [0x10, 0x32, 0x08];
const MAGIC_MAIN_TYPE_LIST: [u8; 3] = [0x0a, 0x78, 0x11];
const MAGIC_ENUM_VALUES: [u8; 3] = [0x14, 0xf0, 0x11];
const MAGIC_LOCALS: [u8; 3] = [16, 100, 8];
const MAGIC_IMPORT_BRACKET: [u8; 3] = [16, 50, 11];

const FLAG_ENUM_MASK: u16 = 0xff;
const FLAG_ENUM: u16 = 3;
const FLAG_SOURCE_INIT: u16 = 0x85;
const FLAG_SOURCE_SHARED: u16 = 0x89;
const FLAG_SOURCE_GLOBAL: u16 = 0x0b;

const SCRIPT_FLAG_EVENT: u16 = 0x0100;
const SCRIPT_FLAG_SYSTEM: u16 = 0x0200;
const SCRIPT_FLAG_RPC: u16 = 0x0800;
const VALUE_FLAG_ARRAY: u16 = 0x2000;

// Best-effort bit assignment for `constant`/`indirect`/`user_defined`; the
// source only documents the 2-bit access fields precisely (SPEC_FULL.md
// §4.4.3, spec.md §9 "certain type flags ... are guesses"). See DESIGN.md.
const TYPEDEF_FLAG_CONSTANT: u16 = 0x0100;
const TYPEDEF_FLAG_INDIRECT: u16 = 0x0200;
const TYPEDEF_FLAG_USER_DEFINED: u16 = 0x0400;

#[derive(Debug)]
pub enum Error {
    Cursor(crate::cursor::Error),
    DataTable(crate::data_table::Error),
    UnsupportedVersion(u16),
    ClassCountMismatch { expected: u16, actual: u16 },
    TrailingBytes { remaining: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cursor(e) => write!(f, "{e}"),
            Self::DataTable(e) => write!(f, "{e}"),
            Self::UnsupportedVersion(v) => write!(f, "compiler_version {v} predates PB6, unsupported"),
            Self::ClassCountMismatch { expected, actual } => {
                write!(f, "expected {expected} classes, decoded {actual}")
            }
            Self::TrailingBytes { remaining } => write!(f, "{remaining} undecoded bytes remain after parsing"),
        }
    }
}

impl error::Error for Error {}

impl From<crate::cursor::Error> for Error {
    fn from(e: crate::cursor::Error) -> Self {
        Self::Cursor(e)
    }
}

impl From<crate::data_table::Error> for Error {
    fn from(e: crate::data_table::Error) -> Self {
        Self::DataTable(e)
    }
}

fn access_name(bits: u8) -> &'static str {
    match bits & 0x3 {
        1 => "private",
        2 => "protected",
        3 => "system",
        _ => "",
    }
}

/// Raw `{flags, dimensions-offset, name-offset, value{value, flags, type}}`
/// record (SPEC_FULL.md §3 "Type definition").
struct RawTypeDef {
    flags: u16,
    dimensions_offset: u16,
    name_offset: u16,
    value: u32,
    value_flags: u16,
    value_type: u16,
}

fn read_typedef(c: &mut Cursor<'_>) -> Result<RawTypeDef, Error> {
    Ok(RawTypeDef {
        flags: c.read_u16()?,
        dimensions_offset: c.read_u16()?,
        name_offset: c.read_u16()?,
        value: c.read_u32()?,
        value_flags: c.read_u16()?,
        value_type: c.read_u16()?,
    })
}

fn read_typedef_list(c: &mut Cursor<'_>) -> Result<Vec<RawTypeDef>, Error> {
    let count = c.read_u16()?;
    (0..count).map(|_| read_typedef(c)).collect()
}

/// `get_type_name(typeword)` (SPEC_FULL.md §4.4.3).
fn type_name<'a>(
    typeword: u16,
    external_refs: &[ExternalReference<'a>],
    user_types: &[&'a str],
    arena: &'a Arena,
) -> &'a str {
    if typeword == 0x0000 || typeword == 0xC000 {
        return "";
    }
    if typeword & 0x4000 != 0 {
        return external_refs
            .iter()
            .find(|r| r.system_type == typeword && r.unnamed1 == 0)
            .map(|r| arena.alloc_str(r.name))
            .unwrap_or_else(|| arena.alloc_str("TODO_SYS_TYPE"));
    }
    if typeword & 0x8000 != 0 {
        let idx = (typeword & 0x7fff) as usize;
        return user_types.get(idx).copied().unwrap_or("");
    }
    match PbType::try_from(typeword & 0xff) {
        Ok(ty) => ty.keyword(),
        Err(_) => "",
    }
}

fn dimensions_string<'a>(
    table: &DataTable,
    main: Option<&DataTable>,
    offset: u16,
    arena: &'a Arena,
) -> Result<Option<&'a str>, Error> {
    if DataTable::is_null(offset) {
        return Ok(None);
    }
    let bytes = table.lookup_pointer(main, offset)?;
    let mut c = Cursor::new(bytes);
    let count = c.read_u16().map_err(Error::from)?;
    let mut pairs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let lower = c.read_u32().map_err(Error::from)? as i32;
        let upper = c.read_u32().map_err(Error::from)? as i32;
        pairs.push((lower, upper));
    }
    Ok(Some(arena.alloc_str(&super::values::format_dimensions(&pairs))))
}

fn initial_values<'a>(
    def: &RawTypeDef,
    type_name: &str,
    table: &DataTable,
    main: Option<&DataTable>,
    unicode: bool,
    arena: &'a Arena,
) -> Result<Vec<&'a str>, Error> {
    if def.flags & TYPEDEF_FLAG_INDIRECT != 0 {
        let rendered = table.format_resource(main, def.value as u16, unicode, arena)?;
        return Ok(vec![rendered]);
    }
    if def.value_flags & VALUE_FLAG_ARRAY != 0 {
        let rendered = table.format_resource(main, def.value as u16, unicode, arena)?;
        return Ok(vec![rendered]);
    }
    if def.value == 0 && type_name.is_empty() {
        return Ok(Vec::new());
    }
    match super::values::format_scalar_value(def.value, def.value_type, table, main, unicode, arena)? {
        Some(v) => Ok(vec![v]),
        None => Ok(Vec::new()),
    }
}

fn materialize_variable<'a>(
    def: RawTypeDef,
    table: &DataTable,
    main: Option<&DataTable>,
    external_refs: &[ExternalReference<'a>],
    user_types: &[&'a str],
    unicode: bool,
    arena: &'a Arena,
) -> Result<Variable<'a>, Error> {
    let ty = type_name(def.value_type, external_refs, user_types, arena);
    let name = table.lookup_string(main, def.name_offset, unicode, arena)?;
    let dimensions = dimensions_string(table, main, def.dimensions_offset, arena)?;
    let initial_values = initial_values(&def, ty, table, main, unicode, arena)?;

    let read_bits = ((def.flags >> 4) & 0x3) as u8;
    let write_bits = ((def.flags >> 6) & 0x3) as u8;
    let read_access = if read_bits == 0 { None } else { Some(access_name(read_bits)) };
    let write_access = if write_bits == 0 { None } else { Some(access_name(write_bits)) };

    Ok(Variable {
        read_access,
        write_access,
        type_name: ty,
        name,
        dimensions,
        initial_values,
        flags: AccessFlags {
            constant: def.flags & TYPEDEF_FLAG_CONSTANT != 0,
            indirect: def.flags & TYPEDEF_FLAG_INDIRECT != 0,
            user_defined: def.flags & TYPEDEF_FLAG_USER_DEFINED != 0,
        },
    })
}

struct ClassHeader {
    variable_count: u16,
    indirect_count: u16,
    script_count: u16,
    something_count: u16,
    ancestor_offset: u16,
    parent_offset: u16,
    flags: u16,
}

const CLASS_FLAG_AUTOINSTANTIATE: u16 = 0x0004;

fn read_class_header(c: &mut Cursor<'_>) -> Result<ClassHeader, Error> {
    Ok(ClassHeader {
        ancestor_offset: c.read_u16()?,
        parent_offset: c.read_u16()?,
        flags: c.read_u16()?,
        variable_count: c.read_u16()?,
        indirect_count: c.read_u16()?,
        script_count: c.read_u16()?,
        something_count: c.read_u16()?,
    })
}

struct ShortHeader {
    method_id: u16,
    body_index: u16,
}

struct ScriptBody {
    method_number: u16,
    code: Vec<u8>,
    debug_lines: Vec<(u16, u16)>,
    locals: Vec<RawTypeDef>,
    resources: DataTable,
}

struct RawScriptHeader {
    name_offset: u16,
    signature_offset: u16,
    arguments_offset: u16,
    alias_offset: u16,
    library_offset: u16,
    return_typeword: u16,
    flags: u16,
    more_flags: u16,
    access: u8,
    method_id: u16,
    method_number: u16,
    throws_offset: u16,
}

fn read_script_header(c: &mut Cursor<'_>, version: u16) -> Result<RawScriptHeader, Error> {
    let name_offset = c.read_u16()?;
    let signature_offset = if PbVersion::has_signature_offset(version) { c.read_u16()? } else { 0xffff };
    let arguments_offset = c.read_u16()?;
    let alias_offset = c.read_u16()?;
    let library_offset = c.read_u16()?;
    let return_typeword = c.read_u16()?;
    let flags = c.read_u16()?;
    let more_flags = c.read_u16()?;
    let method_id = c.read_u16()?;
    let method_number = c.read_u16()?;
    let throws_offset = if PbVersion::has_throws_offset(version) { c.read_u16()? } else { 0xffff };
    Ok(RawScriptHeader {
        name_offset,
        signature_offset,
        arguments_offset,
        alias_offset,
        library_offset,
        return_typeword,
        flags,
        more_flags,
        access: ((flags >> 12) & 0x3) as u8,
        method_id,
        method_number,
        throws_offset,
    })
}

fn read_arguments<'a>(
    table: &DataTable,
    main: Option<&DataTable>,
    offset: u16,
    external_refs: &[ExternalReference<'a>],
    user_types: &[&'a str],
    unicode: bool,
    arena: &'a Arena,
) -> Result<Vec<Argument<'a>>, Error> {
    if DataTable::is_null(offset) {
        return Ok(Vec::new());
    }
    let bytes = table.lookup_pointer(main, offset)?;
    let mut c = Cursor::new(bytes);
    let count = c.read_u16().map_err(Error::from)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let def = read_typedef(&mut c)?;
        let ty = type_name(def.value_type, external_refs, user_types, arena);
        let name = table.lookup_string(main, def.name_offset, unicode, arena)?;
        let dimensions = dimensions_string(table, main, def.dimensions_offset, arena)?;
        let access_bits = ((def.flags >> 4) & 0x3) as u8;
        out.push(Argument {
            access: if access_bits == 0 { None } else { Some(access_name(access_bits)) },
            type_name: ty,
            name: if name.is_empty() { None } else { Some(name) },
            dimensions,
        });
    }
    Ok(out)
}

fn read_string_list<'a>(
    table: &DataTable,
    main: Option<&DataTable>,
    offset: u16,
    unicode: bool,
    arena: &'a Arena,
) -> Result<Vec<&'a str>, Error> {
    if DataTable::is_null(offset) {
        return Ok(Vec::new());
    }
    let bytes = table.lookup_pointer(main, offset)?;
    let mut c = Cursor::new(bytes);
    let count = c.read_u16().map_err(Error::from)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_offset = c.read_u16().map_err(Error::from)?;
        out.push(table.lookup_string(main, name_offset, unicode, arena)?);
    }
    Ok(out)
}

/// Parses one library entry's body into its decoded object model
/// (SPEC_FULL.md §4.4, steps 1-10).
pub fn parse<'a>(entry: &[u8], arena: &'a Arena) -> Result<ClassGroup<'a>, Error> {
    let mut c = Cursor::new(entry);

    // 1. file_header
    let compiler_version = c.read_u16()?;
    let _system_type = c.read_u16()?;
    let _timestamp = c.read_u32()?;
    if compiler_version < PbVersion::Pb6 as u16 {
        return Err(Error::UnsupportedVersion(compiler_version));
    }
    let unicode = PbVersion::unicode_strings(compiler_version);

    // 2. external references + main data table
    let ext_ref_count = c.read_u16()?;
    let mut external_refs = Vec::with_capacity(ext_ref_count as usize);
    let mut main_table: Option<DataTable> = None;
    if ext_ref_count > 0 {
        for _ in 0..ext_ref_count {
            let name_offset = c.read_u16()?;
            let system_type = c.read_u16()?;
            let type_word = c.read_u16()?;
            let unnamed1 = c.read_u16()?;
            external_refs.push((name_offset, system_type, type_word, unnamed1));
        }
        main_table = Some(DataTable::read(&mut c)?);
    }
    let main = main_table.as_ref();
    let external_refs: Vec<ExternalReference<'a>> = external_refs
        .into_iter()
        .map(|(name_offset, system_type, type_word, unnamed1)| {
            let name = main
                .map(|t| t.lookup_string(None, name_offset, unicode, arena))
                .transpose()?
                .unwrap_or("");
            Ok(ExternalReference { name, system_type, type_word, unnamed1 })
        })
        .collect::<Result<_, Error>>()?;

    // 3. global type-defs table marker
    c.expect_magic(&MAGIC_TYPE_DEFS)?;
    let global_table = DataTable::read(&mut c)?;

    // 4. counts
    let type_count = c.read_u16()?;
    let class_count = c.read_u16()?;

    // 5. function-name and argument tables
    let _function_names = DataTable::read(&mut c)?;
    let _arguments_table = DataTable::read(&mut c)?;

    // 6. main type list marker
    c.expect_magic(&MAGIC_MAIN_TYPE_LIST)?;
    let mut user_type_names: Vec<&'a str> = Vec::with_capacity(type_count as usize);
    for _ in 0..type_count {
        let offset = c.read_u16()?;
        user_type_names.push(global_table.lookup_string(None, offset, unicode, arena)?);
    }

    // 7. enum-value table marker
    c.expect_magic(&MAGIC_ENUM_VALUES)?;
    let enum_values_table = DataTable::read(&mut c)?;

    // 8. headers
    struct TypeHeader {
        name_offset: u16,
        flags: u16,
    }
    let mut type_headers = Vec::with_capacity(type_count as usize);
    for _ in 0..type_count {
        type_headers.push(TypeHeader { name_offset: c.read_u16()?, flags: c.read_u16()? });
    }
    let mut class_headers = Vec::with_capacity(class_count as usize);
    for _ in 0..class_count {
        class_headers.push(read_class_header(&mut c)?);
    }

    // 9. per-type dispatch
    let mut types: Vec<TypeEntry<'a>> = Vec::with_capacity(type_count as usize);
    // Global variables live inside the `GlobalSource` sentinel type's own
    // source text rather than as a separate table; see DESIGN.md.
    let global_variables: Vec<Variable<'a>> = Vec::new();
    let mut class_index = 0usize;

    for header in &type_headers {
        let name = global_table.lookup_string(None, header.name_offset, unicode, arena)?;

        if header.flags & FLAG_ENUM_MASK == FLAG_ENUM {
            let enum_count = c.read_u16()?;
            let mut values = Vec::with_capacity(enum_count as usize);
            for _ in 0..enum_count {
                let value_name_offset = c.read_u16()?;
                let value = c.read_u16()?;
                let value_name = enum_values_table.lookup_string(main, value_name_offset, unicode, arena)?;
                values.push((value_name, value));
            }
            types.push(TypeEntry { name, kind: TypeKind::Enum(Enumeration { values }) });
            continue;
        }

        if matches!(header.flags, FLAG_SOURCE_INIT | FLAG_SOURCE_SHARED | FLAG_SOURCE_GLOBAL) {
            let kind = match header.flags {
                FLAG_SOURCE_INIT => TypeKind::InitSource,
                FLAG_SOURCE_SHARED => TypeKind::SharedSource,
                _ => TypeKind::GlobalSource,
            };
            types.push(TypeEntry { name, kind });
            continue;
        }

        // Class.
        let class_header = &class_headers[class_index];
        class_index += 1;

        // 9.1 implemented-script flags, in encounter order.
        let script_count = c.read_u16()?;
        let mut implemented_flags = Vec::with_capacity(script_count as usize);
        for _ in 0..script_count {
            let implemented = c.read_u16()? != 0;
            let method_number = c.read_u16()?;
            implemented_flags.push((implemented, method_number));
        }

        // 9.2 bodies, one per implemented entry, in encounter order.
        let mut bodies = Vec::new();
        for &(implemented, method_number) in &implemented_flags {
            if !implemented {
                continue;
            }
            let code_size = c.read_u32()?;
            let debugline_count = c.read_u32()?;
            let _ignored = c.read_u16()?;
            let code = c.read_bytes(code_size as usize)?.to_vec();
            let mut debug_lines = Vec::with_capacity(debugline_count as usize);
            for _ in 0..debugline_count {
                let pcode_offset = c.read_u16()?;
                let line_number = c.read_u16()?;
                debug_lines.push((pcode_offset, line_number));
            }
            c.expect_magic(&MAGIC_LOCALS)?;
            let locals = read_typedef_list(&mut c)?;
            let resources = DataTable::read(&mut c)?;
            bodies.push(ScriptBody { method_number, code, debug_lines, locals, resources });
        }

        // 9.3 short headers (dispatch table, sorted by method-id).
        let mut short_headers = Vec::with_capacity(class_header.script_count as usize);
        for _ in 0..class_header.script_count {
            short_headers.push(ShortHeader { method_id: c.read_u16()?, body_index: c.read_u16()? });
        }

        // 9.4 ignored block, size given by the class header's something_count.
        for _ in 0..class_header.something_count {
            let _ = c.read_u32()?;
        }

        // 9.5 imports, then instance variables.
        c.expect_magic(&MAGIC_IMPORT_BRACKET)?;
        let _imports = read_typedef_list(&mut c)?;
        c.expect_magic(&MAGIC_IMPORT_BRACKET)?;
        let instance_defs = read_typedef_list(&mut c)?;

        // 9.6 instance values, indirect refs, script headers.
        let instance_values_table = DataTable::read(&mut c)?;
        let mut indirect_refs = Vec::with_capacity(class_header.indirect_count as usize);
        for _ in 0..class_header.indirect_count {
            indirect_refs.push(c.read_u16()?);
        }
        let mut raw_script_headers = Vec::with_capacity(class_header.script_count as usize);
        for _ in 0..class_header.script_count {
            raw_script_headers.push(read_script_header(&mut c, compiler_version)?);
        }
        let _ = indirect_refs;

        // Materialise instance variables against the instance-values table.
        let instance_variables = instance_defs
            .into_iter()
            .map(|def| {
                materialize_variable(
                    def,
                    &instance_values_table,
                    main,
                    &external_refs,
                    &user_type_names,
                    unicode,
                    arena,
                )
            })
            .collect::<Result<Vec<_>, Error>>()?;

        // Link scripts: walk method-number-sorted script_headers, find the
        // short_header sharing its method_id, and attach a body only if the
        // resolved body's method_number agrees.
        let mut scripts = Vec::with_capacity(raw_script_headers.len());
        for raw in raw_script_headers {
            let body = short_headers
                .iter()
                .find(|sh| sh.method_id == raw.method_id)
                .and_then(|sh| bodies.get(sh.body_index as usize))
                .filter(|b| b.method_number == raw.method_number);

            let name = global_table.lookup_string(main, raw.name_offset, unicode, arena)?;
            let signature = if DataTable::is_null(raw.signature_offset) {
                None
            } else {
                Some(global_table.lookup_string(main, raw.signature_offset, unicode, arena)?)
            };
            let external_name = if DataTable::is_null(raw.alias_offset) {
                None
            } else {
                Some(global_table.lookup_string(main, raw.alias_offset, unicode, arena)?)
            };
            let library = if DataTable::is_null(raw.library_offset) {
                None
            } else {
                Some(global_table.lookup_string(main, raw.library_offset, unicode, arena)?)
            };
            let return_type = {
                let rt = type_name(raw.return_typeword, &external_refs, &user_type_names, arena);
                if rt.is_empty() { None } else { Some(rt) }
            };
            let throws = read_string_list(&global_table, main, raw.throws_offset, unicode, arena)?;
            let arguments = read_arguments(
                &global_table,
                main,
                raw.arguments_offset,
                &external_refs,
                &user_type_names,
                unicode,
                arena,
            )?;
            let access = if raw.access == 0 { None } else { Some(access_name(raw.access)) };

            let (code, debug_lines, local_variables, resources) = match body {
                Some(b) => {
                    let vars = b
                        .locals
                        .iter()
                        .map(|d| {
                            materialize_variable(
                                RawTypeDef {
                                    flags: d.flags,
                                    dimensions_offset: d.dimensions_offset,
                                    name_offset: d.name_offset,
                                    value: d.value,
                                    value_flags: d.value_flags,
                                    value_type: d.value_type,
                                },
                                &b.resources,
                                None,
                                &external_refs,
                                &user_type_names,
                                unicode,
                                arena,
                            )
                        })
                        .collect::<Result<Vec<_>, Error>>()?;
                    (
                        Some(arena.alloc_slice_copy(&b.code) as &[u8]),
                        b.debug_lines.clone(),
                        vars,
                        Some(b.resources.clone()),
                    )
                }
                None => (None, Vec::new(), Vec::new(), None),
            };

            scripts.push(Script {
                name,
                access,
                signature,
                external_name,
                library,
                return_type,
                event_type: None,
                local_variables,
                arguments,
                throws,
                method_id: raw.method_id,
                method_number: raw.method_number,
                event: raw.flags & SCRIPT_FLAG_EVENT != 0,
                hidden: raw.more_flags & 1 != 0,
                system: raw.flags & SCRIPT_FLAG_SYSTEM != 0,
                rpc: raw.flags & SCRIPT_FLAG_RPC != 0,
                in_ancestor: false,
                code,
                debug_lines,
                resources,
            });
        }

        let ancestor = global_table.lookup_string(main, class_header.ancestor_offset, unicode, arena)?;
        let parent = if DataTable::is_null(class_header.parent_offset) {
            None
        } else {
            Some(global_table.lookup_string(main, class_header.parent_offset, unicode, arena)?)
        };

        types.push(TypeEntry {
            name,
            kind: TypeKind::Class(ClassDefinition {
                ancestor,
                parent,
                autoinstantiate: class_header.flags & CLASS_FLAG_AUTOINSTANTIATE != 0,
                instance_variables,
                scripts,
            }),
        });
    }

    if class_index as u16 != class_count {
        return Err(Error::ClassCountMismatch { expected: class_count, actual: class_index as u16 });
    }
    if !c.is_at_end() {
        return Err(Error::TrailingBytes { remaining: c.remaining() });
    }

    Ok(ClassGroup { compiler_version, global_variables, types })
}
