//! Data-table decoder (SPEC_FULL.md §4.3): the repeated `(payload, metadata)`
//! layout used for the class-group's main table and every per-script
//! resource table. Resolves typed handles to string/numeric/struct literals.

use std::{error, fmt};

use crate::arena::Arena;
use crate::cursor::Cursor;
use crate::schema::StructureType;

pub const NULL_HANDLE: u16 = 0xFFFF;
const MAIN_TABLE_FLAG: u16 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Truncated { offset: usize, needed: usize, available: usize },
    MissingMainTable { offset: u16 },
    OutOfRange { offset: u16, data_length: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { offset, needed, available } => {
                write!(f, "data table truncated at {offset:#x}: needed {needed}, available {available}")
            }
            Self::MissingMainTable { offset } => {
                write!(f, "handle {offset:#x} sets the main-table bit but no main table is available")
            }
            Self::OutOfRange { offset, data_length } => {
                write!(f, "handle {offset:#x} resolves past data_length {data_length}")
            }
        }
    }
}

impl error::Error for Error {}

impl From<crate::cursor::Error> for Error {
    fn from(e: crate::cursor::Error) -> Self {
        match e {
            crate::cursor::Error::BufferOverflow { offset, needed, available } => {
                Error::Truncated { offset, needed, available }
            }
            crate::cursor::Error::BadMagic { offset, .. } => Error::Truncated { offset, needed: 3, available: 0 },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TableInfo {
    pub offset: u16,
    pub structure_type: u16,
    pub count: u16,
}

/// A raw-bytes region plus its typed record descriptors (SPEC_FULL.md
/// GLOSSARY "Data table"). Immutable once read.
#[derive(Debug, Clone)]
pub struct DataTable {
    data: Vec<u8>,
    infos: Vec<TableInfo>,
}

impl DataTable {
    pub fn read(c: &mut Cursor<'_>) -> Result<Self, Error> {
        let data_length = c.read_u32()? as usize;
        let metadata_length = c.read_u32()? as usize;
        let data = c.read_bytes(data_length)?.to_vec();
        let metadata_bytes = c.read_bytes(metadata_length)?;
        let mut mc = Cursor::new(metadata_bytes);
        let entry_count = metadata_length / 6;
        let mut infos = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            let offset = mc.read_u16()?;
            let structure_type = mc.read_u16()?;
            let count = mc.read_u16()?;
            infos.push(TableInfo { offset, structure_type, count });
        }
        Ok(Self { data, infos })
    }

    #[must_use]
    pub fn data_length(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_null(offset: u16) -> bool {
        offset == NULL_HANDLE
    }

    /// Resolve `offset`, honouring the main-table redirect bit. Returns the
    /// backing table and the byte offset to use within it.
    fn resolve<'s>(&'s self, main: Option<&'s DataTable>, offset: u16) -> Result<(&'s DataTable, usize), Error> {
        if offset & MAIN_TABLE_FLAG != 0 {
            let table = main.ok_or(Error::MissingMainTable { offset })?;
            Ok((table, (offset & !MAIN_TABLE_FLAG) as usize))
        } else {
            Ok((self, offset as usize))
        }
    }

    pub fn lookup_pointer<'s>(&'s self, main: Option<&'s DataTable>, offset: u16) -> Result<&'s [u8], Error> {
        let (table, off) = self.resolve(main, offset)?;
        table.data.get(off..).ok_or(Error::OutOfRange { offset, data_length: table.data.len() })
    }

    /// Raw byte slice at an absolute offset within this table's data blob,
    /// with no main-table redirection and no `0xFFFF`-null convention. Used
    /// for the wider `u32` name/arg-list offsets embedded directly inside
    /// wire structs (distinct from the `u16` resource handles above).
    pub fn raw_bytes_at(&self, offset: usize, len: usize) -> Result<&[u8], Error> {
        self.data
            .get(offset..offset + len)
            .ok_or(Error::OutOfRange { offset: offset as u16, data_length: self.data.len() })
    }

    /// String at an absolute `u32` byte offset into this table's data blob
    /// (the `name_offset` convention used by `pbprop_ref`/`pbmethod_ref`/etc,
    /// as opposed to the `u16`-handle resource records above).
    pub fn string_at<'a>(&self, offset: u32, unicode: bool, arena: &'a Arena) -> &'a str {
        if offset == 0 {
            return "";
        }
        let Some(bytes) = self.data.get(offset as usize..) else {
            return arena.alloc_str("");
        };
        if unicode {
            let mut c = Cursor::new(bytes);
            let Ok(len) = c.read_u16() else { return "" };
            let Ok(wide) = c.read_bytes(len as usize * 2) else { return "" };
            arena.alloc_utf16le(wide)
        } else {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            arena.alloc_str(std::str::from_utf8(&bytes[..end]).unwrap_or_default())
        }
    }

    pub fn lookup_info(&self, main: Option<&DataTable>, offset: u16) -> Result<Option<TableInfo>, Error> {
        let (table, off) = self.resolve(main, offset)?;
        Ok(table.infos.iter().find(|i| i.offset as usize == off).copied())
    }

    pub fn lookup_string<'a>(
        &self,
        main: Option<&DataTable>,
        offset: u16,
        unicode: bool,
        arena: &'a Arena,
    ) -> Result<&'a str, Error> {
        if Self::is_null(offset) {
            return Ok("");
        }
        let bytes = self.lookup_pointer(main, offset)?;
        if unicode {
            let mut c = Cursor::new(bytes);
            let len = c.read_u16().map_err(Error::from)? as usize;
            let wide = c.read_bytes(len * 2).map_err(Error::from)?;
            Ok(arena.alloc_utf16le(wide))
        } else {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            Ok(arena.alloc_str(std::str::from_utf8(&bytes[..end]).unwrap_or_default()))
        }
    }

    /// Canonical source-text rendering of a typed resource record
    /// (SPEC_FULL.md §4.3 dispatch table).
    pub fn format_resource<'a>(
        &self,
        main: Option<&DataTable>,
        offset: u16,
        unicode_strings: bool,
        arena: &'a Arena,
    ) -> Result<&'a str, Error> {
        if Self::is_null(offset) {
            return Ok("");
        }
        let info = self.lookup_info(main, offset)?;
        let raw = self.lookup_pointer(main, offset)?;
        let structure_type = info.map(|i| i.structure_type);
        let known_type = structure_type.and_then(|t| StructureType::try_from(t).ok());
        // Bound the slice to its record size where one is fixed, instead of
        // handing every per-type reader the rest of the table's data blob.
        let bytes = match known_type.and_then(StructureType::fixed_record_size) {
            Some(size) => &raw[..size.min(raw.len())],
            None => raw,
        };

        let rendered = match known_type {
            Some(StructureType::Int) => {
                let mut c = Cursor::new(bytes);
                let value = c.read_u32().map_err(Error::from)? as i32;
                format!("{value}")
            }
            Some(StructureType::Double) => {
                let mut c = Cursor::new(bytes);
                let raw = c.read_bytes(8).map_err(Error::from)?;
                let value = f64::from_le_bytes(raw.try_into().unwrap());
                format!("{value:.6}")
            }
            Some(StructureType::LongLong) => {
                let mut c = Cursor::new(bytes);
                let value = c.read_i64().map_err(Error::from)?;
                format!("{value}")
            }
            Some(StructureType::Decimal) => crate::class_group::values::format_decimal(bytes),
            Some(StructureType::Datetime) => crate::class_group::values::format_datetime(bytes),
            Some(StructureType::PropertyRef) => {
                let name = self.lookup_string(main, offset, unicode_strings, arena)?;
                if name.is_empty() { crate::arena_format!(arena, "prop_{offset}") } else { name }
            }
            Some(StructureType::MethodRef) => {
                let name = self.lookup_string(main, offset, unicode_strings, arena)?;
                if name.is_empty() { crate::arena_format!(arena, "method_{offset}") } else { name }
            }
            Some(StructureType::CreateRef) => {
                let name = self.lookup_string(main, offset, unicode_strings, arena)?;
                if name.is_empty() { crate::arena_format!(arena, "type_{offset}") } else { name }
            }
            Some(StructureType::IndirectArg) => crate::class_group::values::format_indirect_arg(bytes),
            Some(StructureType::IndirectFunc) => {
                crate::class_group::values::format_indirect_func(self, main, bytes, unicode_strings, arena)?
            }
            Some(StructureType::ArrayValues) => {
                let count = info.map(|i| i.count).unwrap_or(0);
                crate::class_group::values::format_array_values(self, main, bytes, count, unicode_strings, arena)?
            }
            None => {
                let hex_type = structure_type.unwrap_or(0);
                format!("<{hex_type:#x}_{offset:#x}>")
            }
        };
        Ok(arena.alloc_str(&rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_table(records: &[(u16, u16, u16, Vec<u8>)]) -> Vec<u8> {
        let mut data = Vec::new();
        let mut metadata = Vec::new();
        for (offset, structure_type, count, bytes) in records {
            assert_eq!(data.len(), *offset as usize, "test fixture must lay records out contiguously");
            data.extend_from_slice(bytes);
            metadata.extend_from_slice(&offset.to_le_bytes());
            metadata.extend_from_slice(&structure_type.to_le_bytes());
            metadata.extend_from_slice(&count.to_le_bytes());
        }
        let mut out = Vec::new();
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(metadata.len() as u32).to_le_bytes());
        out.extend_from_slice(&data);
        out.extend_from_slice(&metadata);
        out
    }

    #[test]
    fn reads_int_record() {
        let bytes = build_table(&[(0, 1, 1, 42i32.to_le_bytes().to_vec())]);
        let mut c = Cursor::new(&bytes);
        let table = DataTable::read(&mut c).unwrap();
        let arena = Arena::new();
        assert_eq!(table.format_resource(None, 0, false, &arena).unwrap(), "42");
    }

    #[test]
    fn reads_double_record_with_six_decimals() {
        let bytes = build_table(&[(0, 4, 1, 3.14f64.to_le_bytes().to_vec())]);
        let mut c = Cursor::new(&bytes);
        let table = DataTable::read(&mut c).unwrap();
        let arena = Arena::new();
        assert_eq!(table.format_resource(None, 0, false, &arena).unwrap(), "3.140000");
    }

    #[test]
    fn null_handle_is_empty() {
        let bytes = build_table(&[]);
        let mut c = Cursor::new(&bytes);
        let table = DataTable::read(&mut c).unwrap();
        let arena = Arena::new();
        assert_eq!(table.format_resource(None, NULL_HANDLE, false, &arena).unwrap(), "");
    }

    #[test]
    fn main_table_redirect() {
        let main_bytes = build_table(&[(0, 1, 1, 7i32.to_le_bytes().to_vec())]);
        let mut mc = Cursor::new(&main_bytes);
        let main = DataTable::read(&mut mc).unwrap();

        let local_bytes = build_table(&[]);
        let mut lc = Cursor::new(&local_bytes);
        let local = DataTable::read(&mut lc).unwrap();

        let arena = Arena::new();
        let handle = 0u16 | MAIN_TABLE_FLAG;
        assert_eq!(local.format_resource(Some(&main), handle, false, &arena).unwrap(), "7");
    }
}
