use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Compiler version stamps found in `pbfile_header.compiler_version`
/// (SPEC_FULL.md §4.4/§6.2). Selects which opcode catalogue tier and which
/// version-dependent struct layouts (script header size, decimal width) to
/// use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
#[non_exhaustive]
pub enum PbVersion {
    Pb3 = 17,
    Pb4 = 21,
    Pb5 = 79,
    Pb6 = 114,
    Pb7 = 146,
    Pb8 = 166,
    Pb9 = 193,
    Pb10 = 238,
    Pb10_5 = 283,
    Pb11 = 316,
    Pb11_5 = 321,
    Pb12 = 325,
    Pb12_5 = 333,
    /// PocketBuilder
    Pk2 = 175,
    /// PocketBuilder
    Pk2_5 = 188,
}

impl PbVersion {
    /// Compiler versions from this point on pack strings as length-prefixed
    /// UTF-16 rather than null-terminated ASCII (SPEC_FULL.md §3).
    #[must_use]
    pub fn unicode_strings(raw: u16) -> bool {
        raw >= Self::Pb10 as u16
    }

    /// Script headers pack a `signature_offset` starting here (SPEC_FULL.md
    /// §3, `pbscript_header`).
    #[must_use]
    pub fn has_signature_offset(raw: u16) -> bool {
        raw >= Self::Pb6 as u16
    }

    #[must_use]
    pub fn has_throws_offset(raw: u16) -> bool {
        raw >= Self::Pb8 as u16
    }
}

/// Scalar value types (SPEC_FULL.md §3 `pbvalue.type`, §4.4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum PbType {
    NoType = 0,
    Int = 1,
    Long = 2,
    Real = 3,
    Double = 4,
    Dec = 5,
    String = 6,
    Boolean = 7,
    Any = 8,
    Uint = 9,
    Ulong = 10,
    Blob = 11,
    Date = 12,
    Time = 13,
    Datetime = 14,
    /// undocumented
    Cursor = 15,
    /// undocumented
    Procedure = 16,
    /// undocumented and unknown
    Placeholder = 17,
    Char = 18,
    /// undocumented
    Objhandle = 19,
    Longlong = 20,
    Byte = 21,
}

impl PbType {
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Self::NoType => "",
            Self::Int => "int",
            Self::Long => "long",
            Self::Real => "real",
            Self::Double => "double",
            Self::Dec => "dec",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Any => "any",
            Self::Uint => "uint",
            Self::Ulong => "ulong",
            Self::Blob => "blob",
            Self::Date => "date",
            Self::Time => "time",
            Self::Datetime => "datetime",
            Self::Cursor => "cursor",
            Self::Procedure => "procedure",
            Self::Placeholder => "placeholder",
            Self::Char => "char",
            Self::Objhandle => "objhandle",
            Self::Longlong => "longlong",
            Self::Byte => "byte",
        }
    }
}

/// Structure types tagging records inside a data table (SPEC_FULL.md §3/§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
#[non_exhaustive]
pub enum StructureType {
    Int = 1,
    Double = 4,
    Decimal = 5,
    Datetime = 6,
    PropertyRef = 12,
    MethodRef = 13,
    IndirectArg = 16,
    IndirectFunc = 17,
    CreateRef = 18,
    ArrayValues = 19,
    LongLong = 23,
}

impl StructureType {
    /// Fixed per-record byte size, where one exists (SPEC_FULL.md §4.3: "each
    /// has a fixed record size except string records"). Array/indirect-func
    /// records are variable-length and handled by their own readers instead.
    #[must_use]
    pub fn fixed_record_size(self) -> Option<usize> {
        match self {
            Self::Int => Some(8),
            Self::Double => Some(8),
            Self::Decimal => Some(16),
            Self::Datetime => Some(12),
            Self::PropertyRef => Some(8),
            Self::MethodRef => Some(8),
            Self::CreateRef => Some(8),
            Self::LongLong => Some(8),
            Self::IndirectArg | Self::IndirectFunc | Self::ArrayValues => None,
        }
    }
}
