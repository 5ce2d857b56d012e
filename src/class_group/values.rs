//! Shared value-rendering helpers used by the data-table resource dispatch
//! (SPEC_FULL.md §4.3) and by the class-group decoder's dimension/initial-value/
//! type-name resolution (§4.4.1 - §4.4.3).

use crate::arena::Arena;
use crate::cursor::Cursor;
use crate::data_table::{self, DataTable};

/// The canonical string-quoter (SPEC_FULL.md §4.3). Used everywhere a string
/// constant is rendered: resource tables, p-code string tokens, and initial
/// values, so there is exactly one escaping rule in this crate.
#[must_use]
pub fn quote_escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '~' => out.push_str("~~"),
            '\u{08}' => out.push_str("~b"),
            '\u{0c}' => out.push_str("~f"),
            '\u{0b}' => out.push_str("~v"),
            '\r' => out.push_str("~r"),
            '\n' => out.push_str("~n"),
            '\t' => out.push_str("~t"),
            '"' => out.push_str("~\""),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => out.push_str(&format!("h{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn bcd_digits(magnitude: &[u8]) -> String {
    let mut s = String::with_capacity(magnitude.len() * 2);
    for byte in magnitude {
        s.push(std::char::from_digit(u32::from(byte >> 4), 16).unwrap_or('0'));
        s.push(std::char::from_digit(u32::from(byte & 0xF), 16).unwrap_or('0'));
    }
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() }
}

fn place_decimal_point(digits: &str, exponent: i32, negative: bool) -> String {
    let digit_count = digits.len() as i32;
    let point_pos = digit_count - exponent;
    let mut result = String::new();
    if negative {
        result.push('-');
    }
    if point_pos <= 0 {
        result.push_str("0.");
        result.extend(std::iter::repeat('0').take((-point_pos) as usize));
        result.push_str(digits);
    } else if point_pos as usize >= digits.len() {
        result.push_str(digits);
        result.extend(std::iter::repeat('0').take(point_pos as usize - digits.len()));
    } else {
        result.push_str(&digits[..point_pos as usize]);
        result.push('.');
        result.push_str(&digits[point_pos as usize..]);
    }
    result
}

/// Fixed-point rendering with the decimal point placed at `digits - exponent`
/// (SPEC_FULL.md §4.3). Handles both the post-PB10 16-byte `pb_decimal`
/// layout and the pre-PB10 12-byte `pb_old_decimal` layout.
#[must_use]
pub fn format_decimal(bytes: &[u8]) -> String {
    if bytes.len() >= 16 {
        let magnitude = &bytes[0..14];
        let negative = bytes[14] != 0;
        let exponent = i32::from(bytes[15]);
        place_decimal_point(&bcd_digits(magnitude), exponent, negative)
    } else if bytes.len() >= 12 {
        let negative = bytes[0] != 0;
        let exponent = i32::from(bytes[1]);
        let magnitude = &bytes[2..12];
        place_decimal_point(&bcd_digits(magnitude), exponent, negative)
    } else {
        "0".to_string()
    }
}

/// `pb_datetime` rendering (SPEC_FULL.md §4.3): a sentinel year/month pair
/// selects a bare time-of-day rendering instead of a calendar date.
#[must_use]
pub fn format_datetime(bytes: &[u8]) -> String {
    if bytes.len() < 11 {
        return "0".to_string();
    }
    let millisecond = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let year = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
    let month = bytes[6];
    let day = bytes[7];
    let hour = bytes[8];
    let minute = bytes[9];
    let second = bytes[10];
    if year == 63636 && month == 255 {
        format!("{hour:02}:{minute:02}:{second:02}.{millisecond:06}")
    } else {
        format!("{year:04}-{month:02}-{day:02}")
    }
}

/// `datetime(YYYY-MM-DD, HH:MM:SS.uuuuuu)` form used for initial values
/// (SPEC_FULL.md §4.4.2), as distinct from the bare resource rendering above.
#[must_use]
pub fn format_datetime_literal(bytes: &[u8]) -> String {
    if bytes.len() < 11 {
        return "datetime(0001-01-01, 00:00:00.000000)".to_string();
    }
    let millisecond = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let year = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
    let month = bytes[6];
    let day = bytes[7];
    let hour = bytes[8];
    let minute = bytes[9];
    let second = bytes[10];
    format!("datetime({year:04}-{month:02}-{day:02}, {hour:02}:{minute:02}:{second:02}.{millisecond:06})")
}

/// Sentinel rendering for p-code indirect-argument pseudo-slots
/// (SPEC_FULL.md §4.3, structure_type 16). The discriminant byte selects
/// among the fixed sentinel set; anything else falls back to a generic
/// expression placeholder.
#[must_use]
pub fn format_indirect_arg(bytes: &[u8]) -> String {
    match bytes.first().copied() {
        Some(0) => "*name".to_string(),
        Some(1) => "*args".to_string(),
        Some(2) => "*nargs".to_string(),
        Some(3) => "*value".to_string(),
        Some(4) => "*eoseq".to_string(),
        Some(5) => "*dims".to_string(),
        _ => "*expr".to_string(),
    }
}

/// `name(arg, arg, …)` rendering for indirect-function references
/// (SPEC_FULL.md §4.3, structure_type 17).
pub fn format_indirect_func<'a>(
    table: &DataTable,
    main: Option<&DataTable>,
    bytes: &[u8],
    unicode: bool,
    arena: &'a Arena,
) -> Result<&'a str, data_table::Error> {
    let mut c = Cursor::new(bytes);
    let name_offset = c.read_u32().map_err(data_table::Error::from)?;
    let arg_list_offset = c.read_u32().map_err(data_table::Error::from)?;
    let arg_count = c.read_u16().map_err(data_table::Error::from)?;

    let name = table.string_at(name_offset, unicode, arena);
    let mut parts = Vec::with_capacity(arg_count as usize);
    if let Ok(arg_bytes) = table.raw_bytes_at(arg_list_offset as usize, arg_count as usize * 2) {
        let mut ac = Cursor::new(arg_bytes);
        for _ in 0..arg_count {
            let handle = ac.read_u16().map_err(data_table::Error::from)?;
            parts.push(table.format_resource(main, handle, unicode, arena)?.to_string());
        }
    }
    Ok(arena.alloc_str(&format!("{}({})", name, parts.join(", "))))
}

/// `{elem, elem, …}` rendering for array-literal records (SPEC_FULL.md §4.3,
/// structure_type 19): `count` `pbvalue` entries, each rendered via the
/// generic scalar value formatter.
pub fn format_array_values<'a>(
    table: &DataTable,
    main: Option<&DataTable>,
    bytes: &[u8],
    count: u16,
    unicode: bool,
    arena: &'a Arena,
) -> Result<&'a str, data_table::Error> {
    let mut c = Cursor::new(bytes);
    let mut parts = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let value = c.read_u32().map_err(data_table::Error::from)?;
        let _flags = c.read_u16().map_err(data_table::Error::from)?;
        let ty = c.read_u16().map_err(data_table::Error::from)?;
        parts.push(format_scalar_value(value, ty, table, main, unicode, arena)?.unwrap_or_default());
    }
    Ok(arena.alloc_str(&format!("{{{}}}", parts.join(", "))))
}

/// The generic value formatter referenced from SPEC_FULL.md §4.4.2:
/// type-specific rendering of one `pbvalue`. Returns `None` for the types the
/// spec says are omitted from initial-value lists (`blob`/`any`/`objhandle`
/// and anything unrecognised).
pub fn format_scalar_value<'a>(
    value: u32,
    pbtype: u16,
    table: &DataTable,
    main: Option<&DataTable>,
    unicode: bool,
    arena: &'a Arena,
) -> Result<Option<&'a str>, data_table::Error> {
    use crate::schema::PbType;
    let Ok(ty) = PbType::try_from(pbtype) else {
        return Ok(None);
    };
    let rendered = match ty {
        PbType::Int | PbType::Uint => format!("{}", value as i32),
        PbType::Long | PbType::Ulong => format!("{}", value as i32),
        PbType::String => {
            let s = table.string_at(value, unicode, arena);
            return Ok(Some(arena.alloc_str(&quote_escape_string(s))));
        }
        PbType::Boolean => (if value != 0 { "true" } else { "false" }).to_string(),
        PbType::Datetime => {
            let bytes = table.raw_bytes_at(value as usize, 11)?;
            format_datetime_literal(bytes)
        }
        PbType::Blob | PbType::Any | PbType::Objhandle => return Ok(None),
        _ => return Ok(None),
    };
    let _ = main;
    Ok(Some(arena.alloc_str(&rendered)))
}

/// Raw dimensions header `{count14, (lower, upper)[count]}` rendering
/// (SPEC_FULL.md §4.4.1).
pub fn format_dimensions(pairs: &[(i32, i32)]) -> String {
    if pairs.is_empty() || pairs[0] == (0, 0) {
        return "[]".to_string();
    }
    let mut parts = Vec::new();
    for &(lower, upper) in pairs {
        if (lower, upper) == (0, 0) {
            break;
        }
        debug_assert!(lower <= upper, "dimension lower bound must not exceed upper bound");
        if lower == 1 {
            parts.push(format!("{upper}"));
        } else {
            parts.push(format!("{lower} to {upper}"));
        }
    }
    format!("[ {} ]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_escapes_per_s6() {
        let input = "Hello~World\r\n\t\u{01}";
        assert_eq!(quote_escape_string(input), "\"Hello~~World~r~n~th01\"");
    }

    #[test]
    fn decimal_places_point() {
        // magnitude bytes 01 23 45 -> BCD digits "012345", trimmed to "12345";
        // exponent 2 places the point after the third digit -> "123.45"
        let mut b = vec![0u8; 16];
        b[11] = 0x45;
        b[12] = 0x23;
        b[13] = 0x01;
        b[14] = 0; // positive
        b[15] = 2; // exponent
        assert_eq!(format_decimal(&b), "123.45");
    }

    #[test]
    fn dimensions_auto_bound() {
        assert_eq!(format_dimensions(&[]), "[]");
        assert_eq!(format_dimensions(&[(0, 0)]), "[]");
    }

    #[test]
    fn dimensions_single_and_ranged() {
        assert_eq!(format_dimensions(&[(1, 10)]), "[ 10 ]");
        assert_eq!(format_dimensions(&[(2, 10)]), "[ 2 to 10 ]");
        assert_eq!(format_dimensions(&[(1, 5), (1, 5), (0, 0)]), "[ 5, 5 ]");
    }
}
