//! Column typing and text-protocol value conversion.

use smartdb_core::Value;

/// MySQL column type codes (MYSQL_TYPE_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    VarChar = 0x0F,
    Bit = 0x10,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl FieldType {
    /// Decode a wire byte; unknown codes read as VarString (text).
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFE => FieldType::String,
            0xFF => FieldType::Geometry,
            _ => FieldType::VarString,
        }
    }
}

/// Collation byte marking binary (non-text) string data.
pub const BINARY_CHARSET: u16 = 63;

/// One column of a result set, parsed from a column definition packet.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub field_type: FieldType,
    pub charset: u16,
    pub flags: u16,
}

impl ColumnDef {
    /// Whether string-family data in this column is binary rather than text.
    pub fn is_binary(&self) -> bool {
        self.charset == BINARY_CHARSET
    }
}

/// Decode one text-protocol cell into a value.
///
/// The text protocol sends every non-NULL cell as a string; numeric columns
/// are parsed by declared width. Values that fail to parse surface as text
/// rather than an error.
pub fn decode_text_value(column: &ColumnDef, data: &[u8]) -> Value {
    let text = String::from_utf8_lossy(data);

    match column.field_type {
        FieldType::Tiny | FieldType::Short | FieldType::Long | FieldType::Int24
        | FieldType::Year => text
            .parse::<i32>()
            .map_or_else(|_| Value::Text(text.into_owned()), Value::Int),

        FieldType::LongLong => text
            .parse::<i64>()
            .map_or_else(|_| Value::Text(text.into_owned()), Value::BigInt),

        FieldType::Float | FieldType::Double | FieldType::Decimal | FieldType::NewDecimal => {
            text.parse::<f64>()
                .map_or_else(|_| Value::Text(text.into_owned()), Value::Double)
        }

        FieldType::Bit => {
            if data.len() == 1 {
                Value::Bool(data[0] != 0)
            } else {
                Value::Bool(text == "1")
            }
        }

        FieldType::TinyBlob
        | FieldType::MediumBlob
        | FieldType::LongBlob
        | FieldType::Blob
        | FieldType::Geometry => {
            if column.is_binary() {
                Value::Bytes(data.to_vec())
            } else {
                Value::Text(text.into_owned())
            }
        }

        FieldType::VarChar | FieldType::VarString | FieldType::String if column.is_binary() => {
            Value::Bytes(data.to_vec())
        }

        FieldType::Null => Value::Null,

        _ => Value::Text(text.into_owned()),
    }
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

fn escape_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2 + 3);
    out.push_str("X'");
    for byte in data {
        out.push_str(&format!("{:02X}", byte));
    }
    out.push('\'');
    out
}

/// Render a value as an escaped SQL literal for the text protocol.
pub fn format_value_for_sql(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Int(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::Double(v) => {
            if v.is_finite() {
                v.to_string()
            } else {
                "NULL".to_string()
            }
        }
        Value::Bool(v) => if *v { "1" } else { "0" }.to_string(),
        Value::Text(s) => escape_string(s),
        Value::Bytes(b) => escape_bytes(b),
    }
}

/// Count `?` placeholders outside string literals, quoted identifiers and
/// backtick identifiers. This is the placeholder count the text protocol
/// "reports" for a statement.
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '?' => count += 1,
            '\'' | '"' | '`' => skip_quoted(&mut chars, ch),
            _ => {}
        }
    }
    count
}

/// Substitute `?` placeholders with escaped literals, leaving quoted
/// sections untouched. Callers must have validated the parameter count.
pub fn interpolate_params(sql: &str, params: &[Value]) -> String {
    if params.is_empty() {
        return sql.to_string();
    }

    let mut out = String::with_capacity(sql.len() + params.len() * 16);
    let mut chars = sql.chars().peekable();
    let mut index = 0;

    while let Some(ch) = chars.next() {
        match ch {
            '?' => {
                if index < params.len() {
                    out.push_str(&format_value_for_sql(&params[index]));
                    index += 1;
                } else {
                    out.push('?');
                }
            }
            '\'' | '"' | '`' => {
                out.push(ch);
                copy_quoted(&mut chars, ch, &mut out);
            }
            _ => out.push(ch),
        }
    }
    out
}

fn skip_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, quote: char) {
    while let Some(ch) = chars.next() {
        if ch == quote {
            // A doubled quote stays inside the literal.
            if chars.peek() == Some(&quote) {
                chars.next();
            } else {
                break;
            }
        }
    }
}

fn copy_quoted(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    quote: char,
    out: &mut String,
) {
    while let Some(ch) = chars.next() {
        out.push(ch);
        if ch == quote {
            if chars.peek() == Some(&quote) {
                out.push(quote);
                chars.next();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(field_type: FieldType, charset: u16) -> ColumnDef {
        ColumnDef {
            name: "c".to_string(),
            field_type,
            charset,
            flags: 0,
        }
    }

    #[test]
    fn test_decode_integers() {
        assert_eq!(
            decode_text_value(&column(FieldType::Long, 45), b"-7"),
            Value::Int(-7)
        );
        assert_eq!(
            decode_text_value(&column(FieldType::Tiny, 45), b"1"),
            Value::Int(1)
        );
        assert_eq!(
            decode_text_value(&column(FieldType::LongLong, 45), b"9223372036854775807"),
            Value::BigInt(i64::MAX)
        );
    }

    #[test]
    fn test_decode_floats_and_decimals() {
        assert_eq!(
            decode_text_value(&column(FieldType::Double, 45), b"2.5"),
            Value::Double(2.5)
        );
        assert_eq!(
            decode_text_value(&column(FieldType::NewDecimal, 45), b"10.25"),
            Value::Double(10.25)
        );
    }

    #[test]
    fn test_decode_bit() {
        assert_eq!(
            decode_text_value(&column(FieldType::Bit, 63), &[1]),
            Value::Bool(true)
        );
        assert_eq!(
            decode_text_value(&column(FieldType::Bit, 63), &[0]),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_decode_blob_respects_charset() {
        assert_eq!(
            decode_text_value(&column(FieldType::Blob, BINARY_CHARSET), &[1, 2, 3]),
            Value::Bytes(vec![1, 2, 3])
        );
        // A TEXT column reports a blob type with a text collation.
        assert_eq!(
            decode_text_value(&column(FieldType::Blob, 45), b"hello"),
            Value::Text("hello".to_string())
        );
    }

    #[test]
    fn test_decode_unparseable_number_falls_back_to_text() {
        assert_eq!(
            decode_text_value(&column(FieldType::Long, 45), b"garbage"),
            Value::Text("garbage".to_string())
        );
    }

    #[test]
    fn test_format_literals() {
        assert_eq!(format_value_for_sql(&Value::Null), "NULL");
        assert_eq!(format_value_for_sql(&Value::Int(-3)), "-3");
        assert_eq!(format_value_for_sql(&Value::Bool(true)), "1");
        assert_eq!(format_value_for_sql(&Value::Bool(false)), "0");
        assert_eq!(
            format_value_for_sql(&Value::Text("o'neil".into())),
            "'o''neil'"
        );
        assert_eq!(
            format_value_for_sql(&Value::Bytes(vec![0xAB, 0x01])),
            "X'AB01'"
        );
        assert_eq!(format_value_for_sql(&Value::Double(f64::NAN)), "NULL");
    }

    #[test]
    fn test_escape_control_characters() {
        assert_eq!(
            format_value_for_sql(&Value::Text("a\nb\\c".into())),
            "'a\\nb\\\\c'"
        );
    }

    #[test]
    fn test_count_placeholders() {
        assert_eq!(count_placeholders("SELECT 1"), 0);
        assert_eq!(count_placeholders("INSERT INTO t VALUES (?, ?, ?)"), 3);
        assert_eq!(count_placeholders("SELECT '?' FROM t WHERE a = ?"), 1);
        assert_eq!(count_placeholders("SELECT \"?\" , `q?` , ?"), 1);
        assert_eq!(count_placeholders("SELECT 'it''s ?' , ?"), 1);
    }

    #[test]
    fn test_interpolate_params() {
        let sql = interpolate_params(
            "INSERT INTO t VALUES (?, ?, ?)",
            &[Value::Int(1), Value::Text("x".into()), Value::Null],
        );
        assert_eq!(sql, "INSERT INTO t VALUES (1, 'x', NULL)");
    }

    #[test]
    fn test_interpolate_skips_literals() {
        let sql = interpolate_params(
            "SELECT '?' FROM t WHERE a = ?",
            &[Value::Int(9)],
        );
        assert_eq!(sql, "SELECT '?' FROM t WHERE a = 9");
    }

    #[test]
    fn test_field_type_round_trip() {
        for byte in [0x01u8, 0x03, 0x08, 0x10, 0xF6, 0xFC, 0xFE] {
            assert_eq!(FieldType::from_u8(byte) as u8, byte);
        }
        assert_eq!(FieldType::from_u8(0x42), FieldType::VarString);
    }
}
