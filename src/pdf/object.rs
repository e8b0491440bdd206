//! PDF object types and canonical wire serialization

use std::fmt::Write as _;

use crate::pdf::{Dict, StreamDict};

/// Reference to an indirect object by number and generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndirectRef {
    /// Object number
    pub obj_nr: u32,
    /// Generation number
    pub gen_nr: u16,
}

impl IndirectRef {
    /// Create a new indirect reference
    pub fn new(obj_nr: u32, gen_nr: u16) -> Self {
        Self { obj_nr, gen_nr }
    }
}

/// PDF object types
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Null object
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Real value
    Real(f64),
    /// Name object
    Name(String),
    /// Literal (parenthesized) string, raw bytes
    StringLiteral(Vec<u8>),
    /// Hexadecimal string, raw bytes
    HexLiteral(Vec<u8>),
    /// Array object
    Array(Vec<Object>),
    /// Dictionary object
    Dict(Dict),
    /// Stream object
    Stream(StreamDict),
    /// Indirect reference
    IndirectRef(IndirectRef),
}

impl Object {
    /// Create a name object
    pub fn name(n: impl Into<String>) -> Self {
        Object::Name(n.into())
    }

    /// Create a literal string object
    pub fn string_lit(s: impl Into<Vec<u8>>) -> Self {
        Object::StringLiteral(s.into())
    }

    /// Create an indirect reference object
    pub fn indirect(obj_nr: u32, gen_nr: u16) -> Self {
        Object::IndirectRef(IndirectRef::new(obj_nr, gen_nr))
    }

    /// Variant name for diagnostics
    pub fn variant_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::Name(_) => "Name",
            Object::StringLiteral(_) => "StringLiteral",
            Object::HexLiteral(_) => "HexLiteral",
            Object::Array(_) => "Array",
            Object::Dict(_) => "Dict",
            Object::Stream(_) => "Stream",
            Object::IndirectRef(_) => "IndirectRef",
        }
    }

    /// Get integer value
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get name value
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(n) => Some(n),
            _ => None,
        }
    }

    /// Get array value
    pub fn as_array(&self) -> Option<&[Object]> {
        match self {
            Object::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get dictionary value
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Object::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Get indirect reference value
    pub fn as_indirect_ref(&self) -> Option<IndirectRef> {
        match self {
            Object::IndirectRef(r) => Some(*r),
            _ => None,
        }
    }

    /// Canonical PDF serialization of this object.
    ///
    /// The produced bytes re-parse to an equal object. For stream objects
    /// only the dictionary part is rendered; the writer emits the
    /// `stream`/`endstream` envelope and raw payload itself.
    pub fn pdf_string(&self) -> String {
        let mut s = String::new();
        self.write_pdf_string(&mut s);
        s
    }

    pub(crate) fn write_pdf_string(&self, out: &mut String) {
        match self {
            Object::Null => out.push_str("null"),
            Object::Boolean(b) => {
                let _ = write!(out, "{}", b);
            }
            Object::Integer(i) => {
                let _ = write!(out, "{}", i);
            }
            Object::Real(r) => {
                let _ = write!(out, "{}", r);
            }
            Object::Name(n) => write_name(out, n),
            Object::StringLiteral(bytes) => write_string_literal(out, bytes),
            Object::HexLiteral(bytes) => {
                out.push('<');
                for b in bytes {
                    let _ = write!(out, "{:02X}", b);
                }
                out.push('>');
            }
            Object::Array(elems) => {
                out.push('[');
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 && needs_separator(&elems[i - 1], e) {
                        out.push(' ');
                    }
                    e.write_pdf_string(out);
                }
                out.push(']');
            }
            Object::Dict(d) => d.write_pdf_string(out),
            Object::Stream(sd) => sd.dict.write_pdf_string(out),
            Object::IndirectRef(r) => {
                let _ = write!(out, "{} {} R", r.obj_nr, r.gen_nr);
            }
        }
    }
}

// A separator is needed where the previous token does not end in a
// delimiter and the next one does not start with one. Numbers, booleans,
// refs and null neither start nor end delimited; a name's leading slash
// delimits, but a name token absorbs regular characters that follow it.
fn needs_separator(prev: &Object, next: &Object) -> bool {
    let open_end = matches!(
        prev,
        Object::Boolean(_)
            | Object::Integer(_)
            | Object::Real(_)
            | Object::Null
            | Object::IndirectRef(_)
            | Object::Name(_)
    );
    let open_start = matches!(
        next,
        Object::Boolean(_) | Object::Integer(_) | Object::Real(_) | Object::Null | Object::IndirectRef(_)
    );
    open_end && open_start
}

/// Write a name with `#xx` escapes for delimiters, whitespace and `#`.
pub(crate) fn write_name(out: &mut String, name: &str) {
    out.push('/');
    for &b in name.as_bytes() {
        match b {
            b'#' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%' => {
                let _ = write!(out, "#{:02X}", b);
            }
            0x00..=0x20 | 0x7f..=0xff => {
                let _ = write!(out, "#{:02X}", b);
            }
            _ => out.push(b as char),
        }
    }
}

/// Write a literal string, losslessly escaping all byte values.
fn write_string_literal(out: &mut String, bytes: &[u8]) {
    out.push('(');
    for &b in bytes {
        match b {
            b'(' => out.push_str("\\("),
            b')' => out.push_str("\\)"),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{:03o}", b);
            }
        }
    }
    out.push(')');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::Dict;

    #[test]
    fn test_primitive_wire_forms() {
        assert_eq!(Object::Null.pdf_string(), "null");
        assert_eq!(Object::Boolean(true).pdf_string(), "true");
        assert_eq!(Object::Boolean(false).pdf_string(), "false");
        assert_eq!(Object::Integer(-17).pdf_string(), "-17");
        assert_eq!(Object::Real(1.5).pdf_string(), "1.5");
        assert_eq!(Object::indirect(12, 0).pdf_string(), "12 0 R");
    }

    #[test]
    fn test_name_escaping() {
        assert_eq!(Object::name("Type").pdf_string(), "/Type");
        assert_eq!(Object::name("A B").pdf_string(), "/A#20B");
        assert_eq!(Object::name("Name#1").pdf_string(), "/Name#231");
        assert_eq!(Object::name("paired()").pdf_string(), "/paired#28#29");
    }

    #[test]
    fn test_string_literal_escaping() {
        assert_eq!(Object::string_lit("plain").pdf_string(), "(plain)");
        assert_eq!(
            Object::string_lit("a(b)c\\").pdf_string(),
            "(a\\(b\\)c\\\\)"
        );
        // bytes outside the printable range become octal escapes
        assert_eq!(
            Object::StringLiteral(vec![0x00, 0x0a, 0xff]).pdf_string(),
            "(\\000\\012\\377)"
        );
    }

    #[test]
    fn test_hex_literal() {
        assert_eq!(
            Object::HexLiteral(vec![0xde, 0xad, 0x00]).pdf_string(),
            "<DEAD00>"
        );
        assert_eq!(Object::HexLiteral(vec![]).pdf_string(), "<>");
    }

    #[test]
    fn test_array_separators() {
        let arr = Object::Array(vec![
            Object::Integer(1),
            Object::Integer(2),
            Object::name("N"),
            Object::Integer(3),
        ]);
        // numbers need a space between them, names self-delimit
        assert_eq!(arr.pdf_string(), "[1 2/N 3]");

        let refs = Object::Array(vec![Object::indirect(3, 0), Object::indirect(7, 0)]);
        assert_eq!(refs.pdf_string(), "[3 0 R 7 0 R]");
    }

    #[test]
    fn test_dict_wire_form() {
        let mut d = Dict::new();
        d.insert("Type", Object::name("Page"));
        d.insert("Count", Object::Integer(3));
        // BTreeMap ordering: keys alphabetical
        assert_eq!(
            Object::Dict(d).pdf_string(),
            "<</Count 3/Type/Page>>"
        );
    }

    #[test]
    fn test_indirect_ref_equality() {
        assert_eq!(IndirectRef::new(4, 0), IndirectRef::new(4, 0));
        assert_ne!(IndirectRef::new(4, 0), IndirectRef::new(4, 1));
        assert_ne!(IndirectRef::new(4, 0), IndirectRef::new(5, 0));
    }
}
