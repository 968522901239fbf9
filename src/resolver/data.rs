//! Self-describing data schemas.
//!
//! This is the slice of the data layer the engine consumes: WGSL type names,
//! struct fields in declaration order, array element/length, and the
//! host-shareable byte layout.

use std::{fmt, rc::Rc};

use anyhow::{Result, bail};

use super::item::ItemId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scalar {
    Bool,
    F16,
    F32,
    I32,
    U32,
}

impl Scalar {
    pub fn wgsl(self) -> &'static str {
        match self {
            Scalar::Bool => "bool",
            Scalar::F16 => "f16",
            Scalar::F32 => "f32",
            Scalar::I32 => "i32",
            Scalar::U32 => "u32",
        }
    }

    fn short_suffix(self) -> Option<char> {
        match self {
            Scalar::Bool => None,
            Scalar::F16 => Some('h'),
            Scalar::F32 => Some('f'),
            Scalar::I32 => Some('i'),
            Scalar::U32 => Some('u'),
        }
    }

    fn size(self) -> u32 {
        match self {
            Scalar::F16 => 2,
            _ => 4,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Scalar::I32 | Scalar::U32)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Scalar::F16 | Scalar::F32)
    }
}

/// A struct schema. Identity is the schema object, not its shape: two structs
/// with the same fields are still declared separately.
#[derive(Clone)]
pub struct StructSchema(Rc<StructDef>);

struct StructDef {
    id: ItemId,
    label: Option<String>,
    fields: Vec<(String, DataSchema)>,
}

impl StructSchema {
    pub fn new(label: Option<&str>, fields: Vec<(String, DataSchema)>) -> Self {
        Self(Rc::new(StructDef {
            id: ItemId::next(),
            label: label.map(str::to_string),
            fields,
        }))
    }

    pub fn id(&self) -> ItemId {
        self.0.id
    }

    pub fn label(&self) -> Option<&str> {
        self.0.label.as_deref()
    }

    pub fn fields(&self) -> &[(String, DataSchema)] {
        &self.0.fields
    }

    pub fn field(&self, name: &str) -> Option<&DataSchema> {
        self.0
            .fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }

    pub fn ptr_eq(&self, other: &StructSchema) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Byte offsets of every field, in declaration order.
    pub fn field_offsets(&self) -> Vec<u32> {
        let mut offset = 0u32;
        self.0
            .fields
            .iter()
            .map(|(_, schema)| {
                let at = round_up(schema.align_of(), offset);
                offset = at + schema.size_of();
                at
            })
            .collect()
    }
}

impl fmt::Display for StructSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "struct:{}", self.label().unwrap_or("<unnamed>"))
    }
}

impl fmt::Debug for StructSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Clone, Debug)]
pub enum DataSchema {
    Scalar(Scalar),
    Vector { scalar: Scalar, len: u8 },
    Matrix { scalar: Scalar, cols: u8, rows: u8 },
    /// `len == 0` is a runtime-sized array.
    Array { elem: Box<DataSchema>, len: usize },
    Atomic(Scalar),
    Struct(StructSchema),
}

impl DataSchema {
    pub fn f32() -> Self {
        DataSchema::Scalar(Scalar::F32)
    }

    pub fn i32() -> Self {
        DataSchema::Scalar(Scalar::I32)
    }

    pub fn u32() -> Self {
        DataSchema::Scalar(Scalar::U32)
    }

    pub fn bool() -> Self {
        DataSchema::Scalar(Scalar::Bool)
    }

    pub fn vec(scalar: Scalar, len: u8) -> Self {
        DataSchema::Vector { scalar, len }
    }

    pub fn vec2f() -> Self {
        Self::vec(Scalar::F32, 2)
    }

    pub fn vec3f() -> Self {
        Self::vec(Scalar::F32, 3)
    }

    pub fn vec4f() -> Self {
        Self::vec(Scalar::F32, 4)
    }

    pub fn mat(cols: u8, rows: u8) -> Self {
        DataSchema::Matrix {
            scalar: Scalar::F32,
            cols,
            rows,
        }
    }

    pub fn array(elem: DataSchema, len: usize) -> Self {
        DataSchema::Array {
            elem: Box::new(elem),
            len,
        }
    }

    /// Parses a non-struct WGSL type name (`f32`, `vec3f`, `vec3<u32>`,
    /// `mat4x4f`, `array<f32, 4>`, `atomic<u32>`). Struct names are looked
    /// up through `lookup_struct`.
    pub fn parse(name: &str, lookup_struct: &dyn Fn(&str) -> Option<StructSchema>) -> Result<Self> {
        let name = name.trim();
        if let Some(inner) = strip_generic(name, "array") {
            let (elem, len) = match split_top_level_comma(inner) {
                Some((elem, len)) => {
                    let len: usize = len
                        .trim()
                        .parse()
                        .map_err(|_| anyhow::anyhow!("invalid array length in `{name}`"))?;
                    if len == 0 {
                        bail!("array length must be positive in `{name}`");
                    }
                    (elem, len)
                }
                None => (inner, 0),
            };
            return Ok(Self::array(Self::parse(elem, lookup_struct)?, len));
        }
        if let Some(inner) = strip_generic(name, "atomic") {
            return match Self::parse(inner, lookup_struct)? {
                DataSchema::Scalar(s) if s.is_integer() => Ok(DataSchema::Atomic(s)),
                _ => bail!("atomic requires i32 or u32, got `{inner}`"),
            };
        }
        for len in 2..=4u8 {
            if let Some(inner) = strip_generic(name, &format!("vec{len}")) {
                return match Self::parse(inner, lookup_struct)? {
                    DataSchema::Scalar(scalar) => Ok(Self::vec(scalar, len)),
                    _ => bail!("vector component must be a scalar in `{name}`"),
                };
            }
        }
        if let Some(scalar) = parse_scalar(name) {
            return Ok(DataSchema::Scalar(scalar));
        }
        if let Some(schema) = parse_short_vec_or_mat(name) {
            return Ok(schema);
        }
        lookup_struct(name)
            .map(DataSchema::Struct)
            .ok_or_else(|| anyhow::anyhow!("unknown type `{name}`"))
    }

    /// The WGSL spelling of every non-struct schema. Structs need a resolution
    /// context to get their declared name, so they return `None`.
    pub fn builtin_wgsl(&self) -> Option<String> {
        Some(match self {
            DataSchema::Scalar(s) => s.wgsl().to_string(),
            DataSchema::Vector { scalar, len } => match scalar.short_suffix() {
                Some(c) => format!("vec{len}{c}"),
                None => format!("vec{len}<{}>", scalar.wgsl()),
            },
            DataSchema::Matrix { scalar, cols, rows } => match scalar.short_suffix() {
                Some(c) => format!("mat{cols}x{rows}{c}"),
                None => format!("mat{cols}x{rows}<{}>", scalar.wgsl()),
            },
            DataSchema::Atomic(s) => format!("atomic<{}>", s.wgsl()),
            DataSchema::Array { elem, len } => {
                let elem = elem.builtin_wgsl()?;
                if *len == 0 {
                    format!("array<{elem}>")
                } else {
                    format!("array<{elem}, {len}>")
                }
            }
            DataSchema::Struct(_) => return None,
        })
    }

    pub fn align_of(&self) -> u32 {
        match self {
            DataSchema::Scalar(s) | DataSchema::Atomic(s) => s.size(),
            DataSchema::Vector { scalar, len } => vec_align(*scalar, *len),
            DataSchema::Matrix { scalar, rows, .. } => vec_align(*scalar, *rows),
            DataSchema::Array { elem, .. } => elem.align_of(),
            DataSchema::Struct(s) => s.fields().iter().map(|(_, f)| f.align_of()).max().unwrap_or(1),
        }
    }

    /// Byte size following the WGSL host-shareable layout rules. Runtime-sized
    /// arrays report the size of a single element stride.
    pub fn size_of(&self) -> u32 {
        match self {
            DataSchema::Scalar(s) | DataSchema::Atomic(s) => s.size(),
            DataSchema::Vector { scalar, len } => scalar.size() * *len as u32,
            DataSchema::Matrix { scalar, cols, rows } => {
                let col = DataSchema::vec(*scalar, *rows);
                *cols as u32 * round_up(col.align_of(), col.size_of())
            }
            DataSchema::Array { elem, len } => {
                let stride = round_up(elem.align_of(), elem.size_of());
                stride * (*len).max(1) as u32
            }
            DataSchema::Struct(s) => {
                let offsets = s.field_offsets();
                let end = match (offsets.last(), s.fields().last()) {
                    (Some(offset), Some((_, last))) => offset + last.size_of(),
                    _ => 0,
                };
                round_up(self.align_of(), end)
            }
        }
    }

    pub fn same(&self, other: &DataSchema) -> bool {
        match (self, other) {
            (DataSchema::Struct(a), DataSchema::Struct(b)) => a.ptr_eq(b),
            (DataSchema::Array { elem: a, len: la }, DataSchema::Array { elem: b, len: lb }) => {
                la == lb && a.same(b)
            }
            (DataSchema::Struct(_), _) | (_, DataSchema::Struct(_)) => false,
            (a, b) => a.builtin_wgsl() == b.builtin_wgsl(),
        }
    }
}

impl fmt::Display for DataSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSchema::Struct(s) => write!(f, "{}", s.label().unwrap_or("<unnamed struct>")),
            DataSchema::Array { elem, len: 0 } => write!(f, "array<{elem}>"),
            DataSchema::Array { elem, len } => write!(f, "array<{elem}, {len}>"),
            other => write!(f, "{}", other.builtin_wgsl().unwrap_or_default()),
        }
    }
}

fn vec_align(scalar: Scalar, len: u8) -> u32 {
    let n = if len == 2 { 2 } else { 4 };
    scalar.size() * n
}

fn round_up(align: u32, value: u32) -> u32 {
    if align == 0 {
        return value;
    }
    value.div_ceil(align) * align
}

fn parse_scalar(name: &str) -> Option<Scalar> {
    Some(match name {
        "bool" => Scalar::Bool,
        "f16" => Scalar::F16,
        "f32" => Scalar::F32,
        "i32" => Scalar::I32,
        "u32" => Scalar::U32,
        _ => return None,
    })
}

fn scalar_from_suffix(c: char) -> Option<Scalar> {
    Some(match c {
        'f' => Scalar::F32,
        'h' => Scalar::F16,
        'i' => Scalar::I32,
        'u' => Scalar::U32,
        _ => return None,
    })
}

/// `vec3f`, `vec2u`, `mat4x4f`, `mat3x2h`.
fn parse_short_vec_or_mat(name: &str) -> Option<DataSchema> {
    let bytes = name.as_bytes();
    if let Some(rest) = name.strip_prefix("vec") {
        if rest.len() == 2 {
            let len = (bytes[3] as char).to_digit(10)? as u8;
            let scalar = scalar_from_suffix(bytes[4] as char)?;
            if (2..=4).contains(&len) {
                return Some(DataSchema::vec(scalar, len));
            }
        }
        return None;
    }
    if let Some(rest) = name.strip_prefix("mat") {
        if rest.len() == 4 && bytes[4] == b'x' {
            let cols = (bytes[3] as char).to_digit(10)? as u8;
            let rows = (bytes[5] as char).to_digit(10)? as u8;
            let scalar = scalar_from_suffix(bytes[6] as char)?;
            if (2..=4).contains(&cols) && (2..=4).contains(&rows) && scalar.is_float() {
                return Some(DataSchema::Matrix { scalar, cols, rows });
            }
        }
    }
    None
}

fn strip_generic<'a>(name: &'a str, head: &str) -> Option<&'a str> {
    name.strip_prefix(head)?
        .trim_start()
        .strip_prefix('<')?
        .strip_suffix('>')
}

fn split_top_level_comma(s: &str) -> Option<(&str, &str)> {
    let mut depth = 0i32;
    for (i, ch) in s.char_indices().rev() {
        match ch {
            '>' => depth += 1,
            '<' => depth -= 1,
            ',' if depth == 0 => return Some((&s[..i], &s[i + 1..])),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_structs(_: &str) -> Option<StructSchema> {
        None
    }

    #[test]
    fn parses_builtin_type_names() {
        let cases = [
            ("f32", "f32"),
            ("vec3f", "vec3f"),
            ("vec2<u32>", "vec2u"),
            ("vec4<bool>", "vec4<bool>"),
            ("mat4x4f", "mat4x4f"),
            ("array<f32, 4>", "array<f32, 4>"),
            ("array<vec2f>", "array<vec2f>"),
            ("array<array<i32, 2>, 3>", "array<array<i32, 2>, 3>"),
            ("atomic<u32>", "atomic<u32>"),
        ];
        for (input, expected) in cases {
            let schema = DataSchema::parse(input, &no_structs).unwrap();
            assert_eq!(schema.builtin_wgsl().as_deref(), Some(expected), "{input}");
        }
    }

    #[test]
    fn rejects_unknown_types() {
        assert!(DataSchema::parse("float", &no_structs).is_err());
        assert!(DataSchema::parse("atomic<f32>", &no_structs).is_err());
        assert!(DataSchema::parse("array<f32, 0>", &no_structs).is_err());
    }

    #[test]
    fn struct_layout_follows_wgsl_rules() {
        // struct { a: f32, b: vec3f, c: vec2f } -> offsets 0, 16, 32; size 48, align 16
        let s = StructSchema::new(
            Some("Particle"),
            vec![
                ("a".into(), DataSchema::f32()),
                ("b".into(), DataSchema::vec3f()),
                ("c".into(), DataSchema::vec2f()),
            ],
        );
        assert_eq!(s.field_offsets(), vec![0, 16, 32]);
        let schema = DataSchema::Struct(s);
        assert_eq!(schema.align_of(), 16);
        assert_eq!(schema.size_of(), 48);
    }

    #[test]
    fn array_and_matrix_layout() {
        assert_eq!(DataSchema::array(DataSchema::vec3f(), 4).size_of(), 64);
        assert_eq!(DataSchema::mat(3, 3).size_of(), 48);
        assert_eq!(DataSchema::mat(2, 2).align_of(), 8);
        assert_eq!(DataSchema::vec(Scalar::F16, 3).align_of(), 8);
    }

    #[test]
    fn struct_identity_is_by_object() {
        let a = StructSchema::new(Some("A"), vec![("x".into(), DataSchema::f32())]);
        let b = StructSchema::new(Some("A"), vec![("x".into(), DataSchema::f32())]);
        assert!(DataSchema::Struct(a.clone()).same(&DataSchema::Struct(a)));
        assert!(!DataSchema::Struct(b.clone()).same(&DataSchema::Struct(
            StructSchema::new(Some("A"), vec![("x".into(), DataSchema::f32())])
        )));
        assert!(DataSchema::vec3f().same(&DataSchema::vec(Scalar::F32, 3)));
    }
}
