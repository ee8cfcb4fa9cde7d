// types.rs — Primitive scalar types of the kernel IR
//
// The IR front end may produce any fixed-width scalar, but WGSL only spells
// 32-bit scalars. The layout builder works with every type; the emitter
// rejects types without a WGSL spelling.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar numeric kind carried by IR statements, arguments and fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F16,
    F32,
    F64,
}

pub const ALL_PRIMITIVE_TYPES: [PrimitiveType; 11] = [
    PrimitiveType::I8,
    PrimitiveType::I16,
    PrimitiveType::I32,
    PrimitiveType::I64,
    PrimitiveType::U8,
    PrimitiveType::U16,
    PrimitiveType::U32,
    PrimitiveType::U64,
    PrimitiveType::F16,
    PrimitiveType::F32,
    PrimitiveType::F64,
];

impl PrimitiveType {
    /// Natural size in bytes.
    pub fn size(self) -> u32 {
        match self {
            PrimitiveType::I8 | PrimitiveType::U8 => 1,
            PrimitiveType::I16 | PrimitiveType::U16 | PrimitiveType::F16 => 2,
            PrimitiveType::I32 | PrimitiveType::U32 | PrimitiveType::F32 => 4,
            PrimitiveType::I64 | PrimitiveType::U64 | PrimitiveType::F64 => 8,
        }
    }

    pub fn is_real(self) -> bool {
        matches!(
            self,
            PrimitiveType::F16 | PrimitiveType::F32 | PrimitiveType::F64
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            PrimitiveType::I8 | PrimitiveType::I16 | PrimitiveType::I32 | PrimitiveType::I64
        )
    }

    /// WGSL spelling, if the type is representable in generated programs.
    pub fn wgsl_name(self) -> Option<&'static str> {
        match self {
            PrimitiveType::I32 => Some("i32"),
            PrimitiveType::U32 => Some("u32"),
            PrimitiveType::F32 => Some("f32"),
            _ => None,
        }
    }

    /// IR spelling, used in attribute records and error messages.
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::I8 => "i8",
            PrimitiveType::I16 => "i16",
            PrimitiveType::I32 => "i32",
            PrimitiveType::I64 => "i64",
            PrimitiveType::U8 => "u8",
            PrimitiveType::U16 => "u16",
            PrimitiveType::U32 => "u32",
            PrimitiveType::U64 => "u64",
            PrimitiveType::F16 => "f16",
            PrimitiveType::F32 => "f32",
            PrimitiveType::F64 => "f64",
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `vecN<T>` for N > 1, otherwise the scalar name itself.
pub fn scalar_or_vector_type_name(prim: &str, num_components: usize) -> String {
    if num_components > 1 {
        format!("vec{}<{}>", num_components, prim)
    } else {
        prim.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(PrimitiveType::I8.size(), 1);
        assert_eq!(PrimitiveType::F16.size(), 2);
        assert_eq!(PrimitiveType::F32.size(), 4);
        assert_eq!(PrimitiveType::U64.size(), 8);
    }

    #[test]
    fn only_32_bit_scalars_have_wgsl_names() {
        for t in ALL_PRIMITIVE_TYPES {
            assert_eq!(t.wgsl_name().is_some(), t.size() == 4, "{}", t);
        }
    }

    #[test]
    fn vector_names() {
        assert_eq!(scalar_or_vector_type_name("f32", 1), "f32");
        assert_eq!(scalar_or_vector_type_name("f32", 4), "vec4<f32>");
        assert_eq!(scalar_or_vector_type_name("i32", 2), "vec2<i32>");
    }

    #[test]
    fn serde_spelling_matches_name() {
        for t in ALL_PRIMITIVE_TYPES {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.name()));
        }
    }
}
