// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Physical types and schemas.
//!
//! A schema is an ordered sequence of `(field name, physical type)` pairs.
//! The layout is row-based: the offset of field `k` is the sum of the sizes
//! of fields `0..k`, and the tuple width is the sum of all field sizes.

use serde::{Deserialize, Serialize};

/// A fixed-width primitive type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    /// One-byte boolean, `0` or `1`.
    Bool,
    /// Signed 8-bit integer.
    I8,
    /// Signed 16-bit integer.
    I16,
    /// Signed 32-bit integer.
    I32,
    /// Signed 64-bit integer.
    I64,
    /// Unsigned 8-bit integer.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 32-bit integer.
    U32,
    /// Unsigned 64-bit integer.
    U64,
    /// 32-bit IEEE-754 float.
    F32,
    /// 64-bit IEEE-754 float.
    F64,
    /// One-byte character.
    Char,
}

impl ScalarType {
    /// Width of the type in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            ScalarType::Bool | ScalarType::I8 | ScalarType::U8 | ScalarType::Char => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 => 8,
        }
    }

    /// Natural alignment of the type in bytes.
    #[must_use]
    pub const fn alignment(self) -> usize {
        self.size()
    }
}

/// The physical type of one schema field.
#[allow(variant_size_differences)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicalType {
    /// A single fixed-width primitive.
    Scalar(ScalarType),
    /// `elements` contiguous primitives of the same type.
    FixedSize {
        /// Element type.
        element: ScalarType,
        /// Number of contiguous elements.
        elements: usize,
    },
    /// A 4-byte child-buffer index. The child buffer holds a 4-byte
    /// element-count prefix followed by the payload.
    VariableSize {
        /// Element type of the payload.
        element: ScalarType,
    },
}

impl PhysicalType {
    /// Inline width of the field in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        match self {
            PhysicalType::Scalar(scalar) => scalar.size(),
            PhysicalType::FixedSize { element, elements } => element.size() * *elements,
            PhysicalType::VariableSize { .. } => 4,
        }
    }

    /// Natural alignment of the inline representation in bytes.
    #[must_use]
    pub const fn alignment(&self) -> usize {
        match self {
            PhysicalType::Scalar(scalar) => scalar.alignment(),
            PhysicalType::FixedSize { element, .. } => element.alignment(),
            PhysicalType::VariableSize { .. } => 4,
        }
    }
}

/// One named field of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name, unique within a schema.
    pub name: String,
    /// Physical type of the field.
    pub ty: PhysicalType,
}

/// An ordered sequence of named, physically typed fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Schema { fields: Vec::new() }
    }

    /// Appends a field, builder-style.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, ty: PhysicalType) -> Self {
        self.fields.push(Field {
            name: name.into(),
            ty,
        });
        self
    }

    /// The fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the schema has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Sum of the inline sizes of all fields.
    #[must_use]
    pub fn tuple_size(&self) -> usize {
        self.fields.iter().map(|field| field.ty.size()).sum()
    }
}
