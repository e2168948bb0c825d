// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Schema-driven row-layout access to tuple buffers.
//!
//! A [`RowLayout`] precomputes field offsets and the tuple width for one
//! schema. Records are rows: record `i` starts at byte `i * tuple_size`.
//! Scalars are stored little-endian at their field offset; fixed-size fields
//! are contiguous scalars; variable-size fields store a 4-byte child-buffer
//! index inline, and the child buffer holds a 4-byte element-count prefix
//! followed by the payload bytes.

use crate::error::Error;
use crate::pool::BufferProvider;
use crate::schema::{PhysicalType, ScalarType, Schema};
use crate::tuple_buffer::TupleBuffer;
use crate::varval::{ScalarValue, VarVal, VariableSizeValue};
use std::collections::HashMap;

struct FieldLayout {
    name: String,
    ty: PhysicalType,
    offset: usize,
}

/// Precomputed row layout for one schema.
pub struct RowLayout {
    fields: Vec<FieldLayout>,
    by_name: HashMap<String, usize>,
    tuple_size: usize,
}

impl RowLayout {
    /// Builds the layout for `schema`.
    ///
    /// Fails on empty schemas and duplicate field names.
    pub fn new(schema: &Schema) -> Result<Self, Error> {
        if schema.is_empty() {
            return Err(Error::EmptySchema);
        }
        let mut fields = Vec::with_capacity(schema.len());
        let mut by_name = HashMap::with_capacity(schema.len());
        let mut offset = 0usize;
        for (index, field) in schema.fields().iter().enumerate() {
            if by_name.insert(field.name.clone(), index).is_some() {
                return Err(Error::DuplicateField {
                    name: field.name.clone(),
                });
            }
            fields.push(FieldLayout {
                name: field.name.clone(),
                ty: field.ty,
                offset,
            });
            offset += field.ty.size();
        }
        Ok(RowLayout {
            fields,
            by_name,
            tuple_size: offset,
        })
    }

    /// Width of one record in bytes.
    #[must_use]
    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    /// Number of fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Resolves a field name to its index.
    pub fn field_index(&self, name: &str) -> Result<usize, Error> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownField {
                name: name.to_owned(),
            })
    }

    /// Number of records of this layout that fit into `buffer`.
    pub fn capacity(&self, buffer: &TupleBuffer) -> Result<u64, Error> {
        if self.tuple_size > buffer.capacity() {
            return Err(Error::TupleTooLarge {
                tuple_size: self.tuple_size,
                capacity: buffer.capacity(),
            });
        }
        Ok((buffer.capacity() / self.tuple_size) as u64)
    }

    /// Returns a read-only view of record `index`.
    ///
    /// The index must be below the buffer's tuple count.
    pub fn record<'a>(
        &'a self,
        buffer: &'a TupleBuffer,
        index: u64,
    ) -> Result<RecordRef<'a>, Error> {
        if index >= buffer.tuple_count() {
            return Err(Error::RecordIndexOutOfRange {
                index,
                limit: buffer.tuple_count(),
            });
        }
        let _ = self.capacity(buffer)?;
        Ok(RecordRef {
            layout: self,
            buffer,
            base: index as usize * self.tuple_size,
        })
    }

    /// Writes `value` into `field` of record `index`.
    ///
    /// The index must be below the buffer's record capacity (writes may run
    /// ahead of the tuple count; [`RowLayout::append`] bumps it). For
    /// variable-size fields one child buffer is allocated from `provider`.
    pub fn write_field(
        &self,
        buffer: &mut TupleBuffer,
        index: u64,
        field: usize,
        value: &VarVal,
        provider: &dyn BufferProvider,
    ) -> Result<(), Error> {
        let capacity = self.capacity(buffer)?;
        if index >= capacity {
            return Err(Error::RecordIndexOutOfRange {
                index,
                limit: capacity,
            });
        }
        let layout = self.fields.get(field).ok_or(Error::UnknownField {
            name: format!("#{field}"),
        })?;
        let offset = index as usize * self.tuple_size + layout.offset;
        match layout.ty {
            PhysicalType::Scalar(scalar_ty) => {
                let scalar = value.as_scalar()?;
                store_scalar(buffer.data_mut()?, offset, scalar_ty, scalar)
            }
            PhysicalType::FixedSize { element, elements } => {
                let values = value.as_fixed_size()?;
                if values.len() != elements {
                    return Err(Error::ValueShape {
                        reason: format!(
                            "field `{}` holds {elements} elements, value has {}",
                            layout.name,
                            values.len()
                        ),
                    });
                }
                let data = buffer.data_mut()?;
                for (i, scalar) in values.iter().enumerate() {
                    store_scalar(data, offset + i * element.size(), element, scalar)?;
                }
                Ok(())
            }
            PhysicalType::VariableSize { element } => {
                let payload = value.as_variable_size()?;
                let expected = payload.elements as usize * element.size();
                if payload.bytes.len() != expected {
                    return Err(Error::ValueShape {
                        reason: format!(
                            "variable-size value declares {} elements of {:?} but carries {} bytes",
                            payload.elements,
                            element,
                            payload.bytes.len()
                        ),
                    });
                }
                let index = store_variable(buffer, payload, provider)?;
                store_scalar(
                    buffer.data_mut()?,
                    offset,
                    ScalarType::U32,
                    &ScalarValue::U32(index),
                )
            }
        }
    }

    /// Appends one record: writes `values` at the current tuple count, then
    /// increments it. Field order must match the schema.
    pub fn append(
        &self,
        buffer: &mut TupleBuffer,
        values: &[VarVal],
        provider: &dyn BufferProvider,
    ) -> Result<u64, Error> {
        if values.len() != self.fields.len() {
            return Err(Error::ValueShape {
                reason: format!(
                    "schema has {} fields, record has {}",
                    self.fields.len(),
                    values.len()
                ),
            });
        }
        let index = buffer.tuple_count();
        for (field, value) in values.iter().enumerate() {
            self.write_field(buffer, index, field, value, provider)?;
        }
        buffer.set_tuple_count(index + 1)?;
        Ok(index)
    }
}

/// A read-only view of one record.
pub struct RecordRef<'a> {
    layout: &'a RowLayout,
    buffer: &'a TupleBuffer,
    base: usize,
}

impl RecordRef<'_> {
    /// Reads the field at `index`.
    pub fn get(&self, index: usize) -> Result<VarVal, Error> {
        let layout = self.layout.fields.get(index).ok_or(Error::UnknownField {
            name: format!("#{index}"),
        })?;
        let offset = self.base + layout.offset;
        match layout.ty {
            PhysicalType::Scalar(scalar_ty) => {
                load_scalar(self.buffer.data(), offset, scalar_ty).map(VarVal::Scalar)
            }
            PhysicalType::FixedSize { element, elements } => {
                let mut values = Vec::with_capacity(elements);
                for i in 0..elements {
                    values.push(load_scalar(
                        self.buffer.data(),
                        offset + i * element.size(),
                        element,
                    )?);
                }
                Ok(VarVal::FixedSize(values))
            }
            PhysicalType::VariableSize { element } => {
                load_variable(self.buffer, offset, element).map(VarVal::VariableSize)
            }
        }
    }

    /// Reads the field called `name`.
    pub fn get_named(&self, name: &str) -> Result<VarVal, Error> {
        self.get(self.layout.field_index(name)?)
    }
}

fn store_scalar(
    data: &mut [u8],
    offset: usize,
    ty: ScalarType,
    value: &ScalarValue,
) -> Result<(), Error> {
    if value.ty() != ty {
        return Err(Error::TypeMismatch {
            expected: ty,
            actual: value.ty(),
        });
    }
    let slot = &mut data[offset..offset + ty.size()];
    match *value {
        ScalarValue::Bool(v) => slot[0] = u8::from(v),
        ScalarValue::I8(v) => slot.copy_from_slice(&v.to_le_bytes()),
        ScalarValue::I16(v) => slot.copy_from_slice(&v.to_le_bytes()),
        ScalarValue::I32(v) => slot.copy_from_slice(&v.to_le_bytes()),
        ScalarValue::I64(v) => slot.copy_from_slice(&v.to_le_bytes()),
        ScalarValue::U8(v) => slot[0] = v,
        ScalarValue::U16(v) => slot.copy_from_slice(&v.to_le_bytes()),
        ScalarValue::U32(v) => slot.copy_from_slice(&v.to_le_bytes()),
        ScalarValue::U64(v) => slot.copy_from_slice(&v.to_le_bytes()),
        ScalarValue::F32(v) => slot.copy_from_slice(&v.to_le_bytes()),
        ScalarValue::F64(v) => slot.copy_from_slice(&v.to_le_bytes()),
        ScalarValue::Char(v) => slot[0] = v,
    }
    Ok(())
}

fn load_scalar(data: &[u8], offset: usize, ty: ScalarType) -> Result<ScalarValue, Error> {
    let slot = &data[offset..offset + ty.size()];
    let value = match ty {
        ScalarType::Bool => ScalarValue::Bool(slot[0] != 0),
        ScalarType::I8 => ScalarValue::I8(slot[0] as i8),
        ScalarType::I16 => ScalarValue::I16(i16::from_le_bytes([slot[0], slot[1]])),
        ScalarType::I32 => {
            ScalarValue::I32(i32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]))
        }
        ScalarType::I64 => ScalarValue::I64(i64::from_le_bytes([
            slot[0], slot[1], slot[2], slot[3], slot[4], slot[5], slot[6], slot[7],
        ])),
        ScalarType::U8 => ScalarValue::U8(slot[0]),
        ScalarType::U16 => ScalarValue::U16(u16::from_le_bytes([slot[0], slot[1]])),
        ScalarType::U32 => {
            ScalarValue::U32(u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]))
        }
        ScalarType::U64 => ScalarValue::U64(u64::from_le_bytes([
            slot[0], slot[1], slot[2], slot[3], slot[4], slot[5], slot[6], slot[7],
        ])),
        ScalarType::F32 => {
            ScalarValue::F32(f32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]))
        }
        ScalarType::F64 => ScalarValue::F64(f64::from_le_bytes([
            slot[0], slot[1], slot[2], slot[3], slot[4], slot[5], slot[6], slot[7],
        ])),
        ScalarType::Char => ScalarValue::Char(slot[0]),
    };
    Ok(value)
}

/// Allocates a child buffer, writes the element-count prefix and payload,
/// and attaches the child to `buffer`. Returns the child index.
fn store_variable(
    buffer: &mut TupleBuffer,
    payload: &VariableSizeValue,
    provider: &dyn BufferProvider,
) -> Result<u32, Error> {
    let mut child = provider.acquire_blocking();
    let needed = 4 + payload.bytes.len();
    if needed > child.capacity() {
        return Err(Error::VariableSizeTooLarge {
            payload: needed,
            capacity: child.capacity(),
        });
    }
    let data = child.data_mut()?;
    data[0..4].copy_from_slice(&payload.elements.to_le_bytes());
    data[4..needed].copy_from_slice(&payload.bytes);
    buffer.attach_child(child)
}

fn load_variable(
    buffer: &TupleBuffer,
    offset: usize,
    element: ScalarType,
) -> Result<VariableSizeValue, Error> {
    let index = match load_scalar(buffer.data(), offset, ScalarType::U32)? {
        ScalarValue::U32(index) => index,
        _ => unreachable!("load_scalar(U32) yields a U32"),
    };
    let child = buffer.child(index)?;
    let data = child.data();
    let elements = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let length = elements as usize * element.size();
    Ok(VariableSizeValue {
        bytes: data[4..4 + length].to_vec(),
        elements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{BufferPool, BufferProvider};

    fn test_schema() -> Schema {
        Schema::new()
            .with_field("id", PhysicalType::Scalar(ScalarType::U64))
            .with_field("score", PhysicalType::Scalar(ScalarType::F64))
            .with_field(
                "tags",
                PhysicalType::FixedSize {
                    element: ScalarType::U8,
                    elements: 4,
                },
            )
            .with_field(
                "name",
                PhysicalType::VariableSize {
                    element: ScalarType::Char,
                },
            )
    }

    fn record(id: u64, score: f64, tags: [u8; 4], name: &str) -> Vec<VarVal> {
        vec![
            VarVal::Scalar(ScalarValue::U64(id)),
            VarVal::Scalar(ScalarValue::F64(score)),
            VarVal::FixedSize(tags.map(ScalarValue::U8).to_vec()),
            VarVal::VariableSize(VariableSizeValue::from_str(name)),
        ]
    }

    #[test]
    fn test_offsets_are_prefix_sums() {
        let layout = RowLayout::new(&test_schema()).expect("layout");
        assert_eq!(layout.tuple_size(), 8 + 8 + 4 + 4);
        assert_eq!(layout.field_index("id").expect("field"), 0);
        assert_eq!(layout.field_index("name").expect("field"), 3);
        assert!(layout.field_index("missing").is_err());
    }

    #[test]
    fn test_append_and_read_round_trip() {
        let pool = BufferPool::new(8, 256);
        let layout = RowLayout::new(&test_schema()).expect("layout");
        let mut buffer = pool.try_acquire().expect("buffer");

        let rows = [
            record(1, 0.5, [1, 2, 3, 4], "alpha"),
            record(2, -1.25, [0, 0, 0, 0], ""),
            record(3, 9.0, [9, 9, 9, 9], "a longer value than the others"),
        ];
        for row in &rows {
            let _ = layout.append(&mut buffer, row, &pool).expect("append");
        }
        assert_eq!(buffer.tuple_count(), 3);

        for (index, row) in rows.iter().enumerate() {
            let view = layout.record(&buffer, index as u64).expect("record");
            for (field, expected) in row.iter().enumerate() {
                assert_eq!(&view.get(field).expect("read"), expected);
            }
        }
        let view = layout.record(&buffer, 2).expect("record");
        assert_eq!(
            view.get_named("name").expect("read"),
            rows[2][3].clone(),
            "byte-exact variable-size round trip"
        );
    }

    #[test]
    fn test_variable_size_fields_survive_sharing() {
        let pool = BufferPool::new(4, 128);
        let layout = RowLayout::new(
            &Schema::new().with_field(
                "payload",
                PhysicalType::VariableSize {
                    element: ScalarType::Char,
                },
            ),
        )
        .expect("layout");
        let mut buffer = pool.try_acquire().expect("buffer");
        let _ = layout
            .append(
                &mut buffer,
                &[VarVal::VariableSize(VariableSizeValue::from_str("shared"))],
                &pool,
            )
            .expect("append");

        let reader = buffer.clone();
        let view = layout.record(&reader, 0).expect("record");
        let value = view.get(0).expect("read");
        assert_eq!(
            value,
            VarVal::VariableSize(VariableSizeValue::from_str("shared"))
        );
    }

    #[test]
    fn test_write_rejects_mismatched_scalar_type() {
        let pool = BufferPool::new(2, 64);
        let layout =
            RowLayout::new(&Schema::new().with_field("id", PhysicalType::Scalar(ScalarType::U64)))
                .expect("layout");
        let mut buffer = pool.try_acquire().expect("buffer");
        let err = layout
            .write_field(
                &mut buffer,
                0,
                0,
                &VarVal::Scalar(ScalarValue::I64(1)),
                &pool,
            )
            .expect_err("type mismatch");
        assert_eq!(
            err,
            Error::TypeMismatch {
                expected: ScalarType::U64,
                actual: ScalarType::I64,
            }
        );
    }

    #[test]
    fn test_write_beyond_capacity_is_rejected() {
        let pool = BufferPool::new(2, 64);
        let layout =
            RowLayout::new(&Schema::new().with_field("id", PhysicalType::Scalar(ScalarType::U64)))
                .expect("layout");
        let mut buffer = pool.try_acquire().expect("buffer");
        let capacity = layout.capacity(&buffer).expect("capacity");
        let err = layout
            .write_field(
                &mut buffer,
                capacity,
                0,
                &VarVal::Scalar(ScalarValue::U64(1)),
                &pool,
            )
            .expect_err("out of range");
        assert!(matches!(err, Error::RecordIndexOutOfRange { .. }));
    }

    #[test]
    fn test_read_past_tuple_count_is_rejected() {
        let pool = BufferPool::new(2, 64);
        let layout =
            RowLayout::new(&Schema::new().with_field("id", PhysicalType::Scalar(ScalarType::U64)))
                .expect("layout");
        let buffer = pool.try_acquire().expect("buffer");
        assert!(matches!(
            layout.record(&buffer, 0).err(),
            Some(Error::RecordIndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_tuple_wider_than_buffer() {
        let pool = BufferPool::new(1, 8);
        let layout = RowLayout::new(
            &Schema::new()
                .with_field("a", PhysicalType::Scalar(ScalarType::U64))
                .with_field("b", PhysicalType::Scalar(ScalarType::U64)),
        )
        .expect("layout");
        let buffer = pool.try_acquire().expect("buffer");
        assert_eq!(
            layout.capacity(&buffer).err(),
            Some(Error::TupleTooLarge {
                tuple_size: 16,
                capacity: 8
            })
        );
    }
}
