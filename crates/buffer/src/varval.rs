// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Runtime values carried by compiled pipeline stages.
//!
//! [`VarVal`] is the tagged union a stage reads from and writes to records:
//! a scalar, a fixed-size vector of scalars, or a variable-size payload
//! backed by a child buffer. Operators dispatch through a single
//! [`BinaryOp`] kind and a match table rather than a tree of operator nodes;
//! combinations a variant pair does not support fail with
//! [`Error::UnsupportedOperation`].
//!
//! Numeric semantics: integer operands widen losslessly to 64 bits within
//! their own signedness, and any float operand promotes the pair to `f64`.
//! Mixed signed/unsigned arithmetic is not defined and fails. Unsigned
//! overflow wraps; signed overflow also wraps (the engine does not constrain
//! it further). Integer division by zero is a typed error.

use crate::error::Error;
use crate::schema::ScalarType;

/// One fixed-width primitive value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    /// Boolean.
    Bool(bool),
    /// Signed 8-bit integer.
    I8(i8),
    /// Signed 16-bit integer.
    I16(i16),
    /// Signed 32-bit integer.
    I32(i32),
    /// Signed 64-bit integer.
    I64(i64),
    /// Unsigned 8-bit integer.
    U8(u8),
    /// Unsigned 16-bit integer.
    U16(u16),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// One-byte character.
    Char(u8),
}

impl ScalarValue {
    /// The physical type of this value.
    #[must_use]
    pub const fn ty(&self) -> ScalarType {
        match self {
            ScalarValue::Bool(_) => ScalarType::Bool,
            ScalarValue::I8(_) => ScalarType::I8,
            ScalarValue::I16(_) => ScalarType::I16,
            ScalarValue::I32(_) => ScalarType::I32,
            ScalarValue::I64(_) => ScalarType::I64,
            ScalarValue::U8(_) => ScalarType::U8,
            ScalarValue::U16(_) => ScalarType::U16,
            ScalarValue::U32(_) => ScalarType::U32,
            ScalarValue::U64(_) => ScalarType::U64,
            ScalarValue::F32(_) => ScalarType::F32,
            ScalarValue::F64(_) => ScalarType::F64,
            ScalarValue::Char(_) => ScalarType::Char,
        }
    }

    fn numeric(&self) -> Option<Numeric> {
        match *self {
            ScalarValue::I8(v) => Some(Numeric::Signed(i64::from(v))),
            ScalarValue::I16(v) => Some(Numeric::Signed(i64::from(v))),
            ScalarValue::I32(v) => Some(Numeric::Signed(i64::from(v))),
            ScalarValue::I64(v) => Some(Numeric::Signed(v)),
            ScalarValue::U8(v) => Some(Numeric::Unsigned(u64::from(v))),
            ScalarValue::U16(v) => Some(Numeric::Unsigned(u64::from(v))),
            ScalarValue::U32(v) => Some(Numeric::Unsigned(u64::from(v))),
            ScalarValue::U64(v) => Some(Numeric::Unsigned(v)),
            ScalarValue::F32(v) => Some(Numeric::Float(f64::from(v))),
            ScalarValue::F64(v) => Some(Numeric::Float(v)),
            ScalarValue::Bool(_) | ScalarValue::Char(_) => None,
        }
    }
}

/// A variable-size payload: owned bytes plus the number of elements they
/// encode. For a `Char` payload the element count equals the byte length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSizeValue {
    /// The raw payload bytes.
    pub bytes: Vec<u8>,
    /// Number of elements encoded in `bytes`.
    pub elements: u32,
}

impl VariableSizeValue {
    /// Creates a payload from raw bytes and an element count.
    #[must_use]
    pub fn new(bytes: Vec<u8>, elements: u32) -> Self {
        VariableSizeValue { bytes, elements }
    }

    /// Creates a `Char` payload from a string.
    #[must_use]
    pub fn from_str(text: &str) -> Self {
        let bytes = text.as_bytes().to_vec();
        let elements = bytes.len() as u32;
        VariableSizeValue { bytes, elements }
    }
}

/// The runtime value union.
#[derive(Debug, Clone, PartialEq)]
pub enum VarVal {
    /// One primitive.
    Scalar(ScalarValue),
    /// A fixed-size vector of primitives.
    FixedSize(Vec<ScalarValue>),
    /// A variable-size payload.
    VariableSize(VariableSizeValue),
}

/// The binary operations a compiled stage can apply to [`VarVal`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Less-than.
    Lt,
    /// Less-or-equal.
    Le,
    /// Greater-than.
    Gt,
    /// Greater-or-equal.
    Ge,
    /// Logical conjunction.
    And,
    /// Logical disjunction.
    Or,
}

impl BinaryOp {
    const fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

enum Numeric {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

impl VarVal {
    /// Returns the scalar inside, or fails for other variants.
    pub fn as_scalar(&self) -> Result<&ScalarValue, Error> {
        match self {
            VarVal::Scalar(value) => Ok(value),
            other => Err(Error::unsupported(format!(
                "expected a scalar value, got {other:?}"
            ))),
        }
    }

    /// Returns the fixed-size elements inside, or fails for other variants.
    pub fn as_fixed_size(&self) -> Result<&[ScalarValue], Error> {
        match self {
            VarVal::FixedSize(values) => Ok(values),
            other => Err(Error::unsupported(format!(
                "expected a fixed-size value, got {other:?}"
            ))),
        }
    }

    /// Returns the variable-size payload inside, or fails for other variants.
    pub fn as_variable_size(&self) -> Result<&VariableSizeValue, Error> {
        match self {
            VarVal::VariableSize(value) => Ok(value),
            other => Err(Error::unsupported(format!(
                "expected a variable-size value, got {other:?}"
            ))),
        }
    }

    /// Applies `op` to `self` and `rhs`, dispatching on the variant pair.
    pub fn apply(&self, op: BinaryOp, rhs: &VarVal) -> Result<VarVal, Error> {
        match (self, rhs) {
            (VarVal::Scalar(lhs), VarVal::Scalar(rhs)) => apply_scalar(op, lhs, rhs),
            (VarVal::FixedSize(lhs), VarVal::FixedSize(rhs)) => apply_fixed(op, lhs, rhs),
            (VarVal::VariableSize(lhs), VarVal::VariableSize(rhs)) => apply_variable(op, lhs, rhs),
            (lhs, rhs) => Err(Error::unsupported(format!(
                "{op:?} between mismatched categories ({lhs:?}, {rhs:?})"
            ))),
        }
    }
}

impl From<ScalarValue> for VarVal {
    fn from(value: ScalarValue) -> Self {
        VarVal::Scalar(value)
    }
}

impl From<bool> for VarVal {
    fn from(value: bool) -> Self {
        VarVal::Scalar(ScalarValue::Bool(value))
    }
}

impl From<i64> for VarVal {
    fn from(value: i64) -> Self {
        VarVal::Scalar(ScalarValue::I64(value))
    }
}

impl From<u64> for VarVal {
    fn from(value: u64) -> Self {
        VarVal::Scalar(ScalarValue::U64(value))
    }
}

impl From<f64> for VarVal {
    fn from(value: f64) -> Self {
        VarVal::Scalar(ScalarValue::F64(value))
    }
}

impl From<VariableSizeValue> for VarVal {
    fn from(value: VariableSizeValue) -> Self {
        VarVal::VariableSize(value)
    }
}

fn bool_result(value: bool) -> Result<VarVal, Error> {
    Ok(VarVal::Scalar(ScalarValue::Bool(value)))
}

fn apply_scalar(op: BinaryOp, lhs: &ScalarValue, rhs: &ScalarValue) -> Result<VarVal, Error> {
    match (op, lhs, rhs) {
        (BinaryOp::And, ScalarValue::Bool(a), ScalarValue::Bool(b)) => bool_result(*a && *b),
        (BinaryOp::Or, ScalarValue::Bool(a), ScalarValue::Bool(b)) => bool_result(*a || *b),
        (BinaryOp::Eq, ScalarValue::Bool(a), ScalarValue::Bool(b)) => bool_result(a == b),
        (BinaryOp::Ne, ScalarValue::Bool(a), ScalarValue::Bool(b)) => bool_result(a != b),
        (op, ScalarValue::Char(a), ScalarValue::Char(b)) if op.is_comparison() => {
            bool_result(compare(op, a.cmp(b)))
        }
        (op, lhs, rhs) => {
            let (Some(a), Some(b)) = (lhs.numeric(), rhs.numeric()) else {
                return Err(Error::unsupported(format!(
                    "{op:?} on {:?} and {:?}",
                    lhs.ty(),
                    rhs.ty()
                )));
            };
            apply_numeric(op, a, b, lhs.ty(), rhs.ty())
        }
    }
}

fn apply_numeric(
    op: BinaryOp,
    lhs: Numeric,
    rhs: Numeric,
    lhs_ty: ScalarType,
    rhs_ty: ScalarType,
) -> Result<VarVal, Error> {
    match (lhs, rhs) {
        (Numeric::Signed(a), Numeric::Signed(b)) => {
            if op.is_comparison() {
                bool_result(compare(op, a.cmp(&b)))
            } else {
                signed_arith(op, a, b)
            }
        }
        (Numeric::Unsigned(a), Numeric::Unsigned(b)) => {
            if op.is_comparison() {
                bool_result(compare(op, a.cmp(&b)))
            } else {
                unsigned_arith(op, a, b)
            }
        }
        // Any float operand widens the pair to f64; int-to-float is the one
        // cross-signedness conversion the widening rules define.
        (Numeric::Float(a), b) => float_arith(op, a, to_float(b)),
        (a, Numeric::Float(b)) => float_arith(op, to_float(a), b),
        _ => Err(Error::unsupported(format!(
            "{op:?} between mixed signedness ({lhs_ty:?}, {rhs_ty:?})"
        ))),
    }
}

fn to_float(value: Numeric) -> f64 {
    match value {
        Numeric::Signed(v) => v as f64,
        Numeric::Unsigned(v) => v as f64,
        Numeric::Float(v) => v,
    }
}

fn compare(op: BinaryOp, ordering: std::cmp::Ordering) -> bool {
    match op {
        BinaryOp::Eq => ordering.is_eq(),
        BinaryOp::Ne => ordering.is_ne(),
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => unreachable!("compare() is only called for comparison operators"),
    }
}

fn signed_arith(op: BinaryOp, a: i64, b: i64) -> Result<VarVal, Error> {
    let value = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => a.checked_div(b).ok_or(Error::DivisionByZero)?,
        other => {
            return Err(Error::unsupported(format!("{other:?} on signed integers")));
        }
    };
    Ok(VarVal::Scalar(ScalarValue::I64(value)))
}

fn unsigned_arith(op: BinaryOp, a: u64, b: u64) -> Result<VarVal, Error> {
    let value = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => a.checked_div(b).ok_or(Error::DivisionByZero)?,
        other => {
            return Err(Error::unsupported(format!(
                "{other:?} on unsigned integers"
            )));
        }
    };
    Ok(VarVal::Scalar(ScalarValue::U64(value)))
}

fn float_arith(op: BinaryOp, a: f64, b: f64) -> Result<VarVal, Error> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Eq => return bool_result(a == b),
        BinaryOp::Ne => return bool_result(a != b),
        BinaryOp::Lt => return bool_result(a < b),
        BinaryOp::Le => return bool_result(a <= b),
        BinaryOp::Gt => return bool_result(a > b),
        BinaryOp::Ge => return bool_result(a >= b),
        other => return Err(Error::unsupported(format!("{other:?} on floats"))),
    };
    Ok(VarVal::Scalar(ScalarValue::F64(value)))
}

fn apply_fixed(op: BinaryOp, lhs: &[ScalarValue], rhs: &[ScalarValue]) -> Result<VarVal, Error> {
    match op {
        BinaryOp::Eq | BinaryOp::Ne => {
            let mut equal = lhs.len() == rhs.len();
            if equal {
                for (a, b) in lhs.iter().zip(rhs.iter()) {
                    match apply_scalar(BinaryOp::Eq, a, b)? {
                        VarVal::Scalar(ScalarValue::Bool(true)) => {}
                        _ => {
                            equal = false;
                            break;
                        }
                    }
                }
            }
            bool_result(if op == BinaryOp::Eq { equal } else { !equal })
        }
        other => Err(Error::unsupported(format!(
            "{other:?} on fixed-size values"
        ))),
    }
}

fn apply_variable(
    op: BinaryOp,
    lhs: &VariableSizeValue,
    rhs: &VariableSizeValue,
) -> Result<VarVal, Error> {
    match op {
        // Length first, then bytes.
        BinaryOp::Eq => bool_result(lhs.bytes.len() == rhs.bytes.len() && lhs.bytes == rhs.bytes),
        BinaryOp::Ne => bool_result(lhs.bytes.len() != rhs.bytes.len() || lhs.bytes != rhs.bytes),
        other => Err(Error::unsupported(format!(
            "{other:?} on variable-size values"
        ))),
    }
}
