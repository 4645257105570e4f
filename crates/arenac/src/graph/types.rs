use serde::{Deserialize, Serialize};

/// Enumerates scalar element kinds a frozen graph may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    I1,
    Si8,
    Ui8,
    Si16,
    Ui16,
    Si32,
    Ui32,
    Si64,
    F16,
    F32,
    F64,
}

impl DType {
    /// Returns `true` for the integer kinds that may carry quantization parameters.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DType::Si8
                | DType::Ui8
                | DType::Si16
                | DType::Ui16
                | DType::Si32
                | DType::Ui32
                | DType::Si64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F16 | DType::F32 | DType::F64)
    }

    /// Inclusive range of values storable in this kind; `None` for floating-point kinds.
    pub fn int_range(self) -> Option<(i64, i64)> {
        match self {
            DType::I1 => Some((0, 1)),
            DType::Si8 => Some((i8::MIN.into(), i8::MAX.into())),
            DType::Ui8 => Some((0, u8::MAX.into())),
            DType::Si16 => Some((i16::MIN.into(), i16::MAX.into())),
            DType::Ui16 => Some((0, u16::MAX.into())),
            DType::Si32 => Some((i32::MIN.into(), i32::MAX.into())),
            DType::Ui32 => Some((0, u32::MAX.into())),
            DType::Si64 => Some((i64::MIN, i64::MAX)),
            DType::F16 | DType::F32 | DType::F64 => None,
        }
    }

    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::I1 | DType::Si8 | DType::Ui8 => 1,
            DType::Si16 | DType::Ui16 | DType::F16 => 2,
            DType::Si32 | DType::Ui32 | DType::F32 => 4,
            DType::Si64 | DType::F64 => 8,
        }
    }

    /// Spelling of the element kind in emitted sources.
    pub fn c_type(self) -> &'static str {
        match self {
            DType::I1 => "bool",
            DType::Si8 => "int8_t",
            DType::Ui8 => "uint8_t",
            DType::Si16 => "int16_t",
            DType::Ui16 => "uint16_t",
            DType::Si32 => "int32_t",
            DType::Ui32 => "uint32_t",
            DType::Si64 => "int64_t",
            DType::F16 => "half",
            DType::F32 => "float",
            DType::F64 => "double",
        }
    }
}

/// Affine quantization attached to an integer tensor: `real = scale * (q - zero_point)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: i32,
}

/// Inline payload of a constant (weight) tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstantData {
    Float(Vec<f32>),
    Int(Vec<i64>),
}

impl ConstantData {
    pub fn len(&self) -> usize {
        match self {
            ConstantData::Float(values) => values.len(),
            ConstantData::Int(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a tensor enters the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorRole {
    /// Fed by the caller; arena resident and registered at program entry.
    Input,
    /// Weights baked into read-only storage; never placed in the arena.
    Constant,
    /// Produced by exactly one operator.
    Intermediate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub name: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quant: Option<QuantParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ConstantData>,
}

impl TensorInfo {
    pub fn new(name: impl Into<String>, dtype: DType, shape: &[usize]) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape: shape.to_vec(),
            quant: None,
            data: None,
        }
    }

    pub fn with_quant(mut self, scale: f32, zero_point: i32) -> Self {
        self.quant = Some(QuantParams { scale, zero_point });
        self
    }

    pub fn with_data(mut self, data: ConstantData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_constant(&self) -> bool {
        self.data.is_some()
    }

    /// Returns the element count, `None` on overflow.
    pub fn element_count(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
    }

    /// Returns the storage size in bytes, `None` on overflow.
    pub fn byte_len(&self) -> Option<usize> {
        self.element_count()?.checked_mul(self.dtype.size_in_bytes())
    }
}

/// Opaque, order-significant value needed to construct a runtime operator instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ConstructParam {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// Emitted verbatim, e.g. an activation selector enumerator.
    Ident(String),
    List(Vec<ConstructParam>),
}

/// Element kinds of an operator's inputs and outputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeSignature {
    pub inputs: Vec<DType>,
    pub outputs: Vec<DType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_len_accounts_for_dtype_width() {
        let tensor = TensorInfo::new("x", DType::F32, &[2, 3]);
        assert_eq!(tensor.element_count(), Some(6));
        assert_eq!(tensor.byte_len(), Some(24));
    }

    #[test]
    fn scalar_shape_has_one_element() {
        let tensor = TensorInfo::new("s", DType::Si8, &[]);
        assert_eq!(tensor.byte_len(), Some(1));
    }

    #[test]
    fn int_range_follows_width_and_sign() {
        assert_eq!(DType::Si8.int_range(), Some((-128, 127)));
        assert_eq!(DType::Ui16.int_range(), Some((0, 65535)));
        assert_eq!(DType::I1.int_range(), Some((0, 1)));
        assert_eq!(DType::F32.int_range(), None);
    }

    #[test]
    fn byte_len_overflow_is_detected() {
        let tensor = TensorInfo::new("huge", DType::F64, &[usize::MAX, 2]);
        assert_eq!(tensor.byte_len(), None);
    }
}
