use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

/// Operator type of the inserted conversion nodes.
pub const CAST_OP_TYPE: &str = "Cast";

/// Attribute carrying the target dtype of a conversion node.
pub const CAST_TO_ATTR: &str = "to";

/// Domain of the standard operator set.
pub const DEFAULT_DOMAIN: &str = "";

/// Enumerates scalar element types a value can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    Si8,
    Ui8,
    Si16,
    Ui16,
    Si32,
    Ui32,
    Si64,
    Ui64,
    Bf16,
    F16,
    F32,
    F64,
}

impl DType {
    /// Every dtype in canonical order.
    pub const ALL: [DType; 13] = [
        DType::Bool,
        DType::Si8,
        DType::Ui8,
        DType::Si16,
        DType::Ui16,
        DType::Si32,
        DType::Ui32,
        DType::Si64,
        DType::Ui64,
        DType::Bf16,
        DType::F16,
        DType::F32,
        DType::F64,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Si8 => "si8",
            DType::Ui8 => "ui8",
            DType::Si16 => "si16",
            DType::Ui16 => "ui16",
            DType::Si32 => "si32",
            DType::Ui32 => "ui32",
            DType::Si64 => "si64",
            DType::Ui64 => "ui64",
            DType::Bf16 => "bf16",
            DType::F16 => "f16",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    /// Returns `true` when the dtype is any signed or unsigned integer.
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
                | DType::Ui64
        )
    }

    /// Returns `true` when the dtype is a floating-point representation.
    pub fn is_float(self) -> bool {
        matches!(self, DType::Bf16 | DType::F16 | DType::F32 | DType::F64)
    }

    /// Returns the storage bit-width of one element.
    pub fn bitwidth(self) -> usize {
        match self {
            DType::Bool => 1,
            DType::Si8 | DType::Ui8 => 8,
            DType::Si16 | DType::Ui16 | DType::Bf16 | DType::F16 => 16,
            DType::Si32 | DType::Ui32 | DType::F32 => 32,
            DType::Si64 | DType::Ui64 | DType::F64 => 64,
        }
    }

    fn family(self) -> u8 {
        if self.is_float() {
            0
        } else if self.is_integer() {
            1
        } else {
            2
        }
    }

    /// Returns `true` when both dtypes belong to the same numeric family.
    pub fn same_family(self, other: DType) -> bool {
        self.family() == other.family()
    }

    fn ordinal(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DType::ALL
            .iter()
            .copied()
            .find(|dtype| dtype.as_str() == s)
            .ok_or_else(|| format!("unknown dtype `{s}`"))
    }
}

/// Compact ordered set of dtypes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TypeSet(u32);

impl TypeSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        DType::ALL.iter().copied().collect()
    }

    pub fn floats() -> Self {
        DType::ALL.iter().copied().filter(|d| d.is_float()).collect()
    }

    pub fn of(dtypes: &[DType]) -> Self {
        dtypes.iter().copied().collect()
    }

    pub fn insert(&mut self, dtype: DType) {
        self.0 |= 1 << dtype.ordinal();
    }

    pub fn contains(self, dtype: DType) -> bool {
        self.0 & (1 << dtype.ordinal()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn union(self, other: TypeSet) -> TypeSet {
        TypeSet(self.0 | other.0)
    }

    /// Iterates members in canonical dtype order.
    pub fn iter(self) -> impl Iterator<Item = DType> {
        DType::ALL.into_iter().filter(move |d| self.contains(*d))
    }
}

impl FromIterator<DType> for TypeSet {
    fn from_iter<I: IntoIterator<Item = DType>>(iter: I) -> Self {
        let mut set = TypeSet::empty();
        for dtype in iter {
            set.insert(dtype);
        }
        set
    }
}

impl fmt::Display for TypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(DType::as_str).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

impl Serialize for TypeSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for TypeSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let dtypes = Vec::<DType>::deserialize(deserializer)?;
        Ok(dtypes.into_iter().collect())
    }
}

/// Names the execution target a node is placed on (e.g. `cpu`, `cuda`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Backend(Arc<str>);

impl Backend {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::<str>::from(name.into()))
    }

    pub fn cpu() -> Self {
        Self::new("cpu")
    }

    pub fn cuda() -> Self {
        Self::new("cuda")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Backend {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Backend {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Backend::new(name))
    }
}

/// Namespaced operator identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId {
    pub op_type: String,
    #[serde(default)]
    pub domain: String,
}

impl OpId {
    pub fn new(op_type: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            domain: domain.into(),
        }
    }

    /// Operator from the default domain.
    pub fn onnx(op_type: impl Into<String>) -> Self {
        Self::new(op_type, DEFAULT_DOMAIN)
    }

    pub fn cast() -> Self {
        Self::onnx(CAST_OP_TYPE)
    }

    pub fn is_cast(&self) -> bool {
        self.op_type == CAST_OP_TYPE && self.domain == DEFAULT_DOMAIN
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.domain.is_empty() {
            f.write_str(&self.op_type)
        } else {
            write!(f, "{}::{}", self.domain, self.op_type)
        }
    }
}

/// Node attribute payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attribute {
    Int(i64),
    Float(f64),
    String(String),
    Ints(Vec<i64>),
    DType(DType),
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Int(value) => write!(f, "{value}"),
            Attribute::Float(value) => write!(f, "{value}"),
            Attribute::String(value) => write!(f, "{value:?}"),
            Attribute::Ints(values) => {
                let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Attribute::DType(dtype) => write!(f, "{dtype}"),
        }
    }
}

/// Names a symbolic dynamic dimension (e.g. `?B`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DimSymbol(Arc<str>);

impl DimSymbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::<str>::from(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Represents a single axis extent in a tensor shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dimension {
    Static(usize),
    Dynamic(DimSymbol),
}

impl Dimension {
    pub fn from_usize(value: usize) -> Self {
        Self::Static(value)
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        Self::Dynamic(DimSymbol::new(name))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Static(value) => write!(f, "{value}"),
            Dimension::Dynamic(symbol) => write!(f, "?{}", symbol.as_str()),
        }
    }
}

/// Logical tensor shape as an ordered list of dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<Dimension>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<Dimension>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn from_static(dims: &[usize]) -> Self {
        Self::new(dims.iter().copied().map(Dimension::Static).collect::<Vec<_>>())
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    /// Returns static dimensions when all dims are static.
    pub fn static_dims(&self) -> Option<Vec<usize>> {
        let mut dims = Vec::with_capacity(self.dims.len());
        for dim in &self.dims {
            match dim {
                Dimension::Static(value) => dims.push(*value),
                Dimension::Dynamic(_) => return None,
            }
        }
        Some(dims)
    }

    /// Returns `true` when both shapes are fully static and differ.
    pub fn conflicts_with(&self, other: &Shape) -> bool {
        match (self.static_dims(), other.static_dims()) {
            (Some(lhs), Some(rhs)) => lhs != rhs,
            _ => self.rank() != other.rank(),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(|d| d.to_string()).collect();
        f.write_str(&dims.join("x"))
    }
}

/// Element type plus optional shape, the unit of type propagation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub dtype: DType,
    pub shape: Option<Shape>,
}

impl TypeInfo {
    pub fn new(dtype: DType, shape: Option<Shape>) -> Self {
        Self { dtype, shape }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_set_iterates_in_canonical_order() {
        let set = TypeSet::of(&[DType::F32, DType::Bool, DType::F16]);
        let items: Vec<DType> = set.iter().collect();
        assert_eq!(items, vec![DType::Bool, DType::F16, DType::F32]);
        assert_eq!(set.len(), 3);
        assert_eq!(set.to_string(), "{bool, f16, f32}");
    }

    #[test]
    fn dtype_names_round_trip_through_from_str() {
        for dtype in DType::ALL {
            assert_eq!(dtype.as_str().parse::<DType>(), Ok(dtype));
        }
        assert!("float".parse::<DType>().is_err());
    }
}
