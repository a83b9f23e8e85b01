//! Symbol types shared by the compiler, assembler, binder, and VM
use crate::Error;
use nalgebra::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};

/// Data type of a shading-language symbol
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum DataType {
    Float,
    Point,
    Color,
    Vector,
    Normal,
    String,
    Matrix,
}

impl DataType {
    /// Checks whether this type is stored as a 3-component vector
    pub fn is_triple(&self) -> bool {
        matches!(
            self,
            DataType::Point
                | DataType::Color
                | DataType::Vector
                | DataType::Normal
        )
    }

    /// Number of floats used to write a default value of this type
    pub fn component_count(&self) -> usize {
        match self {
            DataType::Float => 1,
            DataType::Point
            | DataType::Color
            | DataType::Vector
            | DataType::Normal => 3,
            DataType::Matrix => 16,
            DataType::String => 0,
        }
    }
}

/// Where a symbol's storage comes from at shading time
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum StorageClass {
    /// Read-only literal owned by the shader
    Constant,
    /// Per-grid standard variable (`P`, `N`, `Ci`, ...)
    Global,
    /// Shader parameter, overridable by the grid or by call-time values
    Parameter,
    /// Scratch storage allocated for each invocation
    Temporary,
}

/// Whether a value may differ per point
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Variability {
    Uniform,
    Varying,
}

/// Kind of shader, as named on the first line of an assembly listing
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ShaderType {
    Surface,
    Light,
    Displacement,
    Volume,
    Transformation,
    Imager,
}

/// Owned value storage for a symbol
///
/// Uniform values hold a single element; varying values hold one element per
/// point slot in the grid (see [`GridLayout::slot_count`](crate::grid::GridLayout::slot_count)).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Data {
    Float(Vec<f32>),
    Vector(Vec<Vector3<f32>>),
    String(Vec<String>),
    Matrix(Vec<Matrix4<f32>>),
}

impl Data {
    /// Builds zero-filled storage (identity for matrices)
    pub fn new(ty: DataType, len: usize) -> Self {
        match ty {
            DataType::Float => Data::Float(vec![0.0; len]),
            DataType::String => Data::String(vec![String::new(); len]),
            DataType::Matrix => Data::Matrix(vec![Matrix4::identity(); len]),
            _ => Data::Vector(vec![Vector3::zeros(); len]),
        }
    }

    /// Returns the number of elements
    pub fn len(&self) -> usize {
        match self {
            Data::Float(v) => v.len(),
            Data::Vector(v) => v.len(),
            Data::String(v) => v.len(),
            Data::Matrix(v) => v.len(),
        }
    }

    /// Checks whether the storage is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks whether this storage can hold values of the given type
    pub fn holds(&self, ty: DataType) -> bool {
        matches!(
            (self, ty),
            (Data::Float(..), DataType::Float)
                | (Data::String(..), DataType::String)
                | (Data::Matrix(..), DataType::Matrix)
        ) || (matches!(self, Data::Vector(..)) && ty.is_triple())
    }

    pub fn as_floats(&self) -> Option<&[f32]> {
        match self {
            Data::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_floats_mut(&mut self) -> Option<&mut [f32]> {
        match self {
            Data::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vectors(&self) -> Option<&[Vector3<f32>]> {
        match self {
            Data::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vectors_mut(&mut self) -> Option<&mut [Vector3<f32>]> {
        match self {
            Data::Vector(v) => Some(v),
            _ => None,
        }
    }

    /// Parses a default value for a symbol of type `ty`
    ///
    /// Numeric types accept either the full number of components or a
    /// single value, which is broadcast (`1` becomes `(1, 1, 1)` for a
    /// color, or the identity matrix for a matrix).  Strings must be
    /// double-quoted.
    pub fn parse_literal(ty: DataType, text: &str) -> Result<Self, String> {
        let text = text.trim();
        if ty == DataType::String {
            let inner = text
                .strip_prefix('"')
                .and_then(|t| t.strip_suffix('"'))
                .ok_or_else(|| format!("expected quoted string, got `{text}`"))?;
            return Ok(Data::String(vec![unescape(inner)]));
        }
        let vals = text
            .split_whitespace()
            .map(|t| {
                t.trim_end_matches(['f', 'F', 'd', 'D'])
                    .parse::<f32>()
                    .map_err(|_| format!("invalid number `{t}`"))
            })
            .collect::<Result<Vec<f32>, _>>()?;
        Self::from_components(ty, &vals)
    }

    /// Builds a single-element value from its float components
    ///
    /// Takes either the full component count for `ty` or one value to
    /// broadcast.
    pub fn from_components(ty: DataType, vals: &[f32]) -> Result<Self, String> {
        let n = ty.component_count();
        if n == 0 || (vals.len() != n && vals.len() != 1) {
            return Err(format!(
                "got {} values, but {n} (or 1) are required for {ty}",
                vals.len()
            ));
        }
        let get = |i: usize| if vals.len() == 1 { vals[0] } else { vals[i] };
        Ok(match ty {
            DataType::Float => Data::Float(vec![vals[0]]),
            DataType::Matrix if vals.len() == 1 => {
                Data::Matrix(vec![Matrix4::identity() * vals[0]])
            }
            DataType::Matrix => {
                Data::Matrix(vec![Matrix4::from_row_slice(vals)])
            }
            _ => Data::Vector(vec![Vector3::new(get(0), get(1), get(2))]),
        })
    }

    /// Formats the first element as an assembly literal
    pub fn to_literal(&self) -> String {
        match self {
            Data::Float(v) => format!("{}", v[0]),
            Data::Vector(v) => format!("{} {} {}", v[0].x, v[0].y, v[0].z),
            Data::String(v) => format!("\"{}\"", escape(&v[0])),
            Data::Matrix(v) => v[0]
                .transpose()
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(c) => out.push(c),
            None => out.push('\\'),
        }
    }
    out
}

/// A named, typed, storage-classified variable
///
/// Used for shader symbol tables, grid globals, and call-time parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub storage: StorageClass,
    pub ty: DataType,
    pub variability: Variability,
    /// Literal value (constants), default value (parameters), or per-point
    /// storage (grid globals)
    pub value: Option<Data>,
}

impl Symbol {
    /// Builds a new symbol without a value
    pub fn new(
        name: &str,
        storage: StorageClass,
        ty: DataType,
        variability: Variability,
    ) -> Self {
        Self {
            name: name.to_owned(),
            storage,
            ty,
            variability,
            value: None,
        }
    }

    /// Attaches a value to the symbol
    pub fn with_value(mut self, value: Data) -> Self {
        self.value = Some(value);
        self
    }

    /// Checks whether the symbol is varying
    pub fn is_varying(&self) -> bool {
        self.variability == Variability::Varying
    }

    /// Checks that `other` has exactly the same type and variability
    ///
    /// Mismatches are binding errors, never silent coercions.
    pub fn check_match(&self, other: &Symbol) -> Result<(), Error> {
        if self.ty != other.ty {
            return Err(Error::TypeMismatch {
                name: self.name.clone(),
                expected: self.ty,
                found: other.ty,
            });
        }
        if self.variability != other.variability {
            return Err(Error::VariabilityMismatch {
                name: self.name.clone(),
                expected: self.variability,
                found: other.variability,
            });
        }
        Ok(())
    }
}
