//! Builtins prelude and the standard-variable table
use crate::types::{DataType, Variability};

/// Source text compiled ahead of every shader
///
/// Top-level declarations here become `constant` symbols, which are only
/// written to the assembly listing when a shader refers to them.
pub const PRELUDE: &str = "\
uniform float PI = 3.14159265;
";

/// Number of lines in [`PRELUDE`], used to map errors back onto user lines
pub fn prelude_lines() -> usize {
    PRELUDE.lines().count()
}

/// Engine-provided variables that every shader may use without declaring
///
/// A grid built by [`Grid::with_standard_globals`](crate::grid::Grid::with_standard_globals)
/// carries every one of these.
pub const STANDARD_VARIABLES: &[(&str, DataType, Variability)] = &[
    ("P", DataType::Point, Variability::Varying),
    ("N", DataType::Normal, Variability::Varying),
    ("Ng", DataType::Normal, Variability::Varying),
    ("I", DataType::Vector, Variability::Varying),
    ("E", DataType::Point, Variability::Uniform),
    ("Cs", DataType::Color, Variability::Varying),
    ("Os", DataType::Color, Variability::Varying),
    ("Ci", DataType::Color, Variability::Varying),
    ("Oi", DataType::Color, Variability::Varying),
    ("s", DataType::Float, Variability::Varying),
    ("t", DataType::Float, Variability::Varying),
    ("u", DataType::Float, Variability::Varying),
    ("v", DataType::Float, Variability::Varying),
    ("du", DataType::Float, Variability::Varying),
    ("dv", DataType::Float, Variability::Varying),
    ("dPdu", DataType::Vector, Variability::Varying),
    ("dPdv", DataType::Vector, Variability::Varying),
    ("L", DataType::Vector, Variability::Varying),
    ("Cl", DataType::Color, Variability::Varying),
    ("ncomps", DataType::Float, Variability::Uniform),
    ("time", DataType::Float, Variability::Uniform),
];
