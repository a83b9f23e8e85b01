//! Point grids: the batches of surface points that shaders run over
//!
//! A grid is `x_dim × y_dim` points.  Each row is padded out to a whole
//! number of [`BLOCK_WIDTH`]-point blocks, so varying storage holds
//! [`GridLayout::slot_count`] values; padding slots are never active.
use crate::{
    compiler::STANDARD_VARIABLES,
    types::{Data, DataType, StorageClass, Symbol, Variability},
};
use nalgebra::Vector3;

/// Number of points processed together by one VM dispatch step
pub const BLOCK_WIDTH: usize = 8;

/// 2D shape of a grid, in points
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GridLayout {
    pub x_dim: usize,
    pub y_dim: usize,
}

impl GridLayout {
    pub fn new(x_dim: usize, y_dim: usize) -> Self {
        Self { x_dim, y_dim }
    }

    /// Number of blocks in each row
    pub fn x_blocks(&self) -> usize {
        self.x_dim.div_ceil(BLOCK_WIDTH)
    }

    pub fn block_count(&self) -> usize {
        self.x_blocks() * self.y_dim
    }

    /// Number of storage slots in a varying value, including padding
    pub fn slot_count(&self) -> usize {
        self.block_count() * BLOCK_WIDTH
    }

    /// Number of real (non-padding) points
    pub fn point_count(&self) -> usize {
        self.x_dim * self.y_dim
    }

    /// Slot index of the point at column `x`, row `y`
    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.x_blocks() * BLOCK_WIDTH + x
    }

    /// Returns the `(x, y)` position of a slot, or `None` for padding
    pub fn position(&self, slot: usize) -> Option<(usize, usize)> {
        let row = self.x_blocks() * BLOCK_WIDTH;
        let (x, y) = (slot % row, slot / row);
        (x < self.x_dim && y < self.y_dim).then_some((x, y))
    }

    pub fn is_padding(&self, slot: usize) -> bool {
        self.position(slot).is_none()
    }
}

/// A grid of points with its named global symbols
///
/// Each symbol's `value` holds its storage: one element for uniform symbols,
/// [`GridLayout::slot_count`] elements for varying ones.
#[derive(Clone, Debug)]
pub struct Grid {
    layout: GridLayout,
    symbols: Vec<Symbol>,
}

impl Grid {
    /// Builds an empty grid, with no symbols
    pub fn new(layout: GridLayout) -> Self {
        Self {
            layout,
            symbols: vec![],
        }
    }

    /// Builds a grid carrying every standard variable, zero-initialized
    ///
    /// `du` and `dv` are set to the parametric spacing between points.
    pub fn with_standard_globals(layout: GridLayout) -> Self {
        let mut out = Self::new(layout);
        for &(name, ty, variability) in STANDARD_VARIABLES {
            out.add_symbol(name, ty, variability);
        }
        let step = |d: usize| if d > 1 { 1.0 / (d - 1) as f32 } else { 1.0 };
        let (du, dv) = (step(layout.x_dim), step(layout.y_dim));
        for (name, d) in [("du", du), ("dv", dv)] {
            if let Some(f) = out.data_mut(name).and_then(Data::as_floats_mut) {
                f.fill(d);
            }
        }
        out
    }

    /// Builds a unit square in the XY plane, facing +Z
    ///
    /// `u`, `v`, `s`, and `t` run from 0 to 1 across the grid; the eye sits
    /// above the middle of the square.
    pub fn plane(layout: GridLayout) -> Self {
        let mut out = Self::with_standard_globals(layout);
        let du = if layout.x_dim > 1 { 1.0 / (layout.x_dim - 1) as f32 } else { 0.0 };
        let dv = if layout.y_dim > 1 { 1.0 / (layout.y_dim - 1) as f32 } else { 0.0 };
        let eye = Vector3::new(0.5, 0.5, 1.0);
        if let Some(e) = out.data_mut("E").and_then(Data::as_vectors_mut) {
            e[0] = eye;
        }
        for y in 0..layout.y_dim {
            for x in 0..layout.x_dim {
                let i = layout.index(x, y);
                let (u, v) = (x as f32 * du, y as f32 * dv);
                let p = Vector3::new(u, v, 0.0);
                for (name, value) in [("u", u), ("v", v), ("s", u), ("t", v)] {
                    if let Some(f) = out.data_mut(name).and_then(Data::as_floats_mut) {
                        f[i] = value;
                    }
                }
                let vectors = [
                    ("P", p),
                    ("N", Vector3::z()),
                    ("Ng", Vector3::z()),
                    ("I", p - eye),
                    ("dPdu", Vector3::x()),
                    ("dPdv", Vector3::y()),
                    ("Cs", Vector3::new(1.0, 1.0, 1.0)),
                    ("Os", Vector3::new(1.0, 1.0, 1.0)),
                ];
                for (name, value) in vectors {
                    if let Some(f) = out.data_mut(name).and_then(Data::as_vectors_mut) {
                        f[i] = value;
                    }
                }
            }
        }
        out
    }

    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    /// Adds (or replaces) a zero-initialized global
    pub fn add_symbol(&mut self, name: &str, ty: DataType, variability: Variability) {
        let len = match variability {
            Variability::Uniform => 1,
            Variability::Varying => self.layout.slot_count(),
        };
        let sym = Symbol::new(name, StorageClass::Global, ty, variability)
            .with_value(Data::new(ty, len));
        match self.symbols.iter_mut().find(|s| s.name == name) {
            Some(s) => *s = sym,
            None => self.symbols.push(sym),
        }
    }

    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub(crate) fn symbols_mut(&mut self) -> &mut [Symbol] {
        &mut self.symbols
    }

    pub fn data(&self, name: &str) -> Option<&Data> {
        self.symbol(name).and_then(|s| s.value.as_ref())
    }

    pub fn data_mut(&mut self, name: &str) -> Option<&mut Data> {
        self.symbols
            .iter_mut()
            .find(|s| s.name == name)
            .and_then(|s| s.value.as_mut())
    }

    /// Reads a float global at point `(x, y)`
    pub fn float_at(&self, name: &str, x: usize, y: usize) -> Option<f32> {
        let s = self.symbol(name)?;
        let i = if s.is_varying() { self.layout.index(x, y) } else { 0 };
        s.value.as_ref()?.as_floats()?.get(i).copied()
    }

    /// Reads a vector global at point `(x, y)`
    pub fn vector_at(&self, name: &str, x: usize, y: usize) -> Option<Vector3<f32>> {
        let s = self.symbol(name)?;
        let i = if s.is_varying() { self.layout.index(x, y) } else { 0 };
        s.value.as_ref()?.as_vectors()?.get(i).copied()
    }
}
