//! `rsl` is a toolchain for a small RenderMan-style shading language: a
//! compiler from shader source to textual assembly, an assembler from that
//! assembly to bytecode, and a VM that runs the bytecode over grids of
//! surface points.
//!
//! The interesting part is the execution model.  A shader runs once per
//! **grid**, not once per point: every instruction processes all points,
//! in fixed-width blocks, with a per-point **active mask** gating writes.
//! Each value is either **uniform** (one value for the whole grid) or
//! **varying** (one value per point), and the two are never silently mixed.
//!
//! # Compiling
//! [`compiler::compile`] turns shader source into an assembly listing.  The
//! listing is an ordinary text format, so shaders may also be written (or
//! tweaked) by hand:
//!
//! ```
//! let asm = rsl::compiler::compile(
//!     "surface red() { Ci = color(1, 0, 0); }",
//!     "red.sl",
//! )?;
//! assert!(asm.contains("movvv"));
//! # Ok::<(), rsl::Error>(())
//! ```
//!
//! # Assembling
//! [`asm::Shader::from_asm`] parses a listing into a symbol table and a flat
//! array of instruction words.  [`asm::Shader::from_rsl`] runs both steps,
//! and [`asm::Shader::from_file`] picks one by file extension.
//!
//! ```
//! use rsl::asm::Shader;
//!
//! let shader = Shader::from_asm(
//!     "surface
//!      .data
//!          Ci global   varying color
//!          A  constant uniform color 1 0 0
//!      .code
//!          movvv Ci A
//!     ",
//!     "red",
//! )?;
//! assert_eq!(shader.symbols().len(), 2);
//! # Ok::<(), rsl::Error>(())
//! ```
//!
//! # Shading
//! A [`grid::Grid`] holds the standard variables (`P`, `N`, `Ci`, ...) for a
//! batch of points.  A [`vm::ShaderInstance`] binds a shader to a grid and
//! runs it, writing results back into the grid's globals:
//!
//! ```
//! use rsl::{asm::Shader, grid::{Grid, GridLayout}, vm::{Lighting, ShaderInstance}};
//! use nalgebra::Vector3;
//! use std::sync::Arc;
//!
//! let shader = Shader::from_rsl("surface red() { Ci = color(1, 0, 0); }", "red")?;
//! let instance = ShaderInstance::new(Arc::new(shader));
//! let mut grid = Grid::plane(GridLayout::new(16, 16));
//! instance.shade(&mut grid, &Lighting::default())?;
//! assert_eq!(grid.vector_at("Ci", 3, 4), Some(Vector3::new(1.0, 0.0, 0.0)));
//! # Ok::<(), rsl::Error>(())
//! ```
//!
//! Binding and runtime failures only affect the invocation that hit them;
//! [`vm::shade_all`] shades many grids in parallel and reports each result
//! separately.
pub mod asm;
pub mod compiler;
pub mod grid;
pub mod types;
pub mod vm;

mod error;
pub use error::{Error, ErrorKind};
