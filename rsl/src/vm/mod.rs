//! Bytecode VM: binding shaders to grids and executing them
//!
//! A [`ShaderInstance`] pairs an assembled [`Shader`] with call-time
//! parameter values.  Shading a grid binds the shader's symbols
//! ([`DataSegment::bind`]), runs the bytecode in a [`RunContext`], and
//! releases the bound storage.  Faults end that invocation only.
use crate::{
    Error,
    asm::Shader,
    grid::Grid,
    types::{Data, DataType, StorageClass, Symbol, Variability},
};
use log::error;
use rayon::prelude::*;
use std::sync::Arc;

mod bind;
mod context;
mod light;
mod noise;

pub use bind::DataSegment;
pub use context::{RunContext, State};
pub use light::{DistantLight, Lighting};

/// Maximum depth of nested function calls
pub const MAX_CALL_DEPTH: usize = 16;

/// A shader together with its call-time parameter values
#[derive(Clone, Debug)]
pub struct ShaderInstance {
    shader: Arc<Shader>,
    params: Vec<Symbol>,
}

impl ShaderInstance {
    pub fn new(shader: Arc<Shader>) -> Self {
        Self {
            shader,
            params: vec![],
        }
    }

    pub fn shader(&self) -> &Shader {
        &self.shader
    }

    /// Sets a uniform call-time parameter, replacing any previous value
    ///
    /// Checked against the shader's declaration when binding.
    pub fn set_parameter(&mut self, name: &str, ty: DataType, value: Data) {
        let sym = Symbol::new(name, StorageClass::Parameter, ty, Variability::Uniform)
            .with_value(value);
        match self.params.iter_mut().find(|p| p.name == name) {
            Some(p) => *p = sym,
            None => self.params.push(sym),
        }
    }

    /// Binds the shader to a grid, ready to run
    pub fn bind<'a>(
        &'a self,
        grid: &'a mut Grid,
        lighting: &'a Lighting,
    ) -> Result<RunContext<'a>, Error> {
        let layout = grid.layout();
        let seg = DataSegment::bind(&self.shader, &self.params, grid)?;
        Ok(RunContext::new(&self.shader, seg, layout, lighting))
    }

    /// Shades one grid, writing results into its globals
    ///
    /// Failures are logged with the shader name and returned; the grid may
    /// be partially shaded after a fault.
    pub fn shade(&self, grid: &mut Grid, lighting: &Lighting) -> Result<(), Error> {
        let r = self.bind(grid, lighting).and_then(|mut ctx| {
            ctx.run()?;
            ctx.unbind();
            Ok(())
        });
        if let Err(e) = &r {
            match e.line() {
                Some(line) => error!("shader `{}` (line {line}): {e}", self.shader.name()),
                None => error!("shader `{}`: {e}", self.shader.name()),
            }
        }
        r
    }
}

/// Shades independent grids in parallel
///
/// Each grid gets its own invocation; a fault in one does not affect the
/// others.
pub fn shade_all(
    instance: &ShaderInstance,
    grids: &mut [Grid],
    lighting: &Lighting,
) -> Vec<Result<(), Error>> {
    grids
        .par_iter_mut()
        .map(|g| instance.shade(g, lighting))
        .collect()
}
