//! Bytecode execution over a bound grid
use super::{Lighting, MAX_CALL_DEPTH, bind::DataSegment, noise};
use crate::{
    Error,
    asm::{OpWord, Opcode, OperandWord, Shader, Word},
    grid::{BLOCK_WIDTH, GridLayout},
    types::Data,
};
use arrayvec::ArrayVec;
use nalgebra::Vector3;

/// Execution state of a [`RunContext`]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum State {
    /// About to decode the instruction at the program counter
    Fetch,
    /// An instruction is decoded and ready to execute
    Dispatch,
    /// Popping a call frame
    Return,
    /// Finished normally
    Halted,
    /// Stopped by a fault
    Faulted,
}

/// Element type of a value slot
trait Lane: Copy {
    fn slice(d: &Data) -> Option<&[Self]>;
    fn slice_mut(d: &mut Data) -> Option<&mut [Self]>;
}

impl Lane for f32 {
    fn slice(d: &Data) -> Option<&[Self]> {
        d.as_floats()
    }
    fn slice_mut(d: &mut Data) -> Option<&mut [Self]> {
        d.as_floats_mut()
    }
}

impl Lane for Vector3<f32> {
    fn slice(d: &Data) -> Option<&[Self]> {
        d.as_vectors()
    }
    fn slice_mut(d: &mut Data) -> Option<&mut [Self]> {
        d.as_vectors_mut()
    }
}

fn splat(s: f32) -> Vector3<f32> {
    Vector3::repeat(s)
}

fn compare(b: bool) -> f32 {
    if b { 1.0 } else { 0.0 }
}

/// Execution state for one shader invocation over one grid
pub struct RunContext<'a> {
    shader: &'a Shader,
    seg: DataSegment<'a>,
    lighting: &'a Lighting,
    layout: GridLayout,
    /// Per-slot active mask; padding slots are never active
    active: Vec<bool>,

    state: State,
    pc: usize,
    stack: ArrayVec<usize, MAX_CALL_DEPTH>,
    op: Option<OpWord>,
    operands: ArrayVec<OperandWord, 4>,
}

impl<'a> RunContext<'a> {
    pub(crate) fn new(
        shader: &'a Shader,
        seg: DataSegment<'a>,
        layout: GridLayout,
        lighting: &'a Lighting,
    ) -> Self {
        let active = (0..layout.slot_count())
            .map(|i| !layout.is_padding(i))
            .collect();
        Self {
            shader,
            seg,
            lighting,
            layout,
            active,
            state: State::Fetch,
            pc: shader.start_pc(),
            stack: ArrayVec::new(),
            op: None,
            operands: ArrayVec::new(),
        }
    }

    /// Returns the bound data segment
    pub fn data(&self) -> &DataSegment<'a> {
        &self.seg
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Enables or disables writes to the point at slot `i`
    ///
    /// Padding slots stay inactive regardless.
    pub fn set_active(&mut self, i: usize, on: bool) {
        if !self.layout.is_padding(i) {
            if let Some(a) = self.active.get_mut(i) {
                *a = on;
            }
        }
    }

    /// Returns the per-point step of operand `k` of the decoded instruction
    ///
    /// This is 1 for varying operands and 0 for uniform ones.
    pub fn operand_step(&self, k: usize) -> Option<usize> {
        self.operands.get(k).map(OperandWord::step)
    }

    /// Returns the decoded opcode, between [`State::Dispatch`] and execution
    pub fn opcode(&self) -> Option<Opcode> {
        self.op.and_then(|op| op.opcode())
    }

    /// Runs until the shader halts or faults
    pub fn run(&mut self) -> Result<(), Error> {
        loop {
            match self.step()? {
                State::Halted => return Ok(()),
                State::Faulted => return Err(self.fault("execution already faulted")),
                _ => (),
            }
        }
    }

    /// Advances the state machine by one transition
    pub fn step(&mut self) -> Result<State, Error> {
        let next = match self.state {
            State::Fetch => self.fetch(),
            State::Dispatch => self.dispatch(),
            State::Return => Ok(match self.stack.pop() {
                Some(pc) => {
                    self.pc = pc;
                    State::Fetch
                }
                None => State::Halted,
            }),
            s @ (State::Halted | State::Faulted) => Ok(s),
        };
        match next {
            Ok(s) => {
                self.state = s;
                Ok(s)
            }
            Err(e) => {
                self.state = State::Faulted;
                Err(e)
            }
        }
    }

    fn line(&self) -> usize {
        self.op.map(|op| op.line as usize).unwrap_or(0)
    }

    fn fault<S: Into<String>>(&self, message: S) -> Error {
        Error::fault(self.line(), message)
    }

    fn fetch(&mut self) -> Result<State, Error> {
        let code = self.shader.code();
        let Some(word) = code.get(self.pc) else {
            return Ok(State::Halted);
        };
        let Word::Op(op) = *word else {
            return Err(Error::fault(0, format!("expected an opcode at word {}", self.pc)));
        };
        self.op = Some(op);
        self.operands.clear();
        let n = op.operand_count as usize;
        for i in 0..n {
            match code.get(self.pc + 1 + i) {
                Some(Word::Operand(o)) if !self.operands.is_full() => self.operands.push(*o),
                _ => return Err(self.fault("truncated instruction")),
            }
        }
        self.pc += 1 + n;
        Ok(State::Dispatch)
    }

    /// Returns the decoded operands as a fixed-size array
    fn args<const N: usize>(&self) -> Result<[OperandWord; N], Error> {
        self.operands
            .as_slice()
            .try_into()
            .map_err(|_| self.fault(format!("expected {N} operands, found {}", self.operands.len())))
    }

    /// Checks that a uniform destination is only fed by uniform sources
    fn check_sources(&self, dst: OperandWord, srcs: &[OperandWord]) -> Result<(), Error> {
        if !dst.varying && srcs.iter().any(|s| s.varying) {
            let name = self
                .seg
                .slot(dst.symbol as usize)
                .map(|s| s.symbol.name.as_str())
                .unwrap_or("?");
            return Err(self.fault(format!("varying value written to uniform `{name}`")));
        }
        Ok(())
    }

    /// Describes an operand type mismatch in the decoded instruction
    fn mismatch(&self) -> String {
        match (self.op, self.opcode()) {
            (Some(op), Some(opcode)) => format!(
                "operand type mismatch in `{opcode}` (destination is {})",
                op.dest_type
            ),
            _ => "operand type mismatch".to_owned(),
        }
    }

    fn any_active(&self) -> bool {
        self.active.iter().any(|a| *a)
    }

    /// Applies `f` at every active point, block by block
    ///
    /// `f` receives the slot index and returns the value to write there.
    fn apply<D: Lane, const N: usize>(
        &mut self,
        dst: OperandWord,
        srcs: [OperandWord; N],
        f: impl Fn(usize, [&Data; N]) -> Option<D>,
    ) -> Result<(), Error> {
        self.check_sources(dst, &srcs)?;
        let uniform_write = !dst.varying && self.any_active();
        let active = &self.active;
        let line = self.line();
        let mismatch = self.mismatch();
        let r = self.seg.with_dst(
            dst.symbol as usize,
            srcs.map(|s| s.symbol as usize),
            |out, data| -> Result<(), String> {
                let out = D::slice_mut(out).ok_or_else(|| mismatch.clone())?;
                if !dst.varying {
                    if uniform_write {
                        out[0] = f(0, data).ok_or_else(|| mismatch.clone())?;
                    }
                    return Ok(());
                }
                for (block, (out, mask)) in out
                    .chunks_mut(BLOCK_WIDTH)
                    .zip(active.chunks(BLOCK_WIDTH))
                    .enumerate()
                {
                    for (lane, (o, &on)) in out.iter_mut().zip(mask).enumerate() {
                        if on {
                            *o = f(block * BLOCK_WIDTH + lane, data)
                                .ok_or_else(|| mismatch.clone())?;
                        }
                    }
                }
                Ok(())
            },
        );
        match r {
            Ok(Ok(())) => Ok(()),
            Ok(Err(m)) | Err(m) => Err(Error::fault(line, m)),
        }
    }

    fn unary<D: Lane, A: Lane>(&mut self, f: impl Fn(A) -> D) -> Result<(), Error> {
        let [d, a] = self.args()?;
        let sa = a.step();
        self.apply(d, [a], |i, [x]| Some(f(*A::slice(x)?.get(i * sa)?)))
    }

    fn binary<D: Lane, A: Lane, B: Lane>(&mut self, f: impl Fn(A, B) -> D) -> Result<(), Error> {
        let [d, a, b] = self.args()?;
        let (sa, sb) = (a.step(), b.step());
        self.apply(d, [a, b], |i, [x, y]| {
            Some(f(*A::slice(x)?.get(i * sa)?, *B::slice(y)?.get(i * sb)?))
        })
    }

    fn ternary<D: Lane, A: Lane, B: Lane, C: Lane>(
        &mut self,
        f: impl Fn(A, B, C) -> D,
    ) -> Result<(), Error> {
        let [d, a, b, c] = self.args()?;
        let (sa, sb, sc) = (a.step(), b.step(), c.step());
        self.apply(d, [a, b, c], |i, [x, y, z]| {
            Some(f(
                *A::slice(x)?.get(i * sa)?,
                *B::slice(y)?.get(i * sb)?,
                *C::slice(z)?.get(i * sc)?,
            ))
        })
    }

    fn nullary<D: Lane>(&mut self, f: impl Fn() -> D) -> Result<(), Error> {
        let [d] = self.args()?;
        self.apply(d, [], |_, []| Some(f()))
    }

    /// Updates the destination in place from one source
    fn modify<D: Lane, A: Lane>(&mut self, f: impl Fn(D, A) -> D) -> Result<(), Error> {
        let [d, a] = self.args()?;
        let (sd, sa) = (d.step(), a.step());
        self.apply(d, [d, a], |i, [old, x]| {
            Some(f(*D::slice(old)?.get(i * sd)?, *A::slice(x)?.get(i * sa)?))
        })
    }

    /// Returns a read-only copy of a float global and its step
    fn float_global(&self, name: &str) -> Result<(Vec<f32>, usize), Error> {
        let d = self
            .seg
            .lookup(name)
            .and_then(Data::as_floats)
            .ok_or_else(|| self.fault(format!("missing float global `{name}`")))?;
        Ok((d.to_vec(), (d.len() > 1) as usize))
    }

    fn faceforward(&mut self) -> Result<(), Error> {
        let [d, n, i] = self.args()?;
        let ng = self
            .seg
            .lookup("Ng")
            .and_then(Data::as_vectors)
            .ok_or_else(|| self.fault("faceforward needs `Ng`"))?
            .to_vec();
        let sg = (ng.len() > 1) as usize;
        let (sn, si) = (n.step(), i.step());
        self.apply(d, [n, i], |k, [nv, iv]| {
            let nv = *nv.as_vectors()?.get(k * sn)?;
            let iv = *iv.as_vectors()?.get(k * si)?;
            let g = ng.get(k * sg)?;
            Some(if (-iv).dot(g) < 0.0 { -nv } else { nv })
        })
    }

    /// Unit normal from finite differences of `P` across the grid
    ///
    /// Each point differences against its left and upper neighbours; the
    /// first column and row use the right and lower neighbours instead.
    /// Degenerate patches produce a zero normal.
    fn calculate_normal(&mut self) -> Result<(), Error> {
        let [d, p] = self.args()?;
        if !d.varying || !p.varying {
            return Err(self.fault("calculatenormal needs varying operands"));
        }
        let layout = self.layout;
        if layout.x_dim < 2 || layout.y_dim < 2 {
            return Err(self.fault("calculatenormal needs at least a 2x2 grid"));
        }
        let (du, su) = self.float_global("du")?;
        let (dv, sv) = self.float_global("dv")?;
        self.apply(d, [p], |k, [pd]| {
            let pd = pd.as_vectors()?;
            let (x, y) = layout.position(k)?;
            let at = |x, y| pd.get(layout.index(x, y)).copied();
            let dpdu = if x == 0 {
                at(1, y)? - at(0, y)?
            } else {
                at(x, y)? - at(x - 1, y)?
            };
            let dpdv = if y == 0 {
                at(x, 1)? - at(x, 0)?
            } else {
                at(x, y)? - at(x, y - 1)?
            };
            let dpdu = dpdu / *du.get(k * su)?;
            let dpdv = dpdv / *dv.get(k * sv)?;
            let n = dpdu.cross(&dpdv);
            Some(n.try_normalize(0.0).unwrap_or(n))
        })
    }

    fn call(&mut self) -> Result<State, Error> {
        let [f] = self.args()?;
        let target = self
            .shader
            .functions()
            .get(f.symbol as usize)
            .ok_or_else(|| self.fault(format!("unknown function index {}", f.symbol)))?
            .pc;
        self.stack
            .try_push(self.pc)
            .map_err(|_| self.fault("call stack overflow"))?;
        self.pc = target;
        Ok(State::Fetch)
    }

    fn dispatch(&mut self) -> Result<State, Error> {
        let op = self.op.ok_or_else(|| self.fault("nothing to dispatch"))?;
        let opcode = op
            .opcode()
            .ok_or_else(|| self.fault(format!("unknown opcode {}", op.opcode)))?;
        let lights = self.lighting;
        type V = Vector3<f32>;
        use Opcode::*;
        match opcode {
            MovSS | Ld1 => self.unary(|a: f32| a),
            MovVS => self.unary(splat),
            MovVV => self.unary(|a: V| a),
            AbsSS => self.unary(f32::abs),
            AbsVS => self.unary(|a: f32| splat(a.abs())),
            AbsVV => self.unary(|a: V| a.abs()),

            AddSS => self.binary(|a: f32, b: f32| a + b),
            AddVS => self.binary(|a: V, b: f32| a.add_scalar(b)),
            AddSV => self.binary(|a: f32, b: V| b.add_scalar(a)),
            AddVV => self.binary(|a: V, b: V| a + b),
            SubSS => self.binary(|a: f32, b: f32| a - b),
            SubVS => self.binary(|a: V, b: f32| a.add_scalar(-b)),
            SubSV => self.binary(|a: f32, b: V| splat(a) - b),
            SubVV => self.binary(|a: V, b: V| a - b),
            MulSS => self.binary(|a: f32, b: f32| a * b),
            MulVS => self.binary(|a: V, b: f32| a * b),
            MulSV => self.binary(|a: f32, b: V| b * a),
            MulVV => self.binary(|a: V, b: V| a.component_mul(&b)),
            DivSS => self.binary(|a: f32, b: f32| a / b),
            DivVS => self.binary(|a: V, b: f32| a / b),
            DivSV => self.binary(|a: f32, b: V| splat(a).component_div(&b)),
            DivVV => self.binary(|a: V, b: V| a.component_div(&b)),

            MovVS3 | Ld3 => self.ternary(|x: f32, y: f32, z: f32| V::new(x, y, z)),

            CmpLT => self.binary(|a: f32, b: f32| compare(a < b)),
            CmpLE => self.binary(|a: f32, b: f32| compare(a <= b)),
            CmpGT => self.binary(|a: f32, b: f32| compare(a > b)),
            CmpGE => self.binary(|a: f32, b: f32| compare(a >= b)),
            CmpEQ => self.binary(|a: f32, b: f32| compare(a == b)),
            CmpNE => self.binary(|a: f32, b: f32| compare(a != b)),

            Noise11 => self.unary(|a: f32| noise::noise(noise::domain1(a))),
            Noise12 => self.binary(|a: f32, b: f32| noise::noise(noise::domain2(a, b))),
            Noise13 => self.unary(noise::noise),
            Noise31 => self.unary(|a: f32| noise::noise3(noise::domain1(a))),
            Noise32 => self.binary(|a: f32, b: f32| noise::noise3(noise::domain2(a, b))),
            Noise33 => self.unary(noise::noise3),

            GetVX => self.unary(|a: V| a.x),
            GetVY => self.unary(|a: V| a.y),
            GetVZ => self.unary(|a: V| a.z),
            SetVX => self.modify(|mut v: V, s: f32| {
                v.x = s;
                v
            }),
            SetVY => self.modify(|mut v: V, s: f32| {
                v.y = s;
                v
            }),
            SetVZ => self.modify(|mut v: V, s: f32| {
                v.z = s;
                v
            }),

            Normalize => {
                self.unary(|a: V| a.try_normalize(0.0).unwrap_or_else(V::zeros))
            }
            FaceForward => self.faceforward(),
            Diffuse => self.unary(|n: V| lights.diffuse(n)),
            Ambient => self.nullary(|| lights.ambient),
            CalculateNormal => self.calculate_normal(),

            Call => return self.call(),
            Ret => return Ok(State::Return),
        }?;
        Ok(State::Fetch)
    }

    /// Releases the data segment, returning the number of owned slots freed
    pub fn unbind(self) -> usize {
        self.seg.unbind()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        ErrorKind,
        grid::Grid,
        vm::ShaderInstance,
    };
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn shader(code: &str) -> Arc<Shader> {
        let text = format!(
            "surface\n.data\n\
             Ci global varying color\n\
             N global varying normal\n\
             P global varying point\n\
             s global varying float\n\
             a temporary varying float\n\
             u temporary uniform float\n\
             two constant uniform float 2\n\
             .code\n{code}"
        );
        Arc::new(Shader::from_asm(&text, "test").unwrap())
    }

    #[test]
    fn test_uniform_write() {
        let s = shader("addss u two two\nmulss a s u\n");
        let inst = ShaderInstance::new(s);
        let mut grid = Grid::plane(GridLayout::new(3, 2));
        let lights = Lighting::default();
        let mut ctx = inst.bind(&mut grid, &lights).unwrap();
        ctx.run().unwrap();
        assert_eq!(ctx.state(), State::Halted);
        let u = ctx.data().data(5).unwrap().as_floats().unwrap();
        assert_eq!(u, &[4.0]);
        let a = ctx.data().data(4).unwrap().as_floats().unwrap();
        assert_relative_eq!(a[2], 4.0);
        assert_relative_eq!(a[1], 2.0);
    }

    #[test]
    fn test_varying_into_uniform() {
        let s = shader("movss u s\n");
        let inst = ShaderInstance::new(s);
        let mut grid = Grid::plane(GridLayout::new(2, 2));
        let lights = Lighting::default();
        let mut ctx = inst.bind(&mut grid, &lights).unwrap();
        let e = ctx.run().unwrap_err();
        assert_eq!(e.line(), Some(11));
        assert_eq!(ctx.state(), State::Faulted);
    }

    #[test]
    fn test_read_only() {
        let mut grid = Grid::plane(GridLayout::new(2, 2));
        let lights = Lighting::default();

        // `two` is uniform, so the variability check fires first
        let inst = ShaderInstance::new(shader("movss two s\n"));
        let e = inst.shade(&mut grid, &lights).unwrap_err();
        assert!(e.to_string().contains("varying"));

        let inst = ShaderInstance::new(shader("movss two two\n"));
        let e = inst.shade(&mut grid, &lights).unwrap_err();
        assert!(e.to_string().contains("read-only"));
        assert_eq!(e.kind(), ErrorKind::Runtime);
        assert_eq!(e.line(), Some(11));
    }

    /// Assembles `code`, lets `patch` corrupt the words, then runs it
    fn run_patched(code: &str, patch: impl FnOnce(&mut [Word])) -> Error {
        let mut s = (*shader(code)).clone();
        patch(s.code_mut());
        let inst = ShaderInstance::new(Arc::new(s));
        let mut grid = Grid::plane(GridLayout::new(2, 2));
        let e = inst.shade(&mut grid, &Lighting::default()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Runtime);
        e
    }

    #[test]
    fn test_faults() {
        let e = run_patched("movss a s\n", |code| {
            if let Word::Op(op) = &mut code[0] {
                op.opcode = 250;
            }
        });
        assert!(e.to_string().contains("unknown opcode 250"));
        assert_eq!(e.line(), Some(11));

        let e = run_patched("movss a s\nret\n", |code| {
            if let Word::Op(op) = &mut code[0] {
                op.operand_count = 1;
            }
        });
        assert!(e.to_string().contains("expected 2 operands, found 1"));
        assert_eq!(e.line(), Some(11));

        let e = run_patched("movss a s\n", |code| {
            if let Word::Operand(o) = &mut code[2] {
                o.symbol = 999;
            }
        });
        assert!(e.to_string().contains("no symbol at index 999"));
        assert_eq!(e.line(), Some(11));

        let e = run_patched("movss a s\n", |code| code[1] = code[0]);
        assert!(e.to_string().contains("truncated instruction"));
    }

    #[test]
    fn test_type_mismatch() {
        let inst = ShaderInstance::new(shader("movss a s\nmovvv Ci s\n"));
        let mut grid = Grid::plane(GridLayout::new(2, 2));
        let e = inst.shade(&mut grid, &Lighting::default()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Runtime);
        assert_eq!(e.line(), Some(12));
        assert!(
            e.to_string()
                .contains("operand type mismatch in `movvv` (destination is f3)"),
            "{e}"
        );
    }

    #[test]
    fn test_calculate_normal() {
        let s = shader("calculatenormal N P\n");
        let inst = ShaderInstance::new(s);
        let mut grid = Grid::plane(GridLayout::new(4, 3));
        let lights = Lighting::default();
        inst.shade(&mut grid, &lights).unwrap();
        for y in 0..3 {
            for x in 0..4 {
                let n = grid.vector_at("N", x, y).unwrap();
                assert_relative_eq!(n, Vector3::z(), epsilon = 1e-5);
            }
        }

        let mut tiny = Grid::plane(GridLayout::new(1, 4));
        assert!(inst.shade(&mut tiny, &lights).is_err());

        // Stretched patches still produce unit normals
        let mut grid = Grid::plane(GridLayout::new(4, 3));
        let p = grid.data_mut("P").and_then(Data::as_vectors_mut).unwrap();
        for p in p.iter_mut() {
            p.x *= 3.0;
            p.y *= 0.5;
        }
        inst.shade(&mut grid, &lights).unwrap();
        for y in 0..3 {
            for x in 0..4 {
                let n = grid.vector_at("N", x, y).unwrap();
                assert_relative_eq!(n.norm(), 1.0, epsilon = 1e-5);
                assert_relative_eq!(n, Vector3::z(), epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_calls() {
        let text = "surface\n.data\nCi global varying color\n\
                    one constant uniform float 1\n.code\n\
                    function paint\nmovvs Ci one\nret\n\
                    surface main\ncall paint\nret\nmovvs Ci 0\n";
        let s = Arc::new(Shader::from_asm(text, "calls").unwrap());
        let inst = ShaderInstance::new(s);
        let mut grid = Grid::plane(GridLayout::new(2, 2));
        inst.shade(&mut grid, &Lighting::default()).unwrap();
        assert_eq!(grid.vector_at("Ci", 1, 1), Some(Vector3::repeat(1.0)));
    }

    #[test]
    fn test_recursion_overflow() {
        let text = "surface\n.code\nsurface main\ncall main\nret\n";
        let s = Arc::new(Shader::from_asm(text, "deep").unwrap());
        let inst = ShaderInstance::new(s);
        let mut grid = Grid::plane(GridLayout::new(2, 2));
        let e = inst.shade(&mut grid, &Lighting::default()).unwrap_err();
        assert!(e.to_string().contains("overflow"));
        assert_eq!(e.kind(), ErrorKind::Runtime);
        assert_eq!(e.line(), Some(4));
    }
}
