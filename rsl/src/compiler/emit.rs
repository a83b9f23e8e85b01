//! Code emitter: resolved tree to textual assembly
use super::{
    registers::{Class, Registers, Temp},
    resolve::{FuncId, Symbols, VarId},
    token::{Keyword, Literal, Operator, StdFunction, TokenClass},
    tree::{NodeId, NodeKind, Tree},
};
use crate::{
    Error,
    types::{Data, DataType, StorageClass},
};
use log::warn;
use std::collections::HashSet;

/// A value that an instruction can read or write
#[derive(Clone, Debug)]
struct Operand {
    name: String,
    class: Class,
    varying: bool,
    /// Set when the operand lives in a temporary that must be released
    temp: Option<Temp>,
}

impl Operand {
    fn from_temp(t: Temp) -> Self {
        Self {
            name: t.name(),
            class: t.class,
            varying: t.varying,
            temp: Some(t),
        }
    }
}

/// Linearizes function bodies into instruction lines
pub struct Emitter<'a> {
    tree: &'a Tree,
    syms: &'a mut Symbols,
    regs: Registers,
    lines: Vec<String>,
    /// Names of every symbol read or written by an instruction
    referenced: HashSet<String>,
}

impl<'a> Emitter<'a> {
    pub fn new(tree: &'a Tree, syms: &'a mut Symbols) -> Self {
        Self {
            tree,
            syms,
            regs: Registers::default(),
            lines: vec![],
            referenced: HashSet::new(),
        }
    }

    /// Returns the emitted `.code` lines, the temporary allocator, and the
    /// set of referenced symbol names
    pub fn finish(self) -> (Vec<String>, Registers, HashSet<String>) {
        (self.lines, self.regs, self.referenced)
    }

    fn emit(&mut self, mnemonic: &str, args: &[&Operand]) {
        let mut line = format!("\t{mnemonic}");
        for a in args {
            line.push('\t');
            line.push_str(&a.name);
            if a.temp.is_none() {
                self.referenced.insert(a.name.clone());
            }
        }
        self.lines.push(line);
    }

    fn release(&mut self, o: &Operand) {
        if let Some(t) = o.temp {
            self.regs.release(t);
        }
    }

    /// Picks the destination for a result: the hint if it fits, else a temp
    fn dest(&mut self, hint: Option<&Operand>, class: Class, varying: bool) -> Operand {
        match hint {
            Some(h) if h.class == class && (h.varying || !varying) => h.clone(),
            _ => Operand::from_temp(self.regs.alloc(class, varying)),
        }
    }

    fn var_operand(&self, v: VarId, line: usize) -> Result<Operand, Error> {
        let var = &self.syms.vars[v];
        let class = match var.ty {
            DataType::Float => Class::Scalar,
            t if t.is_triple() => Class::Vector,
            t => {
                return Err(Error::parse(
                    line,
                    format!("`{}` has type {t}, which can't be used in expressions", var.name),
                ));
            }
        };
        Ok(Operand {
            name: var.name.clone(),
            class,
            varying: var.variability == crate::types::Variability::Varying,
            temp: None,
        })
    }

    /// Emits one function, with its entry label and final `ret`
    pub fn function(&mut self, f: FuncId) -> Result<(), Error> {
        let func = &self.syms.funcs[f];
        self.lines.push(String::new());
        self.lines.push(";====================================".to_owned());
        match func.shader {
            Some(ty) => self.lines.push(format!("{ty} {}", func.name)),
            None => self.lines.push(format!("function {}", func.name)),
        }
        let node = func.node;
        let body = self.tree.children(node).get(1).copied();
        if let Some(body) = body {
            for &s in self.tree.children(body) {
                self.statement(s)?;
            }
        }
        self.lines.push("\tret".to_owned());
        Ok(())
    }

    fn statement(&mut self, id: NodeId) -> Result<(), Error> {
        let tree = self.tree;
        let line = tree.line(id);
        let node = tree.node(id);
        if node.kind == NodeKind::Block {
            return Err(Error::parse(line, "nested blocks are not supported"));
        }
        let Some(tok) = &node.token else {
            return Ok(());
        };
        match node.kind {
            NodeKind::FuncCall => match tok.class {
                TokenClass::Unknown => {
                    let args = self.args(id);
                    if !args.is_empty() {
                        return Err(Error::parse(
                            line,
                            format!("function `{}` takes no arguments", tok.text),
                        ));
                    }
                    self.lines.push(format!("\tcall\t{}", tok.text));
                    Ok(())
                }
                TokenClass::StdFunction(
                    f @ (StdFunction::SetXComp
                    | StdFunction::SetYComp
                    | StdFunction::SetZComp),
                ) => self.set_comp(id, f),
                _ => {
                    warn!("line {line}: skipping call to `{}` without assignment", tok.text);
                    Ok(())
                }
            },
            _ if tok.op().is_some_and(|o| o.is_assignment()) => {
                let dst = self.assign(id)?;
                self.release(&dst);
                Ok(())
            }
            _ if tok.keyword() == Some(Keyword::Return) && node.children.is_empty() => {
                self.lines.push("\tret".to_owned());
                Ok(())
            }
            _ => {
                warn!("line {line}: skipping statement without assignment");
                Ok(())
            }
        }
    }

    /// Returns the argument nodes of a call
    fn args(&self, id: NodeId) -> Vec<NodeId> {
        self.tree
            .children(id)
            .first()
            .map(|p| self.tree.children(*p).to_vec())
            .unwrap_or_default()
    }

    /// Resolves the left side of an assignment to a writable variable
    fn lvalue(&self, id: NodeId) -> Result<Operand, Error> {
        let line = self.tree.line(id);
        let node = self.tree.node(id);
        let v = match node.var {
            Some(v) if node.kind == NodeKind::Token && node.children.is_empty() => v,
            _ => return Err(Error::parse(line, "can only assign to a variable")),
        };
        let var = &self.syms.vars[v];
        match var.storage {
            StorageClass::Constant => Err(Error::parse(
                line,
                format!("cannot assign to constant `{}`", var.name),
            )),
            StorageClass::Parameter => Err(Error::parse(
                line,
                format!("parameter `{}` is read-only", var.name),
            )),
            _ => self.var_operand(v, line),
        }
    }

    fn assign(&mut self, id: NodeId) -> Result<Operand, Error> {
        let tree = self.tree;
        let line = tree.line(id);
        let [l, r] = tree.children(id) else {
            return Err(Error::parse(line, "malformed assignment"));
        };
        let op = tree.token(id).and_then(|t| t.op());
        let dst = self.lvalue(*l)?;
        let base = match op {
            Some(Operator::AddAssign) => "add",
            Some(Operator::SubAssign) => "sub",
            Some(Operator::MulAssign) => "mul",
            Some(Operator::DivAssign) => "div",
            _ => {
                let src = self.expr(*r, Some(&dst))?;
                if src.name != dst.name {
                    self.mov(&dst, &src, line)?;
                }
                self.release(&src);
                return Ok(dst);
            }
        };
        let src = self.expr(*r, None)?;
        self.release(&src);
        self.check_store(&dst, &src, line)?;
        let m = format!("{base}{}{}", dst.class.suffix(), src.class.suffix());
        self.emit(&m, &[&dst, &dst, &src]);
        Ok(dst)
    }

    /// Checks that `src` may be stored into `dst`
    fn check_store(&self, dst: &Operand, src: &Operand, line: usize) -> Result<(), Error> {
        if dst.class == Class::Scalar && src.class == Class::Vector {
            return Err(Error::parse(
                line,
                format!("cannot assign a vector value to float `{}`", dst.name),
            ));
        }
        if !dst.varying && src.varying {
            return Err(Error::parse(
                line,
                format!("cannot assign a varying value to uniform `{}`", dst.name),
            ));
        }
        Ok(())
    }

    fn mov(&mut self, dst: &Operand, src: &Operand, line: usize) -> Result<(), Error> {
        self.check_store(dst, src, line)?;
        let m = format!("mov{}{}", dst.class.suffix(), src.class.suffix());
        self.emit(&m, &[dst, src]);
        Ok(())
    }

    fn expr(&mut self, id: NodeId, hint: Option<&Operand>) -> Result<Operand, Error> {
        let tree = self.tree;
        let line = tree.line(id);
        let node = tree.node(id);
        match node.kind {
            NodeKind::FuncCall => return self.call(id, hint),
            NodeKind::Token => (),
            _ => return Err(Error::parse(line, "expected an expression")),
        }
        if let Some(v) = node.var {
            return self.var_operand(v, line);
        }
        let Some(tok) = &node.token else {
            return Err(Error::parse(line, "expected an expression"));
        };
        let children = node.children.as_slice();
        match (tok.op(), children) {
            (Some(Operator::LParen), [one]) => self.expr(*one, hint),
            (Some(Operator::LParen), [_, _, _]) => {
                self.triple(DataType::Vector, children, hint, line)
            }
            (Some(op), [..]) if op.is_assignment() => self.assign(id),
            (Some(Operator::Sub), [arg]) => {
                let a = self.expr(*arg, None)?;
                self.release(&a);
                let zero = self.syms.constant(DataType::Float, Data::Float(vec![0.0]));
                let zero = self.var_operand(zero, line)?;
                let dst = self.dest(hint, a.class, a.varying);
                let m = format!("subs{}", a.class.suffix());
                self.emit(&m, &[&dst, &zero, &a]);
                Ok(dst)
            }
            (Some(op), [l, r]) => {
                let base = match op {
                    Operator::Add => "add",
                    Operator::Sub => "sub",
                    Operator::Mul => "mul",
                    Operator::Div => "div",
                    Operator::Less => "cmplt",
                    Operator::LessEq => "cmple",
                    Operator::Greater => "cmpgt",
                    Operator::GreaterEq => "cmpge",
                    Operator::Eq => "cmpeq",
                    Operator::NotEq => "cmpne",
                    _ => {
                        return Err(Error::parse(
                            line,
                            format!("operator `{}` is not supported", tok.text),
                        ));
                    }
                };
                let a = self.expr(*l, None)?;
                let b = self.expr(*r, None)?;
                self.release(&a);
                self.release(&b);
                let varying = a.varying || b.varying;
                if base.starts_with("cmp") {
                    if a.class != Class::Scalar || b.class != Class::Scalar {
                        return Err(Error::parse(
                            line,
                            format!("`{}` needs float operands", tok.text),
                        ));
                    }
                    let dst = self.dest(hint, Class::Scalar, varying);
                    self.emit(base, &[&dst, &a, &b]);
                    return Ok(dst);
                }
                let class = if a.class == Class::Scalar && b.class == Class::Scalar {
                    Class::Scalar
                } else {
                    Class::Vector
                };
                let dst = self.dest(hint, class, varying);
                let m = format!("{base}{}{}", a.class.suffix(), b.class.suffix());
                self.emit(&m, &[&dst, &a, &b]);
                Ok(dst)
            }
            _ => Err(Error::parse(line, format!("unexpected `{}`", tok.text))),
        }
    }

    /// Returns literal argument values, if every argument is a number
    fn literal_args(&self, args: &[NodeId]) -> Option<Vec<f32>> {
        args.iter()
            .map(|a| {
                let n = self.tree.node(*a);
                let neg = n.children.len() == 1 && self.tree.is_op(*a, Operator::Sub);
                let n = if neg { self.tree.node(n.children[0]) } else { n };
                match n.token.as_ref().map(|t| &t.value) {
                    Some(Literal::Number(v)) if n.children.is_empty() => {
                        Some(if neg { -*v } else { *v })
                    }
                    _ => None,
                }
            })
            .collect()
    }

    /// Builds a vector from three scalar expressions
    fn triple(
        &mut self,
        ty: DataType,
        args: &[NodeId],
        hint: Option<&Operand>,
        line: usize,
    ) -> Result<Operand, Error> {
        if let Some(vals) = self.literal_args(args) {
            let value = Data::from_components(ty, &vals).map_err(|m| Error::parse(line, m))?;
            let v = self.syms.constant(ty, value);
            return self.var_operand(v, line);
        }
        let mut ops = vec![];
        for &a in args {
            let o = self.expr(a, None)?;
            if o.class != Class::Scalar {
                return Err(Error::parse(line, "vector components must be floats"));
            }
            ops.push(o);
        }
        for o in &ops {
            self.release(o);
        }
        let varying = ops.iter().any(|o| o.varying);
        let dst = self.dest(hint, Class::Vector, varying);
        self.emit("movvs3", &[&dst, &ops[0], &ops[1], &ops[2]]);
        Ok(dst)
    }

    fn call(&mut self, id: NodeId, hint: Option<&Operand>) -> Result<Operand, Error> {
        let tree = self.tree;
        let line = tree.line(id);
        let args = self.args(id);
        let Some(tok) = tree.token(id) else {
            return Err(Error::parse(line, "expected a function name"));
        };
        match tok.class {
            TokenClass::DataType(ty) => match (ty, args.as_slice()) {
                (DataType::Float, [a]) => {
                    let a = self.expr(*a, hint)?;
                    if a.class != Class::Scalar {
                        return Err(Error::parse(line, "cannot convert a vector to float"));
                    }
                    Ok(a)
                }
                (t, [a]) if t.is_triple() => {
                    if let Some(vals) = self.literal_args(&args) {
                        let value =
                            Data::from_components(t, &vals).map_err(|m| Error::parse(line, m))?;
                        let v = self.syms.constant(t, value);
                        return self.var_operand(v, line);
                    }
                    let a = self.expr(*a, None)?;
                    if a.class == Class::Vector {
                        return Ok(a);
                    }
                    self.release(&a);
                    let dst = self.dest(hint, Class::Vector, a.varying);
                    self.emit("movvs", &[&dst, &a]);
                    Ok(dst)
                }
                (t, [_, _, _]) if t.is_triple() => self.triple(t, &args, hint, line),
                _ => Err(Error::parse(
                    line,
                    format!("unsupported `{}` constructor", tok.text),
                )),
            },
            TokenClass::StdFunction(f) => self.std_call(f, &args, hint, line),
            _ => Err(Error::parse(
                line,
                format!("function `{}` does not return a value", tok.text),
            )),
        }
    }

    /// Evaluates arguments, checking their count and classes
    ///
    /// `None` in `classes` accepts either class.
    fn std_args(
        &mut self,
        name: &str,
        args: &[NodeId],
        classes: &[Option<Class>],
        line: usize,
    ) -> Result<Vec<Operand>, Error> {
        if args.len() != classes.len() {
            return Err(Error::parse(
                line,
                format!("`{name}` takes {} argument(s), got {}", classes.len(), args.len()),
            ));
        }
        let mut out = vec![];
        for (&a, c) in args.iter().zip(classes) {
            let o = self.expr(a, None)?;
            if c.is_some_and(|c| c != o.class) {
                return Err(Error::parse(
                    line,
                    format!("wrong argument type for `{name}`"),
                ));
            }
            out.push(o);
        }
        for o in &out {
            self.release(o);
        }
        Ok(out)
    }

    fn std_call(
        &mut self,
        f: StdFunction,
        args: &[NodeId],
        hint: Option<&Operand>,
        line: usize,
    ) -> Result<Operand, Error> {
        let name: &'static str = f.into();
        const S: Option<Class> = Some(Class::Scalar);
        const V: Option<Class> = Some(Class::Vector);
        let (mnemonic, class, varying, ops) = match f {
            StdFunction::Abs => {
                let ops = self.std_args(name, args, &[None], line)?;
                let c = ops[0].class;
                let m = format!("abs{}{}", c.suffix(), c.suffix());
                (m, c, ops[0].varying, ops)
            }
            StdFunction::Normalize => {
                let ops = self.std_args(name, args, &[V], line)?;
                ("normalize".to_owned(), Class::Vector, ops[0].varying, ops)
            }
            StdFunction::FaceForward => {
                let ops = self.std_args(name, args, &[V, V], line)?;
                ("faceforward".to_owned(), Class::Vector, true, ops)
            }
            StdFunction::Diffuse => {
                let ops = self.std_args(name, args, &[V], line)?;
                ("diffuse".to_owned(), Class::Vector, ops[0].varying, ops)
            }
            StdFunction::Ambient => {
                let ops = self.std_args(name, args, &[], line)?;
                ("ambient".to_owned(), Class::Vector, false, ops)
            }
            StdFunction::CalculateNormal => {
                let ops = self.std_args(name, args, &[V], line)?;
                ("calculatenormal".to_owned(), Class::Vector, true, ops)
            }
            StdFunction::XComp | StdFunction::YComp | StdFunction::ZComp => {
                let ops = self.std_args(name, args, &[V], line)?;
                let axis = &name[..1];
                (format!("getv{axis}"), Class::Scalar, ops[0].varying, ops)
            }
            StdFunction::Noise => {
                let classes: &[Option<Class>] = match args.len() {
                    2 => &[S, S],
                    _ => &[None],
                };
                let ops = self.std_args(name, args, classes, line)?;
                let domain = match (ops.len(), ops[0].class) {
                    (2, _) => 2,
                    (_, Class::Scalar) => 1,
                    (_, Class::Vector) => 3,
                };
                // The result class follows the assignment target
                let class = hint.map(|h| h.class).unwrap_or(Class::Scalar);
                let outputs = match class {
                    Class::Scalar => 1,
                    Class::Vector => 3,
                };
                let varying = ops.iter().any(|o| o.varying);
                (format!("noise{outputs}{domain}"), class, varying, ops)
            }
            _ => {
                return Err(Error::parse(line, format!("`{name}` is not supported")));
            }
        };
        let dst = self.dest(hint, class, varying);
        let mut all = vec![&dst];
        all.extend(ops.iter());
        self.emit(&mnemonic, &all);
        Ok(dst)
    }

    fn set_comp(&mut self, id: NodeId, f: StdFunction) -> Result<(), Error> {
        let line = self.tree.line(id);
        let args = self.args(id);
        let [v, x] = args.as_slice() else {
            return Err(Error::parse(line, "expected a vector and a float"));
        };
        let dst = self.lvalue(*v)?;
        let x = self.expr(*x, None)?;
        self.release(&x);
        if dst.class != Class::Vector || x.class != Class::Scalar {
            return Err(Error::parse(line, "expected a vector and a float"));
        }
        if !dst.varying && x.varying {
            return Err(Error::parse(
                line,
                format!("cannot assign a varying value to uniform `{}`", dst.name),
            ));
        }
        let axis = match f {
            StdFunction::SetXComp => 'x',
            StdFunction::SetYComp => 'y',
            _ => 'z',
        };
        self.emit(&format!("setv{axis}"), &[&dst, &x]);
        Ok(())
    }
}
