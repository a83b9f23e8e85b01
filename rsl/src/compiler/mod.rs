//! Shading-language compiler, producing textual assembly
//!
//! The compiler runs as a fixed sequence of passes over a token tree:
//!
//! 1. [`token::tokenize`] splits the builtins prelude plus the user source
//!    into tokens
//! 2. [`Tree::build`] nests them by bracket
//! 3. function definitions, declarations, calls, and operator precedence are
//!    discovered in turn, each pass rewriting the tree in place
//! 4. names and literals are linked to symbols
//! 5. the emitter walks every function body and writes instructions,
//!    allocating temporaries as it goes
//!
//! The result is an assembly listing that [`Shader::from_asm`] accepts.
//!
//! [`Shader::from_asm`]: crate::asm::Shader::from_asm
use crate::{
    Error,
    types::{ShaderType, StorageClass, Variability},
};
use log::debug;
use std::collections::HashSet;

mod builtins;
mod emit;
mod indexed;
mod registers;
mod resolve;
pub mod token;
pub mod tree;

pub use builtins::{PRELUDE, STANDARD_VARIABLES};
pub use token::{render, tokenize};
pub use tree::Tree;

use registers::Registers;
use resolve::Symbols;

/// A compiled shader, ready to be written as an assembly listing
pub struct Compiler {
    tree: Tree,
    syms: Symbols,
    shader: ShaderType,
    code: Vec<String>,
    regs: Registers,
    referenced: HashSet<String>,
}

impl Compiler {
    /// Compiles shader source text
    ///
    /// Error line numbers refer to `source`, not to the builtins prelude.
    pub fn new(source: &str) -> Result<Self, Error> {
        let n = builtins::prelude_lines();
        Self::build(source).map_err(|e| e.rebase_line(n))
    }

    fn build(source: &str) -> Result<Self, Error> {
        let text = format!("{}{source}", builtins::PRELUDE);
        let tokens = tokenize(&text);
        debug!("lexed {} tokens", tokens.len());

        let mut tree = Tree::build(tokens)?;
        let mut syms = Symbols::with_standard_variables();
        resolve::discover_functions(&mut tree, &mut syms)?;
        tree.remove_closing_brackets();
        resolve::discover_declarations(&mut tree, &mut syms)?;
        tree.reparent_calls(&|t| resolve::is_callee(&syms, t));
        tree.reparent_operators()?;
        resolve::discover_uses(&mut tree, &mut syms)?;
        resolve::realize_constants(&mut tree, &mut syms);
        debug!(
            "found {} symbols and {} functions",
            syms.vars.len(),
            syms.funcs.len()
        );

        let shader = {
            let mut shaders = syms.shaders();
            match (shaders.next(), shaders.next()) {
                (Some((_, f)), None) => f.shader,
                (Some(_), Some((_, f))) => {
                    return Err(Error::parse(
                        f.line,
                        format!("only one shader may be defined (found `{}`)", f.name),
                    ));
                }
                (None, _) => None,
            }
        };
        let shader = shader.ok_or_else(|| {
            Error::parse(builtins::prelude_lines() + 1, "no shader function found")
        })?;

        let funcs: Vec<_> = syms.funcs.iter().map(|(i, _)| i).collect();
        let mut em = emit::Emitter::new(&tree, &mut syms);
        for f in funcs {
            em.function(f)?;
        }
        let (code, regs, referenced) = em.finish();
        debug!("emitted {} lines of code", code.len());

        Ok(Self {
            tree,
            syms,
            shader,
            code,
            regs,
            referenced,
        })
    }

    /// Returns the token tree after all rewriting passes
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Returns the shader type of the compiled entry point
    pub fn shader_type(&self) -> ShaderType {
        self.shader
    }

    /// Writes the assembly listing
    ///
    /// `source_name` is only used in the banner comment.
    pub fn asm(&self, source_name: &str) -> String {
        let mut out = vec![
            format!(
                "; compiled from {source_name} by rsl {}",
                env!("CARGO_PKG_VERSION")
            ),
            self.shader.to_string(),
            String::new(),
            ".data".to_owned(),
        ];
        let vars = self.syms.vars.values();
        let wanted = |storage: StorageClass| {
            self.syms
                .vars
                .values()
                .filter(move |v| v.storage == storage)
        };
        let referenced = |name: &str| self.referenced.contains(name);
        for v in vars.filter(|v| v.storage == StorageClass::Global && referenced(&v.name)) {
            out.push(data_line(&v.name, v.storage, v.variability, &v.ty.to_string(), None));
        }
        for v in wanted(StorageClass::Parameter) {
            let d = v.default.as_ref().map(|d| d.to_literal());
            out.push(data_line(&v.name, v.storage, v.variability, &v.ty.to_string(), d));
        }
        for v in wanted(StorageClass::Constant).filter(|v| referenced(&v.name)) {
            let d = v.default.as_ref().map(|d| d.to_literal());
            out.push(data_line(&v.name, v.storage, v.variability, &v.ty.to_string(), d));
        }
        for v in wanted(StorageClass::Temporary) {
            out.push(data_line(&v.name, v.storage, v.variability, &v.ty.to_string(), None));
        }
        for t in self.regs.uniform_temps() {
            let ty = match t.class {
                registers::Class::Scalar => "float",
                registers::Class::Vector => "vector",
            };
            out.push(data_line(
                &t.name(),
                StorageClass::Temporary,
                Variability::Uniform,
                ty,
                None,
            ));
        }
        out.push(String::new());
        out.push(".code".to_owned());
        out.extend(self.code.iter().cloned());
        out.push(String::new());
        out.join("\n")
    }
}

fn data_line(
    name: &str,
    storage: StorageClass,
    variability: Variability,
    ty: &str,
    default: Option<String>,
) -> String {
    match default {
        Some(d) => format!("\t{name}\t{storage}\t{variability}\t{ty}\t{d}"),
        None => format!("\t{name}\t{storage}\t{variability}\t{ty}"),
    }
}

/// Compiles shader source to an assembly listing
pub fn compile(source: &str, source_name: &str) -> Result<String, Error> {
    Ok(Compiler::new(source)?.asm(source_name))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_compile_simple() {
        let asm = compile(
            "surface red() { Ci = color(1, 0, 0); }",
            "red.sl",
        )
        .unwrap();
        let lines: Vec<&str> = asm.lines().collect();
        assert_eq!(lines[1], "surface");
        assert!(asm.contains("\tCi\tglobal\tvarying\tcolor"));
        assert!(asm.contains("constant\tuniform\tcolor\t1 0 0"));
        assert!(asm.contains("surface red"));
        assert!(asm.contains("\tmovvv\tCi\t_c"));
        assert!(asm.trim_end().ends_with("ret"));

        // Unreferenced globals and prelude constants stay out of the listing
        assert!(!asm.contains("\tP\t"));
        assert!(!asm.contains("PI"));
    }

    #[test]
    fn test_compile_expression() {
        let asm = compile(
            "surface s(float Kd = 0.5) {
                float x;
                x = Kd * 2 + 1;
                Ci = Cs * x;
            }",
            "s.sl",
        )
        .unwrap();
        assert!(asm.contains("\tKd\tparameter\tuniform\tfloat\t0.5"));
        assert!(asm.contains("\tx\ttemporary\tvarying\tfloat"));
        // The multiply lands in a uniform temporary, the add in `x` itself
        assert!(asm.contains("\t$su0\ttemporary\tuniform\tfloat"));
        assert!(asm.contains("\tmulss\t$su0\tKd\t_c"));
        assert!(asm.contains("\taddss\tx\t$su0\t_c"));
        assert!(asm.contains("\tmulvs\tCi\tCs\tx"));
    }

    #[test]
    fn test_compile_errors() {
        let e = compile("surface s() {\n  Ci = foo;\n}", "s.sl").unwrap_err();
        assert_eq!(e.line(), Some(2));
        assert!(e.to_string().contains("unknown symbol `foo`"));

        let e = compile("surface s() { PI = 1; }", "s.sl").unwrap_err();
        assert!(e.to_string().contains("constant"));

        let e = compile("surface s(float Kd = 1) { Kd = 2; }", "s.sl").unwrap_err();
        assert!(e.to_string().contains("read-only"));

        let e = compile("surface s() { uniform float f; f = s; }", "s.sl").unwrap_err();
        assert!(e.to_string().contains("varying"));

        // Declarations may not differ from a standard variable only by case
        let e = compile("surface s() {\n float n;\n n = 1;\n}", "s.sl").unwrap_err();
        assert_eq!(e.line(), Some(2));
        assert!(e.to_string().contains("already declared as `N`"));

        let e = compile("float x = 1;", "s.sl").unwrap_err();
        assert!(e.to_string().contains("no shader"));

        let e = compile("surface a() { Ci = Cs; }\nsurface b() { Ci = Cs; }", "s.sl")
            .unwrap_err();
        assert!(e.to_string().contains("only one shader may be defined (found `b`)"));

        let e = compile("surface s() {\n if (1) { Ci = 0; } }", "s.sl").unwrap_err();
        assert_eq!(e.line(), Some(2));
    }

    #[test]
    fn test_constant_names() {
        let src = "surface s() { float _c0 = 2; float _c2; _c2 = 4; Ci = Cs * _c0 * 3; }";
        let asm = compile(src, "s.sl").unwrap();
        assert!(asm.contains("\t_c0\ttemporary\tvarying\tfloat"));
        assert!(asm.contains("\t_c2\ttemporary\tvarying\tfloat"));
        let constants: Vec<&str> = asm
            .lines()
            .filter(|l| l.contains("\tconstant\t"))
            .map(|l| l.trim_start().split('\t').next().unwrap())
            .collect();
        assert_eq!(constants.len(), 3);
        assert!(!constants.contains(&"_c0") && !constants.contains(&"_c2"));
        crate::asm::Shader::from_asm(&asm, "s").unwrap();
    }

    #[test]
    fn test_compile_functions() {
        let asm = compile(
            "void helper() { Ci = Cs; }
             surface s() { helper(); return; }",
            "s.sl",
        )
        .unwrap();
        assert!(asm.contains("function helper"));
        assert!(asm.contains("\tcall\thelper"));
        assert!(asm.contains("\tmovvv\tCi\tCs"));
    }

    #[test]
    fn test_compile_std_functions() {
        let asm = compile(
            "surface s() {
                normal Nf = faceforward(normalize(N), I);
                float grain = noise(P);
                color c = noise(s, t);
                Ci = Cs * (ambient() + diffuse(Nf)) * grain + c;
                setxcomp(Ci, xcomp(P));
            }",
            "s.sl",
        )
        .unwrap();
        assert!(asm.contains("\tnormalize\t$v0\tN"));
        assert!(asm.contains("\tfaceforward\tNf\t$v0\tI"));
        assert!(asm.contains("\tnoise13\tgrain\tP"));
        assert!(asm.contains("\tnoise32\tc\ts\tt"));
        assert!(asm.contains("\tambient\t$vu0"));
        assert!(asm.contains("\tgetvx\t$s0\tP"));
        assert!(asm.contains("\tsetvx\tCi\t$s0"));
    }
}
