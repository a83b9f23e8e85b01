//! Assembler: textual shader assembly to symbol table and instruction words
//!
//! The listing format is line-oriented:
//!
//! ```text
//! surface
//! .data
//!     Ci  global   varying color
//!     Kd  parameter uniform float 0.5
//! .code
//! surface matte
//!     mulvs Ci Cs Kd
//!     ret
//! ```
//!
//! The first line names the shader type.  `.data` lines declare symbols as
//! `name storage variability type [default...]`; `.code` lines are either
//! instructions (`mnemonic operand...`) or entry labels (`function <name>` or
//! `<shadertype> <name>`).  `;` and `//` start comments.
use crate::{
    Error,
    types::{Data, DataType, ShaderType, StorageClass, Symbol, Variability},
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::{path::Path, str::FromStr};

mod op;
pub use op::{OpWord, Opcode, OperandType, OperandWord, Word};

/// A function entry point in the instruction stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    /// Index of the function's first word in [`Shader::code`]
    pub pc: usize,
}

/// An assembled shader
///
/// Immutable once built; one shader may be bound and run against any number
/// of grids concurrently.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Shader {
    name: String,
    ty: ShaderType,
    symbols: Vec<Symbol>,
    code: Vec<Word>,
    functions: Vec<Function>,
    start_pc: usize,
}

/// Operand that must be resolved once every label has been seen
struct CallPatch {
    word: usize,
    target: String,
    line: usize,
}

/// Strips `;` and `//` comments from a line, ignoring quoted text
fn strip_comment(line: &str) -> &str {
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => return &line[..i],
            '/' if !quoted && line[i + 1..].starts_with('/') => return &line[..i],
            _ => (),
        }
    }
    line
}

/// Splits off the first `n` whitespace-separated fields, returning them and
/// the trimmed remainder of the line
fn split_fields(line: &str, n: usize) -> (Vec<&str>, &str) {
    let mut fields = vec![];
    let mut rest = line.trim_start();
    while fields.len() < n && !rest.is_empty() {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    (fields, rest.trim_end())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Section {
    Header,
    Data,
    Code,
}

#[derive(Default)]
struct Assembler {
    ty: Option<ShaderType>,
    symbols: Vec<Symbol>,
    code: Vec<Word>,
    functions: Vec<Function>,
    start_pc: Option<usize>,
    patches: Vec<CallPatch>,
}

impl Assembler {
    fn find_symbol_exact(&self, name: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s.name == name)
    }

    fn find_symbol_ignore_case(&self, name: &str) -> Option<usize> {
        self.symbols
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
    }

    fn data_line(&mut self, text: &str, line: usize) -> Result<(), Error> {
        let (fields, default) = split_fields(text, 4);
        let [name, storage, variability, ty] = fields.as_slice() else {
            return Err(Error::parse(
                line,
                "expected `name storage variability type [default]`",
            ));
        };
        let storage = StorageClass::from_str(storage).map_err(|_| {
            Error::parse(line, format!("unknown storage class `{storage}`"))
        })?;
        let variability = Variability::from_str(variability).map_err(|_| {
            Error::parse(line, format!("unknown variability `{variability}`"))
        })?;
        let ty = DataType::from_str(ty)
            .map_err(|_| Error::parse(line, format!("unknown type `{ty}`")))?;
        if let Some(i) = self.find_symbol_ignore_case(name) {
            return Err(Error::parse(
                line,
                format!(
                    "`{name}` is already declared as `{}`",
                    self.symbols[i].name
                ),
            ));
        }
        if storage == StorageClass::Temporary
            && variability == Variability::Uniform
            && ty == DataType::Point
        {
            return Err(Error::parse(line, "uniform point temporaries are not supported"));
        }

        let mut sym = Symbol::new(name, storage, ty, variability);
        if default.is_empty() {
            if storage == StorageClass::Constant {
                return Err(Error::parse(line, format!("constant `{name}` needs a value")));
            }
        } else {
            if storage == StorageClass::Temporary {
                return Err(Error::parse(
                    line,
                    format!("temporary `{name}` cannot have a default value"),
                ));
            }
            if variability == Variability::Varying {
                return Err(Error::parse(
                    line,
                    format!("varying `{name}` cannot have a default value"),
                ));
            }
            let value = Data::parse_literal(ty, default)
                .map_err(|m| Error::parse(line, m))?;
            sym = sym.with_value(value);
        }
        self.symbols.push(sym);
        Ok(())
    }

    /// Resolves an instruction operand to a symbol index
    ///
    /// `$` temporaries are matched ignoring case and created on first use;
    /// numeric literals become uniform constants; anything else must match a
    /// declared symbol exactly.
    fn operand(&mut self, text: &str, line: usize) -> Result<usize, Error> {
        if text.starts_with('$') {
            if let Some(i) = self.find_symbol_ignore_case(text) {
                return Ok(i);
            }
            let ty = match text.as_bytes() {
                [_, c, _, ..] if c.eq_ignore_ascii_case(&b's') => DataType::Float,
                [_, c, _, ..] if c.eq_ignore_ascii_case(&b'v') => DataType::Vector,
                _ => {
                    return Err(Error::parse(
                        line,
                        format!("bad temporary name `{text}`"),
                    ));
                }
            };
            self.symbols.push(Symbol::new(
                text,
                StorageClass::Temporary,
                ty,
                Variability::Varying,
            ));
            return Ok(self.symbols.len() - 1);
        }
        if let Some(i) = self.find_symbol_exact(text) {
            return Ok(i);
        }
        let numeric = text.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.');
        if numeric {
            let value = Data::parse_literal(DataType::Float, text)
                .map_err(|m| Error::parse(line, m))?;
            self.symbols.push(
                Symbol::new(
                    text,
                    StorageClass::Constant,
                    DataType::Float,
                    Variability::Uniform,
                )
                .with_value(value),
            );
            return Ok(self.symbols.len() - 1);
        }
        Err(Error::parse(line, format!("unknown symbol `{text}`")))
    }

    fn code_line(&mut self, words: &[&str], line: usize) -> Result<(), Error> {
        let Some((&first, rest)) = words.split_first() else {
            return Ok(());
        };

        // Entry labels
        let label_ty = ShaderType::from_str(first).ok();
        if label_ty.is_some() || first == "function" {
            let [name] = rest else {
                return Err(Error::parse(line, format!("expected `{first} <name>`")));
            };
            if self.functions.iter().any(|f| f.name == *name) {
                return Err(Error::parse(
                    line,
                    format!("function `{name}` is already defined"),
                ));
            }
            let pc = self.code.len();
            if label_ty.is_some() && self.start_pc.is_none() {
                self.start_pc = Some(pc);
            }
            self.functions.push(Function {
                name: name.to_string(),
                pc,
            });
            return Ok(());
        }

        let opcode = Opcode::from_str(first)
            .map_err(|_| Error::parse(line, format!("unknown opcode `{first}`")))?;
        let n = opcode.operand_count();
        if rest.len() < n {
            return Err(Error::parse(
                line,
                format!("missing operand #{}, expecting {n}", rest.len() + 1),
            ));
        } else if rest.len() > n {
            return Err(Error::parse(
                line,
                format!("too many operands for `{first}`, expecting {n}"),
            ));
        }

        let mut operands = vec![];
        if opcode == Opcode::Call {
            self.patches.push(CallPatch {
                word: self.code.len() + 1,
                target: rest[0].to_owned(),
                line,
            });
            operands.push(OperandWord {
                symbol: 0,
                varying: false,
            });
        } else {
            for r in rest {
                let i = self.operand(r, line)?;
                operands.push(OperandWord {
                    symbol: i as u32,
                    varying: self.symbols[i].is_varying(),
                });
            }
        }

        let dest_type = match operands.first() {
            Some(o) if opcode != Opcode::Call => {
                let s = &self.symbols[o.symbol as usize];
                match s.ty {
                    DataType::Float => OperandType::F1,
                    DataType::Matrix => OperandType::M44,
                    t if t.is_triple() => OperandType::F3,
                    t => {
                        return Err(Error::parse(
                            line,
                            format!("operand `{}` has unsupported type {t}", s.name),
                        ));
                    }
                }
            }
            _ => OperandType::F1,
        };
        self.code.push(Word::Op(OpWord {
            opcode: opcode as u8,
            operand_count: n as u8,
            dest_type,
            line: line as u32,
        }));
        self.code.extend(operands.into_iter().map(Word::Operand));
        Ok(())
    }

    fn patch_calls(&mut self) -> Vec<Error> {
        let mut errs = vec![];
        for p in std::mem::take(&mut self.patches) {
            match self.functions.iter().position(|f| f.name == p.target) {
                Some(i) => {
                    self.code[p.word] = Word::Operand(OperandWord {
                        symbol: i as u32,
                        varying: false,
                    })
                }
                None => errs.push(Error::parse(
                    p.line,
                    format!("unknown function `{}`", p.target),
                )),
            }
        }
        errs
    }
}

impl Shader {
    /// Assembles a listing
    ///
    /// Every bad line is reported: a single error is returned as-is, several
    /// are collected into [`Error::Assembly`].
    pub fn from_asm(text: &str, name: &str) -> Result<Self, Error> {
        let mut asm = Assembler::default();
        let mut section = Section::Header;
        let mut errs = vec![];
        for (i, line) in text.lines().enumerate() {
            let line_no = i + 1;
            let words: Vec<&str> = strip_comment(line).split_whitespace().collect();
            let Some(&first) = words.first() else {
                continue;
            };
            let r = match (section, first) {
                (_, ".data") => {
                    section = Section::Data;
                    Ok(())
                }
                (_, ".code") => {
                    section = Section::Code;
                    Ok(())
                }
                (Section::Header, t) => {
                    if asm.ty.is_some() {
                        Err(Error::parse(line_no, "expected `.data` or `.code`"))
                    } else {
                        ShaderType::from_str(t)
                            .map(|ty| asm.ty = Some(ty))
                            .map_err(|_| {
                                Error::parse(line_no, format!("unknown shader type `{t}`"))
                            })
                    }
                }
                (Section::Data, _) => asm.data_line(strip_comment(line), line_no),
                (Section::Code, _) => asm.code_line(&words, line_no),
            };
            if let Err(e) = r {
                errs.push(e);
            }
        }
        errs.extend(asm.patch_calls());

        let Some(ty) = asm.ty else {
            errs.insert(0, Error::parse(1, "missing shader type line"));
            return Err(collect(errs));
        };
        if !errs.is_empty() {
            return Err(collect(errs));
        }
        debug!(
            "assembled `{name}`: {} symbols, {} words",
            asm.symbols.len(),
            asm.code.len()
        );
        Ok(Self {
            name: name.to_owned(),
            ty,
            symbols: asm.symbols,
            code: asm.code,
            functions: asm.functions,
            start_pc: asm.start_pc.unwrap_or(0),
        })
    }

    /// Compiles shader source, then assembles the result
    pub fn from_rsl(source: &str, name: &str) -> Result<Self, Error> {
        let asm = crate::compiler::compile(source, name)?;
        Self::from_asm(&asm, name)
    }

    /// Loads a shader from a file, selected by extension
    ///
    /// `.sl` files are compiled first; anything else is read as assembly.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if path.extension().is_some_and(|e| e == "sl") {
            Self::from_rsl(&text, &name)
        } else {
            Self::from_asm(&text, &name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> ShaderType {
        self.ty
    }

    /// Returns the symbol table, in declaration order
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn code(&self) -> &[Word] {
        &self.code
    }

    #[cfg(test)]
    pub(crate) fn code_mut(&mut self) -> &mut [Word] {
        &mut self.code
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Returns the program counter at which execution begins
    pub fn start_pc(&self) -> usize {
        self.start_pc
    }

    /// Finds a symbol by exact name
    pub fn symbol_index(&self, name: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s.name == name)
    }
}

fn collect(mut errs: Vec<Error>) -> Error {
    if errs.len() == 1 {
        errs.remove(0)
    } else {
        Error::Assembly(errs)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const MATTE: &str = "\
surface
.data
    Ci  global    varying color
    Cs  global    varying color
    Kd  parameter uniform float 0.5   ; diffuse weight
.code
// entry
surface matte
    mulvs Ci Cs Kd
    ret
";

    #[test]
    fn test_assemble() {
        let s = Shader::from_asm(MATTE, "matte").unwrap();
        assert_eq!(s.ty(), ShaderType::Surface);
        assert_eq!(s.symbols().len(), 3);
        assert_eq!(s.start_pc(), 0);
        assert_eq!(s.functions()[0].name, "matte");
        let Word::Op(op) = s.code()[0] else {
            panic!("expected an opcode word");
        };
        assert_eq!(op.opcode(), Some(Opcode::MulVS));
        assert_eq!(op.dest_type, OperandType::F3);
        assert_eq!(op.line, 9);
        assert_eq!(
            s.code()[3],
            Word::Operand(OperandWord {
                symbol: 2,
                varying: false
            })
        );
        assert_eq!(s.code().len(), 5);
        assert_eq!(
            s.symbols()[2].value,
            Some(Data::Float(vec![0.5]))
        );
    }

    #[test]
    fn test_case_insensitive_header() {
        let s = Shader::from_asm("SURFACE\n.code\nRET\n", "x").unwrap();
        assert_eq!(s.ty(), ShaderType::Surface);
        assert_eq!(s.code().len(), 1);
    }

    #[test]
    fn test_temporaries() {
        let s = Shader::from_asm(
            "surface\n.data\nCi global varying color\n.code\n\
             movvs $v0 1\nmovvv Ci $V0\n",
            "t",
        )
        .unwrap();
        let names: Vec<_> = s.symbols().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Ci", "$v0", "1"]);
        assert_eq!(s.symbols()[1].ty, DataType::Vector);
        assert!(s.symbols()[1].is_varying());
        assert_eq!(s.symbols()[2].storage, StorageClass::Constant);

        let e = Shader::from_asm("surface\n.code\nmovss $x y\n", "t").unwrap_err();
        assert!(e.to_string().contains("bad temporary"));

        let s = Shader::from_asm("surface\n.code\nmovvs $V0 1\nmovss $S1 $V0\n", "t");
        let s = s.unwrap();
        assert_eq!(s.symbols()[0].name, "$V0");
        assert_eq!(s.symbols()[0].ty, DataType::Vector);
        assert_eq!(s.symbols()[0].storage, StorageClass::Temporary);
        assert_eq!(s.symbols()[2].ty, DataType::Float);
    }

    #[test]
    fn test_duplicate_symbols() {
        let e = Shader::from_asm(
            "surface\n.data\nfoo temporary varying float\nFOO temporary varying float\n",
            "t",
        )
        .unwrap_err();
        assert_eq!(e.line(), Some(4));
        assert!(e.to_string().contains("already declared"));
    }

    #[test]
    fn test_arity() {
        let e = Shader::from_asm(
            "surface\n.data\na temporary varying float\n.code\naddss a a\n",
            "t",
        )
        .unwrap_err();
        assert_eq!(e.line(), Some(5));
        assert!(e.to_string().contains("missing operand #3, expecting 3"));

        let e = Shader::from_asm(
            "surface\n.data\na temporary varying float\n.code\nmovss a a a\n",
            "t",
        )
        .unwrap_err();
        assert!(e.to_string().contains("too many operands"));
    }

    #[test]
    fn test_accumulated_errors() {
        let e = Shader::from_asm(
            "surface\n.data\nx constant uniform float\ny temporary varying float 1\n\
             .code\nbogus x\nmovss y nope\n",
            "t",
        )
        .unwrap_err();
        let Error::Assembly(errs) = e else {
            panic!("expected accumulated errors");
        };
        let lines: Vec<_> = errs.iter().filter_map(Error::line).collect();
        assert_eq!(lines, [3, 4, 6, 7]);
    }

    #[test]
    fn test_defaults() {
        let e = Shader::from_asm("surface\n.data\nc parameter varying color 1\n", "t")
            .unwrap_err();
        assert!(e.to_string().contains("varying"));

        let s = Shader::from_asm("surface\n.data\nc parameter uniform color 1\n", "t")
            .unwrap();
        assert_eq!(
            s.symbols()[0].value,
            Some(Data::Vector(vec![nalgebra::Vector3::new(1.0, 1.0, 1.0)]))
        );

        let e = Shader::from_asm("surface\n.data\nc parameter uniform color 1 2\n", "t")
            .unwrap_err();
        assert!(e.to_string().contains("required"));
    }

    #[test]
    fn test_string_defaults() {
        let s = Shader::from_asm(
            "surface\n.data\n\
             a parameter uniform string \"x;y\"  ; trailing\n\
             b parameter uniform string \"one   two\"\n\
             c parameter uniform string \"p//q\" // trailing\n\
             d parameter uniform string \"say \\\"hi\\\"\"\n",
            "t",
        )
        .unwrap();
        let values: Vec<_> = s
            .symbols()
            .iter()
            .map(|s| s.value.clone().unwrap())
            .collect();
        let expected = ["x;y", "one   two", "p//q", "say \"hi\""];
        for (v, e) in values.iter().zip(expected) {
            assert_eq!(*v, Data::String(vec![e.to_owned()]));
        }

        let s = Shader::from_rsl(
            "surface s(string tex = \"a;b  //c\") { }",
            "s",
        )
        .unwrap();
        let i = s.symbol_index("tex").unwrap();
        assert_eq!(
            s.symbols()[i].value,
            Some(Data::String(vec!["a;b  //c".to_owned()]))
        );
    }

    #[test]
    fn test_calls() {
        let s = Shader::from_asm(
            "surface\n.code\nfunction helper\nret\nsurface main\ncall helper\nret\n",
            "t",
        )
        .unwrap();
        assert_eq!(s.start_pc(), 1);
        assert_eq!(
            s.code()[2],
            Word::Operand(OperandWord {
                symbol: 0,
                varying: false
            })
        );

        let e = Shader::from_asm("surface\n.code\ncall nowhere\n", "t").unwrap_err();
        assert!(e.to_string().contains("unknown function `nowhere`"));
    }

    #[test]
    fn test_from_rsl() {
        let s = Shader::from_rsl("surface red() { Ci = color(1, 0, 0); }", "red").unwrap();
        assert_eq!(s.name(), "red");
        assert!(s.symbol_index("Ci").is_some());
        assert!(s.symbol_index("P").is_none());
    }
}
