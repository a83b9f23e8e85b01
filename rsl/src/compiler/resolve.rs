//! Symbol resolution: declarations, functions, and uses
use super::{
    builtins::STANDARD_VARIABLES,
    indexed::{IndexVec, define_index},
    token::{Keyword, Literal, Operator, Token, TokenClass},
    tree::{NodeId, NodeKind, Tree},
};
use crate::{
    Error,
    types::{Data, DataType, ShaderType, StorageClass, Variability},
};
use std::collections::HashMap;

define_index!(VarId, "Index of a variable in a [`Symbols`] table");
define_index!(FuncId, "Index of a function in a [`Symbols`] table");

/// A declared (or realized) variable
#[derive(Clone, Debug)]
pub struct Variable {
    pub name: String,
    pub ty: DataType,
    pub variability: Variability,
    pub storage: StorageClass,
    /// Literal value for constants, default value for parameters
    pub default: Option<Data>,
    pub line: usize,
    /// Set when some expression refers to this variable
    pub used: bool,
}

/// A function discovered from `type name ( ... ) { ... }` adjacency
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    /// Shader type, for shader entry points
    pub shader: Option<ShaderType>,
    /// The [`NodeKind::FuncDef`] node
    pub node: NodeId,
    pub line: usize,
}

/// Compiler-side symbol table
#[derive(Debug, Default)]
pub struct Symbols {
    pub vars: IndexVec<Variable, VarId>,
    pub funcs: IndexVec<Function, FuncId>,
    constants: HashMap<(DataType, String), VarId>,
}

impl Symbols {
    /// Builds a table seeded with the standard `global` variables
    pub fn with_standard_variables() -> Self {
        let mut out = Self::default();
        for &(name, ty, variability) in STANDARD_VARIABLES {
            out.vars.push(Variable {
                name: name.to_owned(),
                ty,
                variability,
                storage: StorageClass::Global,
                default: None,
                line: 0,
                used: false,
            });
        }
        out
    }

    /// Finds a variable by exact name, as used at reference sites
    pub fn find_var(&self, name: &str) -> Option<VarId> {
        self.vars.iter().find(|(_, v)| v.name == name).map(|(i, _)| i)
    }

    /// Finds a variable ignoring case, as used to reject redeclarations
    pub fn find_var_ignore_case(&self, name: &str) -> Option<VarId> {
        self.vars
            .iter()
            .find(|(_, v)| v.name.eq_ignore_ascii_case(name))
            .map(|(i, _)| i)
    }

    pub fn find_func(&self, name: &str) -> Option<FuncId> {
        self.funcs.iter().find(|(_, f)| f.name == name).map(|(i, _)| i)
    }

    /// Adds a new variable, rejecting duplicate names
    pub fn declare(&mut self, v: Variable) -> Result<VarId, Error> {
        if let Some(prev) = self.find_var_ignore_case(&v.name) {
            return Err(Error::parse(
                v.line,
                format!(
                    "`{}` is already declared as `{}`",
                    v.name, self.vars[prev].name
                ),
            ));
        }
        Ok(self.vars.push(v))
    }

    /// Returns a uniform constant holding `value`, creating it if needed
    pub fn constant(&mut self, ty: DataType, value: Data) -> VarId {
        let key = (ty, value.to_literal());
        if let Some(&v) = self.constants.get(&key) {
            return v;
        }
        let v = self.vars.push(Variable {
            name: self.fresh_constant_name(),
            ty,
            variability: Variability::Uniform,
            storage: StorageClass::Constant,
            default: Some(value),
            line: 0,
            used: true,
        });
        self.constants.insert(key, v);
        v
    }

    /// Picks a `_cN` name that no declared variable already uses
    fn fresh_constant_name(&self) -> String {
        (self.constants.len()..)
            .map(|n| format!("_c{n}"))
            .find(|n| self.find_var_ignore_case(n).is_none())
            .unwrap_or_default()
    }

    /// Iterates over the shader entry points
    pub fn shaders(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.funcs.iter().filter(|(_, f)| f.shader.is_some())
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Collapses `type name ( params ) { body }` runs into function definitions
///
/// Must run while closing brackets are still in the tree, since they are
/// part of the adjacency pattern.
pub fn discover_functions(tree: &mut Tree, syms: &mut Symbols) -> Result<(), Error> {
    let root = tree.root();
    let mut out: Vec<NodeId> = vec![];
    for c in tree.children(root).to_vec() {
        if tree.kind(c) != NodeKind::Block {
            out.push(c);
            continue;
        }
        let line = tree.line(c);
        let broken = || Error::parse(line, "broken function definition");
        let n = out.len();
        if n < 4 {
            return Err(broken());
        }
        let (ret, name, params, close) = (out[n - 4], out[n - 3], out[n - 2], out[n - 1]);
        if !tree.is_op(params, Operator::LParen) || !tree.is_op(close, Operator::RParen) {
            return Err(broken());
        }
        let name_text = match tree.token(name) {
            Some(t) if t.is_name() => t.text.clone(),
            _ => return Err(broken()),
        };
        let shader = match tree.token(ret).map(|t| t.class) {
            Some(TokenClass::DataType(_)) | Some(TokenClass::Keyword(Keyword::Void)) => None,
            Some(TokenClass::Keyword(k)) if k.shader_type().is_some() => k.shader_type(),
            _ => return Err(broken()),
        };
        if syms.find_func(&name_text).is_some() {
            return Err(Error::parse(
                line,
                format!("function `{name_text}` is already defined"),
            ));
        }
        let id = syms.funcs.push(Function {
            name: name_text,
            shader,
            node: name,
            line: tree.line(name),
        });
        let node = tree.node_mut(name);
        node.kind = NodeKind::FuncDef;
        node.children = vec![params, c];
        node.func = Some(id);
        out.truncate(n - 4);
        out.push(name);
    }
    tree.set_children(root, out);
    Ok(())
}

/// A parsed `[uniform|varying] type name [= init], ...` statement
struct Declaration {
    variability: Option<Variability>,
    ty: DataType,
    /// Name node, plus the `=` node and initializer nodes if present
    declarators: Vec<(NodeId, Vec<NodeId>)>,
}

fn parse_declaration(tree: &Tree, items: &[NodeId]) -> Result<Option<Declaration>, Error> {
    let mut i = 0;
    let mut variability = None;
    let mut modified = false;
    while let Some(k) = items.get(i).and_then(|n| tree.token(*n)).and_then(Token::keyword) {
        match k {
            Keyword::Uniform => variability = Some(Variability::Uniform),
            Keyword::Varying => variability = Some(Variability::Varying),
            Keyword::Extern => (),
            Keyword::Output => {
                return Err(Error::parse(
                    tree.line(items[i]),
                    "`output` variables are not supported",
                ));
            }
            _ => break,
        }
        modified = true;
        i += 1;
    }
    let Some(ty) = items.get(i).and_then(|n| tree.token(*n)).and_then(Token::data_type) else {
        if modified {
            return Err(Error::parse(tree.line(items[i - 1]), "expected a type"));
        }
        return Ok(None);
    };
    let type_line = tree.line(items[i]);
    i += 1;

    match items.get(i).and_then(|n| tree.token(*n)) {
        Some(t) if t.is_name() => (),
        Some(t) if !modified && t.is_op(Operator::LParen) => return Ok(None),
        _ => {
            let ty: &str = ty.into();
            return Err(Error::parse(type_line, format!("expected a name after `{ty}`")));
        }
    }

    let mut declarators = vec![];
    for d in items[i..].split(|n| tree.is_op(*n, Operator::Comma)) {
        let Some((&name, rest)) = d.split_first() else {
            return Err(Error::parse(type_line, "expected a name after `,`"));
        };
        let line = tree.line(name);
        if !tree.token(name).is_some_and(Token::is_name) {
            return Err(Error::parse(line, "expected a name"));
        }
        match rest.first() {
            None => (),
            Some(&n) if tree.is_op(n, Operator::Assign) => {
                if rest.len() == 1 {
                    return Err(Error::parse(line, "missing initial value"));
                }
            }
            Some(&n) if tree.is_op(n, Operator::LSquare) => {
                return Err(Error::parse(line, "arrays are not supported"));
            }
            Some(_) => return Err(Error::parse(line, "expected `=` or `,`")),
        }
        declarators.push((name, rest.to_vec()));
    }
    Ok(Some(Declaration {
        variability,
        ty,
        declarators,
    }))
}

fn literal_number(tree: &Tree, items: &[NodeId]) -> Option<f32> {
    let value = |n: &NodeId| match tree.token(*n).map(|t| &t.value) {
        Some(Literal::Number(v)) => Some(*v),
        _ => None,
    };
    match items {
        [n] => value(n),
        [m, n] if tree.is_op(*m, Operator::Sub) => value(n).map(|v| -v),
        _ => None,
    }
}

/// Evaluates a literal initializer, e.g. `0.5`, `-1`, or `color (1, 0, 0)`
fn literal_value(tree: &Tree, ty: DataType, init: &[NodeId], line: usize) -> Result<Data, Error> {
    let not_literal = || Error::parse(line, "default values must be literals");
    if ty == DataType::String {
        return match init {
            [n] => match tree.token(*n).map(|t| &t.value) {
                Some(Literal::Str(s)) => Ok(Data::String(vec![s.clone()])),
                _ => Err(not_literal()),
            },
            _ => Err(not_literal()),
        };
    }
    let init = match init {
        [t, rest @ ..] if tree.token(*t).and_then(Token::data_type).is_some() => rest,
        _ => init,
    };
    let vals = match init {
        [p] if tree.is_op(*p, Operator::LParen) => tree
            .children(*p)
            .split(|c| tree.is_op(*c, Operator::Comma))
            .map(|arg| literal_number(tree, arg))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(not_literal)?,
        _ => vec![literal_number(tree, init).ok_or_else(not_literal)?],
    };
    Data::from_components(ty, &vals).map_err(|m| Error::parse(line, m))
}

/// Declares every variable of a top-level or parameter statement
fn declare_with_defaults(
    tree: &Tree,
    syms: &mut Symbols,
    items: &[NodeId],
    storage: StorageClass,
) -> Result<(), Error> {
    let line = tree.line(items[0]);
    let Some(decl) = parse_declaration(tree, items)? else {
        let what = match storage {
            StorageClass::Parameter => "a parameter declaration",
            _ => "a declaration",
        };
        return Err(Error::parse(line, format!("expected {what}")));
    };
    let variability = decl.variability.unwrap_or(Variability::Uniform);
    if storage == StorageClass::Constant && variability == Variability::Varying {
        return Err(Error::parse(line, "top-level constants must be uniform"));
    }
    for (name, rest) in decl.declarators {
        let line = tree.line(name);
        let default = match rest.split_first() {
            Some((_eq, init)) => {
                if variability == Variability::Varying {
                    return Err(Error::parse(
                        line,
                        "varying variables cannot have default values",
                    ));
                }
                Some(literal_value(tree, decl.ty, init, line)?)
            }
            None if storage == StorageClass::Constant => {
                return Err(Error::parse(line, "constants need a value"));
            }
            None => None,
        };
        let name = tree.token(name).map(|t| t.text.clone()).unwrap_or_default();
        syms.declare(Variable {
            name,
            ty: decl.ty,
            variability,
            storage,
            default,
            line,
            used: false,
        })?;
    }
    Ok(())
}

/// Declares the locals of a function body
///
/// Declarations are removed from the body; initializers are rewritten into
/// plain assignments (`float x = 1;` becomes `x = 1;`).
fn declare_locals(tree: &mut Tree, syms: &mut Symbols, block: NodeId) -> Result<(), Error> {
    let mut out = vec![];
    let mut stmt: Vec<NodeId> = vec![];
    for c in tree.children(block).to_vec() {
        if tree.kind(c) == NodeKind::Block {
            declare_locals(tree, syms, c)?;
            out.append(&mut stmt);
            out.push(c);
            continue;
        } else if !tree.is_op(c, Operator::Semicolon) {
            stmt.push(c);
            continue;
        }
        let Some(decl) = parse_declaration(tree, &stmt)? else {
            out.append(&mut stmt);
            out.push(c);
            continue;
        };
        let variability = decl.variability.unwrap_or(Variability::Varying);
        for (name, rest) in decl.declarators {
            let line = tree.line(name);
            if variability == Variability::Uniform && decl.ty == DataType::Point {
                return Err(Error::parse(line, "uniform point locals are not supported"));
            }
            let text = tree.token(name).map(|t| t.text.clone()).unwrap_or_default();
            syms.declare(Variable {
                name: text,
                ty: decl.ty,
                variability,
                storage: StorageClass::Temporary,
                default: None,
                line,
                used: false,
            })?;
            if !rest.is_empty() {
                out.push(name);
                out.extend(rest);
                out.push(tree.push_token(Token::operator(Operator::Semicolon, line)));
            }
        }
        stmt.clear();
    }
    out.append(&mut stmt);
    tree.set_children(block, out);
    Ok(())
}

/// Discovers constants, shader parameters, and function locals
///
/// Runs after closing brackets are removed and before calls and operators
/// are re-parented.  Top-level declarations are removed from the tree.
pub fn discover_declarations(tree: &mut Tree, syms: &mut Symbols) -> Result<(), Error> {
    let root = tree.root();
    let mut out = vec![];
    let mut stmt = vec![];
    for c in tree.children(root).to_vec() {
        if tree.kind(c) == NodeKind::FuncDef {
            if let Some(&first) = stmt.first() {
                return Err(Error::parse(tree.line(first), "expected `;`"));
            }
            out.push(c);
        } else if tree.is_op(c, Operator::Semicolon) {
            if !stmt.is_empty() {
                declare_with_defaults(tree, syms, &stmt, StorageClass::Constant)?;
                stmt.clear();
            }
        } else {
            stmt.push(c);
        }
    }
    if let Some(&first) = stmt.first() {
        return Err(Error::parse(tree.line(first), "expected `;`"));
    }
    tree.set_children(root, out);

    let funcs: Vec<Function> = syms.funcs.values().cloned().collect();
    for f in funcs {
        let [params, body] = tree.children(f.node) else {
            return Err(Error::parse(f.line, "broken function definition"));
        };
        let (params, body) = (*params, *body);
        let items = tree.children(params).to_vec();
        if f.shader.is_some() {
            for p in items.split(|n| tree.is_op(*n, Operator::Semicolon)) {
                if !p.is_empty() {
                    declare_with_defaults(tree, syms, p, StorageClass::Parameter)?;
                }
            }
        } else if !items.is_empty() {
            return Err(Error::parse(
                f.line,
                format!("function `{}` cannot take parameters", f.name),
            ));
        }
        tree.set_children(params, vec![]);
        declare_locals(tree, syms, body)?;
    }
    Ok(())
}

/// Checks whether a token may be followed by an argument list
pub fn is_callee(syms: &Symbols, t: &Token) -> bool {
    match t.class {
        TokenClass::DataType(_) | TokenClass::StdFunction(_) => true,
        TokenClass::Unknown => syms.find_func(&t.text).is_some(),
        _ => false,
    }
}

/// Links every name to its variable or function
pub fn discover_uses(tree: &mut Tree, syms: &mut Symbols) -> Result<(), Error> {
    visit_uses(tree, syms, tree.root())
}

fn visit_uses(tree: &mut Tree, syms: &mut Symbols, id: NodeId) -> Result<(), Error> {
    let kind = tree.kind(id);
    let name = tree
        .token(id)
        .filter(|t| t.is_name())
        .map(|t| (t.text.clone(), t.line));
    if let Some((text, line)) = name {
        match kind {
            NodeKind::FuncCall => {
                let f = syms.find_func(&text).ok_or_else(|| {
                    Error::parse(line, format!("unknown function `{text}`"))
                })?;
                tree.node_mut(id).func = Some(f);
            }
            NodeKind::Token => {
                let v = syms.find_var(&text).ok_or_else(|| {
                    Error::parse(line, format!("unknown symbol `{text}`"))
                })?;
                syms.vars[v].used = true;
                tree.node_mut(id).var = Some(v);
            }
            _ => (),
        }
    }
    for c in tree.children(id).to_vec() {
        visit_uses(tree, syms, c)?;
    }
    Ok(())
}

/// Turns literal tokens into references to `constant` variables
pub fn realize_constants(tree: &mut Tree, syms: &mut Symbols) {
    visit_constants(tree, syms, tree.root())
}

fn visit_constants(tree: &mut Tree, syms: &mut Symbols, id: NodeId) {
    let v = match tree.token(id).map(|t| &t.value) {
        Some(Literal::Number(x)) => Some(syms.constant(DataType::Float, Data::Float(vec![*x]))),
        Some(Literal::Str(s)) => {
            Some(syms.constant(DataType::String, Data::String(vec![s.clone()])))
        }
        _ => None,
    };
    if v.is_some() {
        tree.node_mut(id).var = v;
    }
    for c in tree.children(id).to_vec() {
        visit_constants(tree, syms, c);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compiler::token::tokenize;

    fn front_end(src: &str) -> Result<(Tree, Symbols), Error> {
        let mut tree = Tree::build(tokenize(src))?;
        let mut syms = Symbols::with_standard_variables();
        discover_functions(&mut tree, &mut syms)?;
        tree.remove_closing_brackets();
        discover_declarations(&mut tree, &mut syms)?;
        Ok((tree, syms))
    }

    #[test]
    fn test_functions() {
        let (tree, syms) = front_end(
            "surface plastic(float Ks = .5; color c = color(1, 0, 0)) { } \
             void helper() { }",
        )
        .unwrap();
        assert_eq!(syms.funcs.len(), 2);
        let (_, s) = syms.shaders().next().unwrap();
        assert_eq!(s.name, "plastic");
        assert_eq!(s.shader, Some(ShaderType::Surface));
        assert_eq!(tree.children(tree.root()).len(), 2);

        let ks = syms.find_var("Ks").unwrap();
        assert_eq!(syms.vars[ks].storage, StorageClass::Parameter);
        assert_eq!(syms.vars[ks].default, Some(Data::Float(vec![0.5])));
        let c = syms.find_var("c").unwrap();
        assert_eq!(syms.vars[c].ty, DataType::Color);
        assert!(syms.vars[c].default.is_some());
    }

    #[test]
    fn test_broken_function() {
        assert!(front_end("plastic() { }").is_err());
        assert!(front_end("surface 3() { }").is_err());
        assert!(front_end("void f(float x) { }").is_err());
    }

    #[test]
    fn test_locals() {
        let (tree, syms) =
            front_end("surface s() { float a = 1, b; uniform color c; a = 2; }").unwrap();
        let a = syms.find_var("a").unwrap();
        assert_eq!(syms.vars[a].storage, StorageClass::Temporary);
        assert_eq!(syms.vars[a].variability, Variability::Varying);
        let c = syms.find_var("c").unwrap();
        assert_eq!(syms.vars[c].variability, Variability::Uniform);

        // `a = 1 ;` plus `a = 2 ;`
        let f = tree.children(tree.root())[0];
        let body = tree.children(f)[1];
        let texts: Vec<_> = tree
            .children(body)
            .iter()
            .map(|n| tree.token(*n).unwrap().text.as_str())
            .collect();
        assert_eq!(texts, vec!["a", "=", "1", ";", "a", "=", "2", ";"]);
    }

    #[test]
    fn test_duplicates() {
        let e = front_end("surface s() { float p; }").unwrap_err();
        assert!(e.to_string().contains("already declared as `P`"));
        assert!(front_end("uniform float K = 1; surface s(float k = 2) { }").is_err());
        assert!(front_end("surface s() { } surface s() { }").is_err());
    }

    #[test]
    fn test_uses() {
        let (mut tree, mut syms) =
            front_end("surface s() { Ci = Cs * 2; }").unwrap();
        tree.reparent_calls(&|t| is_callee(&syms, t));
        tree.reparent_operators().unwrap();
        discover_uses(&mut tree, &mut syms).unwrap();
        assert!(syms.vars[syms.find_var("Ci").unwrap()].used);
        assert!(!syms.vars[syms.find_var("N").unwrap()].used);

        let (mut tree, mut syms) = front_end("surface s() { ci = 1; }").unwrap();
        tree.reparent_operators().unwrap();
        let e = discover_uses(&mut tree, &mut syms).unwrap_err();
        assert!(e.to_string().contains("unknown symbol `ci`"));
    }

    #[test]
    fn test_constants() {
        let (mut tree, mut syms) =
            front_end("surface s() { Ci = 2; Oi = 2; }").unwrap();
        tree.reparent_operators().unwrap();
        realize_constants(&mut tree, &mut syms);
        let consts: Vec<_> = syms
            .vars
            .values()
            .filter(|v| v.storage == StorageClass::Constant)
            .collect();
        assert_eq!(consts.len(), 1);
        assert_eq!(consts[0].name, "_c0");
    }
}
