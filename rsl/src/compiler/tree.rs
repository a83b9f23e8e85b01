//! Arena-backed token tree
//!
//! The tree starts out as a nest of bracketed blocks ([`Tree::build`]) and is
//! progressively rewritten by the compiler passes: function definitions are
//! collapsed into [`NodeKind::FuncDef`] nodes, calls capture their argument
//! brackets, and flat statements are re-parented into expression trees by
//! operator precedence.
use super::{
    indexed::{IndexVec, define_index},
    resolve::{FuncId, VarId},
    token::{Keyword, Operator, Token},
};
use crate::Error;

define_index!(NodeId, "Index of a node in a [`Tree`]");

/// Kind of tree node
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeKind {
    /// The root of the tree, with no token
    Root,
    /// Plain token, possibly with operand children once re-parented
    Token,
    /// `{ ... }` code block
    Block,
    /// Function definition; children are the parameter list and the body
    FuncDef,
    /// Function call; the only child is the argument bracket
    FuncCall,
}

/// A single node in the [`Tree`]
#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub token: Option<Token>,
    pub children: Vec<NodeId>,
    /// Resolved declaration, for name and literal tokens
    pub var: Option<VarId>,
    /// Resolved function, for definitions and calls
    pub func: Option<FuncId>,
}

impl Node {
    fn new(kind: NodeKind, token: Option<Token>) -> Self {
        Self {
            kind,
            token,
            children: vec![],
            var: None,
            func: None,
        }
    }
}

/// Precedence and right-associativity of binary operators
///
/// Lower values bind more loosely.
fn binary_precedence(op: Operator) -> Option<(u8, bool)> {
    let p = match op {
        Operator::Assign
        | Operator::AddAssign
        | Operator::SubAssign
        | Operator::MulAssign
        | Operator::DivAssign => return Some((0, true)),
        Operator::Or => 1,
        Operator::And => 2,
        Operator::Eq | Operator::NotEq => 3,
        Operator::Less
        | Operator::LessEq
        | Operator::Greater
        | Operator::GreaterEq => 4,
        Operator::Add | Operator::Sub => 5,
        Operator::Mul | Operator::Div => 6,
        Operator::Pow => 7,
        Operator::Dot => 8,
        _ => return None,
    };
    Some((p, false))
}

/// Owning arena of nodes, with a single root
#[derive(Clone, Debug)]
pub struct Tree {
    nodes: IndexVec<Node, NodeId>,
    root: NodeId,
}

impl Tree {
    /// Builds the bracket-nesting tree from a token stream
    ///
    /// Opening brackets become parents of everything up to their matching
    /// closing bracket; closing brackets are kept as siblings of their
    /// opener until [`Tree::remove_closing_brackets`] runs.
    pub fn build(tokens: Vec<Token>) -> Result<Self, Error> {
        let mut nodes = IndexVec::default();
        let root = nodes.push(Node::new(NodeKind::Root, None));
        let mut tree = Tree { nodes, root };

        let mut stack = vec![root];
        for t in tokens {
            if t.bad_number {
                return Err(Error::BadNumber {
                    line: t.line,
                    text: t.text,
                });
            }
            let parent = *stack.last().unwrap_or(&root);
            match t.op() {
                Some(op) if op.is_closer() => {
                    if stack.len() == 1 {
                        return Err(Error::parse(
                            t.line,
                            format!("unexpected `{}`", t.text),
                        ));
                    }
                    let opener = stack.pop().unwrap_or(root);
                    let expected = tree
                        .token(opener)
                        .and_then(Token::op)
                        .and_then(|o| o.closer());
                    if expected != Some(op) {
                        return Err(Error::parse(
                            t.line,
                            format!("mismatched `{}`", t.text),
                        ));
                    }
                    let parent = *stack.last().unwrap_or(&root);
                    tree.add_child(parent, NodeKind::Token, t);
                }
                Some(op) if op.closer().is_some() => {
                    let kind = if op == Operator::LBrace {
                        NodeKind::Block
                    } else {
                        NodeKind::Token
                    };
                    let id = tree.add_child(parent, kind, t);
                    stack.push(id);
                }
                _ => {
                    tree.add_child(parent, NodeKind::Token, t);
                }
            }
        }
        if let Some(&open) = stack.get(1) {
            let (line, text) = tree
                .token(open)
                .map(|t| (t.line, t.text.clone()))
                .unwrap_or_default();
            return Err(Error::parse(line, format!("unclosed `{text}`")));
        }
        Ok(tree)
    }

    fn add_child(&mut self, parent: NodeId, kind: NodeKind, t: Token) -> NodeId {
        let id = self.nodes.push(Node::new(kind, Some(t)));
        self.nodes[parent].children.push(id);
        id
    }

    /// Adds a detached token node
    pub fn push_token(&mut self, t: Token) -> NodeId {
        self.nodes.push(Node::new(NodeKind::Token, Some(t)))
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id].kind
    }

    pub fn token(&self, id: NodeId) -> Option<&Token> {
        self.nodes[id].token.as_ref()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn set_children(&mut self, id: NodeId, children: Vec<NodeId>) {
        self.nodes[id].children = children;
    }

    /// Returns the operator of an unreduced operator token
    ///
    /// Opening brackets and operators that already have operands are not
    /// counted, since they act as operands themselves.
    fn raw_op(&self, id: NodeId) -> Option<Operator> {
        let n = &self.nodes[id];
        if n.kind != NodeKind::Token || !n.children.is_empty() {
            return None;
        }
        n.token
            .as_ref()
            .and_then(Token::op)
            .filter(|o| o.closer().is_none())
    }

    /// Returns the source line of a node, searching children if needed
    pub fn line(&self, id: NodeId) -> usize {
        let n = &self.nodes[id];
        match &n.token {
            Some(t) => t.line,
            None => n.children.first().map(|c| self.line(*c)).unwrap_or(0),
        }
    }

    /// Checks whether the node is a token with the given operator
    pub fn is_op(&self, id: NodeId, op: Operator) -> bool {
        self.token(id).is_some_and(|t| t.is_op(op))
    }

    /// Removes every closing bracket from the tree
    pub fn remove_closing_brackets(&mut self) {
        self.remove_tokens(self.root, &|t| t.op().is_some_and(|o| o.is_closer()));
    }

    fn remove_tokens(&mut self, id: NodeId, f: &dyn Fn(&Token) -> bool) {
        let children = std::mem::take(&mut self.nodes[id].children);
        let kept: Vec<NodeId> = children
            .into_iter()
            .filter(|c| !self.token(*c).is_some_and(f))
            .collect();
        for &c in &kept {
            self.remove_tokens(c, f);
        }
        self.nodes[id].children = kept;
    }

    /// Turns `callee ( ... )` sequences into [`NodeKind::FuncCall`] nodes
    ///
    /// `is_callee` decides which tokens may be called (constructors,
    /// standard functions, and user functions).
    pub fn reparent_calls(&mut self, is_callee: &dyn Fn(&Token) -> bool) {
        self.reparent_calls_in(self.root, is_callee)
    }

    fn reparent_calls_in(&mut self, id: NodeId, is_callee: &dyn Fn(&Token) -> bool) {
        let children = std::mem::take(&mut self.nodes[id].children);
        let mut out: Vec<NodeId> = Vec::with_capacity(children.len());
        for c in children {
            if self.is_op(c, Operator::LParen) {
                if let Some(&prev) = out.last() {
                    let n = &self.nodes[prev];
                    if n.kind == NodeKind::Token
                        && n.children.is_empty()
                        && n.token.as_ref().is_some_and(is_callee)
                    {
                        self.nodes[prev].kind = NodeKind::FuncCall;
                        self.nodes[prev].children.push(c);
                        continue;
                    }
                }
            }
            out.push(c);
        }
        for &c in &out {
            self.reparent_calls_in(c, is_callee);
        }
        self.nodes[id].children = out;
    }

    /// Rewrites flat statements into expression trees
    ///
    /// Blocks are split into statements at `;` and argument brackets are
    /// split into arguments at `,`; the separators are dropped.
    pub fn reparent_operators(&mut self) -> Result<(), Error> {
        self.reparent(self.root)
    }

    fn reparent(&mut self, id: NodeId) -> Result<(), Error> {
        let sep = match self.kind(id) {
            NodeKind::Root | NodeKind::Block => Operator::Semicolon,
            NodeKind::FuncDef | NodeKind::FuncCall => {
                for c in self.children(id).to_vec() {
                    self.reparent(c)?;
                }
                return Ok(());
            }
            NodeKind::Token if self.nodes[id].children.is_empty() => {
                return Ok(());
            }
            NodeKind::Token => Operator::Comma,
        };
        let children = std::mem::take(&mut self.nodes[id].children);
        let mut groups: Vec<Vec<NodeId>> = vec![vec![]];
        for c in children {
            if self.is_op(c, sep) {
                groups.push(vec![]);
            } else if sep == Operator::Semicolon
                && matches!(self.kind(c), NodeKind::FuncDef | NodeKind::Block)
            {
                groups.push(vec![c]);
                groups.push(vec![]);
            } else if let Some(g) = groups.last_mut() {
                g.push(c);
            }
        }
        let mut out = vec![];
        let count = groups.len();
        for g in groups {
            if g.is_empty() {
                // Empty statements are harmless; empty arguments are not
                if sep == Operator::Comma && count > 1 {
                    return Err(Error::parse(self.line(id), "missing argument"));
                }
                continue;
            }
            for &n in &g {
                self.reparent(n)?;
            }
            out.push(self.build_expr(&g)?);
        }
        self.nodes[id].children = out;
        Ok(())
    }

    fn build_expr(&mut self, items: &[NodeId]) -> Result<NodeId, Error> {
        match items {
            [] => return Err(Error::parse(0, "empty expression")),
            [one] => return Ok(*one),
            _ => (),
        }

        // Lowest-precedence binary operator; rightmost wins ties unless the
        // operator is right-associative
        let mut best: Option<(usize, u8)> = None;
        for (i, &n) in items.iter().enumerate() {
            let Some((prec, right)) = self.raw_op(n).and_then(binary_precedence)
            else {
                continue;
            };
            if i == 0 || self.raw_op(items[i - 1]).is_some() {
                continue;
            }
            match best {
                Some((_, p)) if p < prec || (p == prec && right) => (),
                _ => best = Some((i, prec)),
            }
        }

        if let Some((i, _)) = best {
            let op = items[i];
            if i + 1 == items.len() {
                return Err(self.missing_operand(op));
            }
            let lhs = self.build_expr(&items[..i])?;
            let rhs = self.build_expr(&items[i + 1..])?;
            self.nodes[op].children = vec![lhs, rhs];
            return Ok(op);
        }

        let first = items[0];
        if matches!(self.raw_op(first), Some(Operator::Sub | Operator::Not)) {
            let arg = self.build_expr(&items[1..])?;
            self.nodes[first].children = vec![arg];
            return Ok(first);
        }

        let line = self.line(first);
        if let Some(k) = self
            .token(first)
            .and_then(Token::keyword)
            .filter(Keyword::is_control_flow)
        {
            let name: &str = k.into();
            return Err(Error::parse(
                line,
                format!("`{name}` statements are not supported"),
            ));
        }
        let text = self.token(items[1]).map(|t| t.text.clone()).unwrap_or_default();
        Err(Error::parse(self.line(items[1]), format!("unexpected `{text}`")))
    }

    fn missing_operand(&self, op: NodeId) -> Error {
        let text = self.token(op).map(|t| t.text.as_str()).unwrap_or("?");
        Error::parse(self.line(op), format!("missing operand for `{text}`"))
    }

    /// Renders the tree as indented text, for debugging
    ///
    /// Each line shows the token text, the node kind, and a `ws` marker for
    /// tokens that followed whitespace.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(self.root, 0, &mut out);
        out
    }

    fn dump_node(&self, id: NodeId, depth: usize, out: &mut String) {
        use std::fmt::Write;
        let n = &self.nodes[id];
        let text = n.token.as_ref().map(|t| t.text.as_str()).unwrap_or("<root>");
        let ws = if n.token.as_ref().is_some_and(|t| t.after_space) {
            " ws"
        } else {
            ""
        };
        let _ = writeln!(out, "{:indent$}{text} [{:?}]{ws}", "", n.kind, indent = depth * 2);
        for &c in &n.children {
            self.dump_node(c, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compiler::token::tokenize;

    fn expr_tree(src: &str) -> Tree {
        let mut t = Tree::build(tokenize(src)).unwrap();
        t.remove_closing_brackets();
        t.reparent_operators().unwrap();
        t
    }

    fn text(t: &Tree, id: NodeId) -> &str {
        t.token(id).unwrap().text.as_str()
    }

    #[test]
    fn test_nesting() {
        let t = Tree::build(tokenize("a ( b [ c ] ) { d }")).unwrap();
        let root = t.children(t.root());
        assert_eq!(root.len(), 5);
        assert_eq!(t.children(root[1]).len(), 3);
        assert_eq!(t.kind(root[3]), NodeKind::Block);
        assert!(t.is_op(root[4], Operator::RBrace));

        assert!(Tree::build(tokenize("( ]")).is_err());
        assert!(Tree::build(tokenize("{ (")).is_err());
        assert!(Tree::build(tokenize("a )")).is_err());
        assert!(matches!(
            Tree::build(tokenize("x = 1.2.3;")),
            Err(Error::BadNumber { line: 1, .. })
        ));
    }

    #[test]
    fn test_precedence() {
        let t = expr_tree("a = b + c * d;");
        let stmts = t.children(t.root());
        assert_eq!(stmts.len(), 1);
        let assign = stmts[0];
        assert_eq!(text(&t, assign), "=");
        let [a, add] = t.children(assign) else { panic!() };
        assert_eq!(text(&t, *a), "a");
        assert_eq!(text(&t, *add), "+");
        let [b, mul] = t.children(*add) else { panic!() };
        assert_eq!(text(&t, *b), "b");
        assert_eq!(text(&t, *mul), "*");
        assert_eq!(t.children(*mul).len(), 2);
    }

    #[test]
    fn test_grouping() {
        let t = expr_tree("a = (b + c) * d;");
        let assign = t.children(t.root())[0];
        let mul = t.children(assign)[1];
        assert_eq!(text(&t, mul), "*");
        let paren = t.children(mul)[0];
        assert!(t.is_op(paren, Operator::LParen));
        let add = t.children(paren)[0];
        assert_eq!(text(&t, add), "+");
        assert_eq!(text(&t, t.children(mul)[1]), "d");
    }

    #[test]
    fn test_associativity() {
        // Left-to-right for subtraction
        let t = expr_tree("x = a - b - c;");
        let assign = t.children(t.root())[0];
        let outer = t.children(assign)[1];
        let inner = t.children(outer)[0];
        assert_eq!(text(&t, inner), "-");
        assert_eq!(text(&t, t.children(outer)[1]), "c");

        // Right-to-left for assignment
        let t = expr_tree("x = y = z;");
        let outer = t.children(t.root())[0];
        assert_eq!(text(&t, t.children(outer)[0]), "x");
        assert_eq!(text(&t, t.children(outer)[1]), "=");
    }

    #[test]
    fn test_unary_minus() {
        let t = expr_tree("x = a * -b;");
        let assign = t.children(t.root())[0];
        let mul = t.children(assign)[1];
        assert_eq!(text(&t, mul), "*");
        let neg = t.children(mul)[1];
        assert_eq!(text(&t, neg), "-");
        assert_eq!(t.children(neg).len(), 1);

        let t = expr_tree("x = -a + b;");
        let add = t.children(t.children(t.root())[0])[1];
        assert_eq!(text(&t, add), "+");
        assert_eq!(t.children(t.children(add)[0]).len(), 1);
    }

    #[test]
    fn test_errors() {
        let mut t = Tree::build(tokenize("x = ;")).unwrap();
        assert!(t.reparent_operators().is_err());

        let mut t = Tree::build(tokenize("if (x) y = 1;")).unwrap();
        t.remove_closing_brackets();
        let e = t.reparent_operators().unwrap_err();
        assert!(e.to_string().contains("`if`"));
    }

    #[test]
    fn test_dump() {
        let t = expr_tree("a = b;");
        let d = t.dump();
        assert!(d.starts_with("<root> [Root]"));
        assert!(d.contains("  = [Token] ws"));
        assert!(d.contains("    b [Token] ws"));
    }
}
