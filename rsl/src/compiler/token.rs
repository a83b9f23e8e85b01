//! Lexer for shading-language source text
use crate::types::{DataType, ShaderType};
use std::sync::LazyLock;
use strum::IntoEnumIterator;

/// Punctuation and operator lexemes
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum Operator {
    #[strum(to_string = "<=")]
    LessEq,
    #[strum(to_string = ">=")]
    GreaterEq,
    #[strum(to_string = "<")]
    Less,
    #[strum(to_string = ">")]
    Greater,
    #[strum(to_string = "&&")]
    And,
    #[strum(to_string = "||")]
    Or,
    #[strum(to_string = "==")]
    Eq,
    #[strum(to_string = "!=")]
    NotEq,
    #[strum(to_string = "+=")]
    AddAssign,
    #[strum(to_string = "-=")]
    SubAssign,
    #[strum(to_string = "*=")]
    MulAssign,
    #[strum(to_string = "/=")]
    DivAssign,
    #[strum(to_string = "+")]
    Add,
    #[strum(to_string = "-")]
    Sub,
    #[strum(to_string = "*")]
    Mul,
    #[strum(to_string = "/")]
    Div,
    #[strum(to_string = "=")]
    Assign,
    #[strum(to_string = "^")]
    Pow,
    #[strum(to_string = ".")]
    Dot,
    #[strum(to_string = "!")]
    Not,
    #[strum(to_string = "?")]
    Question,
    #[strum(to_string = ":")]
    Colon,
    #[strum(to_string = ",")]
    Comma,
    #[strum(to_string = ";")]
    Semicolon,
    #[strum(to_string = "(")]
    LParen,
    #[strum(to_string = ")")]
    RParen,
    #[strum(to_string = "[")]
    LSquare,
    #[strum(to_string = "]")]
    RSquare,
    #[strum(to_string = "{")]
    LBrace,
    #[strum(to_string = "}")]
    RBrace,
}

impl Operator {
    /// Returns the closing bracket matching an opening one
    pub fn closer(&self) -> Option<Operator> {
        match self {
            Operator::LParen => Some(Operator::RParen),
            Operator::LSquare => Some(Operator::RSquare),
            Operator::LBrace => Some(Operator::RBrace),
            _ => None,
        }
    }

    pub fn is_closer(&self) -> bool {
        matches!(
            self,
            Operator::RParen | Operator::RSquare | Operator::RBrace
        )
    }

    pub fn is_assignment(&self) -> bool {
        matches!(
            self,
            Operator::Assign
                | Operator::AddAssign
                | Operator::SubAssign
                | Operator::MulAssign
                | Operator::DivAssign
        )
    }
}

/// Reserved words that are neither data types nor standard functions
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Keyword {
    Varying,
    Uniform,
    Output,
    Extern,
    Void,
    If,
    Else,
    For,
    While,
    Solar,
    Illuminate,
    Illuminance,
    Break,
    Continue,
    Return,
    Light,
    Surface,
    Volume,
    Displacement,
    Transformation,
    Imager,
}

impl Keyword {
    /// Returns the shader type named by this keyword, if any
    pub fn shader_type(&self) -> Option<ShaderType> {
        match self {
            Keyword::Light => Some(ShaderType::Light),
            Keyword::Surface => Some(ShaderType::Surface),
            Keyword::Volume => Some(ShaderType::Volume),
            Keyword::Displacement => Some(ShaderType::Displacement),
            Keyword::Transformation => Some(ShaderType::Transformation),
            Keyword::Imager => Some(ShaderType::Imager),
            _ => None,
        }
    }

    /// Checks whether this keyword opens a control-flow construct
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            Keyword::If
                | Keyword::Else
                | Keyword::For
                | Keyword::While
                | Keyword::Solar
                | Keyword::Illuminate
                | Keyword::Illuminance
                | Keyword::Break
                | Keyword::Continue
        )
    }
}

/// Names of the standard library functions
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum StdFunction {
    Abs,
    Ambient,
    CalculateNormal,
    CellNoise,
    Clamp,
    Comp,
    Concat,
    CTransform,
    Determinant,
    Diffuse,
    Environment,
    FaceForward,
    FilterStep,
    Format,
    InverseSqrt,
    Match,
    Max,
    Min,
    Mix,
    Noise,
    Normalize,
    NTransform,
    PNoise,
    PtLined,
    Random,
    Reflect,
    Rotate,
    Scale,
    SetComp,
    SetXComp,
    SetYComp,
    SetZComp,
    Shadow,
    Specular,
    SpecularBrdf,
    Spline,
    Sqrt,
    Texture,
    Transform,
    Translate,
    VTransform,
    XComp,
    YComp,
    ZComp,
}

/// Coarse token class, with the matching table entry where there is one
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TokenClass {
    /// Numeric or string literal
    Value,
    Operator(Operator),
    DataType(DataType),
    Keyword(Keyword),
    StdFunction(StdFunction),
    /// Any other name, resolved later against the symbol table
    Unknown,
}

/// Literal payload of a [`TokenClass::Value`] token
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    None,
    Number(f32),
    Str(String),
}

/// A single lexeme
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    /// Raw source text (strings keep their quotes and escapes)
    pub text: String,
    pub class: TokenClass,
    pub value: Literal,
    /// 1-based source line
    pub line: usize,
    /// Separated from the previous token by whitespace or a comment
    pub after_space: bool,
    /// Numeric literal with a second decimal point or a broken exponent
    pub bad_number: bool,
}

impl Token {
    fn new(text: String, class: TokenClass, line: usize) -> Self {
        Self {
            text,
            class,
            value: Literal::None,
            line,
            after_space: false,
            bad_number: false,
        }
    }

    /// Builds an operator token with no source position of its own
    pub fn operator(op: Operator, line: usize) -> Self {
        let text: &'static str = op.into();
        Self::new(text.to_owned(), TokenClass::Operator(op), line)
    }

    /// Returns the operator, if this is an operator token
    pub fn op(&self) -> Option<Operator> {
        match self.class {
            TokenClass::Operator(op) => Some(op),
            _ => None,
        }
    }

    pub fn is_op(&self, op: Operator) -> bool {
        self.op() == Some(op)
    }

    pub fn keyword(&self) -> Option<Keyword> {
        match self.class {
            TokenClass::Keyword(k) => Some(k),
            _ => None,
        }
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self.class {
            TokenClass::DataType(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self.value, Literal::Number(..))
    }

    /// Checks whether this token is a plain name
    pub fn is_name(&self) -> bool {
        self.class == TokenClass::Unknown
    }
}

/// Fixed lexeme table, sorted by descending length for longest-match
static TABLE: LazyLock<Vec<(&'static str, TokenClass)>> = LazyLock::new(|| {
    let mut out: Vec<(&'static str, TokenClass)> = vec![];
    out.extend(Operator::iter().map(|o| (o.into(), TokenClass::Operator(o))));
    out.extend(DataType::iter().map(|t| (t.into(), TokenClass::DataType(t))));
    out.extend(Keyword::iter().map(|k| (k.into(), TokenClass::Keyword(k))));
    out.extend(
        StdFunction::iter().map(|f| (f.into(), TokenClass::StdFunction(f))),
    );
    out.sort_by_key(|(s, _)| std::cmp::Reverse(s.len()));
    out
});

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

struct Lexer {
    chars: Vec<char>,
    i: usize,
    line: usize,
    after_space: bool,
    /// Name being accumulated from fallback characters
    pending: Option<Token>,
    out: Vec<Token>,
}

impl Lexer {
    fn peek(&self, n: usize) -> Option<char> {
        self.chars.get(self.i + n).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars().enumerate().all(|(j, c)| self.peek(j) == Some(c))
    }

    fn flush(&mut self) {
        if let Some(t) = self.pending.take() {
            self.out.push(t);
        }
    }

    fn emit(&mut self, mut t: Token) {
        self.flush();
        t.after_space = self.after_space;
        self.after_space = false;
        self.out.push(t);
    }

    /// Skips `/* */` and `//` comments, returning true if one was found
    fn skip_comment(&mut self) -> bool {
        if self.starts_with("/*") {
            self.i += 2;
            while self.i < self.chars.len() && !self.starts_with("*/") {
                if self.chars[self.i] == '\n' {
                    self.line += 1;
                }
                self.i += 1;
            }
            self.i = (self.i + 2).min(self.chars.len());
        } else if self.starts_with("//") {
            while self.peek(0).is_some_and(|c| c != '\n') {
                self.i += 1;
            }
        } else {
            return false;
        }
        self.flush();
        self.after_space = true;
        true
    }

    fn skip_whitespace(&mut self) -> bool {
        let mut found = false;
        while let Some(c) = self.peek(0).filter(|c| c.is_whitespace()) {
            if c == '\n' {
                self.line += 1;
            }
            self.i += 1;
            found = true;
        }
        if found {
            self.flush();
            self.after_space = true;
        }
        found
    }

    fn scan_number(&mut self) -> bool {
        if self.pending.is_some() {
            return false;
        }
        let starts = match self.peek(0) {
            Some(c) if c.is_ascii_digit() => true,
            Some('.') => self.peek(1).is_some_and(|c| c.is_ascii_digit()),
            _ => false,
        };
        if !starts {
            return false;
        }
        let start = self.i;
        let mut dot = false;
        let mut exp = false;
        let mut bad = false;
        while let Some(c) = self.peek(0) {
            if c.is_ascii_digit() {
                self.i += 1;
            } else if c == '.' {
                if dot || exp {
                    bad = true;
                    break;
                }
                dot = true;
                self.i += 1;
            } else if c == 'e' || c == 'E' {
                if exp {
                    bad = true;
                    break;
                }
                exp = true;
                self.i += 1;
                if matches!(self.peek(0), Some('+' | '-')) {
                    self.i += 1;
                }
                if !self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
                    bad = true;
                    break;
                }
            } else if matches!(c, 'f' | 'F' | 'd' | 'D') {
                self.i += 1;
                break;
            } else {
                break;
            }
        }
        if bad {
            while self
                .peek(0)
                .is_some_and(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E'))
            {
                self.i += 1;
            }
        }
        let text: String = self.chars[start..self.i].iter().collect();
        let mut t = Token::new(text, TokenClass::Value, self.line);
        if bad {
            t.bad_number = true;
        } else {
            let digits = t.text.trim_end_matches(['f', 'F', 'd', 'D']);
            match digits.parse::<f32>() {
                Ok(v) => t.value = Literal::Number(v),
                Err(_) => t.bad_number = true,
            }
        }
        self.emit(t);
        true
    }

    fn scan_string(&mut self) -> bool {
        if self.peek(0) != Some('"') {
            return false;
        }
        let start = self.i;
        let line = self.line;
        let mut value = String::new();
        self.i += 1;
        while let Some(c) = self.peek(0) {
            self.i += 1;
            match c {
                '"' => break,
                '\\' => {
                    let e = self.peek(0).unwrap_or('\\');
                    self.i += 1;
                    value.push(match e {
                        'n' => '\n',
                        't' => '\t',
                        c => c,
                    });
                }
                '\n' => {
                    self.line += 1;
                    value.push(c);
                }
                c => value.push(c),
            }
        }
        let text: String = self.chars[start..self.i.min(self.chars.len())]
            .iter()
            .collect();
        let mut t = Token::new(text, TokenClass::Value, line);
        t.value = Literal::Str(value);
        self.emit(t);
        true
    }

    fn match_table(&mut self) -> bool {
        for &(s, class) in TABLE.iter() {
            let alpha = s.starts_with(|c: char| c.is_ascii_alphabetic());
            if alpha
                && (self.pending.is_some()
                    || self.peek(s.len()).is_some_and(is_name_char))
            {
                continue;
            }
            if self.starts_with(s) {
                self.i += s.len();
                let t = Token::new(s.to_owned(), class, self.line);
                self.emit(t);
                return true;
            }
        }
        false
    }

    fn run(mut self) -> Vec<Token> {
        while let Some(c) = self.peek(0) {
            if self.skip_comment()
                || self.skip_whitespace()
                || self.scan_number()
                || self.scan_string()
                || self.match_table()
            {
                continue;
            }
            match &mut self.pending {
                Some(t) => t.text.push(c),
                None => {
                    let mut t =
                        Token::new(c.to_string(), TokenClass::Unknown, self.line);
                    t.after_space = self.after_space;
                    self.after_space = false;
                    self.pending = Some(t);
                }
            }
            self.i += 1;
        }
        self.flush();
        self.out
    }
}

/// Converts source text into a flat, materialized token sequence
///
/// Whitespace and comments are not emitted; instead, the token that follows
/// them has [`Token::after_space`] set.  Malformed numbers are flagged with
/// [`Token::bad_number`] and reported by later passes.
pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer {
        chars: source.chars().collect(),
        i: 0,
        line: 1,
        after_space: false,
        pending: None,
        out: vec![],
    }
    .run()
}

/// Re-serializes tokens, separated by single spaces
pub fn render(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod test {
    use super::*;

    fn classes(tokens: &[Token]) -> Vec<(TokenClass, Literal)> {
        tokens.iter().map(|t| (t.class, t.value.clone())).collect()
    }

    #[test]
    fn test_longest_match() {
        let t = tokenize("a<=b<c");
        let ops: Vec<_> = t.iter().filter_map(Token::op).collect();
        assert_eq!(ops, vec![Operator::LessEq, Operator::Less]);
        assert_eq!(t.len(), 5);
    }

    #[test]
    fn test_words() {
        let t = tokenize("floaty float normalize(N)");
        assert_eq!(t[0].class, TokenClass::Unknown);
        assert_eq!(t[0].text, "floaty");
        assert_eq!(t[1].class, TokenClass::DataType(DataType::Float));
        assert_eq!(
            t[2].class,
            TokenClass::StdFunction(StdFunction::Normalize)
        );
        assert!(t[3].is_op(Operator::LParen));
        assert_eq!(t[4].text, "N");
    }

    #[test]
    fn test_numbers() {
        let t = tokenize("1 .5 2.5e-3 3f x1 1.2.3 4e");
        assert_eq!(t[0].value, Literal::Number(1.0));
        assert_eq!(t[1].value, Literal::Number(0.5));
        assert_eq!(t[2].value, Literal::Number(2.5e-3));
        assert_eq!(t[3].value, Literal::Number(3.0));
        assert_eq!(t[4].class, TokenClass::Unknown);
        assert_eq!(t[4].text, "x1");
        assert!(t[5].bad_number);
        assert_eq!(t[5].text, "1.2.3");
        assert!(t[6].bad_number);
        assert_eq!(t.len(), 7);
    }

    #[test]
    fn test_whitespace_flag() {
        let t = tokenize("a -b /* c */ d");
        assert!(!t[0].after_space);
        assert!(t[1].after_space);
        assert!(!t[2].after_space);
        assert!(t[3].after_space);
        assert_eq!(t[3].text, "d");
    }

    #[test]
    fn test_strings_and_lines() {
        let t = tokenize("s = \"a\\\"b\";\n// comment\nt");
        assert_eq!(t[2].value, Literal::Str("a\"b".to_owned()));
        assert_eq!(t[2].text, "\"a\\\"b\"");
        assert_eq!(t[3].line, 1);
        assert_eq!(t[4].line, 3);
    }

    #[test]
    fn test_round_trip() {
        let src = "surface plastic(float Ks=.5; color c = 1) \
                   { Ci = c * diffuse(faceforward(normalize(N),I)) \
                   + Ks*\"hi\\n\"; a<=b; x = -1.5e3f; }";
        let a = tokenize(src);
        let b = tokenize(&render(&a));
        assert_eq!(classes(&a), classes(&b));
        let c = tokenize(&render(&b));
        assert_eq!(classes(&b), classes(&c));
    }
}
