//! Lexer and parser for the Jinja-style template language embedded in rules.
//!
//! The parser only builds a syntax tree for static inspection; nothing here
//! evaluates a template. Supported syntax: `{{ }}` output, `{% %}` tags,
//! `{# #}` comments, `raw` blocks, `if`/`elif`/`else`, `for ... in ... [if]`
//! with `else`, inline and block `set`, `macro`, `with`, `filter` blocks,
//! `import`/`from`/`include`, `do`, `break` and `continue`, and the full
//! expression grammar (filters, tests, calls, subscripts and slices, attribute
//! access, literals, list/tuple/dict displays, conditional expressions).

use regex::Regex;
use std::sync::LazyLock;

use crate::error::TemplateSyntaxError;

/// Parenthesized expressions and nested tags deeper than this are rejected.
const MAX_NESTING: usize = 64;

/// Links in left-nested chains (filters, tests, calls, attributes, subscripts,
/// binary operators) open on the current path. Each link is one tree level.
const MAX_CHAIN: usize = 256;

// ─── AST ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
}

/// Arguments of a call, filter or test.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Arguments {
    pub positional: Vec<Expr>,
    pub keyword: Vec<(String, Expr)>,
    /// `*args` and `**kwargs` splats. Arity is unknown when any are present.
    pub splat: Vec<Expr>,
}

impl Arguments {
    pub fn is_dynamic(&self) -> bool {
        !self.splat.is_empty()
    }

    fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        for e in &self.positional {
            e.visit(f);
        }
        for (_, e) in &self.keyword {
            e.visit(f);
        }
        for e in &self.splat {
            e.visit(f);
        }
    }
}

/// A named filter or test with its arguments. Dotted names are joined.
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    pub name: String,
    pub args: Arguments,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Concat,
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Attr {
        value: Box<Expr>,
        attr: String,
    },
    Item {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        value: Box<Expr>,
        start: Option<Box<Expr>>,
        stop: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Call {
        func: Box<Expr>,
        args: Arguments,
    },
    Filter {
        value: Box<Expr>,
        filter: Invocation,
    },
    Test {
        value: Box<Expr>,
        test: Invocation,
        negated: bool,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<(CompareOp, Expr)>,
    },
    Conditional {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
}

impl Expr {
    /// Call `f` on this expression and every sub-expression, parents first.
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Literal(_) | Expr::Name(_) => {}
            Expr::List(items) | Expr::Tuple(items) => {
                for item in items {
                    item.visit(f);
                }
            }
            Expr::Dict(pairs) => {
                for (k, v) in pairs {
                    k.visit(f);
                    v.visit(f);
                }
            }
            Expr::Attr { value, .. } => value.visit(f),
            Expr::Item { value, index } => {
                value.visit(f);
                index.visit(f);
            }
            Expr::Slice {
                value,
                start,
                stop,
                step,
            } => {
                value.visit(f);
                for bound in [start, stop, step].into_iter().flatten() {
                    bound.visit(f);
                }
            }
            Expr::Call { func, args } => {
                func.visit(f);
                args.visit(f);
            }
            Expr::Filter { value, filter } => {
                value.visit(f);
                filter.args.visit(f);
            }
            Expr::Test { value, test, .. } => {
                value.visit(f);
                test.args.visit(f);
            }
            Expr::Unary { operand, .. } => operand.visit(f),
            Expr::Binary { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            Expr::Compare { left, ops } => {
                left.visit(f);
                for (_, e) in ops {
                    e.visit(f);
                }
            }
            Expr::Conditional {
                test,
                then,
                otherwise,
            } => {
                test.visit(f);
                then.visit(f);
                if let Some(e) = otherwise {
                    e.visit(f);
                }
            }
        }
    }
}

/// Left-hand side of a `set`.
#[derive(Clone, Debug, PartialEq)]
pub enum SetTarget {
    Name(String),
    /// `set ns.attr = ...` assigns into an existing namespace object.
    Attr { object: String, attr: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct MacroParam {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Text(String),
    Output(Expr),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    For {
        targets: Vec<String>,
        iter: Expr,
        filter: Option<Expr>,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Set {
        targets: Vec<SetTarget>,
        value: Expr,
    },
    SetBlock {
        target: SetTarget,
        filters: Vec<Invocation>,
        body: Vec<Node>,
    },
    Macro {
        name: String,
        params: Vec<MacroParam>,
        body: Vec<Node>,
    },
    With {
        bindings: Vec<(String, Expr)>,
        body: Vec<Node>,
    },
    FilterBlock {
        filters: Vec<Invocation>,
        body: Vec<Node>,
    },
    /// `import` and `from ... import`; `names` are the bindings introduced.
    Import {
        source: Expr,
        names: Vec<String>,
    },
    Include(Expr),
    Do(Expr),
    Break,
    Continue,
}

/// A parsed template.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Template {
    pub body: Vec<Node>,
}

/// Parse template source into a syntax tree.
pub fn parse(source: &str) -> Result<Template, TemplateSyntaxError> {
    let tokens = Lexer::new(source).run()?;
    let mut parser = Parser {
        src: source,
        tokens,
        pos: 0,
        depth: 0,
        links: 0,
    };
    let (body, _) = parser.subparse(&[])?;
    Ok(Template { body })
}

fn error_at(src: &str, offset: usize, message: impl Into<String>) -> TemplateSyntaxError {
    let offset = offset.min(src.len());
    let before = src.get(..offset).unwrap_or(src);
    let line = before.matches('\n').count() + 1;
    let column = match before.rfind('\n') {
        Some(nl) => before[nl + 1..].chars().count() + 1,
        None => before.chars().count() + 1,
    };
    TemplateSyntaxError {
        message: message.into(),
        line,
        column,
    }
}

// ─── Lexer ───────────────────────────────────────────────────────────────────

static RAW_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*raw\s*[-+]?%\}").unwrap());

static RAW_CLOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%[-+]?\s*endraw\s*[-+]?%\}").unwrap());

/// Longest operators first so `//` wins over `/`.
const OPERATORS: &[&str] = &[
    "//", "**", "==", "!=", "<=", ">=", "+", "-", "*", "/", "%", "~", "(", ")", "[", "]", "{",
    "}", ",", ".", ":", "|", "=", "<", ">",
];

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Data(String),
    VarStart,
    VarEnd,
    BlockStart,
    BlockEnd,
    Name(String),
    Str(String),
    Int(i64),
    Float(f64),
    Op(&'static str),
    Eof,
}

#[derive(Clone, Debug)]
struct Token {
    tok: Tok,
    offset: usize,
}

struct Lexer<'s> {
    src: &'s str,
    pos: usize,
    tokens: Vec<Token>,
}

impl<'s> Lexer<'s> {
    fn new(src: &'s str) -> Self {
        Lexer {
            src,
            pos: 0,
            tokens: Vec::new(),
        }
    }

    fn push(&mut self, tok: Tok, offset: usize) {
        self.tokens.push(Token { tok, offset });
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> TemplateSyntaxError {
        error_at(self.src, offset, message)
    }

    fn run(mut self) -> Result<Vec<Token>, TemplateSyntaxError> {
        let src = self.src;
        while self.pos < src.len() {
            let rest = &src[self.pos..];
            let next = ["{{", "{%", "{#"]
                .iter()
                .filter_map(|m| rest.find(m).map(|i| (i, *m)))
                .min_by_key(|(i, _)| *i);

            let Some((i, marker)) = next else {
                self.push(Tok::Data(rest.to_string()), self.pos);
                self.pos = src.len();
                break;
            };
            if i > 0 {
                self.push(Tok::Data(rest[..i].to_string()), self.pos);
            }
            let start = self.pos + i;
            self.pos = start + 2;

            match marker {
                "{#" => match src[self.pos..].find("#}") {
                    Some(j) => self.pos += j + 2,
                    None => return Err(self.error(start, "unterminated comment")),
                },
                "{{" => {
                    self.push(Tok::VarStart, start);
                    self.skip_whitespace_marker();
                    self.inside("}}", Tok::VarEnd, start)?;
                }
                _ => {
                    self.skip_whitespace_marker();
                    if self.raw_block(start)? {
                        continue;
                    }
                    self.push(Tok::BlockStart, start);
                    self.inside("%}", Tok::BlockEnd, start)?;
                }
            }
        }
        self.push(Tok::Eof, src.len());
        Ok(self.tokens)
    }

    fn skip_whitespace_marker(&mut self) {
        if self.src[self.pos..].starts_with(['-', '+']) {
            self.pos += 1;
        }
    }

    /// Consume a `{% raw %}...{% endraw %}` block as literal data.
    fn raw_block(&mut self, start: usize) -> Result<bool, TemplateSyntaxError> {
        let Some(open) = RAW_OPEN_RE.find(&self.src[self.pos..]) else {
            return Ok(false);
        };
        let content_start = self.pos + open.end();
        let Some(close) = RAW_CLOSE_RE.find(&self.src[content_start..]) else {
            return Err(self.error(start, "missing '{% endraw %}'"));
        };
        let content = &self.src[content_start..content_start + close.start()];
        if !content.is_empty() {
            self.push(Tok::Data(content.to_string()), content_start);
        }
        self.pos = content_start + close.end();
        Ok(true)
    }

    /// Tokenize the inside of a tag up to and including `end`.
    fn inside(&mut self, end: &str, end_tok: Tok, start: usize) -> Result<(), TemplateSyntaxError> {
        let src = self.src;
        let mut brackets: Vec<char> = Vec::new();
        loop {
            let rest = &src[self.pos..];
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();
            let rest = trimmed;

            if rest.is_empty() {
                return Err(self.error(start, format!("unexpected end of template, expected '{}'", end)));
            }
            if brackets.is_empty() {
                if rest.starts_with(end) {
                    self.push(end_tok, self.pos);
                    self.pos += end.len();
                    return Ok(());
                }
                if rest.starts_with(['-', '+']) && rest[1..].starts_with(end) {
                    self.push(end_tok, self.pos);
                    self.pos += end.len() + 1;
                    return Ok(());
                }
            }

            let offset = self.pos;
            let Some(c) = rest.chars().next() else {
                continue;
            };
            if c == '\'' || c == '"' {
                let (value, len) = self.string(rest, c, offset)?;
                self.push(Tok::Str(value), offset);
                self.pos += len;
            } else if c.is_ascii_digit() {
                let (tok, len) = self.number(rest, offset)?;
                self.push(tok, offset);
                self.pos += len;
            } else if c.is_alphabetic() || c == '_' {
                let len = rest
                    .find(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
                    .unwrap_or(rest.len());
                self.push(Tok::Name(rest[..len].to_string()), offset);
                self.pos += len;
            } else if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) {
                match *op {
                    "(" => brackets.push(')'),
                    "[" => brackets.push(']'),
                    "{" => brackets.push('}'),
                    ")" | "]" | "}" => {
                        let close = op.chars().next();
                        if brackets.pop() != close {
                            return Err(self.error(offset, format!("unexpected '{}'", op)));
                        }
                    }
                    _ => {}
                }
                self.push(Tok::Op(*op), offset);
                self.pos += op.len();
            } else {
                return Err(self.error(offset, format!("unexpected character '{}'", c)));
            }
        }
    }

    fn string(
        &self,
        rest: &str,
        quote: char,
        offset: usize,
    ) -> Result<(String, usize), TemplateSyntaxError> {
        let mut out = String::new();
        let mut chars = rest.char_indices().skip(1);
        while let Some((i, ch)) = chars.next() {
            if ch == quote {
                return Ok((out, i + ch.len_utf8()));
            }
            if ch != '\\' {
                out.push(ch);
                continue;
            }
            match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, esc)) if esc == quote || esc == '\\' => out.push(esc),
                Some((_, esc)) => {
                    out.push('\\');
                    out.push(esc);
                }
                None => break,
            }
        }
        Err(self.error(offset, "unterminated string literal"))
    }

    fn number(&self, rest: &str, offset: usize) -> Result<(Tok, usize), TemplateSyntaxError> {
        let bytes = rest.as_bytes();
        let digits = |from: usize| {
            bytes[from..]
                .iter()
                .take_while(|b| b.is_ascii_digit() || **b == b'_')
                .count()
        };
        let mut len = digits(0);
        let mut float = false;
        if bytes.get(len) == Some(&b'.') && bytes.get(len + 1).is_some_and(|b| b.is_ascii_digit()) {
            float = true;
            len += 1 + digits(len + 1);
        }
        if matches!(bytes.get(len), Some(b'e' | b'E')) {
            let sign = usize::from(matches!(bytes.get(len + 1), Some(b'+' | b'-')));
            let exp = digits(len + 1 + sign);
            if exp > 0 {
                float = true;
                len += 1 + sign + exp;
            }
        }
        let text: String = rest[..len].chars().filter(|c| *c != '_').collect();
        let tok = if float {
            text.parse().map(Tok::Float).ok()
        } else {
            text.parse()
                .map(Tok::Int)
                .ok()
                .or_else(|| text.parse().map(Tok::Float).ok())
        };
        match tok {
            Some(tok) => Ok((tok, len)),
            None => Err(self.error(offset, format!("invalid number '{}'", &rest[..len]))),
        }
    }
}

// ─── Parser ──────────────────────────────────────────────────────────────────

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Data(_) => "text".to_string(),
        Tok::VarStart => "'{{'".to_string(),
        Tok::VarEnd => "'}}'".to_string(),
        Tok::BlockStart => "'{%'".to_string(),
        Tok::BlockEnd => "'%}'".to_string(),
        Tok::Name(n) => format!("'{}'", n),
        Tok::Str(_) => "string literal".to_string(),
        Tok::Int(_) | Tok::Float(_) => "number".to_string(),
        Tok::Op(o) => format!("'{}'", o),
        Tok::Eof => "end of template".to_string(),
    }
}

/// Names that end a bare test argument (`x is defined and ...`).
const TEST_ARG_STOP_WORDS: &[&str] = &["else", "or", "and", "if", "is", "in", "not"];

type PResult<T> = Result<T, TemplateSyntaxError>;

struct Parser<'s> {
    src: &'s str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    links: usize,
}

impl<'s> Parser<'s> {
    // The token list always ends with `Eof`, and `pos` never moves past it.

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn peek_at(&self, n: usize) -> &Tok {
        let i = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[i].tok
    }

    fn advance(&mut self) -> Tok {
        let tok = self.tokens[self.pos].tok.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error<T>(&self, message: impl Into<String>) -> PResult<T> {
        Err(error_at(self.src, self.tokens[self.pos].offset, message))
    }

    fn unexpected<T>(&self) -> PResult<T> {
        self.error(format!("unexpected {}", describe(self.peek())))
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> PResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            self.error(format!("expected '{}', found {}", op, describe(self.peek())))
        }
    }

    fn is_name(&self, name: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == name)
    }

    fn eat_name(&mut self, name: &str) -> bool {
        if self.is_name(name) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        match self.peek() {
            Tok::Name(n) => {
                let n = n.clone();
                self.advance();
                Ok(n)
            }
            other => self.error(format!("expected a name, found {}", describe(other))),
        }
    }

    fn expect_block_end(&mut self) -> PResult<()> {
        match self.peek() {
            Tok::BlockEnd => {
                self.advance();
                Ok(())
            }
            other => self.error(format!("expected '%}}', found {}", describe(other))),
        }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return self.error("template nested too deeply");
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Run `f`, which grows a left-nested chain, releasing its links afterwards.
    fn chain<T>(&mut self, f: impl FnOnce(&mut Self, &mut usize) -> PResult<T>) -> PResult<T> {
        let mut links = 0;
        let result = f(self, &mut links);
        self.links -= links;
        result
    }

    fn link(&mut self, links: &mut usize) -> PResult<()> {
        if self.links >= MAX_CHAIN {
            return self.error("expression chain too long");
        }
        self.links += 1;
        *links += 1;
        Ok(())
    }

    // ─── Statements ─────────────────────────────────────────────────────────

    /// Parse nodes until a tag named in `end`. The end tag's name is consumed
    /// and returned; its `%}` is left for the caller.
    fn subparse(&mut self, end: &[&str]) -> PResult<(Vec<Node>, Option<String>)> {
        let mut body = Vec::new();
        loop {
            match self.peek().clone() {
                Tok::Eof if end.is_empty() => return Ok((body, None)),
                Tok::Eof => {
                    let expected: Vec<String> = end.iter().map(|e| format!("'{}'", e)).collect();
                    return self.error(format!(
                        "unexpected end of template, expected {}",
                        expected.join(" or ")
                    ));
                }
                Tok::Data(text) => {
                    self.advance();
                    body.push(Node::Text(text));
                }
                Tok::VarStart => {
                    self.advance();
                    let expr = self.tuple_expr(true)?;
                    match self.peek() {
                        Tok::VarEnd => {
                            self.advance();
                        }
                        other => {
                            return self.error(format!("expected '}}}}', found {}", describe(other)));
                        }
                    }
                    body.push(Node::Output(expr));
                }
                Tok::BlockStart => {
                    self.advance();
                    let Tok::Name(tag) = self.peek().clone() else {
                        return self.error("expected a tag name");
                    };
                    if end.contains(&tag.as_str()) {
                        self.advance();
                        return Ok((body, Some(tag)));
                    }
                    let node = self.nested(|p| p.statement(&tag))?;
                    body.push(node);
                }
                _ => return self.unexpected(),
            }
        }
    }

    fn statement(&mut self, tag: &str) -> PResult<Node> {
        let known = matches!(
            tag,
            "if" | "for"
                | "set"
                | "macro"
                | "with"
                | "filter"
                | "import"
                | "from"
                | "include"
                | "do"
                | "break"
                | "continue"
        );
        if !known {
            let closing = tag.starts_with("end") || matches!(tag, "elif" | "else");
            return if closing {
                self.error(format!("unexpected '{}'", tag))
            } else {
                self.error(format!("unknown tag '{}'", tag))
            };
        }
        self.advance();

        match tag {
            "if" => self.if_statement(),
            "for" => self.for_statement(),
            "set" => self.set_statement(),
            "macro" => self.macro_statement(),
            "with" => self.with_statement(),
            "filter" => self.filter_statement(),
            "import" => self.import_statement(),
            "from" => self.from_statement(),
            "include" => self.include_statement(),
            "do" => {
                let expr = self.tuple_expr(true)?;
                self.expect_block_end()?;
                Ok(Node::Do(expr))
            }
            "break" => {
                self.expect_block_end()?;
                Ok(Node::Break)
            }
            _ => {
                self.expect_block_end()?;
                Ok(Node::Continue)
            }
        }
    }

    fn if_statement(&mut self) -> PResult<Node> {
        let mut branches = Vec::new();
        let mut otherwise = Vec::new();
        let mut test = self.tuple_expr(false)?;
        self.expect_block_end()?;
        loop {
            let (body, tag) = self.subparse(&["elif", "else", "endif"])?;
            branches.push((test, body));
            match tag.as_deref() {
                Some("elif") => {
                    test = self.tuple_expr(false)?;
                    self.expect_block_end()?;
                }
                Some("else") => {
                    self.expect_block_end()?;
                    let (body, _) = self.subparse(&["endif"])?;
                    otherwise = body;
                    self.expect_block_end()?;
                    break;
                }
                _ => {
                    self.expect_block_end()?;
                    break;
                }
            }
        }
        Ok(Node::If {
            branches,
            otherwise,
        })
    }

    fn for_statement(&mut self) -> PResult<Node> {
        let targets = self.assign_names()?;
        if !self.eat_name("in") {
            return self.error(format!("expected 'in', found {}", describe(self.peek())));
        }
        let iter = self.tuple_expr(false)?;
        let filter = if self.eat_name("if") {
            Some(self.expression(true)?)
        } else {
            None
        };
        self.eat_name("recursive");
        self.expect_block_end()?;

        let (body, tag) = self.subparse(&["endfor", "else"])?;
        let otherwise = if tag.as_deref() == Some("else") {
            self.expect_block_end()?;
            self.subparse(&["endfor"])?.0
        } else {
            Vec::new()
        };
        self.expect_block_end()?;
        Ok(Node::For {
            targets,
            iter,
            filter,
            body,
            otherwise,
        })
    }

    /// `x`, `k, v` or `(k, v)`.
    fn assign_names(&mut self) -> PResult<Vec<String>> {
        let paren = self.eat_op("(");
        let mut names = vec![self.expect_name()?];
        while self.eat_op(",") {
            if paren && self.is_op(")") {
                break;
            }
            names.push(self.expect_name()?);
        }
        if paren {
            self.expect_op(")")?;
        }
        Ok(names)
    }

    fn set_target(&mut self) -> PResult<SetTarget> {
        let name = self.expect_name()?;
        if self.eat_op(".") {
            let attr = self.expect_name()?;
            return Ok(SetTarget::Attr { object: name, attr });
        }
        Ok(SetTarget::Name(name))
    }

    fn set_statement(&mut self) -> PResult<Node> {
        let mut targets = vec![self.set_target()?];
        while self.eat_op(",") {
            targets.push(self.set_target()?);
        }
        if self.eat_op("=") {
            let value = self.tuple_expr(true)?;
            self.expect_block_end()?;
            return Ok(Node::Set { targets, value });
        }

        let (Some(target), true) = (targets.pop(), targets.is_empty()) else {
            return self.error("expected '=' after multiple set targets");
        };
        let mut filters = Vec::new();
        while self.eat_op("|") {
            filters.push(self.invocation()?);
        }
        self.expect_block_end()?;
        let (body, _) = self.subparse(&["endset"])?;
        self.expect_block_end()?;
        Ok(Node::SetBlock {
            target,
            filters,
            body,
        })
    }

    fn macro_statement(&mut self) -> PResult<Node> {
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let mut params = Vec::new();
        while !self.is_op(")") {
            let param = self.expect_name()?;
            let default = if self.eat_op("=") {
                Some(self.expression(true)?)
            } else {
                None
            };
            params.push(MacroParam {
                name: param,
                default,
            });
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        self.expect_block_end()?;
        let (body, _) = self.subparse(&["endmacro"])?;
        self.expect_block_end()?;
        Ok(Node::Macro { name, params, body })
    }

    fn with_statement(&mut self) -> PResult<Node> {
        let mut bindings = Vec::new();
        while !matches!(self.peek(), Tok::BlockEnd) {
            let name = self.expect_name()?;
            self.expect_op("=")?;
            bindings.push((name, self.expression(true)?));
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_block_end()?;
        let (body, _) = self.subparse(&["endwith"])?;
        self.expect_block_end()?;
        Ok(Node::With { bindings, body })
    }

    fn filter_statement(&mut self) -> PResult<Node> {
        let mut filters = vec![self.invocation()?];
        while self.eat_op("|") {
            filters.push(self.invocation()?);
        }
        self.expect_block_end()?;
        let (body, _) = self.subparse(&["endfilter"])?;
        self.expect_block_end()?;
        Ok(Node::FilterBlock { filters, body })
    }

    /// Optional `with context` / `without context` suffix.
    fn context_modifier(&mut self) {
        if (self.is_name("with") || self.is_name("without"))
            && matches!(self.peek_at(1), Tok::Name(n) if n == "context")
        {
            self.advance();
            self.advance();
        }
    }

    fn import_statement(&mut self) -> PResult<Node> {
        let source = self.expression(true)?;
        if !self.eat_name("as") {
            return self.error(format!("expected 'as', found {}", describe(self.peek())));
        }
        let name = self.expect_name()?;
        self.context_modifier();
        self.expect_block_end()?;
        Ok(Node::Import {
            source,
            names: vec![name],
        })
    }

    fn from_statement(&mut self) -> PResult<Node> {
        let source = self.expression(true)?;
        if !self.eat_name("import") {
            return self.error(format!("expected 'import', found {}", describe(self.peek())));
        }
        let mut names = Vec::new();
        loop {
            if self.is_name("with") || self.is_name("without") {
                self.context_modifier();
                break;
            }
            let name = self.expect_name()?;
            if self.eat_name("as") {
                names.push(self.expect_name()?);
            } else {
                names.push(name);
            }
            if !self.eat_op(",") {
                self.context_modifier();
                break;
            }
        }
        self.expect_block_end()?;
        Ok(Node::Import { source, names })
    }

    fn include_statement(&mut self) -> PResult<Node> {
        let source = self.expression(true)?;
        if self.is_name("ignore") && matches!(self.peek_at(1), Tok::Name(n) if n == "missing") {
            self.advance();
            self.advance();
        }
        self.context_modifier();
        self.expect_block_end()?;
        Ok(Node::Include(source))
    }

    // ─── Expressions ────────────────────────────────────────────────────────

    fn at_tuple_end(&self) -> bool {
        matches!(self.peek(), Tok::VarEnd | Tok::BlockEnd | Tok::Eof)
            || self.is_op(")")
            || self.is_name("in")
    }

    /// An expression, or a bare tuple when commas follow.
    fn tuple_expr(&mut self, condexpr: bool) -> PResult<Expr> {
        let first = self.expression(condexpr)?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_tuple_end() {
                break;
            }
            items.push(self.expression(condexpr)?);
        }
        Ok(Expr::Tuple(items))
    }

    fn expression(&mut self, condexpr: bool) -> PResult<Expr> {
        self.nested(|p| if condexpr { p.condexpr() } else { p.or_expr() })
    }

    fn condexpr(&mut self) -> PResult<Expr> {
        self.chain(|p, links| {
            let mut expr = p.or_expr()?;
            while p.eat_name("if") {
                p.link(links)?;
                let test = p.or_expr()?;
                let otherwise = if p.eat_name("else") {
                    Some(Box::new(p.nested(|p| p.condexpr())?))
                } else {
                    None
                };
                expr = Expr::Conditional {
                    test: Box::new(test),
                    then: Box::new(expr),
                    otherwise,
                };
            }
            Ok(expr)
        })
    }

    fn or_expr(&mut self) -> PResult<Expr> {
        self.chain(|p, links| {
            let mut left = p.and_expr()?;
            while p.eat_name("or") {
                p.link(links)?;
                let right = p.and_expr()?;
                left = binary(BinaryOp::Or, left, right);
            }
            Ok(left)
        })
    }

    fn and_expr(&mut self) -> PResult<Expr> {
        self.chain(|p, links| {
            let mut left = p.not_expr()?;
            while p.eat_name("and") {
                p.link(links)?;
                let right = p.not_expr()?;
                left = binary(BinaryOp::And, left, right);
            }
            Ok(left)
        })
    }

    fn not_expr(&mut self) -> PResult<Expr> {
        if self.eat_name("not") {
            let operand = self.nested(|p| p.not_expr())?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.compare()
    }

    fn compare(&mut self) -> PResult<Expr> {
        let left = self.math1()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CompareOp::Eq,
                Tok::Op("!=") => CompareOp::Ne,
                Tok::Op("<") => CompareOp::Lt,
                Tok::Op("<=") => CompareOp::Le,
                Tok::Op(">") => CompareOp::Gt,
                Tok::Op(">=") => CompareOp::Ge,
                Tok::Name(n) if n == "in" => CompareOp::In,
                Tok::Name(n) if n == "not" && matches!(self.peek_at(1), Tok::Name(m) if m == "in") => {
                    CompareOp::NotIn
                }
                _ => break,
            };
            if op == CompareOp::NotIn {
                self.advance();
            }
            self.advance();
            ops.push((op, self.math1()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                ops,
            })
        }
    }

    fn math1(&mut self) -> PResult<Expr> {
        self.chain(|p, links| {
            let mut left = p.concat()?;
            loop {
                let op = if p.eat_op("+") {
                    BinaryOp::Add
                } else if p.eat_op("-") {
                    BinaryOp::Sub
                } else {
                    break;
                };
                p.link(links)?;
                let right = p.concat()?;
                left = binary(op, left, right);
            }
            Ok(left)
        })
    }

    fn concat(&mut self) -> PResult<Expr> {
        self.chain(|p, links| {
            let mut left = p.math2()?;
            while p.eat_op("~") {
                p.link(links)?;
                let right = p.math2()?;
                left = binary(BinaryOp::Concat, left, right);
            }
            Ok(left)
        })
    }

    fn math2(&mut self) -> PResult<Expr> {
        self.chain(|p, links| {
            let mut left = p.pow()?;
            loop {
                let op = if p.eat_op("*") {
                    BinaryOp::Mul
                } else if p.eat_op("/") {
                    BinaryOp::Div
                } else if p.eat_op("//") {
                    BinaryOp::FloorDiv
                } else if p.eat_op("%") {
                    BinaryOp::Mod
                } else {
                    break;
                };
                p.link(links)?;
                let right = p.pow()?;
                left = binary(op, left, right);
            }
            Ok(left)
        })
    }

    fn pow(&mut self) -> PResult<Expr> {
        self.chain(|p, links| {
            let mut left = p.unary(true)?;
            while p.eat_op("**") {
                p.link(links)?;
                let right = p.unary(true)?;
                left = binary(BinaryOp::Pow, left, right);
            }
            Ok(left)
        })
    }

    fn unary(&mut self, with_filter: bool) -> PResult<Expr> {
        let sign = if self.eat_op("-") {
            Some(UnaryOp::Neg)
        } else if self.eat_op("+") {
            Some(UnaryOp::Pos)
        } else {
            None
        };
        let expr = match sign {
            Some(op) => Expr::Unary {
                op,
                operand: Box::new(self.nested(|p| p.unary(false))?),
            },
            None => {
                let primary = self.primary()?;
                self.postfix(primary)?
            }
        };
        if with_filter {
            self.filter_expr(expr)
        } else {
            Ok(expr)
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        match self.peek().clone() {
            Tok::Name(n) => {
                self.advance();
                Ok(match n.as_str() {
                    "true" | "True" => Expr::Literal(Literal::Bool(true)),
                    "false" | "False" => Expr::Literal(Literal::Bool(false)),
                    "none" | "None" => Expr::Literal(Literal::None),
                    _ => Expr::Name(n),
                })
            }
            Tok::Str(s) => {
                self.advance();
                let mut s = s;
                // Adjacent string literals concatenate.
                while let Tok::Str(next) = self.peek().clone() {
                    self.advance();
                    s.push_str(&next);
                }
                Ok(Expr::Literal(Literal::Str(s)))
            }
            Tok::Int(i) => {
                self.advance();
                Ok(Expr::Literal(Literal::Int(i)))
            }
            Tok::Float(f) => {
                self.advance();
                Ok(Expr::Literal(Literal::Float(f)))
            }
            Tok::Op("(") => {
                self.advance();
                self.parenthesized()
            }
            Tok::Op("[") => {
                self.advance();
                let mut items = Vec::new();
                while !self.is_op("]") {
                    items.push(self.expression(true)?);
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Tok::Op("{") => {
                self.advance();
                let mut pairs = Vec::new();
                while !self.is_op("}") {
                    let key = self.expression(true)?;
                    self.expect_op(":")?;
                    let value = self.expression(true)?;
                    pairs.push((key, value));
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("}")?;
                Ok(Expr::Dict(pairs))
            }
            _ => self.unexpected(),
        }
    }

    /// After `(`: a grouped expression or a tuple.
    fn parenthesized(&mut self) -> PResult<Expr> {
        if self.eat_op(")") {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.expression(true)?;
        if !self.eat_op(",") {
            self.expect_op(")")?;
            return Ok(first);
        }
        let mut items = vec![first];
        while !self.is_op(")") {
            items.push(self.expression(true)?);
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(Expr::Tuple(items))
    }

    fn postfix(&mut self, expr: Expr) -> PResult<Expr> {
        self.chain(|p, links| p.postfix_links(expr, links))
    }

    fn postfix_links(&mut self, mut expr: Expr, links: &mut usize) -> PResult<Expr> {
        loop {
            if self.is_op(".") || self.is_op("[") || self.is_op("(") {
                self.link(links)?;
            }
            if self.eat_op(".") {
                expr = match self.peek().clone() {
                    Tok::Name(attr) => {
                        self.advance();
                        Expr::Attr {
                            value: Box::new(expr),
                            attr,
                        }
                    }
                    Tok::Int(i) => {
                        self.advance();
                        Expr::Item {
                            value: Box::new(expr),
                            index: Box::new(Expr::Literal(Literal::Int(i))),
                        }
                    }
                    other => {
                        return self.error(format!(
                            "expected an attribute name, found {}",
                            describe(&other)
                        ));
                    }
                };
            } else if self.eat_op("[") {
                expr = self.subscript(expr)?;
            } else if self.eat_op("(") {
                let args = self.call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// After `[`: an index or a slice.
    fn subscript(&mut self, value: Expr) -> PResult<Expr> {
        let start = if self.is_op(":") {
            None
        } else {
            Some(self.expression(true)?)
        };

        if self.eat_op(":") {
            let stop = if self.is_op("]") || self.is_op(":") {
                None
            } else {
                Some(Box::new(self.expression(true)?))
            };
            let step = if self.eat_op(":") && !self.is_op("]") {
                Some(Box::new(self.expression(true)?))
            } else {
                None
            };
            self.expect_op("]")?;
            return Ok(Expr::Slice {
                value: Box::new(value),
                start: start.map(Box::new),
                stop,
                step,
            });
        }

        let Some(first) = start else {
            return self.unexpected();
        };
        let index = if self.is_op(",") {
            let mut items = vec![first];
            while self.eat_op(",") {
                if self.is_op("]") {
                    break;
                }
                items.push(self.expression(true)?);
            }
            Expr::Tuple(items)
        } else {
            first
        };
        self.expect_op("]")?;
        Ok(Expr::Item {
            value: Box::new(value),
            index: Box::new(index),
        })
    }

    /// After `(`: positional, keyword and splat arguments up to `)`.
    fn call_args(&mut self) -> PResult<Arguments> {
        let mut args = Arguments::default();
        while !self.is_op(")") {
            if self.eat_op("**") || self.eat_op("*") {
                args.splat.push(self.expression(true)?);
            } else if matches!(self.peek(), Tok::Name(_)) && matches!(self.peek_at(1), Tok::Op("=")) {
                let key = self.expect_name()?;
                self.advance();
                args.keyword.push((key, self.expression(true)?));
            } else {
                args.positional.push(self.expression(true)?);
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(args)
    }

    fn dotted_name(&mut self) -> PResult<String> {
        let mut name = self.expect_name()?;
        while self.is_op(".") && matches!(self.peek_at(1), Tok::Name(_)) {
            self.advance();
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn invocation(&mut self) -> PResult<Invocation> {
        let name = self.dotted_name()?;
        let args = if self.eat_op("(") {
            self.call_args()?
        } else {
            Arguments::default()
        };
        Ok(Invocation { name, args })
    }

    fn test_arg_follows(&self) -> bool {
        match self.peek() {
            Tok::Name(n) => !TEST_ARG_STOP_WORDS.contains(&n.as_str()),
            Tok::Str(_) | Tok::Int(_) | Tok::Float(_) => true,
            Tok::Op(o) => matches!(*o, "[" | "{"),
            _ => false,
        }
    }

    fn filter_expr(&mut self, expr: Expr) -> PResult<Expr> {
        self.chain(|p, links| p.filter_links(expr, links))
    }

    fn filter_links(&mut self, mut expr: Expr, links: &mut usize) -> PResult<Expr> {
        loop {
            if self.is_op("|") || self.is_name("is") || self.is_op("(") {
                self.link(links)?;
            }
            if self.eat_op("|") {
                let filter = self.invocation()?;
                expr = Expr::Filter {
                    value: Box::new(expr),
                    filter,
                };
            } else if self.eat_name("is") {
                let negated = self.eat_name("not");
                let name = self.dotted_name()?;
                let args = if self.eat_op("(") {
                    self.call_args()?
                } else if self.test_arg_follows() {
                    let arg = self.primary()?;
                    let arg = self.postfix(arg)?;
                    Arguments {
                        positional: vec![arg],
                        ..Arguments::default()
                    }
                } else {
                    Arguments::default()
                };
                expr = Expr::Test {
                    value: Box::new(expr),
                    test: Invocation { name, args },
                    negated,
                };
            } else if self.eat_op("(") {
                let args = self.call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
