//! Label templates.
//!
//! A small subset of the Go text/template language, enough to pull values out of
//! the container data handed to custom labels:
//!
//! - `{{ .ContainerJSON.Config.Image }}` dotted field access, `{{ . }}` for the whole value
//! - `{{ index .Container.Labels "com.docker.compose.service" }}` map/array indexing
//! - `{{ if .Stats }}...{{ else }}...{{ end }}` conditionals
//! - `lower`, `upper`, `trimPrefix <prefix> <s>`, `default <fallback> <v>` helpers
//! - `{{-` and `-}}` trim the whitespace next to the action
//!
//! Templates are parsed once and rendered against a [`serde_json::Value`]. A field
//! that does not exist renders as an empty string; accessing a field of a scalar
//! is a [`RenderError`].

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref IDENT: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    static ref INT: Regex = Regex::new(r"^-?[0-9]+$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unclosed action starting at byte {0}")]
    UnclosedAction(usize),
    #[error("empty action at byte {0}")]
    EmptyAction(usize),
    #[error("unterminated string in action {0:?}")]
    UnterminatedString(String),
    #[error("unexpected {token:?} in action {action:?}")]
    UnexpectedToken { token: String, action: String },
    #[error("function {0:?} not defined")]
    UnknownFunction(String),
    #[error("wrong number of args for {name}: want {want}, got {got}")]
    WrongArgCount {
        name: &'static str,
        want: &'static str,
        got: usize,
    },
    #[error("unexpected `{0}` outside of `if`")]
    UnexpectedKeyword(&'static str),
    #[error("missing `end` for `if`")]
    MissingEnd,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("can't evaluate field {field} in {kind} value")]
    FieldOnScalar { field: String, kind: &'static str },
    #[error("can't index {kind} value with {key}")]
    BadIndex { kind: &'static str, key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Index,
    Lower,
    Upper,
    TrimPrefix,
    Default,
}

impl Func {
    fn from_name(name: &str) -> Result<Self, ParseError> {
        match name {
            "index" => Ok(Func::Index),
            "lower" => Ok(Func::Lower),
            "upper" => Ok(Func::Upper),
            "trimPrefix" => Ok(Func::TrimPrefix),
            "default" => Ok(Func::Default),
            _ => Err(ParseError::UnknownFunction(name.to_owned())),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Func::Index => "index",
            Func::Lower => "lower",
            Func::Upper => "upper",
            Func::TrimPrefix => "trimPrefix",
            Func::Default => "default",
        }
    }

    fn check_arity(self, got: usize) -> Result<(), ParseError> {
        let (ok, want) = match self {
            Func::Index => (got >= 2, "at least 2"),
            Func::Lower | Func::Upper => (got == 1, "1"),
            Func::TrimPrefix | Func::Default => (got == 2, "2"),
        };
        if ok {
            Ok(())
        } else {
            Err(ParseError::WrongArgCount {
                name: self.name(),
                want,
                got,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    /// Path from the root value; empty for `.`.
    Field(Vec<String>),
    Str(String),
    Int(i64),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Action(Expr),
    If {
        cond: Expr,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(Vec<String>),
    Str(String),
    Int(i64),
    Ident(String),
    LParen,
    RParen,
}

/// A parsed label template.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let mut builder = TreeBuilder::default();
        let mut rest = source;
        let mut offset = 0;
        let mut trim_next = false;

        while let Some(open) = rest.find("{{") {
            let mut text = &rest[..open];
            if trim_next {
                text = text.trim_start();
            }
            let after_open = &rest[open + 2..];
            let trim_left = after_open.starts_with('-')
                && after_open[1..].starts_with(char::is_whitespace);
            if trim_left {
                text = text.trim_end();
            }
            builder.text(text);

            let body_start = usize::from(trim_left);
            let close = find_close(&after_open[body_start..])
                .ok_or(ParseError::UnclosedAction(offset + open))?;
            let mut body = &after_open[body_start..body_start + close];
            trim_next =
                body.ends_with('-') && body[..body.len() - 1].ends_with(char::is_whitespace);
            if trim_next {
                body = &body[..body.len() - 1];
            }
            builder.action(body, offset + open)?;

            let consumed = open + 2 + body_start + close + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }

        let text = if trim_next { rest.trim_start() } else { rest };
        builder.text(text);

        Ok(Template {
            nodes: builder.finish()?,
        })
    }

    pub fn render(&self, data: &Value) -> Result<String, RenderError> {
        let mut out = String::new();
        render_nodes(&self.nodes, data, &mut out)?;
        Ok(out)
    }
}

/// Position of the closing `}}` of an action, skipping over string literals.
fn find_close(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_string => i += 1,
            b'"' => in_string = !in_string,
            b'}' if !in_string && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

struct Frame {
    cond: Expr,
    then: Vec<Node>,
    otherwise: Option<Vec<Node>>,
}

#[derive(Default)]
struct TreeBuilder {
    root: Vec<Node>,
    stack: Vec<Frame>,
}

impl TreeBuilder {
    fn current(&mut self) -> &mut Vec<Node> {
        match self.stack.last_mut() {
            Some(Frame {
                otherwise: Some(otherwise),
                ..
            }) => otherwise,
            Some(frame) => &mut frame.then,
            None => &mut self.root,
        }
    }

    fn text(&mut self, text: &str) {
        if !text.is_empty() {
            self.current().push(Node::Text(text.to_owned()));
        }
    }

    fn action(&mut self, body: &str, at: usize) -> Result<(), ParseError> {
        let tokens = tokenize(body)?;
        match tokens.first() {
            None => Err(ParseError::EmptyAction(at)),
            Some(Token::Ident(word)) if word == "if" => {
                if tokens.len() == 1 {
                    return Err(ParseError::EmptyAction(at));
                }
                let cond = parse_expr(&tokens[1..], body)?;
                self.stack.push(Frame {
                    cond,
                    then: Vec::new(),
                    otherwise: None,
                });
                Ok(())
            }
            Some(Token::Ident(word)) if word == "else" || word == "end" => {
                if tokens.len() > 1 {
                    return Err(unexpected(&tokens[1], body));
                }
                if word == "else" {
                    match self.stack.last_mut() {
                        Some(frame) if frame.otherwise.is_none() => {
                            frame.otherwise = Some(Vec::new());
                            Ok(())
                        }
                        _ => Err(ParseError::UnexpectedKeyword("else")),
                    }
                } else {
                    let frame = self
                        .stack
                        .pop()
                        .ok_or(ParseError::UnexpectedKeyword("end"))?;
                    let node = Node::If {
                        cond: frame.cond,
                        then: frame.then,
                        otherwise: frame.otherwise.unwrap_or_default(),
                    };
                    self.current().push(node);
                    Ok(())
                }
            }
            Some(_) => {
                let expr = parse_expr(&tokens, body)?;
                self.current().push(Node::Action(expr));
                Ok(())
            }
        }
    }

    fn finish(self) -> Result<Vec<Node>, ParseError> {
        if self.stack.is_empty() {
            Ok(self.root)
        } else {
            Err(ParseError::MissingEnd)
        }
    }
}

fn unexpected(token: &Token, action: &str) -> ParseError {
    let token = match token {
        Token::Field(path) => format!(".{}", path.join(".")),
        Token::Str(s) => format!("{s:?}"),
        Token::Int(i) => i.to_string(),
        Token::Ident(name) => name.clone(),
        Token::LParen => "(".to_owned(),
        Token::RParen => ")".to_owned(),
    };
    ParseError::UnexpectedToken {
        token,
        action: action.trim().to_owned(),
    }
}

fn tokenize(action: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = action.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((_, '\\')) => match chars.next() {
                            Some((_, 'n')) => s.push('\n'),
                            Some((_, 't')) => s.push('\t'),
                            Some((_, other)) => s.push(other),
                            None => return Err(ParseError::UnterminatedString(action.to_owned())),
                        },
                        Some((_, c)) => s.push(c),
                        None => return Err(ParseError::UnterminatedString(action.to_owned())),
                    }
                }
                tokens.push(Token::Str(s));
            }
            _ => {
                let mut end = action.len();
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        end = i;
                        break;
                    }
                    chars.next();
                }
                tokens.push(classify(&action[start..end], action)?);
            }
        }
    }

    Ok(tokens)
}

fn classify(word: &str, action: &str) -> Result<Token, ParseError> {
    if let Some(rest) = word.strip_prefix('.') {
        if rest.is_empty() {
            return Ok(Token::Field(Vec::new()));
        }
        let path: Vec<String> = rest.split('.').map(str::to_owned).collect();
        if path.iter().all(|segment| IDENT.is_match(segment)) {
            return Ok(Token::Field(path));
        }
    } else if INT.is_match(word) {
        if let Ok(value) = word.parse() {
            return Ok(Token::Int(value));
        }
    } else if IDENT.is_match(word) {
        return Ok(Token::Ident(word.to_owned()));
    }
    Err(ParseError::UnexpectedToken {
        token: word.to_owned(),
        action: action.trim().to_owned(),
    })
}

fn parse_expr(tokens: &[Token], action: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        action,
    };
    let expr = parser.command()?;
    match parser.tokens.get(parser.pos) {
        Some(token) => Err(unexpected(token, action)),
        None => Ok(expr),
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    action: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn command(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let func = Func::from_name(name)?;
                self.pos += 1;
                let mut args = Vec::new();
                while let Some(token) = self.peek() {
                    if *token == Token::RParen {
                        break;
                    }
                    args.push(self.operand()?);
                }
                func.check_arity(args.len())?;
                Ok(Expr::Call(func, args))
            }
            Some(_) => self.operand(),
            None => Err(ParseError::UnexpectedToken {
                token: ")".to_owned(),
                action: self.action.trim().to_owned(),
            }),
        }
    }

    fn operand(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().cloned();
        self.pos += 1;
        match token {
            Some(Token::Field(path)) => Ok(Expr::Field(path)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Int(i)) => Ok(Expr::Int(i)),
            Some(Token::LParen) => {
                let expr = self.command()?;
                match self.peek() {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(expr)
                    }
                    Some(token) => Err(unexpected(token, self.action)),
                    None => Err(ParseError::UnexpectedToken {
                        token: "(".to_owned(),
                        action: self.action.trim().to_owned(),
                    }),
                }
            }
            Some(token) => Err(unexpected(&token, self.action)),
            None => Err(ParseError::UnexpectedToken {
                token: String::new(),
                action: self.action.trim().to_owned(),
            }),
        }
    }
}

fn render_nodes(nodes: &[Node], data: &Value, out: &mut String) -> Result<(), RenderError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Action(expr) => out.push_str(&to_text(&eval(expr, data)?)),
            Node::If {
                cond,
                then,
                otherwise,
            } => {
                if is_truthy(&eval(cond, data)?) {
                    render_nodes(then, data, out)?;
                } else {
                    render_nodes(otherwise, data, out)?;
                }
            }
        }
    }
    Ok(())
}

fn eval(expr: &Expr, data: &Value) -> Result<Value, RenderError> {
    match expr {
        Expr::Field(path) => lookup(data, path),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Int(i) => Ok(Value::from(*i)),
        Expr::Call(func, args) => {
            let args = args
                .iter()
                .map(|arg| eval(arg, data))
                .collect::<Result<Vec<_>, _>>()?;
            apply(*func, args)
        }
    }
}

fn lookup(data: &Value, path: &[String]) -> Result<Value, RenderError> {
    let mut current = data;
    for field in path {
        match current {
            Value::Object(map) => match map.get(field) {
                Some(value) => current = value,
                None => return Ok(Value::Null),
            },
            Value::Null => return Ok(Value::Null),
            other => {
                return Err(RenderError::FieldOnScalar {
                    field: field.clone(),
                    kind: kind_of(other),
                })
            }
        }
    }
    Ok(current.clone())
}

fn apply(func: Func, mut args: Vec<Value>) -> Result<Value, RenderError> {
    match func {
        Func::Index => {
            let keys = args.split_off(1);
            let mut current = args.pop().unwrap_or(Value::Null);
            for key in &keys {
                current = index(current, key)?;
            }
            Ok(current)
        }
        Func::Lower => Ok(Value::String(to_text(&args[0]).to_lowercase())),
        Func::Upper => Ok(Value::String(to_text(&args[0]).to_uppercase())),
        Func::TrimPrefix => {
            let prefix = to_text(&args[0]);
            let text = to_text(&args[1]);
            let trimmed = text.strip_prefix(prefix.as_str()).unwrap_or(&text);
            Ok(Value::String(trimmed.to_owned()))
        }
        Func::Default => {
            let fallback = args.swap_remove(0);
            let value = args.swap_remove(0);
            Ok(if is_truthy(&value) { value } else { fallback })
        }
    }
}

fn index(collection: Value, key: &Value) -> Result<Value, RenderError> {
    match (collection, key) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::Object(mut map), Value::String(k)) => Ok(map.remove(k).unwrap_or(Value::Null)),
        (Value::Array(mut items), Value::Number(n)) => match n.as_u64() {
            Some(i) if (i as usize) < items.len() => Ok(items.swap_remove(i as usize)),
            _ => Ok(Value::Null),
        },
        (other, key) => Err(RenderError::BadIndex {
            kind: kind_of(&other),
            key: key.to_string(),
        }),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
