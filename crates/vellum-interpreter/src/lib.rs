//! Vellum template runtime.
//!
//! [`Template`] owns a compiled token vector (see `vellum-compiler`), a
//! variable environment, a filter registry and the locale settings, and
//! renders by walking the vector once with index-addressed jumps. The
//! vector is never mutated at render time; a handle is single-threaded
//! and non-reentrant, but the same compiled file can back any number of
//! independent handles.

pub mod escape;
pub mod filters;
pub mod value;

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use tracing::{debug, trace};

pub use vellum_diagnostics::{CompileError, LoadError, RenderError};
pub use vellum_token::{Token, TokenKind};

pub use value::{FormatSettings, Value};

use vellum_token::{codec, ParamType, END_OF_LAYOUT, ESCAPE_RAW};

use escape::escape_html;
use filters::FilterRegistry;
use value::{format_value, is_truthy, Record, RowSource};

/// Unresolved-lookup hook: `(data_source, members)` for a variable path
/// the environment cannot satisfy. `None` means unhandled, which renders
/// as empty output.
pub type LookupCallback = Box<dyn Fn(&str, &str) -> Option<Value>>;

/// How a binding was classified when it entered the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Simple,
    Object,
    RowSource,
    ListOfObject,
    Iterable,
}

fn classify(value: &Value) -> BindingKind {
    match value {
        Value::Object(_) => BindingKind::Object,
        Value::Rows(_) => BindingKind::RowSource,
        Value::List(l) => {
            if !l.is_empty() && matches!(l.at(0), Value::Object(_)) {
                BindingKind::ListOfObject
            } else {
                BindingKind::Iterable
            }
        }
        _ => BindingKind::Simple,
    }
}

/// One active `for` iteration. `position` starts at −1 and is advanced
/// before each pass over the body; the most recent frame shadows earlier
/// ones (and the environment) on name lookup.
#[derive(Debug)]
struct LoopFrame {
    full_path: String,
    iterator: String,
    value: Value,
    position: i64,
    at_end: bool,
}

/// Adapter giving one row of a [`RowSource`] record-like field access.
struct RowProxy {
    rows: std::rc::Rc<dyn RowSource>,
    row: usize,
}

impl Record for RowProxy {
    fn field(&self, name: &str) -> Option<Value> {
        self.rows.cell(self.row, name)
    }
}

struct Segment {
    name: String,
    indices: Vec<usize>,
}

pub struct Template {
    tokens: Vec<Token>,
    env: HashMap<String, (Value, BindingKind)>,
    filters: FilterRegistry,
    on_get_value: Option<LookupCallback>,
    format: FormatSettings,
    loop_stack: Vec<LoopFrame>,
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("tokens", &self.tokens)
            .field("env", &self.env)
            .field("filters", &"<filters>")
            .field("on_get_value", &self.on_get_value.is_some())
            .field("format", &self.format)
            .field("loop_stack", &self.loop_stack)
            .finish()
    }
}

impl Template {
    /// Compile `source`; `file` is used in error messages and as the
    /// reference path for `include`/`extends` resolution.
    pub fn compile(source: &str, file: &str) -> Result<Template, CompileError> {
        Ok(Self::from_tokens(vellum_compiler::compile(source, file)?))
    }

    pub fn compile_file(path: impl AsRef<Path>) -> Result<Template, CompileError> {
        Ok(Self::from_tokens(vellum_compiler::compile_file(path)?))
    }

    /// Wrap an already-resolved token vector (e.g. one reloaded from
    /// disk) with a fresh environment and the built-in filters.
    pub fn from_tokens(tokens: Vec<Token>) -> Template {
        Template {
            tokens,
            env: HashMap::new(),
            filters: FilterRegistry::with_builtins(),
            on_get_value: None,
            format: FormatSettings::default(),
            loop_stack: Vec::new(),
        }
    }

    /// Bind a variable; names are case-insensitive and rebinding
    /// replaces.
    pub fn set_data(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        let kind = classify(&value);
        self.env.insert(name.to_ascii_lowercase(), (value, kind));
    }

    /// Drop all bindings and any loop frames left by a failed render.
    pub fn clear_data(&mut self) {
        self.env.clear();
        self.loop_stack.clear();
    }

    pub fn binding_kind(&self, name: &str) -> Option<BindingKind> {
        self.env
            .get(&name.to_ascii_lowercase())
            .map(|(_, kind)| *kind)
    }

    pub fn add_filter(
        &mut self,
        name: &str,
        f: impl Fn(&Value, &[Value], &FormatSettings) -> Result<Value, RenderError> + 'static,
    ) {
        self.filters.register(name, f);
    }

    /// Install the unresolved-lookup hook.
    pub fn on_get_value(&mut self, cb: impl Fn(&str, &str) -> Option<Value> + 'static) {
        self.on_get_value = Some(Box::new(cb));
    }

    pub fn format_settings(&self) -> &FormatSettings {
        &self.format
    }

    pub fn set_format_settings(&mut self, settings: FormatSettings) {
        self.format = settings;
    }

    /// Debug iteration over the compiled vector.
    pub fn for_each_token(&self, mut visitor: impl FnMut(usize, &Token)) {
        for (i, tok) in self.tokens.iter().enumerate() {
            visitor(i, tok);
        }
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        codec::write_tokens(&mut w, &self.tokens)
    }

    pub fn create_from_file(path: impl AsRef<Path>) -> Result<Template, LoadError> {
        let mut r = BufReader::new(File::open(path)?);
        Ok(Self::from_tokens(codec::read_tokens(&mut r)?))
    }

    pub fn dump_to_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        codec::dump_tokens(&mut w, &self.tokens)
    }

    /// Execute the token vector against the current environment.
    pub fn render(&mut self) -> Result<String, RenderError> {
        let mut out = String::new();
        let mut block_returns: Vec<usize> = Vec::new();
        let mut pc = match self.tokens.first() {
            Some(t) if t.kind == TokenKind::SystemVersion => 1,
            _ => 0,
        };

        while pc < self.tokens.len() {
            match self.tokens[pc].kind {
                TokenKind::Content => {
                    out.push_str(&self.tokens[pc].value1);
                    pc += 1;
                }
                TokenKind::LineBreak => {
                    out.push('\n');
                    pc += 1;
                }
                // a SystemVersion spliced mid-vector renders literally
                TokenKind::SystemVersion => {
                    out.push_str(&self.tokens[pc].value1);
                    pc += 1;
                }
                TokenKind::Value | TokenKind::LiteralString => {
                    let (text, next) = self.eval_output(pc)?;
                    out.push_str(&text);
                    pc = next;
                }
                TokenKind::IfThen => {
                    let else_ref = self.tokens[pc].ref1;
                    let endif_ref = self.tokens[pc].ref2;
                    let (truthy, next) = self.eval_condition(pc + 1)?;
                    if truthy {
                        pc = next;
                    } else if else_ref >= 0 {
                        pc = else_ref as usize + 1;
                    } else {
                        pc = checked(endif_ref, "'if' has no resolved 'endif'")? + 1;
                    }
                }
                // reached by fall-through from the then-branch
                TokenKind::Else => {
                    pc = checked(self.tokens[pc].ref2, "'else' has no resolved 'endif'")?;
                }
                TokenKind::EndIf => pc += 1,
                TokenKind::For => {
                    let end_for = checked(self.tokens[pc].ref1, "'for' has no resolved 'endfor'")?;
                    let full_path = self.tokens[pc].value1.clone();
                    let iterator = self.tokens[pc].value2.clone();
                    let iterable = self.resolve_path(&full_path)?;
                    match iterable.iter_len() {
                        Some(n) if n > 0 => {
                            trace!(source = %full_path, len = n, "loop started");
                            let mut frame = LoopFrame {
                                full_path,
                                iterator,
                                value: iterable,
                                position: -1,
                                at_end: false,
                            };
                            frame.position += 1;
                            self.loop_stack.push(frame);
                            pc += 1;
                        }
                        _ => pc = end_for + 1,
                    }
                }
                TokenKind::EndFor => {
                    let back = checked(self.tokens[pc].ref1, "'endfor' has no resolved 'for'")?;
                    let frame = self
                        .loop_stack
                        .last_mut()
                        .ok_or_else(|| RenderError::new("'endfor' without an active loop"))?;
                    frame.position += 1;
                    let len = frame.value.iter_len().unwrap_or(0);
                    frame.at_end = frame.position as usize >= len;
                    if frame.at_end {
                        self.loop_stack.pop();
                        pc += 1;
                    } else {
                        pc = back + 1;
                    }
                }
                TokenKind::Continue => {
                    pc = checked(self.tokens[pc].ref1, "'continue' has no resolved 'endfor'")?;
                }
                TokenKind::Block => {
                    let override_idx = self.tokens[pc].ref1;
                    if override_idx >= 0 {
                        let ret =
                            checked(self.tokens[pc].ref2, "overridden block has no 'endblock'")?;
                        block_returns.push(ret);
                        pc = override_idx as usize + 1;
                    } else {
                        pc += 1;
                    }
                }
                TokenKind::EndBlock => match block_returns.pop() {
                    Some(ret) => pc = ret,
                    None => pc += 1,
                },
                TokenKind::Exit => break,
                TokenKind::Eof => break,
                TokenKind::Info => {
                    // the page section is only reachable through block jumps
                    if self.tokens[pc].value1 == END_OF_LAYOUT {
                        break;
                    }
                    pc += 1;
                }
                // operands are consumed by their owners; skip if reached
                TokenKind::BoolExpression
                | TokenKind::FilterName
                | TokenKind::FilterParameter => pc += 1,
            }
        }

        debug!(bytes = out.len(), "render finished");
        Ok(out)
    }

    // ----- evaluation helpers -----

    /// Evaluate a `Value`/`LiteralString` token plus its optional filter
    /// tail; returns the finished output text and the next pc.
    fn eval_output(&self, pc: usize) -> Result<(String, usize), RenderError> {
        let tok = &self.tokens[pc];
        let upstream = match tok.kind {
            TokenKind::Value => self.resolve_path(&tok.value1)?,
            _ => Value::Str(tok.value1.clone()),
        };
        let mut next = pc + 1;
        let value = if tok.ref1 >= 0 {
            let (v, n) = self.apply_filter(next, upstream)?;
            next = n;
            v
        } else {
            upstream
        };
        let text = format_value(&value, &self.format);
        let text = if tok.ref2 == ESCAPE_RAW {
            text
        } else {
            escape_html(&text)
        };
        Ok((text, next))
    }

    /// Evaluate the `BoolExpression` at `pc` (optional `!` prefix,
    /// optional filter tail).
    fn eval_condition(&self, pc: usize) -> Result<(bool, usize), RenderError> {
        let tok = match self.tokens.get(pc) {
            Some(t) if t.kind == TokenKind::BoolExpression => t,
            _ => return Err(RenderError::new("'if' is missing its condition")),
        };
        let (negated, path) = match tok.value1.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, tok.value1.as_str()),
        };
        let mut value = self.resolve_path(path)?;
        let mut next = pc + 1;
        if tok.ref1 >= 0 {
            let (v, n) = self.apply_filter(next, value)?;
            value = v;
            next = n;
        }
        let truthy = is_truthy(&value, &self.format);
        Ok((truthy ^ negated, next))
    }

    /// Apply the `FilterName` at `pc` to `upstream`, consuming its
    /// parameter tokens.
    fn apply_filter(&self, pc: usize, upstream: Value) -> Result<(Value, usize), RenderError> {
        let ftok = match self.tokens.get(pc) {
            Some(t) if t.kind == TokenKind::FilterName => t,
            _ => return Err(RenderError::new("malformed filter sequence")),
        };
        let count = ftok.ref1.max(0) as usize;
        let mut params = Vec::with_capacity(count);
        for k in 0..count {
            let ptok = match self.tokens.get(pc + 1 + k) {
                Some(t) if t.kind == TokenKind::FilterParameter => t,
                _ => return Err(RenderError::new("malformed filter sequence")),
            };
            params.push(self.param_value(ptok)?);
        }
        let f = self
            .filters
            .get(&ftok.value1)
            .ok_or_else(|| RenderError::filter(&ftok.value1, "unknown filter"))?;
        let result = f(&upstream, &params, &self.format)?;
        Ok((result, pc + 1 + count))
    }

    fn param_value(&self, tok: &Token) -> Result<Value, RenderError> {
        match ParamType::from_code(tok.ref2) {
            Some(ParamType::Int) => tok
                .value1
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| RenderError::new(format!("bad integer parameter '{}'", tok.value1))),
            Some(ParamType::Float) => tok
                .value1
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| RenderError::new(format!("bad float parameter '{}'", tok.value1))),
            Some(ParamType::Str) => Ok(Value::Str(tok.value1.clone())),
            Some(ParamType::Variable) => self.resolve_path(&tok.value1),
            None => Err(RenderError::new(format!(
                "unknown parameter type code {}",
                tok.ref2
            ))),
        }
    }

    /// Resolve a dotted/bracketed variable path: loop iterators first
    /// (most recent frame wins), then pseudo-variables, then the
    /// environment, then the user callback. A miss is `Empty`.
    fn resolve_path(&self, path: &str) -> Result<Value, RenderError> {
        let segs = parse_path(path)?;
        let head = &segs[0];

        if head.name.starts_with("@@") {
            return Ok(self.pseudo_variable(&head.name));
        }

        for frame in self.loop_stack.iter().rev() {
            if frame.iterator.eq_ignore_ascii_case(&head.name) {
                let element = current_element(&frame.value, frame.position);
                let v = apply_indices(element, &head.indices);
                return Ok(descend(v, &segs[1..]));
            }
        }

        if let Some((v, _)) = self.env.get(&head.name.to_ascii_lowercase()) {
            let v = apply_indices(v.clone(), &head.indices);
            return Ok(descend(v, &segs[1..]));
        }

        if let Some(cb) = &self.on_get_value {
            if let Some(v) = cb(&head.name, &join_tail(&segs[1..])) {
                return Ok(v);
            }
        }
        Ok(Value::Empty)
    }

    /// `@@index` (1-based), `@@odd`, `@@even` against the nearest frame.
    /// Outside a loop they are simply absent.
    fn pseudo_variable(&self, name: &str) -> Value {
        let frame = match self.loop_stack.last() {
            Some(f) => f,
            None => return Value::Empty,
        };
        let index = frame.position + 1;
        if name.eq_ignore_ascii_case("@@index") {
            Value::Int(index)
        } else if name.eq_ignore_ascii_case("@@odd") {
            Value::Bool(index % 2 == 1)
        } else if name.eq_ignore_ascii_case("@@even") {
            Value::Bool(index % 2 == 0)
        } else {
            Value::Empty
        }
    }
}

fn checked(r: i64, msg: &str) -> Result<usize, RenderError> {
    if r >= 0 {
        Ok(r as usize)
    } else {
        Err(RenderError::new(msg))
    }
}

/// The element a loop frame currently points at. Row sources produce a
/// row proxy so dotted column access works like object fields.
fn current_element(value: &Value, position: i64) -> Value {
    let pos = position.max(0) as usize;
    match value {
        Value::List(l) => l.at(pos),
        Value::Rows(r) => Value::Object(std::rc::Rc::new(RowProxy {
            rows: r.clone(),
            row: pos,
        })),
        _ => Value::Empty,
    }
}

fn descend(mut v: Value, segs: &[Segment]) -> Value {
    for seg in segs {
        v = match &v {
            Value::Object(r) => r.field(&seg.name).unwrap_or(Value::Empty),
            // direct access outside a loop reads the cursor row
            Value::Rows(r) => r.cell(r.position(), &seg.name).unwrap_or(Value::Empty),
            _ => Value::Empty,
        };
        v = apply_indices(v, &seg.indices);
    }
    v
}

fn apply_indices(mut v: Value, indices: &[usize]) -> Value {
    for &i in indices {
        v = match &v {
            Value::List(l) => l.at(i),
            _ => Value::Empty,
        };
    }
    v
}

fn parse_path(path: &str) -> Result<Vec<Segment>, RenderError> {
    let malformed = || RenderError::new(format!("malformed variable path '{path}'"));
    let mut segs: Vec<Segment> = Vec::new();
    let mut chars = path.chars().peekable();
    loop {
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c == '.' || c == '[' {
                break;
            }
            name.push(c);
            chars.next();
        }
        if name.is_empty() {
            return Err(malformed());
        }
        let mut seg = Segment {
            name,
            indices: Vec::new(),
        };
        while chars.peek() == Some(&'[') {
            chars.next();
            let mut digits = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() {
                    digits.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if digits.is_empty() || chars.next() != Some(']') {
                return Err(malformed());
            }
            let idx = digits.parse::<usize>().map_err(|_| malformed())?;
            seg.indices.push(idx);
        }
        segs.push(seg);
        match chars.next() {
            None => break,
            Some('.') => continue,
            Some(_) => return Err(malformed()),
        }
    }
    Ok(segs)
}

fn join_tail(segs: &[Segment]) -> String {
    let mut out = String::new();
    for (i, seg) in segs.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        out.push_str(&seg.name);
        for idx in &seg.indices {
            out.push('[');
            out.push_str(&idx.to_string());
            out.push(']');
        }
    }
    out
}
