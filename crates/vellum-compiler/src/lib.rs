//! Vellum template scanner.
//!
//! Single pass over the source text: verbatim runs become `Content`
//! tokens, `{{ … }}` directives become control-flow and output tokens,
//! and `include`/`extends` splice recursively compiled sub-templates into
//! the vector. Control-flow refs are left unset here; the second pass in
//! [`resolver`] rewrites them in place.
//!
//! Scanner rules worth knowing before touching this file:
//! - `{{{` emits the two characters `{{` as content and swallows the
//!   third brace.
//! - A physical line break emits a `LineBreak` token only when the
//!   current line produced output (`Content`, `Value`, `LiteralString`,
//!   `include`, `extends`). Lines holding nothing but statements
//!   collapse. Rendered output depends on this exact rule.
//! - Keywords match case-insensitively.

pub mod resolver;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};
use vellum_diagnostics::{peek_at, CompileError};
use vellum_token::{ParamType, Token, TokenKind, ESCAPE_HTML, ESCAPE_RAW, UNSET};

/// Version stamped into the leading `SystemVersion` token.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// `include` / `extends` may not nest deeper than this.
const MAX_INCLUDE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Suppress the leading `SystemVersion` token. Set for spliced
    /// sub-templates so the parent vector carries exactly one.
    pub ignore_sys_version: bool,
    /// Marks a template compiled as a layout or include target;
    /// `extends` is forbidden inside it.
    pub parent_template: bool,
}

/// Compile a source string with default options and resolve jumps.
/// `file` is used for error reporting and relative include resolution.
pub fn compile(source: &str, file: &str) -> Result<Vec<Token>, CompileError> {
    compile_with(source, file, CompileOptions::default())
}

pub fn compile_with(
    source: &str,
    file: &str,
    opts: CompileOptions,
) -> Result<Vec<Token>, CompileError> {
    let mut tokens = Scanner::new(source, file, opts, 0).run()?;
    resolver::resolve_jumps(&mut tokens, file)?;
    debug!(file, tokens = tokens.len(), "compiled template");
    Ok(tokens)
}

pub fn compile_file(path: impl AsRef<Path>) -> Result<Vec<Token>, CompileError> {
    let path = path.as_ref();
    let file = path.to_string_lossy().into_owned();
    let source = fs::read_to_string(path)
        .map_err(|e| CompileError::new(format!("cannot read template: {e}"), "", 0, &file))?;
    compile(&source, &file)
}

/// A parsed `| name, p1, p2` tail. Emission is deferred because the token
/// ahead of the filter carries the parameter count.
struct FilterTail {
    name: String,
    params: Vec<(String, ParamType)>,
}

struct Scanner<'s> {
    src: &'s str,
    bytes: &'s [u8],
    file: &'s str,
    opts: CompileOptions,
    depth: usize,
    i: usize,
    line: u32,
    verbatim_start: usize,
    /// Output-producing tokens emitted on the current physical line.
    content_on_line: u32,
    extends_seen: bool,
    tokens: Vec<Token>,
}

impl<'s> Scanner<'s> {
    fn new(src: &'s str, file: &'s str, opts: CompileOptions, depth: usize) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            file,
            opts,
            depth,
            i: 0,
            line: 1,
            verbatim_start: 0,
            content_on_line: 0,
            extends_seen: false,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, CompileError> {
        if !self.opts.ignore_sys_version {
            self.tokens
                .push(Token::text(TokenKind::SystemVersion, ENGINE_VERSION));
        }

        while self.i < self.bytes.len() {
            match self.bytes[self.i] {
                b'\r' | b'\n' => {
                    self.flush_verbatim();
                    if self.bytes[self.i] == b'\r' && self.peek_byte(1) == Some(b'\n') {
                        self.i += 2;
                    } else {
                        self.i += 1;
                    }
                    self.line += 1;
                    if self.content_on_line > 0 {
                        self.tokens.push(Token::bare(TokenKind::LineBreak));
                        self.content_on_line = 0;
                    }
                    self.verbatim_start = self.i;
                }
                b'{' if self.peek_byte(1) == Some(b'{') => {
                    self.flush_verbatim();
                    if self.peek_byte(2) == Some(b'{') {
                        // "{{{" escapes a literal open tag
                        self.tokens.push(Token::text(TokenKind::Content, "{{"));
                        self.content_on_line += 1;
                        self.i += 3;
                    } else {
                        self.i += 2;
                        self.directive()?;
                    }
                    self.verbatim_start = self.i;
                }
                _ => self.i += 1,
            }
        }
        self.flush_verbatim();
        self.tokens.push(Token::bare(TokenKind::Eof));
        Ok(self.tokens)
    }

    // ----- directive parsing -----

    fn directive(&mut self) -> Result<(), CompileError> {
        self.skip_ws();
        match self.peek_byte(0) {
            None => Err(self.err("unterminated directive")),
            Some(b'#') => self.comment(),
            Some(b':') => {
                self.i += 1;
                let path = self.ident_path()?;
                let raw = self.eat(b'$');
                let filter = self.filter_tail()?;
                self.expect_close()?;
                self.emit_output(TokenKind::Value, path, raw, filter);
                Ok(())
            }
            Some(b'"') => {
                let text = self.string_lit()?;
                let raw = self.eat(b'$');
                self.skip_ws();
                let filter = match self.filter_tail()? {
                    Some(f) => Some(f),
                    None => return Err(self.err("literal output requires a filter")),
                };
                self.expect_close()?;
                self.emit_output(TokenKind::LiteralString, text, raw, filter);
                Ok(())
            }
            Some(_) => self.statement(),
        }
    }

    fn statement(&mut self) -> Result<(), CompileError> {
        let word = self.ident()?;
        if word.eq_ignore_ascii_case("for") {
            self.stmt_for()
        } else if word.eq_ignore_ascii_case("endfor") {
            self.simple_stmt(TokenKind::EndFor)
        } else if word.eq_ignore_ascii_case("continue") {
            self.simple_stmt(TokenKind::Continue)
        } else if word.eq_ignore_ascii_case("if") {
            self.stmt_if()
        } else if word.eq_ignore_ascii_case("else") {
            self.simple_stmt(TokenKind::Else)
        } else if word.eq_ignore_ascii_case("endif") {
            self.simple_stmt(TokenKind::EndIf)
        } else if word.eq_ignore_ascii_case("include") {
            self.stmt_include()
        } else if word.eq_ignore_ascii_case("extends") {
            self.stmt_extends()
        } else if word.eq_ignore_ascii_case("block") {
            self.stmt_block()
        } else if word.eq_ignore_ascii_case("endblock") {
            self.simple_stmt(TokenKind::EndBlock)
        } else if word.eq_ignore_ascii_case("exit") {
            self.simple_stmt(TokenKind::Exit)
        } else {
            Err(self.err(format!("unknown directive '{word}'")))
        }
    }

    fn simple_stmt(&mut self, kind: TokenKind) -> Result<(), CompileError> {
        self.expect_close()?;
        self.tokens.push(Token::bare(kind));
        Ok(())
    }

    fn stmt_for(&mut self) -> Result<(), CompileError> {
        self.skip_ws();
        let iterator = self.ident()?;
        self.skip_ws();
        let kw = self.ident()?;
        if !kw.eq_ignore_ascii_case("in") {
            return Err(self.err("expected 'in' after the loop iterator"));
        }
        self.skip_ws();
        let source = self.ident_path()?;
        if iterator.eq_ignore_ascii_case(&source) {
            return Err(self.err("'for' iterator name matches its data source"));
        }
        self.expect_close()?;
        self.tokens.push(Token {
            kind: TokenKind::For,
            value1: source,
            value2: iterator,
            ref1: UNSET,
            ref2: UNSET,
        });
        Ok(())
    }

    fn stmt_if(&mut self) -> Result<(), CompileError> {
        self.skip_ws();
        let negated = self.eat(b'!');
        self.skip_ws();
        let path = self.ident_path()?;
        let filter = self.filter_tail()?;
        self.expect_close()?;

        self.tokens.push(Token::bare(TokenKind::IfThen));
        let value1 = if negated { format!("!{path}") } else { path };
        let param_count = filter.as_ref().map(|f| f.params.len() as i64);
        self.tokens.push(Token {
            kind: TokenKind::BoolExpression,
            value1,
            value2: String::new(),
            ref1: param_count.unwrap_or(UNSET),
            ref2: UNSET,
        });
        if let Some(f) = filter {
            self.emit_filter(f);
        }
        Ok(())
    }

    fn stmt_block(&mut self) -> Result<(), CompileError> {
        self.skip_ws();
        let name = self.string_lit()?;
        if name.is_empty() {
            return Err(self.err("block name must not be empty"));
        }
        self.expect_close()?;
        self.tokens.push(Token::text(TokenKind::Block, name));
        Ok(())
    }

    fn stmt_include(&mut self) -> Result<(), CompileError> {
        self.skip_ws();
        let rel = self.string_lit()?;
        self.expect_close()?;
        self.splice_file(
            &rel,
            CompileOptions {
                ignore_sys_version: true,
                parent_template: true,
            },
        )?;
        self.content_on_line += 1;
        Ok(())
    }

    fn stmt_extends(&mut self) -> Result<(), CompileError> {
        self.skip_ws();
        let rel = self.string_lit()?;
        self.expect_close()?;
        if self.opts.parent_template {
            return Err(self.err("'extends' is not allowed inside a parent template"));
        }
        if self.extends_seen {
            return Err(self.err("duplicate 'extends'"));
        }
        self.extends_seen = true;

        self.tokens
            .push(Token::text(TokenKind::Info, vellum_token::BEGIN_OF_LAYOUT));
        self.splice_file(
            &rel,
            CompileOptions {
                ignore_sys_version: true,
                parent_template: true,
            },
        )?;
        self.tokens
            .push(Token::text(TokenKind::Info, vellum_token::END_OF_LAYOUT));
        self.content_on_line += 1;
        Ok(())
    }

    /// Compile `rel` (resolved against the reference file), strip its
    /// trailing `Eof`, splice the tokens in place.
    fn splice_file(&mut self, rel: &str, opts: CompileOptions) -> Result<(), CompileError> {
        if self.depth + 1 > MAX_INCLUDE_DEPTH {
            return Err(self.err(format!("include nesting deeper than {MAX_INCLUDE_DEPTH}")));
        }
        let resolved = resolve_relative(self.file, rel);
        let resolved_name = resolved.to_string_lossy().into_owned();
        trace!(from = self.file, to = %resolved_name, "splicing sub-template");
        let text = fs::read_to_string(&resolved)
            .map_err(|e| self.err(format!("cannot read sub-template '{rel}': {e}")))?;
        let mut sub = Scanner::new(&text, &resolved_name, opts, self.depth + 1).run()?;
        match sub.pop() {
            Some(t) if t.kind == TokenKind::Eof => {}
            _ => return Err(self.err(format!("sub-template '{rel}' produced no Eof"))),
        }
        self.tokens.extend(sub);
        Ok(())
    }

    fn comment(&mut self) -> Result<(), CompileError> {
        let start = self.i;
        let start_line = self.line;
        while self.i < self.bytes.len() {
            match self.bytes[self.i] {
                b'}' if self.peek_byte(1) == Some(b'}') => {
                    self.i += 2;
                    return Ok(());
                }
                b'\n' => {
                    self.line += 1;
                    self.i += 1;
                }
                _ => self.i += 1,
            }
        }
        self.i = start;
        self.line = start_line;
        Err(self.err("unterminated comment"))
    }

    // ----- output emission -----

    fn emit_output(
        &mut self,
        kind: TokenKind,
        value1: String,
        raw: bool,
        filter: Option<FilterTail>,
    ) {
        let param_count = filter.as_ref().map(|f| f.params.len() as i64);
        self.tokens.push(Token {
            kind,
            value1,
            value2: String::new(),
            ref1: param_count.unwrap_or(UNSET),
            ref2: if raw { ESCAPE_RAW } else { ESCAPE_HTML },
        });
        if let Some(f) = filter {
            self.emit_filter(f);
        }
        self.content_on_line += 1;
    }

    fn emit_filter(&mut self, tail: FilterTail) {
        self.tokens.push(Token {
            kind: TokenKind::FilterName,
            value1: tail.name,
            value2: String::new(),
            ref1: tail.params.len() as i64,
            ref2: UNSET,
        });
        for (text, ty) in tail.params {
            self.tokens.push(Token {
                kind: TokenKind::FilterParameter,
                value1: text,
                value2: String::new(),
                ref1: UNSET,
                ref2: ty.code(),
            });
        }
    }

    // ----- sub-lexers -----

    fn filter_tail(&mut self) -> Result<Option<FilterTail>, CompileError> {
        self.skip_ws();
        if !self.eat(b'|') {
            return Ok(None);
        }
        self.skip_ws();
        let name = self.ident()?;
        let mut params = Vec::new();
        loop {
            self.skip_ws();
            if !self.eat(b',') {
                break;
            }
            self.skip_ws();
            params.push(self.filter_param()?);
        }
        Ok(Some(FilterTail { name, params }))
    }

    fn filter_param(&mut self) -> Result<(String, ParamType), CompileError> {
        match self.peek_byte(0) {
            Some(b'"') => Ok((self.string_lit()?, ParamType::Str)),
            Some(b'+') | Some(b'-') => self.number(),
            Some(b) if b.is_ascii_digit() => self.number(),
            Some(b) if is_ident_start(b) => Ok((self.ident_path()?, ParamType::Variable)),
            _ => Err(self.err("expected a filter parameter")),
        }
    }

    fn number(&mut self) -> Result<(String, ParamType), CompileError> {
        let start = self.i;
        if matches!(self.peek_byte(0), Some(b'+') | Some(b'-')) {
            self.i += 1;
        }
        let digits = self.eat_digits();
        if digits == 0 {
            return Err(self.err("expected digits in a number literal"));
        }
        let mut ty = ParamType::Int;
        if self.eat(b'.') {
            if self.eat_digits() == 0 {
                return Err(self.err("expected digits after the decimal point"));
            }
            ty = ParamType::Float;
        }
        Ok((self.src[start..self.i].to_string(), ty))
    }

    fn eat_digits(&mut self) -> usize {
        let start = self.i;
        while matches!(self.peek_byte(0), Some(b) if b.is_ascii_digit()) {
            self.i += 1;
        }
        self.i - start
    }

    /// `"…"`; no escape syntax inside strings.
    fn string_lit(&mut self) -> Result<String, CompileError> {
        if !self.eat(b'"') {
            return Err(self.err("expected a string literal"));
        }
        let start = self.i;
        let start_line = self.line;
        while self.i < self.bytes.len() {
            match self.bytes[self.i] {
                b'"' => {
                    let text = self.src[start..self.i].to_string();
                    self.i += 1;
                    return Ok(text);
                }
                b'\n' => {
                    self.line += 1;
                    self.i += 1;
                }
                _ => self.i += 1,
            }
        }
        self.line = start_line;
        self.i = start;
        Err(self.err("unclosed string"))
    }

    /// `[A-Za-z_@][A-Za-z0-9_]*`, with `@@` accepted as the prefix of a
    /// pseudo-variable name.
    fn ident(&mut self) -> Result<String, CompileError> {
        let start = self.i;
        match self.peek_byte(0) {
            Some(b) if is_ident_start(b) => self.i += 1,
            _ => return Err(self.err("expected an identifier")),
        }
        if self.bytes[start] == b'@' && self.peek_byte(0) == Some(b'@') {
            self.i += 1;
        }
        while matches!(self.peek_byte(0), Some(b) if is_ident_continue(b)) {
            self.i += 1;
        }
        Ok(self.src[start..self.i].to_string())
    }

    /// Dotted path with optional bracket segments, kept verbatim for the
    /// interpreter: `order.lines[2].price`. Brackets are not parsed here.
    fn ident_path(&mut self) -> Result<String, CompileError> {
        let start = self.i;
        self.ident()?;
        loop {
            match self.peek_byte(0) {
                Some(b'.') => {
                    self.i += 1;
                    if self.ident().is_err() {
                        return Err(self.err("expected an identifier after '.'"));
                    }
                }
                Some(b'[') => {
                    self.i += 1;
                    let digits = self.eat_digits();
                    if digits == 0 || !self.eat(b']') {
                        return Err(self.err("expected an index like '[0]'"));
                    }
                }
                _ => break,
            }
        }
        Ok(self.src[start..self.i].to_string())
    }

    // ----- cursor helpers -----

    fn flush_verbatim(&mut self) {
        if self.verbatim_start < self.i {
            let text = &self.src[self.verbatim_start..self.i];
            self.tokens.push(Token::text(TokenKind::Content, text));
            self.content_on_line += 1;
        }
    }

    fn expect_close(&mut self) -> Result<(), CompileError> {
        self.skip_ws();
        if self.peek_byte(0) == Some(b'}') && self.peek_byte(1) == Some(b'}') {
            self.i += 2;
            Ok(())
        } else {
            Err(self.err("expected '}}'"))
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek_byte(0), Some(b' ') | Some(b'\t')) {
            self.i += 1;
        }
    }

    fn peek_byte(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.i + ahead).copied()
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek_byte(0) == Some(b) {
            self.i += 1;
            true
        } else {
            false
        }
    }

    fn err(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(message, peek_at(self.src, self.i), self.line, self.file)
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'@'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Resolve `rel` against the compiling template's reference path: against
/// the path itself when it names a directory, otherwise against its
/// parent directory.
fn resolve_relative(reference: &str, rel: &str) -> PathBuf {
    let refp = Path::new(reference);
    if refp.is_dir() {
        return refp.join(rel);
    }
    match refp.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(rel),
        _ => PathBuf::from(rel),
    }
}
