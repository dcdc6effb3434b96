//! SF-010: Tokenizer for the SUSHI app script dialect.
//!
//! Covers enough of the surface syntax to walk a whole definition file,
//! including method bodies that are never interpreted: strings with
//! interpolation, heredocs, percent literals, regex literals, backticks,
//! comments and `=begin`/`=end` blocks. Nothing here evaluates anything.

use super::{Budget, SandboxError};

/// Piece of a string literal.
#[derive(Debug, Clone, PartialEq)]
pub enum StrPart {
    Lit(String),
    /// `#{...}` source text and the line it starts on
    Interp { src: String, line: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Ident(String),
    Const(String),
    IVar(String),
    CVar(String),
    GVar(String),
    Symbol(String),
    /// `key:` inside hashes and argument lists
    Label(String),
    Str(Vec<StrPart>),
    Words(Vec<String>),
    Int(i64),
    Float(f64),
    Regex,
    Command,
    Punct(&'static str),
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
    /// Whitespace precedes this token on the same line
    pub spaced: bool,
}

const PUNCTS: &[&str] = &[
    "**=", "<=>", "===", "...", "<<=", ">>=", "||=", "&&=", "**", "==", "!=", "=~", "!~", ">=", "<=",
    "&&", "||", "<<", ">>", "+=", "-=", "*=", "/=", "%=", "|=", "&=", "^=", "=>", "->", "::", "..",
    "&.", "(", ")", "[", "]", "{", "}", ",", ".", "=", "+", "-", "*", "/", "%", "<", ">", "!", "?",
    ":", ";", "|", "&", "^", "~",
];

const KEYWORDS: &[&str] = &[
    "if", "unless", "while", "until", "and", "or", "not", "return", "when", "then", "else",
    "elsif", "case", "in", "do", "begin", "rescue", "ensure", "yield", "puts", "print",
];

/// Tokenize a whole source file.
pub fn tokenize(source: &str, budget: &Budget) -> Result<Vec<Token>, SandboxError> {
    tokenize_at(source, 1, budget)
}

/// Tokenize a fragment whose first line is `first_line` in the enclosing file.
pub fn tokenize_at(source: &str, first_line: usize, budget: &Budget) -> Result<Vec<Token>, SandboxError> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: first_line,
        tokens: Vec::new(),
        pending: Vec::new(),
        spaced: false,
        budget,
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

struct PendingHeredoc {
    index: usize,
    id: String,
    indented_end: bool,
    squiggly: bool,
    interpolate: bool,
    line: usize,
}

struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    tokens: Vec<Token>,
    pending: Vec<PendingHeredoc>,
    spaced: bool,
    budget: &'a Budget,
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn syntax(line: usize, message: impl Into<String>) -> SandboxError {
    SandboxError::Syntax {
        line,
        message: message.into(),
    }
}

impl Lexer<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn at_line_start(&self) -> bool {
        self.pos == 0 || self.chars.get(self.pos - 1) == Some(&'\n')
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn push(&mut self, tok: Tok, line: usize) {
        self.tokens.push(Token {
            tok,
            line,
            spaced: self.spaced,
        });
        self.spaced = false;
    }

    /// Whether the previous token ends an operand, which makes `/`, `%`
    /// and `<<` binary operators rather than literal openers.
    fn value_ended(&self) -> bool {
        match self.tokens.last().map(|t| &t.tok) {
            None => false,
            Some(Tok::Ident(w)) => !KEYWORDS.contains(&w.as_str()),
            Some(Tok::Punct(p)) => matches!(*p, ")" | "]" | "}"),
            Some(Tok::Newline) | Some(Tok::Label(_)) => false,
            Some(_) => true,
        }
    }

    /// `foo /x/`, `foo %w[a]`: a spaced identifier followed by an unspaced
    /// literal opener reads as a command call argument.
    fn literal_context(&self) -> bool {
        if !self.value_ended() {
            return true;
        }
        let after = self.peek_at(1);
        matches!(self.tokens.last().map(|t| &t.tok), Some(Tok::Ident(_)))
            && self.spaced
            && !matches!(after, None | Some(' ') | Some('\t') | Some('\n') | Some('='))
    }

    fn run(&mut self) -> Result<(), SandboxError> {
        while let Some(c) = self.peek() {
            self.budget.check()?;

            if self.at_line_start() {
                if self.starts_with("=begin") {
                    self.skip_block_comment()?;
                    continue;
                }
                if self.starts_with("__END__")
                    && matches!(self.peek_at(7), None | Some('\n') | Some('\r'))
                {
                    break;
                }
            }

            match c {
                ' ' | '\t' | '\r' | '\u{c}' => {
                    self.pos += 1;
                    self.spaced = true;
                }
                '\\' if matches!(self.peek_at(1), Some('\n')) => {
                    self.bump();
                    self.bump();
                    self.spaced = true;
                }
                '\n' => {
                    let line = self.line;
                    self.bump();
                    self.push(Tok::Newline, line);
                    if !self.pending.is_empty() {
                        self.read_heredoc_bodies()?;
                    }
                }
                '#' => {
                    while let Some(n) = self.peek() {
                        if n == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                '"' => {
                    let line = self.line;
                    self.pos += 1;
                    let raw = self.read_delimited(None, '"', true)?;
                    let parts = split_interpolation(&raw, line, self.budget)?;
                    self.push(Tok::Str(parts), line);
                }
                '\'' => {
                    let line = self.line;
                    self.pos += 1;
                    let raw = self.read_delimited(None, '\'', false)?;
                    self.push(Tok::Str(vec![StrPart::Lit(unescape_single(&raw, '\''))]), line);
                }
                '`' => {
                    let line = self.line;
                    self.pos += 1;
                    self.read_delimited(None, '`', true)?;
                    self.push(Tok::Command, line);
                }
                '@' => self.lex_instance_var()?,
                '$' => self.lex_global_var(),
                ':' => self.lex_colon()?,
                c if c.is_ascii_digit() => self.lex_number()?,
                c if is_ident_start(c) => self.lex_ident(),
                '%' if self.literal_context() && self.percent_literal_ahead() => self.lex_percent()?,
                '/' if self.literal_context() => {
                    let line = self.line;
                    self.pos += 1;
                    self.read_delimited(None, '/', true)?;
                    self.skip_regex_flags();
                    self.push(Tok::Regex, line);
                }
                '<' if self.heredoc_ahead() => self.lex_heredoc_start()?,
                _ => self.lex_punct()?,
            }
        }

        if let Some(heredoc) = self.pending.first() {
            return Err(syntax(heredoc.line, format!("unterminated heredoc `{}`", heredoc.id)));
        }
        let line = self.line;
        self.push(Tok::Newline, line);
        self.push(Tok::Eof, line);
        Ok(())
    }

    fn skip_block_comment(&mut self) -> Result<(), SandboxError> {
        let start = self.line;
        loop {
            // consume the current line
            while let Some(c) = self.bump() {
                if c == '\n' {
                    break;
                }
            }
            if self.peek().is_none() {
                return Err(syntax(start, "unterminated =begin comment"));
            }
            if self.starts_with("=end") {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.pos += 1;
                }
                return Ok(());
            }
        }
    }

    /// Read up to an unescaped `close`, honouring nesting of `open` and
    /// `#{}` regions. Returns the raw text without the closing delimiter.
    fn read_delimited(&mut self, open: Option<char>, close: char, interp: bool) -> Result<String, SandboxError> {
        let start = self.line;
        let mut raw = String::new();
        let mut depth = 0usize;
        loop {
            self.budget.check()?;
            let Some(c) = self.bump() else {
                return Err(syntax(start, "unterminated literal"));
            };
            match c {
                '\\' => {
                    raw.push('\\');
                    if let Some(n) = self.bump() {
                        raw.push(n);
                    }
                }
                '#' if interp && self.peek() == Some('{') => {
                    raw.push('#');
                    let mut braces = 0usize;
                    loop {
                        self.budget.check()?;
                        let Some(n) = self.bump() else {
                            return Err(syntax(start, "unterminated interpolation"));
                        };
                        raw.push(n);
                        match n {
                            '{' => braces += 1,
                            '}' => {
                                braces -= 1;
                                if braces == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                }
                c if Some(c) == open => {
                    depth += 1;
                    raw.push(c);
                }
                c if c == close => {
                    if depth == 0 {
                        return Ok(raw);
                    }
                    depth -= 1;
                    raw.push(c);
                }
                c => raw.push(c),
            }
        }
    }

    fn skip_regex_flags(&mut self) {
        while matches!(self.peek(), Some('i' | 'm' | 'x' | 'o' | 'u' | 'e' | 's' | 'n')) {
            self.pos += 1;
        }
    }

    fn lex_instance_var(&mut self) -> Result<(), SandboxError> {
        let line = self.line;
        self.pos += 1;
        let class_var = self.peek() == Some('@');
        if class_var {
            self.pos += 1;
        }
        let name = self.read_ident_chars();
        if name.is_empty() {
            return Err(syntax(line, "`@` without a variable name"));
        }
        let tok = if class_var { Tok::CVar(name) } else { Tok::IVar(name) };
        self.push(tok, line);
        Ok(())
    }

    fn lex_global_var(&mut self) {
        let line = self.line;
        self.pos += 1;
        let mut name = self.read_ident_chars();
        if name.is_empty() {
            if let Some(c) = self.bump() {
                name.push(c);
            }
        }
        self.push(Tok::GVar(name), line);
    }

    fn lex_colon(&mut self) -> Result<(), SandboxError> {
        let line = self.line;
        match self.peek_at(1) {
            Some(':') => {
                self.pos += 2;
                self.push(Tok::Punct("::"), line);
            }
            Some(c) if is_ident_start(c) => {
                self.pos += 1;
                let mut name = self.read_ident_chars();
                if let Some(s @ ('?' | '!' | '=')) = self.peek() {
                    if self.peek_at(1) != Some('=') && self.peek_at(1) != Some('>') {
                        self.pos += 1;
                        name.push(s);
                    }
                }
                self.push(Tok::Symbol(name), line);
            }
            Some('"') => {
                self.pos += 2;
                let raw = self.read_delimited(None, '"', true)?;
                let text = split_interpolation(&raw, line, self.budget)?
                    .into_iter()
                    .map(|p| match p {
                        StrPart::Lit(s) => s,
                        StrPart::Interp { src, .. } => format!("#{{{}}}", src),
                    })
                    .collect();
                self.push(Tok::Symbol(text), line);
            }
            _ => {
                self.pos += 1;
                self.push(Tok::Punct(":"), line);
            }
        }
        Ok(())
    }

    fn read_ident_chars(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if !is_ident_char(c) {
                break;
            }
            name.push(c);
            self.pos += 1;
        }
        name
    }

    fn lex_ident(&mut self) {
        let line = self.line;
        let mut name = self.read_ident_chars();
        if let Some(s @ ('?' | '!')) = self.peek() {
            if self.peek_at(1) != Some('=') || self.peek_at(2) == Some('=') {
                self.pos += 1;
                name.push(s);
            }
        }
        if self.peek() == Some(':') && self.peek_at(1) != Some(':') && !name.ends_with('?') {
            self.pos += 1;
            self.push(Tok::Label(name), line);
            return;
        }
        let tok = if name.starts_with(|c: char| c.is_uppercase()) {
            Tok::Const(name)
        } else {
            Tok::Ident(name)
        };
        self.push(tok, line);
    }

    fn lex_number(&mut self) -> Result<(), SandboxError> {
        let line = self.line;
        let mut text = String::new();
        let radix = match (self.peek(), self.peek_at(1)) {
            (Some('0'), Some('x' | 'X')) => 16,
            (Some('0'), Some('b' | 'B')) => 2,
            (Some('0'), Some('o' | 'O')) => 8,
            _ => 10,
        };
        if radix != 10 {
            self.pos += 2;
            while let Some(c) = self.peek() {
                if c.is_digit(radix) || c == '_' {
                    if c != '_' {
                        text.push(c);
                    }
                    self.pos += 1;
                } else {
                    break;
                }
            }
            let n = i64::from_str_radix(&text, radix)
                .map_err(|_| syntax(line, "integer literal out of range"))?;
            self.push(Tok::Int(n), line);
            return Ok(());
        }

        let mut is_float = false;
        self.read_digits(&mut text);
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            text.push('.');
            self.pos += 1;
            self.read_digits(&mut text);
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = matches!(self.peek_at(1), Some('+' | '-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                text.push('e');
                if sign {
                    if let Some(s) = self.peek_at(1) {
                        text.push(s);
                    }
                }
                self.pos += digit_at;
                self.read_digits(&mut text);
            }
        }

        let tok = if is_float {
            Tok::Float(
                text.parse()
                    .map_err(|_| syntax(line, format!("invalid float literal {}", text)))?,
            )
        } else {
            Tok::Int(
                text.parse()
                    .map_err(|_| syntax(line, "integer literal out of range"))?,
            )
        };
        self.push(tok, line);
        Ok(())
    }

    fn read_digits(&mut self, text: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
            } else if c != '_' {
                break;
            }
            self.pos += 1;
        }
    }

    fn percent_literal_ahead(&self) -> bool {
        let is_delim = |c: Option<char>| matches!(c, Some('(' | '[' | '{' | '<' | '|' | '!' | '/' | '^'));
        match self.peek_at(1) {
            Some('w' | 'W' | 'i' | 'I' | 'q' | 'Q' | 'r' | 'x' | 's') => is_delim(self.peek_at(2)),
            c => is_delim(c) && !self.value_ended(),
        }
    }

    fn lex_percent(&mut self) -> Result<(), SandboxError> {
        let line = self.line;
        self.pos += 1;
        let kind = match self.peek() {
            Some(c) if c.is_ascii_alphabetic() => {
                self.pos += 1;
                c
            }
            _ => 'Q',
        };
        let Some(open) = self.bump() else {
            return Err(syntax(line, "unterminated percent literal"));
        };
        let close = match open {
            '(' => ')',
            '[' => ']',
            '{' => '}',
            '<' => '>',
            other => other,
        };
        let nest = if close != open { Some(open) } else { None };
        let interp = matches!(kind, 'W' | 'I' | 'Q' | 'r' | 'x');
        let raw = self.read_delimited(nest, close, interp)?;
        let tok = match kind {
            'w' | 'W' | 'i' | 'I' => Tok::Words(raw.split_whitespace().map(str::to_string).collect()),
            'q' => Tok::Str(vec![StrPart::Lit(unescape_single(&raw, close))]),
            's' => Tok::Symbol(raw),
            'r' => {
                self.skip_regex_flags();
                Tok::Regex
            }
            'x' => Tok::Command,
            _ => Tok::Str(split_interpolation(&raw, line, self.budget)?),
        };
        self.push(tok, line);
        Ok(())
    }

    fn heredoc_ahead(&self) -> bool {
        if self.peek_at(1) != Some('<') {
            return false;
        }
        let (marker, next) = match self.peek_at(2) {
            Some('-' | '~') => (true, self.peek_at(3)),
            c => (false, c),
        };
        let starts_id = match next {
            Some('\'' | '"') => true,
            Some(c) if marker => is_ident_start(c),
            Some(c) => c.is_uppercase() || c == '_',
            None => false,
        };
        starts_id && self.literal_context()
    }

    fn lex_heredoc_start(&mut self) -> Result<(), SandboxError> {
        let line = self.line;
        self.pos += 2;
        let mut indented_end = false;
        let mut squiggly = false;
        match self.peek() {
            Some('-') => {
                indented_end = true;
                self.pos += 1;
            }
            Some('~') => {
                indented_end = true;
                squiggly = true;
                self.pos += 1;
            }
            _ => {}
        }
        let (id, interpolate) = match self.peek() {
            Some(q @ ('\'' | '"')) => {
                self.pos += 1;
                let mut id = String::new();
                loop {
                    match self.peek() {
                        Some(c) if c == q => {
                            self.pos += 1;
                            break;
                        }
                        Some('\n') | None => return Err(syntax(line, "unterminated heredoc identifier")),
                        Some(c) => {
                            id.push(c);
                            self.pos += 1;
                        }
                    }
                }
                (id, q == '"')
            }
            _ => (self.read_ident_chars(), true),
        };
        if id.is_empty() {
            return Err(syntax(line, "empty heredoc identifier"));
        }
        self.pending.push(PendingHeredoc {
            index: self.tokens.len(),
            id,
            indented_end,
            squiggly,
            interpolate,
            line,
        });
        self.push(Tok::Str(Vec::new()), line);
        Ok(())
    }

    /// Called right after a newline: consume the bodies of all heredocs
    /// opened on the previous line, in order.
    fn read_heredoc_bodies(&mut self) -> Result<(), SandboxError> {
        let pending = std::mem::take(&mut self.pending);
        for heredoc in pending {
            let body_line = self.line;
            let mut lines: Vec<String> = Vec::new();
            loop {
                self.budget.check()?;
                if self.peek().is_none() {
                    return Err(syntax(heredoc.line, format!("unterminated heredoc `{}`", heredoc.id)));
                }
                let mut text = String::new();
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                    text.push(c);
                }
                let text = text.strip_suffix('\r').map(str::to_string).unwrap_or(text);
                let is_end = if heredoc.indented_end {
                    text.trim() == heredoc.id
                } else {
                    text == heredoc.id
                };
                if is_end {
                    break;
                }
                lines.push(text);
            }

            if heredoc.squiggly {
                dedent(&mut lines);
            }
            let mut body = String::new();
            for l in &lines {
                body.push_str(l);
                body.push('\n');
            }
            let parts = if heredoc.interpolate {
                split_interpolation(&body, body_line, self.budget)?
            } else {
                vec![StrPart::Lit(body)]
            };
            if let Some(token) = self.tokens.get_mut(heredoc.index) {
                token.tok = Tok::Str(parts);
            }
        }
        Ok(())
    }

    fn lex_punct(&mut self) -> Result<(), SandboxError> {
        let line = self.line;
        for p in PUNCTS {
            if self.starts_with(p) {
                self.pos += p.chars().count();
                self.push(Tok::Punct(p), line);
                return Ok(());
            }
        }
        let c = self.peek().unwrap_or(' ');
        Err(syntax(line, format!("unexpected character {:?}", c)))
    }
}

/// Strip the common leading whitespace of non-blank lines (`<<~`).
fn dedent(lines: &mut [String]) {
    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.chars().take_while(|c| *c == ' ' || *c == '\t').count())
        .min()
        .unwrap_or(0);
    for l in lines.iter_mut() {
        *l = l.chars().skip(indent).collect();
    }
}

/// Process a single-quoted body: only `\\` and `\<close>` are escapes.
fn unescape_single(raw: &str, close: char) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some(&n) if n == '\\' || n == close || n == '\'' => {
                    out.push(n);
                    chars.next();
                }
                _ => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Process a double-quoted body: escapes and `#{}` interpolation.
///
/// An `#{` without a matching `}` is kept as literal text.
pub fn split_interpolation(raw: &str, first_line: usize, budget: &Budget) -> Result<Vec<StrPart>, SandboxError> {
    let chars: Vec<char> = raw.chars().collect();
    let closers = matching_braces(&chars, budget)?;
    let mut parts = Vec::new();
    let mut buf = String::new();
    let mut line = first_line;
    let mut i = 0;
    while i < chars.len() {
        budget.check()?;
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            let e = chars[i + 1];
            i += 2;
            match e {
                'n' => buf.push('\n'),
                't' => buf.push('\t'),
                'r' => buf.push('\r'),
                '0' => buf.push('\0'),
                's' => buf.push(' '),
                'e' => buf.push('\u{1b}'),
                'a' => buf.push('\u{7}'),
                'b' => buf.push('\u{8}'),
                '\n' => line += 1,
                'u' => {
                    let hex: String = chars[i..].iter().take(4).take_while(|c| c.is_ascii_hexdigit()).collect();
                    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        Some(ch) if hex.len() == 4 => {
                            buf.push(ch);
                            i += 4;
                        }
                        _ => buf.push('u'),
                    }
                }
                other => buf.push(other),
            }
            continue;
        }
        if c == '#' && chars.get(i + 1) == Some(&'{') {
            let close = closers.get(i + 1).copied().flatten();
            if let Some(end) = close {
                if !buf.is_empty() {
                    parts.push(StrPart::Lit(std::mem::take(&mut buf)));
                }
                let src: String = chars[i + 2..end].iter().collect();
                let src_lines = src.matches('\n').count();
                parts.push(StrPart::Interp { src, line });
                line += src_lines;
                i = end + 1;
                continue;
            }
        }
        if c == '\n' {
            line += 1;
        }
        buf.push(c);
        i += 1;
    }
    if !buf.is_empty() || parts.is_empty() {
        parts.push(StrPart::Lit(buf));
    }
    Ok(parts)
}

/// For every `{`, the index of the `}` that brings the nesting back to its
/// level, in one pass. Stray `}` are ignored.
fn matching_braces(chars: &[char], budget: &Budget) -> Result<Vec<Option<usize>>, SandboxError> {
    let mut closers = vec![None; chars.len()];
    let mut open = Vec::new();
    for (i, c) in chars.iter().enumerate() {
        budget.check()?;
        match c {
            '{' => open.push(i),
            '}' => {
                if let Some(start) = open.pop() {
                    closers[start] = Some(i);
                }
            }
            _ => {}
        }
    }
    Ok(closers)
}


#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn lex(src: &str) -> Vec<Tok> {
        let budget = Budget::new(Duration::from_secs(5));
        tokenize(src, &budget)
            .unwrap()
            .into_iter()
            .map(|t| t.tok)
            .filter(|t| !matches!(t, Tok::Newline | Tok::Eof))
            .collect()
    }

    fn lit(s: &str) -> Tok {
        Tok::Str(vec![StrPart::Lit(s.to_string())])
    }

    #[test]
    fn test_sf010_param_assignment() {
        assert_eq!(
            lex("@params['ram', 'description'] = 'GB'"),
            vec![
                Tok::IVar("params".into()),
                Tok::Punct("["),
                lit("ram"),
                Tok::Punct(","),
                lit("description"),
                Tok::Punct("]"),
                Tok::Punct("="),
                lit("GB"),
            ]
        );
    }

    #[test]
    fn test_sf010_numbers() {
        assert_eq!(
            lex("[8, 1_000, 2.5, 1e3, 0x1f]"),
            vec![
                Tok::Punct("["),
                Tok::Int(8),
                Tok::Punct(","),
                Tok::Int(1000),
                Tok::Punct(","),
                Tok::Float(2.5),
                Tok::Punct(","),
                Tok::Float(1000.0),
                Tok::Punct(","),
                Tok::Int(31),
                Tok::Punct("]"),
            ]
        );
    }

    #[test]
    fn test_sf010_predicate_ident_and_label() {
        assert_eq!(
            lex("dataset_has_column?('Read2')"),
            vec![
                Tok::Ident("dataset_has_column?".into()),
                Tok::Punct("("),
                lit("Read2"),
                Tok::Punct(")"),
            ]
        );
        assert_eq!(
            lex("{dir: 'x', :sym => 1}"),
            vec![
                Tok::Punct("{"),
                Tok::Label("dir".into()),
                lit("x"),
                Tok::Punct(","),
                Tok::Symbol("sym".into()),
                Tok::Punct("=>"),
                Tok::Int(1),
                Tok::Punct("}"),
            ]
        );
    }

    #[test]
    fn test_sf010_double_quoted_interpolation() {
        let toks = lex(r#""a\tb #{x + 1} c""#);
        assert_eq!(
            toks,
            vec![Tok::Str(vec![
                StrPart::Lit("a\tb ".into()),
                StrPart::Interp {
                    src: "x + 1".into(),
                    line: 1
                },
                StrPart::Lit(" c".into()),
            ])]
        );
    }

    #[test]
    fn test_sf010_single_quoted_is_raw() {
        assert_eq!(lex(r"'a\nb #{x} it\'s'"), vec![lit(r"a\nb #{x} it's")]);
    }

    #[test]
    fn test_sf010_heredoc_dash() {
        let src = "@description =<<-EOS\nA quality control tool<br/>\n  second line\n    EOS\n@name = 'x'\n";
        let toks = lex(src);
        assert_eq!(toks[0], Tok::IVar("description".into()));
        assert_eq!(toks[1], Tok::Punct("="));
        assert_eq!(toks[2], lit("A quality control tool<br/>\n  second line\n"));
        assert_eq!(toks[3], Tok::IVar("name".into()));
    }

    #[test]
    fn test_sf010_heredoc_squiggly_dedents() {
        let toks = lex("x = <<~TEXT\n    one\n      two\n  TEXT\n");
        assert_eq!(toks[2], lit("one\n  two\n"));
    }

    #[test]
    fn test_sf010_heredoc_line_numbers_continue() {
        let budget = Budget::new(Duration::from_secs(5));
        let toks = tokenize("a = <<-EOS\nx\ny\nEOS\nb = 1\n", &budget).unwrap();
        let b = toks.iter().find(|t| t.tok == Tok::Ident("b".into())).unwrap();
        assert_eq!(b.line, 5);
    }

    #[test]
    fn test_sf010_percent_words() {
        assert_eq!(
            lex("%w(Name Read1 Read2)"),
            vec![Tok::Words(vec!["Name".into(), "Read1".into(), "Read2".into()])]
        );
    }

    #[test]
    fn test_sf010_regex_vs_division() {
        assert_eq!(lex("a / 2"), vec![Tok::Ident("a".into()), Tok::Punct("/"), Tok::Int(2)]);
        assert_eq!(
            lex("line =~ /^#/"),
            vec![Tok::Ident("line".into()), Tok::Punct("=~"), Tok::Regex]
        );
        assert_eq!(lex("x.split /,/"), vec![
            Tok::Ident("x".into()),
            Tok::Punct("."),
            Tok::Ident("split".into()),
            Tok::Regex,
        ]);
    }

    #[test]
    fn test_sf010_comments_and_block_comments() {
        let src = "# header\n=begin\nend end end\n=end\nx = 1 # trailing\n__END__\nclass Broken\n";
        assert_eq!(lex(src), vec![Tok::Ident("x".into()), Tok::Punct("="), Tok::Int(1)]);
    }

    #[test]
    fn test_sf010_backticks_are_opaque() {
        assert_eq!(lex("`rm -rf /`"), vec![Tok::Command]);
        assert_eq!(lex("%x(ls)"), vec![Tok::Command]);
    }

    #[test]
    fn test_sf010_unterminated_string() {
        let budget = Budget::new(Duration::from_secs(5));
        let err = tokenize("x = 'open\n\n", &budget).unwrap_err();
        assert!(matches!(err, SandboxError::Syntax { line: 1, .. }));
    }

    #[test]
    fn test_sf010_unterminated_heredoc() {
        let budget = Budget::new(Duration::from_secs(5));
        assert!(tokenize("x = <<-EOS\nnever closed\n", &budget).is_err());
    }

    #[test]
    fn test_sf010_unclosed_interpolation_is_literal() {
        let budget = Budget::new(Duration::from_secs(5));
        assert_eq!(
            split_interpolation("a #{ b", 1, &budget).unwrap(),
            vec![StrPart::Lit("a #{ b".to_string())]
        );
        let parts = split_interpolation("#{ #{x}", 1, &budget).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], StrPart::Lit("#{ ".to_string()));
        assert!(matches!(&parts[1], StrPart::Interp { src, .. } if src == "x"));
    }

    #[test]
    fn test_sf010_unclosed_interpolation_heredoc_is_linear() {
        let src = format!("x = <<-EOS\n{}\nEOS\n", "#{".repeat(100_000));
        let budget = Budget::new(Duration::from_secs(5));
        let started = std::time::Instant::now();
        let toks = tokenize(&src, &budget).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(toks.iter().any(|t| matches!(&t.tok, Tok::Str(parts) if parts.len() == 1)));
    }

    #[test]
    fn test_sf010_interpolation_scan_respects_deadline() {
        let budget = Budget::new(Duration::ZERO);
        let raw = "#{".repeat(1_000);
        assert!(matches!(split_interpolation(&raw, 1, &budget), Err(SandboxError::Timeout)));
    }

    #[test]
    fn test_sf010_zero_budget_times_out() {
        let budget = Budget::new(Duration::ZERO);
        assert!(matches!(tokenize("x = 1", &budget), Err(SandboxError::Timeout)));
    }

    proptest! {
        #[test]
        fn prop_sf010_never_panics(src in "[a-zA-Z0-9@'\"#{}()\\[\\]<>~:%/=,. \n\\\\-]{0,80}") {
            let budget = Budget::new(Duration::from_secs(5));
            let _ = tokenize(&src, &budget);
        }
    }
}
