//! Hand-written parser for `.lf` script text.
//!
//! Two stages: a lexer that turns the text into tokens carrying 1-based
//! line/column positions, and a recursive-descent parser that builds the
//! [`Script`] AST. Parsing is a pure function of the text — identical input
//! always yields an identical AST. `${NAME}` markers inside string literals
//! are split into template parts here but never resolved; that is the
//! compiler's job.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::script::{
    AssertDirective, AssertOp, AssertTarget, Capture, CaptureField, Directive, Method,
    RequestDirective, Scenario, Script, Template, TemplatePart,
};

/// Parse a full script from text.
pub fn parse_str(text: &str) -> Result<Script> {
    let tokens = lex(text)?;
    Parser::new(tokens).script()
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    /// Keyword or bare name: `scenario`, `request`, `GET`, `content-type`.
    Ident(String),
    /// Double-quoted string literal, quotes stripped, escapes applied.
    Str(String),
    /// Integer literal with an optional alphabetic suffix (`3`, `500ms`, `1m`).
    Num { value: u64, suffix: String },
    LBrace,
    RBrace,
    Colon,
    Assign,
    DotDot,
    EqEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    line: usize,
    column: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn lex(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1usize;
    let mut column = 1usize;

    macro_rules! bump {
        () => {{
            let c = chars.next();
            if let Some(c) = c {
                if c == '\n' {
                    line += 1;
                    column = 1;
                } else {
                    column += 1;
                }
            }
            c
        }};
    }

    while let Some(&c) = chars.peek() {
        let (tok_line, tok_column) = (line, column);
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                bump!();
            }
            '#' => {
                // Line comment.
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    bump!();
                }
            }
            '{' => {
                bump!();
                tokens.push(Token { kind: TokenKind::LBrace, line: tok_line, column: tok_column });
            }
            '}' => {
                bump!();
                tokens.push(Token { kind: TokenKind::RBrace, line: tok_line, column: tok_column });
            }
            ':' => {
                bump!();
                tokens.push(Token { kind: TokenKind::Colon, line: tok_line, column: tok_column });
            }
            '=' => {
                bump!();
                let kind = if chars.peek() == Some(&'=') {
                    bump!();
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                };
                tokens.push(Token { kind, line: tok_line, column: tok_column });
            }
            '<' => {
                bump!();
                let kind = if chars.peek() == Some(&'=') {
                    bump!();
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                };
                tokens.push(Token { kind, line: tok_line, column: tok_column });
            }
            '>' => {
                bump!();
                let kind = if chars.peek() == Some(&'=') {
                    bump!();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                };
                tokens.push(Token { kind, line: tok_line, column: tok_column });
            }
            '.' => {
                bump!();
                if chars.peek() == Some(&'.') {
                    bump!();
                    tokens.push(Token { kind: TokenKind::DotDot, line: tok_line, column: tok_column });
                } else {
                    return Err(Error::syntax(tok_line, tok_column, "unexpected `.`"));
                }
            }
            '"' => {
                bump!();
                let mut value = String::new();
                loop {
                    match bump!() {
                        None | Some('\n') => {
                            return Err(Error::syntax(
                                tok_line,
                                tok_column,
                                "unterminated string literal",
                            ));
                        }
                        Some('"') => break,
                        Some('\\') => match bump!() {
                            Some('"') => value.push('"'),
                            Some('\\') => value.push('\\'),
                            Some('n') => value.push('\n'),
                            Some(other) => {
                                return Err(Error::syntax(
                                    line,
                                    column,
                                    format!("unknown escape `\\{other}`"),
                                ));
                            }
                            None => {
                                return Err(Error::syntax(
                                    tok_line,
                                    tok_column,
                                    "unterminated string literal",
                                ));
                            }
                        },
                        Some(other) => value.push(other),
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Str(value),
                    line: tok_line,
                    column: tok_column,
                });
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        digits.push(c);
                        bump!();
                    } else {
                        break;
                    }
                }
                let mut suffix = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphabetic() {
                        suffix.push(c);
                        bump!();
                    } else {
                        break;
                    }
                }
                let value = digits.parse::<u64>().map_err(|_| {
                    Error::syntax(tok_line, tok_column, format!("number `{digits}` out of range"))
                })?;
                tokens.push(Token {
                    kind: TokenKind::Num { value, suffix },
                    line: tok_line,
                    column: tok_column,
                });
            }
            c if is_ident_start(c) => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if is_ident_continue(c) {
                        ident.push(c);
                        bump!();
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(ident),
                    line: tok_line,
                    column: tok_column,
                });
            }
            other => {
                return Err(Error::syntax(
                    tok_line,
                    tok_column,
                    format!("unexpected character `{other}`"),
                ));
            }
        }
    }

    Ok(tokens)
}

/// Split a raw string literal into literal and `${NAME}` parts.
///
/// A `$` not followed by `{` stays literal text. An unclosed marker or an
/// empty/invalid name is a syntax error reported at the literal's position.
fn parse_template(raw: &str, line: usize, column: usize) -> Result<Template> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut name = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) if is_ident_continue(c) => name.push(c),
                    Some(c) => {
                        return Err(Error::syntax(
                            line,
                            column,
                            format!("invalid character `{c}` in template marker"),
                        ));
                    }
                    None => {
                        return Err(Error::syntax(line, column, "unterminated `${` marker"));
                    }
                }
            }
            if name.is_empty() || !name.chars().next().is_some_and(is_ident_start) {
                return Err(Error::syntax(line, column, "invalid template variable name"));
            }
            if !literal.is_empty() {
                parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
            }
            parts.push(TemplatePart::Var(name));
        } else {
            literal.push(c);
        }
    }
    if !literal.is_empty() || parts.is_empty() {
        parts.push(TemplatePart::Literal(literal));
    }

    Ok(Template { parts })
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    /// Position of the current token, or of the end of input.
    fn here(&self) -> (usize, usize) {
        match self.peek() {
            Some(t) => (t.line, t.column),
            None => self
                .tokens
                .last()
                .map(|t| (t.line, t.column + 1))
                .unwrap_or((1, 1)),
        }
    }

    fn unexpected<T>(&self, expected: &str) -> Result<T> {
        let (line, column) = self.here();
        let found = match self.peek() {
            Some(t) => match &t.kind {
                TokenKind::Ident(s) => format!("`{s}`"),
                TokenKind::Str(_) => "string literal".to_string(),
                TokenKind::Num { value, suffix } => format!("`{value}{suffix}`"),
                TokenKind::LBrace => "`{`".to_string(),
                TokenKind::RBrace => "`}`".to_string(),
                TokenKind::Colon => "`:`".to_string(),
                TokenKind::Assign => "`=`".to_string(),
                TokenKind::DotDot => "`..`".to_string(),
                TokenKind::EqEq => "`==`".to_string(),
                TokenKind::Lt => "`<`".to_string(),
                TokenKind::Le => "`<=`".to_string(),
                TokenKind::Gt => "`>`".to_string(),
                TokenKind::Ge => "`>=`".to_string(),
            },
            None => "end of input".to_string(),
        };
        Err(Error::syntax(line, column, format!("expected {expected}, found {found}")))
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        match self.peek() {
            Some(Token { kind: TokenKind::Ident(s), .. }) if s == kw => {
                self.next();
                Ok(())
            }
            _ => self.unexpected(&format!("`{kw}`")),
        }
    }

    fn expect_lbrace(&mut self) -> Result<()> {
        match self.peek() {
            Some(Token { kind: TokenKind::LBrace, .. }) => {
                self.next();
                Ok(())
            }
            _ => self.unexpected("`{`"),
        }
    }

    fn expect_string(&mut self, what: &str) -> Result<(String, usize, usize)> {
        match self.peek() {
            Some(Token { kind: TokenKind::Str(_), .. }) => {
                let tok = self.next().unwrap();
                match tok.kind {
                    TokenKind::Str(s) => Ok((s, tok.line, tok.column)),
                    _ => unreachable!(),
                }
            }
            _ => self.unexpected(what),
        }
    }

    fn expect_template(&mut self, what: &str) -> Result<Template> {
        let (raw, line, column) = self.expect_string(what)?;
        parse_template(&raw, line, column)
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, usize, usize)> {
        match self.peek() {
            Some(Token { kind: TokenKind::Ident(_), .. }) => {
                let tok = self.next().unwrap();
                match tok.kind {
                    TokenKind::Ident(s) => Ok((s, tok.line, tok.column)),
                    _ => unreachable!(),
                }
            }
            _ => self.unexpected(what),
        }
    }

    fn at_rbrace(&self) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::RBrace, .. }))
    }

    // -- grammar productions ------------------------------------------------

    fn script(&mut self) -> Result<Script> {
        let mut scenarios = Vec::new();
        while self.peek().is_some() {
            scenarios.push(self.scenario()?);
        }
        Ok(Script { scenarios })
    }

    fn scenario(&mut self) -> Result<Scenario> {
        let (line, _) = self.here();
        self.expect_keyword("scenario")?;
        let (name, ..) = self.expect_string("scenario name")?;
        self.expect_lbrace()?;
        let mut directives = Vec::new();
        while !self.at_rbrace() {
            if self.peek().is_none() {
                return self.unexpected("`}`");
            }
            directives.push(self.directive()?);
        }
        self.next(); // consume `}`
        Ok(Scenario { name, directives, line })
    }

    fn directive(&mut self) -> Result<Directive> {
        let (keyword, line, column) = self.expect_ident("directive keyword")?;
        match keyword.as_str() {
            "request" => self.request_directive(line),
            "assert" => self.assert_directive(line),
            "wait" => self.wait_directive(),
            "repeat" => self.repeat_directive(line, column),
            other => Err(Error::syntax(
                line,
                column,
                format!("unknown directive `{other}` (expected request, assert, wait or repeat)"),
            )),
        }
    }

    fn request_directive(&mut self, line: usize) -> Result<Directive> {
        let (method_kw, m_line, m_column) = self.expect_ident("HTTP method")?;
        let method = Method::from_keyword(&method_kw).ok_or_else(|| {
            Error::syntax(m_line, m_column, format!("unknown HTTP method `{method_kw}`"))
        })?;
        let url = self.expect_template("request URL")?;

        let mut headers = Vec::new();
        let mut body = None;
        let mut captures: Vec<Capture> = Vec::new();

        if matches!(self.peek(), Some(Token { kind: TokenKind::LBrace, .. })) {
            self.next();
            while !self.at_rbrace() {
                let (item, i_line, i_column) = self.expect_ident("header, body or capture")?;
                match item.as_str() {
                    "header" => {
                        let (name, ..) = self.expect_string("header name")?;
                        let value = self.expect_template("header value")?;
                        headers.push((name, value));
                    }
                    "body" => {
                        if body.is_some() {
                            return Err(Error::syntax(i_line, i_column, "duplicate body"));
                        }
                        body = Some(self.expect_template("body text")?);
                    }
                    "capture" => {
                        let (name, ..) = self.expect_ident("capture name")?;
                        match self.peek() {
                            Some(Token { kind: TokenKind::Assign, .. }) => {
                                self.next();
                            }
                            _ => return self.unexpected("`=`"),
                        }
                        let field = self.capture_field()?;
                        if captures.iter().any(|c| c.name == name) {
                            return Err(Error::syntax(
                                i_line,
                                i_column,
                                format!("duplicate capture `{name}`"),
                            ));
                        }
                        captures.push(Capture { name, field });
                    }
                    other => {
                        return Err(Error::syntax(
                            i_line,
                            i_column,
                            format!("unknown request item `{other}`"),
                        ));
                    }
                }
            }
            self.next(); // consume `}`
        }

        Ok(Directive::Request(RequestDirective {
            method,
            url,
            headers,
            body,
            captures,
            line,
        }))
    }

    fn capture_field(&mut self) -> Result<CaptureField> {
        let (field, line, column) = self.expect_ident("status, body or header:<name>")?;
        match field.as_str() {
            "status" => Ok(CaptureField::Status),
            "body" => Ok(CaptureField::Body),
            "header" => {
                match self.peek() {
                    Some(Token { kind: TokenKind::Colon, .. }) => {
                        self.next();
                    }
                    _ => return self.unexpected("`:`"),
                }
                let (name, ..) = self.expect_ident("header name")?;
                Ok(CaptureField::Header(name))
            }
            other => Err(Error::syntax(
                line,
                column,
                format!("unknown capture field `{other}`"),
            )),
        }
    }

    fn assert_directive(&mut self, line: usize) -> Result<Directive> {
        let (target_kw, t_line, t_column) = self.expect_ident("assertion target")?;
        let target = match target_kw.as_str() {
            "status" => AssertTarget::Status,
            "body" => AssertTarget::Body,
            "latency" => AssertTarget::Latency,
            "header" => {
                match self.peek() {
                    Some(Token { kind: TokenKind::Colon, .. }) => {
                        self.next();
                    }
                    _ => return self.unexpected("`:`"),
                }
                let (name, ..) = self.expect_ident("header name")?;
                AssertTarget::Header(name)
            }
            other => {
                return Err(Error::syntax(
                    t_line,
                    t_column,
                    format!("unknown assertion target `{other}`"),
                ));
            }
        };

        let op = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::EqEq) => {
                self.next();
                AssertOp::Eq
            }
            Some(TokenKind::Lt) => {
                self.next();
                AssertOp::Lt
            }
            Some(TokenKind::Le) => {
                self.next();
                AssertOp::Le
            }
            Some(TokenKind::Gt) => {
                self.next();
                AssertOp::Gt
            }
            Some(TokenKind::Ge) => {
                self.next();
                AssertOp::Ge
            }
            Some(TokenKind::Ident(s)) if s == "contains" => {
                self.next();
                AssertOp::Contains
            }
            Some(TokenKind::Ident(s)) if s == "matches" => {
                self.next();
                AssertOp::Matches
            }
            _ => return self.unexpected("an assertion operator"),
        };

        let expected = match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::Str(s)) => {
                self.next();
                s
            }
            Some(TokenKind::Num { value, suffix }) => {
                self.next();
                // Durations in assertions normalize to milliseconds.
                if suffix.is_empty() {
                    value.to_string()
                } else {
                    let (d_line, d_column) = self.here();
                    duration_from_parts(value, &suffix, d_line, d_column)?
                        .as_millis()
                        .to_string()
                }
            }
            _ => return self.unexpected("an expected value"),
        };

        Ok(Directive::Assert(AssertDirective { target, op, expected, line }))
    }

    fn wait_directive(&mut self) -> Result<Directive> {
        let min = self.expect_duration()?;
        let max = if matches!(self.peek(), Some(Token { kind: TokenKind::DotDot, .. })) {
            self.next();
            self.expect_duration()?
        } else {
            min
        };
        if max < min {
            let (line, column) = self.here();
            return Err(Error::syntax(line, column, "wait range upper bound below lower bound"));
        }
        Ok(Directive::Wait { min, max })
    }

    fn expect_duration(&mut self) -> Result<Duration> {
        match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::Num { value, suffix }) => {
                let tok = self.next().unwrap();
                duration_from_parts(value, &suffix, tok.line, tok.column)
            }
            _ => self.unexpected("a duration such as `500ms` or `2s`"),
        }
    }

    fn repeat_directive(&mut self, _line: usize, _column: usize) -> Result<Directive> {
        let count = match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::Num { value, suffix }) if suffix.is_empty() => {
                self.next();
                value
            }
            _ => return self.unexpected("a repeat count"),
        };
        self.expect_lbrace()?;
        let mut body = Vec::new();
        while !self.at_rbrace() {
            if self.peek().is_none() {
                return self.unexpected("`}`");
            }
            body.push(self.directive()?);
        }
        self.next(); // consume `}`
        Ok(Directive::Repeat { count, body })
    }
}

fn duration_from_parts(value: u64, suffix: &str, line: usize, column: usize) -> Result<Duration> {
    match suffix {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| Error::syntax(line, column, "duration out of range")),
        "" => Err(Error::syntax(line, column, "duration needs a unit (ms, s or m)")),
        other => Err(Error::syntax(line, column, format!("unknown duration unit `{other}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = r#"
        scenario "search" {
            request GET "/search?q=${QUERY}"
            assert status == 200
        }
    "#;

    #[test]
    fn parses_basic_scenario() {
        let script = parse_str(BASIC).unwrap();
        assert_eq!(script.scenarios.len(), 1);
        let scenario = &script.scenarios[0];
        assert_eq!(scenario.name, "search");
        assert_eq!(scenario.directives.len(), 2);
        match &scenario.directives[0] {
            Directive::Request(req) => {
                assert_eq!(req.method, Method::Get);
                assert_eq!(req.url.var_names().collect::<Vec<_>>(), vec!["QUERY"]);
            }
            other => panic!("expected request, got {other:?}"),
        }
        match &scenario.directives[1] {
            Directive::Assert(a) => {
                assert_eq!(a.target, AssertTarget::Status);
                assert_eq!(a.op, AssertOp::Eq);
                assert_eq!(a.expected, "200");
            }
            other => panic!("expected assert, got {other:?}"),
        }
    }

    #[test]
    fn parsing_is_deterministic() {
        let a = parse_str(BASIC).unwrap();
        let b = parse_str(BASIC).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parses_request_block_with_headers_body_and_capture() {
        let script = parse_str(
            r#"
            scenario "login" {
                request POST "/login" {
                    header "content-type" "application/json"
                    body "{\"user\":\"${USER}\"}"
                    capture session = header:set-cookie
                    capture page = body
                }
            }
            "#,
        )
        .unwrap();
        let Directive::Request(req) = &script.scenarios[0].directives[0] else {
            panic!("expected request");
        };
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.headers[0].0, "content-type");
        assert!(req.body.is_some());
        assert_eq!(req.captures.len(), 2);
        assert_eq!(req.captures[0].name, "session");
        assert_eq!(req.captures[0].field, CaptureField::Header("set-cookie".into()));
        assert_eq!(req.captures[1].field, CaptureField::Body);
    }

    #[test]
    fn parses_wait_and_ranges() {
        let script = parse_str(
            r#"
            scenario "pace" {
                request GET "/a"
                wait 500ms
                wait 100ms..2s
            }
            "#,
        )
        .unwrap();
        let dirs = &script.scenarios[0].directives;
        assert_eq!(
            dirs[1],
            Directive::Wait { min: Duration::from_millis(500), max: Duration::from_millis(500) }
        );
        assert_eq!(
            dirs[2],
            Directive::Wait { min: Duration::from_millis(100), max: Duration::from_secs(2) }
        );
    }

    #[test]
    fn parses_nested_repeat() {
        let script = parse_str(
            r#"
            scenario "poll" {
                repeat 3 {
                    request GET "/status"
                    assert status == 200
                }
            }
            "#,
        )
        .unwrap();
        let Directive::Repeat { count, body } = &script.scenarios[0].directives[0] else {
            panic!("expected repeat");
        };
        assert_eq!(*count, 3);
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn parses_header_and_latency_asserts() {
        let script = parse_str(
            r#"
            scenario "s" {
                request GET "/a"
                assert header:content-type contains "json"
                assert body matches "^\\{"
                assert latency < 250
                assert latency <= 2s
            }
            "#,
        )
        .unwrap();
        let dirs = &script.scenarios[0].directives;
        let Directive::Assert(a) = &dirs[1] else { panic!() };
        assert_eq!(a.target, AssertTarget::Header("content-type".into()));
        assert_eq!(a.op, AssertOp::Contains);
        let Directive::Assert(lat) = &dirs[4] else { panic!() };
        // Duration literals normalize to milliseconds.
        assert_eq!(lat.expected, "2000");
    }

    #[test]
    fn syntax_error_carries_position() {
        let err = parse_str("scenario \"s\" {\n  jump GET \"/x\"\n}").unwrap_err();
        match err {
            Error::Syntax { line, column, message } => {
                assert_eq!(line, 2);
                assert_eq!(column, 3);
                assert!(message.contains("jump"), "message was: {message}");
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = parse_str("scenario \"s").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn unterminated_template_marker_is_an_error() {
        let err = parse_str(r#"scenario "s" { request GET "/x/${OOPS" }"#).unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn overflowing_minute_duration_is_a_syntax_error() {
        // u64::MAX minutes does not fit in a Duration's seconds.
        let err = parse_str(r#"scenario "s" { request GET "/a" wait 18446744073709551615m }"#)
            .unwrap_err();
        assert!(
            matches!(&err, Error::Syntax { message, .. } if message.contains("out of range")),
            "got {err:?}"
        );
    }

    #[test]
    fn dollar_without_brace_stays_literal() {
        let t = parse_template("pay $5 now", 1, 1).unwrap();
        assert_eq!(t.parts, vec![TemplatePart::Literal("pay $5 now".into())]);
    }
}
