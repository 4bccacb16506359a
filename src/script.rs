//! Abstract syntax tree for `.lf` scripts.
//!
//! Everything here is plain data produced by the [`parser`](crate::parser) and
//! consumed by the [`compiler`](crate::compiler). Templates keep their
//! `${NAME}` markers unresolved; name resolution is a compile-time concern and
//! substitution happens at execution time against the live
//! [`ExecutionContext`](crate::context::ExecutionContext).

use std::fmt;
use std::time::Duration;

/// A parsed script: an ordered list of scenario blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub scenarios: Vec<Scenario>,
}

/// One named scenario block. Directive order is significant and preserved
/// through compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub name: String,
    pub directives: Vec<Directive>,
    /// Line of the `scenario` keyword, for diagnostics.
    pub line: usize,
}

/// One instruction inside a scenario. Closed set, handled exhaustively by the
/// compiler and the execution engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Request(RequestDirective),
    Assert(AssertDirective),
    Wait { min: Duration, max: Duration },
    Repeat { count: u64, body: Vec<Directive> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestDirective {
    pub method: Method,
    pub url: Template,
    pub headers: Vec<(String, Template)>,
    pub body: Option<Template>,
    /// Response fields to store into the execution context after the request
    /// completes, keyed by the capture name.
    pub captures: Vec<Capture>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub name: String,
    pub field: CaptureField,
}

/// Which field of the response a capture binds.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureField {
    Status,
    Body,
    Header(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssertDirective {
    pub target: AssertTarget,
    pub op: AssertOp,
    pub expected: String,
    pub line: usize,
}

/// Named response field an assertion inspects.
#[derive(Debug, Clone, PartialEq)]
pub enum AssertTarget {
    Status,
    Body,
    Latency,
    Header(String),
}

impl fmt::Display for AssertTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssertTarget::Status => write!(f, "status"),
            AssertTarget::Body => write!(f, "body"),
            AssertTarget::Latency => write!(f, "latency"),
            AssertTarget::Header(name) => write!(f, "header:{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertOp {
    Eq,
    Contains,
    Matches,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for AssertOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssertOp::Eq => "==",
            AssertOp::Contains => "contains",
            AssertOp::Matches => "matches",
            AssertOp::Lt => "<",
            AssertOp::Le => "<=",
            AssertOp::Gt => ">",
            AssertOp::Ge => ">=",
        };
        write!(f, "{s}")
    }
}

/// Supported HTTP methods. Anything else is a syntax error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "DELETE" => Some(Method::Delete),
            "PATCH" => Some(Method::Patch),
            "HEAD" => Some(Method::Head),
            "OPTIONS" => Some(Method::Options),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A string with `${NAME}` substitution markers split out lexically.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub parts: Vec<TemplatePart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Literal(String),
    Var(String),
}

impl Template {
    /// A template with no substitution markers.
    pub fn literal(s: impl Into<String>) -> Self {
        Template {
            parts: vec![TemplatePart::Literal(s.into())],
        }
    }

    /// Names of every `${NAME}` marker, in order of appearance.
    pub fn var_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            TemplatePart::Var(name) => Some(name.as_str()),
            TemplatePart::Literal(_) => None,
        })
    }
}

impl fmt::Display for Template {
    /// Reassembles the source form, markers included.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            match part {
                TemplatePart::Literal(s) => f.write_str(s)?,
                TemplatePart::Var(name) => write!(f, "${{{name}}}")?,
            }
        }
        Ok(())
    }
}
