//! Per-iteration execution context.
//!
//! Each virtual user builds a fresh [`ExecutionContext`] for every scenario
//! iteration; it is never shared across tasks or iterations. Captured
//! response fields live in a stack of scopes — repeat bodies push a scope on
//! entry to each sub-iteration and pop it on exit, so captures cannot leak
//! between sub-iterations or outlive the body.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::script::{Template, TemplatePart};

#[derive(Debug)]
pub struct ExecutionContext {
    /// Environment bindings, frozen at compile time.
    env: Arc<HashMap<String, String>>,
    /// Capture scopes, innermost last.
    scopes: Vec<HashMap<String, String>>,
}

impl ExecutionContext {
    pub fn new(env: Arc<HashMap<String, String>>) -> Self {
        ExecutionContext { env, scopes: vec![HashMap::new()] }
    }

    /// Enter a repeat sub-iteration scope.
    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Leave a repeat sub-iteration scope, discarding its captures.
    pub fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot pop the root scope");
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Store a captured response field in the innermost scope.
    pub fn capture(&mut self, name: &str, value: String) {
        self.scopes
            .last_mut()
            .expect("context always has a root scope")
            .insert(name.to_string(), value);
    }

    /// Innermost-scope-first lookup, falling back to the environment.
    pub fn get(&self, name: &str) -> Option<&str> {
        for scope in self.scopes.iter().rev() {
            if let Some(v) = scope.get(name) {
                return Some(v.as_str());
            }
        }
        self.env.get(name).map(String::as_str)
    }

    /// Substitute every `${NAME}` marker in the template.
    ///
    /// The compiler already proved each name resolvable, so a miss here means
    /// the engine's own bookkeeping broke — an internal error, fatal to the
    /// run, never a per-step failure.
    pub fn render(&self, template: &Template) -> Result<String> {
        let mut out = String::new();
        for part in &template.parts {
            match part {
                TemplatePart::Literal(s) => out.push_str(s),
                TemplatePart::Var(name) => match self.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(Error::Internal(format!(
                            "variable `${{{name}}}` vanished at runtime despite static resolution"
                        )));
                    }
                },
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;
    use crate::script::Directive;

    fn template(url: &str) -> Template {
        let script = parse_str(&format!(r#"scenario "s" {{ request GET "{url}" }}"#)).unwrap();
        match &script.scenarios[0].directives[0] {
            Directive::Request(req) => req.url.clone(),
            _ => unreachable!(),
        }
    }

    fn ctx(pairs: &[(&str, &str)]) -> ExecutionContext {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ExecutionContext::new(Arc::new(env))
    }

    #[test]
    fn renders_env_and_literal_parts() {
        let ctx = ctx(&[("BASE", "http://api.test")]);
        let out = ctx.render(&template("${BASE}/users")).unwrap();
        assert_eq!(out, "http://api.test/users");
    }

    #[test]
    fn captures_shadow_environment() {
        let mut ctx = ctx(&[("id", "env-id")]);
        ctx.capture("id", "captured-id".into());
        assert_eq!(ctx.get("id"), Some("captured-id"));
    }

    #[test]
    fn popped_scope_discards_captures() {
        let mut ctx = ctx(&[]);
        ctx.push_scope();
        ctx.capture("inner", "x".into());
        assert_eq!(ctx.get("inner"), Some("x"));
        ctx.pop_scope();
        assert_eq!(ctx.get("inner"), None);
    }

    #[test]
    fn inner_scope_shadows_outer() {
        let mut ctx = ctx(&[]);
        ctx.capture("v", "outer".into());
        ctx.push_scope();
        ctx.capture("v", "inner".into());
        assert_eq!(ctx.get("v"), Some("inner"));
        ctx.pop_scope();
        assert_eq!(ctx.get("v"), Some("outer"));
    }

    #[test]
    fn runtime_miss_is_internal_error() {
        let ctx = ctx(&[]);
        let err = ctx.render(&template("${GONE}")).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
