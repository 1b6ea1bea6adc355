//! Expression evaluation and placeholder substitution
//!
//! A field that accepts an expression decodes as either a literal value or
//! one of the function forms (`env`, `read`, `json`, `tmpl`, `form`).
//! Literal strings and `json` text additionally get ambient `{{name}}`
//! substitution from the evaluation context.

use once_cell::sync::Lazy;
use regex::Regex;
use restfile_core::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Named placeholder: `{{ident}}`, dotted paths allowed for `locals.` /
/// `exports.` prefixes
static NAMED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}").unwrap());

/// Indexed placeholder: `{{$N}}`, only meaningful inside `tmpl`
static INDEXED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\$(\d+)\}\}").unwrap());

/// One field expression as written in a restfile.
///
/// A table that is not one of the function forms fails to decode outright,
/// so a misspelled form is a decode error with source context rather than a
/// silently accepted literal.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expr {
    /// `{ env = "NAME" }`: OS environment value, empty string when unset
    Env {
        /// Variable name
        env: String,
    },
    /// `{ read = "path" }`: file contents, error when unreadable
    Read {
        /// Path, `~/` expands to the home directory
        read: String,
    },
    /// `{ json = "text" }`: parsed JSON value, error when malformed
    Json {
        /// JSON text, substituted before parsing
        json: String,
    },
    /// `{ tmpl = "template", values = [..] | {..} }`: placeholder fill
    Tmpl {
        /// Template text with `{{name}}` or `{{$N}}` markers
        tmpl: String,
        /// Positional or named replacement values
        values: TmplValues,
    },
    /// `{ form = { k = "v" } }`: URL-encoded string
    Form {
        /// Form fields
        form: BTreeMap<String, String>,
    },
    /// Literal string; gets ambient substitution
    Str(String),
    /// Literal number
    Num(serde_json::Number),
    /// Literal boolean
    Bool(bool),
    /// Literal list; JSON-encoded on the wire
    List(Vec<Value>),
}

/// Replacement values for `tmpl`: a list fills `{{$N}}`, a map fills
/// `{{name}}`. Anything else fails to decode.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TmplValues {
    /// Positional values for `{{$N}}`
    Positional(Vec<Value>),
    /// Named values for `{{name}}`
    Named(BTreeMap<String, Value>),
}

impl Expr {
    /// Evaluate against `ctx`, producing a structured value
    pub fn eval(&self, ctx: &Context) -> Result<Value> {
        match self {
            Expr::Env { env } => Ok(Value::String(std::env::var(env).unwrap_or_default())),
            Expr::Read { read } => {
                let path = expand_home(read);
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| Error::config(format!("read({}): {}", read, e)))?;
                Ok(Value::String(text))
            }
            Expr::Json { json } => {
                let text = ctx.substitute(json);
                serde_json::from_str(&text)
                    .map_err(|e| Error::config(format!("invalid JSON: {}", e)))
            }
            Expr::Tmpl { tmpl, values } => Ok(Value::String(fill_template(tmpl, values))),
            Expr::Form { form } => {
                let mut ser = form_urlencoded::Serializer::new(String::new());
                for (k, v) in form {
                    ser.append_pair(k, v);
                }
                Ok(Value::String(ser.finish()))
            }
            Expr::Str(s) => Ok(Value::String(ctx.substitute(s))),
            Expr::Num(n) => Ok(Value::Number(n.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::List(items) => Ok(Value::Array(items.clone())),
        }
    }

    /// Evaluate to the literal string used on the wire: strings pass
    /// through, null becomes empty, everything else is JSON-encoded
    pub fn eval_string(&self, ctx: &Context) -> Result<String> {
        Ok(value_to_string(&self.eval(ctx)?))
    }
}

/// Render a value as wire text
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Fill `{{name}}` / `{{$N}}` markers in a template from supplied values.
/// Unresolved markers stay verbatim.
fn fill_template(template: &str, values: &TmplValues) -> String {
    match values {
        TmplValues::Positional(list) => INDEXED
            .replace_all(template, |caps: &regex::Captures<'_>| {
                let index: usize = caps[1].parse().unwrap_or(usize::MAX);
                match list.get(index) {
                    Some(v) => value_to_string(v),
                    None => caps[0].to_string(),
                }
            })
            .into_owned(),
        TmplValues::Named(map) => NAMED
            .replace_all(template, |caps: &regex::Captures<'_>| match map.get(&caps[1]) {
                Some(v) => value_to_string(v),
                None => caps[0].to_string(),
            })
            .into_owned(),
    }
}

/// The ambient evaluation context: file locals plus exports accumulated
/// from post-hooks during a sequential run.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Once-computed named values from the `[locals]` block
    pub locals: BTreeMap<String, Value>,
    /// Values exported by post-hooks so far
    pub exports: BTreeMap<String, Value>,
}

impl Context {
    /// Context with the given locals and no exports
    pub fn new(locals: BTreeMap<String, Value>) -> Self {
        Self {
            locals,
            exports: BTreeMap::new(),
        }
    }

    /// Merge a hook's exports, overwriting earlier keys
    pub fn merge_exports(&mut self, exports: BTreeMap<String, Value>) {
        self.exports.extend(exports);
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        if let Some(rest) = name.strip_prefix("locals.") {
            return self.locals.get(rest);
        }
        if let Some(rest) = name.strip_prefix("exports.") {
            return self.exports.get(rest);
        }
        self.locals.get(name).or_else(|| self.exports.get(name))
    }

    /// Replace every resolvable `{{name}}` marker; unresolved markers are
    /// left verbatim, never an error
    pub fn substitute(&self, input: &str) -> String {
        NAMED
            .replace_all(input, |caps: &regex::Captures<'_>| match self.lookup(&caps[1]) {
                Some(v) => value_to_string(v),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// True when `input` still carries an `{{exports.*}}` marker, i.e. a
    /// forward reference to a response that has not run yet
    pub fn has_export_ref(input: &str) -> bool {
        NAMED
            .captures_iter(input)
            .any(|caps| caps[1].starts_with("exports."))
    }
}
