//! Typed restfile blocks
//!
//! The `*Spec` types are the raw serde decode of a block; `Request` and
//! `Socket` are the resolved forms with every expression evaluated.

use crate::expr::{value_to_string, Context, Expr};
use restfile_core::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Run-wide policy from the `[config]` block. Created once, immutable for
/// the run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Surface redirect responses instead of following them
    pub no_follow_redirect: bool,
    /// Disable the shared cookie jar
    pub no_cookies: bool,
    /// Skip TLS certificate verification (opt-in)
    pub insecure_no_verify_tls: bool,
    /// User-Agent header for every request and the socket handshake
    pub user_agent: String,
    /// WebSocket dial timeout
    #[serde(with = "humantime_serde")]
    pub socket_dial_timeout: Duration,
    /// Maximum entries kept in the REPL history
    pub repl_history_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            no_follow_redirect: false,
            no_cookies: false,
            insecure_no_verify_tls: false,
            user_agent: concat!("restfile/", env!("CARGO_PKG_VERSION")).to_string(),
            socket_dial_timeout: Duration::from_secs(45),
            repl_history_limit: 1000,
        }
    }
}

/// Raw decode of one `[[request]]` block
#[derive(Debug, Clone, Deserialize)]
pub struct RequestSpec {
    /// Unique label, the request's key
    pub label: String,
    /// Target URL expression
    pub url: Option<Expr>,
    /// HTTP method; GET is filled in after inheritance
    pub method: Option<String>,
    /// Body expression
    pub body: Option<Expr>,
    /// Header name → value expression
    #[serde(default)]
    pub headers: BTreeMap<String, Expr>,
    /// Cookie name → value expression
    #[serde(default)]
    pub cookies: BTreeMap<String, Expr>,
    /// Query parameter name → value expression
    #[serde(default)]
    pub query: BTreeMap<String, Expr>,
    /// Pause before this request is sent
    #[serde(default, with = "humantime_serde")]
    pub delay: Option<Duration>,
    /// Declared expectation: bare status or structured
    pub expect: Option<ExpectSpec>,
    /// Post-hook script source
    pub post_hook: Option<String>,
    /// Label of the request to inherit unset fields from
    pub copy_from: Option<String>,
    /// Multipart file part reference
    pub file: Option<FilePart>,
}

/// Bare status integer or the structured `{status, body, headers}` form
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExpectSpec {
    /// Legacy single status: `expect = 200`
    Status(u16),
    /// Structured expectation
    Full {
        /// Expected status code
        status: Option<u16>,
        /// Expected exact body
        body: Option<Expr>,
        /// Expected header values
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

/// A file to send as a multipart form part
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FilePart {
    /// Path to the file, read at build time
    pub path: String,
    /// Form part name
    pub label: String,
}

impl RequestSpec {
    /// Evaluate every field expression against `ctx`
    pub fn resolve(&self, ctx: &Context, index: usize) -> Result<Request> {
        let (expect, expect_status) = match &self.expect {
            None => (None, None),
            Some(ExpectSpec::Status(status)) => (None, Some(*status)),
            Some(ExpectSpec::Full {
                status,
                body,
                headers,
            }) => {
                let body = body.as_ref().map(|b| b.eval_string(ctx)).transpose()?;
                (
                    Some(Expectation {
                        status: *status,
                        body,
                        headers: headers.clone(),
                    }),
                    None,
                )
            }
        };

        Ok(Request {
            label: self.label.clone(),
            index,
            url: match &self.url {
                Some(url) => url.eval_string(ctx)?,
                None => String::new(),
            },
            method: self.method.clone().unwrap_or_default(),
            body: match &self.body {
                Some(body) => body.eval_string(ctx)?,
                None => String::new(),
            },
            headers: eval_map(&self.headers, ctx)?,
            cookies: eval_map(&self.cookies, ctx)?,
            query: eval_map(&self.query, ctx)?,
            delay: self.delay,
            expect,
            expect_status,
            post_hook: self.post_hook.clone(),
            copy_from: self.copy_from.clone(),
            file: self.file.clone(),
        })
    }
}

fn eval_map(map: &BTreeMap<String, Expr>, ctx: &Context) -> Result<BTreeMap<String, String>> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), v.eval_string(ctx)?)))
        .collect()
}

/// A fully resolved request, ready for the executor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    /// Unique label
    pub label: String,
    /// Declaration index in the file
    pub index: usize,
    /// Target URL
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Wire body text
    pub body: String,
    /// Header map
    pub headers: BTreeMap<String, String>,
    /// Cookie map
    pub cookies: BTreeMap<String, String>,
    /// Query parameter map
    pub query: BTreeMap<String, String>,
    /// Pause before sending
    pub delay: Option<Duration>,
    /// Structured expectation; takes precedence over `expect_status`
    pub expect: Option<Expectation>,
    /// Legacy bare expected status
    pub expect_status: Option<u16>,
    /// Post-hook script source
    pub post_hook: Option<String>,
    /// Inheritance parent label
    pub copy_from: Option<String>,
    /// Multipart file part
    pub file: Option<FilePart>,
}

/// A declared assertion about the response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expectation {
    /// Expected status code
    pub status: Option<u16>,
    /// Expected exact body
    pub body: Option<String>,
    /// Header name → expected value; at least one observed value per key
    /// must equal it
    pub headers: BTreeMap<String, String>,
}

impl Request {
    /// Fill every field still at its zero value from `parent`.
    /// Explicitly-set child fields are preserved; maps merge child-wins.
    pub fn merge_from(&mut self, parent: &Request) {
        if self.url.is_empty() {
            self.url = parent.url.clone();
        }
        if self.method.is_empty() {
            self.method = parent.method.clone();
        }
        if self.body.is_empty() {
            self.body = parent.body.clone();
        }
        merge_map(&mut self.headers, &parent.headers);
        merge_map(&mut self.cookies, &parent.cookies);
        merge_map(&mut self.query, &parent.query);
        if self.delay.is_none() {
            self.delay = parent.delay;
        }
        if self.expect.is_none() && self.expect_status.is_none() {
            self.expect = parent.expect.clone();
            self.expect_status = parent.expect_status;
        }
        if self.post_hook.is_none() {
            self.post_hook = parent.post_hook.clone();
        }
        if self.file.is_none() {
            self.file = parent.file.clone();
        }
    }

    /// Fill defaults left open after inheritance
    pub fn set_defaults(&mut self) {
        if self.method.is_empty() {
            self.method = "GET".to_string();
        }
    }

    /// Re-substitute ambient placeholders, folding in exports that arrived
    /// after decode. Substitution leaves unresolved markers verbatim, so
    /// this is safe to apply once per execution.
    pub fn substituted(&self, ctx: &Context) -> Request {
        let mut req = self.clone();
        req.url = ctx.substitute(&req.url);
        req.body = ctx.substitute(&req.body);
        for value in req
            .headers
            .values_mut()
            .chain(req.cookies.values_mut())
            .chain(req.query.values_mut())
        {
            *value = ctx.substitute(value);
        }
        if let Some(expect) = &mut req.expect {
            if let Some(body) = &mut expect.body {
                *body = ctx.substitute(body);
            }
            for value in expect.headers.values_mut() {
                *value = ctx.substitute(value);
            }
        }
        req
    }

    /// True when any field still references `{{exports.*}}`
    pub fn has_export_ref(&self) -> bool {
        Context::has_export_ref(&self.url)
            || Context::has_export_ref(&self.body)
            || self
                .headers
                .values()
                .chain(self.cookies.values())
                .chain(self.query.values())
                .any(|v| Context::has_export_ref(v))
            || self.expect.as_ref().is_some_and(|expect| {
                expect.body.as_deref().is_some_and(Context::has_export_ref)
                    || expect.headers.values().any(|v| Context::has_export_ref(v))
            })
    }

    /// Echo of the declared expectation handed to post-hooks
    pub fn expect_echo(&self) -> Option<Value> {
        if let Some(expect) = &self.expect {
            let headers: serde_json::Map<String, Value> = expect
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            return Some(serde_json::json!({
                "status": expect.status,
                "body": expect.body,
                "headers": headers,
            }));
        }
        self.expect_status
            .map(|status| serde_json::json!({ "status": status }))
    }
}

fn merge_map(child: &mut BTreeMap<String, String>, parent: &BTreeMap<String, String>) {
    for (k, v) in parent {
        child.entry(k.clone()).or_insert_with(|| v.clone());
    }
}

/// Raw decode of the `[socket]` block
#[derive(Debug, Clone, Deserialize)]
pub struct SocketSpec {
    /// WebSocket URL expression
    pub url: Option<Expr>,
    /// Optional Origin header expression
    pub origin: Option<Expr>,
    /// Handshake header name → value expression
    #[serde(default)]
    pub headers: BTreeMap<String, Expr>,
    /// Cookie name → value expression
    #[serde(default)]
    pub cookies: BTreeMap<String, Expr>,
    /// Named payloads
    #[serde(default)]
    pub playbook: BTreeMap<String, Expr>,
    /// Ordered run of playbook entries
    pub run: Option<RunSpec>,
    /// Disable the REPL's `quit`/`exit`/`ls` special commands
    #[serde(default)]
    pub no_special_cmds: bool,
}

/// Raw decode of `[socket.run]`
#[derive(Debug, Clone, Deserialize)]
pub struct RunSpec {
    /// Playbook entry names; `"noop"` is a pure pacing step
    #[serde(default)]
    pub order: Vec<String>,
    /// Pause between every step
    #[serde(default, with = "humantime_serde")]
    pub delay: Option<Duration>,
}

impl SocketSpec {
    /// Evaluate every field expression against `ctx`
    pub fn resolve(&self, ctx: &Context) -> Result<Socket> {
        let url = match &self.url {
            Some(url) => url.eval_string(ctx)?,
            None => return Err(Error::config("url is required for socket")),
        };
        let playbook = self
            .playbook
            .iter()
            .map(|(name, expr)| {
                // non-string payloads go over the wire JSON-encoded
                Ok((name.clone(), value_to_string(&expr.eval(ctx)?)))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Socket {
            url,
            origin: self
                .origin
                .as_ref()
                .map(|origin| origin.eval_string(ctx))
                .transpose()?,
            headers: eval_map(&self.headers, ctx)?,
            cookies: eval_map(&self.cookies, ctx)?,
            playbook,
            run: Run {
                order: self.run.as_ref().map(|r| r.order.clone()).unwrap_or_default(),
                delay: self.run.as_ref().and_then(|r| r.delay).unwrap_or_default(),
            },
            no_special_cmds: self.no_special_cmds,
        })
    }
}

/// The resolved WebSocket session description
#[derive(Debug, Clone, Default)]
pub struct Socket {
    /// WebSocket URL
    pub url: String,
    /// Optional Origin header
    pub origin: Option<String>,
    /// Handshake headers
    pub headers: BTreeMap<String, String>,
    /// Cookies sent with the handshake
    pub cookies: BTreeMap<String, String>,
    /// Named payloads
    pub playbook: BTreeMap<String, String>,
    /// Ordered playbook run
    pub run: Run,
    /// Disable REPL special commands
    pub no_special_cmds: bool,
}

/// Ordered playbook run with pacing
#[derive(Debug, Clone, Default)]
pub struct Run {
    /// Entry names in send order
    pub order: Vec<String>,
    /// Pause between every step, including around no-ops
    pub delay: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent() -> Request {
        Request {
            label: "base".to_string(),
            url: "http://localhost/api".to_string(),
            method: "POST".to_string(),
            body: "{}".to_string(),
            headers: BTreeMap::from([
                ("Authorization".to_string(), "Bearer t".to_string()),
                ("Accept".to_string(), "application/json".to_string()),
            ]),
            expect_status: Some(200),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_fills_unset_fields() {
        let mut child = Request {
            label: "child".to_string(),
            copy_from: Some("base".to_string()),
            ..Default::default()
        };
        child.merge_from(&parent());
        child.set_defaults();

        assert_eq!(child.url, "http://localhost/api");
        assert_eq!(child.method, "POST");
        assert_eq!(child.body, "{}");
        assert_eq!(child.expect_status, Some(200));
        assert_eq!(child.headers.len(), 2);
    }

    #[test]
    fn test_merge_preserves_explicit_child_fields() {
        let mut child = Request {
            label: "child".to_string(),
            method: "DELETE".to_string(),
            headers: BTreeMap::from([("Accept".to_string(), "text/plain".to_string())]),
            expect_status: Some(204),
            ..Default::default()
        };
        child.merge_from(&parent());

        assert_eq!(child.method, "DELETE");
        assert_eq!(child.expect_status, Some(204));
        // child header wins, parent-only header still merged in
        assert_eq!(child.headers["Accept"], "text/plain");
        assert_eq!(child.headers["Authorization"], "Bearer t");
    }

    #[test]
    fn test_structured_expect_blocks_legacy_inherit() {
        let mut child = Request {
            label: "child".to_string(),
            expect: Some(Expectation {
                status: Some(201),
                ..Default::default()
            }),
            ..Default::default()
        };
        child.merge_from(&parent());
        assert_eq!(child.expect_status, None);
        assert_eq!(child.expect.as_ref().unwrap().status, Some(201));
    }

    #[test]
    fn test_default_method_applied_after_merge() {
        let mut req = Request::default();
        req.set_defaults();
        assert_eq!(req.method, "GET");
    }

    #[test]
    fn test_substituted_folds_exports() {
        let mut ctx = Context::default();
        ctx.merge_exports(BTreeMap::from([(
            "token".to_string(),
            serde_json::json!("abc"),
        )]));
        let req = Request {
            url: "http://localhost/{{exports.token}}".to_string(),
            headers: BTreeMap::from([(
                "Authorization".to_string(),
                "Bearer {{exports.token}}".to_string(),
            )]),
            ..Default::default()
        };
        let substituted = req.substituted(&ctx);
        assert_eq!(substituted.url, "http://localhost/abc");
        assert_eq!(substituted.headers["Authorization"], "Bearer abc");
        assert!(req.has_export_ref());
        assert!(!substituted.has_export_ref());
    }
}
