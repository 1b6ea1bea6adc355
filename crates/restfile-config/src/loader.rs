//! Restfile loading
//!
//! Structural decode is plain serde over TOML; every decode error from toml
//! carries source-line context. Expression evaluation happens field by field
//! against the growing context, then inheritance and validation run over the
//! resolved requests.

use crate::expr::{Context, Expr};
use crate::types::{Config, Request, RequestSpec, Socket, SocketSpec};
use crate::validator;
use restfile_core::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level structure of a restfile
#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    locals: BTreeMap<String, Expr>,
    #[serde(default)]
    config: Config,
    #[serde(default, rename = "request")]
    requests: Vec<RequestSpec>,
    socket: Option<SocketSpec>,
}

/// A decoded, resolved, validated restfile
#[derive(Debug, Clone)]
pub struct RestFile {
    /// Run-wide policy
    pub config: Config,
    /// Evaluation context seeded with the file's locals
    pub context: Context,
    /// Requests with inheritance applied; sequential loads keep declaration
    /// order, concurrent loads keep arrival order
    pub requests: Vec<Request>,
    /// The socket session, when the file declares one
    pub socket: Option<Socket>,
}

impl RestFile {
    /// Find a request by label
    pub fn request(&self, label: &str) -> Result<&Request> {
        self.requests
            .iter()
            .find(|r| r.label == label)
            .ok_or_else(|| Error::config(format!("request label not found: {}", label)))
    }

    /// Find a request by declaration index
    pub fn request_by_index(&self, index: usize) -> Result<&Request> {
        self.requests
            .iter()
            .find(|r| r.index == index)
            .ok_or_else(|| Error::config(format!("request block not found: {}", index)))
    }
}

/// Load and resolve a restfile from disk
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<RestFile> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::config(format!("file {} does not exist", path.display()))
        } else {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        }
    })?;
    load_from_str(&content)
}

/// Load and resolve a restfile from a string, sequentially
pub fn load_from_str(content: &str) -> Result<RestFile> {
    let doc = decode(content)?;
    let ctx = eval_locals(&doc.locals)?;

    let mut requests = Vec::with_capacity(doc.requests.len());
    for (index, spec) in doc.requests.iter().enumerate() {
        requests.push(spec.resolve(&ctx, index)?);
    }

    finish(doc, ctx, requests)
}

/// Load and resolve a restfile with request blocks resolved in parallel
/// tasks, collected in arrival order.
///
/// Forward references are incompatible with this mode: a resolved request
/// that still carries an `{{exports.*}}` placeholder is a hard error, not a
/// silent fallback to sequential resolution.
pub async fn load_from_str_concurrent(content: &str) -> Result<RestFile> {
    let doc = decode(content)?;
    let ctx = eval_locals(&doc.locals)?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    for (index, spec) in doc.requests.iter().cloned().enumerate() {
        let tx = tx.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            // receiver gone means another block already failed the load
            let _ = tx.send(spec.resolve(&ctx, index));
        });
    }
    drop(tx);

    let mut requests = Vec::with_capacity(doc.requests.len());
    while let Some(resolved) = rx.recv().await {
        let request = resolved?;
        if request.has_export_ref() {
            return Err(Error::config(format!(
                "request \"{}\" has an exports reference but blocks are resolved concurrently",
                request.label
            )));
        }
        requests.push(request);
    }
    tracing::debug!(count = requests.len(), "resolved request blocks concurrently");

    finish(doc, ctx, requests)
}

fn decode(content: &str) -> Result<Document> {
    let doc: Document = toml::from_str(content)
        .map_err(|e| Error::config(format!("failed to parse restfile:\n{}", e)))?;

    let mut seen = Vec::new();
    for spec in &doc.requests {
        if seen.contains(&&spec.label) {
            return Err(Error::config(format!(
                "labels must be unique: \"{}\" already exists",
                spec.label
            )));
        }
        seen.push(&spec.label);
    }
    Ok(doc)
}

/// Evaluate locals one by one; earlier (sorted-key) locals are visible to
/// later ones through normal substitution.
fn eval_locals(locals: &BTreeMap<String, Expr>) -> Result<Context> {
    let mut ctx = Context::default();
    for (name, expr) in locals {
        let value: Value = expr.eval(&ctx)?;
        ctx.locals.insert(name.clone(), value);
    }
    Ok(ctx)
}

fn finish(doc: Document, ctx: Context, requests: Vec<Request>) -> Result<RestFile> {
    let mut requests = apply_inheritance(requests)?;
    for request in &mut requests {
        request.set_defaults();
    }

    let socket = doc.socket.as_ref().map(|s| s.resolve(&ctx)).transpose()?;
    validator::validate(&requests, socket.as_ref())?;

    Ok(RestFile {
        config: doc.config,
        context: ctx,
        requests,
        socket,
    })
}

/// Resolve every `copy_from` chain. Each parent is fully resolved before its
/// children merge from it, so the result does not depend on declaration
/// order; cycles are a decode error.
fn apply_inheritance(requests: Vec<Request>) -> Result<Vec<Request>> {
    let by_label: BTreeMap<String, Request> = requests
        .iter()
        .map(|r| (r.label.clone(), r.clone()))
        .collect();
    let mut memo = BTreeMap::new();

    requests
        .into_iter()
        .map(|request| {
            let label = request.label.clone();
            let mut stack = Vec::new();
            resolve_chain(&label, &by_label, &mut memo, &mut stack)
        })
        .collect()
}

fn resolve_chain(
    label: &str,
    by_label: &BTreeMap<String, Request>,
    memo: &mut BTreeMap<String, Request>,
    stack: &mut Vec<String>,
) -> Result<Request> {
    if let Some(done) = memo.get(label) {
        return Ok(done.clone());
    }
    if stack.iter().any(|l| l == label) {
        return Err(Error::config(format!("copy_from cycle involving: {}", label)));
    }

    let mut request = by_label
        .get(label)
        .cloned()
        .ok_or_else(|| Error::config(format!("request label not found: {}", label)))?;

    if let Some(parent_label) = request.copy_from.clone() {
        if !by_label.contains_key(&parent_label) {
            return Err(Error::config(format!(
                "request \"{}\" copy_from not found: {}",
                label, parent_label
            )));
        }
        stack.push(label.to_string());
        let parent = resolve_chain(&parent_label, by_label, memo, stack)?;
        stack.pop();
        request.merge_from(&parent);
    }

    memo.insert(label.to_string(), request.clone());
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = r#"
[locals]
host = "http://localhost:8080"

[config]
no_follow_redirect = true
user_agent = "test-agent"

[[request]]
label = "login"
url = "{{host}}/login"
method = "POST"
body = { form = { user = "admin" } }
headers = { Content-Type = "application/x-www-form-urlencoded" }
expect = 200

[[request]]
label = "me"
copy_from = "login"
url = "{{host}}/me"
"#;

    #[test]
    fn test_load_basic() {
        let file = load_from_str(BASIC).unwrap();
        assert!(file.config.no_follow_redirect);
        assert_eq!(file.config.user_agent, "test-agent");
        assert_eq!(file.requests.len(), 2);

        let login = file.request("login").unwrap();
        assert_eq!(login.url, "http://localhost:8080/login");
        assert_eq!(login.body, "user=admin");
        assert_eq!(login.expect_status, Some(200));

        // inherited from login, explicit url preserved
        let me = file.request("me").unwrap();
        assert_eq!(me.url, "http://localhost:8080/me");
        assert_eq!(me.method, "POST");
        assert_eq!(me.headers["Content-Type"], "application/x-www-form-urlencoded");
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let content = r#"
[[request]]
label = "a"
url = "http://localhost/1"

[[request]]
label = "a"
url = "http://localhost/2"
"#;
        let err = load_from_str(content).unwrap_err();
        assert!(err.to_string().contains("labels must be unique"));
    }

    #[test]
    fn test_missing_copy_from_target() {
        let content = r#"
[[request]]
label = "child"
url = "http://localhost"
copy_from = "ghost"
"#;
        let err = load_from_str(content).unwrap_err();
        assert!(err.to_string().contains("copy_from not found: ghost"));
        assert!(err.to_string().contains("child"));
    }

    #[test]
    fn test_missing_url_names_label() {
        let content = r#"
[[request]]
label = "nowhere"
method = "GET"
"#;
        let err = load_from_str(content).unwrap_err();
        assert!(err.to_string().contains("url is required"));
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_chained_inheritance_regardless_of_order() {
        // grandchild declared before its ancestors
        let content = r#"
[[request]]
label = "grandchild"
copy_from = "child"
expect = 204

[[request]]
label = "child"
copy_from = "base"
method = "PUT"

[[request]]
label = "base"
url = "http://localhost/api"
method = "POST"
body = "x"
"#;
        let file = load_from_str(content).unwrap();
        let grandchild = file.request("grandchild").unwrap();
        assert_eq!(grandchild.url, "http://localhost/api");
        assert_eq!(grandchild.method, "PUT");
        assert_eq!(grandchild.body, "x");
        assert_eq!(grandchild.expect_status, Some(204));
    }

    #[test]
    fn test_copy_from_cycle_rejected() {
        let content = r#"
[[request]]
label = "a"
url = "http://localhost"
copy_from = "b"

[[request]]
label = "b"
url = "http://localhost"
copy_from = "a"
"#;
        let err = load_from_str(content).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_declaration_order_preserved() {
        let content = r#"
[[request]]
label = "z"
url = "http://localhost/1"

[[request]]
label = "a"
url = "http://localhost/2"
"#;
        let file = load_from_str(content).unwrap();
        let labels: Vec<_> = file.requests.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["z", "a"]);
        assert_eq!(file.requests[1].index, 1);
    }

    #[test]
    fn test_socket_block() {
        let content = r#"
[socket]
url = "ws://localhost:8080/ws"
origin = "http://localhost:8080"

[socket.playbook]
hello = '{"type":"hello"}'
count = { json = "[1, 2]" }

[socket.run]
order = ["hello", "noop", "count"]
delay = "250ms"
"#;
        let file = load_from_str(content).unwrap();
        let socket = file.socket.unwrap();
        assert_eq!(socket.url, "ws://localhost:8080/ws");
        assert_eq!(socket.playbook["hello"], r#"{"type":"hello"}"#);
        assert_eq!(socket.playbook["count"], "[1,2]");
        assert_eq!(socket.run.order, vec!["hello", "noop", "count"]);
        assert_eq!(socket.run.delay, std::time::Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_concurrent_resolve_collects_all_blocks() {
        let content = r#"
[[request]]
label = "a"
url = "http://localhost/1"

[[request]]
label = "b"
url = "http://localhost/2"

[[request]]
label = "c"
url = "http://localhost/3"
"#;
        let file = load_from_str_concurrent(content).await.unwrap();
        assert_eq!(file.requests.len(), 3);
        let mut labels: Vec<_> = file.requests.iter().map(|r| r.label.clone()).collect();
        labels.sort();
        assert_eq!(labels, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_concurrent_resolve_rejects_forward_reference() {
        let content = r#"
[[request]]
label = "login"
url = "http://localhost/login"

[[request]]
label = "me"
url = "http://localhost/me"
headers = { Authorization = "Bearer {{exports.token}}" }
"#;
        let err = load_from_str_concurrent(content).await.unwrap_err();
        assert!(err.to_string().contains("resolved concurrently"));
        assert!(err.to_string().contains("me"));

        // the same file is fine sequentially
        assert!(load_from_str(content).is_ok());
    }
}
