//! Per-invocation rhai engine

use crate::context::HookContext;
use crate::error::ScriptError;
use rhai::{Dynamic, Engine, Scope};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// What a hook produced
#[derive(Debug, Clone, Default)]
pub struct HookOutput {
    /// The `exports` map as the script left it
    pub exports: BTreeMap<String, Value>,
    /// The script's final expression, when it was not unit
    pub output: Option<String>,
}

/// Run a post-hook in a fresh engine.
///
/// Nothing survives between invocations: the engine, the scope, and the
/// exports table are all built here and torn down on return.
pub fn run_hook(source: &str, ctx: &HookContext) -> Result<HookOutput, ScriptError> {
    let failed: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let engine = build_engine(failed.clone());

    let ast = engine
        .compile(source)
        .map_err(|e| ScriptError::from_parse(source, e))?;

    let mut scope = Scope::new();
    scope.push("label", ctx.label.clone());
    scope.push_dynamic("req", to_dynamic_or_unit(&ctx.req));
    scope.push_dynamic("res", to_dynamic_or_unit(&ctx.res));
    scope.push("exports", rhai::Map::new());

    let result = engine.eval_ast_with_scope::<Dynamic>(&mut scope, &ast);

    let value = match result {
        Ok(value) => value,
        Err(err) => {
            // fail() surfaces as a runtime error; the recorded message wins
            if let Some(message) = failed.lock().expect("fail cell poisoned").take() {
                return Err(ScriptError::Failed(message));
            }
            return Err(ScriptError::from_eval(source, &err));
        }
    };

    let exports = scope
        .get_value::<rhai::Map>("exports")
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let json = rhai::serde::from_dynamic::<Value>(&value)
                .unwrap_or_else(|_| Value::String(value.to_string()));
            (key.to_string(), json)
        })
        .collect();

    Ok(HookOutput {
        exports,
        output: (!value.is_unit()).then(|| value.to_string()),
    })
}

fn build_engine(failed: Arc<Mutex<Option<String>>>) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_expr_depths(64, 32);
    engine.set_max_operations(100_000);
    engine.set_max_string_size(1024 * 1024);
    engine.set_max_array_size(10_000);
    engine.set_max_map_size(10_000);

    engine.register_fn("fail", move |message: &str| -> Result<(), Box<rhai::EvalAltResult>> {
        *failed.lock().expect("fail cell poisoned") = Some(message.to_string());
        Err(message.to_string().into())
    });

    engine.register_fn("base64_encode", |s: &str| -> String {
        use base64::{engine::general_purpose, Engine as _};
        general_purpose::STANDARD.encode(s.as_bytes())
    });

    engine.register_fn("base64_decode", |s: &str| -> String {
        use base64::{engine::general_purpose, Engine as _};
        general_purpose::STANDARD
            .decode(s.as_bytes())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_default()
    });

    engine.register_fn("uuid", || -> String { uuid::Uuid::new_v4().to_string() });

    engine.register_fn("log_debug", |msg: &str| {
        debug!(script_log = msg);
    });
    engine.register_fn("log_info", |msg: &str| {
        tracing::info!(script_log = msg);
    });
    engine.register_fn("log_warn", |msg: &str| {
        warn!(script_log = msg);
    });

    engine
}

fn to_dynamic_or_unit<T: serde::Serialize>(value: &T) -> Dynamic {
    rhai::serde::to_dynamic(value).unwrap_or(Dynamic::UNIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RequestState, ResponseState};
    use serde_json::json;

    fn ctx() -> HookContext {
        HookContext {
            label: "login".to_string(),
            req: RequestState {
                url: "http://localhost/login".to_string(),
                method: "POST".to_string(),
                body: "user=admin".to_string(),
                ..Default::default()
            },
            res: ResponseState {
                status: 200,
                body: r#"{"token":"abc"}"#.to_string(),
                cookies: BTreeMap::from([("session".to_string(), "s1".to_string())]),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_exports_read_back() {
        let out = run_hook(
            r#"
            exports.status = res.status;
            exports.session = res.cookies.session;
            "#,
            &ctx(),
        )
        .unwrap();
        assert_eq!(out.exports["status"], json!(200));
        assert_eq!(out.exports["session"], json!("s1"));
    }

    #[test]
    fn test_invocations_are_independent() {
        let first = run_hook("exports.a = 1;", &ctx()).unwrap();
        let second = run_hook("exports.b = 2;", &ctx()).unwrap();
        assert!(first.exports.contains_key("a"));
        assert!(!second.exports.contains_key("a"));
        assert!(second.exports.contains_key("b"));
    }

    #[test]
    fn test_fail_is_distinct_from_runtime_error() {
        let err = run_hook(r#"fail("bad token");"#, &ctx()).unwrap_err();
        assert!(matches!(err, ScriptError::Failed(ref m) if m == "bad token"));

        let err = run_hook("undefined_variable", &ctx()).unwrap_err();
        assert!(matches!(err, ScriptError::Runtime { .. }));
    }

    #[test]
    fn test_runtime_error_carries_line_and_source() {
        let source = "let x = 1;\nnope(x);";
        let err = run_hook(source, &ctx()).unwrap_err();
        match err {
            ScriptError::Runtime {
                line, source_line, ..
            } => {
                assert_eq!(line, Some(2));
                assert_eq!(source_line.as_deref(), Some("nope(x);"));
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    #[test]
    fn test_request_state_visible() {
        let out = run_hook("exports.m = req.method;", &ctx()).unwrap();
        assert_eq!(out.exports["m"], json!("POST"));
    }

    #[test]
    fn test_final_expression_is_output() {
        let out = run_hook(r#"res.status.to_string()"#, &ctx()).unwrap();
        assert_eq!(out.output.as_deref(), Some("200"));

        let out = run_hook("exports.a = 1;", &ctx()).unwrap();
        assert!(out.output.is_none());
    }

    #[test]
    fn test_helpers_registered() {
        let out = run_hook(r#"exports.b = base64_encode("hi");"#, &ctx()).unwrap();
        assert_eq!(out.exports["b"], json!("aGk="));
    }
}
