//! State exposed to a post-hook invocation

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Everything one hook invocation can see
#[derive(Debug, Clone, Default, Serialize)]
pub struct HookContext {
    /// Label of the request that triggered the hook
    pub label: String,
    /// The request as it went out
    pub req: RequestState,
    /// The response as it came back
    pub res: ResponseState,
}

/// Request side of the hook context
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestState {
    /// Effective URL
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Query parameters
    pub query: BTreeMap<String, String>,
    /// Declared headers
    pub headers: BTreeMap<String, String>,
    /// Wire body
    pub body: String,
    /// Rendered request text
    pub dump: String,
    /// The declared expectation echoed back, when one was set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expect: Option<Value>,
}

/// Response side of the hook context
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResponseState {
    /// Status code
    pub status: u16,
    /// Response headers; repeated names keep the last value
    pub headers: BTreeMap<String, String>,
    /// Response body text
    pub body: String,
    /// Cookies from the active jar for the request URL
    pub cookies: BTreeMap<String, String>,
    /// Full response dump
    pub dump: String,
}
