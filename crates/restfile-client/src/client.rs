//! The per-run HTTP client

use crate::verify;
use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use reqwest::{Method, Url};
use restfile_config::{Config, Request};
use restfile_core::{Error, ResponseDump, Result};
use restfile_script::{HookContext, RequestState, ResponseState};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Result of one executed request
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    /// What to show the operator: the response dump, or the hook's final
    /// expression when a post-hook ran
    pub report: String,
    /// Exports the post-hook produced
    pub exports: BTreeMap<String, Value>,
}

/// One reqwest client per run, holding the shared cookie jar and the
/// run-wide policy.
#[derive(Debug)]
pub struct Client {
    http: reqwest::Client,
    jar: Option<Arc<reqwest::cookie::Jar>>,
}

impl Client {
    /// Build the client from run policy. Redirect-following, the cookie
    /// jar, and TLS verification are fixed here for the whole run.
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());

        let jar = if config.no_cookies {
            None
        } else {
            let jar = Arc::new(reqwest::cookie::Jar::default());
            builder = builder.cookie_provider(jar.clone());
            Some(jar)
        };

        if config.no_follow_redirect {
            builder = builder.redirect(reqwest::redirect::Policy::none());
        }
        if config.insecure_no_verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| Error::config(format!("failed to build http client: {}", e)))?;

        Ok(Self { http, jar })
    }

    /// Execute one request: delay, build, send, then verify or run the
    /// post-hook. A transport failure aborts this request only.
    pub async fn execute(&self, request: &Request) -> Result<Outcome> {
        if let Some(delay) = request.delay {
            debug!(label = %request.label, ?delay, "delaying request");
            tokio::time::sleep(delay).await;
        }

        let builder = self.build(request).await?;
        let response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                Error::build(&request.label, e.to_string())
            } else {
                Error::Transport(e.to_string())
            }
        })?;

        let final_url = response.url().clone();
        let dump = read_dump(response).await?;

        if let Some(hook) = &request.post_hook {
            let ctx = self.hook_context(request, &final_url, &dump);
            let out = restfile_script::run_hook(hook, &ctx)
                .map_err(|e| Error::Script(e.to_string()))?;
            return Ok(Outcome {
                report: out.output.unwrap_or_default(),
                exports: out.exports,
            });
        }

        verify::check_expectation(request, &dump)?;
        Ok(Outcome {
            report: dump.to_string(),
            exports: BTreeMap::new(),
        })
    }

    async fn build(&self, request: &Request) -> Result<reqwest::RequestBuilder> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| Error::build(&request.label, format!("invalid method: {}", request.method)))?;
        let url = Url::parse(&request.url)
            .map_err(|e| Error::build(&request.label, format!("invalid url {}: {}", request.url, e)))?;

        let mut builder = self.http.request(method, url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        let multipart = request.file.is_some();
        for (name, value) in &request.headers {
            // the boundary form's Content-Type replaces the declared one
            if multipart && name.eq_ignore_ascii_case("content-type") {
                continue;
            }
            builder = builder.header(name, value);
        }

        if !request.cookies.is_empty() {
            let cookie = request
                .cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(reqwest::header::COOKIE, cookie);
        }

        if let Some(file) = &request.file {
            let bytes = tokio::fs::read(&file.path)
                .await
                .map_err(|e| Error::build(&request.label, format!("read {}: {}", file.path, e)))?;
            let file_name = Path::new(&file.path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.path.clone());
            let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
            builder = builder.multipart(reqwest::multipart::Form::new().part(file.label.clone(), part));
        } else if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        Ok(builder)
    }

    fn hook_context(&self, request: &Request, url: &Url, dump: &ResponseDump) -> HookContext {
        let cookies = self
            .jar
            .as_ref()
            .and_then(|jar| jar.cookies(url))
            .map(|header| parse_cookie_header(&header))
            .unwrap_or_default();

        let request_dump = {
            let headers = request
                .headers
                .iter()
                .map(|(name, value)| format!("{}: {}", name, value))
                .collect::<Vec<_>>()
                .join("\n");
            format!("{} {}\n{}\n\n{}", request.method, url, headers, request.body)
        };

        HookContext {
            label: request.label.clone(),
            req: RequestState {
                url: url.to_string(),
                method: request.method.clone(),
                query: request.query.clone(),
                headers: request.headers.clone(),
                body: request.body.clone(),
                dump: request_dump,
                expect: request.expect_echo(),
            },
            res: ResponseState {
                status: dump.status,
                headers: dump
                    .headers
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect(),
                body: dump.body.clone(),
                cookies,
                dump: dump.to_string(),
            },
        }
    }
}

async fn read_dump(response: reqwest::Response) -> Result<ResponseDump> {
    let version = format!("{:?}", response.version());
    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    let body = response
        .text()
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;

    Ok(ResponseDump {
        version,
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or_default().to_string(),
        headers,
        body,
    })
}

fn parse_cookie_header(header: &HeaderValue) -> BTreeMap<String, String> {
    header
        .to_str()
        .unwrap_or_default()
        .split("; ")
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}
