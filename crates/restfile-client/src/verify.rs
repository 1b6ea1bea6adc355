//! Expectation verification
//!
//! Checks run status → body → headers and short-circuit on the first
//! mismatch. A failure is not a transport error: the response arrived, it
//! just did not satisfy the declaration, so the full dump rides along.

use restfile_config::Request;
use restfile_core::{ExpectationFailure, ResponseDump};

/// Verify `dump` against the request's declared expectation.
///
/// The structured `expect` block takes precedence over the legacy bare
/// status.
pub fn check_expectation(request: &Request, dump: &ResponseDump) -> Result<(), ExpectationFailure> {
    if let Some(expect) = &request.expect {
        if let Some(status) = expect.status {
            check_status(request, dump, status)?;
        }
        if let Some(body) = &expect.body {
            if body != &dump.body {
                return Err(failure(
                    request,
                    dump,
                    format!("unexpected response body {} != {}", body, dump.body),
                ));
            }
        }
        for (name, expected) in &expect.headers {
            let values = dump.header_values(name);
            if values.is_empty() {
                return Err(failure(
                    request,
                    dump,
                    format!("required response header \"{}\" not present", name),
                ));
            }
            if !values.iter().any(|v| v == expected) {
                // quote the last observed value, the common single-value case
                let last = values.last().copied().unwrap_or_default();
                return Err(failure(
                    request,
                    dump,
                    format!(
                        "unexpected response header [{}] {} != {}",
                        name, expected, last
                    ),
                ));
            }
        }
    } else if let Some(status) = request.expect_status {
        check_status(request, dump, status)?;
    }
    Ok(())
}

fn check_status(
    request: &Request,
    dump: &ResponseDump,
    expected: u16,
) -> Result<(), ExpectationFailure> {
    if dump.status != expected {
        return Err(failure(
            request,
            dump,
            format!("unexpected response status {} != {}", expected, dump.status),
        ));
    }
    Ok(())
}

fn failure(request: &Request, dump: &ResponseDump, message: String) -> ExpectationFailure {
    ExpectationFailure {
        label: request.label.clone(),
        message,
        dump: dump.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use restfile_config::{Expectation, Request};
    use std::collections::BTreeMap;

    fn dump(status: u16) -> ResponseDump {
        ResponseDump {
            version: "HTTP/1.1".to_string(),
            status,
            reason: String::new(),
            headers: vec![
                ("content-type".to_string(), "text/plain".to_string()),
                ("x-multi".to_string(), "one".to_string()),
                ("x-multi".to_string(), "two".to_string()),
            ],
            body: "hello".to_string(),
        }
    }

    #[test]
    fn test_legacy_status_mismatch_reports_both_values() {
        let request = Request {
            label: "r".to_string(),
            expect_status: Some(200),
            ..Default::default()
        };
        let err = check_expectation(&request, &dump(201)).unwrap_err();
        assert!(err.message.contains("200"));
        assert!(err.message.contains("201"));
        assert_eq!(err.dump.status, 201);
    }

    #[test]
    fn test_structured_takes_precedence_over_legacy() {
        let request = Request {
            label: "r".to_string(),
            expect: Some(Expectation {
                status: Some(201),
                ..Default::default()
            }),
            // unreachable: decode never produces both, but precedence holds
            expect_status: Some(500),
            ..Default::default()
        };
        assert!(check_expectation(&request, &dump(201)).is_ok());
    }

    #[test]
    fn test_body_must_match_exactly() {
        let request = Request {
            label: "r".to_string(),
            expect: Some(Expectation {
                body: Some("hello ".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = check_expectation(&request, &dump(200)).unwrap_err();
        assert!(err.message.contains("unexpected response body"));
        assert!(err.message.contains("hello"));
    }

    #[test]
    fn test_header_absent_fails_not_present() {
        let request = Request {
            label: "r".to_string(),
            expect: Some(Expectation {
                headers: BTreeMap::from([("X-Missing".to_string(), "v".to_string())]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = check_expectation(&request, &dump(200)).unwrap_err();
        assert!(err.message.contains("not present"));
        assert!(err.message.contains("X-Missing"));
    }

    #[test]
    fn test_header_any_value_matches() {
        let request = Request {
            label: "r".to_string(),
            expect: Some(Expectation {
                headers: BTreeMap::from([("x-multi".to_string(), "one".to_string())]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(check_expectation(&request, &dump(200)).is_ok());
    }

    #[test]
    fn test_header_mismatch_quotes_last_observed_value() {
        let request = Request {
            label: "r".to_string(),
            expect: Some(Expectation {
                headers: BTreeMap::from([("x-multi".to_string(), "three".to_string())]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = check_expectation(&request, &dump(200)).unwrap_err();
        assert!(err.message.contains("three != two"));
    }

    #[test]
    fn test_status_checked_before_body() {
        let request = Request {
            label: "r".to_string(),
            expect: Some(Expectation {
                status: Some(200),
                body: Some("nope".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = check_expectation(&request, &dump(500)).unwrap_err();
        assert!(err.message.contains("unexpected response status"));
    }

    #[test]
    fn test_no_expectation_passes() {
        let request = Request {
            label: "r".to_string(),
            ..Default::default()
        };
        assert!(check_expectation(&request, &dump(500)).is_ok());
    }
}
