//! Response dump rendering

use std::fmt;

/// A captured response: status line, headers, body.
///
/// This is the primary result of a verified request and the `res.dump` value
/// a post-hook sees.
#[derive(Debug, Clone, Default)]
pub struct ResponseDump {
    /// HTTP version, e.g. "HTTP/1.1"
    pub version: String,
    /// Numeric status code
    pub status: u16,
    /// Canonical reason phrase, if known
    pub reason: String,
    /// Header pairs in arrival order; repeated names appear repeatedly
    pub headers: Vec<(String, String)>,
    /// Response body as text
    pub body: String,
}

impl ResponseDump {
    /// All values observed for a header, case-insensitive on the name
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

impl fmt::Display for ResponseDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {} {}", self.version, self.status, self.reason)?;
        for (name, value) in &self.headers {
            writeln!(f, "{}: {}", name, value)?;
        }
        if !self.body.is_empty() {
            writeln!(f)?;
            write!(f, "{}", self.body)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump() -> ResponseDump {
        ResponseDump {
            version: "HTTP/1.1".to_string(),
            status: 200,
            reason: "OK".to_string(),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Set-Cookie".to_string(), "a=1".to_string()),
                ("Set-Cookie".to_string(), "b=2".to_string()),
            ],
            body: "{\"ok\":true}".to_string(),
        }
    }

    #[test]
    fn test_render_contains_status_line_and_body() {
        let rendered = dump().to_string();
        assert!(rendered.starts_with("HTTP/1.1 200 OK"));
        assert!(rendered.contains("Content-Type: application/json"));
        assert!(rendered.ends_with("{\"ok\":true}"));
    }

    #[test]
    fn test_header_values_repeated_and_case_insensitive() {
        let d = dump();
        assert_eq!(d.header_values("set-cookie"), vec!["a=1", "b=2"]);
        assert!(d.header_values("X-Missing").is_empty());
    }
}
