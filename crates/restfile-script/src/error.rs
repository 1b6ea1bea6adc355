//! Script error reformatting
//!
//! Interpreter errors are reported as: the 1-indexed source line, the
//! literal text of that line, and the message with rhai's position suffix
//! stripped.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static POSITION_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(line \d+, position \d+\)").unwrap());

/// A post-hook failure
#[derive(Debug, Clone)]
pub enum ScriptError {
    /// The script did not compile
    Compile {
        /// Stripped message
        message: String,
        /// 1-indexed line, when the interpreter reported one
        line: Option<usize>,
        /// Literal source text of that line
        source_line: Option<String>,
    },
    /// The script raised at runtime
    Runtime {
        /// Stripped message
        message: String,
        /// 1-indexed line, when the interpreter reported one
        line: Option<usize>,
        /// Literal source text of that line
        source_line: Option<String>,
    },
    /// The script called `fail(message)`
    Failed(String),
}

impl ScriptError {
    /// Reformat a rhai parse error against its source
    pub fn from_parse(source: &str, err: rhai::ParseError) -> Self {
        let line = err.1.line();
        ScriptError::Compile {
            message: strip_position(&err.to_string()),
            source_line: line.and_then(|n| line_of(source, n)),
            line,
        }
    }

    /// Reformat a rhai eval error against its source
    pub fn from_eval(source: &str, err: &rhai::EvalAltResult) -> Self {
        let line = err.position().line();
        ScriptError::Runtime {
            message: strip_position(&err.to_string()),
            source_line: line.and_then(|n| line_of(source, n)),
            line,
        }
    }
}

fn strip_position(message: &str) -> String {
    POSITION_SUFFIX.replace_all(message, "").trim().to_string()
}

/// 1-indexed line text
fn line_of(source: &str, line: usize) -> Option<String> {
    source
        .lines()
        .nth(line.checked_sub(1)?)
        .map(|l| l.trim().to_string())
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::Compile {
                message,
                line,
                source_line,
            }
            | ScriptError::Runtime {
                message,
                line,
                source_line,
            } => {
                write!(f, "{}", message)?;
                if let Some(line) = line {
                    write!(f, "\nline {}", line)?;
                    if let Some(text) = source_line {
                        write!(f, " -> {}", text)?;
                    }
                }
                Ok(())
            }
            ScriptError::Failed(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for ScriptError {}
