//! Sequential run orchestration
//!
//! Requests run strictly in declaration order on one logical task. Each
//! request's exports fold into the shared context before the next request
//! is finalized, so later expressions can reference earlier responses.

use restfile_client::Client;
use restfile_config::RestFile;
use restfile_core::{Error, Result};
use restfile_socket::{Mode, Session};
use std::path::Path;
use tracing::error;

async fn load(path: &Path, concurrent_resolve: bool) -> Result<RestFile> {
    if concurrent_resolve {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        restfile_config::load_from_str_concurrent(&content).await
    } else {
        restfile_config::load_from_file(path)
    }
}

/// Run every request in the file, folding exports between them
pub async fn run_file(path: &Path, ignore_failures: bool, concurrent_resolve: bool) -> Result<()> {
    let restfile = load(path, concurrent_resolve).await?;
    let client = Client::new(&restfile.config)?;
    let mut ctx = restfile.context.clone();

    for request in &restfile.requests {
        let request = request.substituted(&ctx);
        match client.execute(&request).await {
            Ok(outcome) => {
                ctx.merge_exports(outcome.exports);
                if !outcome.report.is_empty() {
                    println!("{}", outcome.report);
                }
            }
            Err(e) if ignore_failures && e.is_per_request() => {
                error!("{}", e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Run the single request with this label
pub async fn run_label(path: &Path, label: &str) -> Result<()> {
    let restfile = restfile_config::load_from_file(path)?;
    let request = restfile.request(label)?;
    run_one(&restfile, request).await
}

/// Run the single request at this declaration index
pub async fn run_index(path: &Path, index: usize) -> Result<()> {
    let restfile = restfile_config::load_from_file(path)?;
    let request = restfile.request_by_index(index)?;
    run_one(&restfile, request).await
}

async fn run_one(restfile: &RestFile, request: &restfile_config::Request) -> Result<()> {
    let client = Client::new(&restfile.config)?;
    let request = request.substituted(&restfile.context);
    let outcome = client.execute(&request).await?;
    if !outcome.report.is_empty() {
        println!("{}", outcome.report);
    }
    Ok(())
}

/// Open the file's WebSocket session in the mode the argument selects
pub async fn run_socket(path: &Path, entry: Option<&str>) -> Result<()> {
    let restfile = restfile_config::load_from_file(path)?;
    let socket = restfile
        .socket
        .ok_or_else(|| Error::config("no socket in file"))?;
    let session = Session::new(socket, restfile.config);
    session.run(Mode::from_arg(entry)).await
}
