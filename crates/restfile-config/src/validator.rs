//! Post-resolve validation

use crate::types::{Request, Socket};
use restfile_core::{Error, Result};

/// Validate resolved requests and the socket block, before any network I/O
pub fn validate(requests: &[Request], socket: Option<&Socket>) -> Result<()> {
    for request in requests {
        validate_request(request)?;
    }
    if let Some(socket) = socket {
        validate_socket(socket)?;
    }
    Ok(())
}

fn validate_request(request: &Request) -> Result<()> {
    if request.url.is_empty() {
        return Err(Error::config(format!(
            "url is required for request: {}",
            request.label
        )));
    }

    if let Some(file) = &request.file {
        if file.label.is_empty() {
            return Err(Error::build(
                &request.label,
                format!("file {} has no part label", file.path),
            ));
        }
        let has_content_type = request
            .headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case("content-type"));
        if !has_content_type {
            return Err(Error::build(
                &request.label,
                "Content-Type not set for request with file",
            ));
        }
    }

    Ok(())
}

fn validate_socket(socket: &Socket) -> Result<()> {
    if socket.url.is_empty() {
        return Err(Error::config("url is required for socket"));
    }
    for name in &socket.run.order {
        if name != "noop" && !socket.playbook.contains_key(name) {
            return Err(Error::config(format!(
                "run order references unknown playbook entry: {}",
                name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FilePart, Run};
    use std::collections::BTreeMap;

    fn upload() -> Request {
        Request {
            label: "upload".to_string(),
            url: "http://localhost/upload".to_string(),
            method: "POST".to_string(),
            file: Some(FilePart {
                path: "./x.txt".to_string(),
                label: "file".to_string(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_file_requires_content_type() {
        let err = validate(&[upload()], None).unwrap_err();
        assert!(err.to_string().contains("Content-Type"));
        assert!(err.to_string().contains("upload"));
    }

    #[test]
    fn test_file_with_content_type_passes() {
        let mut request = upload();
        request.headers.insert(
            "content-type".to_string(),
            "multipart/form-data".to_string(),
        );
        assert!(validate(&[request], None).is_ok());
    }

    #[test]
    fn test_file_requires_part_label() {
        let mut request = upload();
        request.file.as_mut().unwrap().label.clear();
        let err = validate(&[request], None).unwrap_err();
        assert!(err.to_string().contains("part label"));
    }

    #[test]
    fn test_run_order_must_name_playbook_entries() {
        let socket = Socket {
            url: "ws://localhost/ws".to_string(),
            playbook: BTreeMap::from([("a".to_string(), "1".to_string())]),
            run: Run {
                order: vec!["a".to_string(), "noop".to_string(), "b".to_string()],
                delay: Default::default(),
            },
            ..Default::default()
        };
        let err = validate(&[], Some(&socket)).unwrap_err();
        assert!(err.to_string().contains("unknown playbook entry: b"));
    }
}
