//! CGI response decoding: the header block and body an application writes to STDOUT.

use super::error::{Error, Result};

use std::collections::HashMap;

const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

pub const DEFAULT_STATUS: u16 = 200;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub status_code: u16,
    /// Includes the `Status` pseudo-header when the application sent one.
    pub headers: HashMap<String, String>,
    pub stdout: String,
    pub stderr: String,
    pub app_status: u32,
    pub protocol_status: u8,
}

impl Response {
    /// Split STDOUT on the first blank line. A response without one cannot be interpreted, so
    /// that is an error rather than a guess.
    pub fn parse(stdout: &[u8]) -> Result<Response> {
        let split = stdout
            .windows(HEADER_SEPARATOR.len())
            .position(|window| window == HEADER_SEPARATOR)
            .ok_or(Error::MissingHeaderSeparator)?;

        // Header lines are ISO-8859-1, which maps each byte to the same code point.
        let head: String = stdout[..split].iter().map(|&b| b as char).collect();
        let headers = parse_headers(&head);
        let status_code = headers
            .get("Status")
            .and_then(|value| status_code(value))
            .unwrap_or(DEFAULT_STATUS);

        Ok(Response {
            status_code,
            headers,
            stdout: String::from_utf8_lossy(&stdout[split + HEADER_SEPARATOR.len()..])
                .into_owned(),
            stderr: String::new(),
            app_status: 0,
            protocol_status: 0,
        })
    }
}

fn parse_headers(head: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for line in head.split("\r\n") {
        let (name, value) = match line.split_once(':') {
            Some(pair) => pair,
            None => continue,
        };
        headers.insert(name.to_owned(), value.trim_start().to_owned());
    }
    headers
}

fn status_code(value: &str) -> Option<u16> {
    let code = value.get(..3)?;
    if code.bytes().all(|b| b.is_ascii_digit()) {
        code.parse().ok()
    } else {
        None
    }
}
