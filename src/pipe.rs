//! One direction of a proxied exchange: frame a message on one side, optionally decode it for
//! the log, and forward its exact bytes to the other side.

use super::error::{Phase, Result};
use super::framer::{read_request, read_response};
use super::lowlevel::{write_records, Record};
use super::request::Request;
use super::response::Response;
use super::s11n::RecordType;

use tokio::io::{AsyncRead, AsyncWrite};

use std::fmt;

const PREVIEW_LEN: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    fn read_phase(self) -> Phase {
        match self {
            Direction::Request => Phase::ReadRequest,
            Direction::Response => Phase::ReadResponse,
        }
    }

    fn write_phase(self) -> Phase {
        match self {
            Direction::Request => Phase::WriteRequest,
            Direction::Response => Phase::WriteResponse,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Direction::Request => "request",
            Direction::Response => "response",
        })
    }
}

/// Turns a framed message into a human-readable summary for the log. Only ever sees the
/// records; it cannot change what gets forwarded.
pub trait MessageDecoder: Send + Sync {
    fn decode(&self, records: &[Record]) -> Result<String>;
}

/// Summarizes the environment and body of a request.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestDecoder;

impl MessageDecoder for RequestDecoder {
    fn decode(&self, records: &[Record]) -> Result<String> {
        let request = Request::decode(records)?;
        Ok(format!(
            "id={} role={:?} keep_conn={} env={:?} stdin={} bytes {:?}",
            request.request_id,
            request.begin.role,
            request.begin.keep_conn,
            request.env,
            request.stdin.len(),
            preview(&request.stdin),
        ))
    }
}

/// Summarizes the CGI status, headers and exit status of a response.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResponseDecoder;

impl MessageDecoder for ResponseDecoder {
    fn decode(&self, records: &[Record]) -> Result<String> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut end = None;
        for record in records {
            match record.kind() {
                Some(RecordType::Stdout) => stdout.extend_from_slice(record.content()),
                Some(RecordType::Stderr) => stderr.extend_from_slice(record.content()),
                Some(RecordType::EndRequest) => end = Some(record.end_request_body()?),
                _ => (),
            }
        }

        let rsp = Response::parse(&stdout)?;
        let mut headers: Vec<_> = rsp.headers.iter().collect();
        headers.sort();
        let mut summary = format!(
            "status={} headers={:?} stdout={} bytes stderr={:?}",
            rsp.status_code,
            headers,
            rsp.stdout.len(),
            preview(&stderr),
        );
        if let Some(end) = end {
            summary.push_str(&format!(
                " app_status={} protocol_status={:?}",
                end.app_status,
                end.status()
            ));
        }
        Ok(summary)
    }
}

fn preview(bytes: &[u8]) -> String {
    let shown = &bytes[..bytes.len().min(PREVIEW_LEN)];
    let mut out = String::from_utf8_lossy(shown).into_owned();
    if shown.len() < bytes.len() {
        out.push_str("...");
    }
    out
}

/// One line per record for the raw log. END_REQUEST shows its statuses and hides the reserved
/// bytes; the forwarded bytes are never touched.
pub fn describe(records: &[Record]) -> String {
    let parts: Vec<String> = records
        .iter()
        .map(|record| match record.kind() {
            Some(RecordType::EndRequest) => match record.end_request_body() {
                Ok(end) => format!(
                    "EndRequest(app_status={}, protocol_status={})",
                    end.app_status, end.protocol_status
                ),
                Err(_) => format!("EndRequest({} bytes)", record.content().len()),
            },
            Some(kind) => format!("{:?}({} bytes)", kind, record.content().len()),
            None => format!(
                "Type{}({} bytes)",
                record.header().record_type,
                record.content().len()
            ),
        })
        .collect();
    parts.join(", ")
}

pub struct Pipe {
    direction: Direction,
    decoder: Option<Box<dyn MessageDecoder>>,
}

impl Pipe {
    pub fn new(direction: Direction) -> Pipe {
        Pipe {
            direction,
            decoder: None,
        }
    }

    pub fn with_decoder<D: MessageDecoder + 'static>(mut self, decoder: D) -> Pipe {
        self.decoder = Some(Box::new(decoder));
        self
    }

    /// Frame one message from `from`, log it, and write its exact bytes to `to`.
    pub async fn run<R, W>(&self, conn: u64, from: &mut R, to: &mut W) -> Result<Vec<Record>>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let dir = self.direction;
        let records = match dir {
            Direction::Request => read_request(from).await,
            Direction::Response => read_response(from).await,
        }
        .map_err(|e| e.in_phase(dir.read_phase()))?;

        debug!("[{}] {} read raw: {}", conn, dir, describe(&records));

        if let Some(decoder) = &self.decoder {
            match decoder.decode(&records) {
                Ok(summary) => info!("[{}] decoded {}: {}", conn, dir, summary),
                Err(e) => warn!("[{}] cannot decode {}: {}", conn, dir, e),
            }
        }

        debug!("[{}] writing back {}", conn, dir);
        write_records(to, &records)
            .await
            .map_err(|e| e.in_phase(dir.write_phase()))?;
        Ok(records)
    }
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Pipe")
            .field("direction", &self.direction)
            .field("decoding", &self.decoder.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::pairs::{encode_pair_block, Params};
    use crate::s11n::{ProtocolStatus, Role};
    use crate::stream::StreamWriter;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    fn request_records() -> Vec<Record> {
        let mut env = Params::new();
        env.insert("CONTENT_LENGTH".to_owned(), "3".to_owned());
        env.insert("REQUEST_METHOD".to_owned(), "POST".to_owned());
        let mut records = vec![Record::begin_request(1, Role::Responder, false)];
        records.extend(
            StreamWriter::new(RecordType::Params, 1).records(&encode_pair_block(&env).unwrap()),
        );
        records.extend(StreamWriter::new(RecordType::Stdin, 1).records(b"a=1"));
        records
    }

    fn wire(records: &[Record]) -> Vec<u8> {
        let mut out = bytes::BytesMut::new();
        for record in records {
            record.encode(&mut out);
        }
        out.to_vec()
    }

    struct Recording(Arc<Mutex<Vec<usize>>>);

    impl MessageDecoder for Recording {
        fn decode(&self, records: &[Record]) -> Result<String> {
            self.0.lock().unwrap().push(records.len());
            Err(Error::MissingHeaderSeparator)
        }
    }

    #[test]
    fn request_summary() {
        let summary = RequestDecoder.decode(&request_records()).unwrap();
        assert!(summary.contains("REQUEST_METHOD"));
        assert!(summary.contains("POST"));
        assert!(summary.contains("stdin=3 bytes"));
    }

    #[test]
    fn response_summary() {
        let records = vec![
            Record::new(RecordType::Stdout, 1, b"Status: 404 Not Found\r\n\r\nnope").unwrap(),
            Record::end_request(1, 0, ProtocolStatus::RequestComplete),
        ];
        let summary = ResponseDecoder.decode(&records).unwrap();
        assert!(summary.starts_with("status=404"));
        assert!(summary.contains("protocol_status=Some(RequestComplete)"));
    }

    #[test]
    fn describe_hides_end_request_reserved_bytes() {
        let end = Record::end_request(1, 7, ProtocolStatus::Overloaded);
        assert_eq!(
            "Stdout(2 bytes), EndRequest(app_status=7, protocol_status=2)",
            describe(&[Record::new(RecordType::Stdout, 1, b"hi").unwrap(), end])
        );
    }

    #[tokio::test]
    async fn forwards_exact_bytes_even_when_decoding_fails() {
        let records = request_records();
        let input = wire(&records);

        let calls = Arc::new(Mutex::new(Vec::new()));
        let pipe = Pipe::new(Direction::Request).with_decoder(Recording(Arc::clone(&calls)));
        let mut from = Cursor::new(input);
        let mut to = Vec::new();
        let forwarded = pipe.run(1, &mut from, &mut to).await.unwrap();

        // begin, params, empty params, stdin: CONTENT_LENGTH is satisfied before the
        // terminator arrives.
        assert_eq!(4, forwarded.len());
        assert_eq!(wire(&records[..4]), to);
        assert_eq!(vec![4], *calls.lock().unwrap());
    }

    #[tokio::test]
    async fn framing_failure_forwards_nothing() {
        let pipe = Pipe::new(Direction::Request);
        let mut from = Cursor::new(vec![1u8, 5, 0, 1, 0, 0, 0, 0]);
        let mut to = Vec::new();
        match pipe.run(1, &mut from, &mut to).await {
            Err(Error::UnexpectedRecord { .. }) => (),
            other => panic!("unexpected {:?}", other),
        }
        assert!(to.is_empty());
    }
}
