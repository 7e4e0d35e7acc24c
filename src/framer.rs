//! Finding the end of one logical request or response in a record stream that carries no
//! overall length.
//!
//! A request ends once its STDIN stream is done: either the number of STDIN bytes announced
//! by `CONTENT_LENGTH` has arrived, or an empty STDIN record closes the stream, whichever
//! comes first. A response ends at its END_REQUEST record, or at end of stream.

use super::error::{Error, Result};
use super::lowlevel::{read_record, Record};
use super::pairs::decode_pair_block;
use super::request::content_length;
use super::s11n::RecordType;

use bytes::BytesMut;
use tokio::io::AsyncRead;

pub trait Framer {
    /// Feed the next record. Returns `true` once the message is complete.
    fn push(&mut self, record: &Record) -> Result<bool>;

    /// Called when the stream ends before `push` returned `true`.
    fn at_eof(&self) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    AwaitingBegin,
    AwaitingParams,
    AwaitingStdin { expected: usize, received: usize },
    Complete,
}

#[derive(Debug)]
pub struct RequestFramer {
    state: RequestState,
    params: BytesMut,
}

impl RequestFramer {
    pub fn new() -> RequestFramer {
        RequestFramer {
            state: RequestState::AwaitingBegin,
            params: BytesMut::new(),
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }
}

impl Default for RequestFramer {
    fn default() -> RequestFramer {
        RequestFramer::new()
    }
}

impl Framer for RequestFramer {
    fn push(&mut self, record: &Record) -> Result<bool> {
        use self::RequestState::*;

        self.state = match self.state {
            AwaitingBegin => {
                if !record.is(RecordType::BeginRequest) {
                    return Err(Error::UnexpectedRecord {
                        expected: "BeginRequest",
                        got: format!("{:?}", record),
                    });
                }
                AwaitingParams
            }
            Complete => {
                return Err(Error::UnexpectedRecord {
                    expected: "end of request",
                    got: format!("{:?}", record),
                });
            }
            _ if record.is(RecordType::AbortRequest) => {
                debug!("request aborted by the client");
                Complete
            }
            AwaitingParams if record.is(RecordType::Params) => {
                if record.is_empty() {
                    let env = decode_pair_block(&self.params)?;
                    let expected = content_length(&env);
                    debug!("done reading params; expecting {} bytes of stdin", expected);
                    AwaitingStdin {
                        expected,
                        received: 0,
                    }
                } else {
                    self.params.extend_from_slice(record.content());
                    AwaitingParams
                }
            }
            AwaitingStdin { expected, received } if record.is(RecordType::Stdin) => {
                let received = received + record.content().len();
                if record.is_empty() || (expected > 0 && received >= expected) {
                    debug!("done reading stdin: {} of {} bytes", received, expected);
                    Complete
                } else {
                    AwaitingStdin { expected, received }
                }
            }
            state => {
                debug!("passing {:?} through while {:?}", record, state);
                state
            }
        };

        Ok(self.state == Complete)
    }

    fn at_eof(&self) -> Result<()> {
        match self.state {
            RequestState::Complete => Ok(()),
            state => {
                debug!("stream ended while {:?}", state);
                Err(Error::IncompleteMessage)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseState {
    AwaitingEnd,
    Complete,
}

#[derive(Debug)]
pub struct ResponseFramer {
    state: ResponseState,
}

impl ResponseFramer {
    pub fn new() -> ResponseFramer {
        ResponseFramer {
            state: ResponseState::AwaitingEnd,
        }
    }

    pub fn state(&self) -> ResponseState {
        self.state
    }
}

impl Default for ResponseFramer {
    fn default() -> ResponseFramer {
        ResponseFramer::new()
    }
}

impl Framer for ResponseFramer {
    fn push(&mut self, record: &Record) -> Result<bool> {
        if self.state == ResponseState::Complete {
            return Err(Error::UnexpectedRecord {
                expected: "end of response",
                got: format!("{:?}", record),
            });
        }
        if record.is(RecordType::EndRequest) {
            self.state = ResponseState::Complete;
        }
        Ok(self.state == ResponseState::Complete)
    }

    fn at_eof(&self) -> Result<()> {
        Ok(())
    }
}

/// Read records until `framer` says the message is complete. Never reads past the last record
/// of the message, so the stream stays usable for whatever follows.
pub async fn read_message<R, F>(reader: &mut R, framer: &mut F) -> Result<Vec<Record>>
where
    R: AsyncRead + Unpin + ?Sized,
    F: Framer + ?Sized,
{
    let mut records = Vec::new();
    loop {
        match read_record(reader).await? {
            Some(record) => {
                let done = framer.push(&record)?;
                records.push(record);
                if done {
                    return Ok(records);
                }
            }
            None => {
                framer.at_eof()?;
                return Ok(records);
            }
        }
    }
}

pub async fn read_request<R>(reader: &mut R) -> Result<Vec<Record>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    read_message(reader, &mut RequestFramer::new()).await
}

pub async fn read_response<R>(reader: &mut R) -> Result<Vec<Record>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    read_message(reader, &mut ResponseFramer::new()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lowlevel::write_records;
    use crate::pairs::{encode_pair_block, Params};
    use crate::s11n::{ProtocolStatus, Role};
    use crate::stream::StreamWriter;
    use std::io::Cursor;

    fn params_records(pairs: &[(&str, &str)]) -> Vec<Record> {
        let env: Params = pairs
            .iter()
            .map(|&(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        StreamWriter::new(RecordType::Params, 1).records(&encode_pair_block(&env).unwrap())
    }

    fn stdin(content: &[u8]) -> Record {
        Record::new(RecordType::Stdin, 1, content).unwrap()
    }

    async fn wire(records: &[Record]) -> Cursor<Vec<u8>> {
        let mut out = Vec::new();
        write_records(&mut out, records).await.unwrap();
        Cursor::new(out)
    }

    #[test]
    fn request_states() {
        let mut framer = RequestFramer::new();
        assert_eq!(RequestState::AwaitingBegin, framer.state());

        assert!(!framer.push(&Record::begin_request(1, Role::Responder, false)).unwrap());
        assert_eq!(RequestState::AwaitingParams, framer.state());

        for record in params_records(&[("CONTENT_LENGTH", "6")]) {
            assert!(!framer.push(&record).unwrap());
        }
        assert_eq!(
            RequestState::AwaitingStdin { expected: 6, received: 0 },
            framer.state()
        );

        assert!(!framer.push(&stdin(b"abc")).unwrap());
        assert_eq!(
            RequestState::AwaitingStdin { expected: 6, received: 3 },
            framer.state()
        );
        assert!(framer.push(&stdin(b"def")).unwrap());
        assert_eq!(RequestState::Complete, framer.state());
        assert!(framer.at_eof().is_ok());
        assert!(framer.push(&stdin(&[])).is_err());
    }

    #[test]
    fn first_record_must_begin() {
        let mut framer = RequestFramer::new();
        match framer.push(&stdin(b"x")) {
            Err(Error::UnexpectedRecord { expected, .. }) => assert_eq!("BeginRequest", expected),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_stdin_ends_before_content_length() {
        let mut framer = RequestFramer::new();
        framer.push(&Record::begin_request(1, Role::Responder, false)).unwrap();
        for record in params_records(&[("CONTENT_LENGTH", "100")]) {
            framer.push(&record).unwrap();
        }
        assert!(!framer.push(&stdin(b"short")).unwrap());
        assert!(framer.push(&stdin(&[])).unwrap());
    }

    #[test]
    fn abort_completes_the_request() {
        let mut framer = RequestFramer::new();
        framer.push(&Record::begin_request(1, Role::Responder, false)).unwrap();
        let abort = Record::new(RecordType::AbortRequest, 1, &[]).unwrap();
        assert!(framer.push(&abort).unwrap());
    }

    #[tokio::test]
    async fn zero_length_request_is_four_records() {
        let mut records = vec![Record::begin_request(1, Role::Responder, false)];
        records.extend(params_records(&[("CONTENT_LENGTH", "0")]));
        records.push(stdin(&[]));
        // Trailing bytes belong to whatever comes next and must stay unread.
        records.push(stdin(b"next"));

        let mut reader = wire(&records).await;
        let request = read_request(&mut reader).await.unwrap();
        assert_eq!(4, request.len());
        assert!(request[0].is(RecordType::BeginRequest));
        assert!(request[1].is(RecordType::Params) && !request[1].is_empty());
        assert!(request[2].is(RecordType::Params) && request[2].is_empty());
        assert!(request[3].is(RecordType::Stdin) && request[3].is_empty());

        let next = read_record(&mut reader).await.unwrap().unwrap();
        assert_eq!(b"next", next.content());
    }

    #[tokio::test]
    async fn body_split_across_stdin_records() {
        let mut records = vec![Record::begin_request(1, Role::Responder, false)];
        records.extend(params_records(&[("CONTENT_LENGTH", "8")]));
        records.push(stdin(b"1234"));
        records.push(stdin(b"5678"));

        let request = read_request(&mut wire(&records).await).await.unwrap();
        assert_eq!(records, request);
    }

    #[tokio::test]
    async fn request_cut_short() {
        let mut records = vec![Record::begin_request(1, Role::Responder, false)];
        records.extend(params_records(&[("CONTENT_LENGTH", "8")]));
        records.push(stdin(b"1234"));

        match read_request(&mut wire(&records).await).await {
            Err(Error::IncompleteMessage) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn response_stops_at_end_request() {
        let records = vec![
            Record::new(RecordType::Stdout, 1, b"Status: 200 OK\r\n\r\nhi").unwrap(),
            Record::new(RecordType::Stderr, 1, b"warning").unwrap(),
            Record::end_request(1, 0, ProtocolStatus::RequestComplete),
            Record::new(RecordType::Stdout, 1, b"next response").unwrap(),
        ];
        let mut reader = wire(&records).await;
        let response = read_response(&mut reader).await.unwrap();
        assert_eq!(&records[..3], &response[..]);
        assert!(read_record(&mut reader).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn response_ends_at_eof() {
        let records = vec![Record::new(RecordType::Stdout, 1, b"partial").unwrap()];
        let response = read_response(&mut wire(&records).await).await.unwrap();
        assert_eq!(records, response);
    }
}
