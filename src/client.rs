use super::error::{Error, Phase, Result};
use super::lowlevel::{Record, RecordCodec};
use super::pairs::{encode_pair_block, pair_block_size, Params, MAX_PAIR_BLOCK_SIZE};
use super::response::Response;
use super::s11n::{RecordType, Role};
use super::stream::StreamWriter;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

/// Every exchange uses this id; one connection carries one request at a time.
pub const REQUEST_ID: u16 = 1;

/// Undecoded output of one request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawResponse {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub app_status: u32,
    pub protocol_status: u8,
    /// False when the connection closed before an END_REQUEST record arrived.
    pub ended: bool,
}

/// Drives request/response exchanges with a FastCGI application over one connection.
pub struct Client<IO> {
    framed: Framed<IO, RecordCodec>,
    keep_conn: bool,
    max_params_size: usize,
}

impl<IO: AsyncRead + AsyncWrite + Unpin> Client<IO> {
    pub fn new(io: IO) -> Client<IO> {
        Client {
            framed: Framed::new(io, RecordCodec),
            keep_conn: false,
            max_params_size: MAX_PAIR_BLOCK_SIZE,
        }
    }

    /// Ask the application to keep the connection open after each request.
    pub fn keep_conn(mut self, keep_conn: bool) -> Client<IO> {
        self.keep_conn = keep_conn;
        self
    }

    pub fn max_params_size(mut self, max: usize) -> Client<IO> {
        self.max_params_size = max;
        self
    }

    pub fn into_inner(self) -> IO {
        self.framed.into_inner()
    }

    /// Send one request and collect STDOUT and STDERR until END_REQUEST or end of stream.
    ///
    /// I/O failures come back as `Error::Transport` naming the phase. Malformed records are
    /// reported as themselves: a short END_REQUEST body is `Error::InvalidBody`, a record cut
    /// short is `Error::Truncated`.
    pub async fn send(&mut self, env: &Params, body: &[u8]) -> Result<RawResponse> {
        // Checked before anything goes on the wire.
        let size = pair_block_size(env);
        if size > self.max_params_size {
            let max = self.max_params_size;
            error!("pair block of {} bytes exceeds {}", size, max);
            return Err(Error::PairBlockTooLarge { size, max });
        }
        let params = encode_pair_block(env)?;

        self.framed
            .send(Record::begin_request(REQUEST_ID, Role::Responder, self.keep_conn))
            .await
            .map_err(|e| e.in_phase(Phase::Begin))?;

        StreamWriter::new(RecordType::Params, REQUEST_ID)
            .write_all(&mut self.framed, &params)
            .await
            .map_err(|e| e.in_phase(Phase::Params))?;

        StreamWriter::new(RecordType::Stdin, REQUEST_ID)
            .write_all(&mut self.framed, body)
            .await
            .map_err(|e| e.in_phase(Phase::Stdin))?;

        debug!("finished sending request; waiting for response");

        let mut response = RawResponse::default();
        while let Some(record) = self.framed.next().await {
            let record = record.map_err(|e| e.in_phase(Phase::Read))?;
            match record.kind() {
                Some(RecordType::Stdout) => response.stdout.extend_from_slice(record.content()),
                Some(RecordType::Stderr) => response.stderr.extend_from_slice(record.content()),
                Some(RecordType::EndRequest) => {
                    let end = record.end_request_body()?;
                    debug!("request ended: {:?}", end);
                    response.app_status = end.app_status;
                    response.protocol_status = end.protocol_status;
                    response.ended = true;
                    break;
                }
                _ => debug!("discarding {:?}", record),
            }
        }

        if !response.stderr.is_empty() {
            warn!("stderr: {}", String::from_utf8_lossy(&response.stderr));
        }
        Ok(response)
    }

    /// `send`, then decode STDOUT as a CGI response.
    pub async fn request(&mut self, env: &Params, body: &[u8]) -> Result<Response> {
        let raw = self.send(env, body).await?;
        let mut response = Response::parse(&raw.stdout)?;
        response.stderr = String::from_utf8_lossy(&raw.stderr).into_owned();
        response.app_status = raw.app_status;
        response.protocol_status = raw.protocol_status;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::read_request;
    use crate::lowlevel::{read_record, write_records};
    use crate::request::Request;
    use crate::s11n::ProtocolStatus;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn env(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|&(k, v)| (k.to_owned(), v.to_owned()))
            .collect()
    }

    #[tokio::test]
    async fn request_round_trip() {
        let (client_io, mut server_io) = duplex(1 << 20);

        let server = tokio::spawn(async move {
            let records = read_request(&mut server_io).await.unwrap();
            let request = Request::decode(&records).unwrap();
            assert_eq!("5", request.env["CONTENT_LENGTH"]);
            assert_eq!(b"hello".to_vec(), request.stdin);
            assert!(!request.begin.keep_conn);

            write_records(
                &mut server_io,
                &[
                    Record::new(RecordType::Stdout, 1, b"Status: 201 Created\r\n").unwrap(),
                    Record::new(RecordType::Stdout, 1, b"Content-type: text/plain\r\n\r\nok").unwrap(),
                    Record::new(RecordType::Stderr, 1, b"notice").unwrap(),
                    Record::end_request(1, 3, ProtocolStatus::RequestComplete),
                ],
            )
            .await
            .unwrap();
        });

        let mut client = Client::new(client_io);
        let rsp = client
            .request(&env(&[("CONTENT_LENGTH", "5")]), b"hello")
            .await
            .unwrap();
        server.await.unwrap();

        assert_eq!(201, rsp.status_code);
        assert_eq!("text/plain", rsp.headers["Content-type"]);
        assert_eq!("ok", rsp.stdout);
        assert_eq!("notice", rsp.stderr);
        assert_eq!(3, rsp.app_status);
        assert_eq!(0, rsp.protocol_status);
    }

    #[tokio::test]
    async fn keep_conn_serves_two_requests() {
        let (client_io, mut server_io) = duplex(1 << 16);

        let server = tokio::spawn(async move {
            let mut bodies = Vec::new();
            for _ in 0..2 {
                // No CONTENT_LENGTH, so each request ends at its empty STDIN record.
                let request = Request::decode(&read_request(&mut server_io).await.unwrap()).unwrap();
                assert!(request.begin.keep_conn);
                let mut stdout = b"\r\n\r\n".to_vec();
                stdout.extend_from_slice(&request.stdin);
                write_records(
                    &mut server_io,
                    &[
                        Record::new(RecordType::Stdout, 1, &stdout).unwrap(),
                        Record::end_request(1, 0, ProtocolStatus::RequestComplete),
                    ],
                )
                .await
                .unwrap();
                bodies.push(request.stdin);
            }
            // The client closes once it is done with the connection.
            assert!(read_record(&mut server_io).await.unwrap().is_none());
            bodies
        });

        let mut client = Client::new(client_io).keep_conn(true);
        let first = client.request(&Params::new(), b"r0").await.unwrap();
        let second = client.request(&Params::new(), b"r1").await.unwrap();
        assert_eq!("r0", first.stdout);
        assert_eq!("r1", second.stdout);
        client.into_inner().shutdown().await.unwrap();
        assert_eq!(vec![b"r0".to_vec(), b"r1".to_vec()], server.await.unwrap());
    }

    #[tokio::test]
    async fn eof_without_end_request() {
        let (client_io, mut server_io) = duplex(1 << 16);
        let server = tokio::spawn(async move {
            read_request(&mut server_io).await.unwrap();
            write_records(
                &mut server_io,
                &[Record::new(RecordType::Stdout, 1, b"\r\n\r\nbye").unwrap()],
            )
            .await
            .unwrap();
        });

        let mut client = Client::new(client_io);
        let raw = client.send(&Params::new(), &[]).await.unwrap();
        server.await.unwrap();
        assert!(!raw.ended);
        assert_eq!(b"\r\n\r\nbye".to_vec(), raw.stdout);
    }

    #[tokio::test]
    async fn oversized_params_fail_before_writing() {
        // 1 + 4 + 1 + 65943 = 65949 bytes of pair block.
        let value = "v".repeat(65_943);
        let params = env(&[("X", value.as_str())]);
        assert_eq!(65_949, pair_block_size(&params));

        let (client_io, mut server_io) = duplex(1 << 20);
        let mut client = Client::new(client_io);
        match client.send(&params, &[]).await {
            Err(Error::PairBlockTooLarge { size, max }) => {
                assert_eq!(65_949, size);
                assert_eq!(65_535, max);
            }
            other => panic!("unexpected {:?}", other),
        }

        drop(client);
        let mut written = Vec::new();
        server_io.read_to_end(&mut written).await.unwrap();
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn short_end_request_body() {
        let (client_io, mut server_io) = duplex(1 << 16);
        let server = tokio::spawn(async move {
            read_request(&mut server_io).await.unwrap();
            write_records(
                &mut server_io,
                &[Record::new(RecordType::EndRequest, 1, &[0, 0, 0]).unwrap()],
            )
            .await
            .unwrap();
        });

        let mut client = Client::new(client_io);
        let err = client.send(&Params::new(), &[]).await.unwrap_err();
        server.await.unwrap();
        match err {
            Error::InvalidBody { record, len } => {
                assert_eq!("EndRequest", record);
                assert_eq!(3, len);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn write_failure_names_the_phase() {
        let (client_io, server_io) = duplex(64);
        drop(server_io);
        let mut client = Client::new(client_io);
        let err = client.send(&Params::new(), &[]).await.unwrap_err();
        assert_eq!(Some(Phase::Begin), err.phase());
    }

    #[tokio::test]
    async fn truncated_response_is_a_framing_error() {
        let (client_io, mut server_io) = duplex(1 << 16);
        let server = tokio::spawn(async move {
            read_request(&mut server_io).await.unwrap();
            server_io.write_all(&[1, 6, 0, 1, 0, 10, 6, 0, b'a']).await.unwrap();
        });

        let mut client = Client::new(client_io);
        let err = client.send(&Params::new(), &[]).await.unwrap_err();
        server.await.unwrap();
        match err {
            Error::Truncated { expected, got } => {
                assert_eq!(24, expected);
                assert_eq!(9, got);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
