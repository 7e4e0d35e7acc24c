use super::error::{Error, Result};
use super::lowlevel::{BeginRequest, Record};
use super::pairs::{decode_pair_block, Params};
use super::s11n::RecordType;

/// A request rebuilt from the records that carried it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub request_id: u16,
    pub begin: BeginRequest,
    pub env: Params,
    pub stdin: Vec<u8>,
}

impl Request {
    pub fn decode(records: &[Record]) -> Result<Request> {
        let (first, rest) = match records.split_first() {
            Some(split) => split,
            None => {
                return Err(Error::UnexpectedRecord {
                    expected: "BeginRequest",
                    got: "nothing".to_owned(),
                })
            }
        };
        if !first.is(RecordType::BeginRequest) {
            return Err(Error::UnexpectedRecord {
                expected: "BeginRequest",
                got: format!("{:?}", first),
            });
        }
        let begin = first.begin_request_body()?;

        let mut params = Vec::new();
        let mut stdin = Vec::new();
        for record in rest {
            match record.kind() {
                Some(RecordType::Params) => params.extend_from_slice(record.content()),
                Some(RecordType::Stdin) => stdin.extend_from_slice(record.content()),
                _ => debug!("ignoring {:?} while decoding request", record),
            }
        }

        Ok(Request {
            request_id: first.request_id(),
            begin,
            env: decode_pair_block(&params)?,
            stdin,
        })
    }

    /// Body length announced in the environment; zero when absent or not a number.
    pub fn content_length(&self) -> usize {
        content_length(&self.env)
    }
}

pub(crate) fn content_length(env: &Params) -> usize {
    env.get("CONTENT_LENGTH")
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}
