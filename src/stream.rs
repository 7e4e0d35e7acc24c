use super::error::Result;
use super::lowlevel::Record;
use super::s11n::{RecordType, MAX_CONTENT_LENGTH};

use futures::{stream, Sink, SinkExt};

/// Splits a logical stream (PARAMS, STDIN, STDOUT, ...) into records of at most
/// `MAX_CONTENT_LENGTH` bytes, closed by an empty record of the same type.
#[derive(Clone, Copy, Debug)]
pub struct StreamWriter {
    record_type: RecordType,
    request_id: u16,
}

impl StreamWriter {
    pub fn new(record_type: RecordType, request_id: u16) -> StreamWriter {
        StreamWriter {
            record_type,
            request_id,
        }
    }

    /// Data records only, no terminator. Empty payloads produce nothing.
    pub fn chunks<'a>(&self, payload: &'a [u8]) -> impl Iterator<Item = Record> + 'a {
        let StreamWriter {
            record_type,
            request_id,
        } = *self;
        payload
            .chunks(MAX_CONTENT_LENGTH)
            .map(move |slice| Record::build(record_type, request_id, slice))
    }

    /// The empty record that ends the stream.
    pub fn terminator(&self) -> Record {
        Record::build(self.record_type, self.request_id, &[])
    }

    pub fn records(&self, payload: &[u8]) -> Vec<Record> {
        let mut records: Vec<Record> = self.chunks(payload).collect();
        records.push(self.terminator());
        records
    }

    /// Send the chunked payload and its terminator, flushing once at the end.
    pub async fn write_all<S>(&self, sink: &mut S, payload: &[u8]) -> Result<()>
    where
        S: Sink<Record, Error = super::error::Error> + Unpin,
    {
        let records = self.records(payload);
        debug!(
            "writing {} bytes of {:?} as {} records",
            payload.len(),
            self.record_type,
            records.len()
        );
        sink.send_all(&mut stream::iter(records.into_iter().map(Ok))).await
    }
}
