use super::endian::*;
use super::error::{Error, Result};
use super::rawstruct::*;
use super::s11n::*;

use bytes::{Buf, Bytes, BytesMut};
use enum_primitive::FromPrimitive;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use std::fmt;

const ZERO_PADDING: [u8; 8] = [0; 8];

/// Smallest padding that rounds `content_length` up to a multiple of 8.
pub fn padding_for(content_length: usize) -> u8 {
    ((8 - content_length % 8) % 8) as u8
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub version: u8,
    pub record_type: u8,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
    pub reserved: u8,
}

impl RecordHeader {
    pub fn new(record_type: RecordType, request_id: u16, content_length: u16) -> RecordHeader {
        RecordHeader {
            version: FASTCGI_VERSION,
            record_type: record_type as u8,
            request_id,
            content_length,
            padding_length: padding_for(content_length as usize),
            reserved: 0,
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<RecordHeader> {
        let raw: FastcgiRecordHeader = from_bytes(bytes).ok_or(Error::Truncated {
            expected: HEADER_LEN,
            got: bytes.len(),
        })?;

        if raw.version != FASTCGI_VERSION {
            error!("unexpected FCGI version {}", raw.version);
            return Err(Error::InvalidVersion(raw.version));
        }

        let header = RecordHeader {
            version: raw.version,
            record_type: raw.record_type,
            request_id: raw.request_id.get(),
            content_length: raw.content_length.get(),
            padding_length: raw.padding_length,
            reserved: raw.reserved,
        };

        if header.body_len() > MAX_CONTENT_LENGTH + MAX_PADDING_LENGTH {
            return Err(Error::RecordTooLarge { len: header.body_len() });
        }

        Ok(header)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let raw = FastcgiRecordHeader {
            version: self.version,
            record_type: self.record_type,
            request_id: NetworkU16::new(self.request_id),
            content_length: NetworkU16::new(self.content_length),
            padding_length: self.padding_length,
            reserved: self.reserved,
        };
        let mut out = [0u8; HEADER_LEN];
        out.copy_from_slice(as_bytes(&raw));
        out
    }

    /// `None` for type bytes outside the protocol's range.
    pub fn kind(&self) -> Option<RecordType> {
        RecordType::from_u8(self.record_type)
    }

    /// Content plus padding.
    pub fn body_len(&self) -> usize {
        self.content_length as usize + self.padding_length as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BeginRequest {
    pub role: Role,
    pub keep_conn: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndRequest {
    pub app_status: u32,
    pub protocol_status: u8,
}

impl EndRequest {
    pub fn status(&self) -> Option<ProtocolStatus> {
        ProtocolStatus::from_u8(self.protocol_status)
    }
}

/// One record exactly as it travels on the wire. The body keeps the padding bytes that were
/// read, so encoding a decoded record reproduces its wire bytes exactly.
#[derive(Clone, PartialEq, Eq)]
pub struct Record {
    header: RecordHeader,
    body: Bytes,
}

impl Record {
    pub fn new(record_type: RecordType, request_id: u16, content: &[u8]) -> Result<Record> {
        if content.len() > MAX_CONTENT_LENGTH {
            let len = content.len();
            error!("{:?} record is too long: {}", record_type, len);
            return Err(Error::ContentTooLong { len });
        }
        Ok(Record::build(record_type, request_id, content))
    }

    pub(crate) fn build(record_type: RecordType, request_id: u16, content: &[u8]) -> Record {
        debug_assert!(content.len() <= MAX_CONTENT_LENGTH);
        let header = RecordHeader::new(record_type, request_id, content.len() as u16);
        let mut body = BytesMut::with_capacity(header.body_len());
        body.extend_from_slice(content);
        body.extend_from_slice(&ZERO_PADDING[..header.padding_length as usize]);
        Record {
            header,
            body: body.freeze(),
        }
    }

    pub fn from_parts(header: RecordHeader, body: Bytes) -> Result<Record> {
        if body.len() != header.body_len() {
            return Err(Error::Truncated {
                expected: header.body_len(),
                got: body.len(),
            });
        }
        Ok(Record { header, body })
    }

    pub fn begin_request(request_id: u16, role: Role, keep_conn: bool) -> Record {
        let raw = BeginRequestBody {
            role: NetworkU16::new(role as u16),
            flags: if keep_conn { FCGI_KEEP_CONN } else { 0 },
            reserved: [0; 5],
        };
        Record::build(RecordType::BeginRequest, request_id, as_bytes(&raw))
    }

    pub fn end_request(request_id: u16, app_status: u32, protocol_status: ProtocolStatus) -> Record {
        let raw = EndRequestBody {
            app_status: NetworkU32::new(app_status),
            protocol_status: protocol_status as u8,
            reserved: [0; 3],
        };
        Record::build(RecordType::EndRequest, request_id, as_bytes(&raw))
    }

    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    pub fn kind(&self) -> Option<RecordType> {
        self.header.kind()
    }

    pub fn is(&self, record_type: RecordType) -> bool {
        self.header.record_type == record_type as u8
    }

    pub fn request_id(&self) -> u16 {
        self.header.request_id
    }

    pub fn content(&self) -> &[u8] {
        &self.body[..self.header.content_length as usize]
    }

    pub fn padding(&self) -> &[u8] {
        &self.body[self.header.content_length as usize..]
    }

    pub fn is_empty(&self) -> bool {
        self.header.content_length == 0
    }

    /// Header, content and padding.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.body.len()
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_len());
        dst.extend_from_slice(&self.header.to_bytes());
        dst.extend_from_slice(&self.body);
    }

    pub fn begin_request_body(&self) -> Result<BeginRequest> {
        let raw: BeginRequestBody = self.fixed_body("BeginRequest")?;
        let role = match Role::from_u16(raw.role.get()) {
            Some(role) => role,
            None => {
                let got = format!("role {}", raw.role.get());
                return Err(Error::UnexpectedRecord { expected: "a known role", got });
            }
        };
        Ok(BeginRequest {
            role,
            keep_conn: (raw.flags & FCGI_KEEP_CONN) == FCGI_KEEP_CONN,
        })
    }

    pub fn end_request_body(&self) -> Result<EndRequest> {
        let raw: EndRequestBody = self.fixed_body("EndRequest")?;
        Ok(EndRequest {
            app_status: raw.app_status.get(),
            protocol_status: raw.protocol_status,
        })
    }

    fn fixed_body<T: RawStruct>(&self, record: &'static str) -> Result<T> {
        from_bytes(self.content()).ok_or(Error::InvalidBody {
            record,
            len: self.content().len(),
        })
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut out = f.debug_struct("Record");
        match self.kind() {
            Some(kind) => out.field("type", &kind),
            None => out.field("type", &self.header.record_type),
        };
        out.field("request_id", &self.header.request_id)
            .field("content_length", &self.header.content_length)
            .field("padding_length", &self.header.padding_length)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct RecordCodec;

impl Decoder for RecordCodec {
    type Item = Record;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Record>> {
        if buf.len() < HEADER_LEN {
            trace!("insufficient buffer for header");
            return Ok(None);
        }

        let header = RecordHeader::parse(&buf[..HEADER_LEN])?;
        let total = HEADER_LEN + header.body_len();
        if buf.len() < total {
            trace!("insufficient buffer for record: {} of {} bytes", buf.len(), total);
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        buf.advance(HEADER_LEN);
        let body = buf.split_to(header.body_len()).freeze();
        let record = Record { header, body };
        debug!("decoded {:?}", record);
        Ok(Some(record))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Record>> {
        if let Some(record) = self.decode(buf)? {
            return Ok(Some(record));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let expected = if buf.len() < HEADER_LEN {
            HEADER_LEN
        } else {
            HEADER_LEN + RecordHeader::parse(&buf[..HEADER_LEN])?.body_len()
        };
        Err(Error::Truncated {
            expected,
            got: buf.len(),
        })
    }
}

impl Encoder<Record> for RecordCodec {
    type Error = Error;

    fn encode(&mut self, record: Record, buf: &mut BytesMut) -> Result<()> {
        debug!("encoding {:?}", record);
        record.encode(buf);
        Ok(())
    }
}

/// Read exactly one record, never more. `Ok(None)` means the stream ended cleanly on a record
/// boundary; ending anywhere else is `Error::Truncated`.
pub async fn read_record<R>(reader: &mut R) -> Result<Option<Record>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut head = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut head[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::Truncated {
                expected: HEADER_LEN,
                got: filled,
            });
        }
        filled += n;
    }

    let header = RecordHeader::parse(&head)?;
    let mut body = BytesMut::zeroed(header.body_len());
    let mut got = 0;
    while got < body.len() {
        let n = reader.read(&mut body[got..]).await?;
        if n == 0 {
            return Err(Error::Truncated {
                expected: header.body_len(),
                got,
            });
        }
        got += n;
    }

    Ok(Some(Record {
        header,
        body: body.freeze(),
    }))
}

/// Write one record with computed padding in a single write.
pub async fn write_record<W>(
    writer: &mut W,
    record_type: RecordType,
    request_id: u16,
    content: &[u8],
) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let record = Record::new(record_type, request_id, content)?;
    write_records(writer, std::slice::from_ref(&record)).await
}

/// Write the exact wire bytes of `records`, then flush.
pub async fn write_records<W>(writer: &mut W, records: &[Record]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut out = BytesMut::with_capacity(records.iter().map(Record::wire_len).sum());
    for record in records {
        record.encode(&mut out);
    }
    writer.write_all(&out).await?;
    writer.flush().await?;
    Ok(())
}
