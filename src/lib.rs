#[macro_use] extern crate enum_primitive;
#[macro_use] extern crate log;

mod autoinc;
mod client;
mod config;
mod endian;
mod endpoint;
mod error;
mod framer;
mod lowlevel;
mod pairs;
mod pipe;
mod proxy;
mod rawstruct;
mod request;
mod response;
mod s11n;
mod server;
mod stream;

pub use autoinc::IdGenerator;
pub use client::{Client, RawResponse, REQUEST_ID};
pub use config::{ClientConfig, ProxyConfig};
pub use endpoint::{BoxedIo, Endpoint, Io};
pub use error::{Error, Phase, Result};
pub use framer::{
    read_message, read_request, read_response, Framer, RequestFramer, RequestState,
    ResponseFramer, ResponseState,
};
pub use lowlevel::{
    padding_for, read_record, write_record, write_records, BeginRequest, EndRequest, Record,
    RecordCodec, RecordHeader,
};
pub use pairs::{decode_pair_block, encode_pair_block, pair_block_size, Params, MAX_PAIR_BLOCK_SIZE};
pub use pipe::{describe, Direction, MessageDecoder, Pipe, RequestDecoder, ResponseDecoder};
pub use proxy::{Dial, DialFn, Proxy};
pub use request::Request;
pub use response::{Response, DEFAULT_STATUS};
pub use s11n::{
    ProtocolStatus, RecordType, Role, FASTCGI_VERSION, HEADER_LEN, MAX_CONTENT_LENGTH,
};
pub use server::{ConnectionHandler, Server};
pub use stream::StreamWriter;
