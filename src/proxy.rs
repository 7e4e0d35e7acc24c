use super::autoinc::IdGenerator;
use super::endpoint::{BoxedIo, Endpoint};
use super::error::{Error, Phase, Result};
use super::pipe::{Direction, MessageDecoder, Pipe};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use std::future::Future;
use std::io;

/// Opens a fresh upstream connection for each proxied exchange.
pub trait Dial: Send + Sync {
    fn dial(&self) -> BoxFuture<'_, io::Result<BoxedIo>>;
}

impl Dial for Endpoint {
    fn dial(&self) -> BoxFuture<'_, io::Result<BoxedIo>> {
        self.connect().boxed()
    }
}

/// Adapts a closure returning a connection future into a `Dial`.
pub struct DialFn<F>(pub F);

impl<F, Fut> Dial for DialFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = io::Result<BoxedIo>> + Send + 'static,
{
    fn dial(&self) -> BoxFuture<'_, io::Result<BoxedIo>> {
        (self.0)().boxed()
    }
}

/// Relays one request and its response between a client and a FastCGI application, logging
/// both on the way through.
pub struct Proxy {
    upstream: Box<dyn Dial>,
    request: Pipe,
    response: Pipe,
    ids: IdGenerator,
}

impl Proxy {
    pub fn new<D: Dial + 'static>(upstream: D) -> Proxy {
        Proxy {
            upstream: Box::new(upstream),
            request: Pipe::new(Direction::Request),
            response: Pipe::new(Direction::Response),
            ids: IdGenerator::new(),
        }
    }

    pub fn request_decoder<D: MessageDecoder + 'static>(mut self, decoder: D) -> Proxy {
        self.request = self.request.with_decoder(decoder);
        self
    }

    pub fn response_decoder<D: MessageDecoder + 'static>(mut self, decoder: D) -> Proxy {
        self.response = self.response.with_decoder(decoder);
        self
    }

    pub async fn handle<C>(&self, client: &mut C) -> Result<()>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + ?Sized,
    {
        let conn = self.ids.next_id();
        debug!("[{}] dialing upstream", conn);
        let mut upstream = self.upstream.dial().await.map_err(|source| Error::Transport {
            phase: Phase::Dial,
            source,
        })?;

        self.request.run(conn, client, &mut upstream).await?;
        self.response.run(conn, &mut upstream, client).await?;

        if let Err(e) = upstream.shutdown().await {
            debug!("[{}] upstream shutdown: {}", conn, e);
        }
        debug!("[{}] done", conn);
        Ok(())
    }
}
