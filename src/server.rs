use super::error::Result;
use super::proxy::Proxy;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinSet;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long a finished connection waits for the peer to close before it is dropped.
const LINGER_TIMEOUT: Duration = Duration::from_secs(2);

/// Serves one accepted connection.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn call<'a>(&'a self, stream: TcpStream, peer: SocketAddr) -> BoxFuture<'a, Result<()>>;
}

impl ConnectionHandler for Proxy {
    fn call<'a>(&'a self, mut stream: TcpStream, peer: SocketAddr) -> BoxFuture<'a, Result<()>> {
        async move {
            debug!("accepted connection from {}", peer);
            if let Err(e) = stream.set_nodelay(true) {
                debug!("cannot set nodelay for {}: {}", peer, e);
            }
            let result = self.handle(&mut stream).await;
            linger_close(&mut stream, peer).await;
            result
        }
        .boxed()
    }
}

/// Send FIN, then discard input until the peer closes or the linger timeout runs out. A socket
/// dropped with unread input is reset, and the reset can overtake response bytes still in
/// flight. The usual leftover is the empty STDIN record after a satisfied `CONTENT_LENGTH`.
async fn linger_close(stream: &mut TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.shutdown().await {
        debug!("shutdown for {}: {}", peer, e);
        return;
    }
    let mut buf = [0u8; 4096];
    let mut discarded = 0usize;
    let drain = async {
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => discarded += n,
            }
        }
    };
    if tokio::time::timeout(LINGER_TIMEOUT, drain).await.is_err() {
        debug!("{} did not close within {:?}", peer, LINGER_TIMEOUT);
    }
    if discarded > 0 {
        debug!("discarded {} trailing bytes from {}", discarded, peer);
    }
}

pub struct Server<H> {
    listener: TcpListener,
    handler: Arc<H>,
}

impl<H: ConnectionHandler> Server<H> {
    pub fn new(listener: TcpListener, handler: H) -> Server<H> {
        Server {
            listener,
            handler: Arc::new(handler),
        }
    }

    pub async fn bind<A: ToSocketAddrs>(addr: A, handler: H) -> Result<Server<H>> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Server::new(listener, handler))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve connections until `shutdown` resolves, then wait for the connections
    /// already in flight to finish.
    pub async fn run<S>(self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down; waiting for {} connection(s)", tasks.len());
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    let handler = Arc::clone(&self.handler);
                    tasks.spawn(async move {
                        if let Err(e) = handler.call(stream, peer).await {
                            error!("connection from {} failed: {}", peer, e);
                        }
                    });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("connection task panicked: {}", e);
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("connection task panicked: {}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    struct Echo(Arc<AtomicUsize>);

    impl ConnectionHandler for Echo {
        fn call<'a>(&'a self, mut stream: TcpStream, _: SocketAddr) -> BoxFuture<'a, Result<()>> {
            async move {
                let mut buf = [0u8; 4];
                stream.read_exact(&mut buf).await?;
                stream.write_all(&buf).await?;
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn drains_connections_on_shutdown() {
        let served = Arc::new(AtomicUsize::new(0));
        let server = Server::bind("127.0.0.1:0", Echo(Arc::clone(&served)))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let running = tokio::spawn(server.run(async move {
            let _ = stopped.await;
        }));

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"pi").await.unwrap();
        // The connection is accepted but not yet finished when shutdown starts.
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.send(()).unwrap();
        conn.write_all(b"ng").await.unwrap();

        let mut reply = [0u8; 4];
        conn.read_exact(&mut reply).await.unwrap();
        assert_eq!(b"ping", &reply);

        running.await.unwrap().unwrap();
        assert_eq!(1, served.load(Ordering::SeqCst));
    }
}
