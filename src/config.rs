use super::client::Client;
use super::endpoint::{BoxedIo, Endpoint};
use super::error::{Error, Phase, Result};
use super::pairs::MAX_PAIR_BLOCK_SIZE;
use super::pipe::{RequestDecoder, ResponseDecoder};
use super::proxy::Proxy;
use super::server::Server;

use std::net::{Ipv4Addr, SocketAddr};

pub const DEFAULT_LISTEN_PORT: u16 = 9001;
pub const DEFAULT_UPSTREAM: &str = "127.0.0.1:9000";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyConfig {
    pub listen: SocketAddr,
    pub forward_to: Endpoint,
    /// Log decoded requests and responses in addition to the raw records.
    pub decode: bool,
}

impl Default for ProxyConfig {
    fn default() -> ProxyConfig {
        ProxyConfig {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_LISTEN_PORT)),
            forward_to: Endpoint::Tcp(DEFAULT_UPSTREAM.to_owned()),
            decode: true,
        }
    }
}

impl ProxyConfig {
    pub fn build_proxy(&self) -> Proxy {
        let proxy = Proxy::new(self.forward_to.clone());
        if self.decode {
            proxy
                .request_decoder(RequestDecoder)
                .response_decoder(ResponseDecoder)
        } else {
            proxy
        }
    }

    pub async fn bind(&self) -> Result<Server<Proxy>> {
        let server = Server::bind(self.listen, self.build_proxy()).await?;
        info!(
            "listening on {}, forwarding to {}",
            server.local_addr()?,
            self.forward_to
        );
        Ok(server)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    pub keep_conn: bool,
    pub max_params_size: usize,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            endpoint: Endpoint::Tcp(DEFAULT_UPSTREAM.to_owned()),
            keep_conn: false,
            max_params_size: MAX_PAIR_BLOCK_SIZE,
        }
    }
}

impl ClientConfig {
    pub async fn connect(&self) -> Result<Client<BoxedIo>> {
        debug!("connecting to {}", self.endpoint);
        let io = self.endpoint.connect().await.map_err(|source| Error::Transport {
            phase: Phase::Dial,
            source,
        })?;
        Ok(Client::new(io)
            .keep_conn(self.keep_conn)
            .max_params_size(self.max_params_size))
    }
}
