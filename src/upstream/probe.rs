//! Liveness probes
//!
//! The default [`DnsProbe`] asks the host for the root zone's `NS` set over
//! the host's own transport. Any well-formed response carrying the query's id
//! counts as alive, whatever its response code: the probe checks that the
//! server answers, not what it answers.
//!
//! The probe does not enforce a deadline itself; the health monitor wraps
//! every call in the configured probe timeout.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RecordType};
use hickory_proto::serialize::binary::BinEncodable;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio_rustls::TlsConnector;

use super::host::UpstreamHost;
use super::transport::Protocol;
use crate::error::{RedirectError, RedirectResult};

/// Largest UDP response accepted from a probe
const MAX_UDP_RESPONSE: usize = 4096;

/// A liveness check for one host
#[async_trait]
pub trait Probe: Send + Sync + fmt::Debug {
    /// Returns `Ok(())` if `host` is answering
    async fn probe(&self, host: &UpstreamHost) -> RedirectResult<()>;
}

/// Root `NS` query over the host's transport
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsProbe;

impl DnsProbe {
    /// Create the probe
    pub fn new() -> Self {
        Self
    }

    /// Encode the probe query with the given id
    ///
    /// # Errors
    ///
    /// Returns `RedirectError::Upstream` if encoding fails.
    pub fn build_query(id: u16) -> RedirectResult<Vec<u8>> {
        let mut message = Message::new();
        message
            .set_id(id)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true);
        message.add_query(Query::query(Name::root(), RecordType::NS));

        message
            .to_bytes()
            .map_err(|e| RedirectError::upstream("probe", format!("failed to encode probe: {e}")))
    }

    /// Validate a response to the probe query
    ///
    /// # Errors
    ///
    /// Returns `RedirectError::Upstream` for undecodable data, a mismatched id
    /// or a message that is not a response.
    pub fn check_response(upstream: &str, id: u16, response: &[u8]) -> RedirectResult<()> {
        let message = Message::from_vec(response)
            .map_err(|e| RedirectError::upstream(upstream, format!("malformed response: {e}")))?;

        if message.id() != id {
            return Err(RedirectError::upstream(
                upstream,
                format!("response id {} does not match query id {id}", message.id()),
            ));
        }
        if message.message_type() != MessageType::Response {
            return Err(RedirectError::upstream(upstream, "reply is not a response"));
        }
        Ok(())
    }

    async fn exchange_udp(addr: SocketAddr, query: &[u8]) -> RedirectResult<Vec<u8>> {
        let bind: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };

        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| RedirectError::network_io("failed to bind probe socket", e))?;
        socket
            .connect(addr)
            .await
            .map_err(|e| RedirectError::network_io(format!("failed to connect to {addr}"), e))?;
        socket
            .send(query)
            .await
            .map_err(|e| RedirectError::network_io(format!("failed to send probe to {addr}"), e))?;

        let mut buf = vec![0u8; MAX_UDP_RESPONSE];
        let len = socket
            .recv(&mut buf)
            .await
            .map_err(|e| RedirectError::network_io(format!("failed to receive from {addr}"), e))?;
        buf.truncate(len);
        Ok(buf)
    }

    async fn exchange_stream<S>(stream: &mut S, addr: SocketAddr, query: &[u8]) -> RedirectResult<Vec<u8>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let len = u16::try_from(query.len())
            .map_err(|_| RedirectError::upstream(addr.to_string(), "probe query too large"))?;

        let mut send_buf = Vec::with_capacity(2 + query.len());
        send_buf.extend_from_slice(&len.to_be_bytes());
        send_buf.extend_from_slice(query);
        stream
            .write_all(&send_buf)
            .await
            .map_err(|e| RedirectError::network_io(format!("failed to send probe to {addr}"), e))?;
        stream
            .flush()
            .await
            .map_err(|e| RedirectError::network_io(format!("failed to send probe to {addr}"), e))?;

        let mut len_buf = [0u8; 2];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| RedirectError::network_io(format!("failed to read from {addr}"), e))?;

        let mut response = vec![0u8; usize::from(u16::from_be_bytes(len_buf))];
        stream
            .read_exact(&mut response)
            .await
            .map_err(|e| RedirectError::network_io(format!("failed to read from {addr}"), e))?;
        Ok(response)
    }

    async fn exchange_tls(
        addr: SocketAddr,
        config: &Arc<ClientConfig>,
        server_name: &ServerName<'static>,
        query: &[u8],
    ) -> RedirectResult<Vec<u8>> {
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| RedirectError::network_io(format!("failed to connect to {addr}"), e))?;
        let connector = TlsConnector::from(Arc::clone(config));
        let mut tls = connector
            .connect(server_name.clone(), tcp)
            .await
            .map_err(|e| RedirectError::network_io(format!("TLS handshake with {addr} failed"), e))?;
        Self::exchange_stream(&mut tls, addr, query).await
    }
}

#[async_trait]
impl Probe for DnsProbe {
    async fn probe(&self, host: &UpstreamHost) -> RedirectResult<()> {
        let addr = host.socket_addr();
        let id: u16 = rand::random();
        let query = Self::build_query(id)?;
        let transport = host.transport();

        let response = match transport.protocol() {
            Protocol::Udp => Self::exchange_udp(addr, &query).await?,
            Protocol::Tcp => {
                let mut stream = TcpStream::connect(addr).await.map_err(|e| {
                    RedirectError::network_io(format!("failed to connect to {addr}"), e)
                })?;
                Self::exchange_stream(&mut stream, addr, &query).await?
            }
            Protocol::Tls => {
                let (Some(config), Some(server_name)) =
                    (transport.tls_config(), transport.server_name())
                else {
                    return Err(RedirectError::tls(format!(
                        "host {host} uses TLS without TLS parameters"
                    )));
                };
                Self::exchange_tls(addr, config, server_name, &query).await?
            }
        };

        Self::check_response(&host.to_string(), id, &response)
    }
}
