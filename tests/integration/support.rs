//! Shared helpers: local DNS responders and list files

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use hickory_proto::op::{Message, MessageType};
use hickory_proto::serialize::binary::BinEncodable;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// A UDP server on 127.0.0.1 that answers every query or stays silent
pub struct Responder {
    pub addr: SocketAddr,
    pub received: Arc<AtomicUsize>,
    answering: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Responder {
    /// Answer every query by echoing it back as a response
    pub async fn answering() -> Self {
        Self::spawn(true).await
    }

    /// Read queries but never reply
    pub async fn silent() -> Self {
        Self::spawn(false).await
    }

    async fn spawn(answer: bool) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let received = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&received);
        let answering = Arc::new(AtomicBool::new(answer));
        let answer = Arc::clone(&answering);

        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 1500];
            loop {
                let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                if !answer.load(Ordering::SeqCst) {
                    continue;
                }
                if let Ok(mut message) = Message::from_vec(&buf[..len]) {
                    message.set_message_type(MessageType::Response);
                    if let Ok(bytes) = message.to_bytes() {
                        let _ = socket.send_to(&bytes, peer).await;
                    }
                }
            }
        });

        Self {
            addr,
            received,
            answering,
            handle,
        }
    }

    /// Start or stop answering queries
    pub fn set_answering(&self, answering: bool) {
        self.answering.store(answering, Ordering::SeqCst);
    }

    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Replace `path` with `lines` in one rename
pub fn write_list_atomic(path: &Path, lines: &[String]) {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, lines.join("\n")).unwrap();
    std::fs::rename(&tmp, path).unwrap();
}

/// Send one query to `addr` over UDP and wait for any reply
pub async fn udp_exchange(addr: SocketAddr, query: &[u8]) -> std::io::Result<Vec<u8>> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    socket.connect(addr).await?;
    socket.send(query).await?;
    let mut buf = vec![0u8; 1500];
    let len = socket.recv(&mut buf).await?;
    buf.truncate(len);
    Ok(buf)
}

/// Poll `condition` every 10ms until it holds or `limit` passes
pub async fn wait_until<F>(limit: std::time::Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    condition()
}
