//! Captive-portal DNS responder.
//!
//! Answers every query on UDP port 53 with a single A record pointing at the
//! device's own address, so any captive-portal detection probe resolves to
//! the provisioning page. Input is untrusted wire data: datagrams shorter
//! than the DNS header are dropped without a reply, and a reply that cannot
//! be built is logged and skipped. Nothing here escalates errors; the
//! responder either serves or stays quiet.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// DNS protocol constants
const DNS_FLAGS_RESPONSE: [u8; 2] = [0x81, 0x80]; // standard response, no error
const DNS_TYPE_A: [u8; 2] = [0x00, 0x01];
const DNS_CLASS_IN: [u8; 2] = [0x00, 0x01];
const DNS_DEFAULT_TTL: [u8; 4] = [0x00, 0x00, 0x00, 0x3c]; // 60 seconds
const DNS_ANSWER_PTR: [u8; 2] = [0xc0, 0x0c]; // compression pointer to offset 12
const DNS_IPV4_LEN: [u8; 2] = [0x00, 0x04];
const DNS_MIN_PACKET_LEN: usize = 12;

const MAX_DATAGRAM_LEN: usize = 512;

/// Minimal DNS responder that redirects all queries to one address.
pub struct DnsServer {
    ip_address: String,
    port: u16,
    local_addr: Option<SocketAddr>,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

impl DnsServer {
    /// Responder redirecting to `ip_address`, listening on port 53.
    pub fn new(ip_address: impl Into<String>) -> Self {
        Self::with_port(ip_address, 53)
    }

    /// Responder on a non-standard port (port 0 binds an ephemeral port).
    pub fn with_port(ip_address: impl Into<String>, port: u16) -> Self {
        Self {
            ip_address: ip_address.into(),
            port,
            local_addr: None,
            running: None,
        }
    }

    /// Re-point the redirect target. Takes effect on the next `start()`.
    pub fn set_redirect_ip(&mut self, ip_address: impl Into<String>) {
        self.ip_address = ip_address.into();
    }

    /// Address the socket is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bind the socket and spawn the responder task. Idempotent.
    ///
    /// An invalid redirect address or a failed bind is logged and leaves the
    /// responder stopped; neither is escalated to the caller.
    pub async fn start(&mut self) {
        if self.running.is_some() {
            return;
        }
        let Some(ip_bytes) = parse_ipv4(&self.ip_address) else {
            error!("Invalid redirect IP: {}", self.ip_address);
            return;
        };

        let socket = match UdpSocket::bind(("0.0.0.0", self.port)).await {
            Ok(socket) => socket,
            Err(e) => {
                error!("Failed to bind UDP port {}: {}", self.port, e);
                return;
            }
        };
        self.local_addr = socket.local_addr().ok();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(respond_loop(Arc::new(socket), ip_bytes, cancel.clone()));
        self.running = Some((cancel, task));
        info!("DNS responder started (redirect to {})", self.ip_address);
    }

    /// Cancel the responder task and close the socket. Idempotent.
    pub fn stop(&mut self) {
        if let Some((cancel, _task)) = self.running.take() {
            cancel.cancel();
            self.local_addr = None;
            info!("DNS responder stopped");
        }
    }
}

impl Drop for DnsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn respond_loop(socket: Arc<UdpSocket>, ip_bytes: [u8; 4], cancel: CancellationToken) {
    let mut buf = [0u8; MAX_DATAGRAM_LEN];
    loop {
        let (len, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(pair) => pair,
                Err(e) => {
                    // Transient receive errors: log and keep listening
                    warn!("DNS receive error: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            },
        };

        match build_response(&buf[..len], &ip_bytes) {
            Some(reply) => {
                if let Err(e) = socket.send_to(&reply, peer).await {
                    warn!("DNS send error: {}", e);
                }
            }
            None => debug!("Dropping malformed {}-byte query from {}", len, peer),
        }
    }
}

/// Validate a dotted-decimal IPv4 address: exactly four octets in [0,255].
pub fn parse_ipv4(ip: &str) -> Option<[u8; 4]> {
    let mut octets = [0u8; 4];
    let mut parts = ip.split('.');
    for octet in octets.iter_mut() {
        *octet = parts.next()?.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(octets)
}

/// Construct the A-record reply for a query, or `None` for short datagrams.
///
/// The reply reuses the query's transaction ID and question section and
/// answers with a name-compression pointer to the original query name.
pub fn build_response(request: &[u8], ip_bytes: &[u8; 4]) -> Option<Vec<u8>> {
    if request.len() < DNS_MIN_PACKET_LEN {
        return None;
    }

    let mut reply = Vec::with_capacity(request.len() + 16);
    reply.extend_from_slice(&request[0..2]); // transaction ID
    reply.extend_from_slice(&DNS_FLAGS_RESPONSE);
    reply.extend_from_slice(&request[4..6]); // question count
    reply.extend_from_slice(&[0x00, 0x01]); // answer count
    reply.extend_from_slice(&[0x00, 0x00]); // authority count
    reply.extend_from_slice(&[0x00, 0x00]); // additional count
    reply.extend_from_slice(&request[12..]); // original question section
    reply.extend_from_slice(&DNS_ANSWER_PTR);
    reply.extend_from_slice(&DNS_TYPE_A);
    reply.extend_from_slice(&DNS_CLASS_IN);
    reply.extend_from_slice(&DNS_DEFAULT_TTL);
    reply.extend_from_slice(&DNS_IPV4_LEN);
    reply.extend_from_slice(ip_bytes);
    Some(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 12-byte header plus a one-label question for "setup", type A, class IN.
    fn sample_query() -> Vec<u8> {
        let mut query = vec![
            0xab, 0xcd, // transaction ID
            0x01, 0x00, // standard query
            0x00, 0x01, // one question
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        query.extend_from_slice(&[5]);
        query.extend_from_slice(b"setup");
        query.extend_from_slice(&[0x00]); // name terminator
        query.extend_from_slice(&DNS_TYPE_A);
        query.extend_from_slice(&DNS_CLASS_IN);
        query
    }

    #[test]
    fn test_reply_mirrors_transaction_id_and_ip() {
        let query = sample_query();
        let reply = build_response(&query, &[192, 168, 4, 1]).unwrap();

        assert_eq!(&reply[0..2], &query[0..2]);
        assert_eq!(&reply[2..4], &DNS_FLAGS_RESPONSE);
        assert_eq!(&reply[4..6], &query[4..6]);
        assert_eq!(&reply[6..8], &[0x00, 0x01]);
        assert_eq!(&reply[reply.len() - 4..], &[192, 168, 4, 1]);
    }

    #[test]
    fn test_reply_answer_layout() {
        let query = sample_query();
        let reply = build_response(&query, &[10, 0, 0, 1]).unwrap();

        // Question section copied verbatim after the header
        let question = &query[12..];
        assert_eq!(&reply[12..12 + question.len()], question);

        // Answer record follows: pointer, type, class, TTL, rdlength, rdata
        let answer = &reply[12 + question.len()..];
        assert_eq!(&answer[0..2], &DNS_ANSWER_PTR);
        assert_eq!(&answer[2..4], &DNS_TYPE_A);
        assert_eq!(&answer[4..6], &DNS_CLASS_IN);
        assert_eq!(&answer[6..10], &DNS_DEFAULT_TTL);
        assert_eq!(&answer[10..12], &DNS_IPV4_LEN);
        assert_eq!(&answer[12..16], &[10, 0, 0, 1]);
    }

    #[test]
    fn test_short_datagram_yields_no_reply() {
        assert!(build_response(&[0u8; 11], &[192, 168, 4, 1]).is_none());
        assert!(build_response(&[], &[192, 168, 4, 1]).is_none());
        // Exactly 12 bytes is a valid (empty-question) packet
        assert!(build_response(&[0u8; 12], &[192, 168, 4, 1]).is_some());
    }

    #[test]
    fn test_parse_ipv4() {
        assert_eq!(parse_ipv4("192.168.4.1"), Some([192, 168, 4, 1]));
        assert_eq!(parse_ipv4("0.0.0.0"), Some([0, 0, 0, 0]));
        assert_eq!(parse_ipv4("255.255.255.255"), Some([255, 255, 255, 255]));
        assert_eq!(parse_ipv4("256.0.0.1"), None);
        assert_eq!(parse_ipv4("1.2.3"), None);
        assert_eq!(parse_ipv4("1.2.3.4.5"), None);
        assert_eq!(parse_ipv4("a.b.c.d"), None);
        assert_eq!(parse_ipv4(""), None);
        assert_eq!(parse_ipv4("1.2.3."), None);
    }

    #[tokio::test]
    async fn test_start_answers_queries() {
        let mut server = DnsServer::with_port("192.168.4.1", 0);
        server.start().await;
        let addr = server.local_addr().expect("server should be bound");

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], addr.port()));
        client.send_to(&sample_query(), target).await.unwrap();

        let mut buf = [0u8; 512];
        let (len, _) = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            client.recv_from(&mut buf),
        )
        .await
        .expect("reply before timeout")
        .unwrap();

        assert_eq!(&buf[0..2], &sample_query()[0..2]);
        assert_eq!(&buf[len - 4..len], &[192, 168, 4, 1]);
        server.stop();
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_invalid_ip_refuses_start() {
        let mut server = DnsServer::with_port("300.1.2.3", 0);
        server.start().await;
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let mut server = DnsServer::with_port("192.168.4.1", 0);
        server.start().await;
        let addr = server.local_addr();
        server.start().await;
        assert_eq!(server.local_addr(), addr);
        server.stop();
        server.stop();
        assert!(!server.is_running());
    }
}
