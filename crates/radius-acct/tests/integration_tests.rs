//! Integration tests for the RADIUS accounting server
//!
//! These tests drive a real server over UDP on the loopback interface:
//! - Accounting-Request / Accounting-Response exchange
//! - Retransmission detection (local, shared, disabled)
//! - Handler failures, timeouts and panics
//! - Malformed and unsupported packets
//! - Graceful shutdown and admission limits

use async_trait::async_trait;
use radius_acct::{
    handler_fn, AccountingHandler, AccountingRecord, AccountingServer, Deduplication,
    HandlerError, LocalRetransmissionCache, ServerConfig, ServerError,
};
use radius_proto::auth::{generate_request_authenticator, verify_accounting_response};
use radius_proto::{Attribute, AttributeType, Code, RequestPacket};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const SECRET: &str = "secret";

/// Accounting-Request captured from a NAS, identifier 0x01
const CAPTURED_REQUEST: &str = "0401005883aa46a746f4a9cc25e9037492695d7c\
    0114746573747573657240646f6d61696e2e6368\
    2c07742d383030\
    2806000000030506000000050406010203042a06000004d22b060000ddd5\
    190654455354\
    200570616e";

const CAPTURED_AUTHENTICATOR: &str = "83aa46a746f4a9cc25e9037492695d7c";

fn from_hex(hex: &str) -> Vec<u8> {
    let hex: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).expect("valid hex"))
        .collect()
}

fn captured_request() -> Vec<u8> {
    from_hex(CAPTURED_REQUEST)
}

fn captured_authenticator() -> [u8; 16] {
    from_hex(CAPTURED_AUTHENTICATOR)
        .try_into()
        .expect("16 byte authenticator")
}

/// Handler that keeps every record it is given
#[derive(Default, Clone)]
struct Recorder {
    records: Arc<Mutex<Vec<AccountingRecord>>>,
}

impl Recorder {
    fn records(&self) -> Vec<AccountingRecord> {
        self.records.lock().unwrap().clone()
    }

    fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl AccountingHandler for Recorder {
    async fn handle(&self, record: AccountingRecord) -> Result<(), HandlerError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

fn server_config(handler: Arc<dyn AccountingHandler>) -> ServerConfig {
    ServerConfig::new("127.0.0.1:0".parse().unwrap(), SECRET, handler)
}

/// Bind the server and run it in the background
async fn start_server(
    config: ServerConfig,
) -> (AccountingServer, JoinHandle<Result<(), ServerError>>) {
    let server = AccountingServer::bind(config)
        .await
        .expect("Failed to create server");
    let runner = server.clone();
    let handle = tokio::spawn(async move { runner.run().await });
    (server, handle)
}

async fn client() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind client socket")
}

async fn send(socket: &UdpSocket, data: &[u8], server_addr: SocketAddr) {
    socket
        .send_to(data, server_addr)
        .await
        .expect("Failed to send request");
}

/// Wait up to `wait` for one datagram
async fn recv(socket: &UdpSocket, wait: Duration) -> Option<Vec<u8>> {
    let mut buf = [0u8; 4096];
    match timeout(wait, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => Some(buf[..len].to_vec()),
        _ => None,
    }
}

/// Poll `condition` until it holds, failing the test after two seconds
async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn assert_response(response: &[u8], identifier: u8, request_authenticator: &[u8; 16]) {
    assert_eq!(response.len(), 20);
    assert_eq!(response[0], Code::AccountingResponse.as_u8());
    assert_eq!(response[1], identifier);
    assert_eq!(&response[2..4], &[0x00, 0x14]);
    verify_accounting_response(response, request_authenticator, SECRET.as_bytes())
        .expect("response authenticator should verify");
}

#[tokio::test]
async fn test_accounting_request_answered() {
    let recorder = Recorder::default();
    let (server, _handle) = start_server(server_config(Arc::new(recorder.clone()))).await;
    let socket = client().await;

    send(&socket, &captured_request(), server.local_addr()).await;
    let response = recv(&socket, Duration::from_secs(2))
        .await
        .expect("expected an Accounting-Response");

    assert_response(&response, 0x01, &captured_authenticator());

    let records = recorder.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.id, "0x1");
    assert_eq!(record.code, "Accounting-Request");
    assert_eq!(record.authenticator, CAPTURED_AUTHENTICATOR);
    assert_eq!(record.key, format!("0x1_{}", CAPTURED_AUTHENTICATOR));
    assert_eq!(record.remote_addr, socket.local_addr().unwrap().to_string());
    assert_eq!(record.attribute("User-Name"), Some("testuser@domain.ch"));
    assert_eq!(record.attribute("Acct-Session-Id"), Some("t-800"));
    assert_eq!(record.attribute("Acct-Status-Type"), Some("3"));
    assert_eq!(record.attribute("NAS-Port"), Some("5"));
    assert_eq!(record.attribute("NAS-IP-Address"), Some("1.2.3.4"));
    assert_eq!(record.attribute("Acct-Input-Octets"), Some("1234"));
    assert_eq!(record.attribute("Acct-Output-Octets"), Some("56789"));
    assert_eq!(record.attribute("Class"), Some("TEST"));
    assert_eq!(record.attribute("NAS-Identifier"), Some("pan"));
    assert_eq!(record.attributes.len(), 9);

    let stats = server.stats();
    assert_eq!(stats.datagrams_received, 1);
    assert_eq!(stats.responses_sent, 1);
}

#[tokio::test]
async fn test_encoded_request_answered() {
    let recorder = Recorder::default();
    let (server, _handle) = start_server(server_config(Arc::new(recorder.clone()))).await;
    let socket = client().await;

    let mut packet =
        RequestPacket::new(Code::AccountingRequest, 42, generate_request_authenticator());
    packet.add_attribute(Attribute::integer(AttributeType::AcctStatusType as u8, 1).unwrap());
    packet.add_attribute(Attribute::string(AttributeType::AcctSessionId as u8, "s-42").unwrap());
    let bytes = packet.encode_accounting_request(SECRET.as_bytes()).unwrap();

    send(&socket, &bytes, server.local_addr()).await;
    let response = recv(&socket, Duration::from_secs(2))
        .await
        .expect("expected an Accounting-Response");

    assert_response(&response, 42, &packet.authenticator);
    assert_eq!(recorder.records()[0].attribute("Acct-Session-Id"), Some("s-42"));
}

#[tokio::test]
async fn test_retransmission_dropped() {
    let recorder = Recorder::default();
    let (server, _handle) = start_server(server_config(Arc::new(recorder.clone()))).await;
    let socket = client().await;
    let request = captured_request();

    send(&socket, &request, server.local_addr()).await;
    send(&socket, &request, server.local_addr()).await;

    assert!(recv(&socket, Duration::from_secs(2)).await.is_some());
    assert!(recv(&socket, Duration::from_millis(300)).await.is_none());

    wait_until(|| server.stats().retransmissions == 1).await;
    assert_eq!(recorder.count(), 1);
    assert_eq!(server.stats().responses_sent, 1);
}

#[tokio::test]
async fn test_deduplication_disabled_processes_every_copy() {
    let recorder = Recorder::default();
    let config = server_config(Arc::new(recorder.clone()))
        .with_deduplication(Deduplication::Disabled);
    let (server, _handle) = start_server(config).await;
    let socket = client().await;
    let request = captured_request();

    send(&socket, &request, server.local_addr()).await;
    send(&socket, &request, server.local_addr()).await;

    assert!(recv(&socket, Duration::from_secs(2)).await.is_some());
    assert!(recv(&socket, Duration::from_secs(2)).await.is_some());
    assert_eq!(recorder.count(), 2);
    assert_eq!(server.stats().retransmissions, 0);
}

#[tokio::test]
async fn test_shared_cache_across_servers() {
    let cache = Arc::new(LocalRetransmissionCache::new());
    let recorder = Recorder::default();

    let (first, _first_handle) = start_server(
        server_config(Arc::new(recorder.clone()))
            .with_deduplication(Deduplication::Shared(cache.clone())),
    )
    .await;
    let (second, _second_handle) = start_server(
        server_config(Arc::new(recorder.clone()))
            .with_deduplication(Deduplication::Shared(cache.clone())),
    )
    .await;
    let socket = client().await;
    let request = captured_request();

    send(&socket, &request, first.local_addr()).await;
    assert!(recv(&socket, Duration::from_secs(2)).await.is_some());

    send(&socket, &request, second.local_addr()).await;
    assert!(recv(&socket, Duration::from_millis(300)).await.is_none());

    assert_eq!(recorder.count(), 1);
    assert_eq!(cache.len(), 1);
    wait_until(|| second.stats().retransmissions == 1).await;
}

#[tokio::test]
async fn test_short_datagram_ignored() {
    let recorder = Recorder::default();
    let (server, _handle) = start_server(server_config(Arc::new(recorder.clone()))).await;
    let socket = client().await;

    send(&socket, &[0x04; 10], server.local_addr()).await;
    assert!(recv(&socket, Duration::from_millis(300)).await.is_none());
    wait_until(|| server.stats().malformed_packets == 1).await;

    // The loop keeps serving after a malformed datagram
    send(&socket, &captured_request(), server.local_addr()).await;
    assert!(recv(&socket, Duration::from_secs(2)).await.is_some());
    assert_eq!(recorder.count(), 1);
}

#[tokio::test]
async fn test_truncated_packet_ignored() {
    let recorder = Recorder::default();
    let (server, _handle) = start_server(server_config(Arc::new(recorder.clone()))).await;
    let socket = client().await;

    // Header declares 88 bytes but only 60 arrive
    let request = captured_request();
    send(&socket, &request[..60], server.local_addr()).await;

    assert!(recv(&socket, Duration::from_millis(300)).await.is_none());
    wait_until(|| server.stats().malformed_packets == 1).await;
    assert_eq!(recorder.count(), 0);
}

#[tokio::test]
async fn test_unsupported_code_dropped() {
    let recorder = Recorder::default();
    let (server, _handle) = start_server(server_config(Arc::new(recorder.clone()))).await;
    let socket = client().await;

    let mut request = captured_request();
    request[0] = Code::AccessRequest.as_u8();
    send(&socket, &request, server.local_addr()).await;

    assert!(recv(&socket, Duration::from_millis(300)).await.is_none());
    wait_until(|| server.stats().unsupported_codes == 1).await;
    assert_eq!(recorder.count(), 0);
}

#[tokio::test]
async fn test_handler_failure_suppresses_response() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let handler = handler_fn(move |_record| {
        let counter = counter.clone();
        async move {
            // Refuse the first attempt only
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(HandlerError::Rejected("storage unavailable".to_string()));
            }
            Ok(())
        }
    });
    let (server, _handle) = start_server(server_config(handler)).await;
    let socket = client().await;
    let request = captured_request();

    send(&socket, &request, server.local_addr()).await;
    assert!(recv(&socket, Duration::from_millis(300)).await.is_none());
    wait_until(|| server.stats().handler_failures == 1).await;

    // The failed request is not remembered, so the retry goes through
    send(&socket, &request, server.local_addr()).await;
    let response = recv(&socket, Duration::from_secs(2))
        .await
        .expect("retry should be answered");

    assert_response(&response, 0x01, &captured_authenticator());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_handler_timeout_suppresses_response() {
    let handler = handler_fn(|_record| async {
        sleep(Duration::from_secs(10)).await;
        Ok(())
    });
    let config = server_config(handler).with_handler_timeout(Duration::from_millis(100));
    let (server, _handle) = start_server(config).await;
    let socket = client().await;

    send(&socket, &captured_request(), server.local_addr()).await;

    assert!(recv(&socket, Duration::from_millis(500)).await.is_none());
    wait_until(|| server.stats().handler_timeouts == 1).await;
    wait_until(|| server.in_flight() == 0).await;
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_requests() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    let handler = handler_fn(move |_record| {
        let flag = flag.clone();
        async move {
            sleep(Duration::from_millis(300)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    });
    let (server, handle) = start_server(server_config(handler)).await;
    let socket = client().await;

    send(&socket, &captured_request(), server.local_addr()).await;
    wait_until(|| server.in_flight() == 1).await;

    timeout(Duration::from_secs(5), server.shutdown())
        .await
        .expect("shutdown should finish");

    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(server.in_flight(), 0);
    assert!(server.is_shutting_down());

    // The read loop has returned
    let result = timeout(Duration::from_secs(2), handle)
        .await
        .expect("run should return after shutdown")
        .expect("run task should not panic");
    assert!(result.is_ok());

    // The response was still delivered
    assert!(recv(&socket, Duration::from_secs(1)).await.is_some());
}

#[tokio::test]
async fn test_shutdown_after_handler_panic() {
    let handler = handler_fn(|record| async move {
        if record.id == "0x1" {
            panic!("handler bug");
        }
        Ok(())
    });
    let (server, handle) = start_server(server_config(handler)).await;
    let socket = client().await;

    send(&socket, &captured_request(), server.local_addr()).await;
    assert!(recv(&socket, Duration::from_millis(300)).await.is_none());
    wait_until(|| server.stats().handler_failures == 1).await;

    timeout(Duration::from_secs(5), server.shutdown())
        .await
        .expect("shutdown should not hang after a panic");
    assert_eq!(server.in_flight(), 0);
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_no_datagrams_accepted_after_shutdown() {
    let recorder = Recorder::default();
    let (server, handle) = start_server(server_config(Arc::new(recorder.clone()))).await;
    let addr = server.local_addr();

    server.shutdown().await;
    handle.await.unwrap().unwrap();

    let socket = client().await;
    send(&socket, &captured_request(), addr).await;
    assert!(recv(&socket, Duration::from_millis(300)).await.is_none());
    assert_eq!(recorder.count(), 0);
}

#[tokio::test]
async fn test_admission_limit_drops_excess() {
    let handler = handler_fn(|_record| async {
        sleep(Duration::from_millis(500)).await;
        Ok(())
    });
    let config = server_config(handler).with_max_in_flight(1);
    let (server, _handle) = start_server(config).await;
    let socket = client().await;

    let first = captured_request();
    let mut second = captured_request();
    second[1] = 0x02;

    send(&socket, &first, server.local_addr()).await;
    wait_until(|| server.in_flight() == 1).await;
    send(&socket, &second, server.local_addr()).await;
    wait_until(|| server.stats().admission_rejected == 1).await;

    let response = recv(&socket, Duration::from_secs(2))
        .await
        .expect("first request should be answered");
    assert_eq!(response[1], 0x01);
    assert!(recv(&socket, Duration::from_millis(300)).await.is_none());
}

#[tokio::test]
async fn test_serve_reports_config_error() {
    let mut config = server_config(Arc::new(Recorder::default()));
    config.secret.clear();

    assert!(matches!(
        AccountingServer::serve(config).await,
        Err(ServerError::Config(_))
    ));
}
