//! Session Flow Integration Tests
//!
//! Drives `RdmClient` end to end against a scripted peer: once over an
//! in-memory transport and once over a loopback websocket server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_util::sync::CancellationToken;

use rdm_stream_client::infrastructure::rdm::WebSocketTransport;
use rdm_stream_client::{
    ClientSettings, CloseReason, CompletionTracker, ItemSpec, KeepAliveMonitor, MessageDispatcher,
    RdmClient, RunSummary, Session, SessionConfig, StatsCounter, SubscriptionPlanner, Transport,
    TransportError, init_metrics,
};

const WAIT: Duration = Duration::from_secs(3);

// =============================================================================
// In-memory transport
// =============================================================================

struct ChannelTransport {
    inbound: mpsc::Receiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Disconnected)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Server side of a [`ChannelTransport`].
struct Peer {
    to_client: mpsc::Sender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl Peer {
    async fn push(&self, frame: Value) {
        self.to_client.send(frame.to_string()).await.unwrap();
    }

    async fn next_frame(&mut self) -> Value {
        let frame = timeout(WAIT, self.from_client.recv())
            .await
            .expect("client should send a frame")
            .expect("client channel open");
        serde_json::from_str(&frame).unwrap()
    }
}

fn dispatcher(config: SessionConfig, items: &[&str], auto_exit: bool) -> MessageDispatcher {
    let planner = SubscriptionPlanner::new(
        items.iter().copied().map(ItemSpec::untagged).collect(),
        None,
        !auto_exit,
    );
    let keepalive = Arc::new(KeepAliveMonitor::new(config.default_ping_interval));
    MessageDispatcher::new(
        Session::new(config, planner).unwrap(),
        Arc::new(StatsCounter::new()),
        keepalive,
        CompletionTracker::new(auto_exit),
    )
}

fn settings() -> ClientSettings {
    ClientSettings {
        tick_interval: Duration::from_millis(10),
        stats_interval: None,
        ..ClientSettings::default()
    }
}

fn spawn_client(
    dispatcher: MessageDispatcher,
    cancel: CancellationToken,
    token_rx: Option<mpsc::Receiver<String>>,
) -> (
    Peer,
    tokio::task::JoinHandle<Result<RunSummary, rdm_stream_client::ClientError>>,
) {
    let (to_client, inbound) = mpsc::channel(16);
    let (outbound, from_client) = mpsc::unbounded_channel();
    let transport = ChannelTransport { inbound, outbound };

    let mut client = RdmClient::new(transport, dispatcher, settings(), cancel);
    if let Some(rx) = token_rx {
        client = client.with_token_updates(rx);
    }
    let handle = tokio::spawn(client.run());
    (
        Peer {
            to_client,
            from_client,
        },
        handle,
    )
}

fn login_refresh(ping_timeout: u64) -> Value {
    json!([{
        "ID": 1,
        "Type": "Refresh",
        "Domain": "Login",
        "Key": {"Name": "user"},
        "State": {"Stream": "Open", "Data": "Ok", "Text": "Login accepted"},
        "Elements": {"PingTimeout": ping_timeout}
    }])
}

fn plain_config() -> SessionConfig {
    SessionConfig::plain("user", "256", "127.0.0.1")
}

async fn finish(
    handle: tokio::task::JoinHandle<Result<RunSummary, rdm_stream_client::ClientError>>,
) -> RunSummary {
    timeout(WAIT, handle)
        .await
        .expect("client should finish")
        .expect("client task should not panic")
        .expect("run should succeed")
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn auto_exit_session_logs_in_subscribes_and_logs_out() {
    let (mut peer, handle) = spawn_client(
        dispatcher(plain_config(), &["VOD.L", "BT.L"], true),
        CancellationToken::new(),
        None,
    );

    let login = peer.next_frame().await;
    assert_eq!(login["Domain"], "Login");
    assert_eq!(login["ID"], 1);
    assert_eq!(login["Key"]["Name"], "user");
    assert_eq!(login["Key"]["Elements"]["ApplicationId"], "256");

    peer.push(login_refresh(30)).await;
    let request = peer.next_frame().await;
    assert_eq!(request["ID"], 2);
    assert_eq!(request["Key"]["Name"], json!(["VOD.L", "BT.L"]));
    assert_eq!(request["Streaming"], false);

    peer.push(json!({"Type": "Ping"})).await;
    assert_eq!(peer.next_frame().await, json!({"Type": "Pong"}));

    peer.push(json!([
        {"ID": 2, "Type": "Refresh", "Key": {"Name": "VOD.L"}, "State": {"Stream": "NonStreaming", "Data": "Ok"}},
        {"ID": 3, "Type": "Refresh", "Key": {"Name": "BT.L"}, "State": {"Stream": "NonStreaming", "Data": "Ok"}}
    ]))
    .await;

    let logout = peer.next_frame().await;
    assert_eq!(logout, json!({"ID": 1, "Domain": "Login", "Type": "Close"}));

    let summary = finish(handle).await;
    assert_eq!(summary.reason, CloseReason::Completed);
    assert!(summary.is_success());
    assert_eq!(summary.stats.requested, 2);
    assert_eq!(summary.stats.refreshed, 2);
    assert_eq!(summary.stats.pinged, 1);
}

#[tokio::test]
async fn oversized_login_id_keeps_configured_stream_ids() {
    let cancel = CancellationToken::new();
    let (mut peer, handle) = spawn_client(
        dispatcher(plain_config(), &["VOD.L", "BT.L"], false),
        cancel.clone(),
        None,
    );

    peer.next_frame().await;
    peer.push(json!([{
        "ID": i64::MAX,
        "Type": "Refresh",
        "Domain": "Login",
        "State": {"Stream": "Open", "Data": "Ok"},
        "Elements": {"PingTimeout": 30}
    }]))
    .await;

    let request = peer.next_frame().await;
    assert_eq!(request["ID"], 2);
    assert_eq!(request["Key"]["Name"], json!(["VOD.L", "BT.L"]));

    cancel.cancel();
    assert_eq!(peer.next_frame().await["Type"], "Close");
    assert_eq!(finish(handle).await.reason, CloseReason::Requested);
}

#[tokio::test]
async fn rejected_item_counts_towards_completion() {
    let (mut peer, handle) = spawn_client(
        dispatcher(plain_config(), &["VOD.L", "NOPE.L"], true),
        CancellationToken::new(),
        None,
    );

    peer.next_frame().await;
    peer.push(login_refresh(30)).await;
    peer.next_frame().await;

    peer.push(json!({"ID": 2, "Type": "Refresh", "State": {"Stream": "NonStreaming", "Data": "Ok"}}))
        .await;
    peer.push(json!({
        "ID": 3,
        "Type": "Status",
        "State": {"Stream": "Closed", "Data": "Suspect", "Code": "NotFound", "Text": "Item not found"}
    }))
    .await;

    assert_eq!(peer.next_frame().await["Type"], "Close");
    let summary = finish(handle).await;
    assert_eq!(summary.reason, CloseReason::Completed);
    assert_eq!(summary.stats.refreshed, 1);
    assert_eq!(summary.stats.statused, 1);
}

#[tokio::test]
async fn silent_server_trips_keepalive() {
    let (mut peer, handle) = spawn_client(
        dispatcher(plain_config(), &["VOD.L"], false),
        CancellationToken::new(),
        None,
    );

    peer.next_frame().await;
    peer.push(login_refresh(1)).await;
    peer.next_frame().await;

    // No pings from here on.
    let logout = peer.next_frame().await;
    assert_eq!(logout["Type"], "Close");

    let summary = finish(handle).await;
    assert_eq!(summary.reason, CloseReason::KeepAliveExpired);
    assert!(!summary.is_success());
}

#[tokio::test]
async fn cancellation_logs_out() {
    let cancel = CancellationToken::new();
    let (mut peer, handle) = spawn_client(
        dispatcher(plain_config(), &["VOD.L"], false),
        cancel.clone(),
        None,
    );

    peer.next_frame().await;
    peer.push(login_refresh(30)).await;
    peer.next_frame().await;
    peer.push(json!({"ID": 2, "Type": "Update", "Fields": {"BID": 1.0}}))
        .await;

    // Let the update land before cancelling.
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    assert_eq!(peer.next_frame().await["Type"], "Close");
    let summary = finish(handle).await;
    assert_eq!(summary.reason, CloseReason::Requested);
    assert_eq!(summary.stats.updated, 1);
}

#[tokio::test]
async fn rejected_login_closes_without_subscribing() {
    let (mut peer, handle) = spawn_client(
        dispatcher(plain_config(), &["VOD.L"], false),
        CancellationToken::new(),
        None,
    );

    peer.next_frame().await;
    peer.push(json!({
        "ID": 1,
        "Type": "Status",
        "Domain": "Login",
        "State": {"Stream": "Closed", "Data": "Suspect", "Text": "Not entitled"}
    }))
    .await;

    assert_eq!(peer.next_frame().await["Type"], "Close");
    let summary = finish(handle).await;
    assert!(matches!(summary.reason, CloseReason::LoginRejected { .. }));
    assert_eq!(summary.stats.requested, 0);
}

#[tokio::test]
async fn token_update_sends_reissue_login() {
    let cancel = CancellationToken::new();
    let (token_tx, token_rx) = mpsc::channel(1);
    let (mut peer, handle) = spawn_client(
        dispatcher(
            SessionConfig::token("first-token", "256", "127.0.0.1"),
            &["VOD.L"],
            false,
        ),
        cancel.clone(),
        Some(token_rx),
    );

    let login = peer.next_frame().await;
    assert_eq!(login["Key"]["NameType"], "AuthnToken");
    assert_eq!(login["Key"]["Elements"]["AuthenticationToken"], "first-token");

    peer.push(login_refresh(30)).await;
    peer.next_frame().await;

    token_tx.send("second-token".to_string()).await.unwrap();
    let reissue = peer.next_frame().await;
    assert_eq!(reissue["Key"]["Elements"]["AuthenticationToken"], "second-token");
    assert_eq!(reissue["Refresh"], false);

    cancel.cancel();
    assert_eq!(peer.next_frame().await["Type"], "Close");
    assert_eq!(finish(handle).await.reason, CloseReason::Requested);
}

#[tokio::test]
async fn peer_hangup_is_a_lost_transport() {
    let (mut peer, handle) = spawn_client(
        dispatcher(plain_config(), &["VOD.L"], false),
        CancellationToken::new(),
        None,
    );

    peer.next_frame().await;
    drop(peer.to_client);

    let summary = finish(handle).await;
    assert!(matches!(summary.reason, CloseReason::TransportLost(_)));
    assert!(peer.from_client.try_recv().is_err(), "no logout on a dead link");
}

#[tokio::test]
async fn metrics_render_after_session() {
    let handle = init_metrics().unwrap();

    let cancel = CancellationToken::new();
    let (mut peer, client) = spawn_client(
        dispatcher(plain_config(), &["VOD.L"], false),
        cancel.clone(),
        None,
    );
    peer.next_frame().await;
    cancel.cancel();
    peer.next_frame().await;
    finish(client).await;

    let rendered = handle.render();
    assert!(rendered.contains("rdm_client_messages_sent_total"));
    assert!(rendered.contains("rdm_client_session_closes_total"));
}

// =============================================================================
// Loopback websocket
// =============================================================================

#[allow(clippy::unnecessary_wraps, clippy::result_large_err)]
fn accept_tr_json2(request: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
    let offered = request
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert_eq!(offered, "tr_json2");
    assert!(request.headers().contains_key("User-Agent"));
    response.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static("tr_json2"),
    );
    Ok(response)
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
            Some(Ok(_)) => {}
            other => panic!("unexpected websocket event: {other:?}"),
        }
    }
}

#[tokio::test]
async fn websocket_round_trip() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, accept_tr_json2)
            .await
            .unwrap();

        let mut received = Vec::new();
        received.push(next_text(&mut ws).await);
        ws.send(Message::Text(login_refresh(30).to_string().into()))
            .await
            .unwrap();
        received.push(next_text(&mut ws).await);
        ws.send(Message::Text(
            json!([{"ID": 2, "Type": "Refresh", "State": {"Stream": "NonStreaming", "Data": "Ok"}}])
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
        received.push(next_text(&mut ws).await);
        received
    });

    let transport = WebSocketTransport::connect(&format!("ws://{addr}/WebSocket"))
        .await
        .unwrap();
    let summary = RdmClient::new(
        transport,
        dispatcher(plain_config(), &["VOD.L"], true),
        settings(),
        CancellationToken::new(),
    )
    .run()
    .await
    .unwrap();
    assert_eq!(summary.reason, CloseReason::Completed);

    let received = timeout(WAIT, server).await.unwrap().unwrap();
    let types: Vec<_> = received
        .iter()
        .map(|frame| frame["Domain"].as_str().unwrap_or("MarketPrice").to_string())
        .collect();
    assert_eq!(types, ["Login", "MarketPrice", "Login"]);
    assert_eq!(received[2]["Type"], "Close");
}
