//! End-to-end tests: token grant, service discovery and streaming sessions
//! wired together over the event bus, against a mock gateway and local
//! streaming servers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{WsServer, login_ack, next_event, session_config};
use rdp_pricing_stream::infrastructure::broadcast::StreamEvent;
use rdp_pricing_stream::{
    Authenticator, AuthenticatorConfig, Credentials, EndpointDescriptor, EventBus,
    ItemSubscription, RdpRestClient, SessionId, SessionSupervisor, SupervisorConfig, TokenState,
    TopologyMode,
};

const TOKEN_PATH: &str = "/auth/oauth2/v1/token";
const DISCOVERY_PATH: &str = "/streaming/pricing/v1/";

/// How long to watch for connections that must not happen.
const QUIET: Duration = Duration::from_millis(400);

struct Client {
    bus: EventBus,
    cancel: CancellationToken,
    supervisor: tokio::task::JoinHandle<()>,
}

impl Client {
    /// Wire an authenticator and a supervisor to `gateway` and start them.
    fn start(gateway: &MockServer, mode: TopologyMode) -> Self {
        let bus = EventBus::default();
        let cancel = CancellationToken::new();
        let rest = Arc::new(
            RdpRestClient::new(format!("{}{DISCOVERY_PATH}", gateway.uri()), Duration::from_secs(5))
                .unwrap(),
        );

        let mut config = SupervisorConfig::new(mode, "10.0.0.1");
        config.session = session_config();
        config.subscriptions = vec![ItemSubscription::single("/EUR=")];
        let supervisor = SessionSupervisor::new(Arc::clone(&rest), config, bus.clone());
        let supervisor = tokio::spawn(supervisor.run(bus.subscribe(), cancel.clone()));

        let authenticator = Authenticator::new(
            rest,
            Credentials::new("machine", "secret", "app-key", "", "trapi"),
            AuthenticatorConfig::new(format!("{}{TOKEN_PATH}", gateway.uri())),
            TokenState::new("10.0.0.1", "256"),
            bus.clone(),
        );
        tokio::spawn(authenticator.run(cancel.clone()));

        Self {
            bus,
            cancel,
            supervisor,
        }
    }

    async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(common::WAIT, self.supervisor)
            .await
            .expect("supervisor did not stop")
            .unwrap();
    }
}

async fn mount_token(gateway: &MockServer, access_token: &str) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access_token,
            "refresh_token": "rt-1",
            "expires_in": "300",
            "token_type": "Bearer"
        })))
        .mount(gateway)
        .await;
}

async fn mount_discovery(gateway: &MockServer, services: &[EndpointDescriptor]) {
    let services: Vec<_> = services
        .iter()
        .map(|e| json!({"endpoint": e.host, "port": e.port, "location": e.locations}))
        .collect();
    Mock::given(method("GET"))
        .and(path(DISCOVERY_PATH))
        .and(query_param("transport", "websocket"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"services": services})))
        .mount(gateway)
        .await;
}

#[tokio::test]
async fn single_session_streams_after_token_and_discovery() {
    let gateway = MockServer::start().await;
    let mut stream = WsServer::start().await;
    mount_token(&gateway, "at-1").await;
    mount_discovery(&gateway, &[stream.endpoint(&["us-east-1a", "us-east-1b"])]).await;

    let client = Client::start(&gateway, TopologyMode::Single);
    let mut events = client.bus.subscribe();

    let mut conn = stream.accept().await;
    let login = conn.recv_json().await;
    assert_eq!(login["ID"], 1);
    assert_eq!(login["Key"]["NameType"], "AuthnToken");
    assert_eq!(login["Key"]["Elements"]["AuthenticationToken"], "at-1");
    assert_eq!(login["Key"]["Elements"]["ApplicationId"], "256");

    conn.send_json(login_ack()).await;
    assert_eq!(conn.recv_json().await, json!({"ID": 2, "Key": {"Name": "/EUR="}}));

    next_event(&mut events, |e| matches!(e, StreamEvent::SessionLoggedIn { .. })).await;
    assert!(stream.try_accept(QUIET).await.is_none());

    client.stop().await;
    conn.expect_close().await;
}

#[tokio::test]
async fn renewed_token_is_applied_in_place() {
    let gateway = MockServer::start().await;
    let mut stream = WsServer::start().await;
    // A 31 s token is renewed after 1 s.
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "expires_in": "31"
        })))
        .expect(1)
        .mount(&gateway)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-2",
            "refresh_token": "rt-2",
            "expires_in": "300"
        })))
        .mount(&gateway)
        .await;
    mount_discovery(&gateway, &[stream.endpoint(&["us-east-1a", "us-east-1b"])]).await;

    let client = Client::start(&gateway, TopologyMode::Single);
    let mut events = client.bus.subscribe();

    let mut conn = stream.accept().await;
    conn.recv_json().await;
    conn.send_json(login_ack()).await;
    assert_eq!(conn.recv_json().await["ID"], 2);

    let relogin = conn.recv_json().await;
    assert_eq!(relogin["Refresh"], json!(false));
    assert_eq!(relogin["Key"]["Elements"]["AuthenticationToken"], "at-2");

    conn.send_json(login_ack()).await;
    next_event(&mut events, |e| matches!(e, StreamEvent::SessionLoginRefreshed { .. })).await;
    assert!(stream.try_accept(QUIET).await.is_none());

    client.stop().await;
}

#[tokio::test]
async fn hot_standby_reconnects_only_the_dropped_session() {
    let gateway = MockServer::start().await;
    let mut primary = WsServer::start().await;
    let mut standby = WsServer::start().await;
    mount_token(&gateway, "at-1").await;
    mount_discovery(
        &gateway,
        &[
            primary.endpoint(&["us-east-1a", "us-east-1b"]),
            primary.endpoint(&["us-east-1a"]),
            standby.endpoint(&["us-east-1b"]),
        ],
    )
    .await;

    let client = Client::start(&gateway, TopologyMode::HotStandby);
    let mut events = client.bus.subscribe();

    let mut first = primary.accept().await;
    let mut second = standby.accept().await;
    for conn in [&mut first, &mut second] {
        conn.recv_json().await;
        conn.send_json(login_ack()).await;
        assert_eq!(conn.recv_json().await["ID"], 2);
    }

    second.close().await;

    let reconnecting =
        next_event(&mut events, |e| matches!(e, StreamEvent::SessionReconnecting { .. })).await;
    assert_eq!(reconnecting.session(), Some(&SessionId::nth(1)));

    let mut second = standby.accept().await;
    let login = second.recv_json().await;
    assert_eq!(login["Key"]["Elements"]["AuthenticationToken"], "at-1");
    second.send_json(login_ack()).await;
    assert_eq!(second.recv_json().await, json!({"ID": 2, "Key": {"Name": "/EUR="}}));

    assert!(primary.try_accept(QUIET).await.is_none());

    first.send_json(json!([{"Type": "Ping"}])).await;
    assert_eq!(first.recv_json().await, json!({"Type": "Pong"}));

    client.stop().await;
}

#[tokio::test]
async fn failed_discovery_creates_no_sessions() {
    let gateway = MockServer::start().await;
    let mut stream = WsServer::start().await;
    mount_token(&gateway, "at-1").await;
    mount_discovery(&gateway, &[stream.endpoint(&["us-east-1a"])]).await;

    let client = Client::start(&gateway, TopologyMode::HotStandby);
    let mut events = client.bus.subscribe();

    let failed = next_event(&mut events, |e| {
        matches!(e, StreamEvent::DiscoveryFailed(_) | StreamEvent::DiscoverySucceeded { .. })
    })
    .await;
    assert_eq!(failed.name(), "discovery_failed");
    assert!(stream.try_accept(QUIET).await.is_none());

    client.stop().await;
}

#[tokio::test]
async fn rejected_credentials_start_nothing() {
    let gateway = MockServer::start().await;
    let mut stream = WsServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({"error": "access_denied"})),
        )
        .expect(1)
        .mount(&gateway)
        .await;
    mount_discovery(&gateway, &[stream.endpoint(&["a", "b"])]).await;

    let client = Client::start(&gateway, TopologyMode::Single);
    let mut events = client.bus.subscribe();

    next_event(&mut events, |e| matches!(e, StreamEvent::TokenFailed(_))).await;
    assert!(stream.try_accept(QUIET).await.is_none());

    client.stop().await;
}
