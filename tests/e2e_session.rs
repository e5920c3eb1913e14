//! End-to-end session tests over the loopback transport.
//!
//! These tests drive both ends of real sessions: authentication, hello
//! exchange, negotiation, RPC tagging and every way a session can end.

use std::time::Duration;

use netconf::protocol::{
    AuthMethod, AuthPreferences, BaseVersion, Capabilities, Client, Server, Session,
    SessionConfig, Side, Status, TerminationReason, CAP_NOTIFICATION, NETCONF_PORT,
};
use netconf::transport::memory::{self, AuthPolicy, MemoryListener};
use netconf::transport::{Channel, Connection, Connector, UserAuth};
use netconf::NetconfError;

const WAIT: Duration = Duration::from_secs(5);

fn base(versions: &[BaseVersion]) -> Capabilities {
    versions.iter().map(|v| v.uri()).collect()
}

async fn establish(client: &Client, server: &Server, listener: &mut MemoryListener) -> (Session, Session) {
    let (server_session, client_session) = tokio::join!(
        server.accept(listener),
        client.connect("router", NETCONF_PORT, "admin")
    );
    (client_session.unwrap(), server_session.unwrap())
}

async fn wait_terminated(session: &Session) -> TerminationReason {
    let mut watch = session.watch_status();
    tokio::time::timeout(WAIT, watch.terminated())
        .await
        .expect("session did not terminate in time")
}

/// Client offers base only, server adds :notification
#[tokio::test]
async fn test_scenario_a_notification_advertised_by_server() {
    let (connector, mut listener) = memory::pair(AuthPolicy::default());
    let client = Client::new(connector).with_capabilities(base(&[BaseVersion::V1_0]));
    let server = Server::new()
        .with_capabilities(base(&[BaseVersion::V1_0]).with(CAP_NOTIFICATION));

    let (client_session, server_session) = establish(&client, &server, &mut listener).await;

    assert!(client_session.notification_allowed());
    assert_eq!(client_session.capabilities().to_vec(), vec![BaseVersion::V1_0.uri()]);
    assert_eq!(client_session.capabilities().len(), 1);
    assert!(!server_session.notification_allowed());
}

/// Highest common base version wins
#[tokio::test]
async fn test_scenario_b_version_fallback() {
    let (connector, mut listener) = memory::pair(AuthPolicy::default());
    let client =
        Client::new(connector).with_capabilities(base(&[BaseVersion::V1_0, BaseVersion::V1_1]));
    let server = Server::new().with_capabilities(base(&[BaseVersion::V1_0]));

    let (mut client_session, mut server_session) = establish(&client, &server, &mut listener).await;
    assert_eq!(client_session.version(), BaseVersion::V1_0);
    assert_eq!(server_session.version(), BaseVersion::V1_0);

    // End-of-message framing stays in use on a 1.0 session.
    let id = client_session.send_rpc("<get/>").await.unwrap();
    let rpc = server_session.recv_rpc().await.unwrap().unwrap();
    assert_eq!(rpc.message_id, id.to_string());
}

/// Disjoint base versions fail on both ends and release everything
#[tokio::test]
async fn test_scenario_c_no_common_base_version() {
    let (connector, mut listener) = memory::pair(AuthPolicy::default());
    let client = Client::new(connector.clone()).with_capabilities(base(&[BaseVersion::V1_1]));
    let server = Server::new().with_capabilities(base(&[BaseVersion::V1_0]));

    let (server_result, client_result) = tokio::join!(
        server.accept(&mut listener),
        client.connect("router", NETCONF_PORT, "admin")
    );

    let err = client_result.unwrap_err();
    assert!(matches!(err, NetconfError::Negotiation(_)));
    assert_eq!(err.termination_reason(), TerminationReason::BadHello);
    assert!(matches!(server_result, Err(NetconfError::Negotiation(_))));

    assert_eq!(connector.open_connections(), 0);
    assert_eq!(connector.open_channels(), 0);
    assert_eq!(server.active_sessions(), 0);
}

/// Public key is rejected, password succeeds
#[tokio::test]
async fn test_scenario_d_auth_method_fallback() {
    let (connector, mut listener) = memory::pair(AuthPolicy::accept_only(&[AuthMethod::Password]));
    let client = Client::new(connector.clone()).with_auth(AuthPreferences::from_order(&[
        AuthMethod::PublicKey,
        AuthMethod::Password,
    ]));
    let server = Server::new();

    let (client_session, _server_session) = establish(&client, &server, &mut listener).await;

    assert_eq!(connector.attempts(), vec![AuthMethod::PublicKey, AuthMethod::Password]);
    assert_eq!(client_session.status(), Status::Working);
}

/// A severed transport is noticed without caller action
#[tokio::test]
async fn test_scenario_e_transport_drop_detected() {
    let (connector, mut listener) = memory::pair(AuthPolicy::default());
    let client = Client::new(connector);
    let server = Server::new();

    let (client_session, server_session) = establish(&client, &server, &mut listener).await;
    assert_eq!(client_session.status(), Status::Working);

    server_session.free();

    assert_eq!(wait_terminated(&client_session).await, TerminationReason::ConnectionDropped);
    assert_eq!(client_session.status(), Status::Closed);
    assert_eq!(
        client_session.termination_reason(),
        Some(TerminationReason::ConnectionDropped)
    );
}

#[tokio::test]
async fn test_rpc_message_ids_and_replies() {
    let (connector, mut listener) = memory::pair(AuthPolicy::default());
    let client = Client::new(connector);
    let server = Server::new();

    let (mut client_session, mut server_session) = establish(&client, &server, &mut listener).await;
    assert_eq!(client_session.version(), BaseVersion::V1_1);

    let first = client_session.send_rpc("<get/>").await.unwrap();
    let second = client_session.send_rpc("<get-config><source><running/></source></get-config>").await.unwrap();
    assert!(second > first);
    assert_eq!(client_session.outstanding_rpcs(), 2);

    for expected in [first, second] {
        let rpc = server_session.recv_rpc().await.unwrap().unwrap();
        assert_eq!(rpc.message_id, expected.to_string());
        server_session.send_reply(&rpc, "<data/>").await.unwrap();
    }

    assert_eq!(client_session.recv_reply().await.unwrap().message_id, first);
    assert_eq!(client_session.recv_reply().await.unwrap().message_id, second);
    assert_eq!(client_session.outstanding_rpcs(), 0);

    let monitor = server_session.monitor();
    assert_eq!((monitor.rpcs_in, monitor.rpcs_out), (2, 2));
}

#[tokio::test]
async fn test_graceful_close_is_idempotent() {
    let (connector, mut listener) = memory::pair(AuthPolicy::default());
    let client = Client::new(connector.clone());
    let server = Server::new();

    let (mut client_session, mut server_session) = establish(&client, &server, &mut listener).await;

    let serve = async {
        let closed = server_session.recv_rpc().await.unwrap();
        assert!(closed.is_none());
    };
    let (_, closed) = tokio::join!(serve, client_session.close());
    closed.unwrap();

    assert_eq!(client_session.termination_reason(), Some(TerminationReason::Closed));
    assert_eq!(server_session.status(), Status::Closed);
    assert_eq!(server_session.termination_reason(), Some(TerminationReason::Closed));

    // Second close does nothing.
    client_session.close().await.unwrap();
    assert_eq!(client_session.termination_reason(), Some(TerminationReason::Closed));

    assert!(matches!(
        client_session.send_rpc("<get/>").await,
        Err(NetconfError::Usage(_))
    ));

    client_session.free();
    server_session.free();
    assert_eq!(connector.open_channels(), 0);
    assert_eq!(connector.open_connections(), 0);
    assert_eq!(server.active_sessions(), 0);
}

#[tokio::test]
async fn test_reply_delivered_before_peer_disconnects() {
    let (connector, mut listener) = memory::pair(AuthPolicy::default());
    let client = Client::new(connector);
    let server = Server::new();

    let (mut client_session, mut server_session) = establish(&client, &server, &mut listener).await;

    let id = client_session.send_rpc("<get/>").await.unwrap();
    let rpc = server_session.recv_rpc().await.unwrap().unwrap();
    server_session.send_reply(&rpc, "<data/>").await.unwrap();
    server_session.free();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reply = client_session.recv_reply().await.unwrap();
    assert_eq!(reply.message_id, id);
    assert!(reply.xml.contains("<data/>"));
    assert_eq!(wait_terminated(&client_session).await, TerminationReason::ConnectionDropped);
}

#[tokio::test]
async fn test_kill_drops_peer() {
    let (connector, mut listener) = memory::pair(AuthPolicy::default());
    let client = Client::new(connector);
    let server = Server::new();

    let (client_session, mut server_session) = establish(&client, &server, &mut listener).await;

    server_session.kill();
    assert_eq!(server_session.termination_reason(), Some(TerminationReason::Killed));
    assert_eq!(wait_terminated(&client_session).await, TerminationReason::ConnectionDropped);
}

#[tokio::test]
async fn test_idle_timeout_closes_session() {
    let (connector, mut listener) = memory::pair(AuthPolicy::default());
    let client = Client::new(connector.clone());
    let server = Server::new()
        .with_config(SessionConfig::default().with_idle_timeout(Duration::from_millis(100)));

    let (client_session, mut server_session) = establish(&client, &server, &mut listener).await;

    assert_eq!(wait_terminated(&server_session).await, TerminationReason::Timeout);
    assert!(matches!(server_session.recv_rpc().await, Err(NetconfError::Usage(_))));

    // The timed-out end lets go of its transport, so the peer sees the drop.
    assert_eq!(wait_terminated(&client_session).await, TerminationReason::ConnectionDropped);
    assert_eq!(server.active_sessions(), 0);
    assert_eq!(connector.open_channels(), 0);
    assert_eq!(connector.open_connections(), 0);
}

#[tokio::test]
async fn test_hello_timeout() {
    let (connector, mut listener) = memory::pair(AuthPolicy::default());
    let server = Server::new()
        .with_config(SessionConfig::default().with_hello_timeout(Duration::from_millis(100)));

    // A peer that authenticates and opens a channel but never says hello.
    let mut connection = connector.connect("router", NETCONF_PORT).await.unwrap();
    connection.authenticate("admin", AuthMethod::Password).await.unwrap();
    let silent: Box<dyn Channel> = connection.open_channel().await.unwrap();

    let err = server.accept(&mut listener).await.unwrap_err();
    assert!(matches!(err, NetconfError::Negotiation(_)));
    assert_eq!(err.termination_reason(), TerminationReason::BadHello);
    assert_eq!(server.active_sessions(), 0);
    drop(silent);
}

#[tokio::test]
async fn test_multiplexed_sessions_share_connection() {
    let (connector, mut listener) = memory::pair(AuthPolicy::default());
    let client = Client::new(connector.clone());
    let server = Server::new();

    let connection = client.open_connection("router", NETCONF_PORT, "admin").await.unwrap();

    let (first_server, first) = tokio::join!(server.accept(&mut listener), client.connect_channel(&connection));
    let (second_server, second) =
        tokio::join!(server.accept(&mut listener), client.connect_channel(&connection));
    let (first, second) = (first.unwrap(), second.unwrap());
    let (first_server, second_server) = (first_server.unwrap(), second_server.unwrap());

    assert_ne!(first.id(), second.id());
    assert_eq!(first.id(), first_server.id());
    assert_eq!(server.active_sessions(), 2);
    assert_eq!(connector.open_connections(), 1);
    assert_eq!(connector.open_channels(), 4);
    // Authenticated once for both sessions.
    assert_eq!(connector.attempts().len(), 1);

    drop(connection);
    first.free();
    first_server.free();
    assert_eq!(server.active_sessions(), 1);
    assert_eq!(connector.open_connections(), 1);

    second.free();
    second_server.free();
    assert_eq!(server.active_sessions(), 0);
    assert_eq!(connector.open_connections(), 0);
    assert_eq!(connector.open_channels(), 0);
}

#[tokio::test]
async fn test_concurrent_establishments_get_unique_ids() {
    const CLIENTS: usize = 8;
    let (connector, mut listener) = memory::pair(AuthPolicy::default());
    let client = Client::new(connector);
    let server = Server::new();

    let accept_all = {
        let server = server.clone();
        tokio::spawn(async move {
            let mut sessions = Vec::new();
            for _ in 0..CLIENTS {
                sessions.push(server.accept(&mut listener).await.unwrap());
            }
            sessions
        })
    };

    let connects = (0..CLIENTS).map(|_| client.connect("router", NETCONF_PORT, "admin"));
    let sessions: Vec<Session> = futures::future::join_all(connects)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    let server_sessions = accept_all.await.unwrap();

    let mut ids: Vec<u32> = sessions.iter().map(Session::id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), CLIENTS);
    assert_eq!(server.active_sessions(), CLIENTS);
    assert!(server_sessions.iter().all(|s| s.side() == Side::Server));
}

#[tokio::test]
async fn test_monitor_snapshot() {
    let (connector, mut listener) = memory::pair(AuthPolicy::default());
    let client = Client::new(connector);
    let server = Server::new();

    let (client_session, server_session) = establish(&client, &server, &mut listener).await;

    let view = client_session.monitor();
    assert_eq!(view.id, server_session.id());
    assert_eq!(view.side, Some(Side::Client));
    assert_eq!(view.host, "router");
    assert_eq!(view.port, Some(NETCONF_PORT));
    assert_eq!(view.user, "admin");
    assert_eq!(view.status, Status::Working);
    assert_eq!(view.version, Some(BaseVersion::V1_1));
    assert!(view.login_time.is_some());
    assert_eq!(view.termination_reason, None);

    let json = view.to_json().unwrap();
    assert!(json.contains("\"status\": \"working\""));
    assert!(json.contains("\"version\": \"1.1\""));

    // Monitoring never changes state.
    let _ = server_session.monitor();
    assert_eq!(server_session.status(), Status::Working);
    assert_eq!(server_session.user(), "admin");
}
