//! Session pump driven by a mockall socket

use std::time::Duration;

use async_trait::async_trait;
use mockall::{Sequence, mock};

use unitrade_exchanges::prelude::*;
use unitrade_exchanges::session::{Incoming, Keepalive, TextSocket, spawn_session};

mock! {
    pub Socket {}

    #[async_trait(?Send)]
    impl TextSocket for Socket {
        async fn receive_text(&mut self, wait: Duration) -> Result<Incoming>;
        async fn send_text(&mut self, message: &str) -> Result<()>;
        async fn ping(&mut self) -> Result<()>;
        fn idle_for(&self) -> Duration;
        async fn close(&mut self) -> Result<()>;
    }
}

fn prices(text: &str) -> Result<Vec<Fixed>> {
    text.split(',')
        .filter(|s| !s.is_empty())
        .map(|s| Fixed::from_str_exact(s).map_err(ExchangeError::from))
        .collect()
}

fn quiet_keepalive() -> Keepalive {
    Keepalive::new(Duration::from_secs(10), Duration::from_secs(15))
}

async fn drain(rx: EventStream<Fixed>) -> Vec<Event<Fixed>> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.recv_async().await {
        events.push(ev);
    }
    events
}

#[monoio::test(enable_timer = true)]
async fn test_socket_error_ends_session_once() {
    let mut socket = MockSocket::new();
    let mut seq = Sequence::new();
    socket
        .expect_receive_text()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(Incoming::Text("101.5,102".to_string())));
    socket
        .expect_receive_text()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err(ExchangeError::NetworkError("reset".to_string())));
    socket.expect_idle_for().returning(|| Duration::ZERO);
    socket.expect_ping().never();
    socket.expect_close().times(1).returning(|| Ok(()));

    let rx = spawn_session("mock prices", socket, CancellationToken::new(), quiet_keepalive(), prices);
    let events = drain(rx).await;

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], Event::Payload(Fixed::from_str_exact("101.5").unwrap()));
    assert_eq!(events[1], Event::Payload(Fixed::from_i64(102)));
    assert_eq!(events[2], Event::Disconnected(ExchangeError::NetworkError("reset".to_string())));
}

#[monoio::test(enable_timer = true)]
async fn test_silent_peer_times_out() {
    let mut socket = MockSocket::new();
    socket.expect_receive_text().times(1).returning(|_| Ok(Incoming::Text(String::new())));
    socket.expect_idle_for().returning(|| Duration::from_secs(20));
    socket.expect_close().times(1).returning(|| Ok(()));

    let rx = spawn_session("mock prices", socket, CancellationToken::new(), quiet_keepalive(), prices);
    let events = drain(rx).await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        Event::Disconnected(ExchangeError::Timeout(msg)) => assert!(msg.contains("silent for 20000 ms")),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[monoio::test(enable_timer = true)]
async fn test_idle_read_keeps_session_and_pings() {
    let mut socket = MockSocket::new();
    let mut seq = Sequence::new();
    socket
        .expect_receive_text()
        .withf(|wait| *wait == Duration::from_millis(5))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(Incoming::Idle));
    socket
        .expect_receive_text()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(Incoming::Text("7".to_string())));
    socket
        .expect_receive_text()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(Incoming::Closed));
    socket.expect_idle_for().returning(|| Duration::ZERO);
    socket.expect_ping().returning(|| Ok(()));
    socket.expect_close().times(1).returning(|| Ok(()));

    let keepalive = Keepalive::new(Duration::from_millis(5), Duration::from_secs(15));
    let rx = spawn_session("mock prices", socket, CancellationToken::new(), keepalive, prices);
    let events = drain(rx).await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0], Event::Payload(Fixed::from_i64(7)));
    assert!(matches!(events[1], Event::Disconnected(ExchangeError::NetworkError(_))));
}

#[monoio::test(enable_timer = true)]
async fn test_undecodable_message_ends_session() {
    let mut socket = MockSocket::new();
    socket.expect_receive_text().times(1).returning(|_| Ok(Incoming::Text("abc".to_string())));
    socket.expect_close().times(1).returning(|| Ok(()));

    let rx = spawn_session("mock prices", socket, CancellationToken::new(), quiet_keepalive(), prices);
    let events = drain(rx).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], Event::Disconnected(ExchangeError::FixedPointError(_))));
}
