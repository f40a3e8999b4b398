//! Connecting, typed messages and shutdown.

mod common;

use std::time::Duration;

use common::{ChatMessage, client};
use courier_broker_memory::MemoryBroker;
use courier_client::{
    ClientConfig, ConnectionState, Credentials, Error, FeedState, OffsetSpec, StreamClient,
};
use tokio::time::timeout;

#[tokio::test]
async fn test_connect_reuses_connection() {
    let (broker, client) = client();

    let first = client.connect().await.unwrap();
    let second = client.connect().await.unwrap();

    assert_eq!(first.generation(), second.generation());
    assert_eq!(broker.connect_count(), 1);
    assert_eq!(client.connections().state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_wrong_credentials_are_not_retried() {
    let broker = MemoryBroker::new().with_credentials(Credentials::new("app", "secret"));
    let client = StreamClient::new(broker.clone(), ClientConfig::default());

    let err = client.connect().await.unwrap_err();

    assert!(matches!(err, Error::Configuration(_)));
    assert_eq!(broker.connect_count(), 1);
}

#[tokio::test]
async fn test_typed_messages_round_trip_through_feed() {
    use futures::StreamExt;

    let (_broker, client) = client();

    let sent = vec![
        ChatMessage::new("lobby", "ada", "hello"),
        ChatMessage::new("lobby", "grace", "hi ada"),
    ];

    for message in &sent {
        client.send_message("lobby", message.clone()).await.unwrap();
    }

    let feed = client.subscribe("lobby", OffsetSpec::First).await.unwrap();

    let received: Vec<ChatMessage> = feed
        .take(2)
        .map(|delivery| delivery.unwrap().decode::<ChatMessage>().unwrap())
        .collect()
        .await;

    assert_eq!(received, sent);
}

#[tokio::test]
async fn test_subscribe_last_n() {
    let (_broker, client) = client();

    for i in 0..10 {
        client.send("history", format!("m{i}")).await.unwrap();
    }

    let mut feed = client
        .subscribe("history", OffsetSpec::LastN(3))
        .await
        .unwrap();

    let mut offsets = Vec::new();
    for _ in 0..3 {
        offsets.push(feed.next().await.unwrap().unwrap().offset);
    }

    assert_eq!(offsets, vec![7, 8, 9]);
}

#[tokio::test]
async fn test_shutdown_ends_feeds_and_rejects_calls() {
    let (broker, client) = client();
    let mut feed = client.subscribe("orders", OffsetSpec::Next).await.unwrap();

    client.shutdown().await;

    let outcome = timeout(Duration::from_secs(5), feed.next())
        .await
        .unwrap();
    assert!(matches!(outcome, Some(Err(Error::Shutdown))));
    assert_eq!(feed.state(), FeedState::Unsubscribed);

    assert!(matches!(
        client.send("orders", "late").await,
        Err(Error::Shutdown)
    ));
    assert!(matches!(client.connect().await, Err(Error::Shutdown)));
    assert_eq!(client.connections().state(), ConnectionState::Disconnected);

    timeout(Duration::from_secs(5), async {
        while broker.active_subscriptions() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}
