//! Many clients against one listener, and many writers on one connection.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;

use common::{wait_until, Recorder};
use framewire::{Connection, Listener};
use rand::Rng;
use tokio::task::JoinSet;

fn random_payloads(count: usize, max_len: usize) -> Vec<Vec<u8>> {
    let mut rng = rand::rng();
    (0..count)
        .map(|i| {
            let len = rng.random_range(0..max_len);
            let mut payload: Vec<u8> = (0..len).map(|_| rng.random()).collect();
            // Tag each payload with its client index so no two are equal.
            payload.extend_from_slice(&(i as u32).to_le_bytes());
            payload
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifty_clients_get_their_own_echo() {
    let listener = Listener::bind("127.0.0.1:0", 64, Recorder::echo())
        .await
        .unwrap();
    let addr = listener.local_addr().to_string();
    let payloads = random_payloads(50, 4096);

    let mut tasks = JoinSet::new();
    for payload in payloads.clone() {
        let addr = addr.clone();
        tasks.spawn(async move {
            let client = Connection::connect(&addr).await.unwrap();
            client.send(&payload).await.unwrap();
            let echoed = client.receive().await.unwrap();
            assert_eq!(echoed, Some(payload));
            client.close().await.unwrap();
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    wait_until("all disconnects", || {
        listener.handler().disconnected().len() == 50
    })
    .await;
    assert_eq!(listener.handler().connect_count(), 50);

    let mut received = listener.handler().payloads();
    let mut expected = payloads;
    received.sort();
    expected.sort();
    assert_eq!(received, expected);

    let snapshot = listener.metrics().snapshot();
    assert_eq!(snapshot.connections_total, 50);
    assert_eq!(snapshot.connections_active, 0);

    listener.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_client_many_writers() {
    let listener = Listener::bind("127.0.0.1:0", 8, Recorder::silent())
        .await
        .unwrap();
    let client = Arc::new(
        Connection::connect(&listener.local_addr().to_string())
            .await
            .unwrap(),
    );

    let mut tasks = JoinSet::new();
    for writer in 0u8..8 {
        let client = Arc::clone(&client);
        tasks.spawn(async move {
            for i in 0..100usize {
                let payload = vec![writer; 1 + (i * 37) % 2048];
                client.send(&payload).await.unwrap();
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    wait_until("all frames", || listener.handler().payloads().len() == 800).await;
    for payload in listener.handler().payloads() {
        assert!(payload.iter().all(|b| *b == payload[0]), "interleaved frame");
    }
    assert_eq!(listener.metrics().snapshot().malformed_frames, 0);

    listener.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broadcast_while_clients_churn() {
    let listener = Arc::new(
        Listener::bind("127.0.0.1:0", 64, Recorder::silent())
            .await
            .unwrap(),
    );
    let addr = listener.local_addr().to_string();

    let broadcaster = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move {
            for _ in 0..100 {
                listener.send_all(b"tick").await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let mut tasks = JoinSet::new();
    for _ in 0..20 {
        let addr = addr.clone();
        tasks.spawn(async move {
            let client = Connection::connect(&addr).await.unwrap();
            tokio::task::yield_now().await;
            client.close().await.unwrap();
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
    broadcaster.await.unwrap();

    wait_until("all disconnects", || {
        listener.handler().disconnected().len() == 20
    })
    .await;
    assert_eq!(listener.connection_count().unwrap(), 0);

    listener.close().await.unwrap();
}
