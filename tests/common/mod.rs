//! Shared fixtures for the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use framewire::{Connection, ConnectionId, ServerHandler};

/// Records every hook invocation and optionally echoes payloads back.
#[derive(Default)]
pub struct Recorder {
    echo: bool,
    pub connects: AtomicUsize,
    pub disconnects: Mutex<Vec<ConnectionId>>,
    pub received: Mutex<Vec<(ConnectionId, Vec<u8>)>>,
}

impl Recorder {
    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnected(&self) -> Vec<ConnectionId> {
        self.disconnects.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl ServerHandler for Recorder {
    async fn on_connect(&self, _connection: &Arc<Connection>) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_disconnect(&self, connection: &Arc<Connection>) {
        self.disconnects.lock().unwrap().push(connection.id());
    }

    async fn on_communicate(&self, payload: Vec<u8>, connection: &Arc<Connection>) {
        if self.echo {
            let _ = connection.send(&payload).await;
        }
        self.received
            .lock()
            .unwrap()
            .push((connection.id(), payload));
    }
}

/// Polls `condition` until it holds, panicking after a few seconds.
pub async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
