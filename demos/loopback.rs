//! Loopback demo - a client publishes a track to an in-process server
//!
//! Run with: cargo run --example loopback -- [GROUPS]
//!
//! This demo shows:
//! - Accepting a transport on `MoqServer` and answering its events
//! - Publishing a track from `MoqClient` (the namespace is announced for you)
//! - The server subscribing back and printing every object it receives
//!
//! # Flow
//!
//! ```text
//!   MoqClient                         MoqServer
//!      │ ── ClientSetup ──────────────>  │
//!      │ <────────────── ServerSetup ──  │
//!      │ ── Announce live/demo ───────>  │  resolve_announce(Ok)
//!      │ <──────────────── AnnounceOk ─  │
//!      │ <────────── Subscribe clock ──  │  subscribe_track
//!      │ ── SubscribeOk ──────────────>  │
//!      │ ══ objects (stream per group) ═>│  Printer
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use moqt_rs::protocol::{ObjectHeaders, ObjectStatus};
use moqt_rs::registry::{
    FullTrackName, PublishTrackHandler, PublishTrackStatus, SubscribeStatus, SubscribeTrackHandler,
};
use moqt_rs::session::{
    AnnounceResponse, ConnectionStatus, PublishObjectStatus, SessionEvent, SubscribeAttributes,
    SubscribeResponse,
};
use moqt_rs::transport::MemoryTransport;
use moqt_rs::{ClientConfig, MoqClient, MoqServer, ServerConfig};

const OBJECTS_PER_GROUP: u64 = 4;

/// Prints what the server receives
struct Printer;

impl SubscribeTrackHandler for Printer {
    fn on_status_changed(&mut self, status: SubscribeStatus) {
        println!("[server] subscription status: {:?}", status);
    }

    fn on_object_received(&mut self, headers: &ObjectHeaders, payload: Bytes) {
        println!(
            "[server] object {}/{} ({:?}): {}",
            headers.group_id,
            headers.object_id,
            headers.status,
            String::from_utf8_lossy(&payload)
        );
    }
}

struct Announcer;

impl PublishTrackHandler for Announcer {
    fn on_status_changed(&mut self, status: PublishTrackStatus) {
        println!("[client] track status: {:?}", status);
    }
}

/// Answer everything the client asks for
async fn serve(server: Arc<MoqServer>, mut events: tokio::sync::mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::ClientSetupReceived { conn_id, params, .. } => {
                println!("[server] client setup from {:?} on connection {}", params.endpoint_id, conn_id);
            }
            SessionEvent::AnnounceReceived { conn_id, namespace, .. } => {
                println!("[server] announce {}", namespace);
                server.resolve_announce(conn_id, namespace.clone(), AnnounceResponse::Ok);

                let name = FullTrackName::new(namespace, "clock");
                let status = server.subscribe_track(conn_id, name, Printer, SubscribeAttributes::default());
                tracing::debug!(conn_id = conn_id, status = ?status, "Subscribed to announced namespace");
            }
            SessionEvent::SubscribeReceived { conn_id, subscribe_id, .. } => {
                server.resolve_subscribe(conn_id, subscribe_id, SubscribeResponse::ok());
            }
            SessionEvent::StatusChanged { conn_id, status } => {
                println!("[server] connection {} is {:?}", conn_id, status);
            }
            other => tracing::trace!(event = ?other, "Server event"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("moqt_rs=info".parse()?)
                .add_directive("loopback=debug".parse()?),
        )
        .init();

    let groups: u64 = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 3,
    };

    let (server, server_events) = MoqServer::new(ServerConfig::default().endpoint_id("loopback-server"));
    let server = Arc::new(server);
    server.start();
    let serving = tokio::spawn(serve(Arc::clone(&server), server_events));

    let (client_side, server_side) = MemoryTransport::pair();
    server.accept(server_side)?;

    let (mut client, _client_events) = MoqClient::new(ClientConfig::default().endpoint_id("loopback-client"));
    client.connect(client_side);
    let status = client.wait_connected().await;
    if status != ConnectionStatus::Connected {
        return Err(format!("setup failed: {:?}", status).into());
    }

    let name = FullTrackName::from_strs(&["live", "demo"], "clock");
    let track = client
        .publish_track(name, Announcer)
        .map_err(|status| format!("publish failed: {:?}", status))?;

    // Wait for the server's subscription
    while track.status() != PublishTrackStatus::Ok {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for group in 0..groups {
        for object in 0..OBJECTS_PER_GROUP {
            let headers = if object + 1 == OBJECTS_PER_GROUP {
                ObjectHeaders::new(group, object).with_status(ObjectStatus::EndOfGroup)
            } else {
                ObjectHeaders::new(group, object)
            };
            let payload = Bytes::from(format!("tick {}.{}", group, object));
            let status = track.publish_object(headers, payload);
            if status != PublishObjectStatus::Ok {
                tracing::warn!(group = group, object = object, status = ?status, "Object not published");
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    client.disconnect();
    if let Some(metrics) = client.closed().await {
        println!(
            "[client] sent {} objects, {} bytes",
            metrics.objects_sent, metrics.bytes_sent
        );
    }

    server.stop();
    drop(server);
    serving.abort();
    Ok(())
}
