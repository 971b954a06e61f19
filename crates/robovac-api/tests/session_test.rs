// Session tests against a simulated device on an in-memory duplex stream.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::broadcast;
use tokio::time::Instant;

use robovac_api::frame::{self, Frame};
use robovac_api::{
    Cipher, CommandCode, ConnectionState, DeviceKey, DpsMap, Error, FrameDecoder, FrameKind,
    InboundFrame, Session, SessionConfig, SessionEvent,
};

// ── Helpers ─────────────────────────────────────────────────────────

const LOCAL_KEY: &str = "0123456789abcdef";
const DEVICE_ID: &str = "eb0123456789abcdefgh";

fn cipher() -> Cipher {
    Cipher::new(DeviceKey::from_local_key(LOCAL_KEY).unwrap())
}

fn session() -> Session {
    Session::new(
        SessionConfig::new(DEVICE_ID, "127.0.0.1"),
        DeviceKey::from_local_key(LOCAL_KEY).unwrap(),
    )
}

/// The device end of the pipe.
struct Device {
    stream: DuplexStream,
    decoder: FrameDecoder,
    cipher: Cipher,
}

impl Device {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(cipher()),
            cipher: cipher(),
        }
    }

    /// Next frame from the client, or `None` once the client hangs up.
    async fn recv(&mut self) -> Option<Frame> {
        let mut buf = [0u8; 1024];
        loop {
            if let Some(frame) = self.decoder.next_frame().unwrap() {
                return Some(frame);
            }
            let n = self.stream.read(&mut buf).await.unwrap();
            if n == 0 {
                return None;
            }
            self.decoder.feed(&buf[..n]);
        }
    }

    async fn reply(&mut self, seq: u32, command: CommandCode, payload: Option<Value>) {
        let bytes =
            frame::encode_reply(seq, command, 0, payload.as_ref(), &self.cipher).unwrap();
        self.stream.write_all(&bytes).await.unwrap();
    }

    async fn answer_hello(&mut self) -> Frame {
        let hello = self.recv().await.unwrap();
        assert_eq!(hello.command, CommandCode::DpQuery);
        self.reply(
            hello.seq,
            CommandCode::DpQuery,
            Some(json!({ "devId": DEVICE_ID, "dps": { "8": 100, "153": "BgoAEAUyAA==" } })),
        )
        .await;
        hello
    }

    /// Answer heartbeats until the client hangs up.
    async fn serve_heartbeats(mut self) -> usize {
        let mut answered = 0;
        while let Some(frame) = self.recv().await {
            if frame.command == CommandCode::HeartBeat {
                self.reply(frame.seq, CommandCode::HeartBeat, None).await;
                answered += 1;
            }
        }
        answered
    }
}

async fn connected() -> (Session, Device) {
    let session = session();
    let (client, server) = tokio::io::duplex(8192);
    let mut device = Device::new(server);

    let (attached, _) = tokio::join!(session.attach(client), device.answer_hello());
    attached.unwrap();
    (session, device)
}

async fn next_frame(events: &mut broadcast::Receiver<SessionEvent>) -> Arc<InboundFrame> {
    let wait = async {
        loop {
            if let SessionEvent::Frame(frame) = events.recv().await.unwrap() {
                return frame;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait).await.unwrap()
}

fn status_payload(status: &str) -> Value {
    json!({ "devId": DEVICE_ID, "dps": { "153": status }, "t": 1_700_000_000 })
}

// ── Handshake ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_handshake_reaches_connected() {
    let session = session();
    let mut events = session.subscribe();
    let (client, server) = tokio::io::duplex(8192);
    let mut device = Device::new(server);

    let (attached, hello) = tokio::join!(session.attach(client), device.answer_hello());
    attached.unwrap();

    assert_eq!(session.current_state(), ConnectionState::Connected);
    let payload = hello.payload.unwrap();
    assert_eq!(payload["gwId"], DEVICE_ID);
    assert_eq!(payload["devId"], DEVICE_ID);

    assert!(matches!(
        events.recv().await.unwrap(),
        SessionEvent::Connectivity { connected: true }
    ));
    let SessionEvent::Frame(frame) = events.recv().await.unwrap() else {
        panic!("expected the hello response");
    };
    assert_eq!(frame.kind, FrameKind::QueryResponse);
    assert_eq!(frame.seq, hello.seq);
    assert_eq!(frame.dps.get(8).and_then(|v| v.as_i64()), Some(100));
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout_leaves_session_disconnected() {
    let session = session();
    let mut events = session.subscribe();
    let (client, server) = tokio::io::duplex(8192);
    let _silent = Device::new(server);

    let started = Instant::now();
    let err = session.attach(client).await.unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }), "got {err:?}");
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(session.current_state(), ConnectionState::Disconnected);
    assert!(events.try_recv().is_err());
}

// ── Sending ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_before_connect_fails_fast() {
    let session = session();
    let err = session.set_dps(&DpsMap::single(152, "AggN")).await.unwrap_err();
    assert!(matches!(err, Error::NotConnected));
}

#[tokio::test]
async fn test_sequence_numbers_increase() {
    let (session, mut device) = connected().await;

    let first = session.set_dps(&DpsMap::single(152, "AggN")).await.unwrap();
    let second = session.set_dps(&DpsMap::single(5, "pause")).await.unwrap();
    assert!(second > first);

    let frame = device.recv().await.unwrap();
    assert_eq!(frame.seq, first);
    assert_eq!(frame.command, CommandCode::Control);
    assert_eq!(frame.dps.get(152).and_then(|v| v.as_str()), Some("AggN"));
    assert_eq!(frame.payload.unwrap()["devId"], DEVICE_ID);

    let frame = device.recv().await.unwrap();
    assert_eq!(frame.seq, second);
    assert_eq!(frame.dps.get(5).and_then(|v| v.as_str()), Some("pause"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sends_get_distinct_increasing_sequences() {
    const SENDS: usize = 16;
    let (session, mut device) = connected().await;

    let mut sends = tokio::task::JoinSet::new();
    for n in 0..SENDS {
        let session = session.clone();
        sends.spawn(async move {
            let room = i64::try_from(n).unwrap();
            session.set_dps(&DpsMap::single(170, room)).await
        });
    }

    let mut returned = Vec::with_capacity(SENDS);
    while let Some(joined) = sends.join_next().await {
        returned.push(joined.unwrap().unwrap());
    }

    let mut on_wire = Vec::with_capacity(SENDS);
    while on_wire.len() < SENDS {
        let frame = device.recv().await.unwrap();
        if frame.command == CommandCode::Control {
            on_wire.push(frame.seq);
        }
    }

    assert!(
        on_wire.windows(2).all(|pair| pair[0] < pair[1]),
        "wire order {on_wire:?}"
    );
    returned.sort_unstable();
    assert_eq!(returned, on_wire);
}

#[tokio::test]
async fn test_sequence_survives_reattach() {
    let (session, device) = connected().await;
    let before = session.query().await.unwrap();
    drop(device);

    let (client, server) = tokio::io::duplex(8192);
    let mut device = Device::new(server);
    let (attached, hello) = tokio::join!(session.attach(client), device.answer_hello());
    attached.unwrap();

    assert!(hello.seq > before);
    assert!(session.is_connected());
}

// ── Inbound frames ──────────────────────────────────────────────────

#[tokio::test]
async fn test_query_and_wait_skips_gratuitous_updates() {
    let (session, mut device) = connected().await;

    let device_side = async {
        let query = device.recv().await.unwrap();
        assert_eq!(query.command, CommandCode::DpQuery);
        device
            .reply(0, CommandCode::Status, Some(status_payload("BgoAEAUyAA==")))
            .await;
        device
            .reply(
                query.seq,
                CommandCode::DpQuery,
                Some(json!({ "devId": DEVICE_ID, "dps": { "8": 42 } })),
            )
            .await;
    };

    let (dps, ()) = tokio::join!(session.query_and_wait(Duration::from_secs(5)), device_side);
    let dps = dps.unwrap();
    assert_eq!(dps.get(8).and_then(|v| v.as_i64()), Some(42));
    assert!(!dps.contains(153));
}

#[tokio::test]
async fn test_gratuitous_update_is_broadcast() {
    let (session, mut device) = connected().await;
    let mut events = session.subscribe();

    device
        .reply(0, CommandCode::Status, Some(status_payload("BgoQBQIAAg==")))
        .await;

    let frame = next_frame(&mut events).await;
    assert_eq!(frame.kind, FrameKind::GratuitousUpdate);
    assert_eq!(frame.command, CommandCode::Status);
    assert_eq!(frame.return_code, Some(0));
    assert_eq!(frame.dps.get(153).and_then(|v| v.as_str()), Some("BgoQBQIAAg=="));
}

#[tokio::test]
async fn test_corrupt_frame_is_dropped() {
    let (session, mut device) = connected().await;
    let mut events = session.subscribe();

    let mut corrupt = frame::encode_reply(
        0,
        CommandCode::Status,
        0,
        Some(&status_payload("AggN")),
        &cipher(),
    )
    .unwrap();
    let crc_at = corrupt.len() - 8;
    corrupt[crc_at] ^= 0xff;
    device.stream.write_all(&corrupt).await.unwrap();
    device
        .reply(0, CommandCode::Status, Some(status_payload("AggO")))
        .await;

    let frame = next_frame(&mut events).await;
    assert_eq!(frame.dps.get(153).and_then(|v| v.as_str()), Some("AggO"));
    assert!(session.is_connected());
}

// ── Disconnects ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_device_hangup_disconnects() {
    let (session, device) = connected().await;
    let mut events = session.subscribe();
    let mut state = session.state();

    drop(device);

    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(matches!(
        events.recv().await.unwrap(),
        SessionEvent::Connectivity { connected: false }
    ));
    assert!(matches!(
        session.query().await,
        Err(Error::NotConnected)
    ));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (session, _device) = connected().await;
    let mut events = session.subscribe();

    session.close().await;
    session.close().await;

    assert_eq!(session.current_state(), ConnectionState::Disconnected);
    assert!(matches!(
        events.try_recv(),
        Ok(SessionEvent::Connectivity { connected: false })
    ));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_dropping_last_handle_closes_connection() {
    let (session, mut device) = connected().await;
    let other = session.clone();

    drop(session);
    other.set_dps(&DpsMap::single(5, "pause")).await.unwrap();
    assert_eq!(device.recv().await.unwrap().command, CommandCode::Control);

    drop(other);
    let hung_up = tokio::time::timeout(Duration::from_secs(5), device.recv()).await;
    assert!(matches!(hung_up, Ok(None)), "device still connected");
}

// ── Keepalive ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_silent_device_times_out_once() {
    let (session, mut device) = connected().await;
    let mut events = session.subscribe();
    let mut state = session.state();
    let started = Instant::now();

    let heartbeats = tokio::spawn(async move {
        let mut seen = 0;
        while let Some(frame) = device.recv().await {
            if frame.command == CommandCode::HeartBeat {
                assert!(frame.payload.is_none());
                seen += 1;
            }
        }
        seen
    });

    state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(19), "dropped after {elapsed:?}");
    assert!(elapsed <= Duration::from_secs(21), "dropped after {elapsed:?}");

    // Heartbeats at 9s and 18s went unanswered.
    assert_eq!(heartbeats.await.unwrap(), 2);

    tokio::time::sleep(Duration::from_secs(60)).await;
    let mut drops = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::Connectivity { connected: false }) {
            drops += 1;
        }
    }
    assert_eq!(drops, 1);
}

#[tokio::test(start_paused = true)]
async fn test_answered_heartbeats_keep_session_alive() {
    let (session, device) = connected().await;
    let mut events = session.subscribe();
    let server = tokio::spawn(device.serve_heartbeats());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(session.is_connected());

    let mut pings = 0;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Frame(frame) = event {
            assert_eq!(frame.kind, FrameKind::PingResponse);
            pings += 1;
        }
    }
    assert!(pings >= 5, "only {pings} ping responses");

    session.close().await;
    assert!(server.await.unwrap() >= 5);
}
