//! End-to-end correlation tests with a scripted backend peer.
//!
//! The peer side drives the [`ChannelEndpoint`] directly, the way the
//! WebSocket pump does in production, while the real receive loop routes
//! replies back to blocked callers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::oneshot;

use wsfs_bridge::{run_receive_loop, BridgeError, Correlator};
use wsfs_channel::ChannelEndpoint;
use wsfs_proto::{Command, Operation, Response, WireBytes};

const CALL_TIMEOUT: Duration = Duration::from_millis(500);

struct Harness {
    correlator: Arc<Correlator>,
    endpoint: ChannelEndpoint,
}

fn harness() -> Harness {
    let (channel, endpoint) = wsfs_channel::channel();
    endpoint.attach();
    let channel = Arc::new(channel);
    let correlator = Arc::new(Correlator::new(Arc::clone(&channel), CALL_TIMEOUT));
    tokio::spawn(run_receive_loop(channel, Arc::clone(&correlator)));
    Harness { correlator, endpoint }
}

impl Harness {
    async fn next_command(&mut self) -> Command {
        let frame = self.endpoint.next_outbound().await.expect("peer saw a command");
        serde_json::from_str(&frame).expect("command frame is valid JSON")
    }

    fn reply(&self, response: &Response) {
        let frame = serde_json::to_string(response).unwrap();
        assert!(self.endpoint.push_inbound(frame));
    }
}

#[tokio::test]
async fn out_of_order_replies_reach_their_own_callers() {
    let mut h = harness();

    let read_a = {
        let c = Arc::clone(&h.correlator);
        tokio::spawn(async move {
            c.call(Operation::Read { path: "/a".into(), length: 4, offset: 0 }).await
        })
    };
    let cmd_a = h.next_command().await;

    let read_b = {
        let c = Arc::clone(&h.correlator);
        tokio::spawn(async move {
            c.call(Operation::Read { path: "/b".into(), length: 4, offset: 0 }).await
        })
    };
    let cmd_b = h.next_command().await;

    assert_eq!(cmd_a.op.path(), "/a");
    assert_eq!(cmd_b.op.path(), "/b");

    // Reverse order: /b's data first, then /a's.
    h.reply(&Response::ok(cmd_b.id, cmd_b.op.kind(), json!({"data": "YYYY"})));
    h.reply(&Response::ok(cmd_a.id, cmd_a.op.kind(), json!({"data": "XXXX"})));

    let data_a = read_a.await.unwrap().unwrap().unwrap();
    let data_b = read_b.await.unwrap().unwrap().unwrap();
    assert_eq!(data_a["data"], "XXXX");
    assert_eq!(data_b["data"], "YYYY");
}

#[tokio::test]
async fn open_then_read_round_trip() {
    let mut h = harness();

    let open = {
        let c = Arc::clone(&h.correlator);
        tokio::spawn(async move {
            c.call(Operation::Open { path: "/a.txt".into(), flags: 0 }).await
        })
    };
    let cmd = h.next_command().await;
    h.reply(&Response::ok(cmd.id, cmd.op.kind(), json!({"fd": 7})));

    let data = open.await.unwrap().unwrap().unwrap();
    let handle: wsfs_proto::HandleReply = serde_json::from_value(data).unwrap();
    assert_eq!(handle.fd, 7);

    let read = {
        let c = Arc::clone(&h.correlator);
        tokio::spawn(async move {
            c.call(Operation::Read { path: "/a.txt".into(), length: 4, offset: 0 }).await
        })
    };
    let cmd = h.next_command().await;
    let buffer = WireBytes(b"hey!".to_vec());
    h.reply(&Response::ok(
        cmd.id,
        cmd.op.kind(),
        serde_json::to_value(wsfs_proto::ReadReply { data: buffer.clone() }).unwrap(),
    ));

    let data = read.await.unwrap().unwrap().unwrap();
    let reply: wsfs_proto::ReadReply = serde_json::from_value(data).unwrap();
    assert_eq!(reply.data, buffer);
}

#[tokio::test]
async fn short_write_count_is_reported_verbatim() {
    let mut h = harness();

    let write = {
        let c = Arc::clone(&h.correlator);
        tokio::spawn(async move {
            c.call(Operation::Write {
                path: "/a.txt".into(),
                buffer: WireBytes(vec![0u8; 16]),
                offset: 0,
            })
            .await
        })
    };
    let cmd = h.next_command().await;
    h.reply(&Response::ok(cmd.id, cmd.op.kind(), json!({"length": 9})));

    let data = write.await.unwrap().unwrap().unwrap();
    let reply: wsfs_proto::WriteReply = serde_json::from_value(data).unwrap();
    assert_eq!(reply.length, 9);
}

#[tokio::test]
async fn disconnect_resolves_every_outstanding_call() {
    let mut h = harness();

    let mut calls = Vec::new();
    for i in 0..4 {
        let c = Arc::clone(&h.correlator);
        calls.push(tokio::spawn(async move {
            c.call(Operation::Getattr { path: format!("/f{i}") }).await
        }));
    }
    for _ in 0..4 {
        h.next_command().await;
    }

    h.endpoint.detach();

    for call in calls {
        assert!(matches!(
            call.await.unwrap().unwrap_err(),
            BridgeError::ChannelClosed
        ));
    }
    assert_eq!(h.correlator.pending_count(), 0);
}

#[tokio::test]
async fn calls_resume_after_a_replacement_peer_attaches() {
    let mut h = harness();

    h.endpoint.detach();
    // Give the receive loop a moment to observe the closure.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = h
        .correlator
        .call(Operation::Getattr { path: "/x".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::ChannelClosed));

    h.endpoint.attach();

    let call = {
        let c = Arc::clone(&h.correlator);
        tokio::spawn(async move { c.call(Operation::Getattr { path: "/x".into() }).await })
    };
    let cmd = h.next_command().await;
    h.reply(&Response::ok(cmd.id, cmd.op.kind(), json!({"mode": 33188, "size": 1})));

    let data = call.await.unwrap().unwrap().unwrap();
    assert_eq!(data["size"], 1);
}

#[tokio::test]
async fn late_reply_after_timeout_never_reaches_a_new_caller() {
    let mut h = harness();

    let first = {
        let c = Arc::clone(&h.correlator);
        tokio::spawn(async move { c.call(Operation::Getattr { path: "/slow".into() }).await })
    };
    let slow_cmd = h.next_command().await;
    assert!(matches!(
        first.await.unwrap().unwrap_err(),
        BridgeError::Timeout
    ));

    // Start a second same-kind call, then deliver the stale reply.
    let (started_tx, started_rx) = oneshot::channel();
    let second = {
        let c = Arc::clone(&h.correlator);
        tokio::spawn(async move {
            let call = c.call(Operation::Getattr { path: "/slow".into() });
            let _ = started_tx.send(());
            call.await
        })
    };
    started_rx.await.unwrap();
    let second_cmd = h.next_command().await;

    h.reply(&Response::ok(slow_cmd.id, slow_cmd.op.kind(), json!({"mode": 1, "size": 666})));
    h.reply(&Response::ok(
        second_cmd.id,
        second_cmd.op.kind(),
        json!({"mode": 33188, "size": 5}),
    ));

    let data = second.await.unwrap().unwrap().unwrap();
    assert_eq!(data["size"], 5);
}
