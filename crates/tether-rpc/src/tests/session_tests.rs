//! Tests for request correlation, channels and reconnection
//!
//! Tests the client against an in-memory server including:
//! - Case conversion in both directions
//! - Concurrent requests with out-of-order responses
//! - Channel isolation between methods
//! - Liveness transitions across reconnects
//! - Which requests survive a socket close or a full outbound queue

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tether_types::{ConnectionState, Payload};

use super::fixtures::{connected, connected_default, notify, respond};
use crate::client::{ClientConfig, RpcClient};
use crate::error::ClientError;
use crate::transport::MemoryTransport;

#[tokio::test]
async fn test_inspect_ping_round_trip() {
    let mut h = connected_default().await;

    let handle = h.client.request("inspect", Some(json!({"ping": true})));
    let sent = h.peer.recv_json().await.unwrap();
    assert_eq!(sent["jsonrpc"], "2.0");
    assert_eq!(sent["method"], "inspect");
    assert_eq!(sent["params"], json!({"ping": true}));
    assert!(sent["id"].is_string());

    respond(&h.peer, &sent["id"], json!({"just_pinged": true}));
    assert_eq!(handle.await.unwrap(), json!({"justPinged": true}));
}

#[tokio::test]
async fn test_nested_params_are_snake_cased() {
    let mut h = connected_default().await;

    let _handle = h.client.request(
        "add_model",
        Some(json!({"modelInfo": {"boundingBox": [1, 2], "meshList": [{"vertexCount": 3}]}})),
    );
    let sent = h.peer.recv_json().await.unwrap();
    assert_eq!(
        sent["params"],
        json!({"model_info": {"bounding_box": [1, 2], "mesh_list": [{"vertex_count": 3}]}})
    );
}

#[tokio::test]
async fn test_many_concurrent_requests_resolve_independently() {
    let mut h = connected_default().await;

    let handles: Vec<_> = (0..8)
        .map(|i| h.client.request("echo", Some(json!({"index": i}))))
        .collect();

    let mut sent = Vec::new();
    for _ in 0..8 {
        sent.push(h.peer.recv_json().await.unwrap());
    }
    for request in sent.iter().rev() {
        respond(&h.peer, &request["id"], request["params"]["index"].clone());
    }

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), json!(i));
    }
    assert_eq!(h.client.pending_count(), 0);
}

#[tokio::test]
async fn test_cancel_one_of_many() {
    let mut h = connected_default().await;

    let keep = h.client.request("keep", None);
    let drop_me = h.client.request("drop", None);
    let keep_id = h.peer.recv_json().await.unwrap()["id"].clone();
    let drop_id = h.peer.recv_json().await.unwrap()["id"].clone();

    drop_me.cancel();
    let cancel = h.peer.recv_json().await.unwrap();
    assert_eq!(cancel["method"], "cancel");
    assert_eq!(cancel["params"], json!({"id": drop_id}));

    respond(&h.peer, &drop_id, json!("late"));
    respond(&h.peer, &keep_id, json!("kept"));

    assert!(matches!(drop_me.await, Err(ClientError::Canceled)));
    assert_eq!(keep.await.unwrap(), json!("kept"));
}

#[tokio::test]
async fn test_channels_are_isolated_and_ordered() {
    let h = connected_default().await;
    let mut camera = h.client.observe("camera_changed");
    let mut viewport = h.client.observe("viewport_changed");

    for i in 0..3 {
        notify(&h.peer, "camera_changed", json!({"frame_index": i}));
    }
    notify(&h.peer, "viewport_changed", json!({"pixel_ratio": 2}));

    for i in 0..3 {
        assert_eq!(
            camera.next().await.unwrap(),
            Payload::Json(json!({"frameIndex": i}))
        );
    }
    assert_eq!(
        viewport.next().await.unwrap(),
        Payload::Json(json!({"pixelRatio": 2}))
    );
    assert!(camera.try_recv().is_none());
}

#[tokio::test]
async fn test_every_observer_sees_each_event() {
    let h = connected_default().await;
    let mut first = h.client.observe("status");
    let mut second = h.client.observe("status");

    notify(&h.peer, "status", json!({"fps": 60}));

    assert_eq!(first.next().await.unwrap(), Payload::Json(json!({"fps": 60})));
    assert_eq!(second.next().await.unwrap(), Payload::Json(json!({"fps": 60})));
}

#[tokio::test]
async fn test_notification_without_params_publishes_null() {
    let h = connected_default().await;
    let mut reset = h.client.observe("scene_reset");

    assert!(h.peer.send_json(&json!({"jsonrpc": "2.0", "method": "scene_reset"})));
    assert_eq!(
        reset.next().await.unwrap(),
        Payload::Json(serde_json::Value::Null)
    );
}

#[tokio::test]
async fn test_custom_binary_method() {
    let mut config = ClientConfig::new("mem://render");
    config.binary_method = "image-png".to_string();
    let h = connected(config).await;
    let mut png = h.client.observe("image-png");
    let mut jpeg = h.client.observe("image-jpeg");

    assert!(h.peer.send(crate::frame::Frame::Binary(bytes::Bytes::from_static(b"\x89PNG"))));
    assert_eq!(
        png.next().await.unwrap(),
        Payload::Binary(bytes::Bytes::from_static(b"\x89PNG"))
    );
    assert!(jpeg.try_recv().is_none());
}

#[tokio::test]
async fn test_late_liveness_subscriber_sees_current_value() {
    let h = connected_default().await;
    let live = h.client.liveness();
    assert!(*live.borrow());
    assert_eq!(h.client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_server_close() {
    let mut config = ClientConfig::new("mem://render");
    config.reconnect_delay = Duration::from_secs(2);
    let mut h = connected(config).await;
    let mut live = h.client.liveness();
    assert!(*live.borrow_and_update());

    let pending = h.client.request("slow", None);
    let _ = h.peer.recv_json().await.unwrap();
    h.peer.close();

    live.changed().await.unwrap();
    assert!(!*live.borrow_and_update());
    assert!(matches!(pending.await, Err(ClientError::ConnectionClosed)));

    // Sent while down: delivered after reconnecting.
    let queued = h.client.request("inspect", Some(json!({"ping": true})));
    let mut peer = h.server.accept().await.unwrap();
    live.changed().await.unwrap();
    assert!(*live.borrow_and_update());
    assert_eq!(h.transport.attempts(), 2);
    assert_eq!(peer.url, "mem://render/ws");

    let sent = peer.recv_json().await.unwrap();
    assert_eq!(sent["method"], "inspect");
    respond(&peer, &sent["id"], json!({"just_pinged": true}));
    assert_eq!(queued.await.unwrap(), json!({"justPinged": true}));
}

#[tokio::test]
async fn test_dropping_client_stops_connection() {
    let mut h = connected_default().await;
    let handle = h.client.request("slow", None);
    let _ = h.peer.recv_json().await.unwrap();

    drop(h.client);
    assert!(matches!(handle.await, Err(ClientError::ConnectionClosed)));
    assert!(h.peer.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_request_is_not_resent_after_reconnect() {
    let mut h = connected_default().await;

    let rejected = h.client.request("add_model", Some(json!({"path": "x"})));
    let _ = h.peer.recv_json().await.unwrap();
    h.peer.close();
    assert!(matches!(rejected.await, Err(ClientError::ConnectionClosed)));

    let queued = h.client.request("inspect", None);
    assert_eq!(h.client.pending_count(), 1);

    let mut peer = h.server.accept().await.unwrap();
    let sent = peer.recv_json().await.unwrap();
    assert_eq!(sent["method"], "inspect");
    respond(&peer, &sent["id"], json!(true));
    assert_eq!(queued.await.unwrap(), json!(true));

    assert!(h.client.flush().await);
    assert!(peer.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_request_queued_across_close_stays_pending() {
    let mut config = ClientConfig::new("mem://render");
    config.reconnect_delay = Duration::from_secs(2);
    let mut h = connected(config).await;
    let mut live = h.client.liveness();

    h.peer.close();
    live.wait_for(|live| !*live).await.unwrap();
    let queued = h.client.request("add_model", Some(json!({"path": "x"})));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.client.pending_count(), 1);

    let mut peer = h.server.accept().await.unwrap();
    let sent = peer.recv_json().await.unwrap();
    assert_eq!(sent["method"], "add_model");
    respond(&peer, &sent["id"], json!({"id": "m-1"}));
    assert_eq!(queued.await.unwrap(), json!({"id": "m-1"}));
}

#[tokio::test(start_paused = true)]
async fn test_request_dropped_from_full_queue_is_rejected() {
    let (transport, mut server) = MemoryTransport::pair();
    transport.set_refuse(true);
    let mut config = ClientConfig::new("mem://render");
    config.max_queued_frames = 2;
    let client = RpcClient::with_transport(Arc::new(transport.clone()), config);
    tokio::task::yield_now().await;

    let first = client.request("first", None);
    let second = client.request("second", None);
    let third = client.request("third", None);
    assert!(matches!(first.await, Err(ClientError::QueueFull)));
    assert_eq!(client.pending_count(), 2);

    transport.set_refuse(false);
    let mut peer = server.accept().await.unwrap();
    for (handle, method) in [(second, "second"), (third, "third")] {
        let sent = peer.recv_json().await.unwrap();
        assert_eq!(sent["method"], method);
        respond(&peer, &sent["id"], json!(method));
        assert_eq!(handle.await.unwrap(), json!(method));
    }
    assert_eq!(client.pending_count(), 0);
}
