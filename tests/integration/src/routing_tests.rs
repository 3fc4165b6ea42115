//! Inbound routing: pass-through, leaf tags and buffer policies

use crate::test_utils::*;
use leafbridge_core::{Message, OverflowPolicy};
use leafbridge_identity::DeviceRepository;
use leafbridge_router::{DropReason, RouteAck, RouteError};

#[tokio::test]
async fn test_untagged_message_passes_through_verbatim() {
    let gateway = TestGateway::new();
    let message = Message::new(b"{\"temp\":21}".to_vec())
        .with_property("alert", "true")
        .with_content_type("application/json");

    let ack = gateway.router.route(message.clone()).await.unwrap();

    assert_eq!(ack, RouteAck::PassedThrough);
    assert_eq!(gateway.output.sent(), vec![("itmoutput".to_string(), message)]);
    assert!(gateway.repository.is_empty());
}

#[tokio::test]
async fn test_leaf_tags_are_stripped_before_delivery() {
    let gateway = TestGateway::new();
    let message = leaf_message("sensor-01", "m1").with_property("alert", "true");
    gateway.router.route(message).await.unwrap();
    gateway
        .coordinator
        .on_confirmation(confirmation("sensor-01", 200))
        .await
        .unwrap();

    let delivered = gateway.channels.messages("sensor-01");
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].property("alert"), Some("true"));
    assert_eq!(delivered[0].property("leafDeviceId"), None);
    assert_eq!(delivered[0].property("moduleId"), None);
}

#[tokio::test]
async fn test_tag_names_are_case_insensitive() {
    let gateway = TestGateway::new();
    let message = Message::new(b"m1".to_vec())
        .with_property("LEAFDEVICEID", "sensor-01")
        .with_property("ModuleID", SOURCE_MODULE);

    let ack = gateway.router.route(message).await.unwrap();

    assert!(matches!(ack, RouteAck::Buffered { pending: 1 }));
    assert!(gateway.repository.contains("sensor-01"));
}

#[tokio::test]
async fn test_leaf_tag_without_source_is_refused() {
    let gateway = TestGateway::new();
    let message = Message::new(b"m1".to_vec()).with_property("leafDeviceId", "sensor-01");

    let err = gateway.router.route(message).await.unwrap_err();

    assert!(matches!(err, RouteError::MissingSourceRoute { .. }));
    assert!(gateway.repository.is_empty());
    assert!(gateway.output.sent().is_empty());
}

#[tokio::test]
async fn test_empty_device_id_is_refused() {
    let gateway = TestGateway::new();
    let err = gateway
        .router
        .route(leaf_message("", "m1"))
        .await
        .unwrap_err();
    assert!(matches!(err, RouteError::EmptyDeviceId));
}

fn capped(policy: OverflowPolicy) -> TestGateway {
    let mut config = gateway_config();
    config.buffer.max_pending_messages = 2;
    config.buffer.overflow = policy;
    TestGateway::with_config(config)
}

#[tokio::test]
async fn test_overflow_reject_refuses_third_message() {
    let gateway = capped(OverflowPolicy::Reject);
    for body in ["m1", "m2"] {
        gateway
            .router
            .route(leaf_message("sensor-01", body))
            .await
            .unwrap();
    }

    let err = gateway
        .router
        .route(leaf_message("sensor-01", "m3"))
        .await
        .unwrap_err();

    assert!(matches!(err, RouteError::BufferFull { capacity: 2, .. }));
    assert_eq!(gateway.pending("sensor-01"), 2);
}

#[tokio::test]
async fn test_overflow_drop_newest_keeps_first_messages() {
    let gateway = capped(OverflowPolicy::DropNewest);
    for body in ["m1", "m2"] {
        gateway
            .router
            .route(leaf_message("sensor-01", body))
            .await
            .unwrap();
    }
    let ack = gateway
        .router
        .route(leaf_message("sensor-01", "m3"))
        .await
        .unwrap();
    assert_eq!(
        ack,
        RouteAck::Dropped {
            reason: DropReason::BufferFull
        }
    );

    gateway
        .coordinator
        .on_confirmation(confirmation("sensor-01", 200))
        .await
        .unwrap();
    assert_eq!(gateway.channels.delivered("sensor-01"), vec!["m1", "m2"]);
}

#[tokio::test]
async fn test_overflow_drop_oldest_keeps_latest_messages() {
    let gateway = capped(OverflowPolicy::DropOldest);
    for body in ["m1", "m2", "m3"] {
        let ack = gateway
            .router
            .route(leaf_message("sensor-01", body))
            .await
            .unwrap();
        assert!(matches!(ack, RouteAck::Buffered { .. }));
    }

    gateway
        .coordinator
        .on_confirmation(confirmation("sensor-01", 200))
        .await
        .unwrap();
    assert_eq!(gateway.channels.delivered("sensor-01"), vec!["m2", "m3"]);
}

#[tokio::test]
async fn test_caching_disabled_drops_until_registered() {
    let mut config = gateway_config();
    config.buffer.cache_messages_during_registration = false;
    let gateway = TestGateway::with_config(config);

    let ack = gateway
        .router
        .route(leaf_message("sensor-01", "m1"))
        .await
        .unwrap();
    assert_eq!(
        ack,
        RouteAck::Dropped {
            reason: DropReason::CachingDisabled
        }
    );
    assert_eq!(gateway.output.registration_requests().len(), 1);

    gateway
        .coordinator
        .on_confirmation(confirmation("sensor-01", 200))
        .await
        .unwrap();
    gateway
        .router
        .route(leaf_message("sensor-01", "m2"))
        .await
        .unwrap();
    assert_eq!(gateway.channels.delivered("sensor-01"), vec!["m2"]);
}

#[tokio::test]
async fn test_devices_are_tracked_independently() {
    let gateway = TestGateway::new();
    gateway
        .router
        .route(leaf_message("sensor-01", "a1"))
        .await
        .unwrap();
    gateway
        .router
        .route(leaf_message("sensor-02", "b1"))
        .await
        .unwrap();
    gateway
        .coordinator
        .on_confirmation(confirmation("sensor-02", 200))
        .await
        .unwrap();

    assert_eq!(gateway.pending("sensor-01"), 1);
    assert!(gateway.channels.delivered("sensor-01").is_empty());
    assert_eq!(gateway.channels.delivered("sensor-02"), vec!["b1"]);
    assert_eq!(gateway.output.registration_requests().len(), 2);
}
