//! Registration round trip
//!
//! # Test Scenarios
//!
//! 1. **Confirmed Device**: buffered traffic is flushed in order after a 200
//! 2. **Rejected Device**: a 404 leaves the device rejected with no channel
//! 3. **Registered Device**: later traffic bypasses the buffer
//! 4. **Stray Callbacks**: unknown devices and devices in the wrong state
//! 5. **Setup Failure**: exhausted credential retries reject the device
//! 6. **Expiry and Shutdown**

use crate::test_utils::*;
use leafbridge_core::RetryConfig;
use leafbridge_crypto::CredentialProvider;
use leafbridge_identity::DeviceStatus;
use leafbridge_router::{ConfirmationOutcome, RouteAck};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_confirmed_device_flushes_buffer_in_order() {
    let gateway = TestGateway::new();

    for body in ["m1", "m2", "m3"] {
        let ack = gateway
            .router
            .route(leaf_message("sensor-01", body))
            .await
            .unwrap();
        assert!(matches!(ack, RouteAck::Buffered { .. }));
    }
    assert_eq!(gateway.status("sensor-01"), Some(DeviceStatus::AwaitingConfirmation));
    assert_eq!(gateway.pending("sensor-01"), 3);
    assert_eq!(gateway.output.registration_requests().len(), 1);

    let outcome = gateway
        .coordinator
        .on_confirmation(confirmation("sensor-01", 200))
        .await
        .unwrap();

    assert_eq!(outcome, ConfirmationOutcome::Registered { flushed: 3 });
    assert_eq!(gateway.status("sensor-01"), Some(DeviceStatus::Registered));
    assert_eq!(gateway.pending("sensor-01"), 0);
    assert_eq!(gateway.channels.opened(), 1);
    assert_eq!(gateway.channels.delivered("sensor-01"), vec!["m1", "m2", "m3"]);
}

#[tokio::test]
async fn test_registration_request_describes_gateway() {
    let gateway = TestGateway::new();
    gateway
        .router
        .route(leaf_message("sensor-01", "m1"))
        .await
        .unwrap();

    let sent = gateway.output.sent();
    assert_eq!(sent.len(), 1);
    let (output, message) = &sent[0];
    assert_eq!(output, "itmoutput");
    assert_eq!(message.content_type.as_deref(), Some("application/json"));
    assert_eq!(message.content_encoding.as_deref(), Some("utf-8"));

    let request = &gateway.output.registration_requests()[0];
    assert_eq!(request["hubHostname"], "contoso.azure-devices.net");
    assert_eq!(request["leafDeviceId"], "sensor-01");
    assert_eq!(request["edgeDeviceId"], "edge-gw-01");
    assert_eq!(request["edgeModuleId"], "IdentityTranslationLite");
    assert_eq!(request["operation"], "create");
}

#[tokio::test]
async fn test_rejected_device_gets_no_channel() {
    let gateway = TestGateway::new();
    gateway
        .router
        .route(leaf_message("sensor-02", "m1"))
        .await
        .unwrap();

    let outcome = gateway
        .coordinator
        .on_confirmation(confirmation("sensor-02", 404))
        .await
        .unwrap();

    assert!(matches!(outcome, ConfirmationOutcome::Rejected { .. }));
    assert_eq!(gateway.status("sensor-02"), Some(DeviceStatus::Rejected));
    assert_eq!(gateway.channels.opened(), 0);
    assert_eq!(gateway.pending("sensor-02"), 0);

    let ack = gateway
        .router
        .route(leaf_message("sensor-02", "m2"))
        .await
        .unwrap();
    assert!(matches!(ack, RouteAck::Undeliverable { .. }));
    assert_eq!(gateway.output.registration_requests().len(), 1);
}

#[tokio::test]
async fn test_rejected_buffer_can_be_retained() {
    let mut config = gateway_config();
    config.buffer.retain_on_rejection = true;
    let gateway = TestGateway::with_config(config);

    for body in ["m1", "m2"] {
        gateway
            .router
            .route(leaf_message("sensor-02", body))
            .await
            .unwrap();
    }
    gateway
        .coordinator
        .on_confirmation(confirmation("sensor-02", 403))
        .await
        .unwrap();

    assert_eq!(gateway.status("sensor-02"), Some(DeviceStatus::Rejected));
    assert_eq!(gateway.pending("sensor-02"), 2);
}

#[tokio::test]
async fn test_registered_device_forwards_directly() {
    let gateway = TestGateway::new();
    for body in ["m1", "m2", "m3"] {
        gateway
            .router
            .route(leaf_message("sensor-03", body))
            .await
            .unwrap();
    }
    gateway
        .coordinator
        .on_confirmation(confirmation("sensor-03", 201))
        .await
        .unwrap();

    let ack = gateway
        .router
        .route(leaf_message("sensor-03", "m4"))
        .await
        .unwrap();

    assert_eq!(ack, RouteAck::Forwarded);
    assert_eq!(gateway.pending("sensor-03"), 0);
    assert_eq!(
        gateway.channels.delivered("sensor-03"),
        vec!["m1", "m2", "m3", "m4"]
    );
    assert_eq!(gateway.output.registration_requests().len(), 1);
}

#[tokio::test]
async fn test_callback_for_unknown_device_changes_nothing() {
    let gateway = TestGateway::new();
    let outcome = gateway
        .coordinator
        .on_confirmation(confirmation("ghost", 200))
        .await
        .unwrap();

    assert_eq!(outcome, ConfirmationOutcome::UnknownDevice);
    assert_eq!(outcome.status_code(), 404);
    assert_eq!(gateway.status("ghost"), None);
    assert_eq!(gateway.channels.opened(), 0);
}

#[tokio::test]
async fn test_duplicate_confirmation_is_refused() {
    let gateway = TestGateway::new();
    gateway
        .router
        .route(leaf_message("sensor-04", "m1"))
        .await
        .unwrap();
    gateway
        .coordinator
        .on_confirmation(confirmation("sensor-04", 200))
        .await
        .unwrap();

    let outcome = gateway
        .coordinator
        .on_confirmation(confirmation("sensor-04", 200))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ConfirmationOutcome::InvalidState {
            status: DeviceStatus::Registered
        }
    );
    assert_eq!(outcome.status_code(), 409);
    assert_eq!(gateway.channels.opened(), 1);
}

#[tokio::test]
async fn test_unexpected_code_keeps_device_waiting() {
    let gateway = TestGateway::new();
    gateway
        .router
        .route(leaf_message("sensor-05", "m1"))
        .await
        .unwrap();

    let outcome = gateway
        .coordinator
        .on_confirmation(confirmation("sensor-05", 500))
        .await
        .unwrap();
    assert_eq!(outcome, ConfirmationOutcome::UnexpectedResult { code: 500 });
    assert_eq!(gateway.status("sensor-05"), Some(DeviceStatus::AwaitingConfirmation));

    let outcome = gateway
        .coordinator
        .on_confirmation(confirmation("sensor-05", 200))
        .await
        .unwrap();
    assert_eq!(outcome, ConfirmationOutcome::Registered { flushed: 1 });
}

#[tokio::test]
async fn test_credential_failure_rejects_after_retries() {
    let mut config = gateway_config();
    config.registration.retry = RetryConfig {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 1,
    };
    let credentials = Arc::new(FakeCredentials::default());
    credentials.fail_always();
    let gateway = TestGateway::with_credentials(
        config,
        Arc::clone(&credentials) as Arc<dyn CredentialProvider>,
    );

    gateway
        .router
        .route(leaf_message("sensor-06", "m1"))
        .await
        .unwrap();
    let outcome = gateway
        .coordinator
        .on_confirmation(confirmation("sensor-06", 200))
        .await
        .unwrap();

    assert!(matches!(outcome, ConfirmationOutcome::Rejected { .. }));
    assert_eq!(credentials.calls(), 3);
    assert_eq!(gateway.status("sensor-06"), Some(DeviceStatus::Rejected));
    assert_eq!(gateway.channels.opened(), 0);
}

#[tokio::test]
async fn test_unconfirmed_devices_expire() {
    let gateway = TestGateway::new();
    gateway
        .router
        .route(leaf_message("sensor-07", "m1"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let expired = gateway.coordinator.expire_pending(Duration::from_millis(5));
    assert_eq!(expired, vec!["sensor-07".to_string()]);
    assert_eq!(gateway.status("sensor-07"), Some(DeviceStatus::Rejected));

    let late = gateway
        .coordinator
        .on_confirmation(confirmation("sensor-07", 200))
        .await
        .unwrap();
    assert_eq!(
        late,
        ConfirmationOutcome::InvalidState {
            status: DeviceStatus::Rejected
        }
    );
}

#[tokio::test]
async fn test_shutdown_closes_every_channel() {
    let gateway = TestGateway::new();
    for device in ["sensor-08", "sensor-09"] {
        gateway
            .router
            .route(leaf_message(device, "m1"))
            .await
            .unwrap();
        gateway
            .coordinator
            .on_confirmation(confirmation(device, 200))
            .await
            .unwrap();
    }

    gateway.coordinator.shutdown().await;

    assert!(gateway.coordinator.is_shutting_down());
    assert_eq!(gateway.channels.closed(), 2);
}
