//! Per-device ordering and exactly-once registration under concurrency
//!
//! # Expected Outcomes
//!
//! - Concurrent first messages from one device issue exactly one request
//! - Traffic racing a confirmation is delivered in arrival order
//! - Duplicate concurrent confirmations open exactly one channel

use crate::test_utils::*;
use leafbridge_identity::DeviceStatus;
use leafbridge_router::{ConfirmationOutcome, RouteAck};
use proptest::prelude::*;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_messages_register_once() {
    let gateway = Arc::new(TestGateway::new());

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move {
                gateway
                    .router
                    .route(leaf_message("sensor-01", &format!("m{}", i)))
                    .await
            })
        })
        .collect();
    for task in tasks {
        let ack = task.await.unwrap().unwrap();
        assert!(matches!(ack, RouteAck::Buffered { .. }));
    }

    assert_eq!(gateway.output.registration_requests().len(), 1);
    assert_eq!(gateway.pending("sensor-01"), 16);
    assert_eq!(
        gateway.status("sensor-01"),
        Some(DeviceStatus::AwaitingConfirmation)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_traffic_racing_confirmation_stays_ordered() {
    let gateway = Arc::new(TestGateway::new());

    let producers: Vec<_> = (0..6)
        .map(|d| {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move {
                let device_id = format!("sensor-{:02}", d);
                let mut confirmer = None;
                for n in 0..30 {
                    gateway
                        .router
                        .route(leaf_message(&device_id, &format!("{}", n)))
                        .await
                        .unwrap();
                    if n == 4 {
                        let gateway = Arc::clone(&gateway);
                        let device_id = device_id.clone();
                        confirmer = Some(tokio::spawn(async move {
                            gateway
                                .coordinator
                                .on_confirmation(confirmation(&device_id, 200))
                                .await
                        }));
                    }
                }
                let outcome = confirmer.unwrap().await.unwrap().unwrap();
                assert!(matches!(outcome, ConfirmationOutcome::Registered { .. }));
                device_id
            })
        })
        .collect();

    let expected: Vec<String> = (0..30).map(|n| n.to_string()).collect();
    for producer in producers {
        let device_id = producer.await.unwrap();
        assert_eq!(gateway.status(&device_id), Some(DeviceStatus::Registered));
        assert_eq!(gateway.channels.delivered(&device_id), expected);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_confirmations_open_one_channel() {
    let gateway = Arc::new(TestGateway::new());
    gateway
        .router
        .route(leaf_message("sensor-01", "m1"))
        .await
        .unwrap();

    let first = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            gateway
                .coordinator
                .on_confirmation(confirmation("sensor-01", 200))
                .await
        })
    };
    let second = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            gateway
                .coordinator
                .on_confirmation(confirmation("sensor-01", 200))
                .await
        })
    };
    let outcomes = [
        first.await.unwrap().unwrap(),
        second.await.unwrap().unwrap(),
    ];

    let registered = outcomes
        .iter()
        .filter(|o| matches!(o, ConfirmationOutcome::Registered { .. }))
        .count();
    let refused = outcomes
        .iter()
        .filter(|o| matches!(o, ConfirmationOutcome::InvalidState { .. }))
        .count();
    assert_eq!((registered, refused), (1, 1));
    assert_eq!(gateway.channels.opened(), 1);
    assert_eq!(gateway.channels.delivered("sensor-01"), vec!["m1"]);
}

/// Devices sending in turn, and how many messages each sends before its
/// confirmation arrives.
fn schedule() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    (
        prop::collection::vec(0usize..3, 1..40),
        prop::collection::vec(0usize..12, 3),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_arrival_order_is_delivery_order((senders, confirm_after) in schedule()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let gateway = TestGateway::new();
            let mut sent: Vec<Vec<String>> = vec![Vec::new(); 3];

            for device in &senders {
                let device_id = format!("leaf-{}", device);
                let body = format!("{}-{}", device, sent[*device].len());
                gateway
                    .router
                    .route(leaf_message(&device_id, &body))
                    .await
                    .unwrap();
                sent[*device].push(body);

                if sent[*device].len() == confirm_after[*device] + 1 {
                    gateway
                        .coordinator
                        .on_confirmation(confirmation(&device_id, 200))
                        .await
                        .unwrap();
                }
            }

            let seen = sent.iter().filter(|s| !s.is_empty()).count();
            assert_eq!(gateway.output.registration_requests().len(), seen);

            for (device, bodies) in sent.iter().enumerate() {
                let device_id = format!("leaf-{}", device);
                if bodies.len() > confirm_after[device] {
                    assert_eq!(&gateway.channels.delivered(&device_id), bodies);
                    assert_eq!(gateway.pending(&device_id), 0);
                } else {
                    assert!(gateway.channels.delivered(&device_id).is_empty());
                    assert_eq!(gateway.pending(&device_id), bodies.len());
                }
            }
        });
    }
}
