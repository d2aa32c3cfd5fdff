//! Tests for the queue drain protocol.

use super::*;
use crate::config::InMemorySettings;
use crate::message::{RawMessage, ReceiptHandle};
use crate::providers::InMemoryTransport;
use crate::transport::{MockQueueTransport, QueueResolver};

fn drain_settings() -> DrainSettings {
    DrainSettings {
        settle_interval_ms: 10,
        batch_size: 10,
        max_rounds: 100,
    }
}

async fn memory_queue(name: &str) -> (InMemoryTransport, QueueUrl) {
    let transport = InMemoryTransport::new(InMemorySettings::default());
    let queue = transport.resolve_queue_url(name).await.unwrap();
    (transport, queue)
}

async fn fill(transport: &InMemoryTransport, queue: &QueueUrl, count: usize) {
    for i in 0..count {
        transport.send(queue, format!("m{}", i)).await.unwrap();
    }
}

fn raw(receipt: &str) -> RawMessage {
    RawMessage {
        payload: "{}".to_string(),
        receipt_handle: ReceiptHandle::new(receipt.to_string()),
    }
}

fn provider_error() -> TransportError {
    TransportError::ProviderError {
        code: "AccessDenied".to_string(),
        message: "not permitted".to_string(),
    }
}

// ============================================================================
// In-Memory Drain Tests
// ============================================================================

mod in_memory {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_performs_no_deletes() {
        let (transport, queue) = memory_queue("empty").await;
        let drain = QueueDrain::new(Arc::new(transport.clone()), drain_settings());

        let report = drain.drain(&queue).await.unwrap();

        assert_eq!(report.purge, PurgeOutcome::Purged);
        assert!(!report.used_fallback());
        assert_eq!(report.removed, 0);
        assert_eq!(transport.deleted_count(&queue), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_purge_empties_queue() {
        let (transport, queue) = memory_queue("purged").await;
        fill(&transport, &queue, 7).await;
        let drain = QueueDrain::new(Arc::new(transport.clone()), drain_settings());

        let report = drain.drain(&queue).await.unwrap();

        assert_eq!(report.purge, PurgeOutcome::Purged);
        assert_eq!(report.rounds, 0);
        assert_eq!(transport.visible_count(&queue), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_purge_falls_back_to_manual_drain() {
        let (transport, queue) = memory_queue("fallback").await;
        transport.purge(&queue).await.unwrap();
        fill(&transport, &queue, 6).await;
        let drain = QueueDrain::new(Arc::new(transport.clone()), drain_settings());

        let report = drain.drain(&queue).await.unwrap();

        assert_eq!(report.purge, PurgeOutcome::AlreadyInProgress);
        assert_eq!(report.rounds, 1);
        assert_eq!(report.removed, 6);
        assert_eq!(report.last_approximate_count, 0);
        assert_eq!(transport.deleted_count(&queue), Some(6));
        assert_eq!(transport.visible_count(&queue), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_drain_uses_multiple_batches() {
        let (transport, queue) = memory_queue("batches").await;
        transport.purge(&queue).await.unwrap();
        fill(&transport, &queue, 25).await;
        let drain = QueueDrain::new(Arc::new(transport.clone()), drain_settings());

        let report = drain.drain(&queue).await.unwrap();

        assert_eq!(report.rounds, 3);
        assert_eq!(report.removed, 25);
        assert_eq!(transport.visible_count(&queue), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_drain_is_idempotent() {
        let (transport, queue) = memory_queue("twice").await;
        fill(&transport, &queue, 3).await;
        let drain = QueueDrain::new(Arc::new(transport.clone()), drain_settings());

        drain.drain(&queue).await.unwrap();
        let second = drain.drain(&queue).await.unwrap();

        assert_eq!(second.purge, PurgeOutcome::AlreadyInProgress);
        assert!(!second.used_fallback());
        assert_eq!(second.removed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_messages_are_left_alone() {
        let (transport, queue) = memory_queue("in-flight").await;
        transport.purge(&queue).await.unwrap();
        fill(&transport, &queue, 2).await;
        transport.receive(&queue, 1).await.unwrap();
        let drain = QueueDrain::new(Arc::new(transport.clone()), drain_settings());

        let report = drain.drain(&queue).await.unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(transport.in_flight_count(&queue), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_interval_precedes_every_count() {
        let (transport, queue) = memory_queue("settle").await;
        let mut settings = drain_settings();
        settings.settle_interval_ms = 1_000;
        let drain = QueueDrain::new(Arc::new(transport), settings);
        let started = tokio::time::Instant::now();

        drain.drain(&queue).await.unwrap();

        assert!(started.elapsed() >= std::time::Duration::from_millis(1_000));
    }
}

// ============================================================================
// Failure Propagation Tests
// ============================================================================

mod failures {
    use super::*;

    fn queue() -> QueueUrl {
        QueueUrl::new("https://sqs.example.com/1/input".to_string()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_purge_failure_is_fatal() {
        let mut transport = MockQueueTransport::new();
        transport
            .expect_purge()
            .times(1)
            .returning(|_| Err(provider_error()));
        transport.expect_approximate_message_count().never();
        let drain = QueueDrain::new(Arc::new(transport), drain_settings());

        let result = drain.drain(&queue()).await;

        match result {
            Err(HarnessError::DrainFailed {
                source: DrainError::Purge(cause),
                ..
            }) => assert_eq!(cause, provider_error()),
            other => panic!("expected purge failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_failure_is_reported() {
        let mut transport = MockQueueTransport::new();
        transport.expect_purge().returning(|_| Ok(()));
        transport
            .expect_approximate_message_count()
            .returning(|_| Err(provider_error()));
        let drain = QueueDrain::new(Arc::new(transport), drain_settings());

        let result = drain.drain(&queue()).await;

        assert!(matches!(
            result,
            Err(HarnessError::DrainFailed {
                source: DrainError::Count(_),
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_failure_is_reported() {
        let mut transport = MockQueueTransport::new();
        transport.expect_purge().returning(|queue| {
            Err(TransportError::PurgeInProgress {
                queue: queue.to_string(),
            })
        });
        transport
            .expect_approximate_message_count()
            .returning(|_| Ok(3));
        transport
            .expect_receive()
            .returning(|_, _| Err(TransportError::ConnectionFailed {
                message: "reset".to_string(),
            }));
        let drain = QueueDrain::new(Arc::new(transport), drain_settings());

        let result = drain.drain(&queue()).await;

        assert!(matches!(
            result,
            Err(HarnessError::DrainFailed {
                source: DrainError::Receive(_),
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_failure_is_reported() {
        let mut transport = MockQueueTransport::new();
        transport.expect_purge().returning(|queue| {
            Err(TransportError::PurgeInProgress {
                queue: queue.to_string(),
            })
        });
        transport
            .expect_approximate_message_count()
            .returning(|_| Ok(1));
        transport
            .expect_receive()
            .returning(|_, _| Ok(vec![raw("r-1")]));
        transport
            .expect_delete()
            .times(1)
            .returning(|_, receipt| {
                Err(TransportError::ReceiptNotFound {
                    receipt: receipt.to_string(),
                })
            });
        let drain = QueueDrain::new(Arc::new(transport), drain_settings());

        let result = drain.drain(&queue()).await;

        assert!(matches!(
            result,
            Err(HarnessError::DrainFailed {
                source: DrainError::Delete(TransportError::ReceiptNotFound { .. }),
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_count_with_empty_receive_ends_drain() {
        let mut transport = MockQueueTransport::new();
        transport.expect_purge().returning(|_| Ok(()));
        transport
            .expect_approximate_message_count()
            .times(1)
            .returning(|_| Ok(4));
        transport
            .expect_receive()
            .times(1)
            .returning(|_, _| Ok(Vec::new()));
        transport.expect_delete().never();
        let drain = QueueDrain::new(Arc::new(transport), drain_settings());

        let report = drain.drain(&queue()).await.unwrap();

        assert_eq!(report.rounds, 0);
        assert_eq!(report.last_approximate_count, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_rounds() {
        let mut transport = MockQueueTransport::new();
        transport.expect_purge().returning(|_| Ok(()));
        transport
            .expect_approximate_message_count()
            .returning(|_| Ok(5));
        transport
            .expect_receive()
            .times(2)
            .returning(|_, _| Ok(vec![raw("r")]));
        transport.expect_delete().times(2).returning(|_, _| Ok(()));
        let mut settings = drain_settings();
        settings.max_rounds = 2;
        let drain = QueueDrain::new(Arc::new(transport), settings);

        let result = drain.drain(&queue()).await;

        assert!(matches!(
            result,
            Err(HarnessError::DrainFailed {
                source: DrainError::RoundsExhausted {
                    rounds: 2,
                    remaining: 5
                },
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_uses_configured_batch_size() {
        let mut transport = MockQueueTransport::new();
        transport.expect_purge().returning(|_| Ok(()));
        let mut counts = vec![0u64, 2].into_iter();
        transport
            .expect_approximate_message_count()
            .times(2)
            .returning(move |_| Ok(counts.next_back().unwrap_or(0)));
        transport
            .expect_receive()
            .withf(|_, max| *max == 4)
            .times(1)
            .returning(|_, _| Ok(vec![raw("a"), raw("b")]));
        transport.expect_delete().times(2).returning(|_, _| Ok(()));
        let mut settings = drain_settings();
        settings.batch_size = 4;
        let drain = QueueDrain::new(Arc::new(transport), settings);

        let report = drain.drain(&queue()).await.unwrap();

        assert_eq!(report.rounds, 1);
        assert_eq!(report.removed, 2);
    }
}
