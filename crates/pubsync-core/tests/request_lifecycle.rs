//! End-to-end tests for the fetch/publish/remove request lifecycle
//!
//! Drives a Repository against the stub monitor, injecting replies and
//! timeouts the way the network correlation layer would.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{make_publication, relationships, CompletionRecorder, RecordingTransport, StubMonitor};
use pubsync_core::{
    ErrorCode, Location, PublicationDescriptor, RelationshipOracle, ReplyMessage, RepoEvent,
    Repository, RepositoryConfig, RequestMessage,
};

fn repository(monitor: &Arc<StubMonitor>) -> Arc<Repository> {
    Repository::new(
        RepositoryConfig::new(Location::new("alice/desktop")),
        monitor.clone(),
        Arc::new(RelationshipOracle),
        RecordingTransport::new(),
    )
}

const TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn test_fetch_full_document() {
    // Fetch "/docs/readme"; remote replies with the document at version 5
    let monitor = StubMonitor::new();
    let repository = repository(&monitor);
    let delegate = CompletionRecorder::new();
    let mut events = repository.events();

    let operation = repository
        .fetch(
            Arc::downgrade(&delegate) as _,
            PublicationDescriptor::named("/docs/readme"),
            TIMEOUT,
        )
        .unwrap();

    assert_eq!(repository.pending_operation_count(), 1);

    // The dispatched request carries the operation's correlation id
    let request = monitor.last_request();
    match &request {
        RequestMessage::Fetch {
            request_id,
            descriptor,
        } => {
            assert_eq!(*request_id, operation.id());
            assert_eq!(descriptor.name.as_str(), "/docs/readme");
        }
        other => panic!("unexpected request: {:?}", other),
    }

    let record = make_publication(
        "/docs/readme",
        "bob/laptop",
        relationships(&["friends"]),
        5,
        200,
        20,
    )
    .to_record();
    let reply = ReplyMessage::FetchOk {
        request_id: operation.id(),
        publication: Some(record),
    };
    assert!(monitor.deliver_reply(0, &reply));

    assert!(operation.is_complete());
    assert!(operation.was_successful());
    assert_eq!(operation.fetched_publication().unwrap().meta.version, 5);
    assert_eq!(delegate.completion_count(), 1);
    assert_eq!(repository.pending_operation_count(), 0);

    // The document-available event precedes the completion event
    assert!(matches!(
        events.try_recv().unwrap(),
        RepoEvent::PublicationAvailable { record } if record.meta.version == 5
    ));
    assert!(matches!(
        events.try_recv().unwrap(),
        RepoEvent::OperationCompleted { succeeded: true, .. }
    ));
}

#[test]
fn test_fetch_without_document_is_not_found() {
    let monitor = StubMonitor::new();
    let repository = repository(&monitor);
    let delegate = CompletionRecorder::new();

    let operation = repository
        .fetch(
            Arc::downgrade(&delegate) as _,
            PublicationDescriptor::named("/docs/missing"),
            TIMEOUT,
        )
        .unwrap();

    let reply = ReplyMessage::FetchOk {
        request_id: operation.id(),
        publication: None,
    };
    assert!(monitor.deliver_reply(0, &reply));

    let outcome = delegate.last_outcome();
    assert!(!outcome.succeeded);
    assert_eq!(outcome.code, Some(ErrorCode::NotFound));
    assert!(operation.fetched_publication().is_none());
}

#[test]
fn test_publish_advances_base_version() {
    // Base version 0, published to version 3, remote confirms 3 -> base 4
    let monitor = StubMonitor::new();
    let repository = repository(&monitor);
    let delegate = CompletionRecorder::new();

    let publication = make_publication(
        "/docs/readme",
        "alice/desktop",
        relationships(&["friends"]),
        3,
        200,
        20,
    );
    assert_eq!(publication.base_version(), 0);

    let operation = repository
        .publish(
            Arc::downgrade(&delegate) as _,
            publication.clone(),
            TIMEOUT,
        )
        .unwrap();

    match monitor.last_request() {
        RequestMessage::Publish {
            from_version, meta, ..
        } => {
            assert_eq!(from_version, 0);
            assert_eq!(meta.version, 3);
        }
        other => panic!("unexpected request: {:?}", other),
    }

    let reply = ReplyMessage::PublishOk {
        request_id: operation.id(),
        confirmed_version: 3,
    };
    assert!(monitor.deliver_reply(0, &reply));

    assert!(operation.was_successful());
    assert_eq!(publication.base_version(), 4);
}

#[test]
fn test_remove_confirmation() {
    let monitor = StubMonitor::new();
    let repository = repository(&monitor);
    let delegate = CompletionRecorder::new();

    let publication = make_publication(
        "/docs/readme",
        "alice/desktop",
        relationships(&[]),
        2,
        100,
        10,
    );
    let operation = repository
        .remove(Arc::downgrade(&delegate) as _, publication, TIMEOUT)
        .unwrap();

    let reply = ReplyMessage::RemoveOk {
        request_id: operation.id(),
    };
    assert!(monitor.deliver_reply(0, &reply));

    assert!(operation.was_successful());
    assert_eq!(delegate.completion_count(), 1);
}

#[test]
fn test_remote_error_surfaces_code_and_reason() {
    let monitor = StubMonitor::new();
    let repository = repository(&monitor);
    let delegate = CompletionRecorder::new();

    let operation = repository
        .fetch(
            Arc::downgrade(&delegate) as _,
            PublicationDescriptor::named("/docs/forbidden"),
            TIMEOUT,
        )
        .unwrap();

    let reply = ReplyMessage::Error {
        request_id: operation.id(),
        code: 403,
        reason: "not authorized".to_string(),
    };
    assert!(monitor.deliver_reply(0, &reply));

    let outcome = delegate.last_outcome();
    assert_eq!(outcome.code, Some(ErrorCode::Remote(403)));
    assert_eq!(outcome.reason.as_deref(), Some("not authorized"));
}

#[test]
fn test_timeout_fails_operation() {
    let monitor = StubMonitor::new();
    let repository = repository(&monitor);
    let delegate = CompletionRecorder::new();

    let _operation = repository
        .fetch(
            Arc::downgrade(&delegate) as _,
            PublicationDescriptor::named("/docs/slow"),
            TIMEOUT,
        )
        .unwrap();

    monitor.deliver_timeout(0);

    let outcome = delegate.last_outcome();
    assert!(!outcome.succeeded);
    assert_eq!(outcome.code, Some(ErrorCode::Timeout));
    assert_eq!(repository.pending_operation_count(), 0);
}

#[test]
fn test_late_reply_after_completion_is_unclaimed() {
    let monitor = StubMonitor::new();
    let repository = repository(&monitor);
    let delegate = CompletionRecorder::new();

    let operation = repository
        .fetch(
            Arc::downgrade(&delegate) as _,
            PublicationDescriptor::named("/docs/readme"),
            TIMEOUT,
        )
        .unwrap();

    monitor.deliver_timeout(0);
    assert_eq!(delegate.completion_count(), 1);

    // A reply racing in after the timeout must not revive the operation
    let reply = ReplyMessage::FetchOk {
        request_id: operation.id(),
        publication: None,
    };
    assert!(!monitor.deliver_reply(0, &reply));
    assert_eq!(delegate.completion_count(), 1);
    assert_eq!(
        delegate.last_outcome().code,
        Some(ErrorCode::Timeout)
    );
}

#[test]
fn test_cancel_is_idempotent() {
    let monitor = StubMonitor::new();
    let repository = repository(&monitor);
    let delegate = CompletionRecorder::new();

    let operation = repository
        .fetch(
            Arc::downgrade(&delegate) as _,
            PublicationDescriptor::named("/docs/readme"),
            TIMEOUT,
        )
        .unwrap();

    operation.cancel();
    operation.cancel();

    assert_eq!(delegate.completion_count(), 1);
    assert_eq!(delegate.last_outcome().code, Some(ErrorCode::Cancelled));
    assert_eq!(repository.pending_operation_count(), 0);
    // The monitor registration was released exactly once
    assert_eq!(monitor.cancelled().len(), 1);
}

#[test]
fn test_mismatched_reply_does_not_complete() {
    let monitor = StubMonitor::new();
    let repository = repository(&monitor);
    let delegate = CompletionRecorder::new();

    let operation = repository
        .fetch(
            Arc::downgrade(&delegate) as _,
            PublicationDescriptor::named("/docs/readme"),
            TIMEOUT,
        )
        .unwrap();

    // A publish confirmation reaching a fetch operation is ignored
    let reply = ReplyMessage::PublishOk {
        request_id: operation.id(),
        confirmed_version: 9,
    };
    assert!(!monitor.deliver_reply(0, &reply));
    assert!(!operation.is_complete());
    assert_eq!(repository.pending_operation_count(), 1);
}

#[test]
fn test_concurrent_operations_complete_independently() {
    let monitor = StubMonitor::new();
    let repository = repository(&monitor);
    let fetch_delegate = CompletionRecorder::new();
    let publish_delegate = CompletionRecorder::new();

    let fetch = repository
        .fetch(
            Arc::downgrade(&fetch_delegate) as _,
            PublicationDescriptor::named("/docs/readme"),
            TIMEOUT,
        )
        .unwrap();
    let publication = make_publication(
        "/docs/notes",
        "alice/desktop",
        relationships(&[]),
        1,
        50,
        5,
    );
    let publish = repository
        .publish(Arc::downgrade(&publish_delegate) as _, publication, TIMEOUT)
        .unwrap();

    assert_eq!(repository.pending_operation_count(), 2);

    // Complete the publish first; the fetch stays pending
    let reply = ReplyMessage::PublishOk {
        request_id: publish.id(),
        confirmed_version: 1,
    };
    assert!(monitor.deliver_reply(1, &reply));
    assert_eq!(repository.pending_operation_count(), 1);
    assert!(!fetch.is_complete());

    monitor.deliver_timeout(0);
    assert_eq!(repository.pending_operation_count(), 0);
    assert_eq!(fetch_delegate.completion_count(), 1);
    assert_eq!(publish_delegate.completion_count(), 1);
}

#[test]
fn test_released_delegate_is_skipped() {
    let monitor = StubMonitor::new();
    let repository = repository(&monitor);
    let delegate = CompletionRecorder::new();

    let operation = repository
        .fetch(
            Arc::downgrade(&delegate) as _,
            PublicationDescriptor::named("/docs/readme"),
            TIMEOUT,
        )
        .unwrap();

    drop(delegate);
    monitor.deliver_timeout(0);

    // Completion is recorded even with nobody listening
    assert!(operation.is_complete());
    assert!(!operation.was_successful());
}

#[test]
fn test_shutdown_cancels_pending_operations() {
    let monitor = StubMonitor::new();
    let repository = repository(&monitor);
    let delegate = CompletionRecorder::new();

    let _operation = repository
        .fetch(
            Arc::downgrade(&delegate) as _,
            PublicationDescriptor::named("/docs/readme"),
            TIMEOUT,
        )
        .unwrap();

    repository.shutdown();

    assert_eq!(delegate.completion_count(), 1);
    assert_eq!(delegate.last_outcome().code, Some(ErrorCode::Cancelled));
    assert_eq!(repository.pending_operation_count(), 0);

    // The repository refuses new work after shutdown
    let result = repository.fetch(
        Arc::downgrade(&delegate) as _,
        PublicationDescriptor::named("/docs/other"),
        TIMEOUT,
    );
    assert!(result.is_err());
}
