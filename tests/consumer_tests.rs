
use std::sync::Arc;
use std::time::Duration;

use codeexec_worker::job::{ExecutionOutcome, ExecutionStatus, JobStatus};
use codeexec_worker::queue::{InMemoryQueue, JobQueue};
use codeexec_worker::store::InMemoryStore;
use codeexec_worker::worker::MessageDisposition;
use test_harness::{consumer, job_body, success, ScriptedSandbox};
use tokio_util::sync::CancellationToken;

fn setup() -> (Arc<InMemoryQueue>, Arc<InMemoryStore>, Arc<ScriptedSandbox>) {
    (
        Arc::new(InMemoryQueue::new()),
        Arc::new(InMemoryStore::new()),
        Arc::new(ScriptedSandbox::new()),
    )
}

#[tokio::test]
async fn test_malformed_message_is_acknowledged_without_write() {
    let (queue, store, sandbox) = setup();
    let consumer = consumer(queue.clone(), store.clone(), sandbox.clone());
    let id = queue.push_body("{this is not json");

    let msg = queue.receive().await.unwrap().remove(0);
    let disposition = consumer.process_message(&msg).await;

    assert_eq!(disposition, MessageDisposition::Discarded);
    assert_eq!(queue.acknowledged(), vec![id]);
    assert_eq!(store.put_attempts(), 0);
    assert_eq!(sandbox.call_count(), 0);
}

#[tokio::test]
async fn test_json_array_body_is_malformed() {
    let (queue, store, sandbox) = setup();
    let consumer = consumer(queue.clone(), store.clone(), sandbox);
    queue.push_body(r#"["python", "print(1)"]"#);

    let msg = queue.receive().await.unwrap().remove(0);
    assert_eq!(
        consumer.process_message(&msg).await,
        MessageDisposition::Discarded
    );
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_unsupported_language_writes_one_error_record() {
    let (queue, store, sandbox) = setup();
    let consumer = consumer(queue.clone(), store.clone(), sandbox.clone());
    queue.push_body(job_body("job-haskell", "haskell", "main = print 1", Some(5.0)));

    let msg = queue.receive().await.unwrap().remove(0);
    let disposition = consumer.process_message(&msg).await;

    assert_eq!(disposition, MessageDisposition::Rejected);
    assert!(queue.is_empty());
    assert_eq!(sandbox.call_count(), 0);
    assert_eq!(store.len(), 1);
    assert_eq!(store.put_attempts(), 1);

    let record = store.record("job-haskell").unwrap();
    assert_eq!(record.status, JobStatus::Error);
    assert_eq!(record.language, "haskell");
    assert_eq!(record.exit_code, Some(-1));
    assert!(record.error.starts_with("Validation error:"));
    assert!(record.error.contains("language"));
    assert!(record.error.contains("haskell"));
}

#[tokio::test]
async fn test_oversized_code_is_rejected_by_size_alone() {
    let (queue, store, sandbox) = setup();
    let consumer = consumer(queue.clone(), store.clone(), sandbox.clone());
    let code = "x".repeat(10 * 1024 + 1);
    queue.push_body(job_body("job-big", "python", &code, Some(1.0)));

    let msg = queue.receive().await.unwrap().remove(0);
    assert_eq!(
        consumer.process_message(&msg).await,
        MessageDisposition::Rejected
    );
    assert_eq!(sandbox.call_count(), 0);
    assert!(store.record("job-big").unwrap().error.contains("code"));
}

#[tokio::test]
async fn test_timeout_boundary() {
    let (queue, store, sandbox) = setup();
    let consumer = consumer(queue.clone(), store.clone(), sandbox.clone());
    queue.push_body(job_body("at-max", "python", "pass", Some(10.0)));
    queue.push_body(job_body("over-max", "python", "pass", Some(10.001)));
    queue.push_body(job_body("zero", "python", "pass", Some(0.0)));

    for _ in 0..3 {
        let msg = queue.receive().await.unwrap().remove(0);
        consumer.process_message(&msg).await;
    }

    assert_eq!(store.record("at-max").unwrap().status, JobStatus::Success);
    let over = store.record("over-max").unwrap();
    assert_eq!(over.status, JobStatus::Error);
    assert!(over.error.contains("timeout"));
    assert_eq!(store.record("zero").unwrap().status, JobStatus::Error);
    assert_eq!(sandbox.call_count(), 1);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_valid_job_is_executed_stored_and_acknowledged() {
    let (queue, store, sandbox) = setup();
    let consumer = consumer(queue.clone(), store.clone(), sandbox.clone());
    sandbox.push_outcome(success("hello world\n"));
    queue.push_body(job_body("job-a", "python", "print('hello world')", Some(5.0)));

    let msg = queue.receive().await.unwrap().remove(0);
    let disposition = consumer.process_message(&msg).await;

    assert_eq!(
        disposition,
        MessageDisposition::Completed(ExecutionStatus::Success)
    );
    assert!(queue.is_empty());

    let calls = sandbox.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].code, "print('hello world')");
    assert_eq!(calls[0].timeout, Duration::from_secs(5));

    let record = store.record("job-a").unwrap();
    assert_eq!(record.status, JobStatus::Success);
    assert_eq!(record.output, "hello world\n");
    assert_eq!(record.exit_code, Some(0));
    assert_eq!(record.worker_id.as_deref(), Some("worker-test"));
    assert_eq!(record.submitted_at.as_deref(), Some("2024-05-01T10:00:00"));
}

#[tokio::test]
async fn test_missing_timeout_runs_with_maximum() {
    let (queue, store, sandbox) = setup();
    let consumer = consumer(queue.clone(), store, sandbox.clone());
    queue.push_body(job_body("job-default", "ruby", "puts 1", None));

    let msg = queue.receive().await.unwrap().remove(0);
    consumer.process_message(&msg).await;

    assert_eq!(sandbox.calls()[0].timeout, Duration::from_secs(10));
}

#[tokio::test]
async fn test_body_with_both_timeout_keys_runs_with_timeout() {
    let (queue, store, sandbox) = setup();
    let consumer = consumer(queue.clone(), store.clone(), sandbox.clone());
    let body = serde_json::json!({
        "job_id": "job-both",
        "language": "python",
        "code": "print(1)",
        "timeout": 5,
        "timeout_seconds": 3,
    });
    queue.push_body(body.to_string());

    let msg = queue.receive().await.unwrap().remove(0);
    let disposition = consumer.process_message(&msg).await;

    assert_eq!(disposition, MessageDisposition::Completed(ExecutionStatus::Success));
    assert_eq!(sandbox.calls()[0].timeout, Duration::from_secs(5));
    assert_eq!(store.len(), 1);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_huge_unsupported_language_still_gets_bounded_record() {
    let (queue, store, sandbox) = setup();
    let consumer = consumer(queue.clone(), store.clone(), sandbox.clone());
    queue.push_body(job_body("job-huge-lang", &"x".repeat(200_000), "1", Some(1.0)));

    let msg = queue.receive().await.unwrap().remove(0);
    let disposition = consumer.process_message(&msg).await;

    assert_eq!(disposition, MessageDisposition::Rejected);
    assert_eq!(sandbox.call_count(), 0);
    let record = store.record("job-huge-lang").unwrap();
    assert_eq!(record.status, JobStatus::Error);
    assert!(record.error.len() <= 4000);
    assert!(record.language.len() <= 64);
    assert!(record.error.contains("language"));
}

#[tokio::test]
async fn test_sandbox_error_outcome_is_terminal() {
    let (queue, store, sandbox) = setup();
    let consumer = consumer(queue.clone(), store.clone(), sandbox.clone());
    sandbox.push_outcome(ExecutionOutcome::exited(
        1,
        String::new(),
        "SyntaxError: '(' was never closed".to_string(),
        40,
    ));
    queue.push_body(job_body("job-b", "python", "print(invalid syntax", Some(5.0)));

    let msg = queue.receive().await.unwrap().remove(0);
    assert_eq!(
        consumer.process_message(&msg).await,
        MessageDisposition::Completed(ExecutionStatus::Error)
    );
    assert!(queue.is_empty());
    let record = store.record("job-b").unwrap();
    assert_eq!(record.status, JobStatus::Error);
    assert_eq!(record.exit_code, Some(1));
    assert!(!record.error.is_empty());
}

#[tokio::test]
async fn test_store_outage_then_redelivery_yields_single_record() {
    let queue = Arc::new(InMemoryQueue::new().with_visibility_timeout(Duration::from_millis(20)));
    let store = Arc::new(InMemoryStore::new());
    let sandbox = Arc::new(ScriptedSandbox::new());
    let consumer = consumer(queue.clone(), store.clone(), sandbox.clone());

    sandbox.push_outcome(success("first run\n"));
    sandbox.push_outcome(success("second run\n"));
    let id = queue.push_body(job_body("job-retry", "python", "print(1)", Some(2.0)));

    // Every write attempt of the first delivery fails.
    store.fail_next_puts(3);
    let first = queue.receive().await.unwrap().remove(0);
    assert_eq!(
        consumer.process_message(&first).await,
        MessageDisposition::Retained
    );
    assert_eq!(store.put_attempts(), 3);
    assert!(store.record("job-retry").is_none());
    assert_eq!(queue.len(), 1);

    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = queue.receive().await.unwrap().remove(0);
    assert_eq!(second.receive_count, 2);
    assert_eq!(
        consumer.process_message(&second).await,
        MessageDisposition::Completed(ExecutionStatus::Success)
    );

    assert_eq!(sandbox.call_count(), 2);
    assert_eq!(store.len(), 1);
    assert_eq!(store.record("job-retry").unwrap().output, "second run\n");
    assert_eq!(queue.acknowledged(), vec![id]);
}

#[tokio::test]
async fn test_duplicate_delivery_overwrites_same_record() {
    let (queue, store, sandbox) = setup();
    let consumer = consumer(queue.clone(), store.clone(), sandbox.clone());
    let body = job_body("job-dup", "javascript", "console.log(1)", Some(3.0));
    queue.push_body(body.clone());
    queue.push_body(body);

    let token = CancellationToken::new();
    consumer.poll_once(&token).await.unwrap();
    let once = store.record("job-dup").unwrap();
    consumer.poll_once(&token).await.unwrap();
    let twice = store.record("job-dup").unwrap();

    assert_eq!(store.len(), 1);
    assert_eq!(once.status, twice.status);
    assert_eq!(once.output, twice.output);
    assert_eq!(once.exit_code, twice.exit_code);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_poll_once_processes_whole_batch_in_order() {
    let queue = Arc::new(InMemoryQueue::new().with_max_messages(3));
    let store = Arc::new(InMemoryStore::new());
    let sandbox = Arc::new(ScriptedSandbox::new());
    let consumer = consumer(queue.clone(), store.clone(), sandbox.clone());
    for i in 0..3 {
        queue.push_body(job_body(&format!("job-{i}"), "go", &format!("// {i}"), Some(1.0)));
    }

    let handled = consumer.poll_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(handled, 3);
    let codes: Vec<String> = sandbox.calls().into_iter().map(|c| c.code).collect();
    assert_eq!(codes, vec!["// 0", "// 1", "// 2"]);
    assert_eq!(store.len(), 3);
    assert!(queue.is_empty());
}
