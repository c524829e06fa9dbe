//! End-to-end session routing and dispatch tests with recording fakes.

use async_trait::async_trait;
use relay_assistant::{
    AssistantClient, AssistantError, AssistantMetadata, AssistantProvider, AssistantResult,
    MessageContent, NewAssistant, NewMessage, PollPolicy, Role, Run, RunStatus, TextContent,
    ThreadMessage, UploadedFile,
};
use relay_channels::{
    Channel, ChannelResult, ChannelType, InboundEvent, RelayService, ResponseChunker,
    RouterError, SessionRouter,
};
use relay_store::{MemoryThreadStore, PersistenceError, Session, StoreResult, ThreadStore};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Fakes
// ============================================================================

type CallLog = Arc<Mutex<Vec<String>>>;

fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Provider that completes every run with a fixed reply and logs calls.
struct FakeProvider {
    log: CallLog,
    reply: Mutex<String>,
    next_thread: AtomicUsize,
    /// Threads the provider has forgotten
    deleted: Mutex<HashSet<String>>,
    /// When set, runs never leave `in_progress`
    stall_runs: bool,
    /// Artificial latency per run, to widen race windows
    run_delay: Duration,
    /// When set, thread creation fails with a 503
    fail_create: bool,
}

impl FakeProvider {
    fn new(log: CallLog, reply: &str) -> Self {
        Self {
            log,
            reply: Mutex::new(reply.to_string()),
            next_thread: AtomicUsize::new(1),
            deleted: Mutex::new(HashSet::new()),
            stall_runs: false,
            run_delay: Duration::ZERO,
            fail_create: false,
        }
    }

    fn record(&self, call: String) {
        self.log.lock().unwrap().push(call);
    }

    fn check_thread(&self, thread_id: &str) -> AssistantResult<()> {
        if self.deleted.lock().unwrap().contains(thread_id) {
            return Err(AssistantError::InvalidThread {
                thread_id: thread_id.to_string(),
            });
        }
        Ok(())
    }

    fn run(&self, thread_id: &str, status: RunStatus) -> Run {
        Run {
            id: format!("run_{thread_id}"),
            thread_id: thread_id.to_string(),
            status,
            last_error: None,
        }
    }
}

#[async_trait]
impl AssistantProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create_thread(&self) -> AssistantResult<String> {
        if self.fail_create {
            return Err(AssistantError::http(503, "service unavailable"));
        }
        let id = format!("thread_{}", self.next_thread.fetch_add(1, Ordering::SeqCst));
        self.record(format!("create_thread:{id}"));
        Ok(id)
    }

    async fn create_message(&self, thread_id: &str, message: &NewMessage) -> AssistantResult<String> {
        self.check_thread(thread_id)?;
        self.record(format!("post:{thread_id}:{}", message.content));
        Ok("msg_user".into())
    }

    async fn create_run(&self, thread_id: &str, _assistant_id: &str) -> AssistantResult<Run> {
        self.check_thread(thread_id)?;
        self.record(format!("run:{thread_id}"));
        Ok(self.run(thread_id, RunStatus::Queued))
    }

    async fn retrieve_run(&self, thread_id: &str, _run_id: &str) -> AssistantResult<Run> {
        tokio::time::sleep(self.run_delay).await;
        let status = if self.stall_runs {
            RunStatus::InProgress
        } else {
            RunStatus::Completed
        };
        Ok(self.run(thread_id, status))
    }

    async fn cancel_run(&self, thread_id: &str, _run_id: &str) -> AssistantResult<Run> {
        self.record(format!("cancel:{thread_id}"));
        Ok(self.run(thread_id, RunStatus::Cancelling))
    }

    async fn list_messages(&self, thread_id: &str, _limit: u32) -> AssistantResult<Vec<ThreadMessage>> {
        Ok(vec![ThreadMessage {
            id: "msg_reply".into(),
            role: Role::Assistant,
            content: vec![MessageContent::Text {
                text: TextContent {
                    value: self.reply.lock().unwrap().clone(),
                },
            }],
            created_at: 1,
            run_id: Some(format!("run_{thread_id}")),
        }])
    }

    async fn retrieve_assistant(&self, assistant_id: &str) -> AssistantResult<AssistantMetadata> {
        Ok(AssistantMetadata {
            id: assistant_id.into(),
            name: None,
            model: "gpt-4o-mini".into(),
            instructions: None,
            tools: vec![],
        })
    }

    async fn create_assistant(&self, _assistant: &NewAssistant) -> AssistantResult<AssistantMetadata> {
        Err(AssistantError::provider("unsupported"))
    }

    async fn upload_file(&self, _path: &Path) -> AssistantResult<UploadedFile> {
        Err(AssistantError::provider("unsupported"))
    }
}

/// Store wrapper that logs writes into the shared call log.
struct RecordingStore {
    inner: MemoryThreadStore,
    log: CallLog,
}

#[async_trait]
impl ThreadStore for RecordingStore {
    fn name(&self) -> &str {
        "recording"
    }

    async fn resolve(&self, channel_id: &str) -> StoreResult<Option<String>> {
        self.inner.resolve(channel_id).await
    }

    async fn store(&self, channel_id: &str, thread_id: &str) -> StoreResult<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("store:{channel_id}:{thread_id}"));
        self.inner.store(channel_id, thread_id).await
    }

    async fn insert_if_absent(&self, channel_id: &str, thread_id: &str) -> StoreResult<String> {
        self.log
            .lock()
            .unwrap()
            .push(format!("store:{channel_id}:{thread_id}"));
        self.inner.insert_if_absent(channel_id, thread_id).await
    }

    async fn count(&self) -> StoreResult<usize> {
        self.inner.count().await
    }

    async fn list(&self) -> StoreResult<Vec<Session>> {
        self.inner.list().await
    }
}

/// Store whose disk is gone: reads find nothing, writes fail.
struct BrokenStore;

#[async_trait]
impl ThreadStore for BrokenStore {
    fn name(&self) -> &str {
        "broken"
    }

    async fn resolve(&self, _channel_id: &str) -> StoreResult<Option<String>> {
        Ok(None)
    }

    async fn store(&self, _channel_id: &str, _thread_id: &str) -> StoreResult<()> {
        Err(PersistenceError::Task("disk full".into()))
    }

    async fn insert_if_absent(&self, _channel_id: &str, _thread_id: &str) -> StoreResult<String> {
        Err(PersistenceError::Task("disk full".into()))
    }

    async fn count(&self) -> StoreResult<usize> {
        Ok(0)
    }

    async fn list(&self) -> StoreResult<Vec<Session>> {
        Ok(Vec::new())
    }
}

/// Channel that records every send.
#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send_text(&self, channel_id: &str, text: &str) -> ChannelResult<String> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((channel_id.to_string(), text.to_string()));
        Ok(format!("sent_{}", sent.len()))
    }

    async fn health_check(&self) -> ChannelResult<()> {
        Ok(())
    }
}

struct Harness {
    log: CallLog,
    provider: Arc<FakeProvider>,
    store: Arc<RecordingStore>,
    router: Arc<SessionRouter>,
}

fn fast_policy(max_wait: Duration) -> PollPolicy {
    PollPolicy {
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(5),
        backoff_multiplier: 2,
        max_wait,
        request_timeout: Duration::from_secs(1),
        max_consecutive_errors: 2,
        cancel_on_timeout: true,
    }
}

fn harness_with(provider: FakeProvider, max_wait: Duration) -> Harness {
    let log = provider.log.clone();
    let provider = Arc::new(provider);
    let store = Arc::new(RecordingStore {
        inner: MemoryThreadStore::new(),
        log: log.clone(),
    });
    let client = Arc::new(AssistantClient::new(provider.clone(), fast_policy(max_wait)));
    let router = Arc::new(SessionRouter::new(store.clone(), client, "asst_1"));
    Harness {
        log,
        provider,
        store,
        router,
    }
}

fn harness(reply: &str) -> Harness {
    let log = CallLog::default();
    harness_with(FakeProvider::new(log, reply), Duration::from_secs(5))
}

fn position(log: &[String], prefix: &str) -> usize {
    log.iter()
        .position(|c| c.starts_with(prefix))
        .unwrap_or_else(|| panic!("no call starting with {prefix} in {log:?}"))
}

// ============================================================================
// SessionRouter
// ============================================================================

#[tokio::test]
async fn first_message_creates_and_stores_thread_before_posting() {
    let h = harness("Hi there!");

    let reply = h.router.handle("42", "Ada", "hello").await.unwrap();
    assert_eq!(reply, "Hi there!");

    let log = calls(&h.log);
    let creates = log.iter().filter(|c| c.starts_with("create_thread")).count();
    let stores = log.iter().filter(|c| c.starts_with("store:")).count();
    assert_eq!(creates, 1);
    assert_eq!(stores, 1);
    assert!(position(&log, "create_thread") < position(&log, "store:42"));
    assert!(position(&log, "store:42") < position(&log, "post:"));

    assert_eq!(
        h.store.resolve("42").await.unwrap().as_deref(),
        Some("thread_1")
    );
}

#[tokio::test]
async fn second_message_reuses_thread() {
    let h = harness("ok");

    h.router.handle("42", "Ada", "hello").await.unwrap();
    h.router.handle("42", "Ada", "again").await.unwrap();

    let log = calls(&h.log);
    assert_eq!(log.iter().filter(|c| c.starts_with("create_thread")).count(), 1);
    assert!(log.contains(&"post:thread_1:again".to_string()));

    let first = h.store.resolve("42").await.unwrap();
    let second = h.store.resolve("42").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.as_deref(), Some("thread_1"));
}

#[tokio::test]
async fn previously_stored_channel_creates_no_thread() {
    let h = harness("ok");
    h.store.inner.store("7", "thread_existing").await.unwrap();

    h.router.handle("7", "Ada", "hi").await.unwrap();

    let log = calls(&h.log);
    assert!(!log.iter().any(|c| c.starts_with("create_thread")));
    assert!(log.contains(&"post:thread_existing:hi".to_string()));
}

#[tokio::test]
async fn deleted_thread_is_replaced() {
    let h = harness("ok");
    h.store.inner.store("42", "thread_gone").await.unwrap();
    h.provider
        .deleted
        .lock()
        .unwrap()
        .insert("thread_gone".into());

    let reply = h.router.handle("42", "Ada", "hello").await.unwrap();
    assert_eq!(reply, "ok");
    assert_eq!(
        h.store.resolve("42").await.unwrap().as_deref(),
        Some("thread_1")
    );

    let log = calls(&h.log);
    assert!(position(&log, "create_thread") < position(&log, "store:42:thread_1"));
    assert!(position(&log, "store:42:thread_1") < position(&log, "post:thread_1"));
}

#[tokio::test]
async fn run_timeout_propagates_and_cancels() {
    let log = CallLog::default();
    let mut provider = FakeProvider::new(log, "never");
    provider.stall_runs = true;
    let h = harness_with(provider, Duration::from_millis(30));

    let err = h.router.handle("42", "Ada", "hello").await.unwrap_err();
    assert!(matches!(
        err,
        RouterError::Assistant(AssistantError::RunTimeout { .. })
    ));
    assert!(calls(&h.log).iter().any(|c| c.starts_with("cancel:")));
}

#[tokio::test]
async fn unstored_thread_is_never_used() {
    let log = CallLog::default();
    let provider = Arc::new(FakeProvider::new(log.clone(), "ok"));
    let client = Arc::new(AssistantClient::new(provider, fast_policy(Duration::from_secs(5))));
    let router = SessionRouter::new(Arc::new(BrokenStore), client, "asst_1");

    let err = router.handle("42", "Ada", "hello").await.unwrap_err();
    assert!(matches!(err, RouterError::Persistence(PersistenceError::Task(_))));

    let log = calls(&log);
    assert_eq!(log, vec!["create_thread:thread_1".to_string()]);
    assert!(!log.iter().any(|c| c.starts_with("post:") || c.starts_with("run:")));
}

#[tokio::test]
async fn thread_creation_failure_propagates_unmodified() {
    let log = CallLog::default();
    let mut provider = FakeProvider::new(log, "ok");
    provider.fail_create = true;
    let h = harness_with(provider, Duration::from_secs(5));

    let err = h.router.handle("42", "Ada", "hello").await.unwrap_err();
    assert!(matches!(
        err,
        RouterError::Assistant(AssistantError::Provider {
            status_code: Some(503),
            ..
        })
    ));
    assert!(calls(&h.log).is_empty());
    assert_eq!(h.store.resolve("42").await.unwrap(), None);
}

#[tokio::test]
async fn abandoned_turn_releases_channel_lock() {
    let log = CallLog::default();
    let mut provider = FakeProvider::new(log, "never");
    provider.stall_runs = true;
    let h = harness_with(provider, Duration::from_secs(60));

    let turn = h.router.handle("42", "Ada", "hello");
    assert!(tokio::time::timeout(Duration::from_millis(30), turn).await.is_err());

    assert_eq!(h.router.active_channels(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_messages_create_one_thread() {
    let log = CallLog::default();
    let mut provider = FakeProvider::new(log, "ok");
    provider.run_delay = Duration::from_millis(5);
    let h = harness_with(provider, Duration::from_secs(5));

    let mut handles = Vec::new();
    for i in 0..6 {
        let router = h.router.clone();
        handles.push(tokio::spawn(async move {
            router.handle("42", "Ada", &format!("msg {i}")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let log = calls(&h.log);
    assert_eq!(log.iter().filter(|c| c.starts_with("create_thread")).count(), 1);
    assert_eq!(log.iter().filter(|c| c.starts_with("post:thread_1")).count(), 6);

    // Each post is followed by its own run before the next post
    let turns: Vec<&String> = log
        .iter()
        .filter(|c| c.starts_with("post:") || c.starts_with("run:"))
        .collect();
    for pair in turns.chunks(2) {
        assert!(pair[0].starts_with("post:"));
        assert!(pair[1].starts_with("run:"));
    }
    assert_eq!(h.router.active_channels(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_channels_get_different_threads() {
    let h = harness("ok");

    let (a, b) = tokio::join!(
        h.router.handle("1", "Ada", "hi"),
        h.router.handle("2", "Bob", "hi")
    );
    a.unwrap();
    b.unwrap();

    let t1 = h.store.resolve("1").await.unwrap().unwrap();
    let t2 = h.store.resolve("2").await.unwrap().unwrap();
    assert_ne!(t1, t2);
}

// ============================================================================
// RelayService
// ============================================================================

fn event(channel_id: &str, text: &str) -> InboundEvent {
    InboundEvent::text(ChannelType::Cli, channel_id, "Ada", text)
}

#[tokio::test]
async fn long_reply_is_sent_in_order_as_chunks() {
    let h = harness(&"x".repeat(4500));
    let channel = Arc::new(RecordingChannel::default());
    let service = RelayService::new(h.router.clone(), channel.clone(), ResponseChunker::default());

    service.dispatch(event("42", "tell me everything"));
    service.shutdown().await;

    let sent = channel.sent.lock().unwrap().clone();
    let lengths: Vec<usize> = sent.iter().map(|(_, text)| text.chars().count()).collect();
    assert_eq!(lengths, vec![2000, 2000, 500]);
    assert!(sent.iter().all(|(channel_id, _)| channel_id == "42"));
    let joined: String = sent.iter().map(|(_, text)| text.as_str()).collect();
    assert_eq!(joined, "x".repeat(4500));
}

#[tokio::test]
async fn timeout_sends_failure_notice() {
    let log = CallLog::default();
    let mut provider = FakeProvider::new(log, "never");
    provider.stall_runs = true;
    let h = harness_with(provider, Duration::from_millis(20));
    let channel = Arc::new(RecordingChannel::default());
    let service = RelayService::new(h.router.clone(), channel.clone(), ResponseChunker::default());

    service.dispatch(event("42", "hello"));
    service.shutdown().await;

    let sent = channel.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("took too long"));
}

#[tokio::test]
async fn empty_reply_sends_nothing() {
    let h = harness("");
    let channel = Arc::new(RecordingChannel::default());
    let service = RelayService::new(h.router.clone(), channel.clone(), ResponseChunker::default());

    service.dispatch(event("42", "hello"));
    service.shutdown().await;

    // An empty text part still yields an empty reply string
    assert!(channel.sent.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn messages_in_one_channel_are_handled_in_order() {
    let log = CallLog::default();
    let mut provider = FakeProvider::new(log, "ok");
    provider.run_delay = Duration::from_millis(2);
    let h = harness_with(provider, Duration::from_secs(5));
    let channel = Arc::new(RecordingChannel::default());
    let service = RelayService::new(
        h.router.clone(),
        channel.clone(),
        ResponseChunker::new(NonZeroUsize::new(2000).unwrap()),
    );

    for i in 0..5 {
        service.dispatch(event("42", &format!("m{i}")));
    }
    service.dispatch(event("43", "other"));
    service.shutdown().await;

    // Channel 43 may win the first thread, so compare message texts only
    let posts: Vec<String> = calls(&h.log)
        .into_iter()
        .filter(|c| c.starts_with("post:"))
        .filter_map(|c| c.rsplit(':').next().map(String::from))
        .filter(|text| text != "other")
        .collect();
    let expected: Vec<String> = (0..5).map(|i| format!("m{i}")).collect();
    assert_eq!(posts, expected);

    let sent = channel.sent.lock().unwrap();
    assert_eq!(sent.iter().filter(|(c, _)| c == "42").count(), 5);
    assert_eq!(sent.iter().filter(|(c, _)| c == "43").count(), 1);
}

#[tokio::test]
async fn idle_workers_exit() {
    let h = harness("ok");
    let channel = Arc::new(RecordingChannel::default());
    let service = RelayService::new(h.router.clone(), channel.clone(), ResponseChunker::default())
        .with_idle_timeout(Duration::from_millis(20));

    service.dispatch(event("42", "hello"));
    assert_eq!(service.active_workers(), 1);

    let mut waited = Duration::ZERO;
    while service.active_workers() > 0 && waited < Duration::from_secs(2) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    assert_eq!(service.active_workers(), 0);
    assert_eq!(channel.sent.lock().unwrap().len(), 1);

    // A later message spawns a fresh worker on the same thread
    service.dispatch(event("42", "again"));
    service.shutdown().await;
    assert_eq!(channel.sent.lock().unwrap().len(), 2);
    assert!(calls(&h.log).contains(&"post:thread_1:again".to_string()));
}
