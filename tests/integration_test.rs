use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use attachment_submit::error::{
    ActivityError, AppError, AppResult, RegistrationError, StoreError, TransportError,
};
use attachment_submit::infrastructure::{
    ActivityGuard, ExpiringActivity, MemoryAnalytics, MemoryNotifier, Notification, Notifier,
    StoreEvent, StoreObserver, SubscriptionId, TimeBoxedActivity,
};
use attachment_submit::model::{BatchId, File, FileId, UploadContext, UploadState};
use attachment_submit::services::{LocalUploadManager, ProgressSink, Transport, UploadManager};
use attachment_submit::view_model::{FileProgressListViewModel, ItemState, ListState};
use attachment_submit::{AttachmentSubmissionService, Config};
use serde_json::json;
use tokio::sync::{watch, Notify};
use tokio::time::timeout;
use url::Url;
use uuid::Uuid;

/// 按脚本上报进度的传输，可以暂停，也可以让指定文件失败
struct ScriptedTransport {
    steps: Vec<f64>,
    failing: Mutex<HashSet<String>>,
    gate: watch::Sender<bool>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    fn new(open: bool) -> Self {
        let (gate, _) = watch::channel(open);
        Self {
            steps: vec![0.25, 0.5, 0.75],
            failing: Mutex::new(HashSet::new()),
            gate,
            calls: AtomicUsize::new(0),
        }
    }

    fn fail(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn open(&self) {
        self.gate.send_replace(true);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        file: &File,
        _context: &UploadContext,
        progress: &ProgressSink,
    ) -> Result<(), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        progress.report(0.1).await?;

        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| TransportError::new("gate closed"))?;

        if self.failing.lock().unwrap().contains(&file.name) {
            return Err(TransportError::new("连接中断"));
        }
        for step in &self.steps {
            progress.report(*step).await?;
        }
        Ok(())
    }
}

/// 后台时间一开始就已用完
struct ExpiredActivity;

impl ExpiringActivity for ExpiredActivity {
    fn begin(&self, reason: &str) -> Result<ActivityGuard, ActivityError> {
        Ok(ActivityGuard::with_deadline(
            reason,
            tokio::time::Instant::now(),
        ))
    }
}

struct Harness {
    service: Arc<AttachmentSubmissionService>,
    manager: Arc<LocalUploadManager>,
    notifier: Arc<MemoryNotifier>,
    analytics: Arc<MemoryAnalytics>,
    transport: Arc<ScriptedTransport>,
    dir: PathBuf,
}

impl Harness {
    async fn new(activity: Arc<dyn ExpiringActivity>, gate_open: bool) -> Self {
        let config = Config::default();
        let notifier = Arc::new(MemoryNotifier::new());
        let analytics = Arc::new(MemoryAnalytics::new());
        let transport = Arc::new(ScriptedTransport::new(gate_open));
        let manager = Arc::new(LocalUploadManager::new(
            &config,
            attachment_submit::EntityStore::spawn(),
            transport.clone(),
            notifier.clone(),
        ));
        let service = Arc::new(AttachmentSubmissionService::new(
            manager.clone(),
            activity,
            analytics.clone(),
        ));

        let dir = std::env::temp_dir().join(format!("attachment_submit_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        Self {
            service,
            manager,
            notifier,
            analytics,
            transport,
            dir,
        }
    }

    async fn ready() -> Self {
        Self::new(Arc::new(TimeBoxedActivity::new(Duration::from_secs(30))), true).await
    }

    /// 创建本地文件并返回地址
    fn touch(&self, name: &str, bytes: usize) -> Url {
        let path = self.dir.join(name);
        std::fs::write(&path, vec![7u8; bytes]).unwrap();
        Url::from_file_path(path).unwrap()
    }

    /// 不存在的本地文件
    fn missing(&self, name: &str) -> Url {
        Url::from_file_path(self.dir.join(name)).unwrap()
    }

    async fn observe(&self, batch: &str) -> FileProgressListViewModel {
        FileProgressListViewModel::observe(
            BatchId::new(batch),
            self.manager.clone(),
            self.service.clone(),
        )
        .await
        .unwrap()
    }

    async fn files(&self, batch: &str) -> Vec<File> {
        self.manager.files(&BatchId::new(batch)).await.unwrap()
    }

    /// 记录批次的所有事件
    async fn record(&self, batch: &str) -> Arc<Mutex<Vec<StoreEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        self.manager
            .subscribe(
                &BatchId::new(batch),
                Arc::new(move |event: &StoreEvent| sink.lock().unwrap().push(event.clone())),
            )
            .await
            .unwrap();
        events
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

async fn wait_until(list: &mut FileProgressListViewModel, predicate: impl Fn(&[File]) -> bool) {
    timeout(Duration::from_secs(5), async {
        loop {
            if predicate(&list.files()) {
                return;
            }
            list.changed().await.unwrap();
        }
    })
    .await
    .expect("等待超时");
}

async fn settle(list: &mut FileProgressListViewModel) -> attachment_submit::view_model::ListSummary {
    timeout(Duration::from_secs(5), list.settled())
        .await
        .expect("等待超时")
        .unwrap()
}

fn all_uploading(files: &[File]) -> bool {
    !files.is_empty()
        && files
            .iter()
            .all(|f| matches!(f.state, UploadState::Uploading { .. }))
}

#[tokio::test]
async fn test_submit_two_files_reaches_completed() {
    let h = Harness::ready().await;
    let events = h.record("att-1").await;
    let mut list = h.observe("att-1").await;
    let urls = vec![h.touch("a.png", 2048), h.touch("b.png", 1024)];

    let report = h
        .service
        .submit(&urls, "1", "2", "att-1", None)
        .await
        .unwrap();
    assert_eq!(report.registered.len(), 2);
    assert!(!report.is_failed());

    let summary = settle(&mut list).await;
    assert_eq!(summary.state, ListState::Completed);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.total_bytes, 3072);

    let batch = h
        .manager
        .store()
        .batch(BatchId::new("att-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        batch.context.to_json(),
        json!({"kind": "submission", "courseId": "1", "assignmentId": "2"})
    );
    let names: Vec<_> = batch.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["a.png", "b.png"]);

    // 每个文件只沿合法的边迁移：Queued → Uploading(p 非递减) → Completed
    let events = events.lock().unwrap();
    for file in &batch.files {
        let states: Vec<UploadState> = events
            .iter()
            .filter(|e| e.file().id == file.id)
            .map(|e| e.file().state)
            .collect();
        assert_eq!(states.first(), Some(&UploadState::Queued));
        assert_eq!(states.last(), Some(&UploadState::Completed));
        assert!(states.iter().any(|s| matches!(s, UploadState::Uploading { .. })));
        for pair in states.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }
    drop(events);

    timeout(Duration::from_secs(5), async {
        while !h.notifier.sent().contains(&Notification::Completed {
            batch_id: BatchId::new("att-1"),
        }) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("没有收到完成通知");
    assert_eq!(h.notifier.failed_count(), 0);
}

#[tokio::test]
async fn test_registration_failure_is_aggregated() {
    let h = Harness::ready().await;
    let mut list = h.observe("att-1").await;
    let urls = vec![h.touch("a.png", 64), h.missing("b.png")];

    let report = h
        .service
        .submit(&urls, "1", "2", "att-1", None)
        .await
        .unwrap();
    assert_eq!(report.registered.len(), 1);
    assert!(report.is_failed());
    assert!(matches!(
        report.first_error(),
        Some(RegistrationError::Unreadable { uri, .. }) if uri.ends_with("b.png")
    ));
    assert_eq!(h.notifier.failed_count(), 1);
    assert_eq!(h.analytics.errors(), vec!["error_adding_submission_file"]);

    let summary = settle(&mut list).await;
    assert_eq!(summary.state, ListState::Completed);
    let files = list.files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "a.png");
    assert_eq!(files[0].state, UploadState::Completed);

    let batch = h
        .manager
        .store()
        .batch(BatchId::new("att-1"))
        .await
        .unwrap()
        .unwrap();
    assert!(batch.failed);
    assert_eq!(h.notifier.failed_count(), 1);
}

#[tokio::test]
async fn test_denied_activity_registers_nothing() {
    let h = Harness::new(Arc::new(TimeBoxedActivity::new(Duration::ZERO)), true).await;
    let urls = vec![h.touch("a.png", 64)];

    let err = h
        .service
        .submit(&urls, "1", "2", "att-1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ActivityDenied(ActivityError::Denied)));
    assert!(h.files("att-1").await.is_empty());
    assert_eq!(h.notifier.failed_count(), 1);
    assert_eq!(
        h.analytics.errors(),
        vec!["error_performing_background_activity"]
    );
    assert_eq!(h.transport.calls(), 0);
}

#[tokio::test]
async fn test_expired_activity_rolls_back_registrations() {
    let h = Harness::new(Arc::new(ExpiredActivity), true).await;
    let events = h.record("att-1").await;
    let urls = vec![h.touch("a.png", 64), h.touch("b.png", 64)];

    let err = h
        .service
        .submit(&urls, "1", "2", "att-1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ActivityDenied(ActivityError::Expired)));
    assert!(h.files("att-1").await.is_empty());
    assert_eq!(h.notifier.failed_count(), 1);
    assert_eq!(h.transport.calls(), 0);

    // 注册过的文件全部被撤销
    let events = events.lock().unwrap();
    let added = events.iter().filter(|e| matches!(e, StoreEvent::Added(_))).count();
    let removed = events.iter().filter(|e| matches!(e, StoreEvent::Removed(_))).count();
    assert_eq!(added, removed);
}

#[tokio::test]
async fn test_resubmit_supersedes_previous_batch() {
    let h = Harness::new(Arc::new(TimeBoxedActivity::new(Duration::from_secs(30))), false).await;
    let events = h.record("att-1").await;
    let mut list = h.observe("att-1").await;

    let first = h
        .service
        .submit(&[h.touch("a.png", 64), h.touch("b.png", 64)], "1", "2", "att-1", None)
        .await
        .unwrap();
    wait_until(&mut list, |files| files.len() == 2 && all_uploading(files)).await;

    let second = h
        .service
        .submit(&[h.touch("c.png", 64)], "1", "2", "att-1", Some("第二版".to_string()))
        .await
        .unwrap();
    h.transport.open();

    let summary = settle(&mut list).await;
    assert_eq!(summary.state, ListState::Completed);
    let files = h.files("att-1").await;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "c.png");
    assert!(first.registered.iter().all(|id| *id != files[0].id));

    // 第一次的文件在第二次注册之前全部移除
    let events = events.lock().unwrap();
    let position = |pred: &dyn Fn(&StoreEvent) -> bool| events.iter().position(|e| pred(e));
    let added_c = position(&|e| matches!(e, StoreEvent::Added(f) if f.id == second.registered[0]))
        .unwrap();
    for id in &first.registered {
        let removed = position(&|e| matches!(e, StoreEvent::Removed(f) if f.id == *id)).unwrap();
        assert!(removed < added_c);
    }
}

#[tokio::test]
async fn test_retry_only_touches_failed_files() {
    let h = Harness::ready().await;
    h.transport.fail("b.png");
    let mut list = h.observe("att-1").await;

    h.service
        .submit(&[h.touch("a.png", 64), h.touch("b.png", 64)], "1", "2", "att-1", None)
        .await
        .unwrap();
    let summary = settle(&mut list).await;
    assert_eq!(summary.state, ListState::Failed);

    let before = list.files();
    let a_before = before.iter().find(|f| f.name == "a.png").unwrap().clone();
    let b_before = before.iter().find(|f| f.name == "b.png").unwrap().clone();
    assert_eq!(a_before.state, UploadState::Completed);
    assert_eq!(b_before.state, UploadState::Error);
    assert_eq!(b_before.error_message.as_deref(), Some("连接中断"));

    let items = list.items();
    let b_item = items.iter().find(|i| i.file_name == "b.png").unwrap();
    assert_eq!(b_item.state, ItemState::Error);
    assert!(b_item.is_removable());

    h.transport.heal();
    list.retry().await.unwrap();
    wait_until(&mut list, |files| {
        files.iter().all(|f| f.state == UploadState::Completed)
    })
    .await;

    let after = list.files();
    let a_after = after.iter().find(|f| f.name == "a.png").unwrap();
    assert_eq!(a_after, &a_before);
    let b_after = after.iter().find(|f| f.name == "b.png").unwrap();
    assert_eq!(b_after.id, b_before.id);
    assert_eq!(b_after.error_message, None);
    assert_eq!(h.transport.calls(), 3);
}

#[tokio::test]
async fn test_delete_removes_exactly_one_file() {
    let h = Harness::ready().await;
    h.transport.fail("b.png");
    let mut list = h.observe("att-1").await;

    h.service
        .submit(
            &[h.touch("a.png", 64), h.touch("b.png", 64), h.touch("c.pdf", 64)],
            "1",
            "2",
            "att-1",
            None,
        )
        .await
        .unwrap();
    settle(&mut list).await;
    let before = list.files();

    let items = list.items();
    let b_item = items.iter().find(|i| i.file_name == "b.png").unwrap();
    b_item.remove().await.unwrap();
    wait_until(&mut list, |files| files.len() == 2).await;

    let after = list.files();
    let expected: Vec<File> = before.into_iter().filter(|f| f.name != "b.png").collect();
    assert_eq!(after, expected);
    assert_eq!(list.summary().state, ListState::Completed);

    // 移除唯一出错的文件后批次即告完成
    assert!(h.notifier.sent().contains(&Notification::Completed {
        batch_id: BatchId::new("att-1"),
    }));
    assert_eq!(h.notifier.failed_count(), 0);
}

#[tokio::test]
async fn test_cancel_removes_in_flight_batch() {
    let h = Harness::new(Arc::new(TimeBoxedActivity::new(Duration::from_secs(30))), false).await;
    let mut list = h.observe("att-1").await;

    h.service
        .submit(&[h.touch("a.png", 64), h.touch("b.png", 64)], "1", "2", "att-1", None)
        .await
        .unwrap();
    wait_until(&mut list, |files| files.len() == 2 && all_uploading(files)).await;

    list.cancel().await.unwrap();
    wait_until(&mut list, |files| files.is_empty()).await;
    assert_eq!(list.summary().state, ListState::Empty);

    // 取消是幂等的，放行后也不会有文件重新出现
    list.cancel().await.unwrap();
    h.transport.open();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.files("att-1").await.is_empty());
    assert_eq!(h.notifier.failed_count(), 0);
}

#[tokio::test]
async fn test_registration_after_cancel_is_rejected() {
    let h = Harness::ready().await;
    let batch = BatchId::new("att-1");
    let context = Arc::new(UploadContext::submission("1", "2", None));

    let generation = h.manager.begin_batch(&batch, context).await.unwrap();
    h.manager
        .add(&h.touch("a.png", 64), &batch, generation)
        .await
        .unwrap();
    h.service.cancel(&batch).await.unwrap();

    let late = h.manager.add(&h.touch("b.png", 64), &batch, generation).await;
    assert!(matches!(late, Err(RegistrationError::BatchSuperseded { .. })));
    assert!(h.files("att-1").await.is_empty());
}

#[tokio::test]
async fn test_invalid_requests_have_no_side_effects() {
    let h = Harness::ready().await;

    let empty = h.service.submit(&[], "1", "2", "att-1", None).await;
    assert!(matches!(empty, Err(AppError::InvalidRequest(_))));

    let no_course = h
        .service
        .submit(&[h.touch("a.png", 64)], "", "2", "att-1", None)
        .await;
    assert!(matches!(no_course, Err(AppError::InvalidRequest(_))));

    let not_a_file = h
        .service
        .submit(
            &[Url::parse("https://example.com/a.png").unwrap()],
            "1",
            "2",
            "att-1",
            None,
        )
        .await
        .unwrap();
    assert!(matches!(
        not_a_file.first_error(),
        Some(RegistrationError::NotAFileUrl { .. })
    ));
    assert!(h.files("att-1").await.is_empty());
    assert_eq!(h.notifier.failed_count(), 1);
}

#[tokio::test]
async fn test_comment_submission_context() {
    let h = Harness::ready().await;
    let mut list = h.observe("comment-1").await;

    h.service
        .submit_comment(&[h.touch("notes.txt", 16)], "1", "2", "comment-1", "请查收")
        .await
        .unwrap();
    settle(&mut list).await;

    let batch = h
        .manager
        .store()
        .batch(BatchId::new("comment-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        batch.context.to_json(),
        json!({"kind": "comment", "courseId": "1", "assignmentId": "2", "comment": "请查收"})
    );
}

/// 第一个文件注册后停住，直到测试放行
struct PausingManager {
    inner: Arc<LocalUploadManager>,
    adds: AtomicUsize,
    paused: Notify,
    resume: watch::Sender<bool>,
}

impl PausingManager {
    fn new(inner: Arc<LocalUploadManager>) -> Self {
        let (resume, _) = watch::channel(false);
        Self {
            inner,
            adds: AtomicUsize::new(0),
            paused: Notify::new(),
            resume,
        }
    }
}

#[async_trait]
impl UploadManager for PausingManager {
    async fn begin_batch(&self, batch_id: &BatchId, context: Arc<UploadContext>) -> AppResult<u64> {
        self.inner.begin_batch(batch_id, context).await
    }

    async fn add(
        &self,
        url: &Url,
        batch_id: &BatchId,
        generation: u64,
    ) -> Result<File, RegistrationError> {
        if self.adds.fetch_add(1, Ordering::SeqCst) == 1 {
            self.paused.notify_one();
            let mut resume = self.resume.subscribe();
            let _ = resume.wait_for(|go| *go).await;
        }
        self.inner.add(url, batch_id, generation).await
    }

    async fn upload(&self, file_id: FileId, context: Arc<UploadContext>) -> AppResult<()> {
        self.inner.upload(file_id, context).await
    }

    async fn cancel_batch(&self, batch_id: &BatchId) -> AppResult<()> {
        self.inner.cancel_batch(batch_id).await
    }

    async fn cancel_file(&self, file_id: FileId) -> AppResult<()> {
        self.inner.cancel_file(file_id).await
    }

    async fn retry(&self, batch_id: &BatchId) -> AppResult<()> {
        self.inner.retry(batch_id).await
    }

    async fn rollback(&self, file_ids: &[FileId]) -> AppResult<()> {
        self.inner.rollback(file_ids).await
    }

    async fn mark_failed(&self, batch_id: &BatchId) -> AppResult<()> {
        self.inner.mark_failed(batch_id).await
    }

    async fn is_current(&self, batch_id: &BatchId, generation: u64) -> AppResult<bool> {
        self.inner.is_current(batch_id, generation).await
    }

    async fn clear(&self, batch_id: &BatchId) -> AppResult<()> {
        self.inner.clear(batch_id).await
    }

    async fn files(&self, batch_id: &BatchId) -> AppResult<Vec<File>> {
        self.inner.files(batch_id).await
    }

    async fn subscribe(
        &self,
        batch_id: &BatchId,
        observer: Arc<dyn StoreObserver>,
    ) -> AppResult<(SubscriptionId, Vec<File>)> {
        self.inner.subscribe(batch_id, observer).await
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.unsubscribe(id)
    }

    fn notifier(&self) -> Arc<dyn Notifier> {
        self.inner.notifier()
    }
}

#[tokio::test]
async fn test_cancel_during_registration_wins() {
    let h = Harness::ready().await;
    let pausing = Arc::new(PausingManager::new(h.manager.clone()));
    let service = Arc::new(AttachmentSubmissionService::new(
        pausing.clone(),
        Arc::new(TimeBoxedActivity::new(Duration::from_secs(30))),
        h.analytics.clone(),
    ));
    let urls = vec![h.touch("a.png", 64), h.touch("b.png", 64), h.touch("c.png", 64)];

    let submitting = {
        let service = service.clone();
        tokio::spawn(async move { service.submit(&urls, "1", "2", "att-1", None).await })
    };
    timeout(Duration::from_secs(5), pausing.paused.notified())
        .await
        .expect("注册没有开始");
    assert_eq!(h.files("att-1").await.len(), 1);

    service.cancel(&BatchId::new("att-1")).await.unwrap();
    pausing.resume.send_replace(true);

    let report = timeout(Duration::from_secs(5), submitting)
        .await
        .expect("提交没有结束")
        .unwrap()
        .unwrap();
    assert!(report.canceled);
    assert!(report.registered.is_empty());
    assert!(report.failures.is_empty());
    assert!(h.files("att-1").await.is_empty());
    assert_eq!(h.notifier.failed_count(), 0);
    assert_eq!(h.transport.calls(), 0);
}

#[tokio::test]
async fn test_retry_survives_concurrent_delete() {
    let h = Harness::ready().await;
    h.transport.fail("x.png");
    h.transport.fail("y.png");
    let mut list = h.observe("att-1").await;

    h.service
        .submit(&[h.touch("x.png", 64), h.touch("y.png", 64)], "1", "2", "att-1", None)
        .await
        .unwrap();
    let summary = settle(&mut list).await;
    assert_eq!(summary.failed, 2);
    let x = list.files().into_iter().find(|f| f.name == "x.png").unwrap();

    h.transport.heal();
    let batch = BatchId::new("att-1");
    let (retried, deleted) = tokio::join!(h.service.retry(&batch), h.service.delete(x.id));
    retried.unwrap();
    deleted.unwrap();

    wait_until(&mut list, |files| {
        files.len() == 1 && files[0].name == "y.png" && files[0].state == UploadState::Completed
    })
    .await;
}

#[tokio::test]
async fn test_completed_batch_can_be_cleared() {
    let h = Harness::ready().await;
    let mut list = h.observe("att-1").await;

    h.service
        .submit(&[h.touch("a.png", 64), h.touch("b.png", 64)], "1", "2", "att-1", None)
        .await
        .unwrap();
    assert_eq!(settle(&mut list).await.state, ListState::Completed);

    list.clear().await.unwrap();
    wait_until(&mut list, |files| files.is_empty()).await;
    assert!(h.files("att-1").await.is_empty());
    assert!(h
        .manager
        .store()
        .batch(BatchId::new("att-1"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_unfinished_batch_is_not_cleared() {
    let h = Harness::new(Arc::new(TimeBoxedActivity::new(Duration::from_secs(30))), false).await;
    let mut list = h.observe("att-1").await;

    h.service
        .submit(&[h.touch("a.png", 64)], "1", "2", "att-1", None)
        .await
        .unwrap();
    wait_until(&mut list, all_uploading).await;

    let err = list.clear().await.unwrap_err();
    assert!(matches!(err, AppError::Store(StoreError::BatchNotSettled(_))));
    assert_eq!(h.files("att-1").await.len(), 1);
}
