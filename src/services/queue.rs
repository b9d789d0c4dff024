// src/services/queue.rs
//! Sequential generation queue.
//!
//! One prompt is in flight at a time. Each prompt's failure is recorded on
//! its own entry and never stops the rest of the batch. A fixed cooldown
//! separates consecutive requests to stay under provider rate limits.

use crate::errors::BatchError;
use crate::models::{GenerationOptions, Outcome, QueueState};
use crate::services::{GenerationClient, ResultStore, split_prompts};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

pub const PACING_INTERVAL: Duration = Duration::from_secs(1);

const UNKNOWN_ERROR: &str = "Unknown error";

/// A batch that passed the admission guard.
struct Batch {
    id: Uuid,
    prompts: Vec<String>,
    options: GenerationOptions,
}

/// Lowers the busy flag however the batch ends: normally, dropped, or panicking.
struct BatchGuard<'a> {
    store: &'a ResultStore,
    id: Uuid,
    finished: bool,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Batch {} stopped before its last prompt", self.id);
        }
        self.store.release();
    }
}

pub struct StartedBatch {
    pub batch_id: Uuid,
    pub total: usize,
    pub handle: JoinHandle<()>,
}

pub struct QueueOrchestrator {
    store: ResultStore,
    client: Arc<dyn GenerationClient>,
}

impl QueueOrchestrator {
    pub fn new(store: ResultStore, client: Arc<dyn GenerationClient>) -> Self {
        Self { store, client }
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueState> {
        self.store.subscribe()
    }

    pub fn snapshot(&self) -> QueueState {
        self.store.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.store.is_running()
    }

    /// Runs a whole batch to completion. Returns `false` without touching any
    /// state when the input has no prompts or a batch is already running.
    #[cfg(test)]
    pub async fn run(&self, raw_prompts: &str, options: GenerationOptions) -> bool {
        match self.admit(raw_prompts, options) {
            Some(batch) => {
                self.drive(batch).await;
                true
            }
            None => false,
        }
    }

    /// Admits a batch synchronously and drives it on a background task.
    pub fn start(self: &Arc<Self>, raw_prompts: &str, options: GenerationOptions) -> Option<StartedBatch> {
        let batch = self.admit(raw_prompts, options)?;
        let batch_id = batch.id;
        let total = batch.prompts.len();

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.drive(batch).await });

        Some(StartedBatch {
            batch_id,
            total,
            handle,
        })
    }

    fn admit(&self, raw_prompts: &str, options: GenerationOptions) -> Option<Batch> {
        let prompts = split_prompts(raw_prompts);
        if prompts.is_empty() {
            debug!("Ignoring generation request without prompts");
            return None;
        }
        if !self.store.try_acquire() {
            debug!("Ignoring generation request while a batch is running");
            return None;
        }

        let batch = Batch {
            id: Uuid::new_v4(),
            prompts,
            options,
        };
        self.store.reset(batch.id, &batch.prompts);

        info!(
            "Starting batch {} with {} prompt(s) on {}",
            batch.id,
            batch.prompts.len(),
            batch.options.model.id()
        );
        Some(batch)
    }

    async fn drive(&self, batch: Batch) {
        let Batch { id, prompts, options } = batch;
        let total = prompts.len();
        let mut guard = BatchGuard {
            store: &self.store,
            id,
            finished: false,
        };

        for (index, prompt) in prompts.iter().enumerate() {
            self.store.set_current_index(index + 1);
            let effective_prompt = options.effective_prompt(prompt);
            debug!("Batch {}: generating {} of {}", id, index + 1, total);

            let result = self
                .client
                .generate_images(&effective_prompt, options.aspect_ratio, options.count, options.model)
                .await;

            let outcome = match result {
                Ok(images) => {
                    info!("Batch {}: prompt {} produced {} image(s)", id, index + 1, images.len());
                    Outcome::Success(images)
                }
                Err(e) => {
                    warn!("Batch {}: prompt {} failed: {}", id, index + 1, e);
                    Outcome::Failure(failure_message(&e))
                }
            };
            self.store.resolve(index, outcome);
            self.store.mark_completed();

            if index + 1 < total {
                sleep(PACING_INTERVAL).await;
            }
        }

        guard.finished = true;
        drop(guard);
        info!("Batch {} finished", id);
    }
}

fn failure_message(err: &BatchError) -> String {
    let detail = err.detail().trim();
    if detail.is_empty() {
        UNKNOWN_ERROR.to_string()
    } else {
        detail.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AspectRatio, ImageModel, ResultEntry, ResultStatus, StylePreset};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use tokio::time::Instant;

    #[derive(Debug, Clone)]
    struct Call {
        prompt: String,
        count: u8,
        model: ImageModel,
        at: Instant,
        state: QueueState,
    }

    /// Answers from a fixed script and records what the queue looked like at each call.
    struct ScriptedClient {
        replies: HashMap<String, Result<Vec<String>, String>>,
        observer: watch::Receiver<QueueState>,
        calls: Mutex<Vec<Call>>,
        in_flight: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedClient {
        fn new(store: &ResultStore, replies: &[(&str, Result<Vec<String>, String>)]) -> Self {
            Self {
                replies: replies
                    .iter()
                    .map(|(prompt, reply)| (prompt.to_string(), reply.clone()))
                    .collect(),
                observer: store.subscribe(),
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                gate: None,
            }
        }

        fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerationClient for ScriptedClient {
        async fn generate_images(
            &self,
            prompt: &str,
            _aspect_ratio: AspectRatio,
            count: u8,
            model: ImageModel,
        ) -> Result<Vec<String>, BatchError> {
            assert_eq!(self.in_flight.fetch_add(1, Ordering::SeqCst), 0, "concurrent request");
            self.calls.lock().unwrap().push(Call {
                prompt: prompt.to_string(),
                count,
                model,
                at: Instant::now(),
                state: self.observer.borrow().clone(),
            });

            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.replies.get(prompt) {
                Some(Ok(images)) => Ok(images.clone()),
                Some(Err(message)) => Err(BatchError::Generation(message.clone())),
                None => Err(BatchError::Generation(String::new())),
            }
        }
    }

    fn setup(replies: &[(&str, Result<Vec<String>, String>)]) -> (QueueOrchestrator, Arc<ScriptedClient>) {
        let store = ResultStore::new();
        let client = Arc::new(ScriptedClient::new(&store, replies));
        (QueueOrchestrator::new(store, client.clone()), client)
    }

    fn image(data: &str) -> Vec<String> {
        vec![format!("data:image/jpeg;base64,{}", data)]
    }

    #[tokio::test(start_paused = true)]
    async fn isolates_failures_per_prompt() {
        let (queue, client) = setup(&[
            ("a cat", Ok(image("AAA"))),
            ("a dog", Err("quota exceeded".to_string())),
        ]);
        let options = GenerationOptions::new(
            AspectRatio::Square,
            1,
            StylePreset::None,
            ImageModel::GeminiFlashImage,
        );

        assert!(queue.run("a cat\na dog", options).await);

        let state = queue.snapshot();
        let expected_error = ResultEntry {
            prompt: "a dog".into(),
            status: ResultStatus::Error,
            images: None,
            error: Some("quota exceeded".into()),
        };
        let expected_success = ResultEntry {
            prompt: "a cat".into(),
            status: ResultStatus::Success,
            images: Some(image("AAA")),
            error: None,
        };
        assert_eq!(state.entries, vec![expected_success, expected_error]);
        assert!(!state.running);
        assert_eq!(state.completed, 2);
        assert_eq!(state.percentage(), 100.0);
        assert!(state.has_successful_images());
        assert_eq!(client.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn all_entries_exist_before_the_first_request() {
        let (queue, client) = setup(&[("one", Ok(vec![])), ("two", Ok(vec![])), ("three", Ok(vec![]))]);

        queue.run("one\ntwo\nthree", GenerationOptions::default()).await;

        let calls = client.calls();
        assert_eq!(calls.len(), 3);
        let first = &calls[0].state;
        assert!(first.running);
        assert_eq!(first.total, 3);
        assert_eq!(first.entries.len(), 3);
        assert!(first.entries.iter().all(|e| e.status == ResultStatus::Loading));

        for (i, call) in calls.iter().enumerate() {
            assert_eq!(call.state.current_index, i + 1);
            assert_eq!(call.state.completed, i);
            // earlier entries are settled, the rest still loading
            assert!(call.state.entries[..i].iter().all(|e| e.status == ResultStatus::Success));
            assert!(call.state.entries[i..].iter().all(|e| e.status == ResultStatus::Loading));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn paces_requests_without_trailing_delay() {
        let (queue, client) = setup(&[("a", Ok(vec![])), ("b", Ok(vec![])), ("c", Ok(vec![]))]);
        let started = Instant::now();

        queue.run("a\nb\nc", GenerationOptions::default()).await;

        let calls = client.calls();
        assert_eq!(calls[0].at, started);
        assert!(calls[1].at - calls[0].at >= PACING_INTERVAL);
        assert!(calls[2].at - calls[1].at >= PACING_INTERVAL);
        assert_eq!(Instant::now(), calls[2].at);
    }

    #[tokio::test(start_paused = true)]
    async fn style_is_request_only() {
        let (queue, client) = setup(&[]);
        let options = GenerationOptions::new(
            AspectRatio::Portrait,
            9,
            StylePreset::Watercolor,
            ImageModel::Imagen4Ultra,
        );

        queue.run("  a lighthouse  ", options).await;

        let calls = client.calls();
        assert_eq!(
            calls[0].prompt,
            "a lighthouse, watercolor painting, soft washes, paper texture"
        );
        assert_eq!(calls[0].count, 4);
        assert_eq!(calls[0].model, ImageModel::Imagen4Ultra);
        assert_eq!(queue.snapshot().entries[0].prompt, "a lighthouse");
    }

    #[tokio::test(start_paused = true)]
    async fn blank_failure_message_falls_back() {
        let (queue, _client) = setup(&[]);

        queue.run("unscripted", GenerationOptions::default()).await;

        let entry = &queue.snapshot().entries[0];
        assert_eq!(entry.status, ResultStatus::Error);
        assert_eq!(entry.error.as_deref(), Some(UNKNOWN_ERROR));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_input_is_refused() {
        let (queue, client) = setup(&[]);
        let before = queue.snapshot();

        assert!(!queue.run(" \n\t \n", GenerationOptions::default()).await);

        assert_eq!(queue.snapshot(), before);
        assert!(client.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_batch_is_refused_while_running() {
        let store = ResultStore::new();
        let gate = Arc::new(Notify::new());
        let client = Arc::new(ScriptedClient::new(&store, &[("first", Ok(vec![]))]).gated(gate.clone()));
        let queue = Arc::new(QueueOrchestrator::new(store, client.clone()));

        let started = queue
            .start("first", GenerationOptions::default())
            .expect("first batch starts");
        assert_eq!(started.total, 1);
        assert!(queue.is_running());

        let during = queue.snapshot();
        assert!(queue.start("second\nthird", GenerationOptions::default()).is_none());
        assert!(!queue.run("second", GenerationOptions::default()).await);
        assert_eq!(queue.snapshot(), during);

        gate.notify_one();
        started.handle.await.unwrap();

        let state = queue.snapshot();
        assert!(!state.running);
        assert_eq!(state.batch_id, Some(started.batch_id));
        assert_eq!(state.entries.len(), 1);
        assert_eq!(client.calls().len(), 1);
    }

    /// Never answers "hang" and panics on "boom"; everything else succeeds.
    struct StallingClient;

    #[async_trait]
    impl GenerationClient for StallingClient {
        async fn generate_images(
            &self,
            prompt: &str,
            _aspect_ratio: AspectRatio,
            _count: u8,
            _model: ImageModel,
        ) -> Result<Vec<String>, BatchError> {
            match prompt {
                "hang" => std::future::pending().await,
                "boom" => panic!("provider blew up"),
                _ => Ok(vec![]),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_batch_releases_the_busy_flag() {
        let queue = QueueOrchestrator::new(ResultStore::new(), Arc::new(StallingClient));

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            queue.run("hang", GenerationOptions::default()),
        )
        .await;
        assert!(outcome.is_err());

        let state = queue.snapshot();
        assert!(!state.running);
        assert!(state.finished_at.is_some());

        assert!(queue.run("ok", GenerationOptions::default()).await);
        assert_eq!(queue.snapshot().entries[0].status, ResultStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_client_releases_the_busy_flag() {
        let queue = Arc::new(QueueOrchestrator::new(ResultStore::new(), Arc::new(StallingClient)));

        let started = queue
            .start("boom", GenerationOptions::default())
            .expect("batch starts");
        let joined = started.handle.await;
        assert!(joined.unwrap_err().is_panic());

        assert!(!queue.is_running());
        let next = queue
            .start("ok", GenerationOptions::default())
            .expect("next batch is admitted");
        next.handle.await.unwrap();
        assert_eq!(queue.snapshot().completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn next_batch_replaces_results() {
        let (queue, _client) = setup(&[("a", Ok(image("AAA"))), ("b", Err("nope".into()))]);

        queue.run("a", GenerationOptions::default()).await;
        let first_id = queue.snapshot().batch_id;
        queue.run("b", GenerationOptions::default()).await;

        let state = queue.snapshot();
        assert_ne!(state.batch_id, first_id);
        assert_eq!(state.entries.len(), 1);
        assert_eq!(state.entries[0].prompt, "b");
        assert!(!state.has_successful_images());
    }

    #[tokio::test(start_paused = true)]
    async fn completed_reaches_total_when_busy_clears() {
        let (queue, _client) = setup(&[("a", Ok(vec![])), ("b", Err("x".into()))]);
        let mut rx = queue.subscribe();

        let watcher = tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                seen.push((state.running, state.completed, state.total));
                if !state.running && state.total > 0 {
                    break;
                }
            }
            seen
        });

        queue.run("a\nb", GenerationOptions::default()).await;
        let seen = watcher.await.unwrap();

        let completed: Vec<usize> = seen.iter().map(|(_, c, _)| *c).collect();
        assert!(completed.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(seen.last(), Some(&(false, 2, 2)));
        assert!(seen.iter().filter(|(running, _, _)| *running).all(|(_, c, _)| *c <= 2));
    }
}
