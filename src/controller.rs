use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::classifier::{Classifier, TransportError};
use crate::history::{HistoryRecord, HistoryStore};
use crate::storage::Storage;

/// Label shown and recorded when a classification request fails.
pub const ERROR_LABEL: &str = "Error fetching classification";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Pending(String),
    Completed(String),
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejected {
    Empty,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

/// A request that has been accepted and is ready to be sent.
pub struct Submission {
    id: RequestId,
    query: String,
    classifier: Arc<dyn Classifier>,
    token: CancellationToken,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Classified(String),
    Failed(Arc<TransportError>),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub id: RequestId,
    pub query: String,
    pub outcome: Outcome,
}

impl Submission {
    #[cfg(test)]
    pub fn id(&self) -> RequestId {
        self.id
    }

    #[cfg(test)]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Sends the request. Resolves early with `Outcome::Cancelled` once the
    /// controller cancels it.
    pub async fn run(self) -> Completion {
        let outcome = tokio::select! {
            _ = self.token.cancelled() => Outcome::Cancelled,
            result = self.classifier.classify(&self.query) => match result {
                Ok(label) => Outcome::Classified(label),
                Err(e) => Outcome::Failed(Arc::new(e)),
            },
        };
        Completion {
            id: self.id,
            query: self.query,
            outcome,
        }
    }
}

struct InFlight {
    id: RequestId,
    token: CancellationToken,
}

pub struct ClassificationController {
    classifier: Arc<dyn Classifier>,
    input: String,
    state: RequestState,
    in_flight: Option<InFlight>,
    next_id: u64,
}

impl ClassificationController {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        ClassificationController {
            classifier,
            input: String::new(),
            state: RequestState::Idle,
            in_flight: None,
            next_id: 0,
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    pub fn state(&self) -> &RequestState {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Label of the last finished request, successful or not.
    pub fn current_classification(&self) -> Option<&str> {
        match &self.state {
            RequestState::Completed(label) | RequestState::Failed(label) => Some(label),
            _ => None,
        }
    }

    /// Validates `text` and moves to `Pending`. Rejected submissions leave
    /// the input and state untouched.
    pub fn begin(&mut self, text: &str) -> Result<Submission, SubmitRejected> {
        let query = text.trim();
        if query.is_empty() {
            return Err(SubmitRejected::Empty);
        }
        if self.in_flight.is_some() {
            return Err(SubmitRejected::Busy);
        }

        self.next_id += 1;
        let id = RequestId(self.next_id);
        let token = CancellationToken::new();

        self.state = RequestState::Pending(query.to_string());
        self.in_flight = Some(InFlight {
            id,
            token: token.clone(),
        });
        self.input.clear();

        tracing::info!(request = id.0, "classification requested");

        Ok(Submission {
            id,
            query: query.to_string(),
            classifier: self.classifier.clone(),
            token,
        })
    }

    pub fn begin_input(&mut self) -> Result<Submission, SubmitRejected> {
        let text = self.input.clone();
        self.begin(&text)
    }

    /// Applies a finished request and returns the label to display.
    ///
    /// Returns `None` for stale completions and for cancelled requests;
    /// neither touches history. `cancel()` already moved the state, so a
    /// cancelled completion is always stale.
    pub fn finish<S: Storage>(
        &mut self,
        completion: Completion,
        history: &mut HistoryStore<S>,
    ) -> Option<String> {
        let current = matches!(&self.in_flight, Some(in_flight) if in_flight.id == completion.id);
        let result = match completion.outcome {
            Outcome::Classified(label) if current => Ok(label),
            Outcome::Failed(e) if current => Err(e),
            _ => {
                tracing::debug!(request = completion.id.0, "ignoring stale completion");
                return None;
            }
        };
        self.in_flight = None;

        let label = match result {
            Ok(label) => {
                tracing::info!(request = completion.id.0, %label, "classification completed");
                self.state = RequestState::Completed(label.clone());
                label
            }
            Err(e) => {
                tracing::error!(request = completion.id.0, "Error calling API: {}", e);
                self.state = RequestState::Failed(ERROR_LABEL.to_string());
                ERROR_LABEL.to_string()
            }
        };

        if let Err(e) = history.append(HistoryRecord::new(completion.query, label.clone())) {
            tracing::error!("failed to persist history: {}", e);
        }
        Some(label)
    }

    /// Aborts the pending request, if any. No history record is written.
    pub fn cancel(&mut self) -> bool {
        match self.in_flight.take() {
            Some(in_flight) => {
                in_flight.token.cancel();
                self.state = RequestState::Cancelled;
                tracing::info!(request = in_flight.id.0, "classification cancelled");
                true
            }
            None => false,
        }
    }

    /// Runs a whole submit/response cycle. Returns `None` when the
    /// submission is rejected.
    pub async fn submit<S: Storage>(
        &mut self,
        text: &str,
        history: &mut HistoryStore<S>,
    ) -> Option<String> {
        let submission = match self.begin(text) {
            Ok(submission) => submission,
            Err(reason) => {
                tracing::debug!(?reason, "submission declined");
                return None;
            }
        };
        let completion = submission.run().await;
        self.finish(completion, history)
    }

    #[cfg(test)]
    pub async fn submit_input<S: Storage>(&mut self, history: &mut HistoryStore<S>) -> Option<String> {
        let text = self.input.clone();
        self.submit(&text, history).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Test double returning canned labels and counting calls.
    pub(crate) struct StubClassifier {
        pub label: Option<String>,
        pub calls: AtomicUsize,
        pub seen: Mutex<Vec<String>>,
    }

    impl StubClassifier {
        pub fn labelling(label: &str) -> Arc<Self> {
            Arc::new(StubClassifier {
                label: Some(label.to_string()),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        pub fn failing() -> Arc<Self> {
            Arc::new(StubClassifier {
                label: None,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Classifier for StubClassifier {
        async fn classify(&self, content: &str) -> Result<String, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(content.to_string());
            match &self.label {
                Some(label) => Ok(label.clone()),
                None => Err(TransportError::Protocol("connection refused".to_string())),
            }
        }
    }

    struct HangingClassifier;

    #[async_trait]
    impl Classifier for HangingClassifier {
        async fn classify(&self, _content: &str) -> Result<String, TransportError> {
            std::future::pending().await
        }
    }

    fn history() -> HistoryStore<MemoryStorage> {
        HistoryStore::open(MemoryStorage::new(), "items")
    }

    fn persisted(history: &HistoryStore<MemoryStorage>) -> Vec<HistoryRecord> {
        match history.storage().get_item("items").unwrap() {
            Some(raw) => serde_json::from_str(&raw).unwrap(),
            None => Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_success_appends_and_persists() {
        let stub = StubClassifier::labelling("Spam");
        let mut controller = ClassificationController::new(stub.clone());
        let mut history = history();

        let label = controller.submit("free money now", &mut history).await;

        assert_eq!(label.as_deref(), Some("Spam"));
        assert_eq!(controller.state(), &RequestState::Completed("Spam".to_string()));
        assert_eq!(controller.current_classification(), Some("Spam"));
        assert_eq!(history.records(), &[HistoryRecord::new("free money now", "Spam")]);
        assert_eq!(persisted(&history), history.records());
    }

    #[tokio::test]
    async fn test_failure_recorded_with_sentinel() {
        let mut controller = ClassificationController::new(StubClassifier::failing());
        let mut history = history();

        let label = controller.submit("buy now", &mut history).await;

        assert_eq!(label.as_deref(), Some(ERROR_LABEL));
        assert_eq!(controller.state(), &RequestState::Failed(ERROR_LABEL.to_string()));
        assert_eq!(history.records(), &[HistoryRecord::new("buy now", ERROR_LABEL)]);
        assert_eq!(persisted(&history), history.records());
    }

    #[tokio::test]
    async fn test_blank_submission_is_noop() {
        let stub = StubClassifier::labelling("Ham");
        let mut controller = ClassificationController::new(stub.clone());
        let mut history = history();

        controller.set_input("   ");
        assert_eq!(controller.submit("", &mut history).await, None);
        assert_eq!(controller.submit_input(&mut history).await, None);

        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
        assert_eq!(controller.state(), &RequestState::Idle);
        assert_eq!(controller.input(), "   ");
        assert!(history.is_empty());
        assert_eq!(history.storage().get_item("items").unwrap(), None);
    }

    #[tokio::test]
    async fn test_payload_is_trimmed_and_input_cleared() {
        let stub = StubClassifier::labelling("Ham");
        let mut controller = ClassificationController::new(stub.clone());
        let mut history = history();

        controller.set_input("  see you at lunch \n");
        controller.submit_input(&mut history).await;

        assert_eq!(stub.seen.lock().unwrap().as_slice(), &["see you at lunch".to_string()]);
        assert_eq!(controller.input(), "");
        assert_eq!(history.records()[0].query_text, "see you at lunch");
    }

    #[tokio::test]
    async fn test_input_cleared_on_failure() {
        let mut controller = ClassificationController::new(StubClassifier::failing());
        let mut history = history();

        controller.set_input("buy now");
        controller.submit_input(&mut history).await;
        assert_eq!(controller.input(), "");
    }

    #[tokio::test]
    async fn test_every_submit_keeps_storage_in_sync() {
        let mut history = history();
        let mut ok = ClassificationController::new(StubClassifier::labelling("Ham"));
        let mut failing = ClassificationController::new(StubClassifier::failing());

        for (i, text) in ["a", "b", "c", "d"].iter().enumerate() {
            if i % 2 == 0 {
                ok.submit(text, &mut history).await;
            } else {
                failing.submit(text, &mut history).await;
            }
            assert_eq!(persisted(&history), history.records());
            assert_eq!(history.len(), i + 1);
        }
    }

    #[tokio::test]
    async fn test_busy_while_pending() {
        let mut controller = ClassificationController::new(Arc::new(HangingClassifier));

        let first = controller.begin("first").unwrap();
        controller.set_input("second");
        assert!(matches!(controller.begin_input(), Err(SubmitRejected::Busy)));
        assert_eq!(controller.input(), "second");
        assert_eq!(controller.state(), &RequestState::Pending("first".to_string()));
        assert_eq!(first.query(), "first");
    }

    #[tokio::test]
    async fn test_cancel_records_nothing() {
        let mut controller = ClassificationController::new(Arc::new(HangingClassifier));
        let mut history = history();

        let submission = controller.begin("never answered").unwrap();
        let handle = tokio::spawn(submission.run());

        assert!(controller.cancel());
        assert_eq!(controller.state(), &RequestState::Cancelled);
        assert!(!controller.is_pending());

        let completion = handle.await.unwrap();
        assert!(matches!(completion.outcome, Outcome::Cancelled));
        assert_eq!(controller.finish(completion, &mut history), None);
        assert!(history.is_empty());
        assert!(!controller.cancel());
    }

    #[tokio::test]
    async fn test_cancelled_outcome_never_recorded() {
        let mut controller = ClassificationController::new(StubClassifier::labelling("Spam"));
        let mut history = history();

        let submission = controller.begin("unsubscribe").unwrap();
        let completion = Completion {
            id: submission.id(),
            query: submission.query().to_string(),
            outcome: Outcome::Cancelled,
        };

        assert_eq!(controller.finish(completion, &mut history), None);
        assert!(history.is_empty());
        assert_eq!(history.storage().get_item("items").unwrap(), None);
        assert_eq!(controller.current_classification(), None);
    }

    #[tokio::test]
    async fn test_stale_completion_ignored() {
        let mut controller = ClassificationController::new(StubClassifier::labelling("Spam"));
        let mut history = history();

        let old = controller.begin("old").unwrap();
        controller.cancel();
        let fresh = controller.begin("fresh").unwrap();

        let old_completion = Completion {
            id: old.id(),
            query: old.query().to_string(),
            outcome: Outcome::Classified("Spam".to_string()),
        };
        assert_eq!(controller.finish(old_completion, &mut history), None);
        assert!(history.is_empty());
        assert_eq!(controller.state(), &RequestState::Pending("fresh".to_string()));

        let completion = fresh.run().await;
        assert_eq!(controller.finish(completion, &mut history).as_deref(), Some("Spam"));
        assert_eq!(history.records(), &[HistoryRecord::new("fresh", "Spam")]);
    }

    #[tokio::test]
    async fn test_history_edits_during_pending_request() {
        let mut controller = ClassificationController::new(StubClassifier::labelling("Ham"));
        let mut history = history();
        history.append(HistoryRecord::new("a", "Spam")).unwrap();
        history.append(HistoryRecord::new("b", "Ham")).unwrap();

        let submission = controller.begin("c").unwrap();
        history.remove_at(0).unwrap();
        let completion = submission.run().await;
        controller.finish(completion, &mut history);

        assert_eq!(
            history.records(),
            &[HistoryRecord::new("b", "Ham"), HistoryRecord::new("c", "Ham")]
        );
        assert_eq!(persisted(&history), history.records());
    }

    #[tokio::test]
    async fn test_storage_failure_does_not_fail_submit() {
        let mut controller = ClassificationController::new(StubClassifier::labelling("Ham"));
        let mut history = history();
        history.storage_mut().set_fail_writes(true);

        let label = controller.submit("hello", &mut history).await;
        assert_eq!(label.as_deref(), Some("Ham"));
        assert_eq!(history.len(), 1);
    }
}
