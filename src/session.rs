//! UI-facing facade over the history store and the classification controller.

use std::sync::Arc;

use crate::classifier::Classifier;
use crate::controller::{ClassificationController, Completion, RequestState, SubmitRejected, Submission};
use crate::history::{HistoryError, HistoryRecord, HistoryStore};
use crate::storage::Storage;

pub struct Session<S: Storage> {
    history: HistoryStore<S>,
    controller: ClassificationController,
}

impl<S: Storage> Session<S> {
    pub fn new(storage: S, key: &str, classifier: Arc<dyn Classifier>) -> Self {
        Session {
            history: HistoryStore::open(storage, key),
            controller: ClassificationController::new(classifier),
        }
    }

    pub fn history(&self) -> &[HistoryRecord] {
        self.history.records()
    }

    pub fn input(&self) -> &str {
        self.controller.input()
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.controller.set_input(text);
    }

    pub fn request_state(&self) -> &RequestState {
        self.controller.state()
    }

    pub fn is_pending(&self) -> bool {
        self.controller.is_pending()
    }

    pub fn current_classification(&self) -> Option<&str> {
        self.controller.current_classification()
    }

    // Whole-cycle form of `begin_query`/`complete_query` for non-UI callers.
    #[allow(dead_code)]
    pub async fn submit_query(&mut self, text: &str) -> Option<String> {
        self.controller.submit(text, &mut self.history).await
    }

    /// Starts a request for the current input without waiting for it.
    pub fn begin_query(&mut self) -> Result<Submission, SubmitRejected> {
        self.controller.begin_input()
    }

    pub fn complete_query(&mut self, completion: Completion) -> Option<String> {
        self.controller.finish(completion, &mut self.history)
    }

    pub fn cancel_query(&mut self) -> bool {
        self.controller.cancel()
    }

    pub fn delete_history_item(&mut self, index: usize) -> Result<HistoryRecord, HistoryError> {
        self.history.remove_at(index)
    }

    pub fn clear_history(&mut self) -> Result<(), HistoryError> {
        self.history.clear()
    }
}
