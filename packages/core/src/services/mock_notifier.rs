//! Recording notifier for tests.
//!
//! Captures every message instead of sending it, and can be told to fail
//! for specific addresses to exercise partial-delivery paths.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::AppError;
use crate::services::mailer::Notifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMessage>>,
    failing: HashSet<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send to `address` will fail.
    pub fn with_failure_for(mut self, address: &str) -> Self {
        self.failing.insert(address.to_string());
        self
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("notifier mutex poisoned").len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        text_body: &str,
        html_body: &str,
    ) -> Result<(), AppError> {
        if self.failing.contains(to) {
            return Err(AppError::notify(format!("simulated failure for {}", to)));
        }

        self.sent.lock().expect("notifier mutex poisoned").push(SentMessage {
            to: to.to_string(),
            subject: subject.to_string(),
            text_body: text_body.to_string(),
            html_body: html_body.to_string(),
        });
        Ok(())
    }

    fn notifier_name(&self) -> &str {
        "recording"
    }
}
