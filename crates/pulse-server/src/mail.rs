//! Outbound mail collaborator.
//!
//! Rendering and delivery live outside the core. The core only decides when a
//! notification goes out and what it says.

#![allow(clippy::disallowed_types, reason = "Outbox is a test double, never held across await")]

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

/// Sends mail. Returns false if the message could not be handed off.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    /// Send one message.
    async fn send(&self, to: &str, subject: &str, text: &str, html: &str) -> bool;
}

/// Mailer that only logs who would have been mailed and why.
///
/// Bodies are never logged; they can carry one-time codes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _text: &str, _html: &str) -> bool {
        tracing::info!(to, subject, "mail dispatched");
        true
    }
}

/// A message captured by [`Outbox`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    /// Recipient
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub text: String,
    /// HTML body
    pub html: String,
}

/// In-memory mailer that keeps every message, for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    sent: Arc<Mutex<Vec<SentMail>>>,
    /// When true, every send reports failure
    failing: bool,
}

impl Outbox {
    /// Empty outbox that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Outbox whose sends all fail.
    pub fn failing() -> Self {
        Self { sent: Arc::default(), failing: true }
    }

    /// Everything sent so far, oldest first.
    pub fn messages(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Most recent message to `to`.
    pub fn last_to(&self, to: &str) -> Option<SentMail> {
        self.messages().into_iter().rev().find(|mail| mail.to == to)
    }

    /// Messages with the given subject.
    pub fn with_subject(&self, subject: &str) -> Vec<SentMail> {
        self.messages().into_iter().filter(|mail| mail.subject == subject).collect()
    }
}

#[async_trait]
impl Mailer for Outbox {
    async fn send(&self, to: &str, subject: &str, text: &str, html: &str) -> bool {
        if self.failing {
            return false;
        }

        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            text: text.to_string(),
            html: html.to_string(),
        });
        true
    }
}
