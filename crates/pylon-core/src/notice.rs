// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bounded queue of user-facing notices for failed remote operations.
//!
//! The store pushes a notice whenever a remote failure forces it to undo (or
//! explain) an optimistic mutation; the queue rides along in every published
//! snapshot so the rendering layer can show it without a side channel.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Severity of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Something self-corrected but the user should know why.
    Warn,
    /// An operation failed outright.
    Error,
}

/// One entry in the notice queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Stable identifier, used by `DISMISS_NOTICE`.
    pub id: u64,
    /// Severity.
    pub kind: NoticeKind,
    /// Short headline.
    pub title: String,
    /// Optional detail line (usually the remote error message).
    pub body: Option<String>,
}

/// Capped FIFO of notices. Pushing an entry identical to one already queued
/// refreshes that entry instead of duplicating it.
#[derive(Debug)]
pub struct NoticeLog {
    entries: VecDeque<Notice>,
    max: usize,
    next_id: u64,
}

impl NoticeLog {
    /// Create a log keeping at most `max` entries; the oldest entry is
    /// evicted when the cap is reached.
    pub fn new(max: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max,
            next_id: 1,
        }
    }

    /// Queue a notice, returning its id. Identical queued entries (same
    /// kind/title/body) are collapsed into the existing one.
    pub fn push(&mut self, kind: NoticeKind, title: impl Into<String>, body: Option<String>) -> u64 {
        let title = title.into();
        if let Some(existing) = self
            .entries
            .iter()
            .find(|n| n.kind == kind && n.title == title && n.body == body)
        {
            return existing.id;
        }

        let id = self.next_id;
        self.next_id += 1;
        if self.entries.len() == self.max {
            self.entries.pop_front();
        }
        self.entries.push_back(Notice {
            id,
            kind,
            title,
            body,
        });
        id
    }

    /// Remove the notice with the given id. Returns whether anything changed.
    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|n| n.id != id);
        self.entries.len() != before
    }

    /// Current entries, oldest first.
    pub fn entries(&self) -> Vec<Notice> {
        self.entries.iter().cloned().collect()
    }

    /// Number of queued notices.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_pushes_collapse() {
        let mut log = NoticeLog::new(8);
        let a = log.push(NoticeKind::Error, "create failed", Some("boom".into()));
        let b = log.push(NoticeKind::Error, "create failed", Some("boom".into()));
        assert_eq!(a, b);
        assert_eq!(log.len(), 1);

        let c = log.push(NoticeKind::Error, "create failed", Some("other".into()));
        assert_ne!(a, c);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn cap_evicts_oldest() {
        let mut log = NoticeLog::new(2);
        let first = log.push(NoticeKind::Warn, "one", None);
        log.push(NoticeKind::Warn, "two", None);
        log.push(NoticeKind::Warn, "three", None);
        assert_eq!(log.len(), 2);
        assert!(log.entries().iter().all(|n| n.id != first));
    }

    #[test]
    fn dismiss_removes_by_id() {
        let mut log = NoticeLog::new(4);
        let id = log.push(NoticeKind::Error, "gone soon", None);
        assert!(log.dismiss(id));
        assert!(!log.dismiss(id));
        assert!(log.is_empty());
    }
}
