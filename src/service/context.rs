//! Thread context view
//!
//! Stored context is written by `data::ingest::replace_context`; this is the
//! read side handed to presentation code.

use crate::data::{Status, StatusSection};

/// A parent status with its ordered ancestors and descendants
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadContext {
    pub ancestors: Vec<Status>,
    pub parent: Status,
    pub descendants: Vec<Status>,
}

impl ThreadContext {
    /// `ancestors`, `[parent]`, `descendants` as three sections.
    pub fn sections(&self) -> Vec<StatusSection> {
        vec![
            StatusSection {
                id: "ancestors".to_string(),
                statuses: self.ancestors.clone(),
            },
            StatusSection {
                id: "parent".to_string(),
                statuses: vec![self.parent.clone()],
            },
            StatusSection {
                id: "descendants".to_string(),
                statuses: self.descendants.clone(),
            },
        ]
    }

    /// The thread in display order.
    pub fn flattened(&self) -> Vec<&Status> {
        self.ancestors
            .iter()
            .chain(std::iter::once(&self.parent))
            .chain(self.descendants.iter())
            .collect()
    }

    /// Whether the status directly follows the one it replies to.
    ///
    /// Positional only: the preceding element must be the status's
    /// `in_reply_to_id` and must not be the parent itself.
    pub fn is_reply_in_context(&self, status_id: &str) -> bool {
        let flattened = self.flattened();
        let Some(position) = flattened.iter().position(|status| status.id == status_id) else {
            return false;
        };
        let Some(previous) = position.checked_sub(1).map(|index| flattened[index]) else {
            return false;
        };

        previous.id != self.parent.id
            && flattened[position].in_reply_to_id.as_deref() == Some(previous.id.as_str())
    }

    /// Whether the next element replies to this status (and is not the parent).
    pub fn has_reply_following(&self, status_id: &str) -> bool {
        let flattened = self.flattened();
        let Some(position) = flattened.iter().position(|status| status.id == status_id) else {
            return false;
        };
        let Some(next) = flattened.get(position + 1) else {
            return false;
        };

        next.id != self.parent.id && next.in_reply_to_id.as_deref() == Some(status_id)
    }
}
