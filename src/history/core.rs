use std::sync::Mutex;

use serde_json::Value;

use crate::error::{Result, RouterError};

/// How a committed transition is reflected in session history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryStrategy {
    /// New entry per transition.
    #[default]
    Push,
    /// Overwrite the current entry.
    Replace,
    /// Leave history untouched.
    None,
}

/// One recorded history mutation, newest last. Tests assert against these
/// instead of scraping a real location bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryChange {
    Pushed(String),
    Replaced(String),
    Back(String),
    Forward(String),
}

/// Session history collaborator invoked during `UpdatingHistory`.
pub trait HistoryBackend: Send + Sync {
    fn push(&self, url: &str, state: Value) -> Result<()>;
    fn replace(&self, url: &str, state: Value) -> Result<()>;
    /// Move back one entry; returns the URL that became current.
    fn back(&self) -> Option<String>;
    fn forward(&self) -> Option<String>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn current(&self) -> Option<(String, Value)>;
}

#[derive(Debug, Default)]
struct Entries {
    stack: Vec<(String, Value)>,
    /// Index of the current entry; stack empty means nothing committed yet.
    index: usize,
    changes: Vec<HistoryChange>,
}

/// In-process history used headless and in tests.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    entries: Mutex<Entries>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the recorded change log.
    pub fn take_changes(&self) -> Vec<HistoryChange> {
        let mut entries = self.lock();
        std::mem::take(&mut entries.changes)
    }

    pub fn urls(&self) -> Vec<String> {
        self.lock().stack.iter().map(|(url, _)| url.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().expect("history mutex poisoned")
    }
}

impl HistoryBackend for InMemoryHistory {
    fn push(&self, url: &str, state: Value) -> Result<()> {
        let mut entries = self.lock();
        // Pushing from mid-stack drops the forward entries, like a browser.
        let cut = if entries.stack.is_empty() {
            0
        } else {
            entries.index + 1
        };
        entries.stack.truncate(cut);
        entries.stack.push((url.to_string(), state));
        entries.index = entries.stack.len() - 1;
        entries.changes.push(HistoryChange::Pushed(url.to_string()));
        Ok(())
    }

    fn replace(&self, url: &str, state: Value) -> Result<()> {
        let mut entries = self.lock();
        let index = entries.index;
        match entries.stack.get_mut(index) {
            Some(slot) => *slot = (url.to_string(), state),
            None => {
                entries.stack.push((url.to_string(), state));
                entries.index = 0;
            }
        }
        entries.changes.push(HistoryChange::Replaced(url.to_string()));
        Ok(())
    }

    fn back(&self) -> Option<String> {
        let mut entries = self.lock();
        if entries.index == 0 || entries.stack.is_empty() {
            return None;
        }
        entries.index -= 1;
        let url = entries.stack[entries.index].0.clone();
        entries.changes.push(HistoryChange::Back(url.clone()));
        Some(url)
    }

    fn forward(&self) -> Option<String> {
        let mut entries = self.lock();
        if entries.stack.is_empty() || entries.index + 1 >= entries.stack.len() {
            return None;
        }
        entries.index += 1;
        let url = entries.stack[entries.index].0.clone();
        entries.changes.push(HistoryChange::Forward(url.clone()));
        Some(url)
    }

    fn len(&self) -> usize {
        self.lock().stack.len()
    }

    fn current(&self) -> Option<(String, Value)> {
        let entries = self.lock();
        entries.stack.get(entries.index).cloned()
    }
}

/// Backend that rejects every write; exercises the failure path of
/// `UpdatingHistory`.
#[derive(Debug, Default)]
pub struct FailingHistory;

impl HistoryBackend for FailingHistory {
    fn push(&self, url: &str, _state: Value) -> Result<()> {
        Err(RouterError::History(format!("push rejected for `{url}`")))
    }
    fn replace(&self, url: &str, _state: Value) -> Result<()> {
        Err(RouterError::History(format!("replace rejected for `{url}`")))
    }
    fn back(&self) -> Option<String> {
        None
    }
    fn forward(&self) -> Option<String> {
        None
    }
    fn len(&self) -> usize {
        0
    }
    fn current(&self) -> Option<(String, Value)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn push_then_back_then_push_truncates_forward_entries() {
        let history = InMemoryHistory::new();
        history.push("a", json!({})).unwrap();
        history.push("b", json!({})).unwrap();
        assert_eq!(history.back().as_deref(), Some("a"));
        history.push("c", json!({})).unwrap();
        assert_eq!(history.urls(), vec!["a", "c"]);
        assert!(history.forward().is_none());
    }

    #[test]
    fn replace_overwrites_current_entry() {
        let history = InMemoryHistory::new();
        history.push("a", json!({})).unwrap();
        history.replace("b", json!({"n": 1})).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.current().unwrap().0, "b");
    }

    #[test]
    fn change_log_records_in_order() {
        let history = InMemoryHistory::new();
        history.push("a", json!({})).unwrap();
        history.push("b", json!({})).unwrap();
        history.back();
        assert_eq!(
            history.take_changes(),
            vec![
                HistoryChange::Pushed("a".into()),
                HistoryChange::Pushed("b".into()),
                HistoryChange::Back("a".into()),
            ]
        );
        assert!(history.take_changes().is_empty());
    }

    #[test]
    fn back_at_the_start_is_a_noop() {
        let history = InMemoryHistory::new();
        assert!(history.back().is_none());
        history.push("a", json!({})).unwrap();
        assert!(history.back().is_none());
    }
}
