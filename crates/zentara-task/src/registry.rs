use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("a task with id {0} is already registered")]
    DuplicateTaskId(String),
    #[error("task registry is shut down")]
    Closed,
}

/// Live tasks in spawn order. The last entry is the current task.
///
/// Lookups are exact and case-sensitive; `task-1` never finds `task-10`.
#[derive(Debug)]
pub struct TaskStack<T> {
    entries: Vec<(String, T)>,
    index: HashMap<String, usize>,
}

impl<T> Default for TaskStack<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> TaskStack<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, id: impl Into<String>, task: T) -> Result<(), RegistryError> {
        let id = id.into();
        if self.index.contains_key(&id) {
            return Err(RegistryError::DuplicateTaskId(id));
        }
        self.index.insert(id.clone(), self.entries.len());
        self.entries.push((id, task));
        Ok(())
    }

    pub fn find(&self, id: &str) -> Option<&T> {
        self.index.get(id).map(|&i| &self.entries[i].1)
    }

    pub fn current(&self) -> Option<&T> {
        self.entries.last().map(|(_, task)| task)
    }

    pub fn remove(&mut self, id: &str) -> Option<T> {
        let i = self.index.remove(id)?;
        let (_, task) = self.entries.remove(i);
        for (id, _) in &self.entries[i..] {
            if let Some(slot) = self.index.get_mut(id) {
                *slot -= 1;
            }
        }
        Some(task)
    }

    /// Swaps the task stored under `id` in place, keeping its stack position.
    pub fn replace(&mut self, id: &str, task: T) -> Option<T> {
        let i = *self.index.get(id)?;
        Some(std::mem::replace(&mut self.entries[i].1, task))
    }

    pub fn clear(&mut self) -> Vec<T> {
        self.index.clear();
        self.entries.drain(..).map(|(_, task)| task).collect()
    }

    /// Entries pushed after `id`, oldest first. Empty when `id` is unknown.
    pub fn above(&self, id: &str) -> impl Iterator<Item = (&str, &T)> {
        let start = self.index.get(id).map_or(self.entries.len(), |&i| i + 1);
        self.entries[start..]
            .iter()
            .map(|(id, task)| (id.as_str(), task))
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(ids: &[&str]) -> TaskStack<String> {
        let mut stack = TaskStack::new();
        for id in ids {
            stack.push(*id, format!("task {id}")).unwrap();
        }
        stack
    }

    #[test]
    fn lookups_are_exact() {
        let stack = stack(&["task-1", "task-10", "my-task-1-backup"]);
        assert_eq!(stack.find("task-1").map(String::as_str), Some("task task-1"));
        assert_eq!(stack.find("task-10").map(String::as_str), Some("task task-10"));
        assert!(stack.find("task").is_none());
        assert!(stack.find("TASK-1").is_none());
        assert!(stack.find("task-1-backup").is_none());
        assert!(stack.find("").is_none());
    }

    #[test]
    fn repeated_lookups_agree() {
        let stack = stack(&["a", "b"]);
        let first = stack.find("a").cloned();
        for _ in 0..3 {
            assert_eq!(stack.find("a").cloned(), first);
        }
    }

    #[test]
    fn current_is_last_pushed() {
        let mut stack = stack(&["root", "child"]);
        assert_eq!(stack.current().map(String::as_str), Some("task child"));
        stack.remove("child");
        assert_eq!(stack.current().map(String::as_str), Some("task root"));
        stack.remove("root");
        assert!(stack.current().is_none());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut stack = stack(&["a"]);
        assert_eq!(
            stack.push("a", "again".to_string()),
            Err(RegistryError::DuplicateTaskId("a".to_string()))
        );
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn removal_from_the_middle_keeps_index_consistent() {
        let mut stack = stack(&["a", "b", "c"]);
        assert_eq!(stack.remove("b").as_deref(), Some("task b"));
        assert_eq!(stack.find("c").map(String::as_str), Some("task c"));
        assert_eq!(stack.ids(), vec!["a", "c"]);
        assert!(stack.remove("b").is_none());
    }

    #[test]
    fn replace_keeps_position() {
        let mut stack = stack(&["a", "b"]);
        assert_eq!(stack.replace("a", "fresh a".to_string()).as_deref(), Some("task a"));
        assert_eq!(stack.ids(), vec!["a", "b"]);
        assert_eq!(stack.find("a").map(String::as_str), Some("fresh a"));
        assert!(stack.replace("zzz", String::new()).is_none());
        assert_eq!(stack.clear().len(), 2);
        assert!(stack.is_empty());
    }

    #[test]
    fn above_lists_later_entries_in_order() {
        let stack = stack(&["a", "b", "c"]);
        let above: Vec<&str> = stack.above("a").map(|(id, _)| id).collect();
        assert_eq!(above, vec!["b", "c"]);
        assert_eq!(stack.above("c").count(), 0);
        assert_eq!(stack.above("missing").count(), 0);
    }
}
