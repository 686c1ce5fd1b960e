// src/engine/queue.rs

use std::collections::VecDeque;

use tracing::debug;

use crate::task::TaskId;

/// FIFO of tasks waiting for a session.
///
/// Semantics:
/// - Fresh tasks and retried tasks both join at the tail, so a retry never
///   jumps ahead of work that arrived before it was requeued.
/// - [`TaskQueue::peek`] is non-destructive. The dispatcher only calls
///   [`TaskQueue::remove`] once a session is bound, so a task cannot be lost
///   between selection and binding.
/// - An id is never present twice.
#[derive(Debug, Default)]
pub struct TaskQueue {
    pending: VecDeque<TaskId>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Append at the tail. Returns `false` if the id was already queued.
    pub fn push(&mut self, id: TaskId) -> bool {
        if self.pending.contains(&id) {
            debug!(task = %id, "task already queued; ignoring duplicate push");
            return false;
        }
        self.pending.push_back(id);
        true
    }

    /// Earliest queued task, without removing it.
    pub fn peek(&self) -> Option<TaskId> {
        self.pending.front().copied()
    }

    /// Remove `id` wherever it sits. Returns `true` if it was queued.
    pub fn remove(&mut self, id: TaskId) -> bool {
        match self.pending.iter().position(|&queued| queued == id) {
            Some(pos) => {
                self.pending.remove(pos);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_does_not_consume() {
        let mut queue = TaskQueue::new();
        queue.push(TaskId(1));
        queue.push(TaskId(2));

        assert_eq!(queue.peek(), Some(TaskId(1)));
        assert_eq!(queue.peek(), Some(TaskId(1)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn requeued_task_goes_behind_newer_arrivals() {
        let mut queue = TaskQueue::new();
        queue.push(TaskId(1));
        queue.push(TaskId(2));

        assert!(queue.remove(TaskId(1)));
        queue.push(TaskId(3));
        queue.push(TaskId(1));

        let mut order = Vec::new();
        while let Some(id) = queue.peek() {
            queue.remove(id);
            order.push(id);
        }
        assert_eq!(order, vec![TaskId(2), TaskId(3), TaskId(1)]);
    }

    #[test]
    fn duplicate_push_is_ignored() {
        let mut queue = TaskQueue::new();
        assert!(queue.push(TaskId(7)));
        assert!(!queue.push(TaskId(7)));
        assert_eq!(queue.len(), 1);
        assert!(!queue.remove(TaskId(8)));
    }
}
