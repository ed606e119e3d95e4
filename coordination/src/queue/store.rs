//! C4 — Work Queue persistence and lifecycle operations.
//!
//! Grounded on the teacher's `FeatureRegistry::save` atomic-write pattern:
//! write to a `.tmp` sibling, then rename over the destination so readers
//! never observe a partially-written queue file.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use crate::error::QueueError;

use super::types::{Queue, QueueStats, Task, TaskStatus};

/// Loads, mutates, and atomically persists a single project's [`Queue`].
pub struct WorkQueue {
    path: PathBuf,
    queue: Queue,
}

impl WorkQueue {
    /// Reads `path`; if the file is absent, starts an empty queue for
    /// `project` rather than failing (§4.4).
    pub fn load(path: impl Into<PathBuf>, project: &str) -> Result<Self, QueueError> {
        let path = path.into();
        if !path.exists() {
            info!(project, path = %path.display(), "no queue file found, starting empty queue");
            return Ok(Self {
                path,
                queue: Queue::new(project),
            });
        }
        let raw = std::fs::read_to_string(&path).map_err(|source| QueueError::Io {
            path: path.clone(),
            source,
        })?;
        let queue: Queue = serde_json::from_str(&raw).map_err(|source| QueueError::Parse {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, queue })
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Re-reads the queue file from disk, replacing in-memory state.
    /// Operator edits to the file are picked up only here, at a task
    /// boundary — never mid-task (§9 Open Question).
    pub fn reload(&mut self) -> Result<(), QueueError> {
        let reloaded = Self::load(self.path.clone(), &self.queue.project)?;
        *self = reloaded;
        Ok(())
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Atomic persist: write to `{path}.tmp` then rename over `path`.
    pub fn save(&self) -> Result<(), QueueError> {
        let tmp_path = tmp_path_for(&self.path);
        let body = serde_json::to_string_pretty(&self.queue).map_err(|source| QueueError::Parse {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&tmp_path, body).map_err(|source| QueueError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|source| QueueError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }

    pub fn add_task(&mut self, task: Task) -> Result<(), QueueError> {
        if self.queue.find(&task.id).is_some() {
            return Err(QueueError::DuplicateTask(task.id));
        }
        self.queue.tasks.push(task);
        Ok(())
    }

    /// First pending task by declared order (§4.4). Priority is not modeled.
    pub fn get_next_pending(&self) -> Option<&Task> {
        self.queue.tasks.iter().find(|t| t.status == TaskStatus::Pending)
    }

    pub fn mark_in_progress(&mut self, id: &str) -> Result<(), QueueError> {
        if let Some(existing) = self.queue.in_progress_task() {
            if existing.id != id {
                return Err(QueueError::AlreadyInProgress(existing.id.clone()));
            }
        }
        let task = self.require_mut(id)?;
        task.status = TaskStatus::InProgress;
        task.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_complete(&mut self, id: &str, commit_ref: impl Into<String>) -> Result<(), QueueError> {
        let task = self.require_mut(id)?;
        task.status = TaskStatus::Complete;
        task.commit_ref = Some(commit_ref.into());
        task.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_blocked(&mut self, id: &str, reason: impl Into<String>) -> Result<(), QueueError> {
        let task = self.require_mut(id)?;
        task.status = TaskStatus::Blocked;
        task.last_error = Some(reason.into());
        task.updated_at = Utc::now();
        Ok(())
    }

    pub fn update_progress(&mut self, id: &str, note: impl Into<String>) -> Result<(), QueueError> {
        let task = self.require_mut(id)?;
        task.last_error = Some(note.into());
        task.updated_at = Utc::now();
        Ok(())
    }

    pub fn increment_attempt(&mut self, id: &str) -> Result<u32, QueueError> {
        let task = self.require_mut(id)?;
        task.attempts += 1;
        task.updated_at = Utc::now();
        Ok(task.attempts)
    }

    /// Returns the task still `in_progress` at startup, if any — this is the
    /// resume candidate for C9 step 3.
    pub fn resumable_candidate(&self) -> Option<&Task> {
        self.queue.in_progress_task()
    }

    fn require_mut(&mut self, id: &str) -> Result<&mut Task, QueueError> {
        self.queue
            .find_mut(id)
            .ok_or_else(|| QueueError::TaskNotFound(id.to_string()))
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::super::types::TaskType;
    use super::*;

    fn sample_task(id: &str) -> Task {
        Task::new(id, TaskType::Bugfix, "fix the thing")
    }

    #[test]
    fn load_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let wq = WorkQueue::load(&path, "demo").unwrap();
        assert_eq!(wq.stats().total(), 0);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let mut wq = WorkQueue::load(&path, "demo").unwrap();
        wq.add_task(sample_task("BUG-001")).unwrap();
        wq.save().unwrap();

        let reloaded = WorkQueue::load(&path, "demo").unwrap();
        assert_eq!(reloaded.queue().tasks.len(), 1);
        assert_eq!(reloaded.queue().tasks[0].id, "BUG-001");
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn get_next_pending_returns_first_pending_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let mut wq = WorkQueue::load(&path, "demo").unwrap();
        wq.add_task(sample_task("BUG-001")).unwrap();
        wq.add_task(sample_task("BUG-002")).unwrap();
        wq.mark_in_progress("BUG-001").unwrap();
        wq.mark_complete("BUG-001", "abc123").unwrap();
        let next = wq.get_next_pending().unwrap();
        assert_eq!(next.id, "BUG-002");
    }

    #[test]
    fn only_one_task_in_progress_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let mut wq = WorkQueue::load(&path, "demo").unwrap();
        wq.add_task(sample_task("BUG-001")).unwrap();
        wq.add_task(sample_task("BUG-002")).unwrap();
        wq.mark_in_progress("BUG-001").unwrap();
        let err = wq.mark_in_progress("BUG-002").unwrap_err();
        assert!(matches!(err, QueueError::AlreadyInProgress(_)));
    }

    #[test]
    fn duplicate_task_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let mut wq = WorkQueue::load(&path, "demo").unwrap();
        wq.add_task(sample_task("BUG-001")).unwrap();
        let err = wq.add_task(sample_task("BUG-001")).unwrap_err();
        assert!(matches!(err, QueueError::DuplicateTask(_)));
    }

    #[test]
    fn complete_task_carries_commit_ref() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let mut wq = WorkQueue::load(&path, "demo").unwrap();
        wq.add_task(sample_task("BUG-001")).unwrap();
        wq.mark_in_progress("BUG-001").unwrap();
        wq.mark_complete("BUG-001", "deadbee").unwrap();
        let t = wq.queue().find("BUG-001").unwrap();
        assert_eq!(t.commit_ref.as_deref(), Some("deadbee"));
        assert_eq!(t.status, TaskStatus::Complete);
    }

    #[test]
    fn stats_total_invariant_under_status_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let mut wq = WorkQueue::load(&path, "demo").unwrap();
        wq.add_task(sample_task("BUG-001")).unwrap();
        wq.add_task(sample_task("BUG-002")).unwrap();
        let before = wq.stats().total();
        wq.mark_in_progress("BUG-001").unwrap();
        wq.mark_complete("BUG-001", "abc").unwrap();
        wq.mark_blocked("BUG-002", "stuck").unwrap();
        assert_eq!(wq.stats().total(), before);
    }

    #[test]
    fn reload_picks_up_operator_edits_to_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let mut wq = WorkQueue::load(&path, "demo").unwrap();
        wq.add_task(sample_task("BUG-001")).unwrap();
        wq.save().unwrap();

        // Operator appends a task directly to the file while the loop runs.
        let mut on_disk = WorkQueue::load(&path, "demo").unwrap();
        on_disk.add_task(sample_task("BUG-002")).unwrap();
        on_disk.save().unwrap();

        wq.reload().unwrap();
        assert_eq!(wq.queue().tasks.len(), 2);
        assert!(wq.queue().find("BUG-002").is_some());
    }

    #[test]
    fn increment_attempt_only_increases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let mut wq = WorkQueue::load(&path, "demo").unwrap();
        wq.add_task(sample_task("BUG-001")).unwrap();
        assert_eq!(wq.increment_attempt("BUG-001").unwrap(), 1);
        assert_eq!(wq.increment_attempt("BUG-001").unwrap(), 2);
    }
}
