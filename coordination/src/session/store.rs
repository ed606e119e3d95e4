//! C3 — Session State Store.
//!
//! Persists per-task progress as append-only, ordinal-numbered checkpoint
//! files `session-{task_id}-{n}.md`, each a YAML frontmatter block followed
//! by a markdown body (§4.3, §6). The highest ordinal for a task_id is
//! authoritative. Grounded on the teacher's `harness::session` lifecycle
//! (start/next_iteration/complete/retrospective) but diverges from its
//! single-JSON-file persistence to match the spec's multi-checkpoint form.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::SessionError;

use super::types::{IterationEntry, SessionRetrospective, SessionState, StatusToken};

const FRONTMATTER_FENCE: &str = "---";

/// Owns a session directory shared by all tasks in one project run.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Appends a new checkpoint file at the next ordinal for `task_id`.
    /// Atomic via write-to-temp-then-rename.
    pub fn save(
        &self,
        state: &SessionState,
        entries: &[IterationEntry],
    ) -> Result<PathBuf, SessionError> {
        if let Some(latest) = self.latest(&state.task_id)? {
            if latest.status_token == StatusToken::Finalized {
                return Err(SessionError::AlreadyFinalized {
                    task_id: state.task_id.clone(),
                });
            }
        }
        let ordinal = self.next_ordinal(&state.task_id)?;
        self.write_checkpoint(state, entries, None, ordinal)
    }

    /// Writes a terminal checkpoint with `status_token = finalized`,
    /// appending the derived retrospective to the body.
    pub fn finalize(
        &self,
        mut state: SessionState,
        entries: &[IterationEntry],
        retrospective: SessionRetrospective,
    ) -> Result<PathBuf, SessionError> {
        state.status_token = StatusToken::Finalized;
        let ordinal = self.next_ordinal(&state.task_id)?;
        self.write_checkpoint(&state, entries, Some(&retrospective), ordinal)
    }

    /// Reads the highest-ordinal checkpoint for `task_id`. On a malformed
    /// file, logs and treats it as absent (graceful degradation per §4.3).
    pub fn latest(&self, task_id: &str) -> Result<Option<SessionState>, SessionError> {
        let Some((_, path)) = self.highest_ordinal_path(task_id)? else {
            return Ok(None);
        };
        match self.read_checkpoint(&path) {
            Ok(state) => Ok(Some(state)),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "malformed checkpoint, treating as absent");
                Ok(None)
            }
        }
    }

    /// Returns the latest state only if resumable.
    pub fn resume(&self, task_id: &str) -> Result<Option<SessionState>, SessionError> {
        Ok(self.latest(task_id)?.filter(SessionState::is_resumable))
    }

    fn next_ordinal(&self, task_id: &str) -> Result<u32, SessionError> {
        Ok(match self.highest_ordinal_path(task_id)? {
            Some((n, _)) => n + 1,
            None => 1,
        })
    }

    fn highest_ordinal_path(&self, task_id: &str) -> Result<Option<(u32, PathBuf)>, SessionError> {
        if !self.dir.exists() {
            return Ok(None);
        }
        let prefix = format!("session-{task_id}-");
        let mut best: Option<(u32, PathBuf)> = None;
        let entries = std::fs::read_dir(&self.dir).map_err(|source| SessionError::Io {
            path: self.dir.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| SessionError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix(&prefix).and_then(|r| r.strip_suffix(".md")) {
                if let Ok(n) = rest.parse::<u32>() {
                    if best.as_ref().map(|(b, _)| n > *b).unwrap_or(true) {
                        best = Some((n, entry.path()));
                    }
                }
            }
        }
        Ok(best)
    }

    fn write_checkpoint(
        &self,
        state: &SessionState,
        entries: &[IterationEntry],
        retrospective: Option<&SessionRetrospective>,
        ordinal: u32,
    ) -> Result<PathBuf, SessionError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| SessionError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let final_path = self.dir.join(format!("session-{}-{}.md", state.task_id, ordinal));
        let tmp_path = self.dir.join(format!("session-{}-{}.md.tmp", state.task_id, ordinal));

        let frontmatter = serde_yaml::to_string(state).map_err(|e| SessionError::MalformedCheckpoint {
            path: final_path.clone(),
            detail: e.to_string(),
        })?;

        let mut body = String::new();
        body.push_str(FRONTMATTER_FENCE);
        body.push('\n');
        body.push_str(&frontmatter);
        body.push_str(FRONTMATTER_FENCE);
        body.push_str("\n\n");
        body.push_str(&format!("# Session {} — task {}\n\n", state.session_id, state.task_id));
        for entry in entries {
            body.push_str(&entry.to_markdown());
            body.push('\n');
        }
        if let Some(retro) = retrospective {
            body.push_str(&retro.to_markdown());
        }

        std::fs::write(&tmp_path, body).map_err(|source| SessionError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, &final_path).map_err(|source| SessionError::Io {
            path: final_path.clone(),
            source,
        })?;
        debug!(path = %final_path.display(), ordinal, "checkpoint written");
        Ok(final_path)
    }

    fn read_checkpoint(&self, path: &Path) -> Result<SessionState, SessionError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SessionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut parts = raw.splitn(3, FRONTMATTER_FENCE);
        let _before = parts.next();
        let frontmatter = parts.next().ok_or_else(|| SessionError::MalformedCheckpoint {
            path: path.to_path_buf(),
            detail: "missing frontmatter fences".to_string(),
        })?;
        serde_yaml::from_str(frontmatter).map_err(|e| SessionError::MalformedCheckpoint {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }
}
