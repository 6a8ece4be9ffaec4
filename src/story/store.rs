use crate::error::StoryError;
use log::{debug, info};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Immutable-once-created snapshot of the structured prompt.
///
/// `version` is a creation-time stamp, strictly monotonic within one story,
/// used as the tie-break for "most recent" when the active version is
/// deleted. Whether a version is active is derived from the story's pointer,
/// not stored per snapshot, so exactly one version is active by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptVersion {
    pub id: String,
    pub content: String,
    pub version: u64,
    pub updated_at: SystemTime,
}

/// The versioned structured-prompt document bound 1:1 to a conversation.
#[derive(Debug, Clone)]
pub struct Story {
    content: String,
    updated_at: SystemTime,
    versions: Vec<PromptVersion>,
    active_version_id: String,
}

impl Story {
    /// Current effective text, always equal to the active version's content.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn updated_at(&self) -> SystemTime {
        self.updated_at
    }

    /// Version log in creation order.
    pub fn versions(&self) -> &[PromptVersion] {
        &self.versions
    }

    pub fn active_version_id(&self) -> &str {
        &self.active_version_id
    }

    pub fn is_active(&self, version_id: &str) -> bool {
        self.active_version_id == version_id
    }

    pub fn active_version(&self) -> &PromptVersion {
        self.versions
            .iter()
            .find(|v| v.id == self.active_version_id)
            .unwrap_or_else(|| unreachable!("active version id always points into the log"))
    }

    fn active_version_mut(&mut self) -> &mut PromptVersion {
        let active_id = self.active_version_id.clone();
        self.versions
            .iter_mut()
            .find(|v| v.id == active_id)
            .unwrap_or_else(|| unreachable!("active version id always points into the log"))
    }

    fn next_stamp(&self) -> u64 {
        let now = now_millis();
        let last = self.versions.iter().map(|v| v.version).max().unwrap_or(0);
        now.max(last + 1)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// In-memory map of stories keyed by conversation id.
///
/// Each story is only ever mutated through the orchestrator that owns its
/// conversation, so operations take `&mut self` and need no interior locking.
#[derive(Debug, Default)]
pub struct StoryStore {
    stories: HashMap<String, Story>,
    id_counter: u64,
}

impl StoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn story(&self, story_id: &str) -> Option<&Story> {
        self.stories.get(story_id)
    }

    pub fn contains(&self, story_id: &str) -> bool {
        self.stories.contains_key(story_id)
    }

    /// Commit structured content. Creates the story (single active version)
    /// if it does not exist yet. With `create_new_version` a fresh snapshot
    /// is appended and activated; otherwise the active version's content is
    /// overwritten in place and its timestamp bumped. Returns the id of the
    /// version now holding the content.
    pub fn commit(&mut self, story_id: &str, content: &str, create_new_version: bool) -> String {
        self.id_counter += 1;
        let version_id = format!("ver_{}", self.id_counter);
        let now = SystemTime::now();

        match self.stories.get_mut(story_id) {
            None => {
                let version = PromptVersion {
                    id: version_id.clone(),
                    content: content.to_string(),
                    version: now_millis(),
                    updated_at: now,
                };
                self.stories.insert(
                    story_id.to_string(),
                    Story {
                        content: content.to_string(),
                        updated_at: now,
                        versions: vec![version],
                        active_version_id: version_id.clone(),
                    },
                );
                info!("created story (story_id={story_id}, version_id={version_id})");
                version_id
            }
            Some(story) => {
                story.content = content.to_string();
                story.updated_at = now;
                if create_new_version {
                    let stamp = story.next_stamp();
                    story.versions.push(PromptVersion {
                        id: version_id.clone(),
                        content: content.to_string(),
                        version: stamp,
                        updated_at: now,
                    });
                    story.active_version_id = version_id.clone();
                    debug!("committed new version (story_id={story_id}, version_id={version_id})");
                    version_id
                } else {
                    let active = story.active_version_mut();
                    active.content = content.to_string();
                    active.updated_at = now;
                    let active_id = active.id.clone();
                    debug!("updated active version in place (story_id={story_id}, version_id={active_id})");
                    active_id
                }
            }
        }
    }

    /// Activate an earlier version and restore its content as the story's
    /// current text.
    pub fn revert(&mut self, story_id: &str, version_id: &str) -> Result<(), StoryError> {
        let story = self
            .stories
            .get_mut(story_id)
            .ok_or_else(|| StoryError::StoryNotFound(story_id.to_string()))?;
        let target = story
            .versions
            .iter()
            .find(|v| v.id == version_id)
            .ok_or_else(|| StoryError::VersionNotFound(version_id.to_string()))?;

        story.content = target.content.clone();
        story.active_version_id = version_id.to_string();
        story.updated_at = SystemTime::now();
        info!("reverted story (story_id={story_id}, version_id={version_id})");
        Ok(())
    }

    /// Delete one version. Rejected for the sole remaining version. Deleting
    /// the active version promotes the remaining version with the highest
    /// stamp. All-or-nothing: on error the story is untouched.
    pub fn delete(&mut self, story_id: &str, version_id: &str) -> Result<(), StoryError> {
        let story = self
            .stories
            .get_mut(story_id)
            .ok_or_else(|| StoryError::StoryNotFound(story_id.to_string()))?;
        let index = story
            .versions
            .iter()
            .position(|v| v.id == version_id)
            .ok_or_else(|| StoryError::VersionNotFound(version_id.to_string()))?;
        if story.versions.len() == 1 {
            return Err(StoryError::LastVersion);
        }

        let was_active = story.is_active(version_id);
        story.versions.remove(index);

        if was_active {
            let promoted = story
                .versions
                .iter()
                .max_by_key(|v| v.version)
                .unwrap_or_else(|| unreachable!("at least one version remains after delete"));
            story.active_version_id = promoted.id.clone();
            story.content = promoted.content.clone();
            story.updated_at = SystemTime::now();
            let promoted_id = story.active_version_id.clone();
            info!("deleted active version, promoted (story_id={story_id}, version_id={promoted_id})");
        } else {
            debug!("deleted version (story_id={story_id}, version_id={version_id})");
        }
        Ok(())
    }

    /// Collapse the version log to only the currently active version.
    pub fn clear_history(&mut self, story_id: &str) -> Result<(), StoryError> {
        let story = self
            .stories
            .get_mut(story_id)
            .ok_or_else(|| StoryError::StoryNotFound(story_id.to_string()))?;
        let active_id = story.active_version_id.clone();
        story.versions.retain(|v| v.id == active_id);
        info!("cleared story history (story_id={story_id})");
        Ok(())
    }

    /// Housekeeping: keep the `n` most recent versions (by stamp), always
    /// retaining the active version. Returns how many versions were removed.
    pub fn keep_last(&mut self, story_id: &str, n: usize) -> Result<usize, StoryError> {
        let story = self
            .stories
            .get_mut(story_id)
            .ok_or_else(|| StoryError::StoryNotFound(story_id.to_string()))?;
        let keep = n.max(1);
        if story.versions.len() <= keep {
            return Ok(0);
        }

        let mut stamps: Vec<u64> = story.versions.iter().map(|v| v.version).collect();
        stamps.sort_unstable_by(|a, b| b.cmp(a));
        let cutoff = stamps[keep - 1];

        let active_id = story.active_version_id.clone();
        let before = story.versions.len();
        story
            .versions
            .retain(|v| v.version >= cutoff || v.id == active_id);
        let removed = before - story.versions.len();
        if removed > 0 {
            debug!("pruned versions (story_id={story_id}, removed={removed})");
        }
        Ok(removed)
    }
}
