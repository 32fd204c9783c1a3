//! Corpus posts and the scene work unit.

use serde::{Deserialize, Serialize};

/// Tag carried by story-advancing ("quest-master") posts. Only posts
/// with this tag are batched into scenes.
pub const QM_POST_TAG: &str = "qm_post";

/// One post from the read-only corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryPost {
    pub thread_id: i64,
    pub id: i64,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub timestamp: Option<String>,
    pub body: String,
    pub tags: Vec<String>,
}

impl StoryPost {
    pub fn is_qm_post(&self) -> bool {
        self.tags.iter().any(|t| t == QM_POST_TAG)
    }
}

/// The runner's work unit: a contiguous run of `qm_post` posts within
/// one thread. Scenes are disjoint and never span threads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub thread_id: i64,
    /// Non-empty, ordered by post id.
    pub posts: Vec<StoryPost>,
    /// 0-based index of this scene within its thread.
    pub scene_index: u32,
    pub is_thread_start: bool,
    /// True when no later scene will come from this thread.
    pub is_thread_end: bool,
}

impl Scene {
    pub fn first_post_id(&self) -> i64 {
        self.posts.first().map(|p| p.id).unwrap_or(0)
    }

    pub fn last_post_id(&self) -> i64 {
        self.posts.last().map(|p| p.id).unwrap_or(0)
    }

    /// Render the scene for the prompt: post headers + bodies in order.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for post in &self.posts {
            out.push_str(&format!(
                "[post {} / thread {}]",
                post.id, post.thread_id
            ));
            if let Some(author) = &post.author {
                out.push_str(&format!(" {author}"));
            }
            if let Some(ts) = &post.timestamp {
                out.push_str(&format!(" @ {ts}"));
            }
            out.push('\n');
            out.push_str(&post.body);
            out.push_str("\n\n");
        }
        out.truncate(out.trim_end().len());
        out
    }
}
