//! Scene batching.
//!
//! Walks the corpus in `(thread_id, post_id)` order and groups
//! consecutive `qm_post` posts of one thread into scenes. A scene closes
//! when the run is broken by an untagged post or a thread change; thread
//! boundaries always close any open scene.
//!
//! The batcher holds one finished scene back until it knows whether a
//! later scene will come from the same thread, so `is_thread_end` is
//! correct even when a thread's tail is untagged posts. Threads that
//! yield no scenes at all still produce an `EmptyThread` boundary event.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use qc_domain::scene::{Scene, StoryPost};

use crate::reader::{CorpusReader, Result};

/// What the runner receives from the batcher.
#[derive(Debug, Clone)]
pub enum SceneEvent {
    Scene(Scene),
    /// A thread passed by without a single `qm_post` post. The runner
    /// still observes the boundary (thread-state bookkeeping).
    EmptyThread { thread_id: i64 },
}

/// Lazy, finite, non-restartable scene sequence over the corpus.
pub struct SceneBatcher {
    reader: Arc<Mutex<CorpusReader>>,
    batch_size: usize,

    cursor: Option<(i64, i64)>,
    queue: VecDeque<StoryPost>,
    source_drained: bool,
    finished: bool,

    assembly_thread: Option<i64>,
    buffer: Vec<StoryPost>,
    scene_index: u32,
    thread_yielded: bool,
    held: Option<Scene>,

    resume_thread: Option<i64>,
    resume_scene_index: u32,

    ready: VecDeque<SceneEvent>,
}

impl SceneBatcher {
    /// `start_after` resumes traversal strictly after that
    /// `(thread_id, post_id)`. When the resumed position is mid-thread,
    /// `resume_scene_index` seeds scene numbering for that thread.
    pub fn new(
        reader: Arc<Mutex<CorpusReader>>,
        batch_size: usize,
        start_after: Option<(i64, i64)>,
        resume_scene_index: u32,
    ) -> Self {
        Self {
            reader,
            batch_size: batch_size.max(1),
            cursor: start_after,
            queue: VecDeque::new(),
            source_drained: false,
            finished: false,
            assembly_thread: None,
            buffer: Vec::new(),
            scene_index: 0,
            thread_yielded: false,
            held: None,
            resume_thread: start_after.map(|(thread_id, _)| thread_id),
            resume_scene_index,
            ready: VecDeque::new(),
        }
    }

    /// Pull the next event. `None` means the corpus is exhausted.
    pub fn next_event(&mut self) -> Result<Option<SceneEvent>> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }
            match self.next_post()? {
                Some(post) => self.accept(post),
                None => {
                    self.flush_scene();
                    if let Some(thread_id) = self.assembly_thread.take() {
                        self.close_thread(thread_id);
                    }
                    self.finished = true;
                }
            }
        }
    }

    // ── Post intake ───────────────────────────────────────────────

    fn next_post(&mut self) -> Result<Option<StoryPost>> {
        if self.queue.is_empty() && !self.source_drained {
            let batch = self
                .reader
                .lock()
                .posts_after(self.cursor, self.batch_size)?;
            if batch.len() < self.batch_size {
                self.source_drained = true;
                tracing::debug!(fetched = batch.len(), "corpus drained");
            }
            if let Some(last) = batch.last() {
                self.cursor = Some((last.thread_id, last.id));
            }
            self.queue.extend(batch);
        }
        Ok(self.queue.pop_front())
    }

    fn accept(&mut self, post: StoryPost) {
        match self.assembly_thread {
            Some(thread_id) if thread_id != post.thread_id => {
                self.flush_scene();
                self.close_thread(thread_id);
                self.start_thread(post.thread_id);
            }
            None => self.start_thread(post.thread_id),
            Some(_) => {}
        }

        if post.is_qm_post() {
            self.buffer.push(post);
        } else {
            // Untagged post breaks the run; leading ones fall through
            // silently because the buffer is empty.
            self.flush_scene();
        }
    }

    fn start_thread(&mut self, thread_id: i64) {
        self.assembly_thread = Some(thread_id);
        self.scene_index = if self.resume_thread == Some(thread_id) {
            self.resume_scene_index
        } else {
            0
        };
        self.thread_yielded = false;
    }

    // ── Scene assembly ────────────────────────────────────────────

    fn flush_scene(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let thread_id = self.assembly_thread.expect("buffer implies thread");
        let scene = Scene {
            thread_id,
            posts: std::mem::take(&mut self.buffer),
            scene_index: self.scene_index,
            is_thread_start: self.scene_index == 0,
            is_thread_end: false,
        };
        self.scene_index += 1;
        self.thread_yielded = true;

        // A newer scene from the same thread proves the held one was not
        // the thread's last.
        if let Some(prev) = self.held.take() {
            self.ready.push_back(SceneEvent::Scene(prev));
        }
        self.held = Some(scene);
    }

    fn close_thread(&mut self, thread_id: i64) {
        if let Some(mut prev) = self.held.take() {
            prev.is_thread_end = true;
            self.ready.push_back(SceneEvent::Scene(prev));
        }
        if !self.thread_yielded {
            self.ready.push_back(SceneEvent::EmptyThread { thread_id });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qc_domain::scene::QM_POST_TAG;

    fn post(thread_id: i64, id: i64, qm: bool) -> StoryPost {
        StoryPost {
            thread_id,
            id,
            author: None,
            subject: None,
            timestamp: None,
            body: format!("body {id}"),
            tags: if qm {
                vec![QM_POST_TAG.into()]
            } else {
                vec!["story_post".into()]
            },
        }
    }

    fn batcher_over(posts: Vec<StoryPost>) -> SceneBatcher {
        let reader = CorpusReader::open_in_memory().unwrap();
        for p in &posts {
            reader.insert_post(p).unwrap();
        }
        SceneBatcher::new(Arc::new(Mutex::new(reader)), 3, None, 0)
    }

    fn drain(batcher: &mut SceneBatcher) -> Vec<SceneEvent> {
        let mut events = Vec::new();
        while let Some(event) = batcher.next_event().unwrap() {
            events.push(event);
        }
        events
    }

    #[test]
    fn groups_consecutive_qm_posts_into_scenes() {
        let mut b = batcher_over(vec![
            post(1, 100, true),
            post(1, 101, true),
            post(1, 102, false),
            post(1, 103, true),
        ]);
        let events = drain(&mut b);
        assert_eq!(events.len(), 2);
        match (&events[0], &events[1]) {
            (SceneEvent::Scene(a), SceneEvent::Scene(c)) => {
                assert_eq!(
                    a.posts.iter().map(|p| p.id).collect::<Vec<_>>(),
                    vec![100, 101]
                );
                assert_eq!(a.scene_index, 0);
                assert!(a.is_thread_start);
                assert!(!a.is_thread_end);
                assert_eq!(c.posts.iter().map(|p| p.id).collect::<Vec<_>>(), vec![103]);
                assert_eq!(c.scene_index, 1);
                assert!(c.is_thread_end);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn every_qm_post_lands_in_exactly_one_scene() {
        let posts = vec![
            post(1, 1, false),
            post(1, 2, true),
            post(1, 3, false),
            post(1, 4, true),
            post(1, 5, true),
            post(2, 10, true),
            post(3, 20, false),
            post(4, 30, true),
        ];
        let qm_ids: Vec<i64> = posts
            .iter()
            .filter(|p| p.is_qm_post())
            .map(|p| p.id)
            .collect();
        let mut b = batcher_over(posts);
        let mut seen = Vec::new();
        for event in drain(&mut b) {
            if let SceneEvent::Scene(scene) = event {
                let threads: Vec<i64> = scene.posts.iter().map(|p| p.thread_id).collect();
                assert!(threads.iter().all(|t| *t == scene.thread_id));
                seen.extend(scene.posts.iter().map(|p| p.id));
            }
        }
        assert_eq!(seen, qm_ids);
    }

    #[test]
    fn trailing_untagged_posts_still_mark_thread_end() {
        let mut b = batcher_over(vec![
            post(1, 100, true),
            post(1, 101, false),
            post(1, 102, false),
            post(2, 200, true),
        ]);
        let events = drain(&mut b);
        match &events[0] {
            SceneEvent::Scene(scene) => {
                assert_eq!(scene.thread_id, 1);
                assert!(scene.is_thread_end);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn thread_without_qm_posts_emits_boundary_event() {
        let mut b = batcher_over(vec![
            post(1, 100, false),
            post(1, 101, false),
            post(2, 200, true),
        ]);
        let events = drain(&mut b);
        assert!(matches!(
            events[0],
            SceneEvent::EmptyThread { thread_id: 1 }
        ));
        match &events[1] {
            SceneEvent::Scene(scene) => assert!(scene.is_thread_end),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn empty_corpus_yields_nothing() {
        let mut b = batcher_over(vec![]);
        assert!(drain(&mut b).is_empty());
    }

    #[test]
    fn resume_mid_thread_continues_scene_numbering() {
        let reader = CorpusReader::open_in_memory().unwrap();
        for p in [
            post(1, 100, true),
            post(1, 101, false),
            post(1, 102, true),
            post(2, 200, true),
        ] {
            reader.insert_post(&p).unwrap();
        }
        // Scene 0 (post 100) already processed in a previous run.
        let mut b = SceneBatcher::new(
            Arc::new(Mutex::new(reader)),
            16,
            Some((1, 100)),
            1,
        );
        let events = drain(&mut b);
        match &events[0] {
            SceneEvent::Scene(scene) => {
                assert_eq!(scene.thread_id, 1);
                assert_eq!(scene.scene_index, 1);
                assert!(!scene.is_thread_start);
                assert!(scene.is_thread_end);
            }
            other => panic!("unexpected: {other:?}"),
        }
        match &events[1] {
            SceneEvent::Scene(scene) => {
                assert_eq!(scene.thread_id, 2);
                assert_eq!(scene.scene_index, 0);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
