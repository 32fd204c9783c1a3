//! Read-only corpus reader.
//!
//! The corpus is a SQLite file produced elsewhere; only its row shape
//! matters here. Traversal order is always `(thread_id, id)` ascending.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use qc_domain::scene::StoryPost;

#[derive(thiserror::Error, Debug)]
pub enum CorpusError {
    #[error("corpus: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("post {0} not found")]
    PostNotFound(i64),

    #[error("thread {0} not found")]
    ThreadNotFound(i64),
}

pub type Result<T> = std::result::Result<T, CorpusError>;

/// Read-only handle on the corpus database.
pub struct CorpusReader {
    conn: Connection,
}

impl CorpusReader {
    /// Open the corpus read-only. The file must already exist.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Writable in-memory corpus for tests and fixtures.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            r#"
            CREATE TABLE thread (id INTEGER PRIMARY KEY, title TEXT);
            CREATE TABLE post (
                thread_id INTEGER NOT NULL,
                id INTEGER PRIMARY KEY,
                name TEXT,
                trip_code TEXT,
                subject TEXT,
                time TEXT,
                file_url TEXT,
                file_name TEXT,
                body TEXT NOT NULL
            );
            CREATE TABLE tag (post_id INTEGER NOT NULL, name TEXT NOT NULL);
            CREATE TABLE link (link_from INTEGER, link_to INTEGER);
            CREATE INDEX idx_post_thread ON post(thread_id, id);
            CREATE INDEX idx_tag_post ON tag(post_id);
            "#,
        )?;
        Ok(Self { conn })
    }

    /// Test/fixture helper: insert a post with its tags.
    pub fn insert_post(&self, post: &StoryPost) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO thread (id, title) VALUES (?1, ?2)",
            params![post.thread_id, format!("Thread {}", post.thread_id)],
        )?;
        self.conn.execute(
            "INSERT INTO post (thread_id, id, name, subject, time, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                post.thread_id,
                post.id,
                post.author,
                post.subject,
                post.timestamp,
                post.body
            ],
        )?;
        for tag in &post.tags {
            self.conn.execute(
                "INSERT INTO tag (post_id, name) VALUES (?1, ?2)",
                params![post.id, tag],
            )?;
        }
        Ok(())
    }

    /// Fetch up to `limit` posts strictly after the `(thread_id, post_id)`
    /// cursor, in `(thread_id, id)` order, tags attached.
    pub fn posts_after(
        &self,
        cursor: Option<(i64, i64)>,
        limit: usize,
    ) -> Result<Vec<StoryPost>> {
        let (after_thread, after_post) = cursor.unwrap_or((i64::MIN, i64::MIN));
        let mut stmt = self.conn.prepare_cached(
            "SELECT thread_id, id, name, subject, time, body
             FROM post
             WHERE thread_id > ?1 OR (thread_id = ?1 AND id > ?2)
             ORDER BY thread_id ASC, id ASC
             LIMIT ?3",
        )?;
        let mut posts = stmt
            .query_map(params![after_thread, after_post, limit as i64], row_to_post)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.attach_tags(&mut posts)?;
        Ok(posts)
    }

    /// Fetch a single post by id.
    pub fn get_post(&self, post_id: i64) -> Result<StoryPost> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT thread_id, id, name, subject, time, body FROM post WHERE id = ?1",
        )?;
        let post = stmt
            .query_row(params![post_id], row_to_post)
            .optional()?
            .ok_or(CorpusError::PostNotFound(post_id))?;
        let mut posts = vec![post];
        self.attach_tags(&mut posts)?;
        Ok(posts.pop().expect("just built"))
    }

    /// Fetch a post plus its neighbours within the same thread:
    /// `window` posts before and after by post id.
    pub fn adjacent_posts(&self, post_id: i64, window: u32) -> Result<Vec<StoryPost>> {
        let center = self.get_post(post_id)?;
        let mut stmt = self.conn.prepare_cached(
            "SELECT thread_id, id, name, subject, time, body
             FROM post
             WHERE thread_id = ?1
               AND id >= (SELECT MIN(id) FROM (
                     SELECT id FROM post WHERE thread_id = ?1 AND id <= ?2
                     ORDER BY id DESC LIMIT ?3))
               AND id <= (SELECT MAX(id) FROM (
                     SELECT id FROM post WHERE thread_id = ?1 AND id >= ?2
                     ORDER BY id ASC LIMIT ?3))
             ORDER BY id ASC",
        )?;
        let mut posts = stmt
            .query_map(
                params![center.thread_id, post_id, window as i64 + 1],
                row_to_post,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.attach_tags(&mut posts)?;
        Ok(posts)
    }

    /// Fetch a range of a thread's posts, optionally filtered to a tag.
    pub fn thread_range(
        &self,
        thread_id: i64,
        start: Option<i64>,
        end: Option<i64>,
        tag_filter: Option<&str>,
    ) -> Result<Vec<StoryPost>> {
        if !self.thread_exists(thread_id)? {
            return Err(CorpusError::ThreadNotFound(thread_id));
        }
        let start = start.unwrap_or(i64::MIN);
        let end = end.unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare_cached(
            "SELECT thread_id, id, name, subject, time, body
             FROM post
             WHERE thread_id = ?1 AND id >= ?2 AND id <= ?3
             ORDER BY id ASC",
        )?;
        let mut posts = stmt
            .query_map(params![thread_id, start, end], row_to_post)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.attach_tags(&mut posts)?;
        if let Some(tag) = tag_filter {
            posts.retain(|p| p.tags.iter().any(|t| t == tag));
        }
        Ok(posts)
    }

    pub fn thread_title(&self, thread_id: i64) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT title FROM thread WHERE id = ?1",
                params![thread_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn post_count(&self) -> Result<u64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM post", [], |row| row.get::<_, i64>(0))?
            as u64)
    }

    fn thread_exists(&self, thread_id: i64) -> Result<bool> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM post WHERE thread_id = ?1 LIMIT 1",
                params![thread_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    /// Fill in `tags` for each post with one batched query.
    fn attach_tags(&self, posts: &mut [StoryPost]) -> Result<()> {
        if posts.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = posts.iter().map(|p| p.id.to_string()).collect();
        let sql = format!(
            "SELECT post_id, name FROM tag WHERE post_id IN ({})",
            ids.join(",")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut by_post: HashMap<i64, Vec<String>> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (post_id, name) = row?;
            by_post.entry(post_id).or_default().push(name);
        }
        for post in posts.iter_mut() {
            if let Some(mut tags) = by_post.remove(&post.id) {
                tags.sort();
                post.tags = tags;
            }
        }
        Ok(())
    }
}

fn row_to_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoryPost> {
    Ok(StoryPost {
        thread_id: row.get(0)?,
        id: row.get(1)?,
        author: row.get(2)?,
        subject: row.get(3)?,
        timestamp: row.get(4)?,
        body: row.get(5)?,
        tags: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use qc_domain::scene::QM_POST_TAG;

    fn post(thread_id: i64, id: i64, tags: &[&str]) -> StoryPost {
        StoryPost {
            thread_id,
            id,
            author: Some("QM".into()),
            subject: None,
            timestamp: Some("2016-03-01T12:00:00Z".into()),
            body: format!("post body {id}"),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn fixture() -> CorpusReader {
        let reader = CorpusReader::open_in_memory().unwrap();
        for p in [
            post(1, 100, &[QM_POST_TAG, "op_post"]),
            post(1, 101, &[]),
            post(1, 102, &[QM_POST_TAG]),
            post(2, 200, &[QM_POST_TAG]),
        ] {
            reader.insert_post(&p).unwrap();
        }
        reader
    }

    #[test]
    fn posts_after_cursor_respects_thread_order() {
        let reader = fixture();
        let posts = reader.posts_after(Some((1, 101)), 10).unwrap();
        let ids: Vec<i64> = posts.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![102, 200]);
    }

    #[test]
    fn tags_are_attached() {
        let reader = fixture();
        let p = reader.get_post(100).unwrap();
        assert!(p.tags.contains(&QM_POST_TAG.to_string()));
        assert!(p.tags.contains(&"op_post".to_string()));
    }

    #[test]
    fn adjacent_window_stays_in_thread() {
        let reader = fixture();
        let posts = reader.adjacent_posts(101, 2).unwrap();
        let ids: Vec<i64> = posts.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![100, 101, 102]);
    }

    #[test]
    fn thread_range_tag_filter() {
        let reader = fixture();
        let posts = reader
            .thread_range(1, None, None, Some(QM_POST_TAG))
            .unwrap();
        let ids: Vec<i64> = posts.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![100, 102]);
    }

    #[test]
    fn missing_post_is_an_error() {
        let reader = fixture();
        assert!(matches!(
            reader.get_post(999),
            Err(CorpusError::PostNotFound(999))
        ));
    }
}
