use std::{
    cmp::Reverse,
    collections::{BTreeMap, HashMap, HashSet},
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use anyhow::anyhow;
use async_trait::async_trait;
use blogsy_api::{
    glob_matches, AuthToken, Cache, Comment, CommentId, MediaRef, Post, PostFilter, PostId, PostSort,
    PostStatus, PrivateUser, Reaction, Store, StoredUser, Time, UserId, Uuid,
};
use tokio::sync::RwLock;

const SESSION_LIFETIME_DAYS: i64 = 30;

#[derive(Debug, Default)]
struct Db {
    users: BTreeMap<UserId, StoredUser>,
    sessions: HashMap<AuthToken, (UserId, Time)>,
    posts: HashMap<PostId, Post>,

    /// In insertion order
    comments: Vec<Comment>,

    /// Uploads and their uploader, by public id
    media: HashMap<String, (UserId, MediaRef)>,
}

impl Db {
    /// Refreshes the embedded author view, like a join would
    fn with_author(&self, mut p: Post) -> Post {
        if let Some(u) = self.users.get(&p.author.id) {
            p.author = u.author();
        }
        p
    }

    fn comment_with_author(&self, mut c: Comment) -> Comment {
        if let Some(u) = self.users.get(&c.author.id) {
            c.author = u.author();
        }
        c
    }

    fn sorted(&self, mut posts: Vec<Post>, sort: PostSort) -> Vec<Post> {
        match sort {
            PostSort::Newest => posts.sort_by_key(|p| Reverse(p.created_at)),
            PostSort::Oldest => posts.sort_by_key(|p| p.created_at),
            PostSort::Likes => posts.sort_by_key(|p| (Reverse(p.likes_count), Reverse(p.created_at))),
        }
        posts.into_iter().map(|p| self.with_author(p)).collect()
    }
}

/// In-memory `Store`, with knobs to make it fail on purpose
#[derive(Debug, Default)]
pub struct MemStore {
    db: RwLock<Db>,
    failing: AtomicBool,

    /// Number of comment bulk deletions to let through before failing
    comment_delete_budget: RwLock<Option<usize>>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }

    /// Makes every subsequent call fail, or work again
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Lets `n` more calls to `delete_comments` through, then fails the following ones
    pub async fn fail_comment_deletes_after(&self, n: usize) {
        *self.comment_delete_budget.write().await = Some(n);
    }

    /// Return the current number of comments, across all posts
    pub async fn test_num_comments(&self) -> usize {
        self.db.read().await.comments.len()
    }

    /// Return whether the comment is still stored
    pub async fn test_has_comment(&self, id: CommentId) -> bool {
        self.db.read().await.comments.iter().any(|c| c.id == id)
    }

    /// Stores a comment as-is, bypassing every check the services would do
    pub async fn test_insert_raw_comment(&self, c: Comment) {
        self.db.write().await.comments.push(c);
    }

    fn check(&self) -> anyhow::Result<()> {
        match self.failing.load(Ordering::SeqCst) {
            true => Err(anyhow!("mock store is failing on purpose")),
            false => Ok(()),
        }
    }
}

#[async_trait]
impl Store for MemStore {
    async fn insert_user(&self, user: &StoredUser) -> anyhow::Result<()> {
        self.check()?;
        let mut db = self.db.write().await;
        if db.users.values().any(|u| {
            u.username() == user.username() || u.user.email == user.user.email
        }) || db.users.contains_key(&user.id())
        {
            return Err(anyhow!("user {:?} conflicts with an existing user", user.id()));
        }
        db.users.insert(user.id(), user.clone());
        Ok(())
    }

    async fn find_user(&self, id: UserId) -> anyhow::Result<Option<StoredUser>> {
        self.check()?;
        Ok(self.db.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<StoredUser>> {
        self.check()?;
        Ok(self
            .db
            .read()
            .await
            .users
            .values()
            .find(|u| u.user.email == email)
            .cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> anyhow::Result<Option<StoredUser>> {
        self.check()?;
        Ok(self
            .db
            .read()
            .await
            .users
            .values()
            .find(|u| u.username() == username)
            .cloned())
    }

    async fn update_user(&self, user: &PrivateUser) -> anyhow::Result<()> {
        self.check()?;
        let mut db = self.db.write().await;
        let taken = db
            .users
            .values()
            .any(|u| u.id() != user.user.id && u.username() == user.user.username);
        if taken {
            return Err(anyhow!("username {:?} is already taken", user.user.username));
        }
        let stored = db
            .users
            .get_mut(&user.user.id)
            .ok_or_else(|| anyhow!("updating unknown user {:?}", user.user.id))?;
        stored.user = user.clone();
        Ok(())
    }

    async fn set_password_hash(&self, user: UserId, hash: &str) -> anyhow::Result<()> {
        self.check()?;
        let mut db = self.db.write().await;
        let stored = db
            .users
            .get_mut(&user)
            .ok_or_else(|| anyhow!("setting password of unknown user {user:?}"))?;
        stored.password_hash = String::from(hash);
        Ok(())
    }

    async fn set_reset_token(
        &self,
        user: UserId,
        token: Option<(Uuid, Time)>,
    ) -> anyhow::Result<()> {
        self.check()?;
        let mut db = self.db.write().await;
        let stored = db
            .users
            .get_mut(&user)
            .ok_or_else(|| anyhow!("setting reset token of unknown user {user:?}"))?;
        stored.reset_token = token;
        Ok(())
    }

    async fn find_user_by_reset_token(
        &self,
        token: Uuid,
        now: Time,
    ) -> anyhow::Result<Option<StoredUser>> {
        self.check()?;
        Ok(self
            .db
            .read()
            .await
            .users
            .values()
            .find(|u| matches!(u.reset_token, Some((t, expires)) if t == token && expires > now))
            .cloned())
    }

    async fn create_session(&self, user: UserId, token: AuthToken) -> anyhow::Result<()> {
        self.check()?;
        self.db
            .write()
            .await
            .sessions
            .insert(token, (user, chrono::Utc::now()));
        Ok(())
    }

    async fn recover_session(&self, token: AuthToken) -> anyhow::Result<Option<UserId>> {
        self.check()?;
        let limit = chrono::Utc::now() - chrono::Duration::days(SESSION_LIFETIME_DAYS);
        Ok(match self.db.read().await.sessions.get(&token) {
            Some((user, created)) if *created > limit => Some(*user),
            _ => None,
        })
    }

    async fn delete_session(&self, token: AuthToken) -> anyhow::Result<bool> {
        self.check()?;
        Ok(self.db.write().await.sessions.remove(&token).is_some())
    }

    async fn insert_post(&self, post: &Post) -> anyhow::Result<()> {
        self.check()?;
        let mut db = self.db.write().await;
        if db.posts.contains_key(&post.id) {
            return Err(anyhow!("post {:?} already exists", post.id));
        }
        db.posts.insert(post.id, post.clone());
        Ok(())
    }

    async fn find_post(&self, id: PostId) -> anyhow::Result<Option<Post>> {
        self.check()?;
        let db = self.db.read().await;
        Ok(db.posts.get(&id).cloned().map(|p| db.with_author(p)))
    }

    async fn update_post(&self, post: &Post) -> anyhow::Result<bool> {
        self.check()?;
        let mut db = self.db.write().await;
        Ok(match db.posts.get_mut(&post.id) {
            None => false,
            Some(p) => {
                let likes = std::mem::take(&mut p.likes);
                *p = post.clone();
                p.likes_count = likes.len() as u64;
                p.likes = likes;
                true
            }
        })
    }

    async fn delete_post(&self, id: PostId) -> anyhow::Result<bool> {
        self.check()?;
        let mut db = self.db.write().await;
        let existed = db.posts.remove(&id).is_some();
        db.comments.retain(|c| c.post_id != id);
        Ok(existed)
    }

    async fn list_posts(&self, filter: &PostFilter) -> anyhow::Result<(Vec<Post>, u64)> {
        self.check()?;
        let db = self.db.read().await;
        let matching = db
            .posts
            .values()
            .filter(|p| p.status == filter.status)
            .filter(|p| filter.author.map_or(true, |a| p.author.id == a))
            .filter(|p| filter.tag.as_ref().map_or(true, |t| p.tags.contains(t)))
            .cloned()
            .collect::<Vec<_>>();
        let total = matching.len() as u64;
        let page = db
            .sorted(matching, filter.sort)
            .into_iter()
            .skip(usize::try_from(filter.skip).unwrap_or(usize::MAX))
            .take(usize::try_from(filter.limit).unwrap_or(usize::MAX))
            .collect();
        Ok((page, total))
    }

    async fn list_drafts(&self, author: UserId) -> anyhow::Result<Vec<Post>> {
        self.check()?;
        let db = self.db.read().await;
        let mut drafts = db
            .posts
            .values()
            .filter(|p| p.status == PostStatus::Draft && p.author.id == author)
            .cloned()
            .collect::<Vec<_>>();
        drafts.sort_by_key(|p| Reverse(p.updated_at));
        Ok(drafts.into_iter().map(|p| db.with_author(p)).collect())
    }

    async fn search_posts(
        &self,
        keyword: &str,
        sort: PostSort,
        limit: u64,
    ) -> anyhow::Result<Vec<Post>> {
        self.check()?;
        let db = self.db.read().await;
        let keyword = keyword.to_lowercase();
        let words = keyword.split_whitespace().collect::<Vec<_>>();
        let matching_authors = db
            .users
            .values()
            .filter(|u| u.username().to_lowercase().contains(&keyword))
            .map(|u| u.id())
            .collect::<HashSet<_>>();
        let matching = db
            .posts
            .values()
            .filter(|p| p.status == PostStatus::Published)
            .filter(|p| {
                // every word must appear in the title or content, like `plainto_tsquery`
                let text = format!("{} {}", p.title, p.content).to_lowercase();
                let tokens = text
                    .split(|c: char| !c.is_alphanumeric())
                    .collect::<HashSet<_>>();
                (!words.is_empty() && words.iter().all(|w| tokens.contains(w)))
                    || p.tags.iter().any(|t| t.to_lowercase() == keyword)
                    || matching_authors.contains(&p.author.id)
            })
            .cloned()
            .collect::<Vec<_>>();
        Ok(db
            .sorted(matching, sort)
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect())
    }

    async fn set_post_like(&self, post: PostId, user: UserId, liked: bool) -> anyhow::Result<()> {
        self.check()?;
        let mut db = self.db.write().await;
        let p = db
            .posts
            .get_mut(&post)
            .ok_or_else(|| anyhow!("liking unknown post {post:?}"))?;
        match liked {
            true => p.likes.insert(user),
            false => p.likes.remove(&user),
        };
        p.likes_count = p.likes.len() as u64;
        Ok(())
    }

    async fn insert_comment(&self, comment: &Comment) -> anyhow::Result<()> {
        self.check()?;
        let mut db = self.db.write().await;
        if !db.posts.contains_key(&comment.post_id) {
            return Err(anyhow!("comment {:?} is on unknown post", comment.id));
        }
        db.comments.push(comment.clone());
        Ok(())
    }

    async fn find_comment(&self, id: CommentId) -> anyhow::Result<Option<Comment>> {
        self.check()?;
        let db = self.db.read().await;
        Ok(db
            .comments
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .map(|c| db.comment_with_author(c)))
    }

    async fn list_comments(&self, post: PostId) -> anyhow::Result<Vec<Comment>> {
        self.check()?;
        let db = self.db.read().await;
        let mut res = db
            .comments
            .iter()
            .filter(|c| c.post_id == post)
            .cloned()
            .map(|c| db.comment_with_author(c))
            .collect::<Vec<_>>();
        res.sort_by_key(|c| c.created_at);
        Ok(res)
    }

    async fn find_child_comment_ids(
        &self,
        parents: &[CommentId],
    ) -> anyhow::Result<Vec<CommentId>> {
        self.check()?;
        let parents = parents.iter().collect::<HashSet<_>>();
        Ok(self
            .db
            .read()
            .await
            .comments
            .iter()
            .filter(|c| c.parent_id.map_or(false, |p| parents.contains(&p)))
            .map(|c| c.id)
            .collect())
    }

    async fn delete_comments(&self, ids: &[CommentId]) -> anyhow::Result<u64> {
        self.check()?;
        if let Some(budget) = &mut *self.comment_delete_budget.write().await {
            match budget.checked_sub(1) {
                Some(left) => *budget = left,
                None => return Err(anyhow!("mock store refuses to delete more comments")),
            }
        }
        let ids = ids.iter().collect::<HashSet<_>>();
        let mut db = self.db.write().await;
        let before = db.comments.len();
        db.comments.retain(|c| !ids.contains(&c.id));
        Ok((before - db.comments.len()) as u64)
    }

    async fn set_comment_reaction(
        &self,
        comment: CommentId,
        user: UserId,
        reaction: Option<Reaction>,
    ) -> anyhow::Result<()> {
        self.check()?;
        let mut db = self.db.write().await;
        let c = db
            .comments
            .iter_mut()
            .find(|c| c.id == comment)
            .ok_or_else(|| anyhow!("reacting to unknown comment {comment:?}"))?;
        c.likes.remove(&user);
        c.dislikes.remove(&user);
        match reaction {
            Some(Reaction::Like) => c.likes.insert(user),
            Some(Reaction::Dislike) => c.dislikes.insert(user),
            None => false,
        };
        Ok(())
    }

    async fn insert_media(&self, owner: UserId, media: &MediaRef) -> anyhow::Result<()> {
        self.check()?;
        let mut db = self.db.write().await;
        if db.media.contains_key(&media.public_id) {
            return Err(anyhow!("upload {:?} is already recorded", media.public_id));
        }
        db.media
            .insert(media.public_id.clone(), (owner, media.clone()));
        Ok(())
    }

    async fn find_media(&self, public_id: &str) -> anyhow::Result<Option<(UserId, MediaRef)>> {
        self.check()?;
        Ok(self.db.read().await.media.get(public_id).cloned())
    }

    async fn is_media_referenced(&self, public_id: &str) -> anyhow::Result<bool> {
        self.check()?;
        Ok(self
            .db
            .read()
            .await
            .posts
            .values()
            .any(|p| p.media.iter().any(|m| m.public_id == public_id)))
    }

    async fn delete_media(&self, public_id: &str) -> anyhow::Result<()> {
        self.check()?;
        self.db.write().await.media.remove(public_id);
        Ok(())
    }
}

/// In-memory `Cache` with expiring entries
#[derive(Debug, Default)]
pub struct MemCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    failing: AtomicBool,
}

impl MemCache {
    pub fn new() -> MemCache {
        MemCache::default()
    }

    /// Makes every subsequent call fail, or work again
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Return the live keys, sorted
    pub async fn test_keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(_, (_, expires))| *expires > now)
            .map(|(k, _)| k.clone())
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }

    fn check(&self) -> anyhow::Result<()> {
        match self.failing.load(Ordering::SeqCst) {
            true => Err(anyhow!("mock cache is failing on purpose")),
            false => Ok(()),
        }
    }
}

#[async_trait]
impl Cache for MemCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.check()?;
        Ok(match self.entries.read().await.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Some(value.clone()),
            _ => None,
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        self.check()?;
        self.entries
            .write()
            .await
            .insert(String::from(key), (String::from(value), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.check()?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> anyhow::Result<()> {
        self.check()?;
        self.entries
            .write()
            .await
            .retain(|k, _| !glob_matches(pattern, k));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_entries_expire() {
        let cache = MemCache::new();
        cache
            .set("a", "1", Duration::from_millis(0))
            .await
            .unwrap();
        cache.set("b", "2", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert_eq!(cache.get("b").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn cache_pattern_deletes() {
        let cache = MemCache::new();
        for k in ["posts:list:1", "posts:list:2", "posts:detail:1"] {
            cache.set(k, "x", Duration::from_secs(60)).await.unwrap();
        }
        cache.delete_matching("posts:list:*").await.unwrap();
        assert_eq!(cache.test_keys().await, vec![String::from("posts:detail:1")]);
    }

    #[tokio::test]
    async fn failing_cache_errors() {
        let cache = MemCache::new();
        cache.set_failing(true);
        assert!(cache.get("a").await.is_err());
        cache.set_failing(false);
        assert!(cache.get("a").await.is_ok());
    }

    #[tokio::test]
    async fn comment_delete_budget_runs_out() {
        let store = MemStore::new();
        store.fail_comment_deletes_after(1).await;
        assert_eq!(store.delete_comments(&[]).await.unwrap(), 0);
        assert!(store.delete_comments(&[]).await.is_err());
    }
}
