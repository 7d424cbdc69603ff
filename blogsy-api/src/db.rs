use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    AuthToken, Comment, CommentId, MediaRef, Post, PostId, PostSort, PostStatus, PrivateUser, Reaction,
    StoredUser, Time, UserId,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PostFilter {
    pub tag: Option<String>,
    pub author: Option<UserId>,
    pub status: PostStatus,
    pub sort: PostSort,
    pub skip: u64,
    pub limit: u64,
}

/// Document store the services run against
///
/// Every call is a single store operation, there is no transaction spanning
/// multiple calls.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_user(&self, user: &StoredUser) -> anyhow::Result<()>;
    async fn find_user(&self, id: UserId) -> anyhow::Result<Option<StoredUser>>;
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<StoredUser>>;
    async fn find_user_by_username(&self, username: &str) -> anyhow::Result<Option<StoredUser>>;
    async fn update_user(&self, user: &PrivateUser) -> anyhow::Result<()>;
    async fn set_password_hash(&self, user: UserId, hash: &str) -> anyhow::Result<()>;
    async fn set_reset_token(&self, user: UserId, token: Option<(Uuid, Time)>)
        -> anyhow::Result<()>;

    /// Only returns the user if the token has not expired yet at `now`
    async fn find_user_by_reset_token(
        &self,
        token: Uuid,
        now: Time,
    ) -> anyhow::Result<Option<StoredUser>>;

    async fn create_session(&self, user: UserId, token: AuthToken) -> anyhow::Result<()>;
    async fn recover_session(&self, token: AuthToken) -> anyhow::Result<Option<UserId>>;

    /// Returns whether there was such a session
    async fn delete_session(&self, token: AuthToken) -> anyhow::Result<bool>;

    async fn insert_post(&self, post: &Post) -> anyhow::Result<()>;
    async fn find_post(&self, id: PostId) -> anyhow::Result<Option<Post>>;

    /// Saves everything but the likes, returns false if the post no longer exists
    async fn update_post(&self, post: &Post) -> anyhow::Result<bool>;

    /// Also removes the post's comments and likes, returns false if there was no such post
    async fn delete_post(&self, id: PostId) -> anyhow::Result<bool>;

    /// Returns the requested page along with the total number of matching posts
    async fn list_posts(&self, filter: &PostFilter) -> anyhow::Result<(Vec<Post>, u64)>;

    /// Drafts of `author`, most recently updated first
    async fn list_drafts(&self, author: UserId) -> anyhow::Result<Vec<Post>>;

    /// Published posts matching `keyword` by text or author name
    async fn search_posts(
        &self,
        keyword: &str,
        sort: PostSort,
        limit: u64,
    ) -> anyhow::Result<Vec<Post>>;

    async fn set_post_like(&self, post: PostId, user: UserId, liked: bool) -> anyhow::Result<()>;

    async fn insert_comment(&self, comment: &Comment) -> anyhow::Result<()>;
    async fn find_comment(&self, id: CommentId) -> anyhow::Result<Option<Comment>>;

    /// All comments of `post`, oldest first
    async fn list_comments(&self, post: PostId) -> anyhow::Result<Vec<Comment>>;

    /// Ids of the direct replies to any of `parents`
    async fn find_child_comment_ids(
        &self,
        parents: &[CommentId],
    ) -> anyhow::Result<Vec<CommentId>>;

    /// Returns the number of removed comments
    async fn delete_comments(&self, ids: &[CommentId]) -> anyhow::Result<u64>;

    async fn set_comment_reaction(
        &self,
        comment: CommentId,
        user: UserId,
        reaction: Option<Reaction>,
    ) -> anyhow::Result<()>;

    /// Records `owner` as the uploader of `media`
    async fn insert_media(&self, owner: UserId, media: &MediaRef) -> anyhow::Result<()>;

    /// The upload stored under `public_id`, along with its uploader
    async fn find_media(&self, public_id: &str) -> anyhow::Result<Option<(UserId, MediaRef)>>;

    /// Whether any post still lists the upload stored under `public_id`
    async fn is_media_referenced(&self, public_id: &str) -> anyhow::Result<bool>;

    async fn delete_media(&self, public_id: &str) -> anyhow::Result<()>;
}
