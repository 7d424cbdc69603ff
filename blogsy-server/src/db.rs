use anyhow::{anyhow, Context};
use async_trait::async_trait;
use blogsy_api::{
    Author, AuthToken, Comment, CommentId, MediaKind, MediaRef, Post, PostFilter, PostId, PostSort,
    PostStatus, PrivateUser, Reaction, SocialLinks, Store, StoredUser, Time, User, UserId, Uuid,
};
use chrono::NaiveDate;
use sqlx::types::Json;

const SESSION_LIFETIME: &str = "30 days";

const POST_COLUMNS: &str = "
    p.id, p.title, p.content, p.tags, p.cover_image, p.status, p.media,
    p.created_at, p.updated_at,
    u.id AS author_id, u.username AS author_username, u.profile_picture AS author_picture,
    ARRAY(SELECT l.user_id FROM post_likes l WHERE l.post_id = p.id) AS likes
";

const COMMENT_COLUMNS: &str = "
    c.id, c.post_id, c.parent_id, c.content, c.created_at, c.updated_at,
    u.id AS author_id, u.username AS author_username, u.profile_picture AS author_picture,
    ARRAY(
        SELECT r.user_id FROM comment_reactions r
        WHERE r.comment_id = c.id AND r.reaction = 'like'
    ) AS likes,
    ARRAY(
        SELECT r.user_id FROM comment_reactions r
        WHERE r.comment_id = c.id AND r.reaction = 'dislike'
    ) AS dislikes
";

const USER_COLUMNS: &str = "
    id, username, email, password_hash, bio, profile_picture, social_links,
    dob, mobile, reset_token, reset_token_expires, created_at
";

fn order_by(sort: PostSort) -> &'static str {
    match sort {
        PostSort::Newest => "p.created_at DESC",
        PostSort::Oldest => "p.created_at ASC",
        PostSort::Likes => {
            "(SELECT COUNT(*) FROM post_likes l WHERE l.post_id = p.id) DESC, p.created_at DESC"
        }
    }
}

fn sql_limit(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    bio: String,
    profile_picture: String,
    social_links: Json<SocialLinks>,
    dob: Option<NaiveDate>,
    mobile: Option<String>,
    reset_token: Option<Uuid>,
    reset_token_expires: Option<Time>,
    created_at: Time,
}

impl From<UserRow> for StoredUser {
    fn from(r: UserRow) -> StoredUser {
        StoredUser {
            user: PrivateUser {
                user: User {
                    id: UserId(r.id),
                    username: r.username,
                    bio: r.bio,
                    profile_picture: r.profile_picture,
                    social_links: r.social_links.0,
                    created_at: r.created_at,
                },
                email: r.email,
                dob: r.dob,
                mobile: r.mobile,
            },
            password_hash: r.password_hash,
            reset_token: r.reset_token.zip(r.reset_token_expires),
        }
    }
}

#[derive(sqlx::FromRow)]
struct PostRow {
    id: Uuid,
    title: String,
    content: String,
    tags: Vec<String>,
    cover_image: String,
    status: String,
    media: Json<Vec<MediaRef>>,
    created_at: Time,
    updated_at: Time,
    author_id: Uuid,
    author_username: String,
    author_picture: String,
    likes: Vec<Uuid>,
}

impl TryFrom<PostRow> for Post {
    type Error = anyhow::Error;

    fn try_from(r: PostRow) -> anyhow::Result<Post> {
        let likes = r.likes.into_iter().map(UserId).collect::<std::collections::BTreeSet<_>>();
        Ok(Post {
            id: PostId(r.id),
            author: Author {
                id: UserId(r.author_id),
                username: r.author_username,
                profile_picture: r.author_picture,
            },
            title: r.title,
            content: r.content,
            tags: r.tags,
            likes_count: likes.len() as u64,
            likes,
            cover_image: r.cover_image,
            status: PostStatus::parse(&r.status)
                .ok_or_else(|| anyhow!("post {:?} has unknown status {:?}", r.id, r.status))?,
            media: r.media.0,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: Uuid,
    post_id: Uuid,
    parent_id: Option<Uuid>,
    content: String,
    created_at: Time,
    updated_at: Time,
    author_id: Uuid,
    author_username: String,
    author_picture: String,
    likes: Vec<Uuid>,
    dislikes: Vec<Uuid>,
}

impl From<CommentRow> for Comment {
    fn from(r: CommentRow) -> Comment {
        Comment {
            id: CommentId(r.id),
            post_id: PostId(r.post_id),
            author: Author {
                id: UserId(r.author_id),
                username: r.author_username,
                profile_picture: r.author_picture,
            },
            parent_id: r.parent_id.map(CommentId),
            content: r.content,
            likes: r.likes.into_iter().map(UserId).collect(),
            dislikes: r.dislikes.into_iter().map(UserId).collect(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MediaRow {
    public_id: String,
    owner_id: Uuid,
    url: String,
    file_type: String,
    name: Option<String>,
}

impl TryFrom<MediaRow> for (UserId, MediaRef) {
    type Error = anyhow::Error;

    fn try_from(r: MediaRow) -> anyhow::Result<(UserId, MediaRef)> {
        let file_type = MediaKind::parse(&r.file_type)
            .ok_or_else(|| anyhow!("media {:?} has unknown type {:?}", r.public_id, r.file_type))?;
        Ok((
            UserId(r.owner_id),
            MediaRef {
                url: r.url,
                public_id: r.public_id,
                file_type,
                name: r.name,
            },
        ))
    }
}

fn into_posts(rows: Vec<PostRow>) -> anyhow::Result<Vec<Post>> {
    rows.into_iter().map(Post::try_from).collect()
}

/// Postgres-backed `Store`
#[derive(Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> PgStore {
        PgStore { pool }
    }

    async fn find_user_where(
        &self,
        condition: &str,
        value: &str,
    ) -> anyhow::Result<Option<StoredUser>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {condition} = $1"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("querying users table by {condition}"))?;
        Ok(row.map(StoredUser::from))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: &StoredUser) -> anyhow::Result<()> {
        let u = &user.user;
        sqlx::query(
            "
                INSERT INTO users (
                    id, username, email, password_hash, bio, profile_picture,
                    social_links, dob, mobile, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(u.user.id.0)
        .bind(&u.user.username)
        .bind(&u.email)
        .bind(&user.password_hash)
        .bind(&u.user.bio)
        .bind(&u.user.profile_picture)
        .bind(Json(&u.user.social_links))
        .bind(u.dob)
        .bind(&u.mobile)
        .bind(u.user.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("inserting user {:?}", u.user.username))?;
        Ok(())
    }

    async fn find_user(&self, id: UserId) -> anyhow::Result<Option<StoredUser>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("querying user {id:?}"))?;
        Ok(row.map(StoredUser::from))
    }

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<StoredUser>> {
        self.find_user_where("email", email).await
    }

    async fn find_user_by_username(&self, username: &str) -> anyhow::Result<Option<StoredUser>> {
        self.find_user_where("username", username).await
    }

    async fn update_user(&self, user: &PrivateUser) -> anyhow::Result<()> {
        sqlx::query(
            "
                UPDATE users
                SET username = $2, bio = $3, profile_picture = $4, social_links = $5,
                    dob = $6, mobile = $7
                WHERE id = $1
            ",
        )
        .bind(user.user.id.0)
        .bind(&user.user.username)
        .bind(&user.user.bio)
        .bind(&user.user.profile_picture)
        .bind(Json(&user.user.social_links))
        .bind(user.dob)
        .bind(&user.mobile)
        .execute(&self.pool)
        .await
        .with_context(|| format!("updating user {:?}", user.user.id))?;
        Ok(())
    }

    async fn set_password_hash(&self, user: UserId, hash: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user.0)
            .bind(hash)
            .execute(&self.pool)
            .await
            .with_context(|| format!("setting password of user {user:?}"))?;
        Ok(())
    }

    async fn set_reset_token(
        &self,
        user: UserId,
        token: Option<(Uuid, Time)>,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET reset_token = $2, reset_token_expires = $3 WHERE id = $1")
            .bind(user.0)
            .bind(token.map(|t| t.0))
            .bind(token.map(|t| t.1))
            .execute(&self.pool)
            .await
            .with_context(|| format!("setting reset token of user {user:?}"))?;
        Ok(())
    }

    async fn find_user_by_reset_token(
        &self,
        token: Uuid,
        now: Time,
    ) -> anyhow::Result<Option<StoredUser>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE reset_token = $1 AND reset_token_expires > $2"
        ))
        .bind(token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("querying user by reset token")?;
        Ok(row.map(StoredUser::from))
    }

    async fn create_session(&self, user: UserId, token: AuthToken) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO sessions (id, user_id, created_at) VALUES ($1, $2, NOW())")
            .bind(token.0)
            .bind(user.0)
            .execute(&self.pool)
            .await
            .with_context(|| format!("creating session for user {user:?}"))?;
        Ok(())
    }

    async fn recover_session(&self, token: AuthToken) -> anyhow::Result<Option<UserId>> {
        let user = sqlx::query_scalar::<_, Uuid>(&format!(
            "
                SELECT user_id FROM sessions
                WHERE id = $1 AND created_at > NOW() - INTERVAL '{SESSION_LIFETIME}'
            "
        ))
        .bind(token.0)
        .fetch_optional(&self.pool)
        .await
        .context("querying sessions table")?;
        Ok(user.map(UserId))
    }

    async fn delete_session(&self, token: AuthToken) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(token.0)
            .execute(&self.pool)
            .await
            .context("deleting session")?;
        Ok(res.rows_affected() > 0)
    }

    async fn insert_post(&self, post: &Post) -> anyhow::Result<()> {
        sqlx::query(
            "
                INSERT INTO posts (
                    id, author_id, title, content, tags, cover_image, status, media,
                    created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(post.id.0)
        .bind(post.author.id.0)
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.tags)
        .bind(&post.cover_image)
        .bind(post.status.as_str())
        .bind(Json(&post.media))
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("inserting post {:?}", post.id))?;
        Ok(())
    }

    async fn find_post(&self, id: PostId) -> anyhow::Result<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "
                SELECT {POST_COLUMNS}
                FROM posts p
                INNER JOIN users u ON u.id = p.author_id
                WHERE p.id = $1
            "
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("querying post {id:?}"))?;
        row.map(Post::try_from).transpose()
    }

    async fn update_post(&self, post: &Post) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "
                UPDATE posts
                SET title = $2, content = $3, tags = $4, cover_image = $5, status = $6,
                    media = $7, updated_at = $8
                WHERE id = $1
            ",
        )
        .bind(post.id.0)
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.tags)
        .bind(&post.cover_image)
        .bind(post.status.as_str())
        .bind(Json(&post.media))
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("updating post {:?}", post.id))?;
        Ok(res.rows_affected() > 0)
    }

    async fn delete_post(&self, id: PostId) -> anyhow::Result<bool> {
        // comments, reactions and likes go away through ON DELETE CASCADE
        let res = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .with_context(|| format!("deleting post {id:?}"))?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_posts(&self, filter: &PostFilter) -> anyhow::Result<(Vec<Post>, u64)> {
        const CONDITION: &str = "
            p.status = $1
            AND ($2::VARCHAR IS NULL OR $2 = ANY(p.tags))
            AND ($3::UUID IS NULL OR p.author_id = $3)
        ";
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "
                SELECT {POST_COLUMNS}
                FROM posts p
                INNER JOIN users u ON u.id = p.author_id
                WHERE {CONDITION}
                ORDER BY {}
                LIMIT $4 OFFSET $5
            ",
            order_by(filter.sort),
        ))
        .bind(filter.status.as_str())
        .bind(&filter.tag)
        .bind(filter.author.map(|a| a.0))
        .bind(sql_limit(filter.limit))
        .bind(sql_limit(filter.skip))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("listing posts with {filter:?}"))?;
        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM posts p WHERE {CONDITION}"
        ))
        .bind(filter.status.as_str())
        .bind(&filter.tag)
        .bind(filter.author.map(|a| a.0))
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("counting posts with {filter:?}"))?;
        Ok((into_posts(rows)?, u64::try_from(total).unwrap_or(0)))
    }

    async fn list_drafts(&self, author: UserId) -> anyhow::Result<Vec<Post>> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "
                SELECT {POST_COLUMNS}
                FROM posts p
                INNER JOIN users u ON u.id = p.author_id
                WHERE p.author_id = $1 AND p.status = 'draft'
                ORDER BY p.updated_at DESC
            "
        ))
        .bind(author.0)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("listing drafts of {author:?}"))?;
        into_posts(rows)
    }

    async fn search_posts(
        &self,
        keyword: &str,
        sort: PostSort,
        limit: u64,
    ) -> anyhow::Result<Vec<Post>> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "
                SELECT {POST_COLUMNS}
                FROM posts p
                INNER JOIN users u ON u.id = p.author_id
                WHERE p.status = 'published'
                AND (
                    to_tsvector('english', p.title || ' ' || p.content)
                        @@ plainto_tsquery('english', $1)
                    OR EXISTS (SELECT 1 FROM unnest(p.tags) t WHERE lower(t) = lower($1))
                    OR strpos(lower(u.username), lower($1)) > 0
                )
                ORDER BY {}
                LIMIT $2
            ",
            order_by(sort),
        ))
        .bind(keyword)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("searching posts for {keyword:?}"))?;
        into_posts(rows)
    }

    async fn set_post_like(&self, post: PostId, user: UserId, liked: bool) -> anyhow::Result<()> {
        let query = match liked {
            true => "INSERT INTO post_likes (post_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            false => "DELETE FROM post_likes WHERE post_id = $1 AND user_id = $2",
        };
        sqlx::query(query)
            .bind(post.0)
            .bind(user.0)
            .execute(&self.pool)
            .await
            .with_context(|| format!("setting like of {user:?} on {post:?} to {liked}"))?;
        Ok(())
    }

    async fn insert_comment(&self, comment: &Comment) -> anyhow::Result<()> {
        sqlx::query(
            "
                INSERT INTO comments (
                    id, post_id, author_id, parent_id, content, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(comment.id.0)
        .bind(comment.post_id.0)
        .bind(comment.author.id.0)
        .bind(comment.parent_id.map(|p| p.0))
        .bind(&comment.content)
        .bind(comment.created_at)
        .bind(comment.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("inserting comment {:?}", comment.id))?;
        Ok(())
    }

    async fn find_comment(&self, id: CommentId) -> anyhow::Result<Option<Comment>> {
        let row = sqlx::query_as::<_, CommentRow>(&format!(
            "
                SELECT {COMMENT_COLUMNS}
                FROM comments c
                INNER JOIN users u ON u.id = c.author_id
                WHERE c.id = $1
            "
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("querying comment {id:?}"))?;
        Ok(row.map(Comment::from))
    }

    async fn list_comments(&self, post: PostId) -> anyhow::Result<Vec<Comment>> {
        let rows = sqlx::query_as::<_, CommentRow>(&format!(
            "
                SELECT {COMMENT_COLUMNS}
                FROM comments c
                INNER JOIN users u ON u.id = c.author_id
                WHERE c.post_id = $1
                ORDER BY c.created_at ASC
            "
        ))
        .bind(post.0)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("listing comments of {post:?}"))?;
        Ok(rows.into_iter().map(Comment::from).collect())
    }

    async fn find_child_comment_ids(
        &self,
        parents: &[CommentId],
    ) -> anyhow::Result<Vec<CommentId>> {
        let parents = parents.iter().map(|p| p.0).collect::<Vec<_>>();
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM comments WHERE parent_id = ANY($1) ORDER BY created_at ASC",
        )
        .bind(&parents)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("querying replies to {} comments", parents.len()))?;
        Ok(ids.into_iter().map(CommentId).collect())
    }

    async fn delete_comments(&self, ids: &[CommentId]) -> anyhow::Result<u64> {
        let ids = ids.iter().map(|c| c.0).collect::<Vec<_>>();
        let res = sqlx::query("DELETE FROM comments WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&self.pool)
            .await
            .with_context(|| format!("deleting {} comments", ids.len()))?;
        Ok(res.rows_affected())
    }

    async fn set_comment_reaction(
        &self,
        comment: CommentId,
        user: UserId,
        reaction: Option<Reaction>,
    ) -> anyhow::Result<()> {
        let query = match reaction {
            None => sqlx::query("DELETE FROM comment_reactions WHERE comment_id = $1 AND user_id = $2")
                .bind(comment.0)
                .bind(user.0),
            Some(r) => sqlx::query(
                "
                    INSERT INTO comment_reactions (comment_id, user_id, reaction)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (comment_id, user_id) DO UPDATE SET reaction = EXCLUDED.reaction
                ",
            )
            .bind(comment.0)
            .bind(user.0)
            .bind(r.as_str()),
        };
        query
            .execute(&self.pool)
            .await
            .with_context(|| format!("setting reaction of {user:?} on {comment:?}"))?;
        Ok(())
    }

    async fn insert_media(&self, owner: UserId, media: &MediaRef) -> anyhow::Result<()> {
        sqlx::query(
            "
                INSERT INTO media (public_id, owner_id, url, file_type, name, created_at)
                VALUES ($1, $2, $3, $4, $5, NOW())
            ",
        )
        .bind(&media.public_id)
        .bind(owner.0)
        .bind(&media.url)
        .bind(media.file_type.as_str())
        .bind(&media.name)
        .execute(&self.pool)
        .await
        .with_context(|| format!("recording upload {:?} of {owner:?}", media.public_id))?;
        Ok(())
    }

    async fn find_media(&self, public_id: &str) -> anyhow::Result<Option<(UserId, MediaRef)>> {
        let row = sqlx::query_as::<_, MediaRow>(
            "SELECT public_id, owner_id, url, file_type, name FROM media WHERE public_id = $1",
        )
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("querying upload {public_id:?}"))?;
        row.map(<(UserId, MediaRef)>::try_from).transpose()
    }

    async fn is_media_referenced(&self, public_id: &str) -> anyhow::Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "
                SELECT EXISTS (
                    SELECT 1 FROM posts
                    WHERE media @> jsonb_build_array(jsonb_build_object('public_id', $1::TEXT))
                )
            ",
        )
        .bind(public_id)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("checking whether upload {public_id:?} is still used"))
    }

    async fn delete_media(&self, public_id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM media WHERE public_id = $1")
            .bind(public_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("forgetting upload {public_id:?}"))?;
        Ok(())
    }
}
