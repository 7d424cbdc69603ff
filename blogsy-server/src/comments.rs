use std::collections::HashSet;

use anyhow::Context;
use blogsy_api::{
    build_tree, keys, ttl, Cache, Comment, CommentId, Deleted, Error as ApiError, Mutation,
    NewComment, PostId, PostStatus, Reaction, Store, UserId, Uuid,
};
use chrono::Utc;

use crate::{
    cache::{self, JsonBody},
    Error,
};

async fn find(store: &dyn Store, id: CommentId) -> Result<Comment, Error> {
    store
        .find_comment(id)
        .await
        .with_context(|| format!("fetching comment {id:?}"))?
        .ok_or(Error::Api(ApiError::CommentNotFound(id.0)))
}

pub async fn add(
    store: &dyn Store,
    cache: &dyn Cache,
    actor: UserId,
    data: NewComment,
) -> Result<Comment, Error> {
    data.validate()?;
    let post = store
        .find_post(data.post_id)
        .await
        .with_context(|| format!("fetching post {:?}", data.post_id))?
        .filter(|p| p.status == PostStatus::Published || p.author.id == actor)
        .ok_or(Error::post_not_found(data.post_id))?;
    if let Some(parent) = data.parent_id {
        if find(store, parent).await?.post_id != post.id {
            return Err(Error::invalid_input(
                "parent comment belongs to another post",
            ));
        }
    }
    let author = store
        .find_user(actor)
        .await
        .with_context(|| format!("fetching user {actor:?}"))?
        .ok_or(Error::permission_denied())?
        .author();
    let now = Utc::now();
    let comment = Comment {
        id: CommentId(Uuid::new_v4()),
        post_id: post.id,
        author,
        parent_id: data.parent_id,
        content: data.content,
        likes: Default::default(),
        dislikes: Default::default(),
        created_at: now,
        updated_at: now,
    };
    store
        .insert_comment(&comment)
        .await
        .with_context(|| format!("inserting comment on {:?}", post.id))?;
    cache::invalidate(cache, Mutation::CommentsChanged { post: post.id }).await;
    Ok(comment)
}

/// The comments of `post` as a reply forest
pub async fn list(store: &dyn Store, cache: &dyn Cache, post: PostId) -> Result<JsonBody, Error> {
    cache::read_through(cache, &keys::comments(post), ttl::COMMENTS, || async move {
        let comments = store
            .list_comments(post)
            .await
            .with_context(|| format!("listing comments of {post:?}"))?;
        Ok(build_tree(comments))
    })
    .await
}

/// Ids of `root` and of all its transitive replies, grouped by depth
async fn collect_generations(
    store: &dyn Store,
    root: CommentId,
) -> anyhow::Result<Vec<Vec<CommentId>>> {
    let mut seen = HashSet::from([root]);
    let mut generations = vec![vec![root]];
    loop {
        let last = generations.last().map(Vec::as_slice).unwrap_or_default();
        let next = store
            .find_child_comment_ids(last)
            .await
            .with_context(|| format!("fetching replies below {root:?}"))?
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect::<Vec<_>>();
        if next.is_empty() {
            return Ok(generations);
        }
        generations.push(next);
    }
}

/// Deletes `id` along with every reply below it
///
/// Generations are removed deepest first with one bulk delete each, so a
/// failure halfway leaves the remaining comments connected to their parents.
/// Nothing is rolled back.
pub async fn delete(
    store: &dyn Store,
    cache: &dyn Cache,
    actor: UserId,
    id: CommentId,
) -> Result<Deleted, Error> {
    let comment = find(store, id).await?;
    if comment.author.id != actor {
        return Err(Error::permission_denied());
    }
    let generations = collect_generations(store, id).await?;
    let mut deleted = 0;
    for (depth, generation) in generations.iter().enumerate().rev() {
        let n = store.delete_comments(generation).await.with_context(|| {
            format!(
                "deleting {} comments at depth {depth} below {id:?}, {deleted} already deleted",
                generation.len()
            )
        })?;
        deleted += n;
    }
    tracing::debug!(?id, deleted, "deleted comment thread");
    cache::invalidate(
        cache,
        Mutation::CommentsChanged {
            post: comment.post_id,
        },
    )
    .await;
    Ok(Deleted {
        message: String::from("Comment deleted successfully"),
        deleted,
    })
}

/// Toggles the reaction of `actor` on the comment, returning the updated comment
pub async fn react(
    store: &dyn Store,
    cache: &dyn Cache,
    actor: UserId,
    id: CommentId,
    reaction: Reaction,
) -> Result<Comment, Error> {
    let mut comment = find(store, id).await?;
    let now = comment.toggle_reaction(actor, reaction);
    store
        .set_comment_reaction(id, actor, now)
        .await
        .with_context(|| format!("saving {} of {actor:?} on {id:?}", reaction.as_str()))?;
    cache::invalidate(
        cache,
        Mutation::CommentsChanged {
            post: comment.post_id,
        },
    )
    .await;
    Ok(comment)
}
