use anyhow::Context;
use blogsy_api::{
    keys, ttl, Cache, ListQuery, Message, Mutation, NewPost, Post, PostFilter, PostId, PostPage,
    PostStatus, PostUpdate, SearchQuery, Store, UserId, Uuid,
};
use chrono::Utc;

use crate::{
    cache::{self, JsonBody},
    media::{self, MediaStore},
    Error,
};

async fn find(store: &dyn Store, id: PostId) -> Result<Post, Error> {
    store
        .find_post(id)
        .await
        .with_context(|| format!("fetching post {id:?}"))?
        .ok_or(Error::post_not_found(id))
}

/// Fetches a post `viewer` is allowed to see, drafts being visible to their author only
async fn find_visible(store: &dyn Store, viewer: Option<UserId>, id: PostId) -> Result<Post, Error> {
    let post = find(store, id).await?;
    match post.status {
        PostStatus::Draft if viewer != Some(post.author.id) => Err(Error::post_not_found(id)),
        _ => Ok(post),
    }
}

/// Fetches a post `actor` is about to modify
async fn find_owned(store: &dyn Store, actor: UserId, id: PostId) -> Result<Post, Error> {
    let post = find_visible(store, Some(actor), id).await?;
    if post.author.id != actor {
        return Err(Error::permission_denied());
    }
    Ok(post)
}

async fn save(store: &dyn Store, post: &Post) -> Result<(), Error> {
    let found = store
        .update_post(post)
        .await
        .with_context(|| format!("saving post {:?}", post.id))?;
    match found {
        true => Ok(()),
        false => Err(Error::post_not_found(post.id)),
    }
}

pub async fn create(
    store: &dyn Store,
    cache: &dyn Cache,
    actor: UserId,
    data: NewPost,
) -> Result<Post, Error> {
    let data = data.normalize()?;
    let author = store
        .find_user(actor)
        .await
        .with_context(|| format!("fetching user {actor:?}"))?
        .ok_or(Error::permission_denied())?
        .author();
    let media = media::claim(store, actor, data.media).await?;
    let now = Utc::now();
    let mut post = Post {
        id: PostId(Uuid::new_v4()),
        author,
        title: data.title,
        content: data.content,
        tags: data.tags,
        likes: Default::default(),
        likes_count: 0,
        cover_image: String::new(),
        status: data.status,
        media,
        created_at: now,
        updated_at: now,
    };
    post.refresh_cover_image();
    store
        .insert_post(&post)
        .await
        .with_context(|| format!("inserting post by {actor:?}"))?;
    cache::invalidate(
        cache,
        Mutation::PostCreated {
            author: &post.author,
        },
    )
    .await;
    Ok(post)
}

/// Published posts are served from the cache, drafts never are
pub async fn get(
    store: &dyn Store,
    cache: &dyn Cache,
    viewer: Option<UserId>,
    id: PostId,
) -> Result<JsonBody, Error> {
    let key = keys::post_detail(id);
    if let Some(hit) = cache::lookup(cache, &key).await {
        return Ok(hit);
    }
    let post = find_visible(store, viewer, id).await?;
    match post.status {
        PostStatus::Published => cache::fill(cache, &key, ttl::POST_DETAIL, &post).await,
        PostStatus::Draft => JsonBody::new(&post),
    }
}

pub async fn list(store: &dyn Store, cache: &dyn Cache, q: ListQuery) -> Result<JsonBody, Error> {
    q.validate()?;
    let key = keys::post_list(&q, PostStatus::Published);
    cache::read_through(cache, &key, ttl::POST_LIST, || async move {
        let author = match &q.author {
            None => None,
            Some(name) => {
                let user = store
                    .find_user_by_username(name)
                    .await
                    .with_context(|| format!("fetching user {name:?}"))?;
                match user {
                    Some(u) => Some(u.id()),
                    None => return Ok(PostPage::empty(&q)),
                }
            }
        };
        let filter = PostFilter {
            tag: q.tag.clone(),
            author,
            status: PostStatus::Published,
            sort: q.sort(),
            skip: q.skip(),
            limit: u64::from(q.limit()),
        };
        let (posts, total) = store
            .list_posts(&filter)
            .await
            .with_context(|| format!("listing posts for {q:?}"))?;
        Ok(PostPage::new(&q, posts, total))
    })
    .await
}

pub async fn update(
    store: &dyn Store,
    cache: &dyn Cache,
    media: &dyn MediaStore,
    actor: UserId,
    id: PostId,
    data: PostUpdate,
) -> Result<Post, Error> {
    let mut data = data.normalize()?;
    let mut post = find_owned(store, actor, id).await?;
    if let Some(refs) = data.media.take() {
        data.media = Some(media::claim(store, actor, refs).await?);
    }
    let dropped = data.apply_to(&mut post);
    post.updated_at = Utc::now();
    save(store, &post).await?;
    media::release(store, media, post.author.id, &dropped).await;
    cache::invalidate(
        cache,
        Mutation::PostUpdated {
            post: id,
            author: &post.author,
        },
    )
    .await;
    Ok(post)
}

pub async fn delete(
    store: &dyn Store,
    cache: &dyn Cache,
    media: &dyn MediaStore,
    actor: UserId,
    id: PostId,
) -> Result<Message, Error> {
    let post = find_owned(store, actor, id).await?;
    let found = store
        .delete_post(id)
        .await
        .with_context(|| format!("deleting post {id:?}"))?;
    if !found {
        return Err(Error::post_not_found(id));
    }
    media::release(store, media, post.author.id, &post.media).await;
    cache::invalidate(
        cache,
        Mutation::PostDeleted {
            post: id,
            author: &post.author,
        },
    )
    .await;
    Ok(Message::new("Post deleted successfully"))
}

pub async fn toggle_like(
    store: &dyn Store,
    cache: &dyn Cache,
    actor: UserId,
    id: PostId,
) -> Result<Post, Error> {
    let mut post = find_visible(store, Some(actor), id).await?;
    let liked = post.toggle_like(actor);
    store
        .set_post_like(id, actor, liked)
        .await
        .with_context(|| format!("saving like of {actor:?} on {id:?}"))?;
    cache::invalidate(
        cache,
        Mutation::PostLikeToggled {
            post: id,
            author: &post.author,
        },
    )
    .await;
    Ok(post)
}

pub async fn drafts(store: &dyn Store, cache: &dyn Cache, actor: UserId) -> Result<JsonBody, Error> {
    cache::read_through(cache, &keys::drafts(actor), ttl::DRAFTS, || async move {
        Ok(store
            .list_drafts(actor)
            .await
            .with_context(|| format!("listing drafts of {actor:?}"))?)
    })
    .await
}

/// Publishing an already published post returns it unchanged
pub async fn publish(
    store: &dyn Store,
    cache: &dyn Cache,
    actor: UserId,
    id: PostId,
) -> Result<Post, Error> {
    let mut post = find_owned(store, actor, id).await?;
    if post.status == PostStatus::Draft {
        post.status = PostStatus::Published;
        post.updated_at = Utc::now();
        save(store, &post).await?;
    }
    cache::invalidate(
        cache,
        Mutation::DraftPublished {
            post: id,
            author: &post.author,
        },
    )
    .await;
    Ok(post)
}

pub async fn search(store: &dyn Store, q: SearchQuery) -> Result<Vec<Post>, Error> {
    let keyword = match q.keyword() {
        None => return Ok(Vec::new()),
        Some(k) => k,
    };
    blogsy_api::validate_string(keyword)?;
    let sort = q.sort.unwrap_or_default().to_post_sort();
    Ok(store
        .search_posts(keyword, sort, u64::from(q.limit()))
        .await
        .with_context(|| format!("searching posts for {keyword:?}"))?)
}
