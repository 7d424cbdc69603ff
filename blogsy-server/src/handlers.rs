use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use blogsy_api::{
    AdminResetPassword, AuthResponse, Comment, CommentId, Deleted, Error as ApiError,
    ForgotPassword, ListQuery, MediaRef, Message, NewComment, NewPost, NewSession, NewUser, Post,
    PostId, PostUpdate, PrivateUser, ProfileUpdate, Reaction, Register, ResetPassword,
    SearchQuery, Store, User, Uuid,
};

use crate::{
    cache::JsonBody,
    comments,
    extractors::*,
    media::{self, Upload, MAX_FILES_PER_UPLOAD},
    posts, users, Error,
};

pub async fn banner() -> &'static str {
    "Blogsy API is running"
}

pub async fn register(
    State(state): State<AppState>,
    Json(data): Json<Register>,
) -> Result<(StatusCode, Json<AuthResponse>), Error> {
    let res = users::register(&*state.store, state.settings.bcrypt_cost, data).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

pub async fn login(
    State(store): State<Arc<dyn Store>>,
    Json(data): Json<NewSession>,
) -> Result<Json<AuthResponse>, Error> {
    Ok(Json(users::login(&*store, data).await?))
}

pub async fn logout(
    PreAuth(token): PreAuth,
    State(store): State<Arc<dyn Store>>,
) -> Result<(), Error> {
    users::logout(&*store, token).await
}

pub async fn me(
    Auth(user): Auth,
    State(store): State<Arc<dyn Store>>,
) -> Result<Json<PrivateUser>, Error> {
    Ok(Json(users::me(&*store, user).await?))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    Json(data): Json<ForgotPassword>,
) -> Result<Json<Message>, Error> {
    Ok(Json(
        users::forgot_password(
            &*state.store,
            &*state.mailer,
            &state.settings.public_url,
            data,
        )
        .await?,
    ))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(data): Json<ResetPassword>,
) -> Result<Json<Message>, Error> {
    let token = Uuid::try_parse(&token).map_err(|_| ApiError::InvalidResetToken)?;
    Ok(Json(
        users::reset_password(&*state.store, state.settings.bcrypt_cost, token, data).await?,
    ))
}

pub async fn update_me(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(data): Json<ProfileUpdate>,
) -> Result<Json<PrivateUser>, Error> {
    Ok(Json(
        users::update_profile(&*state.store, &*state.cache, user, data).await?,
    ))
}

pub async fn profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<JsonBody, Error> {
    users::profile(&*state.store, &*state.cache, username).await
}

pub async fn list_posts(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<JsonBody, Error> {
    posts::list(&*state.store, &*state.cache, q).await
}

pub async fn create_post(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(data): Json<NewPost>,
) -> Result<(StatusCode, Json<Post>), Error> {
    let post = posts::create(&*state.store, &*state.cache, user, data).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn search_posts(
    State(store): State<Arc<dyn Store>>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<Post>>, Error> {
    Ok(Json(posts::search(&*store, q).await?))
}

pub async fn drafts(Auth(user): Auth, State(state): State<AppState>) -> Result<JsonBody, Error> {
    posts::drafts(&*state.store, &*state.cache, user).await
}

pub async fn get_post(
    MaybeAuth(viewer): MaybeAuth,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<JsonBody, Error> {
    posts::get(&*state.store, &*state.cache, viewer, PostId(id)).await
}

pub async fn update_post(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(data): Json<PostUpdate>,
) -> Result<Json<Post>, Error> {
    Ok(Json(
        posts::update(
            &*state.store,
            &*state.cache,
            &*state.media,
            user,
            PostId(id),
            data,
        )
        .await?,
    ))
}

pub async fn delete_post(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Message>, Error> {
    Ok(Json(
        posts::delete(&*state.store, &*state.cache, &*state.media, user, PostId(id)).await?,
    ))
}

pub async fn like_post(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Post>, Error> {
    Ok(Json(
        posts::toggle_like(&*state.store, &*state.cache, user, PostId(id)).await?,
    ))
}

pub async fn publish_post(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Post>, Error> {
    Ok(Json(
        posts::publish(&*state.store, &*state.cache, user, PostId(id)).await?,
    ))
}

pub async fn add_comment(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(data): Json<NewComment>,
) -> Result<(StatusCode, Json<Comment>), Error> {
    let comment = comments::add(&*state.store, &*state.cache, user, data).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// `id` is the id of the post here
pub async fn list_comments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<JsonBody, Error> {
    comments::list(&*state.store, &*state.cache, PostId(id)).await
}

pub async fn delete_comment(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Deleted>, Error> {
    Ok(Json(
        comments::delete(&*state.store, &*state.cache, user, CommentId(id)).await?,
    ))
}

pub async fn like_comment(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Comment>, Error> {
    Ok(Json(
        comments::react(&*state.store, &*state.cache, user, CommentId(id), Reaction::Like).await?,
    ))
}

pub async fn dislike_comment(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Comment>, Error> {
    Ok(Json(
        comments::react(
            &*state.store,
            &*state.cache,
            user,
            CommentId(id),
            Reaction::Dislike,
        )
        .await?,
    ))
}

pub async fn upload_media(
    Auth(user): Auth,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Vec<MediaRef>>, Error> {
    let mut uploads = Vec::new();
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::invalid_input(format!("malformed upload: {e}")))?
    {
        if uploads.len() == MAX_FILES_PER_UPLOAD {
            return Err(Error::invalid_input(format!(
                "at most {MAX_FILES_PER_UPLOAD} files can be uploaded at once"
            )));
        }
        let name = field.file_name().map(String::from);
        let mime = field.content_type().map(String::from);
        let data = media::read_file(&mut field, state.settings.max_file_size).await?;
        uploads.push(Upload::new(name, mime, data)?);
    }
    if uploads.is_empty() {
        return Err(Error::invalid_input("no file was uploaded"));
    }
    let mut res = Vec::with_capacity(uploads.len());
    for upload in uploads {
        let stored = state
            .media
            .store(upload)
            .await
            .with_context(|| format!("storing upload of {user:?}"))?;
        state
            .store
            .insert_media(user, &stored)
            .await
            .with_context(|| format!("recording upload of {user:?}"))?;
        res.push(stored);
    }
    Ok(Json(res))
}

pub async fn admin_create_user(
    AdminAuth: AdminAuth,
    State(store): State<Arc<dyn Store>>,
    Json(data): Json<NewUser>,
) -> Result<Json<User>, Error> {
    Ok(Json(users::admin_create_user(&*store, data).await?))
}

pub async fn admin_reset_password(
    AdminAuth: AdminAuth,
    State(store): State<Arc<dyn Store>>,
    Json(data): Json<AdminResetPassword>,
) -> Result<(), Error> {
    users::admin_reset_password(&*store, data).await
}
