use anyhow::Context;
use blogsy_api::{
    keys, ttl, AdminResetPassword, AuthResponse, AuthToken, Cache, Error as ApiError,
    ForgotPassword, Message, Mutation, NewSession, NewUser, PostFilter, PostSort, PostStatus,
    PrivateUser, Profile, ProfileUpdate, Register, ResetPassword, SocialLinks, Store, StoredUser,
    User, UserId, Uuid,
};
use chrono::Utc;

use crate::{
    cache::{self, JsonBody},
    mailer::Mailer,
    Error,
};

const RESET_TOKEN_LIFETIME_MINUTES: i64 = 15;

async fn find(store: &dyn Store, id: UserId) -> Result<StoredUser, Error> {
    store
        .find_user(id)
        .await
        .with_context(|| format!("fetching user {id:?}"))?
        .ok_or(Error::permission_denied())
}

/// Fails if the username or email is taken by someone other than `except`
async fn check_available(
    store: &dyn Store,
    username: Option<&str>,
    email: Option<&str>,
    except: Option<UserId>,
) -> Result<(), Error> {
    if let Some(email) = email {
        let found = store
            .find_user_by_email(email)
            .await
            .with_context(|| format!("checking whether email {email:?} is used"))?;
        if found.map_or(false, |u| Some(u.id()) != except) {
            return Err(Error::email_already_used(String::from(email)));
        }
    }
    if let Some(username) = username {
        let found = store
            .find_user_by_username(username)
            .await
            .with_context(|| format!("checking whether username {username:?} is used"))?;
        if found.map_or(false, |u| Some(u.id()) != except) {
            return Err(Error::name_already_used(String::from(username)));
        }
    }
    Ok(())
}

fn hash_password(password: &str, cost: u32) -> Result<String, Error> {
    Ok(bcrypt::hash(password, cost).context("hashing password")?)
}

fn new_user(id: UserId, username: String, email: String, password_hash: String) -> StoredUser {
    StoredUser {
        user: PrivateUser {
            user: User {
                id,
                username,
                bio: String::new(),
                profile_picture: String::new(),
                social_links: SocialLinks::default(),
                created_at: Utc::now(),
            },
            email,
            dob: None,
            mobile: None,
        },
        password_hash,
        reset_token: None,
    }
}

async fn open_session(store: &dyn Store, user: StoredUser) -> Result<AuthResponse, Error> {
    let token = AuthToken(Uuid::new_v4());
    store
        .create_session(user.id(), token)
        .await
        .with_context(|| format!("creating session for {:?}", user.id()))?;
    Ok(AuthResponse {
        user: user.user,
        token,
    })
}

pub async fn register(
    store: &dyn Store,
    bcrypt_cost: u32,
    data: Register,
) -> Result<AuthResponse, Error> {
    data.validate()?;
    let email = data.email.trim().to_lowercase();
    check_available(store, Some(data.username.as_str()), Some(email.as_str()), None).await?;
    let user = new_user(
        UserId(Uuid::new_v4()),
        data.username,
        email,
        hash_password(&data.password, bcrypt_cost)?,
    );
    store
        .insert_user(&user)
        .await
        .with_context(|| format!("inserting user {:?}", user.username()))?;
    tracing::info!(user = ?user.id(), username = user.username(), "registered new user");
    open_session(store, user).await
}

pub async fn login(store: &dyn Store, data: NewSession) -> Result<AuthResponse, Error> {
    data.validate()?;
    let email = data.email.trim().to_lowercase();
    let user = store
        .find_user_by_email(&email)
        .await
        .with_context(|| format!("fetching user with email {email:?}"))?
        .ok_or(ApiError::InvalidCredentials)?;
    let valid = bcrypt::verify(&data.password, &user.password_hash)
        .with_context(|| format!("checking password of {:?}", user.id()))?;
    if !valid {
        return Err(ApiError::InvalidCredentials.into());
    }
    open_session(store, user).await
}

pub async fn logout(store: &dyn Store, token: AuthToken) -> Result<(), Error> {
    match store.delete_session(token).await.context("logging out")? {
        true => Ok(()),
        false => Err(Error::permission_denied()),
    }
}

pub async fn me(store: &dyn Store, actor: UserId) -> Result<PrivateUser, Error> {
    Ok(find(store, actor).await?.user)
}

/// The public profile of `username` along with their published posts, newest first
pub async fn profile(
    store: &dyn Store,
    cache: &dyn Cache,
    username: String,
) -> Result<JsonBody, Error> {
    blogsy_api::validate_string(&username)?;
    let key = keys::profile(&username);
    cache::read_through(cache, &key, ttl::PROFILE, || async move {
        let user = store
            .find_user_by_username(&username)
            .await
            .with_context(|| format!("fetching user {username:?}"))?
            .ok_or_else(|| ApiError::UserNotFound(username.clone()))?;
        let filter = PostFilter {
            tag: None,
            author: Some(user.id()),
            status: PostStatus::Published,
            sort: PostSort::Newest,
            skip: 0,
            limit: u64::MAX,
        };
        let (posts, _) = store
            .list_posts(&filter)
            .await
            .with_context(|| format!("listing posts of {username:?}"))?;
        Ok(Profile {
            user: user.user.user,
            posts,
        })
    })
    .await
}

pub async fn update_profile(
    store: &dyn Store,
    cache: &dyn Cache,
    actor: UserId,
    data: ProfileUpdate,
) -> Result<PrivateUser, Error> {
    data.validate()?;
    let mut user = find(store, actor).await?.user;
    let old_username = user.user.username.clone();
    if let Some(name) = data.username.as_deref().filter(|n| *n != old_username) {
        check_available(store, Some(name), None, Some(actor)).await?;
    }
    data.apply_to(&mut user);
    store
        .update_user(&user)
        .await
        .with_context(|| format!("updating profile of {actor:?}"))?;
    cache::invalidate(
        cache,
        Mutation::ProfileUpdated {
            user: actor,
            old_username: &old_username,
            new_username: &user.user.username,
        },
    )
    .await;
    Ok(user)
}

/// Answers the same whether the email is known or not
pub async fn forgot_password(
    store: &dyn Store,
    mailer: &dyn Mailer,
    public_url: &str,
    data: ForgotPassword,
) -> Result<Message, Error> {
    blogsy_api::validate_string(&data.email)?;
    let email = data.email.trim().to_lowercase();
    let reply = Message::new("If that email is registered, a password reset link has been sent");
    let user = match store
        .find_user_by_email(&email)
        .await
        .with_context(|| format!("fetching user with email {email:?}"))?
    {
        Some(u) => u,
        None => return Ok(reply),
    };
    let token = Uuid::new_v4();
    let expires = Utc::now() + chrono::Duration::minutes(RESET_TOKEN_LIFETIME_MINUTES);
    store
        .set_reset_token(user.id(), Some((token, expires)))
        .await
        .with_context(|| format!("storing reset token of {:?}", user.id()))?;
    let link = format!(
        "{}/reset-password/{token}",
        public_url.trim_end_matches('/')
    );
    let body = format!(
        "You asked to reset your password. Open {link} within \
         {RESET_TOKEN_LIFETIME_MINUTES} minutes to choose a new one."
    );
    if let Err(err) = mailer.send(&email, "Password reset", &body).await {
        store
            .set_reset_token(user.id(), None)
            .await
            .with_context(|| format!("clearing reset token of {:?}", user.id()))?;
        return Err(err.context("sending password reset email").into());
    }
    Ok(reply)
}

pub async fn reset_password(
    store: &dyn Store,
    bcrypt_cost: u32,
    token: Uuid,
    data: ResetPassword,
) -> Result<Message, Error> {
    blogsy_api::validate_required("password", &data.password)?;
    let user = store
        .find_user_by_reset_token(token, Utc::now())
        .await
        .context("fetching user by reset token")?
        .ok_or(ApiError::InvalidResetToken)?;
    store
        .set_password_hash(user.id(), &hash_password(&data.password, bcrypt_cost)?)
        .await
        .with_context(|| format!("resetting password of {:?}", user.id()))?;
    store
        .set_reset_token(user.id(), None)
        .await
        .with_context(|| format!("clearing reset token of {:?}", user.id()))?;
    Ok(Message::new("Password has been reset"))
}

/// Creates a user with an already hashed password
pub async fn admin_create_user(store: &dyn Store, data: NewUser) -> Result<User, Error> {
    data.validate()?;
    let email = data.email.trim().to_lowercase();
    check_available(store, Some(data.username.as_str()), Some(email.as_str()), None).await?;
    let existing = store
        .find_user(data.id)
        .await
        .with_context(|| format!("checking whether {:?} exists", data.id))?;
    if existing.is_some() {
        return Err(Error::invalid_input(format!("user id {} is already used", data.id.0)));
    }
    let user = new_user(data.id, data.username, email, data.initial_password_hash);
    store
        .insert_user(&user)
        .await
        .with_context(|| format!("inserting user {:?}", user.username()))?;
    Ok(user.user.user)
}

pub async fn admin_reset_password(store: &dyn Store, data: AdminResetPassword) -> Result<(), Error> {
    blogsy_api::validate_required("password hash", &data.new_password_hash)?;
    let user = store
        .find_user_by_username(&data.username)
        .await
        .with_context(|| format!("fetching user {:?}", data.username))?
        .ok_or_else(|| ApiError::UserNotFound(data.username.clone()))?;
    store
        .set_password_hash(user.id(), &data.new_password_hash)
        .await
        .with_context(|| format!("resetting password of {:?}", user.id()))?;
    Ok(())
}
