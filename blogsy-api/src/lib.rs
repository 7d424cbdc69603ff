use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

mod auth;
pub use auth::{
    AdminResetPassword, AuthResponse, AuthToken, ForgotPassword, Message, NewSession, Register,
    ResetPassword,
};

mod cache;
pub use cache::{glob_matches, keys, ttl, Cache, Mutation, Target};

mod comment;
pub use comment::{build_tree, Comment, CommentId, CommentNode, Deleted, NewComment, Reaction};

mod db;
pub use db::{PostFilter, Store};

mod error;
pub use error::Error;

mod post;
pub use post::{
    ListQuery, MediaKind, MediaRef, NewPost, Post, PostId, PostPage, PostSort, PostStatus,
    PostUpdate, SearchQuery, SearchSort,
};

mod user;
pub use user::{
    Author, NewUser, PrivateUser, Profile, ProfileUpdate, SocialLinks, StoredUser, User, UserId,
};

pub fn validate_string(s: &str) -> Result<(), Error> {
    match s.contains('\0') {
        true => Err(Error::NullByteInString(String::from(s))),
        false => Ok(()),
    }
}

/// Checks a string is present and not only whitespace
pub fn validate_required(field: &str, s: &str) -> Result<(), Error> {
    validate_string(s)?;
    match s.trim().is_empty() {
        true => Err(Error::InvalidInput(format!("{field} is required"))),
        false => Ok(()),
    }
}

/// User names end up in URLs and cache keys, so keep them to a safe alphabet
pub fn validate_name(name: &str) -> Result<(), Error> {
    validate_string(name)?;
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    match valid {
        true => Ok(()),
        false => Err(Error::InvalidName(String::from(name))),
    }
}

pub fn validate_email(email: &str) -> Result<(), Error> {
    validate_required("email", email)?;
    match email.trim().split_once('@') {
        Some((user, domain)) if !user.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(Error::InvalidInput(format!("{email:?} is not an email address"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_restricted() {
        assert!(validate_name("alice_42.dev-x").is_ok());
        assert_eq!(
            validate_name("alice bob"),
            Err(Error::InvalidName(String::from("alice bob")))
        );
        assert_eq!(
            validate_name("posts:*"),
            Err(Error::InvalidName(String::from("posts:*")))
        );
        assert!(validate_name("").is_err());
    }

    #[test]
    fn required_fields_reject_blank() {
        assert!(validate_required("title", "Hello").is_ok());
        assert_eq!(
            validate_required("title", "  \n"),
            Err(Error::InvalidInput(String::from("title is required")))
        );
        assert!(matches!(
            validate_required("title", "a\0"),
            Err(Error::NullByteInString(_))
        ));
    }

    #[test]
    fn emails_need_an_at_sign() {
        assert!(validate_email("a@b.c").is_ok());
        assert!(validate_email("ab.c").is_err());
        assert!(validate_email("@b.c").is_err());
    }
}
