use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Post not found {0}")]
    PostNotFound(Uuid),

    #[error("Comment not found {0}")]
    CommentNotFound(Uuid),

    #[error("User not found {0:?}")]
    UserNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Name already used {0}")]
    NameAlreadyUsed(String),

    #[error("Email already used {0}")]
    EmailAlreadyUsed(String),

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Invalid character in name {0:?}")]
    InvalidName(String),

    #[error("Password reset token is invalid or has expired")]
    InvalidResetToken,

    #[error("Unsupported media type {0:?}")]
    UnsupportedMediaType(String),

    #[error("Payload too large, limit is {0} bytes")]
    PayloadTooLarge(u64),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Error::PostNotFound(_) => StatusCode::NOT_FOUND,
            Error::CommentNotFound(_) => StatusCode::NOT_FOUND,
            Error::UserNotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NameAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::EmailAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::NullByteInString(_) => StatusCode::BAD_REQUEST,
            Error::InvalidName(_) => StatusCode::BAD_REQUEST,
            Error::InvalidResetToken => StatusCode::BAD_REQUEST,
            Error::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "type": "unknown",
            }),
            Error::PermissionDenied => json!({
                "message": "permission denied",
                "type": "permission-denied",
            }),
            Error::InvalidCredentials => json!({
                "message": "invalid email or password",
                "type": "invalid-credentials",
            }),
            Error::PostNotFound(id) => json!({
                "message": "post not found",
                "type": "post-not-found",
                "id": id,
            }),
            Error::CommentNotFound(id) => json!({
                "message": "comment not found",
                "type": "comment-not-found",
                "id": id,
            }),
            Error::UserNotFound(name) => json!({
                "message": "user not found",
                "type": "user-not-found",
                "name": name,
            }),
            Error::InvalidInput(msg) => json!({
                "message": msg,
                "type": "invalid-input",
            }),
            Error::NameAlreadyUsed(n) => json!({
                "message": "name already used",
                "type": "conflict-name",
                "name": n,
            }),
            Error::EmailAlreadyUsed(e) => json!({
                "message": "email already used",
                "type": "conflict-email",
                "email": e,
            }),
            Error::NullByteInString(s) => json!({
                "message": "there was a null byte in argument string",
                "type": "null-byte",
                "string": s,
            }),
            Error::InvalidName(n) => json!({
                "message": "there was an invalid character in a user name",
                "type": "invalid-name",
                "name": n,
            }),
            Error::InvalidResetToken => json!({
                "message": "password reset token is invalid or has expired",
                "type": "invalid-reset-token",
            }),
            Error::UnsupportedMediaType(m) => json!({
                "message": "unsupported file type, please upload images or videos",
                "type": "unsupported-media-type",
                "mime": m,
            }),
            Error::PayloadTooLarge(limit) => json!({
                "message": "uploaded file is too large",
                "type": "payload-too-large",
                "limit": limit,
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let str_field = |name: &str| -> anyhow::Result<String> {
            Ok(String::from(
                data.get(name)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow!("error contents is missing string field {name:?}"))?,
            ))
        };
        let uuid_field = |name: &str| -> anyhow::Result<Uuid> {
            data.get(name)
                .and_then(|v| v.as_str())
                .and_then(|v| Uuid::from_str(v).ok())
                .ok_or_else(|| anyhow!("error contents is missing uuid field {name:?}"))
        };
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(String::from(
                    data.get("message")
                        .and_then(|msg| msg.as_str())
                        .unwrap_or(""),
                )),
                "permission-denied" => Error::PermissionDenied,
                "invalid-credentials" => Error::InvalidCredentials,
                "post-not-found" => Error::PostNotFound(uuid_field("id")?),
                "comment-not-found" => Error::CommentNotFound(uuid_field("id")?),
                "user-not-found" => Error::UserNotFound(str_field("name")?),
                "invalid-input" => Error::InvalidInput(str_field("message")?),
                "conflict-name" => Error::NameAlreadyUsed(str_field("name")?),
                "conflict-email" => Error::EmailAlreadyUsed(str_field("email")?),
                "null-byte" => Error::NullByteInString(str_field("string")?),
                "invalid-name" => Error::InvalidName(str_field("name")?),
                "invalid-reset-token" => Error::InvalidResetToken,
                "unsupported-media-type" => Error::UnsupportedMediaType(str_field("mime")?),
                "payload-too-large" => Error::PayloadTooLarge(
                    data.get("limit")
                        .and_then(|l| l.as_u64())
                        .ok_or_else(|| anyhow!("payload-too-large error without a limit"))?,
                ),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_parse_back_from_their_contents() {
        let errs = [
            Error::Unknown(String::from("boom")),
            Error::PermissionDenied,
            Error::InvalidCredentials,
            Error::PostNotFound(Uuid::new_v4()),
            Error::CommentNotFound(Uuid::new_v4()),
            Error::UserNotFound(String::from("ghost")),
            Error::InvalidInput(String::from("title is required")),
            Error::NameAlreadyUsed(String::from("alice")),
            Error::EmailAlreadyUsed(String::from("alice@example.org")),
            Error::NullByteInString(String::from("a\0b")),
            Error::InvalidName(String::from("a b")),
            Error::InvalidResetToken,
            Error::UnsupportedMediaType(String::from("text/plain")),
            Error::PayloadTooLarge(50 * 1024 * 1024),
        ];
        for e in errs {
            assert_eq!(Error::parse(&e.contents()).expect("parsing error"), e);
        }
    }

    #[test]
    fn status_codes_follow_the_error_category() {
        use http::StatusCode;
        assert_eq!(
            Error::CommentNotFound(Uuid::nil()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(Error::PermissionDenied.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            Error::InvalidInput(String::new()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Unknown(String::new()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
