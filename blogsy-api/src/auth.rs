use uuid::Uuid;

use crate::{Error, PrivateUser, STUB_UUID};

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct Register {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Register {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_name(&self.username)?;
        crate::validate_email(&self.email)?;
        crate::validate_required("password", &self.password)?;
        Ok(())
    }
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewSession {
    pub email: String,
    pub password: String,
}

impl NewSession {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.email)?;
        crate::validate_string(&self.password)?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AuthToken(pub Uuid);

impl AuthToken {
    pub fn stub() -> AuthToken {
        AuthToken(STUB_UUID)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AuthResponse {
    pub user: PrivateUser,
    pub token: AuthToken,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct ForgotPassword {
    pub email: String,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct ResetPassword {
    pub password: String,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct AdminResetPassword {
    pub username: String,
    pub new_password_hash: String,
}

impl AdminResetPassword {
    pub fn new(username: String, new_password: String) -> AdminResetPassword {
        AdminResetPassword {
            username,
            new_password_hash: bcrypt::hash(new_password, bcrypt::DEFAULT_COST)
                .expect("failed hashing password"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new(message: impl Into<String>) -> Message {
        Message {
            message: message.into(),
        }
    }
}
