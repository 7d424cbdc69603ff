use chrono::NaiveDate;
use uuid::Uuid;

use crate::{Error, Post, Time, STUB_UUID};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn stub() -> UserId {
        UserId(STUB_UUID)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SocialLinks {
    pub twitter: String,
    pub github: String,
    pub website: String,
    pub linkedin: String,
}

/// The view of a user that gets embedded into posts and comments
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Author {
    pub id: UserId,
    pub username: String,
    pub profile_picture: String,
}

/// Public profile
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub bio: String,
    pub profile_picture: String,
    pub social_links: SocialLinks,
    pub created_at: Time,
}

/// What a user gets to see about themself
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PrivateUser {
    #[serde(flatten)]
    pub user: User,
    pub email: String,
    pub dob: Option<NaiveDate>,
    pub mobile: Option<String>,
}

/// Store-side user record, never sent to clients
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredUser {
    pub user: PrivateUser,
    pub password_hash: String,
    pub reset_token: Option<(Uuid, Time)>,
}

impl StoredUser {
    pub fn id(&self) -> UserId {
        self.user.user.id
    }

    pub fn username(&self) -> &str {
        &self.user.user.username
    }

    pub fn author(&self) -> Author {
        Author {
            id: self.user.user.id,
            username: self.user.user.username.clone(),
            profile_picture: self.user.user.profile_picture.clone(),
        }
    }
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewUser {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub initial_password_hash: String,
}

impl NewUser {
    pub fn new(id: UserId, username: String, email: String, initial_password: String) -> NewUser {
        NewUser {
            id,
            username,
            email,
            initial_password_hash: bcrypt::hash(initial_password, bcrypt::DEFAULT_COST)
                .expect("failed hashing password"),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_name(&self.username)?;
        crate::validate_email(&self.email)?;
        crate::validate_required("password hash", &self.initial_password_hash)?;
        Ok(())
    }
}

/// Fields left as `None` keep their current value
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub bio: Option<String>,
    pub dob: Option<NaiveDate>,
    pub mobile: Option<String>,
    pub social_links: Option<SocialLinks>,
    pub profile_picture: Option<String>,
}

impl ProfileUpdate {
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(name) = &self.username {
            crate::validate_name(name)?;
        }
        for s in [&self.bio, &self.mobile, &self.profile_picture]
            .into_iter()
            .flatten()
        {
            crate::validate_string(s)?;
        }
        if let Some(l) = &self.social_links {
            for s in [&l.twitter, &l.github, &l.website, &l.linkedin] {
                crate::validate_string(s)?;
            }
        }
        Ok(())
    }

    pub fn apply_to(self, u: &mut PrivateUser) {
        if let Some(username) = self.username {
            u.user.username = username;
        }
        if let Some(bio) = self.bio {
            u.user.bio = bio;
        }
        if let Some(dob) = self.dob {
            u.dob = Some(dob);
        }
        if let Some(mobile) = self.mobile {
            u.mobile = Some(mobile);
        }
        if let Some(links) = self.social_links {
            u.user.social_links = links;
        }
        if let Some(pic) = self.profile_picture {
            u.user.profile_picture = pic;
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Profile {
    pub user: User,
    pub posts: Vec<Post>,
}
