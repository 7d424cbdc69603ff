use std::time::Duration;

use async_trait::async_trait;

use crate::{Author, PostId, UserId};

/// Key-value cache holding serialized JSON with a time-to-live
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Deletes every key matching the glob `pattern`, where `*` matches any
    /// run of characters and `?` any single character
    async fn delete_matching(&self, pattern: &str) -> anyhow::Result<()>;
}

pub mod ttl {
    use std::time::Duration;

    pub const POST_LIST: Duration = Duration::from_secs(300);
    pub const POST_DETAIL: Duration = Duration::from_secs(600);
    pub const DRAFTS: Duration = Duration::from_secs(300);
    pub const COMMENTS: Duration = Duration::from_secs(300);
    pub const PROFILE: Duration = Duration::from_secs(900);
}

pub mod keys {
    use crate::{ListQuery, PostId, PostStatus, UserId};

    pub const ALL_POST_LISTS: &str = "posts:list:*";
    pub const ALL_POST_DETAILS: &str = "posts:detail:*";
    pub const ALL_COMMENT_LISTS: &str = "comments:post:*";

    pub fn post_list(q: &ListQuery, status: PostStatus) -> String {
        format!(
            "posts:list:page:{}:limit:{}:sort:{}:tag:{}:author:{}:status:{}",
            q.page(),
            q.limit(),
            q.sort().as_str(),
            q.tag.as_deref().unwrap_or("all"),
            q.author.as_deref().unwrap_or("all"),
            status.as_str(),
        )
    }

    pub fn post_detail(id: PostId) -> String {
        format!("posts:detail:{}", id.0)
    }

    pub fn drafts(author: UserId) -> String {
        format!("posts:drafts:{}", author.0)
    }

    /// Matches every draft-list key of `author`
    pub fn all_drafts_of(author: UserId) -> String {
        format!("posts:drafts:{}*", author.0)
    }

    pub fn comments(post: PostId) -> String {
        format!("comments:post:{}", post.0)
    }

    pub fn profile(username: &str) -> String {
        format!("users:profile:{username}")
    }
}

/// One cache invalidation step
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Target {
    Key(String),
    Pattern(String),
}

/// A write that can make cached reads stale
#[derive(Clone, Copy, Debug)]
pub enum Mutation<'a> {
    PostCreated {
        author: &'a Author,
    },
    PostUpdated {
        post: PostId,
        author: &'a Author,
    },
    PostDeleted {
        post: PostId,
        author: &'a Author,
    },
    DraftPublished {
        post: PostId,
        author: &'a Author,
    },
    PostLikeToggled {
        post: PostId,
        author: &'a Author,
    },
    CommentsChanged {
        post: PostId,
    },
    ProfileUpdated {
        user: UserId,
        old_username: &'a str,
        new_username: &'a str,
    },
}

impl<'a> Mutation<'a> {
    /// Everything that must be dropped from the cache after this write
    pub fn targets(&self) -> Vec<Target> {
        use Target::*;
        let all_lists = || Pattern(String::from(keys::ALL_POST_LISTS));
        let drafts_of = |a: &Author| Pattern(keys::all_drafts_of(a.id));
        let profile_of = |a: &Author| Key(keys::profile(&a.username));
        match *self {
            Mutation::PostCreated { author } => {
                vec![all_lists(), drafts_of(author), profile_of(author)]
            }
            Mutation::PostUpdated { post, author } | Mutation::DraftPublished { post, author } => {
                vec![
                    Key(keys::post_detail(post)),
                    all_lists(),
                    drafts_of(author),
                    profile_of(author),
                ]
            }
            Mutation::PostDeleted { post, author } => vec![
                Key(keys::post_detail(post)),
                all_lists(),
                drafts_of(author),
                profile_of(author),
                Key(keys::comments(post)),
            ],
            Mutation::PostLikeToggled { post, author } => vec![
                Key(keys::post_detail(post)),
                all_lists(),
                drafts_of(author),
                profile_of(author),
            ],
            Mutation::CommentsChanged { post } => vec![Key(keys::comments(post))],
            Mutation::ProfileUpdated {
                user,
                old_username,
                new_username,
            } => {
                let mut res = vec![Key(keys::profile(old_username))];
                if old_username != new_username {
                    res.push(Key(keys::profile(new_username)));
                }
                res.extend([
                    all_lists(),
                    Pattern(String::from(keys::ALL_POST_DETAILS)),
                    Pattern(keys::all_drafts_of(user)),
                    Pattern(String::from(keys::ALL_COMMENT_LISTS)),
                ]);
                res
            }
        }
    }
}

/// Redis-style glob matching, supporting `*`, `?` and `\` escapes
pub fn glob_matches(pattern: &str, key: &str) -> bool {
    let p = pattern.chars().collect::<Vec<_>>();
    let k = key.chars().collect::<Vec<_>>();
    let (mut pi, mut ki) = (0, 0);
    // position of the last `*` in the pattern, and of the key when it was seen
    let mut backtrack: Option<(usize, usize)> = None;
    while ki < k.len() {
        match p.get(pi) {
            Some('*') => {
                backtrack = Some((pi, ki));
                pi += 1;
                continue;
            }
            Some('?') => {
                pi += 1;
                ki += 1;
                continue;
            }
            Some('\\') if pi + 1 < p.len() && p[pi + 1] == k[ki] => {
                pi += 2;
                ki += 1;
                continue;
            }
            Some(c) if *c != '\\' && *c == k[ki] => {
                pi += 1;
                ki += 1;
                continue;
            }
            _ => (),
        }
        match backtrack {
            Some((bp, bk)) => {
                pi = bp + 1;
                ki = bk + 1;
                backtrack = Some((bp, bk + 1));
            }
            None => return false,
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::{ListQuery, PostSort, PostStatus};

    fn author() -> Author {
        Author {
            id: UserId(Uuid::from_u128(7)),
            username: String::from("alice"),
            profile_picture: String::new(),
        }
    }

    #[test]
    fn list_keys_encode_every_parameter() {
        let q = ListQuery {
            page: Some(2),
            limit: Some(5),
            sort: Some(PostSort::Likes),
            tag: Some(String::from("rust")),
            author: Some(String::from("alice")),
        };
        assert_eq!(
            keys::post_list(&q, PostStatus::Published),
            "posts:list:page:2:limit:5:sort:likes:tag:rust:author:alice:status:published"
        );
        assert_eq!(
            keys::post_list(&ListQuery::default(), PostStatus::Published),
            "posts:list:page:1:limit:10:sort:newest:tag:all:author:all:status:published"
        );
        assert!(glob_matches(
            keys::ALL_POST_LISTS,
            &keys::post_list(&q, PostStatus::Published)
        ));
    }

    #[test]
    fn post_creation_sweeps_lists_and_profile() {
        let a = author();
        let targets = Mutation::PostCreated { author: &a }.targets();
        assert!(targets.contains(&Target::Pattern(String::from("posts:list:*"))));
        assert!(targets.contains(&Target::Key(String::from("users:profile:alice"))));
    }

    #[test]
    fn post_deletion_drops_comment_list() {
        let a = author();
        let post = PostId(Uuid::from_u128(1));
        let targets = Mutation::PostDeleted { post, author: &a }.targets();
        assert!(targets.contains(&Target::Key(keys::comments(post))));
        assert!(targets.contains(&Target::Key(keys::post_detail(post))));
    }

    #[test]
    fn comment_changes_only_touch_the_comment_list() {
        let post = PostId(Uuid::from_u128(1));
        assert_eq!(
            Mutation::CommentsChanged { post }.targets(),
            vec![Target::Key(keys::comments(post))]
        );
    }

    #[test]
    fn renames_drop_both_profiles() {
        let targets = Mutation::ProfileUpdated {
            user: UserId(Uuid::from_u128(7)),
            old_username: "alice",
            new_username: "alicia",
        }
        .targets();
        assert!(targets.contains(&Target::Key(keys::profile("alice"))));
        assert!(targets.contains(&Target::Key(keys::profile("alicia"))));
    }

    #[test]
    fn globs_match_like_redis() {
        assert!(glob_matches("posts:list:*", "posts:list:page:1"));
        assert!(glob_matches("posts:list:*", "posts:list:"));
        assert!(!glob_matches("posts:list:*", "posts:detail:1"));
        assert!(glob_matches("posts:drafts:abc*", "posts:drafts:abc"));
        assert!(glob_matches("a*b*c", "aXXbYYc"));
        assert!(!glob_matches("a*b*c", "aXXbYY"));
        assert!(glob_matches("h?llo", "hello"));
        assert!(!glob_matches("h?llo", "hllo"));
        assert!(glob_matches("a\\*", "a*"));
        assert!(!glob_matches("a\\*", "ab"));
        assert!(glob_matches("*", ""));
        assert!(!glob_matches("", "a"));
    }
}
