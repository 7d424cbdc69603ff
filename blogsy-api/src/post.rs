use std::collections::BTreeSet;

use uuid::Uuid;

use crate::{Author, Error, Time, UserId};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const DEFAULT_SEARCH_LIMIT: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct PostId(pub Uuid);

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    #[default]
    Published,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Option<PostStatus> {
        match s {
            "draft" => Some(PostStatus::Draft),
            "published" => Some(PostStatus::Published),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classifies an uploaded file by its MIME type, `None` meaning the upload is refused
    pub fn from_mime(mime: &str) -> Option<MediaKind> {
        let (kind, subtype) = mime.split_once('/')?;
        let subtype = subtype.split(';').next()?.trim().to_ascii_lowercase();
        match (kind.trim().to_ascii_lowercase().as_str(), subtype.as_str()) {
            ("image", "jpeg" | "jpg" | "png" | "gif" | "webp") => Some(MediaKind::Image),
            ("video", "mp4" | "quicktime" | "mov" | "avi" | "x-msvideo") => Some(MediaKind::Video),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<MediaKind> {
        match s {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MediaRef {
    pub url: String,

    /// Identifier of the file in the media store, used to delete it
    pub public_id: String,
    pub file_type: MediaKind,
    pub name: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Post {
    pub id: PostId,
    pub author: Author,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub likes: BTreeSet<UserId>,
    pub likes_count: u64,
    pub cover_image: String,
    pub status: PostStatus,
    pub media: Vec<MediaRef>,
    pub created_at: Time,
    pub updated_at: Time,
}

impl Post {
    /// Returns whether `user` now likes the post
    pub fn toggle_like(&mut self, user: UserId) -> bool {
        let liked = match self.likes.remove(&user) {
            true => false,
            false => self.likes.insert(user),
        };
        self.likes_count = self.likes.len() as u64;
        liked
    }

    pub fn refresh_cover_image(&mut self) {
        self.cover_image = self
            .media
            .first()
            .map(|m| m.url.clone())
            .unwrap_or_default();
    }
}

fn normalize_tags(tags: Vec<String>) -> Result<Vec<String>, Error> {
    let mut res = Vec::with_capacity(tags.len());
    for t in tags {
        crate::validate_string(&t)?;
        let t = t.trim();
        if !t.is_empty() {
            res.push(String::from(t));
        }
    }
    Ok(res)
}

fn validate_media(media: &[MediaRef]) -> Result<(), Error> {
    for m in media {
        crate::validate_required("media url", &m.url)?;
        crate::validate_string(&m.public_id)?;
        if let Some(name) = &m.name {
            crate::validate_string(name)?;
        }
    }
    Ok(())
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: PostStatus,
    #[serde(default)]
    pub media: Vec<MediaRef>,
}

impl NewPost {
    /// Validates the post, trimming tags and dropping the blank ones
    pub fn normalize(mut self) -> Result<NewPost, Error> {
        crate::validate_required("title", &self.title)?;
        crate::validate_required("content", &self.content)?;
        self.tags = normalize_tags(self.tags)?;
        validate_media(&self.media)?;
        Ok(self)
    }
}

/// Fields left as `None` keep their current value
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct PostUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub media: Option<Vec<MediaRef>>,
}

impl PostUpdate {
    pub fn normalize(mut self) -> Result<PostUpdate, Error> {
        if let Some(title) = &self.title {
            crate::validate_required("title", title)?;
        }
        if let Some(content) = &self.content {
            crate::validate_required("content", content)?;
        }
        self.tags = self.tags.map(normalize_tags).transpose()?;
        if let Some(media) = &self.media {
            validate_media(media)?;
        }
        Ok(self)
    }

    /// Applies the update, returning the media that is no longer referenced
    pub fn apply_to(self, post: &mut Post) -> Vec<MediaRef> {
        if let Some(title) = self.title {
            post.title = title;
        }
        if let Some(content) = self.content {
            post.content = content;
        }
        if let Some(tags) = self.tags {
            post.tags = tags;
        }
        let mut dropped = Vec::new();
        if let Some(media) = self.media {
            dropped = post
                .media
                .drain(..)
                .filter(|old| !media.iter().any(|m| m.public_id == old.public_id))
                .collect();
            post.media = media;
        }
        post.refresh_cover_image();
        dropped
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PostSort {
    #[default]
    Newest,
    Oldest,
    Likes,
}

impl PostSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostSort::Newest => "newest",
            PostSort::Oldest => "oldest",
            PostSort::Likes => "likes",
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort: Option<PostSort>,
    pub tag: Option<String>,

    /// Username of the author
    pub author: Option<String>,
}

impl ListQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn sort(&self) -> PostSort {
        self.sort.unwrap_or_default()
    }

    pub fn skip(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.limit())
    }

    pub fn validate(&self) -> Result<(), Error> {
        for s in [&self.tag, &self.author].into_iter().flatten() {
            crate::validate_string(s)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PostPage {
    pub posts: Vec<Post>,
    pub page: u32,
    pub pages: u64,
    pub total: u64,
}

impl PostPage {
    pub fn empty(q: &ListQuery) -> PostPage {
        PostPage {
            posts: Vec::new(),
            page: q.page(),
            pages: 0,
            total: 0,
        }
    }

    pub fn new(q: &ListQuery, posts: Vec<Post>, total: u64) -> PostPage {
        PostPage {
            posts,
            page: q.page(),
            pages: (total + u64::from(q.limit()) - 1) / u64::from(q.limit()),
            total,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSort {
    #[default]
    Relevance,
    Newest,
    Oldest,
    Likes,
}

impl SearchSort {
    pub fn to_post_sort(self) -> PostSort {
        match self {
            // TODO: rank by ts_rank once the store exposes a relevance score
            SearchSort::Relevance | SearchSort::Newest => PostSort::Newest,
            SearchSort::Oldest => PostSort::Oldest,
            SearchSort::Likes => PostSort::Likes,
        }
    }
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub sort: Option<SearchSort>,
    pub limit: Option<u32>,
}

impl SearchQuery {
    /// The trimmed keyword, `None` if there is nothing to search for
    pub fn keyword(&self) -> Option<&str> {
        self.q.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn post() -> Post {
        Post {
            id: PostId(Uuid::new_v4()),
            author: Author {
                id: UserId::stub(),
                username: String::from("alice"),
                profile_picture: String::new(),
            },
            title: String::from("title"),
            content: String::from("content"),
            tags: Vec::new(),
            likes: BTreeSet::new(),
            likes_count: 0,
            cover_image: String::new(),
            status: PostStatus::Published,
            media: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn media(url: &str) -> MediaRef {
        MediaRef {
            url: String::from(url),
            public_id: String::from(url),
            file_type: MediaKind::Image,
            name: None,
        }
    }

    #[test]
    fn like_toggles_and_counts() {
        let mut p = post();
        let u = UserId(Uuid::new_v4());
        assert!(p.toggle_like(u));
        assert_eq!(p.likes_count, 1);
        assert!(!p.toggle_like(u));
        assert_eq!(p.likes_count, 0);
        assert!(p.likes.is_empty());
    }

    #[test]
    fn new_post_requires_title_and_content() {
        let p = NewPost {
            title: String::from(" "),
            content: String::from("x"),
            tags: Vec::new(),
            status: PostStatus::Published,
            media: Vec::new(),
        };
        assert_eq!(
            p.normalize().unwrap_err(),
            Error::InvalidInput(String::from("title is required"))
        );
    }

    #[test]
    fn tags_are_trimmed() {
        let p = NewPost {
            title: String::from("t"),
            content: String::from("c"),
            tags: vec![String::from(" rust "), String::from(""), String::from("web")],
            status: PostStatus::Draft,
            media: Vec::new(),
        }
        .normalize()
        .unwrap();
        assert_eq!(p.tags, vec![String::from("rust"), String::from("web")]);
    }

    #[test]
    fn update_reports_dropped_media_and_moves_cover() {
        let mut p = post();
        p.media = vec![media("/uploads/a.png"), media("/uploads/b.png")];
        p.refresh_cover_image();
        assert_eq!(p.cover_image, "/uploads/a.png");

        let dropped = PostUpdate {
            media: Some(vec![media("/uploads/b.png"), media("/uploads/c.png")]),
            ..PostUpdate::default()
        }
        .apply_to(&mut p);
        assert_eq!(dropped, vec![media("/uploads/a.png")]);
        assert_eq!(p.cover_image, "/uploads/b.png");

        let dropped = PostUpdate {
            media: Some(Vec::new()),
            ..PostUpdate::default()
        }
        .apply_to(&mut p);
        assert_eq!(dropped.len(), 2);
        assert_eq!(p.cover_image, "");
    }

    #[test]
    fn pages_round_up() {
        let q = ListQuery {
            limit: Some(10),
            page: Some(3),
            ..ListQuery::default()
        };
        assert_eq!(q.skip(), 20);
        assert_eq!(PostPage::new(&q, Vec::new(), 21).pages, 3);
        assert_eq!(PostPage::new(&q, Vec::new(), 20).pages, 2);
        assert_eq!(PostPage::new(&q, Vec::new(), 0).pages, 0);
    }

    #[test]
    fn list_query_clamps() {
        let q = ListQuery {
            page: Some(0),
            limit: Some(1000),
            ..ListQuery::default()
        };
        assert_eq!(q.page(), 1);
        assert_eq!(q.limit(), MAX_PAGE_SIZE);
    }

    #[test]
    fn mime_types_are_filtered() {
        assert_eq!(MediaKind::from_mime("image/png"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_mime("IMAGE/JPEG"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_mime("video/mp4"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_mime("video/quicktime"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_mime("text/html"), None);
        assert_eq!(MediaKind::from_mime("image/svg+xml"), None);
        assert_eq!(MediaKind::from_mime("png"), None);
    }
}
