use chrono::{DateTime, Duration, Utc};
use rand::{seq::SliceRandom, Rng};
use uuid::Uuid;

const NUM_USERS: usize = 5;
const PASSWORD: &str = "password";

const NUM_POSTS: usize = 40;
const POST_TITLE_WORDS: usize = 6;
const POST_CONTENT_WORDS: usize = 200;
const TAGS: &[&str] = &["rust", "web", "travel", "cooking", "music", "books", "science"];
const MAX_TAGS_PER_POST: usize = 3;

const NUM_COMMENTS: usize = 300;
const COMMENT_WORDS: usize = 25;

/// Probability that a comment answers an earlier comment of the same post
const REPLY_PROBABILITY: f64 = 0.6;

fn gen_n_items(table: &str, columns: &str, n: usize, mut f: impl FnMut(usize) -> String) {
    println!("INSERT INTO {table} ({columns}) VALUES");
    for i in 0..n {
        if i != 0 {
            println!(",");
        }
        print!("    {}", f(i));
    }
    println!();
    println!("ON CONFLICT DO NOTHING;");
}

fn sql_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn sql_time(t: DateTime<Utc>) -> String {
    sql_str(&t.to_rfc3339())
}

fn gen_date(rng: &mut impl Rng) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(rng.gen_range(0..60 * 24 * 365))
}

struct GenPost {
    id: Uuid,
    created_at: DateTime<Utc>,
    comments: Vec<(Uuid, DateTime<Utc>)>,
}

fn main() {
    let mut rng = rand::thread_rng();
    let password_hash =
        bcrypt::hash(PASSWORD, bcrypt::DEFAULT_COST).expect("failed hashing password");

    // Generate users, all with the same password
    let mut users = Vec::new();
    gen_n_items(
        "users",
        "id, username, email, password_hash, bio, created_at",
        NUM_USERS,
        |i| {
            let id = Uuid::new_v4();
            users.push(id);
            format!(
                "('{id}', 'user{i}', 'user{i}@example.org', {}, {}, {})",
                sql_str(&password_hash),
                sql_str(&lipsum::lipsum_words(8)),
                sql_time(gen_date(&mut rng)),
            )
        },
    );

    // Generate posts, a few of them drafts
    let mut posts = Vec::new();
    gen_n_items(
        "posts",
        "id, author_id, title, content, tags, cover_image, status, media, created_at, updated_at",
        NUM_POSTS,
        |_| {
            let id = Uuid::new_v4();
            let created_at = gen_date(&mut rng);
            let num_tags = rng.gen_range(0..=MAX_TAGS_PER_POST);
            let tags = TAGS
                .choose_multiple(&mut rng, num_tags)
                .map(|t| sql_str(t))
                .collect::<Vec<_>>();
            let status = match rng.gen_bool(0.8) {
                true => "published",
                false => "draft",
            };
            posts.push(GenPost {
                id,
                created_at,
                comments: Vec::new(),
            });
            format!(
                "('{id}', '{}', {}, {}, ARRAY[{}]::VARCHAR[], '', '{status}', '[]', {}, {})",
                users.choose(&mut rng).expect("no users generated"),
                sql_str(&lipsum::lipsum_words(POST_TITLE_WORDS)),
                sql_str(&lipsum::lipsum(POST_CONTENT_WORDS)),
                tags.join(", "),
                sql_time(created_at),
                sql_time(created_at),
            )
        },
    );

    // Generate comments, replies always coming after the comment they answer
    gen_n_items(
        "comments",
        "id, post_id, author_id, parent_id, content, created_at, updated_at",
        NUM_COMMENTS,
        |_| {
            let id = Uuid::new_v4();
            let post = posts.choose_mut(&mut rng).expect("no posts generated");
            let parent = match rng.gen_bool(REPLY_PROBABILITY) {
                true => post.comments.choose(&mut rng).copied(),
                false => None,
            };
            let after = parent.map(|(_, t)| t).unwrap_or(post.created_at);
            let created_at = after + Duration::minutes(rng.gen_range(1..60 * 24 * 7));
            post.comments.push((id, created_at));
            format!(
                "('{id}', '{}', '{}', {}, {}, {}, {})",
                post.id,
                users.choose(&mut rng).expect("no users generated"),
                parent.map_or_else(|| String::from("NULL"), |(p, _)| format!("'{p}'")),
                sql_str(&lipsum::lipsum_words(COMMENT_WORDS)),
                sql_time(created_at),
                sql_time(created_at),
            )
        },
    );

    // Generate likes, at most one per user and post
    let mut likes = Vec::new();
    for post in &posts {
        for user in &users {
            if rng.gen_bool(0.3) {
                likes.push(format!("('{}', '{user}')", post.id));
            }
        }
    }
    if !likes.is_empty() {
        gen_n_items("post_likes", "post_id, user_id", likes.len(), |i| {
            likes[i].clone()
        });
    }

    // Generate comment reactions
    let comments = posts
        .iter()
        .flat_map(|p| p.comments.iter().map(|(id, _)| *id))
        .collect::<Vec<_>>();
    let mut rows = Vec::new();
    for comment in &comments {
        for user in &users {
            if rng.gen_bool(0.2) {
                let reaction = ["like", "dislike"][rng.gen_range(0..2)];
                rows.push(format!("('{comment}', '{user}', '{reaction}')"));
            }
        }
    }
    if !rows.is_empty() {
        gen_n_items(
            "comment_reactions",
            "comment_id, user_id, reaction",
            rows.len(),
            |i| rows[i].clone(),
        );
    }
}
