use std::collections::{BTreeSet, HashMap};

use uuid::Uuid;

use crate::{Author, Error, PostId, Time, UserId};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub Uuid);

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    Like,
    Dislike,
}

impl Reaction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reaction::Like => "like",
            Reaction::Dislike => "dislike",
        }
    }

    pub fn parse(s: &str) -> Option<Reaction> {
        match s {
            "like" => Some(Reaction::Like),
            "dislike" => Some(Reaction::Dislike),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub author: Author,

    /// `None` for top-level comments
    pub parent_id: Option<CommentId>,
    pub content: String,

    /// A user is in at most one of `likes` and `dislikes`
    pub likes: BTreeSet<UserId>,
    pub dislikes: BTreeSet<UserId>,

    pub created_at: Time,
    pub updated_at: Time,
}

impl Comment {
    pub fn reaction_of(&self, user: &UserId) -> Option<Reaction> {
        if self.likes.contains(user) {
            Some(Reaction::Like)
        } else if self.dislikes.contains(user) {
            Some(Reaction::Dislike)
        } else {
            None
        }
    }

    /// Toggles `reaction` for `user` and returns the user's resulting reaction
    ///
    /// Reacting the same way twice cancels the reaction, and reacting the other
    /// way switches it over.
    pub fn toggle_reaction(&mut self, user: UserId, reaction: Reaction) -> Option<Reaction> {
        let previous = self.reaction_of(&user);
        self.likes.remove(&user);
        self.dislikes.remove(&user);
        if previous == Some(reaction) {
            return None;
        }
        match reaction {
            Reaction::Like => self.likes.insert(user),
            Reaction::Dislike => self.dislikes.insert(user),
        };
        Some(reaction)
    }
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub post_id: PostId,
    pub content: String,
    pub parent_id: Option<CommentId>,
}

impl NewComment {
    pub fn validate(&self) -> Result<(), Error> {
        match crate::validate_required("comment content", &self.content) {
            Err(Error::InvalidInput(_)) => Err(Error::InvalidInput(String::from(
                "comment content cannot be empty",
            ))),
            res => res,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: Comment,

    /// Direct replies, oldest first
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    /// Number of nodes in this subtree, including itself
    pub fn len(&self) -> usize {
        let mut res = 0;
        let mut stack = vec![self];
        while let Some(n) = stack.pop() {
            res += 1;
            stack.extend(n.replies.iter());
        }
        res
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Deleted {
    pub message: String,
    pub deleted: u64,
}

/// Builds the reply forest of one post from its comments
///
/// `comments` should be sorted by creation date, as sibling order in the
/// output follows input order. A comment whose parent is not part of
/// `comments` is promoted to the top level. Never loses a comment, even
/// when the parent links form a cycle.
pub fn build_tree(comments: Vec<Comment>) -> Vec<CommentNode> {
    let n = comments.len();
    let mut index = HashMap::with_capacity(n);
    for (i, c) in comments.iter().enumerate() {
        index.entry(c.id).or_insert(i);
    }

    let mut children = vec![Vec::new(); n];
    let mut roots = Vec::new();
    for (i, c) in comments.iter().enumerate() {
        match c.parent_id.and_then(|p| index.get(&p)).copied() {
            Some(p) if p != i => children[p].push(i),
            Some(_) => roots.push(i),
            None => {
                if let Some(parent) = c.parent_id {
                    tracing::warn!(
                        comment = ?c.id,
                        ?parent,
                        "comment has a missing parent, showing it at top level"
                    );
                }
                roots.push(i);
            }
        }
    }

    let mut slots = comments.into_iter().map(Some).collect::<Vec<_>>();
    let mut built: Vec<Option<CommentNode>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut res = Vec::with_capacity(roots.len());

    // Nodes unreachable from the roots are on a parent cycle: the first one
    // of each cycle in input order gets to be a root.
    let extra_roots = (0..n).collect::<Vec<_>>();
    for &root in roots.iter().chain(extra_roots.iter()) {
        if visited[root] {
            continue;
        }
        visited[root] = true;
        let mut stack = vec![(root, false)];
        while let Some((i, expanded)) = stack.pop() {
            if !expanded {
                stack.push((i, true));
                for &c in children[i].iter().rev() {
                    if !visited[c] {
                        visited[c] = true;
                        stack.push((c, false));
                    }
                }
                continue;
            }
            let replies = children[i]
                .iter()
                .filter_map(|&c| built[c].take())
                .collect();
            let comment = slots[i]
                .take()
                .expect("tree builder visited a comment twice");
            built[i] = Some(CommentNode { comment, replies });
        }
        res.extend(built[root].take());
    }
    res
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn author() -> Author {
        Author {
            id: UserId::stub(),
            username: String::from("alice"),
            profile_picture: String::new(),
        }
    }

    fn id(i: u128) -> CommentId {
        CommentId(Uuid::from_u128(i))
    }

    fn comment(i: u128, parent: Option<u128>) -> Comment {
        let date = Utc::now() + Duration::seconds(i as i64);
        Comment {
            id: id(i),
            post_id: PostId(Uuid::nil()),
            author: author(),
            parent_id: parent.map(id),
            content: format!("comment {i}"),
            likes: BTreeSet::new(),
            dislikes: BTreeSet::new(),
            created_at: date,
            updated_at: date,
        }
    }

    /// Renders a forest as `1[2[4],3]` for readable assertions
    fn shape(nodes: &[CommentNode]) -> String {
        nodes
            .iter()
            .map(|n| {
                let me = n.comment.id.0.as_u128().to_string();
                match n.replies.is_empty() {
                    true => me,
                    false => format!("{me}[{}]", shape(&n.replies)),
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    #[test]
    fn builds_nested_replies() {
        let tree = build_tree(vec![
            comment(1, None),
            comment(2, Some(1)),
            comment(3, Some(1)),
            comment(4, Some(2)),
        ]);
        assert_eq!(shape(&tree), "1[2[4],3]");
    }

    #[test]
    fn empty_input_gives_empty_forest() {
        assert!(build_tree(Vec::new()).is_empty());
    }

    #[test]
    fn replies_listed_before_their_parent_still_attach() {
        let tree = build_tree(vec![comment(2, Some(1)), comment(1, None)]);
        assert_eq!(shape(&tree), "1[2]");
    }

    #[test]
    fn orphans_are_promoted_to_top_level() {
        let tree = build_tree(vec![
            comment(1, None),
            comment(2, Some(99)),
            comment(3, Some(2)),
        ]);
        assert_eq!(shape(&tree), "1,2[3]");
    }

    #[test]
    fn self_parent_is_top_level() {
        let tree = build_tree(vec![comment(1, Some(1)), comment(2, Some(1))]);
        assert_eq!(shape(&tree), "1[2]");
    }

    #[test]
    fn cycles_do_not_lose_comments() {
        let tree = build_tree(vec![
            comment(1, Some(3)),
            comment(2, Some(1)),
            comment(3, Some(2)),
            comment(4, None),
        ]);
        assert_eq!(tree.iter().map(CommentNode::len).sum::<usize>(), 4);
        assert_eq!(shape(&tree), "4,1[2[3]]");
    }

    #[test]
    fn deep_chains_do_not_recurse() {
        let depth = 50_000;
        let comments = (0..depth)
            .map(|i| comment(i, i.checked_sub(1)))
            .collect::<Vec<_>>();
        let tree = build_tree(comments);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].len(), depth as usize);
        // dropping a deep tree recursively could overflow the test thread stack
        let mut stack = tree;
        while let Some(mut n) = stack.pop() {
            stack.append(&mut n.replies);
        }
    }

    #[test]
    fn tree_shape_matches_parent_links() {
        bolero::check!()
            .with_type::<Vec<Option<u16>>>()
            .cloned()
            .for_each(|links| {
                // parent of comment i is one of the comments before it, or none
                let comments = links
                    .iter()
                    .enumerate()
                    .map(|(i, l)| {
                        let parent = match (l, i) {
                            (Some(p), i) if i > 0 => Some(u128::from(*p) % i as u128),
                            _ => None,
                        };
                        comment(i as u128, parent)
                    })
                    .collect::<Vec<_>>();
                let tree = build_tree(comments.clone());
                assert_eq!(
                    tree.iter().map(CommentNode::len).sum::<usize>(),
                    comments.len()
                );

                let mut stack = tree.iter().collect::<Vec<_>>();
                for root in tree.iter() {
                    assert_eq!(root.comment.parent_id, None);
                }
                while let Some(n) = stack.pop() {
                    let expected = comments
                        .iter()
                        .filter(|c| c.parent_id == Some(n.comment.id))
                        .map(|c| c.id)
                        .collect::<Vec<_>>();
                    let actual = n.replies.iter().map(|r| r.comment.id).collect::<Vec<_>>();
                    assert_eq!(actual, expected);
                    stack.extend(n.replies.iter());
                }
            });
    }

    #[test]
    fn liking_a_disliked_comment_switches_over() {
        let mut c = comment(1, None);
        let u = UserId(Uuid::new_v4());
        assert_eq!(c.toggle_reaction(u, Reaction::Dislike), Some(Reaction::Dislike));
        assert!(c.dislikes.contains(&u));
        assert_eq!(c.toggle_reaction(u, Reaction::Like), Some(Reaction::Like));
        assert!(c.likes.contains(&u));
        assert!(!c.dislikes.contains(&u));
        assert_eq!(c.toggle_reaction(u, Reaction::Like), None);
        assert!(c.likes.is_empty() && c.dislikes.is_empty());
    }

    #[test]
    fn empty_comments_are_refused() {
        let c = NewComment {
            post_id: PostId(Uuid::nil()),
            content: String::from("   "),
            parent_id: None,
        };
        assert_eq!(
            c.validate(),
            Err(Error::InvalidInput(String::from(
                "comment content cannot be empty"
            )))
        );
    }
}
