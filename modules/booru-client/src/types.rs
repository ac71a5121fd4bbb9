use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope for the single-post endpoint: `{"post": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PostEnvelope {
    pub post: PostPayload,
}

/// Envelope for the post listing endpoint: `{"posts": [...]}`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PostListEnvelope {
    pub posts: Vec<PostPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostPayload {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub file: FilePayload,
    pub score: ScorePayload,
    pub tags: TagGroupsPayload,
    pub rating: String,
    pub fav_count: i32,
    #[serde(default)]
    pub description: String,
    pub duration: Option<f64>,
    pub approver_id: Option<i64>,
    pub uploader_id: i64,
    #[serde(default)]
    pub relationships: RelationshipsPayload,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePayload {
    pub width: i32,
    pub height: i32,
    pub ext: String,
    pub size: i64,
    pub md5: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorePayload {
    pub up: i32,
    pub down: i32,
    pub total: i32,
}

/// Tags grouped by category as the listing endpoints return them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagGroupsPayload {
    #[serde(default)]
    pub general: Vec<String>,
    #[serde(default)]
    pub artist: Vec<String>,
    #[serde(default)]
    pub copyright: Vec<String>,
    #[serde(default)]
    pub character: Vec<String>,
    #[serde(default)]
    pub species: Vec<String>,
    #[serde(default)]
    pub invalid: Vec<String>,
    #[serde(default)]
    pub meta: Vec<String>,
    #[serde(default)]
    pub lore: Vec<String>,
}

impl TagGroupsPayload {
    /// All tag names across categories, in a fixed category order.
    pub fn all(&self) -> Vec<String> {
        [
            &self.general,
            &self.artist,
            &self.copyright,
            &self.character,
            &self.species,
            &self.invalid,
            &self.meta,
            &self.lore,
        ]
        .iter()
        .flat_map(|group| group.iter().cloned())
        .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipsPayload {
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub children: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPayload {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub level: i64,
    pub is_banned: bool,
    pub avatar_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagPayload {
    pub id: i64,
    pub name: String,
    pub category: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_payload_deserializes_listing_shape() {
        let json = r#"{
            "posts": [{
                "id": 4821,
                "created_at": "2024-03-01T12:30:00Z",
                "updated_at": null,
                "file": {"width": 1280, "height": 720, "ext": "png", "size": 493201, "md5": "e3b0c44298fc1c149afbf4c8996fb924"},
                "score": {"up": 14, "down": -3, "total": 11},
                "tags": {"general": ["landscape", "night"], "artist": ["someartist"]},
                "rating": "s",
                "fav_count": 7,
                "description": "",
                "duration": null,
                "approver_id": null,
                "uploader_id": 77,
                "relationships": {"parent_id": null, "children": [4822]},
                "sources": ["https://example.com/original"]
            }]
        }"#;

        let envelope: PostListEnvelope = serde_json::from_str(json).unwrap();
        let post = &envelope.posts[0];
        assert_eq!(post.id, 4821);
        assert_eq!(post.file.ext, "png");
        assert_eq!(post.uploader_id, 77);
        assert_eq!(post.relationships.children, vec![4822]);
        assert_eq!(
            post.tags.all(),
            vec!["landscape", "night", "someartist"]
        );
    }

    #[test]
    fn missing_optional_blocks_default() {
        let json = r#"{
            "id": 1,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": null,
            "file": {"width": 1, "height": 1, "ext": "jpg", "size": 10, "md5": "aa"},
            "score": {"up": 0, "down": 0, "total": 0},
            "tags": {},
            "rating": "q",
            "fav_count": 0,
            "duration": null,
            "approver_id": null,
            "uploader_id": 2
        }"#;

        let post: PostPayload = serde_json::from_str(json).unwrap();
        assert!(post.description.is_empty());
        assert!(post.sources.is_empty());
        assert!(post.relationships.children.is_empty());
        assert!(post.tags.all().is_empty());
    }
}
