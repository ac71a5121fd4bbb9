use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Remote identifiers. The upstream assigns them; we never generate ids locally.
pub type PostId = i64;
pub type UserId = i64;
pub type TagId = i64;

// --- Enums ---

/// Media file extensions the upstream serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extension {
    Jpg,
    Png,
    Gif,
    Swf,
    Webm,
}

impl Extension {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "jpg" => Some(Extension::Jpg),
            "png" => Some(Extension::Png),
            "gif" => Some(Extension::Gif),
            "swf" => Some(Extension::Swf),
            "webm" => Some(Extension::Webm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Extension::Jpg => "jpg",
            Extension::Png => "png",
            Extension::Gif => "gif",
            Extension::Swf => "swf",
            Extension::Webm => "webm",
        }
    }
}

impl std::fmt::Display for Extension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Content rating. The wire format uses the single-letter codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Safe,
    Questionable,
    Explicit,
}

impl Rating {
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "s" => Some(Rating::Safe),
            "q" => Some(Rating::Questionable),
            "e" => Some(Rating::Explicit),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "safe" => Some(Rating::Safe),
            "questionable" => Some(Rating::Questionable),
            "explicit" => Some(Rating::Explicit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Safe => "safe",
            Rating::Questionable => "questionable",
            Rating::Explicit => "explicit",
        }
    }
}

impl std::fmt::Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User trust level, from the upstream's integer codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Anonymous,
    Member,
    Privileged,
    FormerStaff,
    Janitor,
    Moderator,
    Admin,
}

impl TrustLevel {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TrustLevel::Anonymous),
            20 => Some(TrustLevel::Member),
            30 => Some(TrustLevel::Privileged),
            34 => Some(TrustLevel::FormerStaff),
            35 => Some(TrustLevel::Janitor),
            40 => Some(TrustLevel::Moderator),
            50 => Some(TrustLevel::Admin),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "anonymous" => Some(TrustLevel::Anonymous),
            "member" => Some(TrustLevel::Member),
            "privileged" => Some(TrustLevel::Privileged),
            "former_staff" => Some(TrustLevel::FormerStaff),
            "janitor" => Some(TrustLevel::Janitor),
            "moderator" => Some(TrustLevel::Moderator),
            "admin" => Some(TrustLevel::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::Anonymous => "anonymous",
            TrustLevel::Member => "member",
            TrustLevel::Privileged => "privileged",
            TrustLevel::FormerStaff => "former_staff",
            TrustLevel::Janitor => "janitor",
            TrustLevel::Moderator => "moderator",
            TrustLevel::Admin => "admin",
        }
    }
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tag category, from the upstream's integer codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagCategory {
    General,
    Artist,
    Copyright,
    Character,
    Species,
    Invalid,
    Meta,
    Lore,
}

impl TagCategory {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TagCategory::General),
            1 => Some(TagCategory::Artist),
            3 => Some(TagCategory::Copyright),
            4 => Some(TagCategory::Character),
            5 => Some(TagCategory::Species),
            6 => Some(TagCategory::Invalid),
            7 => Some(TagCategory::Meta),
            8 => Some(TagCategory::Lore),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "general" => Some(TagCategory::General),
            "artist" => Some(TagCategory::Artist),
            "copyright" => Some(TagCategory::Copyright),
            "character" => Some(TagCategory::Character),
            "species" => Some(TagCategory::Species),
            "invalid" => Some(TagCategory::Invalid),
            "meta" => Some(TagCategory::Meta),
            "lore" => Some(TagCategory::Lore),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TagCategory::General => "general",
            TagCategory::Artist => "artist",
            TagCategory::Copyright => "copyright",
            TagCategory::Character => "character",
            TagCategory::Species => "species",
            TagCategory::Invalid => "invalid",
            TagCategory::Meta => "meta",
            TagCategory::Lore => "lore",
        }
    }
}

impl std::fmt::Display for TagCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// --- Records ---

/// A mirrored post. Scalar fields land first; `uploader_id` and `approver_id`
/// stay `None` until relation resolution links them within the same unit of
/// work. A committed post always has an uploader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: PostId,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub width: i32,
    pub height: i32,
    pub extension: Extension,
    pub size: i64,
    pub md5: String,
    pub score_up: i32,
    pub score_down: i32,
    pub score_total: i32,
    pub rating: Rating,
    pub fav_count: i32,
    pub description: String,
    pub duration: Option<f64>,
    pub uploader_id: Option<UserId>,
    pub approver_id: Option<UserId>,
}

/// A mirrored user. `avatar_id` stays `None` until the avatar post is linked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub level: TrustLevel,
    pub is_banned: bool,
    pub avatar_id: Option<PostId>,
}

/// A mirrored tag. `text` is globally unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: TagId,
    pub text: String,
    pub category: TagCategory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_round_trips() {
        for ext in ["jpg", "png", "gif", "swf", "webm"] {
            assert_eq!(Extension::parse(ext).unwrap().as_str(), ext);
        }
        assert_eq!(Extension::parse("tiff"), None);
    }

    #[test]
    fn rating_codes_map_to_names() {
        assert_eq!(Rating::from_code("s"), Some(Rating::Safe));
        assert_eq!(Rating::from_code("q"), Some(Rating::Questionable));
        assert_eq!(Rating::from_code("e"), Some(Rating::Explicit));
        assert_eq!(Rating::from_code("x"), None);
        assert_eq!(Rating::parse(Rating::Explicit.as_str()), Some(Rating::Explicit));
    }

    #[test]
    fn trust_level_codes() {
        assert_eq!(TrustLevel::from_code(20), Some(TrustLevel::Member));
        assert_eq!(TrustLevel::from_code(50), Some(TrustLevel::Admin));
        assert_eq!(TrustLevel::from_code(99), None);
        assert_eq!(TrustLevel::parse("former_staff"), Some(TrustLevel::FormerStaff));
    }

    #[test]
    fn tag_category_codes_skip_two() {
        assert_eq!(TagCategory::from_code(0), Some(TagCategory::General));
        assert_eq!(TagCategory::from_code(2), None);
        assert_eq!(TagCategory::from_code(8), Some(TagCategory::Lore));
    }
}
