pub mod error;
pub mod types;

pub use error::{BooruError, Result};
pub use types::{
    FilePayload, PostPayload, RelationshipsPayload, ScorePayload, TagGroupsPayload, TagPayload,
    UserPayload,
};

use reqwest::header::USER_AGENT;
use serde::de::DeserializeOwned;

use types::{PostEnvelope, PostListEnvelope};

pub struct BooruClient {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
}

impl BooruClient {
    /// `user_agent` must identify the operator; the upstream rejects anonymous
    /// clients.
    pub fn new(base_url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Fetch a single post by id.
    pub async fn get_post(&self, id: i64) -> Result<PostPayload> {
        let envelope: PostEnvelope = self.get_json(&format!("/posts/{id}.json"), &[]).await?;
        Ok(envelope.post)
    }

    /// Fetch a listing page of posts with id greater than `after_id`, filtered
    /// by tag expressions. Order is the upstream's choice; callers sort.
    pub async fn get_posts_after(
        &self,
        tags: &[&str],
        after_id: i64,
        limit: u32,
    ) -> Result<Vec<PostPayload>> {
        let envelope: PostListEnvelope = self
            .get_json(
                "/posts.json",
                &[
                    ("tags", tags.join(" ")),
                    ("page", format!("a{after_id}")),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(envelope.posts)
    }

    /// Fetch the newest posts, newest first.
    pub async fn get_latest(&self, limit: u32) -> Result<Vec<PostPayload>> {
        let envelope: PostListEnvelope = self
            .get_json("/posts.json", &[("limit", limit.to_string())])
            .await?;
        Ok(envelope.posts)
    }

    /// Fetch a single user by id.
    pub async fn get_user(&self, id: i64) -> Result<UserPayload> {
        self.get_json(&format!("/users/{id}.json"), &[]).await
    }

    /// Batch tag lookup by exact name. The upstream caps a batch at 50 names;
    /// callers are expected to chunk. Unknown names are simply absent from the
    /// result.
    pub async fn get_tags_by_name(&self, names: &[String]) -> Result<Vec<TagPayload>> {
        let value: serde_json::Value = self
            .get_json(
                "/tags.json",
                &[
                    ("search[name]", names.join(",")),
                    ("limit", names.len().to_string()),
                ],
            )
            .await?;
        tags_from_value(value)
    }

    /// Download the raw media file for a content hash. `Ok(None)` when the
    /// file is gone upstream.
    pub async fn get_media(&self, md5: &str, ext: &str) -> Result<Option<bytes::Bytes>> {
        let (prefix, infix) = match (md5.get(0..2), md5.get(2..4)) {
            (Some(p), Some(i)) => (p, i),
            _ => return Err(BooruError::Parse(format!("malformed md5: {md5}"))),
        };
        let url = format!("{}/data/{prefix}/{infix}/{md5}.{ext}", self.base_url);

        let resp = self
            .client
            .get(&url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BooruError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(Some(resp.bytes().await?))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BooruError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(resp.json().await?)
    }
}

/// The tag endpoint returns a bare array on hits but `{"tags": []}` when
/// nothing matched.
fn tags_from_value(value: serde_json::Value) -> Result<Vec<TagPayload>> {
    match value {
        serde_json::Value::Array(_) => Ok(serde_json::from_value(value)?),
        serde_json::Value::Object(mut map) => match map.remove("tags") {
            Some(tags) => Ok(serde_json::from_value(tags)?),
            None => Err(BooruError::Parse(
                "tag lookup returned an object without a tags field".to_string(),
            )),
        },
        other => Err(BooruError::Parse(format!(
            "unexpected tag lookup response: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_response_as_bare_array() {
        let value = serde_json::json!([
            {"id": 11, "name": "landscape", "category": 0},
            {"id": 12, "name": "someartist", "category": 1}
        ]);
        let tags = tags_from_value(value).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[1].name, "someartist");
    }

    #[test]
    fn empty_tag_response_is_wrapped_in_an_object() {
        let value = serde_json::json!({"tags": []});
        let tags = tags_from_value(value).unwrap();
        assert!(tags.is_empty());
    }

    #[test]
    fn unexpected_tag_response_is_a_parse_error() {
        let err = tags_from_value(serde_json::json!(42)).unwrap_err();
        assert!(matches!(err, BooruError::Parse(_)));
    }
}
