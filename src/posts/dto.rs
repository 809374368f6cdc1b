use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::posts::repo::PostStatus;

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub idempotency_key: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePostRequest {
    pub title: String,
    pub content: String,
}

/// Status stays a plain string so unknown values get the contract message
/// instead of a deserialization error.
#[derive(Debug, Deserialize)]
pub struct PublishPostRequest {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct PostListItem {
    pub id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub status: PostStatus,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct PostDetails {
    pub id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
    pub status: PostStatus,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub images: Vec<ImageResponse>,
}

#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub id: Uuid,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}
