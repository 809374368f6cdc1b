use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PostStatus {
    Draft,
    Published,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "Draft",
            PostStatus::Published => "Published",
        }
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Draft" => Ok(PostStatus::Draft),
            "Published" => Ok(PostStatus::Published),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

impl TryFrom<String> for PostStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub idempotency_key: String,
    pub title: String,
    pub content: String,
    #[sqlx(try_from = "String")]
    pub status: PostStatus,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PostImage {
    pub id: Uuid,
    pub post_id: Uuid,
    pub s3_key: String,
    pub created_at: OffsetDateTime,
}

const POST_COLUMNS: &str =
    "id, author_id, idempotency_key, title, content, status, created_at, updated_at";

pub async fn get_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<Post>> {
    let post = sqlx::query_as::<_, Post>(&format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1"))
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(post)
}

pub async fn list_published(db: &PgPool, limit: i64, offset: i64) -> anyhow::Result<Vec<Post>> {
    let rows = sqlx::query_as::<_, Post>(&format!(
        r#"
        SELECT {POST_COLUMNS}
        FROM posts
        WHERE status = 'Published'
        ORDER BY created_at DESC
        LIMIT $1 OFFSET $2
        "#
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn list_by_author(
    db: &PgPool,
    author_id: Uuid,
    limit: i64,
    offset: i64,
) -> anyhow::Result<Vec<Post>> {
    let rows = sqlx::query_as::<_, Post>(&format!(
        r#"
        SELECT {POST_COLUMNS}
        FROM posts
        WHERE author_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(author_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// Insert a new post. The unique index on `idempotency_key` makes the
/// duplicate check atomic; callers translate the violation to a conflict.
pub async fn insert(db: &PgPool, post: &Post) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO posts (id, author_id, idempotency_key, title, content, status,
                           created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(post.id)
    .bind(post.author_id)
    .bind(&post.idempotency_key)
    .bind(&post.title)
    .bind(&post.content)
    .bind(post.status.as_str())
    .bind(post.created_at)
    .bind(post.updated_at)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn update(db: &PgPool, post: &Post) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE posts
        SET title = $2, content = $3, status = $4, updated_at = $5
        WHERE id = $1
        "#,
    )
    .bind(post.id)
    .bind(&post.title)
    .bind(&post.content)
    .bind(post.status.as_str())
    .bind(post.updated_at)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn insert_image_tx(
    tx: &mut Transaction<'_, Postgres>,
    image: &PostImage,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO post_images (id, post_id, s3_key, created_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(image.id)
    .bind(image.post_id)
    .bind(&image.s3_key)
    .bind(image.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn list_images(db: &PgPool, post_id: Uuid) -> anyhow::Result<Vec<PostImage>> {
    let rows = sqlx::query_as::<_, PostImage>(
        r#"
        SELECT id, post_id, s3_key, created_at
        FROM post_images
        WHERE post_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(post_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn get_image(
    db: &PgPool,
    post_id: Uuid,
    image_id: Uuid,
) -> anyhow::Result<Option<PostImage>> {
    let row = sqlx::query_as::<_, PostImage>(
        r#"
        SELECT id, post_id, s3_key, created_at
        FROM post_images
        WHERE id = $1 AND post_id = $2
        "#,
    )
    .bind(image_id)
    .bind(post_id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

pub async fn delete_image(db: &PgPool, image_id: Uuid) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM post_images WHERE id = $1")
        .bind(image_id)
        .execute(db)
        .await?;
    Ok(())
}
