use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::extractors::AuthUser;
use crate::auth::store::Role;
use crate::error::ApiError;
use crate::posts::dto::{
    CreatePostRequest, ImageResponse, Pagination, PostDetails, PostListItem, PublishPostRequest,
    UpdatePostRequest,
};
use crate::posts::images::{self, UploadItem, PRESIGN_TTL_SECS};
use crate::posts::repo::{self, Post, PostStatus};
use crate::state::AppState;

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/posts", get(list_published))
        .route("/posts/mine", get(list_mine))
        .route("/posts/:id", get(get_post))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/posts", post(create_post))
        .route("/posts/:id", put(update_post))
        .route("/posts/:id/publish", post(publish_post))
        .route("/posts/:id/images", post(upload_images))
        .route("/posts/:id/images/:image_id", delete(delete_image))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

/// Load a post and require the caller to be its author.
async fn load_owned_post(
    state: &AppState,
    post_id: Uuid,
    user: &AuthUser,
) -> Result<Post, ApiError> {
    let post = repo::get_by_id(&state.db, post_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found."))?;
    if post.author_id != user.id {
        warn!(user_id = %user.id, post_id = %post_id, "post access denied");
        return Err(ApiError::forbidden("Access denied."));
    }
    Ok(post)
}

fn list_item(post: Post) -> PostListItem {
    PostListItem {
        id: post.id,
        author_id: post.author_id,
        title: post.title,
        status: post.status,
        created_at: post.created_at,
        updated_at: post.updated_at,
    }
}

async fn post_details(state: &AppState, post: Post) -> Result<PostDetails, ApiError> {
    let rows = repo::list_images(&state.db, post.id).await?;
    let urls = images::presign_many(state, &rows, PRESIGN_TTL_SECS).await?;
    let images = rows
        .into_iter()
        .zip(urls)
        .map(|(row, url)| ImageResponse { id: row.id, url })
        .collect();
    Ok(PostDetails {
        id: post.id,
        author_id: post.author_id,
        title: post.title,
        content: post.content,
        status: post.status,
        created_at: post.created_at,
        updated_at: post.updated_at,
        images,
    })
}

#[instrument(skip(state, payload))]
pub async fn create_post(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreatePostRequest>,
) -> Result<(StatusCode, HeaderMap, Json<PostDetails>), ApiError> {
    if user.role != Role::Author {
        return Err(ApiError::forbidden("Access denied."));
    }

    if payload.idempotency_key.trim().is_empty()
        || payload.title.trim().is_empty()
        || payload.content.trim().is_empty()
    {
        return Err(ApiError::invalid_input("All fields are required."));
    }

    let now = OffsetDateTime::now_utc();
    let new_post = Post {
        id: Uuid::new_v4(),
        author_id: user.id,
        idempotency_key: payload.idempotency_key,
        title: payload.title,
        content: payload.content,
        status: PostStatus::Draft,
        created_at: now,
        updated_at: now,
    };

    match repo::insert(&state.db, &new_post).await {
        Ok(()) => {}
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            warn!(author_id = %user.id, "idempotency key reused");
            return Err(ApiError::conflict("IdempotencyKey has already been used."));
        }
        Err(e) => return Err(ApiError::Internal(e.into())),
    }

    info!(post_id = %new_post.id, author_id = %user.id, "post created");

    let mut headers = HeaderMap::new();
    if let Ok(location) = format!("/posts/{}", new_post.id).parse() {
        headers.insert(axum::http::header::LOCATION, location);
    }
    let details = post_details(&state, new_post).await?;
    Ok((StatusCode::CREATED, headers, Json(details)))
}

#[instrument(skip(state))]
pub async fn list_published(
    State(state): State<AppState>,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<PostListItem>>, ApiError> {
    let posts = repo::list_published(&state.db, p.limit, p.offset).await?;
    Ok(Json(posts.into_iter().map(list_item).collect()))
}

#[instrument(skip(state))]
pub async fn list_mine(
    State(state): State<AppState>,
    user: AuthUser,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<PostListItem>>, ApiError> {
    let posts = repo::list_by_author(&state.db, user.id, p.limit, p.offset).await?;
    Ok(Json(posts.into_iter().map(list_item).collect()))
}

#[instrument(skip(state))]
pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PostDetails>, ApiError> {
    let post = repo::get_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found."))?;
    Ok(Json(post_details(&state, post).await?))
}

#[instrument(skip(state, payload))]
pub async fn update_post(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePostRequest>,
) -> Result<Json<PostDetails>, ApiError> {
    let mut post = load_owned_post(&state, id, &user).await?;
    post.title = payload.title;
    post.content = payload.content;
    post.updated_at = OffsetDateTime::now_utc();
    repo::update(&state.db, &post).await?;
    Ok(Json(post_details(&state, post).await?))
}

#[instrument(skip(state, payload))]
pub async fn publish_post(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<PublishPostRequest>,
) -> Result<Json<PostDetails>, ApiError> {
    let status: PostStatus = payload
        .status
        .parse()
        .map_err(|_| ApiError::invalid_input("Invalid status."))?;

    let mut post = load_owned_post(&state, id, &user).await?;
    post.status = status;
    post.updated_at = OffsetDateTime::now_utc();
    repo::update(&state.db, &post).await?;

    info!(post_id = %post.id, status = status.as_str(), "post status changed");
    Ok(Json(post_details(&state, post).await?))
}

#[instrument(skip(state, mp))]
pub async fn upload_images(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    mut mp: Multipart,
) -> Result<(StatusCode, Json<Vec<ImageResponse>>), ApiError> {
    let post = load_owned_post(&state, id, &user).await?;

    let mut items: Vec<UploadItem> = Vec::new();
    while let Ok(Some(field)) = mp.next_field().await {
        let name = field.name().map(|s| s.to_string());
        if name.as_deref() == Some("files") || name.as_deref() == Some("files[]") {
            let content_type = field
                .content_type()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "application/octet-stream".into());
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::invalid_input(e.to_string()))?;
            if data.is_empty() {
                continue;
            }
            items.push(UploadItem {
                body: data,
                content_type,
            });
        }
    }
    if items.is_empty() {
        return Err(ApiError::invalid_input("files[] is required."));
    }

    let uploaded = images::upload_and_link(&state, post.id, items).await?;
    let urls = images::presign_many(&state, &uploaded, PRESIGN_TTL_SECS).await?;
    let body = uploaded
        .into_iter()
        .zip(urls)
        .map(|(row, url)| ImageResponse { id: row.id, url })
        .collect();

    info!(post_id = %post.id, "images uploaded");
    Ok((StatusCode::CREATED, Json(body)))
}

#[instrument(skip(state))]
pub async fn delete_image(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, image_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let post = load_owned_post(&state, id, &user).await?;

    let image = repo::get_image(&state.db, post.id, image_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Image not found."))?;

    state.storage.delete_object(&image.s3_key).await?;
    repo::delete_image(&state.db, image.id).await?;

    info!(post_id = %post.id, image_id = %image.id, "image deleted");
    Ok(StatusCode::NO_CONTENT)
}
