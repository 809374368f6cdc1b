use anyhow::Context;
use bytes::Bytes;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::{self, PostImage};
use crate::state::AppState;

pub const PRESIGN_TTL_SECS: u64 = 3600;

pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

/// Upload each item to the object store under the post's prefix and link the
/// rows in one transaction.
pub async fn upload_and_link(
    st: &AppState,
    post_id: Uuid,
    items: Vec<UploadItem>,
) -> anyhow::Result<Vec<PostImage>> {
    anyhow::ensure!(!items.is_empty(), "no images provided");

    let mut images = Vec::with_capacity(items.len());
    for item in items {
        let id = Uuid::new_v4();
        let ext = ext_from_mime(&item.content_type).unwrap_or("bin");
        let key = format!("posts/{}/{}.{}", post_id, id, ext);
        st.storage
            .put_object(&key, item.body, &item.content_type)
            .await
            .with_context(|| format!("put_object {}", key))?;
        images.push(PostImage {
            id,
            post_id,
            s3_key: key,
            created_at: OffsetDateTime::now_utc(),
        });
    }

    let mut tx = st.db.begin().await.context("begin tx")?;
    for image in &images {
        repo::insert_image_tx(&mut tx, image).await?;
    }
    tx.commit().await.context("commit tx")?;

    Ok(images)
}

pub async fn presign_many(
    st: &AppState,
    images: &[PostImage],
    expires_seconds: u64,
) -> anyhow::Result<Vec<String>> {
    let mut out = Vec::with_capacity(images.len());
    for image in images {
        out.push(st.storage.presign_get(&image.s3_key, expires_seconds).await?);
    }
    Ok(out)
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;

    #[test]
    fn ext_from_mime_covers_image_types() {
        assert_eq!(super::ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(super::ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(super::ext_from_mime("image/png"), Some("png"));
        assert_eq!(super::ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(super::ext_from_mime("image/gif"), Some("gif"));
        assert_eq!(super::ext_from_mime("application/octet-stream"), None);
    }

    #[tokio::test]
    async fn presign_passes_keys_through() {
        let state = AppState::fake();
        let post_id = Uuid::new_v4();
        let images = vec![
            PostImage {
                id: Uuid::new_v4(),
                post_id,
                s3_key: format!("posts/{}/a.jpg", post_id),
                created_at: OffsetDateTime::now_utc(),
            },
            PostImage {
                id: Uuid::new_v4(),
                post_id,
                s3_key: format!("posts/{}/b.png", post_id),
                created_at: OffsetDateTime::now_utc(),
            },
        ];

        let urls = presign_many(&state, &images, 1800).await.unwrap();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].contains("a.jpg"));
        assert!(urls[1].contains("b.png"));
    }
}
