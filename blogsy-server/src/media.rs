use std::path::PathBuf;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use axum::{body::Bytes, extract::multipart::Field};
use blogsy_api::{Error as ApiError, MediaKind, MediaRef, Store, UserId, Uuid};

use crate::Error;

pub const MAX_FILES_PER_UPLOAD: usize = 10;
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// One file of an upload, with its type already checked
#[derive(Debug)]
pub struct Upload {
    pub name: Option<String>,
    pub mime: String,
    pub kind: MediaKind,
    pub data: Bytes,
}

impl Upload {
    pub fn new(name: Option<String>, mime: Option<String>, data: Bytes) -> Result<Upload, Error> {
        let mime = mime.unwrap_or_default();
        let kind = MediaKind::from_mime(&mime)
            .ok_or_else(|| ApiError::UnsupportedMediaType(mime.clone()))?;
        if let Some(name) = &name {
            blogsy_api::validate_string(name)?;
        }
        Ok(Upload {
            name,
            mime,
            kind,
            data,
        })
    }

    fn extension(&self) -> &'static str {
        let subtype = self.mime.split('/').nth(1).unwrap_or("");
        let subtype = subtype.split(';').next().unwrap_or("").trim();
        match subtype.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => "jpg",
            "png" => "png",
            "gif" => "gif",
            "webp" => "webp",
            "mp4" => "mp4",
            "quicktime" | "mov" => "mov",
            "avi" | "x-msvideo" => "avi",
            _ => "bin",
        }
    }
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn store(&self, upload: Upload) -> anyhow::Result<MediaRef>;

    /// Deleting a file that is already gone is not an error
    async fn delete(&self, public_id: &str) -> anyhow::Result<()>;
}

/// Keeps uploaded files in a local directory, served under `/uploads`
pub struct LocalMedia {
    dir: PathBuf,
}

impl LocalMedia {
    pub fn new(dir: PathBuf) -> LocalMedia {
        LocalMedia { dir }
    }
}

#[async_trait]
impl MediaStore for LocalMedia {
    async fn store(&self, upload: Upload) -> anyhow::Result<MediaRef> {
        let file = format!("{}.{}", Uuid::new_v4(), upload.extension());
        let path = self.dir.join(&file);
        tokio::fs::write(&path, &upload.data)
            .await
            .with_context(|| format!("writing uploaded file to {path:?}"))?;
        tracing::debug!(?path, size = upload.data.len(), "stored uploaded file");
        Ok(MediaRef {
            url: format!("/uploads/{file}"),
            public_id: file,
            file_type: upload.kind,
            name: upload.name,
        })
    }

    async fn delete(&self, public_id: &str) -> anyhow::Result<()> {
        let valid = !public_id.is_empty()
            && public_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
            && !public_id.starts_with('.');
        if !valid {
            return Err(anyhow!("refusing to delete media with id {public_id:?}"));
        }
        let path = self.dir.join(public_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("deleting media file {path:?}")),
        }
    }
}

/// Reads one uploaded file, giving up as soon as it grows past `limit` bytes
pub async fn read_file(field: &mut Field<'_>, limit: usize) -> Result<Bytes, Error> {
    let mut data = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| Error::invalid_input(format!("malformed upload: {e}")))?
    {
        if data.len() + chunk.len() > limit {
            return Err(ApiError::PayloadTooLarge(limit as u64).into());
        }
        data.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(data))
}

/// Swaps client-provided refs for the recorded uploads, which must all have been uploaded by `actor`
pub async fn claim(
    store: &dyn Store,
    actor: UserId,
    refs: Vec<MediaRef>,
) -> Result<Vec<MediaRef>, Error> {
    let mut res = Vec::<MediaRef>::with_capacity(refs.len());
    for m in refs {
        let found = store
            .find_media(&m.public_id)
            .await
            .with_context(|| format!("fetching upload {:?}", m.public_id))?;
        match found {
            Some((owner, stored)) if owner == actor => {
                if !res.iter().any(|r| r.public_id == stored.public_id) {
                    res.push(stored);
                }
            }
            _ => {
                return Err(Error::invalid_input(format!(
                    "unknown media {:?}",
                    m.public_id
                )))
            }
        }
    }
    Ok(res)
}

/// Deletes the files behind `refs` that `owner` uploaded and no post lists anymore, logging failures
pub async fn release(
    store: &dyn Store,
    media: &dyn MediaStore,
    owner: UserId,
    refs: &[MediaRef],
) {
    for m in refs {
        if let Err(err) = release_one(store, media, owner, m).await {
            tracing::warn!(?err, public_id = %m.public_id, "failed deleting media");
        }
    }
}

async fn release_one(
    store: &dyn Store,
    media: &dyn MediaStore,
    owner: UserId,
    m: &MediaRef,
) -> anyhow::Result<()> {
    match store.find_media(&m.public_id).await? {
        Some((uploader, _)) if uploader == owner => (),
        _ => {
            tracing::warn!(
                public_id = %m.public_id,
                ?owner,
                "not deleting media uploaded by someone else"
            );
            return Ok(());
        }
    }
    if store.is_media_referenced(&m.public_id).await? {
        return Ok(());
    }
    media.delete(&m.public_id).await?;
    store.delete_media(&m.public_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(len: usize) -> Upload {
        Upload::new(
            Some(String::from("cat.png")),
            Some(String::from("image/png")),
            Bytes::from(vec![0; len]),
        )
        .expect("building upload")
    }

    #[tokio::test]
    async fn stores_then_deletes_files() {
        let dir = tempfile::tempdir().expect("creating tempdir");
        let media = LocalMedia::new(dir.path().to_path_buf());
        let m = media.store(png(16)).await.expect("storing file");
        assert_eq!(m.file_type, MediaKind::Image);
        assert!(m.public_id.ends_with(".png"));
        assert_eq!(m.url, format!("/uploads/{}", m.public_id));
        let path = dir.path().join(&m.public_id);
        assert_eq!(tokio::fs::read(&path).await.expect("reading file").len(), 16);

        media.delete(&m.public_id).await.expect("deleting file");
        assert!(!path.exists());
        media
            .delete(&m.public_id)
            .await
            .expect("deleting a missing file");
    }

    #[tokio::test]
    async fn refuses_to_delete_outside_its_directory() {
        let dir = tempfile::tempdir().expect("creating tempdir");
        let media = LocalMedia::new(dir.path().join("uploads"));
        assert!(media.delete("../secret").await.is_err());
        assert!(media.delete("").await.is_err());
        assert!(media.delete(".hidden").await.is_err());
    }

    #[test]
    fn uploads_are_checked() {
        assert!(matches!(
            Upload::new(None, Some(String::from("text/plain")), Bytes::new()),
            Err(Error::Api(ApiError::UnsupportedMediaType(_)))
        ));
        assert!(matches!(
            Upload::new(None, None, Bytes::new()),
            Err(Error::Api(ApiError::UnsupportedMediaType(_)))
        ));
        assert_eq!(png(1).extension(), "png");
    }
}
