// Image bytes on local disk, laid out as `<root>/<bucket>/<owner>/<file>`.
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::feed::model::{Bucket, ImageRef, ViewerId};
use crate::feed::ports::{ImageStore, StoreError};

pub struct DiskImageStore {
    root: PathBuf,
    max_bytes: usize,
}

impl DiskImageStore {
    pub fn new(root: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    fn path_for(&self, image: &ImageRef) -> PathBuf {
        // ImageRef segments are validated, so joining cannot escape the root.
        self.root.join(image.as_str())
    }

    pub async fn exists(&self, image: &ImageRef) -> bool {
        tokio::fs::metadata(self.path_for(image)).await.is_ok()
    }

    /// Read an image for serving, with its guessed content type.
    pub async fn read_image(&self, image: &ImageRef) -> Result<(Bytes, mime_guess::Mime), StoreError> {
        let path = self.path_for(image);
        let data = tokio::fs::read(&path).await.map_err(|e| io_error(e, image))?;
        let mime = mime_guess::from_path(&path).first_or_octet_stream();
        Ok((Bytes::from(data), mime))
    }
}

/// Extension of an uploaded file if it names an image type.
pub fn image_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    let mime = mime_guess::from_ext(&ext).first()?;
    (mime.type_() == mime_guess::mime::IMAGE).then_some(ext)
}

fn io_error(e: std::io::Error, image: &ImageRef) -> StoreError {
    match e.kind() {
        ErrorKind::NotFound => StoreError::NotFound(format!("image {}", image)),
        _ => StoreError::Backend(format!("image {}: {}", image, e)),
    }
}

#[async_trait]
impl ImageStore for DiskImageStore {
    async fn put_image(
        &self,
        bucket: Bucket,
        owner: &ViewerId,
        file_name: &str,
        data: Bytes,
    ) -> Result<ImageRef, StoreError> {
        let ext = image_extension(file_name)
            .ok_or_else(|| StoreError::Invalid(format!("'{}' is not an image", file_name)))?;
        if data.is_empty() {
            return Err(StoreError::Invalid("empty upload".into()));
        }
        if data.len() > self.max_bytes {
            return Err(StoreError::Invalid(format!(
                "image exceeds {} bytes",
                self.max_bytes
            )));
        }

        let stored_name = format!("{}.{}", uuid::Uuid::now_v7(), ext);
        let image = ImageRef::new(bucket, owner, &stored_name)
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        let path = self.path_for(&image);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(e, &image))?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| io_error(e, &image))?;

        tracing::info!("Stored image {} ({} bytes)", image, data.len());
        Ok(image)
    }

    async fn remove_image(&self, image: &ImageRef) -> Result<(), StoreError> {
        tokio::fs::remove_file(self.path_for(image))
            .await
            .map_err(|e| io_error(e, image))?;
        tracing::info!("Removed image {}", image);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (DiskImageStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (DiskImageStore::new(dir.path(), 1024), dir)
    }

    #[test]
    fn recognises_image_extensions() {
        assert_eq!(image_extension("board.JPG").as_deref(), Some("jpg"));
        assert_eq!(image_extension("me.png").as_deref(), Some("png"));
        assert_eq!(image_extension("notes.txt"), None);
        assert_eq!(image_extension("no_extension"), None);
    }

    #[tokio::test]
    async fn put_read_remove() {
        let (store, dir) = store();
        let alice = ViewerId::new("alice");

        let image = store
            .put_image(Bucket::Posts, &alice, "board.jpg", Bytes::from_static(b"jpeg"))
            .await
            .unwrap();
        assert_eq!(image.bucket(), Bucket::Posts);
        assert!(image.is_owned_by(&alice));
        assert!(image.as_str().ends_with(".jpg"));
        assert!(dir.path().join(image.as_str()).exists());

        let (data, mime) = store.read_image(&image).await.unwrap();
        assert_eq!(&data[..], b"jpeg");
        assert_eq!(mime.essence_str(), "image/jpeg");

        store.remove_image(&image).await.unwrap();
        assert!(!store.exists(&image).await);
    }

    #[tokio::test]
    async fn removing_a_missing_image_is_not_found() {
        let (store, _dir) = store();
        let image = ImageRef::parse("posts/alice/gone.jpg").unwrap();
        assert!(matches!(
            store.remove_image(&image).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejects_non_images_and_oversized_uploads() {
        let (store, _dir) = store();
        let alice = ViewerId::new("alice");

        assert!(matches!(
            store
                .put_image(Bucket::Posts, &alice, "script.sh", Bytes::from_static(b"#!"))
                .await,
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            store
                .put_image(Bucket::Posts, &alice, "big.png", Bytes::from(vec![0u8; 2048]))
                .await,
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            store
                .put_image(Bucket::Avatars, &alice, "empty.png", Bytes::new())
                .await,
            Err(StoreError::Invalid(_))
        ));
    }
}
