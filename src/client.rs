// The feed ports over the JSON API, so a `FeedController` can run against a
// remote pedalboard server.
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::feed::model::{
    Bucket, FeedQuery, ImageRef, LikeSummary, Post, PostId, PostPage, ViewerId,
};
use crate::feed::ports::{ImageStore, LikeStore, PostStore, StoreError, ViewerContext};

#[derive(Deserialize)]
struct SessionBody {
    viewer_id: ViewerId,
}

#[derive(Deserialize)]
struct UploadBody {
    image_ref: ImageRef,
}

pub struct HttpBackend {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
    viewer: Option<ViewerId>,
}

impl HttpBackend {
    /// Anonymous backend; likes and uploads will be refused.
    pub fn anonymous(base: &str) -> Result<Self, StoreError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base: parse_base(base)?,
            token: None,
            viewer: None,
        })
    }

    /// Connect with a session token and resolve the viewer it belongs to.
    pub async fn connect(base: &str, token: &str) -> Result<Self, StoreError> {
        let mut backend = Self {
            token: Some(token.to_string()),
            ..Self::anonymous(base)?
        };
        let session: SessionBody = backend
            .send_json(backend.request(Method::GET, &["api", "session"])?)
            .await?;
        tracing::info!("Connected to {} as {}", backend.base, session.viewer_id);
        backend.viewer = Some(session.viewer_id);
        Ok(backend)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Backend(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, StoreError> {
        let builder = self.http.request(method, self.endpoint(segments)?);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    fn require_viewer(&self, user_id: &ViewerId) -> Result<(), StoreError> {
        match &self.viewer {
            Some(v) if v == user_id => Ok(()),
            Some(_) => Err(StoreError::Forbidden),
            None => Err(StoreError::Unauthorized),
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, StoreError> {
        let response = builder
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        check_status(response).await
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, StoreError> {
        self.send(builder)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Backend(format!("malformed response: {}", e)))
    }

    async fn like_summary(
        &self,
        post_id: &PostId,
        user_id: Option<&ViewerId>,
    ) -> Result<LikeSummary, StoreError> {
        let mut builder = self.request(Method::GET, &["api", "posts", post_id.as_str(), "likes"])?;
        if let Some(user) = user_id {
            builder = builder.query(&[("user_id", user.as_str())]);
        }
        self.send_json(builder).await
    }
}

fn parse_base(base: &str) -> Result<Url, StoreError> {
    Url::parse(base).map_err(|e| StoreError::Invalid(format!("bad base URL '{}': {}", base, e)))
}

async fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let path = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    tracing::debug!("{} {} -> {}", path, status, body);

    Err(match status {
        StatusCode::UNAUTHORIZED => StoreError::Unauthorized,
        StatusCode::FORBIDDEN => StoreError::Forbidden,
        StatusCode::NOT_FOUND => StoreError::NotFound(path),
        StatusCode::CONFLICT => StoreError::Duplicate,
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNPROCESSABLE_ENTITY => {
            StoreError::Invalid(body)
        }
        s if s.is_server_error() => StoreError::Unavailable(format!("{} from {}", s, path)),
        s => StoreError::Backend(format!("unexpected {} from {}", s, path)),
    })
}

impl ViewerContext for HttpBackend {
    fn current_viewer(&self) -> Option<ViewerId> {
        self.viewer.clone()
    }
}

#[async_trait]
impl PostStore for HttpBackend {
    async fn list_posts(
        &self,
        query: &FeedQuery,
        page_size: u32,
        _viewer: Option<&ViewerId>,
    ) -> Result<PostPage, StoreError> {
        let mut params = vec![
            ("page", query.page.to_string()),
            ("page_size", page_size.to_string()),
            ("sort", query.sort.as_str().to_string()),
        ];
        if let Some(user_type) = query.user_type {
            params.push(("user_type", user_type.as_str().to_string()));
        }
        if let Some(author) = &query.author {
            params.push(("author", author.to_string()));
        }

        let builder = self.request(Method::GET, &["api", "posts"])?.query(&params);
        self.send_json(builder).await
    }

    async fn get_post(
        &self,
        post_id: &PostId,
        _viewer: Option<&ViewerId>,
    ) -> Result<Option<Post>, StoreError> {
        let builder = self.request(Method::GET, &["api", "posts", post_id.as_str()])?;
        match self.send_json(builder).await {
            Ok(post) => Ok(Some(post)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_post(
        &self,
        author: &ViewerId,
        image: &ImageRef,
        description: &str,
    ) -> Result<Post, StoreError> {
        self.require_viewer(author)?;
        let builder = self
            .request(Method::POST, &["api", "posts"])?
            .json(&serde_json::json!({
                "image_ref": image,
                "description": description,
            }));
        self.send_json(builder).await
    }

    async fn delete_post(&self, post_id: &PostId, requester: &ViewerId) -> Result<(), StoreError> {
        self.require_viewer(requester)?;
        let builder = self.request(Method::DELETE, &["api", "posts", post_id.as_str()])?;
        self.send(builder).await.map(|_| ())
    }
}

#[async_trait]
impl LikeStore for HttpBackend {
    async fn create_like(&self, post_id: &PostId, user_id: &ViewerId) -> Result<(), StoreError> {
        self.require_viewer(user_id)?;
        let builder = self.request(Method::PUT, &["api", "posts", post_id.as_str(), "like"])?;
        self.send(builder).await.map(|_| ())
    }

    async fn delete_like(&self, post_id: &PostId, user_id: &ViewerId) -> Result<(), StoreError> {
        self.require_viewer(user_id)?;
        let builder = self.request(Method::DELETE, &["api", "posts", post_id.as_str(), "like"])?;
        self.send(builder).await.map(|_| ())
    }

    async fn count_likes(&self, post_id: &PostId) -> Result<u64, StoreError> {
        Ok(self.like_summary(post_id, None).await?.count)
    }

    async fn has_liked(&self, post_id: &PostId, user_id: &ViewerId) -> Result<bool, StoreError> {
        Ok(self.like_summary(post_id, Some(user_id)).await?.viewer_has_liked)
    }
}

#[async_trait]
impl ImageStore for HttpBackend {
    async fn put_image(
        &self,
        bucket: Bucket,
        owner: &ViewerId,
        file_name: &str,
        data: Bytes,
    ) -> Result<ImageRef, StoreError> {
        self.require_viewer(owner)?;
        let mime = mime_guess::from_path(file_name).first_or_octet_stream();
        let part = reqwest::multipart::Part::bytes(data.to_vec())
            .file_name(file_name.to_string())
            .mime_str(mime.as_ref())
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let builder = self
            .request(Method::POST, &["api", "images"])?
            .query(&[("bucket", bucket.as_str())])
            .multipart(form);
        let body: UploadBody = self.send_json(builder).await?;
        Ok(body.image_ref)
    }

    async fn remove_image(&self, image: &ImageRef) -> Result<(), StoreError> {
        let mut segments = vec!["media"];
        segments.extend(image.as_str().split('/'));
        let builder = self.request(Method::DELETE, &segments)?;
        self.send(builder).await.map(|_| ())
    }
}
