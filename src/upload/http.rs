use async_trait::async_trait;
use futures_util::stream;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, Response};
use serde_json::json;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use url::Url;
use super::backend::{ByteProgress, UploadBackend};
use super::errors::{Result, UploadError};
use super::progress_stream::ProgressStream;
use super::types::{FileHandle, FileSource, RegisterRequest, RemoteRecord, WriteCredential};

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// [`UploadBackend`] speaking plain HTTP/JSON to the album API.
///
/// - `POST {endpoint}/albums/{id}/uploads` issues a write credential
/// - `PUT {transferTarget}` receives the raw bytes
/// - `POST {endpoint}/albums/{id}/photos` registers the metadata record
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(endpoint: &str) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            endpoint: Url::parse(endpoint)?,
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub(crate) fn album_url(&self, destination_id: &str, resource: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| UploadError::Config(format!("{} cannot be a base url", self.endpoint)))?
            .pop_if_empty()
            .extend(["albums", destination_id, resource]);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn body_for(file: &FileHandle, progress: ByteProgress) -> Result<Body> {
        let body = match &file.source {
            FileSource::Path(path) => {
                let file_stream = ReaderStream::with_capacity(File::open(path).await?, READ_CHUNK_SIZE);
                Body::wrap_stream(ProgressStream::new(file_stream, file.size, progress))
            }
            FileSource::Memory(data) => {
                let chunks = stream::iter([Ok::<_, std::io::Error>(data.clone())]);
                Body::wrap_stream(ProgressStream::new(chunks, file.size, progress))
            }
        };
        Ok(body)
    }
}

/// Turn a non-2xx response into an error message carrying the status and body.
async fn check_status(response: Response) -> std::result::Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(format!("status code {}, message: {}", status.as_u16(), body))
}

#[async_trait]
impl UploadBackend for HttpBackend {
    async fn acquire_write_credential(
        &self,
        destination_id: &str,
        filename: &str,
        mime_type: &str,
        file_size: u64,
    ) -> Result<WriteCredential> {
        let url = self.album_url(destination_id, "uploads")?;
        let response = self
            .authorize(self.client.post(url))
            .json(&json!({
                "filename": filename,
                "contentType": mime_type,
                "fileSize": file_size,
            }))
            .send()
            .await
            .map_err(|err| UploadError::credential(err.to_string()))?;

        let response = check_status(response).await.map_err(UploadError::Credential)?;
        response
            .json::<WriteCredential>()
            .await
            .map_err(|err| UploadError::credential(err.to_string()))
    }

    async fn transfer_bytes(
        &self,
        credential: &WriteCredential,
        file: &FileHandle,
        cancel: CancellationToken,
        progress: ByteProgress,
    ) -> Result<()> {
        let target = Url::parse(&credential.transfer_target)
            .map_err(|err| UploadError::transfer(format!("bad transfer target: {}", err)))?;
        let body = Self::body_for(file, progress)
            .await
            .map_err(|err| UploadError::transfer(err.to_string()))?;

        // The target is pre-signed, no authorization header
        let request = self.client
            .put(target)
            .header(CONTENT_TYPE, &file.mime_type)
            .header(CONTENT_LENGTH, file.size)
            .body(body)
            .send();

        let response = tokio::select! {
            response = request => response.map_err(|err| UploadError::transfer(err.to_string()))?,
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
        };

        check_status(response).await.map_err(UploadError::Transfer)?;
        Ok(())
    }

    async fn register_metadata(
        &self,
        destination_id: &str,
        request: &RegisterRequest,
    ) -> Result<RemoteRecord> {
        let url = self.album_url(destination_id, "photos")?;
        let response = self
            .authorize(self.client.post(url))
            .json(request)
            .send()
            .await
            .map_err(|err| UploadError::registration(err.to_string()))?;

        let response = check_status(response).await.map_err(UploadError::Registration)?;
        response
            .json::<RemoteRecord>()
            .await
            .map_err(|err| UploadError::registration(err.to_string()))
    }
}
