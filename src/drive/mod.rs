//! Deta Drive: named files uploaded in chunks and streamed back

pub mod upload;

pub use upload::{UploadSession, UploadState, UPLOAD_CHUNK_SIZE};

use std::collections::HashMap;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::Method;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::client::{read_body_to_bytes, HttpClient, RequestInput, RequestOutput};
use crate::error::{Error, Result};
use crate::paging::{Page, Paging};

/// Maximum number of names in one delete request
pub const MAX_DELETE_NAMES: usize = 1000;

/// Page size used by [`Drive::list`] when none is given
pub const DEFAULT_LIST_LIMIT: usize = 1000;

/// Streamed content of a downloaded file
#[derive(Debug)]
pub struct FileBody {
    body: Incoming,
    content_type: Option<String>,
}

impl FileBody {
    fn from_output(output: RequestOutput) -> Self {
        let content_type = output
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Self {
            body: output.body,
            content_type,
        }
    }

    /// Content type reported by Drive
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Next chunk of data, `None` at the end of the file
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        while let Some(frame) = self.body.frame().await {
            let frame = frame.map_err(|e| Error::Connection(format!("Failed to read body: {}", e)))?;
            if let Ok(data) = frame.into_data() {
                if !data.is_empty() {
                    return Ok(Some(data));
                }
            }
        }
        Ok(None)
    }

    /// Read the whole file into memory
    pub async fn bytes(self) -> Result<Bytes> {
        read_body_to_bytes(self.body).await
    }

    /// Stream the file into `writer`.
    ///
    /// # Returns
    /// Number of bytes written
    pub async fn copy_to<W>(&mut self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0u64;
        while let Some(data) = self.chunk().await? {
            writer.write_all(&data).await?;
            written += data.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }
}

/// Input of [`Drive::list`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListInput {
    /// Page size, [`DEFAULT_LIST_LIMIT`] when `None`
    pub limit: Option<usize>,
    /// Only list names starting with this prefix
    pub prefix: Option<String>,
    /// Cursor from the previous page
    pub last: Option<String>,
}

impl ListInput {
    /// List every file
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the page size
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = (limit > 0).then_some(limit);
        self
    }

    /// Only list names starting with `prefix`
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into()).filter(|prefix| !prefix.is_empty());
        self
    }

    /// Continue after the given cursor
    pub fn last(mut self, last: impl Into<String>) -> Self {
        self.last = Some(last.into()).filter(|last| !last.is_empty());
        self
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    paging: Paging,
    #[serde(default)]
    names: Vec<String>,
}

#[derive(Serialize)]
struct DeleteManyRequest<'a> {
    names: Vec<&'a str>,
}

/// Result of [`Drive::delete_many`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeleteManyOutput {
    /// Names deleted (including names that did not exist)
    #[serde(default)]
    pub deleted: Vec<String>,
    /// Names that could not be deleted, with the reason
    #[serde(default)]
    pub failed: HashMap<String, String>,
}

/// Handle to one Drive
///
/// # Example
/// ```rust,no_run
/// use deta::Deta;
///
/// #[tokio::main]
/// async fn main() -> Result<(), deta::Error> {
///     let drive = Deta::new("project_key")?.drive("photos")?;
///
///     let mut file = tokio::fs::File::open("a.jpg").await?;
///     drive.put("a.jpg", &mut file, Some("image/jpeg")).await?;
///
///     if let Some(body) = drive.get("a.jpg").await? {
///         let data = body.bytes().await?;
///         println!("{} bytes", data.len());
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Drive {
    client: HttpClient,
}

impl Drive {
    pub(crate) fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// Root endpoint of this Drive
    pub fn endpoint(&self) -> &str {
        self.client.root_endpoint()
    }

    /// Download a file.
    ///
    /// # Returns
    /// The streamed body, or None if the file doesn't exist
    pub async fn get(&self, name: &str) -> Result<Option<FileBody>> {
        check_name(name)?;
        let input = RequestInput::new(Method::GET, "/files/download").query("name", name);
        match self.client.request(input).await {
            Ok(output) => Ok(Some(FileBody::from_output(output))),
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Upload everything `body` yields as `name`, replacing any file with
    /// that name. The source is read to its end but not closed.
    ///
    /// # Errors
    /// [`Error::EmptyData`] if `body` yields nothing; otherwise the first
    /// failure, after the upload session was aborted
    pub async fn put<R>(&self, name: &str, body: &mut R, content_type: Option<&str>) -> Result<String>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        check_name(name)?;
        upload::upload_stream(&self.client, name, body, content_type, UPLOAD_CHUNK_SIZE).await
    }

    /// Upload an in-memory buffer as `name`
    pub async fn put_bytes(
        &self,
        name: &str,
        data: impl AsRef<[u8]>,
        content_type: Option<&str>,
    ) -> Result<String> {
        let mut reader = data.as_ref();
        self.put(name, &mut reader, content_type).await
    }

    /// Start a multipart upload driven by the caller
    pub async fn start_upload(&self, name: &str, content_type: Option<&str>) -> Result<UploadSession> {
        check_name(name)?;
        UploadSession::start(self.client.clone(), name, content_type).await
    }

    /// List one page of file names
    pub async fn list(&self, input: &ListInput) -> Result<Page<String>> {
        let mut request = RequestInput::new(Method::GET, "/files")
            .query("limit", input.limit.unwrap_or(DEFAULT_LIST_LIMIT).to_string());
        if let Some(prefix) = &input.prefix {
            request = request.query("prefix", prefix.as_str());
        }
        if let Some(last) = &input.last {
            request = request.query("last", last.as_str());
        }

        let response: ListResponse = self.client.request(request).await?.json().await?;
        Ok(Page::new(response.names, response.paging))
    }

    /// Delete up to [`MAX_DELETE_NAMES`] files in one request
    pub async fn delete_many<S: AsRef<str>>(&self, names: &[S]) -> Result<DeleteManyOutput> {
        if names.is_empty() {
            return Err(Error::EmptyNames);
        }
        if names.len() > MAX_DELETE_NAMES {
            return Err(Error::TooManyNames {
                count: names.len(),
                max: MAX_DELETE_NAMES,
            });
        }
        let names = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                check_name(name).map(|_| name)
            })
            .collect::<Result<Vec<&str>>>()?;

        let input = RequestInput::new(Method::DELETE, "/files").json(&DeleteManyRequest { names })?;
        let output: DeleteManyOutput = self.client.request(input).await?.json().await?;

        debug!(
            "Deleted {} file(s), {} failed",
            output.deleted.len(),
            output.failed.len()
        );
        Ok(output)
    }

    /// Delete one file. Deleting a missing file succeeds.
    ///
    /// # Returns
    /// The name of the file
    pub async fn delete(&self, name: &str) -> Result<String> {
        let mut output = self.delete_many(&[name]).await?;
        match output.failed.remove(name) {
            Some(reason) => Err(Error::DeleteFailed {
                name: name.to_string(),
                reason,
            }),
            None => Ok(name.to_string()),
        }
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::EmptyName);
    }
    Ok(())
}
