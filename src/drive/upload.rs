//! Chunked uploads
//!
//! A file is uploaded as sequentially numbered parts of at most
//! [`UPLOAD_CHUNK_SIZE`] bytes against a server-side session. Every session
//! ends in exactly one terminal state: finished, or aborted after a failure.

use std::fmt;

use bytes::Bytes;
use hyper::Method;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::client::{encode_segment, HttpClient, RequestInput};
use crate::error::{Error, Result};

/// Maximum size of one uploaded part (10 MiB)
pub const UPLOAD_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Lifecycle of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Accepting parts
    Open,
    /// Completed; the file is stored
    Finished,
    /// Abandoned; uploaded parts are discarded
    Aborted,
}

impl UploadState {
    /// True once the session finished or aborted
    pub fn is_terminal(self) -> bool {
        self != UploadState::Open
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadState::Open => "open",
            UploadState::Finished => "finished",
            UploadState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Deserialize)]
struct StartUploadResponse {
    upload_id: String,
}

/// One server-side multipart upload.
///
/// Parts are numbered from 1 in the order they are sent. Once the session
/// is finished or aborted every further call fails with
/// [`Error::UploadClosed`].
#[derive(Debug)]
pub struct UploadSession {
    client: HttpClient,
    name: String,
    upload_id: String,
    content_type: Option<String>,
    next_part: u32,
    state: UploadState,
}

impl UploadSession {
    pub(crate) async fn start(
        client: HttpClient,
        name: &str,
        content_type: Option<&str>,
    ) -> Result<Self> {
        let input = RequestInput::new(Method::POST, "/uploads").query("name", name);
        let response: StartUploadResponse = client.request(input).await?.json().await?;
        if response.upload_id.is_empty() {
            return Err(Error::UnexpectedResponse("empty upload id".to_string()));
        }

        debug!("Started upload {} for {}", response.upload_id, name);
        Ok(Self {
            client,
            name: name.to_string(),
            upload_id: response.upload_id,
            content_type: content_type.map(str::to_string),
            next_part: 1,
            state: UploadState::Open,
        })
    }

    /// File name being uploaded
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server-assigned session id
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Number the next part will get
    pub fn next_part(&self) -> u32 {
        self.next_part
    }

    /// Current state
    pub fn state(&self) -> UploadState {
        self.state
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::UploadClosed {
                name: self.name.clone(),
                state: self.state,
            });
        }
        Ok(())
    }

    fn session_path(&self) -> String {
        format!("/uploads/{}", encode_segment(&self.upload_id))
    }

    /// Upload `chunk` as the next part.
    ///
    /// A failed request aborts the session, so later parts can never leave
    /// a gap. The error of the part upload is returned even if the abort
    /// fails too.
    ///
    /// # Returns
    /// The number of the uploaded part
    pub async fn upload_part(&mut self, chunk: Bytes) -> Result<u32> {
        self.ensure_open()?;
        if chunk.len() > UPLOAD_CHUNK_SIZE {
            return Err(Error::InvalidRequest(format!(
                "part of {} bytes exceeds {} bytes",
                chunk.len(),
                UPLOAD_CHUNK_SIZE
            )));
        }

        let part = self.next_part;
        self.next_part += 1;

        let size = chunk.len();
        let input = RequestInput::new(Method::POST, format!("{}/parts", self.session_path()))
            .query("name", self.name.as_str())
            .query("part", part.to_string())
            .content_type(self.content_type.as_deref())
            .raw(chunk);
        if let Err(e) = self.client.request(input).await {
            return Err(self.abandon(e).await);
        }

        debug!("Uploaded part {} ({} bytes) of {}", part, size, self.name);
        Ok(part)
    }

    /// Complete the upload
    pub async fn finish(&mut self) -> Result<()> {
        self.ensure_open()?;
        let input = RequestInput::new(Method::PATCH, self.session_path())
            .query("name", self.name.as_str());
        self.client.request(input).await?;

        self.state = UploadState::Finished;
        debug!("Finished upload {} of {}", self.upload_id, self.name);
        Ok(())
    }

    /// Abort the upload, discarding uploaded parts.
    ///
    /// The session is aborted afterwards even if the request fails.
    pub async fn abort(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = UploadState::Aborted;
        let input = RequestInput::new(Method::DELETE, self.session_path())
            .query("name", self.name.as_str());
        self.client.request(input).await?;

        debug!("Aborted upload {} of {}", self.upload_id, self.name);
        Ok(())
    }

    /// Abort after `cause` and hand `cause` back. A failing abort is logged.
    pub(crate) async fn abandon(&mut self, cause: Error) -> Error {
        if self.state.is_terminal() {
            return cause;
        }
        if let Err(e) = self.abort().await {
            warn!(
                "Failed to abort upload {} of {} after error ({}): {}",
                self.upload_id, self.name, cause, e
            );
        }
        cause
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        if self.state == UploadState::Open {
            warn!(
                "Upload {} of {} dropped while open; the server keeps it until it expires",
                self.upload_id, self.name
            );
        }
    }
}

/// Read until `size` bytes are buffered or the source ends.
/// An empty chunk means the source is exhausted.
pub(crate) async fn read_chunk<R>(reader: &mut R, size: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(size.min(64 * 1024));
    (&mut *reader).take(size as u64).read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// Upload everything `body` yields as `name`.
///
/// An empty source fails with [`Error::EmptyData`] before any request.
/// Any failure after the session started aborts it and returns the error
/// that caused the abort.
pub(crate) async fn upload_stream<R>(
    client: &HttpClient,
    name: &str,
    body: &mut R,
    content_type: Option<&str>,
    chunk_size: usize,
) -> Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let chunk_size = chunk_size.clamp(1, UPLOAD_CHUNK_SIZE);

    let mut chunk = read_chunk(body, chunk_size).await?;
    if chunk.is_empty() {
        return Err(Error::EmptyData);
    }

    let mut session = UploadSession::start(client.clone(), name, content_type).await?;
    loop {
        let short = chunk.len() < chunk_size;
        if let Err(e) = session.upload_part(chunk).await {
            return Err(session.abandon(e).await);
        }
        if short {
            break;
        }

        chunk = match read_chunk(body, chunk_size).await {
            Ok(chunk) => chunk,
            Err(e) => return Err(session.abandon(e).await),
        };
        if chunk.is_empty() {
            break;
        }
    }

    if let Err(e) = session.finish().await {
        return Err(session.abandon(e).await);
    }
    Ok(name.to_string())
}
