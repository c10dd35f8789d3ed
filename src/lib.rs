//! An async client for Deta Base and Deta Drive
//!
//! Base is a key-value store of JSON items with partial updates and filter
//! queries. Drive stores named files, uploaded in 10 MiB parts and streamed
//! back on download.
//!
//! # Features
//! - Items from any `Serialize` type, read back into any `Deserialize` type
//! - Typed query and update builders
//! - Cursor-based paging for fetches and listings
//! - Chunked uploads that always finish or abort their session
//! - One pooled HTTP/1.1 + HTTP/2 connection per project, TLS via rustls
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use deta::{Conditions, Deta, FetchInput, Item};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), deta::Error> {
//!     let deta = Deta::from_env()?;
//!     let base = deta.base("users")?;
//!
//!     base.put(&json!({"key": "jimmy", "age": 33})).await?;
//!
//!     let input = FetchInput::new().query(Conditions::new().gte("age", 30));
//!     let page = base.fetch::<Item>(&input).await?;
//!     println!("{} users over 30", page.len());
//!
//!     let drive = deta.drive("files")?;
//!     drive.put_bytes("hello.txt", "Hello, World!", Some("text/plain")).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs, rust_2018_idioms)]

pub mod base;
pub mod client;
pub mod config;
pub mod deta;
pub mod drive;
pub mod error;
pub mod paging;

pub use base::{
    Base, Conditions, Delta, FetchInput, Item, Operator, PutManyOutput, Query, Update, Updates,
};
pub use config::{Config, ProjectKey};
pub use deta::Deta;
pub use drive::{DeleteManyOutput, Drive, FileBody, ListInput, UploadSession, UploadState};
pub use error::{Error, Result};
pub use paging::{Page, Paging};
