//! Cursor-based paging for Base fetches and Drive listings
//!
//! Nothing here walks pages on its own: a call returns one [`Page`] and the
//! caller passes [`Page::last`] into the next call until it is `None`.
//!
//! ```no_run
//! # use deta::{Deta, FetchInput, Item};
//! # #[tokio::main]
//! # async fn main() -> Result<(), deta::Error> {
//! # let base = Deta::new("project_key")?.base("users")?;
//! let mut input = FetchInput::new().limit(100);
//! loop {
//!     let page = base.fetch::<Item>(&input).await?;
//!     for item in &page.items {
//!         println!("{:?}", item.get("key"));
//!     }
//!     match page.last() {
//!         Some(last) => input.last = Some(last.to_string()),
//!         None => break,
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};

/// Paging metadata returned with every page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    /// Number of entries in this page
    #[serde(default)]
    pub size: usize,
    /// Cursor for the next page; absent on the last page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
}

impl Paging {
    /// Cursor for the next page, treating an empty cursor as absent
    pub fn cursor(&self) -> Option<&str> {
        self.last.as_deref().filter(|last| !last.is_empty())
    }

    /// True when another page can be requested
    pub fn has_more(&self) -> bool {
        self.cursor().is_some()
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Entries of this page
    pub items: Vec<T>,
    /// Paging metadata
    pub paging: Paging,
}

impl<T> Page<T> {
    pub(crate) fn new(items: Vec<T>, paging: Paging) -> Self {
        Self { items, paging }
    }

    /// Cursor to pass into the next call, `None` on the last page
    pub fn last(&self) -> Option<&str> {
        self.paging.cursor()
    }

    /// True when no further page exists
    pub fn is_last_page(&self) -> bool {
        !self.paging.has_more()
    }

    /// Number of entries in this page
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when the page holds no entries
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Entries of this page
    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

impl<T> IntoIterator for Page<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
