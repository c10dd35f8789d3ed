//! Deta Base: keyed items with partial updates and filter queries

pub mod item;
pub mod query;
pub mod update;

pub use item::{key_of, lookup, to_item, to_items, Item};
pub use query::{Conditions, Operator, Query};
pub use update::{Delta, Update, UpdateDocument, Updates};

use hyper::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::client::{encode_segment, HttpClient, RequestInput};
use crate::error::{Error, Result};
use crate::paging::{Page, Paging};

/// Maximum number of items in one put request
pub const MAX_PUT_ITEMS: usize = 25;

#[derive(Serialize)]
struct PutRequest<'a> {
    items: &'a [Item],
}

#[derive(Serialize)]
struct InsertRequest<'a> {
    item: &'a Item,
}

#[derive(Debug, Default, Deserialize)]
struct ItemList {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    #[serde(default)]
    processed: ItemList,
    #[serde(default)]
    failed: ItemList,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    query: Vec<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    paging: Paging,
    #[serde(default)]
    items: Vec<Value>,
}

/// Result of [`Base::put_many`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PutManyOutput {
    /// Items stored, with their keys
    pub processed: Vec<Item>,
    /// Items the server rejected
    pub failed: Vec<Item>,
}

impl PutManyOutput {
    /// Keys of the stored items
    pub fn keys(&self) -> Vec<&str> {
        self.processed.iter().filter_map(key_of).collect()
    }
}

/// Input of [`Base::fetch`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchInput {
    /// Filter; empty matches every item
    pub query: Query,
    /// Maximum number of items in the page
    pub limit: Option<usize>,
    /// Cursor from the previous page
    pub last: Option<String>,
}

impl FetchInput {
    /// Fetch everything, server-side page size
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter
    pub fn query(mut self, query: impl Into<Query>) -> Self {
        self.query = query.into();
        self
    }

    /// Set the page size; zero means the server default
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = (limit > 0).then_some(limit);
        self
    }

    /// Continue after the given cursor
    pub fn last(mut self, last: impl Into<String>) -> Self {
        self.last = Some(last.into()).filter(|last| !last.is_empty());
        self
    }
}

/// Handle to one Base
///
/// Cheap to clone; all clones share the connection pool of the
/// [`Deta`](crate::Deta) instance that created them.
///
/// # Example
/// ```rust,no_run
/// use deta::{Deta, Updates, Update};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct User {
///     key: String,
///     username: String,
///     likes: Vec<String>,
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<(), deta::Error> {
///     let users = Deta::new("project_key")?.base("users")?;
///
///     let key = users
///         .put(&User {
///             key: "jimmy".into(),
///             username: "jimmy".into(),
///             likes: vec!["science".into()],
///         })
///         .await?;
///
///     let updates = Updates::new().with("likes", Update::append_one("rockets"));
///     users.update(&key, &updates).await?;
///
///     if let Some(user) = users.get::<User>(&key).await? {
///         println!("{} likes {:?}", user.username, user.likes);
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Base {
    client: HttpClient,
}

impl Base {
    pub(crate) fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// Root endpoint of this Base
    pub fn endpoint(&self) -> &str {
        self.client.root_endpoint()
    }

    /// Store an item, overwriting any item with the same key.
    ///
    /// Returns the item key, assigned by the server when the item has none.
    pub async fn put<T: Serialize + ?Sized>(&self, item: &T) -> Result<String> {
        let items = [to_item(item)?];
        let output = self.put_items(&items).await?;
        match output.processed.first() {
            Some(stored) => key_of(stored)
                .map(str::to_string)
                .ok_or_else(|| Error::UnexpectedResponse("stored item has no key".to_string())),
            None => Err(Error::ItemRejected(
                key_of(&items[0]).unwrap_or("item without key").to_string(),
            )),
        }
    }

    /// Store up to [`MAX_PUT_ITEMS`] items in one request
    pub async fn put_many<T: Serialize>(&self, items: &[T]) -> Result<PutManyOutput> {
        if items.is_empty() {
            return Err(Error::BadItem("no items to put".to_string()));
        }
        if items.len() > MAX_PUT_ITEMS {
            return Err(Error::TooManyItems {
                count: items.len(),
                max: MAX_PUT_ITEMS,
            });
        }
        let items = to_items(items)?;
        self.put_items(&items).await
    }

    async fn put_items(&self, items: &[Item]) -> Result<PutManyOutput> {
        let input = RequestInput::new(Method::PUT, "/items").json(&PutRequest { items })?;
        let response: PutResponse = self.client.request(input).await?.json().await?;

        debug!(
            "Put {} item(s): {} processed, {} failed",
            items.len(),
            response.processed.items.len(),
            response.failed.items.len()
        );
        Ok(PutManyOutput {
            processed: response.processed.items,
            failed: response.failed.items,
        })
    }

    /// Retrieve an item by key, decoded into `T`
    ///
    /// # Returns
    /// The item, or None if the key doesn't exist
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let input = RequestInput::new(Method::GET, item_path(key)?);
        match self.client.request(input).await {
            Ok(output) => Ok(Some(output.json().await?)),
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete an item. Deleting a missing key succeeds.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let input = RequestInput::new(Method::DELETE, item_path(key)?);
        self.client.request(input).await?;
        Ok(())
    }

    /// Store an item only if its key is not taken.
    ///
    /// # Errors
    /// [`Error::Conflict`] if an item with the same key exists
    pub async fn insert<T: Serialize + ?Sized>(&self, item: &T) -> Result<String> {
        let item = to_item(item)?;
        let input = RequestInput::new(Method::POST, "/items").json(&InsertRequest { item: &item })?;
        let stored: Item = self.client.request(input).await?.json().await?;
        key_of(&stored)
            .map(str::to_string)
            .ok_or_else(|| Error::UnexpectedResponse("inserted item has no key".to_string()))
    }

    /// Apply partial updates to the item at `key`.
    ///
    /// # Errors
    /// [`Error::NotFound`] if the key doesn't exist
    pub async fn update(&self, key: &str, updates: &Updates) -> Result<()> {
        let path = item_path(key)?;
        let document = updates.compile();
        let input = RequestInput::new(Method::PATCH, path).json(&document)?;
        self.client.request(input).await?;
        Ok(())
    }

    /// Fetch one page of items matching `input.query`, decoded into `T`.
    ///
    /// # Errors
    /// [`Error::BadQuery`] for malformed condition keys, before any request;
    /// [`Error::BadDestination`] if an item does not fit `T`
    pub async fn fetch<T: DeserializeOwned>(&self, input: &FetchInput) -> Result<Page<T>> {
        let request = QueryRequest {
            query: input.query.compile()?,
            limit: input.limit,
            last: input.last.as_deref(),
        };
        let response: QueryResponse = self
            .client
            .request(RequestInput::new(Method::POST, "/query").json(&request)?)
            .await?
            .json()
            .await?;

        let items = response
            .items
            .into_iter()
            .map(|item| {
                serde_json::from_value(item).map_err(|e| Error::BadDestination(e.to_string()))
            })
            .collect::<Result<Vec<T>>>()?;
        Ok(Page::new(items, response.paging))
    }
}

fn item_path(key: &str) -> Result<String> {
    if key.is_empty() {
        return Err(Error::EmptyKey);
    }
    Ok(format!("/items/{}", encode_segment(key)))
}
