//! Cursor-driven listings.

use crate::errors::{DataStoreError, DataStoreResult, map_http_status};
use crate::request::WireRequest;
use crate::response::{WireResponse, json_body};
use crate::transport::DataStoreTransport;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub const CURSOR_QUERY: &str = "exclusiveStartKey";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageState {
    HasMore,
    Exhausted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    Fetched,
    AlreadyFinished,
}

type ItemParser<T> = Arc<dyn Fn(&Value) -> DataStoreResult<T> + Send + Sync>;

/// Where a listing response keeps its items and cursor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageLayout {
    /// Envelope wrapping the listing, `data` for legacy responses.
    pub envelope: Option<&'static str>,
    pub items: &'static str,
    pub cursor: &'static str,
    /// Name of the ordered store listed; a 404 then means it is gone.
    pub ordered_store: Option<String>,
}

impl PageLayout {
    pub fn new(items: &'static str, cursor: &'static str) -> Self {
        Self {
            envelope: None,
            items,
            cursor,
            ordered_store: None,
        }
    }

    pub fn in_envelope(mut self, envelope: &'static str) -> Self {
        self.envelope = Some(envelope);
        self
    }

    pub fn for_ordered_store(mut self, name: impl Into<String>) -> Self {
        self.ordered_store = Some(name.into());
        self
    }
}

/// One page of a listing plus the cursor to the next. Advancing replaces the
/// page; a failed advance leaves page, cursor and state untouched.
pub struct Pages<T> {
    transport: Arc<dyn DataStoreTransport>,
    base: WireRequest,
    layout: PageLayout,
    parser: ItemParser<T>,
    items: Vec<T>,
    cursor: Option<String>,
    state: PageState,
}

impl<T> fmt::Debug for Pages<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pages")
            .field("url", &self.base.url)
            .field("items", &self.items)
            .field("cursor", &self.cursor)
            .field("state", &self.state)
            .finish()
    }
}

impl<T> Pages<T> {
    /// Builds the listing and fetches its first page.
    pub async fn open(
        transport: Arc<dyn DataStoreTransport>,
        base: WireRequest,
        layout: PageLayout,
        parser: impl Fn(&Value) -> DataStoreResult<T> + Send + Sync + 'static,
    ) -> DataStoreResult<Self> {
        let mut pages = Self {
            transport,
            base,
            layout,
            parser: Arc::new(parser),
            items: Vec::new(),
            cursor: None,
            state: PageState::HasMore,
        };
        pages.advance_to_next_page().await?;
        Ok(pages)
    }

    pub fn current_page(&self) -> &[T] {
        &self.items
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == PageState::Exhausted
    }

    pub async fn advance_to_next_page(&mut self) -> DataStoreResult<Advance> {
        if self.state == PageState::Exhausted {
            return Ok(Advance::AlreadyFinished);
        }

        let request = match self.cursor.as_deref() {
            Some(cursor) => self.base.with_query(CURSOR_QUERY, cursor)?,
            None => self.base.clone(),
        };
        tracing::debug!(url = %request.url, "fetching listing page");
        let response = self.transport.execute(request).await?;
        let (items, cursor) = self.parse_page(&response)?;

        self.items = items;
        self.state = if cursor.is_some() {
            PageState::HasMore
        } else {
            PageState::Exhausted
        };
        self.cursor = cursor;
        Ok(Advance::Fetched)
    }

    /// Drains the remaining pages, current one included.
    pub async fn collect_remaining(mut self) -> DataStoreResult<Vec<T>> {
        let mut all = std::mem::take(&mut self.items);
        while !self.is_finished() {
            self.advance_to_next_page().await?;
            all.append(&mut self.items);
        }
        Ok(all)
    }

    fn parse_page(&self, response: &WireResponse) -> DataStoreResult<(Vec<T>, Option<String>)> {
        if !response.is_success() {
            if let (404, Some(name)) = (response.status, self.layout.ordered_store.as_ref()) {
                return Err(DataStoreError::OrderedStoreMissing(name.clone()));
            }
            return Err(map_http_status(response.status, &response.text()));
        }

        let body = json_body(response)?;
        let listing = match self.layout.envelope {
            Some(envelope) => body.get(envelope).ok_or_else(|| {
                DataStoreError::MalformedResponse(format!("missing field '{envelope}'"))
            })?,
            None => &body,
        };
        let items = match listing.get(self.layout.items) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| (self.parser)(item))
                .collect::<DataStoreResult<Vec<T>>>()?,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(DataStoreError::MalformedResponse(format!(
                    "field '{}' is not an array",
                    self.layout.items
                )));
            }
        };
        let cursor = listing
            .get(self.layout.cursor)
            .and_then(Value::as_str)
            .filter(|cursor| !cursor.is_empty())
            .map(ToOwned::to_owned);
        Ok((items, cursor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::WireResponse;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use reqwest::Method;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Scripted {
        responses: Mutex<VecDeque<Result<WireResponse, TransportError>>>,
        seen: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<WireResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().expect("seen mutex should lock").clone()
        }
    }

    #[async_trait]
    impl DataStoreTransport for Scripted {
        async fn execute(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
            self.seen
                .lock()
                .expect("seen mutex should lock")
                .push(request.url);
            self.responses
                .lock()
                .expect("responses mutex should lock")
                .pop_front()
                .unwrap_or_else(|| Err(TransportError("no scripted response".to_string())))
        }
    }

    fn page(keys: &[&str], cursor: &str) -> Result<WireResponse, TransportError> {
        let keys: Vec<Value> = keys.iter().map(|key| json!({"key": key})).collect();
        Ok(WireResponse::json(
            200,
            &json!({"keys": keys, "lastReturnedKey": cursor}),
        ))
    }

    fn key_of(item: &Value) -> DataStoreResult<String> {
        crate::response::required_str(item, "key").map(ToOwned::to_owned)
    }

    fn base() -> WireRequest {
        WireRequest::new(Method::GET, "https://example.test/objects?datastore=s")
    }

    #[tokio::test(flavor = "current_thread")]
    async fn open_then_advance_expected_cursor_forwarded_and_exhausted() {
        let transport = Scripted::new(vec![page(&["a", "b"], "b"), page(&["c"], "")]);
        let mut pages = Pages::open(
            transport.clone(),
            base(),
            PageLayout::new("keys", "lastReturnedKey"),
            key_of,
        )
        .await
        .expect("first page should load");
        assert_eq!(pages.current_page(), ["a", "b"]);
        assert_eq!(pages.cursor(), Some("b"));
        assert!(!pages.is_finished());

        assert_eq!(
            pages.advance_to_next_page().await.expect("second page"),
            Advance::Fetched
        );
        assert_eq!(pages.current_page(), ["c"]);
        assert!(pages.is_finished());
        assert_eq!(
            transport.seen(),
            vec![
                "https://example.test/objects?datastore=s".to_string(),
                "https://example.test/objects?datastore=s&exclusiveStartKey=b".to_string(),
            ]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn advance_when_exhausted_expected_no_request_and_page_kept() {
        let transport = Scripted::new(vec![page(&["only"], "")]);
        let mut pages = Pages::open(
            transport.clone(),
            base(),
            PageLayout::new("keys", "lastReturnedKey"),
            key_of,
        )
        .await
        .expect("first page should load");

        for _ in 0..2 {
            assert_eq!(
                pages.advance_to_next_page().await.expect("no-op advance"),
                Advance::AlreadyFinished
            );
        }
        assert_eq!(pages.current_page(), ["only"]);
        assert_eq!(transport.seen().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn advance_failure_expected_previous_page_intact() {
        let transport = Scripted::new(vec![
            page(&["a"], "a"),
            Ok(WireResponse::new(200).with_body("not json")),
        ]);
        let mut pages = Pages::open(
            transport,
            base(),
            PageLayout::new("keys", "lastReturnedKey"),
            key_of,
        )
        .await
        .expect("first page should load");

        let error = pages
            .advance_to_next_page()
            .await
            .expect_err("garbage page should fail");
        assert_eq!(error.code(), 501);
        assert_eq!(pages.current_page(), ["a"]);
        assert_eq!(pages.cursor(), Some("a"));
        assert_eq!(pages.state(), PageState::HasMore);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn ordered_listing_not_found_expected_ordered_store_missing() {
        let transport = Scripted::new(vec![Ok(WireResponse::new(404))]);
        let error = Pages::open(
            transport,
            base(),
            PageLayout::new("entries", "lastEvaluatedKey").for_ordered_store("points"),
            key_of,
        )
        .await
        .expect_err("missing store should fail");
        assert_eq!(error, DataStoreError::OrderedStoreMissing("points".to_string()));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn legacy_envelope_expected_items_read_from_data() {
        let transport = Scripted::new(vec![Ok(WireResponse::json(
            200,
            &json!({"data": {"keys": [{"key": "x"}], "lastReturnedKey": null}}),
        ))]);
        let pages = Pages::open(
            transport,
            base(),
            PageLayout::new("keys", "lastReturnedKey").in_envelope("data"),
            key_of,
        )
        .await
        .expect("page should load");
        assert_eq!(
            pages.collect_remaining().await.expect("drain"),
            vec!["x".to_string()]
        );
    }
}
