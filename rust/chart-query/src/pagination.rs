//! Sequential cursor pagination over a [`RemoteSource`].

use crate::error::Result;
use crate::filter::RemoteFilter;
use crate::remote::RemoteSource;
use serde_json::Value;

/// Requests pages one after another, each with the previous page's cursor,
/// until the source reports no more pages.
///
/// Any page error aborts the loop and the rows gathered so far are dropped.
pub async fn collect_all_pages(
    source: &dyn RemoteSource,
    token: &str,
    database_id: &str,
    filter: Option<&RemoteFilter>,
    page_size: u32,
) -> Result<Vec<Value>> {
    let mut rows = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = source
            .fetch_page(token, database_id, filter, page_size, cursor.as_deref())
            .await?;
        rows.extend(page.rows);

        match (page.has_more, page.next_cursor) {
            (true, Some(next)) => cursor = Some(next),
            _ => break,
        }
    }

    Ok(rows)
}
