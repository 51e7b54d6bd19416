use serde::Deserialize;
use serde_json::Value;

/// A harvested review. The payload is kept verbatim; only the identifier,
/// the labels and the sort timestamp are ever interpreted.
pub type ReviewRecord = Value;

/// Identifier of a review, read from the first present field in `id_fields`.
///
/// Numeric ids are normalized to their decimal string so `123` and `"123"`
/// dedup against each other. Empty strings and nulls count as missing.
pub fn review_id(record: &ReviewRecord, id_fields: &[String]) -> Option<String> {
    for field in id_fields {
        match record.get(field) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => continue,
        }
    }
    None
}

/// Whether the record carries `label` in its `labels` array.
pub fn has_label(record: &ReviewRecord, label: &str) -> bool {
    record
        .get("labels")
        .and_then(Value::as_array)
        .map(|labels| labels.iter().any(|l| l.as_str() == Some(label)))
        .unwrap_or(false)
}

/// Sort key for snapshot ordering. Missing or non-string timestamps sort as "".
pub fn sort_key<'a>(record: &'a ReviewRecord, field: &str) -> &'a str {
    record.get(field).and_then(Value::as_str).unwrap_or("")
}

/// Stable descending sort by timestamp; equal keys keep insertion order.
pub fn sort_newest_first(records: &mut [ReviewRecord], field: &str) {
    records.sort_by(|a, b| sort_key(b, field).cmp(sort_key(a, field)));
}

/// Body of an intercepted review-listing response (browser surface).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub contents: Vec<ReviewRecord>,
}

impl ListingPage {
    /// Parse a listing body. Anything that isn't a JSON object of the
    /// expected shape yields `None` and is ignored by the caller.
    pub fn parse(body: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(body).ok()?;
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value).ok()
    }
}

/// One page returned by the REST review endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestPage {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub prod_review_list: Vec<ReviewRecord>,
}

/// A response observed by the browser's network listener.
#[derive(Debug, Clone)]
pub struct InterceptedResponse {
    pub url: String,
    pub status: u16,
    pub body: String,
}
