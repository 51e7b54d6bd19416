//! Target list loading: a CSV with a platform column and an address column.

use std::path::Path;

use regex::{Regex, RegexBuilder};
use tracing::{debug, info};

use crate::core::error::{HarvestError, HarvestResult};

const PLATFORM_HEADERS: &[&str] = &["플랫폼", "platform"];
const ADDRESS_HEADERS: &[&str] = &["주소", "url", "address"];

/// One product to crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub product_id: Option<String>,
    pub url: String,
}

/// Which rows of the target file belong to a site.
#[derive(Debug, Clone)]
pub enum PlatformFilter {
    /// Cell must equal the name after trimming.
    Exact(String),
    /// Case-insensitive regex searched anywhere in the cell.
    Pattern(Regex),
}

impl PlatformFilter {
    pub fn pattern(pattern: &str) -> HarvestResult<Self> {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map(PlatformFilter::Pattern)
            .map_err(|e| HarvestError::Config(format!("invalid platform pattern {pattern:?}: {e}")))
    }

    pub fn matches(&self, cell: &str) -> bool {
        match self {
            PlatformFilter::Exact(name) => cell.trim() == name,
            PlatformFilter::Pattern(re) => re.is_match(cell),
        }
    }
}

fn find_column(headers: &csv::StringRecord, needles: &[&str]) -> Option<usize> {
    headers.iter().position(|h| {
        let h = h.to_lowercase();
        needles.iter().any(|n| h.contains(n))
    })
}

/// Read `path` and keep the rows matching `filter`, in file order.
///
/// `extract_id` derives the product id from each row's address; rows with an
/// empty address are dropped.
pub fn load_targets(
    path: &Path,
    filter: &PlatformFilter,
    extract_id: fn(&str) -> Option<String>,
) -> HarvestResult<Vec<Target>> {
    info!("📄 Reading targets from {}", path.display());
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers = rdr.headers()?.clone();
    let (Some(platform_col), Some(address_col)) = (
        find_column(&headers, PLATFORM_HEADERS),
        find_column(&headers, ADDRESS_HEADERS),
    ) else {
        return Err(HarvestError::Targets(format!(
            "{}: could not find platform/address columns in header {:?}",
            path.display(),
            headers.iter().collect::<Vec<_>>()
        )));
    };

    let mut targets = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let platform = record.get(platform_col).unwrap_or_default();
        if !filter.matches(platform) {
            continue;
        }
        let url = record.get(address_col).unwrap_or_default().trim();
        if url.is_empty() {
            debug!("skipping {} row without address", platform);
            continue;
        }
        targets.push(Target {
            product_id: extract_id(url),
            url: url.to_string(),
        });
    }

    Ok(targets)
}

/// `onlineProdSn` query parameter of an AP Mall product URL.
pub fn query_product_id(url: &str) -> Option<String> {
    query_param(url, "onlineProdSn")
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// Path segment after `/products/`, or `unknown` when the URL has none.
pub fn path_product_id(url: &str) -> Option<String> {
    let id = url
        .split_once("/products/")
        .map(|(_, rest)| {
            rest.split(['/', '?', '#'])
                .next()
                .unwrap_or_default()
                .to_string()
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = "\
번호,플랫폼,상품명,상품 주소
1,AP몰,크림,https://www.amoremall.com/kr/ko/product/detail?onlineProdSn=12345&x=1
2,네이버 스마트스토어,토너,https://smartstore.naver.com/shop/products/987654?NaPm=ct
3,AP몰 ,세럼,https://www.amoremall.com/kr/ko/product/detail?onlineProdSn=777
4,스마트스토어,로션,
5,쿠팡,선크림,https://www.coupang.com/vp/products/1
";

    fn write_sheet(contents: &str) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), contents).unwrap();
        file
    }

    #[test]
    fn exact_filter_selects_rest_rows() {
        let file = write_sheet(SHEET);
        let targets = load_targets(
            file.path(),
            &PlatformFilter::Exact("AP몰".to_string()),
            query_product_id,
        )
        .unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].product_id.as_deref(), Some("12345"));
        assert_eq!(targets[1].product_id.as_deref(), Some("777"));
    }

    #[test]
    fn pattern_filter_selects_storefront_rows() {
        let file = write_sheet(SHEET);
        let filter = PlatformFilter::pattern("네이버|스마트스토어").unwrap();
        let targets = load_targets(file.path(), &filter, path_product_id).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].product_id.as_deref(), Some("987654"));
    }

    #[test]
    fn missing_columns_is_an_error() {
        let file = write_sheet("name,link\na,b\n");
        let err = load_targets(
            file.path(),
            &PlatformFilter::Exact("AP몰".to_string()),
            query_product_id,
        )
        .unwrap_err();
        assert!(matches!(err, HarvestError::Targets(_)));
    }

    #[test]
    fn english_headers_are_recognized() {
        let file = write_sheet("Platform,URL\nAP몰,https://a.example/p?onlineProdSn=9\n");
        let targets = load_targets(
            file.path(),
            &PlatformFilter::Exact("AP몰".to_string()),
            query_product_id,
        )
        .unwrap();
        assert_eq!(targets[0].product_id.as_deref(), Some("9"));
    }

    #[test]
    fn product_id_extraction() {
        assert_eq!(query_product_id("https://a.example/p?x=1"), None);
        assert_eq!(query_product_id("not a url"), None);
        assert_eq!(
            path_product_id("https://brand.naver.com/s/products/5550001#REVIEW").as_deref(),
            Some("5550001")
        );
        assert_eq!(path_product_id("https://brand.naver.com/s").as_deref(), Some("unknown"));
    }
}
