use scraper::{Html, Selector};
use serde_json::Value;

/// Pull the Next.js `buildId` out of a rendered page.
///
/// The `__NEXT_DATA__` script carries it as JSON; pages that inline the
/// payload elsewhere are scanned for the raw `"buildId":"..."` pair.
pub fn extract_build_id(html: &str) -> Option<String> {
    from_next_data(html).or_else(|| scan_raw(html))
}

fn from_next_data(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let Ok(sel) = Selector::parse("script#__NEXT_DATA__") else {
        return None;
    };
    let script = doc.select(&sel).next()?;
    let text = script.text().collect::<String>();
    let data: Value = serde_json::from_str(&text).ok()?;

    data.get("buildId")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn scan_raw(html: &str) -> Option<String> {
    const NEEDLE: &str = "\"buildId\":\"";
    let start = html.find(NEEDLE)? + NEEDLE.len();
    let rest = &html[start..];
    let id = &rest[..rest.find('"')?];
    if id.is_empty() { None } else { Some(id.to_string()) }
}
