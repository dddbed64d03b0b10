use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// ── Comic document (`/_next/data/{build}/comic/{slug}.json`) ─────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ComicDocument {
    #[serde(rename = "pageProps")]
    pub page_props: ComicPageProps,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComicPageProps {
    pub comic: ComicRecord,
    /// One entry per language, as deduplicated by the upstream.
    #[serde(default, rename = "firstChapters", deserialize_with = "null_as_default")]
    pub first_chapters: Vec<ChapterRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComicRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub slug: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub last_chapter: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub md_covers: Vec<StorageKey>,
}

impl ComicRecord {
    /// Last chapter as a whole number; fractional and missing values truncate.
    pub fn last_chapter_number(&self) -> i64 {
        self.last_chapter.as_deref().map(leading_integer).unwrap_or(0)
    }
}

/// A `{ "b2key": "..." }` entry pointing into the image host.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StorageKey {
    pub b2key: String,
}

// ── Chapter document (`.../comic/{slug}/{hid}-{type}-{chap}-{lang}.json`) ────

#[derive(Debug, Clone, Deserialize)]
pub struct ChapterDocument {
    #[serde(rename = "pageProps")]
    pub page_props: ChapterPageProps,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChapterPageProps {
    /// Set to 308 when the unit requested as a chapter is really a volume.
    #[serde(default, rename = "__N_REDIRECT_STATUS")]
    pub redirect_status: Option<u16>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub chapters: Vec<ChapterRecord>,
    #[serde(default)]
    pub chapter: Option<ChapterDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChapterDetail {
    #[serde(default, deserialize_with = "null_as_default")]
    pub md_images: Vec<StorageKey>,
}

// ── Chapter record ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChapterRecord {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub hid: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub vol: Option<String>,
    #[serde(default = "default_chap", deserialize_with = "chap_or_default")]
    pub chap: String,
}

fn default_chap() -> String {
    "1".to_string()
}

// ── Output records ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Image {
    pub url: String,
}

/// Every projection of one comic document, in output shape.
#[derive(Debug, Clone, Serialize)]
pub struct ComicSummary {
    pub comicid: String,
    pub slug: String,
    pub title: String,
    pub country: Option<String>,
    pub last_chapter: i64,
    pub cover: Option<String>,
}

// ── Unit type ────────────────────────────────────────────────────────────────

/// Whether a chapter-detail route addresses a chapter or a whole volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnitType {
    #[default]
    Chapter,
    Volume,
}

impl UnitType {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitType::Chapter => "chapter",
            UnitType::Volume => "volume",
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chapter" => Ok(UnitType::Chapter),
            "volume" => Ok(UnitType::Volume),
            other => Err(format!("unknown unit type '{}' (expected chapter or volume)", other)),
        }
    }
}

// ── Chapter numbers ──────────────────────────────────────────────────────────

/// Compare chapter numbers numerically when both parse ("10" == "10.0"),
/// textually otherwise.
pub fn same_chapter_number(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}

/// Integer prefix of a numeric string: "10.5" → 10, "abc" → 0.
pub fn leading_integer(s: &str) -> i64 {
    let s = s.trim();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s[..end].parse().unwrap_or(0)
}

// ── Lenient field decoding ───────────────────────────────────────────────────

fn scalar_to_string(v: Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_or_number<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    scalar_to_string(Value::deserialize(d)?)
        .ok_or_else(|| serde::de::Error::custom("expected a string or a number"))
}

fn opt_string_or_number<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(d)?.and_then(scalar_to_string))
}

fn chap_or_default<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(opt_string_or_number(d)?.unwrap_or_else(default_chap))
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chapter_record_fills_absent_fields() {
        let rec: ChapterRecord = serde_json::from_value(json!({
            "id": 991, "hid": "xYz", "lang": "en", "chap": null
        }))
        .unwrap();

        assert_eq!(rec.id.as_deref(), Some("991"));
        assert_eq!(rec.hid.as_deref(), Some("xYz"));
        assert_eq!(rec.title, None);
        assert_eq!(rec.vol, None);
        assert_eq!(rec.chap, "1");

        let missing: ChapterRecord = serde_json::from_value(json!({})).unwrap();
        assert_eq!(missing.chap, "1");
    }

    #[test]
    fn comic_document_accepts_numeric_id_and_string_last_chapter() {
        let doc: ComicDocument = serde_json::from_value(json!({
            "pageProps": {
                "comic": {
                    "id": 42, "slug": "abc", "title": "T", "country": "kr",
                    "last_chapter": "10.5", "md_covers": [{"b2key": "cover.jpg"}]
                },
                "firstChapters": null
            }
        }))
        .unwrap();

        let comic = &doc.page_props.comic;
        assert_eq!(comic.id, "42");
        assert_eq!(comic.last_chapter_number(), 10);
        assert_eq!(comic.md_covers[0].b2key, "cover.jpg");
        assert!(doc.page_props.first_chapters.is_empty());
    }

    #[test]
    fn chapter_document_reads_redirect_marker() {
        let doc: ChapterDocument = serde_json::from_value(json!({
            "pageProps": { "__N_REDIRECT": "/comic/abc/x-volume-1-en", "__N_REDIRECT_STATUS": 308 }
        }))
        .unwrap();
        assert_eq!(doc.page_props.redirect_status, Some(308));
        assert!(doc.page_props.chapters.is_empty());
        assert!(doc.page_props.chapter.is_none());
    }

    #[test]
    fn test_same_chapter_number() {
        assert!(same_chapter_number("10", "10"));
        assert!(same_chapter_number("10", "10.0"));
        assert!(!same_chapter_number("10", "10.5"));
        assert!(same_chapter_number("extra", "extra"));
        assert!(!same_chapter_number("1", "one"));
    }

    #[test]
    fn test_leading_integer() {
        assert_eq!(leading_integer("10"), 10);
        assert_eq!(leading_integer("10.5"), 10);
        assert_eq!(leading_integer("-3"), -3);
        assert_eq!(leading_integer("abc"), 0);
        assert_eq!(leading_integer(""), 0);
    }

    #[test]
    fn unit_type_parses_case_insensitively() {
        assert_eq!("Volume".parse::<UnitType>(), Ok(UnitType::Volume));
        assert_eq!(UnitType::default().to_string(), "chapter");
        assert!("issue".parse::<UnitType>().is_err());
    }
}
