use serde::{Deserialize, Deserializer, Serialize};

/// Rank assigned to an instrument the service never ranked.
pub const RANK_UNSET: i64 = -1;

/// One document as returned by the lookup endpoint.
///
/// `exchange` and `quoteType` are required: a document without them fails
/// deserialization and the whole response is treated as malformed. `symbol`
/// is optional at this level, and a non-string `symbol` reads as `None`, so
/// that a single bad document can be skipped at merge time without
/// discarding its siblings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupRecord {
    #[serde(default, deserialize_with = "deserialize_symbol")]
    pub symbol: Option<String>,
    #[serde(rename = "shortName", default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    pub exchange: String,
    #[serde(rename = "quoteType")]
    pub quote_type: String,
    #[serde(
        default,
        deserialize_with = "deserialize_rank",
        skip_serializing_if = "Option::is_none"
    )]
    pub rank: Option<i64>,
}

impl LookupRecord {
    pub fn new(symbol: &str, exchange: &str, quote_type: &str) -> Self {
        Self {
            symbol: Some(symbol.to_string()),
            short_name: None,
            exchange: exchange.to_string(),
            quote_type: quote_type.to_string(),
            rank: None,
        }
    }

    pub fn with_short_name(mut self, name: &str) -> Self {
        self.short_name = Some(name.to_string());
        self
    }

    pub fn with_rank(mut self, rank: i64) -> Self {
        self.rank = Some(rank);
        self
    }

    pub fn without_symbol(mut self) -> Self {
        self.symbol = None;
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSymbol {
    Text(String),
    #[allow(dead_code)]
    Other(serde::de::IgnoredAny),
}

fn deserialize_symbol<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<RawSymbol> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(RawSymbol::Text(s)) => Some(s),
        Some(RawSymbol::Other(_)) | None => None,
    })
}

/// `rank` arrives either as a bare number or, with `formatted=true`, as
/// `{"raw": 42, "fmt": "42"}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawRank {
    Int(i64),
    Float(f64),
    Formatted { raw: f64 },
}

fn deserialize_rank<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<RawRank> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|r| match r {
        RawRank::Int(v) => Some(v),
        RawRank::Float(v) | RawRank::Formatted { raw: v } => {
            v.is_finite().then(|| v.round() as i64)
        }
    }))
}

/// Merged, normalized instrument as written to the output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub display_name: String,
    pub exchange: String,
    pub instrument_type: String,
    pub rank: i64,
}

impl Instrument {
    /// True when the display name is still the symbol fallback.
    pub fn has_fallback_name(&self) -> bool {
        self.display_name == self.symbol
    }
}
