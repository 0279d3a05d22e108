//! Core domain types for the Larder catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unit recorded when an ingredient cell carries no unit.
pub const UNIT_AS_NEEDED: &str = "as needed";

/// Category assigned to rows that name none.
pub const DEFAULT_CATEGORY: &str = "Uncategorized";

/// Words that mark text as a leftover error message from an earlier,
/// failed enrichment run, wherever they appear.
const STALE_ERROR_WORDS: &[&str] = &[
    "quota",
    "403",
    "404",
    "malformed",
    "kesalahan",
    "bermasalah",
    "tidak tersedia",
];

/// Words that only mark an error message when the text opens with them.
const STALE_ERROR_PREFIXES: &[&str] = &["error", "failed", "gagal"];

/// Case-insensitive identity key for names.
///
/// Records and categories are reconciled on this key only.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Whether `text` looks like a stored error message instead of content.
///
/// Matching is on whole words, so "Es Teh Terror" is content while
/// "Error: quota exceeded" and "⚠️ Terjadi Kesalahan" are not.
pub fn is_stale_error(text: &str) -> bool {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let opens_with_error = words
        .first()
        .is_some_and(|first| STALE_ERROR_PREFIXES.contains(first));

    opens_with_error
        || STALE_ERROR_WORDS.iter().any(|marker| {
            let phrase: Vec<&str> = marker.split(' ').collect();
            words.windows(phrase.len()).any(|w| w == phrase.as_slice())
        })
}

// ---------------------------------------------------------------------------
// Ingredient
// ---------------------------------------------------------------------------

/// One ingredient line of a catalog record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    /// Always finite and `>= 0`; `0` means "unspecified".
    pub quantity: f64,
    pub unit: String,
}

impl Ingredient {
    /// Ingredient with no quantity and the "as needed" unit.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quantity: 0.0,
            unit: UNIT_AS_NEEDED.to_string(),
        }
    }
}

impl std::fmt::Display for Ingredient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.quantity > 0.0 {
            write!(f, "{} {} {}", self.quantity, self.unit, self.name)
        } else {
            write!(f, "{} ({})", self.name, self.unit)
        }
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Named grouping referenced by catalog records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// CatalogRecord
// ---------------------------------------------------------------------------

/// A reconciled catalog item as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: String,
    /// Non-empty; unique under case-insensitive comparison.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Canonicalized media link, empty when none was given.
    #[serde(default)]
    pub media_url: String,
    pub category_id: String,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serving_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CatalogRecord {
    /// Whether the narrative/procedural fields still need enrichment.
    ///
    /// True when there are no steps, or when the steps or description hold a
    /// leftover error message.
    pub fn needs_enrichment(&self) -> bool {
        self.steps.is_empty()
            || self.steps.iter().any(|s| is_stale_error(s))
            || self.description.as_deref().is_some_and(is_stale_error)
    }

    /// Copy the writable fields into a draft for the upsert path.
    pub fn to_draft(&self) -> RecordDraft {
        RecordDraft {
            name: self.name.clone(),
            description: self.description.clone(),
            media_url: self.media_url.clone(),
            category_id: self.category_id.clone(),
            ingredients: self.ingredients.clone(),
            tools: self.tools.clone(),
            steps: self.steps.clone(),
            serving_note: self.serving_note.clone(),
        }
    }
}

/// The writable part of a [`CatalogRecord`] (no id, no timestamp).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecordDraft {
    pub name: String,
    pub description: Option<String>,
    pub media_url: String,
    pub category_id: String,
    pub ingredients: Vec<Ingredient>,
    pub tools: Vec<String>,
    pub steps: Vec<String>,
    pub serving_note: Option<String>,
}

/// Listing row: a record joined with its category name.
#[derive(Debug, Clone)]
pub struct RecordSummary {
    pub id: String,
    pub name: String,
    pub category: Option<String>,
    pub needs_enrichment: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(steps: Vec<&str>, description: Option<&str>) -> CatalogRecord {
        CatalogRecord {
            id: "r1".into(),
            name: "Es Teh".into(),
            description: description.map(String::from),
            media_url: String::new(),
            category_id: "c1".into(),
            ingredients: vec![],
            tools: vec![],
            steps: steps.into_iter().map(String::from).collect(),
            serving_note: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn name_key_folds_case_and_trims() {
        assert_eq!(name_key("  Nasi Goreng "), name_key("nasi goreng"));
        assert_ne!(name_key("Nasi Goreng"), name_key("Nasi Goreng Spesial"));
    }

    #[test]
    fn needs_enrichment_when_steps_missing_or_stale() {
        assert!(record(vec![], None).needs_enrichment());
        assert!(record(vec!["Error 403: quota exceeded"], None).needs_enrichment());
        assert!(record(vec!["Brew tea."], Some("Failed to load description")).needs_enrichment());
        assert!(!record(vec!["Brew tea.", "Serve cold."], Some("Iced tea.")).needs_enrichment());
    }

    #[test]
    fn stale_error_messages_are_detected() {
        for text in [
            "Error 403: quota exceeded",
            "Failed to load description",
            "Gagal memuat resep",
            "Deskripsi tidak tersedia",
            "⚠️ Terjadi Kesalahan: koneksi",
            "⛔ STOP: API Key bermasalah.",
            "Model returned malformed JSON",
        ] {
            assert!(is_stale_error(text), "{text}");
        }
    }

    #[test]
    fn content_mentioning_error_words_is_kept() {
        for text in [
            "Es Teh Terror",
            "Add more flour if the dough failed to rise.",
            "Jika adonan gagal mengembang, tambahkan ragi.",
            "Teh manis dingin yang menyegarkan.",
            "Tersedia dalam dua ukuran.",
        ] {
            assert!(!is_stale_error(text), "{text}");
        }
        assert!(!record(vec!["Brew tea."], Some("Es Teh Terror")).needs_enrichment());
    }

    #[test]
    fn record_serialization() {
        let mut r = record(vec!["Boil water."], None);
        r.ingredients = vec![Ingredient::named("Tea leaves")];
        let json = serde_json::to_string(&r).expect("serialize");
        assert!(!json.contains("description"));
        let parsed: CatalogRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, r);
    }

    #[test]
    fn ingredient_display() {
        let i = Ingredient {
            name: "Telur".into(),
            quantity: 2.0,
            unit: "butir".into(),
        };
        assert_eq!(i.to_string(), "2 butir Telur");
        assert_eq!(Ingredient::named("Garam").to_string(), "Garam (as needed)");
    }
}
