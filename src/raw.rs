use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upstream record as handed over by a reader.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    /// Flat named fields (TSV row, persisted table row).
    Row(RawRow),
    /// Nested guideline document from the PharmGKB API.
    Document(Box<GuidelineDocument>),
}

impl From<RawRow> for RawRecord {
    fn from(row: RawRow) -> Self {
        RawRecord::Row(row)
    }
}

impl From<GuidelineDocument> for RawRecord {
    fn from(document: GuidelineDocument) -> Self {
        RawRecord::Document(Box::new(document))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawRow {
    fields: BTreeMap<String, String>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Present and non-blank.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Missing values collapse to the empty string.
    pub fn text(&self, name: &str) -> String {
        self.get(name).unwrap_or_default().to_string()
    }

    pub fn merge(&mut self, other: &RawRow) {
        for (name, value) in &other.fields {
            self.fields
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidelineDocument {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub summary_markdown: Option<Markdown>,
    #[serde(default)]
    pub text_markdown: Option<Markdown>,
    #[serde(default)]
    pub related_genes: Option<Vec<RelatedGene>>,
    #[serde(default)]
    pub related_chemicals: Option<Vec<RelatedChemical>>,
    #[serde(default)]
    pub alternate_drug_available: Option<Value>,
    #[serde(default)]
    pub dosing_information: Option<Value>,
}

/// Free text that upstream sends either as a plain string or as a
/// sub-document carrying renderings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Markdown {
    Text(String),
    Rendered {
        #[serde(default)]
        html: Option<String>,
        #[serde(default)]
        markdown: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RelatedGene {
    #[serde(default)]
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RelatedChemical {
    #[serde(default)]
    pub name: Option<String>,
}
