use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PgxError;

/// Publishing bodies whose guidelines are kept in the knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuidelineSource {
    #[serde(rename = "CPIC")]
    Cpic,
    #[serde(rename = "DPWG")]
    Dpwg,
    #[serde(rename = "RNPGx")]
    Rnpgx,
}

impl GuidelineSource {
    pub fn all() -> Vec<GuidelineSource> {
        vec![
            GuidelineSource::Cpic,
            GuidelineSource::Dpwg,
            GuidelineSource::Rnpgx,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GuidelineSource::Cpic => "CPIC",
            GuidelineSource::Dpwg => "DPWG",
            GuidelineSource::Rnpgx => "RNPGx",
        }
    }
}

impl fmt::Display for GuidelineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GuidelineSource {
    type Err = PgxError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CPIC" => Ok(GuidelineSource::Cpic),
            "DPWG" => Ok(GuidelineSource::Dpwg),
            "RNPGX" => Ok(GuidelineSource::Rnpgx),
            _ => Err(PgxError::InvalidSource(value.to_string())),
        }
    }
}

/// The three canonical tables, in load order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Table {
    ClinicalAnnotations,
    Guidelines,
    Rules,
}

impl Table {
    pub const LOAD_ORDER: [Table; 3] = [Table::ClinicalAnnotations, Table::Guidelines, Table::Rules];

    pub fn name(&self) -> &'static str {
        match self {
            Table::ClinicalAnnotations => "ClinAnn",
            Table::Guidelines => "GuidelineMerge",
            Table::Rules => "GuidelineRule",
        }
    }

    pub fn review_file_name(&self) -> String {
        format!("{}_Review.csv", self.name())
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One (annotation, genotype) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClinicalAnnotationRecord {
    #[serde(rename = "CAID")]
    pub caid: String,
    pub gene: String,
    pub variant: String,
    pub allele1: String,
    pub allele2: String,
    pub annotation1: String,
    pub function1: String,
    pub function2: String,
    pub score1: String,
    pub score2: String,
    #[serde(rename = "CPICPhenotype")]
    pub cpic_phenotype: String,
    #[serde(rename = "PAnnoPhenotype")]
    pub panno_phenotype: String,
    pub drug: String,
    pub phenotypes: String,
    pub evidence_level: String,
    pub level_override: String,
    pub level_modifier: String,
    pub score: String,
    pub evidence_count: String,
    pub specialty: String,
    pub phenotype_category: String,
}

/// One upstream guideline. `id` is generation-local, `paid` is the stable
/// PharmGKB accession.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GuidelineRecord {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "PAID")]
    pub paid: String,
    pub source: GuidelineSource,
    pub title: String,
    pub summary: String,
    pub recommendation: String,
    pub gene: String,
    pub drug: String,
    pub phenotype: String,
    pub genotype: String,
    #[serde(with = "int_flag")]
    pub alternate: bool,
    #[serde(with = "int_flag")]
    pub dosing: bool,
}

/// One decision rule; `guideline_id` points at `GuidelineRecord::id` of the
/// generation it was written against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GuidelineRuleRecord {
    #[serde(rename = "ID")]
    pub id: i64,
    pub gene: String,
    pub variant: String,
    pub allele1: String,
    pub allele2: String,
    pub phenotype: String,
    #[serde(rename = "CAID")]
    pub caid: String,
    #[serde(rename = "GuidelineID")]
    pub guideline_id: i64,
}

/// Booleans travel as `0`/`1` in both the store and the review files.
mod int_flag {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.trim() {
            "1" | "true" | "True" => Ok(true),
            "0" | "false" | "False" | "" => Ok(false),
            other => Err(de::Error::custom(format!("invalid flag value: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_source_case_insensitive() {
        let source: GuidelineSource = "rnpgx".parse().unwrap();
        assert_eq!(source, GuidelineSource::Rnpgx);
        assert_eq!(source.to_string(), "RNPGx");
    }

    #[test]
    fn parse_source_rejects_unknown() {
        let err = "FDA".parse::<GuidelineSource>().unwrap_err();
        assert_matches!(err, PgxError::InvalidSource(_));
    }

    #[test]
    fn table_names() {
        assert_eq!(Table::ClinicalAnnotations.name(), "ClinAnn");
        assert_eq!(Table::Rules.review_file_name(), "GuidelineRule_Review.csv");
    }
}
