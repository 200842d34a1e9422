use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::allele::split_genotype;
use crate::domain::{ClinicalAnnotationRecord, GuidelineRecord, GuidelineRuleRecord, GuidelineSource};
use crate::error::RecordError;
use crate::raw::{GuidelineDocument, Markdown, RawRecord, RawRow};

pub const ANNOTATION_ID_FIELD: &str = "Clinical Annotation ID";

/// Rows produced from one batch plus everything that was left behind.
#[derive(Debug, Clone)]
pub struct MappedBatch<T> {
    pub rows: Vec<T>,
    pub errors: Vec<RecordError>,
    /// Records dropped on purpose (guidelines from sources outside the allow-list).
    pub filtered: usize,
}

impl<T> Default for MappedBatch<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            errors: Vec::new(),
            filtered: 0,
        }
    }
}

/// Maps raw upstream records onto the canonical tables.
#[derive(Debug, Clone)]
pub struct SchemaMapper {
    sources: Vec<GuidelineSource>,
}

impl SchemaMapper {
    pub fn new(sources: Vec<GuidelineSource>) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &[GuidelineSource] {
        &self.sources
    }

    pub fn map_clinical_annotations(
        &self,
        records: &[RawRecord],
    ) -> MappedBatch<ClinicalAnnotationRecord> {
        let mut batch = MappedBatch::default();
        for (index, record) in records.iter().enumerate() {
            match map_clinical_annotation(index, record) {
                Ok(row) => batch.rows.push(row),
                Err(err) => batch.errors.push(err),
            }
        }
        batch
    }

    /// Internal ids are handed out only after filtering, 1-based and gap-free
    /// in acceptance order. The accession must be unique within a generation;
    /// repeats after the first are record errors.
    pub fn map_guidelines(&self, records: &[RawRecord]) -> MappedBatch<GuidelineRecord> {
        let mut batch = MappedBatch::default();
        let mut accepted = HashSet::new();
        for (index, record) in records.iter().enumerate() {
            match self.map_guideline(index, record) {
                Ok(Some(row)) => {
                    if accepted.insert(row.paid.clone()) {
                        batch.rows.push(row);
                    } else {
                        batch.errors.push(RecordError::Malformed {
                            index,
                            message: format!("duplicate guideline id {}", row.paid),
                        });
                    }
                }
                Ok(None) => batch.filtered += 1,
                Err(err) => batch.errors.push(err),
            }
        }
        for (position, row) in batch.rows.iter_mut().enumerate() {
            row.id = position as i64 + 1;
        }
        batch
    }

    pub fn map_rules(&self, records: &[RawRecord]) -> MappedBatch<GuidelineRuleRecord> {
        let mut batch = MappedBatch::default();
        for (index, record) in records.iter().enumerate() {
            match map_rule(index, record) {
                Ok(row) => batch.rows.push(row),
                Err(err) => batch.errors.push(err),
            }
        }
        batch
    }

    /// `Ok(None)` when the document's source is not in the allow-list. The
    /// returned row carries id 0 until the batch assigns one.
    pub fn map_guideline(
        &self,
        index: usize,
        record: &RawRecord,
    ) -> Result<Option<GuidelineRecord>, RecordError> {
        let document = match record {
            RawRecord::Document(document) => document,
            RawRecord::Row(_) => {
                return Err(RecordError::UnexpectedShape {
                    index,
                    expected: "guideline document",
                });
            }
        };

        let Some(source) = document
            .source
            .as_deref()
            .and_then(|value| value.parse::<GuidelineSource>().ok())
            .filter(|source| self.sources.contains(source))
        else {
            return Ok(None);
        };

        let paid = document
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RecordError::MissingField {
                index,
                field: "id".to_string(),
            })?;

        Ok(Some(guideline_row(paid, source, document)))
    }
}

pub fn map_clinical_annotation(
    index: usize,
    record: &RawRecord,
) -> Result<ClinicalAnnotationRecord, RecordError> {
    let row = expect_row(index, record)?;
    let caid = required(index, row, ANNOTATION_ID_FIELD)?;
    let alleles = split_genotype(row.get("Genotype/Allele"));

    Ok(ClinicalAnnotationRecord {
        caid,
        gene: row.text("Gene"),
        variant: row.text("Variant/Haplotypes"),
        allele1: alleles.allele1,
        allele2: alleles.allele2,
        annotation1: row.text("Annotation Text"),
        function1: row.text("Allele Function"),
        function2: String::new(),
        score1: row.text("Score"),
        score2: String::new(),
        cpic_phenotype: row.text("Phenotype Category"),
        panno_phenotype: row.text("Allele Function"),
        drug: row.text("Drug(s)"),
        phenotypes: row.text("Phenotype(s)"),
        evidence_level: row.text("Level of Evidence"),
        level_override: row.text("Level Override"),
        level_modifier: row.text("Level Modifiers"),
        score: row.text("Score"),
        evidence_count: row.text("Evidence Count"),
        specialty: row.text("Specialty Population"),
        phenotype_category: row.text("Phenotype Category"),
    })
}

/// Carries a persisted rule row over unchanged; reconciliation rewrites the
/// foreign key afterwards.
pub fn map_rule(index: usize, record: &RawRecord) -> Result<GuidelineRuleRecord, RecordError> {
    let row = expect_row(index, record)?;
    Ok(GuidelineRuleRecord {
        id: required_int(index, row, "ID")?,
        gene: row.text("Gene"),
        variant: row.text("Variant"),
        allele1: row.text("Allele1"),
        allele2: row.text("Allele2"),
        phenotype: row.text("Phenotype"),
        caid: row.text("CAID"),
        guideline_id: required_int(index, row, "GuidelineID")?,
    })
}

fn guideline_row(paid: &str, source: GuidelineSource, document: &GuidelineDocument) -> GuidelineRecord {
    let gene = join_names(
        document
            .related_genes
            .iter()
            .flatten()
            .filter_map(|gene| gene.symbol.as_deref()),
    );
    let drug = join_names(
        document
            .related_chemicals
            .iter()
            .flatten()
            .filter_map(|chemical| chemical.name.as_deref()),
    );

    GuidelineRecord {
        id: 0,
        paid: paid.to_string(),
        source,
        title: document
            .name
            .as_deref()
            .map(normalize_whitespace)
            .unwrap_or_default(),
        summary: document
            .summary_markdown
            .as_ref()
            .map(markdown_text)
            .unwrap_or_default(),
        recommendation: document
            .text_markdown
            .as_ref()
            .map(markdown_text)
            .unwrap_or_default(),
        gene,
        drug,
        phenotype: String::new(),
        genotype: String::new(),
        alternate: is_truthy(document.alternate_drug_available.as_ref()),
        dosing: is_truthy(document.dosing_information.as_ref()),
    }
}

/// Plain text of a markdown field: the HTML rendering with tags removed when
/// present, otherwise the raw text. Line breaks become single spaces; in the
/// HTML rendering every whitespace run does.
pub fn markdown_text(markdown: &Markdown) -> String {
    match markdown {
        Markdown::Text(text) => normalize_whitespace(text),
        Markdown::Rendered { html: Some(html), .. } => collapse_whitespace(&strip_html(html)),
        Markdown::Rendered {
            html: None,
            markdown: Some(text),
        } => normalize_whitespace(text),
        Markdown::Rendered {
            html: None,
            markdown: None,
        } => String::new(),
    }
}

/// Block-level tags separate text; inline tags vanish.
fn strip_html(html: &str) -> String {
    static BLOCK: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    let block = BLOCK.get_or_init(|| {
        Regex::new(r"(?i)</?(p|br|div|li|ul|ol|h[1-6]|table|tr|td|th|blockquote)\b[^>]*>").unwrap()
    });
    let tag = TAG.get_or_init(|| Regex::new(r"<[^>]*>").unwrap());
    let separated = block.replace_all(html, " ");
    tag.replace_all(&separated, "")
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Any whitespace run containing a line break becomes one space.
fn normalize_whitespace(text: &str) -> String {
    static BREAKS: OnceLock<Regex> = OnceLock::new();
    let breaks = BREAKS.get_or_init(|| Regex::new(r"\s*(\r\n|\r|\n)\s*").unwrap());
    breaks.replace_all(text, " ").trim().to_string()
}

fn collapse_whitespace(text: &str) -> String {
    static RUNS: OnceLock<Regex> = OnceLock::new();
    let runs = RUNS.get_or_init(|| Regex::new(r"\s+").unwrap());
    runs.replace_all(text, " ").trim().to_string()
}

fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>()
        .join(";")
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(fields)) => !fields.is_empty(),
    }
}

fn expect_row(index: usize, record: &RawRecord) -> Result<&RawRow, RecordError> {
    match record {
        RawRecord::Row(row) => Ok(row),
        RawRecord::Document(_) => Err(RecordError::UnexpectedShape {
            index,
            expected: "flat row",
        }),
    }
}

fn required(index: usize, row: &RawRow, field: &str) -> Result<String, RecordError> {
    row.get(field)
        .map(|value| value.trim().to_string())
        .ok_or_else(|| RecordError::MissingField {
            index,
            field: field.to_string(),
        })
}

fn required_int(index: usize, row: &RawRow, field: &str) -> Result<i64, RecordError> {
    let value = required(index, row, field)?;
    value.parse::<i64>().map_err(|_| RecordError::Malformed {
        index,
        message: format!("`{field}` is not an integer: {value}"),
    })
}
