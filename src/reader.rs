use std::collections::HashMap;

use serde_json::Value;

use crate::error::{PgxError, RecordError};
use crate::fs_util::extract_entry;
use crate::mapper::ANNOTATION_ID_FIELD;
use crate::raw::{GuidelineDocument, RawRecord, RawRow};

pub const ANNOTATIONS_ENTRY: &str = "clinical_annotations.tsv";
pub const ALLELES_ENTRY: &str = "clinical_ann_alleles.tsv";

/// Parsed records plus the ones that could not be parsed.
#[derive(Debug, Clone)]
pub struct ReadBatch<T> {
    pub records: Vec<T>,
    pub errors: Vec<RecordError>,
}

impl<T> Default for ReadBatch<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Tab-separated text with a header row. Cells are kept verbatim.
pub fn read_tsv(content: &[u8]) -> Result<ReadBatch<RawRow>, PgxError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(content);
    let headers = reader
        .headers()
        .map_err(|err| PgxError::Payload(err.to_string()))?
        .clone();

    let mut batch = ReadBatch::default();
    for (index, result) in reader.records().enumerate() {
        match result {
            Ok(record) => batch
                .records
                .push(headers.iter().zip(record.iter()).collect()),
            Err(err) => batch.errors.push(RecordError::Malformed {
                index,
                message: err.to_string(),
            }),
        }
    }
    Ok(batch)
}

/// Inner join of genotype rows onto their annotation on
/// `Clinical Annotation ID`, in genotype-file order. Fields of the genotype
/// row win on name clashes.
pub fn join_annotations(alleles: &[RawRow], annotations: &[RawRow]) -> Vec<RawRecord> {
    let mut by_id: HashMap<&str, Vec<&RawRow>> = HashMap::new();
    for annotation in annotations {
        if let Some(id) = annotation.get(ANNOTATION_ID_FIELD) {
            by_id.entry(id.trim()).or_default().push(annotation);
        }
    }

    let mut joined = Vec::new();
    for allele in alleles {
        let Some(matches) = allele
            .get(ANNOTATION_ID_FIELD)
            .and_then(|id| by_id.get(id.trim()))
        else {
            continue;
        };
        for annotation in matches {
            let mut row = allele.clone();
            row.merge(annotation);
            joined.push(RawRecord::Row(row));
        }
    }
    joined
}

/// Reads `clinicalAnnotations.zip` into one raw row per (annotation, genotype).
pub fn read_clinical_annotations(archive: &[u8]) -> Result<ReadBatch<RawRecord>, PgxError> {
    let annotations = read_tsv(&extract_entry(archive, ANNOTATIONS_ENTRY)?)?;
    let alleles = read_tsv(&extract_entry(archive, ALLELES_ENTRY)?)?;

    let mut errors = alleles.errors;
    errors.extend(annotations.errors);
    Ok(ReadBatch {
        records: join_annotations(&alleles.records, &annotations.records),
        errors,
    })
}

/// Accepts the API envelope `{"data": [...]}` or a bare array.
pub fn read_guideline_documents(content: &[u8]) -> Result<ReadBatch<RawRecord>, PgxError> {
    let value: Value =
        serde_json::from_slice(content).map_err(|err| PgxError::Payload(err.to_string()))?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("data") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(PgxError::Payload(
                    "guideline payload has no `data` array".to_string(),
                ));
            }
        },
        _ => {
            return Err(PgxError::Payload(
                "guideline payload is not a JSON array or object".to_string(),
            ));
        }
    };

    let mut batch = ReadBatch::default();
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<GuidelineDocument>(item) {
            Ok(document) => batch.records.push(document.into()),
            Err(err) => batch.errors.push(RecordError::Malformed {
                index,
                message: err.to_string(),
            }),
        }
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsv_keeps_empty_cells() {
        let content = b"Clinical Annotation ID\tGene\tScore\n1\t\t2.5\n2\tCYP2D6\t\n";
        let batch = read_tsv(content).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0].text("Gene"), "");
        assert_eq!(batch.records[1].text("Gene"), "CYP2D6");
        assert!(batch.errors.is_empty());
    }

    #[test]
    fn join_drops_unmatched_genotypes() {
        let annotations = vec![
            RawRow::new().with(ANNOTATION_ID_FIELD, "1").with("Gene", "CYP2C9"),
            RawRow::new().with(ANNOTATION_ID_FIELD, "2").with("Gene", "VKORC1"),
        ];
        let alleles = vec![
            RawRow::new().with(ANNOTATION_ID_FIELD, "2").with("Genotype/Allele", "AG"),
            RawRow::new().with(ANNOTATION_ID_FIELD, "3").with("Genotype/Allele", "AA"),
            RawRow::new().with(ANNOTATION_ID_FIELD, "1").with("Genotype/Allele", "CC"),
        ];
        let joined = join_annotations(&alleles, &annotations);
        let genes: Vec<_> = joined
            .iter()
            .map(|record| match record {
                RawRecord::Row(row) => row.text("Gene"),
                RawRecord::Document(_) => unreachable!(),
            })
            .collect();
        assert_eq!(genes, vec!["VKORC1", "CYP2C9"]);
    }

    #[test]
    fn guideline_envelope_and_bad_items() {
        let content = br#"{"data": [{"id": "PA1", "source": "CPIC"}, 42, {"id": "PA2"}]}"#;
        let batch = read_guideline_documents(content).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.errors.len(), 1);
    }

    #[test]
    fn guideline_payload_must_be_json() {
        assert!(matches!(
            read_guideline_documents(b"<html>"),
            Err(PgxError::Payload(_))
        ));
    }
}
