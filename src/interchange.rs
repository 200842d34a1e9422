//! Review files sitting between the normalize and load stages.
//!
//! One UTF-8 CSV per table with a header row; fields are quoted only when
//! they need to be and missing values are empty strings.

use camino::Utf8Path;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::PgxError;
use crate::fs_util::write_atomic;

pub fn to_csv<T: Serialize>(rows: &[T]) -> Result<Vec<u8>, PgxError> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(row)
            .map_err(|err| PgxError::Interchange(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| PgxError::Interchange(err.to_string()))
}

/// A header-only file is written for an empty table when `headers` is given,
/// since the csv writer derives headers from the first row.
pub fn write_table<T: Serialize>(
    path: &Utf8Path,
    rows: &[T],
    headers: &[&str],
) -> Result<(), PgxError> {
    let content = if rows.is_empty() {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(headers)
            .map_err(|err| PgxError::Interchange(err.to_string()))?;
        writer
            .into_inner()
            .map_err(|err| PgxError::Interchange(err.to_string()))?
    } else {
        to_csv(rows)?
    };
    write_atomic(path, &content)
}

pub fn from_csv<T: DeserializeOwned>(content: &[u8]) -> Result<Vec<T>, PgxError> {
    let mut reader = csv::ReaderBuilder::new().from_reader(content);
    reader
        .deserialize::<T>()
        .enumerate()
        .map(|(index, row)| {
            row.map_err(|err| PgxError::Interchange(format!("row {}: {err}", index + 1)))
        })
        .collect()
}

/// `Ok(None)` when the file does not exist: that table has nothing to load.
pub fn read_table<T: DeserializeOwned>(path: &Utf8Path) -> Result<Option<Vec<T>>, PgxError> {
    if !path.as_std_path().exists() {
        return Ok(None);
    }
    let content = std::fs::read(path.as_std_path())
        .map_err(|err| PgxError::Filesystem(format!("{path}: {err}")))?;
    from_csv(&content).map(Some).map_err(|err| match err {
        PgxError::Interchange(message) => PgxError::Interchange(format!("{path}: {message}")),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClinicalAnnotationRecord, GuidelineRecord, GuidelineSource};
    use crate::store::RULE_COLUMNS;

    #[test]
    fn empty_fields_stay_empty_strings() {
        let row = ClinicalAnnotationRecord {
            caid: "1447954390".to_string(),
            gene: "CYP2C19".to_string(),
            annotation1: "Patients with the AG genotype, may have \"reduced\", response".to_string(),
            ..ClinicalAnnotationRecord::default()
        };
        let content = to_csv(std::slice::from_ref(&row)).unwrap();
        let text = String::from_utf8(content.clone()).unwrap();
        assert!(text.starts_with("CAID,Gene,Variant,Allele1,Allele2,"));
        assert!(!text.contains("null"));
        assert!(text.contains("1447954390,CYP2C19,,,,"));

        let back: Vec<ClinicalAnnotationRecord> = from_csv(&content).unwrap();
        assert_eq!(back, vec![row]);
    }

    #[test]
    fn guideline_flags_as_integers() {
        let row = GuidelineRecord {
            id: 1,
            paid: "PA166104949".to_string(),
            source: GuidelineSource::Rnpgx,
            title: "Title".to_string(),
            summary: String::new(),
            recommendation: String::new(),
            gene: "CYP2D6;CYP2C19".to_string(),
            drug: "amitriptyline".to_string(),
            phenotype: String::new(),
            genotype: String::new(),
            alternate: true,
            dosing: false,
        };
        let content = to_csv(std::slice::from_ref(&row)).unwrap();
        let text = String::from_utf8(content.clone()).unwrap();
        assert!(text.lines().nth(1).unwrap().ends_with(",1,0"));
        assert!(text.contains(",RNPGx,"));
        let back: Vec<GuidelineRecord> = from_csv(&content).unwrap();
        assert_eq!(back, vec![row]);
    }

    #[test]
    fn missing_file_means_nothing_to_load() {
        let temp = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(temp.path().join("absent.csv")).unwrap();
        let rows: Option<Vec<GuidelineRecord>> = read_table(&path).unwrap();
        assert!(rows.is_none());
    }

    #[test]
    fn header_only_file_reads_as_empty_table() {
        let temp = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(temp.path().join("rules.csv")).unwrap();
        let rows: Vec<crate::domain::GuidelineRuleRecord> = Vec::new();
        write_table(&path, &rows, RULE_COLUMNS).unwrap();
        let text = std::fs::read_to_string(path.as_std_path()).unwrap();
        assert_eq!(text.trim_end(), RULE_COLUMNS.join(","));
        let back: Option<Vec<crate::domain::GuidelineRuleRecord>> = read_table(&path).unwrap();
        assert_eq!(back, Some(Vec::new()));
    }
}
