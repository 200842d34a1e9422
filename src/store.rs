use std::collections::HashMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, OpenFlags};

use crate::domain::{ClinicalAnnotationRecord, GuidelineRecord, GuidelineRuleRecord, Table};
use crate::error::PgxError;
use crate::fs_util::unique_path;
use crate::raw::{RawRecord, RawRow};

pub const CLINICAL_ANNOTATION_COLUMNS: &[&str] = &[
    "CAID",
    "Gene",
    "Variant",
    "Allele1",
    "Allele2",
    "Annotation1",
    "Function1",
    "Function2",
    "Score1",
    "Score2",
    "CPICPhenotype",
    "PAnnoPhenotype",
    "Drug",
    "Phenotypes",
    "EvidenceLevel",
    "LevelOverride",
    "LevelModifier",
    "Score",
    "EvidenceCount",
    "Specialty",
    "PhenotypeCategory",
];

pub const GUIDELINE_COLUMNS: &[&str] = &[
    "ID",
    "PAID",
    "Source",
    "Title",
    "Summary",
    "Recommendation",
    "Gene",
    "Drug",
    "Phenotype",
    "Genotype",
    "Alternate",
    "Dosing",
];

pub const RULE_COLUMNS: &[&str] = &[
    "ID",
    "Gene",
    "Variant",
    "Allele1",
    "Allele2",
    "Phenotype",
    "CAID",
    "GuidelineID",
];

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ClinAnn (
    CAID TEXT NOT NULL,
    Gene TEXT NOT NULL,
    Variant TEXT NOT NULL,
    Allele1 TEXT NOT NULL,
    Allele2 TEXT NOT NULL,
    Annotation1 TEXT NOT NULL,
    Function1 TEXT NOT NULL,
    Function2 TEXT NOT NULL,
    Score1 TEXT NOT NULL,
    Score2 TEXT NOT NULL,
    CPICPhenotype TEXT NOT NULL,
    PAnnoPhenotype TEXT NOT NULL,
    Drug TEXT NOT NULL,
    Phenotypes TEXT NOT NULL,
    EvidenceLevel TEXT NOT NULL,
    LevelOverride TEXT NOT NULL,
    LevelModifier TEXT NOT NULL,
    Score TEXT NOT NULL,
    EvidenceCount TEXT NOT NULL,
    Specialty TEXT NOT NULL,
    PhenotypeCategory TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS GuidelineMerge (
    ID INTEGER PRIMARY KEY,
    PAID TEXT NOT NULL,
    Source TEXT NOT NULL,
    Title TEXT NOT NULL,
    Summary TEXT NOT NULL,
    Recommendation TEXT NOT NULL,
    Gene TEXT NOT NULL,
    Drug TEXT NOT NULL,
    Phenotype TEXT NOT NULL,
    Genotype TEXT NOT NULL,
    Alternate INTEGER NOT NULL DEFAULT 0,
    Dosing INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS GuidelineRule (
    ID INTEGER PRIMARY KEY,
    Gene TEXT NOT NULL,
    Variant TEXT NOT NULL,
    Allele1 TEXT NOT NULL,
    Allele2 TEXT NOT NULL,
    Phenotype TEXT NOT NULL,
    CAID TEXT NOT NULL,
    GuidelineID INTEGER NOT NULL
        REFERENCES GuidelineMerge(ID) DEFERRABLE INITIALLY DEFERRED
);
"#;

pub fn columns(table: Table) -> &'static [&'static str] {
    match table {
        Table::ClinicalAnnotations => CLINICAL_ANNOTATION_COLUMNS,
        Table::Guidelines => GUIDELINE_COLUMNS,
        Table::Rules => RULE_COLUMNS,
    }
}

/// A canonical record that can be bound to its table's insert statement.
pub trait TableRow {
    const TABLE: Table;

    /// Values in `columns(Self::TABLE)` order.
    fn values(&self) -> Vec<Value>;
}

impl TableRow for ClinicalAnnotationRecord {
    const TABLE: Table = Table::ClinicalAnnotations;

    fn values(&self) -> Vec<Value> {
        [
            &self.caid,
            &self.gene,
            &self.variant,
            &self.allele1,
            &self.allele2,
            &self.annotation1,
            &self.function1,
            &self.function2,
            &self.score1,
            &self.score2,
            &self.cpic_phenotype,
            &self.panno_phenotype,
            &self.drug,
            &self.phenotypes,
            &self.evidence_level,
            &self.level_override,
            &self.level_modifier,
            &self.score,
            &self.evidence_count,
            &self.specialty,
            &self.phenotype_category,
        ]
        .into_iter()
        .map(|text| Value::Text(text.clone()))
        .collect()
    }
}

impl TableRow for GuidelineRecord {
    const TABLE: Table = Table::Guidelines;

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.id),
            Value::Text(self.paid.clone()),
            Value::Text(self.source.to_string()),
            Value::Text(self.title.clone()),
            Value::Text(self.summary.clone()),
            Value::Text(self.recommendation.clone()),
            Value::Text(self.gene.clone()),
            Value::Text(self.drug.clone()),
            Value::Text(self.phenotype.clone()),
            Value::Text(self.genotype.clone()),
            Value::Integer(i64::from(self.alternate)),
            Value::Integer(i64::from(self.dosing)),
        ]
    }
}

impl TableRow for GuidelineRuleRecord {
    const TABLE: Table = Table::Rules;

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.id),
            Value::Text(self.gene.clone()),
            Value::Text(self.variant.clone()),
            Value::Text(self.allele1.clone()),
            Value::Text(self.allele2.clone()),
            Value::Text(self.phenotype.clone()),
            Value::Text(self.caid.clone()),
            Value::Integer(self.guideline_id),
        ]
    }
}

/// The SQLite knowledge base file. Holds exactly one generation.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    path: Utf8PathBuf,
}

impl KnowledgeBase {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.as_std_path().is_file()
    }

    /// Opens an existing store; never creates one.
    pub fn open(&self) -> Result<Connection, PgxError> {
        if !self.exists() {
            return Err(PgxError::StoreMissing(self.path.clone().into_std_path_buf()));
        }
        let conn = Connection::open_with_flags(
            self.path.as_std_path(),
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    /// Creates the file if needed and ensures the canonical tables exist.
    pub fn create(&self) -> Result<(), PgxError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| PgxError::Filesystem(err.to_string()))?;
        }
        let conn = Connection::open(self.path.as_std_path())?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Copies the whole file to `<root>/<name>.backup_<YYYYmmdd_HHMMSS>`.
    pub fn backup(&self, root: &Utf8Path) -> Result<Utf8PathBuf, PgxError> {
        if !self.exists() {
            return Err(PgxError::StoreMissing(self.path.clone().into_std_path_buf()));
        }
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| PgxError::Backup(format!("invalid store path {}", self.path)))?;
        fs::create_dir_all(root.as_std_path())
            .map_err(|err| PgxError::Backup(format!("{root}: {err}")))?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let target = unique_path(root.join(format!("{file_name}.backup_{stamp}")));
        fs::copy(self.path.as_std_path(), target.as_std_path())
            .map_err(|err| PgxError::Backup(format!("{target}: {err}")))?;
        Ok(target)
    }

    pub fn row_count(&self, table: Table) -> Result<i64, PgxError> {
        let conn = self.open()?;
        Ok(row_count(&conn, table)?)
    }

    /// Internal id -> PharmGKB accession of the persisted guideline generation.
    pub fn previous_guidelines(&self) -> Result<HashMap<i64, String>, PgxError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT ID, PAID FROM GuidelineMerge")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
        let mut lookup = HashMap::new();
        for row in rows {
            let (id, paid) = row?;
            lookup.insert(id, paid);
        }
        Ok(lookup)
    }

    /// Persisted rules as flat rows, in id order, for the carry-over mapping.
    pub fn previous_rules(&self) -> Result<Vec<RawRecord>, PgxError> {
        let conn = self.open()?;
        let sql = format!(
            "SELECT {} FROM GuidelineRule ORDER BY ID",
            quoted_columns(RULE_COLUMNS)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let mut raw = RawRow::new();
            for (index, column) in RULE_COLUMNS.iter().enumerate() {
                raw.insert(*column, value_text(row.get_ref(index)?));
            }
            Ok(RawRecord::Row(raw))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(PgxError::from)
    }
}

pub fn row_count(conn: &Connection, table: Table) -> rusqlite::Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table.name()), [], |row| {
        row.get(0)
    })
}

pub fn insert_sql(table: Table) -> String {
    let columns = columns(table);
    let placeholders = (1..=columns.len())
        .map(|n| format!("?{n}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO \"{}\" ({}) VALUES ({})",
        table.name(),
        quoted_columns(columns),
        placeholders
    )
}

fn quoted_columns(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|column| format!("\"{column}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

fn value_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(number) => number.to_string(),
        ValueRef::Real(number) => number.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    }
}
