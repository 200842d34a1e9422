//! All-or-nothing replacement of the canonical tables.
//!
//! Protocol per call: the store must exist, a full-file backup is taken, then
//! one transaction deletes and re-inserts every supplied table in
//! [`Table::LOAD_ORDER`]. Each table runs in its own savepoint so that a
//! failure is recorded and the remaining tables still report. The
//! transaction commits only when every table succeeded.

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Transaction, params_from_iter};
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{ClinicalAnnotationRecord, GuidelineRecord, GuidelineRuleRecord, Table};
use crate::error::PgxError;
use crate::store::{KnowledgeBase, TableRow, insert_sql, row_count};

/// Tables to replace; `None` leaves that table untouched.
#[derive(Debug, Clone, Default)]
pub struct LoadPlan {
    pub clinical_annotations: Option<Vec<ClinicalAnnotationRecord>>,
    pub guidelines: Option<Vec<GuidelineRecord>>,
    pub rules: Option<Vec<GuidelineRuleRecord>>,
}

impl LoadPlan {
    pub fn is_empty(&self) -> bool {
        self.clinical_annotations.is_none() && self.guidelines.is_none() && self.rules.is_none()
    }

    fn validate(&self) -> Result<(), PgxError> {
        if self.guidelines.is_some() && self.rules.is_none() {
            return Err(PgxError::InconsistentPlan(
                "guidelines cannot be replaced without their reconciled rules".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Replaced,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: Table,
    pub status: TableStatus,
    pub rows_before: Option<i64>,
    pub rows_after: Option<i64>,
    pub inserted: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOutcome {
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub backup_path: String,
    pub tables: Vec<TableReport>,
    pub outcome: LoadOutcome,
    pub commit_error: Option<String>,
}

impl LoadReport {
    pub fn is_committed(&self) -> bool {
        self.outcome == LoadOutcome::Committed
    }

    pub fn failed_tables(&self) -> Vec<String> {
        let mut failed: Vec<String> = self
            .tables
            .iter()
            .filter(|report| report.status == TableStatus::Failed)
            .map(|report| report.table.to_string())
            .collect();
        if failed.is_empty() && self.commit_error.is_some() {
            failed.push("commit".to_string());
        }
        failed
    }
}

pub struct TransactionalLoader<'a> {
    store: &'a KnowledgeBase,
    backup_root: Utf8PathBuf,
}

impl<'a> TransactionalLoader<'a> {
    pub fn new(store: &'a KnowledgeBase, backup_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            store,
            backup_root: backup_root.into(),
        }
    }

    pub fn backup_root(&self) -> &Utf8Path {
        &self.backup_root
    }

    /// `Err` only when nothing was touched (missing store, failed backup,
    /// unopenable database). Table failures come back as a rolled-back report.
    pub fn apply(&self, plan: &LoadPlan) -> Result<LoadReport, PgxError> {
        plan.validate()?;
        if !self.store.exists() {
            return Err(PgxError::StoreMissing(
                self.store.path().to_path_buf().into_std_path_buf(),
            ));
        }

        let backup_path = self.store.backup(&self.backup_root)?;
        info!(backup = %backup_path, "knowledge base backed up");

        let mut conn = self.store.open()?;
        let mut tx = conn.transaction()?;

        let tables = vec![
            replace(&mut tx, plan.clinical_annotations.as_deref()),
            replace(&mut tx, plan.guidelines.as_deref()),
            replace(&mut tx, plan.rules.as_deref()),
        ];

        let all_succeeded = tables
            .iter()
            .all(|report| report.status != TableStatus::Failed);

        let (outcome, commit_error) = if all_succeeded {
            match tx.commit() {
                Ok(()) => (LoadOutcome::Committed, None),
                // A failed COMMIT leaves the transaction open; dropping it rolls back.
                Err(err) => (LoadOutcome::RolledBack, Some(err.to_string())),
            }
        } else {
            tx.rollback()?;
            (LoadOutcome::RolledBack, None)
        };

        match outcome {
            LoadOutcome::Committed => info!("load committed"),
            LoadOutcome::RolledBack => warn!(
                commit_error = commit_error.as_deref().unwrap_or(""),
                "load rolled back, knowledge base unchanged"
            ),
        }

        Ok(LoadReport {
            backup_path: backup_path.to_string(),
            tables,
            outcome,
            commit_error,
        })
    }
}

fn replace<R: TableRow>(tx: &mut Transaction<'_>, rows: Option<&[R]>) -> TableReport {
    let table = R::TABLE;
    let rows_before = row_count(tx, table).ok();

    let Some(rows) = rows else {
        info!(%table, "no review data, table left untouched");
        return TableReport {
            table,
            status: TableStatus::Skipped,
            rows_before,
            rows_after: rows_before,
            inserted: 0,
            error: None,
        };
    };

    match replace_rows(tx, rows) {
        Ok(rows_after) => {
            info!(%table, before = ?rows_before, after = rows_after, "table replaced");
            TableReport {
                table,
                status: TableStatus::Replaced,
                rows_before,
                rows_after: Some(rows_after),
                inserted: rows.len(),
                error: None,
            }
        }
        Err(err) => {
            warn!(%table, error = %err, "table replace failed");
            TableReport {
                table,
                status: TableStatus::Failed,
                rows_before,
                rows_after: None,
                inserted: 0,
                error: Some(err.to_string()),
            }
        }
    }
}

/// Delete-then-insert inside a savepoint; an early return rolls the
/// savepoint back.
fn replace_rows<R: TableRow>(tx: &mut Transaction<'_>, rows: &[R]) -> rusqlite::Result<i64> {
    let table = R::TABLE;
    let savepoint = tx.savepoint()?;
    savepoint.execute(&format!("DELETE FROM \"{}\"", table.name()), [])?;
    {
        let mut insert = savepoint.prepare(&insert_sql(table))?;
        for row in rows {
            insert.execute(params_from_iter(row.values()))?;
        }
    }
    let rows_after = row_count(&savepoint, table)?;
    savepoint.commit()?;
    Ok(rows_after)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::GuidelineSource;

    fn store_in(dir: &tempfile::TempDir) -> KnowledgeBase {
        let path = Utf8PathBuf::from_path_buf(dir.path().join("kb.sqlite3")).unwrap();
        KnowledgeBase::new(path)
    }

    fn guideline(id: i64, paid: &str) -> GuidelineRecord {
        GuidelineRecord {
            id,
            paid: paid.to_string(),
            source: GuidelineSource::Dpwg,
            title: format!("guideline {paid}"),
            summary: String::new(),
            recommendation: String::new(),
            gene: "TPMT".to_string(),
            drug: "azathioprine".to_string(),
            phenotype: String::new(),
            genotype: String::new(),
            alternate: false,
            dosing: true,
        }
    }

    #[test]
    fn missing_store_aborts_before_anything() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        let loader = TransactionalLoader::new(&store, temp.path().to_str().unwrap());
        let err = loader.apply(&LoadPlan::default()).unwrap_err();
        assert_matches!(err, PgxError::StoreMissing(_));
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn guidelines_without_rules_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        store.create().unwrap();
        let loader = TransactionalLoader::new(&store, temp.path().to_str().unwrap());
        let plan = LoadPlan {
            guidelines: Some(vec![guideline(1, "PA1")]),
            ..LoadPlan::default()
        };
        assert_matches!(loader.apply(&plan), Err(PgxError::InconsistentPlan(_)));
    }

    #[test]
    fn skipped_tables_are_untouched() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        store.create().unwrap();
        let loader = TransactionalLoader::new(&store, temp.path().to_str().unwrap());

        let plan = LoadPlan {
            guidelines: Some(vec![guideline(1, "PA1"), guideline(2, "PA2")]),
            rules: Some(Vec::new()),
            ..LoadPlan::default()
        };
        let report = loader.apply(&plan).unwrap();
        assert!(report.is_committed());
        assert_eq!(report.tables[0].status, TableStatus::Skipped);
        assert_eq!(report.tables[1].status, TableStatus::Replaced);
        assert_eq!(report.tables[1].rows_after, Some(2));
        assert_eq!(store.row_count(Table::Guidelines).unwrap(), 2);
    }

    #[test]
    fn unwritable_backup_aborts_before_mutation() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        store.create().unwrap();
        store
            .open()
            .unwrap()
            .execute_batch(
                "INSERT INTO GuidelineMerge VALUES (1, 'PA1', 'CPIC', '', '', '', '', '', '', '', 0, 0);",
            )
            .unwrap();
        // A regular file where the backup directory should go.
        let blocked = temp.path().join("backups");
        std::fs::write(&blocked, b"not a directory").unwrap();

        let loader = TransactionalLoader::new(&store, blocked.to_str().unwrap());
        let plan = LoadPlan {
            guidelines: Some(Vec::new()),
            rules: Some(Vec::new()),
            ..LoadPlan::default()
        };
        assert_matches!(loader.apply(&plan), Err(PgxError::Backup(_)));
        assert_eq!(store.row_count(Table::Guidelines).unwrap(), 1);
    }

    #[test]
    fn every_failing_table_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        let conn = rusqlite::Connection::open(store.path().as_std_path()).unwrap();
        conn.execute_batch(
            "CREATE TABLE ClinAnn (CAID TEXT);
             CREATE TABLE GuidelineMerge (ID INTEGER PRIMARY KEY);
             CREATE TABLE GuidelineRule (ID INTEGER PRIMARY KEY);
             INSERT INTO ClinAnn VALUES ('1');
             INSERT INTO GuidelineMerge VALUES (1);
             INSERT INTO GuidelineRule VALUES (1);",
        )
        .unwrap();
        drop(conn);
        let loader = TransactionalLoader::new(&store, temp.path().to_str().unwrap());

        let plan = LoadPlan {
            clinical_annotations: Some(Vec::new()),
            guidelines: Some(Vec::new()),
            rules: Some(Vec::new()),
        };
        let report = loader.apply(&plan).unwrap();
        assert_eq!(report.outcome, LoadOutcome::RolledBack);
        assert_eq!(
            report.failed_tables(),
            vec![
                "ClinAnn".to_string(),
                "GuidelineMerge".to_string(),
                "GuidelineRule".to_string()
            ]
        );
        assert!(report.tables.iter().all(|table| table.error.is_some()));
        assert!(report.commit_error.is_none());
        for table in Table::LOAD_ORDER {
            assert_eq!(store.row_count(table).unwrap(), 1);
        }
    }

    #[test]
    fn dangling_rule_fails_commit_and_rolls_back() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        store.create().unwrap();
        let loader = TransactionalLoader::new(&store, temp.path().to_str().unwrap());

        let plan = LoadPlan {
            guidelines: Some(vec![guideline(1, "PA1")]),
            rules: Some(vec![GuidelineRuleRecord {
                id: 1,
                gene: "TPMT".to_string(),
                variant: "*3A".to_string(),
                allele1: String::new(),
                allele2: String::new(),
                phenotype: "Poor Metabolizer".to_string(),
                caid: String::new(),
                guideline_id: 99,
            }]),
            ..LoadPlan::default()
        };
        let report = loader.apply(&plan).unwrap();
        assert_eq!(report.outcome, LoadOutcome::RolledBack);
        assert!(report.commit_error.is_some());
        assert_eq!(report.failed_tables(), vec!["commit".to_string()]);
        assert_eq!(store.row_count(Table::Guidelines).unwrap(), 0);
        assert_eq!(store.row_count(Table::Rules).unwrap(), 0);
    }
}
