use std::fs;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ResolvedConfig;
use crate::domain::{ClinicalAnnotationRecord, GuidelineRecord, GuidelineRuleRecord, Table};
use crate::error::{PgxError, RecordError};
use crate::fs_util::remove_if_exists;
use crate::interchange::{read_table, write_table};
use crate::loader::{LoadPlan, LoadReport, TransactionalLoader};
use crate::mapper::{MappedBatch, SchemaMapper};
use crate::pharmgkb::{Fetcher, Resource};
use crate::reader::{read_clinical_annotations, read_guideline_documents};
use crate::reconcile::{GuidelineReconciler, Reconciled, ReconciliationMiss};
use crate::store::{KnowledgeBase, columns};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetResult {
    pub table: Table,
    pub rows: usize,
    pub filtered: usize,
    pub record_errors: Vec<String>,
    pub error: Option<String>,
    pub review_file: Option<String>,
}

impl DatasetResult {
    fn failed(table: Table, error: String) -> Self {
        Self {
            table,
            rows: 0,
            filtered: 0,
            record_errors: Vec::new(),
            error: Some(error),
            review_file: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewResult {
    pub clinical_annotations: DatasetResult,
    pub guidelines: DatasetResult,
    pub rules: DatasetResult,
    pub reconciliation_misses: Vec<ReconciliationMiss>,
}

impl ReviewResult {
    pub fn datasets(&self) -> [&DatasetResult; 3] {
        [&self.clinical_annotations, &self.guidelines, &self.rules]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub review: ReviewResult,
    pub load: LoadReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitResult {
    pub database: String,
    pub created: bool,
}

pub struct App<F: Fetcher> {
    config: ResolvedConfig,
    fetcher: F,
    mapper: SchemaMapper,
    store: KnowledgeBase,
}

impl<F: Fetcher> App<F> {
    pub fn new(config: ResolvedConfig, fetcher: F) -> Self {
        let mapper = SchemaMapper::new(config.sources.clone());
        let store = KnowledgeBase::new(config.database.clone());
        Self {
            config,
            fetcher,
            mapper,
            store,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn store(&self) -> &KnowledgeBase {
        &self.store
    }

    /// Fetches and normalizes both datasets, reconciles rules against the
    /// persisted generation and writes the review files. A failed dataset
    /// produces no file and does not stop the other one.
    pub fn review(&self, sink: &dyn ProgressSink) -> Result<ReviewResult, PgxError> {
        fs::create_dir_all(self.config.review_dir.as_std_path())
            .map_err(|err| PgxError::Filesystem(err.to_string()))?;

        let clinical_annotations = match self.normalize_clinical_annotations(sink) {
            Ok(batch) => self.write_review(Table::ClinicalAnnotations, batch)?,
            Err(err) => self.dataset_failed(Table::ClinicalAnnotations, err, sink)?,
        };

        let (guidelines, rules, reconciliation_misses) = match self.normalize_guidelines(sink) {
            Ok(batch) => match self.reconcile_rules(&batch.rows, sink) {
                Ok((rule_batch, reconciled)) => {
                    let misses = reconciled.misses;
                    let rules = MappedBatch {
                        rows: reconciled.rules,
                        errors: rule_batch.errors,
                        filtered: misses.len(),
                    };
                    match self.write_generation(batch, rules) {
                        Ok((guidelines, rules)) => (guidelines, rules, misses),
                        Err(err) => {
                            // Neither file may outlive the other.
                            let withdrawn = PgxError::Filesystem(format!(
                                "guideline review withdrawn, rule review not written: {err}"
                            ));
                            let guidelines =
                                self.dataset_failed(Table::Guidelines, withdrawn, sink)?;
                            let rules = self.dataset_failed(Table::Rules, err, sink)?;
                            (guidelines, rules, Vec::new())
                        }
                    }
                }
                Err(err) => {
                    // Guidelines without their rules would leave dangling references.
                    let withheld = PgxError::Store(format!(
                        "guidelines withheld, rule reconciliation failed: {err}"
                    ));
                    let guidelines = self.dataset_failed(Table::Guidelines, withheld, sink)?;
                    let rules = self.dataset_failed(Table::Rules, err, sink)?;
                    (guidelines, rules, Vec::new())
                }
            },
            Err(err) => {
                let rules = self.dataset_failed(
                    Table::Rules,
                    PgxError::Payload(format!("no guideline generation to reconcile against: {err}")),
                    sink,
                )?;
                let guidelines = self.dataset_failed(Table::Guidelines, err, sink)?;
                (guidelines, rules, Vec::new())
            }
        };

        Ok(ReviewResult {
            clinical_annotations,
            guidelines,
            rules,
            reconciliation_misses,
        })
    }

    /// Applies whatever review files are present to the knowledge base.
    pub fn load(&self, sink: &dyn ProgressSink) -> Result<LoadReport, PgxError> {
        sink.event(ProgressEvent {
            message: "phase=Load; reading review files".to_string(),
            elapsed: None,
        });
        let plan = LoadPlan {
            clinical_annotations: read_table::<ClinicalAnnotationRecord>(
                &self.config.review_path(Table::ClinicalAnnotations),
            )?,
            guidelines: read_table::<GuidelineRecord>(&self.config.review_path(Table::Guidelines))?,
            rules: read_table::<GuidelineRuleRecord>(&self.config.review_path(Table::Rules))?,
        };
        if plan.is_empty() {
            warn!("no review files found, nothing new to load");
        }

        sink.event(ProgressEvent {
            message: format!("phase=Load; backing up {}", self.store.path()),
            elapsed: None,
        });
        let start = Instant::now();
        let loader = TransactionalLoader::new(&self.store, self.config.backup_root());
        let report = loader.apply(&plan)?;
        sink.event(ProgressEvent {
            message: format!("phase=Load; {:?}", report.outcome),
            elapsed: Some(start.elapsed()),
        });
        Ok(report)
    }

    pub fn sync(&self, sink: &dyn ProgressSink) -> Result<SyncResult, PgxError> {
        let review = self.review(sink)?;
        let load = self.load(sink)?;
        Ok(SyncResult { review, load })
    }

    pub fn init(&self, sink: &dyn ProgressSink) -> Result<InitResult, PgxError> {
        let created = !self.store.exists();
        sink.event(ProgressEvent {
            message: format!("phase=Store; preparing {}", self.store.path()),
            elapsed: None,
        });
        self.store.create()?;
        Ok(InitResult {
            database: self.store.path().to_string(),
            created,
        })
    }

    fn normalize_clinical_annotations(
        &self,
        sink: &dyn ProgressSink,
    ) -> Result<MappedBatch<ClinicalAnnotationRecord>, PgxError> {
        let content = self.fetch(Resource::ClinicalAnnotations, sink)?;
        let read = read_clinical_annotations(&content)?;
        let mut batch = self.mapper.map_clinical_annotations(&read.records);
        prepend_errors(&mut batch, read.errors);
        if batch.rows.is_empty() {
            return Err(PgxError::Payload(
                "no clinical annotation rows produced".to_string(),
            ));
        }
        Ok(batch)
    }

    fn normalize_guidelines(
        &self,
        sink: &dyn ProgressSink,
    ) -> Result<MappedBatch<GuidelineRecord>, PgxError> {
        let content = self.fetch(Resource::Guidelines, sink)?;
        let read = read_guideline_documents(&content)?;
        let mut batch = self.mapper.map_guidelines(&read.records);
        prepend_errors(&mut batch, read.errors);
        if batch.rows.is_empty() {
            return Err(PgxError::Payload(format!(
                "no guidelines from {} produced",
                self.mapper
                    .sources()
                    .iter()
                    .map(|source| source.as_str())
                    .collect::<Vec<_>>()
                    .join("/")
            )));
        }
        Ok(batch)
    }

    /// Rules come from the persisted previous generation; a missing store
    /// simply has none.
    fn reconcile_rules(
        &self,
        guidelines: &[GuidelineRecord],
        sink: &dyn ProgressSink,
    ) -> Result<(MappedBatch<GuidelineRuleRecord>, Reconciled), PgxError> {
        sink.event(ProgressEvent {
            message: "phase=Reconcile; re-pointing guideline rules".to_string(),
            elapsed: None,
        });
        if !self.store.exists() {
            info!(store = %self.store.path(), "no persisted generation, no rules to carry over");
            return Ok((MappedBatch::default(), Reconciled::default()));
        }

        let previous = self.store.previous_guidelines()?;
        let carried = self.mapper.map_rules(&self.store.previous_rules()?);
        let reconciled = GuidelineReconciler::new(guidelines).reconcile(&carried.rows, &previous);

        info!(
            previous = carried.rows.len(),
            kept = reconciled.rules.len(),
            dropped = reconciled.misses.len(),
            "rules reconciled"
        );
        if reconciled.is_empty() {
            warn!("no rules survived reconciliation, nothing to load for the rule table");
        }
        Ok((carried, reconciled))
    }

    fn fetch(&self, resource: Resource, sink: &dyn ProgressSink) -> Result<Vec<u8>, PgxError> {
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {resource}"),
            elapsed: None,
        });
        let start = Instant::now();
        let content = self.fetcher.fetch(resource)?;
        let latency = start.elapsed();
        sink.event(ProgressEvent {
            message: format!(
                "pharmgkb.response resource={resource} bytes={} latency_ms={}",
                content.len(),
                latency.as_millis()
            ),
            elapsed: Some(latency),
        });
        Ok(content)
    }

    fn write_review<T: Serialize>(
        &self,
        table: Table,
        batch: MappedBatch<T>,
    ) -> Result<DatasetResult, PgxError> {
        report_record_errors(table, &batch.errors);
        let path = self.config.review_path(table);
        write_table(&path, &batch.rows, columns(table))?;
        info!(%table, rows = batch.rows.len(), file = %path, "review file written");

        Ok(DatasetResult {
            table,
            rows: batch.rows.len(),
            filtered: batch.filtered,
            record_errors: batch.errors.iter().map(ToString::to_string).collect(),
            error: None,
            review_file: Some(path.to_string()),
        })
    }

    /// Guidelines are written first, so a fresh rule file never sits next to
    /// a previous run's guideline file.
    fn write_generation(
        &self,
        guidelines: MappedBatch<GuidelineRecord>,
        rules: MappedBatch<GuidelineRuleRecord>,
    ) -> Result<(DatasetResult, DatasetResult), PgxError> {
        let guidelines = self.write_review(Table::Guidelines, guidelines)?;
        let rules = self.write_review(Table::Rules, rules)?;
        Ok((guidelines, rules))
    }

    /// Removes the stale review file so a later load cannot pick up a
    /// previous run's output for this table.
    fn dataset_failed(
        &self,
        table: Table,
        err: PgxError,
        sink: &dyn ProgressSink,
    ) -> Result<DatasetResult, PgxError> {
        warn!(%table, error = %err, "dataset produced no data");
        sink.event(ProgressEvent {
            message: format!("phase=Review; {table} failed: {err}"),
            elapsed: None,
        });
        let path = self.config.review_path(table);
        if remove_if_exists(&path)? {
            debug!(file = %path, "removed stale review file");
        }
        Ok(DatasetResult::failed(table, err.to_string()))
    }
}

fn prepend_errors<T>(batch: &mut MappedBatch<T>, mut errors: Vec<RecordError>) {
    errors.append(&mut batch.errors);
    batch.errors = errors;
}

fn report_record_errors(table: Table, errors: &[RecordError]) {
    if errors.is_empty() {
        return;
    }
    warn!(%table, skipped = errors.len(), "malformed upstream records skipped");
    for err in errors {
        warn!(%table, "{err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigLoader};
    use crate::output::JsonOutput;

    struct OfflineFetcher;

    impl Fetcher for OfflineFetcher {
        fn fetch(&self, _resource: Resource) -> Result<Vec<u8>, PgxError> {
            Err(PgxError::PharmGkbHttp("offline".to_string()))
        }
    }

    #[test]
    fn failed_fetch_removes_stale_review_files() {
        let temp = tempfile::tempdir().unwrap();
        let root = camino::Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let config = ConfigLoader::resolve_config(Config {
            database: Some(root.join("kb.sqlite3").to_string()),
            review_dir: Some(root.join("review").to_string()),
            ..Config::default()
        })
        .unwrap();
        let stale = config.review_path(Table::Guidelines);
        std::fs::create_dir_all(config.review_dir.as_std_path()).unwrap();
        std::fs::write(stale.as_std_path(), b"ID\n").unwrap();

        let app = App::new(config, OfflineFetcher);
        let result = app.review(&JsonOutput).unwrap();
        assert!(result.datasets().iter().all(|dataset| !dataset.is_ok()));
        assert!(result.datasets().iter().all(|dataset| dataset.rows == 0));
        assert!(!stale.as_std_path().exists());
    }
}
