use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_pgx_sync::domain::Table;
use kira_pgx_sync::error::PgxError;
use kira_pgx_sync::store::KnowledgeBase;

fn store_in(dir: &tempfile::TempDir) -> KnowledgeBase {
    KnowledgeBase::new(Utf8PathBuf::from_path_buf(dir.path().join("db/pgx_kb.sqlite3")).unwrap())
}

#[test]
fn create_is_idempotent_and_keeps_rows() {
    let temp = tempfile::tempdir().unwrap();
    let store = store_in(&temp);
    assert!(!store.exists());

    store.create().unwrap();
    assert!(store.exists());
    store
        .open()
        .unwrap()
        .execute_batch("INSERT INTO GuidelineMerge VALUES (1, 'PA1', 'CPIC', '', '', '', '', '', '', '', 0, 0);")
        .unwrap();

    store.create().unwrap();
    assert_eq!(store.row_count(Table::Guidelines).unwrap(), 1);
    assert_eq!(store.row_count(Table::Rules).unwrap(), 0);
}

#[test]
fn backup_names_carry_timestamp_and_never_clobber() {
    let temp = tempfile::tempdir().unwrap();
    let store = store_in(&temp);
    store.create().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("backups")).unwrap();

    let first = store.backup(&root).unwrap();
    let second = store.backup(&root).unwrap();
    assert_ne!(first, second);

    let name = first.file_name().unwrap();
    let stamp = name.strip_prefix("pgx_kb.sqlite3.backup_").unwrap();
    assert_eq!(stamp.len(), "YYYYmmdd_HHMMSS".len());
    assert!(stamp.chars().all(|c| c.is_ascii_digit() || c == '_'));

    assert_eq!(
        std::fs::read(first.as_std_path()).unwrap(),
        std::fs::read(store.path().as_std_path()).unwrap()
    );
}

#[test]
fn backup_of_missing_store_fails() {
    let temp = tempfile::tempdir().unwrap();
    let store = store_in(&temp);
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    assert_matches!(store.backup(&root), Err(PgxError::StoreMissing(_)));
}
