use std::io::{self, Write};

use serde::Serialize;

use crate::app::{InitResult, ProgressEvent, ProgressSink, ReviewResult, SyncResult};
use crate::loader::{LoadReport, TableStatus};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_review(result: &ReviewResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_load(result: &LoadReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_sync(result: &SyncResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_init(result: &InitResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Plain progress lines on stderr and a colored summary on stdout.
pub struct TextOutput;

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

impl TextOutput {
    pub fn print_review(result: &ReviewResult) {
        println!("{CYAN}KIRA-PGX review{RESET}");
        for dataset in result.datasets() {
            match &dataset.error {
                None => {
                    println!(
                        "{GREEN}  {}: {} rows{RESET}",
                        dataset.table, dataset.rows
                    );
                    if dataset.filtered > 0 {
                        println!("{YELLOW}     filtered: {}{RESET}", dataset.filtered);
                    }
                    if !dataset.record_errors.is_empty() {
                        println!(
                            "{YELLOW}     skipped records: {}{RESET}",
                            dataset.record_errors.len()
                        );
                    }
                    if let Some(path) = &dataset.review_file {
                        println!("     file: {path}");
                    }
                }
                Some(err) => println!("{RED}  {}: 0 rows ({err}){RESET}", dataset.table),
            }
        }
        if !result.reconciliation_misses.is_empty() {
            println!(
                "{YELLOW}  rules dropped during reconciliation: {}{RESET}",
                result.reconciliation_misses.len()
            );
        }
    }

    pub fn print_load(report: &LoadReport) {
        println!("{CYAN}KIRA-PGX load{RESET}");
        println!("  backup: {}", report.backup_path);
        for table in &report.tables {
            let before = count_text(table.rows_before);
            match table.status {
                TableStatus::Replaced => println!(
                    "{GREEN}  {}: {before} -> {}{RESET}",
                    table.table,
                    count_text(table.rows_after)
                ),
                TableStatus::Skipped => {
                    println!("{YELLOW}  {}: skipped ({before} rows kept){RESET}", table.table)
                }
                TableStatus::Failed => println!(
                    "{RED}  {}: failed ({}){RESET}",
                    table.table,
                    table.error.as_deref().unwrap_or("unknown error")
                ),
            }
        }
        if report.is_committed() {
            println!("{GREEN}  committed{RESET}");
        } else {
            println!("{RED}  rolled back, knowledge base unchanged{RESET}");
            if let Some(err) = &report.commit_error {
                println!("{RED}  commit: {err}{RESET}");
            }
        }
    }

    pub fn print_init(result: &InitResult) {
        if result.created {
            println!("{GREEN}created {}{RESET}", result.database);
        } else {
            println!("{YELLOW}{} already exists, schema ensured{RESET}", result.database);
        }
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => eprintln!("{}", event.message),
        }
    }
}

fn count_text(count: Option<i64>) -> String {
    count.map_or_else(|| "?".to_string(), |count| count.to_string())
}
