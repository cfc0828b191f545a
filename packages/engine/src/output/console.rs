// packages/engine/src/output/console.rs
//! Stats table printed to stdout

use crate::output::Output;
use crate::stats::{StatsEntry, StatsPayload, StatsReport};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::fmt::Write;

/// Prints one table per stats report
#[derive(Debug, Default)]
pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn new() -> Self {
        Self
    }
}

fn write_row(out: &mut String, entry: &StatsEntry) {
    let _ = writeln!(
        out,
        " {:<8} {:<40} {:>8} {:>8} {:>10.2} {:>8} {:>8} {:>12}",
        entry.method,
        entry.name,
        entry.num_requests,
        entry.num_failures,
        entry.avg_response_time(),
        entry.min_response_time,
        entry.max_response_time,
        entry.avg_content_length(),
    );
}

pub(crate) fn render(report: &StatsReport, at: DateTime<Local>) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{} | Current users: {}",
        at.format("%Y/%m/%d %H:%M:%S"),
        report.user_count
    );
    let _ = writeln!(
        out,
        " {:<8} {:<40} {:>8} {:>8} {:>10} {:>8} {:>8} {:>12}",
        "Type", "Name", "# reqs", "# fails", "Avg", "Min", "Max", "Content Size"
    );

    for entry in &report.entries {
        write_row(&mut out, entry);
    }
    if let Some(total) = &report.total {
        write_row(&mut out, total);
    }

    if !report.errors.is_empty() {
        let _ = writeln!(out, " Errors:");
        for error in &report.errors {
            let _ = writeln!(
                out,
                "  {:>6}x {} {}: {}",
                error.occurrences, error.method, error.name, error.error
            );
        }
    }

    out
}

#[async_trait]
impl Output for ConsoleOutput {
    async fn on_start(&self) {
        println!("Stats output started");
    }

    async fn on_event(&self, data: &StatsPayload) {
        let report = StatsReport::from_payload(data);
        println!("{}", render(&report, Local::now()));
    }

    async fn on_stop(&self) {
        println!("Stats output stopped");
    }
}
