//! Prints a human-readable summary of finished runs.
//!
//! Latencies are not aggregated here; they go to the configured metrics sink.

use std::time::Duration;

use yansi::Paint;

use crate::harness::RunReport;
use crate::worker::WorkerExit;

/// Prints one section per run to stdout.
pub fn print(reports: &[RunReport]) {
    for report in reports {
        println!();
        println!(
            "{} {} ({} workers, {:.1?})",
            "## Backend".bold(),
            report.label.as_str().bold().blue(),
            report.workers.len().bold(),
            report.elapsed,
        );
        print_report(report);
    }
}

fn print_report(report: &RunReport) {
    let totals = report.totals();

    print_ops("READ:", totals.reads, totals.failed_reads, report.elapsed);
    print_ops("WRITE:", totals.writes, totals.failed_writes, report.elapsed);

    let aborted: Vec<_> = report
        .workers
        .iter()
        .filter(|worker| worker.exit == WorkerExit::Aborted)
        .map(|worker| worker.identity.as_str())
        .collect();
    if !aborted.is_empty() {
        println!(
            "{} {} (another instance looked active)",
            "ABORTED:".bold().yellow(),
            aborted.join(", ")
        );
    }

    let panicked = report.count(WorkerExit::Panicked);
    if panicked > 0 {
        println!("{}", format!("{panicked} WORKERS PANICKED").bold().red());
    }
}

fn print_ops(title: &str, ops: u64, failures: u64, elapsed: Duration) {
    print!("{} ({} ops", title.bold().green(), ops.bold());
    if failures > 0 {
        print!(", {}", format!("{failures} FAILURES").bold().red());
    }
    let ops_ps = ops as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    println!(")  {:.2} operations/s", ops_ps.bold());
}
