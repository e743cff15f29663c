//! Output formatting for CLI

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use ppds_e2e::{RunSummary, TestStatus};

fn status_cell(status: TestStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        TestStatus::Passed => cell.fg(Color::Green),
        TestStatus::Failed => cell.fg(Color::Red),
        TestStatus::Skipped => cell.fg(Color::Yellow),
    }
}

/// One row per test, final attempt only
pub fn print_summary(summary: &RunSummary) {
    if summary.outcomes.is_empty() {
        eprintln!("No tests found.");
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec!["Test", "Status", "Duration", "Retries", "Error"]);
    for outcome in &summary.outcomes {
        table.add_row(vec![
            Cell::new(&outcome.id),
            status_cell(outcome.status),
            Cell::new(format!("{:.1}s", outcome.duration.as_secs_f64())),
            Cell::new(outcome.retry),
            Cell::new(
                outcome
                    .error
                    .as_ref()
                    .map(|f| f.message.as_str())
                    .unwrap_or(""),
            ),
        ]);
    }

    eprintln!("{table}");
    eprintln!(
        "{} passed, {} failed, {} skipped in {:.1}s",
        summary.passed.to_string().green(),
        summary.failed.to_string().red(),
        summary.skipped.to_string().yellow(),
        summary.duration.as_secs_f64()
    );
}

/// Print success message
pub fn print_success(message: &str) {
    eprintln!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message.red());
}
