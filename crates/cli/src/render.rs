//! Console rendering of run reports and source statistics.

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use usermigrate_core::import::ImportLog;
use usermigrate_core::mapping::RoleResolver;
use usermigrate_core::report::RunReport;
use usermigrate_core::source::SourceStats;

use crate::style;

/// Print the counts table followed by every recorded error.
pub fn print_report(report: &RunReport) {
    println!();
    if report.dry_run {
        println!("{}", style::dry_run_banner());
        println!();
    }
    println!("{}", style::header("Migration Summary"));
    println!(
        "{}",
        style::dim(&format!(
            "run {} · {} → {}",
            report.run_id,
            report.started_at.format("%Y-%m-%d %H:%M:%S"),
            report.completed_at.format("%H:%M:%S")
        ))
    );
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Phase", "Total", "Done", "Skipped", "Failed"]);
    table.add_row(vec![
        Cell::new("Import"),
        Cell::new(report.import.total),
        Cell::new(report.import.imported).fg(Color::Green),
        Cell::new(report.import.skipped),
        failed_cell(report.import.failed),
    ]);
    table.add_row(vec![
        Cell::new("Registration"),
        Cell::new(report.registration.total),
        Cell::new(report.registration.registered).fg(Color::Green),
        Cell::new(report.registration.skipped),
        failed_cell(report.registration.failed),
    ]);
    println!("{}", table);

    if !report.has_errors() {
        println!();
        println!("{}", style::success("No errors"));
        println!();
        return;
    }

    println!();
    println!("{}", style::warn(&format!("{} error(s)", report.errors.len())));
    let mut errors = Table::new();
    errors.load_preset(UTF8_FULL);
    errors.set_content_arrangement(ContentArrangement::Dynamic);
    errors.set_header(vec!["Phase", "Source ID", "Email", "Application", "Detail"]);
    for err in &report.errors {
        errors.add_row(vec![
            Cell::new(err.phase),
            Cell::new(err.source_id),
            Cell::new(&err.email),
            Cell::new(err.app_id.as_deref().unwrap_or("—")),
            Cell::new(&err.detail).fg(Color::Red),
        ]);
    }
    println!("{}", errors);
    println!();
}

fn failed_cell(count: usize) -> Cell {
    if count > 0 {
        Cell::new(count).fg(Color::Red)
    } else {
        Cell::new(count)
    }
}

/// List the users a dry run would create, with the role each would get.
pub fn print_dry_run_imports(log: &ImportLog) {
    let pending: Vec<_> = log.outcomes.iter().filter(|o| o.payload.is_some()).collect();
    if pending.is_empty() {
        return;
    }

    println!("{}", style::header("Would import"));
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Source ID", "Email", "Username", "Role"]);
    for outcome in pending {
        table.add_row(vec![
            Cell::new(outcome.source_id),
            Cell::new(&outcome.email),
            Cell::new(outcome.username.as_deref().unwrap_or("—")),
            Cell::new(&outcome.resolved_role),
        ]);
    }
    println!("{}", table);
    println!();
}

/// Source figures, with the role each legacy level resolves to.
pub fn print_stats(stats: &SourceStats, roles: &RoleResolver) {
    println!("  Total users      : {}", stats.total_users);
    println!("  Confirmed        : {}", stats.confirmed_users);
    println!("  Unconfirmed      : {}", stats.unconfirmed_users);

    if stats.users_by_level.is_empty() {
        return;
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Level", "Role", "Users"]);
    for (level, count) in &stats.users_by_level {
        let label = level.map(|l| l.to_string()).unwrap_or_else(|| "none".into());
        table.add_row(vec![
            Cell::new(label),
            Cell::new(roles.resolve(*level)),
            Cell::new(count),
        ]);
    }
    println!("{}", table);
}
