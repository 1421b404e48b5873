//! Status marks and emphasis for the `check`, `preview` and run output.

use console::Style;

fn mark(symbol: &str, style: Style, msg: &str) -> String {
    format!("{} {}", style.apply_to(symbol), msg)
}

/// A check that passed, e.g. a reachable identity service.
pub fn success(msg: &str) -> String {
    mark("✓", Style::new().green(), msg)
}

/// A check that failed outright.
pub fn error(msg: &str) -> String {
    mark("✗", Style::new().red(), msg)
}

/// Something that will not stop a run but needs attention, such as recorded
/// migration errors or an unset API key.
pub fn warn(msg: &str) -> String {
    mark("⚠", Style::new().yellow(), msg)
}

/// Section title above a table or block of figures.
pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

/// Secondary detail such as the run id and timings.
pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Banner shown above the report of a run that changed nothing.
pub fn dry_run_banner() -> String {
    Style::new()
        .yellow()
        .bold()
        .apply_to("DRY RUN · no changes were made")
        .to_string()
}
