//! Terminal output helpers: status lines, progress bars and tables.

use comfy_table::{Attribute, Cell, CellAlignment, Table};
use owo_colors::OwoColorize;
use is_terminal::IsTerminal;
use std::time::Duration;

use crate::models::Bibliographic;
use crate::utils::CorpusStats;

/// Check if stdout is a terminal.
pub fn is_terminal() -> bool {
    std::io::stdout().is_terminal()
}

/// Icon shown next to results from a source.
pub fn source_icon(source: &str) -> &'static str {
    match source.to_lowercase().as_str() {
        "arxiv" => "📝",
        "pubmed" => "🏥",
        "semantic" | "semantic scholar" => "🧠",
        "crossref" => "🔗",
        "unpaywall" => "🔓",
        "google_scholar" | "google scholar" => "🔎",
        "import" => "📥",
        _ => "📄",
    }
}

/// Status icons for different operations.
pub fn status_icon(status: Status) -> &'static str {
    match status {
        Status::Success => "✓",
        Status::Warning => "⚠",
    }
}

/// Status types for colored output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Warning,
}

/// Print a styled status message.
#[macro_export]
macro_rules! print_status {
    ($status:expr, $msg:expr) => {{
        use owo_colors::OwoColorize;
        use $crate::ui::{status_icon, Status};
        let icon = status_icon($status);
        match $status {
            Status::Success => println!("{} {}", icon.green().bold(), $msg),
            Status::Warning => println!("{} {}", icon.yellow().bold(), $msg),
        }
    }};
}

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", format!("━━━ {} ━━━", title).bold().cyan());
}

/// Format a number with commas.
pub fn format_number(n: usize) -> String {
    n.to_string()
        .chars()
        .rev()
        .collect::<Vec<_>>()
        .chunks(3)
        .map(|c| c.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(",")
        .chars()
        .rev()
        .collect()
}

/// Truncate text to at most `max_chars` characters, ending in `...` when cut.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if max_chars <= 3 {
        return "...".to_string();
    }
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars - 3).collect();
    format!("{}...", kept.trim_end())
}

/// Progress bar that can be switched off for non-interactive runs
pub struct Progress {
    pb: indicatif::ProgressBar,
}

impl Progress {
    pub fn new(len: u64, msg: &str) -> Self {
        let pb = indicatif::ProgressBar::new(len);
        if let Ok(style) =
            indicatif::ProgressStyle::with_template("{prefix}: {bar:40.cyan/blue} {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("█▓▒░ "));
        }
        pb.set_prefix(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(200));
        Self { pb }
    }

    /// A progress bar that draws nothing
    pub fn hidden() -> Self {
        Self {
            pb: indicatif::ProgressBar::hidden(),
        }
    }

    pub fn set_message(&self, msg: &str) {
        self.pb.set_message(msg.to_string());
    }

    pub fn inc(&self, delta: u64) {
        self.pb.inc(delta);
    }

    pub fn finish_with_message(&self, msg: &str) {
        self.pb.finish_with_message(msg.to_string());
    }
}

/// Metadata coverage as a two-column table with percentages
pub fn stats_table(stats: &CorpusStats) -> Table {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Records with", "Count", "Share"]);

    let share = |n: usize| {
        if stats.total == 0 {
            "-".to_string()
        } else {
            format!("{:.1}%", n as f64 * 100.0 / stats.total as f64)
        }
    };

    table.add_row(vec![
        Cell::new("total").add_attribute(Attribute::Bold),
        Cell::new(format_number(stats.total)).set_alignment(CellAlignment::Right),
        Cell::new(""),
    ]);
    for (label, count) in stats.rows() {
        table.add_row(vec![
            Cell::new(label),
            Cell::new(format_number(count)).set_alignment(CellAlignment::Right),
            Cell::new(share(count)).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

/// One row per record: title, first author, year, DOI
pub fn records_table<R: Bibliographic>(records: &[R]) -> Table {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Title", "First author", "Year", "DOI"]);

    for record in records {
        let first_author = record
            .authors()
            .first()
            .map(|a| a.family.clone())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(truncate_with_ellipsis(record.title(), 60)).add_attribute(Attribute::Bold),
            Cell::new(first_author),
            Cell::new(record.bib().year().unwrap_or("")),
            Cell::new(record.bib().doi().unwrap_or("")),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuxData, BibFields, CanonicalRecord};

    #[test]
    fn test_source_icon() {
        assert_eq!(source_icon("arxiv"), "📝");
        assert_eq!(source_icon("PubMed"), "🏥");
        assert_eq!(source_icon("semantic scholar"), "🧠");
        assert_eq!(source_icon("unknown"), "📄");
    }

    #[test]
    fn test_status_icon() {
        assert_eq!(status_icon(Status::Success), "✓");
        assert_eq!(status_icon(Status::Warning), "⚠");
    }

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("Hello", 10), "Hello");
        assert_eq!(truncate_with_ellipsis("Hello World", 8), "Hello...");
        assert_eq!(truncate_with_ellipsis("", 10), "");
        assert_eq!(truncate_with_ellipsis("Hello", 3), "...");
        assert_eq!(truncate_with_ellipsis("Ünïcödé títle", 8), "Ünïcö...");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1000000), "1,000,000");
        assert_eq!(format_number(123), "123");
    }

    #[test]
    fn test_stats_table_lists_every_row() {
        let records = vec![CanonicalRecord::new(
            BibFields::new().with("title", "A").with("doi", "10.1/a"),
            AuxData::default(),
        )];
        let stats = CorpusStats::collect(&records);
        let rendered = stats_table(&stats).to_string();
        assert!(rendered.contains("DOI"));
        assert!(rendered.contains("100.0%"));
        assert_eq!(stats_table(&stats).row_iter().count(), stats.rows().len() + 1);
    }

    #[test]
    fn test_records_table() {
        let records = vec![CanonicalRecord::new(
            BibFields::new()
                .with("title", "Deep Learning for Radiology Reports")
                .with("author", "Smith, J")
                .with("year", "2020"),
            AuxData::default(),
        )];
        let rendered = records_table(&records).to_string();
        assert!(rendered.contains("Smith"));
        assert!(rendered.contains("2020"));
    }
}
