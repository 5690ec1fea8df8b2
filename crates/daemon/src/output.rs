//! Output formatting for the command line

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use snapdiff_common::{ExcludeZone, Snapshot};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Print a single item
pub fn print_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) {
    print_list(std::slice::from_ref(item), format);
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("No items found.");
                return;
            }

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Json => {
            let json = match items {
                [item] => serde_json::to_string_pretty(item),
                _ => serde_json::to_string_pretty(items),
            };
            println!("{}", json.unwrap_or_default());
        }
        OutputFormat::Plain => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                let row = item.row();
                for (header, value) in T::headers().iter().zip(row.iter()) {
                    println!("{}: {}", header, value);
                }
            }
        }
    }
}

/// Print a simple message
pub fn print_message(message: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "message": message }));
        }
        _ => {
            println!("{}", message);
        }
    }
}

impl TableDisplay for Snapshot {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Lineage", "Role", "Reference", "Computed", "Too many diffs", "Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.lineage.to_string(),
            self.role().to_string(),
            self.reference_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
            self.computed.to_string(),
            self.too_many_diffs.to_string(),
            self.computing_error.clone(),
        ]
    }
}

impl TableDisplay for ExcludeZone {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Snapshot", "X", "Y", "Width", "Height"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.snapshot_id.to_string(),
            self.rect.x.to_string(),
            self.rect.y.to_string(),
            self.rect.width.to_string(),
            self.rect.height.to_string(),
        ]
    }
}

/// Summary of a one-off diff between two files
#[derive(Debug, Serialize)]
pub struct DiffSummary {
    pub width: u32,
    pub height: u32,
    pub diff_pixels: usize,
    pub diff_percent: f64,
}

impl TableDisplay for DiffSummary {
    fn headers() -> Vec<&'static str> {
        vec!["Width", "Height", "Diff pixels", "Diff %"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.width.to_string(),
            self.height.to_string(),
            self.diff_pixels.to_string(),
            format!("{:.3}", self.diff_percent),
        ]
    }
}
