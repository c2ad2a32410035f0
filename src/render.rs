use std::fmt;

use unicode_width::UnicodeWidthStr;

use crate::controller::{Detection, Report, ViewState, WeatherCard};

struct Column {
    header: String,
    value: String,
}

/// A one-row table: left-justified headers over right-justified values,
/// aligned by Unicode display width.
struct Table {
    columns: Vec<Column>,
}

impl Table {
    fn new() -> Self {
        Table {
            columns: Vec::new(),
        }
    }

    fn column(mut self, header: impl Into<String>, value: impl Into<String>) -> Self {
        self.columns.push(Column {
            header: header.into(),
            value: value.into(),
        });
        self
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.columns.is_empty() {
            return Ok(());
        }

        let widths: Vec<usize> = self
            .columns
            .iter()
            .map(|col| std::cmp::max(col.header.width(), col.value.width()))
            .collect();

        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(c, &w)| ljust(&c.header, w))
            .collect();
        let row: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(c, &w)| rjust(&c.value, w))
            .collect();
        write!(
            f,
            "{}\n{}",
            header.join("  ").trim_end(),
            row.join("  ").trim_end()
        )
    }
}

/// Left-justify string to given width (using Unicode display width).
fn ljust(s: &str, width: usize) -> String {
    let current_width = s.width();
    if current_width >= width {
        s.to_string()
    } else {
        format!("{}{}", s, " ".repeat(width - current_width))
    }
}

/// Right-justify string to given width (using Unicode display width).
fn rjust(s: &str, width: usize) -> String {
    let current_width = s.width();
    if current_width >= width {
        s.to_string()
    } else {
        format!("{}{}", " ".repeat(width - current_width), s)
    }
}

/// The line under the input box describing what detection found.
pub fn detection_line(detection: &Detection) -> String {
    match detection {
        Detection::Detected(place) => match place.country.as_deref() {
            Some(country) if !country.is_empty() => {
                format!("Detected city: {} ({})", place.name, country)
            }
            _ => format!("Detected city: {}", place.name),
        },
        Detection::Idle | Detection::Detecting => "Detecting city from location…".to_string(),
        Detection::Failed => "Could not detect city from location.".to_string(),
    }
}

fn render_report(report: &Report) -> String {
    let mut out = format!("{}\n{}\n", report.title, report.desc);
    let table = Table::new()
        .column("Temp", format!("{}°C", report.temp))
        .column("Feels", format!("{}°C", report.feels))
        .column("Wind", format!("{} km/h", report.wind));
    out.push_str(&table.to_string());
    if let Some(time) = report.observed_at {
        out.push_str(&format!("\nas of {}", time.format("%Y-%m-%d %H:%M")));
    }
    out
}

/// Render the whole widget as plain text.
pub fn render_view(view: &ViewState) -> String {
    let mut blocks = vec![detection_line(&view.detection)];

    if view.loading {
        blocks.push("Checking…".to_string());
    }
    if let Some(error) = &view.error {
        blocks.push(format!("⚠️ {}", error));
    }
    match &view.card {
        WeatherCard::Absent => {}
        WeatherCard::Joke(joke) => blocks.push(format!("😂 {}", joke)),
        WeatherCard::Report(report) => blocks.push(render_report(report)),
    }

    blocks.join("\n\n")
}
