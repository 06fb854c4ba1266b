//! Output formatting utilities for the CLI.

use std::time::Duration;

use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;

use crate::domain::models::{Config, ReasonId, ReasonSlot, ReasonSource};

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;
    fn to_json(&self) -> serde_json::Value;
}

pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&result.to_json()).unwrap_or_default()
        );
    } else {
        println!("{}", result.to_human());
    }
}

/// Truncate a string to a maximum number of characters, appending "..."
/// if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Borderless list table with upper-case headers.
pub fn list_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h.to_uppercase()).set_alignment(CellAlignment::Left)),
        );
    table
}

/// Render the table under a count line.
pub fn render_list(entity_name: &str, table: &Table, total: usize) -> String {
    if total == 0 {
        return format!("No {entity_name}s found.");
    }
    let noun = if total == 1 {
        entity_name.to_string()
    } else {
        format!("{entity_name}s")
    };
    format!("{} {noun}:\n{table}", style(total).bold())
}

/// Spinner on stderr, hidden in JSON mode.
pub fn spinner(message: impl Into<String>, json_mode: bool) -> ProgressBar {
    if json_mode {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    if let Ok(template) = ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed}]") {
        pb.set_style(template.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
    }
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// One reason slot, flattened for display.
#[derive(Debug, Clone, Serialize)]
pub struct SlotOutput {
    pub id: String,
    pub machine_id: u32,
    pub from: String,
    pub to: String,
    pub machine_mode: u32,
    pub machine_observation_state: u32,
    pub reason: Option<u32>,
    pub reason_name: Option<String>,
    pub details: Option<String>,
    pub score: f64,
    pub source: ReasonSource,
    pub overwrite_required: bool,
    pub auto_reason_count: u32,
    pub extra_manual: bool,
    pub version: u32,
}

impl SlotOutput {
    pub fn new(slot: &ReasonSlot, config: &Config) -> Self {
        Self {
            id: slot.id.to_string(),
            machine_id: slot.machine_id.0,
            from: slot.range.lower().to_rfc3339(),
            to: slot.range.upper().to_rfc3339(),
            machine_mode: slot.machine_mode.0,
            machine_observation_state: slot.machine_observation_state.0,
            reason: slot.reason.map(|r| r.0),
            reason_name: slot.reason.and_then(|r| reason_name(config, r)),
            details: slot.reason_details.clone(),
            score: slot.reason_score,
            source: slot.reason_source,
            overwrite_required: slot.overwrite_required,
            auto_reason_count: slot.auto_reason_count,
            extra_manual: slot.extra_manual,
            version: slot.version,
        }
    }

    fn reason_label(&self) -> String {
        match (self.reason, &self.reason_name) {
            (None, _) => "undetermined".to_string(),
            (Some(id), Some(name)) => format!("{id} {name}"),
            (Some(id), None) => id.to_string(),
        }
    }

    fn source_label(&self) -> String {
        if self.reason.is_none() {
            return "-".to_string();
        }
        self.source.to_string()
    }

    fn flags_label(&self) -> String {
        let mut flags = Vec::new();
        if self.overwrite_required {
            flags.push("overwrite".to_string());
        }
        if self.auto_reason_count > 0 {
            flags.push(format!("auto×{}", self.auto_reason_count));
        }
        if self.extra_manual {
            flags.push("+manual".to_string());
        }
        flags.join(" ")
    }
}

pub fn reason_name(config: &Config, reason: ReasonId) -> Option<String> {
    config.reason(reason).map(|r| r.name.clone())
}

/// Slot table for human output.
pub fn slot_table(slots: &[SlotOutput]) -> Table {
    let mut table = list_table(&[
        "machine", "from", "to", "mode", "state", "reason", "score", "source", "details", "flags",
    ]);
    for slot in slots {
        table.add_row(vec![
            Cell::new(slot.machine_id),
            Cell::new(&slot.from),
            Cell::new(&slot.to),
            Cell::new(slot.machine_mode),
            Cell::new(slot.machine_observation_state),
            Cell::new(slot.reason_label()),
            Cell::new(if slot.reason.is_some() {
                format!("{:.1}", slot.score)
            } else {
                "-".to_string()
            }),
            Cell::new(slot.source_label()),
            Cell::new(truncate(slot.details.as_deref().unwrap_or(""), 30)),
            Cell::new(slot.flags_label()),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        MachineId, MachineModeId, MachineObservationStateId, MainAssignment, Reason, TimeRange,
    };
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer piece of text", 10), "a longe...");
        assert_eq!(truncate("ééééé", 4), "é...");
    }

    #[test]
    fn test_slot_output_names_reason() {
        let mut config = Config::default();
        config.reasons.push(Reason::new(4, "Tool change"));
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
        let slot = ReasonSlot::new(
            MachineId(1),
            TimeRange::new(start, start + Duration::hours(1)).unwrap(),
            MachineModeId(2),
            MachineObservationStateId(1),
        )
        .with_main(MainAssignment {
            reason: ReasonId(4),
            details: None,
            score: 20.0,
            source: ReasonSource::Auto,
            overwrite_required: true,
            data: Default::default(),
        });

        let out = SlotOutput::new(&slot, &config);
        assert_eq!(out.reason_name.as_deref(), Some("Tool change"));
        assert_eq!(out.flags_label(), "overwrite");

        let rendered = render_list("slot", &slot_table(&[out]), 1);
        assert!(rendered.contains("Tool change"));
        assert_eq!(render_list("slot", &slot_table(&[]), 0), "No slots found.");
    }
}
