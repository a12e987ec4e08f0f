use chrono::{DateTime, Utc};

use crate::models::{motif_label, Match, SessionFormData};

pub const CSV_HEADER: [&str; 18] = [
    "Session Name",
    "Duration",
    "Match Type",
    "Match Number",
    "Auto Classified",
    "Auto Overflow",
    "Auto Pattern",
    "Auto Leave",
    "Teleop Classified",
    "Teleop Overflow",
    "Teleop Depot",
    "Teleop Pattern",
    "Park",
    "Motif",
    "Total Score",
    "Cycle Times",
    "Shot Logs",
    "Notes",
];

/// Leading characters a spreadsheet would treat as the start of a formula.
const FORMULA_TRIGGERS: [char; 6] = ['=', '+', '-', '@', '\t', '\r'];

fn escape_field(value: &str) -> String {
    let defused = if value.starts_with(FORMULA_TRIGGERS) {
        format!("'{value}")
    } else {
        value.to_string()
    };
    format!("\"{}\"", defused.replace('"', "\"\""))
}

fn format_seconds(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded}")
}

fn match_fields(session: &SessionFormData, record: &Match) -> Vec<String> {
    let cycle_times = record
        .cycle_times
        .iter()
        .map(|secs| format_seconds(*secs))
        .collect::<Vec<_>>()
        .join("; ");
    let shot_logs = record
        .shot_logs
        .iter()
        .map(|log| format!("{}/{}", log.shots_made, log.shots_attempted))
        .collect::<Vec<_>>()
        .join("; ");

    vec![
        session.session_name.clone(),
        session.duration.clone(),
        session.match_type.as_str().to_string(),
        record.match_number.to_string(),
        record.auton.classified.to_string(),
        record.auton.overflow.to_string(),
        record.auton.pattern.to_string(),
        if record.auton.leave { "yes" } else { "no" }.to_string(),
        record.teleop.classified.to_string(),
        record.teleop.overflow.to_string(),
        record.teleop.depot.to_string(),
        record.teleop.pattern.to_string(),
        record.park.as_str().to_string(),
        record.motif.as_ref().map(motif_label).unwrap_or_default(),
        record.total_points().to_string(),
        cycle_times,
        shot_logs,
        session.notes.clone(),
    ]
}

fn placeholder_fields(session: &SessionFormData) -> Vec<String> {
    let zero = || "0".to_string();
    vec![
        session.session_name.clone(),
        session.duration.clone(),
        session.match_type.as_str().to_string(),
        zero(),
        zero(),
        zero(),
        zero(),
        "no".to_string(),
        zero(),
        zero(),
        zero(),
        zero(),
        "none".to_string(),
        String::new(),
        zero(),
        String::new(),
        String::new(),
        session.notes.clone(),
    ]
}

fn write_row(out: &mut String, fields: impl IntoIterator<Item = impl AsRef<str>>) {
    let line = fields
        .into_iter()
        .map(|field| escape_field(field.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&line);
    out.push_str("\r\n");
}

/// Header plus one row per match; a session without matches still gets a
/// single row so its name and notes survive.
pub fn export_csv(session: &SessionFormData) -> String {
    let mut out = String::new();
    write_row(&mut out, CSV_HEADER);
    if session.matches.is_empty() {
        write_row(&mut out, placeholder_fields(session));
    } else {
        for record in &session.matches {
            write_row(&mut out, match_fields(session, record));
        }
    }
    out
}

/// `<session-name>-<yyyy-mm-dd>.csv`, reduced to filesystem-safe characters.
pub fn csv_file_name(session: &SessionFormData, at: DateTime<Utc>) -> String {
    let slug: String = session
        .session_name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let slug = if slug.is_empty() { "session".to_string() } else { slug };
    format!("{}-{}.csv", slug, at.format("%Y-%m-%d"))
}
