//! crates/session_ledger_core/src/export.rs
//!
//! Projects a chosen, ordered subset of record fields into delimited text.

use std::collections::HashSet;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::TimestampedRecord;
use crate::error::{EngineError, EngineResult};

const DELIMITER: char = ',';
const QUOTE: char = '"';
const TAG_SEPARATOR: &str = " → ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportField {
    SubjectName,
    Date,
    Time,
    Duration,
    Status,
    Reason,
    Notes,
    Summary,
    Recommendation,
    Classification,
    OwnerId,
    CreatedAt,
}

impl ExportField {
    pub const ALL: [ExportField; 12] = [
        ExportField::SubjectName,
        ExportField::Date,
        ExportField::Time,
        ExportField::Duration,
        ExportField::Status,
        ExportField::Reason,
        ExportField::Notes,
        ExportField::Summary,
        ExportField::Recommendation,
        ExportField::Classification,
        ExportField::OwnerId,
        ExportField::CreatedAt,
    ];

    /// The default selection of the export dialog.
    pub const ESSENTIAL: [ExportField; 8] = [
        ExportField::SubjectName,
        ExportField::Date,
        ExportField::Time,
        ExportField::Duration,
        ExportField::Status,
        ExportField::Reason,
        ExportField::Notes,
        ExportField::Classification,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ExportField::SubjectName => "subject_name",
            ExportField::Date => "date",
            ExportField::Time => "time",
            ExportField::Duration => "duration",
            ExportField::Status => "status",
            ExportField::Reason => "reason",
            ExportField::Notes => "notes",
            ExportField::Summary => "summary",
            ExportField::Recommendation => "recommendation",
            ExportField::Classification => "classification",
            ExportField::OwnerId => "owner_id",
            ExportField::CreatedAt => "created_at",
        }
    }

    /// Header text.
    pub fn label(&self) -> &'static str {
        match self {
            ExportField::SubjectName => "Subject",
            ExportField::Date => "Date",
            ExportField::Time => "Time",
            ExportField::Duration => "Duration (min)",
            ExportField::Status => "Status",
            ExportField::Reason => "Reason",
            ExportField::Notes => "Notes",
            ExportField::Summary => "Summary",
            ExportField::Recommendation => "Recommendation",
            ExportField::Classification => "Classification",
            ExportField::OwnerId => "Owner ID",
            ExportField::CreatedAt => "Created",
        }
    }

    /// Total: every record yields a value, possibly empty.
    pub fn value(&self, record: &TimestampedRecord) -> String {
        let text = |field: &Option<String>| field.clone().unwrap_or_default();
        match self {
            ExportField::SubjectName => record.subject_name.clone(),
            ExportField::Date => record.occurred_on.format("%Y-%m-%d").to_string(),
            ExportField::Time => record.occurred_at.format("%H:%M").to_string(),
            ExportField::Duration => record.duration_minutes.to_string(),
            ExportField::Status => record.status.as_str().to_string(),
            ExportField::Reason => text(&record.free_text.reason),
            ExportField::Notes => text(&record.free_text.notes),
            ExportField::Summary => text(&record.free_text.summary),
            ExportField::Recommendation => text(&record.free_text.recommendation),
            ExportField::Classification => record
                .classification_tags
                .iter()
                .map(|tag| tag.as_str())
                .collect::<Vec<_>>()
                .join(TAG_SEPARATOR),
            ExportField::OwnerId => record.owner_id.to_string(),
            ExportField::CreatedAt => record.created_at.format("%Y-%m-%d").to_string(),
        }
    }
}

impl FromStr for ExportField {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExportField::ALL
            .into_iter()
            .find(|field| field.name() == s)
            .ok_or_else(|| EngineError::ExportFieldUnknown(s.to_string()))
    }
}

/// Parses column names, failing on the first unknown one.
pub fn parse_fields<S: AsRef<str>>(names: &[S]) -> EngineResult<Vec<ExportField>> {
    names.iter().map(|name| name.as_ref().parse()).collect()
}

/// Quotes `value` only when it contains the delimiter, the quote or a line break.
pub fn escape(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c == DELIMITER || c == QUOTE || c == '\n' || c == '\r');
    if !needs_quotes {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push(QUOTE);
    for c in value.chars() {
        if c == QUOTE {
            quoted.push(QUOTE);
        }
        quoted.push(c);
    }
    quoted.push(QUOTE);
    quoted
}

/// Restricts an export to the selected rows. An empty selection keeps everything.
pub fn select_records<'a>(
    records: &'a [TimestampedRecord],
    selected_ids: &[Uuid],
) -> Vec<&'a TimestampedRecord> {
    if selected_ids.is_empty() {
        return records.iter().collect();
    }
    let wanted: HashSet<&Uuid> = selected_ids.iter().collect();
    records.iter().filter(|r| wanted.contains(&r.id)).collect()
}

/// Header line followed by one line per record, joined with `\n`.
///
/// Repeated fields are emitted once, at their first position. An empty field
/// list is rejected since it cannot produce a meaningful table.
pub fn serialize<'a, I>(records: I, fields: &[ExportField]) -> EngineResult<String>
where
    I: IntoIterator<Item = &'a TimestampedRecord>,
{
    let mut seen = HashSet::new();
    let columns: Vec<ExportField> = fields.iter().copied().filter(|f| seen.insert(*f)).collect();
    if columns.is_empty() {
        return Err(EngineError::ExportFieldUnknown("no fields selected".to_string()));
    }

    let mut out = String::new();
    let header: Vec<String> = columns.iter().map(|f| escape(f.label())).collect();
    out.push_str(&header.join(&DELIMITER.to_string()));

    for record in records {
        out.push('\n');
        for (i, field) in columns.iter().enumerate() {
            if i > 0 {
                out.push(DELIMITER);
            }
            out.push_str(&escape(&field.value(record)));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClassificationTag, RecordStatus};
    use crate::filter::tests::{day, record};

    /// Reads one delimited line back with the usual quoting rules.
    fn parse_cells(text: &str) -> Vec<String> {
        let mut cells = Vec::new();
        let mut cell = String::new();
        let mut in_quotes = false;
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match (c, in_quotes) {
                ('"', true) if chars.peek() == Some(&'"') => {
                    cell.push('"');
                    chars.next();
                }
                ('"', true) => in_quotes = false,
                ('"', false) if cell.is_empty() => in_quotes = true,
                (',', false) => cells.push(std::mem::take(&mut cell)),
                _ => cell.push(c),
            }
        }
        cells.push(cell);
        cells
    }

    #[test]
    fn test_plain_values_are_not_quoted() {
        assert_eq!(escape("Ana Perez"), "Ana Perez");
        assert_eq!(escape(""), "");
    }

    #[test]
    fn test_special_value_round_trips() {
        let original = "He said \"stop\", then\nleft";
        let mut r = record(1, day(3), RecordStatus::Completed);
        r.free_text.notes = Some(original.to_string());

        let text = serialize([&r], &[ExportField::Notes, ExportField::Status]).unwrap();
        let (header, body) = text.split_once('\n').unwrap();
        assert_eq!(header, "Notes,Status");
        assert!(body.starts_with("\"He said \"\"stop\"\", then\nleft\""));
        assert_eq!(parse_cells(body), vec![original.to_string(), "completed".to_string()]);
    }

    #[test]
    fn test_missing_optionals_render_empty() {
        let mut r = record(1, day(3), RecordStatus::Pending);
        r.classification_tags = vec![ClassificationTag::Anxious, ClassificationTag::Positive];
        let text = serialize(
            [&r],
            &[ExportField::Summary, ExportField::Classification, ExportField::Duration],
        )
        .unwrap();
        assert_eq!(text.lines().nth(1).unwrap(), ",anxious → positive,50");
    }

    #[test]
    fn test_field_order_and_duplicates() {
        let r = record(1, day(3), RecordStatus::Completed);
        let text = serialize(
            [&r],
            &[ExportField::Time, ExportField::Date, ExportField::Time],
        )
        .unwrap();
        assert_eq!(text, "Time,Date\n10:00,2024-05-03");
    }

    #[test]
    fn test_output_is_deterministic() {
        let records: Vec<_> = (1..=4)
            .map(|n| record(n, day(n as u32), RecordStatus::Completed))
            .collect();
        let a = serialize(&records, &ExportField::ALL).unwrap();
        let b = serialize(&records, &ExportField::ALL).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.lines().count(), 5);
        assert!(a.starts_with("Subject,Date,Time,Duration (min),Status"));
    }

    #[test]
    fn test_unknown_field_fails_fast() {
        assert_eq!(
            parse_fields(&["date", "mood"]),
            Err(EngineError::ExportFieldUnknown("mood".into()))
        );
        assert_eq!(
            parse_fields(&["notes", "status"]).unwrap(),
            vec![ExportField::Notes, ExportField::Status]
        );
        assert!(serialize(std::iter::empty::<&TimestampedRecord>(), &[]).is_err());
    }

    #[test]
    fn test_selection_restricts_rows() {
        let records: Vec<_> = (1..=3).map(|n| record(n, day(1), RecordStatus::Completed)).collect();
        assert_eq!(select_records(&records, &[]).len(), 3);
        let picked = select_records(&records, &[Uuid::from_u128(2)]);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, Uuid::from_u128(2));
    }
}
