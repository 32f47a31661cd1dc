//! Record-shape normalization.
//!
//! The platform's endpoints disagree on key casing: per-task endpoints emit Go
//! field names (`TaskID`, `CreatedAt`), the admin bulk endpoints may emit
//! lower-snake keys (`task_id`, `created_at`), and records we serialize
//! ourselves use lower-camel keys (`taskId`). Keys are compared after folding
//! (lower-cased, `_`/`-` removed), so all three spellings resolve to the same
//! canonical field.
//!
//! Normalization never fails. A missing field becomes `null` (ids, timestamps)
//! or `""` (text). Only the conversion from a canonical record into an entity
//! can fail, and only when identity fields are absent.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use super::errors::FetchError;
use super::models::{Finding, Role, Task, TaskStatus, User};

pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Copy)]
enum Kind {
    /// Non-negative integer, from a JSON number or a digit string.
    Id,
    Text,
    /// Text that is trimmed and lower-cased.
    Keyword,
    /// Non-empty string, parsed later by `parse_timestamp`.
    Timestamp,
}

struct Field {
    canonical: &'static str,
    aliases: &'static [&'static str],
    kind: Kind,
}

const TASK_FIELDS: &[Field] = &[
    Field { canonical: "id", aliases: &["id"], kind: Kind::Id },
    Field { canonical: "target", aliases: &["target"], kind: Kind::Text },
    Field { canonical: "template", aliases: &["template"], kind: Kind::Text },
    Field { canonical: "status", aliases: &["status"], kind: Kind::Keyword },
    Field { canonical: "userId", aliases: &["userid", "ownerid", "owneruserid"], kind: Kind::Id },
    Field { canonical: "createdAt", aliases: &["createdat"], kind: Kind::Timestamp },
];

const FINDING_FIELDS: &[Field] = &[
    Field { canonical: "id", aliases: &["id"], kind: Kind::Id },
    Field { canonical: "taskId", aliases: &["taskid"], kind: Kind::Id },
    Field { canonical: "vulnerability", aliases: &["vulnerability", "name"], kind: Kind::Text },
    Field { canonical: "severity", aliases: &["severity"], kind: Kind::Keyword },
    Field { canonical: "target", aliases: &["target"], kind: Kind::Text },
    Field { canonical: "timestamp", aliases: &["timestamp", "createdat"], kind: Kind::Timestamp },
    Field { canonical: "detail", aliases: &["detail"], kind: Kind::Text },
];

const USER_FIELDS: &[Field] = &[
    Field { canonical: "id", aliases: &["id"], kind: Kind::Id },
    Field { canonical: "username", aliases: &["username"], kind: Kind::Text },
    Field { canonical: "role", aliases: &["role"], kind: Kind::Keyword },
];

fn fold_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn lookup<'a>(raw: &'a Record, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|alias| {
        raw.iter()
            .find(|(key, value)| !value.is_null() && fold_key(key) == *alias)
            .map(|(_, value)| value)
    })
}

fn coerce(value: Option<&Value>, kind: Kind) -> Value {
    match kind {
        Kind::Id => match value {
            Some(Value::Number(n)) => n.as_u64().map(Value::from).unwrap_or(Value::Null),
            Some(Value::String(s)) => s.trim().parse::<u64>().map(Value::from).unwrap_or(Value::Null),
            _ => Value::Null,
        },
        Kind::Text => Value::String(as_text(value)),
        Kind::Keyword => Value::String(as_text(value).to_lowercase().trim().to_string()),
        Kind::Timestamp => match value {
            Some(Value::String(s)) if !s.trim().is_empty() => Value::String(s.trim().to_string()),
            _ => Value::Null,
        },
    }
}

fn as_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn normalize_with(raw: &Value, fields: &[Field]) -> Record {
    let empty = Record::new();
    let source = raw.as_object().unwrap_or(&empty);
    fields
        .iter()
        .map(|field| {
            let value = coerce(lookup(source, field.aliases), field.kind);
            (field.canonical.to_string(), value)
        })
        .collect()
}

/// Parse the timestamp forms the platform is known to emit.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts);
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

fn get_id(record: &Record, key: &str) -> Option<u64> {
    record.get(key).and_then(Value::as_u64)
}

fn get_text(record: &Record, key: &str) -> String {
    record
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn get_timestamp(record: &Record, key: &str) -> Option<DateTime<FixedOffset>> {
    record.get(key).and_then(Value::as_str).and_then(parse_timestamp)
}

/// An entity that can be built from a backend record of any key casing.
pub trait FromRecord: Sized {
    const KIND: &'static str;

    /// Map a raw record onto the canonical lower-camel shape. Idempotent.
    fn normalize(raw: &Value) -> Record;

    fn from_canonical(record: &Record) -> Result<Self, FetchError>;

    fn from_record(raw: &Value) -> Result<Self, FetchError> {
        Self::from_canonical(&Self::normalize(raw))
    }
}

impl FromRecord for Task {
    const KIND: &'static str = "task";

    fn normalize(raw: &Value) -> Record {
        normalize_with(raw, TASK_FIELDS)
    }

    fn from_canonical(record: &Record) -> Result<Self, FetchError> {
        let id = get_id(record, "id").ok_or_else(|| {
            FetchError::MalformedRecord(format!(
                "task record without id (target {:?})",
                get_text(record, "target")
            ))
        })?;

        Ok(Task {
            id,
            target: get_text(record, "target"),
            template: get_text(record, "template"),
            status: TaskStatus::parse(&get_text(record, "status")),
            user_id: get_id(record, "userId"),
            created_at: get_timestamp(record, "createdAt"),
        })
    }
}

impl FromRecord for Finding {
    const KIND: &'static str = "finding";

    fn normalize(raw: &Value) -> Record {
        normalize_with(raw, FINDING_FIELDS)
    }

    fn from_canonical(record: &Record) -> Result<Self, FetchError> {
        let id = get_id(record, "id").ok_or_else(|| {
            FetchError::MalformedRecord(format!(
                "finding record without id ({:?})",
                get_text(record, "vulnerability")
            ))
        })?;
        let task_id = get_id(record, "taskId").ok_or_else(|| {
            FetchError::MalformedRecord(format!("finding {} has no task id", id))
        })?;

        Ok(Finding {
            id,
            task_id,
            vulnerability: get_text(record, "vulnerability"),
            severity: get_text(record, "severity"),
            target: get_text(record, "target"),
            timestamp: get_timestamp(record, "timestamp"),
            detail: get_text(record, "detail"),
        })
    }
}

impl Finding {
    /// Build a finding retrieved through a per-task endpoint. Those records may
    /// omit the task id, in which case the requested task id is used.
    pub fn from_record_in_task(raw: &Value, task_id: u64) -> Result<Self, FetchError> {
        let mut record = Self::normalize(raw);
        if record.get("taskId").is_none_or(Value::is_null) {
            record.insert("taskId".to_string(), Value::from(task_id));
        }
        Self::from_canonical(&record)
    }
}

impl FromRecord for User {
    const KIND: &'static str = "user";

    fn normalize(raw: &Value) -> Record {
        normalize_with(raw, USER_FIELDS)
    }

    fn from_canonical(record: &Record) -> Result<Self, FetchError> {
        let id = get_id(record, "id").ok_or_else(|| {
            FetchError::MalformedRecord(format!(
                "user record without id ({:?})",
                get_text(record, "username")
            ))
        })?;

        Ok(User {
            id,
            username: get_text(record, "username"),
            role: Role::parse(&get_text(record, "role")),
        })
    }
}

/// Username and role from a `/user/info` payload, which carries no id.
pub fn identity_from_record(raw: &Value) -> (String, Role) {
    let record = User::normalize(raw);
    (get_text(&record, "username"), Role::parse(&get_text(&record, "role")))
}

/// Findings carried by a `{task_id, results}` export document. A record
/// without its own task id belongs to the exported task.
pub fn findings_from_export(raw: &Value, task_id: u64) -> Vec<Finding> {
    let empty = Record::new();
    let document = raw.as_object().unwrap_or(&empty);
    let task_id = lookup(document, &["taskid"])
        .and_then(|value| coerce(Some(value), Kind::Id).as_u64())
        .unwrap_or(task_id);

    match lookup(document, &["results"]) {
        Some(Value::Array(records)) => {
            collect_with(records, |record| Finding::from_record_in_task(record, task_id))
        }
        _ => Vec::new(),
    }
}

/// Convert a batch, dropping records that lack identity fields.
pub fn collect_records<T: FromRecord>(records: &[Value]) -> Vec<T> {
    collect_with(records, T::from_record)
}

pub fn collect_with<T: FromRecord>(
    records: &[Value],
    convert: impl Fn(&Value) -> Result<T, FetchError>,
) -> Vec<T> {
    records
        .iter()
        .filter_map(|raw| match convert(raw) {
            Ok(entity) => Some(entity),
            Err(err) => {
                tracing::warn!("Dropping {} record: {}", T::KIND, err);
                None
            }
        })
        .collect()
}
