//! Turning command outcomes into display lines.

use enteliscript_core::{ApiResult, CoreEvent, RowOutcome};
use serde_json::Value;

/// Lines for a server payload.
///
/// Scalars print on one line; a flat object prints as aligned
/// `key  value` pairs; anything nested is pretty-printed JSON.
pub fn payload_lines(result: &ApiResult) -> Vec<String> {
    match &result.payload {
        Value::Null => vec![format!("({} no content)", result.status)],
        Value::String(s) => s.lines().map(str::to_string).collect(),
        Value::Object(map) if !map.is_empty() && map.values().all(is_scalar) => {
            let width = map.keys().map(|k| k.chars().count()).max().unwrap_or(0);
            map.iter()
                .map(|(key, value)| format!("{:width$}  {}", key, scalar(value), width = width))
                .collect()
        }
        value if is_scalar(value) => vec![scalar(value)],
        value => serde_json::to_string_pretty(value)
            .unwrap_or_else(|_| value.to_string())
            .lines()
            .map(str::to_string)
            .collect(),
    }
}

/// One line per batch row plus a tally. The flag is true when any row
/// failed or the batch stopped short.
pub fn batch_lines(rows: &[RowOutcome], total: usize) -> (Vec<String>, bool) {
    let mut lines: Vec<String> = rows
        .iter()
        .map(|row| match &row.result {
            Ok(result) => format!("row {:>3}  ok ({})  {}", row.row, result.status, row.target),
            Err(e) => format!("row {:>3}  FAILED  {}: {}", row.row, row.target, e),
        })
        .collect();

    let failed = rows.iter().filter(|r| r.result.is_err()).count();
    let skipped = total.saturating_sub(rows.len());
    let mut tally = format!("{} of {} rows written", rows.len() - failed, total);
    if failed > 0 {
        tally.push_str(&format!(", {} failed", failed));
    }
    if skipped > 0 {
        tally.push_str(&format!(", {} not attempted", skipped));
    }
    lines.push(tally);
    (lines, failed > 0 || skipped > 0)
}

/// One-line description of a core event worth showing, if any.
pub fn event_line(event: &CoreEvent) -> Option<String> {
    match event {
        CoreEvent::RetryScheduled {
            retry,
            delay,
            reason,
            ..
        } => Some(format!(
            "retry {} in {} ms: {}",
            retry,
            delay.as_millis(),
            reason
        )),
        CoreEvent::AuthRefresh { username, reason } => {
            Some(format!("{}; signing in again as {}", reason, username))
        }
        CoreEvent::RequestIssued { .. } | CoreEvent::Failure { .. } => None,
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
