use crate::ipc::handlers::courses::Offering;
use crate::ipc::handlers::setup::{section_or_default, SetupSection};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, new_id, now_rfc3339, require_row, with_conn, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// RFC 3339, or a zone-less local form from a datetime picker read as UTC.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
        .map(|naive| naive.and_utc())
}

fn required_instant(params: &Value, key: &str) -> Result<DateTime<Utc>, HandlerErr> {
    let raw = get_required_str(params, key)?;
    parse_instant(&raw).ok_or_else(|| {
        HandlerErr::bad_params(format!("{} must be a date-time", key))
            .with_details(json!({ "field": key, "value": raw }))
    })
}

pub fn now_param(params: &Value) -> Result<DateTime<Utc>, HandlerErr> {
    match get_optional_str(params, "now")? {
        Some(_) => required_instant(params, "now"),
        None => Ok(Utc::now()),
    }
}

fn early_join(conn: &Connection) -> Duration {
    let minutes = section_or_default(conn, SetupSection::Conference)
        .get("earlyJoinMinutes")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    Duration::minutes(minutes)
}

fn stamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn can_join(start: &str, end: &str, now: DateTime<Utc>, early: Duration) -> bool {
    match (parse_instant(start), parse_instant(end)) {
        (Some(s), Some(e)) => s - early <= now && now <= e,
        _ => false,
    }
}

/// Conferences of an offering, newest first.
pub fn conferences_json(
    conn: &Connection,
    batch_instructor_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Value>, HandlerErr> {
    let early = early_join(conn);
    let mut stmt = conn
        .prepare(
            "SELECT id, meeting_name, start_time, end_time, meeting_code, created_at
             FROM video_conferences
             WHERE batch_instructor_id = ?
             ORDER BY created_at DESC, rowid DESC",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([batch_instructor_id], |r| {
            let start: String = r.get(2)?;
            let end: String = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "meetingName": r.get::<_, String>(1)?,
                "canJoin": can_join(&start, &end, now, early),
                "startTime": start,
                "endTime": end,
                "meetingCode": r.get::<_, Option<String>>(4)?,
                "createdAt": r.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(rows)
}

fn conferences_create(conn: &Connection, params: &Value) -> HandlerResult {
    let batch_instructor_id = get_required_str(params, "batchInstructorId")?;
    let meeting_name = get_required_str(params, "meetingName")?;
    let start = required_instant(params, "startTime")?;
    let end = required_instant(params, "endTime")?;
    if end <= start {
        return Err(HandlerErr::bad_params("endTime must be after startTime"));
    }
    require_row(conn, "batch_instructors", &batch_instructor_id, "batch instructor")?;

    let conference_id = new_id();
    conn.execute(
        "INSERT INTO video_conferences(id, batch_instructor_id, meeting_name, start_time, end_time, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &conference_id,
            &batch_instructor_id,
            &meeting_name,
            stamp(start),
            stamp(end),
            now_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "video_conferences" }))
    })?;
    Ok(json!({
        "conferenceId": conference_id,
        "startTime": stamp(start),
        "endTime": stamp(end)
    }))
}

fn conferences_list(conn: &Connection, params: &Value) -> HandlerResult {
    let batch_instructor_id = get_required_str(params, "batchInstructorId")?;
    require_row(conn, "batch_instructors", &batch_instructor_id, "batch instructor")?;
    let now = now_param(params)?;
    Ok(json!({ "conferences": conferences_json(conn, &batch_instructor_id, now)? }))
}

fn conferences_delete(conn: &Connection, params: &Value) -> HandlerResult {
    let conference_id = get_required_str(params, "conferenceId")?;
    let n = conn
        .execute("DELETE FROM video_conferences WHERE id = ?", [&conference_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if n == 0 {
        return Err(HandlerErr::not_found("conference not found")
            .with_details(json!({ "id": conference_id })));
    }
    Ok(json!({ "ok": true }))
}

fn conferences_join(conn: &Connection, params: &Value) -> HandlerResult {
    let conference_id = get_required_str(params, "conferenceId")?;
    let email = get_required_str(params, "email")?;
    let row: Option<(String, String, Option<String>)> = conn
        .query_row(
            "SELECT batch_instructor_id, meeting_name, meeting_code FROM video_conferences WHERE id = ?",
            [&conference_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((batch_instructor_id, meeting_name, meeting_code)) = row else {
        return Err(HandlerErr::not_found("conference not found")
            .with_details(json!({ "id": conference_id })));
    };
    let offering = Offering::load(conn, &batch_instructor_id)?;
    let is_host = offering
        .instructor_email
        .as_deref()
        .is_some_and(|host| host.eq_ignore_ascii_case(&email));

    let out = match meeting_code {
        Some(code) => json!({
            "role": match is_host {
                true => "host",
                false => "participant",
            },
            "meetingName": meeting_name,
            "roomId": code
        }),
        None if is_host => json!({
            "role": "host",
            "meetingName": meeting_name,
            "conferenceId": conference_id
        }),
        None => json!({
            "role": "denied",
            "meetingName": meeting_name,
            "message": "the host has not started this meeting yet"
        }),
    };
    Ok(out)
}

fn conferences_save_meeting_code(conn: &Connection, params: &Value) -> HandlerResult {
    let conference_id = get_required_str(params, "conferenceId")?;
    let meeting_code = get_required_str(params, "meetingCode")?;
    let n = conn
        .execute(
            "UPDATE video_conferences SET meeting_code = ? WHERE id = ?",
            (&meeting_code, &conference_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if n == 0 {
        return Err(HandlerErr::not_found("conference not found")
            .with_details(json!({ "id": conference_id })));
    }
    Ok(json!({ "ok": true, "meetingCode": meeting_code }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "conferences.create" => conferences_create,
        "conferences.list" => conferences_list,
        "conferences.delete" => conferences_delete,
        "conferences.join" => conferences_join,
        "conferences.saveMeetingCode" => conferences_save_meeting_code,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naive_and_offset_times_parse_to_utc() {
        let naive = parse_instant("2024-03-01T09:30").expect("naive");
        assert_eq!(stamp(naive), "2024-03-01T09:30:00Z");
        let offset = parse_instant("2024-03-01T16:00:00+06:30").expect("offset");
        assert_eq!(stamp(offset), "2024-03-01T09:30:00Z");
        assert!(parse_instant("next tuesday").is_none());
    }

    #[test]
    fn join_window_honours_early_minutes() {
        let now = parse_instant("2024-03-01T08:55:00Z").expect("now");
        let start = "2024-03-01T09:00:00Z";
        let end = "2024-03-01T10:00:00Z";
        assert!(!can_join(start, end, now, Duration::minutes(0)));
        assert!(can_join(start, end, now, Duration::minutes(10)));
        let late = parse_instant("2024-03-01T10:00:01Z").expect("late");
        assert!(!can_join(start, end, late, Duration::minutes(10)));
    }
}
