use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const EVENTS_LIST_DEFAULT_LIMIT: i64 = 50;
const EVENTS_LIST_MAX_LIMIT: i64 = 500;

fn handle_events_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(EVENTS_LIST_DEFAULT_LIMIT);
    if limit <= 0 || limit > EVENTS_LIST_MAX_LIMIT {
        return err(
            &req.id,
            "bad_params",
            format!("limit must be between 1 and {}", EVENTS_LIST_MAX_LIMIT),
            Some(json!({ "limit": limit })),
        );
    }

    let mut stmt = match conn.prepare(
        "SELECT id, type, user_id, entity_id, entity_name, details, status, timestamp
         FROM system_events ORDER BY timestamp DESC LIMIT ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([limit], |row| {
            let id: String = row.get(0)?;
            let event_type: String = row.get(1)?;
            let user_id: Option<String> = row.get(2)?;
            let entity_id: Option<String> = row.get(3)?;
            let entity_name: Option<String> = row.get(4)?;
            let details: Option<String> = row.get(5)?;
            let status: String = row.get(6)?;
            let timestamp: String = row.get(7)?;
            Ok(json!({
                "id": id,
                "type": event_type,
                "userId": user_id,
                "entityId": entity_id,
                "entityName": entity_name,
                "details": details,
                "status": status,
                "timestamp": timestamp
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(events) => ok(&req.id, json!({ "events": events })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "events.list" => Some(handle_events_list(state, req)),
        _ => None,
    }
}
