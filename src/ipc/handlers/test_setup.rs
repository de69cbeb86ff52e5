use crate::engine::{QuestionOption, QuestionType};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn test_exists(conn: &Connection, test_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM tests WHERE id = ?", [test_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn parse_career_fields(raw: &serde_json::Value) -> Result<Vec<String>, HandlerErr> {
    let Some(arr) = raw.as_array() else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "careerFields must be an array of strings".to_string(),
            details: None,
        });
    };
    let mut fields = Vec::with_capacity(arr.len());
    for v in arr {
        let Some(s) = v.as_str() else {
            return Err(HandlerErr {
                code: "bad_params",
                message: "careerFields must be an array of strings".to_string(),
                details: Some(json!({ "value": v })),
            });
        };
        let s = s.trim();
        if s.is_empty() {
            return Err(HandlerErr {
                code: "bad_params",
                message: "career field names must not be empty".to_string(),
                details: None,
            });
        }
        fields.push(s.to_string());
    }
    Ok(fields)
}

fn test_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let title: String = row.get(1)?;
    let description: String = row.get(2)?;
    let time_limit: Option<f64> = row.get(3)?;
    let category: String = row.get(4)?;
    let difficulty: String = row.get(5)?;
    let active: i64 = row.get(6)?;
    let image_url: Option<String> = row.get(7)?;
    let career_fields_raw: String = row.get(8)?;
    let created_at: String = row.get(9)?;
    let career_fields: serde_json::Value =
        serde_json::from_str(&career_fields_raw).unwrap_or_else(|_| json!([]));
    Ok(json!({
        "id": id,
        "title": title,
        "description": description,
        "timeLimit": time_limit,
        "category": category,
        "difficulty": difficulty,
        "active": active != 0,
        "imageUrl": image_url,
        "careerFields": career_fields,
        "createdAt": created_at
    }))
}

fn handle_tests_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let active_only = req
        .params
        .get("activeOnly")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let sql = if active_only {
        "SELECT id, title, description, time_limit, category, difficulty, active, image_url, career_fields, created_at
         FROM tests WHERE active = 1 ORDER BY created_at"
    } else {
        "SELECT id, title, description, time_limit, category, difficulty, active, image_url, career_fields, created_at
         FROM tests ORDER BY created_at"
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], test_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(tests) => ok(&req.id, json!({ "tests": tests })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_tests_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let title = match req.params.get("title").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing title", None),
    };
    let description = match req.params.get("description").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing description", None),
    };
    let category = match req.params.get("category").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing category", None),
    };
    let difficulty = match req.params.get("difficulty").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing difficulty", None),
    };
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let time_limit = req.params.get("timeLimit").and_then(|v| v.as_f64());
    let image_url = req
        .params
        .get("imageUrl")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let career_fields = match req.params.get("careerFields") {
        Some(raw) => match parse_career_fields(raw) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        },
        None => return err(&req.id, "bad_params", "missing careerFields", None),
    };

    let test_id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    let career_fields_json = match serde_json::to_string(&career_fields) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };

    if let Err(e) = conn.execute(
        "INSERT INTO tests(id, title, description, time_limit, category, difficulty, active, image_url, career_fields, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &test_id,
            &title,
            &description,
            time_limit,
            &category,
            &difficulty,
            active as i64,
            &image_url,
            &career_fields_json,
            &created_at,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "tests" })),
        );
    }

    let _ = crate::db::log_event(
        conn,
        "test_created",
        None,
        Some(&test_id),
        Some(&title),
        Some(&format!("{} test, {} difficulty", category, difficulty)),
    );

    ok(&req.id, json!({ "testId": test_id }))
}

fn handle_tests_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let test_id = match req.params.get("testId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing testId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    match test_exists(conn, &test_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "test not found", None),
        Err(e) => return e.response(&req.id),
    }

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("title") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.title must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "title must not be empty", None);
        }
        set_parts.push("title = ?".into());
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("description") {
        let Some(s) = v.as_str() else {
            return err(
                &req.id,
                "bad_params",
                "patch.description must be a string",
                None,
            );
        };
        set_parts.push("description = ?".into());
        bind_values.push(Value::Text(s.to_string()));
    }
    if let Some(v) = patch.get("timeLimit") {
        if v.is_null() {
            set_parts.push("time_limit = ?".into());
            bind_values.push(Value::Null);
        } else {
            let Some(n) = v.as_f64() else {
                return err(
                    &req.id,
                    "bad_params",
                    "patch.timeLimit must be a number or null",
                    None,
                );
            };
            set_parts.push("time_limit = ?".into());
            bind_values.push(Value::Real(n));
        }
    }
    if let Some(v) = patch.get("category") {
        let Some(s) = v.as_str() else {
            return err(
                &req.id,
                "bad_params",
                "patch.category must be a string",
                None,
            );
        };
        set_parts.push("category = ?".into());
        bind_values.push(Value::Text(s.trim().to_string()));
    }
    if let Some(v) = patch.get("difficulty") {
        let Some(s) = v.as_str() else {
            return err(
                &req.id,
                "bad_params",
                "patch.difficulty must be a string",
                None,
            );
        };
        set_parts.push("difficulty = ?".into());
        bind_values.push(Value::Text(s.trim().to_string()));
    }
    if let Some(v) = patch.get("active") {
        let Some(b) = v.as_bool() else {
            return err(&req.id, "bad_params", "patch.active must be a bool", None);
        };
        set_parts.push("active = ?".into());
        bind_values.push(Value::Integer(b as i64));
    }
    if let Some(v) = patch.get("imageUrl") {
        if v.is_null() {
            set_parts.push("image_url = ?".into());
            bind_values.push(Value::Null);
        } else {
            let Some(s) = v.as_str() else {
                return err(
                    &req.id,
                    "bad_params",
                    "patch.imageUrl must be a string or null",
                    None,
                );
            };
            set_parts.push("image_url = ?".into());
            bind_values.push(Value::Text(s.to_string()));
        }
    }
    if let Some(v) = patch.get("careerFields") {
        let fields = match parse_career_fields(v) {
            Ok(f) => f,
            Err(e) => return e.response(&req.id),
        };
        let encoded = match serde_json::to_string(&fields) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
        };
        set_parts.push("career_fields = ?".into());
        bind_values.push(Value::Text(encoded));
    }

    if set_parts.is_empty() {
        return err(&req.id, "bad_params", "patch has no recognized keys", None);
    }

    let sql = format!("UPDATE tests SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(Value::Text(test_id.clone()));

    match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(_) => ok(&req.id, json!({ "testId": test_id })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_tests_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let test_id = match req.params.get("testId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing testId", None),
    };

    match test_exists(conn, &test_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "test not found", None),
        Err(e) => return e.response(&req.id),
    }

    // Dependent rows first to keep the foreign keys happy.
    if let Err(e) = conn.execute("DELETE FROM responses WHERE test_id = ?", [&test_id]) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = conn.execute("DELETE FROM questions WHERE test_id = ?", [&test_id]) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    match conn.execute("DELETE FROM tests WHERE id = ?", [&test_id]) {
        Ok(_) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_questions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let test_id = match req.params.get("testId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing testId", None),
    };

    match test_exists(conn, &test_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "test not found", None),
        Err(e) => return e.response(&req.id),
    }

    let mut stmt = match conn.prepare(
        "SELECT id, question_text, question_type, options, correct_answer, order_index
         FROM questions WHERE test_id = ? ORDER BY order_index",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&test_id], |row| {
            let id: String = row.get(0)?;
            let question_text: String = row.get(1)?;
            let question_type: String = row.get(2)?;
            let options_raw: String = row.get(3)?;
            let correct_answer: Option<String> = row.get(4)?;
            let order_index: i64 = row.get(5)?;
            let options: serde_json::Value =
                serde_json::from_str(&options_raw).unwrap_or_else(|_| json!([]));
            Ok(json!({
                "id": id,
                "questionText": question_text,
                "questionType": question_type,
                "options": options,
                "correctAnswer": correct_answer,
                "orderIndex": order_index
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(questions) => ok(&req.id, json!({ "questions": questions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_questions_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let test_id = match req.params.get("testId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing testId", None),
    };
    let question_text = match req.params.get("questionText").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing questionText", None),
    };
    let question_type_raw = match req.params.get("questionType") {
        Some(v) => v.clone(),
        None => return err(&req.id, "bad_params", "missing questionType", None),
    };
    let question_type: QuestionType = match serde_json::from_value(question_type_raw) {
        Ok(v) => v,
        Err(_) => {
            return err(
                &req.id,
                "bad_params",
                "questionType must be one of: multiple-choice, true-false, scale",
                None,
            )
        }
    };
    let options_raw = match req.params.get("options") {
        Some(v) => v.clone(),
        None => return err(&req.id, "bad_params", "missing options", None),
    };
    let options: Vec<QuestionOption> = match serde_json::from_value(options_raw) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("invalid options: {}", e),
                None,
            )
        }
    };
    if options.is_empty() {
        return err(&req.id, "bad_params", "options must not be empty", None);
    }
    for opt in &options {
        if let Some(score) = opt.score {
            if score < 0.0 {
                return err(
                    &req.id,
                    "bad_params",
                    "option scores must not be negative",
                    Some(json!({ "value": opt.value, "score": score })),
                );
            }
        }
    }
    let mut seen_values = std::collections::HashSet::new();
    for opt in &options {
        if !seen_values.insert(opt.value.as_str()) {
            return err(
                &req.id,
                "bad_params",
                "option values must be unique within a question",
                Some(json!({ "value": opt.value })),
            );
        }
    }
    let correct_answer = req
        .params
        .get("correctAnswer")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let category: Option<String> = match conn
        .query_row("SELECT category FROM tests WHERE id = ?", [&test_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(category) = category else {
        return err(&req.id, "not_found", "test not found", None);
    };

    // Correct answers only make sense on skills-assessment tests; an
    // aptitude test is scored through career-field weights instead.
    if correct_answer.is_some() && !category.eq_ignore_ascii_case("skills") {
        return err(
            &req.id,
            "bad_params",
            "correctAnswer is only allowed on skills-category tests",
            Some(json!({ "category": category })),
        );
    }
    if let Some(answer) = correct_answer.as_deref() {
        if !options.iter().any(|o| o.value == answer) {
            return err(
                &req.id,
                "bad_params",
                "correctAnswer must match one of the option values",
                Some(json!({ "correctAnswer": answer })),
            );
        }
    }

    // New questions land at the end of the test.
    let order_index: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(order_index), -1) + 1 FROM questions WHERE test_id = ?",
        [&test_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let question_id = Uuid::new_v4().to_string();
    let question_type_text = match serde_json::to_value(question_type) {
        Ok(serde_json::Value::String(s)) => s,
        _ => return err(&req.id, "bad_params", "invalid questionType", None),
    };
    let options_json = match serde_json::to_string(&options) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };

    if let Err(e) = conn.execute(
        "INSERT INTO questions(id, test_id, question_text, question_type, options, correct_answer, order_index)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &question_id,
            &test_id,
            &question_text,
            &question_type_text,
            &options_json,
            &correct_answer,
            order_index,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "questions" })),
        );
    }

    ok(
        &req.id,
        json!({ "questionId": question_id, "orderIndex": order_index }),
    )
}

fn handle_questions_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let question_id = match req.params.get("questionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing questionId", None),
    };

    match conn.execute("DELETE FROM questions WHERE id = ?", [&question_id]) {
        Ok(0) => err(&req.id, "not_found", "question not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tests.list" => Some(handle_tests_list(state, req)),
        "tests.create" => Some(handle_tests_create(state, req)),
        "tests.update" => Some(handle_tests_update(state, req)),
        "tests.delete" => Some(handle_tests_delete(state, req)),
        "questions.list" => Some(handle_questions_list(state, req)),
        "questions.add" => Some(handle_questions_add(state, req)),
        "questions.delete" => Some(handle_questions_delete(state, req)),
        _ => None,
    }
}
