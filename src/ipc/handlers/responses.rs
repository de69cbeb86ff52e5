use crate::engine::{self, Answer, Question, QuestionType};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
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

fn db_err(e: impl ToString) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

struct TestRow {
    title: String,
    career_fields: Vec<String>,
}

fn load_test(conn: &Connection, test_id: &str) -> Result<Option<TestRow>, HandlerErr> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT title, career_fields FROM tests WHERE id = ?",
            [test_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((title, career_fields_raw)) = row else {
        return Ok(None);
    };
    let career_fields: Vec<String> =
        serde_json::from_str(&career_fields_raw).map_err(|e| HandlerErr {
            code: "corrupt_data",
            message: format!("stored careerFields are not valid JSON: {}", e),
            details: None,
        })?;
    Ok(Some(TestRow {
        title,
        career_fields,
    }))
}

fn load_questions(conn: &Connection, test_id: &str) -> Result<Vec<Question>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, question_text, question_type, options, correct_answer, order_index
             FROM questions WHERE test_id = ? ORDER BY order_index",
        )
        .map_err(db_err)?;
    let raw_rows = stmt
        .query_map([test_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut questions = Vec::with_capacity(raw_rows.len());
    for (id, question_text, type_raw, options_raw, correct_answer, order_index) in raw_rows {
        let question_type: QuestionType =
            serde_json::from_value(serde_json::Value::String(type_raw)).map_err(|e| HandlerErr {
                code: "corrupt_data",
                message: format!("stored questionType is not recognized: {}", e),
                details: Some(json!({ "questionId": id })),
            })?;
        let options = serde_json::from_str(&options_raw).map_err(|e| HandlerErr {
            code: "corrupt_data",
            message: format!("stored options are not valid JSON: {}", e),
            details: Some(json!({ "questionId": id })),
        })?;
        questions.push(Question {
            id,
            question_text,
            question_type,
            options,
            correct_answer,
            order_index,
        });
    }
    Ok(questions)
}

struct ResponseRow {
    id: String,
    user_id: String,
    test_id: String,
    completed: bool,
    started_at: String,
    completed_at: Option<String>,
    answers_raw: String,
    score: Option<f64>,
    results_raw: Option<String>,
}

fn load_response(conn: &Connection, response_id: &str) -> Result<Option<ResponseRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, user_id, test_id, completed, started_at, completed_at, answers, score, results
         FROM responses WHERE id = ?",
        [response_id],
        |r| {
            Ok(ResponseRow {
                id: r.get(0)?,
                user_id: r.get(1)?,
                test_id: r.get(2)?,
                completed: r.get::<_, i64>(3)? != 0,
                started_at: r.get(4)?,
                completed_at: r.get(5)?,
                answers_raw: r.get(6)?,
                score: r.get(7)?,
                results_raw: r.get(8)?,
            })
        },
    )
    .optional()
    .map_err(db_err)
}

fn response_json(row: &ResponseRow) -> serde_json::Value {
    let answers: serde_json::Value =
        serde_json::from_str(&row.answers_raw).unwrap_or_else(|_| json!([]));
    let results: serde_json::Value = row
        .results_raw
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or(serde_json::Value::Null);
    json!({
        "id": row.id,
        "userId": row.user_id,
        "testId": row.test_id,
        "completed": row.completed,
        "startedAt": row.started_at,
        "completedAt": row.completed_at,
        "answers": answers,
        "score": row.score,
        "results": results
    })
}

fn handle_start(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let user_id = match req.params.get("userId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing userId", None),
    };
    let test_id = match req.params.get("testId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing testId", None),
    };

    match load_test(conn, &test_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "test not found", None),
        Err(e) => return e.response(&req.id),
    }

    // One in-progress attempt per (user, test); resume it instead of forking.
    let existing: Option<(String, String)> = match conn
        .query_row(
            "SELECT id, started_at FROM responses
             WHERE user_id = ? AND test_id = ? AND completed = 0
             ORDER BY started_at LIMIT 1",
            (&user_id, &test_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some((response_id, started_at)) = existing {
        return ok(
            &req.id,
            json!({ "responseId": response_id, "startedAt": started_at, "resumed": true }),
        );
    }

    let response_id = Uuid::new_v4().to_string();
    let started_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO responses(id, user_id, test_id, completed, started_at, answers)
         VALUES(?, ?, ?, 0, ?, '[]')",
        (&response_id, &user_id, &test_id, &started_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "responses" })),
        );
    }

    ok(
        &req.id,
        json!({ "responseId": response_id, "startedAt": started_at, "resumed": false }),
    )
}

fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let response_id = match req.params.get("responseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing responseId", None),
    };
    let answers_raw = match req.params.get("answers") {
        Some(v) => v.clone(),
        None => return err(&req.id, "bad_params", "missing answers", None),
    };
    let answers: Vec<Answer> = match serde_json::from_value(answers_raw) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("invalid answers: {}", e),
                None,
            )
        }
    };

    let response = match load_response(conn, &response_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "test response not found", None),
        Err(e) => return e.response(&req.id),
    };
    let test = match load_test(conn, &response.test_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "test not found", None),
        Err(e) => return e.response(&req.id),
    };
    let questions = match load_questions(conn, &response.test_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let score = engine::correctness_score(&questions, &answers);

    // Phase one stores a coarse snapshot; responses.analyze refines it with
    // the full confidence ranking.
    let score_display = match score {
        Some(s) => format!("{}%", s.round() as i64),
        None => "Not scored".to_string(),
    };
    let results = json!({
        "summary": format!("You completed the {} test.", test.title),
        "recommendedFields": test.career_fields,
        "strengths": ["Analytical thinking", "Problem solving"],
        "details": {
            "score": score_display,
            "responseCount": answers.len()
        }
    });

    let completed_at = chrono::Utc::now().to_rfc3339();
    let answers_json = match serde_json::to_string(&answers) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };
    let results_json = results.to_string();

    if let Err(e) = conn.execute(
        "UPDATE responses
         SET completed = 1, completed_at = ?, answers = ?, score = ?, results = ?
         WHERE id = ?",
        (&completed_at, &answers_json, score, &results_json, &response_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let _ = crate::db::log_event(
        conn,
        "test_completed",
        Some(&response.user_id),
        Some(&response.test_id),
        Some(&test.title),
        Some(&format!("{} questions answered", answers.len())),
    );

    ok(
        &req.id,
        json!({ "responseId": response_id, "score": score, "results": results }),
    )
}

fn handle_analyze(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let response_id = match req.params.get("responseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing responseId", None),
    };

    let response = match load_response(conn, &response_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "test response not found", None),
        Err(e) => return e.response(&req.id),
    };
    let test = match load_test(conn, &response.test_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "test not found", None),
        Err(e) => return e.response(&req.id),
    };
    let questions = match load_questions(conn, &response.test_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let answers: Vec<Answer> = match serde_json::from_str(&response.answers_raw) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "corrupt_data",
                format!("stored answers are not valid JSON: {}", e),
                None,
            )
        }
    };

    let aggregates = engine::aggregate(&test.career_fields, &questions, &answers);
    let results = engine::finalize(&test.career_fields, &aggregates);

    let results_json = match serde_json::to_string(&results) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "internal", e.to_string(), None),
    };
    let completed_at = chrono::Utc::now().to_rfc3339();

    // The refined snapshot fully replaces the phase-one results. Recomputing
    // from the same answers is idempotent, so last write wins is safe here.
    if let Err(e) = conn.execute(
        "UPDATE responses SET completed = 1, completed_at = ?, results = ? WHERE id = ?",
        (&completed_at, &results_json, &response_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "responseId": response_id,
            "recommendedFields": results.recommended_fields,
            "strengths": results.strengths,
            "bestMatch": results.best_match,
            "summary": results.summary
        }),
    )
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let response_id = match req.params.get("responseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing responseId", None),
    };

    match load_response(conn, &response_id) {
        Ok(Some(row)) => ok(&req.id, json!({ "response": response_json(&row) })),
        Ok(None) => err(&req.id, "not_found", "test response not found", None),
        Err(e) => e.response(&req.id),
    }
}

fn handle_list_for_user(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let user_id = match req.params.get("userId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing userId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT r.id, r.user_id, r.test_id, r.completed, r.started_at, r.completed_at,
                r.answers, r.score, r.results, t.title
         FROM responses r LEFT JOIN tests t ON t.id = r.test_id
         WHERE r.user_id = ?
         ORDER BY r.started_at",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&user_id], |r| {
            let row = ResponseRow {
                id: r.get(0)?,
                user_id: r.get(1)?,
                test_id: r.get(2)?,
                completed: r.get::<_, i64>(3)? != 0,
                started_at: r.get(4)?,
                completed_at: r.get(5)?,
                answers_raw: r.get(6)?,
                score: r.get(7)?,
                results_raw: r.get(8)?,
            };
            let test_title: Option<String> = r.get(9)?;
            let mut value = response_json(&row);
            value["testTitle"] =
                json!(test_title.unwrap_or_else(|| "Unknown Test".to_string()));
            Ok(value)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(responses) => ok(&req.id, json!({ "responses": responses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "responses.start" => Some(handle_start(state, req)),
        "responses.submit" => Some(handle_submit(state, req)),
        "responses.analyze" => Some(handle_analyze(state, req)),
        "responses.get" => Some(handle_get(state, req)),
        "responses.listForUser" => Some(handle_list_for_user(state, req)),
        _ => None,
    }
}
