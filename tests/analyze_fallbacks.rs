use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_guidanced");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn guidanced");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn zero_career_fields_degrade_to_placeholder_results() {
    let workspace = temp_dir("guidance-zero-fields");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "tests.create",
        json!({
            "title": "Fieldless",
            "description": "declares no career fields",
            "category": "Personality",
            "difficulty": "Easy",
            "careerFields": [],
            "active": true
        }),
    );
    let test_id = created.get("testId").and_then(|v| v.as_str()).unwrap().to_string();

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "questions.add",
        json!({
            "testId": test_id,
            "questionText": "Yes or no?",
            "questionType": "true-false",
            "options": [
                { "text": "Yes", "value": "yes" },
                { "text": "No", "value": "no" }
            ]
        }),
    );
    let question_id = added.get("questionId").and_then(|v| v.as_str()).unwrap().to_string();

    let started = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "responses.start",
        json!({ "userId": "u1", "testId": test_id }),
    );
    let response_id = started
        .get("responseId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "responses.submit",
        json!({
            "responseId": response_id,
            "answers": [{ "questionId": question_id, "response": "yes" }]
        }),
    );
    let analyzed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "responses.analyze",
        json!({ "responseId": response_id }),
    );

    assert_eq!(
        analyzed
            .get("recommendedFields")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
    assert_eq!(
        analyzed.get("strengths").and_then(|v| v.as_array()),
        Some(&vec![json!("General Aptitude")])
    );
    assert!(analyzed
        .get("bestMatch")
        .map(|v| v.is_null())
        .unwrap_or(true));
    assert!(analyzed
        .get("summary")
        .and_then(|v| v.as_str())
        .map(|s| !s.is_empty())
        .unwrap_or(false));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn skills_test_scores_three_of_four_as_75() {
    let workspace = temp_dir("guidance-skills-score");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "tests.create",
        json!({
            "title": "Logic Check",
            "description": "skills assessment",
            "category": "Skills",
            "difficulty": "Hard",
            "careerFields": ["Engineering"],
            "active": true
        }),
    );
    let test_id = created.get("testId").and_then(|v| v.as_str()).unwrap().to_string();

    let mut question_ids = Vec::new();
    for i in 0..4 {
        let added = request_ok(
            &mut stdin,
            &mut reader,
            &format!("q{}", i),
            "questions.add",
            json!({
                "testId": test_id,
                "questionText": format!("Puzzle {}", i + 1),
                "questionType": "multiple-choice",
                "options": [
                    { "text": "Right", "value": "right" },
                    { "text": "Wrong", "value": "wrong" }
                ],
                "correctAnswer": "right"
            }),
        );
        question_ids.push(
            added
                .get("questionId")
                .and_then(|v| v.as_str())
                .unwrap()
                .to_string(),
        );
    }

    let started = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "responses.start",
        json!({ "userId": "u2", "testId": test_id }),
    );
    let response_id = started
        .get("responseId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "responses.submit",
        json!({
            "responseId": response_id,
            "answers": [
                { "questionId": question_ids[0], "response": "right" },
                { "questionId": question_ids[1], "response": "right" },
                { "questionId": question_ids[2], "response": "right" },
                { "questionId": question_ids[3], "response": "wrong" }
            ]
        }),
    );
    assert_eq!(submitted.get("score").and_then(|v| v.as_f64()), Some(75.0));
    assert_eq!(
        submitted
            .get("results")
            .and_then(|r| r.get("details"))
            .and_then(|d| d.get("score"))
            .and_then(|v| v.as_str()),
        Some("75%")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn correct_answer_is_rejected_outside_skills_tests() {
    let workspace = temp_dir("guidance-correct-answer-guard");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "tests.create",
        json!({
            "title": "Interest Only",
            "description": "aptitude category",
            "category": "Career Interest",
            "difficulty": "Easy",
            "careerFields": ["Arts"],
            "active": true
        }),
    );
    let test_id = created.get("testId").and_then(|v| v.as_str()).unwrap().to_string();

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "questions.add",
        json!({
            "testId": test_id,
            "questionText": "Pick",
            "questionType": "multiple-choice",
            "options": [
                { "text": "A", "value": "a" },
                { "text": "B", "value": "b" }
            ],
            "correctAnswer": "a"
        }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn stale_answers_against_an_edited_test_are_tolerated() {
    let workspace = temp_dir("guidance-stale-answers");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "tests.create",
        json!({
            "title": "Editable",
            "description": "questions change mid-flight",
            "category": "Career Interest",
            "difficulty": "Easy",
            "careerFields": ["Engineering"],
            "active": true
        }),
    );
    let test_id = created.get("testId").and_then(|v| v.as_str()).unwrap().to_string();

    let kept = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "questions.add",
        json!({
            "testId": test_id,
            "questionText": "Kept question",
            "questionType": "multiple-choice",
            "options": [
                { "text": "Go", "value": "go", "score": 2, "careerFields": ["Engineering"] }
            ]
        }),
    );
    let kept_id = kept.get("questionId").and_then(|v| v.as_str()).unwrap().to_string();
    let doomed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "questions.add",
        json!({
            "testId": test_id,
            "questionText": "Doomed question",
            "questionType": "multiple-choice",
            "options": [
                { "text": "Go", "value": "go", "score": 5, "careerFields": ["Engineering"] }
            ]
        }),
    );
    let doomed_id = doomed.get("questionId").and_then(|v| v.as_str()).unwrap().to_string();

    let started = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "responses.start",
        json!({ "userId": "u3", "testId": test_id }),
    );
    let response_id = started
        .get("responseId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "responses.submit",
        json!({
            "responseId": response_id,
            "answers": [
                { "questionId": kept_id, "response": "go" },
                { "questionId": doomed_id, "response": "go" }
            ]
        }),
    );

    // Delete one question after submission, before analysis.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "questions.delete",
        json!({ "questionId": doomed_id }),
    );

    let analyzed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "responses.analyze",
        json!({ "responseId": response_id }),
    );
    let best = analyzed.get("bestMatch").expect("bestMatch");
    assert_eq!(best.get("field").and_then(|v| v.as_str()), Some("Engineering"));

    // Only the surviving question contributes to the stored aggregates.
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "responses.get",
        json!({ "responseId": response_id }),
    );
    let details = fetched
        .get("response")
        .and_then(|r| r.get("results"))
        .and_then(|r| r.get("details"))
        .expect("details");
    assert_eq!(
        details
            .get("aptitudeScores")
            .and_then(|v| v.get("Engineering"))
            .and_then(|v| v.as_f64()),
        Some(2.0)
    );
    assert_eq!(
        details
            .get("responseCounts")
            .and_then(|v| v.get("Engineering"))
            .and_then(|v| v.as_i64()),
        Some(1)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
