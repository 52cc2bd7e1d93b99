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
    let exe = env!("CARGO_BIN_EXE_studyd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn studyd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

struct Harness {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Harness {
    fn start() -> Self {
        let (child, stdin, reader) = spawn_sidecar();
        Self {
            child,
            stdin,
            reader,
            next_id: 0,
        }
    }

    fn request(
        &mut self,
        method: &str,
        actor: Option<&str>,
        params: serde_json::Value,
    ) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let mut payload = json!({ "id": id, "method": method, "params": params });
        if let Some(actor) = actor {
            payload["actor"] = json!(actor);
        }
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response");
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    fn expect_ok(
        &mut self,
        method: &str,
        actor: Option<&str>,
        params: serde_json::Value,
    ) -> serde_json::Value {
        let resp = self.request(method, actor, params);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            resp
        );
        resp["result"].clone()
    }

    fn finish(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
    }
}

fn str_of(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

fn open_with_admin(h: &mut Harness, workspace: &PathBuf) -> String {
    let opened = h.expect_ok(
        "workspace.select",
        None,
        json!({ "path": workspace.to_string_lossy() }),
    );
    str_of(&opened, "adminId")
}

#[test]
fn set_correct_text_upserts_the_single_answer_row() {
    let workspace = temp_dir("studyd-correct-text");
    let mut h = Harness::start();
    let admin = open_with_admin(&mut h, &workspace);

    let test = str_of(
        &h.expect_ok("tests.create", Some(&admin), json!({ "name": "History" })),
        "testId",
    );
    let question = str_of(
        &h.expect_ok(
            "questions.create",
            Some(&admin),
            json!({ "testId": test, "kind": "free_text", "prompt": "First president?" }),
        ),
        "questionId",
    );

    let first = h.expect_ok(
        "answers.setCorrectText",
        Some(&admin),
        json!({ "questionId": question, "text": "Washington" }),
    );
    assert_eq!(first["created"].as_bool(), Some(true));
    let answer_id = str_of(&first, "answerId");

    // Second call replaces the text in place instead of adding a row.
    let second = h.expect_ok(
        "answers.setCorrectText",
        Some(&admin),
        json!({ "questionId": question, "text": "George Washington" }),
    );
    assert_eq!(second["created"].as_bool(), Some(false));
    assert_eq!(str_of(&second, "answerId"), answer_id);

    let detail = h.expect_ok("tests.detail", Some(&admin), json!({ "testId": test }));
    let answers = detail["questions"][0]["answers"].as_array().expect("answers");
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0]["text"].as_str(), Some("George Washington"));

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn answer_methods_check_the_question_kind() {
    let workspace = temp_dir("studyd-answer-kinds");
    let mut h = Harness::start();
    let admin = open_with_admin(&mut h, &workspace);

    let test = str_of(
        &h.expect_ok("tests.create", Some(&admin), json!({ "name": "Mixed" })),
        "testId",
    );
    let free_q = str_of(
        &h.expect_ok(
            "questions.create",
            Some(&admin),
            json!({ "testId": test, "kind": "free_text", "prompt": "Say something" }),
        ),
        "questionId",
    );
    let choice_q = str_of(
        &h.expect_ok(
            "questions.create",
            Some(&admin),
            json!({ "testId": test, "kind": "choice", "prompt": "Pick something" }),
        ),
        "questionId",
    );

    let resp = h.request(
        "answers.addChoice",
        Some(&admin),
        json!({ "questionId": free_q, "text": "variant", "correct": true }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"));

    let resp = h.request(
        "answers.setCorrectText",
        Some(&admin),
        json!({ "questionId": choice_q, "text": "canonical" }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"));

    let resp = h.request(
        "questions.create",
        Some(&admin),
        json!({ "testId": test, "kind": "essay", "prompt": "Unsupported" }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"));

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn deleting_a_test_clears_questions_tries_and_lesson_links() {
    let workspace = temp_dir("studyd-test-delete");
    let mut h = Harness::start();
    let admin = open_with_admin(&mut h, &workspace);

    let student = str_of(
        &h.expect_ok(
            "students.create",
            Some(&admin),
            json!({ "email": "p@example.org", "firstName": "Pat", "lastName": "Pupil" }),
        ),
        "studentId",
    );
    let test = str_of(
        &h.expect_ok("tests.create", Some(&admin), json!({ "name": "Doomed" })),
        "testId",
    );
    let question = str_of(
        &h.expect_ok(
            "questions.create",
            Some(&admin),
            json!({ "testId": test, "kind": "free_text", "prompt": "Q" }),
        ),
        "questionId",
    );
    h.expect_ok(
        "answers.setCorrectText",
        Some(&admin),
        json!({ "questionId": question, "text": "A" }),
    );
    let lesson = str_of(
        &h.expect_ok(
            "lessons.create",
            Some(&admin),
            json!({ "name": "Linked", "kind": "practical", "testId": test }),
        ),
        "lessonId",
    );
    h.expect_ok(
        "attempts.submit",
        Some(&student),
        json!({ "testId": test, "answers": {} }),
    );

    h.expect_ok("tests.delete", Some(&admin), json!({ "testId": test }));

    let resp = h.request("tests.detail", Some(&admin), json!({ "testId": test }));
    assert_eq!(resp["error"]["code"].as_str(), Some("not_found"));

    // The lesson survives with the link cleared.
    let summary = h.expect_ok(
        "lessons.testSummary",
        Some(&admin),
        json!({ "lessonId": lesson }),
    );
    assert!(summary["testId"].is_null());
    assert_eq!(summary["bestScore"].as_f64(), Some(0.0));

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn question_lifecycle_keeps_detail_consistent() {
    let workspace = temp_dir("studyd-question-lifecycle");
    let mut h = Harness::start();
    let admin = open_with_admin(&mut h, &workspace);

    let test = str_of(
        &h.expect_ok("tests.create", Some(&admin), json!({ "name": "Editing" })),
        "testId",
    );
    let q1 = str_of(
        &h.expect_ok(
            "questions.create",
            Some(&admin),
            json!({ "testId": test, "kind": "choice", "prompt": "Old prompt" }),
        ),
        "questionId",
    );
    let q2 = str_of(
        &h.expect_ok(
            "questions.create",
            Some(&admin),
            json!({ "testId": test, "kind": "free_text", "prompt": "Keep me" }),
        ),
        "questionId",
    );
    h.expect_ok(
        "answers.addChoice",
        Some(&admin),
        json!({ "questionId": q1, "text": "A", "correct": true }),
    );
    h.expect_ok(
        "questions.update",
        Some(&admin),
        json!({ "questionId": q1, "patch": { "prompt": "New prompt" } }),
    );
    h.expect_ok("questions.delete", Some(&admin), json!({ "questionId": q1 }));

    let detail = h.expect_ok("tests.detail", Some(&admin), json!({ "testId": test }));
    let questions = detail["questions"].as_array().expect("questions");
    assert_eq!(questions.len(), 1);
    assert_eq!(questions[0]["questionId"].as_str(), Some(q2.as_str()));

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}
