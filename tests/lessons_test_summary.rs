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

#[test]
fn lesson_summary_reports_class_best_and_user_best() {
    let workspace = temp_dir("studyd-lesson-summary");
    let mut h = Harness::start();

    let opened = h.expect_ok(
        "workspace.select",
        None,
        json!({ "path": workspace.to_string_lossy() }),
    );
    let admin = str_of(&opened, "adminId");

    let strong = str_of(
        &h.expect_ok(
            "students.create",
            Some(&admin),
            json!({ "email": "strong@example.org", "firstName": "Sid", "lastName": "Strong" }),
        ),
        "studentId",
    );
    let weak = str_of(
        &h.expect_ok(
            "students.create",
            Some(&admin),
            json!({ "email": "weak@example.org", "firstName": "Wil", "lastName": "Weak" }),
        ),
        "studentId",
    );

    let test = str_of(
        &h.expect_ok("tests.create", Some(&admin), json!({ "name": "Quiz" })),
        "testId",
    );
    let question = str_of(
        &h.expect_ok(
            "questions.create",
            Some(&admin),
            json!({ "testId": test, "kind": "free_text", "prompt": "2 + 2?" }),
        ),
        "questionId",
    );
    let answer = str_of(
        &h.expect_ok(
            "answers.setCorrectText",
            Some(&admin),
            json!({ "questionId": question, "text": "4" }),
        ),
        "answerId",
    );
    let lesson = str_of(
        &h.expect_ok(
            "lessons.create",
            Some(&admin),
            json!({ "name": "Arithmetic", "kind": "practical", "testId": test }),
        ),
        "lessonId",
    );

    // Before anyone tries, both bests read 0 like an untouched gradebook.
    let summary = h.expect_ok(
        "lessons.testSummary",
        Some(&admin),
        json!({ "lessonId": lesson, "userId": strong }),
    );
    assert_eq!(summary["bestScore"].as_f64(), Some(0.0));
    assert_eq!(summary["userBestScore"].as_f64(), Some(0.0));

    h.expect_ok(
        "attempts.submit",
        Some(&strong),
        json!({ "testId": test, "answers": { answer.as_str(): "4" } }),
    );
    h.expect_ok(
        "attempts.submit",
        Some(&weak),
        json!({ "testId": test, "answers": { answer.as_str(): "5" } }),
    );

    let summary = h.expect_ok(
        "lessons.testSummary",
        Some(&admin),
        json!({ "lessonId": lesson, "userId": weak }),
    );
    assert_eq!(summary["testId"].as_str(), Some(test.as_str()));
    assert!((summary["bestScore"].as_f64().expect("best") - 100.0).abs() < 1e-9);
    assert_eq!(summary["userBestScore"].as_f64(), Some(0.0));

    let summary = h.expect_ok(
        "lessons.testSummary",
        Some(&admin),
        json!({ "lessonId": lesson, "userId": strong }),
    );
    assert!((summary["userBestScore"].as_f64().expect("best") - 100.0).abs() < 1e-9);

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn lesson_without_a_test_reports_nothing_to_score() {
    let workspace = temp_dir("studyd-lesson-no-test");
    let mut h = Harness::start();

    let opened = h.expect_ok(
        "workspace.select",
        None,
        json!({ "path": workspace.to_string_lossy() }),
    );
    let admin = str_of(&opened, "adminId");

    let lesson = str_of(
        &h.expect_ok(
            "lessons.create",
            Some(&admin),
            json!({ "name": "Reading", "kind": "lecture" }),
        ),
        "lessonId",
    );

    let summary = h.expect_ok(
        "lessons.testSummary",
        Some(&admin),
        json!({ "lessonId": lesson }),
    );
    assert!(summary["testId"].is_null());
    assert_eq!(summary["bestScore"].as_f64(), Some(0.0));
    assert!(summary["userBestScore"].is_null());

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}
