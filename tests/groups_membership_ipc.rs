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
fn a_teacher_owns_at_most_one_group() {
    let workspace = temp_dir("studyd-group-owner");
    let mut h = Harness::start();

    let opened = h.expect_ok(
        "workspace.select",
        None,
        json!({ "path": workspace.to_string_lossy() }),
    );
    let admin = str_of(&opened, "adminId");

    let teacher_a = str_of(
        &h.expect_ok(
            "teachers.create",
            Some(&admin),
            json!({ "email": "a@example.org", "firstName": "Ada", "lastName": "Alpha" }),
        ),
        "teacherId",
    );
    let teacher_b = str_of(
        &h.expect_ok(
            "teachers.create",
            Some(&admin),
            json!({ "email": "b@example.org", "firstName": "Bea", "lastName": "Beta" }),
        ),
        "teacherId",
    );

    let group_one = str_of(
        &h.expect_ok(
            "groups.create",
            Some(&admin),
            json!({ "name": "G-1", "ownerId": teacher_a }),
        ),
        "groupId",
    );

    // Same teacher cannot take a second group.
    let resp = h.request(
        "groups.create",
        Some(&admin),
        json!({ "name": "G-2", "ownerId": teacher_a }),
    );
    assert_eq!(resp["ok"].as_bool(), Some(false));
    assert_eq!(resp["error"]["code"].as_str(), Some("conflict"));
    assert!(resp["error"]["message"]
        .as_str()
        .unwrap_or_default()
        .contains("already owns"));

    // An owned group cannot be handed to a second teacher via teachers.update.
    let resp = h.request(
        "teachers.update",
        Some(&admin),
        json!({ "teacherId": teacher_b, "groupId": group_one }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("conflict"));
    assert!(resp["error"]["message"]
        .as_str()
        .unwrap_or_default()
        .contains("already has a teacher"));

    // Releasing the group frees it up for reassignment.
    h.expect_ok(
        "teachers.update",
        Some(&admin),
        json!({ "teacherId": teacher_a, "groupId": null }),
    );
    h.expect_ok(
        "teachers.update",
        Some(&admin),
        json!({ "teacherId": teacher_b, "groupId": group_one }),
    );

    let mine = h.expect_ok("groups.mine", Some(&teacher_b), json!({}));
    assert_eq!(mine["group"]["groupId"].as_str(), Some(group_one.as_str()));
    let mine_a = h.expect_ok("groups.mine", Some(&teacher_a), json!({}));
    assert!(mine_a["group"].is_null());

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn a_student_belongs_to_at_most_one_group() {
    let workspace = temp_dir("studyd-group-member");
    let mut h = Harness::start();

    let opened = h.expect_ok(
        "workspace.select",
        None,
        json!({ "path": workspace.to_string_lossy() }),
    );
    let admin = str_of(&opened, "adminId");

    let group_one = str_of(
        &h.expect_ok("groups.create", Some(&admin), json!({ "name": "M-1" })),
        "groupId",
    );
    let group_two = str_of(
        &h.expect_ok("groups.create", Some(&admin), json!({ "name": "M-2" })),
        "groupId",
    );
    let student = str_of(
        &h.expect_ok(
            "students.create",
            Some(&admin),
            json!({
                "email": "s@example.org",
                "firstName": "Sam",
                "lastName": "Single",
                "groupId": group_one
            }),
        ),
        "studentId",
    );

    // Assigning the second group moves the membership instead of adding one.
    h.expect_ok(
        "students.update",
        Some(&admin),
        json!({ "studentId": student, "groupId": group_two }),
    );

    let one = h.expect_ok("groups.members", Some(&admin), json!({ "groupId": group_one }));
    assert_eq!(one["members"].as_array().map(|a| a.len()), Some(0));
    let two = h.expect_ok("groups.members", Some(&admin), json!({ "groupId": group_two }));
    assert_eq!(two["members"].as_array().map(|a| a.len()), Some(1));

    // Null clears the membership entirely.
    h.expect_ok(
        "students.update",
        Some(&admin),
        json!({ "studentId": student, "groupId": null }),
    );
    let two = h.expect_ok("groups.members", Some(&admin), json!({ "groupId": group_two }));
    assert_eq!(two["members"].as_array().map(|a| a.len()), Some(0));

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn teacher_excludes_students_from_their_own_group_only() {
    let workspace = temp_dir("studyd-group-exclude");
    let mut h = Harness::start();

    let opened = h.expect_ok(
        "workspace.select",
        None,
        json!({ "path": workspace.to_string_lossy() }),
    );
    let admin = str_of(&opened, "adminId");

    let teacher = str_of(
        &h.expect_ok(
            "teachers.create",
            Some(&admin),
            json!({ "email": "t@example.org", "firstName": "Tess", "lastName": "Tutor" }),
        ),
        "teacherId",
    );
    let group = str_of(
        &h.expect_ok(
            "groups.create",
            Some(&admin),
            json!({ "name": "X-1", "ownerId": teacher }),
        ),
        "groupId",
    );
    let insider = str_of(
        &h.expect_ok(
            "students.create",
            Some(&admin),
            json!({
                "email": "in@example.org",
                "firstName": "Inna",
                "lastName": "Inside",
                "groupId": group
            }),
        ),
        "studentId",
    );
    let outsider = str_of(
        &h.expect_ok(
            "students.create",
            Some(&admin),
            json!({
                "email": "out@example.org",
                "firstName": "Otto",
                "lastName": "Outside"
            }),
        ),
        "studentId",
    );

    // Not a member: nothing to remove.
    let resp = h.request(
        "groups.removeStudent",
        Some(&teacher),
        json!({ "studentId": outsider }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("not_found"));

    h.expect_ok(
        "groups.removeStudent",
        Some(&teacher),
        json!({ "studentId": insider }),
    );
    let mine = h.expect_ok("groups.mine", Some(&teacher), json!({}));
    assert_eq!(mine["members"].as_array().map(|a| a.len()), Some(0));

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}
