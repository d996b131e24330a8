use assert_cmd::Command;
use std::fs;
use tempfile::TempDir;

fn count_rows(db: &std::path::Path, sql: &str) -> i64 {
    let conn = rusqlite::Connection::open(db).unwrap();
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

fn sqlbatch(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sqlbatch").unwrap();
    // keep a user's own config file out of the tests
    cmd.arg("--config").arg(dir.path().join("config.toml"));
    cmd
}

fn setup() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("config.toml"), "[logging]\nlevel = \"warn\"\n").unwrap();
    fs::write(
        dir.path().join("schema.sql"),
        "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL);",
    )
    .unwrap();
    dir
}

#[test]
fn script_is_committed() {
    let dir = setup();
    let db = dir.path().join("app.db");

    sqlbatch(&dir)
        .arg(&db)
        .arg(dir.path().join("schema.sql"))
        .assert()
        .success();

    fs::write(
        dir.path().join("insert.sql"),
        "INSERT INTO notes (body) VALUES (@body); INSERT INTO notes (body) VALUES (@body || '!');",
    )
    .unwrap();
    fs::write(dir.path().join("params.json"), r#"{"body": "hello"}"#).unwrap();

    sqlbatch(&dir)
        .arg(&db)
        .arg(dir.path().join("insert.sql"))
        .arg(dir.path().join("params.json"))
        .assert()
        .success();

    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM notes"), 2);
}

#[test]
fn failing_script_is_rolled_back() {
    let dir = setup();
    let db = dir.path().join("app.db");

    sqlbatch(&dir)
        .arg(&db)
        .arg(dir.path().join("schema.sql"))
        .assert()
        .success();

    fs::write(
        dir.path().join("broken.sql"),
        "INSERT INTO notes (body) VALUES ('kept?'); INSERT INTO notes (body) VALUES (NULL);",
    )
    .unwrap();

    let output = sqlbatch(&dir)
        .arg(&db)
        .arg(dir.path().join("broken.sql"))
        .assert()
        .failure()
        .get_output()
        .clone();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error 4000"), "stderr was: {}", stderr);

    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM notes"), 0);
}

#[test]
fn missing_parameter_fails() {
    let dir = setup();
    let db = dir.path().join("app.db");
    fs::write(dir.path().join("params.json"), r#"{"other": 1}"#).unwrap();
    fs::write(dir.path().join("select.sql"), "SELECT @missing;").unwrap();

    sqlbatch(&dir)
        .arg(&db)
        .arg(dir.path().join("select.sql"))
        .arg(dir.path().join("params.json"))
        .assert()
        .failure();
}

#[test]
fn usage_errors() {
    Command::cargo_bin("sqlbatch")
        .unwrap()
        .arg("only-one-arg")
        .assert()
        .code(2);
}
