use std::path::PathBuf;
use std::process::Command;

fn write_config(name: &str, body: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("parlay-cli-{}-{name}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join("Config.toml");
    std::fs::write(&path, body).expect("write config");
    path
}

fn check_config(path: &PathBuf) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_parlay"))
        .args(["check-config", "--config"])
        .arg(path)
        .env_remove("RUST_LOG")
        .output()
        .expect("run parlay")
}

#[test]
fn check_config_prints_effective_values() {
    let path = write_config(
        "valid",
        "[server]\nport = 9100\n\n[database]\nurl = \"postgresql://parlay:hunter2@db/parlay\"\n",
    );

    let output = check_config(&path);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"port\": 9100"));
    assert!(stdout.contains("configuration OK"));
    assert!(!stdout.contains("hunter2"));
}

#[test]
fn check_config_rejects_invalid_values() {
    let path = write_config("invalid", "[broadcast]\nqueue_capacity = 0\n");

    let output = check_config(&path);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("queue_capacity"));
}
