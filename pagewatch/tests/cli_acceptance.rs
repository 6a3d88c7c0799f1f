use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::thread;
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_config,
            xdg_state,
        }
    }

    fn write_config(&self, server_url: &str) {
        let dir = self.xdg_config.join("pagewatch");
        fs::create_dir_all(&dir).expect("failed to create config dir");
        fs::write(
            dir.join("config.toml"),
            format!(
                "[monitor]\napp_id = \"shop\"\nserver_url = \"{}\"\ntimeout_ms = 2000\n",
                server_url
            ),
        )
        .expect("failed to write config");
    }

    fn write_events(&self, lines: &[&str]) -> PathBuf {
        let path = self.home.join("events.jsonl");
        fs::write(&path, lines.join("\n")).expect("failed to write events");
        path
    }
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    Command::new(PathBuf::from(assert_cmd::cargo::cargo_bin!("pagewatch")))
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env("NO_PROXY", "127.0.0.1,localhost")
        .env("no_proxy", "127.0.0.1,localhost")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute pagewatch: {e}"))
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn assert_success(args: &[&str], output: &Output) {
    assert!(
        output.status.success(),
        "pagewatch {:?} failed\nstdout:\n{}\nstderr:\n{}",
        args,
        stdout(output),
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Answers one request with `status`; yields the raw request text.
fn one_shot_collector(status: &'static str) -> (String, thread::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind collector");
    let url = format!("http://{}/collect", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let (mut socket, _) = listener.accept().expect("collector saw no request");
        let mut request = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).unwrap_or(0);
            if n == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&request).to_lowercase();
            if let Some(end) = text.find("\r\n\r\n") {
                let body_len = text[..end]
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= end + 4 + body_len {
                    break;
                }
            }
        }
        let response = format!(
            "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
            status
        );
        let _ = socket.write_all(response.as_bytes());
        String::from_utf8_lossy(&request).into_owned()
    });
    (url, handle)
}

#[test]
fn status_without_config_reports_missing_fields() {
    let env = CliTestEnv::new();
    let args = ["status"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let out = stdout(&output);
    assert!(out.contains("not found, using defaults"), "stdout:\n{out}");
    assert!(out.contains("Server URL:      <not set>"), "stdout:\n{out}");
    assert!(out.contains("Status:          not configured"), "stdout:\n{out}");
}

#[test]
fn status_reads_xdg_config() {
    let env = CliTestEnv::new();
    env.write_config("https://collect.example.com/events");
    let args = ["status"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let out = stdout(&output);
    assert!(out.contains("App ID:          shop"), "stdout:\n{out}");
    assert!(
        out.contains("Server URL:      https://collect.example.com/events"),
        "stdout:\n{out}"
    );
    assert!(out.contains("Timeout:         2000ms"), "stdout:\n{out}");
    assert!(out.contains("Status:          ready"), "stdout:\n{out}");
}

#[test]
fn send_posts_file_events_as_one_batch() {
    let env = CliTestEnv::new();
    let (url, collector) = one_shot_collector("200 OK");
    env.write_config(&url);
    let file = env.write_events(&[r#"{"name": "signup", "plan": "pro"}"#, "plain text line"]);

    let file_arg = file.to_string_lossy().into_owned();
    let args = ["send", "--file", file_arg.as_str()];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);
    assert!(stdout(&output).contains("Sent 2 events"));

    let request = collector.join().expect("collector thread panicked");
    assert!(request.starts_with("POST /collect"), "request:\n{request}");
    assert!(request.contains(r#""name":"signup""#), "request:\n{request}");
    assert!(request.contains(r#""message":"plain text line""#), "request:\n{request}");
    assert!(request.contains(r#""appId":"shop""#), "request:\n{request}");
}

#[test]
fn send_reports_rejected_batch() {
    let env = CliTestEnv::new();
    let (url, collector) = one_shot_collector("503 Service Unavailable");
    let file = env.write_events(&[r#"{"name": "signup"}"#]);

    let file_arg = file.to_string_lossy().into_owned();
    let args = [
        "--app-id",
        "shop",
        "--server-url",
        url.as_str(),
        "send",
        "--file",
        file_arg.as_str(),
    ];
    let output = run_bin(&env, &args);
    collector.join().expect("collector thread panicked");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("delivery failed"), "stderr:\n{stderr}");
    assert!(stderr.contains("HTTP 503"), "stderr:\n{stderr}");
}

#[test]
fn send_without_server_url_fails() {
    let env = CliTestEnv::new();
    let file = env.write_events(&[r#"{"name": "signup"}"#]);

    let file_arg = file.to_string_lossy().into_owned();
    let output = run_bin(&env, &["send", "--file", file_arg.as_str()]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid monitor configuration"), "stderr:\n{stderr}");
}
