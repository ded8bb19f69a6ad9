// CLI behaviour that needs no browser

use tempfile::TempDir;

mod common;
use common::{json_output, run_a11yprobe, write_file};

const DESCRIPTOR: &str = r##"[
    {
        "url": "https://example.com/",
        "activities": [
            {"name": "Open menu", "element_click_order": ["#menu"]}
        ]
    }
]"##;

#[test]
fn test_version_json() {
    let home = TempDir::new().unwrap();
    let output = run_a11yprobe(home.path(), &["version"]);
    let (json, code) = json_output(&output);

    assert_eq!(code, 0);
    assert_eq!(json["name"], "a11yprobe");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_version_simple() {
    let home = TempDir::new().unwrap();
    let output = run_a11yprobe(home.path(), &["version", "--format", "simple"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("a11yprobe v"));
}

#[test]
fn test_missing_descriptor_file() {
    let home = TempDir::new().unwrap();
    let missing = home.path().join("absent.json");
    let output = run_a11yprobe(home.path(), &["replay", missing.to_str().unwrap()]);
    let (json, code) = json_output(&output);

    assert_eq!(code, 1);
    assert_eq!(json["error"], true);
    assert_eq!(json["exit_code"], 1);
    assert!(json["message"].as_str().unwrap().contains("Failed to load"));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
}

#[test]
fn test_unknown_activity_name() {
    let home = TempDir::new().unwrap();
    let file = write_file(&home, "pages.json", DESCRIPTOR);
    let output = run_a11yprobe(
        home.path(),
        &["detect", file.to_str().unwrap(), "--activity", "Close menu"],
    );
    let (json, code) = json_output(&output);

    assert_eq!(code, 1);
    assert!(
        json["message"]
            .as_str()
            .unwrap()
            .contains("No activity named 'Close menu'")
    );
}

#[test]
fn test_malformed_descriptor() {
    let home = TempDir::new().unwrap();
    let file = write_file(&home, "pages.json", "{\"url\": ");
    let output = run_a11yprobe(home.path(), &["replay", file.to_str().unwrap()]);
    let (json, code) = json_output(&output);

    assert_eq!(code, 1);
    assert_eq!(json["error"], true);
}

#[test]
fn test_explicit_config_must_exist() {
    let home = TempDir::new().unwrap();
    let file = write_file(&home, "pages.json", DESCRIPTOR);
    let config = home.path().join("nope.json");
    let output = run_a11yprobe(
        home.path(),
        &[
            "replay",
            file.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
        ],
    );
    let (json, code) = json_output(&output);

    assert_eq!(code, 1);
    assert!(
        json["message"]
            .as_str()
            .unwrap()
            .contains("Failed to read config file")
    );
}

#[test]
fn test_invalid_viewport_flag() {
    let home = TempDir::new().unwrap();
    let file = write_file(&home, "pages.json", DESCRIPTOR);
    let output = run_a11yprobe(
        home.path(),
        &["replay", file.to_str().unwrap(), "--viewport", "wide"],
    );
    let (json, code) = json_output(&output);

    assert_eq!(code, 1);
    assert!(json["message"].as_str().unwrap().contains("Invalid viewport format"));
}

#[test]
fn test_invalid_browser_in_environment() {
    let home = TempDir::new().unwrap();
    let file = write_file(&home, "pages.json", DESCRIPTOR);
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_a11yprobe"))
        .args(["replay", file.to_str().unwrap()])
        .env("HOME", home.path())
        .env("A11YPROBE_BROWSER", "netscape")
        .output()
        .unwrap();
    let (json, code) = json_output(&output);

    assert_eq!(code, 1);
    assert!(json["message"].as_str().unwrap().contains("A11YPROBE_BROWSER"));
}

#[test]
fn test_unreachable_webdriver_exit_code() {
    let home = TempDir::new().unwrap();
    let output = run_a11yprobe(
        home.path(),
        &[
            "wait-load",
            "https://example.com/",
            "--webdriver-url",
            "http://127.0.0.1:9",
        ],
    );
    let (json, code) = json_output(&output);

    assert_eq!(code, 4);
    assert_eq!(json["exit_code"], 4);
    assert!(
        json["message"]
            .as_str()
            .unwrap()
            .contains("WebDriver connection failed")
    );
}
