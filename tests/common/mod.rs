// Shared helpers for CLI integration tests

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Browser for live tests, chosen with TEST_BROWSER
#[allow(dead_code)]
pub fn get_test_browser() -> &'static str {
    match std::env::var("TEST_BROWSER") {
        Ok(browser) if browser == "chrome" => "chrome",
        _ => "firefox",
    }
}

/// Run the binary with an isolated home directory and no A11YPROBE_* variables
pub fn run_a11yprobe(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_a11yprobe"))
        .args(args)
        .env("HOME", home)
        .env_remove("A11YPROBE_BROWSER")
        .env_remove("A11YPROBE_WEBDRIVER_URL")
        .env_remove("A11YPROBE_HEADLESS")
        .output()
        .expect("Failed to execute a11yprobe")
}

/// Stdout parsed as JSON, plus the exit code
pub fn json_output(output: &Output) -> (Value, i32) {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json = serde_json::from_str(&stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({}): {}\nstderr: {}",
            e,
            stdout,
            String::from_utf8_lossy(&output.stderr)
        )
    });
    (json, output.status.code().unwrap_or(-1))
}

/// Write `contents` to `name` inside `dir`
pub fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("Failed to write fixture");
    path
}

pub mod fixtures {
    /// A toggle button, a menu button revealing a list and an inert heading
    #[allow(dead_code)]
    pub const WIDGET_PAGE: &str = r#"
    <!DOCTYPE html>
    <html>
    <head><title>Widgets</title></head>
    <body>
        <h1>Widgets</h1>
        <button id="toggle" aria-pressed="false"
            onclick="this.setAttribute('aria-pressed', this.getAttribute('aria-pressed') === 'true' ? 'false' : 'true')">
            Bold
        </button>
        <button id="menu" onclick="document.getElementById('items').hidden = !document.getElementById('items').hidden">
            Choose
        </button>
        <ul id="items" role="listbox" hidden>
            <li role="option">Small</li>
            <li role="option">Medium</li>
            <li role="option">Large</li>
        </ul>
        <button id="inert">Nothing</button>
    </body>
    </html>
    "#;

    /// A form reached by typing into a field
    #[allow(dead_code)]
    pub const FORM_PAGE: &str = r#"
    <!DOCTYPE html>
    <html>
    <head><title>Form</title></head>
    <body>
        <input id="q" name="query">
        <button id="go" onclick="document.getElementById('out').textContent = document.getElementById('q').value">Go</button>
        <p id="out"></p>
    </body>
    </html>
    "#;
}
