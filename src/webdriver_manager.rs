//! Discovering and starting WebDriver processes (geckodriver, chromedriver).

use anyhow::{Context, Result};
use serde_json::Value;
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::webdriver::BrowserType;

/// Polls of `/status` while a freshly spawned driver starts
const STARTUP_POLLS: u32 = 30;
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STATUS_TIMEOUT: Duration = Duration::from_secs(1);

/// What a driver's `/status` endpoint reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    /// Accepting new sessions
    Ready,
    /// Answering but not ready, usually because it already hosts a session
    Busy,
    Down,
}

impl DriverStatus {
    /// Interpret a W3C `/status` body
    pub fn from_body(body: &Value) -> Self {
        match body.pointer("/value/ready").and_then(Value::as_bool) {
            Some(true) => DriverStatus::Ready,
            _ => DriverStatus::Busy,
        }
    }
}

/// Driver status at `url`
pub async fn driver_status(url: &str) -> DriverStatus {
    let status_url = format!("{}/status", url);
    let response = match reqwest::Client::new()
        .get(&status_url)
        .timeout(STATUS_TIMEOUT)
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => response,
        _ => return DriverStatus::Down,
    };
    match response.json::<Value>().await {
        Ok(body) => DriverStatus::from_body(&body),
        Err(_) => DriverStatus::Busy,
    }
}

/// The endpoint answers at all
pub async fn is_driver_running(url: &str) -> bool {
    driver_status(url).await != DriverStatus::Down
}

struct DriverProcess {
    browser: BrowserType,
    child: Child,
    port: u16,
    url: String,
}

impl DriverProcess {
    fn stop(&mut self) {
        debug!("Stopping {} on port {}", self.browser.driver_binary(), self.port);
        #[cfg(unix)]
        kill_process_group(self.child.id());
        if let Err(e) = self.child.kill() {
            debug!("Driver on port {} already exited: {}", self.port, e);
        }
        let _ = self.child.wait();
    }
}

/// Drivers started by this process, stopped again on exit
#[derive(Default)]
pub struct WebDriverManager {
    processes: Mutex<Vec<DriverProcess>>,
}

impl WebDriverManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn processes(&self) -> MutexGuard<'_, Vec<DriverProcess>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// URL of a ready driver for `browser`, starting one if none is found
    ///
    /// Drivers we started come first, then the browser's usual port.
    pub async fn ensure_driver(&self, browser: &BrowserType) -> Result<String> {
        let managed: Vec<String> = self
            .processes()
            .iter()
            .filter(|p| p.browser == *browser)
            .map(|p| p.url.clone())
            .collect();
        for url in managed {
            if driver_status(&url).await == DriverStatus::Ready {
                debug!("Using managed WebDriver at {}", url);
                return Ok(url);
            }
        }

        let external = browser.get_webdriver_url();
        match driver_status(&external).await {
            DriverStatus::Ready => {
                debug!("Found external WebDriver at {}", external);
                return Ok(external);
            }
            DriverStatus::Busy => warn!("WebDriver at {} is not accepting sessions", external),
            DriverStatus::Down => {}
        }

        info!("WebDriver not detected, starting {}", browser.driver_binary());
        self.start_driver(browser).await
    }

    async fn start_driver(&self, browser: &BrowserType) -> Result<String> {
        let command = browser.driver_binary();
        if !command_exists(command) {
            anyhow::bail!(
                "{} not found in PATH. Install it or point {} at a running driver",
                command,
                crate::config::ENV_WEBDRIVER_URL
            );
        }

        let port = find_free_port(browser)?;
        let port_arg = match browser {
            BrowserType::Firefox => vec!["--port".to_string(), port.to_string()],
            BrowserType::Chrome => vec![format!("--port={}", port)],
        };

        let mut cmd = Command::new(command);
        cmd.args(&port_arg)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // Own process group so the browser dies with the driver
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to start {}", command))?;

        let url = format!("http://localhost:{}", port);
        self.processes().push(DriverProcess {
            browser: *browser,
            child,
            port,
            url: url.clone(),
        });

        for _ in 0..STARTUP_POLLS {
            if is_driver_running(&url).await {
                info!("{} started on port {}", command, port);
                return Ok(url);
            }
            sleep(STARTUP_POLL_INTERVAL).await;
        }

        self.stop_where(|p| p.port == port);
        anyhow::bail!("{} failed to start within timeout", command)
    }

    /// Stop every driver we started for `browser`
    pub fn kill_driver(&self, browser: &BrowserType) {
        self.stop_where(|p| p.browser == *browser);
    }

    /// Stop every managed driver
    pub fn stop_all(&self) {
        self.stop_where(|_| true);
    }

    fn stop_where<F>(&self, matches: F)
    where
        F: Fn(&DriverProcess) -> bool,
    {
        let mut processes = self.processes();
        let (mut stopping, kept): (Vec<_>, Vec<_>) =
            processes.drain(..).partition(|p| matches(p));
        *processes = kept;
        drop(processes);
        for process in &mut stopping {
            process.stop();
        }
    }

    pub fn managed_count(&self) -> usize {
        self.processes().len()
    }
}

impl Drop for WebDriverManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Check if a command exists in PATH
pub fn command_exists(command: &str) -> bool {
    #[cfg(unix)]
    let finder = "which";
    #[cfg(windows)]
    let finder = "where";

    Command::new(finder)
        .arg(command)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// First free preferred port for `browser`, else one the OS picks
pub fn find_free_port(browser: &BrowserType) -> Result<u16> {
    if let Some(port) = browser
        .preferred_ports()
        .into_iter()
        .find(|&p| !is_port_in_use(p))
    {
        debug!("Found free port {} for {:?}", port, browser);
        return Ok(port);
    }
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

pub fn is_port_in_use(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_err()
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    // SIGTERM first, then make sure
    for signal in ["-TERM", "-KILL"] {
        if let Err(e) = Command::new("kill")
            .args([signal, &format!("-{}", pgid)])
            .output()
        {
            debug!("Failed to signal process group {}: {}", pgid, e);
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

lazy_static::lazy_static! {
    pub static ref GLOBAL_WEBDRIVER_MANAGER: WebDriverManager = WebDriverManager::new();
}

#[cfg(test)]
#[path = "webdriver_manager_test.rs"]
mod webdriver_manager_test;
