//! Translate recorded commands into browser actions.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use super::keys::parse_key_sequence;
use super::{Activity, Command, ReplayError, Replayer};
use crate::element::ElementRef;
use crate::interaction::{InteractionKind, retry_interaction};
use crate::session::{Locator, Session, SessionError, SessionResult};
use crate::types::ViewportSize;

const NOT_FOUND: &str = "The element was not found on the page.";
const POPUP_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Every command the replayer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Open,
    Close,
    Click,
    Type,
    SendKeys,
    Select,
    SetWindowSize,
    SelectWindow,
    SelectFrame,
    MouseOver,
    MouseOut,
    RunScript,
    StoreWindowHandle,
    WaitForPopup,
    ClosePopup,
}

const COMMANDS: &[(&str, CommandKind)] = &[
    ("open", CommandKind::Open),
    ("close", CommandKind::Close),
    ("click", CommandKind::Click),
    ("type", CommandKind::Type),
    ("sendKeys", CommandKind::SendKeys),
    ("select", CommandKind::Select),
    ("setWindowSize", CommandKind::SetWindowSize),
    ("selectWindow", CommandKind::SelectWindow),
    ("selectFrame", CommandKind::SelectFrame),
    ("mouseOver", CommandKind::MouseOver),
    ("mouseOut", CommandKind::MouseOut),
    ("runScript", CommandKind::RunScript),
    ("storeWindowHandle", CommandKind::StoreWindowHandle),
    ("waitForPopup", CommandKind::WaitForPopup),
    ("closePopup", CommandKind::ClosePopup),
];

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        COMMANDS
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| s.to_string())
    }
}

/// Why a single command failed
#[derive(Debug)]
enum StepError {
    /// Reported to the caller as a command failure
    Soft(String),
    Session(SessionError),
}

impl From<SessionError> for StepError {
    fn from(e: SessionError) -> Self {
        StepError::Session(e)
    }
}

type StepResult<T = ()> = Result<T, StepError>;

fn soft<T>(message: impl Into<String>) -> StepResult<T> {
    Err(StepError::Soft(message.into()))
}

/// State of one replay: the session, its root window and the named windows
pub struct ReplayRun<'a> {
    replayer: &'a Replayer,
    activity: &'a Activity,
    session: &'a dyn Session,
    root_window: String,
    windows: HashMap<String, String>,
}

impl<'a> ReplayRun<'a> {
    pub async fn new(
        replayer: &'a Replayer,
        activity: &'a Activity,
        session: &'a dyn Session,
    ) -> SessionResult<Self> {
        let root_window = session.current_window().await?;
        Ok(ReplayRun {
            replayer,
            activity,
            session,
            root_window,
            windows: HashMap::new(),
        })
    }

    /// Window handles stored by name during this replay
    pub fn stored_windows(&self) -> &HashMap<String, String> {
        &self.windows
    }

    /// Execute one command
    pub async fn dispatch(&mut self, index: usize, command: &Command) -> Result<(), ReplayError> {
        let kind: CommandKind =
            command
                .command
                .parse()
                .map_err(|name| ReplayError::IllegalArgument {
                    index,
                    command: name,
                })?;

        let result = match kind {
            CommandKind::Open => self.open(command).await,
            CommandKind::Close => self.close_current_window().await,
            CommandKind::Click => self.click(command).await,
            CommandKind::Type | CommandKind::SendKeys => self.send_keys(command).await,
            CommandKind::Select => self.select(command).await,
            CommandKind::SetWindowSize => self.set_window_size(command).await,
            CommandKind::SelectWindow => self.select_window(command).await,
            CommandKind::SelectFrame => self.select_frame(command).await,
            CommandKind::MouseOver => self.mouse_over(command).await,
            CommandKind::MouseOut => self.mouse_out(command).await,
            CommandKind::RunScript => self.run_script(command).await,
            CommandKind::StoreWindowHandle => self.store_window_handle(command).await,
            CommandKind::WaitForPopup => self.wait_for_popup().await,
            CommandKind::ClosePopup => self.close_popup().await,
        };

        result.map_err(|e| match e {
            StepError::Session(e) if e.is_connection() => ReplayError::Connection(e),
            StepError::Session(e) => ReplayError::command_failed(index, command, e.to_string()),
            StepError::Soft(message) => ReplayError::command_failed(index, command, message),
        })
    }

    /// First of `target` and `targets` that becomes visible within the element wait
    async fn find_target(&self, command: &Command) -> StepResult<ElementRef> {
        let wait = self.replayer.timing().element_wait;
        for raw in std::iter::once(&command.target).chain(command.targets.iter()) {
            let locator = match Locator::parse(raw) {
                Ok(locator) => locator,
                Err(e) => {
                    debug!("Skipping target {}: {}", raw, e);
                    continue;
                }
            };
            match self.session.wait_for_visible(&locator, wait).await {
                Ok(Some(handle)) => match ElementRef::from_handle(self.session, handle).await {
                    Ok(element) => return Ok(element),
                    Err(e) if e.is_lost() => debug!("{} vanished while wrapping it", locator),
                    Err(e) => return Err(e.into()),
                },
                Ok(None) => debug!("{} not visible within {:?}", locator, wait),
                Err(e) if e.is_connection() => return Err(e.into()),
                Err(e) => debug!("Lookup of {} failed: {}", locator, e),
            }
        }
        soft(NOT_FOUND)
    }

    fn root_index(&self, handles: &[String]) -> usize {
        handles
            .iter()
            .position(|h| *h == self.root_window)
            .unwrap_or(0)
    }

    /// Handle `offset` windows after the replay's root window
    async fn window_after_root(&self, offset: usize) -> StepResult<Option<String>> {
        let handles = self.session.window_handles().await?;
        let index = self.root_index(&handles) + offset;
        Ok(handles.get(index).cloned())
    }

    async fn open(&mut self, command: &Command) -> StepResult {
        let url = self.activity.resolve_url(&command.target);
        self.replayer
            .open(self.session, self.activity, Some(&url))
            .await?;
        Ok(())
    }

    async fn click(&mut self, command: &Command) -> StepResult {
        let element = self.find_target(command).await?;
        let element = &element;
        let session = self.session;
        let timing = *self.replayer.timing();

        let handle = element.get_element(session).await?;
        session.scroll_into_view(&handle).await?;
        sleep(timing.scroll_settle).await;

        let clicked = retry_interaction(self.replayer.retry(), InteractionKind::Click, || async move {
            let handle = element.get_element(session).await?;
            session.click(&handle).await
        })
        .await;
        match clicked {
            Ok(()) => {}
            Err(e) if e.is_non_interactable() => return soft(e.to_string()),
            Err(e) => return Err(e.into()),
        }
        sleep(timing.post_action).await;

        if command.opens_window
            && let Some(name) = &command.window_handle_name
        {
            let Some(handle) = self.window_after_root(1).await? else {
                return soft(format!("No window was opened for {name}"));
            };
            debug!("Storing window {} as {}", handle, name);
            self.windows.insert(name.clone(), handle);
            sleep(timing.post_action).await;
        }
        Ok(())
    }

    async fn send_keys(&mut self, command: &Command) -> StepResult {
        let element = self.find_target(command).await?;
        let element = &element;
        let session = self.session;
        let segments = match parse_key_sequence(&command.value) {
            Ok(segments) => segments,
            Err(e) => return soft(e.to_string()),
        };

        for segment in segments {
            let keys = segment.to_keys();
            let keys = keys.as_str();
            retry_interaction(self.replayer.retry(), InteractionKind::SendKeys, || async move {
                let handle = element.get_element(session).await?;
                session.send_keys(&handle, keys).await
            })
            .await?;
            sleep(self.replayer.timing().post_action).await;
        }
        Ok(())
    }

    async fn select(&mut self, command: &Command) -> StepResult {
        let element = self.find_target(command).await?;
        let handle = element.get_element(self.session).await?;
        let invalid = || soft(format!("Invalid value={} format.", command.value));

        let Some((mode, argument)) = command.value.split_once('=') else {
            return invalid();
        };
        match mode {
            "index" => {
                let Ok(index) = argument.trim().parse::<usize>() else {
                    return invalid();
                };
                self.session.select_by_index(&handle, index).await?;
            }
            "value" => self.session.select_by_value(&handle, argument).await?,
            "label" if argument.contains('*') => {
                let needle = argument.replace('*', "");
                let Some(label) = self
                    .find_option(&element, |text, _| text.contains(&needle))
                    .await?
                else {
                    return invalid();
                };
                self.session.select_by_label(&handle, &label).await?;
            }
            "label" => self.session.select_by_label(&handle, argument).await?,
            "id" => {
                let Some(label) = self
                    .find_option(&element, |_, id| id == Some(argument))
                    .await?
                else {
                    return invalid();
                };
                self.session.select_by_label(&handle, &label).await?;
            }
            _ => return invalid(),
        }
        sleep(self.replayer.timing().post_action).await;
        Ok(())
    }

    /// Label of the first `<option>` accepted by `accept(text, id)`
    async fn find_option<F>(&self, select: &ElementRef, accept: F) -> StepResult<Option<String>>
    where
        F: Fn(&str, Option<&str>) -> bool,
    {
        let options = select
            .find_all_within(self.session, &Locator::css("option"))
            .await?;
        for option in &options {
            let text = option.text(self.session).await?;
            if accept(&text, option.cached_attribute("id")) {
                return Ok(Some(text));
            }
        }
        Ok(None)
    }

    async fn set_window_size(&mut self, command: &Command) -> StepResult {
        if command.target.is_empty() {
            self.session.maximize_window().await?;
        } else {
            let Ok(size) = ViewportSize::parse(&command.target) else {
                return soft("Invalid window size format.");
            };
            self.session.set_window_size(size.width, size.height).await?;
        }
        sleep(self.replayer.timing().post_action).await;
        Ok(())
    }

    async fn select_window(&mut self, command: &Command) -> StepResult {
        let target = command.target.as_str();
        if let Some(title) = target.strip_prefix("title=") {
            match self.session.switch_to_window(title).await {
                Ok(()) => {}
                Err(SessionError::NoSuchWindow(_)) => {
                    let Some(handle) = self.find_window_named(title).await? else {
                        return soft(format!("Window with this name={title} was not found!"));
                    };
                    self.session.switch_to_window(&handle).await?;
                }
                Err(e) => return Err(e.into()),
            }
        } else if let Some(tab) = target.strip_prefix("tab=") {
            match tab {
                "close" => self.close_current_window().await?,
                "closeallother" => self.close_other_windows().await?,
                "open" => {
                    self.session.new_tab().await?;
                    self.session.navigate(&command.value).await?;
                }
                offset => {
                    let Ok(offset) = offset.parse::<usize>() else {
                        return soft(format!("The {target} has an incorrect format"));
                    };
                    let Some(handle) = self.window_after_root(offset).await? else {
                        return soft(format!("No window at {target}"));
                    };
                    self.session.switch_to_window(&handle).await?;
                }
            }
        } else if target.starts_with("handle=") {
            let name = stored_name(target);
            let Some(handle) = name.and_then(|n| self.windows.get(n)).cloned() else {
                return soft(format!("The {target} has an incorrect format"));
            };
            self.session.switch_to_window(&handle).await?;
        } else {
            return soft(format!("The {target} has an incorrect format"));
        }
        Ok(())
    }

    /// Handle of the window whose `window.name` equals `name`; the current window is kept
    async fn find_window_named(&self, name: &str) -> StepResult<Option<String>> {
        let original = self.session.current_window().await?;
        let mut found = None;
        for handle in self.session.window_handles().await? {
            self.session.switch_to_window(&handle).await?;
            if self.session.window_name().await? == name {
                found = Some(handle);
                break;
            }
        }
        self.session.switch_to_window(&original).await?;
        Ok(found)
    }

    /// Close the current window, or quit when it is the last one
    async fn close_current_window(&mut self) -> StepResult {
        let handles = self.session.window_handles().await?;
        if handles.len() <= 1 {
            self.windows.clear();
            info!("Closing the last window; quitting the session");
            self.session.quit().await?;
            return Ok(());
        }

        let current = self.session.current_window().await?;
        self.windows.retain(|_, handle| *handle != current);
        self.session.close_window().await?;

        let next = if current != self.root_window && handles.contains(&self.root_window) {
            self.root_window.clone()
        } else {
            handles
                .iter()
                .find(|h| **h != current)
                .cloned()
                .unwrap_or_default()
        };
        self.session.switch_to_window(&next).await?;
        Ok(())
    }

    async fn close_other_windows(&mut self) -> StepResult {
        let original = self.session.current_window().await?;
        for handle in self.session.window_handles().await? {
            if handle != original {
                self.session.switch_to_window(&handle).await?;
                self.session.close_window().await?;
            }
        }
        self.windows.retain(|_, handle| *handle == original);
        self.session.switch_to_window(&original).await?;
        Ok(())
    }

    async fn select_frame(&mut self, command: &Command) -> StepResult {
        let target = command.target.as_str();
        if let Some(index) = target.strip_prefix("index=") {
            let Ok(index) = index.parse::<u16>() else {
                return soft(format!("Invalid frame target {target}"));
            };
            self.session.switch_to_frame(index).await?;
        } else if target == "relative=top" {
            self.session.switch_to_default_content().await?;
        } else if target == "relative=parent" {
            self.session.switch_to_parent_frame().await?;
        } else {
            return soft(format!("Invalid frame target {target}"));
        }
        sleep(self.replayer.timing().post_action).await;
        Ok(())
    }

    async fn mouse_over(&mut self, command: &Command) -> StepResult {
        let element = self.find_target(command).await?;
        let element = &element;
        let session = self.session;
        let settle = self.replayer.timing().scroll_settle;

        let handle = element.get_element(session).await?;
        session.scroll_into_view(&handle).await?;
        sleep(settle).await;
        retry_interaction(self.replayer.retry(), InteractionKind::Hover, || async move {
            let handle = element.get_element(session).await?;
            session.hover(&handle).await
        })
        .await?;
        sleep(settle).await;
        Ok(())
    }

    /// Move the pointer just outside the element's bottom-right corner
    async fn mouse_out(&mut self, command: &Command) -> StepResult {
        let element = self.find_target(command).await?;
        if !element.is_visible(self.session).await? {
            return Ok(());
        }
        let handle = element.get_element(self.session).await?;
        let rect = self.session.rect(&handle).await?;
        let dx = (rect.width / 2.0 + 10.0) as i32;
        let dy = (rect.height / 2.0 + 10.0) as i32;
        self.session.move_pointer_by(&handle, dx, dy).await?;
        sleep(self.replayer.timing().post_action).await;
        Ok(())
    }

    async fn run_script(&mut self, command: &Command) -> StepResult {
        self.session
            .execute_script(&command.target, Vec::new())
            .await?;
        Ok(())
    }

    async fn store_window_handle(&mut self, command: &Command) -> StepResult {
        let target = command.target.as_str();
        if let Some(title) = target.strip_prefix("title=") {
            let Some(handle) = self.find_window_named(title).await? else {
                return soft(format!("Window with this name={title} was not found!"));
            };
            self.windows.insert(command.value.clone(), handle);
        } else if let Some(offset) = target.strip_prefix("tab=") {
            let Ok(offset) = offset.parse::<usize>() else {
                return soft(format!("The {target} has an incorrect format"));
            };
            let Some(handle) = self.window_after_root(offset).await? else {
                return soft(format!("No window at {target}"));
            };
            self.windows.insert(command.value.clone(), handle);
        } else {
            let current = self.session.current_window().await?;
            self.windows.insert(target.to_string(), current);
        }
        Ok(())
    }

    /// Wait for a window to appear after the root window
    async fn wait_for_popup(&mut self) -> StepResult {
        let deadline = Instant::now() + self.replayer.timing().element_wait;
        loop {
            if self.window_after_root(1).await?.is_some() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return soft("No popup window appeared.");
            }
            sleep(POPUP_POLL_INTERVAL).await;
        }
    }

    async fn close_popup(&mut self) -> StepResult {
        if self.session.dismiss_alert().await? {
            debug!("Dismissed a popup dialog");
        }
        Ok(())
    }
}

/// `handle=${name}` → `name`
fn stored_name(target: &str) -> Option<&str> {
    let start = target.find('{')? + 1;
    let end = target[start..].find('}')? + start;
    Some(&target[start..end])
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod dispatch_test;
