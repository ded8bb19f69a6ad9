//! In-memory browser session for unit tests.
//!
//! `FakeSession` keeps a small DOM tree per registered URL, a list of windows
//! and an alert flag. Nodes carry scripted effects that fire on click, Enter or
//! hover, which is enough to exercise replay, click classification and widget
//! detection without a browser.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::session::{
    ElementHandle, Locator, NodeDescription, ScriptArg, Session, SessionError, SessionFactory,
    SessionResult,
};
use crate::types::Rect;

pub type NodeId = usize;

const ENTER_KEY: char = '\u{E007}';

/// Scripted reaction of a node to activation
#[derive(Debug, Clone)]
pub enum Effect {
    /// Flip an attribute between two values
    ToggleAttr {
        name: String,
        on: String,
        off: String,
    },
    /// Toggle the `hidden` attribute of the node with this id
    ToggleHidden(String),
    /// Remove the `hidden` attribute of the node with this id
    Reveal(String),
    /// Append a `<ul>` with this many `<li>` to the body; a second activation removes it
    InsertList(usize),
    /// Detach the node itself
    RemoveSelf,
    Navigate(String),
    OpenTab(String),
    Alert,
    NotInteractable,
    /// Intercept this many clicks before letting them through
    Intercepted(usize),
}

#[derive(Debug, Clone)]
struct FakeNode {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    on_click: Vec<Effect>,
    on_hover: Vec<Effect>,
    /// `checked` property of checkbox and radio inputs
    checked: bool,
}

/// A document template registered for a URL
#[derive(Debug, Clone)]
pub struct FakePage {
    nodes: Vec<FakeNode>,
}

impl Default for FakePage {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePage {
    /// `html > body`
    pub fn new() -> Self {
        let mut page = FakePage { nodes: Vec::new() };
        page.nodes.push(FakeNode::new("html", None));
        page.add(0, "body");
        page
    }

    pub fn body(&self) -> NodeId {
        1
    }

    pub fn add(&mut self, parent: NodeId, tag: &str) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(FakeNode::new(tag, Some(parent)));
        self.nodes[parent].children.push(id);
        id
    }

    pub fn add_with(&mut self, parent: NodeId, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        let id = self.add(parent, tag);
        for (name, value) in attrs {
            self.set_attr(id, name, value);
        }
        id
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) -> &mut Self {
        self.nodes[node]
            .attrs
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn set_text(&mut self, node: NodeId, text: &str) -> &mut Self {
        self.nodes[node].text = text.to_string();
        self
    }

    pub fn on_click(&mut self, node: NodeId, effect: Effect) -> &mut Self {
        self.nodes[node].on_click.push(effect);
        self
    }

    pub fn on_hover(&mut self, node: NodeId, effect: Effect) -> &mut Self {
        self.nodes[node].on_hover.push(effect);
        self
    }

    fn is_attached(&self, node: NodeId) -> bool {
        let mut current = node;
        loop {
            match self.nodes[current].parent {
                None => return current == 0,
                Some(parent) => {
                    if !self.nodes[parent].children.contains(&current) {
                        return false;
                    }
                    current = parent;
                }
            }
        }
    }

    fn is_displayed(&self, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if self.nodes[id].attrs.contains_key("hidden") {
                return false;
            }
            current = self.nodes[id].parent;
        }
        true
    }

    fn rect(&self, node: NodeId) -> Rect {
        if self.is_displayed(node) {
            Rect::new(0.0, node as f64 * 20.0, 100.0, 20.0)
        } else {
            Rect::new(0.0, 0.0, 0.0, 0.0)
        }
    }

    fn preorder(&self, from: NodeId, out: &mut Vec<NodeId>) {
        out.push(from);
        for &child in &self.nodes[from].children {
            self.preorder(child, out);
        }
    }

    fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.preorder(node, &mut out);
        out.remove(0);
        out
    }

    fn find_by_id(&self, id: &str) -> Option<NodeId> {
        let mut all = Vec::new();
        self.preorder(0, &mut all);
        all.into_iter()
            .find(|&n| self.nodes[n].attrs.get("id").map(String::as_str) == Some(id))
    }

    fn nth_of_type(&self, node: NodeId) -> usize {
        let Some(parent) = self.nodes[node].parent else {
            return 1;
        };
        let tag = &self.nodes[node].tag;
        self.nodes[parent]
            .children
            .iter()
            .take_while(|&&c| c != node)
            .filter(|&&c| &self.nodes[c].tag == tag)
            .count()
            + 1
    }

    fn outer_html(&self, node: NodeId) -> String {
        let n = &self.nodes[node];
        let mut html = format!("<{}", n.tag);
        for (name, value) in &n.attrs {
            html.push_str(&format!(" {name}=\"{value}\""));
        }
        html.push('>');
        html.push_str(&n.text);
        for &child in &n.children {
            html.push_str(&self.outer_html(child));
        }
        html.push_str(&format!("</{}>", n.tag));
        html
    }

    fn text(&self, node: NodeId) -> String {
        let mut text = self.nodes[node].text.clone();
        for &child in &self.nodes[node].children {
            text.push_str(&self.text(child));
        }
        text
    }

    fn segment(&self, node: NodeId) -> String {
        let tag = &self.nodes[node].tag;
        if matches!(tag.as_str(), "html" | "head" | "body") {
            tag.clone()
        } else {
            format!("{}:nth-of-type({})", tag, self.nth_of_type(node))
        }
    }

    fn structural_path(&self, node: NodeId) -> String {
        let mut path = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            path.push(self.segment(id));
            current = self.nodes[id].parent;
        }
        path.reverse();
        path.join(" > ")
    }

    fn id_path(&self, node: NodeId) -> Option<String> {
        let mut path = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            if let Some(element_id) = self.nodes[id].attrs.get("id") {
                path.push(format!("{}#{}", self.nodes[id].tag, element_id));
                path.reverse();
                return Some(path.join(" > "));
            }
            path.push(self.segment(id));
            current = self.nodes[id].parent;
        }
        None
    }

    fn describe(&self, node: NodeId) -> NodeDescription {
        NodeDescription {
            tag_name: self.nodes[node].tag.clone(),
            outer_html: self.outer_html(node),
            rect: self.rect(node),
            displayed: self.is_displayed(node),
            selector_no_id: self.structural_path(node),
            selector: self.id_path(node),
            attributes: self.nodes[node].attrs.clone(),
            checked: self.nodes[node]
                .is_checkable()
                .then_some(self.nodes[node].checked),
        }
    }

    fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node].parent {
            self.nodes[parent].children.retain(|&c| c != node);
        }
    }

    fn query_css(&self, scope: NodeId, selector: &str) -> SessionResult<Vec<NodeId>> {
        let groups = parse_selector(selector)
            .ok_or_else(|| SessionError::Other(format!("invalid selector: {selector}")))?;
        // document scope includes <html> itself
        let mut candidates = Vec::new();
        self.preorder(scope, &mut candidates);
        if scope != 0 {
            candidates.remove(0);
        }
        Ok(candidates
            .into_iter()
            .filter(|&n| groups.iter().any(|chain| self.matches_chain(n, chain)))
            .collect())
    }

    fn matches_chain(&self, node: NodeId, chain: &[Compound]) -> bool {
        let Some((last, rest)) = chain.split_last() else {
            return false;
        };
        if !self.matches_compound(node, last) {
            return false;
        }
        if rest.is_empty() {
            return true;
        }
        match self.nodes[node].parent {
            Some(parent) => self.matches_chain(parent, rest),
            None => false,
        }
    }

    fn matches_compound(&self, node: NodeId, compound: &Compound) -> bool {
        let n = &self.nodes[node];
        if let Some(tag) = &compound.tag
            && tag != "*"
            && tag != &n.tag
        {
            return false;
        }
        if let Some(id) = &compound.id
            && n.attrs.get("id") != Some(id)
        {
            return false;
        }
        for class in &compound.classes {
            let has = n
                .attrs
                .get("class")
                .is_some_and(|c| c.split_whitespace().any(|x| x == class));
            if !has {
                return false;
            }
        }
        if let Some(nth) = compound.nth_of_type
            && self.nth_of_type(node) != nth
        {
            return false;
        }
        for (name, value) in &compound.attrs {
            match (n.attrs.get(name), value) {
                (None, _) => return false,
                (Some(actual), Some(expected)) if actual != expected => return false,
                _ => {}
            }
        }
        true
    }
}

impl FakeNode {
    fn new(tag: &str, parent: Option<NodeId>) -> Self {
        FakeNode {
            tag: tag.to_string(),
            attrs: BTreeMap::new(),
            text: String::new(),
            children: Vec::new(),
            parent,
            on_click: Vec::new(),
            on_hover: Vec::new(),
            checked: false,
        }
    }

    fn is_checkable(&self) -> bool {
        self.tag == "input"
            && matches!(
                self.attrs.get("type").map(String::as_str),
                Some("checkbox") | Some("radio")
            )
    }
}

#[derive(Debug, Default, Clone)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    nth_of_type: Option<usize>,
    attrs: Vec<(String, Option<String>)>,
}

/// Comma groups of `>`-chained compound selectors
fn parse_selector(selector: &str) -> Option<Vec<Vec<Compound>>> {
    selector
        .split(',')
        .map(|group| {
            group
                .split('>')
                .map(|part| parse_compound(part.trim()))
                .collect::<Option<Vec<_>>>()
        })
        .collect()
}

fn parse_compound(text: &str) -> Option<Compound> {
    if text.is_empty() {
        return None;
    }
    let mut compound = Compound::default();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    let ident = |i: &mut usize| {
        let start = *i;
        while *i < chars.len() && (chars[*i].is_alphanumeric() || "-_*".contains(chars[*i])) {
            *i += 1;
        }
        chars[start..*i].iter().collect::<String>()
    };
    let tag = ident(&mut i);
    if !tag.is_empty() {
        compound.tag = Some(tag);
    }
    while i < chars.len() {
        match chars[i] {
            '#' => {
                i += 1;
                compound.id = Some(ident(&mut i));
            }
            '.' => {
                i += 1;
                compound.classes.push(ident(&mut i));
            }
            ':' => {
                let rest: String = chars[i..].iter().collect();
                let inner = rest.strip_prefix(":nth-of-type(")?;
                let end = inner.find(')')?;
                compound.nth_of_type = Some(inner[..end].parse().ok()?);
                i += ":nth-of-type(".len() + end + 1;
            }
            '[' => {
                let rest: String = chars[i + 1..].iter().collect();
                let end = rest.find(']')?;
                let body = &rest[..end];
                match body.split_once('=') {
                    Some((name, value)) => compound.attrs.push((
                        name.trim().to_string(),
                        Some(value.trim().trim_matches(|c| c == '"' || c == '\'').to_string()),
                    )),
                    None => compound.attrs.push((body.trim().to_string(), None)),
                }
                i += end + 2;
            }
            _ => return None,
        }
    }
    Some(compound)
}

#[derive(Debug, Clone)]
struct FakeWindow {
    handle: String,
    url: String,
    name: String,
}

struct FakeState {
    pages: HashMap<String, FakePage>,
    dom: FakePage,
    generation: u64,
    windows: Vec<FakeWindow>,
    current: Option<usize>,
    next_window: usize,
    alert_open: bool,
    dead: bool,
    click_error: Option<SessionError>,
    intercepts: HashMap<NodeId, usize>,
    performance: VecDeque<SessionResult<Value>>,
    performance_polls: usize,
    log: Vec<String>,
    queries: Vec<String>,
}

/// Scripted [`Session`] backed by in-memory pages
pub struct FakeSession {
    id: String,
    state: Mutex<FakeState>,
}

impl Default for FakeSession {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSession {
    pub fn new() -> Self {
        FakeSession {
            id: uuid::Uuid::new_v4().to_string(),
            state: Mutex::new(FakeState {
                pages: HashMap::new(),
                dom: FakePage::new(),
                generation: 0,
                windows: vec![FakeWindow {
                    handle: "w0".to_string(),
                    url: "about:blank".to_string(),
                    name: String::new(),
                }],
                current: Some(0),
                next_window: 1,
                alert_open: false,
                dead: false,
                click_error: None,
                intercepts: HashMap::new(),
                performance: VecDeque::new(),
                performance_polls: 0,
                log: Vec::new(),
                queries: Vec::new(),
            }),
        }
    }

    pub fn with_page(self, url: &str, page: FakePage) -> Self {
        self.lock().pages.insert(url.to_string(), page);
        self
    }

    /// Load a page without recording a navigation
    pub fn start_at(self, url: &str) -> Self {
        {
            let mut state = self.lock();
            state.load(url);
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    /// Log entries starting with `prefix`
    pub fn actions(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .filter(|l| l.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn queries(&self) -> Vec<String> {
        self.lock().queries.clone()
    }

    pub fn url(&self) -> String {
        let state = self.lock();
        state
            .current
            .map(|i| state.windows[i].url.clone())
            .unwrap_or_default()
    }

    pub fn window_count(&self) -> usize {
        self.lock().windows.len()
    }

    pub fn alert_open(&self) -> bool {
        self.lock().alert_open
    }

    pub fn open_alert(&self) {
        self.lock().alert_open = true;
    }

    pub fn set_dead(&self, dead: bool) {
        self.lock().dead = dead;
    }

    pub fn set_click_error(&self, error: Option<SessionError>) {
        self.lock().click_error = error;
    }

    pub fn set_window_name(&self, handle: &str, name: &str) {
        let mut state = self.lock();
        if let Some(window) = state.windows.iter_mut().find(|w| w.handle == handle) {
            window.name = name.to_string();
        }
    }

    pub fn push_performance(&self, response: SessionResult<Value>) {
        self.lock().performance.push_back(response);
    }

    pub fn performance_polls(&self) -> usize {
        self.lock().performance_polls
    }

    /// Invalidate every handle handed out so far without touching the DOM
    pub fn invalidate_handles(&self) {
        self.lock().generation += 1;
    }

    /// Remove the first node matching `selector` from the current document
    pub fn remove(&self, selector: &str) {
        let mut state = self.lock();
        if let Ok(nodes) = state.dom.query_css(0, selector)
            && let Some(&node) = nodes.first()
        {
            state.dom.detach(node);
        }
    }

    pub fn set_attr(&self, selector: &str, name: &str, value: &str) {
        let mut state = self.lock();
        if let Ok(nodes) = state.dom.query_css(0, selector)
            && let Some(&node) = nodes.first()
        {
            state.dom.set_attr(node, name, value);
        }
    }

    pub fn attr(&self, selector: &str, name: &str) -> Option<String> {
        let state = self.lock();
        let nodes = state.dom.query_css(0, selector).ok()?;
        let node = *nodes.first()?;
        state.dom.nodes[node].attrs.get(name).cloned()
    }
}

impl FakeState {
    fn load(&mut self, url: &str) {
        self.dom = self.pages.get(url).cloned().unwrap_or_default();
        self.generation += 1;
        self.intercepts.clear();
        if let Some(i) = self.current {
            self.windows[i].url = url.to_string();
        }
    }

    fn check_alive(&self) -> SessionResult<()> {
        if self.dead {
            return Err(SessionError::ConnectionLost(
                "webdriver server did not respond".to_string(),
            ));
        }
        Ok(())
    }

    fn check_window(&self) -> SessionResult<usize> {
        self.current
            .ok_or_else(|| SessionError::NoSuchWindow("current window was closed".to_string()))
    }

    fn handle_for(&self, node: NodeId) -> ElementHandle {
        ElementHandle(format!("{}:{}", self.generation, node))
    }

    fn resolve(&self, handle: &ElementHandle) -> SessionResult<NodeId> {
        let stale = || SessionError::StaleElement(handle.0.clone());
        let (generation, node) = handle.0.split_once(':').ok_or_else(stale)?;
        let generation: u64 = generation.parse().map_err(|_| stale())?;
        let node: NodeId = node.parse().map_err(|_| stale())?;
        if generation != self.generation
            || node >= self.dom.nodes.len()
            || !self.dom.is_attached(node)
        {
            return Err(stale());
        }
        Ok(node)
    }

    fn label(&self, node: NodeId) -> String {
        match self.dom.nodes[node].attrs.get("id") {
            Some(id) => format!("#{id}"),
            None => self.dom.nodes[node].tag.clone(),
        }
    }

    fn query(&mut self, scope: NodeId, locator: &Locator) -> SessionResult<Vec<NodeId>> {
        self.queries.push(locator.to_string());
        match locator {
            Locator::Css(selector) => self.dom.query_css(scope, selector),
            Locator::Id(id) => Ok(self
                .dom
                .descendants(scope)
                .into_iter()
                .filter(|&n| self.dom.nodes[n].attrs.get("id") == Some(id))
                .collect()),
            Locator::LinkText(text) => Ok(self
                .dom
                .descendants(scope)
                .into_iter()
                .filter(|&n| self.dom.nodes[n].tag == "a" && &self.dom.text(n) == text)
                .collect()),
            Locator::XPath(xpath) => match xpath.as_str() {
                "//body//*" => Ok(self.dom.descendants(self.dom.body())),
                ".//*" => Ok(self.dom.descendants(scope)),
                other => Err(SessionError::Other(format!("unsupported xpath: {other}"))),
            },
        }
    }

    fn apply(&mut self, node: NodeId, effects: Vec<Effect>) -> SessionResult<()> {
        for effect in effects {
            match effect {
                Effect::NotInteractable => {
                    return Err(SessionError::NotInteractable(self.label(node)));
                }
                Effect::Intercepted(times) => {
                    let remaining = self.intercepts.entry(node).or_insert(times);
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(SessionError::ClickIntercepted(self.label(node)));
                    }
                }
                Effect::ToggleAttr { name, on, off } => {
                    let next = if self.dom.nodes[node].attrs.get(&name) == Some(&on) {
                        off
                    } else {
                        on
                    };
                    self.dom.set_attr(node, &name, &next);
                }
                Effect::ToggleHidden(id) => {
                    if let Some(target) = self.dom.find_by_id(&id) {
                        let attrs = &mut self.dom.nodes[target].attrs;
                        if attrs.remove("hidden").is_none() {
                            attrs.insert("hidden".to_string(), String::new());
                        }
                    }
                }
                Effect::Reveal(id) => {
                    if let Some(target) = self.dom.find_by_id(&id) {
                        self.dom.nodes[target].attrs.remove("hidden");
                    }
                }
                Effect::InsertList(items) => {
                    let body = self.dom.body();
                    let existing = self.dom.nodes[body]
                        .children
                        .iter()
                        .copied()
                        .find(|&c| self.dom.nodes[c].attrs.contains_key("data-inserted"));
                    match existing {
                        Some(list) => self.dom.detach(list),
                        None => {
                            let list = self.dom.add_with(body, "ul", &[("data-inserted", "")]);
                            for i in 0..items {
                                let item = self.dom.add(list, "li");
                                self.dom.set_text(item, &format!("Item {}", i + 1));
                            }
                        }
                    }
                }
                Effect::RemoveSelf => self.dom.detach(node),
                Effect::Navigate(url) => self.load(&url),
                Effect::OpenTab(url) => {
                    let handle = format!("w{}", self.next_window);
                    self.next_window += 1;
                    self.windows.push(FakeWindow {
                        handle,
                        url,
                        name: String::new(),
                    });
                }
                Effect::Alert => self.alert_open = true,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Session for FakeSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn navigate(&self, url: &str) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_alive()?;
        state.check_window()?;
        state.log.push(format!("navigate {url}"));
        state.load(url);
        Ok(())
    }

    async fn current_url(&self) -> SessionResult<String> {
        let state = self.lock();
        state.check_alive()?;
        let window = state.check_window()?;
        Ok(state.windows[window].url.clone())
    }

    async fn execute_script(&self, script: &str, _args: Vec<ScriptArg>) -> SessionResult<Value> {
        let mut state = self.lock();
        state.check_alive()?;
        if state.alert_open {
            return Err(SessionError::UnexpectedAlert("alert open".to_string()));
        }
        if script.contains("getEntries") {
            state.performance_polls += 1;
            return state
                .performance
                .pop_front()
                .unwrap_or_else(|| Ok(json!([])));
        }
        let head: String = script.trim().chars().take(40).collect();
        state.log.push(format!("script {head}"));
        if script.contains("window.name") {
            let window = state.check_window()?;
            return Ok(Value::String(state.windows[window].name.clone()));
        }
        Ok(Value::Null)
    }

    async fn find(&self, locator: &Locator) -> SessionResult<Option<ElementHandle>> {
        let mut state = self.lock();
        state.check_alive()?;
        let nodes = state.query(0, locator)?;
        Ok(nodes.first().map(|&n| state.handle_for(n)))
    }

    async fn find_all(&self, locator: &Locator) -> SessionResult<Vec<ElementHandle>> {
        let mut state = self.lock();
        state.check_alive()?;
        let nodes = state.query(0, locator)?;
        Ok(nodes.into_iter().map(|n| state.handle_for(n)).collect())
    }

    async fn find_all_within(
        &self,
        parent: &ElementHandle,
        locator: &Locator,
    ) -> SessionResult<Vec<ElementHandle>> {
        let mut state = self.lock();
        state.check_alive()?;
        let scope = state.resolve(parent)?;
        let nodes = state.query(scope, locator)?;
        Ok(nodes
            .into_iter()
            .filter(|&n| n != scope)
            .map(|n| state.handle_for(n))
            .collect())
    }

    async fn window_handles(&self) -> SessionResult<Vec<String>> {
        let state = self.lock();
        state.check_alive()?;
        Ok(state.windows.iter().map(|w| w.handle.clone()).collect())
    }

    async fn current_window(&self) -> SessionResult<String> {
        let state = self.lock();
        state.check_alive()?;
        let window = state.check_window()?;
        Ok(state.windows[window].handle.clone())
    }

    async fn switch_to_window(&self, handle: &str) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_alive()?;
        let index = state
            .windows
            .iter()
            .position(|w| w.handle == handle)
            .ok_or_else(|| SessionError::NoSuchWindow(handle.to_string()))?;
        state.current = Some(index);
        state.log.push(format!("switch_window {handle}"));
        Ok(())
    }

    async fn close_window(&self) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_alive()?;
        let window = state.check_window()?;
        let closed = state.windows.remove(window);
        state.current = None;
        state.log.push(format!("close_window {}", closed.handle));
        Ok(())
    }

    async fn new_tab(&self) -> SessionResult<String> {
        let mut state = self.lock();
        state.check_alive()?;
        let handle = format!("w{}", state.next_window);
        state.next_window += 1;
        state.windows.push(FakeWindow {
            handle: handle.clone(),
            url: "about:blank".to_string(),
            name: String::new(),
        });
        state.current = Some(state.windows.len() - 1);
        state.log.push(format!("new_tab {handle}"));
        Ok(handle)
    }

    async fn set_window_size(&self, width: u32, height: u32) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_alive()?;
        state.log.push(format!("set_window_size {width}x{height}"));
        Ok(())
    }

    async fn maximize_window(&self) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_alive()?;
        state.log.push("maximize".to_string());
        Ok(())
    }

    async fn switch_to_frame(&self, index: u16) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_alive()?;
        state.log.push(format!("frame {index}"));
        Ok(())
    }

    async fn switch_to_parent_frame(&self) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_alive()?;
        state.log.push("parent_frame".to_string());
        Ok(())
    }

    async fn switch_to_default_content(&self) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_alive()?;
        state.log.push("default_content".to_string());
        Ok(())
    }

    async fn dismiss_alert(&self) -> SessionResult<bool> {
        let mut state = self.lock();
        state.check_alive()?;
        let was_open = std::mem::replace(&mut state.alert_open, false);
        if was_open {
            state.log.push("dismiss_alert".to_string());
        }
        Ok(was_open)
    }

    async fn quit(&self) -> SessionResult<()> {
        let mut state = self.lock();
        state.log.push("quit".to_string());
        state.windows.clear();
        state.current = None;
        state.dead = true;
        Ok(())
    }

    async fn click(&self, element: &ElementHandle) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_alive()?;
        if let Some(error) = state.click_error.clone() {
            return Err(error);
        }
        let node = state.resolve(element)?;
        if !state.dom.is_displayed(node) {
            return Err(SessionError::NotInteractable(state.label(node)));
        }
        let label = state.label(node);
        let effects = state.dom.nodes[node].on_click.clone();
        state.apply(node, effects)?;
        let target = &mut state.dom.nodes[node];
        if target.is_checkable() {
            // property only; the markup stays the same
            target.checked = target.attrs.get("type").map(String::as_str) == Some("radio")
                || !target.checked;
        }
        state.log.push(format!("click {label}"));
        Ok(())
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_alive()?;
        let node = state.resolve(element)?;
        if !state.dom.is_displayed(node) {
            return Err(SessionError::NotInteractable(state.label(node)));
        }
        let label = state.label(node);
        if text.contains(ENTER_KEY) {
            let effects = state.dom.nodes[node].on_click.clone();
            state.apply(node, effects)?;
            state.log.push(format!("send_keys {label} <ENTER>"));
        } else {
            let value = state.dom.nodes[node]
                .attrs
                .get("value")
                .cloned()
                .unwrap_or_default();
            state.dom.set_attr(node, "value", &format!("{value}{text}"));
            state.log.push(format!("send_keys {label} {text}"));
        }
        Ok(())
    }

    async fn hover(&self, element: &ElementHandle) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_alive()?;
        let node = state.resolve(element)?;
        let label = state.label(node);
        let effects = state.dom.nodes[node].on_hover.clone();
        state.apply(node, effects)?;
        state.log.push(format!("hover {label}"));
        Ok(())
    }

    async fn move_pointer_by(
        &self,
        element: &ElementHandle,
        dx: i32,
        dy: i32,
    ) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_alive()?;
        let node = state.resolve(element)?;
        let label = state.label(node);
        state.log.push(format!("move {label} {dx},{dy}"));
        Ok(())
    }

    async fn scroll_into_view(&self, element: &ElementHandle) -> SessionResult<()> {
        let mut state = self.lock();
        state.check_alive()?;
        let node = state.resolve(element)?;
        let label = state.label(node);
        state.log.push(format!("scroll {label}"));
        Ok(())
    }

    async fn tag_name(&self, element: &ElementHandle) -> SessionResult<String> {
        let state = self.lock();
        state.check_alive()?;
        let node = state.resolve(element)?;
        Ok(state.dom.nodes[node].tag.clone())
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> SessionResult<Option<String>> {
        let state = self.lock();
        state.check_alive()?;
        let node = state.resolve(element)?;
        Ok(state.dom.nodes[node].attrs.get(name).cloned())
    }

    async fn text(&self, element: &ElementHandle) -> SessionResult<String> {
        let state = self.lock();
        state.check_alive()?;
        let node = state.resolve(element)?;
        Ok(state.dom.text(node))
    }

    async fn rect(&self, element: &ElementHandle) -> SessionResult<Rect> {
        let state = self.lock();
        state.check_alive()?;
        let node = state.resolve(element)?;
        Ok(state.dom.rect(node))
    }

    async fn is_displayed(&self, element: &ElementHandle) -> SessionResult<bool> {
        let state = self.lock();
        state.check_alive()?;
        let node = state.resolve(element)?;
        Ok(state.dom.is_displayed(node))
    }

    async fn parent(&self, element: &ElementHandle) -> SessionResult<Option<ElementHandle>> {
        let state = self.lock();
        state.check_alive()?;
        let node = state.resolve(element)?;
        Ok(state.dom.nodes[node].parent.map(|p| state.handle_for(p)))
    }

    async fn describe(&self, element: &ElementHandle) -> SessionResult<NodeDescription> {
        let state = self.lock();
        state.check_alive()?;
        let node = state.resolve(element)?;
        Ok(state.dom.describe(node))
    }

    async fn select_by_index(&self, element: &ElementHandle, index: usize) -> SessionResult<()> {
        let options = self.select_options(element)?;
        let (_, label) = options
            .get(index)
            .cloned()
            .ok_or_else(|| SessionError::NoSuchElement(format!("option index {index}")))?;
        self.lock().log.push(format!("select {label}"));
        Ok(())
    }

    async fn select_by_value(&self, element: &ElementHandle, value: &str) -> SessionResult<()> {
        let options = self.select_options(element)?;
        let (_, label) = options
            .into_iter()
            .find(|(v, _)| v == value)
            .ok_or_else(|| SessionError::NoSuchElement(format!("option value {value}")))?;
        self.lock().log.push(format!("select {label}"));
        Ok(())
    }

    async fn select_by_label(&self, element: &ElementHandle, label: &str) -> SessionResult<()> {
        let options = self.select_options(element)?;
        if !options.iter().any(|(_, l)| l == label) {
            return Err(SessionError::NoSuchElement(format!("option label {label}")));
        }
        self.lock().log.push(format!("select {label}"));
        Ok(())
    }
}

impl FakeSession {
    /// `(value, label)` of each option under a `<select>`
    fn select_options(&self, element: &ElementHandle) -> SessionResult<Vec<(String, String)>> {
        let state = self.lock();
        state.check_alive()?;
        let node = state.resolve(element)?;
        Ok(state.dom.nodes[node]
            .children
            .iter()
            .filter(|&&c| state.dom.nodes[c].tag == "option")
            .map(|&c| {
                let label = state.dom.text(c);
                let value = state.dom.nodes[c]
                    .attrs
                    .get("value")
                    .cloned()
                    .unwrap_or_else(|| label.clone());
                (value, label)
            })
            .collect())
    }
}

/// Hands out pre-built fake sessions in order
pub struct FakeFactory {
    sessions: Mutex<VecDeque<Arc<FakeSession>>>,
}

impl FakeFactory {
    pub fn new(sessions: Vec<Arc<FakeSession>>) -> Self {
        FakeFactory {
            sessions: Mutex::new(sessions.into()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn create(&self) -> SessionResult<Arc<dyn Session>> {
        let next = self
            .sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();
        match next {
            Some(session) => Ok(session as Arc<dyn Session>),
            None => Err(SessionError::ConnectionLost(
                "no browser available".to_string(),
            )),
        }
    }
}
