//! Deterministic runtime for attribute-driven server actions.
//!
//! Markup declares behaviour through attributes: `az-on` carries a command
//! (`click call like -> #box`), `az-scope` carries the serialized state of a
//! subtree, `data-predict` carries an optimistic guess of the server's answer
//! and `data-bind` / `az-bind:*` project state back onto the page. The
//! [`Runtime`] owns the document, dispatches user interactions, applies
//! predictions immediately, parks the request until the embedder settles it
//! and then commits, reconciles or rolls back.
//!
//! ```
//! use live_actions::{Runtime, Result};
//!
//! fn main() -> Result<()> {
//!     let mut rt = Runtime::from_html(
//!         r#"<div id="box" az-scope='{"liked":false}'>
//!              <button id="like" az-on="click call like" data-predict="liked = !liked">Like</button>
//!            </div>"#,
//!     )?;
//!     rt.set_action_mock("like", 200, r#"<div az-scope='{"liked":true}'></div>"#);
//!     rt.click("#like")?;
//!     rt.settle_requests()?;
//!     assert_eq!(rt.attr("#box", "az-scope")?.as_deref(), Some(r#"{"liked":true}"#));
//!     Ok(())
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::error::Error as StdError;
use std::fmt;

mod bindings;
mod command;
mod config;
mod coordinator;
mod dom;
mod events;
mod expr;
mod html;
mod morph;
mod mutation;
mod pattern;
mod reload;
mod scalar;
mod scope;
mod selector;
mod trace;
mod transport;

pub use bindings::RenderReport;
pub use command::{Action, CallAction, Command, SetAction, SwapMode, parse_command};
pub use config::RuntimeConfig;
pub use coordinator::{ActionOutcome, ActionTerminal};
pub use dom::{Dom, NodeId};
pub use events::EventOutcome;
pub use expr::{evaluate, try_evaluate};
pub use morph::{Morph, OuterSwap};
pub use mutation::{BatchReport, Mutation, apply_mutation, apply_statements};
pub use reload::ReloadState;
pub use scope::{ScopeId, ScopeState, Speculation};
pub use serde_json::Value;
pub use transport::{
    HttpMethod, HttpRequest, HttpResponse, MockTransport, RequestId, Transport, TransportError,
};

use coordinator::NetworkState;
use html::parse_html;
use reload::ReloadMonitor;
use scope::ScopeStore;
use trace::TraceState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    HtmlParse(String),
    SelectorNotFound(String),
    UnsupportedSelector(String),
    CommandParse(String),
    ExpressionParse(String),
    ExpressionEval(String),
    StateDeserialization {
        scope: String,
        message: String,
    },
    RequestFailure {
        url: String,
        status: Option<u16>,
        message: String,
    },
    MergeUnavailable(String),
    Config(String),
    Runtime(String),
    TypeMismatch {
        selector: String,
        expected: String,
        actual: String,
    },
    AssertionFailed {
        selector: String,
        expected: String,
        actual: String,
        dom_snippet: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HtmlParse(msg) => write!(f, "html parse error: {msg}"),
            Self::SelectorNotFound(selector) => write!(f, "selector not found: {selector}"),
            Self::UnsupportedSelector(selector) => write!(f, "unsupported selector: {selector}"),
            Self::CommandParse(msg) => write!(f, "command parse error: {msg}"),
            Self::ExpressionParse(msg) => write!(f, "expression parse error: {msg}"),
            Self::ExpressionEval(msg) => write!(f, "expression evaluation error: {msg}"),
            Self::StateDeserialization { scope, message } => {
                write!(f, "malformed scope state on {scope}: {message}")
            }
            Self::RequestFailure {
                url,
                status: Some(status),
                message,
            } => write!(f, "request to {url} failed with status {status}: {message}"),
            Self::RequestFailure {
                url,
                status: None,
                message,
            } => write!(f, "request to {url} failed: {message}"),
            Self::MergeUnavailable(msg) => write!(f, "merge unavailable: {msg}"),
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Runtime(msg) => write!(f, "runtime error: {msg}"),
            Self::TypeMismatch {
                selector,
                expected,
                actual,
            } => write!(
                f,
                "type mismatch for {selector}: expected {expected}, actual {actual}"
            ),
            Self::AssertionFailed {
                selector,
                expected,
                actual,
                dom_snippet,
            } => write!(
                f,
                "assertion failed for {selector}: expected {expected}, actual {actual}, snippet {dom_snippet}"
            ),
        }
    }
}

impl StdError for Error {}

/// The attribute runtime: document, scope store, in-flight requests and the
/// collaborators used to complete them.
pub struct Runtime {
    dom: Dom,
    config: RuntimeConfig,
    scopes: ScopeStore,
    network: NetworkState,
    morph: Option<Box<dyn Morph>>,
    outcomes: VecDeque<ActionOutcome>,
    reload: ReloadMonitor,
    now_ms: i64,
    trace: TraceState,
}

impl Runtime {
    pub fn from_html(html: &str) -> Result<Self> {
        Self::with_config(html, RuntimeConfig::default())
    }

    pub fn with_config(html: &str, config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let dom = parse_html(html)?;
        let reload = ReloadMonitor::new(
            &config.page_url,
            &config.reload_path,
            config.reload_poll_interval_ms,
            config.live_reload,
        );
        let mut runtime = Self {
            dom,
            scopes: ScopeStore::new(&config.scope_attr),
            network: NetworkState::new(config.settle_step_limit),
            morph: None,
            outcomes: VecDeque::new(),
            reload,
            now_ms: 0,
            trace: TraceState::default(),
            config,
        };
        runtime.initialize_scopes();
        if runtime.reload.is_enabled() {
            let url = runtime.reload.channel_url().to_string();
            runtime.trace_reload_line(format!("[reload] connecting url={url}"));
        }
        Ok(runtime)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn dom(&self) -> &Dom {
        &self.dom
    }

    /// Installs the structural merge used for reconciliation.
    pub fn set_morph(&mut self, morph: Box<dyn Morph>) {
        self.morph = Some(morph);
    }

    pub fn clear_morph(&mut self) {
        self.morph = None;
    }

    /// Replaces the built-in mock transport.
    pub fn set_transport(&mut self, transport: Box<dyn Transport>) {
        self.network.custom_transport = Some(transport);
    }

    pub fn set_action_mock(&mut self, action_name: &str, status: u16, body: &str) {
        let url = format!("{}{action_name}", self.config.endpoint_prefix);
        self.network.mocks.respond(&url, status, body);
    }

    pub fn set_action_failure(&mut self, action_name: &str, message: &str) {
        let url = format!("{}{action_name}", self.config.endpoint_prefix);
        self.network.mocks.fail(&url, message);
    }

    pub fn set_url_mock(&mut self, url: &str, status: u16, body: &str) {
        self.network.mocks.respond(url, status, body);
    }

    pub fn set_url_failure(&mut self, url: &str, message: &str) {
        self.network.mocks.fail(url, message);
    }

    pub fn clear_mocks(&mut self) {
        self.network.mocks.clear();
    }

    /// Requests issued so far (action posts and reload probes), oldest first.
    pub fn take_requests(&mut self) -> Vec<HttpRequest> {
        self.network.issued.drain(..).collect()
    }

    pub fn pending_requests(&self) -> Vec<RequestId> {
        self.network.in_flight.iter().map(|f| f.id).collect()
    }

    pub fn take_action_outcomes(&mut self) -> Vec<ActionOutcome> {
        self.outcomes.drain(..).collect()
    }

    pub fn set_settle_step_limit(&mut self, max_steps: usize) -> Result<()> {
        if max_steps == 0 {
            return Err(Error::Config(
                "set_settle_step_limit requires at least 1 step".into(),
            ));
        }
        self.network.step_limit = max_steps;
        Ok(())
    }

    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    pub fn text(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.dom.text_content(target))
    }

    pub fn attr(&self, selector: &str, name: &str) -> Result<Option<String>> {
        let target = self.select_one(selector)?;
        Ok(self.dom.attr(target, name))
    }

    pub fn has_class(&self, selector: &str, class_name: &str) -> Result<bool> {
        let target = self.select_one(selector)?;
        Ok(self.dom.has_class(target, class_name))
    }

    pub fn exists(&self, selector: &str) -> Result<bool> {
        Ok(self.dom.query_selector(selector)?.is_some())
    }

    /// Current state of the scope governing `selector`, if any.
    pub fn scope_state(&mut self, selector: &str) -> Result<Option<ScopeState>> {
        let target = self.select_one(selector)?;
        Ok(self
            .resolve_scope(target)
            .and_then(|id| self.scopes.state(id).cloned()))
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Detaches the selected element from the document.
    pub fn remove(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dom.remove_node(target)?;
        Ok(())
    }

    /// Evicts scope records whose elements left the document.
    pub fn sweep_scopes(&mut self) -> usize {
        let evicted = self.scopes.sweep(&self.dom);
        if evicted > 0 {
            self.trace_action_line(format!("[scope] sweep evicted={evicted}"));
        }
        evicted
    }

    pub fn mutation_count(&self) -> u64 {
        self.dom.mutation_count()
    }

    pub fn render_scope(&mut self, selector: &str) -> Result<RenderReport> {
        let target = self.select_one(selector)?;
        let Some(id) = self.resolve_scope(target) else {
            return Ok(RenderReport::default());
        };
        Ok(self.render_bindings(id))
    }

    /// Renders the bindings of every registered scope.
    pub fn render_all_scopes(&mut self) -> RenderReport {
        let mut report = RenderReport::default();
        for id in self.scopes.ids() {
            report.absorb(self.render_bindings(id));
        }
        report
    }

    pub fn assert_text(&self, selector: &str, expected: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.text_content(target);
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_attr(&self, selector: &str, name: &str, expected: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.attr(target, name).unwrap_or_default();
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_exists(&self, selector: &str) -> Result<()> {
        let _ = self.select_one(selector)?;
        Ok(())
    }

    pub fn dump_dom(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.dom.dump_node(target))
    }

    fn select_one(&self, selector: &str) -> Result<NodeId> {
        self.dom
            .query_selector(selector)?
            .ok_or_else(|| Error::SelectorNotFound(selector.to_string()))
    }

    fn node_snippet(&self, node_id: NodeId) -> String {
        truncate_chars(&self.dom.dump_node(node_id), 200)
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    let mut it = value.chars();
    let mut out = String::new();
    for _ in 0..max_chars {
        let Some(ch) = it.next() else {
            return out;
        };
        out.push(ch);
    }
    if it.next().is_some() {
        out.push_str("...");
    }
    out
}
