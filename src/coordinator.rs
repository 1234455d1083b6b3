//! Optimistic execution and reconciliation of actions.
//!
//! A call runs `Idle -> (Predicted)? -> AwaitingServer` synchronously and
//! parks its request in the in-flight queue. Settling the request moves it to
//! one of the terminal states in [`ActionTerminal`]. Actions on a scope that
//! is still awaiting the server are queued on the scope record and started
//! when the earlier action terminates.

use super::*;

use serde_json::Map;

use crate::bindings::{binding_attrs, render};
use crate::html::decode_entities;
use crate::morph::replace_inner;
use crate::pattern::{Pattern, escape};
use crate::scope::describe_node;
use crate::trace::push_bounded;

/// How an action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTerminal {
    /// The server state equalled the prediction; no merge happened.
    Matched,
    /// The server markup was merged into the swap target.
    Reconciled,
    /// The request failed and the prediction was undone.
    RolledBack,
    /// The request failed and there was no prediction to undo.
    Failed,
    /// The scope, source or target left the document first.
    Abandoned,
    /// A `set` action changed the scope state.
    Applied,
    /// A `set` action could not be evaluated.
    NoEffect,
}

impl fmt::Display for ActionTerminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Matched => "matched",
            Self::Reconciled => "reconciled",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
            Self::Applied => "applied",
            Self::NoEffect => "no_effect",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    /// Action name for calls, `set <field>` for local changes.
    pub action: String,
    pub endpoint: Option<String>,
    pub request: Option<RequestId>,
    pub terminal: ActionTerminal,
}

/// An action waiting for its scope to become idle.
#[derive(Debug, Clone)]
pub(crate) struct QueuedDispatch {
    pub(crate) action: Action,
    pub(crate) source: NodeId,
}

pub(crate) struct InFlight {
    pub(crate) id: RequestId,
    pub(crate) request: HttpRequest,
    pub(crate) call: CallAction,
    pub(crate) source: NodeId,
    pub(crate) scope: Option<ScopeId>,
    pub(crate) scope_node: Option<NodeId>,
    pub(crate) speculation: Option<Speculation>,
}

pub(crate) struct NetworkState {
    pub(crate) custom_transport: Option<Box<dyn Transport>>,
    pub(crate) mocks: MockTransport,
    pub(crate) issued: VecDeque<HttpRequest>,
    pub(crate) in_flight: VecDeque<InFlight>,
    pub(crate) step_limit: usize,
    next_request_id: u64,
}

impl NetworkState {
    pub(crate) fn new(step_limit: usize) -> Self {
        Self {
            custom_transport: None,
            mocks: MockTransport::new(),
            issued: VecDeque::new(),
            in_flight: VecDeque::new(),
            step_limit,
            next_request_id: 1,
        }
    }

    pub(crate) fn build_request(
        &mut self,
        method: HttpMethod,
        url: &str,
        headers: Vec<(String, String)>,
        body: Option<String>,
    ) -> HttpRequest {
        let id = RequestId(self.next_request_id);
        self.next_request_id += 1;
        HttpRequest {
            id,
            method,
            url: url.to_string(),
            headers,
            body,
        }
    }

    pub(crate) fn send(
        &mut self,
        request: &HttpRequest,
    ) -> std::result::Result<HttpResponse, TransportError> {
        match self.custom_transport.as_mut() {
            Some(transport) => transport.send(request),
            None => self.mocks.send(request),
        }
    }
}

impl Runtime {
    /// Runs `action` as if it had been triggered from the selected element.
    pub fn execute(&mut self, selector: &str, action: Action) -> Result<()> {
        let source = self.select_one(selector)?;
        self.execute_action(action, source);
        Ok(())
    }

    /// Completes every parked request in FIFO order, including requests
    /// started while settling. Returns the number of completed requests.
    pub fn settle_requests(&mut self) -> Result<usize> {
        let mut steps = 0usize;
        while let Some(flight) = self.network.in_flight.pop_front() {
            steps += 1;
            if steps > self.network.step_limit {
                self.network.in_flight.push_front(flight);
                return Err(Error::Runtime(format!(
                    "settle_requests exceeded max steps ({}), possible runaway action chain",
                    self.network.step_limit
                )));
            }
            self.complete(flight);
        }
        Ok(steps)
    }

    /// Completes the oldest parked request. Returns `false` when none was
    /// pending.
    pub fn settle_next(&mut self) -> Result<bool> {
        let Some(flight) = self.network.in_flight.pop_front() else {
            return Ok(false);
        };
        self.complete(flight);
        Ok(true)
    }

    /// Completes a specific parked request with a caller-supplied result,
    /// bypassing the transport.
    pub fn respond(
        &mut self,
        id: RequestId,
        result: std::result::Result<HttpResponse, TransportError>,
    ) -> Result<()> {
        let Some(position) = self.network.in_flight.iter().position(|f| f.id == id) else {
            return Err(Error::Runtime(format!("no pending request {id}")));
        };
        let Some(flight) = self.network.in_flight.remove(position) else {
            return Err(Error::Runtime(format!("no pending request {id}")));
        };
        self.complete_with(flight, result);
        Ok(())
    }

    pub(crate) fn execute_action(&mut self, action: Action, source: NodeId) {
        let label = action.label();
        if !self.dom.is_connected(source) {
            self.warn(format!("{label}: source element left the document"));
            self.record_outcome(ActionOutcome {
                action: label,
                endpoint: endpoint_of(&action),
                request: None,
                terminal: ActionTerminal::Abandoned,
            });
            return;
        }

        let scope = self.resolve_scope(source);
        if let Some(id) = scope {
            if let Some(record) = self.scopes.record_mut(id) {
                if record.busy {
                    record.queue.push_back(QueuedDispatch { action, source });
                    let depth = record.queue.len();
                    self.trace_action_line(format!("[action] queued {label} {id} depth={depth}"));
                    return;
                }
            }
        }

        match action {
            Action::Set(set) => {
                let terminal = self.execute_set(&set, scope);
                self.record_outcome(ActionOutcome {
                    action: label,
                    endpoint: None,
                    request: None,
                    terminal,
                });
            }
            Action::Call(call) => self.execute_call(call, source, scope),
        }
    }

    fn execute_set(&mut self, set: &SetAction, scope: Option<ScopeId>) -> ActionTerminal {
        let Some((id, mut state)) =
            scope.and_then(|id| self.scopes.state(id).cloned().map(|s| (id, s)))
        else {
            self.warn(format!("set {}: no effect, no enclosing scope", set.field));
            return ActionTerminal::NoEffect;
        };

        match try_evaluate(&set.value_expr, &state) {
            Ok(Some(value)) => state.set(&set.field, value),
            Ok(None) => {
                state.remove(&set.field);
            }
            Err(err) => {
                self.warn(format!("set {}: no effect: {err}", set.field));
                return ActionTerminal::NoEffect;
            }
        }

        if let Err(err) = self.scopes.commit(&mut self.dom, id, state) {
            self.warn(format!("set {}: {err}", set.field));
            return ActionTerminal::NoEffect;
        }
        self.trace_action_line(format!("[action] set {} {id}", set.field));
        self.render_bindings(id);
        ActionTerminal::Applied
    }

    fn execute_call(&mut self, call: CallAction, source: NodeId, scope: Option<ScopeId>) {
        // captured before the prediction runs
        let body = self.request_body(source, scope);

        let mut speculation = None;
        match (call.prediction.as_deref(), scope) {
            (Some(prediction), Some(id)) => {
                speculation = self.scopes.speculative_apply(&mut self.dom, id, prediction);
                if let Some(guess) = &speculation {
                    if let Some(err) = &guess.report.error {
                        let message = format!(
                            "{}: prediction stopped after {} statement(s): {err}",
                            call.action_name,
                            guess.report.applied.len()
                        );
                        self.warn(message);
                    }
                    let state = guess.after.to_json();
                    self.trace_action_line(format!(
                        "[action] predicted {} {id} state={state}",
                        call.action_name
                    ));
                    self.render_bindings(id);
                }
            }
            (Some(_), None) => {
                self.warn(format!(
                    "{}: prediction ignored, no enclosing scope",
                    call.action_name
                ));
            }
            (None, _) => {}
        }

        if let Some(record) = scope.and_then(|id| self.scopes.record_mut(id)) {
            record.busy = true;
        }

        let request = self.network.build_request(
            HttpMethod::Post,
            &call.endpoint,
            vec![("Content-Type".to_string(), "application/json".to_string())],
            Some(body),
        );
        self.trace_network_line(format!(
            "[network] {} {} {}",
            request.method, request.url, request.id
        ));
        push_bounded(&mut self.network.issued, request.clone(), self.trace.log_limit);
        let scope_node = scope.and_then(|id| self.scopes.node(id));
        self.network.in_flight.push_back(InFlight {
            id: request.id,
            request,
            call,
            source,
            scope,
            scope_node,
            speculation,
        });
    }

    fn request_body(&self, source: NodeId, scope: Option<ScopeId>) -> String {
        if self.dom.tag_name(source) == Some("form") {
            let mut fields = Map::new();
            for (name, value) in self.dom.form_data_entries(source) {
                fields.insert(name, Value::String(value));
            }
            return Value::Object(fields).to_string();
        }
        scope
            .and_then(|id| self.scopes.state(id))
            .map(ScopeState::to_json)
            .unwrap_or_else(|| "{}".to_string())
    }

    fn complete(&mut self, flight: InFlight) {
        let result = self.network.send(&flight.request);
        self.complete_with(flight, result);
    }

    fn complete_with(
        &mut self,
        flight: InFlight,
        result: std::result::Result<HttpResponse, TransportError>,
    ) {
        let InFlight {
            id: request_id,
            request,
            call,
            source,
            scope,
            scope_node,
            speculation,
        } = flight;

        let pending = scope.map(|id| self.release_scope(id)).unwrap_or_default();
        let detached = scope.is_some_and(|id| !self.scopes.is_live(&self.dom, id))
            || scope_node.is_some_and(|node| !self.dom.is_connected(node));

        let terminal = if detached {
            self.trace_action_line(format!(
                "[action] late response for {} ignored, scope left the document",
                call.action_name
            ));
            ActionTerminal::Abandoned
        } else {
            match result {
                Ok(response) if response.is_success() => {
                    self.reconcile(&call, source, scope, speculation.as_ref(), &response.body)
                }
                Ok(response) => {
                    let err = Error::RequestFailure {
                        url: request.url.clone(),
                        status: Some(response.status),
                        message: truncate_chars(&response.body, 80),
                    };
                    self.fail_action(&call, scope, speculation.as_ref(), err)
                }
                Err(err) => {
                    let err = Error::RequestFailure {
                        url: request.url.clone(),
                        status: None,
                        message: err.message,
                    };
                    self.fail_action(&call, scope, speculation.as_ref(), err)
                }
            }
        };

        self.trace_action_line(format!(
            "[action] {} {request_id} -> {terminal}",
            call.action_name
        ));
        self.record_outcome(ActionOutcome {
            action: call.action_name.clone(),
            endpoint: Some(call.endpoint.clone()),
            request: Some(request_id),
            terminal,
        });

        for dispatch in pending {
            self.execute_action(dispatch.action, dispatch.source);
        }
    }

    fn release_scope(&mut self, id: ScopeId) -> VecDeque<QueuedDispatch> {
        match self.scopes.record_mut(id) {
            Some(record) => {
                record.busy = false;
                std::mem::take(&mut record.queue)
            }
            None => VecDeque::new(),
        }
    }

    fn reconcile(
        &mut self,
        call: &CallAction,
        source: NodeId,
        scope: Option<ScopeId>,
        speculation: Option<&Speculation>,
        markup: &str,
    ) -> ActionTerminal {
        if let (Some(id), Some(guess)) = (scope, speculation) {
            let server_state = self.extract_server_state(markup);
            if let Some(server) = &server_state {
                if *server == guess.after {
                    if let Err(err) = self.scopes.commit(&mut self.dom, id, server.clone()) {
                        self.warn(format!("{}: {err}", call.action_name));
                    }
                    self.render_bindings(id);
                    return ActionTerminal::Matched;
                }
            }
            let written = match server_state {
                Some(server) => self.scopes.commit(&mut self.dom, id, server),
                None => self.scopes.rollback(&mut self.dom, id, &guess.before),
            };
            if let Err(err) = written {
                self.warn(format!("{}: {err}", call.action_name));
            }
        }

        let target = match &call.target {
            Some(selector) => match self.dom.query_selector(selector) {
                Ok(Some(node)) => node,
                Ok(None) => {
                    self.warn(format!(
                        "{}: swap target {selector} not found",
                        call.action_name
                    ));
                    return ActionTerminal::Abandoned;
                }
                Err(err) => {
                    self.warn(format!("{}: {err}", call.action_name));
                    return ActionTerminal::Abandoned;
                }
            },
            None => scope
                .and_then(|id| self.scopes.node(id))
                .unwrap_or(source),
        };
        if !self.dom.is_connected(target) {
            self.warn(format!(
                "{}: swap target left the document",
                call.action_name
            ));
            return ActionTerminal::Abandoned;
        }

        let morphed = self
            .morph
            .as_mut()
            .map(|morph| morph.morph(&mut self.dom, target, markup, &call.swap));
        let merged = match morphed {
            Some(result) => result,
            None => {
                let err = Error::MergeUnavailable(format!(
                    "no morph installed, replacing content of {}",
                    describe_node(&self.dom, target)
                ));
                self.warn(err.to_string());
                replace_inner(&mut self.dom, target, markup)
            }
        };
        if let Err(err) = merged {
            self.warn(format!("{}: merge failed: {err}", call.action_name));
        }

        self.resync_scopes();
        ActionTerminal::Reconciled
    }

    fn fail_action(
        &mut self,
        call: &CallAction,
        scope: Option<ScopeId>,
        speculation: Option<&Speculation>,
        err: Error,
    ) -> ActionTerminal {
        self.warn(format!("{}: {err}", call.action_name));
        let (Some(id), Some(guess)) = (scope, speculation) else {
            return ActionTerminal::Failed;
        };
        if let Err(err) = self.scopes.rollback(&mut self.dom, id, &guess.before) {
            self.warn(format!("{}: rollback failed: {err}", call.action_name));
        }
        self.render_bindings(id);
        ActionTerminal::RolledBack
    }

    /// State embedded in the response through the scope attribute, if any.
    fn extract_server_state(&mut self, markup: &str) -> Option<ScopeState> {
        let attr = escape(&self.config.scope_attr).into_owned();
        let pattern = Pattern::new(&format!(
            r#"(?:^|[\s<])(?:{attr})\s*=\s*(?:'([^']*)'|"([^"]*)")"#
        ))
        .ok()?;
        let groups = pattern.captures(markup)?;
        let raw = groups
            .get(1)
            .cloned()
            .flatten()
            .or_else(|| groups.get(2).cloned().flatten())?;
        match ScopeState::from_json(&decode_entities(&raw)) {
            Ok(state) => Some(state),
            Err(err) => {
                self.warn(format!("response {err}"));
                None
            }
        }
    }

    /// Governing scope of `node`: the nearest inclusive ancestor carrying
    /// the scope attribute. Malformed state counts as no scope.
    pub(crate) fn resolve_scope(&mut self, node: NodeId) -> Option<ScopeId> {
        if !self.dom.is_connected(node) {
            return None;
        }
        let scope_node = self.dom.closest_with_attr(node, &self.config.scope_attr)?;
        match self.scopes.load(&self.dom, scope_node) {
            Ok(id) => Some(id),
            Err(err) => {
                self.warn(err.to_string());
                None
            }
        }
    }

    /// Registers every scope element in the document and renders its
    /// bindings.
    pub(crate) fn initialize_scopes(&mut self) {
        let scope_nodes = self
            .dom
            .all_element_nodes()
            .into_iter()
            .filter(|&node| self.dom.has_attr(node, &self.config.scope_attr))
            .collect::<Vec<_>>();
        let mut ids = Vec::with_capacity(scope_nodes.len());
        for node in scope_nodes {
            match self.scopes.load(&self.dom, node) {
                Ok(id) => ids.push(id),
                Err(err) => self.warn(err.to_string()),
            }
        }
        for id in ids {
            self.render_bindings(id);
        }
    }

    // After a merge the scope elements may have been replaced, rewritten or
    // added.
    fn resync_scopes(&mut self) {
        let evicted = self.scopes.sweep(&self.dom);
        if evicted > 0 {
            self.trace_action_line(format!("[scope] sweep evicted={evicted}"));
        }
        self.initialize_scopes();
    }

    pub(crate) fn render_bindings(&mut self, id: ScopeId) -> RenderReport {
        let (Some(node), Some(state)) = (self.scopes.node(id), self.scopes.state(id).cloned())
        else {
            return RenderReport::default();
        };
        let report = render(&mut self.dom, node, &state, binding_attrs(&self.config));
        for failure in &report.failures {
            self.warn(format!("binding in {id}: {failure}"));
        }
        report
    }

    fn record_outcome(&mut self, outcome: ActionOutcome) {
        push_bounded(&mut self.outcomes, outcome, self.trace.log_limit);
    }
}

fn endpoint_of(action: &Action) -> Option<String> {
    match action {
        Action::Call(call) => Some(call.endpoint.clone()),
        Action::Set(_) => None,
    }
}
