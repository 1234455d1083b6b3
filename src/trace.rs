use super::*;

#[derive(Debug)]
pub(crate) struct TraceState {
    pub(crate) enabled: bool,
    pub(crate) events: bool,
    pub(crate) actions: bool,
    pub(crate) network: bool,
    pub(crate) logs: VecDeque<String>,
    pub(crate) log_limit: usize,
    pub(crate) mirror: bool,
    pub(crate) warnings: VecDeque<String>,
}

impl Default for TraceState {
    fn default() -> Self {
        Self {
            enabled: false,
            events: true,
            actions: true,
            network: true,
            logs: VecDeque::new(),
            log_limit: 10_000,
            mirror: true,
            warnings: VecDeque::new(),
        }
    }
}

impl Runtime {
    pub fn enable_trace(&mut self, enabled: bool) {
        self.trace.enabled = enabled;
    }

    pub fn set_trace_events(&mut self, enabled: bool) {
        self.trace.events = enabled;
    }

    pub fn set_trace_actions(&mut self, enabled: bool) {
        self.trace.actions = enabled;
    }

    pub fn set_trace_network(&mut self, enabled: bool) {
        self.trace.network = enabled;
    }

    /// Mirrors trace lines to the `tracing` facade at debug level.
    pub fn set_trace_mirror(&mut self, enabled: bool) {
        self.trace.mirror = enabled;
    }

    /// Caps the trace buffer and the undrained warning, request and outcome
    /// lists. The oldest entries are evicted first.
    pub fn set_trace_log_limit(&mut self, max_entries: usize) -> Result<()> {
        if max_entries == 0 {
            return Err(Error::Config(
                "set_trace_log_limit requires at least 1 entry".into(),
            ));
        }
        self.trace.log_limit = max_entries;
        trim_front(&mut self.trace.logs, max_entries);
        trim_front(&mut self.trace.warnings, max_entries);
        trim_front(&mut self.network.issued, max_entries);
        trim_front(&mut self.outcomes, max_entries);
        Ok(())
    }

    pub fn take_trace_logs(&mut self) -> Vec<String> {
        self.trace.logs.drain(..).collect()
    }

    /// Warnings raised since the last call: parse failures, malformed scope
    /// state, failed requests, unavailable merges.
    pub fn take_warnings(&mut self) -> Vec<String> {
        self.trace.warnings.drain(..).collect()
    }

    pub(crate) fn trace_event_line(&mut self, line: String) {
        if self.trace.events {
            self.trace_line(line);
        }
    }

    pub(crate) fn trace_action_line(&mut self, line: String) {
        if self.trace.actions {
            self.trace_line(line);
        }
    }

    pub(crate) fn trace_network_line(&mut self, line: String) {
        if self.trace.network {
            self.trace_line(line);
        }
    }

    pub(crate) fn trace_reload_line(&mut self, line: String) {
        if self.trace.network {
            self.trace_line(line);
        }
    }

    fn trace_line(&mut self, line: String) {
        if self.trace.enabled {
            if self.trace.mirror {
                tracing::debug!(target: "live_actions", "{line}");
            }
            push_bounded(&mut self.trace.logs, line, self.trace.log_limit);
        }
    }

    pub(crate) fn warn(&mut self, message: String) {
        tracing::warn!(target: "live_actions", "{message}");
        self.trace_action_line(format!("[warn] {message}"));
        push_bounded(&mut self.trace.warnings, message, self.trace.log_limit);
    }
}

/// Appends `item`, evicting the oldest entries beyond `limit`.
pub(crate) fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, limit: usize) {
    buffer.push_back(item);
    trim_front(buffer, limit);
}

fn trim_front<T>(buffer: &mut VecDeque<T>, limit: usize) {
    while buffer.len() > limit {
        buffer.pop_front();
    }
}
