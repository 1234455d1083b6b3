//! Development reload channel: a websocket the embedder drives, falling back
//! to polling the page with `HEAD` once the socket drops.

use super::*;

use crate::trace::push_bounded;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadState {
    Disabled,
    Connecting,
    Connected,
    /// Socket closed after a successful open; probing the page.
    Polling,
    /// The page answered again; a full reload was requested.
    ReloadRequested,
}

#[derive(Debug)]
pub(crate) struct ReloadMonitor {
    state: ReloadState,
    channel_url: String,
    page_url: String,
    poll_interval_ms: i64,
    next_poll_at: Option<i64>,
    reload_count: usize,
}

impl ReloadMonitor {
    pub(crate) fn new(page_url: &str, reload_path: &str, poll_interval_ms: i64, enabled: bool) -> Self {
        Self {
            state: if enabled {
                ReloadState::Connecting
            } else {
                ReloadState::Disabled
            },
            channel_url: channel_url(page_url, reload_path),
            page_url: page_url.to_string(),
            poll_interval_ms,
            next_poll_at: None,
            reload_count: 0,
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.state != ReloadState::Disabled
    }

    pub(crate) fn channel_url(&self) -> &str {
        &self.channel_url
    }
}

/// `http(s)://host/...` becomes `ws(s)://host<reload_path>`.
fn channel_url(page_url: &str, reload_path: &str) -> String {
    let (scheme, rest) = page_url.split_once("://").unwrap_or(("http", page_url));
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let ws_scheme = if scheme.eq_ignore_ascii_case("https") {
        "wss"
    } else {
        "ws"
    };
    format!("{ws_scheme}://{host}{reload_path}")
}

impl Runtime {
    pub fn reload_state(&self) -> ReloadState {
        self.reload.state
    }

    pub fn reload_channel_url(&self) -> Option<&str> {
        self.reload.is_enabled().then_some(self.reload.channel_url.as_str())
    }

    /// Number of full-page reloads requested so far.
    pub fn reload_count(&self) -> usize {
        self.reload.reload_count
    }

    pub fn reload_channel_opened(&mut self) {
        if self.reload.state == ReloadState::Connecting {
            self.reload.state = ReloadState::Connected;
            let url = self.reload.channel_url.clone();
            self.trace_reload_line(format!("[reload] connected url={url}"));
        }
    }

    /// A close before any open is ignored; after an open it starts polling.
    pub fn reload_channel_closed(&mut self) {
        if self.reload.state != ReloadState::Connected {
            return;
        }
        self.reload.state = ReloadState::Polling;
        self.reload.next_poll_at = Some(self.now_ms.saturating_add(self.reload.poll_interval_ms));
        let interval = self.reload.poll_interval_ms;
        self.trace_reload_line(format!("[reload] disconnected polling_every={interval}ms"));
    }

    /// Advances the runtime clock, sending due reload probes.
    pub fn advance_time(&mut self, delta_ms: i64) -> Result<()> {
        if delta_ms < 0 {
            return Err(Error::Runtime(
                "advance_time requires non-negative milliseconds".into(),
            ));
        }
        let target = self.now_ms.checked_add(delta_ms).ok_or_else(|| {
            Error::Runtime(format!(
                "advance_time({delta_ms}) overflows the clock at {}ms",
                self.now_ms
            ))
        })?;
        let mut steps = 0usize;
        while self.reload.state == ReloadState::Polling {
            let Some(due) = self.reload.next_poll_at else {
                break;
            };
            if due > target {
                break;
            }
            steps += 1;
            if steps > self.network.step_limit {
                return Err(Error::Runtime(format!(
                    "reload polling exceeded max steps ({})",
                    self.network.step_limit
                )));
            }
            self.now_ms = due;
            self.poll_page();
        }
        self.now_ms = target;
        Ok(())
    }

    fn poll_page(&mut self) {
        let url = self.reload.page_url.clone();
        let request = self.network.build_request(HttpMethod::Head, &url, Vec::new(), None);
        push_bounded(&mut self.network.issued, request.clone(), self.trace.log_limit);
        match self.network.send(&request) {
            Ok(response) if response.is_success() => {
                self.reload.state = ReloadState::ReloadRequested;
                self.reload.next_poll_at = None;
                self.reload.reload_count += 1;
                self.trace_reload_line(format!(
                    "[reload] server back status={} reloading",
                    response.status
                ));
            }
            Ok(response) => {
                self.reload.next_poll_at = Some(self.now_ms.saturating_add(self.reload.poll_interval_ms));
                self.trace_reload_line(format!("[reload] probe status={}", response.status));
            }
            Err(err) => {
                self.reload.next_poll_at = Some(self.now_ms.saturating_add(self.reload.poll_interval_ms));
                self.trace_reload_line(format!("[reload] probe failed: {err}"));
            }
        }
    }
}
