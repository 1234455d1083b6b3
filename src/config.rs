use super::*;

use serde::Deserialize;

/// Attribute names, endpoints and limits. Every field has a default, so a
/// JSON document only needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct RuntimeConfig {
    pub command_attr: String,
    pub scope_attr: String,
    pub predict_attr: String,
    pub bind_field_attr: String,
    pub bind_text_attr: String,
    pub bind_class_prefix: String,
    pub endpoint_prefix: String,
    pub event_types: Vec<String>,
    pub page_url: String,
    pub reload_path: String,
    pub reload_poll_interval_ms: i64,
    pub settle_step_limit: usize,
    pub live_reload: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_attr: "az-on".to_string(),
            scope_attr: "az-scope".to_string(),
            predict_attr: "data-predict".to_string(),
            bind_field_attr: "data-bind".to_string(),
            bind_text_attr: "az-bind:text".to_string(),
            bind_class_prefix: "az-bind:class.".to_string(),
            endpoint_prefix: "/_azumi/action/".to_string(),
            event_types: ["click", "submit", "change", "input"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            page_url: "http://localhost/".to_string(),
            reload_path: "/_azumi/live_reload".to_string(),
            reload_poll_interval_ms: 200,
            settle_step_limit: 10_000,
            live_reload: false,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(src: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(src).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("commandAttr", &self.command_attr),
            ("scopeAttr", &self.scope_attr),
            ("predictAttr", &self.predict_attr),
            ("bindFieldAttr", &self.bind_field_attr),
            ("bindTextAttr", &self.bind_text_attr),
            ("bindClassPrefix", &self.bind_class_prefix),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{name} must not be empty")));
            }
            if value.chars().any(|c| c.is_whitespace() || c.is_ascii_uppercase()) {
                return Err(Error::Config(format!(
                    "{name} must be a lowercase attribute name, got {value:?}"
                )));
            }
        }
        if self.event_types.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::Config("eventTypes must not contain empty entries".into()));
        }
        if !self.reload_path.starts_with('/') {
            return Err(Error::Config(format!(
                "reloadPath must start with '/', got {:?}",
                self.reload_path
            )));
        }
        if self.reload_poll_interval_ms <= 0 {
            return Err(Error::Config(
                "reloadPollIntervalMs must be positive".into(),
            ));
        }
        if self.settle_step_limit == 0 {
            return Err(Error::Config(
                "settleStepLimit requires at least 1 step".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn handles_event(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|t| t == event_type)
    }
}
