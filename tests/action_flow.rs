use live_actions::{
    Action, ActionTerminal, CallAction, Error, HttpMethod, HttpRequest, HttpResponse, OuterSwap,
    Result, Runtime, RuntimeConfig, SetAction, SwapMode, Transport, TransportError, Value,
};

const TODO_HTML: &str = r#"
<main>
  <section id="todos" az-scope='{"open":2,"filter":"all","busy":false}'>
    <h2 id="title" az-bind:text="if open === 1 { '1 item left' } else { open + ' items left' }">2 items left</h2>
    <button id="clear" az-on="click call clear_done -> #list morph" data-predict="busy = true"
            az-bind:class.loading="busy">Clear</button>
    <button id="filter-open" az-on="click set filter = 'open'">Open</button>
    <span id="filter" data-bind="filter">all</span>
    <ul id="list">
      <li>one</li>
      <li>two</li>
    </ul>
  </section>
  <aside id="profile" az-scope='{"name":"ann","followers":10}'>
    <b id="name" data-bind="name">ann</b>
    <button id="follow" az-on="click call follow" data-predict="followers = followers + 1">Follow</button>
    <i id="followers" data-bind="followers">10</i>
  </aside>
</main>
"#;

#[test]
fn independent_scopes_progress_independently() -> Result<()> {
    let mut rt = Runtime::from_html(TODO_HTML)?;
    rt.set_morph(Box::new(OuterSwap));
    rt.set_action_mock(
        "clear_done",
        200,
        r#"<ul id="list"><li>two</li></ul>"#,
    );
    rt.set_action_mock(
        "follow",
        200,
        r#"<aside id="profile" az-scope='{"name":"ann","followers":11}'></aside>"#,
    );

    rt.click("#clear")?;
    rt.click("#follow")?;
    assert!(rt.has_class("#todos", "loading")?);
    rt.assert_text("#followers", "11")?;
    assert_eq!(rt.pending_requests().len(), 2);

    rt.settle_requests()?;
    let outcomes = rt.take_action_outcomes();
    let terminals = outcomes.iter().map(|o| o.terminal).collect::<Vec<_>>();
    // the clear response carries no scope marker, so the prediction is undone
    assert_eq!(
        terminals,
        vec![ActionTerminal::Reconciled, ActionTerminal::Matched]
    );
    assert!(!rt.has_class("#todos", "loading")?);
    rt.assert_text("#list", "two")?;
    rt.assert_text("#followers", "11")?;
    Ok(())
}

#[test]
fn set_actions_never_touch_the_network() -> Result<()> {
    let mut rt = Runtime::from_html(TODO_HTML)?;
    rt.click("#filter-open")?;
    rt.assert_text("#filter", "open")?;
    rt.assert_attr(
        "#todos",
        "az-scope",
        r#"{"open":2,"filter":"open","busy":false}"#,
    )?;
    assert!(rt.take_requests().is_empty());
    assert!(rt.pending_requests().is_empty());
    Ok(())
}

#[test]
fn text_binding_expressions_render_on_load() -> Result<()> {
    let rt = Runtime::from_html(
        r#"<div az-scope='{"open":1}'><h2 id="t" az-bind:text="if open === 1 { '1 item left' } else { open + ' items left' }"></h2></div>"#,
    )?;
    rt.assert_text("#t", "1 item left")?;
    Ok(())
}

#[test]
fn programmatic_actions_run_like_triggered_ones() -> Result<()> {
    let mut rt = Runtime::from_html(TODO_HTML)?;
    rt.execute(
        "#name",
        Action::Set(SetAction {
            field: "name".into(),
            value_expr: "'bea'".into(),
        }),
    )?;
    rt.assert_text("#name", "bea")?;

    rt.execute(
        "#name",
        Action::Call(CallAction {
            action_name: "rename".into(),
            endpoint: "/api/rename".into(),
            target: None,
            swap: SwapMode::Morph,
            prediction: Some("followers = 0".into()),
        }),
    )?;
    rt.assert_text("#followers", "0")?;
    let request = rt
        .take_requests()
        .pop()
        .ok_or_else(|| Error::Runtime("no request".into()))?;
    assert_eq!(request.method, HttpMethod::Post);
    assert_eq!(request.url, "/api/rename");
    assert_eq!(
        request.body.as_deref(),
        Some(r#"{"name":"bea","followers":10}"#)
    );

    rt.set_url_failure("/api/rename", "connection reset");
    rt.settle_requests()?;
    rt.assert_text("#followers", "10")?;
    let outcome = rt.take_action_outcomes().remove(1);
    assert_eq!(outcome.terminal, ActionTerminal::RolledBack);
    assert_eq!(outcome.endpoint.as_deref(), Some("/api/rename"));
    Ok(())
}

#[test]
fn missing_swap_target_abandons_the_merge() -> Result<()> {
    let mut rt = Runtime::from_html(
        r#"<div id="s" az-scope='{}'><button id="b" az-on="click call load -> #nowhere">x</button></div>"#,
    )?;
    rt.set_action_mock("load", 200, "<p>loaded</p>");
    rt.click("#b")?;
    rt.settle_requests()?;
    let outcomes = rt.take_action_outcomes();
    assert_eq!(outcomes[0].terminal, ActionTerminal::Abandoned);
    let warnings = rt.take_warnings();
    assert!(
        warnings.iter().any(|w| w.contains("#nowhere not found")),
        "{warnings:?}"
    );
    rt.assert_exists("#b")?;
    Ok(())
}

#[test]
fn queued_set_runs_after_the_pending_call() -> Result<()> {
    let mut rt = Runtime::from_html(
        r#"<div id="s" az-scope='{"n":0}'>
             <button id="call" az-on="click call save -> #msg" data-predict="n = 5">save</button>
             <button id="inc" az-on="click set n = n + 1">inc</button>
             <span id="v" data-bind="n">0</span>
             <p id="msg"></p>
           </div>"#,
    )?;
    rt.set_action_mock("save", 200, r#"<p id="msg" az-scope='{"n":7}'>saved</p>"#);
    rt.click("#call")?;
    rt.click("#inc")?;
    rt.assert_text("#v", "5")?;

    rt.settle_requests()?;
    rt.assert_text("#msg", "saved")?;
    rt.assert_text("#v", "8")?;
    let terminals = rt
        .take_action_outcomes()
        .into_iter()
        .map(|o| o.terminal)
        .collect::<Vec<_>>();
    assert_eq!(
        terminals,
        vec![ActionTerminal::Reconciled, ActionTerminal::Applied]
    );
    Ok(())
}

#[test]
fn config_is_read_from_json() -> Result<()> {
    let config = RuntimeConfig::from_json(
        r#"{"commandAttr":"x-on","scopeAttr":"x-scope","eventTypes":["click"]}"#,
    )?;
    assert_eq!(config.command_attr, "x-on");
    assert_eq!(config.predict_attr, "data-predict");

    let mut rt = Runtime::with_config(
        r#"<div x-scope='{"n":1}'><input id="i" x-on="input set n = 2"><button id="b" x-on="click set n = 3"></button></div>"#,
        config,
    )?;
    // input is not a handled event type here
    let typed = rt.type_text("#i", "z")?;
    assert!(!typed.handled);
    rt.click("#b")?;
    assert_eq!(rt.config().scope_attr, "x-scope");
    assert_eq!(
        rt.scope_state("#b")?.and_then(|s| s.get("n").cloned()),
        Some(Value::from(3))
    );

    assert!(matches!(
        RuntimeConfig::from_json(r#"{"unknownKey":true}"#),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        Runtime::with_config(
            "<p></p>",
            RuntimeConfig {
                scope_attr: "Bad Attr".into(),
                ..RuntimeConfig::default()
            },
        ),
        Err(Error::Config(_))
    ));
    Ok(())
}

#[test]
fn transport_sees_every_post() -> Result<()> {
    #[derive(Default)]
    struct Counting {
        posts: usize,
    }
    impl Transport for Counting {
        fn send(
            &mut self,
            request: &HttpRequest,
        ) -> std::result::Result<HttpResponse, TransportError> {
            if request.method != HttpMethod::Post {
                return Err(TransportError::new("unexpected method"));
            }
            self.posts += 1;
            Ok(HttpResponse {
                status: 201,
                body: format!(
                    r#"<aside id="profile" az-scope='{{"name":"ann","followers":{}}}'><button id="follow" az-on="click call follow" data-predict="followers = followers + 1">Follow</button><i id="followers" data-bind="followers"></i></aside>"#,
                    9 + self.posts
                ),
            })
        }
    }

    let mut rt = Runtime::from_html(TODO_HTML)?;
    rt.set_transport(Box::new(Counting::default()));
    rt.click("#follow")?;
    rt.settle_requests()?;
    rt.assert_text("#followers", "10")?;
    rt.click("#follow")?;
    rt.settle_requests()?;
    rt.assert_text("#followers", "11")?;
    let terminals = rt
        .take_action_outcomes()
        .into_iter()
        .map(|o| o.terminal)
        .collect::<Vec<_>>();
    // the second prediction read the reconciled count
    assert_eq!(
        terminals,
        vec![ActionTerminal::Reconciled, ActionTerminal::Matched]
    );
    Ok(())
}
