use live_actions::{Error, HttpMethod, ReloadState, Result, Runtime, RuntimeConfig};

const PAGE: &str = "http://localhost:8080/app";

fn live_runtime() -> Result<Runtime> {
    Runtime::with_config(
        "<p id='page'>hello</p>",
        RuntimeConfig {
            live_reload: true,
            page_url: PAGE.into(),
            ..RuntimeConfig::default()
        },
    )
}

#[test]
fn reload_is_off_unless_configured() -> Result<()> {
    let mut rt = Runtime::from_html("<p></p>")?;
    assert_eq!(rt.reload_state(), ReloadState::Disabled);
    assert_eq!(rt.reload_channel_url(), None);
    rt.reload_channel_opened();
    rt.reload_channel_closed();
    rt.advance_time(10_000)?;
    assert_eq!(rt.reload_state(), ReloadState::Disabled);
    assert!(rt.take_requests().is_empty());
    Ok(())
}

#[test]
fn channel_url_is_derived_from_the_page() -> Result<()> {
    let rt = live_runtime()?;
    assert_eq!(rt.reload_state(), ReloadState::Connecting);
    assert_eq!(
        rt.reload_channel_url(),
        Some("ws://localhost:8080/_azumi/live_reload")
    );

    let secure = Runtime::with_config(
        "<p></p>",
        RuntimeConfig {
            live_reload: true,
            page_url: "https://example.com/x".into(),
            reload_path: "/dev/reload".into(),
            ..RuntimeConfig::default()
        },
    )?;
    assert_eq!(
        secure.reload_channel_url(),
        Some("wss://example.com/dev/reload")
    );
    Ok(())
}

#[test]
fn close_before_open_does_not_start_polling() -> Result<()> {
    let mut rt = live_runtime()?;
    rt.reload_channel_closed();
    assert_eq!(rt.reload_state(), ReloadState::Connecting);
    rt.advance_time(1_000)?;
    assert!(rt.take_requests().is_empty());
    Ok(())
}

#[test]
fn dropped_channel_polls_until_the_server_answers() -> Result<()> {
    let mut rt = live_runtime()?;
    rt.enable_trace(true);
    rt.reload_channel_opened();
    assert_eq!(rt.reload_state(), ReloadState::Connected);

    rt.reload_channel_closed();
    assert_eq!(rt.reload_state(), ReloadState::Polling);

    rt.set_url_mock(PAGE, 503, "restarting");
    rt.advance_time(199)?;
    assert!(rt.take_requests().is_empty());
    rt.advance_time(1)?;
    let probes = rt.take_requests();
    assert_eq!(probes.len(), 1);
    assert_eq!(probes[0].method, HttpMethod::Head);
    assert_eq!(probes[0].url, PAGE);
    assert_eq!(probes[0].body, None);
    assert_eq!(rt.reload_state(), ReloadState::Polling);

    // unreachable server: the probe fails at the transport
    rt.clear_mocks();
    rt.advance_time(600)?;
    assert_eq!(rt.take_requests().len(), 3);
    assert_eq!(rt.reload_count(), 0);

    rt.set_url_mock(PAGE, 200, "");
    rt.advance_time(200)?;
    assert_eq!(rt.reload_state(), ReloadState::ReloadRequested);
    assert_eq!(rt.reload_count(), 1);
    assert_eq!(rt.now_ms(), 1_000);

    rt.advance_time(5_000)?;
    assert!(rt.take_requests().is_empty());
    assert!(
        rt.take_trace_logs()
            .iter()
            .any(|line| line.starts_with("[reload] server back status=200"))
    );
    Ok(())
}

#[test]
fn custom_poll_interval_is_honoured() -> Result<()> {
    let config = RuntimeConfig::from_json(
        r#"{"liveReload":true,"pageUrl":"http://localhost/","reloadPollIntervalMs":50}"#,
    )?;
    let mut rt = Runtime::with_config("<p></p>", config)?;
    rt.reload_channel_opened();
    rt.reload_channel_closed();
    rt.advance_time(200)?;
    assert_eq!(rt.take_requests().len(), 4);
    Ok(())
}

#[test]
fn clock_never_runs_backwards() -> Result<()> {
    let mut rt = live_runtime()?;
    rt.advance_time(5)?;
    assert!(matches!(rt.advance_time(-1), Err(Error::Runtime(_))));
    assert_eq!(rt.now_ms(), 5);
    assert!(matches!(rt.advance_time(i64::MAX), Err(Error::Runtime(_))));
    assert_eq!(rt.now_ms(), 5);
    rt.advance_time(i64::MAX - 5)?;
    assert_eq!(rt.now_ms(), i64::MAX);
    assert!(matches!(
        RuntimeConfig::from_json(r#"{"reloadPollIntervalMs":0}"#),
        Err(Error::Config(_))
    ));
    Ok(())
}
