use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_cover_every_section() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.to_string(), "127.0.0.1:3000");
    assert_eq!(settings.server.graceful_shutdown, Duration::from_secs(30));
    assert_eq!(settings.logging.format, LogFormat::Compact);
    assert_eq!(settings.store.backend, StoreBackend::Redis);
    assert_eq!(settings.store.url, "redis://localhost:6379");
    assert_eq!(settings.store.max_connect_attempts.get(), 3);
    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.default_ttl_secs.get(), 300);
    assert_eq!(settings.cache.listing_ttl_secs.get(), 3600);
    assert_eq!(settings.rate_limit.window_secs.get(), 60);
    assert_eq!(settings.rate_limit.max_requests.get(), 20);
    assert_eq!(settings.rate_limit.key_prefix, "ratelimit:");
    assert!(settings.content.seed_file.is_none());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.logging.format, LogFormat::Json);
}

#[test]
fn zero_values_are_rejected_with_their_key() {
    let mut raw = RawSettings::default();
    raw.rate_limit.max_requests = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero limit");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "rate_limit.max_requests",
            ..
        }
    ));

    let mut raw = RawSettings::default();
    raw.cache.default_ttl_seconds = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero ttl");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.default_ttl_seconds",
            ..
        }
    ));

    let mut raw = RawSettings::default();
    raw.server.port = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn unknown_backend_is_rejected() {
    let mut raw = RawSettings::default();
    raw.store.backend = Some("memcached".to_string());
    let err = Settings::from_raw(raw).expect_err("unknown backend");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "store.backend",
            ..
        }
    ));
}

#[test]
fn redis_url_scheme_is_checked() {
    let mut raw = RawSettings::default();
    raw.store.url = Some("http://localhost:6379".to_string());
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.store.backend = Some("memory".to_string());
    raw.store.url = Some("not a url".to_string());
    let settings = Settings::from_raw(raw).expect("memory ignores url");
    assert_eq!(settings.store.backend, StoreBackend::Memory);
}

#[test]
fn backoff_cap_must_cover_step() {
    let mut raw = RawSettings::default();
    raw.store.backoff_step_ms = Some(500);
    raw.store.backoff_cap_ms = Some(100);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn glob_characters_in_key_prefix_are_rejected() {
    let mut raw = RawSettings::default();
    raw.rate_limit.key_prefix = Some("rl*:".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["cachet"]);
    assert!(args.command.is_none());
    assert!(args.config_file.is_none());
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "cachet",
        "serve",
        "--server-port",
        "8080",
        "--store-backend",
        "memory",
        "--cache-enabled",
        "off",
        "--rate-limit-max-requests",
        "5",
        "--content-seed-file",
        "seed.toml",
    ]);

    let Some(Command::Serve(serve)) = args.command else {
        panic!("expected serve command");
    };
    let mut raw = RawSettings::default();
    raw.apply_serve_overrides(&serve.overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 8080);
    assert_eq!(settings.store.backend, StoreBackend::Memory);
    assert!(!settings.cache.enabled);
    assert_eq!(settings.rate_limit.max_requests.get(), 5);
    assert_eq!(
        settings.content.seed_file.as_deref(),
        Some(std::path::Path::new("seed.toml"))
    );
}

#[test]
fn parse_selftest_arguments() {
    let args = CliArgs::parse_from([
        "cachet",
        "selftest",
        "--store-url",
        "redis://cache.internal:6380",
    ]);

    let Some(Command::Selftest(selftest)) = args.command else {
        panic!("expected selftest command");
    };
    assert_eq!(selftest.probe_prefix, "cachet:selftest");

    let mut raw = RawSettings::default();
    raw.apply_store_override(&selftest.store);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.store.url, "redis://cache.internal:6380");
}

#[test]
fn explicit_config_file_is_layered() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("override.toml");
    std::fs::write(
        &path,
        "[cache]\nlisting_ttl_seconds = 900\n\n[rate_limit]\nwindow_seconds = 30\n",
    )
    .expect("write config");

    let args = CliArgs::parse_from(["cachet", "--config-file", path.to_str().expect("utf-8")]);
    let settings = load(&args).expect("valid settings");
    assert_eq!(settings.cache.listing_ttl_secs.get(), 900);
    assert_eq!(settings.rate_limit.window_secs.get(), 30);
}
