use super::*;
use crate::cache::{CachePolicy, OutputCacheConfig};

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.cache.max_body_bytes = Some(1024);

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        cache_max_body_bytes: Some(2048),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.cache.max_body_bytes, 2048);
}

#[test]
fn resolved_cache_defaults_match_the_library_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    let resolved = OutputCacheConfig::from(&settings.cache);
    let library = OutputCacheConfig::default();

    assert_eq!(resolved.default_media_type, library.default_media_type);
    assert_eq!(resolved.supported_media_types, library.supported_media_types);
    assert_eq!(resolved.max_body_bytes, library.max_body_bytes);
    assert_eq!(resolved.purge_interval(), library.purge_interval());
}

#[test]
fn cache_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.default_media_type, DEFAULT_MEDIA_TYPE);
    assert_eq!(settings.cache.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    assert_eq!(settings.cache.purge_interval_ms, DEFAULT_PURGE_INTERVAL_MS);
    assert_eq!(
        settings.cache.supported_media_types.len(),
        DEFAULT_SUPPORTED_MEDIA_TYPES.len()
    );
    assert_eq!(settings.server.addr.to_string(), "127.0.0.1:3000");
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

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn cache_can_be_disabled_via_cli() {
    let mut raw = RawSettings::default();
    raw.apply_serve_overrides(&ServeOverrides {
        cache_enabled: Some(false),
        cache_purge_interval_ms: Some(0),
        ..Default::default()
    });
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(!settings.cache.enabled);
    assert_eq!(settings.cache.purge_interval_ms, 0);
}

#[test]
fn zero_body_limit_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.max_body_bytes = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero limit must fail");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.max_body_bytes",
            ..
        }
    ));
}

#[test]
fn malformed_media_types_are_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.default_media_type = Some("json".to_string());
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.cache.supported_media_types = Some(vec!["Text/XML".to_string(), "xml".to_string()]);
    let err = Settings::from_raw(raw).expect_err("bare subtype must fail");
    assert!(err.to_string().contains("`xml`"));
}

#[test]
fn invalid_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "logging.level",
            ..
        })
    ));
}

#[test]
fn endpoint_policies_load_from_config_sources() {
    let raw: RawSettings = Config::builder()
        .add_source(File::from_str(
            r#"
            [cache]
            max_body_bytes = 2048

            [cache.endpoints.teams.get]
            must_revalidate = true
            policy = { kind = "fixed_duration", server_seconds = 100, client_seconds = 50 }
            "#,
            config::FileFormat::Toml,
        ))
        .build()
        .expect("config should build")
        .try_deserialize()
        .expect("raw settings should deserialize");

    let settings = Settings::from_raw(raw).expect("valid settings");
    let policy = &settings.cache.endpoints["teams"]["get"];

    assert!(policy.must_revalidate);
    assert_eq!(policy.policy, CachePolicy::fixed(100, 50));
    assert_eq!(settings.cache.max_body_bytes, 2048);
}

#[test]
fn invalid_endpoint_policy_fails_to_load() {
    let result = Config::builder()
        .add_source(File::from_str(
            r#"
            [cache.endpoints.teams.get]
            policy = { kind = "recurring_daily", hour = 25 }
            "#,
            config::FileFormat::Toml,
        ))
        .build()
        .expect("config should build")
        .try_deserialize::<RawSettings>();

    assert!(result.is_err());
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["output-cache"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "output-cache",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--cache-max-body-bytes",
        "65536",
        "--log-json",
        "yes",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(serve.overrides.cache_max_body_bytes, Some(65536));
            assert_eq!(serve.overrides.log_json, Some(true));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_check_config_command() {
    let args = CliArgs::parse_from(["output-cache", "check-config"]);
    assert!(matches!(args.command, Some(Command::CheckConfig)));
}
