// tests/config_load.rs
//
// Config resolution against the real process env and cwd, so every test is
// serialized.
//
// Covered:
// - no env, no file → built-in defaults
// - AGGREGATOR_CONFIG_PATH wins over config/aggregator.toml
// - env path pointing nowhere is an error
// - AGGREGATOR_* overrides applied after the file
// - invalid file content surfaces as an error with context

use std::{env, fs};

use portal_aggregator::config::{AppConfig, ENV_CONFIG_PATH};
use serial_test::serial;

const OVERRIDE_KEYS: &[&str] = &[
    "AGGREGATOR_CACHE_TTL_SECS",
    "AGGREGATOR_STALE_TTL_SECS",
    "AGGREGATOR_RATE_WINDOW_MS",
    "AGGREGATOR_RATE_MAX_REQUESTS",
    "AGGREGATOR_COOLDOWN_MS",
    "AGGREGATOR_SWEEP_INTERVAL_SECS",
    "AGGREGATOR_TIE_EPSILON",
];

/// Run `f` inside a fresh temp cwd with all aggregator env vars cleared.
fn in_temp_cwd<F: FnOnce(&std::path::Path)>(f: F) {
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    env::remove_var(ENV_CONFIG_PATH);
    for k in OVERRIDE_KEYS {
        env::remove_var(k);
    }

    f(tmp.path());

    env::remove_var(ENV_CONFIG_PATH);
    for k in OVERRIDE_KEYS {
        env::remove_var(k);
    }
    env::set_current_dir(&old).unwrap();
}

#[test]
#[serial]
fn defaults_without_any_file() {
    in_temp_cwd(|_| {
        let cfg = AppConfig::load_default().unwrap();
        assert!(cfg.feeds.is_empty());
        assert_eq!(cfg.cache.ttl_secs, 300);
        assert_eq!(cfg.rate_limit.max_requests, 30);
        assert_eq!(cfg.rate_limit.cooldown_ms, 900_000);
    });
}

#[test]
#[serial]
fn env_path_wins_over_default_location() {
    in_temp_cwd(|dir| {
        fs::create_dir_all(dir.join("config")).unwrap();
        fs::write(
            dir.join("config/aggregator.toml"),
            "[cache]\nttl_secs = 111\n",
        )
        .unwrap();
        let cfg = AppConfig::load_default().unwrap();
        assert_eq!(cfg.cache.ttl_secs, 111);

        let custom = dir.join("custom.toml");
        fs::write(&custom, "[cache]\nttl_secs = 222\n").unwrap();
        env::set_var(ENV_CONFIG_PATH, custom.display().to_string());
        let cfg = AppConfig::load_default().unwrap();
        assert_eq!(cfg.cache.ttl_secs, 222);
    });
}

#[test]
#[serial]
fn missing_env_path_is_an_error() {
    in_temp_cwd(|dir| {
        env::set_var(ENV_CONFIG_PATH, dir.join("nope.toml").display().to_string());
        let err = AppConfig::load_default().unwrap_err();
        assert!(err.to_string().contains(ENV_CONFIG_PATH));
    });
}

#[test]
#[serial]
fn env_overrides_follow_the_file() {
    in_temp_cwd(|dir| {
        let p = dir.join("agg.toml");
        fs::write(&p, "[rate_limit]\nwindow_ms = 1000\nmax_requests = 2\n").unwrap();
        env::set_var("AGGREGATOR_RATE_MAX_REQUESTS", "9");
        env::set_var("AGGREGATOR_TIE_EPSILON", "1.5");
        env::set_var("AGGREGATOR_CACHE_TTL_SECS", "not-a-number");

        let cfg = AppConfig::load_from(&p).unwrap();
        assert_eq!(cfg.rate_limit.window_ms, 1000);
        assert_eq!(cfg.rate_limit.max_requests, 9);
        assert!((cfg.merge.tie_epsilon - 1.5).abs() < 1e-9);
        assert_eq!(cfg.cache.ttl_secs, 300);
    });
}

#[test]
#[serial]
fn broken_file_reports_path() {
    in_temp_cwd(|dir| {
        let p = dir.join("broken.toml");
        fs::write(&p, "[cache\nttl_secs = ").unwrap();
        let err = AppConfig::load_from(&p).unwrap_err();
        assert!(format!("{err:#}").contains("broken.toml"));
    });
}

#[test]
#[serial]
fn shipped_config_is_valid() {
    let p = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/aggregator.toml");
    let cfg = AppConfig::load_from(&p).unwrap();
    assert!(cfg.feeds.iter().any(|f| f.name == "news"));
    cfg.build_aggregator().unwrap();
}
