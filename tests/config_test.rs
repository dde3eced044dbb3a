use std::sync::Mutex;

use workq::config::{Config, PoolSettings};
use workq::engine::PoolConfig;

// Environment variables are process-global; serialize the tests touching them.
static ENV_LOCK: Mutex<()> = Mutex::new(());

const VARS: [&str; 5] = [
    "WORKQ_PROCESSES",
    "WORKQ_POLL_INTERVAL_MS",
    "WORKQ_BONUS_ROUNDS",
    "WORKQ_MAX_RETRY",
    "WORKQ_SIGNAL_TIMEOUT_MS",
];

fn clear_vars() {
    for var in VARS {
        unsafe {
            std::env::remove_var(var);
        }
    }
}

#[test]
fn config_from_env_uses_defaults_when_unset() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_vars();

    let config = Config::from_env().unwrap();
    assert_eq!(config.pool.poll_interval_ms, 1000);
    assert_eq!(config.pool.bonus_rounds, 2);
    assert_eq!(config.pool.max_retry, 2);
    assert!(config.pool.processes >= 1);
    assert!(!config.log_level.is_empty());
}

#[test]
fn config_from_env_reads_pool_settings() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_vars();
    unsafe {
        std::env::set_var("WORKQ_PROCESSES", "3");
        std::env::set_var("WORKQ_POLL_INTERVAL_MS", "250");
        std::env::set_var("WORKQ_BONUS_ROUNDS", "4");
        std::env::set_var("WORKQ_MAX_RETRY", "1");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.pool.processes, 3);
    assert_eq!(config.pool.poll_interval_ms, 250);
    assert_eq!(config.pool.bonus_rounds, 4);
    assert_eq!(config.pool.max_retry, 1);

    clear_vars();
}

#[test]
fn config_from_env_rejects_garbage() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_vars();
    unsafe {
        std::env::set_var("WORKQ_PROCESSES", "many");
    }

    let result = Config::from_env();
    assert!(result.is_err());

    unsafe {
        std::env::set_var("WORKQ_PROCESSES", "0");
    }
    assert!(Config::from_env().is_err());

    clear_vars();
}

#[test]
fn config_from_toml() {
    let config = Config::from_toml_str(
        r#"
        log_level = "debug"
        otel_endpoint = "http://localhost:4317"

        [pool]
        processes = 8
        bonus_rounds = 1
        "#,
    )
    .unwrap();

    assert_eq!(config.log_level, "debug");
    assert_eq!(config.otel_endpoint.as_deref(), Some("http://localhost:4317"));
    assert_eq!(config.pool.processes, 8);
    assert_eq!(config.pool.bonus_rounds, 1);
    assert_eq!(config.pool.max_retry, PoolSettings::default().max_retry);
}

#[test]
fn config_from_toml_rejects_unknown_keys() {
    assert!(Config::from_toml_str("[pool]\nworkers = 3\n").is_err());
    assert!(Config::from_toml_str("[pool]\nprocesses = 0\n").is_err());
}

#[test]
fn pool_config_converts_milliseconds() {
    let settings = PoolSettings {
        processes: 2,
        poll_interval_ms: 1500,
        bonus_rounds: 3,
        max_retry: 5,
        signal_timeout_ms: 200,
    };
    let config = PoolConfig::from(settings);
    assert_eq!(config.processes, 2);
    assert_eq!(config.poll_interval.as_millis(), 1500);
    assert_eq!(config.signal_timeout.as_millis(), 200);
    assert_eq!(config.bonus_rounds, 3);
    assert_eq!(config.max_retry, 5);
}
