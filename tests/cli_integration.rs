use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

const ENV_OVERRIDES: &[&str] = &[
    "CHANNELS",
    "CONCURRENCY",
    "ASYNC_PLUGIN_ENABLED",
    "ENABLED_PLUGINS",
    "PLUGIN_TIMEOUT",
    "CACHE_ENABLED",
    "CACHE_PATH",
    "CACHE_MAX_SIZE",
    "CACHE_TTL",
    "PROXY",
];

fn write_config(dir: &Path) -> std::path::PathBuf {
    let config_path = dir.join("pansou.toml");
    let content = format!(
        r#"
[search]
default_channels = ["tgsearchers3", "yunpanxunlei"]

[plugins]
async_plugin_enabled = false

[cache]
path = "{}"

[lifecycle]
cache_ready_timeout_ms = 500
shutdown_timeout_secs = 5
"#,
        dir.join("cache").display().to_string().replace('\\', "/")
    );
    fs::write(&config_path, content).unwrap();
    config_path
}

fn pansou() -> Command {
    let mut cmd = Command::cargo_bin("pansou").unwrap();
    for var in ENV_OVERRIDES {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn health_reports_configured_channels() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = write_config(dir.path());

    pansou()
        .arg("--config")
        .arg(&config)
        .arg("health")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""status":"ok""#))
        .stdout(predicate::str::contains(r#""channels_count":2"#))
        .stdout(predicate::str::contains(r#""plugin_count":0"#))
        .stdout(predicate::str::contains(r#""plugins":"#).not());

    Ok(())
}

#[test]
fn health_honours_environment_overrides() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = write_config(dir.path());

    pansou()
        .env("CHANNELS", "only_one")
        .arg("--config")
        .arg(&config)
        .arg("health")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""channels":["only_one"]"#));

    Ok(())
}

#[test]
fn blank_keyword_fails_after_clean_startup() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = write_config(dir.path());

    pansou()
        .arg("--config")
        .arg(&config)
        .arg("search")
        .arg("   ")
        .assert()
        .failure()
        .stderr(predicate::str::contains("keyword must not be empty"));

    Ok(())
}

#[test]
fn unreadable_config_is_fatal() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = dir.path().join("broken.toml");
    fs::write(&config, "[search\ndefault_channels = 3")?;

    pansou()
        .arg("--config")
        .arg(&config)
        .arg("health")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));

    Ok(())
}

#[test]
fn invalid_ext_json_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = write_config(dir.path());

    pansou()
        .arg("--config")
        .arg(&config)
        .arg("search")
        .arg("dune")
        .arg("--ext")
        .arg("not json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("JSON error"));

    Ok(())
}
