use std::io::Write;

use magma_proc::config::{DEFAULT_ARGS, DEFAULT_COMMAND};
use magma_proc::{AppError, ProcessConfig};

fn sample_toml() -> &'static str {
    r#"
command = "/opt/magma/bin/magma"
args = ["-s", "startup.m"]
status_buffer = 16
event_buffer = 4

[env]
MAGMA_LIBRARY_ROOT = "/opt/magma/libs"
PATH = "/usr/bin"
"#
}

#[test]
fn parses_valid_config() {
    let config = ProcessConfig::from_toml_str(sample_toml()).expect("valid config");
    assert_eq!(config.command.as_deref(), Some("/opt/magma/bin/magma"));
    assert_eq!(config.args, vec!["-s", "startup.m"]);
    assert_eq!(config.status_buffer, 16);
    assert_eq!(config.event_buffer, 4);
    let env = config.env.expect("env table");
    assert_eq!(
        env.get("MAGMA_LIBRARY_ROOT").map(String::as_str),
        Some("/opt/magma/libs")
    );
}

#[test]
fn empty_document_uses_defaults() {
    let config = ProcessConfig::from_toml_str("").expect("empty config");
    assert_eq!(config, ProcessConfig::default());
    assert_eq!(config.executable(), DEFAULT_COMMAND);
    assert_eq!(config.env, None);
    assert_eq!(config.status_buffer, 64);
    assert_eq!(config.event_buffer, 32);
}

#[test]
fn default_args_precede_extra_args() {
    let config = ProcessConfig {
        args: vec!["-S".into(), "12345".into()],
        ..ProcessConfig::default()
    };
    let mut expected: Vec<String> = DEFAULT_ARGS.iter().map(|arg| (*arg).to_owned()).collect();
    expected.extend(["-S".to_owned(), "12345".to_owned()]);
    assert_eq!(config.arguments(), expected);
    assert_eq!(DEFAULT_ARGS, &["-x", "-n", "-b"]);
}

#[test]
fn rejects_empty_command() {
    let err = ProcessConfig::from_toml_str("command = \"  \"").expect_err("empty command");
    assert!(matches!(err, AppError::Config(_)), "got {err}");
}

#[test]
fn rejects_zero_buffers() {
    assert!(ProcessConfig::from_toml_str("status_buffer = 0").is_err());
    assert!(ProcessConfig::from_toml_str("event_buffer = 0").is_err());
}

#[test]
fn rejects_env_name_with_equals_sign() {
    let err = ProcessConfig::from_toml_str("[env]\n\"A=B\" = \"c\"").expect_err("bad env name");
    assert!(matches!(err, AppError::Config(_)), "got {err}");
}

#[test]
fn rejects_invalid_field_type() {
    let err = ProcessConfig::from_toml_str("args = \"-x\"").expect_err("args must be a list");
    assert!(err.to_string().starts_with("config: invalid config"), "got {err}");
}

#[test]
fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(sample_toml().as_bytes()).expect("write config");

    let config = ProcessConfig::load_from_path(file.path()).expect("load config");
    assert_eq!(config.executable(), "/opt/magma/bin/magma");
}

#[test]
fn missing_file_is_a_config_error() {
    let err = ProcessConfig::load_from_path("/nonexistent/magma-proc.toml")
        .expect_err("missing file");
    assert!(matches!(err, AppError::Config(_)), "got {err}");
}
