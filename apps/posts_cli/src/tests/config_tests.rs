use super::{apply_env, apply_file, load_settings, Settings, DEFAULT_API_URL};

use std::{
    collections::HashMap,
    env, fs,
    time::{SystemTime, UNIX_EPOCH},
};

use posts_core::RequestOrdering;

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn defaults_point_at_the_placeholder_api() {
    let settings = Settings::default();
    assert_eq!(settings.api_url, DEFAULT_API_URL);
    assert_eq!(settings.page_size, 10);
    assert_eq!(settings.ordering, RequestOrdering::LastSettledWins);
    assert_eq!(settings.timeout().as_secs(), 10);
}

#[test]
fn file_values_override_defaults() {
    let mut settings = Settings::default();
    let mut ignored = Vec::new();
    apply_file(
        &mut settings,
        r#"
api_url = "http://localhost:3000"
page_size = 25
ordering = "latest-issued"
log_filter = "posts_core=debug"
timeout_secs = 3
"#,
        &mut ignored,
    )
    .expect("valid toml");

    assert!(ignored.is_empty(), "ignored: {ignored:?}");
    assert_eq!(settings.api_url, "http://localhost:3000");
    assert_eq!(settings.page_size, 25);
    assert_eq!(settings.ordering, RequestOrdering::LatestIssuedWins);
    assert_eq!(settings.log_filter, "posts_core=debug");
    assert_eq!(settings.timeout_secs, 3);
}

#[test]
fn invalid_file_values_keep_defaults() {
    let mut settings = Settings::default();
    let mut ignored = Vec::new();
    apply_file(
        &mut settings,
        "page_size = 0\nordering = \"whenever\"\napi_url = \"  \"\n",
        &mut ignored,
    )
    .expect("valid toml");

    assert_eq!(settings, Settings::default());
    assert_eq!(ignored.len(), 3);
}

#[test]
fn malformed_file_is_an_error() {
    let mut settings = Settings::default();
    let mut ignored = Vec::new();
    assert!(apply_file(&mut settings, "page_size = \"ten\"", &mut ignored).is_err());
    assert_eq!(settings, Settings::default());
}

#[test]
fn environment_overrides_file_and_app_prefix_wins() {
    let mut settings = Settings::default();
    let mut ignored = Vec::new();
    apply_file(&mut settings, "page_size = 5\n", &mut ignored).expect("valid toml");
    apply_env(
        &mut settings,
        env_of(&[
            ("POSTS_API_URL", "http://legacy.test"),
            ("APP__API_URL", "http://app.test"),
            ("APP__PAGE_SIZE", "7"),
            ("APP__ORDERING", "sequenced"),
            ("APP__TIMEOUT_SECS", "30"),
        ]),
        &mut ignored,
    );

    assert!(ignored.is_empty(), "ignored: {ignored:?}");
    assert_eq!(settings.api_url, "http://app.test");
    assert_eq!(settings.page_size, 7);
    assert_eq!(settings.ordering, RequestOrdering::LatestIssuedWins);
    assert_eq!(settings.timeout_secs, 30);
}

#[test]
fn unparsable_environment_values_are_reported() {
    let mut settings = Settings::default();
    let mut ignored = Vec::new();
    apply_env(
        &mut settings,
        env_of(&[("APP__PAGE_SIZE", "many"), ("APP__TIMEOUT_SECS", "-1")]),
        &mut ignored,
    );

    assert_eq!(settings, Settings::default());
    assert_eq!(ignored, vec!["APP__PAGE_SIZE=many", "APP__TIMEOUT_SECS=-1"]);
}

#[test]
fn explicit_config_file_is_read_and_required() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = env::temp_dir().join(format!("posts_cli_config_test_{suffix}"));
    fs::create_dir_all(&temp_root).expect("temp root");
    let path = temp_root.join("custom.toml");
    fs::write(&path, "page_size = 4\n").expect("write config");

    let (settings, _) = load_settings(Some(&path)).expect("load settings");
    assert_eq!(settings.page_size, 4);

    assert!(load_settings(Some(&temp_root.join("missing.toml"))).is_err());
    fs::remove_dir_all(temp_root).expect("cleanup");
}
