//! Tests for layered configuration loading.

use super::*;
use crate::Role;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Write JSON5 contents to a path, creating parent directories if needed.
fn write_json5(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("dir");
    }
    fs::write(path, contents).expect("write");
}

#[test]
fn parse_minimal_config() {
    let config = ColloquyConfig::load_from_str("{}").expect("config");
    assert_eq!(config, ColloquyConfig::default());
    assert_eq!(config.context.window_size, 5);
    assert_eq!(config.context.roles, Role::ALL.to_vec());
    assert_eq!(config.commands.placeholder, "$ARGUMENTS");
    assert_eq!(config.storage.threads_file, "threads.jsonl");
    assert_eq!(config.events.buffer, 512);
}

#[test]
fn parse_full_config_with_json5_syntax() {
    let json5 = r#"{
        // comments and trailing commas are accepted
        storage: { path: "/srv/colloquy", conversations_dir: "logs", },
        context: { window_size: 8, roles: ["user", "assistant"] },
        commands: { placeholder: "{{input}}" },
        events: { buffer: 64 },
    }"#;
    let config = ColloquyConfig::load_from_str(json5).expect("config");
    assert_eq!(config.storage.path.as_deref(), Some("/srv/colloquy"));
    assert_eq!(config.storage.conversations_dir, "logs");
    assert_eq!(config.context.window_size, 8);
    assert_eq!(config.context.roles, vec![Role::User, Role::Assistant]);
    assert_eq!(config.commands.placeholder, "{{input}}");
    assert_eq!(config.events.buffer, 64);
}

#[test]
fn rejects_unknown_top_level_key() {
    let err = ColloquyConfig::load_from_str(r#"{ unexpected: true }"#).unwrap_err();
    assert!(format!("{err}").contains("unknown key"));
}

#[test]
fn rejects_unknown_role() {
    let err = ColloquyConfig::load_from_str(r#"{ context: { roles: ["user", "tool"] } }"#)
        .unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("context.roles[1]"), "{msg}");
    assert!(msg.contains("unknown role"), "{msg}");
}

#[test]
fn rejects_negative_window_size() {
    let err = ColloquyConfig::load_from_str(r#"{ context: { window_size: -1 } }"#).unwrap_err();
    assert!(format!("{err}").contains("context.window_size"));
}

#[test]
fn validate_rejects_degenerate_values() {
    for json5 in [
        r#"{ context: { window_size: 0 } }"#,
        r#"{ context: { roles: [] } }"#,
        r#"{ commands: { placeholder: "  " } }"#,
        r#"{ events: { buffer: 0 } }"#,
        r#"{ storage: { threads_file: "" } }"#,
    ] {
        let err = ColloquyConfig::load_from_str(json5).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{json5}: {err}");
    }
}

#[test]
fn parse_error_names_its_source() {
    let err = ColloquyConfig::load_from_str("{ storage: ").unwrap_err();
    assert!(matches!(err, ConfigError::Parse { ref label, .. } if label == "config"));
}

#[test]
fn missing_file_reports_path() {
    let temp = TempDir::new().expect("tmp");
    let path = temp.path().join("absent.json5");
    let err = ColloquyConfig::load_from_path(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Read { path: ref reported, .. } if reported == &path));
}

#[test]
fn layered_config_applies_precedence() {
    let temp = TempDir::new().expect("tmp");
    let root = temp.path();
    let project_root = root.join("project");
    fs::create_dir_all(project_root.join(".git")).expect("git");
    let cwd = project_root.join("subdir");
    fs::create_dir_all(&cwd).expect("cwd");

    let user_config = root.join("home").join("colloquy.json5");
    write_json5(
        &user_config,
        "{ context: { window_size: 2, roles: [\"user\"] }, events: { buffer: 8 } }",
    );
    write_json5(
        &project_root.join(DEFAULT_CONFIG_FILE),
        "{ context: { window_size: 3 } }",
    );
    write_json5(
        &cwd.join(DEFAULT_CONFIG_FILE),
        "{ context: { window_size: 4 } }",
    );
    let runtime = root.join("runtime.json5");
    write_json5(&runtime, "{ events: { buffer: 16 } }");

    let options = LayeredConfigOptions::new(&cwd)
        .with_user_config_path(Some(user_config))
        .with_runtime_path(&runtime);
    let layered = ColloquyConfig::load_layered_with_options(options).expect("layered");

    assert_eq!(layered.config.context.window_size, 4);
    assert_eq!(layered.config.context.roles, vec![Role::User]);
    assert_eq!(layered.config.events.buffer, 16);
    let sources: Vec<_> = layered.layers.iter().map(|layer| layer.source).collect();
    assert_eq!(
        sources,
        vec![
            ConfigLayerSource::User,
            ConfigLayerSource::Project,
            ConfigLayerSource::Cwd,
            ConfigLayerSource::Runtime,
        ]
    );
}

#[test]
fn layered_config_loads_shared_project_and_cwd_file_once() {
    let temp = TempDir::new().expect("tmp");
    let project_root = temp.path().join("project");
    fs::create_dir_all(project_root.join(".git")).expect("git");
    write_json5(
        &project_root.join(DEFAULT_CONFIG_FILE),
        "{ context: { window_size: 7 } }",
    );

    let options = LayeredConfigOptions::new(&project_root).with_user_config_path(None);
    let layered = ColloquyConfig::load_layered_with_options(options).expect("layered");

    assert_eq!(layered.config.context.window_size, 7);
    assert_eq!(layered.layers.len(), 1);
    assert_eq!(layered.layers[0].source, ConfigLayerSource::Project);
}

#[test]
fn layered_config_without_files_is_default() {
    let temp = TempDir::new().expect("tmp");
    let options = LayeredConfigOptions::new(temp.path()).with_user_config_path(None);
    let layered = ColloquyConfig::load_layered_with_options(options).expect("layered");
    assert_eq!(layered.config, ColloquyConfig::default());
    assert!(layered.layers.is_empty());
}

#[test]
fn missing_runtime_layer_is_an_error() {
    let temp = TempDir::new().expect("tmp");
    let options = LayeredConfigOptions::new(temp.path())
        .with_user_config_path(None)
        .with_runtime_path(temp.path().join("missing.json5"));
    let err = ColloquyConfig::load_layered_with_options(options).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn invalid_layer_is_labelled_with_its_source() {
    let temp = TempDir::new().expect("tmp");
    write_json5(
        &temp.path().join(DEFAULT_CONFIG_FILE),
        "{ events: { buffer: \"big\" } }",
    );
    let options = LayeredConfigOptions::new(temp.path()).with_user_config_path(None);
    let err = ColloquyConfig::load_layered_with_options(options).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("cwd("), "{msg}");
    assert!(msg.contains("events.buffer"), "{msg}");
}

#[test]
fn storage_root_resolution() {
    let cwd = Path::new("/work");
    let absolute = ColloquyConfig::builder().storage_path("/data/colloquy").build();
    assert_eq!(
        absolute.storage.resolve_root(cwd),
        Path::new("/data/colloquy").to_path_buf()
    );

    let relative = ColloquyConfig::builder().storage_path("state").build();
    let root = relative.storage.resolve_root(cwd);
    assert_eq!(root, Path::new("/work/state").to_path_buf());
    assert_eq!(
        relative.storage.conversations_path(&root),
        Path::new("/work/state/conversations").to_path_buf()
    );
    assert_eq!(
        relative.storage.threads_path(&root),
        Path::new("/work/state/threads.jsonl").to_path_buf()
    );
    assert_eq!(
        relative.commands.resolve_dir(&root),
        Path::new("/work/state/commands").to_path_buf()
    );

    let defaulted = ColloquyConfig::default().storage.resolve_root(cwd);
    assert!(defaulted.ends_with(crate::DEFAULT_DATA_DIR));
}

#[test]
fn builder_overrides_defaults() {
    let config = ColloquyConfig::builder()
        .window_size(9)
        .events(crate::EventsConfig { buffer: 4 })
        .build();
    assert_eq!(config.context.window_size, 9);
    assert_eq!(config.events.buffer, 4);
    assert_eq!(config.commands, crate::CommandsConfig::default());
}
