use super::{apply_env, apply_file, normalize_database_url, prepare_database_url, Settings};

use std::{collections::HashMap, path::PathBuf};

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
}

#[test]
fn empty_url_falls_back_to_default() {
    assert_eq!(
        normalize_database_url("  "),
        Settings::default().database_url
    );
}

#[test]
fn keeps_windows_absolute_path_with_single_sqlite_colon() {
    assert_eq!(
        normalize_database_url("sqlite:C:\\Users\\ana\\multilens.db"),
        "sqlite:C:/Users/ana/multilens.db"
    );
}

#[test]
fn normalizes_windows_plain_path_with_single_sqlite_colon() {
    assert_eq!(
        normalize_database_url("C:\\Users\\ana\\multilens.db"),
        "sqlite:C:/Users/ana/multilens.db"
    );
}

#[test]
fn converts_sqlite_double_slash_windows_path() {
    assert_eq!(
        normalize_database_url("sqlite://C:/Users/ana/multilens.db"),
        "sqlite:C:/Users/ana/multilens.db"
    );
}

#[test]
fn file_settings_override_defaults() {
    let mut settings = Settings::default();
    apply_file(
        &mut settings,
        "bind_addr = \"0.0.0.0:9000\"\norder_folder = \"/srv/pedidos\"\n",
    );
    assert_eq!(settings.server_bind, "0.0.0.0:9000");
    assert_eq!(settings.order_folder, PathBuf::from("/srv/pedidos"));
    assert_eq!(settings.database_url, Settings::default().database_url);

    apply_file(&mut settings, "not = [valid");
    assert_eq!(settings.server_bind, "0.0.0.0:9000");
}

#[test]
fn prefixed_env_wins_over_short_names() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("SERVER_BIND", "127.0.0.1:1"),
        ("APP__BIND_ADDR", "127.0.0.1:2"),
        ("DATABASE_URL", "sqlite://./a.db"),
        ("ORDER_FOLDER", "./exports"),
    ]);
    let mut settings = Settings::default();
    apply_env(&mut settings, |key| env.get(key).map(|v| v.to_string()));

    assert_eq!(settings.server_bind, "127.0.0.1:2");
    assert_eq!(settings.database_url, "sqlite://./a.db");
    assert_eq!(settings.order_folder, PathBuf::from("./exports"));
}

#[test]
fn creates_parent_dir_for_sqlite_file() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("data").join("test.db");

    prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare db url");
    assert!(temp_root.path().join("data").exists());
}

#[tokio::test]
async fn prepared_database_url_creates_openable_sqlite_file() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("multilens.db");

    let prepared = prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare");
    let storage = storage::Storage::new(&prepared).await.expect("open sqlite");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should be created: {}",
        db_path.display()
    );
}
