use std::io::Write;

use heapscope_config::{ConfigError, ProbeConfig};

#[test]
fn loads_every_section_from_a_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[server]
host = "0.0.0.0"
port = 5001

[sweep]
root_base_type = "Base"
exclusions = ["^_", "Secret"]
leaf_types = ["Data"]

[snapshot]
exclusions = []

[logging]
level = "debug"
json = true
"#
    )
    .unwrap();

    let config = ProbeConfig::load_from_path(file.path()).unwrap();
    assert_eq!(config.server.bind_addr(), "0.0.0.0:5001");
    assert_eq!(config.sweep.root_base_type, "Base");
    assert_eq!(config.sweep.exclusions, vec!["^_", "Secret"]);
    assert_eq!(config.sweep.leaf_types, vec!["Data"]);
    assert!(config.snapshot.exclusions.is_empty());
    assert!(config.logging.json);
}

#[test]
fn missing_file_reports_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = ProbeConfig::load_from_path(&path).unwrap_err();
    match err {
        ConfigError::Io { path: reported, .. } => assert!(reported.ends_with("absent.toml")),
        other => panic!("expected io error, got {other:?}"),
    }
}

#[test]
fn explicit_path_wins_over_discovery() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[server]\nport = 7070").unwrap();
    let config = ProbeConfig::discover(Some(file.path())).unwrap();
    assert_eq!(config.server.port, 7070);
}
