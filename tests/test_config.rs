use std::io::Write;

use conduit::config::{BUFFER_SIZE, Config, ConnectorConfig};

#[test]
fn test_config_defaults() {
    let cfg = Config::default();
    assert_eq!(cfg.listen_addr, "127.0.0.1:8080");

    let connector = cfg.connector;
    assert_eq!(connector.min_threads, 1);
    assert_eq!(connector.max_threads, 10);
    assert_eq!(connector.controller_sleep_time_ms, 100);
    assert_eq!(connector.inbound_buffer_size, BUFFER_SIZE);
    assert!(connector.persisting_connections);
    assert!(!connector.pipelining_connections);
    assert_eq!(connector.max_total_connections, -1);
    assert!(connector.validate().is_ok());
}

#[test]
fn test_config_from_yaml_overrides_some_keys() {
    let yaml = r#"
listenAddr: "0.0.0.0:9000"
connector:
  maxThreads: 4
  pipeliningConnections: true
  maxConnectionsPerHost: 2
"#;
    let cfg = Config::from_yaml(yaml).unwrap();

    assert_eq!(cfg.listen_addr, "0.0.0.0:9000");
    assert_eq!(cfg.connector.max_threads, 4);
    assert!(cfg.connector.pipelining_connections);
    assert_eq!(cfg.connector.max_connections_per_host, 2);
    // Untouched keys keep their defaults
    assert_eq!(cfg.connector.min_threads, 1);
    assert_eq!(cfg.connector.outbound_buffer_size, BUFFER_SIZE);
}

#[test]
fn test_config_rejects_invalid_values() {
    let err = Config::from_yaml("connector:\n  maxThreads: 0\n").unwrap_err();
    assert!(err.to_string().contains("maxThreads"));

    let err = Config::from_yaml("connector:\n  minThreads: 8\n  maxThreads: 4\n").unwrap_err();
    assert!(err.to_string().contains("minThreads"));

    assert!(Config::from_yaml("connector:\n  inboundBufferSize: 0\n").is_err());
    assert!(Config::from_yaml("connector:\n  controllerSleepTimeMs: 0\n").is_err());
    assert!(Config::from_yaml("connector: [1, 2]\n").is_err());
}

#[test]
fn test_connector_durations() {
    let connector = ConnectorConfig {
        controller_sleep_time_ms: 25,
        thread_max_idle_time_ms: 1500,
        ..ConnectorConfig::default()
    };

    assert_eq!(connector.controller_sleep_time().as_millis(), 25);
    assert_eq!(connector.thread_max_idle_time().as_millis(), 1500);
}

#[test]
fn test_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "connector:\n  tracing: true").unwrap();

    let cfg = Config::from_file(file.path()).unwrap();
    assert!(cfg.connector.tracing);

    assert!(Config::from_file("/nonexistent/conduit.yaml").is_err());
}

#[test]
fn test_config_load_from_environment() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "listenAddr: \"127.0.0.1:7000\"\nconnector:\n  maxThreads: 3").unwrap();

    // Only test touching these variables, so no other test races with it
    unsafe {
        std::env::set_var("CONDUIT_CONFIG", file.path());
        std::env::remove_var("LISTEN");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.listen_addr, "127.0.0.1:7000");
    assert_eq!(cfg.connector.max_threads, 3);

    unsafe {
        std::env::set_var("LISTEN", "0.0.0.0:3000");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.listen_addr, "0.0.0.0:3000");
    assert_eq!(cfg.connector.max_threads, 3);

    unsafe {
        std::env::remove_var("CONDUIT_CONFIG");
        std::env::remove_var("LISTEN");
    }
}
