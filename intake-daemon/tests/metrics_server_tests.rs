//! Metrics listener address validation.
//!
//! Installing the recorder is process-global, so only address handling is
//! covered here.

use intake_core::config::MetricsConfig;
use intake_daemon::metrics_server::listen_addr;

#[test]
fn test_default_address() {
    let addr = listen_addr(&MetricsConfig::default()).expect("default config is valid");
    assert_eq!(addr.to_string(), "127.0.0.1:9100");
}

#[test]
fn test_custom_port_and_host() {
    let config = MetricsConfig {
        listen_addr: "0.0.0.0".to_owned(),
        port: 9911,
        ..Default::default()
    };
    let addr = listen_addr(&config).expect("valid");
    assert!(addr.ip().is_unspecified());
    assert_eq!(addr.port(), 9911);
}

#[test]
fn test_invalid_host_rejected() {
    let config = MetricsConfig {
        listen_addr: "not an address".to_owned(),
        ..Default::default()
    };
    let err = listen_addr(&config).unwrap_err();
    assert!(err.to_string().contains("not an address"));
}

#[test]
fn test_custom_endpoint_rejected() {
    let config = MetricsConfig {
        endpoint: "/prom".to_owned(),
        ..Default::default()
    };
    assert!(listen_addr(&config).is_err());
}
