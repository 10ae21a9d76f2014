use ofs_core::{LocalStats, OrderReadback, ReservoirConfig};

#[test]
fn readback_round_trip_json() {
    let readback = OrderReadback {
        cos: 0.6,
        sin: 0.8,
        local_stats: Some(LocalStats {
            mean_r: 0.7,
            gradient: 0.1,
            sync_fraction: 0.25,
        }),
    };
    let json = serde_json::to_string_pretty(&readback).expect("serialize");
    let decoded: OrderReadback = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(decoded, readback);
    assert!((decoded.global_r() - 1.0).abs() < 1e-12);
}

#[test]
fn readback_without_local_stats_defaults() {
    let decoded: OrderReadback = serde_json::from_str(r#"{"cos":0.0,"sin":0.5}"#).expect("json");
    assert!(decoded.local_stats.is_none());
    assert_eq!(decoded.global_r(), 0.5);
}

#[test]
fn reservoir_config_defaults_are_stable() {
    let config = ReservoirConfig::default();
    let json = serde_json::to_string(&config).expect("serialize");
    let decoded: ReservoirConfig = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(decoded, config);
}
