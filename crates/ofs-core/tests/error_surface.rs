use ofs_core::errors::{ErrorInfo, OfsError};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("path", "plans/rollout.yaml")
        .with_context("field", "measure_steps")
}

#[test]
fn config_error_surface() {
    let err = OfsError::Config(sample_info("plan-parse", "invalid plan"));
    assert_eq!(err.info().code, "plan-parse");
    assert!(err.info().context.contains_key("path"));
}

#[test]
fn export_error_surface() {
    let err = OfsError::Export(sample_info("export-write", "disk full").with_hint("free space"));
    assert_eq!(err.info().hint.as_deref(), Some("free space"));
    let rendered = err.to_string();
    assert_eq!(
        rendered,
        "export error: export-write: disk full \
         [field=measure_steps, path=plans/rollout.yaml] (hint: free space)"
    );
}

#[test]
fn path_context_uses_display_form() {
    let info = ErrorInfo::new("plan-read", "missing")
        .with_path("path", std::path::Path::new("jobs/sweep.json"));
    assert_eq!(info.context["path"], "jobs/sweep.json");
    assert_eq!(info.to_string(), "plan-read: missing [path=jobs/sweep.json]");
}

#[test]
fn error_round_trips_as_tagged_json() {
    let err = OfsError::Backend(sample_info("field-size", "layer exceeds field"));
    let json = serde_json::to_value(&err).expect("serialize");
    assert_eq!(json["family"], "Backend");
    let decoded: OfsError = serde_json::from_value(json).expect("deserialize");
    assert_eq!(decoded, err);
}
