//! Host selection over an evaluated deployment

use nixfleet::app::options::SelectOptions;
use nixfleet::errors::FleetError;
use nixfleet::models::Deployment;
use nixfleet::selector::select_hosts;

fn deployment() -> Deployment {
    serde_json::from_str(
        r#"{
            "hosts": [
                { "name": "web01", "targetHost": "10.0.0.1", "tags": ["web", "canary"] },
                { "name": "db01", "targetHost": "10.0.1.1", "tags": ["db"] },
                { "name": "web02", "targetHost": "10.0.0.2", "tags": ["web"] },
                { "name": "web03", "targetHost": "10.0.0.3", "tags": ["web"] },
                { "name": "db02", "targetHost": "10.0.1.2", "tags": ["db", "canary"] }
            ],
            "meta": { "ordering": { "tags": ["canary"] } }
        }"#,
    )
    .unwrap()
}

fn names(options: &SelectOptions) -> Vec<String> {
    select_hosts(&deployment(), options)
        .unwrap()
        .into_iter()
        .map(|h| h.name)
        .collect()
}

#[test]
fn test_deployment_ordering_applies_by_default() {
    assert_eq!(
        names(&SelectOptions::default()),
        vec!["web01", "db02", "db01", "web02", "web03"]
    );
}

#[test]
fn test_ordering_tags_override_deployment() {
    let options = SelectOptions {
        ordering_tags: vec!["db".to_string()],
        ..Default::default()
    };
    assert_eq!(names(&options), vec!["db01", "db02", "web01", "web02", "web03"]);
}

#[test]
fn test_pipeline_runs_match_filter_order_window() {
    let options = SelectOptions {
        glob: "web*".to_string(),
        tags: vec!["web".to_string()],
        skip: 1,
        every: 1,
        limit: 1,
        ..Default::default()
    };
    // web01 is ordered first as the canary, then skipped
    assert_eq!(names(&options), vec!["web02"]);
}

#[test]
fn test_malformed_glob_selects_nothing() {
    let options = SelectOptions {
        glob: "web[".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        select_hosts(&deployment(), &options),
        Err(FleetError::SelectionError(_))
    ));
}
