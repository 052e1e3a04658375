// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0

use bringup_cli::commands::config::generate;
use bringup_cli::commands::deploy::{load_config, render_status};
use bringup_core::application::launcher::ServiceStatus;
use bringup_core::application::orchestrator::DeploymentStatus;
use bringup_core::domain::service::{ProbeKind, ReadinessState, ServiceHandle, ServiceTarget};

#[tokio::test]
async fn generated_config_loads_and_validates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bringup.yaml");

    generate(&path, false).await.unwrap();
    let config = load_config(Some(path)).unwrap();

    assert_eq!(config.spec.app.name, "noctis");
    assert!(config.working_dir().is_absolute());
    assert_eq!(config.unit_name(), "noctis");
}

#[tokio::test]
async fn generate_refuses_to_overwrite_without_force() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bringup.yaml");
    std::fs::write(&path, "operator: edits\n").unwrap();

    let err = generate(&path, false).await.unwrap_err();
    assert!(err.to_string().contains("already exists"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "operator: edits\n");

    generate(&path, true).await.unwrap();
    assert!(std::fs::read_to_string(&path).unwrap().contains("kind: DeployConfig"));
}

#[test]
fn missing_explicit_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_config(Some(dir.path().join("absent.yaml"))).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to load configuration"));
}

#[test]
fn status_table_lists_each_service() {
    let handle = |name: &str, target: ServiceTarget, port: u16| ServiceHandle {
        name: name.to_string(),
        target,
        bound_port: port,
        readiness_state: ReadinessState::Ready,
        probe: ProbeKind::Tcp,
        log_path: None,
        started_at: None,
        unit: None,
    };
    let status = DeploymentStatus {
        record: None,
        services: vec![
            ServiceStatus {
                handle: handle("noctis", ServiceTarget::Process(4242), 8000),
                alive: true,
                ready: true,
                detail: None,
            },
            ServiceStatus {
                handle: handle(
                    "dicom-receiver",
                    ServiceTarget::Container("0123456789abcdef,fedcba".to_string()),
                    11112,
                ),
                alive: false,
                ready: false,
                detail: Some("exited (137)".to_string()),
            },
        ],
    };

    let table = render_status(&status);
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines[0], "No deployment recorded");
    assert!(lines[1].starts_with("SERVICE"));
    assert!(lines[2].starts_with("noctis"));
    assert!(lines[2].contains("pid 4242"));
    assert!(lines[3].contains("ctr 0123456789ab"));
    assert!(lines[3].ends_with("exited (137)"));
}

#[test]
fn empty_status_says_so() {
    let table = render_status(&DeploymentStatus {
        record: None,
        services: Vec::new(),
    });
    assert_eq!(table, "No deployment recorded\nNo services running\n");
}
