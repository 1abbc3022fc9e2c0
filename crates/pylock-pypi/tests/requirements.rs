//! Requirement parsing cases that depend on the filesystem.

mod common;

use common::Fixtures;
use pylock_core::paths::path_to_url;
use pylock_pypi::{DetailedSpec, Requirement, RequirementError, RequirementSource, RequirementSpec};

#[test]
fn test_missing_local_path() {
    let err = Requirement::from_line("./nonexist", false).unwrap_err();
    assert!(matches!(err, RequirementError::PathNotFound { ref path } if path == "./nonexist"));
    assert_eq!(err.to_string(), "local path does not exist: ./nonexist");
}

#[test]
fn test_directory_without_project_files() {
    let fx = Fixtures::new();
    let path = fx.artifacts_dir().display().to_string();
    let err = Requirement::from_line(&path, false).unwrap_err();
    assert!(matches!(err, RequirementError::NotInstallable { .. }));
}

#[test]
fn test_local_directory_name_inference() {
    let fx = Fixtures::new();

    for (project, name) in [
        ("demo", "demo"),
        ("poetry-demo", "poetry-demo"),
        ("flit-demo", "pyflit"),
    ] {
        let dir = fx.project_dir(project);
        let req = Requirement::from_line(&dir.display().to_string(), false).unwrap();
        assert_eq!(req.name.as_deref(), Some(name), "inferring name of {}", project);
        assert!(matches!(req.source, RequirementSource::LocalPath { .. }));
    }
}

#[test]
fn test_local_archive_becomes_file_url() {
    let fx = Fixtures::new();

    let req = Requirement::from_line(&fx.wheel().display().to_string(), false).unwrap();
    assert_eq!(req.name.as_deref(), Some("demo"));
    assert_eq!(
        req.source,
        RequirementSource::Url {
            url: path_to_url(&fx.wheel())
        }
    );
    assert!(req.as_ireq().is_wheel());

    let req = Requirement::from_line(&fx.sdist().display().to_string(), false).unwrap();
    assert!(!req.as_ireq().is_wheel());
    assert_eq!(req.as_line(), path_to_url(&fx.sdist()));
}

#[test]
fn test_editable_local_directory() {
    let fx = Fixtures::new();
    let dir = fx.project_dir("demo").display().to_string();

    let req = Requirement::from_line(&format!("-e {}", dir), false).unwrap();
    assert!(req.editable);
    assert_eq!(
        req.as_line(),
        format!("-e demo @ {}", path_to_url(&fx.project_dir("demo")))
    );

    let (name, spec) = req.as_req_dict();
    assert_eq!(name.as_deref(), Some("demo"));
    let RequirementSpec::Detailed(detailed) = &spec else {
        panic!("expected a detailed spec");
    };
    assert_eq!(detailed.path.as_deref(), Some(dir.as_str()));
    assert!(detailed.editable);

    let back = Requirement::from_req_dict(name.as_deref(), &spec).unwrap();
    assert!(back.editable);
    assert_eq!(back.as_line(), req.as_line());
}

#[test]
fn test_named_file_url_to_directory() {
    let fx = Fixtures::new();
    let dir = fx.project_dir("demo");

    let req = Requirement::from_line(&format!("demo[tests] @ {}", path_to_url(&dir)), false).unwrap();
    assert_eq!(
        req.source,
        RequirementSource::LocalPath {
            path: dir.display().to_string()
        }
    );
    assert!(req.extras.contains("tests"));
}

#[test]
fn test_archive_with_wrong_extension_is_rejected() {
    let fx = Fixtures::new();
    let bogus = fx.artifacts_dir().join("notes.txt");
    common::write(&bogus, "not a package\n");

    let err = Requirement::from_line(&bogus.display().to_string(), false).unwrap_err();
    assert!(matches!(err, RequirementError::NotInstallable { .. }));
}

#[test]
fn test_editable_directory_keeps_extras() {
    let fx = Fixtures::new();
    let dir = fx.project_dir("demo");

    let req = Requirement::from_line(&format!("-e {}[tests]", dir.display()), false).unwrap();
    assert!(req.editable);
    assert_eq!(req.name.as_deref(), Some("demo"));
    assert!(req.extras.contains("tests"));
    assert_eq!(
        req.source,
        RequirementSource::LocalPath {
            path: dir.display().to_string()
        }
    );

    let line = req.as_line();
    assert_eq!(line, format!("-e demo[tests] @ {}", path_to_url(&dir)));
    assert_eq!(Requirement::from_line(&line, false).unwrap(), req);
}

#[test]
fn test_editable_placeholder_path_keeps_name_and_extras() {
    let spec = RequirementSpec::Detailed(Box::new(DetailedSpec {
        path: Some("${PROJECT_ROOT}/demo".into()),
        editable: true,
        extras: vec!["tests".into()],
        ..DetailedSpec::default()
    }));
    let req = Requirement::from_req_dict(Some("demo"), &spec).unwrap();

    let line = req.as_line();
    assert_eq!(line, "-e demo[tests] @ file:///${PROJECT_ROOT}/demo");

    let back = Requirement::from_line(&line, false).unwrap();
    assert!(back.editable);
    assert_eq!(back.name.as_deref(), Some("demo"));
    assert_eq!(back.extras, req.extras);
    assert_eq!(
        back.source,
        RequirementSource::LocalPath {
            path: "${PROJECT_ROOT}/demo".into()
        }
    );
    assert_eq!(back.as_req_dict(), req.as_req_dict());
}

#[test]
fn test_named_relative_path_keeps_extras() {
    let req = Requirement::parse_dependency("demo[tests] @ ./demo").unwrap();
    assert_eq!(req.name.as_deref(), Some("demo"));
    assert!(req.extras.contains("tests"));
    assert_eq!(
        req.source,
        RequirementSource::LocalPath {
            path: "./demo".into()
        }
    );
    assert_eq!(req.as_line(), "demo[tests] @ ./demo");
    assert_eq!(Requirement::parse_dependency(&req.as_line()).unwrap(), req);

    let bare = Requirement::parse_dependency("./demo[tests]").unwrap();
    assert!(bare.name.is_none());
    assert!(bare.extras.contains("tests"));
    assert_eq!(bare.as_line(), "./demo[tests]");
}
