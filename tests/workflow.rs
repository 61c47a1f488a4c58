//! Preview and report export through the public API, against a manifest
//! store and synthetic plans.

mod common;

use common::{files_in, image_xobjects, init_logging, page_text, write_plan, GradientBackend};
use planmark::{
    render_pin, BackendAvailability, BackendKind, BackendSelector, ExportRequest, IssueRecord,
    Manifest, ManifestStore, PhotoRecord, PinRequest, PlanRecord, Planmark, PlanmarkConfig,
    PlanmarkError, PreviewOutcome, RenderBackend,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn issue(id: i64, page: u32, x: f64, y: f64) -> IssueRecord {
    IssueRecord {
        id,
        plan_id: 1,
        page,
        x_norm: x,
        y_norm: y,
        title: format!("Issue {id}"),
        notes: "Observed during the walkthrough.".to_string(),
    }
}

fn app(root: &Path, issues: Vec<IssueRecord>, photos: Vec<PhotoRecord>, availability: BackendAvailability) -> Planmark {
    write_plan(root, "plan.pdf", 3);
    let manifest = Manifest {
        plans: vec![PlanRecord {
            id: 1,
            name: "Block A".to_string(),
            file_path: PathBuf::from("plan.pdf"),
            revision: 2,
        }],
        issues,
        photos,
    };
    let config = PlanmarkConfig::builder()
        .storage_root(root)
        .output_dir(root.join("out"))
        .temp_dir(root.join("tmp"))
        .build()
        .unwrap();
    let backends: Vec<Arc<dyn RenderBackend>> = vec![Arc::new(GradientBackend(BackendKind::Poppler))];
    Planmark::builder(config, Arc::new(ManifestStore::new(manifest)))
        .selector(BackendSelector::new(backends, availability))
        .build()
}

#[tokio::test]
async fn preview_of_a_stored_issue() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), vec![issue(10, 2, 0.5, 0.5)], vec![], BackendAvailability::all());
    let request = PinRequest {
        plan_id: Some(1),
        issue_id: Some(10),
        width: Some(500),
        ..Default::default()
    };
    let PreviewOutcome::Rendered { png, method } = render_pin(&app, &request).await.unwrap() else {
        panic!("expected a rendered preview");
    };
    assert_eq!(method, "pdftoppm");
    let img = image::load_from_memory(&png).unwrap();
    assert_eq!(img.width(), 500);
    assert_eq!(files_in(&dir.path().join("tmp")), 0);
}

#[tokio::test]
async fn preview_without_renderer_is_a_soft_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), vec![issue(10, 1, 0.5, 0.5)], vec![], BackendAvailability::none());
    let request = PinRequest {
        plan_id: Some(1),
        issue_id: Some(10),
        ..Default::default()
    };
    match render_pin(&app, &request).await.unwrap() {
        PreviewOutcome::NoRenderer { attempts } => assert_eq!(attempts.len(), 1),
        other => panic!("expected NoRenderer, got {other:?}"),
    }
}

#[tokio::test]
async fn preview_rejects_bad_requests_before_rendering() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), vec![issue(10, 1, 0.5, 0.5)], vec![], BackendAvailability::all());

    let missing_coords = PinRequest {
        plan_id: Some(1),
        page: Some(1),
        ..Default::default()
    };
    let err = render_pin(&app, &missing_coords).await.unwrap_err();
    assert_eq!(err.status_code(), 400);

    let nan = PinRequest {
        plan_id: Some(1),
        page: Some(1),
        x_norm: Some(f64::NAN),
        y_norm: Some(0.5),
        ..Default::default()
    };
    assert_eq!(render_pin(&app, &nan).await.unwrap_err().status_code(), 400);

    let unknown_plan = PinRequest {
        plan_id: Some(2),
        issue_id: Some(10),
        ..Default::default()
    };
    let err = render_pin(&app, &unknown_plan).await.unwrap_err();
    assert!(matches!(err, PlanmarkError::PlanNotFound { plan_id: 2 }));

    let past_the_end = PinRequest {
        plan_id: Some(1),
        page: Some(4),
        x_norm: Some(0.5),
        y_norm: Some(0.5),
        ..Default::default()
    };
    let err = render_pin(&app, &past_the_end).await.unwrap_err();
    assert!(matches!(err, PlanmarkError::PageOutOfRange { page: 4, total: 3 }));
}

#[tokio::test]
async fn out_of_range_coordinates_are_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), vec![], vec![], BackendAvailability::all());
    let request = PinRequest {
        plan_id: Some(1),
        page: Some(1),
        x_norm: Some(-0.5),
        y_norm: Some(1.5),
        width: Some(400),
        ..Default::default()
    };
    assert!(matches!(
        render_pin(&app, &request).await.unwrap(),
        PreviewOutcome::Rendered { .. }
    ));
}

#[tokio::test]
async fn report_with_two_issues_and_no_pins() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("uploads")).unwrap();
    for name in ["first.png", "second.png"] {
        image::RgbImage::from_pixel(48, 32, image::Rgb([200, 120, 40]))
            .save(root.join("uploads").join(name))
            .unwrap();
    }
    let photos = vec![
        PhotoRecord {
            id: 1,
            issue_id: 1,
            filename: "first.png".to_string(),
            stored_path: None,
        },
        PhotoRecord {
            id: 2,
            issue_id: 2,
            filename: "second.png".to_string(),
            stored_path: None,
        },
    ];
    let app = app(
        root,
        vec![issue(1, 1, 0.2, 0.2), issue(2, 3, 0.8, 0.8)],
        photos,
        BackendAvailability::all(),
    );
    let request = ExportRequest {
        include_pin: false,
        ..ExportRequest::new(1)
    };
    let summary = app.export_report(&request).await.unwrap();
    assert_eq!(summary.pins_included, 0);
    assert_eq!(summary.sections, 2);
    assert_eq!(summary.path.parent().unwrap(), root.join("out"));
    assert_eq!(std::fs::metadata(&summary.path).unwrap().len(), summary.size);
    let bytes = std::fs::read(&summary.path).unwrap();
    assert!(bytes.starts_with(b"%PDF-"));

    let doc = lopdf::Document::load_mem(&bytes).unwrap();
    let text = page_text(&doc);
    assert!(text.contains("Issue #1: Issue 1"));
    assert!(text.contains("Issue #2: Issue 2"));
    assert!(text.contains("Observed during the walkthrough."));
    assert_eq!(image_xobjects(&doc), 2, "one photo per section, no pins");
}

#[tokio::test]
async fn report_embeds_pins_and_records_skipped_photos() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("uploads")).unwrap();
    image::RgbImage::from_pixel(64, 48, image::Rgb([90, 90, 200]))
        .save(root.join("uploads/wall.png"))
        .unwrap();
    std::fs::write(root.join("uploads/broken.png"), b"not an image").unwrap();

    let photos = vec![
        PhotoRecord {
            id: 1,
            issue_id: 1,
            filename: "wall.png".to_string(),
            stored_path: Some("legacy/missing/wall.png".to_string()),
        },
        PhotoRecord {
            id: 2,
            issue_id: 1,
            filename: "broken.png".to_string(),
            stored_path: None,
        },
    ];
    let app = app(root, vec![issue(1, 2, 0.4, 0.6), issue(2, 1, 0.1, 0.1)], photos, BackendAvailability::all());
    let request = ExportRequest {
        debug: true,
        ..ExportRequest::new(1)
    };
    let summary = app.export_report(&request).await.unwrap();
    assert_eq!(summary.pins_included, 2);

    let debug = summary.debug.expect("debug requested");
    assert_eq!(debug.resolved_photos.len(), 1);
    assert_eq!(debug.skipped_photos.len(), 1);
    assert_eq!(debug.skipped_photos[0].photo_id, 2);
    assert_eq!(debug.skipped_photos[0].reason.code(), "decode_failed");

    let json = serde_json::to_value(&debug).unwrap();
    assert_eq!(json["resolved_photos"][0]["strategy"], "bare_filename");
    assert_eq!(files_in(&root.join("tmp")), 0);
}

/// Starts like a PDF but has no parseable structure.
const DAMAGED_PLAN: &[u8] = b"%PDF-1.7\n1 0 obj << /Type /Catalog >> endobj\n";

#[tokio::test]
async fn preview_leaves_unparseable_plans_to_the_backends() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), vec![issue(10, 2, 0.5, 0.5)], vec![], BackendAvailability::all());
    std::fs::write(dir.path().join("plan.pdf"), DAMAGED_PLAN).unwrap();

    let request = PinRequest {
        plan_id: Some(1),
        issue_id: Some(10),
        width: Some(300),
        ..Default::default()
    };
    let PreviewOutcome::Rendered { method, .. } = render_pin(&app, &request).await.unwrap() else {
        panic!("a backend that can read the file should still render it");
    };
    assert_eq!(method, "pdftoppm");

    // Page 0 is wrong whatever the file holds.
    let zero = PinRequest {
        page: Some(0),
        ..request
    };
    assert_eq!(render_pin(&app, &zero).await.unwrap_err().status_code(), 400);
}

#[tokio::test]
async fn report_keeps_pins_for_unparseable_plans() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let app = app(
        dir.path(),
        vec![issue(1, 1, 0.3, 0.3), issue(2, 7, 0.6, 0.6)],
        vec![],
        BackendAvailability::all(),
    );
    std::fs::write(dir.path().join("plan.pdf"), DAMAGED_PLAN).unwrap();

    let request = ExportRequest {
        debug: true,
        ..ExportRequest::new(1)
    };
    let summary = app.export_report(&request).await.unwrap();
    assert_eq!(summary.pins_included, 2);
    let debug = summary.debug.expect("debug requested");
    assert!(debug.backend_attempts.iter().all(|d| d.note.is_none()));
}
