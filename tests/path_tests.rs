use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::util::ServiceExt;

mod common;
use common::{bearer, setup_test_app, TestApp};

fn seed_file(app: &TestApp, dep_id: &str, version: u32, data: &[u8]) {
    let path = app.repository_dir.join(format!(
        "deposit/{}/{}_model_P1.cif.V{}",
        dep_id, dep_id, version
    ));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, data).unwrap();
}

async fn get_json(app: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .header("Authorization", bearer())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
}

async fn post_form(app: &axum::Router, uri: &str, form: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Authorization", bearer())
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(Body::from(form.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
}

#[tokio::test]
async fn test_latest_file_version_tracks_uploads() {
    let app = setup_test_app().await;
    seed_file(&app, "D_1000000001", 1, b"v1");
    seed_file(&app, "D_1000000001", 2, b"v2");
    seed_file(&app, "D_1000000001", 3, b"v3");

    let uri = "/latest-file-version?repositoryType=deposit&depId=D_1000000001\
               &contentType=model&partNumber=1&contentFormat=pdbx&version=latest";
    let (status, body) = get_json(&app.router, uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 3);

    // nothing on disk: 404
    let uri = "/latest-file-version?repositoryType=deposit&depId=D_9999999999\
               &contentType=model&partNumber=1&contentFormat=pdbx&version=latest";
    let (status, _) = get_json(&app.router, uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_file_and_dir_exists() {
    let app = setup_test_app().await;
    seed_file(&app, "D_2000000002", 1, b"data");

    let form = "repositoryType=deposit&depId=D_2000000002&contentType=model\
                &partNumber=1&contentFormat=pdbx&version=1";
    let (status, body) = post_form(&app.router, "/file-exists", form).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["path"],
        "deposit/D_2000000002/D_2000000002_model_P1.cif.V1"
    );

    let form = "repositoryType=deposit&depId=D_2000000002&contentType=model\
                &partNumber=1&contentFormat=pdbx&version=5";
    let (status, _) = post_form(&app.router, "/file-exists", form).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post_form(
        &app.router,
        "/dir-exists",
        "repositoryType=deposit&depId=D_2000000002",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post_form(
        &app.router,
        "/dir-exists",
        "repositoryType=deposit&depId=D_0000000000",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_dir_hides_temp_files() {
    let app = setup_test_app().await;
    seed_file(&app, "D_3000000003", 1, b"data");
    seed_file(&app, "D_3000000003", 2, b"data");
    // an in-flight temp file must not appear in listings
    std::fs::write(
        app.repository_dir
            .join("deposit/D_3000000003/._deadbeefcafe"),
        b"partial",
    )
    .unwrap();

    let uri = "/list-dir?repositoryType=deposit&depId=D_3000000003";
    let (status, body) = get_json(&app.router, uri).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<String> = serde_json::from_value(body).unwrap();
    assert_eq!(
        names,
        vec![
            "D_3000000003_model_P1.cif.V1".to_string(),
            "D_3000000003_model_P1.cif.V2".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_copy_move_and_dir_operations() {
    let app = setup_test_app().await;
    seed_file(&app, "D_4000000004", 1, b"copy me");

    // copy into a new deposit
    let form = "sourceRepositoryType=deposit&sourceDepId=D_4000000004&sourceContentType=model\
                &sourcePartNumber=1&sourceContentFormat=pdbx&sourceVersion=latest\
                &targetRepositoryType=archive&targetDepId=D_4000000004&targetContentType=model\
                &targetPartNumber=1&targetContentFormat=pdbx&targetVersion=next";
    let (status, body) = post_form(&app.router, "/copy-file", form).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["path"],
        "archive/D_4000000004/D_4000000004_model_P1.cif.V1"
    );
    assert!(
        app.repository_dir
            .join("archive/D_4000000004/D_4000000004_model_P1.cif.V1")
            .exists()
    );

    // compress the archive copy, then expand it back
    let (status, _) = post_form(
        &app.router,
        "/compress-dir",
        "repositoryType=archive&depId=D_4000000004",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!app.repository_dir.join("archive/D_4000000004").exists());
    assert!(
        app.repository_dir
            .join("archive/D_4000000004.tar.gz")
            .exists()
    );

    let (status, _) = post_form(
        &app.router,
        "/decompress-dir",
        "repositoryType=archive&depId=D_4000000004",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        std::fs::read(
            app.repository_dir
                .join("archive/D_4000000004/D_4000000004_model_P1.cif.V1")
        )
        .unwrap(),
        b"copy me"
    );
}
