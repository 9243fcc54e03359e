//! Route handlers for the per-repository Git HTTP surface.

use crate::error::WebError;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use rowgit_git::{
    advertise_refs, head_symref, info_refs_dumb, receive_pack, Plumbing, RepoSession,
    RECEIVE_PACK_SERVICE,
};
use rowgit_store::StoreError;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared per-repository state.
pub struct RepoState<P: Plumbing>(Arc<RepoSession<P>>);

impl<P: Plumbing> Clone for RepoState<P> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// Builds the router for one repository session.
///
/// The host guarantees requests against the same repository are handled
/// one at a time; this layer adds no further coordination.
pub fn repo_router<P: Plumbing + 'static>(session: Arc<RepoSession<P>>) -> Router {
    Router::new()
        .route("/HEAD", get(head::<P>))
        .route("/info/refs", get(info_refs::<P>))
        .route("/objects/info/packs", get(pack_listing::<P>))
        .route("/objects/{prefix}/{rest}", get(loose_object::<P>))
        .route("/git-receive-pack", post(receive_pack_post::<P>))
        .layer(TraceLayer::new_for_http())
        .with_state(RepoState(session))
}

/// Query parameters for `/info/refs`.
#[derive(Debug, Deserialize)]
struct ServiceQuery {
    service: Option<String>,
}

async fn head<P: Plumbing + 'static>(
    State(state): State<RepoState<P>>,
) -> Result<Response, WebError> {
    match head_symref(state.0.as_ref())? {
        Some(body) => Ok(([(header::CONTENT_TYPE, "text/plain")], body).into_response()),
        None => Err(WebError::NotFound("HEAD".to_string())),
    }
}

async fn info_refs<P: Plumbing + 'static>(
    State(state): State<RepoState<P>>,
    Query(query): Query<ServiceQuery>,
) -> Result<Response, WebError> {
    match query.service.as_deref() {
        Some(RECEIVE_PACK_SERVICE) => {
            let body = advertise_refs(state.0.as_ref())?;
            Ok((
                [
                    (
                        header::CONTENT_TYPE,
                        "application/x-git-receive-pack-advertisement",
                    ),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                body,
            )
                .into_response())
        }
        Some(other) => {
            tracing::warn!(service = %other, "unsupported service requested");
            Ok((StatusCode::FORBIDDEN, "service not enabled\n").into_response())
        }
        None => {
            let body = info_refs_dumb(state.0.as_ref())?;
            Ok((
                [
                    (header::CONTENT_TYPE, "text/plain"),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                body,
            )
                .into_response())
        }
    }
}

async fn loose_object<P: Plumbing + 'static>(
    State(state): State<RepoState<P>>,
    Path((prefix, rest)): Path<(String, String)>,
) -> Result<Response, WebError> {
    // The dumb protocol treats malformed object names as absent objects.
    let well_formed = prefix.len() == 2
        && rest.len() == 38
        && prefix.chars().chain(rest.chars()).all(|c| c.is_ascii_hexdigit());
    if !well_formed {
        return Err(WebError::NotFound(format!("objects/{}/{}", prefix, rest)));
    }

    let bytes = state.0.fs().read(&format!("objects/{}/{}", prefix, rest))?;
    Ok((
        [(header::CONTENT_TYPE, "application/x-git-loose-object")],
        bytes,
    )
        .into_response())
}

async fn pack_listing<P: Plumbing + 'static>(
    State(state): State<RepoState<P>>,
) -> Result<Response, WebError> {
    let names = match state.0.fs().list("objects/pack") {
        Ok(names) => names,
        Err(StoreError::NotFound(_)) => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    let mut body = String::new();
    for name in names {
        if name.ends_with(".pack") {
            body.push_str(&format!("P {}\n", name));
        }
    }
    Ok(([(header::CONTENT_TYPE, "text/plain")], body).into_response())
}

async fn receive_pack_post<P: Plumbing + 'static>(
    State(state): State<RepoState<P>>,
    body: Bytes,
) -> Result<Response, WebError> {
    let report = receive_pack(state.0.as_ref(), &body)?;
    Ok((
        [(
            header::CONTENT_TYPE,
            "application/x-git-receive-pack-result",
        )],
        report,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use rowgit_git::{encode, LooseRefs, ObjectId, PlumbingError, ProtocolConfig};
    use rowgit_store::{ChunkFs, FsConfig, SqliteStore};
    use tower::ServiceExt;

    /// Loose refs plus a no-op pack indexer.
    struct TestPlumbing {
        refs: LooseRefs,
    }

    impl Plumbing for TestPlumbing {
        fn list_refs(&self) -> Result<Vec<(String, ObjectId)>, PlumbingError> {
            self.refs.list()
        }

        fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>, PlumbingError> {
            self.refs.read(name)
        }

        fn peel_tag(&self, _name: &str) -> Result<Option<ObjectId>, PlumbingError> {
            Ok(None)
        }

        fn head_branch(&self) -> Result<Option<String>, PlumbingError> {
            self.refs.head_branch()
        }

        fn set_head_branch(&self, branch: &str) -> Result<(), PlumbingError> {
            self.refs.set_head_branch(branch)
        }

        fn update_ref(&self, name: &str, oid: ObjectId) -> Result<(), PlumbingError> {
            self.refs.write(name, oid)
        }

        fn delete_ref(&self, name: &str) -> Result<(), PlumbingError> {
            self.refs.delete(name)
        }

        fn index_pack(&self, _pack_path: &str) -> Result<(), PlumbingError> {
            Ok(())
        }
    }

    fn session() -> Arc<RepoSession<TestPlumbing>> {
        let store = SqliteStore::open_in_memory().unwrap();
        let fs = Arc::new(ChunkFs::new(store, FsConfig::default()).unwrap());
        let plumbing = TestPlumbing {
            refs: LooseRefs::new(fs.clone()),
        };
        Arc::new(RepoSession::new(fs, plumbing, ProtocolConfig::default()))
    }

    async fn fetch(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    fn oid(byte: u8) -> ObjectId {
        ObjectId::from_bytes([byte; 20])
    }

    #[tokio::test]
    async fn test_head_endpoint() {
        let session = session();
        let app = repo_router(session.clone());

        let (status, _) = fetch(&app, "/HEAD").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        session.plumbing().set_head_branch("main").unwrap();
        let (status, body) = fetch(&app, "/HEAD").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ref: refs/heads/main\n");
    }

    #[tokio::test]
    async fn test_info_refs_dumb() {
        let session = session();
        session.plumbing().update_ref("refs/heads/main", oid(1)).unwrap();
        let app = repo_router(session);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/info/refs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-cache"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, format!("{}\trefs/heads/main\n", oid(1)).as_bytes());
    }

    #[tokio::test]
    async fn test_info_refs_smart() {
        let session = session();
        let app = repo_router(session);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/info/refs?service=git-receive-pack")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/x-git-receive-pack-advertisement"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.starts_with(b"001f# service=git-receive-pack\n0000"));
    }

    #[tokio::test]
    async fn test_info_refs_unknown_service() {
        let app = repo_router(session());
        let (status, _) = fetch(&app, "/info/refs?service=git-upload-pack").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_loose_object() {
        let session = session();
        let prefix = "ab";
        let rest = "cdef0123456789abcdef0123456789abcdef01";
        session.fs().mkdir("objects", None).unwrap();
        session.fs().mkdir("objects/ab", None).unwrap();
        session
            .fs()
            .write(&format!("objects/{}/{}", prefix, rest), b"zlib bytes", None)
            .unwrap();
        let app = repo_router(session);

        let (status, body) = fetch(&app, &format!("/objects/{}/{}", prefix, rest)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"zlib bytes");

        let (status, _) =
            fetch(&app, "/objects/ff/cdef0123456789abcdef0123456789abcdef01").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Malformed names are 404, not 400.
        let (status, _) = fetch(&app, "/objects/xyz/notanobject").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_pack_listing() {
        let session = session();
        let app = repo_router(session.clone());

        let (status, body) = fetch(&app, "/objects/info/packs").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());

        session.fs().mkdir("objects", None).unwrap();
        session.fs().mkdir("objects/pack", None).unwrap();
        session
            .fs()
            .write("objects/pack/pack-abc.pack", b"PACK", None)
            .unwrap();
        session
            .fs()
            .write("objects/pack/pack-abc.idx", b"IDX", None)
            .unwrap();

        let (_, body) = fetch(&app, "/objects/info/packs").await;
        assert_eq!(body, b"P pack-abc.pack\n");
    }

    #[tokio::test]
    async fn test_push_then_head() {
        let session = session();
        let app = repo_router(session.clone());

        let mut body = Vec::new();
        body.extend_from_slice(
            &encode(
                format!(
                    "{} {} refs/heads/main\0report-status\n",
                    ObjectId::ZERO,
                    oid(1)
                )
                .as_bytes(),
            )
            .unwrap(),
        );
        body.extend_from_slice(b"0000");
        body.extend_from_slice(b"PACKcontents");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/git-receive-pack")
                    .header(
                        header::CONTENT_TYPE,
                        "application/x-git-receive-pack-request",
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/x-git-receive-pack-result"
        );
        let report = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(report.starts_with(b"000eunpack ok\n"));

        let (status, head) = fetch(&app, "/HEAD").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(head, b"ref: refs/heads/main\n");
    }
}
