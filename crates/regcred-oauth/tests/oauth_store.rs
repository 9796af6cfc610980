//! OAuthStore against an in-process mock tenant

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Form, Json, Router};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

use regcred_core::{encode_auth, join_token_pair, AuthConfig, ConfigFile, CredentialError, INDEX_SERVER};
use regcred_oauth::{OAuthConfig, OAuthStore, SilentPrompt, TenantClient, DEVICE_CODE_GRANT};
use regcred_store::{CredentialStore, FileStore, SharedStore};

const NAMESPACE: &str = "https://hub.docker.com";

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Mint an access token expiring `ttl` seconds from now
fn access_token(username: &str, ttl: u64) -> String {
    let claims = json!({
        "exp": now() + ttl,
        "iat": now(),
        "iss": "https://login.test/",
        "sub": format!("auth0|{username}"),
        "aud": ["https://hub.docker.com"],
        NAMESPACE: {
            "uuid": "0000-1111",
            "email": format!("{username}@example.com"),
            "username": username,
            "source": "password",
            "session_id": "session-1"
        }
    });
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"tenant")).unwrap()
}

/// Scripted tenant behaviour and everything it observed
#[derive(Default)]
struct Tenant {
    pending_polls: usize,
    login_reply: Value,
    refresh_reply: Option<(StatusCode, Value)>,
    revoke_status: Option<StatusCode>,

    device_codes: AtomicUsize,
    polls: AtomicUsize,
    refreshes: Mutex<Vec<String>>,
    revoked: Mutex<Vec<String>>,
}

impl Tenant {
    fn calls(&self) -> usize {
        self.device_codes.load(Ordering::SeqCst)
            + self.polls.load(Ordering::SeqCst)
            + self.refreshes.lock().unwrap().len()
            + self.revoked.lock().unwrap().len()
    }
}

async fn device_code(State(tenant): State<Arc<Tenant>>) -> Json<Value> {
    tenant.device_codes.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "device_code": "device-1",
        "user_code": "ABCD-EFGH",
        "verification_uri": "https://login.test/activate",
        "interval": 0,
        "expires_in": 30
    }))
}

async fn token(
    State(tenant): State<Arc<Tenant>>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    match form.get("grant_type").map(String::as_str) {
        Some(DEVICE_CODE_GRANT) => {
            assert_eq!(form.get("device_code").map(String::as_str), Some("device-1"));
            let polls = tenant.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if polls <= tenant.pending_polls {
                return (
                    StatusCode::FORBIDDEN,
                    Json(json!({"error": "authorization_pending", "error_description": "pending"})),
                );
            }
            (StatusCode::OK, Json(tenant.login_reply.clone()))
        }
        Some("refresh_token") => {
            let refresh = form.get("refresh_token").cloned().unwrap_or_default();
            tenant.refreshes.lock().unwrap().push(refresh);
            match &tenant.refresh_reply {
                Some((status, body)) => (*status, Json(body.clone())),
                None => (
                    StatusCode::FORBIDDEN,
                    Json(json!({"error": "invalid_grant", "error_description": "revoked"})),
                ),
            }
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "unsupported_grant_type"})),
        ),
    }
}

async fn revoke(
    State(tenant): State<Arc<Tenant>>,
    Form(form): Form<HashMap<String, String>>,
) -> StatusCode {
    let token = form.get("token").cloned().unwrap_or_default();
    tenant.revoked.lock().unwrap().push(token);
    tenant.revoke_status.unwrap_or(StatusCode::OK)
}

async fn spawn_tenant(tenant: Tenant) -> (String, Arc<Tenant>) {
    let tenant = Arc::new(tenant);
    let app = Router::new()
        .route("/oauth/device/code", post(device_code))
        .route("/oauth/token", post(token))
        .route("/oauth/revoke", post(revoke))
        .with_state(tenant.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), tenant)
}

struct Fixture {
    dir: tempfile::TempDir,
    backing: SharedStore,
    store: OAuthStore,
    tenant: Arc<Tenant>,
}

impl Fixture {
    async fn new(tenant: Tenant) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigFile::load_from_dir(dir.path()).unwrap();
        let backing: SharedStore = Arc::new(FileStore::new(config));

        let (url, tenant) = spawn_tenant(tenant).await;
        let client = TenantClient::new(OAuthConfig::with_tenant(url)).unwrap();
        let store = OAuthStore::new(backing.clone(), client).with_prompt(Arc::new(SilentPrompt));

        Self {
            dir,
            backing,
            store,
            tenant,
        }
    }

    async fn seed(&self, password: &str) {
        self.backing
            .store(AuthConfig::new(INDEX_SERVER, "someone", password))
            .await
            .unwrap();
    }

    fn on_disk(&self) -> ConfigFile {
        ConfigFile::load_from_dir(self.dir.path()).unwrap()
    }
}

#[tokio::test]
async fn test_fresh_login_stores_token_pair() {
    let access = access_token("someone", 3600);
    let fixture = Fixture::new(Tenant {
        pending_polls: 2,
        login_reply: json!({"access_token": access, "refresh_token": "rt1", "token_type": "Bearer"}),
        ..Default::default()
    })
    .await;

    let view = fixture.store.login().await.unwrap();
    assert_eq!(view.username, "someone");
    assert_eq!(view.password, access);
    assert_eq!(fixture.tenant.polls.load(Ordering::SeqCst), 3);

    let entry = &fixture.on_disk().auths[INDEX_SERVER];
    assert_eq!(
        entry.auth.as_deref(),
        Some(encode_auth("someone", &join_token_pair(&access, "rt1")).as_str())
    );

    // A fresh token is served without talking to the tenant
    let calls = fixture.tenant.calls();
    let record = fixture.store.get("docker.io").await.unwrap().unwrap();
    assert_eq!(record.username, "someone");
    assert_eq!(record.password, access);
    assert_eq!(record.email, "someone@example.com");
    assert_eq!(fixture.tenant.calls(), calls);
}

#[tokio::test]
async fn test_refresh_on_near_expiry() {
    let access2 = access_token("someone", 3600);
    let fixture = Fixture::new(Tenant {
        refresh_reply: Some((
            StatusCode::OK,
            json!({"access_token": access2, "refresh_token": "rt2"}),
        )),
        ..Default::default()
    })
    .await;
    fixture
        .seed(&join_token_pair(&access_token("someone", 600), "rt1"))
        .await;

    let record = fixture.store.get(INDEX_SERVER).await.unwrap().unwrap();
    assert_eq!(record.password, access2);
    assert_eq!(*fixture.tenant.refreshes.lock().unwrap(), vec!["rt1".to_string()]);

    let stored = fixture.on_disk().auth_config(INDEX_SERVER).unwrap().unwrap();
    assert_eq!(stored.password, join_token_pair(&access2, "rt2"));

    // The rotated token is fresh, so a second read is served locally
    fixture.store.get(INDEX_SERVER).await.unwrap();
    assert_eq!(fixture.tenant.refreshes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_refresh_keeps_old_refresh_token() {
    let access2 = access_token("someone", 3600);
    let fixture = Fixture::new(Tenant {
        refresh_reply: Some((StatusCode::OK, json!({"access_token": access2}))),
        ..Default::default()
    })
    .await;
    fixture
        .seed(&join_token_pair(&access_token("someone", 60), "rt1"))
        .await;

    fixture.store.get(INDEX_SERVER).await.unwrap();
    let stored = fixture.on_disk().auth_config(INDEX_SERVER).unwrap().unwrap();
    assert_eq!(stored.password, join_token_pair(&access2, "rt1"));
}

#[tokio::test]
async fn test_legacy_password_untouched() {
    let fixture = Fixture::new(Tenant::default()).await;
    fixture.seed("hunter2").await;
    let before = std::fs::read(fixture.dir.path().join("config.json")).unwrap();

    let record = fixture.store.get(INDEX_SERVER).await.unwrap().unwrap();
    assert_eq!(record.password, "hunter2");
    assert_eq!(record.username, "someone");

    assert_eq!(fixture.tenant.calls(), 0);
    let after = std::fs::read(fixture.dir.path().join("config.json")).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_erase_revokes_old_refresh_token() {
    let fixture = Fixture::new(Tenant {
        revoke_status: Some(StatusCode::INTERNAL_SERVER_ERROR),
        ..Default::default()
    })
    .await;
    fixture
        .seed(&join_token_pair(&access_token("someone", 3600), "rt1"))
        .await;

    fixture.store.erase(INDEX_SERVER).await.unwrap();

    assert_eq!(*fixture.tenant.revoked.lock().unwrap(), vec!["rt1".to_string()]);
    assert!(fixture.on_disk().auths.is_empty());
    assert_eq!(fixture.store.get(INDEX_SERVER).await.unwrap(), None);
}

#[tokio::test]
async fn test_other_registries_pass_through() {
    let fixture = Fixture::new(Tenant::default()).await;
    let pair = join_token_pair(&access_token("someone", 10), "rt1");
    let record = AuthConfig::new("ghcr.test", "u", pair);

    fixture.store.store(record.clone()).await.unwrap();
    assert_eq!(fixture.store.get("ghcr.test").await.unwrap(), Some(record.clone()));
    assert_eq!(
        fixture.store.get("ghcr.test").await.unwrap(),
        fixture.backing.get("ghcr.test").await.unwrap()
    );

    fixture.store.erase("ghcr.test").await.unwrap();
    assert_eq!(fixture.tenant.calls(), 0);
}

#[tokio::test]
async fn test_failed_refresh_without_login() {
    let fixture = Fixture::new(Tenant::default()).await;
    let fixture = Fixture {
        store: fixture.store.interactive(false),
        ..fixture
    };
    fixture
        .seed(&join_token_pair(&access_token("someone", 60), "rt1"))
        .await;

    let err = fixture.store.get(INDEX_SERVER).await.unwrap_err();
    assert!(matches!(err, CredentialError::RefreshFailed(_)));
    assert_eq!(fixture.tenant.device_codes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_refresh_falls_back_to_device_login() {
    let access = access_token("someone", 3600);
    let fixture = Fixture::new(Tenant {
        login_reply: json!({"access_token": access, "refresh_token": "rt9"}),
        ..Default::default()
    })
    .await;
    fixture
        .seed(&join_token_pair(&access_token("someone", 60), "rt1"))
        .await;

    let record = fixture.store.get(INDEX_SERVER).await.unwrap().unwrap();
    assert_eq!(record.password, access);
    assert_eq!(fixture.tenant.refreshes.lock().unwrap().len(), 1);
    assert_eq!(fixture.tenant.device_codes.load(Ordering::SeqCst), 1);

    let stored = fixture.on_disk().auth_config(INDEX_SERVER).unwrap().unwrap();
    assert_eq!(stored.password, join_token_pair(&access, "rt9"));
}

#[tokio::test]
async fn test_login_can_be_cancelled() {
    let fixture = Fixture::new(Tenant {
        pending_polls: usize::MAX,
        ..Default::default()
    })
    .await;
    let cancel = CancellationToken::new();
    let store = fixture.store.with_cancellation(cancel.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
    });

    let err = store.login().await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.to_string(), "login canceled");
    canceller.await.unwrap();
    assert!(!fixture.dir.path().join("config.json").exists());
}
