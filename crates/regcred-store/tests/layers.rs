//! Layered store behaviour across file, helper and environment stores

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use regcred_core::{encode_auth, AuthConfig, ConfigFile, Environment, INDEX_SERVER};
use regcred_store::{
    CredentialStore, EnvStore, HelperCredentials, HelperFailure, HelperVerb, Program,
    RoutingStore, SharedStore, ERR_CREDENTIALS_NOT_FOUND,
};

/// Keychain double shared by every helper name it is created for
#[derive(Default)]
struct Keychain {
    secrets: Mutex<BTreeMap<String, HelperCredentials>>,
}

struct FakeProgram {
    name: String,
    keychain: Arc<Keychain>,
}

#[async_trait]
impl Program for FakeProgram {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, verb: HelperVerb, input: &[u8]) -> Result<Vec<u8>, HelperFailure> {
        let mut secrets = self.keychain.secrets.lock();
        let missing = || HelperFailure::Exited(ERR_CREDENTIALS_NOT_FOUND.to_string());
        let key = |input: &[u8]| format!("{}/{}", self.name, String::from_utf8_lossy(input));
        match verb {
            HelperVerb::Store => {
                let creds: HelperCredentials = serde_json::from_slice(input).unwrap();
                secrets.insert(key(creds.server_url.as_bytes()), creds);
                Ok(Vec::new())
            }
            HelperVerb::Get => secrets
                .get(&key(input))
                .map(|c| serde_json::to_vec(c).unwrap())
                .ok_or_else(missing),
            HelperVerb::Erase => secrets.remove(&key(input)).map(|_| Vec::new()).ok_or_else(missing),
            HelperVerb::List => {
                let prefix = format!("{}/", self.name);
                let list: BTreeMap<String, String> = secrets
                    .iter()
                    .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|s| (s.to_string(), v.username.clone())))
                    .collect();
                Ok(serde_json::to_vec(&list).unwrap())
            }
        }
    }
}

fn routing(config: ConfigFile, default_helper: Option<&str>) -> (RoutingStore, Arc<Keychain>) {
    let keychain = Arc::new(Keychain::default());
    let shared = keychain.clone();
    let factory = move |name: &str| -> Arc<dyn Program> {
        Arc::new(FakeProgram {
            name: name.to_string(),
            keychain: shared.clone(),
        })
    };
    let store = RoutingStore::with_factory(config, default_helper.map(str::to_string), &factory);
    (store, keychain)
}

#[tokio::test]
async fn test_cred_helpers_route_per_registry() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ConfigFile::load_from_dir(dir.path()).unwrap();
    config
        .cred_helpers
        .insert("gcr.test".to_string(), "gcloud".to_string());

    let (store, keychain) = routing(config, None);

    store
        .store(AuthConfig::new("gcr.test", "_token", "gcp-secret"))
        .await
        .unwrap();
    store
        .store(AuthConfig::new("r.test", "u", "p"))
        .await
        .unwrap();

    assert!(keychain.secrets.lock().contains_key("gcloud/gcr.test"));

    // Only the file-backed registry carries a secret on disk
    let on_disk = ConfigFile::load_from_dir(dir.path()).unwrap();
    assert_eq!(on_disk.auth_config("r.test").unwrap().unwrap().password, "p");
    assert!(on_disk
        .auth_config("gcr.test")
        .unwrap()
        .map(|r| r.password.is_empty())
        .unwrap_or(true));

    let all = store.get_all().await.unwrap();
    assert_eq!(all["gcr.test"].password, "gcp-secret");
    assert_eq!(all["r.test"].password, "p");
}

#[tokio::test]
async fn test_default_helper_keeps_secrets_off_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigFile::load_from_dir(dir.path()).unwrap();
    let (store, _) = routing(config, Some("secretservice"));

    store
        .store(AuthConfig::new("r.test", "u", "hunter2"))
        .await
        .unwrap();

    let raw = std::fs::read_to_string(dir.path().join("config.json")).unwrap();
    assert!(!raw.contains(&encode_auth("u", "hunter2")));
    assert_eq!(store.get("r.test").await.unwrap().unwrap().password, "hunter2");

    store.erase("r.test").await.unwrap();
    assert_eq!(store.get("r.test").await.unwrap(), None);
}

#[tokio::test]
async fn test_env_overlay_takes_precedence() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("config.json"),
        format!(
            r#"{{"auths":{{"{INDEX_SERVER}":{{"auth":"{}"}}}}}}"#,
            encode_auth("fileu", "filep")
        ),
    )
    .unwrap();

    let config = ConfigFile::load_from_dir(dir.path()).unwrap();
    let (file, _) = routing(config, None);
    let env = Environment {
        auth_config: Some(format!(
            r#"{{"{INDEX_SERVER}":{{"username":"envu","auth":"{}"}}}}"#,
            encode_auth("envu", "envp")
        )),
        ..Default::default()
    };

    let store: SharedStore = EnvStore::wrap(&env, Arc::new(file));
    let record = store.get("docker.io").await.unwrap().unwrap();
    assert_eq!(record.username, "envu");
    assert_eq!(record.password, "envp");

    let all = store.get_all().await.unwrap();
    assert_eq!(all[INDEX_SERVER].username, "envu");
    assert!(env.has_env_credentials());
    assert!(EnvStore::warning().contains("DOCKER_AUTH_CONFIG"));
}

#[tokio::test]
async fn test_no_env_returns_fallback_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigFile::load_from_dir(dir.path()).unwrap();
    let (file, _) = routing(config, None);
    let fallback: SharedStore = Arc::new(file);

    let store = EnvStore::wrap(&Environment::default(), fallback.clone());
    assert!(Arc::ptr_eq(&store, &fallback));
}
