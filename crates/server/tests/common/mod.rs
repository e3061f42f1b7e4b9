//! Shared test harness: a fully wired [`AppState`] over a temp-file
//! database and a temp chunk directory, plus signup/collection helpers
//! used across the suites.

use std::sync::Arc;

use etebase_blob::ChunkStore;
use server::broker::Broker;
use server::config::Config;
use server::state::AppState;
use server::tickets::TicketStore;
use server::wire::{CollectionCreateIn, ContentIn, ItemWrite, SignupRequest, SignupUser};
use server::{crypto, db};
use tempfile::TempDir;

pub const TEST_SECRET: &str = "test-secret-0123456789abcdef0123456789abcdef";
pub const TEST_HOST: &str = "sync.example.com";

pub struct TestServer {
    pub state: AppState,
    // keeps the database and chunk files alive for the test's duration
    #[allow(dead_code)]
    pub dir: TempDir,
}

pub async fn test_server() -> TestServer {
    test_server_with(|_| {}).await
}

#[allow(dead_code)]
pub async fn test_server_with(tweak: impl FnOnce(&mut Config)) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("server.db");

    let mut config = Config {
        port: 0,
        debug: false,
        encryption_secret: TEST_SECRET.to_string(),
        allowed_origins: vec!["*".to_string()],
        allowed_hosts: vec!["*".to_string()],
        challenge_valid_seconds: 300,
        chunk_storage_path: dir.path().join("chunks"),
        database_url: format!("sqlite://{}?mode=rwc", db_path.display()),
        redis_url: None,
    };
    tweak(&mut config);

    let pool = db::connect(&config.database_url).await.unwrap();
    std::fs::create_dir_all(&config.chunk_storage_path).unwrap();
    let store = ChunkStore::new(&config.chunk_storage_path);

    let state = AppState::assemble(
        Arc::new(config),
        pool,
        store,
        Broker::local(),
        TicketStore::local(),
    );
    TestServer { state, dir }
}

/// Create a user through the signup service; returns `(user_id, token)`.
#[allow(dead_code)]
pub async fn signup_user(state: &AppState, username: &str) -> (i64, String) {
    signup_user_with_keys(state, username, &[2u8; 32], &[1u8; 16]).await
}

#[allow(dead_code)]
pub async fn signup_user_with_keys(
    state: &AppState,
    username: &str,
    login_pubkey: &[u8],
    salt: &[u8],
) -> (i64, String) {
    let req = SignupRequest {
        user: SignupUser {
            username: username.to_string(),
            email: format!("{username}@example.com"),
        },
        salt: salt.to_vec(),
        login_pubkey: login_pubkey.to_vec(),
        pubkey: vec![3u8; 32],
        encrypted_content: b"enc".to_vec(),
    };
    let out = state.auth.signup(&req).await.unwrap();
    let user = state.auth.user_by_token(&out.token).await.unwrap();
    (user.id, out.token)
}

/// An [`ItemWrite`] with fresh revision UID and the given item UID.
#[allow(dead_code)]
pub fn item_write(uid: &str, meta: &[u8]) -> ItemWrite {
    ItemWrite {
        uid: uid.to_string(),
        version: 1,
        etag: None,
        content: ContentIn {
            uid: crypto::generate_stoken_uid(),
            meta: meta.to_vec(),
            deleted: false,
            chunks: None,
        },
    }
}

/// Create a collection owned by `user_id`; returns its UID.
#[allow(dead_code)]
pub async fn create_collection(state: &AppState, user_id: i64) -> String {
    let uid = crypto::generate_stoken_uid();
    let req = CollectionCreateIn {
        collection_type: None,
        collection_key: vec![9u8; 32],
        item: item_write(&uid, b"collection-meta"),
    };
    state.collections.create(user_id, &req).await.unwrap();
    uid
}

/// Resolve a wire stoken UID back to its ordering id, for monotonicity
/// assertions.
#[allow(dead_code)]
pub async fn stoken_id(state: &AppState, uid: &str) -> i64 {
    let (id,): (i64,) = sqlx::query_as("SELECT id FROM django_stoken WHERE uid = ?")
        .bind(uid)
        .fetch_one(&state.pool)
        .await
        .unwrap();
    id
}
