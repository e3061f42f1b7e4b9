//! Sync engine behavior: incremental listing across the three streams,
//! pagination, optimistic concurrency, membership lifecycle, and chunk
//! handling.

mod common;

use std::collections::HashSet;

use common::{
    create_collection, item_write, signup_user, stoken_id, test_server,
};
use server::db;
use server::error::Error;
use server::models::AccessLevel;
use server::wire::{
    Deps, FetchUpdatesIn, InvitationAcceptIn, InvitationCreateIn, ItemFetchIn, ItemWrite,
};
use server::{crypto, state::AppState};

/// Wire a second user into a collection through the invitation flow.
async fn add_member(
    state: &AppState,
    owner_id: i64,
    invitee_username: &str,
    invitee_id: i64,
    collection_uid: &str,
    access_level: AccessLevel,
) {
    state
        .invitations
        .create(
            owner_id,
            &InvitationCreateIn {
                uid: crypto::generate_stoken_uid(),
                version: 1,
                username: invitee_username.to_string(),
                collection: collection_uid.to_string(),
                access_level,
                signed_encryption_key: vec![7u8; 64],
            },
        )
        .await
        .unwrap();

    let incoming = state.invitations.list_incoming(invitee_id).await.unwrap();
    let invitation_uid = incoming.data.last().unwrap().uid.clone();
    state
        .invitations
        .accept(
            &invitation_uid,
            invitee_id,
            &InvitationAcceptIn {
                encryption_key: vec![8u8; 32],
                collection_type: None,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn incremental_collection_sync_over_all_three_streams() {
    let server = test_server().await;
    let state = &server.state;

    let (alice, _) = signup_user(state, "alice").await;
    let (bob, _) = signup_user(state, "bob").await;

    // alice owns c1; bob owns c2 and shares it with alice
    let c1 = create_collection(state, alice).await;
    let c2 = create_collection(state, bob).await;
    add_member(state, bob, "alice", alice, &c2, AccessLevel::ReadWrite).await;

    // snapshot sync: both collections, a cursor, done
    let page = state.collections.list(alice, None, 50, None).await.unwrap();
    assert_eq!(page.data.len(), 2);
    assert!(page.done);
    assert!(page.removed_memberships.is_none());
    let s0 = page.stoken.unwrap();

    // nothing changed: empty page, same cursor handed back
    let page = state
        .collections
        .list(alice, Some(&s0), 50, None)
        .await
        .unwrap();
    assert!(page.data.is_empty());
    assert!(page.done);
    assert_eq!(page.stoken.as_deref(), Some(s0.as_str()));

    // a write to c1 surfaces exactly c1
    state
        .items
        .batch(&c1, alice, &[item_write("itemA0000000000000000A", b"v1")])
        .await
        .unwrap();
    let page = state
        .collections
        .list(alice, Some(&s0), 50, None)
        .await
        .unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].item.uid, c1);
    let s1 = page.stoken.unwrap();
    assert!(stoken_id(state, &s1).await > stoken_id(state, &s0).await);

    // removal from c2 surfaces as a tombstone, not as data
    state.members.remove(&c2, "alice", bob).await.unwrap();
    let page = state
        .collections
        .list(alice, Some(&s1), 50, None)
        .await
        .unwrap();
    assert!(page.data.is_empty());
    let removed = page.removed_memberships.unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].uid, c2);
    let s2 = page.stoken.unwrap();
    assert!(stoken_id(state, &s2).await > stoken_id(state, &s1).await);

    // the tombstone is not replayed past its stoken
    let page = state
        .collections
        .list(alice, Some(&s2), 50, None)
        .await
        .unwrap();
    assert!(page.data.is_empty());
    assert!(page.removed_memberships.is_none());
}

#[tokio::test]
async fn transactional_etag_conflict_writes_nothing() {
    let server = test_server().await;
    let state = &server.state;
    let (alice, _) = signup_user(state, "alice").await;
    let collection = create_collection(state, alice).await;

    let item_uid = "conflicteditem00000000";
    state
        .items
        .batch(&collection, alice, &[item_write(item_uid, b"v1")])
        .await
        .unwrap();
    let initial_etag = state
        .items
        .get(&collection, item_uid, alice)
        .await
        .unwrap()
        .etag;

    // first writer wins
    let mut write = item_write(item_uid, b"v2");
    write.etag = Some(initial_etag.clone());
    state
        .items
        .transaction(&collection, alice, &[write], None)
        .await
        .unwrap();
    let new_etag = state
        .items
        .get(&collection, item_uid, alice)
        .await
        .unwrap()
        .etag;
    assert_ne!(new_etag, initial_etag);

    // second writer carries the stale etag and fails with both values
    let fresh = item_write("freshitem0000000000000", b"other");
    let mut stale = item_write(item_uid, b"v3");
    stale.etag = Some(initial_etag.clone());
    let err = state
        .items
        .transaction(&collection, alice, &[fresh, stale], None)
        .await
        .unwrap_err();
    match &err {
        Error::WrongEtag { expected, got } => {
            assert_eq!(expected, &initial_etag);
            assert_eq!(got, &new_etag);
        }
        other => panic!("expected WrongEtag, got {other:?}"),
    }
    assert_eq!(
        err.detail(),
        format!("Wrong etag. Expected {initial_etag} got {new_etag}")
    );

    // nothing from the failed transaction persisted, not even the first
    // item of the batch
    assert!(matches!(
        state.items.get(&collection, "freshitem0000000000000", alice).await,
        Err(Error::NotMember)
    ));
    assert_eq!(
        state
            .items
            .get(&collection, item_uid, alice)
            .await
            .unwrap()
            .etag,
        new_etag
    );
}

#[tokio::test]
async fn batch_ignores_preconditions_and_appends() {
    let server = test_server().await;
    let state = &server.state;
    let (alice, _) = signup_user(state, "alice").await;
    let collection = create_collection(state, alice).await;

    let item_uid = "batcheditem00000000000";
    state
        .items
        .batch(&collection, alice, &[item_write(item_uid, b"v1")])
        .await
        .unwrap();

    let mut stale = item_write(item_uid, b"v2");
    stale.etag = Some("completely-wrong-etag-".to_string());
    state
        .items
        .batch(&collection, alice, &[stale])
        .await
        .unwrap();

    let history = state
        .items
        .revisions(&collection, item_uid, alice, None, 50)
        .await
        .unwrap();
    assert_eq!(history.data.len(), 2);
    // newest first
    assert_eq!(history.data[0].meta, b"v2");
    assert_eq!(history.data[1].meta, b"v1");
}

#[tokio::test]
async fn deps_stoken_guards_the_whole_collection() {
    let server = test_server().await;
    let state = &server.state;
    let (alice, _) = signup_user(state, "alice").await;
    let collection = create_collection(state, alice).await;

    let stale = state
        .collections
        .list(alice, None, 50, None)
        .await
        .unwrap()
        .stoken
        .unwrap();

    // move the collection forward
    state
        .items
        .batch(&collection, alice, &[item_write("movingitem000000000000", b"x")])
        .await
        .unwrap();

    let err = state
        .items
        .transaction(
            &collection,
            alice,
            &[item_write("newitem000000000000000", b"y")],
            Some(&Deps {
                stoken: Some(stale.clone()),
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StaleStoken));

    // with the current stoken the same write goes through
    let current = state
        .collections
        .list(alice, None, 50, None)
        .await
        .unwrap()
        .stoken
        .unwrap();
    state
        .items
        .transaction(
            &collection,
            alice,
            &[item_write("newitem000000000000000", b"y")],
            Some(&Deps {
                stoken: Some(current),
            }),
        )
        .await
        .unwrap();

    // unknown stokens are the caller's error
    let err = state
        .items
        .list(&collection, alice, Some("not-a-real-stoken-uid-anywhere00"), 50)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BadStoken));
}

#[tokio::test]
async fn item_pagination_makes_progress_and_terminates() {
    let server = test_server().await;
    let state = &server.state;
    let (alice, _) = signup_user(state, "alice").await;
    let collection = create_collection(state, alice).await;

    let writes: Vec<ItemWrite> = (0..5)
        .map(|i| item_write(&format!("item{i}xxxxxxxxxxxxxxxxxx"), b"data"))
        .collect();
    state.items.batch(&collection, alice, &writes).await.unwrap();

    // 6 items in all (the main item plus five), pages of 2
    let mut seen: HashSet<String> = HashSet::new();
    let mut cursor: Option<String> = None;
    let mut calls = 0;
    loop {
        calls += 1;
        assert!(calls <= 4, "pagination failed to terminate");
        let page = state
            .items
            .list(&collection, alice, cursor.as_deref(), 2)
            .await
            .unwrap();
        assert!(page.data.len() <= 2);
        for item in &page.data {
            // an already-emitted item never reappears under the returned
            // cursor
            assert!(seen.insert(item.uid.clone()), "duplicate item {}", item.uid);
        }
        cursor = page.stoken;
        if page.done {
            break;
        }
    }
    assert_eq!(seen.len(), 6);

    // resuming from the final cursor yields an empty, done page
    let page = state
        .items
        .list(&collection, alice, cursor.as_deref(), 2)
        .await
        .unwrap();
    assert!(page.data.is_empty());
    assert!(page.done);
}

#[tokio::test]
async fn item_list_carries_current_content_and_chunks() {
    let server = test_server().await;
    let state = &server.state;
    let (alice, _) = signup_user(state, "alice").await;
    let collection = create_collection(state, alice).await;

    state
        .chunks
        .upload(&collection, "chunkAAA", alice, b"chunk-a")
        .await
        .unwrap();
    state
        .chunks
        .upload(&collection, "chunkBBB", alice, b"chunk-b")
        .await
        .unwrap();

    let mut write = item_write("chunkyitem000000000000", b"meta-bytes");
    write.content.chunks = Some(vec!["chunkBBB".to_string(), "chunkAAA".to_string()]);
    state.items.batch(&collection, alice, &[write]).await.unwrap();

    let item = state
        .items
        .get(&collection, "chunkyitem000000000000", alice)
        .await
        .unwrap();
    assert_eq!(item.content.meta, b"meta-bytes");
    assert!(!item.content.deleted);
    assert_eq!(item.etag, item.content.uid);
    // chunk order is the writer's order, not lexicographic
    let chunk_uids: Vec<&str> = item
        .content
        .chunks
        .as_ref()
        .unwrap()
        .iter()
        .map(|c| c.uid.as_str())
        .collect();
    assert_eq!(chunk_uids, vec!["chunkBBB", "chunkAAA"]);

    // referencing a never-uploaded chunk is a validation failure
    let mut bad = item_write("baditem000000000000000", b"m");
    bad.content.chunks = Some(vec!["neverput".to_string()]);
    let err = state.items.batch(&collection, alice, &[bad]).await.unwrap_err();
    assert!(matches!(err, Error::Validation { field: "chunks", .. }));
}

#[tokio::test]
async fn chunk_upload_is_write_once() {
    let server = test_server().await;
    let state = &server.state;
    let (alice, _) = signup_user(state, "alice").await;
    let collection = create_collection(state, alice).await;

    state
        .chunks
        .upload(&collection, "chunkK00", alice, b"hello")
        .await
        .unwrap();
    let err = state
        .chunks
        .upload(&collection, "chunkK00", alice, b"world")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChunkExists));

    let data = state
        .chunks
        .download(&collection, "chunkK00", alice)
        .await
        .unwrap();
    assert_eq!(&data[..], b"hello");

    let err = state
        .chunks
        .upload(&collection, "chunkEmpty", alice, b"")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChunkNoContent));

    let err = state
        .chunks
        .download(&collection, "chunkMissing", alice)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChunkNoContent));
}

#[tokio::test]
async fn fetch_updates_reports_only_stale_etags() {
    let server = test_server().await;
    let state = &server.state;
    let (alice, _) = signup_user(state, "alice").await;
    let collection = create_collection(state, alice).await;

    state
        .items
        .batch(
            &collection,
            alice,
            &[
                item_write("itemone000000000000000", b"one"),
                item_write("itemtwo000000000000000", b"two"),
            ],
        )
        .await
        .unwrap();
    let one = state
        .items
        .get(&collection, "itemone000000000000000", alice)
        .await
        .unwrap();
    let two = state
        .items
        .get(&collection, "itemtwo000000000000000", alice)
        .await
        .unwrap();

    // advance item one
    state
        .items
        .batch(&collection, alice, &[item_write("itemone000000000000000", b"one-v2")])
        .await
        .unwrap();

    let updates = state
        .items
        .fetch_updates(
            &collection,
            alice,
            &FetchUpdatesIn {
                items: vec![
                    ItemFetchIn {
                        uid: one.uid.clone(),
                        etag: one.etag.clone(),
                    },
                    ItemFetchIn {
                        uid: two.uid.clone(),
                        etag: two.etag.clone(),
                    },
                    // unknown items are silently omitted
                    ItemFetchIn {
                        uid: "doesnotexist0000000000".to_string(),
                        etag: "whatever".to_string(),
                    },
                ],
            },
        )
        .await
        .unwrap();
    assert_eq!(updates.data.len(), 1);
    assert_eq!(updates.data[0].uid, one.uid);
    assert_eq!(updates.data[0].content.meta, b"one-v2");
}

#[tokio::test]
async fn revision_history_pages_newest_first() {
    let server = test_server().await;
    let state = &server.state;
    let (alice, _) = signup_user(state, "alice").await;
    let collection = create_collection(state, alice).await;

    let item_uid = "versioneditem000000000";
    for round in 0..3 {
        state
            .items
            .batch(
                &collection,
                alice,
                &[item_write(item_uid, format!("v{round}").as_bytes())],
            )
            .await
            .unwrap();
    }

    let first = state
        .items
        .revisions(&collection, item_uid, alice, None, 2)
        .await
        .unwrap();
    assert_eq!(first.data.len(), 2);
    assert!(!first.done);
    assert_eq!(first.data[0].meta, b"v2");
    assert_eq!(first.data[1].meta, b"v1");

    let second = state
        .items
        .revisions(&collection, item_uid, alice, first.iterator.as_deref(), 2)
        .await
        .unwrap();
    assert_eq!(second.data.len(), 1);
    assert!(second.done);
    assert!(second.iterator.is_none());
    assert_eq!(second.data[0].meta, b"v0");
}

#[tokio::test]
async fn at_most_one_current_revision_per_item() {
    let server = test_server().await;
    let state = &server.state;
    let (alice, _) = signup_user(state, "alice").await;
    let collection = create_collection(state, alice).await;

    let item_uid = "singlecurrent000000000";
    for round in 0..3 {
        state
            .items
            .batch(
                &collection,
                alice,
                &[item_write(item_uid, format!("r{round}").as_bytes())],
            )
            .await
            .unwrap();
    }

    let (current_count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM django_collectionitemrevision r \
         JOIN django_collectionitem i ON i.id = r.item_id \
         WHERE i.uid = ? AND r.current = 1",
    )
    .bind(item_uid)
    .fetch_one(&state.pool)
    .await
    .unwrap();
    assert_eq!(current_count, 1);

    // the uniqueness is load-bearing in the schema itself: a second
    // current row for the same item is refused outright
    let (item_id,): (i64,) =
        sqlx::query_as("SELECT id FROM django_collectionitem WHERE uid = ?")
            .bind(item_uid)
            .fetch_one(&state.pool)
            .await
            .unwrap();
    let mut conn = state.pool.acquire().await.unwrap();
    let stoken = db::allocate_stoken(&mut conn).await.unwrap();
    let result = sqlx::query(
        "INSERT INTO django_collectionitemrevision \
         (uid, item_id, stoken_id, meta, current, deleted) VALUES (?, ?, ?, ?, 1, 0)",
    )
    .bind(crypto::generate_stoken_uid())
    .bind(item_id)
    .bind(stoken.id)
    .bind(b"rogue".as_slice())
    .execute(&mut *conn)
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn every_revision_owns_a_fresh_monotonic_stoken() {
    let server = test_server().await;
    let state = &server.state;
    let (alice, _) = signup_user(state, "alice").await;
    let collection = create_collection(state, alice).await;

    let mut previous_max = 0i64;
    for round in 0..4 {
        state
            .items
            .batch(
                &collection,
                alice,
                &[item_write("monotonicitem000000000", format!("{round}").as_bytes())],
            )
            .await
            .unwrap();
        let mut conn = state.pool.acquire().await.unwrap();
        let collection_row = db::collection_by_uid(&mut conn, &collection)
            .await
            .unwrap()
            .unwrap();
        let max = db::collection_max_stoken(&mut conn, collection_row.id)
            .await
            .unwrap();
        assert!(max > previous_max, "stoken order not monotonic");
        previous_max = max;
    }

    // stokens are 1:1 with revisions
    let (revisions, distinct_stokens): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(DISTINCT stoken_id) FROM django_collectionitemrevision",
    )
    .fetch_one(&state.pool)
    .await
    .unwrap();
    assert_eq!(revisions, distinct_stokens);
}

#[tokio::test]
async fn membership_lifecycle_keeps_member_and_tombstone_exclusive() {
    let server = test_server().await;
    let state = &server.state;
    let (alice, _) = signup_user(state, "alice").await;
    let (bob, _) = signup_user(state, "bob").await;
    let collection = create_collection(state, alice).await;

    add_member(state, alice, "bob", bob, &collection, AccessLevel::ReadOnly).await;

    let pair_count = |state: &AppState| {
        let pool = state.pool.clone();
        let collection = collection.clone();
        async move {
            let (members, removed): (i64, i64) = sqlx::query_as(
                "SELECT \
                   (SELECT COUNT(*) FROM django_collectionmember m \
                    JOIN django_collection c ON c.id = m.collection_id \
                    JOIN myauth_user u ON u.id = m.user_id \
                    WHERE c.uid = ?1 AND u.username = 'bob'), \
                   (SELECT COUNT(*) FROM django_collectionmemberremoved mr \
                    JOIN django_collection c ON c.id = mr.collection_id \
                    JOIN myauth_user u ON u.id = mr.user_id \
                    WHERE c.uid = ?1 AND u.username = 'bob')",
            )
            .bind(&collection)
            .fetch_one(&pool)
            .await
            .unwrap();
            (members, removed)
        }
    };

    assert_eq!(pair_count(state).await, (1, 0));

    // read-only member cannot write
    let err = state
        .items
        .batch(&collection, bob, &[item_write("bobsitem00000000000000", b"x")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoWriteAccess));

    // promote, then the same write goes through
    state
        .members
        .update_access(&collection, "bob", alice, AccessLevel::ReadWrite)
        .await
        .unwrap();
    state
        .items
        .batch(&collection, bob, &[item_write("bobsitem00000000000000", b"x")])
        .await
        .unwrap();

    // remove: membership swapped for a tombstone
    state.members.remove(&collection, "bob", alice).await.unwrap();
    assert_eq!(pair_count(state).await, (0, 1));
    assert!(matches!(
        state.items.list(&collection, bob, None, 50).await,
        Err(Error::NotMember)
    ));

    // re-invite and accept: tombstone swapped back for a membership
    add_member(state, alice, "bob", bob, &collection, AccessLevel::ReadOnly).await;
    assert_eq!(pair_count(state).await, (1, 0));
}

#[tokio::test]
async fn owners_and_admin_gates() {
    let server = test_server().await;
    let state = &server.state;
    let (alice, _) = signup_user(state, "alice").await;
    let (bob, _) = signup_user(state, "bob").await;
    let collection = create_collection(state, alice).await;
    add_member(state, alice, "bob", bob, &collection, AccessLevel::ReadWrite).await;

    // non-admin cannot list or mutate members
    assert!(matches!(
        state.members.list(&collection, bob).await,
        Err(Error::AdminRequired(_))
    ));
    assert!(matches!(
        state
            .members
            .update_access(&collection, "alice", bob, AccessLevel::ReadOnly)
            .await,
        Err(Error::AdminRequired(_))
    ));

    // the owner cannot leave their own collection
    let err = state.members.leave(&collection, alice).await.unwrap_err();
    match err {
        Error::AdminRequired(detail) => assert_eq!(detail, "Owner cannot leave collection"),
        other => panic!("expected AdminRequired, got {other:?}"),
    }

    // a member leaving produces the same tombstone a removal does
    state.members.leave(&collection, bob).await.unwrap();
    let page = state.collections.list(bob, None, 50, None).await.unwrap();
    assert!(page.data.is_empty());
    assert_eq!(page.removed_memberships.unwrap()[0].uid, collection);

    let members = state.members.list(&collection, alice).await.unwrap();
    assert_eq!(members.data.len(), 1);
    assert_eq!(members.data[0].username, "alice");
    assert_eq!(members.data[0].access_level, AccessLevel::Admin);
}

#[tokio::test]
async fn invitation_validation_rules() {
    let server = test_server().await;
    let state = &server.state;
    let (alice, _) = signup_user(state, "alice").await;
    let (bob, _) = signup_user(state, "bob").await;
    let collection = create_collection(state, alice).await;

    let invite = |username: &str| InvitationCreateIn {
        uid: crypto::generate_stoken_uid(),
        version: 1,
        username: username.to_string(),
        collection: collection.clone(),
        access_level: AccessLevel::ReadOnly,
        signed_encryption_key: vec![7u8; 64],
    };

    assert!(matches!(
        state.invitations.create(alice, &invite("alice")).await,
        Err(Error::NoSelfInvite)
    ));
    assert!(matches!(
        state.invitations.create(alice, &invite("ghost")).await,
        Err(Error::UserNotFound)
    ));
    // non-admin cannot invite
    assert!(matches!(
        state.invitations.create(bob, &invite("bob")).await,
        Err(Error::NotMember)
    ));

    state.invitations.create(alice, &invite("bob")).await.unwrap();

    // the sender sees it outgoing, the invitee incoming
    let outgoing = state.invitations.list_outgoing(alice).await.unwrap();
    assert_eq!(outgoing.data.len(), 1);
    assert_eq!(outgoing.data[0].username.as_deref(), Some("bob"));
    assert_eq!(outgoing.data[0].collection.as_deref(), Some(collection.as_str()));

    let incoming = state.invitations.list_incoming(bob).await.unwrap();
    assert_eq!(incoming.data.len(), 1);
    assert_eq!(incoming.data[0].from_username.as_deref(), Some("alice"));

    // a second pending invitation for the same pair is a conflict
    assert!(matches!(
        state.invitations.create(alice, &invite("bob")).await,
        Err(Error::InvitationExists)
    ));

    // rejecting leaves bob a non-member and clears the invitation
    let uid = incoming.data[0].uid.clone();
    // only the invitee can reject
    assert!(matches!(
        state.invitations.reject(&uid, alice).await,
        Err(Error::NotMember)
    ));
    state.invitations.reject(&uid, bob).await.unwrap();
    assert!(state.invitations.list_incoming(bob).await.unwrap().data.is_empty());

    // invite again, accept, and now a fresh invite is already_member
    state.invitations.create(alice, &invite("bob")).await.unwrap();
    let uid = state.invitations.list_incoming(bob).await.unwrap().data[0]
        .uid
        .clone();
    state
        .invitations
        .accept(
            &uid,
            bob,
            &InvitationAcceptIn {
                encryption_key: vec![8u8; 32],
                collection_type: None,
            },
        )
        .await
        .unwrap();
    assert!(matches!(
        state.invitations.create(alice, &invite("bob")).await,
        Err(Error::AlreadyMember)
    ));

    // profile fetch for key wrapping
    let profile = state.invitations.fetch_user_profile("bob").await.unwrap();
    assert_eq!(profile.pubkey, vec![3u8; 32]);
    assert!(matches!(
        state.invitations.fetch_user_profile("ghost").await,
        Err(Error::UserNotFound)
    ));
}

#[tokio::test]
async fn collection_type_filter_narrows_list_multi() {
    let server = test_server().await;
    let state = &server.state;
    let (alice, _) = signup_user(state, "alice").await;

    let calendar_type = b"calendar-type-uid".to_vec();
    let tasks_type = b"tasks-type-uid".to_vec();

    let with_type = |type_uid: Vec<u8>| server::wire::CollectionCreateIn {
        collection_type: Some(type_uid),
        collection_key: vec![9u8; 32],
        item: item_write(&crypto::generate_stoken_uid(), b"meta"),
    };

    let calendar_req = with_type(calendar_type.clone());
    let calendar_uid = calendar_req.item.uid.clone();
    state.collections.create(alice, &calendar_req).await.unwrap();

    let tasks_req = with_type(tasks_type.clone());
    state.collections.create(alice, &tasks_req).await.unwrap();

    let page = state
        .collections
        .list(alice, None, 50, Some(std::slice::from_ref(&calendar_type)))
        .await
        .unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].item.uid, calendar_uid);

    let page = state
        .collections
        .list(alice, None, 50, Some(&[b"unknown-type".to_vec()]))
        .await
        .unwrap();
    assert!(page.data.is_empty());
    assert!(page.done);

    let both = vec![calendar_type, tasks_type];
    let page = state
        .collections
        .list(alice, None, 50, Some(&both))
        .await
        .unwrap();
    assert_eq!(page.data.len(), 2);
}

#[tokio::test]
async fn collection_access_is_gated_on_membership() {
    let server = test_server().await;
    let state = &server.state;
    let (alice, _) = signup_user(state, "alice").await;
    let (mallory, _) = signup_user(state, "mallory").await;
    let collection = create_collection(state, alice).await;

    assert!(matches!(
        state.collections.get(mallory, &collection).await,
        Err(Error::NotMember)
    ));
    assert!(matches!(
        state.items.list(&collection, mallory, None, 50).await,
        Err(Error::NotMember)
    ));
    assert!(matches!(
        state
            .chunks
            .upload(&collection, "chunkXYZ", mallory, b"data")
            .await,
        Err(Error::NotMember)
    ));
    assert!(matches!(
        state.collections.get(mallory, "nosuchcollection").await,
        Err(Error::NotMember)
    ));

    // duplicate collection uid is a conflict
    let duplicate = server::wire::CollectionCreateIn {
        collection_type: None,
        collection_key: vec![9u8; 32],
        item: item_write(&collection, b"meta"),
    };
    assert!(matches!(
        state.collections.create(mallory, &duplicate).await,
        Err(Error::UniqueUid)
    ));
}

#[tokio::test]
async fn tickets_broker_and_change_events_flow() {
    let server = test_server().await;
    let state = &server.state;
    let (alice, _) = signup_user(state, "alice").await;
    let collection = create_collection(state, alice).await;

    let mut conn = state.pool.acquire().await.unwrap();
    let collection_row = db::collection_by_uid(&mut conn, &collection)
        .await
        .unwrap()
        .unwrap();
    drop(conn);

    let mut sub = state
        .broker
        .subscribe(&server::broker::collection_channel(collection_row.id))
        .await
        .unwrap();

    state
        .items
        .batch(&collection, alice, &[item_write("noisyitem0000000000000", b"x")])
        .await
        .unwrap();

    let payload = tokio::time::timeout(std::time::Duration::from_secs(5), sub.recv())
        .await
        .expect("no change event published")
        .unwrap();
    let event: server::wire::ChangeEvent = rmp_serde::from_slice(&payload).unwrap();
    assert_eq!(event.collection, collection);
    assert!(!event.stoken.is_empty());

    // ticket round trip against the same state
    let ticket = state.tickets.create(alice, collection_row.id).await.unwrap();
    let consumed = state.tickets.consume(&ticket).await.unwrap();
    assert_eq!(consumed.user_id, alice);
    assert_eq!(consumed.collection_id, collection_row.id);
    assert!(state.tickets.consume(&ticket).await.is_none());
}
