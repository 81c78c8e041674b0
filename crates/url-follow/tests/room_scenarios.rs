use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use room_store::{
    Entry, KeyPath, MemoryRoom, MemoryRoomServer, ParticipantIdentity, RoomStore, SetOptions,
    StoreResult, Subscription, SubscriptionId, WriteContext,
};
use serde_json::{json, Value};
use tokio::sync::Barrier;
use url_follow::{
    Document, DocumentEvent, FollowConfig, FollowerPhase, Namespace, RecordingDocument,
    UrlFollower,
};

const PAGE_A: &str = "https://app.test/a";
const PAGE_B: &str = "https://app.test/b";
const PAGE_C: &str = "https://app.test/c";

struct Participant {
    room: MemoryRoom,
    document: Arc<RecordingDocument>,
    follower: UrlFollower,
}

fn namespace() -> Namespace {
    FollowConfig::default().namespace().unwrap()
}

fn join(server: &MemoryRoomServer, id: &str, location: &str) -> Participant {
    let room = server.join(ParticipantIdentity::new(id, "Guest"));
    let document = Arc::new(RecordingDocument::new(location));
    let follower = UrlFollower::new(
        Arc::new(room.clone()),
        document.clone(),
        &FollowConfig::default(),
    )
    .unwrap();
    Participant {
        room,
        document,
        follower,
    }
}

/// Fresh coordinator on the participant's current page, as after a page load.
fn reload(participant: Participant) -> Participant {
    let follower = UrlFollower::new(
        Arc::new(participant.room.clone()),
        participant.document.clone(),
        &FollowConfig::default(),
    )
    .unwrap();
    Participant {
        follower,
        ..participant
    }
}

async fn wait_for(check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Holds every namespace read until all racing participants have made theirs.
struct GatedRoom {
    inner: MemoryRoom,
    gate: Arc<Barrier>,
    root: KeyPath,
}

#[async_trait]
impl RoomStore for GatedRoom {
    async fn identity(&self) -> StoreResult<ParticipantIdentity> {
        self.inner.identity().await
    }

    async fn get(&self, key: &KeyPath) -> StoreResult<Entry> {
        let entry = self.inner.get(key).await?;
        if key == &self.root {
            self.gate.wait().await;
        }
        Ok(entry)
    }

    async fn set(
        &self,
        key: &KeyPath,
        value: Value,
        options: SetOptions,
    ) -> StoreResult<WriteContext> {
        self.inner.set(key, value, options).await
    }

    async fn subscribe(&self, key: &KeyPath) -> StoreResult<Subscription> {
        self.inner.subscribe(key).await
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> StoreResult<()> {
        self.inner.unsubscribe(id).await
    }
}

#[tokio::test]
async fn first_participant_in_a_fresh_room_leads_version_one() {
    let server = MemoryRoomServer::new();
    let ns = namespace();
    let u1 = join(&server, "u1", PAGE_A);

    u1.follower.initialize().await.expect("initialize");

    assert_eq!(u1.follower.room_version(), Ok(1));
    assert_eq!(server.value(ns.version()), Some(json!(1)));
    assert_eq!(server.value(&ns.url_for(1).unwrap()), Some(json!(PAGE_A)));
    assert_eq!(
        server.value(&ns.participant_version("u1").unwrap()),
        Some(json!(1))
    );
}

#[tokio::test]
async fn simultaneous_leaders_resolve_to_exactly_one_winner() {
    let server = MemoryRoomServer::new();
    let ns = namespace();
    let seed = server.join(ParticipantIdentity::new("u0", "Seed"));
    seed.set(&ns.url_for(1).unwrap(), json!(PAGE_A), SetOptions::default())
        .await
        .unwrap();
    seed.set(ns.version(), json!(1), SetOptions::default())
        .await
        .unwrap();
    for id in ["u1", "u2"] {
        server
            .join(ParticipantIdentity::new(id, "Guest"))
            .set(&ns.participant_version(id).unwrap(), json!(1), SetOptions::default())
            .await
            .unwrap();
    }

    let gate = Arc::new(Barrier::new(2));
    let racers: Vec<(String, Arc<RecordingDocument>, UrlFollower)> = [
        ("u1", PAGE_B),
        ("u2", PAGE_C),
    ]
    .into_iter()
    .map(|(id, page)| {
        let room = GatedRoom {
            inner: server.join(ParticipantIdentity::new(id, "Guest")),
            gate: gate.clone(),
            root: ns.root().clone(),
        };
        let document = Arc::new(RecordingDocument::new(page));
        let follower =
            UrlFollower::new(Arc::new(room), document.clone(), &FollowConfig::default()).unwrap();
        (id.to_string(), document, follower)
    })
    .collect();

    let (first, second) = tokio::join!(racers[0].2.initialize(), racers[1].2.initialize());
    first.expect("first racer completes");
    second.expect("second racer completes");

    let (winners, losers): (Vec<_>, Vec<_>) = racers
        .iter()
        .partition(|(_, _, follower)| follower.phase() == FollowerPhase::Subscribed);
    assert_eq!(winners.len(), 1);
    assert_eq!(losers.len(), 1);
    let (winner_id, winner_doc, _) = winners[0];
    let (loser_id, loser_doc, loser) = losers[0];

    assert_eq!(loser.phase(), FollowerPhase::CatchingUp);
    assert_eq!(loser_doc.navigations(), vec![PAGE_A]);
    assert!(winner_doc.events().is_empty());

    assert_eq!(server.value(ns.version()), Some(json!(2)));
    assert_eq!(server.last_writer(ns.version()).as_ref(), Some(winner_id));
    assert_eq!(
        server.value(&ns.url_for(2).unwrap()),
        Some(json!(winner_doc.location()))
    );
    assert_eq!(
        server.value(&ns.participant_version(winner_id).unwrap()),
        Some(json!(2))
    );
    assert_eq!(
        server.value(&ns.participant_version(loser_id).unwrap()),
        Some(json!(1))
    );
}

#[tokio::test]
async fn participants_racing_into_an_empty_room_settle_on_one_leader() {
    let server = MemoryRoomServer::new();
    let ns = namespace();
    let pages = [PAGE_A, PAGE_B, PAGE_C];

    let gate = Arc::new(Barrier::new(pages.len()));
    let racers: Vec<(String, Arc<RecordingDocument>, UrlFollower)> = pages
        .iter()
        .enumerate()
        .map(|(index, page)| {
            let id = format!("u{}", index + 1);
            let room = GatedRoom {
                inner: server.join(ParticipantIdentity::new(id.as_str(), "Guest")),
                gate: gate.clone(),
                root: ns.root().clone(),
            };
            let document = Arc::new(RecordingDocument::new(*page));
            let follower =
                UrlFollower::new(Arc::new(room), document.clone(), &FollowConfig::default())
                    .unwrap();
            (id, document, follower)
        })
        .collect();

    let (first, second, third) = tokio::join!(
        racers[0].2.initialize(),
        racers[1].2.initialize(),
        racers[2].2.initialize()
    );
    for result in [first, second, third] {
        result.expect("every racer completes without error");
    }

    let winners: Vec<_> = racers
        .iter()
        .filter(|(_, _, follower)| follower.phase() == FollowerPhase::Subscribed)
        .collect();
    assert_eq!(winners.len(), 1);
    let (winner_id, winner_doc, winner) = winners[0];
    assert_eq!(winner.room_version(), Ok(1));
    assert!(winner_doc.events().is_empty());
    assert_eq!(server.value(ns.version()), Some(json!(1)));
    assert_eq!(server.last_writer(ns.version()).as_ref(), Some(winner_id));
    assert_eq!(
        server.value(&ns.url_for(1).unwrap()),
        Some(json!(winner_doc.location()))
    );

    for (id, document, follower) in racers.iter().filter(|(id, _, _)| id != winner_id) {
        assert_eq!(follower.phase(), FollowerPhase::CatchingUp);
        // The seeded version-0 page is the loser's own, so it loads it again.
        assert_eq!(document.navigations(), vec![document.location()]);
        assert_eq!(server.value(&ns.participant_version(id).unwrap()), None);
    }
}

#[tokio::test]
async fn followers_are_carried_along_when_the_leader_moves() {
    let server = MemoryRoomServer::new();
    let ns = namespace();

    let u1 = join(&server, "u1", PAGE_A);
    u1.follower.initialize().await.unwrap();
    let u2 = join(&server, "u2", PAGE_A);
    u2.follower.initialize().await.unwrap();
    assert_eq!(u2.follower.phase(), FollowerPhase::Subscribed);
    assert!(u2.document.events().is_empty());

    // u1 browses to B: its old page goes away and the new one bootstraps.
    u1.follower.destroy().await.unwrap();
    u1.document.set_location(PAGE_B);
    let u1 = reload(u1);
    u1.follower.initialize().await.unwrap();
    assert_eq!(u1.follower.room_version(), Ok(2));

    let doc = u2.document.clone();
    wait_for(move || !doc.events().is_empty()).await;
    assert_eq!(
        u2.document.events(),
        vec![DocumentEvent::Navigated(PAGE_B.into())]
    );

    // Publishing the same page again makes followers reload rather than navigate.
    u1.follower.destroy().await.unwrap();
    let u1 = reload(u1);
    u1.follower.initialize().await.unwrap();
    assert_eq!(server.value(ns.version()), Some(json!(3)));

    let doc = u2.document.clone();
    wait_for(move || doc.reloads() == 1).await;
    assert_eq!(u2.document.navigations(), vec![PAGE_B]);
    assert!(u1.document.events().is_empty());
}

#[tokio::test]
async fn late_joiner_catches_up_then_subscribes_after_reload() {
    let server = MemoryRoomServer::new();
    let ns = namespace();

    let u1 = join(&server, "u1", PAGE_A);
    u1.follower.initialize().await.unwrap();

    let u2 = join(&server, "u2", PAGE_C);
    u2.follower.initialize().await.unwrap();
    assert_eq!(u2.follower.phase(), FollowerPhase::CatchingUp);
    assert_eq!(u2.document.navigations(), vec![PAGE_A]);
    assert_eq!(server.subscriber_count(ns.version()), 1);

    let u2 = reload(u2);
    u2.follower.initialize().await.unwrap();
    assert_eq!(u2.follower.phase(), FollowerPhase::Subscribed);
    assert_eq!(u2.follower.room_version(), Ok(1));
    assert_eq!(
        server.value(&ns.participant_version("u2").unwrap()),
        Some(json!(1))
    );
    assert_eq!(server.subscriber_count(ns.version()), 2);
}
