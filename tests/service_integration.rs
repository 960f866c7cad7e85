/// The gateway facade driven with JSON, as the serve loop does.
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use shubot::config::Config;
use shubot::game::{GameService, GameStoreBuilder, Reply, Request, ScriptedResolver};
use tempfile::TempDir;

fn service(resolver: Arc<ScriptedResolver>) -> (TempDir, GameService) {
    let dir = TempDir::new().expect("tempdir");
    let store = GameStoreBuilder::new(dir.path()).open().expect("store");
    let config = Config {
        random_events: Vec::new(),
        ..Config::default()
    };
    (dir, GameService::new(Arc::new(store), Arc::new(config), resolver))
}

fn call(service: &GameService, request: Value) -> Value {
    let request: Request = serde_json::from_value(request).expect("request");
    let now = Utc.with_ymd_and_hms(2024, 10, 1, 9, 0, 0).unwrap();
    serde_json::to_value(service.handle_at(request, now)).expect("reply")
}

#[test]
fn robbery_round_trip_over_json() {
    let resolver = Arc::new(
        ScriptedResolver::new()
            .with_hits(&[false])
            .with_rolls(&[6, 2])
            .with_uniforms(&[0.2]),
    );
    let (_dir, service) = service(resolver);
    call(&service, json!({"op": "admin_adjust", "user_id": 2, "delta": 500}));

    let rob = call(&service, json!({"op": "rob", "robber": 1, "target": 2}));
    assert_eq!(rob["reply"], "rob");
    assert_eq!(rob["outcome"]["result"], "duel");
    assert_eq!(rob["outcome"]["offer"]["loser"], 2);
    let offer_id = rob["outcome"]["offer"]["id"].clone();

    let paid = call(
        &service,
        json!({"op": "rob_choice", "offer_id": offer_id, "user_id": 2, "choice": "pay"}),
    );
    assert_eq!(paid["outcome"]["result"], "paid");
    assert_eq!(paid["outcome"]["amount"], 100);

    let balance = call(&service, json!({"op": "balance", "user_id": 1}));
    assert_eq!(balance["points"], 100);

    let history = call(&service, json!({"op": "history", "user_id": 2, "limit": 5}));
    let entries = history["entries"].as_array().expect("entries");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["reason"], "robbery_transfer");
    assert_eq!(entries[0]["delta"], -100);
}

#[test]
fn lottery_and_breakthrough_replies_are_tagged() {
    let resolver = Arc::new(ScriptedResolver::new().with_hits(&[false, true]));
    let (_dir, service) = service(resolver);
    call(&service, json!({"op": "admin_adjust", "user_id": 1, "delta": 100}));

    let lottery = call(&service, json!({"op": "lottery", "user_id": 1, "cost": 3}));
    assert_eq!(lottery["reply"], "lottery");
    assert_eq!(lottery["outcome"]["result"], "played");
    assert_eq!(lottery["outcome"]["won"], false);
    assert_eq!(lottery["outcome"]["new_balance"], 97);

    let breakthrough = call(&service, json!({"op": "breakthrough", "user_id": 1}));
    assert_eq!(breakthrough["outcome"]["result"], "succeeded");
    assert_eq!(breakthrough["outcome"]["stage"], 1);

    let profile = call(&service, json!({"op": "profile", "user_id": 1}));
    assert_eq!(profile["profile"]["stage"], 1);
    assert_eq!(profile["profile"]["points"], 87);

    let unknown = call(&service, json!({"op": "lottery", "user_id": 1, "cost": 4}));
    assert_eq!(unknown["outcome"]["result"], "unknown_stake");
}

#[test]
fn leaderboard_and_gang_tick_over_json() {
    let resolver = Arc::new(ScriptedResolver::new().with_hits(&[false, false]));
    let (_dir, service) = service(resolver);
    for user in [1, 2] {
        call(
            &service,
            json!({"op": "group_message", "user_id": user, "group_id": -7, "text": "hi"}),
        );
    }
    call(&service, json!({"op": "admin_adjust", "user_id": 2, "delta": 40}));

    let board = call(&service, json!({"op": "leaderboard", "group_id": -7}));
    assert_eq!(board["entries"][0]["user_id"], 2);
    assert_eq!(board["entries"].as_array().unwrap().len(), 2);

    let tick = call(&service, json!({"op": "gang_tick", "date": "2024-10-01"}));
    assert_eq!(tick["reports"][0]["leader"]["user_id"], 2);
    assert_eq!(tick["reports"][0]["day"]["donation"], 100);

    let status = call(&service, json!({"op": "status"}));
    assert_eq!(status["accounts"], 2);
    assert_eq!(status["groups"], 1);
}

#[test]
fn checkin_reply_matches_variant() {
    let resolver = Arc::new(ScriptedResolver::new().with_rolls(&[4]));
    let (_dir, service) = service(resolver);
    let request = Request::Checkin { user_id: 11 };
    let reply = service.handle(request);
    assert!(matches!(reply, Reply::Checkin { .. }));
}
