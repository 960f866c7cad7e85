/// Two-phase robbery: eligibility, admission, duel and the loser's choice.
mod common;

use chrono::{Duration, TimeZone, Utc};
use shubot::config::{CultivationConfig, RobConfig};
use shubot::game::{
    LoserChoice, ResolveOutcome, RobOutcome, RobberyEngine, ScriptedResolver,
};

use common::{climb, fresh_store, funded};

fn at(secs: i64) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
}

#[test]
fn stage_gap_decides_eligibility() {
    let (_dir, store) = fresh_store();
    let cultivation = CultivationConfig::default();
    climb(&store, 1, 2, &cultivation);
    climb(&store, 2, 8, &cultivation);
    climb(&store, 3, 5, &cultivation);
    let engine = RobberyEngine::new();
    let config = RobConfig::default();

    let outcome = engine
        .attempt(&store, &config, &ScriptedResolver::new(), 1, 2, at(0))
        .unwrap();
    assert_eq!(
        outcome,
        RobOutcome::TooStrong {
            robber_major: 0,
            target_major: 2
        }
    );

    // the target escapes, but the attempt was admitted
    let resolver = ScriptedResolver::new().with_hits(&[true]);
    let outcome = engine.attempt(&store, &config, &resolver, 1, 3, at(0)).unwrap();
    assert_eq!(outcome, RobOutcome::Escaped);
}

#[test]
fn rejected_pairs_consume_no_budget() {
    let (_dir, store) = fresh_store();
    let cultivation = CultivationConfig::default();
    climb(&store, 2, 8, &cultivation);
    let engine = RobberyEngine::new();
    let config = RobConfig {
        daily_limit: 1,
        ..RobConfig::default()
    };
    for _ in 0..3 {
        assert!(matches!(
            engine
                .attempt(&store, &config, &ScriptedResolver::new(), 1, 2, at(0))
                .unwrap(),
            RobOutcome::TooStrong { .. }
        ));
    }
    funded(&store, 4, 0);
    let resolver = ScriptedResolver::new().with_hits(&[true]);
    assert_eq!(
        engine.attempt(&store, &config, &resolver, 1, 4, at(0)).unwrap(),
        RobOutcome::Escaped
    );
}

#[test]
fn self_robbery_is_refused_first() {
    let (_dir, store) = fresh_store();
    let engine = RobberyEngine::new();
    assert_eq!(
        engine
            .attempt(&store, &RobConfig::default(), &ScriptedResolver::new(), 5, 5, at(0))
            .unwrap(),
        RobOutcome::SelfTarget
    );
    assert!(store.get_account(5).unwrap().is_none());
}

#[test]
fn cooldown_then_limit() {
    let (_dir, store) = fresh_store();
    let engine = RobberyEngine::new();
    let config = RobConfig {
        daily_limit: 2,
        cooldown: 60,
        ..RobConfig::default()
    };
    let resolver = ScriptedResolver::new().with_hits(&[true, true]);
    assert_eq!(
        engine.attempt(&store, &config, &resolver, 1, 2, at(0)).unwrap(),
        RobOutcome::Escaped
    );
    assert_eq!(
        engine.attempt(&store, &config, &resolver, 1, 2, at(30)).unwrap(),
        RobOutcome::Cooldown { remaining_secs: 30 }
    );
    assert_eq!(
        engine.attempt(&store, &config, &resolver, 1, 2, at(60)).unwrap(),
        RobOutcome::Escaped
    );
    assert_eq!(
        engine.attempt(&store, &config, &resolver, 1, 2, at(200)).unwrap(),
        RobOutcome::LimitReached { count: 2 }
    );
}

#[test]
fn loser_pays_a_share_of_their_balance() {
    let (_dir, store) = fresh_store();
    funded(&store, 1, 0);
    funded(&store, 2, 1_000);
    let engine = RobberyEngine::new();
    let config = RobConfig::default();
    // no escape, robber rolls 6 against 1
    let resolver = ScriptedResolver::new()
        .with_hits(&[false])
        .with_rolls(&[6, 1])
        .with_uniforms(&[0.25]);
    let RobOutcome::Duel { offer } = engine.attempt(&store, &config, &resolver, 1, 2, at(0)).unwrap()
    else {
        panic!("expected a duel");
    };
    assert_eq!((offer.winner, offer.loser), (1, 2));
    assert_eq!(engine.pending(), 1);

    // only the loser may answer
    assert_eq!(
        engine
            .resolve(&store, &config, &resolver, offer.id, 1, LoserChoice::Pay, at(5))
            .unwrap(),
        ResolveOutcome::NotYourChoice { loser: 2 }
    );
    assert_eq!(
        engine
            .resolve(&store, &config, &resolver, offer.id, 2, LoserChoice::Pay, at(5))
            .unwrap(),
        ResolveOutcome::Paid {
            amount: 250,
            loser_points: 750,
            winner_points: 250
        }
    );
    // offers are single use
    assert_eq!(
        engine
            .resolve(&store, &config, &resolver, offer.id, 2, LoserChoice::Pay, at(6))
            .unwrap(),
        ResolveOutcome::OfferExpired
    );
    assert_eq!(store.get_balance(1).unwrap() + store.get_balance(2).unwrap(), 1_000);
}

#[test]
fn losing_a_fight_resets_cultivation() {
    let (_dir, store) = fresh_store();
    let cultivation = CultivationConfig::default();
    climb(&store, 2, 4, &cultivation);
    climb(&store, 1, 4, &cultivation);
    funded(&store, 2, 300);
    store.add_pills(2, 3).unwrap();
    let engine = RobberyEngine::new();
    let config = RobConfig::default();
    let resolver = ScriptedResolver::new()
        .with_hits(&[false])
        .with_rolls(&[5, 2, 6, 1]);
    let RobOutcome::Duel { offer } = engine.attempt(&store, &config, &resolver, 1, 2, at(0)).unwrap()
    else {
        panic!("expected a duel");
    };
    assert_eq!(offer.loser, 2);
    let outcome = engine
        .resolve(&store, &config, &resolver, offer.id, 2, LoserChoice::Fight, at(1))
        .unwrap();
    assert_eq!(
        outcome,
        ResolveOutcome::Annihilated {
            winner_roll: 6,
            loser_roll: 1,
            points_lost: 300
        }
    );
    let record = store.get_cultivation(2).unwrap().unwrap();
    assert_eq!(record.stage, 0);
    assert_eq!(record.next_cost, store.base_cost());
    assert_eq!(record.pills, 3);
    assert_eq!(store.get_balance(2).unwrap(), 0);
}

#[test]
fn surviving_a_fight_changes_nothing() {
    let (_dir, store) = fresh_store();
    funded(&store, 1, 10);
    funded(&store, 2, 20);
    let engine = RobberyEngine::new();
    let config = RobConfig::default();
    let resolver = ScriptedResolver::new()
        .with_hits(&[false])
        .with_rolls(&[1, 4, 3, 3]);
    let RobOutcome::Duel { offer } = engine.attempt(&store, &config, &resolver, 1, 2, at(0)).unwrap()
    else {
        panic!("expected a duel");
    };
    assert_eq!(offer.loser, 1);
    assert_eq!(
        engine
            .resolve(&store, &config, &resolver, offer.id, 1, LoserChoice::Fight, at(1))
            .unwrap(),
        ResolveOutcome::Survived {
            winner_roll: 3,
            loser_roll: 3
        }
    );
    assert_eq!(store.get_balance(1).unwrap(), 10);
    assert_eq!(store.get_balance(2).unwrap(), 20);
}

#[test]
fn late_answers_find_the_offer_expired() {
    let (_dir, store) = fresh_store();
    let engine = RobberyEngine::new();
    let config = RobConfig::default();
    let resolver = ScriptedResolver::new()
        .with_hits(&[false])
        .with_rolls(&[6, 1]);
    let RobOutcome::Duel { offer } = engine.attempt(&store, &config, &resolver, 1, 2, at(0)).unwrap()
    else {
        panic!("expected a duel");
    };
    let late = at(config.offer_timeout_secs);
    assert_eq!(
        engine
            .resolve(&store, &config, &resolver, offer.id, 2, LoserChoice::Pay, late)
            .unwrap(),
        ResolveOutcome::OfferExpired
    );
    assert_eq!(engine.pending(), 0);
}

#[test]
fn sweep_drops_stale_offers() {
    let (_dir, store) = fresh_store();
    let engine = RobberyEngine::new();
    let config = RobConfig::default();
    let resolver = ScriptedResolver::new()
        .with_hits(&[false])
        .with_rolls(&[6, 1]);
    assert!(matches!(
        engine.attempt(&store, &config, &resolver, 1, 2, at(0)).unwrap(),
        RobOutcome::Duel { .. }
    ));
    assert_eq!(engine.sweep_expired(at(10)), 0);
    assert_eq!(engine.sweep_expired(at(config.offer_timeout_secs + 1)), 1);
    assert_eq!(engine.pending(), 0);
}
