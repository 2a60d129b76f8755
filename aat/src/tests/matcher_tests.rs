use std::sync::Arc;

use crate::config::MatchingConfig;
use crate::learning::{screenshot_hash, LearnedStore};
use crate::matchers::{HybridMatcher, LearnedMatcher, Matcher, OcrMatcher, OcrWord};
use crate::models::{LearnedElement, MatchMethod, TargetSpec};
use crate::tests::{init_tracing, CountingMatcher, StaticOcr};
use chrono::Utc;

fn word(text: &str, x: i32, width: u32, line: u32, confidence: f32) -> OcrWord {
    OcrWord {
        text: text.to_string(),
        x,
        y: 50,
        width,
        height: 20,
        confidence,
        block: 1,
        paragraph: 1,
        line,
    }
}

#[tokio::test]
async fn explicit_method_bypasses_chain() {
    init_tracing();
    let template = Arc::new(CountingMatcher::hit(MatchMethod::Template, 10, 20));
    let ocr = Arc::new(CountingMatcher::hit(MatchMethod::Ocr, 30, 40));
    let hybrid = HybridMatcher::new(vec![MatchMethod::Template, MatchMethod::Ocr])
        .with_matcher(template.clone())
        .with_matcher(ocr.clone());

    let target = TargetSpec::from_text("Login").with_match_method(MatchMethod::Ocr);
    let result = hybrid.find(&target, b"shot").await.unwrap();
    assert_eq!(result.method, MatchMethod::Ocr);
    assert_eq!((result.x, result.y), (30, 40));
    assert_eq!(template.call_count(), 0);
    assert_eq!(ocr.call_count(), 1);
}

#[tokio::test]
async fn explicit_unregistered_method_returns_none_without_fallback() {
    let template = Arc::new(CountingMatcher::hit(MatchMethod::Template, 10, 20));
    let hybrid =
        HybridMatcher::new(vec![MatchMethod::Template]).with_matcher(template.clone());

    let target = TargetSpec::from_text("Login").with_match_method(MatchMethod::Feature);
    assert!(hybrid.find(&target, b"shot").await.is_none());
    assert_eq!(template.call_count(), 0);
}

#[tokio::test]
async fn chain_stops_at_first_hit() {
    let learned = Arc::new(CountingMatcher::hit(MatchMethod::Learned, 5, 5));
    let template = Arc::new(CountingMatcher::hit(MatchMethod::Template, 10, 20));
    let hybrid = HybridMatcher::new(vec![MatchMethod::Learned, MatchMethod::Template])
        .with_matcher(learned.clone())
        .with_matcher(template.clone());

    let result = hybrid
        .find(&TargetSpec::from_text("Login"), b"shot")
        .await
        .unwrap();
    assert_eq!(result.method, MatchMethod::Learned);
    assert_eq!(learned.call_count(), 1);
    assert_eq!(template.call_count(), 0);
}

#[tokio::test]
async fn chain_falls_through_misses_in_order() {
    let learned = Arc::new(CountingMatcher::miss(MatchMethod::Learned));
    let template = Arc::new(CountingMatcher::hit(MatchMethod::Template, 10, 20));
    let hybrid = HybridMatcher::new(vec![MatchMethod::Learned, MatchMethod::Template])
        .with_matcher(learned.clone())
        .with_matcher(template.clone());

    let result = hybrid
        .find(&TargetSpec::from_text("Login"), b"shot")
        .await
        .unwrap();
    assert_eq!(result.method, MatchMethod::Template);
    assert_eq!(learned.call_count(), 1);
    assert_eq!(template.call_count(), 1);
}

#[tokio::test]
async fn refusing_matcher_is_never_called() {
    let template = Arc::new(CountingMatcher::refusing(MatchMethod::Template));
    let ocr = Arc::new(CountingMatcher::hit(MatchMethod::Ocr, 1, 2));
    let hybrid = HybridMatcher::new(vec![MatchMethod::Template, MatchMethod::Ocr])
        .with_matcher(template.clone())
        .with_matcher(ocr.clone());

    assert!(hybrid.find(&TargetSpec::from_text("x"), b"shot").await.is_some());
    assert_eq!(template.call_count(), 0);
}

#[tokio::test]
async fn ocr_retried_as_last_resort_for_image_and_text_targets() {
    let template = Arc::new(CountingMatcher::miss(MatchMethod::Template));
    let ocr = Arc::new(CountingMatcher::miss(MatchMethod::Ocr));
    let hybrid = HybridMatcher::new(vec![MatchMethod::Template, MatchMethod::Ocr])
        .with_matcher(template.clone())
        .with_matcher(ocr.clone());

    let target =
        TargetSpec::new(Some("login.png".into()), Some("Login".into()), None).unwrap();
    assert!(hybrid.find(&target, b"shot").await.is_none());
    // Once in the chain, once as last resort.
    assert_eq!(ocr.call_count(), 2);

    // Text-only targets get no retry.
    assert!(hybrid
        .find(&TargetSpec::from_text("Login"), b"shot")
        .await
        .is_none());
    assert_eq!(ocr.call_count(), 3);
}

#[tokio::test]
async fn ocr_finds_single_token_substring() {
    let provider = Arc::new(StaticOcr {
        words: vec![word("Logout", 100, 60, 1, 0.92)],
    });
    let matcher = OcrMatcher::new(provider, MatchingConfig::default());

    let result = matcher
        .find(&TargetSpec::from_text("logout"), b"shot")
        .await
        .unwrap();
    assert_eq!((result.x, result.y), (130, 60));
    assert!(result.confidence > 0.9);
}

#[tokio::test]
async fn ocr_finds_phrase_via_line_grouping() {
    // "Sign" and "out" are separate tokens on one line; the phrase can only
    // be found by line grouping.
    let provider = Arc::new(StaticOcr {
        words: vec![
            word("Sign", 100, 40, 1, 0.9),
            word("out", 145, 30, 1, 0.9),
            word("Settings", 300, 80, 2, 0.9),
        ],
    });
    let matcher = OcrMatcher::new(provider, MatchingConfig::default());

    let result = matcher
        .find(&TargetSpec::from_text("sign out"), b"shot")
        .await
        .unwrap();
    // Union of both word boxes: x 100..175.
    assert_eq!(result.width, 75);
    assert_eq!(result.x, 100 + 75 / 2);
    assert!((result.confidence - 0.9).abs() < 1e-5);
}

#[tokio::test]
async fn ocr_misses_phrase_split_across_lines() {
    let provider = Arc::new(StaticOcr {
        words: vec![word("Sign", 100, 40, 1, 0.9), word("out", 145, 30, 2, 0.9)],
    });
    let matcher = OcrMatcher::new(provider, MatchingConfig::default());
    assert!(matcher
        .find(&TargetSpec::from_text("sign out"), b"shot")
        .await
        .is_none());
}

#[tokio::test]
async fn ocr_weak_token_falls_through_to_line_grouping() {
    // A garbled token elsewhere on screen contains the whole phrase but
    // with low confidence; the clean two-word line must still win.
    let provider = Arc::new(StaticOcr {
        words: vec![
            word("log in", 400, 50, 3, 0.3),
            word("Log", 100, 40, 1, 0.95),
            word("in", 145, 20, 1, 0.95),
        ],
    });
    let matcher = OcrMatcher::new(provider, MatchingConfig::default());

    let result = matcher
        .find(&TargetSpec::from_text("log in"), b"shot")
        .await
        .unwrap();
    // Union of the line words: x 100..165.
    assert_eq!(result.x, 100 + 65 / 2);
    assert!((result.confidence - 0.95).abs() < 1e-5);
}

#[tokio::test]
async fn ocr_prefers_highest_confidence_token() {
    let provider = Arc::new(StaticOcr {
        words: vec![
            word("Logout", 100, 60, 1, 0.88),
            word("Logout", 400, 60, 2, 0.97),
        ],
    });
    let matcher = OcrMatcher::new(provider, MatchingConfig::default());

    let result = matcher
        .find(&TargetSpec::from_text("logout"), b"shot")
        .await
        .unwrap();
    assert_eq!((result.x, result.y), (430, 60));
    assert!((result.confidence - 0.97).abs() < 1e-5);
}

#[tokio::test]
async fn ocr_rejects_low_confidence() {
    let provider = Arc::new(StaticOcr {
        words: vec![word("Logout", 100, 60, 1, 0.4)],
    });
    let matcher = OcrMatcher::new(provider, MatchingConfig::default());
    assert!(matcher
        .find(&TargetSpec::from_text("logout"), b"shot")
        .await
        .is_none());
}

#[tokio::test]
async fn learned_matcher_replays_exact_screenshot_state() {
    let store = Arc::new(LearnedStore::open_in_memory().unwrap());
    let screenshot = b"png-bytes-of-the-login-page".to_vec();
    let now = Utc::now();
    store
        .save(&LearnedElement {
            id: None,
            scenario_id: "SC-001".to_string(),
            step_number: 2,
            target_name: "Login".to_string(),
            screenshot_hash: screenshot_hash(&screenshot),
            correct_x: 640,
            correct_y: 360,
            cropped_image_path: String::new(),
            confidence: 0.99,
            use_count: 0,
            created_at: now,
            updated_at: now,
        })
        .unwrap();

    let matcher = LearnedMatcher::new(store.clone());
    let result = matcher
        .find(&TargetSpec::from_text("Login"), &screenshot)
        .await
        .unwrap();
    assert_eq!((result.x, result.y), (640, 360));
    assert_eq!(result.method, MatchMethod::Learned);

    // The hit bumps use_count.
    let stored = store.list_all().unwrap();
    assert_eq!(stored[0].use_count, 1);

    // Any pixel change anywhere invalidates the hash.
    assert!(matcher
        .find(&TargetSpec::from_text("Login"), b"different-bytes")
        .await
        .is_none());

    // Same state, unknown target name.
    assert!(matcher
        .find(&TargetSpec::from_text("Logout"), &screenshot)
        .await
        .is_none());
}
