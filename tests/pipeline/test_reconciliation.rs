// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Reconciliation tests through the public API
//!
//! Replies are the kind of thing the verifier actually sends back: bare
//! confirmations, fenced JSON, prose around JSON, and outright garbage.

use microbe_detect_node::vision::{
    reconcile, verification::parse_corrections, Detection, VerificationOutcome, VerificationStatus,
};

fn detector_output() -> Vec<Detection> {
    vec![
        Detection::new(10, 10, 50, 50, "amoeba"),
        Detection::new(70, 15, 95, 40, "volvox"),
    ]
}

#[test]
fn test_confirmations() {
    for reply in ["OK", "ok", "OK.", " OK \n", "**OK**"] {
        let outcome = reconcile(reply, &detector_output());
        assert_eq!(outcome.status(), VerificationStatus::Confirmed, "{:?}", reply);
        assert_eq!(outcome.detections(), detector_output().as_slice());
    }
}

#[test]
fn test_prose_wrapped_correction() {
    let reply = "Here is the corrected list:\n[{\"box\": [12, 11, 49, 52], \"label\": \"amoeba\"}]\nLet me know if you need more.";
    let outcome = reconcile(reply, &detector_output());
    assert_eq!(
        outcome,
        VerificationOutcome::Corrected(vec![Detection::new(12, 11, 49, 52, "amoeba")])
    );
}

#[test]
fn test_correction_replaces_rather_than_merges() {
    let reply = r#"[{"box": [1, 1, 5, 5], "label": "euglena"}]"#;
    let outcome = reconcile(reply, &detector_output());

    let labels: Vec<&str> = outcome.detections().iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, vec!["euglena"]);
}

#[test]
fn test_garbage_falls_back_to_detector_output() {
    let replies = [
        "",
        "I cannot determine this.",
        "[not json]",
        r#"{"box": [1, 2, 3, 4], "label": "x"}"#,
        r#"[{"box": [1, 2, 3, 4], "label": ["x"]}]"#,
        "The image shows ] and then [",
    ];
    for reply in replies {
        let outcome = reconcile(reply, &detector_output());
        assert_eq!(
            outcome,
            VerificationOutcome::Confirmed(detector_output()),
            "{:?}",
            reply
        );
    }
}

#[test]
fn test_count_always_matches_final_list() {
    let replies = [
        "OK",
        "[]",
        r#"[{"box":[1,2,3,4],"label":"a"},{"box":[5,6,7,8],"label":"b"},{"box":[9,9,9,9],"label":"c"}]"#,
        r#"[{"box":[1,2,3,4]},{"label":"orphan"}]"#,
        "nonsense",
    ];
    for reply in replies {
        let outcome = reconcile(reply, &detector_output());
        let count = outcome.detections().len();
        assert_eq!(outcome.into_detections().len(), count);
    }
}

#[test]
fn test_parse_corrections_distinguishes_confirmation() {
    assert_eq!(parse_corrections("OK").unwrap(), None);
    assert_eq!(parse_corrections("[]").unwrap(), Some(vec![]));
    assert!(parse_corrections("no idea").is_err());
}

#[test]
fn test_corrected_boxes_are_normalised() {
    let outcome = reconcile(r#"[{"box": [50, 60, 10, 20], "label": "x"}]"#, &[]);
    let det = &outcome.detections()[0];
    assert_eq!((det.x1, det.y1, det.x2, det.y2), (10, 20, 50, 60));
}
