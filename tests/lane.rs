use stem_splitter_service::{Lane, LanePolicy, StemError, UnknownLanePolicy};

#[test]
fn marker_anywhere_selects_reduction() {
    let policy = LanePolicy::default();
    assert_eq!(policy.classify("acca-v1").unwrap(), Lane::Reduction);
    assert_eq!(policy.classify("lane-acca").unwrap(), Lane::Reduction);
    // case-sensitive, like the marker it replaces
    assert_eq!(policy.classify("ACCA").unwrap(), Lane::Raw);
}

#[test]
fn unknown_lane_follows_policy() {
    let mut policy = LanePolicy::default();
    assert_eq!(policy.classify("karaoke").unwrap(), Lane::Raw);

    policy.unknown = UnknownLanePolicy::Reject;
    match policy.classify("karaoke") {
        Err(StemError::UnknownLane(l)) => assert_eq!(l, "karaoke"),
        other => panic!("expected UnknownLane, got {other:?}"),
    }
    assert_eq!(policy.classify("default").unwrap(), Lane::Raw);
    assert_eq!(policy.classify("acca-v2").unwrap(), Lane::Reduction);
}

#[test]
fn empty_raw_list_accepts_everything() {
    let policy = LanePolicy {
        raw_lanes: vec![],
        unknown: UnknownLanePolicy::Reject,
        ..LanePolicy::default()
    };
    assert_eq!(policy.classify("anything").unwrap(), Lane::Raw);
    assert_eq!(policy.classify("").unwrap(), Lane::Raw);
}

#[test]
fn policy_deserializes_with_defaults() {
    let policy: LanePolicy = serde_json::from_str(r#"{"unknown": "reject"}"#).unwrap();
    assert_eq!(policy.reduction_marker, "acca");
    assert_eq!(policy.raw_lanes, vec!["default".to_string()]);
    assert_eq!(policy.unknown, UnknownLanePolicy::Reject);
}
