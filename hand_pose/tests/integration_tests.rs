use hand_pose::{
    classify,
    landmarks::{THUMB_IP, THUMB_TIP},
    protocol::GestureMsg,
    Gesture, GestureLabel, Landmark, LandmarkSet, NUM_LANDMARKS,
};

/// Upright hand with every fingertip above its knuckle.
fn open_hand() -> Vec<Landmark> {
    let mut points = vec![Landmark::new(0.5, 0.8); NUM_LANDMARKS];
    for finger in 0..4 {
        let mcp = 5 + 4 * finger;
        let x = 0.4 + 0.05 * finger as f32;
        points[mcp] = Landmark::new(x, 0.6);
        points[mcp + 1] = Landmark::new(x, 0.5);
        points[mcp + 2] = Landmark::new(x, 0.4);
        points[mcp + 3] = Landmark::new(x, 0.3);
    }
    points[THUMB_IP] = Landmark::new(0.35, 0.6);
    points[THUMB_TIP] = Landmark::new(0.3, 0.55);

    points
}

#[test]
fn test_detector_output_to_payload() -> Result<(), serde_json::Error> {
    let hand = LandmarkSet::from_slice(&open_hand()).expect("21 landmarks");
    assert_eq!(classify(&hand), Gesture::OpenHand);

    let label = GestureLabel::from_hands([&hand]);
    let msg = GestureMsg::from(label);
    assert_eq!(serde_json::to_string(&msg)?, r#"{"gesture":"Open Hand"}"#);

    Ok(())
}

#[test]
fn test_incomplete_detections_are_rejected() {
    let points = open_hand();
    assert!(LandmarkSet::from_slice(&points[..20]).is_none());
    assert!(LandmarkSet::from_slice(&[points.clone(), points].concat()).is_none());
}

#[test]
fn test_no_hands_payload() {
    let msg = GestureMsg::from(GestureLabel::from_hands(std::iter::empty()));
    assert_eq!(msg.gesture, "No hands detected");
}
