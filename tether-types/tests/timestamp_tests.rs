use tether_types::Timestamp;

#[test]
fn now_is_after_epoch() {
    assert!(Timestamp::now().as_millis() > 0);
}

#[test]
fn tick_is_strictly_increasing() {
    let mut ts = Timestamp::now();
    for _ in 0..100 {
        let next = ts.tick();
        assert!(next > ts);
        ts = next;
    }
}

#[test]
fn tick_from_future_timestamp_increments() {
    let future = Timestamp::from_millis(Timestamp::now().as_millis() + 60_000);
    assert_eq!(future.tick().as_millis(), future.as_millis() + 1);
}

#[test]
fn rfc3339_roundtrip_keeps_millis() {
    let ts = Timestamp::from_millis(1_700_000_000_123);
    let s = ts.to_rfc3339();
    assert_eq!(s, "2023-11-14T22:13:20.123Z");
    assert_eq!(Timestamp::parse_rfc3339(&s).unwrap(), ts);
}

#[test]
fn parse_rfc3339_invalid() {
    assert!(Timestamp::parse_rfc3339("yesterday").is_err());
}

#[test]
fn ordering_follows_millis() {
    let a = Timestamp::from_millis(1);
    let b = Timestamp::from_millis(2);
    assert!(a < b);
    assert_eq!(a.max(b), b);
}
