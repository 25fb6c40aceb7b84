use super::*;

#[test]
fn rational_compares_by_value_not_by_pair() {
    assert_eq!(Rational::integer(1), Rational { p: 2, q: 2 });
    assert!(Rational { p: 1, q: 3 } < Rational { p: 1, q: 2 });
    assert!(Rational::new(1, 0).is_err());
    assert!(Rational::new(-1, 2).is_err());
}

#[test]
fn repeated_bisection_stays_strictly_inside() {
    let lower = Rational::integer(1);
    let mut upper = Rational::integer(2);
    for _ in 0..64 {
        let next = allocate_between(None, Some(lower), Some(upper)).expect("room between");
        assert!(next > lower, "{next:?} must be above {lower:?}");
        assert!(next < upper, "{next:?} must be below {upper:?}");
        upper = next;
    }
    assert_eq!(upper, Rational { p: 66, q: 65 });
}

#[test]
fn open_ended_intervals_extend_past_the_bound() {
    let above = allocate_between(None, Some(Rational { p: 5, q: 2 }), None).expect("above");
    assert_eq!(above, Rational { p: 7, q: 2 });

    let below = allocate_between(None, None, Some(Rational::integer(3))).expect("below");
    assert!(below < Rational::integer(3));
    assert_eq!(below.value(), 1.5);

    assert_eq!(
        allocate_between(None, None, Some(Rational::integer(0))),
        Err(PosError::NoRoomBelow)
    );
}

#[test]
fn own_key_is_kept_when_already_inside() {
    let own = Rational { p: 3, q: 2 };
    let kept = allocate_between(Some(own), Some(Rational::integer(1)), Some(Rational::integer(2)))
        .expect("inside");
    assert_eq!(kept.as_pair(), (3, 2));

    let moved = allocate_between(Some(own), Some(Rational::integer(2)), Some(Rational::integer(3)))
        .expect("outside");
    assert_eq!(moved.as_pair(), (5, 2));
}

#[test]
fn rejects_unbounded_and_inverted_intervals() {
    assert_eq!(allocate_between(None, None, None), Err(PosError::Unbounded));
    assert!(matches!(
        allocate_between(None, Some(Rational::integer(3)), Some(Rational::integer(2))),
        Err(PosError::EmptyInterval { .. })
    ));
    assert_eq!(optimistic_pos_between(None, None), Err(PosError::Unbounded));
}

#[test]
fn optimistic_position_is_the_midpoint() {
    assert_eq!(optimistic_pos_between(Some(2.0), Some(3.0)), Ok(2.5));
    assert_eq!(optimistic_pos_between(Some(4.0), None), Ok(5.0));
    assert_eq!(optimistic_pos_between(None, Some(4.0)), Ok(3.0));
}

#[test]
fn binary_search_reports_exact_hits() {
    let items = [1.0, 2.0, 4.0];
    assert_eq!(binary_search_pos(&items, 3.0), (2, None));
    assert_eq!(binary_search_pos(&items, 0.5), (0, None));
    assert_eq!(binary_search_pos(&items, 9.0), (3, None));
    let (index, hit) = binary_search_pos(&items, 2.0);
    assert_eq!(index, 1);
    assert_eq!(hit.copied(), Some(2.0));
    assert!(is_sorted_by_pos(&items));
    assert!(!is_sorted_by_pos(&[1.0, 1.0]));
}
