use dimmer_common::{
    apply_actions, ports::RecordingOutput, ports::StoredValue, DutyCurve, DutyEngine,
    EngineConfig, HardwareVariant, MemoryStore,
};
use proptest::prelude::*;

fn curve_strategy() -> impl Strategy<Value = (DutyCurve, u32)> {
    prop_oneof![
        (Just(DutyCurve::Quadratic), 1_u32..=65_535),
        (Just(DutyCurve::OffsetQuadratic), 1_032_u32..=65_535),
        (Just(DutyCurve::Linear), 1_u32..=65_535),
    ]
}

proptest! {
    #[test]
    fn curve_is_monotonic((curve, range) in curve_strategy(), a in 0_u16..=1000, b in 0_u16..=1000) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(curve.map(low, range) <= curve.map(high, range));
    }

    #[test]
    fn curve_hits_both_ends((curve, range) in curve_strategy()) {
        prop_assert_eq!(curve.map(0, range), 0);
        prop_assert_eq!(curve.map(1000, range), range);
    }

    #[test]
    fn offset_curve_never_rounds_first_step_away(range in 1_032_u32..=65_535) {
        prop_assert!(DutyCurve::OffsetQuadratic.map(1, range) > 0);
    }

    #[test]
    fn rapid_burst_is_written_once_with_last_value(
        start in any::<u32>(),
        // 39 gaps below 25 ms keep the whole burst inside one quiet period.
        steps in prop::collection::vec((0_i32..=1000, 1_u32..25), 1..40),
    ) {
        let mut engine = DutyEngine::restore(
            EngineConfig::for_variant(HardwareVariant::Rgbw),
            &MemoryStore::new(),
        );
        let mut store = MemoryStore::new();
        let mut output = RecordingOutput::default();

        let mut now = start;
        let mut first_change = None;
        for (value, gap) in &steps {
            let before = engine.get_duty(3);
            let actions = engine.set_value(3, *value, now);
            apply_actions(&actions, &mut output, &mut store);
            if engine.get_duty(3) != before && first_change.is_none() {
                first_change = Some(now);
            }
            let actions = engine.tick(now);
            apply_actions(&actions, &mut output, &mut store);
            now = now.wrapping_add(*gap);
        }

        for _ in 0..30 {
            now = now.wrapping_add(100);
            let actions = engine.tick(now);
            apply_actions(&actions, &mut output, &mut store);
        }

        match first_change {
            None => prop_assert_eq!(store.write_count(), 0),
            Some(_) => {
                prop_assert_eq!(store.write_count(), 1);
                prop_assert_eq!(
                    store.get("slider4"),
                    engine.get_value(3).map(|value| StoredValue::Int(i32::from(value)))
                );
            }
        }
        prop_assert!(!engine.has_pending_writes());
    }
}
