//! Property tests: parser round-trip laws and the metric interface laws.

use patchbay::config::parse::{
    parse_bandwidth, parse_real, parse_real2, parse_seconds, parse_u32, parse_u32_saturating,
    unparse_bandwidth, unparse_real, unparse_real2, unparse_seconds, NumStatus,
};
use patchbay::srp::metric::{
    BottleneckMetric, E2eLossMetric, EtxMetric, HopCountMetric, LinkMetric, MetricValue,
};
use patchbay::Timestamp;
use proptest::prelude::*;

proptest! {
    #[test]
    fn real_round_trips(value in -1_000_000_000i64..1_000_000_000, digits in 0u32..7) {
        let text = unparse_real(value, digits);
        prop_assert_eq!(parse_real(&text, digits), Ok(value));
    }

    #[test]
    fn real2_round_trips(value in 0u64..1_000_000_000, bits in 0u32..17) {
        let text = unparse_real2(value, bits);
        prop_assert_eq!(parse_real2(&text, bits), Ok(value));
    }

    #[test]
    fn seconds_round_trip(sec in 0i64..100_000, msec in 0u32..1000) {
        let t = Timestamp::new(sec, msec * 1_000_000);
        prop_assert_eq!(parse_seconds(&unparse_seconds(t)), Ok(t));
    }

    #[test]
    fn bandwidth_round_trips(bps in 0u64..10_000_000_000) {
        prop_assert_eq!(parse_bandwidth(&unparse_bandwidth(bps)), Ok(bps));
    }

    #[test]
    fn integer_saturation_matches_strict_parse(value in any::<u64>()) {
        let text = value.to_string();
        match parse_u32(&text) {
            Ok(v) => prop_assert_eq!(parse_u32_saturating(&text), (v, NumStatus::Ok)),
            Err(NumStatus::Range) => {
                prop_assert_eq!(parse_u32_saturating(&text), (u32::MAX, NumStatus::Range));
            }
            Err(other) => prop_assert!(false, "unexpected status {:?}", other),
        }
    }

    // Appending a non-negative link cost never improves a
    // smaller-is-better metric.
    #[test]
    fn hopcount_append_is_monotone(route in 0u32..10_000, link in 0u32..1_000) {
        let m = HopCountMetric;
        let r = MetricValue::new(route);
        let combined = m.append_metric(r, MetricValue::new(link));
        prop_assert!(!m.metric_val_lt(combined, r));
    }

    #[test]
    fn etx_append_is_monotone(route in 100u32..100_000, link in 100u32..10_000) {
        let m = EtxMetric::default();
        let r = MetricValue::new(route);
        let combined = m.append_metric(r, MetricValue::new(link));
        prop_assert!(!m.metric_val_lt(combined, r));
    }

    // Larger-is-better metrics shrink (or hold) under composition.
    #[test]
    fn e2e_loss_append_is_monotone(route in 1u32..=100, link in 1u32..=100) {
        let m = E2eLossMetric::default();
        let r = MetricValue::new(route);
        let combined = m.append_metric(r, MetricValue::new(link));
        prop_assert!(!m.metric_val_lt(combined, r));
    }

    #[test]
    fn bottleneck_append_is_monotone(route in 1u32..=100, link in 1u32..=100) {
        let m = BottleneckMetric::default();
        let r = MetricValue::new(route);
        let combined = m.append_metric(r, MetricValue::new(link));
        prop_assert!(!m.metric_val_lt(combined, r));
    }

    // Invalid values poison composition, in either position.
    #[test]
    fn invalid_propagates(v in 0u32..100_000) {
        let m = EtxMetric::default();
        let good = MetricValue::new(v);
        prop_assert!(!m.append_metric(good, MetricValue::invalid()).good());
        prop_assert!(!m.append_metric(MetricValue::invalid(), good).good());
        prop_assert!(!m.prepend_metric(MetricValue::invalid(), good).good());
    }

    // The one-byte wire scaling is the identity on its own image.
    #[test]
    fn scale_round_trips_on_wire_values(c in any::<u8>()) {
        let etx = EtxMetric::default();
        prop_assert_eq!(etx.scale_to_char(etx.unscale_from_char(c)), c);
        let hc = HopCountMetric;
        prop_assert_eq!(hc.scale_to_char(hc.unscale_from_char(c)), c);
    }
}
