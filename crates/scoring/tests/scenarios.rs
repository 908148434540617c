use assertables::*;
use common::types::{AggregationMethod, CalculationParams, DataPoint, RegionId};
use proptest::prelude::*;
use scoring::region;
use scoring::{AggregationPolicy, DayBindings, RowBindings, RowOutcome, Sandbox, ScriptAssembler};

fn sandbox() -> Sandbox {
    Sandbox::new("np", 100_000).unwrap()
}

fn day(real: &[f64], fore: &[f64], cap: f64, threshold: f64) -> DayBindings {
    DayBindings::new(
        real.to_vec(),
        fore.to_vec(),
        fore.iter().map(|&f| vec![f]).collect(),
        cap,
        threshold,
    )
    .unwrap()
}

fn region_accuracy(region: RegionId, bindings: &DayBindings) -> f64 {
    let profile = region::profile(region);
    let script = ScriptAssembler::new("np", AggregationPolicy::default())
        .assemble(
            profile.default_row_formula,
            profile.default_aggregation,
            region,
            None,
        )
        .unwrap();
    sandbox().run_batch(&script, bindings).unwrap()
}

fn row_result(region: RegionId, row: &RowBindings<'_>) -> RowOutcome {
    sandbox().run_row(region::profile(region).default_row_formula, row)
}

#[test]
fn test_general_scenario() {
    let accuracy = region_accuracy(
        RegionId::General,
        &day(&[100.0, 100.0], &[90.0, 110.0], 200.0, 0.0),
    );
    assert_eq!(accuracy, 0.95);
}

#[test]
fn test_shared_general_regions_agree() {
    let data = day(&[100.0, 80.0, 60.0], &[90.0, 95.0, 40.0], 200.0, 0.0);
    let general = region_accuracy(RegionId::General, &data);
    assert_eq!(region_accuracy(RegionId::NorthChina, &data), general);
    assert_eq!(region_accuracy(RegionId::EastChina, &data), general);
}

#[test]
fn test_shanxi_weighted_scenario() {
    // results = [1000, 1000], total_weight = 20 → sqrt(100) / 200
    let accuracy = region_accuracy(
        RegionId::Shanxi,
        &day(&[100.0, 100.0], &[90.0, 110.0], 200.0, 0.0),
    );
    assert_eq!(accuracy, 0.95);
}

#[test]
fn test_northeast_dead_band_scenario() {
    let fore_list = [15.0];
    let row = RowBindings {
        real: 15.0,
        fore: 15.0,
        fore_list: &fore_list,
        cap: 200.0,
        threshold: 0.10,
    };
    assert_eq!(row_result(RegionId::Northeast, &row), RowOutcome::Value(0.0));
}

#[test]
fn test_dead_band_boundary() {
    // 境界 20 ちょうどは免除されない
    let fore_list = [10.0];
    let at_limit = RowBindings {
        real: 20.0,
        fore: 10.0,
        fore_list: &fore_list,
        cap: 200.0,
        threshold: 0.10,
    };
    assert_eq!(row_result(RegionId::Northeast, &at_limit), RowOutcome::Value(1.0));

    let below = RowBindings {
        real: 20.0 - 1e-9,
        ..at_limit
    };
    assert_eq!(row_result(RegionId::Northeast, &below), RowOutcome::Value(0.0));
}

#[test]
fn test_preview_isolates_one_failure() {
    let points: Vec<DataPoint> = (0..10)
        .map(|i| DataPoint::single(format!("t{}", i), i, 50.0 + i as f64, 50.0))
        .collect();
    let params = CalculationParams {
        cap: 100.0,
        threshold: 0.0,
        ignore_dead_band: false,
    };
    let rows = scoring::run_preview(&sandbox(), "result = 1 / (real - 53)", &points, &params, 10);

    let failures: Vec<usize> = rows
        .iter()
        .filter(|r| r.result.is_failed())
        .map(|r| r.index)
        .collect();
    assert_eq!(failures, vec![3]);
    assert_eq!(rows.iter().filter_map(|r| r.result.value()).count(), 9);
}

#[test]
fn test_empty_day_defaults() {
    let empty = DayBindings::new(vec![], vec![], vec![], 200.0, 0.0).unwrap();
    for (region, expected) in [
        (RegionId::General, 1.0),
        (RegionId::Shanxi, 1.0),
        (RegionId::Northeast, 1.0),
    ] {
        let accuracy = region_accuracy(region, &empty);
        assert!(accuracy.is_finite());
        assert_eq!(accuracy, expected, "{}", region);
    }

    let script = ScriptAssembler::new("np", AggregationPolicy::default())
        .assemble("result = 1", AggregationMethod::Sum, RegionId::General, None)
        .unwrap();
    assert_eq!(sandbox().run_batch(&script, &empty).unwrap(), 0.0);
}

proptest! {
    #[test]
    fn test_general_matches_rmse_identity(
        pairs in prop::collection::vec((0.0..500_f64, 0.0..500_f64), 1..48),
        cap in 1.0..1000_f64,
    ) {
        let real: Vec<f64> = pairs.iter().map(|p| p.0).collect();
        let fore: Vec<f64> = pairs.iter().map(|p| p.1).collect();
        let accuracy = region_accuracy(RegionId::General, &day(&real, &fore, cap, 0.0));

        let mse = pairs.iter().map(|(r, f)| (r - f).powi(2)).sum::<f64>() / pairs.len() as f64;
        let expected = (1.0 - mse.sqrt() / cap).max(0.0);
        assert_le!((accuracy - expected).abs(), 1e-9);
        assert_ge!(accuracy, 0.0);
    }

    #[test]
    fn test_accuracy_is_deterministic(
        pairs in prop::collection::vec((0.0..500_f64, 0.0..500_f64), 0..48),
        threshold in 0.0..1_f64,
    ) {
        let real: Vec<f64> = pairs.iter().map(|p| p.0).collect();
        let fore: Vec<f64> = pairs.iter().map(|p| p.1).collect();
        let data = day(&real, &fore, 300.0, threshold);
        for region in RegionId::ALL {
            let first = region_accuracy(region, &data);
            let second = region_accuracy(region, &data);
            prop_assert_eq!(first.to_bits(), second.to_bits());
            prop_assert!(first.is_finite());
        }
    }
}
