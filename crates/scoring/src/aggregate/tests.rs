use super::*;
use assertables::*;
use proptest::prelude::*;

#[test]
fn test_safe_ratio() {
    assert_eq!(safe_ratio(1.0, 2.0), 0.5);
    assert_eq!(safe_ratio(1.0, 0.0), 0.0);
    assert_eq!(safe_ratio(1.0, f64::INFINITY), 0.0);
    assert_eq!(safe_ratio(1.0, f64::NAN), 0.0);
}

#[test]
fn test_empty_defaults() {
    assert_eq!(mean_accuracy(&[]), 1.0);
    assert_eq!(rmse_accuracy(&[], 200.0), 1.0);
    assert_eq!(weighted_rmse_accuracy(&[], &[], &[], 200.0), 1.0);
    assert_eq!(sum_stub(&[]), 0.0);
}

#[test]
fn test_mean_accuracy() {
    assert_eq!(mean_accuracy(&[0.1, 0.3]), 0.8);
}

#[test]
fn test_rmse_accuracy_general_scenario() {
    // real=[100,100], fore=[90,110] → results=[100,100]
    let accuracy = rmse_accuracy(&[100.0, 100.0], 200.0);
    assert_eq!(accuracy, 0.95);
}

#[test]
fn test_weighted_rmse_shanxi_scenario() {
    // diff=[10,-10] → results=diff²·|diff|=[1000,1000], weight=20
    let accuracy =
        weighted_rmse_accuracy(&[1000.0, 1000.0], &[100.0, 100.0], &[90.0, 110.0], 200.0);
    assert_eq!(accuracy, 0.95);
}

#[test]
fn test_weighted_rmse_zero_weight() {
    let accuracy = weighted_rmse_accuracy(&[5.0], &[100.0], &[100.0], 200.0);
    assert_eq!(accuracy, 1.0);
}

#[test]
fn test_finalize_clamps() {
    assert_eq!(finalize(-0.5, false), 0.0);
    assert_eq!(finalize(1.5, false), 1.5);
    assert_eq!(finalize(1.5, true), 1.0);
    assert_eq!(finalize(f64::NAN, false), 0.0);
    assert_eq!(finalize(0.7, true), 0.7);
}

#[test]
fn test_finalize_non_finite_is_zero() {
    for clamp in [false, true] {
        assert_eq!(finalize(f64::INFINITY, clamp), 0.0);
        assert_eq!(finalize(f64::NEG_INFINITY, clamp), 0.0);
        assert_eq!(finalize(f64::NAN, clamp), 0.0);
    }
    // 1 - mean([-inf]) = +inf
    assert_eq!(finalize(mean_accuracy(&[f64::NEG_INFINITY]), false), 0.0);
    assert_eq!(finalize(rmse_accuracy(&[f64::INFINITY], 200.0), false), 0.0);
}

#[test]
fn test_negative_mean_rmse_does_not_produce_nan() {
    let accuracy = finalize(rmse_accuracy(&[-4.0], 200.0), false);
    assert!(accuracy.is_finite());
}

proptest! {
    #[test]
    fn finalized_accuracy_is_finite_and_non_negative(
        results in prop::collection::vec(
            prop_oneof![
                8 => -1e6f64..1e6,
                1 => Just(f64::INFINITY),
                1 => Just(f64::NEG_INFINITY),
                1 => Just(f64::NAN),
            ],
            0..50,
        ),
        cap in 0.001f64..1e5,
        clamp in any::<bool>(),
    ) {
        for raw in [mean_accuracy(&results), rmse_accuracy(&results, cap)] {
            let accuracy = finalize(raw, clamp);
            prop_assert!(accuracy.is_finite());
            prop_assert!(accuracy >= 0.0);
            if clamp {
                prop_assert!(accuracy <= 1.0);
            }
        }
    }

    #[test]
    fn rmse_accuracy_never_exceeds_one_for_non_negative_results(
        results in prop::collection::vec(0f64..1e6, 1..50),
        cap in 0.001f64..1e5,
    ) {
        let accuracy = finalize(rmse_accuracy(&results, cap), false);
        assert_ge!(accuracy, 0.0);
        assert_le!(accuracy, 1.0);
    }
}
