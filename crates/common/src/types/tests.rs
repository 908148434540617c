use super::*;

fn cst() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap()
}

#[test]
fn test_data_point_from_forecasts_mean() {
    let p = DataPoint::from_forecasts("00:15", 0, 100.0, vec![90.0, 110.0, 100.0]).unwrap();
    assert_eq!(p.forecast, 100.0);
    assert_eq!(p.fore_list(), &[90.0, 110.0, 100.0]);
}

#[test]
fn test_data_point_from_forecasts_empty() {
    assert!(DataPoint::from_forecasts("00:15", 0, 100.0, vec![]).is_none());
}

#[test]
fn test_fore_list_falls_back_to_forecast() {
    let p = DataPoint::single("00:15", 0, 100.0, 95.0);
    assert_eq!(p.fore_list(), &[95.0]);
}

#[test]
fn test_local_date_uses_offset() {
    // 2024-03-01 16:30 UTC = 2024-03-02 00:30 +08:00
    let ts = 1_709_310_600_000;
    let p = DataPoint::single("", ts, 0.0, 0.0);
    assert_eq!(
        p.local_date(cst()),
        NaiveDate::from_ymd_opt(2024, 3, 2)
    );
    assert_eq!(
        p.local_date(FixedOffset::east_opt(0).unwrap()),
        NaiveDate::from_ymd_opt(2024, 3, 1)
    );
}

#[test]
fn test_region_id_round_trip_names() {
    for region in RegionId::ALL {
        let parsed: RegionId = region.to_string().parse().unwrap();
        assert_eq!(parsed, region);
    }
}

#[test]
fn test_region_id_aliases() {
    assert_eq!("山西".parse::<RegionId>().unwrap(), RegionId::Shanxi);
    assert_eq!("North-China".parse::<RegionId>().unwrap(), RegionId::NorthChina);
    assert_eq!(" NORTHEAST ".parse::<RegionId>().unwrap(), RegionId::Northeast);
    assert_eq!(
        "mars".parse::<RegionId>(),
        Err(Error::UnknownRegion("mars".to_string()))
    );
}

#[test]
fn test_region_id_serde() {
    let json = serde_json::to_string(&RegionId::NorthChina).unwrap();
    assert_eq!(json, "\"north_china\"");
    let region: RegionId = serde_json::from_str("\"east_china\"").unwrap();
    assert_eq!(region, RegionId::EastChina);
}

#[test]
fn test_aggregation_method_parse() {
    assert_eq!("RMSE".parse::<AggregationMethod>().unwrap(), AggregationMethod::Rmse);
    assert_eq!("custom".parse::<AggregationMethod>().unwrap(), AggregationMethod::Custom);
    assert!("median".parse::<AggregationMethod>().is_err());
    assert_eq!(
        serde_json::to_string(&AggregationMethod::Mean).unwrap(),
        "\"mean\""
    );
}

#[test]
fn test_dead_band_policy_default() {
    assert_eq!(DeadBandPolicy::default(), DeadBandPolicy::Retain);
    assert_eq!("exclude".parse::<DeadBandPolicy>().unwrap(), DeadBandPolicy::Exclude);
    assert!("drop".parse::<DeadBandPolicy>().is_err());
}

#[test]
fn test_params_validate() {
    let ok = CalculationParams {
        cap: 200.0,
        threshold: 0.1,
        ignore_dead_band: false,
    };
    assert!(ok.validate().is_ok());

    let zero_cap = CalculationParams { cap: 0.0, ..ok };
    assert!(matches!(zero_cap.validate(), Err(Error::InvalidParams(_))));

    let nan_cap = CalculationParams { cap: f64::NAN, ..ok };
    assert!(nan_cap.validate().is_err());

    let bad_threshold = CalculationParams {
        threshold: 1.5,
        ..ok
    };
    assert!(bad_threshold.validate().is_err());
}

#[test]
fn test_params_effective_threshold() {
    let params = CalculationParams {
        cap: 200.0,
        threshold: 0.1,
        ignore_dead_band: false,
    };
    assert_eq!(params.effective_threshold(), 0.1);
    assert!((params.dead_band_limit() - 20.0).abs() < 1e-12);

    let ignored = CalculationParams {
        ignore_dead_band: true,
        ..params
    };
    assert_eq!(ignored.effective_threshold(), 0.0);
    assert_eq!(ignored.dead_band_limit(), 0.0);
}

#[test]
fn test_daily_result_serializes_camel_case() {
    let r = DailyResult {
        date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
        accuracy: 0.95,
        mae: 10.0,
        rmse: 10.0,
        avg_real: 100.0,
        avg_fore: 100.0,
        samples: 2,
    };
    let json = serde_json::to_value(&r).unwrap();
    assert_eq!(json["avgReal"], 100.0);
    assert_eq!(json["avgFore"], 100.0);
    assert_eq!(json["date"], "2024-03-02");
}
