use bytes::Bytes;
use chrono::NaiveDate;
use demandcast_bucket::{BucketStore, MemoryBucketStore};
use demandcast_core::config::PipelineConfig;
use demandcast_core::records::{AggregatedPoint, ForecastRecord};
use demandcast_core::retry::RetryPolicy;
use demandcast_core::series::{self, build_series};
use std::time::Duration;

fn test_config(horizon: usize) -> PipelineConfig {
    PipelineConfig {
        forecast_horizon: horizon,
        retry: RetryPolicy {
            max_retries: 0,
            backoff: Duration::from_millis(1),
        },
        ..Default::default()
    }
}

fn point(department: &str, date: (i32, u32, u32), total: f64) -> AggregatedPoint {
    AggregatedPoint {
        department: department.to_string(),
        date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
        total_sales: total,
    }
}

#[test]
fn three_days_horizon_one_round_trip() {
    let points = vec![
        point("A", (2024, 1, 1), 10.0),
        point("A", (2024, 1, 2), 5.0),
        point("A", (2024, 1, 3), 7.0),
    ];

    let split = build_series(&points, 1);
    assert_eq!(split.eval.len(), 1);
    assert_eq!(split.train.len(), 1);

    let eval = &split.eval[0];
    assert_eq!(eval.start, "2024-01-01");
    assert_eq!(eval.cat, vec!["A".to_string()]);
    assert_eq!(eval.target, vec![10.0, 5.0, 7.0]);

    let train = &split.train[0];
    assert_eq!(train.start, "2024-01-01");
    assert_eq!(train.target, vec![10.0, 5.0]);
}

#[test]
fn department_with_exactly_horizon_days_is_excluded() {
    let points = vec![
        point("Short", (2024, 1, 1), 1.0),
        point("Short", (2024, 1, 2), 2.0),
        point("Short", (2024, 1, 3), 3.0),
    ];

    let split = build_series(&points, 3);
    assert!(split.train.is_empty());
    assert!(split.eval.is_empty());
    assert_eq!(split.skipped.len(), 1);
    assert_eq!(split.skipped[0].department, "Short");
    assert_eq!(split.skipped[0].observed_days, 3);
}

#[test]
fn horizon_plus_one_days_yields_train_length_one() {
    let points = vec![
        point("B", (2024, 1, 1), 1.0),
        point("B", (2024, 1, 2), 2.0),
        point("B", (2024, 1, 3), 3.0),
        point("B", (2024, 1, 4), 4.0),
    ];

    let split = build_series(&points, 3);
    assert_eq!(split.train[0].target, vec![1.0]);
    assert_eq!(split.eval[0].target.len(), 4);
}

#[test]
fn target_order_is_stable_under_input_permutation() {
    let ordered = vec![
        point("A", (2024, 1, 1), 10.0),
        point("A", (2024, 1, 3), 7.0),
        point("A", (2024, 1, 5), 5.0),
        point("B", (2024, 1, 2), 1.0),
        point("B", (2024, 1, 4), 2.0),
    ];
    let mut shuffled = ordered.clone();
    shuffled.swap(0, 4);
    shuffled.swap(1, 3);

    let first = build_series(&ordered, 1);
    let second = build_series(&shuffled, 1);
    assert_eq!(first.eval, second.eval);
    assert_eq!(first.train, second.train);

    // Gaps are not filled: 3 observed days give a 3-entry target even
    // though the span covers 5 calendar days.
    assert_eq!(first.eval[0].target, vec![10.0, 7.0, 5.0]);
}

#[test]
fn duplicate_days_merge_by_summation() {
    let points = vec![
        point("A", (2024, 1, 1), 4.0),
        point("A", (2024, 1, 1), 6.0),
        point("A", (2024, 1, 2), 1.0),
    ];

    let split = build_series(&points, 1);
    assert_eq!(split.eval[0].target, vec![10.0, 1.0]);
}

#[test]
fn serialized_records_are_byte_identical_across_builds() {
    let points = vec![
        point("Garden", (2024, 2, 1), 3.5),
        point("Apparel", (2024, 2, 1), 1.0),
        point("Apparel", (2024, 2, 2), 2.0),
        point("Garden", (2024, 2, 3), 4.0),
    ];

    let serialize = |split: &Vec<ForecastRecord>| {
        split
            .iter()
            .map(|record| serde_json::to_string(record).unwrap())
            .collect::<Vec<_>>()
            .join("\n")
    };

    let first = build_series(&points, 1);
    let second = build_series(&points, 1);
    assert_eq!(serialize(&first.eval), serialize(&second.eval));

    // Departments in lexicographic order, fixed key order per record.
    assert_eq!(
        serialize(&first.eval),
        concat!(
            "{\"start\":\"2024-02-01\",\"cat\":[\"Apparel\"],\"target\":[1.0,2.0]}\n",
            "{\"start\":\"2024-02-01\",\"cat\":[\"Garden\"],\"target\":[3.5,4.0]}"
        )
    );
}

#[tokio::test]
async fn builds_datasets_from_partition_objects() {
    let store = MemoryBucketStore::new();
    let points = vec![
        point("A", (2024, 1, 1), 10.0),
        point("A", (2024, 1, 2), 5.0),
        point("A", (2024, 1, 3), 7.0),
        point("Tiny", (2024, 1, 1), 1.0),
    ];
    for p in &points {
        let key = format!(
            "aggregated/{}/{}.csv",
            p.department.replace(' ', "_"),
            p.date.format("%Y-%m-%d")
        );
        store
            .put_object(&key, Bytes::from(p.to_csv_bytes().unwrap()), "text/csv")
            .await
            .unwrap();
    }

    let summary = series::run(&store, &test_config(1)).await.unwrap();
    assert_eq!(summary.partitions, 4);
    assert_eq!(summary.points, 4);
    assert_eq!(summary.train_records, 1);
    assert_eq!(summary.eval_records, 1);
    assert_eq!(summary.skipped_departments, 1);

    let train = store.get_object("deepar/train/train.json").await.unwrap();
    assert_eq!(
        std::str::from_utf8(&train).unwrap(),
        "{\"start\":\"2024-01-01\",\"cat\":[\"A\"],\"target\":[10.0,5.0]}"
    );

    let eval = store.get_object("deepar/test/test.json").await.unwrap();
    let record: ForecastRecord =
        serde_json::from_str(std::str::from_utf8(&eval).unwrap()).unwrap();
    assert_eq!(record.target, vec![10.0, 5.0, 7.0]);
}

#[tokio::test]
async fn malformed_partition_is_skipped() {
    let store = MemoryBucketStore::new();
    for p in [
        point("A", (2024, 1, 1), 1.0),
        point("A", (2024, 1, 2), 2.0),
    ] {
        let key = format!("aggregated/A/{}.csv", p.date.format("%Y-%m-%d"));
        store
            .put_object(&key, Bytes::from(p.to_csv_bytes().unwrap()), "text/csv")
            .await
            .unwrap();
    }
    store
        .put_object(
            "aggregated/A/garbage.csv",
            Bytes::from_static(b"wrong,columns\n1,2\n"),
            "text/csv",
        )
        .await
        .unwrap();

    let summary = series::run(&store, &test_config(1)).await.unwrap();
    assert_eq!(summary.partitions, 3);
    assert_eq!(summary.failed_partitions, 1);
    assert_eq!(summary.points, 2);
    assert_eq!(summary.train_records, 1);
}

#[tokio::test]
async fn empty_aggregated_tier_is_a_successful_no_op() {
    let store = MemoryBucketStore::new();
    let summary = series::run(&store, &test_config(7)).await.unwrap();
    assert_eq!(summary.partitions, 0);
    assert_eq!(summary.train_records, 0);
    // No datasets are written when there is nothing to build.
    assert!(store.is_empty());
}
