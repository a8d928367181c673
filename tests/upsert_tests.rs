/// Upsert semantics against the in-memory warehouse
use chrono::{DateTime, TimeZone, Utc};
use kayzen_campaign_sync::config::DestinationTable;
use kayzen_campaign_sync::core::loader::CampaignLoader;
use kayzen_campaign_sync::core::pipeline::load_campaigns;
use kayzen_campaign_sync::integrations::warehouse::{MemoryWarehouse, WarehouseCall};
use kayzen_campaign_sync::models::Campaign;
use serde_json::{json, Value};

fn destination() -> DestinationTable {
    DestinationTable::new("analytics-prod", "kayzen", "campaigns")
}

fn campaign(value: Value) -> Campaign {
    Campaign::try_from(value).unwrap()
}

fn first_run_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 6, 0, 0).unwrap()
}

fn second_run_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 6, 0, 0).unwrap()
}

fn fetched_campaigns() -> Vec<Campaign> {
    vec![
        campaign(json!({"id": 101, "name": "Spring Promo", "status": "active", "budget": 500.0})),
        campaign(json!({"id": 102, "name": "Retargeting", "status": "paused", "budget": 120.5})),
        campaign(json!({"id": 103, "name": "Brand", "status": "active", "budget": 80.0})),
    ]
}

fn row_by_id(warehouse: &MemoryWarehouse, id: &str) -> Campaign {
    warehouse
        .rows()
        .into_iter()
        .find(|row| row.id().as_deref() == Some(id))
        .unwrap()
}

fn without_timestamp(row: &Campaign) -> Value {
    let mut fields = row.fields().clone();
    fields.remove("fetch_timestamp");
    Value::Object(fields)
}

#[tokio::test]
async fn test_empty_input_makes_no_warehouse_calls() {
    let warehouse = MemoryWarehouse::new(destination());
    let loader = CampaignLoader::new(&warehouse, first_run_at());

    assert_eq!(loader.upsert(Vec::new()).await.unwrap(), 0);
    assert!(warehouse.calls().is_empty());
    assert!(!warehouse.table_exists());
}

#[tokio::test]
async fn test_first_run_creates_clustered_table_without_delete() {
    let warehouse = MemoryWarehouse::new(destination());
    let loader = CampaignLoader::new(&warehouse, first_run_at());

    let processed = loader.upsert(fetched_campaigns()).await.unwrap();

    assert_eq!(processed, 3);
    assert_eq!(
        warehouse.calls(),
        vec![
            WarehouseCall::Describe,
            WarehouseCall::Append {
                rows: 3,
                create: true
            },
        ]
    );
    assert_eq!(warehouse.clustering_fields(), vec!["id"]);
    assert_eq!(
        warehouse.columns(),
        vec!["budget", "fetch_timestamp", "id", "name", "status"]
    );
    for row in warehouse.rows() {
        assert_eq!(
            row.get("fetch_timestamp"),
            Some(&json!("2026-10-18T06:00:00.000000Z"))
        );
    }
}

#[tokio::test]
async fn test_second_run_updates_only_changed_row() {
    let warehouse = MemoryWarehouse::new(destination());
    CampaignLoader::new(&warehouse, first_run_at())
        .upsert(fetched_campaigns())
        .await
        .unwrap();
    let before_102 = without_timestamp(&row_by_id(&warehouse, "102"));
    let before_103 = without_timestamp(&row_by_id(&warehouse, "103"));
    warehouse.clear_calls();

    let mut second_fetch = fetched_campaigns();
    second_fetch[0] = campaign(json!({"id": 101, "name": "Spring Promo", "status": "ended", "budget": 500.0}));
    let processed = CampaignLoader::new(&warehouse, second_run_at())
        .upsert(second_fetch)
        .await
        .unwrap();

    assert_eq!(processed, 3);
    assert_eq!(
        warehouse.calls(),
        vec![
            WarehouseCall::Describe,
            WarehouseCall::Delete { ids: 3 },
            WarehouseCall::Append {
                rows: 3,
                create: false
            },
        ]
    );

    let rows = warehouse.rows();
    assert_eq!(rows.len(), 3);
    assert_eq!(row_by_id(&warehouse, "101").get("status"), Some(&json!("ended")));
    assert_eq!(without_timestamp(&row_by_id(&warehouse, "102")), before_102);
    assert_eq!(without_timestamp(&row_by_id(&warehouse, "103")), before_103);
    for row in rows {
        assert_eq!(
            row.get("fetch_timestamp"),
            Some(&json!("2026-10-19T06:00:00.000000Z"))
        );
    }
}

#[tokio::test]
async fn test_repeated_upsert_is_idempotent() {
    let warehouse = MemoryWarehouse::new(destination());

    let first = CampaignLoader::new(&warehouse, first_run_at())
        .upsert(fetched_campaigns())
        .await
        .unwrap();
    let second = CampaignLoader::new(&warehouse, second_run_at())
        .upsert(fetched_campaigns())
        .await
        .unwrap();

    assert_eq!(first, second);
    let rows = warehouse.rows();
    assert_eq!(rows.len(), 3);
    assert!(rows
        .iter()
        .all(|row| row.get("fetch_timestamp") == Some(&json!("2026-10-19T06:00:00.000000Z"))));
}

#[tokio::test]
async fn test_absent_ids_are_left_untouched() {
    let stale = campaign(json!({
        "id": 7,
        "name": "Archived",
        "fetch_timestamp": "2025-01-01T00:00:00.000000Z"
    }));
    let warehouse = MemoryWarehouse::with_rows(
        destination(),
        vec![stale.clone()],
        vec!["id".to_string()],
    );

    CampaignLoader::new(&warehouse, first_run_at())
        .upsert(fetched_campaigns())
        .await
        .unwrap();

    assert_eq!(warehouse.rows().len(), 4);
    assert_eq!(row_by_id(&warehouse, "7"), stale);
}

#[tokio::test]
async fn test_unclustered_table_gets_clustering_once() {
    let warehouse = MemoryWarehouse::with_rows(
        destination(),
        vec![campaign(json!({"id": 101, "name": "Spring Promo"}))],
        Vec::new(),
    );

    CampaignLoader::new(&warehouse, first_run_at())
        .upsert(fetched_campaigns())
        .await
        .unwrap();
    assert_eq!(
        warehouse.calls().last(),
        Some(&WarehouseCall::SetClustering(vec!["id".to_string()]))
    );
    assert_eq!(warehouse.clustering_fields(), vec!["id"]);

    warehouse.clear_calls();
    CampaignLoader::new(&warehouse, second_run_at())
        .upsert(fetched_campaigns())
        .await
        .unwrap();
    assert!(!warehouse
        .calls()
        .iter()
        .any(|call| matches!(call, WarehouseCall::SetClustering(_))));
}

#[tokio::test]
async fn test_numeric_and_string_ids_replace_each_other() {
    let warehouse = MemoryWarehouse::with_rows(
        destination(),
        vec![campaign(json!({"id": "101", "name": "old"}))],
        vec!["id".to_string()],
    );

    CampaignLoader::new(&warehouse, first_run_at())
        .upsert(vec![campaign(json!({"id": 101, "name": "new"}))])
        .await
        .unwrap();

    let rows = warehouse.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&json!("new")));
}

#[tokio::test]
async fn test_duplicates_collapse_and_missing_ids_are_dropped() {
    let warehouse = MemoryWarehouse::new(destination());

    let processed = CampaignLoader::new(&warehouse, first_run_at())
        .upsert(vec![
            campaign(json!({"id": 1, "name": "first copy"})),
            campaign(json!({"name": "no id"})),
            campaign(json!({"id": 2, "name": "two"})),
            campaign(json!({"id": 1, "name": "second copy"})),
        ])
        .await
        .unwrap();

    assert_eq!(processed, 2);
    assert_eq!(warehouse.rows().len(), 2);
    assert_eq!(row_by_id(&warehouse, "1").get("name"), Some(&json!("second copy")));
}

#[tokio::test]
async fn test_only_id_less_records_skip_the_warehouse() {
    let warehouse = MemoryWarehouse::new(destination());

    let processed = CampaignLoader::new(&warehouse, first_run_at())
        .upsert(vec![campaign(json!({"name": "no id"}))])
        .await
        .unwrap();

    assert_eq!(processed, 0);
    assert!(warehouse.calls().is_empty());
}

#[tokio::test]
async fn test_new_fields_widen_the_table() {
    let warehouse = MemoryWarehouse::new(destination());
    CampaignLoader::new(&warehouse, first_run_at())
        .upsert(vec![campaign(json!({"id": 1, "name": "a"}))])
        .await
        .unwrap();

    CampaignLoader::new(&warehouse, second_run_at())
        .upsert(vec![campaign(json!({"id": 2, "name": "b", "bid_strategy": "cpi"}))])
        .await
        .unwrap();

    assert_eq!(
        warehouse.columns(),
        vec!["bid_strategy", "fetch_timestamp", "id", "name"]
    );
}

#[tokio::test]
async fn test_load_campaigns_summary() {
    let warehouse = MemoryWarehouse::new(destination());

    let summary = load_campaigns(&warehouse, fetched_campaigns(), first_run_at())
        .await
        .unwrap();

    assert_eq!(summary.campaigns_fetched, 3);
    assert_eq!(summary.campaigns_processed, 3);
    assert_eq!(summary.fetch_timestamp, "2026-10-18T06:00:00.000000Z");
}
