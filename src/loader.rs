use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::errors::SyncError;
use crate::models::{format_fetch_timestamp, Campaign, ID_FIELD};
use crate::warehouse::{TableLayout, Warehouse};

/// Replaces campaign rows in the destination table, keyed by `id`.
///
/// The replace is a delete of the incoming id set followed by an append.
/// The two steps are not atomic: a crash in between leaves those ids
/// absent until the next successful run.
pub struct CampaignLoader<'a> {
    warehouse: &'a dyn Warehouse,
    fetch_timestamp: String,
}

impl<'a> CampaignLoader<'a> {
    /// Binds the loader to a table and to the invocation's fetch time.
    pub fn new(warehouse: &'a dyn Warehouse, fetched_at: DateTime<Utc>) -> Self {
        Self {
            warehouse,
            fetch_timestamp: format_fetch_timestamp(fetched_at),
        }
    }

    pub fn fetch_timestamp(&self) -> &str {
        &self.fetch_timestamp
    }

    /// Upserts `campaigns` and returns the number of rows inserted.
    ///
    /// Empty input makes no warehouse calls. Records without a usable id are
    /// dropped; when an id repeats, the last record wins.
    pub async fn upsert(&self, campaigns: Vec<Campaign>) -> Result<usize, SyncError> {
        if campaigns.is_empty() {
            tracing::info!("No campaigns to load");
            return Ok(0);
        }

        let (ids, mut rows) = dedupe_by_id(campaigns);
        if rows.is_empty() {
            tracing::warn!("No campaigns with a usable id; nothing to load");
            return Ok(0);
        }

        let destination = self.warehouse.destination();
        let existing = self.warehouse.describe_table().await?;

        match &existing {
            Some(info) => {
                if let Some(rows) = info.num_rows {
                    tracing::info!("Table {} holds {} rows before upsert", destination, rows);
                }
                let deleted = self.warehouse.delete_ids(&ids).await?;
                tracing::info!(
                    "Deleted {} existing rows for {} campaign IDs",
                    deleted,
                    ids.len()
                );
            }
            None => {
                tracing::info!(
                    "Table {} does not exist yet; skipping delete",
                    destination
                );
            }
        }

        for row in rows.iter_mut() {
            row.stamp(&self.fetch_timestamp);
        }

        let layout = TableLayout {
            clustering_fields: vec![ID_FIELD.to_string()],
        };
        let create = existing.is_none().then_some(&layout);
        let written = self.warehouse.append(&rows, create).await?;

        match &existing {
            None => {
                tracing::info!("Created table {} with clustering on '{}'", destination, ID_FIELD);
            }
            Some(info) if !is_clustered_by_id(&info.clustering_fields) => {
                self.warehouse
                    .set_clustering(&[ID_FIELD.to_string()])
                    .await?;
                tracing::info!("Clustered {} on '{}'", destination, ID_FIELD);
            }
            Some(_) => {}
        }
        tracing::info!("✓ Loaded {} campaigns to {}", written, destination);

        Ok(rows.len())
    }
}

fn is_clustered_by_id(fields: &[String]) -> bool {
    fields.first().is_some_and(|field| field == ID_FIELD)
}

/// Drops id-less records and keeps the last record per id, preserving the
/// position of each id's first appearance. Returns the distinct ids with
/// the surviving records.
fn dedupe_by_id(campaigns: Vec<Campaign>) -> (Vec<String>, Vec<Campaign>) {
    let mut ids: Vec<String> = Vec::with_capacity(campaigns.len());
    let mut rows: Vec<Campaign> = Vec::with_capacity(campaigns.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut missing_id = 0usize;

    for campaign in campaigns {
        let Some(id) = campaign.id() else {
            missing_id += 1;
            continue;
        };
        match positions.get(&id) {
            Some(&index) => rows[index] = campaign,
            None => {
                positions.insert(id.clone(), rows.len());
                ids.push(id);
                rows.push(campaign);
            }
        }
    }

    if missing_id > 0 {
        tracing::warn!("Dropped {} campaigns without an id", missing_id);
    }
    (ids, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn campaign(value: serde_json::Value) -> Campaign {
        Campaign::try_from(value).unwrap()
    }

    #[test]
    fn test_dedupe_keeps_last_record_per_id() {
        let (ids, rows) = dedupe_by_id(vec![
            campaign(json!({"id": 1, "name": "old"})),
            campaign(json!({"id": 2})),
            campaign(json!({"id": 1, "name": "new"})),
        ]);
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name"), Some(&json!("new")));
    }

    #[test]
    fn test_dedupe_drops_missing_ids() {
        let (ids, rows) = dedupe_by_id(vec![
            campaign(json!({"name": "orphan"})),
            campaign(json!({"id": null})),
            campaign(json!({"id": "7"})),
        ]);
        assert_eq!(ids, vec!["7"]);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_clustered_by_id() {
        assert!(is_clustered_by_id(&["id".to_string()]));
        assert!(is_clustered_by_id(&["id".to_string(), "status".to_string()]));
        assert!(!is_clustered_by_id(&[]));
        assert!(!is_clustered_by_id(&["status".to_string()]));
    }
}
