use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use anyhow::{Context, Result};
use restock_core::{
    normalize, CategoryThresholds, MemoryEntry, MemorySnapshot, OrderResult, ProductRecord,
    ReconcileReport, ReconcileSummary, ReviewDecision,
};
use restock_store_sqlite::{MatchMemoryStore, SchemaStatus};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use ulid::Ulid;

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RunId(pub Ulid);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconcileRequest {
    pub location: String,
    pub pos_products: Vec<ProductRecord>,
    pub production_products: Vec<ProductRecord>,
    #[serde(default)]
    pub overrides: BTreeMap<usize, ReviewDecision>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconcileRunReport {
    pub run_id: RunId,
    pub snapshot_id: String,
    pub location: String,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub memory_entries: usize,
    pub memory_available: bool,
    pub report: ReconcileReport,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderRequest {
    pub location: String,
    pub pos_products: Vec<ProductRecord>,
    pub production_products: Vec<ProductRecord>,
    #[serde(default)]
    pub overrides: BTreeMap<usize, ReviewDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<CategoryThresholds>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderRunReport {
    pub run_id: RunId,
    pub order_number: String,
    pub location: String,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub order: OrderResult,
    pub reconcile_summary: ReconcileSummary,
    pub warnings_count: usize,
}

/// Facade over the reconciliation kernel and the Match Memory store.
///
/// Holds only the database path; each operation opens the store on demand so a
/// missing or broken database degrades reads without wedging the whole run.
#[derive(Debug, Clone)]
pub struct RestockApi {
    db_path: PathBuf,
}

impl RestockApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open_store(&self) -> Result<MatchMemoryStore> {
        let mut store = MatchMemoryStore::open(&self.db_path)?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = MatchMemoryStore::open(&self.db_path)?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = MatchMemoryStore::open(&self.db_path)?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    fn load_memory(&self) -> (MemorySnapshot, bool) {
        match self.open_store().and_then(|store| store.snapshot()) {
            Ok(snapshot) => (snapshot, true),
            Err(err) => {
                tracing::warn!(
                    "match memory unavailable, degrading to computed scoring only: {err:#}"
                );
                (MemorySnapshot::new(), false)
            }
        }
    }

    /// Reconcile a POS list against a production list with store-backed memory.
    ///
    /// Lookups degrade to an empty memory snapshot when the store cannot be
    /// opened; confirmed review overrides are written through and any failure
    /// to persist them surfaces as an error instead of a silent drop.
    ///
    /// # Errors
    /// Returns an error when a confirmed override cannot be persisted.
    pub fn reconcile(&self, input: ReconcileRequest) -> Result<ReconcileRunReport> {
        let generated_at = OffsetDateTime::now_utc();
        let snapshot_id = compute_snapshot_id(&input);
        let (memory, memory_available) = self.load_memory();
        let memory_entries = memory.len();

        let report = restock_core::reconcile(
            &input.pos_products,
            &input.production_products,
            &memory,
            &input.overrides,
        );

        if !report.confirmed_memory_writes.is_empty() {
            let mut store = self
                .open_store()
                .context("match memory store is required to persist confirmed matches")?;
            for write in &report.confirmed_memory_writes {
                store
                    .confirm(&write.pos_name_normalized, &write.production_name_normalized)
                    .with_context(|| {
                        format!(
                            "failed to persist confirmed match for `{}`",
                            write.pos_name_normalized
                        )
                    })?;
            }
        }

        tracing::info!(
            "reconciliation run {} for {}: {} auto, {} review, {} unmatched, {} production-only",
            snapshot_id,
            input.location,
            report.summary.auto_matched,
            report.summary.needs_review,
            report.summary.unmatched,
            report.summary.production_only
        );

        Ok(ReconcileRunReport {
            run_id: RunId::new(),
            snapshot_id,
            location: input.location,
            generated_at,
            memory_entries,
            memory_available,
            report,
        })
    }

    /// Confirm one POS/production pairing directly (outside a review run).
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or the upsert fails.
    pub fn confirm_match(&self, pos_name: &str, production_name: &str) -> Result<MemoryEntry> {
        let pos_norm = normalize(pos_name);
        let production_norm = normalize(production_name);
        let mut store = self.open_store()?;
        store.confirm(pos_norm.as_str(), production_norm.as_str())
    }

    /// Drop one confirmed pairing; returns whether an entry existed.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or the delete fails.
    pub fn forget_match(&self, pos_name: &str) -> Result<bool> {
        let pos_norm = normalize(pos_name);
        let mut store = self.open_store()?;
        store.forget(pos_norm.as_str())
    }

    /// List all persisted confirmations.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or read.
    pub fn list_memory(&self) -> Result<Vec<MemoryEntry>> {
        let store = self.open_store()?;
        store.list_entries()
    }

    /// Reconcile, then derive the prioritized restock order.
    ///
    /// # Errors
    /// Returns an error when reconciliation write-through fails or the
    /// threshold table has no row and no default for an encountered category.
    pub fn build_order(&self, input: OrderRequest) -> Result<OrderRunReport> {
        let OrderRequest { location, pos_products, production_products, overrides, thresholds } =
            input;

        let run = self.reconcile(ReconcileRequest {
            location: location.clone(),
            pos_products,
            production_products,
            overrides,
        })?;

        let thresholds = thresholds.unwrap_or_default();
        let order = restock_core::build_order(
            &run.report.auto_matched,
            &run.report.production_only,
            &thresholds,
        )?;

        let order_number = order_number(&location, run.generated_at);
        tracing::info!(
            "order {} for {}: {} critical, {} high, {} new products",
            order_number,
            location,
            order.summary.critical,
            order.summary.high,
            order.summary.new_products
        );

        Ok(OrderRunReport {
            run_id: run.run_id,
            order_number,
            location,
            generated_at: run.generated_at,
            order,
            reconcile_summary: run.report.summary,
            warnings_count: run.report.warnings.len(),
        })
    }
}

fn order_number(location: &str, generated_at: OffsetDateTime) -> String {
    let code = location
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(3)
        .collect::<String>()
        .to_uppercase();
    let code = if code.is_empty() { "HQ".to_string() } else { code };
    format!("RO-{}-W{:02}-{code}", generated_at.year(), generated_at.iso_week())
}

fn compute_snapshot_id(input: &ReconcileRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.location.as_bytes());

    for record in input.pos_products.iter().chain(input.production_products.iter()) {
        hasher.update(record.name.as_bytes());
        hasher.update(record.category.as_bytes());
        hasher.update(record.quantity.to_le_bytes());
    }

    for (index, decision) in &input.overrides {
        hasher.update(index.to_le_bytes());
        match decision {
            ReviewDecision::Confirm { production_index } => {
                hasher.update(b"confirm");
                hasher.update(production_index.to_le_bytes());
            }
            ReviewDecision::Reject { production_index } => {
                hasher.update(b"reject");
                hasher.update(production_index.to_le_bytes());
            }
        }
    }

    let digest = hasher.finalize();
    let digest_hex = format!("{digest:x}");
    format!("run_{}", &digest_hex[..16])
}
