use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Computed similarity at or above this value is accepted without review.
pub const AUTO_MATCH_THRESHOLD: u8 = 90;

/// Computed similarity at or above this value (and below auto) is surfaced
/// for human review; anything lower reports no candidate at all.
pub const REVIEW_THRESHOLD: u8 = 70;

/// Added when both sides carry the same category (case-insensitive), capped at 100.
pub const CATEGORY_MATCH_BOOST: u8 = 10;

/// Subtracted when the two categories belong to clearly incompatible families.
pub const CATEGORY_CONFLICT_PENALTY: u8 = 15;

const TOKEN_OVERLAP_WEIGHT: f64 = 0.6;
const LEVENSHTEIN_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductRecord {
    pub name: String,
    pub category: String,
    pub quantity: f64,
    pub unit_of_measure: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
}

impl ProductRecord {
    /// Validate one inbound product row before it may enter a reconciliation run.
    ///
    /// # Errors
    /// Returns [`CoreError::Validation`] when the name is blank or the quantity
    /// is negative or non-finite.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("product name MUST be non-empty".to_string()));
        }

        if !self.quantity.is_finite() {
            return Err(CoreError::Validation("quantity MUST be a finite number".to_string()));
        }

        if self.quantity < 0.0 {
            return Err(CoreError::Validation("quantity MUST be non-negative".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NormalizedName(String);

impl NormalizedName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for NormalizedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonicalize a raw product name into its comparable token form.
///
/// Lower-cases, drops parenthetical segments, expands `&` to `and`, strips
/// unit/size tokens (`1g`, `3.5g`, `100mg`, `2pk`), removes remaining
/// punctuation, and collapses whitespace. Idempotent on its own output.
#[must_use]
pub fn normalize(name: &str) -> NormalizedName {
    let lowered = name.to_lowercase();

    // Drop parenthetical segments before tokenizing.
    let mut depth = 0_usize;
    let mut cleaned = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => cleaned.push(ch),
            _ => {}
        }
    }

    let mut expanded = String::with_capacity(cleaned.len());
    for ch in cleaned.chars() {
        match ch {
            '&' => expanded.push_str(" and "),
            '/' | ',' => expanded.push(' '),
            _ => expanded.push(ch),
        }
    }

    let mut tokens: Vec<String> = Vec::new();
    for raw in expanded.split_whitespace() {
        let stripped = raw
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '.')
            .collect::<String>();
        if stripped.is_empty() || is_size_token(&stripped) {
            continue;
        }

        let token = stripped
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect::<String>();
        if !token.is_empty() {
            tokens.push(token);
        }
    }

    NormalizedName(tokens.join(" "))
}

fn is_size_token(token: &str) -> bool {
    let Some(split) = token.find(|ch: char| !ch.is_ascii_digit() && ch != '.') else {
        // Pure numbers stay; product names legitimately carry them ("og kush 4").
        return false;
    };

    if split == 0 {
        return false;
    }

    let (amount, unit) = token.split_at(split);
    if amount.chars().filter(|ch| *ch == '.').count() > 1 {
        return false;
    }

    matches!(
        unit,
        "g" | "mg" | "kg" | "oz" | "ml" | "ct" | "pk" | "pack" | "cart" | "carts" | "unit"
            | "units"
    )
}

#[must_use]
pub fn token_set(name: &NormalizedName) -> BTreeSet<String> {
    name.as_str().split_whitespace().map(ToString::to_string).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CategoryFamily {
    Flower,
    Preroll,
    Cartridge,
    Extract,
    Edible,
}

fn category_family(category: &str) -> Option<CategoryFamily> {
    let lowered = category.trim().to_lowercase();
    match lowered.as_str() {
        "flower" => Some(CategoryFamily::Flower),
        "preroll" | "prerolls" => Some(CategoryFamily::Preroll),
        "full spec oil" | "cart" | "carts" | "cartridge" => Some(CategoryFamily::Cartridge),
        "shatter" | "badder" | "sugar" | "live resin" | "rosin" | "diamonds" => {
            Some(CategoryFamily::Extract)
        }
        "edible" | "edibles" | "gummies" => Some(CategoryFamily::Edible),
        _ => None,
    }
}

fn categories_conflict(lhs: &str, rhs: &str) -> bool {
    let Some(family_lhs) = category_family(lhs) else {
        return false;
    };
    let Some(family_rhs) = category_family(rhs) else {
        return false;
    };

    if family_lhs == family_rhs {
        return false;
    }

    let pair = |a: CategoryFamily, b: CategoryFamily| {
        (family_lhs == a && family_rhs == b) || (family_lhs == b && family_rhs == a)
    };

    family_lhs == CategoryFamily::Edible
        || family_rhs == CategoryFamily::Edible
        || pair(CategoryFamily::Flower, CategoryFamily::Cartridge)
}

fn token_overlap(lhs: &NormalizedName, rhs: &NormalizedName) -> f64 {
    let lhs_tokens = token_set(lhs);
    let rhs_tokens = token_set(rhs);
    let total = lhs_tokens.len() + rhs_tokens.len();
    if total == 0 {
        return 0.0;
    }

    let shared = lhs_tokens.intersection(&rhs_tokens).count();
    let shared_f64 = f64::from(u32::try_from(shared).unwrap_or(u32::MAX));
    let total_f64 = f64::from(u32::try_from(total).unwrap_or(u32::MAX));
    (2.0 * shared_f64) / total_f64
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_score(value: f64) -> u8 {
    let scaled = (value * 100.0).round();
    if scaled <= 0.0 {
        0
    } else if scaled >= 100.0 {
        100
    } else {
        scaled as u8
    }
}

/// Score the similarity of two normalized names on a 0-100 scale.
///
/// Exact normalized equality short-circuits to 100. Otherwise the base score
/// blends Sørensen-Dice token overlap with normalized Levenshtein similarity,
/// then applies the category boost or incompatibility penalty. Symmetric under
/// swapping the two (name, category) pairs.
#[must_use]
pub fn score(
    pos: &NormalizedName,
    production: &NormalizedName,
    pos_category: &str,
    production_category: &str,
) -> u8 {
    if pos.as_str().is_empty() || production.as_str().is_empty() {
        return 0;
    }

    if pos == production {
        return 100;
    }

    let overlap = token_overlap(pos, production);
    let lexical = strsim::normalized_levenshtein(pos.as_str(), production.as_str());
    let base = TOKEN_OVERLAP_WEIGHT * overlap + LEVENSHTEIN_WEIGHT * lexical;

    let mut value = to_score(base);
    let same_category = !pos_category.trim().is_empty()
        && pos_category.trim().eq_ignore_ascii_case(production_category.trim());
    if same_category {
        value = value.saturating_add(CATEGORY_MATCH_BOOST).min(100);
    } else if categories_conflict(pos_category, production_category) {
        value = value.saturating_sub(CATEGORY_CONFLICT_PENALTY);
    }

    value
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Memory,
    Computed,
    Confirmed,
}

impl MatchSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Computed => "computed",
            Self::Confirmed => "confirmed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(Self::Memory),
            "computed" => Some(Self::Computed),
            "confirmed" => Some(Self::Confirmed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchCandidate {
    pub pos_index: usize,
    pub production_index: usize,
    pub pos: ProductRecord,
    pub production: ProductRecord,
    pub score: u8,
    pub source: MatchSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum MatchDecision {
    AutoMatched { candidate: MatchCandidate },
    NeedsReview { candidate: MatchCandidate },
    Unmatched { pos_index: usize, pos: ProductRecord },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnmatchedPos {
    pub pos_index: usize,
    pub pos: ProductRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductionOnly {
    pub production_index: usize,
    pub production: ProductRecord,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordSide {
    Pos,
    Production,
}

impl RecordSide {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pos => "pos",
            Self::Production => "production",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ReconcileWarning {
    pub side: RecordSide,
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MemoryWrite {
    pub pos_name_normalized: String,
    pub production_name_normalized: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MemoryEntry {
    pub pos_name_normalized: String,
    pub production_name_normalized: String,
    #[serde(with = "time::serde::rfc3339")]
    pub confirmed_at: OffsetDateTime,
}

/// In-memory view of the persisted confirmed-match table, loaded once per run.
/// Keyed by normalized POS name; at most one target per key, last write wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct MemorySnapshot {
    entries: BTreeMap<String, String>,
}

impl MemorySnapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut snapshot = Self::new();
        for (pos_name_normalized, production_name_normalized) in entries {
            snapshot.insert(pos_name_normalized, production_name_normalized);
        }
        snapshot
    }

    pub fn insert(&mut self, pos_name_normalized: String, production_name_normalized: String) {
        self.entries.insert(pos_name_normalized, production_name_normalized);
    }

    #[must_use]
    pub fn lookup(&self, pos_name_normalized: &str) -> Option<&str> {
        self.entries.get(pos_name_normalized).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    Confirm { production_index: usize },
    Reject { production_index: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ReconcileSummary {
    pub pos_products: usize,
    pub production_products: usize,
    pub auto_matched: usize,
    pub needs_review: usize,
    pub unmatched: usize,
    pub production_only: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconcileReport {
    pub auto_matched: Vec<MatchCandidate>,
    pub needs_review: Vec<MatchCandidate>,
    pub unmatched: Vec<UnmatchedPos>,
    pub production_only: Vec<ProductionOnly>,
    pub summary: ReconcileSummary,
    pub warnings: Vec<ReconcileWarning>,
    pub confirmed_memory_writes: Vec<MemoryWrite>,
}

/// Reconcile a POS product list against a production product list.
///
/// Each POS record is resolved in input order: a review override wins outright,
/// then a Match Memory hit, then computed scoring against the remaining
/// (unconsumed) production pool. Production records are consumed one-to-one by
/// auto-matches and confirmed overrides; whatever is never consumed comes back
/// in the production-only bucket. Malformed rows are skipped and reported in
/// `warnings` instead of aborting the run. The engine performs no I/O:
/// confirmed overrides surface in `confirmed_memory_writes` for the caller to
/// persist.
#[must_use]
pub fn reconcile(
    pos_records: &[ProductRecord],
    production_records: &[ProductRecord],
    memory: &MemorySnapshot,
    overrides: &BTreeMap<usize, ReviewDecision>,
) -> ReconcileReport {
    let mut warnings: Vec<ReconcileWarning> = Vec::new();
    let mut confirmed_memory_writes: Vec<MemoryWrite> = Vec::new();

    let mut available: BTreeSet<usize> = BTreeSet::new();
    let mut production_norms: Vec<Option<NormalizedName>> =
        Vec::with_capacity(production_records.len());
    for (index, record) in production_records.iter().enumerate() {
        match record.validate() {
            Ok(()) => {
                production_norms.push(Some(normalize(&record.name)));
                available.insert(index);
            }
            Err(err) => {
                warnings.push(ReconcileWarning {
                    side: RecordSide::Production,
                    index,
                    reason: err.to_string(),
                });
                production_norms.push(None);
            }
        }
    }

    let mut auto_matched: Vec<MatchCandidate> = Vec::new();
    let mut needs_review: Vec<MatchCandidate> = Vec::new();
    let mut unmatched: Vec<UnmatchedPos> = Vec::new();

    for (pos_index, pos) in pos_records.iter().enumerate() {
        if let Err(err) = pos.validate() {
            warnings.push(ReconcileWarning {
                side: RecordSide::Pos,
                index: pos_index,
                reason: err.to_string(),
            });
            continue;
        }

        let pos_norm = normalize(&pos.name);

        let mut rejected: Option<usize> = None;
        match overrides.get(&pos_index) {
            Some(ReviewDecision::Confirm { production_index }) => {
                let target = *production_index;
                let target_norm = if available.contains(&target) {
                    production_norms.get(target).and_then(Option::as_ref)
                } else {
                    None
                };
                if let Some(production_norm) = target_norm {
                    confirmed_memory_writes.push(MemoryWrite {
                        pos_name_normalized: pos_norm.as_str().to_string(),
                        production_name_normalized: production_norm.as_str().to_string(),
                    });
                    available.remove(&target);
                    auto_matched.push(MatchCandidate {
                        pos_index,
                        production_index: target,
                        pos: pos.clone(),
                        production: production_records[target].clone(),
                        score: 100,
                        source: MatchSource::Confirmed,
                    });
                    continue;
                }

                warnings.push(ReconcileWarning {
                    side: RecordSide::Pos,
                    index: pos_index,
                    reason: format!(
                        "confirm override references unavailable production index {target}; falling back to scoring"
                    ),
                });
            }
            Some(ReviewDecision::Reject { production_index }) => {
                rejected = Some(*production_index);
            }
            None => {}
        }

        let decision = decide_by_memory_or_score(
            pos_index,
            pos,
            &pos_norm,
            production_records,
            &production_norms,
            &mut available,
            memory,
            rejected,
        );

        match decision {
            MatchDecision::AutoMatched { candidate } => auto_matched.push(candidate),
            MatchDecision::NeedsReview { candidate } => needs_review.push(candidate),
            MatchDecision::Unmatched { pos_index, pos } => {
                unmatched.push(UnmatchedPos { pos_index, pos });
            }
        }
    }

    let production_only: Vec<ProductionOnly> = available
        .iter()
        .map(|index| ProductionOnly {
            production_index: *index,
            production: production_records[*index].clone(),
        })
        .collect();

    let summary = ReconcileSummary {
        pos_products: pos_records.len(),
        production_products: production_records.len(),
        auto_matched: auto_matched.len(),
        needs_review: needs_review.len(),
        unmatched: unmatched.len(),
        production_only: production_only.len(),
    };

    ReconcileReport {
        auto_matched,
        needs_review,
        unmatched,
        production_only,
        summary,
        warnings,
        confirmed_memory_writes,
    }
}

#[allow(clippy::too_many_arguments)]
fn decide_by_memory_or_score(
    pos_index: usize,
    pos: &ProductRecord,
    pos_norm: &NormalizedName,
    production_records: &[ProductRecord],
    production_norms: &[Option<NormalizedName>],
    available: &mut BTreeSet<usize>,
    memory: &MemorySnapshot,
    rejected: Option<usize>,
) -> MatchDecision {
    if let Some(target) = memory.lookup(pos_norm.as_str()) {
        let hit = available.iter().copied().find(|index| {
            Some(*index) != rejected
                && production_norms[*index]
                    .as_ref()
                    .is_some_and(|norm| norm.as_str() == target)
        });
        if let Some(index) = hit {
            available.remove(&index);
            return MatchDecision::AutoMatched {
                candidate: MatchCandidate {
                    pos_index,
                    production_index: index,
                    pos: pos.clone(),
                    production: production_records[index].clone(),
                    score: 100,
                    source: MatchSource::Memory,
                },
            };
        }
    }

    let mut best: Option<(usize, u8)> = None;
    for index in available.iter().copied() {
        if Some(index) == rejected {
            continue;
        }
        let Some(production_norm) = production_norms[index].as_ref() else {
            continue;
        };

        let value = score(
            pos_norm,
            production_norm,
            &pos.category,
            &production_records[index].category,
        );
        // Strict greater-than keeps the first production occurrence on ties.
        let is_better = match best {
            None => true,
            Some((_, best_value)) => value > best_value,
        };
        if is_better {
            best = Some((index, value));
        }
    }

    match best {
        Some((index, value)) if value >= AUTO_MATCH_THRESHOLD => {
            available.remove(&index);
            MatchDecision::AutoMatched {
                candidate: MatchCandidate {
                    pos_index,
                    production_index: index,
                    pos: pos.clone(),
                    production: production_records[index].clone(),
                    score: value,
                    source: MatchSource::Computed,
                },
            }
        }
        Some((index, value)) if value >= REVIEW_THRESHOLD => MatchDecision::NeedsReview {
            candidate: MatchCandidate {
                pos_index,
                production_index: index,
                pos: pos.clone(),
                production: production_records[index].clone(),
                score: value,
                source: MatchSource::Computed,
            },
        },
        _ => MatchDecision::Unmatched { pos_index, pos: pos.clone() },
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryThreshold {
    pub reorder_below: f64,
    pub order_quantity: f64,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryThresholds {
    categories: BTreeMap<String, CategoryThreshold>,
    #[serde(default)]
    default: Option<CategoryThreshold>,
}

impl CategoryThresholds {
    /// The seeded restock table: extract categories at 10/28 g, carts at
    /// 20/50, prerolls at 50/100, flower at 100/448 g, with a 10/28 `units`
    /// fallback for anything unrecognized.
    #[must_use]
    pub fn standard() -> Self {
        let rows: [(&str, f64, f64, &str); 9] = [
            ("Shatter", 10.0, 28.0, "g"),
            ("Badder", 10.0, 28.0, "g"),
            ("Sugar", 10.0, 28.0, "g"),
            ("Live Resin", 10.0, 28.0, "g"),
            ("Rosin", 10.0, 28.0, "g"),
            ("Diamonds", 10.0, 28.0, "g"),
            ("Full Spec Oil", 20.0, 50.0, "carts"),
            ("Prerolls", 50.0, 100.0, "units"),
            ("Flower", 100.0, 448.0, "g"),
        ];

        let mut categories = BTreeMap::new();
        for (name, reorder_below, order_quantity, unit) in rows {
            categories.insert(
                name.to_string(),
                CategoryThreshold { reorder_below, order_quantity, unit: unit.to_string() },
            );
        }

        Self {
            categories,
            default: Some(CategoryThreshold {
                reorder_below: 10.0,
                order_quantity: 28.0,
                unit: "units".to_string(),
            }),
        }
    }

    #[must_use]
    pub fn from_table(
        categories: BTreeMap<String, CategoryThreshold>,
        default: Option<CategoryThreshold>,
    ) -> Self {
        Self { categories, default }
    }

    /// Case-insensitive category lookup, falling back to the default
    /// threshold when the category is unrecognized.
    #[must_use]
    pub fn lookup(&self, category: &str) -> Option<&CategoryThreshold> {
        self.categories
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(category.trim()))
            .map(|(_, threshold)| threshold)
            .or_else(|| self.default.as_ref())
    }
}

impl Default for CategoryThresholds {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Normal,
}

impl Priority {
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderReason {
    OutOfStock,
    LowStock,
    NewProduct,
}

impl OrderReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OutOfStock => "out_of_stock",
            Self::LowStock => "low_stock",
            Self::NewProduct => "new_product",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderLineItem {
    pub product_name: String,
    pub category: String,
    pub pos_quantity: f64,
    pub production_available: f64,
    pub requested_quantity: f64,
    pub unit: String,
    pub priority: Priority,
    pub reason: OrderReason,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct OrderSummary {
    pub critical: usize,
    pub high: usize,
    pub new_products: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderResult {
    pub order_items: Vec<OrderLineItem>,
    pub summary: OrderSummary,
}

/// Derive a prioritized restock order from reconciliation output.
///
/// Matched pairs enter the order only when the POS side is out of stock
/// (critical) or below the category's reorder threshold (high); well-stocked
/// pairs are filtered out. Production-only items are always ordered at normal
/// priority as not-yet-carried products. Requested quantities are the fixed
/// per-category restock pack, never a computed gap-fill. Items come back
/// critical first, then high, then normal, stable within each tier.
///
/// # Errors
/// Returns [`CoreError::Configuration`] when a category has no threshold row
/// and the table carries no default.
pub fn build_order(
    matched: &[MatchCandidate],
    production_only: &[ProductionOnly],
    thresholds: &CategoryThresholds,
) -> Result<OrderResult, CoreError> {
    let mut critical: Vec<OrderLineItem> = Vec::new();
    let mut high: Vec<OrderLineItem> = Vec::new();
    let mut normal: Vec<OrderLineItem> = Vec::new();

    for candidate in matched {
        let category = order_category(candidate);
        let threshold = lookup_threshold(thresholds, category)?;

        if candidate.pos.quantity <= 0.0 {
            critical.push(OrderLineItem {
                product_name: candidate.pos.name.clone(),
                category: category.to_string(),
                pos_quantity: candidate.pos.quantity,
                production_available: candidate.production.quantity,
                requested_quantity: threshold.order_quantity,
                unit: threshold.unit.clone(),
                priority: Priority::Critical,
                reason: OrderReason::OutOfStock,
            });
        } else if candidate.pos.quantity < threshold.reorder_below {
            high.push(OrderLineItem {
                product_name: candidate.pos.name.clone(),
                category: category.to_string(),
                pos_quantity: candidate.pos.quantity,
                production_available: candidate.production.quantity,
                requested_quantity: threshold.order_quantity,
                unit: threshold.unit.clone(),
                priority: Priority::High,
                reason: OrderReason::LowStock,
            });
        }
    }

    for entry in production_only {
        let category = entry.production.category.as_str();
        let threshold = lookup_threshold(thresholds, category)?;
        normal.push(OrderLineItem {
            product_name: entry.production.name.clone(),
            category: category.to_string(),
            pos_quantity: 0.0,
            production_available: entry.production.quantity,
            requested_quantity: threshold.order_quantity,
            unit: threshold.unit.clone(),
            priority: Priority::Normal,
            reason: OrderReason::NewProduct,
        });
    }

    let summary = OrderSummary {
        critical: critical.len(),
        high: high.len(),
        new_products: normal.len(),
        total: critical.len() + high.len() + normal.len(),
    };

    let mut order_items = critical;
    order_items.append(&mut high);
    order_items.append(&mut normal);

    Ok(OrderResult { order_items, summary })
}

fn order_category(candidate: &MatchCandidate) -> &str {
    if candidate.production.category.trim().is_empty() {
        candidate.pos.category.as_str()
    } else {
        candidate.production.category.as_str()
    }
}

fn lookup_threshold<'a>(
    thresholds: &'a CategoryThresholds,
    category: &str,
) -> Result<&'a CategoryThreshold, CoreError> {
    thresholds.lookup(category).ok_or_else(|| {
        CoreError::Configuration(format!(
            "no threshold configured for category `{category}` and no default available"
        ))
    })
}
