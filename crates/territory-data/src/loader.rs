//! Data loader & aggregator (§4.2, component C2).

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use territory_core::config::LPConfiguration;
use territory_core::entities::{Account, AccountId, Opportunity, Rep, RepId};
use territory_core::error::{EngineError, EngineWarning};

use crate::repository::{Page, Repository, RepositoryError, RepositoryResult};

/// Bounded at the loader boundary; matches §5's default of 4 concurrent
/// in-flight page fetches across entity kinds.
pub const MAX_CONCURRENT_REQUESTS: usize = 4;
const MAX_RETRY_ATTEMPTS: usize = 3;

/// Account size tier used only for the MILP's per-tier balance metric
/// (distinct from [`territory_core::entities::TeamTier`], which scores
/// account/rep alignment). Derived from `expansion_tier`/`initial_sale_tier`
/// free text via the regex/lookup step in §4.2 step 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeTier {
    Tier1,
    Tier2,
    Tier3,
    Tier4,
}

impl SizeTier {
    pub const ALL: [SizeTier; 4] = [
        SizeTier::Tier1,
        SizeTier::Tier2,
        SizeTier::Tier3,
        SizeTier::Tier4,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SizeTier::Tier1 => "tier1",
            SizeTier::Tier2 => "tier2",
            SizeTier::Tier3 => "tier3",
            SizeTier::Tier4 => "tier4",
        }
    }

    /// Parse a free-text tier label like `"Tier 1"`, `"T2"`, `"tier-3"`.
    fn parse(raw: &str) -> Option<SizeTier> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        match digits.as_str() {
            "1" => Some(SizeTier::Tier1),
            "2" => Some(SizeTier::Tier2),
            "3" => Some(SizeTier::Tier3),
            "4" => Some(SizeTier::Tier4),
            _ => None,
        }
    }
}

/// Resolve an account's size tier from its `expansion_tier` then
/// `initial_sale_tier` strings, falling back to `None` (unknown).
pub fn account_size_tier(account: &Account) -> Option<SizeTier> {
    account
        .expansion_tier
        .as_deref()
        .and_then(SizeTier::parse)
        .or_else(|| account.initial_sale_tier.as_deref().and_then(SizeTier::parse))
}

/// Fully loaded and aggregated build data (§6.3 `LoadedBuildData`).
#[derive(Debug, Clone)]
pub struct LoadedBuildData {
    /// All accounts, keyed by id, with child ATR already rolled into parents
    /// and `child_ids` populated.
    pub accounts: HashMap<AccountId, Account>,
    /// Order accounts were loaded in, for deterministic downstream sorting.
    pub account_order: Vec<AccountId>,
    pub parent_ids: Vec<AccountId>,
    /// Eligible reps (active, included, non-manager), partitioned.
    pub strategic_reps: Vec<Rep>,
    pub regular_reps: Vec<Rep>,
    pub pipeline_map: HashMap<AccountId, f64>,
    pub config: LPConfiguration,
    pub warnings: Vec<EngineWarning>,
}

impl LoadedBuildData {
    pub fn all_reps(&self) -> impl Iterator<Item = &Rep> {
        self.strategic_reps.iter().chain(self.regular_reps.iter())
    }
}

/// Retry a fallible async page fetch with exponential backoff, honoring the
/// "transient vs permanent" distinction from §5/§7: only transient failures
/// are retried, up to [`MAX_RETRY_ATTEMPTS`].
async fn fetch_with_retry<T, F, Fut>(label: &str, mut f: F) -> RepositoryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RepositoryResult<T>>,
{
    let mut attempt = 0usize;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < MAX_RETRY_ATTEMPTS => {
                attempt += 1;
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt as u32));
                warn!(label, attempt, ?backoff, "transient fetch failure, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Fetch every page for one entity kind, bounded by the shared semaphore.
async fn fetch_all<T, F, Fut>(
    label: &'static str,
    build_id: &str,
    semaphore: Arc<Semaphore>,
    mut page_fn: F,
) -> Result<Vec<T>, EngineError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = RepositoryResult<Page<T>>>,
{
    let mut rows = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let _permit = semaphore
            .acquire()
            .await
            .expect("semaphore never closed during a load");
        let cursor_ref = cursor.clone();
        let page = fetch_with_retry(label, || page_fn(cursor_ref.clone()))
            .await
            .map_err(|e| EngineError::DataLoad(format!("{label}: {e}")))?;
        drop(_permit);
        debug!(label, fetched = page.rows.len(), "fetched page");
        let next = page.next_cursor.clone();
        rows.extend(page.rows);
        match next {
            Some(c) => cursor = Some(c),
            None => break,
        }
    }
    Ok(rows)
}

/// Run the full load-and-aggregate pipeline for one build (§4.2).
pub async fn load_build(
    repository: &dyn Repository,
    build_id: &str,
) -> Result<LoadedBuildData, EngineError> {
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS));

    let config = fetch_with_retry("config", || repository.fetch_config(build_id))
        .await
        .map_err(|e| EngineError::DataLoad(format!("config: {e}")))?;

    let (accounts_raw, reps_raw, opps_raw) = tokio::join!(
        fetch_all("accounts", build_id, semaphore.clone(), |cursor| async move {
            repository.fetch_accounts_page(build_id, cursor.as_deref()).await
        }),
        fetch_all("reps", build_id, semaphore.clone(), |cursor| async move {
            repository.fetch_reps_page(build_id, cursor.as_deref()).await
        }),
        fetch_all("opportunities", build_id, semaphore.clone(), |cursor| async move {
            repository.fetch_opportunities_page(build_id, cursor.as_deref()).await
        }),
    );
    let accounts_raw = accounts_raw?;
    let reps_raw = reps_raw?;
    let opps_raw = opps_raw?;

    let mut warnings = Vec::new();

    let mut accounts: HashMap<AccountId, Account> = HashMap::new();
    let mut account_order = Vec::new();
    for account in accounts_raw {
        account_order.push(account.id.clone());
        accounts.insert(account.id.clone(), account);
    }

    // Step 4: pipeline map, built before rollup so `is_customer` reflects the
    // account's own flag/ARR (leaf-level classification is sufficient for
    // eligibility since only customer-vs-prospect matters here).
    let pipeline_map = build_pipeline_map(&accounts, &opps_raw);

    // Steps 2-3: fold children into parents (ATR rollup + child_ids).
    let parent_ids = aggregate_hierarchy(&mut accounts, &account_order);

    // Apply opportunity-derived ATR and renewal_date directly (in addition to
    // whatever the repository already populated), then roll ATR up again
    // since direct ATR may have just changed.
    apply_opportunity_derived_fields(&mut accounts, &opps_raw);
    recompute_atr_rollup(&mut accounts, &parent_ids);

    // Step 6-7: filter and partition reps.
    let mut strategic_reps = Vec::new();
    let mut regular_reps = Vec::new();
    for rep in reps_raw {
        if !rep.is_eligible() {
            continue;
        }
        if rep.is_strategic_rep {
            strategic_reps.push(rep);
        } else {
            regular_reps.push(rep);
        }
    }

    if strategic_reps.is_empty() {
        let strategic_account_count = accounts.values().filter(|a| a.is_strategic).count();
        if strategic_account_count > 0 {
            warnings.push(EngineWarning::StrategicPoolEmpty {
                account_count: strategic_account_count,
            });
        }
    }

    Ok(LoadedBuildData {
        accounts,
        account_order,
        parent_ids,
        strategic_reps,
        regular_reps,
        pipeline_map,
        config,
        warnings,
    })
}

fn build_pipeline_map(
    accounts: &HashMap<AccountId, Account>,
    opps: &[Opportunity],
) -> HashMap<AccountId, f64> {
    let mut map: HashMap<AccountId, f64> = HashMap::new();
    for opp in opps {
        let Some(account) = accounts.get(&opp.account_id) else {
            continue;
        };
        let is_customer = territory_core::calc::is_customer_leaf(account);
        if territory_core::calc::pipeline_eligible(opp.opp_type, is_customer) {
            *map.entry(opp.account_id.clone()).or_insert(0.0) += opp.value();
        }
    }
    map
}

/// Returns the list of parent account ids. Children have their id appended
/// to the parent's `child_ids`, and direct ATR accumulated; the final
/// `atr = direct + Σ children` rollup happens in
/// [`recompute_atr_rollup`] once opportunity-derived direct ATR lands.
fn aggregate_hierarchy(
    accounts: &mut HashMap<AccountId, Account>,
    order: &[AccountId],
) -> Vec<AccountId> {
    let child_links: Vec<(AccountId, AccountId)> = order
        .iter()
        .filter_map(|id| {
            let account = accounts.get(id)?;
            account.parent_id.clone().map(|parent| (parent, id.clone()))
        })
        .collect();

    for (parent_id, child_id) in &child_links {
        if let Some(parent) = accounts.get_mut(parent_id) {
            if !parent.child_ids.contains(child_id) {
                parent.child_ids.push(child_id.clone());
            }
        }
    }

    order
        .iter()
        .filter(|id| accounts.get(*id).map(|a| a.is_parent()).unwrap_or(false))
        .cloned()
        .collect()
}

fn apply_opportunity_derived_fields(accounts: &mut HashMap<AccountId, Account>, opps: &[Opportunity]) {
    use territory_core::entities::OpportunityType;

    let mut renewal_atr: HashMap<AccountId, f64> = HashMap::new();
    let mut earliest_renewal: HashMap<AccountId, chrono::NaiveDate> = HashMap::new();

    for opp in opps {
        if opp.opp_type == OpportunityType::Renewal {
            *renewal_atr.entry(opp.account_id.clone()).or_insert(0.0) += opp.value();
        }
        if let Some(date) = opp.renewal_event_date {
            earliest_renewal
                .entry(opp.account_id.clone())
                .and_modify(|d| *d = (*d).min(date))
                .or_insert(date);
        }
    }

    for (account_id, atr) in renewal_atr {
        if let Some(account) = accounts.get_mut(&account_id) {
            account.direct_atr += atr.max(0.0);
        }
    }
    for (account_id, date) in earliest_renewal {
        if let Some(account) = accounts.get_mut(&account_id) {
            account.renewal_date = Some(match account.renewal_date {
                Some(existing) => existing.min(date),
                None => date,
            });
        }
    }
}

/// `atr(parent) = direct_atr(parent) + Σ child.atr` (§3.2 invariant 5).
/// Hierarchy depth is at most 2 for assignment purposes (§9), so a single
/// pass over parents is sufficient.
fn recompute_atr_rollup(accounts: &mut HashMap<AccountId, Account>, parent_ids: &[AccountId]) {
    for parent_id in parent_ids {
        let child_ids = accounts
            .get(parent_id)
            .map(|p| p.child_ids.clone())
            .unwrap_or_default();
        let mut child_total = 0.0;
        for child_id in &child_ids {
            if let Some(child) = accounts.get_mut(child_id) {
                child.atr = child.direct_atr.max(0.0);
                child_total += child.atr;
            }
        }
        if let Some(parent) = accounts.get_mut(parent_id) {
            parent.atr = parent.direct_atr.max(0.0) + child_total;
        }
    }
    // Orphan children with no parent in scope are rolled up onto themselves.
    let ids: Vec<AccountId> = accounts.keys().cloned().collect();
    for id in ids {
        let needs_self_rollup = accounts
            .get(&id)
            .map(|a| a.is_child() && !parent_ids.contains(a.parent_id.as_ref().unwrap()))
            .unwrap_or(false);
        if needs_self_rollup {
            if let Some(account) = accounts.get_mut(&id) {
                account.atr = account.direct_atr.max(0.0);
            }
        }
    }
}

/// Reps that opt out of assignment consideration never appear in either
/// partition; this is purely a documentation alias for callers checking
/// eligibility outside the loader.
pub fn eligible_rep_ids(data: &LoadedBuildData) -> HashSet<RepId> {
    data.all_reps().map(|r| r.id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryResult;
    use async_trait::async_trait;
    use territory_core::entities::{OpportunityType, TeamTier};

    struct FixtureRepository {
        accounts: Vec<Account>,
        reps: Vec<Rep>,
        opps: Vec<Opportunity>,
        config: LPConfiguration,
    }

    #[async_trait]
    impl Repository for FixtureRepository {
        async fn fetch_accounts_page(
            &self,
            _build_id: &str,
            _cursor: Option<&str>,
        ) -> RepositoryResult<Page<Account>> {
            Ok(Page {
                rows: self.accounts.clone(),
                next_cursor: None,
            })
        }
        async fn fetch_reps_page(
            &self,
            _build_id: &str,
            _cursor: Option<&str>,
        ) -> RepositoryResult<Page<Rep>> {
            Ok(Page {
                rows: self.reps.clone(),
                next_cursor: None,
            })
        }
        async fn fetch_opportunities_page(
            &self,
            _build_id: &str,
            _cursor: Option<&str>,
        ) -> RepositoryResult<Page<Opportunity>> {
            Ok(Page {
                rows: self.opps.clone(),
                next_cursor: None,
            })
        }
        async fn fetch_config(&self, _build_id: &str) -> RepositoryResult<LPConfiguration> {
            Ok(self.config.clone())
        }
        async fn persist_assignments(
            &self,
            _build_id: &str,
            _assignments: &[territory_core::entities::Assignment],
        ) -> RepositoryResult<()> {
            Ok(())
        }
        async fn persist_telemetry(&self, _row_json: &str) -> RepositoryResult<()> {
            Ok(())
        }
    }

    fn account(id: &str, parent: Option<&str>) -> Account {
        Account {
            id: AccountId::new(id),
            parent_id: parent.map(AccountId::new),
            is_customer_flag: false,
            is_strategic: false,
            exclude_from_reassignment: false,
            arr: Some(100.0),
            calculated_arr: None,
            hierarchy_bookings_arr: None,
            direct_atr: 10.0,
            atr: 0.0,
            pipeline_value: 0.0,
            employees: Some(50),
            sales_territory: Some("CA".into()),
            geo: None,
            expansion_tier: Some("Tier 2".into()),
            initial_sale_tier: None,
            pe_firm: None,
            cre_risk: false,
            renewal_date: None,
            owner_id: None,
            owner_change_date: None,
            owners_lifetime_count: 1,
            child_ids: Vec::new(),
        }
    }

    fn rep(id: &str, strategic: bool) -> Rep {
        Rep {
            id: RepId::new(id),
            name: id.into(),
            region: Some("WEST".into()),
            team_tier: Some(TeamTier::Growth),
            is_active: true,
            include_in_assignments: true,
            is_manager: false,
            is_strategic_rep: strategic,
            is_backfill_source: false,
            is_backfill_target: false,
            backfill_target_rep_id: None,
        }
    }

    #[tokio::test]
    async fn atr_rolls_up_from_children_to_parent() {
        let parent = account("P", None);
        let child1 = account("C1", Some("P"));
        let child2 = account("C2", Some("P"));
        let repo = FixtureRepository {
            accounts: vec![parent, child1, child2],
            reps: vec![rep("R1", false)],
            opps: vec![],
            config: LPConfiguration::default(),
        };
        let data = load_build(&repo, "build-1").await.unwrap();
        let parent = data.accounts.get(&AccountId::new("P")).unwrap();
        assert_eq!(parent.child_ids.len(), 2);
        assert_eq!(parent.atr, 30.0); // 10 direct + 10 + 10
    }

    #[tokio::test]
    async fn reps_partition_by_strategic_flag() {
        let repo = FixtureRepository {
            accounts: vec![account("A1", None)],
            reps: vec![rep("R1", true), rep("R2", false)],
            opps: vec![],
            config: LPConfiguration::default(),
        };
        let data = load_build(&repo, "build-1").await.unwrap();
        assert_eq!(data.strategic_reps.len(), 1);
        assert_eq!(data.regular_reps.len(), 1);
    }

    #[tokio::test]
    async fn manager_reps_are_filtered_out() {
        let mut manager = rep("R1", false);
        manager.is_manager = true;
        let repo = FixtureRepository {
            accounts: vec![account("A1", None)],
            reps: vec![manager],
            opps: vec![],
            config: LPConfiguration::default(),
        };
        let data = load_build(&repo, "build-1").await.unwrap();
        assert!(data.strategic_reps.is_empty());
        assert!(data.regular_reps.is_empty());
    }

    #[tokio::test]
    async fn pipeline_map_excludes_customer_renewals() {
        let mut customer = account("CUST", None);
        customer.is_customer_flag = true;
        let prospect = account("PROSPECT", None);
        let opps = vec![
            Opportunity {
                id: "o1".into(),
                account_id: AccountId::new("CUST"),
                opp_type: OpportunityType::Renewal,
                net_arr: Some(500.0),
                amount: None,
                renewal_event_date: None,
            },
            Opportunity {
                id: "o2".into(),
                account_id: AccountId::new("CUST"),
                opp_type: OpportunityType::Expansion,
                net_arr: Some(40.0),
                amount: None,
                renewal_event_date: None,
            },
            Opportunity {
                id: "o3".into(),
                account_id: AccountId::new("PROSPECT"),
                opp_type: OpportunityType::Renewal,
                net_arr: Some(20.0),
                amount: None,
                renewal_event_date: None,
            },
        ];
        let repo = FixtureRepository {
            accounts: vec![customer, prospect],
            reps: vec![rep("R1", false)],
            opps,
            config: LPConfiguration::default(),
        };
        let data = load_build(&repo, "build-1").await.unwrap();
        assert_eq!(data.pipeline_map.get(&AccountId::new("CUST")), Some(&40.0));
        assert_eq!(data.pipeline_map.get(&AccountId::new("PROSPECT")), Some(&20.0));
    }

    #[test]
    fn size_tier_parses_common_formats() {
        assert_eq!(SizeTier::parse("Tier 1"), Some(SizeTier::Tier1));
        assert_eq!(SizeTier::parse("T3"), Some(SizeTier::Tier3));
        assert_eq!(SizeTier::parse("tier-4"), Some(SizeTier::Tier4));
        assert_eq!(SizeTier::parse("unknown"), None);
    }
}
