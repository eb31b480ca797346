//! End-to-end scenarios exercising the full pipeline through [`territory_engine::run`].

use async_trait::async_trait;

use territory_core::config::{LPConfiguration, PriorityItem};
use territory_core::entities::{Account, AccountId, Assignment, Rep, RepId};
use territory_data::{Page, Repository, RepositoryResult};
use territory_engine::{run, EngineOptions, RunMode};

struct FixtureRepository {
    accounts: Vec<Account>,
    reps: Vec<Rep>,
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
    ) -> RepositoryResult<Page<territory_core::entities::Opportunity>> {
        Ok(Page {
            rows: Vec::new(),
            next_cursor: None,
        })
    }
    async fn fetch_config(&self, _build_id: &str) -> RepositoryResult<LPConfiguration> {
        Ok(self.config.clone())
    }
    async fn persist_assignments(
        &self,
        _build_id: &str,
        _assignments: &[Assignment],
    ) -> RepositoryResult<()> {
        Ok(())
    }
    async fn persist_telemetry(&self, _row_json: &str) -> RepositoryResult<()> {
        Ok(())
    }
}

fn account(id: &str, arr: f64, owner: Option<&str>, geo: Option<&str>) -> Account {
    Account {
        id: AccountId::new(id),
        parent_id: None,
        is_customer_flag: arr > 0.0,
        is_strategic: false,
        exclude_from_reassignment: false,
        arr: Some(arr),
        calculated_arr: None,
        hierarchy_bookings_arr: None,
        direct_atr: 0.0,
        atr: 0.0,
        pipeline_value: 0.0,
        employees: None,
        sales_territory: geo.map(String::from),
        geo: None,
        expansion_tier: None,
        initial_sale_tier: None,
        pe_firm: None,
        cre_risk: false,
        renewal_date: None,
        owner_id: owner.map(RepId::new),
        owner_change_date: None,
        owners_lifetime_count: 1,
        child_ids: Vec::new(),
    }
}

fn rep(id: &str, region: Option<&str>) -> Rep {
    Rep {
        id: RepId::new(id),
        name: id.into(),
        region: region.map(String::from),
        team_tier: None,
        is_active: true,
        include_in_assignments: true,
        is_manager: false,
        is_strategic_rep: false,
        is_backfill_source: false,
        is_backfill_target: false,
        backfill_target_rep_id: None,
    }
}

fn find_rep_for<'a>(assignments: &'a [Assignment], account_id: &str) -> &'a RepId {
    &assignments
        .iter()
        .find(|a| a.account_id == AccountId::new(account_id))
        .unwrap_or_else(|| panic!("no assignment for {account_id}"))
        .rep_id
}

#[tokio::test]
async fn s1_minimal_symmetric_keeps_existing_owners() {
    let repo = FixtureRepository {
        accounts: vec![
            account("A1", 100.0, Some("R1"), Some("West")),
            account("A2", 100.0, Some("R2"), Some("West")),
        ],
        reps: vec![rep("R1", Some("West")), rep("R2", Some("West"))],
        config: LPConfiguration::default(),
    };

    let outcome = run(&repo, "s1", EngineOptions::default()).await.unwrap();

    assert_eq!(find_rep_for(&outcome.customer_assignments, "A1"), &RepId::new("R1"));
    assert_eq!(find_rep_for(&outcome.customer_assignments, "A2"), &RepId::new("R2"));
}

#[tokio::test]
async fn s2_strategic_accounts_never_cross_into_the_regular_pool() {
    let mut a1 = account("A1", 1000.0, None, None);
    a1.is_strategic = true;
    let a2 = account("A2", 1000.0, None, None);

    let mut r1 = rep("R1", None);
    r1.is_strategic_rep = true;
    let r2 = rep("R2", None);

    let repo = FixtureRepository {
        accounts: vec![a1, a2],
        reps: vec![r1, r2],
        config: LPConfiguration::default(),
    };

    let outcome = run(&repo, "s2", EngineOptions::default()).await.unwrap();
    let all: Vec<&Assignment> = outcome
        .customer_assignments
        .iter()
        .chain(outcome.prospect_assignments.iter())
        .collect();

    assert_eq!(
        all.iter().find(|a| a.account_id == AccountId::new("A1")).unwrap().rep_id,
        RepId::new("R1")
    );
    assert_eq!(
        all.iter().find(|a| a.account_id == AccountId::new("A2")).unwrap().rep_id,
        RepId::new("R2")
    );
}

#[tokio::test]
async fn s3_lock_overrides_balance_pressure() {
    let mut a1 = account("A1", 1000.0, Some("R1"), Some("West"));
    a1.cre_risk = true;
    let a2 = account("A2", 100.0, Some("R2"), Some("West"));

    let repo = FixtureRepository {
        accounts: vec![a1, a2],
        reps: vec![rep("R1", Some("West")), rep("R2", Some("West"))],
        config: LPConfiguration::default(),
    };

    let outcome = run(&repo, "s3", EngineOptions::default()).await.unwrap();
    assert_eq!(find_rep_for(&outcome.customer_assignments, "A1"), &RepId::new("R1"));
    assert_eq!(find_rep_for(&outcome.customer_assignments, "A2"), &RepId::new("R2"));
}

#[tokio::test]
async fn s4_children_follow_their_parent() {
    let mut parent = account("P", 0.0, None, Some("West"));
    parent.direct_atr = 0.0;
    parent.child_ids = vec![AccountId::new("C1"), AccountId::new("C2")];
    let mut c1 = account("C1", 400.0, None, Some("West"));
    c1.parent_id = Some(AccountId::new("P"));
    c1.direct_atr = 400.0;
    let mut c2 = account("C2", 200.0, None, Some("West"));
    c2.parent_id = Some(AccountId::new("P"));
    c2.direct_atr = 200.0;
    let q = account("Q", 300.0, None, Some("West"));

    let repo = FixtureRepository {
        accounts: vec![parent, c1, c2, q],
        reps: vec![rep("R1", Some("West")), rep("R2", Some("West"))],
        config: LPConfiguration::default(),
    };

    let outcome = run(&repo, "s4", EngineOptions::default()).await.unwrap();
    let all = outcome.customer_assignments;
    let p_rep = find_rep_for(&all, "P").clone();
    assert_eq!(find_rep_for(&all, "C1"), &p_rep);
    assert_eq!(find_rep_for(&all, "C2"), &p_rep);
    let q_rep = find_rep_for(&all, "Q");
    assert_ne!(q_rep, &p_rep);
}

#[tokio::test]
async fn s5_backfill_migration_routes_to_target_with_rationale() {
    let mut r1 = rep("R1", Some("West"));
    r1.is_backfill_source = true;
    r1.backfill_target_rep_id = Some(RepId::new("R3"));
    let r3 = rep("R3", Some("West"));
    let a1 = account("A1", 500.0, Some("R1"), Some("West"));

    let repo = FixtureRepository {
        accounts: vec![a1],
        reps: vec![r1, r3],
        config: LPConfiguration::default(),
    };

    let outcome = run(&repo, "s5", EngineOptions::default()).await.unwrap();
    let assignment = outcome
        .customer_assignments
        .iter()
        .find(|a| a.account_id == AccountId::new("A1"))
        .unwrap();
    assert_eq!(assignment.rep_id, RepId::new("R3"));
    let rationale = territory_milp::rationale_for(assignment);
    assert!(rationale.contains("backfill"));
}

#[tokio::test]
async fn s6_waterfall_priority_order_changes_the_winning_dimension() {
    let mut smb = account("SMB", 50.0, Some("R_CONTINUITY"), Some("West"));
    smb.employees = Some(20);
    let accounts = vec![
        smb,
        account("A2", 400.0, None, Some("West")),
        account("A3", 300.0, None, Some("West")),
        account("A4", 200.0, None, Some("West")),
        account("A5", 150.0, None, Some("West")),
        account("A6", 100.0, None, Some("West")),
    ];

    let mut continuity_rep = rep("R_CONTINUITY", Some("West"));
    continuity_rep.team_tier = Some(territory_core::entities::TeamTier::Ent);
    let mut ent_rep = rep("R_ENT", Some("West"));
    ent_rep.team_tier = Some(territory_core::entities::TeamTier::Ent);
    let mut smb_rep = rep("R_SMB", Some("West"));
    smb_rep.team_tier = Some(territory_core::entities::TeamTier::Smb);

    let reps = vec![continuity_rep, ent_rep, smb_rep];

    let mut team_first_config = LPConfiguration::default();
    team_first_config.priority_config =
        vec![PriorityItem::TeamAlignment, PriorityItem::Continuity];

    let mut continuity_first_config = LPConfiguration::default();
    continuity_first_config.priority_config =
        vec![PriorityItem::Continuity, PriorityItem::TeamAlignment];

    let team_first_repo = FixtureRepository {
        accounts: accounts.clone(),
        reps: reps.clone(),
        config: team_first_config,
    };
    let continuity_first_repo = FixtureRepository {
        accounts,
        reps,
        config: continuity_first_config,
    };

    let team_first = run(
        &team_first_repo,
        "s6a",
        EngineOptions {
            mode: RunMode::Waterfall,
            ..EngineOptions::default()
        },
    )
    .await
    .unwrap();
    let continuity_first = run(
        &continuity_first_repo,
        "s6b",
        EngineOptions {
            mode: RunMode::Waterfall,
            ..EngineOptions::default()
        },
    )
    .await
    .unwrap();

    let team_first_smb_rep = find_rep_for(&team_first.customer_assignments, "SMB");
    let continuity_first_smb_rep = find_rep_for(&continuity_first.customer_assignments, "SMB");
    assert_ne!(team_first_smb_rep, continuity_first_smb_rep);
}
