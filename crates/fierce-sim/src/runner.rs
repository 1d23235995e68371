// crates/fierce-sim/src/runner.rs
//
// Scenario runner.
//
// Wires the ledger components into vaults over two in-memory tokens (the
// staking token and a commission token), replays scheduled actions in step
// order, and checks every component's invariants after each action. A
// rejected action is recorded and logged; an invariant violation aborts the
// run.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use fierce_core::{Amount, EventSink, FierceError, Principal, StakeBackend, Step, Timestamp, Token};
use fierce_ledger::{
    CommissionDistributor, Distributor, DurationStakeLedger, InMemoryToken, PoolSummary,
    StakePool, StakingStrategy, Units, Vault, VestingLedger, UNITS_PER_TOKEN,
};

use crate::config::SimConfig;
use crate::scenario::{sort_actions, Action, ScheduledAction};

const DAY_SECONDS: u64 = 24 * 60 * 60;

/// Maps block steps to wall-clock time and logs progress at fixed intervals.
pub struct BlockScheduler {
    current_step: Step,
    seconds_per_step: u64,
    genesis_time: Timestamp,
    report_interval: u64,
}

impl BlockScheduler {
    pub fn new(genesis_time: Timestamp, seconds_per_step: u64, report_interval: u64) -> Self {
        Self {
            current_step: 0,
            seconds_per_step,
            genesis_time,
            report_interval: report_interval.max(1),
        }
    }

    pub fn current_step(&self) -> Step {
        self.current_step
    }

    /// Wall-clock time of the current step.
    pub fn now(&self) -> Timestamp {
        self.genesis_time
            .saturating_add(self.current_step.saturating_mul(self.seconds_per_step))
    }

    /// Advance to `step`, logging every report boundary crossed. Never moves
    /// backwards.
    pub fn advance_to(&mut self, step: Step) {
        while self.current_step < step {
            self.current_step += 1;
            if self.current_step % self.report_interval == 0 {
                tracing::info!(
                    "=== STEP {} === (t={})",
                    self.current_step,
                    self.now()
                );
            } else {
                tracing::trace!("Step {}", self.current_step);
            }
        }
    }
}

/// What happened to one scheduled action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub step: Step,
    pub action: &'static str,
    pub user: Option<String>,
    pub ok: bool,
    pub detail: String,
}

/// Per-account totals collected during the run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountReport {
    pub account: String,
    pub balance: Amount,
    pub commission_balance: Amount,
    pub pool_stake: Amount,
    pub lock_stake: Amount,
    pub pool_rewards: Amount,
    pub lock_rewards: Amount,
    pub commissions: Amount,
    pub vested: Amount,
}

/// Final state of a run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub end_step: Step,
    pub distributor_design: String,
    pub pool: PoolSummary,
    pub lock_reward_pool: Amount,
    pub accounts: Vec<AccountReport>,
    pub actions: Vec<ActionOutcome>,
    pub rejected: usize,
    /// Filled in by the caller once the event logger has drained.
    pub events: BTreeMap<String, usize>,
}

pub struct Simulation {
    scheduler: BlockScheduler,
    end_step: Step,
    token: Arc<InMemoryToken>,
    commission_token: Arc<InMemoryToken>,
    treasury: Principal,
    accounts: BTreeMap<String, Principal>,
    pool: Arc<Vault<StakePool>>,
    locks: Arc<Vault<DurationStakeLedger>>,
    vesting: Vault<VestingLedger>,
    distributor: Vault<Distributor>,
    strategy: StakingStrategy,
    totals: BTreeMap<String, AccountReport>,
    outcomes: Vec<ActionOutcome>,
}

fn tokens(amount: u64) -> Amount {
    amount as Amount * UNITS_PER_TOKEN
}

impl Simulation {
    /// Build the vaults, mint starting balances, and open the emission window
    /// at step 0.
    pub fn new(config: &SimConfig, sink: Arc<dyn EventSink>) -> Result<Self, FierceError> {
        let token = Arc::new(InMemoryToken::new("FRC", config.pool.min_stake));
        let commission_token = Arc::new(InMemoryToken::new("USDC", 0));
        let treasury = Principal::from_label("treasury");

        let pool = Arc::new(Vault::new(
            Principal::from_label("vault:pool"),
            token.clone(),
            sink.clone(),
            StakePool::new(&config.pool)?,
        ));
        let locks = Arc::new(Vault::new(
            Principal::from_label("vault:locks"),
            token.clone(),
            sink.clone(),
            DurationStakeLedger::new(&config.duration)?,
        ));
        let vesting = Vault::new(
            Principal::from_label("vault:vesting"),
            token.clone(),
            sink.clone(),
            VestingLedger::new(),
        );
        let distributor = Vault::new(
            Principal::from_label("vault:commissions"),
            commission_token.clone(),
            sink,
            Distributor::new(&config.distributor)?,
        );
        let strategy = StakingStrategy::Emission(Arc::clone(&pool));

        let mut accounts = BTreeMap::new();
        accounts.insert("treasury".to_string(), treasury);
        for account in &config.accounts {
            let principal = Principal::from_label(&account.label);
            token.mint(&principal, tokens(account.tokens))?;
            commission_token.mint(&principal, tokens(account.commission_tokens))?;
            accounts.insert(account.label.clone(), principal);
        }
        for principal in accounts.values() {
            for spender in [pool.account(), locks.account(), vesting.account()] {
                token.approve(principal, &spender, Amount::MAX);
            }
            commission_token.approve(principal, &distributor.account(), Amount::MAX);
        }

        let window = pool.start_emission(
            treasury,
            0,
            config.emission.duration_steps,
            tokens(config.emission.rate_tokens),
            tokens(config.emission.funding_tokens),
        )?;
        tracing::info!(
            "Emission window steps {}..{} at {} per step",
            window.start_step,
            window.end_step,
            Units(window.rate_per_step)
        );

        Ok(Self {
            scheduler: BlockScheduler::new(
                config.genesis_time,
                config.seconds_per_step,
                config.report_interval,
            ),
            end_step: config.end_step,
            token,
            commission_token,
            treasury,
            accounts,
            pool,
            locks,
            vesting,
            distributor,
            strategy,
            totals: BTreeMap::new(),
            outcomes: Vec::new(),
        })
    }

    /// Replay `actions` and return the final report.
    pub fn run(&mut self, mut actions: Vec<ScheduledAction>) -> Result<Report, FierceError> {
        sort_actions(&mut actions);
        for scheduled in actions {
            if scheduled.at > self.end_step {
                tracing::warn!(
                    "Skipping {} at step {} (past end step {})",
                    scheduled.action.name(),
                    scheduled.at,
                    self.end_step
                );
                continue;
            }
            self.scheduler.advance_to(scheduled.at);
            self.apply(&scheduled.action);
            self.check_invariants()?;
        }
        self.scheduler.advance_to(self.end_step);
        self.pool.update(self.end_step)?;
        self.check_invariants()?;
        Ok(self.report())
    }

    fn apply(&mut self, action: &Action) {
        let step = self.scheduler.current_step();
        let outcome = match self.execute(action) {
            Ok(detail) => {
                tracing::debug!("step {}: {} ok ({})", step, action.name(), detail);
                ActionOutcome {
                    step,
                    action: action.name(),
                    user: action.user().map(str::to_string),
                    ok: true,
                    detail,
                }
            }
            Err(err) => {
                tracing::warn!("step {}: {} rejected: {}", step, action.name(), err);
                ActionOutcome {
                    step,
                    action: action.name(),
                    user: action.user().map(str::to_string),
                    ok: false,
                    detail: err.to_string(),
                }
            }
        };
        self.outcomes.push(outcome);
    }

    fn execute(&mut self, action: &Action) -> Result<String, FierceError> {
        let step = self.scheduler.current_step();
        let now = self.scheduler.now();
        match action {
            Action::Deposit { user, tokens: amount } => {
                let who = self.principal(user)?;
                let id = self.pool.deposit(who, tokens(*amount), step)?;
                self.sync_distributor(&who)?;
                Ok(format!("position {}", id))
            }
            Action::Withdraw { user, position } => {
                let who = self.principal(user)?;
                let withdrawal = self.pool.withdraw(who, *position, step)?;
                self.sync_distributor(&who)?;
                self.totals_for(user).pool_rewards += withdrawal.reward;
                Ok(format!(
                    "principal {}, reward {}",
                    Units(withdrawal.principal),
                    Units(withdrawal.reward)
                ))
            }
            Action::EmergencyWithdraw { user, position } => {
                let who = self.principal(user)?;
                let principal = self.pool.emergency_withdraw(who, *position, step)?;
                self.sync_distributor(&who)?;
                Ok(format!("principal {}", Units(principal)))
            }
            Action::Claim { user, compound } => {
                let who = self.principal(user)?;
                let claim = self.pool.claim(who, step, *compound)?;
                self.sync_distributor(&who)?;
                self.totals_for(user).pool_rewards += claim.amount;
                Ok(match claim.compounded_into {
                    Some(id) => format!("{} compounded into position {}", Units(claim.amount), id),
                    None => format!("{} paid", Units(claim.amount)),
                })
            }
            Action::Fund { tokens: amount } => {
                let total = self.pool.fund(self.treasury, tokens(*amount))?;
                Ok(format!("total funded {}", Units(total)))
            }
            Action::WithdrawSurplus => {
                let surplus = self.pool.withdraw_surplus(self.treasury, step)?;
                Ok(format!("surplus {}", Units(surplus)))
            }
            Action::Lock { user, tokens: amount, days } => {
                let who = self.principal(user)?;
                let id = self.locks.stake(who, tokens(*amount), days * DAY_SECONDS, now)?;
                Ok(format!("lock {} for {} days", id, days))
            }
            Action::Unlock { user, position } => {
                let who = self.principal(user)?;
                let payout = self.locks.unstake(who, *position, now)?;
                self.totals_for(user).lock_rewards += payout.reward;
                Ok(format!(
                    "principal {}, reward {}",
                    Units(payout.principal),
                    Units(payout.reward)
                ))
            }
            Action::EmergencyUnlock { user, position } => {
                let who = self.principal(user)?;
                let principal = self.locks.emergency_unstake(who, *position, now)?;
                Ok(format!("principal {}", Units(principal)))
            }
            Action::FundLocks { tokens: amount } => {
                let pool = self.locks.fund_rewards(self.treasury, tokens(*amount))?;
                Ok(format!("reward pool {}", Units(pool)))
            }
            Action::Vest { user, tokens: amount, days, cliff_days } => {
                let who = self.principal(user)?;
                let index = self.vesting.create_schedule(
                    self.treasury,
                    who,
                    tokens(*amount),
                    now,
                    days * DAY_SECONDS,
                    cliff_days * DAY_SECONDS,
                )?;
                Ok(format!("schedule {}", index))
            }
            Action::Release { user, index } => {
                let who = self.principal(user)?;
                let amount = self.vesting.release(who, *index, now)?;
                self.totals_for(user).vested += amount;
                Ok(format!("released {}", Units(amount)))
            }
            Action::Register { user } => {
                let who = self.principal(user)?;
                let detail = if self.distributor.register(who, &self.strategy)? {
                    "registered"
                } else {
                    "already registered"
                };
                Ok(detail.to_string())
            }
            Action::Deregister { user } => {
                let who = self.principal(user)?;
                self.distributor.deregister(who, &self.strategy)?;
                Ok("deregistered".to_string())
            }
            Action::Exclude { user } => {
                let who = self.principal(user)?;
                self.distributor.exclude(who)?;
                Ok("excluded".to_string())
            }
            Action::Include { user } => {
                let who = self.principal(user)?;
                self.distributor.include(who, &self.strategy)?;
                Ok("included".to_string())
            }
            Action::DepositCommissions { tokens: amount } => {
                let id = self.distributor.deposit_commissions(
                    self.commission_token.as_ref(),
                    self.treasury,
                    tokens(*amount),
                    &self.strategy,
                    now,
                )?;
                Ok(format!("deposit {}", id))
            }
            Action::ClaimCommissions { user } => {
                let who = self.principal(user)?;
                let amount = self
                    .distributor
                    .claim_commissions(who, self.commission_token.as_ref())?;
                self.totals_for(user).commissions += amount;
                Ok(format!("{} USDC units", amount))
            }
            Action::ClaimDeposit { user, deposit } => {
                let who = self.principal(user)?;
                let amount = self.distributor.claim_deposit(
                    who,
                    *deposit,
                    self.commission_token.as_ref(),
                )?;
                self.totals_for(user).commissions += amount;
                Ok(format!("{} USDC units from deposit {}", amount, deposit))
            }
        }
    }

    fn principal(&self, label: &str) -> Result<Principal, FierceError> {
        self.accounts
            .get(label)
            .copied()
            .ok_or_else(|| FierceError::NotFound(format!("account '{}'", label)))
    }

    fn totals_for(&mut self, label: &str) -> &mut AccountReport {
        self.totals
            .entry(label.to_string())
            .or_insert_with(|| AccountReport {
                account: label.to_string(),
                ..AccountReport::default()
            })
    }

    /// Report a pool stake change to the distributor.
    fn sync_distributor(&self, user: &Principal) -> Result<(), FierceError> {
        if self.distributor.read(|d| d.is_registered(user)) {
            self.distributor.sync_stake(*user, &self.strategy)?;
        }
        Ok(())
    }

    fn check_invariants(&self) -> Result<(), FierceError> {
        self.pool.read(|p| p.check_invariants())?;
        self.locks.read(|l| l.check_invariants())?;
        self.distributor.read(|d| d.check_invariants())?;

        // Tokens held by the pool vault back every unpaid obligation.
        let (funded, paid, staked) = self
            .pool
            .read(|p| (p.total_funded(), p.total_paid(), p.total_staked()));
        let expected = funded
            .checked_sub(paid)
            .and_then(|v| v.checked_add(staked))
            .ok_or_else(|| FierceError::overflow("pool backing"))?;
        let held = self.token.balance_of(&self.pool.account());
        if held != expected {
            return Err(FierceError::StateConflict(format!(
                "pool vault holds {} but owes {}",
                held, expected
            )));
        }
        Ok(())
    }

    pub fn report(&self) -> Report {
        let accounts = self
            .accounts
            .iter()
            .map(|(label, principal)| {
                let totals = self.totals.get(label).cloned().unwrap_or_default();
                AccountReport {
                    account: label.clone(),
                    balance: self.token.balance_of(principal),
                    commission_balance: self.commission_token.balance_of(principal),
                    pool_stake: self.pool.user_stake(principal),
                    lock_stake: self.locks.user_stake(principal),
                    ..totals
                }
            })
            .collect();
        let rejected = self.outcomes.iter().filter(|o| !o.ok).count();
        Report {
            generated_at: Utc::now(),
            end_step: self.scheduler.current_step(),
            distributor_design: self.distributor.read(|d| format!("{:?}", d.design())).to_lowercase(),
            pool: self.pool.read(|p| p.summary()),
            lock_reward_pool: self.locks.read(|l| l.reward_pool()),
            accounts,
            actions: self.outcomes.clone(),
            rejected,
            events: BTreeMap::new(),
        }
    }
}
