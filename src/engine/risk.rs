//! Risk management.
//!
//! Owns the per-day `RiskState` and every mutation of it. The scanner
//! holds the manager exclusively and drives all approvals through
//! `&mut self`, so a check can never race its own commit: an approval
//! reserves the position slot and exposure in the same call that
//! grants it.
//!
//! State machine:
//! - **Active** — approvals granted subject to position count, size
//!   caps, exposure cap, and per-market cooldowns.
//! - **Halted** — entered automatically when the daily loss reaches the
//!   configured fraction of the day-start bankroll, or manually via the
//!   emergency stop. All approvals are rejected; open positions are
//!   still tracked to resolution. The only exit is the next
//!   day-boundary reset.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::{RiskLimitsConfig, SizingConfig};
use crate::types::{d, RiskState};

/// Granted stake plus an optional note when the request was adjusted.
#[derive(Debug, Clone, PartialEq)]
pub struct GrantedStake {
    pub stake: Decimal,
    pub adjusted: Option<String>,
}

pub struct RiskManager {
    limits: RiskLimitsConfig,
    sizing: SizingConfig,
    state: RiskState,
}

impl RiskManager {
    pub fn new(limits: RiskLimitsConfig, sizing: SizingConfig, state: RiskState) -> Self {
        Self {
            limits,
            sizing,
            state,
        }
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state.halted
    }

    /// Reset daily accounting at the day boundary. This is the only
    /// transition out of Halted.
    pub fn roll_day(&mut self, today: NaiveDate) -> bool {
        if today <= self.state.day {
            return false;
        }
        info!(
            day = %today,
            bankroll = %self.state.bankroll,
            was_halted = self.state.halted,
            "Daily risk reset"
        );
        self.state.day = today;
        self.state.daily_start_bankroll = self.state.bankroll;
        self.state.halted = false;
        self.state.halt_reason = None;
        true
    }

    /// Evaluate the kill switch. Returns the halt reason if trading is
    /// (now) halted.
    pub fn check_kill_switch(&mut self) -> Option<String> {
        if self.state.halted {
            return self.state.halt_reason.clone();
        }

        let loss = self.state.daily_loss_fraction();
        if loss >= self.limits.daily_loss_limit {
            let reason = format!(
                "daily loss limit exceeded: {:.1}% (limit {:.1}%)",
                loss * 100.0,
                self.limits.daily_loss_limit * 100.0,
            );
            self.halt(reason.clone());
            return Some(reason);
        }
        None
    }

    /// Manual halt, used by the scanner after repeated cycle errors.
    pub fn emergency_stop(&mut self, reason: &str) {
        self.halt(format!("emergency stop: {reason}"));
    }

    fn halt(&mut self, reason: String) {
        warn!(reason = %reason, "🛑 Kill switch activated");
        self.state.halted = true;
        self.state.halt_reason = Some(reason);
    }

    /// Atomic check-and-commit for opening a position.
    ///
    /// On success the position slot and exposure are reserved before
    /// the call returns, so two sequential approvals can never both
    /// pass the same count or exposure check. On any rejection the
    /// state is untouched.
    pub fn approve_open(&mut self, market_id: &str, proposed: Decimal) -> Result<GrantedStake, String> {
        if self.state.halted {
            return Err(format!(
                "trading halted: {}",
                self.state.halt_reason.as_deref().unwrap_or("unknown"),
            ));
        }
        if self.state.bankroll <= Decimal::ZERO {
            return Err("bankroll exhausted".to_string());
        }
        if self.state.open_positions >= self.limits.max_open_positions {
            return Err(format!(
                "max open positions reached: {}/{}",
                self.state.open_positions, self.limits.max_open_positions,
            ));
        }
        if let Some(last_exit) = self.state.cooldowns.get(market_id) {
            let remaining = Duration::seconds(self.limits.cooldown_secs) - (Utc::now() - *last_exit);
            if remaining > Duration::zero() {
                return Err(format!(
                    "market in cooldown for another {}s",
                    remaining.num_seconds(),
                ));
            }
        }

        let mut adjusted = None;
        let mut stake = proposed;

        let hard_cap = (d(self.sizing.max_position_size) * self.state.bankroll)
            .min(self.sizing.max_position_dollars);
        if stake > hard_cap {
            adjusted = Some(format!("capped at ${hard_cap:.2}"));
            stake = hard_cap;
        }

        let floor = d(self.sizing.min_position_size) * self.state.bankroll;
        if stake < floor {
            return Err(format!("position too small: ${stake:.2} < ${floor:.2}"));
        }

        let exposure_cap = d(self.limits.max_total_exposure) * self.state.bankroll;
        if self.state.open_exposure + stake > exposure_cap {
            let remaining = exposure_cap - self.state.open_exposure;
            if remaining < floor {
                return Err(format!(
                    "max total exposure reached: ${:.2}/${:.2}",
                    self.state.open_exposure, exposure_cap,
                ));
            }
            adjusted = Some(format!("reduced to ${remaining:.2} to fit exposure cap"));
            stake = remaining;
        }

        self.state.open_positions += 1;
        self.state.open_exposure += stake;

        Ok(GrantedStake { stake, adjusted })
    }

    /// Release a reservation for a position cancelled before resolution.
    pub fn record_cancel(&mut self, stake: Decimal) {
        self.state.open_positions = self.state.open_positions.saturating_sub(1);
        self.state.open_exposure = (self.state.open_exposure - stake).max(Decimal::ZERO);
    }

    /// Book a resolved position: release its slot, realize its P&L, arm
    /// the re-entry cooldown, and re-evaluate the kill switch.
    pub fn record_resolution(&mut self, market_id: &str, stake: Decimal, pnl: Decimal, won: bool) {
        self.state.open_positions = self.state.open_positions.saturating_sub(1);
        self.state.open_exposure = (self.state.open_exposure - stake).max(Decimal::ZERO);
        self.state.bankroll += pnl;
        if won {
            self.state.trades_won += 1;
        } else {
            self.state.trades_lost += 1;
        }
        self.state.cooldowns.insert(market_id.to_string(), Utc::now());
        self.purge_expired_cooldowns();
        self.check_kill_switch();
    }

    fn purge_expired_cooldowns(&mut self) {
        let horizon = Utc::now() - Duration::seconds(self.limits.cooldown_secs);
        self.state.cooldowns.retain(|_, exited| *exited > horizon);
    }

    /// Manually arm a cooldown (used when restoring state at startup).
    pub fn arm_cooldown(&mut self, market_id: &str, exited_at: DateTime<Utc>) {
        self.state.cooldowns.insert(market_id.to_string(), exited_at);
    }

    /// Restore an already-open position into the accounting (startup
    /// recovery from the persisted ledger).
    pub fn restore_open(&mut self, stake: Decimal) {
        self.state.open_positions += 1;
        self.state.open_exposure += stake;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
