//! Ledger invariant audit
//!
//! Checks, over committed state:
//! - conservation: Σ balance + Σ purchased = Σ opening balance
//! - no negative balance
//! - every transfer ref has exactly one `sent` and one `received` of equal amount
//! - every inventory quantity equals its purchase count

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use super::LedgerError;
use crate::models::LedgerTotals;
use crate::store::LedgerStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub totals: LedgerTotals,
    pub violations: Vec<String>,
}

impl AuditReport {
    pub fn from_totals(totals: LedgerTotals) -> Self {
        let mut violations = Vec::new();

        let accounted = totals.balance_sum + totals.purchased_sum;
        if accounted != totals.opening_sum {
            violations.push(format!(
                "conservation: balances {} + purchased {} = {}, opening balances {}",
                totals.balance_sum, totals.purchased_sum, accounted, totals.opening_sum
            ));
        }
        if totals.negative_balances > 0 {
            violations.push(format!(
                "{} account(s) with negative balance",
                totals.negative_balances
            ));
        }
        if totals.unpaired_transfers > 0 {
            violations.push(format!(
                "{} transfer(s) without a matching sent/received pair",
                totals.unpaired_transfers
            ));
        }
        if totals.inventory_mismatches > 0 {
            violations.push(format!(
                "{} inventory line(s) disagree with purchase history",
                totals.inventory_mismatches
            ));
        }

        Self { totals, violations }
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

pub struct LedgerAuditor {
    store: Arc<dyn LedgerStore>,
}

impl LedgerAuditor {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn run(&self) -> Result<AuditReport, LedgerError> {
        let totals = self
            .store
            .totals()
            .await
            .map_err(LedgerError::during("audit/totals"))?;
        let report = AuditReport::from_totals(totals);

        if report.is_clean() {
            info!(
                store = self.store.name(),
                accounts = report.totals.account_count,
                "Ledger audit clean"
            );
        } else {
            for v in &report.violations {
                error!(store = self.store.name(), violation = %v, "Ledger audit violation");
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_totals() {
        let report = AuditReport::from_totals(LedgerTotals {
            account_count: 2,
            balance_sum: 1900,
            opening_sum: 2000,
            purchased_sum: 100,
            ..LedgerTotals::default()
        });
        assert!(report.is_clean(), "{:?}", report.violations);
    }

    #[test]
    fn test_created_coins_detected() {
        let report = AuditReport::from_totals(LedgerTotals {
            account_count: 2,
            balance_sum: 2001,
            opening_sum: 2000,
            ..LedgerTotals::default()
        });
        assert_eq!(report.violations.len(), 1);
        assert!(report.violations[0].starts_with("conservation"));
    }

    #[test]
    fn test_every_violation_reported() {
        let report = AuditReport::from_totals(LedgerTotals {
            account_count: 1,
            balance_sum: -5,
            opening_sum: -5,
            negative_balances: 1,
            unpaired_transfers: 2,
            inventory_mismatches: 3,
            ..LedgerTotals::default()
        });
        assert_eq!(report.violations.len(), 3);
    }
}
