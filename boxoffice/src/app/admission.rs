//! Admission and status: tier availability reads and admin counter controls.
//!
//! "Sold" is always the ledger's sum of paid quantities. The counter store's
//! `available` drives admission; `display_available` (`total - sold`) is for
//! humans and never consulted when admitting a reservation.

use crate::config::TierCatalog;
use crate::error::ReservationError;
use boxoffice_core::{CounterStore, OrderLedger, TierId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Largest count or delta accepted by an admin command.
pub const MAX_ADMIN_COUNT: u32 = 1_000_000;

/// Admin command, tagged by `action`.
///
/// ```json
/// {"action": "initialize", "tier": "VIP", "count": 100}
/// {"action": "initialize_all"}
/// {"action": "adjust", "tier": "GA", "delta": -5}
/// {"action": "status"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InventoryCommand {
    /// Reset one tier to `count` available and total.
    Initialize {
        /// Tier to reset
        tier: TierId,
        /// New capacity
        count: u32,
    },
    /// Reset several tiers; defaults to the configured catalog capacities.
    InitializeAll {
        /// Explicit capacities, overriding the catalog
        #[serde(default)]
        tiers: Option<BTreeMap<TierId, u32>>,
    },
    /// Grow or shrink a tier's capacity.
    Adjust {
        /// Tier to adjust
        tier: TierId,
        /// Signed change applied to total and available
        delta: i64,
    },
    /// Read-only snapshot.
    Status,
}

impl InventoryCommand {
    /// Check the command against the catalog before anything is dispatched.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for tiers outside the catalog, zero or oversized deltas,
    /// oversized counts and empty tier maps.
    pub fn validate(&self, catalog: &TierCatalog) -> Result<(), ReservationError> {
        let known = |tier: &TierId| {
            catalog
                .get(tier)
                .map(|_| ())
                .ok_or_else(|| ReservationError::Validation(format!("tier {tier} is not in the catalog")))
        };
        let count_in_range = |count: u32| {
            if count > MAX_ADMIN_COUNT {
                Err(ReservationError::Validation(format!(
                    "count must be at most {MAX_ADMIN_COUNT}"
                )))
            } else {
                Ok(())
            }
        };

        match self {
            Self::Initialize { tier, count } => {
                known(tier)?;
                count_in_range(*count)
            }
            Self::InitializeAll { tiers: Some(tiers) } => {
                if tiers.is_empty() {
                    return Err(ReservationError::Validation(
                        "tiers must not be empty".to_string(),
                    ));
                }
                tiers.iter().try_for_each(|(tier, count)| {
                    known(tier)?;
                    count_in_range(*count)
                })
            }
            Self::InitializeAll { tiers: None } | Self::Status => Ok(()),
            Self::Adjust { tier, delta } => {
                known(tier)?;
                if *delta == 0 || delta.unsigned_abs() > u64::from(MAX_ADMIN_COUNT) {
                    return Err(ReservationError::Validation(format!(
                        "delta must be non-zero and at most {MAX_ADMIN_COUNT} in magnitude"
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Availability of one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSnapshot {
    /// Tier identifier
    pub tier: TierId,
    /// Catalog price in minor units, if the tier is in the catalog
    pub price_cents: Option<u64>,
    /// Counter store total capacity
    pub total: u32,
    /// Counter store availability (admission control)
    pub available: u32,
    /// Paid quantity from the ledger
    pub sold: u64,
    /// `max(0, total - sold)`, display only
    pub display_available: u64,
}

/// Serves tier status and admin counter commands.
#[derive(Clone)]
pub struct AdmissionService {
    counters: Arc<dyn CounterStore>,
    ledger: Arc<dyn OrderLedger>,
    catalog: TierCatalog,
}

impl AdmissionService {
    /// Create the service.
    #[must_use]
    pub fn new(
        counters: Arc<dyn CounterStore>,
        ledger: Arc<dyn OrderLedger>,
        catalog: TierCatalog,
    ) -> Self {
        Self {
            counters,
            ledger,
            catalog,
        }
    }

    /// Validate and run an admin command, then return the fresh snapshot.
    ///
    /// # Errors
    ///
    /// - `Validation`: command rejected before dispatch
    /// - `UnknownTier`: adjusting a tier that was never initialized
    /// - `Transient`: a store failed
    pub async fn execute(
        &self,
        command: InventoryCommand,
    ) -> Result<Vec<TierSnapshot>, ReservationError> {
        command.validate(&self.catalog)?;

        match command {
            InventoryCommand::Initialize { tier, count } => self.initialize(&tier, count).await?,
            InventoryCommand::InitializeAll { tiers } => {
                let tiers = tiers.unwrap_or_else(|| self.catalog.capacities());
                for (tier, count) in &tiers {
                    self.initialize(tier, *count).await?;
                }
            }
            InventoryCommand::Adjust { tier, delta } => self.adjust(&tier, delta).await?,
            InventoryCommand::Status => {}
        }

        self.snapshot().await
    }

    /// Current availability of every initialized tier.
    ///
    /// # Errors
    ///
    /// - `Transient`: counter store or ledger unavailable
    pub async fn snapshot(&self) -> Result<Vec<TierSnapshot>, ReservationError> {
        let inventory = self.counters.get_all().await?;
        let sold = self.ledger.sold_by_tier().await?;

        Ok(inventory
            .into_iter()
            .map(|inv| {
                let sold = sold.get(&inv.tier).copied().unwrap_or(0);
                TierSnapshot {
                    price_cents: self.catalog.get(&inv.tier).map(|t| t.price_cents),
                    total: inv.total_capacity,
                    available: inv.available,
                    sold,
                    display_available: u64::from(inv.total_capacity).saturating_sub(sold),
                    tier: inv.tier,
                }
            })
            .collect())
    }

    async fn initialize(&self, tier: &TierId, count: u32) -> Result<(), ReservationError> {
        let inventory = self.counters.initialize(tier, count).await?;
        crate::metrics::record_available(tier.as_str(), inventory.available);
        tracing::warn!(tier = %tier, count, "Tier inventory initialized; existing holds reset");
        Ok(())
    }

    async fn adjust(&self, tier: &TierId, delta: i64) -> Result<(), ReservationError> {
        let available = self.counters.adjust(tier, delta).await?;
        crate::metrics::record_available(tier.as_str(), available);
        tracing::info!(tier = %tier, delta, available, "Tier inventory adjusted");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use boxoffice_testing::helpers::tier;
    use boxoffice_testing::{InMemoryCounterStore, InMemoryOrderLedger};

    fn service() -> (InMemoryCounterStore, AdmissionService) {
        let counters = InMemoryCounterStore::new();
        let service = AdmissionService::new(
            Arc::new(counters.clone()),
            Arc::new(InMemoryOrderLedger::new()),
            TierCatalog::parse("VIP:15000:5,GA:5000:2").unwrap(),
        );
        (counters, service)
    }

    #[test]
    fn commands_are_tagged_by_action() {
        let command: InventoryCommand =
            serde_json::from_str(r#"{"action":"adjust","tier":"GA","delta":-3}"#).unwrap();
        assert_eq!(
            command,
            InventoryCommand::Adjust {
                tier: tier("GA"),
                delta: -3
            }
        );

        let command: InventoryCommand =
            serde_json::from_str(r#"{"action":"initialize_all"}"#).unwrap();
        assert_eq!(command, InventoryCommand::InitializeAll { tiers: None });

        assert!(serde_json::from_str::<InventoryCommand>(r#"{"action":"drop_all"}"#).is_err());
    }

    #[test]
    fn validation_rejects_before_dispatch() {
        let catalog = TierCatalog::parse("VIP:15000:5").unwrap();
        let rejected = [
            InventoryCommand::Initialize {
                tier: tier("BALCONY"),
                count: 5,
            },
            InventoryCommand::Adjust {
                tier: tier("VIP"),
                delta: 0,
            },
            InventoryCommand::Initialize {
                tier: tier("VIP"),
                count: MAX_ADMIN_COUNT + 1,
            },
            InventoryCommand::InitializeAll {
                tiers: Some(BTreeMap::new()),
            },
        ];
        for command in rejected {
            assert!(
                matches!(command.validate(&catalog), Err(ReservationError::Validation(_))),
                "{command:?} should be rejected"
            );
        }
        assert!(InventoryCommand::Status.validate(&catalog).is_ok());
    }

    #[tokio::test]
    async fn initialize_all_uses_catalog_capacities() {
        let (counters, service) = service();

        let snapshot = service
            .execute(InventoryCommand::InitializeAll { tiers: None })
            .await
            .unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(counters.available(&tier("VIP")), Some(5));
        assert_eq!(counters.available(&tier("GA")), Some(2));
        let vip = snapshot.iter().find(|s| s.tier == tier("VIP")).unwrap();
        assert_eq!(vip.price_cents, Some(15000));
        assert_eq!(vip.sold, 0);
        assert_eq!(vip.display_available, 5);
    }

    #[tokio::test]
    async fn adjust_unknown_tier_fails_after_validation() {
        let (_counters, service) = service();

        let result = service
            .execute(InventoryCommand::Adjust {
                tier: tier("GA"),
                delta: 2,
            })
            .await;
        assert_eq!(result, Err(ReservationError::UnknownTier(tier("GA"))));
    }
}
