//! Supplier Online Status
//!
//! Last-observed reachability of each supplier. Suppliers nobody has heard
//! from yet count as offline, so a fresh restore pings everyone it is
//! about to depend on.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, instrument};

use crate::contacts::SupplierId;
use crate::domain::ports::OnlineStatus;
use crate::transfer::queue::SupplierClient;

/// DashMap-backed reachability oracle.
#[derive(Default)]
pub struct OnlineStatusRegistry {
    statuses: DashMap<SupplierId, OnlineStatus>,
}

impl OnlineStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_online(&self, supplier: &SupplierId) {
        self.statuses.insert(supplier.clone(), OnlineStatus::Online);
    }

    pub fn mark_offline(&self, supplier: &SupplierId) {
        self.statuses.insert(supplier.clone(), OnlineStatus::Offline);
    }

    /// Unknown suppliers are offline until proven otherwise.
    pub fn is_offline(&self, supplier: &SupplierId) -> bool {
        self.statuses
            .get(supplier)
            .map(|s| s.is_offline())
            .unwrap_or(true)
    }

    /// The subset of `suppliers` currently considered offline.
    pub fn offline_among(&self, suppliers: &[SupplierId]) -> Vec<SupplierId> {
        suppliers
            .iter()
            .filter(|s| self.is_offline(s))
            .cloned()
            .collect()
    }

    /// Ping every offline supplier in the list and record who answered.
    ///
    /// Best effort: a failed ping leaves the supplier offline, nothing
    /// propagates. Returns how many came back online.
    #[instrument(skip(self, suppliers, client), fields(candidates = suppliers.len()))]
    pub async fn ping_offline_suppliers(
        &self,
        suppliers: &[SupplierId],
        client: Arc<dyn SupplierClient>,
    ) -> usize {
        let offline = self.offline_among(suppliers);
        if offline.is_empty() {
            return 0;
        }
        debug!(count = offline.len(), "pinging offline suppliers");

        let pings = offline.into_iter().map(|supplier| {
            let client = Arc::clone(&client);
            async move {
                let result = client.ping(&supplier).await;
                (supplier, result)
            }
        });
        let mut recovered = 0;
        for (supplier, result) in join_all(pings).await {
            match result {
                Ok(()) => {
                    self.mark_online(&supplier);
                    recovered += 1;
                }
                Err(e) => {
                    debug!(%supplier, error = %e, "supplier still unreachable");
                }
            }
        }
        recovered
    }
}

// =============================================================================
// Tests
// =============================================================================
