//! Invoice-level pricing: which lines to recalculate, in what order, and
//! when a computed price may replace the one already on the line.

use crate::core::price_cache::{PriceCache, PriceOutcome};
use crate::domain::model::{ClientId, FactureLine, PriceKey, RecalcMode};
use crate::domain::ports::{ConfigProvider, PriceLookup};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(30);
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(100);

/// Indices of lines the user priced by hand.
pub type ManualOverrides = HashSet<usize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Updated,
    Unchanged,
    /// A zero result was not allowed to replace an existing price.
    Protected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecalcReport {
    pub updated: Vec<usize>,
    pub unchanged: Vec<usize>,
    pub protected: Vec<usize>,
    pub skipped: Vec<usize>,
    /// Lines whose price lookup failed. Each is also listed under its outcome.
    pub failed: Vec<usize>,
}

impl RecalcReport {
    fn record(&mut self, index: usize, outcome: LineOutcome) {
        match outcome {
            LineOutcome::Updated => self.updated.push(index),
            LineOutcome::Unchanged => self.unchanged.push(index),
            LineOutcome::Protected => self.protected.push(index),
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Writes `prix` to the line unless the update guard refuses it.
pub fn apply_price(line: &mut FactureLine, prix: f64, mode: RecalcMode) -> LineOutcome {
    if mode == RecalcMode::Missing && prix == 0.0 && line.has_price() {
        return LineOutcome::Protected;
    }
    if prix == line.prix_unitaire {
        return LineOutcome::Unchanged;
    }
    line.set_prix(prix);
    LineOutcome::Updated
}

/// Line indices a recalculation in `mode` touches, in processing order.
pub fn select_lines(lines: &[FactureLine], mode: RecalcMode, manual: &ManualOverrides) -> Vec<usize> {
    match mode {
        RecalcMode::Single(index) if index < lines.len() => vec![index],
        RecalcMode::Single(_) => Vec::new(),
        RecalcMode::Missing => (0..lines.len())
            .filter(|i| !manual.contains(i) && !lines[*i].has_price())
            .collect(),
        RecalcMode::All | RecalcMode::ClientChange => {
            (0..lines.len()).filter(|i| !manual.contains(i)).collect()
        }
    }
}

/// Number of recalculations in progress. Overlapping calls each hold one count.
#[derive(Debug, Clone, Default)]
pub struct CalculatingFlag(Arc<AtomicUsize>);

impl CalculatingFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst) > 0
    }
}

struct CalculatingGuard<'a>(&'a AtomicUsize);

impl<'a> CalculatingGuard<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for CalculatingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Prices the lines of one invoice for its current client.
pub struct FacturePricer<L: PriceLookup> {
    prices: PriceCache<L>,
    client_id: Option<ClientId>,
    throttle: Duration,
    settle: Duration,
    calculating: CalculatingFlag,
}

impl<L: PriceLookup> FacturePricer<L> {
    pub fn new(prices: PriceCache<L>) -> Self {
        Self {
            prices,
            client_id: None,
            throttle: DEFAULT_THROTTLE,
            settle: DEFAULT_SETTLE,
            calculating: CalculatingFlag::default(),
        }
    }

    pub fn from_config(lookup: L, config: &impl ConfigProvider) -> Self {
        Self::new(PriceCache::with_ttl(lookup, config.cache_ttl()))
            .with_delays(config.throttle_delay(), config.settle_delay())
    }

    pub fn with_delays(mut self, throttle: Duration, settle: Duration) -> Self {
        self.throttle = throttle;
        self.settle = settle;
        self
    }

    /// Sets the initial client without recalculating (an invoice being loaded).
    pub fn with_client(mut self, client_id: Option<ClientId>) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn prices(&self) -> &PriceCache<L> {
        &self.prices
    }

    pub fn set_date(&self, date: Option<NaiveDate>) {
        self.prices.set_date(date);
    }

    pub fn is_calculating(&self) -> bool {
        self.calculating.is_set()
    }

    /// Shared view of the calculating flag, for observers outside the pricer.
    pub fn calculating_flag(&self) -> CalculatingFlag {
        self.calculating.clone()
    }

    #[tracing::instrument(skip_all, fields(mode = ?mode, client = ?self.client_id))]
    pub async fn recalculate(
        &self,
        lines: &mut [FactureLine],
        mode: RecalcMode,
        manual: &ManualOverrides,
    ) -> RecalcReport {
        let selected = select_lines(lines, mode, manual);
        let mut report = RecalcReport::default();

        if selected.is_empty() {
            return report;
        }
        if self.client_id.is_none() {
            tracing::warn!("⚠️ No client selected, {} line(s) left as is", selected.len());
            report.skipped = selected;
            return report;
        }

        let _guard = CalculatingGuard::enter(&self.calculating.0);
        let mut looked_up = false;

        for index in selected {
            let line = &mut lines[index];
            let Some(key) = PriceKey::from_parts(self.client_id, line.service_id, line.unite_id) else {
                report.skipped.push(index);
                continue;
            };

            // throttle only between lookups that go to the backend
            let remote = mode.forces_lookup() || self.prices.cached_price(&key).is_none();
            if remote {
                if looked_up && !self.throttle.is_zero() {
                    tokio::time::sleep(self.throttle).await;
                }
                looked_up = true;
            }

            let PriceOutcome { price, failed } = self
                .prices
                .price_outcome(self.client_id, line.service_id, line.unite_id, mode.forces_lookup())
                .await;
            let outcome = apply_price(line, price, mode);
            tracing::debug!("Line {}: {:.2} -> {:?}", index, price, outcome);
            report.record(index, outcome);
            if failed {
                report.failed.push(index);
            }
        }

        tracing::info!(
            "💶 Recalculated prices: {} updated, {} unchanged, {} protected, {} skipped, {} failed",
            report.updated.len(),
            report.unchanged.len(),
            report.protected.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    /// Switches the invoice to another client.
    ///
    /// Cached prices belong to the previous client and are dropped. After the
    /// settle delay every line not priced by hand is recalculated.
    pub async fn set_client(
        &mut self,
        client_id: Option<ClientId>,
        lines: &mut [FactureLine],
        manual: &ManualOverrides,
    ) -> Option<RecalcReport> {
        if client_id == self.client_id {
            return None;
        }

        tracing::info!("👤 Client changed: {:?} -> {:?}", self.client_id, client_id);
        self.client_id = client_id;
        self.prices.clear_cache();

        if client_id.is_none() {
            return None;
        }
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        Some(self.recalculate(lines, RecalcMode::ClientChange, manual).await)
    }

    /// The service or unit of a line was edited: its manual price no longer
    /// applies and it is priced again.
    pub async fn on_line_edited(
        &self,
        lines: &mut [FactureLine],
        index: usize,
        manual: &mut ManualOverrides,
    ) -> RecalcReport {
        manual.remove(&index);
        self.recalculate(lines, RecalcMode::Single(index), manual).await
    }
}

/// The user typed a price on this line; bulk recalculations will skip it.
pub fn mark_manual(lines: &mut [FactureLine], manual: &mut ManualOverrides, index: usize, prix: f64) {
    if let Some(line) = lines.get_mut(index) {
        line.set_prix(prix);
        manual.insert(index);
    }
}

/// Removes a line and shifts the manual overrides that followed it.
pub fn remove_line(lines: &mut Vec<FactureLine>, manual: &mut ManualOverrides, index: usize) {
    if index >= lines.len() {
        return;
    }
    lines.remove(index);
    *manual = manual
        .iter()
        .filter(|i| **i != index)
        .map(|i| if *i > index { i - 1 } else { *i })
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::price_cache::tests::MockLookup;

    fn pricer(lookup: MockLookup) -> FacturePricer<MockLookup> {
        FacturePricer::new(PriceCache::new(lookup)).with_client(Some(1))
    }

    fn priced_line(service: i64, unite: i64, prix: f64) -> FactureLine {
        let mut line = FactureLine::new(service, unite, 1.0);
        line.set_prix(prix);
        line
    }

    #[test]
    fn test_missing_mode_protects_existing_price() {
        let mut line = priced_line(1, 2, 12.5);
        assert_eq!(apply_price(&mut line, 0.0, RecalcMode::Missing), LineOutcome::Protected);
        assert_eq!(line.prix_unitaire, 12.5);

        assert_eq!(apply_price(&mut line, 0.0, RecalcMode::All), LineOutcome::Updated);
        assert_eq!(line.prix_unitaire, 0.0);
    }

    #[test]
    fn test_select_lines_by_mode() {
        let lines = vec![
            priced_line(1, 1, 10.0),
            FactureLine::new(2, 1, 1.0),
            FactureLine::new(3, 1, 1.0),
        ];
        let manual: ManualOverrides = [2].into_iter().collect();

        assert_eq!(select_lines(&lines, RecalcMode::Missing, &manual), vec![1]);
        assert_eq!(select_lines(&lines, RecalcMode::All, &manual), vec![0, 1]);
        assert_eq!(select_lines(&lines, RecalcMode::ClientChange, &manual), vec![0, 1]);
        assert_eq!(select_lines(&lines, RecalcMode::Single(2), &manual), vec![2]);
        assert!(select_lines(&lines, RecalcMode::Single(9), &manual).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_mode_fills_only_empty_lines() {
        let lookup = MockLookup::default()
            .with_price(1, 1, 1, 40.0)
            .with_price(1, 2, 1, 60.0);
        let pricer = pricer(lookup);
        let mut lines = vec![priced_line(1, 1, 35.0), FactureLine::new(2, 1, 2.0)];

        let report = pricer
            .recalculate(&mut lines, RecalcMode::Missing, &ManualOverrides::new())
            .await;

        assert_eq!(report.updated, vec![1]);
        assert_eq!(lines[0].prix_unitaire, 35.0);
        assert_eq!(lines[1].prix_unitaire, 60.0);
        assert_eq!(lines[1].total_ligne, 120.0);
        assert_eq!(pricer.prices().lookup().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_mode_skips_manual_and_incomplete_lines() {
        let lookup = MockLookup::default()
            .with_price(1, 1, 1, 40.0)
            .with_price(1, 2, 1, 60.0);
        let pricer = pricer(lookup);
        let mut incomplete = FactureLine::new(3, 1, 1.0);
        incomplete.unite_id = None;
        let mut lines = vec![
            priced_line(1, 1, 35.0),
            priced_line(2, 1, 99.0),
            incomplete,
        ];
        let manual: ManualOverrides = [1].into_iter().collect();

        let report = pricer.recalculate(&mut lines, RecalcMode::All, &manual).await;

        assert_eq!(report.updated, vec![0]);
        assert_eq!(report.skipped, vec![2]);
        assert_eq!(lines[0].prix_unitaire, 40.0);
        assert_eq!(lines[1].prix_unitaire, 99.0);
        assert!(!pricer.is_calculating());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_mode_ignores_manual_flag() {
        let pricer = pricer(MockLookup::default().with_price(1, 2, 1, 60.0));
        let mut lines = vec![priced_line(2, 1, 99.0)];
        let manual: ManualOverrides = [0].into_iter().collect();

        let report = pricer
            .recalculate(&mut lines, RecalcMode::Single(0), &manual)
            .await;

        assert_eq!(report.updated, vec![0]);
        assert_eq!(lines[0].prix_unitaire, 60.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_on_one_line_does_not_stop_others() {
        let lookup = MockLookup::default().with_price(1, 2, 1, 60.0);
        lookup.fail_for(1, 1, 1);
        let pricer = pricer(lookup);
        let mut lines = vec![FactureLine::new(1, 1, 1.0), FactureLine::new(2, 1, 1.0)];

        let report = pricer
            .recalculate(&mut lines, RecalcMode::Missing, &ManualOverrides::new())
            .await;

        assert_eq!(report.unchanged, vec![0]);
        assert_eq!(report.updated, vec![1]);
        assert_eq!(report.failed, vec![0]);
        assert!(report.has_failures());
        assert_eq!(lines[1].prix_unitaire, 60.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_lines_report_no_failure() {
        let pricer = pricer(MockLookup::default().with_price(1, 2, 1, 60.0));
        let mut lines = vec![FactureLine::new(2, 1, 1.0)];

        let report = pricer
            .recalculate(&mut lines, RecalcMode::All, &ManualOverrides::new())
            .await;

        assert!(!report.has_failures());
        assert_eq!(pricer.prices().failed_lookups(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookups_are_throttled() {
        let lookup = MockLookup::default()
            .with_price(1, 1, 1, 10.0)
            .with_price(1, 2, 1, 20.0)
            .with_price(1, 3, 1, 30.0);
        let pricer = pricer(lookup);
        let mut lines = vec![
            FactureLine::new(1, 1, 1.0),
            FactureLine::new(2, 1, 1.0),
            FactureLine::new(3, 1, 1.0),
        ];

        let start = tokio::time::Instant::now();
        pricer
            .recalculate(&mut lines, RecalcMode::All, &ManualOverrides::new())
            .await;

        assert!(start.elapsed() >= DEFAULT_THROTTLE * 2);
        assert_eq!(pricer.prices().lookup().calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_prices_are_not_throttled() {
        let lookup = MockLookup::default()
            .with_price(1, 1, 1, 10.0)
            .with_price(1, 2, 1, 20.0);
        let pricer = pricer(lookup);
        let mut lines = vec![
            FactureLine::new(1, 1, 1.0),
            FactureLine::new(1, 1, 2.0),
            FactureLine::new(2, 1, 1.0),
        ];

        let start = tokio::time::Instant::now();
        pricer
            .recalculate(&mut lines, RecalcMode::All, &ManualOverrides::new())
            .await;

        let elapsed = start.elapsed();
        assert!(elapsed >= DEFAULT_THROTTLE);
        assert!(elapsed < DEFAULT_THROTTLE * 2);
        assert_eq!(pricer.prices().lookup().calls(), 2);
        assert_eq!(lines[1].total_ligne, 20.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_change_clears_cache_and_recalculates() {
        let lookup = MockLookup::default()
            .with_price(1, 1, 1, 40.0)
            .with_price(2, 1, 1, 45.0);
        let mut pricer = pricer(lookup);
        let mut lines = vec![FactureLine::new(1, 1, 1.0), priced_line(1, 1, 80.0)];
        let manual: ManualOverrides = [1].into_iter().collect();

        pricer.recalculate(&mut lines, RecalcMode::All, &manual).await;
        assert_eq!(lines[0].prix_unitaire, 40.0);

        let report = pricer.set_client(Some(2), &mut lines, &manual).await.unwrap();

        assert_eq!(report.updated, vec![0]);
        assert_eq!(lines[0].prix_unitaire, 45.0);
        assert_eq!(lines[1].prix_unitaire, 80.0);
        assert_eq!(pricer.client_id(), Some(2));
        assert_eq!(pricer.prices().lookup().calls(), 2);

        assert!(pricer.set_client(Some(2), &mut lines, &manual).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clearing_client_does_not_recalculate() {
        let mut pricer = pricer(MockLookup::default().with_price(1, 1, 1, 40.0));
        let mut lines = vec![FactureLine::new(1, 1, 1.0)];

        assert!(pricer
            .set_client(None, &mut lines, &ManualOverrides::new())
            .await
            .is_none());
        let report = pricer
            .recalculate(&mut lines, RecalcMode::All, &ManualOverrides::new())
            .await;

        assert_eq!(report.skipped, vec![0]);
        assert_eq!(pricer.prices().lookup().calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_line_edit_drops_manual_flag() {
        let pricer = pricer(MockLookup::default().with_price(1, 4, 1, 70.0));
        let mut lines = vec![FactureLine::new(1, 1, 1.0)];
        let mut manual = ManualOverrides::new();

        mark_manual(&mut lines, &mut manual, 0, 15.0);
        assert!(manual.contains(&0));

        lines[0].service_id = Some(4);
        let report = pricer.on_line_edited(&mut lines, 0, &mut manual).await;

        assert!(manual.is_empty());
        assert_eq!(report.updated, vec![0]);
        assert_eq!(lines[0].prix_unitaire, 70.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calculating_flag_is_set_during_recalculation() {
        let lookup = MockLookup {
            delay: Duration::from_millis(50),
            ..Default::default()
        };
        let pricer = pricer(lookup);
        let flag = pricer.calculating_flag();
        let mut lines = vec![FactureLine::new(1, 1, 1.0)];
        let manual = ManualOverrides::new();

        let observed = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            flag.is_set()
        };
        let (_, during) = tokio::join!(
            pricer.recalculate(&mut lines, RecalcMode::All, &manual),
            observed
        );

        assert!(during);
        assert!(!pricer.is_calculating());
    }

    #[tokio::test(start_paused = true)]
    async fn test_calculating_flag_stays_set_while_calls_overlap() {
        let lookup = MockLookup {
            delay: Duration::from_millis(50),
            ..Default::default()
        };
        let pricer = pricer(lookup).with_delays(Duration::ZERO, Duration::ZERO);
        let flag = pricer.calculating_flag();
        let mut short = vec![FactureLine::new(1, 1, 1.0)];
        let mut long = vec![
            FactureLine::new(2, 1, 1.0),
            FactureLine::new(3, 1, 1.0),
            FactureLine::new(4, 1, 1.0),
        ];
        let manual = ManualOverrides::new();

        // the short call ends at 50 ms, the long one at 150 ms
        let observed = async {
            tokio::time::sleep(Duration::from_millis(80)).await;
            flag.is_set()
        };
        let (_, _, during) = tokio::join!(
            pricer.recalculate(&mut short, RecalcMode::All, &manual),
            pricer.recalculate(&mut long, RecalcMode::All, &manual),
            observed
        );

        assert!(during);
        assert!(!pricer.is_calculating());
    }

    #[test]
    fn test_remove_line_shifts_manual_indices() {
        let mut lines = vec![
            FactureLine::new(1, 1, 1.0),
            FactureLine::new(2, 1, 1.0),
            FactureLine::new(3, 1, 1.0),
        ];
        let mut manual: ManualOverrides = [0, 1, 2].into_iter().collect();

        remove_line(&mut lines, &mut manual, 1);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].service_id, Some(3));
        let mut remaining: Vec<usize> = manual.into_iter().collect();
        remaining.sort();
        assert_eq!(remaining, vec![0, 1]);
    }
}
