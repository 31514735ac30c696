use chrono::{DateTime, NaiveTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::ai::AIProvider;
use crate::config::{CommanderSettings, Config};
use crate::credentials::Credential;
use crate::db::Database;
use crate::errors::{GenerationError, PersistenceError};
use crate::models::{
    ApplicationRecord, GenerationPackage, Opportunity, OpportunityStatus, ScoringResult,
};
use crate::orchestrator::Orchestrator;
use crate::ranking::{deduplicate, rank};
use crate::scoring::Scorer;

#[derive(Debug, Default)]
pub struct IntakeReport {
    pub received: usize,
    pub duplicates: usize,
    pub saved: usize,
    pub failed: usize,
    pub ranked: Vec<(Opportunity, ScoringResult)>,
}

#[derive(Debug, Default)]
pub struct GenerationReport {
    pub attempted: usize,
    pub failed: usize,
    pub records: Vec<ApplicationRecord>,
}

#[derive(Debug, Default)]
pub struct Analytics {
    pub total: usize,
    pub avg_sophistication: f64,
    /// sophistication >= 8
    pub high: usize,
    /// sophistication >= 6
    pub medium: usize,
    pub low: usize,
    /// Most applications first, then by name.
    pub by_company: Vec<(String, usize)>,
    pub recent: Vec<ApplicationRecord>,
}

/// Drives postings from intake through queueing and generation, keeping the
/// CRM current along the way.
pub struct Commander {
    db: Database,
    scorer: Scorer,
    orchestrator: Orchestrator,
    settings: CommanderSettings,
}

impl Commander {
    pub fn new(db: Database, config: &Config) -> Self {
        Self {
            db,
            scorer: Scorer::from_config(config),
            orchestrator: Orchestrator::new(config),
            settings: config.commander.clone(),
        }
    }

    pub fn with_scorer(mut self, scorer: Scorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_orchestrator(mut self, orchestrator: Orchestrator) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn intake(&self, opportunities: Vec<Opportunity>) -> IntakeReport {
        let received = opportunities.len();
        let unique = deduplicate(opportunities);
        let mut report = IntakeReport {
            received,
            duplicates: received - unique.len(),
            ..IntakeReport::default()
        };

        let mut pairs = Vec::with_capacity(unique.len());
        for mut opp in unique {
            if !self.supersede_stored_copy(&opp, &mut report) {
                continue;
            }
            let result = self.scorer.score(&opp);
            opp.relevance_score = result.overall_score;

            if self.db.save(&opp) {
                report.saved += 1;
                if let Err(e) = self.db.attach_score(&opp.id, &result) {
                    warn!(id = %opp.id, error = %e, "Could not store scoring details");
                }
            } else {
                report.failed += 1;
            }
            pairs.push((opp, result));
        }

        report.ranked = rank(pairs);
        info!(
            received = report.received,
            duplicates = report.duplicates,
            saved = report.saved,
            failed = report.failed,
            "Intake complete"
        );
        report
    }

    /// Checks `opp` against postings saved by earlier intakes. Returns false
    /// when the stored copy wins and `opp` should be dropped.
    fn supersede_stored_copy(&self, opp: &Opportunity, report: &mut IntakeReport) -> bool {
        let stored = match self.db.find_duplicate(opp) {
            Ok(Some(stored)) => stored,
            Ok(None) => return true,
            Err(e) => {
                warn!(id = %opp.id, error = %e, "Could not check stored duplicates");
                return true;
            }
        };

        // Only untouched postings are replaced; queued or later keep their history.
        if opp.source.priority() <= stored.source.priority()
            || stored.status != OpportunityStatus::Discovered
        {
            debug!(id = %opp.id, kept = %stored.id, "Posting already stored");
            report.duplicates += 1;
            return false;
        }

        match self.db.delete_opportunity(&stored.id) {
            Ok(()) => {
                debug!(
                    replaced = %stored.id,
                    by = %opp.id,
                    "Stored posting replaced by higher-priority source"
                );
                report.duplicates += 1;
                true
            }
            Err(e) => {
                error!(id = %stored.id, error = %e, "Failed to replace stored posting");
                report.failed += 1;
                false
            }
        }
    }

    /// Applications generated since midnight UTC.
    fn generated_today(&self) -> Result<usize, PersistenceError> {
        let midnight = Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc();
        self.db.count_applications_since(midnight)
    }

    /// Moves today's best discovered postings into the queue. Postings already
    /// queued and applications generated today count against the daily limit.
    pub fn queue_top(&self) -> Result<Vec<Opportunity>, PersistenceError> {
        let used = self.generated_today()? + self.db.count_with_status(OpportunityStatus::Queued)?;
        let room = self.settings.max_daily_applications.saturating_sub(used);
        if room == 0 {
            info!(
                limit = self.settings.max_daily_applications,
                "Daily application limit reached, nothing queued"
            );
            return Ok(Vec::new());
        }
        let candidates = self.db.get_top_opportunities(room)?;

        let mut queued = Vec::new();
        for mut opp in candidates {
            if opp.relevance_score < self.settings.min_queue_score {
                continue;
            }
            match self.db.update_status(&opp.id, OpportunityStatus::Queued) {
                Ok(()) => {
                    opp.status = OpportunityStatus::Queued;
                    queued.push(opp);
                }
                Err(e) => error!(id = %opp.id, error = %e, "Failed to queue opportunity"),
            }
        }
        info!("Queued {} opportunities", queued.len());
        Ok(queued)
    }

    /// Generates materials for every queued posting, resolving the completion
    /// client from `credential`.
    pub async fn generate_queued(
        &self,
        credential: Option<&Credential>,
    ) -> Result<GenerationReport, PersistenceError> {
        let queued = self.queued()?;
        let mut report = GenerationReport::default();
        for opp in queued {
            let result = self.orchestrator.generate(&opp, credential).await;
            self.record_outcome(&opp, result, &mut report);
        }
        Ok(report)
    }

    /// Same as `generate_queued` with an already resolved client.
    pub async fn generate_queued_with(
        &self,
        provider: Option<Arc<dyn AIProvider>>,
    ) -> Result<GenerationReport, PersistenceError> {
        let queued = self.queued()?;
        let mut report = GenerationReport::default();
        for opp in queued {
            let result = self.orchestrator.generate_with(&opp, provider.clone()).await;
            self.record_outcome(&opp, result, &mut report);
        }
        Ok(report)
    }

    /// The queue, cut to what today's limit still allows.
    fn queued(&self) -> Result<Vec<Opportunity>, PersistenceError> {
        let room = self
            .settings
            .max_daily_applications
            .saturating_sub(self.generated_today()?);
        if room == 0 {
            info!(
                limit = self.settings.max_daily_applications,
                "Daily application limit reached, skipping generation"
            );
            return Ok(Vec::new());
        }
        self.db.query_by_status(OpportunityStatus::Queued, room)
    }

    fn record_outcome(
        &self,
        opp: &Opportunity,
        result: Result<GenerationPackage, GenerationError>,
        report: &mut GenerationReport,
    ) {
        report.attempted += 1;
        let package = match result {
            Ok(package) => package,
            Err(e) => {
                error!(id = %opp.id, error = %e, "Generation failed");
                report.failed += 1;
                return;
            }
        };

        let record = ApplicationRecord::from_package(package, self.settings.follow_up_delay_days);
        if let Err(e) = self.db.save_application(&record) {
            error!(id = %opp.id, error = %e, "Failed to save application record");
        }
        if let Err(e) = self.db.update_status(&opp.id, OpportunityStatus::Generated) {
            error!(id = %opp.id, error = %e, "Failed to mark opportunity generated");
        }
        info!(
            id = %opp.id,
            company = %opp.company,
            mode = %record.mode,
            sophistication = record.sophistication_score,
            "Application package ready"
        );
        report.records.push(record);
    }

    pub fn analytics(&self) -> Result<Analytics, PersistenceError> {
        let applications = self.db.list_applications()?;
        Ok(summarize(applications))
    }

    pub fn due_follow_ups(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApplicationRecord>, PersistenceError> {
        self.db.due_follow_ups(now)
    }
}

/// Expects `applications` newest first.
fn summarize(applications: Vec<ApplicationRecord>) -> Analytics {
    if applications.is_empty() {
        return Analytics::default();
    }

    let total = applications.len();
    let mut analytics = Analytics {
        total,
        ..Analytics::default()
    };
    let mut per_company: HashMap<String, usize> = HashMap::new();
    let mut sum = 0.0;

    for app in &applications {
        sum += app.sophistication_score;
        match app.sophistication_score {
            s if s >= 8.0 => analytics.high += 1,
            s if s >= 6.0 => analytics.medium += 1,
            _ => analytics.low += 1,
        }
        *per_company.entry(app.company.clone()).or_default() += 1;
    }

    analytics.avg_sophistication = (sum / total as f64 * 10.0).round() / 10.0;
    let mut by_company: Vec<(String, usize)> = per_company.into_iter().collect();
    by_company.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    analytics.by_company = by_company;
    analytics.recent = applications.into_iter().take(5).collect();
    analytics
}
