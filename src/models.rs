use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::mode::Mode;

// --- Sources ---

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Source {
    Linkedin,
    Indeed,
    Company,
    Aggregator,
    Other(String),
}

impl Source {
    pub fn as_str(&self) -> &str {
        match self {
            Source::Linkedin => "linkedin",
            Source::Indeed => "indeed",
            Source::Company => "company",
            Source::Aggregator => "aggregator",
            Source::Other(name) => name,
        }
    }

    /// Higher wins when two postings collapse to the same canonical key.
    pub fn priority(&self) -> u8 {
        match self {
            Source::Linkedin => 3,
            Source::Indeed => 2,
            Source::Company => 1,
            Source::Aggregator | Source::Other(_) => 0,
        }
    }
}

impl From<&str> for Source {
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "linkedin" => Source::Linkedin,
            "indeed" => Source::Indeed,
            "company" | "company-direct" | "direct" => Source::Company,
            "aggregator" | "hn_jobs" => Source::Aggregator,
            other => Source::Other(other.to_string()),
        }
    }
}

impl From<String> for Source {
    fn from(value: String) -> Self {
        Source::from(value.as_str())
    }
}

impl From<Source> for String {
    fn from(value: Source) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Status ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityStatus {
    #[default]
    Discovered,
    Queued,
    Generated,
    Submitted,
    Rejected,
}

impl OpportunityStatus {
    pub const ALL: [OpportunityStatus; 5] = [
        OpportunityStatus::Discovered,
        OpportunityStatus::Queued,
        OpportunityStatus::Generated,
        OpportunityStatus::Submitted,
        OpportunityStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityStatus::Discovered => "discovered",
            OpportunityStatus::Queued => "queued",
            OpportunityStatus::Generated => "generated",
            OpportunityStatus::Submitted => "submitted",
            OpportunityStatus::Rejected => "rejected",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            OpportunityStatus::Discovered => 0,
            OpportunityStatus::Queued => 1,
            OpportunityStatus::Generated => 2,
            OpportunityStatus::Submitted => 3,
            OpportunityStatus::Rejected => 4,
        }
    }

    /// Forward-only lifecycle. Staying put is allowed so re-saves stay idempotent.
    pub fn can_advance_to(&self, next: OpportunityStatus) -> bool {
        next.rank() >= self.rank()
    }
}

impl FromStr for OpportunityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OpportunityStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| {
                format!(
                    "Unknown status '{}'. Expected one of: discovered, queued, generated, submitted, rejected",
                    s
                )
            })
    }
}

impl fmt::Display for OpportunityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Opportunities ---

/// Raw posting data as handed over by scrapers or manual entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityDraft {
    pub title: String,
    pub company: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub technologies: Vec<String>,
    #[serde(default)]
    pub salary_range: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub source: Source,
    #[serde(default)]
    pub discovered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub requirements: Vec<String>,
    pub technologies: Vec<String>,
    pub salary_range: Option<String>,
    pub url: Option<String>,
    pub source: Source,
    pub discovered_at: DateTime<Utc>,
    pub status: OpportunityStatus,
    pub relevance_score: f64,
}

impl Opportunity {
    pub fn new(title: &str, company: &str, source: Source) -> Self {
        Self::from_draft(OpportunityDraft {
            title: title.to_string(),
            company: company.to_string(),
            location: String::new(),
            description: String::new(),
            requirements: Vec::new(),
            technologies: Vec::new(),
            salary_range: None,
            url: None,
            source,
            discovered_at: None,
        })
    }

    pub fn from_draft(draft: OpportunityDraft) -> Self {
        let id = opportunity_id(&draft.title, &draft.company, &draft.source);
        Self {
            id,
            title: draft.title.trim().to_string(),
            company: draft.company.trim().to_string(),
            location: draft.location,
            description: draft.description,
            requirements: draft.requirements,
            technologies: draft.technologies,
            salary_range: draft.salary_range,
            url: draft.url,
            source: draft.source,
            discovered_at: draft.discovered_at.unwrap_or_else(Utc::now),
            status: OpportunityStatus::Discovered,
            relevance_score: 0.0,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_discovered_at(mut self, discovered_at: DateTime<Utc>) -> Self {
        self.discovered_at = discovered_at;
        self
    }

    /// Source-independent key used to collapse the same posting seen on several boards.
    pub fn dedup_key(&self) -> String {
        format!("{}|{}", normalize(&self.title), normalize(&self.company))
    }

    /// Everything the scorer looks at, as a single lowercase blob.
    pub fn searchable_text(&self) -> String {
        format!(
            "{} {} {} {}",
            self.title,
            self.description,
            self.requirements.join(" "),
            self.technologies.join(" ")
        )
        .to_lowercase()
    }
}

/// Lowercases and collapses everything that is not alphanumeric into single spaces.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn opportunity_id(title: &str, company: &str, source: &Source) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(title).as_bytes());
    hasher.update([0x1f]);
    hasher.update(normalize(company).as_bytes());
    hasher.update([0x1f]);
    hasher.update(source.as_str().as_bytes());
    let digest = hasher.finalize();
    digest
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

// --- Scoring ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Apply,
    Research,
    Pass,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Recommendation::Apply => "APPLY",
            Recommendation::Research => "RESEARCH",
            Recommendation::Pass => "PASS",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScoringMethod {
    Ai,
    Heuristic,
    /// Heuristic path taken because the model call or its output failed.
    HeuristicFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringResult {
    pub overall_score: f64,
    pub confidence: f64,
    pub technical_score: f64,
    pub transition_score: f64,
    pub culture_score: f64,
    pub growth_score: f64,
    pub compensation_score: f64,
    pub reasoning: String,
    pub recommendation: Recommendation,
    pub keywords_matched: Vec<String>,
    pub red_flags: Vec<String>,
    pub method: ScoringMethod,
}

// --- Generation ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Research,
    Content,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Research => f.write_str("research"),
            Phase::Content => f.write_str("content"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    CompanyIntelligence,
    CompetitiveAnalysis,
    TechnicalAlignment,
    StrategicPositioning,
    CoverLetter,
    ExecutiveSummary,
    InterviewPreparation,
    SuccessStrategy,
    CareerNarrative,
    ResumeCustomization,
}

impl SectionKind {
    pub const RESEARCH: [SectionKind; 4] = [
        SectionKind::CompanyIntelligence,
        SectionKind::CompetitiveAnalysis,
        SectionKind::TechnicalAlignment,
        SectionKind::StrategicPositioning,
    ];

    pub const CONTENT: [SectionKind; 6] = [
        SectionKind::CoverLetter,
        SectionKind::ExecutiveSummary,
        SectionKind::InterviewPreparation,
        SectionKind::SuccessStrategy,
        SectionKind::CareerNarrative,
        SectionKind::ResumeCustomization,
    ];

    pub fn phase(&self) -> Phase {
        if Self::RESEARCH.contains(self) {
            Phase::Research
        } else {
            Phase::Content
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SectionKind::CompanyIntelligence => "company_intelligence",
            SectionKind::CompetitiveAnalysis => "competitive_analysis",
            SectionKind::TechnicalAlignment => "technical_alignment",
            SectionKind::StrategicPositioning => "strategic_positioning",
            SectionKind::CoverLetter => "cover_letter",
            SectionKind::ExecutiveSummary => "executive_summary",
            SectionKind::InterviewPreparation => "interview_preparation",
            SectionKind::SuccessStrategy => "success_strategy",
            SectionKind::CareerNarrative => "career_narrative",
            SectionKind::ResumeCustomization => "resume_customization",
        }
    }

    pub fn max_tokens(&self) -> u32 {
        match self {
            SectionKind::CompanyIntelligence => 1200,
            SectionKind::CompetitiveAnalysis => 800,
            SectionKind::TechnicalAlignment => 1000,
            SectionKind::StrategicPositioning => 900,
            SectionKind::CoverLetter => 800,
            SectionKind::ExecutiveSummary => 400,
            SectionKind::InterviewPreparation => 1000,
            SectionKind::SuccessStrategy => 700,
            SectionKind::CareerNarrative => 600,
            SectionKind::ResumeCustomization => 900,
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub kind: SectionKind,
    pub content: String,
    /// Set when the model call behind this section failed and `content` is a
    /// placeholder or a local fallback.
    pub degraded: bool,
}

impl Section {
    pub fn generated(kind: SectionKind, content: String) -> Self {
        Self { kind, content, degraded: false }
    }

    pub fn placeholder(kind: SectionKind, reason: &str) -> Self {
        Self {
            kind,
            content: format!("[{} unavailable: {}]", kind.label(), reason),
            degraded: true,
        }
    }
}

/// Resume tailoring for one posting. The model returns it as JSON; TEMPLATE mode
/// and failed calls build it from the profile.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResumeCustomization {
    #[serde(default)]
    pub emphasized_skills: Vec<String>,
    #[serde(default)]
    pub highlighted_achievements: Vec<String>,
    #[serde(default)]
    pub customized_summary: String,
    #[serde(default)]
    pub keyword_optimization: Vec<String>,
}

impl ResumeCustomization {
    pub fn is_empty(&self) -> bool {
        self.emphasized_skills.is_empty() && self.keyword_optimization.is_empty()
    }

    pub fn truncated(mut self, max: usize) -> Self {
        self.emphasized_skills.truncate(max);
        self.highlighted_achievements.truncate(max);
        self.keyword_optimization.truncate(max);
        self
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        if !self.customized_summary.is_empty() {
            out.push_str(&format!("Summary: {}\n", self.customized_summary));
        }
        for (heading, items) in [
            ("Emphasize", &self.emphasized_skills),
            ("Highlight", &self.highlighted_achievements),
            ("Keywords", &self.keyword_optimization),
        ] {
            if items.is_empty() {
                continue;
            }
            out.push_str(&format!("\n{}:\n", heading));
            for item in items {
                out.push_str(&format!("- {}\n", item));
            }
        }
        out.trim_end().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetrics {
    pub elapsed_secs: f64,
    pub api_calls: u32,
    pub sophistication_score: f64,
    pub personalization_depth: f64,
    /// 1 - actual/baseline; negative when slower than the baseline.
    pub parallel_efficiency: f64,
    pub degraded_sections: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationPackage {
    pub opportunity_id: String,
    pub job_title: String,
    pub company: String,
    pub generated_at: DateTime<Utc>,
    pub mode: Mode,
    pub modes_attempted: Vec<Mode>,
    pub sections: Vec<Section>,
    #[serde(default)]
    pub resume: Option<ResumeCustomization>,
    pub metrics: GenerationMetrics,
}

impl GenerationPackage {
    pub fn section(&self, kind: SectionKind) -> Option<&Section> {
        self.sections.iter().find(|s| s.kind == kind)
    }

    pub fn content(&self, kind: SectionKind) -> &str {
        self.section(kind).map(|s| s.content.as_str()).unwrap_or("")
    }

    pub fn is_degraded(&self) -> bool {
        self.sections.iter().any(|s| s.degraded)
    }
}

// --- CRM ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub opportunity_id: String,
    pub job_title: String,
    pub company: String,
    pub mode: Mode,
    pub sophistication_score: f64,
    pub personalization_depth: f64,
    pub parallel_efficiency: f64,
    pub generated_at: DateTime<Utc>,
    pub follow_up_at: DateTime<Utc>,
    pub package: GenerationPackage,
}

impl ApplicationRecord {
    pub fn from_package(package: GenerationPackage, follow_up_delay_days: i64) -> Self {
        Self {
            opportunity_id: package.opportunity_id.clone(),
            job_title: package.job_title.clone(),
            company: package.company.clone(),
            mode: package.mode,
            sophistication_score: package.metrics.sophistication_score,
            personalization_depth: package.metrics.personalization_depth,
            parallel_efficiency: package.metrics.parallel_efficiency,
            generated_at: package.generated_at,
            follow_up_at: follow_up_date(package.generated_at, follow_up_delay_days),
            package,
        }
    }
}

/// Falls back to `generated_at` when the delay cannot be represented.
fn follow_up_date(generated_at: DateTime<Utc>, delay_days: i64) -> DateTime<Utc> {
    chrono::Duration::try_days(delay_days.max(0))
        .and_then(|delay| generated_at.checked_add_signed(delay))
        .unwrap_or(generated_at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_case_and_punctuation() {
        assert_eq!(normalize("  Senior ML-Engineer,  (Remote) "), "senior ml engineer remote");
        assert_eq!(normalize("TechStart AI"), normalize("techstart   ai"));
    }

    #[test]
    fn test_opportunity_id_is_stable_and_normalized() {
        let a = opportunity_id("ML Platform Engineer", "TechStart AI", &Source::Linkedin);
        let b = opportunity_id("ml platform engineer ", "TECHSTART  AI", &Source::Linkedin);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);

        let other_source = opportunity_id("ML Platform Engineer", "TechStart AI", &Source::Indeed);
        assert_ne!(a, other_source);
    }

    #[test]
    fn test_dedup_key_ignores_source() {
        let a = Opportunity::new("ML Platform Engineer", "TechStart AI", Source::Linkedin);
        let b = Opportunity::new("ml platform engineer", "TechStart AI", Source::Indeed);
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_source_parsing_and_priority() {
        assert_eq!(Source::from("LinkedIn"), Source::Linkedin);
        assert_eq!(Source::from("company-direct"), Source::Company);
        assert_eq!(Source::from("hn_jobs"), Source::Aggregator);
        assert_eq!(Source::from("craigslist"), Source::Other("craigslist".to_string()));
        assert!(Source::Linkedin.priority() > Source::Indeed.priority());
        assert!(Source::Indeed.priority() > Source::Company.priority());
        assert!(Source::Company.priority() > Source::Aggregator.priority());
    }

    #[test]
    fn test_status_moves_forward_only() {
        use OpportunityStatus::*;
        assert!(Discovered.can_advance_to(Queued));
        assert!(Queued.can_advance_to(Generated));
        assert!(Generated.can_advance_to(Generated));
        assert!(Generated.can_advance_to(Rejected));
        assert!(!Generated.can_advance_to(Discovered));
        assert!(!Rejected.can_advance_to(Submitted));
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("Queued".parse::<OpportunityStatus>().unwrap(), OpportunityStatus::Queued);
        assert!("closed".parse::<OpportunityStatus>().is_err());
    }

    #[test]
    fn test_draft_deserializes_with_defaults() {
        let json = r#"{"title": "Data Engineer", "company": "Acme", "source": "indeed"}"#;
        let draft: OpportunityDraft = serde_json::from_str(json).unwrap();
        let opp = Opportunity::from_draft(draft);
        assert_eq!(opp.source, Source::Indeed);
        assert_eq!(opp.status, OpportunityStatus::Discovered);
        assert!(opp.technologies.is_empty());
        assert_eq!(opp.relevance_score, 0.0);
    }

    #[test]
    fn test_section_placeholder_is_marked_degraded() {
        let section = Section::placeholder(SectionKind::CoverLetter, "timeout");
        assert!(section.degraded);
        assert!(section.content.contains("cover_letter"));
        assert_eq!(SectionKind::CoverLetter.phase(), Phase::Content);
        assert_eq!(SectionKind::TechnicalAlignment.phase(), Phase::Research);
    }

    fn package(generated_at: DateTime<Utc>) -> GenerationPackage {
        GenerationPackage {
            opportunity_id: "abc".to_string(),
            job_title: "ML Engineer".to_string(),
            company: "Acme".to_string(),
            generated_at,
            mode: Mode::Template,
            modes_attempted: vec![Mode::Template],
            sections: Vec::new(),
            resume: None,
            metrics: GenerationMetrics {
                elapsed_secs: 0.1,
                api_calls: 0,
                sophistication_score: 8.5,
                personalization_depth: 7.0,
                parallel_efficiency: 0.9,
                degraded_sections: 0,
            },
        }
    }

    #[test]
    fn test_follow_up_date_from_delay() {
        let now = Utc::now();
        let record = ApplicationRecord::from_package(package(now), 3);
        assert_eq!(record.follow_up_at, now + chrono::Duration::days(3));
    }

    #[test]
    fn test_out_of_range_follow_up_delay_does_not_panic() {
        let now = Utc::now();
        let record = ApplicationRecord::from_package(package(now), 1_000_000_000_000);
        assert_eq!(record.follow_up_at, now);
        let record = ApplicationRecord::from_package(package(now), i64::MAX);
        assert_eq!(record.follow_up_at, now);
        let record = ApplicationRecord::from_package(package(now), -5);
        assert_eq!(record.follow_up_at, now);
    }

    #[test]
    fn test_resume_customization_markdown() {
        let resume = ResumeCustomization {
            emphasized_skills: vec!["Kubernetes".to_string(), "Python".to_string()],
            highlighted_achievements: Vec::new(),
            customized_summary: "Platform engineer moving into ML infrastructure.".to_string(),
            keyword_optimization: vec!["MLOps".to_string()],
        };
        let text = resume.to_markdown();
        assert!(text.starts_with("Summary: Platform engineer"));
        assert!(text.contains("Emphasize:\n- Kubernetes\n- Python"));
        assert!(text.contains("Keywords:\n- MLOps"));
        assert!(!text.contains("Highlight:"));
        assert!(!resume.is_empty());
        assert!(ResumeCustomization::default().is_empty());
    }

    #[test]
    fn test_resume_customization_truncated() {
        let many: Vec<String> = (0..8).map(|i| format!("item{}", i)).collect();
        let resume = ResumeCustomization {
            emphasized_skills: many.clone(),
            highlighted_achievements: many.clone(),
            customized_summary: "Summary".to_string(),
            keyword_optimization: many[..2].to_vec(),
        }
        .truncated(5);
        assert_eq!(resume.emphasized_skills.len(), 5);
        assert_eq!(resume.highlighted_achievements.len(), 5);
        assert_eq!(resume.keyword_optimization, vec!["item0", "item1"]);
    }
}
