use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ai::AIProvider;
use crate::config::{CandidateProfile, Config, ScoringConfig};
use crate::errors::TaskError;
use crate::models::{normalize, Opportunity, Recommendation, ScoringMethod, ScoringResult};
use crate::parsing::parse_json;
use crate::prompts::scoring_prompt;

const AI_KEYWORDS: &[&str] = &[
    "machine learning",
    "ml",
    "artificial intelligence",
    "ai",
    "deep learning",
    "neural networks",
    "tensorflow",
    "pytorch",
    "scikit-learn",
    "pandas",
    "numpy",
    "data science",
    "nlp",
    "computer vision",
    "automation",
    "python",
    "jupyter",
    "model deployment",
    "mlops",
    "data pipeline",
];

const INFRASTRUCTURE_KEYWORDS: &[&str] = &[
    "kubernetes",
    "docker",
    "aws",
    "azure",
    "gcp",
    "terraform",
    "ansible",
    "jenkins",
    "ci/cd",
    "devops",
    "monitoring",
    "prometheus",
    "grafana",
    "linux",
    "bash",
    "networking",
    "security",
    "sre",
    "site reliability",
];

const GROWTH_KEYWORDS: &[&str] = &[
    "startup",
    "scale-up",
    "learning",
    "mentorship",
    "training",
    "conference budget",
    "education",
    "certification",
    "career development",
    "advancement",
    "leadership",
    "team lead",
    "senior",
    "principal",
];

const RED_FLAG_KEYWORDS: &[&str] = &[
    "unpaid",
    "volunteer",
    "commission only",
    "no benefits",
    "long hours",
    "weekend work",
    "on-call 24/7",
    "toxic",
    "high pressure",
];

const CULTURE_POSITIVE: &[&str] = &[
    "learning",
    "growth",
    "mentorship",
    "collaboration",
    "work-life balance",
    "flexible",
    "remote",
    "innovative",
];

const CULTURE_NEGATIVE: &[&str] = &["fast-paced", "high pressure", "long hours", "weekend work"];

const TRANSITION_TERMS: &[&str] = &[
    "junior",
    "associate",
    "entry level",
    "transition",
    "bootcamp",
    "new grad",
    "career change",
    "devops to ai",
];

const PLATFORM_ADJACENT: &[&str] = &[
    "senior devops",
    "senior infrastructure",
    "platform engineer",
    "data platform",
    "ml platform",
    "ai platform",
    "mlops",
];

const SENIOR_TITLES: &[&str] = &["principal", "staff", "lead"];
const INFRA_TITLES: &[&str] = &["infrastructure", "platform", "devops"];

const MAX_KEYWORDS_REPORTED: usize = 10;

/// Text normalized to single-spaced words with a space on each end, so
/// `contains(" term ")` is a whole-word match.
struct MatchText(String);

impl MatchText {
    fn new(text: &str) -> Self {
        MatchText(format!(" {} ", normalize(text)))
    }

    fn has(&self, term: &str) -> bool {
        let term = normalize(term);
        !term.is_empty() && self.0.contains(&format!(" {} ", term))
    }

    fn matches<'a>(&self, terms: &[&'a str]) -> Vec<&'a str> {
        terms.iter().copied().filter(|t| self.has(t)).collect()
    }

    fn count(&self, terms: &[&str]) -> usize {
        terms.iter().filter(|t| self.has(t)).count()
    }
}

/// Highest figure in a salary string, with "k" expanded. Figures below 1000 are ignored.
pub fn parse_max_salary(salary: &str) -> Option<f64> {
    let re = Regex::new(r"(\d+(?:\.\d+)?)\s*([kK])?").ok()?;
    let cleaned = salary.replace(',', "");
    re.captures_iter(&cleaned)
        .filter_map(|cap| {
            let value: f64 = cap.get(1)?.as_str().parse().ok()?;
            let value = if cap.get(2).is_some() { value * 1000.0 } else { value };
            (value >= 1000.0).then_some(value)
        })
        .reduce(f64::max)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Dimensions {
    technical: f64,
    transition: f64,
    culture: f64,
    growth: f64,
    compensation: f64,
}

impl Dimensions {
    fn clamped(self) -> Self {
        let c = |v: f64| if v.is_finite() { v.clamp(0.0, 10.0) } else { 5.0 };
        Self {
            technical: c(self.technical),
            transition: c(self.transition),
            culture: c(self.culture),
            growth: c(self.growth),
            compensation: c(self.compensation),
        }
    }
}

fn default_dimension() -> f64 {
    5.0
}

#[derive(Debug, Deserialize)]
struct ModelAssessment {
    #[serde(default = "default_dimension")]
    technical_score: f64,
    #[serde(default = "default_dimension")]
    transition_score: f64,
    #[serde(default = "default_dimension")]
    culture_score: f64,
    #[serde(default = "default_dimension")]
    growth_score: f64,
    #[serde(default = "default_dimension")]
    compensation_score: f64,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    keywords_matched: Vec<String>,
    #[serde(default)]
    red_flags: Vec<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Clone)]
pub struct Scorer {
    config: ScoringConfig,
    profile: CandidateProfile,
    provider: Option<Arc<dyn AIProvider>>,
}

impl Scorer {
    pub fn new(config: ScoringConfig, profile: CandidateProfile) -> Self {
        Self {
            config,
            profile,
            provider: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.scoring.clone(), config.profile.clone())
    }

    pub fn with_provider(mut self, provider: Arc<dyn AIProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn score(&self, opp: &Opportunity) -> ScoringResult {
        let Some(provider) = &self.provider else {
            return self.heuristic_score(opp, ScoringMethod::Heuristic);
        };
        match self.model_score(opp, provider.as_ref()) {
            Ok(result) => result,
            Err(e) => {
                warn!(id = %opp.id, error = %e, "Model scoring failed, using heuristics");
                self.heuristic_score(opp, ScoringMethod::HeuristicFallback)
            }
        }
    }

    pub fn recommend(&self, overall: f64) -> Recommendation {
        if overall >= self.config.apply_threshold {
            Recommendation::Apply
        } else if overall >= self.config.research_threshold {
            Recommendation::Research
        } else {
            Recommendation::Pass
        }
    }

    fn overall(&self, dims: &Dimensions) -> f64 {
        let w = &self.config.weights;
        let raw = dims.technical * w.technical
            + dims.transition * w.transition
            + dims.culture * w.culture
            + dims.growth * w.growth
            + dims.compensation * w.compensation;
        ((raw * 10.0).round() / 10.0).clamp(0.0, 10.0)
    }

    fn model_score(
        &self,
        opp: &Opportunity,
        provider: &dyn AIProvider,
    ) -> Result<ScoringResult, TaskError> {
        let prompt = scoring_prompt(opp, &self.profile);
        let raw = provider
            .complete(&prompt, 800)
            .map_err(|e| TaskError::ExternalCall(format!("{:#}", e)))?;
        let assessment: ModelAssessment = parse_json(&raw)?;

        let dims = Dimensions {
            technical: assessment.technical_score,
            transition: assessment.transition_score,
            culture: assessment.culture_score,
            growth: assessment.growth_score,
            compensation: assessment.compensation_score,
        }
        .clamped();
        let overall = self.overall(&dims);
        let confidence = assessment
            .confidence
            .filter(|c| c.is_finite())
            .unwrap_or(0.8)
            .clamp(0.0, 1.0);

        debug!(id = %opp.id, overall, "Model scoring complete");
        Ok(ScoringResult {
            overall_score: overall,
            confidence,
            technical_score: dims.technical,
            transition_score: dims.transition,
            culture_score: dims.culture,
            growth_score: dims.growth,
            compensation_score: dims.compensation,
            reasoning: assessment
                .reasoning
                .unwrap_or_else(|| "Model analysis completed".to_string()),
            recommendation: self.recommend(overall),
            keywords_matched: assessment
                .keywords_matched
                .into_iter()
                .take(MAX_KEYWORDS_REPORTED)
                .collect(),
            red_flags: assessment.red_flags,
            method: ScoringMethod::Ai,
        })
    }

    fn heuristic_score(&self, opp: &Opportunity, method: ScoringMethod) -> ScoringResult {
        let text = MatchText::new(&opp.searchable_text());
        let title = MatchText::new(&opp.title);

        let ai_hits = text.matches(AI_KEYWORDS);
        let infra_hits = text.matches(INFRASTRUCTURE_KEYWORDS);

        let dims = Dimensions {
            technical: technical_score(ai_hits.len(), infra_hits.len()),
            transition: transition_score(&text, &title, ai_hits.len()),
            culture: culture_score(&text),
            growth: growth_score(&text),
            compensation: compensation_score(opp.salary_range.as_deref()),
        }
        .clamped();
        let overall = self.overall(&dims);
        let red_flags: Vec<String> = text
            .matches(RED_FLAG_KEYWORDS)
            .into_iter()
            .map(String::from)
            .collect();
        let keywords_matched: Vec<String> = ai_hits
            .iter()
            .chain(infra_hits.iter())
            .take(MAX_KEYWORDS_REPORTED)
            .map(|s| s.to_string())
            .collect();

        let reasoning = format!(
            "Keyword analysis: {} AI/ML terms, {} infrastructure terms, {} red flags; \
             technical {:.1}, transition {:.1}, culture {:.1}, growth {:.1}, compensation {:.1}",
            ai_hits.len(),
            infra_hits.len(),
            red_flags.len(),
            dims.technical,
            dims.transition,
            dims.culture,
            dims.growth,
            dims.compensation
        );

        ScoringResult {
            overall_score: overall,
            confidence: match method {
                ScoringMethod::HeuristicFallback => 0.5,
                _ => 0.6,
            },
            technical_score: dims.technical,
            transition_score: dims.transition,
            culture_score: dims.culture,
            growth_score: dims.growth,
            compensation_score: dims.compensation,
            reasoning,
            recommendation: self.recommend(overall),
            keywords_matched,
            red_flags,
            method,
        }
    }
}

fn technical_score(ai_hits: usize, infra_hits: usize) -> f64 {
    let ai = (ai_hits as f64 * 2.0).min(10.0);
    let infra_bonus = (infra_hits as f64 * 0.5).min(3.0);
    (ai + infra_bonus).min(10.0)
}

fn transition_score(text: &MatchText, title: &MatchText, ai_hits: usize) -> f64 {
    if title.count(SENIOR_TITLES) > 0 && title.count(INFRA_TITLES) == 0 {
        return 3.0;
    }
    if text.count(TRANSITION_TERMS) > 0 {
        return 9.0;
    }
    if text.count(PLATFORM_ADJACENT) > 0 {
        return 8.0;
    }
    5.0 + 0.8 * ai_hits.min(5) as f64
}

fn culture_score(text: &MatchText) -> f64 {
    let positives = text.count(CULTURE_POSITIVE) as f64;
    let negatives = text.count(CULTURE_NEGATIVE) as f64;
    let red_flags = text.count(RED_FLAG_KEYWORDS) as f64;
    (6.0 + 1.5 * positives - 1.5 * negatives - red_flags).clamp(1.0, 10.0)
}

fn growth_score(text: &MatchText) -> f64 {
    match text.count(GROWTH_KEYWORDS) {
        n if n >= 3 => 9.0,
        n if n >= 1 => 7.0,
        _ => 5.0,
    }
}

fn compensation_score(salary: Option<&str>) -> f64 {
    let Some(max) = salary.and_then(parse_max_salary) else {
        return 5.0;
    };
    if max >= 120_000.0 {
        8.0
    } else if max >= 90_000.0 {
        6.0
    } else if max >= 60_000.0 {
        4.0
    } else {
        2.0
    }
}
