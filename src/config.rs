use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs};

pub const DEFAULT_MODEL: &str = "api-sonnet";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database file; `None` means the XDG data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub commander: CommanderSettings,
    #[serde(default)]
    pub profile: CandidateProfile,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            model: default_model(),
            scoring: ScoringConfig::default(),
            generation: GenerationSettings::default(),
            commander: CommanderSettings::default(),
            profile: CandidateProfile::default(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub technical: f64,
    pub transition: f64,
    pub culture: f64,
    pub growth: f64,
    pub compensation: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            technical: 0.40,
            transition: 0.25,
            culture: 0.20,
            growth: 0.10,
            compensation: 0.05,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.technical + self.transition + self.culture + self.growth + self.compensation
    }

    pub fn validate(&self) -> Result<()> {
        let all = [
            self.technical,
            self.transition,
            self.culture,
            self.growth,
            self.compensation,
        ];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            bail!("Scoring weights must be finite and non-negative: {:?}", self);
        }
        if (self.sum() - 1.0).abs() > 1e-6 {
            bail!("Scoring weights must sum to 1.0, got {:.4}", self.sum());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: ScoringWeights,
    #[serde(default = "default_apply_threshold")]
    pub apply_threshold: f64,
    #[serde(default = "default_research_threshold")]
    pub research_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            apply_threshold: default_apply_threshold(),
            research_threshold: default_research_threshold(),
        }
    }
}

const fn default_apply_threshold() -> f64 {
    8.0
}

const fn default_research_threshold() -> f64 {
    6.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    /// Pause before every completion call.
    #[serde(default = "default_inter_call_delay_ms")]
    pub inter_call_delay_ms: u64,
    /// Sequential wall-clock time that parallel efficiency is measured against.
    #[serde(default = "default_baseline_secs")]
    pub baseline_secs: f64,
    /// ETA used while too little progress has been made to extrapolate.
    #[serde(default = "default_estimated_total_secs")]
    pub estimated_total_secs: f64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            inter_call_delay_ms: default_inter_call_delay_ms(),
            baseline_secs: default_baseline_secs(),
            estimated_total_secs: default_estimated_total_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

const fn default_inter_call_delay_ms() -> u64 {
    1000
}

const fn default_baseline_secs() -> f64 {
    105.0
}

const fn default_estimated_total_secs() -> f64 {
    40.0
}

const fn default_request_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommanderSettings {
    #[serde(default = "default_max_daily_applications")]
    pub max_daily_applications: usize,
    #[serde(default = "default_follow_up_delay_days")]
    pub follow_up_delay_days: i64,
    #[serde(default = "default_min_queue_score")]
    pub min_queue_score: f64,
}

impl Default for CommanderSettings {
    fn default() -> Self {
        Self {
            max_daily_applications: default_max_daily_applications(),
            follow_up_delay_days: default_follow_up_delay_days(),
            min_queue_score: default_min_queue_score(),
        }
    }
}

pub const MAX_FOLLOW_UP_DELAY_DAYS: i64 = 365;

const fn default_max_daily_applications() -> usize {
    5
}

const fn default_follow_up_delay_days() -> i64 {
    3
}

const fn default_min_queue_score() -> f64 {
    6.0
}

/// The candidate that generated materials are written for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateProfile {
    pub name: String,
    pub headline: String,
    pub years_experience: u32,
    pub core_skills: Vec<String>,
    pub achievements: Vec<String>,
    pub target_roles: Vec<String>,
}

impl Default for CandidateProfile {
    fn default() -> Self {
        Self {
            name: "Candidate".to_string(),
            headline: "Infrastructure engineer moving into AI/ML platform work".to_string(),
            years_experience: 10,
            core_skills: vec![
                "Kubernetes".to_string(),
                "Python".to_string(),
                "Terraform".to_string(),
                "CI/CD".to_string(),
                "Observability".to_string(),
            ],
            achievements: vec![
                "Cut deployment lead time from days to minutes".to_string(),
                "Ran production clusters serving millions of requests per day".to_string(),
            ],
            target_roles: vec![
                "ML Platform Engineer".to_string(),
                "MLOps Engineer".to_string(),
                "AI Infrastructure Engineer".to_string(),
            ],
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "commander").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads `path`, or the default location when `None`. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path(),
        };

        let mut config = match path {
            Some(ref p) if p.exists() => {
                let raw = fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file {}", p.display()))?;
                toml::from_str::<Config>(&raw)
                    .with_context(|| format!("Failed to parse config file {}", p.display()))?
            }
            _ => Config::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(db) = env::var("COMMANDER_DB") {
            if !db.trim().is_empty() {
                self.database_path = Some(PathBuf::from(db));
            }
        }
        if let Ok(model) = env::var("COMMANDER_MODEL") {
            if !model.trim().is_empty() {
                self.model = model;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.scoring
            .weights
            .validate()
            .context("Invalid [scoring.weights]")?;
        for (name, value) in [
            ("scoring.apply_threshold", self.scoring.apply_threshold),
            ("scoring.research_threshold", self.scoring.research_threshold),
            ("commander.min_queue_score", self.commander.min_queue_score),
        ] {
            if !value.is_finite() || !(0.0..=10.0).contains(&value) {
                bail!("{} must be a score between 0 and 10, got {}", name, value);
            }
        }
        if self.scoring.research_threshold > self.scoring.apply_threshold {
            bail!(
                "research_threshold ({}) must not exceed apply_threshold ({})",
                self.scoring.research_threshold,
                self.scoring.apply_threshold
            );
        }
        if !self.generation.baseline_secs.is_finite() || self.generation.baseline_secs <= 0.0 {
            bail!("generation.baseline_secs must be positive");
        }
        if !(0..=MAX_FOLLOW_UP_DELAY_DAYS).contains(&self.commander.follow_up_delay_days) {
            bail!(
                "commander.follow_up_delay_days must be between 0 and {}, got {}",
                MAX_FOLLOW_UP_DELAY_DAYS,
                self.commander.follow_up_delay_days
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_weights_sum_to_one() {
        let weights = ScoringWeights::default();
        assert!((weights.sum() - 1.0).abs() < 1e-9);
        assert!(weights.validate().is_ok());
    }

    #[test]
    fn test_weights_that_do_not_sum_to_one_are_rejected() {
        let weights = ScoringWeights {
            technical: 0.5,
            ..ScoringWeights::default()
        };
        let err = weights.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.scoring.apply_threshold, 8.0);
        assert_eq!(config.commander.max_daily_applications, 5);
        assert_eq!(config.generation.inter_call_delay_ms, 1000);
        assert!(!config.model.is_empty());
    }

    #[test]
    fn test_load_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[generation]\ninter_call_delay_ms = 0\n\n[commander]\nmax_daily_applications = 2\n\n[profile]\nname = \"Ada\""
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.generation.inter_call_delay_ms, 0);
        assert_eq!(config.generation.baseline_secs, 105.0);
        assert_eq!(config.commander.max_daily_applications, 2);
        assert_eq!(config.commander.follow_up_delay_days, 3);
        assert_eq!(config.profile.name, "Ada");
        assert!(!config.profile.core_skills.is_empty());
    }

    #[test]
    fn test_load_rejects_bad_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[scoring.weights]\ntechnical = 0.9\ntransition = 0.9\nculture = 0.0\ngrowth = 0.0\ncompensation = 0.0\n",
        )
        .unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_follow_up_delay() {
        let mut config = Config::default();
        config.commander.follow_up_delay_days = 1_000_000_000_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("follow_up_delay_days"));

        config.commander.follow_up_delay_days = -1;
        assert!(config.validate().is_err());

        config.commander.follow_up_delay_days = MAX_FOLLOW_UP_DELAY_DAYS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_finite_thresholds() {
        let mut config = Config::default();
        config.scoring.apply_threshold = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scoring.research_threshold = f64::NEG_INFINITY;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.commander.min_queue_score = f64::INFINITY;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_queue_score"));

        let mut config = Config::default();
        config.generation.baseline_secs = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_rejects_huge_follow_up_delay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[commander]\nfollow_up_delay_days = 100000\n").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("follow_up_delay_days"));
    }
}
