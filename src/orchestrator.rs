use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::ai::{AIProvider, create_provider, resolve_model};
use crate::config::{CandidateProfile, Config, GenerationSettings};
use crate::credentials::Credential;
use crate::errors::{GenerationError, TaskError};
use crate::mode::{Mode, select_mode};
use crate::models::{
    GenerationMetrics, GenerationPackage, Opportunity, Phase, ResumeCustomization, Section,
    SectionKind,
};
use crate::parsing::{parse_content, parse_json};
use crate::progress::{ProgressEvent, ProgressTracker, Stage};
use crate::prompts::task_prompt;
use crate::templates;

/// Builds application packages. A phase in which every task failed aborts the
/// current mode and the run retries one mode down.
pub struct Orchestrator {
    settings: GenerationSettings,
    profile: CandidateProfile,
    model: String,
    progress: Option<UnboundedSender<ProgressEvent>>,
}

impl Orchestrator {
    pub fn new(config: &Config) -> Self {
        Self {
            settings: config.generation.clone(),
            profile: config.profile.clone(),
            model: config.model.clone(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, sender: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Builds a completion client from `credential` (if any) and generates.
    /// A client that cannot be built means TEMPLATE mode, not an error.
    pub async fn generate(
        &self,
        opp: &Opportunity,
        credential: Option<&Credential>,
    ) -> Result<GenerationPackage, GenerationError> {
        let provider = match credential {
            Some(cred) => self.build_provider(cred.clone()).await,
            None => None,
        };
        let result = self.generate_with(opp, provider.clone()).await;

        // The blocking HTTP client must not be torn down on a runtime thread.
        if let Some(provider) = provider {
            let _ = tokio::task::spawn_blocking(move || drop(provider)).await;
        }
        result
    }

    async fn build_provider(&self, credential: Credential) -> Option<Arc<dyn AIProvider>> {
        let model = self.model.clone();
        let timeout = Duration::from_secs(self.settings.request_timeout_secs);
        let built = tokio::task::spawn_blocking(move || {
            let spec = resolve_model(&model)?;
            create_provider(&spec, &credential, timeout)
        })
        .await;

        match built {
            Ok(Ok(provider)) => Some(provider),
            Ok(Err(e)) => {
                warn!(error = %e, "Could not set up completion client, using templates");
                None
            }
            Err(e) => {
                warn!(error = %e, "Completion client setup panicked, using templates");
                None
            }
        }
    }

    pub async fn generate_with(
        &self,
        opp: &Opportunity,
        provider: Option<Arc<dyn AIProvider>>,
    ) -> Result<GenerationPackage, GenerationError> {
        let started = Instant::now();
        let mut tracker =
            ProgressTracker::new(self.settings.estimated_total_secs, self.progress.clone());
        let mut mode = select_mode(provider.is_some());
        let mut modes_attempted = Vec::new();
        let mut attempts: Vec<(Mode, String)> = Vec::new();
        let mut api_calls = 0u32;

        info!(id = %opp.id, company = %opp.company, %mode, "Starting generation");
        tracker.update_stage(
            Stage::Initializing,
            &format!("Preparing {} at {}", opp.title, opp.company),
        );

        loop {
            modes_attempted.push(mode);
            let from_model = provider.is_some() && mode.uses_completion_api();
            let run = match provider.as_ref().filter(|_| mode.uses_completion_api()) {
                Some(provider) => {
                    self.run_phases(mode, opp, provider, &mut tracker, &mut api_calls)
                        .await
                }
                None => Ok(self.run_template(opp, &mut tracker)),
            };

            match run {
                Ok(mut sections) => {
                    tracker.update_stage(Stage::Finalizing, "Assembling application package");
                    let resume = self.settle_resume(opp, &mut sections, from_model);
                    let elapsed_secs = started.elapsed().as_secs_f64();
                    let metrics = quality_metrics(
                        mode,
                        &sections,
                        Some(&resume),
                        api_calls,
                        elapsed_secs,
                        self.settings.baseline_secs,
                    );
                    let package = GenerationPackage {
                        opportunity_id: opp.id.clone(),
                        job_title: opp.title.clone(),
                        company: opp.company.clone(),
                        generated_at: Utc::now(),
                        mode,
                        modes_attempted,
                        sections,
                        resume: Some(resume),
                        metrics,
                    };
                    tracker.complete(&format!(
                        "{} package ready for {} ({} degraded sections)",
                        mode, opp.company, package.metrics.degraded_sections
                    ));
                    info!(
                        id = %opp.id,
                        %mode,
                        elapsed_secs,
                        api_calls,
                        "Generation complete"
                    );
                    return Ok(package);
                }
                Err(e) => {
                    warn!(id = %opp.id, %mode, error = %e, "Generation mode failed");
                    attempts.push((mode, e.to_string()));
                    match mode.downgrade() {
                        Some(next) => {
                            tracker.update_progress(&format!("{}; retrying in {} mode", e, next));
                            mode = next;
                        }
                        None => {
                            let err = GenerationError::GenerationFailed { attempts };
                            tracker.error(&err.to_string());
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    /// Turns the model's JSON for the resume section into a customization,
    /// replacing unusable output with the profile-overlap version.
    fn settle_resume(
        &self,
        opp: &Opportunity,
        sections: &mut [Section],
        from_model: bool,
    ) -> ResumeCustomization {
        let local = templates::resume_customization(opp, &self.profile);
        let Some(section) = sections
            .iter_mut()
            .find(|s| s.kind == SectionKind::ResumeCustomization)
        else {
            return local;
        };
        if !from_model {
            return local;
        }

        if !section.degraded {
            match parse_json::<ResumeCustomization>(&section.content) {
                Ok(resume) if !resume.is_empty() => {
                    let resume = resume.truncated(templates::RESUME_LIST_LEN);
                    section.content = resume.to_markdown();
                    return resume;
                }
                Ok(_) => {
                    warn!(id = %opp.id, "Resume customization came back empty, using profile overlap")
                }
                Err(e) => {
                    warn!(id = %opp.id, error = %e, "Unusable resume customization, using profile overlap")
                }
            }
        }
        *section = Section {
            kind: SectionKind::ResumeCustomization,
            content: local.to_markdown(),
            degraded: true,
        };
        local
    }

    fn run_template(&self, opp: &Opportunity, tracker: &mut ProgressTracker) -> Vec<Section> {
        tracker.update_stage(Stage::Research, "Compiling research notes from the posting");
        tracker.update_stage(Stage::ContentGeneration, "Rendering application materials");
        templates::render_all(opp, &self.profile)
    }

    async fn run_phases(
        &self,
        mode: Mode,
        opp: &Opportunity,
        provider: &Arc<dyn AIProvider>,
        tracker: &mut ProgressTracker,
        api_calls: &mut u32,
    ) -> Result<Vec<Section>, GenerationError> {
        tracker.update_stage(
            Stage::Research,
            &format!("Researching {} ({} tasks)", opp.company, SectionKind::RESEARCH.len()),
        );
        let research = self
            .run_phase(mode, Phase::Research, &SectionKind::RESEARCH, opp, provider, &[], tracker, api_calls)
            .await?;

        tracker.update_stage(
            Stage::ContentGeneration,
            &format!("Writing materials ({} tasks)", SectionKind::CONTENT.len()),
        );
        let content = self
            .run_phase(mode, Phase::Content, &SectionKind::CONTENT, opp, provider, &research, tracker, api_calls)
            .await?;

        Ok(research.into_iter().chain(content).collect())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_phase(
        &self,
        mode: Mode,
        phase: Phase,
        kinds: &[SectionKind],
        opp: &Opportunity,
        provider: &Arc<dyn AIProvider>,
        research: &[Section],
        tracker: &mut ProgressTracker,
        api_calls: &mut u32,
    ) -> Result<Vec<Section>, GenerationError> {
        let delay = Duration::from_millis(self.settings.inter_call_delay_ms);
        let mut slots: Vec<Option<Section>> = vec![None; kinds.len()];

        if mode == Mode::ParallelAi {
            let mut set = JoinSet::new();
            for (slot, kind) in kinds.iter().copied().enumerate() {
                let prompt = task_prompt(kind, opp, &self.profile, research);
                let provider = Arc::clone(provider);
                set.spawn(async move { (slot, run_task(provider, kind, prompt, delay).await) });
            }
            *api_calls += kinds.len() as u32;

            // Barrier: nothing from the next phase starts until every task here is joined.
            let mut done = 0;
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((slot, section)) => {
                        done += 1;
                        tracker.update_progress(&format!(
                            "{} {} ({}/{})",
                            section.kind,
                            if section.degraded { "degraded" } else { "done" },
                            done,
                            kinds.len()
                        ));
                        slots[slot] = Some(section);
                    }
                    Err(e) => warn!(%phase, error = %e, "Generation task aborted"),
                }
            }
        } else {
            for (slot, kind) in kinds.iter().copied().enumerate() {
                let prompt = task_prompt(kind, opp, &self.profile, research);
                *api_calls += 1;
                let section = run_task(Arc::clone(provider), kind, prompt, delay).await;
                tracker.update_progress(&format!(
                    "{} {} ({}/{})",
                    section.kind,
                    if section.degraded { "degraded" } else { "done" },
                    slot + 1,
                    kinds.len()
                ));
                slots[slot] = Some(section);
            }
        }

        let sections: Vec<Section> = slots
            .into_iter()
            .zip(kinds.iter().copied())
            .map(|(section, kind)| {
                section.unwrap_or_else(|| Section::placeholder(kind, "task aborted"))
            })
            .collect();

        if sections.iter().all(|s| s.degraded) {
            return Err(GenerationError::ModeDowngradeRequired { mode, phase });
        }
        debug!(
            %phase,
            degraded = sections.iter().filter(|s| s.degraded).count(),
            "Phase complete"
        );
        Ok(sections)
    }
}

/// One isolated task. Any failure becomes a degraded placeholder.
async fn run_task(
    provider: Arc<dyn AIProvider>,
    kind: SectionKind,
    prompt: String,
    delay: Duration,
) -> Section {
    match call_model(provider, kind, prompt, delay).await {
        Ok(text) => Section::generated(kind, text),
        Err(e) => {
            warn!(task = %kind, error = %e, "Task failed, using placeholder");
            Section::placeholder(kind, &e.to_string())
        }
    }
}

async fn call_model(
    provider: Arc<dyn AIProvider>,
    kind: SectionKind,
    prompt: String,
    delay: Duration,
) -> Result<String, TaskError> {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let max_tokens = kind.max_tokens();
    let raw = tokio::task::spawn_blocking(move || provider.complete(&prompt, max_tokens))
        .await
        .map_err(|e| TaskError::ExternalCall(format!("worker failed: {}", e)))?
        .map_err(|e| TaskError::ExternalCall(format!("{:#}", e)))?;
    Ok(parse_content(&raw)?)
}

fn healthy_fraction<'a>(sections: impl Iterator<Item = &'a Section>) -> f64 {
    let (total, healthy) = sections.fold((0usize, 0usize), |(t, h), s| {
        (t + 1, h + usize::from(!s.degraded))
    });
    if total == 0 {
        0.0
    } else {
        healthy as f64 / total as f64
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Bonus to personalization for each full resume list (skills, keywords).
const RESUME_LIST_BONUS: f64 = 0.25;
const FULL_RESUME_LIST: usize = 5;

pub fn quality_metrics(
    mode: Mode,
    sections: &[Section],
    resume: Option<&ResumeCustomization>,
    api_calls: u32,
    elapsed_secs: f64,
    baseline_secs: f64,
) -> GenerationMetrics {
    let (sophistication_base, personalization_base) = match mode {
        Mode::ParallelAi => (9.5, 9.8),
        Mode::Ai => (9.0, 9.0),
        Mode::Template => (8.5, 7.0),
    };
    let overall_health = healthy_fraction(sections.iter());
    let research_health =
        healthy_fraction(sections.iter().filter(|s| s.kind.phase() == Phase::Research));

    let resume_bonus = resume.map_or(0.0, |r| {
        [r.emphasized_skills.len(), r.keyword_optimization.len()]
            .iter()
            .filter(|n| **n >= FULL_RESUME_LIST)
            .count() as f64
            * RESUME_LIST_BONUS
    });

    GenerationMetrics {
        elapsed_secs,
        api_calls,
        sophistication_score: round1(sophistication_base * overall_health),
        personalization_depth: round1(
            (personalization_base * research_health + resume_bonus).min(10.0),
        ),
        parallel_efficiency: 1.0 - elapsed_secs / baseline_secs,
        degraded_sections: sections.iter().filter(|s| s.degraded).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ProviderKind;
    use crate::ai::testing::ScriptedProvider;
    use crate::models::Source;
    use anyhow::anyhow;
    use tokio::sync::mpsc::unbounded_channel;

    fn config() -> Config {
        let mut config = Config::default();
        config.generation.inter_call_delay_ms = 0;
        config
    }

    fn opportunity() -> Opportunity {
        Opportunity::new("ML Platform Engineer", "TechStart AI", Source::Linkedin)
            .with_description("Kubernetes and PyTorch training infrastructure")
    }

    fn is_competitive_task(prompt: &str) -> bool {
        prompt.starts_with("Describe the company's competitive landscape")
    }

    const RESUME_JSON: &str = r#"```json
{"emphasized_skills": ["Kubernetes", "Python", "Terraform", "MLOps", "Observability"],
 "highlighted_achievements": ["Cut deployment lead time"],
 "customized_summary": "Platform engineer for ML training infrastructure.",
 "keyword_optimization": ["PyTorch", "Kubernetes", "MLOps", "training", "inference"]}
```"#;

    fn is_resume_task(prompt: &str) -> bool {
        prompt.starts_with("Tailor the candidate's resume")
    }

    /// Answers `text` everywhere except the resume task, which gets valid JSON.
    fn answering_with_resume(text: &'static str) -> ScriptedProvider {
        ScriptedProvider::new(move |prompt| {
            if is_resume_task(prompt) {
                Ok(RESUME_JSON.to_string())
            } else {
                Ok(text.to_string())
            }
        })
    }

    fn is_content_task(prompt: &str) -> bool {
        SectionKind::CONTENT.iter().any(|kind| {
            let first = task_prompt(*kind, &opportunity(), &CandidateProfile::default(), &[]);
            prompt.starts_with(first.lines().next().unwrap_or_default())
        })
    }

    #[tokio::test]
    async fn test_without_credential_uses_templates() {
        let orchestrator = Orchestrator::new(&config());
        let package = orchestrator.generate(&opportunity(), None).await.unwrap();

        assert_eq!(package.mode, Mode::Template);
        assert_eq!(package.modes_attempted, vec![Mode::Template]);
        assert_eq!(package.sections.len(), 10);
        assert!(!package.is_degraded());
        assert_eq!(package.metrics.api_calls, 0);
        assert_eq!(package.metrics.sophistication_score, 8.5);
        // Default profile fills both resume lists.
        assert_eq!(package.metrics.personalization_depth, 7.5);

        let resume = package.resume.as_ref().unwrap();
        assert_eq!(
            resume,
            &templates::resume_customization(&opportunity(), &CandidateProfile::default())
        );
        assert_eq!(
            package.content(SectionKind::ResumeCustomization),
            resume.to_markdown()
        );
    }

    #[tokio::test]
    async fn test_credential_for_wrong_provider_falls_back_to_templates() {
        // Default model is an Anthropic one.
        let orchestrator = Orchestrator::new(&config());
        let credential = Credential::new(ProviderKind::OpenAI, "k");
        let package = orchestrator
            .generate(&opportunity(), Some(&credential))
            .await
            .unwrap();

        assert_eq!(package.mode, Mode::Template);
        assert_eq!(package.modes_attempted, vec![Mode::Template]);
        assert_eq!(package.metrics.api_calls, 0);
    }

    #[tokio::test]
    async fn test_parallel_mode_generates_every_section() {
        let provider = Arc::new(answering_with_resume("Generated text"));
        let orchestrator = Orchestrator::new(&config());
        let package = orchestrator
            .generate_with(&opportunity(), Some(provider.clone()))
            .await
            .unwrap();

        assert_eq!(package.mode, Mode::ParallelAi);
        assert_eq!(package.sections.len(), 10);
        assert!(!package.is_degraded());
        assert_eq!(package.metrics.api_calls, 10);
        assert_eq!(provider.calls(), 10);
        assert_eq!(package.metrics.sophistication_score, 9.5);
        assert_eq!(package.metrics.personalization_depth, 10.0);
        assert_eq!(package.content(SectionKind::CoverLetter), "Generated text");

        let resume = package.resume.as_ref().unwrap();
        assert_eq!(resume.keyword_optimization[0], "PyTorch");
        assert!(
            package
                .content(SectionKind::ResumeCustomization)
                .starts_with("Summary: Platform engineer for ML training infrastructure.")
        );
    }

    #[tokio::test]
    async fn test_unusable_resume_json_falls_back_to_profile_overlap() {
        let provider = Arc::new(ScriptedProvider::answering("Here is some prose, not JSON."));
        let orchestrator = Orchestrator::new(&config());
        let package = orchestrator
            .generate_with(&opportunity(), Some(provider.clone()))
            .await
            .unwrap();

        assert_eq!(package.mode, Mode::ParallelAi);
        let section = package.section(SectionKind::ResumeCustomization).unwrap();
        assert!(section.degraded);
        let local = templates::resume_customization(&opportunity(), &CandidateProfile::default());
        assert_eq!(section.content, local.to_markdown());
        assert_eq!(package.resume, Some(local));
        assert_eq!(package.metrics.degraded_sections, 1);
    }

    #[tokio::test]
    async fn test_failed_research_task_does_not_block_the_others() {
        let provider = Arc::new(ScriptedProvider::new(|prompt| {
            if is_competitive_task(prompt) {
                Err(anyhow!("connection reset"))
            } else if is_resume_task(prompt) {
                Ok(RESUME_JSON.to_string())
            } else {
                Ok("fine".to_string())
            }
        }));
        let orchestrator = Orchestrator::new(&config());
        let package = orchestrator
            .generate_with(&opportunity(), Some(provider.clone()))
            .await
            .unwrap();

        assert_eq!(package.mode, Mode::ParallelAi);
        let competitive = package.section(SectionKind::CompetitiveAnalysis).unwrap();
        assert!(competitive.degraded);
        assert!(competitive.content.contains("connection reset"));
        for kind in SectionKind::RESEARCH.iter().filter(|k| **k != SectionKind::CompetitiveAnalysis) {
            assert!(!package.section(*kind).unwrap().degraded);
        }
        // Phase 2 still ran in full.
        for kind in SectionKind::CONTENT {
            assert!(!package.section(kind).unwrap().degraded);
        }
        assert_eq!(provider.calls(), 10);
        assert_eq!(package.metrics.degraded_sections, 1);
        assert!(package.metrics.personalization_depth < 9.8);
    }

    #[tokio::test]
    async fn test_content_phase_starts_after_research_barrier() {
        let provider = Arc::new(ScriptedProvider::answering("research output"));
        let orchestrator = Orchestrator::new(&config());
        orchestrator
            .generate_with(&opportunity(), Some(provider.clone()))
            .await
            .unwrap();

        let prompts = provider.prompts();
        assert_eq!(prompts.len(), 10);
        assert!(prompts[..4].iter().all(|p| !p.contains("Research notes")));
        assert!(prompts[4..].iter().all(|p| p.contains("Research notes")));
        assert!(prompts[4..].iter().all(|p| p.contains("research output")));
    }

    #[tokio::test]
    async fn test_systemic_failure_downgrades_to_template() {
        let provider = Arc::new(ScriptedProvider::failing("401 unauthorized"));
        let orchestrator = Orchestrator::new(&config());
        let package = orchestrator
            .generate_with(&opportunity(), Some(provider.clone()))
            .await
            .unwrap();

        assert_eq!(package.mode, Mode::Template);
        assert_eq!(
            package.modes_attempted,
            vec![Mode::ParallelAi, Mode::Ai, Mode::Template]
        );
        assert!(!package.is_degraded());
        // Only the research phase ran in each AI mode.
        assert_eq!(provider.calls(), 8);
        assert_eq!(package.metrics.api_calls, 8);
    }

    #[tokio::test]
    async fn test_content_phase_failure_also_downgrades() {
        let provider = Arc::new(ScriptedProvider::new(|prompt| {
            if is_content_task(prompt) {
                Ok("   ".to_string())
            } else {
                Ok("notes".to_string())
            }
        }));
        let orchestrator = Orchestrator::new(&config());
        let package = orchestrator
            .generate_with(&opportunity(), Some(provider.clone()))
            .await
            .unwrap();

        assert_eq!(package.mode, Mode::Template);
        assert_eq!(provider.calls(), 20);
    }

    #[tokio::test]
    async fn test_progress_is_reported_over_the_channel() {
        let (tx, mut rx) = unbounded_channel();
        let provider = Arc::new(ScriptedProvider::failing("down"));
        let orchestrator = Orchestrator::new(&config()).with_progress(tx);
        orchestrator
            .generate_with(&opportunity(), Some(provider))
            .await
            .unwrap();
        drop(orchestrator);

        let mut percents = Vec::new();
        let mut heartbeats = 0;
        let mut completed = false;
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::StageChanged { percent, .. } => percents.push(percent),
                ProgressEvent::Heartbeat { .. } => heartbeats += 1,
                ProgressEvent::Completed(_) => completed = true,
                ProgressEvent::Failed { .. } => panic!("run should not fail"),
            }
        }
        assert!(completed);
        assert!(heartbeats >= 8);
        assert!(percents.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_quality_metrics() {
        let sections: Vec<Section> = SectionKind::RESEARCH
            .iter()
            .chain(SectionKind::CONTENT.iter())
            .map(|k| Section::generated(*k, "x".to_string()))
            .collect();
        let metrics = quality_metrics(Mode::ParallelAi, &sections, None, 10, 21.0, 105.0);
        assert_eq!(metrics.sophistication_score, 9.5);
        assert_eq!(metrics.personalization_depth, 9.8);
        assert!((metrics.parallel_efficiency - 0.8).abs() < 1e-9);

        // Slower than the baseline is reported as negative efficiency.
        let metrics = quality_metrics(Mode::Ai, &sections, None, 10, 210.0, 105.0);
        assert!((metrics.parallel_efficiency + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_quality_metrics_resume_bonus() {
        let sections = templates::render_all(&opportunity(), &CandidateProfile::default());
        let five: Vec<String> = (0..5).map(|i| format!("skill{}", i)).collect();
        let full = ResumeCustomization {
            emphasized_skills: five.clone(),
            keyword_optimization: five,
            ..ResumeCustomization::default()
        };
        let half = ResumeCustomization {
            keyword_optimization: vec!["one".to_string()],
            ..full.clone()
        };

        let metrics = quality_metrics(Mode::Template, &sections, Some(&full), 0, 1.0, 105.0);
        assert_eq!(metrics.personalization_depth, 7.5);
        let metrics = quality_metrics(Mode::Template, &sections, Some(&half), 0, 1.0, 105.0);
        assert_eq!(metrics.personalization_depth, 7.3);
        // Capped at 10.
        let metrics = quality_metrics(Mode::ParallelAi, &sections, Some(&full), 10, 1.0, 105.0);
        assert_eq!(metrics.personalization_depth, 10.0);
    }
}
