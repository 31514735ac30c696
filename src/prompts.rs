use crate::config::CandidateProfile;
use crate::models::{Opportunity, Section, SectionKind};

const MAX_DESCRIPTION_CHARS: usize = 1500;

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn posting_block(opp: &Opportunity) -> String {
    format!(
        "Job Title: {}\nCompany: {}\nLocation: {}\nSalary: {}\nDescription: {}\nRequirements: {}\nTechnologies: {}",
        opp.title,
        opp.company,
        opp.location,
        opp.salary_range.as_deref().unwrap_or("Not specified"),
        truncate_chars(&opp.description, MAX_DESCRIPTION_CHARS),
        opp.requirements.iter().take(10).cloned().collect::<Vec<_>>().join("; "),
        opp.technologies.iter().take(15).cloned().collect::<Vec<_>>().join(", "),
    )
}

fn profile_block(profile: &CandidateProfile) -> String {
    format!(
        "Candidate: {}\nHeadline: {}\nExperience: {} years\nSkills: {}\nAchievements: {}\nTarget roles: {}",
        profile.name,
        profile.headline,
        profile.years_experience,
        profile.core_skills.join(", "),
        profile.achievements.join("; "),
        profile.target_roles.join(", "),
    )
}

pub fn scoring_prompt(opp: &Opportunity, profile: &CandidateProfile) -> String {
    format!(
        "Score this job posting for the candidate below on five dimensions, each 0-10: \
         technical_score, transition_score, culture_score, growth_score, compensation_score.\n\
         Return ONLY a JSON object with those keys plus confidence (0-1), \
         keywords_matched (array), red_flags (array) and reasoning (string).\n\n\
         {}\n\n{}",
        posting_block(opp),
        profile_block(profile)
    )
}

/// Prompt for one generation task. Content tasks see the research sections as context.
pub fn task_prompt(
    kind: SectionKind,
    opp: &Opportunity,
    profile: &CandidateProfile,
    research: &[Section],
) -> String {
    let instruction = match kind {
        SectionKind::CompanyIntelligence => {
            "Summarize what matters about this company for an applicant: business model, products, recent direction, engineering culture."
        }
        SectionKind::CompetitiveAnalysis => {
            "Describe the company's competitive landscape and where this role helps it compete."
        }
        SectionKind::TechnicalAlignment => {
            "Map the candidate's skills onto the role's technical requirements. Name strengths and gaps."
        }
        SectionKind::StrategicPositioning => {
            "Recommend how the candidate should position themselves for this role."
        }
        SectionKind::CoverLetter => "Write a cover letter of at most four paragraphs.",
        SectionKind::ExecutiveSummary => "Write a three-sentence executive summary of the candidate's fit.",
        SectionKind::InterviewPreparation => {
            "List likely interview questions with short answer outlines, plus questions to ask."
        }
        SectionKind::SuccessStrategy => "Outline a 30/60/90-day plan for succeeding in this role.",
        SectionKind::CareerNarrative => {
            "Write a short career narrative connecting the candidate's background to this role."
        }
        SectionKind::ResumeCustomization => {
            "Tailor the candidate's resume for this role. Return ONLY a JSON object with \
             emphasized_skills (5 skills from the candidate's profile), highlighted_achievements (3), \
             customized_summary (string) and keyword_optimization (5 keywords from the posting)."
        }
    };

    let mut prompt = format!(
        "{}\n\n{}\n\n{}",
        instruction,
        posting_block(opp),
        profile_block(profile)
    );

    let context: Vec<&Section> = research.iter().filter(|s| !s.degraded).collect();
    if !context.is_empty() {
        prompt.push_str("\n\nResearch notes:");
        for section in context {
            prompt.push_str(&format!("\n\n## {}\n{}", section.kind.label(), section.content));
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;

    #[test]
    fn test_task_prompt_includes_healthy_research_only() {
        let opp = Opportunity::new("ML Engineer", "Acme", Source::Company);
        let research = vec![
            Section::generated(SectionKind::CompanyIntelligence, "Acme builds rockets".to_string()),
            Section::placeholder(SectionKind::CompetitiveAnalysis, "timeout"),
        ];
        let prompt = task_prompt(
            SectionKind::CoverLetter,
            &opp,
            &CandidateProfile::default(),
            &research,
        );
        assert!(prompt.contains("Acme builds rockets"));
        assert!(!prompt.contains("unavailable"));
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[test]
    fn test_resume_prompt_asks_for_json_keys() {
        let opp = Opportunity::new("ML Engineer", "Acme", Source::Company);
        let prompt = task_prompt(
            SectionKind::ResumeCustomization,
            &opp,
            &CandidateProfile::default(),
            &[],
        );
        let first_line = prompt.lines().next().unwrap();
        assert!(first_line.starts_with("Tailor the candidate's resume"));
        assert!(first_line.contains("emphasized_skills"));
        assert!(first_line.contains("keyword_optimization"));
    }
}
