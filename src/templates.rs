use crate::config::CandidateProfile;
use crate::models::{Opportunity, ResumeCustomization, Section, SectionKind};

/// Profile skills the posting mentions, in profile order.
fn overlapping_skills(opp: &Opportunity, profile: &CandidateProfile) -> Vec<String> {
    let text = opp.searchable_text();
    profile
        .core_skills
        .iter()
        .filter(|skill| text.contains(&skill.to_lowercase()))
        .cloned()
        .collect()
}

fn focus_areas(opp: &Opportunity) -> String {
    let areas: Vec<&str> = opp
        .technologies
        .iter()
        .chain(opp.requirements.iter())
        .map(String::as_str)
        .take(3)
        .collect();
    if areas.is_empty() {
        "reliable, scalable systems".to_string()
    } else {
        areas.join(", ")
    }
}

fn skills_phrase(opp: &Opportunity, profile: &CandidateProfile) -> String {
    let shared = overlapping_skills(opp, profile);
    if !shared.is_empty() {
        return shared.join(", ");
    }
    let fallback: Vec<&str> = profile.core_skills.iter().take(3).map(String::as_str).collect();
    if fallback.is_empty() {
        "infrastructure automation".to_string()
    } else {
        fallback.join(", ")
    }
}

fn first_achievement(profile: &CandidateProfile) -> &str {
    profile
        .achievements
        .first()
        .map(String::as_str)
        .unwrap_or("delivered dependable production systems")
}

pub const RESUME_LIST_LEN: usize = 5;

fn push_unique(list: &mut Vec<String>, item: &str) {
    let item = item.trim();
    if item.is_empty() || list.len() >= RESUME_LIST_LEN {
        return;
    }
    if !list.iter().any(|existing| existing.eq_ignore_ascii_case(item)) {
        list.push(item.to_string());
    }
}

/// Skills the posting asks for lead; the rest of the profile fills the list.
pub fn resume_customization(opp: &Opportunity, profile: &CandidateProfile) -> ResumeCustomization {
    let shared = overlapping_skills(opp, profile);

    let mut emphasized_skills = Vec::new();
    for skill in shared.iter().chain(profile.core_skills.iter()) {
        push_unique(&mut emphasized_skills, skill);
    }

    let mut keyword_optimization = Vec::new();
    for keyword in opp
        .technologies
        .iter()
        .chain(shared.iter())
        .chain(profile.core_skills.iter())
    {
        push_unique(&mut keyword_optimization, keyword);
    }

    ResumeCustomization {
        customized_summary: format!(
            "{} with {} years of experience, focused on {} for the {} role at {}.",
            profile.headline,
            profile.years_experience,
            skills_phrase(opp, profile),
            opp.title,
            opp.company
        ),
        highlighted_achievements: profile.achievements.iter().take(3).cloned().collect(),
        emphasized_skills,
        keyword_optimization,
    }
}

pub fn render(kind: SectionKind, opp: &Opportunity, profile: &CandidateProfile) -> String {
    let company = &opp.company;
    let title = &opp.title;
    let skills = skills_phrase(opp, profile);
    let focus = focus_areas(opp);

    match kind {
        SectionKind::CompanyIntelligence => format!(
            "{company} is hiring a {title}{location}. The posting emphasizes {focus}.",
            location = if opp.location.is_empty() {
                String::new()
            } else {
                format!(" in {}", opp.location)
            },
        ),
        SectionKind::CompetitiveAnalysis => format!(
            "{company} competes for talent in {focus}. Candidates with hands-on production \
             experience in these areas stand out."
        ),
        SectionKind::TechnicalAlignment => {
            let shared = overlapping_skills(opp, profile);
            if shared.is_empty() {
                format!(
                    "No direct keyword overlap with the posting. Lead with transferable strengths: {skills}."
                )
            } else {
                format!("Direct overlap with the posting: {}.", shared.join(", "))
            }
        }
        SectionKind::StrategicPositioning => format!(
            "Position as: {headline}. Connect {skills} to {company}'s needs around {focus}.",
            headline = profile.headline,
        ),
        SectionKind::CoverLetter => format!(
            "Dear {company} Hiring Team,\n\n\
             I am writing to apply for the {title} position. I bring {years} years of experience, \
             most recently focused on {skills}, and I {achievement}.\n\n\
             Your work on {focus} is where I can contribute from day one while growing with the team.\n\n\
             Thank you for your consideration.\n\n\
             Best regards,\n{name}",
            years = profile.years_experience,
            achievement = lowercase_first(first_achievement(profile)),
            name = profile.name,
        ),
        SectionKind::ExecutiveSummary => format!(
            "{headline} with {years} years of experience, applying {skills} to the {title} role at {company}.",
            headline = profile.headline,
            years = profile.years_experience,
        ),
        SectionKind::InterviewPreparation => format!(
            "Expect questions on {focus}.\n\
             Prepare a story about: {achievement}.\n\
             Ask: How does {company} measure success for a {title} in the first six months?",
            achievement = first_achievement(profile),
        ),
        SectionKind::SuccessStrategy => format!(
            "30 days: learn {company}'s systems and stakeholders.\n\
             60 days: ship a first improvement in {focus}.\n\
             90 days: own a roadmap item end to end."
        ),
        SectionKind::CareerNarrative => format!(
            "{years} years of building with {skills} lead naturally to the {title} role: \
             the same discipline, applied to {company}'s problems.",
            years = profile.years_experience,
        ),
        SectionKind::ResumeCustomization => resume_customization(opp, profile).to_markdown(),
    }
}

pub fn render_all(opp: &Opportunity, profile: &CandidateProfile) -> Vec<Section> {
    SectionKind::RESEARCH
        .iter()
        .chain(SectionKind::CONTENT.iter())
        .map(|kind| Section::generated(*kind, render(*kind, opp, profile)))
        .collect()
}

fn lowercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
