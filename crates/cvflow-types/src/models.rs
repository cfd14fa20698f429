//! Domain models exchanged between steps and their external collaborators.

use serde::{Deserialize, Serialize};

/// Opaque handle to the caller-owned source document (a path, object key, or upload id).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentRef(pub String);

impl DocumentRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Candidate profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub company: String,
    pub position: String,
    pub duration: String,
    #[serde(default)]
    pub responsibilities: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Education {
    pub institution: String,
    pub degree: String,
    pub field: String,
    #[serde(default)]
    pub year: Option<String>,
}

/// Structured extraction result for one résumé.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateProfile {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub summary: Option<String>,
    pub skills: Vec<String>,
    pub experience: Vec<Experience>,
    pub education: Vec<Education>,
    pub linkedin_url: Option<String>,
    pub github_url: Option<String>,
    pub x_url: Option<String>,
    /// Full document contents rendered as markdown.
    pub markdown: String,
}

impl CandidateProfile {
    /// An extraction that produced neither a name nor any document text.
    pub fn is_empty(&self) -> bool {
        self.name.trim().is_empty() && self.markdown.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Job requirement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRequirement {
    pub id: String,
    pub title: String,
    pub department: String,
    pub description: String,
    pub experience: String,
    pub skills: Vec<String>,
    pub requirements: Vec<String>,
}

impl JobRequirement {
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.description.trim().is_empty()
    }

    /// Flattened text used for chunking and embedding.
    pub fn to_text(&self) -> String {
        let mut text = format!("{}\n{}\n{}", self.title, self.department, self.description);
        if !self.experience.is_empty() {
            text.push_str(&format!("\nExperience: {}", self.experience));
        }
        if !self.skills.is_empty() {
            text.push_str(&format!("\nSkills: {}", self.skills.join(", ")));
        }
        for requirement in &self.requirements {
            text.push_str(&format!("\n- {requirement}"));
        }
        text
    }
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreDetail {
    /// Score out of 5.
    pub score: u8,
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub technical_skills: ScoreDetail,
    pub experience_relevance: ScoreDetail,
    pub years_experience: ScoreDetail,
    pub project_fit: ScoreDetail,
    pub soft_skills: ScoreDetail,
    pub education_certifications: ScoreDetail,
    pub communication: ScoreDetail,
    /// One of "Strong Fit", "Good Fit", "Moderate Fit", "Poor Fit".
    pub overall_recommendation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialScore {
    pub platform: String,
    pub professional_presence: ScoreDetail,
    pub content_quality: ScoreDetail,
    pub industry_engagement: ScoreDetail,
    pub communication_style: ScoreDetail,
    pub red_flags: ScoreDetail,
    pub overall_score: u8,
    /// "Clear", "Concern", or "Major Red Flag".
    pub screening_recommendation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fork: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub platform: String,
    pub repositories: Vec<RepositoryInfo>,
}

/// Compliance record returned by the world-check registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldCheckRecord {
    pub nationality_id: String,
    pub passport_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub nationality: String,
    pub morality: String,
}

/// Decision record produced by the assessment step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalAssessment {
    /// "Highly Recommended", "Recommended", or "Not Recommended".
    pub final_recommendation: String,
    #[serde(with = "yes_no")]
    pub proceed_to_interview: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateReport {
    pub candidate_name: String,
    pub summary: String,
    pub recommendation: String,
}

// ---------------------------------------------------------------------------
// Interview questions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterviewQuestions {
    pub technical_questions: Vec<String>,
    pub behavioral_questions: Vec<String>,
    pub experience_questions: Vec<String>,
    pub situational_questions: Vec<String>,
    pub cultural_fit_questions: Vec<String>,
    pub areas_to_probe: Vec<String>,
    pub red_flag_questions: Vec<String>,
    pub interview_duration: String,
}

impl InterviewQuestions {
    /// The questions subject to grounding validation. Probing areas and
    /// red-flag questions come from screening findings and are not checked.
    pub fn validated_questions(&self) -> impl Iterator<Item = &str> {
        self.technical_questions
            .iter()
            .chain(&self.behavioral_questions)
            .chain(&self.experience_questions)
            .chain(&self.situational_questions)
            .chain(&self.cultural_fit_questions)
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.validated_questions().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A question the validator could not ground in the CV or the job requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedQuestion {
    pub question: String,
    pub similarity_cv: f32,
    pub similarity_jd: f32,
}

impl FlaggedQuestion {
    /// Build a flag with both similarities rounded to two decimals.
    pub fn new(question: impl Into<String>, similarity_cv: f32, similarity_jd: f32) -> Self {
        Self {
            question: question.into(),
            similarity_cv: round2(similarity_cv),
            similarity_jd: round2(similarity_jd),
        }
    }
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

mod yes_no {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "Yes" } else { "No" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "Yes" | "yes" => Ok(true),
            "No" | "no" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected \"Yes\" or \"No\", got \"{other}\""
            ))),
        }
    }
}
