use std::sync::Arc;

use async_trait::async_trait;

use cvflow_types::{
    CandidateProfile, FlaggedQuestion, InterviewQuestions, JobRequirement, LogLevel,
    ProcessingRecord, RecordUpdate, Result, StepId,
};

use super::{require_job, require_profile};
use crate::collaborators::{QuestionGenerator, QuestionValidator};
use crate::events::StepEvents;
use crate::retry::{refine_until_valid, Refine, RegenerationPolicy};
use crate::step::Step;

/// Pairs the question generator with the grounding validator for one candidate.
pub struct QuestionRefiner<'a> {
    pub generator: &'a dyn QuestionGenerator,
    pub validator: &'a dyn QuestionValidator,
    pub profile: &'a CandidateProfile,
    pub job: &'a JobRequirement,
    pub events: &'a StepEvents,
}

#[async_trait]
impl<'a> Refine for QuestionRefiner<'a> {
    type Output = InterviewQuestions;
    type Flag = FlaggedQuestion;

    async fn generate(
        &self,
        previous: Option<(&InterviewQuestions, &[FlaggedQuestion])>,
    ) -> Result<InterviewQuestions> {
        match previous {
            None => {
                self.events.progress("Generating interview questions");
                self.generator.generate(self.profile, self.job).await
            }
            Some((questions, flagged)) => {
                self.events.progress(format!(
                    "Regenerating {} unsupported question(s)",
                    flagged.len()
                ));
                self.generator
                    .regenerate(self.profile, self.job, questions, flagged)
                    .await
            }
        }
    }

    async fn validate(&self, questions: &InterviewQuestions) -> Result<Vec<FlaggedQuestion>> {
        let flagged = self
            .validator
            .validate(questions, self.profile, self.job)
            .await?;
        self.events.progress_with(
            format!("Validated {} question(s)", questions.len()),
            serde_json::json!({ "flagged": flagged }),
        );
        Ok(flagged)
    }
}

/// Generates interview questions and regenerates the ungrounded ones until
/// the validator is satisfied or the retry ceiling is hit.
pub struct InterviewQuestionsStep {
    generator: Arc<dyn QuestionGenerator>,
    validator: Arc<dyn QuestionValidator>,
    policy: RegenerationPolicy,
}

impl InterviewQuestionsStep {
    pub fn new(
        generator: Arc<dyn QuestionGenerator>,
        validator: Arc<dyn QuestionValidator>,
        policy: RegenerationPolicy,
    ) -> Self {
        Self {
            generator,
            validator,
            policy,
        }
    }
}

#[async_trait]
impl Step for InterviewQuestionsStep {
    fn id(&self) -> StepId {
        StepId::InterviewQuestions
    }

    async fn run(&self, record: &ProcessingRecord, events: &StepEvents) -> Result<RecordUpdate> {
        let refiner = QuestionRefiner {
            generator: self.generator.as_ref(),
            validator: self.validator.as_ref(),
            profile: require_profile(record, StepId::InterviewQuestions)?,
            job: require_job(record, StepId::InterviewQuestions)?,
            events,
        };
        let refined =
            refine_until_valid(&refiner, &self.policy, StepId::InterviewQuestions.name()).await?;

        let mut update = RecordUpdate::new();
        if refined.exhausted {
            let unsupported: Vec<&str> = refined
                .remaining_flags
                .iter()
                .map(|f| f.question.as_str())
                .collect();
            update = update.log(
                LogLevel::Warning,
                format!(
                    "Accepted interview questions after {} generation(s) with {} unsupported: {}",
                    refined.generations,
                    unsupported.len(),
                    unsupported.join(" | ")
                ),
            );
        }
        let message = format!(
            "Interview questions generated successfully ({} question(s), {} generation(s))",
            refined.value.len(),
            refined.generations
        );
        Ok(RecordUpdate {
            interview_questions: Some(refined.value),
            ..update
        }
        .log(LogLevel::Success, message))
    }
}
