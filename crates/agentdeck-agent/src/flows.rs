// ABOUTME: Step-based story workflows: research, write, critique/rewrite loops, and a human review gate.
// ABOUTME: All flow variables live in FlowContext, so a paused review resumes from a restored snapshot.

use std::sync::Arc;

use agentdeck_core::{EntityDescriptor, EntityKind, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::agents::{critique, write_article};
use crate::context::{EngineContext, FlowContext};
use crate::engine::{
    EngineError, EngineEvent, EventSink, EventStream, Outcome, Runnable, Suspension, spawn_engine,
};
use crate::memory::SessionMemory;
use crate::search::WebSearch;
use crate::tools::is_confirmation;

/// Most drafts a flow writes before it gives up on approval.
pub const MAX_ATTEMPTS: u32 = 3;

pub const REVIEW_PROMPT: &str = "Approve this article for publishing? (yes/no)";

/// A named step in a story flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStep {
    Research,
    Write,
    Critique,
    Rewrite,
    Review,
    Publish,
    Done,
}

impl FlowStep {
    pub fn label(&self) -> &'static str {
        match self {
            FlowStep::Research => "research",
            FlowStep::Write => "write",
            FlowStep::Critique => "critique",
            FlowStep::Rewrite => "rewrite",
            FlowStep::Review => "review",
            FlowStep::Publish => "publish",
            FlowStep::Done => "done",
        }
    }
}

/// The registered story flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Story,
    StoryCritic,
    StoryReview,
}

impl FlowKind {
    pub const ALL: [FlowKind; 3] = [FlowKind::Story, FlowKind::StoryCritic, FlowKind::StoryReview];

    pub fn id(&self) -> &'static str {
        match self {
            FlowKind::Story => "story_flow",
            FlowKind::StoryCritic => "story_critic_flow",
            FlowKind::StoryReview => "story_review_flow",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FlowKind::Story => "Researches a topic and writes an article about it",
            FlowKind::StoryCritic => {
                "Researches, writes, and revises an article until a critic approves it"
            }
            FlowKind::StoryReview => {
                "Researches and writes an article, then waits for a human to approve publishing"
            }
        }
    }

    pub fn steps(&self) -> &'static [FlowStep] {
        match self {
            FlowKind::Story => &[FlowStep::Research, FlowStep::Write],
            FlowKind::StoryCritic => &[
                FlowStep::Research,
                FlowStep::Write,
                FlowStep::Critique,
                FlowStep::Rewrite,
            ],
            FlowKind::StoryReview => &[
                FlowStep::Research,
                FlowStep::Write,
                FlowStep::Review,
                FlowStep::Rewrite,
                FlowStep::Publish,
            ],
        }
    }

    /// The step that follows a finished draft.
    fn after_draft(&self) -> FlowStep {
        match self {
            FlowKind::Story => FlowStep::Done,
            FlowKind::StoryCritic => FlowStep::Critique,
            FlowKind::StoryReview => FlowStep::Review,
        }
    }
}

/// Runs one story flow as a loop over `FlowContext::next_step`.
#[derive(Clone)]
pub struct StepFlow {
    kind: FlowKind,
    search: Arc<dyn WebSearch>,
}

impl StepFlow {
    pub fn new(kind: FlowKind, search: Arc<dyn WebSearch>) -> Self {
        Self { kind, search }
    }

    /// Advance `ctx` until the flow finishes or waits for a reviewer.
    /// `answer` is the reviewer's response when resuming at the review gate.
    async fn drive(
        &self,
        mut ctx: FlowContext,
        mut answer: Option<String>,
        sink: &EventSink,
    ) -> Result<Outcome, EngineError> {
        loop {
            let step = ctx.next_step;
            match step {
                FlowStep::Research => {
                    let label = format!("Researching {}", ctx.topic);
                    let started_at = self.started(sink, step, &label).await?;
                    let notes = self.search.search(&ctx.topic).await?;
                    ctx.research = Some(notes.clone());
                    let output = json!({ "research": notes });
                    self.finished(sink, step, StepStatus::Completed, output, started_at).await?;
                    ctx.next_step = FlowStep::Write;
                }
                FlowStep::Write | FlowStep::Rewrite => {
                    let details = if step == FlowStep::Write {
                        "Writing first draft".to_string()
                    } else {
                        format!("Rewriting draft {}", ctx.attempt + 1)
                    };
                    let started_at = self.started(sink, step, &details).await?;
                    let feedback = if step == FlowStep::Rewrite {
                        ctx.feedback.as_deref()
                    } else {
                        None
                    };
                    let article = write_article(&ctx.topic, ctx.research.as_deref(), feedback);
                    ctx.attempt += 1;
                    self.finished(
                        sink,
                        step,
                        StepStatus::Completed,
                        json!({ "article": article, "attempt": ctx.attempt }),
                        started_at,
                    )
                    .await?;
                    ctx.article = Some(article);
                    ctx.next_step = self.kind.after_draft();
                }
                FlowStep::Critique => {
                    let started_at = self.started(sink, step, "Reviewing draft").await?;
                    let review = critique(ctx.article.as_deref().unwrap_or_default());
                    let status = if review.approved {
                        StepStatus::Completed
                    } else {
                        StepStatus::Rejected
                    };
                    let data = json!({
                        "approved": review.approved,
                        "score": review.score,
                        "issues": review.issues,
                        "feedback": review.feedback,
                        "attempt": ctx.attempt,
                    });
                    ctx.score = Some(review.score);
                    ctx.feedback = Some(review.feedback);
                    self.finished(sink, step, status, data, started_at).await?;

                    ctx.next_step = if review.approved || ctx.attempt >= MAX_ATTEMPTS {
                        FlowStep::Done
                    } else {
                        FlowStep::Rewrite
                    };
                }
                FlowStep::Review => {
                    let Some(response) = answer.take() else {
                        let started_at =
                            self.started(sink, step, "Waiting for human review").await?;
                        ctx.step_started_at = Some(started_at);
                        tracing::info!(
                            flow = self.kind.id(),
                            attempt = ctx.attempt,
                            "awaiting review"
                        );
                        return Ok(Outcome::Suspended(Suspension {
                            prompt: REVIEW_PROMPT.to_string(),
                            active_agent: None,
                            context: EngineContext::Flow(ctx),
                        }));
                    };

                    let approved = is_confirmation(&response);
                    let started_at = ctx.step_started_at.take().unwrap_or_else(Utc::now);
                    let status = if approved {
                        StepStatus::Completed
                    } else {
                        StepStatus::Rejected
                    };
                    self.finished(
                        sink,
                        step,
                        status,
                        json!({ "approved": approved, "reviewer_response": response }),
                        started_at,
                    )
                    .await?;

                    ctx.next_step = if approved {
                        FlowStep::Publish
                    } else if ctx.attempt < MAX_ATTEMPTS {
                        ctx.feedback = Some(format!("Reviewer asked for changes: {response}"));
                        FlowStep::Rewrite
                    } else {
                        FlowStep::Done
                    };
                    ctx.reviewer_response = Some(response);
                }
                FlowStep::Publish => {
                    let started_at = self.started(sink, step, "Publishing article").await?;
                    let output = json!({ "published": true });
                    self.finished(sink, step, StepStatus::Completed, output, started_at).await?;
                    ctx.next_step = FlowStep::Done;
                }
                FlowStep::Done => return Ok(Outcome::Completed(self.result(&ctx))),
            }
        }
    }

    fn result(&self, ctx: &FlowContext) -> Value {
        let article = ctx.article.clone().unwrap_or_default();
        match self.kind {
            FlowKind::Story => Value::String(article),
            FlowKind::StoryCritic => {
                let approved = ctx.score.is_some_and(|score| score >= 8);
                let mut result = json!({
                    "article": article,
                    "attempts": ctx.attempt,
                    "approved": approved,
                    "score": ctx.score,
                });
                if !approved {
                    result["final_feedback"] = json!(ctx.feedback);
                }
                result
            }
            FlowKind::StoryReview => {
                let published = ctx.reviewer_response.as_deref().is_some_and(is_confirmation);
                json!({
                    "article": article,
                    "attempts": ctx.attempt,
                    "published": published,
                    "reviewer_response": ctx.reviewer_response,
                })
            }
        }
    }

    async fn started(
        &self,
        sink: &EventSink,
        step: FlowStep,
        details: &str,
    ) -> Result<DateTime<Utc>, EngineError> {
        let started_at = Utc::now();
        tracing::debug!(flow = self.kind.id(), step = step.label(), "step started");
        sink.emit(EngineEvent::StepStarted {
            step_name: step.label().to_string(),
            details: details.to_string(),
            started_at,
        })
        .await?;
        Ok(started_at)
    }

    async fn finished(
        &self,
        sink: &EventSink,
        step: FlowStep,
        status: StepStatus,
        data: Value,
        started_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        sink.emit(EngineEvent::StepFinished {
            step_name: step.label().to_string(),
            status,
            data,
            started_at,
        })
        .await
    }
}

impl Runnable for StepFlow {
    fn kind(&self) -> EntityKind {
        EntityKind::Flow
    }

    fn id(&self) -> &str {
        self.kind.id()
    }

    fn describe(&self) -> EntityDescriptor {
        let mut desc =
            EntityDescriptor::new(EntityKind::Flow, self.kind.id(), self.kind.description());
        desc.steps = self
            .kind
            .steps()
            .iter()
            .map(|s| s.label().to_string())
            .collect();
        desc
    }

    fn start(&self, input: String, _memory: SessionMemory) -> EventStream {
        let flow = self.clone();
        spawn_engine(move |sink| async move {
            let ctx = FlowContext::new(flow.kind.id(), &input);
            flow.drive(ctx, None, &sink).await
        })
    }

    fn resume(
        &self,
        context: EngineContext,
        human_input: String,
        _memory: SessionMemory,
    ) -> EventStream {
        let flow = self.clone();
        spawn_engine(move |sink| async move {
            let label = context.label();
            let EngineContext::Flow(ctx) = context else {
                return Err(EngineError::InvalidContext(format!(
                    "expected a flow context, got {label}"
                )));
            };
            if ctx.flow_id != flow.kind.id() || ctx.next_step != FlowStep::Review {
                return Err(EngineError::InvalidContext(format!(
                    "{} is not waiting for review in {}",
                    ctx.flow_id,
                    flow.kind.id()
                )));
            }
            flow.drive(ctx, Some(human_input), &sink).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineItem;
    use crate::search::OfflineSearch;
    use agentdeck_core::{capture, restore};
    use futures::StreamExt;

    fn flow(kind: FlowKind) -> StepFlow {
        StepFlow::new(kind, Arc::new(OfflineSearch))
    }

    async fn collect(mut stream: EventStream) -> (Vec<EngineEvent>, EngineItem) {
        let mut events = Vec::new();
        let mut last = None;
        while let Some(item) = stream.next().await {
            match item.unwrap() {
                EngineItem::Event(event) => events.push(event),
                other => last = Some(other),
            }
        }
        (events, last.unwrap())
    }

    fn finished_steps(events: &[EngineEvent]) -> Vec<(String, StepStatus)> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::StepFinished { step_name, status, .. } => {
                    Some((step_name.clone(), *status))
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn story_flow_researches_then_writes() {
        let engine =
            flow(FlowKind::Story).start("rust ownership".to_string(), SessionMemory::empty());
        let (events, last) = collect(engine).await;

        assert_eq!(
            finished_steps(&events),
            vec![
                ("research".to_string(), StepStatus::Completed),
                ("write".to_string(), StepStatus::Completed),
            ]
        );
        let EngineItem::Completed(Value::String(article)) = last else {
            panic!("expected an article");
        };
        assert!(article.starts_with("# Rust Ownership"));
    }

    #[tokio::test]
    async fn critic_flow_rewrites_until_approved() {
        let (events, last) = collect(
            flow(FlowKind::StoryCritic).start("rust ownership".to_string(), SessionMemory::empty()),
        )
        .await;

        let steps = finished_steps(&events);
        assert_eq!(steps[2], ("critique".to_string(), StepStatus::Rejected));
        assert_eq!(steps[3].0, "rewrite");
        assert_eq!(steps[4], ("critique".to_string(), StepStatus::Completed));

        let EngineItem::Completed(result) = last else {
            panic!("expected completion");
        };
        assert_eq!(result["approved"], true);
        assert_eq!(result["attempts"], 2);
        assert!(result.get("final_feedback").is_none());
    }

    #[tokio::test]
    async fn review_flow_resumes_from_restored_snapshot() {
        let review = flow(FlowKind::StoryReview);
        let (_, last) =
            collect(review.start("rust ownership".to_string(), SessionMemory::empty())).await;
        let EngineItem::Suspended(suspension) = last else {
            panic!("expected the review gate");
        };
        assert_eq!(suspension.prompt, REVIEW_PROMPT);

        // Resume once directly and once through the snapshot codec.
        let direct = collect(review.resume(
            suspension.context.clone(),
            "yes".to_string(),
            SessionMemory::empty(),
        ))
        .await;
        let snapshot = capture(&suspension.context).unwrap();
        let restored: EngineContext = restore(&snapshot).unwrap();
        let replayed =
            collect(review.resume(restored, "yes".to_string(), SessionMemory::empty())).await;

        assert_eq!(finished_steps(&direct.0), finished_steps(&replayed.0));
        assert_eq!(direct.1, replayed.1);
        let EngineItem::Completed(result) = direct.1 else {
            panic!("expected completion");
        };
        assert_eq!(result["published"], true);
    }

    #[tokio::test]
    async fn rejected_review_rewrites_and_asks_again() {
        let review = flow(FlowKind::StoryReview);
        let (_, last) =
            collect(review.start("rust ownership".to_string(), SessionMemory::empty())).await;
        let EngineItem::Suspended(first) = last else {
            panic!("expected the review gate");
        };

        let (events, last) = collect(review.resume(
            first.context,
            "no, add an example".to_string(),
            SessionMemory::empty(),
        ))
        .await;
        assert_eq!(
            finished_steps(&events),
            vec![
                ("review".to_string(), StepStatus::Rejected),
                ("rewrite".to_string(), StepStatus::Completed),
            ]
        );
        let EngineItem::Suspended(second) = last else {
            panic!("expected a second review");
        };
        let EngineContext::Flow(ctx) = second.context else {
            panic!("expected a flow context");
        };
        assert_eq!(ctx.attempt, 2);
    }

    #[test]
    fn descriptor_lists_steps() {
        let desc = flow(FlowKind::StoryCritic).describe();
        assert_eq!(desc.name, "Story Critic Flow");
        assert_eq!(desc.steps, vec!["research", "write", "critique", "rewrite"]);
    }
}
