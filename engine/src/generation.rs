//! Reducer for one generation.
//!
//! [`Generation::apply`] folds a [`StreamEvent`] into the pending assistant
//! message and returns the side effects the session must carry out. It does
//! no IO itself.
//!
//! ```text
//! Sending -> StreamingThinking -> StreamingContent -> Completed | Cancelled | Errored
//! ```

use std::time::SystemTime;

use docent_types::{ConversationId, DocumentSummary, Message, StreamEvent, TruncationInfo};

use crate::progress::ProgressUpdate;

/// Where a conversation's generation stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Sending,
    StreamingThinking,
    StreamingContent,
    Completed,
    Cancelled,
    Errored,
}

impl Phase {
    /// A generation is underway (request sent, terminal event not yet seen).
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Phase::Sending | Phase::StreamingThinking | Phase::StreamingContent
        )
    }
}

/// How a generation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(Message),
    /// Stopped by the user; the message carries its truncation marker.
    Cancelled(Message),
    /// The pending message is discarded.
    Errored(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The request is live; release the sending latch.
    ClearSendingLatch,
    /// First answer token after a reasoning trace. Fires once.
    FirstContentToken,
    Progress(ProgressUpdate),
    Finish(Outcome),
}

#[derive(Debug, Clone)]
pub struct Generation {
    conversation_id: ConversationId,
    message: Message,
    phase: Phase,
    cancel_requested: bool,
    first_content_signaled: bool,
    streamed_tokens: bool,
}

impl Generation {
    #[must_use]
    pub fn new(conversation_id: ConversationId, message: Message) -> Self {
        Self {
            conversation_id,
            message,
            phase: Phase::Sending,
            cancel_requested: false,
            first_content_signaled: false,
            streamed_tokens: false,
        }
    }

    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn first_content_signaled(&self) -> bool {
        self.first_content_signaled
    }

    /// Record that the user asked to stop. The terminal event that follows
    /// resolves as [`Outcome::Cancelled`].
    pub fn request_cancel(&mut self) {
        if self.phase.is_active() {
            self.cancel_requested = true;
        }
    }

    pub fn apply(&mut self, event: StreamEvent) -> Vec<Effect> {
        self.apply_at(event, SystemTime::now())
    }

    /// `now` stamps the truncation marker of a cancelled message.
    pub fn apply_at(&mut self, event: StreamEvent, now: SystemTime) -> Vec<Effect> {
        if !self.phase.is_active() {
            tracing::debug!(conversation_id = %self.conversation_id, "Event after generation ended; ignoring");
            return Vec::new();
        }

        let mut effects = Vec::new();
        match event {
            StreamEvent::Thinking(fragment) => {
                if fragment.is_empty() {
                    return effects;
                }
                self.leave_sending(&mut effects, Phase::StreamingThinking);
                self.message.append_thinking(&fragment);
            }
            StreamEvent::Token(fragment) => {
                if fragment.is_empty() {
                    return effects;
                }
                self.leave_sending(&mut effects, Phase::StreamingContent);
                if !self.message.thinking().is_empty() && !self.first_content_signaled {
                    self.first_content_signaled = true;
                    effects.push(Effect::FirstContentToken);
                }
                self.phase = Phase::StreamingContent;
                self.streamed_tokens = true;
                self.message.append_content(&fragment);
            }
            StreamEvent::FollowUpQuestion { question, index } => {
                if !self.message.set_follow_up(index, question) {
                    tracing::warn!(conversation_id = %self.conversation_id, index, "Follow-up question index out of range; dropping");
                }
            }
            StreamEvent::FinalAnswer(answer) => {
                self.message.follow_up_questions = answer.follow_up_questions;
                self.message.detected_intent = answer.detected_intent;
                if !self.streamed_tokens && !answer.answer.is_empty() {
                    self.message.content = answer.answer;
                }
            }
            StreamEvent::DocSummaryInit(expectation) => {
                effects.push(Effect::Progress(ProgressUpdate::Init(expectation)));
            }
            StreamEvent::DocSummaryStart(start) => {
                effects.push(Effect::Progress(ProgressUpdate::Start(start)));
            }
            StreamEvent::DocSummaryChunk { doc_id, content } => {
                effects.push(Effect::Progress(ProgressUpdate::Chunk { doc_id, content }));
            }
            StreamEvent::DocSummaryComplete(complete) => {
                self.message.record_document_summary(DocumentSummary {
                    doc_id: complete.doc_id.clone(),
                    doc_name: complete.doc_name.clone(),
                    summary: complete.summary.clone(),
                    from_cache: complete.from_cache,
                });
                effects.push(Effect::Progress(ProgressUpdate::Complete(complete)));
            }
            StreamEvent::Done => {
                effects.push(Effect::Finish(self.finish_ok(now)));
            }
            StreamEvent::Error(reason) => {
                // A stop always resolves on the completion path.
                if self.cancel_requested {
                    tracing::debug!(conversation_id = %self.conversation_id, "Error after stop treated as cancellation: {reason}");
                    effects.push(Effect::Finish(self.finish_ok(now)));
                } else {
                    self.phase = Phase::Errored;
                    effects.push(Effect::Finish(Outcome::Errored(reason)));
                }
            }
        }
        effects
    }

    fn leave_sending(&mut self, effects: &mut Vec<Effect>, next: Phase) {
        if self.phase == Phase::Sending {
            self.phase = next;
            effects.push(Effect::ClearSendingLatch);
        }
    }

    fn finish_ok(&mut self, now: SystemTime) -> Outcome {
        if self.cancel_requested {
            self.phase = Phase::Cancelled;
            self.message.truncation = Some(TruncationInfo { truncated_at: now });
            Outcome::Cancelled(self.message.clone())
        } else {
            self.phase = Phase::Completed;
            Outcome::Completed(self.message.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docent_types::{BatchExpectation, DocSummaryComplete, FinalAnswer, MessageId};

    fn generation() -> Generation {
        Generation::new(
            ConversationId::new("c1").unwrap(),
            Message::pending_assistant(MessageId::new("pending")),
        )
    }

    fn apply_all(generation: &mut Generation, events: Vec<StreamEvent>) -> Vec<Effect> {
        events
            .into_iter()
            .flat_map(|event| generation.apply(event))
            .collect()
    }

    #[test]
    fn first_thinking_frame_clears_latch_once() {
        let mut g = generation();
        let effects = apply_all(
            &mut g,
            vec![
                StreamEvent::Thinking("a".into()),
                StreamEvent::Thinking("b".into()),
            ],
        );
        assert_eq!(effects, vec![Effect::ClearSendingLatch]);
        assert_eq!(g.phase(), Phase::StreamingThinking);
        assert_eq!(g.message().thinking(), "ab");
    }

    #[test]
    fn empty_fragments_do_not_prove_liveness() {
        let mut g = generation();
        assert!(g.apply(StreamEvent::Token(String::new())).is_empty());
        assert_eq!(g.phase(), Phase::Sending);
    }

    #[test]
    fn first_content_token_fires_once_after_thinking() {
        let mut g = generation();
        let effects = apply_all(
            &mut g,
            vec![
                StreamEvent::Thinking("plan".into()),
                StreamEvent::Token("A".into()),
                StreamEvent::Token("B".into()),
            ],
        );
        assert_eq!(
            effects,
            vec![Effect::ClearSendingLatch, Effect::FirstContentToken]
        );
        assert_eq!(g.phase(), Phase::StreamingContent);
        assert_eq!(g.message().content, "AB");
        assert!(g.first_content_signaled());
    }

    #[test]
    fn tokens_without_thinking_never_signal() {
        let mut g = generation();
        let effects = apply_all(&mut g, vec![StreamEvent::Token("A".into())]);
        assert_eq!(effects, vec![Effect::ClearSendingLatch]);
        assert!(!g.first_content_signaled());
    }

    #[test]
    fn done_completes_without_truncation() {
        let mut g = generation();
        g.apply(StreamEvent::Token("hi".into()));
        let effects = g.apply(StreamEvent::Done);
        match effects.as_slice() {
            [Effect::Finish(Outcome::Completed(message))] => {
                assert_eq!(message.content, "hi");
                assert!(!message.is_truncated());
            }
            other => panic!("unexpected effects {other:?}"),
        }
        assert_eq!(g.phase(), Phase::Completed);
    }

    #[test]
    fn stop_resolves_as_truncated_even_on_error() {
        let now = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(100);
        for terminal in [StreamEvent::Done, StreamEvent::Error("aborted".into())] {
            let mut g = generation();
            g.request_cancel();
            match g.apply_at(terminal, now).as_slice() {
                [Effect::Finish(Outcome::Cancelled(message))] => {
                    assert!(message.content.is_empty());
                    assert_eq!(message.truncation, Some(TruncationInfo { truncated_at: now }));
                }
                other => panic!("unexpected effects {other:?}"),
            }
        }
    }

    #[test]
    fn error_discards_and_later_events_are_ignored() {
        let mut g = generation();
        g.apply(StreamEvent::Token("x".into()));
        assert_eq!(
            g.apply(StreamEvent::Error("boom".into())),
            vec![Effect::Finish(Outcome::Errored("boom".into()))]
        );
        assert!(g.apply(StreamEvent::Token("late".into())).is_empty());
        assert!(g.apply(StreamEvent::Done).is_empty());
        assert_eq!(g.phase(), Phase::Errored);
    }

    #[test]
    fn final_answer_fills_content_only_when_nothing_streamed() {
        let answer = FinalAnswer {
            answer: "Full answer".into(),
            session_id: None,
            follow_up_questions: vec!["Why?".into()],
            detected_intent: Some("explain".into()),
        };

        let mut silent = generation();
        silent.apply(StreamEvent::FinalAnswer(answer.clone()));
        assert_eq!(silent.message().content, "Full answer");

        let mut streamed = generation();
        streamed.apply(StreamEvent::Token("Streamed".into()));
        streamed.apply(StreamEvent::FollowUpQuestion {
            question: "stale".into(),
            index: 0,
        });
        streamed.apply(StreamEvent::FinalAnswer(answer));
        assert_eq!(streamed.message().content, "Streamed");
        assert_eq!(streamed.message().follow_up_questions, vec!["Why?"]);
        assert_eq!(streamed.message().detected_intent.as_deref(), Some("explain"));
    }

    #[test]
    fn summary_events_become_progress_effects() {
        let mut g = generation();
        let complete = DocSummaryComplete {
            doc_id: "d1".into(),
            doc_name: "one.pdf".into(),
            summary: "Hello.".into(),
            from_cache: false,
            index: 0,
            total: 1,
        };
        let effects = apply_all(
            &mut g,
            vec![
                StreamEvent::DocSummaryInit(BatchExpectation {
                    total: 1,
                    cached: 0,
                    to_generate: 1,
                }),
                StreamEvent::DocSummaryComplete(complete.clone()),
            ],
        );
        assert_eq!(effects.len(), 2);
        assert_eq!(effects[1], Effect::Progress(ProgressUpdate::Complete(complete)));
        assert_eq!(g.message().document_summaries.len(), 1);
        assert_eq!(g.message().document_summaries[0].summary, "Hello.");
        // Summary events alone do not clear the sending latch.
        assert_eq!(g.phase(), Phase::Sending);
    }

    #[test]
    fn out_of_range_follow_up_frames_are_dropped() {
        use docent_client::Frame;
        use docent_client::sse::decode_frame;

        let mut g = generation();
        for index in [u64::MAX, 1_000_000_000] {
            let content = format!(r#"{{"question":"q","index":{index}}}"#);
            let raw = serde_json::json!({ "type": "follow_up_question", "content": content });
            let Ok(Frame::Event(event)) = decode_frame(&raw.to_string()) else {
                panic!("frame should decode");
            };
            assert!(g.apply(event).is_empty());
        }
        assert!(g.message().follow_up_questions.is_empty());

        g.apply(StreamEvent::FollowUpQuestion {
            question: "kept".into(),
            index: 1,
        });
        assert_eq!(g.message().follow_up_questions, vec!["", "kept"]);
        assert!(g.phase().is_active());
    }
}
