//! Incremental transcript output.
//!
//! Pending text only ever grows while it streams, so the printer keeps the
//! byte length it has already written and prints the tail.

use std::io::{self, Write};

use docent_engine::{Notice, ProgressSnapshot, SessionEvent};
use docent_types::{DocumentStatus, Message, Role};

#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    thinking_printed: usize,
    content_printed: usize,
    docs_reported: Vec<(String, DocumentStatus)>,
}

impl TranscriptPrinter {
    /// Forget the pending message; the next one starts fresh.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn pending(&mut self, out: &mut impl Write, message: &Message) -> io::Result<()> {
        let thinking = message.thinking();
        if thinking.len() > self.thinking_printed {
            if self.thinking_printed == 0 {
                write!(out, "(thinking) ")?;
            }
            write!(out, "{}", &thinking[self.thinking_printed..])?;
            self.thinking_printed = thinking.len();
        }

        let content = &message.content;
        if content.len() > self.content_printed {
            if self.content_printed == 0 {
                if self.thinking_printed > 0 {
                    writeln!(out)?;
                }
                write!(out, "assistant> ")?;
            }
            write!(out, "{}", &content[self.content_printed..])?;
            self.content_printed = content.len();
        }
        out.flush()
    }

    pub fn progress(&mut self, out: &mut impl Write, progress: &ProgressSnapshot) -> io::Result<()> {
        for doc in progress.ordered() {
            let key = (doc.doc_id.clone(), doc.status);
            if self.docs_reported.contains(&key) {
                continue;
            }
            self.docs_reported.push(key);
            let name = if doc.doc_name.is_empty() {
                doc.doc_id.as_str()
            } else {
                doc.doc_name.as_str()
            };
            let total = match (doc.total, progress.expectation) {
                (0, Some(expectation)) => expectation.total,
                (total, _) => total,
            };
            writeln!(
                out,
                "\n[doc {}/{}] {name}: {}",
                doc.index + 1,
                total,
                status_label(doc.status)
            )?;
        }
        out.flush()
    }

    pub fn event(&mut self, out: &mut impl Write, event: &SessionEvent) -> io::Result<()> {
        match event {
            SessionEvent::FirstContentToken { .. } => {}
            SessionEvent::Completed { message, .. } => {
                self.finish_pending(out, message)?;
                for (i, question) in message
                    .follow_up_questions
                    .iter()
                    .filter(|q| !q.is_empty())
                    .enumerate()
                {
                    writeln!(out, "  {}. {question}", i + 1)?;
                }
                self.reset();
            }
            SessionEvent::Cancelled { message, .. } => {
                self.finish_pending(out, message)?;
                writeln!(out, "[stopped]")?;
                self.reset();
            }
            SessionEvent::Errored { error, .. } => {
                writeln!(out, "\n[error] {error}")?;
                self.reset();
            }
        }
        out.flush()
    }

    fn finish_pending(&mut self, out: &mut impl Write, message: &Message) -> io::Result<()> {
        self.pending(out, message)?;
        writeln!(out)
    }
}

pub fn notice(out: &mut impl Write, notice: &Notice) -> io::Result<()> {
    writeln!(out, "[notice] {}", notice.format())
}

pub fn history(out: &mut impl Write, messages: &[Message]) -> io::Result<()> {
    for message in messages {
        let speaker = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        let marker = if message.is_truncated() { " [stopped]" } else { "" };
        writeln!(out, "{speaker}> {}{marker}", message.content)?;
    }
    out.flush()
}

fn status_label(status: DocumentStatus) -> &'static str {
    match status {
        DocumentStatus::Pending => "pending",
        DocumentStatus::Processing => "summarizing",
        DocumentStatus::Completed => "summarized",
        DocumentStatus::Cached => "cached",
        DocumentStatus::Error => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docent_types::MessageId;

    fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn pending_prints_only_new_text() {
        let mut printer = TranscriptPrinter::default();
        let mut out = Vec::new();
        let mut message = Message::pending_assistant(MessageId::new("p"));

        message.append_thinking("hmm");
        printer.pending(&mut out, &message).unwrap();
        message.append_content("Hel");
        printer.pending(&mut out, &message).unwrap();
        message.append_content("lo");
        printer.pending(&mut out, &message).unwrap();
        printer.pending(&mut out, &message).unwrap();

        assert_eq!(output(out), "(thinking) hmm\nassistant> Hello");
    }

    #[test]
    fn completion_lists_follow_ups_and_resets() {
        let mut printer = TranscriptPrinter::default();
        let mut out = Vec::new();
        let mut message = Message::pending_assistant(MessageId::new("p")).with_content("Done.");
        message.follow_up_questions = vec!["Why?".into(), String::new(), "How?".into()];

        printer
            .event(
                &mut out,
                &SessionEvent::Completed {
                    conversation_id: "c1".try_into().unwrap(),
                    message,
                },
            )
            .unwrap();

        assert_eq!(output(out), "assistant> Done.\n  1. Why?\n  2. How?\n");
        assert_eq!(printer.content_printed, 0);
    }

    #[test]
    fn history_marks_truncated_answers() {
        let mut out = Vec::new();
        let mut answer = Message::pending_assistant(MessageId::new("a")).with_content("Part");
        answer.truncation = Some(docent_types::TruncationInfo {
            truncated_at: std::time::SystemTime::UNIX_EPOCH,
        });
        history(
            &mut out,
            &[Message::user(MessageId::new("u"), "Q"), answer],
        )
        .unwrap();
        assert_eq!(output(out), "you> Q\nassistant> Part [stopped]\n");
    }
}
