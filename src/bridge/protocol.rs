//! Heuristic parser for the child's unstructured stdout.
//!
//! The pipeline process offers no framing: every signal is a substring that
//! also appears in human-readable progress output. All load-bearing literals
//! live in [`markers`] so a future change to the child's log text is a
//! single point of failure, not many.
//!
//! The parser is a line-driven state machine over
//! `{AwaitingAnswerStart, CollectingAnswer, InTimingTable, Done, Failed}`.
//! Transition rules are substring tests, not a grammar; callers must accept
//! that this is inherently heuristic.

use crate::types::CompletionStatus;

/// The literal markers the child's stdout contract guarantees.
pub mod markers {
    /// Recurring request-prompt banner; doubles as the readiness signal and
    /// the seal of the previous answer.
    pub const READY_BANNER: &str = "Enter your input";

    /// Printed once per successfully sealed generation stream.
    pub const FINISHED: &str = "(finished)";

    /// Minimum run of dashes recognized as a timing-table rule line.
    pub const MIN_RULE_WIDTH: usize = 8;

    /// Progress/status chatter that must never leak into the answer text.
    pub const STATUS_CHATTER: &[&str] = &[
        "Start loading vision encoder model",
        "Vision encoder loaded in",
        "Start loading language model",
        "Language model loaded in",
        "All models loaded",
        "Start vision inference",
        "Vision encoder inference time",
        "Time to first token",
        "Error occurred during LLM call",
        "Error processing image",
        "Inference failed",
        "No image path found in input",
    ];
}

/// A whole line of repeated dashes bounds the performance table.
pub fn is_rule_line(line: &str) -> bool {
    let t = line.trim();
    t.len() >= markers::MIN_RULE_WIDTH && t.chars().all(|c| c == '-')
}

pub fn is_status_chatter(line: &str) -> bool {
    markers::STATUS_CHATTER.iter().any(|m| line.contains(m))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsePhase {
    AwaitingAnswerStart,
    CollectingAnswer,
    InTimingTable,
    Done,
    Failed,
}

/// Accumulates one response from the child's stdout lines.
pub struct ResponseParser {
    phase: ParsePhase,
    answer_lines: Vec<String>,
    table_lines: Vec<String>,
    saw_finished: bool,
    failure: Option<String>,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            phase: ParsePhase::AwaitingAnswerStart,
            answer_lines: Vec::new(),
            table_lines: Vec::new(),
            saw_finished: false,
            failure: None,
        }
    }

    pub fn phase(&self) -> ParsePhase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, ParsePhase::Done | ParsePhase::Failed)
    }

    /// Record an out-of-band failure (child exit, deadline elapsed).
    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.is_terminal() {
            self.failure = Some(reason.into());
            self.phase = ParsePhase::Failed;
        }
    }

    /// Feed one stdout line; returns the phase after the transition.
    pub fn push_line(&mut self, line: &str) -> ParsePhase {
        if self.is_terminal() {
            return self.phase;
        }

        // The next banner seals the response no matter what state we are
        // in; everything collected so far is the full answer.
        if line.contains(markers::READY_BANNER) {
            self.phase = ParsePhase::Done;
            return self.phase;
        }

        if self.phase == ParsePhase::InTimingTable {
            // Verbatim until the closing rule line.
            self.table_lines.push(line.to_string());
            if is_rule_line(line) {
                self.phase = ParsePhase::CollectingAnswer;
            }
            return self.phase;
        }

        if is_rule_line(line) {
            self.table_lines.push(line.to_string());
            self.phase = ParsePhase::InTimingTable;
            return self.phase;
        }

        if line.contains(markers::FINISHED) {
            self.saw_finished = true;
            return self.phase;
        }

        if is_status_chatter(line) {
            return self.phase;
        }

        match self.phase {
            ParsePhase::AwaitingAnswerStart => {
                if !line.trim().is_empty() {
                    self.answer_lines.push(line.to_string());
                    self.phase = ParsePhase::CollectingAnswer;
                }
            }
            ParsePhase::CollectingAnswer => {
                self.answer_lines.push(line.to_string());
            }
            ParsePhase::InTimingTable | ParsePhase::Done | ParsePhase::Failed => {}
        }
        self.phase
    }

    /// Seal into a structured reply. Success requires the `(finished)`
    /// marker to have been observed.
    pub fn into_reply(self) -> BridgeReply {
        let answer = {
            let mut lines = self.answer_lines;
            while lines.last().is_some_and(|l| l.trim().is_empty()) {
                lines.pop();
            }
            lines.join("\n")
        };
        let timing_table = if self.table_lines.is_empty() {
            None
        } else {
            Some(self.table_lines.join("\n"))
        };
        let status = if self.saw_finished && self.failure.is_none() {
            CompletionStatus::Success
        } else {
            CompletionStatus::Error
        };
        BridgeReply { answer, timing_table, status, failure: self.failure }
    }
}

/// The bridge's structured view of one child response.
#[derive(Debug, Clone)]
pub struct BridgeReply {
    /// Answer text with all log chatter excluded.
    pub answer: String,
    /// The dash-bounded performance table, verbatim, rules included.
    pub timing_table: Option<String>,
    pub status: CompletionStatus,
    /// Out-of-band failure reason, if any.
    pub failure: Option<String>,
}

impl BridgeReply {
    pub fn is_success(&self) -> bool {
        self.status == CompletionStatus::Success
    }

    /// Answer with the timing table preserved as a fenced block.
    pub fn render_markdown(&self) -> String {
        match &self.timing_table {
            Some(table) => format!("{}\n\n```\n{table}\n```", self.answer),
            None => self.answer.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULE: &str =
        "--------------------------------------------------------------------------------------";

    fn feed(parser: &mut ResponseParser, lines: &[&str]) {
        for line in lines {
            parser.push_line(line);
            if parser.is_terminal() {
                break;
            }
        }
    }

    #[test]
    fn test_full_stream_with_chatter_and_table() {
        let table_body = " Generate           12         0.51            23.53";
        let mut parser = ResponseParser::new();
        feed(
            &mut parser,
            &[
                "Start vision inference...",
                "Vision encoder inference time: 0.12 seconds",
                "Time to first token: 0.40 seconds",
                "The image shows a cat",
                "sitting on a windowsill.",
                "",
                "(finished)",
                RULE,
                table_body,
                RULE,
                "",
                "Enter your input :",
            ],
        );
        assert_eq!(parser.phase(), ParsePhase::Done);

        let reply = parser.into_reply();
        assert!(reply.is_success());
        assert_eq!(reply.answer, "The image shows a cat\nsitting on a windowsill.");
        let table = reply.timing_table.clone().unwrap();
        assert_eq!(table, format!("{RULE}\n{table_body}\n{RULE}"));
        let rendered = reply.render_markdown();
        assert!(rendered.contains("```"));
        assert!(rendered.contains(table_body));
    }

    #[test]
    fn test_banner_seals_immediately() {
        let mut parser = ResponseParser::new();
        parser.push_line("partial answer");
        parser.push_line("Enter your input :");
        assert_eq!(parser.phase(), ParsePhase::Done);
        // No (finished) marker observed: sealed as error.
        let reply = parser.into_reply();
        assert!(!reply.is_success());
        assert_eq!(reply.answer, "partial answer");
    }

    #[test]
    fn test_chatter_interleaved_mid_answer_is_excluded() {
        let mut parser = ResponseParser::new();
        feed(
            &mut parser,
            &[
                "First answer line",
                "Start vision inference...",
                "Second answer line",
                "",
                "(finished)",
                "Enter your input :",
            ],
        );
        let reply = parser.into_reply();
        assert!(reply.is_success());
        assert_eq!(reply.answer, "First answer line\nSecond answer line");
        assert!(reply.timing_table.is_none());
    }

    #[test]
    fn test_backend_error_path_without_finished() {
        let mut parser = ResponseParser::new();
        feed(
            &mut parser,
            &[
                "Error occurred during LLM call",
                "Inference failed",
                "Enter your input :",
            ],
        );
        let reply = parser.into_reply();
        assert!(!reply.is_success());
        assert!(reply.answer.is_empty());
    }

    #[test]
    fn test_out_of_band_failure_wins() {
        let mut parser = ResponseParser::new();
        parser.push_line("some text");
        parser.fail("process exited");
        assert_eq!(parser.phase(), ParsePhase::Failed);
        let reply = parser.into_reply();
        assert!(!reply.is_success());
        assert_eq!(reply.failure.as_deref(), Some("process exited"));
    }

    #[test]
    fn test_rule_line_detection() {
        assert!(is_rule_line(RULE));
        assert!(is_rule_line("--------"));
        assert!(!is_rule_line("----"));
        assert!(!is_rule_line("-- not a rule --"));
        assert!(!is_rule_line("a sentence - with dashes"));
    }

    #[test]
    fn test_short_dash_run_inside_answer_is_kept() {
        let mut parser = ResponseParser::new();
        feed(
            &mut parser,
            &["Item list:", "--- one", "", "(finished)", "Enter your input :"],
        );
        let reply = parser.into_reply();
        assert_eq!(reply.answer, "Item list:\n--- one");
    }

    #[test]
    fn test_blank_lines_inside_answer_preserved_trailing_trimmed() {
        let mut parser = ResponseParser::new();
        feed(
            &mut parser,
            &[
                "Paragraph one.",
                "",
                "Paragraph two.",
                "",
                "(finished)",
                "Enter your input :",
            ],
        );
        let reply = parser.into_reply();
        assert_eq!(reply.answer, "Paragraph one.\n\nParagraph two.");
    }
}
