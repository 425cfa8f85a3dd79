//! Prompt builders for each turn of the loop
//!
//! Each builder returns a system turn followed by a user turn:
//! - Planning: plan, language choice and a framework-free test suite
//! - Coding: task and tests, plus previous code, sandbox output and feedback
//!   from round 2 on
//! - Review: passing code, asking for an explicit verdict
//! - Diagnosis: failing code, tests and raw output, asking for a fix

use duet_agent::{ChatMessage, APPROVAL_MARKER};
use duet_core::Task;

use crate::run::Run;

/// Most sandbox output quoted back into a prompt
pub const PROMPT_OUTPUT_LIMIT: usize = 4000;

const PLANNER_SYSTEM: &str = "You are a senior engineer leading a test-driven pair. \
You write the plan and the tests; another engineer writes the implementation.";

const IMPLEMENTER_SYSTEM: &str = "You are an engineer implementing code that must pass \
a fixed test suite. Reply with the complete implementation in one fenced code block.";

/// Keep the tail of `output`, where failures are usually reported.
///
/// Cuts on a char boundary and marks the cut.
pub fn truncate_output(output: &str, max: usize) -> String {
    if output.len() <= max {
        return output.to_string();
    }
    let mut start = output.len() - max;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    format!("[... output truncated ...]\n{}", &output[start..])
}

fn fenced(prompt: &mut String, label: &str, body: &str) {
    prompt.push_str("```");
    prompt.push_str(label);
    prompt.push('\n');
    prompt.push_str(body);
    if !body.ends_with('\n') {
        prompt.push('\n');
    }
    prompt.push_str("```\n\n");
}

/// Round 0: ask for a plan, a language and a test suite
pub fn planning_messages(task: &Task) -> Vec<ChatMessage> {
    let mut prompt = String::new();

    prompt.push_str("## TASK\n\n");
    prompt.push_str(task.description());
    prompt.push_str("\n\n");

    prompt.push_str("## INSTRUCTIONS\n\n");
    prompt.push_str("1. Write a short implementation plan.\n");
    prompt.push_str(
        "2. Pick an implementation language and state it on its own line as `Language: <name>`.\n",
    );
    prompt.push_str(
        "3. Write a complete test suite in ONE fenced code block labelled with that language.\n",
    );
    prompt.push('\n');

    prompt.push_str("## TEST RULES\n\n");
    prompt.push_str("- Use only plain assertions; no test framework is available\n");
    prompt.push_str("- Call the functions the implementation will define; do not define them\n");
    prompt.push_str("- Cover edge cases as well as the common path\n");

    vec![ChatMessage::system(PLANNER_SYSTEM), ChatMessage::user(prompt)]
}

/// Implementer turn for `run.round`
pub fn coding_messages(run: &Run) -> Vec<ChatMessage> {
    let language = run.language.as_str();
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "# Round {} of {}\n\n",
        run.round, run.max_rounds
    ));

    prompt.push_str("## TASK\n\n");
    prompt.push_str(run.task.description());
    prompt.push_str("\n\n");

    prompt.push_str(&format!("## TESTS ({})\n\n", language));
    prompt.push_str("Your code is concatenated in front of these tests and executed:\n\n");
    fenced(&mut prompt, language, run.tests_text());

    if run.round > 1 {
        prompt.push_str("## PREVIOUS ATTEMPT\n\n");
        fenced(&mut prompt, language, run.code_text());

        prompt.push_str("## TEST OUTPUT\n\n");
        fenced(
            &mut prompt,
            "",
            &truncate_output(run.last_output(), PROMPT_OUTPUT_LIMIT),
        );

        if let Some(feedback) = &run.feedback {
            prompt.push_str("## REVIEWER FEEDBACK\n\n");
            prompt.push_str(feedback);
            prompt.push_str("\n\n");
        }
    }

    prompt.push_str("## OBJECTIVE\n\n");
    if run.round > 1 {
        prompt.push_str("Fix the problems above. ");
    }
    prompt.push_str(&format!(
        "Return the full implementation in a single ```{} block. Do not repeat the tests.\n",
        language
    ));

    vec![
        ChatMessage::system(IMPLEMENTER_SYSTEM),
        ChatMessage::user(prompt),
    ]
}

/// Planner turn after a passing test run
pub fn review_messages(run: &Run) -> Vec<ChatMessage> {
    let language = run.language.as_str();
    let mut prompt = String::new();

    prompt.push_str("## TASK\n\n");
    prompt.push_str(run.task.description());
    prompt.push_str("\n\n");

    prompt.push_str("## IMPLEMENTATION (all tests pass)\n\n");
    fenced(&mut prompt, language, run.code_text());

    prompt.push_str("## TESTS\n\n");
    fenced(&mut prompt, language, run.tests_text());

    prompt.push_str("## VERDICT\n\n");
    prompt.push_str(&format!(
        "If the implementation fully solves the task, reply with {}. \
Otherwise list the specific changes required.\n",
        APPROVAL_MARKER
    ));

    vec![ChatMessage::system(PLANNER_SYSTEM), ChatMessage::user(prompt)]
}

/// Planner turn after a failing test run
pub fn diagnosis_messages(run: &Run) -> Vec<ChatMessage> {
    let language = run.language.as_str();
    let mut prompt = String::new();

    prompt.push_str("## TASK\n\n");
    prompt.push_str(run.task.description());
    prompt.push_str("\n\n");

    prompt.push_str("## IMPLEMENTATION (tests fail)\n\n");
    fenced(&mut prompt, language, run.code_text());

    prompt.push_str("## TESTS\n\n");
    fenced(&mut prompt, language, run.tests_text());

    prompt.push_str("## TEST OUTPUT\n\n");
    fenced(
        &mut prompt,
        "",
        &truncate_output(run.last_output(), PROMPT_OUTPUT_LIMIT),
    );

    prompt.push_str("## DIAGNOSIS\n\n");
    prompt.push_str(
        "Explain exactly why the tests fail and describe the specific fix. \
The tests are fixed; only the implementation may change.\n",
    );

    vec![ChatMessage::system(PLANNER_SYSTEM), ChatMessage::user(prompt)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_core::{CodeArtifact, Language, RoleModels, SandboxResult, TestArtifact};

    fn run_at(round: u32) -> Run {
        let mut run = Run::new(
            Task::new("reverse a string"),
            RoleModels::new("planner", "implementer"),
        );
        run.round = round;
        run.language = Language::new("python");
        run.tests = TestArtifact::new("assert reverse('abc') == 'cba'");
        run.code = Some(CodeArtifact::new(
            "def reverse(s): return s",
            run.language.clone(),
        ));
        run.last_result = Some(SandboxResult::from_counts(
            0,
            1,
            "Traceback\nAssertionError",
        ));
        run.feedback = Some("Use slicing with a negative step.".to_string());
        run
    }

    #[test]
    fn test_planning_prompt() {
        let messages = planning_messages(&Task::new("reverse a string"));
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("reverse a string"));
        assert!(messages[1].content.contains("Language:"));
        assert!(messages[1].content.contains("no test framework"));
    }

    #[test]
    fn test_first_round_has_only_task_and_tests() {
        let prompt = &coding_messages(&run_at(1))[1].content;
        assert!(prompt.contains("Round 1 of 5"));
        assert!(prompt.contains("assert reverse('abc') == 'cba'"));
        assert!(!prompt.contains("PREVIOUS ATTEMPT"));
        assert!(!prompt.contains("AssertionError"));
        assert!(!prompt.contains("negative step"));
    }

    #[test]
    fn test_later_rounds_carry_history() {
        let prompt = &coding_messages(&run_at(2))[1].content;
        assert!(prompt.contains("PREVIOUS ATTEMPT"));
        assert!(prompt.contains("def reverse(s): return s"));
        assert!(prompt.contains("AssertionError"));
        assert!(prompt.contains("negative step"));
        assert!(prompt.contains("```python"));
    }

    #[test]
    fn test_review_asks_for_marker() {
        let prompt = &review_messages(&run_at(1))[1].content;
        assert!(prompt.contains(APPROVAL_MARKER));
        assert!(prompt.contains("def reverse(s)"));
    }

    #[test]
    fn test_diagnosis_includes_output() {
        let prompt = &diagnosis_messages(&run_at(3))[1].content;
        assert!(prompt.contains("AssertionError"));
        assert!(prompt.contains("assert reverse('abc') == 'cba'"));
    }

    #[test]
    fn test_truncate_keeps_tail() {
        let output = format!("{}END", "x".repeat(100));
        let cut = truncate_output(&output, 10);
        assert!(cut.starts_with("[... output truncated ...]"));
        assert!(cut.ends_with("xxxxxxxEND"));
        assert_eq!(truncate_output("short", 10), "short");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let output = "é".repeat(20);
        let cut = truncate_output(&output, 5);
        assert!(cut.ends_with("éé"));
    }
}
