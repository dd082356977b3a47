use parley_core::types::{
    Difficulty, InterviewStyle, ResponseType, SessionConfig, Turn, TurnRole,
};

use crate::client::AgentError;

/// How many trailing turns of history are replayed to the interviewer.
const HISTORY_TAIL: usize = 12;
/// Cap on resume text injected into prompts (characters).
const MAX_RESUME_CHARS: usize = 6_000;

/// Reply-tag protocol: the interviewer model is told to open its reply with
/// one of these markers so the reply can be classified without a second
/// call. Unknown or missing markers default to a plain question.
const TAG_QUESTION: &str = "QUESTION:";
const TAG_FOLLOW_UP: &str = "FOLLOW_UP:";
const TAG_CLOSING: &str = "CLOSING:";

fn style_line(style: InterviewStyle) -> &'static str {
    match style {
        InterviewStyle::Formal => "Keep a professional, courteous tone.",
        InterviewStyle::Casual => "Keep a relaxed, conversational tone.",
        InterviewStyle::Aggressive => {
            "Press hard on weak answers and challenge vague claims directly."
        }
        InterviewStyle::Technical => {
            "Stay concrete and technical; ask for specifics, trade-offs, and reasoning."
        }
    }
}

fn difficulty_line(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Easy => "Ask entry-level questions with gentle follow-ups.",
        Difficulty::Medium => "Ask mid-level questions that probe real experience.",
        Difficulty::Hard => "Ask demanding questions that expose gaps in depth.",
    }
}

fn interviewer_preamble(config: &SessionConfig) -> String {
    let mut out = format!(
        "You are a job interviewer conducting a mock interview for the role of {}.",
        config.target_role
    );
    if let Some(company) = &config.company {
        out.push_str(&format!(" The position is at {company}."));
    }
    if let Some(desc) = &config.role_description {
        out.push_str(&format!("\nRole description: {desc}"));
    }
    if let Some(resume) = &config.resume_text {
        let trimmed: String = resume.chars().take(MAX_RESUME_CHARS).collect();
        out.push_str(&format!("\nCandidate resume:\n{trimmed}"));
    }
    out.push('\n');
    out.push_str(style_line(config.style));
    out.push('\n');
    out.push_str(difficulty_line(config.difficulty));
    out
}

/// Prompt for the opening turn of the interview.
pub fn opening_prompt(config: &SessionConfig) -> String {
    format!(
        "{}\n\nOpen the interview: greet the candidate briefly, introduce \
         yourself as the interviewer, and ask them to introduce themselves. \
         Reply with the spoken text only.",
        interviewer_preamble(config)
    )
}

/// Prompt for every subsequent interviewer turn.
pub fn next_turn_prompt(config: &SessionConfig, history: &[Turn], should_close: bool) -> String {
    let mut out = interviewer_preamble(config);
    out.push_str("\n\nConversation so far:\n");
    let tail_start = history.len().saturating_sub(HISTORY_TAIL);
    for turn in &history[tail_start..] {
        let speaker = match turn.role {
            TurnRole::User => "Candidate",
            TurnRole::Assistant => "Interviewer",
            TurnRole::System => "System",
        };
        out.push_str(&format!("{speaker}: {}\n", turn.text()));
    }

    if should_close {
        out.push_str(&format!(
            "\nThe interview is at its end. Thank the candidate, close the \
             conversation, and do not ask another question. Start your reply \
             with the marker {TAG_CLOSING}"
        ));
    } else {
        out.push_str(&format!(
            "\nReact briefly to the candidate's last answer, then either dig \
             deeper into it or move to a new question. Start your reply with \
             the marker {TAG_FOLLOW_UP} when digging deeper, or {TAG_QUESTION} \
             when moving on."
        ));
    }
    out
}

/// Strip the reply-tag marker and classify the interviewer's reply.
pub fn parse_interviewer_reply(raw: &str, should_close: bool) -> (String, ResponseType) {
    let trimmed = raw.trim();
    for (tag, response_type) in [
        (TAG_CLOSING, ResponseType::Closing),
        (TAG_FOLLOW_UP, ResponseType::FollowUp),
        (TAG_QUESTION, ResponseType::Question),
    ] {
        if let Some(rest) = trimmed.strip_prefix(tag) {
            return (rest.trim().to_string(), response_type);
        }
    }
    // Model ignored the marker protocol: trust the caller's intent.
    let fallback = if should_close { ResponseType::Closing } else { ResponseType::Question };
    (trimmed.to_string(), fallback)
}

/// Prompt for grading a single question/answer pair.
pub fn evaluate_prompt(config: &SessionConfig, question: &str, answer: &str) -> String {
    format!(
        "You are an interview coach reviewing a mock interview for the role \
         of {}.\n\nQuestion asked:\n{question}\n\nCandidate answer:\n{answer}\n\n\
         Give concise, actionable feedback on this answer: what worked, what \
         was missing, and how to improve it. Reply with the feedback text only.",
        config.target_role
    )
}

/// Prompt for the terminal session summary. The reply must be a single JSON
/// object so it can be installed verbatim.
pub fn summary_prompt(
    config: &SessionConfig,
    history: &[Turn],
    feedback_texts: &[String],
) -> String {
    let mut out = format!(
        "You are an interview coach producing the final written analysis of a \
         completed mock interview for the role of {}.\n\nFull conversation:\n",
        config.target_role
    );
    for turn in history {
        let speaker = match turn.role {
            TurnRole::User => "Candidate",
            TurnRole::Assistant => "Interviewer",
            TurnRole::System => "System",
        };
        out.push_str(&format!("{speaker}: {}\n", turn.text()));
    }
    if !feedback_texts.is_empty() {
        out.push_str("\nPer-answer coaching notes:\n");
        for note in feedback_texts {
            out.push_str(&format!("- {note}\n"));
        }
    }
    out.push_str(
        "\nReply with a single JSON object and nothing else, using exactly \
         these keys: \"patterns\" (recurring behaviours you observed), \
         \"strengths\", \"weaknesses\", \"improvement_areas\" (ordered, most \
         important first), \"search_topics\" (2-4 short phrases the candidate \
         should study). Every value is an array of strings.",
    );
    out
}

/// Extract a JSON object from a model reply that may be wrapped in prose or
/// code fences.
pub fn extract_json_object(raw: &str) -> Result<&str, AgentError> {
    let start = raw
        .find('{')
        .ok_or_else(|| AgentError::Parse("no JSON object in reply".into()))?;
    let end = raw
        .rfind('}')
        .ok_or_else(|| AgentError::Parse("unterminated JSON object in reply".into()))?;
    if end < start {
        return Err(AgentError::Parse("malformed JSON object in reply".into()));
    }
    Ok(&raw[start..=end])
}
