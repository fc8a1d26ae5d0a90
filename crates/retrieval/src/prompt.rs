/// Marker the prompt ends with; the model's answer is everything after
/// its final occurrence in the completion.
pub const ANSWER_CUE: &str = "Your Answer:";

/// Whether the answer cue was found in the model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CueOutcome {
    Extracted,
    RawFallback,
}

/// Assembles the analyst prompt from the retrieved build context and the
/// user's question.
#[must_use]
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "You are an expert Jenkins CI/CD analyst.\n\
         Use ONLY the build data provided below.\n\
         \n\
         Build Data:\n\
         {context}\n\
         \n\
         Question:\n\
         {question}\n\
         \n\
         {ANSWER_CUE}\n"
    )
}

/// Extracts the answer from a completion.
///
/// Models that echo the prompt repeat the cue, so the split is on the
/// *last* occurrence. When the cue is absent the completion is returned
/// unmodified rather than discarded.
#[must_use]
pub fn extract_answer(completion: &str) -> (String, CueOutcome) {
    match completion.rfind(ANSWER_CUE) {
        Some(at) => {
            let answer = completion[at + ANSWER_CUE.len()..].trim().to_string();
            (answer, CueOutcome::Extracted)
        }
        None => (completion.to_string(), CueOutcome::RawFallback),
    }
}
