use serde::Serialize;

/// Where a relevance score falls relative to the two cut points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    /// At or below the noise threshold; never shown.
    #[serde(rename = "rejected")]
    Rejected,
    #[serde(rename = "likely original")]
    Original,
    #[serde(rename = "potential plagiarism")]
    Plagiarism,
}

impl Verdict {
    pub fn label(self) -> &'static str {
        match self {
            Verdict::Rejected => "rejected",
            Verdict::Original => "likely original",
            Verdict::Plagiarism => "potential plagiarism",
        }
    }
}

/// Both comparisons are strict: `score == noise` is rejected and
/// `score == similarity` is original.
pub fn classify(score: f32, noise_threshold: f32, similarity_threshold: f32) -> Verdict {
    if score <= noise_threshold {
        Verdict::Rejected
    } else if score > similarity_threshold {
        Verdict::Plagiarism
    } else {
        Verdict::Original
    }
}
