use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Anything that can be read from disk into a single DataFrame.
pub trait Dataset {
    fn load(&self) -> PolarsResult<DataFrame>;
}

/// Wrap a foreign error so it can travel through `PolarsResult`.
pub fn polars_err(e: Box<dyn std::error::Error>) -> PolarsError {
    PolarsError::ComputeError(e.to_string().into())
}

/// Confidence tier attached to a kinobead drug–target record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetConfidence {
    High,
    Low,
    Other(String),
}

impl TargetConfidence {
    /// Parses labels like "High confidence" / "low confidence" / "Not determined".
    pub fn parse(label: &str) -> Self {
        let lower = label.trim().to_lowercase();
        if lower.starts_with("high") {
            TargetConfidence::High
        } else if lower.starts_with("low") {
            TargetConfidence::Low
        } else {
            TargetConfidence::Other(label.trim().to_string())
        }
    }

    pub fn is_high(&self) -> bool {
        matches!(self, TargetConfidence::High)
    }
}

/// Fixed column names used once tables have been resolved.
pub const DRUG_COL: &str = "drug";
pub const CELL_LINE_COL: &str = "cell_line";
pub const TARGET_COL: &str = "target";
pub const AFFINITY_COL: &str = "affinity";
pub const CONFIDENCE_COL: &str = "target_classification";
pub const RESPONSE_COL: &str = "viability";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_labels() {
        assert_eq!(TargetConfidence::parse("High confidence"), TargetConfidence::High);
        assert_eq!(TargetConfidence::parse(" high "), TargetConfidence::High);
        assert_eq!(TargetConfidence::parse("Low confidence"), TargetConfidence::Low);
        assert_eq!(
            TargetConfidence::parse("Not determined"),
            TargetConfidence::Other("Not determined".to_string())
        );
        assert!(!TargetConfidence::parse("low").is_high());
    }
}
