use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::llm::{BackendKind, GenerationConfig};

/// Minimum description length accepted from callers.
pub const MIN_DESCRIPTION_CHARS: usize = 10;
pub const MAX_TITLE_CHARS: usize = 255;

/// Free-form task text supplied by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescription(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptionError {
    #[error("task description must be at least {min} characters (got {actual})")]
    TooShort { min: usize, actual: usize },
}

impl TaskDescription {
    pub fn new(text: impl Into<String>) -> Result<Self, DescriptionError> {
        let text = text.into();
        let actual = text.trim().chars().count();
        if actual < MIN_DESCRIPTION_CHARS {
            return Err(DescriptionError::TooShort {
                min: MIN_DESCRIPTION_CHARS,
                actual,
            });
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Everything needed for one backend attempt.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub description: &'a TaskDescription,
    pub prompt: &'a str,
    pub backend: BackendKind,
    pub params: &'a GenerationConfig,
}

/// One validated guide step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuideStepDraft {
    /// Dense 1-based position within the breakdown.
    pub step_number: u32,
    pub title: String,
    pub description: String,
    pub detailed_instructions: Option<String>,
    /// Minutes.
    pub estimated_time: Option<u32>,
    /// Ascending step numbers, each strictly lower than `step_number`.
    pub dependencies: Vec<u32>,
    pub resources: Vec<String>,
    pub code_snippets: Vec<String>,
    pub tips: Option<String>,
    pub warnings: Option<String>,
    pub verification_steps: Option<String>,
}

/// The pipeline's output: a complete, validated guide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBreakdown {
    pub title: String,
    pub description: String,
    pub steps: Vec<GuideStepDraft>,
    /// Always within 1..=10.
    pub complexity_score: u8,
    /// Minutes; `None` when no step carries an estimate.
    pub estimated_total_time: Option<u32>,
}

impl TaskBreakdown {
    pub fn step(&self, number: u32) -> Option<&GuideStepDraft> {
        number
            .checked_sub(1)
            .and_then(|idx| self.steps.get(idx as usize))
    }

    /// Replaces the derived title with one chosen by the user.
    pub fn with_title(mut self, title: Option<&str>) -> Self {
        if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
            self.title = cap_chars(title, MAX_TITLE_CHARS);
        }
        self
    }
}

/// At most `max` characters, trailing whitespace removed after a cut.
pub(crate) fn cap_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let capped: String = text.chars().take(max).collect();
    capped.trim_end().to_string()
}

// plain-text rendering for terminals
impl fmt::Display for TaskBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        write!(f, "complexity {}/10", self.complexity_score)?;
        if let Some(total) = self.estimated_total_time {
            write!(f, ", about {total} min")?;
        }
        writeln!(f)?;
        for step in &self.steps {
            writeln!(f)?;
            write!(f, "{}. {}", step.step_number, step.title)?;
            if let Some(minutes) = step.estimated_time {
                write!(f, " ({minutes} min)")?;
            }
            writeln!(f)?;
            if !step.dependencies.is_empty() {
                let deps: Vec<String> = step.dependencies.iter().map(u32::to_string).collect();
                writeln!(f, "   after: {}", deps.join(", "))?;
            }
            writeln!(f, "   {}", step.description)?;
            if let Some(details) = &step.detailed_instructions {
                for line in details.lines() {
                    writeln!(f, "   {line}")?;
                }
            }
            for snippet in &step.code_snippets {
                for line in snippet.lines() {
                    writeln!(f, "     {line}")?;
                }
            }
            for resource in &step.resources {
                writeln!(f, "   - {resource}")?;
            }
            if let Some(tips) = &step.tips {
                writeln!(f, "   tip: {tips}")?;
            }
            if let Some(warnings) = &step.warnings {
                writeln!(f, "   warning: {warnings}")?;
            }
            if let Some(check) = &step.verification_steps {
                writeln!(f, "   check: {check}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_requires_minimum_length() {
        assert_eq!(
            TaskDescription::new("  short  "),
            Err(DescriptionError::TooShort { min: 10, actual: 5 })
        );
        let d = TaskDescription::new("Build a REST API in Rust").unwrap();
        assert_eq!(d.as_str(), "Build a REST API in Rust");
    }

    #[test]
    fn title_override_ignores_blank() {
        let b = TaskBreakdown {
            title: "Derived".into(),
            description: String::new(),
            steps: vec![],
            complexity_score: 1,
            estimated_total_time: None,
        };
        assert_eq!(b.clone().with_title(Some("  ")).title, "Derived");
        assert_eq!(b.clone().with_title(None).title, "Derived");
        assert_eq!(b.with_title(Some(" Mine ")).title, "Mine");
    }

    #[test]
    fn title_override_is_capped() {
        let b = TaskBreakdown {
            title: "Derived".into(),
            description: String::new(),
            steps: vec![],
            complexity_score: 1,
            estimated_total_time: None,
        };
        let long = "é".repeat(MAX_TITLE_CHARS + 40);
        let title = b.with_title(Some(&long)).title;
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn text_rendering_lists_steps() {
        let step = |n: u32, deps: Vec<u32>| GuideStepDraft {
            step_number: n,
            title: format!("Step {n}"),
            description: "Do it".into(),
            detailed_instructions: None,
            estimated_time: Some(5),
            dependencies: deps,
            resources: vec!["https://example.com".into()],
            code_snippets: vec![],
            tips: None,
            warnings: Some("Careful".into()),
            verification_steps: None,
        };
        let b = TaskBreakdown {
            title: "Guide".into(),
            description: String::new(),
            steps: vec![step(1, vec![]), step(2, vec![1])],
            complexity_score: 2,
            estimated_total_time: Some(10),
        };
        let text = b.to_string();
        assert!(text.starts_with("Guide\ncomplexity 2/10, about 10 min\n"));
        assert!(text.contains("2. Step 2 (5 min)\n   after: 1\n   Do it\n"));
        assert!(text.contains("   - https://example.com\n   warning: Careful\n"));
    }
}
