//! Prompt Builder: bounded-size analysis prompts.
//!
//! Resume and job description are cut to fixed character budgets by plain
//! prefix truncation, then interpolated verbatim into a named template.
//! Pure: no I/O, same inputs always give the same prompt.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::analysis::prompts::{COMPREHENSIVE_TEMPLATE, CONCISE_TEMPLATE};

pub const RESUME_CHAR_BUDGET: usize = 3000;
pub const JOB_DESCRIPTION_CHAR_BUDGET: usize = 2000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptTemplate {
    /// Long ATS rubric.
    #[default]
    Comprehensive,
    /// Short structured markdown.
    Concise,
}

impl PromptTemplate {
    fn skeleton(self) -> &'static str {
        match self {
            PromptTemplate::Comprehensive => COMPREHENSIVE_TEMPLATE,
            PromptTemplate::Concise => CONCISE_TEMPLATE,
        }
    }
}

impl FromStr for PromptTemplate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "comprehensive" | "ats" => Ok(PromptTemplate::Comprehensive),
            "concise" | "short" => Ok(PromptTemplate::Concise),
            other => Err(format!("Unknown template '{other}'")),
        }
    }
}

/// Character budgets, counted in Unicode scalar values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptBudget {
    pub resume_chars: usize,
    pub job_description_chars: usize,
}

impl Default for PromptBudget {
    fn default() -> Self {
        Self {
            resume_chars: RESUME_CHAR_BUDGET,
            job_description_chars: JOB_DESCRIPTION_CHAR_BUDGET,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PromptBuilder {
    budget: PromptBudget,
}

impl PromptBuilder {
    pub fn new(budget: PromptBudget) -> Self {
        Self { budget }
    }

    pub fn build(&self, resume_text: &str, job_description: &str, template: PromptTemplate) -> String {
        let resume = truncate_chars(resume_text, self.budget.resume_chars);
        let jd = truncate_chars(job_description, self.budget.job_description_chars);
        fill_template(
            template.skeleton(),
            &[("resume_text", resume), ("job_description", jd)],
        )
    }
}

/// Returns the first `budget` characters of `text`, or `text` itself when shorter.
pub fn truncate_chars(text: &str, budget: usize) -> &str {
    match text.char_indices().nth(budget) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Replaces `{key}` placeholders in one left-to-right pass. Substituted values
/// are never rescanned, so user text containing `{...}` stays untouched.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let extra: usize = values.iter().map(|(_, v)| v.len()).sum();
    let mut out = String::with_capacity(template.len() + extra);
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let hit = values.iter().find(|(key, _)| {
            tail[1..].starts_with(key) && tail[1 + key.len()..].starts_with('}')
        });
        match hit {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len() + 2..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
