//! Pass-by-pass replay of a failing pipeline.

use std::fmt;

use super::LoweringDriver;
use crate::error::JitError;

/// IR text after one pipeline step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugStage {
    /// The pass that produced `text`; `None` for the original input.
    pub pass: Option<String>,
    pub text: String,
}

/// Diagnostic returned by `Engine::add` in debug mode instead of a lowering
/// error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugResult {
    stages: Vec<DebugStage>,
    failed_pass: Option<String>,
    diagnostic: Option<String>,
}

impl DebugResult {
    /// Every successful stage, starting with the input.
    pub fn stages(&self) -> &[DebugStage] {
        &self.stages
    }

    /// The first pass that failed on its own.
    pub fn failed_pass(&self) -> Option<&str> {
        self.failed_pass.as_deref()
    }

    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    /// Input of the failing pass.
    pub fn last_valid_text(&self) -> &str {
        self.stages.last().map_or("", |s| s.text.as_str())
    }

    /// Readable multi-section report.
    pub fn explain(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DebugResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.failed_pass, &self.diagnostic) {
            (Some(pass), Some(diag)) => writeln!(f, "failed at pass '{pass}':\n{diag}")?,
            (None, Some(diag)) => writeln!(f, "pipeline failed:\n{diag}")?,
            (_, None) => writeln!(f, "every pass succeeded when run individually")?,
        }
        for stage in &self.stages {
            match &stage.pass {
                Some(pass) => writeln!(f, "\n===== after {pass} =====")?,
                None => writeln!(f, "\n===== input =====")?,
            }
            writeln!(f, "{}", stage.text.trim_end())?;
        }
        Ok(())
    }
}

pub(super) fn run(driver: &LoweringDriver, ir: &str, passes: &[String]) -> DebugResult {
    let mut result = DebugResult {
        stages: vec![DebugStage {
            pass: None,
            text: ir.to_string(),
        }],
        failed_pass: None,
        diagnostic: None,
    };
    for pass in passes {
        let input = result.last_valid_text().to_string();
        match driver.apply_passes(&input, std::slice::from_ref(pass)) {
            Ok(text) => result.stages.push(DebugStage {
                pass: Some(pass.clone()),
                text,
            }),
            Err(err) => {
                tracing::debug!(%pass, "pass failed during debug replay");
                result.failed_pass = Some(pass.clone());
                result.diagnostic = Some(match err {
                    JitError::Lowering { diagnostic } => diagnostic,
                    other => other.to_string(),
                });
                break;
            }
        }
    }
    result
}
