//! Errors with suggestions for CLI users.

use std::fmt;

/// An error with context and suggestions for how to fix it.
#[derive(Debug)]
pub struct HelpfulError {
    pub message: String,
    pub context: Option<String>,
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// `-p NAME=...` names a parameter the job does not define.
    pub fn unknown_parameter(name: &str, job: &str, known: &[&str]) -> Self {
        let err = Self::new(format!("No such parameter {} in job {}", name, job));
        if known.is_empty() {
            err.with_context("The job defines no parameters")
        } else {
            err.with_context(format!("Defined parameters: {}", known.join(", ")))
        }
    }

    pub fn bad_assignment(raw: &str) -> Self {
        Self::new(format!("Invalid parameter assignment: '{}'", raw))
            .with_suggestion("TRY: -p NAME=<base64 content>")
            .with_suggestion("TRY: -p NAME= < file   (reads the content from stdin)")
    }

    pub fn build_not_found(id: &str) -> Self {
        Self::new(format!("No build {}", id))
            .with_suggestion("TRY: Check the id printed by 'filebind build --json'")
            .with_suggestion("TRY: Check --home / FILEBIND_HOME points at the same home")
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;
        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }
        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

/// Print an error as a single JSON object on stdout.
pub fn print_json_error(err: &anyhow::Error) {
    let chain: Vec<String> = err.chain().skip(1).map(|e| e.to_string()).collect();
    let message = match err.downcast_ref::<HelpfulError>() {
        Some(helpful) => helpful.message.clone(),
        None => err.to_string(),
    };
    let payload = serde_json::json!({
        "error": message,
        "causes": chain,
    });
    println!("{}", payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpful_error_display() {
        let err = HelpfulError::unknown_parameter("OTHER", "myjob", &["FILE", "MODE"]);
        let display = err.to_string();
        assert!(display.contains("ERROR: No such parameter OTHER in job myjob"));
        assert!(display.contains("CONTEXT: Defined parameters: FILE, MODE"));
    }

    #[test]
    fn test_bad_assignment_suggests_forms() {
        let display = HelpfulError::bad_assignment("FILE").to_string();
        assert!(display.contains("'FILE'"));
        assert!(display.contains("TRY: -p NAME="));
    }
}
