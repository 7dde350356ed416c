//! `filebind check-name`: the parameter name validator used by job forms.

use filebind_params::{definition::check_name, FormValidation};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct NameCheck {
    pub name: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn run(name: &str) -> NameCheck {
    match check_name(name) {
        FormValidation::Ok => NameCheck {
            name: name.to_string(),
            valid: true,
            message: None,
        },
        FormValidation::Error(message) => NameCheck {
            name: name.to_string(),
            valid: false,
            message: Some(message),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_name() {
        assert!(run("FILE").valid);
        let check = run("../../tmp/x");
        assert!(!check.valid);
        assert!(check.message.unwrap().contains("../../tmp/x"));
    }
}
