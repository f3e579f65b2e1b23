use serde::{Deserialize, Serialize};

pub const REGISTER: &str = "REGISTER";
pub const FORGET_PASSWORD: &str = "FORGET_PASSWORD";
pub const RESET_PASSWORD: &str = "RESET_PASSWORD";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub code: String,
    pub subject: String,
    pub body_html: String,
    pub body_text: String,
    pub required_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateContent {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Builtin email catalogue.
pub fn builtin_templates() -> Vec<Template> {
    vec![
        Template {
            code: REGISTER.to_string(),
            subject: "Welcome to Our Service - Complete Registration".to_string(),
            body_html: "<p>Hi {{name}},</p>\
                        <p>Use the code <strong>{{otp}}</strong> to complete your registration.</p>"
                .to_string(),
            body_text: "Hi {{name}}, use the code {{otp}} to complete your registration."
                .to_string(),
            required_fields: vec!["name".to_string(), "otp".to_string()],
        },
        Template {
            code: FORGET_PASSWORD.to_string(),
            subject: "Password Reset Request".to_string(),
            body_html: "<p>Hi {{name}},</p>\
                        <p>Your password reset code is <strong>{{otp}}</strong>. \
                        If you did not ask for it, ignore this email.</p>"
                .to_string(),
            body_text: "Hi {{name}}, your password reset code is {{otp}}. \
                        If you did not ask for it, ignore this email."
                .to_string(),
            required_fields: vec!["name".to_string(), "otp".to_string()],
        },
        Template {
            code: RESET_PASSWORD.to_string(),
            subject: "Your Password Has Been Reset".to_string(),
            body_html: "<p>Hi {{name}},</p><p>Your password has been changed.</p>".to_string(),
            body_text: "Hi {{name}}, your password has been changed.".to_string(),
            required_fields: vec!["name".to_string()],
        },
    ]
}
