//! Personalized rendering of subject and body patterns.
//!
//! Patterns use Jinja syntax (`Hello {{ first_name }}`). Only the four
//! recipient fields are visible; anything else is a render error rather
//! than an empty string.

use minijinja::{context, Environment, UndefinedBehavior};
use thiserror::Error;

use crate::session::{Recipient, RenderedMessage, Template};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Unable to render {part} for {email}: {message}")]
    Render {
        part: &'static str,
        email: String,
        message: String,
    },
}

struct Renderer {
    env: Environment<'static>,
}

impl Renderer {
    fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        Self { env }
    }

    fn render(
        &self,
        part: &'static str,
        source: &str,
        recipient: &Recipient,
    ) -> Result<String, TemplateError> {
        let ctx = context! {
            title => recipient.title.as_str(),
            first_name => recipient.first_name.as_str(),
            last_name => recipient.last_name.as_str(),
            email => recipient.email.as_str(),
        };

        self.env
            .render_str(source, ctx)
            .map(|rendered| rendered.trim().to_string())
            .map_err(|e| TemplateError::Render {
                part,
                email: recipient.email.clone(),
                message: e.to_string(),
            })
    }

    fn message(
        &self,
        template: &Template,
        recipient: &Recipient,
    ) -> Result<RenderedMessage, TemplateError> {
        let subject = self.render("subject", &template.subject, recipient)?;
        let body = self.render("body", &template.body, recipient)?;
        Ok(RenderedMessage::new(recipient.clone(), subject, body))
    }
}

/// Renders one recipient's message. New messages start approved and pending.
pub fn render_message(
    template: &Template,
    recipient: &Recipient,
) -> Result<RenderedMessage, TemplateError> {
    Renderer::new().message(template, recipient)
}

/// Renders every recipient in order, or fails on the first bad one.
pub fn render_batch(
    template: &Template,
    recipients: &[Recipient],
) -> Result<Vec<RenderedMessage>, TemplateError> {
    let renderer = Renderer::new();
    recipients
        .iter()
        .map(|recipient| renderer.message(template, recipient))
        .collect()
}

/// Re-renders only the subjects, leaving edited bodies, approval and delivery
/// state alone. Nothing changes unless every subject renders.
pub fn rerender_subjects(
    template: &Template,
    messages: &mut [RenderedMessage],
) -> Result<(), TemplateError> {
    let renderer = Renderer::new();
    let subjects = messages
        .iter()
        .map(|m| renderer.render("subject", &template.subject, &m.recipient))
        .collect::<Result<Vec<_>, _>>()?;

    for (message, subject) in messages.iter_mut().zip(subjects) {
        message.subject = subject;
    }
    Ok(())
}
