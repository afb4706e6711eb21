//! Ticket email delivery.

use crate::config::SmtpConfig;
use boxoffice_core::{BoxFuture, MailerError, Order, Ticket, TicketMailer};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::fmt::Write as _;

/// Sends ticket emails through an SMTP relay using Lettre.
///
/// One transport is built per email; deliveries are rare and this keeps the
/// mailer free of pooled connection state.
#[derive(Clone)]
pub struct SmtpTicketMailer {
    server: String,
    port: u16,
    credentials: Credentials,
    from_email: String,
    from_name: String,
}

impl SmtpTicketMailer {
    /// Create a mailer from SMTP settings.
    #[must_use]
    pub fn new(config: &SmtpConfig) -> Self {
        Self {
            server: config.server.clone(),
            port: config.port,
            credentials: Credentials::new(config.username.clone(), config.password.clone()),
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
        }
    }

    fn build_transport(&self) -> Result<SmtpTransport, MailerError> {
        Ok(SmtpTransport::relay(&self.server)
            .map_err(|e| MailerError(format!("SMTP relay error: {e}")))?
            .port(self.port)
            .credentials(self.credentials.clone())
            .build())
    }

    fn from_header(&self) -> String {
        format!("{} <{}>", self.from_name, self.from_email)
    }

    async fn deliver(&self, order: &Order, tickets: &[Ticket]) -> Result<(), MailerError> {
        let email = Message::builder()
            .from(
                self.from_header()
                    .parse()
                    .map_err(|e| MailerError(format!("Invalid from address: {e}")))?,
            )
            .to(order
                .buyer
                .email
                .parse()
                .map_err(|e| MailerError(format!("Invalid to address: {e}")))?)
            .subject(format!("Your {} tickets", order.tier))
            .header(ContentType::TEXT_HTML)
            .body(render_tickets(order, tickets))
            .map_err(|e| MailerError(format!("Failed to build email: {e}")))?;

        let mailer = self.build_transport()?;

        tokio::task::spawn_blocking(move || {
            mailer
                .send(&email)
                .map_err(|e| MailerError(format!("Failed to send email: {e}")))
        })
        .await
        .map_err(|e| MailerError(format!("Email task failed: {e}")))?
        .map(|_| ())
    }
}

impl TicketMailer for SmtpTicketMailer {
    fn send_tickets<'a>(
        &'a self,
        order: &'a Order,
        tickets: &'a [Ticket],
    ) -> BoxFuture<'a, Result<(), MailerError>> {
        Box::pin(self.deliver(order, tickets))
    }
}

/// Writes ticket deliveries to the log instead of sending mail.
///
/// Used when no SMTP relay is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingTicketMailer;

impl TicketMailer for LoggingTicketMailer {
    fn send_tickets<'a>(
        &'a self,
        order: &'a Order,
        tickets: &'a [Ticket],
    ) -> BoxFuture<'a, Result<(), MailerError>> {
        tracing::info!(
            checkout_id = %order.checkout_id,
            to = %order.buyer.email,
            tickets = tickets.len(),
            "SMTP not configured; ticket email logged only"
        );
        Box::pin(async { Ok(()) })
    }
}

/// Render the HTML body listing each ticket's QR payload.
#[must_use]
pub fn render_tickets(order: &Order, tickets: &[Ticket]) -> String {
    let mut rows = String::new();
    for (index, ticket) in tickets.iter().enumerate() {
        let _ = write!(
            rows,
            r#"
        <tr>
            <td style="padding: 8px;">{number}</td>
            <td style="padding: 8px;">{tier}</td>
            <td style="padding: 8px; font-family: monospace; word-break: break-all;">{payload}</td>
        </tr>"#,
            number = index + 1,
            tier = escape(ticket.tier.as_str()),
            payload = escape(&ticket.qr_payload),
        );
    }

    format!(
        r#"
<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Your tickets</title>
</head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
    <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
        <h2 style="color: #2563eb;">Thanks for your order, {name}!</h2>
        <p>Order <strong>{checkout_id}</strong>: {quantity} x {tier}.</p>
        <p>Show the code for each ticket at the door. Each ticket admits once.</p>
        <table style="border-collapse: collapse; width: 100%;">{rows}
        </table>
    </div>
</body>
</html>
"#,
        name = escape(&order.buyer.name),
        checkout_id = escape(order.checkout_id.as_str()),
        quantity = order.quantity,
        tier = escape(order.tier.as_str()),
    )
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use boxoffice_core::{NewOrder, TicketId, TicketStatus};
    use boxoffice_testing::helpers::{buyer, checkout, tier};

    fn order() -> Order {
        NewOrder {
            checkout_id: checkout("co-1"),
            tier: tier("VIP"),
            quantity: 2,
            buyer: buyer("Bobby <Tables>"),
            client_key: None,
            created_at: chrono::Utc::now(),
        }
        .into_pending()
    }

    fn ticket(payload: &str) -> Ticket {
        Ticket {
            id: TicketId::new(),
            checkout_id: checkout("co-1"),
            tier: tier("VIP"),
            status: TicketStatus::Active,
            buyer_name: "Bobby".to_string(),
            buyer_email: "bobby@example.com".to_string(),
            qr_payload: payload.to_string(),
            issued_at: chrono::Utc::now(),
            scanned_at: None,
        }
    }

    #[test]
    fn rendered_email_lists_every_ticket() {
        let html = render_tickets(&order(), &[ticket("payload-one"), ticket("payload-two")]);

        assert!(html.contains("payload-one"));
        assert!(html.contains("payload-two"));
        assert!(html.contains("co-1"));
        assert!(html.contains("Bobby &lt;Tables&gt;"));
        assert!(!html.contains("<Tables>"));
    }

    #[tokio::test]
    async fn logging_mailer_always_succeeds() {
        let order = order();
        assert!(
            LoggingTicketMailer
                .send_tickets(&order, &[ticket("p")])
                .await
                .is_ok()
        );
    }
}
