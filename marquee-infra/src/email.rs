use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SmtpConfig;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone)]
pub struct BookingConfirmation {
    pub user_name: String,
    pub booking_id: String,
    pub movie_title: String,
    pub theater: String,
    pub seats: Vec<String>,
    pub total_amount: f64,
    pub booking_date: String,
}

/// Sends booking-confirmation mail. Without SMTP configuration every send is
/// a silent success, so callers never branch on whether mail is enabled.
pub struct EmailNotifier {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: String,
}

impl EmailNotifier {
    pub fn new(config: Option<&SmtpConfig>) -> Self {
        let Some(config) = config else {
            warn!("Email service not configured (missing smtp settings)");
            return Self {
                transport: None,
                from: String::new(),
            };
        };

        match AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host) {
            Ok(builder) => {
                let credentials =
                    Credentials::new(config.username.clone(), config.password.clone());
                let transport = builder.port(config.port).credentials(credentials).build();
                info!("Email service initialized (host: {}:{})", config.host, config.port);
                Self {
                    transport: Some(transport),
                    from: config.from.clone(),
                }
            }
            Err(err) => {
                warn!("Email service disabled, invalid relay {}: {}", config.host, err);
                Self {
                    transport: None,
                    from: String::new(),
                }
            }
        }
    }

    pub fn enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub async fn send_booking_confirmation(
        &self,
        to: &str,
        data: BookingConfirmation,
    ) -> Result<(), EmailError> {
        let Some(transport) = &self.transport else {
            debug!("Email not sent (not configured): booking confirmation for {}", to);
            return Ok(());
        };

        let message = Message::builder()
            .from(self.from.parse()?)
            .to(to.parse()?)
            .subject(format!("Booking Confirmed - {}", data.movie_title))
            .header(ContentType::TEXT_HTML)
            .body(render_confirmation(&data))?;

        transport.send(message).await?;
        info!("Booking confirmation sent to {}", to);
        Ok(())
    }
}

fn render_confirmation(data: &BookingConfirmation) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; color: #333;">
  <h1>Booking Confirmed!</h1>
  <p>Hi {user_name},</p>
  <p>Your booking has been confirmed. Here are your ticket details:</p>
  <table>
    <tr><td>Booking ID:</td><td><b>{booking_id}</b></td></tr>
    <tr><td>Movie:</td><td><b>{movie_title}</b></td></tr>
    <tr><td>Theater:</td><td><b>{theater}</b></td></tr>
    <tr><td>Date:</td><td><b>{booking_date}</b></td></tr>
    <tr><td>Seats:</td><td><b>{seats}</b></td></tr>
    <tr><td>Total:</td><td><b>${total_amount:.2}</b></td></tr>
  </table>
  <p>Please arrive 15 minutes before the showing. Enjoy the movie!</p>
</body>
</html>"#,
        user_name = data.user_name,
        booking_id = data.booking_id,
        movie_title = data.movie_title,
        theater = data.theater,
        booking_date = data.booking_date,
        seats = data.seats.join(", "),
        total_amount = data.total_amount,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_notifier_is_disabled_but_usable() {
        let notifier = EmailNotifier::new(None);
        assert!(!notifier.enabled());
    }

    #[tokio::test]
    async fn sending_without_configuration_succeeds_silently() {
        let notifier = EmailNotifier::new(None);
        let outcome = notifier
            .send_booking_confirmation(
                "user@example.com",
                BookingConfirmation {
                    user_name: "user@example.com".to_string(),
                    booking_id: "b-1".to_string(),
                    movie_title: "Inception".to_string(),
                    theater: "Theater 1".to_string(),
                    seats: vec!["A1".to_string()],
                    total_amount: 150.0,
                    booking_date: "August 2, 2026 at 8:00 PM".to_string(),
                },
            )
            .await;
        assert!(outcome.is_ok());
    }

    #[test]
    fn confirmation_body_carries_the_booking_facts() {
        let body = render_confirmation(&BookingConfirmation {
            user_name: "u1".to_string(),
            booking_id: "b-42".to_string(),
            movie_title: "Inception".to_string(),
            theater: "Theater 1".to_string(),
            seats: vec!["A1".to_string(), "A2".to_string()],
            total_amount: 300.0,
            booking_date: "August 2, 2026 at 8:00 PM".to_string(),
        });
        assert!(body.contains("b-42"));
        assert!(body.contains("A1, A2"));
        assert!(body.contains("$300.00"));
    }
}
