//! Report artifact delivery.
//!
//! Delivery is a fire-and-forget side effect of a firing: the engine logs
//! failures and moves on, so a broken mail relay can never fail a report
//! job or stop a recurring schedule.

use crate::job_store::ReportFormat;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use lettre::{Message, SmtpTransport, Transport};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to build report e-mail: {0}")]
    Message(String),
    #[error("smtp send failed: {0}")]
    Send(String),
}

/// Delivery collaborator: hands a rendered artifact to its recipient.
pub trait ReportDelivery: Send + Sync {
    fn send(
        &self,
        recipient: &str,
        artifact: &[u8],
        format: ReportFormat,
        report_name: &str,
    ) -> Result<(), DeliveryError>;
}

/// Artifact filename derived from the report name.
fn attachment_filename(report_name: &str, format: ReportFormat) -> String {
    let stem: String = report_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = if stem.is_empty() {
        "report".to_string()
    } else {
        stem
    };
    format!("{}.{}", stem, format.extension())
}

/// Sends report artifacts over SMTP.
pub struct SmtpDelivery {
    transport: SmtpTransport,
    from_address: String,
}

impl SmtpDelivery {
    /// Plain (unencrypted) relay connection, the usual setup for an
    /// in-plant mail gateway.
    pub fn new(smtp_host: &str, smtp_port: u16, from_address: impl Into<String>) -> Self {
        let transport = SmtpTransport::builder_dangerous(smtp_host)
            .port(smtp_port)
            .build();
        Self {
            transport,
            from_address: from_address.into(),
        }
    }
}

impl ReportDelivery for SmtpDelivery {
    fn send(
        &self,
        recipient: &str,
        artifact: &[u8],
        format: ReportFormat,
        report_name: &str,
    ) -> Result<(), DeliveryError> {
        let from = self
            .from_address
            .parse()
            .map_err(|e| DeliveryError::Message(format!("invalid from address: {}", e)))?;
        let to = recipient
            .parse()
            .map_err(|e| DeliveryError::Message(format!("invalid recipient address: {}", e)))?;
        let content_type = ContentType::parse(format.mime_type())
            .map_err(|e| DeliveryError::Message(e.to_string()))?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(format!("Scheduled report: {}", report_name))
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(format!(
                        "Attached: {} ({} format), generated by the fleet report scheduler.",
                        report_name,
                        format.as_str()
                    )))
                    .singlepart(
                        Attachment::new(attachment_filename(report_name, format))
                            .body(artifact.to_vec(), content_type),
                    ),
            )
            .map_err(|e| DeliveryError::Message(e.to_string()))?;

        self.transport
            .send(&email)
            .map_err(|e| DeliveryError::Send(e.to_string()))?;
        Ok(())
    }
}

/// Fallback used when no SMTP relay is configured: logs the artifact and
/// drops it.
pub struct LogOnlyDelivery;

impl ReportDelivery for LogOnlyDelivery {
    fn send(
        &self,
        recipient: &str,
        artifact: &[u8],
        format: ReportFormat,
        report_name: &str,
    ) -> Result<(), DeliveryError> {
        info!(
            "No SMTP relay configured; dropping {} byte {} artifact '{}' for {}",
            artifact.len(),
            format.as_str(),
            report_name,
            recipient
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_filename_sanitizes() {
        assert_eq!(
            attachment_filename("Alarm Summary", ReportFormat::Pdf),
            "Alarm_Summary.pdf"
        );
        assert_eq!(
            attachment_filename("weekly/prod: line 3", ReportFormat::Excel),
            "weekly_prod__line_3.xlsx"
        );
        assert_eq!(attachment_filename("", ReportFormat::Csv), "report.csv");
    }

    #[test]
    fn test_log_only_delivery_accepts_everything() {
        let delivery = LogOnlyDelivery;
        delivery
            .send("ops@example.com", b"bytes", ReportFormat::Csv, "Anything")
            .unwrap();
    }
}
