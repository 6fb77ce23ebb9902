//! Operator Notification Example
//!
//! This example demonstrates how to:
//! - Load the service configuration from a JSON file
//! - Send an ad-hoc email with a Reply-To header
//! - Notify the configured operator list
//!
//! Usage: `cargo run --example notify_operators -- config.json`

use integrations_smtp_notify::{HeaderMap, Service, ServiceConfig, SmtpError};

#[tokio::main]
async fn main() -> Result<(), SmtpError> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "notify.json".to_string());

    let config = ServiceConfig::from_file(&path)?;
    println!("Using SMTP server {}", config.address());

    let service = Service::new(config)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        "Reply-To".to_string(),
        vec!["\"Support\" <support@example.com>".to_string()],
    );

    let result = service
        .send_email_with_headers(
            "",
            &["user@example.com"],
            "Your export is ready",
            "The export you requested has finished.\nDownload it from the dashboard.",
            &headers,
        )
        .await?;
    println!("Email sent: {} in {:?}", result.message_id, result.duration);

    match service.notify("Export finished", "One export completed.").await {
        Ok(Some(result)) => println!("Operators notified: {}", result.message_id),
        Ok(None) => println!("No operators configured, notification skipped"),
        Err(e) => {
            eprintln!("Failed to notify operators: {}", e);
            return Err(e);
        }
    }

    let metrics = service.metrics().snapshot();
    println!(
        "Delivered: {}, failed: {}, skipped: {}",
        metrics.delivered,
        metrics.failed(),
        metrics.notifications_skipped
    );

    Ok(())
}
