//! Basic Email Sending Example
//!
//! This example demonstrates how to:
//! - Configure an implicit TLS client with the builder pattern
//! - Construct a simple text email with an attachment
//! - Send the email and handle the result

use integrations_mailsender::{Mailsender, SmtpClient, SmtpError};

#[tokio::main]
async fn main() -> Result<(), SmtpError> {
    let mailsender = Mailsender::new();

    // Port 465 speaks TLS from the first byte
    let config = mailsender
        .smtp_client()
        .host("smtp.example.com:465")
        .login("user@example.com")
        .password("your-password")
        .ssl(true)
        .build()?;

    let client = SmtpClient::new(config);

    let email = mailsender
        .email()
        .from("Sender Name <sender@example.com>")
        .to(["recipient@example.com"])
        .subject("Hello from Rust!")
        .text("This is a simple text email.\n\nBest regards,\nThe Mail Bot")
        .attach("notes.txt", "text/plain", "attached notes")
        .build();

    println!("Sending email...");
    match client.send(email).await {
        Ok(result) => {
            println!("Email sent successfully!");
            println!("  Message ID: {}", result.message_id);
            println!("  Recipients: {}", result.recipients.join(", "));
            println!("  Server: {}", result.response);
        }
        Err(e) => {
            eprintln!("Failed to send email: {}", e);
            return Err(e);
        }
    }

    Ok(())
}
