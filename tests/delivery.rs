//! End-to-end delivery against a scripted in-process SMTP server.

use std::collections::VecDeque;
use std::time::Duration;

use futures::future;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use integrations_mailsender::{
    AuthMethod, Email, Mailsender, SmtpClient, SmtpConfig, SmtpErrorKind,
};

/// What the server saw during one session.
#[derive(Debug, Default)]
struct Transcript {
    commands: Vec<String>,
    data: String,
}

impl Transcript {
    fn verbs(&self) -> Vec<String> {
        self.commands
            .iter()
            .map(|c| c.split([' ', ':']).next().unwrap_or_default().to_uppercase())
            .collect()
    }
}

/// Server replies that differ from the happy path.
#[derive(Debug, Clone)]
struct Script {
    auth: Vec<&'static str>,
    rcpt: &'static str,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            auth: vec!["235 2.7.0 Authentication successful"],
            rcpt: "250 2.1.5 OK",
        }
    }
}

async fn start_server(script: Script) -> (SmtpConfig, JoinHandle<Transcript>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);
        let mut transcript = Transcript::default();
        let mut auth: VecDeque<&str> = script.auth.into_iter().collect();
        let mut in_sasl = false;

        write.write_all(b"220 localhost ESMTP test\r\n").await.unwrap();

        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            let line = line.trim_end().to_string();
            transcript.commands.push(line.clone());

            let verb = line
                .split([' ', ':'])
                .next()
                .unwrap_or_default()
                .to_uppercase();
            let reply = if in_sasl {
                // Answer to a 334 challenge
                match line.as_str() {
                    "*" => "501 5.7.0 Authentication cancelled".to_string(),
                    _ => auth.pop_front().unwrap_or("535 5.7.8 no").to_string(),
                }
            } else {
                match verb.as_str() {
                    "EHLO" => "250-localhost\r\n250-AUTH PLAIN LOGIN\r\n250 8BITMIME".to_string(),
                    "AUTH" => auth.pop_front().unwrap_or("535 5.7.8 no").to_string(),
                    "MAIL" => "250 2.1.0 OK".to_string(),
                    "RCPT" => script.rcpt.to_string(),
                    "DATA" => {
                        write
                            .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                            .await
                            .unwrap();
                        loop {
                            let mut chunk = String::new();
                            reader.read_line(&mut chunk).await.unwrap();
                            if chunk == ".\r\n" || chunk.is_empty() {
                                break;
                            }
                            transcript.data.push_str(&chunk);
                        }
                        "250 2.0.0 queued as 42".to_string()
                    }
                    "QUIT" => {
                        write.write_all(b"221 2.0.0 Bye\r\n").await.unwrap();
                        break;
                    }
                    _ => "502 5.5.2 Command not recognized".to_string(),
                }
            };
            in_sasl = reply.starts_with("334");
            write.write_all(format!("{}\r\n", reply).as_bytes()).await.unwrap();
        }

        transcript
    });

    let config = Mailsender::new()
        .smtp_client()
        .host(format!("127.0.0.1:{}", port))
        .login("login@localhost")
        .password("password")
        .tls(false)
        .command_timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    (config, handle)
}

fn email() -> Email {
    Mailsender::new()
        .email()
        .to(["test@localhost"])
        .subject("subj")
        .text("text")
        .attach("test.txt", "text/plain", "data")
        .build()
}

#[tokio::test]
async fn test_send_with_plain_auth() {
    let (config, server) = start_server(Script::default()).await;
    let client = SmtpClient::new(config);

    let (transcript, result) = future::join(server, client.send(email())).await;
    let transcript = transcript.unwrap();
    let result = result.unwrap();

    assert_eq!(
        transcript.verbs(),
        vec!["EHLO", "AUTH", "MAIL", "RCPT", "DATA", "QUIT"]
    );
    assert_eq!(transcript.commands[0], "EHLO localhost");
    assert_eq!(
        transcript.commands[1],
        "AUTH PLAIN AGxvZ2luQGxvY2FsaG9zdABwYXNzd29yZA=="
    );
    assert_eq!(transcript.commands[2], "MAIL FROM:<login@localhost>");
    assert_eq!(transcript.commands[3], "RCPT TO:<test@localhost>");

    assert!(transcript.data.contains("From: <login@localhost>\r\n"));
    assert!(transcript.data.contains("To: <test@localhost>\r\n"));
    assert!(transcript.data.contains("Subject: subj\r\n"));
    assert!(transcript.data.contains("filename=\"test.txt\""));
    assert!(transcript.data.contains("ZGF0YQ=="));

    assert_eq!(result.sender, "login@localhost");
    assert_eq!(result.recipients, vec!["test@localhost"]);
    assert!(result.response.contains("queued as 42"));
    assert!(transcript
        .data
        .contains(&format!("Message-ID: <{}>", result.message_id)));

    let metrics = client.metrics().snapshot();
    assert_eq!(metrics.emails_sent, 1);
    assert_eq!(metrics.connections_successful, 1);
}

#[tokio::test]
async fn test_need_recipient_never_connects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = SmtpConfig::builder()
        .host(format!("127.0.0.1:{}", port))
        .login("login@localhost")
        .password("password")
        .build()
        .unwrap();

    let mut email = email();
    email.to.clear();

    let err = SmtpClient::new(config).send(email).await.unwrap_err();
    assert_eq!(err.kind(), SmtpErrorKind::NeedRecipient);

    let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(accepted.is_err(), "client must not connect");
}

#[tokio::test]
async fn test_login_auth_and_file_attachment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.csv");
    tokio::fs::write(&path, "a,b\n1,2\n").await.unwrap();

    let script = Script {
        auth: vec![
            "334 VXNlcm5hbWU6",
            "334 UGFzc3dvcmQ6",
            "235 2.7.0 Authentication successful",
        ],
        ..Script::default()
    };
    let (mut config, server) = start_server(script).await;
    config.auth_method = AuthMethod::Login;

    let email = Mailsender::new()
        .email()
        .from("Reporter <reports@localhost>")
        .to(["test@localhost"])
        .blind_carbon_copy(["audit@localhost"])
        .subject("report")
        .attach_from_file(&path)
        .build();

    let client = SmtpClient::new(config);
    let (transcript, result) = future::join(server, client.send(email)).await;
    let transcript = transcript.unwrap();
    let result = result.unwrap();

    assert_eq!(
        &transcript.commands[1..6],
        &[
            "AUTH LOGIN",
            "bG9naW5AbG9jYWxob3N0",
            "cGFzc3dvcmQ=",
            "MAIL FROM:<reports@localhost>",
            "RCPT TO:<test@localhost>",
        ]
    );
    assert_eq!(transcript.commands[6], "RCPT TO:<audit@localhost>");
    assert_eq!(result.recipients, vec!["test@localhost", "audit@localhost"]);

    assert!(!transcript.data.contains("audit@localhost"));
    assert!(transcript.data.contains("Content-Type: text/csv; name=\"report.csv\""));
}

#[tokio::test]
async fn test_rejected_recipient_still_quits() {
    let script = Script {
        rcpt: "550 5.1.1 No such user",
        ..Script::default()
    };
    let (config, server) = start_server(script).await;
    let client = SmtpClient::new(config);

    let (transcript, result) = future::join(server, client.send(email())).await;
    let transcript = transcript.unwrap();
    let err = result.unwrap_err();

    assert_eq!(err.kind(), SmtpErrorKind::RecipientRejected);
    assert_eq!(err.smtp_code(), Some(550));
    assert_eq!(transcript.verbs(), vec!["EHLO", "AUTH", "MAIL", "RCPT", "QUIT"]);
    assert_eq!(client.metrics().snapshot().emails_failed, 1);
}

#[tokio::test]
async fn test_bad_credentials() {
    let script = Script {
        auth: vec!["535 5.7.8 Authentication credentials invalid"],
        ..Script::default()
    };
    let (config, server) = start_server(script).await;
    let client = SmtpClient::new(config);

    let (transcript, result) = future::join(server, client.send(email())).await;

    assert_eq!(result.unwrap_err().kind(), SmtpErrorKind::CredentialsInvalid);
    assert_eq!(transcript.unwrap().verbs(), vec!["EHLO", "AUTH", "QUIT"]);
}
