//! Line-oriented console adapter
//!
//! Each input line becomes a direct message in a single chat; replies are
//! written back one per line.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use switchboard_core::channel::ChannelAdapter;
use switchboard_core::types::{InboundMessage, OutboundMessage, SentMessage};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const CONSOLE_CHANNEL: &str = "console";
const CONSOLE_CHAT: &str = "console";

type Input = Box<dyn AsyncBufRead + Send + Unpin>;
type Output = Box<dyn AsyncWrite + Send + Unpin>;

/// Reads chat input from stdin and prints replies to stdout
pub struct ConsoleChannel {
    user: String,
    input: Mutex<Option<Input>>,
    output: Arc<tokio::sync::Mutex<Output>>,
    cancel: CancellationToken,
}

impl ConsoleChannel {
    pub fn new(user: impl Into<String>) -> Self {
        Self::with_io(
            user,
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
    }

    pub fn with_io<R, W>(user: impl Into<String>, input: R, output: W) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            user: user.into(),
            input: Mutex::new(Some(Box::new(input))),
            output: Arc::new(tokio::sync::Mutex::new(Box::new(output))),
            cancel: CancellationToken::new(),
        }
    }

    async fn write_line(&self, text: &str) -> Result<()> {
        let mut out = self.output.lock().await;
        out.write_all(text.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for ConsoleChannel {
    fn channel(&self) -> &str {
        CONSOLE_CHANNEL
    }

    async fn start(&self, tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        let input = self
            .input
            .lock()
            .map_err(|_| anyhow!("console input lock poisoned"))?
            .take()
            .ok_or_else(|| anyhow!("console adapter already started"))?;
        let user = self.user.clone();
        let cancel = self.cancel.clone();
        info!("Starting console channel adapter");

        tokio::spawn(async move {
            let mut lines = input.lines();
            let mut count: u64 = 0;
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => break,
                    line = lines.next_line() => line,
                };
                let text = match line {
                    Ok(Some(text)) => text,
                    Ok(None) => {
                        debug!("Console input closed");
                        break;
                    }
                    Err(e) => {
                        warn!("Console read failed: {}", e);
                        break;
                    }
                };
                if text.trim().is_empty() {
                    continue;
                }
                count += 1;
                let mut msg = InboundMessage::direct(CONSOLE_CHANNEL, CONSOLE_CHAT, &user, text);
                msg.user_name = Some(user.clone());
                msg.message_id = Some(format!("in-{}", count));
                if tx.send(msg).await.is_err() {
                    debug!("Gateway closed, console reader exiting");
                    break;
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }

    async fn send_message(&self, msg: OutboundMessage) -> Result<SentMessage> {
        self.write_line(&msg.text).await?;
        Ok(SentMessage {
            message_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    async fn edit_message(&self, _chat_id: &str, _message_id: &str, _text: &str) -> Result<()> {
        Err(anyhow!("console output cannot be edited"))
    }

    async fn send_typing_indicator(&self, _chat_id: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_lines_become_messages() {
        let input: &'static [u8] = b"hello\n\n  \nsecond line\n";
        let (out, _read) = tokio::io::duplex(64);
        let console = ConsoleChannel::with_io("ada", input, out);
        let (tx, mut rx) = mpsc::channel(8);
        console.start(tx).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.channel, "console");
        assert_eq!(first.chat_id, "console");
        assert_eq!(first.user_id, "ada");
        assert_eq!(first.text, "hello");
        assert!(!first.is_group);
        assert_eq!(rx.recv().await.unwrap().text, "second line");
        // input exhausted, reader exits and drops its sender
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (out, _read) = tokio::io::duplex(64);
        let console = ConsoleChannel::with_io("ada", &b""[..], out);
        let (tx, _rx) = mpsc::channel(8);
        console.start(tx.clone()).await.unwrap();
        assert!(console.start(tx).await.is_err());
    }

    #[tokio::test]
    async fn test_replies_written_per_line() {
        let (out, mut read) = tokio::io::duplex(64);
        let console = ConsoleChannel::with_io("ada", &b""[..], out);
        console
            .send_message(OutboundMessage::new("console", "hi there"))
            .await
            .unwrap();
        let mut buf = vec![0u8; 9];
        read.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, b"hi there\n");
        assert!(!console.supports_editing());
    }
}
