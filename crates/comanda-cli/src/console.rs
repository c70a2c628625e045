//! Channel that prints replies to a terminal

use std::io::Write;

use async_trait::async_trait;
use comanda_agent::Channel;
use parking_lot::Mutex;

/// Writes each reply as `[user_id] text`
pub struct ConsoleChannel<W: Write + Send> {
    out: Mutex<W>,
}

impl ConsoleChannel<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleChannel<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W: Write + Send> Channel for ConsoleChannel<W> {
    async fn send(&self, user_id: &str, text: &str) -> bool {
        let mut out = self.out.lock();
        let written = writeln!(out, "[{}] {}", user_id, text).and_then(|_| out.flush());
        if let Err(e) = written {
            tracing::warn!(user_id = %user_id, "Failed to write reply: {}", e);
            return false;
        }
        true
    }

    async fn typing_indicator(&self, user_id: &str) {
        tracing::debug!(user_id = %user_id, "typing...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_prefixes_user() {
        let channel = ConsoleChannel::new(Vec::new());
        assert!(channel.send("5511999", "Olá!").await);
        assert!(channel.send("5511999", "Anything else?").await);
        let out = String::from_utf8(channel.into_inner()).unwrap();
        assert_eq!(out, "[5511999] Olá!\n[5511999] Anything else?\n");
    }
}
