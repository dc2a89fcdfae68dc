//! Turns the character stream of a keyboard-wedge reader into whole tokens.
//!
//! A token is complete when a terminator arrives or when the reader has been
//! quiet for the configured interval.

use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

const TERMINATORS: [char; 3] = ['\n', '\r', '\t'];

#[derive(Debug)]
pub struct TokenAssembler {
    buffer: String,
    last_input: Option<Instant>,
    quiet_period: Duration,
}

impl TokenAssembler {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            buffer: String::new(),
            last_input: None,
            quiet_period,
        }
    }

    /// Feeds one character. Returns a token when `ch` terminates one.
    pub fn push(&mut self, ch: char, now: Instant) -> Option<String> {
        if TERMINATORS.contains(&ch) {
            return self.take();
        }
        self.buffer.push(ch);
        self.last_input = Some(now);
        None
    }

    /// Instant at which the buffered characters count as a complete token.
    pub fn quiet_deadline(&self) -> Option<Instant> {
        if self.buffer.is_empty() {
            return None;
        }
        self.last_input.map(|t| t + self.quiet_period)
    }

    /// Emits the buffered token if the quiet period has elapsed.
    pub fn poll_quiet(&mut self, now: Instant) -> Option<String> {
        match self.quiet_deadline() {
            Some(deadline) if now >= deadline => self.take(),
            _ => None,
        }
    }

    /// Emits whatever is buffered regardless of timing.
    pub fn take(&mut self) -> Option<String> {
        self.last_input = None;
        let token = std::mem::take(&mut self.buffer);
        (!token.trim().is_empty()).then_some(token)
    }
}

/// Reads characters from `chars` and forwards completed tokens to `tokens`.
///
/// Ends when either side closes; a partial token is flushed when the input
/// side closes.
pub async fn pump_tokens(
    mut chars: mpsc::Receiver<char>,
    tokens: mpsc::Sender<String>,
    quiet_period: Duration,
) {
    let mut assembler = TokenAssembler::new(quiet_period);

    loop {
        let deadline = assembler.quiet_deadline();
        let quiet = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        let token = tokio::select! {
            maybe = chars.recv() => match maybe {
                Some(ch) => assembler.push(ch, Instant::now()),
                None => {
                    if let Some(tail) = assembler.take() {
                        let _ = tokens.send(tail).await;
                    }
                    return;
                }
            },
            _ = quiet => assembler.poll_quiet(Instant::now()),
        };

        if let Some(token) = token {
            if tokens.send(token).await.is_err() {
                tracing::debug!("token receiver closed; stopping scan pump");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminator_completes_token() {
        let now = Instant::now();
        let mut a = TokenAssembler::new(Duration::from_millis(100));
        for ch in "0012345".chars() {
            assert!(a.push(ch, now).is_none());
        }
        assert_eq!(a.push('\n', now).as_deref(), Some("0012345"));
        assert!(a.quiet_deadline().is_none());
    }

    #[test]
    fn bare_terminators_produce_nothing() {
        let now = Instant::now();
        let mut a = TokenAssembler::new(Duration::from_millis(100));
        assert!(a.push('\r', now).is_none());
        assert!(a.push(' ', now).is_none());
        assert!(a.push('\n', now).is_none());
    }

    #[test]
    fn quiet_period_completes_token() {
        let start = Instant::now();
        let mut a = TokenAssembler::new(Duration::from_millis(100));
        a.push('4', start);
        a.push('2', start + Duration::from_millis(30));
        assert!(a.poll_quiet(start + Duration::from_millis(100)).is_none());
        assert_eq!(
            a.poll_quiet(start + Duration::from_millis(130)).as_deref(),
            Some("42")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pump_splits_on_silence_and_terminators() {
        let (char_tx, char_rx) = mpsc::channel(64);
        let (tok_tx, mut tok_rx) = mpsc::channel(8);
        let pump = tokio::spawn(pump_tokens(char_rx, tok_tx, Duration::from_millis(100)));

        for ch in "111\n22".chars() {
            char_tx.send(ch).await.unwrap();
        }
        assert_eq!(tok_rx.recv().await.as_deref(), Some("111"));

        // "22" completes only after the reader goes quiet.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(tok_rx.recv().await.as_deref(), Some("22"));

        char_tx.send('3').await.unwrap();
        drop(char_tx);
        assert_eq!(tok_rx.recv().await.as_deref(), Some("3"));
        pump.await.unwrap();
    }
}
