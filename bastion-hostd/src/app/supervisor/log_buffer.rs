use crate::domain::supervisor::{LogLevel, LogLine, LogStream};
use crate::ports::supervisor::OutputSink;
use crate::stream::{StreamPublisher, Subscription};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{error, info, warn};

pub const BACKEND_LOG_TARGET: &str = "bastion::backend";

/// Keeps the full recent backend output and forwards the interesting lines
/// to the daemon log.
pub struct BackendLogBuffer {
    lines: Mutex<VecDeque<LogLine>>,
    capacity: usize,
    stream: StreamPublisher<LogLine>,
}

impl BackendLogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            stream: StreamPublisher::default(),
        }
    }

    pub fn subscribe(&self) -> Subscription<LogLine> {
        self.stream.subscribe()
    }

    /// Most recent `limit` lines, oldest first.
    pub fn tail(&self, limit: usize) -> Vec<LogLine> {
        let lines = self.lines.lock();
        let skip = lines.len().saturating_sub(limit);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn tail_text(&self, limit: usize) -> Vec<String> {
        self.tail(limit)
            .into_iter()
            .map(|line| {
                let stream = match line.stream {
                    LogStream::Stdout => "out",
                    LogStream::Stderr => "err",
                };
                format!("[{stream}] {}", line.text)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

impl OutputSink for BackendLogBuffer {
    fn push(&self, line: LogLine) {
        match line.level {
            LogLevel::Error => {
                error!(target: BACKEND_LOG_TARGET, stream = ?line.stream, "{}", line.text)
            }
            LogLevel::Warn => {
                warn!(target: BACKEND_LOG_TARGET, stream = ?line.stream, "{}", line.text)
            }
            LogLevel::Lifecycle => info!(target: BACKEND_LOG_TARGET, "{}", line.text),
            LogLevel::Info | LogLevel::Debug => {}
        }
        {
            let mut lines = self.lines.lock();
            if lines.len() == self.capacity {
                lines.pop_front();
            }
            lines.push_back(line.clone());
        }
        self.stream.publish(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest_lines() {
        let buffer = BackendLogBuffer::new(3);
        for i in 0..5 {
            buffer.push(LogLine::new(LogStream::Stdout, format!("line {i}")));
        }
        assert_eq!(buffer.len(), 3);
        let tail = buffer.tail_text(2);
        assert_eq!(tail, vec!["[out] line 3".to_string(), "[out] line 4".to_string()]);
        assert_eq!(buffer.tail(10).len(), 3);
    }

    #[tokio::test]
    async fn publishes_every_line() {
        let buffer = BackendLogBuffer::new(10);
        let mut subscription = buffer.subscribe();
        buffer.push(LogLine::new(LogStream::Stderr, "Traceback (most recent call last)"));
        let line = subscription.recv().await.unwrap();
        assert_eq!(line.level, LogLevel::Error);
        assert_eq!(line.stream, LogStream::Stderr);
    }
}
