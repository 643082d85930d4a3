//! HTTP agent construction, bounded response reads and retry with backoff.

use std::io::{self, Read};
use std::time::Duration;

use crate::config::{BackendSettings, RetrySettings};

const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry settings for network operations with exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RetryConfig {
    /// Maximum number of attempts, including the first try.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl From<RetrySettings> for RetryConfig {
    fn from(settings: RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

/// Build an agent with the configured timeouts.
pub(crate) fn agent(settings: &BackendSettings) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(settings.connect_timeout())
        .timeout_read(settings.read_timeout())
        .timeout_write(WRITE_TIMEOUT)
        .build()
}

/// Retry an operation with bounded exponential backoff when the predicate allows it.
pub(crate) fn retry_with_backoff<T, E, F, R>(
    config: RetryConfig,
    mut action: F,
    mut should_retry: R,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    R: FnMut(&E) -> bool,
{
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        match action() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= config.max_attempts || !should_retry(&err) {
                    return Err(err);
                }
                let delay = backoff_delay(config.base_delay, config.max_delay, attempt);
                tracing::debug!(attempt, ?delay, "Retrying backend request");
                std::thread::sleep(delay);
            }
        }
    }
}

/// Read a response into memory, enforcing a maximum byte size.
pub(crate) fn read_response_bytes(
    response: ureq::Response,
    max_bytes: usize,
) -> Result<Vec<u8>, io::Error> {
    check_content_length(&response, max_bytes)?;
    let reader = response.into_reader();
    let mut limited = reader.take(max_bytes as u64 + 1);
    let mut bytes = Vec::new();
    limited.read_to_end(&mut bytes)?;
    if bytes.len() > max_bytes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Response exceeded {max_bytes} bytes"),
        ));
    }
    Ok(bytes)
}

fn check_content_length(response: &ureq::Response, max_bytes: usize) -> Result<(), io::Error> {
    let Some(length) = response.header("Content-Length") else {
        return Ok(());
    };
    let Ok(length) = length.parse::<u64>() else {
        return Ok(());
    };
    if length > max_bytes as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Response too large: {length} bytes"),
        ));
    }
    Ok(())
}

fn backoff_delay(base: Duration, max: Duration, attempt: usize) -> Duration {
    let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    fn serve_once(response: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{}", addr)
    }

    fn test_agent() -> ureq::Agent {
        agent(&BackendSettings::default())
    }

    fn instant_retries(max_attempts: usize) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
        }
    }

    #[test]
    fn read_response_bytes_rejects_content_length_over_max() {
        let response = concat!(
            "HTTP/1.1 200 OK\r\n",
            "Content-Length: 100\r\n",
            "\r\n",
            "ok"
        )
        .to_string();
        let url = serve_once(response);
        let response = test_agent().get(&url).call().unwrap();
        let err = read_response_bytes(response, 10).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn read_response_bytes_rejects_body_over_max() {
        let body = "a".repeat(32);
        let url = serve_once(format!("HTTP/1.0 200 OK\r\n\r\n{body}"));
        let response = test_agent().get(&url).call().unwrap();
        let err = read_response_bytes(response, 16).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn read_response_bytes_accepts_under_limit() {
        let body = "[1,2]";
        let url = serve_once(format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        ));
        let response = test_agent().get(&url).call().unwrap();
        assert_eq!(read_response_bytes(response, 16).unwrap(), body.as_bytes());
    }

    #[test]
    fn retry_with_backoff_stops_after_success() {
        let mut attempts = 0usize;
        let result: Result<u32, &'static str> = retry_with_backoff(
            instant_retries(4),
            || {
                attempts += 1;
                if attempts < 3 { Err("fail") } else { Ok(7) }
            },
            |_| true,
        );
        assert_eq!(result, Ok(7));
        assert_eq!(attempts, 3);
    }

    #[test]
    fn retry_with_backoff_honors_should_retry() {
        let mut attempts = 0usize;
        let result: Result<u32, &'static str> = retry_with_backoff(
            instant_retries(3),
            || {
                attempts += 1;
                Err("fail")
            },
            |_| false,
        );
        assert_eq!(result, Err("fail"));
        assert_eq!(attempts, 1);
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(350);
        assert_eq!(backoff_delay(base, max, 1), base);
        assert_eq!(backoff_delay(base, max, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, max, 3), max);
        assert_eq!(backoff_delay(base, max, 64), max);
    }

    #[test]
    fn retry_settings_convert_with_at_least_one_attempt() {
        let config = RetryConfig::from(RetrySettings {
            max_attempts: 0,
            base_delay_ms: 5,
            max_delay_ms: 10,
        });
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.max_delay, Duration::from_millis(10));
    }
}
