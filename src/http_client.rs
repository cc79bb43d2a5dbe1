//! HTTP agent construction and bounded response helpers shared by the services.
//!
//! Every request runs with a single caller-supplied timeout. There is no retry
//! or backoff: a failed request is reported once and the caller decides.

use std::io::{self, Read};
use std::time::Duration;

use thiserror::Error;

/// Largest response body accepted from a query endpoint (HTML or XML).
pub(crate) const MAX_TEXT_BYTES: usize = 16 * 1024 * 1024;
/// Largest downloaded result file (FITS images, TAP tables).
pub(crate) const MAX_DOWNLOAD_BYTES: usize = 1024 * 1024 * 1024;

const USER_AGENT: &str = concat!("astrobase/", env!("CARGO_PKG_VERSION"));

/// Failure of a single HTTP exchange.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The server answered with an error status.
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    /// No answer arrived within the configured timeout.
    #[error("Request to {url} did not complete within {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    /// Connection, DNS, TLS or protocol failure.
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },
    /// The body could not be read or exceeded its size limit.
    #[error("Failed to read response body from {url}: {source}")]
    Body { url: String, source: io::Error },
}

impl HttpError {
    /// Whether the failure was a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub(crate) fn from_ureq(url: &str, timeout: Duration, err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, _) => Self::Status {
                url: url.to_string(),
                status,
            },
            ureq::Error::Transport(transport) => {
                if transport_timed_out(&transport) {
                    Self::Timeout {
                        url: url.to_string(),
                        timeout,
                    }
                } else {
                    Self::Transport {
                        url: url.to_string(),
                        message: transport.to_string(),
                    }
                }
            }
        }
    }
}

/// Build an agent whose connect, read and write phases share one timeout.
pub(crate) fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout_read(timeout)
        .timeout_write(timeout)
        .user_agent(USER_AGENT)
        .build()
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

/// Read a response as (lossy) UTF-8 text, enforcing a maximum byte size.
pub(crate) fn read_response_text(
    response: ureq::Response,
    max_bytes: usize,
) -> Result<String, io::Error> {
    let bytes = read_response_bytes(response, max_bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
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

fn transport_timed_out(transport: &ureq::Transport) -> bool {
    let mut source = std::error::Error::source(transport);
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ) {
                return true;
            }
        }
        source = err.source();
    }
    transport.to_string().contains("timed out")
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
        agent(Duration::from_secs(5))
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
    fn read_response_text_accepts_under_limit() {
        let body = "skv123456789.fits";
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let url = serve_once(response);
        let response = test_agent().get(&url).call().unwrap();
        let text = read_response_text(response, 64).unwrap();
        assert_eq!(text, body);
    }

    #[test]
    fn status_errors_keep_the_code() {
        let url = serve_once("HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n".into());
        let err = test_agent().get(&url).call().unwrap_err();
        let err = HttpError::from_ureq(&url, Duration::from_secs(5), err);
        assert!(matches!(err, HttpError::Status { status: 503, .. }));
        assert!(!err.is_timeout());
    }

    #[test]
    fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let accepted = listener.accept();
            thread::sleep(Duration::from_millis(600));
            drop(accepted);
        });
        let url = format!("http://{addr}");
        let timeout = Duration::from_millis(150);
        let err = agent(timeout).get(&url).call().unwrap_err();
        let err = HttpError::from_ureq(&url, timeout, err);
        assert!(err.is_timeout(), "unexpected error: {err}");
        handle.join().unwrap();
    }
}
