// src/routers/mikrotik_api.rs
//! Minimal RouterOS API client: length-prefixed words grouped into
//! sentences, plain /login (post-6.43), and !re/!done/!trap replies.

use std::collections::HashMap;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::debug;

use crate::error::BillingError;

pub struct RouterOsClient {
    stream: TcpStream,
    target: String,
    op_timeout: Duration,
}

impl RouterOsClient {
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        op_timeout_ms: u64,
    ) -> Result<Self, BillingError> {
        let target = format!("{}:{}", host, port);
        let op_timeout = Duration::from_millis(op_timeout_ms);

        let stream = timeout(op_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| BillingError::ProtocolTimeout {
                target: target.clone(),
                timeout_ms: op_timeout_ms,
            })?
            .map_err(|e| BillingError::DeviceUnreachable {
                target: format!("{}: {}", target, e),
            })?;

        let mut client = Self {
            stream,
            target,
            op_timeout,
        };

        client
            .run(
                "/login",
                &[("name", username), ("password", password)],
            )
            .await?;

        debug!("RouterOS API login ok: {}", client.target);
        Ok(client)
    }

    /// Run one command and collect every `!re` reply as a key/value map.
    pub async fn run(
        &mut self,
        command: &str,
        args: &[(&str, &str)],
    ) -> Result<Vec<HashMap<String, String>>, BillingError> {
        let mut words: Vec<String> = vec![command.to_string()];
        for (key, value) in args {
            words.push(format!("={}={}", key, value));
        }

        timeout(self.op_timeout, self.exchange(&words))
            .await
            .map_err(|_| BillingError::ProtocolTimeout {
                target: self.target.clone(),
                timeout_ms: self.op_timeout.as_millis() as u64,
            })?
    }

    async fn exchange(
        &mut self,
        words: &[String],
    ) -> Result<Vec<HashMap<String, String>>, BillingError> {
        self.write_sentence(words).await?;

        let mut replies = Vec::new();
        loop {
            let sentence = self.read_sentence().await?;
            let head = match sentence.first() {
                Some(w) => w.as_str(),
                None => continue,
            };

            match head {
                "!re" => replies.push(parse_attributes(&sentence[1..])),
                "!done" => return Ok(replies),
                "!trap" | "!fatal" => {
                    let attrs = parse_attributes(&sentence[1..]);
                    let message = attrs
                        .get("message")
                        .cloned()
                        .unwrap_or_else(|| "unspecified trap".to_string());
                    return Err(if message.to_lowercase().contains("permission")
                        || message.to_lowercase().contains("not have")
                    {
                        BillingError::PermissionDenied {
                            target: self.target.clone(),
                            detail: message,
                        }
                    } else {
                        BillingError::DeviceUnreachable {
                            target: format!("{}: {}", self.target, message),
                        }
                    });
                }
                _ => debug!("Ignoring RouterOS reply word {}", head),
            }
        }
    }

    async fn write_sentence(&mut self, words: &[String]) -> Result<(), BillingError> {
        let mut buf = Vec::new();
        for word in words {
            encode_length(word.len(), &mut buf);
            buf.extend_from_slice(word.as_bytes());
        }
        buf.push(0); // end of sentence

        self.stream.write_all(&buf).await.map_err(|e| {
            BillingError::DeviceUnreachable {
                target: format!("{}: {}", self.target, e),
            }
        })
    }

    async fn read_sentence(&mut self) -> Result<Vec<String>, BillingError> {
        let mut words = Vec::new();
        loop {
            let len = self.read_length().await?;
            if len == 0 {
                return Ok(words);
            }
            let mut word = vec![0u8; len];
            self.read_exact(&mut word).await?;
            words.push(String::from_utf8_lossy(&word).into_owned());
        }
    }

    async fn read_length(&mut self) -> Result<usize, BillingError> {
        let mut first = [0u8; 1];
        self.read_exact(&mut first).await?;
        let b = first[0] as usize;

        let (extra, base) = match b {
            0x00..=0x7F => return Ok(b),
            0x80..=0xBF => (1, b & 0x3F),
            0xC0..=0xDF => (2, b & 0x1F),
            0xE0..=0xEF => (3, b & 0x0F),
            _ => {
                return Err(BillingError::InvalidRequest(
                    "unsupported RouterOS length prefix".to_string(),
                ))
            }
        };

        let mut len = base;
        let mut rest = vec![0u8; extra];
        self.read_exact(&mut rest).await?;
        for byte in rest {
            len = (len << 8) | byte as usize;
        }
        Ok(len)
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), BillingError> {
        self.stream.read_exact(buf).await.map(|_| ()).map_err(|e| {
            BillingError::DeviceUnreachable {
                target: format!("{}: {}", self.target, e),
            }
        })
    }
}

fn encode_length(len: usize, buf: &mut Vec<u8>) {
    if len < 0x80 {
        buf.push(len as u8);
    } else if len < 0x4000 {
        buf.extend_from_slice(&((len as u32 | 0x8000) as u16).to_be_bytes());
    } else if len < 0x20_0000 {
        let v = len as u32 | 0xC0_0000;
        buf.extend_from_slice(&v.to_be_bytes()[1..]);
    } else {
        let v = len as u32 | 0xE000_0000;
        buf.extend_from_slice(&v.to_be_bytes());
    }
}

fn parse_attributes(words: &[String]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for word in words {
        if let Some(rest) = word.strip_prefix('=') {
            if let Some((key, value)) = rest.split_once('=') {
                map.insert(key.to_string(), value.to_string());
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_length_single_byte() {
        let mut buf = Vec::new();
        encode_length(0x42, &mut buf);
        assert_eq!(buf, vec![0x42]);
    }

    #[test]
    fn test_encode_length_two_bytes() {
        let mut buf = Vec::new();
        encode_length(0x200, &mut buf);
        assert_eq!(buf, vec![0x82, 0x00]);
    }

    #[test]
    fn test_parse_attributes() {
        let words = vec![
            "=address=10.0.0.1".to_string(),
            "=service=ppp,hotspot".to_string(),
            ".tag=1".to_string(),
        ];
        let map = parse_attributes(&words);
        assert_eq!(map.get("address").unwrap(), "10.0.0.1");
        assert_eq!(map.get("service").unwrap(), "ppp,hotspot");
        assert_eq!(map.len(), 2);
    }
}
