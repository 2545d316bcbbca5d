//! Just enough of the SSH agent protocol to proxy and vet requests.
//!
//! Every message is a big-endian `u32` length followed by that many bytes;
//! the first body byte is the message type.  Bodies are passed through to
//! the upstream agent untouched.  Only sign requests are looked into, to
//! show the user which key is about to be used.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};

use crate::error::PolicyError;

/// Largest message accepted in either direction.
pub const MAX_FRAME_LEN: usize = 256 * 1024;

pub const SSH_AGENT_FAILURE: u8 = 5;
pub const SSH_AGENTC_REQUEST_IDENTITIES: u8 = 11;
pub const SSH_AGENTC_SIGN_REQUEST: u8 = 13;

/// Body of a bare failure reply.
pub const FAILURE: [u8; 1] = [SSH_AGENT_FAILURE];

/// Read one message body.  `Ok(None)` when the peer closed the stream
/// between messages.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, PolicyError>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 4];
    let mut filled = 0;
    while filled < len.len() {
        match reader.read(&mut len[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => return Err(PolicyError::Malformed("truncated length header")),
            n => filled += n,
        }
    }
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_FRAME_LEN {
        return Err(PolicyError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), PolicyError>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_LEN {
        return Err(PolicyError::FrameTooLarge(body.len()));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// What the user is shown about the key a sign request wants to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    /// Key type, e.g. `ssh-ed25519`.
    pub algorithm: String,
    /// OpenSSH style: `SHA256:` + unpadded base64 of the blob digest.
    pub fingerprint: String,
}

impl KeyInfo {
    pub fn from_blob(blob: &[u8]) -> Result<Self, PolicyError> {
        let mut reader = Reader::new(blob);
        let algorithm = String::from_utf8_lossy(reader.string()?).into_owned();
        Ok(Self {
            algorithm,
            fingerprint: fingerprint(blob),
        })
    }
}

impl std::fmt::Display for KeyInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.algorithm, self.fingerprint)
    }
}

pub fn fingerprint(blob: &[u8]) -> String {
    format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(blob)))
}

/// Pull the key out of a `SSH_AGENTC_SIGN_REQUEST` body.
///
/// Layout: `byte 13 | string key_blob | string data | uint32 flags`.
pub fn sign_request_key(body: &[u8]) -> Result<KeyInfo, PolicyError> {
    let mut reader = Reader::new(body);
    if reader.byte()? != SSH_AGENTC_SIGN_REQUEST {
        return Err(PolicyError::Malformed("not a sign request"));
    }
    let blob = reader.string()?;
    reader.string()?;
    reader.u32()?;
    KeyInfo::from_blob(blob)
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PolicyError> {
        if self.buf.len() < n {
            return Err(PolicyError::Malformed("truncated field"));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn byte(&mut self) -> Result<u8, PolicyError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, PolicyError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn string(&mut self) -> Result<&'a [u8], PolicyError> {
        let len = self.u32()? as usize;
        self.take(len)
    }
}
