//! Wire format for the query server.
//!
//! Every message is one frame: a little-endian `u32` byte length followed by
//! that many bytes of UTF-8 JSON. A connection carries any number of
//! request/response pairs, strictly alternating.

use std::io::{Read, Write};
use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;
use crate::matcher::{MatchQuery, MatchResult, MatchTier};
use crate::record::FaceRecord;

pub const PROTOCOL_VERSION: u32 = 1;

/// Frames above this size are rejected before their payload is read.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub version: u32,
    pub family: String,
    #[serde(default)]
    pub bold: Option<bool>,
    #[serde(default)]
    pub italic: Option<bool>,
}

impl QueryRequest {
    pub fn new(query: &MatchQuery) -> Self {
        let style = query.style();
        Self {
            version: PROTOCOL_VERSION,
            family: query.family().to_string(),
            bold: style.bold,
            italic: style.italic,
        }
    }

    /// Validate and turn into a matcher query. A blank family is a valid
    /// request; the matcher answers it with not-found.
    pub fn into_query(self) -> Result<MatchQuery, ProtocolError> {
        if self.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }
        Ok(MatchQuery::new(self.family)
            .bold(self.bold)
            .italic(self.italic))
    }
}

/// The subset of a [`FaceRecord`] a renderer needs to load the face.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceSummary {
    pub path: PathBuf,
    pub index: u32,
    pub full_name: String,
    pub postscript_name: String,
    pub win32_family_name: String,
    pub weight: u16,
    pub italic: bool,
}

impl From<&FaceRecord> for FaceSummary {
    fn from(face: &FaceRecord) -> Self {
        Self {
            path: face.source_file_path.clone(),
            index: face.face_index,
            full_name: face.full_name.clone(),
            postscript_name: face.postscript_name.clone(),
            win32_family_name: face.win32_family_name.clone(),
            weight: face.weight,
            italic: face.italic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ResponseBody {
    Found { tier: MatchTier, face: FaceSummary },
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub version: u32,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl QueryResponse {
    pub fn not_found() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            body: ResponseBody::NotFound,
        }
    }

    pub fn face(&self) -> Option<&FaceSummary> {
        match &self.body {
            ResponseBody::Found { face, .. } => Some(face),
            ResponseBody::NotFound => None,
        }
    }

    pub fn tier(&self) -> Option<MatchTier> {
        match &self.body {
            ResponseBody::Found { tier, .. } => Some(*tier),
            ResponseBody::NotFound => None,
        }
    }
}

impl From<&MatchResult> for QueryResponse {
    fn from(result: &MatchResult) -> Self {
        let body = match result {
            MatchResult::Found { face, tier } => ResponseBody::Found {
                tier: *tier,
                face: FaceSummary::from(face),
            },
            MatchResult::NotFound => ResponseBody::NotFound,
        };
        Self {
            version: PROTOCOL_VERSION,
            body,
        }
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(message)?)
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

fn check_len(len: usize, max: usize) -> Result<(), ProtocolError> {
    if len > max {
        Err(ProtocolError::FrameTooLarge { len, max })
    } else {
        Ok(())
    }
}

/// Read one frame. `Ok(None)` means the peer closed cleanly between frames.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }

    let len = u32::from_le_bytes(header) as usize;
    check_len(len, max_len)?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Blocking counterpart of [`read_frame`], for synchronous clients.
pub fn read_frame_blocking<R: Read>(reader: &mut R, max_len: usize) -> Result<Vec<u8>, ProtocolError> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    check_len(len, max_len)?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

pub fn write_frame_blocking<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError> {
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_u32::<LittleEndian>(len)?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_wire_shape_is_flat() {
        let found = QueryResponse {
            version: PROTOCOL_VERSION,
            body: ResponseBody::Found {
                tier: MatchTier::Fuzzy,
                face: FaceSummary {
                    path: "/f/a.ttf".into(),
                    index: 2,
                    full_name: "A Bold".into(),
                    postscript_name: "A-Bold".into(),
                    win32_family_name: "A".into(),
                    weight: 700,
                    italic: false,
                },
            },
        };

        let value = serde_json::to_value(&found).expect("serialize");
        assert_eq!(value["result"], "found");
        assert_eq!(value["tier"], "fuzzy");
        assert_eq!(value["face"]["index"], 2);

        let back: QueryResponse = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, found);

        let missing = serde_json::to_value(QueryResponse::not_found()).expect("serialize");
        assert_eq!(missing, json!({"version": 1, "result": "not_found"}));
    }

    #[test]
    fn request_validation() {
        let ok: QueryRequest = decode(br#"{"version":1,"family":"Arial","bold":true}"#).expect("decode");
        let query = ok.into_query().expect("valid");
        assert_eq!(query.family(), "Arial");
        assert_eq!(query.style().bold, Some(true));
        assert_eq!(query.style().italic, None);

        let future: QueryRequest = decode(br#"{"version":9,"family":"Arial"}"#).expect("decode");
        assert!(matches!(future.into_query(), Err(ProtocolError::UnsupportedVersion(9))));

        let blank: QueryRequest = decode(br#"{"version":1,"family":" "}"#).expect("decode");
        assert_eq!(blank.into_query().expect("blank is still a query").family(), " ");

        assert!(matches!(
            decode::<QueryRequest>(b"{\"family\": 3}"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn blocking_frames_round_trip_and_enforce_limit() {
        let mut buf = Vec::new();
        write_frame_blocking(&mut buf, b"hello").expect("write");
        assert_eq!(&buf[..4], &5u32.to_le_bytes());

        let mut cursor = std::io::Cursor::new(buf.clone());
        assert_eq!(read_frame_blocking(&mut cursor, 16).expect("read"), b"hello");

        let mut cursor = std::io::Cursor::new(buf);
        assert!(matches!(
            read_frame_blocking(&mut cursor, 4),
            Err(ProtocolError::FrameTooLarge { len: 5, max: 4 })
        ));
    }

    #[tokio::test]
    async fn async_reader_distinguishes_clean_close_from_truncation() {
        let mut empty: &[u8] = &[];
        assert!(read_frame(&mut empty, 16).await.expect("clean eof").is_none());

        let mut short: &[u8] = &[5, 0];
        assert!(matches!(read_frame(&mut short, 16).await, Err(ProtocolError::Io(_))));

        let mut truncated: &[u8] = &[5, 0, 0, 0, b'h', b'i'];
        assert!(matches!(read_frame(&mut truncated, 16).await, Err(ProtocolError::Io(_))));

        let mut framed = Vec::new();
        write_frame(&mut framed, b"{}").await.expect("write");
        let mut reader: &[u8] = &framed;
        assert_eq!(read_frame(&mut reader, 16).await.expect("read"), Some(b"{}".to_vec()));
    }
}
