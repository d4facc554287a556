//! Neutral IPC record framing (version 0).
//!
//! Every record is a 12-byte header followed by two content blocks:
//!
//! ```text
//! [0x00 reserved][u8 control]
//! [u8 format 1][u32 BE length 1]
//! [u8 format 2][u32 BE length 2]
//! [content 1: length 1 bytes][content 2: length 2 bytes]
//! ```
//!
//! A request carries the schema JSON in block 1 and the template (path or
//! inline text) in block 2. A response carries a JSON status object in
//! block 1 and the rendered body in block 2. All text is UTF-8.

use crate::error::{CodecError, NeutralError, SchemaError};
use crate::render::TemplateRef;
use crate::schema::Schema;
use crate::Result;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HEADER_SIZE: usize = 12;

pub const CTRL_PARSE_TEMPLATE: u8 = 10;
pub const CTRL_STATUS_OK: u8 = 0;
pub const CTRL_STATUS_KO: u8 = 1;

pub const CONTENT_JSON: u8 = 10;
pub const CONTENT_PATH: u8 = 20;
pub const CONTENT_TEXT: u8 = 30;

/// Record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Must be 0x00.
    pub reserved: u8,
    /// Action for requests, status for responses.
    pub control: u8,
    pub content_format_1: u8,
    pub content_length_1: u32,
    pub content_format_2: u8,
    /// May be zero.
    pub content_length_2: u32,
}

impl Header {
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        Header {
            reserved: bytes[0],
            control: bytes[1],
            content_format_1: bytes[2],
            content_length_1: u32::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]),
            content_format_2: bytes[7],
            content_length_2: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buffer = [0; HEADER_SIZE];
        buffer[0] = self.reserved;
        buffer[1] = self.control;
        buffer[2] = self.content_format_1;
        buffer[3..7].copy_from_slice(&self.content_length_1.to_be_bytes());
        buffer[7] = self.content_format_2;
        buffer[8..12].copy_from_slice(&self.content_length_2.to_be_bytes());
        buffer
    }

    /// Total record size including the header.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.content_length_1 as usize + self.content_length_2 as usize
    }

    fn check_sizes(&self, max: usize) -> std::result::Result<(), CodecError> {
        for declared in [self.content_length_1 as usize, self.content_length_2 as usize] {
            if declared > max {
                return Err(CodecError::Oversized { declared, max });
            }
        }
        Ok(())
    }

    fn validate_request(&self) -> std::result::Result<(), CodecError> {
        if self.reserved != 0 {
            return Err(CodecError::Malformed(format!(
                "reserved byte must be 0, got {}",
                self.reserved
            )));
        }
        if self.control != CTRL_PARSE_TEMPLATE {
            return Err(CodecError::Malformed(format!(
                "unsupported control code {}",
                self.control
            )));
        }
        if self.content_format_1 != CONTENT_JSON {
            return Err(CodecError::Malformed(
                "invalid content_format_1, expected JSON".to_string(),
            ));
        }
        if self.content_format_2 != CONTENT_TEXT && self.content_format_2 != CONTENT_PATH {
            return Err(CodecError::Malformed(
                "invalid content_format_2, expected TEXT or PATH".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_response(&self) -> std::result::Result<(), CodecError> {
        if self.reserved != 0 {
            return Err(CodecError::Malformed(format!(
                "reserved byte must be 0, got {}",
                self.reserved
            )));
        }
        if self.control != CTRL_STATUS_OK && self.control != CTRL_STATUS_KO {
            return Err(CodecError::Malformed(format!(
                "unsupported status control {}",
                self.control
            )));
        }
        if self.content_format_1 != CONTENT_JSON || self.content_format_2 != CONTENT_TEXT {
            return Err(CodecError::Malformed(
                "response must carry JSON status and TEXT body".to_string(),
            ));
        }
        Ok(())
    }
}

/// A decoded render request. The schema stays raw: its validation belongs
/// to the schema model, not the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub template: TemplateRef,
    pub schema: Bytes,
}

impl RequestFrame {
    pub fn new(template: TemplateRef, schema: &Schema) -> Self {
        Self {
            template,
            schema: Bytes::from(schema.to_json()),
        }
    }

    /// Build from schema JSON text supplied by a caller.
    pub fn from_json(template: TemplateRef, schema_json: impl Into<String>) -> Self {
        Self {
            template,
            schema: Bytes::from(schema_json.into()),
        }
    }

    /// The schema block as text.
    pub fn schema_text(&self) -> std::result::Result<&str, SchemaError> {
        std::str::from_utf8(&self.schema)
            .map_err(|e| SchemaError::Malformed(format!("schema is not UTF-8: {}", e)))
    }

    pub fn parse_schema(&self) -> std::result::Result<Schema, SchemaError> {
        Schema::parse_str(self.schema_text()?)
    }
}

/// Status triple plus rendered body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResponse {
    pub status_code: u16,
    pub status_text: String,
    /// Empty when there is no error.
    pub status_param: String,
    pub body: String,
}

impl RenderResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status_code: 200,
            status_text: "OK".to_string(),
            status_param: String::new(),
            body: body.into(),
        }
    }

    pub fn error(code: u16, text: impl Into<String>, param: impl Into<String>) -> Self {
        Self {
            status_code: code,
            status_text: text.into(),
            status_param: param.into(),
            body: String::new(),
        }
    }

    pub fn has_error(&self) -> bool {
        self.status_code >= 400
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == 200
    }
}

/// JSON status object carried in block 1 of a response.
///
/// `status_code` goes out as a numeric string (`"200"`), the form the
/// template engine reports and existing clients read.
#[derive(Debug, Serialize, Deserialize)]
struct StatusBlock {
    has_error: bool,
    #[serde(
        serialize_with = "serialize_status_code",
        deserialize_with = "deserialize_status_code"
    )]
    status_code: u16,
    status_text: String,
    status_param: String,
}

fn serialize_status_code<S>(code: &u16, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(code)
}

/// Accepts the code as a number or a numeric string.
fn deserialize_status_code<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Number(u16),
        Text(String),
    }

    match Code::deserialize(deserializer)? {
        Code::Number(code) => Ok(code),
        Code::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn block_len(len: usize) -> std::result::Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::Oversized {
        declared: len,
        max: u32::MAX as usize,
    })
}

fn encode_record(header: Header, block_1: &[u8], block_2: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(header.frame_len());
    buf.put_slice(&header.to_bytes());
    buf.put_slice(block_1);
    buf.put_slice(block_2);
    buf.freeze()
}

/// Split a complete record out of `buf`.
fn split_record(buf: &[u8], max: usize) -> std::result::Result<(Header, &[u8], &[u8]), CodecError> {
    let header_bytes: &[u8; HEADER_SIZE] = buf
        .get(..HEADER_SIZE)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(CodecError::Truncated {
            expected: HEADER_SIZE,
            actual: buf.len(),
        })?;
    let header = Header::from_bytes(header_bytes);
    header.check_sizes(max)?;

    let total = header.frame_len();
    if buf.len() < total {
        return Err(CodecError::Truncated {
            expected: total,
            actual: buf.len(),
        });
    }
    if buf.len() > total {
        return Err(CodecError::Malformed(format!(
            "{} trailing bytes after record",
            buf.len() - total
        )));
    }

    let split = HEADER_SIZE + header.content_length_1 as usize;
    Ok((header, &buf[HEADER_SIZE..split], &buf[split..total]))
}

fn utf8(block: &[u8], what: &str) -> std::result::Result<String, CodecError> {
    String::from_utf8(block.to_vec())
        .map_err(|e| CodecError::Malformed(format!("invalid UTF-8 in {}: {}", what, e)))
}

fn request_header(frame: &RequestFrame) -> std::result::Result<Header, CodecError> {
    let format_2 = if frame.template.is_path() {
        CONTENT_PATH
    } else {
        CONTENT_TEXT
    };
    Ok(Header {
        reserved: 0,
        control: CTRL_PARSE_TEMPLATE,
        content_format_1: CONTENT_JSON,
        content_length_1: block_len(frame.schema.len())?,
        content_format_2: format_2,
        content_length_2: block_len(frame.template.as_str().len())?,
    })
}

fn request_from_parts(
    header: &Header,
    block_1: &[u8],
    block_2: &[u8],
) -> std::result::Result<RequestFrame, CodecError> {
    header.validate_request()?;
    let template = utf8(block_2, "template")?;
    let template = if header.content_format_2 == CONTENT_PATH {
        TemplateRef::Path(template)
    } else {
        TemplateRef::Inline(template)
    };
    Ok(RequestFrame {
        template,
        schema: Bytes::copy_from_slice(block_1),
    })
}

fn response_from_parts(
    header: &Header,
    block_1: &[u8],
    block_2: &[u8],
) -> std::result::Result<RenderResponse, CodecError> {
    header.validate_response()?;
    let status: StatusBlock = serde_json::from_slice(block_1)
        .map_err(|e| CodecError::Malformed(format!("invalid status block: {}", e)))?;
    Ok(RenderResponse {
        status_code: status.status_code,
        status_text: status.status_text,
        status_param: status.status_param,
        body: utf8(block_2, "body")?,
    })
}

/// Encode a request record.
pub fn encode_request(frame: &RequestFrame) -> std::result::Result<Bytes, CodecError> {
    let header = request_header(frame)?;
    Ok(encode_record(header, &frame.schema, frame.template.as_str().as_bytes()))
}

/// Decode exactly one request record from `buf`.
pub fn decode_request(buf: &[u8], max: usize) -> std::result::Result<RequestFrame, CodecError> {
    let (header, block_1, block_2) = split_record(buf, max)?;
    request_from_parts(&header, block_1, block_2)
}

/// Encode a response record.
pub fn encode_response(response: &RenderResponse) -> std::result::Result<Bytes, CodecError> {
    let status = StatusBlock {
        has_error: response.has_error(),
        status_code: response.status_code,
        status_text: response.status_text.clone(),
        status_param: response.status_param.clone(),
    };
    let status_json = serde_json::to_vec(&status)
        .map_err(|e| CodecError::Malformed(format!("unencodable status: {}", e)))?;

    let header = Header {
        reserved: 0,
        control: CTRL_STATUS_OK,
        content_format_1: CONTENT_JSON,
        content_length_1: block_len(status_json.len())?,
        content_format_2: CONTENT_TEXT,
        content_length_2: block_len(response.body.len())?,
    };
    Ok(encode_record(header, &status_json, response.body.as_bytes()))
}

/// Decode exactly one response record from `buf`.
pub fn decode_response(buf: &[u8], max: usize) -> std::result::Result<RenderResponse, CodecError> {
    let (header, block_1, block_2) = split_record(buf, max)?;
    response_from_parts(&header, block_1, block_2)
}

/// Fill `buf` from `reader`, stopping early only at EOF. Returns bytes read.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Read one record. `None` on clean EOF before the first header byte.
async fn read_record<R: AsyncRead + Unpin>(
    reader: &mut R,
    max: usize,
) -> Result<Option<(Header, Vec<u8>, Vec<u8>)>> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    let got = read_full(reader, &mut header_bytes).await?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_SIZE {
        return Err(CodecError::Truncated {
            expected: HEADER_SIZE,
            actual: got,
        }
        .into());
    }

    let header = Header::from_bytes(&header_bytes);
    header.check_sizes(max)?;

    let mut block_1 = vec![0u8; header.content_length_1 as usize];
    let mut block_2 = vec![0u8; header.content_length_2 as usize];
    let got_1 = read_full(reader, &mut block_1).await?;
    let got_2 = if got_1 == block_1.len() {
        read_full(reader, &mut block_2).await?
    } else {
        0
    };
    if got_1 < block_1.len() || got_2 < block_2.len() {
        return Err(CodecError::Truncated {
            expected: header.frame_len(),
            actual: HEADER_SIZE + got_1 + got_2,
        }
        .into());
    }

    Ok(Some((header, block_1, block_2)))
}

/// Read one request from a stream.
///
/// Returns `None` on clean EOF (peer closed connection between requests).
pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
    max: usize,
) -> Result<Option<RequestFrame>> {
    match read_record(reader, max).await? {
        Some((header, block_1, block_2)) => {
            Ok(Some(request_from_parts(&header, &block_1, &block_2)?))
        }
        None => Ok(None),
    }
}

/// Read one response from a stream. EOF before a response is an error.
pub async fn read_response<R: AsyncRead + Unpin>(
    reader: &mut R,
    max: usize,
) -> Result<RenderResponse> {
    let (header, block_1, block_2) =
        read_record(reader, max)
            .await?
            .ok_or_else(|| NeutralError::Io {
                message: "connection closed before response".to_string(),
                path: None,
                source: None,
            })?;
    Ok(response_from_parts(&header, &block_1, &block_2)?)
}

pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &RequestFrame,
) -> Result<()> {
    let bytes = encode_request(frame)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &RenderResponse,
) -> Result<()> {
    let bytes = encode_response(response)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
