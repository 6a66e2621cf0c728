// rendezvous-core/src/codec.rs

//! Framing primitives shared by the coordination and remote-control
//! protocols.
//!
//! Binary fields are big-endian. Strings are a `u16` byte length followed
//! by UTF-8 bytes; lists are an `i32` count followed by the elements.
//!
//! The line framing carries one message per `\n`-terminated line. Every
//! line starts with a marker naming its sender, fields are separated by
//! single spaces and percent-encoded, and lines that do not start with
//! the expected marker are skipped.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RendezvousError, Result};

/// Longest string the binary framing can carry.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Upper bound on list lengths accepted from the wire.
pub const MAX_LIST_LEN: i32 = 1 << 20;

/// Upper bound on a single framed line.
pub const MAX_LINE_LEN: usize = 1 << 20;

pub async fn read_u8<R: AsyncRead + Unpin>(reader: &mut R, what: &str) -> Result<u8> {
    reader
        .read_u8()
        .await
        .map_err(|e| RendezvousError::from_read(what, e))
}

pub async fn write_u8<W: AsyncWrite + Unpin>(writer: &mut W, value: u8) -> Result<()> {
    writer
        .write_u8(value)
        .await
        .map_err(|e| RendezvousError::io("writing byte", e))
}

pub async fn read_bool<R: AsyncRead + Unpin>(reader: &mut R, what: &str) -> Result<bool> {
    match read_u8(reader, what).await? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RendezvousError::protocol(format!(
            "invalid boolean {other} while {what}"
        ))),
    }
}

pub async fn write_bool<W: AsyncWrite + Unpin>(writer: &mut W, value: bool) -> Result<()> {
    write_u8(writer, u8::from(value)).await
}

pub async fn read_i32<R: AsyncRead + Unpin>(reader: &mut R, what: &str) -> Result<i32> {
    reader
        .read_i32()
        .await
        .map_err(|e| RendezvousError::from_read(what, e))
}

pub async fn write_i32<W: AsyncWrite + Unpin>(writer: &mut W, value: i32) -> Result<()> {
    writer
        .write_i32(value)
        .await
        .map_err(|e| RendezvousError::io("writing int", e))
}

pub async fn read_i64<R: AsyncRead + Unpin>(reader: &mut R, what: &str) -> Result<i64> {
    reader
        .read_i64()
        .await
        .map_err(|e| RendezvousError::from_read(what, e))
}

pub async fn write_i64<W: AsyncWrite + Unpin>(writer: &mut W, value: i64) -> Result<()> {
    writer
        .write_i64(value)
        .await
        .map_err(|e| RendezvousError::io("writing long", e))
}

pub async fn read_string<R: AsyncRead + Unpin>(reader: &mut R, what: &str) -> Result<String> {
    let len = reader
        .read_u16()
        .await
        .map_err(|e| RendezvousError::from_read(what, e))?;
    let mut buf = vec![0u8; usize::from(len)];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| RendezvousError::from_read(what, e))?;
    String::from_utf8(buf)
        .map_err(|_| RendezvousError::protocol(format!("invalid UTF-8 while {what}")))
}

pub async fn write_string<W: AsyncWrite + Unpin>(writer: &mut W, value: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| {
        RendezvousError::protocol(format!(
            "string of {} bytes exceeds the {MAX_STRING_LEN} byte limit",
            value.len()
        ))
    })?;
    writer
        .write_u16(len)
        .await
        .map_err(|e| RendezvousError::io("writing string length", e))?;
    writer
        .write_all(value.as_bytes())
        .await
        .map_err(|e| RendezvousError::io("writing string", e))
}

/// Reads an `i32` element count, rejecting negative or absurd values.
pub async fn read_count<R: AsyncRead + Unpin>(reader: &mut R, what: &str) -> Result<usize> {
    let count = read_i32(reader, what).await?;
    check_count(count, what)
}

pub fn check_count(count: i32, what: &str) -> Result<usize> {
    if !(0..=MAX_LIST_LEN).contains(&count) {
        return Err(RendezvousError::protocol(format!(
            "invalid element count {count} while {what}"
        )));
    }
    Ok(count as usize)
}

pub async fn read_string_list<R: AsyncRead + Unpin>(
    reader: &mut R,
    what: &str,
) -> Result<Vec<String>> {
    let count = read_count(reader, what).await?;
    read_strings(reader, count, what).await
}

/// Reads exactly `count` strings.
pub async fn read_strings<R: AsyncRead + Unpin>(
    reader: &mut R,
    count: usize,
    what: &str,
) -> Result<Vec<String>> {
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        items.push(read_string(reader, what).await?);
    }
    Ok(items)
}

pub async fn write_string_list<W: AsyncWrite + Unpin, S: AsRef<str>>(
    writer: &mut W,
    items: &[S],
) -> Result<()> {
    let count = i32::try_from(items.len())
        .map_err(|_| RendezvousError::protocol("list too long to encode"))?;
    write_i32(writer, count).await?;
    for item in items {
        write_string(writer, item.as_ref()).await?;
    }
    Ok(())
}

pub async fn flush<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer
        .flush()
        .await
        .map_err(|e| RendezvousError::io("flushing stream", e))
}

/// Reads marker-prefixed lines, skipping anything else on the stream.
///
/// Unmarked lines are skipped whatever their encoding; only marked lines
/// must be UTF-8.
pub struct LineReader<R> {
    inner: R,
    marker: &'static str,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(inner: R, marker: &'static str) -> Self {
        Self {
            inner,
            marker,
            buf: Vec::new(),
        }
    }

    /// Returns the decoded fields of the next line carrying our marker.
    pub async fn read_fields(&mut self, what: &str) -> Result<Vec<String>> {
        loop {
            self.buf.clear();
            let read = (&mut self.inner)
                .take(MAX_LINE_LEN as u64)
                .read_until(b'\n', &mut self.buf)
                .await
                .map_err(|e| RendezvousError::from_read(what, e))?;
            if read == 0 {
                return Err(RendezvousError::protocol(format!(
                    "stream closed mid-message while {what}"
                )));
            }
            if read >= MAX_LINE_LEN && !self.buf.ends_with(b"\n") {
                return Err(RendezvousError::protocol(format!(
                    "line too long while {what}"
                )));
            }

            let Some(rest) = self.buf.strip_prefix(self.marker.as_bytes()) else {
                tracing::trace!(
                    line = %String::from_utf8_lossy(&self.buf).trim_end(),
                    "skipping unmarked line"
                );
                continue;
            };
            let rest = std::str::from_utf8(rest).map_err(|_| {
                RendezvousError::protocol(format!("invalid UTF-8 in line while {what}"))
            })?;
            return decode_fields(rest.trim_end_matches(['\n', '\r']));
        }
    }
}

/// Writes marker-prefixed lines.
pub struct LineWriter<W> {
    inner: W,
    marker: &'static str,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(inner: W, marker: &'static str) -> Self {
        Self { inner, marker }
    }

    pub async fn write_fields<S: AsRef<str>>(&mut self, fields: &[S]) -> Result<()> {
        let line = encode_line(self.marker, fields);
        self.inner
            .write_all(line.as_bytes())
            .await
            .map_err(|e| RendezvousError::io("writing line", e))?;
        flush(&mut self.inner).await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| RendezvousError::io("closing stream", e))
    }
}

pub fn encode_line<S: AsRef<str>>(marker: &str, fields: &[S]) -> String {
    let mut line = String::from(marker);
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(&encode_field(field.as_ref()));
    }
    line.push('\n');
    line
}

// Empty strings need a visible token or they would vanish between spaces.
const EMPTY_FIELD: &str = "%";

fn encode_field(field: &str) -> String {
    if field.is_empty() {
        EMPTY_FIELD.to_string()
    } else {
        urlencoding::encode(field).into_owned()
    }
}

fn decode_fields(rest: &str) -> Result<Vec<String>> {
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    rest.split(' ')
        .map(|token| {
            if token == EMPTY_FIELD {
                return Ok(String::new());
            }
            urlencoding::decode(token)
                .map(|s| s.into_owned())
                .map_err(|_| RendezvousError::protocol(format!("malformed field '{token}'")))
        })
        .collect()
}
