use std::io::{self, BufRead, Write};

use serde::Serialize;
use serde_json::Value;

use super::frame::Frame;
use crate::error::{ServerError, ServerResult};

/// JSON formatter writing `, ` between elements and `: ` after keys.
///
/// Output stays on one line; strings are written unescaped beyond what JSON
/// requires, so non-ASCII text passes through as UTF-8.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        writer.write_all(b": ")
    }
}

/// Render a value the way frames and log messages are written.
pub fn to_spaced_string(value: &Value) -> ServerResult<String> {
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    value.serialize(&mut serializer)?;
    String::from_utf8(buf).map_err(|e| ServerError::Internal(format!("Invalid UTF-8 output: {}", e)))
}

/// Read the next line, without its terminator. `None` at end of input.
pub fn read_line<R: BufRead>(reader: &mut R) -> ServerResult<Option<String>> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf)? == 0 {
        return Ok(None);
    }
    while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
        buf.pop();
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| ServerError::protocol(format!("input is not valid UTF-8: {}", e)))
}

/// Writes frames as newline-terminated lines.
pub struct FrameWriter<W: Write> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> ServerResult<()> {
        let line = to_spaced_string(&frame.to_json())?;
        self.inner.write_all(line.as_bytes())?;
        self.inner.write_all(b"\n")?;
        Ok(())
    }

    /// Write a batch of frames in order and flush.
    pub fn write_frames(&mut self, frames: &[Frame]) -> ServerResult<()> {
        for frame in frames {
            self.write_frame(frame)?;
        }
        self.inner.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn test_spaced_output() {
        assert_eq!(to_spaced_string(&json!([true, [6]])).unwrap(), "[true, [6]]");
        assert_eq!(
            to_spaced_string(&json!([[[null, {"foo": "bar"}]]])).unwrap(),
            r#"[[[null, {"foo": "bar"}]]]"#
        );
        assert_eq!(to_spaced_string(&json!({})).unwrap(), "{}");
        assert_eq!(to_spaced_string(&json!([])).unwrap(), "[]");
        assert_eq!(to_spaced_string(&json!("a, b: c")).unwrap(), r#""a, b: c""#);
        assert_eq!(to_spaced_string(&json!("ünï")).unwrap(), "\"ünï\"");
    }

    #[test]
    fn test_read_line() {
        let mut reader = Cursor::new(b"[\"reset\"]\r\n\n[1]".to_vec());
        assert_eq!(read_line(&mut reader).unwrap().as_deref(), Some("[\"reset\"]"));
        assert_eq!(read_line(&mut reader).unwrap().as_deref(), Some(""));
        assert_eq!(read_line(&mut reader).unwrap().as_deref(), Some("[1]"));
        assert_eq!(read_line(&mut reader).unwrap(), None);

        let mut reader = Cursor::new(vec![0xff, 0xfe, b'\n']);
        assert!(read_line(&mut reader).unwrap_err().is_fatal());
    }

    #[test]
    fn test_frame_writer() {
        let mut output = Vec::new();
        FrameWriter::new(&mut output)
            .write_frames(&[
                Frame::log("[1, 2, 3]"),
                Frame::result(json!([true, [6]])),
                Frame::error("not_found", "missing"),
            ])
            .unwrap();
        let output = String::from_utf8(output).unwrap();
        assert_eq!(
            output,
            "{\"log\": \"[1, 2, 3]\"}\n[true, [6]]\n{\"error\": {\"id\": \"not_found\", \"reason\": \"missing\"}}\n"
        );
    }
}
