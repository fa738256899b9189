use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::domain::ClientError;

const FILE_HEADER_LEN: usize = 32;
const FRAME_HEADER_LEN: usize = 12;
const SIGNATURE: &[u8; 4] = b"DKIF";

/// Stream parameters from the IVF file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfHeader {
    pub fourcc: [u8; 4],
    pub width: u16,
    pub height: u16,
    pub timebase_num: u32,
    pub timebase_den: u32,
}

impl IvfHeader {
    /// Duration of one tick of the stream timebase
    fn tick(&self) -> Duration {
        if self.timebase_den == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.timebase_num as f64 / self.timebase_den as f64)
    }
}

/// Frame-by-frame reader over an IVF byte stream (ffmpeg `-f ivf`)
pub struct IvfReader<R> {
    inner: R,
    header: IvfHeader,
    last_timestamp: Option<u64>,
}

impl<R: AsyncRead + Unpin> IvfReader<R> {
    /// Read and check the 32-byte file header
    pub async fn new(mut inner: R) -> Result<Self, ClientError> {
        let mut raw = [0u8; FILE_HEADER_LEN];
        inner
            .read_exact(&mut raw)
            .await
            .map_err(|e| ClientError::Source(format!("missing IVF header: {}", e)))?;

        if &raw[0..4] != SIGNATURE {
            return Err(ClientError::Source("stream is not IVF".to_string()));
        }
        let header = IvfHeader {
            fourcc: [raw[8], raw[9], raw[10], raw[11]],
            width: u16::from_le_bytes([raw[12], raw[13]]),
            height: u16::from_le_bytes([raw[14], raw[15]]),
            timebase_den: u32::from_le_bytes([raw[16], raw[17], raw[18], raw[19]]),
            timebase_num: u32::from_le_bytes([raw[20], raw[21], raw[22], raw[23]]),
        };

        Ok(Self {
            inner,
            header,
            last_timestamp: None,
        })
    }

    pub fn header(&self) -> &IvfHeader {
        &self.header
    }

    /// Next frame and its duration, `None` at a clean end of stream
    pub async fn next_frame(&mut self, fallback: Duration) -> Result<Option<(Bytes, Duration)>, ClientError> {
        let mut raw = [0u8; FRAME_HEADER_LEN];
        match self.inner.read_exact(&mut raw).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(ClientError::Source(format!("failed to read IVF frame: {}", e))),
        }

        let size = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        let timestamp = u64::from_le_bytes([raw[4], raw[5], raw[6], raw[7], raw[8], raw[9], raw[10], raw[11]]);

        let mut data = vec![0u8; size];
        self.inner
            .read_exact(&mut data)
            .await
            .map_err(|e| ClientError::Source(format!("truncated IVF frame: {}", e)))?;

        let duration = match self.last_timestamp {
            Some(prev) if timestamp > prev => self.header.tick() * (timestamp - prev) as u32,
            _ => fallback,
        };
        self.last_timestamp = Some(timestamp);

        Ok(Some((Bytes::from(data), duration)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(width: u16, height: u16, fps: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"DKIF");
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&32u16.to_le_bytes());
        out.extend_from_slice(b"VP80");
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&height.to_le_bytes());
        out.extend_from_slice(&fps.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out
    }

    fn frame(timestamp: u64, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&timestamp.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn test_reads_header_and_frames() {
        let mut stream = header(640, 480, 30);
        stream.extend(frame(0, &[1, 2, 3]));
        stream.extend(frame(1, &[4, 5]));
        stream.extend(frame(3, &[6]));

        let mut reader = IvfReader::new(stream.as_slice()).await.unwrap();
        assert_eq!(&reader.header().fourcc, b"VP80");
        assert_eq!((reader.header().width, reader.header().height), (640, 480));

        let fallback = Duration::from_millis(33);
        let (data, duration) = reader.next_frame(fallback).await.unwrap().unwrap();
        assert_eq!(&data[..], &[1, 2, 3]);
        assert_eq!(duration, fallback);

        let (_, duration) = reader.next_frame(fallback).await.unwrap().unwrap();
        assert_eq!(duration, Duration::from_secs_f64(1.0 / 30.0));

        let (data, duration) = reader.next_frame(fallback).await.unwrap().unwrap();
        assert_eq!(&data[..], &[6]);
        assert_eq!(duration, Duration::from_secs_f64(1.0 / 30.0) * 2);

        assert!(reader.next_frame(fallback).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_non_ivf_stream() {
        let garbage = vec![0u8; 40];
        let err = IvfReader::new(garbage.as_slice()).await.err().unwrap();
        assert!(matches!(err, ClientError::Source(_)));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let mut stream = header(2, 2, 30);
        let mut partial = frame(0, &[1, 2, 3, 4]);
        partial.truncate(partial.len() - 2);
        stream.extend(partial);

        let mut reader = IvfReader::new(stream.as_slice()).await.unwrap();
        assert!(reader.next_frame(Duration::from_millis(33)).await.is_err());
    }
}
