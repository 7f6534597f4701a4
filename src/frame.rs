use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// One complete live view image as delivered by a camera driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveFrame {
    /// Sequence number assigned by the source (device or demo driver)
    pub sequence: u64,
    /// Device timestamp in milliseconds, 0 when the source has none
    pub device_timestamp: u32,
    /// Local time the frame was completed
    pub received_at: SystemTime,
    /// Encoded image bytes (JPEG)
    pub data: Bytes,
}

impl LiveFrame {
    pub fn new(sequence: u64, device_timestamp: u32, data: Bytes) -> Self {
        Self {
            sequence,
            device_timestamp,
            received_at: SystemTime::now(),
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check for JPEG start/end of image markers
    pub fn is_jpeg(&self) -> bool {
        self.data.len() >= 4
            && self.data[..2] == [0xFF, 0xD8]
            && self.data[self.data.len() - 2..] == [0xFF, 0xD9]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jpeg_markers() {
        let frame = LiveFrame::new(1, 0, Bytes::from_static(&[0xFF, 0xD8, 0x00, 0xFF, 0xD9]));
        assert!(frame.is_jpeg());
        assert_eq!(frame.len(), 5);

        let frame = LiveFrame::new(2, 0, Bytes::from_static(b"not a jpeg"));
        assert!(!frame.is_jpeg());
        assert!(!frame.is_empty());
    }
}
