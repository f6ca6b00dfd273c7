// src/camera/mjpeg.rs
// Splits a concatenated MJPEG byte stream into individual JPEG images

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Upper bound on buffered bytes without a complete frame
pub const MAX_PENDING_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct MjpegSplitter {
    pending: Vec<u8>,
}

impl MjpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every JPEG completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find_marker(&self.pending, 0, SOI) else {
                // A trailing 0xFF may be the first half of the next SOI.
                let keep = usize::from(self.pending.last() == Some(&0xFF));
                let discard = self.pending.len() - keep;
                self.pending.drain(..discard);
                break;
            };

            if start > 0 {
                self.pending.drain(..start);
            }

            let Some(end) = find_marker(&self.pending, SOI.len(), EOI) else {
                break;
            };

            frames.push(self.pending.drain(..end + EOI.len()).collect());
        }

        if self.pending.len() > MAX_PENDING_BYTES {
            tracing::warn!(
                "MJPEG splitter dropped {} bytes without an end-of-image marker",
                self.pending.len()
            );
            self.pending.clear();
        }

        frames
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn find_marker(buf: &[u8], from: usize, marker: [u8; 2]) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut out = SOI.to_vec();
        out.extend_from_slice(body);
        out.extend_from_slice(&EOI);
        out
    }

    #[test]
    fn splits_back_to_back_frames() {
        let mut stream = jpeg(b"first");
        stream.extend(jpeg(b"second"));

        let mut splitter = MjpegSplitter::new();
        let frames = splitter.push(&stream);

        assert_eq!(frames, vec![jpeg(b"first"), jpeg(b"second")]);
        assert_eq!(splitter.pending_len(), 0);
    }

    #[test]
    fn reassembles_frame_across_chunks() {
        let frame = jpeg(b"split-body");
        let (head, tail) = frame.split_at(5);

        let mut splitter = MjpegSplitter::new();
        assert!(splitter.push(head).is_empty());
        assert_eq!(splitter.push(tail), vec![frame]);
    }

    #[test]
    fn marker_split_between_chunks() {
        let frame = jpeg(b"xyz");
        let mut splitter = MjpegSplitter::new();

        // Chunk boundary falls inside the SOI marker itself.
        assert!(splitter.push(&[0x00, 0x11, 0xFF]).is_empty());
        assert_eq!(splitter.push(&frame[1..]), vec![frame]);
    }

    #[test]
    fn garbage_before_start_is_dropped() {
        let mut splitter = MjpegSplitter::new();
        assert!(splitter.push(b"noise without markers").is_empty());
        assert_eq!(splitter.pending_len(), 0);

        let mut stream = b"more noise".to_vec();
        stream.extend(jpeg(b"ok"));
        assert_eq!(splitter.push(&stream), vec![jpeg(b"ok")]);
    }
}
