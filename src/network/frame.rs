// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::AppError::Incomplete;
use crate::{AppError, AppResult};

/// Size of the big-endian length prefix in front of every payload.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Prepends the 4-byte big-endian payload length.
pub fn pack(payload: &[u8]) -> AppResult<BytesMut> {
    let length = u32::try_from(payload.len()).map_err(|_| {
        AppError::InvalidValue(format!("payload of {} bytes cannot be framed", payload.len()))
    })?;
    let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.put_u32(length);
    frame.put_slice(payload);
    Ok(frame)
}

/// Strips the length prefix of one complete frame.
///
/// The declared length has to match the bytes that follow exactly.
pub fn unpack(frame: &[u8]) -> AppResult<Bytes> {
    if frame.len() < FRAME_HEADER_SIZE {
        return Err(AppError::MalformedProtocol(format!(
            "frame of {} bytes has no length prefix",
            frame.len()
        )));
    }
    let (header, body) = frame.split_at(FRAME_HEADER_SIZE);
    let declared = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if declared != body.len() {
        return Err(AppError::MalformedProtocol(format!(
            "frame declares {} bytes but carries {}",
            declared,
            body.len()
        )));
    }
    Ok(Bytes::copy_from_slice(body))
}

/// Incremental decoder for frames arriving on a stream.
#[derive(Debug)]
pub struct Frame;

impl Frame {
    /// Ok when `buffer` holds at least one complete frame, `Incomplete` when
    /// more bytes are needed, any other error when the stream is unusable.
    pub fn check(buffer: &mut BytesMut, max_package_size: usize) -> AppResult<()> {
        if buffer.remaining() < FRAME_HEADER_SIZE {
            return Err(Incomplete);
        }
        let body_size = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
        if body_size > max_package_size {
            return Err(AppError::MalformedProtocol(format!(
                "Frame of length {} is too large.",
                body_size
            )));
        }
        if buffer.remaining() < body_size + FRAME_HEADER_SIZE {
            buffer.reserve(body_size + FRAME_HEADER_SIZE - buffer.remaining());
            return Err(Incomplete);
        }
        Ok(())
    }

    pub fn parse(buffer: &mut BytesMut, max_package_size: usize) -> AppResult<Option<Bytes>> {
        match Frame::check(buffer, max_package_size) {
            Ok(_) => {
                let body_length = buffer.get_u32() as usize;
                let body = buffer.split_to(body_length).freeze();
                Ok(Some(body))
            }
            Err(AppError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(b"".to_vec())]
    #[case(b"{}".to_vec())]
    #[case(vec![0u8; 70_000])]
    #[case((0..=255u8).collect::<Vec<u8>>())]
    fn test_pack_unpack(#[case] payload: Vec<u8>) {
        let frame = pack(&payload).unwrap();
        assert_eq!(frame.len(), payload.len() + FRAME_HEADER_SIZE);
        assert_eq!(unpack(&frame).unwrap(), Bytes::from(payload));
    }

    #[test]
    fn test_length_prefix_is_big_endian() {
        let frame = pack(&[7u8; 258]).unwrap();
        assert_eq!(&frame[..4], &[0, 0, 1, 2]);
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![0, 0, 1])]
    #[case(vec![0, 0, 0, 5, b'a', b'b'])]
    #[case(vec![0, 0, 0, 1, b'a', b'b'])]
    fn test_unpack_rejects_bad_frames(#[case] frame: Vec<u8>) {
        assert!(matches!(unpack(&frame), Err(AppError::MalformedProtocol(_))));
    }

    #[test]
    fn test_parse_waits_for_complete_frame() {
        let frame = pack(b"hello world").unwrap();
        let mut buffer = BytesMut::new();

        buffer.extend_from_slice(&frame[..2]);
        assert!(Frame::parse(&mut buffer, 1024).unwrap().is_none());

        buffer.extend_from_slice(&frame[2..8]);
        assert!(Frame::parse(&mut buffer, 1024).unwrap().is_none());

        buffer.extend_from_slice(&frame[8..]);
        let body = Frame::parse(&mut buffer, 1024).unwrap().unwrap();
        assert_eq!(&body[..], b"hello world");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_parse_two_frames_in_one_read() {
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&pack(b"first").unwrap());
        buffer.extend_from_slice(&pack(b"second").unwrap());

        assert_eq!(&Frame::parse(&mut buffer, 1024).unwrap().unwrap()[..], b"first");
        assert_eq!(&Frame::parse(&mut buffer, 1024).unwrap().unwrap()[..], b"second");
        assert!(Frame::parse(&mut buffer, 1024).unwrap().is_none());
    }

    #[test]
    fn test_parse_rejects_oversized_frame() {
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&pack(&[1u8; 64]).unwrap());
        assert!(matches!(
            Frame::parse(&mut buffer, 32),
            Err(AppError::MalformedProtocol(_))
        ));
    }
}
