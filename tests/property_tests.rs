//! Property-based tests for PeerLink
//!
//! Uses proptest to verify invariants across large input spaces.

use proptest::prelude::*;

// ============================================================================
// Frame Encoding/Decoding Properties
// ============================================================================

mod frame_properties {
    use super::*;
    use peerlink_core::{Frame, FrameType, MAX_FRAME_SIZE};

    fn frame_type(tag: u8) -> FrameType {
        match tag % 8 {
            0 => FrameType::Handshake,
            1 => FrameType::Message,
            2 => FrameType::FileMeta,
            3 => FrameType::FileChunk,
            4 => FrameType::FileEnd,
            5 => FrameType::Ping,
            6 => FrameType::Pong,
            _ => FrameType::Close,
        }
    }

    proptest! {
        /// A byte stream of frames decodes back to the same frames in order
        #[test]
        fn stream_decodes_in_order(
            frames in prop::collection::vec(
                (any::<u8>(), prop::collection::vec(any::<u8>(), 0..256)),
                1..16,
            ),
        ) {
            let frames: Vec<Frame> = frames
                .into_iter()
                .map(|(tag, payload)| Frame::new(frame_type(tag), payload))
                .collect();
            let stream: Vec<u8> = frames.iter().flat_map(Frame::encode).collect();

            let mut offset = 0;
            let mut decoded = Vec::new();
            while let Some((frame, used)) =
                Frame::decode(&stream[offset..], MAX_FRAME_SIZE).unwrap()
            {
                decoded.push(frame);
                offset += used;
            }

            prop_assert_eq!(offset, stream.len());
            prop_assert_eq!(decoded, frames);
        }

        /// Any strict prefix of an encoded frame is incomplete, never an error
        #[test]
        fn prefix_is_incomplete(
            tag in any::<u8>(),
            payload in prop::collection::vec(any::<u8>(), 0..512),
            cut in any::<prop::sample::Index>(),
        ) {
            let bytes = Frame::new(frame_type(tag), payload).encode();
            let cut = cut.index(bytes.len());
            prop_assert!(Frame::decode(&bytes[..cut], MAX_FRAME_SIZE).unwrap().is_none());
        }

        /// Arbitrary input never panics the decoder
        #[test]
        fn decode_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            let _ = Frame::decode(&bytes, MAX_FRAME_SIZE);
        }

        /// Messages keep their text exactly
        #[test]
        fn message_text_preserved(text in "\\PC{0,500}") {
            let frame = Frame::message(&text);
            let (decoded, _) = Frame::decode(&frame.encode(), MAX_FRAME_SIZE).unwrap().unwrap();
            prop_assert_eq!(decoded.parse_text().unwrap(), text);
        }

        /// FILE_META carries size and name
        #[test]
        fn file_meta_fields_preserved(name in "[a-z]{1,20}\\.[a-z]{1,4}", size in any::<u64>()) {
            let meta = Frame::file_meta(&name, size).parse_file_meta().unwrap();
            prop_assert_eq!(meta.size, size);
            prop_assert_eq!(meta.name, name);
        }
    }
}

// ============================================================================
// Connection State Machine Properties
// ============================================================================

mod state_properties {
    use super::*;
    use peerlink_core::{PeerState, Session};

    const STATES: [PeerState; 6] = [
        PeerState::Idle,
        PeerState::Connecting,
        PeerState::Handshaking,
        PeerState::Connected,
        PeerState::Closing,
        PeerState::Failed,
    ];

    proptest! {
        /// A session only ever moves along legal transitions
        #[test]
        fn only_legal_transitions(targets in prop::collection::vec(0usize..6, 0..64)) {
            let mut session = Session::outbound(1, "alice", "bob");
            for target in targets {
                let from = session.state();
                let next = STATES[target];
                match session.transition_to(next) {
                    Ok(()) => {
                        prop_assert!(from.can_transition(next));
                        prop_assert_eq!(session.state(), next);
                    }
                    Err(_) => {
                        prop_assert!(!from.can_transition(next));
                        prop_assert_eq!(session.state(), from);
                    }
                }
            }
        }

        /// Connected is only reachable from Handshaking
        #[test]
        fn connected_requires_handshake(from in 0usize..6) {
            let from = STATES[from];
            prop_assert_eq!(
                from.can_transition(PeerState::Connected),
                from == PeerState::Handshaking
            );
        }
    }
}

// ============================================================================
// Transfer Properties
// ============================================================================

mod transfer_properties {
    use super::*;
    use peerlink_core::{TransferState, validate_message};
    use peerlink_files::{FileChunker, checksum, sanitize_file_name};

    proptest! {
        /// Reassembly reproduces the file for any chunk size
        #[test]
        fn chunked_reassembly(
            data in prop::collection::vec(any::<u8>(), 0..8192),
            chunk_size in 1usize..2048,
        ) {
            let mut state = TransferState::begin("f.bin", data.len() as u64, 1 << 20).unwrap();
            for chunk in FileChunker::with_chunk_size(chunk_size).chunks(&data) {
                state.push_chunk(chunk).unwrap();
            }
            let file = state.finish(&checksum(&data)).unwrap();
            prop_assert_eq!(file.data, data);
        }

        /// A flipped byte fails verification
        #[test]
        fn corruption_detected(
            data in prop::collection::vec(any::<u8>(), 1..4096),
            flip in any::<prop::sample::Index>(),
        ) {
            let expected = checksum(&data);
            let mut corrupted = data.clone();
            let at = flip.index(corrupted.len());
            corrupted[at] ^= 0xFF;

            let mut state = TransferState::begin("f.bin", data.len() as u64, 1 << 20).unwrap();
            state.push_chunk(&corrupted).unwrap();
            prop_assert!(state.finish(&expected).is_err());
        }

        /// Length cap counts characters, not bytes
        #[test]
        fn message_cap_counts_chars(len in 0usize..1000) {
            let text = "ü".repeat(len);
            prop_assert_eq!(validate_message(&text).is_ok(), len <= 500);
        }

        /// Sanitized names never contain path separators
        #[test]
        fn sanitized_names_are_plain(name in "\\PC{0,300}") {
            if let Some(clean) = sanitize_file_name(&name) {
                prop_assert!(!clean.contains('/'));
                prop_assert!(!clean.contains('\\'));
                prop_assert!(!clean.is_empty());
                prop_assert!(clean.len() <= 255);
            }
        }
    }
}
