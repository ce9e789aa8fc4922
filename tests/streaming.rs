//! Streaming chat protocol tests.
//!
//! Frame-level tests for the chunked reply body and split-invariance of
//! the decoder.

use floratalk::streaming::{ChunkDecoder, FrameEvent};

mod frame_parsing {
    use serde_json::Value;

    #[test]
    fn content_frame_shape() {
        let line = r#"data: {"content":"Yellow leaves usually mean overwatering."}"#;

        let data = line.strip_prefix("data: ").unwrap();
        let parsed: Value = serde_json::from_str(data).unwrap();

        assert!(parsed["content"].is_string());
        assert!(parsed.get("done").is_none());
        assert!(parsed.get("error").is_none());
    }

    #[test]
    fn done_frame_shape() {
        let line = r#"data: {"done":true}"#;

        let data = line.strip_prefix("data: ").unwrap();
        let parsed: Value = serde_json::from_str(data).unwrap();

        assert_eq!(parsed["done"], true);
    }

    #[test]
    fn error_frame_shape() {
        let line = r#"data: {"error":"conversation not found"}"#;

        let data = line.strip_prefix("data: ").unwrap();
        let parsed: Value = serde_json::from_str(data).unwrap();

        assert_eq!(parsed["error"], "conversation not found");
    }

    #[test]
    fn blank_lines_separate_frames() {
        let raw = "data: {\"content\":\"one\"}\n\ndata: {\"content\":\"two\"}\n\n";
        let frames: Vec<&str> = raw.lines().filter(|l| l.starts_with("data:")).collect();

        assert_eq!(frames.len(), 2);
    }
}

mod split_invariance {
    use super::*;

    fn assemble(events: &[FrameEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                FrameEvent::Content(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn torn_content_frame_then_done() {
        let chunks: [&[u8]; 3] = [
            b"data: {\"content\":\"Hel",
            b"lo\"}\n\n",
            b"data: {\"done\":true}\n\n",
        ];

        let mut decoder = ChunkDecoder::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.feed(chunk));
        }

        assert_eq!(events.len(), 2);
        assert_eq!(assemble(&events), "Hello");
        assert_eq!(events.last(), Some(&FrameEvent::Done));
    }

    #[test]
    fn all_two_fragment_splits_agree() {
        let body = "data: {\"content\":\"Prune the dead fronds, \"}\n\ndata: {\"content\":\"then water deeply 🌿\"}\n\ndata: {\"done\":true}\n\n".as_bytes();
        let expected = "Prune the dead fronds, then water deeply 🌿";

        for cut in 0..=body.len() {
            let mut decoder = ChunkDecoder::new();
            let mut events = decoder.feed(&body[..cut]);
            events.extend(decoder.feed(&body[cut..]));

            assert_eq!(assemble(&events), expected, "cut at byte {cut}");
            assert_eq!(events.last(), Some(&FrameEvent::Done), "cut at byte {cut}");
        }
    }

    #[test]
    fn byte_at_a_time_delivery_agrees() {
        let body = b"data: {\"content\":\"Repot in spring.\"}\n\ndata: {\"done\":true}\n\n";

        let mut decoder = ChunkDecoder::new();
        let mut events = Vec::new();
        for byte in body.iter() {
            events.extend(decoder.feed(std::slice::from_ref(byte)));
        }

        assert_eq!(assemble(&events), "Repot in spring.");
    }

    #[test]
    fn terminal_events_are_mutually_exclusive_in_order() {
        // A server bug that emits frames after `done` still reaches the
        // decoder; the session layer stops at the first terminal event, so
        // what matters here is that order of arrival is preserved.
        let mut decoder = ChunkDecoder::new();
        let events = decoder.feed(
            b"data: {\"content\":\"a\"}\ndata: {\"done\":true}\ndata: {\"content\":\"late\"}\n",
        );

        assert_eq!(
            events,
            vec![
                FrameEvent::Content("a".to_string()),
                FrameEvent::Done,
                FrameEvent::Content("late".to_string()),
            ]
        );
        let first_terminal = events
            .iter()
            .position(|e| !matches!(e, FrameEvent::Content(_)))
            .unwrap();
        assert_eq!(first_terminal, 1);
    }
}
