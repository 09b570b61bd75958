//! Cross-module behavior: the downlink path from sentence blobs to paced
//! frames, barge-in, and the dispatcher contract as the orchestrator
//! exercises it.

use std::sync::Arc;

use voxgate::audio::{AudioQueue, ClockedSource, Generator, FRAME_BYTES, FRAME_SAMPLES};
use voxgate::session::split_sentences;

/// Two enqueued "sentences" drain through the clocked source in order,
/// followed by silence — the shape of every spoken reply.
#[tokio::test(start_paused = true)]
async fn downlink_replays_blobs_in_order_then_goes_silent() {
    let queue = Arc::new(AudioQueue::new());
    let source = ClockedSource::new();
    source.set_generator(Generator::Fifo(queue.clone()));

    // 1.5 frames of 0x11, then one frame of 0x22.
    queue.enqueue(vec![0x11; FRAME_BYTES + FRAME_BYTES / 2]);
    queue.enqueue(vec![0x22; FRAME_BYTES]);

    let first = source.next_frame().await;
    assert!(first.pcm.iter().all(|&b| b == 0x11));

    let second = source.next_frame().await;
    assert!(second.pcm[..FRAME_BYTES / 2].iter().all(|&b| b == 0x11));
    assert!(second.pcm[FRAME_BYTES / 2..].iter().all(|&b| b == 0x22));

    let third = source.next_frame().await;
    assert!(third.pcm[..FRAME_BYTES / 2].iter().all(|&b| b == 0x22));
    assert!(third.pcm[FRAME_BYTES / 2..].iter().all(|&b| b == 0));

    // Queue exhausted: pure silence, PTS still advancing.
    let fourth = source.next_frame().await;
    assert!(fourth.pcm.iter().all(|&b| b == 0));
    assert_eq!(fourth.pts, 3 * FRAME_SAMPLES as i64);
}

/// Barge-in mid-stream: clearing the queue and detaching the generator
/// silences the downlink on the very next frame.
#[tokio::test(start_paused = true)]
async fn barge_in_silences_within_one_frame() {
    let queue = Arc::new(AudioQueue::new());
    let source = ClockedSource::new();
    source.set_generator(Generator::Fifo(queue.clone()));
    queue.enqueue(vec![0x7F; FRAME_BYTES * 100]); // a long reply

    let speaking = source.next_frame().await;
    assert!(speaking.pcm.iter().any(|&b| b != 0));

    // What stop_speaking does.
    queue.clear();
    source.clear_generator();

    let after = source.next_frame().await;
    assert!(after.pcm.iter().all(|&b| b == 0));
    assert_eq!(queue.available(), 0);
}

/// A late blob from in-flight synthesis lands in the queue but is never
/// read once the generator is detached.
#[tokio::test(start_paused = true)]
async fn late_synthesis_after_barge_in_stays_unread() {
    let queue = Arc::new(AudioQueue::new());
    let source = ClockedSource::new();
    source.set_generator(Generator::Fifo(queue.clone()));

    queue.clear();
    source.clear_generator();
    queue.enqueue(vec![0x55; FRAME_BYTES]); // in-flight sentence arriving late

    let frame = source.next_frame().await;
    assert!(frame.pcm.iter().all(|&b| b == 0));
    assert_eq!(queue.available(), FRAME_BYTES);
}

#[test]
fn sentence_split_matches_spoken_phrasing() {
    assert_eq!(
        split_sentences("Hello there. How are you?"),
        vec!["Hello there.", "How are you?"]
    );
    assert_eq!(split_sentences("no punctuation"), vec!["no punctuation"]);
    assert!(split_sentences("").is_empty());
}

mod dispatcher {
    use serde_json::json;
    use voxgate::agent::tools::{dispatch, ToolContext, KNOWN_TOOLS};
    use voxgate::config::Config;

    fn ctx() -> ToolContext {
        ToolContext::new(&Config::default())
    }

    /// The dispatcher result is always a string, whatever goes in.
    #[tokio::test]
    async fn dispatch_never_fails() {
        let cases = vec![
            ("search_notes", json!({"query": "recipe"})),
            ("search_notes", json!("{\"query\": \"recipe\"}")),
            ("search_notes", json!("{broken")),
            ("search_notes", json!({})),
            ("no_such_tool", json!({})),
            ("check_calendar", json!(null)),
            ("check_calendar", json!(42)),
        ];
        for (name, args) in cases {
            let out = dispatch(name, args.clone(), &ctx()).await;
            assert!(!out.is_empty(), "empty result for {name} {args}");
        }
    }

    #[tokio::test]
    async fn unknown_tool_error_enumerates_the_registry() {
        let out = dispatch("mystery", json!({}), &ctx()).await;
        for name in KNOWN_TOOLS {
            assert!(out.contains(name));
        }
    }
}

mod fallback_parser {
    use voxgate::agent::orchestrator::parse_text_tool_calls;

    /// End-to-end shape of scenario: a model that answers with
    /// `gc_search {"query": "weather in Austin"}` as plain text gets its
    /// call extracted and renamed for the dispatcher.
    #[test]
    fn text_emitted_calls_resolve_through_aliases() {
        let calls =
            parse_text_tool_calls(r#"Let me look that up: gc_search {"query": "weather in Austin"}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "web_search");
        assert_eq!(calls[0].function.arguments["query"], "weather in Austin");
    }
}
