use std::time::Duration;
use tokio::time::sleep;

use super::EventSink;
use crate::chat_manager::types::ChunkChannel;

/// Replays `text` one character per `interval`. Returns false if cancelled part way.
pub async fn play_back(sink: &EventSink, channel: ChunkChannel, text: &str, interval: Duration) -> bool {
    for ch in text.chars() {
        tokio::select! {
            biased;
            _ = sink.cancelled() => return false,
            _ = sleep(interval) => {}
        }
        if !sink.chunk(channel, ch.to_string()) {
            return false;
        }
    }
    !sink.is_cancelled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportEventKind;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn test_emits_one_char_per_tick() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new("ex", tx, CancellationToken::new());

        assert!(play_back(&sink, ChunkChannel::Reasoning, "思考ok", Duration::from_millis(20)).await);
        drop(sink);

        let mut out = String::new();
        while let Some(event) = rx.recv().await {
            match event.kind {
                TransportEventKind::Chunk { text, channel } => {
                    assert_eq!(channel, ChunkChannel::Reasoning);
                    out.push_str(&text);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(out, "思考ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_further_chunks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let sink = EventSink::new("ex", tx, cancel.clone());

        let task = tokio::spawn(async move {
            play_back(&sink, ChunkChannel::Final, "abcdefghij", Duration::from_millis(30)).await
        });

        tokio::time::sleep(Duration::from_millis(95)).await;
        cancel.cancel();
        assert!(!task.await.unwrap());

        let mut received = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event.kind, TransportEventKind::Chunk { .. }));
            received += 1;
        }
        assert_eq!(received, 3);
    }
}
