mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{RecordingSink, Reply, ScriptedTransport, media_playlist, test_config, url};
use segplay_engine::hls::HlsPipeline;
use segplay_engine::{HeadlessProbe, MediaSource, Player, ProgressiveSource};

/// Plays until the presentation ends, letting buffering catch up while stalled.
async fn play_to_end(player: &mut Player) {
    player.play().unwrap();
    for _ in 0..200 {
        player.tick(Duration::from_millis(500)).unwrap();
        if player.ended() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("playback did not end, stuck at {}", player.current_time());
}

#[tokio::test(start_paused = true)]
async fn facade_plays_adaptive_and_progressive_alike() {
    let transport = ScriptedTransport::new();
    transport.script(
        "/vod/index.m3u8",
        vec![Reply::ok(media_playlist(0, &[6.0, 6.0, 6.0], "seg", true))],
    );
    let config = Arc::new(test_config());

    let (pipeline, _events) = HlsPipeline::new(
        url("/vod/index.m3u8"),
        config.clone(),
        transport.clone(),
        RecordingSink::new(),
    );
    let pipeline = Arc::new(pipeline);
    let runner = pipeline.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    let progressive = Arc::new(ProgressiveSource::new(
        url("/movie.mp4"),
        18.0,
        transport.clone(),
        config,
        RecordingSink::new(),
    ));

    let sources: [Arc<dyn MediaSource>; 2] = [pipeline.clone(), progressive.clone()];
    for source in sources {
        let mut player = Player::new(source, &HeadlessProbe);
        player.set_volume(0.5).unwrap();
        player.set_playback_rate(2.0).unwrap();
        for _ in 0..100 {
            if player.duration().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Seeking to the start loads whatever is not buffered yet.
        player.seek(0.0).await.unwrap();
        play_to_end(&mut player).await;

        assert!(player.ended());
        assert!(player.paused());
        assert_eq!(player.current_time(), 18.0);
        assert_eq!(player.duration(), Some(18.0));
        assert_eq!(player.volume(), 0.5);
        assert!(player.request_fullscreen().is_err());
    }

    assert!(progressive.is_loaded());
    assert_eq!(transport.request_count("/movie.mp4"), 1);

    pipeline.shutdown();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn seek_before_manifest_load_is_rejected() {
    let (pipeline, _events) = HlsPipeline::new(
        url("/vod/index.m3u8"),
        Arc::new(test_config()),
        ScriptedTransport::new(),
        RecordingSink::new(),
    );
    let mut player = Player::new(Arc::new(pipeline), &HeadlessProbe);
    assert!(matches!(
        player.seek(1.0).await,
        Err(segplay_engine::PlayerError::NotLoaded)
    ));
    assert!(player.duration().is_none());
}
