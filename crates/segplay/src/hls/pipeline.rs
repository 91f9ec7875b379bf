// HLS Pipeline: drives playlist loading, ABR, segment fetching and recovery
// for one adaptive presentation.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{FetchError, PlayerError};
use crate::hls::abr::{AbrDecision, AbrSelector, SelectionMode, SelectorState};
use crate::hls::buffer::{BufferTracker, BufferedRange};
use crate::hls::config::HlsConfig;
use crate::hls::events::PlayerEvent;
use crate::hls::fetcher::{FaultObserver, FetchedSegment, SegmentFetcher};
use crate::hls::loader::PlaylistLoader;
use crate::hls::metrics::PipelineMetrics;
use crate::hls::playlist::{InitSegment, Manifest, SegmentRef};
use crate::hls::recovery::{ErrorRecovery, FaultRecord, FaultStage, RecoveryAction, RecoveryState};
use crate::source::{MediaSink, MediaSource};
use crate::transport::Transport;

/// Tolerance when comparing the buffered edge with the end of the timeline.
const END_EPSILON: f64 = 0.001;

/// The variant currently fed to the sink. Each activation, and each flush of
/// the same variant, gets a fresh generation with its own cancellation token.
struct ActiveVariant {
    index: usize,
    generation: u64,
    token: CancellationToken,
    /// Init segment last handed to the sink
    init: Option<Arc<InitSegment>>,
    init_pending: bool,
}

struct PipelineState {
    manifest: Option<Manifest>,
    buffer: BufferTracker,
    abr: AbrSelector,
    recovery: ErrorRecovery,
    playhead: f64,
    start_position: Option<f64>,
    active: Option<ActiveVariant>,
    next_generation: u64,
    /// Sequence numbers requested for the active generation
    in_flight: BTreeSet<u64>,
    pending_reload: bool,
    refresh_failures: u32,
    end_of_stream: bool,
    terminal: Option<PlayerError>,
}

/// State shared with the fault observer handed to the fetcher.
struct Shared {
    state: Mutex<PipelineState>,
    events: mpsc::UnboundedSender<PlayerEvent>,
    metrics: Arc<PipelineMetrics>,
}

impl Shared {
    fn emit(&self, event: PlayerEvent) {
        // A host that dropped the receiver is not interested in events.
        let _ = self.events.send(event);
    }

    /// Feeds a fault to the recovery state machine and reports the outcome.
    fn raise(&self, state: &mut PipelineState, fault: FaultRecord) -> RecoveryAction {
        let before = state.recovery.state();
        self.emit(PlayerEvent::FaultRaised {
            kind: fault.kind,
            stage: fault.stage,
            fatal: fault.fatal,
            message: fault.message.clone(),
        });
        let action = state.recovery.on_fault(fault);
        let after = state.recovery.state();
        if before != after {
            self.emit(PlayerEvent::RecoveryStateChanged {
                from: before,
                to: after,
            });
        }
        if action == RecoveryAction::Terminate && state.terminal.is_none() {
            let reason = state
                .recovery
                .terminal_reason()
                .unwrap_or("playback terminated")
                .to_string();
            state.terminal = Some(PlayerError::terminated(reason.clone()));
            self.emit(PlayerEvent::Terminated { reason });
        }
        action
    }

    fn recovered(&self, state: &mut PipelineState) {
        let before = state.recovery.state();
        if state.recovery.on_recovered() {
            if before.is_recovering() {
                self.metrics.record_recovery();
            }
            self.emit(PlayerEvent::RecoveryStateChanged {
                from: before,
                to: RecoveryState::Healthy,
            });
        }
    }
}

enum Job {
    Init(Arc<InitSegment>),
    Segment(SegmentRef),
}

struct Ticket {
    generation: u64,
    variant: usize,
    token: CancellationToken,
    job: Job,
}

enum Fetched {
    Init { init: Arc<InitSegment>, data: bytes::Bytes },
    Segment(FetchedSegment),
}

struct Completion {
    generation: u64,
    variant: usize,
    sequence: Option<u64>,
    result: Result<Fetched, FetchError>,
}

enum Plan {
    Fetch(Ticket),
    LoadVariant { index: usize, uri: Url, decision: AbrDecision },
    Reload { index: usize, uri: Url },
    Idle,
    Stop,
}

/// The adaptive source: one manifest, one active variant, a forward buffer
/// kept between the playhead and `max_buffer_length` ahead of it.
///
/// [`HlsPipeline::run`] drives fetching; the [`MediaSource`] methods are
/// safe to call concurrently from the facade.
pub struct HlsPipeline {
    url: Url,
    config: Arc<HlsConfig>,
    loader: PlaylistLoader,
    fetcher: SegmentFetcher,
    sink: Arc<dyn MediaSink>,
    shared: Arc<Shared>,
    token: CancellationToken,
    wake: Notify,
    /// Signalled whenever a fetch completes or in-flight work is dropped.
    settled: Notify,
}

impl HlsPipeline {
    pub fn new(
        url: Url,
        config: Arc<HlsConfig>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn MediaSink>,
    ) -> (Self, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let metrics = Arc::new(PipelineMetrics::new());
        let shared = Arc::new(Shared {
            state: Mutex::new(PipelineState {
                manifest: None,
                buffer: BufferTracker::new(),
                abr: AbrSelector::new(config.abr_config.clone()),
                recovery: ErrorRecovery::new(&config.recovery_config),
                playhead: 0.0,
                start_position: None,
                active: None,
                next_generation: 0,
                in_flight: BTreeSet::new(),
                pending_reload: false,
                refresh_failures: 0,
                end_of_stream: false,
                terminal: None,
            }),
            events,
            metrics: metrics.clone(),
        });

        let observer: FaultObserver = {
            let shared = shared.clone();
            Arc::new(move |fault: FaultRecord| {
                let mut state = shared.state.lock();
                shared.raise(&mut state, fault);
            })
        };

        let pipeline = Self {
            url,
            loader: PlaylistLoader::new(transport.clone(), config.clone(), metrics.clone()),
            fetcher: SegmentFetcher::new(transport, config.fetcher_config.clone(), metrics)
                .with_fault_observer(observer),
            config,
            sink,
            shared,
            token: CancellationToken::new(),
            wake: Notify::new(),
            settled: Notify::new(),
        };
        (pipeline, receiver)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.shared.metrics.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stops the run loop and cancels every outstanding request.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn manifest(&self) -> Option<Manifest> {
        self.shared.state.lock().manifest.clone()
    }

    pub fn current_variant(&self) -> Option<usize> {
        self.shared.state.lock().active.as_ref().map(|a| a.index)
    }

    pub fn recovery_state(&self) -> RecoveryState {
        self.shared.state.lock().recovery.state()
    }

    pub fn selector_state(&self) -> SelectorState {
        self.shared.state.lock().abr.state().clone()
    }

    pub fn estimate_bps(&self) -> u64 {
        self.shared.state.lock().abr.estimate_bps()
    }

    /// Pins the variant at `index`, disabling automatic selection until
    /// [`Self::set_auto_level`]. Before the manifest is loaded the index is
    /// accepted as is and clamped later.
    pub fn pin_variant(&self, index: usize) -> Result<(), PlayerError> {
        let mut state = self.shared.state.lock();
        if let Some(err) = &state.terminal {
            return Err(err.clone());
        }
        if let Some(manifest) = &state.manifest
            && index >= manifest.len()
        {
            return Err(PlayerError::UnknownVariant {
                index,
                count: manifest.len(),
            });
        }
        state.abr.pin(index);
        drop(state);
        self.wake.notify_one();
        Ok(())
    }

    pub fn set_auto_level(&self) {
        self.shared.state.lock().abr.set_auto();
        self.wake.notify_one();
    }

    pub fn selection_mode(&self) -> SelectionMode {
        self.shared.state.lock().abr.mode()
    }

    /// Drives the pipeline until it is shut down or terminated.
    pub async fn run(&self) -> Result<(), PlayerError> {
        let result = self.run_inner().await;
        // Nothing may outlive the loop that owns the in-flight futures.
        if let Some(active) = self.shared.state.lock().active.as_ref() {
            active.token.cancel();
        }
        match &result {
            Ok(()) => info!(url = %self.url, "Pipeline stopped"),
            Err(err) => warn!(url = %self.url, error = %err, "Pipeline ended with error"),
        }
        result
    }

    async fn run_inner(&self) -> Result<(), PlayerError> {
        self.bootstrap().await?;

        let mut in_flight: FuturesUnordered<BoxFuture<'_, Completion>> = FuturesUnordered::new();
        let mut next_refresh = self.next_refresh_deadline();

        loop {
            if let Some(err) = self.terminal_error() {
                return Err(err);
            }
            if self.token.is_cancelled() {
                return Ok(());
            }

            loop {
                match self.plan() {
                    Plan::Fetch(ticket) => in_flight.push(self.fetch(ticket)),
                    Plan::LoadVariant {
                        index,
                        uri,
                        decision,
                    } => self.load_variant(index, &uri, decision).await,
                    Plan::Reload { index, uri } => {
                        self.reload(index, &uri).await;
                        next_refresh = self.next_refresh_deadline();
                    }
                    Plan::Idle => break,
                    Plan::Stop => break,
                }
                if self.token.is_cancelled() {
                    break;
                }
            }
            if let Some(err) = self.terminal_error() {
                return Err(err);
            }

            let refresh = async move {
                match next_refresh {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.token.cancelled() => {}
                Some(done) = in_flight.next(), if !in_flight.is_empty() => self.complete(done),
                _ = refresh => {
                    self.refresh_live().await;
                    next_refresh = self.next_refresh_deadline();
                }
                _ = self.wake.notified() => {}
            }
        }
    }

    /// Loads the manifest and the media playlist of the first variant,
    /// recovering from network faults within the recovery budget.
    async fn bootstrap(&self) -> Result<(), PlayerError> {
        loop {
            match self.load_initial().await {
                Ok(()) => {
                    let mut state = self.shared.state.lock();
                    self.shared.recovered(&mut state);
                    return Ok(());
                }
                Err(_) if self.token.is_cancelled() => return Ok(()),
                Err(err) => {
                    let mut state = self.shared.state.lock();
                    let fault = fault_for(FaultStage::Playlist, &err);
                    if self.shared.raise(&mut state, fault) == RecoveryAction::Terminate {
                        return Err(state.terminal.clone().unwrap_or(err));
                    }
                }
            }
        }
    }

    async fn load_initial(&self) -> Result<(), PlayerError> {
        let mut manifest = self.loader.load_manifest(&self.url, &self.token).await?;

        let (index, decision) = {
            let mut state = self.shared.state.lock();
            let estimate = state.abr.estimate_bps();
            let decision =
                state
                    .abr
                    .select_variant_at(&manifest, estimate, 0.0, Instant::now());
            (decision.index, decision)
        };

        if !manifest.variants[index].is_loaded() {
            let uri = manifest.variants[index].uri.clone();
            let timeline = self.loader.load_media(&uri, &self.token).await?;
            manifest.attach_media(index, timeline);
        }

        let mut state = self.shared.state.lock();
        let timeline = manifest.variants[index]
            .timeline()
            .ok_or(PlayerError::NotLoaded)?;
        let start = if manifest.is_live {
            let behind = self.config.playlist_config.live_start_offset * manifest.target_duration;
            (timeline.end_time() - behind).max(timeline.start_time())
        } else {
            timeline.start_time()
        };

        info!(
            variants = manifest.len(),
            live = manifest.is_live,
            variant = index,
            start,
            "Manifest loaded"
        );
        self.shared.emit(PlayerEvent::ManifestLoaded {
            variants: manifest.len(),
            is_live: manifest.is_live,
            duration: manifest.duration().filter(|d| d.is_finite()),
        });

        if state.start_position.is_none() {
            state.playhead = start;
            state.start_position = Some(start);
        }
        state.manifest = Some(manifest);
        self.activate(&mut state, index, decision);
        Ok(())
    }

    fn next_generation(&self, state: &mut PipelineState) -> (u64, CancellationToken) {
        let generation = state.next_generation;
        state.next_generation += 1;
        (generation, self.token.child_token())
    }

    /// Makes `index` the active variant. Requests for the previous variant are
    /// cancelled; anything they still deliver is discarded.
    fn activate(&self, state: &mut PipelineState, index: usize, decision: AbrDecision) {
        let previous = state.active.take();
        if let Some(old) = &previous {
            old.token.cancel();
        }
        state.in_flight.clear();
        self.settled.notify_waiters();
        let (generation, token) = self.next_generation(state);
        state.active = Some(ActiveVariant {
            index,
            generation,
            token,
            init: None,
            init_pending: false,
        });

        let from = previous.map(|p| p.index);
        if from.is_some() {
            self.shared.metrics.record_switch();
        }
        let bandwidth = state
            .manifest
            .as_ref()
            .and_then(|m| m.variant(index))
            .map_or(0, |v| v.bandwidth);
        info!(?from, to = index, bandwidth, reason = ?decision.reason, "Variant switched");
        self.shared.emit(PlayerEvent::VariantSwitched {
            from,
            to: index,
            bandwidth,
            reason: decision.reason,
        });
    }

    /// Starts a new generation of the active variant, dropping everything in flight.
    fn flush(&self, state: &mut PipelineState) {
        let (generation, token) = self.next_generation(state);
        if let Some(active) = state.active.as_mut() {
            active.token.cancel();
            active.generation = generation;
            active.token = token;
            active.init = None;
            active.init_pending = false;
        }
        state.in_flight.clear();
        self.settled.notify_waiters();
    }

    fn apply(&self, state: &mut PipelineState, action: RecoveryAction) {
        match action {
            RecoveryAction::Continue => {}
            RecoveryAction::ReloadPlaylist => state.pending_reload = true,
            RecoveryAction::ResetMedia => {
                self.sink.reset();
                state.buffer.clear();
                self.flush(state);
                let resume_at = state.playhead;
                info!(resume_at, "Media pipeline reset");
                self.shared
                    .emit(PlayerEvent::MediaResetRequested { resume_at });
            }
            RecoveryAction::Terminate => {
                if let Some(active) = &state.active {
                    active.token.cancel();
                }
                self.token.cancel();
            }
        }
        self.wake.notify_one();
    }

    /// Decides the next step while holding the state lock. Never awaits.
    fn plan(&self) -> Plan {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if state.terminal.is_some() {
            return Plan::Stop;
        }
        let Some(manifest) = state.manifest.as_ref() else {
            return Plan::Idle;
        };
        let Some(active) = state.active.as_ref() else {
            return Plan::Idle;
        };

        if state.pending_reload {
            let Some(variant) = manifest.variant(active.index) else {
                return Plan::Idle;
            };
            return Plan::Reload {
                index: active.index,
                uri: variant.uri.clone(),
            };
        }

        let back = state.playhead - self.config.buffer_config.back_buffer_length;
        if back > 0.0 {
            state.buffer.evict(back);
        }

        let ahead = state.buffer.buffered_ahead_of(state.playhead);
        if ahead >= self.config.buffer_config.max_buffer_length {
            return Plan::Idle;
        }

        // Evaluated ahead of the concurrency limit: a switch cancels in-flight requests.
        let estimate = state.abr.estimate_bps();
        let decision = state
            .abr
            .select_variant_at(manifest, estimate, ahead, Instant::now());
        if decision.index != active.index {
            let Some(target) = manifest.variant(decision.index) else {
                return Plan::Idle;
            };
            // A live variant that is not being refreshed goes stale.
            if target.is_loaded() && !manifest.is_live {
                self.activate(state, decision.index, decision);
            } else {
                return Plan::LoadVariant {
                    index: decision.index,
                    uri: target.uri.clone(),
                    decision,
                };
            }
        }

        let (Some(manifest), Some(active)) = (state.manifest.as_ref(), state.active.as_mut()) else {
            return Plan::Idle;
        };
        if active.init_pending
            || state.in_flight.len() >= self.config.fetcher_config.max_concurrent_fetches.max(1)
        {
            return Plan::Idle;
        }
        let Some(variant) = manifest.variant(active.index) else {
            return Plan::Idle;
        };
        let Some(timeline) = variant.timeline() else {
            return Plan::Idle;
        };

        let edge = state.playhead + ahead;
        let limit = state.playhead + self.config.buffer_config.max_buffer_length;
        let first = timeline.segments.partition_point(|s| s.end() <= edge);
        let next = timeline.segments[first..]
            .iter()
            .take_while(|s| s.start < limit)
            .find(|s| {
                !state.in_flight.contains(&s.sequence) && !state.buffer.covers(s.time_range())
            })
            .cloned();

        let Some(segment) = next else {
            let finished = !manifest.is_live && edge + END_EPSILON >= timeline.end_time();
            if finished && state.in_flight.is_empty() && !state.end_of_stream {
                state.end_of_stream = true;
                info!(end = timeline.end_time(), "End of stream buffered");
                self.shared.emit(PlayerEvent::EndOfStream);
            }
            return Plan::Idle;
        };

        if let Some(init) = &segment.init
            && active.init.as_ref() != Some(init)
        {
            active.init_pending = true;
            return Plan::Fetch(Ticket {
                generation: active.generation,
                variant: active.index,
                token: active.token.clone(),
                job: Job::Init(init.clone()),
            });
        }

        state.in_flight.insert(segment.sequence);
        state.end_of_stream = false;
        Plan::Fetch(Ticket {
            generation: active.generation,
            variant: active.index,
            token: active.token.clone(),
            job: Job::Segment(segment),
        })
    }

    fn fetch(&self, ticket: Ticket) -> BoxFuture<'_, Completion> {
        async move {
            let Ticket {
                generation,
                variant,
                token,
                job,
            } = ticket;
            match job {
                Job::Init(init) => {
                    let result = self
                        .fetcher
                        .fetch_init_segment(variant, &init, &token)
                        .await
                        .map(|data| Fetched::Init { init, data });
                    Completion {
                        generation,
                        variant,
                        sequence: None,
                        result,
                    }
                }
                Job::Segment(segment) => {
                    let sequence = segment.sequence;
                    let result = self
                        .fetcher
                        .fetch_segment_ref(variant, segment, &token)
                        .await
                        .map(Fetched::Segment);
                    Completion {
                        generation,
                        variant,
                        sequence: Some(sequence),
                        result,
                    }
                }
            }
        }
        .boxed()
    }

    /// Applies a finished fetch. Results from a superseded generation are
    /// dropped without touching the buffer or the sink.
    fn complete(&self, done: Completion) {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        self.settled.notify_waiters();
        let current = state.active.as_ref().map(|a| a.generation);
        if current != Some(done.generation) {
            match &done.result {
                Ok(_) => {
                    self.shared.metrics.record_discarded();
                    warn!(
                        variant = done.variant,
                        sequence = ?done.sequence,
                        "Discarding completion for superseded variant"
                    );
                }
                Err(err) => debug!(variant = done.variant, error = %err, "Superseded fetch ended"),
            }
            return;
        }
        if let Some(sequence) = done.sequence {
            state.in_flight.remove(&sequence);
        }

        match done.result {
            Ok(Fetched::Init { init, data }) => {
                if let Some(active) = state.active.as_mut() {
                    active.init_pending = false;
                }
                if let Err(err) = self.sink.append_init(done.variant, &data) {
                    let action = self
                        .shared
                        .raise(state, FaultRecord::media(err.fatal, err.to_string()));
                    self.apply(state, action);
                    return;
                }
                if let Some(active) = state.active.as_mut() {
                    active.init = Some(init);
                }
                self.shared.emit(PlayerEvent::InitSegmentLoaded {
                    variant: done.variant,
                    bytes: data.len() as u64,
                });
            }
            Ok(Fetched::Segment(fetched)) => {
                let bytes = fetched.data.len() as u64;
                state.abr.record_throughput(bytes, fetched.elapsed);
                if let Err(err) =
                    self.sink
                        .append_segment(done.variant, &fetched.segment, &fetched.data)
                {
                    let action = self
                        .shared
                        .raise(state, FaultRecord::media(err.fatal, err.to_string()));
                    self.apply(state, action);
                    return;
                }
                let range = fetched.segment.time_range();
                state.buffer.append(range);
                debug!(
                    variant = done.variant,
                    sequence = fetched.segment.sequence,
                    start = range.start,
                    end = range.end,
                    "Segment buffered"
                );
                self.shared.emit(PlayerEvent::SegmentBuffered {
                    variant: done.variant,
                    sequence: fetched.segment.sequence,
                    start: range.start,
                    end: range.end,
                    bytes,
                    elapsed: fetched.elapsed,
                });
                self.shared.recovered(state);
            }
            Err(err) if err.is_cancelled() => {
                if let Some(active) = state.active.as_mut()
                    && done.sequence.is_none()
                {
                    active.init_pending = false;
                }
            }
            Err(err) => {
                if let Some(active) = state.active.as_mut()
                    && done.sequence.is_none()
                {
                    active.init_pending = false;
                }
                let fault = FaultRecord::from_fetch_error(FaultStage::Fetcher, &err, true);
                let action = self.shared.raise(state, fault);
                self.apply(state, action);
            }
        }
        drop(guard);
        self.wake.notify_one();
    }

    async fn load_variant(&self, index: usize, uri: &Url, decision: AbrDecision) {
        match self.loader.load_media(uri, &self.token).await {
            Ok(timeline) => {
                let mut state = self.shared.state.lock();
                let attached = state
                    .manifest
                    .as_mut()
                    .is_some_and(|m| m.attach_media(index, timeline));
                if attached {
                    self.activate(&mut state, index, decision);
                }
            }
            Err(_) if self.token.is_cancelled() => {}
            Err(err) => {
                let mut state = self.shared.state.lock();
                let action = self
                    .shared
                    .raise(&mut state, fault_for(FaultStage::Playlist, &err));
                self.apply(&mut state, action);
            }
        }
    }

    /// Reloads the active variant's media playlist after a fatal network fault.
    async fn reload(&self, index: usize, uri: &Url) {
        info!(variant = index, "Reloading playlist");
        match self.loader.load_media(uri, &self.token).await {
            Ok(timeline) => {
                let mut state = self.shared.state.lock();
                state.pending_reload = false;
                if let Some(manifest) = state.manifest.as_mut() {
                    if manifest.is_live {
                        manifest.merge_media(index, timeline);
                    } else {
                        manifest.attach_media(index, timeline);
                    }
                }
                // Healthy again once the next segment lands.
            }
            Err(_) if self.token.is_cancelled() => {}
            Err(err) => {
                let mut state = self.shared.state.lock();
                let action = self
                    .shared
                    .raise(&mut state, fault_for(FaultStage::Playlist, &err));
                self.apply(&mut state, action);
            }
        }
    }

    fn next_refresh_deadline(&self) -> Option<tokio::time::Instant> {
        let state = self.shared.state.lock();
        let manifest = state.manifest.as_ref()?;
        if !manifest.is_live {
            return None;
        }
        let half_target = Duration::from_secs_f64((manifest.target_duration / 2.0).max(0.0));
        let interval = half_target.max(self.config.playlist_config.live_refresh_interval);
        Some(tokio::time::Instant::now() + interval)
    }

    /// Re-fetches the active live playlist and merges it.
    async fn refresh_live(&self) {
        let target = {
            let state = self.shared.state.lock();
            state.active.as_ref().and_then(|active| {
                let manifest = state.manifest.as_ref()?;
                let variant = manifest.variant(active.index)?;
                manifest.is_live.then(|| (active.index, variant.uri.clone()))
            })
        };
        let Some((index, uri)) = target else {
            return;
        };

        let result = self.loader.load_media(&uri, &self.token).await;
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        match result {
            Ok(update) => {
                state.refresh_failures = 0;
                let Some(report) = state
                    .manifest
                    .as_mut()
                    .and_then(|m| m.merge_media(index, update))
                else {
                    return;
                };
                self.shared.metrics.record_refresh();
                let media_sequence = state
                    .manifest
                    .as_ref()
                    .and_then(|m| m.variant(index))
                    .and_then(|v| v.timeline())
                    .map_or(0, |t| t.media_sequence);
                debug!(
                    variant = index,
                    media_sequence,
                    appended = report.appended,
                    evicted = report.evicted,
                    "Playlist refreshed"
                );
                self.shared.emit(PlayerEvent::PlaylistRefreshed {
                    variant: index,
                    media_sequence,
                    appended: report.appended,
                    evicted: report.evicted,
                });
                for gap in &report.gaps {
                    self.shared.emit(PlayerEvent::SequenceGap {
                        variant: index,
                        expected: gap.expected,
                        found: gap.found,
                    });
                }
                if report.ended {
                    info!(variant = index, "Live stream ended");
                }
                drop(guard);
                self.wake.notify_one();
            }
            Err(_) if self.token.is_cancelled() => {}
            Err(err) => {
                state.refresh_failures += 1;
                let limit = self.config.playlist_config.live_max_refresh_failures;
                let fatal = state.refresh_failures > limit;
                warn!(
                    variant = index,
                    failures = state.refresh_failures,
                    limit,
                    error = %err,
                    "Live playlist refresh failed"
                );
                let mut fault = fault_for(FaultStage::Playlist, &err);
                fault.fatal = fault.fatal || fatal;
                if fatal {
                    state.refresh_failures = 0;
                }
                let action = self.shared.raise(state, fault);
                self.apply(state, action);
            }
        }
    }

    fn terminal_error(&self) -> Option<PlayerError> {
        self.shared.state.lock().terminal.clone()
    }
}

/// Classifies a load error. Parse errors cannot be fixed by retrying.
fn fault_for(stage: FaultStage, err: &PlayerError) -> FaultRecord {
    match err {
        PlayerError::Fetch(fetch) => FaultRecord::from_fetch_error(stage, fetch, true),
        other => FaultRecord::other(stage, other.to_string()),
    }
}

#[async_trait]
impl MediaSource for HlsPipeline {
    fn duration(&self) -> Option<f64> {
        self.shared
            .state
            .lock()
            .manifest
            .as_ref()
            .and_then(Manifest::duration)
    }

    fn seekable_range(&self) -> Option<BufferedRange> {
        let state = self.shared.state.lock();
        let manifest = state.manifest.as_ref()?;
        let timeline = state
            .active
            .as_ref()
            .and_then(|a| manifest.variant(a.index))
            .and_then(|v| v.timeline())
            .or_else(|| manifest.loaded_timeline())?;
        Some(BufferedRange::new(timeline.start_time(), timeline.end_time()))
    }

    fn start_position(&self) -> Option<f64> {
        self.shared.state.lock().start_position
    }

    fn buffered_ahead_of(&self, time: f64) -> f64 {
        self.shared.state.lock().buffer.buffered_ahead_of(time)
    }

    fn buffered_ranges(&self) -> Vec<BufferedRange> {
        self.shared.state.lock().buffer.ranges()
    }

    fn set_playhead(&self, time: f64) {
        self.shared.state.lock().playhead = time;
        self.wake.notify_one();
    }

    /// Fetches the segment covering `time` directly, outside the run loop's
    /// schedule, so a seek into unbuffered media resolves without waiting
    /// behind the forward buffer. A segment (or init segment) the run loop is
    /// already fetching is awaited instead of requested twice.
    async fn ensure_buffered(&self, time: f64) -> Result<(), PlayerError> {
        loop {
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            match self.seek_step(time)? {
                SeekStep::Ready => {
                    self.wake.notify_one();
                    return Ok(());
                }
                SeekStep::Wait => {
                    self.wake.notify_one();
                    debug!(time, "Waiting for in-flight segment");
                    tokio::select! {
                        _ = self.token.cancelled() => {
                            return match self.terminal_error() {
                                Some(err) => Err(err),
                                None => Ok(()),
                            };
                        }
                        _ = &mut settled => {}
                    }
                }
                SeekStep::Fetch { init, segment } => {
                    debug!(time, "Fetching segment out of band");
                    if let Some(init) = init
                        && let Err(err) = self.fetch_now(init).await
                    {
                        self.release(&segment);
                        return Err(err);
                    }
                    self.fetch_now(segment).await?;
                    return match self.terminal_error() {
                        Some(err) => Err(err),
                        None => Ok(()),
                    };
                }
            }
        }
    }

    fn terminal_error(&self) -> Option<PlayerError> {
        HlsPipeline::terminal_error(self)
    }
}

enum SeekStep {
    Ready,
    Wait,
    Fetch {
        init: Option<Ticket>,
        segment: Ticket,
    },
}

impl HlsPipeline {
    /// Decides how a seek to `time` gets its media, claiming the covering
    /// segment when nothing is fetching it yet.
    fn seek_step(&self, time: f64) -> Result<SeekStep, PlayerError> {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if let Some(err) = &state.terminal {
            return Err(err.clone());
        }
        state.playhead = time;
        if state.buffer.contains(time) {
            return Ok(SeekStep::Ready);
        }
        let manifest = state.manifest.as_ref().ok_or(PlayerError::NotLoaded)?;
        let active = state.active.as_mut().ok_or(PlayerError::NotLoaded)?;
        let Some(segment) = manifest
            .variant(active.index)
            .and_then(|v| v.timeline())
            .and_then(|t| t.segment_at(time))
            .cloned()
        else {
            return Ok(SeekStep::Ready);
        };

        let needs_init = segment
            .init
            .as_ref()
            .is_some_and(|init| active.init.as_ref() != Some(init));
        if state.in_flight.contains(&segment.sequence) || (needs_init && active.init_pending) {
            return Ok(SeekStep::Wait);
        }

        let ticket = |job| Ticket {
            generation: active.generation,
            variant: active.index,
            token: active.token.clone(),
            job,
        };
        let init = match &segment.init {
            Some(init) if needs_init => Some(ticket(Job::Init(init.clone()))),
            _ => None,
        };
        let sequence = segment.sequence;
        let segment = ticket(Job::Segment(segment));
        if init.is_some() {
            active.init_pending = true;
        }
        state.in_flight.insert(sequence);
        Ok(SeekStep::Fetch { init, segment })
    }

    /// Gives back a claimed segment that will not be fetched after all.
    fn release(&self, ticket: &Ticket) {
        if let Job::Segment(segment) = &ticket.job {
            let mut state = self.shared.state.lock();
            if state.active.as_ref().map(|a| a.generation) == Some(ticket.generation) {
                state.in_flight.remove(&segment.sequence);
            }
        }
        self.wake.notify_one();
    }

    /// Runs one fetch to completion on the caller's task and applies it.
    async fn fetch_now(&self, ticket: Ticket) -> Result<(), PlayerError> {
        let done = self.fetch(ticket).await;
        let failed = done.result.as_ref().err().cloned();
        self.complete(done);
        match failed {
            Some(err) if !err.is_cancelled() => Err(err.into()),
            _ => Ok(()),
        }
    }
}
