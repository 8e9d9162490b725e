use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use dhs_core::LodChunkKey;
use dhs_protocol::DhsConnection;
use dhs_protocol::codec::encode_with_threshold;
use dhs_protocol::commands::client_to_server::LodRequestSpec;
use dhs_protocol::commands::client_to_server::ToServerCommand;
use dhs_protocol::commands::server_to_client::BackpressureSpec;
use dhs_protocol::commands::server_to_client::LOD_FRAME_OVERHEAD;
use dhs_protocol::commands::server_to_client::LodDataBody;
use dhs_protocol::commands::server_to_client::LodDataChunkSpec;
use dhs_protocol::commands::server_to_client::LodDataSpec;
use dhs_protocol::commands::server_to_client::LodUnavailableSpec;
use dhs_protocol::commands::server_to_client::LodUpToDateSpec;
use dhs_protocol::commands::server_to_client::UnavailableReason;
use dhs_protocol::types::Capabilities;
use log::debug;
use log::error;
use log::info;
use log::trace;
use log::warn;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::CompletionEvent;
use super::LodOutcome;
use super::SessionContext;
use super::handshaking::Negotiated;
use crate::scheduling::RegionWorkUnit;
use crate::scheduling::WorkError;
use crate::scheduling::WorkHandle;
use crate::world::WorldDataProvider;

struct Outstanding {
    ticket: u64,
    handle: WorkHandle,
}

/// Serves LOD requests after a successful handshake.
pub(super) struct ActiveState {
    negotiated: Negotiated,
    /// requests the client still waits for, by request id
    outstanding: HashMap<u32, Outstanding>,
    /// submitted units whose completion hasn't been handled yet, cancelled ones included;
    /// never more than twice the outstanding bound
    in_flight: usize,
    next_ticket: u64,
    next_buffer_id: u32,
    events: mpsc::Sender<CompletionEvent>,
}

impl ActiveState {
    pub(super) fn new(negotiated: Negotiated, events: mpsc::Sender<CompletionEvent>) -> Self {
        Self {
            negotiated,
            outstanding: HashMap::new(),
            in_flight: 0,
            next_ticket: 0,
            next_buffer_id: 0,
            events,
        }
    }

    /// Returns `false` if the client ended the session.
    pub(super) async fn handle_message(
        &mut self,
        message: ToServerCommand,
        connection: &DhsConnection,
        context: &SessionContext,
    ) -> Result<bool> {
        let id = connection.id();
        match message {
            ToServerCommand::LodRequest(request) => {
                self.handle_request(&request, connection, context).await?;
            }
            ToServerCommand::CancelRequest(cancel) => {
                if let Some(outstanding) = self.outstanding.remove(&cancel.request_id) {
                    debug!("[P{id}] cancelling request {}", cancel.request_id);
                    outstanding.handle.cancel();
                } else {
                    trace!("[P{id}] nothing to cancel for request {}", cancel.request_id);
                }
            }
            ToServerCommand::Goodbye(goodbye) => {
                info!("[P{id}] client said goodbye: {}", goodbye.reason);
                return Ok(false);
            }
            ToServerCommand::Hello(_) => warn!("[P{id}] ignoring repeated Hello"),
        }
        Ok(true)
    }

    async fn handle_request(
        &mut self,
        request: &LodRequestSpec,
        connection: &DhsConnection,
        context: &SessionContext,
    ) -> Result<()> {
        let id = connection.id();
        let request_id = request.request_id;
        context.stats.record_request();

        if self.outstanding.contains_key(&request_id) {
            warn!("[P{id}] ignoring duplicate request {request_id}");
            return Ok(());
        }
        let bound = usize::from(context.config.max_outstanding_requests);
        if self.outstanding.len() >= bound || self.in_flight >= 2 * bound {
            debug!(
                "[P{id}] {} requests outstanding, {} units in flight; rejecting {request_id}",
                self.outstanding.len(),
                self.in_flight
            );
            context.stats.record_backpressure();
            return connection
                .send(BackpressureSpec { request_id }.into())
                .await;
        }

        let key = match request.key() {
            Ok(key) => key,
            Err(err) => {
                warn!("[P{id}] request {request_id}: {err}");
                let reason = UnavailableReason::DetailNotServed;
                return unavailable(connection, context, request_id, reason).await;
            }
        };
        if let Some(reason) = precheck(key, context) {
            trace!("[P{id}] request {request_id} for {key}: {reason:?}");
            return unavailable(connection, context, request_id, reason).await;
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let job = lod_job(
            Arc::clone(&context.provider),
            key,
            request.client_timestamp,
            self.negotiated,
            context.config.compression_threshold,
        );
        let events = self.events.clone();
        let completion = move |result: Result<LodOutcome, WorkError>| {
            let event = CompletionEvent {
                ticket,
                request_id,
                result,
            };
            match events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    // can't happen as long as in_flight is bounded by the queue capacity
                    error!("completion queue overflow; dropping {event:?}");
                }
                Err(TrySendError::Closed(_event)) => {
                    trace!("session is gone; dropping result of request {request_id}");
                }
            }
        };

        self.in_flight += 1;
        trace!("[P{id}] submitting request {request_id} for {key}");
        let handle = context
            .scheduler
            .submit(RegionWorkUnit::new(key, job, completion));
        self.outstanding
            .insert(request_id, Outstanding { ticket, handle });
        Ok(())
    }

    pub(super) async fn handle_completion(
        &mut self,
        event: CompletionEvent,
        connection: &DhsConnection,
        context: &SessionContext,
    ) -> Result<()> {
        let id = connection.id();
        let CompletionEvent {
            ticket,
            request_id,
            result,
        } = event;
        self.in_flight = self.in_flight.saturating_sub(1);

        let current = self
            .outstanding
            .get(&request_id)
            .is_some_and(|outstanding| outstanding.ticket == ticket);
        if !current {
            trace!("[P{id}] dropping result of cancelled request {request_id}");
            return Ok(());
        }
        self.outstanding.remove(&request_id);

        match result {
            Ok(LodOutcome::Encoded(payload)) => {
                self.send_payload(connection, context, request_id, payload)
                    .await
            }
            Ok(LodOutcome::UpToDate) => {
                context.stats.record_up_to_date();
                connection
                    .send(LodUpToDateSpec { request_id }.into())
                    .await
            }
            Ok(LodOutcome::NoData) => {
                unavailable(connection, context, request_id, UnavailableReason::NoData).await
            }
            Err(WorkError::Saturated) => {
                debug!("[P{id}] scheduler saturated; rejecting {request_id}");
                context.stats.record_backpressure();
                connection
                    .send(BackpressureSpec { request_id }.into())
                    .await
            }
            Err(WorkError::RegionUnavailable(region)) => {
                debug!("[P{id}] request {request_id}: region {region} is not available");
                unavailable(
                    connection,
                    context,
                    request_id,
                    UnavailableReason::RegionUnavailable,
                )
                .await
            }
            Err(WorkError::Cancelled) => {
                trace!("[P{id}] request {request_id} has been cancelled");
                Ok(())
            }
            Err(err @ (WorkError::World(_) | WorkError::Codec(_))) => {
                error!("[P{id}] request {request_id} failed: {err}");
                unavailable(connection, context, request_id, UnavailableReason::Internal).await
            }
        }
    }

    /// Sends the payload inline, or as a sequence of chunks if it's large and the client
    /// supports reassembling them.
    ///
    /// A payload that fits neither way is answered with `LodUnavailable(Internal)`.
    async fn send_payload(
        &mut self,
        connection: &DhsConnection,
        context: &SessionContext,
        request_id: u32,
        payload: Vec<u8>,
    ) -> Result<()> {
        let chunk_size = context.config.chunk_size.max(1);
        let chunked = self
            .negotiated
            .capabilities
            .contains(Capabilities::CHUNKED_TRANSFER);
        if !chunked || payload.len() <= chunk_size {
            if payload.len() + LOD_FRAME_OVERHEAD > connection.max_frame_size() {
                warn!(
                    "[P{}] payload of {} bytes for request {request_id} exceeds the frame limit \
                     of {} bytes and the client can't reassemble chunks",
                    connection.id(),
                    payload.len(),
                    connection.max_frame_size()
                );
                let reason = UnavailableReason::Internal;
                return unavailable(connection, context, request_id, reason).await;
            }
            context.stats.record_served();
            return connection
                .send(
                    LodDataSpec {
                        request_id,
                        body: LodDataBody::Inline(payload),
                    }
                    .into(),
                )
                .await;
        }

        context.stats.record_served();
        let buffer_id = self.next_buffer_id;
        self.next_buffer_id = self.next_buffer_id.wrapping_add(1);
        trace!(
            "[P{}] sending {} bytes for request {request_id} as buffer {buffer_id}",
            connection.id(),
            payload.len()
        );
        for (index, chunk) in payload.chunks(chunk_size).enumerate() {
            connection
                .send(
                    LodDataChunkSpec {
                        buffer_id,
                        is_first: index == 0,
                        data: chunk.to_vec(),
                    }
                    .into(),
                )
                .await?;
        }
        connection
            .send(
                LodDataSpec {
                    request_id,
                    body: LodDataBody::Buffered(buffer_id),
                }
                .into(),
            )
            .await
    }

    /// Cancels everything still outstanding.
    pub(super) fn cancel_all(&mut self, id: u64) {
        if !self.outstanding.is_empty() {
            debug!("[P{id}] cancelling {} outstanding requests", self.outstanding.len());
        }
        for (_request_id, outstanding) in self.outstanding.drain() {
            outstanding.handle.cancel();
        }
    }
}

/// Answers requests that can be rejected without touching world data.
fn precheck(key: LodChunkKey, context: &SessionContext) -> Option<UnavailableReason> {
    let config = &context.config;
    let detail = key.detail();
    if detail < config.min_detail_level || detail > config.max_detail_level {
        return Some(UnavailableReason::DetailNotServed);
    }
    let Some(dimension) = context.provider.dimension(key.dimension) else {
        return Some(UnavailableReason::NoData);
    };
    let world = config.world_settings(&dimension.name);
    if !world.distant_generation_enabled {
        Some(UnavailableReason::Disabled)
    } else if world
        .border
        .as_ref()
        .is_some_and(|border| !border.intersects(key.section))
    {
        Some(UnavailableReason::OutsideBorder)
    } else {
        None
    }
}

async fn unavailable(
    connection: &DhsConnection,
    context: &SessionContext,
    request_id: u32,
    reason: UnavailableReason,
) -> Result<()> {
    context.stats.record_unavailable();
    connection
        .send(LodUnavailableSpec { request_id, reason }.into())
        .await
}

/// Loads, checks and encodes one section on a scheduler thread.
fn lod_job(
    provider: Arc<dyn WorldDataProvider>,
    key: LodChunkKey,
    client_timestamp: Option<i64>,
    negotiated: Negotiated,
    compression_threshold: usize,
) -> impl FnOnce() -> Result<LodOutcome, WorkError> + Send + 'static {
    move || {
        let raw = provider
            .load_lod(&key)
            .map_err(|err| WorkError::World(format!("{err:#}")))?;
        let Some(raw) = raw else {
            return Ok(LodOutcome::NoData);
        };
        if client_timestamp.is_some_and(|timestamp| timestamp >= raw.timestamp) {
            return Ok(LodOutcome::UpToDate);
        }
        let payload = raw.into_payload(key, negotiated.protocol_version);
        let encoded = encode_with_threshold(
            &payload,
            negotiated.variant,
            negotiated.compression,
            compression_threshold,
        )?;
        Ok(LodOutcome::Encoded(encoded))
    }
}
