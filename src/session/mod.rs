// src/session/mod.rs
//! Ownership of the single live transport session.
//!
//! A `SessionManager` opens a session lazily, replaces it once it has served
//! its download quota or outlived its maximum age, and closes it on release.
//! Each replacement presents a different identity signature.

pub mod identity;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};
use crate::cninfo::client::{HttpRequest, HttpResponse, Transport, TransportFactory};
use crate::config::{DelayWindow, SessionConfig};
use crate::utils::error::TransportError;
use identity::IdentitySignature;

/// One live transport context.
pub struct Session {
    transport: Box<dyn Transport>,
    identity: IdentitySignature,
    created_at: DateTime<Utc>,
    started: Instant,
    downloads_completed: u32,
    generation: u64,
    last_network_op: Option<Instant>,
    pacing: DelayWindow,
    behavior: bool,
    deadline: Duration,
    rng: StdRng,
}

impl Session {
    pub fn identity(&self) -> IdentitySignature {
        self.identity
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn downloads_completed(&self) -> u32 {
        self.downloads_completed
    }

    /// 1 for the first session a manager opens, incremented on every rotation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn record_download(&mut self) {
        self.downloads_completed += 1;
    }

    pub fn current_url(&self) -> Option<&str> {
        self.transport.current_url()
    }

    pub fn page_source(&self) -> Option<&str> {
        self.transport.page_source()
    }

    pub async fn navigate(&mut self, url: &str) -> Result<(), TransportError> {
        self.pace().await;
        let deadline = self.deadline;
        tokio::time::timeout(deadline, self.transport.navigate(url))
            .await
            .map_err(|_| TransportError::Timeout(deadline))?
    }

    pub async fn request(&mut self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.pace().await;
        let deadline = self.deadline;
        tokio::time::timeout(deadline, self.transport.request(request))
            .await
            .map_err(|_| TransportError::Timeout(deadline))?
    }

    /// Random pause (and optional scroll / pointer movement) between two network
    /// operations on this session. Never affects the outcome of the operation.
    async fn pace(&mut self) {
        if self.last_network_op.is_some() {
            let delay = self.pacing.sample(&mut self.rng);
            if !delay.is_zero() {
                tracing::debug!("Pacing {:.2}s before next request", delay.as_secs_f64());
                tokio::time::sleep(delay).await;
            }
            if self.behavior {
                let scroll = self.rng.gen_range(100..=500);
                let pointer = (self.rng.gen_range(-50..=50), self.rng.gen_range(-50..=50));
                self.transport.simulate_activity(scroll, pointer).await;
            }
        }
        self.last_network_op = Some(Instant::now());
    }
}

pub struct SessionManager {
    factory: Arc<dyn TransportFactory>,
    config: SessionConfig,
    live: Option<Session>,
    rng: StdRng,
    generation: u64,
    last_identity: Option<IdentitySignature>,
    last_created_at: Option<DateTime<Utc>>,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn TransportFactory>, config: SessionConfig) -> Self {
        Self::with_rng(factory, config, StdRng::from_entropy())
    }

    /// Deterministic identity and delay choices, for reproducible runs.
    pub fn with_seed(factory: Arc<dyn TransportFactory>, config: SessionConfig, seed: u64) -> Self {
        Self::with_rng(factory, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(factory: Arc<dyn TransportFactory>, config: SessionConfig, rng: StdRng) -> Self {
        Self {
            factory,
            config,
            live: None,
            rng,
            generation: 0,
            last_identity: None,
            last_created_at: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn live(&self) -> Option<&Session> {
        self.live.as_ref()
    }

    /// Number of sessions opened so far.
    pub fn sessions_opened(&self) -> u64 {
        self.generation
    }

    /// Returns the live session, replacing it first if it exceeded a ceiling
    /// and opening one if none is live.
    pub async fn acquire(&mut self) -> Result<&mut Session, TransportError> {
        self.maybe_rotate().await?;
        if self.live.is_none() {
            let session = self.open_session().await?;
            self.live = Some(session);
        }
        self.live.as_mut().ok_or(TransportError::Closed)
    }

    pub fn record_download(&mut self) {
        if let Some(session) = self.live.as_mut() {
            session.record_download();
            tracing::debug!(
                "Session #{} has completed {} downloads",
                session.generation,
                session.downloads_completed
            );
        }
    }

    /// Replaces the live session if its download count or age reached the ceiling.
    pub async fn maybe_rotate(&mut self) -> Result<bool, TransportError> {
        let reason = match &self.live {
            Some(s) if s.downloads_completed >= self.config.max_downloads_per_session => {
                format!("download quota reached ({})", s.downloads_completed)
            }
            Some(s) if s.age() >= self.config.max_session_age() => {
                format!("session age {:.0}s exceeded", s.age().as_secs_f64())
            }
            _ => return Ok(false),
        };
        tracing::info!("Rotating session: {}", reason);
        self.rotate().await?;
        Ok(true)
    }

    /// Unconditionally replaces the live session with one presenting a new identity.
    pub async fn rotate(&mut self) -> Result<(), TransportError> {
        let had_session = self.live.is_some();
        self.release().await;
        if had_session {
            let pause = self.config.restart_pause.sample(&mut self.rng);
            if !pause.is_zero() {
                tracing::info!("Waiting {:.2}s before opening a new session", pause.as_secs_f64());
                tokio::time::sleep(pause).await;
            }
        }
        let session = self.open_session().await?;
        self.live = Some(session);
        Ok(())
    }

    /// Closes the live session, if any.
    pub async fn release(&mut self) {
        if let Some(mut session) = self.live.take() {
            session.transport.close().await;
            tracing::info!(
                "Closed session #{} after {} downloads",
                session.generation,
                session.downloads_completed
            );
        }
    }

    async fn open_session(&mut self) -> Result<Session, TransportError> {
        let identity = IdentitySignature::pick(&mut self.rng, self.last_identity);
        let transport = self.factory.open(identity, &self.config).await?;

        // createdAt is strictly increasing across sessions of one manager
        let mut created_at = Utc::now();
        if let Some(previous) = self.last_created_at {
            if created_at <= previous {
                created_at = previous + chrono::Duration::microseconds(1);
            }
        }

        self.generation += 1;
        self.last_identity = Some(identity);
        self.last_created_at = Some(created_at);
        tracing::info!("Opened session #{} with identity {}", self.generation, identity);

        Ok(Session {
            transport,
            identity,
            created_at,
            started: Instant::now(),
            downloads_completed: 0,
            generation: self.generation,
            last_network_op: None,
            pacing: self.config.pacing,
            behavior: self.config.behavior_enabled(),
            deadline: self.config.request_timeout(),
            rng: StdRng::seed_from_u64(self.rng.gen()),
        })
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        // The transport handle is released with the session; `release()` is the graceful path.
        if let Some(session) = self.live.take() {
            tracing::debug!("Dropping live session #{} without explicit release", session.generation);
        }
    }
}
