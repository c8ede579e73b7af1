//! Adaptive bitrate regulator lifecycle
//!
//! Swapping the video source recreates the encoder, so a regulator bound to
//! the old encoder must be detached before the swap and attached again
//! afterwards with the same configuration. Attach, detach and whole swaps
//! are serialized, so a reconnect cannot bind the regulator mid-swap.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::Result;

/// Regulation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegulatorMode {
    /// Back off quickly on congestion, recover slowly
    #[default]
    Conservative,
    /// Track available bandwidth closely
    Aggressive,
}

/// Regulator settings, preserved across detach/reattach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegulatorConfig {
    /// Lowest bitrate the regulator may choose (bits/sec)
    pub min_bitrate: u32,
    /// Highest bitrate the regulator may choose (bits/sec)
    pub max_bitrate: u32,
    pub mode: RegulatorMode,
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        Self {
            min_bitrate: 500_000,
            max_bitrate: 6_000_000,
            mode: RegulatorMode::default(),
        }
    }
}

impl RegulatorConfig {
    /// Set the bitrate range; bounds are swapped if given in the wrong order
    pub fn bitrate_range(mut self, min: u32, max: u32) -> Self {
        self.min_bitrate = min.min(max);
        self.max_bitrate = max.max(min);
        self
    }

    pub fn mode(mut self, mode: RegulatorMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Bitrate regulator bound to the transport's encoder
#[async_trait]
pub trait RegulatorController: Send + Sync {
    async fn attach(&self, config: &RegulatorConfig) -> Result<()>;
    async fn detach(&self);
}

/// Single-owner attachment of a regulator to the current encoder
pub struct RegulatorAttachment {
    controller: Option<Arc<dyn RegulatorController>>,
    config: RegulatorConfig,
    required: bool,
    attached: Mutex<bool>,
    gate: AsyncMutex<()>,
}

impl RegulatorAttachment {
    /// Create an attachment; `required` comes from the transport kind
    pub fn new(
        controller: Option<Arc<dyn RegulatorController>>,
        config: RegulatorConfig,
        required: bool,
    ) -> Self {
        Self {
            controller,
            config,
            required,
            attached: Mutex::new(false),
            gate: AsyncMutex::new(()),
        }
    }

    /// Attachment that never attaches anything
    pub fn disabled() -> Self {
        Self::new(None, RegulatorConfig::default(), false)
    }

    pub fn config(&self) -> &RegulatorConfig {
        &self.config
    }

    pub fn is_attached(&self) -> bool {
        *self.attached.lock()
    }

    /// Attach if the transport needs regulation and nothing is attached yet
    ///
    /// Waits for a swap in progress to finish first.
    pub async fn attach(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.attach_locked().await
    }

    /// Detach if attached; returns whether a detach happened
    pub async fn detach(&self) -> bool {
        let _gate = self.gate.lock().await;
        self.detach_locked().await
    }

    /// Run a source swap with the regulator detached around it
    ///
    /// Reattaches only if it was attached before, even when the swap fails.
    /// Attach and detach calls made meanwhile wait until the swap is over.
    pub async fn around_swap<F, T>(&self, swap: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        let _gate = self.gate.lock().await;
        let was_attached = self.detach_locked().await;
        let out = swap.await;
        if was_attached {
            if let Err(e) = self.attach_locked().await {
                tracing::warn!(error = %e, "Failed to reattach regulator after source swap");
            }
        }
        out
    }

    async fn attach_locked(&self) -> Result<()> {
        let Some(controller) = self.controller.as_ref().filter(|_| self.required) else {
            return Ok(());
        };
        if self.is_attached() {
            return Ok(());
        }

        controller.attach(&self.config).await?;
        *self.attached.lock() = true;
        tracing::debug!(
            min = self.config.min_bitrate,
            max = self.config.max_bitrate,
            mode = ?self.config.mode,
            "Regulator attached"
        );
        Ok(())
    }

    async fn detach_locked(&self) -> bool {
        let was_attached = std::mem::replace(&mut *self.attached.lock(), false);
        if was_attached {
            if let Some(controller) = &self.controller {
                controller.detach().await;
                tracing::debug!("Regulator detached");
            }
        }
        was_attached
    }
}
