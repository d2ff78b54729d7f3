//! Application state management
//!
//! This module defines the AppState structure that holds:
//! - Server configuration
//! - Metrics
//! - The registry of running conversions (for the debug endpoint)

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::metrics::Metrics;
use crate::transcode::process::Progress;
use crate::transcode::{AudioFormat, Conversion};

/// A running conversion as tracked by the registry
#[derive(Debug, Clone)]
pub struct ActiveConversion {
    pub format: AudioFormat,
    pub started_at: DateTime<Utc>,
    pub progress: Arc<Progress>,
}

/// Snapshot of a running conversion
#[derive(Debug, Clone, Serialize)]
pub struct ConversionInfo {
    pub id: Uuid,
    pub format: AudioFormat,
    pub started_at: DateTime<Utc>,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Application state shared across all handlers
pub struct AppState {
    /// Running conversions (id -> progress)
    pub conversions: DashMap<Uuid, ActiveConversion>,

    /// Metrics collector
    pub metrics: Metrics,

    /// Server configuration
    pub config: ServerConfig,
}

impl AppState {
    /// Create a new AppState with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self {
            conversions: DashMap::new(),
            metrics: Metrics::new(),
            config,
        }
    }

    /// Register a conversion. The returned guard unregisters it when dropped.
    pub fn track_conversion(self: &Arc<Self>, conversion: &Conversion) -> ConversionGuard {
        let id = conversion.id();
        let format = conversion.format();
        let progress = conversion.progress();

        self.conversions.insert(
            id,
            ActiveConversion {
                format,
                started_at: Utc::now(),
                progress: progress.clone(),
            },
        );
        self.metrics.record_conversion_started(format);

        ConversionGuard {
            state: Arc::clone(self),
            id,
            format,
            progress,
        }
    }

    /// List running conversions, oldest first
    pub fn list_conversions(&self) -> Vec<ConversionInfo> {
        let mut list: Vec<_> = self
            .conversions
            .iter()
            .map(|r| ConversionInfo {
                id: *r.key(),
                format: r.format,
                started_at: r.started_at,
                bytes_in: r.progress.bytes_in(),
                bytes_out: r.progress.bytes_out(),
            })
            .collect();
        list.sort_by_key(|c| c.started_at);
        list
    }
}

/// Keeps a conversion registered for as long as its response is alive
pub struct ConversionGuard {
    state: Arc<AppState>,
    id: Uuid,
    format: AudioFormat,
    progress: Arc<Progress>,
}

impl Drop for ConversionGuard {
    fn drop(&mut self) {
        self.state.conversions.remove(&self.id);

        self.state.metrics.record_conversion_ended(
            self.format,
            self.progress.outcome(),
            self.progress.bytes_in(),
            self.progress.bytes_out(),
        );
    }
}
