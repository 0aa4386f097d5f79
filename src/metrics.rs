// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus counters for checkpoint decisions.

use crate::error::VerifyError;
use crate::gate::Disposition;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters for verdicts and dispositions, registered in a private registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    verdicts: IntCounterVec,
    dispositions: IntCounterVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let verdicts = IntCounterVec::new(
            Opts::new(
                "checkpoint_verdicts_total",
                "Token verification results by verdict",
            ),
            &["verdict"],
        )?;
        let dispositions = IntCounterVec::new(
            Opts::new(
                "checkpoint_dispositions_total",
                "Gate decisions by disposition",
            ),
            &["disposition"],
        )?;

        registry.register(Box::new(verdicts.clone()))?;
        registry.register(Box::new(dispositions.clone()))?;

        Ok(Self {
            registry,
            verdicts,
            dispositions,
        })
    }

    pub fn record_verdict(&self, verdict: &Result<bool, VerifyError>) {
        let label = match verdict {
            Ok(true) => "valid",
            Ok(false) => "invalid",
            Err(VerifyError::LookupFailure) => "lookup_failure",
            Err(VerifyError::ServerConfig) => "server_config",
        };
        self.verdicts.with_label_values(&[label]).inc();
    }

    pub fn record_disposition(&self, disposition: Disposition) {
        self.dispositions
            .with_label_values(&[disposition.label()])
            .inc();
    }

    /// Render all counters in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(err) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %err, "Failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn disposition_count(&self, label: &str) -> u64 {
        self.dispositions.with_label_values(&[label]).get()
    }
}
